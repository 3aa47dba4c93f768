//! Raw MIDI events and program slots as seen by plugins.

use serde::{Deserialize, Serialize};

pub const MIDI_STATUS_NOTE_OFF: u8 = 0x80;
pub const MIDI_STATUS_NOTE_ON: u8 = 0x90;
pub const MIDI_STATUS_POLYPHONIC_AFTERTOUCH: u8 = 0xA0;
pub const MIDI_STATUS_CONTROL_CHANGE: u8 = 0xB0;
pub const MIDI_STATUS_PROGRAM_CHANGE: u8 = 0xC0;
pub const MIDI_STATUS_CHANNEL_PRESSURE: u8 = 0xD0;
pub const MIDI_STATUS_PITCH_WHEEL_CONTROL: u8 = 0xE0;

pub const MIDI_CONTROL_BANK_SELECT: u8 = 0x00;
pub const MIDI_CONTROL_BREATH_CONTROLLER: u8 = 0x02;
pub const MIDI_CONTROL_CHANNEL_VOLUME: u8 = 0x07;
pub const MIDI_CONTROL_BALANCE: u8 = 0x08;
pub const MIDI_CONTROL_ALL_SOUND_OFF: u8 = 0x78;
pub const MIDI_CONTROL_ALL_NOTES_OFF: u8 = 0x7B;

pub const MAX_MIDI_CHANNELS: u8 = 16;
pub const MAX_MIDI_NOTE: u8 = 128;
pub const MAX_MIDI_VALUE: u8 = 128;

/// Events a single sub-call can carry. Extra events are dropped.
pub const MAX_MIDI_EVENTS: usize = 512;

/// Number of inline data bytes; longer messages are not carried.
pub const MIDI_EVENT_DATA_SIZE: usize = 4;

#[inline]
pub const fn status_of(byte: u8) -> u8 {
    if byte < 0xF0 {
        byte & 0xF0
    } else {
        byte
    }
}

#[inline]
pub const fn channel_of(byte: u8) -> u8 {
    byte & 0x0F
}

/// One timestamped MIDI message, `time` is a frame offset inside the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MidiEvent {
    pub port: u8,
    pub time: u32,
    pub size: u8,
    pub data: [u8; MIDI_EVENT_DATA_SIZE],
}

impl MidiEvent {
    pub fn new(time: u32, bytes: &[u8]) -> Option<Self> {
        if bytes.is_empty() || bytes.len() > MIDI_EVENT_DATA_SIZE {
            return None;
        }
        let mut data = [0; MIDI_EVENT_DATA_SIZE];
        data[..bytes.len()].copy_from_slice(bytes);
        Some(Self {
            port: 0,
            time,
            size: bytes.len() as u8,
            data,
        })
    }

    pub fn note_on(time: u32, channel: u8, note: u8, velocity: u8) -> Self {
        Self::three(time, MIDI_STATUS_NOTE_ON | channel_of(channel), note, velocity)
    }

    pub fn note_off(time: u32, channel: u8, note: u8) -> Self {
        Self::three(time, MIDI_STATUS_NOTE_OFF | channel_of(channel), note, 0)
    }

    pub fn control_change(time: u32, channel: u8, control: u8, value: u8) -> Self {
        Self::three(
            time,
            MIDI_STATUS_CONTROL_CHANGE | channel_of(channel),
            control,
            value,
        )
    }

    pub fn program_change(time: u32, channel: u8, program: u8) -> Self {
        Self {
            port: 0,
            time,
            size: 2,
            data: [MIDI_STATUS_PROGRAM_CHANGE | channel_of(channel), program, 0, 0],
        }
    }

    fn three(time: u32, status: u8, d1: u8, d2: u8) -> Self {
        Self {
            port: 0,
            time,
            size: 3,
            data: [status, d1 & 0x7F, d2 & 0x7F, 0],
        }
    }

    pub fn with_port(mut self, port: u8) -> Self {
        self.port = port;
        self
    }

    #[inline]
    pub fn bytes(&self) -> &[u8] {
        &self.data[..self.size as usize]
    }

    #[inline]
    pub fn status(&self) -> u8 {
        status_of(self.data[0])
    }

    #[inline]
    pub fn channel(&self) -> u8 {
        channel_of(self.data[0])
    }

    /// Note-on with velocity 0 is a note-off.
    pub fn normalized(mut self) -> Self {
        if self.status() == MIDI_STATUS_NOTE_ON && self.size >= 3 && self.data[2] == 0 {
            self.data[0] = MIDI_STATUS_NOTE_OFF | self.channel();
        }
        self
    }
}

/// One bank/program slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MidiProgram {
    pub bank: u32,
    pub program: u32,
    pub name: String,
}

impl MidiProgram {
    pub fn new(bank: u32, program: u32, name: impl Into<String>) -> Self {
        Self {
            bank,
            program,
            name: name.into(),
        }
    }
}

/// Note-off for every note on `channel`, used when a reset is pending.
pub fn all_notes_off(channel: u8) -> impl Iterator<Item = MidiEvent> {
    (0..MAX_MIDI_NOTE).map(move |note| MidiEvent::note_off(0, channel, note))
}

/// All-notes-off followed by all-sound-off on every channel.
pub fn all_sound_off() -> impl Iterator<Item = MidiEvent> {
    (0..MAX_MIDI_CHANNELS).flat_map(|channel| {
        [
            MidiEvent::control_change(0, channel, MIDI_CONTROL_ALL_NOTES_OFF, 0),
            MidiEvent::control_change(0, channel, MIDI_CONTROL_ALL_SOUND_OFF, 0),
        ]
    })
}
