//! Host-level events handed to `PluginInstance::process`.

use crate::midi::{channel_of, MidiEvent, MIDI_EVENT_DATA_SIZE};

/// Channel value for parameter events that are not MIDI controllers.
pub const NON_MIDI_CHANNEL: u8 = 0x10;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ControlEvent {
    /// Controller `param` on a MIDI channel, or parameter index on
    /// [`NON_MIDI_CHANNEL`]. `value` is normalized to 0..1.
    Parameter { param: u16, value: f32 },
    MidiBank(u16),
    MidiProgram(u16),
    AllSoundOff,
    AllNotesOff,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EngineEventKind {
    Control(ControlEvent),
    Midi(MidiEvent),
}

/// One event inside a host buffer, `time` is the frame offset.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineEvent {
    pub time: u32,
    pub channel: u8,
    pub kind: EngineEventKind,
}

impl EngineEvent {
    pub fn control(time: u32, channel: u8, event: ControlEvent) -> Self {
        Self {
            time,
            channel,
            kind: EngineEventKind::Control(event),
        }
    }

    /// Directly target host-facing parameter `index` with a normalized value.
    pub fn parameter(time: u32, index: u16, normalized: f32) -> Self {
        Self::control(
            time,
            NON_MIDI_CHANNEL,
            ControlEvent::Parameter {
                param: index,
                value: normalized,
            },
        )
    }

    pub fn controller(time: u32, channel: u8, cc: u16, normalized: f32) -> Self {
        Self::control(
            time,
            channel,
            ControlEvent::Parameter {
                param: cc,
                value: normalized,
            },
        )
    }

    pub fn midi(time: u32, bytes: &[u8]) -> Option<Self> {
        if bytes.len() > MIDI_EVENT_DATA_SIZE {
            return None;
        }
        let event = MidiEvent::new(time, bytes)?;
        Some(Self {
            time,
            channel: channel_of(bytes[0]),
            kind: EngineEventKind::Midi(event),
        })
    }
}
