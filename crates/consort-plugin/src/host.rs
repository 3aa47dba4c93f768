//! The callback surfaces around a plugin instance.
//!
//! [`HostCallbacks`] is what a format instance may call back into: it is
//! implemented per loaded plugin and hands the plugin its buffer size, sample
//! rate, transport and UI round trips. [`EngineCallbacks`] is implemented once by
//! the embedding application and receives everything the instances report
//! upward.

use crate::midi::MidiEvent;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Bar/beat/tick position, only meaningful when `valid` is set.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TimeInfoBbt {
    pub valid: bool,
    pub bar: i32,
    pub beat: i32,
    pub tick: f64,
    pub bar_start_tick: f64,
    pub beats_per_bar: f32,
    pub beat_type: f32,
    pub ticks_per_beat: f64,
    pub beats_per_minute: f64,
}

/// Transport snapshot for one buffer.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TimeInfo {
    pub playing: bool,
    pub frame: u64,
    pub usecs: u64,
    pub bbt: TimeInfoBbt,
}

impl TimeInfo {
    pub fn stopped_at(frame: u64) -> Self {
        Self {
            frame,
            ..Self::default()
        }
    }

    pub fn playing_at(frame: u64) -> Self {
        Self {
            playing: true,
            frame,
            ..Self::default()
        }
    }
}

/// Requests a plugin can make of its host through the generic dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostOpcode {
    Null,
    UpdateParameter,
    UpdateMidiProgram,
    ReloadParameters,
    ReloadMidiPrograms,
    ReloadAll,
    UiUnavailable,
    HostIdle,
    RequestIdle,
    SetVolume,
    SetDryWet,
    SetBalanceLeft,
    SetBalanceRight,
    SetPanning,
    SetProcessPrecision,
}

/// Calls a format instance may make into its host.
///
/// Every method may be called from the audio thread unless noted, so
/// implementations must not block there.
pub trait HostCallbacks: Send + Sync {
    fn buffer_size(&self) -> u32;

    fn sample_rate(&self) -> f64;

    fn is_offline(&self) -> bool;

    fn time_info(&self) -> TimeInfo;

    /// Emit a MIDI event from the plugin's output. Returns `false` if dropped.
    fn write_midi_event(&self, event: &MidiEvent) -> bool;

    /// The plugin's own UI changed a parameter, by native index.
    fn ui_parameter_changed(&self, rindex: u32, value: f32);

    fn ui_midi_program_changed(&self, channel: u8, bank: u32, program: u32);

    fn ui_custom_data_changed(&self, key: &str, value: &str);

    fn ui_closed(&self);

    /// Blocking file dialog round trip. Control thread only.
    fn ui_open_file(&self, is_dir: bool, title: &str, filter: &str) -> Option<PathBuf>;

    /// Blocking file dialog round trip. Control thread only.
    fn ui_save_file(&self, is_dir: bool, title: &str, filter: &str) -> Option<PathBuf>;

    fn dispatcher(&self, opcode: HostOpcode, index: i32, value: isize, opt: f32) -> isize;

    /// Pass a change notice up to the embedding application. Control thread only.
    fn notify(&self, notification: HostNotification);
}

/// Internal controls every instance carries regardless of plugin format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InternalControl {
    Active,
    DryWet,
    Volume,
    BalanceLeft,
    BalanceRight,
    Panning,
    CtrlChannel,
}

impl InternalControl {
    /// Negative control indices address internal controls on the UI wire.
    pub fn from_ui_index(index: i32) -> Option<Self> {
        match index {
            -2 => Some(Self::Active),
            -3 => Some(Self::DryWet),
            -4 => Some(Self::Volume),
            -5 => Some(Self::BalanceLeft),
            -6 => Some(Self::BalanceRight),
            -7 => Some(Self::Panning),
            -8 => Some(Self::CtrlChannel),
            _ => None,
        }
    }

    pub fn ui_index(self) -> i32 {
        match self {
            Self::Active => -2,
            Self::DryWet => -3,
            Self::Volume => -4,
            Self::BalanceLeft => -5,
            Self::BalanceRight => -6,
            Self::Panning => -7,
            Self::CtrlChannel => -8,
        }
    }
}

/// Something changed that the embedding application may want to reflect.
#[derive(Debug, Clone, PartialEq)]
pub enum HostNotification {
    ParameterValueChanged {
        plugin_id: u32,
        index: u32,
        value: f32,
    },
    InternalValueChanged {
        plugin_id: u32,
        control: InternalControl,
        value: f32,
    },
    ProgramChanged {
        plugin_id: u32,
        index: Option<usize>,
    },
    MidiProgramChanged {
        plugin_id: u32,
        index: Option<usize>,
    },
    CustomDataChanged {
        plugin_id: u32,
        key: String,
    },
    NoteOn {
        plugin_id: u32,
        channel: u8,
        note: u8,
        velocity: u8,
    },
    NoteOff {
        plugin_id: u32,
        channel: u8,
        note: u8,
    },
    LatencyChanged {
        plugin_id: u32,
        frames: u32,
    },
    UiStateChanged {
        plugin_id: u32,
        visible: bool,
    },
    ReloadRequested {
        plugin_id: u32,
        opcode: HostOpcode,
    },
    UiUnavailable {
        plugin_id: u32,
    },
}

/// Services the embedding engine provides to every instance.
pub trait EngineCallbacks: Send + Sync {
    fn buffer_size(&self) -> u32;

    fn sample_rate(&self) -> f64;

    fn is_offline(&self) -> bool {
        false
    }

    fn time_info(&self) -> TimeInfo {
        TimeInfo::default()
    }

    /// Route a MIDI event a plugin produced. Called on the audio thread.
    fn write_midi_event(&self, _plugin_id: u32, _event: &MidiEvent) -> bool {
        false
    }

    fn open_file_dialog(&self, _is_dir: bool, _title: &str, _filter: &str) -> Option<PathBuf> {
        None
    }

    fn save_file_dialog(&self, _is_dir: bool, _title: &str, _filter: &str) -> Option<PathBuf> {
        None
    }

    /// Delivered on the control thread, from `PluginInstance::idle` or a UI bridge.
    fn notify(&self, _notification: HostNotification) {}
}
