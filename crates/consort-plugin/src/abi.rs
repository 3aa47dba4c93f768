//! The native plugin ABI.
//!
//! A plugin exposes one constant [`NativePluginDescriptor`] per plugin class.
//! Every function takes the opaque handle returned by `instantiate`; the table
//! itself holds no state and may be used for any number of instances.
//!
//! All types here are `#[repr(C)]` and their layout is part of the public
//! contract. Functions signal failure with null or zero returns and must never
//! unwind into the host.

use std::ffi::{c_char, c_void};

/// Major version. Descriptors with a different value are rejected.
pub const NATIVE_API_VERSION: u32 = 1;

/// Exported by shared libraries that carry native plugins.
pub const NATIVE_ENTRY_SYMBOL: &[u8] = b"consort_native_plugin_descriptors\0";

pub type NativeHandle = *mut c_void;
pub type NativeHostHandle = *mut c_void;

/// Signature of [`NATIVE_ENTRY_SYMBOL`]: writes the descriptor count and
/// returns an array of that many descriptor pointers.
pub type NativeEntryFn =
    unsafe extern "C" fn(count: *mut u32) -> *const *const NativePluginDescriptor;

pub const PLUGIN_CATEGORY_NONE: u32 = 0;
pub const PLUGIN_CATEGORY_SYNTH: u32 = 1;
pub const PLUGIN_CATEGORY_DELAY: u32 = 2;
pub const PLUGIN_CATEGORY_EQ: u32 = 3;
pub const PLUGIN_CATEGORY_FILTER: u32 = 4;
pub const PLUGIN_CATEGORY_DISTORTION: u32 = 5;
pub const PLUGIN_CATEGORY_DYNAMICS: u32 = 6;
pub const PLUGIN_CATEGORY_MODULATOR: u32 = 7;
pub const PLUGIN_CATEGORY_UTILITY: u32 = 8;
pub const PLUGIN_CATEGORY_OTHER: u32 = 9;

pub const PLUGIN_IS_RTSAFE: u32 = 1 << 0;
pub const PLUGIN_IS_SYNTH: u32 = 1 << 1;
pub const PLUGIN_HAS_GUI: u32 = 1 << 2;
pub const PLUGIN_NEEDS_FIXED_BUFFERS: u32 = 1 << 3;
pub const PLUGIN_USES_TIME: u32 = 1 << 4;
/// `get_state`/`set_state` carry the whole plugin state.
pub const PLUGIN_USES_STATE: u32 = 1 << 5;

pub const PLUGIN_SUPPORTS_PROGRAM_CHANGES: u32 = 1 << 0;
pub const PLUGIN_SUPPORTS_CONTROL_CHANGES: u32 = 1 << 1;
pub const PLUGIN_SUPPORTS_CHANNEL_PRESSURE: u32 = 1 << 2;
pub const PLUGIN_SUPPORTS_NOTE_AFTERTOUCH: u32 = 1 << 3;
pub const PLUGIN_SUPPORTS_PITCHBEND: u32 = 1 << 4;
pub const PLUGIN_SUPPORTS_ALL_SOUND_OFF: u32 = 1 << 5;
pub const PLUGIN_SUPPORTS_EVERYTHING: u32 = (1 << 6) - 1;

pub const PARAMETER_IS_OUTPUT: u32 = 1 << 0;
pub const PARAMETER_IS_ENABLED: u32 = 1 << 1;
pub const PARAMETER_IS_AUTOMABLE: u32 = 1 << 2;
pub const PARAMETER_IS_BOOLEAN: u32 = 1 << 3;
pub const PARAMETER_IS_INTEGER: u32 = 1 << 4;
pub const PARAMETER_IS_LOGARITHMIC: u32 = 1 << 5;
pub const PARAMETER_USES_SAMPLE_RATE: u32 = 1 << 6;
pub const PARAMETER_USES_SCALEPOINTS: u32 = 1 << 7;
pub const PARAMETER_USES_CUSTOM_TEXT: u32 = 1 << 8;

pub const PLUGIN_OPCODE_NULL: i32 = 0;
/// New size in `value`.
pub const PLUGIN_OPCODE_BUFFER_SIZE_CHANGED: i32 = 1;
/// New rate in `opt`.
pub const PLUGIN_OPCODE_SAMPLE_RATE_CHANGED: i32 = 2;
/// `value` is 1 when offline.
pub const PLUGIN_OPCODE_OFFLINE_CHANGED: i32 = 3;
/// New title as a C string in `ptr`.
pub const PLUGIN_OPCODE_UI_NAME_CHANGED: i32 = 4;
pub const PLUGIN_OPCODE_TRANSPORT_RELOCATED: i32 = 5;
pub const PLUGIN_OPCODE_IDLE: i32 = 6;

pub const HOST_OPCODE_NULL: i32 = 0;
pub const HOST_OPCODE_SET_VOLUME: i32 = 1;
pub const HOST_OPCODE_SET_DRYWET: i32 = 2;
pub const HOST_OPCODE_SET_BALANCE_LEFT: i32 = 3;
pub const HOST_OPCODE_SET_BALANCE_RIGHT: i32 = 4;
pub const HOST_OPCODE_SET_PANNING: i32 = 5;
pub const HOST_OPCODE_SET_PROCESS_PRECISION: i32 = 6;
pub const HOST_OPCODE_UPDATE_PARAMETER: i32 = 7;
pub const HOST_OPCODE_UPDATE_MIDI_PROGRAM: i32 = 8;
pub const HOST_OPCODE_RELOAD_PARAMETERS: i32 = 9;
pub const HOST_OPCODE_RELOAD_MIDI_PROGRAMS: i32 = 10;
pub const HOST_OPCODE_RELOAD_ALL: i32 = 11;
pub const HOST_OPCODE_UI_UNAVAILABLE: i32 = 12;
pub const HOST_OPCODE_HOST_IDLE: i32 = 13;
pub const HOST_OPCODE_REQUEST_IDLE: i32 = 14;

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct NativeParameterScalePoint {
    pub label: *const c_char,
    pub value: f32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct NativeParameterRanges {
    pub def: f32,
    pub min: f32,
    pub max: f32,
    pub step: f32,
    pub step_small: f32,
    pub step_large: f32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct NativeParameter {
    pub hints: u32,
    pub name: *const c_char,
    pub unit: *const c_char,
    pub ranges: NativeParameterRanges,
    pub scale_point_count: u32,
    pub scale_points: *const NativeParameterScalePoint,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct NativeMidiProgram {
    pub bank: u32,
    pub program: u32,
    pub name: *const c_char,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct NativeTimeInfoBbt {
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

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct NativeTimeInfo {
    pub playing: bool,
    pub frame: u64,
    pub usecs: u64,
    pub bbt: NativeTimeInfoBbt,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NativeMidiEvent {
    /// Frame offset inside the current `process` call.
    pub time: u32,
    pub port: u8,
    pub size: u8,
    pub data: [u8; 4],
}

/// The host side, handed to `instantiate` and valid until `cleanup`.
#[repr(C)]
pub struct NativeHostDescriptor {
    pub handle: NativeHostHandle,
    pub resource_dir: *const c_char,
    pub ui_name: *const c_char,

    pub get_buffer_size: Option<unsafe extern "C" fn(handle: NativeHostHandle) -> u32>,
    pub get_sample_rate: Option<unsafe extern "C" fn(handle: NativeHostHandle) -> f64>,
    pub is_offline: Option<unsafe extern "C" fn(handle: NativeHostHandle) -> bool>,
    /// Valid for the duration of the current `process` call.
    pub get_time_info: Option<unsafe extern "C" fn(handle: NativeHostHandle) -> *const NativeTimeInfo>,
    pub write_midi_event:
        Option<unsafe extern "C" fn(handle: NativeHostHandle, event: *const NativeMidiEvent) -> bool>,

    pub ui_parameter_changed: Option<unsafe extern "C" fn(handle: NativeHostHandle, index: u32, value: f32)>,
    pub ui_midi_program_changed:
        Option<unsafe extern "C" fn(handle: NativeHostHandle, channel: u8, bank: u32, program: u32)>,
    pub ui_custom_data_changed:
        Option<unsafe extern "C" fn(handle: NativeHostHandle, key: *const c_char, value: *const c_char)>,
    pub ui_closed: Option<unsafe extern "C" fn(handle: NativeHostHandle)>,

    /// Returned strings stay valid until the next dialog call.
    pub ui_open_file: Option<
        unsafe extern "C" fn(
            handle: NativeHostHandle,
            is_dir: bool,
            title: *const c_char,
            filter: *const c_char,
        ) -> *const c_char,
    >,
    pub ui_save_file: Option<
        unsafe extern "C" fn(
            handle: NativeHostHandle,
            is_dir: bool,
            title: *const c_char,
            filter: *const c_char,
        ) -> *const c_char,
    >,

    pub dispatcher: Option<
        unsafe extern "C" fn(
            handle: NativeHostHandle,
            opcode: i32,
            index: i32,
            value: isize,
            ptr: *mut c_void,
            opt: f32,
        ) -> isize,
    >,
}

#[repr(C)]
pub struct NativePluginDescriptor {
    pub api_version: u32,
    pub category: u32,
    pub hints: u32,
    pub supports: u32,
    pub audio_ins: u32,
    pub audio_outs: u32,
    pub cv_ins: u32,
    pub cv_outs: u32,
    pub midi_ins: u32,
    pub midi_outs: u32,
    pub name: *const c_char,
    pub label: *const c_char,
    pub maker: *const c_char,
    pub copyright: *const c_char,

    pub instantiate: Option<unsafe extern "C" fn(host: *const NativeHostDescriptor) -> NativeHandle>,
    pub cleanup: Option<unsafe extern "C" fn(handle: NativeHandle)>,

    pub get_parameter_count: Option<unsafe extern "C" fn(handle: NativeHandle) -> u32>,
    pub get_parameter_info:
        Option<unsafe extern "C" fn(handle: NativeHandle, index: u32) -> *const NativeParameter>,
    pub get_parameter_value: Option<unsafe extern "C" fn(handle: NativeHandle, index: u32) -> f32>,
    pub get_parameter_text:
        Option<unsafe extern "C" fn(handle: NativeHandle, index: u32, value: f32) -> *const c_char>,

    pub get_midi_program_count: Option<unsafe extern "C" fn(handle: NativeHandle) -> u32>,
    pub get_midi_program_info:
        Option<unsafe extern "C" fn(handle: NativeHandle, index: u32) -> *const NativeMidiProgram>,

    pub set_parameter_value: Option<unsafe extern "C" fn(handle: NativeHandle, index: u32, value: f32)>,
    pub set_midi_program:
        Option<unsafe extern "C" fn(handle: NativeHandle, channel: u8, bank: u32, program: u32)>,
    pub set_custom_data:
        Option<unsafe extern "C" fn(handle: NativeHandle, key: *const c_char, value: *const c_char)>,

    pub ui_show: Option<unsafe extern "C" fn(handle: NativeHandle, show: bool)>,
    pub ui_idle: Option<unsafe extern "C" fn(handle: NativeHandle)>,
    pub ui_set_parameter_value: Option<unsafe extern "C" fn(handle: NativeHandle, index: u32, value: f32)>,
    pub ui_set_midi_program:
        Option<unsafe extern "C" fn(handle: NativeHandle, channel: u8, bank: u32, program: u32)>,
    pub ui_set_custom_data:
        Option<unsafe extern "C" fn(handle: NativeHandle, key: *const c_char, value: *const c_char)>,

    pub activate: Option<unsafe extern "C" fn(handle: NativeHandle)>,
    pub deactivate: Option<unsafe extern "C" fn(handle: NativeHandle)>,
    pub process: Option<
        unsafe extern "C" fn(
            handle: NativeHandle,
            in_buffers: *const *const f32,
            out_buffers: *const *mut f32,
            frames: u32,
            midi_events: *const NativeMidiEvent,
            midi_event_count: u32,
        ),
    >,

    /// NUL-terminated, owned by the plugin until the next call on `handle`.
    pub get_state: Option<unsafe extern "C" fn(handle: NativeHandle) -> *const c_char>,
    pub set_state: Option<unsafe extern "C" fn(handle: NativeHandle, data: *const c_char)>,

    pub dispatcher: Option<
        unsafe extern "C" fn(
            handle: NativeHandle,
            opcode: i32,
            index: i32,
            value: isize,
            ptr: *mut c_void,
            opt: f32,
        ) -> isize,
    >,
}

// Descriptors are immutable tables of static strings and function pointers.
unsafe impl Send for NativePluginDescriptor {}
unsafe impl Sync for NativePluginDescriptor {}

impl NativePluginDescriptor {
    /// A descriptor with the current API version and every function unset.
    pub const EMPTY: Self = Self {
        api_version: NATIVE_API_VERSION,
        category: PLUGIN_CATEGORY_NONE,
        hints: 0,
        supports: 0,
        audio_ins: 0,
        audio_outs: 0,
        cv_ins: 0,
        cv_outs: 0,
        midi_ins: 0,
        midi_outs: 0,
        name: std::ptr::null(),
        label: std::ptr::null(),
        maker: std::ptr::null(),
        copyright: std::ptr::null(),
        instantiate: None,
        cleanup: None,
        get_parameter_count: None,
        get_parameter_info: None,
        get_parameter_value: None,
        get_parameter_text: None,
        get_midi_program_count: None,
        get_midi_program_info: None,
        set_parameter_value: None,
        set_midi_program: None,
        set_custom_data: None,
        ui_show: None,
        ui_idle: None,
        ui_set_parameter_value: None,
        ui_set_midi_program: None,
        ui_set_custom_data: None,
        activate: None,
        deactivate: None,
        process: None,
        get_state: None,
        set_state: None,
        dispatcher: None,
    };
}

impl std::fmt::Debug for NativePluginDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativePluginDescriptor")
            .field("api_version", &self.api_version)
            .field("category", &self.category)
            .field("hints", &format_args!("{:#x}", self.hints))
            .field("audio_ins", &self.audio_ins)
            .field("audio_outs", &self.audio_outs)
            .field("midi_ins", &self.midi_ins)
            .field("midi_outs", &self.midi_outs)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::{align_of, offset_of, size_of};

    #[test]
    fn test_midi_event_layout() {
        assert_eq!(size_of::<NativeMidiEvent>(), 12);
        assert_eq!(offset_of!(NativeMidiEvent, port), 4);
        assert_eq!(offset_of!(NativeMidiEvent, size), 5);
        assert_eq!(offset_of!(NativeMidiEvent, data), 6);
    }

    #[test]
    fn test_ranges_layout() {
        assert_eq!(size_of::<NativeParameterRanges>(), 24);
        assert_eq!(align_of::<NativeParameterRanges>(), 4);
        assert_eq!(offset_of!(NativeParameter, hints), 0);
    }

    #[test]
    fn test_descriptor_header_layout() {
        assert_eq!(offset_of!(NativePluginDescriptor, api_version), 0);
        assert_eq!(offset_of!(NativePluginDescriptor, midi_outs), 36);
        assert_eq!(offset_of!(NativePluginDescriptor, name), 40);
    }

    #[test]
    fn test_supports_everything_covers_all_bits() {
        for bit in [
            PLUGIN_SUPPORTS_PROGRAM_CHANGES,
            PLUGIN_SUPPORTS_CONTROL_CHANGES,
            PLUGIN_SUPPORTS_CHANNEL_PRESSURE,
            PLUGIN_SUPPORTS_NOTE_AFTERTOUCH,
            PLUGIN_SUPPORTS_PITCHBEND,
            PLUGIN_SUPPORTS_ALL_SOUND_OFF,
        ] {
            assert_eq!(PLUGIN_SUPPORTS_EVERYTHING & bit, bit);
        }
    }
}
