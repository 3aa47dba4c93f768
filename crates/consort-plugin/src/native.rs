//! Adapter for plugins implementing the C ABI in [`crate::abi`].
//!
//! Missing optional functions are repaired with defaults once, at adapter
//! creation, and logged there. Host callbacks reach [`HostCallbacks`] through
//! a boxed context whose address is the plugin's `NativeHostHandle`.

use crate::abi::*;
use crate::adapter::{
    guarded, ControlPortInfo, FormatAdapter, FormatInstance, PluginCategory, PluginInfo, PluginOpcode,
    PluginSupports, PluginType, PortDirection, PortInfo, PortKind, ProcessContext,
};
use crate::host::{HostCallbacks, HostOpcode, TimeInfo};
use crate::midi::{MidiEvent, MidiProgram, MAX_MIDI_EVENTS, MIDI_EVENT_DATA_SIZE};
use crate::parameter::{ParameterHints, ParameterRanges, ScalePoint};
use crate::state::CustomDataType;
use crate::{LoadStage, PluginError, PluginHints, Result};
use parking_lot::Mutex;
use std::cell::UnsafeCell;
use std::collections::BTreeMap;
use std::ffi::{c_char, CStr, CString};
use std::path::PathBuf;
use std::ptr::{self, NonNull};
use std::sync::Arc;

#[cfg(feature = "native-library")]
pub use library::NativeLibrary;

/// A descriptor plus whatever keeps it mapped.
#[derive(Clone)]
struct Descriptor {
    ptr: NonNull<NativePluginDescriptor>,
    #[cfg(feature = "native-library")]
    _library: Option<Arc<NativeLibrary>>,
}

// Descriptors are immutable and outlive every `Descriptor` pointing at them.
unsafe impl Send for Descriptor {}
unsafe impl Sync for Descriptor {}

impl Descriptor {
    fn from_static(descriptor: &'static NativePluginDescriptor) -> Self {
        Self {
            ptr: NonNull::from(descriptor),
            #[cfg(feature = "native-library")]
            _library: None,
        }
    }

    fn get(&self) -> &NativePluginDescriptor {
        unsafe { self.ptr.as_ref() }
    }
}

/// Version and required-function checks. Returns the label.
fn validate(descriptor: &NativePluginDescriptor) -> Result<String> {
    if descriptor.api_version != NATIVE_API_VERSION {
        return Err(PluginError::AbiVersionMismatch {
            host: NATIVE_API_VERSION,
            plugin: descriptor.api_version,
        });
    }
    if descriptor.instantiate.is_none() {
        return Err(PluginError::MissingFunction("instantiate"));
    }
    match unsafe { c_string(descriptor.label) } {
        Some(label) if !label.is_empty() => Ok(label),
        _ => Err(PluginError::MissingFunction("label")),
    }
}

/// Log each optional function the plugin left out and what the host does instead.
fn report_repairs(descriptor: &NativePluginDescriptor, label: &str) {
    let repairs = [
        ("cleanup", descriptor.cleanup.is_some(), "instances are never freed"),
        (
            "get_parameter_count",
            descriptor.get_parameter_count.is_some(),
            "assuming no parameters",
        ),
        (
            "get_parameter_info",
            descriptor.get_parameter_info.is_some(),
            "parameters are treated as broken ports",
        ),
        (
            "get_parameter_value",
            descriptor.get_parameter_value.is_some(),
            "parameter values read as 0",
        ),
        (
            "set_parameter_value",
            descriptor.set_parameter_value.is_some(),
            "parameter changes are ignored",
        ),
        (
            "get_midi_program_count",
            descriptor.get_midi_program_count.is_some(),
            "assuming no MIDI programs",
        ),
        ("process", descriptor.process.is_some(), "output will be silence"),
    ];
    for (function, present, effect) in repairs {
        if !present {
            tracing::warn!("Native plugin '{}' has no `{}`, {}", label, function, effect);
        }
    }
}

fn category_from(category: u32) -> PluginCategory {
    match category {
        PLUGIN_CATEGORY_SYNTH => PluginCategory::Synth,
        PLUGIN_CATEGORY_DELAY => PluginCategory::Delay,
        PLUGIN_CATEGORY_EQ => PluginCategory::Eq,
        PLUGIN_CATEGORY_FILTER => PluginCategory::Filter,
        PLUGIN_CATEGORY_DISTORTION => PluginCategory::Distortion,
        PLUGIN_CATEGORY_DYNAMICS => PluginCategory::Dynamics,
        PLUGIN_CATEGORY_MODULATOR => PluginCategory::Modulator,
        PLUGIN_CATEGORY_UTILITY => PluginCategory::Utility,
        PLUGIN_CATEGORY_OTHER => PluginCategory::Other,
        _ => PluginCategory::None,
    }
}

fn plugin_hints_from(hints: u32) -> PluginHints {
    let mut out = PluginHints::empty();
    out.set(PluginHints::IS_RTSAFE, hints & PLUGIN_IS_RTSAFE != 0);
    out.set(PluginHints::IS_SYNTH, hints & PLUGIN_IS_SYNTH != 0);
    out.set(PluginHints::HAS_CUSTOM_UI, hints & PLUGIN_HAS_GUI != 0);
    out.set(PluginHints::NEEDS_FIXED_BUFFERS, hints & PLUGIN_NEEDS_FIXED_BUFFERS != 0);
    out.set(PluginHints::USES_TIME, hints & PLUGIN_USES_TIME != 0);
    out.set(PluginHints::USES_CHUNKS, hints & PLUGIN_USES_STATE != 0);
    out
}

fn parameter_hints_from(hints: u32) -> ParameterHints {
    let mut out = ParameterHints::empty();
    let table = [
        (PARAMETER_IS_OUTPUT, ParameterHints::OUTPUT),
        (PARAMETER_IS_ENABLED, ParameterHints::ENABLED),
        (PARAMETER_IS_AUTOMABLE, ParameterHints::AUTOMABLE),
        (PARAMETER_IS_BOOLEAN, ParameterHints::BOOLEAN),
        (PARAMETER_IS_INTEGER, ParameterHints::INTEGER),
        (PARAMETER_IS_LOGARITHMIC, ParameterHints::LOGARITHMIC),
        (PARAMETER_USES_SAMPLE_RATE, ParameterHints::USES_SAMPLERATE),
        (PARAMETER_USES_SCALEPOINTS, ParameterHints::USES_SCALEPOINTS),
    ];
    for (bit, hint) in table {
        out.set(hint, hints & bit != 0);
    }
    out
}

fn plugin_opcode(opcode: PluginOpcode) -> i32 {
    match opcode {
        PluginOpcode::BufferSizeChanged => PLUGIN_OPCODE_BUFFER_SIZE_CHANGED,
        PluginOpcode::SampleRateChanged => PLUGIN_OPCODE_SAMPLE_RATE_CHANGED,
        PluginOpcode::OfflineChanged => PLUGIN_OPCODE_OFFLINE_CHANGED,
        PluginOpcode::UiNameChanged => PLUGIN_OPCODE_UI_NAME_CHANGED,
        PluginOpcode::TransportRelocated => PLUGIN_OPCODE_TRANSPORT_RELOCATED,
        PluginOpcode::Idle => PLUGIN_OPCODE_IDLE,
    }
}

fn host_opcode(opcode: i32) -> Option<HostOpcode> {
    Some(match opcode {
        HOST_OPCODE_NULL => HostOpcode::Null,
        HOST_OPCODE_SET_VOLUME => HostOpcode::SetVolume,
        HOST_OPCODE_SET_DRYWET => HostOpcode::SetDryWet,
        HOST_OPCODE_SET_BALANCE_LEFT => HostOpcode::SetBalanceLeft,
        HOST_OPCODE_SET_BALANCE_RIGHT => HostOpcode::SetBalanceRight,
        HOST_OPCODE_SET_PANNING => HostOpcode::SetPanning,
        HOST_OPCODE_SET_PROCESS_PRECISION => HostOpcode::SetProcessPrecision,
        HOST_OPCODE_UPDATE_PARAMETER => HostOpcode::UpdateParameter,
        HOST_OPCODE_UPDATE_MIDI_PROGRAM => HostOpcode::UpdateMidiProgram,
        HOST_OPCODE_RELOAD_PARAMETERS => HostOpcode::ReloadParameters,
        HOST_OPCODE_RELOAD_MIDI_PROGRAMS => HostOpcode::ReloadMidiPrograms,
        HOST_OPCODE_RELOAD_ALL => HostOpcode::ReloadAll,
        HOST_OPCODE_UI_UNAVAILABLE => HostOpcode::UiUnavailable,
        HOST_OPCODE_HOST_IDLE => HostOpcode::HostIdle,
        HOST_OPCODE_REQUEST_IDLE => HostOpcode::RequestIdle,
        _ => return None,
    })
}

fn native_time_info(info: &TimeInfo) -> NativeTimeInfo {
    NativeTimeInfo {
        playing: info.playing,
        frame: info.frame,
        usecs: info.usecs,
        bbt: NativeTimeInfoBbt {
            valid: info.bbt.valid,
            bar: info.bbt.bar,
            beat: info.bbt.beat,
            tick: info.bbt.tick,
            bar_start_tick: info.bbt.bar_start_tick,
            beats_per_bar: info.bbt.beats_per_bar,
            beat_type: info.bbt.beat_type,
            ticks_per_beat: info.bbt.ticks_per_beat,
            beats_per_minute: info.bbt.beats_per_minute,
        },
    }
}

fn native_midi_event(event: &MidiEvent) -> NativeMidiEvent {
    NativeMidiEvent {
        time: event.time,
        port: event.port,
        size: event.size,
        data: event.data,
    }
}

/// Copy a plugin-owned C string. Null gives `None`.
///
/// # Safety
/// `ptr` must be null or point at a NUL-terminated string.
unsafe fn c_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        None
    } else {
        Some(CStr::from_ptr(ptr).to_string_lossy().into_owned())
    }
}

/// One plugin class from a native descriptor.
pub struct NativeAdapter {
    descriptor: Descriptor,
    info: PluginInfo,
    ui_binary: Option<PathBuf>,
}

impl NativeAdapter {
    pub fn new(descriptor: &'static NativePluginDescriptor) -> Result<Self> {
        Self::from_descriptor(Descriptor::from_static(descriptor))
    }

    fn from_descriptor(descriptor: Descriptor) -> Result<Self> {
        let d = descriptor.get();
        let label = validate(d)?;
        report_repairs(d, &label);

        let (name, maker, copyright) = unsafe { (c_string(d.name), c_string(d.maker), c_string(d.copyright)) };
        let info = PluginInfo::new(name.filter(|n| !n.is_empty()).unwrap_or_else(|| label.clone()), label)
            .maker(maker.unwrap_or_default())
            .copyright(copyright.unwrap_or_default())
            .category(category_from(d.category))
            .hints(plugin_hints_from(d.hints))
            .supports(PluginSupports::from_bits(d.supports & PLUGIN_SUPPORTS_EVERYTHING));

        Ok(Self {
            descriptor,
            info,
            ui_binary: None,
        })
    }

    pub fn with_ui_bridge(mut self, binary: impl Into<PathBuf>) -> Self {
        self.ui_binary = Some(binary.into());
        self.info.hints.insert(PluginHints::HAS_UI_BRIDGE);
        self
    }

    pub fn descriptor(&self) -> &NativePluginDescriptor {
        self.descriptor.get()
    }
}

impl FormatAdapter for NativeAdapter {
    fn plugin_type(&self) -> PluginType {
        PluginType::Native
    }

    fn info(&self) -> &PluginInfo {
        &self.info
    }

    fn instantiate(&self, host: Arc<dyn HostCallbacks>) -> Result<Box<dyn FormatInstance>> {
        let d = self.descriptor.get();
        let instantiate = d.instantiate.ok_or(PluginError::MissingFunction("instantiate"))?;
        let context = HostContext::new(host, &self.info.name);

        let host_descriptor: *const NativeHostDescriptor = &context.descriptor;
        let handle = guarded("instantiate", || unsafe { instantiate(host_descriptor) })?;
        if handle.is_null() {
            return Err(PluginError::LoadFailed {
                path: PathBuf::from(&self.info.label),
                stage: LoadStage::Instantiation,
                reason: "instantiate returned null".to_string(),
            });
        }

        Ok(Box::new(NativeInstance {
            descriptor: self.descriptor.clone(),
            handle,
            context,
            in_ptrs: Vec::with_capacity((d.audio_ins + d.cv_ins) as usize * 2),
            out_ptrs: Vec::with_capacity((d.audio_outs + d.cv_outs) as usize * 2),
            midi: Vec::with_capacity(MAX_MIDI_EVENTS),
        }))
    }

    fn ui_bridge_binary(&self) -> Option<PathBuf> {
        self.ui_binary.clone()
    }
}

/// The host side of one native instance. Boxed so its address stays fixed.
struct HostContext {
    callbacks: Arc<dyn HostCallbacks>,
    descriptor: NativeHostDescriptor,
    /// Written by `process` before each call; read back through `get_time_info`.
    time_info: UnsafeCell<NativeTimeInfo>,
    dialog_result: Mutex<Option<CString>>,
    name: String,
    _ui_name: CString,
}

impl HostContext {
    fn new(callbacks: Arc<dyn HostCallbacks>, name: &str) -> Box<Self> {
        let ui_name = CString::new(name.replace('\0', "")).unwrap_or_default();
        let mut context = Box::new(Self {
            callbacks,
            descriptor: NativeHostDescriptor {
                handle: ptr::null_mut(),
                resource_dir: ptr::null(),
                ui_name: ui_name.as_ptr(),
                get_buffer_size: Some(host_get_buffer_size),
                get_sample_rate: Some(host_get_sample_rate),
                is_offline: Some(host_is_offline),
                get_time_info: Some(host_get_time_info),
                write_midi_event: Some(host_write_midi_event),
                ui_parameter_changed: Some(host_ui_parameter_changed),
                ui_midi_program_changed: Some(host_ui_midi_program_changed),
                ui_custom_data_changed: Some(host_ui_custom_data_changed),
                ui_closed: Some(host_ui_closed),
                ui_open_file: Some(host_ui_open_file),
                ui_save_file: Some(host_ui_save_file),
                dispatcher: Some(host_dispatcher),
            },
            time_info: UnsafeCell::new(NativeTimeInfo::default()),
            dialog_result: Mutex::new(None),
            name: name.to_string(),
            _ui_name: ui_name,
        });
        let handle: *mut HostContext = &mut *context;
        context.descriptor.handle = handle.cast();
        context
    }

    fn store_dialog_result(&self, path: Option<PathBuf>) -> *const c_char {
        let mut result = self.dialog_result.lock();
        *result = path.and_then(|path| CString::new(path.to_string_lossy().into_owned()).ok());
        result.as_ref().map_or(ptr::null(), |path| path.as_ptr())
    }
}

/// Run `f` on the context behind `handle`, falling back to `default` for a
/// null handle or a panicking callback.
unsafe fn with_context<R>(
    handle: NativeHostHandle,
    call: &'static str,
    default: R,
    f: impl FnOnce(&HostContext) -> R,
) -> R {
    match (handle as *const HostContext).as_ref() {
        Some(context) => guarded(call, || f(context)).unwrap_or(default),
        None => default,
    }
}

unsafe extern "C" fn host_get_buffer_size(handle: NativeHostHandle) -> u32 {
    with_context(handle, "get_buffer_size", 0, |ctx| ctx.callbacks.buffer_size())
}

unsafe extern "C" fn host_get_sample_rate(handle: NativeHostHandle) -> f64 {
    with_context(handle, "get_sample_rate", 0.0, |ctx| ctx.callbacks.sample_rate())
}

unsafe extern "C" fn host_is_offline(handle: NativeHostHandle) -> bool {
    with_context(handle, "is_offline", false, |ctx| ctx.callbacks.is_offline())
}

unsafe extern "C" fn host_get_time_info(handle: NativeHostHandle) -> *const NativeTimeInfo {
    with_context(handle, "get_time_info", ptr::null(), |ctx| ctx.time_info.get() as *const _)
}

unsafe extern "C" fn host_write_midi_event(handle: NativeHostHandle, event: *const NativeMidiEvent) -> bool {
    let Some(event) = event.as_ref() else {
        return false;
    };
    let event = MidiEvent {
        port: event.port,
        time: event.time,
        size: event.size.min(MIDI_EVENT_DATA_SIZE as u8),
        data: event.data,
    };
    if event.size == 0 {
        return false;
    }
    with_context(handle, "write_midi_event", false, |ctx| {
        ctx.callbacks.write_midi_event(&event)
    })
}

unsafe extern "C" fn host_ui_parameter_changed(handle: NativeHostHandle, index: u32, value: f32) {
    with_context(handle, "ui_parameter_changed", (), |ctx| {
        ctx.callbacks.ui_parameter_changed(index, value)
    })
}

unsafe extern "C" fn host_ui_midi_program_changed(handle: NativeHostHandle, channel: u8, bank: u32, program: u32) {
    with_context(handle, "ui_midi_program_changed", (), |ctx| {
        ctx.callbacks.ui_midi_program_changed(channel, bank, program)
    })
}

unsafe extern "C" fn host_ui_custom_data_changed(
    handle: NativeHostHandle,
    key: *const c_char,
    value: *const c_char,
) {
    let (Some(key), Some(value)) = (c_string(key), c_string(value)) else {
        tracing::warn!("Native plugin UI sent custom data with a null key or value");
        return;
    };
    with_context(handle, "ui_custom_data_changed", (), |ctx| {
        ctx.callbacks.ui_custom_data_changed(&key, &value)
    })
}

unsafe extern "C" fn host_ui_closed(handle: NativeHostHandle) {
    with_context(handle, "ui_closed", (), |ctx| ctx.callbacks.ui_closed())
}

unsafe extern "C" fn host_ui_open_file(
    handle: NativeHostHandle,
    is_dir: bool,
    title: *const c_char,
    filter: *const c_char,
) -> *const c_char {
    let title = c_string(title).unwrap_or_default();
    let filter = c_string(filter).unwrap_or_default();
    with_context(handle, "ui_open_file", ptr::null(), |ctx| {
        ctx.store_dialog_result(ctx.callbacks.ui_open_file(is_dir, &title, &filter))
    })
}

unsafe extern "C" fn host_ui_save_file(
    handle: NativeHostHandle,
    is_dir: bool,
    title: *const c_char,
    filter: *const c_char,
) -> *const c_char {
    let title = c_string(title).unwrap_or_default();
    let filter = c_string(filter).unwrap_or_default();
    with_context(handle, "ui_save_file", ptr::null(), |ctx| {
        ctx.store_dialog_result(ctx.callbacks.ui_save_file(is_dir, &title, &filter))
    })
}

unsafe extern "C" fn host_dispatcher(
    handle: NativeHostHandle,
    opcode: i32,
    index: i32,
    value: isize,
    _ptr: *mut std::ffi::c_void,
    opt: f32,
) -> isize {
    let Some(opcode) = host_opcode(opcode) else {
        return 0;
    };
    with_context(handle, "dispatcher", 0, |ctx| {
        ctx.callbacks.dispatcher(opcode, index, value, opt)
    })
}

/// One native plugin handle.
struct NativeInstance {
    descriptor: Descriptor,
    handle: NativeHandle,
    context: Box<HostContext>,
    in_ptrs: Vec<*const f32>,
    out_ptrs: Vec<*mut f32>,
    midi: Vec<NativeMidiEvent>,
}

// The handle and pointer scratch are only touched by whoever holds the
// instance, which the host serializes behind its locks.
unsafe impl Send for NativeInstance {}

impl NativeInstance {
    fn d(&self) -> &NativePluginDescriptor {
        self.descriptor.get()
    }

    fn parameter_count(&self) -> u32 {
        let handle = self.handle;
        self.d()
            .get_parameter_count
            .and_then(|f| guarded("get_parameter_count", || unsafe { f(handle) }).ok())
            .unwrap_or(0)
    }

    fn parameter_port(&self, index: u32) -> PortInfo {
        let handle = self.handle;
        let info = self
            .d()
            .get_parameter_info
            .and_then(|f| guarded("get_parameter_info", || unsafe { f(handle, index) }).ok())
            .and_then(|info| unsafe { info.as_ref() });

        let Some(info) = info else {
            tracing::warn!("Native plugin '{}': no info for parameter {}", self.context.name, index);
            return PortInfo {
                control: Some(ControlPortInfo::new(0.0, 1.0, 0.0)),
                ..PortInfo::new(
                    index,
                    format!("Parameter {}", index + 1),
                    PortKind::Control,
                    PortDirection::Unknown,
                )
            };
        };

        let name = unsafe { c_string(info.name) }.unwrap_or_else(|| format!("Parameter {}", index + 1));
        let unit = unsafe { c_string(info.unit) }.filter(|unit| !unit.is_empty());
        let r = info.ranges;
        let control = ControlPortInfo {
            hints: parameter_hints_from(info.hints),
            ranges: ParameterRanges {
                def: r.def,
                min: r.min,
                max: r.max,
                step: r.step,
                step_small: r.step_small,
                step_large: r.step_large,
            },
            unit,
            scale_points: unsafe { scale_points(info) },
        };

        if info.hints & PARAMETER_IS_OUTPUT != 0 {
            PortInfo::control_out(index, name, control)
        } else {
            PortInfo::control_in(index, name, control)
        }
    }
}

/// # Safety
/// `info.scale_points` must be null or point at `scale_point_count` entries.
unsafe fn scale_points(info: &NativeParameter) -> Vec<ScalePoint> {
    if info.scale_points.is_null() || info.scale_point_count == 0 {
        return Vec::new();
    }
    std::slice::from_raw_parts(info.scale_points, info.scale_point_count as usize)
        .iter()
        .map(|point| ScalePoint {
            value: point.value,
            label: c_string(point.label).unwrap_or_default(),
        })
        .collect()
}

/// Owned copies for passing strings into the plugin. `None` on interior NUL.
fn c_pair(key: &str, value: &str) -> Option<(CString, CString)> {
    Some((CString::new(key).ok()?, CString::new(value).ok()?))
}

impl FormatInstance for NativeInstance {
    fn ports(&self) -> Vec<PortInfo> {
        let d = self.d();
        let mut ports = Vec::new();
        for i in 0..d.audio_ins {
            ports.push(PortInfo::audio_in(i, format!("input_{}", i + 1)));
        }
        for i in 0..d.audio_outs {
            ports.push(PortInfo::audio_out(i, format!("output_{}", i + 1)));
        }
        for i in 0..d.cv_ins {
            ports.push(PortInfo::new(i, format!("cv_input_{}", i + 1), PortKind::Cv, PortDirection::Input));
        }
        for i in 0..d.cv_outs {
            ports.push(PortInfo::new(i, format!("cv_output_{}", i + 1), PortKind::Cv, PortDirection::Output));
        }
        for i in 0..d.midi_ins {
            ports.push(PortInfo::midi_in(i, format!("midi_in_{}", i + 1)));
        }
        for i in 0..d.midi_outs {
            ports.push(PortInfo::midi_out(i, format!("midi_out_{}", i + 1)));
        }
        for index in 0..self.parameter_count() {
            ports.push(self.parameter_port(index));
        }
        ports
    }

    fn parameter_value(&self, rindex: u32) -> f32 {
        match self.d().get_parameter_value {
            Some(f) => unsafe { f(self.handle, rindex) },
            None => 0.0,
        }
    }

    fn set_parameter_value(&mut self, rindex: u32, value: f32) {
        if let Some(f) = self.d().set_parameter_value {
            unsafe { f(self.handle, rindex, value) };
        }
    }

    fn parameter_text(&self, rindex: u32, value: f32) -> Option<String> {
        let f = self.d().get_parameter_text?;
        unsafe { c_string(f(self.handle, rindex, value)) }
    }

    fn midi_programs(&self) -> Vec<MidiProgram> {
        let d = self.d();
        let (Some(count), Some(info)) = (d.get_midi_program_count, d.get_midi_program_info) else {
            return Vec::new();
        };
        let count = unsafe { count(self.handle) };
        (0..count)
            .filter_map(|index| {
                let program = unsafe { info(self.handle, index).as_ref() }?;
                let name = unsafe { c_string(program.name) }.unwrap_or_default();
                Some(MidiProgram::new(program.bank, program.program, name))
            })
            .collect()
    }

    fn select_midi_program(&mut self, channel: u8, bank: u32, program: u32) {
        if let Some(f) = self.d().set_midi_program {
            unsafe { f(self.handle, channel, bank, program) };
        }
    }

    fn set_custom_data(&mut self, kind: CustomDataType, key: &str, value: &str) {
        if kind != CustomDataType::String {
            return;
        }
        let Some(f) = self.d().set_custom_data else {
            return;
        };
        match c_pair(key, value) {
            Some((key, value)) => unsafe { f(self.handle, key.as_ptr(), value.as_ptr()) },
            None => tracing::warn!("Custom data '{}' contains a NUL byte, not sent", key),
        }
    }

    fn activate(&mut self) {
        if let Some(f) = self.d().activate {
            unsafe { f(self.handle) };
        }
    }

    fn deactivate(&mut self) {
        if let Some(f) = self.d().deactivate {
            unsafe { f(self.handle) };
        }
    }

    fn process(&mut self, inputs: &[&[f32]], outputs: &mut [&mut [f32]], ctx: &ProcessContext) {
        let Some(process) = self.d().process else {
            for out in outputs.iter_mut() {
                out[..ctx.frames].fill(0.0);
            }
            return;
        };

        self.in_ptrs.clear();
        self.in_ptrs.extend(inputs.iter().map(|buf| buf.as_ptr()));
        self.out_ptrs.clear();
        self.out_ptrs.extend(outputs.iter_mut().map(|buf| buf.as_mut_ptr()));
        self.midi.clear();
        self.midi.extend(ctx.midi_events.iter().map(native_midi_event));

        if let Some(info) = ctx.time_info {
            unsafe { *self.context.time_info.get() = native_time_info(info) };
        }

        unsafe {
            process(
                self.handle,
                self.in_ptrs.as_ptr(),
                self.out_ptrs.as_ptr(),
                ctx.frames as u32,
                self.midi.as_ptr(),
                self.midi.len() as u32,
            )
        };
    }

    fn get_state(&mut self) -> Option<Vec<u8>> {
        let f = self.d().get_state?;
        let data = unsafe { f(self.handle) };
        if data.is_null() {
            return None;
        }
        Some(unsafe { CStr::from_ptr(data) }.to_bytes().to_vec())
    }

    fn set_state(&mut self, data: &[u8]) -> bool {
        let Some(f) = self.d().set_state else {
            return false;
        };
        let Ok(data) = CString::new(data) else {
            tracing::warn!("Native state contains a NUL byte, not restored");
            return false;
        };
        unsafe { f(self.handle, data.as_ptr()) };
        true
    }

    fn dispatcher(&mut self, opcode: PluginOpcode, index: i32, value: isize, opt: f32) -> isize {
        match self.d().dispatcher {
            Some(f) => unsafe { f(self.handle, plugin_opcode(opcode), index, value, ptr::null_mut(), opt) },
            None => 0,
        }
    }

    fn ui_show(&mut self, show: bool) {
        if let Some(f) = self.d().ui_show {
            unsafe { f(self.handle, show) };
        }
    }

    fn ui_idle(&mut self) {
        if let Some(f) = self.d().ui_idle {
            unsafe { f(self.handle) };
        }
    }

    fn ui_set_parameter_value(&mut self, rindex: u32, value: f32) {
        if let Some(f) = self.d().ui_set_parameter_value {
            unsafe { f(self.handle, rindex, value) };
        }
    }

    fn ui_set_midi_program(&mut self, channel: u8, bank: u32, program: u32) {
        if let Some(f) = self.d().ui_set_midi_program {
            unsafe { f(self.handle, channel, bank, program) };
        }
    }

    fn ui_set_custom_data(&mut self, key: &str, value: &str) {
        let Some(f) = self.d().ui_set_custom_data else {
            return;
        };
        if let Some((key, value)) = c_pair(key, value) {
            unsafe { f(self.handle, key.as_ptr(), value.as_ptr()) };
        }
    }
}

impl Drop for NativeInstance {
    fn drop(&mut self) {
        if let Some(cleanup) = self.d().cleanup {
            let handle = self.handle;
            if guarded("cleanup", || unsafe { cleanup(handle) }).is_err() {
                tracing::error!("Native plugin cleanup panicked");
            }
        }
    }
}

/// Label-keyed cache of native descriptors.
///
/// Nothing is global: a host keeps one registry per scan and drops or
/// [`clear`](Self::clear)s it to invalidate.
#[derive(Default)]
pub struct NativeRegistry {
    entries: BTreeMap<String, Descriptor>,
}

impl NativeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a static descriptor. Returns its label.
    pub fn register(&mut self, descriptor: &'static NativePluginDescriptor) -> Result<String> {
        self.insert(Descriptor::from_static(descriptor))
    }

    fn insert(&mut self, descriptor: Descriptor) -> Result<String> {
        let label = validate(descriptor.get())?;
        if self.entries.insert(label.clone(), descriptor).is_some() {
            tracing::warn!("Native plugin '{}' registered twice, keeping the newest", label);
        }
        Ok(label)
    }

    /// Register every valid descriptor a library exports. Invalid ones are
    /// logged and skipped.
    #[cfg(feature = "native-library")]
    pub fn register_library(&mut self, library: &Arc<NativeLibrary>) -> Vec<String> {
        let mut labels = Vec::new();
        for descriptor in library.descriptor_refs() {
            match self.insert(descriptor) {
                Ok(label) => labels.push(label),
                Err(err) => tracing::warn!("Skipping plugin in {}: {}", library.path().display(), err),
            }
        }
        labels
    }

    pub fn find(&self, label: &str) -> Result<NativeAdapter> {
        let descriptor = self
            .entries
            .get(label)
            .cloned()
            .ok_or_else(|| PluginError::UnknownLabel(label.to_string()))?;
        NativeAdapter::from_descriptor(descriptor)
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(feature = "native-library")]
mod library {
    use super::Descriptor;
    use crate::abi::{NativeEntryFn, NativePluginDescriptor, NATIVE_ENTRY_SYMBOL};
    use crate::{LoadStage, PluginError, Result};
    use std::path::{Path, PathBuf};
    use std::ptr::NonNull;
    use std::sync::Arc;

    /// A shared object exporting `consort_native_plugin_descriptors`.
    ///
    /// Adapters created from it hold an `Arc` to it, so it stays mapped while
    /// any of them is alive.
    pub struct NativeLibrary {
        path: PathBuf,
        descriptors: Vec<NonNull<NativePluginDescriptor>>,
        _library: libloading::Library,
    }

    // The descriptor table is immutable for the lifetime of the library.
    unsafe impl Send for NativeLibrary {}
    unsafe impl Sync for NativeLibrary {}

    impl NativeLibrary {
        pub fn open(path: impl AsRef<Path>) -> Result<Arc<Self>> {
            let path = path.as_ref();
            let load_failed = |stage, reason: String| PluginError::LoadFailed {
                path: path.to_path_buf(),
                stage,
                reason,
            };

            let library = unsafe { libloading::Library::new(path) }
                .map_err(|e| load_failed(LoadStage::Opening, format!("Failed to load library: {}", e)))?;
            let entry: NativeEntryFn = unsafe {
                *library.get::<NativeEntryFn>(NATIVE_ENTRY_SYMBOL).map_err(|e| {
                    load_failed(
                        LoadStage::Descriptor,
                        format!("No consort_native_plugin_descriptors symbol: {}", e),
                    )
                })?
            };

            let mut count = 0u32;
            let list = unsafe { entry(&mut count) };
            if list.is_null() && count > 0 {
                return Err(load_failed(
                    LoadStage::Descriptor,
                    "descriptor list is null".to_string(),
                ));
            }
            let descriptors = (0..count as usize)
                .filter_map(|i| NonNull::new(unsafe { *list.add(i) } as *mut NativePluginDescriptor))
                .collect::<Vec<_>>();

            tracing::info!(
                "Opened native library {} with {} plugin(s)",
                path.display(),
                descriptors.len()
            );

            Ok(Arc::new(Self {
                path: path.to_path_buf(),
                descriptors,
                _library: library,
            }))
        }

        pub fn path(&self) -> &Path {
            &self.path
        }

        pub fn len(&self) -> usize {
            self.descriptors.len()
        }

        pub fn is_empty(&self) -> bool {
            self.descriptors.is_empty()
        }

        pub(super) fn descriptor_refs(self: &Arc<Self>) -> Vec<Descriptor> {
            self.descriptors
                .iter()
                .map(|ptr| Descriptor {
                    ptr: *ptr,
                    _library: Some(self.clone()),
                })
                .collect()
        }

        /// Adapter for the `index`-th exported plugin.
        pub fn adapter(self: &Arc<Self>, index: usize) -> Result<super::NativeAdapter> {
            let ptr = *self.descriptors.get(index).ok_or(PluginError::OutOfRange {
                what: "native library plugins",
                index,
                count: self.descriptors.len(),
            })?;
            super::NativeAdapter::from_descriptor(Descriptor {
                ptr,
                _library: Some(self.clone()),
            })
        }
    }
}
