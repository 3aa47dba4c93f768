//! Format adapter contract.
//!
//! Each plugin format provides a [`FormatAdapter`] (one per plugin class) that
//! creates [`FormatInstance`]s (one per running handle). The host builds its
//! parameter and port model from [`PortInfo`] and never sees format details.

use crate::host::{HostCallbacks, TimeInfo};
use crate::midi::{MidiEvent, MidiProgram};
use crate::parameter::{ParameterHints, ParameterRanges, ScalePoint};
use crate::state::CustomDataType;
use crate::{PluginError, PluginHints, Result};
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PluginType {
    Internal,
    Native,
    Ladspa,
    Dssi,
    Lv2,
    Vst2,
    Vst3,
    Clap,
}

impl std::fmt::Display for PluginType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PluginType::Internal => "Internal",
            PluginType::Native => "Native",
            PluginType::Ladspa => "LADSPA",
            PluginType::Dssi => "DSSI",
            PluginType::Lv2 => "LV2",
            PluginType::Vst2 => "VST2",
            PluginType::Vst3 => "VST3",
            PluginType::Clap => "CLAP",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PluginCategory {
    #[default]
    None,
    Synth,
    Delay,
    Eq,
    Filter,
    Distortion,
    Dynamics,
    Modulator,
    Utility,
    Other,
}

bitmask! {
    /// MIDI message kinds a plugin understands.
    pub struct PluginSupports {
        const PROGRAM_CHANGES = 0x01;
        const CONTROL_CHANGES = 0x02;
        const CHANNEL_PRESSURE = 0x04;
        const NOTE_AFTERTOUCH = 0x08;
        const PITCHBEND = 0x10;
        const ALL_SOUND_OFF = 0x20;
    }
}

/// Static description of a plugin class.
#[derive(Debug, Clone, PartialEq)]
pub struct PluginInfo {
    pub name: String,
    pub label: String,
    pub maker: String,
    pub copyright: String,
    pub category: PluginCategory,
    /// Hints the plugin declares itself; `CAN_*` hints are derived at reload.
    pub hints: PluginHints,
    pub supports: PluginSupports,
}

impl PluginInfo {
    pub fn new(name: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            label: label.into(),
            maker: String::new(),
            copyright: String::new(),
            category: PluginCategory::None,
            hints: PluginHints::empty(),
            supports: PluginSupports::empty(),
        }
    }

    pub fn maker(mut self, maker: impl Into<String>) -> Self {
        self.maker = maker.into();
        self
    }

    pub fn copyright(mut self, copyright: impl Into<String>) -> Self {
        self.copyright = copyright.into();
        self
    }

    pub fn category(mut self, category: PluginCategory) -> Self {
        self.category = category;
        self
    }

    pub fn hints(mut self, hints: PluginHints) -> Self {
        self.hints = hints;
        self
    }

    pub fn supports(mut self, supports: PluginSupports) -> Self {
        self.supports = supports;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortKind {
    Audio,
    Cv,
    Control,
    Midi,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortDirection {
    Input,
    Output,
    Unknown,
}

/// Control-port metadata as the plugin reports it, before host repair.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlPortInfo {
    pub hints: ParameterHints,
    pub ranges: ParameterRanges,
    pub unit: Option<String>,
    pub scale_points: Vec<ScalePoint>,
}

impl ControlPortInfo {
    pub fn new(min: f32, max: f32, def: f32) -> Self {
        Self {
            hints: ParameterHints::ENABLED | ParameterHints::AUTOMABLE,
            ranges: ParameterRanges {
                def,
                min,
                max,
                ..ParameterRanges::default()
            },
            unit: None,
            scale_points: Vec::new(),
        }
    }

    pub fn hints(mut self, hints: ParameterHints) -> Self {
        self.hints = hints;
        self
    }

    pub fn unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    pub fn scale_point(mut self, value: f32, label: impl Into<String>) -> Self {
        self.scale_points.push(ScalePoint {
            value,
            label: label.into(),
        });
        self.hints.insert(ParameterHints::USES_SCALEPOINTS);
        self
    }
}

/// One native port. `index` is the plugin's own index and becomes `rindex`.
#[derive(Debug, Clone, PartialEq)]
pub struct PortInfo {
    pub index: u32,
    pub name: String,
    pub kind: PortKind,
    pub direction: PortDirection,
    pub control: Option<ControlPortInfo>,
}

impl PortInfo {
    pub fn new(index: u32, name: impl Into<String>, kind: PortKind, direction: PortDirection) -> Self {
        Self {
            index,
            name: name.into(),
            kind,
            direction,
            control: None,
        }
    }

    pub fn audio_in(index: u32, name: impl Into<String>) -> Self {
        Self::new(index, name, PortKind::Audio, PortDirection::Input)
    }

    pub fn audio_out(index: u32, name: impl Into<String>) -> Self {
        Self::new(index, name, PortKind::Audio, PortDirection::Output)
    }

    pub fn midi_in(index: u32, name: impl Into<String>) -> Self {
        Self::new(index, name, PortKind::Midi, PortDirection::Input)
    }

    pub fn midi_out(index: u32, name: impl Into<String>) -> Self {
        Self::new(index, name, PortKind::Midi, PortDirection::Output)
    }

    pub fn control_in(index: u32, name: impl Into<String>, control: ControlPortInfo) -> Self {
        Self {
            control: Some(control),
            ..Self::new(index, name, PortKind::Control, PortDirection::Input)
        }
    }

    pub fn control_out(index: u32, name: impl Into<String>, control: ControlPortInfo) -> Self {
        Self {
            control: Some(control),
            ..Self::new(index, name, PortKind::Control, PortDirection::Output)
        }
    }
}

/// Host-to-plugin notifications that do not warrant a dedicated call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PluginOpcode {
    BufferSizeChanged,
    SampleRateChanged,
    OfflineChanged,
    UiNameChanged,
    TransportRelocated,
    Idle,
}

#[derive(Default)]
pub struct ProcessContext<'a> {
    pub frames: usize,
    pub midi_events: &'a [MidiEvent],
    pub time_info: Option<&'a TimeInfo>,
}

impl<'a> ProcessContext<'a> {
    pub fn new(frames: usize) -> Self {
        Self {
            frames,
            ..Self::default()
        }
    }

    pub fn midi(mut self, events: &'a [MidiEvent]) -> Self {
        self.midi_events = events;
        self
    }

    pub fn time_info(mut self, info: &'a TimeInfo) -> Self {
        self.time_info = Some(info);
        self
    }
}

/// One running plugin handle.
///
/// Audio slices passed to `process` are exactly `ctx.frames` long and match
/// the native audio port counts. Output MIDI goes through
/// [`HostCallbacks::write_midi_event`].
pub trait FormatInstance: Send {
    fn ports(&self) -> Vec<PortInfo>;

    fn parameter_value(&self, rindex: u32) -> f32;

    fn set_parameter_value(&mut self, rindex: u32, value: f32);

    fn parameter_text(&self, _rindex: u32, _value: f32) -> Option<String> {
        None
    }

    fn programs(&self) -> Vec<String> {
        Vec::new()
    }

    fn select_program(&mut self, _index: usize) {}

    fn midi_programs(&self) -> Vec<MidiProgram> {
        Vec::new()
    }

    fn select_midi_program(&mut self, _channel: u8, _bank: u32, _program: u32) {}

    fn set_custom_data(&mut self, _kind: CustomDataType, _key: &str, _value: &str) {}

    fn activate(&mut self) {}

    fn deactivate(&mut self) {}

    fn process(&mut self, inputs: &[&[f32]], outputs: &mut [&mut [f32]], ctx: &ProcessContext);

    /// Opaque chunk, `None` if the plugin has no chunk state.
    fn get_state(&mut self) -> Option<Vec<u8>> {
        None
    }

    fn set_state(&mut self, _data: &[u8]) -> bool {
        false
    }

    fn dispatcher(&mut self, _opcode: PluginOpcode, _index: i32, _value: isize, _opt: f32) -> isize {
        0
    }

    fn ui_show(&mut self, _show: bool) {}

    fn ui_idle(&mut self) {}

    fn ui_set_parameter_value(&mut self, _rindex: u32, _value: f32) {}

    fn ui_set_midi_program(&mut self, _channel: u8, _bank: u32, _program: u32) {}

    fn ui_set_custom_data(&mut self, _key: &str, _value: &str) {}
}

/// A plugin class. Shared between every instance of it.
pub trait FormatAdapter: Send + Sync {
    fn plugin_type(&self) -> PluginType;

    fn info(&self) -> &PluginInfo;

    fn instantiate(&self, host: Arc<dyn HostCallbacks>) -> Result<Box<dyn FormatInstance>>;

    /// External editor executable run through the UI bridge, if any.
    fn ui_bridge_binary(&self) -> Option<PathBuf> {
        None
    }
}

type InstanceFactory =
    dyn Fn(Arc<dyn HostCallbacks>) -> Result<Box<dyn FormatInstance>> + Send + Sync;

/// Adapter for plugins written directly against [`FormatInstance`].
pub struct InternalAdapter {
    info: PluginInfo,
    factory: Box<InstanceFactory>,
    ui_binary: Option<PathBuf>,
}

impl InternalAdapter {
    pub fn new<F>(info: PluginInfo, factory: F) -> Self
    where
        F: Fn(Arc<dyn HostCallbacks>) -> Result<Box<dyn FormatInstance>> + Send + Sync + 'static,
    {
        Self {
            info,
            factory: Box::new(factory),
            ui_binary: None,
        }
    }

    pub fn with_ui_bridge(mut self, binary: impl Into<PathBuf>) -> Self {
        self.ui_binary = Some(binary.into());
        self.info.hints.insert(PluginHints::HAS_UI_BRIDGE);
        self
    }
}

impl FormatAdapter for InternalAdapter {
    fn plugin_type(&self) -> PluginType {
        PluginType::Internal
    }

    fn info(&self) -> &PluginInfo {
        &self.info
    }

    fn instantiate(&self, host: Arc<dyn HostCallbacks>) -> Result<Box<dyn FormatInstance>> {
        guarded("instantiate", || (self.factory)(host))?
    }

    fn ui_bridge_binary(&self) -> Option<PathBuf> {
        self.ui_binary.clone()
    }
}

/// Run plugin code, turning an unwind into [`PluginError::CallPanicked`].
///
/// Does not log, so it is usable on the audio thread.
#[inline]
pub fn guarded<R>(call: &'static str, f: impl FnOnce() -> R) -> Result<R> {
    panic::catch_unwind(AssertUnwindSafe(f)).map_err(|_| PluginError::CallPanicked(call))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guarded_catches_panic() {
        let result: Result<u32> = guarded("get_parameter_count", || panic!("plugin bug"));
        assert!(matches!(
            result,
            Err(PluginError::CallPanicked("get_parameter_count"))
        ));
        assert_eq!(guarded("ok", || 7).unwrap(), 7);
    }

    #[test]
    fn test_plugin_info_builder() {
        let info = PluginInfo::new("Gain", "gain")
            .maker("Consort")
            .category(PluginCategory::Utility)
            .hints(PluginHints::IS_RTSAFE)
            .supports(PluginSupports::CONTROL_CHANGES | PluginSupports::ALL_SOUND_OFF);
        assert_eq!(info.maker, "Consort");
        assert!(info.supports.contains(PluginSupports::ALL_SOUND_OFF));
        assert_eq!(PluginType::Native.to_string(), "Native");
    }

    #[test]
    fn test_control_port_scale_points_set_hint() {
        let control = ControlPortInfo::new(0.0, 2.0, 0.0)
            .scale_point(0.0, "Sine")
            .scale_point(1.0, "Saw");
        assert!(control.hints.contains(ParameterHints::USES_SCALEPOINTS));
        assert_eq!(control.scale_points.len(), 2);
    }
}
