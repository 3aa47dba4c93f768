//! Test helpers and fixtures for Consort integration tests
//!
//! A recording engine standing in for the audio backend, and a configurable
//! mock plugin written against `FormatInstance` that logs every call the
//! host makes into it.
//!
//! ## Tolerance Levels
//!
//! Use the appropriate tolerance from [`tolerances`] module:
//! - `FLOAT_EPSILON` (1e-6): Exact operations (passthrough, unity gain)
//! - `DSP_EPSILON` (1e-4): Gain staging and mixing
//! - `SILENCE_THRESHOLD` (0.0001): Silence detection (-80dB)

#![allow(dead_code)]

pub mod tolerances;

use consort::plugin::midi::{MidiEvent, MidiProgram, MIDI_STATUS_NOTE_OFF, MIDI_STATUS_NOTE_ON};
use consort::plugin::{
    ControlPortInfo, FormatInstance, HostCallbacks, ParameterHints, PluginCategory, PluginOpcode,
    PluginSupports, ProcessContext,
};
use consort::prelude::*;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Barrier;

/// Default test sample rate (matches common hardware)
pub const TEST_SAMPLE_RATE: f64 = 48000.0;

/// Standard buffer size for deterministic testing
pub const TEST_BUFFER_SIZE: usize = 512;

// Host-facing parameter indices of every mock plugin.
pub const GAIN: usize = 0;
pub const MODE: usize = 1;
pub const CUTOFF: usize = 2;
pub const PEAK: usize = 3;
/// Only present when the mock reports latency.
pub const LATENCY: usize = 4;

/// Cutoff range in fractions of the sample rate.
pub const CUTOFF_MIN: f32 = 0.001;
pub const CUTOFF_MAX: f32 = 0.5;

/// Generate a test signal: sine wave at given frequency for specified samples.
pub fn generate_sine(frequency: f64, sample_rate: f64, num_samples: usize) -> Vec<f32> {
    (0..num_samples)
        .map(|i| {
            let t = i as f64 / sample_rate;
            (2.0 * std::f64::consts::PI * frequency * t).sin() as f32
        })
        .collect()
}

/// Generate a constant (DC) signal.
pub fn generate_dc(value: f32, num_samples: usize) -> Vec<f32> {
    vec![value; num_samples]
}

/// Calculate RMS of a signal.
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
    (sum_sq / samples.len() as f32).sqrt()
}

/// Calculate peak amplitude of a signal.
pub fn peak(samples: &[f32]) -> f32 {
    samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max)
}

/// Check if signal is silent (below threshold).
pub fn is_silent(samples: &[f32]) -> bool {
    peak(samples) < tolerances::SILENCE_THRESHOLD
}

/// Run one buffer through `plugin` and return the output channels.
pub fn run(
    plugin: &PluginInstance,
    inputs: &[Vec<f32>],
    events: &[EngineEvent],
    frames: usize,
) -> Vec<Vec<f32>> {
    let channels = plugin.audio_out_count();
    let mut outputs = vec![vec![f32::NAN; frames]; channels];
    let input_refs: Vec<&[f32]> = inputs.iter().map(Vec::as_slice).collect();
    let mut output_refs: Vec<&mut [f32]> = outputs.iter_mut().map(Vec::as_mut_slice).collect();
    plugin.process(&input_refs, &mut output_refs, events, frames);
    outputs
}

// =============================================================================
// Recording engine
// =============================================================================

/// Engine stub that records everything plugins send back.
pub struct RecordingEngine {
    sample_rate: f64,
    buffer_size: u32,
    offline: AtomicBool,
    time: Mutex<TimeInfo>,
    notifications: Mutex<Vec<HostNotification>>,
    midi_out: Mutex<Vec<(u32, MidiEvent)>>,
}

impl RecordingEngine {
    pub fn new() -> Arc<Self> {
        Self::with_config(TEST_SAMPLE_RATE, TEST_BUFFER_SIZE as u32)
    }

    pub fn with_config(sample_rate: f64, buffer_size: u32) -> Arc<Self> {
        Arc::new(Self {
            sample_rate,
            buffer_size,
            offline: AtomicBool::new(false),
            time: Mutex::new(TimeInfo::playing_at(0)),
            notifications: Mutex::new(Vec::new()),
            midi_out: Mutex::new(Vec::new()),
        })
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::Release);
    }

    pub fn set_time(&self, time: TimeInfo) {
        *self.time.lock() = time;
    }

    pub fn notifications(&self) -> Vec<HostNotification> {
        self.notifications.lock().clone()
    }

    pub fn take_notifications(&self) -> Vec<HostNotification> {
        std::mem::take(&mut *self.notifications.lock())
    }

    pub fn midi_out(&self) -> Vec<(u32, MidiEvent)> {
        self.midi_out.lock().clone()
    }
}

impl EngineCallbacks for RecordingEngine {
    fn buffer_size(&self) -> u32 {
        self.buffer_size
    }

    fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    fn is_offline(&self) -> bool {
        self.offline.load(Ordering::Acquire)
    }

    fn time_info(&self) -> TimeInfo {
        *self.time.lock()
    }

    fn write_midi_event(&self, plugin_id: u32, event: &MidiEvent) -> bool {
        self.midi_out.lock().push((plugin_id, *event));
        true
    }

    fn notify(&self, notification: HostNotification) {
        self.notifications.lock().push(notification);
    }
}

// =============================================================================
// Mock plugin
// =============================================================================

/// Shape of a mock plugin.
#[derive(Debug, Clone, Default)]
pub struct MockSpec {
    pub audio_ins: u32,
    pub audio_outs: u32,
    pub midi_in: bool,
    pub midi_out: bool,
    /// Frames reported through a `latency` output port.
    pub latency: Option<u32>,
    pub programs: Vec<String>,
    pub midi_programs: Vec<MidiProgram>,
    pub hints: PluginHints,
    /// `select_program` waits here twice: once on entry, once before leaving.
    pub program_gate: Option<Arc<Barrier>>,
}

impl MockSpec {
    /// Stereo effect.
    pub fn effect() -> Self {
        Self {
            audio_ins: 2,
            audio_outs: 2,
            ..Self::default()
        }
    }

    /// Mono in, mono out.
    pub fn mono() -> Self {
        Self {
            audio_ins: 1,
            audio_outs: 1,
            ..Self::default()
        }
    }

    /// Stereo instrument with MIDI in and out and two banks of programs.
    pub fn synth() -> Self {
        Self {
            audio_ins: 0,
            audio_outs: 2,
            midi_in: true,
            midi_out: true,
            programs: vec!["Init".to_string(), "Soft".to_string(), "Loud".to_string()],
            midi_programs: vec![
                MidiProgram::new(0, 0, "Piano"),
                MidiProgram::new(0, 1, "Organ"),
                MidiProgram::new(1, 0, "Pad"),
            ],
            hints: PluginHints::IS_SYNTH,
            ..Self::default()
        }
    }

    pub fn latency(mut self, frames: u32) -> Self {
        self.latency = Some(frames);
        self
    }

    pub fn hints(mut self, hints: PluginHints) -> Self {
        self.hints.insert(hints);
        self
    }

    fn param_base(&self) -> u32 {
        self.audio_ins + self.audio_outs + self.midi_in as u32 + self.midi_out as u32
    }
}

/// One `process()` call as the plugin saw it.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessCall {
    pub handle: usize,
    pub frames: usize,
    pub frame: Option<u64>,
    pub gain: f32,
    pub mode: f32,
    pub midi: Vec<MidiEvent>,
}

/// Everything the host did to any handle of a mock plugin.
#[derive(Default)]
pub struct MockLog {
    pub calls: Vec<ProcessCall>,
    pub handles: usize,
    pub activations: usize,
    pub custom_data: Vec<(CustomDataType, String, String)>,
    pub programs: Vec<usize>,
    pub midi_programs: Vec<(u8, u32, u32)>,
    pub opcodes: Vec<(PluginOpcode, isize, f32)>,
    pub hosts: Vec<Arc<dyn HostCallbacks>>,
}

pub type SharedLog = Arc<Mutex<MockLog>>;

impl MockLog {
    pub fn take_calls(log: &SharedLog) -> Vec<ProcessCall> {
        std::mem::take(&mut log.lock().calls)
    }
}

/// Program `index` sets the gain to this value.
pub fn program_gain(index: usize) -> f32 {
    (index as f32 + 1.0) * 0.25
}

struct MockPlugin {
    spec: Arc<MockSpec>,
    log: SharedLog,
    host: Arc<dyn HostCallbacks>,
    handle: usize,
    gain: f32,
    mode: f32,
    cutoff: f32,
    peak: f32,
}

impl MockPlugin {
    fn slot(&self, rindex: u32) -> Option<usize> {
        rindex.checked_sub(self.spec.param_base()).map(|s| s as usize)
    }
}

impl FormatInstance for MockPlugin {
    fn ports(&self) -> Vec<PortInfo> {
        let spec = &self.spec;
        let mut ports = Vec::new();
        let mut index = 0;
        for c in 0..spec.audio_ins {
            ports.push(PortInfo::audio_in(index, format!("In {}", c + 1)));
            index += 1;
        }
        for c in 0..spec.audio_outs {
            ports.push(PortInfo::audio_out(index, format!("Out {}", c + 1)));
            index += 1;
        }
        if spec.midi_in {
            ports.push(PortInfo::midi_in(index, "Events In"));
            index += 1;
        }
        if spec.midi_out {
            ports.push(PortInfo::midi_out(index, "Events Out"));
            index += 1;
        }

        ports.push(PortInfo::control_in(
            index,
            "Gain",
            ControlPortInfo::new(0.0, 2.0, 1.0).unit("x"),
        ));
        ports.push(PortInfo::control_in(
            index + 1,
            "Mode",
            ControlPortInfo::new(0.0, 4.0, 0.0)
                .hints(ParameterHints::AUTOMABLE | ParameterHints::INTEGER),
        ));
        ports.push(PortInfo::control_in(
            index + 2,
            "Cutoff [Hz]",
            ControlPortInfo::new(CUTOFF_MIN, CUTOFF_MAX, 0.25)
                .hints(ParameterHints::AUTOMABLE | ParameterHints::USES_SAMPLERATE),
        ));
        ports.push(PortInfo::control_out(
            index + 3,
            "Peak",
            ControlPortInfo::new(0.0, 4.0, 0.0),
        ));
        if spec.latency.is_some() {
            ports.push(PortInfo::control_out(
                index + 4,
                "latency",
                ControlPortInfo::new(0.0, 48000.0, 0.0),
            ));
        }
        ports
    }

    fn parameter_value(&self, rindex: u32) -> f32 {
        match self.slot(rindex) {
            Some(0) => self.gain,
            Some(1) => self.mode,
            Some(2) => self.cutoff,
            Some(3) => self.peak,
            Some(4) => self.spec.latency.unwrap_or(0) as f32,
            _ => 0.0,
        }
    }

    fn set_parameter_value(&mut self, rindex: u32, value: f32) {
        match self.slot(rindex) {
            Some(0) => self.gain = value,
            Some(1) => self.mode = value,
            Some(2) => self.cutoff = value,
            _ => {}
        }
    }

    fn parameter_text(&self, rindex: u32, value: f32) -> Option<String> {
        (self.slot(rindex) == Some(0)).then(|| format!("{value:.2}x"))
    }

    fn programs(&self) -> Vec<String> {
        self.spec.programs.clone()
    }

    fn select_program(&mut self, index: usize) {
        if let Some(gate) = &self.spec.program_gate {
            gate.wait();
            gate.wait();
        }
        self.gain = program_gain(index);
        self.log.lock().programs.push(index);
    }

    fn midi_programs(&self) -> Vec<MidiProgram> {
        self.spec.midi_programs.clone()
    }

    fn select_midi_program(&mut self, channel: u8, bank: u32, program: u32) {
        self.mode = (bank * 2 + program) as f32;
        self.log.lock().midi_programs.push((channel, bank, program));
    }

    fn set_custom_data(&mut self, kind: CustomDataType, key: &str, value: &str) {
        self.log
            .lock()
            .custom_data
            .push((kind, key.to_string(), value.to_string()));
    }

    fn activate(&mut self) {
        self.log.lock().activations += 1;
    }

    fn process(&mut self, inputs: &[&[f32]], outputs: &mut [&mut [f32]], ctx: &ProcessContext) {
        let frames = ctx.frames;
        let mut peak = 0.0f32;
        for (c, out) in outputs.iter_mut().enumerate() {
            let input = inputs.get(c).or_else(|| inputs.first());
            for k in 0..frames {
                out[k] = match input {
                    Some(input) => input[k] * self.gain,
                    None => self.gain,
                };
                peak = peak.max(out[k].abs());
            }
        }
        self.peak = peak;

        if self.spec.midi_out {
            for event in ctx.midi_events {
                let status = event.status();
                if status == MIDI_STATUS_NOTE_ON || status == MIDI_STATUS_NOTE_OFF {
                    self.host.write_midi_event(event);
                }
            }
        }

        self.log.lock().calls.push(ProcessCall {
            handle: self.handle,
            frames,
            frame: ctx.time_info.map(|t| t.frame),
            gain: self.gain,
            mode: self.mode,
            midi: ctx.midi_events.to_vec(),
        });
    }

    fn get_state(&mut self) -> Option<Vec<u8>> {
        Some(format!("gain={};mode={}", self.gain, self.mode).into_bytes())
    }

    fn set_state(&mut self, data: &[u8]) -> bool {
        let Ok(text) = std::str::from_utf8(data) else {
            return false;
        };
        let mut gain = None;
        let mut mode = None;
        for pair in text.split(';') {
            match pair.split_once('=') {
                Some(("gain", v)) => gain = v.parse().ok(),
                Some(("mode", v)) => mode = v.parse().ok(),
                _ => return false,
            }
        }
        match (gain, mode) {
            (Some(gain), Some(mode)) => {
                self.gain = gain;
                self.mode = mode;
                true
            }
            _ => false,
        }
    }

    fn dispatcher(&mut self, opcode: PluginOpcode, _index: i32, value: isize, opt: f32) -> isize {
        self.log.lock().opcodes.push((opcode, value, opt));
        0
    }
}

/// Build an adapter for a mock plugin and the log its handles write to.
pub fn mock_adapter(label: &str, spec: MockSpec) -> (Arc<dyn FormatAdapter>, SharedLog) {
    let log: SharedLog = Arc::new(Mutex::new(MockLog::default()));
    let mut supports = PluginSupports::empty();
    if spec.midi_in {
        supports = PluginSupports::PROGRAM_CHANGES
            | PluginSupports::CONTROL_CHANGES
            | PluginSupports::CHANNEL_PRESSURE
            | PluginSupports::PITCHBEND
            | PluginSupports::ALL_SOUND_OFF;
    }
    let category = if spec.hints.contains(PluginHints::IS_SYNTH) {
        PluginCategory::Synth
    } else {
        PluginCategory::Utility
    };
    let info = PluginInfo::new(format!("Mock {label}"), label)
        .maker("Consort Tests")
        .category(category)
        .hints(spec.hints | PluginHints::IS_RTSAFE)
        .supports(supports);

    let spec = Arc::new(spec);
    let factory_log = log.clone();
    let adapter = InternalAdapter::new(info, move |host: Arc<dyn HostCallbacks>| {
        let mut log = factory_log.lock();
        let handle = log.handles;
        log.handles += 1;
        log.hosts.push(host.clone());
        let cutoff = host.sample_rate() as f32 * 0.25;
        Ok(Box::new(MockPlugin {
            spec: spec.clone(),
            log: factory_log.clone(),
            host,
            handle,
            gain: 1.0,
            mode: 0.0,
            cutoff,
            peak: 0.0,
        }) as Box<dyn FormatInstance>)
    });
    (Arc::new(adapter), log)
}

/// Load and activate a mock plugin with default options.
pub fn load(spec: MockSpec) -> (Arc<PluginInstance>, Arc<RecordingEngine>, SharedLog) {
    load_with(spec, EngineOptions::default(), PluginInit::new(1))
}

pub fn load_with(
    spec: MockSpec,
    options: EngineOptions,
    init: PluginInit,
) -> (Arc<PluginInstance>, Arc<RecordingEngine>, SharedLog) {
    let engine = RecordingEngine::new();
    let (adapter, log) = mock_adapter("mock", spec);
    let plugin = PluginInstance::new(adapter, engine.clone(), options, init).unwrap();
    plugin.set_active(true);
    (plugin, engine, log)
}
