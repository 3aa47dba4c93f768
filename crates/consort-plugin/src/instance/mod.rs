//! The loaded plugin: identity, layout, values and the two locks around them.
//!
//! Lock order is `master` then `single`. The audio thread only ever try-locks
//! both; control paths block on them.
//!
//! - `master` guards [`EngineState`]: the format handles and every buffer the
//!   dispatcher touches. `process()` holds it for the whole call; `reload()`,
//!   program changes and chunk access take it to serialize structural work.
//! - `single` guards [`ParamState`]: the parameter value buffer shared by
//!   control edits and each dispatcher sub-call.
//!
//! The port/parameter metadata lives in an `ArcSwap<PluginLayout>` that is
//! replaced wholesale on reload, so readers never need a lock.

mod control;
mod host;
mod persist;
mod reload;

pub use host::InstanceHost;

use crate::adapter::{guarded, FormatAdapter, FormatInstance};
use crate::config::{EngineOptions, ProcessMode};
use crate::host::{EngineCallbacks, HostNotification, InternalControl, TimeInfo};
use crate::midi::{MidiEvent, MAX_MIDI_EVENTS};
use crate::parameter::Parameter;
use crate::ports::PluginLayout;
use crate::postponed::PostponedQueue;
use crate::state::CustomDataStore;
use crate::ui_bridge::UiBridge;
use crate::{LoadStage, PluginError, PluginHints, PluginOptions, Result};
use arc_swap::ArcSwap;
use atomic_float::{AtomicF32, AtomicF64};
use parking_lot::Mutex;
use ringbuf::traits::Split;
use ringbuf::{HeapCons, HeapProd, HeapRb};
use smallvec::SmallVec;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Weak};

/// Forced stereo never needs more than two handles.
pub const MAX_HANDLES: usize = 2;

/// Contended sub-call ranges tracked per `process()` call. Past this the last
/// range is widened to cover the rest.
pub(crate) const MAX_SILENCED_RANGES: usize = 16;

pub(crate) type Handles = SmallVec<[Box<dyn FormatInstance>; MAX_HANDLES]>;

/// A note injected from outside the audio thread. Velocity 0 is a note-off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExternalNote {
    pub channel: u8,
    pub note: u8,
    pub velocity: u8,
}

/// Everything the dispatcher mutates, owned behind `master`.
pub(crate) struct EngineState {
    pub(crate) handles: Handles,
    pub(crate) midi: Vec<MidiEvent>,
    /// Parameter changes decoded from events, applied before the next sub-call.
    pub(crate) pending: Vec<(usize, f32)>,
    pub(crate) ext_notes: HeapCons<ExternalNote>,
    /// Tail of the input signal, `latency` frames per input channel.
    pub(crate) latency_buffers: Vec<Vec<f32>>,
    pub(crate) balance_scratch: Vec<f32>,
    /// Output ranges left silent this call because `single` was contended.
    pub(crate) silenced: Vec<(usize, usize)>,
    pub(crate) time: TimeInfo,
    pub(crate) last_frame: u64,
    pub(crate) reported_latency: u32,
    pub(crate) buffer_size: usize,
}

impl EngineState {
    fn new(ext_notes: HeapCons<ExternalNote>, buffer_size: usize) -> Self {
        Self {
            handles: SmallVec::new(),
            midi: Vec::with_capacity(MAX_MIDI_EVENTS),
            pending: Vec::new(),
            ext_notes,
            latency_buffers: Vec::new(),
            balance_scratch: vec![0.0; buffer_size],
            silenced: Vec::with_capacity(MAX_SILENCED_RANGES),
            time: TimeInfo::default(),
            last_frame: 0,
            reported_latency: 0,
            buffer_size,
        }
    }

    /// Reallocate every per-buffer allocation for the given layout.
    pub(crate) fn resize(&mut self, buffer_size: usize, layout: &PluginLayout, latency: u32) {
        self.buffer_size = buffer_size;
        self.balance_scratch = vec![0.0; buffer_size];
        self.pending = Vec::with_capacity(layout.parameters.len().max(16));
        self.latency_buffers = vec![vec![0.0; latency as usize]; layout.audio_in.len()];
        self.reported_latency = latency;
    }

    pub(crate) fn clear_latency_buffers(&mut self) {
        for buffer in &mut self.latency_buffers {
            buffer.fill(0.0);
        }
    }
}

/// Parameter values, guarded by `single`.
#[derive(Debug, Default)]
pub(crate) struct ParamState {
    pub(crate) values: Vec<f32>,
    /// Set by control edits, cleared when pushed into the handles.
    pub(crate) dirty: Vec<bool>,
}

impl ParamState {
    pub(crate) fn reset(&mut self, values: Vec<f32>) {
        self.dirty = vec![false; values.len()];
        self.values = values;
    }

    /// Push dirty values into every handle.
    pub(crate) fn flush(&mut self, handles: &mut Handles, layout: &PluginLayout) {
        for (index, dirty) in self.dirty.iter_mut().enumerate() {
            if !*dirty {
                continue;
            }
            *dirty = false;
            let Some(param) = layout.parameters.get(index) else {
                continue;
            };
            for handle in handles.iter_mut() {
                let _ = guarded("set_parameter_value", || {
                    handle.set_parameter_value(param.data.rindex, self.values[index])
                });
            }
        }
    }
}

/// Construction-time identity of a plugin instance.
#[derive(Debug, Clone, Default)]
pub struct PluginInit {
    pub id: u32,
    /// Display name, defaults to the plugin's own name.
    pub name: Option<String>,
    pub filename: Option<PathBuf>,
    /// Requested options, masked by what the plugin supports.
    pub options: Option<PluginOptions>,
}

impl PluginInit {
    pub fn new(id: u32) -> Self {
        Self {
            id,
            ..Self::default()
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn filename(mut self, filename: impl Into<PathBuf>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    pub fn options(mut self, options: PluginOptions) -> Self {
        self.options = Some(options);
        self
    }
}

pub struct PluginInstance {
    pub(crate) id: u32,
    pub(crate) name: String,
    pub(crate) filename: Option<PathBuf>,
    pub(crate) adapter: Arc<dyn FormatAdapter>,
    pub(crate) engine: Arc<dyn EngineCallbacks>,
    pub(crate) host: Arc<InstanceHost>,
    pub(crate) config: EngineOptions,

    pub(crate) layout: ArcSwap<PluginLayout>,
    pub(crate) master: Mutex<EngineState>,
    pub(crate) single: Mutex<ParamState>,

    pub(crate) active: AtomicBool,
    pub(crate) enabled: AtomicBool,
    pub(crate) needs_reset: AtomicBool,
    pub(crate) options: AtomicU32,
    pub(crate) hints: AtomicU32,
    pub(crate) latency: AtomicU32,
    pub(crate) lock_misses: AtomicU64,
    pub(crate) dropped_midi: AtomicU64,
    pub(crate) ctrl_channel: AtomicU8,
    pub(crate) sample_rate: AtomicF64,
    pub(crate) buffer_size: AtomicU32,

    pub(crate) dry_wet: AtomicF32,
    pub(crate) volume: AtomicF32,
    pub(crate) balance_left: AtomicF32,
    pub(crate) balance_right: AtomicF32,
    pub(crate) panning: AtomicF32,

    /// -1 when none is selected.
    pub(crate) current_program: AtomicI32,
    pub(crate) current_midi_program: AtomicI32,

    pub(crate) custom_data: Mutex<CustomDataStore>,
    pub(crate) postponed: PostponedQueue,
    pub(crate) ext_notes: Mutex<HeapProd<ExternalNote>>,
    pub(crate) ui: Mutex<Option<UiBridge>>,
    pub(crate) ui_visible: AtomicBool,
    pub(crate) last_error: Mutex<Option<String>>,
}

impl PluginInstance {
    /// Instantiate the plugin and build its first layout.
    pub fn new(
        adapter: Arc<dyn FormatAdapter>,
        engine: Arc<dyn EngineCallbacks>,
        config: EngineOptions,
        init: PluginInit,
    ) -> Result<Arc<Self>> {
        let sample_rate = engine.sample_rate();
        let buffer_size = engine.buffer_size();
        let (notes_tx, notes_rx) = HeapRb::<ExternalNote>::new(config.external_note_capacity.max(1)).split();

        let name = init.name.clone().unwrap_or_else(|| adapter.info().name.clone());
        let instance = Arc::new_cyclic(|weak: &Weak<PluginInstance>| Self {
            id: init.id,
            name,
            filename: init.filename.clone(),
            host: Arc::new(InstanceHost::new(weak.clone(), engine.clone(), init.id)),
            adapter: adapter.clone(),
            engine: engine.clone(),
            layout: ArcSwap::from_pointee(PluginLayout::default()),
            master: Mutex::new(EngineState::new(notes_rx, buffer_size as usize)),
            single: Mutex::new(ParamState::default()),
            active: AtomicBool::new(false),
            enabled: AtomicBool::new(false),
            needs_reset: AtomicBool::new(false),
            options: AtomicU32::new(0),
            hints: AtomicU32::new(adapter.info().hints.bits()),
            latency: AtomicU32::new(0),
            lock_misses: AtomicU64::new(0),
            dropped_midi: AtomicU64::new(0),
            ctrl_channel: AtomicU8::new(config.ctrl_channel.min(15)),
            sample_rate: AtomicF64::new(sample_rate),
            buffer_size: AtomicU32::new(buffer_size),
            dry_wet: AtomicF32::new(1.0),
            volume: AtomicF32::new(1.0),
            balance_left: AtomicF32::new(-1.0),
            balance_right: AtomicF32::new(1.0),
            panning: AtomicF32::new(0.0),
            current_program: AtomicI32::new(-1),
            current_midi_program: AtomicI32::new(-1),
            custom_data: Mutex::new(CustomDataStore::new()),
            postponed: PostponedQueue::new(config.postponed_capacity),
            ext_notes: Mutex::new(notes_tx),
            ui: Mutex::new(None),
            ui_visible: AtomicBool::new(false),
            last_error: Mutex::new(None),
            config,
        });

        let host: Arc<dyn crate::host::HostCallbacks> = instance.host.clone();
        match adapter.instantiate(host) {
            Ok(handle) => instance.master.lock().handles.push(handle),
            Err(err) => {
                let err = instance.load_error(LoadStage::Instantiation, err);
                return Err(err);
            }
        }

        if let Err(err) = instance.reload() {
            return Err(instance.load_error(LoadStage::Reload, err));
        }

        let mut options = init
            .options
            .unwrap_or(instance.config.default_options)
            & instance.available_options();
        if instance.hints().contains(PluginHints::NEEDS_FIXED_BUFFERS) {
            options.insert(PluginOptions::FIXED_BUFFERS);
        }
        let had_force_stereo = options.contains(PluginOptions::FORCE_STEREO);
        instance.options.store(options.bits(), Ordering::Release);
        if had_force_stereo {
            instance.reload()?;
        }
        instance.enabled.store(true, Ordering::Release);

        tracing::info!(
            "Loaded {} plugin '{}' (id {}, {} in / {} out, {} parameters)",
            adapter.plugin_type(),
            instance.name,
            instance.id,
            instance.audio_in_count(),
            instance.audio_out_count(),
            instance.parameter_count()
        );

        Ok(instance)
    }

    fn load_error(&self, stage: LoadStage, err: PluginError) -> PluginError {
        let err = match err {
            err @ PluginError::LoadFailed { .. } => err,
            other => PluginError::LoadFailed {
                path: self.filename.clone().unwrap_or_default(),
                stage,
                reason: other.to_string(),
            },
        };
        tracing::error!("{}", err);
        *self.last_error.lock() = Some(err.to_string());
        err
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn label(&self) -> &str {
        &self.adapter.info().label
    }

    pub fn filename(&self) -> Option<&Path> {
        self.filename.as_deref()
    }

    pub fn plugin_type(&self) -> crate::adapter::PluginType {
        self.adapter.plugin_type()
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().clone()
    }

    pub fn layout(&self) -> Arc<PluginLayout> {
        self.layout.load_full()
    }

    pub fn audio_in_count(&self) -> usize {
        self.layout.load().audio_in.len()
    }

    pub fn audio_out_count(&self) -> usize {
        self.layout.load().audio_out.len()
    }

    pub fn midi_in_count(&self) -> usize {
        self.layout.load().midi_in.len()
    }

    pub fn midi_out_count(&self) -> usize {
        self.layout.load().midi_out.len()
    }

    pub fn parameter_count(&self) -> usize {
        self.layout.load().parameters.len()
    }

    pub fn parameter(&self, index: usize) -> Option<Parameter> {
        self.layout.load().parameters.get(index).cloned()
    }

    /// Host index of the latency-reporting parameter, if the plugin has one.
    pub fn latency_parameter(&self) -> Option<usize> {
        self.layout.load().latency_index
    }

    pub fn latency(&self) -> u32 {
        self.latency.load(Ordering::Acquire)
    }

    pub fn hints(&self) -> PluginHints {
        PluginHints::from_bits(self.hints.load(Ordering::Acquire))
    }

    pub fn options(&self) -> PluginOptions {
        PluginOptions::from_bits(self.options.load(Ordering::Acquire))
    }

    /// Contended or failed realtime calls that produced silence.
    pub fn lock_misses(&self) -> u64 {
        self.lock_misses.load(Ordering::Relaxed)
    }

    pub fn dropped_midi_events(&self) -> u64 {
        self.dropped_midi.load(Ordering::Relaxed)
    }

    pub fn dropped_postponed_events(&self) -> u64 {
        self.postponed.dropped()
    }

    pub fn process_mode(&self) -> ProcessMode {
        self.config.process_mode
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate.load(Ordering::Acquire)
    }

    pub fn buffer_size(&self) -> u32 {
        self.buffer_size.load(Ordering::Acquire)
    }

    pub fn set_active(&self, active: bool) {
        if self.is_active() == active {
            return;
        }

        let mut engine = self.master.lock();
        for handle in engine.handles.iter_mut() {
            let result = if active {
                guarded("activate", || handle.activate())
            } else {
                guarded("deactivate", || handle.deactivate())
            };
            if let Err(err) = result {
                tracing::warn!("Plugin '{}': {}", self.name, err);
            }
        }
        if active {
            engine.clear_latency_buffers();
            self.needs_reset.store(true, Ordering::Release);
        }
        self.active.store(active, Ordering::Release);
        drop(engine);

        self.notify_internal(InternalControl::Active, if active { 1.0 } else { 0.0 });
    }

    /// Options this plugin can honor, given its ports and declared support.
    pub fn available_options(&self) -> PluginOptions {
        use crate::adapter::PluginSupports;

        let layout = self.layout.load();
        let info = self.adapter.info();
        let mut options = PluginOptions::empty();

        if !info.hints.contains(PluginHints::NEEDS_FIXED_BUFFERS) {
            options.insert(PluginOptions::FIXED_BUFFERS);
        }
        if self.hints().contains(PluginHints::CAN_FORCE_STEREO) {
            options.insert(PluginOptions::FORCE_STEREO);
        }
        if info.hints.contains(PluginHints::USES_CHUNKS) {
            options.insert(PluginOptions::USE_CHUNKS);
        }
        if !layout.midi_programs.is_empty() {
            options.insert(PluginOptions::MAP_PROGRAM_CHANGES);
        }
        if !layout.midi_in.is_empty() {
            let supports = info.supports;
            let pairs = [
                (PluginSupports::CONTROL_CHANGES, PluginOptions::SEND_CONTROL_CHANGES),
                (PluginSupports::CHANNEL_PRESSURE, PluginOptions::SEND_CHANNEL_PRESSURE),
                (PluginSupports::NOTE_AFTERTOUCH, PluginOptions::SEND_NOTE_AFTERTOUCH),
                (PluginSupports::PITCHBEND, PluginOptions::SEND_PITCHBEND),
                (PluginSupports::ALL_SOUND_OFF, PluginOptions::SEND_ALL_SOUND_OFF),
                (PluginSupports::PROGRAM_CHANGES, PluginOptions::SEND_PROGRAM_CHANGES),
            ];
            for (support, option) in pairs {
                if supports.contains(support) {
                    options.insert(option);
                }
            }
        }
        options
    }

    /// Toggle an option. `FORCE_STEREO` changes the port layout and reloads.
    pub fn set_option(&self, option: PluginOptions, enabled: bool) -> Result<()> {
        if enabled && !self.available_options().contains(option) {
            tracing::warn!("Plugin '{}' does not support option {:?}", self.name, option);
            return Ok(());
        }
        if option.contains(PluginOptions::FIXED_BUFFERS)
            && !enabled
            && self.hints().contains(PluginHints::NEEDS_FIXED_BUFFERS)
        {
            return Ok(());
        }

        let mut options = self.options();
        let before = options;
        options.set(option, enabled);
        self.options.store(options.bits(), Ordering::Release);

        if option.contains(PluginOptions::FORCE_STEREO) && before != options {
            self.reload()?;
        }
        Ok(())
    }

    pub fn ctrl_channel(&self) -> u8 {
        self.ctrl_channel.load(Ordering::Acquire)
    }

    pub fn set_ctrl_channel(&self, channel: u8) {
        let channel = channel.min(15);
        self.ctrl_channel.store(channel, Ordering::Release);
        self.notify_internal(InternalControl::CtrlChannel, channel as f32);
    }

    pub fn dry_wet(&self) -> f32 {
        self.dry_wet.load(Ordering::Acquire)
    }

    pub fn volume(&self) -> f32 {
        self.volume.load(Ordering::Acquire)
    }

    pub fn balance_left(&self) -> f32 {
        self.balance_left.load(Ordering::Acquire)
    }

    pub fn balance_right(&self) -> f32 {
        self.balance_right.load(Ordering::Acquire)
    }

    pub fn panning(&self) -> f32 {
        self.panning.load(Ordering::Acquire)
    }

    /// Internal control setters clamp into their range and ignore NaN.
    pub fn set_dry_wet(&self, value: f32) {
        if value.is_nan() {
            return;
        }
        let value = value.clamp(0.0, 1.0);
        self.dry_wet.store(value, Ordering::Release);
        self.notify_internal(InternalControl::DryWet, value);
    }

    pub fn set_volume(&self, value: f32) {
        if value.is_nan() {
            return;
        }
        let value = value.clamp(0.0, 1.27);
        self.volume.store(value, Ordering::Release);
        self.notify_internal(InternalControl::Volume, value);
    }

    pub fn set_balance_left(&self, value: f32) {
        if value.is_nan() {
            return;
        }
        let value = value.clamp(-1.0, 1.0);
        self.balance_left.store(value, Ordering::Release);
        self.notify_internal(InternalControl::BalanceLeft, value);
    }

    pub fn set_balance_right(&self, value: f32) {
        if value.is_nan() {
            return;
        }
        let value = value.clamp(-1.0, 1.0);
        self.balance_right.store(value, Ordering::Release);
        self.notify_internal(InternalControl::BalanceRight, value);
    }

    pub fn set_panning(&self, value: f32) {
        if value.is_nan() {
            return;
        }
        let value = value.clamp(-1.0, 1.0);
        self.panning.store(value, Ordering::Release);
        self.notify_internal(InternalControl::Panning, value);
    }

    pub(crate) fn notify_internal(&self, control: InternalControl, value: f32) {
        self.engine.notify(HostNotification::InternalValueChanged {
            plugin_id: self.id,
            control,
            value,
        });
    }

    pub fn current_program(&self) -> Option<usize> {
        usize::try_from(self.current_program.load(Ordering::Acquire)).ok()
    }

    pub fn current_midi_program(&self) -> Option<usize> {
        usize::try_from(self.current_midi_program.load(Ordering::Acquire)).ok()
    }

    /// Queue a note for the next `process()` call. Velocity 0 sends a note-off.
    /// Returns `false` if the plugin has no MIDI input or the queue is full.
    pub fn send_midi_single_note(&self, channel: u8, note: u8, velocity: u8) -> bool {
        use ringbuf::traits::Producer;

        if self.midi_in_count() == 0 || channel >= 16 || note >= 128 || velocity >= 128 {
            return false;
        }
        let queued = self
            .ext_notes
            .lock()
            .try_push(ExternalNote {
                channel,
                note,
                velocity,
            })
            .is_ok();
        if !queued {
            tracing::debug!("Plugin '{}': external note queue full", self.name);
        }
        queued
    }
}

impl Drop for PluginInstance {
    fn drop(&mut self) {
        if let Some(mut bridge) = self.ui.get_mut().take() {
            bridge.stop_now();
        }

        let engine = self.master.get_mut();
        if *self.active.get_mut() {
            for handle in engine.handles.iter_mut() {
                let _ = guarded("deactivate", || handle.deactivate());
            }
            *self.active.get_mut() = false;
        }
        engine.handles.clear();
        engine.latency_buffers.clear();
        engine.balance_scratch.clear();

        tracing::debug!("Plugin '{}' (id {}) unloaded", self.name, self.id);
    }
}

impl std::fmt::Debug for PluginInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginInstance")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("type", &self.adapter.plugin_type())
            .field("active", &self.is_active())
            .finish()
    }
}
