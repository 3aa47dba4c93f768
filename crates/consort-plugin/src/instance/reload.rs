//! Structural changes: port enumeration, forced stereo, latency and the
//! engine-driven sample rate / buffer size / offline switches.

use super::{EngineState, PluginInstance};
use crate::adapter::{guarded, FormatInstance, PluginOpcode, ProcessContext};
use crate::host::{HostCallbacks, HostNotification};
use crate::parameter::{ParameterSpecial, ParameterType};
use crate::ports::{can_force_stereo, LayoutParams, PluginLayout, PortCounts, MAX_AUDIO_PORTS};
use crate::{LoadStage, PluginError, PluginHints, PluginOptions, Result};
use smallvec::SmallVec;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

/// Frames run once after reload to let a plugin settle its latency output.
const LATENCY_PRE_RUN_FRAMES: usize = 2;

impl PluginInstance {
    /// Re-enumerate ports and parameters and rebuild the layout.
    ///
    /// Blocks on `master`, so the audio thread outputs silence for as long as
    /// this runs. Active plugins are deactivated and reactivated around it.
    pub fn reload(&self) -> Result<()> {
        let was_active = self.is_active();
        let mut guard = self.master.lock();
        let engine = &mut *guard;

        if engine.handles.is_empty() {
            return Err(PluginError::LoadFailed {
                path: self.filename.clone().unwrap_or_default(),
                stage: LoadStage::Reload,
                reason: "no plugin handle".to_string(),
            });
        }

        let ports = guarded("ports", || engine.handles[0].ports())?;
        let native = PortCounts::from_ports(&ports);
        if !native.fits_audio_limit() {
            return Err(PluginError::LoadFailed {
                path: self.filename.clone().unwrap_or_default(),
                stage: LoadStage::Reload,
                reason: format!(
                    "{} audio inputs / {} outputs, at most {} per direction are supported",
                    native.audio_ins, native.audio_outs, MAX_AUDIO_PORTS
                ),
            });
        }

        if was_active {
            for handle in engine.handles.iter_mut() {
                let _ = guarded("deactivate", || handle.deactivate());
            }
        }
        engine.handles.truncate(1);

        let forceable = (native.audio_ins == 1 || native.audio_outs == 1)
            && can_force_stereo(native.audio_ins, native.audio_outs);
        let mut forced_in = false;
        let mut forced_out = false;
        if forceable && self.options().contains(PluginOptions::FORCE_STEREO) {
            let host: Arc<dyn HostCallbacks> = self.host.clone();
            match self.adapter.instantiate(host) {
                Ok(handle) => {
                    engine.handles.push(handle);
                    forced_in = native.audio_ins == 1;
                    forced_out = native.audio_outs == 1;
                }
                Err(err) => tracing::warn!(
                    "Plugin '{}': second handle for forced stereo failed: {}",
                    self.name,
                    err
                ),
            }
        }

        let sample_rate = self.sample_rate() as f32;
        let mut layout = PluginLayout::build(
            &ports,
            LayoutParams {
                sample_rate,
                max_parameters: self.config.max_parameters,
                forced_stereo_in: forced_in,
                forced_stereo_out: forced_out,
            },
        );
        let (programs, midi_programs) = guarded("programs", || {
            (engine.handles[0].programs(), engine.handles[0].midi_programs())
        })?;
        layout.programs = programs;
        layout.midi_programs = midi_programs;

        let previous = self.layout.load_full();
        for param in &mut layout.parameters {
            if let Some(old) = previous
                .parameters
                .iter()
                .find(|p| p.data.rindex == param.data.rindex && p.name == param.name)
            {
                param.data.midi_channel = old.data.midi_channel;
                param.data.midi_cc = old.data.midi_cc;
            }
        }

        let values = initial_values(&layout, engine.handles[0].as_ref(), sample_rate);
        for (param, &value) in layout.parameters.iter().zip(&values) {
            let writable = match param.data.kind {
                ParameterType::Input => true,
                ParameterType::Output => param.data.special == ParameterSpecial::SampleRate,
                ParameterType::Unknown => false,
            };
            if !writable {
                continue;
            }
            for handle in engine.handles.iter_mut() {
                let _ = guarded("set_parameter_value", || {
                    handle.set_parameter_value(param.data.rindex, value)
                });
            }
        }

        let derived = PluginHints::CAN_DRYWET
            | PluginHints::CAN_VOLUME
            | PluginHints::CAN_BALANCE
            | PluginHints::CAN_FORCE_STEREO;
        let mut hints = self.adapter.info().hints.without(derived) | layout.derived_hints();
        hints.set(PluginHints::CAN_FORCE_STEREO, forceable);
        self.hints.store(hints.bits(), Ordering::Release);

        clamp_slot(&self.current_program, layout.programs.len());
        clamp_slot(&self.current_midi_program, layout.midi_programs.len());

        self.single.lock().reset(values);
        engine.resize(self.buffer_size() as usize, &layout, 0);

        let latency = match layout.latency_index {
            Some(index) => {
                let frames = measure_latency(engine, &layout, index);
                if let Some(value) = self.single.lock().values.get_mut(index) {
                    *value = frames as f32;
                }
                frames
            }
            None => 0,
        };
        engine.resize(self.buffer_size() as usize, &layout, latency);
        if self.latency.swap(latency, Ordering::AcqRel) != latency {
            self.engine.notify(HostNotification::LatencyChanged {
                plugin_id: self.id,
                frames: latency,
            });
        }

        tracing::debug!(
            "Plugin '{}' reloaded: {} audio in, {} audio out, {} midi in, {} parameters, latency {}{}",
            self.name,
            layout.audio_in.len(),
            layout.audio_out.len(),
            layout.midi_in.len(),
            layout.parameters.len(),
            latency,
            if engine.handles.len() > 1 { ", forced stereo" } else { "" }
        );

        self.layout.store(Arc::new(layout));

        if was_active {
            for handle in engine.handles.iter_mut() {
                let _ = guarded("activate", || handle.activate());
            }
            self.needs_reset.store(true, Ordering::Release);
        }

        Ok(())
    }

    /// Re-query program lists without touching ports.
    pub fn reload_programs(&self) -> Result<()> {
        let engine = self.master.lock();
        let handle = engine.handles.first().ok_or(PluginError::OutOfRange {
            what: "handle",
            index: 0,
            count: 0,
        })?;
        let (programs, midi_programs) =
            guarded("programs", || (handle.programs(), handle.midi_programs()))?;
        drop(engine);

        let mut layout = (**self.layout.load()).clone();
        layout.programs = programs;
        layout.midi_programs = midi_programs;

        let program_reset = clamp_slot(&self.current_program, layout.programs.len());
        let midi_program_reset = clamp_slot(&self.current_midi_program, layout.midi_programs.len());
        self.layout.store(Arc::new(layout));

        if program_reset {
            self.engine.notify(HostNotification::ProgramChanged {
                plugin_id: self.id,
                index: None,
            });
        }
        if midi_program_reset {
            self.engine.notify(HostNotification::MidiProgramChanged {
                plugin_id: self.id,
                index: None,
            });
        }
        Ok(())
    }

    pub fn set_buffer_size(&self, buffer_size: u32) {
        let mut engine = self.master.lock();
        self.buffer_size.store(buffer_size, Ordering::Release);
        engine.buffer_size = buffer_size as usize;
        engine.balance_scratch = vec![0.0; buffer_size as usize];

        for handle in engine.handles.iter_mut() {
            let _ = guarded("dispatcher", || {
                handle.dispatcher(PluginOpcode::BufferSizeChanged, 0, buffer_size as isize, 0.0)
            });
        }
    }

    /// Rescale sample-rate dependent ranges and tell the plugin.
    pub fn set_sample_rate(&self, sample_rate: f64) {
        if !sample_rate.is_finite() || sample_rate <= 0.0 {
            tracing::warn!("Ignoring invalid sample rate {}", sample_rate);
            return;
        }

        let mut guard = self.master.lock();
        let engine = &mut *guard;
        self.sample_rate.store(sample_rate, Ordering::Release);

        let rate = sample_rate as f32;
        let mut layout = (**self.layout.load()).clone();
        let mut single = self.single.lock();

        for (index, param) in layout.parameters.iter_mut().enumerate() {
            param.apply_sample_rate(rate);
            let Some(value) = single.values.get(index).copied() else {
                continue;
            };
            let next = match param.data.special {
                ParameterSpecial::SampleRate => rate,
                ParameterSpecial::None if param.is_input() => param.fix_value(value),
                _ => continue,
            };
            if next != value || param.data.special == ParameterSpecial::SampleRate {
                single.values[index] = next;
                single.dirty[index] = true;
            }
        }
        single.flush(&mut engine.handles, &layout);
        drop(single);
        self.layout.store(Arc::new(layout));

        for handle in engine.handles.iter_mut() {
            let _ = guarded("dispatcher", || {
                handle.dispatcher(PluginOpcode::SampleRateChanged, 0, 0, rate)
            });
        }
        drop(guard);

        self.with_ui(|ui| ui.send_sample_rate(sample_rate));
    }

    pub fn set_offline(&self, offline: bool) {
        let mut engine = self.master.lock();
        for handle in engine.handles.iter_mut() {
            let _ = guarded("dispatcher", || {
                handle.dispatcher(PluginOpcode::OfflineChanged, 0, offline as isize, 0.0)
            });
        }
    }

    /// Switch latency compensation to a newly reported value.
    pub(crate) fn apply_latency(&self, frames: u32) {
        let mut engine = self.master.lock();
        let layout = self.layout.load();
        engine.latency_buffers = vec![vec![0.0; frames as usize]; layout.audio_in.len()];
        engine.reported_latency = frames;
        drop(engine);

        if self.latency.swap(frames, Ordering::AcqRel) != frames {
            tracing::debug!("Plugin '{}' latency is now {} frames", self.name, frames);
            self.engine.notify(HostNotification::LatencyChanged {
                plugin_id: self.id,
                frames,
            });
        }
    }
}

fn initial_values(layout: &PluginLayout, handle: &dyn FormatInstance, sample_rate: f32) -> Vec<f32> {
    layout
        .parameters
        .iter()
        .map(|param| match (param.data.kind, param.data.special) {
            (_, ParameterSpecial::SampleRate) => sample_rate,
            (ParameterType::Unknown, _) => param.ranges.def,
            _ => {
                let reported = guarded("parameter_value", || handle.parameter_value(param.data.rindex))
                    .unwrap_or(param.ranges.def);
                if reported.is_finite() {
                    param.fix_value(reported)
                } else {
                    param.ranges.def
                }
            }
        })
        .collect()
}

/// Run a short silent buffer and read the latency output port.
fn measure_latency(engine: &mut EngineState, layout: &PluginLayout, index: usize) -> u32 {
    let Some(param) = layout.parameters.get(index) else {
        return 0;
    };
    let Some(handle) = engine.handles.first_mut() else {
        return 0;
    };

    let inputs = vec![vec![0.0f32; LATENCY_PRE_RUN_FRAMES]; layout.native.audio_ins];
    let mut outputs = vec![vec![0.0f32; LATENCY_PRE_RUN_FRAMES]; layout.native.audio_outs];
    let input_refs: SmallVec<[&[f32]; 8]> = inputs.iter().map(Vec::as_slice).collect();
    let mut output_refs: SmallVec<[&mut [f32]; 8]> =
        outputs.iter_mut().map(Vec::as_mut_slice).collect();
    let ctx = ProcessContext::new(LATENCY_PRE_RUN_FRAMES);

    let run = guarded("latency pre-run", || {
        handle.activate();
        handle.process(&input_refs, &mut output_refs, &ctx);
        handle.deactivate();
        handle.parameter_value(param.data.rindex)
    });

    match run {
        Ok(value) => param.fix_value(value).round().max(0.0) as u32,
        Err(err) => {
            tracing::warn!("Latency measurement failed: {}", err);
            0
        }
    }
}

/// Reset a stored program slot that no longer fits. Returns true if reset.
fn clamp_slot(slot: &AtomicI32, count: usize) -> bool {
    let current = slot.load(Ordering::Acquire);
    if current >= 0 && current as usize >= count {
        slot.store(-1, Ordering::Release);
        return true;
    }
    false
}
