//! The audio-thread entry point.
//!
//! A host buffer is split at every event time into sub-calls (unless the
//! plugin runs with fixed buffers), events are translated into parameter
//! changes and MIDI, and generic post-processing runs once over the full
//! buffer at the end. Nothing here blocks or allocates outside offline mode.

use crate::adapter::{guarded, ProcessContext};
use crate::config::ProcessMode;
use crate::event::{ControlEvent, EngineEvent, EngineEventKind, NON_MIDI_CHANNEL};
use crate::host::InternalControl;
use crate::instance::{EngineState, PluginInstance};
use crate::midi::{
    all_notes_off, all_sound_off, MidiEvent, MAX_MIDI_CHANNELS, MAX_MIDI_EVENTS, MAX_MIDI_VALUE,
    MIDI_CONTROL_ALL_NOTES_OFF, MIDI_CONTROL_ALL_SOUND_OFF, MIDI_CONTROL_BALANCE,
    MIDI_CONTROL_BANK_SELECT, MIDI_CONTROL_BREATH_CONTROLLER, MIDI_CONTROL_CHANNEL_VOLUME,
    MIDI_STATUS_CHANNEL_PRESSURE, MIDI_STATUS_CONTROL_CHANGE, MIDI_STATUS_NOTE_OFF,
    MIDI_STATUS_NOTE_ON, MIDI_STATUS_PITCH_WHEEL_CONTROL, MIDI_STATUS_POLYPHONIC_AFTERTOUCH,
    MIDI_STATUS_PROGRAM_CHANGE,
};
use crate::parameter::ParameterSpecial;
use crate::ports::{PluginLayout, MAX_AUDIO_PORTS};
use crate::postponed::{PostponedEvent, RtDiagnostic};
use crate::postprocess::{self, PostProcess};
use crate::{PluginHints, PluginOptions};
use ringbuf::traits::Consumer;
use smallvec::SmallVec;
use std::sync::atomic::Ordering;

/// Per-call translation state.
struct Translation {
    options: PluginOptions,
    hints: PluginHints,
    ctrl_channel: u8,
    has_midi_in: bool,
    next_bank: u32,
    all_notes_off_sent: bool,
    midi_dropped: u32,
}

impl PluginInstance {
    /// Render `frames` frames.
    ///
    /// `inputs` and `outputs` must hold at least as many channels as the
    /// plugin's host audio ports, each at least `frames` long. `events` must be
    /// sorted by time with every time below `frames`. If any lock is
    /// contended (outside offline mode) the affected range is silence and
    /// [`lock_misses`](Self::lock_misses) is incremented.
    pub fn process(
        &self,
        inputs: &[&[f32]],
        outputs: &mut [&mut [f32]],
        events: &[EngineEvent],
        frames: usize,
    ) {
        if frames == 0 {
            return;
        }

        let offline = self.engine.is_offline();
        let guard = if offline {
            Some(self.master.lock())
        } else {
            self.master.try_lock()
        };
        let Some(mut guard) = guard else {
            silence(outputs, 0, frames);
            self.lock_misses.fetch_add(1, Ordering::Relaxed);
            return;
        };
        let engine = &mut *guard;
        let layout = self.layout.load();

        let time = self.engine.time_info();
        engine.time = time;

        if !self.is_enabled() || !self.is_active() {
            silence(outputs, 0, frames);
            engine.last_frame = time.frame;
            return;
        }

        if frames > engine.balance_scratch.len()
            || inputs.len() < layout.audio_in.len()
            || outputs.len() < layout.audio_out.len()
            || inputs.iter().take(layout.audio_in.len()).any(|b| b.len() < frames)
            || outputs.iter().take(layout.audio_out.len()).any(|b| b.len() < frames)
        {
            silence(outputs, 0, frames);
            self.lock_misses.fetch_add(1, Ordering::Relaxed);
            return;
        }

        let hints = self.hints();
        if hints.contains(PluginHints::USES_TIME) {
            if time.frame < engine.last_frame {
                self.postponed.push(PostponedEvent::TransportRelocated);
                self.needs_reset.store(true, Ordering::Release);
            }
            engine.last_frame = time.frame;
            if !time.playing {
                silence(outputs, 0, frames);
                return;
            }
        } else {
            engine.last_frame = time.frame;
        }

        let mut tr = Translation {
            options: self.options(),
            hints,
            ctrl_channel: self.ctrl_channel(),
            has_midi_in: !layout.midi_in.is_empty(),
            next_bank: self
                .current_midi_program()
                .and_then(|index| layout.midi_programs.get(index))
                .map_or(0, |p| p.bank),
            all_notes_off_sent: false,
            midi_dropped: 0,
        };

        engine.midi.clear();
        engine.silenced.clear();
        if self.needs_reset.swap(false, Ordering::AcqRel) {
            if tr.has_midi_in {
                if tr.options.contains(PluginOptions::SEND_ALL_SOUND_OFF) {
                    for event in all_sound_off() {
                        push_midi(&mut engine.midi, event, &mut tr.midi_dropped);
                    }
                } else if tr.ctrl_channel < MAX_MIDI_CHANNELS {
                    for event in all_notes_off(tr.ctrl_channel) {
                        push_midi(&mut engine.midi, event, &mut tr.midi_dropped);
                    }
                }
            }
            engine.clear_latency_buffers();
        }

        while let Some(note) = engine.ext_notes.try_pop() {
            if !tr.has_midi_in {
                continue;
            }
            let event = if note.velocity > 0 {
                self.postponed.push(PostponedEvent::NoteOn {
                    channel: note.channel,
                    note: note.note,
                    velocity: note.velocity,
                });
                MidiEvent::note_on(0, note.channel, note.note, note.velocity)
            } else {
                self.postponed.push(PostponedEvent::NoteOff {
                    channel: note.channel,
                    note: note.note,
                });
                MidiEvent::note_off(0, note.channel, note.note)
            };
            push_midi(&mut engine.midi, event, &mut tr.midi_dropped);
        }

        let sample_accurate = !tr.options.contains(PluginOptions::FIXED_BUFFERS);
        let mut offset = 0usize;

        for event in events {
            let mut time = (event.time as usize).min(frames - 1);
            if time < offset {
                self.postponed
                    .push(PostponedEvent::Diagnostic(RtDiagnostic::TimingError {
                        time: event.time,
                        offset: offset as u32,
                    }));
                time = offset;
            }

            if sample_accurate && time > offset {
                if self.run_segment(engine, &layout, inputs, outputs, offset, time - offset, offline) {
                    offset = time;
                    engine.midi.clear();
                }
            }

            self.translate_event(engine, &layout, event, (time - offset) as u32, &mut tr);
        }

        if frames > offset {
            self.run_segment(engine, &layout, inputs, outputs, offset, frames - offset, offline);
        }
        engine.midi.clear();

        if tr.midi_dropped > 0 {
            self.dropped_midi
                .fetch_add(u64::from(tr.midi_dropped), Ordering::Relaxed);
            self.postponed
                .push(PostponedEvent::Diagnostic(RtDiagnostic::MidiOverflow {
                    dropped: tr.midi_dropped,
                }));
        }

        if self.config.process_mode == ProcessMode::Bridge {
            return;
        }

        let params = PostProcess {
            hints,
            custom_mono_out: layout.forced_stereo_out && !layout.forced_stereo_in,
            mono_input: layout.audio_in.len() == 1,
            dry_wet: self.dry_wet(),
            volume: self.volume(),
            balance_left: self.balance_left(),
            balance_right: self.balance_right(),
        };
        let audio_ins = layout.audio_in.len();
        let audio_outs = layout.audio_out.len();
        postprocess::apply(
            &params,
            &inputs[..audio_ins],
            &mut outputs[..audio_outs],
            frames,
            &mut engine.latency_buffers,
            &mut engine.balance_scratch,
        );

        // Dry/wet must not refill a range the plugin never rendered
        for &(start, end) in &engine.silenced {
            silence(&mut outputs[..audio_outs], start, end);
        }
    }

    /// Run every handle over `[offset, offset + len)`. Returns false, with the
    /// range silenced, if the parameter lock was contended.
    #[allow(clippy::too_many_arguments)]
    fn run_segment(
        &self,
        engine: &mut EngineState,
        layout: &PluginLayout,
        inputs: &[&[f32]],
        outputs: &mut [&mut [f32]],
        offset: usize,
        len: usize,
        offline: bool,
    ) -> bool {
        let end = offset + len;
        let single = if offline {
            Some(self.single.lock())
        } else {
            self.single.try_lock()
        };
        let Some(mut single) = single else {
            silence(&mut outputs[..layout.audio_out.len()], offset, end);
            mark_silenced(&mut engine.silenced, offset, end);
            self.lock_misses.fetch_add(1, Ordering::Relaxed);
            return false;
        };

        for &(index, value) in &engine.pending {
            if index < single.values.len() {
                single.values[index] = value;
                single.dirty[index] = true;
            }
        }
        engine.pending.clear();
        single.flush(&mut engine.handles, layout);

        let EngineState {
            handles,
            midi,
            time,
            reported_latency,
            ..
        } = engine;

        let mut segment_time = *time;
        segment_time.frame += offset as u64;
        let ctx = ProcessContext::new(len).midi(midi).time_info(&segment_time);

        let native_ins = layout.native.audio_ins;
        let native_outs = layout.native.audio_outs;

        for (h, handle) in handles.iter_mut().enumerate() {
            let ins: SmallVec<[&[f32]; MAX_AUDIO_PORTS]> = if layout.forced_stereo_in {
                inputs.get(h).map(|b| &b[offset..end]).into_iter().collect()
            } else {
                inputs.iter().take(native_ins).map(|b| &b[offset..end]).collect()
            };
            let mut outs: SmallVec<[&mut [f32]; MAX_AUDIO_PORTS]> = if layout.forced_stereo_out {
                outputs.iter_mut().skip(h).take(1).map(|b| &mut b[offset..end]).collect()
            } else if h == 0 {
                outputs.iter_mut().take(native_outs).map(|b| &mut b[offset..end]).collect()
            } else {
                SmallVec::new()
            };

            for out in outs.iter_mut() {
                out.fill(0.0);
            }
            if guarded("process", || handle.process(&ins, &mut outs, &ctx)).is_err() {
                for out in outs.iter_mut() {
                    out.fill(0.0);
                }
                self.postponed
                    .push(PostponedEvent::Diagnostic(RtDiagnostic::CallPanicked("process")));
            }
        }

        let Some(handle) = handles.first() else {
            return true;
        };
        for (index, param) in layout.parameters.iter().enumerate() {
            if !param.is_output() || param.data.special == ParameterSpecial::SampleRate {
                continue;
            }
            let Ok(value) = guarded("parameter_value", || handle.parameter_value(param.data.rindex))
            else {
                continue;
            };
            if !value.is_finite() {
                continue;
            }
            let value = param.fix_value(value);
            if let Some(slot) = single.values.get_mut(index) {
                *slot = value;
            }

            if layout.latency_index == Some(index) {
                let frames = value.round().max(0.0) as u32;
                if frames != *reported_latency {
                    *reported_latency = frames;
                    self.postponed
                        .push(PostponedEvent::LatencyChanged { frames });
                }
            }
        }

        true
    }

    fn translate_event(
        &self,
        engine: &mut EngineState,
        layout: &PluginLayout,
        event: &EngineEvent,
        time: u32,
        tr: &mut Translation,
    ) {
        let channel = event.channel;

        match event.kind {
            EngineEventKind::Control(ControlEvent::Parameter { param, value }) => {
                if value.is_nan() {
                    return;
                }
                let value = value.clamp(0.0, 1.0);

                if channel == NON_MIDI_CHANNEL {
                    if let Some(p) = layout.parameters.get(param as usize) {
                        if p.is_input() {
                            let value = p.fix_value(p.ranges.unnormalize_with_hints(value, p.data.hints));
                            self.queue_parameter(engine, param as usize, value);
                        }
                    }
                    return;
                }
                if channel >= MAX_MIDI_CHANNELS {
                    return;
                }

                if channel == tr.ctrl_channel {
                    self.internal_controller(param, value, tr.hints);
                }

                if param < u16::from(MAX_MIDI_VALUE) {
                    let cc = param as u8;
                    for (index, p) in layout.parameters.iter().enumerate() {
                        if p.data.midi_channel != channel
                            || p.data.midi_cc != Some(cc)
                            || !p.is_automable_input()
                        {
                            continue;
                        }
                        let value = p.fix_value(p.ranges.unnormalize_with_hints(value, p.data.hints));
                        self.queue_parameter(engine, index, value);
                    }

                    if tr.has_midi_in && tr.options.contains(PluginOptions::SEND_CONTROL_CHANGES) {
                        let data = ((value * 127.0) + 0.5).min(127.0) as u8;
                        push_midi(
                            &mut engine.midi,
                            MidiEvent::control_change(time, channel, cc, data),
                            &mut tr.midi_dropped,
                        );
                    }
                }
            }

            EngineEventKind::Control(ControlEvent::MidiBank(bank)) => {
                if channel >= MAX_MIDI_CHANNELS {
                    return;
                }
                if channel == tr.ctrl_channel && tr.options.contains(PluginOptions::MAP_PROGRAM_CHANGES) {
                    tr.next_bank = u32::from(bank);
                } else if tr.has_midi_in && tr.options.contains(PluginOptions::SEND_PROGRAM_CHANGES) {
                    push_midi(
                        &mut engine.midi,
                        MidiEvent::control_change(time, channel, MIDI_CONTROL_BANK_SELECT, (bank & 0x7F) as u8),
                        &mut tr.midi_dropped,
                    );
                }
            }

            EngineEventKind::Control(ControlEvent::MidiProgram(program)) => {
                if channel >= MAX_MIDI_CHANNELS {
                    return;
                }
                if channel == tr.ctrl_channel && tr.options.contains(PluginOptions::MAP_PROGRAM_CHANGES) {
                    self.select_program_rt(engine, layout, tr, u32::from(program));
                } else if tr.has_midi_in && tr.options.contains(PluginOptions::SEND_PROGRAM_CHANGES) {
                    push_midi(
                        &mut engine.midi,
                        MidiEvent::program_change(time, channel, (program & 0x7F) as u8),
                        &mut tr.midi_dropped,
                    );
                }
            }

            EngineEventKind::Control(ControlEvent::AllSoundOff) => {
                if channel < MAX_MIDI_CHANNELS
                    && tr.has_midi_in
                    && tr.options.contains(PluginOptions::SEND_ALL_SOUND_OFF)
                {
                    push_midi(
                        &mut engine.midi,
                        MidiEvent::control_change(time, channel, MIDI_CONTROL_ALL_SOUND_OFF, 0),
                        &mut tr.midi_dropped,
                    );
                }
            }

            EngineEventKind::Control(ControlEvent::AllNotesOff) => {
                if channel >= MAX_MIDI_CHANNELS
                    || !tr.options.contains(PluginOptions::SEND_ALL_SOUND_OFF)
                {
                    return;
                }
                if channel == tr.ctrl_channel && !tr.all_notes_off_sent {
                    tr.all_notes_off_sent = true;
                    self.postponed.push(PostponedEvent::AllNotesOff);
                }
                if tr.has_midi_in {
                    push_midi(
                        &mut engine.midi,
                        MidiEvent::control_change(time, channel, MIDI_CONTROL_ALL_NOTES_OFF, 0),
                        &mut tr.midi_dropped,
                    );
                }
            }

            EngineEventKind::Midi(midi) => {
                if !tr.has_midi_in {
                    return;
                }
                let status = midi.status();
                let allowed = match status {
                    MIDI_STATUS_CONTROL_CHANGE => tr.options.contains(PluginOptions::SEND_CONTROL_CHANGES),
                    MIDI_STATUS_CHANNEL_PRESSURE => tr.options.contains(PluginOptions::SEND_CHANNEL_PRESSURE),
                    MIDI_STATUS_POLYPHONIC_AFTERTOUCH => {
                        tr.options.contains(PluginOptions::SEND_NOTE_AFTERTOUCH)
                    }
                    MIDI_STATUS_PITCH_WHEEL_CONTROL => tr.options.contains(PluginOptions::SEND_PITCHBEND),
                    MIDI_STATUS_PROGRAM_CHANGE => tr.options.contains(PluginOptions::SEND_PROGRAM_CHANGES),
                    _ => true,
                };
                if !allowed {
                    return;
                }

                let midi = MidiEvent { time, ..midi.normalized() };
                match midi.status() {
                    MIDI_STATUS_NOTE_ON => {
                        self.postponed.push(PostponedEvent::NoteOn {
                            channel: midi.channel(),
                            note: midi.data[1],
                            velocity: midi.data[2],
                        });
                    }
                    MIDI_STATUS_NOTE_OFF => {
                        self.postponed.push(PostponedEvent::NoteOff {
                            channel: midi.channel(),
                            note: midi.data[1],
                        });
                    }
                    _ => {}
                }
                push_midi(&mut engine.midi, midi, &mut tr.midi_dropped);
            }
        }
    }

    /// Breath, volume and balance controllers on the control channel.
    fn internal_controller(&self, param: u16, value: f32, hints: PluginHints) {
        let Ok(cc) = u8::try_from(param) else {
            return;
        };

        match cc {
            MIDI_CONTROL_BREATH_CONTROLLER if hints.contains(PluginHints::CAN_DRYWET) => {
                self.dry_wet.store(value, Ordering::Release);
                self.postpone_internal(InternalControl::DryWet, value);
            }
            MIDI_CONTROL_CHANNEL_VOLUME if hints.contains(PluginHints::CAN_VOLUME) => {
                let volume = value * 127.0 / 100.0;
                self.volume.store(volume, Ordering::Release);
                self.postpone_internal(InternalControl::Volume, volume);
            }
            MIDI_CONTROL_BALANCE if hints.contains(PluginHints::CAN_BALANCE) => {
                let (left, right) = balance_from_controller(value);
                self.balance_left.store(left, Ordering::Release);
                self.balance_right.store(right, Ordering::Release);
                self.postpone_internal(InternalControl::BalanceLeft, left);
                self.postpone_internal(InternalControl::BalanceRight, right);
            }
            _ => {}
        }
    }

    fn postpone_internal(&self, control: InternalControl, value: f32) {
        self.postponed
            .push(PostponedEvent::InternalValueChanged { control, value });
    }

    fn select_program_rt(&self, engine: &mut EngineState, layout: &PluginLayout, tr: &Translation, program: u32) {
        if !layout.midi_programs.is_empty() {
            let Some(index) = layout.midi_program_index(tr.next_bank, program) else {
                return;
            };
            let bank = tr.next_bank;
            for handle in engine.handles.iter_mut() {
                if guarded("select_midi_program", || handle.select_midi_program(tr.ctrl_channel, bank, program)).is_err() {
                    self.postponed
                        .push(PostponedEvent::Diagnostic(RtDiagnostic::CallPanicked("select_midi_program")));
                }
            }
            self.current_midi_program.store(index as i32, Ordering::Release);
            self.postponed.push(PostponedEvent::MidiProgramChanged { index });
            return;
        }

        let index = program as usize;
        if index < layout.programs.len() {
            for handle in engine.handles.iter_mut() {
                if guarded("select_program", || handle.select_program(index)).is_err() {
                    self.postponed
                        .push(PostponedEvent::Diagnostic(RtDiagnostic::CallPanicked("select_program")));
                }
            }
            self.current_program.store(index as i32, Ordering::Release);
            self.postponed.push(PostponedEvent::ProgramChanged { index });
        }
    }

    /// Queue a decoded parameter change for the next sub-call.
    fn queue_parameter(&self, engine: &mut EngineState, index: usize, value: f32) {
        if let Some(slot) = engine.pending.iter_mut().find(|(i, _)| *i == index) {
            slot.1 = value;
        } else if engine.pending.len() < engine.pending.capacity() {
            engine.pending.push((index, value));
        } else {
            return;
        }
        self.postponed.push(PostponedEvent::ParameterChanged {
            index: index as u32,
            value,
        });
    }
}

/// Split a normalized balance controller into left and right balance.
pub fn balance_from_controller(value: f32) -> (f32, f32) {
    let value = value / 0.5 - 1.0;
    if value < 0.0 {
        (-1.0, value * 2.0 + 1.0)
    } else if value > 0.0 {
        (value * 2.0 - 1.0, 1.0)
    } else {
        (-1.0, 1.0)
    }
}

#[inline]
fn push_midi(midi: &mut Vec<MidiEvent>, event: MidiEvent, dropped: &mut u32) {
    if midi.len() < MAX_MIDI_EVENTS {
        midi.push(event);
    } else {
        *dropped += 1;
    }
}

fn silence(outputs: &mut [&mut [f32]], start: usize, end: usize) {
    for out in outputs.iter_mut() {
        let end = end.min(out.len());
        if start < end {
            out[start..end].fill(0.0);
        }
    }
}

/// Record `[start, end)`, merging with the previous range when they touch.
/// Never grows past the preallocated capacity.
fn mark_silenced(ranges: &mut Vec<(usize, usize)>, start: usize, end: usize) {
    let full = ranges.len() == ranges.capacity();
    if let Some(last) = ranges.last_mut() {
        if full || last.1 >= start {
            last.1 = last.1.max(end);
            return;
        }
    }
    ranges.push((start, end));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{FormatInstance, InternalAdapter, PluginInfo, PortInfo};
    use crate::config::EngineOptions;
    use crate::host::{EngineCallbacks, HostCallbacks};
    use crate::instance::PluginInit;
    use std::sync::Arc;

    struct FixedEngine;

    impl EngineCallbacks for FixedEngine {
        fn buffer_size(&self) -> u32 {
            64
        }

        fn sample_rate(&self) -> f64 {
            48000.0
        }
    }

    /// Mono effect that writes a constant.
    struct Constant;

    impl FormatInstance for Constant {
        fn ports(&self) -> Vec<PortInfo> {
            vec![PortInfo::audio_in(0, "In"), PortInfo::audio_out(1, "Out")]
        }

        fn parameter_value(&self, _rindex: u32) -> f32 {
            0.0
        }

        fn set_parameter_value(&mut self, _rindex: u32, _value: f32) {}

        fn process(&mut self, _inputs: &[&[f32]], outputs: &mut [&mut [f32]], _ctx: &ProcessContext) {
            for out in outputs.iter_mut() {
                out.fill(0.8);
            }
        }
    }

    fn constant_instance() -> Arc<PluginInstance> {
        let adapter = InternalAdapter::new(PluginInfo::new("Constant", "constant"), |_host: Arc<dyn HostCallbacks>| {
            Ok(Box::new(Constant) as Box<dyn FormatInstance>)
        });
        let plugin = PluginInstance::new(
            Arc::new(adapter),
            Arc::new(FixedEngine),
            EngineOptions::default(),
            PluginInit::new(1),
        )
        .unwrap();
        plugin.set_active(true);
        plugin
    }

    #[test]
    fn test_contended_single_stays_silent_through_dry_wet() {
        let plugin = constant_instance();
        assert!(plugin.hints().contains(PluginHints::CAN_DRYWET));
        plugin.set_dry_wet(0.5);

        let input = vec![1.0f32; 64];
        let mut out = vec![1.0f32; 64];
        {
            let _held = plugin.single.lock();
            plugin.process(&[&input[..]], &mut [&mut out[..]], &[], 64);
        }
        assert!(out.iter().all(|&s| s == 0.0));
        assert_eq!(plugin.lock_misses(), 1);

        plugin.process(&[&input[..]], &mut [&mut out[..]], &[], 64);
        assert!(out.iter().all(|&s| (s - 0.9).abs() < 1e-6));
    }

    #[test]
    fn test_mark_silenced_merges_and_stays_bounded() {
        let mut ranges = Vec::with_capacity(2);
        mark_silenced(&mut ranges, 0, 8);
        mark_silenced(&mut ranges, 8, 16);
        assert_eq!(ranges, vec![(0, 16)]);

        mark_silenced(&mut ranges, 32, 40);
        mark_silenced(&mut ranges, 48, 56);
        assert_eq!(ranges, vec![(0, 16), (32, 56)]);
        assert_eq!(ranges.capacity(), 2);
    }

    #[test]
    fn test_balance_from_controller() {
        assert_eq!(balance_from_controller(0.5), (-1.0, 1.0));
        assert_eq!(balance_from_controller(0.0), (-1.0, -1.0));
        assert_eq!(balance_from_controller(1.0), (1.0, 1.0));

        let (left, right) = balance_from_controller(0.25);
        assert_eq!(left, -1.0);
        assert!((right - 0.0).abs() < 1e-6);
    }

    #[test]
    fn test_push_midi_respects_limit() {
        let mut midi = Vec::with_capacity(MAX_MIDI_EVENTS);
        let mut dropped = 0;
        for i in 0..(MAX_MIDI_EVENTS + 3) {
            push_midi(&mut midi, MidiEvent::note_on(i as u32, 0, 60, 100), &mut dropped);
        }
        assert_eq!(midi.len(), MAX_MIDI_EVENTS);
        assert_eq!(dropped, 3);
    }

    #[test]
    fn test_silence_range() {
        let mut a = vec![1.0f32; 8];
        let mut b = vec![1.0f32; 8];
        {
            let mut outputs: Vec<&mut [f32]> = vec![&mut a, &mut b];
            silence(&mut outputs, 2, 5);
        }
        assert_eq!(a, [1.0, 1.0, 0.0, 0.0, 0.0, 1.0, 1.0, 1.0]);
        assert_eq!(b[4], 0.0);
    }
}
