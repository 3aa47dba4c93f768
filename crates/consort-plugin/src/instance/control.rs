//! Control-thread edits: parameters, programs, custom data, UI and idle.

use super::PluginInstance;
use crate::adapter::{guarded, PluginOpcode};
use crate::host::{HostNotification, HostOpcode, InternalControl};
use crate::midi::MAX_MIDI_NOTE;
use crate::parameter::ParameterType;
use crate::postponed::{PostponedEvent, RtDiagnostic};
use crate::state::CustomDataType;
use crate::ui_bridge::{UiBridge, UiBridgeTarget, UiSyncState};
use crate::{PluginError, PluginHints, Result};
use std::sync::atomic::Ordering;
use std::sync::Arc;

impl PluginInstance {
    /// Current value of parameter `index`, as last written or read back.
    pub fn parameter_value(&self, index: usize) -> f32 {
        self.single.lock().values.get(index).copied().unwrap_or(0.0)
    }

    /// Text the plugin renders for the current value, if it provides one.
    pub fn parameter_text(&self, index: usize) -> Option<String> {
        let param = self.parameter(index)?;
        let value = self.parameter_value(index);
        let engine = self.master.lock();
        let handle = engine.handles.first()?;
        guarded("parameter_text", || handle.parameter_text(param.data.rindex, value))
            .ok()
            .flatten()
    }

    /// Set an input parameter. The value is clamped and quantized first and
    /// reaches the plugin before its next processed frame.
    pub fn set_parameter_value(&self, index: usize, value: f32, send_ui: bool, notify: bool) {
        let layout = self.layout.load();
        let Some(param) = layout.parameters.get(index) else {
            tracing::warn!("Plugin '{}': no parameter {}", self.name, index);
            return;
        };
        if param.data.kind != ParameterType::Input {
            tracing::warn!(
                "Plugin '{}': parameter '{}' is not an input",
                self.name,
                param.name
            );
            return;
        }

        let value = param.fix_value(value);
        {
            let mut single = self.single.lock();
            if index < single.values.len() {
                single.values[index] = value;
                single.dirty[index] = true;
            }
        }

        if notify {
            self.engine.notify(HostNotification::ParameterValueChanged {
                plugin_id: self.id,
                index: index as u32,
                value,
            });
        }
        if send_ui {
            self.with_ui(|ui| ui.send_control(param.data.rindex, value));
        }
    }

    pub fn set_parameter_value_by_rindex(&self, rindex: u32, value: f32, send_ui: bool, notify: bool) {
        match self.layout.load().parameter_by_rindex(rindex) {
            Some(index) => self.set_parameter_value(index, value, send_ui, notify),
            None => tracing::warn!("Plugin '{}': no parameter with native index {}", self.name, rindex),
        }
    }

    /// Map parameter `index` to controller `cc`, or unmap it with `None`.
    pub fn set_parameter_midi_cc(&self, index: usize, cc: Option<u8>) -> Result<()> {
        if cc.is_some_and(|cc| cc >= 0x78) {
            return Err(PluginError::OutOfRange {
                what: "midi cc",
                index: cc.map_or(0, usize::from),
                count: 0x78,
            });
        }
        self.update_parameter(index, |param| param.data.midi_cc = cc)
    }

    pub fn set_parameter_midi_channel(&self, index: usize, channel: u8) -> Result<()> {
        if channel >= 16 {
            return Err(PluginError::OutOfRange {
                what: "midi channel",
                index: channel as usize,
                count: 16,
            });
        }
        self.update_parameter(index, |param| param.data.midi_channel = channel)
    }

    fn update_parameter(&self, index: usize, f: impl FnOnce(&mut crate::parameter::Parameter)) -> Result<()> {
        let _engine = self.master.lock();
        let mut layout = (**self.layout.load()).clone();
        let count = layout.parameters.len();
        let param = layout
            .parameters
            .get_mut(index)
            .ok_or(PluginError::OutOfRange {
                what: "parameter",
                index,
                count,
            })?;
        f(param);
        self.layout.store(Arc::new(layout));
        Ok(())
    }

    /// Select program `index` on every handle, or clear the selection.
    pub fn set_program(&self, index: Option<usize>, send_ui: bool) -> Result<()> {
        let count = self.layout.load().programs.len();
        if let Some(index) = index {
            if index >= count {
                return Err(PluginError::OutOfRange {
                    what: "program",
                    index,
                    count,
                });
            }
            let mut engine = self.master.lock();
            for handle in engine.handles.iter_mut() {
                guarded("select_program", || handle.select_program(index))?;
            }
        }

        self.current_program
            .store(index.map_or(-1, |i| i as i32), Ordering::Release);
        self.refresh_parameter_values();

        self.engine.notify(HostNotification::ProgramChanged {
            plugin_id: self.id,
            index,
        });
        if send_ui {
            if let Some(index) = index {
                self.with_ui(|ui| ui.send_program(-1, index as i32));
            }
        }
        Ok(())
    }

    pub fn set_midi_program(&self, index: Option<usize>, send_ui: bool) -> Result<()> {
        let layout = self.layout.load_full();
        let program = match index {
            Some(index) => Some(layout.midi_programs.get(index).ok_or(PluginError::OutOfRange {
                what: "midi program",
                index,
                count: layout.midi_programs.len(),
            })?),
            None => None,
        };

        if let Some(program) = program {
            let channel = self.ctrl_channel();
            let mut engine = self.master.lock();
            for handle in engine.handles.iter_mut() {
                guarded("select_midi_program", || {
                    handle.select_midi_program(channel, program.bank, program.program)
                })?;
            }
        }

        self.current_midi_program
            .store(index.map_or(-1, |i| i as i32), Ordering::Release);
        self.refresh_parameter_values();

        self.engine.notify(HostNotification::MidiProgramChanged {
            plugin_id: self.id,
            index,
        });
        if send_ui {
            if let Some(program) = program {
                self.with_ui(|ui| ui.send_program(program.bank as i32, program.program as i32));
            }
        }
        Ok(())
    }

    pub fn set_midi_program_by_id(&self, bank: u32, program: u32, send_ui: bool) -> Result<()> {
        let layout = self.layout.load();
        let index = layout
            .midi_program_index(bank, program)
            .ok_or(PluginError::OutOfRange {
                what: "midi program",
                index: program as usize,
                count: layout.midi_programs.len(),
            })?;
        self.set_midi_program(Some(index), send_ui)
    }

    /// Pull input values back from the plugin after it changed them itself.
    pub fn refresh_parameter_values(&self) {
        let mut engine = self.master.lock();
        let layout = self.layout.load();
        let mut single = self.single.lock();
        single.flush(&mut engine.handles, &layout);

        let Some(handle) = engine.handles.first() else {
            return;
        };
        let mut changed = Vec::new();
        for (index, param) in layout.parameters.iter().enumerate() {
            if !param.is_input() {
                continue;
            }
            let Ok(reported) = guarded("parameter_value", || handle.parameter_value(param.data.rindex))
            else {
                continue;
            };
            if !reported.is_finite() {
                continue;
            }
            let value = param.fix_value(reported);
            if single.values.get(index).is_some_and(|v| *v != value) {
                single.values[index] = value;
                changed.push((index, value));
            }
        }
        drop(single);

        if engine.handles.len() > 1 {
            for &(index, value) in &changed {
                let rindex = layout.parameters[index].data.rindex;
                for handle in engine.handles.iter_mut().skip(1) {
                    let _ = guarded("set_parameter_value", || handle.set_parameter_value(rindex, value));
                }
            }
        }
        drop(engine);

        for (index, value) in changed {
            self.engine.notify(HostNotification::ParameterValueChanged {
                plugin_id: self.id,
                index: index as u32,
                value,
            });
        }
    }

    pub fn custom_data(&self, kind: CustomDataType, key: &str) -> Option<String> {
        self.custom_data.lock().get(kind, key).map(str::to_string)
    }

    /// Store a key/value pair and forward it to the plugin.
    pub fn set_custom_data(&self, kind: CustomDataType, key: &str, value: &str, send_ui: bool) {
        if key.is_empty() {
            tracing::warn!("Plugin '{}': ignoring custom data with empty key", self.name);
            return;
        }

        self.custom_data.lock().set(kind, key, value);
        {
            let mut engine = self.master.lock();
            for handle in engine.handles.iter_mut() {
                if let Err(err) = guarded("set_custom_data", || handle.set_custom_data(kind, key, value)) {
                    tracing::warn!("Plugin '{}': {}", self.name, err);
                }
            }
        }

        self.engine.notify(HostNotification::CustomDataChanged {
            plugin_id: self.id,
            key: key.to_string(),
        });
        if send_ui && kind == CustomDataType::String {
            self.with_ui(|ui| ui.send_configure(key, value));
        }
    }

    pub fn is_ui_visible(&self) -> bool {
        self.ui_visible.load(Ordering::Acquire)
    }

    /// Show or hide the plugin's editor.
    ///
    /// External editors run in a child process through the UI bridge; plugins
    /// with an in-process editor are asked directly.
    pub fn show_custom_ui(self: &Arc<Self>, show: bool) -> Result<()> {
        let binary = self
            .config
            .ui_bridge
            .binary
            .clone()
            .or_else(|| self.adapter.ui_bridge_binary());

        if let Some(binary) = binary {
            let mut ui = self.ui.lock();
            if show {
                if ui.as_ref().is_some_and(|bridge| !bridge.is_finished()) {
                    return Ok(());
                }
                // Set first: a UI that dies at once clears it from the supervisor.
                self.ui_visible.store(true, Ordering::Release);
                let target: Arc<dyn UiBridgeTarget> = self.clone();
                let bridge = UiBridge::spawn(
                    binary,
                    Arc::downgrade(&target),
                    self.filename.clone().unwrap_or_default(),
                    self.label().to_string(),
                    format!("{} (GUI)", self.name),
                    self.config.ui_bridge.clone(),
                );
                match bridge {
                    Ok(bridge) => *ui = Some(bridge),
                    Err(err) => {
                        self.ui_visible.store(false, Ordering::Release);
                        return Err(err);
                    }
                }
            } else if let Some(mut bridge) = ui.take() {
                drop(ui);
                bridge.stop_now();
                self.ui_visible.store(false, Ordering::Release);
            }
            return Ok(());
        }

        if !self.hints().contains(PluginHints::HAS_CUSTOM_UI) {
            self.engine
                .notify(HostNotification::UiUnavailable { plugin_id: self.id });
            return Err(PluginError::UiBridge(format!(
                "plugin '{}' has no custom UI",
                self.name
            )));
        }

        let mut engine = self.master.lock();
        if let Some(handle) = engine.handles.first_mut() {
            guarded("ui_show", || handle.ui_show(show))?;
        }
        self.ui_visible.store(show, Ordering::Release);
        Ok(())
    }

    /// Run `f` on the UI bridge if one is up and its lock is free.
    pub(crate) fn with_ui<R>(&self, f: impl FnOnce(&UiBridge) -> R) -> Option<R> {
        let guard = self.ui.try_lock()?;
        guard.as_ref().map(f)
    }

    /// Control-thread housekeeping. Call regularly from a non-realtime thread.
    ///
    /// Delivers everything the audio thread postponed, services the plugin's
    /// in-process editor and reaps a finished UI bridge.
    pub fn idle(&self) {
        let mut handled = 0usize;
        while let Some(event) = self.postponed.pop() {
            self.handle_postponed(event);
            handled += 1;
            if handled >= self.postponed.capacity() * 2 {
                break;
            }
        }

        let layout = self.layout.load();
        if layout.parameters.iter().any(|p| p.is_output()) {
            let values = self.single.lock().values.clone();
            self.with_ui(|ui| {
                for (param, value) in layout.parameters.iter().zip(values) {
                    if param.is_output() {
                        ui.send_control(param.data.rindex, value);
                    }
                }
            });
        }

        if self.is_ui_visible() && self.hints().contains(PluginHints::HAS_CUSTOM_UI) {
            if let Some(mut engine) = self.master.try_lock() {
                if let Some(handle) = engine.handles.first_mut() {
                    let _ = guarded("ui_idle", || handle.ui_idle());
                }
            }
        }

        let finished = {
            let mut ui = self.ui.lock();
            if ui.as_ref().is_some_and(UiBridge::is_finished) {
                ui.take()
            } else {
                None
            }
        };
        if let Some(mut bridge) = finished {
            bridge.stop_now();
            self.ui_visible.store(false, Ordering::Release);
        }
    }

    fn handle_postponed(&self, event: PostponedEvent) {
        match event {
            PostponedEvent::ParameterChanged { index, value } => {
                self.engine.notify(HostNotification::ParameterValueChanged {
                    plugin_id: self.id,
                    index,
                    value,
                });
                if let Some(param) = self.parameter(index as usize) {
                    self.with_ui(|ui| ui.send_control(param.data.rindex, value));
                }
            }
            PostponedEvent::InternalValueChanged { control, value } => {
                self.notify_internal(control, value);
            }
            PostponedEvent::ProgramChanged { index } => {
                self.refresh_parameter_values();
                self.engine.notify(HostNotification::ProgramChanged {
                    plugin_id: self.id,
                    index: Some(index),
                });
                self.with_ui(|ui| ui.send_program(-1, index as i32));
            }
            PostponedEvent::MidiProgramChanged { index } => {
                self.refresh_parameter_values();
                self.engine.notify(HostNotification::MidiProgramChanged {
                    plugin_id: self.id,
                    index: Some(index),
                });
                if let Some(program) = self.layout.load().midi_programs.get(index) {
                    self.with_ui(|ui| ui.send_program(program.bank as i32, program.program as i32));
                }
            }
            PostponedEvent::NoteOn {
                channel,
                note,
                velocity,
            } => {
                self.engine.notify(HostNotification::NoteOn {
                    plugin_id: self.id,
                    channel,
                    note,
                    velocity,
                });
                self.with_ui(|ui| ui.send_midi([0, 0x90 | channel, note, velocity]));
            }
            PostponedEvent::NoteOff { channel, note } => {
                self.engine.notify(HostNotification::NoteOff {
                    plugin_id: self.id,
                    channel,
                    note,
                });
                self.with_ui(|ui| ui.send_midi([0, 0x80 | channel, note, 0]));
            }
            PostponedEvent::AllNotesOff => {
                let channel = self.ctrl_channel();
                self.with_ui(|ui| {
                    for note in 0..MAX_MIDI_NOTE {
                        ui.send_midi([0, 0x80 | channel, note, 0]);
                    }
                });
            }
            PostponedEvent::LatencyChanged { frames } => self.apply_latency(frames),
            PostponedEvent::TransportRelocated => {
                let mut engine = self.master.lock();
                for handle in engine.handles.iter_mut() {
                    let _ = guarded("dispatcher", || {
                        handle.dispatcher(PluginOpcode::TransportRelocated, 0, 0, 0.0)
                    });
                }
            }
            PostponedEvent::HostRequest(opcode) => self.handle_host_request(opcode),
            PostponedEvent::Diagnostic(diagnostic) => match diagnostic {
                RtDiagnostic::TimingError { time, offset } => tracing::warn!(
                    "Plugin '{}': event at frame {} arrived before split point {}",
                    self.name,
                    time,
                    offset
                ),
                RtDiagnostic::MidiOverflow { dropped } => tracing::warn!(
                    "Plugin '{}': dropped {} MIDI events over the per-call limit",
                    self.name,
                    dropped
                ),
                RtDiagnostic::CallPanicked(call) => {
                    tracing::error!("Plugin '{}': `{}` panicked on the audio thread", self.name, call)
                }
            },
        }
    }

    fn handle_host_request(&self, opcode: HostOpcode) {
        let result = match opcode {
            HostOpcode::ReloadParameters | HostOpcode::ReloadAll => self.reload(),
            HostOpcode::ReloadMidiPrograms => self.reload_programs(),
            HostOpcode::UpdateParameter => {
                self.refresh_parameter_values();
                Ok(())
            }
            HostOpcode::UpdateMidiProgram => {
                if let Some(index) = self.current_midi_program() {
                    self.engine.notify(HostNotification::MidiProgramChanged {
                        plugin_id: self.id,
                        index: Some(index),
                    });
                }
                self.refresh_parameter_values();
                Ok(())
            }
            HostOpcode::UiUnavailable => {
                self.ui_visible.store(false, Ordering::Release);
                self.engine
                    .notify(HostNotification::UiUnavailable { plugin_id: self.id });
                return;
            }
            _ => return,
        };

        match result {
            Ok(()) => self.engine.notify(HostNotification::ReloadRequested {
                plugin_id: self.id,
                opcode,
            }),
            Err(err) => tracing::error!("Plugin '{}': {:?} failed: {}", self.name, opcode, err),
        }
    }
}

impl UiBridgeTarget for PluginInstance {
    fn plugin_id(&self) -> u32 {
        self.id
    }

    fn sync_state(&self) -> UiSyncState {
        let layout = self.layout.load();
        let values = self.single.lock().values.clone();
        let midi_program = self
            .current_midi_program()
            .and_then(|index| layout.midi_programs.get(index))
            .map(|p| (p.bank as i32, p.program as i32));

        UiSyncState {
            sample_rate: self.sample_rate(),
            custom_data: self
                .custom_data
                .lock()
                .strings()
                .map(|d| (d.key.clone(), d.value.clone()))
                .collect(),
            program: self.current_program().map(|index| index as i32),
            midi_program,
            controls: layout
                .parameters
                .iter()
                .zip(values)
                .filter(|(param, _)| param.data.kind != ParameterType::Unknown)
                .map(|(param, value)| (param.data.rindex, value))
                .collect(),
        }
    }

    fn ui_configure(&self, key: &str, value: &str) {
        self.set_custom_data(CustomDataType::String, key, value, false);
    }

    fn ui_control(&self, rindex: u32, value: f32) -> bool {
        let layout = self.layout.load();
        match layout.parameter_by_rindex(rindex) {
            Some(index) if layout.parameters[index].is_input() => {
                self.set_parameter_value(index, value, false, true);
                true
            }
            _ => false,
        }
    }

    fn ui_program(&self, bank: i32, program: i32) -> bool {
        let result = if bank >= 0 && program >= 0 {
            self.set_midi_program_by_id(bank as u32, program as u32, false)
        } else if program >= 0 {
            self.set_program(Some(program as usize), false)
        } else {
            return false;
        };
        match result {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!("Plugin '{}': UI program change rejected: {}", self.name, err);
                false
            }
        }
    }

    fn ui_midi(&self, data: [u8; 4]) -> bool {
        let status = data[1] & 0xF0;
        let channel = data[1] & 0x0F;
        match status {
            0x90 => self.send_midi_single_note(channel, data[2], data[3]),
            0x80 => self.send_midi_single_note(channel, data[2], 0),
            _ => false,
        }
    }

    fn ui_internal(&self, control: InternalControl, value: f32) {
        match control {
            InternalControl::Active => self.set_active(value >= 0.5),
            InternalControl::DryWet => self.set_dry_wet(value),
            InternalControl::Volume => self.set_volume(value),
            InternalControl::BalanceLeft => self.set_balance_left(value),
            InternalControl::BalanceRight => self.set_balance_right(value),
            InternalControl::Panning => self.set_panning(value),
            InternalControl::CtrlChannel => self.set_ctrl_channel(value as u8),
        }
    }

    fn notify(&self, notification: HostNotification) {
        if let HostNotification::UiStateChanged { visible: false, .. } = notification {
            self.ui_visible.store(false, Ordering::Release);
        }
        self.engine.notify(notification);
    }
}
