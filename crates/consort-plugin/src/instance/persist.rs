use super::PluginInstance;
use crate::adapter::guarded;
use crate::state::{CustomDataType, ParameterState, PluginState};
use crate::{PluginError, PluginHints, PluginOptions, Result};
use std::sync::atomic::Ordering;

impl PluginInstance {
    /// Whether state goes through an opaque chunk instead of parameter values.
    pub fn uses_chunks(&self) -> bool {
        self.hints().contains(PluginHints::USES_CHUNKS)
            && self.options().contains(PluginOptions::USE_CHUNKS)
    }

    /// The plugin's opaque chunk. `None` unless chunks are in use.
    pub fn chunk_data(&self) -> Result<Option<Vec<u8>>> {
        if !self.uses_chunks() {
            return Ok(None);
        }

        let mut engine = self.master.lock();
        let engine = &mut *engine;
        let layout = self.layout.load();
        self.single.lock().flush(&mut engine.handles, &layout);

        let Some(handle) = engine.handles.first_mut() else {
            return Ok(None);
        };
        guarded("get_state", || handle.get_state())
            .map_err(|err| PluginError::StateSaveError(err.to_string()))
    }

    /// Hand a chunk to every handle, then resync parameter values from it.
    pub fn set_chunk_data(&self, data: &[u8]) -> Result<()> {
        if !self.hints().contains(PluginHints::USES_CHUNKS) {
            return Err(PluginError::StateRestoreError(format!(
                "plugin '{}' does not use chunks",
                self.name
            )));
        }

        {
            let mut engine = self.master.lock();
            for handle in engine.handles.iter_mut() {
                let accepted = guarded("set_state", || handle.set_state(data))
                    .map_err(|err| PluginError::StateRestoreError(err.to_string()))?;
                if !accepted {
                    return Err(PluginError::StateRestoreError(format!(
                        "plugin '{}' rejected a {} byte chunk",
                        self.name,
                        data.len()
                    )));
                }
            }
        }

        self.refresh_parameter_values();
        Ok(())
    }

    /// Snapshot everything needed to recreate this instance.
    pub fn save_state(&self) -> Result<PluginState> {
        let layout = self.layout.load_full();
        let chunk = self.chunk_data()?;
        let values = self.single.lock().values.clone();

        let parameters = layout
            .parameters
            .iter()
            .zip(values)
            .filter(|(param, _)| param.is_input())
            .map(|(param, value)| ParameterState {
                index: param.data.index,
                rindex: param.data.rindex,
                name: param.name.clone(),
                value,
                midi_channel: param.data.midi_channel,
                midi_cc: param.data.midi_cc,
            })
            .collect();

        let current_midi_program = self
            .current_midi_program()
            .and_then(|index| layout.midi_programs.get(index))
            .map(|p| (p.bank, p.program));

        Ok(PluginState {
            plugin_type: self.plugin_type().to_string(),
            name: self.name.clone(),
            label: self.label().to_string(),
            filename: self
                .filename
                .as_ref()
                .map(|path| path.to_string_lossy().into_owned()),
            active: self.is_active(),
            options: self.options(),
            dry_wet: self.dry_wet(),
            volume: self.volume(),
            balance_left: self.balance_left(),
            balance_right: self.balance_right(),
            panning: self.panning(),
            ctrl_channel: self.ctrl_channel(),
            current_program: self.current_program(),
            current_midi_program,
            parameters,
            custom_data: self.custom_data.lock().clone(),
            chunk,
        })
    }

    /// Apply a snapshot taken by [`save_state`](Self::save_state).
    ///
    /// Custom data goes first, then programs, then the chunk, then plain
    /// parameter values, so later steps win over what earlier ones implied.
    /// Parameters are matched by native index and name; ones that no longer
    /// exist are skipped.
    pub fn restore_state(&self, state: &PluginState) -> Result<()> {
        if state.label != self.label() {
            tracing::warn!(
                "Restoring state saved for '{}' into '{}'",
                state.label,
                self.label()
            );
        }

        let wanted = state.options & self.available_options();
        for option in [
            PluginOptions::FIXED_BUFFERS,
            PluginOptions::FORCE_STEREO,
            PluginOptions::MAP_PROGRAM_CHANGES,
            PluginOptions::USE_CHUNKS,
            PluginOptions::SEND_CONTROL_CHANGES,
            PluginOptions::SEND_CHANNEL_PRESSURE,
            PluginOptions::SEND_NOTE_AFTERTOUCH,
            PluginOptions::SEND_PITCHBEND,
            PluginOptions::SEND_ALL_SOUND_OFF,
            PluginOptions::SEND_PROGRAM_CHANGES,
        ] {
            if self.options().contains(option) != wanted.contains(option) {
                self.set_option(option, wanted.contains(option))?;
            }
        }

        self.set_ctrl_channel(state.ctrl_channel);
        self.set_dry_wet(state.dry_wet);
        self.set_volume(state.volume);
        self.set_balance_left(state.balance_left);
        self.set_balance_right(state.balance_right);
        self.set_panning(state.panning);

        for entry in state.custom_data.iter() {
            self.set_custom_data(entry.kind, &entry.key, &entry.value, true);
        }

        if let Some((bank, program)) = state.current_midi_program {
            if let Err(err) = self.set_midi_program_by_id(bank, program, true) {
                tracing::warn!("Plugin '{}': saved MIDI program skipped: {}", self.name, err);
            }
        } else if let Some(index) = state.current_program {
            if let Err(err) = self.set_program(Some(index), true) {
                tracing::warn!("Plugin '{}': saved program skipped: {}", self.name, err);
            }
        }

        if let Some(chunk) = &state.chunk {
            if self.hints().contains(PluginHints::USES_CHUNKS) {
                self.set_chunk_data(chunk)?;
            } else {
                tracing::warn!("Plugin '{}' does not use chunks, ignoring saved chunk", self.name);
            }
        }

        let layout = self.layout.load_full();
        for saved in &state.parameters {
            let index = layout
                .parameters
                .iter()
                .position(|p| p.data.rindex == saved.rindex && p.name == saved.name)
                .or_else(|| layout.parameter_by_name(&saved.name));
            let Some(index) = index else {
                tracing::debug!("Plugin '{}': saved parameter '{}' no longer exists", self.name, saved.name);
                continue;
            };
            if !layout.parameters[index].is_input() {
                continue;
            }
            self.set_parameter_value(index, saved.value, true, true);
            self.set_parameter_midi_channel(index, saved.midi_channel.min(15))?;
            self.set_parameter_midi_cc(index, saved.midi_cc.filter(|cc| *cc < 0x78))?;
        }

        self.set_active(state.active);

        let keys: Vec<String> = state
            .custom_data
            .iter()
            .filter(|d| d.kind == CustomDataType::String)
            .map(|d| d.key.clone())
            .collect();
        tracing::debug!(
            "Plugin '{}' restored: {} parameters, custom data {:?}, chunk {}",
            self.name,
            state.parameters.len(),
            keys,
            state.chunk.as_ref().map_or(0, Vec::len)
        );
        if self.active.load(Ordering::Acquire) {
            self.needs_reset.store(true, Ordering::Release);
        }
        Ok(())
    }
}
