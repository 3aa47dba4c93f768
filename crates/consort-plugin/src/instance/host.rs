use super::PluginInstance;
use crate::host::{EngineCallbacks, HostCallbacks, HostNotification, HostOpcode, TimeInfo};
use crate::midi::MidiEvent;
use crate::postponed::PostponedEvent;
use crate::state::CustomDataType;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Weak};

/// The [`HostCallbacks`] handed to every handle of one instance.
///
/// Holds only a weak reference back to its instance: handles live inside the
/// instance, so a strong one would keep it alive forever. Anything that would
/// need `master` is postponed, since the plugin may be calling from inside a
/// locked section.
pub struct InstanceHost {
    instance: Weak<PluginInstance>,
    engine: Arc<dyn EngineCallbacks>,
    plugin_id: u32,
}

impl InstanceHost {
    pub(crate) fn new(instance: Weak<PluginInstance>, engine: Arc<dyn EngineCallbacks>, plugin_id: u32) -> Self {
        Self {
            instance,
            engine,
            plugin_id,
        }
    }

    pub fn plugin_id(&self) -> u32 {
        self.plugin_id
    }
}

impl HostCallbacks for InstanceHost {
    fn buffer_size(&self) -> u32 {
        match self.instance.upgrade() {
            Some(instance) => instance.buffer_size(),
            None => self.engine.buffer_size(),
        }
    }

    fn sample_rate(&self) -> f64 {
        match self.instance.upgrade() {
            Some(instance) => instance.sample_rate(),
            None => self.engine.sample_rate(),
        }
    }

    fn is_offline(&self) -> bool {
        self.engine.is_offline()
    }

    fn time_info(&self) -> TimeInfo {
        self.engine.time_info()
    }

    fn write_midi_event(&self, event: &MidiEvent) -> bool {
        self.engine.write_midi_event(self.plugin_id, event)
    }

    fn ui_parameter_changed(&self, rindex: u32, value: f32) {
        let Some(instance) = self.instance.upgrade() else {
            return;
        };
        match instance.layout.load().parameter_by_rindex(rindex) {
            Some(index) => instance.set_parameter_value(index, value, false, true),
            None => tracing::warn!(
                "Plugin '{}' UI changed unknown parameter {}",
                instance.name,
                rindex
            ),
        }
    }

    fn ui_midi_program_changed(&self, _channel: u8, bank: u32, program: u32) {
        let Some(instance) = self.instance.upgrade() else {
            return;
        };
        let index = instance.layout.load().midi_program_index(bank, program);
        match index {
            Some(index) => {
                instance
                    .current_midi_program
                    .store(index as i32, Ordering::Release);
                instance
                    .postponed
                    .push(PostponedEvent::MidiProgramChanged { index });
            }
            None => tracing::warn!(
                "Plugin '{}' UI selected unknown MIDI program {}:{}",
                instance.name,
                bank,
                program
            ),
        }
    }

    fn ui_custom_data_changed(&self, key: &str, value: &str) {
        let Some(instance) = self.instance.upgrade() else {
            return;
        };
        if instance
            .custom_data
            .lock()
            .set(CustomDataType::String, key, value)
        {
            self.engine.notify(HostNotification::CustomDataChanged {
                plugin_id: self.plugin_id,
                key: key.to_string(),
            });
        }
    }

    fn ui_closed(&self) {
        if let Some(instance) = self.instance.upgrade() {
            instance.ui_visible.store(false, Ordering::Release);
        }
        self.engine.notify(HostNotification::UiStateChanged {
            plugin_id: self.plugin_id,
            visible: false,
        });
    }

    fn ui_open_file(&self, is_dir: bool, title: &str, filter: &str) -> Option<PathBuf> {
        self.engine.open_file_dialog(is_dir, title, filter)
    }

    fn ui_save_file(&self, is_dir: bool, title: &str, filter: &str) -> Option<PathBuf> {
        self.engine.save_file_dialog(is_dir, title, filter)
    }

    fn notify(&self, notification: HostNotification) {
        self.engine.notify(notification);
    }

    fn dispatcher(&self, opcode: HostOpcode, _index: i32, _value: isize, opt: f32) -> isize {
        let Some(instance) = self.instance.upgrade() else {
            return 0;
        };

        match opcode {
            HostOpcode::Null | HostOpcode::HostIdle | HostOpcode::RequestIdle => 0,
            HostOpcode::SetProcessPrecision => 0,
            HostOpcode::SetVolume => {
                instance.volume.store(opt.clamp(0.0, 1.27), Ordering::Release);
                1
            }
            HostOpcode::SetDryWet => {
                instance.dry_wet.store(opt.clamp(0.0, 1.0), Ordering::Release);
                1
            }
            HostOpcode::SetBalanceLeft => {
                instance
                    .balance_left
                    .store(opt.clamp(-1.0, 1.0), Ordering::Release);
                1
            }
            HostOpcode::SetBalanceRight => {
                instance
                    .balance_right
                    .store(opt.clamp(-1.0, 1.0), Ordering::Release);
                1
            }
            HostOpcode::SetPanning => {
                instance.panning.store(opt.clamp(-1.0, 1.0), Ordering::Release);
                1
            }
            HostOpcode::UpdateParameter
            | HostOpcode::UpdateMidiProgram
            | HostOpcode::ReloadParameters
            | HostOpcode::ReloadMidiPrograms
            | HostOpcode::ReloadAll
            | HostOpcode::UiUnavailable => {
                instance.postponed.push(PostponedEvent::HostRequest(opcode));
                1
            }
        }
    }
}
