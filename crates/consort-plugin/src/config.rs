//! Host settings for plugin instances and UI bridges.

use crate::postponed::DEFAULT_POSTPONED_CAPACITY;
use crate::PluginOptions;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ProcessMode {
    #[default]
    Normal,
    /// Running inside a bridge sub-process. Generic post-processing is left
    /// to the parent host.
    Bridge,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UiBridgeConfig {
    /// Handshake window, also the base of the shutdown grace period.
    pub timeout_ms: u64,
    /// Receive timeout of the supervisor loop.
    pub poll_interval_ms: u64,
    /// Overrides the adapter's UI executable.
    #[serde(default)]
    pub binary: Option<PathBuf>,
    /// Extra environment for the UI process.
    #[serde(default)]
    pub env: Vec<(String, String)>,
    /// Bound on queued host-to-UI messages.
    pub queue_capacity: usize,
}

impl UiBridgeConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    /// Graceful exit window after `hide` and `quit`.
    pub fn grace_period(&self) -> Duration {
        self.timeout() * 2
    }
}

impl Default for UiBridgeConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 4000,
            poll_interval_ms: 50,
            binary: None,
            env: Vec::new(),
            queue_capacity: 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineOptions {
    pub process_mode: ProcessMode,
    /// Options applied to every newly loaded plugin, masked by what it supports.
    pub default_options: PluginOptions,
    /// Parameters beyond this count are ignored at reload.
    pub max_parameters: usize,
    pub postponed_capacity: usize,
    /// Capacity of the control-thread note queue.
    pub external_note_capacity: usize,
    /// Control channel for CC mapping and program changes.
    pub ctrl_channel: u8,
    #[serde(default)]
    pub ui_bridge: UiBridgeConfig,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            process_mode: ProcessMode::Normal,
            default_options: PluginOptions::MAP_PROGRAM_CHANGES
                | PluginOptions::SEND_CHANNEL_PRESSURE
                | PluginOptions::SEND_PITCHBEND
                | PluginOptions::SEND_ALL_SOUND_OFF,
            max_parameters: 200,
            postponed_capacity: DEFAULT_POSTPONED_CAPACITY,
            external_note_capacity: 128,
            ctrl_channel: 0,
            ui_bridge: UiBridgeConfig::default(),
        }
    }
}
