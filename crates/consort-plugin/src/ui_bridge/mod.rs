//! Out-of-process plugin editors.
//!
//! A [`UiBridge`] starts the UI executable as a child process and supervises
//! it from a dedicated thread. The two sides talk OSC over loopback UDP:
//!
//! ```text
//! ┌──────────────┐  show/control/program   ┌──────────────┐
//! │  supervisor  │ ──────────────────────> │   UI child   │
//! │ (tokio, UDP) │ <────────────────────── │  (UiClient)  │
//! └──────────────┘  update/control/exiting └──────────────┘
//! ```
//!
//! The child gets the supervisor's callback URL on its command line and must
//! answer with `update` within the configured timeout, otherwise it is killed.

pub mod endpoint;
pub mod protocol;
mod supervisor;

pub use endpoint::Endpoint;
pub use protocol::{decode_packet, HostUiMessage, UiMessage, MAX_PACKET_SIZE};

use crate::config::UiBridgeConfig;
use crate::host::{HostNotification, InternalControl};
use crate::{PluginError, Result};
use crossbeam_channel::{Sender, TrySendError};
use std::net::{Ipv4Addr, UdpSocket};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use supervisor::Supervisor;

/// OSC path prefix of the host side; the plugin id is appended.
pub const HOST_PATH_PREFIX: &str = "/consort";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum UiBridgeState {
    Idle = 0,
    Spawning,
    AwaitingHandshake,
    Running,
    Closing,
    Closed,
    /// The child exited without saying `exiting`.
    Crashed,
    /// No `update` arrived in time; the child was killed.
    TimedOut,
    SpawnFailed,
}

impl UiBridgeState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Spawning,
            2 => Self::AwaitingHandshake,
            3 => Self::Running,
            4 => Self::Closing,
            5 => Self::Closed,
            6 => Self::Crashed,
            7 => Self::TimedOut,
            8 => Self::SpawnFailed,
            _ => Self::Idle,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Closed | Self::Crashed | Self::TimedOut | Self::SpawnFailed
        )
    }
}

/// Everything a freshly connected UI needs to mirror the plugin.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UiSyncState {
    pub sample_rate: f64,
    /// String custom data only.
    pub custom_data: Vec<(String, String)>,
    pub program: Option<i32>,
    /// `(bank, program)`; wins over `program` when both are set.
    pub midi_program: Option<(i32, i32)>,
    /// `(rindex, value)` for every parameter.
    pub controls: Vec<(u32, f32)>,
}

/// The plugin side of a bridge. Called from the supervisor thread.
///
/// Implementations must not block on the realtime path's locks for long and
/// must not echo changes back to the UI.
pub trait UiBridgeTarget: Send + Sync {
    fn plugin_id(&self) -> u32;

    fn sync_state(&self) -> UiSyncState;

    fn ui_configure(&self, key: &str, value: &str);

    /// Returns false when `rindex` names no input parameter.
    fn ui_control(&self, rindex: u32, value: f32) -> bool;

    fn ui_program(&self, bank: i32, program: i32) -> bool;

    /// `[port, status, data1, data2]`. Returns false if rejected.
    fn ui_midi(&self, data: [u8; 4]) -> bool;

    fn ui_internal(&self, control: InternalControl, value: f32);

    fn notify(&self, notification: HostNotification);
}

struct Shared {
    state: AtomicU8,
    stop: AtomicBool,
}

impl Shared {
    fn state(&self) -> UiBridgeState {
        UiBridgeState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: UiBridgeState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }
}

/// Handle to a supervised UI process.
///
/// Dropping it stops the UI the same way [`UiBridge::stop_now`] does.
pub struct UiBridge {
    plugin_id: u32,
    callback: Endpoint,
    outgoing: Sender<HostUiMessage>,
    shared: Arc<Shared>,
    thread: Option<JoinHandle<()>>,
}

impl UiBridge {
    /// Start `binary` and a supervisor thread for it.
    ///
    /// Returns once the thread runs; process start-up failures surface as
    /// [`UiBridgeState::SpawnFailed`] plus a `UiStateChanged { visible: false }`
    /// notification.
    pub fn spawn(
        binary: PathBuf,
        target: Weak<dyn UiBridgeTarget>,
        filename: PathBuf,
        label: String,
        title: String,
        config: UiBridgeConfig,
    ) -> Result<Self> {
        let plugin_id = target
            .upgrade()
            .map(|target| target.plugin_id())
            .ok_or_else(|| PluginError::UiBridge("plugin was dropped before its UI started".into()))?;

        let socket = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0))?;
        socket.set_nonblocking(true)?;
        let callback = Endpoint::new(socket.local_addr()?, format!("{HOST_PATH_PREFIX}/{plugin_id}"));

        let mut command = Command::new(&binary);
        command
            .arg(callback.url())
            .arg(&filename)
            .arg(&label)
            .arg(&title)
            .envs(config.env.iter().map(|(key, value)| (key.as_str(), value.as_str())))
            .stdin(Stdio::null());

        let (outgoing, incoming) = crossbeam_channel::bounded(config.queue_capacity.max(1));
        let shared = Arc::new(Shared {
            state: AtomicU8::new(UiBridgeState::Idle as u8),
            stop: AtomicBool::new(false),
        });

        tracing::info!(
            "Starting UI for plugin {} ({}) at {}",
            plugin_id,
            label,
            binary.display()
        );

        let supervisor = Supervisor::new(
            shared.clone(),
            target,
            plugin_id,
            callback.path.clone(),
            incoming,
            config,
            command,
        );
        let thread = thread::Builder::new()
            .name(format!("consort-ui-{plugin_id}"))
            .spawn(move || supervisor.run(socket))
            .map_err(|err| PluginError::UiBridge(format!("failed to start supervisor thread: {err}")))?;

        Ok(Self {
            plugin_id,
            callback,
            outgoing,
            shared,
            thread: Some(thread),
        })
    }

    pub fn plugin_id(&self) -> u32 {
        self.plugin_id
    }

    /// URL handed to the child as its first argument.
    pub fn callback_url(&self) -> String {
        self.callback.url()
    }

    pub fn state(&self) -> UiBridgeState {
        self.shared.state()
    }

    /// The child is gone and the supervisor has stopped or is about to.
    pub fn is_finished(&self) -> bool {
        self.state().is_terminal()
    }

    /// Ask the UI to close and wait for the supervisor to wind down.
    ///
    /// A UI that ignores `quit` is killed after the grace period. Called from
    /// the supervisor thread itself, this only raises the stop flag.
    pub fn stop_now(&mut self) {
        self.shared.stop.store(true, Ordering::Release);
        let Some(thread) = self.thread.take() else {
            return;
        };
        if thread.thread().id() == thread::current().id() {
            return;
        }
        if thread.join().is_err() {
            tracing::error!("UI supervisor for plugin {} panicked", self.plugin_id);
        }
    }

    pub fn send_control(&self, rindex: u32, value: f32) -> bool {
        self.send(HostUiMessage::Control {
            index: rindex as i32,
            value,
        })
    }

    /// Internal controls travel on negative indices.
    pub fn send_internal(&self, control: InternalControl, value: f32) -> bool {
        self.send(HostUiMessage::Control {
            index: control.ui_index(),
            value,
        })
    }

    pub fn send_program(&self, bank: i32, program: i32) -> bool {
        self.send(HostUiMessage::Program { bank, program })
    }

    pub fn send_configure(&self, key: &str, value: &str) -> bool {
        self.send(HostUiMessage::Configure {
            key: key.to_string(),
            value: value.to_string(),
        })
    }

    pub fn send_midi(&self, data: [u8; 4]) -> bool {
        self.send(HostUiMessage::Midi(data))
    }

    pub fn send_sample_rate(&self, sample_rate: f64) -> bool {
        self.send(HostUiMessage::SampleRate(sample_rate as f32))
    }

    fn send(&self, message: HostUiMessage) -> bool {
        match self.outgoing.try_send(message) {
            Ok(()) => true,
            Err(TrySendError::Full(message)) => {
                tracing::debug!(
                    "UI queue for plugin {} full, dropped '{}'",
                    self.plugin_id,
                    message.name()
                );
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }
}

impl Drop for UiBridge {
    fn drop(&mut self) {
        self.stop_now();
    }
}

impl std::fmt::Debug for UiBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UiBridge")
            .field("plugin_id", &self.plugin_id)
            .field("callback", &self.callback.url())
            .field("state", &self.state())
            .finish()
    }
}
