//! The thread that owns a UI child process and its OSC socket.

use super::endpoint::Endpoint;
use super::protocol::{decode_packet, HostUiMessage, UiMessage, MAX_PACKET_SIZE};
use super::{Shared, UiBridgeState, UiBridgeTarget};
use crate::config::UiBridgeConfig;
use crate::host::{HostNotification, InternalControl};
use crossbeam_channel::Receiver;
use rosc::OscMessage;
use std::net::SocketAddr;
use std::process::{Child, Command};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::Instant;

pub(super) struct Supervisor {
    shared: Arc<Shared>,
    target: Weak<dyn UiBridgeTarget>,
    plugin_id: u32,
    path: String,
    outgoing: Receiver<HostUiMessage>,
    config: UiBridgeConfig,
    command: Command,
    notified: bool,
}

impl Supervisor {
    pub(super) fn new(
        shared: Arc<Shared>,
        target: Weak<dyn UiBridgeTarget>,
        plugin_id: u32,
        path: String,
        outgoing: Receiver<HostUiMessage>,
        config: UiBridgeConfig,
        command: Command,
    ) -> Self {
        Self {
            shared,
            target,
            plugin_id,
            path,
            outgoing,
            config,
            command,
            notified: false,
        }
    }

    /// Thread body.
    pub(super) fn run(mut self, socket: std::net::UdpSocket) {
        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(rt) => rt,
            Err(err) => {
                tracing::error!("UI supervisor for plugin {}: no runtime: {}", self.plugin_id, err);
                self.finish(UiBridgeState::SpawnFailed);
                return;
            }
        };

        runtime.block_on(async {
            match UdpSocket::from_std(socket) {
                Ok(socket) => self.supervise(socket).await,
                Err(err) => {
                    tracing::error!("UI supervisor for plugin {}: socket: {}", self.plugin_id, err);
                    self.finish(UiBridgeState::SpawnFailed);
                }
            }
        });
    }

    async fn supervise(&mut self, socket: UdpSocket) {
        self.set_state(UiBridgeState::Spawning);
        let mut child = match self.command.spawn() {
            Ok(child) => child,
            Err(err) => {
                tracing::error!(
                    "UI for plugin {} failed to start ({:?}): {}",
                    self.plugin_id,
                    self.command.get_program(),
                    err
                );
                self.finish(UiBridgeState::SpawnFailed);
                return;
            }
        };

        let mut session = Session::new(socket, self.path.clone(), self.target.clone(), self.plugin_id);
        self.set_state(UiBridgeState::AwaitingHandshake);

        let deadline = Instant::now() + self.config.timeout();
        while !session.is_connected() {
            if self.shared.stop_requested() {
                kill(&mut child);
                self.finish(UiBridgeState::Closed);
                return;
            }
            if let Some(status) = exited(&mut child) {
                tracing::warn!(
                    "UI for plugin {} exited before the handshake ({})",
                    self.plugin_id,
                    status
                );
                self.finish(UiBridgeState::Crashed);
                return;
            }
            let now = Instant::now();
            if now >= deadline {
                tracing::warn!(
                    "UI for plugin {} sent no handshake within {:?}, killing it",
                    self.plugin_id,
                    self.config.timeout()
                );
                kill(&mut child);
                self.finish(UiBridgeState::TimedOut);
                return;
            }

            // Superseded by the resync that follows the handshake.
            while self.outgoing.try_recv().is_ok() {}

            session
                .poll(self.config.poll_interval().min(deadline - now))
                .await;
        }

        self.set_state(UiBridgeState::Running);
        tracing::info!("UI for plugin {} connected", self.plugin_id);

        loop {
            while let Ok(message) = self.outgoing.try_recv() {
                session.send(&message).await;
            }

            if session.exiting {
                self.set_state(UiBridgeState::Closing);
                self.report_closed();
                self.reap(&mut child).await;
                self.finish(UiBridgeState::Closed);
                return;
            }

            if self.shared.stop_requested() {
                self.set_state(UiBridgeState::Closing);
                session.send(&HostUiMessage::Hide).await;
                session.send(&HostUiMessage::Quit).await;
                self.reap(&mut child).await;
                self.finish(UiBridgeState::Closed);
                return;
            }

            if let Some(status) = exited(&mut child) {
                // Messages sent right before the process ended may still be queued.
                session.drain(self.config.poll_interval()).await;
                if session.exiting {
                    self.finish(UiBridgeState::Closed);
                } else {
                    tracing::warn!("UI for plugin {} crashed ({})", self.plugin_id, status);
                    self.finish(UiBridgeState::Crashed);
                }
                return;
            }

            session.poll(self.config.poll_interval()).await;
        }
    }

    /// Give the child the grace period to exit, then kill it.
    async fn reap(&self, child: &mut Child) {
        let deadline = Instant::now() + self.config.grace_period();
        while Instant::now() < deadline {
            if exited(child).is_some() {
                return;
            }
            tokio::time::sleep(self.config.poll_interval()).await;
        }
        tracing::warn!(
            "UI for plugin {} ignored quit for {:?}, killing it",
            self.plugin_id,
            self.config.grace_period()
        );
        kill(child);
    }

    fn set_state(&self, state: UiBridgeState) {
        tracing::debug!("UI bridge for plugin {}: {:?}", self.plugin_id, state);
        self.shared.set_state(state);
    }

    /// Emits `UiStateChanged { visible: false }` at most once.
    fn report_closed(&mut self) {
        if self.notified {
            return;
        }
        self.notified = true;
        if let Some(target) = self.target.upgrade() {
            target.notify(HostNotification::UiStateChanged {
                plugin_id: self.plugin_id,
                visible: false,
            });
        }
    }

    fn finish(&mut self, state: UiBridgeState) {
        self.set_state(state);
        self.report_closed();
    }
}

fn exited(child: &mut Child) -> Option<std::process::ExitStatus> {
    match child.try_wait() {
        Ok(status) => status,
        Err(err) => {
            tracing::warn!("Failed to poll UI process: {}", err);
            None
        }
    }
}

fn kill(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

/// The registered UI peer.
#[derive(Debug, Clone)]
struct Peer {
    /// Where its datagrams come from; everything else is dropped.
    source: SocketAddr,
    /// Where ours go.
    endpoint: Endpoint,
}

/// Socket side of one bridge: handshake, validation and dispatch.
struct Session {
    socket: UdpSocket,
    path: String,
    target: Weak<dyn UiBridgeTarget>,
    plugin_id: u32,
    peer: Option<Peer>,
    exiting: bool,
    buf: Vec<u8>,
}

impl Session {
    fn new(socket: UdpSocket, path: String, target: Weak<dyn UiBridgeTarget>, plugin_id: u32) -> Self {
        Self {
            socket,
            path,
            target,
            plugin_id,
            peer: None,
            exiting: false,
            buf: vec![0; MAX_PACKET_SIZE],
        }
    }

    fn is_connected(&self) -> bool {
        self.peer.is_some()
    }

    /// Wait up to `wait` for one datagram and handle it. Returns whether
    /// one arrived.
    async fn poll(&mut self, wait: Duration) -> bool {
        let received = tokio::time::timeout(wait, self.socket.recv_from(&mut self.buf)).await;
        match received {
            Ok(Ok((len, from))) => {
                let bytes = self.buf[..len].to_vec();
                self.handle_datagram(&bytes, from).await;
                true
            }
            Ok(Err(err)) => {
                tracing::debug!("UI socket for plugin {}: {}", self.plugin_id, err);
                false
            }
            Err(_) => false,
        }
    }

    /// Handle everything already queued, waiting at most `wait` for each.
    async fn drain(&mut self, wait: Duration) {
        while self.poll(wait).await {}
    }

    async fn handle_datagram(&mut self, bytes: &[u8], from: SocketAddr) {
        if let Some(peer) = &self.peer {
            if peer.source != from {
                tracing::warn!(
                    "Dropping datagram from {} for plugin {}, UI is at {}",
                    from,
                    self.plugin_id,
                    peer.source
                );
                return;
            }
        }

        let messages = match decode_packet(bytes) {
            Ok(messages) => messages,
            Err(err) => {
                tracing::warn!("Plugin {} UI: {}", self.plugin_id, err);
                return;
            }
        };
        for message in messages {
            self.handle_message(&message, from).await;
        }
    }

    async fn handle_message(&mut self, message: &OscMessage, from: SocketAddr) {
        let message = match UiMessage::decode(message, &self.path) {
            Ok(message) => message,
            Err(err) => {
                tracing::warn!("Plugin {} UI: {}", self.plugin_id, err);
                return;
            }
        };

        if let UiMessage::Update { url } = &message {
            match Endpoint::parse(url) {
                Ok(endpoint) => {
                    tracing::debug!("Plugin {} UI registered at {}", self.plugin_id, endpoint);
                    self.peer = Some(Peer {
                        source: from,
                        endpoint,
                    });
                    self.resync().await;
                }
                Err(err) => tracing::warn!("Plugin {} UI: bad update URL: {}", self.plugin_id, err),
            }
            return;
        }

        if self.peer.is_none() {
            tracing::warn!(
                "Plugin {} UI sent '{}' before 'update', ignored",
                self.plugin_id,
                message.name()
            );
            return;
        }

        let Some(target) = self.target.upgrade() else {
            return;
        };
        match message {
            UiMessage::Configure { key, value } => target.ui_configure(&key, &value),
            UiMessage::Control { index, value } if index < 0 => {
                match InternalControl::from_ui_index(index) {
                    Some(control) => target.ui_internal(control, value),
                    None => tracing::warn!("Plugin {} UI: unknown internal control {}", self.plugin_id, index),
                }
            }
            UiMessage::Control { index, value } => {
                if !target.ui_control(index as u32, value) {
                    tracing::warn!("Plugin {} UI: no input parameter with rindex {}", self.plugin_id, index);
                }
            }
            UiMessage::Program { bank, program } => {
                if !target.ui_program(bank, program) {
                    tracing::warn!("Plugin {} UI: no program {}:{}", self.plugin_id, bank, program);
                }
            }
            UiMessage::Midi(data) => {
                if !target.ui_midi(data) {
                    tracing::debug!("Plugin {} UI: MIDI {:02X?} rejected", self.plugin_id, data);
                }
            }
            UiMessage::Exiting => {
                tracing::info!("UI for plugin {} is exiting", self.plugin_id);
                self.exiting = true;
            }
            UiMessage::Update { .. } => {}
        }
    }

    /// Bring a freshly registered UI up to date, then show it.
    async fn resync(&self) {
        let Some(target) = self.target.upgrade() else {
            return;
        };
        let state = target.sync_state();
        drop(target);

        self.send(&HostUiMessage::SampleRate(state.sample_rate as f32)).await;
        for (key, value) in state.custom_data {
            self.send(&HostUiMessage::Configure { key, value }).await;
        }
        let program = match (state.midi_program, state.program) {
            (Some((bank, program)), _) => Some((bank, program)),
            (None, Some(program)) => Some((-1, program)),
            (None, None) => None,
        };
        if let Some((bank, program)) = program {
            self.send(&HostUiMessage::Program { bank, program }).await;
        }
        for (rindex, value) in state.controls {
            self.send(&HostUiMessage::Control {
                index: rindex as i32,
                value,
            })
            .await;
        }
        self.send(&HostUiMessage::Show).await;
    }

    async fn send(&self, message: &HostUiMessage) {
        let Some(peer) = &self.peer else {
            return;
        };
        let bytes = match message.encode(&peer.endpoint.path) {
            Ok(bytes) => bytes,
            Err(err) => {
                tracing::warn!("Plugin {} UI: {}", self.plugin_id, err);
                return;
            }
        };
        if let Err(err) = self.socket.send_to(&bytes, peer.endpoint.addr).await {
            tracing::debug!("Plugin {} UI: send '{}' failed: {}", self.plugin_id, message.name(), err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ui_bridge::UiSyncState;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct MockTarget {
        calls: Mutex<Vec<String>>,
    }

    impl MockTarget {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().clone()
        }
    }

    impl UiBridgeTarget for MockTarget {
        fn plugin_id(&self) -> u32 {
            5
        }

        fn sync_state(&self) -> UiSyncState {
            UiSyncState {
                sample_rate: 48000.0,
                custom_data: vec![("skin".into(), "dark".into())],
                program: Some(2),
                midi_program: None,
                controls: vec![(0, 0.5), (3, 1.0)],
            }
        }

        fn ui_configure(&self, key: &str, value: &str) {
            self.calls.lock().push(format!("configure {key}={value}"));
        }

        fn ui_control(&self, rindex: u32, value: f32) -> bool {
            self.calls.lock().push(format!("control {rindex}={value}"));
            rindex < 4
        }

        fn ui_program(&self, bank: i32, program: i32) -> bool {
            self.calls.lock().push(format!("program {bank}:{program}"));
            true
        }

        fn ui_midi(&self, data: [u8; 4]) -> bool {
            self.calls.lock().push(format!("midi {:?}", data));
            true
        }

        fn ui_internal(&self, control: InternalControl, value: f32) {
            self.calls.lock().push(format!("internal {control:?}={value}"));
        }

        fn notify(&self, notification: HostNotification) {
            self.calls.lock().push(format!("notify {notification:?}"));
        }
    }

    struct Fixture {
        session: Session,
        target: Arc<MockTarget>,
        ui: UdpSocket,
        ui_addr: SocketAddr,
    }

    async fn fixture() -> Fixture {
        let host = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let ui = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let ui_addr = ui.local_addr().unwrap();
        let target = Arc::new(MockTarget::default());
        let weak: Weak<dyn UiBridgeTarget> = Arc::downgrade(&(target.clone() as Arc<dyn UiBridgeTarget>));
        Fixture {
            session: Session::new(host, "/consort/5".into(), weak, 5),
            target,
            ui,
            ui_addr,
        }
    }

    fn packet(message: UiMessage) -> Vec<u8> {
        message.encode("/consort/5").unwrap()
    }

    async fn recv_host_message(ui: &UdpSocket) -> HostUiMessage {
        let mut buf = vec![0; MAX_PACKET_SIZE];
        let (len, _) = tokio::time::timeout(Duration::from_secs(2), ui.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        let messages = decode_packet(&buf[..len]).unwrap();
        HostUiMessage::decode(&messages[0], "/ui").unwrap()
    }

    async fn handshake(f: &mut Fixture) {
        let url = format!("osc.udp://{}/ui", f.ui_addr);
        f.session
            .handle_datagram(&packet(UiMessage::Update { url }), f.ui_addr)
            .await;
    }

    #[tokio::test]
    async fn test_messages_before_update_are_ignored() {
        let mut f = fixture().await;
        f.session
            .handle_datagram(&packet(UiMessage::Control { index: 0, value: 0.1 }), f.ui_addr)
            .await;
        assert!(!f.session.is_connected());
        assert!(f.target.calls().is_empty());
    }

    #[tokio::test]
    async fn test_update_resyncs_in_order() {
        let mut f = fixture().await;
        handshake(&mut f).await;
        assert!(f.session.is_connected());

        let expected = [
            HostUiMessage::SampleRate(48000.0),
            HostUiMessage::Configure {
                key: "skin".into(),
                value: "dark".into(),
            },
            HostUiMessage::Program { bank: -1, program: 2 },
            HostUiMessage::Control { index: 0, value: 0.5 },
            HostUiMessage::Control { index: 3, value: 1.0 },
            HostUiMessage::Show,
        ];
        for message in expected {
            assert_eq!(recv_host_message(&f.ui).await, message);
        }
    }

    #[tokio::test]
    async fn test_stranger_is_dropped() {
        let mut f = fixture().await;
        handshake(&mut f).await;

        let stranger: SocketAddr = "127.0.0.1:1".parse().unwrap();
        f.session
            .handle_datagram(&packet(UiMessage::Control { index: 0, value: 0.9 }), stranger)
            .await;
        f.session.handle_datagram(&packet(UiMessage::Exiting), stranger).await;

        assert!(f.target.calls().is_empty());
        assert!(!f.session.exiting);
    }

    #[tokio::test]
    async fn test_dispatch_after_handshake() {
        let mut f = fixture().await;
        handshake(&mut f).await;

        for message in [
            UiMessage::Control { index: 3, value: 0.25 },
            UiMessage::Control { index: -3, value: 0.5 },
            UiMessage::Configure {
                key: "k".into(),
                value: "v".into(),
            },
            UiMessage::Program { bank: 1, program: 7 },
            UiMessage::Midi([0, 0x90, 60, 100]),
        ] {
            f.session.handle_datagram(&packet(message), f.ui_addr).await;
        }

        assert_eq!(
            f.target.calls(),
            vec![
                "control 3=0.25".to_string(),
                "internal DryWet=0.5".to_string(),
                "configure k=v".to_string(),
                "program 1:7".to_string(),
                "midi [0, 144, 60, 100]".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_non_finite_controls_are_dropped() {
        let mut f = fixture().await;
        handshake(&mut f).await;

        for value in [f32::NAN, f32::INFINITY] {
            f.session
                .handle_datagram(&packet(UiMessage::Control { index: 0, value }), f.ui_addr)
                .await;
            f.session
                .handle_datagram(&packet(UiMessage::Control { index: -3, value }), f.ui_addr)
                .await;
        }
        f.session
            .handle_datagram(&packet(UiMessage::Control { index: 0, value: 0.75 }), f.ui_addr)
            .await;

        assert_eq!(f.target.calls(), vec!["control 0=0.75".to_string()]);
        assert!(f.session.is_connected());
    }

    #[tokio::test]
    async fn test_malformed_messages_keep_session_up() {
        let mut f = fixture().await;
        handshake(&mut f).await;

        f.session.handle_datagram(&[1, 2, 3], f.ui_addr).await;
        let wrong_path = UiMessage::Exiting.encode("/consort/6").unwrap();
        f.session.handle_datagram(&wrong_path, f.ui_addr).await;

        assert!(f.session.is_connected());
        assert!(!f.session.exiting);

        f.session.handle_datagram(&packet(UiMessage::Exiting), f.ui_addr).await;
        assert!(f.session.exiting);
    }
}
