//! Host-side supervision of the `ui-bridge` executable.

use consort_plugin::ui_bridge::{Endpoint, UiBridgeTarget, UiMessage, UiSyncState};
use consort_plugin::{HostNotification, InternalControl, UiBridge, UiBridgeConfig, UiBridgeState};
use parking_lot::Mutex;
use serial_test::serial;
use std::net::UdpSocket;
use std::path::PathBuf;
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};

const PLUGIN_ID: u32 = 7;

#[derive(Default)]
struct RecordingTarget {
    calls: Mutex<Vec<String>>,
    notifications: Mutex<Vec<HostNotification>>,
}

impl RecordingTarget {
    fn has_call(&self, call: &str) -> bool {
        self.calls.lock().iter().any(|c| c == call)
    }

    fn closed_count(&self) -> usize {
        self.notifications
            .lock()
            .iter()
            .filter(|n| matches!(n, HostNotification::UiStateChanged { visible: false, .. }))
            .count()
    }
}

impl UiBridgeTarget for RecordingTarget {
    fn plugin_id(&self) -> u32 {
        PLUGIN_ID
    }

    fn sync_state(&self) -> UiSyncState {
        UiSyncState {
            sample_rate: 44100.0,
            controls: vec![(0, 0.1)],
            ..UiSyncState::default()
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
        self.calls.lock().push(format!("midi {data:?}"));
        true
    }

    fn ui_internal(&self, control: InternalControl, value: f32) {
        self.calls.lock().push(format!("internal {control:?}={value}"));
    }

    fn notify(&self, notification: HostNotification) {
        self.notifications.lock().push(notification);
    }
}

fn config(mode: &str, timeout_ms: u64) -> UiBridgeConfig {
    UiBridgeConfig {
        timeout_ms,
        poll_interval_ms: 10,
        env: vec![("CONSORT_UI_BRIDGE_MODE".to_string(), mode.to_string())],
        ..UiBridgeConfig::default()
    }
}

fn spawn_with(binary: PathBuf, target: &Arc<RecordingTarget>, config: UiBridgeConfig) -> UiBridge {
    let target: Arc<dyn UiBridgeTarget> = target.clone();
    let weak: Weak<dyn UiBridgeTarget> = Arc::downgrade(&target);
    UiBridge::spawn(
        binary,
        weak,
        PathBuf::from("/tmp/gain.so"),
        "gain".to_string(),
        "Gain (UI)".to_string(),
        config,
    )
    .unwrap()
}

fn spawn(mode: &str, target: &Arc<RecordingTarget>, timeout_ms: u64) -> UiBridge {
    spawn_with(
        PathBuf::from(env!("CARGO_BIN_EXE_ui-bridge")),
        target,
        config(mode, timeout_ms),
    )
}

fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    condition()
}

#[test]
#[serial]
fn test_handshake_resync_and_relay() {
    let target = Arc::new(RecordingTarget::default());
    let mut bridge = spawn("normal", &target, 5000);
    assert!(bridge.callback_url().ends_with(&format!("/consort/{PLUGIN_ID}")));

    assert!(wait_for(|| bridge.state() == UiBridgeState::Running));

    assert!(bridge.send_control(2, 0.75));
    assert!(wait_for(|| target.has_call("control 2=0.75")));
    assert!(bridge.send_program(0, 3));
    assert!(wait_for(|| target.has_call("program 0:3")));
    assert!(bridge.send_internal(InternalControl::Volume, 0.5));
    assert!(wait_for(|| target.has_call("internal Volume=0.5")));

    bridge.stop_now();
    assert_eq!(bridge.state(), UiBridgeState::Closed);
    assert_eq!(target.closed_count(), 1);
}

#[test]
#[serial]
fn test_handshake_timeout_kills_silent_ui() {
    let target = Arc::new(RecordingTarget::default());
    let bridge = spawn("silent", &target, 300);

    assert!(wait_for(|| bridge.is_finished()));
    assert_eq!(bridge.state(), UiBridgeState::TimedOut);
    assert_eq!(
        target.notifications.lock().as_slice(),
        &[HostNotification::UiStateChanged {
            plugin_id: PLUGIN_ID,
            visible: false
        }]
    );
    assert!(target.calls.lock().is_empty());
}

#[test]
#[serial]
fn test_ui_messages_reach_plugin_before_exit() {
    let target = Arc::new(RecordingTarget::default());
    let bridge = spawn("chatty", &target, 5000);

    assert!(wait_for(|| bridge.is_finished()));
    assert_eq!(bridge.state(), UiBridgeState::Closed);
    for call in [
        "configure skin=dark",
        "control 0=0.5",
        "internal DryWet=0.25",
        "program 0:1",
        "midi [0, 144, 60, 100]",
    ] {
        assert!(target.has_call(call), "missing {call}");
    }
    assert_eq!(target.closed_count(), 1);
}

#[test]
#[serial]
fn test_crashed_ui_is_reported_once() {
    let target = Arc::new(RecordingTarget::default());
    let bridge = spawn("crash", &target, 5000);

    assert!(wait_for(|| bridge.is_finished()));
    assert_eq!(bridge.state(), UiBridgeState::Crashed);
    assert_eq!(target.closed_count(), 1);
}

#[test]
#[serial]
fn test_missing_binary_fails_spawn() {
    let target = Arc::new(RecordingTarget::default());
    let bridge = spawn_with(
        PathBuf::from("/nonexistent/consort-ui"),
        &target,
        config("normal", 1000),
    );

    assert!(wait_for(|| bridge.is_finished()));
    assert_eq!(bridge.state(), UiBridgeState::SpawnFailed);
    assert_eq!(target.closed_count(), 1);
}

#[test]
#[serial]
fn test_datagrams_from_strangers_are_dropped() {
    let target = Arc::new(RecordingTarget::default());
    let bridge = spawn("normal", &target, 5000);
    assert!(wait_for(|| bridge.state() == UiBridgeState::Running));

    let callback = Endpoint::parse(&bridge.callback_url()).unwrap();
    let stranger = UdpSocket::bind("127.0.0.1:0").unwrap();
    let bytes = UiMessage::Control { index: 1, value: 0.9 }
        .encode(&callback.path)
        .unwrap();
    stranger.send_to(&bytes, callback.addr).unwrap();

    thread::sleep(Duration::from_millis(200));
    assert!(!target.has_call("control 1=0.9"));
    assert_eq!(bridge.state(), UiBridgeState::Running);
}

#[test]
#[serial]
fn test_dropping_bridge_closes_ui() {
    let target = Arc::new(RecordingTarget::default());
    let bridge = spawn("normal", &target, 5000);
    assert!(wait_for(|| bridge.state() == UiBridgeState::Running));

    drop(bridge);
    assert_eq!(target.closed_count(), 1);
}
