//! Headless UI bridge. Spawned by the host in place of a plugin editor.
//!
//! `CONSORT_UI_BRIDGE_MODE` selects the behaviour:
//!
//! - `normal` (default): handshake, echo every control and program back, leave on `quit`
//! - `silent`: never handshake
//! - `chatty`: handshake, send one of each UI message, then `exiting`
//! - `crash`: handshake, then exit with status 3 without saying goodbye

use consort_ui_bridge::{HostUiMessage, Result, UiArgs, UiClient};
use std::env;
use std::time::Duration;

const MODE_VAR: &str = "CONSORT_UI_BRIDGE_MODE";
const CRASH_STATUS: i32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Normal,
    Silent,
    Chatty,
    Crash,
}

impl Mode {
    fn from_env() -> Self {
        match env::var(MODE_VAR).as_deref() {
            Ok("silent") => Mode::Silent,
            Ok("chatty") => Mode::Chatty,
            Ok("crash") => Mode::Crash,
            Ok("normal") | Err(_) => Mode::Normal,
            Ok(other) => {
                tracing::warn!("Unknown {} '{}', running normally", MODE_VAR, other);
                Mode::Normal
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = UiArgs::from_env()?;
    let mode = Mode::from_env();
    let mut client = UiClient::connect(&args.host_url).await?;
    tracing::info!("UI '{}' for {} starting in {:?} mode", args.title, args.label, mode);

    if mode == Mode::Silent {
        loop {
            tokio::time::sleep(Duration::from_secs(60)).await;
        }
    }

    client.send_update().await?;
    wait_for_show(&mut client).await?;

    match mode {
        Mode::Crash => std::process::exit(CRASH_STATUS),
        Mode::Chatty => {
            client.send_configure("skin", "dark").await?;
            client.send_control(0, 0.5).await?;
            client.send_control(-3, 0.25).await?;
            client.send_program(0, 1).await?;
            client.send_midi([0, 0x90, 60, 100]).await?;
            client.send_exiting().await?;
            Ok(())
        }
        Mode::Normal | Mode::Silent => echo(&mut client).await,
    }
}

/// The host finishes its resync with `show`.
async fn wait_for_show(client: &mut UiClient) -> Result<()> {
    loop {
        if client.recv().await? == HostUiMessage::Show {
            return Ok(());
        }
    }
}

async fn echo(client: &mut UiClient) -> Result<()> {
    loop {
        match client.recv().await? {
            HostUiMessage::Control { index, value } => client.send_control(index, value).await?,
            HostUiMessage::Program { bank, program } => client.send_program(bank, program).await?,
            HostUiMessage::Quit => {
                client.send_exiting().await?;
                tracing::info!("UI quitting");
                return Ok(());
            }
            other => tracing::debug!("UI got {:?}", other),
        }
    }
}
