//! UI-process side of the Consort UI bridge
//!
//! A plugin editor runs as its own process, started by the host with
//! `<host-url> <filename> <label> <title>`. It answers with `update` carrying
//! its own URL, then exchanges OSC messages with the host until told to
//! `quit` or it decides to leave with `exiting`.
//!
//! The `ui-bridge` binary in this crate is a headless editor used to
//! exercise the host side; real editors embed [`UiClient`].

pub mod client;
pub mod error;

pub use client::{UiArgs, UiClient, UI_PATH};
pub use error::{ClientError, Result};

pub use consort_plugin::ui_bridge::{HostUiMessage, UiMessage};
