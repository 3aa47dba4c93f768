//! Centralized error type for the consort umbrella crate.
//!
//! Wraps the subsystem errors so `?` propagates naturally across crate boundaries.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Plugin: {0}")]
    Plugin(#[from] consort_plugin::PluginError),

    #[error("UI client: {0}")]
    UiClient(#[from] consort_ui_bridge::ClientError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
