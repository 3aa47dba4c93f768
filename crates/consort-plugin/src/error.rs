//! Error types for plugin loading, state and UI bridging

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStage {
    Opening,
    Descriptor,
    Instantiation,
    Reload,
    Activation,
}

impl std::fmt::Display for LoadStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoadStage::Opening => write!(f, "opening library"),
            LoadStage::Descriptor => write!(f, "reading descriptor"),
            LoadStage::Instantiation => write!(f, "creating instance"),
            LoadStage::Reload => write!(f, "enumerating ports"),
            LoadStage::Activation => write!(f, "activating"),
        }
    }
}

#[derive(Error, Debug)]
pub enum PluginError {
    #[error("Plugin load failed at {stage} stage: {path}\n  Reason: {reason}")]
    LoadFailed {
        path: PathBuf,
        stage: LoadStage,
        reason: String,
    },

    #[error("Plugin descriptor is missing required function `{0}`")]
    MissingFunction(&'static str),

    #[error("Native ABI version mismatch: host {host}, plugin {plugin}")]
    AbiVersionMismatch { host: u32, plugin: u32 },

    #[error("No plugin with label `{0}`")]
    UnknownLabel(String),

    #[error("Index {index} out of range for {what} (count {count})")]
    OutOfRange {
        what: &'static str,
        index: usize,
        count: usize,
    },

    #[error("Plugin call `{0}` panicked")]
    CallPanicked(&'static str),

    #[error("Failed to save plugin state: {0}")]
    StateSaveError(String),

    #[error("Failed to restore plugin state: {0}")]
    StateRestoreError(String),

    #[error("UI bridge error: {0}")]
    UiBridge(String),

    #[error("Protocol error: {0}")]
    ProtocolError(String),

    #[error("Timeout after {duration_ms}ms: {operation}")]
    Timeout { operation: String, duration_ms: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),
}

pub type Result<T> = std::result::Result<T, PluginError>;
