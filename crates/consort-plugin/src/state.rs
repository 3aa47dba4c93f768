//! Persisted plugin state: custom data entries plus an optional opaque chunk.

use crate::{PluginOptions, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CustomDataType {
    String,
    Chunk,
}

impl CustomDataType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CustomDataType::String => "string",
            CustomDataType::Chunk => "chunk",
        }
    }
}

/// One key/value entry a plugin or its UI asked the host to remember.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomData {
    pub kind: CustomDataType,
    pub key: String,
    pub value: String,
}

/// Insertion-ordered custom data, one entry per `(kind, key)`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CustomDataStore(Vec<CustomData>);

impl CustomDataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the value of an existing entry or append a new one.
    /// Returns `true` if the stored value changed.
    pub fn set(&mut self, kind: CustomDataType, key: &str, value: &str) -> bool {
        if let Some(entry) = self.0.iter_mut().find(|d| d.kind == kind && d.key == key) {
            if entry.value == value {
                return false;
            }
            entry.value = value.to_string();
            return true;
        }

        self.0.push(CustomData {
            kind,
            key: key.to_string(),
            value: value.to_string(),
        });
        true
    }

    pub fn get(&self, kind: CustomDataType, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|d| d.kind == kind && d.key == key)
            .map(|d| d.value.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &CustomData> {
        self.0.iter()
    }

    /// String entries only, the ones replayed to a reconnecting UI.
    pub fn strings(&self) -> impl Iterator<Item = &CustomData> {
        self.0.iter().filter(|d| d.kind == CustomDataType::String)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }
}

impl FromIterator<CustomData> for CustomDataStore {
    fn from_iter<I: IntoIterator<Item = CustomData>>(iter: I) -> Self {
        let mut store = Self::new();
        for entry in iter {
            store.set(entry.kind, &entry.key, &entry.value);
        }
        store
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterState {
    pub index: u32,
    pub rindex: u32,
    pub name: String,
    pub value: f32,
    pub midi_channel: u8,
    pub midi_cc: Option<u8>,
}

/// Everything needed to bring a fresh instance back to a saved state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginState {
    pub plugin_type: String,
    pub name: String,
    pub label: String,
    pub filename: Option<String>,
    pub active: bool,
    pub options: PluginOptions,
    pub dry_wet: f32,
    pub volume: f32,
    pub balance_left: f32,
    pub balance_right: f32,
    pub panning: f32,
    pub ctrl_channel: u8,
    pub current_program: Option<usize>,
    /// `(bank, program)` of the selected MIDI program.
    pub current_midi_program: Option<(u32, u32)>,
    pub parameters: Vec<ParameterState>,
    pub custom_data: CustomDataStore,
    /// Opaque plugin blob, never interpreted by the host.
    pub chunk: Option<Vec<u8>>,
}

impl PluginState {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}
