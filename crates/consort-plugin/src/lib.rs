//! Plugin hosting core for Consort
//!
//! A [`PluginInstance`] wraps one loaded plugin behind a uniform model of
//! ports, parameters, programs and custom data, and renders it from the audio
//! thread with sample-accurate parameter and MIDI events.
//!
//! ## Layers
//!
//! - **Formats**: [`FormatAdapter`] / [`FormatInstance`] are the seam every
//!   plugin format implements. [`NativeAdapter`] speaks the C ABI in [`abi`];
//!   [`InternalAdapter`] wraps plugins written in Rust.
//! - **Instance**: layout, values and the master/single locks; reload,
//!   programs, chunks and state persistence.
//! - **Dispatcher**: splits each buffer at event times, applies internal
//!   controls, then dry/wet, balance and volume.
//! - **UI bridge**: external editors run as child processes and talk OSC over
//!   loopback UDP.
//!
//! ## Usage
//!
//! ```ignore
//! use consort_plugin::{EngineOptions, NativeRegistry, PluginInit, PluginInstance};
//!
//! let mut registry = NativeRegistry::new();
//! registry.register(&MY_DESCRIPTOR)?;
//! let adapter = Arc::new(registry.find("my_plugin")?);
//!
//! let plugin = PluginInstance::new(adapter, engine, EngineOptions::default(), PluginInit::new(1))?;
//! plugin.set_active(true);
//! plugin.process(&inputs, &mut outputs, &events, frames);
//! ```

#[macro_use]
mod flags;
pub use flags::{PluginHints, PluginOptions};

pub mod error;
pub use error::{LoadStage, PluginError, Result};

pub mod abi;

pub mod adapter;
pub use adapter::{
    guarded, ControlPortInfo, FormatAdapter, FormatInstance, InternalAdapter, PluginCategory, PluginInfo,
    PluginOpcode, PluginSupports, PluginType, PortDirection, PortInfo, PortKind, ProcessContext,
};

pub mod config;
pub use config::{EngineOptions, ProcessMode, UiBridgeConfig};

pub mod event;
pub use event::{ControlEvent, EngineEvent, EngineEventKind};

pub mod host;
pub use host::{
    EngineCallbacks, HostCallbacks, HostNotification, HostOpcode, InternalControl, TimeInfo, TimeInfoBbt,
};

pub mod instance;
pub use instance::{ExternalNote, PluginInit, PluginInstance};

pub mod midi;
pub use midi::{MidiEvent, MidiProgram};

pub mod native;
pub use native::{NativeAdapter, NativeRegistry};
#[cfg(feature = "native-library")]
pub use native::NativeLibrary;

pub mod parameter;
pub use parameter::{Parameter, ParameterData, ParameterHints, ParameterRanges, ParameterSpecial, ParameterType};

pub mod ports;
pub use ports::PluginLayout;

pub mod postponed;
pub use postponed::{PostponedEvent, PostponedQueue, RtDiagnostic};

mod postprocess;
mod process;
pub use process::balance_from_controller;

pub mod state;
pub use state::{CustomData, CustomDataType, ParameterState, PluginState};

pub mod ui_bridge;
pub use ui_bridge::{UiBridge, UiBridgeState};
