//! # Consort - Audio/MIDI Plugin Host
//!
//! Loads signal-processing plugins behind one lifecycle and drives them from a
//! realtime audio callback.
//!
//! ## Architecture
//!
//! Consort is an umbrella crate over:
//! - **consort-plugin** - Plugin model, instances, sample-accurate dispatch,
//!   state, the native C ABI and the host side of the UI bridge
//! - **consort-ui-bridge** - The UI-process side of the bridge protocol and
//!   the headless `ui-bridge` executable
//!
//! ## Quick Start
//!
//! ```ignore
//! use consort::prelude::*;
//!
//! let mut registry = NativeRegistry::new();
//! registry.register(&MY_PLUGIN_DESCRIPTOR)?;
//!
//! let adapter = Arc::new(registry.find("my-plugin")?);
//! let plugin = PluginInstance::new(adapter, engine, EngineOptions::default(), PluginInit::new(0))?;
//! plugin.set_active(true);
//!
//! // Audio thread
//! plugin.process(&inputs, &mut outputs, &events, frames);
//!
//! // Control thread, regularly
//! plugin.idle();
//! ```
//!
//! ## Feature Flags
//!
//! - `default` - `native`
//! - `native` - Load native plugin descriptors from shared libraries

/// Re-export of consort-plugin for direct access
pub use consort_plugin as plugin;

/// Re-export of consort-ui-bridge, the UI-process side
pub use consort_ui_bridge as ui_bridge;

// Plugin model
pub use consort_plugin::{
    FormatAdapter, FormatInstance, InternalAdapter, PluginCategory, PluginHints, PluginInfo,
    PluginOptions, PluginType, PortInfo,
};

// Instances and dispatch
pub use consort_plugin::{
    ControlEvent, EngineEvent, EngineOptions, PluginInit, PluginInstance, ProcessMode,
};

// Host surface
pub use consort_plugin::{EngineCallbacks, HostNotification, InternalControl, TimeInfo};

// Native plugins
pub use consort_plugin::{NativeAdapter, NativeRegistry};

#[cfg(feature = "native")]
pub use consort_plugin::NativeLibrary;

// State
pub use consort_plugin::{CustomDataType, PluginState};

// UI bridge
pub use consort_plugin::{UiBridge, UiBridgeConfig, UiBridgeState};

mod error;
pub use error::{Error, Result};

/// Convenient imports for common usage
pub mod prelude {
    pub use crate::{Error, Result};

    pub use crate::{
        ControlEvent, CustomDataType, EngineCallbacks, EngineEvent, EngineOptions, FormatAdapter,
        FormatInstance, HostNotification, InternalAdapter, InternalControl, NativeAdapter,
        NativeRegistry, PluginHints, PluginInfo, PluginInit, PluginInstance, PluginOptions,
        PluginState, PortInfo, ProcessMode, TimeInfo, UiBridgeConfig,
    };

    pub use std::sync::Arc;
}
