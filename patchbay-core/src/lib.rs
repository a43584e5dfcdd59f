//! # patchbay-core
//!
//! Control plane of the patchbay audio host: the channel graph, the
//! single-writer dispatcher that serializes every structural change, device
//! hotplug reconciliation and state persistence.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use patchbay_audio::{AudioDevice, TestDevices, TestEngine, TestPlugins};
//! use patchbay_core::{Collaborators, Config, Engine};
//! use patchbay_types::AudioInputConfig;
//!
//! let devices = TestDevices::new()
//!     .with_audio(AudioDevice::new("out", "Speakers").with_outputs(2))
//!     .with_audio(AudioDevice::new("mic", "Interface").with_inputs(2));
//! let parts = Collaborators::new(
//!     Arc::new(TestEngine::new()),
//!     Arc::new(devices),
//!     Arc::new(TestPlugins::new()),
//! );
//! let engine = Engine::new(Config::load().engine_settings("out"), parts)?;
//!
//! let input = engine.create_audio_input(AudioInputConfig::new("mic", 0))?;
//! engine.set_volume(input, 0.8)?;   // direct, under the channel lock
//! engine.start()?;                  // dispatched
//! engine.set_mute(input, true)?;    // dispatched: a topology change
//! engine.stop()?;
//! ```
//!
//! ## Module Overview
//!
//! - [`engine`]: `Engine`, the application-facing entry point
//! - [`channel`]: channel state, native strips and plugin chains
//! - [`graph`]: shared input nodes and bus allocation
//! - [`persistence`]: versioned JSON engine documents
//! - [`config`]: TOML configuration (embedded defaults + user override)
//! - [`error`]: `EngineError` and the asynchronous `ErrorHandler`
//! - [`logging`]: file logger setup

pub mod channel;
pub mod config;
mod dispatch;
pub mod engine;
pub mod error;
pub mod graph;
pub mod logging;
pub mod persistence;

pub use channel::{ChannelSnapshot, PluginInstance, Transport};
pub use config::{Config, EngineSettings};
pub use engine::{Collaborators, Engine};
pub use error::{EngineError, ErrorHandler, LogErrorHandler};
pub use persistence::{ChannelDocument, EngineDocument, PluginDocument, FORMAT_VERSION};
