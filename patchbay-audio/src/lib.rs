//! # patchbay-audio
//!
//! The audio-facing layer of the patchbay host: the seams to the native render
//! engine, device enumeration and plugin introspection, plus the device hotplug
//! monitor and latency telemetry.
//!
//! ## Module Overview
//!
//! - [`native`]: `NativeEngine` trait over the render engine's node graph, with
//!   a recording `TestEngine` and a no-op `NullEngine`
//! - [`devices`]: `DeviceProvider` trait, device records, the in-memory
//!   `TestDevices` provider and (feature `system-devices`) a cpal/midir provider
//! - [`plugins`]: `PluginProvider` trait, introspected plugins, `TestPlugins`
//!   and a JSON-backed plugin catalog
//! - [`monitor`]: adaptive-rate `DeviceMonitor` emitting `MonitorEvent`s
//! - [`telemetry`]: probe and operation latency tracking

pub mod devices;
pub mod monitor;
pub mod native;
pub mod plugins;
pub mod telemetry;

pub use devices::{AudioDevice, DeviceCounts, DeviceError, DeviceProvider, MidiDevice, TestDevices};
pub use monitor::{DeviceEvent, DeviceMonitor, MonitorEvent, MonitorSettings, MonitorStats, PollOutcome};
pub use native::{
    AudioFormat, Link, NativeCall, NativeEngine, NativeError, NativeOp, NativeResult, NodeHandle, NullEngine,
    TestEngine,
};
pub use plugins::{JsonPluginCatalog, Plugin, PluginError, PluginInfo, PluginProvider, TestPlugins};
pub use telemetry::{OperationTelemetry, ProbeSummary};
