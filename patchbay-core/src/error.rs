//! Error taxonomy and the asynchronous error sink.

use std::path::PathBuf;
use std::time::Duration;

use patchbay_audio::{DeviceError, NativeError};
use patchbay_types::{Capability, ChannelId, ChannelKind, EngineState, PluginInstanceId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("device {uid} is offline{}", affected(.channels))]
    DeviceOffline { uid: String, channels: Vec<ChannelId> },

    #[error("device {uid} not found")]
    DeviceNotFound { uid: String },

    #[error("device {uid} was removed{}", affected(.channels))]
    DeviceRemoved { uid: String, channels: Vec<ChannelId> },

    #[error("plugin {plugin} failed to load on channel {channel}: {reason}")]
    PluginLoadFailed {
        plugin: String,
        channel: ChannelId,
        reason: String,
    },

    #[error("plugin {plugin} on channel {channel} is unresponsive")]
    PluginUnresponsive { plugin: String, channel: ChannelId },

    #[error("native engine reported {count} buffer underrun(s)")]
    BufferUnderrun { count: u64 },

    #[error("engine failed to start: {reason}")]
    EngineStartFailed { reason: String },

    #[error("{operation} failed: {reason}")]
    StructuralOperationFailed {
        operation: &'static str,
        reason: String,
    },

    #[error("state document version {found} is not supported (expected {expected})")]
    SerializationVersionMismatch {
        found: String,
        expected: &'static str,
    },

    #[error("channel {0} not found")]
    ChannelNotFound(ChannelId),

    #[error("{plugin} not found on channel {channel}")]
    PluginNotFound {
        channel: ChannelId,
        plugin: PluginInstanceId,
    },

    #[error("{plugin} ({instance}) is not installed")]
    PluginNotInstalled {
        plugin: String,
        instance: PluginInstanceId,
    },

    #[error("{plugin} has no parameter at address {address}")]
    ParameterNotFound { plugin: String, address: u64 },

    #[error("parameter {address} of {plugin} is read-only")]
    ParameterNotWritable { plugin: String, address: u64 },

    #[error("the master channel cannot be {action}")]
    MasterChannelImmutable { action: &'static str },

    #[error("channel {channel} ({kind}) does not support {capability}")]
    UnsupportedCapability {
        channel: ChannelId,
        kind: ChannelKind,
        capability: Capability,
    },

    #[error("invalid {field} {value}: expected {expected}")]
    InvalidValue {
        field: &'static str,
        value: String,
        expected: String,
    },

    #[error("invalid file path {}: {reason}", .path.display())]
    InvalidFilePath { path: PathBuf, reason: &'static str },

    #[error("cannot {operation} while the engine is {state}")]
    InvalidState {
        operation: &'static str,
        state: EngineState,
    },

    #[error("channel {source_id} is not connected to channel {target}")]
    ConnectionNotFound {
        source_id: ChannelId,
        target: ChannelId,
    },

    #[error("channel {source_id} is already connected to channel {target}")]
    DuplicateConnection {
        source_id: ChannelId,
        target: ChannelId,
    },

    #[error("cannot connect channel {source_id} to channel {target}: {reason}")]
    InvalidConnection {
        source_id: ChannelId,
        target: ChannelId,
        reason: &'static str,
    },

    #[error("channel {source_id} has no aux send to channel {target}")]
    SendNotFound {
        source_id: ChannelId,
        target: ChannelId,
    },

    #[error("channel {source_id} already sends to aux channel {target}")]
    DuplicateSend {
        source_id: ChannelId,
        target: ChannelId,
    },

    #[error("invalid state document: {0}")]
    InvalidDocument(String),

    #[error("device probe failed: {0}")]
    DeviceProbeFailed(String),

    #[error("{operation} took {elapsed:?}, target is {budget:?}")]
    LatencyBudgetExceeded {
        operation: &'static str,
        elapsed: Duration,
        budget: Duration,
    },

    #[error("dispatcher is not running")]
    DispatcherStopped,

    #[error("{operation} submitted from the dispatcher thread")]
    ReentrantSubmit { operation: &'static str },

    #[error("native engine: {0}")]
    Native(#[from] NativeError),

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error("state serialization: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl EngineError {
    pub(crate) fn invalid_value(
        field: &'static str,
        value: impl std::fmt::Display,
        expected: impl Into<String>,
    ) -> Self {
        EngineError::InvalidValue {
            field,
            value: value.to_string(),
            expected: expected.into(),
        }
    }

    pub(crate) fn structural(operation: &'static str, reason: impl std::fmt::Display) -> Self {
        EngineError::StructuralOperationFailed {
            operation,
            reason: reason.to_string(),
        }
    }
}

fn affected(channels: &[ChannelId]) -> String {
    if channels.is_empty() {
        return String::new();
    }
    let ids: Vec<String> = channels.iter().map(|c| c.to_string()).collect();
    format!(" (channels {})", ids.join(", "))
}

/// Sink for failures detected on the dispatcher or monitor threads.
///
/// Called from those threads; implementations marshal to a UI thread themselves.
pub trait ErrorHandler: Send + Sync {
    fn handle_error(&self, error: &EngineError);
}

impl<F> ErrorHandler for F
where
    F: Fn(&EngineError) + Send + Sync,
{
    fn handle_error(&self, error: &EngineError) {
        self(error)
    }
}

/// Default handler: log at error level.
pub struct LogErrorHandler;

impl ErrorHandler for LogErrorHandler {
    fn handle_error(&self, error: &EngineError) {
        log::error!(target: "engine", "{}", error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_errors_name_uid_and_channels() {
        let err = EngineError::DeviceRemoved {
            uid: "usb-1".into(),
            channels: vec![ChannelId::new(2), ChannelId::new(5)],
        };
        assert_eq!(err.to_string(), "device usb-1 was removed (channels 2, 5)");

        let err = EngineError::DeviceOffline {
            uid: "usb-1".into(),
            channels: vec![],
        };
        assert_eq!(err.to_string(), "device usb-1 is offline");
    }

    #[test]
    fn master_refusal_is_descriptive() {
        let err = EngineError::MasterChannelImmutable { action: "removed" };
        assert_eq!(err.to_string(), "the master channel cannot be removed");
    }

    #[test]
    fn capability_error_names_channel() {
        let err = EngineError::UnsupportedCapability {
            channel: ChannelId::new(3),
            kind: ChannelKind::Playback,
            capability: Capability::Pan,
        };
        assert_eq!(err.to_string(), "channel 3 (playback) does not support pan");
    }

    #[test]
    fn closures_are_error_handlers() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let handler: Arc<dyn ErrorHandler> = Arc::new(move |_: &EngineError| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        handler.handle_error(&EngineError::DispatcherStopped);
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }
}
