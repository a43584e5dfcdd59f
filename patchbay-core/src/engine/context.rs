//! State shared between the application-facing `Engine` and the dispatcher worker.
//!
//! The channel table and the input node cache are only written by the worker;
//! application threads take read locks to look channels up.

use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use patchbay_audio::{
    AudioFormat, DeviceEvent, DeviceMonitor, DeviceProvider, NativeEngine, PluginProvider,
};
use patchbay_types::{BufferSize, ChannelId, EngineId, EngineState, PluginInstanceId};

use crate::channel::Channel;
use crate::config::EngineSettings;
use crate::error::{EngineError, ErrorHandler, LogErrorHandler};
use crate::graph::InputNodeCache;

pub(crate) type DeviceListener = Arc<dyn Fn(&DeviceEvent) + Send + Sync>;

pub(crate) struct EngineContext {
    pub settings: EngineSettings,
    pub format: AudioFormat,
    pub native: Arc<dyn NativeEngine>,
    pub devices: Arc<dyn DeviceProvider>,
    pub plugins: Arc<dyn PluginProvider>,
    pub id: RwLock<EngineId>,
    pub buffer_size: RwLock<BufferSize>,
    pub output_device: RwLock<String>,
    pub state: RwLock<EngineState>,
    pub channels: RwLock<BTreeMap<ChannelId, Arc<Channel>>>,
    pub inputs: Mutex<InputNodeCache>,
    pub monitor: Mutex<DeviceMonitor>,
    errors: RwLock<Arc<dyn ErrorHandler>>,
    listeners: RwLock<Vec<DeviceListener>>,
    next_channel: AtomicU32,
    next_plugin: AtomicU32,
}

/// The external systems an `Engine` drives.
pub struct Collaborators {
    pub native: Arc<dyn NativeEngine>,
    pub devices: Arc<dyn DeviceProvider>,
    pub plugins: Arc<dyn PluginProvider>,
    pub errors: Arc<dyn ErrorHandler>,
}

impl Collaborators {
    /// Collaborators reporting asynchronous errors to the log.
    pub fn new(
        native: Arc<dyn NativeEngine>,
        devices: Arc<dyn DeviceProvider>,
        plugins: Arc<dyn PluginProvider>,
    ) -> Self {
        Self {
            native,
            devices,
            plugins,
            errors: Arc::new(LogErrorHandler),
        }
    }

    pub fn with_error_handler(mut self, handler: impl ErrorHandler + 'static) -> Self {
        self.errors = Arc::new(handler);
        self
    }
}

impl EngineContext {
    pub fn new(settings: EngineSettings, parts: Collaborators, monitor: DeviceMonitor) -> Self {
        Self {
            format: AudioFormat::stereo(f64::from(settings.sample_rate)),
            buffer_size: RwLock::new(settings.buffer_size),
            output_device: RwLock::new(settings.output_device_uid.clone()),
            settings,
            native: parts.native,
            devices: parts.devices,
            plugins: parts.plugins,
            id: RwLock::new(EngineId::generate()),
            state: RwLock::new(EngineState::Created),
            channels: RwLock::new(BTreeMap::new()),
            inputs: Mutex::new(InputNodeCache::new()),
            monitor: Mutex::new(monitor),
            errors: RwLock::new(parts.errors),
            listeners: RwLock::new(Vec::new()),
            next_channel: AtomicU32::new(1),
            next_plugin: AtomicU32::new(1),
        }
    }

    pub fn native(&self) -> &dyn NativeEngine {
        &*self.native
    }

    pub fn state(&self) -> EngineState {
        *self.state.read()
    }

    pub fn set_state(&self, state: EngineState) {
        let mut current = self.state.write();
        if *current != state {
            log::debug!(target: "engine", "state {} -> {}", *current, state);
            *current = state;
        }
    }

    pub fn channel(&self, id: ChannelId) -> Result<Arc<Channel>, EngineError> {
        self.channels
            .read()
            .get(&id)
            .cloned()
            .ok_or(EngineError::ChannelNotFound(id))
    }

    pub fn master(&self) -> Result<Arc<Channel>, EngineError> {
        self.channel(ChannelId::MASTER)
    }

    /// Every channel, master first, in id order.
    pub fn channel_list(&self) -> Vec<Arc<Channel>> {
        self.channels.read().values().cloned().collect()
    }

    pub fn allocate_channel_id(&self) -> ChannelId {
        ChannelId::new(self.next_channel.fetch_add(1, Ordering::SeqCst))
    }

    pub fn allocate_plugin_id(&self) -> PluginInstanceId {
        PluginInstanceId::new(self.next_plugin.fetch_add(1, Ordering::SeqCst))
    }

    /// Continue numbering after the highest ids in use.
    pub fn reset_counters(&self, max_channel: u32, max_plugin: u32) {
        self.next_channel.store(max_channel + 1, Ordering::SeqCst);
        self.next_plugin.store(max_plugin + 1, Ordering::SeqCst);
    }

    /// Hand an asynchronous failure to the error handler. A panicking handler
    /// is logged and otherwise ignored.
    pub fn report(&self, error: &EngineError) {
        let handler = Arc::clone(&*self.errors.read());
        if panic::catch_unwind(AssertUnwindSafe(|| handler.handle_error(error))).is_err() {
            log::error!(target: "engine", "error handler panicked while handling: {}", error);
        }
    }

    pub fn set_error_handler(&self, handler: Arc<dyn ErrorHandler>) {
        *self.errors.write() = handler;
    }

    pub fn add_listener(&self, listener: DeviceListener) {
        self.listeners.write().push(listener);
    }

    /// Deliver a device event to every registered callback.
    pub fn notify_listeners(&self, event: &DeviceEvent) {
        let listeners: Vec<DeviceListener> = self.listeners.read().clone();
        for listener in listeners {
            if panic::catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
                log::error!(target: "engine", "device callback panicked on {:?}", event);
            }
        }
    }
}
