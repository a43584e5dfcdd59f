//! Engine: the single entry point the application uses.
//!
//! Real-time safe calls (volume, pan, send level, plugin parameters and every
//! read) go straight to the channel under its own lock. Everything else is
//! queued on the dispatcher, and the call blocks until its worker has
//! executed it.

pub(crate) mod context;
pub(crate) mod readiness;

pub use context::Collaborators;

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use patchbay_audio::{
    DeviceEvent, DeviceMonitor, MonitorStats, NodeHandle, OperationTelemetry, PollOutcome,
};
use patchbay_types::{
    AudioInputConfig, AuxConfig, AuxSend, BufferSize, ChannelId, ChannelVariant, EngineId,
    EngineState, MidiInputConfig, PlaybackConfig, PluginBlueprint, PluginInstanceId,
    TransportCommand,
};

use crate::channel::{ChannelSnapshot, PluginInstance, Transport};
use crate::config::EngineSettings;
use crate::dispatch::{self, Dispatcher, OpOutput, Operation};
use crate::error::{EngineError, ErrorHandler};
use crate::persistence::{self, EngineDocument};
use context::EngineContext;

pub struct Engine {
    ctx: Arc<EngineContext>,
    dispatcher: Dispatcher,
    destroyed: AtomicBool,
}

impl Engine {
    /// Build an engine rendering to `settings.output_device_uid`, with its
    /// master channel wired to the output and the dispatcher running.
    pub fn new(settings: EngineSettings, parts: Collaborators) -> Result<Self, EngineError> {
        let native = Arc::clone(&parts.native);
        Self::build(settings, parts).inspect_err(|e| {
            log::error!(target: "engine", "engine construction failed: {}", e);
            native.destroy();
        })
    }

    fn build(settings: EngineSettings, parts: Collaborators) -> Result<Self, EngineError> {
        let (event_tx, event_rx) = crossbeam_channel::unbounded();
        let monitor = DeviceMonitor::new(Arc::clone(&parts.devices), settings.monitor.clone(), event_tx);
        let ctx = Arc::new(EngineContext::new(settings, parts, monitor));

        let device = dispatch::output_device(&ctx, &ctx.settings.output_device_uid)?;
        let native = ctx.native();
        native.set_buffer_size(ctx.settings.buffer_size.as_samples())?;
        native.set_output_device(&device.uid)?;
        dispatch::build_master(&ctx)?;
        readiness::refresh(&ctx);

        let dispatcher = Dispatcher::spawn(Arc::clone(&ctx), event_rx)?;
        log::info!(
            target: "engine",
            "engine {} created on {} ({} frames)",
            *ctx.id.read(),
            device.uid,
            ctx.settings.buffer_size.as_samples()
        );
        Ok(Self {
            ctx,
            dispatcher,
            destroyed: AtomicBool::new(false),
        })
    }

    fn submit(&self, op: Operation) -> Result<OpOutput, EngineError> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(EngineError::DispatcherStopped);
        }
        self.dispatcher.submit(op)
    }

    fn run(&self, op: Operation) -> Result<(), EngineError> {
        self.submit(op).map(|_| ())
    }

    // ─── Lifecycle ──────────────────────────────────────────────────

    pub fn id(&self) -> EngineId {
        *self.ctx.id.read()
    }

    pub fn state(&self) -> EngineState {
        self.ctx.state()
    }

    pub fn is_running(&self) -> bool {
        self.ctx.state() == EngineState::Running && self.ctx.native().is_running()
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.ctx.settings
    }

    pub fn start(&self) -> Result<(), EngineError> {
        self.run(Operation::Start)
    }

    pub fn stop(&self) -> Result<(), EngineError> {
        self.run(Operation::Stop)
    }

    /// Stop, shut the dispatcher down and release native resources.
    /// Only the first call does anything.
    pub fn destroy(&self) {
        if self.destroyed.load(Ordering::SeqCst) {
            return;
        }
        if self.ctx.state() == EngineState::Running {
            if let Err(e) = self.dispatcher.submit(Operation::Stop) {
                log::warn!(target: "engine", "stopping before destroy: {}", e);
            }
        }
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.dispatcher.shutdown();
        self.ctx.monitor.lock().stop();
        self.ctx.native().destroy();
        log::info!(target: "engine", "engine {} destroyed", self.id());
    }

    pub fn buffer_size(&self) -> BufferSize {
        *self.ctx.buffer_size.read()
    }

    /// Only while stopped.
    pub fn set_buffer_size(&self, size: BufferSize) -> Result<(), EngineError> {
        self.run(Operation::SetBufferSize(size))
    }

    pub fn output_device(&self) -> String {
        self.ctx.output_device.read().clone()
    }

    pub fn change_output_device(&self, uid: &str) -> Result<(), EngineError> {
        self.run(Operation::ChangeOutputDevice(uid.to_string()))
    }

    pub fn set_master_options(&self, limiter: bool, metering: bool) -> Result<(), EngineError> {
        self.run(Operation::SetMasterOptions { limiter, metering })
    }

    // ─── Channels ───────────────────────────────────────────────────

    /// Create a channel, named after its kind and id unless `name` is given.
    pub fn create_channel(
        &self,
        name: Option<&str>,
        variant: ChannelVariant,
    ) -> Result<ChannelId, EngineError> {
        match self.submit(Operation::CreateChannel {
            name: name.map(str::to_string),
            variant,
        })? {
            OpOutput::Channel(id) => Ok(id),
            other => Err(EngineError::structural(
                "create channel",
                format!("unexpected reply {other:?}"),
            )),
        }
    }

    pub fn create_audio_input(&self, config: AudioInputConfig) -> Result<ChannelId, EngineError> {
        self.create_channel(None, ChannelVariant::AudioInput(config))
    }

    pub fn create_midi_input(&self, config: MidiInputConfig) -> Result<ChannelId, EngineError> {
        self.create_channel(None, ChannelVariant::MidiInput(config))
    }

    pub fn create_playback(&self, config: PlaybackConfig) -> Result<ChannelId, EngineError> {
        self.create_channel(None, ChannelVariant::Playback(config))
    }

    pub fn create_aux(&self, config: AuxConfig) -> Result<ChannelId, EngineError> {
        self.create_channel(None, ChannelVariant::Aux(config))
    }

    pub fn remove_channel(&self, id: ChannelId) -> Result<(), EngineError> {
        self.run(Operation::RemoveChannel(id))
    }

    pub fn rename_channel(&self, id: ChannelId, name: &str) -> Result<(), EngineError> {
        self.run(Operation::RenameChannel {
            channel: id,
            name: name.to_string(),
        })
    }

    pub fn channel(&self, id: ChannelId) -> Result<ChannelSnapshot, EngineError> {
        Ok(self.ctx.channel(id)?.snapshot())
    }

    /// Every channel, master first.
    pub fn channels(&self) -> Vec<ChannelSnapshot> {
        self.ctx
            .channel_list()
            .iter()
            .map(|c| c.snapshot())
            .collect()
    }

    pub fn channel_ids(&self) -> Vec<ChannelId> {
        self.ctx.channels.read().keys().copied().collect()
    }

    pub fn master(&self) -> Result<ChannelSnapshot, EngineError> {
        self.channel(ChannelId::MASTER)
    }

    pub fn change_input_device(&self, id: ChannelId, uid: &str) -> Result<(), EngineError> {
        self.run(Operation::ChangeInputDevice {
            channel: id,
            uid: uid.to_string(),
        })
    }

    // ─── Mixing ─────────────────────────────────────────────────────

    pub fn set_volume(&self, id: ChannelId, volume: f32) -> Result<(), EngineError> {
        self.ctx.channel(id)?.set_volume(self.ctx.native(), volume)
    }

    pub fn volume(&self, id: ChannelId) -> Result<f32, EngineError> {
        Ok(self.ctx.channel(id)?.volume())
    }

    pub fn set_pan(&self, id: ChannelId, pan: f32) -> Result<(), EngineError> {
        self.ctx.channel(id)?.set_pan(self.ctx.native(), pan)
    }

    pub fn pan(&self, id: ChannelId) -> Result<f32, EngineError> {
        Ok(self.ctx.channel(id)?.pan())
    }

    /// Dispatched: muting changes the graph.
    pub fn set_mute(&self, id: ChannelId, muted: bool) -> Result<(), EngineError> {
        self.run(Operation::SetMute {
            channel: id,
            muted,
        })
    }

    pub fn is_muted(&self, id: ChannelId) -> Result<bool, EngineError> {
        Ok(self.ctx.channel(id)?.muted())
    }

    // ─── Routing ────────────────────────────────────────────────────

    pub fn connect(&self, source: ChannelId, target: ChannelId) -> Result<(), EngineError> {
        self.run(Operation::Connect { source, target })
    }

    pub fn disconnect(&self, source: ChannelId, target: ChannelId) -> Result<(), EngineError> {
        self.run(Operation::Disconnect { source, target })
    }

    pub fn add_send(
        &self,
        source: ChannelId,
        target: ChannelId,
        level: f32,
        pre_fader: bool,
    ) -> Result<(), EngineError> {
        self.run(Operation::AddSend {
            source,
            target,
            level,
            pre_fader,
        })
    }

    pub fn remove_send(&self, source: ChannelId, target: ChannelId) -> Result<(), EngineError> {
        self.run(Operation::RemoveSend { source, target })
    }

    pub fn sends(&self, source: ChannelId) -> Result<Vec<AuxSend>, EngineError> {
        Ok(self.ctx.channel(source)?.snapshot().sends)
    }

    pub fn set_send_level(
        &self,
        source: ChannelId,
        target: ChannelId,
        level: f32,
    ) -> Result<(), EngineError> {
        self.ctx
            .channel(source)?
            .set_send_level(self.ctx.native(), target, level)
    }

    pub fn send_level(&self, source: ChannelId, target: ChannelId) -> Result<f32, EngineError> {
        self.ctx.channel(source)?.send_level(target)
    }

    // ─── Plugins ────────────────────────────────────────────────────

    /// Append a plugin to the end of the chain.
    pub fn add_plugin(
        &self,
        channel: ChannelId,
        blueprint: PluginBlueprint,
    ) -> Result<PluginInstanceId, EngineError> {
        self.insert_plugin(channel, blueprint, None)
    }

    pub fn insert_plugin(
        &self,
        channel: ChannelId,
        blueprint: PluginBlueprint,
        position: Option<usize>,
    ) -> Result<PluginInstanceId, EngineError> {
        match self.submit(Operation::AddPlugin {
            channel,
            blueprint,
            position,
        })? {
            OpOutput::Plugin(id) => Ok(id),
            other => Err(EngineError::structural(
                "add plugin",
                format!("unexpected reply {other:?}"),
            )),
        }
    }

    pub fn remove_plugin(
        &self,
        channel: ChannelId,
        plugin: PluginInstanceId,
    ) -> Result<(), EngineError> {
        self.run(Operation::RemovePlugin { channel, plugin })
    }

    pub fn move_plugin(
        &self,
        channel: ChannelId,
        plugin: PluginInstanceId,
        position: usize,
    ) -> Result<(), EngineError> {
        self.run(Operation::MovePlugin {
            channel,
            plugin,
            position,
        })
    }

    pub fn set_plugin_bypass(
        &self,
        channel: ChannelId,
        plugin: PluginInstanceId,
        bypassed: bool,
    ) -> Result<(), EngineError> {
        self.run(Operation::SetPluginBypass {
            channel,
            plugin,
            bypassed,
        })
    }

    pub fn plugin_bypass(
        &self,
        channel: ChannelId,
        plugin: PluginInstanceId,
    ) -> Result<bool, EngineError> {
        self.plugin(channel, plugin).map(|p| p.bypassed)
    }

    pub fn plugin(
        &self,
        channel: ChannelId,
        plugin: PluginInstanceId,
    ) -> Result<PluginInstance, EngineError> {
        let ch = self.ctx.channel(channel)?;
        let state = ch.lock();
        state
            .plugins
            .get(plugin)
            .cloned()
            .ok_or(EngineError::PluginNotFound { channel, plugin })
    }

    pub fn plugins(&self, channel: ChannelId) -> Result<Vec<PluginInstance>, EngineError> {
        Ok(self.ctx.channel(channel)?.snapshot().plugins)
    }

    pub fn set_parameter(
        &self,
        channel: ChannelId,
        plugin: PluginInstanceId,
        address: u64,
        value: f32,
    ) -> Result<(), EngineError> {
        self.ctx
            .channel(channel)?
            .set_parameter(self.ctx.native(), plugin, address, value)
    }

    pub fn parameter(
        &self,
        channel: ChannelId,
        plugin: PluginInstanceId,
        address: u64,
    ) -> Result<f32, EngineError> {
        self.ctx.channel(channel)?.parameter(plugin, address)
    }

    // ─── Playback transport ─────────────────────────────────────────

    pub fn play(&self, channel: ChannelId) -> Result<(), EngineError> {
        self.transport_command(channel, TransportCommand::Play)
    }

    pub fn pause(&self, channel: ChannelId) -> Result<(), EngineError> {
        self.transport_command(channel, TransportCommand::Pause)
    }

    pub fn stop_playback(&self, channel: ChannelId) -> Result<(), EngineError> {
        self.transport_command(channel, TransportCommand::Stop)
    }

    pub fn seek(&self, channel: ChannelId, seconds: f64) -> Result<(), EngineError> {
        self.transport_command(channel, TransportCommand::Seek(seconds))
    }

    fn transport_command(
        &self,
        channel: ChannelId,
        command: TransportCommand,
    ) -> Result<(), EngineError> {
        self.run(Operation::Transport { channel, command })
    }

    pub fn transport(&self, channel: ChannelId) -> Result<Transport, EngineError> {
        Ok(self.ctx.channel(channel)?.snapshot().transport)
    }

    // ─── Persistence ────────────────────────────────────────────────

    pub fn snapshot(&self) -> Result<EngineDocument, EngineError> {
        persistence::capture(&self.ctx)
    }

    pub fn save_state(&self) -> Result<String, EngineError> {
        self.snapshot()?.to_json()
    }

    /// Replace the whole graph with a saved one. The engine must be stopped;
    /// the document is validated before anything is torn down.
    pub fn load_state(&self, json: &str) -> Result<(), EngineError> {
        let state = self.ctx.state();
        if state == EngineState::Running {
            return Err(EngineError::InvalidState {
                operation: "load state",
                state,
            });
        }
        let document = EngineDocument::from_json(json)?;
        self.run(Operation::Restore(Box::new(document)))
    }

    pub fn save_to_path(&self, path: &Path) -> Result<(), EngineError> {
        let json = self.save_state()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, json)?;
        log::info!(target: "persistence", "saved state to {}", path.display());
        Ok(())
    }

    pub fn load_from_path(&self, path: &Path) -> Result<(), EngineError> {
        let json = std::fs::read_to_string(path)?;
        self.load_state(&json)
    }

    // ─── Callbacks ──────────────────────────────────────────────────

    /// Called on the dispatcher thread after each device event is reconciled.
    /// Submitting engine operations from the callback fails with `ReentrantSubmit`.
    pub fn on_device_change(&self, callback: impl Fn(&DeviceEvent) + Send + Sync + 'static) {
        self.ctx.add_listener(Arc::new(callback));
    }

    /// Replace the handler for failures detected off the caller's thread.
    pub fn set_error_handler(&self, handler: impl ErrorHandler + 'static) {
        self.ctx.set_error_handler(Arc::new(handler));
    }

    // ─── Diagnostics ────────────────────────────────────────────────

    pub fn dispatcher_stats(&self) -> OperationTelemetry {
        self.dispatcher.stats()
    }

    pub fn monitor_stats(&self) -> MonitorStats {
        self.ctx.monitor.lock().stats()
    }

    pub fn set_polling_interval(&self, base: Duration) {
        self.ctx.monitor.lock().set_polling_interval(base);
    }

    /// Probe devices once on the calling thread. Changes reach the
    /// dispatcher like those found by the polling thread.
    pub fn poll_devices(&self) -> PollOutcome {
        self.ctx.monitor.lock().poll_now()
    }

    /// The shared native input node for a `device:bus` key.
    pub fn input_node(&self, key: &str) -> Option<NodeHandle> {
        self.ctx.inputs.lock().node(key)
    }

    /// Channels sharing the input node for `key`.
    pub fn input_node_users(&self, key: &str) -> Vec<ChannelId> {
        self.ctx.inputs.lock().users(key)
    }

    pub fn input_node_count(&self) -> usize {
        self.ctx.inputs.lock().len()
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.destroy();
    }
}
