//! Channels: shared base state plus a variant, guarded by a per-channel lock.
//!
//! Identity, kind and native strip never change after creation. Everything
//! else lives in [`ChannelState`] behind the channel's own mutex. The
//! real-time safe setters here (volume, pan, send level, plugin parameters)
//! are called directly from application threads; every structural change to a
//! channel is made by the dispatcher worker.

mod plugin_chain;
mod strip;

pub use plugin_chain::{restore_parameters, PluginChain, PluginInstance};
pub use strip::Strip;

pub(crate) use plugin_chain::check_slot;
pub(crate) use strip::release_logged;

use parking_lot::{Mutex, MutexGuard};
use patchbay_audio::{NativeEngine, NodeHandle};
use patchbay_types::{
    AuxSend, Capability, ChannelId, ChannelKind, ChannelVariant, Connection, PluginInstanceId,
    TransportState,
};

use crate::error::EngineError;

/// An aux send together with the send mixer that carries its level.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct SendSlot {
    pub send: AuxSend,
    pub node: NodeHandle,
    /// Output bus on the tap node (input mixer or fader).
    pub tap_bus: u32,
    /// Input bus on the aux channel's input mixer.
    pub target_bus: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Transport {
    pub state: TransportState,
    /// Seconds from the start of the file.
    pub position: f64,
}

pub(crate) struct ChannelState {
    pub name: String,
    pub volume: f32,
    pub pan: f32,
    pub muted: bool,
    /// Bound device present and online.
    pub online: bool,
    pub running: bool,
    pub variant: ChannelVariant,
    pub plugins: PluginChain,
    pub connections: Vec<Connection>,
    pub sends: Vec<SendSlot>,
    pub transport: Transport,
}

impl ChannelState {
    pub fn new(name: String, variant: ChannelVariant) -> Self {
        Self {
            name,
            volume: 1.0,
            pan: 0.0,
            muted: false,
            online: true,
            running: false,
            variant,
            plugins: PluginChain::new(),
            connections: Vec::new(),
            sends: Vec::new(),
            transport: Transport::default(),
        }
    }

    pub fn send(&self, target: ChannelId) -> Option<&SendSlot> {
        self.sends.iter().find(|s| s.send.target == target)
    }
}

/// A point-in-time copy of a channel for readers.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelSnapshot {
    pub id: ChannelId,
    pub kind: ChannelKind,
    pub name: String,
    pub volume: f32,
    pub pan: f32,
    pub muted: bool,
    pub online: bool,
    pub running: bool,
    pub variant: ChannelVariant,
    pub plugins: Vec<PluginInstance>,
    pub connections: Vec<Connection>,
    pub sends: Vec<AuxSend>,
    pub transport: Transport,
}

pub struct Channel {
    id: ChannelId,
    kind: ChannelKind,
    strip: Strip,
    state: Mutex<ChannelState>,
}

impl Channel {
    pub(crate) fn new(id: ChannelId, strip: Strip, state: ChannelState) -> Self {
        Self {
            id,
            kind: state.variant.kind(),
            strip,
            state: Mutex::new(state),
        }
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    pub(crate) fn strip(&self) -> &Strip {
        &self.strip
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, ChannelState> {
        self.state.lock()
    }

    pub(crate) fn require(&self, capability: Capability) -> Result<(), EngineError> {
        if self.kind.supports(capability) {
            Ok(())
        } else {
            Err(EngineError::UnsupportedCapability {
                channel: self.id,
                kind: self.kind,
                capability,
            })
        }
    }

    pub fn snapshot(&self) -> ChannelSnapshot {
        let state = self.state.lock();
        ChannelSnapshot {
            id: self.id,
            kind: self.kind,
            name: state.name.clone(),
            volume: state.volume,
            pan: state.pan,
            muted: state.muted,
            online: state.online,
            running: state.running,
            variant: state.variant.clone(),
            plugins: state.plugins.iter().cloned().collect(),
            connections: state.connections.clone(),
            sends: state.sends.iter().map(|s| s.send).collect(),
            transport: state.transport,
        }
    }

    // ─── Real-time safe setters ─────────────────────────────────────

    pub(crate) fn set_volume(&self, native: &dyn NativeEngine, volume: f32) -> Result<(), EngineError> {
        check_unit("volume", volume)?;
        let mut state = self.state.lock();
        native.set_mixer_volume(self.strip.fader, volume)?;
        state.volume = volume;
        Ok(())
    }

    pub fn volume(&self) -> f32 {
        self.state.lock().volume
    }

    pub(crate) fn set_pan(&self, native: &dyn NativeEngine, pan: f32) -> Result<(), EngineError> {
        self.require(Capability::Pan)?;
        if !pan.is_finite() || !(-1.0..=1.0).contains(&pan) {
            return Err(EngineError::invalid_value("pan", pan, "-1.0..=1.0"));
        }
        let mut state = self.state.lock();
        native.set_mixer_pan(self.strip.fader, pan)?;
        state.pan = pan;
        Ok(())
    }

    pub fn pan(&self) -> f32 {
        self.state.lock().pan
    }

    pub fn muted(&self) -> bool {
        self.state.lock().muted
    }

    pub(crate) fn set_send_level(
        &self,
        native: &dyn NativeEngine,
        target: ChannelId,
        level: f32,
    ) -> Result<(), EngineError> {
        check_unit("send level", level)?;
        let mut state = self.state.lock();
        let slot = state
            .sends
            .iter_mut()
            .find(|s| s.send.target == target)
            .ok_or(EngineError::SendNotFound {
                source_id: self.id,
                target,
            })?;
        native.set_mixer_volume(slot.node, level)?;
        slot.send.level = level;
        Ok(())
    }

    pub fn send_level(&self, target: ChannelId) -> Result<f32, EngineError> {
        self.state
            .lock()
            .send(target)
            .map(|s| s.send.level)
            .ok_or(EngineError::SendNotFound {
                source_id: self.id,
                target,
            })
    }

    pub(crate) fn set_parameter(
        &self,
        native: &dyn NativeEngine,
        plugin: PluginInstanceId,
        address: u64,
        value: f32,
    ) -> Result<(), EngineError> {
        let mut state = self.state.lock();
        let instance = state
            .plugins
            .get_mut(plugin)
            .ok_or(EngineError::PluginNotFound {
                channel: self.id,
                plugin,
            })?;
        let unit = match (instance.installed, instance.unit) {
            (true, Some(unit)) => unit,
            _ => {
                return Err(EngineError::PluginNotInstalled {
                    plugin: instance.blueprint.to_string(),
                    instance: plugin,
                })
            }
        };
        let label = instance.blueprint.to_string();
        let param = instance
            .parameters
            .iter_mut()
            .find(|p| p.address == address)
            .ok_or_else(|| EngineError::ParameterNotFound {
                plugin: label.clone(),
                address,
            })?;
        if !param.writable {
            return Err(EngineError::ParameterNotWritable {
                plugin: label,
                address,
            });
        }
        if !param.contains(value) {
            return Err(EngineError::invalid_value(
                "parameter value",
                value,
                format!("{}..={} for {} of {}", param.min, param.max, param.display_name, label),
            ));
        }
        native.set_unit_parameter(unit, address, value)?;
        param.current = value;
        Ok(())
    }

    /// Current value of a parameter. A plugin that failed to load reports the
    /// value it was saved with.
    pub fn parameter(&self, plugin: PluginInstanceId, address: u64) -> Result<f32, EngineError> {
        let state = self.state.lock();
        let instance = state.plugins.get(plugin).ok_or(EngineError::PluginNotFound {
            channel: self.id,
            plugin,
        })?;
        let live = instance.parameter(address).map(|p| p.current);
        let saved = || {
            instance
                .saved
                .iter()
                .find(|v| v.address == address)
                .map(|v| v.value)
        };
        live.or_else(saved).ok_or_else(|| EngineError::ParameterNotFound {
            plugin: instance.blueprint.to_string(),
            address,
        })
    }
}

pub(crate) fn check_unit(field: &'static str, value: f32) -> Result<(), EngineError> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(EngineError::invalid_value(field, value, "0.0..=1.0"))
    }
}
