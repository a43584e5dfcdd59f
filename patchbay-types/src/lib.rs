//! # patchbay-types
//!
//! Shared type definitions for the patchbay audio host.
//! This crate contains the plain data used by patchbay-audio and patchbay-core:
//! identifiers, channel variants and their configurations, routing records,
//! plugin blueprints and address-keyed parameter values.

mod buffer;
mod channel;
mod plugin;

pub use buffer::BufferSize;
pub use channel::{
    AudioInputConfig, AuxConfig, AuxSend, Capability, ChannelKind, ChannelVariant, Connection,
    DeviceKind, MasterConfig, MidiInputConfig, PlaybackConfig, TransportCommand, TransportState,
};
pub use plugin::{Parameter, ParameterValue, PluginBlueprint, PluginCategory};

/// Unique identifier for a channel. The master channel is always `ChannelId::MASTER`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(transparent)]
pub struct ChannelId(u32);

impl ChannelId {
    pub const MASTER: ChannelId = ChannelId(0);

    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn get(self) -> u32 {
        self.0
    }

    pub fn is_master(self) -> bool {
        self == Self::MASTER
    }
}

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for ChannelId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(ChannelId)
    }
}

/// Unique identifier for a plugin instance, allocated engine-wide.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(transparent)]
pub struct PluginInstanceId(u32);

impl PluginInstanceId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn get(self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for PluginInstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "plugin_{}", self.0)
    }
}

/// Identity of one engine instance, persisted with its state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct EngineId(uuid::Uuid);

impl EngineId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    pub fn from_uuid(id: uuid::Uuid) -> Self {
        Self(id)
    }

    pub fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }
}

impl std::fmt::Display for EngineId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Engine lifecycle. Readiness is recomputed after every structural change;
/// stopping a running engine returns to `AudioGraphReady`, never to `Created`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub enum EngineState {
    #[default]
    Created,
    MasterReady,
    ChannelsReady,
    AudioGraphReady,
    Running,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            EngineState::Created => "created",
            EngineState::MasterReady => "master-ready",
            EngineState::ChannelsReady => "channels-ready",
            EngineState::AudioGraphReady => "audio-graph-ready",
            EngineState::Running => "running",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_id_string_key_round_trips() {
        let id = ChannelId::new(42);
        let key = id.to_string();
        assert_eq!(key, "42");
        assert_eq!(key.parse::<ChannelId>().unwrap(), id);
        assert!("x42".parse::<ChannelId>().is_err());
    }

    #[test]
    fn master_id_is_zero() {
        assert!(ChannelId::MASTER.is_master());
        assert_eq!(ChannelId::MASTER.get(), 0);
        assert!(!ChannelId::new(1).is_master());
    }

    #[test]
    fn plugin_instance_display() {
        assert_eq!(PluginInstanceId::new(3).to_string(), "plugin_3");
    }

    #[test]
    fn engine_ids_are_unique() {
        assert_ne!(EngineId::generate(), EngineId::generate());
    }

    #[test]
    fn ids_serialize_transparently() {
        let json = serde_json::to_string(&ChannelId::new(7)).unwrap();
        assert_eq!(json, "7");
    }
}
