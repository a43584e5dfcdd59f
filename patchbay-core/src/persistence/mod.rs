//! Engine state as a versioned JSON document.
//!
//! Plugin parameters are stored by stable address, never by position, so a
//! plugin update that reorders its parameters still restores correctly.

mod restore;

pub(crate) use restore::restore;

use std::collections::{BTreeMap, BTreeSet};

use patchbay_types::{
    AuxSend, BufferSize, Capability, ChannelId, ChannelKind, ChannelVariant, Connection, EngineId,
    ParameterValue, PluginBlueprint, PluginInstanceId,
};
use serde::{Deserialize, Serialize};

use crate::channel::{check_slot, check_unit, ChannelSnapshot, PluginInstance};
use crate::engine::context::EngineContext;
use crate::error::EngineError;

/// The only document version this build reads and writes.
pub const FORMAT_VERSION: &str = "1.0.0";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineDocument {
    pub version: String,
    pub engine_id: EngineId,
    pub buffer_size: BufferSize,
    pub master: ChannelDocument,
    /// Keyed by the channel id's string form.
    pub channels: BTreeMap<String, ChannelDocument>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelDocument {
    pub id: ChannelId,
    pub name: String,
    #[serde(flatten)]
    pub variant: ChannelVariant,
    #[serde(default = "unity")]
    pub volume: f32,
    #[serde(default)]
    pub pan: f32,
    #[serde(default)]
    pub muted: bool,
    #[serde(default)]
    pub connections: Vec<Connection>,
    #[serde(default)]
    pub sends: Vec<AuxSend>,
    #[serde(default)]
    pub plugins: Vec<PluginDocument>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginDocument {
    pub id: PluginInstanceId,
    pub blueprint: PluginBlueprint,
    #[serde(default)]
    pub bypassed: bool,
    #[serde(default = "yes")]
    pub installed: bool,
    #[serde(default)]
    pub parameters: Vec<ParameterValue>,
}

fn unity() -> f32 {
    1.0
}

fn yes() -> bool {
    true
}

impl From<&PluginInstance> for PluginDocument {
    fn from(instance: &PluginInstance) -> Self {
        Self {
            id: instance.id,
            blueprint: instance.blueprint.clone(),
            bypassed: instance.bypassed,
            installed: instance.installed,
            parameters: instance.saved_values(),
        }
    }
}

impl From<ChannelSnapshot> for ChannelDocument {
    fn from(snapshot: ChannelSnapshot) -> Self {
        Self {
            id: snapshot.id,
            name: snapshot.name,
            variant: snapshot.variant,
            volume: snapshot.volume,
            pan: snapshot.pan,
            muted: snapshot.muted,
            connections: snapshot.connections,
            sends: snapshot.sends,
            plugins: snapshot.plugins.iter().map(PluginDocument::from).collect(),
        }
    }
}

impl EngineDocument {
    /// Parse and fully validate a document.
    pub fn from_json(json: &str) -> Result<Self, EngineError> {
        let value: serde_json::Value = serde_json::from_str(json)?;
        let version = value
            .get("version")
            .and_then(|v| v.as_str())
            .ok_or_else(|| EngineError::InvalidDocument("missing format version".into()))?;
        if version != FORMAT_VERSION {
            return Err(EngineError::SerializationVersionMismatch {
                found: version.to_string(),
                expected: FORMAT_VERSION,
            });
        }

        let document: EngineDocument = serde_json::from_value(value)?;
        document.validate()?;
        Ok(document)
    }

    pub fn to_json(&self) -> Result<String, EngineError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Master first, then the other channels in id order.
    pub fn all_channels(&self) -> Vec<&ChannelDocument> {
        let mut channels: Vec<&ChannelDocument> = self.channels.values().collect();
        channels.sort_by_key(|c| c.id);
        channels.insert(0, &self.master);
        channels
    }

    /// Check every cross-reference and value before anything is rebuilt.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.version != FORMAT_VERSION {
            return Err(EngineError::SerializationVersionMismatch {
                found: self.version.clone(),
                expected: FORMAT_VERSION,
            });
        }
        if !self.master.id.is_master() || self.master.variant.kind() != ChannelKind::Master {
            return Err(invalid(format!(
                "master entry must be a master channel with id {}",
                ChannelId::MASTER
            )));
        }
        for (key, channel) in &self.channels {
            if key.parse::<ChannelId>().ok() != Some(channel.id) {
                return Err(invalid(format!(
                    "channel key {:?} does not match its id {}",
                    key, channel.id
                )));
            }
            if channel.id.is_master() || channel.variant.kind() == ChannelKind::Master {
                return Err(invalid(format!("channel {} is a second master", key)));
            }
        }

        let kinds: BTreeMap<ChannelId, ChannelKind> = self
            .all_channels()
            .iter()
            .map(|c| (c.id, c.variant.kind()))
            .collect();
        let mut plugin_ids = BTreeSet::new();
        for channel in self.all_channels() {
            validate_channel(channel, &kinds)?;
            for plugin in &channel.plugins {
                if !plugin_ids.insert(plugin.id) {
                    return Err(invalid(format!("plugin id {} is used twice", plugin.id)));
                }
            }
        }

        if let Some(id) = self.find_cycle() {
            return Err(invalid(format!("routing through channel {} forms a loop", id)));
        }
        Ok(())
    }

    fn find_cycle(&self) -> Option<ChannelId> {
        let edges: BTreeMap<ChannelId, Vec<ChannelId>> = self
            .all_channels()
            .iter()
            .map(|c| {
                let targets = c
                    .connections
                    .iter()
                    .map(|x| x.target)
                    .chain(c.sends.iter().map(|s| s.target))
                    .collect();
                (c.id, targets)
            })
            .collect();

        // Depth-first search with an explicit "on the current path" set.
        fn visit(
            id: ChannelId,
            edges: &BTreeMap<ChannelId, Vec<ChannelId>>,
            path: &mut BTreeSet<ChannelId>,
            done: &mut BTreeSet<ChannelId>,
        ) -> Option<ChannelId> {
            if done.contains(&id) {
                return None;
            }
            if !path.insert(id) {
                return Some(id);
            }
            for target in edges.get(&id).into_iter().flatten() {
                if let Some(found) = visit(*target, edges, path, done) {
                    return Some(found);
                }
            }
            path.remove(&id);
            done.insert(id);
            None
        }

        let mut done = BTreeSet::new();
        edges
            .keys()
            .find_map(|id| visit(*id, &edges, &mut BTreeSet::new(), &mut done))
    }
}

fn validate_channel(
    channel: &ChannelDocument,
    kinds: &BTreeMap<ChannelId, ChannelKind>,
) -> Result<(), EngineError> {
    let kind = channel.variant.kind();
    check_unit("volume", channel.volume)?;
    if !channel.pan.is_finite() || !(-1.0..=1.0).contains(&channel.pan) {
        return Err(EngineError::invalid_value("pan", channel.pan, "-1.0..=1.0"));
    }

    match &channel.variant {
        ChannelVariant::AudioInput(c) => check_unit("monitoring level", c.monitoring_level)?,
        ChannelVariant::MidiInput(c) => {
            if c.midi_channel.is_some_and(|m| m > 15) {
                return Err(invalid(format!("channel {} listens on MIDI channel above 15", channel.id)));
            }
        }
        ChannelVariant::Playback(c) => {
            if !(c.fade_in.is_finite() && c.fade_in >= 0.0 && c.fade_out.is_finite() && c.fade_out >= 0.0) {
                return Err(invalid(format!("channel {} has a negative fade", channel.id)));
            }
        }
        ChannelVariant::Aux(c) => check_unit("return level", c.return_level)?,
        ChannelVariant::Master(_) => {}
    }

    for connection in &channel.connections {
        if connection.source != channel.id {
            return Err(invalid(format!(
                "connection stored on channel {} claims source {}",
                channel.id, connection.source
            )));
        }
        if connection.target == channel.id || channel.id.is_master() {
            return Err(invalid(format!(
                "channel {} cannot connect to {}",
                channel.id, connection.target
            )));
        }
        match kinds.get(&connection.target) {
            None => {
                return Err(invalid(format!(
                    "channel {} connects to missing channel {}",
                    channel.id, connection.target
                )))
            }
            Some(target) if !target.supports(Capability::ReceiveInputs) => {
                return Err(invalid(format!(
                    "channel {} connects to {} channel {}",
                    channel.id, target, connection.target
                )))
            }
            Some(_) => {}
        }
    }

    if !channel.sends.is_empty() && !kind.supports(Capability::AuxSends) {
        return Err(invalid(format!("{} channel {} cannot have sends", kind, channel.id)));
    }
    let mut send_targets = BTreeSet::new();
    for send in &channel.sends {
        check_unit("send level", send.level)?;
        if kinds.get(&send.target) != Some(&ChannelKind::Aux) {
            return Err(invalid(format!(
                "channel {} sends to {}, which is not an aux channel",
                channel.id, send.target
            )));
        }
        if !send_targets.insert(send.target) {
            return Err(invalid(format!("channel {} sends to {} twice", channel.id, send.target)));
        }
    }

    for (slot, plugin) in channel.plugins.iter().enumerate() {
        check_slot(kind, plugin.blueprint.category(), slot).map_err(|reason| {
            invalid(format!("plugin {} on channel {}: {}", plugin.id, channel.id, reason))
        })?;
    }
    Ok(())
}

fn invalid(reason: String) -> EngineError {
    EngineError::InvalidDocument(reason)
}

/// Snapshot the whole engine.
pub(crate) fn capture(ctx: &EngineContext) -> Result<EngineDocument, EngineError> {
    let master = ctx.master()?.snapshot();
    let channels = ctx
        .channel_list()
        .into_iter()
        .filter(|c| !c.id().is_master())
        .map(|c| {
            let snapshot = c.snapshot();
            (snapshot.id.to_string(), ChannelDocument::from(snapshot))
        })
        .collect();

    Ok(EngineDocument {
        version: FORMAT_VERSION.to_string(),
        engine_id: *ctx.id.read(),
        buffer_size: *ctx.buffer_size.read(),
        master: master.into(),
        channels,
    })
}
