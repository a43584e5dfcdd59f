//! Channel creation, removal and renaming.

use std::sync::Arc;

use patchbay_types::{
    AudioInputConfig, ChannelId, ChannelVariant, MasterConfig, MidiInputConfig, PlaybackConfig,
};

use super::routing;
use crate::channel::{check_unit, release_logged, Channel, ChannelState, Strip};
use crate::engine::context::EngineContext;
use crate::error::EngineError;

/// Validate, build, auto-connect and register a channel. Nothing is
/// registered unless every step succeeds.
pub(super) fn create(
    ctx: &EngineContext,
    name: Option<String>,
    variant: ChannelVariant,
) -> Result<ChannelId, EngineError> {
    validate_variant(ctx, &variant)?;
    let name = name.map(validate_name).transpose()?;

    let id = ctx.allocate_channel_id();
    let kind = variant.kind();
    let name = name.unwrap_or_else(|| default_name(&variant, id));
    let channel = build_channel(ctx, id, name, variant, true)?;

    if ctx.settings.auto_connect_to_master {
        if let Err(e) = routing::connect_channels(ctx, &channel, ChannelId::MASTER) {
            teardown_channel(ctx, &channel);
            return Err(e);
        }
    }

    ctx.channels.write().insert(id, channel);
    log::info!(target: "engine", "created {} channel {}", kind, id);
    Ok(id)
}

/// Allocate and wire the native nodes for a channel. The channel is not
/// registered; on failure everything allocated so far is released.
pub(crate) fn build_channel(
    ctx: &EngineContext,
    id: ChannelId,
    name: String,
    variant: ChannelVariant,
    online: bool,
) -> Result<Arc<Channel>, EngineError> {
    let native = ctx.native();
    let mut strip = Strip::allocate(native)?;
    // An offline playback channel gets no player until its file is reachable.
    if let (ChannelVariant::Playback(config), true) = (&variant, online) {
        match native.create_player_node(&config.file_path) {
            Ok(player) => strip = strip.with_player(player),
            Err(e) => {
                strip.release(native);
                return Err(e.into());
            }
        }
    }

    if let Err(e) = wire_strip(ctx, id, &strip, &variant) {
        strip.release(native);
        return Err(e);
    }

    let mut state = ChannelState::new(name, variant);
    state.online = online;
    Ok(Arc::new(Channel::new(id, strip, state)))
}

fn wire_strip(
    ctx: &EngineContext,
    id: ChannelId,
    strip: &Strip,
    variant: &ChannelVariant,
) -> Result<(), EngineError> {
    let native = ctx.native();
    strip.wire(native, &[], false, ctx.format)?;

    match variant {
        ChannelVariant::AudioInput(config) => {
            native.set_mixer_volume(strip.input, config.monitoring_level)?;
            let key = config.input_node_key();
            let (node, bus) =
                ctx.inputs
                    .lock()
                    .acquire(native, &key, config.input_bus, id, ctx.format)?;
            if let Err(e) = native.connect(node, bus, strip.input, 0, Some(ctx.format)) {
                ctx.inputs.lock().release(native, &key, id);
                return Err(e.into());
            }
        }
        ChannelVariant::Aux(config) => {
            native.set_mixer_volume(strip.input, config.return_level)?;
        }
        ChannelVariant::Playback(_) => {
            if let Some(player) = strip.player {
                native.connect(player, 0, strip.input, 0, Some(ctx.format))?;
            }
        }
        ChannelVariant::MidiInput(_) | ChannelVariant::Master(_) => {}
    }
    Ok(())
}

/// The master: its strip feeds the main mixer, which feeds the output node.
pub(crate) fn build_master(ctx: &EngineContext) -> Result<Arc<Channel>, EngineError> {
    let native = ctx.native();
    let strip = Strip::master(native)?;
    let wired = strip
        .wire(native, &[], false, ctx.format)
        .and_then(|_| native.output_node())
        .and_then(|output| native.connect(strip.fader, 0, output, 0, Some(ctx.format)));
    if let Err(e) = wired {
        strip.release(native);
        return Err(e.into());
    }

    let variant = ChannelVariant::Master(MasterConfig {
        output_device_uid: ctx.output_device.read().clone(),
        limiter: false,
        metering: false,
    });
    let channel = Arc::new(Channel::new(
        ChannelId::MASTER,
        strip,
        ChannelState::new("Master".into(), variant),
    ));
    ctx.channels.write().insert(ChannelId::MASTER, Arc::clone(&channel));
    Ok(channel)
}

/// Remove a channel and every reference other channels hold to it, in one step.
pub(super) fn remove(ctx: &EngineContext, id: ChannelId) -> Result<(), EngineError> {
    if id.is_master() {
        return Err(EngineError::MasterChannelImmutable { action: "removed" });
    }
    let channel = ctx.channel(id)?;

    for other in ctx.channel_list() {
        if other.id() != id {
            routing::detach_references(ctx, &other, id);
        }
    }
    teardown_channel(ctx, &channel);
    ctx.channels.write().remove(&id);

    log::info!(target: "engine", "removed {} channel {}", channel.kind(), id);
    Ok(())
}

/// Stop a channel and release its outbound routing, plugins and nodes.
/// Native failures are logged; teardown always completes.
pub(crate) fn teardown_channel(ctx: &EngineContext, channel: &Channel) {
    let native = ctx.native();
    let mut state = channel.lock();
    state.running = false;

    for connection in std::mem::take(&mut state.connections) {
        routing::unplug_connection(ctx, &connection);
    }
    for slot in std::mem::take(&mut state.sends) {
        routing::unplug_send(ctx, &slot);
    }
    for instance in state.plugins.drain() {
        if let Some(unit) = instance.unit {
            release_logged(native, unit);
        }
    }
    if let ChannelVariant::AudioInput(config) = &state.variant {
        ctx.inputs
            .lock()
            .release(native, &config.input_node_key(), channel.id());
    }
    drop(state);

    channel.strip().release(native);
}

pub(super) fn rename(ctx: &EngineContext, id: ChannelId, name: String) -> Result<(), EngineError> {
    let name = validate_name(name)?;
    let channel = ctx.channel(id)?;
    channel.lock().name = name;
    Ok(())
}

pub(super) fn set_master_options(
    ctx: &EngineContext,
    limiter: bool,
    metering: bool,
) -> Result<(), EngineError> {
    let master = ctx.master()?;
    let mut state = master.lock();
    if let ChannelVariant::Master(config) = &mut state.variant {
        config.limiter = limiter;
        config.metering = metering;
    }
    Ok(())
}

// ─── Validation ─────────────────────────────────────────────────────

/// Check a channel configuration against the current devices and filesystem.
pub(crate) fn validate_variant(
    ctx: &EngineContext,
    variant: &ChannelVariant,
) -> Result<(), EngineError> {
    match variant {
        ChannelVariant::AudioInput(config) => validate_audio_input(ctx, config),
        ChannelVariant::MidiInput(config) => validate_midi_input(ctx, config),
        ChannelVariant::Playback(config) => validate_playback(config),
        ChannelVariant::Aux(config) => check_unit("return level", config.return_level),
        ChannelVariant::Master(_) => Err(EngineError::MasterChannelImmutable { action: "created" }),
    }
}

pub(crate) fn validate_audio_input(
    ctx: &EngineContext,
    config: &AudioInputConfig,
) -> Result<(), EngineError> {
    check_unit("monitoring level", config.monitoring_level)?;
    let device = ctx
        .devices
        .audio_device(&config.device_uid)?
        .ok_or_else(|| EngineError::DeviceNotFound {
            uid: config.device_uid.clone(),
        })?;
    if !device.online {
        return Err(EngineError::DeviceOffline {
            uid: device.uid,
            channels: Vec::new(),
        });
    }
    if config.input_bus >= device.input_channels {
        return Err(EngineError::invalid_value(
            "input bus",
            config.input_bus,
            format!("below {} on {}", device.input_channels, device.uid),
        ));
    }
    Ok(())
}

pub(crate) fn validate_midi_input(
    ctx: &EngineContext,
    config: &MidiInputConfig,
) -> Result<(), EngineError> {
    if let Some(channel) = config.midi_channel {
        if channel > 15 {
            return Err(EngineError::invalid_value("MIDI channel", channel, "0..=15"));
        }
    }
    let device = ctx
        .devices
        .midi_device(&config.device_uid)?
        .ok_or_else(|| EngineError::DeviceNotFound {
            uid: config.device_uid.clone(),
        })?;
    if !device.online {
        return Err(EngineError::DeviceOffline {
            uid: device.uid,
            channels: Vec::new(),
        });
    }
    if !device.is_input {
        return Err(EngineError::invalid_value(
            "MIDI device",
            &device.uid,
            "a device with MIDI input",
        ));
    }
    Ok(())
}

pub(crate) fn validate_playback(config: &PlaybackConfig) -> Result<(), EngineError> {
    if config.file_path.as_os_str().is_empty() {
        return Err(EngineError::InvalidFilePath {
            path: config.file_path.clone(),
            reason: "path is empty",
        });
    }
    if !config.file_path.is_file() {
        return Err(EngineError::InvalidFilePath {
            path: config.file_path.clone(),
            reason: "no such file",
        });
    }
    for (field, seconds) in [("fade-in", config.fade_in), ("fade-out", config.fade_out)] {
        if !seconds.is_finite() || seconds < 0.0 {
            return Err(EngineError::invalid_value(field, seconds, "seconds >= 0"));
        }
    }
    Ok(())
}

fn validate_name(name: String) -> Result<String, EngineError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(EngineError::invalid_value("channel name", format!("{name:?}"), "a non-empty name"));
    }
    Ok(trimmed.to_string())
}

fn default_name(variant: &ChannelVariant, id: ChannelId) -> String {
    match variant {
        ChannelVariant::AudioInput(_) => format!("Input {id}"),
        ChannelVariant::MidiInput(_) => format!("MIDI {id}"),
        ChannelVariant::Playback(c) => c
            .file_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("Playback {id}")),
        ChannelVariant::Aux(_) => format!("Aux {id}"),
        ChannelVariant::Master(_) => "Master".to_string(),
    }
}
