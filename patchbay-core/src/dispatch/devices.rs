//! Device rebinding and hotplug reconciliation.

use patchbay_audio::{AudioDevice, DeviceEvent};
use patchbay_types::{Capability, ChannelId, ChannelVariant, DeviceKind, EngineState, MidiInputConfig};

use super::channels::{validate_audio_input, validate_midi_input};
use crate::engine::context::EngineContext;
use crate::error::EngineError;

// ─── Input devices ──────────────────────────────────────────────────

pub(super) fn change_input(ctx: &EngineContext, id: ChannelId, uid: &str) -> Result<(), EngineError> {
    let channel = ctx.channel(id)?;
    channel.require(Capability::InputDevice)?;
    let native = ctx.native();

    let mut state = channel.lock();
    match state.variant.clone() {
        ChannelVariant::AudioInput(old) => {
            let mut new = old.clone();
            new.device_uid = uid.to_string();
            validate_audio_input(ctx, &new)?;
            let (old_key, new_key) = (old.input_node_key(), new.input_node_key());
            if old_key == new_key {
                return Ok(());
            }

            let mut inputs = ctx.inputs.lock();
            let (node, bus) = inputs.acquire(native, &new_key, new.input_bus, id, ctx.format)?;
            if let Err(e) = native.connect(node, bus, channel.strip().input, 0, Some(ctx.format)) {
                inputs.release(native, &new_key, id);
                return Err(e.into());
            }
            inputs.release(native, &old_key, id);
            drop(inputs);

            state.variant = ChannelVariant::AudioInput(new);
        }
        ChannelVariant::MidiInput(old) => {
            let new = MidiInputConfig {
                device_uid: uid.to_string(),
                ..old
            };
            validate_midi_input(ctx, &new)?;
            state.variant = ChannelVariant::MidiInput(new);
        }
        _ => {
            return Err(EngineError::UnsupportedCapability {
                channel: id,
                kind: channel.kind(),
                capability: Capability::InputDevice,
            })
        }
    }
    state.online = true;

    log::info!(target: "engine", "channel {} now listens to {}", id, uid);
    Ok(())
}

// ─── Output device ──────────────────────────────────────────────────

pub(super) fn change_output(ctx: &EngineContext, uid: &str) -> Result<(), EngineError> {
    let device = output_device(ctx, uid)?;
    let previous = ctx.output_device.read().clone();
    if previous == device.uid {
        return Ok(());
    }
    let native = ctx.native();

    if native.supports_live_output_switch() || ctx.state() != EngineState::Running {
        native.set_output_device(&device.uid)?;
    } else {
        native
            .stop()
            .map_err(|e| EngineError::structural("change output device", e))?;
        let switched = native.set_output_device(&device.uid);
        if let Err(e) = &switched {
            log::warn!(target: "engine", "output switch to {} failed, restoring {}: {}", device.uid, previous, e);
            if let Err(e) = native.set_output_device(&previous) {
                log::error!(target: "engine", "restoring output {}: {}", previous, e);
            }
        }
        if let Err(e) = native.prepare().and_then(|_| native.start()) {
            // Rendering did not come back: record that the engine is stopped.
            ctx.monitor.lock().stop();
            for channel in ctx.channel_list() {
                channel.lock().running = false;
            }
            ctx.set_state(EngineState::AudioGraphReady);
            return Err(EngineError::EngineStartFailed {
                reason: format!("restart after output change: {e}"),
            });
        }
        switched?;
    }

    *ctx.output_device.write() = device.uid.clone();
    let master = ctx.master()?;
    let mut state = master.lock();
    if let ChannelVariant::Master(config) = &mut state.variant {
        config.output_device_uid = device.uid.clone();
    }
    state.online = true;

    log::info!(target: "engine", "output device is now {} ({})", device.name, device.uid);
    Ok(())
}

/// An online device with outputs.
pub(crate) fn output_device(ctx: &EngineContext, uid: &str) -> Result<AudioDevice, EngineError> {
    let device = ctx
        .devices
        .audio_device(uid)?
        .ok_or_else(|| EngineError::DeviceNotFound { uid: uid.to_string() })?;
    if !device.online {
        return Err(EngineError::DeviceOffline {
            uid: device.uid,
            channels: vec![ChannelId::MASTER],
        });
    }
    if device.output_channels == 0 {
        return Err(EngineError::invalid_value(
            "output device",
            &device.uid,
            "a device with output channels",
        ));
    }
    Ok(device)
}

// ─── Hotplug ────────────────────────────────────────────────────────

/// Bring channel online flags in line with a device event. Channels bound to
/// a device that went away are reported; nothing is rebound automatically.
pub(super) fn reconcile(ctx: &EngineContext, event: &DeviceEvent) {
    let (uid, kind, online, removed) = match event {
        DeviceEvent::AudioDeviceAdded(device) => (device.uid.as_str(), DeviceKind::Audio, device.online, false),
        DeviceEvent::MidiDeviceAdded(device) => (device.uid.as_str(), DeviceKind::Midi, device.online, false),
        DeviceEvent::AudioDeviceRemoved { uid, .. } => (uid.as_str(), DeviceKind::Audio, false, true),
        DeviceEvent::MidiDeviceRemoved { uid, .. } => (uid.as_str(), DeviceKind::Midi, false, true),
        DeviceEvent::DeviceStatusChanged { uid, kind, online } => (uid.as_str(), *kind, *online, false),
    };

    let affected = set_online(ctx, uid, kind, online);
    if affected.is_empty() {
        log::debug!(target: "engine", "device event for {} touches no channel", uid);
        return;
    }

    if online {
        log::info!(target: "engine", "device {} is back for channels {:?}", uid, affected);
        return;
    }
    let err = if removed {
        EngineError::DeviceRemoved {
            uid: uid.to_string(),
            channels: affected,
        }
    } else {
        EngineError::DeviceOffline {
            uid: uid.to_string(),
            channels: affected,
        }
    };
    log::warn!(target: "engine", "{}", err);
    ctx.report(&err);
}

/// Set `online` on every channel bound to `uid`, returning the ones that changed.
fn set_online(ctx: &EngineContext, uid: &str, kind: DeviceKind, online: bool) -> Vec<ChannelId> {
    let mut changed = Vec::new();
    for channel in ctx.channel_list() {
        let mut state = channel.lock();
        let bound = state
            .variant
            .bound_device()
            .is_some_and(|(device, device_kind)| device == uid && device_kind == kind);
        if bound && state.online != online {
            state.online = online;
            changed.push(channel.id());
        }
    }
    changed
}
