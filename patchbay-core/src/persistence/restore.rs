use std::sync::Arc;

use patchbay_types::{Capability, ChannelId, ChannelVariant, EngineState};

use super::{ChannelDocument, EngineDocument};
use crate::channel::{release_logged, Channel};
use crate::dispatch::{attach_send, build_channel, connect_channels, load_plugin, teardown_channel};
use crate::engine::context::EngineContext;
use crate::error::EngineError;

/// Replace the whole graph with `document`. Runs on the dispatcher worker.
///
/// A native failure while rebuilding tears the partial graph down again and
/// rebuilds the graph that was live before the call.
pub(crate) fn restore(ctx: &EngineContext, document: EngineDocument) -> Result<(), EngineError> {
    let state = ctx.state();
    if state == EngineState::Running {
        return Err(EngineError::InvalidState {
            operation: "load state",
            state,
        });
    }
    document.validate()?;
    let previous = super::capture(ctx)?;

    let err = match clear(ctx).and_then(|_| apply(ctx, &document)) {
        Ok(()) => return Ok(()),
        Err(err) => err,
    };
    log::error!(target: "persistence", "restore failed, rolling back: {}", err);
    if let Err(rollback) = clear(ctx).and_then(|_| apply(ctx, &previous)) {
        log::error!(target: "persistence", "rolling back restore failed: {}", rollback);
        ctx.report(&rollback);
    }
    Err(err)
}

/// Rebuild `document` on top of a cleared graph.
fn apply(ctx: &EngineContext, document: &EngineDocument) -> Result<(), EngineError> {
    let native = ctx.native();

    *ctx.id.write() = document.engine_id;
    native.set_buffer_size(document.buffer_size.as_samples())?;
    *ctx.buffer_size.write() = document.buffer_size;

    let master = ctx.master()?;
    restore_master(ctx, &master, &document.master);

    let mut restored: Vec<(Arc<Channel>, &ChannelDocument)> = vec![(master, &document.master)];
    for doc in document.all_channels().into_iter().skip(1) {
        let online = match crate::dispatch::validate_variant(ctx, &doc.variant) {
            Ok(()) => true,
            Err(err) => {
                let err = offline_error(err, doc.id);
                log::warn!(target: "persistence", "restoring channel {} offline: {}", doc.id, err);
                ctx.report(&err);
                false
            }
        };
        let channel = build_channel(ctx, doc.id, doc.name.clone(), doc.variant.clone(), online)?;
        ctx.channels.write().insert(doc.id, Arc::clone(&channel));
        restored.push((channel, doc));
    }

    for (channel, doc) in &restored {
        restore_plugins(ctx, channel, doc)?;
    }
    for (channel, doc) in &restored {
        for connection in &doc.connections {
            connect_channels(ctx, channel, connection.target)?;
        }
    }
    for (channel, doc) in &restored {
        for send in &doc.sends {
            attach_send(ctx, channel, *send)?;
        }
    }
    for (channel, doc) in &restored {
        channel.set_volume(native, doc.volume)?;
        if channel.kind().supports(Capability::Pan) {
            channel.set_pan(native, doc.pan)?;
        }
    }
    // Mute last so the rewiring above never has to care about it.
    for (channel, doc) in &restored {
        if doc.muted {
            let mut state = channel.lock();
            let units = state.plugins.active_units();
            channel.strip().set_muted(native, &units, true, ctx.format)?;
            state.muted = true;
        }
    }

    let max_channel = restored.iter().map(|(c, _)| c.id().get()).max().unwrap_or(0);
    let max_plugin = restored
        .iter()
        .flat_map(|(_, doc)| doc.plugins.iter().map(|p| p.id.get()))
        .max()
        .unwrap_or(0);
    ctx.reset_counters(max_channel, max_plugin);

    log::info!(
        target: "persistence",
        "restored engine {} with {} channels",
        document.engine_id,
        restored.len()
    );
    Ok(())
}

/// Tear down every channel but the master and strip the master back to a bare strip.
fn clear(ctx: &EngineContext) -> Result<(), EngineError> {
    for channel in ctx.channel_list() {
        if !channel.id().is_master() {
            teardown_channel(ctx, &channel);
            ctx.channels.write().remove(&channel.id());
        }
    }

    let native = ctx.native();
    let master = ctx.master()?;
    let mut state = master.lock();
    let before = state.plugins.active_units();
    for instance in state.plugins.drain() {
        if let Some(unit) = instance.unit {
            release_logged(native, unit);
        }
    }
    master.strip().rewire(native, &before, &[], false, ctx.format)?;
    state.muted = false;
    state.connections.clear();
    state.sends.clear();
    Ok(())
}

fn restore_master(ctx: &EngineContext, master: &Channel, doc: &ChannelDocument) {
    let ChannelVariant::Master(config) = &doc.variant else {
        return;
    };
    let current = ctx.output_device.read().clone();
    let online = if config.output_device_uid == current {
        true
    } else {
        match crate::dispatch::output_device(ctx, &config.output_device_uid) {
            Ok(device) => match ctx.native().set_output_device(&device.uid) {
                Ok(()) => {
                    *ctx.output_device.write() = device.uid;
                    true
                }
                Err(e) => {
                    log::warn!(target: "persistence", "{}", e);
                    ctx.report(&e.into());
                    false
                }
            },
            Err(err) => {
                let err = offline_error(err, ChannelId::MASTER);
                log::warn!(target: "persistence", "{}", err);
                ctx.report(&err);
                false
            }
        }
    };

    let mut state = master.lock();
    state.name = doc.name.clone();
    state.variant = doc.variant.clone();
    state.online = online;
}

fn restore_plugins(
    ctx: &EngineContext,
    channel: &Channel,
    doc: &ChannelDocument,
) -> Result<(), EngineError> {
    if doc.plugins.is_empty() {
        return Ok(());
    }
    let instances: Vec<_> = doc
        .plugins
        .iter()
        .map(|plugin| {
            let mut instance = load_plugin(
                ctx,
                channel.id(),
                plugin.id,
                plugin.blueprint.clone(),
                &plugin.parameters,
            );
            instance.bypassed = plugin.bypassed;
            instance
        })
        .collect();

    let mut state = channel.lock();
    for instance in instances {
        state.plugins.push(instance);
    }
    let units = state.plugins.active_units();
    channel
        .strip()
        .rewire(ctx.native(), &[], &units, false, ctx.format)?;
    Ok(())
}

/// Missing devices surface as an offline error naming the channel.
fn offline_error(err: EngineError, channel: ChannelId) -> EngineError {
    match err {
        EngineError::DeviceNotFound { uid } | EngineError::DeviceOffline { uid, .. } => {
            EngineError::DeviceOffline {
                uid,
                channels: vec![channel],
            }
        }
        other => other,
    }
}
