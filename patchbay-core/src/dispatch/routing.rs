//! Connections, aux sends and mute: the operations that reshape links between strips.

use std::collections::BTreeSet;

use patchbay_types::{AuxSend, Capability, ChannelId, ChannelKind, Connection};

use crate::channel::{check_unit, release_logged, Channel, SendSlot};
use crate::engine::context::EngineContext;
use crate::error::EngineError;
use crate::graph::lowest_free_bus;

// ─── Connections ────────────────────────────────────────────────────

pub(super) fn connect(
    ctx: &EngineContext,
    source: ChannelId,
    target: ChannelId,
) -> Result<(), EngineError> {
    let channel = ctx.channel(source)?;
    connect_channels(ctx, &channel, target)
}

/// Route `source`'s fader into `target`'s input mixer. `source` need not be
/// registered yet.
pub(crate) fn connect_channels(
    ctx: &EngineContext,
    source: &Channel,
    target: ChannelId,
) -> Result<(), EngineError> {
    let invalid = |reason| EngineError::InvalidConnection {
        source_id: source.id(),
        target,
        reason,
    };
    if source.id().is_master() {
        return Err(invalid("the master has no outgoing connections"));
    }
    if source.id() == target {
        return Err(invalid("a channel cannot feed itself"));
    }
    let destination = ctx.channel(target)?;
    destination.require(Capability::ReceiveInputs)?;

    if source.lock().connections.iter().any(|c| c.target == target) {
        return Err(EngineError::DuplicateConnection {
            source_id: source.id(),
            target,
        });
    }
    if reaches(ctx, target, source.id()) {
        return Err(invalid("the connection would create a feedback loop"));
    }

    let target_bus = lowest_free_bus(inbound_buses(ctx, target));
    let mut state = source.lock();
    let source_bus = lowest_free_bus(
        state
            .connections
            .iter()
            .map(|c| c.source_bus)
            .chain(state.sends.iter().filter(|s| !s.send.pre_fader).map(|s| s.tap_bus)),
    );

    ctx.native().connect(
        source.strip().fader,
        source_bus,
        destination.strip().input,
        target_bus,
        Some(ctx.format),
    )?;
    state.connections.push(Connection {
        source: source.id(),
        target,
        source_bus,
        target_bus,
    });

    log::debug!(target: "engine", "connected {} -> {} (bus {} -> {})", source.id(), target, source_bus, target_bus);
    Ok(())
}

pub(super) fn disconnect(
    ctx: &EngineContext,
    source: ChannelId,
    target: ChannelId,
) -> Result<(), EngineError> {
    let channel = ctx.channel(source)?;
    let mut state = channel.lock();
    let index = state
        .connections
        .iter()
        .position(|c| c.target == target)
        .ok_or(EngineError::ConnectionNotFound {
            source_id: source,
            target,
        })?;

    let connection = state.connections[index];
    let destination = ctx.channel(target)?;
    ctx.native()
        .disconnect_node_input(destination.strip().input, connection.target_bus)?;
    state.connections.remove(index);
    Ok(())
}

// ─── Aux sends ──────────────────────────────────────────────────────

pub(super) fn add_send(
    ctx: &EngineContext,
    source: ChannelId,
    target: ChannelId,
    level: f32,
    pre_fader: bool,
) -> Result<(), EngineError> {
    let channel = ctx.channel(source)?;
    attach_send(
        ctx,
        &channel,
        AuxSend {
            target,
            level,
            pre_fader,
        },
    )
}

/// Create the send mixer for `send` and wire `tap → send mixer → aux input`.
pub(crate) fn attach_send(
    ctx: &EngineContext,
    source: &Channel,
    send: AuxSend,
) -> Result<(), EngineError> {
    source.require(Capability::AuxSends)?;
    check_unit("send level", send.level)?;
    let target = send.target;
    let aux = ctx.channel(target)?;
    if aux.kind() != ChannelKind::Aux {
        return Err(EngineError::InvalidConnection {
            source_id: source.id(),
            target,
            reason: "sends must target an aux channel",
        });
    }
    if source.lock().send(target).is_some() {
        return Err(EngineError::DuplicateSend {
            source_id: source.id(),
            target,
        });
    }
    if reaches(ctx, target, source.id()) {
        return Err(EngineError::InvalidConnection {
            source_id: source.id(),
            target,
            reason: "the send would create a feedback loop",
        });
    }

    let target_bus = lowest_free_bus(inbound_buses(ctx, target));
    let mut state = source.lock();
    let tap_bus = if send.pre_fader {
        // Bus 0 of the input mixer feeds the strip itself.
        lowest_free_bus(
            std::iter::once(0).chain(state.sends.iter().filter(|s| s.send.pre_fader).map(|s| s.tap_bus)),
        )
    } else {
        lowest_free_bus(
            state
                .connections
                .iter()
                .map(|c| c.source_bus)
                .chain(state.sends.iter().filter(|s| !s.send.pre_fader).map(|s| s.tap_bus)),
        )
    };

    let native = ctx.native();
    let node = native.create_mixer_node()?;
    let wired = native
        .set_mixer_volume(node, send.level)
        .and_then(|_| {
            native.connect(source.strip().tap(send.pre_fader), tap_bus, node, 0, Some(ctx.format))
        })
        .and_then(|_| native.connect(node, 0, aux.strip().input, target_bus, Some(ctx.format)));
    if let Err(e) = wired {
        release_logged(native, node);
        return Err(e.into());
    }

    state.sends.push(SendSlot {
        send,
        node,
        tap_bus,
        target_bus,
    });
    log::debug!(
        target: "engine",
        "send {} -> {} at {} ({})",
        source.id(),
        target,
        send.level,
        if send.pre_fader { "pre-fader" } else { "post-fader" }
    );
    Ok(())
}

pub(super) fn remove_send(
    ctx: &EngineContext,
    source: ChannelId,
    target: ChannelId,
) -> Result<(), EngineError> {
    let channel = ctx.channel(source)?;
    let mut state = channel.lock();
    let index = state
        .sends
        .iter()
        .position(|s| s.send.target == target)
        .ok_or(EngineError::SendNotFound {
            source_id: source,
            target,
        })?;

    let slot = state.sends[index];
    let aux = ctx.channel(target)?;
    let native = ctx.native();
    native.disconnect_node_input(aux.strip().input, slot.target_bus)?;
    state.sends.remove(index);
    drop(state);

    release_logged(native, slot.node);
    Ok(())
}

// ─── Mute ───────────────────────────────────────────────────────────

/// Mute by opening the link into the fader rather than zeroing its gain.
pub(super) fn set_mute(ctx: &EngineContext, id: ChannelId, muted: bool) -> Result<(), EngineError> {
    let channel = ctx.channel(id)?;
    let mut state = channel.lock();
    if state.muted == muted {
        return Ok(());
    }
    let units = state.plugins.active_units();
    channel
        .strip()
        .set_muted(ctx.native(), &units, muted, ctx.format)?;
    state.muted = muted;
    Ok(())
}

// ─── Teardown helpers ───────────────────────────────────────────────

/// Break a connection's native link. Failures are logged.
pub(super) fn unplug_connection(ctx: &EngineContext, connection: &Connection) {
    let Ok(target) = ctx.channel(connection.target) else {
        return;
    };
    if let Err(e) = ctx
        .native()
        .disconnect_node_input(target.strip().input, connection.target_bus)
    {
        log::warn!(target: "native", "{}", e);
    }
}

/// Break a send's link into its aux and release its send mixer. Failures are logged.
pub(super) fn unplug_send(ctx: &EngineContext, slot: &SendSlot) {
    if let Ok(aux) = ctx.channel(slot.send.target) {
        if let Err(e) = ctx
            .native()
            .disconnect_node_input(aux.strip().input, slot.target_bus)
        {
            log::warn!(target: "native", "{}", e);
        }
    }
    release_logged(ctx.native(), slot.node);
}

/// Drop every connection and send `channel` holds into `removed`.
pub(super) fn detach_references(ctx: &EngineContext, channel: &Channel, removed: ChannelId) {
    let mut state = channel.lock();
    let (dropped, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut state.connections)
        .into_iter()
        .partition(|c| c.target == removed);
    state.connections = kept;
    let (dropped_sends, kept_sends): (Vec<_>, Vec<_>) = std::mem::take(&mut state.sends)
        .into_iter()
        .partition(|s| s.send.target == removed);
    state.sends = kept_sends;
    drop(state);

    for connection in &dropped {
        unplug_connection(ctx, connection);
    }
    for slot in &dropped_sends {
        unplug_send(ctx, slot);
    }
}

// ─── Graph queries ──────────────────────────────────────────────────

/// Input buses on `target` already taken by connections or sends.
fn inbound_buses(ctx: &EngineContext, target: ChannelId) -> Vec<u32> {
    let mut buses = Vec::new();
    for channel in ctx.channel_list() {
        let state = channel.lock();
        buses.extend(
            state
                .connections
                .iter()
                .filter(|c| c.target == target)
                .map(|c| c.target_bus),
        );
        buses.extend(
            state
                .sends
                .iter()
                .filter(|s| s.send.target == target)
                .map(|s| s.target_bus),
        );
    }
    buses
}

/// Whether audio leaving `from` can arrive at `to` through connections or sends.
fn reaches(ctx: &EngineContext, from: ChannelId, to: ChannelId) -> bool {
    let mut seen = BTreeSet::new();
    let mut stack = vec![from];
    while let Some(id) = stack.pop() {
        if id == to {
            return true;
        }
        if !seen.insert(id) {
            continue;
        }
        let Ok(channel) = ctx.channel(id) else {
            continue;
        };
        let state = channel.lock();
        stack.extend(state.connections.iter().map(|c| c.target));
        stack.extend(state.sends.iter().map(|s| s.send.target));
    }
    false
}
