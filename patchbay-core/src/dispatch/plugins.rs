//! Plugin chain edits. Each one rewires the channel's strip.

use patchbay_audio::{NodeHandle, PluginError};
use patchbay_types::{
    Capability, ChannelId, Parameter, ParameterValue, PluginBlueprint, PluginInstanceId,
};

use crate::channel::{release_logged, restore_parameters, Channel, ChannelState, PluginInstance};
use crate::engine::context::EngineContext;
use crate::error::EngineError;

pub(super) fn add(
    ctx: &EngineContext,
    channel: ChannelId,
    blueprint: PluginBlueprint,
    position: Option<usize>,
) -> Result<PluginInstanceId, EngineError> {
    let channel = ctx.channel(channel)?;
    channel.require(Capability::PluginChain)?;

    let position = {
        let state = channel.lock();
        let len = state.plugins.len();
        let position = position.unwrap_or(len);
        if position > len {
            return Err(EngineError::invalid_value(
                "plugin position",
                position,
                format!("0..={len}"),
            ));
        }
        state
            .plugins
            .check_insert(channel.kind(), blueprint.category(), position)
            .map_err(|reason| EngineError::invalid_value("plugin slot", &blueprint, reason))?;
        position
    };

    let id = ctx.allocate_plugin_id();
    let instance = load_plugin(ctx, channel.id(), id, blueprint, &[]);
    let unit = instance.unit;

    let mut state = channel.lock();
    let before = state.plugins.active_units();
    state.plugins.insert(position, instance);
    if let Err(e) = rewire(ctx, &channel, &state, &before) {
        state.plugins.remove(id);
        drop(state);
        if let Some(unit) = unit {
            release_logged(ctx.native(), unit);
        }
        return Err(e);
    }

    log::info!(target: "engine", "added plugin {} to channel {} at slot {}", id, channel.id(), position);
    Ok(id)
}

/// Instantiate and introspect `blueprint`, applying `saved` by address.
/// Never fails: a plugin that cannot load is reported to the error handler
/// and comes back uninstalled, holding on to `saved`.
pub(crate) fn load_plugin(
    ctx: &EngineContext,
    channel: ChannelId,
    id: PluginInstanceId,
    blueprint: PluginBlueprint,
    saved: &[ParameterValue],
) -> PluginInstance {
    match instantiate(ctx, channel, &blueprint) {
        Ok((unit, mut parameters)) => {
            for value in restore_parameters(&mut parameters, saved) {
                if let Err(e) = ctx
                    .native()
                    .set_unit_parameter(unit, value.address, value.value)
                {
                    log::warn!(target: "native", "{}", e);
                }
            }
            PluginInstance::loaded(id, blueprint, unit, parameters)
        }
        Err(err) => {
            log::warn!(target: "engine", "{}", err);
            ctx.report(&err);
            PluginInstance::missing(id, blueprint, saved.to_vec())
        }
    }
}

fn instantiate(
    ctx: &EngineContext,
    channel: ChannelId,
    blueprint: &PluginBlueprint,
) -> Result<(NodeHandle, Vec<Parameter>), EngineError> {
    let load_failed = |reason: String| EngineError::PluginLoadFailed {
        plugin: blueprint.to_string(),
        channel,
        reason,
    };

    let unit = ctx
        .native()
        .instantiate_unit(blueprint)
        .map_err(|e| load_failed(e.to_string()))?;

    match ctx.plugins.introspect(blueprint) {
        Ok(plugin) => Ok((unit, plugin.parameters)),
        Err(e) => {
            release_logged(ctx.native(), unit);
            Err(match e {
                PluginError::Unresponsive { .. } => EngineError::PluginUnresponsive {
                    plugin: blueprint.to_string(),
                    channel,
                },
                other => load_failed(other.to_string()),
            })
        }
    }
}

pub(super) fn remove(
    ctx: &EngineContext,
    channel: ChannelId,
    plugin: PluginInstanceId,
) -> Result<(), EngineError> {
    let channel = ctx.channel(channel)?;
    let mut state = channel.lock();
    let position = state
        .plugins
        .position(plugin)
        .ok_or(EngineError::PluginNotFound {
            channel: channel.id(),
            plugin,
        })?;
    let before = state.plugins.active_units();
    let removed = state.plugins.remove(plugin);
    if let Err(e) = rewire(ctx, &channel, &state, &before) {
        if let Some(instance) = removed {
            state.plugins.insert(position, instance);
        }
        return Err(e);
    }
    drop(state);

    if let Some(unit) = removed.and_then(|p| p.unit) {
        release_logged(ctx.native(), unit);
    }
    Ok(())
}

pub(super) fn move_to(
    ctx: &EngineContext,
    channel: ChannelId,
    plugin: PluginInstanceId,
    position: usize,
) -> Result<(), EngineError> {
    let channel = ctx.channel(channel)?;
    let mut state = channel.lock();
    let from = state
        .plugins
        .position(plugin)
        .ok_or(EngineError::PluginNotFound {
            channel: channel.id(),
            plugin,
        })?;
    let last = state.plugins.len() - 1;
    if position > last {
        return Err(EngineError::invalid_value(
            "plugin position",
            position,
            format!("0..={last}"),
        ));
    }
    state
        .plugins
        .check_move(channel.kind(), plugin, position)
        .map_err(|reason| EngineError::invalid_value("plugin slot", plugin, reason))?;
    if from == position {
        return Ok(());
    }

    let before = state.plugins.active_units();
    state.plugins.move_to(plugin, position);
    if let Err(e) = rewire(ctx, &channel, &state, &before) {
        state.plugins.move_to(plugin, from);
        return Err(e);
    }
    Ok(())
}

pub(super) fn set_bypass(
    ctx: &EngineContext,
    channel: ChannelId,
    plugin: PluginInstanceId,
    bypassed: bool,
) -> Result<(), EngineError> {
    let channel = ctx.channel(channel)?;
    let mut state = channel.lock();
    let before = state.plugins.active_units();
    let instance = state
        .plugins
        .get_mut(plugin)
        .ok_or(EngineError::PluginNotFound {
            channel: channel.id(),
            plugin,
        })?;
    if instance.bypassed == bypassed {
        return Ok(());
    }
    instance.bypassed = bypassed;

    if let Err(e) = rewire(ctx, &channel, &state, &before) {
        if let Some(instance) = state.plugins.get_mut(plugin) {
            instance.bypassed = !bypassed;
        }
        return Err(e);
    }
    Ok(())
}

/// Rewire the strip from the `before` unit chain to the chain in `state`.
/// On failure the `before` chain is wired back before the error is returned.
fn rewire(
    ctx: &EngineContext,
    channel: &Channel,
    state: &ChannelState,
    before: &[NodeHandle],
) -> Result<(), EngineError> {
    let native = ctx.native();
    let strip = channel.strip();
    let after = state.plugins.active_units();
    if let Err(e) = strip.rewire(native, before, &after, state.muted, ctx.format) {
        if let Err(restore) = strip.rewire(native, &after, before, state.muted, ctx.format) {
            log::error!(
                target: "native",
                "channel {} left without a signal path: {}",
                channel.id(),
                restore
            );
        }
        return Err(e.into());
    }
    Ok(())
}
