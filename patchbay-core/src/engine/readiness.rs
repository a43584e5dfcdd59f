//! Graph validation and the lifecycle states it drives.

use std::collections::{BTreeMap, BTreeSet};

use patchbay_types::{ChannelId, ChannelKind, EngineState};

use super::context::EngineContext;

/// Why the graph is not ready to start.
pub(crate) fn validate(ctx: &EngineContext) -> Result<(), String> {
    let channels = ctx.channel_list();
    if !channels.iter().any(|c| c.id().is_master()) {
        return Err("master channel missing".into());
    }
    if !ctx.settings.strict_start_validation {
        return Ok(());
    }

    let mut routes: BTreeMap<ChannelId, Vec<ChannelId>> = BTreeMap::new();
    let mut online = Vec::new();
    for channel in &channels {
        let state = channel.lock();
        routes.insert(
            channel.id(),
            state.connections.iter().map(|c| c.target).collect(),
        );
        if channel.kind() == ChannelKind::MidiInput && state.plugins.instrument().is_none() {
            return Err(format!("channel {} has no instrument at slot 0", channel.id()));
        }
        if state.online && !channel.id().is_master() {
            online.push(channel.id());
        }
    }

    for id in online {
        if !reaches_master(&routes, id) {
            return Err(format!("channel {} has no path to the master", id));
        }
    }
    Ok(())
}

fn reaches_master(routes: &BTreeMap<ChannelId, Vec<ChannelId>>, from: ChannelId) -> bool {
    let mut seen = BTreeSet::new();
    let mut stack = vec![from];
    while let Some(id) = stack.pop() {
        if id.is_master() {
            return true;
        }
        if !seen.insert(id) {
            continue;
        }
        if let Some(targets) = routes.get(&id) {
            stack.extend(targets.iter().copied());
        }
    }
    false
}

/// Readiness for the current graph. A running engine stays `Running`.
pub(crate) fn compute(ctx: &EngineContext) -> EngineState {
    let current = ctx.state();
    if current == EngineState::Running {
        return current;
    }
    let channel_count = ctx.channels.read().len();
    if channel_count == 0 {
        return EngineState::Created;
    }
    if channel_count == 1 {
        return EngineState::MasterReady;
    }
    match validate(ctx) {
        Ok(()) => EngineState::AudioGraphReady,
        Err(reason) => {
            log::debug!(target: "engine", "graph not ready: {}", reason);
            EngineState::ChannelsReady
        }
    }
}

pub(crate) fn refresh(ctx: &EngineContext) {
    ctx.set_state(compute(ctx));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_follow_connections_through_aux() {
        let mut routes = BTreeMap::new();
        routes.insert(ChannelId::new(1), vec![ChannelId::new(2)]);
        routes.insert(ChannelId::new(2), vec![ChannelId::MASTER]);
        routes.insert(ChannelId::new(3), vec![ChannelId::new(4)]);
        routes.insert(ChannelId::new(4), vec![ChannelId::new(3)]);

        assert!(reaches_master(&routes, ChannelId::new(1)));
        assert!(!reaches_master(&routes, ChannelId::new(3)));
    }
}
