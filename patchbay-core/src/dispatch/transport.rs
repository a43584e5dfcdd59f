//! Playback transport. The player node only runs while the engine does;
//! a channel set playing on a stopped engine starts with it.

use patchbay_types::{Capability, ChannelId, EngineState, TransportCommand, TransportState};

use crate::channel::Channel;
use crate::engine::context::EngineContext;
use crate::error::EngineError;

/// Drive a playback channel's transport.
pub(super) fn apply(
    ctx: &EngineContext,
    id: ChannelId,
    command: TransportCommand,
) -> Result<(), EngineError> {
    let channel = ctx.channel(id)?;
    channel.require(Capability::Transport)?;
    let native = ctx.native();
    let player = channel
        .strip()
        .player
        .filter(|_| ctx.state() == EngineState::Running);
    let mut state = channel.lock();
    let transport = &mut state.transport;
    let playing = transport.state == TransportState::Playing;

    match command {
        TransportCommand::Play => {
            if let (Some(player), false) = (player, playing) {
                native.play_player(player, transport.position)?;
            }
            transport.state = TransportState::Playing;
        }
        TransportCommand::Pause => {
            if playing {
                if let Some(player) = player {
                    native.pause_player(player)?;
                }
                transport.state = TransportState::Paused;
            }
        }
        TransportCommand::Stop => {
            if let (Some(player), true) = (player, playing) {
                native.pause_player(player)?;
            }
            transport.state = TransportState::Stopped;
            transport.position = 0.0;
        }
        TransportCommand::Seek(seconds) => {
            if !seconds.is_finite() || seconds < 0.0 {
                return Err(EngineError::invalid_value("seek position", seconds, "seconds >= 0"));
            }
            if let (Some(player), true) = (player, playing) {
                native.play_player(player, seconds)?;
            }
            transport.position = seconds;
        }
    }
    log::debug!(target: "engine", "channel {} transport {:?}", id, command);
    Ok(())
}

/// Start the player of a channel whose transport is playing. Failures are reported.
pub(super) fn resume(ctx: &EngineContext, channel: &Channel) {
    let Some(player) = channel.strip().player else {
        return;
    };
    let state = channel.lock();
    if state.transport.state != TransportState::Playing {
        return;
    }
    if let Err(e) = ctx.native().play_player(player, state.transport.position) {
        log::warn!(target: "engine", "channel {} playback: {}", channel.id(), e);
        ctx.report(&e.into());
    }
}

/// Pause a channel's player, leaving its transport at `Paused`.
pub(super) fn suspend(ctx: &EngineContext, channel: &Channel) {
    let mut state = channel.lock();
    if state.transport.state != TransportState::Playing {
        return;
    }
    if let Some(player) = channel.strip().player {
        if let Err(e) = ctx.native().pause_player(player) {
            log::warn!(target: "engine", "channel {} playback: {}", channel.id(), e);
        }
    }
    state.transport.state = TransportState::Paused;
}
