//! Engine start, stop and buffer size.

use patchbay_types::{BufferSize, ChannelVariant, EngineState, TransportState};

use super::transport;
use crate::engine::context::EngineContext;
use crate::engine::readiness;
use crate::error::EngineError;

pub(super) fn start(ctx: &EngineContext) -> Result<(), EngineError> {
    if ctx.state() == EngineState::Running {
        return Err(EngineError::InvalidState {
            operation: "start",
            state: EngineState::Running,
        });
    }

    readiness::refresh(ctx);
    if ctx.state() != EngineState::AudioGraphReady {
        let reason = readiness::validate(ctx)
            .err()
            .unwrap_or_else(|| format!("engine is {}", ctx.state()));
        return Err(EngineError::EngineStartFailed { reason });
    }

    let native = ctx.native();
    if let Err(e) = native.prepare().and_then(|_| native.start()) {
        roll_back(ctx);
        return Err(EngineError::EngineStartFailed {
            reason: e.to_string(),
        });
    }
    if let Err(e) = ctx.monitor.lock().start() {
        roll_back(ctx);
        return Err(EngineError::EngineStartFailed {
            reason: format!("device monitor: {e}"),
        });
    }

    for channel in ctx.channel_list() {
        {
            let mut state = channel.lock();
            state.running = true;
            if let ChannelVariant::Playback(config) = &state.variant {
                if config.auto_start {
                    state.transport.state = TransportState::Playing;
                }
            }
        }
        transport::resume(ctx, &channel);
    }
    ctx.set_state(EngineState::Running);
    log::info!(target: "engine", "engine started");
    Ok(())
}

fn roll_back(ctx: &EngineContext) {
    if ctx.native().is_running() {
        if let Err(e) = ctx.native().stop() {
            log::error!(target: "engine", "rolling back failed start: {}", e);
        }
    }
}

/// Stop rendering. A stopped engine stays stopped.
pub(super) fn stop(ctx: &EngineContext) -> Result<(), EngineError> {
    if ctx.state() != EngineState::Running {
        return Ok(());
    }

    ctx.native()
        .stop()
        .map_err(|e| EngineError::structural("stop engine", e))?;
    ctx.monitor.lock().stop();

    for channel in ctx.channel_list() {
        transport::suspend(ctx, &channel);
        channel.lock().running = false;
    }
    // Leave Running so readiness is recomputed from the graph.
    ctx.set_state(EngineState::AudioGraphReady);
    readiness::refresh(ctx);
    log::info!(target: "engine", "engine stopped");
    Ok(())
}

pub(super) fn set_buffer_size(ctx: &EngineContext, size: BufferSize) -> Result<(), EngineError> {
    let state = ctx.state();
    if state == EngineState::Running {
        return Err(EngineError::InvalidState {
            operation: "set buffer size",
            state,
        });
    }
    ctx.native().set_buffer_size(size.as_samples())?;
    *ctx.buffer_size.write() = size;
    Ok(())
}
