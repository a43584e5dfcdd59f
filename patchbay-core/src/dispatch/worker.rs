use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use crossbeam_channel::Receiver;
use parking_lot::Mutex;
use patchbay_audio::{MonitorEvent, OperationTelemetry};
use patchbay_types::EngineState;

use super::operation::{Envelope, OpOutput, OpResult, Operation};
use super::{channels, devices, lifecycle, plugins, routing, transport};
use crate::engine::context::EngineContext;
use crate::engine::readiness;
use crate::error::EngineError;
use crate::persistence;

pub(super) struct Worker {
    ctx: Arc<EngineContext>,
    ops: Receiver<Envelope>,
    events: Receiver<MonitorEvent>,
    stats: Arc<Mutex<OperationTelemetry>>,
    last_health_check: Instant,
    underruns_seen: u64,
}

impl Worker {
    pub(super) fn new(
        ctx: Arc<EngineContext>,
        ops: Receiver<Envelope>,
        events: Receiver<MonitorEvent>,
        stats: Arc<Mutex<OperationTelemetry>>,
    ) -> Self {
        let underruns_seen = ctx.native().underrun_count();
        Self {
            ctx,
            ops,
            events,
            stats,
            last_health_check: Instant::now(),
            underruns_seen,
        }
    }

    pub(super) fn run(mut self) {
        let tick = self.ctx.settings.health_tick;

        loop {
            let mut monitor_gone = false;

            crossbeam_channel::select! {
                recv(self.ops) -> msg => {
                    match msg {
                        Ok(envelope) => {
                            if self.handle(envelope) {
                                break;
                            }
                        }
                        Err(_) => break, // Disconnected
                    }
                }
                recv(self.events) -> msg => {
                    match msg {
                        Ok(event) => self.handle_monitor_event(event),
                        Err(_) => monitor_gone = true,
                    }
                }
                default(tick) => {}
            }

            if monitor_gone {
                self.events = crossbeam_channel::never();
            }
            if self.last_health_check.elapsed() >= tick {
                self.last_health_check = Instant::now();
                self.health_check();
            }
        }

        log::info!(target: "dispatch", "dispatcher stopped");
    }

    /// Run one operation and reply. Returns true on shutdown.
    fn handle(&mut self, envelope: Envelope) -> bool {
        let Envelope {
            op,
            reply,
            submitted,
        } = envelope;
        let name = op.name();

        if let Operation::Shutdown = op {
            let _ = reply.send(Ok(OpOutput::Done));
            return true;
        }

        let ctx = &self.ctx;
        let result: OpResult = match panic::catch_unwind(AssertUnwindSafe(|| execute(ctx, op))) {
            Ok(result) => result,
            Err(payload) => {
                self.stats.lock().record_panic();
                let err = EngineError::structural(name, format!("panicked: {}", panic_message(&*payload)));
                log::error!(target: "dispatch", "{}", err);
                self.ctx.report(&err);
                Err(err)
            }
        };

        readiness::refresh(&self.ctx);

        let elapsed = submitted.elapsed();
        let budget = self.ctx.settings.operation_budget;
        let over_budget = self.stats.lock().record(elapsed, budget, result.is_ok());
        if over_budget {
            log::warn!(target: "dispatch", "{} took {:?}, target is {:?}", name, elapsed, budget);
            self.ctx.report(&EngineError::LatencyBudgetExceeded {
                operation: name,
                elapsed,
                budget,
            });
        }
        match &result {
            Ok(_) => log::debug!(target: "dispatch", "{} done in {:?}", name, elapsed),
            Err(e) => log::debug!(target: "dispatch", "{} failed: {}", name, e),
        }

        if reply.send(result).is_err() {
            log::debug!(target: "dispatch", "submitter of {} went away", name);
        }
        false
    }

    fn handle_monitor_event(&mut self, event: MonitorEvent) {
        match event {
            MonitorEvent::Device(event) => {
                let ctx = &self.ctx;
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                    devices::reconcile(ctx, &event);
                }));
                if outcome.is_err() {
                    log::error!(target: "dispatch", "device reconciliation panicked on {:?}", event);
                }
                readiness::refresh(&self.ctx);
                self.ctx.notify_listeners(&event);
            }
            MonitorEvent::ProbeFailed(reason) => {
                self.ctx.report(&EngineError::DeviceProbeFailed(reason));
            }
            MonitorEvent::SlowProbe(elapsed) => {
                log::debug!(target: "dispatch", "slow device probe: {:?}", elapsed);
            }
        }
    }

    /// Report underruns that happened since the last check while running.
    fn health_check(&mut self) {
        let count = self.ctx.native().underrun_count();
        if count > self.underruns_seen && self.ctx.state() == EngineState::Running {
            let err = EngineError::BufferUnderrun {
                count: count - self.underruns_seen,
            };
            log::warn!(target: "dispatch", "{}", err);
            self.ctx.report(&err);
        }
        self.underruns_seen = count;
    }
}

fn execute(ctx: &EngineContext, op: Operation) -> OpResult {
    match op {
        Operation::Start => lifecycle::start(ctx).map(|_| OpOutput::Done),
        Operation::Stop => lifecycle::stop(ctx).map(|_| OpOutput::Done),
        Operation::CreateChannel { name, variant } => {
            channels::create(ctx, name, variant).map(OpOutput::Channel)
        }
        Operation::RemoveChannel(id) => channels::remove(ctx, id).map(|_| OpOutput::Done),
        Operation::RenameChannel { channel, name } => {
            channels::rename(ctx, channel, name).map(|_| OpOutput::Done)
        }
        Operation::Connect { source, target } => {
            routing::connect(ctx, source, target).map(|_| OpOutput::Done)
        }
        Operation::Disconnect { source, target } => {
            routing::disconnect(ctx, source, target).map(|_| OpOutput::Done)
        }
        Operation::AddSend {
            source,
            target,
            level,
            pre_fader,
        } => routing::add_send(ctx, source, target, level, pre_fader).map(|_| OpOutput::Done),
        Operation::RemoveSend { source, target } => {
            routing::remove_send(ctx, source, target).map(|_| OpOutput::Done)
        }
        Operation::SetMute { channel, muted } => {
            routing::set_mute(ctx, channel, muted).map(|_| OpOutput::Done)
        }
        Operation::AddPlugin {
            channel,
            blueprint,
            position,
        } => plugins::add(ctx, channel, blueprint, position).map(OpOutput::Plugin),
        Operation::RemovePlugin { channel, plugin } => {
            plugins::remove(ctx, channel, plugin).map(|_| OpOutput::Done)
        }
        Operation::MovePlugin {
            channel,
            plugin,
            position,
        } => plugins::move_to(ctx, channel, plugin, position).map(|_| OpOutput::Done),
        Operation::SetPluginBypass {
            channel,
            plugin,
            bypassed,
        } => plugins::set_bypass(ctx, channel, plugin, bypassed).map(|_| OpOutput::Done),
        Operation::ChangeInputDevice { channel, uid } => {
            devices::change_input(ctx, channel, &uid).map(|_| OpOutput::Done)
        }
        Operation::ChangeOutputDevice(uid) => {
            devices::change_output(ctx, &uid).map(|_| OpOutput::Done)
        }
        Operation::SetBufferSize(size) => {
            lifecycle::set_buffer_size(ctx, size).map(|_| OpOutput::Done)
        }
        Operation::Transport { channel, command } => {
            transport::apply(ctx, channel, command).map(|_| OpOutput::Done)
        }
        Operation::SetMasterOptions { limiter, metering } => {
            channels::set_master_options(ctx, limiter, metering).map(|_| OpOutput::Done)
        }
        Operation::Restore(document) => persistence::restore(ctx, *document).map(|_| OpOutput::Done),
        Operation::Shutdown => Ok(OpOutput::Done),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
