//! Single-writer operation queue.
//!
//! Every structural change to the native graph is an [`Operation`] executed by
//! one worker thread, in submission order. `submit` blocks the caller until
//! the worker has written the result into the operation's own reply channel.
//! The worker is the only thread that makes structural native calls, so two
//! such calls are never in flight at once.

mod channels;
mod devices;
mod lifecycle;
pub(crate) mod operation;
mod plugins;
mod routing;
mod transport;
mod worker;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Instant;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use patchbay_audio::{MonitorEvent, OperationTelemetry};

use crate::engine::context::EngineContext;
use crate::error::EngineError;
pub(crate) use operation::{Envelope, OpOutput, OpResult, Operation};

pub(crate) use channels::{build_channel, build_master, teardown_channel, validate_variant};
pub(crate) use devices::output_device;
pub(crate) use plugins::load_plugin;
pub(crate) use routing::{attach_send, connect_channels};

pub struct Dispatcher {
    tx: Sender<Envelope>,
    worker: ThreadId,
    handle: Mutex<Option<JoinHandle<()>>>,
    stats: Arc<Mutex<OperationTelemetry>>,
    stopped: AtomicBool,
}

impl Dispatcher {
    /// Start the worker. It drains `events` from the device monitor alongside operations.
    pub(crate) fn spawn(
        ctx: Arc<EngineContext>,
        events: Receiver<MonitorEvent>,
    ) -> std::io::Result<Self> {
        let (tx, rx) = crossbeam_channel::bounded(ctx.settings.queue_capacity.max(1));
        let stats = Arc::new(Mutex::new(OperationTelemetry::new()));
        let worker = worker::Worker::new(ctx, rx, events, Arc::clone(&stats));

        let handle = thread::Builder::new()
            .name("patchbay-dispatcher".into())
            .spawn(move || worker.run())?;

        log::info!(target: "dispatch", "dispatcher started");
        Ok(Self {
            tx,
            worker: handle.thread().id(),
            handle: Mutex::new(Some(handle)),
            stats,
            stopped: AtomicBool::new(false),
        })
    }

    /// Queue `op` and wait for its result.
    pub(crate) fn submit(&self, op: Operation) -> OpResult {
        let name = op.name();
        if thread::current().id() == self.worker {
            return Err(EngineError::ReentrantSubmit { operation: name });
        }
        if self.stopped.load(Ordering::SeqCst) {
            return Err(EngineError::DispatcherStopped);
        }

        let (reply_tx, reply_rx) = mpsc::channel();
        self.tx
            .send(Envelope {
                op,
                reply: reply_tx,
                submitted: Instant::now(),
            })
            .map_err(|_| EngineError::DispatcherStopped)?;

        match reply_rx.recv() {
            Ok(result) => result,
            Err(_) => Err(EngineError::DispatcherStopped),
        }
    }

    /// Let everything already queued finish, then stop the worker. Idempotent.
    pub(crate) fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        let (reply_tx, _reply_rx) = mpsc::channel();
        let _ = self.tx.send(Envelope {
            op: Operation::Shutdown,
            reply: reply_tx,
            submitted: Instant::now(),
        });

        if thread::current().id() == self.worker {
            // Called from a callback on the worker: it exits after this operation.
            return;
        }
        if let Some(handle) = self.handle.lock().take() {
            if handle.join().is_err() {
                log::error!(target: "dispatch", "dispatcher thread panicked");
            }
        }
    }

    /// Latency and outcome counters for executed operations.
    pub fn stats(&self) -> OperationTelemetry {
        *self.stats.lock()
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}
