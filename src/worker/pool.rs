//! Worker pool orchestration: slot creation, the startup reachability
//! probe, and drain-on-shutdown.

use crate::executor::Executor;
use crate::probe::Parser;
use crate::queue::JobQueue;
use crate::runtime::telemetry::Telemetry;
use crate::worker::slot::WorkerSlot;
use anyhow::{Context, Result};
use futures::FutureExt;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub struct WorkerPoolParams {
    pub parallel: usize,
    pub queue: Arc<dyn JobQueue>,
    pub parser: Arc<Parser>,
    pub executor: Arc<Executor>,
    pub telemetry: Arc<Telemetry>,
    pub shutdown: CancellationToken,
}

pub struct WorkerPool {
    parallel: usize,
    queue: Arc<dyn JobQueue>,
    parser: Arc<Parser>,
    executor: Arc<Executor>,
    telemetry: Arc<Telemetry>,
    shutdown: CancellationToken,
    slots: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(params: WorkerPoolParams) -> Self {
        Self {
            parallel: params.parallel.max(1),
            queue: params.queue,
            parser: params.parser,
            executor: params.executor,
            telemetry: params.telemetry,
            shutdown: params.shutdown,
            slots: Vec::new(),
        }
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Verifies the queue store is reachable, then spawns every slot.
    pub async fn launch(&mut self) -> Result<()> {
        self.queue
            .ping()
            .await
            .context("job queue store unreachable")?;

        for id in 1..=self.parallel {
            let slot = WorkerSlot {
                id,
                queue: self.queue.clone(),
                parser: self.parser.clone(),
                executor: self.executor.clone(),
                telemetry: self.telemetry.clone(),
                shutdown: self.shutdown.clone(),
            };

            let handle = tokio::spawn(async move {
                if let Err(panic) = std::panic::AssertUnwindSafe(slot.run()).catch_unwind().await {
                    let message = panic_message(panic.as_ref());
                    tracing::error!(worker = id, panic = %message, "worker slot panicked");
                }
            });
            self.slots.push(handle);
        }

        tracing::info!(slots = self.parallel, "worker pool started");
        Ok(())
    }

    /// Signals shutdown and waits for every slot to drain.
    pub async fn shutdown(&mut self) {
        self.shutdown.cancel();
        self.join().await;
    }

    /// Waits for every slot to exit.
    pub async fn join(&mut self) {
        for handle in self.slots.drain(..) {
            let _ = handle.await;
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
