use crate::executor::Executor;
use crate::probe::Parser;
use crate::queue::JobQueue;
use crate::runtime::telemetry::Telemetry;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// How long one bounded wait on the job queue lasts. The loop re-checks the
/// shutdown signal between waits, so this also bounds shutdown latency for
/// an idle slot.
pub(crate) const POP_WAIT: Duration = Duration::from_secs(1);

const POP_INITIAL_BACKOFF_MS: u64 = 250;
const POP_MAX_BACKOFF_MS: u64 = 5_000;

/// One worker slot: pops a job, parses it, executes it to completion, and
/// re-arms. Shutdown is observed at two checkpoints, before the pop and
/// between pop and execute; a job caught at the second checkpoint is
/// requeued so it is never silently dropped.
pub(crate) struct WorkerSlot {
    pub(crate) id: usize,
    pub(crate) queue: Arc<dyn JobQueue>,
    pub(crate) parser: Arc<Parser>,
    pub(crate) executor: Arc<Executor>,
    pub(crate) telemetry: Arc<Telemetry>,
    pub(crate) shutdown: CancellationToken,
}

impl WorkerSlot {
    #[tracing::instrument(name = "slot", skip_all, fields(worker = self.id))]
    pub(crate) async fn run(self) {
        tracing::info!("worker slot started");
        let mut consecutive_pop_errors = 0usize;

        loop {
            if self.shutdown.is_cancelled() {
                break;
            }

            let job = match self.queue.pop(POP_WAIT).await {
                Ok(None) => continue,
                Ok(Some(job)) => {
                    consecutive_pop_errors = 0;
                    job
                }
                Err(err) => {
                    consecutive_pop_errors += 1;
                    self.telemetry.record_store_error();
                    tracing::warn!(error = %err, "job queue pop failed");
                    let backoff = pop_backoff(consecutive_pop_errors);
                    tokio::select! {
                        _ = self.shutdown.cancelled() => break,
                        _ = sleep(backoff) => continue,
                    }
                }
            };

            if self.shutdown.is_cancelled() {
                match self.queue.requeue(&job.payload).await {
                    Ok(()) => {
                        tracing::info!(payload = %job.payload, "requeued job after shutdown signal")
                    }
                    Err(err) => {
                        tracing::error!(
                            payload = %job.payload,
                            error = %err,
                            "failed to requeue job on shutdown"
                        )
                    }
                }
                break;
            }

            self.telemetry.record_job_popped();
            tracing::debug!(queue = %job.queue, payload = %job.payload, "picked up job");

            match self.parser.parse_line(&job.payload) {
                Ok(spec) => {
                    if let Err(err) = self.executor.execute(self.id, spec).await {
                        tracing::warn!(payload = %job.payload, error = %err, "test execution failed");
                    }
                }
                Err(err) => {
                    self.telemetry.record_parse_error();
                    tracing::warn!(
                        payload = %job.payload,
                        error = %err,
                        "discarding unparseable job"
                    );
                }
            }
        }

        tracing::info!("worker slot exited");
    }
}

fn pop_backoff(attempt: usize) -> Duration {
    let exponent = attempt.saturating_sub(1).min(8) as u32;
    let delay_ms = POP_INITIAL_BACKOFF_MS
        .saturating_mul(1u64 << exponent)
        .min(POP_MAX_BACKOFF_MS);
    Duration::from_millis(delay_ms)
}
