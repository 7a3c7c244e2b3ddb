use crate::worker::WorkerPool;
use anyhow::Result;
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Coordinates the worker pool lifecycle and handles OS signals.
///
/// The first interrupt starts a graceful drain: idle slots exit, a slot
/// with a popped-but-unstarted job requeues it, and in-flight tests run to
/// completion. A second interrupt terminates the process immediately, which
/// is the operator's explicit choice to lose in-flight work.
pub struct Runner {
    pool: WorkerPool,
    shutdown: CancellationToken,
}

impl Runner {
    pub fn new(pool: WorkerPool) -> Self {
        let shutdown = pool.shutdown_token();
        Self { pool, shutdown }
    }

    /// Returns a clone of the shutdown token so callers can integrate their
    /// own cancellation strategies.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Launches the pool and runs until Ctrl-C (SIGINT) or an external
    /// cancellation, then drains the slots.
    pub async fn run_until_signal(mut self) -> Result<()> {
        self.pool.launch().await?;
        tracing::info!("waiting for jobs; press Ctrl-C to shut down");

        tokio::select! {
            _ = signal::ctrl_c() => {
                tracing::info!("interrupt received; finishing in-flight tests");
                self.shutdown.cancel();
                tokio::spawn(async {
                    if signal::ctrl_c().await.is_ok() {
                        tracing::warn!("second interrupt; terminating immediately");
                        std::process::exit(0);
                    }
                });
            }
            _ = self.shutdown.cancelled() => {
                tracing::info!("shutdown token cancelled");
            }
        }

        self.pool.join().await;
        tracing::info!("worker pool drained; exiting");
        Ok(())
    }
}
