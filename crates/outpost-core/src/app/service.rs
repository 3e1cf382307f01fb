//! OutboxService - start/stop handle for the processor and sweeper loops.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::processor::Processor;
use super::sweeper::Sweeper;

/// Handle over the running processor and sweeper tasks.
/// - `request_shutdown()` asks both loops to stop after their current step
/// - `shutdown_and_join()` also waits until both have exited
/// - dropping the handle closes the channel, which stops the loops as well
pub struct OutboxService {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

impl OutboxService {
    /// Spawn both loops on the current tokio runtime.
    pub fn spawn(processor: Arc<Processor>, sweeper: Arc<Sweeper>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let processor_rx = shutdown_rx.clone();
        let processor_join = tokio::spawn(async move {
            processor.run(processor_rx).await;
        });

        let sweeper_join = tokio::spawn(async move {
            sweeper.run(shutdown_rx).await;
        });

        Self {
            shutdown_tx,
            joins: vec![processor_join, sweeper_join],
        }
    }

    /// Ask both loops to stop. An in-flight dispatch still completes.
    pub fn request_shutdown(&self) {
        // receivers may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    pub fn is_shutdown_requested(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// Shutdown and wait for both loops.
    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        for join in self.joins {
            if let Err(err) = join.await {
                tracing::error!(error = %err, "outbox task ended abnormally");
            }
        }
    }
}
