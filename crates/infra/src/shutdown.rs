//! Shutdown coordination for the consumer side of the pipeline.
//!
//! On SIGTERM/SIGINT:
//! 1. Stop consumer workers; each drains what it was already handed (bounded wait)
//! 2. Flush the batch buffer, however few items it holds
//! 3. Log the final committed count
//! 4. Stop the success reporter (bounded wait)

use std::sync::Arc;
use std::time::Duration;

use tokio::signal;
use tracing::{info, warn};

use crate::accounting::ReporterHandle;
use crate::batch_writer::{BatchWriteBuffer, FlushOutcome};
use crate::consumer::ConsumerPoolHandle;
use crate::store::StorageClient;

/// Resolve once the process receives SIGTERM or SIGINT.
pub async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
        let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
            _ = sigint.recv() => info!("received SIGINT, shutting down"),
        }
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c().await?;
        info!("received Ctrl+C, shutting down");
    }

    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownReport {
    pub workers_stopped: bool,
    pub final_flush: FlushOutcome,
    pub committed_total: u64,
    pub reporter_stopped: bool,
}

pub struct ShutdownCoordinator<S> {
    buffer: Arc<BatchWriteBuffer<S>>,
    workers: Option<ConsumerPoolHandle>,
    reporter: Option<ReporterHandle>,
    timeout: Duration,
}

impl<S: StorageClient> ShutdownCoordinator<S> {
    pub fn new(buffer: Arc<BatchWriteBuffer<S>>, timeout: Duration) -> Self {
        Self {
            buffer,
            workers: None,
            reporter: None,
            timeout,
        }
    }

    pub fn with_workers(mut self, workers: ConsumerPoolHandle) -> Self {
        self.workers = Some(workers);
        self
    }

    pub fn with_reporter(mut self, reporter: ReporterHandle) -> Self {
        self.reporter = Some(reporter);
        self
    }

    /// Run the shutdown sequence. Blocking; call from a blocking context.
    pub fn shutdown(self) -> ShutdownReport {
        let workers_stopped = match self.workers {
            Some(workers) => workers.shutdown(self.timeout),
            None => true,
        };
        if !workers_stopped {
            warn!("flushing while some consumer workers are still running");
        }

        let final_flush = self.buffer.flush();
        let committed_total = self.buffer.accounting().count();
        info!(
            flushed = final_flush.committed,
            discarded = final_flush.discarded,
            committed_total,
            "final flush complete"
        );

        let reporter_stopped = match self.reporter {
            Some(reporter) => reporter.shutdown(self.timeout),
            None => true,
        };

        ShutdownReport {
            workers_stopped,
            final_flush,
            committed_total,
            reporter_stopped,
        }
    }
}
