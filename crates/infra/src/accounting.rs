//! Committed-record accounting and its periodic reporter.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, mpsc};
use std::thread;
use std::time::Duration;

use tracing::{info, warn};

/// Process-wide count of records the store has durably accepted.
///
/// Only ever increases. Shared by the batch buffer (writer) and the reporter.
#[derive(Debug, Default)]
pub struct SuccessAccounting {
    committed: AtomicU64,
}

impl SuccessAccounting {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, committed: u64) {
        if committed > 0 {
            self.committed.fetch_add(committed, Ordering::SeqCst);
        }
    }

    pub fn count(&self) -> u64 {
        self.committed.load(Ordering::SeqCst)
    }
}

/// Handle to stop and join the success reporter thread.
#[derive(Debug)]
pub struct ReporterHandle {
    stop: mpsc::Sender<()>,
    done: mpsc::Receiver<()>,
    join: Option<thread::JoinHandle<()>>,
}

impl ReporterHandle {
    /// Stop the reporter, waiting at most `timeout`. Returns whether it stopped in time.
    pub fn shutdown(mut self, timeout: Duration) -> bool {
        let _ = self.stop.send(());
        match self.done.recv_timeout(timeout) {
            Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => {
                if let Some(j) = self.join.take() {
                    let _ = j.join();
                }
                true
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {
                warn!("success reporter did not stop in time");
                false
            }
        }
    }
}

/// Logs the committed count at a fixed interval.
#[derive(Debug)]
pub struct SuccessReporter;

impl SuccessReporter {
    pub fn spawn(
        accounting: Arc<SuccessAccounting>,
        interval: Duration,
    ) -> std::io::Result<ReporterHandle> {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let (done_tx, done_rx) = mpsc::channel::<()>();

        let join = thread::Builder::new()
            .name("success-reporter".to_string())
            .spawn(move || {
                loop {
                    match stop_rx.recv_timeout(interval) {
                        Err(mpsc::RecvTimeoutError::Timeout) => {
                            info!(committed = accounting.count(), "success count");
                        }
                        Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
                    }
                }
                let _ = done_tx.send(());
            })?;

        Ok(ReporterHandle {
            stop: stop_tx,
            done: done_rx,
            join: Some(join),
        })
    }
}
