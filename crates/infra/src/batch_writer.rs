//! Shared batch-write buffer with partial-failure retry.
//!
//! Every consumer worker appends into one [`BatchWriteBuffer`]. A single mutex
//! guards both the pending items and the flush itself, so at most one flush is
//! in flight and appenders simply queue behind it.
//!
//! ## Flush algorithm
//!
//! ```text
//! batch      = take(pending)
//! unprocessed = store.batch_write(batch)
//! retry = 0
//! while unprocessed non-empty and attempts < max_attempts:
//!     sleep(backoff_base * 2^retry)
//!     unprocessed = store.batch_write(unprocessed)
//!     retry += 1
//! committed += len(batch) - len(unprocessed)
//! unprocessed → dead-letter sink, or dropped
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use serde_json::json;
use tracing::{debug, error, warn};

use liftride_core::StorageItem;
use liftride_queue::{PublishChannel, QueueError};

use crate::accounting::SuccessAccounting;
use crate::store::StorageClient;

/// Batch size and retry schedule for flushes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchPolicy {
    /// Pending length that triggers a flush.
    pub batch_size: usize,
    /// Store write attempts per flush, including the first.
    pub max_attempts: u32,
    pub backoff_base: Duration,
}

impl Default for BatchPolicy {
    fn default() -> Self {
        Self {
            batch_size: 25,
            max_attempts: 5,
            backoff_base: Duration::from_millis(60),
        }
    }
}

impl BatchPolicy {
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_backoff_base(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }

    /// Delay before resend number `retry` (0-indexed): `base * 2^retry`.
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        self.backoff_base.saturating_mul(1u32 << retry.min(16))
    }

    /// Sum of all backoff sleeps in a flush that never succeeds.
    pub fn worst_case_backoff(&self) -> Duration {
        (0..self.max_attempts.saturating_sub(1))
            .map(|r| self.delay_for_retry(r))
            .fold(Duration::ZERO, Duration::saturating_add)
    }
}

/// What one flush did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushOutcome {
    pub sent: usize,
    pub committed: usize,
    /// Items still unprocessed after the last attempt.
    pub discarded: usize,
    pub attempts: u32,
}

/// Receives items the store never accepted.
pub trait DeadLetterSink: Send + Sync {
    fn dead_letter(&self, items: &[StorageItem], attempts: u32) -> Result<(), QueueError>;
}

/// Publishes exhausted items to a broker queue (`<queue>:dlq` by convention).
pub struct BrokerDeadLetterSink<C> {
    channel: Mutex<C>,
    queue: String,
}

impl<C: PublishChannel> BrokerDeadLetterSink<C> {
    pub fn new(channel: C, queue: impl Into<String>) -> Self {
        Self {
            channel: Mutex::new(channel),
            queue: queue.into(),
        }
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }
}

impl<C: PublishChannel> DeadLetterSink for BrokerDeadLetterSink<C> {
    fn dead_letter(&self, items: &[StorageItem], attempts: u32) -> Result<(), QueueError> {
        let failed_at = chrono::Utc::now().to_rfc3339();
        let mut channel = self.channel.lock().unwrap_or_else(|p| p.into_inner());
        for item in items {
            let payload = json!({
                "item": item,
                "attempts": attempts,
                "failedAt": failed_at,
            });
            let bytes = serde_json::to_vec(&payload)
                .map_err(|e| QueueError::Serialization(e.to_string()))?;
            channel.publish(&self.queue, &bytes)?;
        }
        Ok(())
    }
}

pub struct BatchWriteBuffer<S> {
    pending: Mutex<Vec<StorageItem>>,
    store: S,
    policy: BatchPolicy,
    accounting: Arc<SuccessAccounting>,
    dead_letters: Option<Box<dyn DeadLetterSink>>,
    flushes: AtomicU64,
}

impl<S: StorageClient> BatchWriteBuffer<S> {
    pub fn new(store: S, policy: BatchPolicy, accounting: Arc<SuccessAccounting>) -> Self {
        Self {
            pending: Mutex::new(Vec::with_capacity(policy.batch_size)),
            store,
            policy,
            accounting,
            dead_letters: None,
            flushes: AtomicU64::new(0),
        }
    }

    /// Route exhausted items to `sink` instead of dropping them.
    pub fn with_dead_letter_sink(mut self, sink: impl DeadLetterSink + 'static) -> Self {
        self.dead_letters = Some(Box::new(sink));
        self
    }

    pub fn policy(&self) -> &BatchPolicy {
        &self.policy
    }

    pub fn accounting(&self) -> &Arc<SuccessAccounting> {
        &self.accounting
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn pending_len(&self) -> usize {
        self.lock().len()
    }

    /// Non-empty flushes performed so far.
    pub fn flush_count(&self) -> u64 {
        self.flushes.load(Ordering::SeqCst)
    }

    /// Add one item, flushing before returning once the batch is full.
    pub fn append(&self, item: StorageItem) -> Option<FlushOutcome> {
        let mut pending = self.lock();
        pending.push(item);
        if pending.len() >= self.policy.batch_size {
            return Some(self.flush_locked(&mut pending));
        }
        None
    }

    /// Write out whatever is pending, however little.
    pub fn flush(&self) -> FlushOutcome {
        let mut pending = self.lock();
        self.flush_locked(&mut pending)
    }

    fn flush_locked(&self, pending: &mut Vec<StorageItem>) -> FlushOutcome {
        if pending.is_empty() {
            return FlushOutcome::default();
        }
        // Pending is cleared whatever happens below.
        let batch = std::mem::replace(pending, Vec::with_capacity(self.policy.batch_size));
        self.flushes.fetch_add(1, Ordering::SeqCst);

        let sent = batch.len();
        let mut unprocessed = self.write(&batch);
        let mut attempts = 1;

        while !unprocessed.is_empty() && attempts < self.policy.max_attempts {
            let delay = self.policy.delay_for_retry(attempts - 1);
            warn!(
                attempt = attempts,
                unprocessed = unprocessed.len(),
                delay_ms = delay.as_millis() as u64,
                "batch write left items unprocessed, retrying"
            );
            thread::sleep(delay);
            unprocessed = self.write(&unprocessed);
            attempts += 1;
        }

        let committed = sent.saturating_sub(unprocessed.len());
        self.accounting.record(committed as u64);

        let discarded = unprocessed.len();
        if discarded > 0 {
            self.give_up(&unprocessed, attempts);
        }

        debug!(sent, committed, discarded, attempts, "flush complete");
        FlushOutcome {
            sent,
            committed,
            discarded,
            attempts,
        }
    }

    /// One pass over `items`, split to the store's batch limit. Returns what is left.
    fn write(&self, items: &[StorageItem]) -> Vec<StorageItem> {
        let max = self.store.max_batch_size().max(1);
        let mut left = Vec::new();
        for chunk in items.chunks(max) {
            match self.store.batch_write(chunk) {
                Ok(unprocessed) => left.extend(unprocessed),
                Err(err) => {
                    warn!(error = %err, items = chunk.len(), "batch write failed");
                    left.extend_from_slice(chunk);
                }
            }
        }
        left
    }

    fn give_up(&self, items: &[StorageItem], attempts: u32) {
        match &self.dead_letters {
            Some(sink) => match sink.dead_letter(items, attempts) {
                Ok(()) => warn!(count = items.len(), attempts, "items sent to dead-letter queue"),
                Err(err) => error!(
                    count = items.len(),
                    error = %err,
                    "dead-letter publish failed, items discarded"
                ),
            },
            None => error!(
                count = items.len(),
                attempts,
                "retry budget exhausted, items discarded"
            ),
        }
    }

    // Pending items stay structurally valid across a panic in a holder.
    fn lock(&self) -> MutexGuard<'_, Vec<StorageItem>> {
        self.pending.lock().unwrap_or_else(|p| p.into_inner())
    }
}
