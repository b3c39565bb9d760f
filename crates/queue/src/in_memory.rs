//! In-memory broker for tests/dev.
//!
//! - Named FIFO queues, competing consumers
//! - One pump thread per subscription feeding a prefetch-bounded buffer
//! - Unacknowledged deliveries are not redelivered; ack only releases prefetch credit

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, SyncSender};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use tracing::debug;

use crate::broker::{
    AckMode, Acknowledger, Delivery, MessageBroker, PublishChannel, QueueError, SubscribeOptions,
    Subscription,
};

const PUMP_POLL: Duration = Duration::from_millis(50);

#[derive(Debug, Default)]
struct MemQueue {
    messages: Mutex<VecDeque<Vec<u8>>>,
    ready: Condvar,
    published: AtomicU64,
}

impl MemQueue {
    fn lock(&self) -> MutexGuard<'_, VecDeque<Vec<u8>>> {
        self.messages.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn push(&self, payload: Vec<u8>) {
        self.lock().push_back(payload);
        self.published.fetch_add(1, Ordering::SeqCst);
        self.ready.notify_one();
    }

    /// Put back a message the subscriber never received.
    fn requeue(&self, payload: Vec<u8>) {
        self.lock().push_front(payload);
        self.ready.notify_one();
    }

    fn pop_timeout(&self, timeout: Duration) -> Option<Vec<u8>> {
        let guard = self.lock();
        let (mut guard, _) = self
            .ready
            .wait_timeout_while(guard, timeout, |q| q.is_empty())
            .unwrap_or_else(|p| p.into_inner());
        guard.pop_front()
    }
}

#[derive(Debug, Default)]
struct Inner {
    queues: Mutex<HashMap<String, Arc<MemQueue>>>,
    closed: AtomicBool,
    fail_publishes: AtomicBool,
    next_delivery: AtomicU64,
}

impl Inner {
    fn queue(&self, name: &str) -> Result<Arc<MemQueue>, QueueError> {
        self.queues
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(name)
            .cloned()
            .ok_or_else(|| QueueError::QueueNotFound(name.to_string()))
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// In-process broker. Cloning shares the same queues.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBroker {
    inner: Arc<Inner>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages accepted on `queue` since it was declared.
    pub fn published_count(&self, queue: &str) -> u64 {
        self.inner
            .queue(queue)
            .map(|q| q.published.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    /// Messages waiting on `queue` that no subscription has taken yet.
    pub fn depth(&self, queue: &str) -> usize {
        self.inner.queue(queue).map(|q| q.lock().len()).unwrap_or(0)
    }

    /// Make every publish fail with [`QueueError::Connection`] until reset.
    pub fn set_publish_failure(&self, fail: bool) {
        self.inner.fail_publishes.store(fail, Ordering::SeqCst);
    }

    /// Stop accepting publishes and end all subscriptions.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        for q in self.inner.queues.lock().unwrap_or_else(|p| p.into_inner()).values() {
            q.ready.notify_all();
        }
    }
}

impl MessageBroker for InMemoryBroker {
    type Channel = InMemoryChannel;

    fn declare_queue(&self, queue: &str) -> Result<(), QueueError> {
        if self.inner.is_closed() {
            return Err(QueueError::Closed);
        }
        self.inner
            .queues
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .entry(queue.to_string())
            .or_default();
        Ok(())
    }

    fn create_channel(&self) -> Result<Self::Channel, QueueError> {
        if self.inner.is_closed() {
            return Err(QueueError::Closed);
        }
        Ok(InMemoryChannel {
            inner: Arc::clone(&self.inner),
            open: true,
        })
    }

    fn subscribe(&self, queue: &str, options: SubscribeOptions) -> Result<Subscription, QueueError> {
        if self.inner.is_closed() {
            return Err(QueueError::Closed);
        }
        let source = self.inner.queue(queue)?;
        let (tx, rx) = mpsc::sync_channel(options.buffer_size());
        let cancelled = Arc::new(AtomicBool::new(false));
        let credit = Arc::new(Credit::new(options.buffer_size()));

        let pump = Pump {
            inner: Arc::clone(&self.inner),
            source,
            tx,
            cancelled: Arc::clone(&cancelled),
            credit: (options.ack_mode == AckMode::AfterProcessing).then(|| Arc::clone(&credit)),
        };
        thread::Builder::new()
            .name(format!("queue-pump-{}", options.consumer_name))
            .spawn(move || pump.run())
            .map_err(|e| QueueError::Command(e.to_string()))?;

        let acker: Option<Box<dyn Acknowledger>> = match options.ack_mode {
            AckMode::Immediate => None,
            AckMode::AfterProcessing => Some(Box::new(CreditAcker(credit))),
        };

        Ok(Subscription::new(rx, options.ack_mode, acker, cancelled))
    }
}

/// Outstanding-delivery budget for ack-after-processing subscriptions.
#[derive(Debug)]
struct Credit {
    outstanding: Mutex<usize>,
    freed: Condvar,
    limit: usize,
}

impl Credit {
    fn new(limit: usize) -> Self {
        Self {
            outstanding: Mutex::new(0),
            freed: Condvar::new(),
            limit,
        }
    }

    /// Take one unit of credit, waiting up to `timeout`.
    fn take(&self, timeout: Duration) -> bool {
        let guard = self.outstanding.lock().unwrap_or_else(|p| p.into_inner());
        let (mut guard, _) = self
            .freed
            .wait_timeout_while(guard, timeout, |n| *n >= self.limit)
            .unwrap_or_else(|p| p.into_inner());
        if *guard >= self.limit {
            return false;
        }
        *guard += 1;
        true
    }

    fn give_back(&self) {
        let mut guard = self.outstanding.lock().unwrap_or_else(|p| p.into_inner());
        *guard = guard.saturating_sub(1);
        self.freed.notify_one();
    }
}

struct CreditAcker(Arc<Credit>);

impl Acknowledger for CreditAcker {
    fn ack(&self, _delivery_id: &str) -> Result<(), QueueError> {
        self.0.give_back();
        Ok(())
    }
}

struct Pump {
    inner: Arc<Inner>,
    source: Arc<MemQueue>,
    tx: SyncSender<Delivery>,
    cancelled: Arc<AtomicBool>,
    credit: Option<Arc<Credit>>,
}

impl Pump {
    fn run(self) {
        while !self.cancelled.load(Ordering::SeqCst) && !self.inner.is_closed() {
            if let Some(credit) = &self.credit {
                if !credit.take(PUMP_POLL) {
                    continue;
                }
            }

            let Some(payload) = self.source.pop_timeout(PUMP_POLL) else {
                if let Some(credit) = &self.credit {
                    credit.give_back();
                }
                continue;
            };
            if self.cancelled.load(Ordering::SeqCst) {
                self.source.requeue(payload);
                break;
            }

            let id = self.inner.next_delivery.fetch_add(1, Ordering::SeqCst).to_string();
            if let Err(mpsc::SendError(delivery)) = self.tx.send(Delivery { id, payload }) {
                // Subscriber went away; the message was never handed over.
                self.source.requeue(delivery.payload);
                break;
            }
        }
        debug!("in-memory subscription pump stopped");
    }
}

/// Publish handle onto an [`InMemoryBroker`].
#[derive(Debug)]
pub struct InMemoryChannel {
    inner: Arc<Inner>,
    open: bool,
}

impl InMemoryChannel {
    pub fn close(&mut self) {
        self.open = false;
    }
}

impl PublishChannel for InMemoryChannel {
    fn publish(&mut self, queue: &str, payload: &[u8]) -> Result<(), QueueError> {
        if !self.open || self.inner.is_closed() {
            return Err(QueueError::Closed);
        }
        if self.inner.fail_publishes.load(Ordering::SeqCst) {
            return Err(QueueError::Connection("simulated publish failure".to_string()));
        }
        self.inner.queue(queue)?.push(payload.to_vec());
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open && !self.inner.is_closed()
    }
}
