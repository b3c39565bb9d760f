//! Consumer worker pool.
//!
//! `workers` OS threads, each with its own subscription on the same queue.
//! The per-subscription prefetch bounds how many delivered messages a worker
//! can be holding, which is the pool's only flow control.
//!
//! On shutdown each worker cancels its subscription and keeps handling what the
//! broker already handed it until the buffer runs dry, so nothing delivered is
//! left behind. Past the shutdown deadline the remaining buffer is abandoned.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::RecvTimeoutError;
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{info, warn};

use liftride_core::StorageItem;
use liftride_queue::{AckMode, Delivery, MessageBroker, QueueError, SubscribeOptions, Subscription};

#[derive(Debug, Error)]
pub enum ConsumerError {
    #[error("failed to subscribe worker {worker}: {source}")]
    Subscribe {
        worker: usize,
        #[source]
        source: QueueError,
    },

    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerConfig {
    pub queue_name: String,
    pub workers: usize,
    pub prefetch: u16,
    pub ack_mode: AckMode,
    /// How often an idle worker checks for shutdown.
    pub poll_interval: Duration,
}

impl ConsumerConfig {
    pub fn new(queue_name: impl Into<String>, workers: usize, prefetch: u16) -> Self {
        Self {
            queue_name: queue_name.into(),
            workers,
            prefetch,
            ack_mode: AckMode::Immediate,
            poll_interval: Duration::from_millis(250),
        }
    }

    pub fn with_ack_mode(mut self, ack_mode: AckMode) -> Self {
        self.ack_mode = ack_mode;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

/// Running totals across all workers.
#[derive(Debug, Default)]
pub struct ConsumerStats {
    processed: AtomicU64,
    dropped: AtomicU64,
    failed: AtomicU64,
}

impl ConsumerStats {
    /// Messages decoded and handed to the handler successfully.
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::SeqCst)
    }

    /// Messages that could not be decoded.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::SeqCst)
    }

    /// Messages the handler returned an error for.
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::SeqCst)
    }
}

/// Handle to stop and join the worker threads.
#[derive(Debug)]
pub struct ConsumerPoolHandle {
    stop: Arc<AtomicBool>,
    abandon: Arc<AtomicBool>,
    workers: Vec<(String, thread::JoinHandle<()>)>,
    stats: Arc<ConsumerStats>,
}

impl ConsumerPoolHandle {
    pub fn stats(&self) -> &Arc<ConsumerStats> {
        &self.stats
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Signal every worker to stop and wait up to `timeout` for all of them to
    /// drain their buffered deliveries. Workers still running at the deadline
    /// drop what is left and are detached. Returns whether all stopped in time.
    pub fn shutdown(self, timeout: Duration) -> bool {
        self.stop.store(true, Ordering::SeqCst);
        let deadline = Instant::now() + timeout;

        let mut all_stopped = true;
        for (name, join) in self.workers {
            while !join.is_finished() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(10));
            }
            if join.is_finished() {
                let _ = join.join();
            } else {
                warn!(worker = %name, "consumer worker did not stop before deadline");
                all_stopped = false;
            }
        }
        if !all_stopped {
            self.abandon.store(true, Ordering::SeqCst);
        }
        all_stopped
    }
}

#[derive(Debug)]
pub struct ConsumerWorkerPool;

impl ConsumerWorkerPool {
    /// Subscribe `config.workers` times and start one thread per subscription.
    ///
    /// Every subscription is opened before any thread starts; a failure there is
    /// returned and nothing is left running.
    pub fn spawn<B, H, E>(
        broker: &B,
        config: &ConsumerConfig,
        handler: H,
    ) -> Result<ConsumerPoolHandle, ConsumerError>
    where
        B: MessageBroker + ?Sized,
        H: Fn(StorageItem) -> Result<(), E> + Send + Sync + 'static,
        E: fmt::Display,
    {
        let subscriptions = (0..config.workers)
            .map(|worker| {
                let options = SubscribeOptions::new(
                    format!("{}-worker-{worker}", config.queue_name),
                    config.prefetch,
                )
                .with_ack_mode(config.ack_mode);
                broker
                    .subscribe(&config.queue_name, options)
                    .map_err(|source| ConsumerError::Subscribe { worker, source })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let stop = Arc::new(AtomicBool::new(false));
        let abandon = Arc::new(AtomicBool::new(false));
        let stats = Arc::new(ConsumerStats::default());
        let handler = Arc::new(handler);
        let mut workers = Vec::with_capacity(subscriptions.len());

        for (i, sub) in subscriptions.into_iter().enumerate() {
            let name = format!("liftride-consumer-{i}");
            let ctx = WorkerContext {
                name: name.clone(),
                stop: Arc::clone(&stop),
                abandon: Arc::clone(&abandon),
                stats: Arc::clone(&stats),
                tick: config.poll_interval,
            };
            let handler = Arc::clone(&handler);

            let spawned = thread::Builder::new()
                .name(name.clone())
                .spawn(move || worker_loop(ctx, sub, &*handler));
            match spawned {
                Ok(join) => workers.push((name, join)),
                Err(err) => {
                    stop.store(true, Ordering::SeqCst);
                    return Err(ConsumerError::Spawn(err));
                }
            }
        }

        info!(
            queue = %config.queue_name,
            workers = workers.len(),
            prefetch = config.prefetch,
            ack_mode = ?config.ack_mode,
            "consumer workers started"
        );

        Ok(ConsumerPoolHandle {
            stop,
            abandon,
            workers,
            stats,
        })
    }
}

struct WorkerContext {
    name: String,
    stop: Arc<AtomicBool>,
    abandon: Arc<AtomicBool>,
    stats: Arc<ConsumerStats>,
    tick: Duration,
}

fn worker_loop<H, E>(ctx: WorkerContext, sub: Subscription, handler: &H)
where
    H: Fn(StorageItem) -> Result<(), E>,
    E: fmt::Display,
{
    info!(worker = %ctx.name, "consumer worker started");

    while !ctx.stop.load(Ordering::SeqCst) {
        match sub.recv_timeout(ctx.tick) {
            Ok(delivery) => process(&ctx, handler, &sub, &delivery),
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => {
                info!(worker = %ctx.name, "subscription closed, consumer worker stopped");
                return;
            }
        }
    }

    sub.cancel();
    let mut drained = 0u64;
    while !ctx.abandon.load(Ordering::SeqCst) {
        match sub.recv_timeout(ctx.tick) {
            Ok(delivery) => {
                process(&ctx, handler, &sub, &delivery);
                drained += 1;
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    if ctx.abandon.load(Ordering::SeqCst) {
        warn!(worker = %ctx.name, drained, "shutdown deadline passed, abandoning buffered deliveries");
    }
    info!(worker = %ctx.name, drained, "consumer worker stopped");
}

fn process<H, E>(ctx: &WorkerContext, handler: &H, sub: &Subscription, delivery: &Delivery)
where
    H: Fn(StorageItem) -> Result<(), E>,
    E: fmt::Display,
{
    handle_delivery(ctx, handler, delivery);
    if let Err(err) = sub.ack(delivery) {
        warn!(worker = %ctx.name, delivery = %delivery.id, error = %err, "ack failed");
    }
}

fn handle_delivery<H, E>(ctx: &WorkerContext, handler: &H, delivery: &Delivery)
where
    H: Fn(StorageItem) -> Result<(), E>,
    E: fmt::Display,
{
    let item = match StorageItem::from_payload(&delivery.payload) {
        Ok(item) => item,
        Err(err) => {
            ctx.stats.dropped.fetch_add(1, Ordering::SeqCst);
            warn!(
                worker = %ctx.name,
                error = %err,
                payload = %String::from_utf8_lossy(&delivery.payload),
                "dropping undecodable message"
            );
            return;
        }
    };

    match handler(item) {
        Ok(()) => {
            ctx.stats.processed.fetch_add(1, Ordering::SeqCst);
        }
        Err(err) => {
            ctx.stats.failed.fetch_add(1, Ordering::SeqCst);
            warn!(worker = %ctx.name, error = %err, "consumer handler failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;
    use std::sync::Mutex;

    use liftride_queue::{InMemoryBroker, PublishChannel};

    const Q: &str = "rides";

    fn payload(skier: u32) -> Vec<u8> {
        format!(
            r#"{{"skierID":"{skier}","resortID":"1","liftID":"2","seasonID":"2024","dayID":"1","time":"3"}}"#
        )
        .into_bytes()
    }

    fn wait_until(mut cond: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !cond() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
    }

    fn config(workers: usize) -> ConsumerConfig {
        ConsumerConfig::new(Q, workers, 5).with_poll_interval(Duration::from_millis(20))
    }

    #[test]
    fn every_message_reaches_the_handler_once() {
        let broker = InMemoryBroker::new();
        broker.declare_queue(Q).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let s = Arc::clone(&seen);
        let handle = ConsumerWorkerPool::spawn(&broker, &config(4), move |item: StorageItem| {
            s.lock().unwrap().push(item.skier_id);
            Ok::<_, Infallible>(())
        })
        .unwrap();
        assert_eq!(handle.worker_count(), 4);

        let mut ch = broker.create_channel().unwrap();
        for skier in 1..=50 {
            ch.publish(Q, &payload(skier)).unwrap();
        }
        wait_until(|| handle.stats().processed() == 50);

        assert!(handle.shutdown(Duration::from_secs(2)));
        let mut seen = seen.lock().unwrap().clone();
        seen.sort_by_key(|s| s.parse::<u32>().unwrap());
        assert_eq!(seen, (1..=50).map(|s| s.to_string()).collect::<Vec<_>>());
    }

    #[test]
    fn undecodable_messages_are_dropped_and_worker_survives() {
        let broker = InMemoryBroker::new();
        broker.declare_queue(Q).unwrap();
        let handle =
            ConsumerWorkerPool::spawn(&broker, &config(1), |_item| Ok::<_, Infallible>(())).unwrap();

        let mut ch = broker.create_channel().unwrap();
        ch.publish(Q, b"not json").unwrap();
        ch.publish(Q, br#"{"skierID":"x","resortID":"1","liftID":"2","seasonID":"2024","dayID":"1","time":"3"}"#)
            .unwrap();
        ch.publish(Q, &payload(9)).unwrap();
        wait_until(|| handle.stats().processed() == 1);

        assert_eq!(handle.stats().dropped(), 2);
        assert_eq!(handle.stats().processed(), 1);
        assert!(handle.shutdown(Duration::from_secs(2)));
    }

    #[test]
    fn handler_errors_are_counted_not_fatal() {
        let broker = InMemoryBroker::new();
        broker.declare_queue(Q).unwrap();
        let handle = ConsumerWorkerPool::spawn(&broker, &config(1), |item: StorageItem| {
            if item.skier_id == "1" { Err("nope") } else { Ok(()) }
        })
        .unwrap();

        let mut ch = broker.create_channel().unwrap();
        ch.publish(Q, &payload(1)).unwrap();
        ch.publish(Q, &payload(2)).unwrap();
        wait_until(|| handle.stats().processed() + handle.stats().failed() == 2);

        assert_eq!(handle.stats().failed(), 1);
        assert!(handle.shutdown(Duration::from_secs(2)));
    }

    #[test]
    fn subscribe_failure_is_fatal() {
        let broker = InMemoryBroker::new();
        let err = ConsumerWorkerPool::spawn(&broker, &config(2), |_item| Ok::<_, Infallible>(()))
            .unwrap_err();
        assert!(matches!(
            err,
            ConsumerError::Subscribe { worker: 0, source: QueueError::QueueNotFound(_) }
        ));
    }

    #[test]
    fn stop_drains_deliveries_already_buffered() {
        let broker = InMemoryBroker::new();
        broker.declare_queue(Q).unwrap();
        let cfg = ConsumerConfig::new(Q, 1, 20).with_poll_interval(Duration::from_millis(20));
        let handle = ConsumerWorkerPool::spawn(&broker, &cfg, |_item| {
            thread::sleep(Duration::from_millis(5));
            Ok::<_, Infallible>(())
        })
        .unwrap();

        let mut ch = broker.create_channel().unwrap();
        for skier in 1..=100 {
            ch.publish(Q, &payload(skier)).unwrap();
        }
        wait_until(|| handle.stats().processed() >= 1 && broker.depth(Q) < 100 - 20);

        let stats = Arc::clone(handle.stats());
        assert!(handle.shutdown(Duration::from_secs(5)));
        assert!(stats.processed() >= 20, "processed {}", stats.processed());
        assert_eq!(stats.processed() as usize + broker.depth(Q), 100);
    }

    #[test]
    fn deadline_abandons_the_rest_of_the_buffer() {
        let broker = InMemoryBroker::new();
        broker.declare_queue(Q).unwrap();
        let cfg = ConsumerConfig::new(Q, 1, 50).with_poll_interval(Duration::from_millis(20));
        let handle = ConsumerWorkerPool::spawn(&broker, &cfg, |_item| {
            thread::sleep(Duration::from_millis(50));
            Ok::<_, Infallible>(())
        })
        .unwrap();

        let mut ch = broker.create_channel().unwrap();
        for skier in 1..=60 {
            ch.publish(Q, &payload(skier)).unwrap();
        }
        wait_until(|| handle.stats().processed() >= 1);

        let stats = Arc::clone(handle.stats());
        let started = Instant::now();
        assert!(!handle.shutdown(Duration::from_millis(100)));
        assert!(started.elapsed() < Duration::from_secs(1));

        // The detached worker finishes its current message and gives up.
        thread::sleep(Duration::from_millis(300));
        let settled = stats.processed();
        thread::sleep(Duration::from_millis(300));
        assert_eq!(stats.processed(), settled);
        assert!(settled < 50);
    }

    #[test]
    fn after_processing_mode_acks_every_delivery() {
        let broker = InMemoryBroker::new();
        broker.declare_queue(Q).unwrap();
        let cfg = ConsumerConfig::new(Q, 1, 1)
            .with_ack_mode(AckMode::AfterProcessing)
            .with_poll_interval(Duration::from_millis(20));
        let handle = ConsumerWorkerPool::spawn(&broker, &cfg, |_item| Ok::<_, Infallible>(())).unwrap();

        let mut ch = broker.create_channel().unwrap();
        for skier in 1..=10 {
            ch.publish(Q, &payload(skier)).unwrap();
        }
        // With prefetch 1, progress past the first message needs acks.
        wait_until(|| handle.stats().processed() == 10);
        assert_eq!(handle.stats().processed(), 10);
        assert!(handle.shutdown(Duration::from_secs(2)));
    }
}
