//! Redis Streams-backed message broker.
//!
//! - **Queue**: one stream key per queue name
//! - **Consumer group**: one shared group, so workers compete for entries
//! - **Publish**: `XADD <queue> * payload <json>`
//! - **Immediate ack**: `XREADGROUP ... NOACK`, entries never enter the pending list
//! - **Ack after processing**: the worker's own pending entries are replayed
//!   first, then new entries are read and `XACK`ed once handled
//!
//! Each subscription runs a poll thread that feeds a prefetch-sized buffer. Reads
//! are gated on `ReadCredit`: at most `prefetch` entries are outstanding per
//! subscription, released when the worker takes them (`NOACK`) or acks them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, SyncSender};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;

use redis::ConnectionLike;
use tracing::{debug, instrument, warn};

use liftride_queue::{
    AckMode, Acknowledger, Delivery, MessageBroker, PublishChannel, QueueError, SubscribeOptions,
    Subscription,
};

/// Default consumer group shared by every worker.
pub const DEFAULT_GROUP: &str = "liftride-consumers";

const PAYLOAD_FIELD: &str = "payload";
const BLOCK_MS: u64 = 100;
const RECONNECT_DELAY: Duration = Duration::from_millis(500);
const CREDIT_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct RedisStreamsBroker {
    client: Arc<redis::Client>,
    group: String,
}

impl RedisStreamsBroker {
    pub fn new(redis_url: impl AsRef<str>) -> Result<Self, QueueError> {
        Self::with_group(redis_url, DEFAULT_GROUP)
    }

    pub fn with_group(redis_url: impl AsRef<str>, group: impl Into<String>) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| QueueError::Connection(e.to_string()))?;
        Ok(Self {
            client: Arc::new(client),
            group: group.into(),
        })
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    /// Round-trip a `PING` so startup fails fast when Redis is unreachable.
    pub fn ping(&self) -> Result<(), QueueError> {
        let mut conn = connect(&self.client)?;
        let _: String = redis::cmd("PING")
            .query(&mut conn)
            .map_err(|e| QueueError::Connection(e.to_string()))?;
        Ok(())
    }
}

impl MessageBroker for RedisStreamsBroker {
    type Channel = RedisChannel;

    /// `XGROUP CREATE <queue> <group> 0 MKSTREAM`; an existing group is fine.
    fn declare_queue(&self, queue: &str) -> Result<(), QueueError> {
        let mut conn = connect(&self.client)?;
        let created: redis::RedisResult<String> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(queue)
            .arg(&self.group)
            .arg("0")
            .arg("MKSTREAM")
            .query(&mut conn);

        match created {
            Ok(_) => Ok(()),
            Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
            Err(e) => Err(QueueError::Command(format!("XGROUP CREATE failed: {e}"))),
        }
    }

    fn create_channel(&self) -> Result<Self::Channel, QueueError> {
        Ok(RedisChannel {
            client: Arc::clone(&self.client),
            conn: Some(connect(&self.client)?),
        })
    }

    fn subscribe(&self, queue: &str, options: SubscribeOptions) -> Result<Subscription, QueueError> {
        self.declare_queue(queue)?;

        let (tx, rx) = mpsc::sync_channel(options.buffer_size());
        let cancelled = Arc::new(AtomicBool::new(false));
        let credit = Arc::new(ReadCredit::new(options.buffer_size()));
        let reader = StreamReader {
            client: Arc::clone(&self.client),
            queue: queue.to_string(),
            group: self.group.clone(),
            consumer: options.consumer_name.clone(),
            credit: Arc::clone(&credit),
            ack_mode: options.ack_mode,
        };
        let cancel = Arc::clone(&cancelled);

        thread::Builder::new()
            .name(format!("redis-poll-{}", options.consumer_name))
            .spawn(move || reader.run(tx, cancel))
            .map_err(|e| QueueError::Command(e.to_string()))?;

        let acker: Box<dyn Acknowledger> = match options.ack_mode {
            AckMode::Immediate => Box::new(ReleaseOnReceive(credit)),
            AckMode::AfterProcessing => Box::new(StreamAcker {
                client: Arc::clone(&self.client),
                queue: queue.to_string(),
                group: self.group.clone(),
                conn: Mutex::new(None),
                credit,
            }),
        };

        Ok(Subscription::new(rx, options.ack_mode, Some(acker), cancelled))
    }
}

/// Publish handle holding one Redis connection, re-established lazily after a failure.
pub struct RedisChannel {
    client: Arc<redis::Client>,
    conn: Option<redis::Connection>,
}

impl PublishChannel for RedisChannel {
    #[instrument(skip(self, payload), fields(bytes = payload.len()), err)]
    fn publish(&mut self, queue: &str, payload: &[u8]) -> Result<(), QueueError> {
        let mut conn = match self.conn.take() {
            Some(conn) => conn,
            None => connect(&self.client)?,
        };

        let added: redis::RedisResult<String> = redis::cmd("XADD")
            .arg(queue)
            .arg("*")
            .arg(PAYLOAD_FIELD)
            .arg(payload)
            .query(&mut conn);

        match added {
            Ok(_) => {
                self.conn = Some(conn);
                Ok(())
            }
            Err(e) => {
                // A broken connection is dropped and rebuilt on the next publish.
                if !(e.is_io_error() || e.is_connection_dropped()) {
                    self.conn = Some(conn);
                }
                Err(QueueError::Command(format!("XADD failed: {e}")))
            }
        }
    }

    fn is_open(&self) -> bool {
        self.conn.as_ref().is_some_and(|c| c.is_open())
    }
}

/// Outstanding entries a subscription holds: read from the stream but not yet
/// released by its worker.
#[derive(Debug)]
struct ReadCredit {
    outstanding: Mutex<usize>,
    freed: Condvar,
    limit: usize,
}

impl ReadCredit {
    fn new(limit: usize) -> Self {
        Self {
            outstanding: Mutex::new(0),
            freed: Condvar::new(),
            limit,
        }
    }

    /// How many entries may be read now, waiting up to `timeout` for at least one.
    fn available(&self, timeout: Duration) -> usize {
        let guard = self.outstanding.lock().unwrap_or_else(|p| p.into_inner());
        let (guard, _) = self
            .freed
            .wait_timeout_while(guard, timeout, |n| *n >= self.limit)
            .unwrap_or_else(|p| p.into_inner());
        self.limit.saturating_sub(*guard)
    }

    fn take(&self, n: usize) {
        let mut guard = self.outstanding.lock().unwrap_or_else(|p| p.into_inner());
        *guard += n;
    }

    fn release(&self, n: usize) {
        let mut guard = self.outstanding.lock().unwrap_or_else(|p| p.into_inner());
        *guard = guard.saturating_sub(n);
        self.freed.notify_one();
    }
}

/// `NOACK` subscriptions: an entry stops counting once the worker takes it.
struct ReleaseOnReceive(Arc<ReadCredit>);

impl Acknowledger for ReleaseOnReceive {
    fn ack(&self, _delivery_id: &str) -> Result<(), QueueError> {
        Ok(())
    }

    fn received(&self, _delivery_id: &str) {
        self.0.release(1);
    }
}

struct StreamAcker {
    client: Arc<redis::Client>,
    queue: String,
    group: String,
    conn: Mutex<Option<redis::Connection>>,
    credit: Arc<ReadCredit>,
}

impl Acknowledger for StreamAcker {
    fn ack(&self, delivery_id: &str) -> Result<(), QueueError> {
        // A failed XACK leaves the entry pending for replay; locally it is done.
        self.credit.release(1);
        let mut slot = self.conn.lock().unwrap_or_else(|p| p.into_inner());
        let mut conn = match slot.take() {
            Some(conn) => conn,
            None => connect(&self.client)?,
        };

        let acked: redis::RedisResult<u64> = redis::cmd("XACK")
            .arg(&self.queue)
            .arg(&self.group)
            .arg(delivery_id)
            .query(&mut conn);

        match acked {
            Ok(_) => {
                *slot = Some(conn);
                Ok(())
            }
            Err(e) => Err(QueueError::Command(format!("XACK failed: {e}"))),
        }
    }
}

struct StreamReader {
    client: Arc<redis::Client>,
    queue: String,
    group: String,
    consumer: String,
    credit: Arc<ReadCredit>,
    ack_mode: AckMode,
}

impl StreamReader {
    fn run(self, tx: SyncSender<Delivery>, cancelled: Arc<AtomicBool>) {
        let mut conn: Option<redis::Connection> = None;
        // Replay entries this consumer took but never acknowledged, walking
        // forward from the last replayed id until the pending list is exhausted.
        let mut replay_from: Option<String> =
            (self.ack_mode == AckMode::AfterProcessing).then(|| "0".to_string());

        while !cancelled.load(Ordering::SeqCst) {
            let count = self.credit.available(CREDIT_POLL);
            if count == 0 {
                continue;
            }

            let mut c = match conn.take() {
                Some(c) => c,
                None => match connect(&self.client) {
                    Ok(c) => c,
                    Err(err) => {
                        warn!(consumer = %self.consumer, error = %err, "redis reconnect failed");
                        thread::sleep(RECONNECT_DELAY);
                        continue;
                    }
                },
            };

            let start = replay_from.as_deref().unwrap_or(">");
            let deliveries = match self.read(&mut c, start, count) {
                Ok(d) => d,
                Err(err) => {
                    warn!(consumer = %self.consumer, error = %err, "XREADGROUP failed");
                    thread::sleep(RECONNECT_DELAY);
                    continue;
                }
            };
            conn = Some(c);
            if replay_from.is_some() {
                replay_from = deliveries.last().map(|d| d.id.clone());
            }

            // Entries already read are handed over even after cancellation; the
            // worker drains them before it exits.
            self.credit.take(deliveries.len());
            for delivery in deliveries {
                if tx.send(delivery).is_err() {
                    debug!(consumer = %self.consumer, "subscription dropped, poll thread exiting");
                    return;
                }
            }
        }
    }

    fn read(
        &self,
        conn: &mut redis::Connection,
        start: &str,
        count: usize,
    ) -> Result<Vec<Delivery>, QueueError> {
        let mut cmd = redis::cmd("XREADGROUP");
        cmd.arg("GROUP")
            .arg(&self.group)
            .arg(&self.consumer)
            .arg("COUNT")
            .arg(count);
        if start == ">" {
            cmd.arg("BLOCK").arg(BLOCK_MS);
        }
        if self.ack_mode == AckMode::Immediate {
            cmd.arg("NOACK");
        }
        cmd.arg("STREAMS").arg(&self.queue).arg(start);

        let reply: redis::Value = cmd
            .query(conn)
            .map_err(|e| QueueError::Command(e.to_string()))?;
        parse_read_reply(reply)
    }
}

fn connect(client: &redis::Client) -> Result<redis::Connection, QueueError> {
    client
        .get_connection()
        .map_err(|e| QueueError::Connection(e.to_string()))
}

/// Parse an `XREADGROUP` reply:
/// `[[stream, [[id, [field, value, ...]], ...]]]`, or nil on block timeout.
fn parse_read_reply(reply: redis::Value) -> Result<Vec<Delivery>, QueueError> {
    let streams = match reply {
        redis::Value::Nil => return Ok(Vec::new()),
        redis::Value::Bulk(streams) => streams,
        other => return Err(malformed(format!("unexpected reply {other:?}"))),
    };

    let mut deliveries = Vec::new();
    for stream in streams {
        let redis::Value::Bulk(mut parts) = stream else {
            return Err(malformed("stream entry is not an array"));
        };
        if parts.len() != 2 {
            return Err(malformed("stream entry is not [name, entries]"));
        }
        let entries = match parts.pop() {
            Some(redis::Value::Bulk(entries)) => entries,
            Some(redis::Value::Nil) | None => continue,
            Some(other) => return Err(malformed(format!("unexpected entries {other:?}"))),
        };
        for entry in entries {
            deliveries.push(parse_entry(entry)?);
        }
    }
    Ok(deliveries)
}

/// `[id, [field, value, ...]]`. Entries deleted while pending come back with nil fields.
fn parse_entry(entry: redis::Value) -> Result<Delivery, QueueError> {
    let redis::Value::Bulk(parts) = entry else {
        return Err(malformed("entry is not an array"));
    };
    let mut parts = parts.into_iter();

    let id = match parts.next() {
        Some(redis::Value::Data(id)) => String::from_utf8_lossy(&id).into_owned(),
        Some(redis::Value::Status(id)) => id,
        _ => return Err(malformed("entry id missing")),
    };

    let fields = match parts.next() {
        Some(redis::Value::Bulk(fields)) => fields,
        _ => Vec::new(),
    };

    let mut payload = Vec::new();
    for pair in fields.chunks(2) {
        if let [redis::Value::Data(key), redis::Value::Data(value)] = pair {
            if key.as_slice() == PAYLOAD_FIELD.as_bytes() {
                payload = value.clone();
            }
        }
    }

    Ok(Delivery { id, payload })
}

fn malformed(reason: impl Into<String>) -> QueueError {
    QueueError::Command(format!("malformed XREADGROUP reply: {}", reason.into()))
}
