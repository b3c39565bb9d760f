use std::convert::Infallible;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;

use liftride_core::{RideEvent, RideValidator, StorageItem};
use liftride_infra::broker::{RedisChannel, RedisStreamsBroker};
use liftride_infra::{
    BatchWriteBuffer, BrokerDeadLetterSink, ConsumerPoolHandle, ConsumerWorkerPool, IngestError,
    Ingestor, InMemoryRideStore, PipelineConfig, PostgresRideStore, PublishChannelPool,
    ReporterHandle, ShutdownCoordinator, ShutdownReport, StorageClient, SuccessAccounting,
    SuccessReporter,
};
use liftride_queue::{InMemoryBroker, InMemoryChannel, MessageBroker};

/// Consumer side of the pipeline when it runs inside the API process.
struct InProcessConsumer {
    buffer: Arc<BatchWriteBuffer<Arc<InMemoryRideStore>>>,
    workers: ConsumerPoolHandle,
    reporter: ReporterHandle,
}

/// Everything the HTTP handlers need, in one of two deployment shapes.
///
/// Handlers call into these synchronously; run them on the blocking pool.
pub enum AppServices {
    /// In-memory broker and store with the consumer pool running in-process.
    InMemory {
        broker: InMemoryBroker,
        ingestor: Ingestor<InMemoryChannel>,
        store: Arc<InMemoryRideStore>,
        consumer: Mutex<Option<InProcessConsumer>>,
        shutdown_timeout: Duration,
    },
    /// Redis Streams for publishing, Postgres for reads. A separate
    /// `liftride-consumer` process drains the queue.
    Persistent {
        ingestor: Ingestor<RedisChannel>,
        store: Arc<PostgresRideStore>,
    },
}

impl std::fmt::Debug for AppServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AppServices::InMemory { .. } => f.write_str("AppServices::InMemory"),
            AppServices::Persistent { .. } => f.write_str("AppServices::Persistent"),
        }
    }
}

impl AppServices {
    pub fn ingest(&self, path: &str, body: &[u8]) -> Result<RideEvent, IngestError> {
        match self {
            AppServices::InMemory { ingestor, .. } => ingestor.ingest(path, body),
            AppServices::Persistent { ingestor, .. } => ingestor.ingest(path, body),
        }
    }

    pub fn validator(&self) -> &RideValidator {
        match self {
            AppServices::InMemory { ingestor, .. } => ingestor.validator(),
            AppServices::Persistent { ingestor, .. } => ingestor.validator(),
        }
    }

    pub fn store(&self) -> &dyn StorageClient {
        match self {
            AppServices::InMemory { store, .. } => store.as_ref(),
            AppServices::Persistent { store, .. } => store.as_ref(),
        }
    }

    /// The in-process broker, when there is one.
    pub fn in_memory_broker(&self) -> Option<&InMemoryBroker> {
        match self {
            AppServices::InMemory { broker, .. } => Some(broker),
            AppServices::Persistent { .. } => None,
        }
    }

    /// Close the publish pool and, in in-memory mode, drain the in-process
    /// consumer. Blocking; later calls return `None`.
    pub fn shutdown(&self) -> Option<ShutdownReport> {
        match self {
            AppServices::InMemory {
                ingestor,
                consumer,
                shutdown_timeout,
                ..
            } => {
                ingestor.pool().close();
                let consumer = consumer
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .take()?;
                Some(
                    ShutdownCoordinator::new(consumer.buffer, *shutdown_timeout)
                        .with_workers(consumer.workers)
                        .with_reporter(consumer.reporter)
                        .shutdown(),
                )
            }
            AppServices::Persistent { ingestor, .. } => {
                ingestor.pool().close();
                None
            }
        }
    }
}

pub async fn build_services(config: &PipelineConfig) -> anyhow::Result<AppServices> {
    if config.use_persistent_stores {
        tracing::info!(
            redis_url = %config.queue.redis_url,
            table = %config.store.table_name,
            "using persistent stores"
        );
        build_persistent_services(config).await
    } else {
        tracing::info!("using in-memory stores with an in-process consumer");
        build_in_memory_services(config)
    }
}

pub fn build_in_memory_services(config: &PipelineConfig) -> anyhow::Result<AppServices> {
    let queue = &config.queue;
    let broker = InMemoryBroker::new();
    broker.declare_queue(&queue.queue_name)?;

    let pool = PublishChannelPool::open(queue.channels, |_| broker.create_channel())?;
    let ingestor = Ingestor::new(config.validator(), Arc::new(pool), queue.queue_name.clone());

    let store = Arc::new(InMemoryRideStore::new());
    let accounting = Arc::new(SuccessAccounting::new());
    let mut buffer = BatchWriteBuffer::new(Arc::clone(&store), config.batch, Arc::clone(&accounting));
    if config.dead_letter {
        buffer = buffer.with_dead_letter_sink(dead_letter_sink(&broker, &queue.dead_letter_queue())?);
    }
    let buffer = Arc::new(buffer);

    let sink = Arc::clone(&buffer);
    let workers = ConsumerWorkerPool::spawn(&broker, &queue.consumer_config(), move |item: StorageItem| {
        sink.append(item);
        Ok::<_, Infallible>(())
    })?;
    let reporter = SuccessReporter::spawn(accounting, config.report_interval)?;

    Ok(AppServices::InMemory {
        broker,
        ingestor,
        store,
        consumer: Mutex::new(Some(InProcessConsumer {
            buffer,
            workers,
            reporter,
        })),
        shutdown_timeout: config.shutdown_timeout,
    })
}

async fn build_persistent_services(config: &PipelineConfig) -> anyhow::Result<AppServices> {
    let queue = &config.queue;
    let database_url = config
        .store
        .database_url
        .as_deref()
        .context("DATABASE_URL must be set when USE_PERSISTENT_STORES=true")?;

    let pool = PgPoolOptions::new()
        .max_connections(config.store.max_connections)
        .connect(database_url)
        .await
        .context("failed to connect to Postgres")?;
    let store = PostgresRideStore::on_current_runtime(pool, config.store.table_name.clone())?;

    let broker = RedisStreamsBroker::new(&queue.redis_url)?;
    let queue_name = queue.queue_name.clone();
    let channels = queue.channels;
    let channel_pool = tokio::task::spawn_blocking(move || {
        broker.ping()?;
        broker.declare_queue(&queue_name)?;
        PublishChannelPool::open(channels, |_| broker.create_channel())
    })
    .await??;

    Ok(AppServices::Persistent {
        ingestor: Ingestor::new(config.validator(), Arc::new(channel_pool), queue.queue_name.clone()),
        store: Arc::new(store),
    })
}

fn dead_letter_sink<B: MessageBroker>(
    broker: &B,
    queue: &str,
) -> anyhow::Result<BrokerDeadLetterSink<B::Channel>> {
    broker.declare_queue(queue)?;
    Ok(BrokerDeadLetterSink::new(broker.create_channel()?, queue))
}
