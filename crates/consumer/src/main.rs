//! `liftride-consumer [numberOfThread] [basicQos]`
//!
//! Drains the ride queue into Postgres through the batch write buffer until
//! SIGTERM/SIGINT, then flushes whatever is still buffered.

use std::convert::Infallible;
use std::sync::Arc;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use tracing::info;

use liftride_core::StorageItem;
use liftride_infra::broker::RedisStreamsBroker;
use liftride_infra::{
    BatchWriteBuffer, BrokerDeadLetterSink, ConsumerWorkerPool, PipelineConfig, PostgresRideStore,
    ShutdownCoordinator, SuccessAccounting, SuccessReporter, shutdown_signal,
};
use liftride_queue::MessageBroker;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    liftride_observability::init();

    let config = PipelineConfig::from_env()
        .and_then(|c| c.with_consumer_args(std::env::args().skip(1)))
        .context("invalid configuration")?;
    info!(
        queue = %config.queue.queue_name,
        workers = config.queue.workers,
        prefetch = config.queue.prefetch,
        ack_before_write = config.queue.ack_before_write,
        batch_size = config.batch.batch_size,
        max_attempts = config.batch.max_attempts,
        backoff_base_ms = config.batch.backoff_base.as_millis() as u64,
        dead_letter = config.dead_letter,
        "starting lift ride consumer"
    );

    let database_url = config
        .store
        .database_url
        .clone()
        .context("DATABASE_URL must be set")?;
    let pool = PgPoolOptions::new()
        .max_connections(config.store.max_connections)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")?;
    let store = PostgresRideStore::on_current_runtime(pool, config.store.table_name.clone())?;
    store.ensure_schema().await.context("failed to prepare ride table")?;

    let accounting = Arc::new(SuccessAccounting::new());
    let broker = RedisStreamsBroker::new(&config.queue.redis_url)?;

    // Broker setup and worker threads block; keep them off the runtime.
    let setup = config.clone();
    let acc = Arc::clone(&accounting);
    let (buffer, workers) = tokio::task::spawn_blocking(move || -> anyhow::Result<_> {
        broker.ping().context("broker unreachable")?;
        broker.declare_queue(&setup.queue.queue_name)?;

        let mut buffer = BatchWriteBuffer::new(store, setup.batch, acc);
        if setup.dead_letter {
            let dlq = setup.queue.dead_letter_queue();
            broker.declare_queue(&dlq)?;
            info!(queue = %dlq, "dead-lettering exhausted rides");
            buffer = buffer.with_dead_letter_sink(BrokerDeadLetterSink::new(broker.create_channel()?, dlq));
        }
        let buffer = Arc::new(buffer);

        let sink = Arc::clone(&buffer);
        let workers = ConsumerWorkerPool::spawn(&broker, &setup.queue.consumer_config(), move |item: StorageItem| {
            sink.append(item);
            Ok::<_, Infallible>(())
        })?;
        Ok((buffer, workers))
    })
    .await??;

    let reporter = SuccessReporter::spawn(accounting, config.report_interval)?;

    shutdown_signal().await?;

    let timeout = config.shutdown_timeout;
    let report = tokio::task::spawn_blocking(move || {
        ShutdownCoordinator::new(buffer, timeout)
            .with_workers(workers)
            .with_reporter(reporter)
            .shutdown()
    })
    .await?;

    info!(
        committed = report.committed_total,
        workers_stopped = report.workers_stopped,
        reporter_stopped = report.reporter_stopped,
        "consumer stopped"
    );
    Ok(())
}
