//! Infrastructure layer: the lift ride pipeline between the HTTP edge and storage.
//!
//! ```text
//! Ingestor → PublishChannelPool → broker → ConsumerWorkerPool → BatchWriteBuffer → StorageClient
//! ```

pub mod accounting;
pub mod batch_writer;
pub mod broker;
pub mod channel_pool;
pub mod config;
pub mod consumer;
pub mod ingress;
pub mod queries;
pub mod shutdown;
pub mod store;


pub use accounting::{ReporterHandle, SuccessAccounting, SuccessReporter};
pub use batch_writer::{BatchPolicy, BatchWriteBuffer, BrokerDeadLetterSink, DeadLetterSink, FlushOutcome};
pub use channel_pool::{PoolError, PooledChannel, PublishChannelPool};
pub use config::{ConfigError, PipelineConfig};
pub use consumer::{ConsumerConfig, ConsumerError, ConsumerPoolHandle, ConsumerStats, ConsumerWorkerPool};
pub use ingress::{IngestError, Ingestor};
pub use shutdown::{ShutdownCoordinator, ShutdownReport, shutdown_signal};
pub use store::{InMemoryRideStore, PostgresRideStore, StorageClient, StoreError};
