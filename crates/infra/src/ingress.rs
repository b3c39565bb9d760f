//! Ride ingestion: validate, encode, publish.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, instrument};

use liftride_core::{RideEvent, RideValidator, ValidationError, WireMessage};
use liftride_queue::{PublishChannel, QueueError};

use crate::channel_pool::{PoolError, PublishChannelPool};

#[derive(Debug, Error)]
pub enum IngestError {
    /// Client fault. Never retry.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// No publish channel could be obtained.
    #[error("publish channel unavailable: {0}")]
    Pool(#[from] PoolError),

    /// The broker rejected or never received the message. Safe to retry.
    #[error("publish failed: {0}")]
    Publish(#[from] QueueError),
}

impl IngestError {
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}

/// Turns raw ride requests into published queue messages.
#[derive(Debug)]
pub struct Ingestor<C> {
    validator: RideValidator,
    pool: Arc<PublishChannelPool<C>>,
    queue_name: String,
}

impl<C: PublishChannel> Ingestor<C> {
    pub fn new(
        validator: RideValidator,
        pool: Arc<PublishChannelPool<C>>,
        queue_name: impl Into<String>,
    ) -> Self {
        Self {
            validator,
            pool,
            queue_name: queue_name.into(),
        }
    }

    pub fn validator(&self) -> &RideValidator {
        &self.validator
    }

    pub fn pool(&self) -> &Arc<PublishChannelPool<C>> {
        &self.pool
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    /// Validate `path` + `body` and publish the ride. Nothing is published on a
    /// validation failure. Does not wait for any consumer.
    #[instrument(skip(self, body), fields(queue = %self.queue_name), err)]
    pub fn ingest(&self, path: &str, body: &[u8]) -> Result<RideEvent, IngestError> {
        let event = self.validator.validate(path, body)?;
        let payload = WireMessage::from(&event)
            .to_bytes()
            .map_err(|e| QueueError::Serialization(e.to_string()))?;

        let mut channel = self.pool.acquire()?;
        channel.publish(&self.queue_name, &payload)?;
        drop(channel);

        debug!(skier_id = event.skier_id, resort_id = event.resort_id, "ride published");
        Ok(event)
    }
}
