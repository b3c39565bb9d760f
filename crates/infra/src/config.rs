//! Pipeline configuration from environment variables.
//!
//! | Variable | Default |
//! |---|---|
//! | `USE_PERSISTENT_STORES` | `false` |
//! | `BIND_ADDR` | `0.0.0.0:8080` |
//! | `REDIS_URL` | `redis://localhost:6379` |
//! | `QUEUE_NAME` | `liftRideQueue` |
//! | `NUMBER_OF_CHANNEL` | `20` |
//! | `NUMBER_OF_THREAD` | `10` |
//! | `BASIC_QOS` | `50` |
//! | `ACK_BEFORE_WRITE` | `true` |
//! | `DATABASE_URL` | required when persistent |
//! | `TABLE_NAME` | `lift_ride_records` |
//! | `DB_MAX_CONNECTIONS` | `10` |
//! | `SEASON_ID` | `2024` |
//! | `BATCH_SIZE` | `25` |
//! | `RETRY_COUNT` | `5` |
//! | `BACKOFF_BASE_MS` | `60` |
//! | `DEAD_LETTER` | `false` |
//! | `REPORT_INTERVAL_MS` | `1000` |
//! | `SHUTDOWN_TIMEOUT_SECS` | `60` |

use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use liftride_core::validation::{DEFAULT_SEASON_ID, DEFAULT_VALID_DAYS};
use liftride_core::RideValidator;
use liftride_queue::AckMode;

use crate::batch_writer::BatchPolicy;
use crate::consumer::ConsumerConfig;
use crate::store::postgres::is_identifier;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{key} is required")]
    Missing { key: &'static str },

    #[error("invalid {key}=`{value}`: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: &'static str,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    pub redis_url: String,
    pub queue_name: String,
    pub channels: usize,
    pub workers: usize,
    pub prefetch: u16,
    pub ack_before_write: bool,
}

impl QueueConfig {
    pub fn dead_letter_queue(&self) -> String {
        format!("{}:dlq", self.queue_name)
    }

    pub fn consumer_config(&self) -> ConsumerConfig {
        ConsumerConfig::new(self.queue_name.clone(), self.workers, self.prefetch)
            .with_ack_mode(AckMode::from_ack_before_write(self.ack_before_write))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub database_url: Option<String>,
    pub table_name: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    pub use_persistent_stores: bool,
    pub bind_addr: String,
    pub season_id: String,
    pub queue: QueueConfig,
    pub store: StoreConfig,
    pub batch: BatchPolicy,
    pub dead_letter: bool,
    pub report_interval: Duration,
    pub shutdown_timeout: Duration,
}

impl PipelineConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unset keys take their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Lookup(lookup);

        let use_persistent_stores = env.flag("USE_PERSISTENT_STORES", false)?;
        let database_url = env.string("DATABASE_URL");
        if use_persistent_stores && database_url.is_none() {
            return Err(ConfigError::Missing { key: "DATABASE_URL" });
        }

        let table_name = env.string("TABLE_NAME").unwrap_or_else(|| "lift_ride_records".to_string());
        if !is_identifier(&table_name) {
            return Err(ConfigError::Invalid {
                key: "TABLE_NAME",
                value: table_name,
                reason: "must be a plain SQL identifier",
            });
        }

        let batch = BatchPolicy {
            batch_size: env.positive("BATCH_SIZE", 25)?,
            max_attempts: env.positive("RETRY_COUNT", 5)?,
            backoff_base: Duration::from_millis(env.number("BACKOFF_BASE_MS", 60)?),
        };

        Ok(Self {
            use_persistent_stores,
            bind_addr: env.string("BIND_ADDR").unwrap_or_else(|| "0.0.0.0:8080".to_string()),
            season_id: env
                .string("SEASON_ID")
                .unwrap_or_else(|| DEFAULT_SEASON_ID.to_string()),
            queue: QueueConfig {
                redis_url: env
                    .string("REDIS_URL")
                    .unwrap_or_else(|| "redis://localhost:6379".to_string()),
                queue_name: env
                    .string("QUEUE_NAME")
                    .unwrap_or_else(|| "liftRideQueue".to_string()),
                channels: env.positive("NUMBER_OF_CHANNEL", 20)?,
                workers: env.positive("NUMBER_OF_THREAD", 10)?,
                prefetch: env.positive("BASIC_QOS", 50)?,
                ack_before_write: env.flag("ACK_BEFORE_WRITE", true)?,
            },
            store: StoreConfig {
                database_url,
                table_name,
                max_connections: env.positive("DB_MAX_CONNECTIONS", 10)?,
            },
            batch,
            dead_letter: env.flag("DEAD_LETTER", false)?,
            report_interval: Duration::from_millis(env.positive("REPORT_INTERVAL_MS", 1000)?),
            shutdown_timeout: Duration::from_secs(env.number("SHUTDOWN_TIMEOUT_SECS", 60)?),
        })
    }

    /// Apply the consumer's positional `<numberOfThread> <basicQos>` overrides.
    pub fn with_consumer_args<I, S>(mut self, args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut args = args.into_iter();
        if let Some(workers) = args.next() {
            self.queue.workers = parse_positive("NUMBER_OF_THREAD", workers.as_ref())?;
        }
        if let Some(prefetch) = args.next() {
            self.queue.prefetch = parse_positive("BASIC_QOS", prefetch.as_ref())?;
        }
        Ok(self)
    }

    pub fn validator(&self) -> RideValidator {
        RideValidator::new(self.season_id.clone(), DEFAULT_VALID_DAYS)
    }
}

struct Lookup<F>(F);

impl<F: Fn(&str) -> Option<String>> Lookup<F> {
    fn string(&self, key: &str) -> Option<String> {
        (self.0)(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
    }

    fn number<T: FromStr>(&self, key: &'static str, default: T) -> Result<T, ConfigError> {
        match self.string(key) {
            None => Ok(default),
            Some(v) => v.parse().map_err(|_| ConfigError::Invalid {
                key,
                value: v,
                reason: "not a number",
            }),
        }
    }

    fn positive<T>(&self, key: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr + PartialOrd + Default,
    {
        match self.string(key) {
            None => Ok(default),
            Some(v) => parse_positive(key, &v),
        }
    }

    fn flag(&self, key: &'static str, default: bool) -> Result<bool, ConfigError> {
        match self.string(key).map(|v| v.to_ascii_lowercase()) {
            None => Ok(default),
            Some(v) => match v.as_str() {
                "1" | "true" | "yes" | "on" => Ok(true),
                "0" | "false" | "no" | "off" => Ok(false),
                _ => Err(ConfigError::Invalid {
                    key,
                    value: v.clone(),
                    reason: "expected true or false",
                }),
            },
        }
    }
}

fn parse_positive<T>(key: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr + PartialOrd + Default,
{
    let invalid = |reason| ConfigError::Invalid {
        key,
        value: value.to_string(),
        reason,
    };
    let n: T = value.trim().parse().map_err(|_| invalid("not a number"))?;
    if n <= T::default() {
        return Err(invalid("must be greater than zero"));
    }
    Ok(n)
}
