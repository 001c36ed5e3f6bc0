// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::env;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Deserializer};

use crate::errors::ConfigError;
use crate::overflow::OverflowAction;

pub const DEFAULT_BATCH_SIZE: usize = 100;
pub const DEFAULT_TIME_TO_SLEEP_BETWEEN_BATCHES: Duration = Duration::from_millis(50);
pub const DEFAULT_QUEUE_LIMIT: usize = 10_000;

const ENV_BATCH_SIZE: &str = "BATCH_SINK_BATCH_SIZE";
const ENV_TIME_TO_SLEEP_BETWEEN_BATCHES_MS: &str = "BATCH_SINK_TIME_TO_SLEEP_BETWEEN_BATCHES_MS";
const ENV_OVERFLOW_ACTION: &str = "BATCH_SINK_OVERFLOW_ACTION";
const ENV_QUEUE_LIMIT: &str = "BATCH_SINK_QUEUE_LIMIT";
const ENV_PARALLEL_WRITE: &str = "BATCH_SINK_PARALLEL_WRITE";

/// Configuration for a batch sink
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BatchSinkConfig {
    /// Maximum number of events handed to the downstream per drain pass
    pub batch_size: usize,
    /// Interval of the periodic drain trigger
    #[serde(
        rename = "time_to_sleep_between_batches_ms",
        deserialize_with = "deserialize_millis"
    )]
    pub time_to_sleep_between_batches: Duration,
    /// Admission policy once the queue holds `queue_limit` events
    pub overflow_action: OverflowAction,
    /// Capacity threshold used by `overflow_action`
    pub queue_limit: usize,
    /// Allow drain passes to overlap. Batches may then reach the downstream
    /// out of enqueue order.
    pub parallel_write: bool,
}

impl Default for BatchSinkConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            time_to_sleep_between_batches: DEFAULT_TIME_TO_SLEEP_BETWEEN_BATCHES,
            overflow_action: OverflowAction::default(),
            queue_limit: DEFAULT_QUEUE_LIMIT,
            parallel_write: false,
        }
    }
}

fn deserialize_millis<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    u64::deserialize(deserializer).map(Duration::from_millis)
}

fn parse_var<V: FromStr>(key: &str, raw: Option<String>) -> Result<Option<V>, ConfigError> {
    raw.map(|value| {
        value
            .trim()
            .parse::<V>()
            .map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                value,
            })
    })
    .transpose()
}

impl BatchSinkConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup, falling back to the
    /// defaults for missing keys.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let batch_size =
            parse_var(ENV_BATCH_SIZE, lookup(ENV_BATCH_SIZE))?.unwrap_or(defaults.batch_size);
        let time_to_sleep_between_batches = parse_var::<u64>(
            ENV_TIME_TO_SLEEP_BETWEEN_BATCHES_MS,
            lookup(ENV_TIME_TO_SLEEP_BETWEEN_BATCHES_MS),
        )?
        .map_or(defaults.time_to_sleep_between_batches, Duration::from_millis);
        let overflow_action = lookup(ENV_OVERFLOW_ACTION)
            .map(|value| value.parse::<OverflowAction>())
            .transpose()?
            .unwrap_or(defaults.overflow_action);
        let queue_limit =
            parse_var(ENV_QUEUE_LIMIT, lookup(ENV_QUEUE_LIMIT))?.unwrap_or(defaults.queue_limit);
        let parallel_write = lookup(ENV_PARALLEL_WRITE)
            .map(|val| val.trim().to_lowercase() == "true")
            .unwrap_or(defaults.parallel_write);

        let config = Self {
            batch_size,
            time_to_sleep_between_batches,
            overflow_action,
            queue_limit,
            parallel_write,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::InvalidBatchSize);
        }

        if self.queue_limit == 0 {
            return Err(ConfigError::InvalidQueueLimit);
        }

        if self.time_to_sleep_between_batches.is_zero() {
            return Err(ConfigError::InvalidInterval);
        }

        Ok(())
    }
}
