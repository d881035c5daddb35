// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::errors::ConfigError;
use std::env;
use std::time::Duration;

pub const DEFAULT_WAIT_RETRY: Duration = Duration::from_secs(1);
pub const DEFAULT_MAX_WAIT_RETRY: Duration = Duration::from_secs(60);
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
/// Idle tick of the async publisher's ordered collector.
pub const DEFAULT_GC_TIMEOUT: Duration = Duration::from_secs(1);
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_QUEUE_SIZE: usize = 1;
pub const DEFAULT_RETRY_BACKLOG_WARN: usize = 1024;

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Configuration of the publisher and its worker pool
#[derive(Debug, Clone)]
pub struct Config {
    /// Use the async publisher (pipelined batches, ordered collection)
    pub publish_async: bool,
    /// Initial backoff delay of a worker
    pub wait_retry: Duration,
    /// Backoff delay cap
    pub max_wait_retry: Duration,
    /// Attempt budget of non-guaranteed messages, 0 for unlimited
    pub max_attempts: u32,
    pub gc_timeout: Duration,
    /// Connect timeout, also the per-attempt wait for queue capacity of
    /// non-guaranteed messages
    pub timeout: Duration,
    /// Number of endpoint clients, one worker each
    pub endpoint_count: usize,
    /// Capacity of the channel between publishers and workers
    pub queue_size: usize,
    /// Retry backlog depth above which a warning is emitted
    pub retry_backlog_warn: usize,
    /// Log level (e.g., trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            publish_async: false,
            wait_retry: DEFAULT_WAIT_RETRY,
            max_wait_retry: DEFAULT_MAX_WAIT_RETRY,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            gc_timeout: DEFAULT_GC_TIMEOUT,
            timeout: DEFAULT_TIMEOUT,
            endpoint_count: 1,
            queue_size: DEFAULT_QUEUE_SIZE,
            retry_backlog_warn: DEFAULT_RETRY_BACKLOG_WARN,
            log_level: "info".to_string(),
        }
    }
}

fn env_millis(name: &str, default: Duration) -> Duration {
    env::var(name)
        .ok()
        .and_then(|val| val.trim().parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(default)
}

fn env_number<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|val| val.trim().parse::<T>().ok())
        .unwrap_or(default)
}

impl Config {
    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let publish_async = env::var("LOG_PUBLISHER_ASYNC")
            .map(|val| val.to_lowercase() == "true")
            .unwrap_or(false);
        let log_level = env::var("LOG_PUBLISHER_LOG_LEVEL")
            .map(|val| val.to_lowercase())
            .unwrap_or_else(|_| "info".to_string());

        let config = Self {
            publish_async,
            wait_retry: env_millis("LOG_PUBLISHER_WAIT_RETRY_MS", DEFAULT_WAIT_RETRY),
            max_wait_retry: env_millis("LOG_PUBLISHER_MAX_WAIT_RETRY_MS", DEFAULT_MAX_WAIT_RETRY),
            max_attempts: env_number("LOG_PUBLISHER_MAX_ATTEMPTS", DEFAULT_MAX_ATTEMPTS),
            gc_timeout: env_millis("LOG_PUBLISHER_GC_TIMEOUT_MS", DEFAULT_GC_TIMEOUT),
            timeout: env_millis("LOG_PUBLISHER_TIMEOUT_MS", DEFAULT_TIMEOUT),
            endpoint_count: env_number("LOG_PUBLISHER_ENDPOINT_COUNT", 1),
            queue_size: env_number("LOG_PUBLISHER_QUEUE_SIZE", DEFAULT_QUEUE_SIZE),
            retry_backlog_warn: env_number(
                "LOG_PUBLISHER_RETRY_BACKLOG_WARN",
                DEFAULT_RETRY_BACKLOG_WARN,
            ),
            log_level,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let durations = [
            ("wait_retry", self.wait_retry),
            ("max_wait_retry", self.max_wait_retry),
            ("gc_timeout", self.gc_timeout),
            ("timeout", self.timeout),
        ];
        for (name, value) in durations {
            if value.is_zero() {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be greater than 0"
                )));
            }
        }

        if self.wait_retry > self.max_wait_retry {
            return Err(ConfigError::Invalid(format!(
                "wait_retry ({:?}) cannot exceed max_wait_retry ({:?})",
                self.wait_retry, self.max_wait_retry
            )));
        }

        if self.endpoint_count == 0 {
            return Err(ConfigError::Invalid(
                "endpoint_count must be greater than 0".to_string(),
            ));
        }

        if self.queue_size == 0 {
            return Err(ConfigError::Invalid(
                "queue_size must be greater than 0".to_string(),
            ));
        }

        if !VALID_LOG_LEVELS.contains(&self.log_level.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
                self.log_level
            )));
        }

        Ok(())
    }
}
