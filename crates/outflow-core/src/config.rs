// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration loading from environment variables.

use std::path::PathBuf;
use std::time::Duration;

use crate::executor::ExecutorConfig;
use crate::queue::QueueOptions;

/// Outflow configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the SQLite queue database
    pub database_path: PathBuf,
    /// Fungible-token contract batches are addressed to
    pub token_contract: String,
    /// Maximum transfers considered per scheduling pass
    pub batch_size: usize,
    /// Minimum wall time between passes, in milliseconds
    pub interval_ms: u64,
    /// Skip a pass when fewer candidates are available
    pub min_queue_to_process: usize,
    /// Retry budget before a transfer auto-stalls
    pub max_retries: u32,
    /// Chain-imposed upper bound on actions per transaction
    pub max_actions_per_transaction: usize,
    /// Merge same-receiver enqueues into one pending transfer
    pub coalesce: bool,
    /// Registration assumption for requests that don't specify one
    pub default_storage_deposit: bool,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - `OUTFLOW_TOKEN_CONTRACT`: fungible-token contract account
    ///
    /// Optional (with defaults):
    /// - `OUTFLOW_DATABASE_PATH`: queue database file (default: `.data/outflow.db`)
    /// - `OUTFLOW_BATCH_SIZE`: transfers per pass (default: 100)
    /// - `OUTFLOW_INTERVAL_MS`: pass interval in ms (default: 500)
    /// - `OUTFLOW_MIN_QUEUE_TO_PROCESS`: pass threshold (default: 1)
    /// - `OUTFLOW_MAX_RETRIES`: auto-stall retry budget (default: 5)
    /// - `OUTFLOW_MAX_ACTIONS_PER_TX`: action budget (default: 100)
    /// - `OUTFLOW_COALESCE`: merge same-receiver enqueues (default: true)
    /// - `OUTFLOW_DEFAULT_STORAGE_DEPOSIT`: registration assumption (default: false)
    pub fn from_env() -> Result<Self, ConfigError> {
        let token_contract = std::env::var("OUTFLOW_TOKEN_CONTRACT")
            .map_err(|_| ConfigError::Missing("OUTFLOW_TOKEN_CONTRACT"))?;

        let database_path = std::env::var("OUTFLOW_DATABASE_PATH")
            .unwrap_or_else(|_| ".data/outflow.db".to_string())
            .into();

        let batch_size: usize = std::env::var("OUTFLOW_BATCH_SIZE")
            .unwrap_or_else(|_| "100".to_string())
            .parse()
            .map_err(|_| ConfigError::Invalid("OUTFLOW_BATCH_SIZE", "must be a positive integer"))?;

        let interval_ms: u64 = std::env::var("OUTFLOW_INTERVAL_MS")
            .unwrap_or_else(|_| "500".to_string())
            .parse()
            .map_err(|_| {
                ConfigError::Invalid("OUTFLOW_INTERVAL_MS", "must be a duration in milliseconds")
            })?;

        let min_queue_to_process: usize = std::env::var("OUTFLOW_MIN_QUEUE_TO_PROCESS")
            .unwrap_or_else(|_| "1".to_string())
            .parse()
            .map_err(|_| {
                ConfigError::Invalid("OUTFLOW_MIN_QUEUE_TO_PROCESS", "must be a positive integer")
            })?;

        let max_retries: u32 = std::env::var("OUTFLOW_MAX_RETRIES")
            .unwrap_or_else(|_| "5".to_string())
            .parse()
            .map_err(|_| {
                ConfigError::Invalid("OUTFLOW_MAX_RETRIES", "must be a non-negative integer")
            })?;

        let max_actions_per_transaction: usize = std::env::var("OUTFLOW_MAX_ACTIONS_PER_TX")
            .unwrap_or_else(|_| "100".to_string())
            .parse()
            .map_err(|_| {
                ConfigError::Invalid("OUTFLOW_MAX_ACTIONS_PER_TX", "must be a positive integer")
            })?;

        let coalesce: bool = std::env::var("OUTFLOW_COALESCE")
            .unwrap_or_else(|_| "true".to_string())
            .parse()
            .map_err(|_| ConfigError::Invalid("OUTFLOW_COALESCE", "must be true or false"))?;

        let default_storage_deposit: bool = std::env::var("OUTFLOW_DEFAULT_STORAGE_DEPOSIT")
            .unwrap_or_else(|_| "false".to_string())
            .parse()
            .map_err(|_| {
                ConfigError::Invalid("OUTFLOW_DEFAULT_STORAGE_DEPOSIT", "must be true or false")
            })?;

        Ok(Self {
            database_path,
            token_contract,
            batch_size,
            interval_ms,
            min_queue_to_process,
            max_retries,
            max_actions_per_transaction,
            coalesce,
            default_storage_deposit,
        })
    }

    /// Project the executor's slice of the configuration.
    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            batch_size: self.batch_size,
            interval: Duration::from_millis(self.interval_ms),
            min_queue_to_process: self.min_queue_to_process,
            max_retries: self.max_retries,
            max_actions_per_transaction: self.max_actions_per_transaction,
            token_contract: self.token_contract.clone(),
        }
    }

    /// Project the queue's slice of the configuration.
    pub fn queue_options(&self) -> QueueOptions {
        QueueOptions {
            coalesce: self.coalesce,
            default_storage_deposit: self.default_storage_deposit,
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),

    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}
