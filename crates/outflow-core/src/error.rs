// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for outflow-core.

use thiserror::Error;

/// Core errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The amount string is not a non-negative integer.
    #[error("invalid amount '{0}': expected a non-negative integer string")]
    InvalidAmount(String),

    /// Transfer was not found.
    #[error("transfer {0} not found")]
    TransferNotFound(i64),

    /// Batch was not found.
    #[error("batch {0} not found")]
    BatchNotFound(i64),

    /// Another process holds the queue's advisory lock.
    #[error("queue database is locked by another process: {0}")]
    QueueLocked(String),

    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Schema migration failed.
    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The signer refused to produce a transaction.
    #[error("Signer error: {0}")]
    Sign(#[from] outflow_chain::SignError),
}

/// Result type using the core Error.
pub type Result<T> = std::result::Result<T, Error>;
