// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Outflow Core - Durable Transfer Queue and Batch Executor
//!
//! This crate is the submission pipeline for fungible-token transfers: it
//! persists each requested transfer, aggregates same-receiver work,
//! assembles batches under the chain's per-transaction action budget,
//! records the signed artifact durably before broadcast, and reconciles
//! the on-chain outcome against local state. All state lives in a local
//! SQLite database; on restart nothing else is required to resume.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                       External Clients                              │
//! │              (REST surface, validation - out of scope)              │
//! └─────────────────────────────────────────────────────────────────────┘
//!                │ enqueue / unstall / inspect
//!                ▼
//! ┌───────────────────────┐        peek / attach / settle
//! │     TransferQueue     │◄──────────────────────────────┐
//! │  (invariants, events) │                               │
//! └───────────┬───────────┘                   ┌───────────┴───────────┐
//!             │                               │       Executor        │
//!             ▼                               │  (single-writer loop) │
//! ┌───────────────────────┐                   └───────────┬───────────┘
//! │      SqliteStore      │                               │
//! │  (transfers, batches) │                     ┌─────────┴─────────┐
//! └───────────────────────┘                     ▼                   ▼
//!                                        ┌────────────┐     ┌───────────────┐
//!                                        │  TxSigner  │     │ TxBroadcaster │
//!                                        │ (capability│     │  (capability  │
//!                                        │  trait)    │     │   trait)      │
//!                                        └────────────┘     └───────────────┘
//! ```
//!
//! # Transfer state machine
//!
//! ```text
//!             enqueue
//!               │
//!               ▼
//!           PENDING  ◄─────────── batch recovered (non-terminal fail)
//!       (batch_id=NULL,
//!        is_stalled=0)
//!               │
//!      attach_batch (atomic)
//!               ▼
//!          PROCESSING
//!       (batch_id=B, B.status=processing)
//!               │
//!       ┌───────┼───────────────────────────────┐
//!       ▼       ▼                               ▼
//!   SUCCESS   STALLED                   (back to PENDING)
//!  (batch_id   (is_stalled=1)           retry_count += 1;
//!   retained,                           over the retry budget,
//!   B.status                            transitions to STALLED
//!  =success)
//! ```
//!
//! `SUCCESS` is terminal. `STALLED` is terminal until an operator unstalls
//! the transfer, which returns it to `PENDING`.
//!
//! # Durability ordering
//!
//! [`queue::TransferQueue::attach_batch`] commits the signed blob before
//! any broadcast is attempted. A crash after the commit is settled on next
//! start by resubmitting the recorded blob; the chain deduplicates signed
//! transactions by content, so a transfer never executes twice.
//!
//! # Single-writer discipline
//!
//! One executor process owns the queue. [`store::SqliteStore::from_path`]
//! takes an exclusive advisory lock next to the database file and refuses
//! to start when another owner holds it.
//!
//! # Configuration
//!
//! Configuration is loaded from environment variables:
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `OUTFLOW_TOKEN_CONTRACT` | Yes | - | Fungible-token contract account |
//! | `OUTFLOW_DATABASE_PATH` | No | `.data/outflow.db` | Queue database file |
//! | `OUTFLOW_BATCH_SIZE` | No | `100` | Transfers considered per pass |
//! | `OUTFLOW_INTERVAL_MS` | No | `500` | Minimum wall time between passes |
//! | `OUTFLOW_MIN_QUEUE_TO_PROCESS` | No | `1` | Skip a pass below this many candidates |
//! | `OUTFLOW_MAX_RETRIES` | No | `5` | Retry budget before auto-stall |
//! | `OUTFLOW_MAX_ACTIONS_PER_TX` | No | `100` | Chain action budget per transaction |
//! | `OUTFLOW_COALESCE` | No | `true` | Merge same-receiver enqueues |
//! | `OUTFLOW_DEFAULT_STORAGE_DEPOSIT` | No | `false` | Registration assumption |
//!
//! # Modules
//!
//! - [`config`]: Configuration from environment variables
//! - [`error`]: Error types
//! - [`events`]: Best-effort lifecycle events
//! - [`executor`]: The scheduling loop
//! - [`migrations`]: Embedded schema migrations
//! - [`queue`]: Invariant-preserving queue operations
//! - [`store`]: SQLite persistence

#![deny(missing_docs)]

/// Configuration loaded from environment variables.
pub mod config;

/// Error types for queue and executor operations.
pub mod error;

/// Best-effort lifecycle events for observability.
pub mod events;

/// The batch executor: scheduling loop and crash recovery.
pub mod executor;

/// Embedded SQLite schema migrations.
pub mod migrations;

/// The durable transfer queue.
pub mod queue;

/// SQLite persistence for transfers and batches.
pub mod store;

pub use config::{Config, ConfigError};
pub use error::{Error, Result};
pub use events::QueueEvent;
pub use executor::{Executor, ExecutorConfig};
pub use queue::{InFlightBatch, QueueOptions, TransferQueue, TransferRequest};
pub use store::{Batch, QueueStats, SqliteStore, Transfer, TransferFilter};
