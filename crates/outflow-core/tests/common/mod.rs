// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use sqlx::sqlite::SqlitePoolOptions;

use outflow_chain::mock::{MockBroadcaster, MockSigner};
use outflow_core::{
    Executor, ExecutorConfig, QueueOptions, SqliteStore, TransferQueue, TransferRequest,
    migrations,
};

/// Create an in-memory SQLite store with the schema applied.
pub async fn test_store() -> SqliteStore {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create in-memory SQLite pool");

    migrations::run_sqlite(&pool)
        .await
        .expect("Failed to run migrations");

    SqliteStore::new(pool)
}

/// Fully wired queue + executor over mocks.
pub struct Harness {
    pub store: SqliteStore,
    pub queue: TransferQueue,
    pub signer: Arc<MockSigner>,
    pub broadcaster: Arc<MockBroadcaster>,
    pub executor: Arc<Executor>,
}

/// Executor configuration suited to fast tests.
pub fn test_config() -> ExecutorConfig {
    ExecutorConfig {
        interval: Duration::from_millis(10),
        token_contract: "token.near".to_string(),
        ..Default::default()
    }
}

pub async fn harness(options: QueueOptions, config: ExecutorConfig) -> Harness {
    let store = test_store().await;
    let queue = TransferQueue::new(store.clone(), options);
    let signer = Arc::new(MockSigner::new());
    let broadcaster = Arc::new(MockBroadcaster::new());
    let executor = Arc::new(Executor::new(
        queue.clone(),
        signer.clone(),
        broadcaster.clone(),
        config,
    ));

    Harness {
        store,
        queue,
        signer,
        broadcaster,
        executor,
    }
}

/// A transfer request with an explicit registration flag.
pub fn request(receiver: &str, amount: &str, registered: bool) -> TransferRequest {
    TransferRequest {
        receiver: receiver.to_string(),
        amount: amount.to_string(),
        memo: None,
        has_storage_deposit: Some(registered),
    }
}

/// Count the actions inside a mock-signed blob.
pub fn actions_in_blob(blob: &[u8]) -> usize {
    let payload: serde_json::Value = serde_json::from_slice(blob).expect("mock blob is JSON");
    payload["actions"].as_array().expect("actions array").len()
}
