// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Crash-recovery and startup-ownership tests.

mod common;

use common::{harness, request, test_config};
use outflow_chain::{TxOutcome, content_hash};
use outflow_core::{Error, ExecutorConfig, QueueOptions, SqliteStore, TransferQueue};

fn no_coalesce() -> QueueOptions {
    QueueOptions {
        coalesce: false,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_crash_between_attach_and_broadcast_resolves_to_success() {
    let h = harness(no_coalesce(), test_config()).await;

    // Simulate the pre-crash half of a pass: enqueue, sign, attach. The
    // process "dies" before any broadcast happens.
    let id = h.queue.enqueue(request("r.near", "10", false)).await.unwrap();
    let blob = b"signed-before-crash".to_vec();
    let hash = content_hash(&blob);
    let batch_id = h.queue.attach_batch(&hash, &blob, &[id]).await.unwrap();

    // Restart: recovery runs inside start(), before the loop spawns.
    let handle = h.executor.clone().start().await.unwrap();

    // The recorded blob was resubmitted verbatim.
    let sent = h.broadcaster.sent().await;
    assert_eq!(sent, vec![blob]);

    // The transfer reached its terminal successful state, registration
    // included.
    let row = h.queue.get(id).await.unwrap().unwrap();
    assert_eq!(row.batch_id, Some(batch_id));
    assert!(row.has_storage_deposit);

    let batch = h.store.get_batch(batch_id).await.unwrap().unwrap();
    assert_eq!(batch.status, "success");
    assert!(batch.signed_tx.is_none());

    assert_eq!(h.queue.stats().await.unwrap().success, 1);

    h.executor.stop();
    handle.await.unwrap();
}

#[tokio::test]
async fn test_replay_applies_failure_dispatch() {
    let config = ExecutorConfig {
        max_retries: 0,
        ..test_config()
    };
    let h = harness(no_coalesce(), config).await;

    let id = h.queue.enqueue(request("r.near", "10", true)).await.unwrap();
    let blob = b"stale-signed-tx".to_vec();
    let batch_id = h
        .queue
        .attach_batch(&content_hash(&blob), &blob, &[id])
        .await
        .unwrap();

    // The chain already saw a newer nonce before the crash.
    h.broadcaster
        .push_outcome(Ok(TxOutcome::Invalid {
            kind: "InvalidNonce".to_string(),
        }))
        .await;

    let handle = h.executor.clone().start().await.unwrap();

    // With a zero retry budget, the replayed failure stalls the transfer.
    let row = h.queue.get(id).await.unwrap().unwrap();
    assert!(row.is_stalled);
    assert_eq!(row.retry_count, 1);
    assert!(h.store.get_batch(batch_id).await.unwrap().is_none());
    assert!(!h.queue.has_work().await.unwrap());

    h.executor.stop();
    handle.await.unwrap();
}

#[tokio::test]
async fn test_replay_transport_error_leaves_transfer_pending() {
    // A threshold the queue never reaches keeps the loop from scheduling,
    // so the post-recovery state stays observable.
    let config = ExecutorConfig {
        min_queue_to_process: 100,
        ..test_config()
    };
    let h = harness(no_coalesce(), config).await;

    let id = h.queue.enqueue(request("r.near", "10", true)).await.unwrap();
    let blob = b"unconfirmed-tx".to_vec();
    h.queue
        .attach_batch(&content_hash(&blob), &blob, &[id])
        .await
        .unwrap();

    h.broadcaster
        .push_outcome(Err(outflow_chain::TransportError(
            "still unreachable".to_string(),
        )))
        .await;

    let handle = h.executor.clone().start().await.unwrap();

    // The batch is recycled; the transfer is pending again and will be
    // retried by a later pass.
    let row = h.queue.get(id).await.unwrap().unwrap();
    assert!(row.batch_id.is_none());
    assert!(!row.is_stalled);
    assert_eq!(row.retry_count, 1);
    assert_eq!(h.store.count_batches().await.unwrap(), 0);

    h.executor.stop();
    handle.await.unwrap();
}

#[tokio::test]
async fn test_recovery_is_idempotent_across_restarts() {
    let h = harness(no_coalesce(), test_config()).await;

    let id = h.queue.enqueue(request("r.near", "10", true)).await.unwrap();
    let blob = b"signed-once".to_vec();
    h.queue
        .attach_batch(&content_hash(&blob), &blob, &[id])
        .await
        .unwrap();

    // First restart settles the batch.
    let handle = h.executor.clone().start().await.unwrap();
    h.executor.stop();
    handle.await.unwrap();
    assert_eq!(h.queue.stats().await.unwrap().success, 1);

    // A second restart finds nothing in flight and resubmits nothing.
    let handle = h.executor.clone().start().await.unwrap();
    h.executor.stop();
    handle.await.unwrap();

    assert_eq!(h.broadcaster.sent_count().await, 1);
    assert_eq!(h.queue.stats().await.unwrap().success, 1);
}

#[tokio::test]
async fn test_from_path_persists_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("queue/outflow.db");

    {
        let store = SqliteStore::from_path(&db_path).await.unwrap();
        let queue = TransferQueue::new(store, no_coalesce());
        queue.enqueue(request("r.near", "10", true)).await.unwrap();
    }

    let store = SqliteStore::from_path(&db_path).await.unwrap();
    let queue = TransferQueue::new(store, no_coalesce());
    assert_eq!(queue.stats().await.unwrap().total, 1);
    assert_eq!(queue.peek(10).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_second_owner_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("outflow.db");

    let _owner = SqliteStore::from_path(&db_path).await.unwrap();

    let result = SqliteStore::from_path(&db_path).await;
    assert!(matches!(result, Err(Error::QueueLocked(_))));
}
