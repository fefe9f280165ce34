// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Invariant-preserving operations over the transfer store.
//!
//! The queue is the only mutation surface for transfers and batches.
//! Clients enqueue through it, the executor claims and settles batches
//! through it, and operators unstall through it. Lifecycle events are
//! emitted after the backing store transaction commits, so subscribers can
//! never observe uncommitted state.

use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::events::{EventBus, QueueEvent};
use crate::store::{Batch, QueueStats, SqliteStore, Transfer, TransferFilter};

/// One client transfer request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferRequest {
    /// Recipient account identifier.
    pub receiver: String,
    /// Amount in the smallest on-chain unit, as a decimal string.
    pub amount: String,
    /// Optional transfer memo.
    #[serde(default)]
    pub memo: Option<String>,
    /// Whether the receiver is already storage-registered. Defaults to the
    /// queue's configured assumption when unspecified.
    #[serde(default)]
    pub has_storage_deposit: Option<bool>,
}

/// Per-queue configuration.
#[derive(Debug, Clone)]
pub struct QueueOptions {
    /// Merge a new enqueue into the receiver's single pending transfer by
    /// summing amounts. Trades strict arrival order for gas amortization;
    /// the economic effect is unchanged because amounts commute.
    pub coalesce: bool,
    /// Registration assumption for requests that don't specify one.
    pub default_storage_deposit: bool,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            coalesce: true,
            default_storage_deposit: false,
        }
    }
}

/// A batch that was signed and recorded but not yet confirmed, together
/// with the transfers it owns. Produced by [`TransferQueue::replay_in_flight`]
/// at startup.
#[derive(Debug, Clone)]
pub struct InFlightBatch {
    /// The recorded batch; `signed_tx` is always present.
    pub batch: Batch,
    /// Member transfers, FIFO by id.
    pub transfers: Vec<Transfer>,
}

/// Durable transfer queue.
#[derive(Clone)]
pub struct TransferQueue {
    store: SqliteStore,
    options: QueueOptions,
    events: EventBus,
}

impl TransferQueue {
    /// Fallback failure text when a batch is recycled without a chain
    /// error attached.
    const DEFAULT_FAILURE: &'static str = "batch failed";

    /// Create a queue over an initialized store.
    pub fn new(store: SqliteStore, options: QueueOptions) -> Self {
        Self {
            store,
            options,
            events: EventBus::new(),
        }
    }

    /// Subscribe to lifecycle events emitted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.events.subscribe()
    }

    pub(crate) fn events(&self) -> &EventBus {
        &self.events
    }

    /// Enqueue a transfer request.
    ///
    /// With coalescing enabled, a request for a receiver that already has a
    /// pending transfer is absorbed into it: amounts are summed with
    /// arbitrary precision, memo and registration flag are overwritten.
    /// Returns the id of the stored (possibly pre-existing) transfer.
    pub async fn enqueue(&self, request: TransferRequest) -> Result<i64> {
        let amount = parse_amount(&request.amount)?;
        let has_storage_deposit = request
            .has_storage_deposit
            .unwrap_or(self.options.default_storage_deposit);

        let (transfer, merged) = self
            .store
            .enqueue_transfer(
                &request.receiver,
                &amount,
                request.memo.as_deref(),
                has_storage_deposit,
                self.options.coalesce,
            )
            .await?;

        debug!(
            transfer_id = transfer.id,
            receiver = %transfer.receiver,
            amount = %transfer.amount,
            merged,
            "Transfer enqueued"
        );

        let id = transfer.id;
        self.events.emit(QueueEvent::Pushed { transfer });
        Ok(id)
    }

    /// Up to `limit` pending transfers, FIFO by id. Read-only: claiming
    /// happens in [`Self::attach_batch`].
    pub async fn peek(&self, limit: i64) -> Result<Vec<Transfer>> {
        let transfers = self.store.list_pending(limit.max(0)).await?;

        if !transfers.is_empty() {
            self.events.emit(QueueEvent::Peeked {
                transfer_ids: transfers.iter().map(|t| t.id).collect(),
            });
        }

        Ok(transfers)
    }

    /// Record a signed batch and claim its transfers, atomically.
    ///
    /// This is the durability barrier: the signed artifact exists in the
    /// store before any broadcast is attempted.
    pub async fn attach_batch(
        &self,
        tx_hash: &str,
        signed_tx: &[u8],
        transfer_ids: &[i64],
    ) -> Result<i64> {
        let batch_id = self
            .store
            .create_batch(tx_hash, signed_tx, transfer_ids)
            .await?;

        debug!(batch_id, transfers = transfer_ids.len(), tx_hash, "Batch attached");
        Ok(batch_id)
    }

    /// Confirm a batch on-chain; its transfers reach their terminal
    /// successful state and are marked storage-registered.
    pub async fn mark_batch_success(&self, batch_id: i64, tx_hash: &str) -> Result<()> {
        let members = self.store.mark_batch_success(batch_id, tx_hash).await?;

        info!(batch_id, transfers = members.len(), tx_hash, "Batch succeeded");

        for transfer in members {
            self.events.emit(QueueEvent::Success {
                transfer,
                tx_hash: tx_hash.to_string(),
            });
        }

        Ok(())
    }

    /// Recycle a failed batch: delete the batch row and return every
    /// member to pending with `retry_count` incremented. When
    /// `max_retries` is given, members whose new count exceeds it stall in
    /// the same transaction.
    pub async fn recover_failed_batch(
        &self,
        batch_id: i64,
        error_message: Option<&str>,
        max_retries: Option<u32>,
    ) -> Result<()> {
        let members = self
            .store
            .release_batch(batch_id, error_message, max_retries.map(i64::from), true)
            .await?;

        let error = error_message.unwrap_or(Self::DEFAULT_FAILURE);
        info!(
            batch_id,
            transfers = members.len(),
            error,
            "Batch recovered"
        );

        for transfer in members {
            self.events.emit(QueueEvent::Failed {
                transfer,
                error: error.to_string(),
            });
        }

        Ok(())
    }

    /// Recycle a failed batch without penalizing its members.
    ///
    /// Used after an action-indexed failure: the offender has already been
    /// stalled via [`Self::mark_stalled`], and its siblings retry cleanly
    /// with no retry-count increment and no error attached.
    pub async fn release_failed_batch(&self, batch_id: i64) -> Result<()> {
        let members = self.store.release_batch(batch_id, None, None, false).await?;

        info!(batch_id, transfers = members.len(), "Batch released");

        for transfer in members {
            self.events.emit(QueueEvent::Failed {
                transfer,
                error: Self::DEFAULT_FAILURE.to_string(),
            });
        }

        Ok(())
    }

    /// Penalize transfers that never reached a batch (the signer refused).
    /// Same retry accounting as [`Self::recover_failed_batch`].
    pub async fn fail_transfers(
        &self,
        transfer_ids: &[i64],
        error_message: &str,
        max_retries: Option<u32>,
    ) -> Result<()> {
        let members = self
            .store
            .penalize_transfers(transfer_ids, error_message, max_retries.map(i64::from))
            .await?;

        for transfer in members {
            self.events.emit(QueueEvent::Failed {
                transfer,
                error: error_message.to_string(),
            });
        }

        Ok(())
    }

    /// Hide a transfer from the scheduler until operator action.
    pub async fn mark_stalled(&self, transfer_id: i64, error_message: &str) -> Result<()> {
        self.store.mark_stalled(transfer_id, error_message).await
    }

    /// Return a stalled transfer to pending. False if it wasn't stalled.
    pub async fn unstall(&self, transfer_id: i64) -> Result<bool> {
        Ok(self.store.unstall(&[transfer_id]).await? > 0)
    }

    /// Return several stalled transfers to pending; counts only those that
    /// were actually stalled.
    pub async fn unstall_many(&self, transfer_ids: &[i64]) -> Result<u64> {
        self.store.unstall(transfer_ids).await
    }

    /// Return every stalled transfer to pending.
    pub async fn unstall_all(&self) -> Result<u64> {
        self.store.unstall_all().await
    }

    /// Every batch recorded as in flight, with its transfers. Used at
    /// startup to resubmit signed transactions whose outcome is unknown.
    pub async fn replay_in_flight(&self) -> Result<Vec<InFlightBatch>> {
        let batches = self.store.in_flight_batches().await?;

        let mut entries = Vec::with_capacity(batches.len());
        for batch in batches {
            let transfers = self.store.transfers_in_batch(batch.id).await?;
            entries.push(InFlightBatch { batch, transfers });
        }

        Ok(entries)
    }

    /// Startup sweep: detach transfers from non-succeeded batches and
    /// delete those batches. Run after in-flight replay has settled
    /// everything it could.
    pub async fn recover(&self) -> Result<()> {
        let (transfers, batches) = self.store.reset_orphans().await?;

        if transfers > 0 || batches > 0 {
            info!(transfers, batches, "Recovered orphaned batch state");
        }

        Ok(())
    }

    /// Queue-level counters.
    pub async fn stats(&self) -> Result<QueueStats> {
        self.store.stats().await
    }

    /// Whether any transfer is pending or any batch is in flight.
    pub async fn has_work(&self) -> Result<bool> {
        self.store.has_work().await
    }

    /// Get a transfer by id.
    pub async fn get(&self, transfer_id: i64) -> Result<Option<Transfer>> {
        self.store.get_transfer(transfer_id).await
    }

    /// List transfers filtered by receiver and/or stalled state.
    pub async fn list(&self, filter: &TransferFilter) -> Result<Vec<Transfer>> {
        self.store.list_transfers(filter).await
    }
}

/// Validate and parse a decimal amount string.
fn parse_amount(amount: &str) -> Result<BigUint> {
    if amount.is_empty() || !amount.bytes().all(|b| b.is_ascii_digit()) {
        return Err(Error::InvalidAmount(amount.to_string()));
    }

    amount
        .parse()
        .map_err(|_| Error::InvalidAmount(amount.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrations;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn test_queue(options: QueueOptions) -> TransferQueue {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("Failed to create in-memory SQLite pool");

        migrations::run_sqlite(&pool)
            .await
            .expect("Failed to run migrations");

        TransferQueue::new(SqliteStore::new(pool), options)
    }

    fn request(receiver: &str, amount: &str) -> TransferRequest {
        TransferRequest {
            receiver: receiver.to_string(),
            amount: amount.to_string(),
            memo: None,
            has_storage_deposit: None,
        }
    }

    #[test]
    fn test_parse_amount() {
        assert!(parse_amount("0").is_ok());
        assert!(parse_amount("340282366920938463463374607431768211456").is_ok());
        assert!(parse_amount("").is_err());
        assert!(parse_amount("-1").is_err());
        assert!(parse_amount("1.5").is_err());
        assert!(parse_amount("10 ").is_err());
        assert!(parse_amount("1e9").is_err());
    }

    #[tokio::test]
    async fn test_enqueue_rejects_invalid_amount() {
        let queue = test_queue(QueueOptions::default()).await;

        let result = queue.enqueue(request("alice.near", "12x")).await;
        assert!(matches!(result, Err(Error::InvalidAmount(_))));
        assert_eq!(queue.stats().await.unwrap().total, 0);
    }

    #[tokio::test]
    async fn test_enqueue_accepts_zero() {
        let queue = test_queue(QueueOptions::default()).await;

        let id = queue.enqueue(request("alice.near", "0")).await.unwrap();
        let row = queue.get(id).await.unwrap().unwrap();
        assert_eq!(row.amount, "0");
    }

    #[tokio::test]
    async fn test_enqueue_coalesces_and_emits() {
        let queue = test_queue(QueueOptions::default()).await;
        let mut events = queue.subscribe();

        let first = queue.enqueue(request("alice.near", "100")).await.unwrap();
        let second = queue.enqueue(request("alice.near", "200")).await.unwrap();
        assert_eq!(first, second);

        let row = queue.get(first).await.unwrap().unwrap();
        assert_eq!(row.amount, "300");

        for expected in ["100", "300"] {
            match events.recv().await.unwrap() {
                QueueEvent::Pushed { transfer } => assert_eq!(transfer.amount, expected),
                other => panic!("unexpected event: {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_enqueue_applies_default_storage_deposit() {
        let queue = test_queue(QueueOptions {
            coalesce: false,
            default_storage_deposit: true,
        })
        .await;

        let defaulted = queue.enqueue(request("a.near", "1")).await.unwrap();
        assert!(queue.get(defaulted).await.unwrap().unwrap().has_storage_deposit);

        let explicit = queue
            .enqueue(TransferRequest {
                has_storage_deposit: Some(false),
                ..request("b.near", "1")
            })
            .await
            .unwrap();
        assert!(!queue.get(explicit).await.unwrap().unwrap().has_storage_deposit);
    }

    #[tokio::test]
    async fn test_coalescing_disabled_preserves_fifo_rows() {
        let queue = test_queue(QueueOptions {
            coalesce: false,
            ..Default::default()
        })
        .await;

        queue.enqueue(request("alice.near", "100")).await.unwrap();
        queue.enqueue(request("alice.near", "200")).await.unwrap();

        let pending = queue.peek(10).await.unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].amount, "100");
        assert_eq!(pending[1].amount, "200");
    }

    #[tokio::test]
    async fn test_peek_zero_and_events() {
        let queue = test_queue(QueueOptions::default()).await;
        let mut events = queue.subscribe();

        // Empty peeks emit nothing.
        assert!(queue.peek(0).await.unwrap().is_empty());
        assert!(queue.peek(10).await.unwrap().is_empty());

        let id = queue.enqueue(request("alice.near", "5")).await.unwrap();
        assert!(queue.peek(0).await.unwrap().is_empty());
        assert_eq!(queue.peek(10).await.unwrap().len(), 1);

        // Pushed, then the single non-empty Peeked.
        assert!(matches!(
            events.recv().await.unwrap(),
            QueueEvent::Pushed { .. }
        ));
        match events.recv().await.unwrap() {
            QueueEvent::Peeked { transfer_ids } => assert_eq!(transfer_ids, vec![id]),
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_attach_and_recover_round_trip() {
        let queue = test_queue(QueueOptions::default()).await;

        let id = queue.enqueue(request("alice.near", "100")).await.unwrap();
        let before = queue.get(id).await.unwrap().unwrap();

        let batch_id = queue.attach_batch("hash", b"blob", &[id]).await.unwrap();
        assert!(queue.peek(10).await.unwrap().is_empty());

        queue
            .recover_failed_batch(batch_id, Some("nonce error"), Some(5))
            .await
            .unwrap();

        let after = queue.get(id).await.unwrap().unwrap();
        assert!(after.batch_id.is_none());
        assert_eq!(after.retry_count, before.retry_count + 1);
        assert_eq!(after.amount, before.amount);
        assert!(!after.is_stalled);
        assert_eq!(queue.peek(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_success_emits_per_transfer() {
        let queue = test_queue(QueueOptions {
            coalesce: false,
            ..Default::default()
        })
        .await;

        let a = queue.enqueue(request("a.near", "1")).await.unwrap();
        let b = queue.enqueue(request("b.near", "2")).await.unwrap();
        let batch_id = queue.attach_batch("hash", b"blob", &[a, b]).await.unwrap();

        let mut events = queue.subscribe();
        queue.mark_batch_success(batch_id, "chain-hash").await.unwrap();

        for expected in [a, b] {
            match events.recv().await.unwrap() {
                QueueEvent::Success { transfer, tx_hash } => {
                    assert_eq!(transfer.id, expected);
                    assert!(transfer.has_storage_deposit);
                    assert_eq!(tx_hash, "chain-hash");
                }
                other => panic!("unexpected event: {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_release_failed_batch_is_penalty_free() {
        let queue = test_queue(QueueOptions {
            coalesce: false,
            ..Default::default()
        })
        .await;

        let a = queue.enqueue(request("a.near", "1")).await.unwrap();
        let b = queue.enqueue(request("b.near", "2")).await.unwrap();
        let batch_id = queue.attach_batch("hash", b"blob", &[a, b]).await.unwrap();

        queue.mark_stalled(a, "ReceiverNotRegistered").await.unwrap();
        queue.release_failed_batch(batch_id).await.unwrap();

        let offender = queue.get(a).await.unwrap().unwrap();
        assert!(offender.is_stalled);
        assert_eq!(offender.retry_count, 0);
        assert_eq!(
            offender.error_message,
            Some("ReceiverNotRegistered".to_string())
        );

        let sibling = queue.get(b).await.unwrap().unwrap();
        assert!(!sibling.is_stalled);
        assert_eq!(sibling.retry_count, 0);
        assert!(sibling.error_message.is_none());

        let pending = queue.peek(10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, b);
    }

    #[tokio::test]
    async fn test_fail_transfers_penalizes_unattached() {
        let queue = test_queue(QueueOptions {
            coalesce: false,
            ..Default::default()
        })
        .await;

        let a = queue.enqueue(request("a.near", "1")).await.unwrap();

        queue
            .fail_transfers(&[a], "signer offline", Some(0))
            .await
            .unwrap();

        let row = queue.get(a).await.unwrap().unwrap();
        assert_eq!(row.retry_count, 1);
        assert!(row.is_stalled);
        assert_eq!(row.error_message, Some("signer offline".to_string()));
    }

    #[tokio::test]
    async fn test_unstall_round_trip() {
        let queue = test_queue(QueueOptions::default()).await;

        let id = queue.enqueue(request("alice.near", "1")).await.unwrap();
        queue.mark_stalled(id, "oops").await.unwrap();

        assert!(queue.unstall(id).await.unwrap());
        // Second unstall reports no change.
        assert!(!queue.unstall(id).await.unwrap());

        let row = queue.get(id).await.unwrap().unwrap();
        assert!(!row.is_stalled);
    }

    #[tokio::test]
    async fn test_unstall_many_and_all() {
        let queue = test_queue(QueueOptions {
            coalesce: false,
            ..Default::default()
        })
        .await;

        let a = queue.enqueue(request("a.near", "1")).await.unwrap();
        let b = queue.enqueue(request("b.near", "1")).await.unwrap();
        let c = queue.enqueue(request("c.near", "1")).await.unwrap();
        for id in [a, b, c] {
            queue.mark_stalled(id, "x").await.unwrap();
        }

        assert_eq!(queue.unstall_many(&[a, b]).await.unwrap(), 2);
        assert_eq!(queue.unstall_all().await.unwrap(), 1);
        assert_eq!(queue.unstall_all().await.unwrap(), 0);
        assert_eq!(queue.peek(10).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_replay_and_recover() {
        let queue = test_queue(QueueOptions {
            coalesce: false,
            ..Default::default()
        })
        .await;

        let a = queue.enqueue(request("a.near", "1")).await.unwrap();
        let batch_id = queue.attach_batch("hash", b"blob", &[a]).await.unwrap();

        let in_flight = queue.replay_in_flight().await.unwrap();
        assert_eq!(in_flight.len(), 1);
        assert_eq!(in_flight[0].batch.id, batch_id);
        assert_eq!(in_flight[0].batch.signed_tx, Some(b"blob".to_vec()));
        assert_eq!(in_flight[0].transfers.len(), 1);

        queue.recover().await.unwrap();

        let row = queue.get(a).await.unwrap().unwrap();
        assert!(row.batch_id.is_none());
        assert!(queue.replay_in_flight().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_inspection() {
        let queue = test_queue(QueueOptions {
            coalesce: false,
            ..Default::default()
        })
        .await;

        let a = queue.enqueue(request("a.near", "1")).await.unwrap();
        queue.enqueue(request("b.near", "2")).await.unwrap();
        queue.mark_stalled(a, "x").await.unwrap();

        let stalled = queue
            .list(&TransferFilter {
                stalled: Some(true),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(stalled.len(), 1);
        assert_eq!(stalled[0].id, a);

        let by_receiver = queue
            .list(&TransferFilter {
                receiver: Some("b.near".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(by_receiver.len(), 1);
        assert_eq!(by_receiver[0].receiver, "b.near");
    }
}
