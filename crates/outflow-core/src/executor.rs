// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Batch executor: the queue's single writer.
//!
//! A periodic loop that pulls pending transfers under the chain's action
//! budget, signs one batch, records the signed artifact durably, then
//! broadcasts and settles the outcome. At most one scheduling pass and one
//! outstanding batch exist at a time, which keeps nonce management in the
//! signer trivial.
//!
//! On startup the executor resubmits every batch recorded as in flight:
//! the chain deduplicates signed transactions by content, so a batch that
//! landed before a crash reports its prior outcome instead of executing
//! twice.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use outflow_chain::{Action, TransportError, TxBroadcaster, TxOutcome, TxSigner};

use crate::error::Result;
use crate::events::QueueEvent;
use crate::queue::TransferQueue;
use crate::store::Transfer;

/// Executor configuration.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Maximum transfers considered per scheduling pass. Clamped to
    /// 1..=100 on construction.
    pub batch_size: usize,
    /// Minimum wall time between passes.
    pub interval: Duration,
    /// Skip the pass when fewer candidates are available.
    pub min_queue_to_process: usize,
    /// Retry budget before a transfer auto-stalls on batch recovery.
    pub max_retries: u32,
    /// Chain-imposed upper bound on actions in one transaction.
    pub max_actions_per_transaction: usize,
    /// Fungible-token contract every batch is addressed to. Supplied by
    /// configuration; there is no meaningful default.
    pub token_contract: String,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            interval: Duration::from_millis(500),
            min_queue_to_process: 1,
            max_retries: 5,
            max_actions_per_transaction: 100,
            token_contract: String::new(),
        }
    }
}

/// The queue's single writer: builds, signs, records, and settles batches.
pub struct Executor {
    queue: TransferQueue,
    signer: Arc<dyn TxSigner>,
    broadcaster: Arc<dyn TxBroadcaster>,
    config: ExecutorConfig,
    running: AtomicBool,
    shutdown: Notify,
    idle: Notify,
}

impl Executor {
    /// Create an executor. `batch_size` is clamped to 1..=100.
    pub fn new(
        queue: TransferQueue,
        signer: Arc<dyn TxSigner>,
        broadcaster: Arc<dyn TxBroadcaster>,
        mut config: ExecutorConfig,
    ) -> Self {
        config.batch_size = config.batch_size.clamp(1, 100);
        Self {
            queue,
            signer,
            broadcaster,
            config,
            running: AtomicBool::new(false),
            shutdown: Notify::new(),
            idle: Notify::new(),
        }
    }

    /// Run crash recovery, then launch the scheduling loop.
    ///
    /// Recovery resubmits every in-flight batch (failures are logged, not
    /// fatal) and then clears any association left behind by batches that
    /// could not be settled.
    pub async fn start(self: Arc<Self>) -> Result<JoinHandle<()>> {
        if let Err(e) = self.recover_in_flight().await {
            error!(error = %e, "In-flight recovery failed");
        }
        self.queue.recover().await?;

        self.running.store(true, Ordering::SeqCst);
        let executor = self.clone();
        Ok(tokio::spawn(async move { executor.run().await }))
    }

    /// Stop the loop cooperatively. A pass in progress runs to completion;
    /// no new pass starts.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.shutdown.notify_waiters();
    }

    /// Resolve once the queue has no pending transfers and no batch in
    /// flight. All waiters are released on the first idle observation.
    pub async fn wait_until_idle(&self) -> Result<()> {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if !self.queue.has_work().await? {
                return Ok(());
            }

            notified.await;
        }
    }

    async fn run(&self) {
        info!(
            interval_ms = self.config.interval.as_millis() as u64,
            batch_size = self.config.batch_size,
            "Executor started"
        );

        while self.running.load(Ordering::SeqCst) {
            let started = Instant::now();

            if let Err(e) = self.run_once().await {
                error!(error = %e, "Scheduling pass failed");
            }

            self.queue.events().emit(QueueEvent::LoopCompleted);
            match self.queue.has_work().await {
                Ok(false) => self.idle.notify_waiters(),
                Ok(true) => {}
                Err(e) => error!(error = %e, "Idle check failed"),
            }

            let delay = self.config.interval.saturating_sub(started.elapsed());
            tokio::select! {
                _ = self.shutdown.notified() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        info!("Executor stopped");
    }

    /// One scheduling pass: peek, fit the budget, sign, attach, broadcast,
    /// settle.
    pub async fn run_once(&self) -> Result<()> {
        let candidates = self.queue.peek(self.config.batch_size as i64).await?;

        if candidates.len() < self.config.min_queue_to_process {
            debug!(
                candidates = candidates.len(),
                min = self.config.min_queue_to_process,
                "Below processing threshold"
            );
            return Ok(());
        }

        let (batch, actions) = fit_budget(&candidates, self.config.max_actions_per_transaction);
        if batch.is_empty() {
            // Only reachable when the first transfer alone exceeds the
            // budget, i.e. max_actions_per_transaction < 2 with an
            // unregistered receiver.
            warn!(
                budget = self.config.max_actions_per_transaction,
                "First pending transfer does not fit the action budget; nothing scheduled"
            );
            return Ok(());
        }

        let transfer_ids: Vec<i64> = batch.iter().map(|t| t.id).collect();

        let signed = match self
            .signer
            .sign(&self.config.token_contract, &actions)
            .await
        {
            Ok(signed) => signed,
            Err(e) => {
                warn!(
                    error = %e,
                    transfers = transfer_ids.len(),
                    "Signing failed; recycling transfers"
                );
                self.queue
                    .fail_transfers(&transfer_ids, &e.to_string(), Some(self.config.max_retries))
                    .await?;
                return Ok(());
            }
        };

        // Durability barrier: the signed artifact is committed before the
        // broadcast is attempted. A crash between these two steps is
        // settled by resubmission at next start.
        let batch_id = self
            .queue
            .attach_batch(&signed.hash, &signed.blob, &transfer_ids)
            .await?;

        info!(
            batch_id,
            transfers = transfer_ids.len(),
            actions = actions.len(),
            tx_hash = %signed.hash,
            "Broadcasting batch"
        );

        let outcome = self.broadcaster.send(&signed.blob).await;
        self.settle(batch_id, &batch, outcome).await
    }

    /// Resubmit every batch recorded as in flight and settle its outcome.
    async fn recover_in_flight(&self) -> Result<()> {
        let in_flight = self.queue.replay_in_flight().await?;
        if in_flight.is_empty() {
            return Ok(());
        }

        info!(batches = in_flight.len(), "Resubmitting in-flight batches");

        for entry in in_flight {
            let Some(blob) = entry.batch.signed_tx.as_deref() else {
                continue;
            };

            let outcome = self.broadcaster.send(blob).await;
            if let Err(e) = self.settle(entry.batch.id, &entry.transfers, outcome).await {
                error!(
                    batch_id = entry.batch.id,
                    error = %e,
                    "Failed to settle resubmitted batch"
                );
            }
        }

        Ok(())
    }

    /// Apply the broadcast outcome to the queue.
    async fn settle(
        &self,
        batch_id: i64,
        transfers: &[Transfer],
        outcome: std::result::Result<TxOutcome, TransportError>,
    ) -> Result<()> {
        match outcome {
            Ok(TxOutcome::Executed { tx_hash }) => {
                self.queue.mark_batch_success(batch_id, &tx_hash).await?;
                self.queue.events().emit(QueueEvent::BatchProcessed {
                    batch_id,
                    transfer_count: transfers.len(),
                });
            }

            Ok(TxOutcome::ActionFailed {
                action_index: Some(index),
                kind,
            }) => {
                let owners = action_owners(transfers);
                match owners.get(index) {
                    Some(&owner) => {
                        let offender = &transfers[owner];
                        warn!(
                            batch_id,
                            transfer_id = offender.id,
                            action_index = index,
                            kind = %kind,
                            "Action failed; stalling offender and recycling siblings"
                        );
                        // The offender is isolated; siblings retry cleanly
                        // with no retry penalty.
                        self.queue.mark_stalled(offender.id, &kind).await?;
                        self.queue.release_failed_batch(batch_id).await?;
                    }
                    None => {
                        warn!(
                            batch_id,
                            action_index = index,
                            kind = %kind,
                            "Action failure index out of range; recycling whole batch"
                        );
                        self.queue
                            .recover_failed_batch(
                                batch_id,
                                Some(&kind),
                                Some(self.config.max_retries),
                            )
                            .await?;
                    }
                }
                self.queue
                    .events()
                    .emit(QueueEvent::BatchFailed { batch_id, error: kind });
            }

            Ok(TxOutcome::ActionFailed {
                action_index: None,
                kind,
            })
            | Ok(TxOutcome::Invalid { kind }) => {
                warn!(batch_id, kind = %kind, "Batch rejected; recycling");
                self.queue
                    .recover_failed_batch(batch_id, Some(&kind), Some(self.config.max_retries))
                    .await?;
                self.queue
                    .events()
                    .emit(QueueEvent::BatchFailed { batch_id, error: kind });
            }

            Err(err) => {
                let error = err.to_string();
                warn!(batch_id, error = %error, "Broadcast did not complete; recycling");
                self.queue
                    .recover_failed_batch(batch_id, Some(&error), Some(self.config.max_retries))
                    .await?;
                self.queue
                    .events()
                    .emit(QueueEvent::BatchFailed { batch_id, error });
            }
        }

        Ok(())
    }
}

/// Accept transfers in FIFO order while their actions fit the budget.
///
/// A registered receiver costs one action (the transfer); an unregistered
/// one costs two (a prepended registration, then the transfer). Selection
/// stops at the first transfer that would overflow; the rest stay pending
/// for a later pass.
fn fit_budget(candidates: &[Transfer], max_actions: usize) -> (Vec<Transfer>, Vec<Action>) {
    let mut chosen = Vec::new();
    let mut actions = Vec::new();

    for transfer in candidates {
        let cost = if transfer.has_storage_deposit { 1 } else { 2 };
        if actions.len() + cost > max_actions {
            break;
        }

        if !transfer.has_storage_deposit {
            actions.push(Action::StorageDeposit {
                account_id: transfer.receiver.clone(),
            });
        }
        actions.push(Action::FtTransfer {
            receiver_id: transfer.receiver.clone(),
            amount: transfer.amount.clone(),
            memo: transfer.memo.clone(),
        });
        chosen.push(transfer.clone());
    }

    (chosen, actions)
}

/// Map each action index to the index of its owning transfer.
///
/// Mirrors the flat-mapping in [`fit_budget`]: an unregistered receiver
/// contributes two actions, both owned by the same transfer. Rebuilt from
/// the stored transfers during crash recovery, where the original action
/// list no longer exists; the registration flags are unchanged until
/// success, so the reconstruction is exact.
fn action_owners(transfers: &[Transfer]) -> Vec<usize> {
    let mut owners = Vec::new();
    for (index, transfer) in transfers.iter().enumerate() {
        if !transfer.has_storage_deposit {
            owners.push(index);
        }
        owners.push(index);
    }
    owners
}
