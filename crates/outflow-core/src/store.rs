// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! SQLite-backed persistence for the transfer queue.
//!
//! Two relations: `transfers` (one row per requested transfer) and
//! `batches` (one row per in-flight or succeeded on-chain transaction).
//! Every operation that touches more than one row runs inside a single
//! transaction; partial updates never become visible.
//!
//! `batch_id IS NULL` is the ground truth for "pending". Failed batches
//! are deleted, never retained.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use fs2::FileExt;
use num_bigint::BigUint;
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;

use crate::error::{Error, Result};
use crate::migrations;

/// One requested transfer.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Transfer {
    /// Queue-assigned identifier, unique forever within the store.
    pub id: i64,
    /// Recipient account identifier (opaque, non-empty).
    pub receiver: String,
    /// Amount in the smallest on-chain unit, as a decimal string.
    pub amount: String,
    /// Optional transfer memo.
    pub memo: Option<String>,
    /// Whether the receiver is already registered with the token contract.
    /// False means a registration action is prepended before the transfer.
    pub has_storage_deposit: bool,
    /// How many times this transfer was rolled back from a failed batch.
    pub retry_count: i64,
    /// Last error text attached to this transfer.
    pub error_message: Option<String>,
    /// Owning batch while in flight or succeeded; NULL means pending.
    pub batch_id: Option<i64>,
    /// Stalled transfers are invisible to the scheduler until unstalled.
    pub is_stalled: bool,
    /// When the transfer was enqueued.
    pub created_at: DateTime<Utc>,
    /// When the transfer was last modified.
    pub updated_at: DateTime<Utc>,
}

/// One on-chain transaction bundling one or more transfers.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Batch {
    /// Store-assigned identifier.
    pub id: i64,
    /// Content hash of the signed blob until confirmed, then the
    /// chain-reported transaction hash.
    pub tx_hash: String,
    /// Serialized signed transaction. Present while in flight, cleared on
    /// success.
    pub signed_tx: Option<Vec<u8>>,
    /// `processing` or `success`. Failed batches are deleted.
    pub status: String,
    /// When the batch was recorded.
    pub created_at: DateTime<Utc>,
    /// When the batch was last modified.
    pub updated_at: DateTime<Utc>,
}

/// Filter options for listing transfers.
#[derive(Debug, Clone)]
pub struct TransferFilter {
    /// Filter by receiver (exact match).
    pub receiver: Option<String>,
    /// Filter by stalled state.
    pub stalled: Option<bool>,
    /// Maximum results to return.
    pub limit: i64,
    /// Pagination offset.
    pub offset: i64,
}

impl Default for TransferFilter {
    fn default() -> Self {
        Self {
            receiver: None,
            stalled: None,
            limit: 100,
            offset: 0,
        }
    }
}

/// Queue-level counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueStats {
    /// All transfers ever stored.
    pub total: i64,
    /// Transfers visible to the scheduler.
    pub pending: i64,
    /// Transfers attached to an in-flight batch.
    pub processing: i64,
    /// Transfers in a succeeded batch.
    pub success: i64,
}

/// SQLite-backed store.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
    // Held for the lifetime of the store; dropping it releases the
    // advisory lock.
    _owner_lock: Option<Arc<std::fs::File>>,
}

impl SqliteStore {
    /// Wrap an existing pool. The caller runs migrations and guarantees
    /// single ownership (used by tests with in-memory databases).
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            _owner_lock: None,
        }
    }

    /// Create and initialize a store from a file path.
    ///
    /// - Creates parent directories if they don't exist
    /// - Takes an exclusive advisory lock on a `.lock` file next to the
    ///   database; a second process opening the same queue fails with
    ///   [`Error::QueueLocked`]
    /// - Connects with `mode=rwc` and runs all migrations
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let lock_path = path.with_extension("lock");
        let lock_file = std::fs::File::create(&lock_path)?;
        lock_file
            .try_lock_exclusive()
            .map_err(|_| Error::QueueLocked(lock_path.display().to_string()))?;

        let url = format!("sqlite:{}?mode=rwc", path.to_string_lossy());
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await?;

        migrations::run_sqlite(&pool).await?;

        Ok(Self {
            pool,
            _owner_lock: Some(Arc::new(lock_file)),
        })
    }

    /// Get a transfer by id.
    pub async fn get_transfer(&self, id: i64) -> Result<Option<Transfer>> {
        let record = sqlx::query_as::<_, Transfer>(
            r#"
            SELECT id, receiver, amount, memo, has_storage_deposit, retry_count,
                   error_message, batch_id, is_stalled, created_at, updated_at
            FROM transfers
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    /// List transfers with optional filters, FIFO by id.
    pub async fn list_transfers(&self, filter: &TransferFilter) -> Result<Vec<Transfer>> {
        let records = sqlx::query_as::<_, Transfer>(
            r#"
            SELECT id, receiver, amount, memo, has_storage_deposit, retry_count,
                   error_message, batch_id, is_stalled, created_at, updated_at
            FROM transfers
            WHERE (?1 IS NULL OR receiver = ?1)
              AND (?2 IS NULL OR is_stalled = ?2)
            ORDER BY id ASC
            LIMIT ?3 OFFSET ?4
            "#,
        )
        .bind(filter.receiver.as_deref())
        .bind(filter.stalled)
        .bind(filter.limit)
        .bind(filter.offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    /// Transfers visible to the scheduler, FIFO by id.
    pub(crate) async fn list_pending(&self, limit: i64) -> Result<Vec<Transfer>> {
        let records = sqlx::query_as::<_, Transfer>(
            r#"
            SELECT id, receiver, amount, memo, has_storage_deposit, retry_count,
                   error_message, batch_id, is_stalled, created_at, updated_at
            FROM transfers
            WHERE batch_id IS NULL AND is_stalled = 0
            ORDER BY id ASC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    /// Insert a transfer, coalescing into the receiver's single pending
    /// row when `coalesce` is set.
    ///
    /// Returns the stored row and whether it absorbed an existing pending
    /// transfer. Lookup, sum, and update happen in one transaction so the
    /// single-pending-per-receiver invariant holds under concurrent
    /// enqueues.
    pub(crate) async fn enqueue_transfer(
        &self,
        receiver: &str,
        amount: &BigUint,
        memo: Option<&str>,
        has_storage_deposit: bool,
        coalesce: bool,
    ) -> Result<(Transfer, bool)> {
        let mut tx = self.pool.begin().await?;

        if coalesce {
            let existing = sqlx::query_as::<_, Transfer>(
                r#"
                SELECT id, receiver, amount, memo, has_storage_deposit, retry_count,
                       error_message, batch_id, is_stalled, created_at, updated_at
                FROM transfers
                WHERE receiver = ? AND batch_id IS NULL AND is_stalled = 0
                ORDER BY id ASC
                LIMIT 1
                "#,
            )
            .bind(receiver)
            .fetch_optional(&mut *tx)
            .await?;

            if let Some(row) = existing {
                let current: BigUint = row
                    .amount
                    .parse()
                    .map_err(|_| Error::InvalidAmount(row.amount.clone()))?;
                let sum = current + amount;

                sqlx::query(
                    r#"
                    UPDATE transfers
                    SET amount = ?, memo = ?, has_storage_deposit = ?,
                        updated_at = CURRENT_TIMESTAMP
                    WHERE id = ?
                    "#,
                )
                .bind(sum.to_string())
                .bind(memo)
                .bind(has_storage_deposit)
                .bind(row.id)
                .execute(&mut *tx)
                .await?;

                let updated = Self::fetch_transfer_tx(&mut tx, row.id).await?;
                tx.commit().await?;
                return Ok((updated, true));
            }
        }

        let id = sqlx::query(
            r#"
            INSERT INTO transfers (receiver, amount, memo, has_storage_deposit)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(receiver)
        .bind(amount.to_string())
        .bind(memo)
        .bind(has_storage_deposit)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        let inserted = Self::fetch_transfer_tx(&mut tx, id).await?;
        tx.commit().await?;
        Ok((inserted, false))
    }

    /// Record a signed batch and claim its transfers, atomically.
    pub(crate) async fn create_batch(
        &self,
        tx_hash: &str,
        signed_tx: &[u8],
        transfer_ids: &[i64],
    ) -> Result<i64> {
        let mut tx = self.pool.begin().await?;

        let batch_id = sqlx::query(
            r#"
            INSERT INTO batches (tx_hash, signed_tx, status)
            VALUES (?, ?, 'processing')
            "#,
        )
        .bind(tx_hash)
        .bind(signed_tx)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        for &id in transfer_ids {
            let result = sqlx::query(
                r#"
                UPDATE transfers
                SET batch_id = ?, updated_at = CURRENT_TIMESTAMP
                WHERE id = ?
                "#,
            )
            .bind(batch_id)
            .bind(id)
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() == 0 {
                // Dropping the transaction rolls back the batch insert.
                return Err(Error::TransferNotFound(id));
            }
        }

        tx.commit().await?;
        Ok(batch_id)
    }

    /// Confirm a batch on-chain, atomically.
    ///
    /// Clears the signed blob, records the chain hash, and marks every
    /// member transfer as storage-registered (the registration action, if
    /// any, has now persisted on-chain). Returns the members.
    pub(crate) async fn mark_batch_success(
        &self,
        batch_id: i64,
        tx_hash: &str,
    ) -> Result<Vec<Transfer>> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE batches
            SET status = 'success', tx_hash = ?, signed_tx = NULL,
                updated_at = CURRENT_TIMESTAMP
            WHERE id = ?
            "#,
        )
        .bind(tx_hash)
        .bind(batch_id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::BatchNotFound(batch_id));
        }

        sqlx::query(
            r#"
            UPDATE transfers
            SET has_storage_deposit = 1, updated_at = CURRENT_TIMESTAMP
            WHERE batch_id = ?
            "#,
        )
        .bind(batch_id)
        .execute(&mut *tx)
        .await?;

        let members = Self::fetch_batch_members_tx(&mut tx, batch_id).await?;
        tx.commit().await?;
        Ok(members)
    }

    /// Delete a failed batch and recycle its transfers, atomically.
    ///
    /// Every member gets `batch_id` cleared. With `penalize`, its
    /// `retry_count` is incremented. `error_message`, when provided,
    /// replaces the member's last error. When `max_retries` is provided,
    /// a member whose new count exceeds it is stalled in the same
    /// transaction. Returns the members after the update.
    pub(crate) async fn release_batch(
        &self,
        batch_id: i64,
        error_message: Option<&str>,
        max_retries: Option<i64>,
        penalize: bool,
    ) -> Result<Vec<Transfer>> {
        let mut tx = self.pool.begin().await?;

        let members = Self::fetch_batch_members_tx(&mut tx, batch_id).await?;

        let result = sqlx::query("DELETE FROM batches WHERE id = ?")
            .bind(batch_id)
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(Error::BatchNotFound(batch_id));
        }

        let penalty: i64 = if penalize { 1 } else { 0 };
        for member in &members {
            sqlx::query(
                r#"
                UPDATE transfers
                SET batch_id = NULL,
                    retry_count = retry_count + ?1,
                    error_message = COALESCE(?2, error_message),
                    is_stalled = CASE
                        WHEN ?3 IS NOT NULL AND retry_count + ?1 > ?3 THEN 1
                        ELSE is_stalled
                    END,
                    updated_at = CURRENT_TIMESTAMP
                WHERE id = ?4
                "#,
            )
            .bind(penalty)
            .bind(error_message)
            .bind(max_retries)
            .bind(member.id)
            .execute(&mut *tx)
            .await?;
        }

        let mut updated = Vec::with_capacity(members.len());
        for member in &members {
            updated.push(Self::fetch_transfer_tx(&mut tx, member.id).await?);
        }

        tx.commit().await?;
        Ok(updated)
    }

    /// Penalize transfers that never reached a batch (signer failures).
    ///
    /// Same retry accounting as a failed batch, without any batch row to
    /// delete. Returns the transfers after the update.
    pub(crate) async fn penalize_transfers(
        &self,
        transfer_ids: &[i64],
        error_message: &str,
        max_retries: Option<i64>,
    ) -> Result<Vec<Transfer>> {
        let mut tx = self.pool.begin().await?;

        for &id in transfer_ids {
            let result = sqlx::query(
                r#"
                UPDATE transfers
                SET retry_count = retry_count + 1,
                    error_message = ?1,
                    is_stalled = CASE
                        WHEN ?2 IS NOT NULL AND retry_count + 1 > ?2 THEN 1
                        ELSE is_stalled
                    END,
                    updated_at = CURRENT_TIMESTAMP
                WHERE id = ?3
                "#,
            )
            .bind(error_message)
            .bind(max_retries)
            .bind(id)
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() == 0 {
                return Err(Error::TransferNotFound(id));
            }
        }

        let mut updated = Vec::with_capacity(transfer_ids.len());
        for &id in transfer_ids {
            updated.push(Self::fetch_transfer_tx(&mut tx, id).await?);
        }

        tx.commit().await?;
        Ok(updated)
    }

    /// Hide a transfer from the scheduler until operator action.
    pub(crate) async fn mark_stalled(&self, id: i64, error_message: &str) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE transfers
            SET is_stalled = 1, error_message = ?, updated_at = CURRENT_TIMESTAMP
            WHERE id = ?
            "#,
        )
        .bind(error_message)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::TransferNotFound(id));
        }

        Ok(())
    }

    /// Return stalled transfers to the scheduler. Only rows that were
    /// actually stalled count; `batch_id` is cleared defensively.
    pub(crate) async fn unstall(&self, transfer_ids: &[i64]) -> Result<u64> {
        let mut tx = self.pool.begin().await?;

        let mut count = 0;
        for &id in transfer_ids {
            let result = sqlx::query(
                r#"
                UPDATE transfers
                SET is_stalled = 0, batch_id = NULL, updated_at = CURRENT_TIMESTAMP
                WHERE id = ? AND is_stalled = 1
                "#,
            )
            .bind(id)
            .execute(&mut *tx)
            .await?;
            count += result.rows_affected();
        }

        tx.commit().await?;
        Ok(count)
    }

    /// Return every stalled transfer to the scheduler.
    pub(crate) async fn unstall_all(&self) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE transfers
            SET is_stalled = 0, batch_id = NULL, updated_at = CURRENT_TIMESTAMP
            WHERE is_stalled = 1
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Get a batch by id.
    pub async fn get_batch(&self, id: i64) -> Result<Option<Batch>> {
        let record = sqlx::query_as::<_, Batch>(
            r#"
            SELECT id, tx_hash, signed_tx, status, created_at, updated_at
            FROM batches
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    /// Count batch rows (in flight plus succeeded).
    pub async fn count_batches(&self) -> Result<i64> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM batches")
            .fetch_one(&self.pool)
            .await?;

        Ok(count.0)
    }

    /// Batches whose signed transaction is still awaiting confirmation.
    pub(crate) async fn in_flight_batches(&self) -> Result<Vec<Batch>> {
        let records = sqlx::query_as::<_, Batch>(
            r#"
            SELECT id, tx_hash, signed_tx, status, created_at, updated_at
            FROM batches
            WHERE status = 'processing' AND signed_tx IS NOT NULL
            ORDER BY id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    /// Members of a batch, FIFO by id.
    pub async fn transfers_in_batch(&self, batch_id: i64) -> Result<Vec<Transfer>> {
        let records = sqlx::query_as::<_, Transfer>(
            r#"
            SELECT id, receiver, amount, memo, has_storage_deposit, retry_count,
                   error_message, batch_id, is_stalled, created_at, updated_at
            FROM transfers
            WHERE batch_id = ?
            ORDER BY id ASC
            "#,
        )
        .bind(batch_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    /// Detach transfers from non-succeeded batches and delete those
    /// batches, atomically. Returns (transfers reset, batches deleted).
    pub(crate) async fn reset_orphans(&self) -> Result<(u64, u64)> {
        let mut tx = self.pool.begin().await?;

        let transfers = sqlx::query(
            r#"
            UPDATE transfers
            SET batch_id = NULL, updated_at = CURRENT_TIMESTAMP
            WHERE batch_id IN (SELECT id FROM batches WHERE status != 'success')
            "#,
        )
        .execute(&mut *tx)
        .await?;

        let batches = sqlx::query("DELETE FROM batches WHERE status != 'success'")
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok((transfers.rows_affected(), batches.rows_affected()))
    }

    /// Queue-level counters.
    pub async fn stats(&self) -> Result<QueueStats> {
        let total: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM transfers")
            .fetch_one(&self.pool)
            .await?;

        let pending: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM transfers WHERE batch_id IS NULL AND is_stalled = 0",
        )
        .fetch_one(&self.pool)
        .await?;

        let processing: (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*)
            FROM transfers t
            JOIN batches b ON t.batch_id = b.id
            WHERE b.status = 'processing'
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        let success: (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*)
            FROM transfers t
            JOIN batches b ON t.batch_id = b.id
            WHERE b.status = 'success'
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(QueueStats {
            total: total.0,
            pending: pending.0,
            processing: processing.0,
            success: success.0,
        })
    }

    /// Whether any transfer is pending or any batch is in flight.
    pub async fn has_work(&self) -> Result<bool> {
        let busy: (bool,) = sqlx::query_as(
            r#"
            SELECT EXISTS(SELECT 1 FROM transfers WHERE batch_id IS NULL AND is_stalled = 0)
                OR EXISTS(SELECT 1 FROM batches WHERE status = 'processing')
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(busy.0)
    }

    async fn fetch_transfer_tx(
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        id: i64,
    ) -> Result<Transfer> {
        let record = sqlx::query_as::<_, Transfer>(
            r#"
            SELECT id, receiver, amount, memo, has_storage_deposit, retry_count,
                   error_message, batch_id, is_stalled, created_at, updated_at
            FROM transfers
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&mut **tx)
        .await?;

        record.ok_or(Error::TransferNotFound(id))
    }

    async fn fetch_batch_members_tx(
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        batch_id: i64,
    ) -> Result<Vec<Transfer>> {
        let records = sqlx::query_as::<_, Transfer>(
            r#"
            SELECT id, receiver, amount, memo, has_storage_deposit, retry_count,
                   error_message, batch_id, is_stalled, created_at, updated_at
            FROM transfers
            WHERE batch_id = ?
            ORDER BY id ASC
            "#,
        )
        .bind(batch_id)
        .fetch_all(&mut **tx)
        .await?;

        Ok(records)
    }
}
