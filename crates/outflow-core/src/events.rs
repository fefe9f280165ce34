// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Queue lifecycle events.
//!
//! Best-effort pub/sub for observability. Events are emitted after the
//! store transaction commits, so a handler can never observe (or corrupt)
//! uncommitted state. Subscribers are optional; emission without any
//! receiver is a no-op.

use tokio::sync::broadcast;

use crate::store::Transfer;

/// Lifecycle event emitted by the queue and the executor.
#[derive(Debug, Clone)]
pub enum QueueEvent {
    /// A transfer was enqueued (new row or coalesced into an existing one).
    Pushed {
        /// The transfer as stored, after any coalescing.
        transfer: Transfer,
    },

    /// The scheduler looked at pending transfers.
    Peeked {
        /// Ids returned by the peek, in FIFO order.
        transfer_ids: Vec<i64>,
    },

    /// A transfer reached its terminal successful state.
    Success {
        /// The transfer after the success update.
        transfer: Transfer,
        /// Chain-confirmed transaction hash.
        tx_hash: String,
    },

    /// A transfer was recycled or stalled after a batch failure.
    Failed {
        /// The transfer after the recovery update.
        transfer: Transfer,
        /// Failure description attached to the recovery.
        error: String,
    },

    /// A batch completed on-chain.
    BatchProcessed {
        /// The batch id.
        batch_id: i64,
        /// How many transfers it carried.
        transfer_count: usize,
    },

    /// A batch failed and was recovered.
    BatchFailed {
        /// The batch id (the row itself is already deleted).
        batch_id: i64,
        /// Failure description.
        error: String,
    },

    /// The executor finished one scheduling pass.
    LoopCompleted,
}

/// Broadcast fan-out for [`QueueEvent`].
#[derive(Debug, Clone)]
pub(crate) struct EventBus {
    tx: broadcast::Sender<QueueEvent>,
}

impl EventBus {
    /// Channel capacity. Slow subscribers lag and drop old events rather
    /// than applying backpressure to the queue.
    const CAPACITY: usize = 256;

    pub(crate) fn new() -> Self {
        let (tx, _) = broadcast::channel(Self::CAPACITY);
        Self { tx }
    }

    /// Subscribe to events emitted from now on.
    pub(crate) fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.tx.subscribe()
    }

    /// Emit an event. Best-effort: an absent audience is not an error.
    pub(crate) fn emit(&self, event: QueueEvent) {
        let _ = self.tx.send(event);
    }
}
