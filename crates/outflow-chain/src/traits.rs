// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Signer and broadcaster capability traits.
//!
//! Both traits are pure chain adapters - they do NOT touch the queue's
//! store. Durability ordering (record the signed artifact, then broadcast)
//! is enforced by the caller.

use async_trait::async_trait;
use thiserror::Error;

use crate::action::Action;

/// Signing failed before a transaction was produced.
#[derive(Debug, Clone, Error)]
#[error("signing failed: {0}")]
pub struct SignError(pub String);

/// The broadcast call did not complete (network failure, timeout).
///
/// Distinct from [`TxOutcome`]: a transport error means the chain's verdict
/// is unknown, so the caller must assume the transaction may or may not
/// have landed and rely on content-deduplicated resubmission.
#[derive(Debug, Clone, Error)]
#[error("transport error: {0}")]
pub struct TransportError(pub String);

/// A serialized signed transaction together with its content hash.
#[derive(Debug, Clone)]
pub struct SignedTransaction {
    /// Opaque serialized transaction, stored verbatim by the queue.
    pub blob: Vec<u8>,
    /// Base58-encoded SHA-256 of `blob` (see [`crate::content_hash`]).
    pub hash: String,
}

/// Structured verdict from the chain for a submitted transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxOutcome {
    /// The chain accepted and executed the transaction.
    Executed {
        /// Transaction hash reported by the chain.
        tx_hash: String,
    },

    /// One action inside the batch failed during execution.
    ActionFailed {
        /// Index of the failing action within the transaction.
        /// Absent for whole-transaction action failures such as resource
        /// accounting, where no single action can be blamed.
        action_index: Option<usize>,
        /// Chain-reported failure kind, as text.
        kind: String,
    },

    /// The transaction was rejected before execution (malformed, stale
    /// nonce, expired block hash).
    Invalid {
        /// Chain-reported rejection kind, as text.
        kind: String,
    },
}

/// Produces signed transactions for the configured sender account.
///
/// Implementations own the key material and nonce management. The caller
/// guarantees at most one outstanding transaction at a time, which keeps
/// nonce handling trivial.
#[async_trait]
pub trait TxSigner: Send + Sync {
    /// Sign a transaction calling `contract_id` with `actions`, in order.
    ///
    /// The returned hash must be the content hash of the returned blob.
    async fn sign(
        &self,
        contract_id: &str,
        actions: &[Action],
    ) -> Result<SignedTransaction, SignError>;
}

/// Submits signed transactions to the chain.
///
/// Redelivery of an already-accepted blob must be safe: the chain
/// deduplicates by content and reports the prior outcome. Crash recovery
/// depends on this.
#[async_trait]
pub trait TxBroadcaster: Send + Sync {
    /// Submit a signed transaction and wait for its outcome.
    async fn send(&self, signed_tx: &[u8]) -> Result<TxOutcome, TransportError>;
}
