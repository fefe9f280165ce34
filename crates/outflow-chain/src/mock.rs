// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mock signer and broadcaster for testing.
//!
//! Simple in-process implementations that simulate the chain boundary
//! without any network or key material. The broadcaster replays a scripted
//! queue of outcomes; when the script runs dry it reports success, so the
//! default configuration behaves like a healthy chain.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::action::Action;
use crate::hash::content_hash;
use crate::traits::{
    SignError, SignedTransaction, TransportError, TxBroadcaster, TxOutcome, TxSigner,
};

/// Mock signer that serializes actions to JSON as the "signed" blob.
///
/// Blobs are deterministic for a given contract and action list, which
/// mirrors the content-addressed behavior of a real signer with a fixed
/// nonce.
pub struct MockSigner {
    calls: AtomicUsize,
    fail: AtomicBool,
}

impl Default for MockSigner {
    fn default() -> Self {
        Self::new()
    }
}

impl MockSigner {
    /// Create a mock signer that always succeeds.
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
        }
    }

    /// Number of `sign` calls observed.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Make subsequent `sign` calls fail (or succeed again).
    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl TxSigner for MockSigner {
    async fn sign(
        &self,
        contract_id: &str,
        actions: &[Action],
    ) -> Result<SignedTransaction, SignError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(SignError("mock signer failure".to_string()));
        }

        let payload = serde_json::json!({
            "contract": contract_id,
            "actions": actions,
        });
        let blob = serde_json::to_vec(&payload)
            .map_err(|e| SignError(format!("serialize actions: {}", e)))?;
        let hash = content_hash(&blob);
        Ok(SignedTransaction { blob, hash })
    }
}

/// Mock broadcaster with a scripted outcome queue.
pub struct MockBroadcaster {
    script: Mutex<VecDeque<Result<TxOutcome, TransportError>>>,
    sent: Mutex<Vec<Vec<u8>>>,
}

impl Default for MockBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBroadcaster {
    /// Create a broadcaster that reports success for every submission.
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            sent: Mutex::new(Vec::new()),
        }
    }

    /// Queue the next outcome to report. Outcomes are consumed in order;
    /// once the script is empty, submissions succeed with the blob's
    /// content hash as the chain hash.
    pub async fn push_outcome(&self, outcome: Result<TxOutcome, TransportError>) {
        self.script.lock().await.push_back(outcome);
    }

    /// Blobs received so far, in submission order.
    pub async fn sent(&self) -> Vec<Vec<u8>> {
        self.sent.lock().await.clone()
    }

    /// Number of submissions observed.
    pub async fn sent_count(&self) -> usize {
        self.sent.lock().await.len()
    }
}

#[async_trait]
impl TxBroadcaster for MockBroadcaster {
    async fn send(&self, signed_tx: &[u8]) -> Result<TxOutcome, TransportError> {
        self.sent.lock().await.push(signed_tx.to_vec());
        if let Some(outcome) = self.script.lock().await.pop_front() {
            return outcome;
        }
        Ok(TxOutcome::Executed {
            tx_hash: content_hash(signed_tx),
        })
    }
}
