// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Outflow Chain - Capability layer between the executor and the chain
//!
//! This crate defines what the executor hands to the outside world and what
//! it gets back, without committing to any particular RPC client or key
//! management scheme:
//!
//! - [`Action`]: descriptors for the two on-chain actions a transfer batch
//!   is made of (storage registration and token transfer).
//! - [`TxSigner`]: turns a list of actions into a serialized signed
//!   transaction plus its content hash.
//! - [`TxBroadcaster`]: submits a signed blob and reports a structured
//!   [`TxOutcome`].
//! - [`mock`]: in-process implementations for tests and local development.
//!
//! Implementations are expected to be reentrant-safe; the executor calls
//! them sequentially from a single worker.

/// Action descriptors and uniform fee constants.
pub mod action;

/// Content hashing for signed transaction blobs.
pub mod hash;

/// Mock signer and broadcaster implementations.
pub mod mock;

/// Signer and broadcaster capability traits with their outcome types.
pub mod traits;

pub use action::{Action, ActionFees};
pub use hash::content_hash;
pub use traits::{
    SignError, SignedTransaction, TransportError, TxBroadcaster, TxOutcome, TxSigner,
};
