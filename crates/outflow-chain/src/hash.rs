// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Content hashing for signed transaction blobs.

use sha2::{Digest, Sha256};

/// Compute the content hash of a serialized signed transaction.
///
/// The hash is the base58-encoded SHA-256 of the bytes, matching the
/// chain's transaction hash encoding. It serves as the batch's `tx_hash`
/// until the chain confirms its own (usually identical) hash.
pub fn content_hash(blob: &[u8]) -> String {
    let digest = Sha256::digest(blob);
    bs58::encode(digest).into_string()
}
