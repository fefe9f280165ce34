// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Action descriptors for batched fungible-token transactions.

use serde::{Deserialize, Serialize};

/// One unit of on-chain work inside a batched transaction.
///
/// The executor produces descriptors, not serialized payloads; the signer
/// implementation is responsible for encoding them for its chain and for
/// attaching the deposits and gas from [`ActionFees`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Action {
    /// Register `account_id` with the token contract (registration only,
    /// no balance top-up). Prepended before a transfer whenever the
    /// transfer's receiver is not known to be registered.
    StorageDeposit {
        /// Account to register.
        account_id: String,
    },

    /// Debit the sender and credit `receiver_id`.
    FtTransfer {
        /// Receiving account.
        receiver_id: String,
        /// Amount in the smallest on-chain unit, as a decimal string.
        amount: String,
        /// Optional transfer memo passed through to the contract.
        memo: Option<String>,
    },
}

impl Action {
    /// Account this action is addressed to.
    pub fn account(&self) -> &str {
        match self {
            Self::StorageDeposit { account_id } => account_id,
            Self::FtTransfer { receiver_id, .. } => receiver_id,
        }
    }
}

/// Uniform deposit and gas constants applied to every action.
///
/// These are domain constants: the design only requires that they are the
/// same across batches and small enough that a full batch fits the chain's
/// per-transaction budget.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionFees {
    /// Deposit attached to a `storage_deposit` action, in the chain's
    /// native minimal unit.
    pub storage_deposit_amount: u128,
    /// Deposit attached to an `ft_transfer` action. Token contracts
    /// require exactly one minimal unit as a confirmation of intent.
    pub transfer_deposit_amount: u128,
    /// Gas budget per action.
    pub gas_per_action: u64,
}

impl Default for ActionFees {
    fn default() -> Self {
        Self {
            // 0.00125 native tokens, the registration storage bond.
            storage_deposit_amount: 1_250_000_000_000_000_000_000,
            transfer_deposit_amount: 1,
            // 30 Tgas.
            gas_per_action: 30_000_000_000_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_account() {
        let deposit = Action::StorageDeposit {
            account_id: "alice.near".to_string(),
        };
        assert_eq!(deposit.account(), "alice.near");

        let transfer = Action::FtTransfer {
            receiver_id: "bob.near".to_string(),
            amount: "100".to_string(),
            memo: None,
        };
        assert_eq!(transfer.account(), "bob.near");
    }

    #[test]
    fn test_action_serialization_tags() {
        let transfer = Action::FtTransfer {
            receiver_id: "bob.near".to_string(),
            amount: "100".to_string(),
            memo: Some("invoice 7".to_string()),
        };
        let json = serde_json::to_value(&transfer).unwrap();
        assert_eq!(json["kind"], "ft_transfer");
        assert_eq!(json["receiver_id"], "bob.near");
        assert_eq!(json["amount"], "100");
        assert_eq!(json["memo"], "invoice 7");
    }

    #[test]
    fn test_default_fees() {
        let fees = ActionFees::default();
        assert_eq!(fees.transfer_deposit_amount, 1);
        assert!(fees.storage_deposit_amount > 0);
        assert!(fees.gas_per_action > 0);
    }
}
