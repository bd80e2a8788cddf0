//! Store Seams
//!
//! The engine talks to persistence only through these two traits. Both the
//! PostgreSQL store and the in-memory store implement them.
//!
//! Account and transfer rows change through exactly two gateways: the
//! compare-and-swap balance update and [`LedgerStore::run_atomic`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::TransferError;
use super::types::{Account, LedgerEntry, TransactionId, Transfer};

#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Look up an account. `None` when it does not exist.
    async fn find(&self, account_id: &str) -> Result<Option<Account>, TransferError>;

    /// `balance += delta`, only if the stored `updated_at` still equals the
    /// snapshot's. Otherwise `TransferError::ConcurrentUpdate`.
    async fn update_balance(&self, account: &Account, delta: i64) -> Result<(), TransferError>;
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Idempotency lookup by caller reference key
    async fn find_by_reference(&self, reference_id: &str)
    -> Result<Option<Transfer>, TransferError>;

    /// Apply every write of `unit` or none of them.
    ///
    /// A second transfer with an existing `reference_id` fails the unit with
    /// `TransferError::DuplicateReference`.
    async fn run_atomic(&self, unit: UnitOfWork) -> Result<(), TransferError>;

    /// Ledger entries written for one transfer
    async fn find_entries(
        &self,
        transaction_id: TransactionId,
    ) -> Result<Vec<LedgerEntry>, TransferError>;

    /// Transfers touching `account_id`, newest first, strictly before `before`
    async fn list_by_account(
        &self,
        account_id: &str,
        limit: usize,
        before: Option<&PageCursor>,
    ) -> Result<Vec<Transfer>, TransferError>;
}

/// One write inside an atomic unit
#[derive(Debug, Clone, PartialEq)]
pub enum AtomicWrite {
    /// Insert the transfer, or overwrite it by `transaction_id`
    SaveTransfer(Transfer),
    InsertEntry(LedgerEntry),
    /// Compare-and-swap on `account.updated_at`
    UpdateBalance { account: Account, delta: i64 },
}

/// Ordered list of writes committed together
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UnitOfWork {
    writes: Vec<AtomicWrite>,
}

impl UnitOfWork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn save_transfer(mut self, transfer: Transfer) -> Self {
        self.writes.push(AtomicWrite::SaveTransfer(transfer));
        self
    }

    pub fn insert_entry(mut self, entry: LedgerEntry) -> Self {
        self.writes.push(AtomicWrite::InsertEntry(entry));
        self
    }

    pub fn update_balance(mut self, account: Account, delta: i64) -> Self {
        self.writes.push(AtomicWrite::UpdateBalance { account, delta });
        self
    }

    pub fn writes(&self) -> &[AtomicWrite] {
        &self.writes
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }
}

impl IntoIterator for UnitOfWork {
    type Item = AtomicWrite;
    type IntoIter = std::vec::IntoIter<AtomicWrite>;

    fn into_iter(self) -> Self::IntoIter {
        self.writes.into_iter()
    }
}

/// Keyset position in an account's history: the last row already returned
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageCursor {
    #[serde(rename = "lastTimestamp")]
    pub last_timestamp: DateTime<Utc>,
    #[serde(rename = "lastID")]
    pub last_id: String,
}

impl PageCursor {
    pub fn after(transfer: &Transfer) -> Self {
        Self {
            last_timestamp: transfer.created_at,
            last_id: transfer.transaction_id.to_string(),
        }
    }

    /// Whether `transfer` sorts strictly after this cursor in
    /// `created_at DESC, transaction_id DESC` order.
    pub fn precedes(&self, transfer: &Transfer) -> bool {
        (transfer.created_at, transfer.transaction_id.to_string())
            < (self.last_timestamp, self.last_id.clone())
    }
}
