//! In-Memory Wallet Store
//!
//! Implements [`AccountStore`] and [`LedgerStore`] over a shared map, with the
//! same uniqueness, compare-and-swap and all-or-nothing guarantees as the
//! PostgreSQL store. Used by tests and by embedders that do not need
//! durability.
//!
//! `run_atomic` applies the unit to a staged copy and swaps it in only when
//! every write succeeded. The copy includes the whole ledger history, so a
//! commit costs time linear in the number of stored entries. Fine for tests
//! and small embeddings, not for long-lived stores.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;

use super::error::TransferError;
use super::store::{AccountStore, AtomicWrite, LedgerStore, PageCursor, UnitOfWork};
use super::types::{Account, LedgerEntry, TransactionId, Transfer, now_micros};

#[derive(Default, Clone)]
pub struct InMemoryWalletStore {
    inner: Arc<RwLock<Inner>>,
    stats: Arc<Stats>,
}

#[derive(Default)]
struct Stats {
    account_reads: AtomicU32,
    atomic_calls: AtomicU32,
    /// Remaining commits to fail with an injected transient error
    failing_commits: AtomicU32,
}

impl InMemoryWalletStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn with_accounts(accounts: impl IntoIterator<Item = Account>) -> Self {
        let store = Self::new();
        for account in accounts {
            store.insert_account(account).await;
        }
        store
    }

    /// Seed an account, replacing any account with the same id
    pub async fn insert_account(&self, account: Account) {
        let mut guard = self.inner.write().await;
        guard.accounts.insert(account.account_id.clone(), account);
    }

    pub async fn balance(&self, account_id: &str) -> Option<i64> {
        let guard = self.inner.read().await;
        guard.accounts.get(account_id).map(|a| a.balance)
    }

    /// Sum of every account balance
    pub async fn total_balance(&self) -> i64 {
        let guard = self.inner.read().await;
        guard.accounts.values().map(|a| a.balance).sum()
    }

    pub async fn transfer_count(&self) -> usize {
        self.inner.read().await.transfers.len()
    }

    pub async fn entry_count(&self) -> usize {
        self.inner.read().await.entries.len()
    }

    /// Fail the next `n` calls to `run_atomic` with a transient database error
    pub fn fail_next_commits(&self, n: u32) {
        self.stats.failing_commits.store(n, Ordering::SeqCst);
    }

    /// Number of `find` calls served
    pub fn account_reads(&self) -> u32 {
        self.stats.account_reads.load(Ordering::SeqCst)
    }

    /// Number of `run_atomic` calls received, failed ones included
    pub fn atomic_calls(&self) -> u32 {
        self.stats.atomic_calls.load(Ordering::SeqCst)
    }

    fn take_injected_failure(&self) -> bool {
        self.stats
            .failing_commits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl AccountStore for InMemoryWalletStore {
    async fn find(&self, account_id: &str) -> Result<Option<Account>, TransferError> {
        self.stats.account_reads.fetch_add(1, Ordering::SeqCst);
        let guard = self.inner.read().await;
        Ok(guard.accounts.get(account_id).cloned())
    }

    async fn update_balance(&self, account: &Account, delta: i64) -> Result<(), TransferError> {
        let mut guard = self.inner.write().await;
        guard.apply_balance(account, delta)
    }
}

#[async_trait]
impl LedgerStore for InMemoryWalletStore {
    async fn find_by_reference(
        &self,
        reference_id: &str,
    ) -> Result<Option<Transfer>, TransferError> {
        let guard = self.inner.read().await;
        Ok(guard
            .references
            .get(reference_id)
            .and_then(|id| guard.transfers.get(id))
            .cloned())
    }

    async fn run_atomic(&self, unit: UnitOfWork) -> Result<(), TransferError> {
        self.stats.atomic_calls.fetch_add(1, Ordering::SeqCst);
        if self.take_injected_failure() {
            return Err(TransferError::Database("injected commit failure".into()));
        }

        let mut guard = self.inner.write().await;
        let mut staged = guard.clone();
        let writes = unit.len();
        for write in unit {
            staged.apply(write)?;
        }
        *guard = staged;

        debug!(writes, "Atomic unit committed");
        Ok(())
    }

    async fn find_entries(
        &self,
        transaction_id: TransactionId,
    ) -> Result<Vec<LedgerEntry>, TransferError> {
        let guard = self.inner.read().await;
        Ok(guard
            .entries
            .iter()
            .filter(|e| e.transaction_id == transaction_id)
            .cloned()
            .collect())
    }

    async fn list_by_account(
        &self,
        account_id: &str,
        limit: usize,
        before: Option<&PageCursor>,
    ) -> Result<Vec<Transfer>, TransferError> {
        let guard = self.inner.read().await;
        let mut matching: Vec<Transfer> = guard
            .transfers
            .values()
            .filter(|t| t.source_account_id == account_id || t.destination_account_id == account_id)
            .filter(|t| before.is_none_or(|cursor| cursor.precedes(t)))
            .cloned()
            .collect();

        matching.sort_by(|a, b| {
            (b.created_at, b.transaction_id.to_string())
                .cmp(&(a.created_at, a.transaction_id.to_string()))
        });
        matching.truncate(limit);
        Ok(matching)
    }
}

#[derive(Default, Clone)]
struct Inner {
    accounts: HashMap<String, Account>,
    transfers: HashMap<TransactionId, Transfer>,
    references: HashMap<String, TransactionId>,
    entries: Vec<LedgerEntry>,
    next_entry_id: i64,
}

impl Inner {
    fn apply(&mut self, write: AtomicWrite) -> Result<(), TransferError> {
        match write {
            AtomicWrite::SaveTransfer(transfer) => self.save_transfer(transfer),
            AtomicWrite::InsertEntry(entry) => {
                self.insert_entry(entry);
                Ok(())
            }
            AtomicWrite::UpdateBalance { account, delta } => self.apply_balance(&account, delta),
        }
    }

    fn save_transfer(&mut self, transfer: Transfer) -> Result<(), TransferError> {
        if let Some(existing) = self.references.get(&transfer.reference_id)
            && *existing != transfer.transaction_id
        {
            return Err(TransferError::DuplicateReference(transfer.reference_id));
        }
        self.references
            .insert(transfer.reference_id.clone(), transfer.transaction_id);
        self.transfers.insert(transfer.transaction_id, transfer);
        Ok(())
    }

    fn insert_entry(&mut self, mut entry: LedgerEntry) {
        self.next_entry_id += 1;
        entry.id = Some(self.next_entry_id);
        self.entries.push(entry);
    }

    fn apply_balance(&mut self, snapshot: &Account, delta: i64) -> Result<(), TransferError> {
        let stored = match self.accounts.get_mut(&snapshot.account_id) {
            Some(stored) if stored.updated_at == snapshot.updated_at => stored,
            _ => return Err(TransferError::ConcurrentUpdate(snapshot.account_id.clone())),
        };

        let balance = stored.balance.checked_add(delta).ok_or_else(|| {
            TransferError::System(format!("balance overflow on {}", snapshot.account_id))
        })?;
        // Mirrors the balance CHECK constraint of the SQL schema
        if balance < 0 && !stored.is_system() {
            return Err(TransferError::BalanceCheckViolated(
                snapshot.account_id.clone(),
            ));
        }

        stored.balance = balance;
        stored.updated_at = next_timestamp(stored.updated_at);
        Ok(())
    }
}

/// Strictly later than `prev`, so every update invalidates older snapshots
fn next_timestamp(prev: DateTime<Utc>) -> DateTime<Utc> {
    let now = now_micros();
    if now > prev {
        now
    } else {
        prev + chrono::Duration::microseconds(1)
    }
}
