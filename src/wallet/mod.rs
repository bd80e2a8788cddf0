//! Wallet Transfers
//!
//! Deposits, withdrawals and peer transfers between wallet accounts, applied
//! exactly once per idempotency key and recorded in a double-entry ledger.
//!
//! # Architecture
//!
//! - **Account Store**: account reads and compare-and-swap balance updates
//! - **Ledger Store**: transfer rows, ledger entries, atomic units, history
//! - **Transfer Engine**: idempotency, account selection, bounded retry
//!
//! Both stores have a PostgreSQL implementation ([`PgWalletStore`]) and an
//! in-memory one ([`InMemoryWalletStore`]).
//!
//! # Safety Invariants
//!
//! 1. **Exactly Once**: one COMPLETED transfer per `reference_id`
//! 2. **Double Entry**: every transfer has one debit and one credit of its amount
//! 3. **No Overdraft**: wallet balances never go below zero
//! 4. **Optimistic Concurrency**: a balance write matches the `updated_at` it read

pub mod db;
pub mod engine;
pub mod error;
pub mod history;
pub mod memory;
pub mod schema;
pub mod service;
pub mod state;
pub mod store;
pub mod types;

mod integration_tests;

// Re-exports for convenience
pub use db::PgWalletStore;
pub use engine::{EngineConfig, TransferEngine};
pub use error::TransferError;
pub use history::{HistoryItem, TransferPage, list_account_transfers};
pub use memory::InMemoryWalletStore;
pub use service::{
    AccountDetails, AccountRef, DepositRequest, P2pTransferRequest, WalletService,
    WithdrawalRequest,
};
pub use state::{EntryDirection, TransferStatus};
pub use store::{AccountStore, AtomicWrite, LedgerStore, PageCursor, UnitOfWork};
pub use types::{
    Account, LedgerEntry, OperationKind, TransactionId, Transfer, TransferOptions,
    TransferRequest, TransferView,
};
