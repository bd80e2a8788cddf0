//! Wallet Ledger - exactly-once money movement between wallet accounts
//!
//! # Modules
//!
//! - [`wallet`] - Transfer engine, stores, double-entry ledger, history
//! - [`retry`] - Bounded fixed-delay retry with deadlines
//! - [`db`] - PostgreSQL connection pool
//! - [`config`] - YAML application config
//! - [`logging`] - tracing subscriber setup

pub mod config;
pub mod db;
pub mod logging;
pub mod retry;
pub mod wallet;

// Convenient re-exports at crate root
pub use retry::{RetryError, RetryPolicy};
pub use wallet::{
    Account, EngineConfig, InMemoryWalletStore, OperationKind, PgWalletStore, TransferEngine,
    TransferError, TransferOptions, TransferRequest, TransferView, WalletService,
};
