//! Transfer Engine
//!
//! Executes one deposit, withdrawal or peer transfer exactly once per
//! idempotency key.
//!
//! # Flow
//!
//! ```text
//! find_by_reference ──found──▶ return stored record
//!        │
//!        ▼
//!   validate (amount, currency)
//!        │
//!        ▼
//! ┌─ retry ───────────────────────────────────────────┐
//! │ resolve accounts (fresh reads)                    │
//! │ run_atomic: save COMPLETED transfer, debit entry, │
//! │             credit entry, CAS source, CAS dest    │
//! └───────────────────────────────────────────────────┘
//!        │
//!        ▼
//! re-read by reference ──▶ TransferView
//! ```
//!
//! A failed outcome also re-reads by reference first: when a concurrent
//! request with the same key committed meanwhile, its record is returned.
//!
//! Nothing is persisted until the atomic unit commits, so a failed attempt
//! leaves no transfer row behind.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use super::error::TransferError;
use super::store::{AccountStore, LedgerStore, UnitOfWork};
use super::types::{
    Account, OperationKind, Transfer, TransferOptions, TransferRequest, TransferView, now_micros,
};
use crate::retry::{RetryError, RetryPolicy};

/// Engine settings fixed at construction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Counterpart of deposits (source) and withdrawals (destination)
    pub holding_account_id: String,
    pub supported_currencies: Vec<String>,
    pub retry: RetryPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            holding_account_id: "1000000001".to_string(),
            supported_currencies: vec!["MYR".to_string()],
            retry: RetryPolicy::default(),
        }
    }
}

/// Transfer Engine - idempotent, optimistic, all-or-nothing
pub struct TransferEngine {
    accounts: Arc<dyn AccountStore>,
    ledger: Arc<dyn LedgerStore>,
    config: EngineConfig,
}

impl TransferEngine {
    pub fn new(
        accounts: Arc<dyn AccountStore>,
        ledger: Arc<dyn LedgerStore>,
        config: EngineConfig,
    ) -> Self {
        Self {
            accounts,
            ledger,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn accounts(&self) -> &Arc<dyn AccountStore> {
        &self.accounts
    }

    pub fn ledger(&self) -> &Arc<dyn LedgerStore> {
        &self.ledger
    }

    /// Execute a transfer, or return the one already recorded for
    /// `req.idempotency_key`.
    pub async fn create_transfer(
        &self,
        req: &TransferRequest,
        opts: &TransferOptions,
    ) -> Result<TransferView, TransferError> {
        let reference_id = req.idempotency_key.as_str();

        if let Some(existing) = self.ledger.find_by_reference(reference_id).await? {
            info!(
                reference_id = %reference_id,
                transaction_id = %existing.transaction_id,
                "IDEMPOTENCY: transfer already recorded"
            );
            return Ok(existing.view());
        }

        let record = Transfer::processing(req, opts.kind);
        self.validate(&record)?;
        debug!(
            reference_id = %reference_id,
            transaction_id = %record.transaction_id,
            kind = %record.kind,
            amount = record.amount,
            "Transfer accepted"
        );

        let record = &record;
        let outcome = self
            .config
            .retry
            .run_until(
                opts.deadline,
                move || self.attempt(record),
                |e: &TransferError| !e.is_retryable(),
            )
            .await;

        match outcome {
            Ok(()) => {
                info!(
                    reference_id = %reference_id,
                    transaction_id = %record.transaction_id,
                    kind = %record.kind,
                    "Transfer completed"
                );
            }
            Err(RetryError::Known {
                error: TransferError::DuplicateReference(_),
                ..
            }) => {
                info!(
                    reference_id = %reference_id,
                    "IDEMPOTENCY: concurrent request won, replaying its record"
                );
            }
            Err(RetryError::Known { attempts, error }) => {
                if let Some(view) = self.replay_recorded(reference_id).await? {
                    return Ok(view);
                }
                warn!(
                    reference_id = %reference_id,
                    attempts,
                    code = error.code(),
                    "Transfer rejected: {}",
                    error
                );
                return Err(error);
            }
            Err(RetryError::Exhausted { attempts, last }) => {
                if let Some(view) = self.replay_recorded(reference_id).await? {
                    return Ok(view);
                }
                error!(
                    reference_id = %reference_id,
                    attempts,
                    "Transfer failed after retries: {}",
                    last
                );
                return Err(TransferError::RetriesExhausted {
                    attempts,
                    last: Box::new(last),
                });
            }
            Err(RetryError::DeadlineExceeded { attempts, last }) => {
                if let Some(view) = self.replay_recorded(reference_id).await? {
                    return Ok(view);
                }
                warn!(reference_id = %reference_id, attempts, "Transfer deadline exceeded");
                return Err(TransferError::DeadlineExceeded {
                    attempts,
                    last: last.map(Box::new),
                });
            }
        }

        self.finalize(reference_id).await
    }

    /// A request that lost a same-key race may fail on balances the winner
    /// already moved. The winner's record is the answer in that case.
    async fn replay_recorded(&self, reference_id: &str) -> Result<Option<TransferView>, TransferError> {
        let Some(existing) = self.ledger.find_by_reference(reference_id).await? else {
            return Ok(None);
        };
        info!(
            reference_id = %reference_id,
            transaction_id = %existing.transaction_id,
            "IDEMPOTENCY: failed attempt superseded by recorded transfer"
        );
        Ok(Some(existing.view()))
    }

    fn validate(&self, record: &Transfer) -> Result<(), TransferError> {
        if record.amount <= 0 {
            return Err(TransferError::InvalidAmount);
        }
        if !self
            .config
            .supported_currencies
            .iter()
            .any(|c| *c == record.currency)
        {
            return Err(TransferError::InvalidCurrency);
        }
        Ok(())
    }

    /// One attempt: fresh account reads, then a single atomic unit.
    async fn attempt(&self, record: &Transfer) -> Result<(), TransferError> {
        let (source, destination) = self.resolve_accounts(record).await?;

        let mut transfer = record.clone();
        transfer.source_account_id = source.account_id.clone();
        transfer.source_account = source.snapshot();
        transfer.destination_account_id = destination.account_id.clone();
        transfer.destination_account = destination.snapshot();
        transfer.complete(now_micros())?;

        let amount = transfer.amount;
        let [debit, credit] = transfer.ledger_entries();

        // Transfer row first: a same-key race aborts before any balance moves
        let unit = UnitOfWork::new()
            .save_transfer(transfer)
            .insert_entry(debit)
            .insert_entry(credit)
            .update_balance(source, -amount)
            .update_balance(destination, amount);

        self.ledger.run_atomic(unit).await.inspect_err(|e| {
            if e.is_retryable() {
                debug!(
                    transaction_id = %record.transaction_id,
                    "Attempt failed, will retry: {}",
                    e
                );
            }
        })
    }

    /// Pick (source, destination) for the operation kind and check both.
    async fn resolve_accounts(&self, record: &Transfer) -> Result<(Account, Account), TransferError> {
        let holding = self.config.holding_account_id.as_str();

        match record.kind {
            OperationKind::Withdrawal => {
                if record.source_account_id == holding {
                    return Err(TransferError::InvalidSourceAccount);
                }
                let source = self
                    .load(&record.source_account_id, TransferError::InvalidSourceAccount)
                    .await?;
                self.check_currency(record, &source)?;
                check_funds(record, &source)?;
                let destination = self
                    .load(holding, TransferError::InvalidDestinationAccount)
                    .await?;
                self.check_currency(record, &destination)?;
                Ok((source, destination))
            }
            OperationKind::P2pTransfer => {
                let source = self
                    .load(&record.source_account_id, TransferError::InvalidSourceAccount)
                    .await?;
                self.check_currency(record, &source)?;
                check_funds(record, &source)?;
                if record.destination_account_id == source.account_id {
                    return Err(TransferError::InvalidDestinationAccount);
                }
                let destination = self
                    .load(
                        &record.destination_account_id,
                        TransferError::InvalidDestinationAccount,
                    )
                    .await?;
                self.check_currency(record, &destination)?;
                Ok((source, destination))
            }
            OperationKind::Deposit => {
                let source = self.load(holding, TransferError::InvalidSourceAccount).await?;
                self.check_currency(record, &source)?;
                let destination = self
                    .load(
                        &record.destination_account_id,
                        TransferError::InvalidDestinationAccount,
                    )
                    .await?;
                self.check_currency(record, &destination)?;
                if destination.account_id == source.account_id {
                    return Err(TransferError::InvalidDestinationAccount);
                }
                Ok((source, destination))
            }
        }
    }

    async fn load(&self, account_id: &str, missing: TransferError) -> Result<Account, TransferError> {
        if account_id.is_empty() {
            return Err(missing);
        }
        self.accounts.find(account_id).await?.ok_or(missing)
    }

    fn check_currency(&self, record: &Transfer, account: &Account) -> Result<(), TransferError> {
        if account.currency != record.currency {
            return Err(TransferError::InvalidCurrency);
        }
        Ok(())
    }

    async fn finalize(&self, reference_id: &str) -> Result<TransferView, TransferError> {
        self.ledger
            .find_by_reference(reference_id)
            .await?
            .map(|t| t.view())
            .ok_or_else(|| TransferError::TransferNotFound(reference_id.to_string()))
    }
}

fn check_funds(record: &Transfer, source: &Account) -> Result<(), TransferError> {
    if source.balance < record.amount {
        return Err(TransferError::InsufficientBalance);
    }
    Ok(())
}
