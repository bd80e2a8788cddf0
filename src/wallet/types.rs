//! Wallet Core Types
//!
//! Accounts, transfers and ledger entries as the engine sees them, plus the
//! normalized request the engine accepts.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::time::Instant;

use super::error::TransferError;
use super::state::{EntryDirection, TransferStatus};

/// Transaction ID - ULID-based, sortable, no coordination needed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransactionId(ulid::Ulid);

impl TransactionId {
    pub fn new() -> Self {
        Self(ulid::Ulid::new())
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TransactionId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(ulid::Ulid::from_string(s)?))
    }
}

/// Wall clock at the precision PostgreSQL stores
pub fn now_micros() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Which way money moves relative to the holding account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationKind {
    /// Caller account → holding account
    #[serde(rename = "WITHDRAWAL")]
    Withdrawal,
    /// Caller source → caller destination
    #[serde(rename = "TRANSFER")]
    P2pTransfer,
    /// Holding account → caller account
    #[serde(rename = "DEPOSIT")]
    Deposit,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Withdrawal => "WITHDRAWAL",
            OperationKind::P2pTransfer => "TRANSFER",
            OperationKind::Deposit => "DEPOSIT",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for OperationKind {
    type Err = TransferError;

    /// Unknown kinds are a wiring mistake, not a business failure.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "WITHDRAWAL" => Ok(OperationKind::Withdrawal),
            "TRANSFER" | "P2P_TRANSFER" => Ok(OperationKind::P2pTransfer),
            "DEPOSIT" => Ok(OperationKind::Deposit),
            other => Err(TransferError::Configuration(format!(
                "unsupported operation kind: {}",
                other
            ))),
        }
    }
}

/// Account type of the holding account. Its balance may go negative: it
/// stands for money outside the system.
pub const SYSTEM_ACCOUNT_TYPE: &str = "system";

/// Wallet account row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub account_id: String,
    pub name: String,
    pub account_type: String,
    pub currency: String,
    /// Minor currency units
    pub balance: i64,
    pub created_at: DateTime<Utc>,
    /// Compare-and-swap token for balance updates
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// New `wallet` account, timestamps set to now
    pub fn new(
        account_id: impl Into<String>,
        name: impl Into<String>,
        currency: impl Into<String>,
        balance: i64,
    ) -> Self {
        let now = now_micros();
        Self {
            account_id: account_id.into(),
            name: name.into(),
            account_type: "wallet".to_string(),
            currency: currency.into(),
            balance,
            created_at: now,
            updated_at: now,
        }
    }

    /// Holding account with a zero balance
    pub fn system(account_id: impl Into<String>, currency: impl Into<String>) -> Self {
        let mut account = Self::new(account_id, "Holding Account", currency, 0);
        account.account_type = SYSTEM_ACCOUNT_TYPE.to_string();
        account
    }

    pub fn is_system(&self) -> bool {
        self.account_type == SYSTEM_ACCOUNT_TYPE
    }

    /// Public identity captured on the transfer at execution time
    pub fn snapshot(&self) -> Value {
        json!({ "number": self.account_id })
    }
}

/// Transfer record
#[derive(Debug, Clone, PartialEq)]
pub struct Transfer {
    pub transaction_id: TransactionId,
    /// Caller idempotency key, unique across all transfers
    pub reference_id: String,
    pub kind: OperationKind,
    pub status: TransferStatus,
    pub amount: i64,
    pub currency: String,
    pub source_account_id: String,
    pub source_account: Value,
    pub destination_account_id: String,
    pub destination_account: Value,
    pub note: String,
    pub properties: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transfer {
    /// PROCESSING record for a fresh request. Account ids the request leaves
    /// out are filled in during account resolution.
    pub fn processing(req: &TransferRequest, kind: OperationKind) -> Self {
        let now = now_micros();
        Self {
            transaction_id: TransactionId::new(),
            reference_id: req.idempotency_key.clone(),
            kind,
            status: TransferStatus::Processing,
            amount: req.amount,
            currency: req.currency.clone(),
            source_account_id: req.source_account_id.clone().unwrap_or_default(),
            source_account: json!({}),
            destination_account_id: req.destination_account_id.clone().unwrap_or_default(),
            destination_account: json!({}),
            note: req.note.clone(),
            properties: req.properties.clone(),
            created_at: now,
            updated_at: now,
        }
    }

    /// PROCESSING → COMPLETED. Any other move is refused.
    pub fn complete(&mut self, now: DateTime<Utc>) -> Result<(), TransferError> {
        if !self.status.can_transition_to(TransferStatus::Completed) {
            return Err(TransferError::System(format!(
                "transfer {} cannot move from {} to {}",
                self.transaction_id,
                self.status,
                TransferStatus::Completed
            )));
        }
        self.status = TransferStatus::Completed;
        self.updated_at = now;
        Ok(())
    }

    /// Debit on the source and credit on the destination, stamped with the
    /// transfer's creation time.
    pub fn ledger_entries(&self) -> [LedgerEntry; 2] {
        let entry = |account_id: &str, direction, note: String| LedgerEntry {
            id: None,
            transaction_id: self.transaction_id,
            account_id: account_id.to_string(),
            direction,
            amount: self.amount,
            currency: self.currency.clone(),
            note,
            timestamp: self.created_at,
            valued_at: self.created_at,
            created_at: self.created_at,
            updated_at: self.created_at,
        };

        [
            entry(
                &self.source_account_id,
                EntryDirection::Debit,
                format!("Transfer to {}", self.destination_account_id),
            ),
            entry(
                &self.destination_account_id,
                EntryDirection::Credit,
                format!("Transfer from {}", self.source_account_id),
            ),
        ]
    }

    pub fn view(&self) -> TransferView {
        TransferView {
            idempotency_key: self.reference_id.clone(),
            transaction_id: self.transaction_id.to_string(),
            amount: self.amount,
            currency: self.currency.clone(),
            status: self.status,
        }
    }
}

/// Immutable ledger row, one per account touched by a transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    /// Assigned by the store on insert
    pub id: Option<i64>,
    pub transaction_id: TransactionId,
    pub account_id: String,
    pub direction: EntryDirection,
    pub amount: i64,
    pub currency: String,
    pub note: String,
    pub timestamp: DateTime<Utc>,
    pub valued_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Normalized request handed to the engine by the request layer
#[derive(Debug, Clone, PartialEq)]
pub struct TransferRequest {
    pub idempotency_key: String,
    pub currency: String,
    /// Minor units, must be positive
    pub amount: i64,
    /// Required for WITHDRAWAL and TRANSFER
    pub source_account_id: Option<String>,
    /// Required for DEPOSIT and TRANSFER
    pub destination_account_id: Option<String>,
    pub note: String,
    pub properties: Value,
}

impl TransferRequest {
    pub fn new(idempotency_key: impl Into<String>, currency: impl Into<String>, amount: i64) -> Self {
        Self {
            idempotency_key: idempotency_key.into(),
            currency: currency.into(),
            amount,
            source_account_id: None,
            destination_account_id: None,
            note: String::new(),
            properties: json!({}),
        }
    }

    pub fn from_account(mut self, account_id: impl Into<String>) -> Self {
        self.source_account_id = Some(account_id.into());
        self
    }

    pub fn to_account(mut self, account_id: impl Into<String>) -> Self {
        self.destination_account_id = Some(account_id.into());
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = note.into();
        self
    }

    pub fn with_properties(mut self, properties: Value) -> Self {
        self.properties = properties;
        self
    }
}

/// Per-call engine options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferOptions {
    pub kind: OperationKind,
    /// Caller deadline, applied to every attempt and retry sleep
    pub deadline: Option<Instant>,
}

impl TransferOptions {
    pub fn new(kind: OperationKind) -> Self {
        Self {
            kind,
            deadline: None,
        }
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }
}

/// Finalized transfer as returned to callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferView {
    #[serde(rename = "idempotencyKey")]
    pub idempotency_key: String,
    #[serde(rename = "transactionID")]
    pub transaction_id: String,
    pub amount: i64,
    pub currency: String,
    pub status: TransferStatus,
}
