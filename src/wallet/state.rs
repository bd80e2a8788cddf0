//! Transfer Status and Ledger Direction
//!
//! String forms match the PostgreSQL columns (`transfers.status`,
//! `transactions.type`).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Transfer lifecycle
///
/// ```text
/// PROCESSING ──(atomic unit commits)──▶ COMPLETED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransferStatus {
    /// Synthesized, balances not yet touched
    Processing,
    /// Terminal: both balances and both ledger entries committed
    Completed,
}

impl TransferStatus {
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransferStatus::Completed)
    }

    /// Status never regresses and COMPLETED is final.
    pub fn can_transition_to(&self, next: TransferStatus) -> bool {
        matches!(
            (self, next),
            (TransferStatus::Processing, TransferStatus::Completed)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransferStatus::Processing => "PROCESSING",
            TransferStatus::Completed => "COMPLETED",
        }
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TransferStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PROCESSING" => Ok(TransferStatus::Processing),
            "COMPLETED" => Ok(TransferStatus::Completed),
            other => Err(format!("unknown transfer status: {}", other)),
        }
    }
}

/// Side of a ledger entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryDirection {
    Debit,
    Credit,
}

impl EntryDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryDirection::Debit => "debit",
            EntryDirection::Credit => "credit",
        }
    }
}

impl fmt::Display for EntryDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for EntryDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "debit" => Ok(EntryDirection::Debit),
            "credit" => Ok(EntryDirection::Credit),
            other => Err(format!("unknown entry direction: {}", other)),
        }
    }
}
