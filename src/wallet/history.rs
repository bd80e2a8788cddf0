//! Account History
//!
//! Keyset-paginated listing of the transfers touching one account, newest
//! first. The page token is opaque to callers: base64 of the JSON
//! [`PageCursor`] of the last row returned.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::TransferError;
use super::state::TransferStatus;
use super::store::{LedgerStore, PageCursor};
use super::types::{OperationKind, Transfer};

pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const MAX_PAGE_SIZE: u32 = 100;

/// One transfer as seen from the listed account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryItem {
    #[serde(rename = "transactionID")]
    pub transaction_id: String,
    #[serde(rename = "txType")]
    pub kind: OperationKind,
    pub status: TransferStatus,
    /// Negative when the listed account paid
    pub amount: i64,
    pub currency: String,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    pub note: String,
}

impl HistoryItem {
    pub fn for_account(transfer: &Transfer, account_id: &str) -> Self {
        let amount = if transfer.source_account_id == account_id {
            -transfer.amount
        } else {
            transfer.amount
        };

        Self {
            transaction_id: transfer.transaction_id.to_string(),
            kind: transfer.kind,
            status: transfer.status,
            amount,
            currency: transfer.currency.clone(),
            created_at: transfer.created_at,
            note: transfer.note.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferPage {
    pub data: Vec<HistoryItem>,
    #[serde(rename = "nextToken", skip_serializing_if = "Option::is_none", default)]
    pub next_token: Option<String>,
}

pub fn encode_cursor(cursor: &PageCursor) -> Result<String, TransferError> {
    let json = serde_json::to_vec(cursor)?;
    Ok(STANDARD.encode(json))
}

pub fn decode_cursor(token: &str) -> Result<PageCursor, TransferError> {
    let bytes = STANDARD
        .decode(token)
        .map_err(|e| TransferError::InvalidCursor(e.to_string()))?;
    serde_json::from_slice(&bytes).map_err(|e| TransferError::InvalidCursor(e.to_string()))
}

/// List one page of `account_id`'s transfers.
///
/// `limit` defaults to [`DEFAULT_PAGE_SIZE`]. A full page always carries a
/// token, even when nothing follows; a short page never does.
pub async fn list_account_transfers(
    ledger: &dyn LedgerStore,
    account_id: &str,
    limit: Option<u32>,
    next_token: Option<&str>,
) -> Result<TransferPage, TransferError> {
    let limit = limit.unwrap_or(DEFAULT_PAGE_SIZE);
    if !(1..=MAX_PAGE_SIZE).contains(&limit) {
        return Err(TransferError::InvalidPageSize(limit));
    }

    let cursor = match next_token.filter(|t| !t.is_empty()) {
        Some(token) => Some(decode_cursor(token)?),
        None => None,
    };

    let transfers = ledger
        .list_by_account(account_id, limit as usize, cursor.as_ref())
        .await?;

    let next_token = match transfers.last() {
        Some(last) if transfers.len() == limit as usize => {
            Some(encode_cursor(&PageCursor::after(last))?)
        }
        _ => None,
    };

    Ok(TransferPage {
        data: transfers
            .iter()
            .map(|t| HistoryItem::for_account(t, account_id))
            .collect(),
        next_token,
    })
}
