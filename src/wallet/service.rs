//! Wallet Service
//!
//! Request-level facade over the [`TransferEngine`]: turns the deposit,
//! withdrawal and peer-transfer request shapes into a [`TransferRequest`] of
//! the matching kind, and serves the account queries.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::engine::TransferEngine;
use super::error::TransferError;
use super::history::{self, TransferPage};
use super::store::{AccountStore, LedgerStore};
use super::types::{OperationKind, TransferOptions, TransferRequest, TransferView};
use crate::config::WalletConfig;

/// Money in from outside: holding account → `account_id`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositRequest {
    #[serde(rename = "idempotencyKey")]
    pub idempotency_key: String,
    #[serde(rename = "accountID")]
    pub account_id: String,
    pub amount: i64,
    pub currency: String,
    #[serde(default)]
    pub note: String,
}

/// Money out: `account_id` → holding account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawalRequest {
    #[serde(rename = "idempotencyKey")]
    pub idempotency_key: String,
    #[serde(rename = "accountID")]
    pub account_id: String,
    pub amount: i64,
    pub currency: String,
    #[serde(default)]
    pub note: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountRef {
    pub number: String,
}

/// Account to account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct P2pTransferRequest {
    #[serde(rename = "idempotencyKey")]
    pub idempotency_key: String,
    pub currency: String,
    pub amount: i64,
    #[serde(rename = "sourceAccount")]
    pub source_account: AccountRef,
    #[serde(rename = "destinationAccount")]
    pub destination_account: AccountRef,
    #[serde(default)]
    pub properties: Option<Value>,
    #[serde(default)]
    pub note: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountDetails {
    #[serde(rename = "accountID")]
    pub account_id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub account_type: String,
    pub currency: String,
    pub balance: i64,
}

pub struct WalletService {
    engine: Arc<TransferEngine>,
    max_deposit_amount: i64,
    request_timeout: Option<Duration>,
}

impl WalletService {
    pub fn new(engine: Arc<TransferEngine>, max_deposit_amount: i64) -> Self {
        Self {
            engine,
            max_deposit_amount,
            request_timeout: None,
        }
    }

    /// Build the engine and the service from the `wallet` config section
    pub fn from_config(
        accounts: Arc<dyn AccountStore>,
        ledger: Arc<dyn LedgerStore>,
        config: &WalletConfig,
    ) -> Self {
        let engine = TransferEngine::new(accounts, ledger, config.engine_config());
        Self::new(Arc::new(engine), config.max_deposit_amount)
    }

    /// Give every transfer call a deadline of `timeout` from its start
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn engine(&self) -> &Arc<TransferEngine> {
        &self.engine
    }

    pub async fn deposit(&self, req: &DepositRequest) -> Result<TransferView, TransferError> {
        if req.amount >= self.max_deposit_amount {
            return Err(TransferError::InvalidAmount);
        }
        let request = TransferRequest::new(&req.idempotency_key, &req.currency, req.amount)
            .to_account(&req.account_id)
            .with_note(&req.note);
        self.execute(&request, OperationKind::Deposit).await
    }

    pub async fn withdraw(&self, req: &WithdrawalRequest) -> Result<TransferView, TransferError> {
        let request = TransferRequest::new(&req.idempotency_key, &req.currency, req.amount)
            .from_account(&req.account_id)
            .with_note(&req.note);
        self.execute(&request, OperationKind::Withdrawal).await
    }

    pub async fn transfer(&self, req: &P2pTransferRequest) -> Result<TransferView, TransferError> {
        let mut request = TransferRequest::new(&req.idempotency_key, &req.currency, req.amount)
            .from_account(&req.source_account.number)
            .to_account(&req.destination_account.number)
            .with_note(&req.note);
        if let Some(properties) = &req.properties {
            request = request.with_properties(properties.clone());
        }
        self.execute(&request, OperationKind::P2pTransfer).await
    }

    pub async fn account_details(&self, account_id: &str) -> Result<AccountDetails, TransferError> {
        let account = self
            .engine
            .accounts()
            .find(account_id)
            .await?
            .ok_or_else(|| TransferError::AccountNotFound(account_id.to_string()))?;

        Ok(AccountDetails {
            account_id: account.account_id,
            name: account.name,
            account_type: account.account_type,
            currency: account.currency,
            balance: account.balance,
        })
    }

    pub async fn account_transactions(
        &self,
        account_id: &str,
        limit: Option<u32>,
        next_token: Option<&str>,
    ) -> Result<TransferPage, TransferError> {
        history::list_account_transfers(self.engine.ledger().as_ref(), account_id, limit, next_token)
            .await
    }

    async fn execute(
        &self,
        request: &TransferRequest,
        kind: OperationKind,
    ) -> Result<TransferView, TransferError> {
        let mut opts = TransferOptions::new(kind);
        if let Some(timeout) = self.request_timeout {
            opts = opts.with_timeout(timeout);
        }
        self.engine.create_transfer(request, &opts).await
    }
}
