//! Wallet Database Layer
//!
//! PostgreSQL-backed [`AccountStore`] and [`LedgerStore`].
//!
//! Balance updates are compare-and-swap on `accounts.updated_at`; an atomic
//! unit runs inside one `BEGIN ... COMMIT` and rolls back on the first error
//! (or when the transaction is dropped).

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgExecutor, PgPool, Row};
use tracing::debug;

use super::error::TransferError;
use super::state::{EntryDirection, TransferStatus};
use super::store::{AccountStore, AtomicWrite, LedgerStore, PageCursor, UnitOfWork};
use super::types::{Account, LedgerEntry, OperationKind, TransactionId, Transfer};

/// Unique constraint on `transfers.reference_id`, see `schema.rs`
const REFERENCE_CONSTRAINT: &str = "uk_transfers_reference_id";

/// Non-negative balance check on `accounts`, see `schema.rs`
const BALANCE_CONSTRAINT: &str = "chk_accounts_balance";

const TRANSFER_COLUMNS: &str = r#"
    transaction_id, reference_id, tx_type, status, amount, currency,
    source_account_id, source_account, destination_account_id, destination_account,
    note, properties, created_at, updated_at
"#;

/// Wallet store operations on PostgreSQL
#[derive(Clone)]
pub struct PgWalletStore {
    pool: PgPool,
}

impl PgWalletStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Seed an account. Existing ids are left untouched.
    ///
    /// Returns true if the account was inserted.
    pub async fn open_account(&self, account: &Account) -> Result<bool, TransferError> {
        let result = sqlx::query(
            r#"
            INSERT INTO accounts (account_id, name, type, currency, balance, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (account_id) DO NOTHING
            "#,
        )
        .bind(&account.account_id)
        .bind(&account.name)
        .bind(&account.account_type)
        .bind(&account.currency)
        .bind(account.balance)
        .bind(account.created_at)
        .bind(account.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl AccountStore for PgWalletStore {
    async fn find(&self, account_id: &str) -> Result<Option<Account>, TransferError> {
        let row = sqlx::query(
            r#"
            SELECT account_id, name, type, currency, balance, created_at, updated_at
            FROM accounts
            WHERE account_id = $1
            "#,
        )
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_account).transpose()
    }

    async fn update_balance(&self, account: &Account, delta: i64) -> Result<(), TransferError> {
        cas_balance(&self.pool, account, delta).await
    }
}

#[async_trait]
impl LedgerStore for PgWalletStore {
    async fn find_by_reference(
        &self,
        reference_id: &str,
    ) -> Result<Option<Transfer>, TransferError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM transfers WHERE reference_id = $1",
            TRANSFER_COLUMNS
        ))
        .bind(reference_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_transfer).transpose()
    }

    async fn run_atomic(&self, unit: UnitOfWork) -> Result<(), TransferError> {
        let writes = unit.len();
        let mut tx = self.pool.begin().await?;

        for write in unit {
            match write {
                AtomicWrite::SaveTransfer(transfer) => save_transfer(&mut *tx, &transfer).await?,
                AtomicWrite::InsertEntry(entry) => insert_entry(&mut *tx, &entry).await?,
                AtomicWrite::UpdateBalance { account, delta } => {
                    cas_balance(&mut *tx, &account, delta).await?
                }
            }
        }

        tx.commit().await?;
        debug!(writes, "Atomic unit committed");
        Ok(())
    }

    async fn find_entries(
        &self,
        transaction_id: TransactionId,
    ) -> Result<Vec<LedgerEntry>, TransferError> {
        let rows = sqlx::query(
            r#"
            SELECT id, transaction_id, account_id, type, amount, currency, note,
                   timestamp, valued_at, created_at, updated_at
            FROM transactions
            WHERE transaction_id = $1
            ORDER BY id ASC
            "#,
        )
        .bind(transaction_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_entry).collect()
    }

    async fn list_by_account(
        &self,
        account_id: &str,
        limit: usize,
        before: Option<&PageCursor>,
    ) -> Result<Vec<Transfer>, TransferError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {}
            FROM transfers
            WHERE (source_account_id = $1 OR destination_account_id = $1)
              AND ($2::timestamptz IS NULL OR (created_at, transaction_id) < ($2, $3::varchar))
            ORDER BY created_at DESC, transaction_id DESC
            LIMIT $4
            "#,
            TRANSFER_COLUMNS
        ))
        .bind(account_id)
        .bind(before.map(|c| c.last_timestamp))
        .bind(before.map(|c| c.last_id.clone()))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_transfer).collect()
    }
}

/// Compare-and-swap balance update. Zero rows matched means another writer
/// touched the account after `account` was read.
async fn cas_balance<'e, E>(executor: E, account: &Account, delta: i64) -> Result<(), TransferError>
where
    E: PgExecutor<'e>,
{
    let result = sqlx::query(
        r#"
        UPDATE accounts
        SET balance = balance + $1,
            updated_at = GREATEST(clock_timestamp(), updated_at + INTERVAL '1 microsecond')
        WHERE account_id = $2 AND updated_at = $3
        "#,
    )
    .bind(delta)
    .bind(&account.account_id)
    .bind(account.updated_at)
    .execute(executor)
    .await
    .map_err(|e| map_balance_violation(e, &account.account_id))?;

    if result.rows_affected() == 0 {
        return Err(TransferError::ConcurrentUpdate(account.account_id.clone()));
    }
    Ok(())
}

/// Insert a transfer, or overwrite its mutable fields by `transaction_id`
async fn save_transfer<'e, E>(executor: E, transfer: &Transfer) -> Result<(), TransferError>
where
    E: PgExecutor<'e>,
{
    sqlx::query(
        r#"
        INSERT INTO transfers
            (transaction_id, reference_id, tx_type, status, amount, currency,
             source_account_id, source_account, destination_account_id, destination_account,
             note, properties, created_at, updated_at)
        VALUES
            ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
        ON CONFLICT (transaction_id) DO UPDATE SET
            status = EXCLUDED.status,
            source_account_id = EXCLUDED.source_account_id,
            source_account = EXCLUDED.source_account,
            destination_account_id = EXCLUDED.destination_account_id,
            destination_account = EXCLUDED.destination_account,
            updated_at = EXCLUDED.updated_at
        "#,
    )
    .bind(transfer.transaction_id.to_string())
    .bind(&transfer.reference_id)
    .bind(transfer.kind.as_str())
    .bind(transfer.status.as_str())
    .bind(transfer.amount)
    .bind(&transfer.currency)
    .bind(&transfer.source_account_id)
    .bind(&transfer.source_account)
    .bind(&transfer.destination_account_id)
    .bind(&transfer.destination_account)
    .bind(&transfer.note)
    .bind(&transfer.properties)
    .bind(transfer.created_at)
    .bind(transfer.updated_at)
    .execute(executor)
    .await
    .map_err(|e| map_reference_violation(e, &transfer.reference_id))?;

    Ok(())
}

async fn insert_entry<'e, E>(executor: E, entry: &LedgerEntry) -> Result<(), TransferError>
where
    E: PgExecutor<'e>,
{
    sqlx::query(
        r#"
        INSERT INTO transactions
            (transaction_id, account_id, type, amount, currency, note,
             timestamp, valued_at, created_at, updated_at)
        VALUES
            ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        "#,
    )
    .bind(entry.transaction_id.to_string())
    .bind(&entry.account_id)
    .bind(entry.direction.as_str())
    .bind(entry.amount)
    .bind(&entry.currency)
    .bind(&entry.note)
    .bind(entry.timestamp)
    .bind(entry.valued_at)
    .bind(entry.created_at)
    .bind(entry.updated_at)
    .execute(executor)
    .await?;

    Ok(())
}

fn map_reference_violation(e: sqlx::Error, reference_id: &str) -> TransferError {
    if let Some(db_err) = e.as_database_error()
        && db_err.is_unique_violation()
        && db_err.constraint() == Some(REFERENCE_CONSTRAINT)
    {
        return TransferError::DuplicateReference(reference_id.to_string());
    }
    e.into()
}

fn map_balance_violation(e: sqlx::Error, account_id: &str) -> TransferError {
    if let Some(db_err) = e.as_database_error()
        && db_err.is_check_violation()
        && db_err.constraint() == Some(BALANCE_CONSTRAINT)
    {
        return TransferError::BalanceCheckViolated(account_id.to_string());
    }
    e.into()
}

fn row_to_account(row: &PgRow) -> Result<Account, TransferError> {
    Ok(Account {
        account_id: row.try_get("account_id")?,
        name: row.try_get("name")?,
        account_type: row.try_get("type")?,
        currency: row.try_get("currency")?,
        balance: row.try_get("balance")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_transfer(row: &PgRow) -> Result<Transfer, TransferError> {
    let transaction_id = parse_transaction_id(row)?;

    let kind_str: String = row.try_get("tx_type")?;
    let kind: OperationKind = kind_str
        .parse()
        .map_err(|_| TransferError::System(format!("Invalid tx_type: {}", kind_str)))?;

    let status_str: String = row.try_get("status")?;
    let status: TransferStatus = status_str.parse().map_err(TransferError::System)?;

    Ok(Transfer {
        transaction_id,
        reference_id: row.try_get("reference_id")?,
        kind,
        status,
        amount: row.try_get("amount")?,
        currency: row.try_get("currency")?,
        source_account_id: row.try_get("source_account_id")?,
        source_account: row.try_get("source_account")?,
        destination_account_id: row.try_get("destination_account_id")?,
        destination_account: row.try_get("destination_account")?,
        note: row.try_get("note")?,
        properties: row.try_get("properties")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_entry(row: &PgRow) -> Result<LedgerEntry, TransferError> {
    let direction_str: String = row.try_get("type")?;
    let direction: EntryDirection = direction_str.parse().map_err(TransferError::System)?;

    Ok(LedgerEntry {
        id: Some(row.try_get("id")?),
        transaction_id: parse_transaction_id(row)?,
        account_id: row.try_get("account_id")?,
        direction,
        amount: row.try_get("amount")?,
        currency: row.try_get("currency")?,
        note: row.try_get("note")?,
        timestamp: row.try_get("timestamp")?,
        valued_at: row.try_get("valued_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn parse_transaction_id(row: &PgRow) -> Result<TransactionId, TransferError> {
    let raw: String = row.try_get("transaction_id")?;
    raw.parse()
        .map_err(|_| TransferError::System(format!("Invalid transaction_id format: {}", raw)))
}
