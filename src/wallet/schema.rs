use anyhow::Result;
use sqlx::PgPool;

/// Create the wallet tables and indexes. Safe to run on every start.
pub async fn init_schema(pool: &PgPool) -> Result<()> {
    tracing::info!("Initializing wallet schema...");

    for (name, ddl) in [
        ("accounts table", CREATE_ACCOUNTS_TABLE),
        ("transfers table", CREATE_TRANSFERS_TABLE),
        ("transfers account index", CREATE_TRANSFERS_SOURCE_INDEX),
        ("transfers account index", CREATE_TRANSFERS_DESTINATION_INDEX),
        ("transactions table", CREATE_TRANSACTIONS_TABLE),
        ("transactions index", CREATE_TRANSACTIONS_INDEX),
    ] {
        sqlx::query(ddl)
            .execute(pool)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to create {}: {}", name, e))?;
    }

    tracing::info!("Wallet schema initialized successfully");
    Ok(())
}

/// Balances in minor units. `updated_at` is the compare-and-swap token.
/// Only the `system` (holding) account may run a negative balance.
pub const CREATE_ACCOUNTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS accounts (
    id          BIGSERIAL PRIMARY KEY,
    account_id  VARCHAR(32) NOT NULL,
    name        VARCHAR(255) NOT NULL,
    type        VARCHAR(32) NOT NULL DEFAULT 'wallet',
    currency    VARCHAR(3) NOT NULL,
    balance     BIGINT NOT NULL DEFAULT 0,
    created_at  TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at  TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    CONSTRAINT uk_accounts_account_id UNIQUE (account_id),
    CONSTRAINT chk_accounts_balance CHECK (balance >= 0 OR type = 'system')
)
"#;

pub const CREATE_TRANSFERS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS transfers (
    id                      BIGSERIAL PRIMARY KEY,
    transaction_id          VARCHAR(26) NOT NULL,
    reference_id            VARCHAR(255) NOT NULL,
    tx_type                 VARCHAR(16) NOT NULL,
    status                  VARCHAR(16) NOT NULL,
    amount                  BIGINT NOT NULL CHECK (amount > 0),
    currency                VARCHAR(3) NOT NULL,
    source_account_id       VARCHAR(32) NOT NULL,
    source_account          JSONB NOT NULL DEFAULT '{}',
    destination_account_id  VARCHAR(32) NOT NULL,
    destination_account     JSONB NOT NULL DEFAULT '{}',
    note                    TEXT NOT NULL DEFAULT '',
    properties              JSONB NOT NULL DEFAULT '{}',
    created_at              TIMESTAMPTZ NOT NULL,
    updated_at              TIMESTAMPTZ NOT NULL,
    CONSTRAINT uk_transfers_transaction_id UNIQUE (transaction_id),
    CONSTRAINT uk_transfers_reference_id UNIQUE (reference_id)
)
"#;

pub const CREATE_TRANSFERS_SOURCE_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_transfers_source
    ON transfers (source_account_id, created_at DESC, transaction_id DESC)
"#;

pub const CREATE_TRANSFERS_DESTINATION_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_transfers_destination
    ON transfers (destination_account_id, created_at DESC, transaction_id DESC)
"#;

/// Ledger entries: append-only, one row per account touched
pub const CREATE_TRANSACTIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS transactions (
    id              BIGSERIAL PRIMARY KEY,
    transaction_id  VARCHAR(26) NOT NULL,
    account_id      VARCHAR(32) NOT NULL REFERENCES accounts (account_id),
    type            VARCHAR(8) NOT NULL CHECK (type IN ('debit', 'credit')),
    amount          BIGINT NOT NULL CHECK (amount >= 0),
    currency        VARCHAR(3) NOT NULL,
    note            TEXT NOT NULL DEFAULT '',
    timestamp       TIMESTAMPTZ NOT NULL,
    valued_at       TIMESTAMPTZ NOT NULL,
    created_at      TIMESTAMPTZ NOT NULL,
    updated_at      TIMESTAMPTZ NOT NULL
)
"#;

pub const CREATE_TRANSACTIONS_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_transactions_transaction_id
    ON transactions (transaction_id)
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_constraint_is_named() {
        // The store maps violations of this constraint to DuplicateReference
        assert!(CREATE_TRANSFERS_TABLE.contains("uk_transfers_reference_id UNIQUE (reference_id)"));
    }

    #[test]
    fn test_balance_cannot_go_negative() {
        assert!(CREATE_ACCOUNTS_TABLE.contains("CHECK (balance >= 0 OR type = 'system')"));
    }
}
