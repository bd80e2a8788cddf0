use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;

use crate::retry::RetryPolicy;
use crate::wallet::EngineConfig;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    /// PostgreSQL connection URL for accounts and the ledger
    #[serde(default)]
    pub postgres_url: Option<String>,
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub wallet: WalletConfig,
}

/// Ledger connection pool sizing
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct PoolConfig {
    /// Upper bound on transfers committing at the same time
    pub max_connections: u32,
    pub acquire_timeout_secs: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 20,
            acquire_timeout_secs: 5,
        }
    }
}

/// Transfer engine settings
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct WalletConfig {
    /// System account on the other side of every deposit and withdrawal
    pub holding_account_id: String,
    pub supported_currencies: Vec<String>,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    /// Deposits must stay strictly below this amount (minor units)
    pub max_deposit_amount: i64,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            holding_account_id: "1000000001".to_string(),
            supported_currencies: vec!["MYR".to_string()],
            max_retries: 3,
            retry_delay_ms: 100,
            max_deposit_amount: 9_999_999_999,
        }
    }
}

impl WalletConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, Duration::from_millis(self.retry_delay_ms))
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            holding_account_id: self.holding_account_id.clone(),
            supported_currencies: self.supported_currencies.clone(),
            retry: self.retry_policy(),
        }
    }
}

impl AppConfig {
    pub fn load(env: &str) -> anyhow::Result<Self> {
        let config_path = format!("config/{}.yaml", env);
        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path))?;
        Self::from_yaml(&content).with_context(|| format!("Failed to parse {}", config_path))
    }

    pub fn from_yaml(content: &str) -> anyhow::Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }
}
