//! Configuration for the ledger

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Ledger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Data directory for RocksDB
    pub data_dir: PathBuf,

    /// Service name
    pub service_name: String,

    /// RocksDB configuration
    pub rocksdb: RocksDBConfig,

    /// Transaction configuration
    pub transactions: TransactionConfig,

    /// Whether balances may go negative
    pub overdraft: OverdraftPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data/ledger"),
            service_name: "ledger-engine".to_string(),
            rocksdb: RocksDBConfig::default(),
            transactions: TransactionConfig::default(),
            overdraft: OverdraftPolicy::default(),
        }
    }
}

/// RocksDB configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RocksDBConfig {
    /// Write buffer size (MB)
    pub write_buffer_size_mb: usize,

    /// Max write buffers
    pub max_write_buffer_number: i32,

    /// Max background jobs (compaction + flush)
    pub max_background_jobs: i32,

    /// Enable statistics
    pub enable_statistics: bool,
}

impl Default for RocksDBConfig {
    fn default() -> Self {
        Self {
            write_buffer_size_mb: 64,
            max_write_buffer_number: 4,
            max_background_jobs: 4,
            enable_statistics: false,
        }
    }
}

/// Transaction configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransactionConfig {
    /// Longest wait for a single row lock (milliseconds)
    pub lock_timeout_ms: u64,

    /// Let the store detect lock cycles instead of waiting out the timeout
    pub deadlock_detect: bool,

    /// Deadline applied to transfers that don't carry their own (milliseconds)
    pub default_deadline_ms: Option<u64>,
}

impl TransactionConfig {
    /// Lock wait bound
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    /// Default per-transfer deadline
    pub fn default_deadline(&self) -> Option<Duration> {
        self.default_deadline_ms.map(Duration::from_millis)
    }
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: 5_000,
            deadlock_detect: true,
            default_deadline_ms: Some(30_000),
        }
    }
}

/// Overdraft policy enforced by the balance primitives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverdraftPolicy {
    /// A debit that would make the balance negative is a constraint violation
    #[default]
    Reject,
    /// Balances may go negative
    Allow,
}

impl OverdraftPolicy {
    /// Check a balance change against the policy
    pub(crate) fn permits(&self, balance_after: i64, delta: i64) -> bool {
        match self {
            OverdraftPolicy::Allow => true,
            OverdraftPolicy::Reject => delta >= 0 || balance_after >= 0,
        }
    }
}

impl std::str::FromStr for OverdraftPolicy {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "reject" => Ok(OverdraftPolicy::Reject),
            "allow" => Ok(OverdraftPolicy::Allow),
            other => Err(crate::Error::Config(format!(
                "unknown overdraft policy: {}",
                other
            ))),
        }
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse TOML text
    pub fn from_toml(content: &str) -> crate::Result<Self> {
        let config: Config = toml::from_str(content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config::default();

        if let Ok(data_dir) = std::env::var("LEDGER_DATA_DIR") {
            config.data_dir = PathBuf::from(data_dir);
        }

        if let Ok(ms) = std::env::var("LEDGER_LOCK_TIMEOUT_MS") {
            config.transactions.lock_timeout_ms = parse_millis("LEDGER_LOCK_TIMEOUT_MS", &ms)?;
        }

        if let Ok(ms) = std::env::var("LEDGER_DEADLINE_MS") {
            config.transactions.default_deadline_ms =
                Some(parse_millis("LEDGER_DEADLINE_MS", &ms)?);
        }

        if let Ok(policy) = std::env::var("LEDGER_OVERDRAFT") {
            config.overdraft = policy.parse()?;
        }

        Ok(config)
    }
}

fn parse_millis(var: &str, value: &str) -> crate::Result<u64> {
    value
        .parse()
        .map_err(|e| crate::Error::Config(format!("{} is not a number of milliseconds: {}", var, e)))
}
