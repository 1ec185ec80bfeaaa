use crate::database::{
    BalancePolicy, BeginBehavior, ConnectionSettings, CoordinatorSettings, DatabaseSettings,
    ErrorKind, NestingPolicy, PoolSettings, DATABASE_FILE_NAME,
};
use anyhow::{anyhow, Result};
use config::Config;
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

pub struct TxscopeConfig {
    /// Directory holding the txscope database
    pub data_dir: String,

    /// Maximum number of open pooled connections
    pub pool_max_size: usize,

    /// Maximum wait for a pooled connection, in milliseconds
    pub acquire_timeout_ms: u64,

    /// SQLite busy timeout per connection, in milliseconds
    pub busy_timeout_ms: u64,

    pub begin_behavior: BeginBehavior,

    pub nesting: NestingPolicy,

    pub balance_policy: BalancePolicy,

    /// SQLite result code -> error kind entries on top of the built-in table
    pub error_overrides: HashMap<i32, ErrorKind>,
}

const EMPTY_CONFIG: &str = r#"### txscope configuration file

### directory holding txscope.sqlite3
# data_dir = "~/.txscope"

### connection pool
# pool_max_size = 8
# acquire_timeout_ms = 5000
# busy_timeout_ms = 5000

### units of work
# begin_behavior = "immediate"    # deferred | immediate | exclusive
# nesting = "reject"              # reject | join

### member balances
# balance_policy = "unconstrained"    # unconstrained | non-negative

### error classification, comma-separated code=kind pairs
### a primary code (e.g. 19) also covers its extended codes unless they are listed too
# error_overrides = "5=data-integrity,2067=unknown"
"#;

const DEFAULT_POOL_MAX_SIZE: usize = 8;
const DEFAULT_ACQUIRE_TIMEOUT_MS: u64 = 5000;
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5000;

impl Default for TxscopeConfig {
    fn default() -> Self {
        let home_dir = dirs::home_dir()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|| ".".to_string());

        Self {
            data_dir: format!("{}/.txscope", home_dir),
            pool_max_size: DEFAULT_POOL_MAX_SIZE,
            acquire_timeout_ms: DEFAULT_ACQUIRE_TIMEOUT_MS,
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            begin_behavior: BeginBehavior::default(),
            nesting: NestingPolicy::default(),
            balance_policy: BalancePolicy::default(),
            error_overrides: HashMap::new(),
        }
    }
}

impl TxscopeConfig {
    /// Load the configuration file (creating a template when missing) and
    /// apply `TXSCOPE_*` environment overrides
    pub fn new(path: &Option<String>) -> Result<TxscopeConfig> {
        let mut builder = Config::builder();

        let home_dir = dirs::home_dir()
            .ok_or_else(|| anyhow!("Could not find home directory"))?
            .to_str()
            .ok_or_else(|| anyhow!("Could not convert home directory path to string"))?
            .to_owned();
        let txscope_dir = format!("{}/.txscope", home_dir.as_str());

        match path {
            Some(p) => {
                let path = Path::new(p.as_str());
                if path.exists() {
                    let path_str = path
                        .to_str()
                        .ok_or_else(|| anyhow!("Could not convert path to string"))?;
                    builder = builder.add_source(config::File::with_name(path_str));
                } else {
                    std::fs::write(p.as_str(), EMPTY_CONFIG)
                        .map_err(|e| anyhow!("Unable to create config file: {}", e))?;
                }
            }
            None => {
                std::fs::create_dir_all(txscope_dir.as_str())
                    .map_err(|e| anyhow!("Unable to create txscope directory: {}", e))?;
                let p = format!("{}/txscope.toml", txscope_dir.as_str());
                if Path::new(p.as_str()).exists() {
                    builder = builder.add_source(config::File::with_name(p.as_str()));
                } else {
                    std::fs::write(p.as_str(), EMPTY_CONFIG).map_err(|e| {
                        anyhow!("Unable to create config file {}: {}", p.as_str(), e)
                    })?;
                }
            }
        }

        // E.g., `TXSCOPE_NESTING=join txscope transfer a b 10`
        builder = builder.add_source(config::Environment::with_prefix("TXSCOPE"));

        let settings = builder
            .build()
            .map_err(|e| anyhow!("Failed to build configuration: {}", e))?;

        let values = settings
            .try_deserialize::<HashMap<String, String>>()
            .map_err(|e| anyhow!("Failed to deserialize configuration: {}", e))?;

        Self::from_values(&values, &txscope_dir)
    }

    /// Build a configuration from flat key/value pairs
    ///
    /// Missing keys take their defaults; present keys must parse.
    pub fn from_values(values: &HashMap<String, String>, default_data_dir: &str) -> Result<Self> {
        let data_dir = match values.get("data_dir") {
            Some(p) => expand_home(p),
            None => default_data_dir.to_string(),
        };

        Ok(TxscopeConfig {
            data_dir,
            pool_max_size: parse_value(values, "pool_max_size", DEFAULT_POOL_MAX_SIZE)?,
            acquire_timeout_ms: parse_value(
                values,
                "acquire_timeout_ms",
                DEFAULT_ACQUIRE_TIMEOUT_MS,
            )?,
            busy_timeout_ms: parse_value(values, "busy_timeout_ms", DEFAULT_BUSY_TIMEOUT_MS)?,
            begin_behavior: parse_value(values, "begin_behavior", BeginBehavior::default())?,
            nesting: parse_value(values, "nesting", NestingPolicy::default())?,
            balance_policy: parse_value(values, "balance_policy", BalancePolicy::default())?,
            error_overrides: match values.get("error_overrides") {
                Some(raw) => parse_error_overrides(raw)?,
                None => HashMap::new(),
            },
        })
    }

    /// Get the path to the SQLite database file
    pub fn sqlite_path(&self) -> String {
        let data_dir = self.data_dir.trim_end_matches('/');
        format!("{}/{}", data_dir, DATABASE_FILE_NAME)
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    /// Settings for opening a [`Database`](crate::database::Database)
    pub fn database_settings(&self) -> DatabaseSettings {
        DatabaseSettings {
            pool: PoolSettings {
                max_size: self.pool_max_size,
                acquire_timeout: self.acquire_timeout(),
                connection: ConnectionSettings {
                    busy_timeout: self.busy_timeout(),
                },
            },
            coordinator: CoordinatorSettings {
                nesting: self.nesting,
                begin_behavior: self.begin_behavior,
            },
            balance_policy: self.balance_policy,
            error_overrides: self.error_overrides.clone(),
        }
    }

    /// Display configuration summary
    pub fn summary(&self) -> String {
        [
            format!("Data Directory:     {}", self.data_dir),
            format!("SQLite Path:        {}", self.sqlite_path()),
            format!("Pool Max Size:      {}", self.pool_max_size),
            format!("Acquire Timeout:    {} ms", self.acquire_timeout_ms),
            format!("Busy Timeout:       {} ms", self.busy_timeout_ms),
            format!("Begin Behavior:     {}", self.begin_behavior),
            format!("Nesting:            {}", self.nesting),
            format!("Balance Policy:     {}", self.balance_policy),
            format!("Error Overrides:    {}", format_overrides(&self.error_overrides)),
        ]
        .join("\n")
    }

    /// Get the config file path
    pub fn config_file_path() -> String {
        let home_dir = dirs::home_dir()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|| "~".to_string());
        format!("{}/.txscope/txscope.toml", home_dir)
    }
}

fn parse_value<T>(values: &HashMap<String, String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match values.get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow!("Invalid value '{}' for {}: {}", raw, key, e)),
        None => Ok(default),
    }
}

/// Parse `code=kind` pairs such as `5=data-integrity,2067=unknown`
fn parse_error_overrides(raw: &str) -> Result<HashMap<i32, ErrorKind>> {
    raw.split(',')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (code, kind) = pair
                .split_once('=')
                .ok_or_else(|| anyhow!("Invalid error override '{}': expected code=kind", pair))?;
            let code = code
                .trim()
                .parse::<i32>()
                .map_err(|e| anyhow!("Invalid error override code '{}': {}", code, e))?;
            let kind = kind
                .trim()
                .parse::<ErrorKind>()
                .map_err(|e| anyhow!("Invalid error override kind '{}': {}", kind, e))?;
            Ok((code, kind))
        })
        .collect()
}

fn format_overrides(overrides: &HashMap<i32, ErrorKind>) -> String {
    if overrides.is_empty() {
        return "none".to_string();
    }
    let mut pairs: Vec<_> = overrides.iter().collect();
    pairs.sort_by_key(|(code, _)| **code);
    pairs
        .iter()
        .map(|(code, kind)| format!("{}={}", code, kind))
        .collect::<Vec<_>>()
        .join(",")
}

fn expand_home(path: &str) -> String {
    match (path.strip_prefix("~"), dirs::home_dir()) {
        (Some(rest), Some(home)) => format!("{}{}", home.to_string_lossy(), rest),
        _ => path.to_string(),
    }
}

/// Information about the SQLite database
#[derive(Debug, Serialize, Clone)]
pub struct DatabaseInfo {
    pub path: String,
    pub exists: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
    pub schema_initialized: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema_version: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub member_count: Option<u64>,
}

/// Inspect the database file without modifying it
pub fn get_database_info(config: &TxscopeConfig) -> DatabaseInfo {
    use crate::database::{DatabaseConn, SchemaManager, SchemaStatus};

    let sqlite_path = config.sqlite_path();
    let exists = Path::new(&sqlite_path).exists();
    let size_bytes = if exists {
        std::fs::metadata(&sqlite_path).ok().map(|m| m.len())
    } else {
        None
    };

    let (schema_initialized, schema_version, member_count) = if exists {
        match DatabaseConn::open_path(Path::new(&sqlite_path)) {
            Ok(db) => {
                let manager = SchemaManager::new(&db.conn);
                let initialized = matches!(
                    manager.status(),
                    Ok(SchemaStatus::Current)
                        | Ok(SchemaStatus::Outdated { .. })
                        | Ok(SchemaStatus::Newer { .. })
                );
                let version = manager.version().ok().filter(|v| *v > 0);
                let members = if initialized {
                    db.table_count("member").ok()
                } else {
                    None
                };
                (initialized, version, members)
            }
            Err(_) => (false, None, None),
        }
    } else {
        (false, None, None)
    };

    DatabaseInfo {
        path: sqlite_path,
        exists,
        size_bytes,
        schema_initialized,
        schema_version,
        member_count,
    }
}

/// Format bytes as human-readable size
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;

    fn values(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_default_config() {
        let config = TxscopeConfig::default();
        assert_eq!(config.pool_max_size, 8);
        assert_eq!(config.acquire_timeout(), Duration::from_millis(5000));
        assert_eq!(config.begin_behavior, BeginBehavior::Immediate);
        assert_eq!(config.nesting, NestingPolicy::Reject);
        assert_eq!(config.balance_policy, BalancePolicy::Unconstrained);
    }

    #[test]
    fn test_from_values() {
        let config = TxscopeConfig::from_values(
            &values(&[
                ("data_dir", "/test/dir/"),
                ("pool_max_size", "2"),
                ("acquire_timeout_ms", "250"),
                ("nesting", "join"),
                ("begin_behavior", "deferred"),
                ("balance_policy", "non-negative"),
            ]),
            "/unused",
        )
        .unwrap();

        assert_eq!(config.sqlite_path(), "/test/dir/txscope.sqlite3");
        assert_eq!(config.busy_timeout_ms, 5000);

        let settings = config.database_settings();
        assert_eq!(settings.pool.max_size, 2);
        assert_eq!(settings.pool.acquire_timeout, Duration::from_millis(250));
        assert_eq!(settings.coordinator.nesting, NestingPolicy::Join);
        assert_eq!(settings.coordinator.begin_behavior, BeginBehavior::Deferred);
        assert_eq!(settings.balance_policy, BalancePolicy::NonNegative);
    }

    #[test]
    fn test_missing_keys_use_defaults() {
        let config = TxscopeConfig::from_values(&HashMap::new(), "/data").unwrap();
        assert_eq!(config.data_dir, "/data");
        assert_eq!(config.pool_max_size, 8);
        assert_eq!(config.nesting, NestingPolicy::Reject);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let err = TxscopeConfig::from_values(&values(&[("nesting", "sometimes")]), "/data")
            .err()
            .unwrap();
        assert!(err.to_string().contains("nesting"));

        assert!(
            TxscopeConfig::from_values(&values(&[("pool_max_size", "many")]), "/data").is_err()
        );
    }

    #[test]
    fn test_error_overrides() {
        let config = TxscopeConfig::from_values(
            &values(&[("error_overrides", " 5=data-integrity, 2067=unknown ")]),
            "/data",
        )
        .unwrap();
        assert_eq!(config.error_overrides.len(), 2);
        assert_eq!(config.error_overrides[&5], ErrorKind::DataIntegrity);

        let settings = config.database_settings();
        assert_eq!(settings.error_overrides[&2067], ErrorKind::Unknown);
        assert!(config.summary().contains("Error Overrides:    5=data-integrity,2067=unknown"));

        assert!(TxscopeConfig::from_values(&values(&[("error_overrides", "5")]), "/data").is_err());
        assert!(
            TxscopeConfig::from_values(&values(&[("error_overrides", "5=sometimes")]), "/data")
                .is_err()
        );
    }

    #[test]
    fn test_summary_lists_settings() {
        let summary = TxscopeConfig::default().summary();
        assert!(summary.contains("SQLite Path:"));
        assert!(summary.contains("Nesting:            reject"));
        assert!(summary.contains("Balance Policy:     unconstrained"));
    }

    #[test]
    fn test_database_info() {
        let dir = tempfile::tempdir().unwrap();
        let config = TxscopeConfig {
            data_dir: dir.path().to_string_lossy().to_string(),
            ..Default::default()
        };

        let info = get_database_info(&config);
        assert!(!info.exists);
        assert!(!info.schema_initialized);

        let _db = Database::open(&config).unwrap();
        let info = get_database_info(&config);
        assert!(info.exists);
        assert!(info.schema_initialized);
        assert_eq!(info.schema_version, Some(crate::database::SCHEMA_VERSION));
        assert_eq!(info.member_count, Some(0));
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(500), "500 B");
        assert_eq!(format_size(1536), "1.50 KB");
        assert_eq!(format_size(1048576), "1.00 MB");
    }
}
