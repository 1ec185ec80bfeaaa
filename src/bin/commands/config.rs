use clap::Args;
use serde::Serialize;
use std::collections::BTreeMap;
use txscope::{format_size, get_database_info, DatabaseInfo, OutputFormat, TxscopeConfig};

/// Arguments for the Config command
#[derive(Args)]
pub struct ConfigArgs {
    /// Also inspect the database file
    #[clap(short, long)]
    pub verbose: bool,
}

#[derive(Debug, Serialize)]
struct ConfigInfo {
    config_file: String,
    data_dir: String,
    pool_max_size: usize,
    acquire_timeout_ms: u64,
    busy_timeout_ms: u64,
    begin_behavior: String,
    nesting: String,
    balance_policy: String,
    error_overrides: BTreeMap<i32, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    database: Option<DatabaseInfo>,
}

pub fn run(config: &TxscopeConfig, args: ConfigArgs, output_format: OutputFormat) {
    let ConfigArgs { verbose } = args;

    let database = verbose.then(|| get_database_info(config));

    if output_format.is_json() {
        let info = ConfigInfo {
            config_file: TxscopeConfig::config_file_path(),
            data_dir: config.data_dir.clone(),
            pool_max_size: config.pool_max_size,
            acquire_timeout_ms: config.acquire_timeout_ms,
            busy_timeout_ms: config.busy_timeout_ms,
            begin_behavior: config.begin_behavior.to_string(),
            nesting: config.nesting.to_string(),
            balance_policy: config.balance_policy.to_string(),
            error_overrides: config
                .error_overrides
                .iter()
                .map(|(code, kind)| (*code, kind.to_string()))
                .collect(),
            database,
        };
        match txscope::service::utils::to_json(&info, output_format) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                eprintln!("ERROR: Failed to serialize to JSON: {}", e);
                std::process::exit(1);
            }
        }
        return;
    }

    println!("Config File:        {}", TxscopeConfig::config_file_path());
    println!("{}", config.summary());

    if let Some(db) = database {
        println!();
        println!("Database:");
        println!("  Exists:           {}", db.exists);
        if let Some(size) = db.size_bytes {
            println!("  Size:             {}", format_size(size));
        }
        match db.schema_version {
            Some(v) if db.schema_initialized => println!("  Schema Version:   {}", v),
            _ => println!("  Schema:           not initialized"),
        }
        if let Some(count) = db.member_count {
            println!("  Members:          {}", count);
        }
    }
}
