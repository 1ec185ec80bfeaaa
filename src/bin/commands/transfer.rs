use clap::Args;
use txscope::{Database, ExecutionContext, OutputFormat, TxscopeConfig};

use super::print_members;

/// Arguments for the Transfer command
#[derive(Args)]
pub struct TransferArgs {
    /// Member to debit
    pub from: String,

    /// Member to credit
    pub to: String,

    /// Amount to move
    pub amount: i64,
}

pub fn run(config: &TxscopeConfig, args: TransferArgs, output_format: OutputFormat) {
    let TransferArgs { from, to, amount } = args;

    let db = match Database::open(config) {
        Ok(db) => db,
        Err(e) => {
            eprintln!("ERROR: Failed to open database: {}", e);
            std::process::exit(1);
        }
    };

    let ctx = ExecutionContext::new();
    let receipt = match db.transfers().transfer(&ctx, &from, &to, amount) {
        Ok(receipt) => receipt,
        Err(e) => {
            eprintln!("ERROR: {}", e);
            if e.is_retryable() {
                eprintln!("The database was busy; the transfer was rolled back and can be retried.");
            }
            std::process::exit(1);
        }
    };

    if output_format.is_json() {
        match txscope::service::utils::to_json(&receipt, output_format) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                eprintln!("ERROR: Failed to serialize to JSON: {}", e);
                std::process::exit(1);
            }
        }
    } else {
        print_members(&[receipt.from, receipt.to], output_format);
    }
}
