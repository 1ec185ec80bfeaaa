#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

use clap::{Parser, Subcommand};
use tracing::Level;
use txscope::*;

mod commands;

use commands::config::ConfigArgs;
use commands::member::{CreateArgs, DeleteArgs, GetArgs, ResetArgs, UpdateArgs};
use commands::transfer::TransferArgs;

#[derive(Parser)]
#[clap(author, version, about, long_about = None)]
#[clap(propagate_version = true)]
struct Cli {
    /// configuration file path, by default $HOME/.txscope/txscope.toml is used
    #[clap(short, long)]
    config: Option<String>,

    /// Print debug information
    #[clap(long)]
    debug: bool,

    /// Output format: table (default), markdown, json, json-pretty, psv
    #[clap(short, long, global = true, default_value = "table")]
    format: OutputFormat,

    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database and its schema if missing
    Init,

    /// Create a member with an initial balance
    Create(CreateArgs),

    /// Show a member
    Get(GetArgs),

    /// Set a member's balance
    Update(UpdateArgs),

    /// Delete a member
    Delete(DeleteArgs),

    /// Move money between two members in one transaction
    Transfer(TransferArgs),

    /// Show configuration and database status
    Config(ConfigArgs),

    /// Delete every member and recreate the schema
    Reset(ResetArgs),
}

fn main() {
    let cli = Cli::parse();

    if cli.debug {
        tracing_subscriber::fmt()
            // filter spans/events with level TRACE or higher.
            .with_max_level(Level::INFO)
            .init();
    }

    let config = match TxscopeConfig::new(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("ERROR: {}", e);
            std::process::exit(1);
        }
    };

    let output_format = cli.format;

    match cli.command {
        Commands::Init => commands::member::run_init(&config),
        Commands::Create(args) => commands::member::run_create(&config, args, output_format),
        Commands::Get(args) => commands::member::run_get(&config, args, output_format),
        Commands::Update(args) => commands::member::run_update(&config, args, output_format),
        Commands::Delete(args) => commands::member::run_delete(&config, args),
        Commands::Transfer(args) => commands::transfer::run(&config, args, output_format),
        Commands::Config(args) => commands::config::run(&config, args, output_format),
        Commands::Reset(args) => commands::member::run_reset(&config, args),
    }
}
