use clap::Args;
use txscope::{
    DataAccessError, Database, ExecutionContext, Member, OutputFormat, TxscopeConfig,
};

use super::print_members;

/// Arguments for the Create command
#[derive(Args)]
pub struct CreateArgs {
    /// Member id
    pub member_id: String,

    /// Initial balance
    #[clap(allow_hyphen_values = true)]
    pub money: i64,
}

/// Arguments for the Get command
#[derive(Args)]
pub struct GetArgs {
    /// Member id
    pub member_id: String,
}

/// Arguments for the Update command
#[derive(Args)]
pub struct UpdateArgs {
    /// Member id
    pub member_id: String,

    /// New balance
    #[clap(allow_hyphen_values = true)]
    pub money: i64,
}

/// Arguments for the Delete command
#[derive(Args)]
pub struct DeleteArgs {
    /// Member id
    pub member_id: String,
}

/// Arguments for the Reset command
#[derive(Args)]
pub struct ResetArgs {
    /// Confirm that every member should be deleted
    #[clap(long)]
    pub yes: bool,
}

fn open(config: &TxscopeConfig) -> Database {
    match Database::open(config) {
        Ok(db) => db,
        Err(e) => {
            eprintln!("ERROR: Failed to open database: {}", e);
            std::process::exit(1);
        }
    }
}

fn fail(e: DataAccessError) -> ! {
    eprintln!("ERROR: {}", e);
    std::process::exit(1);
}

pub fn run_init(config: &TxscopeConfig) {
    let _db = open(config);
    println!("Database ready at {}", config.sqlite_path());
}

pub fn run_reset(config: &TxscopeConfig, args: ResetArgs) {
    if !args.yes {
        eprintln!(
            "ERROR: reset deletes every member in {}; pass --yes to confirm",
            config.sqlite_path()
        );
        std::process::exit(1);
    }

    let settings = config.database_settings();
    if let Err(e) = Database::reset_path(config.sqlite_path(), &settings.pool.connection) {
        eprintln!("ERROR: Failed to reset database: {}", e);
        std::process::exit(1);
    }
    println!("Database reset at {}", config.sqlite_path());
}

pub fn run_create(config: &TxscopeConfig, args: CreateArgs, output_format: OutputFormat) {
    let CreateArgs { member_id, money } = args;
    let db = open(config);

    let ctx = ExecutionContext::new();
    match db.members().create(&ctx, &Member::new(member_id, money)) {
        Ok(member) => print_members(&[member], output_format),
        Err(e) => fail(e),
    }
}

pub fn run_get(config: &TxscopeConfig, args: GetArgs, output_format: OutputFormat) {
    let db = open(config);

    let ctx = ExecutionContext::new();
    match db.members().read_by_key(&ctx, &args.member_id) {
        Ok(member) => print_members(&[member], output_format),
        Err(e) => fail(e),
    }
}

pub fn run_update(config: &TxscopeConfig, args: UpdateArgs, output_format: OutputFormat) {
    let UpdateArgs { member_id, money } = args;
    let db = open(config);

    let ctx = ExecutionContext::new();
    let members = db.members();
    let updated = db.transactions().execute(&ctx, |_uow| {
        if members.update_balance(&ctx, &member_id, money)? == 0 {
            return Err(DataAccessError::not_found(
                "update_balance",
                format!("member not found member_id={}", member_id),
            ));
        }
        members.read_by_key(&ctx, &member_id)
    });

    match updated {
        Ok(member) => print_members(&[member], output_format),
        Err(e) => fail(e),
    }
}

pub fn run_delete(config: &TxscopeConfig, args: DeleteArgs) {
    let db = open(config);

    let ctx = ExecutionContext::new();
    match db.members().delete(&ctx, &args.member_id) {
        Ok(0) => {
            eprintln!("ERROR: member {} not found", args.member_id);
            std::process::exit(1);
        }
        Ok(_) => println!("Deleted member {}", args.member_id),
        Err(e) => fail(e),
    }
}
