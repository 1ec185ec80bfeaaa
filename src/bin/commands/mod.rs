pub mod config;
pub mod member;
pub mod transfer;

use tabled::settings::Style;
use tabled::Table;
use txscope::service::utils::to_json;
use txscope::{Member, OutputFormat};

/// Print members in the requested format
pub(crate) fn print_members(members: &[Member], output_format: OutputFormat) {
    match output_format {
        OutputFormat::Table => {
            println!("{}", Table::new(members).with(Style::rounded()));
        }
        OutputFormat::Markdown => {
            println!("{}", Table::new(members).with(Style::markdown()));
        }
        OutputFormat::Json | OutputFormat::JsonPretty => match to_json(members, output_format) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                eprintln!("ERROR: Failed to serialize to JSON: {}", e);
                std::process::exit(1);
            }
        },
        OutputFormat::Psv => {
            println!("member_id|money");
            for m in members {
                println!("{}|{}", m.member_id, m.money);
            }
        }
    }
}
