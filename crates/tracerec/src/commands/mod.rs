//! Command implementations.

mod dump;
mod info;
mod pages;

use crate::cli::{Cli, Commands};

/// Dispatch CLI command to the appropriate handler.
pub fn run_command(cli: &Cli) -> i32 {
    match &cli.command {
        Commands::Info { trace } => info::cmd_info(trace),
        Commands::Dump { trace, limit, skip } => dump::cmd_dump(trace, *skip, *limit),
        Commands::Pages { db, sort } => pages::cmd_pages(db, *sort),
    }
}

/// Space-separated lower-case hex bytes.
fn hex_bytes(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(" ")
}
