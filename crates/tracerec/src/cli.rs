//! CLI definitions and argument types.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// Exit code for success.
pub const EXIT_SUCCESS: i32 = 0;
/// Exit code for failure.
pub const EXIT_FAILURE: i32 = 1;

#[derive(Parser)]
#[command(name = "tracerec")]
#[command(about = "Inspect run-trace journals and page execution statistics")]
#[command(version)]
pub struct Cli {
    /// Show metrics summary after execution
    #[arg(long, global = true)]
    pub metrics: bool,

    /// Enable verbose output (sets RUST_LOG=debug)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress output (only show errors)
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub silent: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show a trace file's header, record count and full-dump index
    Info {
        /// Trace file
        #[arg(value_name = "TRACE")]
        trace: PathBuf,
    },
    /// Print the records of a trace file
    Dump {
        /// Trace file
        #[arg(value_name = "TRACE")]
        trace: PathBuf,

        /// Stop after this many records
        #[arg(short = 'n', long)]
        limit: Option<u64>,

        /// Skip records before this index
        #[arg(long, default_value = "0")]
        skip: u64,
    },
    /// Summarize the page table stored in a session database
    Pages {
        /// Session database (JSON)
        #[arg(value_name = "DB")]
        db: PathBuf,

        /// Sort order
        #[arg(long, value_enum, default_value = "key")]
        sort: PageSortArg,
    },
}

/// Page listing order.
#[derive(Clone, Copy, Debug, Default, ValueEnum)]
pub enum PageSortArg {
    /// By page identity
    #[default]
    Key,
    /// Most executed bytes first
    Coverage,
}
