//! Info command.

use std::collections::BTreeSet;
use std::path::Path;

use tracerec::{JournalError, JournalReader};
use tracing::{error, warn};

use crate::cli::{EXIT_FAILURE, EXIT_SUCCESS};
use crate::terminal::{self, Progress, label};

/// Records between progress bar updates.
const PROGRESS_STRIDE: u64 = 4096;

/// Handle the `info` command.
pub fn cmd_info(trace: &Path) -> i32 {
    let size = match std::fs::metadata(trace) {
        Ok(meta) => meta.len(),
        Err(e) => {
            error!(error = %e, path = %trace.display(), "failed to open trace");
            return EXIT_FAILURE;
        }
    };
    let mut reader = match JournalReader::open(trace) {
        Ok(r) => r,
        Err(e) => {
            error!(error = %e, path = %trace.display(), "failed to read trace header");
            return EXIT_FAILURE;
        }
    };
    let header = reader.header().clone();
    let arch = reader.arch();

    let progress = Progress::new(size, "Scanning");
    let mut records = 0u64;
    let mut full_dumps = Vec::new();
    let mut threads = BTreeSet::new();
    let mut memory_accesses = 0u64;
    let mut exit_code = EXIT_SUCCESS;

    loop {
        match reader.next_record() {
            Ok(Some(record)) => {
                if record.full_dump {
                    full_dumps.push((record.index, record.offset));
                }
                threads.insert(record.thread_id);
                memory_accesses += record.memory.len() as u64;
                records += 1;
                if records % PROGRESS_STRIDE == 0 {
                    progress.set_position(reader.offset());
                }
            }
            Ok(None) => break,
            Err(JournalError::Truncated { offset }) => {
                warn!(offset = format!("{:#x}", offset), "trace ends inside a record");
                break;
            }
            Err(e) => {
                error!(error = %e, record = records, "failed to decode trace");
                exit_code = EXIT_FAILURE;
                break;
            }
        }
    }
    progress.finish();
    tracerec::metrics::record_read(arch.name(), records);

    println!("{} {}", label("path:"), header.path);
    println!("{} {}", label("arch:"), header.arch);
    println!(
        "{} {} ({})",
        label("image hash:"),
        header.hash,
        header.hash_algorithm
    );
    println!("{} {}", label("records:"), records);
    println!("{} {}", label("threads:"), threads.len());
    println!("{} {}", label("memory accesses:"), memory_accesses);
    println!("{} {}", label("full dumps:"), full_dumps.len());
    for (index, offset) in &full_dumps {
        println!("  #{index} @ {offset:#x}");
    }

    if exit_code == EXIT_SUCCESS {
        terminal::success(&format!("{} records in {} bytes", records, size));
    } else {
        terminal::error("trace is corrupt");
    }
    exit_code
}
