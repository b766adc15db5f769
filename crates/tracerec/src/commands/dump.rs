//! Dump command.

use std::path::Path;

use tracerec::{ArchTag, JournalReader, JournalRecord};
use tracing::error;

use super::hex_bytes;
use crate::cli::{EXIT_FAILURE, EXIT_SUCCESS};
use crate::terminal;

/// Handle the `dump` command.
pub fn cmd_dump(trace: &Path, skip: u64, limit: Option<u64>) -> i32 {
    let reader = match JournalReader::open(trace) {
        Ok(r) => r,
        Err(e) => {
            error!(error = %e, path = %trace.display(), "failed to read trace header");
            return EXIT_FAILURE;
        }
    };
    let arch = reader.arch();

    let mut printed = 0u64;
    for record in reader.skip(skip as usize) {
        if limit.is_some_and(|n| printed >= n) {
            break;
        }
        match record {
            Ok(record) => print!("{}", format_record(arch, &record)),
            Err(e) => {
                terminal::error(&format!("record {}: {}", skip + printed, e));
                return EXIT_FAILURE;
            }
        }
        printed += 1;
    }

    if printed == 0 {
        terminal::warning("no records");
    }
    EXIT_SUCCESS
}

fn format_record(arch: ArchTag, record: &JournalRecord) -> String {
    let mut out = format!(
        "#{} @{:#x} tid {}{}  {}\n",
        record.index,
        record.offset,
        record.thread_id,
        if record.full_dump { " [full]" } else { "" },
        hex_bytes(&record.opcode)
    );
    if !record.registers.is_empty() {
        let regs: Vec<String> = record
            .registers
            .iter()
            .map(|&(slot, value)| {
                let name = arch
                    .registers()
                    .get(slot)
                    .map_or("?", |r| r.name(arch.bits()));
                format!("{name}={value:#x}")
            })
            .collect();
        out.push_str(&format!("    {}\n", regs.join(" ")));
    }
    for access in &record.memory {
        if access.changed() {
            out.push_str(&format!(
                "    [{:#x}] {:#x} -> {:#x}\n",
                access.addr, access.old, access.new
            ));
        } else {
            out.push_str(&format!("    [{:#x}] {:#x}\n", access.addr, access.old));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use tracerec::MemoryAccess;

    use super::*;

    #[test]
    fn test_format_record() {
        let record = JournalRecord {
            index: 3,
            offset: 0x80,
            thread_id: 12,
            opcode: vec![0x50],
            registers: vec![(0, 1), (5, 0x7ff0)],
            memory: vec![
                MemoryAccess {
                    addr: 0x7fe8,
                    old: 0,
                    new: 1,
                },
                MemoryAccess {
                    addr: 0x10,
                    old: 2,
                    new: 2,
                },
            ],
            full_dump: false,
        };
        let text = format_record(ArchTag::X64, &record);
        assert_eq!(
            text,
            "#3 @0x80 tid 12  50\n    rax=0x1 rsp=0x7ff0\n    [0x7fe8] 0x0 -> 0x1\n    [0x10] 0x2\n"
        );
    }
}
