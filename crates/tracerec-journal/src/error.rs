//! Journal errors.

use thiserror::Error;

use crate::format::RECORD_SCRATCH_SIZE;

#[derive(Error, Debug)]
pub enum JournalError {
    #[error("no process is being debugged")]
    NotDebugging,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("short write to trace file: {written} of {expected} bytes")]
    ShortWrite { written: usize, expected: usize },
    #[error("record of {size} bytes exceeds the {RECORD_SCRATCH_SIZE}-byte record limit")]
    RecordOverflow { size: usize },
    #[error("invalid trace header: {0}")]
    Header(#[from] serde_json::Error),
    #[error("unknown architecture {0:?} in trace header")]
    UnknownArch(String),
    #[error("register snapshot unavailable")]
    RegistersUnavailable,
    #[error("trace file truncated at offset {offset:#x}")]
    Truncated { offset: u64 },
    #[error("not a trace file")]
    BadMagic,
    #[error("unknown block kind {kind} at offset {offset:#x}")]
    UnknownBlockKind { kind: u8, offset: u64 },
}

pub type Result<T> = std::result::Result<T, JournalError>;
