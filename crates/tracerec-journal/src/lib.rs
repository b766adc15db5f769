//! Run-trace journal.
//!
//! A journal is an append-only file of delta-compressed instruction records:
//!
//! ```text
//! [b"TRAC"][u32 LE header length][JSON header][record]*
//! ```
//!
//! Each record describes the instruction *before* the current one, so the
//! encoder always lags one instruction behind: only once the next instruction
//! is reached is it known which registers and memory slots the previous one
//! changed. Every `FULL_DUMP_INTERVAL` records all registers are written,
//! giving a reader a point to resynchronize from.

mod encoder;
mod error;
mod format;
mod reader;
mod recorder;
mod snapshot;
mod target;

pub use encoder::{EncodedRecord, JournalEncoder};
pub use error::{JournalError, Result};
pub use format::*;
pub use reader::{IndexEntry, JournalReader, JournalRecord, MemoryAccess};
pub use recorder::{RecordStats, Recorder, RecorderState};
pub use snapshot::{InstructionSnapshot, MemorySlot};
pub use target::{
    DecodedInstruction, Debuggee, Decoder, InstructionClass, MAX_INSTRUCTION_LEN, MemoryOperand,
    NoopObserver, Operand, TraceObserver, decode_at,
};
