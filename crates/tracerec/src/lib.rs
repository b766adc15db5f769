//! tracerec - execution tracing for a debugger
//!
//! Keeps per-page execution statistics at byte granularity and records a
//! replayable, delta-compressed run-trace journal of every executed instruction.
//!
//! # Example
//!
//! ```ignore
//! use tracerec::{PageLayout, TraceEngine, X64};
//!
//! let engine = TraceEngine::<X64>::new(resolver);
//! engine.arm_page(0x401000, Some(PageLayout::ByteCounter))?;
//! engine.enable_recording("app.trace", &process, &decoder)?;
//!
//! // Once per retired instruction:
//! engine.on_instruction(cip, &process, &decoder)?;
//! ```

// Re-export from sub-crates
pub use tracerec_arch::{Arch, ArchTag, Register, RegisterSnapshot, X64, X86};
pub use tracerec_journal::{
    DecodedInstruction, Debuggee, Decoder, InstructionClass, JournalError, JournalReader, JournalRecord,
    MemoryAccess, MemoryOperand, NoopObserver, Operand, RecordStats, RecorderState, TraceHeader,
    TraceObserver,
};
pub use tracerec_page::{
    ByteClass, HexCodec, ModuleResolver, NoModules, PAGE_SIZE, PageError, PageInfo, PageKey, PageLayout,
    PageTable, PersistError, TextCodec,
};

mod engine;
mod error;
pub mod metrics;

pub use engine::{TraceEngine, TraceStop};
pub use error::{Error, Result};
