//! Collaborators supplied by the host debugger.

use std::path::Path;

use tracerec_arch::{Arch, Register, RegisterSnapshot};

/// Bytes read when decoding an instruction.
pub const MAX_INSTRUCTION_LEN: usize = 16;

/// The process being debugged.
pub trait Debuggee<A: Arch> {
    /// Whether a process is attached.
    fn is_active(&self) -> bool;

    /// Read `buf.len()` bytes at `addr`. Returns false if any byte is unreadable.
    fn read_memory(&self, addr: u64, buf: &mut [u8]) -> bool;

    /// Register file of the current thread.
    fn registers(&self) -> Option<RegisterSnapshot<A>>;

    fn current_thread_id(&self) -> u32;

    /// Base address of the current thread's local storage block.
    fn thread_local_base(&self) -> Option<u64>;

    /// Path of the main image.
    fn image_path(&self) -> String;

    /// Hash of the main image.
    fn image_hash(&self) -> u64;

    /// Bytes readable from `addr` up to the end of its memory region.
    fn readable_len(&self, _addr: u64) -> Option<usize> {
        None
    }

    /// Read one little-endian machine word.
    fn read_word(&self, addr: u64) -> Option<u64> {
        let mut buf = [0u8; 8];
        self.read_memory(addr, &mut buf[..A::WORD_BYTES])
            .then(|| A::word_from_bytes(&buf))
    }
}

/// Instruction decoder.
pub trait Decoder {
    /// Decode the instruction at `addr` from `bytes`.
    fn decode(&self, addr: u64, bytes: &[u8]) -> Option<DecodedInstruction>;
}

/// What the journal needs to know about an instruction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InstructionClass {
    Invalid,
    Nop,
    /// `lea` and friends: memory operands are computed, not accessed.
    AddressComputation,
    Push,
    PushFlags,
    Call,
    Other,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemoryOperand {
    pub base: Option<Register>,
    pub index: Option<Register>,
    pub scale: u8,
    pub disp: i64,
    pub segment: Option<Register>,
    /// Access size in bytes.
    pub size: usize,
}

impl MemoryOperand {
    /// `[base + disp]`, one word wide.
    pub const fn based(base: Register, disp: i64, size: usize) -> Self {
        Self {
            base: Some(base),
            index: None,
            scale: 1,
            disp,
            segment: None,
            size,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Operand {
    Register(Register),
    Immediate(u64),
    Memory(MemoryOperand),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecodedInstruction {
    pub len: usize,
    pub class: InstructionClass,
    pub operands: Vec<Operand>,
}

impl DecodedInstruction {
    /// Placeholder for bytes that do not decode: one byte, no operands.
    pub const fn invalid() -> Self {
        Self {
            len: 1,
            class: InstructionClass::Invalid,
            operands: Vec::new(),
        }
    }

    /// Whether the instruction really reads or writes its memory operands.
    pub const fn accesses_memory(&self) -> bool {
        !matches!(
            self.class,
            InstructionClass::Invalid | InstructionClass::Nop | InstructionClass::AddressComputation
        )
    }

    /// Whether the instruction writes a word below the stack pointer.
    pub const fn pushes(&self) -> bool {
        matches!(
            self.class,
            InstructionClass::Push | InstructionClass::PushFlags | InstructionClass::Call
        )
    }
}

/// Notifications emitted while recording.
pub trait TraceObserver: Send {
    /// New records were appended.
    fn trace_data_available(&self) {}

    /// A trace file was opened for recording.
    fn trace_file_opened(&self, _path: &Path) {}
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoopObserver;

impl TraceObserver for NoopObserver {}

/// Fetch and decode the instruction at `addr`.
///
/// Reads `MAX_INSTRUCTION_LEN` bytes, falling back to the bytes left before
/// the end of the memory region. Returns `None` if neither read succeeds.
/// Bytes that do not decode yield [`DecodedInstruction::invalid`].
pub fn decode_at<A, D, C>(target: &D, decoder: &C, addr: u64) -> Option<DecodedInstruction>
where
    A: Arch,
    D: Debuggee<A> + ?Sized,
    C: Decoder + ?Sized,
{
    let mut buf = [0u8; MAX_INSTRUCTION_LEN];
    let len = if target.read_memory(addr, &mut buf) {
        MAX_INSTRUCTION_LEN
    } else {
        let len = target.readable_len(addr)?.min(MAX_INSTRUCTION_LEN);
        if len == 0 || !target.read_memory(addr, &mut buf[..len]) {
            return None;
        }
        len
    };
    Some(
        decoder
            .decode(addr, &buf[..len])
            .unwrap_or_else(DecodedInstruction::invalid),
    )
}
