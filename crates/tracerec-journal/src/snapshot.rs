//! Machine state captured before an instruction executes.

use tracerec_arch::{Arch, RegisterSnapshot};
use tracing::{debug, trace};

use crate::format::{MAX_MEMORY_SLOTS, MAX_OPCODE_LEN};
use crate::target::{DecodedInstruction, Debuggee, MemoryOperand, Operand};

/// One machine word of memory an instruction may touch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MemorySlot {
    pub addr: u64,
    pub value: u64,
}

/// State of one thread just before an instruction runs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InstructionSnapshot<A: Arch> {
    pub thread_id: u32,
    pub registers: RegisterSnapshot<A>,
    pub opcode: Vec<u8>,
    pub memory: Vec<MemorySlot>,
}

impl<A: Arch> InstructionSnapshot<A> {
    /// Capture registers, opcode bytes and the memory words `decoded` may touch.
    ///
    /// Returns `None` if the register file cannot be read.
    pub fn capture<D>(target: &D, decoded: &DecodedInstruction) -> Option<Self>
    where
        D: Debuggee<A> + ?Sized,
    {
        let registers = target.registers()?;
        let ip = registers.ip();

        let len = decoded.len.min(MAX_OPCODE_LEN);
        let mut opcode = vec![0u8; len];
        if !target.read_memory(ip, &mut opcode) {
            debug!(addr = format!("{:#x}", ip), "opcode unreadable");
            opcode.clear();
        }

        let memory = memory_slots(target, &registers, decoded);
        Some(Self {
            thread_id: target.current_thread_id(),
            registers,
            opcode,
            memory,
        })
    }
}

/// Addresses and current values of the memory words an instruction may touch.
fn memory_slots<A, D>(target: &D, regs: &RegisterSnapshot<A>, decoded: &DecodedInstruction) -> Vec<MemorySlot>
where
    A: Arch,
    D: Debuggee<A> + ?Sized,
{
    let mut addrs = Vec::new();
    if decoded.accesses_memory() {
        for operand in &decoded.operands {
            let Operand::Memory(mem) = operand else {
                continue;
            };
            let Some(addr) = effective_address(target, regs, mem) else {
                debug!(?mem, "skipping unresolvable memory operand");
                continue;
            };
            let words = mem.size.div_ceil(A::WORD_BYTES).max(1);
            addrs.extend((0..words).map(|i| A::truncate(addr.wrapping_add((i * A::WORD_BYTES) as u64))));
        }
    }
    if decoded.pushes() {
        addrs.push(A::truncate(regs.sp().wrapping_sub(A::WORD_BYTES as u64)));
    }

    if addrs.len() > MAX_MEMORY_SLOTS {
        trace!(slots = addrs.len(), "dropping memory slots over the limit");
        addrs.truncate(MAX_MEMORY_SLOTS);
    }

    addrs
        .into_iter()
        .filter_map(|addr| match target.read_word(addr) {
            Some(value) => Some(MemorySlot { addr, value }),
            None => {
                debug!(addr = format!("{:#x}", addr), "memory slot unreadable");
                None
            }
        })
        .collect()
}

/// `base + index * scale + disp`, plus the thread-local base for the
/// architecture's TLS segment.
fn effective_address<A, D>(target: &D, regs: &RegisterSnapshot<A>, mem: &MemoryOperand) -> Option<u64>
where
    A: Arch,
    D: Debuggee<A> + ?Sized,
{
    let mut addr = mem.disp as u64;
    if let Some(base) = mem.base {
        addr = addr.wrapping_add(regs.get(base)?);
    }
    if let Some(index) = mem.index {
        addr = addr.wrapping_add(regs.get(index)?.wrapping_mul(u64::from(mem.scale)));
    }
    if mem.segment == Some(A::TLS_SEGMENT) {
        addr = addr.wrapping_add(target.thread_local_base()?);
    }
    Some(A::truncate(addr))
}
