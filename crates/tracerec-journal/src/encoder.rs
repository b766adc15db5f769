//! Delta encoding of instruction records.
//!
//! Record layout, all multi-byte values little-endian and words `A::WORD_BYTES` wide:
//!
//! ```text
//! u8   block kind (0 = instruction)
//! u8   R = changed register count
//! u8   M = memory slot count
//! u8   flags: 0x80 thread id present, 0x0F opcode length
//! u32  thread id                      (if flagged)
//! u8[] opcode
//! u8[R] register index gaps: first is the index, then distance - 1 from the previous
//! word[R] register values before the instruction
//! u8[M] memory flags: bit 0 set = value unchanged
//! word[M] addresses
//! word[M] values before the instruction
//! word[]  values after the instruction, changed slots only
//! ```

use tracerec_arch::Arch;
use tracing::trace;

use crate::error::{JournalError, Result};
use crate::format::{
    BLOCK_KIND_INSTRUCTION, FULL_DUMP_INTERVAL, MAX_MEMORY_SLOTS, MEMORY_UNCHANGED, OPCODE_LEN_MASK,
    RECORD_SCRATCH_SIZE, THREAD_ID_FLAG,
};
use crate::snapshot::InstructionSnapshot;
use crate::target::Debuggee;

/// One encoded record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncodedRecord {
    pub bytes: Vec<u8>,
    /// Every register was written.
    pub full_dump: bool,
}

/// Encoder state for one recording session.
///
/// Holds the snapshot of the previous instruction; feeding the next snapshot
/// produces the previous instruction's record.
#[derive(Debug)]
pub struct JournalEncoder<A: Arch> {
    prev: Option<InstructionSnapshot<A>>,
    /// Registers whose value changed in the last emitted record. They are
    /// written again in the next record so their new value is on disk.
    sticky_changed: Vec<bool>,
    need_thread_id: bool,
    last_thread_id: u32,
    recorded: u64,
}

impl<A: Arch> JournalEncoder<A> {
    pub fn new() -> Self {
        Self {
            prev: None,
            sticky_changed: vec![true; A::REGISTERS.len()],
            need_thread_id: true,
            last_thread_id: 0,
            recorded: 0,
        }
    }

    /// Forget the pending instruction and start a fresh session.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Instructions fed since the last reset.
    pub const fn recorded(&self) -> u64 {
        self.recorded
    }

    /// Whether an instruction is waiting for its record.
    pub const fn has_pending(&self) -> bool {
        self.prev.is_some()
    }

    /// Drop the pending instruction without encoding it.
    pub fn discard_pending(&mut self) {
        self.prev = None;
    }

    /// Feed the snapshot of the instruction about to execute.
    ///
    /// Returns the record of the previous instruction, or `None` for the first
    /// instruction of a session. `target` is read for the memory values the
    /// previous instruction left behind.
    pub fn advance<D>(&mut self, current: InstructionSnapshot<A>, target: &D) -> Result<Option<EncodedRecord>>
    where
        D: Debuggee<A> + ?Sized,
    {
        let record = match self.prev.take() {
            Some(prev) => Some(self.encode(&prev, &current, target)?),
            None => None,
        };
        self.prev = Some(current);
        self.recorded += 1;
        Ok(record)
    }

    fn encode<D>(
        &mut self,
        prev: &InstructionSnapshot<A>,
        current: &InstructionSnapshot<A>,
        target: &D,
    ) -> Result<EncodedRecord>
    where
        D: Debuggee<A> + ?Sized,
    {
        let boundary = self.recorded % FULL_DUMP_INTERVAL == 0;
        let old = prev.registers.words();
        let new = current.registers.words();

        let mut changed = Vec::new();
        for (i, (a, b)) in old.iter().zip(new).enumerate() {
            let differs = a != b;
            if differs || self.sticky_changed[i] || boundary {
                changed.push(i);
            }
            self.sticky_changed[i] = differs;
        }

        let write_thread_id = self.need_thread_id || prev.thread_id != self.last_thread_id || boundary;

        let slots = &prev.memory[..prev.memory.len().min(MAX_MEMORY_SLOTS)];
        let after: Vec<u64> = slots
            .iter()
            .map(|slot| target.read_word(slot.addr).unwrap_or(slot.value))
            .collect();

        let opcode = &prev.opcode[..prev.opcode.len().min(usize::from(OPCODE_LEN_MASK))];
        let mut flags = opcode.len() as u8;
        if write_thread_id {
            flags |= THREAD_ID_FLAG;
        }

        let mut buf = Vec::with_capacity(256);
        buf.push(BLOCK_KIND_INSTRUCTION);
        buf.push(changed.len() as u8);
        buf.push(slots.len() as u8);
        buf.push(flags);
        if write_thread_id {
            buf.extend_from_slice(&prev.thread_id.to_le_bytes());
            self.last_thread_id = prev.thread_id;
            self.need_thread_id = false;
        }
        buf.extend_from_slice(opcode);

        let mut next = 0;
        for &i in &changed {
            buf.push((i - next) as u8);
            next = i + 1;
        }
        for &i in &changed {
            buf.extend_from_slice(&A::word_bytes(old[i]));
        }

        for (slot, &value) in slots.iter().zip(&after) {
            buf.push(if value == slot.value { MEMORY_UNCHANGED } else { 0 });
        }
        for slot in slots {
            buf.extend_from_slice(&A::word_bytes(slot.addr));
        }
        for slot in slots {
            buf.extend_from_slice(&A::word_bytes(slot.value));
        }
        for (slot, &value) in slots.iter().zip(&after) {
            if value != slot.value {
                buf.extend_from_slice(&A::word_bytes(value));
            }
        }

        if buf.len() > RECORD_SCRATCH_SIZE {
            return Err(JournalError::RecordOverflow { size: buf.len() });
        }

        let full_dump = changed.len() == old.len();
        trace!(
            registers = changed.len(),
            slots = slots.len(),
            bytes = buf.len(),
            full_dump,
            "encoded record"
        );
        Ok(EncodedRecord { bytes: buf, full_dump })
    }
}

impl<A: Arch> Default for JournalEncoder<A> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use tracerec_arch::{Register, RegisterSnapshot, X64, X86};

    use super::*;
    use crate::snapshot::MemorySlot;

    /// Memory that always reads back `value`.
    struct Flat {
        value: Option<u64>,
    }

    impl<A: Arch> Debuggee<A> for Flat {
        fn is_active(&self) -> bool {
            true
        }

        fn read_memory(&self, _addr: u64, buf: &mut [u8]) -> bool {
            match self.value {
                Some(v) => {
                    let len = buf.len();
                    buf.copy_from_slice(&v.to_le_bytes()[..len]);
                    true
                }
                None => false,
            }
        }

        fn registers(&self) -> Option<RegisterSnapshot<A>> {
            None
        }

        fn current_thread_id(&self) -> u32 {
            0
        }

        fn thread_local_base(&self) -> Option<u64> {
            None
        }

        fn image_path(&self) -> String {
            String::new()
        }

        fn image_hash(&self) -> u64 {
            0
        }
    }

    fn snapshot<A: Arch>(ip: u64, tid: u32) -> InstructionSnapshot<A> {
        let mut registers = RegisterSnapshot::new();
        registers.set(Register::Ip, ip);
        InstructionSnapshot {
            thread_id: tid,
            registers,
            opcode: vec![0x90],
            memory: Vec::new(),
        }
    }

    #[test]
    fn test_first_instruction_emits_nothing() {
        let mut enc = JournalEncoder::<X64>::new();
        assert!(
            enc.advance(snapshot(0x1000, 1), &Flat { value: None })
                .unwrap()
                .is_none()
        );
        assert!(enc.has_pending());
        assert_eq!(enc.recorded(), 1);
    }

    #[test]
    fn test_first_record_is_full_dump() {
        let mut enc = JournalEncoder::<X86>::new();
        let target = Flat { value: None };
        enc.advance(snapshot(0x1000, 4), &target).unwrap();
        let rec = enc.advance(snapshot(0x1001, 4), &target).unwrap().unwrap();
        assert!(rec.full_dump);

        let regs = X86::REGISTERS.len();
        assert_eq!(rec.bytes[0], BLOCK_KIND_INSTRUCTION);
        assert_eq!(rec.bytes[1] as usize, regs);
        assert_eq!(rec.bytes[2], 0);
        assert_eq!(rec.bytes[3], THREAD_ID_FLAG | 1);
        assert_eq!(&rec.bytes[4..8], &4u32.to_le_bytes());
        assert_eq!(rec.bytes[8], 0x90);
        // Consecutive indices encode as zero gaps.
        assert!(rec.bytes[9..9 + regs].iter().all(|&g| g == 0));
        assert_eq!(rec.bytes.len(), 9 + regs + regs * 4);
    }

    #[test]
    fn test_changed_registers_stay_sticky_for_one_record() {
        let mut enc = JournalEncoder::<X64>::new();
        let target = Flat { value: None };
        let ip_slot = RegisterSnapshot::<X64>::slot_of(Register::Ip).unwrap();

        enc.advance(snapshot(0x1000, 1), &target).unwrap();
        enc.advance(snapshot(0x1001, 1), &target).unwrap();
        // Only ip differs between 0x1001 and 0x1002, and ip was changed last
        // time, so it is the only register written.
        let rec = enc.advance(snapshot(0x1002, 1), &target).unwrap().unwrap();
        assert!(!rec.full_dump);
        assert_eq!(rec.bytes[1], 1);
        assert_eq!(rec.bytes[3], 1, "thread id not repeated");
        assert_eq!(rec.bytes[5] as usize, ip_slot);
        assert_eq!(&rec.bytes[6..14], &0x1001u64.to_le_bytes());

        // Same ip twice: ip is still sticky from the previous record.
        let rec = enc.advance(snapshot(0x1002, 1), &target).unwrap().unwrap();
        assert_eq!(rec.bytes[1], 1);
        let rec = enc.advance(snapshot(0x1002, 1), &target).unwrap().unwrap();
        assert_eq!(rec.bytes[1], 0);
        assert_eq!(rec.bytes.len(), 5);
    }

    #[test]
    fn test_gap_encoding() {
        let mut enc = JournalEncoder::<X64>::new();
        let target = Flat { value: None };
        let mut a = snapshot::<X64>(0, 1);
        enc.advance(a.clone(), &target).unwrap();
        enc.advance(a.clone(), &target).unwrap();
        enc.advance(a.clone(), &target).unwrap();

        a.registers.set(Register::Cx, 5);
        a.registers.set(Register::Sp, 9);
        let b = a.clone();
        a.registers.set(Register::Cx, 0);
        a.registers.set(Register::Sp, 0);
        enc.advance(a, &target).unwrap();
        let rec = enc.advance(b, &target).unwrap().unwrap();
        // cx is slot 2, sp is slot 5.
        assert_eq!(rec.bytes[1], 2);
        assert_eq!(&rec.bytes[5..7], &[2, 2]);
    }

    #[test]
    fn test_thread_switch_writes_thread_id() {
        let mut enc = JournalEncoder::<X64>::new();
        let target = Flat { value: None };
        enc.advance(snapshot(0, 1), &target).unwrap();
        enc.advance(snapshot(0, 2), &target).unwrap();
        let rec = enc.advance(snapshot(0, 2), &target).unwrap().unwrap();
        assert_eq!(rec.bytes[3] & THREAD_ID_FLAG, THREAD_ID_FLAG);
        assert_eq!(&rec.bytes[4..8], &2u32.to_le_bytes());
    }

    #[test]
    fn test_memory_flags() {
        let mut enc = JournalEncoder::<X64>::new();
        let mut a = snapshot::<X64>(0, 1);
        a.memory = vec![
            MemorySlot {
                addr: 0x100,
                value: 7,
            },
            MemorySlot {
                addr: 0x108,
                value: 9,
            },
        ];
        enc.advance(a, &Flat { value: None }).unwrap();
        let rec = enc
            .advance(snapshot(0, 1), &Flat { value: Some(9) })
            .unwrap()
            .unwrap();
        let regs = X64::REGISTERS.len();
        let mem = 4 + 4 + 1 + regs + regs * 8;
        assert_eq!(rec.bytes[2], 2);
        assert_eq!(&rec.bytes[mem..mem + 2], &[0, MEMORY_UNCHANGED]);
        // flags + 2 addresses + 2 old values + 1 new value
        assert_eq!(rec.bytes.len(), mem + 2 + 16 + 16 + 8);
        assert_eq!(&rec.bytes[rec.bytes.len() - 8..], &9u64.to_le_bytes());
    }

    #[test]
    fn test_unreadable_memory_counts_as_unchanged() {
        let mut enc = JournalEncoder::<X64>::new();
        let mut a = snapshot::<X64>(0, 1);
        a.memory = vec![MemorySlot { addr: 0x10, value: 3 }];
        enc.advance(a, &Flat { value: None }).unwrap();
        let rec = enc
            .advance(snapshot(0, 1), &Flat { value: None })
            .unwrap()
            .unwrap();
        let regs = X64::REGISTERS.len();
        let mem = 4 + 4 + 1 + regs + regs * 8;
        assert_eq!(rec.bytes[mem], MEMORY_UNCHANGED);
        assert_eq!(rec.bytes.len(), mem + 1 + 8 + 8);
    }

    #[test]
    fn test_full_dump_interval() {
        let mut enc = JournalEncoder::<X64>::new();
        let target = Flat { value: None };
        let mut full = Vec::new();
        for call in 1..=1100u64 {
            if let Some(rec) = enc.advance(snapshot(0, 1), &target).unwrap() {
                if rec.full_dump {
                    full.push(call);
                }
            }
        }
        assert_eq!(full, vec![2, 513, 1025]);
    }

    #[test]
    fn test_boundary_repeats_unchanged_thread_id() {
        let mut enc = JournalEncoder::<X64>::new();
        let target = Flat { value: None };
        let mut flags = Vec::new();
        for _ in 0..513 {
            if let Some(rec) = enc.advance(snapshot(0, 9), &target).unwrap() {
                flags.push(rec.bytes[3]);
            }
        }
        // Records 0 and 511 are full dumps; only they carry the thread id.
        assert_eq!(flags.len(), 512);
        assert_ne!(flags[0] & THREAD_ID_FLAG, 0);
        assert_eq!(flags[1] & THREAD_ID_FLAG, 0);
        assert_eq!(flags[510] & THREAD_ID_FLAG, 0);
        assert_ne!(flags[511] & THREAD_ID_FLAG, 0);
    }

    #[test]
    fn test_reset() {
        let mut enc = JournalEncoder::<X64>::new();
        let target = Flat { value: None };
        enc.advance(snapshot(0, 1), &target).unwrap();
        enc.advance(snapshot(0, 1), &target).unwrap();
        enc.reset();
        assert!(!enc.has_pending());
        assert_eq!(enc.recorded(), 0);
        enc.advance(snapshot(0, 1), &target).unwrap();
        let rec = enc.advance(snapshot(0, 1), &target).unwrap().unwrap();
        assert!(rec.full_dump);
    }
}
