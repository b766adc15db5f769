//! Register file layout and snapshots.

use std::fmt;
use std::marker::PhantomData;

use crate::Arch;

/// Architectural register, named independently of width.
///
/// `Ax` is `eax` on x86 and `rax` on x64; `R8`..`R15` only exist on x64.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Register {
    Ax,
    Bx,
    Cx,
    Dx,
    Bp,
    Sp,
    Si,
    Di,
    R8,
    R9,
    R10,
    R11,
    R12,
    R13,
    R14,
    R15,
    Ip,
    Flags,
    Gs,
    Fs,
    Es,
    Ds,
    Cs,
    Ss,
    Dr0,
    Dr1,
    Dr2,
    Dr3,
    Dr6,
    Dr7,
}

impl Register {
    /// Register name at the given word width.
    pub const fn name(self, bits: u8) -> &'static str {
        let wide = bits == 64;
        match self {
            Self::Ax => if wide { "rax" } else { "eax" },
            Self::Bx => if wide { "rbx" } else { "ebx" },
            Self::Cx => if wide { "rcx" } else { "ecx" },
            Self::Dx => if wide { "rdx" } else { "edx" },
            Self::Bp => if wide { "rbp" } else { "ebp" },
            Self::Sp => if wide { "rsp" } else { "esp" },
            Self::Si => if wide { "rsi" } else { "esi" },
            Self::Di => if wide { "rdi" } else { "edi" },
            Self::R8 => "r8",
            Self::R9 => "r9",
            Self::R10 => "r10",
            Self::R11 => "r11",
            Self::R12 => "r12",
            Self::R13 => "r13",
            Self::R14 => "r14",
            Self::R15 => "r15",
            Self::Ip => if wide { "rip" } else { "eip" },
            Self::Flags => if wide { "rflags" } else { "eflags" },
            Self::Gs => "gs",
            Self::Fs => "fs",
            Self::Es => "es",
            Self::Ds => "ds",
            Self::Cs => "cs",
            Self::Ss => "ss",
            Self::Dr0 => "dr0",
            Self::Dr1 => "dr1",
            Self::Dr2 => "dr2",
            Self::Dr3 => "dr3",
            Self::Dr6 => "dr6",
            Self::Dr7 => "dr7",
        }
    }
}

pub(crate) const X86_REGISTERS: &[Register] = &[
    Register::Ax,
    Register::Bx,
    Register::Cx,
    Register::Dx,
    Register::Bp,
    Register::Sp,
    Register::Si,
    Register::Di,
    Register::Ip,
    Register::Flags,
    Register::Gs,
    Register::Fs,
    Register::Es,
    Register::Ds,
    Register::Cs,
    Register::Ss,
    Register::Dr0,
    Register::Dr1,
    Register::Dr2,
    Register::Dr3,
    Register::Dr6,
    Register::Dr7,
];

pub(crate) const X64_REGISTERS: &[Register] = &[
    Register::Ax,
    Register::Bx,
    Register::Cx,
    Register::Dx,
    Register::Bp,
    Register::Sp,
    Register::Si,
    Register::Di,
    Register::R8,
    Register::R9,
    Register::R10,
    Register::R11,
    Register::R12,
    Register::R13,
    Register::R14,
    Register::R15,
    Register::Ip,
    Register::Flags,
    Register::Gs,
    Register::Fs,
    Register::Es,
    Register::Ds,
    Register::Cs,
    Register::Ss,
    Register::Dr0,
    Register::Dr1,
    Register::Dr2,
    Register::Dr3,
    Register::Dr6,
    Register::Dr7,
];

/// Full register file of one thread, one word per slot in `A::REGISTERS` order.
#[derive(Clone, PartialEq, Eq)]
pub struct RegisterSnapshot<A: Arch> {
    words: Vec<u64>,
    _marker: PhantomData<A>,
}

impl<A: Arch> RegisterSnapshot<A> {
    /// Create a zeroed snapshot.
    pub fn new() -> Self {
        Self {
            words: vec![0; A::REGISTERS.len()],
            _marker: PhantomData,
        }
    }

    /// Build from raw words. Returns `None` if the slot count does not match.
    pub fn from_words(words: Vec<u64>) -> Option<Self> {
        if words.len() != A::REGISTERS.len() {
            return None;
        }
        Some(Self {
            words: words.into_iter().map(A::truncate).collect(),
            _marker: PhantomData,
        })
    }

    /// Slot index of a register, if the architecture has it.
    pub fn slot_of(reg: Register) -> Option<usize> {
        A::REGISTERS.iter().position(|&r| r == reg)
    }

    pub fn get(&self, reg: Register) -> Option<u64> {
        Self::slot_of(reg).map(|i| self.words[i])
    }

    /// Set a register. Returns false if the architecture lacks it.
    pub fn set(&mut self, reg: Register, value: u64) -> bool {
        match Self::slot_of(reg) {
            Some(i) => {
                self.words[i] = A::truncate(value);
                true
            }
            None => false,
        }
    }

    /// Instruction pointer.
    pub fn ip(&self) -> u64 {
        self.get(Register::Ip).unwrap_or_default()
    }

    /// Stack pointer.
    pub fn sp(&self) -> u64 {
        self.get(Register::Sp).unwrap_or_default()
    }

    pub fn words(&self) -> &[u64] {
        &self.words
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }
}

impl<A: Arch> Default for RegisterSnapshot<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: Arch> fmt::Debug for RegisterSnapshot<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (reg, value) in A::REGISTERS.iter().zip(&self.words) {
            map.entry(&reg.name(A::VALUE), &format_args!("{value:#x}"));
        }
        map.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{X64, X86};

    #[test]
    fn test_register_file_sizes() {
        assert_eq!(X86::REGISTERS.len(), 22);
        assert_eq!(X64::REGISTERS.len(), 30);
        // Gap deltas in the journal are single bytes.
        assert!(X64::REGISTERS.len() < 256);
    }

    #[test]
    fn test_snapshot_get_set() {
        let mut regs = RegisterSnapshot::<X64>::new();
        assert!(regs.set(Register::Sp, 0x7ff0));
        assert!(regs.set(Register::R12, 42));
        assert_eq!(regs.sp(), 0x7ff0);
        assert_eq!(regs.get(Register::R12), Some(42));

        let mut regs = RegisterSnapshot::<X86>::new();
        assert!(!regs.set(Register::R12, 42));
        assert_eq!(regs.get(Register::R12), None);
        assert!(regs.set(Register::Ip, 0x1_0040_1000));
        assert_eq!(regs.ip(), 0x0040_1000);
    }

    #[test]
    fn test_snapshot_from_words() {
        assert!(RegisterSnapshot::<X86>::from_words(vec![0; 3]).is_none());
        let regs = RegisterSnapshot::<X86>::from_words(vec![7; 22]).unwrap();
        assert_eq!(regs.get(Register::Dr7), Some(7));
    }

    #[test]
    fn test_register_names() {
        assert_eq!(Register::Ax.name(64), "rax");
        assert_eq!(Register::Ax.name(32), "eax");
        assert_eq!(Register::Flags.name(64), "rflags");
    }
}
