//! Debuggee word width.
//!
//! These are generic "32 vs 64 bit" types. Everything the journal writes as a
//! machine word (register values, memory slot addresses and values) is sized by
//! `Arch::WORD_BYTES`.

use std::fmt::Debug;
use std::hash::Hash;

use crate::Register;

/// Marker type for a 32-bit debuggee.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct X86;

/// Marker type for a 64-bit debuggee.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct X64;

/// Trait for word-width-dependent behavior.
///
/// Uses marker types (X86/X64) with associated constants instead of const generics
/// so the register file order can be attached to the type.
pub trait Arch: Copy + Clone + Send + Sync + Default + Debug + Hash + 'static {
    /// Tag written into the trace header (`"x86"` or `"x64"`).
    const NAME: &'static str;

    /// Word width in bits (32 or 64).
    const VALUE: u8;

    /// Bytes per machine word (4 or 8).
    const WORD_BYTES: usize;

    /// Registers captured in a snapshot, in journal order.
    const REGISTERS: &'static [Register];

    /// Segment register whose base is the thread's local storage block.
    const TLS_SEGMENT: Register;

    /// Truncate a value to word width.
    fn truncate(val: u64) -> u64;

    /// Little-endian encoding of a word, `WORD_BYTES` long.
    fn word_bytes(val: u64) -> Vec<u8> {
        val.to_le_bytes()[..Self::WORD_BYTES].to_vec()
    }

    /// Decode a little-endian word. `bytes` must hold at least `WORD_BYTES`.
    fn word_from_bytes(bytes: &[u8]) -> u64 {
        let mut buf = [0u8; 8];
        buf[..Self::WORD_BYTES].copy_from_slice(&bytes[..Self::WORD_BYTES]);
        u64::from_le_bytes(buf)
    }
}

impl Arch for X86 {
    const NAME: &'static str = "x86";
    const VALUE: u8 = 32;
    const WORD_BYTES: usize = 4;
    const REGISTERS: &'static [Register] = crate::registers::X86_REGISTERS;
    const TLS_SEGMENT: Register = Register::Fs;

    #[inline]
    fn truncate(val: u64) -> u64 {
        val & 0xFFFF_FFFF
    }
}

impl Arch for X64 {
    const NAME: &'static str = "x64";
    const VALUE: u8 = 64;
    const WORD_BYTES: usize = 8;
    const REGISTERS: &'static [Register] = crate::registers::X64_REGISTERS;
    const TLS_SEGMENT: Register = Register::Gs;

    #[inline]
    fn truncate(val: u64) -> u64 {
        val
    }
}

/// Runtime view of an architecture, recovered from a trace header tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ArchTag {
    X86,
    X64,
}

impl ArchTag {
    /// Parse the header tag written by `Arch::NAME`.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "x86" => Some(Self::X86),
            "x64" => Some(Self::X64),
            _ => None,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::X86 => X86::NAME,
            Self::X64 => X64::NAME,
        }
    }

    /// Word width in bits.
    pub const fn bits(self) -> u8 {
        match self {
            Self::X86 => X86::VALUE,
            Self::X64 => X64::VALUE,
        }
    }

    pub const fn word_bytes(self) -> usize {
        match self {
            Self::X86 => X86::WORD_BYTES,
            Self::X64 => X64::WORD_BYTES,
        }
    }

    pub const fn registers(self) -> &'static [Register] {
        match self {
            Self::X86 => X86::REGISTERS,
            Self::X64 => X64::REGISTERS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arch_x86() {
        assert_eq!(X86::VALUE, 32);
        assert_eq!(X86::WORD_BYTES, 4);
        assert_eq!(X86::truncate(0x1_2345_6789), 0x2345_6789);
        assert_eq!(X86::word_bytes(0x1122_3344), vec![0x44, 0x33, 0x22, 0x11]);
    }

    #[test]
    fn test_arch_x64() {
        assert_eq!(X64::VALUE, 64);
        assert_eq!(X64::WORD_BYTES, 8);
        assert_eq!(X64::truncate(u64::MAX), u64::MAX);
        let bytes = X64::word_bytes(0x0102_0304_0506_0708);
        assert_eq!(bytes.len(), 8);
        assert_eq!(X64::word_from_bytes(&bytes), 0x0102_0304_0506_0708);
    }

    #[test]
    fn test_arch_tag_roundtrip() {
        assert_eq!(ArchTag::from_name("x64"), Some(ArchTag::X64));
        assert_eq!(ArchTag::from_name("x86"), Some(ArchTag::X86));
        assert_eq!(ArchTag::from_name("arm64"), None);
        assert_eq!(ArchTag::X86.word_bytes(), 4);
        assert_eq!(ArchTag::X64.bits(), 64);
        assert_eq!(ArchTag::X64.registers().len(), X64::REGISTERS.len());
    }
}
