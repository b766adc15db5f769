//! Byte classification.

/// Position of a byte within the instruction(s) that executed through it.
///
/// The discriminants are the 2-bit tags stored in the top bits of counter cells.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ByteClass {
    /// Interior byte of an instruction.
    Body = 0,
    /// First byte of an instruction.
    Heading = 1,
    /// Last byte of an instruction.
    Tailing = 2,
    /// Byte reached through more than one instruction alignment.
    Overlapped = 3,
}

impl ByteClass {
    /// Decode a 2-bit tag. Only the low two bits are considered.
    pub const fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0 => Self::Body,
            1 => Self::Heading,
            2 => Self::Tailing,
            _ => Self::Overlapped,
        }
    }

    pub const fn bits(self) -> u8 {
        self as u8
    }
}

/// Classify byte `index` of an instruction of `size` bytes.
///
/// Once a call has seen a mixed byte every remaining byte is `Overlapped`.
/// A single-byte instruction is `Heading`.
#[inline]
pub const fn classify(index: usize, size: usize, mixed: bool) -> ByteClass {
    if mixed {
        ByteClass::Overlapped
    } else if index == 0 {
        ByteClass::Heading
    } else if index + 1 == size {
        ByteClass::Tailing
    } else {
        ByteClass::Body
    }
}
