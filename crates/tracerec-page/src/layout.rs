//! Fixed-size per-page data layouts.
//!
//! `PageData` is a tagged variant: the layout and the storage that matches it
//! travel together, so a page can never be read with the wrong cell width.

use crate::PAGE_SIZE;
use crate::classify::{ByteClass, classify};

/// Bytes of a bit-exec page (one bit per page byte).
const BIT_EXEC_BYTES: usize = PAGE_SIZE / 8;

/// Data layout of an instrumented page.
///
/// Discriminants are the tags stored in the session database; tag 0 means
/// "not instrumented" and is represented as `Option::<PageLayout>::None`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PageLayout {
    /// One executed bit per byte.
    BitExec = 1,
    /// One byte per byte: 2-bit class, 6-bit saturating count.
    ByteCounter = 2,
    /// One little-endian u16 per byte: 2-bit class, 14-bit saturating count.
    WordCounter = 3,
}

impl PageLayout {
    /// Size of the page buffer in bytes.
    pub const fn byte_size(self) -> usize {
        match self {
            Self::BitExec => BIT_EXEC_BYTES,
            Self::ByteCounter => PAGE_SIZE,
            Self::WordCounter => PAGE_SIZE * 2,
        }
    }

    /// Largest hit count the layout can hold.
    pub const fn count_max(self) -> u32 {
        match self {
            Self::BitExec => 0,
            Self::ByteCounter => ByteCell::COUNT_MAX,
            Self::WordCounter => WordCell::COUNT_MAX,
        }
    }

    pub const fn tag(self) -> u8 {
        self as u8
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::BitExec => "bit-exec",
            Self::ByteCounter => "byte-counter",
            Self::WordCounter => "word-counter",
        }
    }
}

impl TryFrom<u8> for PageLayout {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::BitExec),
            2 => Ok(Self::ByteCounter),
            3 => Ok(Self::WordCounter),
            other => Err(other),
        }
    }
}

/// Bit-field access shared by the two counter cell widths.
trait CounterCell: Copy {
    const COUNT_MAX: u32;

    fn class(self) -> ByteClass;
    fn count(self) -> u32;
    fn is_untouched(self) -> bool;
    /// Cell after its first execution.
    fn first_hit(class: ByteClass) -> Self;
    /// Cell after another execution: count saturates, class is replaced.
    fn hit(self, class: ByteClass) -> Self;
    /// Same count, class forced to `Overlapped`.
    fn overlapped(self) -> Self;
}

/// Byte-counter cell: `[class:2][count:6]`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(transparent)]
pub struct ByteCell(pub u8);

impl ByteCell {
    pub const COUNT_MAX: u32 = 0x3F;
    const CLASS_SHIFT: u32 = 6;
}

impl CounterCell for ByteCell {
    const COUNT_MAX: u32 = Self::COUNT_MAX;

    #[inline]
    fn class(self) -> ByteClass {
        ByteClass::from_bits(self.0 >> Self::CLASS_SHIFT)
    }

    #[inline]
    fn count(self) -> u32 {
        u32::from(self.0) & Self::COUNT_MAX
    }

    #[inline]
    fn is_untouched(self) -> bool {
        self.0 == 0
    }

    #[inline]
    fn first_hit(class: ByteClass) -> Self {
        Self((class.bits() << Self::CLASS_SHIFT) | 1)
    }

    #[inline]
    fn hit(self, class: ByteClass) -> Self {
        let count = (self.0 & 0x3F).saturating_add(1).min(0x3F);
        Self((class.bits() << Self::CLASS_SHIFT) | count)
    }

    #[inline]
    fn overlapped(self) -> Self {
        Self(self.0 | (ByteClass::Overlapped.bits() << Self::CLASS_SHIFT))
    }
}

/// Word-counter cell: `[class:2][count:14]`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(transparent)]
pub struct WordCell(pub u16);

impl WordCell {
    pub const COUNT_MAX: u32 = 0x3FFF;
    const CLASS_SHIFT: u32 = 14;
}

impl CounterCell for WordCell {
    const COUNT_MAX: u32 = Self::COUNT_MAX;

    #[inline]
    fn class(self) -> ByteClass {
        ByteClass::from_bits((self.0 >> Self::CLASS_SHIFT) as u8)
    }

    #[inline]
    fn count(self) -> u32 {
        u32::from(self.0) & Self::COUNT_MAX
    }

    #[inline]
    fn is_untouched(self) -> bool {
        self.0 == 0
    }

    #[inline]
    fn first_hit(class: ByteClass) -> Self {
        Self((u16::from(class.bits()) << Self::CLASS_SHIFT) | 1)
    }

    #[inline]
    fn hit(self, class: ByteClass) -> Self {
        let count = (self.0 & 0x3FFF).saturating_add(1).min(0x3FFF);
        Self((u16::from(class.bits()) << Self::CLASS_SHIFT) | count)
    }

    #[inline]
    fn overlapped(self) -> Self {
        Self(self.0 | (u16::from(ByteClass::Overlapped.bits()) << Self::CLASS_SHIFT))
    }
}

/// Storage of one instrumented page.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PageData {
    BitExec(Box<[u8; BIT_EXEC_BYTES]>),
    ByteCounter(Box<[ByteCell; PAGE_SIZE]>),
    WordCounter(Box<[WordCell; PAGE_SIZE]>),
}

impl PageData {
    /// Allocate a zeroed page of the given layout.
    pub fn new(layout: PageLayout) -> Self {
        match layout {
            PageLayout::BitExec => Self::BitExec(Box::new([0; BIT_EXEC_BYTES])),
            PageLayout::ByteCounter => Self::ByteCounter(Box::new([ByteCell(0); PAGE_SIZE])),
            PageLayout::WordCounter => Self::WordCounter(Box::new([WordCell(0); PAGE_SIZE])),
        }
    }

    pub const fn layout(&self) -> PageLayout {
        match self {
            Self::BitExec(_) => PageLayout::BitExec,
            Self::ByteCounter(_) => PageLayout::ByteCounter,
            Self::WordCounter(_) => PageLayout::WordCounter,
        }
    }

    /// Rebuild a page from its raw buffer. The buffer must be exactly
    /// `layout.byte_size()` long.
    pub fn from_bytes(layout: PageLayout, bytes: &[u8]) -> Option<Self> {
        if bytes.len() != layout.byte_size() {
            return None;
        }
        let mut page = Self::new(layout);
        match &mut page {
            Self::BitExec(bits) => bits.copy_from_slice(bytes),
            Self::ByteCounter(cells) => {
                for (cell, &b) in cells.iter_mut().zip(bytes) {
                    *cell = ByteCell(b);
                }
            }
            Self::WordCounter(cells) => {
                for (cell, pair) in cells.iter_mut().zip(bytes.chunks_exact(2)) {
                    *cell = WordCell(u16::from_le_bytes([pair[0], pair[1]]));
                }
            }
        }
        Some(page)
    }

    /// Raw buffer, `layout().byte_size()` long. Word cells are little-endian.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Self::BitExec(bits) => bits.to_vec(),
            Self::ByteCounter(cells) => cells.iter().map(|c| c.0).collect(),
            Self::WordCounter(cells) => cells.iter().flat_map(|c| c.0.to_le_bytes()).collect(),
        }
    }

    /// Record one execution of `size` bytes starting at page `offset`.
    ///
    /// The range must lie inside the page; callers split page-crossing ranges.
    pub fn record(&mut self, offset: usize, size: usize) {
        debug_assert!(offset + size <= PAGE_SIZE);
        match self {
            Self::BitExec(bits) => {
                for i in offset..offset + size {
                    bits[i / 8] |= 1 << (i % 8);
                }
            }
            Self::ByteCounter(cells) => record_counted(&mut cells[offset..offset + size]),
            Self::WordCounter(cells) => record_counted(&mut cells[offset..offset + size]),
        }
    }

    /// Saturating hit count of the byte at `offset`; always 0 for `BitExec`.
    pub fn hit_count(&self, offset: usize) -> u32 {
        match self {
            Self::BitExec(_) => 0,
            Self::ByteCounter(cells) => cells[offset].count(),
            Self::WordCounter(cells) => cells[offset].count(),
        }
    }

    /// Whether the byte at `offset` has executed at least once.
    pub fn is_executed(&self, offset: usize) -> bool {
        match self {
            Self::BitExec(bits) => bits[offset / 8] & (1 << (offset % 8)) != 0,
            _ => self.hit_count(offset) != 0,
        }
    }

    /// Stored class of the byte at `offset`; `Heading` for `BitExec`.
    pub fn byte_class(&self, offset: usize) -> ByteClass {
        match self {
            Self::BitExec(_) => ByteClass::Heading,
            Self::ByteCounter(cells) => cells[offset].class(),
            Self::WordCounter(cells) => cells[offset].class(),
        }
    }

    /// Number of bytes on the page that have executed.
    pub fn executed_bytes(&self) -> usize {
        (0..PAGE_SIZE).filter(|&i| self.is_executed(i)).count()
    }
}

/// Counter update for one execution covering exactly `cells`.
///
/// A touched byte raises the mixed flag when its stored class equals the class
/// computed for this execution. Once raised, later bytes classify as
/// `Overlapped` and every byte of this execution is forced to `Overlapped`.
fn record_counted<C: CounterCell>(cells: &mut [C]) {
    let size = cells.len();
    let mut mixed = false;
    for (i, cell) in cells.iter_mut().enumerate() {
        let class = classify(i, size, mixed);
        if cell.is_untouched() {
            *cell = C::first_hit(class);
        } else {
            mixed |= cell.class() == class;
            *cell = cell.hit(class);
        }
    }
    if mixed {
        for cell in cells.iter_mut() {
            *cell = cell.overlapped();
        }
    }
}
