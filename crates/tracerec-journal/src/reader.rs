//! Sequential reader for trace files.

use std::fs::File;
use std::io::{BufReader, ErrorKind, Read};
use std::path::Path;

use tracerec_arch::ArchTag;

use crate::error::{JournalError, Result};
use crate::format::{BLOCK_KIND_INSTRUCTION, MEMORY_UNCHANGED, OPCODE_LEN_MASK, THREAD_ID_FLAG, TraceHeader};

/// A memory word touched by an instruction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MemoryAccess {
    pub addr: u64,
    pub old: u64,
    pub new: u64,
}

impl MemoryAccess {
    pub const fn changed(&self) -> bool {
        self.old != self.new
    }
}

/// One decoded instruction record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JournalRecord {
    /// Position of the record in the file, counting from 0.
    pub index: u64,
    /// Byte offset of the record.
    pub offset: u64,
    /// Thread that executed the instruction, carried forward when the record
    /// does not repeat it.
    pub thread_id: u32,
    pub opcode: Vec<u8>,
    /// `(register slot, value before the instruction)` for every written register.
    pub registers: Vec<(usize, u64)>,
    pub memory: Vec<MemoryAccess>,
    /// Every register was written.
    pub full_dump: bool,
}

/// Location of a full-dump record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IndexEntry {
    pub record: u64,
    pub offset: u64,
}

pub struct JournalReader<R> {
    reader: R,
    header: TraceHeader,
    arch: ArchTag,
    offset: u64,
    index: u64,
    thread_id: u32,
    failed: bool,
}

impl JournalReader<BufReader<File>> {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::new(BufReader::new(File::open(path)?))
    }
}

impl<R: Read> JournalReader<R> {
    /// Parse the header and position at the first record.
    pub fn new(mut reader: R) -> Result<Self> {
        let (header, offset) = TraceHeader::read_from(&mut reader)?;
        let arch = header.arch_tag()?;
        Ok(Self {
            reader,
            header,
            arch,
            offset,
            index: 0,
            thread_id: 0,
            failed: false,
        })
    }

    pub const fn header(&self) -> &TraceHeader {
        &self.header
    }

    pub const fn arch(&self) -> ArchTag {
        self.arch
    }

    /// Byte offset of the next record.
    pub const fn offset(&self) -> u64 {
        self.offset
    }

    /// Read the next record. `Ok(None)` at a clean end of file.
    pub fn next_record(&mut self) -> Result<Option<JournalRecord>> {
        let start = self.offset;
        let mut kind = [0u8; 1];
        loop {
            match self.reader.read(&mut kind) {
                Ok(0) => return Ok(None),
                Ok(_) => break,
                Err(err) if err.kind() == ErrorKind::Interrupted => {}
                Err(err) => return Err(err.into()),
            }
        }
        self.offset += 1;
        if kind[0] != BLOCK_KIND_INSTRUCTION {
            return Err(JournalError::UnknownBlockKind {
                kind: kind[0],
                offset: start,
            });
        }

        let mut head = [0u8; 3];
        self.fill(&mut head, start)?;
        let [reg_count, mem_count, flags] = head;

        if flags & THREAD_ID_FLAG != 0 {
            let mut tid = [0u8; 4];
            self.fill(&mut tid, start)?;
            self.thread_id = u32::from_le_bytes(tid);
        }

        let mut opcode = vec![0u8; usize::from(flags & OPCODE_LEN_MASK)];
        self.fill(&mut opcode, start)?;

        let mut gaps = vec![0u8; usize::from(reg_count)];
        self.fill(&mut gaps, start)?;
        let mut registers = Vec::with_capacity(gaps.len());
        let mut next = 0usize;
        for gap in gaps {
            let slot = next + usize::from(gap);
            registers.push((slot, self.word(start)?));
            next = slot + 1;
        }

        let mut mem_flags = vec![0u8; usize::from(mem_count)];
        self.fill(&mut mem_flags, start)?;
        let mut addrs = Vec::with_capacity(mem_flags.len());
        for _ in 0..mem_count {
            addrs.push(self.word(start)?);
        }
        let mut memory = Vec::with_capacity(mem_flags.len());
        for addr in addrs {
            let old = self.word(start)?;
            memory.push(MemoryAccess { addr, old, new: old });
        }
        for (access, flag) in memory.iter_mut().zip(&mem_flags) {
            if flag & MEMORY_UNCHANGED == 0 {
                access.new = self.word(start)?;
            }
        }

        let record = JournalRecord {
            index: self.index,
            offset: start,
            thread_id: self.thread_id,
            opcode,
            full_dump: registers.len() == self.arch.registers().len(),
            registers,
            memory,
        };
        self.index += 1;
        Ok(Some(record))
    }

    /// Scan the rest of the file for full-dump records.
    pub fn build_index(mut self) -> Result<Vec<IndexEntry>> {
        let mut index = Vec::new();
        while let Some(record) = self.next_record()? {
            if record.full_dump {
                index.push(IndexEntry {
                    record: record.index,
                    offset: record.offset,
                });
            }
        }
        Ok(index)
    }

    fn fill(&mut self, buf: &mut [u8], start: u64) -> Result<()> {
        self.reader.read_exact(buf).map_err(|err| match err.kind() {
            ErrorKind::UnexpectedEof => JournalError::Truncated { offset: start },
            _ => JournalError::Io(err),
        })?;
        self.offset += buf.len() as u64;
        Ok(())
    }

    fn word(&mut self, start: u64) -> Result<u64> {
        let mut buf = [0u8; 8];
        let len = self.arch.word_bytes();
        self.fill(&mut buf[..len], start)?;
        Ok(u64::from_le_bytes(buf))
    }
}

impl<R: Read> Iterator for JournalReader<R> {
    type Item = Result<JournalRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let item = self.next_record().transpose();
        if matches!(item, Some(Err(_))) {
            self.failed = true;
        }
        item
    }
}
