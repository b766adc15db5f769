//! On-disk layout of trace files.

use std::io::Read;

use serde::{Deserialize, Serialize};
use tracerec_arch::{Arch, ArchTag};

use crate::error::{JournalError, Result};

/// File magic.
pub const TRACE_MAGIC: &[u8; 4] = b"TRAC";

/// Magic plus the u32 header length.
pub const HEADER_PREFIX_LEN: usize = 8;

/// Header format version.
pub const TRACE_VERSION: u32 = 1;

/// Every this many records, all registers and the thread id are written.
pub const FULL_DUMP_INTERVAL: u64 = 512;

/// Memory slots captured per instruction. Extra slots are dropped.
pub const MAX_MEMORY_SLOTS: usize = 32;

/// Upper bound on the encoded size of one record.
pub const RECORD_SCRATCH_SIZE: usize = 3072;

/// Block kind of an instruction record.
pub const BLOCK_KIND_INSTRUCTION: u8 = 0;

/// Record flag: a thread id follows the block header.
pub const THREAD_ID_FLAG: u8 = 0x80;

/// Record flag bits holding the opcode length.
pub const OPCODE_LEN_MASK: u8 = 0x0F;

/// Longest opcode a record can carry.
pub const MAX_OPCODE_LEN: usize = OPCODE_LEN_MASK as usize;

/// Memory flag: the slot's value did not change, no new value follows.
pub const MEMORY_UNCHANGED: u8 = 0x01;

/// JSON header written once at the start of a trace file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceHeader {
    pub ver: u32,
    pub arch: String,
    #[serde(rename = "hashAlgorithm")]
    pub hash_algorithm: String,
    pub hash: String,
    pub compression: String,
    pub path: String,
}

impl TraceHeader {
    /// Header for a trace of the image at `path` whose hash is `hash`.
    pub fn new<A: Arch>(path: &str, hash: u64) -> Self {
        Self {
            ver: TRACE_VERSION,
            arch: A::NAME.to_string(),
            hash_algorithm: "murmurhash".to_string(),
            hash: format!("{hash:#X}"),
            compression: String::new(),
            path: path.to_string(),
        }
    }

    pub fn arch_tag(&self) -> Result<ArchTag> {
        ArchTag::from_name(&self.arch).ok_or_else(|| JournalError::UnknownArch(self.arch.clone()))
    }

    /// Parsed image hash.
    pub fn image_hash(&self) -> Option<u64> {
        let digits = self.hash.strip_prefix("0x").or_else(|| self.hash.strip_prefix("0X"))?;
        u64::from_str_radix(digits, 16).ok()
    }

    /// Magic, length prefix and JSON text, ready to be written in one go.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let json = serde_json::to_vec(self)?;
        let len = u32::try_from(json.len()).map_err(|_| JournalError::RecordOverflow { size: json.len() })?;
        let mut buf = Vec::with_capacity(HEADER_PREFIX_LEN + json.len());
        buf.extend_from_slice(TRACE_MAGIC);
        buf.extend_from_slice(&len.to_le_bytes());
        buf.extend_from_slice(&json);
        Ok(buf)
    }

    /// Read the header from the start of a trace file.
    ///
    /// Returns the header and the number of bytes it occupied.
    pub fn read_from(reader: &mut impl Read) -> Result<(Self, u64)> {
        let mut prefix = [0u8; HEADER_PREFIX_LEN];
        reader
            .read_exact(&mut prefix)
            .map_err(|_| JournalError::BadMagic)?;
        if &prefix[..4] != TRACE_MAGIC {
            return Err(JournalError::BadMagic);
        }
        let len = u32::from_le_bytes([prefix[4], prefix[5], prefix[6], prefix[7]]) as usize;
        let mut json = vec![0u8; len];
        reader
            .read_exact(&mut json)
            .map_err(|_| JournalError::Truncated {
                offset: HEADER_PREFIX_LEN as u64,
            })?;
        let header = serde_json::from_slice(&json)?;
        Ok((header, (HEADER_PREFIX_LEN + len) as u64))
    }
}
