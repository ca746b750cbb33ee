//! Tag words and the per-block record stream.
//!
//! Each metadata block is an append-only commit log. After a 4-byte
//! revision counter, the block holds a sequence of records: a 4-byte
//! big-endian tag word followed by `length` payload bytes, padded to the
//! next 4-byte boundary. The stored word is not the tag's value: every tag
//! is XORed with the previously *decoded* tag, seeded with `0xFFFF_FFFF` at
//! the start of each block. Decoding is therefore chain-sensitive: a tag
//! can only be read by reading all of its predecessors in the same block.

use lfsr_types::{ObjectId, REVISION_LEN, TAG_CHAIN_SEED, TAG_LEN, align_up4, read_le_u32};
use serde::{Deserialize, Serialize};

// ── chunk sub-kinds (low 8 bits of the on-disk record type) ────────────────

pub const CHUNK_NAME_FILE: u8 = 0x01;
pub const CHUNK_NAME_DIR: u8 = 0x02;
pub const CHUNK_NAME_SUPERBLOCK: u8 = 0xFF;

pub const CHUNK_STRUCT_DIR_PAIR: u8 = 0x00;
pub const CHUNK_STRUCT_INLINE: u8 = 0x01;
pub const CHUNK_STRUCT_CTZ: u8 = 0x02;

/// Creation marker in the delete family; inserts an id without content.
pub const CHUNK_DELETE_CREATE: u8 = 0x01;
/// Tombstone: unlinks the id from the log's live state.
pub const CHUNK_DELETE_TOMBSTONE: u8 = 0xFF;

/// Link in the threaded directory list; not part of this directory's log.
pub const CHUNK_TAIL_SOFT: u8 = 0x00;
/// Continuation of the same directory's log in another pair.
pub const CHUNK_TAIL_HARD: u8 = 0x01;

/// Abstract record kind, from bits 28–30 of the decoded tag word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TagKind {
    Name,
    Struct,
    Delete,
    Crc,
    Tail,
    Unknown(u8),
}

impl TagKind {
    #[must_use]
    pub fn from_bits(bits: u8) -> Self {
        match bits {
            0 => Self::Name,
            2 => Self::Struct,
            4 => Self::Delete,
            5 => Self::Crc,
            6 => Self::Tail,
            other => Self::Unknown(other),
        }
    }

    #[must_use]
    pub fn to_bits(self) -> u8 {
        match self {
            Self::Name => 0,
            Self::Struct => 2,
            Self::Delete => 4,
            Self::Crc => 5,
            Self::Tail => 6,
            Self::Unknown(other) => other,
        }
    }
}

impl std::fmt::Display for TagKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Name => write!(f, "NAME"),
            Self::Struct => write!(f, "STRUCT"),
            Self::Delete => write!(f, "DELETE"),
            Self::Crc => write!(f, "CRC"),
            Self::Tail => write!(f, "TAIL"),
            Self::Unknown(bits) => write!(f, "TYPE{bits}"),
        }
    }
}

/// A decoded 32-bit tag word.
///
/// Bit layout: `invalid` bit 31, kind bits 28–30, chunk bits 20–27,
/// id bits 10–19, payload length bits 0–9.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag(pub u32);

impl Tag {
    /// Build a tag value from its fields. Out-of-range fields are masked to
    /// their on-disk width.
    #[must_use]
    pub fn assemble(kind: TagKind, chunk: u8, id: u16, length: u16) -> Self {
        Self(
            (u32::from(kind.to_bits() & 0x7) << 28)
                | (u32::from(chunk) << 20)
                | (u32::from(id & 0x3FF) << 10)
                | u32::from(length & 0x3FF),
        )
    }

    /// Bit 31: set on the word read from erased flash past the last commit.
    #[must_use]
    pub fn is_end_marker(self) -> bool {
        (self.0 >> 31) & 1 == 1
    }

    #[must_use]
    pub fn kind(self) -> TagKind {
        TagKind::from_bits(((self.0 >> 28) & 0x7) as u8)
    }

    #[must_use]
    pub fn chunk(self) -> u8 {
        ((self.0 >> 20) & 0xFF) as u8
    }

    #[must_use]
    pub fn id(self) -> ObjectId {
        ObjectId(((self.0 >> 10) & 0x3FF) as u16)
    }

    /// Payload length in bytes, 0–1023.
    #[must_use]
    pub fn length(self) -> u16 {
        (self.0 & 0x3FF) as u16
    }
}

/// One record: decoded tag plus its borrowed payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Record<'a> {
    /// Offset of the tag word within the block.
    pub offset: usize,
    pub tag: Tag,
    pub payload: &'a [u8],
    /// Commit-checksum confidence, populated on CRC records only. A
    /// mismatch is a signal, never a stop condition: forensic decoding must
    /// tolerate images whose checksums were never finalized.
    pub crc_valid: Option<bool>,
}

/// Why iteration over a block's record stream stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "reason", content = "offset")]
pub enum StreamEnd {
    /// Decoded word had the invalid bit set: clean end of the log.
    EndMarker(usize),
    /// No room left in the block for another tag word.
    Exhausted(usize),
    /// A declared payload would cross the block boundary. Records already
    /// yielded remain valid; this is a soft condition.
    Truncated(usize),
}

impl StreamEnd {
    /// True when the stream ended mid-record rather than at a log boundary.
    #[must_use]
    pub fn is_truncated(self) -> bool {
        matches!(self, Self::Truncated(_))
    }
}

/// Lazy decoder for one block's record stream.
///
/// The XOR accumulator is an explicit field, never ambient state, so the
/// decoder works on arbitrary byte slices without any block-store context.
/// The stream is finite and non-restartable; re-decoding a block means
/// constructing a new `TagStream` (cheap, nothing is memoized).
#[derive(Debug)]
pub struct TagStream<'a> {
    block: &'a [u8],
    pos: usize,
    xor_state: u32,
    commit_start: usize,
    end: Option<StreamEnd>,
}

impl<'a> TagStream<'a> {
    #[must_use]
    pub fn new(block: &'a [u8]) -> Self {
        Self {
            block,
            pos: REVISION_LEN,
            xor_state: TAG_CHAIN_SEED,
            commit_start: 0,
            end: None,
        }
    }

    /// Stream termination status; `None` while records remain.
    #[must_use]
    pub fn end(&self) -> Option<StreamEnd> {
        self.end
    }

    /// Checksum of one commit region, matching the on-disk convention:
    /// every byte from the start of the commit (block start for the first
    /// commit) up to and including the CRC record's tag word.
    fn commit_checksum(&self, crc_tag_offset: usize) -> u32 {
        !crc32fast::hash(&self.block[self.commit_start..crc_tag_offset + TAG_LEN])
    }
}

impl<'a> Iterator for TagStream<'a> {
    type Item = Record<'a>;

    fn next(&mut self) -> Option<Record<'a>> {
        if self.end.is_some() {
            return None;
        }
        if self.pos + TAG_LEN > self.block.len() {
            self.end = Some(StreamEnd::Exhausted(self.pos));
            return None;
        }

        let stored = u32::from_be_bytes([
            self.block[self.pos],
            self.block[self.pos + 1],
            self.block[self.pos + 2],
            self.block[self.pos + 3],
        ]);
        let tag = Tag(stored ^ self.xor_state);
        if tag.is_end_marker() {
            self.end = Some(StreamEnd::EndMarker(self.pos));
            return None;
        }

        let length = tag.length() as usize;
        let payload_start = self.pos + TAG_LEN;
        if payload_start + length > self.block.len() {
            self.end = Some(StreamEnd::Truncated(self.pos));
            return None;
        }

        let offset = self.pos;
        let payload = &self.block[payload_start..payload_start + length];
        let crc_valid = (tag.kind() == TagKind::Crc).then(|| {
            read_le_u32(payload, 0).is_ok_and(|stored_crc| stored_crc == self.commit_checksum(offset))
        });

        self.xor_state = tag.0;
        self.pos = payload_start + align_up4(length);
        if tag.kind() == TagKind::Crc {
            self.commit_start = self.pos;
        }

        Some(Record {
            offset,
            tag,
            payload,
            crc_valid,
        })
    }
}
