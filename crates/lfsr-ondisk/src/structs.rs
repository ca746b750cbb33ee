//! Superblock and file-structure record parsing.

use crate::tag::{
    CHUNK_STRUCT_CTZ, CHUNK_STRUCT_DIR_PAIR, CHUNK_STRUCT_INLINE, Record, TagKind, TagStream,
};
use lfsr_types::{
    BlockIndex, LFS_MAGIC, LFS_MAGIC_OFFSET, ParseError, Revision, SUPERBLOCK_FIELDS_LEN,
    ensure_slice, read_fixed, read_le_u32,
};
use serde::{Deserialize, Serialize};

/// Per-block revision counter, first 4 bytes of every metadata block.
pub fn read_revision(block: &[u8]) -> Result<Revision, ParseError> {
    Ok(Revision(read_le_u32(block, 0)?))
}

/// Root descriptor: format version and geometry.
///
/// Carried as six little-endian u32 fields in the payload of the first
/// structure record following the 8-byte `"littlefs"` magic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Superblock {
    pub version_major: u16,
    pub version_minor: u16,
    pub block_size: u32,
    pub block_count: u32,
    pub name_max: u32,
    pub file_max: u32,
    pub attr_max: u32,
}

impl Superblock {
    /// Check for the filesystem magic at its fixed offset.
    #[must_use]
    pub fn block_has_magic(block: &[u8]) -> bool {
        block
            .get(LFS_MAGIC_OFFSET..LFS_MAGIC_OFFSET + LFS_MAGIC.len())
            .is_some_and(|bytes| bytes == LFS_MAGIC)
    }

    /// Parse a superblock-bearing metadata block.
    ///
    /// Verifies the magic, then decodes the record stream: the first record
    /// is the superblock name entry (its payload *is* the magic), and the
    /// first structure record after it carries the geometry fields.
    pub fn parse_block(block: &[u8]) -> Result<(Revision, Self), ParseError> {
        let magic = read_fixed::<8>(block, LFS_MAGIC_OFFSET)?;
        if &magic != LFS_MAGIC {
            return Err(ParseError::InvalidMagic { actual: magic });
        }
        let revision = read_revision(block)?;

        let mut stream = TagStream::new(block);
        let fields = stream
            .find(|record| record.tag.kind() == TagKind::Struct)
            .ok_or(ParseError::InvalidField {
                field: "superblock",
                reason: "no structure record after magic",
            })?;
        if fields.tag.chunk() != CHUNK_STRUCT_INLINE {
            return Err(ParseError::InvalidField {
                field: "superblock",
                reason: "geometry record is not inline",
            });
        }

        Ok((revision, Self::parse_fields(fields.payload)?))
    }

    /// Parse the six-field geometry payload.
    pub fn parse_fields(payload: &[u8]) -> Result<Self, ParseError> {
        ensure_slice(payload, 0, SUPERBLOCK_FIELDS_LEN)?;
        let version = read_le_u32(payload, 0)?;
        Ok(Self {
            version_major: (version >> 16) as u16,
            version_minor: (version & 0xFFFF) as u16,
            block_size: read_le_u32(payload, 4)?,
            block_count: read_le_u32(payload, 8)?,
            name_max: read_le_u32(payload, 12)?,
            file_max: read_le_u32(payload, 16)?,
            attr_max: read_le_u32(payload, 20)?,
        })
    }
}

/// Decoded structure record: where an object's content lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStruct {
    /// Content stored directly in the metadata log.
    Inline(Vec<u8>),
    /// Pointer to a CTZ skip-list of data blocks.
    CtzList { head: BlockIndex, size: u32 },
    /// A directory's child metadata pair.
    DirPair([u32; 2]),
}

impl FileStruct {
    /// Parse a structure record's payload according to its chunk sub-kind.
    pub fn parse(record: &Record<'_>) -> Result<Self, ParseError> {
        match record.tag.chunk() {
            CHUNK_STRUCT_INLINE => Ok(Self::Inline(record.payload.to_vec())),
            CHUNK_STRUCT_CTZ => Ok(Self::CtzList {
                head: BlockIndex(read_le_u32(record.payload, 0)?),
                size: read_le_u32(record.payload, 4)?,
            }),
            CHUNK_STRUCT_DIR_PAIR => Ok(Self::DirPair([
                read_le_u32(record.payload, 0)?,
                read_le_u32(record.payload, 4)?,
            ])),
            _ => Err(ParseError::InvalidField {
                field: "struct_chunk",
                reason: "unknown structure sub-kind",
            }),
        }
    }

    /// Content length for file structures; `None` for directory pairs.
    #[must_use]
    pub fn content_len(&self) -> Option<u32> {
        match self {
            Self::Inline(bytes) => Some(bytes.len() as u32),
            Self::CtzList { size, .. } => Some(*size),
            Self::DirPair(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tag::{CHUNK_NAME_SUPERBLOCK, Tag};
    use lfsr_types::{TAG_CHAIN_SEED, align_up4};

    fn push_record(block: &mut Vec<u8>, xor_state: &mut u32, tag: Tag, payload: &[u8]) {
        block.extend_from_slice(&(tag.0 ^ *xor_state).to_be_bytes());
        *xor_state = tag.0;
        block.extend_from_slice(payload);
        block.resize(block.len() + (align_up4(payload.len()) - payload.len()), 0);
    }

    fn geometry_payload() -> Vec<u8> {
        let mut payload = Vec::new();
        for field in [0x0002_0000_u32, 512, 256, 255, 0x7FFF_FFFF, 1022] {
            payload.extend_from_slice(&field.to_le_bytes());
        }
        payload
    }

    fn superblock_block(revision: u32) -> Vec<u8> {
        let mut block = revision.to_le_bytes().to_vec();
        let mut xor = TAG_CHAIN_SEED;
        push_record(
            &mut block,
            &mut xor,
            Tag::assemble(TagKind::Name, CHUNK_NAME_SUPERBLOCK, 0, 8),
            LFS_MAGIC,
        );
        push_record(
            &mut block,
            &mut xor,
            Tag::assemble(TagKind::Struct, CHUNK_STRUCT_INLINE, 0, 24),
            &geometry_payload(),
        );
        block.resize(512, 0xFF);
        block
    }

    #[test]
    fn magic_lands_at_fixed_offset() {
        let block = superblock_block(7);
        assert_eq!(&block[8..16], LFS_MAGIC);
        assert!(Superblock::block_has_magic(&block));
        assert!(!Superblock::block_has_magic(&[0xFF_u8; 512]));
    }

    #[test]
    fn parse_block_reads_geometry_fields() {
        let (revision, sb) = Superblock::parse_block(&superblock_block(7)).expect("parse");
        assert_eq!(revision, Revision(7));
        assert_eq!(sb.version_major, 2);
        assert_eq!(sb.version_minor, 0);
        assert_eq!(sb.block_size, 512);
        assert_eq!(sb.block_count, 256);
        assert_eq!(sb.name_max, 255);
        assert_eq!(sb.file_max, 0x7FFF_FFFF);
        assert_eq!(sb.attr_max, 1022);
    }

    #[test]
    fn parse_block_rejects_missing_magic() {
        let err = Superblock::parse_block(&[0_u8; 512]).expect_err("no magic");
        assert!(matches!(err, ParseError::InvalidMagic { .. }));
    }

    #[test]
    fn parse_block_rejects_short_geometry_record() {
        let mut block = 1_u32.to_le_bytes().to_vec();
        let mut xor = TAG_CHAIN_SEED;
        push_record(
            &mut block,
            &mut xor,
            Tag::assemble(TagKind::Name, CHUNK_NAME_SUPERBLOCK, 0, 8),
            LFS_MAGIC,
        );
        push_record(
            &mut block,
            &mut xor,
            Tag::assemble(TagKind::Struct, CHUNK_STRUCT_INLINE, 0, 8),
            &[0_u8; 8],
        );
        block.resize(512, 0xFF);

        let err = Superblock::parse_block(&block).expect_err("short");
        assert!(matches!(err, ParseError::InsufficientData { .. }));
    }

    #[test]
    fn file_struct_parses_each_sub_kind() {
        let mut block = 1_u32.to_le_bytes().to_vec();
        let mut xor = TAG_CHAIN_SEED;
        push_record(
            &mut block,
            &mut xor,
            Tag::assemble(TagKind::Struct, CHUNK_STRUCT_INLINE, 1, 5),
            b"hello",
        );
        let mut ctz = 9_u32.to_le_bytes().to_vec();
        ctz.extend_from_slice(&4000_u32.to_le_bytes());
        push_record(
            &mut block,
            &mut xor,
            Tag::assemble(TagKind::Struct, CHUNK_STRUCT_CTZ, 2, 8),
            &ctz,
        );
        let mut pair = 4_u32.to_le_bytes().to_vec();
        pair.extend_from_slice(&5_u32.to_le_bytes());
        push_record(
            &mut block,
            &mut xor,
            Tag::assemble(TagKind::Struct, CHUNK_STRUCT_DIR_PAIR, 3, 8),
            &pair,
        );
        block.resize(256, 0xFF);

        let records: Vec<_> = TagStream::new(&block).collect();
        assert_eq!(
            FileStruct::parse(&records[0]).unwrap(),
            FileStruct::Inline(b"hello".to_vec())
        );
        assert_eq!(
            FileStruct::parse(&records[1]).unwrap(),
            FileStruct::CtzList {
                head: BlockIndex(9),
                size: 4000
            }
        );
        assert_eq!(
            FileStruct::parse(&records[2]).unwrap(),
            FileStruct::DirPair([4, 5])
        );
    }
}
