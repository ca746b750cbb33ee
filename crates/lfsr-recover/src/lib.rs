#![forbid(unsafe_code)]
//! Forensic scans that bypass the live tree.
//!
//! Deletion on a log-structured flash filesystem unlinks, it never erases:
//! a tombstone hides the entry while the name and content bytes stay in
//! place until compaction reuses the block. These scans read every block's
//! raw record stream regardless of what the reconstructed tree considers
//! live, so they work on images with no superblock at all.
//!
//! The carve in [`recover_by_name`] is a heuristic, not a structural
//! decode. It assumes the wanted content begins right after the matching
//! name record and that the flash behind it still reads as erased bytes.
//! When a record intervenes before the content, or erased regions are not
//! uniform `0xFF`, it will over- or under-carve. Callers own validating
//! the bytes; nothing here confirms they are what they look like.

use lfsr_block::BlockStore;
use lfsr_ondisk::{FileStruct, StreamEnd, TagKind, TagStream, read_revision};
use lfsr_types::{BlockIndex, ERASED_BYTE, TAG_LEN, align_up4, name_lossy, trim_nul_padding};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Bytes carved from behind an orphaned name record. Best-effort: the
/// provenance fields say where the guess came from, not that it is right.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CarvedFragment {
    pub name: String,
    pub source_block: BlockIndex,
    /// Absolute image offset the carve started from.
    pub byte_offset: usize,
    pub data: Vec<u8>,
}

impl CarvedFragment {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Scan every block for a name record matching `target` (trailing NUL
/// padding ignored) and carve the bytes that follow it, up to the first
/// erased byte or the end of the image. First hit in block order wins.
///
/// `None` is the expected outcome for a name that left no trace; it is
/// not an error.
#[must_use]
pub fn recover_by_name(store: &BlockStore, target: &[u8]) -> Option<CarvedFragment> {
    let image = store.as_bytes();
    let block_size = store.block_size() as usize;

    for (index, block) in store.blocks() {
        for record in TagStream::new(block) {
            if record.tag.kind() != TagKind::Name
                || trim_nul_padding(record.payload) != target
            {
                continue;
            }

            let start = index.0 as usize * block_size
                + record.offset
                + TAG_LEN
                + align_up4(record.payload.len());
            let end = image[start..]
                .iter()
                .position(|byte| *byte == ERASED_BYTE)
                .map_or(image.len(), |pos| start + pos);

            info!(
                block = %index,
                offset = record.offset,
                carved = end - start,
                "name record matched, carving trailing bytes"
            );
            return Some(CarvedFragment {
                name: name_lossy(record.payload),
                source_block: index,
                byte_offset: start,
                data: image[start..end].to_vec(),
            });
        }
    }

    debug!(target = %name_lossy(target), "no name record matched");
    None
}

/// One decoded record, as seen by the raw scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordSighting {
    pub offset: usize,
    pub kind: TagKind,
    pub chunk: u8,
    pub id: u16,
    pub length: u16,
    /// Decoded payload summary where the kind has one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crc_valid: Option<bool>,
}

/// Decoded view of one block for the whole-image scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockScan {
    pub block: BlockIndex,
    pub revision: u32,
    pub has_superblock_magic: bool,
    pub records: Vec<RecordSighting>,
    pub end: Option<StreamEnd>,
}

/// Decode every block's record stream, live or not.
#[must_use]
pub fn scan_image(store: &BlockStore) -> Vec<BlockScan> {
    store
        .blocks()
        .map(|(index, block)| {
            let mut stream = TagStream::new(block);
            let records = stream.by_ref().map(|record| sighting(&record)).collect();
            BlockScan {
                block: index,
                revision: read_revision(block).map_or(0, |r| r.0),
                has_superblock_magic: lfsr_ondisk::Superblock::block_has_magic(block),
                records,
                end: stream.end(),
            }
        })
        .collect()
}

fn sighting(record: &lfsr_ondisk::Record<'_>) -> RecordSighting {
    let tag = record.tag;
    let detail = match tag.kind() {
        TagKind::Name => Some(name_lossy(record.payload)),
        TagKind::Struct => FileStruct::parse(record).ok().map(|fs| match fs {
            FileStruct::Inline(bytes) => format!("inline, {} bytes", bytes.len()),
            FileStruct::CtzList { head, size } => format!("ctz head={head} size={size}"),
            FileStruct::DirPair(pair) => format!("dir pair [{}, {}]", pair[0], pair[1]),
        }),
        _ => None,
    };
    RecordSighting {
        offset: record.offset,
        kind: tag.kind(),
        chunk: tag.chunk(),
        id: tag.id().0,
        length: tag.length(),
        detail,
        crc_valid: record.crc_valid,
    }
}
