//! Metadata log replay.
//!
//! A directory's state is never stored, only its history: an append-only
//! log of name, structure, and delete records keyed by object id. Replay
//! folds the log in stream order, later records superseding earlier ones,
//! until the live mapping falls out. Logs split across blocks are chained
//! with hard tail records; the XOR chain is block-scoped, so each chained
//! block decodes from a fresh stream.

use lfsr_block::BlockStore;
use lfsr_error::{LfsrError, Result};
use lfsr_ondisk::{
    CHUNK_DELETE_CREATE, CHUNK_DELETE_TOMBSTONE, CHUNK_NAME_DIR, CHUNK_NAME_FILE,
    CHUNK_NAME_SUPERBLOCK, CHUNK_TAIL_HARD, CHUNK_TAIL_SOFT, FileStruct, Record, StreamEnd,
    TagKind, TagStream, read_revision,
};
use lfsr_types::{BlockIndex, ObjectId, Revision, name_lossy, read_le_u32};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

/// What a name record declared an object to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    File,
    Dir,
    /// The filesystem's own root descriptor entry; not a user object.
    Superblock,
}

/// One live entry of a directory log, accumulated across records.
///
/// Fields are optional because the log is incremental: a creation marker
/// introduces an id with neither name nor structure, and an interrupted
/// write can leave a named entry with no structure record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    pub name: Vec<u8>,
    pub kind: Option<EntryKind>,
    pub file_struct: Option<FileStruct>,
}

impl DirEntry {
    /// Lossy UTF-8 name for display.
    #[must_use]
    pub fn name_str(&self) -> String {
        name_lossy(&self.name)
    }
}

/// Replayed state of one directory's metadata-pair chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirLog {
    /// The pair this walk started from.
    pub pair: [u32; 2],
    pub entries: BTreeMap<ObjectId, DirEntry>,
    /// Soft tail: the next directory in the threaded list. Surfaced for
    /// diagnostics, never folded into this directory's entries.
    pub next_dir: Option<[u32; 2]>,
    /// Commit checksums that did not verify. Confidence signal only.
    pub crc_mismatches: usize,
    /// True when any block's stream ended mid-record.
    pub truncated: bool,
    /// Blocks actually replayed, in chain order.
    pub blocks_walked: Vec<BlockIndex>,
}

/// Replay a directory's metadata-pair chain into its live entry mapping.
///
/// Hard tail records continue the fold in the linked pair. A chain that
/// revisits a pair is adversarial and fails rather than looping.
pub fn walk_pair(store: &BlockStore, pair: [u32; 2]) -> Result<DirLog> {
    let mut log = DirLog {
        pair,
        entries: BTreeMap::new(),
        next_dir: None,
        crc_mismatches: 0,
        truncated: false,
        blocks_walked: Vec::new(),
    };

    let mut visited: BTreeSet<[u32; 2]> = BTreeSet::new();
    let mut current = pair;
    loop {
        if !visited.insert(normalize_pair(current)) {
            return Err(LfsrError::CyclicDirectory(current[0], current[1]));
        }
        let (index, block) = active_block(store, current)?;
        log.blocks_walked.push(index);
        match fold_block(block, index, &mut log) {
            Some(next) => current = next,
            None => break,
        }
    }
    Ok(log)
}

/// Normalized pair identity: block order within a pair is not significant.
#[must_use]
pub fn normalize_pair(pair: [u32; 2]) -> [u32; 2] {
    if pair[0] <= pair[1] {
        pair
    } else {
        [pair[1], pair[0]]
    }
}

/// Pick the authoritative block of a mirrored pair by revision counter.
///
/// An erased mirror reads as revision `0xFFFF_FFFF` and loses the sequence
/// comparison against any committed counter. Equal revisions are ambiguous
/// but not fatal: the first-listed block wins, with a warning.
fn active_block<'a>(store: &'a BlockStore, pair: [u32; 2]) -> Result<(BlockIndex, &'a [u8])> {
    let mut best: Option<(Revision, BlockIndex, &'a [u8])> = None;
    for &raw in &pair {
        let index = BlockIndex(raw);
        if !store.contains(index) {
            debug!(%index, "pair block outside image, skipping");
            continue;
        }
        let block = store.block(index)?;
        let Ok(revision) = read_revision(block) else {
            continue;
        };
        match best {
            None => best = Some((revision, index, block)),
            Some((best_revision, best_index, _)) => {
                if revision.is_newer_than(best_revision) {
                    best = Some((revision, index, block));
                } else if revision == best_revision {
                    warn!(
                        %revision,
                        kept = %best_index,
                        ignored = %index,
                        "mirrored pair has equal revision counters, keeping first block"
                    );
                }
            }
        }
    }

    best.map(|(_, index, block)| (index, block)).ok_or_else(|| {
        LfsrError::Parse(format!(
            "metadata pair [{}, {}] has no readable block",
            pair[0], pair[1]
        ))
    })
}

/// Fold one block's record stream into the log. Returns the hard-tail pair
/// when the directory continues elsewhere.
fn fold_block(block: &[u8], index: BlockIndex, log: &mut DirLog) -> Option<[u32; 2]> {
    let mut stream = TagStream::new(block);
    let mut hard_tail = None;
    for record in stream.by_ref() {
        apply_record(&record, log, &mut hard_tail);
    }
    if stream.end().is_some_and(StreamEnd::is_truncated) {
        warn!(%index, "record stream truncated mid-record, keeping records decoded so far");
        log.truncated = true;
    }
    hard_tail
}

fn apply_record(record: &Record<'_>, log: &mut DirLog, hard_tail: &mut Option<[u32; 2]>) {
    let tag = record.tag;
    let id = tag.id();
    match tag.kind() {
        TagKind::Name => {
            let kind = match tag.chunk() {
                CHUNK_NAME_FILE => EntryKind::File,
                CHUNK_NAME_DIR => EntryKind::Dir,
                CHUNK_NAME_SUPERBLOCK => EntryKind::Superblock,
                other => {
                    debug!(chunk = other, %id, "ignoring name record of unknown sub-kind");
                    return;
                }
            };
            let entry = log.entries.entry(id).or_default();
            entry.name = record.payload.to_vec();
            entry.kind = Some(kind);
        }
        TagKind::Struct => match FileStruct::parse(record) {
            Ok(file_struct) => {
                log.entries.entry(id).or_default().file_struct = Some(file_struct);
            }
            Err(err) => warn!(%err, %id, "skipping undecodable structure record"),
        },
        TagKind::Delete => match tag.chunk() {
            CHUNK_DELETE_TOMBSTONE => {
                log.entries.remove(&id);
            }
            CHUNK_DELETE_CREATE => {
                log.entries.entry(id).or_default();
            }
            other => debug!(chunk = other, %id, "ignoring unknown splice record"),
        },
        TagKind::Tail => match read_pair(record.payload) {
            Some(pair) if tag.chunk() == CHUNK_TAIL_HARD => *hard_tail = Some(pair),
            Some(pair) if tag.chunk() == CHUNK_TAIL_SOFT => log.next_dir = Some(pair),
            Some(_) => debug!(chunk = tag.chunk(), "ignoring tail record of unknown sub-kind"),
            None => warn!("tail record payload too short for a block pair"),
        },
        TagKind::Crc => {
            if record.crc_valid == Some(false) {
                log.crc_mismatches += 1;
            }
        }
        TagKind::Unknown(bits) => debug!(kind = bits, %id, "ignoring record of reserved kind"),
    }
}

fn read_pair(payload: &[u8]) -> Option<[u32; 2]> {
    Some([
        read_le_u32(payload, 0).ok()?,
        read_le_u32(payload, 4).ok()?,
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use lfsr_harness::{BlockWriter, raw_image};
    use lfsr_ondisk::{CHUNK_STRUCT_INLINE, Tag};

    fn name_tag(id: u16, chunk: u8, name: &[u8]) -> (Tag, Vec<u8>) {
        (
            Tag::assemble(TagKind::Name, chunk, id, name.len() as u16),
            name.to_vec(),
        )
    }

    fn inline_tag(id: u16, content: &[u8]) -> (Tag, Vec<u8>) {
        (
            Tag::assemble(TagKind::Struct, CHUNK_STRUCT_INLINE, id, content.len() as u16),
            content.to_vec(),
        )
    }

    fn store_of(blocks: Vec<(u32, Vec<u8>)>, block_count: u32) -> BlockStore {
        BlockStore::new(raw_image(512, &blocks, block_count), 512).expect("store")
    }

    #[test]
    fn later_struct_record_wins() {
        let mut writer = BlockWriter::new(512, 1);
        let (tag, name) = name_tag(3, CHUNK_NAME_FILE, b"a.txt");
        writer.record(tag, &name);
        let (tag, content) = inline_tag(3, b"x");
        writer.record(tag, &content);
        let (tag, content) = inline_tag(3, b"y");
        writer.record(tag, &content);
        writer.commit();

        let store = store_of(vec![(0, writer.finish())], 2);
        let log = walk_pair(&store, [0, 1]).expect("walk");
        let entry = &log.entries[&ObjectId(3)];
        assert_eq!(entry.name_str(), "a.txt");
        assert_eq!(entry.kind, Some(EntryKind::File));
        assert_eq!(entry.file_struct, Some(FileStruct::Inline(b"y".to_vec())));
        assert_eq!(log.crc_mismatches, 0);
    }

    #[test]
    fn tombstone_removes_entry() {
        let mut writer = BlockWriter::new(512, 1);
        let (tag, name) = name_tag(5, CHUNK_NAME_FILE, b"b.txt");
        writer.record(tag, &name);
        let (tag, content) = inline_tag(5, b"gone");
        writer.record(tag, &content);
        writer.record(
            Tag::assemble(TagKind::Delete, CHUNK_DELETE_TOMBSTONE, 5, 0),
            &[],
        );
        writer.commit();

        let store = store_of(vec![(0, writer.finish())], 2);
        let log = walk_pair(&store, [0, 1]).expect("walk");
        assert!(!log.entries.contains_key(&ObjectId(5)));
    }

    #[test]
    fn record_after_tombstone_reintroduces_id() {
        let mut writer = BlockWriter::new(512, 1);
        let (tag, name) = name_tag(5, CHUNK_NAME_FILE, b"old");
        writer.record(tag, &name);
        writer.record(
            Tag::assemble(TagKind::Delete, CHUNK_DELETE_TOMBSTONE, 5, 0),
            &[],
        );
        let (tag, name) = name_tag(5, CHUNK_NAME_FILE, b"new");
        writer.record(tag, &name);
        writer.commit();

        let store = store_of(vec![(0, writer.finish())], 2);
        let log = walk_pair(&store, [0, 1]).expect("walk");
        assert_eq!(log.entries[&ObjectId(5)].name_str(), "new");
    }

    #[test]
    fn newer_mirror_block_is_authoritative() {
        let mut stale = BlockWriter::new(512, 4);
        let (tag, name) = name_tag(1, CHUNK_NAME_FILE, b"stale.txt");
        stale.record(tag, &name);
        stale.commit();

        let mut fresh = BlockWriter::new(512, 7);
        let (tag, name) = name_tag(1, CHUNK_NAME_FILE, b"fresh.txt");
        fresh.record(tag, &name);
        fresh.commit();

        let store = store_of(vec![(0, stale.finish()), (1, fresh.finish())], 2);
        let log = walk_pair(&store, [0, 1]).expect("walk");
        assert_eq!(log.entries[&ObjectId(1)].name_str(), "fresh.txt");
        assert_eq!(log.blocks_walked, vec![BlockIndex(1)]);
    }

    #[test]
    fn hard_tail_continues_fold_and_soft_tail_does_not() {
        let mut first = BlockWriter::new(512, 1);
        let (tag, name) = name_tag(1, CHUNK_NAME_FILE, b"one");
        first.record(tag, &name);
        let mut tail = 2_u32.to_le_bytes().to_vec();
        tail.extend_from_slice(&3_u32.to_le_bytes());
        first.record(Tag::assemble(TagKind::Tail, CHUNK_TAIL_HARD, 0, 8), &tail);
        first.commit();

        let mut second = BlockWriter::new(512, 1);
        let (tag, name) = name_tag(2, CHUNK_NAME_FILE, b"two");
        second.record(tag, &name);
        let mut soft = 6_u32.to_le_bytes().to_vec();
        soft.extend_from_slice(&7_u32.to_le_bytes());
        second.record(Tag::assemble(TagKind::Tail, CHUNK_TAIL_SOFT, 0, 8), &soft);
        second.commit();

        let store = store_of(vec![(0, first.finish()), (2, second.finish())], 8);
        let log = walk_pair(&store, [0, 1]).expect("walk");
        assert_eq!(log.entries.len(), 2);
        assert_eq!(log.entries[&ObjectId(2)].name_str(), "two");
        assert_eq!(log.next_dir, Some([6, 7]));
        assert_eq!(log.blocks_walked, vec![BlockIndex(0), BlockIndex(2)]);
    }

    #[test]
    fn chain_revisiting_a_pair_fails_instead_of_looping() {
        let mut writer = BlockWriter::new(512, 1);
        let mut tail = 0_u32.to_le_bytes().to_vec();
        tail.extend_from_slice(&1_u32.to_le_bytes());
        writer.record(Tag::assemble(TagKind::Tail, CHUNK_TAIL_HARD, 0, 8), &tail);
        writer.commit();

        let store = store_of(vec![(0, writer.finish())], 2);
        let err = walk_pair(&store, [0, 1]).expect_err("cycle");
        assert!(matches!(err, LfsrError::CyclicDirectory(0, 1)));
    }

    #[test]
    fn truncated_stream_is_soft() {
        let mut writer = BlockWriter::new(512, 1);
        let (tag, name) = name_tag(1, CHUNK_NAME_FILE, b"kept.txt");
        writer.record(tag, &name);
        let mut block = writer.finish_unpadded();
        // Declare a payload far past the block boundary.
        let huge = Tag::assemble(TagKind::Struct, CHUNK_STRUCT_INLINE, 1, 600);
        block.extend_from_slice(&(huge.0 ^ tag_chain_value(&block)).to_be_bytes());
        block.resize(512, 0);

        let store = store_of(vec![(0, block)], 2);
        let log = walk_pair(&store, [0, 1]).expect("walk");
        assert!(log.truncated);
        assert_eq!(log.entries[&ObjectId(1)].name_str(), "kept.txt");
    }

    /// Last decoded tag value of a partially built block, for hand-appending
    /// stored words in tests.
    fn tag_chain_value(block: &[u8]) -> u32 {
        let mut stream = TagStream::new(block);
        let mut last = lfsr_types::TAG_CHAIN_SEED;
        for record in stream.by_ref() {
            last = record.tag.0;
        }
        last
    }
}
