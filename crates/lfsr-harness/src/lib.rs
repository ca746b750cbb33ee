#![forbid(unsafe_code)]
//! Synthetic image construction.
//!
//! The decoder never writes an image, so the test suite needs a producer
//! of its own: [`BlockWriter`] encodes single metadata blocks (XOR chain,
//! padding, commit checksums) and [`ImageBuilder`] lays out whole
//! filesystems (superblock pair, nested directories, inline and skip-list
//! files, deletions, interrupted writes).
//!
//! This is fixture tooling: misuse panics with a message rather than
//! returning errors, so broken tests fail loudly at the point of mistake.

use lfsr_block::BlockStore;
use lfsr_error::Result;
use lfsr_ondisk::{
    CHUNK_DELETE_TOMBSTONE, CHUNK_NAME_DIR, CHUNK_NAME_FILE, CHUNK_NAME_SUPERBLOCK,
    CHUNK_STRUCT_CTZ, CHUNK_STRUCT_DIR_PAIR, CHUNK_STRUCT_INLINE, Tag, TagKind,
    block_count_for_size, data_capacity, pointer_words,
};
use lfsr_types::{LFS_MAGIC, REVISION_LEN, Revision, TAG_CHAIN_SEED, TAG_LEN, align_up4};
use std::collections::BTreeMap;

/// Maximum payload length a tag can describe.
const MAX_PAYLOAD: usize = 0x3FF;

/// Encoder for one metadata block's record stream.
///
/// Maintains the XOR chain and commit boundaries exactly as the decoder
/// unwinds them, so every encoded block is decodable by construction.
#[derive(Debug, Clone)]
pub struct BlockWriter {
    bytes: Vec<u8>,
    xor_state: u32,
    commit_start: usize,
    block_size: usize,
}

impl BlockWriter {
    #[must_use]
    pub fn new(block_size: u32, revision: u32) -> Self {
        let mut bytes = Vec::with_capacity(block_size as usize);
        bytes.extend_from_slice(&revision.to_le_bytes());
        Self {
            bytes,
            xor_state: TAG_CHAIN_SEED,
            commit_start: 0,
            block_size: block_size as usize,
        }
    }

    /// Append one record: stored tag word, payload, zero padding.
    ///
    /// # Panics
    /// When the tag length disagrees with the payload or the block is full.
    pub fn record(&mut self, tag: Tag, payload: &[u8]) -> &mut Self {
        assert_eq!(
            tag.length() as usize,
            payload.len(),
            "tag length must match payload length"
        );
        assert!(payload.len() <= MAX_PAYLOAD, "payload exceeds 1023 bytes");
        let needed = TAG_LEN + align_up4(payload.len());
        assert!(
            self.bytes.len() + needed <= self.block_size,
            "record does not fit in a {}-byte block",
            self.block_size
        );

        self.bytes.extend_from_slice(&(tag.0 ^ self.xor_state).to_be_bytes());
        self.xor_state = tag.0;
        self.bytes.extend_from_slice(payload);
        self.bytes
            .resize(self.bytes.len() + (align_up4(payload.len()) - payload.len()), 0);
        self
    }

    /// Append raw bytes outside record framing. Models interrupted writes;
    /// nothing appended afterwards will decode.
    pub fn raw(&mut self, bytes: &[u8]) -> &mut Self {
        assert!(
            self.bytes.len() + bytes.len() <= self.block_size,
            "raw bytes do not fit in the block"
        );
        self.bytes.extend_from_slice(bytes);
        self
    }

    /// Close the open commit with a checksum record covering every byte
    /// since the previous commit (or the block start), through the record's
    /// own tag word.
    pub fn commit(&mut self) -> &mut Self {
        let tag = Tag::assemble(TagKind::Crc, 0, 0, 4);
        assert!(
            self.bytes.len() + TAG_LEN + 4 <= self.block_size,
            "commit record does not fit in the block"
        );
        self.bytes.extend_from_slice(&(tag.0 ^ self.xor_state).to_be_bytes());
        self.xor_state = tag.0;
        let checksum = !crc32fast::hash(&self.bytes[self.commit_start..]);
        self.bytes.extend_from_slice(&checksum.to_le_bytes());
        self.commit_start = self.bytes.len();
        self
    }

    /// Finished block, erased-fill padded to the block size.
    #[must_use]
    pub fn finish(&self) -> Vec<u8> {
        let mut block = self.bytes.clone();
        block.resize(self.block_size, 0xFF);
        block
    }

    /// Written bytes only, without erased-fill padding.
    #[must_use]
    pub fn finish_unpadded(&self) -> Vec<u8> {
        self.bytes.clone()
    }

    /// Bytes currently written, revision counter included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.len() <= REVISION_LEN
    }
}

/// Assemble an image from placed blocks; unplaced blocks read as erased.
#[must_use]
pub fn raw_image(block_size: u32, blocks: &[(u32, Vec<u8>)], block_count: u32) -> Vec<u8> {
    let bs = block_size as usize;
    let mut image = vec![0xFF_u8; bs * block_count as usize];
    for (index, bytes) in blocks {
        assert!(*index < block_count, "block {index} outside the image");
        assert!(bytes.len() <= bs, "block {index} longer than the block size");
        let start = *index as usize * bs;
        image[start..start + bytes.len()].copy_from_slice(bytes);
    }
    image
}

/// A superblock-bearing block: name record carrying the magic, then the
/// six-field geometry record.
#[must_use]
pub fn superblock_writer(block_size: u32, revision: Revision, block_count: u32) -> BlockWriter {
    let mut writer = BlockWriter::new(block_size, revision.0);
    writer.record(
        Tag::assemble(TagKind::Name, CHUNK_NAME_SUPERBLOCK, 0, LFS_MAGIC.len() as u16),
        LFS_MAGIC,
    );
    let mut fields = Vec::with_capacity(24);
    for value in [
        0x0002_0000_u32, // version 2.0
        block_size,
        block_count,
        255,         // name_max
        0x7FFF_FFFF, // file_max
        1022,        // attr_max
    ] {
        fields.extend_from_slice(&value.to_le_bytes());
    }
    writer.record(
        Tag::assemble(TagKind::Struct, CHUNK_STRUCT_INLINE, 0, 24),
        &fields,
    );
    writer.commit();
    writer
}

/// Handle to a directory under construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirHandle(usize);

#[derive(Debug)]
struct DirState {
    pair: [u32; 2],
    writer: BlockWriter,
    next_id: u16,
    names: BTreeMap<String, u16>,
    /// Set once raw bytes were appended; further records would not decode.
    sealed: bool,
}

/// Whole-filesystem builder.
///
/// Every directory occupies a mirrored pair with the first block active
/// (the sibling stays erased, as after a fresh allocation). The root pair
/// is blocks 0 and 1 and carries the superblock entry as id 0.
#[derive(Debug)]
pub struct ImageBuilder {
    block_size: u32,
    block_count: u32,
    dirs: Vec<DirState>,
    data_blocks: Vec<(u32, Vec<u8>)>,
    next_free: u32,
}

impl ImageBuilder {
    #[must_use]
    pub fn new(block_size: u32, block_count: u32) -> Self {
        let root = DirState {
            pair: lfsr_types::SUPERBLOCK_PAIR,
            writer: superblock_writer(block_size, Revision(1), block_count),
            next_id: 1,
            names: BTreeMap::new(),
            sealed: false,
        };
        Self {
            block_size,
            block_count,
            dirs: vec![root],
            data_blocks: Vec::new(),
            next_free: 2,
        }
    }

    /// The canonical fixture: a root file, `config/` and `logs/` with
    /// content, and `temp/` holding an unlinked file whose bytes survive.
    #[must_use]
    pub fn sample() -> Self {
        let mut builder = Self::new(512, 256);
        let root = builder.root();
        builder.write_inline(root, "first-file.txt", b"This is the root file\n");
        let config = builder.mkdir(root, "config");
        builder.write_inline(config, "system.conf", b"system=true\nversion=2.0\n");
        builder.write_inline(config, "network.conf", b"ip=192.168.1.1\nmask=255.255.255.0\n");
        let logs = builder.mkdir(root, "logs");
        builder.write_inline(logs, "boot.log", b"Boot successful at 12:34PM\n");
        let temp = builder.mkdir(root, "temp");
        builder.orphan_inline(temp, "to-be-deleted.txt", b"This file will be deleted\n");
        builder
    }

    #[must_use]
    pub fn root(&self) -> DirHandle {
        DirHandle(0)
    }

    fn alloc_block(&mut self) -> u32 {
        assert!(self.next_free < self.block_count, "image out of blocks");
        let block = self.next_free;
        self.next_free += 1;
        block
    }

    fn fresh_id(&mut self, dir: DirHandle, name: &str) -> u16 {
        assert!(name.len() <= 255, "name exceeds 255 bytes");
        let state = &mut self.dirs[dir.0];
        assert!(!state.sealed, "directory already holds raw trailing bytes");
        let id = state.next_id;
        state.next_id += 1;
        state.names.insert(name.to_owned(), id);
        id
    }

    /// Create a subdirectory: allocates its pair and links it from the
    /// parent with a name record plus a pair-pointer record.
    pub fn mkdir(&mut self, parent: DirHandle, name: &str) -> DirHandle {
        let pair = [self.alloc_block(), self.alloc_block()];
        let id = self.fresh_id(parent, name);
        self.link_dir(parent, name, id, pair);
        self.dirs.push(DirState {
            pair,
            writer: BlockWriter::new(self.block_size, 1),
            next_id: 0,
            names: BTreeMap::new(),
            sealed: false,
        });
        DirHandle(self.dirs.len() - 1)
    }

    /// A directory entry pointing at an arbitrary pair, without creating
    /// the pair itself. For malformed-image fixtures.
    pub fn raw_dir_entry(&mut self, parent: DirHandle, name: &str, pair: [u32; 2]) {
        let id = self.fresh_id(parent, name);
        self.link_dir(parent, name, id, pair);
    }

    fn link_dir(&mut self, parent: DirHandle, name: &str, id: u16, pair: [u32; 2]) {
        let writer = &mut self.dirs[parent.0].writer;
        writer.record(
            Tag::assemble(TagKind::Name, CHUNK_NAME_DIR, id, name.len() as u16),
            name.as_bytes(),
        );
        let mut payload = pair[0].to_le_bytes().to_vec();
        payload.extend_from_slice(&pair[1].to_le_bytes());
        writer.record(
            Tag::assemble(TagKind::Struct, CHUNK_STRUCT_DIR_PAIR, id, 8),
            &payload,
        );
    }

    /// A file whose content lives in the metadata log.
    pub fn write_inline(&mut self, dir: DirHandle, name: &str, content: &[u8]) {
        assert!(content.len() <= MAX_PAYLOAD, "inline content exceeds 1023 bytes");
        let id = self.fresh_id(dir, name);
        let writer = &mut self.dirs[dir.0].writer;
        writer.record(
            Tag::assemble(TagKind::Name, CHUNK_NAME_FILE, id, name.len() as u16),
            name.as_bytes(),
        );
        writer.record(
            Tag::assemble(TagKind::Struct, CHUNK_STRUCT_INLINE, id, content.len() as u16),
            content,
        );
    }

    /// A file stored as a CTZ skip-list of data blocks.
    pub fn write_ctz(&mut self, dir: DirHandle, name: &str, content: &[u8]) {
        let size = u32::try_from(content.len()).unwrap_or_else(|_| panic!("content too large"));
        let count = block_count_for_size(size, self.block_size)
            .unwrap_or_else(|err| panic!("skip-list layout: {err}"));
        assert!(count > 0, "use write_inline for empty files");

        let mut physical = Vec::with_capacity(count as usize);
        for _ in 0..count {
            physical.push(self.alloc_block());
        }

        let mut offset = 0_usize;
        for index in 0..count {
            let mut block = Vec::with_capacity(self.block_size as usize);
            for k in 0..pointer_words(index) {
                let target = index - (1_u32 << k);
                block.extend_from_slice(&physical[target as usize].to_le_bytes());
            }
            let capacity = data_capacity(index, self.block_size)
                .unwrap_or_else(|err| panic!("skip-list layout: {err}"))
                as usize;
            let take = capacity.min(content.len() - offset);
            block.extend_from_slice(&content[offset..offset + take]);
            offset += take;
            self.data_blocks.push((physical[index as usize], block));
        }

        let head = physical[count as usize - 1];
        let id = self.fresh_id(dir, name);
        let writer = &mut self.dirs[dir.0].writer;
        writer.record(
            Tag::assemble(TagKind::Name, CHUNK_NAME_FILE, id, name.len() as u16),
            name.as_bytes(),
        );
        let mut payload = head.to_le_bytes().to_vec();
        payload.extend_from_slice(&size.to_le_bytes());
        writer.record(
            Tag::assemble(TagKind::Struct, CHUNK_STRUCT_CTZ, id, 8),
            &payload,
        );
    }

    /// Unlink a previously written entry with a tombstone record.
    pub fn delete(&mut self, dir: DirHandle, name: &str) {
        let state = &mut self.dirs[dir.0];
        let id = state
            .names
            .remove(name)
            .unwrap_or_else(|| panic!("no entry named {name:?} to delete"));
        state.writer.record(
            Tag::assemble(TagKind::Delete, CHUNK_DELETE_TOMBSTONE, id, 0),
            &[],
        );
    }

    /// The trace of a write that never finished: a committed log so far, a
    /// name record, then the content bytes raw, never wrapped in a record
    /// and never committed. The entry has no structure record, so it is
    /// invisible to the live tree; the bytes sit right after the name
    /// record until the erased region begins.
    ///
    /// No further entries can be added to this directory.
    pub fn orphan_inline(&mut self, dir: DirHandle, name: &str, content: &[u8]) {
        let id = self.fresh_id(dir, name);
        let state = &mut self.dirs[dir.0];
        state.names.remove(name);
        state.writer.commit();
        state.writer.record(
            Tag::assemble(TagKind::Name, CHUNK_NAME_FILE, id, name.len() as u16),
            name.as_bytes(),
        );
        state.writer.raw(content);
        state.sealed = true;
    }

    /// Assemble the image: commit every open directory log, place each
    /// pair's active block, fill everything else with erased bytes.
    #[must_use]
    pub fn build(self) -> Vec<u8> {
        let mut blocks = self.data_blocks;
        for mut dir in self.dirs {
            if !dir.sealed {
                dir.writer.commit();
            }
            blocks.push((dir.pair[0], dir.writer.finish()));
        }
        raw_image(self.block_size, &blocks, self.block_count)
    }

    pub fn into_store(self) -> Result<BlockStore> {
        let block_size = self.block_size;
        BlockStore::new(self.build(), block_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lfsr_ondisk::{StreamEnd, TagStream};

    #[test]
    fn writer_emits_decodable_stream() {
        let mut writer = BlockWriter::new(512, 9);
        writer.record(Tag::assemble(TagKind::Name, CHUNK_NAME_FILE, 1, 3), b"abc");
        writer.commit();
        let block = writer.finish();

        let mut stream = TagStream::new(&block);
        let records: Vec<_> = stream.by_ref().collect();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].payload, b"abc");
        assert_eq!(records[1].crc_valid, Some(true));
        assert!(matches!(stream.end(), Some(StreamEnd::EndMarker(_))));
    }

    #[test]
    fn multiple_commits_checksum_independently() {
        let mut writer = BlockWriter::new(512, 1);
        writer.record(Tag::assemble(TagKind::Name, CHUNK_NAME_FILE, 1, 1), b"a");
        writer.commit();
        writer.record(Tag::assemble(TagKind::Name, CHUNK_NAME_FILE, 2, 1), b"b");
        writer.commit();
        let block = writer.finish();

        let verdicts: Vec<_> = TagStream::new(&block)
            .filter_map(|r| r.crc_valid)
            .collect();
        assert_eq!(verdicts, vec![true, true]);
    }

    #[test]
    fn sample_layout_places_superblock_magic() {
        let image = ImageBuilder::sample().build();
        assert_eq!(&image[8..16], LFS_MAGIC);
        assert_eq!(image.len(), 512 * 256);
    }
}
