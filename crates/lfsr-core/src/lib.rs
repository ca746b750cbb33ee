#![forbid(unsafe_code)]
//! Filesystem reconstruction for littlefs-style images.
//!
//! Ties the parsing layers together: locates the active superblock across
//! its mirrored pair, replays directory logs into live entry mappings,
//! builds the full tree, and resolves file content. Everything is a pure
//! function over an immutable [`BlockStore`]; the tree is rebuilt in full
//! on each access because metadata blocks are small and full replay is
//! cheap and simple to reason about.

pub mod file;
pub mod tree;
pub mod walker;

pub use file::read_content;
pub use tree::{NodeKind, Tree, TreeNode, build_tree};
pub use walker::{DirEntry, DirLog, EntryKind, walk_pair};

use lfsr_block::BlockStore;
use lfsr_error::{LfsrError, Result};
use lfsr_ondisk::Superblock;
use lfsr_types::{BlockIndex, Revision};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// The active superblock and where it was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuperblockSummary {
    pub block: BlockIndex,
    pub revision: Revision,
    pub superblock: Superblock,
}

/// Probe blocks 0 and 1 for the filesystem's root descriptor.
///
/// Metadata pairs are mirrored for power-loss safety, so both candidates
/// may carry a valid superblock; the one with the newer revision counter is
/// the most recently committed and wins. Equal counters are ambiguous but
/// not fatal: block 0 wins deterministically, with a warning.
pub fn locate_superblock(store: &BlockStore) -> Result<SuperblockSummary> {
    let mut magic_seen = false;
    let mut malformed: Option<String> = None;
    let mut best: Option<SuperblockSummary> = None;

    for raw in lfsr_types::SUPERBLOCK_PAIR {
        let index = BlockIndex(raw);
        if !store.contains(index) {
            continue;
        }
        let block = store.block(index)?;
        if !Superblock::block_has_magic(block) {
            continue;
        }
        magic_seen = true;

        match Superblock::parse_block(block) {
            Ok((revision, superblock)) => {
                let candidate = SuperblockSummary {
                    block: index,
                    revision,
                    superblock,
                };
                match best {
                    None => best = Some(candidate),
                    Some(current) => {
                        if candidate.revision.is_newer_than(current.revision) {
                            best = Some(candidate);
                        } else if candidate.revision == current.revision {
                            warn!(
                                revision = %current.revision,
                                "both superblock mirrors carry the same revision, keeping block 0"
                            );
                        }
                    }
                }
            }
            Err(err) => {
                warn!(%index, %err, "block carries the magic but no usable superblock");
                malformed = Some(err.to_string());
            }
        }
    }

    match best {
        Some(summary) => {
            check_geometry(store, &summary);
            Ok(summary)
        }
        None if magic_seen => Err(LfsrError::MalformedSuperblock(
            malformed.unwrap_or_else(|| "geometry record missing".to_owned()),
        )),
        None => Err(LfsrError::NoSuperblock),
    }
}

/// The recorded geometry should describe the image being decoded; when it
/// does not, every downstream offset is suspect, but forensic decoding
/// proceeds anyway.
fn check_geometry(store: &BlockStore, summary: &SuperblockSummary) {
    let sb = &summary.superblock;
    if sb.block_size != store.block_size() {
        warn!(
            recorded = sb.block_size,
            used = store.block_size(),
            "superblock block size differs from the decode block size"
        );
    }
    if sb.block_count != store.block_count() {
        warn!(
            recorded = sb.block_count,
            actual = store.block_count(),
            "superblock block count differs from the image's block count"
        );
    }
}

/// A validated image, ready for tree and content reads.
#[derive(Debug)]
pub struct MountedImage {
    store: BlockStore,
    summary: SuperblockSummary,
}

impl MountedImage {
    /// Locate the superblock and bind the store to it.
    pub fn mount(store: BlockStore) -> Result<Self> {
        let summary = locate_superblock(&store)?;
        info!(
            block = %summary.block,
            revision = %summary.revision,
            version_major = summary.superblock.version_major,
            version_minor = summary.superblock.version_minor,
            "superblock located"
        );
        Ok(Self { store, summary })
    }

    #[must_use]
    pub fn summary(&self) -> &SuperblockSummary {
        &self.summary
    }

    #[must_use]
    pub fn store(&self) -> &BlockStore {
        &self.store
    }

    /// Rebuild the full directory tree from the root pair.
    pub fn tree(&self) -> Result<Tree> {
        build_tree(&self.store)
    }

    /// Resolve a `/`-separated path and read the file's content.
    pub fn read_path(&self, path: &str) -> Result<Vec<u8>> {
        let tree = self.tree()?;
        let node = tree
            .find(path)
            .ok_or_else(|| LfsrError::NotFound(path.to_owned()))?;
        let file_struct = node
            .file_struct
            .as_ref()
            .ok_or_else(|| LfsrError::NotFound(format!("{path} is not a file")))?;
        read_content(&self.store, file_struct)
    }
}
