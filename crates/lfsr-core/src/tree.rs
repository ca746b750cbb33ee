//! Directory tree reconstruction.
//!
//! Walks directory logs breadth-first from the root pair with an explicit
//! worklist. Depth is attacker-controlled on a malformed image, so there is
//! no recursion anywhere in the build, and a visited set turns pair cycles
//! into an error instead of an endless walk.

use crate::walker::{DirEntry, EntryKind, normalize_pair, walk_pair};
use lfsr_block::BlockStore;
use lfsr_error::{LfsrError, Result};
use lfsr_ondisk::FileStruct;
use lfsr_types::{ObjectId, SUPERBLOCK_PAIR};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, VecDeque};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    File,
    Dir,
}

/// One node of the reconstructed tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeNode {
    pub name: String,
    pub kind: NodeKind,
    /// Content length for files; `None` for directories.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u32>,
    /// Metadata pair for directories.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pair: Option<[u32; 2]>,
    /// Structure record for files, used to read content.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_struct: Option<FileStruct>,
    pub children: Vec<TreeNode>,
}

impl TreeNode {
    fn dir(name: String, pair: [u32; 2]) -> Self {
        Self {
            name,
            kind: NodeKind::Dir,
            size: None,
            pair: Some(pair),
            file_struct: None,
            children: Vec::new(),
        }
    }

    fn file(name: String, file_struct: FileStruct) -> Self {
        Self {
            name,
            kind: NodeKind::File,
            size: file_struct.content_len(),
            pair: None,
            file_struct: Some(file_struct),
            children: Vec::new(),
        }
    }
}

/// Reconstructed tree plus the soft conditions met while building it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tree {
    pub root: TreeNode,
    /// Per-directory soft failures: unreadable child pairs, truncated
    /// streams, checksum mismatches, incomplete entries. The tree around
    /// them is still valid.
    pub warnings: Vec<String>,
}

impl Tree {
    /// Look up a node by `/`-separated path. Empty path is the root.
    #[must_use]
    pub fn find(&self, path: &str) -> Option<&TreeNode> {
        let mut node = &self.root;
        for component in path.split('/').filter(|c| !c.is_empty()) {
            node = node
                .children
                .iter()
                .find(|child| child.name == component)?;
        }
        Some(node)
    }
}

struct Slot {
    node: TreeNode,
    parent: Option<usize>,
}

/// Build the full tree rooted at the superblock pair.
pub fn build_tree(store: &BlockStore) -> Result<Tree> {
    let mut warnings = Vec::new();
    let mut visited: BTreeSet<[u32; 2]> = BTreeSet::new();
    let mut arena: Vec<Slot> = vec![Slot {
        node: TreeNode::dir("/".to_owned(), SUPERBLOCK_PAIR),
        parent: None,
    }];
    let mut worklist: VecDeque<(usize, [u32; 2])> = VecDeque::new();
    worklist.push_back((0, SUPERBLOCK_PAIR));

    while let Some((slot, pair)) = worklist.pop_front() {
        if !visited.insert(normalize_pair(pair)) {
            return Err(LfsrError::CyclicDirectory(pair[0], pair[1]));
        }

        let log = match walk_pair(store, pair) {
            Ok(log) => log,
            Err(err @ LfsrError::CyclicDirectory(..)) => return Err(err),
            Err(err) => {
                warn!(%err, ?pair, "skipping unwalkable directory");
                warnings.push(format!(
                    "directory at pair [{}, {}] skipped: {err}",
                    pair[0], pair[1]
                ));
                continue;
            }
        };
        if log.truncated {
            warnings.push(format!(
                "directory at pair [{}, {}] has a truncated record stream",
                pair[0], pair[1]
            ));
        }
        if log.crc_mismatches > 0 {
            warnings.push(format!(
                "directory at pair [{}, {}] has {} commit checksum mismatch(es)",
                pair[0], pair[1], log.crc_mismatches
            ));
        }

        // Children attach in sorted name order so output is deterministic.
        let mut entries: Vec<(&ObjectId, &DirEntry)> = log.entries.iter().collect();
        entries.sort_by(|a, b| a.1.name.cmp(&b.1.name));

        for (id, entry) in entries {
            match entry.kind {
                Some(EntryKind::Superblock) | None => {
                    if entry.kind.is_none() {
                        debug!(%id, ?pair, "entry has no name record, skipping");
                    }
                }
                Some(EntryKind::Dir) => match entry.file_struct {
                    Some(FileStruct::DirPair(child_pair)) => {
                        arena.push(Slot {
                            node: TreeNode::dir(entry.name_str(), child_pair),
                            parent: Some(slot),
                        });
                        worklist.push_back((arena.len() - 1, child_pair));
                    }
                    _ => warnings.push(format!(
                        "directory entry \"{}\" (id {id}) has no pair record",
                        entry.name_str()
                    )),
                },
                Some(EntryKind::File) => match &entry.file_struct {
                    Some(file_struct @ (FileStruct::Inline(_) | FileStruct::CtzList { .. })) => {
                        arena.push(Slot {
                            node: TreeNode::file(entry.name_str(), file_struct.clone()),
                            parent: Some(slot),
                        });
                    }
                    _ => warnings.push(format!(
                        "file entry \"{}\" (id {id}) has no structure record, content unavailable",
                        entry.name_str()
                    )),
                },
            }
        }
    }

    // Assemble nested nodes from the arena. A child's slot index is always
    // greater than its parent's, so popping from the back completes every
    // subtree before it is attached. Children were appended in sorted order
    // and arrive reversed; one reverse per node restores it.
    let mut root = None;
    while let Some(mut slot) = arena.pop() {
        slot.node.children.reverse();
        match slot.parent {
            Some(parent) => arena[parent].node.children.push(slot.node),
            None => root = Some(slot.node),
        }
    }
    let root = root.ok_or_else(|| LfsrError::Parse("tree assembly lost its root".to_owned()))?;

    Ok(Tree { root, warnings })
}
