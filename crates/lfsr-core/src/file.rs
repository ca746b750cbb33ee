//! File content resolution.
//!
//! Inline structures carry their content in the metadata log itself. CTZ
//! structures point at the last block of a backwards skip-list; the chain
//! is rebuilt by walking first pointers back to list index 0, then read
//! forward until the recorded size is satisfied.

use lfsr_block::BlockStore;
use lfsr_error::{LfsrError, Result};
use lfsr_ondisk::{FileStruct, block_count_for_size, data_capacity, pointer_words};
use lfsr_types::{BlockIndex, read_le_u32};

/// Materialize a file's content.
///
/// Failures are scoped to this one file: a broken pointer chain must not
/// prevent reading siblings.
pub fn read_content(store: &BlockStore, file_struct: &FileStruct) -> Result<Vec<u8>> {
    match file_struct {
        FileStruct::Inline(bytes) => Ok(bytes.clone()),
        FileStruct::CtzList { head, size } => read_ctz(store, *head, *size),
        FileStruct::DirPair(pair) => Err(LfsrError::Parse(format!(
            "structure points at directory pair [{}, {}], not file content",
            pair[0], pair[1]
        ))),
    }
}

fn read_ctz(store: &BlockStore, head: BlockIndex, size: u32) -> Result<Vec<u8>> {
    if size == 0 {
        return Ok(Vec::new());
    }

    let block_size = store.block_size();
    let count = block_count_for_size(size, block_size)
        .map_err(|err| LfsrError::TruncatedFile(err.to_string()))? as usize;

    // Walk first pointers from the head back to list index 0.
    let mut chain = vec![BlockIndex(0); count];
    let mut current = head;
    for index in (0..count).rev() {
        if !store.contains(current) {
            return Err(LfsrError::TruncatedFile(format!(
                "list block {index} points at block {current}, image has {} blocks",
                store.block_count()
            )));
        }
        chain[index] = current;
        if index > 0 {
            let block = store.block(current)?;
            current = BlockIndex(read_le_u32(block, 0).map_err(|err| {
                LfsrError::TruncatedFile(format!("unreadable back-pointer in block {current}: {err}"))
            })?);
        }
    }

    let mut content = Vec::with_capacity(size as usize);
    for (index, block_index) in chain.iter().enumerate() {
        let block = store.block(*block_index)?;
        let skip = (pointer_words(index as u32) * 4) as usize;
        let capacity = data_capacity(index as u32, block_size)
            .map_err(|err| LfsrError::TruncatedFile(err.to_string()))? as usize;
        let take = capacity.min(size as usize - content.len());
        content.extend_from_slice(&block[skip..skip + take]);
    }

    if content.len() != size as usize {
        return Err(LfsrError::TruncatedFile(format!(
            "list exhausted at {} of {} bytes",
            content.len(),
            size
        )));
    }
    Ok(content)
}
