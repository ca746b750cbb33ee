#![forbid(unsafe_code)]
//! Read-only block view over a raw flash image.
//!
//! The whole image is read into memory once, up front; every later
//! operation is a pure slice over that buffer. Geometry is validated at
//! construction, before any parsing: a wrong block size does not produce an
//! obviously invalid record stream, it silently shifts every offset, so it
//! must be rejected here and nowhere later.

use lfsr_error::{LfsrError, Result};
use lfsr_types::BlockIndex;
use std::fs;
use std::path::Path;
use tracing::debug;

/// Immutable image sliced into fixed-size erase blocks.
///
/// `BlockStore` has no interior mutability; shared references may be used
/// freely across threads and across independent decode operations.
#[derive(Debug, Clone)]
pub struct BlockStore {
    image: Vec<u8>,
    block_size: u32,
}

impl BlockStore {
    /// Wrap an in-memory image.
    ///
    /// Fails when `block_size` is zero or the image length is not an exact
    /// multiple of it.
    pub fn new(image: Vec<u8>, block_size: u32) -> Result<Self> {
        if block_size == 0 {
            return Err(LfsrError::Geometry("block size must be > 0".to_owned()));
        }
        let bs = block_size as usize;
        if image.len() % bs != 0 {
            return Err(LfsrError::Geometry(format!(
                "image length {} is not a multiple of block size {} (wrong --block-size?)",
                image.len(),
                block_size
            )));
        }
        debug!(
            image_len = image.len(),
            block_size,
            block_count = image.len() / bs,
            "block store ready"
        );
        Ok(Self { image, block_size })
    }

    /// Bulk-read an image file. The only I/O the decoder ever performs.
    pub fn open(path: impl AsRef<Path>, block_size: u32) -> Result<Self> {
        let image = fs::read(path)?;
        Self::new(image, block_size)
    }

    #[must_use]
    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    #[must_use]
    pub fn block_count(&self) -> u32 {
        (self.image.len() / self.block_size as usize) as u32
    }

    #[must_use]
    pub fn contains(&self, index: BlockIndex) -> bool {
        index.0 < self.block_count()
    }

    /// Fixed-size slice for one erase block.
    pub fn block(&self, index: BlockIndex) -> Result<&[u8]> {
        if !self.contains(index) {
            return Err(LfsrError::Geometry(format!(
                "block {} out of range ({} blocks)",
                index,
                self.block_count()
            )));
        }
        let bs = self.block_size as usize;
        let start = index.0 as usize * bs;
        Ok(&self.image[start..start + bs])
    }

    /// Iterate all blocks in image order.
    pub fn blocks(&self) -> impl Iterator<Item = (BlockIndex, &[u8])> {
        let bs = self.block_size as usize;
        self.image
            .chunks_exact(bs)
            .enumerate()
            .map(|(i, chunk)| (BlockIndex(i as u32), chunk))
    }

    /// The raw image, for scans that ignore block boundaries.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.image
    }
}
