#![forbid(unsafe_code)]
//! On-disk metadata format parsing for littlefs-style images.
//!
//! Pure parsing crate with no I/O and no side effects. Decodes byte slices into
//! typed Rust structures: XOR-chained tag words, per-block record streams,
//! the superblock geometry record, file structure records (inline and CTZ
//! skip-list), and the skip-list index arithmetic.

pub mod ctz;
pub mod structs;
pub mod tag;

pub use ctz::{block_count_for_size, data_capacity, pointer_words};
pub use structs::{FileStruct, Superblock, read_revision};
pub use tag::{
    CHUNK_DELETE_CREATE, CHUNK_DELETE_TOMBSTONE, CHUNK_NAME_DIR, CHUNK_NAME_FILE,
    CHUNK_NAME_SUPERBLOCK, CHUNK_STRUCT_CTZ, CHUNK_STRUCT_DIR_PAIR, CHUNK_STRUCT_INLINE,
    CHUNK_TAIL_HARD, CHUNK_TAIL_SOFT, Record, StreamEnd, Tag, TagKind, TagStream,
};
