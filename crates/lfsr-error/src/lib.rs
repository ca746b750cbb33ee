#![forbid(unsafe_code)]
//! Error types for lfsrescue.
//!
//! # Error Taxonomy
//!
//! lfsrescue uses a two-layer error model:
//!
//! | Layer | Type | Crate | Purpose |
//! |-------|------|-------|---------|
//! | Parsing | `ParseError` | `lfsr-types` | On-disk format violations detected during byte parsing |
//! | Runtime | `LfsrError` | `lfsr-error` (this crate) | User-facing errors for CLI and API consumers |
//!
//! `lfsr-error` is intentionally independent of `lfsr-types` to keep the
//! dependency graph acyclic; `lfsr-core` converts `ParseError` into
//! `LfsrError::Parse` at its boundary.
//!
//! ## Severity policy
//!
//! - `Geometry` is checked before any tag decoding. A wrong block size
//!   silently desynchronizes every subsequent offset calculation, so it
//!   fails the whole operation up front.
//! - `NoSuperblock` / `MalformedSuperblock` are fatal to tree operations
//!   only. The raw carve scan needs no superblock and stays available.
//! - `CyclicDirectory` aborts tree building; other directories already
//!   walked remain valid.
//! - `TruncatedFile` is scoped to one file's content read. Sibling reads
//!   proceed.
//! - Stream truncation and commit-checksum mismatches are *not* errors:
//!   they surface as diagnostic counts on decoded results, because partial
//!   records from a corrupted block are still forensically useful.

use thiserror::Error;

/// The single user-facing error type shared by the CLI and public API
/// surfaces. Crate-internal errors (`ParseError` from `lfsr-types`) are
/// converted into `LfsrError` at crate boundaries.
#[derive(Debug, Error)]
pub enum LfsrError {
    /// Operating system I/O error (wraps `std::io::Error`).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Image length is not a multiple of the block size, or the block size
    /// itself is unusable. Usually means a wrong `--block-size` value.
    #[error("bad geometry: {0}")]
    Geometry(String),

    /// Neither candidate block carries the filesystem magic.
    #[error("no superblock found in block 0 or block 1")]
    NoSuperblock,

    /// Magic present but the record that should carry the geometry fields
    /// is missing, too short, or of the wrong kind.
    #[error("malformed superblock: {0}")]
    MalformedSuperblock(String),

    /// A directory chain revisited an already-walked metadata pair.
    #[error("directory chain cycles back to pair [{0}, {1}]")]
    CyclicDirectory(u32, u32),

    /// A file's block chain points outside the image or ends before the
    /// recorded size is satisfied.
    #[error("truncated file content: {0}")]
    TruncatedFile(String),

    /// Boundary conversion from a `ParseError` in `lfsr-types`.
    #[error("parse error: {0}")]
    Parse(String),

    /// A path lookup against the reconstructed tree found nothing.
    #[error("not found: {0}")]
    NotFound(String),
}

/// Result alias using `LfsrError`.
pub type Result<T> = std::result::Result<T, LfsrError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages_identify_likely_cause() {
        let err = LfsrError::Geometry("image length 1000 % block size 512 != 0".to_owned());
        assert!(err.to_string().contains("bad geometry"));

        let err = LfsrError::CyclicDirectory(4, 5);
        assert!(err.to_string().contains("[4, 5]"));
    }

    #[test]
    fn io_errors_convert() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err = LfsrError::from(io);
        assert!(matches!(err, LfsrError::Io(_)));
    }
}
