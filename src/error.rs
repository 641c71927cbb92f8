//! Parse errors — one value per hard failure, carrying the failing offset.
//!
//! The decoder distinguishes two failure classes.  Recoverable conditions
//! (unknown record magic, unknown type name, out-of-range string index,
//! malformed UTF-8 in a table string) never surface here: they are absorbed
//! into the result tree and the diagnostic state.  Everything in this enum
//! aborts the parse; there are no retries and no partial result.

use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SaveError>;

#[derive(Error, Debug)]
pub enum SaveError {
    /// A mandatory magic (`SNFHFZLC`, `SAV3`, `SE`, `NM`, `RB`, `MANU`,
    /// `ENOD`, `EBDF`) was not found where the format requires it.
    #[error("bad magic at offset {offset}: expected {expected:?}, found {found:?}")]
    BadMagic {
        offset:   u64,
        expected: &'static str,
        found:    String,
    },

    /// A read ran past the end of the buffer.  The file is truncated or an
    /// offset field is corrupt.
    #[error("short read at offset {offset}: wanted {wanted} bytes, {available} available")]
    ShortRead {
        offset:    u64,
        wanted:    usize,
        available: usize,
    },

    /// A declared size did not match what the parse observed — `SS` inner
    /// size, `PORP` value size, a chunk's `eof_offset`, or a decompressed
    /// chunk length.
    #[error("size mismatch at offset {offset}: {what} declared {declared}, observed {observed}")]
    SizeMismatch {
        offset:   u64,
        what:     &'static str,
        declared: i64,
        observed: i64,
    },

    /// LZ4 block decompression of a chunk failed.  `offset` is the position
    /// of the chunk's compressed body in the original file.
    #[error("chunk decompression failed at offset {offset}: {source}")]
    DecompressFailed {
        offset: u64,
        source: lz4_flex::block::DecompressError,
    },

    /// A structural record's children consumed more bytes than the record
    /// declared.  Always corruption.
    #[error("size bucket went negative at offset {offset} ({remaining} remaining)")]
    NegativeBucket { offset: u64, remaining: i64 },

    /// Nesting deeper than any well-formed save produces.  Guards the
    /// recursive parsers against pathological inputs.
    #[error("record nesting exceeded {limit} levels at offset {offset}")]
    DepthExceeded { offset: u64, limit: usize },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON encoding failed: {0}")]
    Json(#[from] serde_json::Error),
}
