//! # sav3 — SAV3 save-file decoder
//!
//! Format facts (reverse-engineered, read-only):
//! - All multi-byte integers are little-endian; floats are IEEE-754 LE
//! - The outer container ("SNFHFZLC") is a header-described list of LZ4
//!   block-compressed chunks; the image is the literal header followed by
//!   the decompressed chunks, so stored absolute offsets apply directly
//! - Chunks are decompressed only when `0 < compressed < uncompressed`;
//!   anything else is a metadata sentinel and contributes nothing
//! - Variables are self-describing only together with the per-file string
//!   table: 2-/4-byte ASCII magics select the record shape, string-table
//!   indices supply both names and dynamic type tags
//! - Every structural record accounts for its bytes exactly; a bucket
//!   going negative is corruption and aborts the parse
//! - Unknown magics and unknown type names never abort: their bytes are
//!   preserved verbatim and the names are reported for diagnostics

pub mod error;
pub mod cursor;
pub mod container;
pub mod record;
pub mod decoder;
pub mod save;

// Flat re-exports for the most common types.
pub use container::{decompress, ChunkInfo, CONTAINER_MAGIC};
pub use cursor::Cursor;
pub use decoder::{parse_image, ParsedSave, RbEntry, SizeBucket, VarTableEntry, VariableDecoder};
pub use error::{Result, SaveError};
pub use record::{OpaqueBytes, Record, Value};
pub use save::SaveFile;
