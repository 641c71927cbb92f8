//! High-level [`SaveFile`] API — the primary embedding surface.
//!
//! ```no_run
//! use sav3::SaveFile;
//!
//! let save = SaveFile::open("quicksave.sav")?;
//! println!("{} variable group(s)", save.groups().len());
//! println!("{}", save.to_json()?);
//! # Ok::<(), sav3::SaveError>(())
//! ```

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use crate::container;
use crate::decoder::{self, ParsedSave, RbEntry};
use crate::error::Result;
use crate::record::Record;

/// A fully decoded save: the decompressed image plus the parsed tables and
/// record tree.  Construction runs the whole pipeline; the result is
/// immutable and delivered whole or not at all.
pub struct SaveFile {
    image:       Vec<u8>,
    header_size: usize,
    parsed:      ParsedSave,
}

impl SaveFile {
    /// Read, decompress, and parse a save from disk.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = fs::read(path)?;
        Self::from_bytes(&file)
    }

    /// Decompress and parse a save already loaded into memory.
    pub fn from_bytes(file: &[u8]) -> Result<Self> {
        let (image, header_size) = container::decompress(file)?;
        let parsed = decoder::parse_image(&image, header_size)?;
        Ok(Self { image, header_size, parsed })
    }

    /// The reassembled uncompressed image (literal header prepended).
    pub fn image(&self) -> &[u8] {
        &self.image
    }

    pub fn header_size(&self) -> usize {
        self.header_size
    }

    /// The per-file string table (variable names and type tags).
    pub fn names(&self) -> &[String] {
        &self.parsed.names
    }

    pub fn rb_entries(&self) -> &[RbEntry] {
        &self.parsed.rb_entries
    }

    pub fn type_codes(&self) -> [i32; 3] {
        self.parsed.type_codes
    }

    /// The record tree, regrouped into sibling lists.
    pub fn groups(&self) -> &[Vec<Record>] {
        &self.parsed.groups
    }

    /// Type names encountered during token parsing that are not built-ins.
    pub fn unknown_types(&self) -> &BTreeSet<String> {
        &self.parsed.unknown_types
    }

    /// Serialise the parsed save (names, RB entries, type codes, record
    /// groups, unknown types) as pretty-printed JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.parsed)?)
    }
}
