//! Variable decoder — walks the image and materialises the object graph.
//!
//! # Table geometry
//!
//! ```text
//! image[header_size]   "SAV3" + three i32 type codes
//! ...                  variable records (located via the offset table)
//! nm_section_offset    "NM" + MANU string table (names AND type tags)
//! rb_section_offset    "RB" + count + count × (size:i16, offset:i32)
//! vto - 10             nm_section_offset:i32, rb_section_offset:i32
//! vto                  entry_count:i32 + entry_count × (offset:i32, size:i32)
//! len - 6              variable_table_offset:i32, "SE"
//! ```
//!
//! All offsets are absolute within the image (the container prepends the
//! literal header, so stored offsets apply directly).
//!
//! # Dispatch
//! Records are identified by a 2- or 4-byte ASCII magic; one dispatch table
//! is keyed by the actual tag width of each magic (`ROTS` is a 4-byte tag).
//! Anything unrecognised becomes an [`Record::Unknown`] carrying its budget
//! verbatim — unknown magic is never fatal at a top-level entry.
//!
//! # Byte accounting
//! Every parse step debits a [`SizeBucket`].  Reaching zero terminates child
//! lists; going negative is corruption and aborts the parse.

use log::{debug, warn};
use serde::Serialize;
use std::collections::BTreeSet;
use std::io::SeekFrom;

use crate::cursor::Cursor;
use crate::error::{Result, SaveError};
use crate::record::{Record, SbdfEntry};

mod token;

/// Recursion guard for the structural parsers.  Every level consumes at
/// least two magic bytes, so genuine saves stay far below this.
pub const MAX_DEPTH: usize = 512;

const SAVE_MAGIC:    &str = "SAV3";
const TRAILER_MAGIC: &str = "SE";
const NM_MAGIC:      &str = "NM";
const RB_MAGIC:      &str = "RB";
const MANU_MAGIC:    &str = "MANU";
const MANU_TRAILER:  &str = "ENOD";
const SBDF_TRAILER:  &str = "EBDF";

// ── Size bucket ──────────────────────────────────────────────────────────────

/// Mutable remaining-bytes counter scoped to a structural record.
#[derive(Debug)]
pub struct SizeBucket {
    remaining: i64,
}

impl SizeBucket {
    pub fn new(remaining: i64) -> Self {
        Self { remaining }
    }

    #[inline]
    pub fn remaining(&self) -> i64 {
        self.remaining
    }

    #[inline]
    pub fn has_bytes(&self) -> bool {
        self.remaining > 0
    }

    /// Debit `n` consumed bytes; going negative is corruption.
    pub fn debit(&mut self, n: i64, offset: u64) -> Result<()> {
        self.remaining -= n;
        if self.remaining < 0 {
            return Err(SaveError::NegativeBucket {
                offset,
                remaining: self.remaining,
            });
        }
        Ok(())
    }
}

// ── Tables ───────────────────────────────────────────────────────────────────

/// RB ancillary table entry — retained for observability, not consumed by
/// the parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RbEntry {
    pub size:   i16,
    pub offset: i32,
}

/// One `(offset, size)` entry of the variable offset table.  The stored
/// size is advisory; see [`parse_image`] for the effective budget rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VarTableEntry {
    pub offset: i32,
    pub size:   i32,
}

/// Everything the decoder extracts from an image.
#[derive(Debug, Serialize)]
pub struct ParsedSave {
    /// Three i32 codes following the `SAV3` magic (retained, opaque).
    pub type_codes:    [i32; 3],
    /// The per-file string table: variable names and type tags, 1-indexed.
    pub names:         Vec<String>,
    pub rb_entries:    Vec<RbEntry>,
    /// Sibling groups reconstructed from the flat offset table.
    pub groups:        Vec<Vec<Record>>,
    /// Type names encountered that are not built-ins.
    pub unknown_types: BTreeSet<String>,
}

// ── Record-level decoder ─────────────────────────────────────────────────────

/// Recursive magic-dispatched parser over one positioned cursor.
///
/// Holds the shared string table and the diagnostic unknown-types set; one
/// instance drives every entry of the offset table.
pub struct VariableDecoder {
    names:         Vec<String>,
    unknown_types: BTreeSet<String>,
    depth:         usize,
}

impl VariableDecoder {
    pub fn new(names: Vec<String>) -> Self {
        Self {
            names,
            unknown_types: BTreeSet::new(),
            depth: 0,
        }
    }

    pub fn into_parts(self) -> (Vec<String>, BTreeSet<String>) {
        (self.names, self.unknown_types)
    }

    /// Resolve a 1-based string-table index; 0 and out-of-range yield the
    /// `"Unknown"` sentinel rather than failing.
    pub(crate) fn name_at(&self, idx: i64) -> String {
        if idx >= 1 && (idx as usize) <= self.names.len() {
            self.names[idx as usize - 1].clone()
        } else {
            "Unknown".to_owned()
        }
    }

    pub(crate) fn note_unknown_type(&mut self, type_name: &str) {
        self.unknown_types.insert(type_name.to_owned());
    }

    /// Parse one record at the cursor, debiting `bucket` for every byte.
    pub fn parse(&mut self, cur: &mut Cursor, bucket: &mut SizeBucket) -> Result<Record> {
        if self.depth >= MAX_DEPTH {
            return Err(SaveError::DepthExceeded {
                offset: cur.tell(),
                limit:  MAX_DEPTH,
            });
        }
        self.depth += 1;
        let result = self.dispatch(cur, bucket);
        self.depth -= 1;
        result
    }

    fn dispatch(&mut self, cur: &mut Cursor, bucket: &mut SizeBucket) -> Result<Record> {
        let two = cur.peek_ascii(2);
        if matches!(two.as_str(), "VL" | "BS" | "OP" | "SS") {
            cur.read_bytes(2)?;
            bucket.debit(2, cur.tell())?;
            return match two.as_str() {
                "VL" => self.parse_vl(cur, bucket),
                "BS" => self.parse_bs(cur, bucket),
                "OP" => self.parse_op(cur, bucket),
                _    => self.parse_ss(cur, bucket),
            };
        }

        let four = cur.peek_ascii(4);
        if matches!(
            four.as_str(),
            "SXAP" | "BLCK" | "AVAL" | "PORP" | "MANU" | "SBDF" | "ROTS"
        ) {
            cur.read_bytes(4)?;
            bucket.debit(4, cur.tell())?;
            return match four.as_str() {
                "SXAP" => self.parse_sxap(cur, bucket),
                "BLCK" => self.parse_blck(cur, bucket),
                "AVAL" => self.parse_aval(cur, bucket),
                "PORP" => self.parse_porp(cur, bucket),
                "MANU" => self.parse_manu(cur, bucket),
                "SBDF" => self.parse_sbdf(cur, bucket),
                _      => self.parse_rots(cur, bucket),
            };
        }

        self.parse_unknown(four, cur, bucket)
    }

    // ── Structural records (magic already consumed and debited) ─────────────

    fn parse_vl(&mut self, cur: &mut Cursor, bucket: &mut SizeBucket) -> Result<Record> {
        let name_idx = cur.read_i16()?;
        let type_idx = cur.read_i16()?;
        bucket.debit(4, cur.tell())?;
        let name = self.name_at(name_idx as i64);
        let type_name = self.name_at(type_idx as i64);
        let value = self.parse_token(cur, &type_name, bucket)?;
        Ok(Record::Value { name, type_name, value })
    }

    fn parse_bs(&mut self, cur: &mut Cursor, bucket: &mut SizeBucket) -> Result<Record> {
        let name_idx = cur.read_i16()?;
        bucket.debit(2, cur.tell())?;
        Ok(Record::ScopeBegin { name: self.name_at(name_idx as i64) })
    }

    fn parse_op(&mut self, cur: &mut Cursor, bucket: &mut SizeBucket) -> Result<Record> {
        let name_idx = cur.read_u16()?;
        let type_idx = cur.read_u16()?;
        bucket.debit(4, cur.tell())?;
        let name = self.name_at(name_idx as i64);
        let type_name = self.name_at(type_idx as i64);
        let value = self.parse_token(cur, &type_name, bucket)?;
        Ok(Record::Option { name, type_name, value })
    }

    fn parse_ss(&mut self, cur: &mut Cursor, bucket: &mut SizeBucket) -> Result<Record> {
        let at = cur.tell();
        let inner_size = cur.read_i32()?;
        bucket.debit(4, cur.tell())?;
        if bucket.remaining() != inner_size as i64 {
            return Err(SaveError::SizeMismatch {
                offset:   at,
                what:     "SS inner size",
                declared: inner_size as i64,
                observed: bucket.remaining(),
            });
        }
        let mut children = Vec::new();
        while bucket.has_bytes() {
            children.push(self.parse(cur, bucket)?);
        }
        Ok(Record::SubStream { children })
    }

    fn parse_sxap(&mut self, cur: &mut Cursor, bucket: &mut SizeBucket) -> Result<Record> {
        let codes = [cur.read_i32()?, cur.read_i32()?, cur.read_i32()?];
        bucket.debit(12, cur.tell())?;
        Ok(Record::StreamMark { codes })
    }

    fn parse_blck(&mut self, cur: &mut Cursor, bucket: &mut SizeBucket) -> Result<Record> {
        let name_idx = cur.read_u16()?;
        let blck_size = cur.read_u16()?;
        let aux = cur.read_u16()?;
        bucket.debit(6, cur.tell())?;
        let name = self.name_at(name_idx as i64);

        let mut inner = SizeBucket::new(blck_size as i64);
        let mut children = Vec::new();
        while inner.has_bytes() {
            children.push(self.parse(cur, &mut inner)?);
        }
        bucket.debit(blck_size as i64, cur.tell())?;
        Ok(Record::Block { name, aux, children })
    }

    fn parse_aval(&mut self, cur: &mut Cursor, bucket: &mut SizeBucket) -> Result<Record> {
        let name_idx = cur.read_i16()?;
        let type_idx = cur.read_i16()?;
        let aux = cur.read_i32()?;
        bucket.debit(8, cur.tell())?;
        let name = self.name_at(name_idx as i64);
        let type_name = self.name_at(type_idx as i64);
        let value = self.parse_token(cur, &type_name, bucket)?;
        Ok(Record::ArrayValue { name, type_name, aux, value })
    }

    fn parse_porp(&mut self, cur: &mut Cursor, bucket: &mut SizeBucket) -> Result<Record> {
        let name_idx = cur.read_i16()?;
        let type_idx = cur.read_i16()?;
        bucket.debit(4, cur.tell())?;
        let at = cur.tell();
        let value_size = cur.read_i32()?;
        bucket.debit(4, cur.tell())?;

        let name = self.name_at(name_idx as i64);
        let type_name = self.name_at(type_idx as i64);

        // The token runs in its own bucket and must land exactly on zero.
        let mut value_bucket = SizeBucket::new(value_size as i64);
        let value = self.parse_token(cur, &type_name, &mut value_bucket)?;
        if value_bucket.remaining() != 0 {
            return Err(SaveError::SizeMismatch {
                offset:   at,
                what:     "PORP value size",
                declared: value_size as i64,
                observed: value_size as i64 - value_bucket.remaining(),
            });
        }
        bucket.debit(value_size as i64, cur.tell())?;
        Ok(Record::Property { name, type_name, value })
    }

    fn parse_manu(&mut self, cur: &mut Cursor, bucket: &mut SizeBucket) -> Result<Record> {
        let names = read_manu_strings(cur, bucket)?;
        Ok(Record::NameTable { names })
    }

    fn parse_sbdf(&mut self, cur: &mut Cursor, bucket: &mut SizeBucket) -> Result<Record> {
        let entry_count = cur.read_i32()?;
        bucket.debit(4, cur.tell())?;

        let mut entries = Vec::with_capacity(entry_count.max(0) as usize);
        for _ in 0..entry_count {
            let len = cur.read_u8()? & 0x7F;
            bucket.debit(1, cur.tell())?;

            // A 0x01 marker byte sometimes precedes the string; consume it
            // only when present.  Interpretation is speculative — the fact
            // of its presence is preserved on the entry.
            let marker = cur.peek_u8() == Some(0x01);
            if marker {
                cur.read_u8()?;
                bucket.debit(1, cur.tell())?;
            }

            let bytes = cur.read_bytes(len as usize)?;
            bucket.debit(len as i64, cur.tell())?;
            let name = String::from_utf8_lossy(bytes).into_owned();

            let reserved = cur.read_i16()?;
            let pair_count = cur.read_i16()?;
            bucket.debit(4, cur.tell())?;

            let mut values = Vec::with_capacity(pair_count.max(0) as usize);
            for _ in 0..pair_count {
                let a = cur.read_i16()?;
                let b = cur.read_i64()?;
                bucket.debit(10, cur.tell())?;
                values.push((a, b));
            }
            entries.push(SbdfEntry { name, marker, reserved, values });
        }

        let at = cur.tell();
        let trailer = cur.read_ascii(4)?;
        bucket.debit(4, cur.tell())?;
        if trailer != SBDF_TRAILER {
            return Err(SaveError::BadMagic {
                offset:   at,
                expected: SBDF_TRAILER,
                found:    trailer,
            });
        }
        Ok(Record::BindingList { entries })
    }

    fn parse_rots(&mut self, cur: &mut Cursor, bucket: &mut SizeBucket) -> Result<Record> {
        let raw = cur.read_i32()?;
        bucket.debit(4, cur.tell())?;
        Ok(Record::Stub { raw })
    }

    fn parse_unknown(
        &mut self,
        magic: String,
        cur: &mut Cursor,
        bucket: &mut SizeBucket,
    ) -> Result<Record> {
        warn!(
            "unknown magic {magic:?} at offset {}, preserving {} raw byte(s)",
            cur.tell(),
            bucket.remaining()
        );
        let bytes = self.drain_opaque(cur, bucket)?;
        Ok(Record::Unknown { magic, bytes })
    }
}

/// Read the MANU payload (the magic itself is already consumed): count, a
/// discarded i32, count length-prefixed lossy strings, a discarded i32, and
/// the mandatory `ENOD` trailer.
pub(crate) fn read_manu_strings(cur: &mut Cursor, bucket: &mut SizeBucket) -> Result<Vec<String>> {
    let string_count = cur.read_i32()?;
    let _ = cur.read_i32()?;
    bucket.debit(8, cur.tell())?;

    let mut names = Vec::with_capacity(string_count.max(0) as usize);
    for _ in 0..string_count {
        let len = cur.read_u8()? as usize;
        bucket.debit(1, cur.tell())?;
        let bytes = cur.read_bytes(len)?;
        bucket.debit(len as i64, cur.tell())?;
        names.push(String::from_utf8_lossy(bytes).into_owned());
    }

    let _ = cur.read_i32()?;
    let at = cur.tell();
    let trailer = cur.read_ascii(4)?;
    bucket.debit(8, cur.tell())?;
    if trailer != MANU_TRAILER {
        return Err(SaveError::BadMagic {
            offset:   at,
            expected: MANU_TRAILER,
            found:    trailer,
        });
    }
    Ok(names)
}

// ── Image-level parse ────────────────────────────────────────────────────────

fn require_magic(cur: &mut Cursor, expected: &'static str) -> Result<()> {
    let at = cur.tell();
    let found = cur.read_ascii(expected.len())?;
    if found != expected {
        return Err(SaveError::BadMagic { offset: at, expected, found });
    }
    Ok(())
}

fn seek_abs(cur: &mut Cursor, offset: i32, what: &'static str) -> Result<()> {
    if offset < 0 {
        return Err(SaveError::SizeMismatch {
            offset:   cur.tell(),
            what,
            declared: offset as i64,
            observed: 0,
        });
    }
    cur.seek(SeekFrom::Start(offset as u64))?;
    Ok(())
}

/// Locate the tables (§ table geometry above), then drive the offset table
/// and regroup the flat entry list into sibling lists.
pub fn parse_image(image: &[u8], header_size: usize) -> Result<ParsedSave> {
    let mut cur = Cursor::new(image);

    cur.seek(SeekFrom::Start(header_size as u64))?;
    require_magic(&mut cur, SAVE_MAGIC)?;
    let type_codes = [cur.read_i32()?, cur.read_i32()?, cur.read_i32()?];

    // Trailer: the variable-table offset sits six bytes before the end,
    // sealed by "SE".
    cur.seek(SeekFrom::End(-6))?;
    let variable_table_offset = cur.read_i32()?;
    require_magic(&mut cur, TRAILER_MAGIC)?;

    let string_table_footer_offset = variable_table_offset as i64 - 10;
    if string_table_footer_offset < 0 {
        return Err(SaveError::SizeMismatch {
            offset:   image.len() as u64 - 6,
            what:     "variable table offset",
            declared: variable_table_offset as i64,
            observed: image.len() as i64,
        });
    }
    cur.seek(SeekFrom::Start(string_table_footer_offset as u64))?;
    let nm_section_offset = cur.read_i32()?;
    let rb_section_offset = cur.read_i32()?;

    seek_abs(&mut cur, nm_section_offset, "NM section offset")?;
    require_magic(&mut cur, NM_MAGIC)?;
    let string_table_offset = cur.tell();

    seek_abs(&mut cur, rb_section_offset, "RB section offset")?;
    require_magic(&mut cur, RB_MAGIC)?;
    let rb_count = cur.read_i32()?;
    let mut rb_entries = Vec::with_capacity(rb_count.max(0) as usize);
    for _ in 0..rb_count {
        rb_entries.push(RbEntry {
            size:   cur.read_i16()?,
            offset: cur.read_i32()?,
        });
    }

    // String table: a MANU record bounded by the footer.
    cur.seek(SeekFrom::Start(string_table_offset))?;
    let mut bucket = SizeBucket::new(string_table_footer_offset - string_table_offset as i64);
    require_magic(&mut cur, MANU_MAGIC)?;
    bucket.debit(4, cur.tell())?;
    let names = read_manu_strings(&mut cur, &mut bucket)?;
    debug!("string table: {} name(s)", names.len());

    // Variable offset table, sorted ascending by offset (stable).
    seek_abs(&mut cur, variable_table_offset, "variable table offset")?;
    let entry_count = cur.read_i32()?;
    let mut entries = Vec::with_capacity(entry_count.max(0) as usize);
    for _ in 0..entry_count {
        entries.push(VarTableEntry {
            offset: cur.read_i32()?,
            size:   cur.read_i32()?,
        });
    }
    entries.sort_by_key(|e| e.offset);
    debug!("variable table: {} entr(y/ies)", entries.len());

    // Drive the table.  Budget for entry i is the gap to the next offset
    // when i < len-2; the last two entries rely on their stored size.
    let mut decoder = VariableDecoder::new(names);
    let n = entries.len();
    let mut outcomes: Vec<Option<Record>> = Vec::with_capacity(n);
    let mut effective: Vec<i64> = Vec::with_capacity(n);
    for i in 0..n {
        let entry = entries[i];
        let budget = if i + 2 < n {
            (entries[i + 1].offset - entry.offset) as i64
        } else {
            entry.size as i64
        };
        effective.push(budget);

        if i > 0 && (entry.offset as u64) < cur.tell() {
            // Absorbed by the previous record's parse; never re-parsed.
            debug!("entry {i} at offset {} absorbed by previous record", entry.offset);
            outcomes.push(None);
            continue;
        }

        seek_abs(&mut cur, entry.offset, "variable entry offset")?;
        let mut entry_bucket = SizeBucket::new(budget);
        outcomes.push(Some(decoder.parse(&mut cur, &mut entry_bucket)?));
    }

    let groups = group_records(&entries, &effective, outcomes);
    let (names, unknown_types) = decoder.into_parts();
    if !unknown_types.is_empty() {
        warn!("{} unknown type name(s): {:?}", unknown_types.len(), unknown_types);
    }

    Ok(ParsedSave {
        type_codes,
        names,
        rb_entries,
        groups,
        unknown_types,
    })
}

/// Rebuild sibling groups from the flat table: a group opens at entry `i`
/// and keeps absorbing subsequent entries while the opener's stored size
/// exceeds the bytes accounted so far.  Entries absorbed by an earlier
/// record's parse still count their stored size inside an open group but
/// contribute no record, and never open a group of their own — their
/// content already sits inside that record's subtree.
fn group_records(
    entries: &[VarTableEntry],
    effective: &[i64],
    mut outcomes: Vec<Option<Record>>,
) -> Vec<Vec<Record>> {
    let mut groups = Vec::new();
    let mut i = 0;
    while i < entries.len() {
        if outcomes[i].is_none() {
            i += 1;
            continue;
        }
        let mut group = Vec::new();
        if let Some(rec) = outcomes[i].take() {
            group.push(rec);
        }
        let mut remaining = entries[i].size as i64 - effective[i];
        i += 1;
        while remaining > 0 && i < entries.len() {
            remaining -= entries[i].size as i64;
            if let Some(rec) = outcomes[i].take() {
                group.push(rec);
            }
            i += 1;
        }
        groups.push(group);
    }
    groups
}
