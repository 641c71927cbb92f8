//! Typed-token parsers.
//!
//! A token's layout is fixed by a type *name* drawn from the string table —
//! the same table that supplies variable names.  Resolution is a string
//! compare against the built-in set below; anything else falls through to
//! the opaque branch, which drains the enclosing bucket and records the
//! name in the diagnostic unknown-types set.  Token parsing never fails on
//! an unrecognised type.
//!
//! Composites: `handle:T` and `soft:T` decode exactly as `T`;
//! `array:2,0,T` is a 32-bit count followed by that many `T` tokens.

use log::{debug, warn};
use uuid::Uuid;

use crate::cursor::Cursor;
use crate::error::Result;
use crate::record::{EntityHandle, Field, IdTag, OpaqueBytes, TagList, Value};

use super::{SizeBucket, VariableDecoder};

/// Enumerated game tags with a fixed 2-byte payload.
const ENUM_TYPES: &[&str] = &[
    "eGwintFaction",
    "EJournalStatus",
    "EZoneName",
    "EDifficultyMode",
];

/// Engine types whose schemas are not reverse-engineered: they own the rest
/// of the enclosing bucket.  Unlike genuinely unknown names they do not
/// enter the unknown-types set.
const BUCKET_SIZED_TYPES: &[&str] = &[
    "SItemUniqueId",
    "W3AbilityManager",
    "W3EnvironmentManager",
    "SActionPointId",
];

impl VariableDecoder {
    /// Parse one typed token, debiting `bucket` for every byte consumed.
    pub(crate) fn parse_token(
        &mut self,
        cur: &mut Cursor,
        type_name: &str,
        bucket: &mut SizeBucket,
    ) -> Result<Value> {
        // Aliases and containers resolve before the built-in table.
        if let Some(inner) = type_name.strip_prefix("handle:") {
            return self.parse_token(cur, inner, bucket);
        }
        if let Some(inner) = type_name.strip_prefix("soft:") {
            return self.parse_token(cur, inner, bucket);
        }
        if let Some(element) = type_name.strip_prefix("array:2,0,") {
            let len = cur.read_i32()?;
            bucket.debit(4, cur.tell())?;
            let mut items = Vec::with_capacity(len.max(0) as usize);
            for _ in 0..len {
                items.push(self.parse_token(cur, element, bucket)?);
            }
            return Ok(Value::List(items));
        }

        match type_name {
            "Uint8" => {
                let v = cur.read_u8()?;
                bucket.debit(1, cur.tell())?;
                Ok(Value::Uint(v as u64))
            }
            "Uint16" => {
                let v = cur.read_u16()?;
                bucket.debit(2, cur.tell())?;
                Ok(Value::Uint(v as u64))
            }
            "Uint32" => {
                let v = cur.read_u32()?;
                bucket.debit(4, cur.tell())?;
                Ok(Value::Uint(v as u64))
            }
            "Uint64" => {
                let v = cur.read_u64()?;
                bucket.debit(8, cur.tell())?;
                Ok(Value::Uint(v))
            }
            "Int8" => {
                let v = cur.read_i8()?;
                bucket.debit(1, cur.tell())?;
                Ok(Value::Int(v as i64))
            }
            "Int16" => {
                let v = cur.read_i16()?;
                bucket.debit(2, cur.tell())?;
                Ok(Value::Int(v as i64))
            }
            "Int32" => {
                let v = cur.read_i32()?;
                bucket.debit(4, cur.tell())?;
                Ok(Value::Int(v as i64))
            }
            "Int64" => {
                let v = cur.read_i64()?;
                bucket.debit(8, cur.tell())?;
                Ok(Value::Int(v))
            }
            "Bool" => {
                let v = cur.read_u8()?;
                bucket.debit(1, cur.tell())?;
                Ok(Value::Bool(v != 0))
            }
            "Float" => {
                let v = cur.read_f32()?;
                bucket.debit(4, cur.tell())?;
                Ok(Value::Float(v))
            }
            "Double" => {
                let v = cur.read_f64()?;
                bucket.debit(8, cur.tell())?;
                Ok(Value::Double(v))
            }
            "String" => {
                let header = cur.read_u8()?;
                bucket.debit(1, cur.tell())?;
                if header & 0x80 != 0 {
                    let len = (header & 0x7F) as usize;
                    let bytes = cur.read_bytes(len)?;
                    bucket.debit(len as i64, cur.tell())?;
                    Ok(Value::Str(String::from_utf8_lossy(bytes).into_owned()))
                } else {
                    Ok(Value::Str(String::new()))
                }
            }
            "StringAnsi" => {
                let len = cur.read_u8()? as usize;
                bucket.debit(1, cur.tell())?;
                let bytes = cur.read_bytes(len)?;
                bucket.debit(len as i64, cur.tell())?;
                Ok(Value::Str(String::from_utf8_lossy(bytes).into_owned()))
            }
            "CName" => {
                let idx = cur.read_i16()?;
                bucket.debit(2, cur.tell())?;
                Ok(Value::Name(self.name_at(idx as i64)))
            }
            "CGUID" => {
                let bytes: [u8; 16] = cur.read_bytes(16)?.try_into().unwrap();
                bucket.debit(16, cur.tell())?;
                Ok(Value::Guid(Uuid::from_bytes(bytes)))
            }
            "EngineTime" => self.opaque_fixed(cur, bucket, 3),
            "GameTime" => self.opaque_fixed(cur, bucket, 11),
            "IdTag" => {
                let lead = cur.read_u8()?;
                let words = [
                    cur.read_i32()?,
                    cur.read_i32()?,
                    cur.read_i32()?,
                    cur.read_i32()?,
                ];
                bucket.debit(17, cur.tell())?;
                Ok(Value::IdTag(IdTag { lead, words }))
            }
            "EntityHandle" => {
                let tag = cur.read_u8()?;
                bucket.debit(1, cur.tell())?;
                let body = if tag != 0 {
                    let bytes = cur.read_bytes(17)?;
                    bucket.debit(17, cur.tell())?;
                    Some(OpaqueBytes::from(bytes))
                } else {
                    None
                };
                Ok(Value::Handle(EntityHandle { tag, body }))
            }
            "TagList" => {
                let header = cur.read_u8()?;
                bucket.debit(1, cur.tell())?;
                let flagged = header & 0x80 != 0;
                let count = (header & 0x7F) as usize;
                let mut names = Vec::with_capacity(count);
                for _ in 0..count {
                    let idx = cur.read_i16()?;
                    bucket.debit(2, cur.tell())?;
                    names.push(self.name_at(idx as i64));
                }
                Ok(Value::Tags(TagList { flagged, names }))
            }
            "Vector" => self.parse_vector_like(cur, bucket, 35, 4),
            "Vector2" => self.parse_vector_like(cur, bucket, 19, 2),
            "EulerAngles" => self.parse_vector_like(cur, bucket, 27, 3),
            _ if ENUM_TYPES.contains(&type_name) => self.opaque_fixed(cur, bucket, 2),
            _ if BUCKET_SIZED_TYPES.contains(&type_name) => {
                debug!("bucket-sized type {type_name:?}, draining {} byte(s)", bucket.remaining());
                Ok(Value::Opaque(self.drain_opaque(cur, bucket)?))
            }
            _ => {
                warn!(
                    "unknown type {type_name:?} at offset {}, draining {} byte(s)",
                    cur.tell(),
                    bucket.remaining()
                );
                self.note_unknown_type(type_name);
                Ok(Value::Opaque(self.drain_opaque(cur, bucket)?))
            }
        }
    }

    /// A fixed-width blob kept verbatim.
    fn opaque_fixed(&mut self, cur: &mut Cursor, bucket: &mut SizeBucket, width: usize) -> Result<Value> {
        let bytes = cur.read_bytes(width)?;
        bucket.debit(width as i64, cur.tell())?;
        Ok(Value::Opaque(bytes.into()))
    }

    /// Consume whatever remains of the bucket as raw bytes.
    pub(crate) fn drain_opaque(&mut self, cur: &mut Cursor, bucket: &mut SizeBucket) -> Result<OpaqueBytes> {
        let n = bucket.remaining().max(0) as usize;
        let bytes = cur.read_bytes(n)?;
        bucket.debit(n as i64, cur.tell())?;
        Ok(bytes.into())
    }

    /// `Vector`/`Vector2`/`EulerAngles` — schema uncertain, two observed
    /// decodings.  The packed form (widths 35/19/27) applies when the
    /// bucket is an exact multiple of the width; otherwise each component
    /// is a `(name_idx, type_idx, aux, token)` sub-record and the list is
    /// closed by an i16 terminator.
    fn parse_vector_like(
        &mut self,
        cur: &mut Cursor,
        bucket: &mut SizeBucket,
        packed_width: i64,
        components: usize,
    ) -> Result<Value> {
        if bucket.remaining() > 0 && bucket.remaining() % packed_width == 0 {
            let bytes = cur.read_bytes(packed_width as usize)?;
            bucket.debit(packed_width, cur.tell())?;
            return Ok(Value::Opaque(bytes.into()));
        }

        let mut fields = Vec::with_capacity(components);
        for _ in 0..components {
            let name_idx = cur.read_i16()?;
            let type_idx = cur.read_i16()?;
            let aux = cur.read_i32()?;
            bucket.debit(8, cur.tell())?;
            let name = self.name_at(name_idx as i64);
            let type_name = self.name_at(type_idx as i64);
            let value = self.parse_token(cur, &type_name, bucket)?;
            fields.push(Field { name, type_name, aux, value });
        }
        let _terminator = cur.read_i16()?;
        bucket.debit(2, cur.tell())?;
        Ok(Value::Fields(fields))
    }
}
