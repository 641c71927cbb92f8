//! Result data model — the materialised object graph.
//!
//! The record family is a closed tagged union: one variant per magic the
//! format defines, plus [`Record::Unknown`] carrying the raw bytes of
//! anything the dispatcher could not identify.  Typed-token results live in
//! [`Value`], again a closed set with an opaque fallback.  The whole tree is
//! JSON-serialisable; opaque byte runs render as compact hex strings.
//!
//! Nothing here is mutated after the parse: the tree is built bottom-up and
//! handed to the caller whole.

use serde::{Serialize, Serializer};
use uuid::Uuid;

/// Raw bytes preserved verbatim; serialises as a hex string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpaqueBytes(pub Vec<u8>);

impl Serialize for OpaqueBytes {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(&self.0))
    }
}

impl From<&[u8]> for OpaqueBytes {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

/// One variable record, shaped by its 2- or 4-byte magic.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Record {
    /// `VL` — a named, typed value.
    Value {
        name:      String,
        type_name: String,
        value:     Value,
    },
    /// `BS` — opens a logical scope; carries only a name.
    ScopeBegin { name: String },
    /// `OP` — option entry; indices resolve permissively.
    Option {
        name:      String,
        type_name: String,
        value:     Value,
    },
    /// `SS` — sub-stream of records filling exactly its declared inner size.
    SubStream { children: Vec<Record> },
    /// `SXAP` — opaque stream mark of three type codes.
    StreamMark { codes: [i32; 3] },
    /// `BLCK` — named block; children fill exactly `blck_size` bytes.
    Block {
        name:     String,
        aux:      u16,
        children: Vec<Record>,
    },
    /// `AVAL` — array-value entry with a 32-bit auxiliary field.
    ArrayValue {
        name:      String,
        type_name: String,
        aux:       i32,
        value:     Value,
    },
    /// `PORP` — property whose token consumes exactly `value_size` bytes.
    Property {
        name:      String,
        type_name: String,
        value:     Value,
    },
    /// `MANU` — name table (also the per-file string table).
    NameTable { names: Vec<String> },
    /// `SBDF` — binding list; rows are kept verbatim (layout speculative).
    BindingList { entries: Vec<SbdfEntry> },
    /// `ROTS` — opaque 32-bit stub.
    Stub { raw: i32 },
    /// Unrecognised magic at a top-level entry; the budget is preserved raw.
    Unknown { magic: String, bytes: OpaqueBytes },
}

/// One `SBDF` row.  The `len & 0x7F` mask and the conditional `0x01` marker
/// are observed behaviour, not documented format; everything read is kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SbdfEntry {
    pub name:     String,
    /// True when the optional `0x01` marker byte preceded the string.
    pub marker:   bool,
    pub reserved: i16,
    pub values:   Vec<(i16, i64)>,
}

/// `TagList` token: header flag plus resolved tag names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TagList {
    pub flagged: bool,
    pub names:   Vec<String>,
}

/// `EntityHandle` token: a tag byte, then 17 opaque bytes when nonzero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntityHandle {
    pub tag:  u8,
    pub body: Option<OpaqueBytes>,
}

/// `IdTag` token: observed as one lead byte plus four i32 words.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IdTag {
    pub lead:  u8,
    pub words: [i32; 4],
}

/// One component of the per-element `Vector`/`EulerAngles` form.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Field {
    pub name:      String,
    pub type_name: String,
    pub aux:       i32,
    pub value:     Value,
}

/// A typed-token result.
///
/// The numeric variants keep the source width's natural Rust type widened to
/// 64 bits; JSON output is untagged, so leaves read as plain primitives.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Uint(u64),
    Int(i64),
    Float(f32),
    Double(f64),
    Str(String),
    /// A `CName` resolved through the string table.
    Name(String),
    Guid(Uuid),
    List(Vec<Value>),
    Tags(TagList),
    Handle(EntityHandle),
    IdTag(IdTag),
    /// Per-element `Vector`/`Vector2`/`EulerAngles` decode (schema uncertain).
    Fields(Vec<Field>),
    /// Fixed-width or rest-of-bucket bytes kept verbatim.
    Opaque(OpaqueBytes),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opaque_bytes_serialise_as_hex() {
        let json = serde_json::to_string(&OpaqueBytes(vec![0xDE, 0xAD, 0x00])).unwrap();
        assert_eq!(json, "\"dead00\"");
    }

    #[test]
    fn record_json_is_kind_tagged() {
        let rec = Record::Value {
            name:      "HP".into(),
            type_name: "Int32".into(),
            value:     Value::Int(42),
        };
        let json = serde_json::to_value(&rec).unwrap();
        assert_eq!(json["kind"], "value");
        assert_eq!(json["name"], "HP");
        assert_eq!(json["value"], 42);
    }

    #[test]
    fn value_leaves_are_untagged() {
        assert_eq!(serde_json::to_value(Value::Bool(true)).unwrap(), serde_json::json!(true));
        assert_eq!(serde_json::to_value(Value::Str("x".into())).unwrap(), serde_json::json!("x"));
        assert_eq!(
            serde_json::to_value(Value::List(vec![Value::Int(1), Value::Int(2)])).unwrap(),
            serde_json::json!([1, 2])
        );
    }
}
