//! Field descriptors: the typed schema each message field is packed and
//! unpacked against. Loaded from the spec JSON (see [`crate::spec`]) and
//! immutable for the lifetime of the process.

use serde::Deserialize;
use std::collections::BTreeMap;

/// The high-level shape of a field's content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    /// Free-form text (account identifiers, names, response text, ...).
    String,
    /// Decimal digits carrying a numeric value (amounts, codes, counters).
    Numeric,
    /// The primary or secondary bitmap itself (field 1).
    Bitmap,
    /// A bitmap-governed collection of subfields (e.g. field 48, 62, 120).
    Composite,
}

/// How a field's bytes are represented on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Encoding {
    /// Plain ASCII text/digits, one byte per character.
    Ascii,
    /// Packed binary-coded decimal, two digits per byte.
    Bcd,
    /// Raw binary bytes.
    Binary,
    /// ASCII hex digits representing the logical byte string.
    Hex,
}

/// How a field's length is signalled on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Prefix {
    /// No length prefix; the field always occupies `length` units.
    Fixed,
    /// Two ASCII decimal digits give the length (LLVAR).
    #[serde(rename = "ll")]
    LL,
    /// Three ASCII decimal digits give the length (LLLVAR).
    #[serde(rename = "lll")]
    LLL,
}

/// How a fixed-width field shorter than its declared length is padded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Padding {
    /// Left-pad with `'0'` (the default for [`FieldType::Numeric`]).
    Zero,
    /// Right-pad with spaces (the default for [`FieldType::String`]).
    Space,
    /// No padding; the caller-supplied value must already be the right width.
    None,
}

/// The schema for a single ISO 8583 field.
#[derive(Debug, Clone, Deserialize)]
pub struct FieldDescriptor {
    /// Field number (0-128). Not itself present in the JSON object; the
    /// spec loader fills it in from the JSON object's key.
    #[serde(skip)]
    pub number: u8,
    /// Field type.
    #[serde(rename = "type")]
    pub field_type: FieldType,
    /// Declared length: character/digit count for `Fixed` fields, or the
    /// maximum for `LL`/`LLL` fields.
    pub length: usize,
    /// Human-readable description, consulted by the `"auto"` fallback
    /// generator (see [`crate::template::compose`]).
    #[serde(default)]
    pub description: String,
    /// Wire encoding.
    #[serde(rename = "enc")]
    pub encoding: Encoding,
    /// Length-prefix style.
    #[serde(default = "default_prefix")]
    pub prefix: Prefix,
    /// Padding rule for `Fixed` fields; defaults by `field_type` when absent.
    #[serde(default)]
    pub padding: Option<Padding>,
    /// Subfield descriptors, present only for [`FieldType::Composite`].
    #[serde(default)]
    pub subfields: Option<BTreeMap<String, FieldDescriptor>>,
}

fn default_prefix() -> Prefix {
    Prefix::Fixed
}

impl FieldDescriptor {
    /// Effective padding rule: the explicit value if set, otherwise the
    /// type-appropriate default.
    pub fn effective_padding(&self) -> Padding {
        self.padding.unwrap_or(match self.field_type {
            FieldType::Numeric | FieldType::Bitmap => Padding::Zero,
            FieldType::String | FieldType::Composite => Padding::Space,
        })
    }

    /// Subfields keyed by their field number, sorted ascending. Empty for
    /// non-composite fields.
    pub fn ordered_subfields(&self) -> Vec<&FieldDescriptor> {
        let Some(subfields) = &self.subfields else {
            return Vec::new();
        };
        let mut out: Vec<&FieldDescriptor> = subfields.values().collect();
        out.sort_by_key(|f| f.number);
        out
    }
}
