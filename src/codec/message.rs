//! The in-memory `Message` and the pack/unpack machinery that turns it
//! into (and out of) an ISO 8583 wire payload, per a loaded [`MessageSpec`].

use bytes::Bytes;
use std::collections::BTreeMap;

use crate::codec::bitmap;
use crate::codec::buffer::{hex_decode, hex_encode, ReadCursor, WriteCursor};
use crate::codec::field::{Encoding, FieldDescriptor, FieldType, Padding, Prefix};
use crate::error::{Error, Result};
use crate::spec::MessageSpec;

/// A single field's value: either a scalar string (numeric/text content,
/// always stored in its logical un-padded form) or a composite field's
/// subfield map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    /// Scalar text/numeric content.
    Str(String),
    /// A composite field's subfields, keyed by subfield number.
    Composite(BTreeMap<u8, FieldValue>),
}

impl FieldValue {
    /// Borrow the scalar string, or fail if this is a composite value.
    pub fn as_str(&self) -> Result<&str> {
        match self {
            FieldValue::Str(s) => Ok(s),
            FieldValue::Composite(_) => Err(Error::unpack("expected scalar value, got composite", &[])),
        }
    }

    /// Borrow the subfield map, or fail if this is a scalar value.
    pub fn as_composite(&self) -> Result<&BTreeMap<u8, FieldValue>> {
        match self {
            FieldValue::Composite(m) => Ok(m),
            FieldValue::Str(_) => Err(Error::unpack("expected composite value, got scalar", &[])),
        }
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::Str(s)
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Str(s.to_string())
    }
}

/// An ISO 8583 message: an MTI plus whatever data fields (2-128) are set.
/// Field 1 (the bitmap) is derived from the field set at pack time and
/// never stored directly.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    /// Message Type Indicator, 4 decimal digits.
    pub mti: String,
    /// Data fields, numbered 2-128.
    pub fields: BTreeMap<u8, FieldValue>,
}

impl Message {
    /// Start a new message with the given MTI and no fields set.
    pub fn new(mti: impl Into<String>) -> Self {
        Self {
            mti: mti.into(),
            fields: BTreeMap::new(),
        }
    }

    /// Set field `number` to `value`.
    pub fn set(&mut self, number: u8, value: impl Into<FieldValue>) {
        self.fields.insert(number, value.into());
    }

    /// Borrow field `number`'s value, if set.
    pub fn get(&self, number: u8) -> Option<&FieldValue> {
        self.fields.get(&number)
    }

    /// Borrow field `number`'s scalar value as a `&str`, if set and scalar.
    pub fn get_str(&self, number: u8) -> Option<&str> {
        self.fields.get(&number).and_then(|v| v.as_str().ok())
    }

    /// Render this message as a JSON object (`mti` plus each field number,
    /// stringified), for the audit log's request/response columns (§4.9).
    pub fn to_json(&self) -> serde_json::Value {
        let mut fields = serde_json::Map::new();
        for (number, value) in &self.fields {
            fields.insert(number.to_string(), field_value_to_json(value));
        }
        serde_json::json!({ "mti": self.mti, "fields": fields })
    }
}

fn field_value_to_json(value: &FieldValue) -> serde_json::Value {
    match value {
        FieldValue::Str(s) => serde_json::Value::String(s.clone()),
        FieldValue::Composite(map) => {
            let mut obj = serde_json::Map::new();
            for (number, v) in map {
                obj.insert(number.to_string(), field_value_to_json(v));
            }
            serde_json::Value::Object(obj)
        }
    }
}

/// Pack `msg` into its wire representation per `spec`.
pub fn pack(msg: &Message, spec: &MessageSpec) -> Result<Bytes> {
    let field0 = spec.field(0).ok_or_else(|| Error::unpack("spec is missing field 0 (MTI)", &[]))?;
    let field1 = spec.field(1).ok_or_else(|| Error::unpack("spec is missing field 1 (bitmap)", &[]))?;

    let mut out = Vec::with_capacity(64);
    let (mti_bytes, _) = encode_scalar_content(field0, &msg.mti)?;
    out.extend(mti_bytes);

    let present: Vec<u8> = msg.fields.keys().copied().filter(|&n| (2..=128).contains(&n)).collect();
    let primary: Vec<u8> = present.iter().copied().filter(|&n| n <= 64).collect();
    let secondary: Vec<u8> = present.iter().copied().filter(|&n| n > 64).collect();

    let mut primary_bitmap = bitmap::build(&primary, 1, 8);
    if !secondary.is_empty() {
        bitmap::set(&mut primary_bitmap, 1);
    }
    out.extend(encode_bitmap_bytes(field1, &primary_bitmap));

    if !secondary.is_empty() {
        let secondary_bitmap = bitmap::build(&secondary, 65, 8);
        out.extend(encode_bitmap_bytes(field1, &secondary_bitmap));
    }

    for number in present {
        let desc = spec
            .field(number)
            .ok_or_else(|| Error::unpack(format!("spec has no descriptor for field {number}"), &[]))?;
        let value = &msg.fields[&number];
        out.extend(encode_field_full(desc, value)?);
    }

    Ok(Bytes::from(out))
}

/// Unpack a wire payload into a [`Message`] per `spec`.
pub fn unpack(raw: &[u8], spec: &MessageSpec) -> Result<Message> {
    let field0 = spec.field(0).ok_or_else(|| Error::unpack("spec is missing field 0 (MTI)", raw))?;
    let field1 = spec.field(1).ok_or_else(|| Error::unpack("spec is missing field 1 (bitmap)", raw))?;

    let mut cur = ReadCursor::new(Bytes::copy_from_slice(raw));
    let mti = decode_scalar_content(field0, field0.length, &mut cur)?;
    let FieldValue::Str(mti) = mti else {
        return Err(Error::unpack("MTI decoded as composite", raw));
    };

    let primary_bitmap = decode_bitmap_bytes(field1, &mut cur)?;
    let secondary_present = bitmap::is_set(&primary_bitmap, 1);
    let secondary_bitmap = if secondary_present {
        Some(decode_bitmap_bytes(field1, &mut cur)?)
    } else {
        None
    };

    let mut numbers = bitmap::fields_present(&primary_bitmap, 1);
    numbers.retain(|&n| n >= 2);
    if let Some(secondary_bitmap) = &secondary_bitmap {
        numbers.extend(bitmap::fields_present(secondary_bitmap, 65));
    }
    numbers.sort_unstable();

    let mut fields = BTreeMap::new();
    for number in numbers {
        let desc = spec
            .field(number)
            .ok_or_else(|| Error::unpack(format!("server set unknown field {number}"), raw))?;
        fields.insert(number, decode_field_full(desc, &mut cur)?);
    }

    Ok(Message { mti, fields })
}

fn encode_bitmap_bytes(field1: &FieldDescriptor, bytes: &[u8]) -> Vec<u8> {
    match field1.encoding {
        Encoding::Hex => hex_encode(bytes).into_bytes(),
        _ => bytes.to_vec(),
    }
}

fn decode_bitmap_bytes(field1: &FieldDescriptor, cur: &mut ReadCursor) -> Result<Vec<u8>> {
    match field1.encoding {
        Encoding::Hex => {
            let text = cur.read_ascii_str(16)?;
            hex_decode(&text)
        }
        _ => cur.read_bytes(8).map(|b| b.to_vec()),
    }
}

fn field_prefix_bytes(prefix: Prefix, logical_len: usize) -> Result<Vec<u8>> {
    match prefix {
        Prefix::Fixed => Ok(Vec::new()),
        Prefix::LL => {
            if logical_len > 99 {
                return Err(Error::unpack(format!("LL length {logical_len} exceeds 99"), &[]));
            }
            Ok(format!("{logical_len:02}").into_bytes())
        }
        Prefix::LLL => {
            if logical_len > 999 {
                return Err(Error::unpack(format!("LLL length {logical_len} exceeds 999"), &[]));
            }
            Ok(format!("{logical_len:03}").into_bytes())
        }
    }
}

fn decode_prefix_len(prefix: Prefix, fixed_len: usize, cur: &mut ReadCursor) -> Result<usize> {
    match prefix {
        Prefix::Fixed => Ok(fixed_len),
        Prefix::LL => Ok(cur.read_ascii_digits(2)? as usize),
        Prefix::LLL => Ok(cur.read_ascii_digits(3)? as usize),
    }
}

fn encode_scalar_content(desc: &FieldDescriptor, text: &str) -> Result<(Vec<u8>, usize)> {
    match desc.encoding {
        Encoding::Ascii => {
            let width = match desc.prefix {
                Prefix::Fixed => desc.length,
                Prefix::LL | Prefix::LLL => text.chars().count(),
            };
            if text.chars().count() > width {
                return Err(Error::unpack(
                    format!("field {} value {text:?} exceeds width {width}", desc.number),
                    &[],
                ));
            }
            let mut w = WriteCursor::with_capacity(width);
            match desc.effective_padding() {
                Padding::Zero => w.write_ascii_numeric(text, width),
                Padding::Space => w.write_ascii_text(text, width),
                Padding::None => w.write_bytes(text.as_bytes()),
            }
            Ok((w.freeze().to_vec(), width))
        }
        Encoding::Bcd => {
            let digit_width = match desc.prefix {
                Prefix::Fixed => desc.length,
                Prefix::LL | Prefix::LLL => text.len(),
            };
            let mut w = WriteCursor::default();
            w.write_bcd_digits(text, digit_width);
            Ok((w.freeze().to_vec(), digit_width))
        }
        Encoding::Binary => {
            let raw = hex_decode(text)?;
            Ok((raw, text.len() / 2))
        }
        Encoding::Hex => {
            let mut w = WriteCursor::default();
            w.write_bytes(text.as_bytes());
            Ok((w.freeze().to_vec(), text.len()))
        }
    }
}

fn decode_scalar_content(desc: &FieldDescriptor, logical_len: usize, cur: &mut ReadCursor) -> Result<FieldValue> {
    let text = match desc.encoding {
        Encoding::Ascii => {
            let s = cur.read_ascii_str(logical_len)?;
            if desc.effective_padding() == Padding::Space {
                s.trim_end().to_string()
            } else {
                s
            }
        }
        Encoding::Bcd => {
            let byte_len = (logical_len + 1) / 2;
            let digits = cur.read_bcd_digits(byte_len)?;
            digits[..logical_len].to_string()
        }
        Encoding::Binary => {
            let raw = cur.read_bytes(logical_len)?;
            hex_encode(&raw)
        }
        Encoding::Hex => cur.read_ascii_str(logical_len)?,
    };
    Ok(FieldValue::Str(text))
}

fn encode_field_full(desc: &FieldDescriptor, value: &FieldValue) -> Result<Vec<u8>> {
    match desc.field_type {
        FieldType::Composite => {
            let map = value.as_composite()?;
            let subfields = desc.ordered_subfields();
            let max_num = subfields.iter().map(|f| f.number).max().unwrap_or(0) as usize;
            let width = bitmap::bytes_needed(max_num).max(1);
            let present: Vec<u8> = subfields
                .iter()
                .filter(|f| map.contains_key(&f.number))
                .map(|f| f.number)
                .collect();
            let mut content = bitmap::build(&present, 1, width);
            for f in &subfields {
                if let Some(v) = map.get(&f.number) {
                    content.extend(encode_field_full(f, v)?);
                }
            }
            let mut out = field_prefix_bytes(desc.prefix, content.len())?;
            out.extend(content);
            Ok(out)
        }
        FieldType::Bitmap => Err(Error::unpack("bitmap fields are encoded by the message packer, not per-field", &[])),
        FieldType::String | FieldType::Numeric => {
            let text = value.as_str()?;
            let (content, logical_len) = encode_scalar_content(desc, text)?;
            let mut out = field_prefix_bytes(desc.prefix, logical_len)?;
            out.extend(content);
            Ok(out)
        }
    }
}

fn decode_field_full(desc: &FieldDescriptor, cur: &mut ReadCursor) -> Result<FieldValue> {
    match desc.field_type {
        FieldType::Composite => {
            let logical_len = decode_prefix_len(desc.prefix, desc.length, cur)?;
            let raw = cur.read_bytes(logical_len)?;
            let mut sub_cur = ReadCursor::new(raw.clone());
            let subfields = desc.ordered_subfields();
            let max_num = subfields.iter().map(|f| f.number).max().unwrap_or(0) as usize;
            let width = bitmap::bytes_needed(max_num).max(1);
            let bitmap_bytes = sub_cur.read_bytes(width)?;
            let present = bitmap::fields_present(&bitmap_bytes, 1);
            let mut map = BTreeMap::new();
            for number in present {
                let f = subfields
                    .iter()
                    .find(|f| f.number == number)
                    .ok_or_else(|| Error::unpack(format!("unknown subfield {number}"), &raw))?;
                map.insert(number, decode_field_full(f, &mut sub_cur)?);
            }
            Ok(FieldValue::Composite(map))
        }
        FieldType::Bitmap => Err(Error::unpack("bitmap fields are decoded by the message unpacker, not per-field", &[])),
        FieldType::String | FieldType::Numeric => {
            let logical_len = decode_prefix_len(desc.prefix, desc.length, cur)?;
            decode_scalar_content(desc, logical_len, cur)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::MessageSpec;

    fn test_spec() -> MessageSpec {
        let json = r#"{
            "name": "test",
            "fields": {
                "0": {"type": "numeric", "length": 4, "enc": "ASCII", "prefix": "fixed", "description": "MTI"},
                "1": {"type": "bitmap", "length": 8, "enc": "BINARY", "prefix": "fixed", "description": "Bitmap"},
                "2": {"type": "numeric", "length": 19, "enc": "ASCII", "prefix": "ll", "description": "PAN"},
                "11": {"type": "numeric", "length": 6, "enc": "ASCII", "prefix": "fixed", "description": "STAN"},
                "37": {"type": "numeric", "length": 12, "enc": "ASCII", "prefix": "fixed", "description": "RRN"},
                "70": {"type": "numeric", "length": 3, "enc": "ASCII", "prefix": "fixed", "description": "Network Management Code"}
            }
        }"#;
        MessageSpec::from_json_str(json).unwrap()
    }

    #[test]
    fn pack_unpack_roundtrip() {
        let spec = test_spec();
        let mut msg = Message::new("0800");
        msg.set(11, "000001");
        msg.set(37, "26123" .to_string() + "0000001");
        let bytes = pack(&msg, &spec).unwrap();
        let parsed = unpack(&bytes, &spec).unwrap();
        assert_eq!(parsed.mti, "0800");
        assert_eq!(parsed.get_str(11), Some("000001"));
    }

    #[test]
    fn secondary_bitmap_roundtrip() {
        let spec = test_spec();
        let mut msg = Message::new("0800");
        msg.set(11, "000002");
        msg.set(70, "301");
        let bytes = pack(&msg, &spec).unwrap();
        let parsed = unpack(&bytes, &spec).unwrap();
        assert_eq!(parsed.get_str(70), Some("301"));
    }

    #[test]
    fn unpack_short_buffer_is_unpack_error() {
        let spec = test_spec();
        let err = unpack(b"08", &spec).unwrap_err();
        assert!(matches!(err, Error::UnpackError { .. }));
    }
}
