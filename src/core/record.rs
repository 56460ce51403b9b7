//! Purpose: Decode raw packed key/value tuples into typed records using a `FieldSchema`.
//! Exports: `Value`, `DecodedRecord`, `decode`, `render_bytes`.
//! Role: Single source of truth for binary-safe text rendering across all sinks.
//! Invariants: Decoding consumes the buffer exactly; short or long buffers are `Format` errors.
//! Invariants: Integers are fixed-width little endian; text falls back to lowercase hex.

use bstr::ByteSlice;
use serde::ser::{Serialize, SerializeMap, Serializer};

use crate::core::error::{Error, ErrorKind};
use crate::core::format::{Field, FieldCode, FieldSchema};

const LENGTH_PREFIX: usize = 4;

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Value {
    Int(i64),
    Uint(u64),
    Text(String),
    /// Hex encoding of bytes that were not valid UTF-8.
    Hex(String),
}

impl Value {
    pub fn is_hex_fallback(&self) -> bool {
        matches!(self, Value::Hex(_))
    }

    /// Textual form used by row-oriented sinks.
    pub fn to_text(&self) -> String {
        match self {
            Value::Int(value) => value.to_string(),
            Value::Uint(value) => value.to_string(),
            Value::Text(text) | Value::Hex(text) => text.clone(),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Int(value) => serializer.serialize_i64(*value),
            Value::Uint(value) => serializer.serialize_u64(*value),
            Value::Text(text) | Value::Hex(text) => serializer.serialize_str(text),
        }
    }
}

/// UTF-8 when possible, otherwise the exact hex encoding of `bytes`.
pub fn render_bytes(bytes: &[u8]) -> Value {
    match bytes.to_str() {
        Ok(text) => Value::Text(text.to_string()),
        Err(_) => Value::Hex(hex::encode(bytes)),
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct DecodedRecord {
    fields: Vec<(String, Value)>,
    hex_fallback: bool,
}

impl DecodedRecord {
    pub fn fields(&self) -> &[(String, Value)] {
        &self.fields
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// True when at least one field was rendered through the hex fallback.
    pub fn has_hex_fallback(&self) -> bool {
        self.hex_fallback
    }

    fn push(&mut self, name: &str, value: Value) {
        self.hex_fallback |= value.is_hex_fallback();
        self.fields.push((name.to_string(), value));
    }
}

// Single-field records serialize as the bare scalar.
impl Serialize for DecodedRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if let [(_, value)] = self.fields.as_slice() {
            return value.serialize(serializer);
        }
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (name, value) in &self.fields {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

pub fn decode(schema: &FieldSchema, raw: &[u8]) -> Result<DecodedRecord, Error> {
    if let Some(expected) = schema.fixed_width() {
        if raw.len() < expected {
            return Err(format_error(format!(
                "truncated record: {} bytes, schema {} needs {expected}",
                raw.len(),
                schema.to_format_string()
            )));
        }
        if raw.len() > expected {
            return Err(format_error(format!(
                "record is {} bytes, schema {} declares {expected}",
                raw.len(),
                schema.to_format_string()
            )));
        }
    }

    let mut record = DecodedRecord::default();
    let mut pos = 0usize;
    let last = schema.fields().len() - 1;

    for (idx, field) in schema.fields().iter().enumerate() {
        let rest = &raw[pos..];
        match field.code {
            FieldCode::Pad => {
                take(field, rest, pos, field.width.unwrap_or(1))?;
                pos += field.width.unwrap_or(1);
            }
            FieldCode::CString => {
                let end = rest.find_byte(0).ok_or_else(|| {
                    format_error(format!(
                        "truncated record: field {} has no NUL terminator at offset {pos}",
                        field.name
                    ))
                })?;
                record.push(&field.name, render_bytes(&rest[..end]));
                pos += end + 1;
            }
            FieldCode::FixedBytes => {
                let width = field.width.unwrap_or(1);
                let bytes = take(field, rest, pos, width)?;
                record.push(&field.name, render_fixed(bytes));
                pos += width;
            }
            FieldCode::Bytes if idx == last => {
                record.push(&field.name, render_bytes(rest));
                pos = raw.len();
            }
            FieldCode::Bytes => {
                let prefix = take(field, rest, pos, LENGTH_PREFIX)?;
                let mut len = [0u8; LENGTH_PREFIX];
                len.copy_from_slice(prefix);
                let len = u32::from_le_bytes(len) as usize;
                let bytes = take(field, &rest[LENGTH_PREFIX..], pos + LENGTH_PREFIX, len)?;
                record.push(&field.name, render_bytes(bytes));
                pos += LENGTH_PREFIX + len;
            }
            code => {
                let width = code.int_width().unwrap_or(8);
                let bytes = take(field, rest, pos, width)?;
                record.push(&field.name, read_int(bytes, code.is_signed()));
                pos += width;
            }
        }
    }

    if pos != raw.len() {
        return Err(format_error(format!(
            "{} trailing bytes after schema {}",
            raw.len() - pos,
            schema.to_format_string()
        )));
    }
    Ok(record)
}

// NUL padding is trimmed from text only; the hex fallback covers every stored byte.
fn render_fixed(bytes: &[u8]) -> Value {
    let end = bytes.iter().rposition(|&byte| byte != 0).map_or(0, |idx| idx + 1);
    match render_bytes(&bytes[..end]) {
        Value::Hex(_) => render_bytes(bytes),
        text => text,
    }
}

fn take<'a>(field: &Field, rest: &'a [u8], pos: usize, width: usize) -> Result<&'a [u8], Error> {
    rest.get(..width).ok_or_else(|| {
        format_error(format!(
            "truncated record: field {} ({}) needs {width} bytes at offset {pos}, {} remain",
            if field.is_pad() { "pad" } else { field.name.as_str() },
            field.code.as_char(),
            rest.len()
        ))
    })
}

fn read_int(bytes: &[u8], signed: bool) -> Value {
    let mut padded = [0u8; 8];
    padded[..bytes.len()].copy_from_slice(bytes);
    if signed {
        if bytes.last().is_some_and(|byte| byte & 0x80 != 0) {
            padded[bytes.len()..].fill(0xFF);
        }
        Value::Int(i64::from_le_bytes(padded))
    } else {
        Value::Uint(u64::from_le_bytes(padded))
    }
}

fn format_error(message: String) -> Error {
    Error::new(ErrorKind::Format).with_message(message)
}

#[cfg(test)]
mod tests {
    use super::{Value, decode, render_bytes};
    use crate::core::error::ErrorKind;
    use crate::core::format::parse;
    use serde_json::json;

    #[test]
    fn decodes_signed_and_unsigned_integers() {
        let schema = parse("bBhHiIqQr").expect("schema");
        let mut raw = Vec::new();
        raw.extend_from_slice(&(-2i8).to_le_bytes());
        raw.extend_from_slice(&200u8.to_le_bytes());
        raw.extend_from_slice(&(-300i16).to_le_bytes());
        raw.extend_from_slice(&60000u16.to_le_bytes());
        raw.extend_from_slice(&(-70000i32).to_le_bytes());
        raw.extend_from_slice(&4_000_000_000u32.to_le_bytes());
        raw.extend_from_slice(&i64::MIN.to_le_bytes());
        raw.extend_from_slice(&u64::MAX.to_le_bytes());
        raw.extend_from_slice(&42u64.to_le_bytes());

        let record = decode(&schema, &raw).expect("decode");
        let values = record.fields().iter().map(|(_, v)| v.clone()).collect::<Vec<_>>();
        assert_eq!(
            values,
            vec![
                Value::Int(-2),
                Value::Uint(200),
                Value::Int(-300),
                Value::Uint(60000),
                Value::Int(-70000),
                Value::Uint(4_000_000_000),
                Value::Int(i64::MIN),
                Value::Uint(u64::MAX),
                Value::Uint(42),
            ]
        );
    }

    #[test]
    fn exact_width_consumes_everything_and_short_fails() {
        let schema = parse("qI2s").expect("schema");
        let raw = [1u8; 14];
        assert_eq!(decode(&schema, &raw).expect("decode").len(), 3);

        for cut in 0..raw.len() {
            let err = decode(&schema, &raw[..cut]).expect_err("short buffer");
            assert_eq!(err.kind(), ErrorKind::Format);
            assert!(err.message().expect("message").contains("truncated"));
        }
    }

    #[test]
    fn oversized_buffer_is_rejected() {
        let schema = parse("i").expect("schema");
        let err = decode(&schema, &[0, 0, 0, 0, 0]).expect_err("long buffer");
        assert_eq!(err.kind(), ErrorKind::Format);
    }

    #[test]
    fn cstring_requires_terminator() {
        let schema = parse("S").expect("schema");
        let record = decode(&schema, b"hello\0").expect("decode");
        assert_eq!(record.get("0"), Some(&Value::Text("hello".to_string())));

        let err = decode(&schema, b"hello").expect_err("no nul");
        assert_eq!(err.kind(), ErrorKind::Format);
    }

    #[test]
    fn variable_fields_report_trailing_bytes() {
        let schema = parse("S").expect("schema");
        let err = decode(&schema, b"a\0b").expect_err("trailing");
        assert!(err.message().expect("message").contains("1 trailing bytes"));
    }

    #[test]
    fn fixed_string_trims_nul_padding() {
        let schema = parse("4sq").expect("schema");
        let mut raw = b"ab\0\0".to_vec();
        raw.extend_from_slice(&7i64.to_le_bytes());
        let record = decode(&schema, &raw).expect("decode");
        assert_eq!(record.get("0"), Some(&Value::Text("ab".to_string())));
        assert_eq!(record.get("1"), Some(&Value::Int(7)));
    }

    #[test]
    fn fixed_string_hex_keeps_padding() {
        let raw = [0xff, 0x41, 0x00, 0x00];
        let record = decode(&parse("4s").expect("schema"), &raw).expect("decode");
        assert!(record.has_hex_fallback());
        let value = record.get("0").expect("field");
        assert_eq!(value, &Value::Hex("ff410000".to_string()));
        assert_eq!(hex::decode(value.to_text()).expect("hex"), raw.to_vec());
    }

    #[test]
    fn pad_bytes_are_skipped() {
        let schema = parse("B3xB").expect("schema");
        let record = decode(&schema, &[1, 9, 9, 9, 2]).expect("decode");
        assert_eq!(record.len(), 2);
        assert_eq!(record.get("1"), Some(&Value::Uint(2)));
    }

    #[test]
    fn inner_raw_bytes_are_length_prefixed() {
        let schema = parse("uu").expect("schema");
        let mut raw = 3u32.to_le_bytes().to_vec();
        raw.extend_from_slice(b"abc");
        raw.extend_from_slice(b"tail");
        let record = decode(&schema, &raw).expect("decode");
        assert_eq!(record.get("0"), Some(&Value::Text("abc".to_string())));
        assert_eq!(record.get("1"), Some(&Value::Text("tail".to_string())));

        let err = decode(&schema, &[9, 0, 0, 0, b'x']).expect_err("short prefix body");
        assert_eq!(err.kind(), ErrorKind::Format);
    }

    #[test]
    fn opaque_record_holds_raw_bytes() {
        let schema = parse("u").expect("schema");
        let record = decode(&schema, b"").expect("empty value");
        assert_eq!(record.get("raw"), Some(&Value::Text(String::new())));
    }

    #[test]
    fn invalid_utf8_falls_back_to_hex() {
        let bytes = [0xff, 0x00, 0x41, 0xc3];
        let schema = parse("u").expect("schema");
        let record = decode(&schema, &bytes).expect("decode");
        assert!(record.has_hex_fallback());
        let value = record.get("raw").expect("raw");
        assert_eq!(value, &Value::Hex("ff0041c3".to_string()));
        assert_eq!(hex::decode(value.to_text()).expect("hex"), bytes.to_vec());
    }

    #[test]
    fn valid_utf8_is_verbatim() {
        let text = "caf\u{e9} \u{1f600}";
        assert_eq!(render_bytes(text.as_bytes()), Value::Text(text.to_string()));
    }

    #[test]
    fn single_field_serializes_as_scalar() {
        let key = decode(&parse("q").expect("schema"), &5i64.to_le_bytes()).expect("key");
        assert_eq!(serde_json::to_value(&key).expect("json"), json!(5));

        let pair = decode(&parse("BS").expect("schema"), b"\x01x\0").expect("pair");
        let text = serde_json::to_string(&pair).expect("json");
        assert_eq!(text, r#"{"0":1,"1":"x"}"#);
    }
}
