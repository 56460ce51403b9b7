//! Purpose: Parse engine format descriptors (`key_format=`, `value_format=`) into typed schemas.
//! Exports: `FieldCode`, `Field`, `FieldSchema`, `TableLayout`, `parse`.
//! Role: Pure function layer; no I/O. Feeds the record decoder.
//! Invariants: Unknown codes are a hard stop; field alignment is never guessed.
//! Invariants: `parse(s).to_format_string()` parses back to an equal schema.

use crate::core::error::{Error, ErrorKind};

/// Field name used for the single field of an opaque (`u`) schema.
pub const OPAQUE_FIELD: &str = "raw";

const MAX_REPEAT: usize = 1 << 16;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum FieldCode {
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    RecordNumber,
    CString,
    FixedBytes,
    Bytes,
    Pad,
}

impl FieldCode {
    fn from_char(ch: char) -> Option<Self> {
        let code = match ch {
            'b' => FieldCode::Int8,
            'B' => FieldCode::UInt8,
            'h' => FieldCode::Int16,
            'H' => FieldCode::UInt16,
            'i' | 'l' => FieldCode::Int32,
            'I' | 'L' => FieldCode::UInt32,
            'q' => FieldCode::Int64,
            'Q' => FieldCode::UInt64,
            'r' => FieldCode::RecordNumber,
            'S' => FieldCode::CString,
            's' => FieldCode::FixedBytes,
            'u' => FieldCode::Bytes,
            'x' => FieldCode::Pad,
            _ => return None,
        };
        Some(code)
    }

    /// Canonical code character. `l`/`L` canonicalize to `i`/`I`.
    pub fn as_char(self) -> char {
        match self {
            FieldCode::Int8 => 'b',
            FieldCode::UInt8 => 'B',
            FieldCode::Int16 => 'h',
            FieldCode::UInt16 => 'H',
            FieldCode::Int32 => 'i',
            FieldCode::UInt32 => 'I',
            FieldCode::Int64 => 'q',
            FieldCode::UInt64 => 'Q',
            FieldCode::RecordNumber => 'r',
            FieldCode::CString => 'S',
            FieldCode::FixedBytes => 's',
            FieldCode::Bytes => 'u',
            FieldCode::Pad => 'x',
        }
    }

    /// Byte width of integer codes.
    pub fn int_width(self) -> Option<usize> {
        match self {
            FieldCode::Int8 | FieldCode::UInt8 => Some(1),
            FieldCode::Int16 | FieldCode::UInt16 => Some(2),
            FieldCode::Int32 | FieldCode::UInt32 => Some(4),
            FieldCode::Int64 | FieldCode::UInt64 | FieldCode::RecordNumber => Some(8),
            _ => None,
        }
    }

    pub fn is_signed(self) -> bool {
        matches!(
            self,
            FieldCode::Int8 | FieldCode::Int16 | FieldCode::Int32 | FieldCode::Int64
        )
    }

    /// Codes whose count prefix is a byte length rather than a repeat count.
    fn count_is_width(self) -> bool {
        matches!(self, FieldCode::FixedBytes | FieldCode::Pad)
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Field {
    pub name: String,
    pub code: FieldCode,
    /// Byte width for fixed-width codes; `None` for `S` and `u`.
    pub width: Option<usize>,
}

impl Field {
    pub fn is_pad(&self) -> bool {
        self.code == FieldCode::Pad
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FieldSchema {
    fields: Vec<Field>,
}

impl FieldSchema {
    /// All fields in declaration order, pad fields included.
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Fields that produce a value in a decoded record.
    pub fn value_fields(&self) -> impl Iterator<Item = &Field> {
        self.fields.iter().filter(|field| !field.is_pad())
    }

    pub fn value_field_count(&self) -> usize {
        self.value_fields().count()
    }

    pub fn is_opaque(&self) -> bool {
        self.fields.len() == 1 && self.fields[0].code == FieldCode::Bytes
    }

    /// Sum of widths when every field is fixed-width.
    pub fn fixed_width(&self) -> Option<usize> {
        self.fields
            .iter()
            .try_fold(0usize, |acc, field| field.width.map(|width| acc + width))
    }

    pub fn names(&self) -> Vec<&str> {
        self.value_fields().map(|field| field.name.as_str()).collect()
    }

    fn rename(&mut self, names: &[String]) {
        let targets = self.fields.iter_mut().filter(|field| !field.is_pad());
        for (field, name) in targets.zip(names) {
            field.name = name.clone();
        }
    }

    pub fn to_format_string(&self) -> String {
        let mut out = String::new();
        let mut idx = 0;
        while idx < self.fields.len() {
            let field = &self.fields[idx];
            match field.code {
                FieldCode::FixedBytes => {
                    push_count(&mut out, field.width.unwrap_or(1));
                    out.push('s');
                    idx += 1;
                }
                FieldCode::Pad => {
                    let mut total = 0;
                    while idx < self.fields.len() && self.fields[idx].is_pad() {
                        total += self.fields[idx].width.unwrap_or(1);
                        idx += 1;
                    }
                    push_count(&mut out, total);
                    out.push('x');
                }
                code => {
                    let mut run = 0;
                    while idx < self.fields.len() && self.fields[idx].code == code {
                        run += 1;
                        idx += 1;
                    }
                    push_count(&mut out, run);
                    out.push(code.as_char());
                }
            }
        }
        out
    }
}

fn push_count(out: &mut String, count: usize) {
    if count != 1 {
        out.push_str(&count.to_string());
    }
}

pub fn parse(format: &str) -> Result<FieldSchema, Error> {
    let mut fields: Vec<Field> = Vec::new();
    let mut chars = format.char_indices();

    while let Some((start, ch)) = chars.next() {
        if ch.is_whitespace() {
            continue;
        }

        let mut count: Option<usize> = None;
        let mut code_char = ch;
        if ch.is_ascii_digit() {
            let mut value = ch.to_digit(10).unwrap_or(0) as usize;
            loop {
                match chars.next() {
                    Some((_, digit)) if digit.is_ascii_digit() => {
                        value = value
                            .checked_mul(10)
                            .and_then(|v| v.checked_add(digit.to_digit(10).unwrap_or(0) as usize))
                            .ok_or_else(|| {
                                token_error(format, start, "repeat count overflows")
                            })?;
                    }
                    Some((_, next)) => {
                        code_char = next;
                        break;
                    }
                    None => {
                        return Err(token_error(format, start, "repeat count without a type code"));
                    }
                }
            }
            count = Some(value);
        }

        let code = FieldCode::from_char(code_char)
            .ok_or_else(|| token_error(format, start, "unrecognized type code"))?;
        let count = count.unwrap_or(1);
        if count == 0 {
            return Err(token_error(format, start, "repeat count must be positive"));
        }

        if code.count_is_width() {
            if code == FieldCode::Pad {
                if let Some(last) = fields.last_mut().filter(|field| field.is_pad()) {
                    last.width = last.width.map(|width| width + count);
                    continue;
                }
            }
            fields.push(Field {
                name: String::new(),
                code,
                width: Some(count),
            });
            continue;
        }

        if fields.len() + count > MAX_REPEAT {
            return Err(token_error(format, start, "too many fields"));
        }
        for _ in 0..count {
            fields.push(Field {
                name: String::new(),
                code,
                width: code.int_width(),
            });
        }
    }

    if fields.is_empty() {
        return Err(Error::new(ErrorKind::Format)
            .with_message(format!("empty format descriptor {format:?}")));
    }

    let mut schema = FieldSchema { fields };
    let positional = (0..schema.value_field_count())
        .map(|idx| idx.to_string())
        .collect::<Vec<_>>();
    schema.rename(&positional);
    if schema.is_opaque() {
        schema.rename(&[OPAQUE_FIELD.to_string()]);
    }
    Ok(schema)
}

fn token_error(format: &str, start: usize, reason: &str) -> Error {
    let token: String = format[start..]
        .chars()
        .take_while(|ch| !ch.is_whitespace())
        .scan(false, |seen_code, ch| {
            if *seen_code {
                return None;
            }
            if !ch.is_ascii_digit() {
                *seen_code = true;
            }
            Some(ch)
        })
        .collect();
    Error::new(ErrorKind::Format).with_message(format!(
        "{reason}: token {token:?} at offset {start} in format {format:?}"
    ))
}

/// Key and value schemas for one table, named from `columns=` when it fits.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TableLayout {
    pub key: FieldSchema,
    pub value: FieldSchema,
}

impl TableLayout {
    pub fn parse(
        key_format: &str,
        value_format: &str,
        columns: Option<&[String]>,
    ) -> Result<Self, Error> {
        let mut key = parse(key_format).map_err(|err| prefix_message(err, "key_format"))?;
        let mut value = parse(value_format).map_err(|err| prefix_message(err, "value_format"))?;

        if let Some(columns) = columns {
            let key_count = key.value_field_count();
            if columns.len() == key_count + value.value_field_count() {
                key.rename(&columns[..key_count]);
                value.rename(&columns[key_count..]);
            }
        }
        Ok(Self { key, value })
    }
}

fn prefix_message(err: Error, label: &str) -> Error {
    let message = format!("{label}: {}", err.message().unwrap_or("invalid"));
    err.with_message(message)
}

#[cfg(test)]
mod tests {
    use super::{FieldCode, OPAQUE_FIELD, TableLayout, parse};
    use crate::core::error::ErrorKind;

    #[test]
    fn parses_bare_and_repeated_codes() {
        let schema = parse("q3HS").expect("parse");
        let codes = schema.fields().iter().map(|f| f.code).collect::<Vec<_>>();
        assert_eq!(
            codes,
            vec![
                FieldCode::Int64,
                FieldCode::UInt16,
                FieldCode::UInt16,
                FieldCode::UInt16,
                FieldCode::CString,
            ]
        );
        assert_eq!(schema.names(), vec!["0", "1", "2", "3", "4"]);
        assert_eq!(schema.fields()[0].width, Some(8));
        assert_eq!(schema.fields()[4].width, None);
    }

    #[test]
    fn fixed_string_count_is_a_width() {
        let schema = parse("10s").expect("parse");
        assert_eq!(schema.fields().len(), 1);
        assert_eq!(schema.fields()[0].width, Some(10));
        assert_eq!(schema.fixed_width(), Some(10));
    }

    #[test]
    fn pad_bytes_produce_no_field_name() {
        let schema = parse("i2xq").expect("parse");
        assert_eq!(schema.value_field_count(), 2);
        assert_eq!(schema.names(), vec!["0", "1"]);
        assert_eq!(schema.fixed_width(), Some(14));
    }

    #[test]
    fn variable_width_schema_has_no_fixed_width() {
        assert_eq!(parse("qS").expect("parse").fixed_width(), None);
        assert_eq!(parse("Qr").expect("parse").fixed_width(), Some(16));
    }

    #[test]
    fn opaque_schema_uses_canonical_name() {
        let schema = parse("u").expect("parse");
        assert!(schema.is_opaque());
        assert_eq!(schema.names(), vec![OPAQUE_FIELD]);
        assert!(!parse("uu").expect("parse").is_opaque());
    }

    #[test]
    fn unknown_code_names_the_token() {
        let err = parse("q12z").expect_err("unknown code");
        assert_eq!(err.kind(), ErrorKind::Format);
        let message = err.message().expect("message");
        assert!(message.contains("\"12z\""), "{message}");
        assert!(message.contains("offset 1"), "{message}");
    }

    #[test]
    fn composite_and_bitfield_codes_are_rejected() {
        for format in ["t", "q(S)", "5t"] {
            let err = parse(format).expect_err(format);
            assert_eq!(err.kind(), ErrorKind::Format);
        }
    }

    #[test]
    fn degenerate_inputs_are_rejected() {
        for format in ["", "   ", "0q", "12", "99999999999999999999999q", "70000q"] {
            let err = parse(format).expect_err(format);
            assert_eq!(err.kind(), ErrorKind::Format, "{format}");
        }
    }

    #[test]
    fn canonical_format_reparses_to_same_schema() {
        let inputs = ["qqq", "lLS", "3s2s", "xxq2x", "r", "u", "BbhHiIqQSu", " q  S "];
        for input in inputs {
            let schema = parse(input).expect(input);
            let canonical = schema.to_format_string();
            let reparsed = parse(&canonical).expect(&canonical);
            assert_eq!(schema, reparsed, "{input} -> {canonical}");
        }
        assert_eq!(parse("qqq").expect("parse").to_format_string(), "3q");
        assert_eq!(parse("lL").expect("parse").to_format_string(), "iI");
        assert_eq!(parse("1s").expect("parse").to_format_string(), "s");
    }

    #[test]
    fn columns_name_key_then_value_fields() {
        let columns = vec!["id".to_string(), "name".to_string(), "age".to_string()];
        let layout = TableLayout::parse("q", "SI", Some(&columns)).expect("layout");
        assert_eq!(layout.key.names(), vec!["id"]);
        assert_eq!(layout.value.names(), vec!["name", "age"]);
    }

    #[test]
    fn mismatched_columns_are_ignored() {
        let columns = vec!["id".to_string()];
        let layout = TableLayout::parse("q", "SI", Some(&columns)).expect("layout");
        assert_eq!(layout.key.names(), vec!["0"]);
        assert_eq!(layout.value.names(), vec!["0", "1"]);
    }

    #[test]
    fn layout_errors_name_the_side() {
        let err = TableLayout::parse("q", "Z", None).expect_err("bad value format");
        assert!(err.message().expect("message").starts_with("value_format:"));
    }
}
