//! Compact field-format strings such as `%i%f{2}%c{5}`.
//!
//! A format string is split on `%`; every non-blank segment is one field made of a
//! one-letter type code and an optional `{N}` length.

use crate::cursor::CursorError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Largest `{N}` accepted: CHAR width in bytes, FLOAT digits.
pub const MAX_FIELD_LENGTH: usize = 4096;

#[derive(Debug, Error)]
pub enum FormatError {
    #[error("unknown type code {code:?} in segment {segment:?}")]
    UnknownCode { segment: String, code: String },
    #[error("invalid length {text:?} in segment {segment:?}")]
    BadLength { segment: String, text: String },
    #[error("expected {expected} values, got {got}")]
    ArityMismatch { expected: usize, got: usize },
    #[error("value {value} does not fit field {field}")]
    ValueOutOfRange { field: FieldType, value: String },
    #[error("cannot write {value} into field {field}")]
    TypeMismatch { field: FieldType, value: String },
    #[error(transparent)]
    Cursor(#[from] CursorError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FieldType {
    Ubyte,
    Char,
    Byte,
    Short,
    Integer,
    Double,
    Float,
    Long,
}

impl FieldType {
    /// Map a type code. Codes are case-insensitive; `None` for anything unrecognised.
    pub fn from_code(code: &str) -> Option<Self> {
        match code.to_ascii_lowercase().as_str() {
            "u" => Some(Self::Ubyte),
            "c" => Some(Self::Char),
            "b" => Some(Self::Byte),
            "s" => Some(Self::Short),
            "i" => Some(Self::Integer),
            "d" => Some(Self::Double),
            "f" => Some(Self::Float),
            "l" => Some(Self::Long),
            _ => None,
        }
    }

    pub fn code(self) -> char {
        match self {
            Self::Ubyte => 'u',
            Self::Char => 'c',
            Self::Byte => 'b',
            Self::Short => 's',
            Self::Integer => 'i',
            Self::Double => 'd',
            Self::Float => 'f',
            Self::Long => 'l',
        }
    }

    /// Encoded width in bytes; `None` for CHAR, whose width depends on the field length.
    pub fn width(self) -> Option<usize> {
        match self {
            Self::Ubyte | Self::Byte => Some(1),
            Self::Short => Some(2),
            Self::Integer | Self::Float => Some(4),
            Self::Long | Self::Double => Some(8),
            Self::Char => None,
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Ubyte => "UBYTE",
            Self::Char => "CHAR",
            Self::Byte => "BYTE",
            Self::Short => "SHORT",
            Self::Integer => "INTEGER",
            Self::Double => "DOUBLE",
            Self::Float => "FLOAT",
            Self::Long => "LONG",
        };
        f.write_str(s)
    }
}

/// One typed field of a format string.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct FormatField {
    pub field_type: FieldType,
    length: Option<usize>,
}

impl FormatField {
    pub fn new(field_type: FieldType, length: Option<usize>) -> Self {
        Self { field_type, length }
    }

    /// Declared length, or -1 when unspecified.
    pub fn length(&self) -> i64 {
        self.length.map_or(-1, |n| n as i64)
    }

    pub fn declared_length(&self) -> Option<usize> {
        self.length
    }
}

impl fmt::Display for FormatField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.field_type, self.length())
    }
}

/// How to treat unknown type codes and malformed lengths.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseMode {
    /// Unknown codes become BYTE and bad lengths become unspecified.
    #[default]
    Lenient,
    /// Any anomaly is an error.
    Strict,
}

/// Ordered field list parsed from a format string. Immutable once built.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FormatSpec {
    source: String,
    fields: Vec<FormatField>,
}

impl FormatSpec {
    pub fn parse(format: &str) -> Self {
        // Lenient parsing never fails.
        Self::parse_with(format, ParseMode::Lenient).unwrap_or_else(|_| Self {
            source: format.to_string(),
            fields: Vec::new(),
        })
    }

    pub fn parse_with(format: &str, mode: ParseMode) -> Result<Self, FormatError> {
        let mut fields = Vec::new();
        for segment in format.split('%') {
            if segment.trim().is_empty() {
                continue;
            }
            fields.push(parse_segment(segment, mode)?);
        }
        Ok(Self {
            source: format.to_string(),
            fields,
        })
    }

    pub fn fields(&self) -> &[FormatField] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// The format string this spec was parsed from.
    pub fn as_str(&self) -> &str {
        &self.source
    }
}

impl FromStr for FormatSpec {
    type Err = FormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_with(s, ParseMode::Lenient)
    }
}

impl fmt::Display for FormatSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn parse_segment(segment: &str, mode: ParseMode) -> Result<FormatField, FormatError> {
    let (code, len_text) = match segment.find('{') {
        Some(open) => {
            let rest = &segment[open + 1..];
            let inner = rest.find('}').map_or(rest, |close| &rest[..close]);
            (&segment[..open], Some(inner))
        }
        None => (segment, None),
    };
    let code = code.trim();

    let field_type = match FieldType::from_code(code) {
        Some(t) => t,
        None if mode == ParseMode::Strict => {
            return Err(FormatError::UnknownCode {
                segment: segment.to_string(),
                code: code.to_string(),
            })
        }
        None => {
            tracing::warn!(segment, code, "unknown format code, decoding as BYTE");
            FieldType::Byte
        }
    };

    let length = match len_text.map(|t| t.trim().parse::<i64>()) {
        None | Some(Ok(-1)) => None,
        Some(Ok(n)) if (0..=MAX_FIELD_LENGTH as i64).contains(&n) => Some(n as usize),
        Some(_) if mode == ParseMode::Strict => {
            return Err(FormatError::BadLength {
                segment: segment.to_string(),
                text: len_text.unwrap_or_default().to_string(),
            })
        }
        Some(_) => {
            let text = len_text.unwrap_or_default();
            tracing::warn!(segment, text, "invalid field length, leaving unspecified");
            None
        }
    };

    Ok(FormatField::new(field_type, length))
}

/// Binds a decoded value to its datapool key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParseInfo {
    pub datapool_key: String,
    pub receive_format: FormatSpec,
}

impl ParseInfo {
    pub fn new(datapool_key: impl Into<String>, receive_format: FormatSpec) -> Self {
        Self {
            datapool_key: datapool_key.into(),
            receive_format,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mixed_fields() {
        let spec = FormatSpec::parse("%i%f{2}%c{5}");
        let f = spec.fields();
        assert_eq!(f.len(), 3);
        assert_eq!(f[0], FormatField::new(FieldType::Integer, None));
        assert_eq!(f[1], FormatField::new(FieldType::Float, Some(2)));
        assert_eq!(f[2], FormatField::new(FieldType::Char, Some(5)));
        assert_eq!(f[0].length(), -1);
        assert_eq!(spec.as_str(), "%i%f{2}%c{5}");
    }

    #[test]
    fn test_unknown_code_falls_back_to_byte() {
        let spec = FormatSpec::parse("%z");
        assert_eq!(spec.fields(), &[FormatField::new(FieldType::Byte, None)]);
    }

    #[test]
    fn test_codes_are_case_insensitive() {
        let spec = FormatSpec::parse("%U%C%B%S%I%D%F%L");
        let types: Vec<_> = spec.fields().iter().map(|f| f.field_type).collect();
        assert_eq!(
            types,
            vec![
                FieldType::Ubyte,
                FieldType::Char,
                FieldType::Byte,
                FieldType::Short,
                FieldType::Integer,
                FieldType::Double,
                FieldType::Float,
                FieldType::Long,
            ]
        );
    }

    #[test]
    fn test_malformed_length_keeps_field_and_continues() {
        let spec = FormatSpec::parse("%c{x}%s%f{3}");
        assert_eq!(spec.len(), 3);
        assert_eq!(spec.fields()[0], FormatField::new(FieldType::Char, None));
        assert_eq!(spec.fields()[1].field_type, FieldType::Short);
        assert_eq!(spec.fields()[2].length(), 3);
    }

    #[test]
    fn test_blank_segments_ignored() {
        let spec = FormatSpec::parse("%%i% %d%");
        assert_eq!(spec.len(), 2);
        assert!(FormatSpec::parse("").is_empty());
    }

    #[test]
    fn test_strict_mode_rejects_anomalies() {
        assert!(matches!(
            FormatSpec::parse_with("%i%q", ParseMode::Strict),
            Err(FormatError::UnknownCode { .. })
        ));
        assert!(matches!(
            FormatSpec::parse_with("%c{five}", ParseMode::Strict),
            Err(FormatError::BadLength { .. })
        ));
        assert!(FormatSpec::parse_with("%i%f{2}", ParseMode::Strict).is_ok());
        assert!(matches!(
            FormatSpec::parse_with("%c{4097}", ParseMode::Strict),
            Err(FormatError::BadLength { .. })
        ));
    }

    #[test]
    fn test_minus_one_means_unspecified() {
        let spec = FormatSpec::parse_with("%c{-1}%f{ -1 }", ParseMode::Strict).unwrap();
        assert_eq!(spec.fields()[0], FormatField::new(FieldType::Char, None));
        assert_eq!(spec.fields()[1].length(), -1);
        assert!(matches!(
            FormatSpec::parse_with("%c{-2}", ParseMode::Strict),
            Err(FormatError::BadLength { .. })
        ));
    }

    #[test]
    fn test_oversized_length_is_unspecified_when_lenient() {
        let spec = FormatSpec::parse("%c{18446744073709551615}%c{4096}");
        assert_eq!(spec.fields()[0].declared_length(), None);
        assert_eq!(spec.fields()[1].declared_length(), Some(MAX_FIELD_LENGTH));
    }

    #[test]
    fn test_display() {
        let spec = FormatSpec::parse("%i%f{2}");
        let shown: Vec<String> = spec.fields().iter().map(|f| f.to_string()).collect();
        assert_eq!(shown, vec!["INTEGER(-1)", "FLOAT(2)"]);
    }
}
