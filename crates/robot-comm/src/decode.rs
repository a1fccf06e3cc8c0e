use crate::cursor::ByteCursor;
use crate::format::{FieldType, FormatError, FormatField, FormatSpec};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Read;

/// One decoded field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    UByte(u8),
    Byte(i8),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f64),
    Double(f64),
    Text(String),
}

impl FieldValue {
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Self::UByte(v) => Some(f64::from(v)),
            Self::Byte(v) => Some(f64::from(v)),
            Self::Short(v) => Some(f64::from(v)),
            Self::Int(v) => Some(f64::from(v)),
            Self::Long(v) => Some(v as f64),
            Self::Float(v) | Self::Double(v) => Some(v),
            Self::Text(_) => None,
        }
    }

    /// Integer view; floating values are accepted only when integral.
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Self::UByte(v) => Some(i64::from(v)),
            Self::Byte(v) => Some(i64::from(v)),
            Self::Short(v) => Some(i64::from(v)),
            Self::Int(v) => Some(i64::from(v)),
            Self::Long(v) => Some(v),
            Self::Float(v) | Self::Double(v) if v.fract() == 0.0 => Some(v as i64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UByte(v) => write!(f, "{v}"),
            Self::Byte(v) => write!(f, "{v}"),
            Self::Short(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Long(v) => write!(f, "{v}"),
            Self::Float(v) | Self::Double(v) => write!(f, "{v}"),
            Self::Text(s) => write!(f, "{s:?}"),
        }
    }
}

/// Result of decoding a whole spec: a bare value for single-field specs, a sequence
/// otherwise. Callers configuring single-value data points rely on the scalar form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DecodedValue {
    Scalar(FieldValue),
    Sequence(Vec<FieldValue>),
}

impl DecodedValue {
    pub fn as_scalar(&self) -> Option<&FieldValue> {
        match self {
            Self::Scalar(v) => Some(v),
            Self::Sequence(_) => None,
        }
    }

    /// All values in field order.
    pub fn values(&self) -> &[FieldValue] {
        match self {
            Self::Scalar(v) => std::slice::from_ref(v),
            Self::Sequence(vs) => vs,
        }
    }
}

impl FormatSpec {
    /// Consume one value per field, in declaration order.
    pub fn decode<R: Read>(&self, cursor: &mut ByteCursor<R>) -> Result<DecodedValue, FormatError> {
        let mut values = Vec::with_capacity(self.len());
        for field in self.fields() {
            values.push(decode_field(field, cursor)?);
        }
        if values.len() == 1 {
            if let Some(v) = values.pop() {
                return Ok(DecodedValue::Scalar(v));
            }
        }
        Ok(DecodedValue::Sequence(values))
    }

    /// Decode from a byte slice, ignoring trailing bytes.
    pub fn decode_bytes(
        &self,
        data: &[u8],
        order: crate::cursor::ByteOrder,
    ) -> Result<DecodedValue, FormatError> {
        let mut cursor = ByteCursor::with_order(data, order);
        self.decode(&mut cursor)
    }
}

fn decode_field<R: Read>(
    field: &FormatField,
    cursor: &mut ByteCursor<R>,
) -> Result<FieldValue, FormatError> {
    let v = match field.field_type {
        FieldType::Ubyte => FieldValue::UByte(cursor.next_u8()?),
        FieldType::Byte => FieldValue::Byte(cursor.next_i8()?),
        FieldType::Short => FieldValue::Short(cursor.next_i16()?),
        FieldType::Integer => FieldValue::Int(cursor.next_i32()?),
        FieldType::Long => FieldValue::Long(cursor.next_i64()?),
        FieldType::Double => FieldValue::Double(cursor.next_f64()?),
        FieldType::Char => match field.declared_length() {
            Some(n) => FieldValue::Text(cursor.next_chars(n)?),
            None => FieldValue::Text(cursor.next_string()?),
        },
        FieldType::Float => {
            let raw = cursor.next_f32()?;
            match field.declared_length() {
                Some(digits) => FieldValue::Float(round_fixed(f64::from(raw), digits)),
                None => FieldValue::Float(f64::from(raw)),
            }
        }
    };
    Ok(v)
}

/// Round through a fixed-point decimal rendering. Rust formatting ignores locale, so
/// the result is the same on every host.
pub(crate) fn round_fixed(v: f64, digits: usize) -> f64 {
    // An f64 carries at most 17 significant decimal digits.
    if !v.is_finite() || digits > 17 {
        return v;
    }
    format!("{v:.digits$}").parse::<f64>().unwrap_or(v)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cursor::ByteOrder;

    #[test]
    fn test_single_field_is_scalar() {
        let spec = FormatSpec::parse("%i");
        let out = spec.decode_bytes(&7i32.to_be_bytes(), ByteOrder::Big).unwrap();
        assert_eq!(out, DecodedValue::Scalar(FieldValue::Int(7)));
    }

    #[test]
    fn test_multi_field_is_sequence() {
        let spec = FormatSpec::parse("%u%b%s");
        let data = [0xFF, 0xFF, 0x00, 0x10];
        let out = spec.decode_bytes(&data, ByteOrder::Big).unwrap();
        assert_eq!(
            out,
            DecodedValue::Sequence(vec![
                FieldValue::UByte(255),
                FieldValue::Byte(-1),
                FieldValue::Short(16),
            ])
        );
        assert_eq!(out.values().len(), 3);
    }

    #[test]
    fn test_float_rounding() {
        let spec = FormatSpec::parse("%f{2}");
        let out = spec
            .decode_bytes(&3.14159f32.to_be_bytes(), ByteOrder::Big)
            .unwrap();
        let v = out.as_scalar().and_then(FieldValue::as_f64).unwrap();
        assert!((v - 3.14).abs() < 1e-9, "got {v}");
    }

    #[test]
    fn test_float_without_length_is_not_rounded() {
        let spec = FormatSpec::parse("%f");
        let out = spec
            .decode_bytes(&3.14159f32.to_be_bytes(), ByteOrder::Big)
            .unwrap();
        assert_eq!(
            out,
            DecodedValue::Scalar(FieldValue::Float(f64::from(3.14159f32)))
        );
    }

    #[test]
    fn test_char_fixed_and_terminated() {
        let spec = FormatSpec::parse("%c{3}%c%u");
        let data = b"abcxyz\0\x05";
        let out = spec.decode_bytes(data, ByteOrder::Big).unwrap();
        assert_eq!(
            out.values(),
            &[
                FieldValue::Text("abc".into()),
                FieldValue::Text("xyz".into()),
                FieldValue::UByte(5),
            ]
        );
    }

    #[test]
    fn test_decode_is_sequential_on_cursor() {
        let spec = FormatSpec::parse("%s");
        let data = [0x00, 0x01, 0x00, 0x02];
        let mut cursor = ByteCursor::new(&data[..]);
        let a = spec.decode(&mut cursor).unwrap();
        let b = spec.decode(&mut cursor).unwrap();
        assert_eq!(a, DecodedValue::Scalar(FieldValue::Short(1)));
        assert_eq!(b, DecodedValue::Scalar(FieldValue::Short(2)));
        assert!(spec.decode(&mut cursor).is_err());
    }

    #[test]
    fn test_huge_lengths_do_not_panic() {
        let lenient = FormatSpec::parse("%c{18446744073709551615}");
        assert_eq!(
            lenient.decode_bytes(b"ab\0", ByteOrder::Big).unwrap(),
            DecodedValue::Scalar(FieldValue::Text("ab".into()))
        );
        assert_eq!(round_fixed(1.25, usize::MAX), 1.25);
    }

    #[test]
    fn test_little_endian_long() {
        let spec = FormatSpec::parse("%l");
        let out = spec
            .decode_bytes(&(-5i64).to_le_bytes(), ByteOrder::Little)
            .unwrap();
        assert_eq!(out, DecodedValue::Scalar(FieldValue::Long(-5)));
    }
}
