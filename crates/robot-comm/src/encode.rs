use crate::cursor::ByteOrder;
use crate::decode::FieldValue;
use crate::format::{FieldType, FormatError, FormatField, FormatSpec};

impl FormatSpec {
    /// Build the wire bytes for one value per field, the inverse of `decode`.
    ///
    /// Fixed-length CHAR fields are NUL-padded or truncated; CHAR fields without a length
    /// are written NUL-terminated.
    pub fn encode(&self, values: &[FieldValue], order: ByteOrder) -> Result<Vec<u8>, FormatError> {
        if values.len() != self.len() {
            return Err(FormatError::ArityMismatch {
                expected: self.len(),
                got: values.len(),
            });
        }
        let mut out = Vec::with_capacity(self.len() * 4);
        for (field, value) in self.fields().iter().zip(values) {
            encode_field(field, value, order, &mut out)?;
        }
        Ok(out)
    }
}

macro_rules! put {
    ($out:expr, $order:expr, $v:expr) => {
        match $order {
            ByteOrder::Big => $out.extend_from_slice(&$v.to_be_bytes()),
            ByteOrder::Little => $out.extend_from_slice(&$v.to_le_bytes()),
        }
    };
}

fn encode_field(
    field: &FormatField,
    value: &FieldValue,
    order: ByteOrder,
    out: &mut Vec<u8>,
) -> Result<(), FormatError> {
    let ty = field.field_type;
    match ty {
        FieldType::Ubyte => out.push(int_as::<u8>(ty, value)?),
        FieldType::Byte => out.push(int_as::<i8>(ty, value)? as u8),
        FieldType::Short => put!(out, order, int_as::<i16>(ty, value)?),
        FieldType::Integer => put!(out, order, int_as::<i32>(ty, value)?),
        FieldType::Long => put!(out, order, int_as::<i64>(ty, value)?),
        FieldType::Float => {
            let v = float_of(ty, value)?;
            let v = match field.declared_length() {
                Some(digits) => crate::decode::round_fixed(v, digits),
                None => v,
            };
            put!(out, order, v as f32)
        }
        FieldType::Double => put!(out, order, float_of(ty, value)?),
        FieldType::Char => {
            let text = value.as_str().ok_or_else(|| FormatError::TypeMismatch {
                field: ty,
                value: value.to_string(),
            })?;
            let bytes = latin1(ty, text)?;
            match field.declared_length() {
                Some(n) => {
                    let take = bytes.len().min(n);
                    out.extend_from_slice(&bytes[..take]);
                    out.resize(out.len() + (n - take), 0);
                }
                None => {
                    if bytes.contains(&0) {
                        return Err(FormatError::ValueOutOfRange {
                            field: ty,
                            value: text.to_string(),
                        });
                    }
                    out.extend_from_slice(&bytes);
                    out.push(0);
                }
            }
        }
    }
    Ok(())
}

fn int_as<T: TryFrom<i64>>(field: FieldType, value: &FieldValue) -> Result<T, FormatError> {
    let v = value.as_i64().ok_or_else(|| FormatError::TypeMismatch {
        field,
        value: value.to_string(),
    })?;
    T::try_from(v).map_err(|_| FormatError::ValueOutOfRange {
        field,
        value: v.to_string(),
    })
}

fn float_of(field: FieldType, value: &FieldValue) -> Result<f64, FormatError> {
    value.as_f64().ok_or_else(|| FormatError::TypeMismatch {
        field,
        value: value.to_string(),
    })
}

fn latin1(field: FieldType, text: &str) -> Result<Vec<u8>, FormatError> {
    text.chars()
        .map(|c| u8::try_from(u32::from(c)).ok())
        .collect::<Option<Vec<u8>>>()
        .ok_or_else(|| FormatError::ValueOutOfRange {
            field,
            value: text.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::DecodedValue;

    #[test]
    fn test_fixed_width_round_trip() {
        let spec = FormatSpec::parse("%b%s%i%l%d");
        let values = vec![
            FieldValue::Byte(-7),
            FieldValue::Short(-1234),
            FieldValue::Int(i32::MAX),
            FieldValue::Long(i64::MIN),
            FieldValue::Double(-2.5e-3),
        ];
        for order in [ByteOrder::Big, ByteOrder::Little] {
            let bytes = spec.encode(&values, order).unwrap();
            assert_eq!(bytes.len(), 1 + 2 + 4 + 8 + 8);
            let back = spec.decode_bytes(&bytes, order).unwrap();
            assert_eq!(back, DecodedValue::Sequence(values.clone()));
        }
    }

    #[test]
    fn test_char_padding_and_termination() {
        let spec = FormatSpec::parse("%c{4}%c");
        let bytes = spec
            .encode(
                &[FieldValue::Text("ab".into()), FieldValue::Text("hi".into())],
                ByteOrder::Big,
            )
            .unwrap();
        assert_eq!(bytes, b"ab\0\0hi\0".to_vec());
    }

    #[test]
    fn test_out_of_range_rejected() {
        let spec = FormatSpec::parse("%u");
        assert!(matches!(
            spec.encode(&[FieldValue::Int(300)], ByteOrder::Big),
            Err(FormatError::ValueOutOfRange { .. })
        ));
    }

    #[test]
    fn test_arity_mismatch() {
        let spec = FormatSpec::parse("%i%i");
        assert!(matches!(
            spec.encode(&[FieldValue::Int(1)], ByteOrder::Big),
            Err(FormatError::ArityMismatch {
                expected: 2,
                got: 1
            })
        ));
    }

    #[test]
    fn test_text_into_numeric_field() {
        let spec = FormatSpec::parse("%s");
        assert!(matches!(
            spec.encode(&[FieldValue::Text("x".into())], ByteOrder::Big),
            Err(FormatError::TypeMismatch { .. })
        ));
    }
}
