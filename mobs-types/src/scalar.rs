//! `to_str(hint)` / `from_str(str, hint)` (§3.3): scalar leaf conversion,
//! aware of the extended-vs-compact text-mode distinction (§6.2) for
//! timestamps. Enum scalars render as their variant name in both modes —
//! see `DESIGN.md` for why the original's ordinal-mode enum rendering was
//! not carried over.

use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::descriptor::ScalarHint;
use crate::error::Error;
use crate::value::Value;

/// `exportExtented` vs `exportCompact` (§6.2).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TextMode {
    Extended,
    Compact,
}

/// Render `value` as its scalar text representation under `hint`/`mode`.
pub fn to_str(value: &Value, hint: ScalarHint, mode: TextMode, field: &str) -> Result<String, Error> {
    match (hint, value) {
        (_, Value::Null) => Ok(String::new()),
        (ScalarHint::PlainString | ScalarHint::Enum, Value::Str(s)) => Ok(s.clone()),
        (ScalarHint::Integer, Value::Int(i)) => Ok(i.to_string()),
        (ScalarHint::Float, Value::Float(f)) => Ok(f.to_string()),
        (ScalarHint::Boolean, Value::Bool(b)) => Ok(b.to_string()),
        (ScalarHint::Bytes, Value::Bytes(b)) => Ok(mobs_codec::base64::encode_wrapped(b)),
        (ScalarHint::Timestamp, Value::Int(epoch)) => match mode {
            TextMode::Compact => Ok(epoch.to_string()),
            TextMode::Extended => {
                let dt = OffsetDateTime::from_unix_timestamp(*epoch)
                    .map_err(|e| Error::Syntax(format!("bad timestamp in `{field}`: {e}")))?;
                dt.format(&Rfc3339).map_err(|e| Error::Syntax(format!("timestamp format failed: {e}")))
            }
        },
        _ => Err(Error::TypeMismatch { field: field.to_string(), expected: hint_name(hint) }),
    }
}

/// Parse a scalar text representation into a `Value` under `hint`.
pub fn from_str(text: &str, hint: ScalarHint, field: &str) -> Result<Value, Error> {
    if text.is_empty() && hint != ScalarHint::PlainString {
        return Ok(Value::Null);
    }
    match hint {
        ScalarHint::PlainString | ScalarHint::Enum => Ok(Value::Str(text.to_string())),
        ScalarHint::Integer => text
            .parse::<i64>()
            .map(Value::Int)
            .map_err(|_| Error::TypeMismatch { field: field.to_string(), expected: "integer" }),
        ScalarHint::Float => text
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|_| Error::TypeMismatch { field: field.to_string(), expected: "float" }),
        ScalarHint::Boolean => match text {
            "true" => Ok(Value::Bool(true)),
            "false" => Ok(Value::Bool(false)),
            _ => Err(Error::TypeMismatch { field: field.to_string(), expected: "boolean" }),
        },
        ScalarHint::Bytes => mobs_codec::base64::decode_tolerant(text)
            .map(Value::Bytes)
            .map_err(|_| Error::TypeMismatch { field: field.to_string(), expected: "base64" }),
        ScalarHint::Timestamp => {
            if let Ok(epoch) = text.parse::<i64>() {
                return Ok(Value::Int(epoch));
            }
            OffsetDateTime::parse(text, &Rfc3339)
                .map(|dt| Value::Int(dt.unix_timestamp()))
                .map_err(|_| Error::TypeMismatch { field: field.to_string(), expected: "timestamp" })
        }
    }
}

fn hint_name(hint: ScalarHint) -> &'static str {
    match hint {
        ScalarHint::PlainString => "string",
        ScalarHint::Integer => "integer",
        ScalarHint::Float => "float",
        ScalarHint::Boolean => "boolean",
        ScalarHint::Bytes => "bytes",
        ScalarHint::Timestamp => "timestamp",
        ScalarHint::Enum => "enum",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_roundtrip() {
        let v = Value::Int(42);
        let s = to_str(&v, ScalarHint::Integer, TextMode::Compact, "n").unwrap();
        assert_eq!(from_str(&s, ScalarHint::Integer, "n").unwrap(), v);
    }

    #[test]
    fn timestamp_compact_is_epoch_extended_is_rfc3339() {
        let v = Value::Int(1_700_000_000);
        let compact = to_str(&v, ScalarHint::Timestamp, TextMode::Compact, "t").unwrap();
        assert_eq!(compact, "1700000000");
        let extended = to_str(&v, ScalarHint::Timestamp, TextMode::Extended, "t").unwrap();
        assert!(extended.contains('T'));
        assert_eq!(from_str(&extended, ScalarHint::Timestamp, "t").unwrap(), v);
        assert_eq!(from_str(&compact, ScalarHint::Timestamp, "t").unwrap(), v);
    }

    #[test]
    fn bytes_roundtrip_via_base64() {
        let v = Value::Bytes(vec![1, 2, 3, 250]);
        let s = to_str(&v, ScalarHint::Bytes, TextMode::Extended, "b").unwrap();
        assert_eq!(from_str(&s, ScalarHint::Bytes, "b").unwrap(), v);
    }

    #[test]
    fn null_scalar_is_empty_string() {
        let s = to_str(&Value::Null, ScalarHint::Integer, TextMode::Compact, "n").unwrap();
        assert_eq!(s, "");
        assert_eq!(from_str("", ScalarHint::Integer, "n").unwrap(), Value::Null);
    }
}
