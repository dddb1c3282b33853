use crate::{ColumnBinding, Encoding, Error, Result, ValueType};
use chrono::{DateTime, NaiveDate, SecondsFormat};
use uuid::Uuid;

/// A coerced attribute value. Ingestion converts the heterogeneous JSON
/// world into this tagged form once; everything downstream is typed.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Text(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    /// Milliseconds since the Unix epoch.
    Date(i64),
    Uuid(Uuid),
}

/// A value destined for one of the typed main-column maps.
#[derive(Debug, Clone, PartialEq)]
pub enum MainValue {
    Text(String),
    I16(i16),
    I32(i32),
    I64(i64),
    F64(f64),
}

impl Scalar {
    /// Coerce a JSON scalar into the logical domain of `value_type`.
    pub fn coerce(value: &serde_json::Value, value_type: ValueType) -> Result<Scalar> {
        use serde_json::Value;
        match value_type {
            ValueType::Text => match value {
                Value::String(s) => Ok(Scalar::Text(s.clone())),
                other => Err(mismatch("string", other)),
            },
            ValueType::SmallInt | ValueType::Integer | ValueType::BigInt => {
                coerce_int(value).map(Scalar::Int)
            }
            ValueType::Numeric => match value {
                Value::Number(n) => n
                    .as_f64()
                    .map(Scalar::Float)
                    .ok_or_else(|| mismatch("number", value)),
                Value::String(s) => s
                    .parse::<f64>()
                    .map(Scalar::Float)
                    .map_err(|_| Error::validation(format!("{s:?} is not numeric"))),
                other => Err(mismatch("number", other)),
            },
            ValueType::Date | ValueType::DateTime => coerce_date_ms(value).map(Scalar::Date),
            ValueType::Uuid => match value {
                Value::String(s) => Uuid::parse_str(s)
                    .map(Scalar::Uuid)
                    .map_err(|_| Error::validation(format!("{s:?} is not a UUID"))),
                other => Err(mismatch("UUID string", other)),
            },
            ValueType::Bool => coerce_bool(value).map(Scalar::Bool),
        }
    }

    /// Encode this scalar for the main column it is bound to, following the
    /// `(value_type, encoding)` routing table.
    pub fn encode_main(&self, value_type: ValueType, binding: &ColumnBinding) -> Result<MainValue> {
        match (self, value_type, binding.encoding) {
            (Scalar::Text(s), ValueType::Text, Encoding::Default) => {
                Ok(MainValue::Text(s.clone()))
            }
            (Scalar::Uuid(u), ValueType::Uuid, Encoding::Default) => {
                Ok(MainValue::Text(u.hyphenated().to_string()))
            }
            (Scalar::Int(i), ValueType::SmallInt, Encoding::Default) => i16::try_from(*i)
                .map(MainValue::I16)
                .map_err(|_| Error::validation(format!("{i} overflows smallint"))),
            (Scalar::Int(i), ValueType::Integer, Encoding::Default) => i32::try_from(*i)
                .map(MainValue::I32)
                .map_err(|_| Error::validation(format!("{i} overflows integer"))),
            (Scalar::Int(i), ValueType::BigInt, Encoding::Default) => Ok(MainValue::I64(*i)),
            (Scalar::Float(f), ValueType::Numeric, Encoding::Default) => Ok(MainValue::F64(*f)),
            (Scalar::Date(ms), ValueType::Date | ValueType::DateTime, Encoding::UnixMs) => {
                Ok(MainValue::I64(*ms))
            }
            (Scalar::Date(ms), ValueType::Date | ValueType::DateTime, Encoding::Iso8601) => {
                Ok(MainValue::Text(ms_to_rfc3339(*ms)?))
            }
            (Scalar::Bool(b), ValueType::Bool, Encoding::BoolSmallInt) => {
                Ok(MainValue::I16(*b as i16))
            }
            (Scalar::Bool(b), ValueType::Bool, Encoding::BoolText) => Ok(MainValue::Text(
                if *b { "1" } else { "0" }.to_string(),
            )),
            (scalar, value_type, encoding) => Err(Error::internal(format!(
                "scalar {scalar:?} does not encode as {} with {encoding:?}",
                value_type.as_str()
            ))),
        }
    }

    /// Encode this scalar into the EAV `(value_text, value_numeric)` slots.
    pub fn encode_eav(&self) -> (Option<String>, Option<f64>) {
        match self {
            Scalar::Text(s) => (Some(s.clone()), None),
            Scalar::Uuid(u) => (Some(u.hyphenated().to_string()), None),
            Scalar::Int(i) => (None, Some(*i as f64)),
            Scalar::Float(f) => (None, Some(*f)),
            Scalar::Date(ms) => (None, Some(*ms as f64)),
            Scalar::Bool(b) => (None, Some(if *b { 1.0 } else { 0.0 })),
        }
    }
}

fn mismatch(expected: &str, got: &serde_json::Value) -> Error {
    Error::validation(format!("expected {expected}, got {got}"))
}

fn coerce_int(value: &serde_json::Value) -> Result<i64> {
    use serde_json::Value;
    match value {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(i)
            } else if let Some(f) = n.as_f64() {
                if f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 {
                    Ok(f as i64)
                } else {
                    Err(Error::validation(format!("{f} is not an integer")))
                }
            } else {
                Err(mismatch("integer", value))
            }
        }
        Value::String(s) => s
            .parse::<i64>()
            .map_err(|_| Error::validation(format!("{s:?} is not an integer"))),
        other => Err(mismatch("integer", other)),
    }
}

fn coerce_bool(value: &serde_json::Value) -> Result<bool> {
    use serde_json::Value;
    match value {
        Value::Bool(b) => Ok(*b),
        Value::String(s) => match s.as_str() {
            "true" | "1" => Ok(true),
            "false" | "0" => Ok(false),
            _ => Err(Error::validation(format!("{s:?} is not a bool"))),
        },
        Value::Number(n) => match n.as_f64() {
            Some(f) => Ok(f.abs() > 0.5),
            None => Err(mismatch("bool", value)),
        },
        other => Err(mismatch("bool", other)),
    }
}

/// Parse a JSON date value into epoch milliseconds. Accepts RFC3339 with or
/// without fractional seconds, `YYYY-MM-DD`, `YYYY-MM`, and epoch-ms as a
/// number or digit string.
fn coerce_date_ms(value: &serde_json::Value) -> Result<i64> {
    use serde_json::Value;
    match value {
        Value::Number(n) => n.as_i64().ok_or_else(|| mismatch("epoch-ms", value)),
        Value::String(s) => {
            parse_date_str_ms(s).ok_or_else(|| Error::validation(format!("{s:?} is not a date")))
        }
        other => Err(mismatch("date", other)),
    }
}

fn parse_date_str_ms(s: &str) -> Option<i64> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.timestamp_millis());
    }
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(d.and_hms_opt(0, 0, 0)?.and_utc().timestamp_millis());
    }
    // YYYY-MM resolves to the first of the month.
    let bytes = s.as_bytes();
    if bytes.len() == 7 && bytes[4] == b'-' {
        if let Ok(d) = NaiveDate::parse_from_str(&format!("{s}-01"), "%Y-%m-%d") {
            return Some(d.and_hms_opt(0, 0, 0)?.and_utc().timestamp_millis());
        }
    }
    if !s.is_empty()
        && s.bytes()
            .enumerate()
            .all(|(i, b)| b.is_ascii_digit() || (i == 0 && b == b'-'))
    {
        return s.parse::<i64>().ok();
    }
    None
}

/// Render epoch milliseconds as an RFC3339 UTC timestamp.
pub fn ms_to_rfc3339(ms: i64) -> Result<String> {
    DateTime::from_timestamp_millis(ms)
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true))
        .ok_or_else(|| Error::validation(format!("{ms} is out of timestamp range")))
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_int_coercions() {
        for (input, expect) in [
            (json!(42), Some(42)),
            (json!(-7), Some(-7)),
            (json!(42.0), Some(42)),
            (json!("42"), Some(42)),
            (json!("-42"), Some(-42)),
            (json!(42.5), None),
            (json!("x42"), None),
            (json!(true), None),
        ] {
            let got = Scalar::coerce(&input, ValueType::BigInt).ok();
            assert_eq!(got, expect.map(Scalar::Int), "input {input}");
        }
    }

    #[test]
    fn test_bool_coercions() {
        for (input, expect) in [
            (json!(true), Some(true)),
            (json!(false), Some(false)),
            (json!("true"), Some(true)),
            (json!("0"), Some(false)),
            (json!("1"), Some(true)),
            (json!(0.4), Some(false)),
            (json!(-0.9), Some(true)),
            (json!("yes"), None),
        ] {
            let got = Scalar::coerce(&input, ValueType::Bool).ok();
            assert_eq!(got, expect.map(Scalar::Bool), "input {input}");
        }
    }

    #[test]
    fn test_date_coercions() {
        for (input, expect) in [
            (json!("2021-03-04T05:06:07Z"), Some(1614834367000)),
            (json!("2021-03-04T05:06:07.250Z"), Some(1614834367250)),
            (json!("2021-03-04"), Some(1614816000000)),
            (json!("2021-03"), Some(1614556800000)),
            (json!("1614834367000"), Some(1614834367000)),
            (json!(1614834367000i64), Some(1614834367000)),
            (json!("03/04/2021"), None),
        ] {
            let got = Scalar::coerce(&input, ValueType::DateTime).ok();
            assert_eq!(got, expect.map(Scalar::Date), "input {input}");
        }
    }

    #[test]
    fn test_main_encodings() {
        let binding = |col: &str, encoding| ColumnBinding {
            col_name: col.to_string(),
            encoding,
        };

        let date = Scalar::Date(1614834367000);
        assert_eq!(
            date.encode_main(ValueType::DateTime, &binding("bigint_01", Encoding::UnixMs))
                .unwrap(),
            MainValue::I64(1614834367000)
        );
        assert_eq!(
            date.encode_main(ValueType::DateTime, &binding("text_01", Encoding::Iso8601))
                .unwrap(),
            MainValue::Text("2021-03-04T05:06:07.000Z".to_string())
        );

        assert_eq!(
            Scalar::Bool(true)
                .encode_main(ValueType::Bool, &binding("smallint_01", Encoding::BoolSmallInt))
                .unwrap(),
            MainValue::I16(1)
        );
        assert_eq!(
            Scalar::Bool(false)
                .encode_main(ValueType::Bool, &binding("text_02", Encoding::BoolText))
                .unwrap(),
            MainValue::Text("0".to_string())
        );

        // Range checks on the narrow integer families.
        assert!(Scalar::Int(70_000)
            .encode_main(ValueType::SmallInt, &binding("smallint_01", Encoding::Default))
            .is_err());
        assert!(Scalar::Int(70_000)
            .encode_main(ValueType::Integer, &binding("integer_01", Encoding::Default))
            .is_ok());
    }

    #[test]
    fn test_eav_encodings() {
        assert_eq!(
            Scalar::Text("a".to_string()).encode_eav(),
            (Some("a".to_string()), None)
        );
        let uuid = Uuid::parse_str("f81d4fae-7dec-11d0-a765-00a0c91e6bf6").unwrap();
        assert_eq!(
            Scalar::Uuid(uuid).encode_eav(),
            (Some("f81d4fae-7dec-11d0-a765-00a0c91e6bf6".to_string()), None)
        );
        assert_eq!(Scalar::Int(3).encode_eav(), (None, Some(3.0)));
        assert_eq!(Scalar::Bool(true).encode_eav(), (None, Some(1.0)));
        assert_eq!(
            Scalar::Date(1614834367000).encode_eav(),
            (None, Some(1614834367000.0))
        );
    }
}
