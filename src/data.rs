use std::{fmt, str::FromStr};

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::{Decimal, prelude::ToPrimitive};
use serde::{Deserialize, Serialize};

pub const MISSING_TOKEN: &str = "NA";

/// Semantic tag of a cell.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    Integer,
    Decimal,
    Date,
    Text,
    Missing,
}

impl ValueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueKind::Integer => "integer",
            ValueKind::Decimal => "decimal",
            ValueKind::Date => "date",
            ValueKind::Text => "text",
            ValueKind::Missing => "missing",
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Integer(i64),
    Decimal(Decimal),
    Date(NaiveDateTime),
    Text(String),
    Missing,
}

impl Value {
    /// Builds a cell from a raw field: surrounding quotes are removed and the
    /// `NA` token becomes `Missing`. Empty fields stay as blank text.
    pub fn from_raw(raw: &str) -> Self {
        let unquoted = strip_quotes(raw);
        if unquoted == MISSING_TOKEN {
            Value::Missing
        } else {
            Value::Text(unquoted.to_string())
        }
    }

    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Integer(_) => ValueKind::Integer,
            Value::Decimal(_) => ValueKind::Decimal,
            Value::Date(_) => ValueKind::Date,
            Value::Text(_) => ValueKind::Text,
            Value::Missing => ValueKind::Missing,
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, Value::Missing)
    }

    /// `Missing` or text that is empty after trimming.
    pub fn is_absent(&self) -> bool {
        match self {
            Value::Missing => true,
            Value::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    pub fn as_display(&self) -> String {
        match self {
            Value::Integer(i) => i.to_string(),
            Value::Decimal(d) => d.normalize().to_string(),
            Value::Date(dt) => {
                if dt.time() == NaiveTime::MIN {
                    dt.format("%Y-%m-%d").to_string()
                } else {
                    dt.format("%Y-%m-%d %H:%M:%S").to_string()
                }
            }
            Value::Text(s) => s.clone(),
            Value::Missing => String::new(),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Decimal(d) => d.to_f64(),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<NaiveDateTime> {
        match self {
            Value::Date(dt) => Some(*dt),
            _ => None,
        }
    }

    /// Converts the cell into `kind`. Total: a value that cannot be
    /// represented under `kind` comes back as `Missing`.
    pub fn coerce(&self, kind: ValueKind) -> Value {
        match (self, kind) {
            (Value::Missing, _) | (_, ValueKind::Missing) => Value::Missing,
            (Value::Integer(i), ValueKind::Integer) => Value::Integer(*i),
            (Value::Integer(i), ValueKind::Decimal) => Value::Decimal(Decimal::from(*i)),
            (Value::Decimal(d), ValueKind::Decimal) => Value::Decimal(*d),
            (Value::Decimal(d), ValueKind::Integer) => {
                if d.fract().is_zero() {
                    d.to_i64().map(Value::Integer).unwrap_or(Value::Missing)
                } else {
                    Value::Missing
                }
            }
            (Value::Date(dt), ValueKind::Date) => Value::Date(*dt),
            (Value::Date(_), ValueKind::Integer | ValueKind::Decimal) => Value::Missing,
            (other, ValueKind::Text) => Value::Text(other.as_display()),
            (Value::Integer(i), ValueKind::Date) => parse_value(&i.to_string(), ValueKind::Date),
            (Value::Decimal(_), ValueKind::Date) => Value::Missing,
            (Value::Text(s), target) => parse_value(s, target),
        }
    }

    pub fn conforms_to(&self, kind: ValueKind) -> bool {
        !self.coerce(kind).is_missing()
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_display())
    }
}

pub fn strip_quotes(raw: &str) -> &str {
    raw.trim_matches('"')
}

/// Parses a textual cell into `kind`, returning `Missing` on failure.
pub fn parse_value(raw: &str, kind: ValueKind) -> Value {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Value::Missing;
    }
    match kind {
        ValueKind::Integer => parse_integer(trimmed)
            .map(Value::Integer)
            .unwrap_or(Value::Missing),
        ValueKind::Decimal => parse_decimal(trimmed)
            .map(Value::Decimal)
            .unwrap_or(Value::Missing),
        ValueKind::Date => parse_timestamp(trimmed)
            .map(Value::Date)
            .unwrap_or(Value::Missing),
        ValueKind::Text => Value::Text(raw.to_string()),
        ValueKind::Missing => Value::Missing,
    }
}

pub fn parse_integer(value: &str) -> Option<i64> {
    let unsigned = value.strip_prefix(['+', '-']).unwrap_or(value);
    if unsigned.is_empty() || !unsigned.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    value.parse().ok()
}

pub fn parse_decimal(value: &str) -> Option<Decimal> {
    if let Some(int) = parse_integer(value) {
        return Some(Decimal::from(int));
    }
    if value.contains(['e', 'E']) {
        return Decimal::from_scientific(value).ok();
    }
    let body = value.strip_prefix(['+', '-']).unwrap_or(value);
    if body.is_empty() || !body.bytes().all(|b| b.is_ascii_digit() || b == b'.') {
        return None;
    }
    Decimal::from_str(value).ok()
}

pub fn parse_naive_date(value: &str) -> Option<NaiveDate> {
    const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d/%m/%Y", "%Y/%m/%d", "%d-%m-%Y"];
    if value.len() == 8 && value.bytes().all(|b| b.is_ascii_digit()) {
        // Compact YYYYMMDD, the layout used by admission extracts.
        let year = value.get(0..4)?.parse().ok()?;
        let month = value.get(4..6)?.parse().ok()?;
        let day = value.get(6..8)?.parse().ok()?;
        return NaiveDate::from_ymd_opt(year, month, day);
    }
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(value, fmt).ok())
}

pub fn parse_timestamp(value: &str) -> Option<NaiveDateTime> {
    const DATETIME_FORMATS: &[&str] = &[
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
        "%d/%m/%Y %H:%M:%S",
        "%Y-%m-%d %H:%M",
        "%Y-%m-%dT%H:%M",
    ];
    if let Some(date) = parse_naive_date(value) {
        return Some(date.and_time(NaiveTime::MIN));
    }
    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_raw_unquotes_and_normalizes_na() {
        assert_eq!(Value::from_raw("\"HUSE\""), Value::Text("HUSE".to_string()));
        assert_eq!(Value::from_raw("NA"), Value::Missing);
        assert_eq!(Value::from_raw("\"NA\""), Value::Missing);
        assert_eq!(Value::from_raw(""), Value::Text(String::new()));
        assert!(Value::from_raw("").is_absent());
        assert!(!Value::from_raw("").is_missing());
    }

    #[test]
    fn text_coerces_to_numbers_or_missing() {
        let raw = Value::Text("42".to_string());
        assert_eq!(raw.coerce(ValueKind::Integer), Value::Integer(42));
        assert_eq!(
            raw.coerce(ValueKind::Decimal),
            Value::Decimal(Decimal::from(42))
        );
        assert_eq!(
            Value::Text("4x".to_string()).coerce(ValueKind::Integer),
            Value::Missing
        );
        assert_eq!(
            Value::Text("1.50".to_string()).coerce(ValueKind::Integer),
            Value::Missing
        );
    }

    #[test]
    fn leading_zero_codes_stay_integers_for_coercion() {
        assert_eq!(parse_integer("0002534"), Some(2534));
        assert_eq!(parse_integer("-5"), Some(-5));
        assert_eq!(parse_integer("+"), None);
    }

    #[test]
    fn decimal_coercion_keeps_fraction() {
        let value = Value::Text("12.75".to_string()).coerce(ValueKind::Decimal);
        assert_eq!(value.as_f64(), Some(12.75));
        assert_eq!(value.coerce(ValueKind::Integer), Value::Missing);
        assert_eq!(
            Value::Decimal(Decimal::from(3)).coerce(ValueKind::Integer),
            Value::Integer(3)
        );
    }

    #[test]
    fn dates_parse_from_compact_and_iso_layouts() {
        let expected = NaiveDate::from_ymd_opt(2020, 5, 10)
            .unwrap()
            .and_time(NaiveTime::MIN);
        assert_eq!(parse_timestamp("20200510"), Some(expected));
        assert_eq!(parse_timestamp("2020-05-10"), Some(expected));
        assert_eq!(parse_timestamp("10/05/2020"), Some(expected));
        assert_eq!(parse_timestamp("20201340"), None);
        assert_eq!(
            Value::Integer(20200510).coerce(ValueKind::Date),
            Value::Date(expected)
        );
    }

    #[test]
    fn coercion_to_text_renders_display_form() {
        let date = Value::Text("2020-05-01".to_string()).coerce(ValueKind::Date);
        assert_eq!(
            date.coerce(ValueKind::Text),
            Value::Text("2020-05-01".to_string())
        );
        assert_eq!(Value::Missing.coerce(ValueKind::Text), Value::Missing);
    }
}
