// ── Item values ──
//
// The closed set of value kinds an item can hold, independent of which
// transport produced it.

use std::cmp::Ordering;
use std::fmt;

use bytes::Bytes;
use serde::{Serialize, Serializer};

/// A typed item value.
///
/// Equality is bitwise for floats so that a repeated `NaN` counts as
/// unchanged and `0.0` / `-0.0` count as different.
#[derive(Debug, Clone, Default)]
pub enum Value {
    /// Absent or unset. Also what placeholders hold.
    #[default]
    Invalid,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Bytes(Bytes),
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Invalid, Self::Invalid) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a.to_bits() == b.to_bits(),
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Bytes(a), Self::Bytes(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Value {
    pub fn is_valid(&self) -> bool {
        !matches!(self, Self::Invalid)
    }

    #[allow(clippy::cast_precision_loss, clippy::as_conversions)]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            Self::Bool(b) => Some(f64::from(u8::from(*b))),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Total order used by sorted models.
    ///
    /// Kinds rank `Invalid < Bool < numbers < String < Bytes`; integers and
    /// floats compare numerically with each other.
    pub fn sort_cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => a.cmp(b),
            (Self::Bool(a), Self::Bool(b)) => a.cmp(b),
            (Self::String(a), Self::String(b)) => a.cmp(b),
            (Self::Bytes(a), Self::Bytes(b)) => a.cmp(b),
            (a, b) if a.rank() == 2 && b.rank() == 2 => {
                let (x, y) = (a.as_f64().unwrap_or_default(), b.as_f64().unwrap_or_default());
                x.total_cmp(&y)
            }
            (a, b) => a.rank().cmp(&b.rank()),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Invalid => 0,
            Self::Bool(_) => 1,
            Self::Int(_) | Self::Float(_) => 2,
            Self::String(_) => 3,
            Self::Bytes(_) => 4,
        }
    }

    /// Decode a broker JSON value. `null` and `[]` decode as `Invalid`;
    /// other arrays and objects are kept as their JSON text.
    #[allow(clippy::cast_precision_loss, clippy::as_conversions)]
    pub fn from_json(json: &serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Self::Invalid,
            serde_json::Value::Bool(b) => Self::Bool(*b),
            serde_json::Value::Number(n) => n
                .as_i64()
                .map(Self::Int)
                .or_else(|| n.as_u64().map(|u| Self::Float(u as f64)))
                .or_else(|| n.as_f64().map(Self::Float))
                .unwrap_or_default(),
            serde_json::Value::String(s) => Self::String(s.clone()),
            serde_json::Value::Array(a) if a.is_empty() => Self::Invalid,
            other => Self::String(other.to_string()),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Invalid => serde_json::Value::Null,
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Int(i) => serde_json::Value::from(*i),
            Self::Float(f) => serde_json::Value::from(*f),
            Self::String(s) => serde_json::Value::String(s.clone()),
            Self::Bytes(b) => serde_json::Value::from(b.to_vec()),
        }
    }

    /// Interpret user input: `true`/`false`, integers, floats, `null`/empty
    /// for invalid, anything else as a string.
    pub fn parse_loose(input: &str) -> Self {
        let s = input.trim();
        if s.is_empty() || s.eq_ignore_ascii_case("null") {
            return Self::Invalid;
        }
        if let Ok(b) = s.parse::<bool>() {
            return Self::Bool(b);
        }
        if let Ok(i) = s.parse::<i64>() {
            return Self::Int(i);
        }
        if let Ok(f) = s.parse::<f64>() {
            return Self::Float(f);
        }
        Self::String(input.to_owned())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Invalid => f.write_str("--"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::String(s) => f.write_str(s),
            Self::Bytes(b) => {
                for byte in b {
                    write!(f, "{byte:02x}")?;
                }
                Ok(())
            }
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

// ── Format ───────────────────────────────────────────────────────────

/// Display descriptor asserted by a producer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Format {
    pub unit: Option<String>,
    pub decimals: Option<u8>,
}

impl Format {
    pub fn new(unit: &str, decimals: u8) -> Self {
        Self {
            unit: Some(unit.to_owned()),
            decimals: Some(decimals),
        }
    }

    /// Render `value` with fixed decimals and a unit suffix.
    pub fn render(&self, value: &Value) -> String {
        if !value.is_valid() {
            return value.to_string();
        }
        let body = match (self.decimals, value.as_f64()) {
            (Some(d), Some(v)) if !matches!(value, Value::Bool(_)) => {
                format!("{v:.prec$}", prec = usize::from(d))
            }
            _ => value.to_string(),
        };
        match &self.unit {
            Some(unit) if !unit.is_empty() => format!("{body}{unit}"),
            _ => body,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn float_equality_is_bitwise() {
        assert_eq!(Value::Float(f64::NAN), Value::Float(f64::NAN));
        assert_ne!(Value::Float(0.0), Value::Float(-0.0));
        assert_ne!(Value::Int(1), Value::Float(1.0));
    }

    #[test]
    fn mixed_numbers_sort_numerically() {
        assert_eq!(Value::Int(2).sort_cmp(&Value::Float(1.5)), Ordering::Greater);
        assert_eq!(Value::Invalid.sort_cmp(&Value::Bool(false)), Ordering::Less);
        assert_eq!(
            Value::from("A").sort_cmp(&Value::from("B")),
            Ordering::Less
        );
    }

    #[test]
    fn json_decoding() {
        let v: serde_json::Value = serde_json::json!(12.8);
        assert_eq!(Value::from_json(&v), Value::Float(12.8));
        assert_eq!(Value::from_json(&serde_json::json!(null)), Value::Invalid);
        assert_eq!(Value::from_json(&serde_json::json!([])), Value::Invalid);
        assert_eq!(Value::from_json(&serde_json::json!(3)), Value::Int(3));
        assert_eq!(
            Value::from_json(&serde_json::json!([1, 2])),
            Value::String("[1,2]".into())
        );
    }

    #[test]
    fn loose_parsing() {
        assert_eq!(Value::parse_loose("true"), Value::Bool(true));
        assert_eq!(Value::parse_loose("42"), Value::Int(42));
        assert_eq!(Value::parse_loose("12.5"), Value::Float(12.5));
        assert_eq!(Value::parse_loose(""), Value::Invalid);
        assert_eq!(Value::parse_loose("Boat"), Value::String("Boat".into()));
    }

    #[test]
    fn format_renders_unit_and_decimals() {
        let fmt = Format::new("V", 2);
        assert_eq!(fmt.render(&Value::Float(12.8)), "12.80V");
        assert_eq!(fmt.render(&Value::Invalid), "--");
        assert_eq!(Format::default().render(&Value::Int(7)), "7");
    }
}
