//! Entity values and their wire representation.
//!
//! Every payload on the wire is ASCII. Numeric payloads are scaled integers or
//! decimals: the decoded value is `raw / scale`, and writing a value sends
//! `value * scale` rounded to the command's precision.

use std::fmt;

use chrono::DateTime;

use crate::error::DecodeError;

/// Format used for [`ValueKind::Timestamp`] values.
pub const TIMESTAMP_FORMAT: &str = "%d-%m-%y %H:%M:%S";

/// Semantic type of an entity and how its payload is decoded.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ValueKind {
    /// `0`/`1`. A bare `+MNEMONIC` push means `true`.
    Boolean,
    /// Whole number. Writes truncate toward zero.
    Integer,
    /// Decimal. Writes are rounded to `precision` decimals on the wire.
    Float {
        /// Decimals rendered when writing (0 = rounded integer).
        precision: u8,
    },
    /// Free text, trimmed and unquoted.
    Text,
    /// Integer state code mapped to a label. Unknown codes are decode errors.
    Enum(&'static [(i64, &'static str)]),
    /// One bit of an integer bitmask.
    Bit(u8),
    /// Unix seconds, rendered as UTC text.
    Timestamp,
    /// `<model>,<cores>` chip description, rendered as `"<model>, N cores"`.
    ChipInfo,
}

impl ValueKind {
    /// Short name for display.
    pub fn name(&self) -> &'static str {
        match self {
            ValueKind::Boolean => "bool",
            ValueKind::Integer => "integer",
            ValueKind::Float { .. } => "float",
            ValueKind::Text => "text",
            ValueKind::Enum(_) => "enum",
            ValueKind::Bit(_) => "bit",
            ValueKind::Timestamp => "timestamp",
            ValueKind::ChipInfo => "chip",
        }
    }

    /// Decode one payload field.
    ///
    /// `raw` must already be the selected field, untrimmed is fine.
    pub fn decode(&self, raw: &str, scale: f64, mnemonic: &str) -> Result<Value, DecodeError> {
        let raw = raw.trim();
        match *self {
            ValueKind::Boolean => match raw {
                "1" => Ok(Value::Bool(true)),
                "0" => Ok(Value::Bool(false)),
                other => Err(DecodeError::InvalidBoolean(other.to_string())),
            },
            ValueKind::Integer => parse_integer(raw).map(Value::Integer),
            ValueKind::Float { .. } => {
                let number: f64 = raw
                    .parse()
                    .map_err(|_| DecodeError::InvalidNumber(raw.to_string()))?;
                Ok(Value::Float(number / scale))
            }
            ValueKind::Text => Ok(Value::Text(unquote(raw).to_string())),
            ValueKind::Enum(states) => {
                let code = parse_integer(raw)?;
                states
                    .iter()
                    .find(|(c, _)| *c == code)
                    .map(|(_, label)| Value::Text((*label).to_string()))
                    .ok_or_else(|| DecodeError::UnknownEnumValue {
                        mnemonic: mnemonic.to_string(),
                        value: code,
                    })
            }
            ValueKind::Bit(bit) => {
                let mask = parse_integer(raw)?;
                Ok(Value::Bool((mask >> bit) & 1 == 1))
            }
            ValueKind::Timestamp => {
                let secs = parse_integer(raw)?;
                DateTime::from_timestamp(secs, 0)
                    .map(|t| Value::Text(t.format(TIMESTAMP_FORMAT).to_string()))
                    .ok_or(DecodeError::InvalidTimestamp(secs))
            }
            ValueKind::ChipInfo => Ok(Value::Text(format_chip(raw))),
        }
    }

    /// Render a value for a set command.
    ///
    /// Returns `None` if the value does not fit this kind.
    pub fn encode(&self, value: &Value, scale: f64) -> Option<String> {
        match *self {
            ValueKind::Boolean => match value {
                Value::Bool(b) => Some(if *b { "1" } else { "0" }.to_string()),
                Value::Integer(0) => Some("0".to_string()),
                Value::Integer(1) => Some("1".to_string()),
                _ => None,
            },
            ValueKind::Integer => {
                let scaled = value.as_f64()? * scale;
                wire_integer(scaled.trunc()).map(|n| n.to_string())
            }
            ValueKind::Float { precision } => {
                let scaled = value.as_f64()? * scale;
                if !scaled.is_finite() {
                    return None;
                }
                if precision == 0 {
                    wire_integer(scaled.round()).map(|n| n.to_string())
                } else {
                    Some(format!("{:.*}", precision as usize, scaled))
                }
            }
            ValueKind::Text => match value {
                Value::Text(s) => Some(s.clone()),
                _ => None,
            },
            ValueKind::Enum(states) => {
                let (code, _) = match value {
                    Value::Text(label) => states.iter().find(|(_, l)| l == label)?,
                    Value::Integer(c) => states.iter().find(|(code, _)| code == c)?,
                    _ => return None,
                };
                Some(code.to_string())
            }
            ValueKind::Bit(_) | ValueKind::Timestamp | ValueKind::ChipInfo => None,
        }
    }
}

/// Whole number that fits the controller's integer arguments.
fn wire_integer(value: f64) -> Option<i64> {
    (value.is_finite() && value >= i64::MIN as f64 && value < i64::MAX as f64)
        .then_some(value as i64)
}

fn format_chip(raw: &str) -> String {
    let mut parts = raw.split(',').map(str::trim);
    let model = parts.next().unwrap_or_default();
    match parts.next().and_then(|c| c.parse::<i64>().ok()) {
        Some(1) => format!("{}, 1 core", model),
        Some(cores) if cores > 1 => format!("{}, {} cores", model, cores),
        _ => model.to_string(),
    }
}

fn parse_integer(raw: &str) -> Result<i64, DecodeError> {
    raw.parse()
        .map_err(|_| DecodeError::InvalidNumber(raw.to_string()))
}

/// Strip one pair of enclosing `"` or `'` quotes.
pub fn unquote(text: &str) -> &str {
    let bytes = text.as_bytes();
    if bytes.len() >= 2 {
        let (first, last) = (bytes[0], bytes[bytes.len() - 1]);
        if (first == b'"' && last == b'"') || (first == b'\'' && last == b'\'') {
            return &text[1..text.len() - 1];
        }
    }
    text
}

/// A decoded entity value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
    /// The controller reported that no reading is available.
    Unknown,
}

impl Value {
    /// Numeric view of the value, if it has one.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::Integer(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            Value::Text(_) | Value::Unknown => None,
        }
    }

    /// Get the boolean if this is a Bool value.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Get the text if this is a Text value.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{}", if *b { "ON" } else { "OFF" }),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Float(v) => write!(f, "{}", v),
            Value::Text(s) => f.write_str(s),
            Value::Unknown => f.write_str("unknown"),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}
