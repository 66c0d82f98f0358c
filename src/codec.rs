//! Values stored in tables and the codec that turns them into bytes.

use std::collections::BTreeMap;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::Result;

/// A value held by a table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// UTF-8 text.
    String(String),
    /// Signed integer.
    Integer(i64),
    /// Floating point number.
    Float(f64),
    /// Arbitrary precision decimal in its textual form.
    Decimal(String),
    /// A point in time.
    Time(SystemTime),
    /// Nested named values.
    Object(BTreeMap<String, Value>),
    /// A label.
    Tag(String),
    /// A member of an enumeration, by name.
    Enum(String),
}

/// The one byte tag naming each `Value` variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ValueType {
    /// `Value::String`
    String = b'0',
    /// `Value::Integer`
    Integer = b'1',
    /// `Value::Float`
    Float = b'2',
    /// `Value::Decimal`
    Decimal = b'3',
    /// `Value::Time`
    Time = b'4',
    /// `Value::Object`
    Object = b'5',
    /// `Value::Tag`
    Tag = b'6',
    /// `Value::Enum`
    Enum = b'7',
}

impl ValueType {
    /// The tag byte.
    pub const fn code(self) -> u8 {
        self as u8
    }
}

impl Value {
    /// The variant tag of this value.
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::String(_) => ValueType::String,
            Value::Integer(_) => ValueType::Integer,
            Value::Float(_) => ValueType::Float,
            Value::Decimal(_) => ValueType::Decimal,
            Value::Time(_) => ValueType::Time,
            Value::Object(_) => ValueType::Object,
            Value::Tag(_) => ValueType::Tag,
            Value::Enum(_) => ValueType::Enum,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Value {
        Value::String(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Value {
        Value::String(s)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Value {
        Value::Integer(i64::from(i))
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Value {
        Value::Integer(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Value {
        Value::Float(f)
    }
}

impl From<SystemTime> for Value {
    fn from(t: SystemTime) -> Value {
        Value::Time(t)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(o: BTreeMap<String, Value>) -> Value {
        Value::Object(o)
    }
}

/// Turns values into stored bytes and back.
pub trait Codec: Send + Sync {
    /// Serializes `value`.
    fn encode(&self, value: &Value) -> Result<Vec<u8>>;

    /// Deserializes bytes produced by `encode`.
    fn decode(&self, bytes: &[u8]) -> Result<Value>;
}

/// The default codec, backed by `bincode`.
#[derive(Debug, Clone, Copy, Default)]
pub struct BincodeCodec;

impl Codec for BincodeCodec {
    fn encode(&self, value: &Value) -> Result<Vec<u8>> {
        Ok(bincode::serialize(value)?)
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value> {
        Ok(bincode::deserialize(bytes)?)
    }
}
