//! Firestore REST document encoding.
//!
//! Only the value kinds a quota document uses are modelled. Integers travel as
//! decimal strings on the wire.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Field map of a document.
pub type Fields = HashMap<String, Value>;

/// A single typed Firestore value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Value {
    NullValue(()),
    BooleanValue(bool),
    IntegerValue(String),
    DoubleValue(f64),
    TimestampValue(String),
    StringValue(String),
}

/// A document as returned by the REST API.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub fields: Option<Fields>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub create_time: Option<String>,
    /// Server write time; the precondition token for the next update.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update_time: Option<String>,
}

impl Document {
    pub fn new(fields: Fields) -> Self {
        Self {
            fields: Some(fields),
            ..Default::default()
        }
    }

    /// Decode field `key`. `None` if it is missing or has the wrong kind.
    pub fn get<T: FieldCodec>(&self, key: &str) -> Option<T> {
        T::decode(self.fields.as_ref()?.get(key)?)
    }
}

/// Types that map onto one Firestore field.
pub trait FieldCodec: Sized {
    fn encode(&self) -> Value;
    fn decode(value: &Value) -> Option<Self>;
}

impl FieldCodec for i64 {
    fn encode(&self) -> Value {
        Value::IntegerValue(self.to_string())
    }

    fn decode(value: &Value) -> Option<Self> {
        match value {
            Value::IntegerValue(raw) => raw.parse().ok(),
            Value::DoubleValue(f) if f.fract() == 0.0 => Some(*f as i64),
            _ => None,
        }
    }
}

// Out-of-range stored integers decode as absent instead of wrapping.
macro_rules! unsigned_codec {
    ($($ty:ty),*) => {
        $(
            impl FieldCodec for $ty {
                fn encode(&self) -> Value {
                    Value::IntegerValue(self.to_string())
                }

                fn decode(value: &Value) -> Option<Self> {
                    i64::decode(value).and_then(|v| <$ty>::try_from(v).ok())
                }
            }
        )*
    };
}

unsigned_codec!(u32, u64);

impl FieldCodec for bool {
    fn encode(&self) -> Value {
        Value::BooleanValue(*self)
    }

    fn decode(value: &Value) -> Option<Self> {
        match value {
            Value::BooleanValue(b) => Some(*b),
            _ => None,
        }
    }
}

impl FieldCodec for String {
    fn encode(&self) -> Value {
        Value::StringValue(self.clone())
    }

    fn decode(value: &Value) -> Option<Self> {
        match value {
            Value::StringValue(s) => Some(s.clone()),
            _ => None,
        }
    }
}

impl FieldCodec for DateTime<Utc> {
    fn encode(&self) -> Value {
        Value::TimestampValue(self.to_rfc3339())
    }

    fn decode(value: &Value) -> Option<Self> {
        match value {
            Value::TimestampValue(raw) => DateTime::parse_from_rfc3339(raw)
                .ok()
                .map(|dt| dt.with_timezone(&Utc)),
            _ => None,
        }
    }
}

/// Nullable field: `None` is written as an explicit null.
impl<T: FieldCodec> FieldCodec for Option<T> {
    fn encode(&self) -> Value {
        self.as_ref().map_or(Value::NullValue(()), T::encode)
    }

    fn decode(value: &Value) -> Option<Self> {
        match value {
            Value::NullValue(()) => Some(None),
            other => T::decode(other).map(Some),
        }
    }
}

/// Builds a [`Fields`] map one typed field at a time.
#[derive(Debug, Default)]
pub struct FieldsBuilder {
    fields: Fields,
}

impl FieldsBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set<T: FieldCodec>(mut self, key: &str, value: &T) -> Self {
        self.fields.insert(key.to_string(), value.encode());
        self
    }

    pub fn build(self) -> Fields {
        self.fields
    }
}
