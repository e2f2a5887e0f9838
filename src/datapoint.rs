use std::fmt::Write;

use serde::{Deserialize, Serialize};

use crate::tags::TagFrame;

/// Representation quoted by errors for writes that carry no value.
pub const NO_VALUE: &str = "<no value>";

/// Binary values are quoted up to this many bytes.
const BINARY_QUOTE_LIMIT: usize = 16;

/// Datapoint frame.
///
/// Datapoints are serialized using this type into the NATS message body.
#[cfg_attr(test, derive(proptest_derive::Arbitrary))]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub origin: String,
    pub timestamp: u64,
    #[cfg_attr(test, proptest(strategy = "crate::datapoint::tests::tag_frame()"))]
    pub tags: TagFrame,
    pub payload: Payload,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub(crate) struct FrameBorrowed<'a> {
    pub(crate) origin: &'a str,
    pub(crate) timestamp: u64,
    pub(crate) tags: &'a TagFrame,
    pub(crate) payload: Value<'a>,
}

impl<'a> From<&'a Frame> for FrameBorrowed<'a> {
    fn from(value: &'a Frame) -> Self {
        FrameBorrowed {
            origin: &value.origin,
            timestamp: value.timestamp,
            tags: &value.tags,
            payload: Value::from(&value.payload),
        }
    }
}

/// Owned datapoint value, as decoded from a frame.
#[cfg_attr(test, derive(proptest_derive::Arbitrary))]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum Payload {
    Text(String),
    Int(i64),
    Real(#[serde(with = "real")] f64),
    Binary(Vec<u8>),
    Counter,
}

/// Datapoint value as submitted; exactly one kind per datapoint.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum Value<'a> {
    Text(&'a str),
    Int(i64),
    /// Non-finite values are sent as `"NaN"`, `"inf"` or `"-inf"`.
    Real(#[serde(serialize_with = "real::serialize")] f64),
    Binary(&'a [u8]),
    /// Event marker; tags and timestamp only.
    Counter,
}

impl<'a> From<&'a Payload> for Value<'a> {
    fn from(value: &'a Payload) -> Self {
        match value {
            Payload::Text(text) => Value::Text(text),
            Payload::Int(int) => Value::Int(*int),
            Payload::Real(real) => Value::Real(*real),
            Payload::Binary(binary) => Value::Binary(binary),
            Payload::Counter => Value::Counter,
        }
    }
}

impl Value<'_> {
    /// Representation of the value safe to embed in an error message.
    ///
    /// Binary data is rendered as hex, truncated after 16 bytes.
    #[must_use]
    pub fn quote(&self) -> String {
        match self {
            Value::Text(text) => format!("{text:?}"),
            Value::Int(int) => int.to_string(),
            Value::Real(real) => real.to_string(),
            Value::Binary(binary) => {
                let mut quoted = String::with_capacity(BINARY_QUOTE_LIMIT * 2 + 16);
                for byte in binary.iter().take(BINARY_QUOTE_LIMIT) {
                    let _ = write!(quoted, "{byte:02x}");
                }
                if binary.len() > BINARY_QUOTE_LIMIT {
                    quoted.push_str("..");
                }
                let _ = write!(quoted, " ({} bytes)", binary.len());

                quoted
            }
            Value::Counter => NO_VALUE.to_string(),
        }
    }
}

/// JSON has no non-finite numbers; those travel as strings instead of `null`.
mod real {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    const NAN: &str = "NaN";
    const INFINITY: &str = "inf";
    const NEG_INFINITY: &str = "-inf";

    #[allow(clippy::trivially_copy_pass_by_ref)]
    pub(super) fn serialize<S>(value: &f64, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match *value {
            value if value.is_finite() => serializer.serialize_f64(value),
            value if value.is_nan() => serializer.serialize_str(NAN),
            value if value.is_sign_positive() => serializer.serialize_str(INFINITY),
            _ => serializer.serialize_str(NEG_INFINITY),
        }
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawReal {
        Number(f64),
        Named(String),
    }

    pub(super) fn deserialize<'de, D>(deserializer: D) -> Result<f64, D::Error>
    where
        D: Deserializer<'de>,
    {
        match RawReal::deserialize(deserializer)? {
            RawReal::Number(value) => Ok(value),
            RawReal::Named(name) => match name.as_str() {
                NAN => Ok(f64::NAN),
                INFINITY => Ok(f64::INFINITY),
                NEG_INFINITY => Ok(f64::NEG_INFINITY),
                _ => Err(D::Error::custom(format!("invalid real; value={name:?}"))),
            },
        }
    }
}
