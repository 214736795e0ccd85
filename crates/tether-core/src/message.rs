//! Structured message values exchanged with worker contexts.
//!
//! Messages are plain JSON data: primitives, arrays and objects. Anything
//! `serde` can turn into a `serde_json::Value` can cross the boundary.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// A message passed between a handle and its worker context.
///
/// The handle never inspects the payload; it is handed through as is.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Message(Value);

impl Message {
    /// Encode any serializable value as a message.
    pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
        serde_json::to_value(value)
            .map(Self)
            .map_err(|e| Error::Serialization(format!("Failed to encode message: {}", e)))
    }

    /// Decode the message into a concrete type.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        T::deserialize(&self.0)
            .map_err(|e| Error::Deserialization(format!("Failed to decode message: {}", e)))
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }

    pub fn as_i64(&self) -> Option<i64> {
        self.0.as_i64()
    }

    pub fn as_str(&self) -> Option<&str> {
        self.0.as_str()
    }

    /// Wire form used by the process host (compact JSON bytes).
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(&self.0)
            .map_err(|e| Error::Serialization(format!("Failed to encode message payload: {}", e)))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map(Self)
            .map_err(|e| Error::Deserialization(format!("Failed to decode message payload: {}", e)))
    }
}

impl From<Value> for Message {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

impl From<Message> for Value {
    fn from(message: Message) -> Self {
        message.0
    }
}

macro_rules! impl_from_primitive {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for Message {
                fn from(value: $ty) -> Self {
                    Self(Value::from(value))
                }
            }
        )*
    };
}

impl_from_primitive!(bool, i32, i64, u32, u64, f64, String, &str);

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Job {
        id: u32,
        tags: Vec<String>,
    }

    #[test]
    fn test_encode_and_decode_struct() {
        let job = Job { id: 7, tags: vec!["a".into(), "b".into()] };
        let message = Message::encode(&job).unwrap();
        assert_eq!(message.as_value(), &json!({ "id": 7, "tags": ["a", "b"] }));
        assert_eq!(message.decode::<Job>().unwrap(), job);
    }

    #[test]
    fn test_decode_wrong_shape_fails() {
        let message = Message::from("not a job");
        let err = message.decode::<Job>().unwrap_err();
        assert!(matches!(err, Error::Deserialization(_)));
    }

    #[test]
    fn test_primitive_conversions() {
        assert_eq!(Message::from(21).as_i64(), Some(21));
        assert_eq!(Message::from("hi").as_str(), Some("hi"));
        assert_eq!(Message::from(true).into_value(), json!(true));
    }

    #[test]
    fn test_wire_bytes_are_plain_json() {
        let message = Message::from(json!([1, 2, 3]));
        let bytes = message.to_bytes().unwrap();
        assert_eq!(bytes, b"[1,2,3]");
        assert_eq!(Message::from_bytes(&bytes).unwrap(), message);
    }

    #[test]
    fn test_invalid_wire_bytes() {
        assert!(Message::from_bytes(b"{oops").is_err());
    }
}
