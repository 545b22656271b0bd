//! Opaque response payloads.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Raw body returned by a transport.
///
/// Serializes as base64 so it can be stored in JSON cache records.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Payload {
    #[serde(with = "base64_serde")]
    data: Bytes,
}

impl Payload {
    /// Create a payload from raw bytes.
    #[must_use]
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }

    /// Borrow the raw bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Consume into the underlying bytes.
    #[must_use]
    pub fn into_bytes(self) -> Bytes {
        self.data
    }

    /// Interpret the payload as UTF-8 text.
    pub fn text(&self) -> Result<&str, std::str::Utf8Error> {
        std::str::from_utf8(&self.data)
    }

    /// Check if the payload is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Get the payload length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }
}

impl From<Vec<u8>> for Payload {
    fn from(data: Vec<u8>) -> Self {
        Self::new(data)
    }
}

impl From<&'static str> for Payload {
    fn from(data: &'static str) -> Self {
        Self::new(data)
    }
}

impl From<String> for Payload {
    fn from(data: String) -> Self {
        Self::new(data)
    }
}

mod base64_serde {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(data: &Bytes, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(data))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Bytes, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        STANDARD
            .decode(&s)
            .map(Bytes::from)
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_serializes_as_base64() {
        let payload = Payload::from("hello");
        let json = serde_json::to_string(&payload).unwrap();
        assert_eq!(json, "\"aGVsbG8=\"");

        let back: Payload = serde_json::from_str(&json).unwrap();
        assert_eq!(back.text().unwrap(), "hello");
    }

    #[test]
    fn test_payload_rejects_invalid_base64() {
        assert!(serde_json::from_str::<Payload>("\"not base64!\"").is_err());
    }
}
