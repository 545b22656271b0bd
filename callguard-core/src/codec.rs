//! Payload codec interface.
//!
//! The orchestrator treats payloads as opaque; a codec is consumed
//! optionally to interpret a transport result.

use crate::payload::Payload;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Body formats a codec may understand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadFormat {
    /// JSON document.
    Json,
    /// XML document.
    Xml,
    /// HTML document.
    Html,
}

/// Validates and parses payload bodies.
pub trait PayloadCodec: Send + Sync {
    /// Whether this codec handles `format`.
    fn supports(&self, format: PayloadFormat) -> bool;

    /// Check that `payload` is well-formed `format`.
    fn validate(&self, payload: &Payload, format: PayloadFormat) -> bool;

    /// Parse `payload` into a JSON value, or `None` when it is not valid.
    fn parse(&self, payload: &Payload, format: PayloadFormat) -> Option<serde_json::Value>;
}

/// Codec for JSON bodies.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl JsonCodec {
    /// Decode a payload straight into a typed value.
    pub fn decode<T: DeserializeOwned>(payload: &Payload) -> serde_json::Result<T> {
        serde_json::from_slice(payload.as_bytes())
    }

    /// Encode a value into a payload.
    pub fn encode<T: Serialize>(value: &T) -> serde_json::Result<Payload> {
        serde_json::to_vec(value).map(Payload::from)
    }
}

impl PayloadCodec for JsonCodec {
    fn supports(&self, format: PayloadFormat) -> bool {
        format == PayloadFormat::Json
    }

    fn validate(&self, payload: &Payload, format: PayloadFormat) -> bool {
        self.parse(payload, format).is_some()
    }

    fn parse(&self, payload: &Payload, format: PayloadFormat) -> Option<serde_json::Value> {
        if !self.supports(format) {
            return None;
        }
        serde_json::from_slice(payload.as_bytes()).ok()
    }
}
