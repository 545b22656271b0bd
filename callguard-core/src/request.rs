//! Call identity and cache-key derivation.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// HTTP method of a call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    /// GET.
    #[default]
    Get,
    /// POST.
    Post,
    /// PUT.
    Put,
    /// PATCH.
    Patch,
    /// DELETE.
    Delete,
    /// HEAD.
    Head,
}

impl Method {
    /// Canonical upper-case name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
            Self::Head => "HEAD",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The full identity of one logical outbound call.
///
/// Two structurally identical requests share a cache slot; any differing
/// field (including parameter or header order) yields a different slot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallRequest {
    /// HTTP method.
    pub method: Method,
    /// Endpoint URL.
    pub endpoint: String,
    /// Query parameters, in order.
    pub params: Vec<(String, String)>,
    /// Request headers, in order.
    pub headers: Vec<(String, String)>,
    /// Request body.
    pub body: Option<Bytes>,
}

impl CallRequest {
    /// Create a request for `method` and `endpoint`.
    #[must_use]
    pub fn new(method: Method, endpoint: impl Into<String>) -> Self {
        Self {
            method,
            endpoint: endpoint.into(),
            ..Default::default()
        }
    }

    /// Create a GET request.
    #[must_use]
    pub fn get(endpoint: impl Into<String>) -> Self {
        Self::new(Method::Get, endpoint)
    }

    /// Create a POST request.
    #[must_use]
    pub fn post(endpoint: impl Into<String>) -> Self {
        Self::new(Method::Post, endpoint)
    }

    /// Append a query parameter.
    #[must_use]
    pub fn param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((name.into(), value.into()));
        self
    }

    /// Append a header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Set the body.
    #[must_use]
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Set a JSON body.
    pub fn json<B: Serialize>(mut self, body: &B) -> serde_json::Result<Self> {
        self.body = Some(Bytes::from(serde_json::to_vec(body)?));
        Ok(self)
    }

    /// Deterministic SHA-256 digest (hex) over the whole call identity.
    ///
    /// Fields are length-prefixed so that no concatenation of two different
    /// identities produces the same byte stream.
    #[must_use]
    pub fn cache_key(&self) -> String {
        let mut hasher = Sha256::new();
        write_field(&mut hasher, self.method.as_str().as_bytes());
        write_field(&mut hasher, self.endpoint.as_bytes());

        hasher.update((self.params.len() as u64).to_be_bytes());
        for (name, value) in &self.params {
            write_field(&mut hasher, name.as_bytes());
            write_field(&mut hasher, value.as_bytes());
        }

        hasher.update((self.headers.len() as u64).to_be_bytes());
        for (name, value) in &self.headers {
            write_field(&mut hasher, name.as_bytes());
            write_field(&mut hasher, value.as_bytes());
        }

        match &self.body {
            Some(body) => {
                hasher.update([1u8]);
                write_field(&mut hasher, body);
            }
            None => hasher.update([0u8]),
        }

        hex_digest(hasher)
    }
}

fn write_field(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_be_bytes());
    hasher.update(bytes);
}

/// One-way SHA-256 hex digest of an arbitrary key.
#[must_use]
pub fn hash_key(key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    hex_digest(hasher)
}

fn hex_digest(hasher: Sha256) -> String {
    use std::fmt::Write;
    let digest = hasher.finalize();
    let mut s = String::with_capacity(digest.len() * 2);
    for b in digest {
        let _ = write!(s, "{:02x}", b);
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn base() -> CallRequest {
        CallRequest::get("https://api.example.com/users")
            .param("page", "1")
            .param("limit", "20")
            .header("accept", "application/json")
    }

    #[test]
    fn test_identical_requests_share_key() {
        assert_eq!(base().cache_key(), base().cache_key());
        assert_eq!(base().cache_key().len(), 64);
    }

    #[rstest]
    #[case::method(CallRequest { method: Method::Post, ..base() })]
    #[case::endpoint(CallRequest { endpoint: "https://api.example.com/user".into(), ..base() })]
    #[case::param_value(base().param("x", "y"))]
    #[case::header(base().header("x-trace", "1"))]
    #[case::body(base().body("{}"))]
    fn test_differing_field_changes_key(#[case] other: CallRequest) {
        assert_ne!(base().cache_key(), other.cache_key());
    }

    #[test]
    fn test_param_order_matters() {
        let a = CallRequest::get("/x").param("a", "1").param("b", "2");
        let b = CallRequest::get("/x").param("b", "2").param("a", "1");
        assert_ne!(a.cache_key(), b.cache_key());
    }

    #[test]
    fn test_field_boundaries_are_unambiguous() {
        let a = CallRequest::get("/x").param("ab", "c");
        let b = CallRequest::get("/x").param("a", "bc");
        assert_ne!(a.cache_key(), b.cache_key());
    }

    #[test]
    fn test_empty_body_differs_from_no_body() {
        let a = CallRequest::post("/x");
        let b = CallRequest::post("/x").body(Vec::new());
        assert_ne!(a.cache_key(), b.cache_key());
    }

    #[test]
    fn test_hash_key_is_stable() {
        assert_eq!(
            hash_key("user_123"),
            hash_key("user_123"),
        );
        assert_ne!(hash_key("user_123"), hash_key("user_124"));
    }
}
