//! Transport abstraction: one HTTP exchange per call.

use crate::error::TransportError;
use crate::payload::Payload;
use crate::request::CallRequest;
use async_trait::async_trait;
use std::sync::Arc;

/// Performs a single exchange for a [`CallRequest`].
///
/// Implementations do not retry; retries are the executor's job.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send the request and return the raw response body.
    async fn send(&self, request: &CallRequest) -> Result<Payload, TransportError>;
}

/// Shared transport handle.
pub type BoxedTransport = Arc<dyn Transport>;

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn send(&self, request: &CallRequest) -> Result<Payload, TransportError> {
        (**self).send(request).await
    }
}

#[cfg(feature = "http")]
pub use http::{HttpTransport, HttpTransportBuilder};

#[cfg(feature = "http")]
mod http {
    use super::*;
    use crate::request::Method as CallMethod;
    use reqwest::{Client, Method, Response};
    use std::time::Duration;
    use tracing::debug;

    impl From<reqwest::Error> for TransportError {
        fn from(err: reqwest::Error) -> Self {
            if err.is_timeout() {
                TransportError::Timeout
            } else if err.is_connect() {
                TransportError::Connection(err.to_string())
            } else {
                TransportError::Other(err.into())
            }
        }
    }

    /// [`Transport`] backed by a `reqwest` client.
    #[derive(Debug, Clone, Default)]
    pub struct HttpTransport {
        client: Client,
    }

    impl HttpTransport {
        /// Create a transport with a default client.
        pub fn new() -> Self {
            Self::default()
        }

        /// Create with a custom reqwest client.
        pub fn with_client(client: Client) -> Self {
            Self { client }
        }

        /// Create a builder.
        pub fn builder() -> HttpTransportBuilder {
            HttpTransportBuilder::default()
        }

        /// Get a reference to the underlying client.
        pub fn client(&self) -> &Client {
            &self.client
        }
    }

    fn to_reqwest(method: CallMethod) -> Method {
        match method {
            CallMethod::Get => Method::GET,
            CallMethod::Post => Method::POST,
            CallMethod::Put => Method::PUT,
            CallMethod::Patch => Method::PATCH,
            CallMethod::Delete => Method::DELETE,
            CallMethod::Head => Method::HEAD,
        }
    }

    #[async_trait]
    impl Transport for HttpTransport {
        async fn send(&self, request: &CallRequest) -> Result<Payload, TransportError> {
            debug!(method = %request.method, url = %request.endpoint, "Making HTTP request");

            let mut builder = self
                .client
                .request(to_reqwest(request.method), &request.endpoint);
            if !request.params.is_empty() {
                builder = builder.query(&request.params);
            }
            for (name, value) in &request.headers {
                builder = builder.header(name.as_str(), value.as_str());
            }
            if let Some(body) = &request.body {
                builder = builder.body(body.clone());
            }

            let response = builder.send().await?;
            let response = check_response(response).await?;
            let body = response.bytes().await?;
            Ok(Payload::new(body))
        }
    }

    /// Check an HTTP response and convert to TransportError if needed.
    async fn check_response(response: Response) -> Result<Response, TransportError> {
        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status().as_u16();
        let retry_after = if status == 429 || (500..=599).contains(&status) {
            parse_retry_after(&response)
        } else {
            None
        };
        let body = response.text().await.unwrap_or_default();
        Err(TransportError::Http {
            status,
            body,
            retry_after,
        })
    }

    /// Parse Retry-After header (delta-seconds form).
    fn parse_retry_after(response: &Response) -> Option<Duration> {
        response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse::<u64>().ok())
            .map(Duration::from_secs)
    }

    /// Builder for [`HttpTransport`].
    #[derive(Debug, Default)]
    pub struct HttpTransportBuilder {
        timeout: Option<Duration>,
        connect_timeout: Option<Duration>,
        user_agent: Option<String>,
    }

    impl HttpTransportBuilder {
        /// Set the per-exchange timeout.
        #[must_use]
        pub fn timeout(mut self, timeout: Duration) -> Self {
            self.timeout = Some(timeout);
            self
        }

        /// Set the connect timeout.
        #[must_use]
        pub fn connect_timeout(mut self, timeout: Duration) -> Self {
            self.connect_timeout = Some(timeout);
            self
        }

        /// Set the user agent.
        #[must_use]
        pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
            self.user_agent = Some(agent.into());
            self
        }

        /// Build the transport.
        pub fn build(self) -> Result<HttpTransport, TransportError> {
            let mut builder = Client::builder();
            if let Some(timeout) = self.timeout {
                builder = builder.timeout(timeout);
            }
            if let Some(timeout) = self.connect_timeout {
                builder = builder.connect_timeout(timeout);
            }
            if let Some(agent) = self.user_agent {
                builder = builder.user_agent(agent);
            }
            Ok(HttpTransport::with_client(builder.build()?))
        }
    }

}
