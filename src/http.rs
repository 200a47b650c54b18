//! The HTTP side of the engine.
//!
//! The engine never constructs requests itself beyond method + URL; everything
//! transport-related (connection pooling, TLS, redirects) belongs to the
//! [`HttpClient`] implementation. The built-in [`ReqwestClient`] adapter is
//! available behind the default `reqwest-client` feature; tests supply their
//! own mock clients.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
    Head,
    Patch,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Head => "HEAD",
            Method::Patch => "PATCH",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the engine needs to know about a completed exchange.
///
/// `duration` is measured by the client (send → body fully received) so that
/// mock clients in tests can fabricate timings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HttpResponse {
    pub status: u16,
    pub body_length: u64,
    pub duration: Duration,
}

/// A request that never produced a response.
///
/// Transport errors are recovered locally by the virtual user that hit them:
/// they are recorded as failed checks and a failed `http_req_failed`
/// observation, never raised out of the worker loop.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransportError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("dns resolution failed: {0}")]
    Dns(String),
    #[error("transport error: {0}")]
    Other(String),
}

/// External collaborator that performs one HTTP exchange.
///
/// `name` carries the request's tag (if any) so clients that export their own
/// telemetry can label traffic; the engine itself only uses it for logging.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn request(
        &self,
        method: Method,
        url: &str,
        timeout: Duration,
        name: Option<&str>,
    ) -> Result<HttpResponse, TransportError>;
}

#[cfg(feature = "reqwest-client")]
pub use reqwest_client::ReqwestClient;

#[cfg(feature = "reqwest-client")]
mod reqwest_client {
    use std::time::Instant;

    use super::*;

    /// [`HttpClient`] adapter over a pooled [`reqwest::Client`].
    ///
    /// Connection reuse is reqwest's concern; one `ReqwestClient` should be
    /// shared by every virtual user in a run.
    #[derive(Clone, Default)]
    pub struct ReqwestClient {
        inner: reqwest::Client,
    }

    impl ReqwestClient {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_client(inner: reqwest::Client) -> Self {
            Self { inner }
        }
    }

    fn classify(err: reqwest::Error, timeout: Duration) -> TransportError {
        if err.is_timeout() {
            TransportError::Timeout(timeout)
        } else if err.is_connect() {
            TransportError::Connect(err.to_string())
        } else {
            TransportError::Other(err.to_string())
        }
    }

    impl From<Method> for reqwest::Method {
        fn from(method: Method) -> Self {
            match method {
                Method::Get => reqwest::Method::GET,
                Method::Post => reqwest::Method::POST,
                Method::Put => reqwest::Method::PUT,
                Method::Delete => reqwest::Method::DELETE,
                Method::Head => reqwest::Method::HEAD,
                Method::Patch => reqwest::Method::PATCH,
            }
        }
    }

    #[async_trait]
    impl HttpClient for ReqwestClient {
        async fn request(
            &self,
            method: Method,
            url: &str,
            timeout: Duration,
            _name: Option<&str>,
        ) -> Result<HttpResponse, TransportError> {
            let started = Instant::now();
            let response = self
                .inner
                .request(method.into(), url)
                .timeout(timeout)
                .send()
                .await
                .map_err(|e| classify(e, timeout))?;
            let status = response.status().as_u16();
            let body = response
                .bytes()
                .await
                .map_err(|e| classify(e, timeout))?;
            Ok(HttpResponse {
                status,
                body_length: body.len() as u64,
                duration: started.elapsed(),
            })
        }
    }
}
