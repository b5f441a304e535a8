//! Transport seam
//!
//! Everything that talks to the network goes through [`HttpFetcher`]:
//! - the prober's profile GET and pre-probe hooks
//! - the secondary validator's HEAD, manual-redirect and JSON probes
//! - the status triage pass
//!
//! The reqwest implementation lives in `aliasmap-http`; tests use
//! [`crate::fakes::StubFetcher`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// HTTP method used by a probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Head,
}

/// Redirect handling for a single request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RedirectPolicy {
    /// Follow redirects and report the final URL
    Follow,
    /// Return the 3xx response as-is so `Location` can be inspected
    Manual,
}

/// A single outbound request
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub url: String,
    pub method: Method,
    pub redirect: RedirectPolicy,
    pub timeout: Duration,
    /// Send `Accept: application/json`
    pub accept_json: bool,
}

impl FetchRequest {
    pub fn get(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            method: Method::Get,
            redirect: RedirectPolicy::Follow,
            timeout,
            accept_json: false,
        }
    }

    pub fn head(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            method: Method::Head,
            ..Self::get(url, timeout)
        }
    }

    pub fn manual_redirect(mut self) -> Self {
        self.redirect = RedirectPolicy::Manual;
        self
    }

    pub fn json(mut self) -> Self {
        self.accept_json = true;
        self
    }
}

/// Response as seen by the classifier and validator
#[derive(Debug, Clone, Default)]
pub struct FetchResponse {
    pub status: u16,
    /// URL after redirects (equal to the request URL under manual policy)
    pub final_url: String,
    /// Raw `Location` header, if any
    pub location: Option<String>,
    /// Header map with lowercased names
    pub headers: HashMap<String, String>,
    pub body: String,
    pub elapsed: Duration,
}

impl FetchResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_redirect(&self) -> bool {
        (300..400).contains(&self.status)
    }
}

/// Errors from the transport layer
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("ETIMEDOUT")]
    Timeout(Duration),

    #[error("{0}")]
    Connect(String),

    #[error("{0}")]
    Request(String),

    #[error("Failed to build HTTP client: {0}")]
    ClientBuild(String),
}

/// Pluggable HTTP backend
#[async_trait]
pub trait HttpFetcher: Send + Sync {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, TransportError>;
}

/// Shared fetcher handle
pub type SharedFetcher = Arc<dyn HttpFetcher>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_builders() {
        let req = FetchRequest::head("https://example.com/a", Duration::from_secs(2))
            .manual_redirect()
            .json();
        assert_eq!(req.method, Method::Head);
        assert_eq!(req.redirect, RedirectPolicy::Manual);
        assert!(req.accept_json);
    }

    #[test]
    fn test_timeout_message() {
        let err = TransportError::Timeout(Duration::from_millis(3500));
        assert_eq!(err.to_string(), "ETIMEDOUT");
    }

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let mut response = FetchResponse::default();
        response
            .headers
            .insert("content-type".into(), "text/html".into());
        assert_eq!(response.header("Content-Type"), Some("text/html"));
    }
}
