//! In-memory fakes for tests
//!
//! [`StubFetcher`] answers requests from a table keyed by method and URL.
//! Unknown requests fail with a connect error, so a test only has to
//! describe the responses it cares about.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::transport::{
    FetchRequest, FetchResponse, HttpFetcher, Method, RedirectPolicy, TransportError,
};

type Key = (Method, String);

/// Table-driven [`HttpFetcher`]
#[derive(Debug, Default)]
pub struct StubFetcher {
    responses: HashMap<Key, Result<FetchResponse, TransportError>>,
    manual: HashMap<Key, FetchResponse>,
    delays: HashMap<String, Duration>,
    requests: Mutex<Vec<FetchRequest>>,
}

impl StubFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(mut self, method: Method, url: &str, response: FetchResponse) -> Self {
        self.responses
            .insert((method, url.to_string()), Ok(response));
        self
    }

    /// Response used only for manual-redirect requests to this URL
    pub fn respond_manual(mut self, method: Method, url: &str, response: FetchResponse) -> Self {
        self.manual.insert((method, url.to_string()), response);
        self
    }

    /// 200 GET with a body, final URL equal to the request URL
    pub fn page(self, url: &str, body: &str) -> Self {
        self.respond(
            Method::Get,
            url,
            FetchResponse {
                status: 200,
                final_url: url.to_string(),
                body: body.to_string(),
                ..Default::default()
            },
        )
    }

    /// Bare status for GET and HEAD
    pub fn status(self, url: &str, status: u16) -> Self {
        let response = FetchResponse {
            status,
            final_url: url.to_string(),
            ..Default::default()
        };
        self.respond(Method::Get, url, response.clone())
            .respond(Method::Head, url, response)
    }

    pub fn fail(mut self, method: Method, url: &str, error: TransportError) -> Self {
        self.responses.insert((method, url.to_string()), Err(error));
        self
    }

    /// Delay every response for this URL
    pub fn delay(mut self, url: &str, delay: Duration) -> Self {
        self.delays.insert(url.to_string(), delay);
        self
    }

    /// Requests seen so far, in arrival order
    pub fn requests(&self) -> Vec<FetchRequest> {
        self.requests.lock().clone()
    }

    pub fn request_count(&self, url: &str) -> usize {
        self.requests.lock().iter().filter(|r| r.url == url).count()
    }
}

#[async_trait]
impl HttpFetcher for StubFetcher {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, TransportError> {
        self.requests.lock().push(request.clone());
        if let Some(delay) = self.delays.get(&request.url) {
            tokio::time::sleep(*delay).await;
        }

        let key = (request.method, request.url.clone());
        if request.redirect == RedirectPolicy::Manual {
            if let Some(response) = self.manual.get(&key) {
                return Ok(response.clone());
            }
        }
        match self.responses.get(&key) {
            Some(result) => result.clone(),
            None => Err(TransportError::Connect(format!(
                "no stub for {:?} {}",
                request.method, request.url
            ))),
        }
    }
}
