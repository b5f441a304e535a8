//! reqwest-backed transport
//!
//! Two clients share one configuration: one follows redirects, the other
//! returns 3xx responses untouched so callers can read `Location`.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, LOCATION, USER_AGENT};
use reqwest::{redirect, Client, Proxy};
use tracing::debug;

use aliasmap_core::{
    FetchRequest, FetchResponse, HttpFetcher, Method, RedirectPolicy, TransportError,
    DEFAULT_USER_AGENT,
};

/// HTTP client configuration
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Optional proxy, e.g. `socks5h://127.0.0.1:9050`
    pub proxy: Option<String>,
    /// Pick a random desktop user agent per request
    pub rotate_user_agent: bool,
    /// Bodies are truncated past this many bytes
    pub max_body_bytes: usize,
    /// Redirect hops followed before giving up
    pub max_redirects: usize,
    pub connect_timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            proxy: None,
            rotate_user_agent: false,
            max_body_bytes: 2 * 1024 * 1024,
            max_redirects: 10,
            connect_timeout_secs: 10,
        }
    }
}

/// User agents for rotation
const USER_AGENTS: &[&str] = &[
    DEFAULT_USER_AGENT,
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:120.0) Gecko/20100101 Firefox/120.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 14.1; rv:120.0) Gecko/20100101 Firefox/120.0",
];

/// Get a random user agent
pub fn random_user_agent() -> &'static str {
    use rand::Rng;
    let idx = rand::thread_rng().gen_range(0..USER_AGENTS.len());
    USER_AGENTS[idx]
}

fn build_client(config: &HttpConfig, policy: redirect::Policy) -> Result<Client, TransportError> {
    let mut builder = Client::builder()
        .redirect(policy)
        .connect_timeout(Duration::from_secs(config.connect_timeout_secs));

    if let Some(proxy) = &config.proxy {
        let proxy = Proxy::all(proxy).map_err(|e| TransportError::ClientBuild(e.to_string()))?;
        builder = builder.proxy(proxy);
    }

    builder
        .build()
        .map_err(|e| TransportError::ClientBuild(e.to_string()))
}

fn map_error(error: reqwest::Error, timeout: Duration) -> TransportError {
    if error.is_timeout() {
        TransportError::Timeout(timeout)
    } else if error.is_connect() {
        TransportError::Connect(error.to_string())
    } else {
        TransportError::Request(error.to_string())
    }
}

/// Append at most `cap - buf.len()` bytes of `chunk`; true once the cap is hit
fn append_capped(buf: &mut Vec<u8>, chunk: &[u8], cap: usize) -> bool {
    let room = cap.saturating_sub(buf.len());
    buf.extend_from_slice(&chunk[..chunk.len().min(room)]);
    buf.len() >= cap
}

/// [`HttpFetcher`] over reqwest
#[derive(Debug, Clone)]
pub struct ReqwestFetcher {
    follow: Client,
    manual: Client,
    config: HttpConfig,
}

impl ReqwestFetcher {
    pub fn new(config: HttpConfig) -> Result<Self, TransportError> {
        let follow = build_client(&config, redirect::Policy::limited(config.max_redirects))?;
        let manual = build_client(&config, redirect::Policy::none())?;
        Ok(Self {
            follow,
            manual,
            config,
        })
    }

    fn user_agent(&self) -> &'static str {
        if self.config.rotate_user_agent {
            random_user_agent()
        } else {
            DEFAULT_USER_AGENT
        }
    }
}

#[async_trait]
impl HttpFetcher for ReqwestFetcher {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, TransportError> {
        let client = match request.redirect {
            RedirectPolicy::Follow => &self.follow,
            RedirectPolicy::Manual => &self.manual,
        };
        let builder = match request.method {
            Method::Get => client.get(&request.url),
            Method::Head => client.head(&request.url),
        };
        let mut builder = builder
            .timeout(request.timeout)
            .header(USER_AGENT, self.user_agent())
            .header(ACCEPT_LANGUAGE, aliasmap_core::ACCEPT_LANGUAGE);
        if request.accept_json {
            builder = builder.header(ACCEPT, "application/json");
        }

        let start = Instant::now();
        let mut response = builder
            .send()
            .await
            .map_err(|e| map_error(e, request.timeout))?;

        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let headers: HashMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(String::from);

        let mut bytes: Vec<u8> = Vec::new();
        if request.method == Method::Get {
            while let Some(chunk) = response
                .chunk()
                .await
                .map_err(|e| map_error(e, request.timeout))?
            {
                if append_capped(&mut bytes, &chunk, self.config.max_body_bytes) {
                    debug!("Truncated body of {} at {} bytes", request.url, bytes.len());
                    break;
                }
            }
        }

        Ok(FetchResponse {
            status,
            final_url,
            location,
            headers,
            body: String::from_utf8_lossy(&bytes).into_owned(),
            elapsed: start.elapsed(),
        })
    }
}
