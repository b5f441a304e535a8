//! Status-code triage
//!
//! A cheaper pass than the full prober: the status code decides wherever it
//! can, and only ambiguous 2xx pages get a quick look at their profile URLs.
//!
//! | status            | verdict      |
//! |-------------------|--------------|
//! | 404, 410          | not_found    |
//! | 401, 403, 429     | inconclusive |
//! | 3xx (unfollowed)  | inconclusive |
//! | 5xx               | error        |
//! | anything else     | URL heuristic: found or inconclusive |

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt};
use tracing::{debug, info};

use aliasmap_core::{
    Evidence, EvidenceKind, FetchRequest, FetchResponse, PageEvidence, ProbeStatus,
    ProfileMatcher, SharedFetcher, SiteResult, SiteSpec, HANDLE_PLACEHOLDER,
};

use crate::prober::HANDLE_NOT_ALLOWED;

pub const TRIAGE_DEFAULT_CONCURRENCY: usize = 10;
pub const TRIAGE_MAX_CONCURRENCY: usize = 24;

/// Triage configuration
#[derive(Debug, Clone)]
pub struct TriageConfig {
    pub concurrency: usize,
    /// Per-request timeout, never below one second
    pub timeout: Duration,
}

impl Default for TriageConfig {
    fn default() -> Self {
        Self {
            concurrency: TRIAGE_DEFAULT_CONCURRENCY,
            timeout: Duration::from_millis(6000),
        }
    }
}

impl TriageConfig {
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    fn effective_concurrency(&self) -> usize {
        self.concurrency.clamp(1, TRIAGE_MAX_CONCURRENCY)
    }

    fn effective_timeout(&self) -> Duration {
        self.timeout.max(Duration::from_millis(1000))
    }
}

/// Verdict decided by the status code alone
pub fn status_verdict(status: u16) -> Option<ProbeStatus> {
    match status {
        404 | 410 => Some(ProbeStatus::NotFound),
        401 | 403 | 429 => Some(ProbeStatus::Inconclusive),
        300..=399 => Some(ProbeStatus::Inconclusive),
        500..=599 => Some(ProbeStatus::Error),
        _ => None,
    }
}

fn heuristic(
    site: &SiteSpec,
    response: &FetchResponse,
    url: &str,
    handle: &str,
) -> (ProbeStatus, Vec<Evidence>) {
    let Some(matcher) = ProfileMatcher::new(&site.url_template, handle) else {
        return (ProbeStatus::Inconclusive, Vec::new());
    };
    if matcher.matches(&response.final_url) {
        return (
            ProbeStatus::Found,
            vec![Evidence::new(EvidenceKind::FinalUrl, &response.final_url)],
        );
    }

    let page = PageEvidence::parse(&response.body, url);
    if let Some(canonical) = page.canonical.filter(|c| matcher.matches(c)) {
        return (
            ProbeStatus::Found,
            vec![Evidence::new(EvidenceKind::Canonical, canonical)],
        );
    }
    if let Some(og) = page.og_url.filter(|u| matcher.matches(u)) {
        return (
            ProbeStatus::Found,
            vec![Evidence::new(EvidenceKind::OgUrl, og)],
        );
    }
    (ProbeStatus::Inconclusive, Vec::new())
}

/// Map one response to a triage verdict
pub fn triage_response(site: &SiteSpec, handle: &str, url: &str, response: &FetchResponse) -> SiteResult {
    let (status, evidence) = match status_verdict(response.status) {
        Some(status) => (status, Vec::new()),
        None => heuristic(site, response, url, handle),
    };
    let mut result = SiteResult::new(&site.id, status, url).with_evidence(evidence);
    if status != ProbeStatus::Found {
        result.reason = Some(format!("HTTP {}", response.status));
    }
    result
}

/// Triage one site
pub async fn triage_site(
    fetcher: &SharedFetcher,
    site: &SiteSpec,
    raw_handle: &str,
    config: &TriageConfig,
) -> SiteResult {
    let start = Instant::now();
    let Some(handle) = site.normalize(raw_handle) else {
        let url = site
            .url_template
            .replace(HANDLE_PLACEHOLDER, &urlencoding::encode(raw_handle.trim()));
        return SiteResult::new(&site.id, ProbeStatus::Inconclusive, url)
            .with_reason(HANDLE_NOT_ALLOWED);
    };
    let url = site.profile_url(&handle);
    let request = FetchRequest::get(url.as_str(), config.effective_timeout());

    let result = match fetcher.fetch(request).await {
        Ok(response) => triage_response(site, &handle, &url, &response),
        Err(e) => SiteResult::new(&site.id, ProbeStatus::Error, &url).with_reason(e.to_string()),
    };
    debug!("{}: triage {}", site.id, result.status);
    result.with_latency(start.elapsed().as_millis() as u64)
}

/// Triage many sites with bounded concurrency. Results come back in
/// completion order.
pub async fn triage_sites(
    fetcher: &SharedFetcher,
    sites: &[Arc<SiteSpec>],
    handle: &str,
    config: &TriageConfig,
) -> Vec<SiteResult> {
    let concurrency = config.effective_concurrency();
    info!("Triaging {} sites ({} at a time)", sites.len(), concurrency);

    stream::iter(sites.iter().cloned())
        .map(|site| async move { triage_site(fetcher, &site, handle, config).await })
        .buffer_unordered(concurrency)
        .collect()
        .await
}
