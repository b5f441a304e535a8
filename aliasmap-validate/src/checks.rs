//! Independent corroborating checks
//!
//! Each check looks at one signal and reports how strongly it speaks for or
//! against the profile existing. The profile page and its HEAD response are
//! fetched at most once per validation and shared between checks.

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use regex::{Regex, RegexBuilder};
use reqwest::Url;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::OnceCell;

use aliasmap_core::{
    Evidence, EvidenceKind, FetchRequest, FetchResponse, HttpFetcher, PageEvidence,
    ProfileMatcher, SiteResult, SiteSpec, TransportError,
};

/// Location fragments that mean "no such profile"
const NOT_FOUND_REDIRECTS: &[&str] = &["/login", "/signin", "/404", "/error", "/notfound"];

/// Image URLs containing these are placeholders, not profile pictures
const PLACEHOLDER_IMAGES: &[&str] = &["default", "blank"];

static JSON_CONTENT_TYPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)application/([a-z0-9.+-]*\+)?json").unwrap());

/// Errors from a single check
#[derive(Debug, Error)]
pub enum CheckError {
    #[error("{0}")]
    Transport(#[from] TransportError),

    #[error("unexpected status {0}")]
    Status(u16),

    #[error("{0}")]
    Invalid(String),
}

/// Which way a check leans
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stance {
    /// Evidence the profile exists
    Supports,
    /// Evidence the profile does not exist
    Disputes,
    Neutral,
}

/// Result of one check
#[derive(Debug, Clone, PartialEq)]
pub struct CheckOutcome {
    pub confidence: f64,
    pub stance: Stance,
    pub reasons: Vec<String>,
    pub evidence: Vec<Evidence>,
}

impl CheckOutcome {
    fn new(confidence: f64, stance: Stance, reason: impl Into<String>) -> Self {
        Self {
            confidence: confidence.clamp(0.0, 1.0),
            stance,
            reasons: vec![reason.into()],
            evidence: Vec::new(),
        }
    }

    pub fn supports(confidence: f64, reason: impl Into<String>) -> Self {
        Self::new(confidence, Stance::Supports, reason)
    }

    pub fn disputes(confidence: f64, reason: impl Into<String>) -> Self {
        Self::new(confidence, Stance::Disputes, reason)
    }

    pub fn neutral(confidence: f64, reason: impl Into<String>) -> Self {
        Self::new(confidence, Stance::Neutral, reason)
    }

    /// Outcome recorded for a check that failed outright
    pub fn failed(check: &str, error: &CheckError) -> Self {
        Self::neutral(0.1, format!("{} check failed: {}", check, error))
    }

    pub fn with_evidence(mut self, kind: EvidenceKind, value: impl Into<String>) -> Self {
        self.evidence.push(Evidence::new(kind, value));
        self
    }

    /// Score on the "profile exists" axis
    pub fn aligned_score(&self) -> f64 {
        match self.stance {
            Stance::Disputes => 1.0 - self.confidence,
            Stance::Supports | Stance::Neutral => self.confidence,
        }
    }
}

/// Timeouts used by the checks
#[derive(Debug, Clone, Copy)]
pub struct CheckTimeouts {
    pub page: Duration,
    pub head: Duration,
    pub api: Duration,
}

impl Default for CheckTimeouts {
    fn default() -> Self {
        Self {
            page: Duration::from_secs(3),
            head: Duration::from_secs(2),
            api: Duration::from_secs(2),
        }
    }
}

/// Shared state for one validation run
pub struct CheckContext<'a> {
    pub site: &'a SiteSpec,
    /// Normalized handle
    pub handle: &'a str,
    pub primary: &'a SiteResult,
    pub timeouts: CheckTimeouts,
    fetcher: &'a dyn HttpFetcher,
    page: OnceCell<Result<FetchResponse, TransportError>>,
    head: OnceCell<Result<FetchResponse, TransportError>>,
}

impl<'a> CheckContext<'a> {
    pub fn new(
        fetcher: &'a dyn HttpFetcher,
        site: &'a SiteSpec,
        handle: &'a str,
        primary: &'a SiteResult,
        timeouts: CheckTimeouts,
    ) -> Self {
        Self {
            site,
            handle,
            primary,
            timeouts,
            fetcher,
            page: OnceCell::new(),
            head: OnceCell::new(),
        }
    }

    pub fn fetcher(&self) -> &dyn HttpFetcher {
        self.fetcher
    }

    /// Profile page re-fetched with redirects followed; non-2xx is an error
    pub async fn page(&self) -> Result<&FetchResponse, CheckError> {
        let response = self
            .page
            .get_or_init(|| {
                self.fetcher
                    .fetch(FetchRequest::get(self.primary.url.as_str(), self.timeouts.page))
            })
            .await
            .as_ref()
            .map_err(|e| CheckError::Transport(e.clone()))?;
        if !response.is_success() {
            return Err(CheckError::Status(response.status));
        }
        Ok(response)
    }

    /// HEAD response for the profile URL, any status
    pub async fn head(&self) -> Result<&FetchResponse, CheckError> {
        self.head
            .get_or_init(|| {
                self.fetcher
                    .fetch(FetchRequest::head(self.primary.url.as_str(), self.timeouts.head))
            })
            .await
            .as_ref()
            .map_err(|e| CheckError::Transport(e.clone()))
    }
}

/// One corroborating signal
#[async_trait]
pub trait ValidationCheck: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run(&self, ctx: &CheckContext<'_>) -> Result<CheckOutcome, CheckError>;
}

/// The seven standard checks
pub fn default_checks() -> Vec<Arc<dyn ValidationCheck>> {
    vec![
        Arc::new(CanonicalCheck),
        Arc::new(MetaTagCheck),
        Arc::new(MentionCheck),
        Arc::new(HeadStatusCheck),
        Arc::new(RedirectCheck),
        Arc::new(HeaderCheck),
        Arc::new(JsonApiCheck),
    ]
}

/// Re-checks the primary result's canonical link against the expected profile
#[derive(Debug, Clone, Copy)]
pub struct CanonicalCheck;

#[async_trait]
impl ValidationCheck for CanonicalCheck {
    fn name(&self) -> &'static str {
        "canonical"
    }

    async fn run(&self, ctx: &CheckContext<'_>) -> Result<CheckOutcome, CheckError> {
        let Some(canonical) = ctx.primary.evidence_of(EvidenceKind::Canonical) else {
            return Ok(CheckOutcome::neutral(0.3, "No canonical URL found"));
        };
        if Url::parse(canonical).is_err() {
            return Ok(CheckOutcome::neutral(0.1, "Invalid canonical URL"));
        }

        let matcher = ProfileMatcher::new(&ctx.site.url_template, ctx.handle).ok_or_else(|| {
            CheckError::Invalid(format!("bad profile URL template {}", ctx.site.url_template))
        })?;
        if matcher.matches(canonical) {
            Ok(
                CheckOutcome::supports(0.9, "Canonical URL confirms profile exists")
                    .with_evidence(EvidenceKind::ValidationCanonical, canonical),
            )
        } else {
            Ok(CheckOutcome::neutral(
                0.2,
                "Canonical URL does not match expected pattern",
            ))
        }
    }
}

/// Scores Open Graph and schema.org hints on the re-fetched page
#[derive(Debug, Clone, Copy)]
pub struct MetaTagCheck;

impl MetaTagCheck {
    fn confirmations(page: &PageEvidence, handle: &str) -> Vec<Evidence> {
        let handle = handle.to_lowercase();
        let mut found = Vec::new();

        if let Some(title) = page
            .og_title
            .as_deref()
            .filter(|t| t.to_lowercase().contains(&handle))
        {
            found.push(Evidence::new(EvidenceKind::ValidationOgTitle, title));
        }

        if let Some(og_url) = page.og_url.as_deref() {
            let path_match = Url::parse(og_url)
                .map(|u| u.path().to_lowercase().contains(&handle))
                .unwrap_or(false);
            if path_match {
                found.push(Evidence::new(EvidenceKind::ValidationOgUrl, og_url));
            }
        }

        let image = [page.og_image.as_deref(), page.touch_icon.as_deref()]
            .into_iter()
            .flatten()
            .find(|src| !PLACEHOLDER_IMAGES.iter().any(|p| src.contains(p)));
        if let Some(image) = image {
            found.push(Evidence::new(EvidenceKind::ValidationProfileImage, image));
        }

        if page.structured.as_ref().is_some_and(|s| s.is_profile()) {
            found.push(Evidence::new(
                EvidenceKind::ValidationSchema,
                "Person/Profile schema found",
            ));
        }
        found
    }
}

#[async_trait]
impl ValidationCheck for MetaTagCheck {
    fn name(&self) -> &'static str {
        "meta"
    }

    async fn run(&self, ctx: &CheckContext<'_>) -> Result<CheckOutcome, CheckError> {
        let response = ctx.page().await?;
        let page = PageEvidence::parse(&response.body, &ctx.primary.url);
        let confirmations = Self::confirmations(&page, ctx.handle);
        if confirmations.is_empty() {
            return Ok(CheckOutcome::neutral(0.0, "No meta tag confirmations found"));
        }

        let confidence = (confirmations.len() as f64 * 0.2).min(0.8);
        let mut outcome = CheckOutcome::supports(
            confidence,
            format!("Found {} meta tag confirmations", confirmations.len()),
        );
        outcome.evidence = confirmations;
        Ok(outcome)
    }
}

/// Counts whole-word mentions of the handle
#[derive(Debug, Clone, Copy)]
pub struct MentionCheck;

impl MentionCheck {
    pub fn count(body: &str, handle: &str) -> usize {
        let pattern = format!(r"\b{}\b", regex::escape(handle));
        RegexBuilder::new(&pattern)
            .case_insensitive(true)
            .build()
            .map(|re| re.find_iter(body).count())
            .unwrap_or(0)
    }
}

#[async_trait]
impl ValidationCheck for MentionCheck {
    fn name(&self) -> &'static str {
        "mentions"
    }

    async fn run(&self, ctx: &CheckContext<'_>) -> Result<CheckOutcome, CheckError> {
        let response = ctx.page().await?;
        let mentions = Self::count(&response.body, ctx.handle);
        if mentions > 2 {
            Ok(CheckOutcome::supports(
                (mentions as f64 * 0.15).min(0.7),
                format!("Username mentioned {} times in content", mentions),
            )
            .with_evidence(EvidenceKind::ValidationUsernameMentions, mentions.to_string()))
        } else {
            Ok(CheckOutcome::neutral(0.2, "Username mentioned less than 3 times"))
        }
    }
}

/// HEAD status consistency
#[derive(Debug, Clone, Copy)]
pub struct HeadStatusCheck;

#[async_trait]
impl ValidationCheck for HeadStatusCheck {
    fn name(&self) -> &'static str {
        "head"
    }

    async fn run(&self, ctx: &CheckContext<'_>) -> Result<CheckOutcome, CheckError> {
        let response = ctx.head().await?;
        Ok(match response.status {
            200 => CheckOutcome::supports(0.6, "HEAD request confirms 200 status")
                .with_evidence(EvidenceKind::ValidationHead200, "200"),
            404 => CheckOutcome::disputes(0.9, "HEAD request confirms 404 - profile does not exist")
                .with_evidence(EvidenceKind::ValidationHead404, "404"),
            other => CheckOutcome::neutral(0.3, format!("HEAD returned {}", other)),
        })
    }
}

/// Inspects where the profile URL redirects to, without following
#[derive(Debug, Clone, Copy)]
pub struct RedirectCheck;

#[async_trait]
impl ValidationCheck for RedirectCheck {
    fn name(&self) -> &'static str {
        "redirect"
    }

    async fn run(&self, ctx: &CheckContext<'_>) -> Result<CheckOutcome, CheckError> {
        let request =
            FetchRequest::get(ctx.primary.url.as_str(), ctx.timeouts.page).manual_redirect();
        let response = ctx.fetcher().fetch(request).await?;

        if response.is_redirect() {
            let Some(location) = response.location.as_deref() else {
                return Ok(CheckOutcome::neutral(0.2, "Redirect without location"));
            };
            let lowered = location.to_lowercase();
            if NOT_FOUND_REDIRECTS.iter().any(|p| lowered.contains(p)) {
                return Ok(
                    CheckOutcome::disputes(0.8, "Redirect indicates profile not found")
                        .with_evidence(EvidenceKind::ValidationRedirectNotfound, location),
                );
            }
            if lowered.contains(&ctx.handle.to_lowercase()) {
                return Ok(CheckOutcome::supports(0.7, "Redirect contains username")
                    .with_evidence(EvidenceKind::ValidationRedirectUsername, location));
            }
        }
        Ok(CheckOutcome::neutral(0.4, "No significant redirect pattern"))
    }
}

/// Plausibility of the profile URL's response headers
#[derive(Debug, Clone, Copy)]
pub struct HeaderCheck;

#[async_trait]
impl ValidationCheck for HeaderCheck {
    fn name(&self) -> &'static str {
        "headers"
    }

    async fn run(&self, ctx: &CheckContext<'_>) -> Result<CheckOutcome, CheckError> {
        let response = ctx.head().await?;
        let mut confidence: f64 = 0.3;
        let mut evidence = Vec::new();

        if let Some(content_type) = response
            .header("content-type")
            .filter(|ct| ct.contains("text/html"))
        {
            evidence.push(Evidence::new(EvidenceKind::ValidationContentType, content_type));
            confidence += 0.2;
        }
        if let Some(server) = response.header("server") {
            evidence.push(Evidence::new(EvidenceKind::ValidationServer, server));
        }
        if let Some(cache) = response.header("cache-control") {
            evidence.push(Evidence::new(EvidenceKind::ValidationCache, cache));
            confidence += 0.1;
        }

        let mut outcome = CheckOutcome::neutral(
            confidence.min(0.6),
            format!("Found {} header indicators", evidence.len()),
        );
        outcome.evidence = evidence;
        Ok(outcome)
    }
}

/// Probes conventional JSON endpoints next to the profile URL
#[derive(Debug, Clone, Copy)]
pub struct JsonApiCheck;

impl JsonApiCheck {
    /// `{url}/api`, `{url}.json`, `/user/` to `/api/user/`, `/api/v1` prefix
    pub fn candidates(profile_url: &str) -> Vec<String> {
        let trimmed = profile_url.trim_end_matches('/');
        let mut candidates = vec![format!("{}/api", trimmed), format!("{}.json", trimmed)];

        if profile_url.contains("/user/") {
            candidates.push(profile_url.replacen("/user/", "/api/user/", 1));
        }
        if let Ok(mut url) = Url::parse(profile_url) {
            let path = format!("/api/v1{}", url.path());
            url.set_path(&path);
            candidates.push(url.to_string());
        }
        candidates.dedup();
        candidates
    }

    fn is_json_object(response: &FetchResponse) -> bool {
        let json_type = response
            .header("content-type")
            .is_some_and(|ct| JSON_CONTENT_TYPE.is_match(ct));
        json_type
            && serde_json::from_str::<Value>(&response.body)
                .map(|v| v.is_object())
                .unwrap_or(false)
    }
}

#[async_trait]
impl ValidationCheck for JsonApiCheck {
    fn name(&self) -> &'static str {
        "json_api"
    }

    async fn run(&self, ctx: &CheckContext<'_>) -> Result<CheckOutcome, CheckError> {
        for candidate in Self::candidates(&ctx.primary.url) {
            let request = FetchRequest::get(candidate.as_str(), ctx.timeouts.api).json();
            match ctx.fetcher().fetch(request).await {
                Ok(response) if response.is_success() && Self::is_json_object(&response) => {
                    return Ok(
                        CheckOutcome::supports(0.8, "JSON API endpoint confirms profile")
                            .with_evidence(EvidenceKind::ValidationJsonApi, candidate),
                    );
                }
                _ => continue,
            }
        }
        Ok(CheckOutcome::neutral(0.2, "No accessible JSON API found"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aliasmap_core::fakes::StubFetcher;
    use aliasmap_core::{Method, ProbeStatus, SiteRegistry};

    const URL: &str = "https://github.com/alice";

    fn primary() -> SiteResult {
        SiteResult::new("github", ProbeStatus::Inconclusive, URL)
    }

    async fn run_check(
        check: &dyn ValidationCheck,
        fetcher: &StubFetcher,
        primary: &SiteResult,
    ) -> Result<CheckOutcome, CheckError> {
        let registry = SiteRegistry::builtin();
        let site = registry.get("github").unwrap();
        let ctx = CheckContext::new(fetcher, site, "alice", primary, CheckTimeouts::default());
        check.run(&ctx).await
    }

    #[tokio::test]
    async fn test_canonical_check() {
        let fetcher = StubFetcher::new();
        let absent = run_check(&CanonicalCheck, &fetcher, &primary()).await.unwrap();
        assert_eq!(absent.confidence, 0.3);

        let with = primary().with_evidence(vec![Evidence::new(
            EvidenceKind::Canonical,
            "https://github.com/alice",
        )]);
        let strong = run_check(&CanonicalCheck, &fetcher, &with).await.unwrap();
        assert_eq!(strong.confidence, 0.9);
        assert_eq!(strong.stance, Stance::Supports);

        let bad = primary().with_evidence(vec![Evidence::new(EvidenceKind::Canonical, "/alice")]);
        assert_eq!(run_check(&CanonicalCheck, &fetcher, &bad).await.unwrap().confidence, 0.1);
    }

    #[tokio::test]
    async fn test_meta_check_scores_confirmations() {
        let body = r#"<meta property="og:title" content="Alice (alice)">
            <meta property="og:url" content="https://github.com/alice">
            <meta property="og:image" content="https://avatars.example/u/1">"#;
        let fetcher = StubFetcher::new().page(URL, body);
        let outcome = run_check(&MetaTagCheck, &fetcher, &primary()).await.unwrap();
        assert!((outcome.confidence - 0.6).abs() < 1e-9);
        assert_eq!(outcome.evidence.len(), 3);
    }

    #[test]
    fn test_placeholder_image_ignored() {
        let page = PageEvidence::parse(
            r#"<meta property="og:image" content="https://x/default-avatar.png">"#,
            URL,
        );
        assert!(MetaTagCheck::confirmations(&page, "alice").is_empty());
    }

    #[tokio::test]
    async fn test_meta_check_fails_on_error_status() {
        let fetcher = StubFetcher::new().status(URL, 503);
        let err = run_check(&MetaTagCheck, &fetcher, &primary()).await.unwrap_err();
        assert!(matches!(err, CheckError::Status(503)));
    }

    #[test]
    fn test_mention_count_whole_word() {
        assert_eq!(MentionCheck::count("alice Alice alicex @alice", "alice"), 3);
    }

    #[tokio::test]
    async fn test_head_404_disputes() {
        let fetcher = StubFetcher::new().status(URL, 404);
        let outcome = run_check(&HeadStatusCheck, &fetcher, &primary()).await.unwrap();
        assert_eq!(outcome.stance, Stance::Disputes);
        assert!((outcome.aligned_score() - 0.1).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_redirect_to_login_disputes() {
        let fetcher = StubFetcher::new().respond_manual(
            Method::Get,
            URL,
            FetchResponse {
                status: 302,
                location: Some("https://github.com/login?return_to=alice".into()),
                ..Default::default()
            },
        );
        let outcome = run_check(&RedirectCheck, &fetcher, &primary()).await.unwrap();
        assert_eq!(outcome.confidence, 0.8);
        assert_eq!(outcome.stance, Stance::Disputes);
    }

    #[tokio::test]
    async fn test_redirect_with_handle_supports() {
        let fetcher = StubFetcher::new().respond_manual(
            Method::Get,
            URL,
            FetchResponse {
                status: 301,
                location: Some("https://github.com/Alice".into()),
                ..Default::default()
            },
        );
        let outcome = run_check(&RedirectCheck, &fetcher, &primary()).await.unwrap();
        assert_eq!(outcome.confidence, 0.7);
        assert_eq!(outcome.stance, Stance::Supports);
        assert_eq!(outcome.evidence[0].kind, EvidenceKind::ValidationRedirectUsername);
        assert_eq!(outcome.evidence[0].value, "https://github.com/Alice");
    }

    #[tokio::test]
    async fn test_redirect_without_location() {
        let fetcher = StubFetcher::new().respond_manual(
            Method::Get,
            URL,
            FetchResponse {
                status: 302,
                location: None,
                ..Default::default()
            },
        );
        let outcome = run_check(&RedirectCheck, &fetcher, &primary()).await.unwrap();
        assert_eq!(outcome.confidence, 0.2);
        assert_eq!(outcome.stance, Stance::Neutral);
        assert!(outcome.evidence.is_empty());
    }

    #[tokio::test]
    async fn test_header_check() {
        let mut response = FetchResponse {
            status: 200,
            ..Default::default()
        };
        response
            .headers
            .insert("content-type".into(), "text/html; charset=utf-8".into());
        response.headers.insert("cache-control".into(), "max-age=0".into());
        response.headers.insert("server".into(), "github.com".into());
        let fetcher = StubFetcher::new().respond(Method::Head, URL, response);
        let outcome = run_check(&HeaderCheck, &fetcher, &primary()).await.unwrap();
        assert!((outcome.confidence - 0.6).abs() < 1e-9);
        assert_eq!(outcome.evidence.len(), 3);
    }

    #[test]
    fn test_json_candidates() {
        let candidates = JsonApiCheck::candidates("https://www.reddit.com/user/alice");
        assert_eq!(
            candidates,
            vec![
                "https://www.reddit.com/user/alice/api",
                "https://www.reddit.com/user/alice.json",
                "https://www.reddit.com/api/user/alice",
                "https://www.reddit.com/api/v1/user/alice",
            ]
        );
    }

    #[tokio::test]
    async fn test_json_api_object() {
        let mut response = FetchResponse {
            status: 200,
            body: r#"{"login":"alice"}"#.into(),
            ..Default::default()
        };
        response
            .headers
            .insert("content-type".into(), "application/json; charset=utf-8".into());
        let fetcher = StubFetcher::new().respond(Method::Get, "https://github.com/alice.json", response);
        let outcome = run_check(&JsonApiCheck, &fetcher, &primary()).await.unwrap();
        assert_eq!(outcome.confidence, 0.8);
        assert_eq!(outcome.evidence[0].value, "https://github.com/alice.json");
    }

    #[tokio::test]
    async fn test_json_api_none_accessible() {
        // one candidate answers with HTML, the rest fail to connect
        let fetcher = StubFetcher::new().page("https://github.com/alice/api", "<html>nope</html>");
        let outcome = run_check(&JsonApiCheck, &fetcher, &primary()).await.unwrap();
        assert_eq!(outcome.confidence, 0.2);
        assert_eq!(outcome.stance, Stance::Neutral);
        assert!(outcome.evidence.is_empty());
    }
}
