//! Verdict classification
//!
//! Turns a probe response into one of four verdicts. HTTP 404 settles the
//! question immediately; everything else goes through pattern matching and
//! profile-URL evidence. Site overrides from the capability table get the
//! first word.

use tracing::debug;

use crate::evidence::{Evidence, EvidenceKind};
use crate::extract::{PageEvidence, ProfileMatcher};
use crate::result::{ProbeStatus, ProfileMeta, SiteResult};
use crate::site::{SitePattern, SiteSpec};
use crate::transport::FetchResponse;

/// A verdict with the evidence it rests on
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub status: ProbeStatus,
    pub evidence: Vec<Evidence>,
    pub reason: Option<String>,
    pub meta: Option<ProfileMeta>,
}

impl Classification {
    fn with_status(status: ProbeStatus, evidence: Vec<Evidence>) -> Self {
        Self {
            status,
            evidence,
            reason: None,
            meta: None,
        }
    }

    pub fn found(evidence: Vec<Evidence>) -> Self {
        Self::with_status(ProbeStatus::Found, evidence)
    }

    pub fn not_found(evidence: Vec<Evidence>) -> Self {
        Self::with_status(ProbeStatus::NotFound, evidence)
    }

    pub fn inconclusive() -> Self {
        Self::with_status(ProbeStatus::Inconclusive, Vec::new())
    }

    pub fn error(reason: impl Into<String>) -> Self {
        Self::with_status(ProbeStatus::Error, Vec::new()).with_reason(reason)
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn is_definitive(&self) -> bool {
        self.status.is_definitive()
    }

    pub fn into_result(self, site_id: &str, url: &str, latency_ms: u64) -> SiteResult {
        let mut result = SiteResult::new(site_id, self.status, url)
            .with_latency(latency_ms)
            .with_evidence(self.evidence);
        result.reason = self.reason;
        if let Some(meta) = self.meta {
            result = result.with_meta(meta);
        }
        result
    }
}

/// Everything the classifier learned from one response
#[derive(Debug)]
pub struct Analysis<'a> {
    pub site: &'a SiteSpec,
    pub handle: &'a str,
    pub body: &'a str,
    pub page: &'a PageEvidence,
    pub final_url: &'a str,
    pub matched_success: Option<&'a SitePattern>,
    pub matched_not_found: Option<&'a SitePattern>,
    pub username_ok: bool,
    pub canonical_ok: bool,
    pub og_ok: bool,
    pub final_url_ok: bool,
}

impl<'a> Analysis<'a> {
    pub fn new(
        site: &'a SiteSpec,
        handle: &'a str,
        response: &'a FetchResponse,
        page: &'a PageEvidence,
    ) -> Self {
        let body = response.body.as_str();
        let matched_success = site
            .ordered_success_patterns()
            .find(|p| p.is_match(body, handle));
        let matched_not_found = site
            .not_found_patterns
            .iter()
            .find(|p| p.is_match(body, handle));

        let username_ok = match matched_success {
            Some(pattern) if pattern.embeds_handle() => true,
            _ => contains_handle(body, handle, site.case_insensitive()),
        };

        let matcher = ProfileMatcher::new(&site.url_template, handle);
        let matches = |candidate: Option<&str>| match (&matcher, candidate) {
            (Some(m), Some(c)) => m.matches(c),
            _ => false,
        };

        Self {
            site,
            handle,
            body,
            page,
            final_url: response.final_url.as_str(),
            matched_success,
            matched_not_found,
            username_ok,
            canonical_ok: matches(page.canonical.as_deref()),
            og_ok: matches(page.og_url.as_deref()),
            final_url_ok: matches(Some(response.final_url.as_str())),
        }
    }

    pub fn any_url_ok(&self) -> bool {
        self.canonical_ok || self.og_ok || self.final_url_ok
    }

    pub fn pattern_evidence(&self, pattern: &SitePattern) -> Evidence {
        Evidence::new(EvidenceKind::Pattern, pattern.describe(self.handle))
    }

    pub fn canonical_evidence(&self) -> Option<Evidence> {
        self.canonical_ok
            .then(|| self.page.canonical.clone())
            .flatten()
            .map(|c| Evidence::new(EvidenceKind::Canonical, c))
    }

    pub fn og_evidence(&self) -> Option<Evidence> {
        self.og_ok
            .then(|| self.page.og_url.clone())
            .flatten()
            .map(|u| Evidence::new(EvidenceKind::OgUrl, u))
    }

    pub fn final_url_evidence(&self) -> Option<Evidence> {
        (self.final_url_ok && !self.final_url.is_empty())
            .then(|| Evidence::new(EvidenceKind::FinalUrl, self.final_url))
    }

    /// Canonical, og:url and final-URL evidence, in that order
    pub fn url_evidence(&self) -> Vec<Evidence> {
        [
            self.canonical_evidence(),
            self.og_evidence(),
            self.final_url_evidence(),
        ]
        .into_iter()
        .flatten()
        .collect()
    }
}

/// Literal substring check honouring the site's case rule
pub fn contains_handle(body: &str, handle: &str, case_insensitive: bool) -> bool {
    if handle.is_empty() {
        return false;
    }
    if case_insensitive {
        body.to_lowercase().contains(&handle.to_lowercase())
    } else {
        body.contains(handle)
    }
}

/// Classify a completed (non-transport-failure) probe response
pub fn classify(
    site: &SiteSpec,
    handle: &str,
    request_url: &str,
    response: &FetchResponse,
) -> Classification {
    if response.status == 404 {
        return Classification::not_found(Vec::new());
    }

    let page = PageEvidence::parse(&response.body, request_url);
    let analysis = Analysis::new(site, handle, response, &page);

    let mut verdict = site
        .hooks
        .overrides
        .iter()
        .find_map(|hook| {
            let verdict = hook.classify(&analysis)?;
            debug!("{}: override {} decided {}", site.id, hook.name(), verdict.status);
            Some(verdict)
        })
        .unwrap_or_else(|| classify_generic(&analysis));

    if verdict.status == ProbeStatus::Found {
        verdict.meta = Some(page.profile_meta());
    }
    verdict
}

/// Pattern and URL-evidence rules shared by every site
pub fn classify_generic(analysis: &Analysis<'_>) -> Classification {
    if let Some(pattern) = analysis.matched_not_found {
        return Classification::not_found(vec![analysis.pattern_evidence(pattern)]);
    }

    if let Some(pattern) = analysis.matched_success {
        if analysis.username_ok && analysis.any_url_ok() {
            let mut evidence = vec![analysis.pattern_evidence(pattern)];
            evidence.extend(analysis.url_evidence());
            return Classification::found(evidence);
        }
    } else if analysis.site.success_patterns.is_empty()
        && analysis.username_ok
        && analysis.any_url_ok()
    {
        let mut evidence = analysis.url_evidence();
        if evidence.is_empty() {
            evidence.push(Evidence::new(EvidenceKind::UsernameText, &analysis.site.id));
        }
        return Classification::found(evidence);
    }

    Classification::inconclusive()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::site::SiteDefinition;

    fn site(success: &[&str], not_found: &[&str]) -> SiteSpec {
        SiteSpec::from_definition(&SiteDefinition {
            id: "example".into(),
            tier: Default::default(),
            url: "https://example.com/{handle}".into(),
            success_patterns: success.iter().map(|s| s.to_string()).collect(),
            not_found_patterns: not_found.iter().map(|s| s.to_string()).collect(),
            timeout_ms: None,
            normalization: Default::default(),
            risk: Default::default(),
        })
        .unwrap()
    }

    fn response(status: u16, body: &str) -> FetchResponse {
        FetchResponse {
            status,
            final_url: "https://example.com/alice".into(),
            body: body.into(),
            ..Default::default()
        }
    }

    const URL: &str = "https://example.com/alice";

    #[test]
    fn test_404_short_circuits() {
        let spec = site(&["Followers"], &[]);
        let verdict = classify(&spec, "alice", URL, &response(404, "Followers alice"));
        assert_eq!(verdict.status, ProbeStatus::NotFound);
        assert!(verdict.evidence.is_empty());
    }

    #[test]
    fn test_templated_success_with_canonical() {
        let spec = site(&["Followers", r#"rel="canonical".*example.com/{handle}"#], &[]);
        let body = r#"<link rel="canonical" href="https://example.com/alice"> 3 Followers"#;
        let verdict = classify(&spec, "alice", URL, &response(200, body));
        assert_eq!(verdict.status, ProbeStatus::Found);
        assert_eq!(verdict.evidence[0].kind, EvidenceKind::Pattern);
        assert!(verdict.evidence[0].value.contains("example.com/alice"));
        assert!(verdict
            .evidence
            .iter()
            .any(|e| e.kind == EvidenceKind::Canonical));
        assert!(verdict.meta.is_some());
    }

    #[test]
    fn test_generic_pattern_without_handle_in_body() {
        let spec = site(&["Followers"], &[]);
        let mut resp = response(200, "<p>12 Followers</p>");
        resp.final_url = "https://example.com/alice".into();
        let verdict = classify(&spec, "alice", URL, &resp);
        assert_ne!(verdict.status, ProbeStatus::Found);
    }

    #[test]
    fn test_not_found_pattern() {
        let spec = site(&["Followers"], &["Page not found"]);
        let verdict = classify(&spec, "alice", URL, &response(200, "alice Page not found"));
        assert_eq!(verdict.status, ProbeStatus::NotFound);
        assert_eq!(verdict.evidence[0].value, "Page not found");
    }

    #[test]
    fn test_generic_page_inconclusive() {
        let spec = site(&["Followers"], &["Page not found"]);
        let mut resp = response(200, "<html>Welcome to Example</html>");
        resp.final_url = "https://example.com/".into();
        let verdict = classify(&spec, "alice", URL, &resp);
        assert_eq!(verdict.status, ProbeStatus::Inconclusive);
    }

    #[test]
    fn test_zero_success_pattern_fallback() {
        let spec = site(&[], &["404"]);
        let verdict = classify(&spec, "alice", URL, &response(200, "profile of alice"));
        assert_eq!(verdict.status, ProbeStatus::Found);
        assert_eq!(verdict.evidence[0].kind, EvidenceKind::FinalUrl);
    }

    #[test]
    fn test_contains_handle_case_rules() {
        assert!(contains_handle("Hello ALICE", "alice", true));
        assert!(!contains_handle("Hello ALICE", "alice", false));
    }
}
