//! Verdicts and scan events

use serde::{Deserialize, Serialize};

use crate::evidence::{Evidence, EvidenceKind};
use crate::tracker::QualityReport;

/// Four-state verdict for one (site, handle) pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeStatus {
    Found,
    NotFound,
    Inconclusive,
    Error,
}

impl ProbeStatus {
    /// Found or not found, as opposed to a non-answer
    pub fn is_definitive(&self) -> bool {
        matches!(self, Self::Found | Self::NotFound)
    }
}

impl std::fmt::Display for ProbeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Found => "found",
            Self::NotFound => "not_found",
            Self::Inconclusive => "inconclusive",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// Presentation hints scraped from a found profile page
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ProfileMeta {
    pub fn is_empty(&self) -> bool {
        self.image.is_none() && self.title.is_none() && self.description.is_none()
    }
}

/// Classification output for one site
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteResult {
    #[serde(rename = "id")]
    pub site_id: String,
    pub status: ProbeStatus,
    pub url: String,
    pub latency_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub evidence: Vec<Evidence>,
    /// Set only when the secondary validator ran
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<ProfileMeta>,
}

impl SiteResult {
    pub fn new(site_id: impl Into<String>, status: ProbeStatus, url: impl Into<String>) -> Self {
        Self {
            site_id: site_id.into(),
            status,
            url: url.into(),
            latency_ms: 0,
            reason: None,
            evidence: Vec::new(),
            confidence: None,
            meta: None,
        }
    }

    pub fn with_latency(mut self, latency_ms: u64) -> Self {
        self.latency_ms = latency_ms;
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_evidence(mut self, evidence: Vec<Evidence>) -> Self {
        self.evidence = evidence;
        self
    }

    pub fn with_meta(mut self, meta: ProfileMeta) -> Self {
        if !meta.is_empty() {
            self.meta = Some(meta);
        }
        self
    }

    /// First evidence value of a kind
    pub fn evidence_of(&self, kind: EvidenceKind) -> Option<&str> {
        self.evidence
            .iter()
            .find(|e| e.kind == kind)
            .map(|e| e.value.as_str())
    }

    /// Found without canonical or og:url backing
    pub fn is_weak_found(&self) -> bool {
        self.status == ProbeStatus::Found
            && self.evidence_of(EvidenceKind::Canonical).is_none()
            && self.evidence_of(EvidenceKind::OgUrl).is_none()
    }
}

/// Progress counters carried by the terminal event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanSummary {
    pub done: usize,
    pub total: usize,
}

/// Lifecycle events emitted by a scan, in order
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScanEvent {
    SiteStart { id: String },
    SiteResult(SiteResult),
    Progress { done: usize, total: usize },
    /// Two-phase mode: triage finished and shortlisted these sites
    Triage { shortlisted: usize, total: usize },
    QualityReport { report: QualityReport },
    Done { summary: ScanSummary },
}

impl ScanEvent {
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_not_found_omits_evidence() {
        let result = SiteResult::new("github", ProbeStatus::NotFound, "https://github.com/x")
            .with_latency(120);
        let value = serde_json::to_value(ScanEvent::SiteResult(result)).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "site_result",
                "id": "github",
                "status": "not_found",
                "url": "https://github.com/x",
                "latencyMs": 120
            })
        );
    }

    #[test]
    fn test_done_event_shape() {
        let event = ScanEvent::Done {
            summary: ScanSummary { done: 3, total: 3 },
        };
        let value = serde_json::to_value(event).unwrap();
        assert_eq!(value, json!({"type": "done", "summary": {"done": 3, "total": 3}}));
    }

    #[test]
    fn test_weak_found() {
        let weak = SiteResult::new("reddit", ProbeStatus::Found, "u")
            .with_evidence(vec![Evidence::new(EvidenceKind::FinalUrl, "u")]);
        assert!(weak.is_weak_found());

        let strong = SiteResult::new("reddit", ProbeStatus::Found, "u")
            .with_evidence(vec![Evidence::new(EvidenceKind::Canonical, "u")]);
        assert!(!strong.is_weak_found());
    }

    #[test]
    fn test_empty_meta_is_dropped() {
        let result = SiteResult::new("x", ProbeStatus::Found, "u").with_meta(ProfileMeta::default());
        assert!(result.meta.is_none());
    }
}
