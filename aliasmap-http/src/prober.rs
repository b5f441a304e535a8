//! Per-site prober
//!
//! One probe per (site, handle): normalize, run pre-probe hooks, fetch the
//! profile page, classify. Transport failures become `error` results and
//! never escape.

use std::time::Instant;

use tracing::debug;

use aliasmap_core::{
    classify, Classification, FetchRequest, PreProbeContext, SharedFetcher, SiteResult, SiteSpec,
    HANDLE_PLACEHOLDER,
};

/// Reason attached when a site's rules reject the handle
pub const HANDLE_NOT_ALLOWED: &str = "handle not allowed";

/// Probe outcome plus the handle as the site saw it
#[derive(Debug, Clone)]
pub struct ProbeReport {
    pub result: SiteResult,
    /// Normalized handle, `None` when the site rejected it
    pub handle: Option<String>,
}

impl ProbeReport {
    pub fn is_rejected(&self) -> bool {
        self.handle.is_none()
    }
}

/// Issues profile probes through a shared fetcher
#[derive(Clone)]
pub struct Prober {
    fetcher: SharedFetcher,
}

impl Prober {
    pub fn new(fetcher: SharedFetcher) -> Self {
        Self { fetcher }
    }

    pub fn fetcher(&self) -> &SharedFetcher {
        &self.fetcher
    }

    pub async fn check(&self, site: &SiteSpec, raw_handle: &str) -> ProbeReport {
        let start = Instant::now();
        let elapsed = || start.elapsed().as_millis() as u64;

        let Some(handle) = site.normalize(raw_handle) else {
            let url = site
                .url_template
                .replace(HANDLE_PLACEHOLDER, &urlencoding::encode(raw_handle.trim()));
            debug!("{}: handle {:?} rejected by site rules", site.id, raw_handle);
            return ProbeReport {
                result: Classification::inconclusive()
                    .with_reason(HANDLE_NOT_ALLOWED)
                    .into_result(&site.id, &url, elapsed()),
                handle: None,
            };
        };

        let url = site.profile_url(&handle);
        let ctx = PreProbeContext {
            site_id: &site.id,
            handle: &handle,
            url: &url,
            timeout: site.timeout,
        };
        for hook in &site.hooks.pre_probe {
            if let Some(verdict) = hook.probe(self.fetcher.as_ref(), &ctx).await {
                if verdict.is_definitive() {
                    debug!("{}: pre-probe {} decided {}", site.id, hook.name(), verdict.status);
                    let result = verdict.into_result(&site.id, &url, elapsed());
                    return ProbeReport {
                        result,
                        handle: Some(handle),
                    };
                }
            }
        }

        let verdict = match self
            .fetcher
            .fetch(FetchRequest::get(url.as_str(), site.timeout))
            .await
        {
            Ok(response) => classify(site, &handle, &url, &response),
            Err(e) => {
                debug!("{}: transport failure: {}", site.id, e);
                Classification::error(e.to_string())
            }
        };

        ProbeReport {
            result: verdict.into_result(&site.id, &url, elapsed()),
            handle: Some(handle),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use aliasmap_core::fakes::StubFetcher;
    use aliasmap_core::{
        EvidenceKind, FetchResponse, Method, ProbeStatus, SiteRegistry, TransportError,
    };

    fn prober(fetcher: StubFetcher) -> Prober {
        Prober::new(Arc::new(fetcher))
    }

    #[tokio::test]
    async fn test_404_is_not_found_without_evidence() {
        let registry = SiteRegistry::builtin();
        let github = registry.get("github").unwrap();
        let report = prober(StubFetcher::new().status("https://github.com/alice", 404))
            .check(github, "Alice")
            .await;
        assert_eq!(report.result.status, ProbeStatus::NotFound);
        assert!(report.result.evidence.is_empty());
        assert_eq!(report.handle.as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn test_found_with_canonical() {
        let registry = SiteRegistry::builtin();
        let github = registry.get("github").unwrap();
        let body = r#"<html><head><link rel="canonical" href="https://github.com/alice">
            <meta property="og:image" content="https://avatars.example/alice.png"></head>
            <body>alice 10 Followers</body></html>"#;
        let report = prober(StubFetcher::new().page("https://github.com/alice", body))
            .check(github, "alice")
            .await;
        assert_eq!(report.result.status, ProbeStatus::Found);
        assert!(report
            .result
            .evidence
            .iter()
            .any(|e| e.kind == EvidenceKind::Canonical));
        let meta = report.result.meta.unwrap();
        assert_eq!(meta.image.as_deref(), Some("https://avatars.example/alice.png"));
    }

    #[tokio::test]
    async fn test_timeout_becomes_error() {
        let registry = SiteRegistry::builtin();
        let gitlab = registry.get("gitlab").unwrap();
        let fetcher = StubFetcher::new().fail(
            Method::Get,
            "https://gitlab.com/alice",
            TransportError::Timeout(Duration::from_millis(3500)),
        );
        let report = prober(fetcher).check(gitlab, "alice").await;
        assert_eq!(report.result.status, ProbeStatus::Error);
        assert_eq!(report.result.reason.as_deref(), Some("ETIMEDOUT"));
    }

    #[tokio::test]
    async fn test_rejected_handle_skips_network() {
        let registry = SiteRegistry::builtin();
        let twitter = registry.get("twitter").unwrap();
        let fetcher = Arc::new(StubFetcher::new());
        let report = Prober::new(fetcher.clone())
            .check(twitter, "far.too.long.for.twitter")
            .await;
        assert!(report.is_rejected());
        assert_eq!(report.result.status, ProbeStatus::Inconclusive);
        assert_eq!(report.result.reason.as_deref(), Some(HANDLE_NOT_ALLOWED));
        assert!(fetcher.requests().is_empty());
    }

    #[tokio::test]
    async fn test_pre_probe_skips_generic_fetch() {
        let registry = SiteRegistry::builtin();
        let instagram = registry.get("instagram").unwrap();
        let url = "https://www.instagram.com/alice/";
        let fetcher = Arc::new(StubFetcher::new().respond_manual(
            Method::Get,
            url,
            FetchResponse {
                status: 302,
                final_url: url.into(),
                location: Some("https://www.instagram.com/accounts/login/?next=/alice/".into()),
                ..Default::default()
            },
        ));
        let report = Prober::new(fetcher.clone()).check(instagram, "alice").await;
        assert_eq!(report.result.status, ProbeStatus::Found);
        assert_eq!(fetcher.request_count(url), 1);
    }

    #[tokio::test]
    async fn test_pre_probe_failure_falls_through() {
        let registry = SiteRegistry::builtin();
        let instagram = registry.get("instagram").unwrap();
        let url = "https://www.instagram.com/alice/";
        let body = r#"<link rel="canonical" href="https://www.instagram.com/alice/"> alice"#;
        let fetcher = StubFetcher::new()
            .respond_manual(
                Method::Get,
                url,
                FetchResponse {
                    status: 200,
                    final_url: url.into(),
                    ..Default::default()
                },
            )
            .page(url, body);
        let report = prober(fetcher).check(instagram, "alice").await;
        assert_eq!(report.result.status, ProbeStatus::Found);
    }
}
