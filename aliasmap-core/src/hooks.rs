//! Site capability table
//!
//! Per-site behaviour that the generic classifier cannot express is
//! attached to a [`SiteSpec`](crate::SiteSpec) as strategy objects when the
//! registry is built:
//! - [`PreProbe`] hooks run before the generic fetch and may settle the verdict
//! - [`ClassifyOverride`] hooks see the analysed response before the generic rules

use std::fmt;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use tracing::debug;

use crate::classify::{Analysis, Classification};
use crate::evidence::{Evidence, EvidenceKind};
use crate::extract::resolve_url;
use crate::transport::{FetchRequest, HttpFetcher};

static SUSPENDED_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)suspended").unwrap());
static TIME_MACHINE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)time machine").unwrap());

/// What a pre-probe hook gets to work with
#[derive(Debug, Clone, Copy)]
pub struct PreProbeContext<'a> {
    pub site_id: &'a str,
    /// Normalized handle
    pub handle: &'a str,
    pub url: &'a str,
    pub timeout: Duration,
}

/// Runs before the generic profile fetch
#[async_trait]
pub trait PreProbe: Send + Sync {
    fn name(&self) -> &'static str;

    /// `Some` with a definitive verdict skips the generic fetch. Transport
    /// failures should yield `None` so the generic path still runs.
    async fn probe(
        &self,
        fetcher: &dyn HttpFetcher,
        ctx: &PreProbeContext<'_>,
    ) -> Option<Classification>;
}

/// Runs before the generic classification rules
pub trait ClassifyOverride: Send + Sync {
    fn name(&self) -> &'static str;

    fn classify(&self, analysis: &Analysis<'_>) -> Option<Classification>;
}

/// Hooks attached to one site
#[derive(Clone, Default)]
pub struct SiteHooks {
    pub pre_probe: Vec<Arc<dyn PreProbe>>,
    pub overrides: Vec<Arc<dyn ClassifyOverride>>,
}

impl SiteHooks {
    pub fn is_empty(&self) -> bool {
        self.pre_probe.is_empty() && self.overrides.is_empty()
    }
}

impl fmt::Debug for SiteHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SiteHooks")
            .field(
                "pre_probe",
                &self.pre_probe.iter().map(|h| h.name()).collect::<Vec<_>>(),
            )
            .field(
                "overrides",
                &self.overrides.iter().map(|h| h.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// Capability table keyed by site id
pub fn hooks_for(site_id: &str) -> SiteHooks {
    match site_id {
        "instagram" => SiteHooks {
            pre_probe: vec![Arc::new(LoginGateRedirect::new("/accounts/login/"))],
            overrides: vec![Arc::new(ProfileEvidenceOnly)],
        },
        "twitter" | "x" => SiteHooks {
            pre_probe: Vec::new(),
            overrides: vec![Arc::new(SuspendedAccount)],
        },
        "twitch" => SiteHooks {
            pre_probe: Vec::new(),
            overrides: vec![Arc::new(TimeMachineNotFound)],
        },
        _ => SiteHooks::default(),
    }
}

/// Login-wall redirect that names the handle means the account exists
#[derive(Debug, Clone)]
pub struct LoginGateRedirect {
    login_path: &'static str,
}

impl LoginGateRedirect {
    pub fn new(login_path: &'static str) -> Self {
        Self { login_path }
    }

    fn inspect_location(&self, request_url: &str, location: &str, handle: &str) -> Option<String> {
        let absolute = resolve_url(request_url, location).unwrap_or_else(|| location.to_string());
        let decoded = urlencoding::decode(&absolute)
            .map(|s| s.into_owned())
            .unwrap_or_else(|_| absolute.clone())
            .to_lowercase();
        let handle_segment = format!("/{}/", handle.to_lowercase());
        (decoded.contains(self.login_path) && decoded.contains(&handle_segment)).then_some(absolute)
    }
}

#[async_trait]
impl PreProbe for LoginGateRedirect {
    fn name(&self) -> &'static str {
        "login_gate_redirect"
    }

    async fn probe(
        &self,
        fetcher: &dyn HttpFetcher,
        ctx: &PreProbeContext<'_>,
    ) -> Option<Classification> {
        let request = FetchRequest::get(ctx.url, ctx.timeout).manual_redirect();
        let response = match fetcher.fetch(request).await {
            Ok(response) => response,
            Err(e) => {
                debug!("{}: login gate probe failed: {}", ctx.site_id, e);
                return None;
            }
        };

        if response.status == 404 {
            return Some(Classification::not_found(Vec::new()));
        }
        if !response.is_redirect() {
            return None;
        }

        let location = response.location.as_deref()?;
        let target = self.inspect_location(ctx.url, location, ctx.handle)?;
        Some(Classification::found(vec![Evidence::new(
            EvidenceKind::FinalUrl,
            target,
        )]))
    }
}

/// A suspended-account notice means the handle exists
#[derive(Debug, Clone, Copy)]
pub struct SuspendedAccount;

impl ClassifyOverride for SuspendedAccount {
    fn name(&self) -> &'static str {
        "suspended_account"
    }

    fn classify(&self, analysis: &Analysis<'_>) -> Option<Classification> {
        if analysis.matched_not_found.is_some() || !SUSPENDED_REGEX.is_match(analysis.body) {
            return None;
        }
        let mut evidence = vec![Evidence::new(EvidenceKind::Pattern, "Account suspended")];
        evidence.extend(analysis.canonical_evidence());
        Some(Classification::found(evidence))
    }
}

/// The "time machine" not-found notice is shown for banned accounts
#[derive(Debug, Clone, Copy)]
pub struct TimeMachineNotFound;

impl ClassifyOverride for TimeMachineNotFound {
    fn name(&self) -> &'static str {
        "time_machine_not_found"
    }

    fn classify(&self, analysis: &Analysis<'_>) -> Option<Classification> {
        let pattern = analysis.matched_not_found?;
        if !TIME_MACHINE_REGEX.is_match(pattern.source()) {
            return None;
        }
        Some(Classification::found(vec![analysis.pattern_evidence(pattern)]))
    }
}

/// Trust only canonical or og:url evidence, never the final URL alone
#[derive(Debug, Clone, Copy)]
pub struct ProfileEvidenceOnly;

impl ClassifyOverride for ProfileEvidenceOnly {
    fn name(&self) -> &'static str {
        "profile_evidence_only"
    }

    fn classify(&self, analysis: &Analysis<'_>) -> Option<Classification> {
        if let Some(pattern) = analysis.matched_not_found {
            return Some(Classification::not_found(vec![
                analysis.pattern_evidence(pattern)
            ]));
        }
        if analysis.username_ok && (analysis.canonical_ok || analysis.og_ok) {
            let mut evidence: Vec<Evidence> = analysis
                .matched_success
                .map(|p| analysis.pattern_evidence(p))
                .into_iter()
                .collect();
            evidence.extend(analysis.canonical_evidence());
            evidence.extend(analysis.og_evidence());
            return Some(Classification::found(evidence));
        }
        Some(Classification::inconclusive())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::classify;
    use crate::fakes::StubFetcher;
    use crate::result::ProbeStatus;
    use crate::transport::{FetchResponse, Method};
    use crate::SiteRegistry;

    fn ok(body: &str, final_url: &str) -> FetchResponse {
        FetchResponse {
            status: 200,
            final_url: final_url.into(),
            body: body.into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_capability_table() {
        assert_eq!(hooks_for("instagram").pre_probe.len(), 1);
        assert_eq!(hooks_for("twitch").overrides.len(), 1);
        assert!(hooks_for("github").is_empty());
    }

    #[test]
    fn test_suspended_account_found() {
        let registry = SiteRegistry::builtin();
        let twitter = registry.get("twitter").unwrap();
        let url = twitter.profile_url("bob");
        let verdict = classify(twitter, "bob", &url, &ok("Account suspended", &url));
        assert_eq!(verdict.status, ProbeStatus::Found);
        assert_eq!(verdict.evidence[0].value, "Account suspended");
    }

    #[test]
    fn test_time_machine_is_found() {
        let registry = SiteRegistry::builtin();
        let twitch = registry.get("twitch").unwrap();
        let url = twitch.profile_url("bob");
        let body = "Sorry. Unless you’ve got a time machine, that content is unavailable.";
        let verdict = classify(twitch, "bob", &url, &ok(body, &url));
        assert_eq!(verdict.status, ProbeStatus::Found);
        assert_eq!(verdict.evidence[0].kind, EvidenceKind::Pattern);
    }

    #[test]
    fn test_instagram_final_url_alone_is_inconclusive() {
        let registry = SiteRegistry::builtin();
        let instagram = registry.get("instagram").unwrap();
        let url = instagram.profile_url("bob");
        let verdict = classify(instagram, "bob", &url, &ok("bob instagram.com/bob", &url));
        assert_eq!(verdict.status, ProbeStatus::Inconclusive);
    }

    #[tokio::test]
    async fn test_login_gate_redirect() {
        let url = "https://www.instagram.com/bob/";
        let fetcher = StubFetcher::new().respond(
            Method::Get,
            url,
            FetchResponse {
                status: 302,
                final_url: url.into(),
                location: Some("/accounts/login/?next=%2Fbob%2F".into()),
                ..Default::default()
            },
        );
        let hook = LoginGateRedirect::new("/accounts/login/");
        let ctx = PreProbeContext {
            site_id: "instagram",
            handle: "bob",
            url,
            timeout: Duration::from_secs(1),
        };
        let verdict = hook.probe(&fetcher, &ctx).await.unwrap();
        assert_eq!(verdict.status, ProbeStatus::Found);
        assert!(verdict.evidence[0].value.starts_with("https://www.instagram.com/accounts/login/"));
    }

    #[tokio::test]
    async fn test_login_gate_transport_failure_falls_through() {
        let fetcher = StubFetcher::new();
        let hook = LoginGateRedirect::new("/accounts/login/");
        let ctx = PreProbeContext {
            site_id: "instagram",
            handle: "bob",
            url: "https://www.instagram.com/bob/",
            timeout: Duration::from_secs(1),
        };
        assert!(hook.probe(&fetcher, &ctx).await.is_none());
    }
}
