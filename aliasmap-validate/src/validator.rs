//! Secondary validator
//!
//! Runs the corroborating checks concurrently, folds them into one
//! confidence score and maps that score onto the primary verdict:
//!
//! | primary        | confidence | final          |
//! |----------------|------------|----------------|
//! | inconclusive   | >= 0.7     | found          |
//! | inconclusive   | <= 0.3     | not_found      |
//! | found          | < 0.4      | inconclusive   |
//! | not_found, error | any      | unchanged      |

use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, info};

use aliasmap_core::{Evidence, ProbeStatus, SharedFetcher, SiteResult, SiteSpec};

use crate::checks::{default_checks, CheckContext, CheckOutcome, CheckTimeouts, ValidationCheck};

/// Upgrade threshold for inconclusive verdicts
pub const FOUND_THRESHOLD: f64 = 0.7;
/// Downgrade threshold for inconclusive verdicts
pub const NOT_FOUND_THRESHOLD: f64 = 0.3;
/// Found verdicts below this become inconclusive
pub const WEAK_FOUND_THRESHOLD: f64 = 0.4;

/// Which primary verdicts get re-examined
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ValidationMode {
    #[default]
    InconclusiveOnly,
    /// Also re-examine found verdicts lacking canonical or og:url evidence
    Strict,
}

/// Validator configuration
#[derive(Debug, Clone, Default)]
pub struct ValidatorConfig {
    pub mode: ValidationMode,
    pub timeouts: CheckTimeouts,
}

/// Aggregated outcome of all checks
#[derive(Debug, Clone, PartialEq)]
pub struct Validation {
    pub confidence: f64,
    pub reasons: Vec<String>,
    pub evidence: Vec<Evidence>,
    pub checks_run: usize,
}

/// Fold check outcomes into one score.
///
/// A check's confidence measures how sure it is of its own stance, so the
/// score is directional: a disputing check counts as `1 - confidence` and
/// a confident dispute pulls the mean towards not found. Checks whose
/// aligned score exceeds 0.6 add a corroboration bonus of 0.05 each, up to
/// 0.2, so only checks leaning towards found earn it.
pub fn aggregate(outcomes: Vec<CheckOutcome>) -> Validation {
    if outcomes.is_empty() {
        return Validation {
            confidence: 0.1,
            reasons: vec!["No validations completed".to_string()],
            evidence: Vec::new(),
            checks_run: 0,
        };
    }

    let scores: Vec<f64> = outcomes.iter().map(CheckOutcome::aligned_score).collect();
    let mean = scores.iter().sum::<f64>() / scores.len() as f64;
    let corroborating = scores.iter().filter(|s| **s > 0.6).count();
    let bonus = (corroborating as f64 * 0.05).min(0.2);

    let checks_run = outcomes.len();
    let mut reasons = Vec::new();
    let mut evidence = Vec::new();
    for outcome in outcomes {
        reasons.extend(outcome.reasons);
        evidence.extend(outcome.evidence);
    }

    Validation {
        confidence: (mean + bonus).min(1.0),
        reasons,
        evidence,
        checks_run,
    }
}

/// Map a confidence onto the primary verdict
pub fn final_status(primary: ProbeStatus, confidence: f64) -> ProbeStatus {
    match primary {
        ProbeStatus::Inconclusive if confidence >= FOUND_THRESHOLD => ProbeStatus::Found,
        ProbeStatus::Inconclusive if confidence <= NOT_FOUND_THRESHOLD => ProbeStatus::NotFound,
        ProbeStatus::Found if confidence < WEAK_FOUND_THRESHOLD => ProbeStatus::Inconclusive,
        other => other,
    }
}

/// Fold a validation into the primary result
pub fn apply(mut primary: SiteResult, validation: Validation) -> SiteResult {
    primary.status = final_status(primary.status, validation.confidence);
    primary.evidence.extend(validation.evidence);
    primary.reason = Some(validation.reasons.join("; "));
    primary.confidence = Some(validation.confidence);
    if primary.status != ProbeStatus::Found {
        primary.meta = None;
    }
    primary
}

/// Re-examines uncertain verdicts with independent checks
#[derive(Clone)]
pub struct SecondaryValidator {
    fetcher: SharedFetcher,
    checks: Vec<Arc<dyn ValidationCheck>>,
    config: ValidatorConfig,
}

impl SecondaryValidator {
    pub fn new(fetcher: SharedFetcher, config: ValidatorConfig) -> Self {
        Self {
            fetcher,
            checks: default_checks(),
            config,
        }
    }

    pub fn with_checks(mut self, checks: Vec<Arc<dyn ValidationCheck>>) -> Self {
        self.checks = checks;
        self
    }

    pub fn should_validate(&self, result: &SiteResult) -> bool {
        match result.status {
            ProbeStatus::Inconclusive => true,
            ProbeStatus::Found => self.config.mode == ValidationMode::Strict && result.is_weak_found(),
            ProbeStatus::NotFound | ProbeStatus::Error => false,
        }
    }

    /// Run every check against the primary result
    pub async fn validate(&self, site: &SiteSpec, handle: &str, primary: &SiteResult) -> Validation {
        let ctx = CheckContext::new(
            self.fetcher.as_ref(),
            site,
            handle,
            primary,
            self.config.timeouts,
        );

        let runs = self.checks.iter().map(|check| {
            let ctx = &ctx;
            async move {
                match check.run(ctx).await {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        debug!("{}: {} check failed: {}", site.id, check.name(), e);
                        CheckOutcome::failed(check.name(), &e)
                    }
                }
            }
        });
        let validation = aggregate(join_all(runs).await);
        debug!(
            "{}: validation confidence {:.2} over {} checks",
            site.id, validation.confidence, validation.checks_run
        );
        validation
    }

    /// Validate when the mode calls for it, otherwise pass the result through
    pub async fn review(&self, site: &SiteSpec, handle: &str, primary: SiteResult) -> SiteResult {
        if !self.should_validate(&primary) {
            return primary;
        }
        let before = primary.status;
        let validation = self.validate(site, handle, &primary).await;
        let result = apply(primary, validation);
        if result.status != before {
            info!("{}: validation moved {} to {}", site.id, before, result.status);
        }
        result
    }
}
