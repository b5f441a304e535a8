//! Batch scanner
//!
//! Turns one handle into an ordered stream of [`ScanEvent`]s:
//! - Sites are split into fixed-size windows, processed one after another
//! - Inside a window every probe runs concurrently
//! - Results are emitted in completion order, each followed by progress
//! - Two-phase mode shortlists sites with a status-code triage first
//!
//! The producer runs on its own task and stops at the next send once the
//! consumer drops the stream.

use std::collections::HashSet;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use anyhow::Context as _;
use futures::stream::{FuturesUnordered, Stream, StreamExt};
use thiserror::Error;
use tokio::sync::mpsc::{self, error::SendError};
use tracing::{debug, info};

use aliasmap_core::{
    PrecisionTracker, ProbeStatus, ScanEvent, ScanSummary, SharedFetcher, SharedTracker,
    SiteRegistry, SiteResult, SiteSpec, Tier, TrackerConfig,
};
use aliasmap_http::{
    triage_sites, HttpConfig, Prober, ReqwestFetcher, TriageConfig, TRIAGE_DEFAULT_CONCURRENCY,
};
use aliasmap_validate::{CheckTimeouts, SecondaryValidator, ValidationMode, ValidatorConfig};

pub const SCAN_DEFAULT_CONCURRENCY: usize = 6;
pub const SCAN_MAX_CONCURRENCY: usize = 10;

/// Errors returned before a scan starts
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("handle is empty")]
    EmptyHandle,
}

/// Scanner-wide configuration
#[derive(Debug, Clone)]
pub struct ScannerConfig {
    pub http: HttpConfig,
    pub check_timeouts: CheckTimeouts,
    pub tracker: TrackerConfig,
    /// Events buffered ahead of a slow consumer
    pub channel_capacity: usize,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            http: HttpConfig::default(),
            check_timeouts: CheckTimeouts::default(),
            tracker: TrackerConfig::default(),
            channel_capacity: 64,
        }
    }
}

/// Per-scan options
#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub handle: String,
    /// `None` scans every tier
    pub tier: Option<Tier>,
    /// Window size, clamped to 1..=10
    pub concurrency: usize,
    /// `None` disables secondary validation
    pub validation: Option<ValidationMode>,
    pub track_metrics: bool,
    pub two_phase: bool,
    pub triage_concurrency: usize,
    /// Delay after each emitted result
    pub pacing: Duration,
}

impl ScanOptions {
    pub fn new(handle: impl Into<String>) -> Self {
        Self {
            handle: handle.into(),
            tier: Some(Tier::Fundamental),
            concurrency: SCAN_DEFAULT_CONCURRENCY,
            validation: Some(ValidationMode::InconclusiveOnly),
            track_metrics: true,
            two_phase: false,
            triage_concurrency: TRIAGE_DEFAULT_CONCURRENCY,
            pacing: Duration::from_millis(10),
        }
    }

    pub fn with_tier(mut self, tier: Option<Tier>) -> Self {
        self.tier = tier;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_validation(mut self, validation: Option<ValidationMode>) -> Self {
        self.validation = validation;
        self
    }

    pub fn with_metrics(mut self, track_metrics: bool) -> Self {
        self.track_metrics = track_metrics;
        self
    }

    pub fn with_two_phase(mut self, two_phase: bool) -> Self {
        self.two_phase = two_phase;
        self
    }

    pub fn with_pacing(mut self, pacing: Duration) -> Self {
        self.pacing = pacing;
        self
    }

    fn window_size(&self) -> usize {
        self.concurrency.clamp(1, SCAN_MAX_CONCURRENCY)
    }
}

/// Lazy, ordered event sequence of one scan
pub struct ScanStream {
    rx: mpsc::Receiver<ScanEvent>,
}

impl Stream for ScanStream {
    type Item = ScanEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// Entry point for handle scans
#[derive(Clone)]
pub struct Scanner {
    registry: Arc<SiteRegistry>,
    fetcher: SharedFetcher,
    tracker: SharedTracker,
    config: ScannerConfig,
}

impl Scanner {
    pub fn new(registry: Arc<SiteRegistry>, fetcher: SharedFetcher, config: ScannerConfig) -> Self {
        let tracker = PrecisionTracker::shared(config.tracker.clone());
        Self {
            registry,
            fetcher,
            tracker,
            config,
        }
    }

    /// Scanner over the reqwest transport
    pub fn from_config(registry: SiteRegistry, config: ScannerConfig) -> anyhow::Result<Self> {
        let fetcher =
            ReqwestFetcher::new(config.http.clone()).context("failed to build HTTP client")?;
        Ok(Self::new(Arc::new(registry), Arc::new(fetcher), config))
    }

    /// Share a tracker between scanners
    pub fn with_tracker(mut self, tracker: SharedTracker) -> Self {
        self.tracker = tracker;
        self
    }

    pub fn registry(&self) -> &Arc<SiteRegistry> {
        &self.registry
    }

    pub fn tracker(&self) -> &SharedTracker {
        &self.tracker
    }

    /// Start a scan. Must be called inside a tokio runtime.
    pub fn scan(&self, options: ScanOptions) -> Result<ScanStream, ScanError> {
        let handle = options.handle.trim().to_string();
        if handle.is_empty() {
            return Err(ScanError::EmptyHandle);
        }

        let validator = options.validation.map(|mode| {
            SecondaryValidator::new(
                self.fetcher.clone(),
                ValidatorConfig {
                    mode,
                    timeouts: self.config.check_timeouts,
                },
            )
        });
        let job = ScanJob {
            sites: self.registry.select(options.tier),
            handle,
            prober: Prober::new(self.fetcher.clone()),
            fetcher: self.fetcher.clone(),
            validator,
            tracker: self.tracker.clone(),
            options,
        };

        let (tx, rx) = mpsc::channel(self.config.channel_capacity.max(1));
        tokio::spawn(async move {
            if job.run(&tx).await.is_err() {
                debug!("Scan for {} cancelled by consumer", job.handle);
            }
        });
        Ok(ScanStream { rx })
    }

    /// Status-code triage only, results in completion order
    pub async fn triage(
        &self,
        handle: &str,
        tier: Option<Tier>,
        config: &TriageConfig,
    ) -> Result<Vec<SiteResult>, ScanError> {
        let handle = handle.trim();
        if handle.is_empty() {
            return Err(ScanError::EmptyHandle);
        }
        let sites = self.registry.select(tier);
        Ok(triage_sites(&self.fetcher, &sites, handle, config).await)
    }
}

/// Everything the producer task owns
struct ScanJob {
    sites: Vec<Arc<SiteSpec>>,
    handle: String,
    prober: Prober,
    fetcher: SharedFetcher,
    validator: Option<SecondaryValidator>,
    tracker: SharedTracker,
    options: ScanOptions,
}

type Sender = mpsc::Sender<ScanEvent>;

impl ScanJob {
    async fn run(&self, tx: &Sender) -> Result<(), SendError<ScanEvent>> {
        let sites = if self.options.two_phase {
            self.shortlist(tx).await?
        } else {
            self.sites.clone()
        };

        let total = sites.len();
        let window_size = self.options.window_size();
        info!(
            "Scanning {} sites for {} ({} at a time)",
            total, self.handle, window_size
        );
        tx.send(ScanEvent::Progress { done: 0, total }).await?;

        let mut done = 0;
        let mut results = Vec::with_capacity(total);
        for window in sites.chunks(window_size) {
            for site in window {
                tx.send(ScanEvent::SiteStart {
                    id: site.id.clone(),
                })
                .await?;
            }

            let mut pending: FuturesUnordered<_> =
                window.iter().map(|site| self.probe(site)).collect();
            while let Some(result) = pending.next().await {
                done += 1;
                results.push(result.clone());
                tx.send(ScanEvent::SiteResult(result)).await?;
                tx.send(ScanEvent::Progress { done, total }).await?;
                if !self.options.pacing.is_zero() {
                    tokio::time::sleep(self.options.pacing).await;
                }
            }
        }

        if self.options.track_metrics {
            let report = {
                let mut tracker = self.tracker.lock();
                tracker.record_scan(&self.handle, results);
                tracker.generate_quality_report()
            };
            tx.send(ScanEvent::QualityReport { report }).await?;
        }

        info!("Scan for {} finished: {}/{}", self.handle, done, total);
        tx.send(ScanEvent::Done {
            summary: ScanSummary { done, total },
        })
        .await
    }

    /// Probe, classify and validate one site
    async fn probe(&self, site: &SiteSpec) -> SiteResult {
        let report = self.prober.check(site, &self.handle).await;
        match (&self.validator, report.handle) {
            (Some(validator), Some(handle)) => validator.review(site, &handle, report.result).await,
            _ => report.result,
        }
    }

    /// Sites triage did not rule out, in registry order
    async fn shortlist(&self, tx: &Sender) -> Result<Vec<Arc<SiteSpec>>, SendError<ScanEvent>> {
        let config = TriageConfig::default().with_concurrency(self.options.triage_concurrency);
        let triaged = triage_sites(&self.fetcher, &self.sites, &self.handle, &config).await;
        let keep: HashSet<&str> = triaged
            .iter()
            .filter(|r| matches!(r.status, ProbeStatus::Found | ProbeStatus::Inconclusive))
            .map(|r| r.site_id.as_str())
            .collect();

        let shortlist: Vec<Arc<SiteSpec>> = self
            .sites
            .iter()
            .filter(|s| keep.contains(s.id.as_str()))
            .cloned()
            .collect();
        info!(
            "Triage shortlisted {} of {} sites",
            shortlist.len(),
            self.sites.len()
        );
        tx.send(ScanEvent::Triage {
            shortlisted: shortlist.len(),
            total: self.sites.len(),
        })
        .await?;
        Ok(shortlist)
    }
}
