//! Precision tracking
//!
//! Keeps a bounded history of finished scans and per-site reliability
//! statistics, and turns them into a quality report:
//! - precision: share of definitive verdicts
//! - inconclusive and error rates
//! - mean validator confidence
//! - quality trend over a day window
//!
//! The tracker is a plain owned value. Scanners share it as
//! [`SharedTracker`] and lock it only when a scan completes.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::result::{ProbeStatus, SiteResult};

/// Tracker shared between scans
pub type SharedTracker = Arc<Mutex<PrecisionTracker>>;

/// Aggregate metrics over a set of results
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrecisionMetrics {
    pub total_scanned: usize,
    pub found: usize,
    pub not_found: usize,
    pub inconclusive: usize,
    pub errors: usize,
    /// Results that carried a validator confidence
    pub validated: usize,
    pub precision_score: f64,
    pub inconclusive_rate: f64,
    pub average_confidence: f64,
    pub quality_score: f64,
}

impl PrecisionMetrics {
    pub fn error_rate(&self) -> f64 {
        if self.total_scanned == 0 {
            0.0
        } else {
            self.errors as f64 / self.total_scanned as f64
        }
    }
}

/// Reliability statistics for one site
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteMetrics {
    pub site_id: String,
    pub attempts: u64,
    /// Definitive verdicts (found or not found)
    pub successes: u64,
    pub inconclusive: u64,
    pub average_latency: f64,
    pub reliability_score: f64,
    pub last_updated: DateTime<Utc>,
}

impl SiteMetrics {
    fn new(site_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            site_id: site_id.to_string(),
            attempts: 0,
            successes: 0,
            inconclusive: 0,
            average_latency: 0.0,
            reliability_score: 0.0,
            last_updated: now,
        }
    }

    pub fn inconclusive_rate(&self) -> f64 {
        if self.attempts == 0 {
            0.0
        } else {
            self.inconclusive as f64 / self.attempts as f64
        }
    }

    fn ingest(&mut self, result: &SiteResult, now: DateTime<Utc>) {
        self.attempts += 1;
        self.last_updated = now;
        match result.status {
            ProbeStatus::Found | ProbeStatus::NotFound => self.successes += 1,
            ProbeStatus::Inconclusive => self.inconclusive += 1,
            ProbeStatus::Error => {}
        }

        let latency = result.latency_ms as f64;
        self.average_latency = if self.attempts == 1 {
            latency
        } else {
            (self.average_latency + latency) / 2.0
        };
        self.reliability_score = self.successes as f64 / self.attempts as f64;
    }
}

/// One finished scan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanRecord {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub handle: String,
    pub results: Vec<SiteResult>,
    pub metrics: PrecisionMetrics,
}

/// Quality score movement over a window
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Trend {
    pub improving: bool,
    pub change: f64,
}

/// Rolling quality report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityReport {
    pub overall: PrecisionMetrics,
    pub trending: Trend,
    pub problematic_sites: Vec<SiteMetrics>,
    pub recommendations: Vec<String>,
}

/// Serializable snapshot of everything the tracker holds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsExport {
    pub scan_history: Vec<ScanRecord>,
    pub site_metrics: BTreeMap<String, SiteMetrics>,
    pub summary: QualityReport,
}

/// Tracker configuration
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Scan records kept before the oldest is evicted
    pub max_history: usize,
    /// Scans aggregated into the report's overall metrics
    pub report_window: usize,
    /// Day window for the trend
    pub trend_days: i64,
    /// Attempts before a site is judged problematic or reliable
    pub min_attempts: u64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            max_history: 100,
            report_window: 10,
            trend_days: 7,
            min_attempts: 5,
        }
    }
}

/// Scan history and per-site statistics
#[derive(Debug, Default)]
pub struct PrecisionTracker {
    config: TrackerConfig,
    history: VecDeque<ScanRecord>,
    sites: HashMap<String, SiteMetrics>,
}

fn rate(part: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64
    }
}

/// Metrics for an arbitrary set of results
pub fn calculate_metrics(results: &[SiteResult]) -> PrecisionMetrics {
    let total = results.len();
    if total == 0 {
        return PrecisionMetrics::default();
    }

    let count = |status: ProbeStatus| results.iter().filter(|r| r.status == status).count();
    let found = count(ProbeStatus::Found);
    let not_found = count(ProbeStatus::NotFound);
    let inconclusive = count(ProbeStatus::Inconclusive);
    let errors = count(ProbeStatus::Error);

    let confidences: Vec<f64> = results.iter().filter_map(|r| r.confidence).collect();
    let average_confidence = if confidences.is_empty() {
        0.0
    } else {
        confidences.iter().sum::<f64>() / confidences.len() as f64
    };

    let precision_score = rate(found + not_found, total);
    let inconclusive_rate = rate(inconclusive, total);
    let quality_score = (0.5 * precision_score
        + 0.3 * (1.0 - inconclusive_rate)
        + 0.2 * average_confidence)
        .min(1.0);

    PrecisionMetrics {
        total_scanned: total,
        found,
        not_found,
        inconclusive,
        errors,
        validated: confidences.len(),
        precision_score,
        inconclusive_rate,
        average_confidence,
        quality_score,
    }
}

impl PrecisionTracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            history: VecDeque::new(),
            sites: HashMap::new(),
        }
    }

    pub fn shared(config: TrackerConfig) -> SharedTracker {
        Arc::new(Mutex::new(Self::new(config)))
    }

    /// Scan records, oldest first
    pub fn history(&self) -> impl Iterator<Item = &ScanRecord> {
        self.history.iter()
    }

    pub fn site_metrics(&self, site_id: &str) -> Option<&SiteMetrics> {
        self.sites.get(site_id)
    }

    pub fn record_scan(&mut self, handle: &str, results: Vec<SiteResult>) -> Uuid {
        self.record_scan_at(handle, results, Utc::now())
    }

    pub fn record_scan_at(
        &mut self,
        handle: &str,
        results: Vec<SiteResult>,
        now: DateTime<Utc>,
    ) -> Uuid {
        for result in &results {
            self.sites
                .entry(result.site_id.clone())
                .or_insert_with(|| SiteMetrics::new(&result.site_id, now))
                .ingest(result, now);
        }

        let record = ScanRecord {
            id: Uuid::new_v4(),
            timestamp: now,
            handle: handle.to_string(),
            metrics: calculate_metrics(&results),
            results,
        };
        let id = record.id;
        debug!(
            "Recorded scan {} for {}: quality {:.2}",
            id, handle, record.metrics.quality_score
        );

        self.history.push_back(record);
        while self.history.len() > self.config.max_history {
            self.history.pop_front();
        }
        id
    }

    /// Sites whose inconclusive rate exceeds 30%, worst first
    pub fn problematic_sites(&self, min_attempts: u64) -> Vec<SiteMetrics> {
        let mut sites: Vec<SiteMetrics> = self
            .sites
            .values()
            .filter(|m| m.attempts >= min_attempts && m.inconclusive_rate() > 0.3)
            .cloned()
            .collect();
        sites.sort_by(|a, b| {
            b.inconclusive_rate()
                .partial_cmp(&a.inconclusive_rate())
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.site_id.cmp(&b.site_id))
        });
        sites
    }

    /// Top ten sites by reliability
    pub fn most_reliable_sites(&self, min_attempts: u64) -> Vec<SiteMetrics> {
        let mut sites: Vec<SiteMetrics> = self
            .sites
            .values()
            .filter(|m| m.attempts >= min_attempts)
            .cloned()
            .collect();
        sites.sort_by(|a, b| {
            b.reliability_score
                .partial_cmp(&a.reliability_score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.site_id.cmp(&b.site_id))
        });
        sites.truncate(10);
        sites
    }

    pub fn precision_trend(&self, days: i64) -> Trend {
        self.precision_trend_at(days, Utc::now())
    }

    pub fn precision_trend_at(&self, days: i64, now: DateTime<Utc>) -> Trend {
        let cutoff = cutoff(now, days);
        let mut recent = self.history.iter().filter(|s| s.timestamp > cutoff);
        let Some(first) = recent.next() else {
            return Trend::default();
        };
        let Some(last) = recent.last() else {
            return Trend::default();
        };
        let change = last.metrics.quality_score - first.metrics.quality_score;
        Trend {
            improving: change > 0.0,
            change,
        }
    }

    pub fn generate_quality_report(&self) -> QualityReport {
        self.generate_quality_report_at(Utc::now())
    }

    pub fn generate_quality_report_at(&self, now: DateTime<Utc>) -> QualityReport {
        if self.history.is_empty() {
            return QualityReport {
                overall: PrecisionMetrics::default(),
                trending: Trend::default(),
                problematic_sites: Vec::new(),
                recommendations: vec!["Run more scans to generate metrics".to_string()],
            };
        }

        let skip = self.history.len().saturating_sub(self.config.report_window);
        let recent: Vec<SiteResult> = self
            .history
            .iter()
            .skip(skip)
            .flat_map(|s| s.results.iter().cloned())
            .collect();
        let overall = calculate_metrics(&recent);
        let trending = self.precision_trend_at(self.config.trend_days, now);
        let problematic_sites = self.problematic_sites(self.config.min_attempts);
        let recommendations = recommendations(&overall, &problematic_sites);

        QualityReport {
            overall,
            trending,
            problematic_sites,
            recommendations,
        }
    }

    pub fn cleanup(&mut self, days_to_keep: i64) {
        self.cleanup_at(days_to_keep, Utc::now());
    }

    /// Drop scan records and site metrics older than the retention window
    pub fn cleanup_at(&mut self, days_to_keep: i64, now: DateTime<Utc>) {
        let cutoff = cutoff(now, days_to_keep);
        let before = (self.history.len(), self.sites.len());
        self.history.retain(|s| s.timestamp > cutoff);
        self.sites.retain(|_, m| m.last_updated >= cutoff);
        info!(
            "Tracker cleanup: {} scans and {} sites dropped",
            before.0 - self.history.len(),
            before.1 - self.sites.len()
        );
    }

    pub fn export_metrics(&self) -> MetricsExport {
        MetricsExport {
            scan_history: self.history.iter().cloned().collect(),
            site_metrics: self
                .sites
                .iter()
                .map(|(id, m)| (id.clone(), m.clone()))
                .collect(),
            summary: self.generate_quality_report(),
        }
    }
}

fn recommendations(overall: &PrecisionMetrics, problematic: &[SiteMetrics]) -> Vec<String> {
    let mut out = Vec::new();
    if overall.inconclusive_rate > 0.3 {
        out.push(
            "High inconclusive rate (>30%). Consider enabling additional validation checks."
                .to_string(),
        );
    }
    if overall.precision_score < 0.7 {
        out.push("Low overall precision. Review detection patterns and timeouts.".to_string());
    }
    if problematic.len() > 5 {
        out.push(format!(
            "{} sites with a high inconclusive rate. Prioritize fixing them.",
            problematic.len()
        ));
    }
    if overall.error_rate() > 0.1 {
        out.push("High error rate (>10%). Check connectivity and rate limits.".to_string());
    }
    if overall.validated > 0 && overall.average_confidence < 0.5 {
        out.push("Low average confidence. Add more validation checks.".to_string());
    }
    if out.is_empty() {
        out.push("Overall quality is satisfactory. Keep monitoring.".to_string());
    }
    out
}

/// `now` minus `days`, saturating at the chrono range
fn cutoff(now: DateTime<Utc>, days: i64) -> DateTime<Utc> {
    TimeDelta::try_days(days)
        .and_then(|delta| now.checked_sub_signed(delta))
        .unwrap_or(if days < 0 {
            DateTime::<Utc>::MAX_UTC
        } else {
            DateTime::<Utc>::MIN_UTC
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(site: &str, status: ProbeStatus, latency: u64) -> SiteResult {
        SiteResult::new(site, status, format!("https://{}.example/x", site)).with_latency(latency)
    }

    #[test]
    fn test_empty_metrics_are_zero() {
        assert_eq!(calculate_metrics(&[]), PrecisionMetrics::default());
        assert_eq!(calculate_metrics(&[]).quality_score, 0.0);
    }

    #[test]
    fn test_precision_formula() {
        let results = vec![
            result("a", ProbeStatus::Found, 10),
            result("b", ProbeStatus::NotFound, 10),
            result("c", ProbeStatus::Inconclusive, 10),
            result("d", ProbeStatus::Error, 10),
        ];
        let metrics = calculate_metrics(&results);
        assert_eq!(metrics.precision_score, 0.5);
        assert_eq!(metrics.inconclusive_rate, 0.25);
        assert_eq!(metrics.average_confidence, 0.0);
        assert!((metrics.quality_score - (0.25 + 0.3 * 0.75)).abs() < 1e-9);
    }

    #[test]
    fn test_average_confidence_over_validated_results() {
        let mut a = result("a", ProbeStatus::Found, 10);
        a.confidence = Some(0.8);
        let mut b = result("b", ProbeStatus::Inconclusive, 10);
        b.confidence = Some(0.4);
        let c = result("c", ProbeStatus::NotFound, 10);
        let metrics = calculate_metrics(&[a, b, c]);
        assert_eq!(metrics.validated, 2);
        assert!((metrics.average_confidence - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_history_eviction_keeps_latest_in_order() {
        let mut tracker = PrecisionTracker::default();
        for i in 0..105 {
            tracker.record_scan(&format!("user{}", i), vec![result("a", ProbeStatus::Found, 5)]);
        }
        let handles: Vec<&str> = tracker.history().map(|s| s.handle.as_str()).collect();
        assert_eq!(handles.len(), 100);
        assert_eq!(handles[0], "user5");
        assert_eq!(handles[99], "user104");
    }

    #[test]
    fn test_site_metrics_running_average() {
        let mut tracker = PrecisionTracker::default();
        tracker.record_scan("u", vec![result("a", ProbeStatus::Found, 100)]);
        tracker.record_scan("u", vec![result("a", ProbeStatus::Inconclusive, 300)]);
        let metrics = tracker.site_metrics("a").unwrap();
        assert_eq!(metrics.attempts, 2);
        assert_eq!(metrics.successes, 1);
        assert_eq!(metrics.inconclusive, 1);
        assert_eq!(metrics.average_latency, 200.0);
        assert_eq!(metrics.reliability_score, 0.5);
    }

    #[test]
    fn test_problematic_and_reliable_sites() {
        let mut tracker = PrecisionTracker::default();
        for _ in 0..5 {
            tracker.record_scan(
                "u",
                vec![
                    result("flaky", ProbeStatus::Inconclusive, 10),
                    result("solid", ProbeStatus::Found, 10),
                ],
            );
        }
        tracker.record_scan("u", vec![result("rare", ProbeStatus::Inconclusive, 10)]);

        let problematic = tracker.problematic_sites(5);
        assert_eq!(problematic.len(), 1);
        assert_eq!(problematic[0].site_id, "flaky");

        let reliable = tracker.most_reliable_sites(5);
        assert_eq!(reliable[0].site_id, "solid");
        assert_eq!(reliable.len(), 2);
    }

    #[test]
    fn test_trend_needs_two_scans() {
        let mut tracker = PrecisionTracker::default();
        let now = Utc::now();
        tracker.record_scan_at("u", vec![result("a", ProbeStatus::Inconclusive, 1)], now);
        assert_eq!(tracker.precision_trend_at(7, now), Trend::default());

        tracker.record_scan_at("u", vec![result("a", ProbeStatus::Found, 1)], now);
        let trend = tracker.precision_trend_at(7, now);
        assert!(trend.improving);
        assert!(trend.change > 0.0);
    }

    #[test]
    fn test_trend_ignores_scans_outside_window() {
        let mut tracker = PrecisionTracker::default();
        let now = Utc::now();
        tracker.record_scan_at(
            "u",
            vec![result("a", ProbeStatus::Found, 1)],
            now - TimeDelta::days(10),
        );
        tracker.record_scan_at("u", vec![result("a", ProbeStatus::Inconclusive, 1)], now);
        assert_eq!(tracker.precision_trend_at(7, now), Trend::default());
    }

    #[test]
    fn test_empty_report() {
        let report = PrecisionTracker::default().generate_quality_report();
        assert_eq!(report.overall, PrecisionMetrics::default());
        assert_eq!(report.recommendations.len(), 1);
        assert!(report.recommendations[0].contains("more scans"));
    }

    #[test]
    fn test_report_recommendations() {
        let mut tracker = PrecisionTracker::default();
        tracker.record_scan(
            "u",
            vec![
                result("a", ProbeStatus::Inconclusive, 1),
                result("b", ProbeStatus::Error, 1),
            ],
        );
        let report = tracker.generate_quality_report();
        assert!(report.recommendations.iter().any(|r| r.contains("inconclusive rate")));
        assert!(report.recommendations.iter().any(|r| r.contains("precision")));
        assert!(report.recommendations.iter().any(|r| r.contains("error rate")));

        let mut healthy = PrecisionTracker::default();
        healthy.record_scan("u", vec![result("a", ProbeStatus::Found, 1)]);
        let report = healthy.generate_quality_report();
        assert_eq!(report.recommendations, vec!["Overall quality is satisfactory. Keep monitoring."]);
    }

    #[test]
    fn test_cleanup_drops_old_entries() {
        let mut tracker = PrecisionTracker::default();
        let now = Utc::now();
        tracker.record_scan_at(
            "old",
            vec![result("stale", ProbeStatus::Found, 1)],
            now - TimeDelta::days(40),
        );
        tracker.record_scan_at("new", vec![result("fresh", ProbeStatus::Found, 1)], now);
        tracker.cleanup_at(30, now);

        assert_eq!(tracker.history().count(), 1);
        assert!(tracker.site_metrics("stale").is_none());
        assert!(tracker.site_metrics("fresh").is_some());
    }

    #[test]
    fn test_extreme_day_windows_saturate() {
        let mut tracker = PrecisionTracker::default();
        let now = Utc::now();
        tracker.record_scan_at("a", vec![result("a", ProbeStatus::Found, 1)], now - TimeDelta::days(1));
        tracker.record_scan_at("b", vec![result("b", ProbeStatus::Inconclusive, 1)], now);

        // the whole history falls inside the window
        let trend = tracker.precision_trend_at(i64::MAX, now);
        assert!(!trend.improving);
        assert!(trend.change < 0.0);
        tracker.cleanup_at(i64::MAX, now);
        assert_eq!(tracker.history().count(), 2);
        assert!(tracker.site_metrics("a").is_some());

        assert_eq!(cutoff(now, i64::MIN), DateTime::<Utc>::MAX_UTC);
        tracker.cleanup_at(i64::MIN, now);
        assert_eq!(tracker.history().count(), 0);
    }

    #[test]
    fn test_export_snapshot_serializes() {
        let mut tracker = PrecisionTracker::default();
        tracker.record_scan("u", vec![result("a", ProbeStatus::Found, 1)]);
        let export = tracker.export_metrics();
        let value = serde_json::to_value(&export).unwrap();
        assert_eq!(value["scanHistory"].as_array().unwrap().len(), 1);
        assert_eq!(value["siteMetrics"]["a"]["attempts"], 1);
        assert!(value["summary"]["recommendations"].is_array());
    }
}
