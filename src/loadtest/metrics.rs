//! HdrHistogram-based aggregate statistics for a load test run.
//!
//! Provides [`MetricsRecorder`], the single owner of all counters: virtual
//! users never touch it directly, they send [`Sample`] values over an mpsc
//! channel and the engine's aggregator task records them here.
//!
//! # Design
//!
//! - **Single-owner**: No `Arc<Mutex>`. One task owns the recorder.
//! - **Per-endpoint latency**: Each endpoint gets its own histogram, plus one
//!   histogram across all endpoints.
//! - **Check counters**: Pass/fail counts keyed by `(endpoint, check name)`.
//! - **Microsecond resolution**: Recorded in microseconds, reported as
//!   [`Duration`] so local targets with sub-millisecond latency stay readable.

use std::collections::BTreeMap;
use std::time::Duration;

use hdrhistogram::Histogram;

use crate::loadtest::check::CheckResult;
use crate::loadtest::client::RequestRecord;

/// Messages sent from virtual users to the aggregator.
#[derive(Debug, Clone)]
pub enum Sample {
    /// One completed (or failed) HTTP request.
    Request(RequestSample),
    /// One evaluated check.
    Check(CheckSample),
    /// A VU finished one full script iteration.
    Iteration { vu_id: u32 },
    /// A VU's script panicked and the VU stopped.
    VuError { vu_id: u32, message: String },
}

/// A single request measurement, stripped of the response body.
#[derive(Debug, Clone)]
pub struct RequestSample {
    /// Endpoint key the request is aggregated under.
    pub endpoint: String,
    /// Wall-clock duration of the request.
    pub duration: Duration,
    /// HTTP status, `0` on transport failure.
    pub status: u16,
    /// Failure category, `None` when the request succeeded.
    pub failure: Option<&'static str>,
}

impl RequestSample {
    /// Build a sample from a request record.
    pub fn from_record(endpoint: impl Into<String>, record: &RequestRecord) -> Self {
        Self {
            endpoint: endpoint.into(),
            duration: record.duration,
            status: record.status,
            failure: record.failure_category(),
        }
    }
}

/// Outcome of one check, keyed by endpoint and check name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckSample {
    /// Endpoint key of the request the check ran against.
    pub endpoint: String,
    /// Check name.
    pub name: String,
    /// Whether it passed.
    pub passed: bool,
}

impl CheckSample {
    /// Build a sample from a check result.
    pub fn from_result(endpoint: impl Into<String>, result: &CheckResult) -> Self {
        Self {
            endpoint: endpoint.into(),
            name: result.name.clone(),
            passed: result.passed,
        }
    }
}

/// Latency distribution summary.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LatencySnapshot {
    pub min: Duration,
    pub mean: Duration,
    pub p50: Duration,
    pub p90: Duration,
    pub p95: Duration,
    pub p99: Duration,
    pub max: Duration,
}

/// Per-endpoint metrics snapshot.
#[derive(Debug, Clone)]
pub struct EndpointSnapshot {
    /// Endpoint key.
    pub name: String,
    /// Total requests to this endpoint.
    pub total_requests: u64,
    /// Requests that failed (transport error or 4xx/5xx).
    pub failed_requests: u64,
    /// Failure fraction (0.0..=1.0).
    pub error_rate: f64,
    /// Latency across all requests to this endpoint.
    pub latency: LatencySnapshot,
    /// Counts per HTTP status (0 = transport failure).
    pub status_counts: BTreeMap<u16, u64>,
}

/// Pass/fail counts for one `(endpoint, check)` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckSnapshot {
    pub endpoint: String,
    pub name: String,
    pub passes: u64,
    pub fails: u64,
}

impl CheckSnapshot {
    /// Pass fraction (0.0..=1.0). Returns 0.0 if the check never ran.
    pub fn pass_rate(&self) -> f64 {
        let total = self.passes + self.fails;
        if total == 0 {
            return 0.0;
        }
        self.passes as f64 / total as f64
    }
}

/// Point-in-time snapshot of all aggregate statistics.
#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    /// Total requests issued.
    pub total_requests: u64,
    /// Requests that failed (transport error or 4xx/5xx).
    pub failed_requests: u64,
    /// Failure fraction (0.0..=1.0).
    pub error_rate: f64,
    /// Completed script iterations across all VUs.
    pub iterations: u64,
    /// VUs stopped by a script panic.
    pub vu_errors: u64,
    /// Latency across every request.
    pub latency: LatencySnapshot,
    /// Per-endpoint metrics sorted by endpoint name.
    pub endpoints: Vec<EndpointSnapshot>,
    /// Per-check counters sorted by endpoint, then check name.
    pub checks: Vec<CheckSnapshot>,
    /// Failure counts by category (timeout, connection, http_5xx, ...).
    pub error_category_counts: BTreeMap<String, u64>,
}

impl MetricsSnapshot {
    /// Counters for one check, if it ran at least once.
    pub fn check(&self, endpoint: &str, name: &str) -> Option<&CheckSnapshot> {
        self.checks
            .iter()
            .find(|c| c.endpoint == endpoint && c.name == name)
    }

    /// Metrics for one endpoint, if it received any requests.
    pub fn endpoint(&self, name: &str) -> Option<&EndpointSnapshot> {
        self.endpoints.iter().find(|e| e.name == name)
    }

    /// Total passing check evaluations.
    pub fn checks_passed(&self) -> u64 {
        self.checks.iter().map(|c| c.passes).sum()
    }

    /// Total failing check evaluations.
    pub fn checks_failed(&self) -> u64 {
        self.checks.iter().map(|c| c.fails).sum()
    }
}

/// Histogram plus counters for one endpoint.
struct EndpointMetrics {
    histogram: Histogram<u64>,
    failed: u64,
    status_counts: BTreeMap<u16, u64>,
}

impl EndpointMetrics {
    fn new() -> Self {
        Self {
            histogram: new_histogram(),
            failed: 0,
            status_counts: BTreeMap::new(),
        }
    }
}

fn new_histogram() -> Histogram<u64> {
    let mut histogram = Histogram::<u64>::new(3).expect("3 sigfigs is always valid");
    histogram.auto(true);
    histogram
}

fn latency_of(histogram: &Histogram<u64>) -> LatencySnapshot {
    if histogram.is_empty() {
        return LatencySnapshot::default();
    }
    LatencySnapshot {
        min: Duration::from_micros(histogram.min()),
        mean: Duration::from_secs_f64(histogram.mean() / 1_000_000.0),
        p50: Duration::from_micros(histogram.value_at_quantile(0.50)),
        p90: Duration::from_micros(histogram.value_at_quantile(0.90)),
        p95: Duration::from_micros(histogram.value_at_quantile(0.95)),
        p99: Duration::from_micros(histogram.value_at_quantile(0.99)),
        max: Duration::from_micros(histogram.max()),
    }
}

/// Single-owner recorder for every [`Sample`] a test produces.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use httpload::loadtest::client::{HttpMethod, RequestRecord};
/// use httpload::loadtest::metrics::{MetricsRecorder, RequestSample, Sample};
///
/// let record = RequestRecord::completed(
///     HttpMethod::Get,
///     "http://localhost/health",
///     200,
///     Duration::from_millis(42),
///     None,
/// );
/// let mut recorder = MetricsRecorder::new();
/// recorder.record(&Sample::Request(RequestSample::from_record("health", &record)));
///
/// let snap = recorder.snapshot();
/// assert_eq!(snap.total_requests, 1);
/// assert_eq!(snap.failed_requests, 0);
/// ```
pub struct MetricsRecorder {
    overall: Histogram<u64>,
    endpoints: BTreeMap<String, EndpointMetrics>,
    checks: BTreeMap<(String, String), (u64, u64)>,
    total_requests: u64,
    failed_requests: u64,
    iterations: u64,
    vu_errors: u64,
    error_category_counts: BTreeMap<String, u64>,
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsRecorder {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self {
            overall: new_histogram(),
            endpoints: BTreeMap::new(),
            checks: BTreeMap::new(),
            total_requests: 0,
            failed_requests: 0,
            iterations: 0,
            vu_errors: 0,
            error_category_counts: BTreeMap::new(),
        }
    }

    /// Ingest one sample.
    pub fn record(&mut self, sample: &Sample) {
        match sample {
            Sample::Request(req) => self.record_request(req),
            Sample::Check(check) => {
                let counter = self
                    .checks
                    .entry((check.endpoint.clone(), check.name.clone()))
                    .or_insert((0, 0));
                if check.passed {
                    counter.0 += 1;
                } else {
                    counter.1 += 1;
                }
            },
            Sample::Iteration { .. } => self.iterations += 1,
            Sample::VuError { .. } => self.vu_errors += 1,
        }
    }

    fn record_request(&mut self, sample: &RequestSample) {
        let micros = u64::try_from(sample.duration.as_micros()).unwrap_or(u64::MAX);
        let _ = self.overall.record(micros);
        self.total_requests += 1;

        let endpoint = self
            .endpoints
            .entry(sample.endpoint.clone())
            .or_insert_with(EndpointMetrics::new);
        let _ = endpoint.histogram.record(micros);
        *endpoint.status_counts.entry(sample.status).or_insert(0) += 1;

        if let Some(category) = sample.failure {
            self.failed_requests += 1;
            endpoint.failed += 1;
            *self
                .error_category_counts
                .entry(category.to_owned())
                .or_insert(0) += 1;
        }
    }

    /// Failure fraction (0.0..=1.0). Returns 0.0 if no requests were recorded.
    pub fn error_rate(&self) -> f64 {
        if self.total_requests == 0 {
            return 0.0;
        }
        self.failed_requests as f64 / self.total_requests as f64
    }

    /// Capture a point-in-time snapshot of all metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let endpoints = self
            .endpoints
            .iter()
            .map(|(name, metrics)| {
                let total = metrics.histogram.len();
                EndpointSnapshot {
                    name: name.clone(),
                    total_requests: total,
                    failed_requests: metrics.failed,
                    error_rate: if total == 0 {
                        0.0
                    } else {
                        metrics.failed as f64 / total as f64
                    },
                    latency: latency_of(&metrics.histogram),
                    status_counts: metrics.status_counts.clone(),
                }
            })
            .collect();

        let checks = self
            .checks
            .iter()
            .map(|((endpoint, name), (passes, fails))| CheckSnapshot {
                endpoint: endpoint.clone(),
                name: name.clone(),
                passes: *passes,
                fails: *fails,
            })
            .collect();

        MetricsSnapshot {
            total_requests: self.total_requests,
            failed_requests: self.failed_requests,
            error_rate: self.error_rate(),
            iterations: self.iterations,
            vu_errors: self.vu_errors,
            latency: latency_of(&self.overall),
            endpoints,
            checks,
            error_category_counts: self.error_category_counts.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(endpoint: &str, millis: u64, status: u16) -> Sample {
        let failure = match status {
            0 => Some("connection"),
            500..=599 => Some("http_5xx"),
            _ => None,
        };
        Sample::Request(RequestSample {
            endpoint: endpoint.to_string(),
            duration: Duration::from_millis(millis),
            status,
            failure,
        })
    }

    fn check(endpoint: &str, name: &str, passed: bool) -> Sample {
        Sample::Check(CheckSample {
            endpoint: endpoint.to_string(),
            name: name.to_string(),
            passed,
        })
    }

    #[test]
    fn test_new_recorder_is_empty() {
        let snap = MetricsRecorder::new().snapshot();
        assert_eq!(snap.total_requests, 0);
        assert_eq!(snap.error_rate, 0.0);
        assert!(snap.endpoints.is_empty());
        assert_eq!(snap.latency, LatencySnapshot::default());
    }

    #[test]
    fn test_requests_are_split_by_endpoint() {
        let mut recorder = MetricsRecorder::new();
        for _ in 0..3 {
            recorder.record(&request("data", 100, 200));
        }
        recorder.record(&request("health", 5, 200));

        let snap = recorder.snapshot();
        assert_eq!(snap.total_requests, 4);
        assert_eq!(snap.endpoint("data").unwrap().total_requests, 3);
        assert_eq!(snap.endpoint("health").unwrap().total_requests, 1);
        assert_eq!(snap.endpoints[0].name, "data", "sorted by name");
    }

    #[test]
    fn test_percentiles_known_distribution() {
        let mut recorder = MetricsRecorder::new();
        for i in 1..=100 {
            recorder.record(&request("data", i, 200));
        }
        let latency = recorder.snapshot().endpoint("data").unwrap().latency;
        let p50 = latency.p50.as_millis() as i64;
        let p95 = latency.p95.as_millis() as i64;
        assert!((p50 - 50).abs() <= 1, "p50 was {p50}");
        assert!((p95 - 95).abs() <= 1, "p95 was {p95}");
        assert_eq!(latency.min.as_millis(), 1);
        assert!((latency.max.as_millis() as i64 - 100).abs() <= 1);
    }

    #[test]
    fn test_failures_and_categories() {
        let mut recorder = MetricsRecorder::new();
        recorder.record(&request("data", 10, 200));
        recorder.record(&request("data", 10, 500));
        recorder.record(&request("data", 10, 0));
        recorder.record(&request("data", 10, 503));

        let snap = recorder.snapshot();
        assert_eq!(snap.failed_requests, 3);
        assert!((snap.error_rate - 0.75).abs() < 1e-9);
        assert_eq!(snap.error_category_counts.get("http_5xx"), Some(&2));
        assert_eq!(snap.error_category_counts.get("connection"), Some(&1));
        let data = snap.endpoint("data").unwrap();
        assert_eq!(data.status_counts.get(&0), Some(&1));
        assert_eq!(data.status_counts.get(&500), Some(&1));
    }

    #[test]
    fn test_check_counters_keyed_by_endpoint_and_name() {
        let mut recorder = MetricsRecorder::new();
        recorder.record(&check("data", "status is 200", true));
        recorder.record(&check("data", "status is 200", false));
        recorder.record(&check("data", "status is 200", true));
        recorder.record(&check("health", "status is 200", true));

        let snap = recorder.snapshot();
        let data = snap.check("data", "status is 200").unwrap();
        assert_eq!((data.passes, data.fails), (2, 1));
        let health = snap.check("health", "status is 200").unwrap();
        assert_eq!((health.passes, health.fails), (1, 0));
        assert_eq!(snap.checks_passed(), 3);
        assert_eq!(snap.checks_failed(), 1);
        assert!((data.pass_rate() - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_iterations_and_vu_errors() {
        let mut recorder = MetricsRecorder::new();
        recorder.record(&Sample::Iteration { vu_id: 0 });
        recorder.record(&Sample::Iteration { vu_id: 1 });
        recorder.record(&Sample::VuError {
            vu_id: 1,
            message: "boom".to_string(),
        });
        let snap = recorder.snapshot();
        assert_eq!(snap.iterations, 2);
        assert_eq!(snap.vu_errors, 1);
    }

    #[test]
    fn test_sub_millisecond_latency_is_kept() {
        let mut recorder = MetricsRecorder::new();
        recorder.record(&Sample::Request(RequestSample {
            endpoint: "health".to_string(),
            duration: Duration::from_micros(350),
            status: 200,
            failure: None,
        }));
        let p50 = recorder.snapshot().latency.p50;
        assert!(p50 > Duration::ZERO && p50 < Duration::from_millis(1));
    }
}
