//! Named pass/fail checks evaluated against a [`RequestRecord`].
//!
//! A [`CheckSet`] is an ordered mapping from check name to [`Predicate`].
//! [`run_checks`] evaluates every predicate independently: a predicate that
//! errors or panics counts as a failed check and never affects its siblings
//! or the virtual user that issued the request.
//!
//! Closures of type `Fn(&RequestRecord) -> bool` are predicates, so script
//! authors can write checks inline. Config files use the declarative
//! [`CheckRule`] instead.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::loadtest::client::RequestRecord;
use crate::loadtest::error::CheckError;

/// A boolean assertion over a response.
pub trait Predicate: Send + Sync {
    /// Returns `Ok(true)` when the check passes. `Ok(false)` and `Err(_)` both
    /// count as failure; the error is kept as detail for the report.
    fn evaluate(&self, record: &RequestRecord) -> Result<bool, CheckError>;
}

impl<F> Predicate for F
where
    F: Fn(&RequestRecord) -> bool + Send + Sync,
{
    fn evaluate(&self, record: &RequestRecord) -> Result<bool, CheckError> {
        Ok(self(record))
    }
}

/// Declarative check rules accepted in TOML scenario files.
///
/// # Example TOML
///
/// ```toml
/// check = [
///   { name = "status is 200", type = "status", equals = 200 },
///   { name = "response time < 500ms", type = "duration_below", ms = 500 },
///   { name = "has message", type = "json_field", field = "message" },
///   { name = "has data array", type = "json_array", field = "data" },
/// ]
/// ```
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CheckRule {
    /// Status code equals `equals`.
    Status { equals: u16 },
    /// Status code falls in the inclusive range `[min, max]`.
    StatusRange { min: u16, max: u16 },
    /// Total request duration is strictly below `ms` milliseconds.
    DurationBelow { ms: u64 },
    /// JSON body has a value at `field` (dotted path, e.g. `"meta.id"`). An
    /// explicit `null` counts as present.
    JsonField { field: String },
    /// JSON body has an array at `field`.
    JsonArray { field: String },
    /// Body text contains `text`.
    BodyContains { text: String },
}

impl Predicate for CheckRule {
    fn evaluate(&self, record: &RequestRecord) -> Result<bool, CheckError> {
        match self {
            Self::Status { equals } => Ok(record.status == *equals),
            Self::StatusRange { min, max } => Ok((*min..=*max).contains(&record.status)),
            Self::DurationBelow { ms } => Ok(record.duration.as_millis() < u128::from(*ms)),
            Self::JsonField { field } => json_path(record, field).map(|_| true),
            Self::JsonArray { field } => Ok(json_path(record, field)?.is_array()),
            Self::BodyContains { text } => Ok(record.body().is_some_and(|b| b.contains(text))),
        }
    }
}

/// Resolve a dotted path like `"data"` or `"meta.page"` in the JSON body.
fn json_path<'a>(
    record: &'a RequestRecord,
    path: &str,
) -> Result<&'a serde_json::Value, CheckError> {
    let mut value = record.json()?;
    for segment in path.split('.').filter(|s| !s.is_empty()) {
        value = value.get(segment).ok_or_else(|| CheckError::MissingField {
            field: path.to_string(),
        })?;
    }
    Ok(value)
}

/// Ordered name → predicate mapping evaluated against each response.
#[derive(Clone, Default)]
pub struct CheckSet {
    checks: Vec<(String, Arc<dyn Predicate>)>,
}

impl CheckSet {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a check, replacing any existing check with the same name.
    pub fn check(mut self, name: impl Into<String>, predicate: impl Predicate + 'static) -> Self {
        self.insert(name, Arc::new(predicate));
        self
    }

    /// Adds a shared predicate, replacing any existing check with the same name.
    pub fn insert(&mut self, name: impl Into<String>, predicate: Arc<dyn Predicate>) {
        let name = name.into();
        match self.checks.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = predicate,
            None => self.checks.push((name, predicate)),
        }
    }

    /// Number of checks in the set.
    pub fn len(&self) -> usize {
        self.checks.len()
    }

    /// Returns `true` if the set has no checks.
    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }

    /// Check names in evaluation order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.checks.iter().map(|(n, _)| n.as_str())
    }
}

impl fmt::Debug for CheckSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

/// Outcome of one check against one response.
#[derive(Debug, Clone)]
pub struct CheckResult {
    /// Check name as declared in the set.
    pub name: String,
    /// Whether the check passed.
    pub passed: bool,
    /// Why the check failed when the predicate could not return a boolean.
    pub detail: Option<CheckError>,
    /// The response the check was evaluated against.
    pub record: Arc<RequestRecord>,
}

/// Evaluate every check in `checks` against `record`.
///
/// Each predicate runs in isolation: errors and panics are converted into a
/// failed [`CheckResult`] so sibling checks still run.
pub fn run_checks(record: &Arc<RequestRecord>, checks: &CheckSet) -> Vec<CheckResult> {
    checks
        .checks
        .iter()
        .map(|(name, predicate)| {
            let outcome = catch_unwind(AssertUnwindSafe(|| predicate.evaluate(record)))
                .unwrap_or_else(|panic| {
                    Err(CheckError::Predicate {
                        message: panic_message(panic.as_ref()),
                    })
                });
            let (passed, detail) = match outcome {
                Ok(passed) => (passed, None),
                Err(err) => (false, Some(err)),
            };
            CheckResult {
                name: name.clone(),
                passed,
                detail,
                record: Arc::clone(record),
            }
        })
        .collect()
}

/// Best-effort text from a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loadtest::client::HttpMethod;
    use crate::loadtest::error::RequestError;
    use std::time::Duration;

    fn record(status: u16, millis: u64, body: Option<&str>) -> Arc<RequestRecord> {
        Arc::new(RequestRecord::completed(
            HttpMethod::Get,
            "http://fastapi:8000/data",
            status,
            Duration::from_millis(millis),
            body.map(str::to_string),
        ))
    }

    fn data_checks() -> CheckSet {
        CheckSet::new()
            .check("status is 200", CheckRule::Status { equals: 200 })
            .check("response time < 500ms", CheckRule::DurationBelow { ms: 500 })
            .check(
                "has message",
                CheckRule::JsonField {
                    field: "message".to_string(),
                },
            )
            .check(
                "has data array",
                CheckRule::JsonArray {
                    field: "data".to_string(),
                },
            )
    }

    #[test]
    fn test_healthy_data_response_passes_all_four() {
        let rec = record(200, 120, Some(r#"{"message":"ok","data":[1,2]}"#));
        let results = run_checks(&rec, &data_checks());
        assert_eq!(results.len(), 4);
        assert!(results.iter().all(|r| r.passed), "{results:?}");
        let names: Vec<_> = results.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(
            names,
            [
                "status is 200",
                "response time < 500ms",
                "has message",
                "has data array"
            ]
        );
    }

    #[test]
    fn test_server_error_fails_status_only() {
        let rec = record(500, 20, Some(r#"{"message":"boom","data":[]}"#));
        let results = run_checks(&rec, &data_checks());
        assert!(!results[0].passed);
        assert!(results[1..].iter().all(|r| r.passed));
    }

    #[test]
    fn test_slow_response_fails_latency_check() {
        let rec = record(200, 650, Some(r#"{"message":"ok","data":[]}"#));
        let results = run_checks(&rec, &data_checks());
        assert!(!results[1].passed);
    }

    #[test]
    fn test_malformed_body_fails_only_json_checks() {
        let rec = record(200, 10, Some("not json"));
        let results = run_checks(&rec, &data_checks());
        assert!(results[0].passed);
        assert!(results[1].passed);
        assert!(!results[2].passed);
        assert!(!results[3].passed);
        assert!(matches!(results[2].detail, Some(CheckError::Json { .. })));
    }

    #[test]
    fn test_missing_field_and_wrong_type() {
        let rec = record(200, 10, Some(r#"{"data":"nope"}"#));
        let results = run_checks(&rec, &data_checks());
        assert!(!results[2].passed);
        assert!(matches!(
            results[2].detail,
            Some(CheckError::MissingField { .. })
        ));
        assert!(!results[3].passed, "string is not an array");
        assert!(results[3].detail.is_none());
    }

    #[test]
    fn test_transport_failure_fails_every_check() {
        let rec = Arc::new(RequestRecord::failed(
            HttpMethod::Get,
            "http://fastapi:8000/data",
            Duration::from_millis(5000),
            RequestError::Timeout,
        ));
        let results = run_checks(&rec, &data_checks());
        assert!(results.iter().all(|r| !r.passed));
    }

    #[test]
    fn test_panicking_predicate_is_isolated() {
        let checks = CheckSet::new()
            .check("explodes", |_: &RequestRecord| -> bool { panic!("bad check") })
            .check("status is 200", |r: &RequestRecord| r.status == 200);
        let results = run_checks(&record(200, 1, None), &checks);
        assert!(!results[0].passed);
        match &results[0].detail {
            Some(CheckError::Predicate { message }) => assert!(message.contains("bad check")),
            other => panic!("expected predicate error, got {other:?}"),
        }
        assert!(results[1].passed);
    }

    #[test]
    fn test_json_field_null_counts_as_present() {
        let checks = CheckSet::new().check(
            "has message",
            CheckRule::JsonField {
                field: "message".to_string(),
            },
        );
        let results = run_checks(&record(200, 1, Some(r#"{"message":null}"#)), &checks);
        assert!(results[0].passed, "{results:?}");

        let results = run_checks(&record(200, 1, Some(r#"{"data":[]}"#)), &checks);
        assert!(!results[0].passed);
        assert!(matches!(
            results[0].detail,
            Some(CheckError::MissingField { .. })
        ));
    }

    #[test]
    fn test_nested_json_path() {
        let rec = record(200, 1, Some(r#"{"meta":{"page":1,"items":[]}}"#));
        let checks = CheckSet::new()
            .check(
                "page",
                CheckRule::JsonField {
                    field: "meta.page".to_string(),
                },
            )
            .check(
                "items",
                CheckRule::JsonArray {
                    field: "meta.items".to_string(),
                },
            );
        assert!(run_checks(&rec, &checks).iter().all(|r| r.passed));
    }

    #[test]
    fn test_status_range_and_body_contains() {
        let rec = record(204, 1, Some("healthy"));
        let checks = CheckSet::new()
            .check("2xx", CheckRule::StatusRange { min: 200, max: 299 })
            .check(
                "says healthy",
                CheckRule::BodyContains {
                    text: "healthy".to_string(),
                },
            );
        assert!(run_checks(&rec, &checks).iter().all(|r| r.passed));
    }

    #[test]
    fn test_insert_replaces_same_name() {
        let checks = CheckSet::new()
            .check("status", CheckRule::Status { equals: 404 })
            .check("status", CheckRule::Status { equals: 200 });
        assert_eq!(checks.len(), 1);
        assert!(run_checks(&record(200, 1, None), &checks)[0].passed);
    }

    #[test]
    fn test_check_rule_parses_from_toml() {
        #[derive(Deserialize)]
        struct Wrapper {
            check: Vec<CheckRule>,
        }
        let parsed: Wrapper = toml::from_str(
            r#"
check = [
  { type = "status", equals = 200 },
  { type = "duration_below", ms = 500 },
  { type = "json_array", field = "data" },
]
"#,
        )
        .unwrap();
        assert_eq!(parsed.check[0], CheckRule::Status { equals: 200 });
        assert_eq!(parsed.check[1], CheckRule::DurationBelow { ms: 500 });
    }
}
