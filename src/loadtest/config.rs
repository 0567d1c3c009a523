//! TOML-based load test scenario configuration.
//!
//! Defines typed structs for parsing scenario files: run settings, the think
//! time between iterations, optional `[[stage]]` blocks, and the ordered
//! `[[request]]` steps each virtual user issues per iteration.
//!
//! # Example TOML
//!
//! ```toml
//! [settings]
//! executor = "constant-vus"
//! vus = 3
//! duration_secs = 25
//! base_url = "http://fastapi:8000"
//!
//! [sleep]
//! mode = "uniform-random"
//! range_secs = [2.0, 10.0]
//!
//! [[request]]
//! name = "data"
//! url = "/data"
//! check = [
//!   { name = "status is 200", type = "status", equals = 200 },
//!   { name = "response time < 500ms", type = "duration_below", ms = 500 },
//! ]
//!
//! [[request]]
//! name = "health"
//! url = "/health"
//! check = [{ name = "status is 200", type = "status", equals = 200 }]
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::warn;
use url::Url;

use crate::loadtest::check::{CheckRule, CheckSet};
use crate::loadtest::client::HttpMethod;
use crate::loadtest::error::LoadTestError;
use crate::loadtest::profile::{LoadProfile, Stage};
use crate::loadtest::script::{ScenarioScript, ScenarioStep};
use crate::loadtest::sleep::ThinkTime;

/// Top-level load test configuration parsed from a TOML file.
///
/// Immutable once handed to the engine.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoadTestConfig {
    /// General load test settings.
    #[serde(default)]
    pub settings: Settings,
    /// Pause between iterations.
    #[serde(default)]
    pub sleep: ThinkTime,
    /// Load-shaping stages, used when `settings.executor = "staged"`.
    ///
    /// The field name is `stage` (not `stages`) because TOML `[[stage]]`
    /// array-of-tables syntax creates a key called `stage`.
    #[serde(default)]
    pub stage: Vec<Stage>,
    /// Requests issued, in order, on every iteration.
    #[serde(default)]
    pub request: Vec<RequestConfig>,
}

/// How the VU count is shaped over time.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Executor {
    /// `settings.vus` for `settings.duration`.
    #[default]
    ConstantVus,
    /// Linear ramps through `[[stage]]` blocks.
    Staged,
}

/// General load test settings controlling execution parameters.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    /// Load shape.
    #[serde(default)]
    pub executor: Executor,
    /// Number of concurrent virtual users (constant-vus only).
    #[serde(default = "default_vus")]
    pub vus: u32,
    /// Total test duration (constant-vus only), as `duration_secs`.
    ///
    /// `duration = "25s"` is accepted too.
    #[serde(
        rename = "duration_secs",
        alias = "duration",
        default = "default_duration",
        with = "serde_secs"
    )]
    pub duration: Duration,
    /// Per-request timeout, as `timeout_ms`.
    #[serde(rename = "timeout_ms", default = "default_timeout", with = "serde_millis")]
    pub timeout: Duration,
    /// Base URL that relative request URLs are joined onto.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Scheduler tick: how often the VU count is adjusted, as `tick_ms`.
    #[serde(rename = "tick_ms", default = "default_tick", with = "serde_millis")]
    pub tick: Duration,
    /// RNG seed for think time. Random when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

/// Longest duration accepted anywhere in a config: test length, stage total,
/// timeout, tick, and think time.
pub const MAX_DURATION: Duration = Duration::from_secs(7 * 24 * 60 * 60);

fn check_max(field: &str, value: Duration) -> Result<(), LoadTestError> {
    if value > MAX_DURATION {
        return Err(LoadTestError::validation(format!(
            "{field} must not exceed {MAX_DURATION:?} (got {value:?})"
        )));
    }
    Ok(())
}

fn default_vus() -> u32 {
    1
}

fn default_duration() -> Duration {
    Duration::from_secs(10)
}

fn default_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_tick() -> Duration {
    Duration::from_secs(1)
}

/// Durations written as (possibly fractional) seconds, e.g. `duration_secs = 2.5`,
/// or as a k6-style string such as `"25s"`, `"1m30s"` or `"500ms"`.
pub(crate) mod serde_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum SecsOrText {
        Secs(f64),
        Text(String),
    }

    pub(crate) fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub(crate) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        match SecsOrText::deserialize(deserializer)? {
            SecsOrText::Secs(secs) => {
                Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
            },
            SecsOrText::Text(text) => parse_duration_text(&text).map_err(serde::de::Error::custom),
        }
    }

    /// Parse `<number><unit>` groups (`ms`, `s`, `m`, `h`), e.g. `"1m30s"`.
    pub(crate) fn parse_duration_text(text: &str) -> Result<Duration, String> {
        let text = text.trim();
        if text.is_empty() {
            return Err("empty duration".to_string());
        }
        let is_number = |c: char| c.is_ascii_digit() || c == '.';

        let mut secs = 0.0f64;
        let mut rest = text;
        while !rest.is_empty() {
            let (number, tail) = rest.split_at(rest.find(|c: char| !is_number(c)).unwrap_or(rest.len()));
            let (unit, next) = tail.split_at(tail.find(is_number).unwrap_or(tail.len()));
            let value: f64 = number
                .parse()
                .map_err(|_| format!("invalid duration '{text}'"))?;
            let scale = match unit {
                "ms" => 0.001,
                "s" => 1.0,
                "m" => 60.0,
                "h" => 3600.0,
                _ => return Err(format!("invalid unit '{unit}' in duration '{text}'")),
            };
            secs += value * scale;
            rest = next;
        }
        Duration::try_from_secs_f64(secs).map_err(|e| format!("invalid duration '{text}': {e}"))
    }
}

/// Durations written as whole milliseconds, e.g. `timeout_ms = 5000`.
pub(crate) mod serde_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub(crate) fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub(crate) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            executor: Executor::ConstantVus,
            vus: default_vus(),
            duration: default_duration(),
            timeout: default_timeout(),
            base_url: None,
            tick: default_tick(),
            seed: None,
        }
    }
}

/// One `[[request]]` block.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RequestConfig {
    /// Endpoint key for stats. Defaults to the URL path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// HTTP method (default GET).
    #[serde(default)]
    pub method: HttpMethod,
    /// Absolute URL, or a path joined onto `settings.base_url`.
    pub url: String,
    /// Optional JSON body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,
    /// Checks evaluated against every response.
    #[serde(default)]
    pub check: Vec<NamedCheck>,
}

/// A [`CheckRule`] with its display name.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct NamedCheck {
    /// Check name shown in the summary.
    pub name: String,
    /// The rule itself (`type = "..."` plus its fields).
    #[serde(flatten)]
    pub rule: CheckRule,
}

impl LoadTestConfig {
    /// Parse a TOML string into a validated [`LoadTestConfig`].
    ///
    /// Returns an error if the TOML is malformed or fails validation.
    pub fn from_toml(content: &str) -> Result<Self, LoadTestError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a [`LoadTestConfig`] from a file path.
    ///
    /// Returns [`LoadTestError::ConfigIo`] if the file cannot be read,
    /// [`LoadTestError::ConfigParse`] if the TOML is malformed, or
    /// [`LoadTestError::ConfigValidation`] if validation fails.
    pub fn load(path: &Path) -> Result<Self, LoadTestError> {
        let content = std::fs::read_to_string(path).map_err(|source| LoadTestError::ConfigIo {
            source,
            path: path.display().to_string(),
        })?;
        Self::from_toml(&content)
    }

    /// Validate that the config is semantically correct.
    ///
    /// Checks:
    /// - At least one `[[request]]` is defined, and every URL resolves to an
    ///   absolute http(s) URL
    /// - `staged` has at least one stage
    /// - Think time bounds are finite, non-negative, and not inverted
    /// - `tick` and `timeout` are positive
    pub fn validate(&self) -> Result<(), LoadTestError> {
        if self.request.is_empty() {
            return Err(LoadTestError::validation(
                "Config must contain at least one [[request]] block",
            ));
        }
        for request in &self.request {
            self.resolve_url(&request.url)?;
        }
        self.validate_settings()
    }

    /// Validate everything except the `[[request]]` blocks: load shape,
    /// think time, tick, and timeout. Used when a custom script replaces them.
    pub fn validate_settings(&self) -> Result<(), LoadTestError> {
        match self.settings.executor {
            Executor::Staged if self.stage.is_empty() => {
                return Err(LoadTestError::validation(
                    "executor = \"staged\" requires at least one [[stage]] block",
                ));
            },
            Executor::ConstantVus if !self.stage.is_empty() => {
                warn!(
                    stages = self.stage.len(),
                    "[[stage]] blocks are ignored when executor = \"constant-vus\""
                );
            },
            _ => {},
        }

        self.sleep.validate()?;

        check_max("settings.duration_secs", self.settings.duration)?;
        check_max("settings.timeout_ms", self.settings.timeout)?;
        check_max("settings.tick_ms", self.settings.tick)?;
        let stage_total = self
            .stage
            .iter()
            .try_fold(Duration::ZERO, |total, stage| total.checked_add(stage.duration));
        match stage_total {
            Some(total) if total <= MAX_DURATION => {},
            _ => {
                return Err(LoadTestError::validation(format!(
                    "total [[stage]] duration must not exceed {MAX_DURATION:?}"
                )));
            },
        }

        if self.settings.tick.is_zero() {
            return Err(LoadTestError::validation("settings.tick must be positive"));
        }
        if self.settings.timeout.is_zero() {
            return Err(LoadTestError::validation(
                "settings.timeout must be positive",
            ));
        }

        Ok(())
    }

    /// The load profile described by `settings` and `[[stage]]`.
    pub fn load_profile(&self) -> LoadProfile {
        match self.settings.executor {
            Executor::ConstantVus => LoadProfile::Constant {
                vus: self.settings.vus,
                duration: self.settings.duration,
            },
            Executor::Staged => LoadProfile::Staged {
                stages: self.stage.clone(),
            },
        }
    }

    /// Build the per-iteration script from `[[request]]` blocks.
    pub fn scenario(&self) -> Result<ScenarioScript, LoadTestError> {
        let steps = self
            .request
            .iter()
            .map(|request| {
                let url = self.resolve_url(&request.url)?;
                let endpoint = request
                    .name
                    .clone()
                    .unwrap_or_else(|| url.path().to_string());
                let checks = request.check.iter().fold(CheckSet::new(), |set, check| {
                    set.check(check.name.clone(), check.rule.clone())
                });
                Ok(ScenarioStep {
                    endpoint,
                    method: request.method,
                    url: url.into(),
                    body: request.body.clone(),
                    checks,
                })
            })
            .collect::<Result<Vec<_>, LoadTestError>>()?;
        Ok(ScenarioScript::new(steps))
    }

    /// Resolve a request URL against `settings.base_url`.
    pub fn resolve_url(&self, raw: &str) -> Result<Url, LoadTestError> {
        let url = match Url::parse(raw) {
            Ok(url) => url,
            Err(url::ParseError::RelativeUrlWithoutBase) => {
                let base = self.settings.base_url.as_deref().ok_or_else(|| {
                    LoadTestError::validation(format!(
                        "Request URL '{raw}' is relative but settings.base_url is not set"
                    ))
                })?;
                let base = Url::parse(base).map_err(|e| {
                    LoadTestError::validation(format!("Invalid settings.base_url '{base}': {e}"))
                })?;
                base.join(raw).map_err(|e| {
                    LoadTestError::validation(format!("Invalid request URL '{raw}': {e}"))
                })?
            },
            Err(e) => {
                return Err(LoadTestError::validation(format!(
                    "Invalid request URL '{raw}': {e}"
                )));
            },
        };
        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(LoadTestError::validation(format!(
                "Request URL '{url}' has unsupported scheme '{other}'"
            ))),
        }
    }

    /// Override the load shape with a fixed VU count and/or duration.
    ///
    /// Either override switches the executor to `constant-vus`.
    pub fn apply_overrides(&mut self, vus: Option<u32>, duration: Option<Duration>) {
        if vus.is_none() && duration.is_none() {
            return;
        }
        if self.settings.executor == Executor::Staged {
            let profile = self.load_profile();
            self.settings.vus = profile.max_vus();
            self.settings.duration = profile.total_duration();
            self.stage.clear();
        }
        self.settings.executor = Executor::ConstantVus;
        if let Some(vus) = vus {
            self.settings.vus = vus;
        }
        if let Some(duration) = duration {
            self.settings.duration = duration;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const ORIGINAL: &str = r#"
[settings]
vus = 3
duration_secs = 25
base_url = "http://fastapi:8000"

[sleep]
mode = "uniform-random"
range_secs = [2.0, 10.0]

[[request]]
name = "data"
url = "/data"
check = [
  { name = "status is 200", type = "status", equals = 200 },
  { name = "response time < 500ms", type = "duration_below", ms = 500 },
  { name = "has message", type = "json_field", field = "message" },
  { name = "has data array", type = "json_array", field = "data" },
]

[[request]]
url = "/health"
check = [{ name = "status is 200", type = "status", equals = 200 }]
"#;

    #[test]
    fn test_parse_constant_config() {
        let config = LoadTestConfig::from_toml(ORIGINAL).unwrap();
        assert_eq!(config.settings.executor, Executor::ConstantVus);
        assert_eq!(config.settings.vus, 3);
        assert_eq!(config.settings.duration, Duration::from_secs(25));
        assert_eq!(config.settings.timeout, Duration::from_secs(10));
        assert_eq!(config.settings.tick, Duration::from_secs(1));
        assert_eq!(
            config.sleep,
            ThinkTime::UniformRandom {
                range_secs: [2.0, 10.0]
            }
        );
        assert_eq!(config.request.len(), 2);
        assert_eq!(config.request[0].check.len(), 4);
        assert_eq!(
            config.request[0].check[1].rule,
            CheckRule::DurationBelow { ms: 500 }
        );
        assert_eq!(
            config.load_profile(),
            LoadProfile::Constant {
                vus: 3,
                duration: Duration::from_secs(25)
            }
        );
    }

    #[test]
    fn test_scenario_resolves_urls_and_names() {
        let config = LoadTestConfig::from_toml(ORIGINAL).unwrap();
        let script = config.scenario().unwrap();
        let steps = script.steps();
        assert_eq!(steps[0].endpoint, "data");
        assert_eq!(steps[0].url, "http://fastapi:8000/data");
        assert_eq!(steps[0].checks.len(), 4);
        assert_eq!(steps[1].endpoint, "/health", "defaults to the URL path");
        assert_eq!(steps[1].method, HttpMethod::Get);
    }

    #[test]
    fn test_parse_staged_config() {
        let toml_str = r#"
[settings]
executor = "staged"
tick_ms = 250
seed = 7

[[stage]]
duration_secs = 10
target = 5

[[stage]]
duration_secs = 30
target = 5

[[stage]]
duration_secs = 10
target = 0

[[request]]
url = "http://fastapi:8000/data"
"#;
        let config = LoadTestConfig::from_toml(toml_str).unwrap();
        assert_eq!(config.settings.tick, Duration::from_millis(250));
        assert_eq!(config.settings.seed, Some(7));
        assert_eq!(config.sleep, ThinkTime::default());
        let profile = config.load_profile();
        assert_eq!(profile.total_duration(), Duration::from_secs(50));
        assert_eq!(profile.max_vus(), 5);
    }

    #[test]
    fn test_fractional_and_negative_durations() {
        let toml_str = r#"
[settings]
duration_secs = 2.5
timeout_ms = 750

[[request]]
url = "http://localhost/"
"#;
        let config = LoadTestConfig::from_toml(toml_str).unwrap();
        assert_eq!(config.settings.duration, Duration::from_millis(2500));
        assert_eq!(config.settings.timeout, Duration::from_millis(750));

        let err = LoadTestConfig::from_toml(&toml_str.replace("2.5", "-1.0")).unwrap_err();
        assert!(matches!(err, LoadTestError::ConfigParse { .. }));
    }

    #[test]
    fn test_k6_duration_strings_are_accepted() {
        let toml_str = r#"
[settings]
executor = "staged"
duration = "25s"

[[stage]]
duration = "1m30s"
target = 5

[[stage]]
duration_secs = 10
target = 0

[[request]]
url = "http://localhost/"
"#;
        let config = LoadTestConfig::from_toml(toml_str).unwrap();
        assert_eq!(config.settings.duration, Duration::from_secs(25));
        assert_eq!(config.stage[0].duration, Duration::from_secs(90));
        assert_eq!(config.load_profile().total_duration(), Duration::from_secs(100));
    }

    #[test]
    fn test_parse_duration_text() {
        use super::serde_secs::parse_duration_text;
        assert_eq!(parse_duration_text("500ms"), Ok(Duration::from_millis(500)));
        assert_eq!(parse_duration_text("2h"), Ok(Duration::from_secs(7200)));
        assert_eq!(parse_duration_text("1.5s"), Ok(Duration::from_millis(1500)));
        assert!(parse_duration_text("25x").is_err());
        assert!(parse_duration_text("s").is_err());
        assert!(parse_duration_text("").is_err());
    }

    #[test]
    fn test_oversized_duration_is_validation_error() {
        let toml_str = r#"
[settings]
duration_secs = 1e19

[[request]]
url = "http://localhost/"
"#;
        let err = LoadTestConfig::from_toml(toml_str).unwrap_err();
        assert!(matches!(err, LoadTestError::ConfigValidation { .. }), "{err}");
        assert!(err.to_string().contains("duration_secs"), "{err}");
    }

    #[test]
    fn test_overflowing_stage_total_is_validation_error() {
        let toml_str = r#"
[settings]
executor = "staged"

[[stage]]
duration_secs = 1.5e19
target = 5

[[stage]]
duration_secs = 1.5e19
target = 0

[[request]]
url = "http://localhost/"
"#;
        let err = LoadTestConfig::from_toml(toml_str).unwrap_err();
        assert!(matches!(err, LoadTestError::ConfigValidation { .. }), "{err}");
        assert!(err.to_string().contains("[[stage]]"), "{err}");
    }

    #[test]
    fn test_oversized_override_is_rejected_before_running() {
        let mut config = LoadTestConfig::from_toml(ORIGINAL).unwrap();
        config.apply_overrides(None, Some(Duration::from_secs(u64::MAX)));
        assert!(matches!(
            config.validate(),
            Err(LoadTestError::ConfigValidation { .. })
        ));
    }

    #[test]
    fn test_validate_no_requests_fails() {
        let err = LoadTestConfig::from_toml("[settings]\nvus = 1\nduration_secs = 1\n").unwrap_err();
        assert!(matches!(err, LoadTestError::ConfigValidation { .. }));
        assert!(err.to_string().contains("[[request]]"));
    }

    #[test]
    fn test_validate_staged_without_stages_fails() {
        let toml_str = r#"
[settings]
executor = "staged"

[[request]]
url = "http://localhost/"
"#;
        let err = LoadTestConfig::from_toml(toml_str).unwrap_err();
        assert!(err.to_string().contains("[[stage]]"), "{err}");
    }

    #[test]
    fn test_validate_relative_url_without_base_fails() {
        let toml_str = r#"
[settings]
vus = 1
duration_secs = 1

[[request]]
url = "/data"
"#;
        let err = LoadTestConfig::from_toml(toml_str).unwrap_err();
        assert!(err.to_string().contains("base_url"), "{err}");
    }

    #[test]
    fn test_validate_rejects_non_http_scheme() {
        let toml_str = r#"
[settings]
vus = 1
duration_secs = 1

[[request]]
url = "ftp://example.com/file"
"#;
        let err = LoadTestConfig::from_toml(toml_str).unwrap_err();
        assert!(err.to_string().contains("scheme"), "{err}");
    }

    #[test]
    fn test_validate_inverted_sleep_range_fails() {
        let toml_str = r#"
[settings]
vus = 1
duration_secs = 1

[sleep]
mode = "uniform-random"
range_secs = [10.0, 2.0]

[[request]]
url = "http://localhost/"
"#;
        let err = LoadTestConfig::from_toml(toml_str).unwrap_err();
        assert!(err.to_string().contains("inverted"), "{err}");
    }

    #[test]
    fn test_validate_zero_tick_fails() {
        let toml_str = r#"
[settings]
vus = 1
duration_secs = 1
tick_ms = 0

[[request]]
url = "http://localhost/"
"#;
        let err = LoadTestConfig::from_toml(toml_str).unwrap_err();
        assert!(err.to_string().contains("tick"), "{err}");
    }

    #[test]
    fn test_stages_ignored_for_constant_executor() {
        let toml_str = r#"
[settings]
vus = 2
duration_secs = 5

[[stage]]
duration_secs = 10
target = 50

[[request]]
url = "http://localhost/"
"#;
        let config = LoadTestConfig::from_toml(toml_str).unwrap();
        assert_eq!(config.load_profile().max_vus(), 2);
    }

    #[test]
    fn test_malformed_toml_is_parse_error() {
        let err = LoadTestConfig::from_toml("[settings\nvus = ").unwrap_err();
        assert!(matches!(err, LoadTestError::ConfigParse { .. }));
    }

    #[test]
    fn test_load_from_file() {
        let mut tmpfile = tempfile::NamedTempFile::new().unwrap();
        tmpfile.write_all(ORIGINAL.as_bytes()).unwrap();
        tmpfile.flush().unwrap();

        let config = LoadTestConfig::load(tmpfile.path()).unwrap();
        assert_eq!(config.settings.vus, 3);
        assert_eq!(config.request.len(), 2);
    }

    #[test]
    fn test_load_missing_file_fails() {
        let result = LoadTestConfig::load(Path::new("/nonexistent/path.toml"));
        assert!(matches!(
            result.unwrap_err(),
            LoadTestError::ConfigIo { .. }
        ));
    }

    #[test]
    fn test_overrides_force_constant_executor() {
        let toml_str = r#"
[settings]
executor = "staged"

[[stage]]
duration_secs = 10
target = 5

[[request]]
url = "http://localhost/"
"#;
        let mut config = LoadTestConfig::from_toml(toml_str).unwrap();
        config.apply_overrides(Some(8), None);
        assert_eq!(
            config.load_profile(),
            LoadProfile::Constant {
                vus: 8,
                duration: Duration::from_secs(10)
            }
        );

        let mut config = LoadTestConfig::from_toml(ORIGINAL).unwrap();
        config.apply_overrides(None, Some(Duration::from_secs(3)));
        assert_eq!(config.settings.vus, 3);
        assert_eq!(config.settings.duration, Duration::from_secs(3));
    }
}
