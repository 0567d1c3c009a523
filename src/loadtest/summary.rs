//! k6-style terminal summary renderer for load test results.
//!
//! Produces a colorized, human-readable summary with:
//! - ASCII art header with test configuration
//! - Check results grouped by endpoint (`✓` / `✗` with pass counts)
//! - Dotted-line metric rows (metric.........: value)
//! - Per-endpoint latency table
//! - Error classification breakdown
//!
//! The renderer is a pure function: [`render_summary`] takes structured data
//! and returns a formatted [`String`]. No I/O.
//!
//! Color coding is applied via the `colored` crate, which respects
//! the global override set by [`colored::control::set_override(false)`]
//! when `--no-color` is active or stdout is piped.

use std::time::Duration;

use colored::Colorize;

use crate::loadtest::config::LoadTestConfig;
use crate::loadtest::engine::LoadTestResult;
use crate::loadtest::metrics::{CheckSnapshot, LatencySnapshot};
use crate::loadtest::sleep::ThinkTime;

/// Width for dotted metric row padding.
const PAD_WIDTH: usize = 30;

/// Render a k6-style terminal summary from load test results.
///
/// # Layout
///
/// ```text
///           /\      |  httpload
///          /  \     |
///     /\  /    \    |  target:    http://fastapi:8000
///    /  \/      \   |  load:      3 VUs for 25s
///   /    \       \  |  sleep:     uniform 2s-10s (mean 6s)
///  /      \       \ |  requests:  2 per iteration
///
///   data
///     ✓ status is 200
///     ✗ response time < 500ms
///      ↳  90% — ✓ 18 / ✗ 2
///
///   checks........................: 97.50% ✓ 78 ✗ 2
///   http_req_duration.............: avg=120.00ms min=4.10ms med=98.00ms max=812.00ms p(90)=310.00ms p(95)=402.00ms
///   http_req_failed...............: 0.00% (0 of 40)
///   http_reqs.....................: 40 1.6/s
///   iterations....................: 20 0.8/s
///   vus_max.......................: 3
/// ```
pub fn render_summary(result: &LoadTestResult, config: &LoadTestConfig) -> String {
    let snap = &result.snapshot;
    let mut lines = Vec::new();

    lines.push(render_header(config));

    // Checks grouped by endpoint, in endpoint order
    let mut current_endpoint: Option<&str> = None;
    for check in &snap.checks {
        if current_endpoint != Some(check.endpoint.as_str()) {
            lines.push(format!("  {}", check.endpoint.bold()));
            current_endpoint = Some(check.endpoint.as_str());
        }
        lines.extend(render_check(check));
    }
    if !snap.checks.is_empty() {
        lines.push(String::new());
    }

    let elapsed_secs = result.elapsed.as_secs_f64();
    let per_sec = |count: u64| {
        if elapsed_secs > 0.0 {
            count as f64 / elapsed_secs
        } else {
            0.0
        }
    };

    // Check pass rate
    let passed = snap.checks_passed();
    let failed = snap.checks_failed();
    if passed + failed > 0 {
        let rate = passed as f64 / (passed + failed) as f64 * 100.0;
        let rate_str = format!("{rate:.2}%");
        let rate_colored = if failed == 0 {
            rate_str.green().to_string()
        } else {
            rate_str.red().to_string()
        };
        lines.push(format_metric_row(
            "checks",
            &format!(
                "{rate_colored} {} {} {} {}",
                "✓".green(),
                passed,
                "✗".red(),
                failed
            ),
            PAD_WIDTH,
        ));
    }

    lines.push(format_metric_row(
        "http_req_duration",
        &format_latency(&snap.latency),
        PAD_WIDTH,
    ));

    // Failed request rate
    let failed_pct = snap.error_rate * 100.0;
    let failed_str = format!("{failed_pct:.2}%");
    let failed_colored = if failed_pct > 5.0 {
        failed_str.red().to_string()
    } else if failed_pct > 1.0 {
        failed_str.yellow().to_string()
    } else {
        failed_str.green().to_string()
    };
    lines.push(format_metric_row(
        "http_req_failed",
        &format!(
            "{failed_colored} ({} of {})",
            snap.failed_requests, snap.total_requests
        ),
        PAD_WIDTH,
    ));

    lines.push(format_metric_row(
        "http_reqs",
        &format!(
            "{} {:.1}/s",
            snap.total_requests,
            per_sec(snap.total_requests)
        ),
        PAD_WIDTH,
    ));
    lines.push(format_metric_row(
        "iterations",
        &format!("{} {:.1}/s", snap.iterations, per_sec(snap.iterations)),
        PAD_WIDTH,
    ));
    if snap.vu_errors > 0 {
        lines.push(format_metric_row(
            "vu_errors",
            &snap.vu_errors.to_string().red().to_string(),
            PAD_WIDTH,
        ));
    }
    lines.push(format_metric_row(
        "vus_max",
        &result.peak_vus.to_string(),
        PAD_WIDTH,
    ));
    lines.push(format_metric_row(
        "elapsed",
        &format!("{elapsed_secs:.1}s"),
        PAD_WIDTH,
    ));

    // Error breakdown (only when errors exist)
    if !snap.error_category_counts.is_empty() {
        lines.push(String::new());
        lines.push("  errors:".to_string());
        let mut categories: Vec<_> = snap.error_category_counts.iter().collect();
        categories.sort_by(|a, b| b.1.cmp(a.1));
        for (category, count) in categories {
            lines.push(format_metric_row(
                &format!("  {category}"),
                &count.to_string().red().to_string(),
                PAD_WIDTH,
            ));
        }
    }

    // Per-endpoint table
    if !snap.endpoints.is_empty() {
        lines.push(String::new());
        lines.push("  per-endpoint metrics:".to_string());
        lines.push(String::new());
        lines.push(format!(
            "  {:<24} {:>6} {:>6} {:>10} {:>10} {:>10} {:>10}",
            "endpoint", "reqs", "err%", "min", "p50", "p95", "p99"
        ));
        lines.push(format!("  {}", "\u{2500}".repeat(82)));
        for endpoint in &snap.endpoints {
            let display_name = if endpoint.name.chars().count() > 24 {
                let truncated: String = endpoint.name.chars().take(21).collect();
                format!("{truncated}...")
            } else {
                endpoint.name.clone()
            };
            let err_pct = endpoint.error_rate * 100.0;
            let err_str = format!("{err_pct:>5.1}%");
            let err_colored = if err_pct > 5.0 {
                err_str.red().to_string()
            } else if err_pct > 1.0 {
                err_str.yellow().to_string()
            } else {
                err_str.green().to_string()
            };
            lines.push(format!(
                "  {:<24} {:>6} {} {:>10} {:>10} {:>10} {:>10}",
                display_name,
                endpoint.total_requests,
                err_colored,
                format_duration(endpoint.latency.min),
                format_duration(endpoint.latency.p50),
                format_duration(endpoint.latency.p95),
                format_duration(endpoint.latency.p99),
            ));
        }
    }

    lines.join("\n")
}

/// Render the ASCII art header with test configuration details.
fn render_header(config: &LoadTestConfig) -> String {
    let target = config
        .settings
        .base_url
        .clone()
        .or_else(|| config.request.first().map(|r| r.url.clone()))
        .unwrap_or_else(|| "-".to_string());
    let sleep = match config.sleep {
        ThinkTime::Fixed { seconds } => format!("fixed {seconds}s"),
        ThinkTime::UniformRandom {
            range_secs: [min, max],
        } => format!("uniform {min}s-{max}s (mean {:?})", config.sleep.mean()),
    };
    format!(
        r#"
          /\      |  {}
         /  \     |
    /\  /    \    |  target:    {}
   /  \/      \   |  load:      {}
  /    \       \  |  sleep:     {}
 /      \       \ |  requests:  {} per iteration
"#,
        "httpload".bold(),
        target,
        config.load_profile().describe(),
        sleep,
        config.request.len(),
    )
}

/// One check line, plus a breakdown line when any evaluation failed.
fn render_check(check: &CheckSnapshot) -> Vec<String> {
    if check.fails == 0 {
        return vec![format!("    {} {}", "✓".green(), check.name)];
    }
    vec![
        format!("    {} {}", "✗".red(), check.name.red()),
        format!(
            "     ↳  {:.0}% — {} {} / {} {}",
            check.pass_rate() * 100.0,
            "✓".green(),
            check.passes,
            "✗".red(),
            check.fails
        ),
    ]
}

fn format_latency(latency: &LatencySnapshot) -> String {
    let value = format!(
        "avg={} min={} med={} max={} p(90)={} p(95)={}",
        format_duration(latency.mean),
        format_duration(latency.min),
        format_duration(latency.p50),
        format_duration(latency.max),
        format_duration(latency.p90),
        format_duration(latency.p95),
    );
    if latency.p95 < Duration::from_secs(1) {
        value.green().to_string()
    } else {
        value.yellow().to_string()
    }
}

/// `412µs`, `98.20ms`, or `1.50s` depending on magnitude.
fn format_duration(d: Duration) -> String {
    let micros = d.as_secs_f64() * 1_000_000.0;
    if micros < 1_000.0 {
        format!("{micros:.0}µs")
    } else if micros < 1_000_000.0 {
        format!("{:.2}ms", micros / 1_000.0)
    } else {
        format!("{:.2}s", micros / 1_000_000.0)
    }
}

/// Format a single metric row with dot-padding.
///
/// Produces: `"  metric_name..................: value_string"`
fn format_metric_row(name: &str, value: &str, pad_width: usize) -> String {
    format!("  {name:.<pad_width$}: {value}")
}
