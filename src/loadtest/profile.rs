//! Load profiles: the target number of virtual users at any point in a test.
//!
//! Two shapes are supported:
//! - **Constant**: a fixed VU count for a fixed duration.
//! - **Staged**: an ordered list of stages; within each stage the VU count
//!   ramps linearly from the previous stage's target to this stage's target.
//!
//! A profile is a pure function of elapsed time. The engine samples it on
//! every scheduling tick and spawns or retires VUs to match.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// A load-shaping stage defining a target VU count and duration.
///
/// The VU count ramps linearly from the previous stage's target (0 for the
/// first stage) to `target` over `duration`. A zero-length stage snaps
/// immediately to its target.
///
/// # Example TOML
///
/// ```toml
/// [[stage]]
/// duration_secs = 10
/// target = 5
///
/// [[stage]]
/// duration_secs = 30
/// target = 5
///
/// [[stage]]
/// duration_secs = 10
/// target = 0
/// ```
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
pub struct Stage {
    /// Length of this stage, as `duration_secs`.
    #[serde(
        rename = "duration_secs",
        alias = "duration",
        with = "crate::loadtest::config::serde_secs"
    )]
    pub duration: Duration,
    /// Target number of virtual users at the end of this stage.
    pub target: u32,
}

impl Stage {
    /// Convenience constructor used by tests and programmatic configs.
    pub fn new(duration: Duration, target: u32) -> Self {
        Self { duration, target }
    }
}

/// Declarative shape of target concurrency over time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadProfile {
    /// `vus` virtual users for `duration`, then zero.
    Constant { vus: u32, duration: Duration },
    /// Linear ramps through each stage in order, then zero.
    Staged { stages: Vec<Stage> },
}

impl LoadProfile {
    /// Number of virtual users that should be live `elapsed` into the test.
    pub fn target_vus(&self, elapsed: Duration) -> u32 {
        match self {
            Self::Constant { vus, duration } => {
                if elapsed < *duration {
                    *vus
                } else {
                    0
                }
            },
            Self::Staged { stages } => {
                let mut previous = 0u32;
                let mut stage_start = Duration::ZERO;
                for stage in stages {
                    let stage_end = stage_start.saturating_add(stage.duration);
                    // elapsed >= stage_start here, so a zero-length stage is never entered
                    if elapsed < stage_end {
                        let progress = (elapsed - stage_start).as_secs_f64()
                            / stage.duration.as_secs_f64();
                        let from = f64::from(previous);
                        let to = f64::from(stage.target);
                        return (from + (to - from) * progress).round() as u32;
                    }
                    previous = stage.target;
                    stage_start = stage_end;
                }
                0
            },
        }
    }

    /// Total test length: the single duration, or the sum of all stages
    /// (saturating at [`Duration::MAX`]).
    pub fn total_duration(&self) -> Duration {
        match self {
            Self::Constant { duration, .. } => *duration,
            Self::Staged { stages } => stages
                .iter()
                .fold(Duration::ZERO, |total, s| total.saturating_add(s.duration)),
        }
    }

    /// Highest VU count this profile can ever request.
    pub fn max_vus(&self) -> u32 {
        match self {
            Self::Constant { vus, .. } => *vus,
            Self::Staged { stages } => stages.iter().map(|s| s.target).max().unwrap_or(0),
        }
    }

    /// Index of the stage active at `elapsed`, or `None` for constant
    /// profiles and once the last stage has ended.
    pub fn stage_index(&self, elapsed: Duration) -> Option<usize> {
        let Self::Staged { stages } = self else {
            return None;
        };
        let mut stage_end = Duration::ZERO;
        for (idx, stage) in stages.iter().enumerate() {
            stage_end = stage_end.saturating_add(stage.duration);
            if elapsed < stage_end {
                return Some(idx);
            }
        }
        None
    }

    /// Short human-readable label, e.g. `"3 VUs for 25s"` or `"3 stages over 50s"`.
    pub fn describe(&self) -> String {
        match self {
            Self::Constant { vus, duration } => {
                format!("{vus} VUs for {duration:?}")
            },
            Self::Staged { stages } => format!(
                "{} stages over {:?} (max {} VUs)",
                stages.len(),
                self.total_duration(),
                self.max_vus()
            ),
        }
    }
}
