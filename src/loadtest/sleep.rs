//! Think time between virtual user iterations.
//!
//! A [`ThinkTime`] is either a fixed pause or a uniformly random pause in a
//! half-open `[min, max)` range. Sampling takes the caller's RNG so each VU
//! can own a seeded generator and tests stay deterministic.

use std::time::Duration;

use rand::prelude::*;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use crate::loadtest::config::MAX_DURATION;
use crate::loadtest::error::LoadTestError;

/// Pause strategy applied after every script iteration.
///
/// # Example TOML
///
/// ```toml
/// [sleep]
/// mode = "fixed"
/// seconds = 1.0
/// ```
///
/// ```toml
/// [sleep]
/// mode = "uniform-random"
/// range_secs = [2.0, 10.0]
/// ```
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq)]
#[serde(tag = "mode", rename_all = "kebab-case")]
pub enum ThinkTime {
    /// Always pause for the same number of seconds.
    Fixed { seconds: f64 },
    /// Pause for a uniformly random number of seconds in `[min, max)`.
    UniformRandom { range_secs: [f64; 2] },
}

impl Default for ThinkTime {
    fn default() -> Self {
        Self::Fixed { seconds: 1.0 }
    }
}

impl ThinkTime {
    /// Check that every bound is a finite, non-negative number of seconds no
    /// larger than [`MAX_DURATION`], and that a random range is not inverted.
    pub fn validate(&self) -> Result<(), LoadTestError> {
        match *self {
            Self::Fixed { seconds } => check_seconds("sleep.seconds", seconds),
            Self::UniformRandom {
                range_secs: [min, max],
            } => {
                check_seconds("sleep.range_secs[0]", min)?;
                check_seconds("sleep.range_secs[1]", max)?;
                if min > max {
                    return Err(LoadTestError::validation(format!(
                        "sleep.range_secs is inverted: min {min} > max {max}"
                    )));
                }
                Ok(())
            },
        }
    }

    /// Draw the next pause.
    ///
    /// A degenerate random range (`min == max`) always yields `min`. Values
    /// outside `[0, MAX_DURATION]` are clamped.
    pub fn sample(&self, rng: &mut StdRng) -> Duration {
        let seconds = match *self {
            Self::Fixed { seconds } => seconds,
            Self::UniformRandom {
                range_secs: [min, max],
            } => {
                if max > min {
                    rng.random_range(min..max)
                } else {
                    min
                }
            },
        };
        to_duration(seconds)
    }

    /// Mean pause, used for the summary header.
    pub fn mean(&self) -> Duration {
        match *self {
            Self::Fixed { seconds } => to_duration(seconds),
            Self::UniformRandom {
                range_secs: [min, max],
            } => to_duration((min + max) / 2.0),
        }
    }
}

fn to_duration(seconds: f64) -> Duration {
    Duration::try_from_secs_f64(seconds.clamp(0.0, MAX_DURATION.as_secs_f64())).unwrap_or_default()
}

fn check_seconds(field: &str, value: f64) -> Result<(), LoadTestError> {
    if !value.is_finite() || value < 0.0 {
        return Err(LoadTestError::validation(format!(
            "{field} must be a finite, non-negative number of seconds (got {value})"
        )));
    }
    if value > MAX_DURATION.as_secs_f64() {
        return Err(LoadTestError::validation(format!(
            "{field} must not exceed {} seconds (got {value})",
            MAX_DURATION.as_secs()
        )));
    }
    Ok(())
}
