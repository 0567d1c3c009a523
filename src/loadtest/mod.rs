//! Virtual-user HTTP load generation.
//!
//! Provides typed TOML configuration, load profiles, a pooled HTTP client
//! producing [`client::RequestRecord`]s, named checks, HdrHistogram-based
//! metrics, and the [`engine::LoadTestEngine`] orchestrator.

pub mod check;
pub mod client;
pub mod config;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod profile;
pub mod script;
pub mod sleep;
pub mod summary;
pub mod vu;
