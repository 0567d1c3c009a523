//! Load test execution engine with metrics aggregation and graceful shutdown.
//!
//! [`LoadTestEngine`] is the top-level orchestrator that:
//! - Samples the [`LoadProfile`] on every scheduling tick and spawns or
//!   retires virtual users (newest first) to match its target
//! - Tracks every VU task via [`tokio_util::task::TaskTracker`]
//! - Collects samples through a bounded mpsc channel into a single-writer
//!   aggregator task
//! - Publishes its [`EngineStatus`] through a watch channel
//! - Coordinates graceful shutdown via [`CancellationToken`]
//!
//! Phases move strictly forward: `Idle -> Running -> Draining -> Stopped`.
//! Configuration errors are reported before `Running`, leaving the engine idle.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info};

use crate::loadtest::client::HttpClient;
use crate::loadtest::config::{LoadTestConfig, MAX_DURATION};
use crate::loadtest::error::LoadTestError;
use crate::loadtest::metrics::{MetricsRecorder, MetricsSnapshot, Sample};
use crate::loadtest::profile::LoadProfile;
use crate::loadtest::script::UserScript;
use crate::loadtest::vu::{vu_loop, ActiveVuCounter, VirtualUser, VuShared};

/// Compile-time Send bounds verification for channel-transported types.
fn _assert_send<T: Send>() {}
#[allow(dead_code)]
fn _check_send_bounds() {
    _assert_send::<Sample>();
    _assert_send::<MetricsSnapshot>();
    _assert_send::<EngineStatus>();
}

/// Samples buffered per VU before senders wait on the aggregator.
const SAMPLES_PER_VU: usize = 100;

/// Orchestrator lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnginePhase {
    /// Constructed, no VUs.
    Idle,
    /// Scaling VUs to the profile on every tick.
    Running,
    /// All VUs told to stop; waiting for them and for the aggregator.
    Draining,
    /// Finished; the result has been returned.
    Stopped,
}

/// Engine state published through the watch channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineStatus {
    /// Current phase.
    pub phase: EnginePhase,
    /// Time since the engine entered `Running`.
    pub elapsed: Duration,
    /// Profile target at `elapsed`.
    pub target_vus: u32,
    /// VUs the engine currently considers live (spawned and not retired).
    pub live_vus: u32,
    /// VU tasks still executing, including retired ones finishing an iteration.
    pub running_vus: u32,
    /// Active stage index for staged profiles.
    pub stage: Option<usize>,
}

impl EngineStatus {
    fn idle() -> Self {
        Self {
            phase: EnginePhase::Idle,
            elapsed: Duration::ZERO,
            target_vus: 0,
            live_vus: 0,
            running_vus: 0,
            stage: None,
        }
    }
}

/// Top-level load test engine configuration and entry point.
///
/// # Example
///
/// ```no_run
/// use httpload::loadtest::config::LoadTestConfig;
/// use httpload::loadtest::engine::LoadTestEngine;
///
/// # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
/// let config = LoadTestConfig::load("loadtest.toml".as_ref())?;
/// let result = LoadTestEngine::new(config).run().await?;
/// println!("{} requests", result.snapshot.total_requests);
/// # Ok(())
/// # }
/// ```
pub struct LoadTestEngine {
    config: LoadTestConfig,
    script: Option<Arc<dyn UserScript>>,
    tick: Option<Duration>,
    seed: Option<u64>,
    shutdown: CancellationToken,
    status_tx: watch::Sender<EngineStatus>,
}

impl LoadTestEngine {
    /// Creates a new engine for the given configuration.
    ///
    /// Unless [`with_script`](Self::with_script) is used, VUs run the
    /// `[[request]]` blocks of the config.
    pub fn new(config: LoadTestConfig) -> Self {
        let (status_tx, _) = watch::channel(EngineStatus::idle());
        Self {
            config,
            script: None,
            tick: None,
            seed: None,
            shutdown: CancellationToken::new(),
            status_tx,
        }
    }

    /// Run a custom script instead of the config's `[[request]]` blocks.
    pub fn with_script(mut self, script: Arc<dyn UserScript>) -> Self {
        self.script = Some(script);
        self
    }

    /// Overrides `settings.tick`.
    pub fn with_tick_interval(mut self, tick: Duration) -> Self {
        self.tick = Some(tick);
        self
    }

    /// Overrides `settings.seed`.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Returns a reference to the engine's configuration.
    pub fn config(&self) -> &LoadTestConfig {
        &self.config
    }

    /// Token that requests an early, graceful stop when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Subscribe to phase and VU-count updates.
    pub fn status(&self) -> watch::Receiver<EngineStatus> {
        self.status_tx.subscribe()
    }

    /// Current phase.
    pub fn phase(&self) -> EnginePhase {
        self.status_tx.borrow().phase
    }

    /// Run the load test to completion and return the final statistics.
    ///
    /// Returns [`LoadTestError::ConfigValidation`] without starting any VU
    /// when the configuration is invalid.
    pub async fn run(&self) -> Result<LoadTestResult, LoadTestError> {
        let script = match &self.script {
            Some(script) => {
                self.config.validate_settings()?;
                Arc::clone(script)
            },
            None => {
                self.config.validate()?;
                Arc::new(self.config.scenario()?) as Arc<dyn UserScript>
            },
        };
        let tick = self.tick.unwrap_or(self.config.settings.tick);
        if tick.is_zero() || tick > MAX_DURATION {
            return Err(LoadTestError::validation(format!(
                "tick interval must be positive and at most {MAX_DURATION:?}"
            )));
        }
        let client = HttpClient::new(self.config.settings.timeout).map_err(|e| {
            LoadTestError::validation(format!("Failed to build HTTP client: {e}"))
        })?;
        let profile = self.config.load_profile();

        let buffer_size = (profile.max_vus().max(1) as usize) * SAMPLES_PER_VU;
        let (sample_tx, sample_rx) = mpsc::channel::<Sample>(buffer_size);
        let aggregator = tokio::spawn(metrics_aggregator(sample_rx));

        let shared = VuShared {
            script,
            client,
            think_time: self.config.sleep,
            sample_tx,
            seed: self.seed.or(self.config.settings.seed),
            active_vus: ActiveVuCounter::new(),
        };

        info!(profile = %profile.describe(), "load test starting");
        let mut scheduler = Scheduler::new(profile, shared, tick);
        scheduler.run(&self.shutdown, &self.status_tx).await;
        scheduler.drain(&self.status_tx).await;

        let snapshot = aggregator.await.unwrap_or_else(|err| {
            error!("metrics aggregator failed: {err}");
            MetricsSnapshot::default()
        });
        let elapsed = scheduler.elapsed();
        self.status_tx.send_replace(EngineStatus {
            phase: EnginePhase::Stopped,
            elapsed,
            ..EngineStatus::idle()
        });
        info!(
            elapsed = ?elapsed,
            requests = snapshot.total_requests,
            "load test stopped"
        );

        Ok(LoadTestResult {
            snapshot,
            elapsed,
            peak_vus: scheduler.peak_vus,
            vus_spawned: scheduler.next_vu_id,
        })
    }
}

/// Running/draining state of one [`LoadTestEngine::run`] call.
struct Scheduler {
    profile: LoadProfile,
    shared: Option<VuShared>,
    active_vus: ActiveVuCounter,
    tick: Duration,
    root: CancellationToken,
    tracker: TaskTracker,
    /// Live VUs in spawn order; retiring pops from the back.
    vus: Vec<VirtualUser>,
    next_vu_id: u32,
    peak_vus: u32,
    started: Option<Instant>,
}

impl Scheduler {
    fn new(profile: LoadProfile, shared: VuShared, tick: Duration) -> Self {
        Self {
            profile,
            active_vus: shared.active_vus.clone(),
            shared: Some(shared),
            tick,
            root: CancellationToken::new(),
            tracker: TaskTracker::new(),
            vus: Vec::new(),
            next_vu_id: 0,
            peak_vus: 0,
            started: None,
        }
    }

    fn elapsed(&self) -> Duration {
        self.started.map_or(Duration::ZERO, |s| s.elapsed())
    }

    fn status(&self, phase: EnginePhase, target_vus: u32) -> EngineStatus {
        let elapsed = self.elapsed();
        EngineStatus {
            phase,
            elapsed,
            target_vus,
            live_vus: self.vus.len() as u32,
            running_vus: self.active_vus.get(),
            stage: self.profile.stage_index(elapsed),
        }
    }

    /// Tick loop: runs until the profile ends or `shutdown` is cancelled.
    async fn run(&mut self, shutdown: &CancellationToken, status_tx: &watch::Sender<EngineStatus>) {
        let started = Instant::now();
        self.started = Some(started);
        // `Instant + Duration` panics on overflow
        let deadline = started
            .checked_add(self.profile.total_duration())
            .unwrap_or_else(|| started + MAX_DURATION);
        status_tx.send_replace(self.status(EnginePhase::Running, 0));

        let mut interval = tokio::time::interval(self.tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!("stop requested, draining");
                    return;
                }
                _ = tokio::time::sleep_until(deadline) => {
                    return;
                }
                _ = interval.tick() => {}
            }

            let elapsed = started.elapsed();
            if elapsed >= self.profile.total_duration() {
                return;
            }
            let target = self.profile.target_vus(elapsed);
            self.reconcile(target);
            status_tx.send_replace(self.status(EnginePhase::Running, target));
        }
    }

    /// Reap VUs that ended on their own, then spawn or retire to reach `target`.
    fn reconcile(&mut self, target: u32) {
        self.vus.retain(|vu| {
            if vu.is_finished() {
                debug!(vu_id = vu.id(), "reaped finished VU");
                false
            } else {
                true
            }
        });

        let Some(shared) = self.shared.as_ref() else {
            return;
        };
        while (self.vus.len() as u32) < target {
            let vu = VirtualUser::new(self.next_vu_id, &self.root);
            debug!(vu_id = vu.id(), target, "spawning VU");
            self.tracker.spawn(vu_loop(
                vu.id(),
                shared.clone(),
                vu.state_cell(),
                vu.token(),
            ));
            self.vus.push(vu);
            self.next_vu_id += 1;
        }
        while (self.vus.len() as u32) > target {
            if let Some(vu) = self.vus.pop() {
                debug!(vu_id = vu.id(), target, "retiring VU");
                vu.stop();
            }
        }
        self.peak_vus = self.peak_vus.max(self.vus.len() as u32);
    }

    /// Stop every VU and wait for all VU tasks, including retired ones still
    /// finishing an iteration. Afterwards no sender remains, so the
    /// aggregator sees the channel close once it has drained.
    async fn drain(&mut self, status_tx: &watch::Sender<EngineStatus>) {
        status_tx.send_replace(self.status(EnginePhase::Draining, 0));
        info!(live_vus = self.vus.len(), "draining");

        for vu in &self.vus {
            vu.stop();
        }
        self.root.cancel();
        self.shared = None;

        self.tracker.close();
        self.tracker.wait().await;
        self.vus.clear();
    }
}

/// Result of a completed load test run.
#[derive(Debug, Clone)]
pub struct LoadTestResult {
    /// Final aggregate statistics.
    pub snapshot: MetricsSnapshot,
    /// Total elapsed time of the test, including draining.
    pub elapsed: Duration,
    /// Highest number of live VUs at any tick.
    pub peak_vus: u32,
    /// Number of VUs spawned over the whole run.
    pub vus_spawned: u32,
}

impl LoadTestResult {
    /// `true` when no check failed.
    pub fn checks_passed(&self) -> bool {
        self.snapshot.checks_failed() == 0
    }
}

/// Single writer for all aggregate statistics.
///
/// Consumes [`Sample`] values until every sender has been dropped, then
/// returns the final snapshot.
async fn metrics_aggregator(mut sample_rx: mpsc::Receiver<Sample>) -> MetricsSnapshot {
    let mut recorder = MetricsRecorder::new();
    while let Some(sample) = sample_rx.recv().await {
        recorder.record(&sample);
    }
    recorder.snapshot()
}
