//! Virtual user (VU) task loop for load test execution.
//!
//! Each VU repeatedly runs the [`UserScript`], then pauses for its think
//! time. Stop is cooperative: the VU's [`CancellationToken`] is checked at
//! the top of every iteration and wakes the think-time sleep, but a request
//! already in flight always completes and is recorded.
//!
//! A panic anywhere in the loop (script, think time, sample reporting) is
//! caught at the task boundary, logged, and counted as a VU error; only that
//! VU stops.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;

use futures::FutureExt;
use rand::prelude::*;
use rand::rngs::StdRng;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::loadtest::check::panic_message;
use crate::loadtest::client::HttpClient;
use crate::loadtest::metrics::Sample;
use crate::loadtest::script::{UserScript, VuContext};
use crate::loadtest::sleep::ThinkTime;

/// Atomic counter tracking the number of currently active virtual users.
///
/// Lightweight wrapper around `Arc<AtomicU32>` for clone-friendly sharing
/// across VU tasks and the engine orchestrator.
#[derive(Clone, Debug)]
pub struct ActiveVuCounter(Arc<AtomicU32>);

impl ActiveVuCounter {
    /// Creates a new counter initialized to zero.
    pub fn new() -> Self {
        Self(Arc::new(AtomicU32::new(0)))
    }

    /// Increments the active VU count by one.
    pub fn increment(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    /// Decrements the active VU count by one.
    pub fn decrement(&self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }

    /// Returns the current number of active VUs.
    pub fn get(&self) -> u32 {
        self.0.load(Ordering::Relaxed)
    }
}

impl Default for ActiveVuCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// Lifecycle of a virtual user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum VuState {
    /// Spawned, task not yet started.
    Pending = 0,
    /// Executing iterations.
    Running = 1,
    /// Told to stop; finishing the current iteration.
    Stopping = 2,
    /// Task exited.
    Stopped = 3,
}

impl VuState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Pending,
            1 => Self::Running,
            2 => Self::Stopping,
            _ => Self::Stopped,
        }
    }
}

/// Shared, observable [`VuState`] cell.
///
/// Transitions only move forward: `Pending -> Running -> Stopping -> Stopped`,
/// with `Pending -> Stopping` allowed when a VU is retired before it starts.
#[derive(Debug, Clone)]
pub struct VuStateCell(Arc<AtomicU8>);

impl VuStateCell {
    /// Creates a cell in [`VuState::Pending`].
    pub fn new() -> Self {
        Self(Arc::new(AtomicU8::new(VuState::Pending as u8)))
    }

    /// Current state.
    pub fn get(&self) -> VuState {
        VuState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// `Pending -> Running`. Returns `false` if the VU was already told to stop.
    fn start(&self) -> bool {
        self.0
            .compare_exchange(
                VuState::Pending as u8,
                VuState::Running as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// `Pending | Running -> Stopping`. No-op once stopping or stopped.
    fn request_stop(&self) {
        let _ = self
            .0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current < VuState::Stopping as u8).then_some(VuState::Stopping as u8)
            });
    }

    fn finish(&self) {
        self.0.store(VuState::Stopped as u8, Ordering::Release);
    }
}

impl Default for VuStateCell {
    fn default() -> Self {
        Self::new()
    }
}

/// Orchestrator-side handle to one virtual user.
#[derive(Debug)]
pub struct VirtualUser {
    id: u32,
    state: VuStateCell,
    cancel: CancellationToken,
}

impl VirtualUser {
    /// Creates a handle whose stop token is a child of `parent`.
    pub fn new(id: u32, parent: &CancellationToken) -> Self {
        Self {
            id,
            state: VuStateCell::new(),
            cancel: parent.child_token(),
        }
    }

    /// Sequential VU id.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> VuState {
        self.state.get()
    }

    /// `true` once the VU task has exited.
    pub fn is_finished(&self) -> bool {
        self.state() == VuState::Stopped
    }

    /// Signal the VU to stop after its current iteration.
    pub fn stop(&self) {
        self.state.request_stop();
        self.cancel.cancel();
    }

    pub(crate) fn state_cell(&self) -> VuStateCell {
        self.state.clone()
    }

    pub(crate) fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

/// Everything a VU task needs that is shared across all VUs.
#[derive(Clone)]
pub struct VuShared {
    /// Script run once per iteration.
    pub script: Arc<dyn UserScript>,
    /// Shared HTTP client.
    pub client: HttpClient,
    /// Pause between iterations.
    pub think_time: ThinkTime,
    /// Sample channel to the aggregator.
    pub sample_tx: mpsc::Sender<Sample>,
    /// Base RNG seed; each VU uses `seed + vu_id`.
    pub seed: Option<u64>,
    /// Number of VU tasks currently running.
    pub active_vus: ActiveVuCounter,
}

/// Main virtual user task loop.
///
/// Each VU:
/// 1. Checks its stop signal; exits if set.
/// 2. Runs the script once.
/// 3. Sleeps for its think time, waking early on the stop signal.
///
/// The `active_vus` counter is incremented on entry and decremented on all
/// exit paths, and the state cell always ends in [`VuState::Stopped`].
pub async fn vu_loop(
    vu_id: u32,
    shared: VuShared,
    state: VuStateCell,
    cancel: CancellationToken,
) {
    shared.active_vus.increment();
    state.start();
    debug!(vu_id, "VU started");

    let result = AssertUnwindSafe(vu_loop_inner(vu_id, &shared, &cancel))
        .catch_unwind()
        .await;

    if let Err(panic) = result {
        let reason = panic_message(&*panic);
        error!(vu_id, "VU stopped after panic: {reason}");
        let _ = shared
            .sample_tx
            .send(Sample::VuError {
                vu_id,
                message: reason,
            })
            .await;
    } else {
        debug!(vu_id, "VU stopped");
    }

    state.finish();
    shared.active_vus.decrement();
}

/// Inner VU loop logic, separated for clean exit handling.
///
/// Returns on stop; panics propagate to [`vu_loop`].
async fn vu_loop_inner(vu_id: u32, shared: &VuShared, cancel: &CancellationToken) {
    let mut rng = match shared.seed {
        Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(u64::from(vu_id))),
        None => StdRng::from_rng(&mut rand::rng()),
    };
    let mut ctx = VuContext::new(vu_id, shared.client.clone(), shared.sample_tx.clone());

    loop {
        if cancel.is_cancelled() {
            return;
        }

        shared.script.run(&mut ctx).await;

        if shared
            .sample_tx
            .send(Sample::Iteration { vu_id })
            .await
            .is_err()
        {
            // Receiver dropped -- metrics aggregator is gone
            return;
        }
        ctx.advance();

        let pause = shared.think_time.sample(&mut rng);
        tokio::select! {
            _ = tokio::time::sleep(pause) => {}
            _ = cancel.cancelled() => return,
        }
    }
}
