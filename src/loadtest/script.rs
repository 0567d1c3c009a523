//! User scripts: the body a virtual user executes once per iteration.
//!
//! A script receives a [`VuContext`] that issues requests through the shared
//! [`HttpClient`] and forwards every request and check outcome to the
//! aggregator. Scripts never see the metrics recorder itself.
//!
//! [`ScenarioScript`] is the script built from `[[request]]` blocks in a
//! config file. Library users can implement [`UserScript`] directly.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::loadtest::check::{run_checks, CheckResult, CheckSet};
use crate::loadtest::client::{HttpClient, HttpMethod, RequestRecord};
use crate::loadtest::metrics::{CheckSample, RequestSample, Sample};

/// Per-iteration body executed by every virtual user.
///
/// A panic inside `run` stops only the virtual user that raised it.
///
/// # Example
///
/// ```no_run
/// use async_trait::async_trait;
/// use httpload::loadtest::check::{CheckRule, CheckSet};
/// use httpload::loadtest::script::{UserScript, VuContext};
///
/// struct Health;
///
/// #[async_trait]
/// impl UserScript for Health {
///     async fn run(&self, ctx: &mut VuContext) {
///         let record = ctx.get("health", "http://localhost:8000/health").await;
///         let checks = CheckSet::new().check("status is 200", CheckRule::Status { equals: 200 });
///         ctx.check("health", &record, &checks).await;
///     }
/// }
/// ```
#[async_trait]
pub trait UserScript: Send + Sync {
    /// Run one iteration.
    async fn run(&self, ctx: &mut VuContext);
}

/// Handle given to a [`UserScript`] for the duration of one virtual user.
pub struct VuContext {
    vu_id: u32,
    iteration: u64,
    client: HttpClient,
    sample_tx: mpsc::Sender<Sample>,
}

impl VuContext {
    /// Creates a context for virtual user `vu_id`.
    pub fn new(vu_id: u32, client: HttpClient, sample_tx: mpsc::Sender<Sample>) -> Self {
        Self {
            vu_id,
            iteration: 0,
            client,
            sample_tx,
        }
    }

    /// Id of the virtual user running the script.
    pub fn vu_id(&self) -> u32 {
        self.vu_id
    }

    /// Zero-based iteration counter for this virtual user.
    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    pub(crate) fn advance(&mut self) {
        self.iteration += 1;
    }

    /// Issue a GET request and record it under `endpoint`.
    pub async fn get(&self, endpoint: &str, url: &str) -> Arc<RequestRecord> {
        self.request(endpoint, HttpMethod::Get, url, None).await
    }

    /// Issue a request and record it under `endpoint`.
    pub async fn request(
        &self,
        endpoint: &str,
        method: HttpMethod,
        url: &str,
        body: Option<&serde_json::Value>,
    ) -> Arc<RequestRecord> {
        let record = self.client.send(method, url, body).await;
        self.record(endpoint, record).await
    }

    /// Record a request made outside [`VuContext::request`].
    pub async fn record(&self, endpoint: &str, record: RequestRecord) -> Arc<RequestRecord> {
        let sample = RequestSample::from_record(endpoint, &record);
        // A closed channel means the engine is gone; the record is still returned.
        let _ = self.sample_tx.send(Sample::Request(sample)).await;
        Arc::new(record)
    }

    /// Evaluate `checks` against `record` and record each outcome under
    /// `(endpoint, check name)`.
    pub async fn check(
        &self,
        endpoint: &str,
        record: &Arc<RequestRecord>,
        checks: &CheckSet,
    ) -> Vec<CheckResult> {
        let results = run_checks(record, checks);
        for result in &results {
            let sample = CheckSample::from_result(endpoint, result);
            if self.sample_tx.send(Sample::Check(sample)).await.is_err() {
                break;
            }
        }
        results
    }
}

/// One request in a [`ScenarioScript`].
#[derive(Debug, Clone)]
pub struct ScenarioStep {
    /// Endpoint key used for stats.
    pub endpoint: String,
    /// HTTP method.
    pub method: HttpMethod,
    /// Absolute URL.
    pub url: String,
    /// Optional JSON body.
    pub body: Option<serde_json::Value>,
    /// Checks evaluated against every response.
    pub checks: CheckSet,
}

/// Script that issues each step's request in order and runs its checks.
#[derive(Debug, Clone, Default)]
pub struct ScenarioScript {
    steps: Vec<ScenarioStep>,
}

impl ScenarioScript {
    /// Creates a script from ordered steps.
    pub fn new(steps: Vec<ScenarioStep>) -> Self {
        Self { steps }
    }

    /// Steps in execution order.
    pub fn steps(&self) -> &[ScenarioStep] {
        &self.steps
    }
}

#[async_trait]
impl UserScript for ScenarioScript {
    async fn run(&self, ctx: &mut VuContext) {
        for step in &self.steps {
            let record = ctx
                .request(&step.endpoint, step.method, &step.url, step.body.as_ref())
                .await;
            if !step.checks.is_empty() {
                ctx.check(&step.endpoint, &record, &step.checks).await;
            }
        }
    }
}
