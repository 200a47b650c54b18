//! Scenario — glue that ties a run together, and the lifecycle that drives it.
//!
//! A [`Scenario`] owns the declarative pieces (config, request specs, checks,
//! hooks, client, reporter); [`Scenario::run`] walks the lifecycle
//! `Idle → Setup → Running → Draining → TearDown → Finalizing → Done`. The
//! state machine is what guarantees setup and teardown run exactly once and
//! that nothing terminates the run between `Running` and `Finalizing` except
//! a configuration error surfaced up front or a scheduler invariant
//! violation.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use futures::FutureExt;
use futures::future::BoxFuture;
use serde_json::Value;
use tokio::sync::watch;
use typed_builder::TypedBuilder;

use crate::config::RunConfig;
use crate::error::Error;
use crate::executor::RampingVusExecutor;
use crate::executor::ramping::{VuEnv, WorkerMetrics};
use crate::http::{HttpClient, HttpResponse, Method};
use crate::metrics::{Rate, Registry};
use crate::report::{Reporter, RunSummary, StdoutReporter};
use crate::threshold::{self, Compiled};

/// One HTTP exchange performed each iteration of the virtual-user loop.
#[derive(Clone, Debug)]
pub struct RequestSpec {
    pub method: Method,
    /// Appended to the run's `base_url`.
    pub path: String,
    /// Optional tag forwarded to the HTTP client.
    pub name: Option<String>,
}

impl RequestSpec {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            name: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

type Predicate = Arc<dyn Fn(&HttpResponse, &Value) -> bool + Send + Sync>;

#[derive(Clone)]
enum CheckKind {
    StatusIs(u16),
    DurationUnder(Duration),
    BodyNonEmpty,
    Custom(Predicate),
}

/// A named assertion graded against every response. Each check feeds a rate
/// metric of the same name, plus the overall `checks` rate.
#[derive(Clone)]
pub struct Check {
    pub name: String,
    kind: CheckKind,
}

impl Check {
    pub fn status(code: u16) -> Self {
        Self {
            name: format!("status is {code}"),
            kind: CheckKind::StatusIs(code),
        }
    }

    pub fn max_duration(limit: Duration) -> Self {
        Self {
            name: format!("response time < {}ms", limit.as_millis()),
            kind: CheckKind::DurationUnder(limit),
        }
    }

    pub fn body_non_empty() -> Self {
        Self {
            name: "response has content".into(),
            kind: CheckKind::BodyNonEmpty,
        }
    }

    /// Custom predicate over the response and the (read-only) setup context.
    pub fn custom(
        name: impl Into<String>,
        predicate: impl Fn(&HttpResponse, &Value) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            kind: CheckKind::Custom(Arc::new(predicate)),
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub(crate) fn eval(&self, response: &HttpResponse, setup_data: &Value) -> bool {
        match &self.kind {
            CheckKind::StatusIs(code) => response.status == *code,
            CheckKind::DurationUnder(limit) => response.duration < *limit,
            CheckKind::BodyNonEmpty => response.body_length > 0,
            CheckKind::Custom(predicate) => predicate(response, setup_data),
        }
    }
}

impl fmt::Debug for Check {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Check").field("name", &self.name).finish()
    }
}

/// Runs once before any virtual user starts; its value is shared read-only
/// with every worker for the whole run.
pub type SetupHook = Arc<dyn Fn() -> BoxFuture<'static, Value> + Send + Sync>;

/// Runs once after the last virtual user has stopped, receiving the setup
/// context.
pub type TeardownHook = Arc<dyn Fn(Arc<Value>) -> BoxFuture<'static, ()> + Send + Sync>;

pub fn setup_fn<F, Fut>(f: F) -> SetupHook
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Value> + Send + 'static,
{
    Arc::new(move || f().boxed())
}

pub fn teardown_fn<F, Fut>(f: F) -> TeardownHook
where
    F: Fn(Arc<Value>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |data| f(data).boxed())
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Idle,
    Setup,
    Running,
    Draining,
    TearDown,
    Finalizing,
    Done,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Idle => "idle",
            Phase::Setup => "setup",
            Phase::Running => "running",
            Phase::Draining => "draining",
            Phase::TearDown => "teardown",
            Phase::Finalizing => "finalizing",
            Phase::Done => "done",
        };
        f.write_str(s)
    }
}

fn transition(from: Phase, to: Phase) -> Phase {
    tracing::debug!(%from, %to, "run state transition");
    to
}

/// A complete load-test definition.
#[derive(TypedBuilder)]
pub struct Scenario {
    #[builder(setter(into))]
    pub name: String,
    pub config: RunConfig,
    pub client: Arc<dyn HttpClient>,
    #[builder(default = vec![RequestSpec::get("/")])]
    pub requests: Vec<RequestSpec>,
    #[builder(default)]
    pub checks: Vec<Check>,
    #[builder(default, setter(strip_option))]
    pub setup: Option<SetupHook>,
    #[builder(default, setter(strip_option))]
    pub teardown: Option<TeardownHook>,
    /// External stop signal: flipping it to `true` moves the run into
    /// draining from any state; in-flight requests still complete.
    #[builder(default, setter(strip_option))]
    pub stop_signal: Option<watch::Receiver<bool>>,
    #[builder(default = Box::new(StdoutReporter) as Box<dyn Reporter>)]
    pub reporter: Box<dyn Reporter>,
}

impl Scenario {
    /// Execute the run to completion and hand the summary to the reporter.
    ///
    /// Only configuration errors (surfaced before any worker starts) and
    /// internal invariant violations return `Err`; threshold failures are a
    /// normal outcome carried in the summary and its exit code.
    pub async fn run(self) -> Result<RunSummary, Error> {
        let Scenario {
            name,
            config,
            client,
            requests,
            checks,
            setup,
            teardown,
            stop_signal,
            reporter,
        } = self;

        let phase = Phase::Idle;
        config.validate()?;
        let compiled = threshold::compile(&config.thresholds)?;

        // Setup: hooks run exactly once, metrics are registered up front.
        let phase = transition(phase, Phase::Setup);
        tracing::info!(
            scenario = %name,
            base_url = %config.base_url,
            duration = ?config.total_duration(),
            peak_vus = config.peak_target(),
            "starting load test"
        );
        let setup_data = Arc::new(match &setup {
            Some(hook) => hook().await,
            None => Value::Null,
        });

        let registry = Arc::new(Registry::new());
        let metrics = WorkerMetrics::bind(&registry)?;
        let check_rates: Vec<Rate> = checks
            .iter()
            .map(|c| registry.rate(&c.name))
            .collect::<Result<_, _>>()?;
        for (metric_name, kind) in &config.custom_metrics {
            registry.declare(metric_name, *kind)?;
        }
        for t in &compiled {
            if !registry.contains(&t.metric) {
                return Err(Error::UnknownMetric(t.metric.clone()));
            }
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        let stop_tx = Arc::new(stop_tx);
        if let Some(mut external) = stop_signal {
            let tx = Arc::clone(&stop_tx);
            tokio::spawn(async move {
                loop {
                    if *external.borrow() {
                        let _ = tx.send(true);
                        break;
                    }
                    if external.changed().await.is_err() {
                        break;
                    }
                }
            });
        }

        let aborted = Arc::new(AtomicBool::new(false));
        let watchdog = if config.abort_on_fail && !compiled.is_empty() {
            Some(tokio::spawn(watchdog_task(
                Arc::clone(&registry),
                compiled.clone(),
                config.eval_interval,
                Arc::clone(&stop_tx),
                Arc::clone(&aborted),
                stop_rx.clone(),
            )))
        } else {
            None
        };

        // Running: the scheduler's tick loop owns worker lifecycles.
        let phase = transition(phase, Phase::Running);
        let started = Instant::now();
        let executor = RampingVusExecutor::builder()
            .stages(config.stages.clone())
            .tick(config.tick)
            .build();
        let env = VuEnv {
            client,
            base_url: Arc::from(config.base_url.as_str()),
            requests: requests.into(),
            checks: checks.into(),
            check_rates: check_rates.into(),
            setup_data: Arc::clone(&setup_data),
            metrics,
            request_timeout: config.request_timeout,
            think_time: config.think_time,
        };
        let vus = executor.ramp(env, stop_rx.clone()).await?;

        // Draining: target forced to zero, workers retire cooperatively.
        let phase = transition(phase, Phase::Draining);
        vus.drain().await?;
        let _ = stop_tx.send(true);
        if let Some(task) = watchdog {
            let _ = task.await;
        }

        let phase = transition(phase, Phase::TearDown);
        if let Some(hook) = &teardown {
            hook(Arc::clone(&setup_data)).await;
        }
        tracing::info!(scenario = %name, elapsed = ?started.elapsed(), "load test complete");

        // Finalizing: one last snapshot, full threshold evaluation.
        let phase = transition(phase, Phase::Finalizing);
        let snapshot = registry.snapshot();
        let outcomes = threshold::evaluate_all(&compiled, &snapshot);
        let summary = RunSummary::build(
            name,
            started.elapsed(),
            &snapshot,
            outcomes,
            aborted.load(Ordering::Relaxed),
        );
        reporter.report(&summary).await.map_err(Error::Report)?;

        let _done = transition(phase, Phase::Done);
        Ok(summary)
    }
}

/// Mid-run threshold evaluation. Only a threshold that produced an observed
/// value can trigger the abort; "no data yet" outcomes are left to the final
/// evaluation so a slow ramp does not abort an otherwise healthy run.
async fn watchdog_task(
    registry: Arc<Registry>,
    thresholds: Vec<Compiled>,
    interval: Duration,
    stop: Arc<watch::Sender<bool>>,
    aborted: Arc<AtomicBool>,
    mut stop_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {
                let snapshot = registry.snapshot();
                let outcomes = threshold::evaluate_all(&thresholds, &snapshot);
                let breached: Vec<_> = outcomes
                    .iter()
                    .filter(|o| !o.passed && o.observed.is_some())
                    .collect();
                if !breached.is_empty() {
                    for outcome in &breached {
                        tracing::warn!(
                            metric = %outcome.metric,
                            expression = %outcome.expression,
                            observed = outcome.observed,
                            "threshold breached mid-run"
                        );
                    }
                    aborted.store(true, Ordering::Relaxed);
                    let _ = stop.send(true);
                    break;
                }
            }
            _ = stop_rx.changed() => break,
        }
    }
}
