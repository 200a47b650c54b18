use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use typed_builder::TypedBuilder;

use crate::error::Error;
use crate::http::HttpClient;
use crate::metrics::{Counter, Rate, Registry, Trend, names};
use crate::scenario::{Check, RequestSpec};

/// One window of the concurrency ramp: ramp linearly to `target` VUs over
/// `duration`, starting from wherever the previous stage ended.
///
/// Use `Stage::new(Duration::from_secs(30), 3000)` to ramp to 3000 VUs
/// over 30 seconds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    pub duration: Duration,
    /// Virtual users at the end of the stage.
    pub target: u64,
}

impl Stage {
    pub fn new(duration: Duration, target: u64) -> Self {
        Self { duration, target }
    }
}

/// Executor that reconciles a set of virtual-user tasks against the staged
/// target on a fixed tick.
#[derive(Clone, Debug, TypedBuilder)]
pub struct RampingVusExecutor {
    pub stages: Vec<Stage>,
    #[builder(default = Duration::from_millis(100))]
    pub tick: Duration,
}

impl RampingVusExecutor {
    /// Drive the reconcile loop until the schedule ends or `stop` fires.
    ///
    /// Returns the live VU set so the caller owns the drain transition.
    pub(crate) async fn ramp(
        &self,
        env: VuEnv,
        mut stop: watch::Receiver<bool>,
    ) -> Result<VuSet, Error> {
        let total: Duration = self.stages.iter().map(|s| s.duration).sum();
        let started = Instant::now();
        let mut vus = VuSet::default();
        let mut next_tick = started;

        loop {
            let elapsed = started.elapsed();
            if elapsed >= total || *stop.borrow() {
                break;
            }
            let target = target_at(&self.stages, elapsed)?;
            vus.reconcile(target as usize, || spawn_vu(env.clone()));
            tracing::trace!(
                elapsed_ms = elapsed.as_millis() as u64,
                target,
                active = vus.active_count(),
                "reconciled virtual users"
            );
            next_tick += self.tick;
            tokio::select! {
                _ = tokio::time::sleep_until(next_tick) => {}
                _ = stop.changed() => {}
            }
        }
        Ok(vus)
    }
}

/// Target VU count at `elapsed`, by linear interpolation within the stage
/// whose cumulative window contains it. Past the last stage the target is 0.
pub(crate) fn target_at(stages: &[Stage], elapsed: Duration) -> Result<u64, Error> {
    let mut window_start = Duration::ZERO;
    let mut previous = 0u64;
    for stage in stages {
        let window_end = window_start + stage.duration;
        if elapsed < window_end {
            let t = (elapsed - window_start).as_secs_f64() / stage.duration.as_secs_f64();
            let target = previous as f64 + (stage.target as f64 - previous as f64) * t;
            if !target.is_finite() || target < 0.0 {
                return Err(Error::Invariant(format!(
                    "computed target concurrency {target} at {elapsed:?}"
                )));
            }
            return Ok(target.round() as u64);
        }
        previous = stage.target;
        window_start = window_end;
    }
    Ok(0)
}

pub(crate) struct VuHandle {
    retire: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

/// Live virtual users plus those flagged for retirement but not yet joined.
#[derive(Default)]
pub(crate) struct VuSet {
    active: VecDeque<VuHandle>,
    retiring: Vec<JoinHandle<()>>,
}

impl VuSet {
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Bring the active set to `target`: spawn the shortfall or retire the
    /// oldest surplus VUs. Opposite adjustments in one tick net out because
    /// only the signed difference is acted on.
    pub fn reconcile(&mut self, target: usize, mut spawn: impl FnMut() -> VuHandle) {
        while self.active.len() < target {
            self.active.push_back(spawn());
        }
        while self.active.len() > target {
            let Some(vu) = self.active.pop_front() else {
                break;
            };
            vu.retire.store(true, Ordering::Relaxed);
            self.retiring.push(vu.task);
        }
    }

    /// Flag every remaining VU and wait for all of them to finish their
    /// current iteration. No in-flight request is interrupted.
    pub async fn drain(mut self) -> Result<(), Error> {
        tracing::info!(
            active = self.active.len(),
            retiring = self.retiring.len(),
            "draining virtual users"
        );
        while let Some(vu) = self.active.pop_front() {
            vu.retire.store(true, Ordering::Relaxed);
            self.retiring.push(vu.task);
        }
        for res in join_all(self.retiring).await {
            res.map_err(|e| Error::Invariant(format!("virtual user task panicked: {e}")))?;
        }
        Ok(())
    }
}

/// Everything a virtual user needs; cloned per VU at spawn time. Metric
/// handles are pre-bound so the iteration hot path never touches the
/// registry's name map.
#[derive(Clone)]
pub(crate) struct VuEnv {
    pub client: Arc<dyn HttpClient>,
    pub base_url: Arc<str>,
    pub requests: Arc<[RequestSpec]>,
    pub checks: Arc<[Check]>,
    /// One rate handle per check, same order as `checks`.
    pub check_rates: Arc<[Rate]>,
    pub setup_data: Arc<Value>,
    pub metrics: WorkerMetrics,
    pub request_timeout: Duration,
    pub think_time: Duration,
}

/// Pre-bound handles for the built-in per-iteration metrics.
#[derive(Clone)]
pub(crate) struct WorkerMetrics {
    pub reqs: Counter,
    pub duration: Trend,
    pub failed: Rate,
    pub checks: Rate,
    pub errors: Rate,
}

impl WorkerMetrics {
    pub fn bind(registry: &Registry) -> Result<Self, Error> {
        Ok(Self {
            reqs: registry.counter(names::HTTP_REQS)?,
            duration: registry.trend(names::HTTP_REQ_DURATION)?,
            failed: registry.rate(names::HTTP_REQ_FAILED)?,
            checks: registry.rate(names::CHECKS)?,
            errors: registry.rate(names::ERRORS)?,
        })
    }
}

fn spawn_vu(env: VuEnv) -> VuHandle {
    let retire = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&retire);
    let task = tokio::spawn(vu_loop(env, flag));
    VuHandle { retire, task }
}

/// The virtual-user iteration loop: issue each declared request, grade the
/// declared checks, record the results, optionally sleep a think time, then
/// consult the retirement flag.
async fn vu_loop(env: VuEnv, retire: Arc<AtomicBool>) {
    while !retire.load(Ordering::Relaxed) {
        for spec in env.requests.iter() {
            let url = format!("{}{}", env.base_url, spec.path);
            let result = env
                .client
                .request(spec.method, &url, env.request_timeout, spec.name.as_deref())
                .await;
            env.metrics.reqs.add(1);
            match result {
                Ok(response) => {
                    env.metrics.failed.observe(false);
                    env.metrics
                        .duration
                        .record(response.duration.as_secs_f64() * 1000.0);
                    let mut all_passed = true;
                    for (check, rate) in env.checks.iter().zip(env.check_rates.iter()) {
                        let passed = check.eval(&response, &env.setup_data);
                        rate.observe(passed);
                        env.metrics.checks.observe(passed);
                        all_passed &= passed;
                    }
                    env.metrics.errors.observe(!all_passed);
                }
                Err(err) => {
                    // Transport failure: degrade into metric data, keep going.
                    env.metrics.failed.observe(true);
                    for rate in env.check_rates.iter() {
                        rate.observe(false);
                        env.metrics.checks.observe(false);
                    }
                    env.metrics.errors.observe(true);
                    tracing::debug!(%err, url = %url, "request failed");
                }
            }
        }
        if !env.think_time.is_zero() {
            tokio::time::sleep(env.think_time).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{HttpResponse, Method, TransportError};
    use crate::metrics::MetricSnapshot;
    use async_trait::async_trait;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[test]
    fn target_is_piecewise_linear_and_hits_declared_endpoints() {
        let stages = vec![
            Stage::new(secs(10), 100),
            Stage::new(secs(30), 3000),
            Stage::new(secs(20), 3000),
        ];
        assert_eq!(target_at(&stages, secs(0)).unwrap(), 0);
        assert_eq!(target_at(&stages, secs(5)).unwrap(), 50);
        assert_eq!(target_at(&stages, secs(10)).unwrap(), 100);
        assert_eq!(target_at(&stages, secs(25)).unwrap(), 1550);
        assert_eq!(target_at(&stages, secs(40)).unwrap(), 3000);
        // Plateau holds the previous target.
        assert_eq!(target_at(&stages, secs(50)).unwrap(), 3000);
        // Past the last stage the run drains.
        assert_eq!(target_at(&stages, secs(60)).unwrap(), 0);
        assert_eq!(target_at(&stages, secs(90)).unwrap(), 0);
    }

    #[test]
    fn spike_profile_stays_at_zero_through_the_idle_stage() {
        let stages = vec![
            Stage::new(secs(5), 0),
            Stage::new(secs(10), 3000),
            Stage::new(secs(30), 3000),
            Stage::new(secs(15), 0),
        ];
        assert_eq!(target_at(&stages, secs(3)).unwrap(), 0);
        assert_eq!(target_at(&stages, secs(10)).unwrap(), 1500);
        assert_eq!(target_at(&stages, secs(20)).unwrap(), 3000);
        // Half-way down the ramp-down.
        assert_eq!(
            target_at(&stages, secs(45) + Duration::from_millis(7500)).unwrap(),
            1500
        );
    }

    fn parked_vu() -> (VuHandle, Arc<AtomicBool>) {
        let retire = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&retire);
        let task = tokio::spawn({
            let flag = Arc::clone(&flag);
            async move {
                while !flag.load(Ordering::Relaxed) {
                    tokio::time::sleep(Duration::from_millis(1)).await;
                }
            }
        });
        (VuHandle { retire, task }, flag)
    }

    #[tokio::test]
    async fn reconcile_spawns_and_retires_oldest_first() {
        let mut vus = VuSet::default();
        let flags = std::cell::RefCell::new(Vec::new());
        let mut spawn = || {
            let (vu, flag) = parked_vu();
            flags.borrow_mut().push(flag);
            vu
        };

        vus.reconcile(5, &mut spawn);
        assert_eq!(vus.active_count(), 5);
        assert_eq!(flags.borrow().len(), 5);

        vus.reconcile(2, &mut spawn);
        drop(spawn);
        let flags = flags.into_inner();
        assert_eq!(vus.active_count(), 2);
        assert_eq!(vus.retiring.len(), 3);
        // The three oldest were flagged, the two newest were not.
        assert!(flags[..3].iter().all(|f| f.load(Ordering::Relaxed)));
        assert!(flags[3..].iter().all(|f| !f.load(Ordering::Relaxed)));

        vus.drain().await.unwrap();
    }

    struct FlatClient;

    #[async_trait]
    impl HttpClient for FlatClient {
        async fn request(
            &self,
            _method: Method,
            _url: &str,
            _timeout: Duration,
            _name: Option<&str>,
        ) -> Result<HttpResponse, TransportError> {
            // Yield to the runtime so the reconcile loop can run.
            tokio::time::sleep(Duration::from_millis(2)).await;
            Ok(HttpResponse {
                status: 200,
                body_length: 42,
                duration: Duration::from_millis(8),
            })
        }
    }

    fn test_env(registry: &Registry) -> VuEnv {
        VuEnv {
            client: Arc::new(FlatClient),
            base_url: Arc::from("http://localhost:0"),
            requests: vec![RequestSpec::get("/")].into(),
            checks: Vec::new().into(),
            check_rates: Vec::new().into(),
            setup_data: Arc::new(Value::Null),
            metrics: WorkerMetrics::bind(registry).unwrap(),
            request_timeout: Duration::from_secs(1),
            think_time: Duration::ZERO,
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn ramp_runs_the_schedule_and_drain_joins_every_vu() {
        let registry = Registry::new();
        let env = test_env(&registry);
        let executor = RampingVusExecutor::builder()
            .stages(vec![
                Stage::new(Duration::from_millis(100), 6),
                Stage::new(Duration::from_millis(100), 6),
            ])
            .tick(Duration::from_millis(10))
            .build();
        let (_stop_tx, stop_rx) = watch::channel(false);

        let vus = executor.ramp(env, stop_rx).await.unwrap();
        vus.drain().await.unwrap();

        let snapshot = registry.snapshot();
        match snapshot.get(names::HTTP_REQS).unwrap() {
            MetricSnapshot::Counter { count } => assert!(*count > 0),
            other => panic!("unexpected snapshot {other:?}"),
        }
        match snapshot.get(names::HTTP_REQ_FAILED).unwrap() {
            MetricSnapshot::Rate { passes, .. } => assert_eq!(*passes, 0),
            other => panic!("unexpected snapshot {other:?}"),
        }
    }

    #[tokio::test]
    async fn stop_signal_ends_the_ramp_early() {
        let registry = Registry::new();
        let env = test_env(&registry);
        let executor = RampingVusExecutor::builder()
            .stages(vec![Stage::new(secs(30), 4)])
            .tick(Duration::from_millis(10))
            .build();
        let (stop_tx, stop_rx) = watch::channel(false);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(60)).await;
            let _ = stop_tx.send(true);
        });

        let started = std::time::Instant::now();
        let vus = executor.ramp(env, stop_rx).await.unwrap();
        vus.drain().await.unwrap();
        assert!(started.elapsed() < secs(5));
    }
}
