//! End-to-end runs against a mock HTTP client: full ramps, failure injection,
//! drain behavior, abort-on-fail and the external stop signal.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::{Value, json};
use stampede::{
    Check, Error, HttpClient, HttpResponse, Method, MetricKind, MetricSummary, Reporter,
    RequestSpec, RunConfig, RunSummary, Scenario, Stage, Threshold, ThresholdOutcome,
    TransportError, setup_fn, teardown_fn,
};
use tokio::sync::watch;

/// Mock transport: waits a real `latency` (so the scheduler can run), reports
/// a fabricated `reported` duration, and times out every `fail_every`-th call.
struct MockClient {
    latency: Duration,
    reported: Duration,
    fail_every: Option<u64>,
    calls: AtomicU64,
    in_flight: AtomicUsize,
}

impl MockClient {
    fn ok(latency: Duration, reported: Duration) -> Arc<Self> {
        Arc::new(Self {
            latency,
            reported,
            fail_every: None,
            calls: AtomicU64::new(0),
            in_flight: AtomicUsize::new(0),
        })
    }

    fn failing_every(n: u64, latency: Duration, reported: Duration) -> Arc<Self> {
        Arc::new(Self {
            latency,
            reported,
            fail_every: Some(n),
            calls: AtomicU64::new(0),
            in_flight: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl HttpClient for MockClient {
    async fn request(
        &self,
        _method: Method,
        _url: &str,
        timeout: Duration,
        _name: Option<&str>,
    ) -> Result<HttpResponse, TransportError> {
        let n = self.calls.fetch_add(1, Ordering::Relaxed);
        self.in_flight.fetch_add(1, Ordering::Relaxed);
        tokio::time::sleep(self.latency).await;
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
        if self.fail_every.is_some_and(|every| n % every == 0) {
            return Err(TransportError::Timeout(timeout));
        }
        Ok(HttpResponse {
            status: 200,
            body_length: 64,
            duration: self.reported,
        })
    }
}

/// Keeps test output clean; the stdout path is covered in `report.rs`.
struct NullReporter;

#[async_trait]
impl Reporter for NullReporter {
    async fn report(
        &self,
        _summary: &RunSummary,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        Ok(())
    }
}

fn short_stages() -> Vec<Stage> {
    vec![
        Stage::new(Duration::from_millis(100), 10),
        Stage::new(Duration::from_millis(100), 30),
        Stage::new(Duration::from_millis(100), 30),
    ]
}

fn config(stages: Vec<Stage>, thresholds: Vec<Threshold>) -> RunConfig {
    RunConfig::builder()
        .base_url("http://localhost:0")
        .stages(stages)
        .thresholds(thresholds)
        .tick(Duration::from_millis(10))
        .build()
}

fn outcome<'a>(summary: &'a RunSummary, metric: &str) -> &'a ThresholdOutcome {
    summary
        .thresholds
        .iter()
        .find(|t| t.metric == metric)
        .unwrap_or_else(|| panic!("no threshold outcome for {metric}"))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn healthy_run_passes_all_thresholds() {
    let summary = Scenario::builder()
        .name("healthy ramp")
        .client(MockClient::ok(
            Duration::from_millis(2),
            Duration::from_millis(10),
        ))
        .config(config(
            short_stages(),
            vec![
                Threshold::new("http_req_duration", "p(95)<2000"),
                Threshold::new("errors", "rate<0.1"),
                Threshold::new("http_req_failed", "rate<0.1"),
                Threshold::new("http_reqs", "count>=1"),
            ],
        ))
        .requests(vec![RequestSpec::get("/api/info").named("InfoEndpoint")])
        .checks(vec![
            Check::status(200),
            Check::max_duration(Duration::from_secs(2)),
            Check::body_non_empty(),
        ])
        .reporter(Box::new(NullReporter))
        .build()
        .run()
        .await
        .unwrap();

    assert!(summary.passed);
    assert!(!summary.aborted);
    assert_eq!(summary.exit_code(), 0);
    assert!(summary.requests() > 0);
    assert!(summary.thresholds.iter().all(|t| t.passed));
    // Every built-in metric is present, including the per-check rates.
    for name in [
        "http_reqs",
        "http_req_duration",
        "http_req_failed",
        "checks",
        "errors",
        "status is 200",
        "response has content",
    ] {
        assert!(summary.metrics.contains_key(name), "missing metric {name}");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn transport_failures_fail_their_threshold_but_not_the_others() {
    let summary = Scenario::builder()
        .name("flaky transport")
        .client(MockClient::failing_every(
            5,
            Duration::from_millis(2),
            Duration::from_millis(10),
        ))
        .config(config(
            short_stages(),
            vec![
                Threshold::new("http_req_failed", "rate<0.1"),
                Threshold::new("http_req_duration", "p(95)<2000"),
            ],
        ))
        .checks(vec![Check::status(200)])
        .reporter(Box::new(NullReporter))
        .build()
        .run()
        .await
        .unwrap();

    assert!(!summary.passed);
    assert_ne!(summary.exit_code(), 0);
    assert!(!outcome(&summary, "http_req_failed").passed);
    // A failing threshold does not contaminate an independent passing one.
    assert!(outcome(&summary, "http_req_duration").passed);

    match summary.metrics.get("http_req_failed").unwrap() {
        MetricSummary::Rate { value, .. } => {
            assert!(*value > 0.1 && *value < 0.35, "failure rate was {value}");
        }
        other => panic!("unexpected summary {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn spike_profile_drains_every_worker_by_run_end() {
    let client = MockClient::ok(Duration::from_millis(5), Duration::from_millis(5));
    let summary = Scenario::builder()
        .name("spike")
        .client(Arc::clone(&client) as Arc<dyn HttpClient>)
        .config(config(
            vec![
                Stage::new(Duration::from_millis(50), 0),
                Stage::new(Duration::from_millis(100), 20),
                Stage::new(Duration::from_millis(50), 0),
            ],
            Vec::new(),
        ))
        .reporter(Box::new(NullReporter))
        .build()
        .run()
        .await
        .unwrap();

    // run() only returns once every VU has been joined, so nothing can still
    // be in flight.
    assert_eq!(client.in_flight.load(Ordering::Relaxed), 0);
    assert!(summary.requests() > 0);
    assert_eq!(summary.exit_code(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn threshold_on_an_empty_trend_reports_a_reason() {
    let mut cfg = config(
        vec![Stage::new(Duration::from_millis(60), 4)],
        vec![
            Threshold::new("response_time", "p(95)<3000"),
            Threshold::new("http_req_failed", "rate<0.5"),
        ],
    );
    cfg.custom_metrics = vec![("response_time".to_string(), MetricKind::Trend)];

    let summary = Scenario::builder()
        .name("empty trend")
        .client(MockClient::ok(
            Duration::from_millis(2),
            Duration::from_millis(10),
        ))
        .config(cfg)
        .reporter(Box::new(NullReporter))
        .build()
        .run()
        .await
        .unwrap();

    assert!(!summary.passed);
    assert_ne!(summary.exit_code(), 0);
    let empty = outcome(&summary, "response_time");
    assert!(!empty.passed);
    assert_eq!(empty.observed, None);
    assert!(empty.reason.as_deref().unwrap().contains("no samples"));
    assert!(outcome(&summary, "http_req_failed").passed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn abort_on_fail_drains_the_run_early() {
    let mut cfg = config(
        vec![Stage::new(Duration::from_secs(30), 5)],
        vec![Threshold::new("errors", "rate<0.5")],
    );
    cfg.abort_on_fail = true;
    cfg.eval_interval = Duration::from_millis(50);

    let started = Instant::now();
    let summary = Scenario::builder()
        .name("abort")
        .client(MockClient::ok(
            Duration::from_millis(2),
            Duration::from_millis(10),
        ))
        .config(cfg)
        // Every response is 200, so this check always fails.
        .checks(vec![Check::status(500)])
        .reporter(Box::new(NullReporter))
        .build()
        .run()
        .await
        .unwrap();

    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(summary.aborted);
    assert_ne!(summary.exit_code(), 0);
    assert!(!outcome(&summary, "errors").passed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn external_stop_signal_moves_the_run_to_draining() {
    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(150)).await;
        let _ = stop_tx.send(true);
    });

    let started = Instant::now();
    let summary = Scenario::builder()
        .name("interrupted")
        .client(MockClient::ok(
            Duration::from_millis(2),
            Duration::from_millis(10),
        ))
        .config(config(vec![Stage::new(Duration::from_secs(30), 5)], Vec::new()))
        .stop_signal(stop_rx)
        .reporter(Box::new(NullReporter))
        .build()
        .run()
        .await
        .unwrap();

    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(summary.requests() > 0);
    // No thresholds declared, so an interrupted run still exits cleanly.
    assert_eq!(summary.exit_code(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn hooks_run_exactly_once_and_feed_custom_checks() {
    let setup_calls = Arc::new(AtomicU64::new(0));
    let teardown_calls = Arc::new(AtomicU64::new(0));

    let setup_counter = Arc::clone(&setup_calls);
    let teardown_counter = Arc::clone(&teardown_calls);

    let summary = Scenario::builder()
        .name("hooks")
        .client(MockClient::ok(
            Duration::from_millis(2),
            Duration::from_millis(10),
        ))
        .config(config(
            vec![Stage::new(Duration::from_millis(80), 4)],
            vec![Threshold::new("status matches setup", "rate>=1")],
        ))
        .checks(vec![Check::custom("status matches setup", |response, ctx| {
            ctx.get("expected_status").and_then(Value::as_u64) == Some(response.status as u64)
        })])
        .setup(setup_fn(move || {
            let calls = Arc::clone(&setup_counter);
            async move {
                calls.fetch_add(1, Ordering::Relaxed);
                json!({ "expected_status": 200 })
            }
        }))
        .teardown(teardown_fn(move |data| {
            let calls = Arc::clone(&teardown_counter);
            async move {
                assert_eq!(
                    data.get("expected_status").and_then(Value::as_u64),
                    Some(200)
                );
                calls.fetch_add(1, Ordering::Relaxed);
            }
        }))
        .reporter(Box::new(NullReporter))
        .build()
        .run()
        .await
        .unwrap();

    assert_eq!(setup_calls.load(Ordering::Relaxed), 1);
    assert_eq!(teardown_calls.load(Ordering::Relaxed), 1);
    assert!(summary.passed, "custom check should pass: {:?}", summary.thresholds);
}

#[tokio::test]
async fn configuration_errors_surface_before_any_worker_starts() {
    let client = MockClient::ok(Duration::from_millis(1), Duration::from_millis(1));

    let err = Scenario::builder()
        .name("no stages")
        .client(Arc::clone(&client) as Arc<dyn HttpClient>)
        .config(config(Vec::new(), Vec::new()))
        .reporter(Box::new(NullReporter))
        .build()
        .run()
        .await
        .unwrap_err();
    assert!(matches!(err, Error::EmptyStages));

    let err = Scenario::builder()
        .name("bad expression")
        .client(Arc::clone(&client) as Arc<dyn HttpClient>)
        .config(config(
            vec![Stage::new(Duration::from_millis(50), 1)],
            vec![Threshold::new("http_req_duration", "p95<2000")],
        ))
        .reporter(Box::new(NullReporter))
        .build()
        .run()
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidThreshold { .. }));

    let err = Scenario::builder()
        .name("unknown metric")
        .client(Arc::clone(&client) as Arc<dyn HttpClient>)
        .config(config(
            vec![Stage::new(Duration::from_millis(50), 1)],
            vec![Threshold::new("no_such_metric", "rate<0.1")],
        ))
        .reporter(Box::new(NullReporter))
        .build()
        .run()
        .await
        .unwrap_err();
    assert!(matches!(err, Error::UnknownMetric(_)));

    // Nothing ever hit the transport.
    assert_eq!(client.calls.load(Ordering::Relaxed), 0);
}
