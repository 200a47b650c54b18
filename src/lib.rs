//! Stampede — an open-loop HTTP load-generation and measurement engine.
//!
//! Stampede drives a target endpoint with a population of virtual users (VUs)
//! whose size follows a declared stage schedule, measures every request into
//! shared metric accumulators, and judges the run against statistical
//! thresholds — the same model popularized by k6-style load scripts, offered
//! here as a Rust library.
//!
//! # Architecture
//!
//! The main building blocks are:
//!
//! - [`Scenario`]: glue that ties everything together — the run configuration,
//!   the requests and checks each iteration performs, the hooks, the client
//!   and the reporter. Its `run()` drives the whole lifecycle.
//! - [`RampingVusExecutor`]: the VU scheduler. It interpolates a target
//!   concurrency from the [`Stage`] list on a fixed tick and reconciles the
//!   live VU set against it — spawning new workers on the way up, retiring
//!   the oldest cooperatively on the way down.
//! - [`Registry`](metrics::Registry): named metric accumulators (counter,
//!   rate, trend) shared by every VU. Writes are lock-minimal and aggregates
//!   are commutative, so results do not depend on worker interleaving.
//! - [`Threshold`]: pass/fail conditions such as `p(95)<2000` or `rate<0.1`,
//!   parsed at load time and evaluated over registry snapshots.
//! - [`Reporter`]: consumes the final [`RunSummary`] and sends it somewhere
//!   (stdout text, JSON, or your own sink).
//!
//! The HTTP side is an external collaborator behind the [`HttpClient`] trait;
//! a reqwest-backed adapter ships behind the default `reqwest-client`
//! feature. Connection pooling is the client's concern, not the engine's.
//!
//! # Design goals
//!
//! - Open-loop load: concurrency is dictated purely by the declared stages,
//!   never by feedback from the target.
//! - No mid-flight cancellation: retiring a VU lets it finish its current
//!   iteration; only the scheduler's spawning stops immediately.
//! - Degrade, don't abort: transport errors become metric data
//!   (`http_req_failed`, failed checks); only configuration errors and
//!   scheduler invariant violations can end a run early with an `Err`.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use stampede::{Check, ReqwestClient, RequestSpec, RunConfig, Scenario, Stage, Threshold};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), stampede::Error> {
//!     let summary = Scenario::builder()
//!         .name("info endpoint")
//!         .client(Arc::new(ReqwestClient::new()))
//!         .config(
//!             RunConfig::builder()
//!                 .base_url("http://localhost:8080")
//!                 .stages(vec![
//!                     Stage::new(Duration::from_secs(10), 100),
//!                     Stage::new(Duration::from_secs(30), 3000),
//!                     Stage::new(Duration::from_secs(20), 3000),
//!                 ])
//!                 .thresholds(vec![
//!                     Threshold::new("http_req_duration", "p(95)<2000"),
//!                     Threshold::new("errors", "rate<0.1"),
//!                     Threshold::new("http_req_failed", "rate<0.1"),
//!                 ])
//!                 .think_time(Duration::from_millis(100))
//!                 .build(),
//!         )
//!         .requests(vec![RequestSpec::get("/api/info").named("InfoEndpoint")])
//!         .checks(vec![
//!             Check::status(200),
//!             Check::max_duration(Duration::from_secs(2)),
//!             Check::body_non_empty(),
//!         ])
//!         .build()
//!         .run()
//!         .await?;
//!     std::process::exit(summary.exit_code());
//! }
//! ```
//!
//! # Feature flags
//!
//! - `reqwest-client`: the built-in [`ReqwestClient`] adapter over a pooled
//!   reqwest client. (Enabled by default.)
//!
//! # Where to start
//!
//! - Read the docs for [`Scenario`], [`executor`] and [`Reporter`].
//! - See `demos/` for runnable profiles: a ramp test, a soak test and a
//!   spike test against a plain HTTP endpoint.

/// Run configuration: stages, thresholds and per-iteration knobs
pub mod config;
/// Error taxonomy of the engine
pub mod error;
/// The virtual-user scheduler
pub mod executor;
/// HTTP client seam and transport errors
pub mod http;
/// Shared metric accumulators and snapshots
pub mod metrics;
/// Run summaries and reporters
pub mod report;
/// Scenario glue and the run lifecycle
pub mod scenario;
/// Threshold expressions and evaluation
pub mod threshold;

pub use config::RunConfig;
pub use error::Error;
pub use executor::{RampingVusExecutor, Stage};
#[cfg(feature = "reqwest-client")]
pub use http::ReqwestClient;
pub use http::{HttpClient, HttpResponse, Method, TransportError};
pub use metrics::{MetricKind, Registry, Snapshot};
pub use report::{JsonReporter, MetricSummary, Reporter, RunSummary, StdoutReporter};
pub use scenario::{Check, RequestSpec, Scenario, SetupHook, TeardownHook, setup_fn, teardown_fn};
pub use threshold::{Threshold, ThresholdOutcome};
