//! Run summaries and the reporters that consume them.
//!
//! A [`RunSummary`] is the final immutable aggregate of a run: every declared
//! metric (present even with zero observations), every threshold outcome, and
//! the overall verdict. A [`Reporter`] turns that into output — stdout text,
//! JSON, a file, a database; the engine does not care.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::metrics::{MetricSnapshot, Snapshot, names, quantile};
use crate::threshold::ThresholdOutcome;

/// Derived statistics for one metric, computed once at finalization.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum MetricSummary {
    Counter {
        count: u64,
        per_second: f64,
    },
    Rate {
        passes: u64,
        fails: u64,
        value: f64,
    },
    /// Latency statistics in milliseconds. All fields are `None` when the
    /// trend recorded no samples.
    Trend {
        count: u64,
        min: Option<f64>,
        max: Option<f64>,
        mean: Option<f64>,
        med: Option<f64>,
        p90: Option<f64>,
        p95: Option<f64>,
        p99: Option<f64>,
    },
}

impl MetricSummary {
    fn from_snapshot(snapshot: &MetricSnapshot, run_duration: Duration) -> Self {
        match snapshot {
            MetricSnapshot::Counter { count } => {
                let secs = run_duration.as_secs_f64();
                MetricSummary::Counter {
                    count: *count,
                    per_second: if secs > 0.0 { *count as f64 / secs } else { 0.0 },
                }
            }
            MetricSnapshot::Rate { passes, total } => MetricSummary::Rate {
                passes: *passes,
                fails: total - passes,
                value: if *total > 0 {
                    *passes as f64 / *total as f64
                } else {
                    0.0
                },
            },
            MetricSnapshot::Trend { samples } => {
                let count = samples.len() as u64;
                let mean = if samples.is_empty() {
                    None
                } else {
                    Some(samples.iter().sum::<f64>() / samples.len() as f64)
                };
                MetricSummary::Trend {
                    count,
                    min: quantile(samples, 0.0),
                    max: quantile(samples, 1.0),
                    mean,
                    med: quantile(samples, 0.5),
                    p90: quantile(samples, 0.90),
                    p95: quantile(samples, 0.95),
                    p99: quantile(samples, 0.99),
                }
            }
        }
    }
}

/// Final immutable snapshot of a run, handed to the report sink.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub name: String,
    pub duration: Duration,
    pub metrics: BTreeMap<String, MetricSummary>,
    pub thresholds: Vec<ThresholdOutcome>,
    /// Logical AND of all threshold outcomes.
    pub passed: bool,
    /// Whether a mid-run threshold breach drained the run early.
    pub aborted: bool,
}

impl RunSummary {
    pub(crate) fn build(
        name: String,
        duration: Duration,
        snapshot: &Snapshot,
        thresholds: Vec<ThresholdOutcome>,
        aborted: bool,
    ) -> Self {
        let passed = thresholds.iter().all(|t| t.passed);
        let metrics = snapshot
            .metrics
            .iter()
            .map(|(n, m)| (n.clone(), MetricSummary::from_snapshot(m, duration)))
            .collect();
        Self {
            name,
            duration,
            metrics,
            thresholds,
            passed,
            aborted,
        }
    }

    /// Total requests issued, from the built-in counter.
    pub fn requests(&self) -> u64 {
        match self.metrics.get(names::HTTP_REQS) {
            Some(MetricSummary::Counter { count, .. }) => *count,
            _ => 0,
        }
    }

    /// Process exit contract: 0 iff every threshold passed and no abort
    /// condition triggered.
    pub fn exit_code(&self) -> i32 {
        if self.passed && !self.aborted { 0 } else { 1 }
    }
}

/// Consumes a finished [`RunSummary`] and sends it somewhere.
#[async_trait]
pub trait Reporter: Send + Sync {
    async fn report(
        &self,
        summary: &RunSummary,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// Human-readable text summary on stdout.
pub struct StdoutReporter;

#[async_trait]
impl Reporter for StdoutReporter {
    async fn report(
        &self,
        summary: &RunSummary,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        println!("{}", render_text(summary));
        Ok(())
    }
}

/// Machine-readable JSON summary on stdout.
pub struct JsonReporter;

#[async_trait]
impl Reporter for JsonReporter {
    async fn report(
        &self,
        summary: &RunSummary,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        println!("{}", serde_json::to_string_pretty(summary)?);
        Ok(())
    }
}

fn fmt_ms(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{v:.2}ms"),
        None => "-".into(),
    }
}

pub(crate) fn render_text(summary: &RunSummary) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "scenario: {} ({:.1}s, {} requests)",
        summary.name,
        summary.duration.as_secs_f64(),
        summary.requests()
    );
    for (name, metric) in &summary.metrics {
        match metric {
            MetricSummary::Counter { count, per_second } => {
                let _ = writeln!(out, "  {name:<24} {count} ({per_second:.1}/s)");
            }
            MetricSummary::Rate { passes, fails, value } => {
                let _ = writeln!(
                    out,
                    "  {name:<24} {:.2}% ({passes} of {})",
                    value * 100.0,
                    passes + fails
                );
            }
            MetricSummary::Trend {
                count,
                min,
                max,
                mean,
                med,
                p90,
                p95,
                p99,
            } => {
                let _ = writeln!(
                    out,
                    "  {name:<24} n={count} avg={} min={} med={} p(90)={} p(95)={} p(99)={} max={}",
                    fmt_ms(*mean),
                    fmt_ms(*min),
                    fmt_ms(*med),
                    fmt_ms(*p90),
                    fmt_ms(*p95),
                    fmt_ms(*p99),
                    fmt_ms(*max),
                );
            }
        }
    }
    if !summary.thresholds.is_empty() {
        let _ = writeln!(out, "thresholds:");
        for outcome in &summary.thresholds {
            let mark = if outcome.passed { '✓' } else { '✗' };
            let _ = write!(out, "  {mark} {}: {}", outcome.metric, outcome.expression);
            match (&outcome.observed, &outcome.reason) {
                (Some(v), _) => {
                    let _ = writeln!(out, " (observed {v:.4})");
                }
                (None, Some(reason)) => {
                    let _ = writeln!(out, " ({reason})");
                }
                (None, None) => {
                    let _ = writeln!(out);
                }
            }
        }
    }
    let verdict = if summary.aborted {
        "aborted"
    } else if summary.passed {
        "passed"
    } else {
        "failed"
    };
    let _ = writeln!(out, "result: {verdict}");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{MetricKind, Registry};

    fn summary_fixture() -> RunSummary {
        let registry = Registry::new();
        let reqs = registry.counter(names::HTTP_REQS).unwrap();
        reqs.add(200);
        let failed = registry.rate(names::HTTP_REQ_FAILED).unwrap();
        for i in 0..200 {
            failed.observe(i % 10 == 0);
        }
        let duration = registry.trend(names::HTTP_REQ_DURATION).unwrap();
        for i in 1..=100 {
            duration.record(i as f64);
        }
        registry.declare("response_time", MetricKind::Trend).unwrap();

        RunSummary::build(
            "fixture".into(),
            Duration::from_secs(10),
            &registry.snapshot(),
            vec![
                ThresholdOutcome {
                    metric: names::HTTP_REQ_DURATION.into(),
                    expression: "p(95)<2000".into(),
                    passed: true,
                    observed: Some(95.05),
                    reason: None,
                },
                ThresholdOutcome {
                    metric: "response_time".into(),
                    expression: "p(95)<3000".into(),
                    passed: false,
                    observed: None,
                    reason: Some("no samples recorded".into()),
                },
            ],
            false,
        )
    }

    #[test]
    fn summary_contains_every_declared_metric() {
        let summary = summary_fixture();
        assert!(summary.metrics.contains_key("response_time"));
        assert_eq!(summary.requests(), 200);
        match summary.metrics.get("response_time").unwrap() {
            MetricSummary::Trend { count, p95, .. } => {
                assert_eq!(*count, 0);
                assert_eq!(*p95, None);
            }
            other => panic!("unexpected summary {other:?}"),
        }
    }

    #[test]
    fn verdict_is_the_and_of_threshold_outcomes() {
        let summary = summary_fixture();
        assert!(!summary.passed);
        assert_eq!(summary.exit_code(), 1);
    }

    #[test]
    fn text_rendering_marks_each_threshold() {
        let text = render_text(&summary_fixture());
        assert!(text.contains("✓ http_req_duration: p(95)<2000"));
        assert!(text.contains("✗ response_time: p(95)<3000 (no samples recorded)"));
        assert!(text.contains("result: failed"));
    }

    #[test]
    fn summary_round_trips_through_json() {
        let summary = summary_fixture();
        let json = serde_json::to_string(&summary).unwrap();
        let back: RunSummary = serde_json::from_str(&json).unwrap();
        assert_eq!(summary, back);
    }
}
