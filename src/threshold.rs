//! Threshold expressions and their evaluation.
//!
//! An expression is an aggregation selector, a comparator and a numeric bound:
//! `p(95)<2000`, `rate<0.1`, `count>=100`, `avg<=250`. Expressions are parsed
//! when the run is configured — a malformed expression is a configuration
//! error, never a run-time result. Evaluation is a pure function of a metric
//! [`Snapshot`], so evaluating the same snapshot twice yields identical
//! outcomes.

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::metrics::{MetricSnapshot, Snapshot, quantile};

/// A declared threshold: a metric name and the expression to hold over it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Threshold {
    pub metric: String,
    pub expression: String,
}

impl Threshold {
    pub fn new(metric: impl Into<String>, expression: impl Into<String>) -> Self {
        Self {
            metric: metric.into(),
            expression: expression.into(),
        }
    }
}

/// Pass/fail verdict for one threshold at one evaluation instant.
///
/// `observed` is the aggregated value the bound was compared against; it is
/// `None` when the metric had no usable data, in which case `reason` says why
/// the threshold was reported as failed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ThresholdOutcome {
    pub metric: String,
    pub expression: String,
    pub passed: bool,
    pub observed: Option<f64>,
    pub reason: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum Source {
    Rate,
    Count,
    Avg,
    Min,
    Max,
    Med,
    /// Percentile in percent, e.g. `Percentile(95.0)` for `p(95)`.
    Percentile(f64),
}

impl Source {
    fn keyword(&self) -> String {
        match self {
            Source::Rate => "rate".into(),
            Source::Count => "count".into(),
            Source::Avg => "avg".into(),
            Source::Min => "min".into(),
            Source::Max => "max".into(),
            Source::Med => "med".into(),
            Source::Percentile(p) => format!("p({p})"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum Cmp {
    Lt,
    Le,
    Gt,
    Ge,
}

impl Cmp {
    fn holds(self, observed: f64, bound: f64) -> bool {
        match self {
            Cmp::Lt => observed < bound,
            Cmp::Le => observed <= bound,
            Cmp::Gt => observed > bound,
            Cmp::Ge => observed >= bound,
        }
    }
}

/// A threshold parsed into its comparable parts.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Compiled {
    pub metric: String,
    pub expression: String,
    source: Source,
    cmp: Cmp,
    bound: f64,
}

impl Compiled {
    pub fn parse(decl: &Threshold) -> Result<Self, Error> {
        let fail = |reason: &str| Error::InvalidThreshold {
            metric: decl.metric.clone(),
            expression: decl.expression.clone(),
            reason: reason.to_owned(),
        };

        let expr = decl.expression.trim();
        let op_at = expr
            .find(['<', '>'])
            .ok_or_else(|| fail("missing comparator"))?;
        let rest = &expr[op_at..];
        let (cmp, op_len) = if rest.starts_with("<=") {
            (Cmp::Le, 2)
        } else if rest.starts_with(">=") {
            (Cmp::Ge, 2)
        } else if rest.starts_with('<') {
            (Cmp::Lt, 1)
        } else {
            (Cmp::Gt, 1)
        };

        let lhs = expr[..op_at].trim();
        let rhs = expr[op_at + op_len..].trim();

        let source = match lhs {
            "rate" => Source::Rate,
            "count" => Source::Count,
            "avg" => Source::Avg,
            "min" => Source::Min,
            "max" => Source::Max,
            "med" => Source::Med,
            _ => {
                let inner = lhs
                    .strip_prefix("p(")
                    .and_then(|s| s.strip_suffix(')'))
                    .ok_or_else(|| fail("unknown aggregation selector"))?;
                let p: f64 = inner
                    .trim()
                    .parse()
                    .map_err(|_| fail("percentile is not a number"))?;
                if !(p > 0.0 && p <= 100.0) {
                    return Err(fail("percentile must be in (0, 100]"));
                }
                Source::Percentile(p)
            }
        };

        let bound: f64 = rhs.parse().map_err(|_| fail("bound is not a number"))?;
        if !bound.is_finite() {
            return Err(fail("bound must be finite"));
        }

        Ok(Self {
            metric: decl.metric.clone(),
            expression: decl.expression.clone(),
            source,
            cmp,
            bound,
        })
    }

    /// The aggregated value this threshold compares, or the reason there is
    /// none.
    fn observe(&self, snapshot: &Snapshot) -> Result<f64, String> {
        let metric = snapshot
            .get(&self.metric)
            .ok_or_else(|| format!("metric `{}` not present in registry", self.metric))?;
        match (self.source, metric) {
            (Source::Rate, MetricSnapshot::Rate { passes, total }) => {
                if *total == 0 {
                    Err("no observations recorded".into())
                } else {
                    Ok(*passes as f64 / *total as f64)
                }
            }
            (Source::Count, MetricSnapshot::Counter { count }) => Ok(*count as f64),
            (
                Source::Avg | Source::Min | Source::Max | Source::Med | Source::Percentile(_),
                MetricSnapshot::Trend { samples },
            ) => {
                if samples.is_empty() {
                    return Err("no samples recorded".into());
                }
                let value = match self.source {
                    Source::Avg => samples.iter().sum::<f64>() / samples.len() as f64,
                    Source::Min => samples[0],
                    Source::Max => samples[samples.len() - 1],
                    Source::Med => quantile(samples, 0.5).unwrap_or(f64::NAN),
                    Source::Percentile(p) => quantile(samples, p / 100.0).unwrap_or(f64::NAN),
                    _ => unreachable!(),
                };
                Ok(value)
            }
            (source, metric) => Err(format!(
                "`{}` is not applicable to a {:?} metric",
                source.keyword(),
                metric.kind()
            )),
        }
    }

    pub fn evaluate(&self, snapshot: &Snapshot) -> ThresholdOutcome {
        match self.observe(snapshot) {
            Ok(observed) => ThresholdOutcome {
                metric: self.metric.clone(),
                expression: self.expression.clone(),
                passed: self.cmp.holds(observed, self.bound),
                observed: Some(observed),
                reason: None,
            },
            Err(reason) => ThresholdOutcome {
                metric: self.metric.clone(),
                expression: self.expression.clone(),
                passed: false,
                observed: None,
                reason: Some(reason),
            },
        }
    }
}

/// Parse every declared threshold, failing fast on the first bad expression.
pub(crate) fn compile(decls: &[Threshold]) -> Result<Vec<Compiled>, Error> {
    decls.iter().map(Compiled::parse).collect()
}

/// Evaluate each threshold independently against one snapshot.
pub(crate) fn evaluate_all(compiled: &[Compiled], snapshot: &Snapshot) -> Vec<ThresholdOutcome> {
    compiled.iter().map(|t| t.evaluate(snapshot)).collect()
}
