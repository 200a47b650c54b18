use crate::metrics::MetricKind;

/// Errors that can terminate a run before it finishes normally.
///
/// Configuration problems (bad stage lists, unparseable threshold expressions,
/// unknown metric references) are surfaced before any virtual user starts.
/// [`Error::Invariant`] signals a scheduler logic bug and aborts the run;
/// transport failures are *not* represented here — they degrade into metric
/// data inside the worker loop (see [`crate::http::TransportError`]).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("stage list must not be empty")]
    EmptyStages,

    #[error("stage {index} has zero duration")]
    ZeroDurationStage { index: usize },

    #[error("reconcile tick must be positive")]
    ZeroTick,

    #[error("invalid threshold `{expression}` on metric `{metric}`: {reason}")]
    InvalidThreshold {
        metric: String,
        expression: String,
        reason: String,
    },

    #[error("threshold references unknown metric `{0}`")]
    UnknownMetric(String),

    #[error("metric `{name}` is already registered as a {existing:?} metric")]
    MetricKindMismatch { name: String, existing: MetricKind },

    #[error("internal invariant violated: {0}")]
    Invariant(String),

    #[error("report sink failed: {0}")]
    Report(#[source] Box<dyn std::error::Error + Send + Sync>),
}
