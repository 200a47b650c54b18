use std::time::Duration;

use typed_builder::TypedBuilder;

use crate::error::Error;
use crate::executor::Stage;
use crate::metrics::MetricKind;
use crate::threshold::Threshold;

/// Declarative surface of a run: the concurrency schedule, the thresholds to
/// hold, and the per-iteration knobs. Loaded once at setup and immutable for
/// the rest of the run.
#[derive(Clone, Debug, TypedBuilder)]
pub struct RunConfig {
    #[builder(setter(into))]
    pub base_url: String,

    /// Ordered concurrency ramp; processed in declared order with no overlap.
    pub stages: Vec<Stage>,

    #[builder(default)]
    pub thresholds: Vec<Threshold>,

    /// Deadline applied to every request.
    #[builder(default = Duration::from_secs(30))]
    pub request_timeout: Duration,

    /// Pause between iterations of a virtual user, simulating real users.
    #[builder(default = Duration::ZERO)]
    pub think_time: Duration,

    /// Reconcile granularity of the VU scheduler.
    #[builder(default = Duration::from_millis(100))]
    pub tick: Duration,

    /// Drain the run as soon as a threshold is breached mid-run instead of
    /// waiting for the schedule to end.
    #[builder(default)]
    pub abort_on_fail: bool,

    /// Cadence of mid-run threshold evaluation (only used with
    /// `abort_on_fail`).
    #[builder(default = Duration::from_secs(1))]
    pub eval_interval: Duration,

    /// Extra metrics registered up front so thresholds may reference them
    /// even before (or without) any observation.
    #[builder(default)]
    pub custom_metrics: Vec<(String, MetricKind)>,
}

impl RunConfig {
    /// Configuration errors surface here, before any virtual user starts.
    pub fn validate(&self) -> Result<(), Error> {
        if self.stages.is_empty() {
            return Err(Error::EmptyStages);
        }
        for (index, stage) in self.stages.iter().enumerate() {
            if stage.duration.is_zero() {
                return Err(Error::ZeroDurationStage { index });
            }
        }
        if self.tick.is_zero() {
            return Err(Error::ZeroTick);
        }
        Ok(())
    }

    /// Total length of the scheduled execution window.
    pub fn total_duration(&self) -> Duration {
        self.stages.iter().map(|s| s.duration).sum()
    }

    /// Highest concurrency the schedule will request.
    pub fn peak_target(&self) -> u64 {
        self.stages.iter().map(|s| s.target).max().unwrap_or(0)
    }
}
