//! The metric registry shared by every virtual user.
//!
//! A [`Registry`] holds named accumulators of three kinds: counters, rates and
//! trends. Workers write through cheap cloneable handles ([`Counter`],
//! [`Rate`], [`Trend`]) that are bound once at spawn time, so the hot path is
//! an atomic increment (counters, rates) or a short mutex-guarded push
//! (trends) — no lock is ever held across an HTTP call.
//!
//! [`Registry::snapshot`] copies the current accumulator state without
//! stopping writers; all aggregates are commutative, so the result does not
//! depend on how concurrent writes interleave with the copy.
//!
//! Trends retain every sample exactly. At the engine's target scale (tens of
//! thousands of observations) this is a few hundred kilobytes per trend and
//! keeps percentile queries exact; a bounded sketch would only pay off well
//! beyond that.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Names of the metrics the worker loop records for every iteration.
pub mod names {
    pub const HTTP_REQS: &str = "http_reqs";
    pub const HTTP_REQ_DURATION: &str = "http_req_duration";
    pub const HTTP_REQ_FAILED: &str = "http_req_failed";
    pub const CHECKS: &str = "checks";
    pub const ERRORS: &str = "errors";
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MetricKind {
    /// Monotonically increasing integer.
    Counter,
    /// Fraction of boolean-true observations over all observations.
    Rate,
    /// Multiset of numeric samples supporting percentile queries.
    Trend,
}

#[derive(Debug, Default)]
struct RateCell {
    // `total` is bumped before `passes` so a concurrent snapshot can only
    // under-count passes, never report a rate above 1.
    passes: AtomicU64,
    total: AtomicU64,
}

#[derive(Debug)]
enum Cell {
    Counter(Arc<AtomicU64>),
    Rate(Arc<RateCell>),
    Trend(Arc<Mutex<Vec<f64>>>),
}

impl Cell {
    fn kind(&self) -> MetricKind {
        match self {
            Cell::Counter(_) => MetricKind::Counter,
            Cell::Rate(_) => MetricKind::Rate,
            Cell::Trend(_) => MetricKind::Trend,
        }
    }
}

/// Write handle for a counter metric.
#[derive(Clone, Debug)]
pub struct Counter(Arc<AtomicU64>);

impl Counter {
    pub fn add(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }
}

/// Write handle for a rate metric.
#[derive(Clone, Debug)]
pub struct Rate(Arc<RateCell>);

impl Rate {
    pub fn observe(&self, passed: bool) {
        self.0.total.fetch_add(1, Ordering::Relaxed);
        if passed {
            self.0.passes.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Write handle for a trend metric. Samples are unitless from the registry's
/// point of view; the worker loop records latencies in milliseconds.
#[derive(Clone, Debug)]
pub struct Trend(Arc<Mutex<Vec<f64>>>);

impl Trend {
    pub fn record(&self, value: f64) {
        lock_recovering(&self.0).push(value);
    }
}

// A poisoned metric mutex only means some writer panicked mid-push; the data
// is still a valid Vec, so recover the guard instead of propagating the panic.
fn lock_recovering<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Named metric accumulators shared across all workers.
///
/// Metrics are created on first use (or via [`Registry::declare`]) and live
/// for the run. Handles to distinct metrics never contend with each other.
#[derive(Debug, Default)]
pub struct Registry {
    cells: RwLock<HashMap<String, Cell>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    fn cell(&self, name: &str, kind: MetricKind) -> Result<Cell, Error> {
        {
            let cells = self
                .cells
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if let Some(cell) = cells.get(name) {
                return Self::checked_clone(name, cell, kind);
            }
        }
        let mut cells = self
            .cells
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        // Another worker may have created it between the two locks.
        if let Some(cell) = cells.get(name) {
            return Self::checked_clone(name, cell, kind);
        }
        let cell = match kind {
            MetricKind::Counter => Cell::Counter(Arc::new(AtomicU64::new(0))),
            MetricKind::Rate => Cell::Rate(Arc::new(RateCell::default())),
            MetricKind::Trend => Cell::Trend(Arc::new(Mutex::new(Vec::new()))),
        };
        let clone = Self::checked_clone(name, &cell, kind)?;
        cells.insert(name.to_owned(), cell);
        Ok(clone)
    }

    fn checked_clone(name: &str, cell: &Cell, kind: MetricKind) -> Result<Cell, Error> {
        if cell.kind() != kind {
            return Err(Error::MetricKindMismatch {
                name: name.to_owned(),
                existing: cell.kind(),
            });
        }
        Ok(match cell {
            Cell::Counter(c) => Cell::Counter(Arc::clone(c)),
            Cell::Rate(c) => Cell::Rate(Arc::clone(c)),
            Cell::Trend(c) => Cell::Trend(Arc::clone(c)),
        })
    }

    /// Get or create a counter, failing if the name is taken by another kind.
    pub fn counter(&self, name: &str) -> Result<Counter, Error> {
        match self.cell(name, MetricKind::Counter)? {
            Cell::Counter(c) => Ok(Counter(c)),
            _ => unreachable!("cell() returned wrong kind"),
        }
    }

    /// Get or create a rate, failing if the name is taken by another kind.
    pub fn rate(&self, name: &str) -> Result<Rate, Error> {
        match self.cell(name, MetricKind::Rate)? {
            Cell::Rate(c) => Ok(Rate(c)),
            _ => unreachable!("cell() returned wrong kind"),
        }
    }

    /// Get or create a trend, failing if the name is taken by another kind.
    pub fn trend(&self, name: &str) -> Result<Trend, Error> {
        match self.cell(name, MetricKind::Trend)? {
            Cell::Trend(c) => Ok(Trend(c)),
            _ => unreachable!("cell() returned wrong kind"),
        }
    }

    /// Register a metric up front so it is present in every snapshot even with
    /// zero observations. Thresholds may only reference registered metrics.
    pub fn declare(&self, name: &str, kind: MetricKind) -> Result<(), Error> {
        self.cell(name, kind).map(|_| ())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.cells
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains_key(name)
    }

    /// Point-in-time copy of all accumulators. Writers are only blocked for
    /// the duration of the copy of the cell they are writing to.
    pub fn snapshot(&self) -> Snapshot {
        let cells = self
            .cells
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut metrics = BTreeMap::new();
        for (name, cell) in cells.iter() {
            let value = match cell {
                Cell::Counter(c) => MetricSnapshot::Counter {
                    count: c.load(Ordering::Relaxed),
                },
                Cell::Rate(c) => {
                    let passes = c.passes.load(Ordering::Relaxed);
                    let total = c.total.load(Ordering::Relaxed).max(passes);
                    MetricSnapshot::Rate { passes, total }
                }
                Cell::Trend(c) => {
                    let mut samples = lock_recovering(c).clone();
                    samples.sort_by(|a, b| a.total_cmp(b));
                    MetricSnapshot::Trend { samples }
                }
            };
            metrics.insert(name.clone(), value);
        }
        Snapshot { metrics }
    }
}

/// Consistent view of the registry at one instant.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub metrics: BTreeMap<String, MetricSnapshot>,
}

impl Snapshot {
    pub fn get(&self, name: &str) -> Option<&MetricSnapshot> {
        self.metrics.get(name)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum MetricSnapshot {
    Counter {
        count: u64,
    },
    Rate {
        passes: u64,
        total: u64,
    },
    /// Samples sorted ascending, ready for quantile queries.
    Trend {
        samples: Vec<f64>,
    },
}

impl MetricSnapshot {
    pub fn kind(&self) -> MetricKind {
        match self {
            MetricSnapshot::Counter { .. } => MetricKind::Counter,
            MetricSnapshot::Rate { .. } => MetricKind::Rate,
            MetricSnapshot::Trend { .. } => MetricKind::Trend,
        }
    }
}

/// Interpolated quantile over a sorted sample set.
///
/// `q` is clamped to `[0, 1]`. The value is interpolated linearly between the
/// two nearest ranks, so `quantile(s, 0) == min`, `quantile(s, 1) == max`, and
/// the result is monotonic in `q`. Returns `None` for an empty sample set —
/// "no data" is a reportable outcome, not a panic.
pub fn quantile(sorted: &[f64], q: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let q = q.clamp(0.0, 1.0);
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    if lo == hi {
        Some(sorted[lo])
    } else {
        let frac = pos - lo as f64;
        Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
    }
}
