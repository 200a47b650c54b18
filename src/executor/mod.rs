//! Executor — virtual-user scheduling over a staged ramp.
//!
//! The engine is open-loop: the number of concurrently running virtual users
//! (VUs) is dictated purely by the declared [`Stage`] schedule, never by
//! feedback from the target. The [`RampingVusExecutor`] separates **target
//! computation** from **reconciliation**:
//!
//! 1. [`ramping::target_at`] turns the stage list and an elapsed time into a
//!    target VU count by linear interpolation: within a stage the target moves
//!    linearly from the previous stage's ending target to the stage's own
//!    target, so a plateau is simply a stage whose target equals its
//!    predecessor's. At or past the end of the last stage the target is 0.
//! 2. A reconcile loop wakes every `tick` and brings the live VU set to the
//!    target: spawn the missing VUs, or flag the oldest ones for retirement.
//!    Spawn and retire in the same tick net out to a single delta.
//!
//! Retirement is cooperative. A flagged VU finishes its current iteration —
//! an in-flight HTTP request is never cancelled — and then stops; the drain
//! phase simply flags every VU and waits for all of them to join.
//!
//! # Tuning
//!
//! - `tick`: reconcile granularity. Smaller ticks give smoother ramps at the
//!   cost of more wakeups; 100ms is a sensible default.
//! - Worker count is not a knob here: VUs are spawned and retired to match
//!   `target_at` exactly, bounded only by the declared stage targets.

pub mod ramping;

pub use ramping::{RampingVusExecutor, Stage};
