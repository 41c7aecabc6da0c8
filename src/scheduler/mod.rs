//! Timer-driven scheduling of post due-times.
//!
//! The engine keeps jobs in memory only. Persisted `scheduled_at` values are
//! the source of truth and are turned back into jobs by
//! [`Coordinator::rehydrate`](crate::lifecycle::Coordinator::rehydrate) at start.

pub mod clock;
pub mod engine;

pub use clock::{Clock, ManualClock, SystemClock};
pub use engine::{FiredJob, JobHandle, SchedulingEngine};
