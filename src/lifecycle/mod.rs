//! Post lifecycle: the state machine from creation to a terminal outcome.
//!
//! `DRAFT` and `FAILED` posts can be edited, scheduled or published now.
//! `SCHEDULED` posts can be rescheduled or cancelled back to `DRAFT`, and
//! publish when their job fires. `PUBLISHED` is final.

pub mod attempt;
pub mod coordinator;

pub use coordinator::{Coordinator, LifecycleSettings, RehydrationReport};
