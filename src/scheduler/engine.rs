use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::scheduler::Clock;

/// Opaque token identifying one registration of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobHandle(u64);

/// Sent to the coordinator when a job's due-time arrives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FiredJob {
    pub post_id: i64,
    pub fire_at: DateTime<Utc>,
    pub handle: JobHandle,
}

struct LiveJob {
    handle: JobHandle,
    fire_at: DateTime<Utc>,
    task: JoinHandle<()>,
}

type JobMap = HashMap<i64, LiveJob>;

/// One-shot timers keyed by post id.
///
/// At most one live job exists per post. Registering a post that already has a
/// job replaces it under the same lock, so there is never a moment where a
/// concurrent caller sees the post without a job.
pub struct SchedulingEngine {
    clock: Arc<dyn Clock>,
    jobs: Arc<Mutex<JobMap>>,
    next_handle: AtomicU64,
    fired_tx: mpsc::UnboundedSender<FiredJob>,
}

impl SchedulingEngine {
    /// Create an engine and the receiving end for fired jobs.
    pub fn new(clock: Arc<dyn Clock>) -> (Self, mpsc::UnboundedReceiver<FiredJob>) {
        let (fired_tx, fired_rx) = mpsc::unbounded_channel();
        let engine = Self {
            clock,
            jobs: Arc::new(Mutex::new(HashMap::new())),
            next_handle: AtomicU64::new(1),
            fired_tx,
        };
        (engine, fired_rx)
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    fn lock_jobs(jobs: &Mutex<JobMap>) -> MutexGuard<'_, JobMap> {
        // A panic while holding the lock cannot leave the map half-updated.
        jobs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a job for `post_id`, replacing any existing one.
    pub fn schedule(&self, post_id: i64, fire_at: DateTime<Utc>) -> JobHandle {
        let handle = JobHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        let mut jobs = Self::lock_jobs(&self.jobs);

        let task = self.spawn_timer(post_id, fire_at, handle);
        if let Some(previous) = jobs.insert(
            post_id,
            LiveJob {
                handle,
                fire_at,
                task,
            },
        ) {
            previous.task.abort();
            tracing::debug!(
                "Replaced job for post {} (was due {})",
                post_id,
                previous.fire_at
            );
        }

        tracing::debug!("Registered job for post {} at {}", post_id, fire_at);
        handle
    }

    /// Move an existing job to a new time. Same as [`schedule`](Self::schedule);
    /// the replacement happens under one lock.
    pub fn reschedule(&self, post_id: i64, fire_at: DateTime<Utc>) -> JobHandle {
        self.schedule(post_id, fire_at)
    }

    /// Drop the job for `post_id`. Returns whether one was live.
    pub fn cancel(&self, post_id: i64) -> bool {
        let removed = Self::lock_jobs(&self.jobs).remove(&post_id);
        match removed {
            Some(job) => {
                job.task.abort();
                tracing::debug!("Cancelled job for post {}", post_id);
                true
            }
            None => false,
        }
    }

    pub fn is_live(&self, post_id: i64) -> bool {
        Self::lock_jobs(&self.jobs).contains_key(&post_id)
    }

    pub fn handle_of(&self, post_id: i64) -> Option<JobHandle> {
        Self::lock_jobs(&self.jobs).get(&post_id).map(|job| job.handle)
    }

    pub fn fire_at(&self, post_id: i64) -> Option<DateTime<Utc>> {
        Self::lock_jobs(&self.jobs).get(&post_id).map(|job| job.fire_at)
    }

    pub fn live_count(&self) -> usize {
        Self::lock_jobs(&self.jobs).len()
    }

    /// Abort every pending timer. Jobs are rebuilt from the store on the next start.
    pub fn shutdown(&self) {
        let mut jobs = Self::lock_jobs(&self.jobs);
        let count = jobs.len();
        for (_, job) in jobs.drain() {
            job.task.abort();
        }
        tracing::info!("Scheduling engine stopped ({} pending jobs dropped)", count);
    }

    fn spawn_timer(&self, post_id: i64, fire_at: DateTime<Utc>, handle: JobHandle) -> JoinHandle<()> {
        let clock = self.clock.clone();
        let jobs = self.jobs.clone();
        let fired_tx = self.fired_tx.clone();

        tokio::spawn(async move {
            clock.sleep_until(fire_at).await;

            // Only the current registration may fire; a replaced one is stale.
            {
                let mut jobs = Self::lock_jobs(&jobs);
                match jobs.get(&post_id) {
                    Some(job) if job.handle == handle => {
                        jobs.remove(&post_id);
                    }
                    _ => return,
                }
            }

            tracing::debug!("Job for post {} fired", post_id);
            if fired_tx
                .send(FiredJob {
                    post_id,
                    fire_at,
                    handle,
                })
                .is_err()
            {
                tracing::warn!("Fired job for post {} dropped: no dispatcher", post_id);
            }
        })
    }
}

impl Drop for SchedulingEngine {
    fn drop(&mut self) {
        for (_, job) in Self::lock_jobs(&self.jobs).drain() {
            job.task.abort();
        }
    }
}
