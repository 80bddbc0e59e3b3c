//! Dependency-ordered job scheduler that tolerates work appended mid-run.
//!
//! # Readiness
//!
//! A pending job is **ready** when, for every prerequisite group, no job of
//! that group is pending or running. Readiness is re-evaluated under the
//! scheduler lock after every completion and every append; there is no
//! precomputed topological order. This matters because components discovered
//! while a run is in flight (for example a nested component registered from an
//! async job) append their own init/async/afterAsync jobs, and those must hold
//! back later phases globally:
//!
//! ```text
//! init ──► async ─────────────► afterAsync ──► state ──► render
//!            │                      ▲
//!            └─ registers child ─┐  │ waits for the child's async too
//!                 child init ──► child async
//! ```
//!
//! # Failure Semantics
//!
//! - A job error (or panic) is recorded, never raised mid-run.
//! - Unrelated jobs keep running; there is no cross-branch cancellation.
//! - A job whose prerequisite group recorded a failure is not started. It is
//!   recorded as [`JobOutcome::Skipped`] and poisons its own group in turn.
//! - After the run, any failure makes [`Scheduler::execute`] return
//!   [`SchedulerError::JobsFailed`].

use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use futures::FutureExt;
use tokio::sync::Notify;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::error::{JobFailure, SchedulerError};
use crate::job::{Job, JobMeta, JobOutcome, JobReport};

/// Default number of concurrently running jobs.
pub const DEFAULT_WORKERS: usize = 16;

/// Options for a [`Scheduler`].
#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    /// Maximum number of jobs running at once. Clamped to at least 1.
    pub workers: usize,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
        }
    }
}

/// Rewrite applied to pending and subsequently added jobs.
type Patch = Arc<dyn Fn(Job) -> Option<Job> + Send + Sync>;

#[derive(Default)]
struct Inner {
    pending: Vec<Job>,
    running: HashMap<String, usize>,
    failed_groups: HashSet<String>,
    reports: Vec<JobReport>,
    patch: Option<Patch>,
}

impl Inner {
    fn group_busy(&self, group: &str) -> bool {
        self.running.get(group).copied().unwrap_or(0) > 0
            || self.pending.iter().any(|job| job.group() == group)
    }

    fn is_ready(&self, job: &Job) -> bool {
        job.depends_on().iter().all(|dep| !self.group_busy(dep))
    }

    fn failed_dependency<'a>(&self, job: &'a Job) -> Option<&'a str> {
        job.depends_on()
            .iter()
            .find(|dep| self.failed_groups.contains(dep.as_str()))
            .map(String::as_str)
    }
}

/// Runs jobs in dependency order on a bounded pool of tokio tasks.
///
/// Share it behind an `Arc`: jobs that discover more work call
/// [`Scheduler::add`] while [`Scheduler::execute`] is running.
///
/// # Example
///
/// ```ignore
/// let scheduler = Arc::new(Scheduler::new(SchedulerOptions::default()));
/// scheduler.add(Job::new(groups::INIT, || async { Ok(()) }));
/// scheduler.add(Job::new(groups::ASYNC, || async { Ok(()) }).after([groups::INIT]));
/// scheduler.execute().await?;
/// ```
pub struct Scheduler {
    workers: usize,
    inner: Mutex<Inner>,
    wake: Notify,
    started: AtomicBool,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(SchedulerOptions::default())
    }
}

impl Scheduler {
    /// Create a scheduler.
    pub fn new(options: SchedulerOptions) -> Self {
        Self {
            workers: options.workers.max(1),
            inner: Mutex::new(Inner::default()),
            wake: Notify::new(),
            started: AtomicBool::new(false),
        }
    }

    /// Worker limit of this scheduler.
    pub fn workers(&self) -> usize {
        self.workers
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("scheduler mutex was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Append a job. Legal before and during [`execute`](Self::execute).
    pub fn add(&self, job: Job) {
        {
            let mut inner = self.lock();
            let job = match &inner.patch {
                Some(patch) => match patch(job) {
                    Some(job) => job,
                    None => return,
                },
                None => job,
            };
            debug!(group = job.group(), name = ?job.name(), "job added");
            inner.pending.push(job);
        }
        self.wake.notify_one();
    }

    /// Install a rewrite for jobs.
    ///
    /// The rewrite is applied immediately to every pending job and then to
    /// every job added afterwards. Returning `None` drops the job.
    pub fn patch<F>(&self, patch: F)
    where
        F: Fn(Job) -> Option<Job> + Send + Sync + 'static,
    {
        let patch: Patch = Arc::new(patch);
        {
            let mut inner = self.lock();
            let pending = std::mem::take(&mut inner.pending);
            inner.pending = pending.into_iter().filter_map(|job| patch(job)).collect();
            inner.patch = Some(patch);
        }
        self.wake.notify_one();
    }

    /// Number of jobs not yet started.
    pub fn pending_len(&self) -> usize {
        self.lock().pending.len()
    }

    /// Groups of all jobs not yet started, in insertion order.
    pub fn pending_groups(&self) -> Vec<String> {
        self.lock()
            .pending
            .iter()
            .map(|job| job.group().to_string())
            .collect()
    }

    /// Reports of every job that has a recorded result.
    pub fn reports(&self) -> Vec<JobReport> {
        self.lock().reports.clone()
    }

    /// Returns true once [`execute`](Self::execute) has been called.
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    /// Move ready jobs out of the pending set, skipping those whose
    /// prerequisites failed. Runs until a scan makes no more progress.
    fn take_ready(&self, capacity: usize) -> Vec<(JobMeta, Option<crate::job::JobAction>)> {
        let mut guard = self.lock();
        let inner = &mut *guard;
        let mut taken = Vec::new();

        loop {
            let mut progressed = false;
            let mut index = 0;
            while index < inner.pending.len() {
                if !inner.is_ready(&inner.pending[index]) {
                    index += 1;
                    continue;
                }

                let failed = inner
                    .failed_dependency(&inner.pending[index])
                    .map(str::to_string);
                if let Some(dep) = failed {
                    let reason = format!("prerequisite group {} failed", dep);
                    let job = inner.pending.remove(index);
                    debug!(group = job.group(), name = ?job.name(), %reason, "job skipped");
                    inner.failed_groups.insert(job.group().to_string());
                    let (meta, _) = job.into_parts();
                    inner.reports.push(JobReport {
                        group: meta.group,
                        name: meta.name,
                        outcome: JobOutcome::Skipped { reason },
                        started: None,
                        finished: Instant::now(),
                    });
                    progressed = true;
                    continue;
                }

                if taken.len() >= capacity {
                    index += 1;
                    continue;
                }

                let job = inner.pending.remove(index);
                *inner.running.entry(job.group().to_string()).or_insert(0) += 1;
                taken.push(job.into_parts());
                progressed = true;
            }

            if !progressed {
                break;
            }
        }

        taken
    }

    fn complete(&self, meta: JobMeta, started: Instant, result: anyhow::Result<()>) {
        let mut inner = self.lock();
        if let Some(count) = inner.running.get_mut(&meta.group) {
            *count = count.saturating_sub(1);
        }

        let outcome = match result {
            Ok(()) => {
                debug!(group = %meta.group, name = ?meta.name, "job succeeded");
                JobOutcome::Succeeded
            }
            Err(error) => {
                warn!(group = %meta.group, name = ?meta.name, error = %error, "job failed");
                inner.failed_groups.insert(meta.group.clone());
                JobOutcome::Failed(Arc::new(error))
            }
        };

        inner.reports.push(JobReport {
            group: meta.group,
            name: meta.name,
            outcome,
            started: Some(started),
            finished: Instant::now(),
        });
    }

    /// Record every remaining pending job as skipped; returns their groups.
    fn abandon_pending(&self) -> Vec<String> {
        let mut inner = self.lock();
        let pending = std::mem::take(&mut inner.pending);
        let mut groups = Vec::new();
        for job in pending {
            let (meta, _) = job.into_parts();
            if !groups.contains(&meta.group) {
                groups.push(meta.group.clone());
            }
            inner.reports.push(JobReport {
                group: meta.group,
                name: meta.name,
                outcome: JobOutcome::Skipped {
                    reason: "scheduler stalled".to_string(),
                },
                started: None,
                finished: Instant::now(),
            });
        }
        groups
    }

    /// Run jobs until none is pending or running.
    ///
    /// May be called once per scheduler. Jobs added while this runs are
    /// picked up as soon as they become ready.
    pub async fn execute(&self) -> Result<(), SchedulerError> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(SchedulerError::AlreadyExecuted);
        }

        let run_started = Instant::now();
        let mut tasks: JoinSet<(JobMeta, Instant, anyhow::Result<()>)> = JoinSet::new();
        let mut stalled = None;

        loop {
            let capacity = self.workers.saturating_sub(tasks.len());
            for (meta, action) in self.take_ready(capacity) {
                debug!(group = %meta.group, name = ?meta.name, "job started");
                tasks.spawn(async move {
                    let started = Instant::now();
                    let result = match action {
                        None => Ok(()),
                        Some(action) => match AssertUnwindSafe(action()).catch_unwind().await {
                            Ok(result) => result,
                            Err(panic) => {
                                Err(anyhow::anyhow!("job panicked: {}", panic_message(&*panic)))
                            }
                        },
                    };
                    (meta, started, result)
                });
            }

            if tasks.is_empty() {
                if self.pending_len() > 0 {
                    let groups = self.abandon_pending();
                    warn!(groups = ?groups, "scheduler stalled: pending jobs can never become ready");
                    stalled = Some(groups);
                }
                break;
            }

            tokio::select! {
                joined = tasks.join_next() => {
                    match joined {
                        Some(Ok((meta, started, result))) => self.complete(meta, started, result),
                        // Panics are caught inside the task; a join error here
                        // means the runtime is shutting down.
                        Some(Err(join_error)) => {
                            warn!(error = %join_error, "job task aborted");
                        }
                        None => {}
                    }
                }
                _ = self.wake.notified() => {}
            }
        }

        let reports = self.reports();
        debug!(
            jobs = reports.len(),
            elapsed_ms = run_started.elapsed().as_millis() as u64,
            "scheduler run finished"
        );

        if let Some(groups) = stalled {
            return Err(SchedulerError::Stalled { groups });
        }

        let failures: Vec<JobFailure> = reports
            .into_iter()
            .filter_map(|report| match report.outcome {
                JobOutcome::Failed(error) => Some(JobFailure {
                    group: report.group,
                    name: report.name,
                    error,
                }),
                _ => None,
            })
            .collect();

        if failures.is_empty() {
            Ok(())
        } else {
            Err(SchedulerError::JobsFailed { failures })
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("Scheduler")
            .field("workers", &self.workers)
            .field("pending", &inner.pending.len())
            .field("reports", &inner.reports.len())
            .finish()
    }
}
