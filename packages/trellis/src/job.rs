//! Jobs: the unit of work a [`Scheduler`](crate::Scheduler) runs.
//!
//! A job is tagged with a **group** (a lifecycle phase such as `init` or
//! `async`), an optional name for diagnostics, the set of groups it must wait
//! for, and a fallible async action.
//!
//! ```ignore
//! use trellis::{groups, Job};
//!
//! let job = Job::new(groups::ASYNC, || async move {
//!     load_profile().await?;
//!     Ok(())
//! })
//! .named("profile")
//! .after([groups::INIT]);
//! ```

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use futures::future::BoxFuture;

/// Well-known group names.
///
/// Page lifecycle: `init → async → afterAsync → state → render`.
/// Action replay: `init → populate → action → (state) → flush`.
pub mod groups {
    pub const INIT: &str = "init";
    pub const ASYNC: &str = "async";
    pub const AFTER_ASYNC: &str = "afterAsync";
    pub const STATE: &str = "state";
    pub const RENDER: &str = "render";
    pub const POPULATE: &str = "populate";
    pub const ACTION: &str = "action";
    pub const FLUSH: &str = "flush";
}

/// Type-erased job action.
pub(crate) type JobAction = Box<dyn FnOnce() -> BoxFuture<'static, anyhow::Result<()>> + Send>;

/// A unit of work belonging to a group.
pub struct Job {
    group: String,
    name: Option<String>,
    depends_on: Vec<String>,
    action: Option<JobAction>,
}

impl Job {
    /// Create a job in `group` running `action`.
    pub fn new<F, Fut>(group: impl Into<String>, action: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self {
            group: group.into(),
            name: None,
            depends_on: Vec::new(),
            action: Some(Box::new(move || Box::pin(action()))),
        }
    }

    /// Create a placeholder job with no action.
    ///
    /// A placeholder makes its group participate in dependency resolution
    /// before real work for that group is queued: dependents of the group wait
    /// until the placeholder (and every other job of the group) has a result.
    pub fn empty(group: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            name: None,
            depends_on: Vec::new(),
            action: None,
        }
    }

    /// Set a diagnostic name.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Add prerequisite groups.
    pub fn after<I, S>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for group in groups {
            let group = group.into();
            if !self.depends_on.contains(&group) {
                self.depends_on.push(group);
            }
        }
        self
    }

    /// Replace the prerequisite groups.
    pub fn with_dependencies<I, S>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on.clear();
        self.after(groups)
    }

    /// The group this job belongs to.
    pub fn group(&self) -> &str {
        &self.group
    }

    /// The diagnostic name, if any.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Groups that must be complete before this job starts.
    pub fn depends_on(&self) -> &[String] {
        &self.depends_on
    }

    /// Returns true for placeholder jobs.
    pub fn is_empty(&self) -> bool {
        self.action.is_none()
    }

    pub(crate) fn into_parts(self) -> (JobMeta, Option<JobAction>) {
        (
            JobMeta {
                group: self.group,
                name: self.name,
            },
            self.action,
        )
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("group", &self.group)
            .field("name", &self.name)
            .field("depends_on", &self.depends_on)
            .field("empty", &self.action.is_none())
            .finish()
    }
}

/// Group and name of a job, kept after its action was consumed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct JobMeta {
    pub(crate) group: String,
    pub(crate) name: Option<String>,
}

/// What happened to a job.
#[derive(Debug, Clone)]
pub enum JobOutcome {
    /// The action returned `Ok(())` (or the job was a placeholder).
    Succeeded,
    /// The action returned an error or panicked.
    Failed(Arc<anyhow::Error>),
    /// The job never started: a prerequisite group failed or the run stalled.
    Skipped { reason: String },
}

impl JobOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, JobOutcome::Succeeded)
    }
}

/// The recorded result of one job.
#[derive(Debug, Clone)]
pub struct JobReport {
    pub group: String,
    pub name: Option<String>,
    pub outcome: JobOutcome,
    /// When the action started. `None` for skipped jobs.
    pub started: Option<Instant>,
    pub finished: Instant,
}
