//! Structured error types for trellis.
//!
//! Each concern gets its own pattern-matchable enum instead of a generic
//! `anyhow::Error`:
//!
//! - [`StoreError`] - typed access to a [`Store`](crate::Store) failed
//! - [`ConfigError`] - a component was wired up incorrectly (fatal, immediate)
//! - [`SchedulerError`] - one or more jobs failed during a run
//! - [`CodecError`] - a state token could not be produced or read back
//! - [`RequestError`] - an action request was malformed
//! - [`TransportError`] - the response stream went away
//! - [`ActionError`] - everything an interaction request can fail with
//!
//! `anyhow` stays internal to job and action bodies. It is wrapped into
//! [`JobFailure`] when a run is aggregated.
//!
//! # The Fail-Fast Rule
//!
//! > **A failed run never produces output.**
//!
//! Page renders return no partial markup and failed actions do not flush.
//! Callers inspect the error class to decide on a status code.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

// =============================================================================
// Store Errors
// =============================================================================

/// Typed access to a store key failed.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The stored value did not match the requested type.
    #[error("cannot decode store key {key:?}: {source}")]
    Decode {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// The value could not be converted to JSON.
    #[error("cannot encode store key {key:?}: {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

// =============================================================================
// Configuration Errors
// =============================================================================

/// A component was configured incorrectly.
///
/// These are raised immediately at registration time and never deferred into
/// the scheduler.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// `render` was called without a template, writer or redirect.
    #[error("render requires a template, a writer or a redirect")]
    MissingRenderer,

    /// `render` was given both a template and a writer.
    #[error("render accepts either a template or a writer, not both")]
    ConflictingRenderer,

    /// A named template was not found by the template builder.
    #[error("template not found: {0}")]
    TemplateNotFound(String),

    /// A component with the same name is already registered.
    #[error("component already registered: {0}")]
    DuplicateComponent(String),

    /// The component has no render descriptor but one is required.
    #[error("component {0} has no render descriptor")]
    NotRenderable(String),
}

// =============================================================================
// Scheduler Errors
// =============================================================================

/// A job that did not complete successfully.
#[derive(Debug, Clone)]
pub struct JobFailure {
    /// Group of the failed job.
    pub group: String,
    /// Optional job name.
    pub name: Option<String>,
    /// The error the job returned (or the panic message).
    pub error: Arc<anyhow::Error>,
}

impl fmt::Display for JobFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{}:{}: {}", self.group, name, self.error),
            None => write!(f, "{}: {}", self.group, self.error),
        }
    }
}

/// Errors produced by [`Scheduler::execute`](crate::Scheduler::execute).
#[derive(Debug, Clone, Error)]
pub enum SchedulerError {
    /// `execute` was already called on this scheduler.
    #[error("scheduler already executed")]
    AlreadyExecuted,

    /// Jobs remained pending but none could ever become ready.
    #[error("scheduler stalled with pending groups {groups:?}")]
    Stalled { groups: Vec<String> },

    /// One or more jobs failed. Unrelated jobs still ran to completion.
    #[error("{} job(s) failed; first: {}", .failures.len(), first_failure(.failures))]
    JobsFailed { failures: Vec<JobFailure> },
}

fn first_failure(failures: &[JobFailure]) -> String {
    failures
        .first()
        .map(|f| f.to_string())
        .unwrap_or_default()
}

impl SchedulerError {
    /// Failures recorded during the run (empty for non-job errors).
    pub fn failures(&self) -> &[JobFailure] {
        match self {
            SchedulerError::JobsFailed { failures } => failures,
            _ => &[],
        }
    }
}

// =============================================================================
// Codec Errors
// =============================================================================

/// A state token could not be produced or decoded.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("state is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("state token is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("state token is not valid percent-encoding: {0}")]
    Percent(String),

    #[error("state storage failed: {0}")]
    Io(#[from] std::io::Error),

    /// The token does not name a stored state (expired or never written).
    #[error("state token not found or expired: {0}")]
    Expired(String),

    /// The token is not in the shape this codec produces.
    #[error("malformed state token: {0}")]
    Malformed(String),

    /// A disposable component was asked to carry real data.
    #[error("disposable state cannot carry data")]
    DisposableData,
}

// =============================================================================
// Request Errors
// =============================================================================

/// An interaction request was malformed. Raised before any handler runs.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("action requests must use POST, got {0}")]
    Method(String),

    #[error("action requests must be form submissions, got content type {0:?}")]
    ContentType(Option<String>),

    #[error("missing {0} form field")]
    MissingField(&'static str),

    #[error("Args must be a JSON array: {0}")]
    InvalidArgs(String),

    #[error("action path must end with /<Component>/<Action>, got {0:?}")]
    Path(String),
}

// =============================================================================
// Transport Errors
// =============================================================================

/// Writing to the response stream failed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The receiving side hung up.
    #[error("response stream closed")]
    Closed,
}

// =============================================================================
// Action Errors
// =============================================================================

/// Coarse classification of [`ActionError`]s, used by transports to pick a
/// status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Malformed request shape. Client error.
    Request,
    /// Route/registration mismatch. A programming error, not user input.
    Registration,
    /// A job or action failed during the run.
    Execution,
    /// The state token was corrupt or expired.
    Codec,
    /// The response stream failed.
    Transport,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorClass::Request => write!(f, "request_error"),
            ErrorClass::Registration => write!(f, "registration_error"),
            ErrorClass::Execution => write!(f, "execution_error"),
            ErrorClass::Codec => write!(f, "codec_error"),
            ErrorClass::Transport => write!(f, "transport_error"),
        }
    }
}

/// Everything an interaction request can fail with.
#[derive(Debug, Error)]
pub enum ActionError {
    #[error(transparent)]
    Request(#[from] RequestError),

    #[error("unknown component: {0}")]
    UnknownComponent(String),

    #[error("component {component} has no action {action}")]
    UnknownAction { component: String, action: String },

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Execute(#[from] SchedulerError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl ActionError {
    /// Classify this error.
    pub fn class(&self) -> ErrorClass {
        match self {
            ActionError::Request(_) => ErrorClass::Request,
            ActionError::UnknownComponent(_) | ActionError::UnknownAction { .. } => {
                ErrorClass::Registration
            }
            ActionError::Codec(_) => ErrorClass::Codec,
            // A broken descriptor is a server fault, not a missing route.
            ActionError::Config(_) | ActionError::Execute(_) => ErrorClass::Execution,
            ActionError::Transport(_) => ErrorClass::Transport,
        }
    }
}

// =============================================================================
// Run Errors
// =============================================================================

/// A component tree failed to run.
#[derive(Debug, Error)]
pub enum RunError {
    /// A constructor configured something invalid; no job was started.
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Execute(#[from] SchedulerError),

    /// The run finished without the render job producing output.
    #[error("component {0} produced no output")]
    NoOutput(String),
}

impl From<RunError> for ActionError {
    fn from(err: RunError) -> Self {
        match err {
            RunError::Config(e) => ActionError::Config(e),
            RunError::Execute(e) => ActionError::Execute(e),
            RunError::NoOutput(name) => ActionError::Config(ConfigError::NotRenderable(name)),
        }
    }
}
