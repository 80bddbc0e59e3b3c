//! The interaction protocol: re-invoke one component action out of band.
//!
//! A client posts the component's state token and JSON arguments to
//! `<prefix>/<Component>/<Action>`. The server rebuilds only that component,
//! replays its `init` work, overlays the submitted state, runs exactly one
//! action handler and streams rendered fragments back.
//!
//! # Phases
//!
//! ```text
//! Idle ─► Received ─► Replaying ─► Executing ─► Flushing ─┬─► Completed
//!                                                          └─► Redirected
//! ```
//!
//! # Replay
//!
//! The target constructor runs against a fresh [`Core`] exactly as it would
//! on a page, then the scheduler is patched:
//!
//! | group | on replay |
//! |-------|-----------|
//! | `init` | kept |
//! | `async`, `afterAsync`, `render` | dropped |
//! | `state` | kept, now after `action` |
//! | `populate` | added after `init`: overlays submitted state |
//! | `action` | added after `populate`: runs the handler |
//! | `flush` | added after `action` and `state`: writes the final fragment |
//!
//! # Wire Format
//!
//! Each fragment is markup with newlines removed followed by
//! [`FRAGMENT_TERMINATOR`]. A redirect is [`REDIRECT_PREFIX`], the location
//! and the terminator; nothing is written after it.
//!
//! ```ignore
//! let prepared = Interaction::prepare(&registry, request, InteractionOptions::default())?;
//! let outcome = prepared.run(Arc::new(writer)).await?;
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::core::Core;
use crate::error::{
    ActionError, ConfigError, RequestError, RunError, SchedulerError, TransportError,
};
use crate::job::{groups, Job};
use crate::registry::Registry;
use crate::render::Rendered;
use crate::scheduler::{Scheduler, SchedulerOptions, DEFAULT_WORKERS};
use crate::store::Store;
use crate::transport::ResponseWriter;

/// Terminates every streamed fragment.
pub const FRAGMENT_TERMINATOR: &str = "ssa:end";

/// Prefix of a streamed redirect command.
pub const REDIRECT_PREFIX: &str = "ssa:redirect=";

/// Form field carrying the state token.
pub const STATE_FIELD: &str = "State";

/// Form field carrying the JSON argument array.
pub const ARGS_FIELD: &str = "Args";

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

// =============================================================================
// Request
// =============================================================================

/// Transport-neutral view of an incoming action request.
///
/// Adapters decode the form body (urlencoded or multipart) into `form`.
#[derive(Debug, Clone, Default)]
pub struct ActionRequest {
    pub method: String,
    pub path: String,
    pub content_type: Option<String>,
    pub form: HashMap<String, String>,
}

impl ActionRequest {
    /// A form POST to `path`.
    pub fn post(path: impl Into<String>) -> Self {
        Self {
            method: "POST".to_string(),
            path: path.into(),
            content_type: Some("application/x-www-form-urlencoded".to_string()),
            form: HashMap::new(),
        }
    }

    /// Set a form field.
    pub fn field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.form.insert(name.into(), value.into());
        self
    }
}

fn is_form_content_type(content_type: &str) -> bool {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    essence == "application/x-www-form-urlencoded" || essence == "multipart/form-data"
}

/// Positional JSON arguments of an action call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Args(Vec<Value>);

impl Args {
    pub fn new(values: Vec<Value>) -> Self {
        Self(values)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Raw argument at `index`.
    pub fn raw(&self, index: usize) -> Option<&Value> {
        self.0.get(index)
    }

    /// Decode the argument at `index`.
    pub fn get<T: DeserializeOwned>(&self, index: usize) -> anyhow::Result<T> {
        let value = self
            .0
            .get(index)
            .ok_or_else(|| anyhow::anyhow!("missing argument {}", index))?;
        serde_json::from_value(value.clone())
            .map_err(|e| anyhow::anyhow!("argument {}: {}", index, e))
    }

    pub fn values(&self) -> &[Value] {
        &self.0
    }
}

/// A validated action request.
#[derive(Debug, Clone)]
pub struct ActionEnvelope {
    pub component: String,
    pub action: String,
    pub state: String,
    pub args: Args,
}

impl ActionEnvelope {
    /// Validate the request shape. Nothing runs if this fails.
    pub fn parse(request: &ActionRequest) -> Result<Self, RequestError> {
        if !request.method.eq_ignore_ascii_case("POST") {
            return Err(RequestError::Method(request.method.clone()));
        }

        match request.content_type.as_deref() {
            Some(content_type) if is_form_content_type(content_type) => {}
            other => return Err(RequestError::ContentType(other.map(str::to_string))),
        }

        let state = request
            .form
            .get(STATE_FIELD)
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .ok_or(RequestError::MissingField(STATE_FIELD))?
            .to_string();

        let raw_args = request
            .form
            .get(ARGS_FIELD)
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .ok_or(RequestError::MissingField(ARGS_FIELD))?;
        let args = match serde_json::from_str::<Value>(raw_args) {
            Ok(Value::Array(values)) => Args(values),
            Ok(other) => {
                return Err(RequestError::InvalidArgs(format!(
                    "expected an array, got {}",
                    other
                )))
            }
            Err(e) => return Err(RequestError::InvalidArgs(e.to_string())),
        };

        let mut segments = request.path.rsplit('/').filter(|s| !s.is_empty());
        let (action, component) = match (segments.next(), segments.next()) {
            (Some(action), Some(component)) => (action.to_string(), component.to_string()),
            _ => return Err(RequestError::Path(request.path.clone())),
        };

        Ok(Self {
            component,
            action,
            state,
            args,
        })
    }
}

// =============================================================================
// Phases
// =============================================================================

/// Where an interaction request is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionPhase {
    Idle,
    Received,
    Replaying,
    Executing,
    Flushing,
    Redirected,
    Completed,
}

impl fmt::Display for ActionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ActionPhase::Idle => "idle",
            ActionPhase::Received => "received",
            ActionPhase::Replaying => "replaying",
            ActionPhase::Executing => "executing",
            ActionPhase::Flushing => "flushing",
            ActionPhase::Redirected => "redirected",
            ActionPhase::Completed => "completed",
        };
        f.write_str(name)
    }
}

// =============================================================================
// Fragment Stream
// =============================================================================

#[derive(Default)]
struct StreamState {
    redirected: bool,
    fragments: usize,
    /// Component state at the last flush, used to skip a redundant final one.
    last_flushed: Option<Value>,
}

/// Shared per-request output: phase tracking and the response writer.
struct FragmentStream {
    writer: Arc<dyn ResponseWriter>,
    target: String,
    phase: Mutex<ActionPhase>,
    state: tokio::sync::Mutex<StreamState>,
}

impl FragmentStream {
    fn new(writer: Arc<dyn ResponseWriter>, target: String, phase: ActionPhase) -> Self {
        Self {
            writer,
            target,
            phase: Mutex::new(phase),
            state: tokio::sync::Mutex::new(StreamState::default()),
        }
    }

    fn advance(&self, next: ActionPhase) {
        let mut phase = lock(&self.phase);
        if *phase == ActionPhase::Redirected {
            return;
        }
        debug!(component = %self.target, from = %*phase, to = %next, "action phase");
        *phase = next;
    }

    fn phase(&self) -> ActionPhase {
        *lock(&self.phase)
    }

    async fn flush(&self, core: &Core, is_final: bool) -> anyhow::Result<()> {
        let mut stream = self.state.lock().await;
        if stream.redirected {
            return Ok(());
        }

        let current = core.state().export();
        if is_final && stream.last_flushed.as_ref() == Some(&current) {
            debug!(component = %self.target, "final flush unchanged, skipped");
            return Ok(());
        }

        let render = core
            .render_descriptor()
            .ok_or_else(|| ConfigError::NotRenderable(self.target.clone()))?;
        if render.is_redirect() {
            if let Rendered::Redirect(redirect) = render.render(&Value::Null)? {
                drop(stream);
                return self.redirect(&redirect.location).await;
            }
        }

        self.advance(ActionPhase::Flushing);
        let snapshot = core.snapshot()?;
        let markup = render.markup(&snapshot)?;

        let mut fragment: Vec<u8> = markup
            .into_iter()
            .filter(|b| *b != b'\n' && *b != b'\r')
            .collect();
        fragment.extend_from_slice(FRAGMENT_TERMINATOR.as_bytes());

        self.writer.write(Bytes::from(fragment)).await?;
        self.writer.flush().await?;

        stream.fragments += 1;
        stream.last_flushed = Some(current);
        debug!(component = %self.target, fragment = stream.fragments, "fragment flushed");
        Ok(())
    }

    async fn redirect(&self, location: &str) -> anyhow::Result<()> {
        let mut stream = self.state.lock().await;
        if stream.redirected {
            return Ok(());
        }

        let command = format!("{}{}{}", REDIRECT_PREFIX, location, FRAGMENT_TERMINATOR);
        self.writer.write(Bytes::from(command)).await?;
        self.writer.flush().await?;

        stream.redirected = true;
        self.advance(ActionPhase::Redirected);
        debug!(component = %self.target, %location, "action redirected");
        Ok(())
    }
}

// =============================================================================
// Handlers
// =============================================================================

/// Type-erased action handler stored on a [`Core`].
pub type ActionHandler = Arc<dyn Fn(ActionContext) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// What an action handler gets to work with.
#[derive(Clone)]
pub struct ActionContext {
    core: Core,
    args: Args,
    stream: Arc<FragmentStream>,
}

impl ActionContext {
    /// The rebuilt component.
    pub fn core(&self) -> &Core {
        &self.core
    }

    /// The component's state, with the submitted state already overlaid.
    pub fn state(&self) -> &Store {
        self.core.state()
    }

    /// The request context.
    pub fn context(&self) -> &Store {
        self.core.context()
    }

    pub fn args(&self) -> &Args {
        &self.args
    }

    /// Render the component's current state and stream it as a fragment.
    ///
    /// May be called any number of times. A no-op after a redirect.
    pub async fn flush(&self) -> anyhow::Result<()> {
        self.stream.flush(&self.core, false).await
    }

    /// Tell the client to navigate to `location`. Later flushes are no-ops.
    pub async fn redirect(&self, location: &str) -> anyhow::Result<()> {
        self.stream.redirect(location).await
    }

    /// Returns true once a redirect was written.
    pub async fn is_redirected(&self) -> bool {
        self.stream.state.lock().await.redirected
    }
}

// =============================================================================
// Interaction
// =============================================================================

/// What to do when the submitted state token cannot be decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CodecFallback {
    /// Reject the request with a codec-class error.
    #[default]
    Fail,
    /// Continue with the state the constructor and `init` jobs produce.
    DefaultState,
}

/// Options for one interaction request.
#[derive(Debug, Clone)]
pub struct InteractionOptions {
    pub workers: usize,
    pub codec_fallback: CodecFallback,
}

impl Default for InteractionOptions {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            codec_fallback: CodecFallback::Fail,
        }
    }
}

/// Result of a completed interaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionOutcome {
    pub phase: ActionPhase,
    pub fragments: usize,
}

/// Entry point of the interaction protocol.
pub struct Interaction;

impl Interaction {
    /// Validate and rebuild the target component.
    ///
    /// Every request, registration and codec error surfaces here, before any
    /// response byte is written, so transports can still pick a status code.
    pub fn prepare(
        registry: &Registry,
        request: ActionRequest,
        options: InteractionOptions,
    ) -> Result<PreparedAction, ActionError> {
        Self::prepare_with_context(registry, request, Store::new(), options)
    }

    /// [`prepare`](Self::prepare) with a request context store.
    pub fn prepare_with_context(
        registry: &Registry,
        request: ActionRequest,
        context: Store,
        options: InteractionOptions,
    ) -> Result<PreparedAction, ActionError> {
        let envelope = ActionEnvelope::parse(&request)?;
        debug!(
            component = %envelope.component,
            action = %envelope.action,
            from = %ActionPhase::Idle,
            to = %ActionPhase::Received,
            "action phase"
        );

        let component = registry
            .resolve(&envelope.component)
            .ok_or_else(|| ActionError::UnknownComponent(envelope.component.clone()))?;

        let scheduler = Arc::new(Scheduler::new(SchedulerOptions {
            workers: options.workers,
        }));
        let core = Core::root(&component, context, scheduler.clone());
        core.check()?;

        let handler = core.action_handler(&envelope.action).ok_or_else(|| {
            ActionError::UnknownAction {
                component: envelope.component.clone(),
                action: envelope.action.clone(),
            }
        })?;

        let codec = core.state_codec();
        let submitted = match codec.unmarshal(&envelope.state) {
            Ok(state) => state,
            Err(e) if options.codec_fallback == CodecFallback::DefaultState => {
                warn!(
                    component = %envelope.component,
                    codec = codec.name(),
                    error = %e,
                    "state token unreadable, continuing with default state"
                );
                Value::Object(Default::default())
            }
            Err(e) => return Err(e.into()),
        };

        scheduler.patch(|job| match job.group() {
            groups::INIT | groups::POPULATE | groups::ACTION | groups::FLUSH => Some(job),
            groups::STATE => Some(job.with_dependencies([groups::ACTION])),
            _ => None,
        });

        Ok(PreparedAction {
            envelope,
            core,
            handler,
            submitted,
        })
    }
}

/// A rebuilt component ready to run its action.
pub struct PreparedAction {
    envelope: ActionEnvelope,
    core: Core,
    handler: ActionHandler,
    submitted: Value,
}

impl PreparedAction {
    pub fn envelope(&self) -> &ActionEnvelope {
        &self.envelope
    }

    pub fn core(&self) -> &Core {
        &self.core
    }

    /// Replay, run the action and stream fragments to `writer`.
    pub async fn run(self, writer: Arc<dyn ResponseWriter>) -> Result<ActionOutcome, ActionError> {
        let PreparedAction {
            envelope,
            core,
            handler,
            submitted,
        } = self;

        let stream = Arc::new(FragmentStream::new(
            writer,
            envelope.component.clone(),
            ActionPhase::Received,
        ));
        stream.advance(ActionPhase::Replaying);

        let scheduler = core.scheduler().clone();

        let populate_core = core.clone();
        scheduler.add(
            Job::new(groups::POPULATE, move || async move {
                populate_core.overlay(submitted);
                // Flushes inside the handler render children too.
                populate_core.link_children();
                Ok(())
            })
            .named(envelope.component.clone())
            .after([groups::INIT]),
        );

        let ctx = ActionContext {
            core: core.clone(),
            args: envelope.args.clone(),
            stream: stream.clone(),
        };
        let action_stream = stream.clone();
        scheduler.add(
            Job::new(groups::ACTION, move || {
                action_stream.advance(ActionPhase::Executing);
                handler(ctx)
            })
            .named(envelope.action.clone())
            .after([groups::POPULATE]),
        );

        let flush_core = core.clone();
        let flush_stream = stream.clone();
        scheduler.add(
            Job::new(groups::FLUSH, move || async move {
                flush_stream.flush(&flush_core, true).await
            })
            .named(envelope.component.clone())
            .after([groups::ACTION, groups::STATE]),
        );

        if let Err(err) = core.execute().await {
            warn!(
                component = %envelope.component,
                action = %envelope.action,
                error = %err,
                "action failed"
            );
            return Err(transport_failure(&err).unwrap_or_else(|| err.into()));
        }

        if stream.phase() != ActionPhase::Redirected {
            stream.advance(ActionPhase::Completed);
        }
        let fragments = stream.state.lock().await.fragments;
        Ok(ActionOutcome {
            phase: stream.phase(),
            fragments,
        })
    }
}

/// Surface a hung-up client as a transport-class error.
fn transport_failure(err: &RunError) -> Option<ActionError> {
    let RunError::Execute(SchedulerError::JobsFailed { failures }) = err else {
        return None;
    };
    failures.iter().find_map(|failure| {
        failure
            .error
            .downcast_ref::<TransportError>()
            .cloned()
            .map(ActionError::Transport)
    })
}

/// Prepare and run in one call.
pub async fn dispatch(
    registry: &Registry,
    request: ActionRequest,
    writer: Arc<dyn ResponseWriter>,
    options: InteractionOptions,
) -> Result<ActionOutcome, ActionError> {
    Interaction::prepare(registry, request, options)?
        .run(writer)
        .await
}
