//! # Trellis
//!
//! A component lifecycle engine for server-rendered UIs: components register
//! staged work, a scheduler runs it with bounded concurrency, the resulting
//! state is rendered once, and a single component can later be rebuilt to run
//! one action and stream fresh markup back.
//!
//! ## Core Concepts
//!
//! - [`Component`] = a named constructor that registers work on a [`Core`]
//! - [`Core`] = the builder for one subtree: its own state, shared context
//! - [`Job`] = one unit of work in a lifecycle group
//! - [`Scheduler`] = runs jobs in group order, accepting new jobs mid-run
//!
//! The key principle: **constructors never do work, they schedule it.**
//! Everything a component needs to load happens in jobs, so nested
//! components discovered at any point are folded into the same run.
//!
//! ## Page Lifecycle
//!
//! ```text
//! Component ctor (sync)
//!     │
//!     ├─► on_init ───────► init
//!     ├─► on_async ──────► async        (after init)
//!     ├─► on_after_async ► afterAsync   (after async, tree-wide)
//!     ├─► component() ───► child ctor, then state (after afterAsync)
//!     └─► render() ──────► render       (after everything, root only)
//! ```
//!
//! ## Interaction Lifecycle
//!
//! ```text
//! POST /<Component>/<Action>  State=<token>  Args=[...]
//!     │
//!     ▼ Interaction::prepare
//! rebuild ─► init ─► populate ─► action ─► state ─► flush
//!                                   │
//!                                   └─► ctx.flush() / ctx.redirect() stream now
//! ```
//!
//! ## Key Invariants
//!
//! 1. **Group order holds** - a job starts only after every job of every
//!    group it depends on has a result, including jobs added mid-run
//! 2. **No partial output** - a failed run renders nothing and flushes nothing
//! 3. **Exactly one handler** - an interaction runs one action, never a fan-out
//! 4. **Isolated state** - a child's state joins its parent only in `state`
//!
//! ## Example
//!
//! ```ignore
//! use trellis::{render_page, Component, Core, Render, SchedulerOptions, Store};
//!
//! fn counter(core: &Core) {
//!     core.on_init(|c| async move {
//!         c.state().set("count", 0);
//!         Ok(())
//!     });
//!     core.action("Increment", |ctx| async move {
//!         let count: i64 = ctx.state().get_as("count")?.unwrap_or_default();
//!         ctx.state().set("count", count + 1);
//!         Ok(())
//!     });
//!     core.render(Render::new().template(counter_template));
//! }
//!
//! let page = Component::new("Counter", counter);
//! let html = render_page(&page, Store::new(), SchedulerOptions::default()).await?;
//! ```

mod action;
mod codec;
mod core;
mod error;
mod job;
mod page;
mod registry;
mod render;
mod scheduler;
mod store;
mod transport;


// Re-export state types
pub use store::{is_marker, Store, MARKER_PREFIX};

// Re-export job and scheduler types
pub use job::{groups, Job, JobOutcome, JobReport};
pub use scheduler::{Scheduler, SchedulerOptions, DEFAULT_WORKERS};

// Re-export component types
pub use crate::core::{Core, COMPONENT_MARKER, STATE_MARKER};
pub use registry::{Component, Registry};

// Re-export render types
pub use page::render_page;
pub use render::{
    Redirect, Render, Rendered, Template, TemplateBuilder, TemplateSet,
    DEFAULT_REDIRECT_STATUS,
};

// Re-export codecs
pub use codec::{
    DisposableCodec, ServerCodec, StateCodec, UniversalCodec, DEFAULT_STATE_TTL,
    DISPOSABLE_TOKEN,
};

// Re-export interaction types
pub use action::{
    dispatch, ActionContext, ActionEnvelope, ActionOutcome, ActionPhase, ActionRequest, Args,
    CodecFallback, Interaction, InteractionOptions, PreparedAction, ARGS_FIELD,
    FRAGMENT_TERMINATOR, REDIRECT_PREFIX, STATE_FIELD,
};
pub use transport::{ChannelWriter, MemoryWriter, ResponseWriter, STREAM_HEADERS};

// Re-export error types
pub use crate::error::{
    ActionError, CodecError, ConfigError, ErrorClass, JobFailure, RequestError, RunError,
    SchedulerError, StoreError, TransportError,
};

// Re-export commonly used external types
pub use async_trait::async_trait;
