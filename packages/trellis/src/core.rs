//! The component builder.
//!
//! A [`Core`] orchestrates one component subtree. It owns the component's
//! state [`Store`] and shares the context store and [`Scheduler`] with its
//! parent and children, so one scheduler run covers the whole tree.
//!
//! # Lifecycle
//!
//! ```text
//! init ──► async ──► afterAsync ──► state ──► render
//! ```
//!
//! - `on_init`, `on_async`, `on_after_async` register jobs in the matching
//!   group, each depending on the previous group. Repeated calls fan out
//!   independent jobs in the same group.
//! - `component(alias, ..)` builds a child synchronously, so the child's jobs
//!   are in the scheduler before the parent finishes registering its own, and
//!   schedules a `state` job that links the child's state into the parent.
//! - `render(..)` stores the render descriptor; on the root it schedules the
//!   final job after `{init, async, afterAsync, state}`.
//!
//! # Example
//!
//! ```ignore
//! fn page(core: &Core) {
//!     core.on_async(|c| async move {
//!         let user = fetch_user().await?;
//!         c.state().set_as("user", &user)?;
//!         Ok(())
//!     });
//!     core.component("counter", &Component::new("Counter", counter));
//!     core.render(Render::new().template(page_template));
//! }
//! ```

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde_json::Value;
use tracing::{debug, error};

use crate::action::{ActionContext, ActionHandler};
use crate::codec::{StateCodec, UniversalCodec};
use crate::error::{CodecError, ConfigError, RunError};
use crate::job::{groups, Job};
use crate::registry::Component;
use crate::render::{Render, Rendered};
use crate::scheduler::{Scheduler, SchedulerOptions};
use crate::store::{is_marker, Store};

/// Marker key carrying the registered component name in a snapshot.
pub const COMPONENT_MARKER: &str = "__component";

/// Marker key carrying the state token in a snapshot.
pub const STATE_MARKER: &str = "__state";

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    match lock.read() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    match lock.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

struct CoreInner {
    name: Option<String>,
    is_root: bool,
    state: Store,
    context: Store,
    scheduler: Arc<Scheduler>,
    /// Configuration faults of the whole tree, shared with every child.
    faults: Arc<Mutex<Vec<ConfigError>>>,
    render: RwLock<Option<Render>>,
    actions: RwLock<HashMap<String, ActionHandler>>,
    children: Mutex<Vec<(String, Core)>>,
    codec: RwLock<Arc<dyn StateCodec>>,
    output: Mutex<Option<Rendered>>,
}

/// Builder for one component subtree. Cheap to clone.
#[derive(Clone)]
pub struct Core {
    inner: Arc<CoreInner>,
}

impl Core {
    /// Create an unnamed root builder.
    pub fn new(context: Store, scheduler: Arc<Scheduler>) -> Self {
        Self::create(None, true, context, scheduler, Arc::default())
    }

    /// Create a root builder for `component` and invoke its constructor.
    pub fn root(component: &Component, context: Store, scheduler: Arc<Scheduler>) -> Self {
        let core = Self::create(
            Some(component.name().to_string()),
            true,
            context,
            scheduler,
            Arc::default(),
        );
        component.build(&core);
        core
    }

    /// Create a root builder with its own scheduler.
    pub fn with_options(context: Store, options: SchedulerOptions) -> Self {
        Self::new(context, Arc::new(Scheduler::new(options)))
    }

    fn create(
        name: Option<String>,
        is_root: bool,
        context: Store,
        scheduler: Arc<Scheduler>,
        faults: Arc<Mutex<Vec<ConfigError>>>,
    ) -> Self {
        Self {
            inner: Arc::new(CoreInner {
                name,
                is_root,
                state: Store::new(),
                context,
                scheduler,
                faults,
                render: RwLock::new(None),
                actions: RwLock::new(HashMap::new()),
                children: Mutex::new(Vec::new()),
                codec: RwLock::new(Arc::new(UniversalCodec)),
                output: Mutex::new(None),
            }),
        }
    }

    /// Registered name, if this core was built from a [`Component`].
    pub fn name(&self) -> Option<&str> {
        self.inner.name.as_deref()
    }

    /// Returns true for the root of the tree.
    pub fn is_root(&self) -> bool {
        self.inner.is_root
    }

    /// This component's own state.
    pub fn state(&self) -> &Store {
        &self.inner.state
    }

    /// Request context shared by the whole tree.
    pub fn context(&self) -> &Store {
        &self.inner.context
    }

    /// The scheduler shared by the whole tree.
    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.inner.scheduler
    }

    fn job_name(&self) -> String {
        self.inner
            .name
            .clone()
            .unwrap_or_else(|| "anonymous".to_string())
    }

    fn schedule<F, Fut>(&self, group: &'static str, after: &[&'static str], work: F)
    where
        F: FnOnce(Core) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let core = self.clone();
        self.inner.scheduler.add(
            Job::new(group, move || work(core))
                .named(self.job_name())
                .after(after.iter().copied()),
        );
    }

    /// Register initialization work.
    pub fn on_init<F, Fut>(&self, work: F)
    where
        F: FnOnce(Core) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.schedule(groups::INIT, &[], work);
    }

    /// Register asynchronous data-loading work, run after every init job.
    pub fn on_async<F, Fut>(&self, work: F)
    where
        F: FnOnce(Core) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.schedule(groups::ASYNC, &[groups::INIT], work);
    }

    /// Register work that runs once every async job in the tree is done.
    pub fn on_after_async<F, Fut>(&self, work: F)
    where
        F: FnOnce(Core) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.schedule(groups::AFTER_ASYNC, &[groups::ASYNC], work);
    }

    /// Build a nested component under `alias`.
    ///
    /// The constructor runs synchronously on a child builder with a fresh
    /// state store and the shared scheduler and context. A `state` job, after
    /// `afterAsync`, links the child's state into this component under
    /// `alias`. Until then the two stores are isolated, except during action
    /// replay, where children are linked as soon as submitted state lands.
    pub fn component(&self, alias: impl Into<String>, component: &Component) -> Core {
        let alias = alias.into();
        let child = Self::create(
            Some(component.name().to_string()),
            false,
            self.inner.context.clone(),
            self.inner.scheduler.clone(),
            self.inner.faults.clone(),
        );
        debug!(parent = ?self.name(), component = component.name(), %alias, "component registered");

        lock(&self.inner.children).push((alias.clone(), child.clone()));
        component.build(&child);

        let parent_state = self.inner.state.clone();
        let child_state = child.inner.state.clone();
        let job_alias = alias.clone();
        self.inner.scheduler.add(
            Job::new(groups::STATE, move || async move {
                parent_state.nest(job_alias, child_state);
                Ok(())
            })
            .named(alias)
            .after([groups::AFTER_ASYNC]),
        );

        child
    }

    /// Link every registered child's state under its alias, through the
    /// whole subtree. The `state` jobs relink the same stores later.
    pub(crate) fn link_children(&self) {
        let children: Vec<(String, Core)> = lock(&self.inner.children).clone();
        for (alias, child) in children {
            child.link_children();
            self.inner.state.nest(alias, child.inner.state.clone());
        }
    }

    /// Child registered under `alias`.
    pub fn child(&self, alias: &str) -> Option<Core> {
        lock(&self.inner.children)
            .iter()
            .find(|(a, _)| a == alias)
            .map(|(_, child)| child.clone())
    }

    /// Aliases of registered children, in registration order.
    pub fn child_aliases(&self) -> Vec<String> {
        lock(&self.inner.children)
            .iter()
            .map(|(alias, _)| alias.clone())
            .collect()
    }

    /// Declare an action handler. Handlers only run during action replay.
    pub fn action<F, Fut>(&self, name: impl Into<String>, handler: F)
    where
        F: Fn(ActionContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let handler: ActionHandler = Arc::new(move |ctx| Box::pin(handler(ctx)));
        write(&self.inner.actions).insert(name.into(), handler);
    }

    /// Returns true if an action called `name` was declared.
    pub fn has_action(&self, name: &str) -> bool {
        read(&self.inner.actions).contains_key(name)
    }

    pub(crate) fn action_handler(&self, name: &str) -> Option<ActionHandler> {
        read(&self.inner.actions).get(name).cloned()
    }

    /// Declared action names, sorted.
    pub fn action_names(&self) -> Vec<String> {
        let mut names: Vec<String> = read(&self.inner.actions).keys().cloned().collect();
        names.sort();
        names
    }

    /// Select the codec used for this component's state token.
    pub fn codec(&self, codec: impl StateCodec + 'static) {
        *write(&self.inner.codec) = Arc::new(codec);
    }

    /// The codec used for this component's state token.
    pub fn state_codec(&self) -> Arc<dyn StateCodec> {
        read(&self.inner.codec).clone()
    }

    /// Configure how this component renders.
    ///
    /// An unusable descriptor is a configuration fault: it is logged and
    /// recorded at once, no job is scheduled, and the next
    /// [`execute`](Self::execute) fails without starting any job.
    pub fn render(&self, render: Render) {
        if let Err(fault) = render.validate() {
            error!(component = ?self.name(), error = %fault, "invalid render descriptor");
            lock(&self.inner.faults).push(fault);
            return;
        }

        let first = {
            let mut slot = write(&self.inner.render);
            let first = slot.is_none();
            *slot = Some(render);
            first
        };

        if first && self.inner.is_root {
            let core = self.clone();
            self.inner.scheduler.add(
                Job::new(groups::RENDER, move || async move {
                    let output = core.render_output()?;
                    *lock(&core.inner.output) = Some(output);
                    Ok(())
                })
                .named(self.job_name())
                .after([
                    groups::INIT,
                    groups::ASYNC,
                    groups::AFTER_ASYNC,
                    groups::STATE,
                ]),
            );
        }
    }

    /// The configured render descriptor.
    pub fn render_descriptor(&self) -> Option<Render> {
        read(&self.inner.render).clone()
    }

    /// Render the current snapshot through the configured descriptor.
    pub fn render_output(&self) -> anyhow::Result<Rendered> {
        let render = self
            .render_descriptor()
            .ok_or_else(|| ConfigError::NotRenderable(self.job_name()))?;
        if render.is_redirect() {
            return render.render(&Value::Null);
        }
        let snapshot = self.snapshot()?;
        render.render(&snapshot)
    }

    /// First configuration fault recorded anywhere in the tree.
    pub fn check(&self) -> Result<(), ConfigError> {
        match lock(&self.inner.faults).first() {
            Some(fault) => Err(fault.clone()),
            None => Ok(()),
        }
    }

    /// Run the shared scheduler to completion.
    ///
    /// Fails without starting any job if a constructor recorded a
    /// configuration fault, and fails if any job failed.
    pub async fn execute(&self) -> Result<(), RunError> {
        self.check()?;
        self.inner.scheduler.execute().await?;
        Ok(())
    }

    /// Take the output produced by the render job.
    pub fn take_output(&self) -> Option<Rendered> {
        lock(&self.inner.output).take()
    }

    /// Token for this component's current user state.
    pub fn state_token(&self) -> Result<String, CodecError> {
        self.state_codec().marshal(&self.inner.state.export_user())
    }

    /// Exported state plus markers, through every linked child.
    ///
    /// Named components carry `__component` and `__state` so templates can
    /// point actions at them.
    pub fn snapshot(&self) -> Result<Value, CodecError> {
        let mut map = self.inner.state.export_map();

        let children: Vec<(String, Core)> = lock(&self.inner.children).clone();
        for (alias, child) in children {
            if self.inner.state.is_nested(&alias) {
                map.insert(alias, child.snapshot()?);
            }
        }

        if let Some(name) = &self.inner.name {
            map.insert(COMPONENT_MARKER.to_string(), Value::String(name.clone()));
            map.insert(STATE_MARKER.to_string(), Value::String(self.state_token()?));
        }

        Ok(Value::Object(map))
    }

    /// Write client-submitted state into this component.
    ///
    /// Objects under a child's alias are overlaid into that child; marker
    /// keys are ignored.
    pub fn overlay(&self, state: Value) {
        let Value::Object(map) = state else {
            return;
        };

        for (key, value) in map {
            if is_marker(&key) {
                continue;
            }
            match (self.child(&key), value) {
                (Some(child), value @ Value::Object(_)) => child.overlay(value),
                (_, value) => self.inner.state.set(key, value),
            }
        }
    }
}

impl fmt::Debug for Core {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Core")
            .field("name", &self.inner.name)
            .field("root", &self.inner.is_root)
            .field("children", &self.child_aliases())
            .field("actions", &self.action_names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::DisposableCodec;
    use crate::job::JobOutcome;
    use anyhow::Result;
    use serde_json::json;
    use std::time::Duration;

    fn json_writer(state: &Value) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(state)?)
    }

    fn markup(rendered: Rendered) -> Value {
        match rendered {
            Rendered::Markup(bytes) => serde_json::from_slice(&bytes).unwrap(),
            other => panic!("expected markup, got {:?}", other),
        }
    }

    fn counter(core: &Core) {
        core.on_init(|c| async move {
            c.state().set("count", 0);
            Ok(())
        });
        core.on_async(|c| async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            let count: i64 = c.state().get_as("count")?.unwrap_or_default();
            c.state().set("count", count + 10);
            Ok(())
        });
    }

    #[tokio::test]
    async fn test_page_lifecycle_renders_children() {
        let page = Component::new("Page", |core: &Core| {
            core.on_init(|c| async move {
                c.state().set("title", "Home");
                Ok(())
            });
            core.component("left", &Component::new("Counter", counter));
            core.component("right", &Component::new("Counter", counter));
            core.render(Render::new().writer(json_writer));
        });

        let core = Core::root(&page, Store::new(), Arc::new(Scheduler::default()));
        core.execute().await.unwrap();

        let state = markup(core.take_output().unwrap());
        assert_eq!(state["title"], "Home");
        assert_eq!(state["left"]["count"], 10);
        assert_eq!(state["right"]["count"], 10);
        assert_eq!(state["left"]["__component"], "Counter");
        assert_eq!(state["__component"], "Page");
        assert!(state["left"]["__state"].is_string());
    }

    #[tokio::test]
    async fn test_children_are_isolated_until_state_job() {
        let seen = Arc::new(Mutex::new(None));
        let probe = seen.clone();
        let page = Component::new("Page", move |core: &Core| {
            core.component("counter", &Component::new("Counter", counter));
            let probe = probe.clone();
            core.on_after_async(move |c| async move {
                *probe.lock().unwrap() = Some(c.state().contains("counter"));
                Ok(())
            });
            core.render(Render::new().writer(json_writer));
        });

        let core = Core::root(&page, Store::new(), Arc::new(Scheduler::default()));
        core.execute().await.unwrap();
        assert_eq!(*seen.lock().unwrap(), Some(false));
        assert!(core.state().is_nested("counter"));
    }

    #[tokio::test]
    async fn test_component_registered_during_async_completes_first() {
        let page = Component::new("Page", |core: &Core| {
            core.on_async(|c| async move {
                let child = c.component("late", &Component::new("Counter", counter));
                child.on_after_async(|child| async move {
                    child.state().set("settled", true);
                    Ok(())
                });
                Ok(())
            });
            core.on_after_async(|c| async move {
                let late = c.child("late").expect("late child registered");
                // The late child's own async work already ran.
                assert_eq!(late.state().get("count"), Some(json!(10)));
                c.state().set("checked", true);
                Ok(())
            });
            core.render(Render::new().writer(json_writer));
        });

        let core = Core::root(&page, Store::new(), Arc::new(Scheduler::default()));
        core.execute().await.unwrap();

        let state = markup(core.take_output().unwrap());
        assert_eq!(state["checked"], true);
        assert_eq!(state["late"]["count"], 10);
        assert_eq!(state["late"]["settled"], true);
    }

    #[tokio::test]
    async fn test_grandchildren_link_regardless_of_job_order() {
        fn wrapper(core: &Core) {
            core.component("inner", &Component::new("Counter", counter));
        }
        let page = Component::new("Page", |core: &Core| {
            core.component("outer", &Component::new("Wrapper", wrapper));
            core.render(Render::new().writer(json_writer));
        });

        let core = Core::root(&page, Store::new(), Arc::new(Scheduler::default()));
        core.execute().await.unwrap();
        let state = markup(core.take_output().unwrap());
        assert_eq!(state["outer"]["inner"]["count"], 10);
    }

    #[tokio::test]
    async fn test_invalid_render_fails_before_any_job() {
        let ran = Arc::new(Mutex::new(false));
        let flag = ran.clone();
        let page = Component::new("Page", move |core: &Core| {
            let flag = flag.clone();
            core.on_init(move |_| async move {
                *flag.lock().unwrap() = true;
                Ok(())
            });
            core.render(Render::new());
        });

        let core = Core::root(&page, Store::new(), Arc::new(Scheduler::default()));
        assert_eq!(core.check(), Err(ConfigError::MissingRenderer));
        assert!(matches!(
            core.execute().await,
            Err(RunError::Config(ConfigError::MissingRenderer))
        ));
        assert!(!*ran.lock().unwrap());
        assert!(!core.scheduler().is_started());
    }

    #[tokio::test]
    async fn test_failed_async_produces_no_output() {
        let page = Component::new("Page", |core: &Core| {
            core.on_async(|_| async move { Err(anyhow::anyhow!("backend unavailable")) });
            core.on_async(|c| async move {
                c.state().set("sibling", "done");
                Ok(())
            });
            core.render(Render::new().writer(json_writer));
        });

        let core = Core::root(&page, Store::new(), Arc::new(Scheduler::default()));
        let err = core.execute().await.unwrap_err();
        assert!(matches!(err, RunError::Execute(_)));
        assert!(core.take_output().is_none());
        assert_eq!(core.state().get("sibling"), Some(json!("done")));

        let render = core
            .scheduler()
            .reports()
            .into_iter()
            .find(|r| r.group == groups::RENDER)
            .unwrap();
        assert!(matches!(render.outcome, JobOutcome::Skipped { .. }));
    }

    #[tokio::test]
    async fn test_redirect_render() {
        let page = Component::new("Guarded", |core: &Core| {
            core.render(Render::new().redirect("/login"));
        });
        let core = Core::root(&page, Store::new(), Arc::new(Scheduler::default()));
        core.execute().await.unwrap();
        assert!(matches!(
            core.take_output(),
            Some(Rendered::Redirect(ref r)) if r.location == "/login"
        ));
    }

    #[tokio::test]
    async fn test_context_is_shared() {
        let context = Store::new();
        context.set("user", "ada");
        let page = Component::new("Page", |core: &Core| {
            let child = core.component("greeting", &Component::new("Greeting", |c: &Core| {
                c.on_init(|c| async move {
                    let user = c.context().get("user").unwrap_or_default();
                    c.state().set("text", format!("hello {}", user.as_str().unwrap_or("")));
                    Ok(())
                });
            }));
            assert!(!child.is_root());
            core.render(Render::new().writer(json_writer));
        });

        let core = Core::root(&page, context, Arc::new(Scheduler::default()));
        core.execute().await.unwrap();
        let state = markup(core.take_output().unwrap());
        assert_eq!(state["greeting"]["text"], "hello ada");
    }

    #[test]
    fn test_overlay_routes_into_children() {
        let page = Component::new("Page", |core: &Core| {
            core.component("counter", &Component::new("Counter", |_: &Core| {}));
        });
        let core = Core::root(&page, Store::new(), Arc::new(Scheduler::default()));

        core.overlay(json!({
            "title": "Home",
            "__state": "ignored",
            "counter": {"count": 5, "__component": "Counter"}
        }));

        assert_eq!(core.state().get("title"), Some(json!("Home")));
        assert!(!core.state().contains("__state"));
        assert!(!core.state().contains("counter"));
        let counter = core.child("counter").unwrap();
        assert_eq!(counter.state().export(), json!({"count": 5}));
    }

    #[test]
    fn test_disposable_snapshot_requires_empty_state() {
        let core = Core::root(
            &Component::new("Static", |c: &Core| c.codec(DisposableCodec)),
            Store::new(),
            Arc::new(Scheduler::default()),
        );
        assert_eq!(core.snapshot().unwrap()["__state"], "disposable");

        core.state().set("oops", 1);
        assert!(matches!(core.snapshot(), Err(CodecError::DisposableData)));
    }
}
