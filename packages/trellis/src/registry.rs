//! Named component constructors and the process-wide registry.
//!
//! Identity is never inferred: a component's name is whatever it was
//! registered with. The [`Registry`] is built once at startup and handed to
//! the request pipeline by reference.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use tracing::info;

use crate::core::Core;
use crate::error::ConfigError;

type Constructor = Arc<dyn Fn(&Core) + Send + Sync>;

/// A named component constructor.
///
/// Constructors are plain functions that receive a builder and register work
/// on it. They return nothing: all coordination happens through the shared
/// scheduler and the state stores.
///
/// ```ignore
/// fn counter(core: &Core) {
///     core.on_init(|c| async move {
///         c.state().set("count", 0);
///         Ok(())
///     });
///     core.action("Increment", |ctx| async move { /* ... */ Ok(()) });
///     core.render(Render::new().template(counter_template));
/// }
///
/// let counter = Component::new("Counter", counter);
/// ```
#[derive(Clone)]
pub struct Component {
    name: Arc<str>,
    ctor: Constructor,
}

impl Component {
    pub fn new<F>(name: impl Into<Arc<str>>, ctor: F) -> Self
    where
        F: Fn(&Core) + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            ctor: Arc::new(ctor),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Invoke the constructor on `core`.
    pub(crate) fn build(&self, core: &Core) {
        (self.ctor)(core)
    }
}

impl fmt::Debug for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Component").field("name", &self.name).finish()
    }
}

/// Name → constructor table consulted by the interaction protocol.
///
/// Write-locked only while registering at startup; reads are shared.
#[derive(Default)]
pub struct Registry {
    components: RwLock<HashMap<String, Component>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `component` under its name.
    pub fn register(&self, component: Component) -> Result<(), ConfigError> {
        let mut components = match self.components.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if components.contains_key(component.name()) {
            return Err(ConfigError::DuplicateComponent(component.name().to_string()));
        }
        info!(component = component.name(), "component registered");
        components.insert(component.name().to_string(), component);
        Ok(())
    }

    /// Builder-style [`register`](Self::register).
    pub fn with(self, component: Component) -> Result<Self, ConfigError> {
        self.register(component)?;
        Ok(self)
    }

    /// Look up a component by name.
    pub fn resolve(&self, name: &str) -> Option<Component> {
        let components = match self.components.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        components.get(name).cloned()
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let components = match self.components.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut names: Vec<String> = components.keys().cloned().collect();
        names.sort();
        names
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("components", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_resolve() {
        let registry = Registry::new()
            .with(Component::new("Counter", |_: &Core| {}))
            .unwrap()
            .with(Component::new("Clock", |_: &Core| {}))
            .unwrap();

        assert_eq!(registry.resolve("Counter").unwrap().name(), "Counter");
        assert!(registry.resolve("DoesNotExist").is_none());
        assert_eq!(registry.names(), vec!["Clock", "Counter"]);
    }

    #[test]
    fn test_duplicate_names_are_rejected() {
        let registry = Registry::new();
        registry
            .register(Component::new("Counter", |_: &Core| {}))
            .unwrap();
        assert_eq!(
            registry.register(Component::new("Counter", |_: &Core| {})),
            Err(ConfigError::DuplicateComponent("Counter".into()))
        );
    }
}
