//! Render pipeline: turn a component snapshot into bytes, or redirect.
//!
//! Templating itself is an external collaborator. Anything implementing
//! [`Template`] can render a snapshot; closures `Fn(&Value) -> Result<Vec<u8>>`
//! implement it directly. A [`TemplateBuilder`] resolves templates by name,
//! and [`TemplateSet`] is the in-memory builder used by most applications.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use anyhow::Result;
use serde_json::Value;

use crate::error::ConfigError;

/// A markup engine bound to one template.
pub trait Template: Send + Sync {
    /// Render `state` to bytes.
    fn render(&self, state: &Value) -> Result<Vec<u8>>;
}

impl<F> Template for F
where
    F: Fn(&Value) -> Result<Vec<u8>> + Send + Sync,
{
    fn render(&self, state: &Value) -> Result<Vec<u8>> {
        self(state)
    }
}

/// Produces templates bound to a name.
pub trait TemplateBuilder: Send + Sync {
    fn build(&self, name: &str) -> Option<Arc<dyn Template>>;
}

/// In-memory [`TemplateBuilder`] keyed by name.
#[derive(Default, Clone)]
pub struct TemplateSet {
    templates: Arc<RwLock<HashMap<String, Arc<dyn Template>>>>,
}

impl TemplateSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `template` under `name`, replacing any previous one.
    pub fn insert(&self, name: impl Into<String>, template: impl Template + 'static) {
        let mut templates = match self.templates.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        templates.insert(name.into(), Arc::new(template));
    }

    /// Builder-style [`insert`](Self::insert).
    pub fn with(self, name: impl Into<String>, template: impl Template + 'static) -> Self {
        self.insert(name, template);
        self
    }
}

impl TemplateBuilder for TemplateSet {
    fn build(&self, name: &str) -> Option<Arc<dyn Template>> {
        let templates = match self.templates.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        templates.get(name).cloned()
    }
}

impl fmt::Debug for TemplateSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let count = self.templates.read().map(|t| t.len()).unwrap_or(0);
        f.debug_struct("TemplateSet").field("templates", &count).finish()
    }
}

/// Default status used for redirects.
pub const DEFAULT_REDIRECT_STATUS: u16 = 303;

/// A redirect instead of markup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirect {
    pub location: String,
    pub status: u16,
}

/// Output of a completed render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rendered {
    Markup(Vec<u8>),
    Redirect(Redirect),
}

/// Render descriptor for a component.
///
/// Exactly one of template, writer or redirect must be configured;
/// [`Core::render`](crate::Core::render) rejects anything else immediately.
#[derive(Clone, Default)]
pub struct Render {
    template: Option<Arc<dyn Template>>,
    writer: Option<Arc<dyn Template>>,
    redirect: Option<Redirect>,
    missing_template: Option<String>,
}

impl Render {
    pub fn new() -> Self {
        Self::default()
    }

    /// Render through `template`.
    pub fn template(mut self, template: impl Template + 'static) -> Self {
        self.template = Some(Arc::new(template));
        self
    }

    /// Render through the template `name` resolved by `builder`.
    ///
    /// An unknown name surfaces as [`ConfigError::TemplateNotFound`] when the
    /// descriptor is validated.
    pub fn template_named(mut self, builder: &dyn TemplateBuilder, name: &str) -> Self {
        match builder.build(name) {
            Some(template) => self.template = Some(template),
            None => self.missing_template = Some(name.to_string()),
        }
        self
    }

    /// Render through a raw writer that produces bytes from state.
    pub fn writer<F>(mut self, writer: F) -> Self
    where
        F: Fn(&Value) -> Result<Vec<u8>> + Send + Sync + 'static,
    {
        self.writer = Some(Arc::new(writer));
        self
    }

    /// Redirect to `location` instead of rendering.
    pub fn redirect(mut self, location: impl Into<String>) -> Self {
        self.redirect = Some(Redirect {
            location: location.into(),
            status: DEFAULT_REDIRECT_STATUS,
        });
        self
    }

    /// Redirect with an explicit status code.
    pub fn redirect_with_status(mut self, location: impl Into<String>, status: u16) -> Self {
        self.redirect = Some(Redirect {
            location: location.into(),
            status,
        });
        self
    }

    /// Check that the descriptor is usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(name) = &self.missing_template {
            return Err(ConfigError::TemplateNotFound(name.clone()));
        }
        match (&self.template, &self.writer, &self.redirect) {
            (Some(_), Some(_), _) => Err(ConfigError::ConflictingRenderer),
            (None, None, None) => Err(ConfigError::MissingRenderer),
            _ => Ok(()),
        }
    }

    /// Returns true when this descriptor redirects.
    pub fn is_redirect(&self) -> bool {
        self.redirect.is_some()
    }

    /// Render `state`. A configured redirect wins over markup.
    pub fn render(&self, state: &Value) -> Result<Rendered> {
        if let Some(redirect) = &self.redirect {
            return Ok(Rendered::Redirect(redirect.clone()));
        }
        self.markup(state).map(Rendered::Markup)
    }

    /// Render `state` to markup, ignoring any redirect.
    pub fn markup(&self, state: &Value) -> Result<Vec<u8>> {
        match (&self.template, &self.writer) {
            (Some(template), _) => template.render(state),
            (None, Some(writer)) => writer.render(state),
            (None, None) => Err(ConfigError::MissingRenderer.into()),
        }
    }
}

impl fmt::Debug for Render {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Render")
            .field("template", &self.template.is_some())
            .field("writer", &self.writer.is_some())
            .field("redirect", &self.redirect)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn count_template(state: &Value) -> Result<Vec<u8>> {
        Ok(format!("<b>{}</b>", state["count"]).into_bytes())
    }

    #[test]
    fn test_empty_descriptor_is_rejected() {
        assert_eq!(Render::new().validate(), Err(ConfigError::MissingRenderer));
    }

    #[test]
    fn test_template_and_writer_conflict() {
        let render = Render::new()
            .template(count_template)
            .writer(|_: &Value| Ok(Vec::new()));
        assert_eq!(render.validate(), Err(ConfigError::ConflictingRenderer));
    }

    #[test]
    fn test_template_renders_state() {
        let render = Render::new().template(count_template);
        render.validate().unwrap();
        let rendered = render.render(&json!({"count": 4})).unwrap();
        assert_eq!(rendered, Rendered::Markup(b"<b>4</b>".to_vec()));
    }

    #[test]
    fn test_named_template_lookup() {
        let set = TemplateSet::new().with("counter", count_template);
        let render = Render::new().template_named(&set, "counter");
        assert!(render.validate().is_ok());

        let missing = Render::new().template_named(&set, "nope");
        assert_eq!(
            missing.validate(),
            Err(ConfigError::TemplateNotFound("nope".into()))
        );
    }

    #[test]
    fn test_redirect_wins() {
        let render = Render::new().redirect("/login");
        render.validate().unwrap();
        assert!(render.is_redirect());
        assert_eq!(
            render.render(&json!({})).unwrap(),
            Rendered::Redirect(Redirect {
                location: "/login".into(),
                status: DEFAULT_REDIRECT_STATUS,
            })
        );
    }
}
