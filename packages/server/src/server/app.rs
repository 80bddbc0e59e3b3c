//! Application setup and server configuration.

use std::sync::Arc;

use axum::{
    extract::Extension,
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;
use trellis::{Registry, SchedulerOptions, TemplateSet};

use crate::components;
use crate::config::Config;
use crate::server::routes::{action_handler, client_script, guarded_page, health_handler, home_page};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Constructed once at startup, read by every action request
    pub registry: Arc<Registry>,
    pub templates: TemplateSet,
    pub config: Arc<Config>,
}

impl AppState {
    /// Register every component and template.
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let templates = components::templates();
        let registry = components::registry(&templates, &config)?;
        tracing::info!(components = ?registry.names(), "component registry built");

        Ok(Self {
            registry: Arc::new(registry),
            templates,
            config: Arc::new(config),
        })
    }

    pub fn scheduler_options(&self) -> SchedulerOptions {
        SchedulerOptions {
            workers: self.config.workers,
        }
    }
}

/// Route of the action endpoint under `prefix`.
pub fn action_route(prefix: &str) -> String {
    format!("{}/:component/:action", prefix.trim_end_matches('/'))
}

/// Build the Axum application router
pub fn build_app(state: AppState) -> Router {
    let actions = action_route(&state.config.action_prefix);

    Router::new()
        .route("/", get(home_page))
        .route("/guarded", get(guarded_page))
        .route("/trellis.js", get(client_script))
        .route("/health", get(health_handler))
        .route(&actions, post(action_handler))
        .layer(Extension(state))
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_route() {
        assert_eq!(
            action_route("/internal/actions"),
            "/internal/actions/:component/:action"
        );
        assert_eq!(action_route("/"), "/:component/:action");
    }
}
