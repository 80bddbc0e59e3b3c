//! Server-rendered pages.

use std::collections::HashMap;

use axum::{
    extract::{Extension, OriginalUri, Query},
    http::{header, HeaderValue, StatusCode},
    response::{Html, IntoResponse, Response},
};
use trellis::{render_page, Component, Rendered, Store};
use uuid::Uuid;

use crate::components;
use crate::server::app::AppState;
use crate::server::error::AppError;

/// Home page composing every demo component.
///
/// `?user=<name>` is exposed to components through the context store.
pub async fn home_page(
    Extension(state): Extension<AppState>,
    OriginalUri(uri): OriginalUri,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Response, AppError> {
    let context = request_context(&state, uri.path());
    if let Some(user) = query.get("user").filter(|u| !u.trim().is_empty()) {
        context.set("user", user.trim());
    }
    let home = components::home(&state.templates, &state.config);
    render(&state, &home, context).await
}

/// A page whose render descriptor is a redirect.
pub async fn guarded_page(
    Extension(state): Extension<AppState>,
    OriginalUri(uri): OriginalUri,
) -> Result<Response, AppError> {
    let context = request_context(&state, uri.path());
    render(&state, &components::guarded(), context).await
}

fn request_context(state: &AppState, path: &str) -> Store {
    let context = Store::new();
    context.set("request_id", Uuid::now_v7().to_string());
    context.set("path", path);
    context.set("action_prefix", state.config.action_prefix.clone());
    context
}

async fn render(state: &AppState, page: &Component, context: Store) -> Result<Response, AppError> {
    let rendered = render_page(page, context, state.scheduler_options()).await?;
    tracing::debug!(page = page.name(), "page rendered");
    Ok(into_response(rendered))
}

fn into_response(rendered: Rendered) -> Response {
    match rendered {
        Rendered::Markup(bytes) => Html(String::from_utf8_lossy(&bytes).into_owned()).into_response(),
        Rendered::Redirect(redirect) => {
            let status = StatusCode::from_u16(redirect.status)
                .ok()
                .filter(StatusCode::is_redirection)
                .unwrap_or(StatusCode::SEE_OTHER);
            match HeaderValue::from_str(&redirect.location) {
                Ok(location) => (status, [(header::LOCATION, location)]).into_response(),
                Err(_) => {
                    tracing::error!(location = %redirect.location, "redirect location is not a valid header");
                    StatusCode::INTERNAL_SERVER_ERROR.into_response()
                }
            }
        }
    }
}
