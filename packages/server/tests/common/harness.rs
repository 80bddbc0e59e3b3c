//! Test harness driving the axum router in-process.
//!
//! Each harness gets its own temp directory for server-side component state.
//! Requests go through `tower::ServiceExt::oneshot`, so no socket is bound.

use anyhow::{Context, Result};
use axum::{
    body::{self, Body},
    http::{header, HeaderMap, Method, Request, StatusCode},
    Router,
};
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;
use trellis::{StateCodec, UniversalCodec, ARGS_FIELD, FRAGMENT_TERMINATOR, STATE_FIELD};
use trellis_server::{
    server::{build_app, AppState},
    Config,
};

/// A buffered HTTP response.
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: String,
}

impl TestResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Streamed fragments, terminator removed.
    pub fn fragments(&self) -> Vec<String> {
        self.body
            .split(FRAGMENT_TERMINATOR)
            .filter(|f| !f.is_empty())
            .map(str::to_string)
            .collect()
    }
}

pub struct TestHarness {
    pub app: Router,
    pub state: AppState,
    pub prefix: String,
    _state_dir: TempDir,
}

impl TestHarness {
    pub fn new() -> Result<Self> {
        // Run tests with: RUST_LOG=debug cargo test -- --nocapture
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();

        let state_dir = tempfile::tempdir().context("Failed to create state dir")?;
        let config = Config {
            state_dir: state_dir.path().to_path_buf(),
            workers: 4,
            ..Config::default()
        };
        let prefix = config.action_prefix.clone();
        let state = AppState::new(config)?;

        Ok(Self {
            app: build_app(state.clone()),
            state,
            prefix,
            _state_dir: state_dir,
        })
    }

    pub async fn send(&self, request: Request<Body>) -> Result<TestResponse> {
        let response = self
            .app
            .clone()
            .oneshot(request)
            .await
            .context("router failed")?;
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = body::to_bytes(response.into_body(), usize::MAX)
            .await
            .context("Failed to read body")?;

        Ok(TestResponse {
            status,
            headers,
            body: String::from_utf8_lossy(&bytes).into_owned(),
        })
    }

    pub async fn get(&self, uri: &str) -> Result<TestResponse> {
        self.send(Request::builder().uri(uri).body(Body::empty())?)
            .await
    }

    /// POST an urlencoded action request.
    pub async fn action(
        &self,
        component: &str,
        action: &str,
        state: &str,
        args: &str,
    ) -> Result<TestResponse> {
        let body = url::form_urlencoded::Serializer::new(String::new())
            .append_pair(STATE_FIELD, state)
            .append_pair(ARGS_FIELD, args)
            .finish();
        self.post(
            &self.action_uri(component, action),
            "application/x-www-form-urlencoded",
            body,
        )
        .await
    }

    pub async fn post(&self, uri: &str, content_type: &str, body: String) -> Result<TestResponse> {
        self.send(
            Request::builder()
                .method(Method::POST)
                .uri(uri)
                .header(header::CONTENT_TYPE, content_type)
                .body(Body::from(body))?,
        )
        .await
    }

    pub fn action_uri(&self, component: &str, action: &str) -> String {
        format!("{}/{}/{}", self.prefix, component, action)
    }
}

/// Token for `state` in the default codec.
pub fn token(state: Value) -> String {
    UniversalCodec
        .marshal(&state)
        .expect("state is serializable")
}

/// The state token a page rendered for `component`.
pub fn page_token(html: &str, component: &str) -> Option<String> {
    let marker = format!(
        r#"data-trellis-component="{}" data-trellis-state=""#,
        component
    );
    let start = html.find(&marker)? + marker.len();
    let end = html[start..].find('"')?;
    Some(html[start..start + end].to_string())
}
