//! Action endpoint.
//!
//! POST <prefix>/:component/:action with form fields `State` and `Args`.
//!
//! Everything that can be rejected before a handler runs (request shape,
//! unknown component or action, unreadable state token) gets a status code.
//! The response is held until the first fragment is ready, so an action that
//! fails before flushing also gets one. After that the body is a chunked
//! stream of fragments, one chunk per flush.

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    body::{self, Body},
    extract::{Extension, FromRequest, Multipart, Request},
    http::{header, HeaderName, HeaderValue, StatusCode},
    response::Response,
};
use futures::stream::{self, StreamExt};
use tokio_stream::wrappers::ReceiverStream;
use trellis::{
    ActionRequest, ChannelWriter, CodecFallback, Interaction, InteractionOptions, Store,
    STREAM_HEADERS,
};
use uuid::Uuid;

use crate::server::app::AppState;
use crate::server::error::AppError;

/// Upper bound for urlencoded action bodies.
const MAX_FORM_BYTES: usize = 1024 * 1024;

/// Fragments buffered between the action and the response body.
const STREAM_BUFFER: usize = 16;

/// Streamed action handler.
pub async fn action_handler(
    Extension(state): Extension<AppState>,
    request: Request,
) -> Result<Response, AppError> {
    let action_request = read_action_request(request).await?;

    let context = Store::new();
    context.set("request_id", Uuid::now_v7().to_string());
    context.set("action_prefix", state.config.action_prefix.clone());

    let prepared = Interaction::prepare_with_context(
        &state.registry,
        action_request,
        context,
        InteractionOptions {
            workers: state.config.workers,
            codec_fallback: CodecFallback::Fail,
        },
    )?;
    let component = prepared.envelope().component.clone();
    let action = prepared.envelope().action.clone();

    let (writer, mut rx) = ChannelWriter::channel(STREAM_BUFFER);
    let run = tokio::spawn(prepared.run(Arc::new(writer)));

    // The writer is dropped when the run ends, so `None` means it finished
    // without flushing anything.
    let first = match rx.recv().await {
        Some(chunk) => chunk,
        None => {
            let outcome = run
                .await
                .map_err(|e| AppError::Aborted(e.to_string()))??;
            tracing::info!(
                %component,
                %action,
                phase = %outcome.phase,
                fragments = outcome.fragments,
                "action completed"
            );
            return Ok(stream_response(Body::empty()));
        }
    };

    tokio::spawn(async move {
        match run.await {
            Ok(Ok(outcome)) => tracing::info!(
                %component,
                %action,
                phase = %outcome.phase,
                fragments = outcome.fragments,
                "action completed"
            ),
            Ok(Err(e)) => tracing::error!(
                %component,
                %action,
                class = %e.class(),
                error = %e,
                "action failed mid-stream"
            ),
            Err(e) => tracing::error!(%component, %action, error = %e, "action task aborted"),
        }
    });

    let chunks = stream::once(async move { first })
        .chain(ReceiverStream::new(rx))
        .map(Ok::<_, Infallible>);
    Ok(stream_response(Body::from_stream(chunks)))
}

fn stream_response(body: Body) -> Response {
    let mut response = Response::new(body);
    *response.status_mut() = StatusCode::OK;
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/html; charset=utf-8"),
    );
    for (name, value) in STREAM_HEADERS {
        if let Ok(name) = HeaderName::from_bytes(name.as_bytes()) {
            headers.insert(name, HeaderValue::from_static(value));
        }
    }
    response
}

/// Decode the HTTP request into the transport-neutral action request.
async fn read_action_request(request: Request) -> Result<ActionRequest, AppError> {
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let content_type = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    let essence = content_type
        .as_deref()
        .and_then(|ct| ct.split(';').next())
        .map(|ct| ct.trim().to_ascii_lowercase());

    let form = match essence.as_deref() {
        Some("application/x-www-form-urlencoded") => {
            let bytes = body::to_bytes(request.into_body(), MAX_FORM_BYTES)
                .await
                .map_err(|e| AppError::Body(e.to_string()))?;
            url::form_urlencoded::parse(&bytes).into_owned().collect()
        }
        Some("multipart/form-data") => read_multipart(request).await?,
        // Left empty; the envelope rejects the content type.
        _ => HashMap::new(),
    };

    Ok(ActionRequest {
        method,
        path,
        content_type,
        form,
    })
}

async fn read_multipart(request: Request) -> Result<HashMap<String, String>, AppError> {
    let mut multipart = Multipart::from_request(request, &())
        .await
        .map_err(|e| AppError::Body(e.to_string()))?;

    let mut form = HashMap::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Body(e.to_string()))?
    {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };
        let value = field
            .text()
            .await
            .map_err(|e| AppError::Body(e.to_string()))?;
        form.insert(name, value);
    }
    Ok(form)
}
