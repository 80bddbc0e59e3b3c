//! Integration tests for page rendering and the static routes.

mod common;

use axum::http::StatusCode;
use common::{page_token, TestHarness};

#[tokio::test]
async fn home_page_renders_every_section() -> anyhow::Result<()> {
    let harness = TestHarness::new()?;

    let response = harness.get("/").await?;

    assert_eq!(response.status, StatusCode::OK);
    let html = &response.body;
    assert!(html.contains("<title>Trellis</title>"));
    assert!(html.contains(r#"data-trellis-prefix="/internal/actions""#));
    for section in ["counter", "loader", "profile", "redirector"] {
        assert!(html.contains(&format!(r#"<section id="{}">"#, section)), "missing {}", section);
    }
    assert!(html.contains("<output>0</output>"));
    assert!(html.contains("<strong>guest</strong>"));
    assert!(html.contains(r#"<small class="badge">guest</small>"#));
    assert_eq!(
        page_token(html, "Redirector").as_deref(),
        Some(trellis::DISPOSABLE_TOKEN)
    );
    Ok(())
}

#[tokio::test]
async fn request_context_reaches_nested_components() -> anyhow::Result<()> {
    let harness = TestHarness::new()?;

    let response = harness.get("/?user=ada").await?;

    assert_eq!(response.status, StatusCode::OK);
    assert!(response.body.contains("<strong>ada</strong>"));
    // The badge is registered from the profile's async job.
    assert!(response.body.contains(r#"<small class="badge">member</small>"#));
    Ok(())
}

#[tokio::test]
async fn user_input_is_escaped() -> anyhow::Result<()> {
    let harness = TestHarness::new()?;

    let response = harness.get("/?user=%3Cscript%3E").await?;

    assert!(response.body.contains("<strong>&lt;script&gt;</strong>"));
    assert!(!response.body.contains("<strong><script>"));
    Ok(())
}

#[tokio::test]
async fn page_then_action_round_trip() -> anyhow::Result<()> {
    let harness = TestHarness::new()?;

    let page = harness.get("/").await?;
    let counter = page_token(&page.body, "Counter").expect("counter rendered");

    let response = harness.action("Counter", "Increment", &counter, "[]").await?;
    assert!(response.fragments()[0].contains("<output>1</output>"));
    Ok(())
}

#[tokio::test]
async fn guarded_page_redirects() -> anyhow::Result<()> {
    let harness = TestHarness::new()?;

    let response = harness.get("/guarded").await?;

    assert_eq!(response.status, StatusCode::SEE_OTHER);
    assert_eq!(response.header("location"), Some("/"));
    Ok(())
}

#[tokio::test]
async fn health_lists_registered_components() -> anyhow::Result<()> {
    let harness = TestHarness::new()?;

    let response = harness.get("/health").await?;

    assert_eq!(response.status, StatusCode::OK);
    let health: serde_json::Value = serde_json::from_str(&response.body)?;
    assert_eq!(health["status"], "healthy");
    assert_eq!(
        health["components"],
        serde_json::json!(["Counter", "Loader", "Profile", "Redirector"])
    );
    Ok(())
}

#[tokio::test]
async fn client_script_is_served() -> anyhow::Result<()> {
    let harness = TestHarness::new()?;

    let response = harness.get("/trellis.js").await?;

    assert_eq!(response.status, StatusCode::OK);
    assert!(response
        .header("content-type")
        .is_some_and(|ct| ct.starts_with("application/javascript")));
    assert!(response.body.contains(trellis::FRAGMENT_TERMINATOR));
    assert!(response.body.contains(trellis::REDIRECT_PREFIX));
    Ok(())
}
