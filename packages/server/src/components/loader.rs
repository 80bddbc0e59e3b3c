//! Loader: streams progress while an action works.

use std::time::Duration;

use anyhow::Result;
use serde_json::{json, Value};
use trellis::{Component, Core, Render, TemplateSet};

use super::html::{action_button, component_attrs, text};

pub const NAME: &str = "Loader";
pub const TEMPLATE: &str = "loader";

/// Pause between progress steps when the caller does not pass one.
const DEFAULT_STEP_MS: u64 = 400;
const MAX_STEP_MS: u64 = 2_000;

pub fn component(templates: &TemplateSet) -> Component {
    let templates = templates.clone();
    Component::new(NAME, move |core: &Core| {
        core.on_init(|c| async move {
            c.state().set("status", "Idle");
            Ok(())
        });

        // Args: [step_ms]
        core.action("Load", |ctx| async move {
            let step_ms: u64 = match ctx.args().raw(0) {
                Some(_) => ctx.args().get(0)?,
                None => DEFAULT_STEP_MS,
            };
            let step = Duration::from_millis(step_ms.min(MAX_STEP_MS));

            ctx.state().set("status", "Preparing...");
            ctx.flush().await?;
            tokio::time::sleep(step).await;

            ctx.state().set("status", "Loading...");
            ctx.flush().await?;
            tokio::time::sleep(step).await;

            ctx.state().set("status", "Done");
            Ok(())
        });

        core.render(Render::new().template_named(&templates, TEMPLATE));
    })
}

pub fn template(state: &Value) -> Result<Vec<u8>> {
    let html = format!(
        r#"<div class="loader" {attrs}>
  <span>{status}</span>
  {load}
</div>"#,
        attrs = component_attrs(state),
        status = text(&state["status"]),
        load = action_button("Load", &json!([]), "Load"),
    );
    Ok(html.into_bytes())
}
