//! Profile: loads data in `async` and discovers a nested badge while doing so.
//!
//! State is kept on the server (`ServerCodec`); the page only carries the
//! token.

use std::time::Duration;

use anyhow::{bail, Result};
use serde_json::{json, Value};
use trellis::{Component, Core, Render, ServerCodec, TemplateSet};

use super::html::{action_button, component_attrs, text};

pub const NAME: &str = "Profile";
pub const TEMPLATE: &str = "profile";

pub const BADGE_NAME: &str = "Badge";

const MAX_NAME_LEN: usize = 40;

pub fn badge() -> Component {
    Component::new(BADGE_NAME, |core: &Core| {
        core.on_init(|c| async move {
            c.state().set("label", "guest");
            Ok(())
        });
        core.on_async(|c| async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            if c.context().contains("user") {
                c.state().set("label", "member");
            }
            Ok(())
        });
    })
}

pub fn component(templates: &TemplateSet, codec: ServerCodec) -> Component {
    let templates = templates.clone();
    Component::new(NAME, move |core: &Core| {
        core.codec(codec.clone());

        core.on_async(|c| async move {
            // Stand-in for a slow upstream lookup.
            tokio::time::sleep(Duration::from_millis(10)).await;
            let user = c
                .context()
                .get("user")
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_else(|| "guest".to_string());
            c.state().set("name", user);

            // Registered mid-run: its async work still finishes before any
            // afterAsync job starts.
            c.component("badge", &badge());
            Ok(())
        });

        core.on_after_async(|c| async move {
            c.state().set("loaded", true);
            Ok(())
        });

        // Args: [name]
        core.action("Rename", |ctx| async move {
            let name: String = ctx.args().get(0)?;
            let name = name.trim();
            if name.is_empty() || name.chars().count() > MAX_NAME_LEN {
                bail!("name must be 1 to {} characters", MAX_NAME_LEN);
            }
            ctx.state().set("name", name);
            Ok(())
        });

        core.render(Render::new().template_named(&templates, TEMPLATE));
    })
}

pub fn template(state: &Value) -> Result<Vec<u8>> {
    let badge = match state["badge"]["label"].as_str() {
        Some(label) => format!(r#"<small class="badge">{}</small>"#, text(&json!(label))),
        None => String::new(),
    };
    let html = format!(
        r#"<div class="profile" {attrs}>
  <strong>{name}</strong> {badge}
  {rename}
</div>"#,
        attrs = component_attrs(state),
        name = text(&state["name"]),
        badge = badge,
        rename = action_button("Rename", &json!(["Ada"]), "Rename"),
    );
    Ok(html.into_bytes())
}
