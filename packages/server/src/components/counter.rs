//! Counter: the smallest stateful component.

use anyhow::Result;
use serde_json::{json, Value};
use trellis::{Component, Core, Render, TemplateSet};

use super::html::{action_button, component_attrs, text};

pub const NAME: &str = "Counter";
pub const TEMPLATE: &str = "counter";

pub fn component(templates: &TemplateSet) -> Component {
    let templates = templates.clone();
    Component::new(NAME, move |core: &Core| {
        core.on_init(|c| async move {
            c.state().set("count", 0);
            Ok(())
        });

        core.action("Increment", |ctx| async move {
            let step: i64 = if ctx.args().is_empty() { 1 } else { ctx.args().get(0)? };
            let count: i64 = ctx.state().get_as("count")?.unwrap_or_default();
            ctx.state().set("count", count + step);
            Ok(())
        });

        core.action("Decrement", |ctx| async move {
            let count: i64 = ctx.state().get_as("count")?.unwrap_or_default();
            ctx.state().set("count", count - 1);
            Ok(())
        });

        core.render(Render::new().template_named(&templates, TEMPLATE));
    })
}

pub fn template(state: &Value) -> Result<Vec<u8>> {
    let html = format!(
        r#"<div class="counter" {attrs}>
  {minus}
  <output>{count}</output>
  {plus}
</div>"#,
        attrs = component_attrs(state),
        minus = action_button("Decrement", &json!([]), "-"),
        count = text(&state["count"]),
        plus = action_button("Increment", &json!([1]), "+"),
    );
    Ok(html.into_bytes())
}
