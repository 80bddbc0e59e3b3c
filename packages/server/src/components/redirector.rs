//! Redirector: a stateless component whose action navigates away.

use anyhow::{bail, Result};
use serde_json::{json, Value};
use trellis::{Component, Core, DisposableCodec, Render, TemplateSet};

use super::html::{action_button, component_attrs};

pub const NAME: &str = "Redirector";
pub const TEMPLATE: &str = "redirector";

/// Only same-site absolute paths.
fn check_location(location: &str) -> Result<()> {
    if !location.starts_with('/') || location.starts_with("//") {
        bail!("refusing to redirect off-site: {:?}", location);
    }
    Ok(())
}

pub fn component(templates: &TemplateSet) -> Component {
    let templates = templates.clone();
    Component::new(NAME, move |core: &Core| {
        core.codec(DisposableCodec);

        // Args: [location]
        core.action("Go", |ctx| async move {
            let location: String = ctx.args().get(0)?;
            check_location(&location)?;
            ctx.redirect(&location).await
        });

        core.render(Render::new().template_named(&templates, TEMPLATE));
    })
}

pub fn template(state: &Value) -> Result<Vec<u8>> {
    let html = format!(
        r#"<div class="redirector" {attrs}>{go}</div>"#,
        attrs = component_attrs(state),
        go = action_button("Go", &json!(["/guarded"]), "Leave"),
    );
    Ok(html.into_bytes())
}
