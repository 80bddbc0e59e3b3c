//! The home page and a guarded page that always redirects.

use std::sync::Arc;

use anyhow::Result;
use serde_json::Value;
use trellis::{Component, Core, Render, Template, TemplateBuilder, TemplateSet};

use super::html::{escape, text};

pub const NAME: &str = "Home";
pub const TEMPLATE: &str = "home";

/// Child aliases and the template each one renders with, in page order.
pub const SECTIONS: [(&str, &str); 4] = [
    ("counter", super::counter::TEMPLATE),
    ("loader", super::loader::TEMPLATE),
    ("profile", super::profile::TEMPLATE),
    ("redirector", super::redirector::TEMPLATE),
];

pub fn component(children: Vec<(&'static str, Component)>, templates: &TemplateSet) -> Component {
    let templates = templates.clone();
    Component::new(NAME, move |core: &Core| {
        core.on_init(|c| async move {
            c.state().set("title", "Trellis");
            let prefix = c.context().get("action_prefix").unwrap_or(Value::Null);
            c.state().set("action_prefix", prefix);
            Ok(())
        });

        for (alias, child) in &children {
            core.component(*alias, child);
        }

        core.render(Render::new().template_named(&templates, TEMPLATE));
    })
}

pub fn guarded() -> Component {
    Component::new("Guarded", |core: &Core| {
        core.render(Render::new().redirect("/"));
    })
}

/// Page template rendering each section through its own template.
///
/// Sections whose template is missing from `builder` are left out.
pub fn template(builder: &dyn TemplateBuilder) -> impl Template {
    let sections: Vec<(&'static str, Arc<dyn Template>)> = SECTIONS
        .iter()
        .filter_map(|(alias, name)| match builder.build(name) {
            Some(template) => Some((*alias, template)),
            None => {
                tracing::warn!(%alias, template = %name, "section template missing");
                None
            }
        })
        .collect();

    move |state: &Value| -> Result<Vec<u8>> {
        let mut body = String::new();
        for (alias, template) in &sections {
            if state.get(*alias).is_none() {
                continue;
            }
            let markup = template.render(&state[*alias])?;
            body.push_str(&format!(
                "<section id=\"{}\">{}</section>\n",
                escape(alias),
                String::from_utf8_lossy(&markup)
            ));
        }

        let html = format!(
            r#"<!doctype html>
<html>
<head>
  <meta charset="utf-8">
  <title>{title}</title>
  <script src="/trellis.js" defer></script>
</head>
<body data-trellis-prefix="{prefix}">
  <h1>{title}</h1>
{body}</body>
</html>
"#,
            title = text(&state["title"]),
            prefix = text(&state["action_prefix"]),
            body = body,
        );
        Ok(html.into_bytes())
    }
}
