//! Small HTML helpers shared by the demo templates.

use serde_json::Value;
use trellis::{COMPONENT_MARKER, STATE_MARKER};

/// Escape text for element content and quoted attribute values.
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

/// Display a JSON value as escaped text. Strings are shown without quotes.
pub fn text(value: &Value) -> String {
    match value {
        Value::String(s) => escape(s),
        Value::Null => String::new(),
        other => escape(&other.to_string()),
    }
}

/// Attributes that bind an element to its component for the client script.
pub fn component_attrs(state: &Value) -> String {
    format!(
        r#"data-trellis-component="{}" data-trellis-state="{}""#,
        text(&state[COMPONENT_MARKER]),
        text(&state[STATE_MARKER])
    )
}

/// A button that invokes `action` with `args` on the enclosing component.
pub fn action_button(action: &str, args: &Value, label: &str) -> String {
    format!(
        r#"<button type="button" data-trellis-action="{}" data-trellis-args="{}">{}</button>"#,
        escape(action),
        escape(&args.to_string()),
        escape(label)
    )
}
