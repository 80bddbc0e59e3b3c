//! Browser client for the action endpoint.
//!
//! Clicking an element with `data-trellis-action` posts the enclosing
//! component's state token and the element's JSON args, then replaces the
//! component's element with every fragment as it streams in.

use axum::{
    http::header,
    response::{IntoResponse, Response},
};

/// Served at `/trellis.js`.
pub const CLIENT_SCRIPT: &str = r#"(() => {
  const TERMINATOR = "ssa:end";
  const REDIRECT = "ssa:redirect=";
  const prefix = () => document.body.dataset.trellisPrefix || "/internal/actions";

  async function invoke(root, action, args) {
    const body = new URLSearchParams();
    body.set("State", root.dataset.trellisState || "");
    body.set("Args", args || "[]");

    const res = await fetch(`${prefix()}/${root.dataset.trellisComponent}/${action}`, {
      method: "POST",
      headers: { "Content-Type": "application/x-www-form-urlencoded" },
      body,
    });
    if (!res.ok) {
      console.error("trellis action failed", res.status, await res.text());
      return;
    }

    const reader = res.body.getReader();
    const decoder = new TextDecoder();
    let buffer = "";
    let target = root;
    for (;;) {
      const { value, done } = await reader.read();
      if (done) break;
      buffer += decoder.decode(value, { stream: true });
      let end;
      while ((end = buffer.indexOf(TERMINATOR)) !== -1) {
        const fragment = buffer.slice(0, end);
        buffer = buffer.slice(end + TERMINATOR.length);
        if (fragment.startsWith(REDIRECT)) {
          window.location.assign(fragment.slice(REDIRECT.length));
          return;
        }
        const template = document.createElement("template");
        template.innerHTML = fragment.trim();
        const next = template.content.firstElementChild;
        if (next) {
          target.replaceWith(next);
          target = next;
        }
      }
    }
  }

  document.addEventListener("click", (event) => {
    const trigger = event.target.closest("[data-trellis-action]");
    if (!trigger) return;
    const root = trigger.closest("[data-trellis-component]");
    if (!root) return;
    event.preventDefault();
    invoke(root, trigger.dataset.trellisAction, trigger.dataset.trellisArgs);
  });
})();
"#;

pub async fn client_script() -> Response {
    (
        [(header::CONTENT_TYPE, "application/javascript; charset=utf-8")],
        CLIENT_SCRIPT,
    )
        .into_response()
}
