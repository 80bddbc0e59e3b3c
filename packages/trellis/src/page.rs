//! Full page rendering.

use std::sync::Arc;

use tracing::debug;

use crate::core::Core;
use crate::error::RunError;
use crate::registry::Component;
use crate::render::Rendered;
use crate::scheduler::{Scheduler, SchedulerOptions};
use crate::store::Store;

/// Build `component` as the root of a page, run its whole tree and return
/// the rendered output.
///
/// A failed run returns an error and no partial markup.
pub async fn render_page(
    component: &Component,
    context: Store,
    options: SchedulerOptions,
) -> Result<Rendered, RunError> {
    let scheduler = Arc::new(Scheduler::new(options));
    let core = Core::root(component, context, scheduler);
    core.execute().await?;

    let output = core
        .take_output()
        .ok_or_else(|| RunError::NoOutput(component.name().to_string()))?;
    debug!(
        component = component.name(),
        jobs = core.scheduler().reports().len(),
        "page rendered"
    );
    Ok(output)
}
