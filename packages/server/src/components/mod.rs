// Demo components served by the trellis server
pub mod counter;
pub mod home;
pub mod html;
pub mod loader;
pub mod profile;
pub mod redirector;

use trellis::{Component, ConfigError, Registry, ServerCodec, TemplateSet};

use crate::config::Config;

/// Every template the demo components render with.
pub fn templates() -> TemplateSet {
    let set = TemplateSet::new()
        .with(counter::TEMPLATE, counter::template)
        .with(loader::TEMPLATE, loader::template)
        .with(profile::TEMPLATE, profile::template)
        .with(redirector::TEMPLATE, redirector::template);
    let page = home::template(&set);
    set.with(home::TEMPLATE, page)
}

fn state_codec(config: &Config) -> ServerCodec {
    ServerCodec::new(config.state_dir.clone(), config.state_ttl)
}

/// Components reachable through the action endpoint.
pub fn registry(templates: &TemplateSet, config: &Config) -> Result<Registry, ConfigError> {
    Registry::new()
        .with(counter::component(templates))?
        .with(loader::component(templates))?
        .with(profile::component(templates, state_codec(config)))?
        .with(redirector::component(templates))
}

/// The home page with one of each demo component.
pub fn home(templates: &TemplateSet, config: &Config) -> Component {
    home::component(
        vec![
            ("counter", counter::component(templates)),
            ("loader", loader::component(templates)),
            ("profile", profile::component(templates, state_codec(config))),
            ("redirector", redirector::component(templates)),
        ],
        templates,
    )
}

pub fn guarded() -> Component {
    home::guarded()
}
