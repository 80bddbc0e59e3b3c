// Trellis demo server
//
// Serves server-rendered pages built from trellis components and the action
// endpoint that re-runs a single component and streams fresh markup back.

pub mod components;
pub mod config;
pub mod server;

pub use config::*;
