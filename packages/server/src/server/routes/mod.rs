// HTTP routes
pub mod actions;
pub mod client;
pub mod health;
pub mod pages;

pub use actions::*;
pub use client::*;
pub use health::*;
pub use pages::*;
