#![allow(clippy::uninlined_format_args)]

pub mod app;
pub mod backend;
pub mod config;
pub mod data;
pub mod interaction;
pub mod model;
pub mod time;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use app::run;
pub use interaction::{is_liked, PostInteractions};
