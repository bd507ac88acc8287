pub mod cli;
pub mod engine;
pub mod error;
pub mod logging;
pub mod models;
pub mod services;
pub mod utils;

pub use cli::{Cli, Commands};
pub use engine::Engine;
pub use models::{Config, OutputFormat};
