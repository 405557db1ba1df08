//! Process level helpers shared by the therapy log server.
pub mod config;

use std::path::PathBuf;

pub use config::{AppConfig, ConfigError, Environment, DEFAULT_BIND_ADDR};

/// Reads `.env` from the working directory or one of its parents. Returns the
/// file that was loaded; a missing file is not an error.
pub fn load_env_file() -> Option<PathBuf> {
    dotenvy::dotenv().ok()
}
