pub mod cli;
pub mod loader;
pub mod models;

pub use cli::CliArgs;
pub use loader::{load_from_env, resolve_base_path, ConfigLoadError};
pub use models::{Config, ConfigSource, RateLimitConfig, RateLimitSpec};
