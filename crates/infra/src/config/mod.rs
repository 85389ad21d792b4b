//! Configuration loading
//!
//! This module loads [`conduit_domain::ConduitConfig`] from environment
//! variables, a `.env` file and TOML/JSON config files.

pub mod loader;

// Re-export commonly used items
pub use loader::{
    apply_env_overrides, load, load_dotenv, load_from_env, load_from_file, probe_config_paths,
    ConfigError,
};
