//! `keel-config`: engine configuration.
//!
//! Typed schema with defaults for every field, YAML loading with `${VAR}`
//! substitution, `KEEL_*` environment overrides and validation.

pub mod defaults;
pub mod env;
pub mod io;
pub mod schema;
pub mod validation;

pub use env::{apply_env_overrides, resolve_env_vars, MissingEnvVarError};
pub use io::{config_dir, config_file_path, load_config, parse_config, write_config};
pub use schema::{EngineConfig, EventBusConfig, LoggingConfig, PluginsConfig, StateConfig};
pub use validation::{validate, ConfigValidationError, ValidationReport};
