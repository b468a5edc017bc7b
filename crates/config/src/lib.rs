//! Configuration loading, validation, and env substitution.
//!
//! Config files: `parley.toml`, `parley.yaml`, or `parley.json`
//! Searched in `./` then `~/.config/parley/`.
//!
//! Supports `${ENV_VAR}` substitution in all string values.

pub mod env_subst;
pub mod error;
pub mod loader;
pub mod schema;
pub mod validate;

pub use {
    error::{Error, Result},
    loader::{config_dir, discover_and_load, find_config_file, load_config, save_config},
    schema::{
        ChannelsConfig, DebounceConfig, GreetingBand, GreetingConfig, IdentifyBy, ParleyConfig,
        ReaperConfig, ReplyConfig, SessionsConfig,
    },
    validate::{Diagnostic, Severity, ValidationResult, parse_band_minutes, validate, validate_file},
};
