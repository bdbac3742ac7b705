//! Configuration module for symgate.
//!
//! Handles the TOML settings file, environment variables, and durations.

mod settings;

pub use settings::{
    expand_env_vars, parse_duration, CapabilitySettings, LoggingSettings, ServerSettings,
    Settings, SettingsError, WorkerSettings,
};
