//! # stratus-settings
//!
//! Layered configuration for the Stratus server.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`StratusSettings::default()`]
//! 2. **Settings file**: `~/.stratus/settings.json` or an explicit path,
//!    deep-merged over defaults
//! 3. **Environment variables**: `STRATUS_*` overrides (highest priority)

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, apply_overrides_with, deep_merge, load_file, load_settings,
    load_settings_from_path, settings_path,
};
pub use types::{
    AuthSettings, LoggingSettings, ServerSettings, SessionSettings, StratusSettings,
};
