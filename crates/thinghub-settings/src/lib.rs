//! # thinghub-settings
//!
//! Protocol server configuration with layered sources.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`ProtocolsConfig::default()`]
//! 2. **Settings file**: JSON, deep-merged over defaults
//! 3. **Environment variables**: `THINGHUB_*` overrides (highest priority)
//!
//! Unlike a process-wide settings singleton, the loaded [`ProtocolsConfig`]
//! is handed to the transport manager explicitly.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{apply_env_overrides, apply_overrides_from, deep_merge, load_config_from_path};
pub use types::{DEFAULT_HTTPS_PORT, DEFAULT_SSESC_PATH, DEFAULT_WSS_PATH, ProtocolsConfig};
