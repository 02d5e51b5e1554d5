//! # figlink-settings
//!
//! Layered configuration for the figlink relay.
//!
//! Settings are resolved from three layers, lowest priority first:
//! 1. **Compiled defaults**: [`FiglinkSettings::default()`]
//! 2. **Settings file**: `~/.figlink/settings.json`, deep-merged over defaults
//! 3. **Environment**: `FIGLINK_*` (and `PORT`) overrides
//!
//! Command-line flags are applied on top by the binary.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, deep_merge, load_settings, load_settings_from_path, settings_path,
};
pub use types::*;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn re_exports_work() {
        let settings = FiglinkSettings::default();
        assert_eq!(settings.server.port, DEFAULT_PORT);
        let _path = settings_path();
    }
}
