//! # bazaar-settings
//!
//! Configuration for the Bazaar realtime messaging server.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`BazaarSettings::default()`]
//! 2. **Settings file**: `~/.bazaar/settings.json` or an explicit path
//!    (deep-merged over defaults)
//! 3. **Environment variables**: `BAZAAR_*` overrides (highest priority)

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{apply_overrides, load_settings, load_settings_from_path, overlay, settings_path};
pub use types::*;
