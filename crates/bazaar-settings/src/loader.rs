//! Layered settings loading.
//!
//! Compiled defaults, then the settings file overlaid field by field, then
//! `BAZAAR_*` environment overrides. The result is validated last.

use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::{Result, SettingsError};
use crate::types::{BazaarSettings, LogLevel};

/// `~/.bazaar/settings.json`, or under `/tmp` when `HOME` is unset.
pub fn settings_path() -> PathBuf {
    let home = std::env::var_os("HOME").map_or_else(|| PathBuf::from("/tmp"), PathBuf::from);
    home.join(".bazaar").join("settings.json")
}

/// Load from [`settings_path`].
pub fn load_settings() -> Result<BazaarSettings> {
    load_settings_from_path(&settings_path())
}

/// Load from `path`, apply environment overrides and validate.
///
/// A missing file is not an error; every other read or parse failure is.
pub fn load_settings_from_path(path: &Path) -> Result<BazaarSettings> {
    let mut settings = load_file_layer(path)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

fn load_file_layer(path: &Path) -> Result<BazaarSettings> {
    let mut doc = serde_json::to_value(BazaarSettings::default())?;
    match std::fs::read_to_string(path) {
        Ok(text) => {
            let file: Value = serde_json::from_str(&text).map_err(|source| {
                SettingsError::Syntax {
                    path: path.to_path_buf(),
                    source,
                }
            })?;
            overlay(&mut doc, file);
            debug!(path = %path.display(), "settings file applied");
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "no settings file, using defaults");
        }
        Err(source) => {
            return Err(SettingsError::Read {
                path: path.to_path_buf(),
                source,
            });
        }
    }
    Ok(serde_json::from_value(doc)?)
}

/// Write `patch` into `base` in place.
///
/// Objects recurse key by key, `null` fields leave `base` untouched, and any
/// other value (arrays included) replaces what was there.
pub fn overlay(base: &mut Value, patch: Value) {
    match (base, patch) {
        (Value::Object(fields), Value::Object(patch_fields)) => {
            for (key, value) in patch_fields {
                if value.is_null() {
                    continue;
                }
                match fields.get_mut(&key) {
                    Some(slot) => overlay(slot, value),
                    None => {
                        let _ = fields.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

// ── Environment overrides ───────────────────────────────────────────────────

/// Apply `BAZAAR_*` variables from the process environment.
pub fn apply_env_overrides(settings: &mut BazaarSettings) {
    apply_overrides(settings, |key| std::env::var(key).ok());
}

/// Apply overrides read through `lookup`. Blank values are skipped;
/// unparsable or out-of-range ones are logged and skipped.
pub fn apply_overrides<F>(settings: &mut BazaarSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let env = Overrides { lookup };

    if let Some(v) = env.text("BAZAAR_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env.number("BAZAAR_PORT", 0..=u16::MAX) {
        settings.server.port = v;
    }
    if let Some(v) = env.number("BAZAAR_SEND_QUEUE_CAPACITY", 1..=1_000_000) {
        settings.server.send_queue_capacity = v;
    }

    if let Some(v) = env.number("BAZAAR_HEARTBEAT_TIMEOUT_MS", 10..=600_000) {
        settings.heartbeat.probe_timeout_ms = v;
    }
    if let Some(v) = env.number("BAZAAR_HEARTBEAT_INTERVAL_MS", 0..=600_000) {
        settings.heartbeat.idle_interval_ms = v;
    }
    if let Some(v) = env.number("BAZAAR_HEARTBEAT_MAX_MISSES", 1..=100) {
        settings.heartbeat.max_misses = v;
    }
    if let Some(v) = env.number("BAZAAR_DELIVERY_RETRY_MS", 10..=600_000) {
        settings.delivery.retry_interval_ms = v;
    }
    if let Some(v) = env.number("BAZAAR_DELIVERY_MAX_ATTEMPTS", 1..=100) {
        settings.delivery.max_attempts = v;
    }

    if let Some(v) = env.text("BAZAAR_JWT_SECRET") {
        settings.auth.jwt_secret = v;
    }
    if let Some(v) = env.text("BAZAAR_JWT_ISSUER") {
        settings.auth.issuer = Some(v);
    }
    if let Some(v) = env.text("BAZAAR_MARKETPLACE_URL") {
        settings.marketplace.base_url = v;
    }
    if let Some(v) = env.text("BAZAAR_MARKETPLACE_API_KEY") {
        settings.marketplace.api_key = Some(v);
    }

    if let Some(v) = env.text("BAZAAR_LOG_LEVEL") {
        match LogLevel::parse(&v) {
            Some(level) => settings.logging.level = level,
            None => warn!(key = "BAZAAR_LOG_LEVEL", value = %v, "unknown log level, ignoring"),
        }
    }
    if let Some(v) = env.flag("BAZAAR_LOG_JSON") {
        settings.logging.json = v;
    }
}

/// `true`/`yes`/`on`/`1` or `false`/`no`/`off`/`0`, any case.
pub fn parse_flag(raw: &str) -> Option<bool> {
    let raw = raw.trim();
    if ["true", "yes", "on", "1"].iter().any(|t| raw.eq_ignore_ascii_case(t)) {
        Some(true)
    } else if ["false", "no", "off", "0"].iter().any(|f| raw.eq_ignore_ascii_case(f)) {
        Some(false)
    } else {
        None
    }
}

struct Overrides<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> Overrides<F> {
    fn text(&self, key: &str) -> Option<String> {
        (self.lookup)(key).filter(|v| !v.trim().is_empty())
    }

    fn number<T>(&self, key: &str, allowed: RangeInclusive<T>) -> Option<T>
    where
        T: FromStr + PartialOrd,
    {
        let raw = self.text(key)?;
        let value = raw.trim().parse::<T>().ok().filter(|n| allowed.contains(n));
        if value.is_none() {
            warn!(key, value = %raw, "numeric override unparsable or out of range, ignoring");
        }
        value
    }

    fn flag(&self, key: &str) -> Option<bool> {
        let raw = self.text(key)?;
        let value = parse_flag(&raw);
        if value.is_none() {
            warn!(key, value = %raw, "boolean override not recognised, ignoring");
        }
        value
    }
}
