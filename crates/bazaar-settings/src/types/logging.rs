//! Logging settings.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Log level.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace-level (most verbose).
    Trace,
    /// Debug-level.
    Debug,
    /// Info-level (default).
    #[default]
    Info,
    /// Warning-level.
    Warn,
    /// Error-level.
    Error,
}

impl LogLevel {
    /// Convert to a tracing filter string.
    pub fn as_filter_str(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    /// Parse a level name (case-insensitive).
    pub fn parse(val: &str) -> Option<Self> {
        match val.to_lowercase().as_str() {
            "trace" => Some(Self::Trace),
            "debug" => Some(Self::Debug),
            "info" => Some(Self::Info),
            "warn" | "warning" => Some(Self::Warn),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

/// Log output settings.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default level for all targets.
    pub level: LogLevel,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
    /// Per-module overrides, e.g. `{"bazaar_server::delivery": "debug"}`.
    pub modules: BTreeMap<String, LogLevel>,
}

impl LoggingSettings {
    /// Build an `EnvFilter` directive string.
    pub fn filter_directive(&self) -> String {
        let mut directive = self.level.as_filter_str().to_string();
        for (module, level) in &self.modules {
            directive.push_str(&format!(",{module}={}", level.as_filter_str()));
        }
        directive
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_levels() {
        assert_eq!(LogLevel::parse("DEBUG"), Some(LogLevel::Debug));
        assert_eq!(LogLevel::parse("warning"), Some(LogLevel::Warn));
        assert_eq!(LogLevel::parse("loud"), None);
    }

    #[test]
    fn directive_includes_module_overrides() {
        let mut settings = LoggingSettings::default();
        let _ = settings
            .modules
            .insert("bazaar_server::delivery".into(), LogLevel::Debug);
        assert_eq!(
            settings.filter_directive(),
            "info,bazaar_server::delivery=debug"
        );
    }

    #[test]
    fn default_directive_is_level_only() {
        assert_eq!(LoggingSettings::default().filter_directive(), "info");
    }
}
