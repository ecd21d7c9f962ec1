//! Runtime settings, derived from the environment.
//!
//! The daemon has a single knob: log verbosity, read from
//! `FSNOTIFIER_LOG_LEVEL`. The settings value is built once in `main` and
//! passed down; nothing here is process-global.

use std::env;

/// Environment variable selecting log verbosity.
pub const LOG_LEVEL_ENV: &str = "FSNOTIFIER_LOG_LEVEL";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    Debug,
    Info,
    #[default]
    Warning,
    Error,
    Off,
}

impl LogLevel {
    /// Reads the level from the environment; unknown or unset values fall
    /// back to the default.
    pub fn from_env() -> Self {
        env::var(LOG_LEVEL_ENV)
            .ok()
            .and_then(|value| Self::parse(&value))
            .unwrap_or_default()
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "debug" => Some(Self::Debug),
            "info" => Some(Self::Info),
            "warning" => Some(Self::Warning),
            "error" => Some(Self::Error),
            "off" => Some(Self::Off),
            _ => None,
        }
    }

    /// The equivalent `tracing` filter directive.
    pub fn as_filter(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warning => "warn",
            Self::Error => "error",
            Self::Off => "off",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_known_levels() {
        assert_eq!(LogLevel::parse("debug"), Some(LogLevel::Debug));
        assert_eq!(LogLevel::parse("info"), Some(LogLevel::Info));
        assert_eq!(LogLevel::parse("warning"), Some(LogLevel::Warning));
        assert_eq!(LogLevel::parse("error"), Some(LogLevel::Error));
        assert_eq!(LogLevel::parse("off"), Some(LogLevel::Off));
    }

    #[test]
    fn test_parse_rejects_unknown() {
        assert_eq!(LogLevel::parse("verbose"), None);
        assert_eq!(LogLevel::parse(""), None);
        assert_eq!(LogLevel::parse("WARNING"), None);
    }

    #[test]
    fn test_default_is_warning() {
        assert_eq!(LogLevel::default(), LogLevel::Warning);
        assert_eq!(LogLevel::Warning.as_filter(), "warn");
    }
}
