//! Configuration system
//!
//! Emulator settings are plain serde structs that can be loaded from TOML or
//! RON files. The instance reads an [`EmulatorConfig`] once at creation.

pub use serde::{Deserialize, Serialize};

use crate::backends::BackendKind;

/// Environment variable overriding the configured backend
pub const BACKEND_ENV_VAR: &str = "VKGL_BACKEND";

/// Configuration trait
pub trait Config: Serialize + for<'de> Deserialize<'de> + Default {
    /// Load configuration from file
    fn load_from_file(path: &str) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(ConfigError::Io)?;

        // Try different formats
        if path.ends_with(".toml") {
            toml::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))
        } else if path.ends_with(".ron") {
            ron::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))
        } else {
            Err(ConfigError::UnsupportedFormat(path.to_string()))
        }
    }

    /// Save configuration to file
    fn save_to_file(&self, path: &str) -> Result<(), ConfigError> {
        let contents = if path.ends_with(".toml") {
            toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))?
        } else if path.ends_with(".ron") {
            ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
                .map_err(|e| ConfigError::Serialize(e.to_string()))?
        } else {
            return Err(ConfigError::UnsupportedFormat(path.to_string()));
        };

        std::fs::write(path, contents).map_err(ConfigError::Io)
    }
}

/// Configuration errors
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Parse error
    #[error("Parse error: {0}")]
    Parse(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialize(String),

    /// Unsupported format
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// A value is outside its accepted range
    #[error("Invalid value for {field}: {reason}")]
    Invalid {
        /// Offending field
        field: &'static str,
        /// Why the value was rejected
        reason: String,
    },
}

/// Log verbosity, mirrored onto `log::LevelFilter`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// No logging
    Off,
    /// Errors only
    Error,
    /// Warnings and errors
    Warn,
    /// Lifecycle information
    Info,
    /// Record/replay tracing
    Debug,
    /// Everything, including per-call driver traffic
    Trace,
}

impl From<LogLevel> for log::LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Off => Self::Off,
            LogLevel::Error => Self::Error,
            LogLevel::Warn => Self::Warn,
            LogLevel::Info => Self::Info,
            LogLevel::Debug => Self::Debug,
            LogLevel::Trace => Self::Trace,
        }
    }
}

/// Emulator-wide settings read at instance creation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmulatorConfig {
    /// Application name reported in logs
    pub application_name: String,
    /// Backend variant selected at instance creation
    pub backend: BackendKind,
    /// Log verbosity used by [`crate::logging::init_from_config`]
    pub log_level: LogLevel,
    /// Forward legacy driver debug output to registered messengers
    pub enable_debug_output: bool,
    /// Report contract violations through the debug callback channel
    pub report_contract_violations: bool,
    /// Geometry cache size that triggers a one-time growth warning; 0 disables it
    pub geometry_cache_warn_threshold: usize,
    /// Maximum push constant block size in bytes
    pub max_push_constant_size: u32,
    /// Force a GLSL `#version` instead of deriving it from the backend
    pub glsl_version_override: Option<u32>,
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        Self {
            application_name: "vkgl".to_string(),
            backend: BackendKind::LegacyCore45,
            log_level: LogLevel::Warn,
            enable_debug_output: cfg!(debug_assertions),
            report_contract_violations: true,
            geometry_cache_warn_threshold: 4096,
            max_push_constant_size: 128,
            glsl_version_override: None,
        }
    }
}

impl Config for EmulatorConfig {}

impl EmulatorConfig {
    /// Configuration for the software no-op backend
    pub fn noop() -> Self {
        Self {
            backend: BackendKind::Noop,
            ..Self::default()
        }
    }

    /// Apply the `VKGL_BACKEND` environment override, if present
    pub fn with_env_overrides(mut self) -> Result<Self, ConfigError> {
        if let Ok(value) = std::env::var(BACKEND_ENV_VAR) {
            self.backend = value.parse().map_err(|reason| ConfigError::Invalid {
                field: "backend",
                reason,
            })?;
            log::info!("Backend overridden by {}: {:?}", BACKEND_ENV_VAR, self.backend);
        }
        Ok(self)
    }

    /// Check ranges that serde cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_push_constant_size == 0 || self.max_push_constant_size % 4 != 0 {
            return Err(ConfigError::Invalid {
                field: "max_push_constant_size",
                reason: format!("{} is not a non-zero multiple of 4", self.max_push_constant_size),
            });
        }
        if let Some(version) = self.glsl_version_override {
            if !(330..=460).contains(&version) {
                return Err(ConfigError::Invalid {
                    field: "glsl_version_override",
                    reason: format!("{version} is not a core-profile GLSL version"),
                });
            }
        }
        Ok(())
    }

    /// Geometry cache warning threshold, if enabled
    pub const fn geometry_warn_threshold(&self) -> Option<usize> {
        match self.geometry_cache_warn_threshold {
            0 => None,
            threshold => Some(threshold),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(EmulatorConfig::default().validate().is_ok());
        assert_eq!(EmulatorConfig::noop().backend, BackendKind::Noop);
    }

    #[test]
    fn test_validate_rejects_bad_push_constant_size() {
        let config = EmulatorConfig {
            max_push_constant_size: 30,
            ..EmulatorConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "max_push_constant_size", .. })
        ));
    }

    #[test]
    fn test_toml_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vkgl.toml");
        let path = path.to_str().unwrap();

        let config = EmulatorConfig {
            backend: BackendKind::LegacyCore33,
            geometry_cache_warn_threshold: 0,
            ..EmulatorConfig::default()
        };
        config.save_to_file(path).unwrap();

        let loaded = EmulatorConfig::load_from_file(path).unwrap();
        assert_eq!(loaded.backend, BackendKind::LegacyCore33);
        assert_eq!(loaded.geometry_cache_warn_threshold, 0);
        assert_eq!(loaded.geometry_warn_threshold(), None);
        assert_eq!(EmulatorConfig::default().geometry_warn_threshold(), Some(4096));
    }

    #[test]
    fn test_ron_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vkgl.ron");
        std::fs::write(&path, "(backend: Noop, log_level: debug)").unwrap();

        let loaded = EmulatorConfig::load_from_file(path.to_str().unwrap()).unwrap();
        assert_eq!(loaded.backend, BackendKind::Noop);
        assert_eq!(loaded.log_level, LogLevel::Debug);
        assert_eq!(loaded.max_push_constant_size, 128);
    }

    #[test]
    fn test_unsupported_extension() {
        assert!(matches!(
            EmulatorConfig::load_from_file("settings.json"),
            Err(ConfigError::Io(_)) | Err(ConfigError::UnsupportedFormat(_))
        ));
    }
}
