//! Runtime configuration loaded from `<root>/config.toml`.
//!
//! ```toml
//! [remote]
//! enabled = true
//! base_url = "https://example.invalid/functions/v1/coin-jar"
//! room_code = "family"
//! auth_token = "..."
//! poll_interval_ms = 5000
//!
//! [coins]
//! jar_capacity = 100
//!
//! [record]
//! max_record_coins = 15
//! conversion_base = 45
//! slider_formula = "value * weight"
//! ```
//!
//! A missing file yields defaults. Environment variables override the remote
//! endpoint so a shared config can be pointed at another room.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{JarError, Result};
use crate::settings::Settings;

pub const BASE_URL_ENV: &str = "COINJAR_BASE_URL";
pub const ROOM_CODE_ENV: &str = "COINJAR_ROOM_CODE";
pub const AUTH_TOKEN_ENV: &str = "COINJAR_AUTH_TOKEN";

pub const MIN_POLL_INTERVAL_MS: u64 = 5_000;
pub const MIN_TIMEOUT_MS: u64 = 1_000;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub coins: CoinsConfig,
    #[serde(default)]
    pub record: RecordSection,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub enabled: bool,
    pub base_url: String,
    pub room_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
    pub poll_interval_ms: u64,
    pub timeout_ms: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: String::new(),
            room_code: String::new(),
            auth_token: None,
            poll_interval_ms: MIN_POLL_INTERVAL_MS,
            timeout_ms: 10_000,
        }
    }
}

impl RemoteConfig {
    /// Sync runs only with an explicit opt-in and a complete endpoint.
    pub fn is_active(&self) -> bool {
        self.enabled && !self.base_url.trim().is_empty() && !self.room_code.trim().is_empty()
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(MIN_POLL_INTERVAL_MS))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.max(MIN_TIMEOUT_MS))
    }

    pub fn token(&self) -> Option<&str> {
        self.auth_token
            .as_deref()
            .map(str::trim)
            .filter(|token| !token.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoinsConfig {
    pub jar_capacity: u32,
}

impl Default for CoinsConfig {
    fn default() -> Self {
        Self {
            jar_capacity: Settings::default().jar_capacity,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordSection {
    pub max_record_coins: u32,
    pub conversion_base: u32,
    pub slider_formula: String,
}

impl Default for RecordSection {
    fn default() -> Self {
        Self {
            max_record_coins: 15,
            conversion_base: 45,
            slider_formula: crate::record::DEFAULT_SLIDER_FORMULA.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl AppConfig {
    /// Reads the config file; a missing file is not an error.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs_err::read_to_string(path).map_err(|source| JarError::Io {
            context: format!("reading {}", path.display()),
            source,
        })?;
        Self::parse(&content, path)
    }

    pub fn parse(content: &str, path: &Path) -> Result<Self> {
        toml::from_str::<AppConfig>(content).map_err(|err| JarError::ConfigMalformed {
            path: path.to_path_buf(),
            details: err.to_string(),
        })
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).map_err(|err| JarError::ConfigMalformed {
            path: path.to_path_buf(),
            details: err.to_string(),
        })?;
        if let Some(parent) = path.parent() {
            fs_err::create_dir_all(parent).map_err(|source| JarError::ConfigWriteFailed {
                path: PathBuf::from(parent),
                source,
            })?;
        }
        fs_err::write(path, content).map_err(|source| JarError::ConfigWriteFailed {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Applies `COINJAR_*` endpoint overrides from the process environment.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        if let Some(base_url) = non_empty(BASE_URL_ENV) {
            self.remote.base_url = base_url;
        }
        if let Some(room_code) = non_empty(ROOM_CODE_ENV) {
            self.remote.room_code = room_code;
        }
        if let Some(token) = non_empty(AUTH_TOKEN_ENV) {
            self.remote.auth_token = Some(token);
        }
        self
    }

    /// Settings used before anything is loaded from disk or the room.
    pub fn default_settings(&self) -> Settings {
        Settings {
            jar_capacity: self.coins.jar_capacity,
            ..Settings::default()
        }
        .clamped()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_is_default() {
        let temp = TempDir::new().unwrap();
        let config = AppConfig::load(&temp.path().join("config.toml")).unwrap();
        assert_eq!(config, AppConfig::default());
        assert!(!config.remote.is_active());
    }

    #[test]
    fn partial_file_keeps_section_defaults() {
        let config = AppConfig::parse(
            "[remote]\nenabled = true\nbase_url = \"http://localhost:9\"\nroom_code = \"r1\"\n",
            Path::new("config.toml"),
        )
        .unwrap();
        assert!(config.remote.is_active());
        assert_eq!(config.remote.poll_interval_ms, MIN_POLL_INTERVAL_MS);
        assert_eq!(config.record.max_record_coins, 15);
        assert_eq!(config.record.conversion_base, 45);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let err = AppConfig::parse("[remote\n", Path::new("config.toml")).unwrap_err();
        assert!(matches!(err, JarError::ConfigMalformed { .. }));
    }

    #[test]
    fn poll_interval_and_timeout_are_floored() {
        let remote = RemoteConfig {
            poll_interval_ms: 100,
            timeout_ms: 5,
            ..RemoteConfig::default()
        };
        assert_eq!(remote.poll_interval(), Duration::from_millis(5_000));
        assert_eq!(remote.timeout(), Duration::from_millis(1_000));
    }

    #[test]
    fn env_overrides_replace_non_empty_values() {
        let config = AppConfig::default().with_overrides(|key| match key {
            BASE_URL_ENV => Some("http://room.test".to_string()),
            ROOM_CODE_ENV => Some("   ".to_string()),
            AUTH_TOKEN_ENV => Some("secret".to_string()),
            _ => None,
        });
        assert_eq!(config.remote.base_url, "http://room.test");
        assert_eq!(config.remote.room_code, "");
        assert_eq!(config.remote.token(), Some("secret"));
    }

    #[test]
    fn default_settings_clamp_configured_capacity() {
        let mut config = AppConfig::default();
        config.coins.jar_capacity = 5_000;
        assert_eq!(config.default_settings().jar_capacity, 500);
    }

    #[test]
    fn save_then_load() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("config.toml");
        let mut config = AppConfig::default();
        config.remote.room_code = "kitchen".to_string();
        config.save(&path).unwrap();
        assert_eq!(AppConfig::load(&path).unwrap(), config);
    }
}
