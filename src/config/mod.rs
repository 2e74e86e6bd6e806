use crate::models::{AppConfig, Settings, Theme};
use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use chrono::Utc;
use serde::{Deserialize, de};
use ::config::{Config, Environment, Map};
use std::fs;
use std::io;
use thiserror::Error;

/// Prefix of the environment variables that override [`AppConfig`] defaults.
pub const ENV_PREFIX: &str = "FIGMA_CONVERTER";

/// Errors raised while reading or writing the settings file
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Settings file {path} is corrupt: {source}")]
    Corrupt {
        path: Utf8PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Nothing to save - both token and url are empty")]
    NothingToSave,

    #[error("Failed to access {path}: {source}")]
    Io {
        path: Utf8PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to serialize settings: {0}")]
    Serialize(#[source] serde_json::Error),
}

/// Build the process-wide [`AppConfig`] from defaults and `FIGMA_CONVERTER_*`
/// environment variables.
pub fn load_app_config() -> Result<AppConfig> {
    load_app_config_from(None)
}

/// Like [`load_app_config`], reading overrides from `env` instead of the
/// process environment when given.
pub fn load_app_config_from(env: Option<Map<String, String>>) -> Result<AppConfig> {
    let defaults = AppConfig::new(default_data_dir());

    let settings = Config::builder()
        .set_default("data_dir", defaults.data_dir.as_str())?
        .set_default("tool", defaults.tool.as_str())?
        .set_default("feed_url", defaults.feed_url.as_str())?
        .set_default("repository", defaults.repository.as_str())?
        .set_default("current_version", defaults.current_version.as_str())?
        .set_default("http_timeout_secs", defaults.http_timeout_secs)?
        .set_default("conversion_timeout_secs", defaults.conversion_timeout_secs)?
        .set_default("debug_mode", defaults.debug_mode)?
        .add_source(Environment::with_prefix(ENV_PREFIX).source(env))
        .build()
        .context("Failed to build application configuration")?;

    let config: AppConfig = settings
        .try_deserialize()
        .context("Invalid application configuration")?;

    Ok(config)
}

/// `<per-user data dir>/figma-converter`, or `.figma-converter` in the working
/// directory when the platform has no such directory.
fn default_data_dir() -> Utf8PathBuf {
    dirs::data_dir()
        .and_then(|dir| Utf8PathBuf::try_from(dir).ok())
        .map(|dir| dir.join(crate::APP_NAME))
        .unwrap_or_else(|| Utf8PathBuf::from(".figma-converter"))
}

/// Reads and writes the JSON settings record.
///
/// Every save rewrites the whole record; there is a single writer (the
/// interactive side), so no locking is involved.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    settings_path: Utf8PathBuf,
}

impl ConfigStore {
    pub fn new<P: AsRef<Utf8Path>>(settings_path: P) -> Self {
        Self {
            settings_path: settings_path.as_ref().to_path_buf(),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(config.settings_path())
    }

    pub fn settings_path(&self) -> &Utf8Path {
        &self.settings_path
    }

    /// Load the settings record.
    ///
    /// # Returns
    /// The stored settings, defaults if the file doesn't exist, or
    /// [`ConfigError::Corrupt`] if it exists but isn't a valid record
    pub fn load(&self) -> Result<Settings, ConfigError> {
        if !self.settings_path.exists() {
            tracing::warn!(
                "Settings file not found at {}, using defaults",
                self.settings_path
            );
            return Ok(Settings::default());
        }

        let contents = fs::read_to_string(&self.settings_path).map_err(|source| ConfigError::Io {
            path: self.settings_path.clone(),
            source,
        })?;

        let corrupt = |source: serde_json::Error| ConfigError::Corrupt {
            path: self.settings_path.clone(),
            source,
        };
        let document: serde_json::Value = serde_json::from_str(&contents).map_err(corrupt)?;
        // serde also fills structs from sequences; only an object is a record
        if !document.is_object() {
            return Err(corrupt(<serde_json::Error as de::Error>::custom(
                "settings must be a JSON object",
            )));
        }
        let settings = Settings::deserialize(document).map_err(corrupt)?;

        tracing::info!("Loaded settings from {}", self.settings_path);
        Ok(settings)
    }

    /// Save a full settings record built from the given values.
    pub fn save(
        &self,
        token: &str,
        url: &str,
        auto_save: bool,
        theme: Theme,
    ) -> Result<Settings, ConfigError> {
        let settings = Settings {
            token: token.to_string(),
            url: url.to_string(),
            auto_save,
            theme,
            last_used: None,
        };
        self.save_settings(&settings)
    }

    /// Write `settings`, stamping `last_used` with the current time.
    ///
    /// # Returns
    /// The record exactly as written
    pub fn save_settings(&self, settings: &Settings) -> Result<Settings, ConfigError> {
        let mut record = settings.clone();
        record.last_used = Some(Utc::now());
        self.write_json(&self.settings_path, &record)?;

        tracing::info!("Saved settings to {}", self.settings_path);
        Ok(record)
    }

    /// Persist empty credentials, keeping the auto-save and theme preferences.
    pub fn clear(&self, current: &Settings) -> Result<Settings, ConfigError> {
        let cleared = Settings {
            token: String::new(),
            url: String::new(),
            ..current.clone()
        };
        self.save_settings(&cleared)
    }

    /// Write `settings` without the timestamp to `path`.
    pub fn export_to(&self, path: &Utf8Path, settings: &Settings) -> Result<(), ConfigError> {
        let exported = Settings {
            last_used: None,
            ..settings.clone()
        };
        self.write_json(path, &exported)?;

        tracing::info!("Settings exported to {}", path);
        Ok(())
    }

    fn write_json(&self, path: &Utf8Path, settings: &Settings) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| ConfigError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let json = serde_json::to_string_pretty(settings).map_err(ConfigError::Serialize)?;
        fs::write(path, json).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_store() -> (ConfigStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let dir = Utf8PathBuf::try_from(temp_dir.path().to_path_buf()).unwrap();
        let store = ConfigStore::new(dir.join("nested").join("config.json"));
        (store, temp_dir)
    }

    #[test]
    fn test_load_missing_file_returns_defaults() {
        let (store, _temp_dir) = create_test_store();
        assert_eq!(store.load().unwrap(), Settings::default());
    }

    #[test]
    fn test_save_creates_parent_directories() {
        let (store, _temp_dir) = create_test_store();
        store.save("tok", "url", true, Theme::Light).unwrap();
        assert!(store.settings_path().exists());
    }

    #[test]
    fn test_load_corrupt_file() {
        let (store, _temp_dir) = create_test_store();
        fs::create_dir_all(store.settings_path().parent().unwrap()).unwrap();
        fs::write(store.settings_path(), "{ not json").unwrap();

        let err = store.load().unwrap_err();
        assert!(matches!(err, ConfigError::Corrupt { .. }));
    }

    #[test]
    fn test_clear_keeps_preferences() {
        let (store, _temp_dir) = create_test_store();
        let saved = store.save("tok", "url", false, Theme::Dark).unwrap();

        store.clear(&saved).unwrap();
        let loaded = store.load().unwrap();

        assert!(loaded.token.is_empty());
        assert!(loaded.url.is_empty());
        assert!(!loaded.auto_save);
        assert_eq!(loaded.theme, Theme::Dark);
    }

    #[test]
    fn test_load_app_config_defaults() {
        let config = load_app_config_from(Some(Map::new())).unwrap();
        assert_eq!(config.tool, "tkdesigner");
        assert_eq!(config.http_timeout_secs, 5);
        assert_eq!(config.conversion_timeout_secs, 300);
        assert!(config.install_dir.is_none());
        assert!(!config.debug_mode);
    }

    #[test]
    fn test_load_app_config_env_overrides() {
        let mut env = Map::new();
        env.insert("FIGMA_CONVERTER_TOOL".to_string(), "/opt/tkdesigner".to_string());
        env.insert("FIGMA_CONVERTER_DATA_DIR".to_string(), "/tmp/figma-data".to_string());
        env.insert(
            "FIGMA_CONVERTER_FEED_URL".to_string(),
            "http://127.0.0.1:9000".to_string(),
        );
        env.insert("FIGMA_CONVERTER_CONVERSION_TIMEOUT_SECS".to_string(), "60".to_string());
        env.insert("FIGMA_CONVERTER_DEBUG_MODE".to_string(), "true".to_string());

        let config = load_app_config_from(Some(env)).unwrap();
        assert_eq!(config.tool, "/opt/tkdesigner");
        assert_eq!(config.data_dir, Utf8PathBuf::from("/tmp/figma-data"));
        assert_eq!(config.feed_url, "http://127.0.0.1:9000");
        assert_eq!(config.conversion_timeout_secs, 60);
        assert!(config.debug_mode);
    }
}
