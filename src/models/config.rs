use camino::Utf8PathBuf;
use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::time::Duration;

/// Name of the external conversion tool invoked when nothing overrides it.
pub const DEFAULT_TOOL: &str = "tkdesigner";

/// Base URL of the release feed (GitHub REST API).
pub const DEFAULT_FEED_URL: &str = "https://api.github.com";

/// Repository whose releases are polled for updates.
pub const DEFAULT_REPOSITORY: &str = "fraold/figma-converter";

/// Timeout applied to every update-check HTTP request.
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 5;

/// Timeout applied to a single conversion run.
pub const DEFAULT_CONVERSION_TIMEOUT_SECS: u64 = 300;

/// Process-wide configuration, constructed once at start.
///
/// Built by [`crate::config::load_app_config`] from compiled-in defaults layered
/// with `FIGMA_CONVERTER_*` environment variables, then handed by reference to
/// every component that needs a path, a timeout or the release feed location.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Root of everything the application writes (settings, logs, output folders).
    pub data_dir: Utf8PathBuf,

    /// External conversion tool, resolved through `PATH`.
    pub tool: String,

    pub feed_url: String,
    pub repository: String,

    /// Version of the running binary, compared against the latest release.
    pub current_version: String,

    pub http_timeout_secs: u64,
    pub conversion_timeout_secs: u64,

    /// Directory an update archive is unpacked into. Defaults to the
    /// directory holding the running executable.
    #[serde(default)]
    pub install_dir: Option<Utf8PathBuf>,

    #[serde(default)]
    pub debug_mode: bool,
}

impl AppConfig {
    /// Configuration with every default applied and the given data directory.
    pub fn new(data_dir: impl Into<Utf8PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            tool: DEFAULT_TOOL.to_string(),
            feed_url: DEFAULT_FEED_URL.to_string(),
            repository: DEFAULT_REPOSITORY.to_string(),
            current_version: crate::VERSION.to_string(),
            http_timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
            conversion_timeout_secs: DEFAULT_CONVERSION_TIMEOUT_SECS,
            install_dir: None,
            debug_mode: false,
        }
    }

    pub fn settings_path(&self) -> Utf8PathBuf {
        self.data_dir.join("config.json")
    }

    pub fn log_dir(&self) -> Utf8PathBuf {
        self.data_dir.join("logs")
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn conversion_timeout(&self) -> Duration {
        Duration::from_secs(self.conversion_timeout_secs)
    }

    /// URL of the human-readable page for the latest release.
    pub fn release_page_url(&self) -> String {
        format!("https://github.com/{}/releases/latest", self.repository)
    }
}

/// UI colour theme persisted with the settings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    #[serde(alias = "Light")]
    Light,
    #[serde(alias = "Dark")]
    Dark,
}

impl Theme {
    pub fn toggled(self) -> Self {
        match self {
            Theme::Light => Theme::Dark,
            Theme::Dark => Theme::Light,
        }
    }
}

impl fmt::Display for Theme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Theme::Light => f.write_str("light"),
            Theme::Dark => f.write_str("dark"),
        }
    }
}

/// The persisted settings record (`config.json`).
///
/// Missing keys fall back to the defaults; keys of the wrong type make the
/// whole document invalid. Older releases wrote `auto_save` as the strings
/// `"True"`/`"False"` and `last_used` as `"%Y-%m-%d %H:%M:%S"` local time, both
/// of which are still accepted on read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub token: String,
    pub url: String,

    #[serde(deserialize_with = "deserialize_flexible_bool")]
    pub auto_save: bool,

    pub theme: Theme,

    #[serde(
        deserialize_with = "deserialize_last_used",
        skip_serializing_if = "Option::is_none"
    )]
    pub last_used: Option<DateTime<Utc>>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            token: String::new(),
            url: String::new(),
            auto_save: true,
            theme: Theme::Light,
            last_used: None,
        }
    }
}

impl Settings {
    pub fn new(token: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn has_credentials(&self) -> bool {
        !self.token.trim().is_empty() && !self.url.trim().is_empty()
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum BoolOrText {
    Bool(bool),
    Text(String),
}

fn deserialize_flexible_bool<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    match BoolOrText::deserialize(deserializer)? {
        BoolOrText::Bool(value) => Ok(value),
        BoolOrText::Text(text) if text.eq_ignore_ascii_case("true") => Ok(true),
        BoolOrText::Text(text) if text.eq_ignore_ascii_case("false") => Ok(false),
        BoolOrText::Text(other) => Err(D::Error::custom(format!(
            "invalid boolean value: {other:?}"
        ))),
    }
}

const LEGACY_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

fn deserialize_last_used<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let Some(raw) = Option::<String>::deserialize(deserializer)? else {
        return Ok(None);
    };
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }

    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Ok(Some(parsed.with_timezone(&Utc)));
    }

    let naive = NaiveDateTime::parse_from_str(raw, LEGACY_TIMESTAMP_FORMAT)
        .map_err(|e| D::Error::custom(format!("invalid last_used timestamp {raw:?}: {e}")))?;

    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|local| Some(local.with_timezone(&Utc)))
        .ok_or_else(|| D::Error::custom(format!("nonexistent local time: {raw:?}")))
}
