use crate::models::{Settings, Theme};
use crate::services::installer::DownloadProgress;
use crate::services::update::UpdateCheckState;
use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use std::collections::VecDeque;

/// Maximum number of conversions that may run at once.
///
/// A second request while one is running is rejected rather than queued; see
/// [`crate::ui::AppController::start_conversion`].
pub const MAX_CONCURRENT_CONVERSIONS: usize = 1;

/// Number of finished conversions kept in the recent list.
pub const MAX_RECENT_CONVERSIONS: usize = 5;

/// Single source of truth for everything the front end renders.
///
/// # Thread Safety
///
/// `AppState` is wrapped in `Arc<RwLock<AppState>>` by [`crate::state::StateManager`].
/// Only the interactive side mutates it; background workers report through
/// [`crate::ui::WorkerBridge`] and never touch it directly.
#[derive(Clone, Debug)]
pub struct AppState {
    // Inputs and preferences
    pub token: String,
    pub url: String,
    pub auto_save: bool,
    pub theme: Theme,
    pub last_used: Option<DateTime<Utc>>,

    // Conversion runtime state
    pub is_converting: bool,
    pub current_output_dir: Option<Utf8PathBuf>,
    pub current_operation: String,
    /// Outcome of the most recent conversion, `None` before the first one
    pub last_conversion_ok: Option<bool>,

    /// Newest first
    pub recent_conversions: VecDeque<Utf8PathBuf>,

    // Self-update
    pub update: UpdateCheckState,
    pub is_installing: bool,
    pub download_progress: Option<DownloadProgress>,

    /// Messages shown in the output pane, oldest first
    pub output_log: Vec<String>,
}

impl Default for AppState {
    fn default() -> Self {
        Self {
            token: String::new(),
            url: String::new(),
            auto_save: true,
            theme: Theme::Light,
            last_used: None,

            is_converting: false,
            current_output_dir: None,
            current_operation: String::new(),
            last_conversion_ok: None,
            recent_conversions: VecDeque::with_capacity(MAX_RECENT_CONVERSIONS),

            update: UpdateCheckState::Idle,
            is_installing: false,
            download_progress: None,

            output_log: Vec::new(),
        }
    }
}

impl AppState {
    /// Copy a loaded settings record into the input fields and preferences.
    pub fn apply_settings(&mut self, settings: &Settings) {
        self.token = settings.token.clone();
        self.url = settings.url.clone();
        self.auto_save = settings.auto_save;
        self.theme = settings.theme;
        self.last_used = settings.last_used;
    }

    /// The settings record described by the current inputs.
    pub fn to_settings(&self) -> Settings {
        Settings {
            token: self.token.trim().to_string(),
            url: self.url.trim().to_string(),
            auto_save: self.auto_save,
            theme: self.theme,
            last_used: self.last_used,
        }
    }

    pub fn has_inputs(&self) -> bool {
        !self.token.trim().is_empty() && !self.url.trim().is_empty()
    }

    /// Put `path` at the front of the recent list, dropping the oldest entry
    /// beyond [`MAX_RECENT_CONVERSIONS`].
    pub fn add_recent_conversion(&mut self, path: &Utf8Path) {
        self.recent_conversions.retain(|p| p != path);
        self.recent_conversions.push_front(path.to_path_buf());
        self.recent_conversions.truncate(MAX_RECENT_CONVERSIONS);
    }

    pub fn push_output(&mut self, line: impl Into<String>) {
        self.output_log.push(line.into());
    }

    pub fn is_busy(&self) -> bool {
        self.is_converting || self.is_installing
    }
}
