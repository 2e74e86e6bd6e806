// State management module
//
// This module provides the StateManager which wraps AppState with thread-safe access
// using Arc<RwLock<T>> and emits change events for front-end updates.

use crate::models::{AppState, Settings};
use crate::services::installer::DownloadProgress;
use crate::services::update::{UpdateCheckState, UpdateResult};
use camino::{Utf8Path, Utf8PathBuf};
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;

/// Change events emitted when state is modified
///
/// These events are emitted to notify interested parties (primarily the front end)
/// about state changes without requiring them to poll the state.
#[derive(Clone, Debug, PartialEq)]
pub enum StateChange {
    /// Token, URL or preferences changed
    SettingsChanged,

    /// A conversion has been accepted and is about to run
    ConversionStarted,

    /// The running conversion finished
    ConversionFinished {
        success: bool,
        output_dir: Option<Utf8PathBuf>,
    },

    /// The recent conversions list changed
    RecentConversionsChanged {
        count: usize,
    },

    /// Current operation has changed
    OperationChanged {
        operation: String,
    },

    /// The update check moved to another state
    UpdateStatusChanged {
        status: String,
    },

    /// An update install started or finished
    InstallChanged {
        installing: bool,
    },

    /// More of the update archive arrived
    DownloadProgressed {
        downloaded: u64,
        total: Option<u64>,
    },

    /// A line was added to the output pane
    OutputAppended {
        line: String,
    },
}

/// Thread-safe state manager with event emission
///
/// This is the central state management component that:
/// - Provides thread-safe access to [`AppState`] via `Arc<RwLock<T>>`
/// - Detects state changes and emits [`StateChange`] events
/// - Guards transitions (one conversion at a time, one update check at a time)
/// - Supports subscribing to state changes via tokio broadcast channels
///
/// # Usage
///
/// Only the interactive side calls the mutating methods. Background workers
/// hand their results to [`crate::ui::AppController`] through
/// [`crate::ui::WorkerBridge`], which applies them here.
///
/// # Related Types
///
/// - [`crate::models::AppState`]: The underlying state structure
/// - [`StateChange`]: Event types emitted on state mutations
/// - [`crate::config::ConfigStore`]: Loads the settings record into state
pub struct StateManager {
    /// The application state protected by RwLock for thread-safe access
    state: Arc<RwLock<AppState>>,

    /// Broadcast channel for emitting state change events
    state_tx: broadcast::Sender<StateChange>,
}

impl StateManager {
    /// Create a new StateManager with default state
    ///
    /// # Returns
    /// A new StateManager with a broadcast channel buffer of 100 events
    pub fn new() -> Self {
        let (state_tx, _) = broadcast::channel(100);
        Self {
            state: Arc::new(RwLock::new(AppState::default())),
            state_tx,
        }
    }

    /// Get a read-only snapshot of the current state
    pub fn snapshot(&self) -> AppState {
        self.state.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Execute a function with read access to the state
    ///
    /// # Example
    /// ```ignore
    /// let busy = state_manager.read(|state| state.is_converting);
    /// ```
    pub fn read<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&AppState) -> R,
    {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        f(&state)
    }

    /// Update the state and emit change events
    ///
    /// 1. Captures the old state
    /// 2. Applies the update function
    /// 3. Detects what changed
    /// 4. Emits appropriate events
    ///
    /// # Returns
    /// A vector of StateChange events that were emitted
    pub fn update<F>(&self, update_fn: F) -> Vec<StateChange>
    where
        F: FnOnce(&mut AppState),
    {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());

        // The output log only grows, so its length stands in for a copy
        let log = std::mem::take(&mut state.output_log);
        let old_state = state.clone();
        let old_log_len = log.len();
        state.output_log = log;

        update_fn(&mut state);

        let changes = Self::detect_changes(&old_state, old_log_len, &state);
        drop(state);

        for change in &changes {
            // Ignore send errors - it's OK if no one is listening
            let _ = self.state_tx.send(change.clone());
        }

        changes
    }

    /// Subscribe to state change events
    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.state_tx.subscribe()
    }

    fn detect_changes(old: &AppState, old_log_len: usize, new: &AppState) -> Vec<StateChange> {
        let mut changes = Vec::new();

        if old.token != new.token
            || old.url != new.url
            || old.auto_save != new.auto_save
            || old.theme != new.theme
            || old.last_used != new.last_used
        {
            changes.push(StateChange::SettingsChanged);
        }

        if old.is_converting != new.is_converting {
            if new.is_converting {
                changes.push(StateChange::ConversionStarted);
            } else {
                changes.push(StateChange::ConversionFinished {
                    success: new.last_conversion_ok.unwrap_or(false),
                    output_dir: old.current_output_dir.clone(),
                });
            }
        }

        if old.recent_conversions != new.recent_conversions {
            changes.push(StateChange::RecentConversionsChanged {
                count: new.recent_conversions.len(),
            });
        }

        if old.current_operation != new.current_operation {
            changes.push(StateChange::OperationChanged {
                operation: new.current_operation.clone(),
            });
        }

        if old.update != new.update {
            changes.push(StateChange::UpdateStatusChanged {
                status: new.update.label().to_string(),
            });
        }

        if old.is_installing != new.is_installing {
            changes.push(StateChange::InstallChanged {
                installing: new.is_installing,
            });
        }

        if old.download_progress != new.download_progress {
            if let Some(progress) = new.download_progress {
                changes.push(StateChange::DownloadProgressed {
                    downloaded: progress.downloaded,
                    total: progress.total,
                });
            }
        }

        if new.output_log.len() > old_log_len {
            for line in &new.output_log[old_log_len..] {
                changes.push(StateChange::OutputAppended { line: line.clone() });
            }
        }

        changes
    }

    // Convenience methods for common state updates

    /// Load a settings record into the input fields
    pub fn load_settings(&self, settings: &Settings) -> Vec<StateChange> {
        self.update(|state| state.apply_settings(settings))
    }

    /// Replace the token and URL inputs
    pub fn set_inputs(&self, token: &str, url: &str) -> Vec<StateChange> {
        self.update(|state| {
            state.token = token.to_string();
            state.url = url.to_string();
        })
    }

    /// Append a line to the output pane
    pub fn append_output(&self, line: impl Into<String>) -> Vec<StateChange> {
        let line = line.into();
        self.update(|state| state.push_output(line))
    }

    pub fn set_operation(&self, operation: impl Into<String>) -> Vec<StateChange> {
        let operation = operation.into();
        self.update(|state| state.current_operation = operation)
    }

    /// Mark a conversion as running
    ///
    /// # Returns
    /// `None` if a conversion or an update install is already running; the
    /// state is left untouched in that case
    pub fn try_start_conversion(&self) -> Option<Vec<StateChange>> {
        let mut accepted = false;
        let changes = self.update(|state| {
            if state.is_busy() {
                return;
            }
            accepted = true;
            state.is_converting = true;
            state.current_output_dir = None;
            state.current_operation = "Converting...".to_string();
        });
        accepted.then_some(changes)
    }

    /// Record where the running conversion writes its files
    pub fn set_output_dir(&self, output_dir: &Utf8Path) -> Vec<StateChange> {
        self.update(|state| state.current_output_dir = Some(output_dir.to_path_buf()))
    }

    /// Mark the running conversion as finished
    ///
    /// Successful runs are added to the recent conversions list.
    pub fn finish_conversion(&self, success: bool) -> Vec<StateChange> {
        self.update(|state| {
            if success {
                if let Some(dir) = state.current_output_dir.clone() {
                    state.add_recent_conversion(&dir);
                }
                state.current_operation = "Done".to_string();
            } else {
                state.current_operation = "Stopped".to_string();
            }
            state.last_conversion_ok = Some(success);
            state.is_converting = false;
            state.current_output_dir = None;
        })
    }

    /// Move the update check from `Idle` to `Checking`
    ///
    /// # Returns
    /// `None` if a check is already running or its verdict hasn't been acknowledged
    pub fn begin_update_check(&self) -> Option<Vec<StateChange>> {
        let mut accepted = false;
        let changes = self.update(|state| accepted = state.update.begin());
        accepted.then_some(changes)
    }

    pub fn finish_update_check(&self, result: UpdateResult) -> Vec<StateChange> {
        self.update(|state| {
            state.update.finish(result);
        })
    }

    /// Return the update check to `Idle` after its verdict was shown
    pub fn acknowledge_update(&self) -> Vec<StateChange> {
        self.update(|state| state.update.acknowledge())
    }

    /// Mark an update install as running
    ///
    /// # Returns
    /// `None` if a conversion or another install is running
    pub fn try_start_install(&self) -> Option<Vec<StateChange>> {
        let mut accepted = false;
        let changes = self.update(|state| {
            if state.is_busy() {
                return;
            }
            accepted = true;
            state.is_installing = true;
            state.download_progress = None;
            state.current_operation = "Downloading update...".to_string();
        });
        accepted.then_some(changes)
    }

    pub fn set_download_progress(&self, progress: DownloadProgress) -> Vec<StateChange> {
        self.update(|state| state.download_progress = Some(progress))
    }

    pub fn finish_install(&self, success: bool) -> Vec<StateChange> {
        self.update(|state| {
            state.is_installing = false;
            state.current_operation = if success {
                "Update installed".to_string()
            } else {
                "Update failed".to_string()
            };
        })
    }

    /// Current update-check state
    pub fn update_state(&self) -> UpdateCheckState {
        self.read(|state| state.update.clone())
    }

    /// Get an Arc reference to the state for read access from other threads
    pub fn state_arc(&self) -> Arc<RwLock<AppState>> {
        Arc::clone(&self.state)
    }
}

impl Default for StateManager {
    fn default() -> Self {
        Self::new()
    }
}
