// App Controller - Wires user input to the conversion and self-update services
//
// This module contains the AppController which coordinates between:
// - Front end input (console prompts today, any widget toolkit tomorrow)
// - StateManager (application state)
// - ConfigStore, UrlNormalizer, ConversionService (convert flow)
// - UpdateChecker, UpdateInstaller (self-update flow)
// - WorkerBridge (async workers report back by message)
//
// It handles:
// - Validating input and persisting settings
// - Spawning conversions and update checks on tokio
// - Applying worker results to state on the interactive side

use crate::config::{ConfigError, ConfigStore};
use crate::metrics::Metrics;
use crate::models::{AppConfig, Settings, Theme};
use crate::services::conversion::{
    ConversionError, ConversionService, ProcessRunner, TokioProcessRunner, create_output_dir,
};
use crate::services::installer::{self, InstallError, InstalledUpdate, UpdateInstaller};
use crate::services::update::{UpdateCheckState, UpdateChecker, UpdateResult};
use crate::services::url::UrlNormalizer;
use crate::state::{StateChange, StateManager};
use crate::ui::bridge::{WorkerBridge, WorkerEvent};
use anyhow::{Context, Result, anyhow};
use camino::{Utf8Path, Utf8PathBuf};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::mpsc;

/// Rejected before anything was started because a required field is blank
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Please enter both the Figma token and the file URL")]
pub struct MissingInputs;

/// Coordinates the convert flow and the self-update flow
///
/// All mutating methods run on the interactive side. Long-running work is
/// spawned on tokio through the [`WorkerBridge`]; its results come back as
/// [`WorkerEvent`]s that [`AppController::handle_event`] applies to state.
///
/// # Example
/// ```ignore
/// let config = Arc::new(load_app_config()?);
/// let runtime = tokio::runtime::Runtime::new()?;
///
/// let mut controller = AppController::new(config, runtime.handle().clone())?;
/// controller.load_settings()?;
/// controller.set_inputs(&token, &url);
///
/// let output_dir = controller.start_conversion()?;
/// runtime.block_on(controller.drive_until(|state| !state.is_converting));
/// ```
pub struct AppController<R: ProcessRunner + 'static = TokioProcessRunner> {
    config: Arc<AppConfig>,
    store: ConfigStore,
    normalizer: UrlNormalizer,
    converter: Arc<ConversionService<R>>,
    checker: Arc<UpdateChecker>,
    installer: Arc<UpdateInstaller>,

    /// Shared state manager
    state_manager: Arc<StateManager>,

    bridge: WorkerBridge,
    events: mpsc::Receiver<WorkerEvent>,
    metrics: Arc<Metrics>,

    /// Set once an update was unpacked; consumed by [`AppController::restart_into_update`]
    pending_restart: Option<InstalledUpdate>,

    conversion_started_at: Option<Instant>,
}

impl AppController<TokioProcessRunner> {
    /// Create a controller that launches the real conversion tool
    pub fn new(config: Arc<AppConfig>, tokio_handle: tokio::runtime::Handle) -> Result<Self> {
        Self::with_runner(config, tokio_handle, TokioProcessRunner)
    }
}

impl<R: ProcessRunner + 'static> AppController<R> {
    /// Create a controller with a custom process runner
    ///
    /// # Arguments
    /// * `config` - Process-wide configuration
    /// * `tokio_handle` - Handle to the tokio runtime for spawning workers
    /// * `runner` - Launches the conversion tool
    pub fn with_runner(
        config: Arc<AppConfig>,
        tokio_handle: tokio::runtime::Handle,
        runner: R,
    ) -> Result<Self> {
        let install_dir = match &config.install_dir {
            Some(dir) => dir.clone(),
            None => current_exe_dir()?,
        };

        let checker =
            UpdateChecker::new(&config).context("Failed to create update checker HTTP client")?;
        let installer = UpdateInstaller::new(install_dir, config.http_timeout())
            .context("Failed to create update download HTTP client")?;
        let converter =
            ConversionService::with_runner(&config.tool, config.conversion_timeout(), runner);
        let (bridge, events) = WorkerBridge::new(tokio_handle);

        tracing::info!("App controller initialized");

        Ok(Self {
            store: ConfigStore::from_config(&config),
            config,
            normalizer: UrlNormalizer::new(),
            converter: Arc::new(converter),
            checker: Arc::new(checker),
            installer: Arc::new(installer),
            state_manager: Arc::new(StateManager::new()),
            bridge,
            events,
            metrics: Arc::new(Metrics::new()),
            pending_restart: None,
            conversion_started_at: None,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn state_manager(&self) -> &Arc<StateManager> {
        &self.state_manager
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub fn store(&self) -> &ConfigStore {
        &self.store
    }

    // Settings

    /// Load the settings file into the input fields
    ///
    /// A corrupt file is reported and leaves the defaults in place; the file
    /// itself is not touched until the next save.
    pub fn load_settings(&self) -> Result<Settings, ConfigError> {
        match self.store.load() {
            Ok(settings) => {
                self.state_manager.load_settings(&settings);
                Ok(settings)
            }
            Err(e) => {
                tracing::error!("Failed to load settings: {}", e);
                self.state_manager.load_settings(&Settings::default());
                self.state_manager
                    .append_output(format!("Could not load settings: {e}"));
                Err(e)
            }
        }
    }

    pub fn set_inputs(&self, token: &str, url: &str) {
        self.state_manager.set_inputs(token, url);
    }

    /// Explicit save of the current inputs
    ///
    /// Refuses with [`ConfigError::NothingToSave`] when both fields are blank.
    pub fn save_settings(&self) -> Result<Settings, ConfigError> {
        let settings = self.state_manager.read(|s| s.to_settings());
        if settings.token.is_empty() && settings.url.is_empty() {
            return Err(ConfigError::NothingToSave);
        }

        let saved = self.persist(&settings)?;
        self.state_manager.append_output("Settings saved");
        Ok(saved)
    }

    /// Persist empty credentials and clear the input fields
    pub fn clear_settings(&self) -> Result<(), ConfigError> {
        let current = self.state_manager.read(|s| s.to_settings());
        let cleared = self.store.clear(&current)?;
        self.state_manager.load_settings(&cleared);
        self.state_manager.append_output("Settings cleared");
        Ok(())
    }

    /// Write the current inputs to `path`
    pub fn export_settings(&self, path: &Utf8Path) -> Result<(), ConfigError> {
        let settings = self.state_manager.read(|s| s.to_settings());
        self.store.export_to(path, &settings)?;
        self.state_manager
            .append_output(format!("Settings exported to {path}"));
        Ok(())
    }

    /// Flip between light and dark, persisting when auto-save is on
    pub fn toggle_theme(&self) -> Result<Theme, ConfigError> {
        self.state_manager.update(|s| s.theme = s.theme.toggled());
        let settings = self.state_manager.read(|s| s.to_settings());
        if settings.auto_save {
            self.persist(&settings)?;
        }
        Ok(settings.theme)
    }

    pub fn set_auto_save(&self, enabled: bool) -> Result<(), ConfigError> {
        self.state_manager.update(|s| s.auto_save = enabled);
        let settings = self.state_manager.read(|s| s.to_settings());
        // Turning auto-save off is itself a preference worth keeping
        self.persist(&settings)?;
        Ok(())
    }

    fn persist(&self, settings: &Settings) -> Result<Settings, ConfigError> {
        let saved = self.store.save_settings(settings)?;
        self.state_manager.update(|s| s.last_used = saved.last_used);
        Ok(saved)
    }

    // Conversion

    /// Validate the inputs and start a conversion in the background
    ///
    /// Order: both fields present, URL normalizes, no conversion running,
    /// output directory created, settings auto-saved. The worker's result
    /// arrives later as [`WorkerEvent::ConversionFinished`].
    ///
    /// # Errors
    /// [`MissingInputs`], [`crate::services::UrlFormatError`] or
    /// [`ConversionError`] (`Busy`, `OutputDir`); use `downcast_ref` to tell
    /// them apart
    ///
    /// # Returns
    /// The freshly created output directory
    pub fn start_conversion(&mut self) -> Result<Utf8PathBuf> {
        let settings = self.state_manager.read(|s| s.to_settings());
        if settings.token.is_empty() || settings.url.is_empty() {
            return Err(MissingInputs.into());
        }

        let canonical = self.normalizer.normalize(&settings.url)?;

        if self.state_manager.try_start_conversion().is_none() {
            tracing::warn!("Conversion requested while another is running");
            return Err(ConversionError::Busy.into());
        }

        let output_dir = match create_output_dir(&self.config.data_dir) {
            Ok(dir) => dir,
            Err(e) => {
                tracing::error!("{}", e);
                self.state_manager.append_output(e.to_string());
                self.state_manager.finish_conversion(false);
                return Err(e.into());
            }
        };
        self.state_manager.set_output_dir(&output_dir);

        if settings.auto_save {
            if let Err(e) = self.persist(&settings) {
                // Not fatal: the conversion doesn't depend on the saved copy
                tracing::warn!("Auto-save failed: {}", e);
                self.state_manager
                    .append_output(format!("Could not save settings: {e}"));
            }
        }

        self.state_manager
            .append_output(format!("Converting {} into {}", canonical, output_dir));
        self.metrics.record_conversion_started();
        self.conversion_started_at = Some(Instant::now());

        let converter = Arc::clone(&self.converter);
        let worker = self.bridge.clone();
        let token = settings.token;
        let dir = output_dir.clone();
        self.bridge.spawn_async(move || async move {
            let result = converter.convert(&token, &canonical, &dir).await;
            worker
                .deliver(WorkerEvent::ConversionFinished {
                    output_dir: dir,
                    result,
                })
                .await;
        });

        Ok(output_dir)
    }

    // Self-update

    /// Start an update check in the background
    ///
    /// # Returns
    /// false if a check is already running or its verdict is still pending
    pub fn start_update_check(&self) -> bool {
        if self.state_manager.begin_update_check().is_none() {
            tracing::debug!("Update check already in progress");
            return false;
        }

        let checker = Arc::clone(&self.checker);
        let current = self.config.current_version.clone();
        let worker = self.bridge.clone();
        self.bridge.spawn_async(move || async move {
            let result = checker.check(&current).await;
            worker.deliver(WorkerEvent::UpdateChecked(result)).await;
        });
        true
    }

    /// Download and unpack the update found by the last check
    ///
    /// When the release carries no assets, the release page URL is returned
    /// as the error message so the user can fetch it by hand.
    pub fn start_update_install(&mut self) -> Result<()> {
        let update = match self.state_manager.update_state() {
            UpdateCheckState::UpdateFound(update) => update,
            other => return Err(anyhow!("No update to install (status: {})", other.label())),
        };

        let Some(url) = update.download_url().map(str::to_string) else {
            let page = update
                .release_page
                .clone()
                .unwrap_or_else(|| self.config.release_page_url());
            self.state_manager
                .append_output(format!("Release {} has no download; see {page}", update.version));
            return Err(anyhow!("Release has no downloadable assets, see {page}"));
        };

        if self.state_manager.try_start_install().is_none() {
            return Err(anyhow!("Cannot install while a conversion is running"));
        }
        self.state_manager
            .append_output(format!("Downloading version {}", update.version));

        let installer = Arc::clone(&self.installer);
        let worker = self.bridge.clone();
        self.bridge.spawn_async(move || async move {
            let progress = worker.clone();
            let result = installer
                .apply(&url, move |p| progress.post(WorkerEvent::DownloadProgress(p)))
                .await;
            worker.deliver(WorkerEvent::UpdateInstalled(result)).await;
        });
        Ok(())
    }

    /// An update has been unpacked and is waiting for a restart
    pub fn restart_pending(&self) -> bool {
        self.pending_restart.is_some()
    }

    /// Replace the running process with the freshly installed version
    ///
    /// Only returns on failure; the current process then keeps running.
    pub fn restart_into_update(&mut self) -> Result<(), InstallError> {
        let Some(installed) = self.pending_restart.take() else {
            return Err(InstallError::Interrupted(
                "no installed update to restart into".to_string(),
            ));
        };

        self.metrics.log_summary();
        match installer::restart(installed) {
            Ok(never) => match never {},
            Err(e) => {
                tracing::error!("Restart failed: {}", e);
                self.state_manager
                    .append_output(format!("Restart failed: {e}"));
                Err(e)
            }
        }
    }

    // Worker events

    /// Apply every event that has already arrived
    ///
    /// # Returns
    /// The number of events applied
    pub fn process_pending_events(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(event) = self.events.try_recv() {
            self.handle_event(event);
            applied += 1;
        }
        applied
    }

    /// Wait for the next worker event
    pub async fn next_event(&mut self) -> Option<WorkerEvent> {
        self.events.recv().await
    }

    /// Apply worker events until `done` holds for the current state
    pub async fn drive_until<F>(&mut self, done: F)
    where
        F: Fn(&crate::models::AppState) -> bool,
    {
        while !self.state_manager.read(&done) {
            match self.events.recv().await {
                Some(event) => {
                    self.handle_event(event);
                }
                None => break,
            }
        }
    }

    /// Apply one worker result to state
    pub fn handle_event(&mut self, event: WorkerEvent) -> Vec<StateChange> {
        match event {
            WorkerEvent::ConversionFinished { output_dir, result } => {
                self.finish_conversion(&output_dir, result)
            }
            WorkerEvent::UpdateChecked(result) => {
                let failed = matches!(result, UpdateResult::CheckFailed(_));
                self.metrics.record_update_check(failed);
                self.state_manager.finish_update_check(result)
            }
            WorkerEvent::DownloadProgress(progress) => {
                self.state_manager.set_download_progress(progress)
            }
            WorkerEvent::UpdateInstalled(result) => self.finish_install(result),
        }
    }

    fn finish_conversion(
        &mut self,
        output_dir: &Utf8Path,
        result: Result<crate::services::CompletedProcess, ConversionError>,
    ) -> Vec<StateChange> {
        let elapsed = self
            .conversion_started_at
            .take()
            .map(|t| t.elapsed())
            .unwrap_or_default();
        let success = result.is_ok();
        self.metrics.record_conversion_finished(success, elapsed);

        let mut changes = Vec::new();
        let output = match &result {
            Ok(completed) => Some(completed.output.as_str()),
            Err(e) => e.output(),
        };
        if let Some(output) = output {
            for line in output.lines().filter(|l| !l.trim().is_empty()) {
                changes.extend(self.state_manager.append_output(line));
            }
        }

        let message = match &result {
            Ok(_) => {
                tracing::info!("Conversion finished in {:.1}s", elapsed.as_secs_f64());
                format!("Conversion complete: {output_dir}")
            }
            Err(e) => format!("Conversion failed: {e}"),
        };
        changes.extend(self.state_manager.append_output(message));
        changes.extend(self.state_manager.finish_conversion(success));
        changes
    }

    fn finish_install(
        &mut self,
        result: Result<InstalledUpdate, InstallError>,
    ) -> Vec<StateChange> {
        match result {
            Ok(installed) => {
                tracing::info!("Update unpacked into {}", installed.target_dir());
                let mut changes = self.state_manager.append_output(format!(
                    "Update installed ({} files), restart to finish",
                    installed.files()
                ));
                self.pending_restart = Some(installed);
                changes.extend(self.state_manager.finish_install(true));
                changes
            }
            Err(e) => {
                tracing::error!("Update install failed: {}", e);
                let mut changes = self
                    .state_manager
                    .append_output(format!("Update failed: {e}"));
                changes.extend(self.state_manager.finish_install(false));
                changes
            }
        }
    }
}

/// Directory holding the running executable
fn current_exe_dir() -> Result<Utf8PathBuf> {
    let exe = std::env::current_exe().context("Failed to locate the running executable")?;
    let exe = Utf8PathBuf::try_from(exe).context("Executable path is not valid UTF-8")?;
    exe.parent()
        .map(Utf8Path::to_path_buf)
        .ok_or_else(|| anyhow!("Executable {} has no parent directory", exe))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::conversion::{CompletedProcess, MockProcessRunner};
    use crate::services::url::UrlFormatError;
    use futures_util::FutureExt;
    use std::time::Duration;
    use tempfile::TempDir;

    fn test_config(temp_dir: &TempDir) -> Arc<AppConfig> {
        let dir = Utf8PathBuf::try_from(temp_dir.path().to_path_buf()).unwrap();
        let mut config = AppConfig::new(dir.join("data"));
        config.install_dir = Some(dir.join("install"));
        // Nothing listens here; checks fail fast if a test ever starts one
        config.feed_url = "http://127.0.0.1:9".to_string();
        Arc::new(config)
    }

    fn succeeding_runner() -> MockProcessRunner {
        let mut runner = MockProcessRunner::new();
        runner.expect_run().returning(|_, _| {
            async {
                Ok(CompletedProcess {
                    output: "Generated 3 files".to_string(),
                    exit_code: Some(0),
                    duration: Duration::from_millis(5),
                })
            }
            .boxed()
        });
        runner
    }

    #[test]
    fn test_start_conversion_requires_both_inputs() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let temp_dir = TempDir::new().unwrap();
        let mut controller = AppController::with_runner(
            test_config(&temp_dir),
            rt.handle().clone(),
            MockProcessRunner::new(),
        )
        .unwrap();

        controller.set_inputs("figd_token", "   ");
        let err = controller.start_conversion().unwrap_err();
        assert!(err.downcast_ref::<MissingInputs>().is_some());
    }

    #[test]
    fn test_start_conversion_rejects_bad_url() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let temp_dir = TempDir::new().unwrap();
        let mut controller = AppController::with_runner(
            test_config(&temp_dir),
            rt.handle().clone(),
            MockProcessRunner::new(),
        )
        .unwrap();

        controller.set_inputs("figd_token", "not a url");
        let err = controller.start_conversion().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<UrlFormatError>(),
            Some(UrlFormatError::NoFileId(_))
        ));
        // Nothing was started
        assert!(!controller.state_manager().read(|s| s.is_converting));
    }

    #[test]
    fn test_conversion_completes_and_is_recorded() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let temp_dir = TempDir::new().unwrap();
        let mut controller = AppController::with_runner(
            test_config(&temp_dir),
            rt.handle().clone(),
            succeeding_runner(),
        )
        .unwrap();

        controller.set_inputs("figd_token", "https://www.figma.com/design/abc123/App");
        let output_dir = controller.start_conversion().unwrap();
        assert!(output_dir.is_dir());

        rt.block_on(async {
            tokio::time::timeout(
                Duration::from_secs(5),
                controller.drive_until(|s| !s.is_converting),
            )
            .await
            .unwrap()
        });

        let state = controller.state_manager().snapshot();
        assert_eq!(state.last_conversion_ok, Some(true));
        assert_eq!(state.recent_conversions.front(), Some(&output_dir));
        assert!(state.output_log.iter().any(|l| l == "Generated 3 files"));
        // Auto-save is on by default
        assert!(controller.store().settings_path().exists());
    }

    #[test]
    fn test_save_settings_refuses_empty() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let temp_dir = TempDir::new().unwrap();
        let controller = AppController::with_runner(
            test_config(&temp_dir),
            rt.handle().clone(),
            MockProcessRunner::new(),
        )
        .unwrap();

        assert!(matches!(
            controller.save_settings(),
            Err(ConfigError::NothingToSave)
        ));
        assert!(!controller.store().settings_path().exists());
    }

    #[test]
    fn test_install_without_update_rejected() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let temp_dir = TempDir::new().unwrap();
        let mut controller = AppController::with_runner(
            test_config(&temp_dir),
            rt.handle().clone(),
            MockProcessRunner::new(),
        )
        .unwrap();

        assert!(controller.start_update_install().is_err());
        assert!(!controller.restart_pending());
        assert!(controller.restart_into_update().is_err());
    }
}
