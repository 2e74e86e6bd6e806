//! figma-converter - Turn a Figma design file into UI code with tkdesigner
//!
//! Main entry point for the console application.
//!
//! # Overview
//!
//! This binary crate provides the console front end. It initializes:
//! - Configuration ([`AppConfig`] from defaults and `FIGMA_CONVERTER_*` variables)
//! - Logging infrastructure (daily rotating file + stderr output)
//! - Tokio async runtime (conversion, update check and download workers)
//! - App controller ([`AppController`] - state, settings, services)
//!
//! # Execution Flow
//!
//! 1. Build AppConfig
//! 2. Initialize logging → `<data_dir>/logs/figma-converter.<date>`
//! 3. Create tokio runtime
//! 4. Load `<data_dir>/config.json` and start the background update check
//! 5. Prompt for token and URL until both are given, then convert
//! 6. Offer a found update, install it and restart
//! 7. Shutdown tokio runtime with 5s timeout
//!
//! # Exit Codes
//!
//! - `0`: the conversion succeeded
//! - `1`: the conversion failed, input was closed (EOF or Ctrl-C), or a fatal error occurred

use anyhow::{Context, Result};
use figma_converter::ui::{AppController, ConsoleUi, Interrupted};
use figma_converter::{APP_NAME, AppConfig, VERSION, load_app_config};
use std::io;
use std::process::ExitCode;
use std::sync::{Arc, Mutex};
use tracing_appender::non_blocking::WorkerGuard;
use std::time::Duration;

fn main() -> ExitCode {
    let config = match load_app_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e:#}");
            return ExitCode::FAILURE;
        }
    };

    // Held until main returns so buffered log lines are flushed. Shared with
    // the Ctrl-C handler, which exits without unwinding main.
    let guard = match figma_converter::logging::setup_logging(
        &config.log_dir(),
        APP_NAME,
        config.debug_mode,
        true,
    ) {
        Ok(guard) => Arc::new(Mutex::new(Some(guard))),
        Err(e) => {
            eprintln!("Error: {e:#}");
            return ExitCode::FAILURE;
        }
    };

    tracing::info!("Starting {} v{}", APP_NAME, VERSION);

    match run(config, Arc::clone(&guard)) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) if e.downcast_ref::<Interrupted>().is_some() => {
            tracing::info!("System closed by user");
            ExitCode::FAILURE
        }
        Err(e) => {
            tracing::error!("Error: {:#}", e);
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

/// Run one console session
///
/// # Returns
///
/// - `Ok(true)` if the conversion succeeded
/// - `Ok(false)` if it ran and failed
/// - `Err(_)` if input ended early or initialization failed
fn run(config: AppConfig, log_guard: Arc<Mutex<Option<WorkerGuard>>>) -> Result<bool> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .worker_threads(2)
        .thread_name("figma-converter-worker")
        .build()
        .context("Failed to create tokio runtime")?;

    tracing::info!("Tokio runtime initialized with {} worker threads", 2);

    // Ctrl-C while a prompt or the tool is running ends the session
    runtime.spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("System closed by user");
            figma_converter::logging::flush_logs(&log_guard);
            std::process::exit(1);
        }
    });

    let config = Arc::new(config);
    let mut controller = AppController::new(Arc::clone(&config), runtime.handle().clone())?;

    let stdin = io::stdin();
    let mut console = ConsoleUi::new(stdin.lock(), io::stdout());
    let result = console.run(&mut controller, runtime.handle());

    controller.metrics().log_summary();

    runtime.shutdown_timeout(Duration::from_secs(5));
    tracing::info!("Application shutdown complete");

    result
}
