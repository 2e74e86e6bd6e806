// figma-converter - Collects a Figma token and file URL and runs tkdesigner on them
//
// This is the library crate containing the core services, state and front-end
// orchestration. The binary crate (main.rs) provides the console entry point.

pub mod config;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod services;
pub mod state;
pub mod ui;

// Re-export commonly used types for convenience
pub use self::config::{ConfigError, ConfigStore, load_app_config};
pub use metrics::Metrics;
pub use models::{AppConfig, AppState, Settings, Theme};
pub use state::{StateChange, StateManager};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
