//! Data models for the figma-converter application.
//!
//! - [`AppState`]: Everything the front end renders (inputs, busy flags, recent conversions, update status)
//! - [`Settings`]: The persisted settings record (`config.json`)
//! - [`AppConfig`]: Process-wide configuration built once at start
//! - [`MAX_CONCURRENT_CONVERSIONS`]: Conversions never overlap
//!
//! # Architecture Note
//!
//! - **Serializable**: `Settings` derives `Serialize`/`Deserialize` for JSON persistence
//! - **Cloneable**: AppState is wrapped in `Arc<RwLock<>>` by [`StateManager`](crate::state::StateManager) for thread-safe access
//! - **Single writer**: State updates go through StateManager's `update()` method, called only from the interactive side

pub mod app_state;
pub mod config;

pub use app_state::{AppState, MAX_CONCURRENT_CONVERSIONS, MAX_RECENT_CONVERSIONS};
pub use self::config::{AppConfig, Settings, Theme};
