//! # spanlab Common Library
//!
//! Shared code for the spanlab editor crates including:
//! - Error type and `Result` alias
//! - Event types (EditorEvent enum) and the EventBus
//! - Configuration loading
//! - Logging initialization
//! - Timestamp and identifier helpers

pub mod config;
pub mod error;
pub mod events;
pub mod logging;
pub mod time;
pub mod uuid_utils;

pub use config::EditorConfig;
pub use error::{Error, Result};
pub use events::{EditorEvent, EventBus};
