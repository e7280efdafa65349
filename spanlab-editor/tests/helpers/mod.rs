//! Test helper modules for spanlab-editor integration tests
//!
//! Provides reusable test infrastructure components:
//! - RecordingPersistence: in-memory backend that records every call
//! - Fixtures: stores, users, regions and annotation records

#![allow(dead_code)]

pub mod fixtures;
pub mod recording_persistence;

// Re-export commonly used types
pub use fixtures::{drain_events, record, span, store_with, test_config, test_user, TASK_ID};
pub use recording_persistence::{Call, RecordingPersistence};
