//! # spanlab Editor Library (spanlab-editor)
//!
//! Annotation lifecycle engine for a time-series span labeling editor.
//!
//! **Purpose:** Own the annotations, predictions, drafts and history items of
//! one task, keep a single selection, and coordinate submissions against the
//! backend with a single in-flight request and a bounded busy window.
//!
//! **Architecture:** Synchronous [`LifecycleManager`] behind
//! [`SharedStore`] (`Arc<RwLock<_>>`); async [`SubmissionCoordinator`] talks
//! to a [`Persistence`] implementation and publishes outcomes on the
//! [`spanlab_common::EventBus`].

pub mod annotation;
pub mod context;
pub mod drafts;
pub mod error;
pub mod history;
pub mod lifecycle;
pub mod normalize;
pub mod offset;
pub mod persistence;
pub mod region;
pub mod scheduler;
pub mod submission;
pub mod suggestions;
pub mod task;
pub mod validation;

pub use annotation::{Annotation, HistoryItem};
pub use context::{CurrentUser, EditorContext};
pub use error::{Error, Result};
pub use lifecycle::{LifecycleManager, SeedPolicy, Selection, SharedStore};
pub use persistence::{HttpPersistence, Persistence};
pub use region::Region;
pub use submission::{QueuePosition, SubmissionCoordinator, SubmissionOutcome};
pub use task::Task;
