//! Editor context
//!
//! Everything the store and coordinator need from their environment,
//! passed explicitly: event bus, current user, known users, configuration.

use serde::{Deserialize, Serialize};
use spanlab_common::{EditorConfig, EditorEvent, EventBus};
use std::sync::Arc;

/// A user known to the editor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentUser {
    pub id: i64,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub display_name: String,
}

impl CurrentUser {
    pub fn new(id: i64, email: &str, display_name: &str) -> Self {
        Self {
            id,
            email: Some(email.to_string()),
            display_name: display_name.to_string(),
        }
    }
}

/// Shared handles for one editor instance
#[derive(Debug, Clone)]
pub struct EditorContext {
    pub events: Arc<EventBus>,
    pub user: CurrentUser,
    /// Users referenced by drafts and annotations (author resolution)
    pub users: Vec<CurrentUser>,
    pub config: Arc<EditorConfig>,
}

impl EditorContext {
    pub fn new(config: EditorConfig, user: CurrentUser) -> Self {
        let events = Arc::new(EventBus::new(config.events.capacity));
        Self {
            events,
            user,
            users: Vec::new(),
            config: Arc::new(config),
        }
    }

    pub fn with_users(mut self, users: Vec<CurrentUser>) -> Self {
        self.users = users;
        self
    }

    /// Add users not yet known (by id)
    pub fn merge_users(&mut self, users: impl IntoIterator<Item = CurrentUser>) {
        for user in users {
            if !self.users.iter().any(|u| u.id == user.id) {
                self.users.push(user);
            }
        }
    }

    pub fn find_user_by_email(&self, email: &str) -> Option<&CurrentUser> {
        self.users
            .iter()
            .find(|u| u.email.as_deref().is_some_and(|e| e.eq_ignore_ascii_case(email)))
    }

    pub fn emit(&self, event: EditorEvent) {
        tracing::trace!(event = event.event_type(), "Publishing editor event");
        self.events.emit_lossy(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_and_find_users() {
        let mut ctx = EditorContext::new(EditorConfig::default(), CurrentUser::new(1, "me@example.com", "Me"))
            .with_users(vec![CurrentUser::new(2, "Jane@Example.com", "Jane")]);
        ctx.merge_users(vec![
            CurrentUser::new(2, "dup@example.com", "Dup"),
            CurrentUser::new(3, "bob@example.com", "Bob"),
        ]);

        assert_eq!(ctx.users.len(), 2);
        assert_eq!(ctx.find_user_by_email("jane@example.com").map(|u| u.id), Some(2));
        assert!(ctx.find_user_by_email("nobody@example.com").is_none());
    }

    #[test]
    fn test_event_bus_uses_configured_capacity() {
        let mut config = EditorConfig::default();
        config.events.capacity = 16;
        let ctx = EditorContext::new(config, CurrentUser::new(1, "me@example.com", "Me"));
        assert_eq!(ctx.events.capacity(), 16);
    }
}
