//! Submission and notification type definitions
//!
//! Supporting types for submit/skip/review events and host toasts.

use serde::{Deserialize, Serialize};

/// Severity of a host-facing toast notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToastKind {
    Info,
    Error,
}

impl std::fmt::Display for ToastKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ToastKind::Info => write!(f, "info"),
            ToastKind::Error => write!(f, "error"),
        }
    }
}

/// Review decision carried by accept/reject events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewDecision {
    Accepted,
    Rejected,
}

impl ReviewDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewDecision::Accepted => "accepted",
            ReviewDecision::Rejected => "rejected",
        }
    }
}

/// Which coordinated operation a busy window belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionAction {
    Submit,
    Update,
    Skip,
    Unskip,
    Accept,
    Reject,
}

impl SubmissionAction {
    /// Message shown when the operation fails
    pub fn failure_message(&self) -> &'static str {
        match self {
            SubmissionAction::Submit => "There was an error saving your Annotation",
            SubmissionAction::Update => "There was an error updating your Annotation",
            SubmissionAction::Skip => "Error during skip, try again",
            SubmissionAction::Unskip => "Error during cancel skipping task, try again",
            SubmissionAction::Accept => "Error during accept, try again",
            SubmissionAction::Reject => "Error during reject, try again",
        }
    }
}

impl std::fmt::Display for SubmissionAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SubmissionAction::Submit => "submit",
            SubmissionAction::Update => "update",
            SubmissionAction::Skip => "skip",
            SubmissionAction::Unskip => "unskip",
            SubmissionAction::Accept => "accept",
            SubmissionAction::Reject => "reject",
        };
        write!(f, "{}", name)
    }
}
