//! Shared types and errors for the Leadflow lead pipeline.
//!
//! This crate provides the foundational types used across the other Leadflow crates:
//! - `LeadflowError`: unified error taxonomy
//! - `Lead` / `PipelineCard`: a prospect and its pipeline state
//! - `Stage` / `StageHistoryEntry`: stage positions and the transition audit trail
//! - `ContactAttempt`, `Task`, `Representative`, `LeadOutcome`

pub mod contact;
pub mod lead;
pub mod representative;
pub mod stage;
pub mod task;

pub use contact::{AttemptDraft, AttemptOutcome, ContactAttempt, ContactChannel, NextAction};
pub use lead::{
    DisqualificationReason, Lead, LeadOrigin, LeadOutcome, OriginChannel, PipelineCard,
};
pub use representative::Representative;
pub use stage::{QualificationStatus, Stage, StageHistoryEntry};
pub use task::{NotificationKind, Task, TaskKind, TaskNotification, TaskPriority, TaskStatus};

/// Identifier shared by a lead and its pipeline card.
pub type CardId = uuid::Uuid;

/// Identifier of a task owned by a pipeline card.
pub type TaskId = uuid::Uuid;

/// Unified error type for all Leadflow subsystems.
#[derive(Debug, thiserror::Error)]
pub enum LeadflowError {
    // === Input Errors ===
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("{entity} '{id}' not found")]
    NotFound { entity: &'static str, id: String },

    // === Store Errors ===
    #[error("Store operation '{operation}' failed: {message}")]
    Persistence { operation: String, message: String },

    #[error("Store operation '{operation}' timed out after {timeout_ms}ms")]
    StoreTimeout { operation: String, timeout_ms: u64 },

    #[error("Stored record '{id}' is malformed: {message}")]
    MalformedRecord { id: String, message: String },

    #[error("Card '{card_id}' was modified concurrently (expected version {expected}, found {actual})")]
    Conflict {
        card_id: CardId,
        expected: u64,
        actual: u64,
    },

    // === Pipeline Policy Errors ===
    #[error("Task '{task_id}' reached its redistribution limit ({attempts}/{max}); escalate manually")]
    RedistributionLimitExceeded {
        task_id: TaskId,
        attempts: u32,
        max: u32,
    },

    #[error("Card '{card_id}' needs a qualify or disqualify decision before entering the outcome stage")]
    OutcomeRequired { card_id: CardId },

    #[error("No active representative is available for distribution")]
    NoActiveRepresentatives,

    // === Generic ===
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl LeadflowError {
    /// Shorthand for a [`LeadflowError::NotFound`] on a card id.
    pub fn card_not_found(id: CardId) -> Self {
        LeadflowError::NotFound {
            entity: "card",
            id: id.to_string(),
        }
    }

    /// Shorthand for a [`LeadflowError::NotFound`] on a task id.
    pub fn task_not_found(id: TaskId) -> Self {
        LeadflowError::NotFound {
            entity: "task",
            id: id.to_string(),
        }
    }

    /// Returns `true` for failures of a store round-trip (including timeouts).
    pub fn is_persistence(&self) -> bool {
        matches!(
            self,
            LeadflowError::Persistence { .. } | LeadflowError::StoreTimeout { .. }
        )
    }

    /// Returns `true` if the error is transient and the operation may succeed on retry.
    pub fn is_retryable(&self) -> bool {
        self.is_persistence() || matches!(self, LeadflowError::Conflict { .. })
    }

    /// Returns `true` for policy conditions an operator is expected to act on.
    pub fn is_actionable(&self) -> bool {
        matches!(
            self,
            LeadflowError::RedistributionLimitExceeded { .. }
                | LeadflowError::NoActiveRepresentatives
        )
    }

    /// Returns `true` if the caller supplied bad input; retrying will not help.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            LeadflowError::Validation(_)
                | LeadflowError::NotFound { .. }
                | LeadflowError::OutcomeRequired { .. }
        )
    }
}

/// A convenience alias for `Result<T, LeadflowError>`.
pub type Result<T> = std::result::Result<T, LeadflowError>;
