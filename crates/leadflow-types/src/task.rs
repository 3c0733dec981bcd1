//! Follow-up tasks owned by a pipeline card.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::TaskId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    FirstContact,
    FollowUp,
    Callback,
    Manual,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::FirstContact => "first_contact",
            TaskKind::FollowUp => "follow_up",
            TaskKind::Callback => "callback",
            TaskKind::Manual => "manual",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Done,
    Overdue,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Done => "done",
            TaskStatus::Overdue => "overdue",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    /// `Done` and `Cancelled` are closed; everything else still needs work.
    pub fn is_open(&self) -> bool {
        !matches!(self, TaskStatus::Done | TaskStatus::Cancelled)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low,
    Medium,
    High,
    Urgent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Assigned,
    Overdue,
    Redistributed,
    Escalated,
}

/// Entry in a task's notification log. Delivery happens elsewhere.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskNotification {
    pub kind: NotificationKind,
    pub representative: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Task {
    pub id: TaskId,
    pub title: String,
    pub description: Option<String>,
    pub kind: TaskKind,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    pub assigned_to: String,
    pub due_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub redistribution_attempts: u32,
    pub max_redistribution_attempts: u32,
    pub notifications: Vec<TaskNotification>,
}

impl Task {
    /// Create a pending task and log its initial assignment.
    pub fn new(
        kind: TaskKind,
        title: impl Into<String>,
        assigned_to: impl Into<String>,
        due_at: DateTime<Utc>,
        created_at: DateTime<Utc>,
        max_redistribution_attempts: u32,
    ) -> Self {
        let assigned_to = assigned_to.into();
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            description: None,
            kind,
            status: TaskStatus::Pending,
            priority: TaskPriority::Medium,
            notifications: vec![TaskNotification {
                kind: NotificationKind::Assigned,
                representative: assigned_to.clone(),
                at: created_at,
            }],
            assigned_to,
            due_at,
            created_at,
            completed_at: None,
            redistribution_attempts: 0,
            max_redistribution_attempts,
        }
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn is_open(&self) -> bool {
        self.status.is_open()
    }

    pub fn is_past_due(&self, now: DateTime<Utc>) -> bool {
        self.is_open() && self.due_at < now
    }

    pub fn redistributions_left(&self) -> u32 {
        self.max_redistribution_attempts
            .saturating_sub(self.redistribution_attempts)
    }
}
