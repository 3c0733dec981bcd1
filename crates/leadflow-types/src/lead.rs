//! Leads, their pipeline cards and the terminal outcome.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    CardId, ContactAttempt, LeadflowError, QualificationStatus, Stage, StageHistoryEntry, Task,
    TaskId,
};

// ---------------------------------------------------------------------------
// Lead
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OriginChannel {
    Website,
    Referral,
    Event,
    ColdCall,
    SocialMedia,
    Partner,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeadOrigin {
    pub channel: OriginChannel,
    pub detail: Option<String>,
}

/// An unconverted prospective customer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lead {
    pub id: CardId,
    pub name: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub company: Option<String>,
    pub title: Option<String>,
    pub location: Option<String>,
    pub products: BTreeSet<String>,
    pub origin: LeadOrigin,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisqualificationReason {
    NoBudget,
    NoInterest,
    NoDecisionPower,
    Unreachable,
    WrongContact,
    ChoseCompetitor,
    BadTiming,
    Duplicate,
    Other,
}

impl DisqualificationReason {
    pub const ALL: [DisqualificationReason; 9] = [
        DisqualificationReason::NoBudget,
        DisqualificationReason::NoInterest,
        DisqualificationReason::NoDecisionPower,
        DisqualificationReason::Unreachable,
        DisqualificationReason::WrongContact,
        DisqualificationReason::ChoseCompetitor,
        DisqualificationReason::BadTiming,
        DisqualificationReason::Duplicate,
        DisqualificationReason::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DisqualificationReason::NoBudget => "no_budget",
            DisqualificationReason::NoInterest => "no_interest",
            DisqualificationReason::NoDecisionPower => "no_decision_power",
            DisqualificationReason::Unreachable => "unreachable",
            DisqualificationReason::WrongContact => "wrong_contact",
            DisqualificationReason::ChoseCompetitor => "chose_competitor",
            DisqualificationReason::BadTiming => "bad_timing",
            DisqualificationReason::Duplicate => "duplicate",
            DisqualificationReason::Other => "other",
        }
    }
}

impl fmt::Display for DisqualificationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DisqualificationReason {
    type Err = LeadflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DisqualificationReason::ALL
            .iter()
            .copied()
            .find(|r| r.as_str() == s)
            .ok_or_else(|| LeadflowError::Validation(format!("unknown disqualification reason '{s}'")))
    }
}

/// The decision recorded when a card reaches the terminal stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum LeadOutcome {
    Qualified {
        pipelines: Vec<String>,
        at: DateTime<Utc>,
        won_at: Option<DateTime<Utc>>,
    },
    Disqualified {
        reason: DisqualificationReason,
        detail: Option<String>,
        at: DateTime<Utc>,
    },
}

impl LeadOutcome {
    pub fn status(&self) -> QualificationStatus {
        match self {
            LeadOutcome::Qualified { .. } => QualificationStatus::Qualified,
            LeadOutcome::Disqualified { .. } => QualificationStatus::Disqualified,
        }
    }

    pub fn decided_at(&self) -> DateTime<Utc> {
        match self {
            LeadOutcome::Qualified { at, .. } | LeadOutcome::Disqualified { at, .. } => *at,
        }
    }

    pub fn is_won(&self) -> bool {
        matches!(self, LeadOutcome::Qualified { won_at: Some(_), .. })
    }
}

// ---------------------------------------------------------------------------
// PipelineCard
// ---------------------------------------------------------------------------

/// Pipeline state of one lead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineCard {
    pub lead: Lead,
    pub stage: Stage,
    pub qualification: QualificationStatus,
    pub assigned_to: Option<String>,
    pub assigned_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    pub history: Vec<StageHistoryEntry>,
    pub attempts: Vec<ContactAttempt>,
    pub last_contact_at: Option<DateTime<Utc>>,
    pub tasks: Vec<Task>,
    pub notes: Option<String>,
    pub outcome: Option<LeadOutcome>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub version: u64,
}

impl PipelineCard {
    pub fn id(&self) -> CardId {
        self.lead.id
    }

    /// The history entry for the current stage, if the log is well formed.
    pub fn open_entry(&self) -> Option<&StageHistoryEntry> {
        self.history.iter().rev().find(|e| e.is_open())
    }

    /// When the card entered its current stage.
    pub fn stage_changed_at(&self) -> DateTime<Utc> {
        self.open_entry()
            .map(|e| e.entered_at)
            .unwrap_or(self.created_at)
    }

    pub fn task(&self, id: TaskId) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn task_mut(&mut self, id: TaskId) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| t.id == id)
    }

    pub fn open_tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks.iter().filter(|t| t.is_open())
    }

    /// `true` once the card sits in the terminal stage with a decision.
    pub fn is_resolved(&self) -> bool {
        self.stage.is_terminal() && self.outcome.is_some()
    }

    /// Last time anyone touched the lead: the latest contact, else creation.
    pub fn last_activity_at(&self) -> DateTime<Utc> {
        self.last_contact_at.unwrap_or(self.created_at)
    }
}
