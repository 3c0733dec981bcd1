//! Pipeline stages and the stage-history audit trail.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::LeadflowError;

// ---------------------------------------------------------------------------
// Stage
// ---------------------------------------------------------------------------

/// Position of a card in the pipeline. `Outcome` is terminal and gated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Stage {
    #[serde(rename = "new_lead")]
    NewLead,
    #[serde(rename = "call_1")]
    Call1,
    #[serde(rename = "call_2")]
    Call2,
    #[serde(rename = "message")]
    Message,
    #[serde(rename = "recontact")]
    Recontact,
    #[serde(rename = "outcome")]
    Outcome,
}

impl Stage {
    /// All stages in board order.
    pub const ALL: [Stage; 6] = [
        Stage::NewLead,
        Stage::Call1,
        Stage::Call2,
        Stage::Message,
        Stage::Recontact,
        Stage::Outcome,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::NewLead => "new_lead",
            Stage::Call1 => "call_1",
            Stage::Call2 => "call_2",
            Stage::Message => "message",
            Stage::Recontact => "recontact",
            Stage::Outcome => "outcome",
        }
    }

    /// Human-readable column title.
    pub fn label(&self) -> &'static str {
        match self {
            Stage::NewLead => "New lead",
            Stage::Call1 => "First call",
            Stage::Call2 => "Second call",
            Stage::Message => "Message",
            Stage::Recontact => "Recontact",
            Stage::Outcome => "Outcome",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Outcome)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = LeadflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Stage::ALL
            .iter()
            .copied()
            .find(|stage| stage.as_str() == s)
            .ok_or_else(|| LeadflowError::Validation(format!("unknown stage '{s}'")))
    }
}

// ---------------------------------------------------------------------------
// QualificationStatus
// ---------------------------------------------------------------------------

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum QualificationStatus {
    Qualified,
    Disqualified,
    #[default]
    Undetermined,
}

impl QualificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QualificationStatus::Qualified => "qualified",
            QualificationStatus::Disqualified => "disqualified",
            QualificationStatus::Undetermined => "undetermined",
        }
    }
}

impl fmt::Display for QualificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// StageHistoryEntry
// ---------------------------------------------------------------------------

/// One visit of a card to a stage. Exactly one entry per card is open.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StageHistoryEntry {
    pub stage: Stage,
    pub representative: Option<String>,
    pub entered_at: DateTime<Utc>,
    pub exited_at: Option<DateTime<Utc>>,
    /// Seconds spent in the stage, stamped when the entry is closed.
    pub elapsed_secs: Option<i64>,
    pub note: Option<String>,
}

impl StageHistoryEntry {
    /// Open a new entry for `stage`.
    pub fn open(stage: Stage, representative: Option<String>, at: DateTime<Utc>) -> Self {
        Self {
            stage,
            representative,
            entered_at: at,
            exited_at: None,
            elapsed_secs: None,
            note: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.exited_at.is_none()
    }

    /// Close the entry at `at`. An exit before the entry time is clamped to it.
    pub fn close(&mut self, at: DateTime<Utc>) {
        let exit = at.max(self.entered_at);
        self.exited_at = Some(exit);
        self.elapsed_secs = Some((exit - self.entered_at).num_seconds());
    }

    /// Time spent in this stage, measured up to `now` while still open.
    pub fn elapsed(&self, now: DateTime<Utc>) -> chrono::Duration {
        let end = self.exited_at.unwrap_or(now).max(self.entered_at);
        end - self.entered_at
    }
}
