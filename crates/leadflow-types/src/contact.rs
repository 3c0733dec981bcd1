//! Contact attempts: the append-only log of interactions with a lead.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{LeadflowError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContactChannel {
    Phone,
    Whatsapp,
    Email,
    Sms,
    InPerson,
}

impl ContactChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContactChannel::Phone => "phone",
            ContactChannel::Whatsapp => "whatsapp",
            ContactChannel::Email => "email",
            ContactChannel::Sms => "sms",
            ContactChannel::InPerson => "in_person",
        }
    }
}

impl fmt::Display for ContactChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success,
    NoAnswer,
    Failure,
}

impl AttemptOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptOutcome::Success => "success",
            AttemptOutcome::NoAnswer => "no_answer",
            AttemptOutcome::Failure => "failure",
        }
    }
}

impl fmt::Display for AttemptOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Follow-up the representative committed to after an attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NextAction {
    pub action: String,
    pub due_at: Option<DateTime<Utc>>,
}

/// A recorded interaction attempt. Never mutated once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ContactAttempt {
    pub id: Uuid,
    pub channel: ContactChannel,
    pub outcome: AttemptOutcome,
    pub at: DateTime<Utc>,
    pub representative: String,
    pub duration_secs: Option<u32>,
    pub notes: Option<String>,
    pub next_action: Option<NextAction>,
}

/// Unvalidated attempt as submitted by a caller.
///
/// Required fields are optional here so a missing value can be reported as a
/// validation error instead of failing at the type boundary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AttemptDraft {
    pub channel: Option<ContactChannel>,
    pub outcome: Option<AttemptOutcome>,
    pub at: Option<DateTime<Utc>>,
    pub representative: Option<String>,
    pub duration_secs: Option<u32>,
    pub notes: Option<String>,
    pub next_action: Option<NextAction>,
}

impl AttemptDraft {
    pub fn new(channel: ContactChannel, outcome: AttemptOutcome, at: DateTime<Utc>) -> Self {
        Self {
            channel: Some(channel),
            outcome: Some(outcome),
            at: Some(at),
            ..Default::default()
        }
    }

    pub fn by(mut self, representative: impl Into<String>) -> Self {
        self.representative = Some(representative.into());
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn with_next_action(mut self, action: impl Into<String>, due_at: Option<DateTime<Utc>>) -> Self {
        self.next_action = Some(NextAction {
            action: action.into(),
            due_at,
        });
        self
    }

    /// Validate the draft, falling back to `owner` when no representative is given.
    pub fn validate(self, owner: Option<&str>) -> Result<ContactAttempt> {
        let channel = self
            .channel
            .ok_or_else(|| LeadflowError::Validation("contact attempt is missing a channel".into()))?;
        let outcome = self
            .outcome
            .ok_or_else(|| LeadflowError::Validation("contact attempt is missing an outcome".into()))?;
        let at = self
            .at
            .ok_or_else(|| LeadflowError::Validation("contact attempt is missing a timestamp".into()))?;

        let representative = self
            .representative
            .filter(|r| !r.trim().is_empty())
            .or_else(|| owner.map(String::from))
            .ok_or_else(|| {
                LeadflowError::Validation(
                    "contact attempt has no representative and the card is unassigned".into(),
                )
            })?;

        if let Some(next) = &self.next_action {
            if next.action.trim().is_empty() {
                return Err(LeadflowError::Validation(
                    "next action must describe what to do".into(),
                ));
            }
            if matches!(next.due_at, Some(due) if due < at) {
                return Err(LeadflowError::Validation(
                    "next action is due before the attempt took place".into(),
                ));
            }
        }

        Ok(ContactAttempt {
            id: Uuid::new_v4(),
            channel,
            outcome,
            at,
            representative,
            duration_secs: self.duration_secs,
            notes: self.notes.filter(|n| !n.trim().is_empty()),
            next_action: self.next_action,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn complete_draft_validates() {
        let attempt = AttemptDraft::new(ContactChannel::Phone, AttemptOutcome::NoAnswer, at(0))
            .by("rep-a")
            .validate(None)
            .unwrap();
        assert_eq!(attempt.channel, ContactChannel::Phone);
        assert_eq!(attempt.outcome, AttemptOutcome::NoAnswer);
        assert_eq!(attempt.representative, "rep-a");
    }

    #[test]
    fn missing_channel_is_rejected() {
        let draft = AttemptDraft {
            outcome: Some(AttemptOutcome::Success),
            at: Some(at(0)),
            representative: Some("rep-a".into()),
            ..Default::default()
        };
        let err = draft.validate(None).unwrap_err();
        assert!(err.to_string().contains("channel"), "got: {err}");
    }

    #[test]
    fn missing_timestamp_is_rejected() {
        let draft = AttemptDraft {
            channel: Some(ContactChannel::Email),
            outcome: Some(AttemptOutcome::Success),
            ..Default::default()
        };
        assert!(matches!(
            draft.validate(Some("rep-a")),
            Err(LeadflowError::Validation(_))
        ));
    }

    #[test]
    fn owner_fills_in_missing_representative() {
        let attempt = AttemptDraft::new(ContactChannel::Sms, AttemptOutcome::Failure, at(0))
            .validate(Some("owner"))
            .unwrap();
        assert_eq!(attempt.representative, "owner");
    }

    #[test]
    fn no_representative_and_no_owner_is_rejected() {
        let err = AttemptDraft::new(ContactChannel::Sms, AttemptOutcome::Failure, at(0))
            .validate(None)
            .unwrap_err();
        assert!(matches!(err, LeadflowError::Validation(_)));
    }

    #[test]
    fn next_action_before_attempt_is_rejected() {
        let err = AttemptDraft::new(ContactChannel::Phone, AttemptOutcome::Success, at(100))
            .by("rep-a")
            .with_next_action("send proposal", Some(at(50)))
            .validate(None)
            .unwrap_err();
        assert!(err.to_string().contains("due before"));
    }

    #[test]
    fn channel_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&ContactChannel::InPerson).unwrap(),
            "\"in_person\""
        );
        assert_eq!(
            serde_json::to_string(&AttemptOutcome::NoAnswer).unwrap(),
            "\"no_answer\""
        );
    }
}
