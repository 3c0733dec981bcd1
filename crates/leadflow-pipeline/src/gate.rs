//! Stage state machine and the outcome gate.
//!
//! Cards move freely between stages, except that entering `outcome` needs a
//! qualify or disqualify [`Decision`]. A transition is validated completely
//! before the card is touched, so a rejected or abandoned move leaves no
//! partial state behind.

use std::collections::VecDeque;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use leadflow_types::{
    CardId, DisqualificationReason, LeadOutcome, LeadflowError, PipelineCard,
    QualificationStatus, Result, Stage, StageHistoryEntry,
};

// ---------------------------------------------------------------------------
// Decision
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Decision {
    Qualify {
        pipelines: Vec<String>,
    },
    Disqualify {
        reason: DisqualificationReason,
        detail: Option<String>,
    },
}

impl Decision {
    pub fn qualify<I, S>(pipelines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Decision::Qualify {
            pipelines: pipelines.into_iter().map(Into::into).collect(),
        }
    }

    pub fn disqualify(reason: DisqualificationReason, detail: Option<String>) -> Self {
        Decision::Disqualify { reason, detail }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            Decision::Qualify { pipelines } => {
                if pipelines.is_empty() {
                    return Err(LeadflowError::Validation(
                        "qualifying a lead requires at least one downstream pipeline".into(),
                    ));
                }
                if pipelines.iter().any(|p| p.trim().is_empty()) {
                    return Err(LeadflowError::Validation(
                        "downstream pipeline ids must not be blank".into(),
                    ));
                }
            }
            Decision::Disqualify { reason, detail } => {
                let has_detail = detail.as_deref().is_some_and(|d| !d.trim().is_empty());
                if *reason == DisqualificationReason::Other && !has_detail {
                    return Err(LeadflowError::Validation(
                        "disqualifying for 'other' requires a detail".into(),
                    ));
                }
            }
        }
        Ok(())
    }

    fn into_outcome(self, at: DateTime<Utc>) -> LeadOutcome {
        match self {
            Decision::Qualify { pipelines } => LeadOutcome::Qualified {
                pipelines,
                at,
                won_at: None,
            },
            Decision::Disqualify { reason, detail } => LeadOutcome::Disqualified {
                reason,
                detail: detail.filter(|d| !d.trim().is_empty()),
                at,
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Transition
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionKind {
    /// Already in the requested stage; nothing changed.
    Unchanged,
    /// Moved between two non-terminal stages.
    Moved,
    /// Entered `outcome` with a decision.
    Resolved,
    /// Replaced the decision of a card already in `outcome`.
    Redecided,
    /// Left `outcome`; the previous decision was cleared.
    Reopened,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub from: Stage,
    pub to: Stage,
    pub kind: TransitionKind,
}

/// Move `card` to `to`, recording history. See the module docs for the gate.
pub fn transition(
    card: &mut PipelineCard,
    to: Stage,
    decision: Option<Decision>,
    now: DateTime<Utc>,
    note: Option<String>,
) -> Result<Transition> {
    let from = card.stage;

    if to.is_terminal() {
        let decision = decision.ok_or(LeadflowError::OutcomeRequired { card_id: card.id() })?;
        decision.validate()?;
        let outcome = decision.into_outcome(now);
        card.qualification = outcome.status();
        card.outcome = Some(outcome);
        card.updated_at = now;
        if from == to {
            return Ok(Transition {
                from,
                to,
                kind: TransitionKind::Redecided,
            });
        }
        append_history(card, to, now, note);
        return Ok(Transition {
            from,
            to,
            kind: TransitionKind::Resolved,
        });
    }

    if from == to {
        return Ok(Transition {
            from,
            to,
            kind: TransitionKind::Unchanged,
        });
    }

    let kind = if from.is_terminal() {
        card.outcome = None;
        card.qualification = QualificationStatus::Undetermined;
        TransitionKind::Reopened
    } else {
        TransitionKind::Moved
    };
    append_history(card, to, now, note);
    card.updated_at = now;
    Ok(Transition { from, to, kind })
}

/// Close whatever entry is open and open one for `stage`.
fn append_history(card: &mut PipelineCard, stage: Stage, now: DateTime<Utc>, note: Option<String>) {
    for entry in card.history.iter_mut().filter(|e| e.is_open()) {
        entry.close(now);
    }
    let mut entry = StageHistoryEntry::open(stage, card.assigned_to.clone(), now);
    entry.note = note;
    card.history.push(entry);
    card.stage = stage;
}

/// Mark a qualified card as won downstream.
pub fn record_win(card: &mut PipelineCard, now: DateTime<Utc>) -> Result<()> {
    if !card.stage.is_terminal() {
        return Err(LeadflowError::Validation(format!(
            "card '{}' has not reached the outcome stage",
            card.id()
        )));
    }
    match &mut card.outcome {
        Some(LeadOutcome::Qualified { won_at: won @ None, .. }) => {
            *won = Some(now);
            card.updated_at = now;
            Ok(())
        }
        Some(LeadOutcome::Qualified { .. }) => Err(LeadflowError::Validation(format!(
            "a win is already recorded for card '{}'",
            card.id()
        ))),
        _ => Err(LeadflowError::Validation(format!(
            "only qualified cards can be won; card '{}' is {}",
            card.id(),
            card.qualification
        ))),
    }
}

// ---------------------------------------------------------------------------
// DecisionResolver
// ---------------------------------------------------------------------------

/// Asked for a decision when a card is moved into `outcome`.
/// `Ok(None)` means the decision was abandoned.
#[async_trait]
pub trait DecisionResolver: Send + Sync {
    async fn resolve(&self, card: &PipelineCard) -> Result<Option<Decision>>;
}

/// Never decides. Moving into `outcome` through it always fails the gate.
pub struct AbandonDecision;

#[async_trait]
impl DecisionResolver for AbandonDecision {
    async fn resolve(&self, _card: &PipelineCard) -> Result<Option<Decision>> {
        Ok(None)
    }
}

/// Replays queued decisions in order and records which cards asked.
pub struct PresetDecisions {
    decisions: parking_lot::Mutex<VecDeque<Option<Decision>>>,
    asked: parking_lot::Mutex<Vec<CardId>>,
}

impl PresetDecisions {
    pub fn new(decisions: impl IntoIterator<Item = Option<Decision>>) -> Self {
        Self {
            decisions: parking_lot::Mutex::new(decisions.into_iter().collect()),
            asked: parking_lot::Mutex::new(Vec::new()),
        }
    }

    pub fn asked(&self) -> Vec<CardId> {
        self.asked.lock().clone()
    }
}

#[async_trait]
impl DecisionResolver for PresetDecisions {
    async fn resolve(&self, card: &PipelineCard) -> Result<Option<Decision>> {
        self.asked.lock().push(card.id());
        Ok(self.decisions.lock().pop_front().flatten())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{at, sample_card};

    fn open_entries(card: &PipelineCard) -> Vec<&StageHistoryEntry> {
        card.history.iter().filter(|e| e.is_open()).collect()
    }

    #[test]
    fn move_closes_previous_entry_and_opens_new() {
        let mut card = sample_card("Ada");
        let t = transition(&mut card, Stage::Call2, None, at(300), Some("skipped call 1".into()))
            .unwrap();

        assert_eq!(t.kind, TransitionKind::Moved);
        assert_eq!(card.stage, Stage::Call2);
        assert_eq!(card.history.len(), 2);
        assert_eq!(card.history[0].exited_at, Some(at(300)));
        assert_eq!(card.history[0].elapsed_secs, Some(300));
        let open = open_entries(&card);
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].stage, Stage::Call2);
        assert_eq!(open[0].note.as_deref(), Some("skipped call 1"));
        assert_eq!(card.updated_at, at(300));
    }

    #[test]
    fn outcome_without_decision_is_blocked() {
        let mut card = sample_card("Ada");
        let before = card.clone();
        let err = transition(&mut card, Stage::Outcome, None, at(10), None).unwrap_err();
        assert!(matches!(err, LeadflowError::OutcomeRequired { .. }));
        assert_eq!(card, before);
    }

    #[test]
    fn invalid_decision_is_blocked_without_partial_state() {
        let mut card = sample_card("Ada");
        let before = card.clone();
        let empty: Vec<String> = Vec::new();
        assert!(transition(&mut card, Stage::Outcome, Some(Decision::qualify(empty)), at(10), None).is_err());
        assert!(transition(
            &mut card,
            Stage::Outcome,
            Some(Decision::disqualify(DisqualificationReason::Other, Some("  ".into()))),
            at(10),
            None
        )
        .is_err());
        assert_eq!(card, before);
    }

    #[test]
    fn qualify_keeps_pipelines_verbatim() {
        let mut card = sample_card("Ada");
        let t = transition(
            &mut card,
            Stage::Outcome,
            Some(Decision::qualify(["p2", "p1"])),
            at(10),
            None,
        )
        .unwrap();
        assert_eq!(t.kind, TransitionKind::Resolved);
        assert_eq!(card.qualification, QualificationStatus::Qualified);
        match &card.outcome {
            Some(LeadOutcome::Qualified { pipelines, .. }) => {
                assert_eq!(pipelines, &vec!["p2".to_string(), "p1".to_string()])
            }
            other => panic!("expected qualified outcome, got {other:?}"),
        }
    }

    #[test]
    fn leaving_outcome_reopens_and_reentry_needs_fresh_decision() {
        let mut card = sample_card("Ada");
        transition(
            &mut card,
            Stage::Outcome,
            Some(Decision::disqualify(DisqualificationReason::NoBudget, None)),
            at(10),
            None,
        )
        .unwrap();

        let t = transition(&mut card, Stage::Recontact, None, at(20), None).unwrap();
        assert_eq!(t.kind, TransitionKind::Reopened);
        assert!(card.outcome.is_none());
        assert_eq!(card.qualification, QualificationStatus::Undetermined);

        let err = transition(&mut card, Stage::Outcome, None, at(30), None).unwrap_err();
        assert!(matches!(err, LeadflowError::OutcomeRequired { .. }));
        assert_eq!(card.stage, Stage::Recontact);
        assert_eq!(open_entries(&card).len(), 1);
    }

    #[test]
    fn redeciding_in_outcome_adds_no_history() {
        let mut card = sample_card("Ada");
        transition(&mut card, Stage::Outcome, Some(Decision::qualify(["p1"])), at(10), None).unwrap();
        let entries = card.history.len();
        let t = transition(
            &mut card,
            Stage::Outcome,
            Some(Decision::disqualify(DisqualificationReason::Duplicate, None)),
            at(20),
            None,
        )
        .unwrap();
        assert_eq!(t.kind, TransitionKind::Redecided);
        assert_eq!(card.history.len(), entries);
        assert_eq!(card.qualification, QualificationStatus::Disqualified);
    }

    #[test]
    fn same_stage_is_a_no_op() {
        let mut card = sample_card("Ada");
        let before = card.clone();
        let t = transition(&mut card, Stage::NewLead, None, at(10), None).unwrap();
        assert_eq!(t.kind, TransitionKind::Unchanged);
        assert_eq!(card, before);
    }

    #[test]
    fn win_requires_qualified_outcome() {
        let mut card = sample_card("Ada");
        assert!(record_win(&mut card, at(5)).is_err());
        transition(&mut card, Stage::Outcome, Some(Decision::qualify(["p1"])), at(10), None).unwrap();
        record_win(&mut card, at(20)).unwrap();
        assert!(card.outcome.as_ref().unwrap().is_won());
        assert!(record_win(&mut card, at(30)).is_err());
    }

    #[tokio::test]
    async fn preset_decisions_replay_in_order() {
        let resolver = PresetDecisions::new([None, Some(Decision::qualify(["p1"]))]);
        let card = sample_card("Ada");
        assert_eq!(resolver.resolve(&card).await.unwrap(), None);
        assert_eq!(
            resolver.resolve(&card).await.unwrap(),
            Some(Decision::qualify(["p1"]))
        );
        // Exhausted queue abandons.
        assert_eq!(resolver.resolve(&card).await.unwrap(), None);
        assert_eq!(resolver.asked().len(), 3);
    }
}
