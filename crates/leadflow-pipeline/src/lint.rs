//! Card integrity lint: rules and diagnostics over decoded cards.
//!
//! [`validate`] collects advisory diagnostics; [`validate_or_raise`] turns any
//! `Error`-severity finding into [`LeadflowError::MalformedRecord`]. Strict
//! record decoding runs the latter, the CLI `check` command the former.

use serde::Serialize;

use leadflow_types::{LeadflowError, PipelineCard, QualificationStatus, Result};

// ---------------------------------------------------------------------------
// Diagnostic types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct Diagnostic {
    pub rule: String,
    pub severity: Severity,
    pub message: String,
    pub fix: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

pub trait LintRule: Send + Sync {
    fn name(&self) -> &str;
    fn apply(&self, card: &PipelineCard) -> Vec<Diagnostic>;
}

fn error(rule: &dyn LintRule, message: String, fix: Option<&str>) -> Diagnostic {
    Diagnostic {
        rule: rule.name().into(),
        severity: Severity::Error,
        message,
        fix: fix.map(Into::into),
    }
}

fn warning(rule: &dyn LintRule, message: String) -> Diagnostic {
    Diagnostic {
        rule: rule.name().into(),
        severity: Severity::Warning,
        message,
        fix: None,
    }
}

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

struct SingleOpenEntryRule;
impl LintRule for SingleOpenEntryRule {
    fn name(&self) -> &str { "single_open_entry" }
    fn apply(&self, card: &PipelineCard) -> Vec<Diagnostic> {
        let open: Vec<_> = card.history.iter().filter(|e| e.is_open()).collect();
        match open.as_slice() {
            [] => vec![error(
                self,
                "stage history has no open entry".into(),
                Some("Append an open entry for the current stage"),
            )],
            [entry] if entry.stage != card.stage => vec![error(
                self,
                format!(
                    "open history entry is '{}' but the card is in '{}'",
                    entry.stage, card.stage
                ),
                None,
            )],
            [_] => vec![],
            many => vec![error(
                self,
                format!("stage history has {} open entries; expected exactly one", many.len()),
                Some("Close every entry except the last"),
            )],
        }
    }
}

struct OpenEntryIsLastRule;
impl LintRule for OpenEntryIsLastRule {
    fn name(&self) -> &str { "open_entry_is_last" }
    fn apply(&self, card: &PipelineCard) -> Vec<Diagnostic> {
        let last_open = card.history.last().is_some_and(|e| e.is_open());
        let any_open = card.history.iter().any(|e| e.is_open());
        if any_open && !last_open {
            vec![error(self, "a closed entry follows the open one".into(), None)]
        } else {
            vec![]
        }
    }
}

struct ClosedEntryTimesRule;
impl LintRule for ClosedEntryTimesRule {
    fn name(&self) -> &str { "closed_entry_times" }
    fn apply(&self, card: &PipelineCard) -> Vec<Diagnostic> {
        let mut out = Vec::new();
        for (i, entry) in card.history.iter().enumerate() {
            let Some(exited_at) = entry.exited_at else { continue };
            if exited_at < entry.entered_at {
                out.push(error(
                    self,
                    format!("history entry {i} ('{}') exits before it was entered", entry.stage),
                    None,
                ));
                continue;
            }
            let expected = (exited_at - entry.entered_at).num_seconds();
            if entry.elapsed_secs != Some(expected) {
                out.push(error(
                    self,
                    format!(
                        "history entry {i} ('{}') records {:?}s elapsed, timestamps give {expected}s",
                        entry.stage, entry.elapsed_secs
                    ),
                    None,
                ));
            }
        }
        out
    }
}

struct OutcomeAtTerminalRule;
impl LintRule for OutcomeAtTerminalRule {
    fn name(&self) -> &str { "outcome_at_terminal" }
    fn apply(&self, card: &PipelineCard) -> Vec<Diagnostic> {
        match (card.stage.is_terminal(), card.outcome.is_some()) {
            (true, false) => vec![error(
                self,
                "card is in the outcome stage without a recorded outcome".into(),
                Some("Qualify or disqualify the card"),
            )],
            (false, true) => vec![error(
                self,
                format!("card in '{}' still carries an outcome", card.stage),
                None,
            )],
            _ => vec![],
        }
    }
}

struct QualificationMatchesOutcomeRule;
impl LintRule for QualificationMatchesOutcomeRule {
    fn name(&self) -> &str { "qualification_matches_outcome" }
    fn apply(&self, card: &PipelineCard) -> Vec<Diagnostic> {
        let expected = card
            .outcome
            .as_ref()
            .map_or(QualificationStatus::Undetermined, |o| o.status());
        if card.qualification != expected {
            vec![error(
                self,
                format!(
                    "qualification status is '{}' but the outcome implies '{}'",
                    card.qualification, expected
                ),
                None,
            )]
        } else {
            vec![]
        }
    }
}

struct LastContactRule;
impl LintRule for LastContactRule {
    fn name(&self) -> &str { "last_contact" }
    fn apply(&self, card: &PipelineCard) -> Vec<Diagnostic> {
        let last_attempt = card.attempts.last().map(|a| a.at);
        if card.last_contact_at != last_attempt {
            vec![warning(
                self,
                format!(
                    "last contact is {:?} but the latest attempt was at {:?}",
                    card.last_contact_at, last_attempt
                ),
            )]
        } else {
            vec![]
        }
    }
}

struct TaskOwnershipRule;
impl LintRule for TaskOwnershipRule {
    fn name(&self) -> &str { "task_limits" }
    fn apply(&self, card: &PipelineCard) -> Vec<Diagnostic> {
        card.tasks
            .iter()
            .filter(|t| t.redistribution_attempts > t.max_redistribution_attempts)
            .map(|t| {
                warning(
                    self,
                    format!(
                        "task '{}' was redistributed {} times, over its limit of {}",
                        t.id, t.redistribution_attempts, t.max_redistribution_attempts
                    ),
                )
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Run all built-in rules and return collected diagnostics.
pub fn validate(card: &PipelineCard) -> Vec<Diagnostic> {
    let rules: Vec<Box<dyn LintRule>> = vec![
        Box::new(SingleOpenEntryRule),
        Box::new(OpenEntryIsLastRule),
        Box::new(ClosedEntryTimesRule),
        Box::new(OutcomeAtTerminalRule),
        Box::new(QualificationMatchesOutcomeRule),
        Box::new(LastContactRule),
        Box::new(TaskOwnershipRule),
    ];

    let mut diagnostics = Vec::new();
    for rule in &rules {
        diagnostics.extend(rule.apply(card));
    }
    diagnostics
}

/// Run all rules; return `Err` if any `Error`-severity diagnostic is found.
pub fn validate_or_raise(card: &PipelineCard) -> Result<Vec<Diagnostic>> {
    let diagnostics = validate(card);
    let errors: Vec<_> = diagnostics
        .iter()
        .filter(|d| d.severity == Severity::Error)
        .map(|d| d.message.as_str())
        .collect();
    if !errors.is_empty() {
        return Err(LeadflowError::MalformedRecord {
            id: card.id().to_string(),
            message: errors.join("; "),
        });
    }
    Ok(diagnostics)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{at, sample_card};
    use leadflow_types::{
        AttemptOutcome, ContactAttempt, ContactChannel, DisqualificationReason, LeadOutcome, Stage,
        StageHistoryEntry,
    };

    fn rules_hit(card: &PipelineCard) -> Vec<String> {
        validate(card).into_iter().map(|d| d.rule).collect()
    }

    #[test]
    fn fresh_card_is_clean() {
        assert!(validate(&sample_card("Ada")).is_empty());
        assert!(validate_or_raise(&sample_card("Ada")).is_ok());
    }

    #[test]
    fn two_open_entries_are_an_error() {
        let mut card = sample_card("Ada");
        card.history
            .push(StageHistoryEntry::open(Stage::NewLead, None, at(5)));
        assert!(rules_hit(&card).contains(&"single_open_entry".to_string()));
        assert!(matches!(
            validate_or_raise(&card),
            Err(LeadflowError::MalformedRecord { .. })
        ));
    }

    #[test]
    fn open_entry_must_match_stage() {
        let mut card = sample_card("Ada");
        card.stage = Stage::Call1;
        assert_eq!(rules_hit(&card), vec!["single_open_entry"]);
    }

    #[test]
    fn inconsistent_elapsed_is_an_error() {
        let mut card = sample_card("Ada");
        card.history[0].close(at(100));
        card.history[0].elapsed_secs = Some(7);
        card.history
            .push(StageHistoryEntry::open(Stage::NewLead, None, at(100)));
        assert!(rules_hit(&card).contains(&"closed_entry_times".to_string()));
    }

    #[test]
    fn outcome_invariant_both_ways() {
        let mut card = sample_card("Ada");
        card.outcome = Some(LeadOutcome::Disqualified {
            reason: DisqualificationReason::NoBudget,
            detail: None,
            at: at(1),
        });
        let hits = rules_hit(&card);
        assert!(hits.contains(&"outcome_at_terminal".to_string()));
        assert!(hits.contains(&"qualification_matches_outcome".to_string()));
    }

    #[test]
    fn stale_last_contact_is_only_a_warning() {
        let mut card = sample_card("Ada");
        card.attempts.push(ContactAttempt {
            id: uuid::Uuid::new_v4(),
            channel: ContactChannel::Phone,
            outcome: AttemptOutcome::NoAnswer,
            at: at(10),
            representative: "rep-a".into(),
            duration_secs: None,
            notes: None,
            next_action: None,
        });
        let diagnostics = validate_or_raise(&card).unwrap();
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].severity, Severity::Warning);
    }
}
