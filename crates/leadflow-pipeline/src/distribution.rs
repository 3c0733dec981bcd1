//! Distribution engine: picks the representative who owns a new lead.
//!
//! Ranking is `(priority_rank asc, active_leads asc, id asc)`. Candidates are
//! tried in three tiers and the first non-empty tier wins:
//!
//! 1. active specialists (a tag matches one of the lead's products) with spare capacity
//! 2. any active representative with spare capacity
//! 3. overflow: the best-ranked active representative regardless of load
//!
//! Tier 3 means a lead is never left unowned while anyone is active.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use leadflow_types::{Lead, LeadflowError, PipelineCard, Representative, Result};

use crate::roster::Roster;

/// Why a representative was picked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentReason {
    Specialty,
    Capacity,
    Overflow,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    pub representative: String,
    pub reason: AssignmentReason,
    pub assigned_at: DateTime<Utc>,
}

fn rank_key(rep: &Representative) -> (u32, u32, &str) {
    (rep.priority_rank, rep.active_leads, rep.id.as_str())
}

fn is_specialist(rep: &Representative, lead: &Lead) -> bool {
    rep.specialties.iter().any(|tag| lead.products.contains(tag))
}

/// Pick a representative for `lead` from `reps`. `None` only when nobody is active.
pub fn select_representative<'a>(
    reps: &'a [Representative],
    lead: &Lead,
) -> Option<(&'a Representative, AssignmentReason)> {
    if !lead.products.is_empty() {
        if let Some(rep) = best(reps, |r| r.has_spare_capacity() && is_specialist(r, lead)) {
            return Some((rep, AssignmentReason::Specialty));
        }
    }
    if let Some(rep) = best(reps, Representative::has_spare_capacity) {
        return Some((rep, AssignmentReason::Capacity));
    }
    best(reps, |_| true).map(|rep| (rep, AssignmentReason::Overflow))
}

fn best(
    reps: &[Representative],
    filter: impl Fn(&Representative) -> bool,
) -> Option<&Representative> {
    reps.iter()
        .filter(|r| r.active && filter(r))
        .min_by(|a, b| rank_key(a).cmp(&rank_key(b)))
}

/// Count unresolved cards per representative.
pub fn open_load(cards: &[PipelineCard]) -> BTreeMap<String, u32> {
    let mut load = BTreeMap::new();
    for card in cards.iter().filter(|c| !c.is_resolved()) {
        if let Some(rep) = &card.assigned_to {
            *load.entry(rep.clone()).or_insert(0) += 1;
        }
    }
    load
}

/// Assigns leads against a live [`Roster`].
pub struct DistributionEngine<'a> {
    roster: &'a dyn Roster,
}

impl<'a> DistributionEngine<'a> {
    pub fn new(roster: &'a dyn Roster) -> Self {
        Self { roster }
    }

    /// Choose an owner for `lead`. Does not touch the roster counters; the
    /// caller records the assignment once the card is committed.
    pub async fn assign(&self, lead: &Lead, now: DateTime<Utc>) -> Result<Assignment> {
        let reps = self.roster.list_active_representatives().await?;
        let (rep, reason) =
            select_representative(&reps, lead).ok_or(LeadflowError::NoActiveRepresentatives)?;

        if reason == AssignmentReason::Overflow {
            tracing::warn!(
                lead = %lead.id,
                representative = %rep.id,
                active_leads = rep.active_leads,
                capacity = rep.capacity,
                "Every representative is at capacity, overloading"
            );
        } else {
            tracing::debug!(lead = %lead.id, representative = %rep.id, ?reason, "Lead distributed");
        }

        Ok(Assignment {
            representative: rep.id.clone(),
            reason,
            assigned_at: now,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::roster::MemoryRoster;
    use crate::testing::{at, sample_card};
    use leadflow_types::{DisqualificationReason, LeadOutcome, Stage};

    fn lead_with(products: &[&str]) -> Lead {
        let mut lead = sample_card("Ada").lead;
        lead.products = products.iter().map(|p| p.to_string()).collect();
        lead
    }

    fn pick(reps: &[Representative], lead: &Lead) -> (String, AssignmentReason) {
        let (rep, reason) = select_representative(reps, lead).expect("someone is active");
        (rep.id.clone(), reason)
    }

    #[test]
    fn lowest_rank_wins_when_all_have_capacity() {
        let reps = vec![
            Representative::new("c", 3, 5),
            Representative::new("a", 1, 5).with_load(4),
            Representative::new("b", 2, 5),
        ];
        assert_eq!(pick(&reps, &lead_with(&[])), ("a".into(), AssignmentReason::Capacity));
    }

    #[test]
    fn rank_ties_go_to_fewer_active_leads() {
        let reps = vec![
            Representative::new("busy", 1, 5).with_load(3),
            Representative::new("idle", 1, 5).with_load(1),
        ];
        assert_eq!(pick(&reps, &lead_with(&[])).0, "idle");
    }

    #[test]
    fn full_representative_is_skipped_for_one_with_capacity() {
        let reps = vec![
            Representative::new("A", 1, 5).with_load(5),
            Representative::new("B", 2, 5).with_load(2),
        ];
        assert_eq!(pick(&reps, &lead_with(&[])), ("B".into(), AssignmentReason::Capacity));
    }

    #[test]
    fn everyone_full_overflows_to_highest_priority() {
        let reps = vec![
            Representative::new("second", 2, 3).with_load(3),
            Representative::new("first", 1, 3).with_load(9),
        ];
        assert_eq!(
            pick(&reps, &lead_with(&[])),
            ("first".into(), AssignmentReason::Overflow)
        );
    }

    #[test]
    fn specialist_with_capacity_is_preferred() {
        let reps = vec![
            Representative::new("generalist", 1, 5),
            Representative::new("solar", 4, 5).with_specialty("solar"),
        ];
        assert_eq!(
            pick(&reps, &lead_with(&["solar"])),
            ("solar".into(), AssignmentReason::Specialty)
        );
    }

    #[test]
    fn specialty_never_stalls_assignment() {
        let reps = vec![
            Representative::new("generalist", 2, 5),
            Representative::new("solar", 1, 2).with_load(2).with_specialty("solar"),
        ];
        // Specialist is full, and nobody matches "wind" at all.
        assert_eq!(pick(&reps, &lead_with(&["solar"])).0, "generalist");
        assert_eq!(pick(&reps, &lead_with(&["wind"])).0, "generalist");
    }

    #[test]
    fn inactive_representatives_are_ignored() {
        let reps = vec![
            Representative::new("off", 1, 5).inactive(),
            Representative::new("on", 9, 5).with_load(7),
        ];
        assert_eq!(pick(&reps, &lead_with(&[])).0, "on");
        assert!(select_representative(&[Representative::new("x", 1, 1).inactive()], &lead_with(&[])).is_none());
    }

    #[test]
    fn open_load_ignores_resolved_cards() {
        let mut a = sample_card("a");
        a.assigned_to = Some("rep-x".into());
        let mut b = sample_card("b");
        b.assigned_to = Some("rep-x".into());
        b.stage = Stage::Outcome;
        b.outcome = Some(LeadOutcome::Disqualified {
            reason: DisqualificationReason::NoBudget,
            detail: None,
            at: at(10),
        });
        assert!(b.is_resolved());
        let load = open_load(&[a, b]);
        assert_eq!(load.get("rep-x"), Some(&1));
    }

    #[tokio::test]
    async fn engine_reports_empty_roster() {
        let roster = MemoryRoster::default();
        let engine = DistributionEngine::new(&roster);
        let err = engine
            .assign(&lead_with(&[]), at(0))
            .await
            .unwrap_err();
        assert!(matches!(err, LeadflowError::NoActiveRepresentatives));
    }

    #[tokio::test]
    async fn engine_assigns_from_roster() {
        let roster = MemoryRoster::new([
            Representative::new("A", 1, 5).with_load(5),
            Representative::new("B", 2, 5).with_load(2),
        ]);
        let engine = DistributionEngine::new(&roster);
        let assignment = engine
            .assign(&lead_with(&[]), at(0))
            .await
            .unwrap();
        assert_eq!(assignment.representative, "B");
        assert_eq!(assignment.reason, AssignmentReason::Capacity);
    }
}
