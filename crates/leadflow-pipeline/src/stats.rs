//! Cross-lead reporting: counts, funnel ratios, workload and the
//! disqualification histogram, computed in a single pass.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use leadflow_types::{DisqualificationReason, LeadOutcome, PipelineCard, QualificationStatus, Stage};

use crate::config::PipelineConfig;
use crate::metrics::{mean_secs, ratio, time_per_stage, total_time_in_pipeline};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FunnelRatios {
    pub new_to_contacted: f64,
    pub contacted_to_qualified: f64,
    pub qualified_to_won: f64,
    /// Won over total.
    pub overall: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RepWorkload {
    pub representative: String,
    pub total: usize,
    pub qualified: usize,
    pub lost: usize,
    pub avg_time_in_pipeline_secs: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasonCount {
    pub reason: DisqualificationReason,
    pub count: usize,
}

/// Reasons past the top N, folded into one bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasonOverflow {
    pub reasons: Vec<DisqualificationReason>,
    pub count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReasonHistogram {
    pub top: Vec<ReasonCount>,
    pub other: Option<ReasonOverflow>,
}

impl ReasonHistogram {
    /// Sort by count descending (ties by reason code) and cap to `top_n`.
    pub fn from_counts(counts: BTreeMap<DisqualificationReason, usize>, top_n: usize) -> Self {
        let mut sorted: Vec<ReasonCount> = counts
            .into_iter()
            .filter(|(_, count)| *count > 0)
            .map(|(reason, count)| ReasonCount { reason, count })
            .collect();
        sorted.sort_by(|a, b| {
            b.count
                .cmp(&a.count)
                .then_with(|| a.reason.as_str().cmp(b.reason.as_str()))
        });

        if sorted.len() <= top_n {
            return Self {
                top: sorted,
                other: None,
            };
        }
        let rest = sorted.split_off(top_n);
        Self {
            top: sorted,
            other: Some(ReasonOverflow {
                reasons: rest.iter().map(|r| r.reason).collect(),
                count: rest.iter().map(|r| r.count).sum(),
            }),
        }
    }

    pub fn total(&self) -> usize {
        self.top.iter().map(|r| r.count).sum::<usize>() + self.other.as_ref().map_or(0, |o| o.count)
    }
}

/// Aggregate pipeline statistics. `Default` is the all-zero report.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineStats {
    pub total: usize,
    pub by_stage: BTreeMap<Stage, usize>,
    pub by_qualification: BTreeMap<QualificationStatus, usize>,
    pub contacted: usize,
    pub won: usize,
    pub funnel: FunnelRatios,
    pub avg_time_in_pipeline_secs: f64,
    /// Average pipeline time weighted by each stage's share of history time.
    pub est_time_per_stage_secs: BTreeMap<Stage, f64>,
    pub workload: Vec<RepWorkload>,
    pub stale_new_leads: usize,
    pub in_recontact: usize,
    pub disqualification_reasons: ReasonHistogram,
    pub computed_at: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct RepAcc {
    total: usize,
    qualified: usize,
    lost: usize,
    time_secs: i64,
}

/// "Contacted" means the card left `new_lead` or has at least one attempt.
pub fn is_contacted(card: &PipelineCard) -> bool {
    card.stage != Stage::NewLead || !card.attempts.is_empty()
}

/// A `new_lead` card with no activity for longer than `stale_after`.
pub fn is_stale_new_lead(card: &PipelineCard, now: DateTime<Utc>, stale_after: Duration) -> bool {
    card.stage == Stage::NewLead && now - card.last_activity_at() > stale_after
}

pub fn compute(cards: &[PipelineCard], now: DateTime<Utc>, config: &PipelineConfig) -> PipelineStats {
    let stale_after = config.stale_after();
    let mut stats = PipelineStats {
        total: cards.len(),
        computed_at: Some(now),
        ..Default::default()
    };
    let mut qualified = 0usize;
    let mut total_time_secs = 0i64;
    let mut stage_time: BTreeMap<Stage, Duration> = BTreeMap::new();
    let mut reps: BTreeMap<String, RepAcc> = BTreeMap::new();
    let mut reasons: BTreeMap<DisqualificationReason, usize> = BTreeMap::new();

    for card in cards {
        *stats.by_stage.entry(card.stage).or_default() += 1;
        *stats.by_qualification.entry(card.qualification).or_default() += 1;

        if is_contacted(card) {
            stats.contacted += 1;
        }
        if is_stale_new_lead(card, now, stale_after) {
            stats.stale_new_leads += 1;
        }
        if card.stage == Stage::Recontact {
            stats.in_recontact += 1;
        }

        let end = match &card.outcome {
            Some(outcome) if card.stage.is_terminal() => outcome.decided_at(),
            _ => now,
        };
        let pipeline_secs = total_time_in_pipeline(card, now).num_seconds();
        total_time_secs += pipeline_secs;
        for (stage, d) in time_per_stage(&card.history, end) {
            *stage_time.entry(stage).or_insert_with(Duration::zero) += d;
        }

        let (is_qualified, is_lost) = match &card.outcome {
            Some(outcome @ LeadOutcome::Qualified { .. }) => {
                qualified += 1;
                if outcome.is_won() {
                    stats.won += 1;
                }
                (true, false)
            }
            Some(LeadOutcome::Disqualified { reason, .. }) => {
                *reasons.entry(*reason).or_default() += 1;
                (false, true)
            }
            None => (false, false),
        };

        if let Some(rep) = &card.assigned_to {
            let acc = reps.entry(rep.clone()).or_default();
            acc.total += 1;
            acc.qualified += usize::from(is_qualified);
            acc.lost += usize::from(is_lost);
            acc.time_secs += pipeline_secs;
        }
    }

    stats.funnel = FunnelRatios {
        new_to_contacted: ratio(stats.contacted, stats.total),
        contacted_to_qualified: ratio(qualified, stats.contacted),
        qualified_to_won: ratio(stats.won, qualified),
        overall: ratio(stats.won, stats.total),
    };
    stats.avg_time_in_pipeline_secs = mean_secs(total_time_secs, stats.total);

    let history_secs: i64 = stage_time.values().map(Duration::num_seconds).sum();
    if history_secs > 0 {
        stats.est_time_per_stage_secs = stage_time
            .into_iter()
            .map(|(stage, d)| {
                let share = d.num_seconds() as f64 / history_secs as f64;
                (stage, stats.avg_time_in_pipeline_secs * share)
            })
            .collect();
    }

    stats.workload = reps
        .into_iter()
        .map(|(representative, acc)| RepWorkload {
            representative,
            total: acc.total,
            qualified: acc.qualified,
            lost: acc.lost,
            avg_time_in_pipeline_secs: mean_secs(acc.time_secs, acc.total),
        })
        .collect();
    stats.disqualification_reasons = ReasonHistogram::from_counts(reasons, config.reason_top_n);
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{at, sample_card};
    use leadflow_types::{AttemptOutcome, ContactAttempt, ContactChannel, StageHistoryEntry};

    fn move_to(card: &mut PipelineCard, stage: Stage, when: i64) {
        card.history.last_mut().unwrap().close(at(when));
        card.history
            .push(StageHistoryEntry::open(stage, card.assigned_to.clone(), at(when)));
        card.stage = stage;
    }

    fn disqualified(reason: DisqualificationReason) -> PipelineCard {
        let mut card = sample_card("x");
        move_to(&mut card, Stage::Outcome, 100);
        card.qualification = QualificationStatus::Disqualified;
        card.outcome = Some(LeadOutcome::Disqualified {
            reason,
            detail: None,
            at: at(100),
        });
        card
    }

    #[test]
    fn empty_pipeline_has_zero_ratios() {
        let stats = compute(&[], at(0), &PipelineConfig::default());
        assert_eq!(stats.total, 0);
        assert_eq!(stats.funnel, FunnelRatios::default());
        assert_eq!(stats.avg_time_in_pipeline_secs, 0.0);
        assert!(stats.funnel.overall.is_finite());
    }

    #[test]
    fn funnel_counts_contacted_qualified_and_won() {
        let untouched = sample_card("a");

        let mut called = sample_card("b");
        called.attempts.push(ContactAttempt {
            id: uuid::Uuid::new_v4(),
            channel: ContactChannel::Phone,
            outcome: AttemptOutcome::Success,
            at: at(10),
            representative: "rep-a".into(),
            duration_secs: None,
            notes: None,
            next_action: None,
        });
        called.last_contact_at = Some(at(10));

        let mut won = sample_card("c");
        move_to(&mut won, Stage::Outcome, 50);
        won.qualification = QualificationStatus::Qualified;
        won.outcome = Some(LeadOutcome::Qualified {
            pipelines: vec!["p1".into()],
            at: at(50),
            won_at: Some(at(60)),
        });

        let stats = compute(&[untouched, called, won], at(100), &PipelineConfig::default());
        assert_eq!(stats.total, 3);
        assert_eq!(stats.contacted, 2);
        assert_eq!(stats.won, 1);
        assert!((stats.funnel.new_to_contacted - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(stats.funnel.contacted_to_qualified, 0.5);
        assert_eq!(stats.funnel.qualified_to_won, 1.0);
        assert!((stats.funnel.overall - 1.0 / 3.0).abs() < 1e-9);
        assert_eq!(stats.by_stage[&Stage::NewLead], 2);
        assert_eq!(stats.by_qualification[&QualificationStatus::Qualified], 1);
    }

    #[test]
    fn stale_new_leads_use_last_activity() {
        let config = PipelineConfig::default();
        let untouched = sample_card("a");
        let mut recently_called = sample_card("b");
        recently_called.last_contact_at = Some(at(90_000));

        let stats = compute(&[untouched, recently_called], at(100_000), &config);
        assert_eq!(stats.stale_new_leads, 1);
    }

    #[test]
    fn workload_is_per_representative() {
        let mut b_card = sample_card("b");
        b_card.assigned_to = Some("rep-b".into());
        let cards = vec![
            sample_card("a"),
            disqualified(DisqualificationReason::NoBudget),
            b_card,
        ];
        let stats = compute(&cards, at(200), &PipelineConfig::default());

        assert_eq!(stats.workload.len(), 2);
        let a = &stats.workload[0];
        assert_eq!(a.representative, "rep-a");
        assert_eq!((a.total, a.qualified, a.lost), (2, 0, 1));
        // 200s open + 100s until the outcome.
        assert_eq!(a.avg_time_in_pipeline_secs, 150.0);
    }

    #[test]
    fn per_stage_estimate_splits_average_time() {
        let mut card = sample_card("a");
        move_to(&mut card, Stage::Call1, 100);
        let stats = compute(&[card], at(400), &PipelineConfig::default());

        assert_eq!(stats.avg_time_in_pipeline_secs, 400.0);
        assert_eq!(stats.est_time_per_stage_secs[&Stage::NewLead], 100.0);
        assert_eq!(stats.est_time_per_stage_secs[&Stage::Call1], 300.0);
    }

    #[test]
    fn histogram_caps_and_breaks_ties_by_code() {
        use DisqualificationReason::*;
        let mut cards = Vec::new();
        for (reason, n) in [
            (NoBudget, 3),
            (Unreachable, 2),
            (Duplicate, 2),
            (BadTiming, 1),
            (NoInterest, 1),
            (WrongContact, 1),
            (ChoseCompetitor, 1),
        ] {
            for _ in 0..n {
                cards.push(disqualified(reason));
            }
        }
        let stats = compute(&cards, at(200), &PipelineConfig::default());
        let hist = &stats.disqualification_reasons;

        let top: Vec<_> = hist.top.iter().map(|r| (r.reason, r.count)).collect();
        assert_eq!(
            top,
            vec![
                (NoBudget, 3),
                (Duplicate, 2),
                (Unreachable, 2),
                (BadTiming, 1),
                (ChoseCompetitor, 1),
            ]
        );
        let other = hist.other.as_ref().unwrap();
        assert_eq!(other.reasons, vec![NoInterest, WrongContact]);
        assert_eq!(other.count, 2);
        assert_eq!(hist.total(), 11);
    }
}
