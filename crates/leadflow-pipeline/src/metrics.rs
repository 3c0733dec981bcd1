//! Stage history and time metrics. Pure functions over timestamps.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};

use leadflow_types::{PipelineCard, Stage, StageHistoryEntry};

/// Time the card has spent in its current stage.
pub fn time_in_current_stage(card: &PipelineCard, now: DateTime<Utc>) -> Duration {
    card.open_entry()
        .map(|e| e.elapsed(now))
        .unwrap_or_else(|| clamp(now - card.stage_changed_at()))
}

/// Total time in the pipeline. Stops counting once an outcome is recorded.
pub fn total_time_in_pipeline(card: &PipelineCard, now: DateTime<Utc>) -> Duration {
    let end = match &card.outcome {
        Some(outcome) if card.stage.is_terminal() => outcome.decided_at(),
        _ => now,
    };
    clamp(end - card.created_at)
}

/// Accumulated time per stage across every visit in `history`.
pub fn time_per_stage(history: &[StageHistoryEntry], now: DateTime<Utc>) -> BTreeMap<Stage, Duration> {
    let mut totals = BTreeMap::new();
    for entry in history {
        *totals.entry(entry.stage).or_insert_with(Duration::zero) += entry.elapsed(now);
    }
    totals
}

/// `numerator / denominator`, or 0 when the denominator is zero.
pub fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

/// Mean of `total_secs` over `count`, or 0 for an empty set.
pub fn mean_secs(total_secs: i64, count: usize) -> f64 {
    if count == 0 {
        0.0
    } else {
        total_secs as f64 / count as f64
    }
}

/// Compact `1d 4h`, `3h 12m`, `45s` style rendering.
pub fn format_duration(d: Duration) -> String {
    let secs = d.num_seconds().max(0);
    let (days, hours, minutes) = (secs / 86_400, (secs % 86_400) / 3600, (secs % 3600) / 60);
    if days > 0 {
        format!("{days}d {hours}h")
    } else if hours > 0 {
        format!("{hours}h {minutes}m")
    } else if minutes > 0 {
        format!("{minutes}m")
    } else {
        format!("{secs}s")
    }
}

fn clamp(d: Duration) -> Duration {
    d.max(Duration::zero())
}
