//! Contact attempt recorder.

use chrono::{DateTime, Utc};

use leadflow_types::{AttemptDraft, ContactAttempt, PipelineCard, Result, Task, TaskKind};

/// Validate `draft` and append it to the card's log.
///
/// The log is append-only and `last_contact_at` always takes the new
/// attempt's timestamp. When the attempt names a dated next action, a
/// follow-up task is generated for the attempt's representative.
pub fn record_attempt(
    card: &mut PipelineCard,
    draft: AttemptDraft,
    now: DateTime<Utc>,
    max_redistribution_attempts: u32,
) -> Result<ContactAttempt> {
    let attempt = draft.validate(card.assigned_to.as_deref())?;

    if let Some(next) = &attempt.next_action {
        if let Some(due_at) = next.due_at {
            let task = Task::new(
                TaskKind::FollowUp,
                next.action.clone(),
                attempt.representative.clone(),
                due_at,
                now,
                max_redistribution_attempts,
            )
            .with_description(format!(
                "Follow-up after {} attempt ({})",
                attempt.channel, attempt.outcome
            ));
            card.tasks.push(task);
        }
    }

    card.attempts.push(attempt.clone());
    card.last_contact_at = Some(attempt.at);
    card.updated_at = now;
    Ok(attempt)
}
