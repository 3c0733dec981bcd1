//! Task generator and escalation policy.
//!
//! Overdue tasks are flagged, never moved automatically. Moving a task to
//! another representative is an explicit operator action bounded by the
//! task's redistribution limit.

use chrono::{DateTime, Duration, Utc};

use leadflow_types::{
    LeadflowError, NotificationKind, Result, Task, TaskKind, TaskNotification, TaskPriority,
    TaskStatus,
};

/// The task every new card starts with.
pub fn first_contact_task(
    representative: &str,
    lead_name: &str,
    now: DateTime<Utc>,
    sla: Duration,
    max_redistribution_attempts: u32,
) -> Result<Task> {
    Ok(Task::new(
        TaskKind::FirstContact,
        format!("First contact with {lead_name}"),
        representative,
        due_after(now, sla)?,
        now,
        max_redistribution_attempts,
    )
    .with_priority(TaskPriority::High))
}

fn due_after(now: DateTime<Utc>, sla: Duration) -> Result<DateTime<Utc>> {
    now.checked_add_signed(sla).ok_or_else(|| {
        LeadflowError::Validation(format!("due date {now} + {sla} is out of range"))
    })
}

/// Flip open tasks past their due date to `Overdue`. Returns how many changed.
pub fn mark_overdue(tasks: &mut [Task], now: DateTime<Utc>) -> usize {
    let mut flipped = 0;
    for task in tasks.iter_mut() {
        if task.status != TaskStatus::Overdue && task.is_past_due(now) {
            task.status = TaskStatus::Overdue;
            task.notifications.push(TaskNotification {
                kind: NotificationKind::Overdue,
                representative: task.assigned_to.clone(),
                at: now,
            });
            flipped += 1;
        }
    }
    flipped
}

pub fn complete(task: &mut Task, now: DateTime<Utc>) -> Result<()> {
    ensure_open(task, "complete")?;
    task.status = TaskStatus::Done;
    task.completed_at = Some(now);
    Ok(())
}

pub fn cancel(task: &mut Task) -> Result<()> {
    ensure_open(task, "cancel")?;
    task.status = TaskStatus::Cancelled;
    Ok(())
}

/// Hand `task` to `to`, resetting it to pending with a fresh due date.
///
/// Fails with [`LeadflowError::RedistributionLimitExceeded`] once the counter
/// has reached the task's maximum; the task is left unchanged.
pub fn redistribute(task: &mut Task, to: &str, now: DateTime<Utc>, sla: Duration) -> Result<()> {
    ensure_open(task, "redistribute")?;
    if task.redistribution_attempts >= task.max_redistribution_attempts {
        return Err(LeadflowError::RedistributionLimitExceeded {
            task_id: task.id,
            attempts: task.redistribution_attempts,
            max: task.max_redistribution_attempts,
        });
    }
    let due_at = due_after(now, sla)?;

    task.redistribution_attempts += 1;
    task.assigned_to = to.to_string();
    task.status = TaskStatus::Pending;
    task.due_at = due_at;
    task.notifications.push(TaskNotification {
        kind: NotificationKind::Redistributed,
        representative: to.to_string(),
        at: now,
    });
    if task.redistributions_left() == 0 {
        task.notifications.push(TaskNotification {
            kind: NotificationKind::Escalated,
            representative: to.to_string(),
            at: now,
        });
    }
    Ok(())
}

fn ensure_open(task: &Task, action: &str) -> Result<()> {
    if task.is_open() {
        Ok(())
    } else {
        Err(LeadflowError::Validation(format!(
            "cannot {action} task '{}' with status {}",
            task.id, task.status
        )))
    }
}
