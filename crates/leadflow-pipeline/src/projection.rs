//! Read-only flattened view of a card for boards and listings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use leadflow_types::{CardId, OriginChannel, PipelineCard, QualificationStatus, Stage};

use crate::metrics::{time_in_current_stage, total_time_in_pipeline};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeadRow {
    pub id: CardId,
    pub name: String,
    pub company: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub origin: OriginChannel,
    pub products: Vec<String>,
    pub stage: Stage,
    pub qualification: QualificationStatus,
    pub assigned_to: Option<String>,
    pub last_contact_at: Option<DateTime<Utc>>,
    pub attempt_count: usize,
    pub open_tasks: usize,
    pub overdue_tasks: usize,
    pub secs_in_stage: i64,
    pub secs_in_pipeline: i64,
    pub won: bool,
    pub updated_at: DateTime<Utc>,
}

impl LeadRow {
    pub fn from_card(card: &PipelineCard, now: DateTime<Utc>) -> Self {
        let lead = &card.lead;
        Self {
            id: lead.id,
            name: lead.name.clone(),
            company: lead.company.clone(),
            phone: lead.phone.clone(),
            email: lead.email.clone(),
            origin: lead.origin.channel,
            products: lead.products.iter().cloned().collect(),
            stage: card.stage,
            qualification: card.qualification,
            assigned_to: card.assigned_to.clone(),
            last_contact_at: card.last_contact_at,
            attempt_count: card.attempts.len(),
            open_tasks: card.open_tasks().count(),
            overdue_tasks: card.open_tasks().filter(|t| t.is_past_due(now)).count(),
            secs_in_stage: time_in_current_stage(card, now).num_seconds(),
            secs_in_pipeline: total_time_in_pipeline(card, now).num_seconds(),
            won: card.outcome.as_ref().is_some_and(|o| o.is_won()),
            updated_at: card.updated_at,
        }
    }
}
