//! Fixtures shared by the unit tests.

use chrono::{DateTime, Duration, TimeZone, Utc};

use leadflow_types::{
    Lead, LeadOrigin, OriginChannel, PipelineCard, QualificationStatus, Stage, StageHistoryEntry,
};

use crate::tasks::first_contact_task;

/// A fixed instant `secs` seconds after the test epoch.
pub(crate) fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

/// A freshly created card in `new_lead`, owned by `rep-a` since `at(0)`.
pub(crate) fn sample_card(name: &str) -> PipelineCard {
    let lead = Lead {
        id: uuid::Uuid::new_v4(),
        name: name.to_string(),
        phone: None,
        email: None,
        company: None,
        title: None,
        location: None,
        products: Default::default(),
        origin: LeadOrigin {
            channel: OriginChannel::Website,
            detail: None,
        },
        notes: None,
        created_at: at(0),
        created_by: "tester".into(),
    };
    PipelineCard {
        stage: Stage::NewLead,
        qualification: QualificationStatus::Undetermined,
        assigned_to: Some("rep-a".into()),
        assigned_at: Some(at(0)),
        updated_at: at(0),
        history: vec![StageHistoryEntry::open(Stage::NewLead, Some("rep-a".into()), at(0))],
        attempts: Vec::new(),
        last_contact_at: None,
        tasks: vec![first_contact_task("rep-a", name, at(0), Duration::hours(24), 3).unwrap()],
        notes: None,
        outcome: None,
        created_by: "tester".into(),
        created_at: at(0),
        version: 0,
        lead,
    }
}
