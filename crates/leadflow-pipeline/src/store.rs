//! Store adapter: the persisted record shape, its strict codec, and the
//! [`LeadStore`] trait the repository reads and writes through.
//!
//! The remote store is a generic CRUD/query service. Cards are flattened into
//! [`LeadRecord`]s; the ordered logs (stage history, contact attempts, tasks)
//! travel as versioned JSON envelopes that are decoded strictly.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use leadflow_types::{
    CardId, DisqualificationReason, Lead, LeadOrigin, LeadOutcome, LeadflowError, OriginChannel,
    PipelineCard, QualificationStatus, Result, Stage,
};

/// Version written into every serialized log envelope.
pub const SCHEMA_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// LeadRecord: persisted shape
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeadRecord {
    pub id: CardId,
    pub name: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub company: Option<String>,
    pub title: Option<String>,
    pub location: Option<String>,
    pub products: Vec<String>,
    pub origin_channel: OriginChannel,
    pub origin_detail: Option<String>,
    pub lead_notes: Option<String>,
    pub card_notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    pub pipeline_stage: Stage,
    pub qualification_status: QualificationStatus,
    pub assigned_to: Option<String>,
    pub assigned_at: Option<DateTime<Utc>>,
    pub stage_changed_at: DateTime<Utc>,
    pub stage_history: String,
    pub contact_attempts: String,
    pub tasks: String,
    pub last_contact_at: Option<DateTime<Utc>>,
    pub qualified_pipelines: Option<Vec<String>>,
    pub disqualification_reason: Option<DisqualificationReason>,
    pub disqualification_detail: Option<String>,
    pub qualified_at: Option<DateTime<Utc>>,
    pub disqualified_at: Option<DateTime<Utc>>,
    pub won_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    pub version: u64,
}

#[derive(Serialize)]
struct EnvelopeRef<'a, T> {
    version: u32,
    items: &'a [T],
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct Envelope<T> {
    version: u32,
    items: Vec<T>,
}

fn encode_list<T: Serialize>(items: &[T]) -> Result<String> {
    Ok(serde_json::to_string(&EnvelopeRef {
        version: SCHEMA_VERSION,
        items,
    })?)
}

fn decode_list<T: DeserializeOwned>(id: CardId, field: &str, raw: &str) -> Result<Vec<T>> {
    let envelope: Envelope<T> =
        serde_json::from_str(raw).map_err(|e| LeadflowError::MalformedRecord {
            id: id.to_string(),
            message: format!("{field}: {e}"),
        })?;
    if envelope.version != SCHEMA_VERSION {
        return Err(LeadflowError::MalformedRecord {
            id: id.to_string(),
            message: format!(
                "{field}: unsupported schema version {} (expected {})",
                envelope.version, SCHEMA_VERSION
            ),
        });
    }
    Ok(envelope.items)
}

impl LeadRecord {
    /// Flatten a card into its persisted shape.
    pub fn from_card(card: &PipelineCard) -> Result<Self> {
        let lead = &card.lead;
        let mut record = LeadRecord {
            id: lead.id,
            name: lead.name.clone(),
            phone: lead.phone.clone(),
            email: lead.email.clone(),
            company: lead.company.clone(),
            title: lead.title.clone(),
            location: lead.location.clone(),
            products: lead.products.iter().cloned().collect(),
            origin_channel: lead.origin.channel,
            origin_detail: lead.origin.detail.clone(),
            lead_notes: lead.notes.clone(),
            card_notes: card.notes.clone(),
            created_at: card.created_at,
            created_by: card.created_by.clone(),
            pipeline_stage: card.stage,
            qualification_status: card.qualification,
            assigned_to: card.assigned_to.clone(),
            assigned_at: card.assigned_at,
            stage_changed_at: card.stage_changed_at(),
            stage_history: encode_list(&card.history)?,
            contact_attempts: encode_list(&card.attempts)?,
            tasks: encode_list(&card.tasks)?,
            last_contact_at: card.last_contact_at,
            qualified_pipelines: None,
            disqualification_reason: None,
            disqualification_detail: None,
            qualified_at: None,
            disqualified_at: None,
            won_at: None,
            updated_at: card.updated_at,
            version: card.version,
        };
        match &card.outcome {
            Some(LeadOutcome::Qualified {
                pipelines,
                at,
                won_at,
            }) => {
                record.qualified_pipelines = Some(pipelines.clone());
                record.qualified_at = Some(*at);
                record.won_at = *won_at;
            }
            Some(LeadOutcome::Disqualified { reason, detail, at }) => {
                record.disqualification_reason = Some(*reason);
                record.disqualification_detail = detail.clone();
                record.disqualified_at = Some(*at);
            }
            None => {}
        }
        Ok(record)
    }

    /// Rebuild a card, failing loudly on malformed logs or broken invariants.
    pub fn into_card(self) -> Result<PipelineCard> {
        let id = self.id;
        let malformed = |message: &str| LeadflowError::MalformedRecord {
            id: id.to_string(),
            message: message.to_string(),
        };

        let outcome = match self.qualification_status {
            QualificationStatus::Undetermined => None,
            QualificationStatus::Qualified => Some(LeadOutcome::Qualified {
                pipelines: self
                    .qualified_pipelines
                    .ok_or_else(|| malformed("qualified record without pipelines"))?,
                at: self
                    .qualified_at
                    .ok_or_else(|| malformed("qualified record without qualified_at"))?,
                won_at: self.won_at,
            }),
            QualificationStatus::Disqualified => Some(LeadOutcome::Disqualified {
                reason: self
                    .disqualification_reason
                    .ok_or_else(|| malformed("disqualified record without a reason"))?,
                detail: self.disqualification_detail,
                at: self
                    .disqualified_at
                    .ok_or_else(|| malformed("disqualified record without disqualified_at"))?,
            }),
        };

        let card = PipelineCard {
            lead: Lead {
                id,
                name: self.name,
                phone: self.phone,
                email: self.email,
                company: self.company,
                title: self.title,
                location: self.location,
                products: self.products.into_iter().collect(),
                origin: LeadOrigin {
                    channel: self.origin_channel,
                    detail: self.origin_detail,
                },
                notes: self.lead_notes,
                created_at: self.created_at,
                created_by: self.created_by.clone(),
            },
            stage: self.pipeline_stage,
            qualification: self.qualification_status,
            assigned_to: self.assigned_to,
            assigned_at: self.assigned_at,
            updated_at: self.updated_at,
            history: decode_list(id, "stage_history", &self.stage_history)?,
            attempts: decode_list(id, "contact_attempts", &self.contact_attempts)?,
            last_contact_at: self.last_contact_at,
            tasks: decode_list(id, "tasks", &self.tasks)?,
            notes: self.card_notes,
            outcome,
            created_by: self.created_by,
            created_at: self.created_at,
            version: self.version,
        };

        crate::lint::validate_or_raise(&card)?;
        Ok(card)
    }
}

// ---------------------------------------------------------------------------
// Query / patch shapes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordFilter {
    pub id: Option<CardId>,
}

impl RecordFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn by_id(id: CardId) -> Self {
        Self {
            id: Some(id),
            ..Default::default()
        }
    }

    pub fn matches(&self, record: &LeadRecord) -> bool {
        self.id.map_or(true, |id| record.id == id)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RecordOrder {
    #[default]
    CreatedDesc,
    CreatedAsc,
}

impl RecordOrder {
    fn sort(&self, records: &mut [LeadRecord]) {
        match self {
            RecordOrder::CreatedDesc => records.sort_by(|a, b| b.created_at.cmp(&a.created_at)),
            RecordOrder::CreatedAsc => records.sort_by(|a, b| a.created_at.cmp(&b.created_at)),
        }
    }
}

/// Changed columns of a record, keyed by column name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordPatch(serde_json::Map<String, serde_json::Value>);

impl RecordPatch {
    /// Columns that differ between `before` and `after`. The id never changes.
    pub fn diff(before: &LeadRecord, after: &LeadRecord) -> Result<Self> {
        let before = serde_json::to_value(before)?;
        let after = serde_json::to_value(after)?;
        let mut changes = serde_json::Map::new();
        if let (serde_json::Value::Object(old), serde_json::Value::Object(new)) = (before, after) {
            for (key, value) in new {
                if key != "id" && old.get(&key) != Some(&value) {
                    changes.insert(key, value);
                }
            }
        }
        Ok(Self(changes))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Merge the patch into `record`, producing the updated record.
    pub fn apply_to(&self, record: &LeadRecord) -> Result<LeadRecord> {
        let mut value = serde_json::to_value(record)?;
        if let serde_json::Value::Object(fields) = &mut value {
            for (key, v) in &self.0 {
                fields.insert(key.clone(), v.clone());
            }
        }
        Ok(serde_json::from_value(value)?)
    }
}

// ---------------------------------------------------------------------------
// LeadStore trait
// ---------------------------------------------------------------------------

/// Generic CRUD/query access to lead records.
#[async_trait]
pub trait LeadStore: Send + Sync {
    async fn query(
        &self,
        filter: &RecordFilter,
        order: RecordOrder,
        limit: Option<usize>,
    ) -> Result<Vec<LeadRecord>>;

    async fn insert(&self, record: LeadRecord) -> Result<LeadRecord>;

    async fn update(&self, id: CardId, patch: &RecordPatch) -> Result<()>;
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Faults {
    fail_next: usize,
    offline: bool,
    latency: Duration,
}

/// In-process [`LeadStore`] with fault injection.
#[derive(Default)]
pub struct MemoryStore {
    records: tokio::sync::RwLock<BTreeMap<CardId, LeadRecord>>,
    faults: parking_lot::Mutex<Faults>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store pre-loaded with `records`.
    pub fn with_records(records: impl IntoIterator<Item = LeadRecord>) -> Self {
        let map = records.into_iter().map(|r| (r.id, r)).collect();
        Self {
            records: tokio::sync::RwLock::new(map),
            faults: parking_lot::Mutex::new(Faults::default()),
        }
    }

    /// Fail the next `n` calls with a persistence error.
    pub fn fail_next(&self, n: usize) {
        self.faults.lock().fail_next = n;
    }

    /// Fail every call until switched back online.
    pub fn set_offline(&self, offline: bool) {
        self.faults.lock().offline = offline;
    }

    /// Delay every call by `latency` before it runs.
    pub fn set_latency(&self, latency: Duration) {
        self.faults.lock().latency = latency;
    }

    /// All records, in id order.
    pub async fn records(&self) -> Vec<LeadRecord> {
        self.records.read().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    async fn enter(&self, operation: &str) -> Result<()> {
        let latency = self.faults.lock().latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        let mut faults = self.faults.lock();
        if faults.offline {
            return Err(LeadflowError::Persistence {
                operation: operation.into(),
                message: "store unavailable".into(),
            });
        }
        if faults.fail_next > 0 {
            faults.fail_next -= 1;
            return Err(LeadflowError::Persistence {
                operation: operation.into(),
                message: "injected failure".into(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl LeadStore for MemoryStore {
    async fn query(
        &self,
        filter: &RecordFilter,
        order: RecordOrder,
        limit: Option<usize>,
    ) -> Result<Vec<LeadRecord>> {
        self.enter("query").await?;
        let mut rows: Vec<LeadRecord> = self
            .records
            .read()
            .await
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        order.sort(&mut rows);
        if let Some(limit) = limit {
            rows.truncate(limit);
        }
        Ok(rows)
    }

    async fn insert(&self, record: LeadRecord) -> Result<LeadRecord> {
        self.enter("insert").await?;
        let mut records = self.records.write().await;
        if records.contains_key(&record.id) {
            return Err(LeadflowError::Persistence {
                operation: "insert".into(),
                message: format!("duplicate key '{}'", record.id),
            });
        }
        records.insert(record.id, record.clone());
        Ok(record)
    }

    async fn update(&self, id: CardId, patch: &RecordPatch) -> Result<()> {
        self.enter("update").await?;
        let mut records = self.records.write().await;
        let current = records
            .get(&id)
            .ok_or_else(|| LeadflowError::card_not_found(id))?;
        let updated = patch.apply_to(current)?;
        records.insert(id, updated);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::sample_card;

    #[test]
    fn record_round_trips_a_card() {
        let card = sample_card("Ada");
        let record = LeadRecord::from_card(&card).unwrap();
        assert_eq!(record.pipeline_stage, Stage::NewLead);
        assert!(record.stage_history.starts_with(r#"{"version":1,"items":["#));

        let decoded = record.into_card().unwrap();
        assert_eq!(decoded, card);
    }

    #[test]
    fn unknown_schema_version_fails_loudly() {
        let card = sample_card("Ada");
        let mut record = LeadRecord::from_card(&card).unwrap();
        record.stage_history = record.stage_history.replace(r#""version":1"#, r#""version":7"#);
        match record.into_card() {
            Err(LeadflowError::MalformedRecord { message, .. }) => {
                assert!(message.contains("unsupported schema version 7"), "got: {message}");
            }
            other => panic!("expected MalformedRecord, got: {other:?}"),
        }
    }

    #[test]
    fn garbage_blob_fails_loudly() {
        let card = sample_card("Ada");
        let mut record = LeadRecord::from_card(&card).unwrap();
        record.contact_attempts = "[{\"channel\":\"pigeon\"}]".into();
        assert!(matches!(
            record.into_card(),
            Err(LeadflowError::MalformedRecord { .. })
        ));
    }

    #[test]
    fn qualified_status_without_pipelines_is_malformed() {
        let card = sample_card("Ada");
        let mut record = LeadRecord::from_card(&card).unwrap();
        record.qualification_status = QualificationStatus::Qualified;
        assert!(matches!(
            record.into_card(),
            Err(LeadflowError::MalformedRecord { .. })
        ));
    }

    #[test]
    fn patch_contains_only_changed_columns() {
        let card = sample_card("Ada");
        let before = LeadRecord::from_card(&card).unwrap();
        let mut after = before.clone();
        after.name = "Ada Lovelace".into();
        after.version += 1;

        let patch = RecordPatch::diff(&before, &after).unwrap();
        let mut columns: Vec<_> = patch.columns().collect();
        columns.sort();
        assert_eq!(columns, vec!["name", "version"]);
        assert_eq!(patch.apply_to(&before).unwrap(), after);
    }

    #[tokio::test]
    async fn memory_store_filters_orders_and_limits() {
        let store = MemoryStore::new();
        for name in ["a", "b", "c"] {
            let mut card = sample_card(name);
            card.created_at += chrono::Duration::seconds(name.as_bytes()[0] as i64);
            store
                .insert(LeadRecord::from_card(&card).unwrap())
                .await
                .unwrap();
        }

        let rows = store
            .query(&RecordFilter::all(), RecordOrder::CreatedDesc, Some(2))
            .await
            .unwrap();
        let names: Vec<_> = rows.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["c", "b"]);

        let oldest = store
            .query(&RecordFilter::all(), RecordOrder::CreatedAsc, Some(1))
            .await
            .unwrap();
        assert_eq!(oldest[0].name, "a");

        let id = rows[0].id;
        let one = store
            .query(&RecordFilter::by_id(id), RecordOrder::default(), None)
            .await
            .unwrap();
        assert_eq!(one.len(), 1);
        assert_eq!(one[0].id, id);
    }

    #[tokio::test]
    async fn memory_store_rejects_duplicate_insert() {
        let store = MemoryStore::new();
        let record = LeadRecord::from_card(&sample_card("a")).unwrap();
        store.insert(record.clone()).await.unwrap();
        assert!(store.insert(record).await.unwrap_err().is_persistence());
    }

    #[tokio::test]
    async fn injected_failures_are_consumed() {
        let store = MemoryStore::new();
        store.fail_next(1);
        assert!(store
            .query(&RecordFilter::all(), RecordOrder::default(), None)
            .await
            .is_err());
        assert!(store
            .query(&RecordFilter::all(), RecordOrder::default(), None)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn update_of_unknown_id_is_not_found() {
        let store = MemoryStore::new();
        let err = store
            .update(uuid::Uuid::new_v4(), &RecordPatch::default())
            .await
            .unwrap_err();
        assert!(matches!(err, LeadflowError::NotFound { .. }));
    }
}
