//! Pipeline repository: the façade every caller goes through.
//!
//! Each mutation is one read-modify-write against the [`LeadStore`]: read the
//! record, decode it strictly, apply the change, write only the columns that
//! differ. A committed write invalidates the cached collection and statistics
//! and, when anyone is listening, spawns a fresh full read that is broadcast
//! to subscribers. A failed write leaves cache and subscribers untouched.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, LazyLock};

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use leadflow_types::{
    AttemptDraft, CardId, ContactAttempt, DisqualificationReason, Lead, LeadOrigin, LeadOutcome,
    LeadflowError, OriginChannel, PipelineCard, QualificationStatus, Result, Stage,
    StageHistoryEntry, Task, TaskId, TaskStatus,
};

use crate::attempts;
use crate::cache::{TtlCache, COLLECTION_KEY, STATS_KEY};
use crate::clock::{Clock, SystemClock};
use crate::config::PipelineConfig;
use crate::distribution::{open_load, select_representative, DistributionEngine};
use crate::events::{ChangeCause, EventEmitter, PipelineEvent, Subscription};
use crate::gate::{self, Decision, DecisionResolver, TransitionKind};
use crate::lint::{self, Diagnostic};
use crate::projection::LeadRow;
use crate::roster::Roster;
use crate::stats::{self, PipelineStats};
use crate::store::{LeadRecord, LeadStore, RecordFilter, RecordOrder, RecordPatch};
use crate::tasks;

// Compile-once contact patterns.
static EMAIL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email pattern compiles")
});
static PHONE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\+?[0-9][0-9 ().\-]{5,19}$").expect("phone pattern compiles")
});

fn check_format(field: &str, value: &str, pattern: &Regex) -> Result<()> {
    if pattern.is_match(value) {
        Ok(())
    } else {
        Err(LeadflowError::Validation(format!("invalid {field} '{value}'")))
    }
}

fn clean(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

// ---------------------------------------------------------------------------
// Inputs
// ---------------------------------------------------------------------------

/// Input for [`PipelineRepository::create`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewLead {
    pub name: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub company: Option<String>,
    pub title: Option<String>,
    pub location: Option<String>,
    #[serde(default)]
    pub products: BTreeSet<String>,
    pub origin: LeadOrigin,
    pub notes: Option<String>,
    pub created_by: String,
}

impl NewLead {
    pub fn new(name: impl Into<String>, created_by: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            phone: None,
            email: None,
            company: None,
            title: None,
            location: None,
            products: BTreeSet::new(),
            origin: LeadOrigin {
                channel: OriginChannel::Other,
                detail: None,
            },
            notes: None,
            created_by: created_by.into(),
        }
    }

    pub fn with_phone(mut self, phone: impl Into<String>) -> Self {
        self.phone = Some(phone.into());
        self
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn with_company(mut self, company: impl Into<String>) -> Self {
        self.company = Some(company.into());
        self
    }

    pub fn with_product(mut self, product: impl Into<String>) -> Self {
        self.products.insert(product.into());
        self
    }

    pub fn with_origin(mut self, channel: OriginChannel, detail: Option<String>) -> Self {
        self.origin = LeadOrigin { channel, detail };
        self
    }

    /// Trim every field, reject blanks and malformed contact details.
    fn into_lead(self, id: CardId, now: DateTime<Utc>) -> Result<Lead> {
        let name = self.name.trim().to_string();
        if name.is_empty() {
            return Err(LeadflowError::Validation("lead name is required".into()));
        }
        let created_by = self.created_by.trim().to_string();
        if created_by.is_empty() {
            return Err(LeadflowError::Validation("creator is required".into()));
        }
        let phone = clean(self.phone);
        if let Some(phone) = &phone {
            check_format("phone", phone, &PHONE_PATTERN)?;
        }
        let email = clean(self.email);
        if let Some(email) = &email {
            check_format("email", email, &EMAIL_PATTERN)?;
        }
        Ok(Lead {
            id,
            name,
            phone,
            email,
            company: clean(self.company),
            title: clean(self.title),
            location: clean(self.location),
            products: self
                .products
                .into_iter()
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty())
                .collect(),
            origin: LeadOrigin {
                channel: self.origin.channel,
                detail: clean(self.origin.detail),
            },
            notes: clean(self.notes),
            created_at: now,
            created_by,
        })
    }
}

/// Recorded edit of a card's lead fields, notes or owner. `None` keeps a field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LeadPatch {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub company: Option<String>,
    pub title: Option<String>,
    pub location: Option<String>,
    pub products: Option<BTreeSet<String>>,
    pub notes: Option<String>,
    pub card_notes: Option<String>,
    /// Reassign the card. Existing tasks stay with their assignees.
    pub assigned_to: Option<String>,
}

impl LeadPatch {
    pub fn validate(&self) -> Result<()> {
        if self.name.as_deref().is_some_and(|n| n.trim().is_empty()) {
            return Err(LeadflowError::Validation("lead name must not be blank".into()));
        }
        if let Some(phone) = clean(self.phone.clone()) {
            check_format("phone", &phone, &PHONE_PATTERN)?;
        }
        if let Some(email) = clean(self.email.clone()) {
            check_format("email", &email, &EMAIL_PATTERN)?;
        }
        Ok(())
    }

    /// Apply to `card`. Returns the previous owner when the owner changed.
    fn apply(self, card: &mut PipelineCard, now: DateTime<Utc>) -> Option<Option<String>> {
        let before = card.clone();
        let lead = &mut card.lead;
        if let Some(name) = self.name {
            lead.name = name.trim().to_string();
        }
        // A blank string clears an optional field.
        for (slot, value) in [
            (&mut lead.phone, self.phone),
            (&mut lead.email, self.email),
            (&mut lead.company, self.company),
            (&mut lead.title, self.title),
            (&mut lead.location, self.location),
            (&mut lead.notes, self.notes),
            (&mut card.notes, self.card_notes),
        ] {
            if value.is_some() {
                *slot = clean(value);
            }
        }
        if let Some(products) = self.products {
            lead.products = products;
        }

        let previous = match self.assigned_to {
            Some(rep) if card.assigned_to.as_deref() != Some(rep.as_str()) => {
                let previous = card.assigned_to.replace(rep);
                card.assigned_at = Some(now);
                Some(previous)
            }
            _ => None,
        };
        if *card != before {
            card.updated_at = now;
        }
        previous
    }
}

/// Result of linting one stored record.
#[derive(Debug, Clone, Serialize)]
pub struct CardCheck {
    pub id: CardId,
    pub name: String,
    pub diagnostics: Vec<Diagnostic>,
    /// Set when the record could not be decoded at all.
    pub error: Option<String>,
}

impl CardCheck {
    pub fn is_clean(&self) -> bool {
        self.error.is_none() && self.diagnostics.is_empty()
    }
}

struct Mutation<T> {
    card: PipelineCard,
    value: T,
    changed: bool,
}

// ---------------------------------------------------------------------------
// PipelineRepository
// ---------------------------------------------------------------------------

struct Inner {
    store: Arc<dyn LeadStore>,
    roster: Arc<dyn Roster>,
    cache: TtlCache,
    clock: Arc<dyn Clock>,
    events: EventEmitter,
    config: PipelineConfig,
}

/// Cheap to clone; clones share the store, cache and subscribers.
#[derive(Clone)]
pub struct PipelineRepository {
    inner: Arc<Inner>,
}

impl PipelineRepository {
    pub fn new(
        store: Arc<dyn LeadStore>,
        roster: Arc<dyn Roster>,
        config: PipelineConfig,
    ) -> Result<Self> {
        Self::with_clock(store, roster, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        store: Arc<dyn LeadStore>,
        roster: Arc<dyn Roster>,
        config: PipelineConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(Inner {
                store,
                roster,
                cache: TtlCache::new(clock.clone()),
                events: EventEmitter::new(config.event_capacity),
                clock,
                config,
            }),
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.inner.config
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.inner.clock.now()
    }

    // -- mutations ----------------------------------------------------------

    /// Capture a lead: assign it, open its history and first-contact task,
    /// and persist the card.
    pub async fn create(&self, new: NewLead) -> Result<PipelineCard> {
        let now = self.now();
        let lead = new.into_lead(uuid::Uuid::new_v4(), now)?;
        let assignment = DistributionEngine::new(self.inner.roster.as_ref())
            .assign(&lead, now)
            .await?;
        let rep = assignment.representative;

        let config = &self.inner.config;
        let card = PipelineCard {
            stage: Stage::NewLead,
            qualification: QualificationStatus::Undetermined,
            assigned_to: Some(rep.clone()),
            assigned_at: Some(now),
            updated_at: now,
            history: vec![StageHistoryEntry::open(Stage::NewLead, Some(rep.clone()), now)],
            attempts: Vec::new(),
            last_contact_at: None,
            tasks: vec![tasks::first_contact_task(
                &rep,
                &lead.name,
                now,
                config.first_contact_window(),
                config.max_redistribution_attempts,
            )?],
            notes: None,
            outcome: None,
            created_by: lead.created_by.clone(),
            created_at: now,
            version: 0,
            lead,
        };

        self.inner.store.insert(LeadRecord::from_card(&card)?).await?;
        self.note_assignment(&rep).await;
        tracing::info!(
            card = %card.id(),
            representative = %rep,
            reason = ?assignment.reason,
            "Lead created"
        );
        self.commit(ChangeCause::Created { card_id: card.id() });
        Ok(card)
    }

    /// Edit lead fields, notes or owner. With `expected_version`, fails with
    /// [`LeadflowError::Conflict`] if the card changed since it was read.
    pub async fn update(
        &self,
        id: CardId,
        patch: LeadPatch,
        expected_version: Option<u64>,
    ) -> Result<PipelineCard> {
        patch.validate()?;
        if let Some(rep) = &patch.assigned_to {
            self.ensure_active(rep).await?;
        }

        let m = self
            .mutate(id, expected_version, move |card, now| Ok(patch.apply(card, now)))
            .await?;
        if !m.changed {
            return Ok(m.card);
        }
        if let Some(previous) = &m.value {
            if !m.card.stage.is_terminal() {
                if let Some(previous) = previous {
                    self.note_release(previous).await;
                }
                if let Some(current) = &m.card.assigned_to {
                    self.note_assignment(current).await;
                }
            }
            tracing::info!(
                card = %id,
                from = ?previous,
                to = ?m.card.assigned_to,
                "Card reassigned"
            );
        }
        tracing::info!(card = %id, version = m.card.version, "Card updated");
        self.commit(ChangeCause::Updated { card_id: id });
        Ok(m.card)
    }

    /// Move a card. Entering `outcome` this way always fails with
    /// [`LeadflowError::OutcomeRequired`]; use [`qualify`](Self::qualify),
    /// [`disqualify`](Self::disqualify) or [`change_stage_with`](Self::change_stage_with).
    pub async fn change_stage(&self, id: CardId, stage: Stage) -> Result<PipelineCard> {
        self.transition_card(id, stage, None).await
    }

    /// Move a card, asking `resolver` for a decision when entering `outcome`.
    /// An abandoned decision leaves the card untouched.
    pub async fn change_stage_with(
        &self,
        id: CardId,
        stage: Stage,
        resolver: &dyn DecisionResolver,
    ) -> Result<PipelineCard> {
        let decision = if stage.is_terminal() {
            let card = self.get_by_id(id).await?;
            match resolver.resolve(&card).await? {
                Some(decision) => Some(decision),
                None => {
                    tracing::info!(card = %id, "Outcome decision abandoned");
                    return Err(LeadflowError::OutcomeRequired { card_id: id });
                }
            }
        } else {
            None
        };
        self.transition_card(id, stage, decision).await
    }

    pub async fn qualify(&self, id: CardId, pipelines: Vec<String>) -> Result<PipelineCard> {
        self.transition_card(id, Stage::Outcome, Some(Decision::Qualify { pipelines }))
            .await
    }

    pub async fn disqualify(
        &self,
        id: CardId,
        reason: DisqualificationReason,
        detail: Option<String>,
    ) -> Result<PipelineCard> {
        self.transition_card(
            id,
            Stage::Outcome,
            Some(Decision::Disqualify { reason, detail }),
        )
        .await
    }

    /// Mark a qualified card as won downstream.
    pub async fn record_win(&self, id: CardId) -> Result<PipelineCard> {
        let m = self
            .mutate(id, None, |card, now| gate::record_win(card, now))
            .await?;
        tracing::info!(card = %id, "Win recorded");
        self.commit(ChangeCause::Won { card_id: id });
        Ok(m.card)
    }

    pub async fn record_attempt(&self, id: CardId, draft: AttemptDraft) -> Result<ContactAttempt> {
        let max = self.inner.config.max_redistribution_attempts;
        let m = self
            .mutate(id, None, move |card, now| {
                attempts::record_attempt(card, draft, now, max)
            })
            .await?;
        tracing::info!(
            card = %id,
            channel = %m.value.channel,
            outcome = %m.value.outcome,
            representative = %m.value.representative,
            "Contact attempt recorded"
        );
        self.commit(ChangeCause::AttemptRecorded { card_id: id });
        Ok(m.value)
    }

    pub async fn complete_task(&self, task_id: TaskId) -> Result<Task> {
        let card = self.card_for_task(task_id).await?;
        self.change_task(card.id(), task_id, |task, now| tasks::complete(task, now))
            .await
    }

    pub async fn cancel_task(&self, task_id: TaskId) -> Result<Task> {
        let card = self.card_for_task(task_id).await?;
        self.change_task(card.id(), task_id, |task, _| tasks::cancel(task))
            .await
    }

    /// Hand a task to `to`, or to the best-ranked other active representative.
    pub async fn redistribute_task(&self, task_id: TaskId, to: Option<String>) -> Result<Task> {
        let card = self.card_for_task(task_id).await?;
        let current = card
            .task(task_id)
            .map(|t| t.assigned_to.clone())
            .unwrap_or_default();

        let target = match to {
            Some(rep) => {
                self.ensure_active(&rep).await?;
                rep
            }
            None => {
                let reps: Vec<_> = self
                    .inner
                    .roster
                    .list_active_representatives()
                    .await?
                    .into_iter()
                    .filter(|r| r.id != current)
                    .collect();
                select_representative(&reps, &card.lead)
                    .map(|(rep, _)| rep.id.clone())
                    .ok_or(LeadflowError::NoActiveRepresentatives)?
            }
        };

        let sla = self.inner.config.first_contact_window();
        let result = self
            .change_task(card.id(), task_id, |task, now| {
                tasks::redistribute(task, &target, now, sla)
            })
            .await;
        match &result {
            Ok(task) => tracing::info!(
                task = %task_id,
                from = %current,
                to = %task.assigned_to,
                attempts = task.redistribution_attempts,
                "Task redistributed"
            ),
            Err(e) if e.is_actionable() => {
                tracing::warn!(task = %task_id, error = %e, "Task needs manual escalation")
            }
            Err(_) => {}
        }
        result
    }

    /// Flag every open task past its due date as overdue. Tasks are never
    /// moved automatically. Returns how many were flagged.
    pub async fn refresh_overdue_tasks(&self) -> Result<usize> {
        let now = self.now();
        let cards = self.fetch_cards().await?;
        let mut flagged = 0;
        for card in cards.iter().filter(|c| {
            c.tasks
                .iter()
                .any(|t| t.is_past_due(now) && t.status != TaskStatus::Overdue)
        }) {
            let m = self
                .mutate(card.id(), None, |card, now| {
                    let n = tasks::mark_overdue(&mut card.tasks, now);
                    if n > 0 {
                        card.updated_at = now;
                    }
                    Ok(n)
                })
                .await?;
            flagged += m.value;
        }
        if flagged > 0 {
            tracing::info!(flagged, "Overdue tasks flagged");
            self.commit(ChangeCause::OverdueSwept { flagged });
        }
        Ok(flagged)
    }

    /// Recompute every active representative's load from unresolved cards
    /// and push it to the roster.
    pub async fn reconcile_load(&self) -> Result<BTreeMap<String, u32>> {
        let cards = self.fetch_cards().await?;
        let load = open_load(&cards);
        let mut applied = BTreeMap::new();
        for rep in self.inner.roster.list_active_representatives().await? {
            let count = load.get(&rep.id).copied().unwrap_or(0);
            if count != rep.active_leads {
                tracing::info!(
                    representative = %rep.id,
                    recorded = rep.active_leads,
                    actual = count,
                    "Load counter corrected"
                );
            }
            self.inner.roster.set_active_leads(&rep.id, count).await?;
            applied.insert(rep.id, count);
        }
        self.commit(ChangeCause::LoadReconciled);
        Ok(applied)
    }

    // -- reads --------------------------------------------------------------

    /// Every card, newest first. Falls back to the last cached collection
    /// when the store is unavailable.
    pub async fn get_all(&self) -> Result<Arc<Vec<PipelineCard>>> {
        self.collection(true).await
    }

    pub async fn get_by_id(&self, id: CardId) -> Result<PipelineCard> {
        self.load_record(id).await?.into_card()
    }

    /// Aggregate statistics. Never fails: a failed read falls back to the
    /// last cached report, then to an all-zero one.
    pub async fn statistics(&self) -> PipelineStats {
        let cache = &self.inner.cache;
        if let Some(stats) = cache.get::<PipelineStats>(STATS_KEY) {
            tracing::debug!("Statistics cache hit");
            return stats;
        }
        tracing::debug!("Statistics cache miss");

        let generation = cache.generation();
        match self.collection(false).await {
            Ok(cards) => {
                let stats = stats::compute(&cards, self.now(), &self.inner.config);
                let ttl = self.inner.config.stats_ttl;
                if !cache.set_if_current(STATS_KEY, stats.clone(), ttl, generation) {
                    tracing::debug!("Statistics changed during read, not cached");
                }
                stats
            }
            Err(e) => match cache.get_stale::<PipelineStats>(STATS_KEY) {
                Some(stale) => {
                    tracing::warn!(error = %e, stored_at = %stale.stored_at, "Serving stale statistics");
                    stale.value
                }
                None => {
                    tracing::warn!(error = %e, "Statistics unavailable, reporting zeros");
                    PipelineStats::default()
                }
            },
        }
    }

    /// Flattened rows for boards and listings.
    pub async fn list_rows(&self) -> Result<Vec<LeadRow>> {
        let now = self.now();
        let cards = self.get_all().await?;
        Ok(cards.iter().map(|c| LeadRow::from_card(c, now)).collect())
    }

    /// Lint every stored record, oldest first, without failing on the broken ones.
    pub async fn check(&self) -> Result<Vec<CardCheck>> {
        let records = self.query_all(RecordOrder::CreatedAsc).await?;
        Ok(records
            .into_iter()
            .map(|record| {
                let (id, name) = (record.id, record.name.clone());
                match record.into_card() {
                    Ok(card) => CardCheck {
                        id,
                        name,
                        diagnostics: lint::validate(&card),
                        error: None,
                    },
                    Err(e) => CardCheck {
                        id,
                        name,
                        diagnostics: Vec::new(),
                        error: Some(e.to_string()),
                    },
                }
            })
            .collect())
    }

    // -- subscriptions ------------------------------------------------------

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<PipelineEvent> {
        self.inner.events.subscribe()
    }

    /// Call `callback` for every change until the [`Subscription`] is dropped.
    pub fn subscribe_with<F>(&self, callback: F) -> Subscription
    where
        F: Fn(PipelineEvent) + Send + 'static,
    {
        self.inner.events.subscribe_with(callback)
    }

    // -- internals ----------------------------------------------------------

    async fn transition_card(
        &self,
        id: CardId,
        stage: Stage,
        decision: Option<Decision>,
    ) -> Result<PipelineCard> {
        let m = self
            .mutate(id, None, move |card, now| {
                gate::transition(card, stage, decision, now, None)
            })
            .await?;
        if !m.changed {
            return Ok(m.card);
        }

        let t = m.value;
        if let Some(rep) = &m.card.assigned_to {
            match t.kind {
                TransitionKind::Resolved => self.note_release(rep).await,
                TransitionKind::Reopened => self.note_assignment(rep).await,
                _ => {}
            }
        }

        let cause = match (t.kind, &m.card.outcome) {
            (TransitionKind::Resolved | TransitionKind::Redecided, Some(LeadOutcome::Qualified { .. })) => {
                ChangeCause::Qualified { card_id: id }
            }
            (
                TransitionKind::Resolved | TransitionKind::Redecided,
                Some(LeadOutcome::Disqualified { .. }),
            ) => ChangeCause::Disqualified { card_id: id },
            _ => ChangeCause::StageChanged {
                card_id: id,
                from: t.from,
                to: t.to,
            },
        };
        tracing::info!(
            card = %id,
            from = %t.from,
            to = %t.to,
            kind = ?t.kind,
            qualification = %m.card.qualification,
            "Stage changed"
        );
        self.commit(cause);
        Ok(m.card)
    }

    async fn change_task<F>(&self, card_id: CardId, task_id: TaskId, f: F) -> Result<Task>
    where
        F: FnOnce(&mut Task, DateTime<Utc>) -> Result<()> + Send,
    {
        let m = self
            .mutate(card_id, None, move |card, now| {
                let task = card
                    .task_mut(task_id)
                    .ok_or_else(|| LeadflowError::task_not_found(task_id))?;
                f(task, now)?;
                let task = task.clone();
                card.updated_at = now;
                Ok(task)
            })
            .await?;
        tracing::info!(card = %card_id, task = %task_id, status = %m.value.status, "Task changed");
        self.commit(ChangeCause::TaskChanged { card_id, task_id });
        Ok(m.value)
    }

    /// One read-modify-write. Nothing is written when `f` changes nothing.
    async fn mutate<T, F>(
        &self,
        id: CardId,
        expected_version: Option<u64>,
        f: F,
    ) -> Result<Mutation<T>>
    where
        F: FnOnce(&mut PipelineCard, DateTime<Utc>) -> Result<T> + Send,
        T: Send,
    {
        let before = self.load_record(id).await?;
        let mut card = before.clone().into_card()?;
        if let Some(expected) = expected_version {
            if card.version != expected {
                return Err(LeadflowError::Conflict {
                    card_id: id,
                    expected,
                    actual: card.version,
                });
            }
        }

        let value = f(&mut card, self.now())?;
        let mut after = LeadRecord::from_card(&card)?;
        if RecordPatch::diff(&before, &after)?.is_empty() {
            return Ok(Mutation {
                card,
                value,
                changed: false,
            });
        }

        card.version += 1;
        after.version = card.version;
        let patch = RecordPatch::diff(&before, &after)?;
        if let Err(e) = self.inner.store.update(id, &patch).await {
            tracing::warn!(card = %id, error = %e, "Card write failed");
            return Err(e);
        }
        tracing::debug!(
            card = %id,
            columns = ?patch.columns().collect::<Vec<_>>(),
            "Card persisted"
        );
        Ok(Mutation {
            card,
            value,
            changed: true,
        })
    }

    fn commit(&self, cause: ChangeCause) {
        self.inner.cache.invalidate_prefix("cards:");
        self.inner.cache.invalidate_prefix("stats:");
        if self.inner.events.receiver_count() == 0 {
            return;
        }
        let this = self.clone();
        tokio::spawn(async move {
            let event = match this.fetch_cards().await {
                Ok(cards) => PipelineEvent::Changed { cause, cards },
                Err(e) => {
                    tracing::warn!(error = %e, "Refresh after change failed");
                    PipelineEvent::RefreshFailed {
                        cause,
                        error: e.to_string(),
                    }
                }
            };
            this.inner.events.emit(event);
        });
    }

    async fn collection(&self, allow_stale: bool) -> Result<Arc<Vec<PipelineCard>>> {
        let cache = &self.inner.cache;
        if let Some(cards) = cache.get::<Arc<Vec<PipelineCard>>>(COLLECTION_KEY) {
            tracing::debug!(cards = cards.len(), "Collection cache hit");
            return Ok(cards);
        }
        tracing::debug!("Collection cache miss");

        let generation = cache.generation();
        match self.fetch_cards().await {
            Ok(cards) => {
                let ttl = self.inner.config.collection_ttl;
                if !cache.set_if_current(COLLECTION_KEY, cards.clone(), ttl, generation) {
                    tracing::debug!("Collection changed during read, not cached");
                }
                Ok(cards)
            }
            Err(e) if allow_stale && e.is_persistence() => {
                match cache.get_stale::<Arc<Vec<PipelineCard>>>(COLLECTION_KEY) {
                    Some(stale) => {
                        tracing::warn!(error = %e, stored_at = %stale.stored_at, "Serving stale collection");
                        Ok(stale.value)
                    }
                    None => Err(e),
                }
            }
            Err(e) => Err(e),
        }
    }

    async fn query_all(&self, order: RecordOrder) -> Result<Vec<LeadRecord>> {
        let timeout = self.inner.config.fetch_timeout;
        let filter = RecordFilter::all();
        let query = self.inner.store.query(&filter, order, None);
        tokio::time::timeout(timeout, query)
            .await
            .map_err(|_| LeadflowError::StoreTimeout {
                operation: "query".into(),
                timeout_ms: timeout.as_millis() as u64,
            })?
    }

    async fn fetch_cards(&self) -> Result<Arc<Vec<PipelineCard>>> {
        let cards = self
            .query_all(RecordOrder::CreatedDesc)
            .await?
            .into_iter()
            .map(LeadRecord::into_card)
            .collect::<Result<Vec<_>>>()?;
        Ok(Arc::new(cards))
    }

    async fn load_record(&self, id: CardId) -> Result<LeadRecord> {
        self.inner
            .store
            .query(&RecordFilter::by_id(id), RecordOrder::default(), Some(1))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| LeadflowError::card_not_found(id))
    }

    async fn card_for_task(&self, task_id: TaskId) -> Result<PipelineCard> {
        self.fetch_cards()
            .await?
            .iter()
            .find(|c| c.task(task_id).is_some())
            .cloned()
            .ok_or_else(|| LeadflowError::task_not_found(task_id))
    }

    async fn ensure_active(&self, rep: &str) -> Result<()> {
        let active = self.inner.roster.list_active_representatives().await?;
        if active.iter().any(|r| r.id == rep) {
            Ok(())
        } else {
            Err(LeadflowError::NotFound {
                entity: "active representative",
                id: rep.to_string(),
            })
        }
    }

    async fn note_assignment(&self, rep: &str) {
        if let Err(e) = self.inner.roster.record_assignment(rep).await {
            tracing::warn!(representative = %rep, error = %e, "Load counter not incremented");
        }
    }

    async fn note_release(&self, rep: &str) {
        if let Err(e) = self.inner.roster.release_assignment(rep).await {
            tracing::warn!(representative = %rep, error = %e, "Load counter not decremented");
        }
    }
}
