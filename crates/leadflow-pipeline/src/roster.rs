//! Roster collaborator: the source of representatives and their load.

use std::collections::BTreeMap;

use async_trait::async_trait;

use leadflow_types::{LeadflowError, Representative, Result};

#[async_trait]
pub trait Roster: Send + Sync {
    async fn list_active_representatives(&self) -> Result<Vec<Representative>>;

    /// Advisory increment of a representative's active-lead counter.
    async fn record_assignment(&self, representative: &str) -> Result<()>;

    /// Advisory decrement; never goes below zero.
    async fn release_assignment(&self, representative: &str) -> Result<()>;

    /// Overwrite the counter with a reconciled value.
    async fn set_active_leads(&self, representative: &str, count: u32) -> Result<()>;
}

/// In-process [`Roster`].
#[derive(Default)]
pub struct MemoryRoster {
    reps: tokio::sync::RwLock<BTreeMap<String, Representative>>,
}

impl MemoryRoster {
    pub fn new(reps: impl IntoIterator<Item = Representative>) -> Self {
        Self {
            reps: tokio::sync::RwLock::new(reps.into_iter().map(|r| (r.id.clone(), r)).collect()),
        }
    }

    /// Add or replace a representative.
    pub async fn upsert(&self, rep: Representative) {
        self.reps.write().await.insert(rep.id.clone(), rep);
    }

    pub async fn get(&self, id: &str) -> Option<Representative> {
        self.reps.read().await.get(id).cloned()
    }

    /// Every representative, active or not.
    pub async fn all(&self) -> Vec<Representative> {
        self.reps.read().await.values().cloned().collect()
    }

    async fn with_rep<F>(&self, id: &str, f: F) -> Result<()>
    where
        F: FnOnce(&mut Representative) + Send,
    {
        let mut reps = self.reps.write().await;
        let rep = reps.get_mut(id).ok_or_else(|| LeadflowError::NotFound {
            entity: "representative",
            id: id.to_string(),
        })?;
        f(rep);
        Ok(())
    }
}

#[async_trait]
impl Roster for MemoryRoster {
    async fn list_active_representatives(&self) -> Result<Vec<Representative>> {
        Ok(self
            .reps
            .read()
            .await
            .values()
            .filter(|r| r.active)
            .cloned()
            .collect())
    }

    async fn record_assignment(&self, representative: &str) -> Result<()> {
        self.with_rep(representative, |r| r.active_leads += 1).await
    }

    async fn release_assignment(&self, representative: &str) -> Result<()> {
        self.with_rep(representative, |r| {
            r.active_leads = r.active_leads.saturating_sub(1)
        })
        .await
    }

    async fn set_active_leads(&self, representative: &str, count: u32) -> Result<()> {
        self.with_rep(representative, |r| r.active_leads = count).await
    }
}
