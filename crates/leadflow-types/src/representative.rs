use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// A staff member who works leads, as reported by the roster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Representative {
    pub id: String,
    pub name: String,
    pub active: bool,
    pub capacity: u32,
    pub active_leads: u32,
    /// Lower rank = higher priority.
    pub priority_rank: u32,
    #[serde(default)]
    pub specialties: BTreeSet<String>,
}

impl Representative {
    pub fn new(id: impl Into<String>, priority_rank: u32, capacity: u32) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            active: true,
            capacity,
            active_leads: 0,
            priority_rank,
            specialties: BTreeSet::new(),
        }
    }

    pub fn with_load(mut self, active_leads: u32) -> Self {
        self.active_leads = active_leads;
        self
    }

    pub fn with_specialty(mut self, tag: impl Into<String>) -> Self {
        self.specialties.insert(tag.into());
        self
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }

    pub fn has_spare_capacity(&self) -> bool {
        self.active_leads < self.capacity
    }
}
