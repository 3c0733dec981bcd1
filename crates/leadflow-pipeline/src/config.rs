//! Tunables for the pipeline engine.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Longest duration any setting accepts (365 days).
const MAX_SETTING: Duration = Duration::from_secs(365 * 24 * 3600);

/// Configuration for a [`PipelineRepository`](crate::PipelineRepository).
///
/// Every field has a default, so a config file only needs the keys it changes:
///
/// ```json
/// { "stats_ttl": "5m", "max_redistribution_attempts": 5 }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// How long aggregate statistics stay fresh in the cache.
    #[serde(with = "crate::duration_serde")]
    pub stats_ttl: Duration,
    /// How long the full card collection stays fresh in the cache.
    #[serde(with = "crate::duration_serde")]
    pub collection_ttl: Duration,
    /// Upper bound on a full-collection fetch before falling back to cache.
    #[serde(with = "crate::duration_serde")]
    pub fetch_timeout: Duration,
    /// Window for the first-contact task created with every card.
    #[serde(with = "crate::duration_serde")]
    pub first_contact_sla: Duration,
    /// A `new_lead` card untouched for longer than this counts as stale.
    #[serde(with = "crate::duration_serde")]
    pub stale_new_lead_after: Duration,
    pub max_redistribution_attempts: u32,
    /// Number of disqualification reasons listed before the overflow bucket.
    pub reason_top_n: usize,
    /// Broadcast buffer for change events; slower subscribers lag past it.
    pub event_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            stats_ttl: Duration::from_secs(4 * 60),
            collection_ttl: Duration::from_secs(2 * 60),
            fetch_timeout: Duration::from_secs(10),
            first_contact_sla: Duration::from_secs(24 * 3600),
            stale_new_lead_after: Duration::from_secs(24 * 3600),
            max_redistribution_attempts: 3,
            reason_top_n: 5,
            event_capacity: 256,
        }
    }
}

impl PipelineConfig {
    /// Read a JSON config file. Missing keys keep their defaults.
    pub fn load(path: &Path) -> leadflow_types::Result<Self> {
        let data = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&data)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> leadflow_types::Result<()> {
        if self.event_capacity == 0 {
            return Err(leadflow_types::LeadflowError::Validation(
                "event_capacity must be at least 1".into(),
            ));
        }
        if self.fetch_timeout.is_zero() {
            return Err(leadflow_types::LeadflowError::Validation(
                "fetch_timeout must be positive".into(),
            ));
        }
        for (name, value) in [
            ("stats_ttl", self.stats_ttl),
            ("collection_ttl", self.collection_ttl),
            ("fetch_timeout", self.fetch_timeout),
            ("first_contact_sla", self.first_contact_sla),
            ("stale_new_lead_after", self.stale_new_lead_after),
        ] {
            if value > MAX_SETTING {
                return Err(leadflow_types::LeadflowError::Validation(format!(
                    "{name} must not exceed 365d"
                )));
            }
        }
        Ok(())
    }

    pub(crate) fn first_contact_window(&self) -> chrono::Duration {
        to_chrono(self.first_contact_sla)
    }

    pub(crate) fn stale_after(&self) -> chrono::Duration {
        to_chrono(self.stale_new_lead_after)
    }
}

/// Settings are capped at [`MAX_SETTING`], so the conversion never overflows.
fn to_chrono(d: Duration) -> chrono::Duration {
    chrono::Duration::milliseconds(d.min(MAX_SETTING).as_millis() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = PipelineConfig::default();
        assert_eq!(config.stats_ttl, Duration::from_secs(240));
        assert_eq!(config.collection_ttl, Duration::from_secs(120));
        assert_eq!(config.fetch_timeout, Duration::from_secs(10));
        assert_eq!(config.max_redistribution_attempts, 3);
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("leadflow.json");
        std::fs::write(&path, r#"{ "stats_ttl": "5m", "max_redistribution_attempts": 5 }"#)
            .unwrap();

        let config = PipelineConfig::load(&path).unwrap();
        assert_eq!(config.stats_ttl, Duration::from_secs(300));
        assert_eq!(config.max_redistribution_attempts, 5);
        assert_eq!(config.collection_ttl, Duration::from_secs(120));
    }

    #[test]
    fn durations_serialize_compactly() {
        let json = serde_json::to_value(PipelineConfig::default()).unwrap();
        assert_eq!(json["stats_ttl"], "4m");
        assert_eq!(json["fetch_timeout"], "10s");
        assert_eq!(json["first_contact_sla"], "24h");
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, r#"{ "event_capacity": 0 }"#).unwrap();
        assert!(PipelineConfig::load(&path).is_err());
    }

    #[test]
    fn oversized_durations_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("huge.json");
        std::fs::write(&path, r#"{ "first_contact_sla": "9999999999999h" }"#).unwrap();
        assert!(matches!(
            PipelineConfig::load(&path),
            Err(leadflow_types::LeadflowError::Validation(_))
        ));

        std::fs::write(&path, r#"{ "stats_ttl": "999999999999999999d" }"#).unwrap();
        assert!(PipelineConfig::load(&path).is_err());

        let year = PipelineConfig {
            first_contact_sla: MAX_SETTING,
            ..PipelineConfig::default()
        };
        assert!(year.validate().is_ok());
        assert_eq!(year.first_contact_window(), chrono::Duration::days(365));
    }
}
