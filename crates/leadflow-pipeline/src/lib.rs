//! Lead pipeline engine: distribution, stage gate, contact log, tasks,
//! caching and statistics.
//!
//! [`PipelineRepository`] is the entry point. It reads and writes cards
//! through a [`LeadStore`], assigns leads from a [`Roster`], enforces the
//! outcome gate, derives follow-up tasks, memoizes expensive reads in a
//! [`TtlCache`] and broadcasts [`PipelineEvent`]s after every committed change.

pub mod attempts;
pub mod cache;
pub mod clock;
pub mod config;
pub mod distribution;
pub mod duration_serde;
pub mod events;
pub mod gate;
pub mod lint;
pub mod metrics;
pub mod projection;
pub mod repository;
pub mod roster;
pub mod snapshot;
pub mod stats;
pub mod store;
pub mod tasks;

#[cfg(test)]
pub(crate) mod testing;

pub use cache::{cache_key, Cached, TtlCache};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::PipelineConfig;
pub use distribution::{select_representative, Assignment, AssignmentReason, DistributionEngine};
pub use events::{ChangeCause, EventEmitter, PipelineEvent, Subscription};
pub use gate::{
    AbandonDecision, Decision, DecisionResolver, PresetDecisions, Transition, TransitionKind,
};
pub use lint::{validate, validate_or_raise, Diagnostic, LintRule, Severity};
pub use metrics::{format_duration, time_in_current_stage, total_time_in_pipeline};
pub use projection::LeadRow;
pub use repository::{CardCheck, LeadPatch, NewLead, PipelineRepository};
pub use roster::{MemoryRoster, Roster};
pub use snapshot::{load_snapshot, save_snapshot, StoreSnapshot};
pub use stats::{FunnelRatios, PipelineStats, ReasonHistogram, RepWorkload};
pub use store::{LeadRecord, LeadStore, MemoryStore, RecordFilter, RecordOrder, RecordPatch};
