//! Change notifications for board/UI subscribers.
//!
//! Every committed mutation triggers a fresh full read which is broadcast as
//! a [`PipelineEvent`] over a [`tokio::sync::broadcast`] channel. Slow
//! subscribers lag and lose events; they never hold up a mutation.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

use leadflow_types::{CardId, PipelineCard, Stage, TaskId};

/// The mutation that caused a refresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChangeCause {
    Created { card_id: CardId },
    Updated { card_id: CardId },
    StageChanged { card_id: CardId, from: Stage, to: Stage },
    AttemptRecorded { card_id: CardId },
    TaskChanged { card_id: CardId, task_id: TaskId },
    Qualified { card_id: CardId },
    Disqualified { card_id: CardId },
    Won { card_id: CardId },
    OverdueSwept { flagged: usize },
    LoadReconciled,
}

impl ChangeCause {
    /// The card touched, for single-card mutations.
    pub fn card_id(&self) -> Option<CardId> {
        match self {
            ChangeCause::Created { card_id }
            | ChangeCause::Updated { card_id }
            | ChangeCause::StageChanged { card_id, .. }
            | ChangeCause::AttemptRecorded { card_id }
            | ChangeCause::TaskChanged { card_id, .. }
            | ChangeCause::Qualified { card_id }
            | ChangeCause::Disqualified { card_id }
            | ChangeCause::Won { card_id } => Some(*card_id),
            ChangeCause::OverdueSwept { .. } | ChangeCause::LoadReconciled => None,
        }
    }
}

#[derive(Debug, Clone)]
pub enum PipelineEvent {
    /// A mutation committed; `cards` is the collection read right after it.
    Changed {
        cause: ChangeCause,
        cards: Arc<Vec<PipelineCard>>,
    },
    /// A mutation committed but the follow-up read failed.
    RefreshFailed { cause: ChangeCause, error: String },
}

impl PipelineEvent {
    pub fn cause(&self) -> &ChangeCause {
        match self {
            PipelineEvent::Changed { cause, .. } | PipelineEvent::RefreshFailed { cause, .. } => {
                cause
            }
        }
    }
}

/// Event emitter wrapping a broadcast sender.
#[derive(Clone)]
pub struct EventEmitter {
    sender: tokio::sync::broadcast::Sender<PipelineEvent>,
}

impl EventEmitter {
    /// Create a new emitter with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = tokio::sync::broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Emit an event to all current subscribers.
    ///
    /// If there are no active receivers the event is silently dropped.
    pub fn emit(&self, event: PipelineEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<PipelineEvent> {
        self.sender.subscribe()
    }

    /// Run `callback` for every event on a spawned task until the returned
    /// [`Subscription`] is dropped or unsubscribed. Must be called within a
    /// tokio runtime.
    pub fn subscribe_with<F>(&self, callback: F) -> Subscription
    where
        F: Fn(PipelineEvent) + Send + 'static,
    {
        let mut stream = BroadcastStream::new(self.sender.subscribe());
        let handle = tokio::spawn(async move {
            while let Some(item) = stream.next().await {
                match item {
                    Ok(event) => callback(event),
                    Err(lagged) => tracing::debug!(error = %lagged, "Subscriber lagged, events dropped"),
                }
            }
        });
        Subscription { handle }
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Handle for a callback subscription. Dropping it unsubscribes.
pub struct Subscription {
    handle: tokio::task::JoinHandle<()>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        // Drop aborts the task.
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn changed(cause: ChangeCause) -> PipelineEvent {
        PipelineEvent::Changed {
            cause,
            cards: Arc::new(Vec::new()),
        }
    }

    #[tokio::test]
    async fn emitter_sends_and_receives() {
        let emitter = EventEmitter::new(16);
        let mut rx = emitter.subscribe();

        emitter.emit(changed(ChangeCause::LoadReconciled));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.cause(), &ChangeCause::LoadReconciled);
    }

    #[test]
    fn emit_with_no_subscribers_does_not_panic() {
        let emitter = EventEmitter::new(16);
        emitter.emit(PipelineEvent::RefreshFailed {
            cause: ChangeCause::OverdueSwept { flagged: 2 },
            error: "store unavailable".into(),
        });
    }

    #[tokio::test]
    async fn callback_subscription_stops_after_unsubscribe() {
        let emitter = EventEmitter::new(16);
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let sub = emitter.subscribe_with(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        emitter.emit(changed(ChangeCause::LoadReconciled));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(seen.load(Ordering::SeqCst), 1);

        sub.unsubscribe();
        tokio::time::sleep(Duration::from_millis(20)).await;
        emitter.emit(changed(ChangeCause::LoadReconciled));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cause_serializes_with_type_tag() {
        let id = uuid::Uuid::nil();
        let json = serde_json::to_value(ChangeCause::StageChanged {
            card_id: id,
            from: Stage::NewLead,
            to: Stage::Call1,
        })
        .unwrap();
        assert_eq!(json["type"], "stage_changed");
        assert_eq!(json["to"], "call_1");
        assert_eq!(ChangeCause::OverdueSwept { flagged: 1 }.card_id(), None);
    }
}
