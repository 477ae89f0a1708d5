//! Channel-backed event bus.

use async_trait::async_trait;
use futures::stream;
use gantry_core::events::Event;
use gantry_core::ports::{EventBus, EventStream};
use gantry_core::Result;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::RwLock;
use tracing::debug;

struct Subscription {
    pattern: String,
    sender: mpsc::UnboundedSender<Event>,
}

/// In-process event bus.
///
/// Subjects are dot-separated; subscription patterns support the
/// NATS-style wildcards `*` (one token) and `>` (rest of the subject).
#[derive(Clone, Default)]
pub struct MemEventBus {
    subscriptions: Arc<RwLock<Vec<Subscription>>>,
}

impl MemEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn subject_matches(pattern: &str, subject: &str) -> bool {
        let mut pattern_tokens = pattern.split('.');
        let mut subject_tokens = subject.split('.');

        loop {
            match (pattern_tokens.next(), subject_tokens.next()) {
                (Some(">"), Some(_)) => return true,
                (Some("*"), Some(_)) => continue,
                (Some(p), Some(s)) if p == s => continue,
                (Some(_), Some(_)) => return false,
                (None, None) => return true,
                _ => return false,
            }
        }
    }
}

#[async_trait]
impl EventBus for MemEventBus {
    async fn publish(&self, event: Event) -> Result<()> {
        let subject = event.subject();
        debug!(subject = %subject, "publishing event");

        let mut subs = self.subscriptions.write().await;
        // Drop subscribers whose receiver side is gone.
        subs.retain(|sub| {
            if !Self::subject_matches(&sub.pattern, &subject) {
                return true;
            }
            sub.sender.send(event.clone()).is_ok()
        });

        Ok(())
    }

    async fn subscribe(&self, pattern: &str) -> Result<EventStream> {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.subscriptions.write().await.push(Subscription {
            pattern: pattern.to_string(),
            sender,
        });

        let stream = stream::unfold(receiver, |mut receiver| async move {
            receiver.recv().await.map(|event| (Ok(event), receiver))
        });
        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use futures::StreamExt;
    use gantry_core::events::FanOutEmptyPayload;
    use gantry_core::ids::RunId;

    #[test]
    fn test_subject_matching() {
        assert!(MemEventBus::subject_matches("run.>", "run.queued.wfl_1"));
        assert!(MemEventBus::subject_matches(
            "run.*.job.*.completed",
            "run.run_1.job.lint.completed"
        ));
        assert!(!MemEventBus::subject_matches(
            "run.*.job.*.completed",
            "run.run_1.job.lint.started"
        ));
        assert!(!MemEventBus::subject_matches("artifact.>", "run.queued.wfl_1"));
        assert!(MemEventBus::subject_matches("run.queued.wfl_1", "run.queued.wfl_1"));
    }

    #[tokio::test]
    async fn test_publish_reaches_matching_subscriber() {
        let bus = MemEventBus::new();
        let mut events = bus.subscribe("run.*.fanout.>").await.unwrap();

        let run_id = RunId::new();
        bus.publish(Event::FanOutEmpty(FanOutEmptyPayload {
            run_id,
            job_name: "integration-test".to_string(),
            source_job: "collect-integration-tests".to_string(),
            expanded_at: Utc::now(),
        }))
        .await
        .unwrap();

        let received = events.next().await.unwrap().unwrap();
        assert!(matches!(received, Event::FanOutEmpty(p) if p.run_id == run_id));
    }
}
