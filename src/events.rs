//! Event emitter. Thin wrapper over `kube::runtime::events::Recorder`, publishing the
//! full set of event reasons the chaos controller emits.

use kube::runtime::events::{Event, EventType, Recorder};

pub struct EventEmitter {
    recorder: Recorder,
}

impl EventEmitter {
    pub fn new(recorder: Recorder) -> Self {
        Self { recorder }
    }

    async fn publish(&self, type_: EventType, reason: &str, note: String) {
        let result = self
            .recorder
            .publish(Event {
                type_,
                reason: reason.to_string(),
                note: Some(note),
                action: "Reconciling".to_string(),
                secondary: None,
            })
            .await;
        // Event delivery is best-effort: failures are logged, never propagated.
        if let Err(e) = result {
            tracing::warn!(error = %e, reason, "failed to publish event");
        }
    }

    pub async fn started(&self, experiment: &str) {
        self.publish(EventType::Normal, "ExperimentStarted", format!("Experiment `{experiment}` started")).await;
    }

    pub async fn succeeded(&self, experiment: &str, message: &str) {
        self.publish(EventType::Normal, "ExperimentSucceeded", format!("Experiment `{experiment}`: {message}")).await;
    }

    pub async fn retrying(&self, experiment: &str, attempt: u32, delay: std::time::Duration) {
        self.publish(
            EventType::Warning,
            "ExperimentRetrying",
            format!("Experiment `{experiment}` retry {attempt} scheduled in {delay:?}"),
        )
        .await;
    }

    pub async fn failed(&self, experiment: &str, message: &str) {
        self.publish(EventType::Warning, "ExperimentFailed", format!("Experiment `{experiment}` failed: {message}")).await;
    }

    pub async fn chaos_action(&self, verb: &str, resource: &str) {
        self.publish(EventType::Warning, &format!("Chaos{verb}"), format!("affected `{resource}`")).await;
    }

    pub async fn action_failed(&self, action: &str, resource: &str, message: &str) {
        self.publish(
            EventType::Warning,
            &format!("{action}Failed"),
            format!("failed to affect `{resource}`: {message}"),
        )
        .await;
    }
}
