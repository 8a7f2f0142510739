//! Pipeline events and the broadcast bus that distributes them.
//!
//! Events are serialized as JSON with a `type` tag field, e.g.:
//! `{"type":"PhaseChanged","job_id":"...","phase":"validation"}`

use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::models::{JobType, TestCategory};

/// Orchestrator phase for one document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Extraction,
    Validation,
    Generation,
    Done,
    Failed,
    Cancelled,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Extraction => "extraction",
            Self::Validation => "validation",
            Self::Generation => "generation",
            Self::Done => "done",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Something observable happened to a processing job.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum PipelineEvent {
    /// A job was created.
    JobQueued {
        job_id: Uuid,
        document_id: Uuid,
        job_type: JobType,
    },
    /// A job started processing.
    JobStarted {
        job_id: Uuid,
        document_id: Uuid,
        job_type: JobType,
    },
    /// The orchestrator entered a new phase.
    PhaseChanged { job_id: Uuid, phase: Phase },
    /// Job progress update.
    JobProgress {
        job_id: Uuid,
        progress: i32,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    /// A category's generation loop finished.
    CategoryGenerated {
        job_id: Uuid,
        category: TestCategory,
        accepted: usize,
        required: usize,
    },
    /// A job completed successfully.
    JobCompleted {
        job_id: Uuid,
        job_type: JobType,
        duration_ms: i64,
    },
    /// A job failed.
    JobFailed {
        job_id: Uuid,
        job_type: JobType,
        error: String,
    },
    /// A job was cancelled.
    JobCancelled { job_id: Uuid, job_type: JobType },
}

impl PipelineEvent {
    /// Namespaced event type, e.g. `"job.progress"`.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::JobQueued { .. } => "job.queued",
            Self::JobStarted { .. } => "job.started",
            Self::PhaseChanged { .. } => "job.phase",
            Self::JobProgress { .. } => "job.progress",
            Self::CategoryGenerated { .. } => "job.category",
            Self::JobCompleted { .. } => "job.completed",
            Self::JobFailed { .. } => "job.failed",
            Self::JobCancelled { .. } => "job.cancelled",
        }
    }

    /// The job this event belongs to.
    pub fn job_id(&self) -> Uuid {
        match self {
            Self::JobQueued { job_id, .. }
            | Self::JobStarted { job_id, .. }
            | Self::PhaseChanged { job_id, .. }
            | Self::JobProgress { job_id, .. }
            | Self::CategoryGenerated { job_id, .. }
            | Self::JobCompleted { job_id, .. }
            | Self::JobFailed { job_id, .. }
            | Self::JobCancelled { job_id, .. } => *job_id,
        }
    }
}

/// Broadcast-based bus distributing pipeline events to any number of consumers.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PipelineEvent>,
}

impl EventBus {
    /// Create a new event bus with the given buffer capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Emit an event. Dropped silently when nobody is subscribed.
    pub fn emit(&self, event: PipelineEvent) {
        tracing::trace!(
            event_type = event.event_type(),
            job_id = %event.job_id(),
            subscriber_count = self.tx.receiver_count(),
            "EventBus emit"
        );
        let _ = self.tx.send(event);
    }

    /// Subscribe to receive events. Each subscriber gets its own independent stream.
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.tx.subscribe()
    }

    /// Returns the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(crate::defaults::EVENT_BUS_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_event_bus_emit_subscribe() {
        let bus = EventBus::new(32);
        let mut rx = bus.subscribe();
        let job_id = Uuid::new_v4();

        bus.emit(PipelineEvent::PhaseChanged {
            job_id,
            phase: Phase::Validation,
        });

        let event = rx.recv().await.unwrap();
        assert!(matches!(
            event,
            PipelineEvent::PhaseChanged {
                phase: Phase::Validation,
                ..
            }
        ));
        assert_eq!(event.job_id(), job_id);
        assert_eq!(event.event_type(), "job.phase");
    }

    #[tokio::test]
    async fn test_event_bus_multiple_subscribers() {
        let bus = EventBus::new(32);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.emit(PipelineEvent::JobStarted {
            job_id: Uuid::nil(),
            document_id: Uuid::nil(),
            job_type: JobType::TestGeneration,
        });

        assert!(matches!(rx1.recv().await.unwrap(), PipelineEvent::JobStarted { .. }));
        assert!(matches!(rx2.recv().await.unwrap(), PipelineEvent::JobStarted { .. }));
    }

    #[test]
    fn test_event_bus_no_subscribers_ok() {
        let bus = EventBus::default();
        bus.emit(PipelineEvent::JobCancelled {
            job_id: Uuid::nil(),
            job_type: JobType::Embedding,
        });
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_event_json_serialization() {
        let event = PipelineEvent::JobProgress {
            job_id: Uuid::nil(),
            progress: 40,
            message: None,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"JobProgress""#));
        assert!(json.contains(r#""progress":40"#));
        assert!(!json.contains("message"));
    }

    #[test]
    fn test_failed_event_carries_job_type() {
        let event = PipelineEvent::JobFailed {
            job_id: Uuid::nil(),
            job_type: JobType::TestGeneration,
            error: "quota shortfall: 12/15".to_string(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""job_type":"test_generation""#));
    }
}
