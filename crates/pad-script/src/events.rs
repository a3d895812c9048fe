//! Run lifecycle events
//!
//! Published on a broadcast channel so any number of observers (a CLI
//! progress line, a UI) can follow a run without touching the run thread.

use chrono::{DateTime, Utc};
use pad_core::RunId;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

/// Default channel capacity for run events
const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// How a run ended, as reported in [`RunEvent::Finished`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    Stopped,
    Failed,
}

/// One lifecycle event of a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    Started {
        run_id: RunId,
        script: String,
        at: DateTime<Utc>,
    },
    Step {
        run_id: RunId,
        ip: usize,
        command: String,
    },
    Finished {
        run_id: RunId,
        status: RunStatus,
        steps: usize,
        elapsed_ms: u64,
        error: Option<String>,
    },
}

impl RunEvent {
    pub fn run_id(&self) -> &RunId {
        match self {
            RunEvent::Started { run_id, .. }
            | RunEvent::Step { run_id, .. }
            | RunEvent::Finished { run_id, .. } => run_id,
        }
    }
}

/// Sender side of the run event channel
#[derive(Debug, Clone)]
pub struct RunEvents {
    sender: broadcast::Sender<RunEvent>,
}

impl RunEvents {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.sender.subscribe()
    }

    /// Publish an event; having no subscribers is not an error
    pub fn publish(&self, event: RunEvent) {
        trace!(?event, "run event");
        let _ = self.sender.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for RunEvents {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_without_subscribers() {
        let events = RunEvents::new();
        events.publish(RunEvent::Step {
            run_id: RunId::new(),
            ip: 0,
            command: "wait".into(),
        });
        assert_eq!(events.subscriber_count(), 0);
    }

    #[test]
    fn test_subscribers_receive_in_order() {
        let events = RunEvents::new();
        let mut rx = events.subscribe();
        let run_id = RunId::with_id("run-1");

        events.publish(RunEvent::Step {
            run_id: run_id.clone(),
            ip: 0,
            command: "set".into(),
        });
        events.publish(RunEvent::Finished {
            run_id: run_id.clone(),
            status: RunStatus::Completed,
            steps: 1,
            elapsed_ms: 0,
            error: None,
        });

        assert!(matches!(rx.try_recv().unwrap(), RunEvent::Step { ip: 0, .. }));
        let finished = rx.try_recv().unwrap();
        assert_eq!(finished.run_id(), &run_id);
        assert!(matches!(finished, RunEvent::Finished { status: RunStatus::Completed, .. }));
    }

    #[test]
    fn test_event_json_shape() {
        let event = RunEvent::Finished {
            run_id: RunId::with_id("r"),
            status: RunStatus::Stopped,
            steps: 3,
            elapsed_ms: 12,
            error: None,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "finished");
        assert_eq!(value["status"], "stopped");
        assert_eq!(value["run_id"], "r");
    }
}
