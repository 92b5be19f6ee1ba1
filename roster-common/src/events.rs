//! Event types and EventBus for the Roster engine
//!
//! Every mutating engine operation announces its outcome on the bus.
//! Emission is lossy: an operation never fails because nobody listens.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Roster event types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EngineEvent {
    /// Regular sessions of a class were (re)generated from its schedule
    SessionsExpanded {
        class_id: Uuid,
        /// Number of regular sessions after regeneration
        session_count: usize,
        timestamp: DateTime<Utc>,
    },

    /// Attendance was saved for a (class, date)
    AttendanceSaved {
        summary_id: Uuid,
        class_id: Uuid,
        date: NaiveDate,
        /// Number of finalized marks persisted
        detail_count: usize,
        timestamp: DateTime<Utc>,
    },

    /// A session was marked completed by an attendance summary
    SessionCompleted {
        session_id: Uuid,
        summary_id: Uuid,
        timestamp: DateTime<Utc>,
    },

    /// A make-up obligation was created from an absence
    RemediationCreated {
        obligation_id: Uuid,
        student_id: Uuid,
        class_id: Uuid,
        absence_date: NaiveDate,
        timestamp: DateTime<Utc>,
    },

    /// A student's balance was reconciled
    BalanceReconciled {
        student_id: Uuid,
        sessions_attended: i64,
        sessions_remaining: i64,
        status: String,
        timestamp: DateTime<Utc>,
    },
}

impl EngineEvent {
    /// Short event name, used in log lines
    pub fn event_type(&self) -> &'static str {
        match self {
            EngineEvent::SessionsExpanded { .. } => "SessionsExpanded",
            EngineEvent::AttendanceSaved { .. } => "AttendanceSaved",
            EngineEvent::SessionCompleted { .. } => "SessionCompleted",
            EngineEvent::RemediationCreated { .. } => "RemediationCreated",
            EngineEvent::BalanceReconciled { .. } => "BalanceReconciled",
        }
    }
}

/// Broadcast bus for engine events
#[derive(Debug)]
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: EngineEvent) {
        tracing::trace!(event_type = event.event_type(), "Emitting event");
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscriber_receives_event() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        let summary_id = Uuid::new_v4();

        bus.emit_lossy(EngineEvent::SessionCompleted {
            session_id: Uuid::new_v4(),
            summary_id,
            timestamp: Utc::now(),
        });

        match rx.recv().await.unwrap() {
            EngineEvent::SessionCompleted { summary_id: got, .. } => assert_eq!(got, summary_id),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_emit_without_subscribers_is_silent() {
        let bus = EventBus::new(4);
        bus.emit_lossy(EngineEvent::SessionsExpanded {
            class_id: Uuid::new_v4(),
            session_count: 0,
            timestamp: Utc::now(),
        });

        // Nothing is buffered for receivers that subscribe later
        let mut rx = bus.subscribe();
        assert!(matches!(rx.try_recv(), Err(broadcast::error::TryRecvError::Empty)));
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = EngineEvent::BalanceReconciled {
            student_id: Uuid::nil(),
            sessions_attended: 20,
            sessions_remaining: 0,
            status: "fully-consumed".to_string(),
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "BalanceReconciled");
        assert_eq!(json["sessions_remaining"], 0);
    }
}
