//! Adapter lifecycle and execution events.
//!
//! Events are delivered on a broadcast channel so consumers are optional:
//! emission never blocks and a full or receiver-less channel drops the
//! event. Within one adapter, events are sent in cause order; nothing is
//! guaranteed across adapters.

use crate::models::AdapterMetrics;
use tokio::sync::broadcast;

/// Number of executed queries between `MetricsCollected` emissions.
pub const METRICS_EVENT_INTERVAL: u64 = 100;

const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub enum AdapterEvent {
    Connected {
        adapter_id: String,
    },
    Disconnected {
        adapter_id: String,
    },
    QueryExecuted {
        adapter_id: String,
        execution_time_ms: u64,
        row_count: usize,
    },
    QueryFailed {
        adapter_id: String,
        error: String,
    },
    HealthCheckPassed {
        adapter_id: String,
        response_time_ms: u64,
    },
    HealthCheckFailed {
        adapter_id: String,
        error: String,
    },
    MetricsCollected {
        adapter_id: String,
        metrics: AdapterMetrics,
    },
}

impl AdapterEvent {
    pub fn adapter_id(&self) -> &str {
        match self {
            Self::Connected { adapter_id }
            | Self::Disconnected { adapter_id }
            | Self::QueryExecuted { adapter_id, .. }
            | Self::QueryFailed { adapter_id, .. }
            | Self::HealthCheckPassed { adapter_id, .. }
            | Self::HealthCheckFailed { adapter_id, .. }
            | Self::MetricsCollected { adapter_id, .. } => adapter_id,
        }
    }
}

/// Best-effort event fan-out for one adapter.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<AdapterEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Emit an event. Returns immediately whether or not anyone listens.
    pub fn emit(&self, event: AdapterEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AdapterEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_emit_without_subscribers_does_not_block() {
        let bus = EventBus::new();
        bus.emit(AdapterEvent::Connected {
            adapter_id: "mysql-localhost-3306-app".to_string(),
        });
    }

    #[tokio::test]
    async fn test_subscriber_receives_in_cause_order() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.emit(AdapterEvent::Connected {
            adapter_id: "a".to_string(),
        });
        bus.emit(AdapterEvent::QueryExecuted {
            adapter_id: "a".to_string(),
            execution_time_ms: 5,
            row_count: 1,
        });

        assert!(matches!(rx.recv().await.unwrap(), AdapterEvent::Connected { .. }));
        match rx.recv().await.unwrap() {
            AdapterEvent::QueryExecuted { row_count, .. } => assert_eq!(row_count, 1),
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
