//! Optional append-only event log
//!
//! When enabled, the bus taps every published event into this store, keyed
//! by execution id and pruned by TTL. It is a best-effort audit aid, not an
//! authoritative replay log: appends happen after handler delivery and
//! pruning is opportunistic.

use super::ExecutionEvent;
use chrono::{Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;

/// Per-execution append-only event log with TTL retention
pub struct EventStore {
    events: Mutex<HashMap<String, Vec<ExecutionEvent>>>,
    ttl: Duration,
}

impl EventStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            events: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Append one event, pruning expired executions as a side effect
    pub async fn append(&self, event: ExecutionEvent) {
        let mut events = self.events.lock().await;
        let cutoff = Utc::now()
            - ChronoDuration::from_std(self.ttl).unwrap_or_else(|_| ChronoDuration::seconds(300));
        events.retain(|_, log| log.last().map(|e| e.timestamp >= cutoff).unwrap_or(false));
        events.entry(event.execution_id.clone()).or_default().push(event);
    }

    /// Events recorded for one execution, in publication order
    pub async fn events_for(&self, execution_id: &str) -> Vec<ExecutionEvent> {
        self.events
            .lock()
            .await
            .get(execution_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Drop the log for one execution
    pub async fn remove(&self, execution_id: &str) {
        self.events.lock().await.remove(execution_id);
    }

    pub async fn execution_count(&self) -> usize {
        self.events.lock().await.len()
    }
}
