//! In-memory state repository for development and testing
//!
//! Reference implementation of [`StateRepository`] backed by a
//! `RwLock<HashMap>`. Records are stored as serializer-encoded bytes, so a
//! persisted record is always a complete snapshot: readers decode either
//! the previous state or the new one, never a mix.
//!
//! Use it for tests, short-lived runs, and as the template for real
//! backends. Data does not survive a process restart, which also makes it
//! convenient for exercising the orphan-recovery path.

use crate::error::{Result, StateError};
use crate::execution::ExecutionState;
use crate::repository::{ExecutionFilter, StateRepository};
use crate::serializer::{JsonSerializer, SerializerProtocol};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Thread-safe in-memory [`StateRepository`]
#[derive(Clone, Default)]
pub struct InMemoryStateRepository {
    records: Arc<RwLock<HashMap<String, Vec<u8>>>>,
    serializer: Arc<JsonSerializer>,
}

impl InMemoryStateRepository {
    pub fn new() -> Self {
        Self {
            records: Arc::new(RwLock::new(HashMap::new())),
            serializer: Arc::new(JsonSerializer::new()),
        }
    }

    /// Number of persisted records (test helper)
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    /// Drop all records (test helper)
    pub async fn clear(&self) {
        self.records.write().await.clear();
    }
}

#[async_trait]
impl StateRepository for InMemoryStateRepository {
    async fn save(&self, state: &ExecutionState) -> Result<()> {
        let bytes = self.serializer.dumps(state)?;
        self.records.write().await.insert(state.id.clone(), bytes);
        Ok(())
    }

    async fn load(&self, execution_id: &str) -> Result<Option<ExecutionState>> {
        let records = self.records.read().await;
        match records.get(execution_id) {
            Some(bytes) => Ok(Some(self.serializer.loads(bytes)?)),
            None => Ok(None),
        }
    }

    async fn list(&self, filter: &ExecutionFilter) -> Result<Vec<ExecutionState>> {
        let records = self.records.read().await;
        let mut states: Vec<ExecutionState> = Vec::with_capacity(records.len());
        for bytes in records.values() {
            let state: ExecutionState = self.serializer.loads(bytes)?;
            if let Some(diagram_id) = &filter.diagram_id {
                if state.diagram_id.as_deref() != Some(diagram_id.as_str()) {
                    continue;
                }
            }
            if let Some(status) = filter.status {
                if state.status != status {
                    continue;
                }
            }
            states.push(state);
        }
        states.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(states
            .into_iter()
            .skip(filter.offset)
            .take(filter.limit)
            .collect())
    }

    async fn delete(&self, execution_id: &str) -> Result<()> {
        let removed = self.records.write().await.remove(execution_id);
        if removed.is_none() {
            return Err(StateError::NotFound(execution_id.to_string()));
        }
        Ok(())
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let mut records = self.records.write().await;
        let mut expired = Vec::new();
        for (id, bytes) in records.iter() {
            let state: ExecutionState = self.serializer.loads(bytes)?;
            if state.started_at < cutoff {
                expired.push(id.clone());
            }
        }
        for id in &expired {
            records.remove(id);
        }
        Ok(expired.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::ExecutionStatus;
    use chrono::Duration;

    #[tokio::test]
    async fn test_save_and_load_round_trip() {
        let repo = InMemoryStateRepository::new();
        let mut state = ExecutionState::new("exec-1".to_string(), Some("diag".to_string()));
        state.transition_status(ExecutionStatus::Running, None);

        repo.save(&state).await.unwrap();
        let loaded = repo.load("exec-1").await.unwrap().unwrap();

        assert_eq!(loaded.id, "exec-1");
        assert_eq!(loaded.status, ExecutionStatus::Running);
    }

    #[tokio::test]
    async fn test_load_missing_returns_none() {
        let repo = InMemoryStateRepository::new();
        assert!(repo.load("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_replaces_whole_record() {
        let repo = InMemoryStateRepository::new();
        let mut state = ExecutionState::new("exec-1".to_string(), None);
        state.transition_running("a");
        state.transition_completed("a", None);
        repo.save(&state).await.unwrap();

        state.transition_running("b");
        state.transition_completed("b", None);
        repo.save(&state).await.unwrap();

        let loaded = repo.load("exec-1").await.unwrap().unwrap();
        assert_eq!(loaded.executed_nodes, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_list_filters_by_status_and_diagram() {
        let repo = InMemoryStateRepository::new();

        let mut s1 = ExecutionState::new("e1".to_string(), Some("d1".to_string()));
        s1.transition_status(ExecutionStatus::Completed, None);
        repo.save(&s1).await.unwrap();

        let mut s2 = ExecutionState::new("e2".to_string(), Some("d2".to_string()));
        s2.transition_status(ExecutionStatus::Failed, Some("boom".to_string()));
        repo.save(&s2).await.unwrap();

        let filter = ExecutionFilter::new().with_status(ExecutionStatus::Failed);
        let failed = repo.list(&filter).await.unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].id, "e2");

        let filter = ExecutionFilter::new().with_diagram_id("d1");
        let of_d1 = repo.list(&filter).await.unwrap();
        assert_eq!(of_d1.len(), 1);
        assert_eq!(of_d1[0].id, "e1");
    }

    #[tokio::test]
    async fn test_delete_older_than() {
        let repo = InMemoryStateRepository::new();

        let mut old = ExecutionState::new("old".to_string(), None);
        old.started_at = Utc::now() - Duration::days(10);
        repo.save(&old).await.unwrap();

        let fresh = ExecutionState::new("fresh".to_string(), None);
        repo.save(&fresh).await.unwrap();

        let deleted = repo
            .delete_older_than(Utc::now() - Duration::days(7))
            .await
            .unwrap();
        assert_eq!(deleted, 1);
        assert!(repo.load("old").await.unwrap().is_none());
        assert!(repo.load("fresh").await.unwrap().is_some());
    }
}
