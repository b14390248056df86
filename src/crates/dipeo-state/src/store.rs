//! Cache-first execution state store
//!
//! [`StateStore`] is the single choke-point for execution state mutation.
//! It layers the hot/warm [`ExecutionCache`] over a persistent
//! [`StateRepository`] and decides, per operation, whether the backend is
//! written synchronously or via a deferred checkpoint:
//!
//! - **write-through**: execution creation and execution status changes
//!   (start, completion, failure, cancellation) hit the backend before the
//!   call returns
//! - **checkpoint**: node-level mutations mark the execution dirty; a
//!   snapshot is flushed once `checkpoint_interval` mutations accumulate or
//!   `persistence_delay` elapses since the first unflushed one, whichever
//!   comes first
//! - **recovery**: [`StateStore::recover_orphaned`] marks any persisted
//!   execution still `RUNNING` (or `PENDING`) as `FAILED("orphaned")` on
//!   restart
//!
//! Reads for an active execution are served from the hot cache without
//! touching the backend; completed executions stay in the warm ring for
//! post-mortem queries.

use crate::cache::ExecutionCache;
use crate::error::{Result, StateError};
use crate::execution::{ExecutionState, ExecutionStatus, NodeOutput, NodeStatus, TokenUsage};
use crate::repository::{ExecutionFilter, StateRepository};
use chrono::{Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Tuning knobs for the store
#[derive(Debug, Clone)]
pub struct StoreSettings {
    /// Hot cache capacity (executions)
    pub cache_size: usize,
    /// Warm ring capacity (recently completed executions)
    pub warm_cache_size: usize,
    /// Node mutations between forced checkpoint flushes
    pub checkpoint_interval: usize,
    /// Maximum time a dirty execution waits before being flushed
    pub persistence_delay: Duration,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            cache_size: 1000,
            warm_cache_size: 20,
            checkpoint_interval: 10,
            persistence_delay: Duration::from_secs_f64(5.0),
        }
    }
}

struct Dirty {
    mutations: usize,
    flush_scheduled: bool,
}

struct StoreInner {
    repository: Arc<dyn StateRepository>,
    cache: Mutex<ExecutionCache>,
    dirty: Mutex<HashMap<String, Dirty>>,
    settings: StoreSettings,
}

/// Cache-first state store (cheap to clone; clones share the same tiers)
#[derive(Clone)]
pub struct StateStore {
    inner: Arc<StoreInner>,
}

impl StateStore {
    pub fn new(repository: Arc<dyn StateRepository>, settings: StoreSettings) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                repository,
                cache: Mutex::new(ExecutionCache::new(
                    settings.cache_size,
                    settings.warm_cache_size,
                )),
                dirty: Mutex::new(HashMap::new()),
                settings,
            }),
        }
    }

    pub fn settings(&self) -> &StoreSettings {
        &self.inner.settings
    }

    /// Create a new execution record, seeded with the diagram's nodes as
    /// `PENDING`. Write-through: the record is persisted before returning.
    pub async fn create(
        &self,
        execution_id: &str,
        diagram_id: Option<String>,
        variables: HashMap<String, serde_json::Value>,
        node_ids: Vec<String>,
    ) -> Result<ExecutionState> {
        let mut state = ExecutionState::new(execution_id.to_string(), diagram_id);
        state.variables = variables;
        state.seed_nodes(node_ids);

        self.inner.repository.save(&state).await?;

        let evicted = {
            let mut cache = self.inner.cache.lock().await;
            cache.put(state.clone())
        };
        if let Some(evicted) = evicted {
            // An active execution fell out of the hot tier; keep its
            // snapshot durable before dropping it.
            self.inner.repository.save(&evicted).await?;
            tracing::debug!(execution_id = %evicted.id, "evicted execution persisted");
        }
        Ok(state)
    }

    /// Fetch an execution: hot cache, then warm ring, then backend.
    /// A backend hit for an active execution re-enters the hot tier.
    pub async fn get(&self, execution_id: &str) -> Result<Option<ExecutionState>> {
        {
            let mut cache = self.inner.cache.lock().await;
            if let Some(state) = cache.get(execution_id) {
                return Ok(Some(state.clone()));
            }
        }
        let Some(state) = self.inner.repository.load(execution_id).await? else {
            return Ok(None);
        };
        if state.is_active {
            let evicted = {
                let mut cache = self.inner.cache.lock().await;
                cache.put(state.clone())
            };
            if let Some(evicted) = evicted {
                self.inner.repository.save(&evicted).await?;
            }
        }
        Ok(Some(state))
    }

    /// Apply a node status transition (checkpoint-enqueued)
    pub async fn update_node_status(
        &self,
        execution_id: &str,
        node_id: &str,
        status: NodeStatus,
        error: Option<String>,
    ) -> Result<()> {
        self.mutate(execution_id, |state| match status {
            NodeStatus::Running => state.transition_running(node_id),
            NodeStatus::Completed => state.transition_completed(node_id, None),
            NodeStatus::Failed => {
                state.transition_failed(node_id, error.unwrap_or_else(|| "unknown".to_string()))
            }
            NodeStatus::MaxiterReached => state.transition_maxiter(node_id),
            NodeStatus::Pending => state.reset_node(node_id),
        })
        .await?;
        self.note_mutation(execution_id).await;
        Ok(())
    }

    /// Complete a node with its output (checkpoint-enqueued)
    pub async fn update_node_output(
        &self,
        execution_id: &str,
        node_id: &str,
        output: NodeOutput,
    ) -> Result<()> {
        self.mutate(execution_id, |state| {
            state.transition_completed(node_id, Some(output));
        })
        .await?;
        self.note_mutation(execution_id).await;
        Ok(())
    }

    /// Loop reset: back to `PENDING` with the stored output cleared
    /// (engine-only; checkpoint-enqueued)
    pub async fn reset_node(&self, execution_id: &str, node_id: &str) -> Result<()> {
        self.mutate(execution_id, |state| state.reset_node(node_id)).await?;
        self.note_mutation(execution_id).await;
        Ok(())
    }

    /// Iteration reset: back to `PENDING`, output preserved for downstream
    /// consumers (engine-only; checkpoint-enqueued)
    pub async fn reset_node_for_iteration(&self, execution_id: &str, node_id: &str) -> Result<()> {
        self.mutate(execution_id, |state| state.reset_for_iteration(node_id))
            .await?;
        self.note_mutation(execution_id).await;
        Ok(())
    }

    /// Change the execution status. Write-through; terminal states demote
    /// the execution to the warm ring.
    pub async fn update_status(
        &self,
        execution_id: &str,
        status: ExecutionStatus,
        error: Option<String>,
    ) -> Result<()> {
        let state = self
            .mutate(execution_id, |state| {
                state.transition_status(status, error);
            })
            .await?;
        self.inner.repository.save(&state).await?;
        self.inner.dirty.lock().await.remove(execution_id);

        if status.is_terminal() {
            let mut cache = self.inner.cache.lock().await;
            cache.demote(execution_id);
        }
        Ok(())
    }

    /// Replace execution variables (checkpoint-enqueued)
    pub async fn update_variables(
        &self,
        execution_id: &str,
        variables: HashMap<String, serde_json::Value>,
    ) -> Result<()> {
        self.mutate(execution_id, |state| state.variables = variables).await?;
        self.note_mutation(execution_id).await;
        Ok(())
    }

    /// Fold additional token usage into the execution aggregate
    pub async fn add_token_usage(&self, execution_id: &str, tokens: TokenUsage) -> Result<()> {
        self.mutate(execution_id, |state| state.token_usage.add(&tokens)).await?;
        self.note_mutation(execution_id).await;
        Ok(())
    }

    /// Backend-only query over persisted executions
    pub async fn list(&self, filter: &ExecutionFilter) -> Result<Vec<ExecutionState>> {
        self.inner.repository.list(filter).await
    }

    /// Delete persisted executions older than the given number of days.
    /// Returns how many records were removed.
    pub async fn cleanup_old(&self, days: i64) -> Result<usize> {
        let cutoff = Utc::now() - ChronoDuration::days(days);
        self.inner.repository.delete_older_than(cutoff).await
    }

    /// Persist the current cached snapshot of one execution immediately
    pub async fn flush(&self, execution_id: &str) -> Result<()> {
        let snapshot = {
            let mut cache = self.inner.cache.lock().await;
            cache.get(execution_id).cloned()
        };
        if let Some(state) = snapshot {
            self.inner.repository.save(&state).await?;
        }
        self.inner.dirty.lock().await.remove(execution_id);
        Ok(())
    }

    /// Flush every dirty execution (shutdown path)
    pub async fn flush_all(&self) -> Result<()> {
        let ids: Vec<String> = self.inner.dirty.lock().await.keys().cloned().collect();
        for id in ids {
            self.flush(&id).await?;
        }
        Ok(())
    }

    /// Crash-safety floor: mark persisted executions that were left
    /// `RUNNING` (or never started) as failed. Returns the ids repaired.
    pub async fn recover_orphaned(&self) -> Result<Vec<String>> {
        let filter = ExecutionFilter::new().with_limit(usize::MAX);
        let states = self.inner.repository.list(&filter).await?;
        let mut repaired = Vec::new();
        for mut state in states {
            if matches!(state.status, ExecutionStatus::Running | ExecutionStatus::Pending) {
                state.transition_status(ExecutionStatus::Failed, Some("orphaned".to_string()));
                self.inner.repository.save(&state).await?;
                tracing::warn!(execution_id = %state.id, "orphaned execution marked failed");
                repaired.push(state.id);
            }
        }
        Ok(repaired)
    }

    /// Number of executions a checkpoint flush is currently pending for
    pub async fn dirty_count(&self) -> usize {
        self.inner.dirty.lock().await.len()
    }

    async fn mutate<F>(&self, execution_id: &str, f: F) -> Result<ExecutionState>
    where
        F: FnOnce(&mut ExecutionState),
    {
        let mut cache = self.inner.cache.lock().await;
        if cache.get_mut(execution_id).is_none() {
            drop(cache);
            // Cache miss: fault the record in from the backend first
            let state = self
                .inner
                .repository
                .load(execution_id)
                .await?
                .ok_or_else(|| StateError::NotFound(execution_id.to_string()))?;
            let mut refill = self.inner.cache.lock().await;
            if let Some(evicted) = refill.put(state) {
                drop(refill);
                self.inner.repository.save(&evicted).await?;
                cache = self.inner.cache.lock().await;
            } else {
                cache = refill;
            }
        }
        let state = cache
            .get_mut(execution_id)
            .ok_or_else(|| StateError::NotFound(execution_id.to_string()))?;
        f(state);
        Ok(state.clone())
    }

    async fn note_mutation(&self, execution_id: &str) {
        let flush_now = {
            let mut dirty = self.inner.dirty.lock().await;
            let entry = dirty.entry(execution_id.to_string()).or_insert(Dirty {
                mutations: 0,
                flush_scheduled: false,
            });
            entry.mutations += 1;
            if entry.mutations >= self.inner.settings.checkpoint_interval {
                dirty.remove(execution_id);
                true
            } else if !entry.flush_scheduled {
                entry.flush_scheduled = true;
                let store = self.clone();
                let id = execution_id.to_string();
                let delay = self.inner.settings.persistence_delay;
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    if let Err(e) = store.flush(&id).await {
                        tracing::warn!(execution_id = %id, error = %e, "delayed checkpoint flush failed");
                    }
                });
                false
            } else {
                false
            }
        };
        if flush_now {
            if let Err(e) = self.flush(execution_id).await {
                tracing::warn!(execution_id = %execution_id, error = %e, "checkpoint flush failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryStateRepository;
    use serde_json::json;

    fn store_with(settings: StoreSettings) -> (StateStore, Arc<InMemoryStateRepository>) {
        let repo = Arc::new(InMemoryStateRepository::new());
        (StateStore::new(repo.clone(), settings), repo)
    }

    #[tokio::test]
    async fn test_create_is_write_through() {
        let (store, repo) = store_with(StoreSettings::default());
        store
            .create("e1", None, HashMap::new(), vec!["a".to_string()])
            .await
            .unwrap();

        let persisted = repo.load("e1").await.unwrap().unwrap();
        assert_eq!(persisted.node_status("a"), NodeStatus::Pending);
    }

    #[tokio::test]
    async fn test_node_mutations_are_deferred() {
        let settings = StoreSettings {
            checkpoint_interval: 100,
            persistence_delay: Duration::from_secs(60),
            ..StoreSettings::default()
        };
        let (store, repo) = store_with(settings);
        store
            .create("e1", None, HashMap::new(), vec!["a".to_string()])
            .await
            .unwrap();

        store
            .update_node_status("e1", "a", NodeStatus::Running, None)
            .await
            .unwrap();

        // Backend still holds the creation snapshot
        let persisted = repo.load("e1").await.unwrap().unwrap();
        assert_eq!(persisted.node_status("a"), NodeStatus::Pending);

        // Cache holds the live record
        let cached = store.get("e1").await.unwrap().unwrap();
        assert_eq!(cached.node_status("a"), NodeStatus::Running);
        assert_eq!(cached.exec_count("a"), 1);
    }

    #[tokio::test]
    async fn test_checkpoint_interval_forces_flush() {
        let settings = StoreSettings {
            checkpoint_interval: 2,
            persistence_delay: Duration::from_secs(60),
            ..StoreSettings::default()
        };
        let (store, repo) = store_with(settings);
        store
            .create("e1", None, HashMap::new(), vec!["a".to_string()])
            .await
            .unwrap();

        store
            .update_node_status("e1", "a", NodeStatus::Running, None)
            .await
            .unwrap();
        store
            .update_node_output("e1", "a", NodeOutput::with_default("a", json!(1)))
            .await
            .unwrap();

        let persisted = repo.load("e1").await.unwrap().unwrap();
        assert_eq!(persisted.node_status("a"), NodeStatus::Completed);
        assert_eq!(store.dirty_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delayed_flush_after_persistence_delay() {
        let settings = StoreSettings {
            checkpoint_interval: 100,
            persistence_delay: Duration::from_millis(200),
            ..StoreSettings::default()
        };
        let (store, repo) = store_with(settings);
        store
            .create("e1", None, HashMap::new(), vec!["a".to_string()])
            .await
            .unwrap();
        store
            .update_node_status("e1", "a", NodeStatus::Running, None)
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(300)).await;
        // Let the spawned flusher run
        tokio::task::yield_now().await;

        let persisted = repo.load("e1").await.unwrap().unwrap();
        assert_eq!(persisted.node_status("a"), NodeStatus::Running);
    }

    #[tokio::test]
    async fn test_terminal_status_write_through_and_warm() {
        let (store, repo) = store_with(StoreSettings::default());
        store
            .create("e1", None, HashMap::new(), vec![])
            .await
            .unwrap();
        store
            .update_status("e1", ExecutionStatus::Running, None)
            .await
            .unwrap();
        store
            .update_status("e1", ExecutionStatus::Completed, None)
            .await
            .unwrap();

        let persisted = repo.load("e1").await.unwrap().unwrap();
        assert_eq!(persisted.status, ExecutionStatus::Completed);

        // Still readable post-completion (warm ring)
        let warm = store.get("e1").await.unwrap().unwrap();
        assert_eq!(warm.status, ExecutionStatus::Completed);
    }

    #[tokio::test]
    async fn test_recover_orphaned() {
        let (store, repo) = store_with(StoreSettings::default());
        let mut state = ExecutionState::new("zombie".to_string(), None);
        state.transition_status(ExecutionStatus::Running, None);
        repo.save(&state).await.unwrap();

        let repaired = store.recover_orphaned().await.unwrap();
        assert_eq!(repaired, vec!["zombie".to_string()]);

        let persisted = repo.load("zombie").await.unwrap().unwrap();
        assert_eq!(persisted.status, ExecutionStatus::Failed);
        assert_eq!(persisted.error.as_deref(), Some("orphaned"));
    }

    #[tokio::test]
    async fn test_missing_execution_errors() {
        let (store, _) = store_with(StoreSettings::default());
        let err = store
            .update_node_status("ghost", "a", NodeStatus::Running, None)
            .await
            .unwrap_err();
        assert!(matches!(err, StateError::NotFound(_)));
    }
}
