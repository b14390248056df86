//! Hot/warm cache for active execution state
//!
//! Two tiers, one structure:
//!
//! - **hot**: active executions, LRU-evicted at `capacity`. All engine
//!   reads for a live execution hit this tier without touching the
//!   persistent backend.
//! - **warm**: the most recent K completed executions, kept for
//!   post-mortem queries after the execution leaves the hot tier.
//!
//! Eviction from hot never loses data on its own; the store persists a
//! snapshot before demoting an execution.

use crate::execution::ExecutionState;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};

/// LRU + warm-ring cache for [`ExecutionState`]
pub struct ExecutionCache {
    hot: HashMap<String, ExecutionState>,
    last_access: HashMap<String, DateTime<Utc>>,
    capacity: usize,
    warm: VecDeque<(String, ExecutionState)>,
    warm_capacity: usize,
}

impl ExecutionCache {
    pub fn new(capacity: usize, warm_capacity: usize) -> Self {
        Self {
            hot: HashMap::new(),
            last_access: HashMap::new(),
            capacity: capacity.max(1),
            warm: VecDeque::new(),
            warm_capacity,
        }
    }

    /// Look up an execution, refreshing its LRU position. Falls back to the
    /// warm tier for recently completed executions.
    pub fn get(&mut self, execution_id: &str) -> Option<&ExecutionState> {
        if self.hot.contains_key(execution_id) {
            self.last_access.insert(execution_id.to_string(), Utc::now());
            return self.hot.get(execution_id);
        }
        self.warm
            .iter()
            .find(|(id, _)| id == execution_id)
            .map(|(_, state)| state)
    }

    /// Mutable access to a hot entry (warm entries are read-only)
    pub fn get_mut(&mut self, execution_id: &str) -> Option<&mut ExecutionState> {
        if self.hot.contains_key(execution_id) {
            self.last_access.insert(execution_id.to_string(), Utc::now());
        }
        self.hot.get_mut(execution_id)
    }

    /// Insert or replace a hot entry. Returns the evicted execution, if the
    /// capacity bound pushed one out.
    pub fn put(&mut self, state: ExecutionState) -> Option<ExecutionState> {
        let id = state.id.clone();
        self.hot.insert(id.clone(), state);
        self.last_access.insert(id.clone(), Utc::now());

        if self.hot.len() <= self.capacity {
            return None;
        }
        let lru = self
            .last_access
            .iter()
            .filter(|(k, _)| **k != id && self.hot.contains_key(*k))
            .min_by_key(|(_, t)| **t)
            .map(|(k, _)| k.clone())?;
        self.last_access.remove(&lru);
        self.hot.remove(&lru)
    }

    pub fn contains(&self, execution_id: &str) -> bool {
        self.hot.contains_key(execution_id)
            || self.warm.iter().any(|(id, _)| id == execution_id)
    }

    /// Demote a finished execution from hot to the warm ring
    pub fn demote(&mut self, execution_id: &str) -> Option<ExecutionState> {
        let state = self.hot.remove(execution_id)?;
        self.last_access.remove(execution_id);
        if self.warm_capacity > 0 {
            self.warm.retain(|(id, _)| id != execution_id);
            self.warm.push_back((execution_id.to_string(), state.clone()));
            while self.warm.len() > self.warm_capacity {
                self.warm.pop_front();
            }
        }
        Some(state)
    }

    /// Remove an execution from both tiers
    pub fn remove(&mut self, execution_id: &str) -> Option<ExecutionState> {
        self.last_access.remove(execution_id);
        let hot = self.hot.remove(execution_id);
        self.warm.retain(|(id, _)| id != execution_id);
        hot
    }

    pub fn hot_len(&self) -> usize {
        self.hot.len()
    }

    pub fn warm_len(&self) -> usize {
        self.warm.len()
    }

    /// Ids of every execution currently in the hot tier
    pub fn hot_ids(&self) -> Vec<String> {
        self.hot.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(id: &str) -> ExecutionState {
        ExecutionState::new(id.to_string(), None)
    }

    #[test]
    fn test_put_get() {
        let mut cache = ExecutionCache::new(4, 2);
        cache.put(state("a"));
        assert!(cache.get("a").is_some());
        assert!(cache.get("b").is_none());
    }

    #[test]
    fn test_lru_eviction() {
        let mut cache = ExecutionCache::new(2, 0);
        cache.put(state("a"));
        cache.put(state("b"));
        // Touch "a" so "b" is the LRU entry
        cache.get("a");

        let evicted = cache.put(state("c"));
        assert_eq!(evicted.unwrap().id, "b");
        assert!(cache.get("a").is_some());
        assert!(cache.get("c").is_some());
    }

    #[test]
    fn test_warm_survives_demote() {
        let mut cache = ExecutionCache::new(4, 2);
        cache.put(state("a"));
        cache.demote("a");

        assert_eq!(cache.hot_len(), 0);
        assert!(cache.get("a").is_some());
    }

    #[test]
    fn test_warm_ring_bounded() {
        let mut cache = ExecutionCache::new(8, 2);
        for id in ["a", "b", "c"] {
            cache.put(state(id));
            cache.demote(id);
        }
        assert_eq!(cache.warm_len(), 2);
        assert!(cache.get("a").is_none());
        assert!(cache.get("b").is_some());
        assert!(cache.get("c").is_some());
    }
}
