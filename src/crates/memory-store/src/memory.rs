//! In-memory [`MemoryStore`] for development, tests and the CLI.
//!
//! - Conversations live in a map of per-conversation `Mutex<Vec<Turn>>`, so
//!   appends to one conversation are serialized while other conversations
//!   only share a brief read lock on the outer map.
//! - Cache entries carry an optional deadline measured with
//!   `tokio::time::Instant`, which makes expiry testable under a paused clock.
//! - Snapshots are keyed by execution id; terminal ones are never replaced.

use crate::error::{MemoryError, Result};
use crate::fingerprint::Fingerprint;
use crate::traits::MemoryStore;
use crate::turn::{StateSnapshot, Turn};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;

type Conversation = Arc<Mutex<Vec<Turn>>>;

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Value,
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map(|deadline| now >= deadline).unwrap_or(false)
    }
}

#[derive(Default)]
struct Inner {
    conversations: RwLock<HashMap<String, Conversation>>,
    cache: RwLock<HashMap<Fingerprint, CacheEntry>>,
    states: RwLock<HashMap<String, StateSnapshot>>,
}

/// Thread-safe in-memory store. Clones share the same data.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn conversation(&self, conversation_id: &str) -> Conversation {
        if let Some(existing) = self.inner.conversations.read().await.get(conversation_id) {
            return existing.clone();
        }
        let mut conversations = self.inner.conversations.write().await;
        conversations
            .entry(conversation_id.to_string())
            .or_default()
            .clone()
    }

    /// Number of conversations with at least one turn.
    pub async fn conversation_count(&self) -> usize {
        self.inner.conversations.read().await.len()
    }

    /// Number of cache entries, including expired ones not yet purged.
    pub async fn cache_len(&self) -> usize {
        self.inner.cache.read().await.len()
    }

    /// Drop expired cache entries, returning how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut cache = self.inner.cache.write().await;
        let before = cache.len();
        cache.retain(|_, entry| !entry.is_expired(now));
        before - cache.len()
    }

    /// Remove everything (for test isolation).
    pub async fn clear(&self) {
        self.inner.conversations.write().await.clear();
        self.inner.cache.write().await.clear();
        self.inner.states.write().await.clear();
    }
}

impl std::fmt::Debug for InMemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryStore").finish_non_exhaustive()
    }
}

#[async_trait]
impl MemoryStore for InMemoryStore {
    async fn get_history(&self, conversation_id: &str, limit: Option<usize>) -> Result<Vec<Turn>> {
        let conversation = {
            let conversations = self.inner.conversations.read().await;
            match conversations.get(conversation_id) {
                Some(c) => c.clone(),
                None => return Ok(Vec::new()),
            }
        };
        let turns = conversation.lock().await;
        let skip = limit
            .map(|limit| turns.len().saturating_sub(limit))
            .unwrap_or(0);
        Ok(turns[skip..].to_vec())
    }

    async fn append_turns(&self, conversation_id: &str, turns: Vec<Turn>) -> Result<Vec<Turn>> {
        if conversation_id.is_empty() {
            return Err(MemoryError::Invalid("conversation id is empty".into()));
        }
        if turns.is_empty() {
            return Ok(Vec::new());
        }
        let conversation = self.conversation(conversation_id).await;
        let mut log = conversation.lock().await;
        let start = log.len() as u64;
        let appended: Vec<Turn> = turns
            .into_iter()
            .enumerate()
            .map(|(i, mut turn)| {
                turn.sequence = start + i as u64 + 1;
                turn
            })
            .collect();
        log.extend(appended.iter().cloned());
        Ok(appended)
    }

    async fn get_cached(&self, fingerprint: &Fingerprint) -> Result<Option<Value>> {
        let now = Instant::now();
        {
            let cache = self.inner.cache.read().await;
            match cache.get(fingerprint) {
                None => return Ok(None),
                Some(entry) if !entry.is_expired(now) => return Ok(Some(entry.value.clone())),
                Some(_) => {}
            }
        }
        let mut cache = self.inner.cache.write().await;
        if cache.get(fingerprint).is_some_and(|entry| entry.is_expired(now)) {
            cache.remove(fingerprint);
        }
        Ok(None)
    }

    async fn put_cached(
        &self,
        fingerprint: &Fingerprint,
        value: Value,
        ttl: Option<Duration>,
    ) -> Result<()> {
        let entry = CacheEntry {
            value,
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        };
        let now = Instant::now();
        let mut cache = self.inner.cache.write().await;
        cache.retain(|_, existing| !existing.is_expired(now));
        cache.insert(fingerprint.clone(), entry);
        Ok(())
    }

    async fn save_state(&self, snapshot: StateSnapshot) -> Result<()> {
        let mut states = self.inner.states.write().await;
        if let Some(existing) = states.get(&snapshot.execution_id) {
            if existing.is_terminal() {
                return Err(MemoryError::SnapshotSealed(snapshot.execution_id));
            }
        }
        states.insert(snapshot.execution_id.clone(), snapshot);
        Ok(())
    }

    async fn load_state(&self, execution_id: &str) -> Result<Option<StateSnapshot>> {
        Ok(self.inner.states.read().await.get(execution_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::turn::SnapshotStatus;
    use serde_json::json;

    #[tokio::test]
    async fn test_append_assigns_sequence() {
        let store = InMemoryStore::new();
        let first = store.append("conv-1", Turn::user("hi")).await.unwrap();
        let second = store.append("conv-1", Turn::assistant("hello")).await.unwrap();
        let other = store.append("conv-2", Turn::user("yo")).await.unwrap();

        assert_eq!(first.sequence, 1);
        assert_eq!(second.sequence, 2);
        assert_eq!(other.sequence, 1);
        assert_eq!(store.conversation_count().await, 2);
    }

    #[tokio::test]
    async fn test_history_limit_keeps_most_recent() {
        let store = InMemoryStore::new();
        for i in 0..5 {
            store.append("conv", Turn::user(format!("m{i}"))).await.unwrap();
        }

        let recent = store.get_history("conv", Some(2)).await.unwrap();
        let contents: Vec<_> = recent.iter().map(|t| t.content.as_str()).collect();
        assert_eq!(contents, vec!["m3", "m4"]);

        assert_eq!(store.get_history("conv", None).await.unwrap().len(), 5);
        assert!(store.get_history("missing", None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_conversation_id_rejected() {
        let store = InMemoryStore::new();
        let err = store.append("", Turn::user("x")).await.unwrap_err();
        assert!(matches!(err, MemoryError::Invalid(_)));
    }

    #[tokio::test]
    async fn test_concurrent_appends_are_serialized() {
        let store = InMemoryStore::new();
        let mut handles = Vec::new();
        for i in 0..20 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.append("shared", Turn::user(format!("{i}"))).await.unwrap()
            }));
        }
        let mut sequences = Vec::new();
        for handle in handles {
            sequences.push(handle.await.unwrap().sequence);
        }
        sequences.sort_unstable();
        assert_eq!(sequences, (1..=20).collect::<Vec<u64>>());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_ttl_expiry() {
        let store = InMemoryStore::new();
        let fp = Fingerprint::exact(&["llm", "q"]);
        let forever = Fingerprint::exact(&["llm", "r"]);

        store
            .put_cached(&fp, json!("answer"), Some(Duration::from_secs(10)))
            .await
            .unwrap();
        store.put_cached(&forever, json!(1), None).await.unwrap();
        assert_eq!(store.get_cached(&fp).await.unwrap(), Some(json!("answer")));

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(store.get_cached(&fp).await.unwrap(), None);
        assert_eq!(store.get_cached(&forever).await.unwrap(), Some(json!(1)));

        // the expired lookup already dropped the entry
        assert_eq!(store.cache_len().await, 1);
        assert_eq!(store.purge_expired().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_put_cached_drops_expired_entries() {
        let store = InMemoryStore::new();
        for i in 0..3 {
            let prompt = format!("q{i}");
            let fp = Fingerprint::exact(&["llm", prompt.as_str()]);
            store
                .put_cached(&fp, json!(i), Some(Duration::from_secs(5)))
                .await
                .unwrap();
        }
        assert_eq!(store.cache_len().await, 3);

        tokio::time::advance(Duration::from_secs(6)).await;
        let fresh = Fingerprint::exact(&["llm", "fresh"]);
        store.put_cached(&fresh, json!("new"), None).await.unwrap();

        assert_eq!(store.cache_len().await, 1);
        assert_eq!(store.get_cached(&fresh).await.unwrap(), Some(json!("new")));
    }

    #[tokio::test]
    async fn test_append_turns_is_contiguous() {
        let store = InMemoryStore::new();
        let mut handles = Vec::new();
        for i in 0..10 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .append_turns(
                        "shared",
                        vec![Turn::user(format!("q{i}")), Turn::assistant(format!("a{i}"))],
                    )
                    .await
                    .unwrap()
            }));
        }
        for handle in handles {
            let pair = handle.await.unwrap();
            assert_eq!(pair[1].sequence, pair[0].sequence + 1);
        }

        let history = store.get_history("shared", None).await.unwrap();
        assert_eq!(history.len(), 20);
        for pair in history.chunks(2) {
            assert_eq!(pair[0].content[1..], pair[1].content[1..]);
            assert!(pair[0].content.starts_with('q'));
            assert!(pair[1].content.starts_with('a'));
        }
    }

    #[tokio::test]
    async fn test_terminal_snapshot_is_sealed() {
        let store = InMemoryStore::new();
        store
            .save_state(StateSnapshot::new(
                "exec-1",
                "conv",
                SnapshotStatus::InProgress,
                json!({"step": 1}),
            ))
            .await
            .unwrap();
        store
            .save_state(StateSnapshot::new(
                "exec-1",
                "conv",
                SnapshotStatus::Completed,
                json!({"step": 2}),
            ))
            .await
            .unwrap();

        let err = store
            .save_state(StateSnapshot::new(
                "exec-1",
                "conv",
                SnapshotStatus::Failed,
                json!({}),
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, MemoryError::SnapshotSealed(id) if id == "exec-1"));

        let loaded = store.load_state("exec-1").await.unwrap().unwrap();
        assert_eq!(loaded.status, SnapshotStatus::Completed);
        assert_eq!(loaded.state, json!({"step": 2}));
        assert!(store.load_state("exec-2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_clear() {
        let store = InMemoryStore::new();
        store.append("c", Turn::user("x")).await.unwrap();
        store.clear().await;
        assert_eq!(store.conversation_count().await, 0);
    }
}
