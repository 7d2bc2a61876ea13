//! Conversation history store.
//!
//! The agent loop persists exactly one user turn and one final assistant
//! turn per invocation; tool turns never reach this store. That keeps the
//! replay window small and free of tool-call-id references that would break
//! on the next turn.
//!
//! # Example
//!
//! ```
//! use calvox::history::{ConversationHistory, HistoryStore, Role, Turn};
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = HistoryStore::new_memory();
//!     store.append("alice", Turn::user("Hello!")).await.unwrap();
//!     store.append("alice", Turn::assistant("Hi there!")).await.unwrap();
//!
//!     let recent = store.recent("alice", 10).await.unwrap();
//!     assert_eq!(recent.len(), 2);
//!     assert_eq!(recent[0].role, Role::User);
//! }
//! ```

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::config::Config;
use crate::error::Result;

/// Role of one conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    Tool,
}

/// One persisted conversation turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// The conversation-history collaborator contract. Appends for one user are
/// serialized by the implementation; append-then-read consistency is all
/// the loop requires.
#[async_trait]
pub trait ConversationHistory: Send + Sync {
    async fn append(&self, user_id: &str, turn: Turn) -> Result<()>;

    /// The most recent `limit` turns, oldest first.
    async fn recent(&self, user_id: &str, limit: usize) -> Result<Vec<Turn>>;

    async fn clear(&self, user_id: &str) -> Result<()>;
}

/// History store with an in-memory cache and optional file persistence.
///
/// Turn sequences are keyed by user id. When created with `new()`, each
/// user's turns are persisted as a JSON file under `~/.calvox/history/`;
/// use `new_memory()` for tests or when persistence is not needed.
///
/// # Thread Safety
///
/// Uses `Arc<RwLock>` internally: safe to clone and share across tasks, and
/// the write lock serializes concurrent appends per user.
pub struct HistoryStore {
    turns: Arc<RwLock<HashMap<String, Vec<Turn>>>>,
    storage_path: Option<PathBuf>,
}

impl HistoryStore {
    /// Create a history store persisted under `~/.calvox/history/`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn new() -> Result<Self> {
        let storage_path = Config::dir().join("history");
        std::fs::create_dir_all(&storage_path)?;
        Ok(Self {
            turns: Arc::new(RwLock::new(HashMap::new())),
            storage_path: Some(storage_path),
        })
    }

    /// Create an in-memory store without persistence.
    pub fn new_memory() -> Self {
        Self {
            turns: Arc::new(RwLock::new(HashMap::new())),
            storage_path: None,
        }
    }

    /// Create a store persisted under a custom directory.
    pub fn with_path(path: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&path)?;
        Ok(Self {
            turns: Arc::new(RwLock::new(HashMap::new())),
            storage_path: Some(path),
        })
    }

    fn user_file(&self, user_id: &str) -> Option<PathBuf> {
        self.storage_path
            .as_ref()
            .map(|p| p.join(format!("{}.json", Self::sanitize_key(user_id))))
    }

    /// Sanitize a user id for use as a filename.
    fn sanitize_key(key: &str) -> String {
        key.replace(['/', '\\', ':', '*', '?', '"', '<', '>', '|'], "_")
    }

    /// Load a user's turns into the cache if persistence holds newer state.
    /// Caller must hold the write lock.
    async fn load_into(
        &self,
        cache: &mut HashMap<String, Vec<Turn>>,
        user_id: &str,
    ) -> Result<()> {
        if cache.contains_key(user_id) {
            return Ok(());
        }
        if let Some(file) = self.user_file(user_id) {
            if file.exists() {
                let content = tokio::fs::read_to_string(&file).await?;
                let turns: Vec<Turn> = serde_json::from_str(&content)?;
                cache.insert(user_id.to_string(), turns);
                return Ok(());
            }
        }
        cache.insert(user_id.to_string(), Vec::new());
        Ok(())
    }

    async fn persist(&self, user_id: &str, turns: &[Turn]) -> Result<()> {
        if let Some(file) = self.user_file(user_id) {
            let content = serde_json::to_string_pretty(turns)?;
            tokio::fs::write(&file, content).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl ConversationHistory for HistoryStore {
    async fn append(&self, user_id: &str, turn: Turn) -> Result<()> {
        let mut cache = self.turns.write().await;
        self.load_into(&mut cache, user_id).await?;
        let turns = cache.entry(user_id.to_string()).or_default();
        turns.push(turn);
        let snapshot = turns.clone();
        drop(cache);
        self.persist(user_id, &snapshot).await
    }

    async fn recent(&self, user_id: &str, limit: usize) -> Result<Vec<Turn>> {
        let mut cache = self.turns.write().await;
        self.load_into(&mut cache, user_id).await?;
        let turns = cache.get(user_id).map(Vec::as_slice).unwrap_or_default();
        let skip = turns.len().saturating_sub(limit);
        Ok(turns[skip..].to_vec())
    }

    async fn clear(&self, user_id: &str) -> Result<()> {
        {
            let mut cache = self.turns.write().await;
            cache.remove(user_id);
        }
        if let Some(file) = self.user_file(user_id) {
            if file.exists() {
                tokio::fs::remove_file(&file).await?;
            }
        }
        Ok(())
    }
}

impl Clone for HistoryStore {
    fn clone(&self) -> Self {
        Self {
            turns: Arc::clone(&self.turns),
            storage_path: self.storage_path.clone(),
        }
    }
}

impl Default for HistoryStore {
    /// Creates an in-memory store. Use `HistoryStore::new()` for persistence.
    fn default() -> Self {
        Self::new_memory()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_append_and_recent() {
        let store = HistoryStore::new_memory();
        store.append("alice", Turn::user("Hello")).await.unwrap();
        store
            .append("alice", Turn::assistant("Hi there"))
            .await
            .unwrap();

        let recent = store.recent("alice", 10).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].content, "Hello");
        assert_eq!(recent[1].role, Role::Assistant);
    }

    #[tokio::test]
    async fn test_recent_is_a_bounded_window() {
        let store = HistoryStore::new_memory();
        for i in 0..25 {
            store
                .append("alice", Turn::user(format!("message {i}")))
                .await
                .unwrap();
        }

        let recent = store.recent("alice", 10).await.unwrap();
        assert_eq!(recent.len(), 10);
        // Oldest-first, most recent 10 only.
        assert_eq!(recent[0].content, "message 15");
        assert_eq!(recent[9].content, "message 24");
    }

    #[tokio::test]
    async fn test_recent_for_unknown_user_is_empty() {
        let store = HistoryStore::new_memory();
        assert!(store.recent("nobody", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_clear_removes_turns() {
        let store = HistoryStore::new_memory();
        store.append("alice", Turn::user("Hello")).await.unwrap();
        store.clear("alice").await.unwrap();
        assert!(store.recent("alice", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_users_are_isolated() {
        let store = HistoryStore::new_memory();
        store.append("alice", Turn::user("from alice")).await.unwrap();
        store.append("bob", Turn::user("from bob")).await.unwrap();

        let alice = store.recent("alice", 10).await.unwrap();
        assert_eq!(alice.len(), 1);
        assert_eq!(alice[0].content, "from alice");
    }

    #[tokio::test]
    async fn test_file_persistence_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().to_path_buf();

        {
            let store = HistoryStore::with_path(path.clone()).unwrap();
            store
                .append("alice", Turn::user("Persisted message"))
                .await
                .unwrap();
        }

        // A fresh store instance reads what the first one wrote.
        let store = HistoryStore::with_path(path).unwrap();
        let recent = store.recent("alice", 10).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].content, "Persisted message");
    }

    #[tokio::test]
    async fn test_file_persistence_clear_deletes_file() {
        let dir = TempDir::new().unwrap();
        let store = HistoryStore::with_path(dir.path().to_path_buf()).unwrap();
        store.append("alice", Turn::user("Hello")).await.unwrap();

        let file = dir.path().join("alice.json");
        assert!(file.exists());

        store.clear("alice").await.unwrap();
        assert!(!file.exists());
    }

    #[tokio::test]
    async fn test_sanitized_keys_share_no_files() {
        let dir = TempDir::new().unwrap();
        let store = HistoryStore::with_path(dir.path().to_path_buf()).unwrap();
        store
            .append("google:alice", Turn::user("Hello"))
            .await
            .unwrap();
        assert!(dir.path().join("google_alice.json").exists());
    }

    #[tokio::test]
    async fn test_concurrent_appends_are_serialized() {
        let store = Arc::new(HistoryStore::new_memory());
        let mut handles = Vec::new();
        for i in 0..10 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store
                    .append("shared", Turn::user(format!("message {i}")))
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(store.recent("shared", 100).await.unwrap().len(), 10);
    }
}
