//! Per-user conversation history with bounded retention
//!
//! The store is a capability: the pipeline only depends on the
//! [`ConversationStore`] trait, and the surrounding application decides
//! whether history lives in memory, Postgres or elsewhere. The bundled
//! [`MemoryConversationStore`] serializes appends per user, so sequence
//! numbers are strictly increasing with no gaps even under concurrent
//! requests from the same user.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::errors::Result;
use crate::models::ConversationTurn;
use crate::models::TurnDraft;

/// Ordered, append-only message history keyed by user.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Persist a turn, assigning the user's next sequence number.
    ///
    /// Appends for one user are serialized; a failure here is fatal for the
    /// request since the response could not be safely attributed.
    async fn append(&self, user_id: &str, draft: TurnDraft) -> Result<ConversationTurn>;

    /// The most recent `limit` turns in chronological order (oldest first).
    async fn recent(&self, user_id: &str, limit: usize) -> Result<Vec<ConversationTurn>>;
}

struct UserHistory {
    next_seq: u64,
    turns: VecDeque<ConversationTurn>,
}

/// In-memory store used by the bundled server and by tests.
pub struct MemoryConversationStore {
    users: DashMap<String, Arc<Mutex<UserHistory>>>,
    max_turns_per_user: usize,
}

impl MemoryConversationStore {
    #[must_use]
    pub fn new(max_turns_per_user: usize) -> Self {
        Self {
            users: DashMap::new(),
            max_turns_per_user: max_turns_per_user.max(1),
        }
    }

    fn history_for(&self, user_id: &str) -> Arc<Mutex<UserHistory>> {
        self.users
            .entry(user_id.to_string())
            .or_insert_with(|| {
                Arc::new(Mutex::new(UserHistory {
                    next_seq: 1,
                    turns: VecDeque::new(),
                }))
            })
            .clone()
    }
}

#[async_trait]
impl ConversationStore for MemoryConversationStore {
    async fn append(&self, user_id: &str, draft: TurnDraft) -> Result<ConversationTurn> {
        let history = self.history_for(user_id);
        let mut guard = history.lock().await;

        let turn = ConversationTurn {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            role: draft.role,
            text: draft.text,
            image_ref: draft.image_ref,
            diagnosis: draft.diagnosis,
            created_at: Utc::now(),
            seq: guard.next_seq,
        };
        guard.next_seq += 1;
        guard.turns.push_back(turn.clone());

        // Lazy retention: evict oldest-first once the cap is exceeded
        while guard.turns.len() > self.max_turns_per_user {
            let evicted = guard.turns.pop_front();
            if let Some(evicted) = evicted {
                debug!(
                    "Evicted turn seq {} for user {} (retention cap {})",
                    evicted.seq, user_id, self.max_turns_per_user
                );
            }
        }

        Ok(turn)
    }

    async fn recent(&self, user_id: &str, limit: usize) -> Result<Vec<ConversationTurn>> {
        let Some(history) = self.users.get(user_id).map(|h| h.clone()) else {
            return Ok(Vec::new());
        };
        let guard = history.lock().await;

        let skip = guard.turns.len().saturating_sub(limit);
        Ok(guard.turns.iter().skip(skip).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TurnRole;

    #[tokio::test]
    async fn test_sequence_numbers_strictly_increase() {
        let store = MemoryConversationStore::new(100);

        for expected in 1..=5u64 {
            let turn = store
                .append("farmer-1", TurnDraft::user(format!("q{expected}")))
                .await
                .unwrap();
            assert_eq!(turn.seq, expected);
        }
    }

    #[tokio::test]
    async fn test_users_are_independent() {
        let store = MemoryConversationStore::new(100);
        store.append("a", TurnDraft::user("hi")).await.unwrap();
        store.append("a", TurnDraft::assistant("hello")).await.unwrap();
        let turn = store.append("b", TurnDraft::user("hi")).await.unwrap();
        assert_eq!(turn.seq, 1);
    }

    #[tokio::test]
    async fn test_recent_returns_chronological_tail() {
        let store = MemoryConversationStore::new(100);
        for i in 0..6 {
            store
                .append("farmer-1", TurnDraft::user(format!("q{i}")))
                .await
                .unwrap();
        }

        let recent = store.recent("farmer-1", 3).await.unwrap();
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].text, "q3");
        assert_eq!(recent[2].text, "q5");
        assert!(recent.windows(2).all(|w| w[0].seq < w[1].seq));
    }

    #[tokio::test]
    async fn test_retention_evicts_oldest_first() {
        let store = MemoryConversationStore::new(4);
        for i in 0..7 {
            store
                .append("farmer-1", TurnDraft::user(format!("q{i}")))
                .await
                .unwrap();
        }

        let recent = store.recent("farmer-1", 100).await.unwrap();
        assert_eq!(recent.len(), 4);
        assert_eq!(recent[0].text, "q3");
        // Eviction never renumbers surviving turns
        assert_eq!(recent[0].seq, 4);
        assert_eq!(recent[3].seq, 7);
    }

    #[tokio::test]
    async fn test_concurrent_appends_have_no_gaps() {
        let store = Arc::new(MemoryConversationStore::new(1000));

        let mut handles = Vec::new();
        for i in 0..50 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .append("farmer-1", TurnDraft::user(format!("q{i}")))
                    .await
                    .unwrap()
                    .seq
            }));
        }

        let mut seqs = Vec::new();
        for handle in handles {
            seqs.push(handle.await.unwrap());
        }
        seqs.sort_unstable();
        let expected: Vec<u64> = (1..=50).collect();
        assert_eq!(seqs, expected);

        let recent = store.recent("farmer-1", 1000).await.unwrap();
        assert!(recent.iter().all(|t| t.role == TurnRole::User));
    }
}
