use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use haven_core::domain::conversation::{ConversationId, ConversationState};
use haven_core::store::{ConversationStore, StoreError};

#[derive(Default)]
pub struct InMemoryConversationStore {
    states: RwLock<HashMap<String, ConversationState>>,
}

impl InMemoryConversationStore {
    pub async fn len(&self) -> usize {
        self.states.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.states.read().await.is_empty()
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn get(&self, id: &ConversationId) -> Result<Option<ConversationState>, StoreError> {
        let states = self.states.read().await;
        Ok(states.get(&id.0).cloned())
    }

    async fn save(
        &self,
        id: &ConversationId,
        mut state: ConversationState,
    ) -> Result<u64, StoreError> {
        let mut states = self.states.write().await;
        let found = states.get(&id.0).map(|stored| stored.version).unwrap_or(0);
        if found != state.version {
            return Err(StoreError::VersionConflict {
                id: id.clone(),
                expected: state.version,
                found,
            });
        }

        state.version += 1;
        let version = state.version;
        states.insert(id.0.clone(), state);
        Ok(version)
    }
}

#[cfg(test)]
mod tests {
    use haven_core::domain::conversation::{ConversationId, ConversationState, HistoryItem};
    use haven_core::store::{ConversationStore, StoreError};

    use super::InMemoryConversationStore;

    #[tokio::test]
    async fn save_then_get_round_trips_with_bumped_version() {
        let store = InMemoryConversationStore::default();
        let id = ConversationId("abc123".to_string());
        let mut state = ConversationState::new(id.clone(), "Triage Agent");
        state.history.push(HistoryItem::user("Hello"));

        let version = store.save(&id, state.clone()).await.expect("save");
        let found = store.get(&id).await.expect("get").expect("stored state");

        assert_eq!(version, 1);
        assert_eq!(found.version, 1);
        assert_eq!(found.history, state.history);
        assert_eq!(found.context, state.context);
    }

    #[tokio::test]
    async fn missing_conversation_is_absent() {
        let store = InMemoryConversationStore::default();
        let found = store.get(&ConversationId("nope".to_string())).await.expect("get");
        assert!(found.is_none());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn stale_version_is_rejected() {
        let store = InMemoryConversationStore::default();
        let id = ConversationId("abc123".to_string());
        let state = ConversationState::new(id.clone(), "Triage Agent");

        store.save(&id, state.clone()).await.expect("first save");
        let conflict = store.save(&id, state).await;

        assert!(matches!(
            conflict,
            Err(StoreError::VersionConflict { expected: 0, found: 1, .. })
        ));
        assert_eq!(store.len().await, 1);
    }
}
