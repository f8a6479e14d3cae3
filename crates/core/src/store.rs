use async_trait::async_trait;
use thiserror::Error;

use crate::domain::conversation::{ConversationId, ConversationState};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("conversation `{id}` was written concurrently (expected version {expected}, found {found})")]
    VersionConflict { id: ConversationId, expected: u64, found: u64 },
    #[error("storage backend failure: {0}")]
    Backend(String),
    #[error("decode error: {0}")]
    Decode(String),
}

/// Keyed store of conversation state.
///
/// `save` is a conditional write: it succeeds only when the stored version equals
/// `state.version` (0 meaning "not stored yet") and then bumps the version.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn get(&self, id: &ConversationId) -> Result<Option<ConversationState>, StoreError>;
    async fn save(&self, id: &ConversationId, state: ConversationState) -> Result<u64, StoreError>;
}
