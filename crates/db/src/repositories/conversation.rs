use async_trait::async_trait;
use chrono::Utc;
use sqlx::{sqlite::SqliteRow, Row};

use haven_core::domain::conversation::{
    ConversationId, ConversationState, HistoryItem, HousingContext,
};
use haven_core::store::{ConversationStore, StoreError};

use super::RepositoryError;
use crate::DbPool;

/// SQLite-backed conversation state, one row per conversation with JSON columns.
pub struct SqlConversationStore {
    pool: DbPool,
}

impl SqlConversationStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn stored_version(&self, id: &ConversationId) -> Result<u64, RepositoryError> {
        let row = sqlx::query("SELECT version FROM conversation_state WHERE id = ?")
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => decode_version(row.try_get("version")?),
            None => Ok(0),
        }
    }

    async fn insert(
        &self,
        state: &ConversationState,
        history_json: &str,
        context_json: &str,
    ) -> Result<u64, RepositoryError> {
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            "INSERT INTO conversation_state
                (id, current_agent, history_json, context_json, version, created_at, updated_at)
             VALUES (?, ?, ?, ?, 1, ?, ?)
             ON CONFLICT(id) DO NOTHING",
        )
        .bind(&state.id.0)
        .bind(&state.current_agent)
        .bind(history_json)
        .bind(context_json)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn update(
        &self,
        state: &ConversationState,
        history_json: &str,
        context_json: &str,
    ) -> Result<u64, RepositoryError> {
        let expected = encode_version(state.version)?;
        let result = sqlx::query(
            "UPDATE conversation_state
             SET current_agent = ?, history_json = ?, context_json = ?,
                 version = version + 1, updated_at = ?
             WHERE id = ? AND version = ?",
        )
        .bind(&state.current_agent)
        .bind(history_json)
        .bind(context_json)
        .bind(Utc::now().to_rfc3339())
        .bind(&state.id.0)
        .bind(expected)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

#[async_trait]
impl ConversationStore for SqlConversationStore {
    async fn get(&self, id: &ConversationId) -> Result<Option<ConversationState>, StoreError> {
        let row = sqlx::query(
            "SELECT id, current_agent, history_json, context_json, version
             FROM conversation_state
             WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        Ok(row.as_ref().map(row_to_state).transpose()?)
    }

    async fn save(&self, id: &ConversationId, state: ConversationState) -> Result<u64, StoreError> {
        let mut state = state;
        state.id = id.clone();
        let history_json = serde_json::to_string(&state.history)
            .map_err(|error| StoreError::Decode(error.to_string()))?;
        let context_json = serde_json::to_string(&state.context)
            .map_err(|error| StoreError::Decode(error.to_string()))?;

        let written = if state.version == 0 {
            self.insert(&state, &history_json, &context_json).await?
        } else {
            self.update(&state, &history_json, &context_json).await?
        };

        if written == 0 {
            let found = self.stored_version(id).await?;
            tracing::warn!(
                event_name = "store.conversation.version_conflict",
                conversation_id = %id,
                expected = state.version,
                found,
                "conditional write rejected"
            );
            return Err(StoreError::VersionConflict { id: id.clone(), expected: state.version, found });
        }

        Ok(state.version + 1)
    }
}

fn row_to_state(row: &SqliteRow) -> Result<ConversationState, RepositoryError> {
    let history_json: String = row.try_get("history_json")?;
    let context_json: String = row.try_get("context_json")?;

    let history: Vec<HistoryItem> = serde_json::from_str(&history_json)
        .map_err(|error| RepositoryError::Decode(format!("history_json: {error}")))?;
    let context: HousingContext = serde_json::from_str(&context_json)
        .map_err(|error| RepositoryError::Decode(format!("context_json: {error}")))?;

    Ok(ConversationState {
        id: ConversationId(row.try_get("id")?),
        history,
        context,
        current_agent: row.try_get("current_agent")?,
        version: decode_version(row.try_get("version")?)?,
    })
}

fn decode_version(raw: i64) -> Result<u64, RepositoryError> {
    u64::try_from(raw).map_err(|_| RepositoryError::Decode(format!("negative version `{raw}`")))
}

fn encode_version(version: u64) -> Result<i64, RepositoryError> {
    i64::try_from(version)
        .map_err(|_| RepositoryError::Decode(format!("version `{version}` exceeds storage range")))
}
