//! The transactional outbox: durable staging for emitted messages.
//!
//! Messages are staged in the same transaction as the aggregate mutation
//! that produced them, so either both persist or neither does. A crash
//! after commit but before dispatch leaves the message durably recorded
//! for the processor to deliver later.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::Row;
use uuid::Uuid;

use crate::error::Result;
use crate::message::{Message, MessageId};
use crate::uow::{Backend, Session};

/// Outbox table schema, applied at startup.
pub const OUTBOX_DDL: &str = r#"
    CREATE TABLE IF NOT EXISTS outbox_messages (
        message_id UUID PRIMARY KEY,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        payload JSONB NOT NULL
    );
    CREATE INDEX IF NOT EXISTS outbox_messages_created_at_idx
        ON outbox_messages (created_at);
"#;

/// Versioned on-disk envelope for outbox payloads.
///
/// Serialized as tagged JSON so stored messages stay readable across
/// releases and never rely on opaque language-native serialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "schema", rename_all = "snake_case")]
pub enum StoredMessage {
    V1(Message),
}

/// A staged outbox row.
#[derive(Debug, Clone)]
pub struct OutboxRecord {
    pub message_id: MessageId,
    pub created_at: DateTime<Utc>,
    pub payload: serde_json::Value,
}

impl OutboxRecord {
    /// Builds a record for a message, stamping the current time.
    pub fn from_message(message: &Message) -> Result<Self> {
        Ok(Self {
            message_id: message.message_id,
            created_at: Utc::now(),
            payload: serde_json::to_value(StoredMessage::V1(message.clone()))?,
        })
    }

    /// Decodes the stored payload back into a message.
    pub fn decode(&self) -> Result<Message> {
        let StoredMessage::V1(message) = serde_json::from_value(self.payload.clone())?;
        Ok(message)
    }
}

/// Stages messages into the outbox within the caller's transaction.
///
/// Inserts are keyed by `message_id` and ignore duplicates, so
/// re-attempted stores of the same message are idempotent.
pub(crate) async fn stage(session: &mut Session, messages: &[Message]) -> Result<()> {
    if messages.is_empty() {
        return Ok(());
    }

    match session {
        Session::Postgres(txn) => {
            for message in messages {
                let record = OutboxRecord::from_message(message)?;
                sqlx::query(
                    r#"
                    INSERT INTO outbox_messages (message_id, created_at, payload)
                    VALUES ($1, $2, $3)
                    ON CONFLICT (message_id) DO NOTHING
                    "#,
                )
                .bind(record.message_id.as_uuid())
                .bind(record.created_at)
                .bind(&record.payload)
                .execute(&mut **txn)
                .await?;
            }
        }
        Session::Memory(session) => {
            for message in messages {
                session.stage_outbox(OutboxRecord::from_message(message)?);
            }
        }
    }

    Ok(())
}

/// Fetches all currently staged records, oldest first.
pub async fn fetch_all(backend: &Backend) -> Result<Vec<OutboxRecord>> {
    match backend {
        Backend::Postgres(pool) => {
            let rows = sqlx::query(
                r#"
                SELECT message_id, created_at, payload
                FROM outbox_messages
                ORDER BY created_at ASC
                "#,
            )
            .fetch_all(pool)
            .await?;

            rows.into_iter()
                .map(|row| {
                    Ok(OutboxRecord {
                        message_id: MessageId::from_uuid(row.try_get::<Uuid, _>("message_id")?),
                        created_at: row.try_get("created_at")?,
                        payload: row.try_get("payload")?,
                    })
                })
                .collect()
        }
        Backend::Memory(store) => Ok(store.fetch_outbox().await),
    }
}

/// Deletes the given records from the outbox.
pub async fn delete(backend: &Backend, ids: &[MessageId]) -> Result<()> {
    if ids.is_empty() {
        return Ok(());
    }

    match backend {
        Backend::Postgres(pool) => {
            let uuids: Vec<Uuid> = ids.iter().map(MessageId::as_uuid).collect();
            sqlx::query("DELETE FROM outbox_messages WHERE message_id = ANY($1)")
                .bind(&uuids)
                .execute(pool)
                .await?;
        }
        Backend::Memory(store) => store.delete_outbox(ids).await,
    }

    Ok(())
}
