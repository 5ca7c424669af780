//! Mailbox store (`mailbox` domain).
//!
//! Sender and recipient ids point into the `hr` domain; they are not foreign
//! keys because the employees live in another database.

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use deskside_core::{Domain, EmployeeId, Mailbox, Message, MessageId};

use crate::storage::{format_timestamp, parse_timestamp, Storage, StorageError};

pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS messages (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    sender_id    INTEGER NOT NULL,
    recipient_id INTEGER NOT NULL,
    subject      TEXT NOT NULL,
    content      TEXT NOT NULL,
    timestamp    TEXT NOT NULL,
    is_read      INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_messages_unread ON messages (recipient_id, is_read);
"#;

const SELECT_MESSAGE: &str =
    "SELECT id, sender_id, recipient_id, subject, content, timestamp, is_read FROM messages";

/// SQLite-backed [`Mailbox`].
#[derive(Debug, Clone)]
pub struct MailboxRepository {
    storage: Storage,
}

impl MailboxRepository {
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }

    pub async fn init(&self) -> Result<(), StorageError> {
        self.storage.init_schema(Domain::Mailbox, SCHEMA).await
    }

    pub async fn get(&self, id: MessageId) -> Result<Option<Message>, StorageError> {
        let sql = format!("{SELECT_MESSAGE} WHERE id = ?1");
        let mut conn = self.storage.connection(Domain::Mailbox).await?;
        let row = sqlx::query(&sql)
            .bind(id.get())
            .fetch_optional(&mut *conn)
            .await?;
        row.as_ref().map(row_to_message).transpose()
    }
}

#[async_trait]
impl Mailbox for MailboxRepository {
    async fn unread_messages(&self, recipient: EmployeeId) -> anyhow::Result<Vec<Message>> {
        let sql = format!(
            "{SELECT_MESSAGE} WHERE recipient_id = ?1 AND is_read = 0 ORDER BY timestamp ASC, id ASC"
        );
        let mut conn = self.storage.connection(Domain::Mailbox).await?;
        let rows = sqlx::query(&sql)
            .bind(recipient.get())
            .fetch_all(&mut *conn)
            .await
            .context("failed to list unread messages")?;
        Ok(rows.iter().map(row_to_message).collect::<Result<Vec<_>, _>>()?)
    }

    async fn send_message(
        &self,
        sender: EmployeeId,
        recipient: EmployeeId,
        subject: &str,
        body: &str,
    ) -> anyhow::Result<MessageId> {
        let subject = subject.to_owned();
        let body = body.to_owned();
        let sent_at = format_timestamp(Utc::now());

        let id = self
            .storage
            .transaction(Domain::Mailbox, move |tx| {
                Box::pin(async move {
                    let id: i64 = sqlx::query_scalar(
                        r#"
                        INSERT INTO messages (sender_id, recipient_id, subject, content, timestamp, is_read)
                        VALUES (?1, ?2, ?3, ?4, ?5, 0)
                        RETURNING id
                        "#,
                    )
                    .bind(sender.get())
                    .bind(recipient.get())
                    .bind(&subject)
                    .bind(&body)
                    .bind(&sent_at)
                    .fetch_one(&mut **tx)
                    .await?;
                    Ok::<_, StorageError>(MessageId::new(id))
                })
            })
            .await
            .context("failed to send message")?;
        Ok(id)
    }

    async fn mark_read(&self, id: MessageId) -> anyhow::Result<()> {
        self.storage
            .transaction(Domain::Mailbox, move |tx| {
                Box::pin(async move {
                    sqlx::query("UPDATE messages SET is_read = 1 WHERE id = ?1")
                        .bind(id.get())
                        .execute(&mut **tx)
                        .await?;
                    Ok::<_, StorageError>(())
                })
            })
            .await
            .context("failed to mark message as read")
    }
}

fn row_to_message(row: &SqliteRow) -> Result<Message, StorageError> {
    let timestamp: String = row.try_get("timestamp")?;
    Ok(Message {
        id: MessageId::new(row.try_get("id")?),
        sender_id: EmployeeId::new(row.try_get("sender_id")?),
        recipient_id: EmployeeId::new(row.try_get("recipient_id")?),
        subject: row.try_get("subject")?,
        content: row.try_get("content")?,
        sent_at: parse_timestamp(&timestamp)?,
        is_read: row.try_get("is_read")?,
    })
}
