//! Durable priority queue persisted in the `game_state` domain.
//!
//! Events are served highest priority first and, within a priority, in
//! insertion order (`created_at`, then `id`). Reading the head does not claim
//! it: the single dispatcher marks an event processed after handling it.

use std::collections::HashSet;

use chrono::{DateTime, TimeDelta, Utc};
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite};
use tracing::{debug, warn};

use deskside_core::Domain;

use super::types::{EventId, EventStatus, GameEvent, QueueStats};
use crate::storage::{format_timestamp, parse_timestamp, Storage, StorageError};

pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS game_events (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    event_type   TEXT    NOT NULL,
    priority     INTEGER NOT NULL DEFAULT 0,
    payload      TEXT    NOT NULL,
    created_at   TEXT    NOT NULL,
    processed_at TEXT    NULL,
    status       TEXT    NOT NULL DEFAULT 'pending'
);
CREATE INDEX IF NOT EXISTS idx_game_events_pending
    ON game_events (status, priority DESC, created_at, id);
"#;

const SELECT_EVENT: &str = r#"
SELECT id, event_type, priority, payload, created_at, processed_at, status
FROM game_events
"#;

const DEQUEUE_ORDER: &str = " ORDER BY priority DESC, created_at ASC, id ASC";

/// SQLite-backed event queue.
///
/// Cheap to clone; clones share the underlying storage.
#[derive(Debug, Clone)]
pub struct EventQueue {
    storage: Storage,
}

impl EventQueue {
    /// Open the queue, creating its table if needed.
    pub async fn open(storage: Storage) -> Result<Self, StorageError> {
        storage.init_schema(Domain::GameState, SCHEMA).await?;
        Ok(Self { storage })
    }

    /// Enqueue an event at the default priority (0).
    pub async fn enqueue(&self, event_type: &str, payload: Value) -> Result<EventId, StorageError> {
        self.enqueue_with_priority(event_type, payload, 0).await
    }

    pub async fn enqueue_with_priority(
        &self,
        event_type: &str,
        payload: Value,
        priority: i64,
    ) -> Result<EventId, StorageError> {
        let event_type = event_type.to_owned();
        let payload = serde_json::to_string(&payload)?;
        let created_at = format_timestamp(Utc::now());

        let id = self
            .storage
            .transaction(Domain::GameState, move |tx| {
                Box::pin(async move {
                    let id: i64 = sqlx::query_scalar(
                        r#"
                        INSERT INTO game_events (event_type, priority, payload, created_at, status)
                        VALUES (?1, ?2, ?3, ?4, 'pending')
                        RETURNING id
                        "#,
                    )
                    .bind(&event_type)
                    .bind(priority)
                    .bind(&payload)
                    .bind(&created_at)
                    .fetch_one(&mut **tx)
                    .await?;
                    Ok::<_, StorageError>(EventId::new(id))
                })
            })
            .await?;

        debug!(event_id = %id, priority, "event enqueued");
        Ok(id)
    }

    /// The next pending event in dispatch order, without claiming it.
    pub async fn dequeue_next(&self) -> Result<Option<GameEvent>, StorageError> {
        self.dequeue_next_excluding(&[]).await
    }

    /// Like [`EventQueue::dequeue_next`], skipping the given ids.
    pub async fn dequeue_next_excluding(
        &self,
        exclude: &[EventId],
    ) -> Result<Option<GameEvent>, StorageError> {
        let mut query = QueryBuilder::<Sqlite>::new(SELECT_EVENT);
        query.push(" WHERE status = 'pending'");
        if !exclude.is_empty() {
            query.push(" AND id NOT IN (");
            let mut ids = query.separated(", ");
            for id in exclude {
                ids.push_bind(id.get());
            }
            ids.push_unseparated(")");
        }
        query.push(DEQUEUE_ORDER);
        query.push(" LIMIT 1");

        let mut conn = self.storage.connection(Domain::GameState).await?;
        let row = query.build().fetch_optional(&mut *conn).await?;
        row.as_ref().map(row_to_event).transpose()
    }

    /// The subset of `ids` that still exist and are pending.
    pub async fn still_pending(&self, ids: &[EventId]) -> Result<HashSet<EventId>, StorageError> {
        if ids.is_empty() {
            return Ok(HashSet::new());
        }
        let mut query =
            QueryBuilder::<Sqlite>::new("SELECT id FROM game_events WHERE status = 'pending' AND id IN (");
        let mut bound = query.separated(", ");
        for id in ids {
            bound.push_bind(id.get());
        }
        bound.push_unseparated(")");

        let mut conn = self.storage.connection(Domain::GameState).await?;
        let pending = query.build_query_scalar::<i64>().fetch_all(&mut *conn).await?;
        Ok(pending.into_iter().map(EventId::new).collect())
    }

    /// Record the outcome of handling an event. Re-marking overwrites.
    pub async fn mark_processed(&self, id: EventId, success: bool) -> Result<(), StorageError> {
        let status = EventStatus::from_outcome(success);
        let processed_at = format_timestamp(Utc::now());

        let updated = self
            .storage
            .transaction(Domain::GameState, move |tx| {
                Box::pin(async move {
                    let result = sqlx::query(
                        r#"
                        UPDATE game_events
                        SET status = ?2,
                            processed_at = ?3
                        WHERE id = ?1
                        "#,
                    )
                    .bind(id.get())
                    .bind(status.as_str())
                    .bind(&processed_at)
                    .execute(&mut **tx)
                    .await?;
                    Ok::<_, StorageError>(result.rows_affected())
                })
            })
            .await?;

        if updated == 0 {
            warn!(event_id = %id, "mark_processed found no such event");
        }
        Ok(())
    }

    pub async fn get(&self, id: EventId) -> Result<Option<GameEvent>, StorageError> {
        let sql = format!("{SELECT_EVENT} WHERE id = ?1");
        let mut conn = self.storage.connection(Domain::GameState).await?;
        let row = sqlx::query(&sql)
            .bind(id.get())
            .fetch_optional(&mut *conn)
            .await?;
        row.as_ref().map(row_to_event).transpose()
    }

    /// Every pending event, in dispatch order.
    pub async fn list_pending(&self) -> Result<Vec<GameEvent>, StorageError> {
        let sql = format!("{SELECT_EVENT} WHERE status = 'pending'{DEQUEUE_ORDER}");
        let mut conn = self.storage.connection(Domain::GameState).await?;
        let rows = sqlx::query(&sql).fetch_all(&mut *conn).await?;
        rows.iter().map(row_to_event).collect()
    }

    /// Delete events created more than `days` days ago, whatever their status.
    pub async fn purge_older_than(&self, days: u32) -> Result<u64, StorageError> {
        let cutoff = TimeDelta::try_days(i64::from(days))
            .and_then(|age| Utc::now().checked_sub_signed(age))
            .filter(|cutoff| cutoff.timestamp() >= 0);
        match cutoff {
            Some(cutoff) => self.purge_before(cutoff).await,
            // No event predates the epoch.
            None => Ok(0),
        }
    }

    pub async fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StorageError> {
        let cutoff = format_timestamp(cutoff);
        let removed = self
            .storage
            .transaction(Domain::GameState, move |tx| {
                Box::pin(async move {
                    let result = sqlx::query("DELETE FROM game_events WHERE created_at < ?1")
                        .bind(&cutoff)
                        .execute(&mut **tx)
                        .await?;
                    Ok::<_, StorageError>(result.rows_affected())
                })
            })
            .await?;

        if removed > 0 {
            debug!(removed, "purged old events");
        }
        Ok(removed)
    }

    pub async fn stats(&self) -> Result<QueueStats, StorageError> {
        let mut conn = self.storage.connection(Domain::GameState).await?;
        let rows = sqlx::query("SELECT status, COUNT(*) AS total FROM game_events GROUP BY status")
            .fetch_all(&mut *conn)
            .await?;

        let mut stats = QueueStats::default();
        for row in rows {
            let status: String = row.try_get("status")?;
            let total: i64 = row.try_get("total")?;
            let total = u64::try_from(total).unwrap_or_default();
            match status.parse::<EventStatus>()? {
                EventStatus::Pending => stats.pending = total,
                EventStatus::Completed => stats.completed = total,
                EventStatus::Failed => stats.failed = total,
            }
        }
        Ok(stats)
    }
}

fn row_to_event(row: &SqliteRow) -> Result<GameEvent, StorageError> {
    let id: i64 = row.try_get("id")?;
    let event_type: String = row.try_get("event_type")?;
    let priority: i64 = row.try_get("priority")?;
    let payload: String = row.try_get("payload")?;
    let created_at: String = row.try_get("created_at")?;
    let processed_at: Option<String> = row.try_get("processed_at")?;
    let status: String = row.try_get("status")?;

    Ok(GameEvent {
        id: EventId::new(id),
        event_type,
        priority,
        payload: serde_json::from_str(&payload)?,
        created_at: parse_timestamp(&created_at)?,
        processed_at: processed_at.as_deref().map(parse_timestamp).transpose()?,
        status: status.parse()?,
    })
}
