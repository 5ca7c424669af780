//! Tickets store (`tickets` domain).

use std::collections::HashMap;

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::warn;

use deskside_core::{Domain, NewTicket, Product, Ticket, TicketDesk, TicketId, TicketStatus};

use crate::storage::{format_timestamp, parse_timestamp, Storage, StorageError};

pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS products (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    name         TEXT NOT NULL,
    model        TEXT NOT NULL,
    manufacturer TEXT NOT NULL,
    category     TEXT NOT NULL DEFAULT '',
    created_at   TEXT NOT NULL,
    UNIQUE (name, model, manufacturer)
);

CREATE TABLE IF NOT EXISTS tickets (
    id          TEXT PRIMARY KEY,
    title       TEXT NOT NULL,
    status      TEXT NOT NULL DEFAULT 'New',
    product_id  INTEGER NULL REFERENCES products(id),
    reporter    TEXT NULL,
    assignee_id INTEGER NULL,
    created_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS ticket_description (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    ticket_id   TEXT NOT NULL REFERENCES tickets(id) ON DELETE CASCADE,
    description TEXT NOT NULL,
    created_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS ticket_history (
    audit_id   INTEGER PRIMARY KEY AUTOINCREMENT,
    ticket_id  TEXT NOT NULL REFERENCES tickets(id) ON DELETE CASCADE,
    status     TEXT NOT NULL,
    comment    TEXT NULL,
    changed_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_tickets_status ON tickets (status);
"#;

const SELECT_TICKET: &str = r#"
SELECT t.id, t.title, t.status, t.reporter, t.created_at,
       d.description,
       p.name AS product_name, p.model AS product_model,
       p.manufacturer AS product_manufacturer, p.category AS product_category
FROM tickets t
LEFT JOIN ticket_description d
       ON d.id = (SELECT MIN(id) FROM ticket_description WHERE ticket_id = t.id)
LEFT JOIN products p ON p.id = t.product_id
"#;

/// SQLite-backed [`TicketDesk`].
#[derive(Debug, Clone)]
pub struct TicketRepository {
    storage: Storage,
}

impl TicketRepository {
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }

    pub async fn init(&self) -> Result<(), StorageError> {
        self.storage.init_schema(Domain::Tickets, SCHEMA).await
    }

    pub async fn get(&self, id: TicketId) -> Result<Option<Ticket>, StorageError> {
        let sql = format!("{SELECT_TICKET} WHERE t.id = ?1");
        let mut conn = self.storage.connection(Domain::Tickets).await?;
        let row = sqlx::query(&sql)
            .bind(id.to_string())
            .fetch_optional(&mut *conn)
            .await?;
        row.as_ref().map(row_to_ticket).transpose()
    }

    /// Move a ticket to `status`, recording the change in its history.
    pub async fn update_status(
        &self,
        id: TicketId,
        status: TicketStatus,
        comment: Option<String>,
    ) -> Result<bool, StorageError> {
        let ticket_id = id.to_string();
        let changed_at = format_timestamp(Utc::now());

        self.storage
            .transaction(Domain::Tickets, move |tx| {
                Box::pin(async move {
                    let updated = sqlx::query("UPDATE tickets SET status = ?2 WHERE id = ?1")
                        .bind(&ticket_id)
                        .bind(status.as_str())
                        .execute(&mut **tx)
                        .await?
                        .rows_affected();
                    if updated == 0 {
                        return Ok::<_, StorageError>(false);
                    }
                    sqlx::query(
                        "INSERT INTO ticket_history (ticket_id, status, comment, changed_at) VALUES (?1, ?2, ?3, ?4)",
                    )
                    .bind(&ticket_id)
                    .bind(status.as_str())
                    .bind(&comment)
                    .bind(&changed_at)
                    .execute(&mut **tx)
                    .await?;
                    Ok(true)
                })
            })
            .await
    }

    /// Status changes of a ticket, oldest first.
    pub async fn history(&self, id: TicketId) -> Result<Vec<TicketStatus>, StorageError> {
        let mut conn = self.storage.connection(Domain::Tickets).await?;
        let statuses: Vec<String> = sqlx::query_scalar(
            "SELECT status FROM ticket_history WHERE ticket_id = ?1 ORDER BY audit_id ASC",
        )
        .bind(id.to_string())
        .fetch_all(&mut *conn)
        .await?;
        statuses
            .iter()
            .map(|status| status.parse().map_err(StorageError::from))
            .collect()
    }

    async fn insert(&self, ticket: NewTicket) -> Result<Ticket, StorageError> {
        let id = TicketId::new();
        let now = Utc::now();
        let created_at = format_timestamp(now);
        let record = Ticket {
            id,
            title: ticket.title,
            status: TicketStatus::New,
            description: ticket.description,
            product: ticket.product,
            reporter: ticket.reporter,
            created_at: now,
        };

        let row = record.clone();
        self.storage
            .transaction(Domain::Tickets, move |tx| {
                Box::pin(async move {
                    let product_id = match &row.product {
                        Some(product) => {
                            sqlx::query(
                                r#"
                                INSERT OR IGNORE INTO products (name, model, manufacturer, category, created_at)
                                VALUES (?1, ?2, ?3, ?4, ?5)
                                "#,
                            )
                            .bind(&product.name)
                            .bind(&product.model)
                            .bind(&product.manufacturer)
                            .bind(&product.category)
                            .bind(&created_at)
                            .execute(&mut **tx)
                            .await?;
                            let id: i64 = sqlx::query_scalar(
                                "SELECT id FROM products WHERE name = ?1 AND model = ?2 AND manufacturer = ?3",
                            )
                            .bind(&product.name)
                            .bind(&product.model)
                            .bind(&product.manufacturer)
                            .fetch_one(&mut **tx)
                            .await?;
                            Some(id)
                        }
                        None => None,
                    };

                    let ticket_id = row.id.to_string();
                    sqlx::query(
                        r#"
                        INSERT INTO tickets (id, title, status, product_id, reporter, created_at)
                        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                        "#,
                    )
                    .bind(&ticket_id)
                    .bind(&row.title)
                    .bind(row.status.as_str())
                    .bind(product_id)
                    .bind(&row.reporter)
                    .bind(&created_at)
                    .execute(&mut **tx)
                    .await?;

                    sqlx::query(
                        "INSERT INTO ticket_description (ticket_id, description, created_at) VALUES (?1, ?2, ?3)",
                    )
                    .bind(&ticket_id)
                    .bind(&row.description)
                    .bind(&created_at)
                    .execute(&mut **tx)
                    .await?;

                    sqlx::query(
                        "INSERT INTO ticket_history (ticket_id, status, comment, changed_at) VALUES (?1, ?2, 'Ticket created', ?3)",
                    )
                    .bind(&ticket_id)
                    .bind(row.status.as_str())
                    .bind(&created_at)
                    .execute(&mut **tx)
                    .await?;

                    Ok::<_, StorageError>(())
                })
            })
            .await?;

        Ok(record)
    }
}

#[async_trait]
impl TicketDesk for TicketRepository {
    async fn count_by_status(&self) -> anyhow::Result<HashMap<TicketStatus, u64>> {
        let mut conn = self.storage.connection(Domain::Tickets).await?;
        let rows = sqlx::query("SELECT status, COUNT(*) AS total FROM tickets GROUP BY status")
            .fetch_all(&mut *conn)
            .await
            .context("failed to count tickets by status")?;

        let mut counts = HashMap::new();
        for row in rows {
            let status: String = row.try_get("status")?;
            let total: i64 = row.try_get("total")?;
            match status.parse::<TicketStatus>() {
                Ok(status) => {
                    counts.insert(status, u64::try_from(total).unwrap_or_default());
                }
                Err(err) => warn!(error = %err, "ignoring tickets with an unknown status"),
            }
        }
        Ok(counts)
    }

    async fn create_ticket(&self, ticket: NewTicket) -> anyhow::Result<Ticket> {
        self.insert(ticket)
            .await
            .context("failed to create ticket")
    }

    async fn active_tickets(&self) -> anyhow::Result<Vec<Ticket>> {
        let sql = format!(
            "{SELECT_TICKET} WHERE t.status != '{}' ORDER BY t.created_at ASC",
            TicketStatus::Resolved.as_str()
        );
        let mut conn = self.storage.connection(Domain::Tickets).await?;
        let rows = sqlx::query(&sql)
            .fetch_all(&mut *conn)
            .await
            .context("failed to list active tickets")?;
        let tickets = rows
            .iter()
            .map(row_to_ticket)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(tickets)
    }
}

fn row_to_ticket(row: &SqliteRow) -> Result<Ticket, StorageError> {
    let id: String = row.try_get("id")?;
    let status: String = row.try_get("status")?;
    let created_at: String = row.try_get("created_at")?;
    let product_name: Option<String> = row.try_get("product_name")?;

    let product = match product_name {
        Some(name) => Some(Product {
            name,
            model: row.try_get("product_model")?,
            manufacturer: row.try_get("product_manufacturer")?,
            category: row.try_get("product_category")?,
        }),
        None => None,
    };

    Ok(Ticket {
        id: id.parse()?,
        title: row.try_get("title")?,
        status: status.parse()?,
        description: row
            .try_get::<Option<String>, _>("description")?
            .unwrap_or_default(),
        product,
        reporter: row.try_get("reporter")?,
        created_at: parse_timestamp(&created_at)?,
    })
}
