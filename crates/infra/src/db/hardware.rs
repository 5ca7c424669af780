//! Hardware catalog (`hardware` domain).

use anyhow::Context;
use async_trait::async_trait;
use sqlx::Row;

use deskside_core::{Domain, HardwareCatalog, HardwareFault, HardwareId};

use crate::storage::{Storage, StorageError};

pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS hardware_categories (
    id   INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT UNIQUE NOT NULL
);

CREATE TABLE IF NOT EXISTS hardware_items (
    id                INTEGER PRIMARY KEY AUTOINCREMENT,
    category_id       INTEGER NOT NULL REFERENCES hardware_categories(id),
    name              TEXT NOT NULL,
    manufacturer      TEXT NOT NULL,
    model             TEXT NOT NULL,
    release_date      TEXT,
    repair_difficulty INTEGER,
    UNIQUE (manufacturer, model)
);

CREATE TABLE IF NOT EXISTS hardware_failures (
    id                  INTEGER PRIMARY KEY AUTOINCREMENT,
    hardware_id         INTEGER NOT NULL REFERENCES hardware_items(id) ON DELETE CASCADE,
    failure_description TEXT NOT NULL
);
"#;

/// A catalog entry to be added, with the ways it can break.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub category: String,
    pub name: String,
    pub manufacturer: String,
    pub model: String,
    pub failures: Vec<String>,
}

/// SQLite-backed [`HardwareCatalog`].
#[derive(Debug, Clone)]
pub struct HardwareRepository {
    storage: Storage,
}

impl HardwareRepository {
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }

    pub async fn init(&self) -> Result<(), StorageError> {
        self.storage.init_schema(Domain::Hardware, SCHEMA).await
    }

    /// Add an item (and its category) unless an item with the same
    /// manufacturer and model exists. Returns the item id either way.
    pub async fn add_item(&self, entry: CatalogEntry) -> Result<HardwareId, StorageError> {
        self.storage
            .transaction(Domain::Hardware, move |tx| {
                Box::pin(async move {
                    sqlx::query("INSERT OR IGNORE INTO hardware_categories (name) VALUES (?1)")
                        .bind(&entry.category)
                        .execute(&mut **tx)
                        .await?;
                    let category_id: i64 =
                        sqlx::query_scalar("SELECT id FROM hardware_categories WHERE name = ?1")
                            .bind(&entry.category)
                            .fetch_one(&mut **tx)
                            .await?;

                    let existing: Option<i64> = sqlx::query_scalar(
                        "SELECT id FROM hardware_items WHERE manufacturer = ?1 AND model = ?2",
                    )
                    .bind(&entry.manufacturer)
                    .bind(&entry.model)
                    .fetch_optional(&mut **tx)
                    .await?;
                    if let Some(id) = existing {
                        return Ok::<_, StorageError>(HardwareId::new(id));
                    }

                    let id: i64 = sqlx::query_scalar(
                        r#"
                        INSERT INTO hardware_items (category_id, name, manufacturer, model)
                        VALUES (?1, ?2, ?3, ?4)
                        RETURNING id
                        "#,
                    )
                    .bind(category_id)
                    .bind(&entry.name)
                    .bind(&entry.manufacturer)
                    .bind(&entry.model)
                    .fetch_one(&mut **tx)
                    .await?;

                    for failure in &entry.failures {
                        sqlx::query(
                            "INSERT INTO hardware_failures (hardware_id, failure_description) VALUES (?1, ?2)",
                        )
                        .bind(id)
                        .bind(failure)
                        .execute(&mut **tx)
                        .await?;
                    }
                    Ok(HardwareId::new(id))
                })
            })
            .await
    }

    pub async fn item_count(&self) -> Result<i64, StorageError> {
        let mut conn = self.storage.connection(Domain::Hardware).await?;
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM hardware_items")
            .fetch_one(&mut *conn)
            .await?;
        Ok(count)
    }
}

#[async_trait]
impl HardwareCatalog for HardwareRepository {
    async fn random_fault(&self) -> anyhow::Result<Option<HardwareFault>> {
        let mut conn = self.storage.connection(Domain::Hardware).await?;

        // Pick the item first so every item is equally likely, however many
        // failure descriptions it has.
        let item = sqlx::query(
            r#"
            SELECT i.id, i.name, i.manufacturer, i.model, c.name AS category
            FROM hardware_items i
            JOIN hardware_categories c ON c.id = i.category_id
            WHERE EXISTS (SELECT 1 FROM hardware_failures f WHERE f.hardware_id = i.id)
            ORDER BY RANDOM()
            LIMIT 1
            "#,
        )
        .fetch_optional(&mut *conn)
        .await
        .context("failed to pick a random hardware item")?;

        let Some(item) = item else {
            return Ok(None);
        };
        let hardware_id: i64 = item.try_get("id")?;

        let failure: String = sqlx::query_scalar(
            r#"
            SELECT failure_description FROM hardware_failures
            WHERE hardware_id = ?1
            ORDER BY RANDOM()
            LIMIT 1
            "#,
        )
        .bind(hardware_id)
        .fetch_one(&mut *conn)
        .await
        .context("failed to pick a random hardware failure")?;

        Ok(Some(HardwareFault {
            hardware_id: HardwareId::new(hardware_id),
            name: item.try_get("name")?,
            manufacturer: item.try_get("manufacturer")?,
            model: item.try_get("model")?,
            category: item.try_get("category")?,
            failure,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StorageConfig;

    fn entry(model: &str, failures: &[&str]) -> CatalogEntry {
        CatalogEntry {
            category: "Laptops".into(),
            name: format!("ThinkPad {model}"),
            manufacturer: "Lenovo".into(),
            model: model.into(),
            failures: failures.iter().map(|f| f.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn empty_catalog_yields_no_fault() {
        let dir = tempfile::tempdir().unwrap();
        let repo = HardwareRepository::new(Storage::new(StorageConfig::in_dir(dir.path())));
        repo.init().await.unwrap();

        assert!(repo.random_fault().await.unwrap().is_none());

        // Items without known failures cannot break either.
        repo.add_item(entry("T480", &[])).await.unwrap();
        assert!(repo.random_fault().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn random_fault_pairs_an_item_with_one_of_its_failures() {
        let dir = tempfile::tempdir().unwrap();
        let repo = HardwareRepository::new(Storage::new(StorageConfig::in_dir(dir.path())));
        repo.init().await.unwrap();

        let failures = ["Battery swells", "Keyboard unresponsive"];
        let id = repo.add_item(entry("X1", &failures)).await.unwrap();
        assert_eq!(repo.add_item(entry("X1", &failures)).await.unwrap(), id);
        assert_eq!(repo.item_count().await.unwrap(), 1);

        let fault = repo.random_fault().await.unwrap().unwrap();
        assert_eq!(fault.hardware_id, id);
        assert_eq!(fault.category, "Laptops");
        assert!(failures.contains(&fault.failure.as_str()));
    }
}
