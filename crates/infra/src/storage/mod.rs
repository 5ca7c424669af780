//! Storage gateway: scoped connections and transactions per domain.
//!
//! Every domain is an independent SQLite file. Connections come from one lazily
//! created pool per domain and are returned to it when dropped, so a connection
//! is released on every exit path. Foreign keys are enforced on every
//! connection and writers wait on locks for the configured busy timeout.
//!
//! There are no cross-domain transactions: a [`Storage::transaction`] is atomic
//! within its domain only.

mod registry;

pub use registry::DomainRegistry;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use deskside_core::{Domain, DomainError};
use futures::future::BoxFuture;
use sqlx::pool::PoolConnection;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Connection, Sqlite, SqliteConnection, SqlitePool, Transaction};
use tracing::{debug, info};

/// Default time a connection waits on a locked database before failing.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(30);

const MAX_CONNECTIONS_PER_DOMAIN: u32 = 4;

/// Storage gateway error.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("unknown storage domain: {0}")]
    UnknownDomain(String),

    #[error("failed to prepare database location {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("corrupt row: {0}")]
    Corrupt(String),
}

impl From<DomainError> for StorageError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::UnknownDomain(name) => StorageError::UnknownDomain(name),
            other => StorageError::Corrupt(other.to_string()),
        }
    }
}

/// Gateway settings.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub registry: DomainRegistry,
    pub busy_timeout: Duration,
}

impl StorageConfig {
    /// All domains under `data_dir` with the default busy timeout.
    pub fn in_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            registry: DomainRegistry::in_dir(data_dir.into()),
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        }
    }

    pub fn with_busy_timeout(mut self, busy_timeout: Duration) -> Self {
        self.busy_timeout = busy_timeout;
        self
    }
}

/// Per-domain connection and transaction helper.
///
/// Cheap to clone; clones share pools and the active registry.
#[derive(Debug, Clone)]
pub struct Storage {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    base: DomainRegistry,
    overrides: RwLock<Option<DomainRegistry>>,
    pools: tokio::sync::Mutex<HashMap<Domain, SqlitePool>>,
    busy_timeout: Duration,
}

impl Storage {
    pub fn new(config: StorageConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                base: config.registry,
                overrides: RwLock::new(None),
                pools: tokio::sync::Mutex::new(HashMap::new()),
                busy_timeout: config.busy_timeout,
            }),
        }
    }

    /// Resolve a domain by name.
    pub fn resolve(&self, name: &str) -> Result<Domain, StorageError> {
        let domain: Domain = name.parse()?;
        self.location(domain)?;
        Ok(domain)
    }

    /// Database file of `domain` under the active registry.
    pub fn location(&self, domain: Domain) -> Result<PathBuf, StorageError> {
        let overrides = self
            .inner
            .overrides
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let registry = overrides.as_ref().unwrap_or(&self.inner.base);
        registry
            .get(domain)
            .map(PathBuf::from)
            .ok_or_else(|| StorageError::UnknownDomain(domain.to_string()))
    }

    pub fn busy_timeout(&self) -> Duration {
        self.inner.busy_timeout
    }

    /// Replace the whole domain → file mapping (test hook).
    ///
    /// Domains missing from `registry` become unknown until
    /// [`Storage::clear_overrides`] is called. Open pools are closed.
    pub async fn override_locations(&self, registry: DomainRegistry) {
        {
            let mut overrides = self
                .inner
                .overrides
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            *overrides = Some(registry);
        }
        self.close_pools().await;
        debug!("storage locations overridden");
    }

    /// Restore the configured domain → file mapping.
    pub async fn clear_overrides(&self) {
        {
            let mut overrides = self
                .inner
                .overrides
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            *overrides = None;
        }
        self.close_pools().await;
        debug!("storage overrides cleared");
    }

    /// Close every open pool. Later calls reopen pools on demand.
    pub async fn close_pools(&self) {
        let pools: Vec<SqlitePool> = {
            let mut pools = self.inner.pools.lock().await;
            pools.drain().map(|(_, pool)| pool).collect()
        };
        for pool in pools {
            pool.close().await;
        }
    }

    /// A pooled connection with the default busy timeout.
    pub async fn connection(&self, domain: Domain) -> Result<PoolConnection<Sqlite>, StorageError> {
        self.connection_with_timeout(domain, self.inner.busy_timeout)
            .await
    }

    /// A pooled connection that waits up to `busy_timeout` on locks.
    pub async fn connection_with_timeout(
        &self,
        domain: Domain,
        busy_timeout: Duration,
    ) -> Result<PoolConnection<Sqlite>, StorageError> {
        let pool = self.pool(domain).await?;
        let mut conn = pool.acquire().await?;
        let pragma = format!("PRAGMA busy_timeout = {}", busy_timeout.as_millis());
        sqlx::query(&pragma).execute(&mut *conn).await?;
        // A pooled connection may come back with enforcement switched off.
        sqlx::query("PRAGMA foreign_keys = ON")
            .execute(&mut *conn)
            .await?;
        Ok(conn)
    }

    /// Run `f` in a transaction on `domain`.
    ///
    /// Commits when `f` returns `Ok`, rolls back and returns the error
    /// otherwise. `f` must not commit or roll back itself.
    pub async fn transaction<T, F>(&self, domain: Domain, f: F) -> Result<T, StorageError>
    where
        for<'c> F: FnOnce(&'c mut Transaction<'_, Sqlite>) -> BoxFuture<'c, Result<T, StorageError>>
            + Send
            + Sync,
        T: Send,
    {
        self.transaction_with_timeout(domain, self.inner.busy_timeout, f)
            .await
    }

    pub async fn transaction_with_timeout<T, F>(
        &self,
        domain: Domain,
        busy_timeout: Duration,
        f: F,
    ) -> Result<T, StorageError>
    where
        for<'c> F: FnOnce(&'c mut Transaction<'_, Sqlite>) -> BoxFuture<'c, Result<T, StorageError>>
            + Send
            + Sync,
        T: Send,
    {
        let mut conn = self.connection_with_timeout(domain, busy_timeout).await?;
        conn.transaction(f).await
    }

    /// Apply an idempotent schema script (`CREATE ... IF NOT EXISTS`).
    pub async fn init_schema(&self, domain: Domain, script: &str) -> Result<(), StorageError> {
        let script = script.to_owned();
        self.transaction(domain, move |tx| {
            Box::pin(async move {
                sqlx::Executor::execute(&mut **tx, sqlx::raw_sql(&script)).await?;
                Ok::<_, StorageError>(())
            })
        })
        .await?;
        debug!(domain = %domain, "schema initialized");
        Ok(())
    }

    /// Drop every user table of `domain` and re-apply `script`.
    pub async fn reset_schema(&self, domain: Domain, script: &str) -> Result<(), StorageError> {
        {
            let mut conn = self.connection(domain).await?;
            // Must run outside a transaction; SQLite ignores it inside one.
            sqlx::query("PRAGMA foreign_keys = OFF")
                .execute(&mut *conn)
                .await?;
            let dropped = drop_user_tables(&mut conn).await;
            sqlx::query("PRAGMA foreign_keys = ON")
                .execute(&mut *conn)
                .await?;
            let dropped = dropped?;
            info!(domain = %domain, tables = dropped, "schema reset");
        }
        self.init_schema(domain, script).await
    }

    async fn pool(&self, domain: Domain) -> Result<SqlitePool, StorageError> {
        let mut pools = self.inner.pools.lock().await;
        if let Some(pool) = pools.get(&domain) {
            return Ok(pool.clone());
        }

        let path = self.location(domain)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| StorageError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(&path)
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(self.inner.busy_timeout);

        let pool = SqlitePoolOptions::new()
            .max_connections(MAX_CONNECTIONS_PER_DOMAIN)
            .connect_with(options)
            .await?;

        debug!(domain = %domain, path = ?path, "opened storage pool");
        pools.insert(domain, pool.clone());
        Ok(pool)
    }
}

async fn drop_user_tables(conn: &mut SqliteConnection) -> Result<usize, StorageError> {
    let mut tx = conn.begin().await?;
    let tables: Vec<String> = sqlx::query_scalar(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%'",
    )
    .fetch_all(&mut *tx)
    .await?;

    for table in &tables {
        let statement = format!("DROP TABLE IF EXISTS \"{}\"", table.replace('"', "\"\""));
        sqlx::query(&statement).execute(&mut *tx).await?;
    }
    tx.commit().await?;
    Ok(tables.len())
}

/// Timestamp format used by every store: UTC, fixed microsecond precision, so
/// text order equals chronological order.
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|e| StorageError::Corrupt(format!("bad timestamp {raw:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCHEMA: &str = r#"
        CREATE TABLE IF NOT EXISTS owners (
            id   INTEGER PRIMARY KEY,
            name TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS pets (
            id       INTEGER PRIMARY KEY,
            owner_id INTEGER NOT NULL REFERENCES owners(id),
            name     TEXT NOT NULL
        );
    "#;

    fn storage(dir: &tempfile::TempDir) -> Storage {
        Storage::new(StorageConfig::in_dir(dir.path()))
    }

    async fn count(storage: &Storage, table: &'static str) -> i64 {
        let mut conn = storage.connection(Domain::Player).await.unwrap();
        let sql = format!("SELECT COUNT(*) FROM {table}");
        let count: i64 = sqlx::query_scalar(&sql).fetch_one(&mut *conn).await.unwrap();
        count
    }

    #[test]
    fn unknown_domain_names_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage(&dir);

        assert!(matches!(
            storage.resolve("payroll"),
            Err(StorageError::UnknownDomain(name)) if name == "payroll"
        ));
        assert_eq!(storage.resolve("mailbox").unwrap(), Domain::Mailbox);
    }

    #[tokio::test]
    async fn init_schema_is_idempotent_and_creates_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage(&dir);

        storage.init_schema(Domain::Player, SCHEMA).await.unwrap();
        storage.init_schema(Domain::Player, SCHEMA).await.unwrap();

        assert!(dir.path().join("player.db").exists());
        assert_eq!(count(&storage, "pets").await, 0);
    }

    #[tokio::test]
    async fn failing_transaction_rolls_back_every_statement() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage(&dir);
        storage.init_schema(Domain::Player, SCHEMA).await.unwrap();

        let result = storage
            .transaction(Domain::Player, |tx| {
                Box::pin(async move {
                    sqlx::query("INSERT INTO owners (id, name) VALUES (1, 'Dana')")
                        .execute(&mut **tx)
                        .await?;
                    // Violates the foreign key: owner 99 does not exist.
                    sqlx::query("INSERT INTO pets (owner_id, name) VALUES (99, 'Rex')")
                        .execute(&mut **tx)
                        .await?;
                    Ok::<_, StorageError>(())
                })
            })
            .await;

        assert!(matches!(result, Err(StorageError::Database(_))));
        assert_eq!(count(&storage, "owners").await, 0);
        assert_eq!(count(&storage, "pets").await, 0);
    }

    #[tokio::test]
    async fn successful_transaction_commits() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage(&dir);
        storage.init_schema(Domain::Player, SCHEMA).await.unwrap();

        let owner_id = storage
            .transaction(Domain::Player, |tx| {
                Box::pin(async move {
                    let id: i64 =
                        sqlx::query_scalar("INSERT INTO owners (name) VALUES ('Dana') RETURNING id")
                            .fetch_one(&mut **tx)
                            .await?;
                    sqlx::query("INSERT INTO pets (owner_id, name) VALUES (?1, 'Rex')")
                        .bind(id)
                        .execute(&mut **tx)
                        .await?;
                    Ok::<_, StorageError>(id)
                })
            })
            .await
            .unwrap();

        assert!(owner_id > 0);
        assert_eq!(count(&storage, "pets").await, 1);
    }

    #[tokio::test]
    async fn per_call_busy_timeout_is_applied() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage(&dir);

        let mut conn = storage
            .connection_with_timeout(Domain::Player, Duration::from_millis(1500))
            .await
            .unwrap();
        let timeout: i64 = sqlx::query_scalar("PRAGMA busy_timeout")
            .fetch_one(&mut *conn)
            .await
            .unwrap();
        assert_eq!(timeout, 1500);

        let foreign_keys: i64 = sqlx::query_scalar("PRAGMA foreign_keys")
            .fetch_one(&mut *conn)
            .await
            .unwrap();
        assert_eq!(foreign_keys, 1);
    }

    #[tokio::test]
    async fn reset_schema_drops_data_and_recreates_tables() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage(&dir);
        storage.init_schema(Domain::Player, SCHEMA).await.unwrap();
        storage
            .transaction(Domain::Player, |tx| {
                Box::pin(async move {
                    sqlx::query("INSERT INTO owners (id, name) VALUES (1, 'Dana')")
                        .execute(&mut **tx)
                        .await?;
                    sqlx::query("INSERT INTO pets (owner_id, name) VALUES (1, 'Rex')")
                        .execute(&mut **tx)
                        .await?;
                    Ok::<_, StorageError>(())
                })
            })
            .await
            .unwrap();

        storage.reset_schema(Domain::Player, SCHEMA).await.unwrap();

        assert_eq!(count(&storage, "owners").await, 0);
        assert_eq!(count(&storage, "pets").await, 0);
    }

    #[tokio::test]
    async fn reacquired_connections_enforce_foreign_keys() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage(&dir);
        storage.init_schema(Domain::Player, SCHEMA).await.unwrap();

        {
            let mut conn = storage.connection(Domain::Player).await.unwrap();
            sqlx::query("PRAGMA foreign_keys = OFF")
                .execute(&mut *conn)
                .await
                .unwrap();
        }

        let mut conn = storage.connection(Domain::Player).await.unwrap();
        let foreign_keys: i64 = sqlx::query_scalar("PRAGMA foreign_keys")
            .fetch_one(&mut *conn)
            .await
            .unwrap();
        assert_eq!(foreign_keys, 1);
        drop(conn);

        let orphan = storage
            .transaction(Domain::Player, |tx| {
                Box::pin(async move {
                    sqlx::query("INSERT INTO pets (owner_id, name) VALUES (42, 'Rex')")
                        .execute(&mut **tx)
                        .await?;
                    Ok::<_, StorageError>(())
                })
            })
            .await;
        assert!(matches!(orphan, Err(StorageError::Database(_))));
    }

    #[tokio::test]
    async fn overrides_replace_the_mapping_wholesale() {
        let dir = tempfile::tempdir().unwrap();
        let other = tempfile::tempdir().unwrap();
        let storage = storage(&dir);

        let moved = other.path().join("elsewhere.db");
        storage
            .override_locations(DomainRegistry::empty().with(Domain::Player, &moved))
            .await;

        assert_eq!(storage.location(Domain::Player).unwrap(), moved);
        assert!(matches!(
            storage.location(Domain::Tickets),
            Err(StorageError::UnknownDomain(_))
        ));
        storage.init_schema(Domain::Player, SCHEMA).await.unwrap();
        assert!(moved.exists());

        storage.clear_overrides().await;
        assert_eq!(
            storage.location(Domain::Tickets).unwrap(),
            dir.path().join("tickets.db")
        );
    }

    #[test]
    fn timestamps_sort_lexically() {
        let early = Utc::now();
        let late = early + chrono::Duration::milliseconds(1);
        assert!(format_timestamp(early) < format_timestamp(late));
        let parsed = parse_timestamp(&format_timestamp(early)).unwrap();
        assert_eq!(parsed.timestamp_micros(), early.timestamp_micros());
    }
}
