//! Record store adapter.
//!
//! One relation, two columns:
//!
//! ```text
//! <table> (UserID VARCHAR(255), Ranks TEXT)
//! ```
//!
//! `UserID` is the de facto key; no uniqueness constraint is declared, so
//! callers check absence with [`RecordStore::fetch_by_user`] before
//! [`RecordStore::insert`]. Every call is bounded by the configured timeout.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::migrate::MigrateDatabase;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::{FromRow, Sqlite};

use ranksync_core::config::{is_sql_identifier, DatabaseConfig};
use ranksync_core::{PersistedRecord, UserId};

use crate::error::{query_err, SyncError};

/// Primitive operations against the persisted ranks relation.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Name of the relation this store reads and writes.
    fn table(&self) -> &str;

    /// Create the relation if absent and check that it has the expected
    /// columns. Safe to call repeatedly.
    async fn ensure_schema(&self) -> Result<(), SyncError>;

    /// The record for `user`, or `None` when no row exists.
    async fn fetch_by_user(&self, user: &UserId) -> Result<Option<PersistedRecord>, SyncError>;

    /// Create a new record. Must only be called after an absent fetch.
    async fn insert(&self, record: &PersistedRecord) -> Result<(), SyncError>;

    /// Overwrite `Ranks` for `user`. Returns `false` when no row matched.
    async fn update_roles(&self, user: &UserId, roles: &str) -> Result<bool, SyncError>;

    /// Round-trip to the backend.
    async fn ping(&self) -> Result<(), SyncError>;
}

// ---------------------------------------------------------------------------
// SQLite
// ---------------------------------------------------------------------------

#[derive(FromRow, Debug)]
struct RankRow {
    #[sqlx(rename = "UserID")]
    user_id: String,
    #[sqlx(rename = "Ranks")]
    ranks: Option<String>,
}

impl From<RankRow> for PersistedRecord {
    fn from(row: RankRow) -> Self {
        PersistedRecord {
            user_id: UserId::from(row.user_id),
            roles: row.ranks,
        }
    }
}

/// `sqlx` SQLite-backed [`RecordStore`].
#[derive(Clone, Debug)]
pub struct SqliteRecordStore {
    pool: SqlitePool,
    table: String,
    timeout: Duration,
}

impl SqliteRecordStore {
    /// Open a pool from config, creating the database file if it doesn't exist.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, SyncError> {
        if !is_sql_identifier(&config.table) {
            return Err(SyncError::InvalidTable(config.table.clone()));
        }
        let timeout = config.query_timeout();

        let exists = bounded("connect", timeout, Sqlite::database_exists(&config.url)).await?;
        if !exists {
            tracing::info!(url = %config.url, "creating database");
            bounded("connect", timeout, Sqlite::create_database(&config.url)).await?;
        }

        Self::open_pool(config, timeout).await
    }

    /// Open a pool only if the database already exists. Nothing is created;
    /// `None` means there is no database file yet.
    pub async fn open_existing(config: &DatabaseConfig) -> Result<Option<Self>, SyncError> {
        if !is_sql_identifier(&config.table) {
            return Err(SyncError::InvalidTable(config.table.clone()));
        }
        let timeout = config.query_timeout();

        if !bounded("connect", timeout, Sqlite::database_exists(&config.url)).await? {
            return Ok(None);
        }
        Self::open_pool(config, timeout).await.map(Some)
    }

    async fn open_pool(config: &DatabaseConfig, timeout: Duration) -> Result<Self, SyncError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(timeout)
            .connect(&config.url)
            .await
            .map_err(|e| query_err("connect", e))?;

        Self::from_pool(pool, config.table.clone(), timeout)
    }

    /// Whether the ranks relation has been created in this database.
    pub async fn relation_exists(&self) -> Result<bool, SyncError> {
        let found: Option<(String,)> = bounded(
            "relation_exists",
            self.timeout,
            sqlx::query_as("SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?")
                .bind(self.table.as_str())
                .fetch_optional(&self.pool),
        )
        .await?;
        Ok(found.is_some())
    }

    /// Wrap an existing pool.
    pub fn from_pool(
        pool: SqlitePool,
        table: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, SyncError> {
        let table = table.into();
        if !is_sql_identifier(&table) {
            return Err(SyncError::InvalidTable(table));
        }
        Ok(Self {
            pool,
            table,
            timeout,
        })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Release every pooled connection. Further calls fail with a query error.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    fn table(&self) -> &str {
        &self.table
    }

    async fn ensure_schema(&self) -> Result<(), SyncError> {
        let create = format!(
            "CREATE TABLE IF NOT EXISTS \"{}\" (UserID VARCHAR(255), Ranks TEXT)",
            self.table
        );
        tracing::debug!(sql = %create, "ensure schema");
        let schema_err = |err: SyncError| match err {
            SyncError::Query { source, .. } => SyncError::Schema {
                table: self.table.clone(),
                source,
            },
            other => other,
        };

        bounded(
            "ensure_schema",
            self.timeout,
            sqlx::query(&create).execute(&self.pool),
        )
        .await
        .map_err(schema_err)?;

        // An older relation with the same name but other columns fails here.
        let probe = format!("SELECT UserID, Ranks FROM \"{}\" LIMIT 0", self.table);
        bounded(
            "ensure_schema",
            self.timeout,
            sqlx::query(&probe).fetch_all(&self.pool),
        )
        .await
        .map_err(schema_err)?;
        Ok(())
    }

    async fn fetch_by_user(&self, user: &UserId) -> Result<Option<PersistedRecord>, SyncError> {
        let sql = format!("SELECT UserID, Ranks FROM \"{}\" WHERE UserID = ? LIMIT 1", self.table);
        tracing::debug!(user = %user, sql = %sql, "fetch record");
        let row = bounded(
            "fetch_by_user",
            self.timeout,
            sqlx::query_as::<_, RankRow>(&sql)
                .bind(user.as_str())
                .fetch_optional(&self.pool),
        )
        .await?;
        Ok(row.map(PersistedRecord::from))
    }

    async fn insert(&self, record: &PersistedRecord) -> Result<(), SyncError> {
        let sql = format!("INSERT INTO \"{}\" (UserID, Ranks) VALUES (?, ?)", self.table);
        tracing::debug!(user = %record.user_id, roles = ?record.roles, "insert record");
        bounded(
            "insert",
            self.timeout,
            sqlx::query(&sql)
                .bind(record.user_id.as_str())
                .bind(record.roles.as_deref())
                .execute(&self.pool),
        )
        .await?;
        Ok(())
    }

    async fn update_roles(&self, user: &UserId, roles: &str) -> Result<bool, SyncError> {
        let sql = format!("UPDATE \"{}\" SET Ranks = ? WHERE UserID = ?", self.table);
        tracing::debug!(user = %user, roles = %roles, "update record");
        let result = bounded(
            "update_roles",
            self.timeout,
            sqlx::query(&sql)
                .bind(roles)
                .bind(user.as_str())
                .execute(&self.pool),
        )
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn ping(&self) -> Result<(), SyncError> {
        bounded(
            "ping",
            self.timeout,
            sqlx::query("SELECT 1").execute(&self.pool),
        )
        .await?;
        Ok(())
    }
}

/// Run a backend call under `after`, mapping failure and expiry to
/// [`SyncError::Query`] and [`SyncError::Timeout`].
pub(crate) async fn bounded<T, F>(
    operation: &'static str,
    after: Duration,
    call: F,
) -> Result<T, SyncError>
where
    F: Future<Output = Result<T, sqlx::Error>>,
{
    match tokio::time::timeout(after, call).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(source)) => Err(query_err(operation, source)),
        Err(_) => Err(SyncError::Timeout { operation, after }),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn store_in(dir: &TempDir) -> SqliteRecordStore {
        let config = DatabaseConfig {
            url: format!("sqlite://{}", dir.path().join("ranks.db").display()),
            table: "RanksTable".to_string(),
            max_connections: 2,
            query_timeout_ms: 5_000,
        };
        let store = SqliteRecordStore::connect(&config).await.expect("connect");
        store.ensure_schema().await.expect("schema");
        store
    }

    #[tokio::test]
    async fn connect_creates_database_file() {
        let dir = TempDir::new().unwrap();
        let _store = store_in(&dir).await;
        assert!(dir.path().join("ranks.db").exists());
    }

    #[tokio::test]
    async fn open_existing_creates_nothing() {
        let dir = TempDir::new().unwrap();
        let config = DatabaseConfig {
            url: format!("sqlite://{}", dir.path().join("ranks.db").display()),
            table: "RanksTable".to_string(),
            max_connections: 1,
            query_timeout_ms: 5_000,
        };
        assert!(SqliteRecordStore::open_existing(&config)
            .await
            .unwrap()
            .is_none());
        assert!(!dir.path().join("ranks.db").exists());

        let created = SqliteRecordStore::connect(&config).await.unwrap();
        created.close().await;
        let store = SqliteRecordStore::open_existing(&config)
            .await
            .unwrap()
            .expect("database exists");
        assert!(!store.relation_exists().await.unwrap());
        store.ensure_schema().await.unwrap();
        assert!(store.relation_exists().await.unwrap());
    }

    #[tokio::test]
    async fn ensure_schema_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir).await;
        store.ensure_schema().await.expect("second call");
        store.ensure_schema().await.expect("third call");
    }

    #[tokio::test]
    async fn fetch_absent_is_none() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir).await;
        let record = store.fetch_by_user(&UserId::from("nobody")).await.unwrap();
        assert!(record.is_none());
    }

    #[tokio::test]
    async fn insert_then_fetch_returns_exact_text() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir).await;
        let user = UserId::from("76561198000000001");
        store
            .insert(&PersistedRecord::new(user.clone(), "admin,vip"))
            .await
            .unwrap();

        let record = store.fetch_by_user(&user).await.unwrap().expect("record");
        assert_eq!(record.user_id, user);
        assert_eq!(record.roles.as_deref(), Some("admin,vip"));
    }

    #[tokio::test]
    async fn null_ranks_round_trip_as_none() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir).await;
        let user = UserId::from("u-null");
        store
            .insert(&PersistedRecord {
                user_id: user.clone(),
                roles: None,
            })
            .await
            .unwrap();

        let record = store.fetch_by_user(&user).await.unwrap().expect("record");
        assert_eq!(record.roles, None);
    }

    #[tokio::test]
    async fn update_overwrites_and_reports_match() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir).await;
        let user = UserId::from("u1");
        store
            .insert(&PersistedRecord::new(user.clone(), "vip"))
            .await
            .unwrap();

        assert!(store.update_roles(&user, "admin,vip").await.unwrap());
        let record = store.fetch_by_user(&user).await.unwrap().expect("record");
        assert_eq!(record.roles.as_deref(), Some("admin,vip"));
    }

    #[tokio::test]
    async fn update_without_record_is_a_noop() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir).await;
        let user = UserId::from("ghost");
        assert!(!store.update_roles(&user, "vip").await.unwrap());
        assert!(store.fetch_by_user(&user).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn user_ids_are_compared_as_text() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir).await;
        store
            .insert(&PersistedRecord::new(UserId::from("007"), "vip"))
            .await
            .unwrap();
        assert!(store
            .fetch_by_user(&UserId::from("7"))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn incompatible_relation_is_a_schema_error() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir).await;
        sqlx::query("CREATE TABLE legacy (id INTEGER)")
            .execute(store.pool())
            .await
            .unwrap();
        let legacy =
            SqliteRecordStore::from_pool(store.pool().clone(), "legacy", Duration::from_secs(5))
                .unwrap();

        let err = legacy.ensure_schema().await.unwrap_err();
        assert!(matches!(err, SyncError::Schema { .. }), "got: {err}");
    }

    #[tokio::test]
    async fn closed_pool_surfaces_query_error() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir).await;
        store.close().await;
        let err = store.fetch_by_user(&UserId::from("u1")).await.unwrap_err();
        assert!(err.is_query_failure(), "got: {err}");
    }

    #[tokio::test]
    async fn from_pool_rejects_unsafe_table() {
        let pool = SqlitePoolOptions::new()
            .connect_lazy("sqlite::memory:")
            .expect("lazy pool");
        let err = SqliteRecordStore::from_pool(pool, "x\"; DROP", Duration::from_secs(1))
            .unwrap_err();
        assert!(matches!(err, SyncError::InvalidTable(_)));
    }

    #[tokio::test]
    async fn bounded_maps_expiry_to_timeout() {
        let err = bounded("slow", Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<(), sqlx::Error>(())
        })
        .await
        .unwrap_err();
        assert!(matches!(err, SyncError::Timeout { operation: "slow", .. }));
    }
}
