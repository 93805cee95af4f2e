use crate::cache::KvStore;
use crate::config::DatabaseConfig;
use crate::error::CacheError;
use crate::model::{LoadRecord, LoadStatus};
use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info, instrument};

/// Storage operations needed by the loads service
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LoadStore: Send + Sync {
    /// Insert a new record
    async fn insert(&self, record: &LoadRecord) -> Result<()>;

    /// Fetch one record by id
    async fn get(&self, id: &str) -> Result<Option<LoadRecord>>;

    /// Overwrite an existing record
    async fn save(&self, record: &LoadRecord) -> Result<()>;

    /// Delete a record; returns whether it existed
    async fn delete(&self, id: &str) -> Result<bool>;

    /// Unarchived records whose status is in `statuses`
    async fn fetch_archive_candidates(&self, statuses: &[String]) -> Result<Vec<LoadRecord>>;

    /// Records already marked archived
    async fn fetch_archived(&self) -> Result<Vec<LoadRecord>>;

    /// Connectivity check for readiness probes
    async fn ping(&self) -> Result<()>;
}

/// Process-local store
#[derive(Debug, Default)]
pub struct MemoryLoadStore {
    records: RwLock<HashMap<String, LoadRecord>>,
}

impl MemoryLoadStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: impl IntoIterator<Item = LoadRecord>) -> Self {
        let store = Self::new();
        {
            let mut map = store.records.write();
            for record in records {
                map.insert(record.id.clone(), record);
            }
        }
        store
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

fn status_in(status: &LoadStatus, statuses: &[String]) -> bool {
    statuses.iter().any(|s| s.eq_ignore_ascii_case(status.as_str()))
}

#[async_trait]
impl LoadStore for MemoryLoadStore {
    async fn insert(&self, record: &LoadRecord) -> Result<()> {
        let mut records = self.records.write();
        if records.contains_key(&record.id) {
            anyhow::bail!("load {} already exists", record.id);
        }
        records.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<LoadRecord>> {
        Ok(self.records.read().get(id).cloned())
    }

    async fn save(&self, record: &LoadRecord) -> Result<()> {
        let mut records = self.records.write();
        match records.get_mut(&record.id) {
            Some(existing) => {
                *existing = record.clone();
                Ok(())
            }
            None => anyhow::bail!("load {} not found", record.id),
        }
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        Ok(self.records.write().remove(id).is_some())
    }

    async fn fetch_archive_candidates(&self, statuses: &[String]) -> Result<Vec<LoadRecord>> {
        Ok(self
            .records
            .read()
            .values()
            .filter(|r| !r.is_archived && status_in(&r.status, statuses))
            .cloned()
            .collect())
    }

    async fn fetch_archived(&self) -> Result<Vec<LoadRecord>> {
        Ok(self
            .records
            .read()
            .values()
            .filter(|r| r.is_archived)
            .cloned()
            .collect())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

/// PostgreSQL-backed store keeping each load as a JSONB document
pub struct PgLoadStore {
    pool: PgPool,
}

static SHARED_PG_STORE: OnceCell<Arc<PgLoadStore>> = OnceCell::const_new();

/// Process-wide Postgres store.
///
/// The first call connects; later calls return the same handle without
/// reconnecting, whatever config they pass.
pub async fn shared_pg_store(config: &DatabaseConfig) -> Result<Arc<PgLoadStore>> {
    SHARED_PG_STORE
        .get_or_try_init(|| async { PgLoadStore::new(config).await.map(Arc::new) })
        .await
        .cloned()
}

impl PgLoadStore {
    /// Create a new store with its own connection pool
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.connect_timeout())
            .idle_timeout(Some(config.idle_timeout()))
            .connect(&config.url)
            .await
            .context("Failed to connect to PostgreSQL")?;

        info!("Connected to PostgreSQL database");

        Ok(Self { pool })
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");

        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run migrations")?;

        info!("Database migrations completed");
        Ok(())
    }

    /// Get the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Byte store sharing this store's pool
    pub fn kv_store(&self) -> PgKvStore {
        PgKvStore::new(self.pool.clone())
    }
}

#[async_trait]
impl LoadStore for PgLoadStore {
    #[instrument(skip(self, record), fields(load_id = %record.id))]
    async fn insert(&self, record: &LoadRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO loads (id, created_by, status, is_archived, archived_at, doc, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, NOW())
            "#,
        )
        .bind(&record.id)
        .bind(&record.created_by)
        .bind(record.status.as_str().to_lowercase())
        .bind(record.is_archived)
        .bind(record.archived_at)
        .bind(Json(record))
        .execute(&self.pool)
        .await
        .context("Failed to insert load")?;

        debug!("Load inserted");
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<LoadRecord>> {
        let row: Option<(Json<LoadRecord>,)> = sqlx::query_as("SELECT doc FROM loads WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to query load")?;

        Ok(row.map(|(doc,)| doc.0))
    }

    #[instrument(skip(self, record), fields(load_id = %record.id))]
    async fn save(&self, record: &LoadRecord) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE loads
            SET status = $2, is_archived = $3, archived_at = $4, doc = $5, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(&record.id)
        .bind(record.status.as_str().to_lowercase())
        .bind(record.is_archived)
        .bind(record.archived_at)
        .bind(Json(record))
        .execute(&self.pool)
        .await
        .context("Failed to update load")?;

        if result.rows_affected() == 0 {
            anyhow::bail!("load {} not found", record.id);
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM loads WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .context("Failed to delete load")?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self))]
    async fn fetch_archive_candidates(&self, statuses: &[String]) -> Result<Vec<LoadRecord>> {
        let statuses: Vec<String> = statuses.iter().map(|s| s.to_lowercase()).collect();

        let rows: Vec<(Json<LoadRecord>,)> = sqlx::query_as(
            r#"
            SELECT doc FROM loads
            WHERE is_archived = FALSE AND status = ANY($1)
            "#,
        )
        .bind(statuses)
        .fetch_all(&self.pool)
        .await
        .context("Failed to query archive candidates")?;

        Ok(rows.into_iter().map(|(doc,)| doc.0).collect())
    }

    #[instrument(skip(self))]
    async fn fetch_archived(&self) -> Result<Vec<LoadRecord>> {
        let rows: Vec<(Json<LoadRecord>,)> = sqlx::query_as("SELECT doc FROM loads WHERE is_archived = TRUE")
            .fetch_all(&self.pool)
            .await
            .context("Failed to query archived loads")?;

        Ok(rows.into_iter().map(|(doc,)| doc.0).collect())
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .context("Database ping failed")?;
        Ok(())
    }
}

/// PostgreSQL-backed `KvStore`, one row per key
#[derive(Clone)]
pub struct PgKvStore {
    pool: PgPool,
}

impl PgKvStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn kv_backend_error(e: sqlx::Error) -> CacheError {
    CacheError::Backend(e.to_string())
}

#[async_trait]
impl KvStore for PgKvStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let row: Option<(Vec<u8>,)> = sqlx::query_as("SELECT value FROM kv_entries WHERE key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(kv_backend_error)?;

        Ok(row.map(|(value,)| value))
    }

    #[instrument(skip(self, value), fields(bytes = value.len()))]
    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), CacheError> {
        sqlx::query(
            r#"
            INSERT INTO kv_entries (key, value, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, updated_at = NOW()
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await
        .map_err(kv_backend_error)?;

        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), CacheError> {
        sqlx::query("DELETE FROM kv_entries WHERE key = $1")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(kv_backend_error)?;

        Ok(())
    }
}
