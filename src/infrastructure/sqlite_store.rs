use async_trait::async_trait;
use serde_json::Value;
use sqlx::sqlite::{
    Sqlite, SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePool, SqlitePoolOptions,
};
use sqlx::{QueryBuilder, Row};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{AppError, AppResult};
use crate::infrastructure::document_store::{
    apply_write, CommitClock, Direction, Document, DocumentRef, DocumentSnapshot, DocumentStore,
    Filter, Query, Timestamp, WriteBatch,
};

/// SQLite implementation of the document store.
/// Documents are JSON text in a single table keyed by (collection, id).
pub struct SqliteDocumentStore {
    pool: SqlitePool,
    clock: Arc<CommitClock>,
}

// How long a batch waits for another connection's write lock before giving up
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

impl SqliteDocumentStore {
    pub async fn new_in_memory() -> AppResult<Self> {
        Self::connect("sqlite::memory:", 1).await
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> AppResult<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| {
                AppError::ConfigurationError(format!("Invalid database URL {}: {}", database_url, e))
            })?
            .create_if_missing(true)
            .busy_timeout(BUSY_TIMEOUT);

        // Every connection to an in-memory database is a separate database, so pin one.
        let in_memory = database_url.contains(":memory:");
        let options = if in_memory {
            options
        } else {
            options.journal_mode(SqliteJournalMode::Wal)
        };
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(max_connections.max(1))
        };

        let pool = pool_options.connect_with(options).await.map_err(|e| {
            AppError::StoreUnavailable(format!("Failed to connect to {}: {}", database_url, e))
        })?;

        let store = Self {
            pool,
            clock: Arc::new(CommitClock::new()),
        };
        store.initialize().await?;
        info!("Document store ready at {}", database_url);
        Ok(store)
    }

    /// Create the documents table and the secondary indexes the feed queries rely on
    pub async fn initialize(&self) -> AppResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                collection TEXT NOT NULL,
                id TEXT NOT NULL,
                data TEXT NOT NULL,
                update_time INTEGER NOT NULL,
                PRIMARY KEY (collection, id)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::StoreUnavailable(format!("Failed to create documents table: {}", e)))?;

        let indexes = [
            "CREATE INDEX IF NOT EXISTS idx_documents_author ON documents(collection, json_extract(data, '$.authorId'))",
            "CREATE INDEX IF NOT EXISTS idx_documents_original ON documents(collection, json_extract(data, '$.originalPostId'))",
            "CREATE INDEX IF NOT EXISTS idx_documents_created ON documents(collection, json_extract(data, '$.createdAt'))",
        ];
        for statement in indexes {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| AppError::StoreUnavailable(format!("Failed to create index: {}", e)))?;
        }

        Ok(())
    }

    pub async fn health_check(&self) -> AppResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::StoreUnavailable(format!("Health check failed: {}", e)))?;
        Ok(())
    }

    /// Get connection pool statistics
    pub fn pool_stats(&self) -> (u32, u32) {
        (self.pool.num_idle() as u32, self.pool.size())
    }
}

fn parse_document(target: &str, raw: &str) -> AppResult<Document> {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(AppError::MalformedDocument(format!("{} is not a JSON object", target))),
        Err(e) => Err(AppError::MalformedDocument(format!("{}: {}", target, e))),
    }
}

/// Field names are validated against the identifier pattern before they reach SQL.
fn json_path(field: &str) -> String {
    format!("json_extract(data, '$.{}')", field)
}

fn push_scalar(qb: &mut QueryBuilder<'_, Sqlite>, value: &Value) {
    match value {
        Value::String(s) => {
            qb.push_bind(s.clone());
        }
        Value::Bool(b) => {
            // json_extract yields 1/0 for JSON booleans
            qb.push_bind(i64::from(*b));
        }
        Value::Number(n) => match n.as_i64() {
            Some(i) => {
                qb.push_bind(i);
            }
            None => {
                qb.push_bind(n.as_f64().unwrap_or_default());
            }
        },
        _ => {
            qb.push("NULL");
        }
    }
}

fn build_select(query: &Query) -> QueryBuilder<'static, Sqlite> {
    let mut qb = QueryBuilder::<Sqlite>::new("SELECT id, data FROM documents WHERE collection = ");
    qb.push_bind(query.collection.clone());

    for filter in &query.filters {
        match filter {
            Filter::Eq { field, value } => {
                qb.push(format!(" AND {} = ", json_path(field)));
                push_scalar(&mut qb, value);
            }
            Filter::In { field, values } => {
                qb.push(format!(" AND {} IN (", json_path(field)));
                for (i, value) in values.iter().enumerate() {
                    if i > 0 {
                        qb.push(", ");
                    }
                    push_scalar(&mut qb, value);
                }
                qb.push(")");
            }
            Filter::IdIn(ids) => {
                qb.push(" AND id IN (");
                for (i, id) in ids.iter().enumerate() {
                    if i > 0 {
                        qb.push(", ");
                    }
                    qb.push_bind(id.clone());
                }
                qb.push(")");
            }
        }
    }

    match &query.order_by {
        Some(order) => {
            let path = json_path(&order.field);
            let direction = match order.direction {
                Direction::Asc => "ASC",
                Direction::Desc => "DESC",
            };
            qb.push(format!(
                " AND {path} IS NOT NULL ORDER BY {path} {direction}, id ASC"
            ));
        }
        None => {
            qb.push(" ORDER BY id ASC");
        }
    }

    if let Some(limit) = query.limit {
        qb.push(" LIMIT ");
        qb.push_bind(i64::from(limit));
    }

    qb
}

#[async_trait]
impl DocumentStore for SqliteDocumentStore {
    fn backend_name(&self) -> &'static str {
        "sqlite"
    }

    async fn get(&self, target: &DocumentRef) -> AppResult<Option<DocumentSnapshot>> {
        let row = sqlx::query("SELECT data FROM documents WHERE collection = ? AND id = ?")
            .bind(&target.collection)
            .bind(&target.id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::StoreUnavailable(format!("Failed to get {}: {}", target, e)))?;

        match row {
            Some(row) => {
                let raw: String = row.try_get("data")?;
                Ok(Some(DocumentSnapshot {
                    id: target.id.clone(),
                    data: parse_document(&target.path(), &raw)?,
                }))
            }
            None => Ok(None),
        }
    }

    async fn query(&self, query: &Query) -> AppResult<Vec<DocumentSnapshot>> {
        query.validate()?;

        let rows = build_select(query)
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                AppError::StoreUnavailable(format!("Failed to query {}: {}", query.collection, e))
            })?;

        rows.into_iter()
            .map(|row| {
                let id: String = row.try_get("id")?;
                let raw: String = row.try_get("data")?;
                let data = parse_document(&format!("{}/{}", query.collection, id), &raw)?;
                Ok(DocumentSnapshot { id, data })
            })
            .collect()
    }

    async fn commit(&self, batch: WriteBatch) -> AppResult<Timestamp> {
        batch.validate()?;
        let writes = batch.len();

        // Detached, so a dropped caller cannot return a connection with an open transaction
        let pool = self.pool.clone();
        let clock = self.clock.clone();
        let now = tokio::spawn(async move { commit_batch(pool, clock, batch).await })
            .await
            .map_err(|e| AppError::Internal(format!("Commit task failed: {}", e)))??;

        debug!("Committed batch of {} writes at {}", writes, now);
        Ok(now)
    }
}

/// One batch in one IMMEDIATE transaction. The write lock is taken before the first read,
/// so concurrent batches queue on the busy timeout instead of failing a lock upgrade.
async fn commit_batch(
    pool: SqlitePool,
    clock: Arc<CommitClock>,
    batch: WriteBatch,
) -> AppResult<Timestamp> {
    let mut conn = pool
        .acquire()
        .await
        .map_err(|e| AppError::StoreUnavailable(format!("Failed to acquire connection: {}", e)))?;

    sqlx::query("BEGIN IMMEDIATE")
        .execute(&mut *conn)
        .await
        .map_err(|e| AppError::StoreUnavailable(format!("Failed to begin transaction: {}", e)))?;

    // Stamped under the write lock, so commit times follow commit order
    let now = clock.next();

    let outcome = match apply_ops(&mut conn, &batch, now).await {
        Ok(()) => sqlx::query("COMMIT")
            .execute(&mut *conn)
            .await
            .map(|_| ())
            .map_err(|e| AppError::StoreUnavailable(format!("Failed to commit batch: {}", e))),
        Err(e) => Err(e),
    };

    if let Err(e) = outcome {
        if let Err(rollback) = sqlx::query("ROLLBACK").execute(&mut *conn).await {
            warn!("Rollback after failed batch did not run: {}", rollback);
        }
        return Err(e);
    }
    Ok(now)
}

async fn apply_ops(conn: &mut SqliteConnection, batch: &WriteBatch, now: Timestamp) -> AppResult<()> {
    for op in batch.ops() {
        let target = op.target();
        let current = sqlx::query("SELECT data FROM documents WHERE collection = ? AND id = ?")
            .bind(&target.collection)
            .bind(&target.id)
            .fetch_optional(&mut *conn)
            .await?
            .map(|row| -> AppResult<Document> {
                let raw: String = row.try_get("data")?;
                parse_document(&target.path(), &raw)
            })
            .transpose()?;
        let existed = current.is_some();

        match apply_write(current, op, now)? {
            Some(data) => {
                let raw = serde_json::to_string(&data)?;
                sqlx::query(
                    "INSERT INTO documents (collection, id, data, update_time) VALUES (?, ?, ?, ?) \
                     ON CONFLICT(collection, id) DO UPDATE SET data = excluded.data, update_time = excluded.update_time",
                )
                .bind(&target.collection)
                .bind(&target.id)
                .bind(raw)
                .bind(now)
                .execute(&mut *conn)
                .await?;
            }
            None if existed => {
                sqlx::query("DELETE FROM documents WHERE collection = ? AND id = ?")
                    .bind(&target.collection)
                    .bind(&target.id)
                    .execute(&mut *conn)
                    .await?;
            }
            None => {}
        }
    }
    Ok(())
}
