use std::path::Path;
use std::time::Duration;

use chrono::NaiveDateTime;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow,
    SqliteSynchronous,
};
use sqlx::Row;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

use certforge_core::{ActiveCertificate, CertificateRecord, Page};

use crate::errors::StoreError;
use crate::schema::{CREATE_STATEMENTS, DROP_STATEMENTS};

const SELECT_ACTIVE: &str = "SELECT client_id, certificate_id, issued_at, expires_at
    FROM certificates
    WHERE expires_at > ?1
    ORDER BY client_id, certificate_id, issued_at
    LIMIT ?2 OFFSET ?3";

const SELECT_ACTIVE_BY_CLIENT: &str =
    "SELECT client_id, certificate_id, issued_at, expires_at
    FROM certificates
    WHERE expires_at > ?1 AND client_id = ?2
    ORDER BY client_id, certificate_id, issued_at
    LIMIT ?3 OFFSET ?4";

const COUNT_ACTIVE: &str = "SELECT COUNT(*) FROM certificates WHERE expires_at > ?1";

const COUNT_ACTIVE_BY_CLIENT: &str =
    "SELECT COUNT(*) FROM certificates WHERE expires_at > ?1 AND client_id = ?2";

/// Retry/backoff/timeout policy for batch writes.
#[derive(Debug, Clone, Copy)]
pub struct WritePolicy {
    /// A batch write exceeding this is treated as a retryable failure.
    pub timeout: Duration,
    /// Attempts per batch before the failure escalates to the job.
    pub max_attempts: u32,
    /// Base backoff, scaled linearly per attempt.
    pub backoff: Duration,
}

impl Default for WritePolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_attempts: 3,
            backoff: Duration::from_millis(200),
        }
    }
}

/// Batch-transactional SQLite store for generated datasets.
///
/// The pool holds a single connection, so every write goes through one
/// writer no matter how many tasks hold a handle.
#[derive(Debug, Clone)]
pub struct StreamingStore {
    pool: SqlitePool,
    policy: WritePolicy,
}

impl StreamingStore {
    /// Open (creating if missing) an on-disk store.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .pragma("temp_store", "MEMORY");
        Self::connect(options).await
    }

    /// Open an existing on-disk store; fails if the file is absent.
    pub async fn open_existing(path: &Path) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(false)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .pragma("temp_store", "MEMORY");
        Self::connect(options).await
    }

    /// Open a private in-memory store. The single pooled connection keeps the
    /// database alive for the lifetime of the handle.
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::new()
            .in_memory(true)
            .journal_mode(SqliteJournalMode::Memory)
            .foreign_keys(true);
        Self::connect(options).await
    }

    async fn connect(options: SqliteConnectOptions) -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        Ok(Self {
            pool,
            policy: WritePolicy::default(),
        })
    }

    pub fn with_policy(mut self, policy: WritePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Drop any previous dataset and create the schema fresh. Called when a
    /// new generation job starts; the old dataset is destroyed by design.
    pub async fn reset_schema(&self) -> Result<(), StoreError> {
        for statement in DROP_STATEMENTS.iter().chain(CREATE_STATEMENTS) {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Create the schema if it does not exist yet, keeping existing data.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        for statement in CREATE_STATEMENTS {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Insert clients `1..=num_clients`, chunked into bounded transactions.
    pub async fn insert_clients(&self, num_clients: u64) -> Result<u64, StoreError> {
        const CHUNK: i64 = 1_000;
        let last = num_clients as i64;
        let mut next = 1i64;
        let mut inserted = 0u64;
        while next <= last {
            let end = (next + CHUNK - 1).min(last);
            let mut tx = self.pool.begin().await?;
            for id in next..=end {
                sqlx::query("INSERT OR REPLACE INTO clients (id) VALUES (?1)")
                    .bind(id)
                    .execute(&mut *tx)
                    .await?;
            }
            tx.commit().await?;
            inserted += (end - next + 1) as u64;
            next = end + 1;
        }
        debug!(clients = inserted, "clients inserted");
        Ok(inserted)
    }

    /// Write one batch of certificate records in a single transaction,
    /// retrying transient failures with backoff before escalating.
    pub async fn write_batch(&self, records: &[CertificateRecord]) -> Result<u64, StoreError> {
        if records.is_empty() {
            return Ok(0);
        }
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let outcome = match timeout(self.policy.timeout, self.write_batch_once(records)).await
            {
                Ok(outcome) => outcome,
                Err(_) => Err(StoreError::Timeout(self.policy.timeout)),
            };
            match outcome {
                Ok(written) => return Ok(written),
                Err(err) if err.is_retryable() && attempt < self.policy.max_attempts => {
                    let backoff = self.policy.backoff.saturating_mul(attempt);
                    warn!(
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %err,
                        "batch write failed, retrying"
                    );
                    sleep(backoff).await;
                }
                Err(err) => {
                    return Err(StoreError::RetriesExhausted {
                        attempts: attempt,
                        last: err.to_string(),
                    });
                }
            }
        }
    }

    async fn write_batch_once(&self, records: &[CertificateRecord]) -> Result<u64, StoreError> {
        let mut tx = self.pool.begin().await?;
        for record in records {
            sqlx::query(
                "INSERT INTO certificates (certificate_id, client_id, issued_at, expires_at)
                 VALUES (?1, ?2, ?3, ?4)",
            )
            .bind(record.certificate_id)
            .bind(record.client_id)
            .bind(record.issued_at)
            .bind(record.expires_at)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(records.len() as u64)
    }

    /// Page through certificates whose window is still open at `now`.
    /// Activity is recomputed per query, never stored, so results cannot go
    /// stale. Ordering is stable, so identical queries against an unchanged
    /// dataset return identical pages.
    pub async fn query_active(
        &self,
        client_id: Option<i64>,
        page: u64,
        page_size: u64,
        now: NaiveDateTime,
    ) -> Result<Page<ActiveCertificate>, StoreError> {
        let offset = page.saturating_sub(1).saturating_mul(page_size);

        let rows = match client_id {
            Some(client_id) => {
                sqlx::query(SELECT_ACTIVE_BY_CLIENT)
                    .bind(now)
                    .bind(client_id)
                    .bind(page_size as i64)
                    .bind(offset as i64)
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                sqlx::query(SELECT_ACTIVE)
                    .bind(now)
                    .bind(page_size as i64)
                    .bind(offset as i64)
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        let total = match client_id {
            Some(client_id) => {
                sqlx::query_scalar::<_, i64>(COUNT_ACTIVE_BY_CLIENT)
                    .bind(now)
                    .bind(client_id)
                    .fetch_one(&self.pool)
                    .await?
            }
            None => {
                sqlx::query_scalar::<_, i64>(COUNT_ACTIVE)
                    .bind(now)
                    .fetch_one(&self.pool)
                    .await?
            }
        };

        let items = rows
            .iter()
            .map(row_to_active)
            .collect::<Result<Vec<_>, sqlx::Error>>()?;

        Ok(Page {
            items,
            total_count: total.max(0) as u64,
            page,
            page_size,
        })
    }

    /// Total committed certificate records, whole batches only.
    pub async fn count_certificates(&self) -> Result<u64, StoreError> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM certificates")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }

    pub async fn count_clients(&self) -> Result<u64, StoreError> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM clients")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }

    /// Refresh planner statistics after a bulk load.
    pub async fn optimize(&self) -> Result<(), StoreError> {
        sqlx::query("PRAGMA optimize").execute(&self.pool).await?;
        Ok(())
    }
}

fn row_to_active(row: &SqliteRow) -> Result<ActiveCertificate, sqlx::Error> {
    Ok(ActiveCertificate {
        client_id: row.try_get("client_id")?,
        certificate_id: row.try_get("certificate_id")?,
        issued_at: row.try_get("issued_at")?,
        expires_at: row.try_get("expires_at")?,
    })
}
