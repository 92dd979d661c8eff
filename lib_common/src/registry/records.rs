//! # Record Store
//!
//! Local metadata about subscribers, keyed by normalized email. Authoritative
//! for creation time only; status fields are repaired from the topic.

use std::sync::LazyLock;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use thiserror::Error;
use tokio_postgres::Row;

use super::model::{SubscriberEmail, SubscriberRecord, SubscriptionStatus, TopicRef};
use crate::connections::db_postgres::Database;

#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn count(&self) -> anyhow::Result<usize>;

    async fn get(&self, email: &SubscriberEmail) -> anyhow::Result<Option<SubscriberRecord>>;

    /// Inserts a new record. An existing record for the same email is kept as is.
    async fn put(&self, record: &SubscriberRecord) -> anyhow::Result<()>;

    async fn update_status(
        &self,
        email: &SubscriberEmail,
        status: SubscriptionStatus,
        external_ref: &TopicRef,
    ) -> anyhow::Result<()>;

    /// Deleting a missing record is not an error.
    async fn delete(&self, email: &SubscriberEmail) -> anyhow::Result<()>;

    /// Every record. A row that cannot be read fails the whole scan.
    async fn scan_all(&self) -> anyhow::Result<Vec<SubscriberRecord>>;
}

static TABLE_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,62}$").expect("table name pattern is a valid regex")
});

#[derive(Debug, Error)]
#[error("table name '{0}' is not a plain SQL identifier")]
pub struct TableNameError(pub String);

/// Record store backed by a single Postgres table.
///
/// ```sql
/// email TEXT PRIMARY KEY, status TEXT NOT NULL,
/// external_ref TEXT NULL, created_at TIMESTAMPTZ NOT NULL
/// ```
pub struct PgRecordStore {
    db: Database,
    table: String,
}

impl PgRecordStore {
    /// The table name is interpolated into SQL, so it must be a bare identifier.
    pub fn new(db: Database, table: &str) -> Result<Self, TableNameError> {
        if !TABLE_NAME_RE.is_match(table) {
            return Err(TableNameError(table.to_string()));
        }
        Ok(Self {
            db,
            table: table.to_string(),
        })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Creates the backing table when it does not exist yet.
    pub async fn ensure_schema(&self) -> anyhow::Result<()> {
        let client = self.db.pool.get().await.context("checking out a connection")?;
        let ddl = format!(
            "CREATE TABLE IF NOT EXISTS {} (\
                email TEXT PRIMARY KEY, \
                status TEXT NOT NULL, \
                external_ref TEXT NULL, \
                created_at TIMESTAMPTZ NOT NULL)",
            self.table
        );
        client
            .batch_execute(&ddl)
            .await
            .with_context(|| format!("creating table '{}'", self.table))?;
        Ok(())
    }

    async fn client(&self) -> anyhow::Result<deadpool_postgres::Object> {
        self.db
            .pool
            .get()
            .await
            .with_context(|| format!("checking out a connection for table '{}'", self.table))
    }
}

fn record_from_row(row: &Row) -> anyhow::Result<SubscriberRecord> {
    record_from_columns(
        row.try_get("email")?,
        row.try_get("status")?,
        row.try_get("external_ref")?,
        row.try_get("created_at")?,
    )
}

fn record_from_columns(
    email: String,
    status: String,
    external_ref: Option<String>,
    created_at: DateTime<Utc>,
) -> anyhow::Result<SubscriberRecord> {
    let parsed_email = SubscriberEmail::parse(&email)?;
    let status = status
        .parse::<SubscriptionStatus>()
        .map_err(anyhow::Error::msg)
        .with_context(|| format!("stored record for '{}'", email))?;
    Ok(SubscriberRecord {
        email: parsed_email,
        status,
        external_ref: TopicRef::from_provider(external_ref.as_deref()),
        created_at,
    })
}

#[async_trait]
impl RecordStore for PgRecordStore {
    async fn count(&self) -> anyhow::Result<usize> {
        let client = self.client().await?;
        let row = client
            .query_one(format!("SELECT COUNT(*) FROM {}", self.table).as_str(), &[])
            .await
            .with_context(|| format!("counting records in '{}'", self.table))?;
        let count: i64 = row.try_get(0)?;
        Ok(usize::try_from(count)?)
    }

    async fn get(&self, email: &SubscriberEmail) -> anyhow::Result<Option<SubscriberRecord>> {
        let client = self.client().await?;
        let sql = format!(
            "SELECT email, status, external_ref, created_at FROM {} WHERE email = $1",
            self.table
        );
        let row = client
            .query_opt(sql.as_str(), &[&email.as_str()])
            .await
            .with_context(|| format!("reading record for {}", email))?;
        row.as_ref().map(record_from_row).transpose()
    }

    async fn put(&self, record: &SubscriberRecord) -> anyhow::Result<()> {
        let client = self.client().await?;
        let sql = format!(
            "INSERT INTO {} (email, status, external_ref, created_at) VALUES ($1, $2, $3, $4) \
             ON CONFLICT (email) DO NOTHING",
            self.table
        );
        client
            .execute(
                sql.as_str(),
                &[
                    &record.email.as_str(),
                    &record.status.as_str(),
                    &record.external_ref.to_provider(),
                    &record.created_at,
                ],
            )
            .await
            .with_context(|| format!("inserting record for {}", record.email))?;
        Ok(())
    }

    async fn update_status(
        &self,
        email: &SubscriberEmail,
        status: SubscriptionStatus,
        external_ref: &TopicRef,
    ) -> anyhow::Result<()> {
        let client = self.client().await?;
        let sql = format!(
            "UPDATE {} SET status = $2, external_ref = $3 WHERE email = $1",
            self.table
        );
        client
            .execute(sql.as_str(), &[&email.as_str(), &status.as_str(), &external_ref.to_provider()])
            .await
            .with_context(|| format!("updating status of {}", email))?;
        Ok(())
    }

    async fn delete(&self, email: &SubscriberEmail) -> anyhow::Result<()> {
        let client = self.client().await?;
        let sql = format!("DELETE FROM {} WHERE email = $1", self.table);
        client
            .execute(sql.as_str(), &[&email.as_str()])
            .await
            .with_context(|| format!("deleting record for {}", email))?;
        Ok(())
    }

    async fn scan_all(&self) -> anyhow::Result<Vec<SubscriberRecord>> {
        let client = self.client().await?;
        let sql = format!(
            "SELECT email, status, external_ref, created_at FROM {}",
            self.table
        );
        let rows = client
            .query(sql.as_str(), &[])
            .await
            .with_context(|| format!("scanning table '{}'", self.table))?;
        // An unreadable row fails the scan; it still counts against capacity.
        rows.iter()
            .map(record_from_row)
            .collect::<anyhow::Result<Vec<_>>>()
            .with_context(|| format!("reading rows of table '{}'", self.table))
    }
}
