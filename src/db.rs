use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{AnyPool, Executor, Row};
use std::borrow::Cow;

use crate::error::BridgeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbKind {
    Sqlite,
    Postgres,
}

pub fn db_kind_from_url(url: &str) -> DbKind {
    let lower = url.to_lowercase();
    if lower.starts_with("postgres://") || lower.starts_with("postgresql://") {
        DbKind::Postgres
    } else {
        DbKind::Sqlite
    }
}

pub fn rewrite_sql<'a>(sql: &'a str, kind: DbKind) -> Cow<'a, str> {
    match kind {
        DbKind::Sqlite => Cow::Borrowed(sql),
        DbKind::Postgres => {
            let mut out = String::with_capacity(sql.len() + 8);
            let mut idx = 1;
            for ch in sql.chars() {
                if ch == '?' {
                    out.push('$');
                    out.push_str(&idx.to_string());
                    idx += 1;
                } else {
                    out.push(ch);
                }
            }
            Cow::Owned(out)
        }
    }
}

/// One phone-number-identified identity. Credential material stays base64
/// encoded at rest; the session manager decodes it at login time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountRecord {
    pub id: i64,
    pub phone_number: String,
    pub name: Option<String>,
    pub whatsapp_password: Option<String>,
}

/// Inbound message row, keyed by network message id within an account. Rows
/// are created by the backend; the bridge only reads them for dedupe and
/// updates the receipt fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: i64,
    pub whatsapp_message_id: String,
    pub account_id: i64,
    pub received: bool,
    #[serde(skip)]
    pub receipt_timestamp: Option<DateTime<Utc>>,
}

/// A queued unit of outbound work. Eligible for dispatch while
/// `sent == false && pending == false` for the owning account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: i64,
    pub method: String,
    pub targets: String,
    pub args: String,
    #[serde(skip)]
    pub scheduled_time: Option<DateTime<Utc>>,
    pub sent: bool,
    pub pending: bool,
    pub runs: i64,
    pub received: bool,
    pub whatsapp_message_id: Option<String>,
    pub message_id: Option<i64>,
    pub account_id: i64,
}

fn i64_to_datetime(ts: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(ts, 0).single().unwrap_or_else(Utc::now)
}

fn datetime_to_i64(dt: DateTime<Utc>) -> i64 {
    dt.timestamp()
}

/// Schema bootstrap for dev and test runs. Production deployments manage
/// these tables through the backend's own migrations.
pub async fn init_db(pool: &AnyPool, kind: DbKind) -> Result<(), BridgeError> {
    let stmts = vec![
        r#"CREATE TABLE IF NOT EXISTS accounts (
            id INTEGER PRIMARY KEY,
            phone_number TEXT NOT NULL UNIQUE,
            name TEXT,
            whatsapp_password TEXT,
            status INTEGER
        )"#,
        r#"CREATE TABLE IF NOT EXISTS messages (
            id INTEGER PRIMARY KEY,
            whatsapp_message_id TEXT NOT NULL,
            account_id INTEGER NOT NULL,
            received INTEGER NOT NULL DEFAULT 0,
            receipt_timestamp INTEGER
        )"#,
        r#"CREATE INDEX IF NOT EXISTS idx_messages_network_id ON messages(whatsapp_message_id, account_id)"#,
        r#"CREATE TABLE IF NOT EXISTS jobs (
            id INTEGER PRIMARY KEY,
            method TEXT NOT NULL,
            targets TEXT NOT NULL,
            args TEXT NOT NULL,
            scheduled_time INTEGER,
            sent INTEGER NOT NULL DEFAULT 0,
            pending INTEGER NOT NULL DEFAULT 0,
            runs INTEGER NOT NULL DEFAULT 0,
            received INTEGER NOT NULL DEFAULT 0,
            whatsapp_message_id TEXT,
            message_id INTEGER,
            account_id INTEGER NOT NULL
        )"#,
        r#"CREATE INDEX IF NOT EXISTS idx_jobs_queue ON jobs(account_id, sent, pending)"#,
        r#"CREATE INDEX IF NOT EXISTS idx_jobs_network_id ON jobs(whatsapp_message_id, account_id)"#,
    ];

    for stmt in stmts {
        let sql = rewrite_sql(stmt, kind);
        sqlx::query(sql.as_ref()).execute(pool).await?;
    }

    Ok(())
}

pub async fn get_account(
    pool: &AnyPool,
    kind: DbKind,
    phone_number: &str,
) -> Result<Option<AccountRecord>, BridgeError> {
    let sql = rewrite_sql(
        "SELECT id, phone_number, name, whatsapp_password FROM accounts WHERE phone_number = ?",
        kind,
    );
    let row = sqlx::query(sql.as_ref())
        .bind(phone_number)
        .fetch_optional(pool)
        .await?;

    if let Some(row) = row {
        return Ok(Some(AccountRecord {
            id: row.try_get("id")?,
            phone_number: row.try_get("phone_number")?,
            name: row.try_get("name")?,
            whatsapp_password: row.try_get("whatsapp_password")?,
        }));
    }
    Ok(None)
}

/// Dedupe lookup: has this network message id already been recorded for the
/// account? The protocol layer may deliver the same event more than once.
pub async fn message_exists(
    pool: &AnyPool,
    kind: DbKind,
    whatsapp_message_id: &str,
    account_id: i64,
) -> Result<bool, BridgeError> {
    let sql = rewrite_sql(
        "SELECT 1 FROM messages WHERE whatsapp_message_id = ? AND account_id = ? LIMIT 1",
        kind,
    );
    let row = sqlx::query(sql.as_ref())
        .bind(whatsapp_message_id)
        .bind(account_id)
        .fetch_optional(pool)
        .await?;
    Ok(row.is_some())
}

fn message_from_row(row: &sqlx::any::AnyRow) -> Result<MessageRecord, BridgeError> {
    let receipt_timestamp: Option<i64> = row.try_get("receipt_timestamp")?;
    Ok(MessageRecord {
        id: row.try_get("id")?,
        whatsapp_message_id: row.try_get("whatsapp_message_id")?,
        account_id: row.try_get("account_id")?,
        received: row.try_get::<i64, _>("received")? != 0,
        receipt_timestamp: receipt_timestamp.map(i64_to_datetime),
    })
}

pub async fn get_message<'e, E>(
    exec: E,
    kind: DbKind,
    id: i64,
    account_id: i64,
) -> Result<Option<MessageRecord>, BridgeError>
where
    E: Executor<'e, Database = sqlx::Any>,
{
    let sql = rewrite_sql(
        r#"SELECT id, whatsapp_message_id, account_id, received, receipt_timestamp
           FROM messages WHERE id = ? AND account_id = ?"#,
        kind,
    );
    let row = sqlx::query(sql.as_ref())
        .bind(id)
        .bind(account_id)
        .fetch_optional(exec)
        .await?;
    row.as_ref().map(message_from_row).transpose()
}

pub async fn mark_message_received<'e, E>(
    exec: E,
    kind: DbKind,
    id: i64,
    receipt_timestamp: DateTime<Utc>,
) -> Result<(), BridgeError>
where
    E: Executor<'e, Database = sqlx::Any>,
{
    let sql = rewrite_sql(
        "UPDATE messages SET received = 1, receipt_timestamp = ? WHERE id = ?",
        kind,
    );
    sqlx::query(sql.as_ref())
        .bind(datetime_to_i64(receipt_timestamp))
        .bind(id)
        .execute(exec)
        .await?;
    Ok(())
}

fn job_from_row(row: &sqlx::any::AnyRow) -> Result<JobRecord, BridgeError> {
    let scheduled_time: Option<i64> = row.try_get("scheduled_time")?;
    Ok(JobRecord {
        id: row.try_get("id")?,
        method: row.try_get("method")?,
        targets: row.try_get("targets")?,
        args: row.try_get("args")?,
        scheduled_time: scheduled_time.map(i64_to_datetime),
        sent: row.try_get::<i64, _>("sent")? != 0,
        pending: row.try_get::<i64, _>("pending")? != 0,
        runs: row.try_get("runs")?,
        received: row.try_get::<i64, _>("received")? != 0,
        whatsapp_message_id: row.try_get("whatsapp_message_id")?,
        message_id: row.try_get("message_id")?,
        account_id: row.try_get("account_id")?,
    })
}

const JOB_COLUMNS: &str = "id, method, targets, args, scheduled_time, sent, pending, runs, received, whatsapp_message_id, message_id, account_id";

/// Jobs still eligible for dispatch, in primary-key order.
pub async fn fetch_unsent_jobs<'e, E>(
    exec: E,
    kind: DbKind,
    account_id: i64,
) -> Result<Vec<JobRecord>, BridgeError>
where
    E: Executor<'e, Database = sqlx::Any>,
{
    let query = format!(
        "SELECT {JOB_COLUMNS} FROM jobs WHERE sent = 0 AND pending = 0 AND account_id = ? ORDER BY id ASC"
    );
    let sql = rewrite_sql(&query, kind);
    let rows = sqlx::query(sql.as_ref())
        .bind(account_id)
        .fetch_all(exec)
        .await?;
    rows.iter().map(job_from_row).collect()
}

pub async fn mark_job_sent<'e, E>(
    exec: E,
    kind: DbKind,
    job_id: i64,
    whatsapp_message_id: &str,
) -> Result<(), BridgeError>
where
    E: Executor<'e, Database = sqlx::Any>,
{
    let sql = rewrite_sql(
        "UPDATE jobs SET sent = 1, runs = runs + 1, whatsapp_message_id = ? WHERE id = ?",
        kind,
    );
    sqlx::query(sql.as_ref())
        .bind(whatsapp_message_id)
        .bind(job_id)
        .execute(exec)
        .await?;
    Ok(())
}

/// Receipt correlation: the sent job carrying this network message id.
pub async fn find_sent_job<'e, E>(
    exec: E,
    kind: DbKind,
    whatsapp_message_id: &str,
    account_id: i64,
) -> Result<Option<JobRecord>, BridgeError>
where
    E: Executor<'e, Database = sqlx::Any>,
{
    let query = format!(
        "SELECT {JOB_COLUMNS} FROM jobs WHERE sent = 1 AND whatsapp_message_id = ? AND account_id = ?"
    );
    let sql = rewrite_sql(&query, kind);
    let row = sqlx::query(sql.as_ref())
        .bind(whatsapp_message_id)
        .bind(account_id)
        .fetch_optional(exec)
        .await?;
    row.as_ref().map(job_from_row).transpose()
}

pub async fn mark_job_received<'e, E>(exec: E, kind: DbKind, job_id: i64) -> Result<(), BridgeError>
where
    E: Executor<'e, Database = sqlx::Any>,
{
    let sql = rewrite_sql("UPDATE jobs SET received = 1 WHERE id = ?", kind);
    sqlx::query(sql.as_ref()).bind(job_id).execute(exec).await?;
    Ok(())
}

pub async fn count_unsent_jobs(
    pool: &AnyPool,
    kind: DbKind,
    account_id: i64,
) -> Result<i64, BridgeError> {
    let sql = rewrite_sql(
        "SELECT COUNT(1) FROM jobs WHERE sent = 0 AND pending = 0 AND account_id = ?",
        kind,
    );
    let count = sqlx::query_scalar::<_, i64>(sql.as_ref())
        .bind(account_id)
        .fetch_one(pool)
        .await?;
    Ok(count)
}
