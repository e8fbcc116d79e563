//! Relational sink backed by Postgres. Rows land in a month-named table,
//! `log_YYYYMM`, created (with its two indices) the moment it is first
//! needed and again at each month boundary.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Local, TimeZone};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tokio::sync::mpsc;
use tracing::{info, warn};

use syslogd_core::sinks::RelationalSink;

/// Effectively unbounded under normal load, per the design this follows.
const QUEUE_CAPACITY: usize = 1_000_000;

struct Row {
    fingerprint: String,
    raw: Vec<u8>,
}

pub struct PostgresSink {
    tx: mpsc::Sender<Row>,
}

impl PostgresSink {
    pub async fn connect(database_url: &str) -> Result<Arc<PostgresSink>, sqlx::Error> {
        let pool = PgPoolOptions::new().max_connections(10).connect(database_url).await?;
        ensure_table(&pool, &current_table_name()).await?;

        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        let writer_pool = pool.clone();
        tokio::spawn(async move { writer_task(writer_pool, rx).await });
        let rollover_pool = pool.clone();
        tokio::spawn(async move { rollover_task(rollover_pool).await });

        Ok(Arc::new(PostgresSink { tx }))
    }
}

#[async_trait]
impl RelationalSink for PostgresSink {
    async fn add_unhandled(&self, fingerprint: &str, raw: &[u8]) {
        if self.tx.send(Row { fingerprint: fingerprint.to_owned(), raw: raw.to_vec() }).await.is_err() {
            warn!("relational sink writer task is gone, dropping row");
        }
    }
}

fn current_table_name() -> String {
    format!("log_{}", Local::now().format("%Y%m"))
}

async fn ensure_table(pool: &PgPool, table: &str) -> Result<(), sqlx::Error> {
    sqlx::query(&format!(
        "CREATE TABLE IF NOT EXISTS {table} (epoch BIGINT NOT NULL, match CHAR(32) NOT NULL, msg TEXT NOT NULL)"
    ))
    .execute(pool)
    .await?;
    sqlx::query(&format!("CREATE INDEX IF NOT EXISTS {table}_epoch_idx ON {table} (epoch)")).execute(pool).await?;
    sqlx::query(&format!("CREATE INDEX IF NOT EXISTS {table}_match_idx ON {table} (match)")).execute(pool).await?;
    Ok(())
}

async fn writer_task(pool: PgPool, mut rx: mpsc::Receiver<Row>) {
    while let Some(row) = rx.recv().await {
        let table = current_table_name();
        let epoch = chrono::Utc::now().timestamp();
        let msg = String::from_utf8_lossy(&row.raw).into_owned();
        let query = format!("INSERT INTO {table} (epoch, match, msg) VALUES ($1, $2, $3)");
        if let Err(e) = sqlx::query(&query).bind(epoch).bind(&row.fingerprint).bind(msg).execute(&pool).await {
            warn!(error = %e, table = %table, "relational sink insert failed");
        }
    }
}

/// Sleeps until the next month boundary, then (re)creates that month's
/// table so the writer task never races an un-created table.
async fn rollover_task(pool: PgPool) {
    loop {
        let now = Local::now();
        let boundary = next_month_boundary(now);
        let sleep_for = (boundary - now).to_std().unwrap_or(std::time::Duration::from_secs(3600));
        tokio::time::sleep(sleep_for).await;
        let table = current_table_name();
        match ensure_table(&pool, &table).await {
            Ok(()) => info!(table = %table, "relational sink rolled to new month's table"),
            Err(e) => warn!(error = %e, table = %table, "failed to create new month's table"),
        }
    }
}

fn next_month_boundary(now: DateTime<Local>) -> DateTime<Local> {
    let (year, month) = if now.month() == 12 { (now.year() + 1, 1) } else { (now.year(), now.month() + 1) };
    Local.with_ymd_and_hms(year, month, 1, 0, 0, 0).single().unwrap_or(now)
}
