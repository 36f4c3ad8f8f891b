//! Relational status store on SQLite.

use super::{StatusRecord, StatusStore};
use crate::error::{PoolManagerError, Result};
use crate::model::{Status, ZoneAction};
use crate::pool::Nameserver;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

pub struct SqlStatusStore {
    db: SqlitePool,
}

impl SqlStatusStore {
    /// Open the database at `url` and apply migrations
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let db = SqlitePoolOptions::new().connect_with(options).await?;
        let store = Self::from_pool(db).await?;
        info!("Opened SQL status store at {}", url);
        Ok(store)
    }

    /// Use an existing pool, applying migrations
    pub async fn from_pool(db: SqlitePool) -> Result<Self> {
        sqlx::migrate!().run(&db).await?;
        Ok(Self { db })
    }
}

fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> Result<StatusRecord> {
    let action: String = row.try_get("action")?;
    let status: String = row.try_get("status")?;
    let nameserver: String = row.try_get("nameserver")?;
    let serial: Option<i64> = row.try_get("serial")?;
    let updated_at: i64 = row.try_get("updated_at")?;

    Ok(StatusRecord {
        zone_id: row.try_get("zone_id")?,
        action: action.parse().map_err(PoolManagerError::StatusStore)?,
        nameserver: Nameserver::parse(&nameserver).ok_or_else(|| {
            PoolManagerError::StatusStore(format!("invalid nameserver in status row: {}", nameserver))
        })?,
        status: status.parse().map_err(PoolManagerError::StatusStore)?,
        serial: serial.map(|s| s as u32),
        updated_at: DateTime::from_timestamp_millis(updated_at).unwrap_or_default(),
    })
}

#[async_trait]
impl StatusStore for SqlStatusStore {
    async fn store(
        &self,
        zone_id: &str,
        action: ZoneAction,
        nameserver: &Nameserver,
        status: Status,
        serial: Option<u32>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO pool_manager_statuses (zone_id, action, nameserver, status, serial, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT (zone_id, action, nameserver) DO UPDATE SET
                status = excluded.status,
                serial = excluded.serial,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(zone_id)
        .bind(action.as_str())
        .bind(nameserver.key())
        .bind(status.as_str())
        .bind(serial.map(i64::from))
        .bind(Utc::now().timestamp_millis())
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn retrieve(&self, zone_id: &str, action: ZoneAction) -> Result<Vec<StatusRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT zone_id, action, nameserver, status, serial, updated_at
            FROM pool_manager_statuses
            WHERE zone_id = ? AND action = ?
            "#,
        )
        .bind(zone_id)
        .bind(action.as_str())
        .fetch_all(&self.db)
        .await?;

        rows.iter().map(row_to_record).collect()
    }

    async fn clear(&self, zone_id: &str, action: ZoneAction) -> Result<()> {
        sqlx::query("DELETE FROM pool_manager_statuses WHERE zone_id = ? AND action = ?")
            .bind(zone_id)
            .bind(action.as_str())
            .execute(&self.db)
            .await?;
        Ok(())
    }

    async fn reap_stale(&self, max_age: Duration) -> Result<usize> {
        let cutoff = Utc::now().timestamp_millis() - max_age.as_millis() as i64;
        let result = sqlx::query("DELETE FROM pool_manager_statuses WHERE updated_at < ?")
            .bind(cutoff)
            .execute(&self.db)
            .await?;
        let reaped = result.rows_affected() as usize;
        if reaped > 0 {
            debug!("Reaped {} stale status rows", reaped);
        }
        Ok(reaped)
    }

    async fn close(&self) {
        self.db.close().await;
        info!("Closed SQL status store");
    }

    fn name(&self) -> &'static str {
        "sql"
    }
}
