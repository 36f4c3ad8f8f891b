//! Central zone store on SQLite.

use super::{Applied, CentralStore, apply_consensus};
use crate::error::{PoolManagerError, Result};
use crate::model::{Context, Record, Status, Zone, ZoneCriterion};
use async_trait::async_trait;
use chrono::DateTime;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{QueryBuilder, Row, Sqlite};
use std::str::FromStr;
use tracing::{debug, info, warn};

const ZONE_COLUMNS: &str = "id, name, serial, action, status, pool_id, updated_at";

pub struct SqlCentralStore {
    db: SqlitePool,
}

impl SqlCentralStore {
    /// Open the database at `url` and apply migrations
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let db = SqlitePoolOptions::new().connect_with(options).await?;
        let store = Self::from_pool(db).await?;
        info!("Opened central zone store at {}", url);
        Ok(store)
    }

    pub async fn from_pool(db: SqlitePool) -> Result<Self> {
        sqlx::migrate!().run(&db).await?;
        Ok(Self { db })
    }

    /// Wait for in-use connections to be returned, then close the pool
    pub async fn close(&self) {
        self.db.close().await;
        info!("Closed central zone store");
    }

    /// Insert a zone, or replace the row with the same id
    pub async fn create_zone(&self, context: &Context, zone: &Zone) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO zones (id, name, serial, action, status, pool_id, tenant_id, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (id) DO UPDATE SET
                name = excluded.name,
                serial = excluded.serial,
                action = excluded.action,
                status = excluded.status,
                pool_id = excluded.pool_id,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&zone.id)
        .bind(&zone.name)
        .bind(i64::from(zone.serial))
        .bind(zone.action.as_str())
        .bind(zone.status.as_str())
        .bind(&zone.pool_id)
        .bind(context.tenant.as_deref())
        .bind(zone.updated_at.timestamp_millis())
        .execute(&self.db)
        .await?;
        Ok(())
    }

    pub async fn add_record(&self, record: &Record) -> Result<()> {
        sqlx::query("INSERT INTO records (zone_id, name, type, data, ttl) VALUES (?, ?, ?, ?, ?)")
            .bind(&record.zone_id)
            .bind(&record.name)
            .bind(&record.rtype)
            .bind(&record.data)
            .bind(record.ttl.map(i64::from))
            .execute(&self.db)
            .await?;
        Ok(())
    }

    async fn fetch_zone(&self, zone_id: &str) -> Result<Option<Zone>> {
        let row = sqlx::query(&format!("SELECT {} FROM zones WHERE id = ?", ZONE_COLUMNS))
            .bind(zone_id)
            .fetch_optional(&self.db)
            .await?;
        row.as_ref().map(row_to_zone).transpose()
    }
}

fn row_to_zone(row: &SqliteRow) -> Result<Zone> {
    let action: String = row.try_get("action")?;
    let status: String = row.try_get("status")?;
    let serial: i64 = row.try_get("serial")?;
    let updated_at: i64 = row.try_get("updated_at")?;

    Ok(Zone {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        serial: serial as u32,
        action: action.parse().map_err(PoolManagerError::Central)?,
        status: status.parse().map_err(PoolManagerError::Central)?,
        pool_id: row.try_get("pool_id")?,
        updated_at: DateTime::from_timestamp_millis(updated_at).unwrap_or_default(),
    })
}

fn normalize_name(name: &str) -> String {
    let mut name = name.to_lowercase();
    if !name.ends_with('.') {
        name.push('.');
    }
    name
}

#[async_trait]
impl CentralStore for SqlCentralStore {
    async fn update_status(
        &self,
        _context: &Context,
        zone_id: &str,
        status: Status,
        serial: u32,
    ) -> Result<()> {
        let Some(mut zone) = self.fetch_zone(zone_id).await? else {
            warn!("Status {} reported for unknown zone {}", status, zone_id);
            return Err(PoolManagerError::ZoneNotFound(zone_id.to_string()));
        };

        let mut tx = self.db.begin().await?;
        match apply_consensus(&mut zone, status, serial) {
            Applied::Purge => {
                sqlx::query("DELETE FROM records WHERE zone_id = ?")
                    .bind(zone_id)
                    .execute(&mut *tx)
                    .await?;
                sqlx::query("DELETE FROM zones WHERE id = ?")
                    .bind(zone_id)
                    .execute(&mut *tx)
                    .await?;
                info!("Zone {} ({}) deleted after propagation", zone.name, zone_id);
            }
            Applied::Keep => {
                sqlx::query(
                    "UPDATE zones SET serial = ?, action = ?, status = ?, updated_at = ? WHERE id = ?",
                )
                .bind(i64::from(zone.serial))
                .bind(zone.action.as_str())
                .bind(zone.status.as_str())
                .bind(zone.updated_at.timestamp_millis())
                .bind(zone_id)
                .execute(&mut *tx)
                .await?;
                debug!("Zone {} is now {} (serial {})", zone.name, zone.status, zone.serial);
            }
        }
        tx.commit().await?;
        Ok(())
    }

    async fn find_zone(&self, context: &Context, criterion: &ZoneCriterion) -> Result<Zone> {
        let mut zones = self.find_zones(context, criterion).await?;
        match zones.len() {
            1 => Ok(zones.remove(0)),
            0 => Err(PoolManagerError::ZoneNotFound(
                criterion
                    .name
                    .clone()
                    .or_else(|| criterion.id.clone())
                    .unwrap_or_default(),
            )),
            n => Err(PoolManagerError::Central(format!(
                "expected one zone, found {}",
                n
            ))),
        }
    }

    async fn find_zones(&self, context: &Context, criterion: &ZoneCriterion) -> Result<Vec<Zone>> {
        let mut query: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("SELECT {} FROM zones WHERE 1 = 1", ZONE_COLUMNS));

        if let Some(id) = &criterion.id {
            query.push(" AND id = ").push_bind(id.clone());
        }
        if let Some(name) = &criterion.name {
            query.push(" AND name = ").push_bind(normalize_name(name));
        }
        if let Some(pool_id) = &criterion.pool_id {
            query.push(" AND pool_id = ").push_bind(pool_id.clone());
        }
        if !criterion.statuses.is_empty() {
            query.push(" AND status IN (");
            let mut statuses = query.separated(", ");
            for status in &criterion.statuses {
                statuses.push_bind(status.as_str());
            }
            statuses.push_unseparated(")");
        }
        if let Some(before) = criterion.updated_before {
            query.push(" AND updated_at < ").push_bind(before.timestamp_millis());
        }
        if let Some(after) = criterion.updated_after {
            query.push(" AND updated_at > ").push_bind(after.timestamp_millis());
        }
        if let (false, Some(tenant)) = (context.all_tenants, &context.tenant) {
            query.push(" AND tenant_id = ").push_bind(tenant.clone());
        }
        query.push(" ORDER BY updated_at ASC");
        if let Some(limit) = criterion.limit {
            query.push(" LIMIT ").push_bind(limit as i64);
        }

        let rows = query.build().fetch_all(&self.db).await?;
        rows.iter().map(row_to_zone).collect()
    }

    async fn find_records(&self, _context: &Context, zone_id: &str) -> Result<Vec<Record>> {
        let rows = sqlx::query("SELECT zone_id, name, type, data, ttl FROM records WHERE zone_id = ?")
            .bind(zone_id)
            .fetch_all(&self.db)
            .await?;

        rows.iter()
            .map(|row| -> Result<Record> {
                let ttl: Option<i64> = row.try_get("ttl")?;
                Ok(Record {
                    zone_id: row.try_get("zone_id")?,
                    name: row.try_get("name")?,
                    rtype: row.try_get("type")?,
                    data: row.try_get("data")?,
                    ttl: ttl.map(|t| t as u32),
                })
            })
            .collect()
    }
}
