//! libSQL-backed append-only change log

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{params, Row};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::{EntityPayload, EntityType, SyncEvent};
use crate::store::{ChangeLog, LogStatus};
use crate::util::{from_micros, to_micros};

use super::connection::SharedDatabase;
use super::values::{flag, optional_integer, optional_text, text_or_null, timestamp};

const EVENT_COLUMNS: &str = "id, user_id, device_id, entity_type, entity_id, action, data, \
     timestamp, synced, created, change_id, outcome";

/// Change log stored in the `sync_events` table
#[derive(Clone)]
pub struct LibSqlChangeLog {
    db: SharedDatabase,
}

impl LibSqlChangeLog {
    pub const fn new(db: SharedDatabase) -> Self {
        Self { db }
    }

    fn parse_event(row: &Row) -> Result<SyncEvent> {
        let id: String = row.get(0)?;
        let entity_type: EntityType = row.get::<String>(3)?.parse()?;
        let data = optional_text(row, 6)?
            .map(|raw| EntityPayload::from_json_str(entity_type, &raw))
            .transpose()?;

        Ok(SyncEvent {
            id: Uuid::parse_str(&id)
                .map_err(|_| Error::Database(format!("Invalid event id: {id}")))?,
            user_id: row.get(1)?,
            device_id: row.get(2)?,
            entity_type,
            entity_id: row.get(4)?,
            action: row.get::<String>(5)?.parse()?,
            data,
            timestamp: timestamp(row, 7)?,
            synced: flag(row, 8)?,
            created: timestamp(row, 9)?,
            change_id: optional_text(row, 10)?,
            outcome: row.get::<String>(11)?.parse()?,
        })
    }
}

#[async_trait]
impl ChangeLog for LibSqlChangeLog {
    async fn append(&self, event: &SyncEvent) -> Result<()> {
        let data = event
            .data
            .as_ref()
            .map(EntityPayload::to_json_string)
            .transpose()?;

        let db = self.db.lock().await;
        let sql = format!(
            "INSERT INTO sync_events ({EVENT_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"
        );
        db.connection()
            .execute(
                &sql,
                params![
                    event.id.to_string(),
                    event.user_id.as_str(),
                    event.device_id.as_str(),
                    event.entity_type.as_str(),
                    event.entity_id.as_str(),
                    event.action.as_str(),
                    text_or_null(data.as_deref()),
                    to_micros(event.timestamp),
                    i64::from(event.synced),
                    to_micros(event.created),
                    text_or_null(event.change_id.as_deref()),
                    event.outcome.as_str(),
                ],
            )
            .await?;
        Ok(())
    }

    async fn find_by_change_id(
        &self,
        user_id: &str,
        change_id: &str,
    ) -> Result<Option<SyncEvent>> {
        let db = self.db.lock().await;
        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM sync_events WHERE user_id = ?1 AND change_id = ?2"
        );
        let mut rows = db
            .connection()
            .query(&sql, params![user_id, change_id])
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(Self::parse_event(&row)?)),
            None => Ok(None),
        }
    }

    async fn events_since(&self, user_id: &str, since: DateTime<Utc>) -> Result<Vec<SyncEvent>> {
        let db = self.db.lock().await;
        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM sync_events
             WHERE user_id = ?1 AND timestamp > ?2
             ORDER BY timestamp ASC, rowid ASC"
        );
        let mut rows = db
            .connection()
            .query(&sql, params![user_id, to_micros(since)])
            .await?;

        let mut events = Vec::new();
        while let Some(row) = rows.next().await? {
            events.push(Self::parse_event(&row)?);
        }
        Ok(events)
    }

    async fn status(&self, user_id: &str, device_id: Option<&str>) -> Result<LogStatus> {
        let db = self.db.lock().await;
        let mut rows = db
            .connection()
            .query(
                "SELECT MAX(timestamp),
                        COUNT(*),
                        COALESCE(SUM(CASE WHEN synced = 0 THEN 1 ELSE 0 END), 0)
                 FROM sync_events
                 WHERE user_id = ?1 AND (?2 IS NULL OR device_id = ?2)",
                params![user_id, text_or_null(device_id)],
            )
            .await?;

        let Some(row) = rows.next().await? else {
            return Ok(LogStatus::default());
        };

        Ok(LogStatus {
            last_sync: optional_integer(&row, 0)?.map(from_micros).transpose()?,
            total_events: u64::try_from(row.get::<i64>(1)?).unwrap_or(0),
            pending: u64::try_from(row.get::<i64>(2)?).unwrap_or(0),
        })
    }
}
