//! libSQL-backed entity store

use async_trait::async_trait;
use libsql::{params, Connection, Row};

use crate::error::{Error, Result};
use crate::models::{Entity, EntityType, Group, Note, SyncMeta};
use crate::store::EntityStore;
use crate::util::to_micros;

use super::connection::SharedDatabase;
use super::values::{flag, optional_text, text_or_null, timestamp};

const NOTE_COLUMNS: &str = "id, creator, body, html, pinned, archived, grouped, \
     version, modified, device_id, last_synced_at, created";

const GROUP_COLUMNS: &str = "id, user_id, name, version, modified, device_id, last_synced_at, created";

/// Notes and groups stored in the `notes` / `note_groups` tables
#[derive(Clone)]
pub struct LibSqlEntityStore {
    db: SharedDatabase,
}

impl LibSqlEntityStore {
    pub const fn new(db: SharedDatabase) -> Self {
        Self { db }
    }

    fn parse_meta(row: &Row, first: i32) -> Result<SyncMeta> {
        Ok(SyncMeta {
            version: row.get::<i64>(first)?,
            modified: timestamp(row, first + 1)?,
            device_id: row.get::<String>(first + 2)?,
            last_synced_at: timestamp(row, first + 3)?,
            created: timestamp(row, first + 4)?,
        })
    }

    fn parse_note(row: &Row) -> Result<Note> {
        Ok(Note {
            id: row.get::<String>(0)?,
            creator: row.get::<String>(1)?,
            body: row.get::<String>(2)?,
            html: optional_text(row, 3)?,
            pinned: flag(row, 4)?,
            archived: flag(row, 5)?,
            grouped: optional_text(row, 6)?,
            meta: Self::parse_meta(row, 7)?,
        })
    }

    fn parse_group(row: &Row) -> Result<Group> {
        Ok(Group {
            id: row.get::<String>(0)?,
            user_id: row.get::<String>(1)?,
            name: row.get::<String>(2)?,
            meta: Self::parse_meta(row, 3)?,
        })
    }

    async fn insert_note(conn: &Connection, note: &Note) -> Result<u64> {
        let sql = format!(
            "INSERT INTO notes ({NOTE_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
             ON CONFLICT(id) DO NOTHING"
        );
        Ok(conn
            .execute(
                &sql,
                params![
                    note.id.as_str(),
                    note.creator.as_str(),
                    note.body.as_str(),
                    text_or_null(note.html.as_deref()),
                    i64::from(note.pinned),
                    i64::from(note.archived),
                    text_or_null(note.grouped.as_deref()),
                    note.meta.version,
                    to_micros(note.meta.modified),
                    note.meta.device_id.as_str(),
                    to_micros(note.meta.last_synced_at),
                    to_micros(note.meta.created),
                ],
            )
            .await?)
    }

    async fn insert_group(conn: &Connection, group: &Group) -> Result<u64> {
        let sql = format!(
            "INSERT INTO note_groups ({GROUP_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(id) DO NOTHING"
        );
        Ok(conn
            .execute(
                &sql,
                params![
                    group.id.as_str(),
                    group.user_id.as_str(),
                    group.name.as_str(),
                    group.meta.version,
                    to_micros(group.meta.modified),
                    group.meta.device_id.as_str(),
                    to_micros(group.meta.last_synced_at),
                    to_micros(group.meta.created),
                ],
            )
            .await?)
    }

    async fn update_note(conn: &Connection, note: &Note, expected_version: i64) -> Result<u64> {
        Ok(conn
            .execute(
                "UPDATE notes
                 SET creator = ?1, body = ?2, html = ?3, pinned = ?4, archived = ?5,
                     grouped = ?6, version = ?7, modified = ?8, device_id = ?9,
                     last_synced_at = ?10, created = ?11
                 WHERE id = ?12 AND version = ?13",
                params![
                    note.creator.as_str(),
                    note.body.as_str(),
                    text_or_null(note.html.as_deref()),
                    i64::from(note.pinned),
                    i64::from(note.archived),
                    text_or_null(note.grouped.as_deref()),
                    note.meta.version,
                    to_micros(note.meta.modified),
                    note.meta.device_id.as_str(),
                    to_micros(note.meta.last_synced_at),
                    to_micros(note.meta.created),
                    note.id.as_str(),
                    expected_version,
                ],
            )
            .await?)
    }

    async fn update_group(conn: &Connection, group: &Group, expected_version: i64) -> Result<u64> {
        Ok(conn
            .execute(
                "UPDATE note_groups
                 SET user_id = ?1, name = ?2, version = ?3, modified = ?4, device_id = ?5,
                     last_synced_at = ?6, created = ?7
                 WHERE id = ?8 AND version = ?9",
                params![
                    group.user_id.as_str(),
                    group.name.as_str(),
                    group.meta.version,
                    to_micros(group.meta.modified),
                    group.meta.device_id.as_str(),
                    to_micros(group.meta.last_synced_at),
                    to_micros(group.meta.created),
                    group.id.as_str(),
                    expected_version,
                ],
            )
            .await?)
    }
}

const fn table(entity_type: EntityType) -> &'static str {
    match entity_type {
        EntityType::Note => "notes",
        EntityType::Group => "note_groups",
    }
}

fn stale(id: &str, expected: i64) -> Error {
    Error::StaleVersion {
        entity_id: id.to_string(),
        expected,
    }
}

#[async_trait]
impl EntityStore for LibSqlEntityStore {
    async fn get(&self, entity_type: EntityType, id: &str) -> Result<Option<Entity>> {
        let db = self.db.lock().await;
        let columns = match entity_type {
            EntityType::Note => NOTE_COLUMNS,
            EntityType::Group => GROUP_COLUMNS,
        };
        let sql = format!("SELECT {columns} FROM {} WHERE id = ?1", table(entity_type));
        let mut rows = db.connection().query(&sql, params![id]).await?;

        let Some(row) = rows.next().await? else {
            return Ok(None);
        };
        let entity = match entity_type {
            EntityType::Note => Entity::Note(Self::parse_note(&row)?),
            EntityType::Group => Entity::Group(Self::parse_group(&row)?),
        };
        Ok(Some(entity))
    }

    async fn insert(&self, entity: &Entity) -> Result<()> {
        let db = self.db.lock().await;
        let inserted = match entity {
            Entity::Note(note) => Self::insert_note(db.connection(), note).await?,
            Entity::Group(group) => Self::insert_group(db.connection(), group).await?,
        };
        if inserted == 0 {
            return Err(stale(entity.id(), 0));
        }
        Ok(())
    }

    async fn update(&self, entity: &Entity, expected_version: i64) -> Result<()> {
        let db = self.db.lock().await;
        let updated = match entity {
            Entity::Note(note) => Self::update_note(db.connection(), note, expected_version).await?,
            Entity::Group(group) => {
                Self::update_group(db.connection(), group, expected_version).await?
            }
        };
        if updated == 0 {
            return Err(stale(entity.id(), expected_version));
        }
        Ok(())
    }

    async fn delete(
        &self,
        entity_type: EntityType,
        id: &str,
        expected_version: i64,
    ) -> Result<()> {
        let db = self.db.lock().await;
        let sql = format!(
            "DELETE FROM {} WHERE id = ?1 AND version = ?2",
            table(entity_type)
        );
        let deleted = db
            .connection()
            .execute(&sql, params![id, expected_version])
            .await?;
        if deleted == 0 {
            return Err(stale(id, expected_version));
        }
        Ok(())
    }
}
