//! Shared shape of the synchronizable entities

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

use super::group::{Group, GroupData};
use super::note::{Note, NoteData};

/// The kinds of entity the sync engine reconciles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    /// A note
    Note,
    /// A group of notes
    Group,
}

impl EntityType {
    /// Stable storage/wire name
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Note => "note",
            Self::Group => "group",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "note" => Ok(Self::Note),
            "group" => Ok(Self::Group),
            other => Err(Error::InvalidInput(format!("Unknown entity type: {other}"))),
        }
    }
}

/// Versioning metadata carried by every synchronizable entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncMeta {
    /// Starts at 1, incremented by exactly one on every accepted mutation
    pub version: i64,
    /// Logical timestamp of the change that last won resolution
    pub modified: DateTime<Utc>,
    /// Device that produced the current value
    pub device_id: String,
    /// Timestamp copied from the accepted change
    pub last_synced_at: DateTime<Utc>,
    /// Logical timestamp of the change that created the entity
    pub created: DateTime<Utc>,
}

impl SyncMeta {
    /// Metadata for a freshly created entity
    pub fn initial(timestamp: DateTime<Utc>, device_id: impl Into<String>) -> Self {
        Self {
            version: 1,
            modified: timestamp,
            device_id: device_id.into(),
            last_synced_at: timestamp,
            created: timestamp,
        }
    }

    /// Metadata after one more accepted mutation
    #[must_use]
    pub fn next(&self, timestamp: DateTime<Utc>, device_id: impl Into<String>) -> Self {
        Self {
            version: self.version + 1,
            modified: timestamp,
            device_id: device_id.into(),
            last_synced_at: timestamp,
            created: self.created,
        }
    }
}

/// Typed `data` payload of a change, keyed by entity type
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum EntityPayload {
    /// Note fields
    Note(NoteData),
    /// Group fields
    Group(GroupData),
}

impl EntityPayload {
    /// Decode a JSON payload according to the entity type it belongs to
    pub fn from_json(entity_type: EntityType, value: serde_json::Value) -> Result<Self> {
        Ok(match entity_type {
            EntityType::Note => Self::Note(serde_json::from_value(value)?),
            EntityType::Group => Self::Group(serde_json::from_value(value)?),
        })
    }

    /// Decode a stored JSON payload
    pub fn from_json_str(entity_type: EntityType, raw: &str) -> Result<Self> {
        Self::from_json(entity_type, serde_json::from_str(raw)?)
    }

    /// Encode for storage
    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub const fn entity_type(&self) -> EntityType {
        match self {
            Self::Note(_) => EntityType::Note,
            Self::Group(_) => EntityType::Group,
        }
    }
}

/// Current state of a note or group
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Entity {
    /// A note
    Note(Note),
    /// A group
    Group(Group),
}

impl Entity {
    /// Build a new entity from a change payload.
    ///
    /// A missing payload creates the entity with default fields where the kind allows it.
    pub fn create(
        entity_type: EntityType,
        id: &str,
        owner: &str,
        payload: Option<&EntityPayload>,
        meta: SyncMeta,
    ) -> Result<Self> {
        match (entity_type, payload) {
            (EntityType::Note, None) => Ok(Self::Note(Note::from_data(
                id,
                owner,
                &NoteData::default(),
                meta,
            ))),
            (EntityType::Note, Some(EntityPayload::Note(data))) => {
                Ok(Self::Note(Note::from_data(id, owner, data, meta)))
            }
            (EntityType::Group, None) => Group::from_data(id, owner, &GroupData::default(), meta)
                .map(Self::Group),
            (EntityType::Group, Some(EntityPayload::Group(data))) => {
                Group::from_data(id, owner, data, meta).map(Self::Group)
            }
            (expected, Some(payload)) => Err(payload_mismatch(expected, payload)),
        }
    }

    /// Copy of this entity with the payload applied on top and new metadata
    pub fn patched(&self, payload: Option<&EntityPayload>, meta: SyncMeta) -> Result<Self> {
        let mut next = self.clone();
        match (&mut next, payload) {
            (Self::Note(note), Some(EntityPayload::Note(data))) => note.apply(data),
            (Self::Group(group), Some(EntityPayload::Group(data))) => group.apply(data),
            (_, None) => {}
            (current, Some(payload)) => {
                return Err(payload_mismatch(current.entity_type(), payload));
            }
        }
        *next.meta_mut() = meta;
        Ok(next)
    }

    pub const fn entity_type(&self) -> EntityType {
        match self {
            Self::Note(_) => EntityType::Note,
            Self::Group(_) => EntityType::Group,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Self::Note(note) => &note.id,
            Self::Group(group) => &group.id,
        }
    }

    /// Account that owns the entity
    pub fn owner(&self) -> &str {
        match self {
            Self::Note(note) => &note.creator,
            Self::Group(group) => &group.user_id,
        }
    }

    pub const fn meta(&self) -> &SyncMeta {
        match self {
            Self::Note(note) => &note.meta,
            Self::Group(group) => &group.meta,
        }
    }

    fn meta_mut(&mut self) -> &mut SyncMeta {
        match self {
            Self::Note(note) => &mut note.meta,
            Self::Group(group) => &mut group.meta,
        }
    }
}

fn payload_mismatch(expected: EntityType, payload: &EntityPayload) -> Error {
    Error::InvalidInput(format!(
        "Payload for {} does not match entity type {expected}",
        payload.entity_type()
    ))
}
