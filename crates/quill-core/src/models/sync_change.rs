//! Changes exchanged with devices and the outcomes reported back

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::util::{normalize_text_option, truncate_to_micros};

use super::entity::{Entity, EntityPayload, EntityType};

/// What a change does to its entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncAction {
    Created,
    Updated,
    Deleted,
}

impl SyncAction {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Deleted => "deleted",
        }
    }
}

impl fmt::Display for SyncAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncAction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "created" => Ok(Self::Created),
            "updated" => Ok(Self::Updated),
            "deleted" => Ok(Self::Deleted),
            other => Err(Error::InvalidInput(format!("Unknown sync action: {other}"))),
        }
    }
}

/// A mutation intent submitted by a device, or replayed to one.
///
/// `timestamp` is the device's logical clock and the only ordering and
/// conflict signal. It is kept at microsecond precision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "RawSyncChange")]
pub struct SyncChange {
    pub entity_type: EntityType,
    pub entity_id: String,
    pub action: SyncAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<EntityPayload>,
    pub timestamp: DateTime<Utc>,
    /// Origin device. Empty on the wire means "the pushing device".
    pub device_id: String,
    /// Client-generated idempotency key
    #[serde(skip_serializing_if = "Option::is_none")]
    pub change_id: Option<String>,
}

impl SyncChange {
    pub fn new(
        entity_type: EntityType,
        entity_id: impl Into<String>,
        action: SyncAction,
        timestamp: DateTime<Utc>,
        device_id: impl Into<String>,
    ) -> Self {
        Self {
            entity_type,
            entity_id: entity_id.into(),
            action,
            data: None,
            timestamp: truncate_to_micros(timestamp),
            device_id: device_id.into(),
            change_id: None,
        }
    }

    #[must_use]
    pub fn with_data(mut self, data: EntityPayload) -> Self {
        self.data = Some(data);
        self
    }

    #[must_use]
    pub fn with_change_id(mut self, change_id: impl Into<String>) -> Self {
        self.change_id = Some(change_id.into());
        self
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSyncChange {
    entity_type: EntityType,
    entity_id: String,
    action: SyncAction,
    #[serde(default)]
    data: Option<serde_json::Value>,
    timestamp: DateTime<Utc>,
    #[serde(default)]
    device_id: String,
    #[serde(default)]
    change_id: Option<String>,
}

impl TryFrom<RawSyncChange> for SyncChange {
    type Error = Error;

    fn try_from(raw: RawSyncChange) -> Result<Self> {
        let entity_id = raw.entity_id.trim().to_string();
        if entity_id.is_empty() {
            return Err(Error::InvalidInput("entityId must not be empty".to_string()));
        }

        // Deletes carry no snapshot; older clients send `{}` for them.
        let data = match (raw.action, raw.data) {
            (SyncAction::Deleted, _) | (_, None | Some(serde_json::Value::Null)) => None,
            (_, Some(value)) => Some(EntityPayload::from_json(raw.entity_type, value)?),
        };

        Ok(Self {
            entity_type: raw.entity_type,
            entity_id,
            action: raw.action,
            data,
            timestamp: truncate_to_micros(raw.timestamp),
            device_id: raw.device_id.trim().to_string(),
            change_id: normalize_text_option(raw.change_id),
        })
    }
}

/// How a conflict was settled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictResolution {
    /// The stored entity was kept; the change was not applied
    ServerWins,
    /// The change overwrote the stored entity
    ClientWins,
    /// Reserved for per-field merging; never produced
    Merged,
}

/// Conflict report returned to the pushing device. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncConflict {
    pub entity_type: EntityType,
    pub entity_id: String,
    /// The data the device submitted
    pub local_version: Option<EntityPayload>,
    /// The entity as stored after resolution
    pub server_version: Option<Entity>,
    pub resolution: ConflictResolution,
}

/// A change that could not be processed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedChange {
    pub entity_type: EntityType,
    pub entity_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub change_id: Option<String>,
    pub reason: String,
    /// Whether the device should resubmit the change later
    pub retryable: bool,
}

/// Result of processing one submitted change
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ChangeOutcome {
    Applied(SyncChange),
    Conflicted(SyncConflict),
    Failed(FailedChange),
}

impl ChangeOutcome {
    pub(crate) fn failed(change: &SyncChange, error: &Error) -> Self {
        Self::Failed(FailedChange {
            entity_type: change.entity_type,
            entity_id: change.entity_id.clone(),
            change_id: change.change_id.clone(),
            reason: error.to_string(),
            retryable: error.is_retryable(),
        })
    }

    pub const fn is_applied(&self) -> bool {
        matches!(self, Self::Applied(_))
    }
}
