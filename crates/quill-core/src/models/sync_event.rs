//! Change log record

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::util::truncate_to_micros;

use super::entity::{EntityPayload, EntityType};
use super::sync_change::{ConflictResolution, SyncAction, SyncChange};

/// Classification a change received when it was first processed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventOutcome {
    Applied,
    ClientWins,
    ServerWins,
}

impl EventOutcome {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Applied => "applied",
            Self::ClientWins => "client_wins",
            Self::ServerWins => "server_wins",
        }
    }

    /// The conflict resolution this outcome reports, if it was a conflict
    pub const fn resolution(self) -> Option<ConflictResolution> {
        match self {
            Self::Applied => None,
            Self::ClientWins => Some(ConflictResolution::ClientWins),
            Self::ServerWins => Some(ConflictResolution::ServerWins),
        }
    }
}

impl fmt::Display for EventOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventOutcome {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "applied" => Ok(Self::Applied),
            "client_wins" => Ok(Self::ClientWins),
            "server_wins" => Ok(Self::ServerWins),
            other => Err(Error::InvalidInput(format!("Unknown event outcome: {other}"))),
        }
    }
}

/// Immutable record of one processed mutation intent.
///
/// Events are appended once and never updated; rejected (`server_wins`)
/// changes are recorded too.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncEvent {
    pub id: Uuid,
    pub user_id: String,
    pub device_id: String,
    pub entity_type: EntityType,
    pub entity_id: String,
    pub action: SyncAction,
    pub data: Option<EntityPayload>,
    /// Device logical clock of the change
    pub timestamp: DateTime<Utc>,
    /// Reserved for multi-hop relay; always true when written
    pub synced: bool,
    /// Server receipt time
    pub created: DateTime<Utc>,
    pub change_id: Option<String>,
    pub outcome: EventOutcome,
}

impl SyncEvent {
    /// Build the log record for a processed change
    pub fn record(user_id: &str, change: &SyncChange, outcome: EventOutcome) -> Self {
        Self {
            id: Uuid::now_v7(),
            user_id: user_id.to_string(),
            device_id: change.device_id.clone(),
            entity_type: change.entity_type,
            entity_id: change.entity_id.clone(),
            action: change.action,
            data: change.data.clone(),
            timestamp: change.timestamp,
            synced: true,
            created: truncate_to_micros(Utc::now()),
            change_id: change.change_id.clone(),
            outcome,
        }
    }

    /// Project the event back into the change shape devices consume
    pub fn to_change(&self) -> SyncChange {
        SyncChange {
            entity_type: self.entity_type,
            entity_id: self.entity_id.clone(),
            action: self.action,
            data: self.data.clone(),
            timestamp: self.timestamp,
            device_id: self.device_id.clone(),
            change_id: self.change_id.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NoteData;
    use pretty_assertions::assert_eq;

    #[test]
    fn record_then_project_preserves_change() {
        let change = SyncChange::new(
            EntityType::Note,
            "n1",
            SyncAction::Updated,
            "2024-02-02T08:30:00Z".parse().unwrap(),
            "tablet",
        )
        .with_data(EntityPayload::Note(NoteData {
            body: Some("draft".to_string()),
            ..NoteData::default()
        }))
        .with_change_id("c-9");

        let event = SyncEvent::record("u1", &change, EventOutcome::ServerWins);
        assert!(event.synced);
        assert_eq!(event.user_id, "u1");
        assert_eq!(event.to_change(), change);
    }

    #[test]
    fn outcome_maps_to_resolution() {
        assert_eq!(EventOutcome::Applied.resolution(), None);
        assert_eq!(
            EventOutcome::ServerWins.resolution(),
            Some(ConflictResolution::ServerWins)
        );
        assert_eq!(
            "client_wins".parse::<EventOutcome>().unwrap(),
            EventOutcome::ClientWins
        );
    }
}
