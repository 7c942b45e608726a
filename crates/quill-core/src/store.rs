//! Storage seams consumed by the sync engine
//!
//! The engine never talks to a database directly. It receives handles to
//! these traits, so tests and alternative backends can be injected.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::Result;
use crate::models::{Entity, EntityType, SyncEvent};

/// Current-state store for notes and groups.
///
/// Writes are compare-and-swap on `version`: implementations return
/// [`crate::Error::StaleVersion`] when the row moved since it was read.
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Fetch an entity by id. Absence is not an error.
    async fn get(&self, entity_type: EntityType, id: &str) -> Result<Option<Entity>>;

    /// Insert a new entity; fails with `StaleVersion` if the id already exists.
    async fn insert(&self, entity: &Entity) -> Result<()>;

    /// Replace an entity whose stored version is still `expected_version`.
    async fn update(&self, entity: &Entity, expected_version: i64) -> Result<()>;

    /// Delete an entity whose stored version is still `expected_version`.
    async fn delete(&self, entity_type: EntityType, id: &str, expected_version: i64)
        -> Result<()>;
}

/// Aggregate view over an account's change log
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogStatus {
    /// Most recent event timestamp
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_sync: Option<DateTime<Utc>>,
    pub total_events: u64,
    /// Events not yet marked synced
    pub pending: u64,
}

/// Append-only change log
#[async_trait]
pub trait ChangeLog: Send + Sync {
    /// Append one event. Events are never updated afterwards.
    async fn append(&self, event: &SyncEvent) -> Result<()>;

    /// Look up the event recorded for a client idempotency key
    async fn find_by_change_id(&self, user_id: &str, change_id: &str)
        -> Result<Option<SyncEvent>>;

    /// Events of an account with `timestamp > since`, oldest first
    async fn events_since(&self, user_id: &str, since: DateTime<Utc>) -> Result<Vec<SyncEvent>>;

    /// Counters for an account, optionally restricted to one origin device
    async fn status(&self, user_id: &str, device_id: Option<&str>) -> Result<LogStatus>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_status_omits_last_sync() {
        let json = serde_json::to_value(LogStatus::default()).unwrap();
        assert!(json.get("lastSync").is_none());
        assert_eq!(json["totalEvents"], 0);

        let status = LogStatus {
            last_sync: Some("2024-01-02T00:00:00Z".parse().unwrap()),
            total_events: 1,
            pending: 0,
        };
        let json = serde_json::to_value(status).unwrap();
        assert_eq!(json["lastSync"], "2024-01-02T00:00:00Z");
    }
}
