//! Push / pull / status session protocol

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::db::{LibSqlChangeLog, LibSqlEntityStore, SharedDatabase};
use crate::error::{Error, Result};
use crate::models::{FailedChange, SyncChange, SyncConflict};
use crate::store::{ChangeLog, EntityStore, LogStatus};
use crate::util::epoch;

use super::applier::{ChangeApplier, DEFAULT_MAX_WRITE_ATTEMPTS};
use super::notifier::ChangeNotifier;
use super::reader::ChangeReader;
use super::resolver::{ConflictResolver, DeletePolicy, DEFAULT_DELETE_POLICY};

/// Tunables for the sync engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineOptions {
    pub delete_policy: DeletePolicy,
    pub max_write_attempts: u32,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            delete_policy: DEFAULT_DELETE_POLICY,
            max_write_attempts: DEFAULT_MAX_WRITE_ATTEMPTS,
        }
    }
}

/// Response of a push: the batch outcome plus what the device is missing
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PushResult {
    /// Number of changes accepted without a conflict
    pub applied: usize,
    pub conflicts: Vec<SyncConflict>,
    pub failed: Vec<FailedChange>,
    pub server_changes: Vec<SyncChange>,
}

/// Stateless sync session handler. Devices carry their own cursor.
#[derive(Clone)]
pub struct SyncEngine {
    applier: ChangeApplier,
    reader: ChangeReader,
    log: Arc<dyn ChangeLog>,
}

impl SyncEngine {
    pub fn new(
        entities: Arc<dyn EntityStore>,
        log: Arc<dyn ChangeLog>,
        notifier: Arc<dyn ChangeNotifier>,
        options: EngineOptions,
    ) -> Self {
        let applier = ChangeApplier::new(
            entities,
            log.clone(),
            notifier,
            ConflictResolver::new(options.delete_policy),
        )
        .with_max_write_attempts(options.max_write_attempts);

        Self {
            applier,
            reader: ChangeReader::new(log.clone()),
            log,
        }
    }

    /// Engine over the libSQL entity store and change log sharing one database
    pub fn with_database(
        db: SharedDatabase,
        notifier: Arc<dyn ChangeNotifier>,
        options: EngineOptions,
    ) -> Self {
        Self::new(
            Arc::new(LibSqlEntityStore::new(db.clone())),
            Arc::new(LibSqlChangeLog::new(db)),
            notifier,
            options,
        )
    }

    /// Apply a device's batch, then return the changes other devices made
    /// after `last_sync` (epoch when the device never synced).
    pub async fn push(
        &self,
        user_id: &str,
        device_id: &str,
        changes: Vec<SyncChange>,
        last_sync: Option<DateTime<Utc>>,
    ) -> Result<PushResult> {
        let device_id = require_device(device_id)?;
        let submitted = changes.len();

        let outcome = self.applier.apply_batch(user_id, device_id, changes).await;
        let server_changes = self
            .reader
            .changes_since(user_id, last_sync.unwrap_or_else(epoch), Some(device_id))
            .await?;

        let result = PushResult {
            applied: outcome.applied_count(),
            conflicts: outcome.conflicts().cloned().collect(),
            failed: outcome.failures().cloned().collect(),
            server_changes,
        };
        tracing::info!(
            device = device_id,
            submitted,
            applied = result.applied,
            conflicts = result.conflicts.len(),
            failed = result.failed.len(),
            server_changes = result.server_changes.len(),
            "Processed push"
        );
        Ok(result)
    }

    /// Changes other devices made after `since`
    pub async fn pull(
        &self,
        user_id: &str,
        device_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<SyncChange>> {
        let device_id = require_device(device_id)?;
        let changes = self
            .reader
            .changes_since(user_id, since.unwrap_or_else(epoch), Some(device_id))
            .await?;
        tracing::debug!(device = device_id, changes = changes.len(), "Processed pull");
        Ok(changes)
    }

    /// Change log counters, restricted to one origin device when given
    pub async fn status(&self, user_id: &str, device_id: Option<&str>) -> Result<LogStatus> {
        let device_id = device_id.map(str::trim).filter(|id| !id.is_empty());
        self.log.status(user_id, device_id).await
    }
}

fn require_device(device_id: &str) -> Result<&str> {
    let device_id = device_id.trim();
    if device_id.is_empty() {
        return Err(Error::InvalidInput("deviceId is required".to_string()));
    }
    Ok(device_id)
}
