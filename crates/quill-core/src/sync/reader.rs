//! Change log reads for pulling devices

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::models::SyncChange;
use crate::store::ChangeLog;

#[derive(Clone)]
pub struct ChangeReader {
    log: Arc<dyn ChangeLog>,
}

impl ChangeReader {
    pub fn new(log: Arc<dyn ChangeLog>) -> Self {
        Self { log }
    }

    /// Changes of `user_id` strictly after `since`, oldest first, skipping
    /// those that originated on `exclude_device`.
    pub async fn changes_since(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
        exclude_device: Option<&str>,
    ) -> Result<Vec<SyncChange>> {
        let events = self.log.events_since(user_id, since).await?;
        Ok(events
            .iter()
            .filter(|event| event.timestamp > since)
            .filter(|event| exclude_device != Some(event.device_id.as_str()))
            .map(|event| event.to_change())
            .collect())
    }
}
