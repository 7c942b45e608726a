//! Group model

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

use super::entity::SyncMeta;

/// A named collection of notes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub id: String,
    /// Owning account
    pub user_id: String,
    pub name: String,
    #[serde(flatten)]
    pub meta: SyncMeta,
}

/// Group fields carried by a change
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GroupData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Group {
    /// Create a group from a change payload; groups cannot exist without a name
    pub fn from_data(id: &str, user_id: &str, data: &GroupData, meta: SyncMeta) -> Result<Self> {
        let name = data
            .name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .ok_or_else(|| Error::InvalidInput(format!("Group {id} requires a name")))?;

        Ok(Self {
            id: id.to_string(),
            user_id: user_id.to_string(),
            name: name.to_string(),
            meta,
        })
    }

    pub fn apply(&mut self, data: &GroupData) {
        if let Some(name) = data.name.as_deref().map(str::trim) {
            if !name.is_empty() {
                self.name = name.to_string();
            }
        }
    }
}
