//! Note model

use serde::{Deserialize, Serialize};

use super::entity::SyncMeta;

/// A note owned by one account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    /// Client-generated identifier
    pub id: String,
    /// Owning account
    pub creator: String,
    /// Plain text content
    pub body: String,
    /// Rendered HTML, if the client produced one
    pub html: Option<String>,
    pub pinned: bool,
    pub archived: bool,
    /// Group the note belongs to
    pub grouped: Option<String>,
    #[serde(flatten)]
    pub meta: SyncMeta,
}

/// Note fields carried by a change. Absent fields leave the stored value untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NoteData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pinned: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archived: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grouped: Option<String>,
}

impl Note {
    /// Create a note from a change payload
    pub fn from_data(id: &str, creator: &str, data: &NoteData, meta: SyncMeta) -> Self {
        Self {
            id: id.to_string(),
            creator: creator.to_string(),
            body: data.body.clone().unwrap_or_default(),
            html: data.html.clone(),
            pinned: data.pinned.unwrap_or(false),
            archived: data.archived.unwrap_or(false),
            grouped: data.grouped.clone(),
            meta,
        }
    }

    /// Overlay the fields present in `data`
    pub fn apply(&mut self, data: &NoteData) {
        if let Some(body) = &data.body {
            self.body.clone_from(body);
        }
        if let Some(html) = &data.html {
            self.html = Some(html.clone());
        }
        if let Some(pinned) = data.pinned {
            self.pinned = pinned;
        }
        if let Some(archived) = data.archived {
            self.archived = archived;
        }
        if let Some(grouped) = &data.grouped {
            self.grouped = Some(grouped.clone());
        }
    }
}
