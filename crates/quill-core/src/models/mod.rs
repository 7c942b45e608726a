//! Data models for Quill

mod entity;
mod group;
mod note;
mod sync_change;
mod sync_event;

pub use entity::{Entity, EntityPayload, EntityType, SyncMeta};
pub use group::{Group, GroupData};
pub use note::{Note, NoteData};
pub use sync_change::{
    ChangeOutcome, ConflictResolution, FailedChange, SyncAction, SyncChange, SyncConflict,
};
pub use sync_event::{EventOutcome, SyncEvent};
