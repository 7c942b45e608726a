//! quill-core - Sync engine for Quill
//!
//! This crate contains the note and group models, the libSQL storage layer
//! and the conflict-resolving sync engine used by the Quill API server.

pub mod db;
pub mod error;
pub mod models;
pub mod store;
pub mod sync;
pub mod util;

pub use error::{Error, Result};
pub use models::{
    ChangeOutcome, Entity, EntityPayload, EntityType, SyncAction, SyncChange, SyncConflict,
};
pub use store::{ChangeLog, EntityStore, LogStatus};
pub use sync::{EngineOptions, PushResult, SyncEngine};
