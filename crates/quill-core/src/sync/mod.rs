//! Multi-device synchronization engine
//!
//! Devices push batches of [`SyncChange`](crate::models::SyncChange)s and
//! pull what other devices changed since their last cursor. Concurrent
//! edits are settled by last-writer-wins on the change timestamp.

mod applier;
mod engine;
mod notifier;
mod reader;
mod resolver;

pub use applier::{BatchOutcome, ChangeApplier, DEFAULT_MAX_WRITE_ATTEMPTS};
pub use engine::{EngineOptions, PushResult, SyncEngine};
pub use notifier::{ChangeNotifier, NoopNotifier};
pub use reader::ChangeReader;
pub use resolver::{ConflictResolver, Decision, DeletePolicy, Write, DEFAULT_DELETE_POLICY};
