//! Fan-out hook for accepted changes

use crate::models::SyncChange;

/// Receives every change that was written to an entity.
///
/// Notification is best-effort: implementations must not block and cannot
/// fail the push that produced the change.
pub trait ChangeNotifier: Send + Sync {
    fn notify(&self, user_id: &str, change: &SyncChange);
}

/// Notifier that drops everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

impl ChangeNotifier for NoopNotifier {
    fn notify(&self, _user_id: &str, _change: &SyncChange) {}
}
