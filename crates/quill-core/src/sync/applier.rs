//! Applies pushed change batches to the entity store and change log

use std::sync::Arc;

use serde::Serialize;

use crate::error::{Error, Result};
use crate::models::{
    ChangeOutcome, ConflictResolution, Entity, EventOutcome, FailedChange, SyncChange,
    SyncConflict, SyncEvent, SyncMeta,
};
use crate::store::{ChangeLog, EntityStore};

use super::notifier::ChangeNotifier;
use super::resolver::{ConflictResolver, Decision, Write};

/// Read-decide-write attempts per change before giving up on a CAS race
pub const DEFAULT_MAX_WRITE_ATTEMPTS: u32 = 3;

/// Per-change outcomes of one batch, in submission order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchOutcome {
    pub outcomes: Vec<ChangeOutcome>,
}

impl BatchOutcome {
    pub fn applied(&self) -> impl Iterator<Item = &SyncChange> {
        self.outcomes.iter().filter_map(|outcome| match outcome {
            ChangeOutcome::Applied(change) => Some(change),
            _ => None,
        })
    }

    pub fn conflicts(&self) -> impl Iterator<Item = &SyncConflict> {
        self.outcomes.iter().filter_map(|outcome| match outcome {
            ChangeOutcome::Conflicted(conflict) => Some(conflict),
            _ => None,
        })
    }

    pub fn failures(&self) -> impl Iterator<Item = &FailedChange> {
        self.outcomes.iter().filter_map(|outcome| match outcome {
            ChangeOutcome::Failed(failed) => Some(failed),
            _ => None,
        })
    }

    pub fn applied_count(&self) -> usize {
        self.applied().count()
    }
}

#[derive(Clone)]
pub struct ChangeApplier {
    entities: Arc<dyn EntityStore>,
    log: Arc<dyn ChangeLog>,
    notifier: Arc<dyn ChangeNotifier>,
    resolver: ConflictResolver,
    max_write_attempts: u32,
}

impl ChangeApplier {
    pub fn new(
        entities: Arc<dyn EntityStore>,
        log: Arc<dyn ChangeLog>,
        notifier: Arc<dyn ChangeNotifier>,
        resolver: ConflictResolver,
    ) -> Self {
        Self {
            entities,
            log,
            notifier,
            resolver,
            max_write_attempts: DEFAULT_MAX_WRITE_ATTEMPTS,
        }
    }

    #[must_use]
    pub fn with_max_write_attempts(mut self, attempts: u32) -> Self {
        self.max_write_attempts = attempts.max(1);
        self
    }

    /// Apply `changes` one at a time in submission order.
    ///
    /// A failing change is reported in the outcome list and never stops the
    /// batch; changes processed before it stay applied. Changes without a
    /// device id are attributed to `device_id`.
    pub async fn apply_batch(
        &self,
        user_id: &str,
        device_id: &str,
        changes: Vec<SyncChange>,
    ) -> BatchOutcome {
        let mut outcomes = Vec::with_capacity(changes.len());
        for mut change in changes {
            if change.device_id.is_empty() {
                change.device_id = device_id.to_string();
            }

            let outcome = match self.apply_change(user_id, &change).await {
                Ok(outcome) => outcome,
                Err(error) => {
                    tracing::warn!(
                        entity_type = %change.entity_type,
                        entity_id = change.entity_id.as_str(),
                        retryable = error.is_retryable(),
                        "Failed to apply change: {}",
                        error
                    );
                    ChangeOutcome::failed(&change, &error)
                }
            };
            outcomes.push(outcome);
        }
        BatchOutcome { outcomes }
    }

    async fn apply_change(&self, user_id: &str, change: &SyncChange) -> Result<ChangeOutcome> {
        if let Some(change_id) = change.change_id.as_deref() {
            if let Some(event) = self.log.find_by_change_id(user_id, change_id).await? {
                tracing::debug!(
                    change_id,
                    entity_id = change.entity_id.as_str(),
                    "Replayed change already recorded"
                );
                return self.replay(change, &event).await;
            }
        }

        let mut attempt = 1;
        loop {
            let current = self.entities.get(change.entity_type, &change.entity_id).await?;
            if let Some(current) = &current {
                if current.owner() != user_id {
                    return Err(Error::Forbidden(change.entity_id.clone()));
                }
            }

            let decision = self.resolver.resolve(change, current.as_ref());
            match self.write(user_id, change, decision, current).await {
                Ok(stored) => return self.record(user_id, change, decision, stored).await,
                Err(Error::StaleVersion { .. }) if attempt < self.max_write_attempts => {
                    tracing::debug!(
                        entity_id = change.entity_id.as_str(),
                        attempt,
                        "Lost write race, re-reading entity"
                    );
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }

    /// Perform the write a decision calls for. Returns the entity as stored
    /// afterwards.
    async fn write(
        &self,
        user_id: &str,
        change: &SyncChange,
        decision: Decision,
        current: Option<Entity>,
    ) -> Result<Option<Entity>> {
        let Some(write) = decision.write() else {
            return Ok(current);
        };

        match (write, current) {
            (Write::Create, _) => {
                let entity = Entity::create(
                    change.entity_type,
                    &change.entity_id,
                    user_id,
                    change.data.as_ref(),
                    SyncMeta::initial(change.timestamp, change.device_id.as_str()),
                )?;
                self.entities.insert(&entity).await?;
                Ok(Some(entity))
            }
            (Write::Update, Some(current)) => {
                let meta = current
                    .meta()
                    .next(change.timestamp, change.device_id.as_str());
                let entity = current.patched(change.data.as_ref(), meta)?;
                self.entities
                    .update(&entity, current.meta().version)
                    .await?;
                Ok(Some(entity))
            }
            (Write::Delete, Some(current)) => {
                self.entities
                    .delete(change.entity_type, &change.entity_id, current.meta().version)
                    .await?;
                Ok(None)
            }
            // The entity vanished between the read and the decision.
            (Write::Update | Write::Delete, None) => Err(Error::StaleVersion {
                entity_id: change.entity_id.clone(),
                expected: 0,
            }),
        }
    }

    async fn record(
        &self,
        user_id: &str,
        change: &SyncChange,
        decision: Decision,
        stored: Option<Entity>,
    ) -> Result<ChangeOutcome> {
        let outcome = match decision {
            Decision::Apply(_) | Decision::Noop => EventOutcome::Applied,
            Decision::Conflict(ConflictResolution::ClientWins) => EventOutcome::ClientWins,
            Decision::Conflict(ConflictResolution::ServerWins | ConflictResolution::Merged) => {
                EventOutcome::ServerWins
            }
        };

        self.log
            .append(&SyncEvent::record(user_id, change, outcome))
            .await?;

        if decision.write().is_some() {
            self.notifier.notify(user_id, change);
        }

        tracing::debug!(
            entity_type = %change.entity_type,
            entity_id = change.entity_id.as_str(),
            action = %change.action,
            outcome = %outcome,
            "Processed change"
        );
        Ok(classify(change, outcome, stored))
    }

    /// Rebuild the outcome of a change whose `changeId` was already recorded
    async fn replay(&self, change: &SyncChange, event: &SyncEvent) -> Result<ChangeOutcome> {
        let stored = match event.outcome.resolution() {
            Some(_) => self.entities.get(change.entity_type, &change.entity_id).await?,
            None => None,
        };
        Ok(classify(change, event.outcome, stored))
    }
}

fn classify(change: &SyncChange, outcome: EventOutcome, stored: Option<Entity>) -> ChangeOutcome {
    match outcome.resolution() {
        None => ChangeOutcome::Applied(change.clone()),
        Some(resolution) => ChangeOutcome::Conflicted(SyncConflict {
            entity_type: change.entity_type,
            entity_id: change.entity_id.clone(),
            local_version: change.data.clone(),
            server_version: stored,
            resolution,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Database, LibSqlChangeLog, LibSqlEntityStore};
    use crate::models::{EntityPayload, EntityType, GroupData, NoteData, SyncAction};
    use crate::sync::NoopNotifier;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    struct Harness {
        applier: ChangeApplier,
        entities: Arc<dyn EntityStore>,
        log: Arc<dyn ChangeLog>,
    }

    async fn harness() -> Harness {
        let db = Database::open_in_memory().await.unwrap().into_shared();
        let entities: Arc<dyn EntityStore> = Arc::new(LibSqlEntityStore::new(db.clone()));
        let log: Arc<dyn ChangeLog> = Arc::new(LibSqlChangeLog::new(db));
        Harness {
            applier: ChangeApplier::new(
                entities.clone(),
                log.clone(),
                Arc::new(NoopNotifier),
                ConflictResolver::default(),
            ),
            entities,
            log,
        }
    }

    fn ts(raw: &str) -> DateTime<Utc> {
        raw.parse().unwrap()
    }

    fn note_change(action: SyncAction, at: &str, body: Option<&str>) -> SyncChange {
        let change = SyncChange::new(EntityType::Note, "note-1", action, ts(at), "");
        match body {
            Some(body) => change.with_data(EntityPayload::Note(NoteData {
                body: Some(body.to_string()),
                ..NoteData::default()
            })),
            None => change,
        }
    }

    async fn stored_note(entities: &Arc<dyn EntityStore>) -> Option<crate::models::Note> {
        match entities.get(EntityType::Note, "note-1").await.unwrap() {
            Some(Entity::Note(note)) => Some(note),
            _ => None,
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn create_then_newer_update_bumps_version() {
        let h = harness().await;
        let outcome = h
            .applier
            .apply_batch(
                "u1",
                "phone",
                vec![
                    note_change(SyncAction::Created, "2024-01-01T00:00:00Z", Some("x")),
                    note_change(SyncAction::Updated, "2024-01-02T00:00:00Z", Some("y")),
                ],
            )
            .await;

        assert_eq!(outcome.applied_count(), 2);
        assert_eq!(outcome.conflicts().count(), 0);
        assert!(outcome.applied().all(|change| change.device_id == "phone"));

        let note = stored_note(&h.entities).await.unwrap();
        assert_eq!(note.body, "y");
        assert_eq!(note.meta.version, 2);
        assert_eq!(note.meta.modified, ts("2024-01-02T00:00:00Z"));
        assert_eq!(note.meta.last_synced_at, note.meta.modified);
        assert_eq!(note.meta.device_id, "phone");
        assert_eq!(note.creator, "u1");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn update_of_absent_entity_creates_it() {
        let h = harness().await;
        let outcome = h
            .applier
            .apply_batch(
                "u1",
                "phone",
                vec![note_change(SyncAction::Updated, "2024-01-05T00:00:00Z", Some("late"))],
            )
            .await;

        assert_eq!(outcome.applied_count(), 1);
        assert_eq!(outcome.conflicts().count(), 0);
        assert_eq!(outcome.failures().count(), 0);

        let note = stored_note(&h.entities).await.unwrap();
        assert_eq!(note.body, "late");
        assert_eq!(note.meta.version, 1);
        assert_eq!(note.meta.created, ts("2024-01-05T00:00:00Z"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn stale_update_is_server_wins_and_still_logged() {
        let h = harness().await;
        h.applier
            .apply_batch(
                "u1",
                "laptop",
                vec![note_change(SyncAction::Created, "2024-01-02T00:00:00Z", Some("server"))],
            )
            .await;

        let outcome = h
            .applier
            .apply_batch(
                "u1",
                "phone",
                vec![note_change(SyncAction::Updated, "2024-01-01T00:00:00Z", Some("client"))],
            )
            .await;

        let conflicts: Vec<_> = outcome.conflicts().collect();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].resolution, ConflictResolution::ServerWins);
        let Some(Entity::Note(server)) = &conflicts[0].server_version else {
            panic!("conflict should carry the stored note");
        };
        assert_eq!(server.body, "server");

        let note = stored_note(&h.entities).await.unwrap();
        assert_eq!(note.body, "server");
        assert_eq!(note.meta.version, 1);

        let status = h.log.status("u1", None).await.unwrap();
        assert_eq!(status.total_events, 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn newer_create_on_existing_entity_is_client_wins() {
        let h = harness().await;
        h.applier
            .apply_batch(
                "u1",
                "laptop",
                vec![note_change(SyncAction::Created, "2024-01-01T00:00:00Z", Some("first"))],
            )
            .await;
        let outcome = h
            .applier
            .apply_batch(
                "u1",
                "phone",
                vec![note_change(SyncAction::Created, "2024-01-02T00:00:00Z", Some("second"))],
            )
            .await;

        let conflicts: Vec<_> = outcome.conflicts().collect();
        assert_eq!(conflicts[0].resolution, ConflictResolution::ClientWins);
        let note = stored_note(&h.entities).await.unwrap();
        assert_eq!(note.body, "second");
        assert_eq!(note.meta.version, 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn delete_removes_entity_and_absent_delete_is_applied() {
        let h = harness().await;
        let outcome = h
            .applier
            .apply_batch(
                "u1",
                "phone",
                vec![
                    note_change(SyncAction::Created, "2024-01-02T00:00:00Z", Some("x")),
                    note_change(SyncAction::Deleted, "2024-01-01T00:00:00Z", None),
                    note_change(SyncAction::Deleted, "2024-01-03T00:00:00Z", None),
                ],
            )
            .await;

        assert_eq!(outcome.applied_count(), 3);
        assert!(stored_note(&h.entities).await.is_none());
        assert_eq!(h.log.status("u1", None).await.unwrap().total_events, 3);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn failing_change_does_not_abort_batch() {
        let h = harness().await;
        let nameless_group =
            SyncChange::new(EntityType::Group, "g1", SyncAction::Created, ts("2024-01-01T00:00:00Z"), "");
        let named_group = SyncChange::new(
            EntityType::Group,
            "g2",
            SyncAction::Created,
            ts("2024-01-01T00:00:00Z"),
            "",
        )
        .with_data(EntityPayload::Group(GroupData {
            name: Some("Reading".to_string()),
        }));

        let outcome = h
            .applier
            .apply_batch("u1", "phone", vec![nameless_group, named_group])
            .await;

        assert_eq!(outcome.outcomes.len(), 2);
        let failures: Vec<_> = outcome.failures().collect();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].entity_id, "g1");
        assert!(!failures[0].retryable);
        assert!(outcome.outcomes[1].is_applied());
        assert_eq!(h.log.status("u1", None).await.unwrap().total_events, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn entity_of_another_account_is_forbidden() {
        let h = harness().await;
        h.applier
            .apply_batch(
                "owner",
                "laptop",
                vec![note_change(SyncAction::Created, "2024-01-01T00:00:00Z", Some("mine"))],
            )
            .await;

        let outcome = h
            .applier
            .apply_batch(
                "intruder",
                "phone",
                vec![note_change(SyncAction::Updated, "2024-01-02T00:00:00Z", Some("theirs"))],
            )
            .await;

        let failures: Vec<_> = outcome.failures().collect();
        assert_eq!(failures.len(), 1);
        assert!(!failures[0].retryable);
        assert_eq!(stored_note(&h.entities).await.unwrap().body, "mine");
        assert_eq!(h.log.status("intruder", None).await.unwrap().total_events, 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn change_id_replay_writes_nothing() {
        let h = harness().await;
        let batch = vec![
            note_change(SyncAction::Created, "2024-01-01T00:00:00Z", Some("x")).with_change_id("c-1"),
            note_change(SyncAction::Updated, "2024-01-01T00:00:00Z", Some("tie"))
                .with_change_id("c-2"),
        ];

        let first = h.applier.apply_batch("u1", "phone", batch.clone()).await;
        let second = h.applier.apply_batch("u1", "phone", batch).await;

        assert_eq!(first, second);
        assert_eq!(first.applied_count(), 1);
        assert_eq!(first.conflicts().count(), 1);
        assert_eq!(stored_note(&h.entities).await.unwrap().meta.version, 1);
        assert_eq!(h.log.status("u1", None).await.unwrap().total_events, 2);
    }

    /// Entity store that loses the CAS race a fixed number of times
    struct RacingStore {
        inner: LibSqlEntityStore,
        races: AtomicU32,
    }

    #[async_trait]
    impl EntityStore for RacingStore {
        async fn get(&self, entity_type: EntityType, id: &str) -> Result<Option<Entity>> {
            self.inner.get(entity_type, id).await
        }

        async fn insert(&self, entity: &Entity) -> Result<()> {
            self.inner.insert(entity).await
        }

        async fn update(&self, entity: &Entity, expected_version: i64) -> Result<()> {
            let lost = self
                .races
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if lost {
                return Err(Error::StaleVersion {
                    entity_id: entity.id().to_string(),
                    expected: expected_version,
                });
            }
            self.inner.update(entity, expected_version).await
        }

        async fn delete(
            &self,
            entity_type: EntityType,
            id: &str,
            expected_version: i64,
        ) -> Result<()> {
            self.inner.delete(entity_type, id, expected_version).await
        }
    }

    async fn racing_applier(races: u32) -> (ChangeApplier, Arc<dyn EntityStore>) {
        let db = Database::open_in_memory().await.unwrap().into_shared();
        let entities: Arc<dyn EntityStore> = Arc::new(RacingStore {
            inner: LibSqlEntityStore::new(db.clone()),
            races: AtomicU32::new(races),
        });
        let applier = ChangeApplier::new(
            entities.clone(),
            Arc::new(LibSqlChangeLog::new(db)),
            Arc::new(NoopNotifier),
            ConflictResolver::default(),
        );
        (applier, entities)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn lost_race_is_retried() {
        let (applier, entities) = racing_applier(2).await;
        let outcome = applier
            .apply_batch(
                "u1",
                "phone",
                vec![
                    note_change(SyncAction::Created, "2024-01-01T00:00:00Z", Some("x")),
                    note_change(SyncAction::Updated, "2024-01-02T00:00:00Z", Some("y")),
                ],
            )
            .await;

        assert_eq!(outcome.applied_count(), 2);
        assert_eq!(stored_note(&entities).await.unwrap().meta.version, 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn exhausted_retries_fail_retryably() {
        let (applier, entities) = racing_applier(10).await;
        let applier = applier.with_max_write_attempts(2);
        let outcome = applier
            .apply_batch(
                "u1",
                "phone",
                vec![
                    note_change(SyncAction::Created, "2024-01-01T00:00:00Z", Some("x")),
                    note_change(SyncAction::Updated, "2024-01-02T00:00:00Z", Some("y")),
                ],
            )
            .await;

        let failures: Vec<_> = outcome.failures().collect();
        assert_eq!(failures.len(), 1);
        assert!(failures[0].retryable);
        assert_eq!(stored_note(&entities).await.unwrap().body, "x");
    }

    #[derive(Default)]
    struct RecordingNotifier {
        seen: Mutex<Vec<(String, SyncChange)>>,
    }

    impl ChangeNotifier for RecordingNotifier {
        fn notify(&self, user_id: &str, change: &SyncChange) {
            self.seen
                .lock()
                .unwrap()
                .push((user_id.to_string(), change.clone()));
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn only_written_changes_are_notified() {
        let db = Database::open_in_memory().await.unwrap().into_shared();
        let notifier = Arc::new(RecordingNotifier::default());
        let applier = ChangeApplier::new(
            Arc::new(LibSqlEntityStore::new(db.clone())),
            Arc::new(LibSqlChangeLog::new(db)),
            notifier.clone(),
            ConflictResolver::default(),
        );

        applier
            .apply_batch(
                "u1",
                "phone",
                vec![
                    note_change(SyncAction::Created, "2024-01-02T00:00:00Z", Some("x")),
                    note_change(SyncAction::Updated, "2024-01-01T00:00:00Z", Some("old")),
                ],
            )
            .await;

        let seen = notifier.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, "u1");
        assert_eq!(seen[0].1.action, SyncAction::Created);
    }

    /// Change log whose appends always fail
    struct BrokenLog {
        inner: LibSqlChangeLog,
    }

    #[async_trait]
    impl ChangeLog for BrokenLog {
        async fn append(&self, _event: &SyncEvent) -> Result<()> {
            Err(Error::Database("disk full".to_string()))
        }

        async fn find_by_change_id(
            &self,
            user_id: &str,
            change_id: &str,
        ) -> Result<Option<SyncEvent>> {
            self.inner.find_by_change_id(user_id, change_id).await
        }

        async fn events_since(
            &self,
            user_id: &str,
            since: DateTime<Utc>,
        ) -> Result<Vec<SyncEvent>> {
            self.inner.events_since(user_id, since).await
        }

        async fn status(
            &self,
            user_id: &str,
            device_id: Option<&str>,
        ) -> Result<crate::store::LogStatus> {
            self.inner.status(user_id, device_id).await
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn log_failure_is_reported_as_retryable() {
        let db = Database::open_in_memory().await.unwrap().into_shared();
        let applier = ChangeApplier::new(
            Arc::new(LibSqlEntityStore::new(db.clone())),
            Arc::new(BrokenLog {
                inner: LibSqlChangeLog::new(db),
            }),
            Arc::new(NoopNotifier),
            ConflictResolver::default(),
        );

        let outcome = applier
            .apply_batch(
                "u1",
                "phone",
                vec![note_change(SyncAction::Created, "2024-01-01T00:00:00Z", Some("x"))],
            )
            .await;

        let failures: Vec<_> = outcome.failures().collect();
        assert_eq!(failures.len(), 1);
        assert!(failures[0].retryable);
        assert!(failures[0].reason.contains("disk full"));
    }
}
