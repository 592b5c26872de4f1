//! Sync reconciler.
//!
//! Drains the pending store into the remote store after connectivity
//! returns (or on an explicit trigger). Entries are processed in FIFO
//! order and failures are independent: a failed entry stays queued for
//! the next pass and never blocks the entries behind it. This is
//! deliberately not transactional; partial success is expected and safe
//! because the pending store remains the fallback source of truth for
//! anything not yet confirmed synced.
//!
//! Entry handling by namespace:
//! - `local-` keyed entries become remote creates. The original
//!   `created_at` is preserved; only the id and `updated_at` are
//!   server-assigned. The resulting id remap is reported so the facade
//!   can silently redirect any UI-held reference to the old id.
//! - remote-keyed shadow entries become remote updates against the id
//!   they already carry. No remap results.
//!
//! Per-entry failures are logged and accumulated in the report, never
//! surfaced to a caller: reconciliation is a background process.

use std::sync::Arc;

use crate::error::JotResult;
use crate::models::{Note, NoteFields, NoteId, PendingEntry};
use crate::pending_store::PendingStore;
use crate::remote_store::RemoteStore;

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    /// Entries confirmed persisted remotely.
    pub synced: usize,
    /// Entries that failed and remain queued.
    pub failed: usize,
    /// Identity remaps (`local-` id to remote id) from synced creates.
    pub remapped: Vec<(NoteId, NoteId)>,
    /// One message per failed entry.
    pub errors: Vec<String>,
}

impl SyncReport {
    /// True when every queued entry synced.
    pub fn is_clean(&self) -> bool {
        self.failed == 0
    }
}

/// Drains pending writes into the remote store.
pub struct SyncReconciler<R: RemoteStore> {
    pending: Arc<PendingStore>,
    remote: Arc<R>,
    user_id: String,
}

impl<R: RemoteStore> SyncReconciler<R> {
    pub fn new(pending: Arc<PendingStore>, remote: Arc<R>, user_id: impl Into<String>) -> Self {
        Self {
            pending,
            remote,
            user_id: user_id.into(),
        }
    }

    /// Run one reconciliation pass over everything currently queued.
    ///
    /// Idempotent: a second drain with no new writes in between finds an
    /// empty queue and creates nothing.
    pub async fn drain(&self) -> SyncReport {
        let batch = self.pending.begin_sync_batch();
        if batch.is_empty() {
            return SyncReport::default();
        }

        tracing::info!(entries = batch.len(), "draining pending store");
        let mut report = SyncReport::default();

        for entry in batch {
            self.sync_entry(entry, &mut report).await;
        }

        tracing::info!(
            synced = report.synced,
            failed = report.failed,
            "reconciliation pass complete"
        );
        report
    }

    async fn sync_entry(&self, entry: PendingEntry, report: &mut SyncReport) {
        let old_id = entry.note.id.clone();
        let result = self.push_entry(&entry).await;

        match result {
            Ok(synced) => {
                if matches!(old_id, NoteId::Pending(_)) {
                    report.remapped.push((old_id.clone(), synced.id.clone()));
                }
                report.synced += 1;

                match self.pending.mark_synced(&old_id, &synced) {
                    // The entry was edited while its sync was in flight;
                    // it now sits re-keyed to the remote id. Push the
                    // concurrent edit right away rather than waiting for
                    // the next connectivity event.
                    Ok(Some(shadow)) => self.sync_followup(shadow, report).await,
                    Ok(None) => {}
                    Err(e) => {
                        // Remote write landed but the local queue could
                        // not be persisted. The store keeps the entry
                        // queued under the server-assigned id, so it
                        // retries as an update, never a second create.
                        tracing::warn!(id = %old_id, error = %e, "failed to record synced entry");
                        report.errors.push(format!("{}: {}", old_id, e));
                    }
                }
            }
            Err(e) => {
                tracing::warn!(id = %old_id, error = %e, "sync failed; entry retained");
                report.failed += 1;
                report.errors.push(format!("{}: {}", old_id, e));
                self.pending.mark_sync_failed(&old_id);
            }
        }
    }

    /// One immediate follow-up attempt for an entry re-keyed mid-sync.
    /// If it is edited again during this attempt it simply stays queued.
    async fn sync_followup(&self, shadow: Note, report: &mut SyncReport) {
        let id = shadow.id.clone();
        let entry = match self.pending.begin_sync_entry(&id) {
            Some(entry) => entry,
            None => return,
        };

        match self.push_entry(&entry).await {
            Ok(synced) => {
                report.synced += 1;
                if let Err(e) = self.pending.mark_synced(&id, &synced) {
                    tracing::warn!(id = %id, error = %e, "failed to record synced entry");
                    report.errors.push(format!("{}: {}", id, e));
                }
            }
            Err(e) => {
                tracing::warn!(id = %id, error = %e, "follow-up sync failed; entry retained");
                report.failed += 1;
                report.errors.push(format!("{}: {}", id, e));
                self.pending.mark_sync_failed(&id);
            }
        }
    }

    async fn push_entry(&self, entry: &PendingEntry) -> JotResult<Note> {
        match &entry.note.id {
            NoteId::Pending(_) => self.remote.create(&self.user_id, &entry.note).await,
            NoteId::Remote(id) => self.push_shadow(id, &entry.note).await,
            // Guest notes never reach the pending store.
            NoteId::Guest(_) => Err(crate::error::JotError::sync(format!(
                "guest note {} in pending store",
                entry.note.id
            ))),
        }
    }

    /// Apply a shadow entry as an update against its existing remote id.
    async fn push_shadow(&self, id: &str, note: &Note) -> JotResult<Note> {
        let fields = NoteFields {
            title: Some(note.title.clone()),
            content: Some(note.content.clone()),
            pinned: Some(note.pinned),
        };
        let mut synced = self.remote.update(&self.user_id, id, &fields).await?;
        if synced.deleted != note.deleted {
            synced = self
                .remote
                .set_deleted(&self.user_id, id, note.deleted)
                .await?;
        }
        Ok(synced)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NoteDraft;
    use crate::remote_store::MemoryRemoteStore;
    use crate::storage::MemoryStorage;

    fn setup() -> (Arc<PendingStore>, Arc<MemoryRemoteStore>, SyncReconciler<MemoryRemoteStore>) {
        let storage = Arc::new(MemoryStorage::new());
        let pending = Arc::new(PendingStore::open(storage, "pending").unwrap());
        let remote = Arc::new(MemoryRemoteStore::new());
        let reconciler = SyncReconciler::new(pending.clone(), remote.clone(), "u1");
        (pending, remote, reconciler)
    }

    #[tokio::test]
    async fn test_drain_creates_and_remaps() {
        let (pending, remote, reconciler) = setup();
        let note = pending.create(NoteDraft::new("A", "B"), "u1").await.unwrap();

        let report = reconciler.drain().await;
        assert!(report.is_clean());
        assert_eq!(report.synced, 1);
        assert_eq!(report.remapped.len(), 1);

        let (old, new) = &report.remapped[0];
        assert_eq!(old, &note.id);
        assert!(matches!(new, NoteId::Remote(_)));
        assert!(!new.to_string().starts_with("local-"));

        // Old id gone from pending; note lives remotely.
        assert!(!pending.contains(&note.id).await);
        let stored = remote.read("u1", &new.to_string()).await.unwrap();
        assert_eq!(stored.title, "A");
        assert_eq!(stored.created_at, note.created_at);
    }

    #[tokio::test]
    async fn test_drain_is_idempotent() {
        let (pending, remote, reconciler) = setup();
        pending.create(NoteDraft::new("A", "B"), "u1").await.unwrap();

        let first = reconciler.drain().await;
        assert_eq!(first.synced, 1);
        assert_eq!(remote.note_count(), 1);
        assert_eq!(pending.pending_count(), 0);

        // Second run with no new writes: nothing happens, no duplicates.
        let second = reconciler.drain().await;
        assert_eq!(second.synced, 0);
        assert!(second.remapped.is_empty());
        assert_eq!(remote.note_count(), 1);
    }

    #[tokio::test]
    async fn test_partial_batch_resilience() {
        let (pending, remote, reconciler) = setup();
        let ok = pending.create(NoteDraft::new("good", ""), "u1").await.unwrap();
        let bad = pending.create(NoteDraft::new("poison", ""), "u1").await.unwrap();
        remote.fail_create_with_title("poison");

        let report = reconciler.drain().await;
        assert_eq!(report.synced, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.errors.len(), 1);

        // First entry synced and removed; second retained, still queued.
        assert!(!pending.contains(&ok.id).await);
        assert!(pending.contains(&bad.id).await);
        assert_eq!(pending.pending_count(), 1);
        assert_eq!(remote.note_count(), 1);
    }

    #[tokio::test]
    async fn test_shadow_entry_updates_in_place() {
        let (pending, remote, reconciler) = setup();

        // A note that synced previously, then got edited offline.
        let seeded = remote
            .create("u1", &Note::new_pending(NoteDraft::new("old", "c"), "u1"))
            .await
            .unwrap();
        let mut shadow = seeded.clone();
        shadow.title = "edited offline".to_string();
        pending.enqueue_shadow(shadow).await.unwrap();

        let report = reconciler.drain().await;
        assert!(report.is_clean());
        // Update, not create: no remap, no new remote note.
        assert!(report.remapped.is_empty());
        assert_eq!(remote.note_count(), 1);

        let stored = remote.read("u1", &seeded.id.to_string()).await.unwrap();
        assert_eq!(stored.title, "edited offline");
        assert_eq!(pending.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_shadow_sync_carries_deletion_flag() {
        let (pending, remote, reconciler) = setup();
        let seeded = remote
            .create("u1", &Note::new_pending(NoteDraft::new("t", "c"), "u1"))
            .await
            .unwrap();

        // Trashed while offline.
        let mut shadow = seeded.clone();
        shadow.mark_deleted();
        pending.enqueue_shadow(shadow).await.unwrap();

        let report = reconciler.drain().await;
        assert!(report.is_clean());
        let stored = remote.read("u1", &seeded.id.to_string()).await.unwrap();
        assert!(stored.deleted);
        assert!(stored.deleted_at.is_some());
    }

    #[tokio::test]
    async fn test_preserves_pin_and_trash_state_on_create() {
        let (pending, remote, reconciler) = setup();
        let note = pending.create(NoteDraft::new("A", "B"), "u1").await.unwrap();
        pending
            .update(&note.id, &NoteFields::pinned(true))
            .await
            .unwrap();

        let report = reconciler.drain().await;
        let (_, new_id) = &report.remapped[0];
        let stored = remote.read("u1", &new_id.to_string()).await.unwrap();
        assert!(stored.pinned);
        assert!(!stored.deleted);
    }

    #[tokio::test]
    async fn test_failed_entries_retry_on_next_drain() {
        let (pending, remote, reconciler) = setup();
        pending.create(NoteDraft::new("flaky", ""), "u1").await.unwrap();

        remote.set_online(false);
        let report = reconciler.drain().await;
        assert_eq!(report.failed, 1);
        assert_eq!(pending.pending_count(), 1);

        remote.set_online(true);
        let report = reconciler.drain().await;
        assert_eq!(report.synced, 1);
        assert_eq!(pending.pending_count(), 0);
        assert_eq!(remote.note_count(), 1);
    }
}
