//! Pending store adapter.
//!
//! Write-ahead local store for notes created or edited while the user is
//! authenticated but offline. Every entry carries `needs_sync: true`
//! until the reconciler confirms remote persistence; until then this
//! store is authoritative for its notes and reads must be served from
//! here, not from the remote.
//!
//! Two kinds of entry live here, distinguished by the id namespace:
//! - `local-` keyed entries were created offline and reconcile as a
//!   remote create;
//! - remote-keyed entries are shadow copies written when a remote write
//!   failed while offline, and reconcile as an update against the id
//!   they already have.
//!
//! Ordering guarantee for the save/sync race: an entry is marked
//! `syncing` before the reconciler's remote write begins. A user
//! mutation that lands while the flag is set is applied to the local
//! copy and marks the entry dirty; after the sync succeeds, a dirty
//! entry is re-keyed to the freshly assigned remote id instead of being
//! removed, so the concurrent edit reconciles on the following pass.
//!
//! Persistence follows the guest store: whole-collection JSON write-back
//! with rollback to the last persisted snapshot on failure.

use std::sync::{Arc, Mutex};

use crate::error::{JotError, JotResult};
use crate::models::{Note, NoteDraft, NoteFields, NoteId, PendingEntry};
use crate::storage::KeyValueStorage;

/// Write-ahead store for offline writes awaiting sync.
pub struct PendingStore {
    inner: Mutex<Inner>,
}

struct Inner {
    storage: Arc<dyn KeyValueStorage>,
    key: String,
    entries: Vec<PendingEntry>,
}

impl Inner {
    fn persist(&self) -> JotResult<()> {
        let payload = serde_json::to_string(&self.entries)?;
        self.storage.set(&self.key, &payload)
    }

    fn persist_or_rollback(&mut self, snapshot: Vec<PendingEntry>) -> JotResult<()> {
        if let Err(e) = self.persist() {
            self.entries = snapshot;
            return Err(e);
        }
        Ok(())
    }

    fn position(&self, id: &NoteId) -> JotResult<usize> {
        self.entries
            .iter()
            .position(|e| &e.note.id == id)
            .ok_or_else(|| JotError::not_found(format!("pending note {}", id)))
    }
}

impl PendingStore {
    /// Open the store, loading any previously persisted queue. Sync
    /// bookkeeping flags are runtime-only and start cleared.
    pub fn open(storage: Arc<dyn KeyValueStorage>, key: impl Into<String>) -> JotResult<Self> {
        let key = key.into();
        let entries: Vec<PendingEntry> = match storage.get(&key)? {
            Some(payload) => serde_json::from_str(&payload)?,
            None => Vec::new(),
        };
        Ok(Self {
            inner: Mutex::new(Inner {
                storage,
                key,
                entries,
            }),
        })
    }

    /// Create a new note with a fresh `local-` id, queued for sync.
    pub async fn create(&self, draft: NoteDraft, user_id: &str) -> JotResult<Note> {
        let mut inner = self.inner.lock().unwrap();
        let snapshot = inner.entries.clone();
        let note = Note::new_pending(draft, user_id);
        inner.entries.push(PendingEntry::new(note.clone()));
        inner.persist_or_rollback(snapshot)?;
        Ok(note)
    }

    /// Enqueue a shadow copy of a remote-backed note whose write failed
    /// offline. The note keeps its remote id; the reconciler applies it
    /// as an update-on-sync. Replaces any existing entry for the id.
    pub async fn enqueue_shadow(&self, note: Note) -> JotResult<Note> {
        let mut inner = self.inner.lock().unwrap();
        let snapshot = inner.entries.clone();
        match inner.entries.iter().position(|e| e.note.id == note.id) {
            Some(pos) => {
                let entry = &mut inner.entries[pos];
                if entry.syncing {
                    entry.dirty = true;
                }
                entry.note = note.clone();
                entry.needs_sync = true;
            }
            None => inner.entries.push(PendingEntry::new(note.clone())),
        }
        inner.persist_or_rollback(snapshot)?;
        Ok(note)
    }

    /// Read a note by id.
    pub async fn read(&self, id: &NoteId) -> JotResult<Note> {
        let inner = self.inner.lock().unwrap();
        let pos = inner.position(id)?;
        Ok(inner.entries[pos].note.clone())
    }

    /// Whether the store holds an entry for this id.
    pub async fn contains(&self, id: &NoteId) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.entries.iter().any(|e| &e.note.id == id)
    }

    /// Apply a partial update. If the entry is mid-sync the edit still
    /// applies locally and the entry is flagged dirty so it survives
    /// the in-flight sync.
    pub async fn update(&self, id: &NoteId, fields: &NoteFields) -> JotResult<Note> {
        self.mutate(id, |note| note.apply_fields(fields)).await
    }

    /// Soft-delete. No-op if already trashed.
    pub async fn move_to_trash(&self, id: &NoteId) -> JotResult<Note> {
        self.mutate(id, |note| note.mark_deleted()).await
    }

    /// Restore from the trash. No-op if not trashed.
    pub async fn restore(&self, id: &NoteId) -> JotResult<Note> {
        self.mutate(id, |note| note.mark_restored()).await
    }

    async fn mutate(&self, id: &NoteId, f: impl FnOnce(&mut Note)) -> JotResult<Note> {
        let mut inner = self.inner.lock().unwrap();
        let snapshot = inner.entries.clone();
        let pos = inner.position(id)?;
        let entry = &mut inner.entries[pos];
        f(&mut entry.note);
        entry.needs_sync = true;
        if entry.syncing {
            entry.dirty = true;
        }
        let note = entry.note.clone();
        inner.persist_or_rollback(snapshot)?;
        Ok(note)
    }

    /// Remove a note entirely. Irreversible; a sync already in flight
    /// for it is not cancelled but its result is discarded.
    pub async fn permanently_delete(&self, id: &NoteId) -> JotResult<()> {
        let mut inner = self.inner.lock().unwrap();
        let snapshot = inner.entries.clone();
        let pos = inner.position(id)?;
        inner.entries.remove(pos);
        inner.persist_or_rollback(snapshot)
    }

    /// Remove every trashed note. Returns how many were removed.
    pub async fn empty_trash(&self) -> JotResult<usize> {
        let mut inner = self.inner.lock().unwrap();
        let snapshot = inner.entries.clone();
        let before = inner.entries.len();
        inner.entries.retain(|e| !e.note.deleted);
        let removed = before - inner.entries.len();
        if removed > 0 {
            inner.persist_or_rollback(snapshot)?;
        }
        Ok(removed)
    }

    /// List active or trashed notes.
    pub async fn list(&self, deleted: bool) -> JotResult<Vec<Note>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .entries
            .iter()
            .filter(|e| e.note.deleted == deleted)
            .map(|e| e.note.clone())
            .collect())
    }

    /// Number of entries still awaiting sync.
    pub fn pending_count(&self) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.entries.iter().filter(|e| e.needs_sync).count()
    }

    // Reconciler interface. These are synchronous: the reconciler holds
    // no lock across its remote calls and re-enters the store to record
    // the outcome of each entry.

    /// Snapshot all entries needing sync, FIFO, marking each `syncing`
    /// before it is returned so concurrent user edits queue behind the
    /// in-flight attempt.
    pub fn begin_sync_batch(&self) -> Vec<PendingEntry> {
        let mut inner = self.inner.lock().unwrap();
        let mut batch = Vec::new();
        for entry in inner.entries.iter_mut() {
            if entry.needs_sync && !entry.syncing {
                entry.syncing = true;
                entry.dirty = false;
                batch.push(entry.clone());
            }
        }
        batch
    }

    /// Mark a single entry `syncing` and return a snapshot of it, if it
    /// is still queued. Used for immediate follow-up attempts on entries
    /// re-keyed by `mark_synced`.
    pub fn begin_sync_entry(&self, id: &NoteId) -> Option<PendingEntry> {
        let mut inner = self.inner.lock().unwrap();
        let entry = inner
            .entries
            .iter_mut()
            .find(|e| &e.note.id == id && e.needs_sync && !e.syncing)?;
        entry.syncing = true;
        entry.dirty = false;
        Some(entry.clone())
    }

    /// Record a successful sync of `old_id`, now persisted remotely as
    /// `synced`. A clean entry is removed. A dirty entry (edited while
    /// the sync was in flight) is instead re-keyed to the remote id so
    /// the concurrent edit reconciles on the next pass; the re-keyed
    /// shadow note is returned in that case.
    ///
    /// The remote write has already landed when this is called, so a
    /// failed local persist must not roll the queue back to the
    /// pre-sync state: the old `local-` keyed entry would reconcile
    /// again as a create and duplicate the note. Instead the in-memory
    /// queue keeps (or gains) an entry keyed by the server-assigned id,
    /// eligible for the next pass as an update.
    pub fn mark_synced(&self, old_id: &NoteId, synced: &Note) -> JotResult<Option<Note>> {
        let mut inner = self.inner.lock().unwrap();
        let pos = match inner.entries.iter().position(|e| &e.note.id == old_id) {
            Some(pos) => pos,
            // Entry vanished mid-sync (permanent delete); nothing to record.
            None => return Ok(None),
        };

        let shadow = if inner.entries[pos].dirty {
            let entry = &mut inner.entries[pos];
            entry.note.id = synced.id.clone();
            entry.note.user_id = synced.user_id.clone();
            entry.syncing = false;
            entry.dirty = false;
            entry.needs_sync = true;
            Some(entry.note.clone())
        } else {
            inner.entries.remove(pos);
            None
        };

        if let Err(e) = inner.persist() {
            if shadow.is_none() {
                inner.entries.insert(pos, PendingEntry::new(synced.clone()));
            }
            return Err(e);
        }
        Ok(shadow)
    }

    /// Record a failed sync attempt: the entry stays queued for the
    /// next reconciliation pass.
    pub fn mark_sync_failed(&self, id: &NoteId) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(entry) = inner.entries.iter_mut().find(|e| &e.note.id == id) {
            entry.syncing = false;
            entry.dirty = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Backend;
    use crate::storage::MemoryStorage;

    fn store_with_memory() -> (PendingStore, Arc<MemoryStorage>) {
        let storage = Arc::new(MemoryStorage::new());
        let store = PendingStore::open(storage.clone(), "pending_notes").unwrap();
        (store, storage)
    }

    fn remote_note(id: &str, user: &str) -> Note {
        let mut note = Note::new_pending(NoteDraft::new("t", "c"), user);
        note.id = NoteId::Remote(id.to_string());
        note
    }

    #[tokio::test]
    async fn test_create_assigns_local_id_and_needs_sync() {
        let (store, _) = store_with_memory();
        let note = store.create(NoteDraft::new("A", "B"), "u1").await.unwrap();

        assert!(note.id.to_string().starts_with("local-"));
        assert_eq!(note.id.backend(), Backend::Pending);
        assert_eq!(store.pending_count(), 1);
    }

    #[tokio::test]
    async fn test_shadow_entry_keeps_remote_id() {
        let (store, _) = store_with_memory();
        let shadow = store.enqueue_shadow(remote_note("r42", "u1")).await.unwrap();

        assert_eq!(shadow.id, NoteId::Remote("r42".to_string()));
        assert_eq!(store.pending_count(), 1);
        // Re-enqueueing replaces, not duplicates.
        store.enqueue_shadow(remote_note("r42", "u1")).await.unwrap();
        assert_eq!(store.pending_count(), 1);
    }

    #[tokio::test]
    async fn test_batch_is_fifo_and_marks_syncing() {
        let (store, _) = store_with_memory();
        let first = store.create(NoteDraft::new("1", ""), "u").await.unwrap();
        let second = store.create(NoteDraft::new("2", ""), "u").await.unwrap();

        let batch = store.begin_sync_batch();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].note.id, first.id);
        assert_eq!(batch[1].note.id, second.id);

        // A second batch while the first is in flight picks up nothing.
        assert!(store.begin_sync_batch().is_empty());
    }

    #[tokio::test]
    async fn test_clean_entry_removed_on_sync_success() {
        let (store, _) = store_with_memory();
        let note = store.create(NoteDraft::new("A", "B"), "u").await.unwrap();
        let batch = store.begin_sync_batch();

        let synced = remote_note("r1", "u");
        let shadow = store.mark_synced(&batch[0].note.id, &synced).unwrap();
        assert!(shadow.is_none());
        assert_eq!(store.pending_count(), 0);
        assert!(!store.contains(&note.id).await);
    }

    #[tokio::test]
    async fn test_edit_during_sync_queues_behind_and_retargets() {
        let (store, _) = store_with_memory();
        let note = store.create(NoteDraft::new("old", "c"), "u").await.unwrap();
        store.begin_sync_batch();

        // User edit races the in-flight sync.
        store
            .update(&note.id, &NoteFields::title("newer"))
            .await
            .unwrap();

        let synced = remote_note("r9", "u");
        let shadow = store
            .mark_synced(&note.id, &synced)
            .unwrap()
            .expect("dirty entry must be retained");

        // The concurrent edit survives, re-keyed to the new remote id.
        assert_eq!(shadow.id, NoteId::Remote("r9".to_string()));
        assert_eq!(shadow.title, "newer");
        assert_eq!(store.pending_count(), 1);
        assert!(!store.contains(&note.id).await);
    }

    #[tokio::test]
    async fn test_failed_sync_retains_entry() {
        let (store, _) = store_with_memory();
        let note = store.create(NoteDraft::new("A", "B"), "u").await.unwrap();
        let batch = store.begin_sync_batch();
        assert_eq!(batch.len(), 1);

        store.mark_sync_failed(&note.id);
        assert_eq!(store.pending_count(), 1);
        // The entry is eligible again on the next pass.
        assert_eq!(store.begin_sync_batch().len(), 1);
    }

    #[tokio::test]
    async fn test_syncing_flag_not_persisted() {
        let storage = Arc::new(MemoryStorage::new());
        {
            let store = PendingStore::open(storage.clone(), "p").unwrap();
            store.create(NoteDraft::new("A", ""), "u").await.unwrap();
            let batch = store.begin_sync_batch();
            assert_eq!(batch.len(), 1);
            // Dropped mid-sync (process exit).
        }
        let store = PendingStore::open(storage, "p").unwrap();
        // After reload the entry is queued again, not stuck syncing.
        assert_eq!(store.begin_sync_batch().len(), 1);
    }

    #[tokio::test]
    async fn test_trash_and_restore() {
        let (store, _) = store_with_memory();
        let note = store.create(NoteDraft::new("A", ""), "u").await.unwrap();

        store.move_to_trash(&note.id).await.unwrap();
        assert!(store.list(false).await.unwrap().is_empty());
        assert_eq!(store.list(true).await.unwrap().len(), 1);

        let restored = store.restore(&note.id).await.unwrap();
        assert!(!restored.deleted);
        assert!(restored.deleted_at.is_none());
    }

    #[tokio::test]
    async fn test_rollback_on_persist_failure() {
        let (store, storage) = store_with_memory();
        store.create(NoteDraft::new("kept", ""), "u").await.unwrap();

        storage.fail_next_write();
        assert!(store.create(NoteDraft::new("lost", ""), "u").await.is_err());
        assert_eq!(store.pending_count(), 1);
    }

    #[tokio::test]
    async fn test_persist_failure_on_mark_synced_requeues_as_update() {
        let (store, storage) = store_with_memory();
        let note = store.create(NoteDraft::new("A", ""), "u").await.unwrap();
        store.begin_sync_batch();

        storage.fail_next_write();
        let synced = remote_note("r7", "u");
        assert!(store.mark_synced(&note.id, &synced).is_err());

        // The remote create already landed, so the entry must not revert
        // to its local- id: that would reconcile as a second create. It
        // is requeued under the remote id and the next pass picks it up
        // as an update.
        assert_eq!(store.pending_count(), 1);
        assert!(!store.contains(&note.id).await);
        let batch = store.begin_sync_batch();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].note.id, NoteId::Remote("r7".to_string()));
    }

    #[tokio::test]
    async fn test_persist_failure_on_dirty_mark_synced_keeps_rekey() {
        let (store, storage) = store_with_memory();
        let note = store.create(NoteDraft::new("old", ""), "u").await.unwrap();
        store.begin_sync_batch();
        store
            .update(&note.id, &NoteFields::title("newer"))
            .await
            .unwrap();

        storage.fail_next_write();
        assert!(store.mark_synced(&note.id, &remote_note("r8", "u")).is_err());

        // The in-memory re-key survives the failed persist; the
        // concurrent edit stays queued against the server-assigned id.
        let batch = store.begin_sync_batch();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].note.id, NoteId::Remote("r8".to_string()));
        assert_eq!(batch[0].note.title, "newer");
    }

    #[tokio::test]
    async fn test_permanent_delete_during_sync_discards_result() {
        let (store, _) = store_with_memory();
        let note = store.create(NoteDraft::new("A", ""), "u").await.unwrap();
        store.begin_sync_batch();
        store.permanently_delete(&note.id).await.unwrap();

        let synced = remote_note("r1", "u");
        let shadow = store.mark_synced(&note.id, &synced).unwrap();
        assert!(shadow.is_none());
        assert_eq!(store.pending_count(), 0);
    }
}
