//! Debounced autosave scheduling.
//!
//! The editor calls `queue` on every keystroke; each call replaces the
//! previous timer for that note, so only the trailing edge of a burst of
//! edits reaches the notebook. Pending edits for one note never block or
//! reorder edits to another note.
//!
//! Cancellation is cooperative and note-scoped: a new keystroke aborts
//! the undelivered timer, `flush` fires it early, `shutdown` (and
//! `Drop`) discards every undelivered timer. A save already dispatched
//! to the notebook is never cancelled mid-write; the notebook discards
//! its result if the note has meanwhile left the projection.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::error::JotResult;
use crate::models::{Note, NoteFields, NoteId};
use crate::notebook::Notebook;
use crate::remote_store::RemoteStore;

struct PendingSave {
    fields: NoteFields,
    timer: JoinHandle<()>,
}

/// Per-note trailing-edge debouncer in front of `Notebook::update`.
pub struct DebouncedSaver<R: RemoteStore + 'static> {
    notebook: Notebook<R>,
    delay: Duration,
    saves: Arc<Mutex<HashMap<NoteId, PendingSave>>>,
}

impl<R: RemoteStore + 'static> DebouncedSaver<R> {
    pub fn new(notebook: Notebook<R>, delay: Duration) -> Self {
        Self {
            notebook,
            delay,
            saves: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Schedule a save for `id`, restarting its timer. Fields queued by
    /// earlier unsaved calls are merged underneath, latest value wins,
    /// so the eventual save carries the full accumulated edit.
    pub fn queue(&self, id: NoteId, fields: NoteFields) {
        if fields.is_empty() {
            return;
        }

        let mut saves = self.saves.lock().unwrap();
        let merged = match saves.remove(&id) {
            Some(previous) => {
                previous.timer.abort();
                let mut accumulated = previous.fields;
                accumulated.merge(&fields);
                accumulated
            }
            None => fields,
        };

        let notebook = self.notebook.clone();
        let shared = Arc::clone(&self.saves);
        let delay = self.delay;
        let timer_id = id.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // Claim the entry; a concurrent queue/flush/shutdown that
            // got there first owns the save instead.
            let fields = {
                let mut saves = shared.lock().unwrap();
                match saves.remove(&timer_id) {
                    Some(save) => save.fields,
                    None => return,
                }
            };
            if let Err(e) = notebook.update(&timer_id, fields).await {
                tracing::warn!(id = %timer_id, error = %e, "debounced save failed");
            }
        });

        saves.insert(id, PendingSave { fields: merged, timer });
    }

    /// Fire the pending save for `id` immediately, if there is one.
    pub async fn flush(&self, id: &NoteId) -> JotResult<Option<Note>> {
        let fields = {
            let mut saves = self.saves.lock().unwrap();
            match saves.remove(id) {
                Some(save) => {
                    save.timer.abort();
                    save.fields
                }
                None => return Ok(None),
            }
        };
        self.notebook.update(id, fields).await.map(Some)
    }

    /// Move a pending save to a new id after a sync remap, keeping its
    /// timer running. Intended to be wired to the notebook's remap
    /// handler so an autosave racing a sync lands on the surviving id.
    pub fn rekey(&self, old: &NoteId, new: NoteId) {
        let fields = {
            let mut saves = self.saves.lock().unwrap();
            match saves.remove(old) {
                Some(save) => {
                    save.timer.abort();
                    save.fields
                }
                None => return,
            }
        };
        self.queue(new, fields);
    }

    /// Whether a save is queued for `id`.
    pub fn has_pending(&self, id: &NoteId) -> bool {
        self.saves.lock().unwrap().contains_key(id)
    }

    /// Discard every undelivered save.
    pub fn shutdown(&self) {
        let mut saves = self.saves.lock().unwrap();
        for (_, save) in saves.drain() {
            save.timer.abort();
        }
    }
}

impl<R: RemoteStore + 'static> Drop for DebouncedSaver<R> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectivity::ConnectivityMonitor;
    use crate::guest_store::GuestStore;
    use crate::models::NoteDraft;
    use crate::pending_store::PendingStore;
    use crate::remote_store::MemoryRemoteStore;
    use crate::session::Session;
    use crate::storage::MemoryStorage;

    const DELAY: Duration = Duration::from_millis(50);

    async fn guest_notebook() -> Notebook<MemoryRemoteStore> {
        let storage = Arc::new(MemoryStorage::new());
        let guest = Arc::new(GuestStore::open(storage.clone(), "guest_notes").unwrap());
        let pending = Arc::new(PendingStore::open(storage, "pending_notes").unwrap());
        Notebook::open(
            Session::guest(),
            guest,
            pending,
            Arc::new(MemoryRemoteStore::new()),
            ConnectivityMonitor::new(true),
        )
        .await
        .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_save_fires_after_delay() {
        let notebook = guest_notebook().await;
        let note = notebook.create(NoteDraft::new("t", "v0")).await.unwrap();
        let saver = DebouncedSaver::new(notebook.clone(), DELAY);

        saver.queue(note.id.clone(), NoteFields::content("v1"));
        assert!(saver.has_pending(&note.id));

        tokio::time::sleep(DELAY * 2).await;
        assert!(!saver.has_pending(&note.id));
        let saved = notebook.get(&note.id.to_string()).await.unwrap();
        assert_eq!(saved.content, "v1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_collapses_to_trailing_edge() {
        let notebook = guest_notebook().await;
        let note = notebook.create(NoteDraft::new("t", "v0")).await.unwrap();
        let before = notebook.get(&note.id.to_string()).await.unwrap().updated_at;
        let saver = DebouncedSaver::new(notebook.clone(), DELAY);

        for i in 1..=5 {
            saver.queue(note.id.clone(), NoteFields::content(format!("v{}", i)));
            tokio::time::sleep(DELAY / 2).await;
            // Still within the window: nothing saved yet.
            assert_eq!(
                notebook.get(&note.id.to_string()).await.unwrap().content,
                "v0"
            );
        }

        tokio::time::sleep(DELAY * 2).await;
        let saved = notebook.get(&note.id.to_string()).await.unwrap();
        assert_eq!(saved.content, "v5");
        // One write, not five.
        assert!(saved.updated_at > before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_queued_fields_merge_across_calls() {
        let notebook = guest_notebook().await;
        let note = notebook.create(NoteDraft::new("old", "v0")).await.unwrap();
        let saver = DebouncedSaver::new(notebook.clone(), DELAY);

        saver.queue(note.id.clone(), NoteFields::title("new title"));
        saver.queue(note.id.clone(), NoteFields::content("new content"));

        tokio::time::sleep(DELAY * 2).await;
        let saved = notebook.get(&note.id.to_string()).await.unwrap();
        assert_eq!(saved.title, "new title");
        assert_eq!(saved.content, "new content");
    }

    #[tokio::test(start_paused = true)]
    async fn test_notes_debounce_independently() {
        let notebook = guest_notebook().await;
        let a = notebook.create(NoteDraft::new("a", "")).await.unwrap();
        let b = notebook.create(NoteDraft::new("b", "")).await.unwrap();
        let saver = DebouncedSaver::new(notebook.clone(), DELAY);

        saver.queue(a.id.clone(), NoteFields::content("a1"));
        tokio::time::sleep(DELAY / 2).await;
        // Re-queueing a does not delay b.
        saver.queue(b.id.clone(), NoteFields::content("b1"));
        saver.queue(a.id.clone(), NoteFields::content("a2"));

        tokio::time::sleep(DELAY * 2).await;
        assert_eq!(notebook.get(&a.id.to_string()).await.unwrap().content, "a2");
        assert_eq!(notebook.get(&b.id.to_string()).await.unwrap().content, "b1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_saves_immediately() {
        let notebook = guest_notebook().await;
        let note = notebook.create(NoteDraft::new("t", "v0")).await.unwrap();
        let saver = DebouncedSaver::new(notebook.clone(), DELAY);

        saver.queue(note.id.clone(), NoteFields::content("v1"));
        let flushed = saver.flush(&note.id).await.unwrap().unwrap();
        assert_eq!(flushed.content, "v1");
        assert!(!saver.has_pending(&note.id));

        // Nothing left for the timer to fire.
        tokio::time::sleep(DELAY * 2).await;
        assert!(saver.flush(&note.id).await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_discards_undelivered_saves() {
        let notebook = guest_notebook().await;
        let note = notebook.create(NoteDraft::new("t", "v0")).await.unwrap();
        let saver = DebouncedSaver::new(notebook.clone(), DELAY);

        saver.queue(note.id.clone(), NoteFields::content("v1"));
        saver.shutdown();

        tokio::time::sleep(DELAY * 2).await;
        assert_eq!(
            notebook.get(&note.id.to_string()).await.unwrap().content,
            "v0"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_rekey_moves_save_to_new_id() {
        let notebook = guest_notebook().await;
        let old = notebook.create(NoteDraft::new("old", "")).await.unwrap();
        let new = notebook.create(NoteDraft::new("new", "")).await.unwrap();
        let saver = DebouncedSaver::new(notebook.clone(), DELAY);

        saver.queue(old.id.clone(), NoteFields::content("edit"));
        saver.rekey(&old.id, new.id.clone());
        assert!(!saver.has_pending(&old.id));
        assert!(saver.has_pending(&new.id));

        tokio::time::sleep(DELAY * 2).await;
        assert_eq!(notebook.get(&new.id.to_string()).await.unwrap().content, "edit");
        assert_eq!(notebook.get(&old.id.to_string()).await.unwrap().content, "");
    }

    #[tokio::test(start_paused = true)]
    async fn test_save_for_vanished_note_is_dropped() {
        let notebook = guest_notebook().await;
        let note = notebook.create(NoteDraft::new("t", "")).await.unwrap();
        let saver = DebouncedSaver::new(notebook.clone(), DELAY);

        saver.queue(note.id.clone(), NoteFields::content("late"));
        notebook.move_to_trash(&note.id).await.unwrap();
        notebook.permanently_delete(&note.id).await.unwrap();

        // The dispatched save fails with NotFound and is logged, never
        // resurrecting the note.
        tokio::time::sleep(DELAY * 2).await;
        assert!(notebook.notes().is_empty());
        assert!(notebook.trashed_notes().is_empty());
    }
}
