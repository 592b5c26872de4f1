//! Guest store adapter.
//!
//! Full CRUD plus soft delete over local key-value storage, authoritative
//! for unauthenticated guest sessions. Guest notes are never synced and
//! never migrate to another namespace individually.
//!
//! Persistence is two-part: mutate the in-memory collection, then write
//! the whole collection back as one JSON array. If the write fails the
//! in-memory state is rolled back to the last persisted snapshot, so the
//! store never reports success for data that is not on disk.
//!
//! All operations are synchronous underneath (local storage) but exposed
//! as async to match the contract shared by the other adapters.

use std::sync::{Arc, Mutex};

use crate::error::{JotError, JotResult};
use crate::models::{Note, NoteDraft, NoteFields, NoteId};
use crate::storage::KeyValueStorage;

/// CRUD + soft-delete store for guest notes.
pub struct GuestStore {
    inner: Mutex<Inner>,
}

struct Inner {
    storage: Arc<dyn KeyValueStorage>,
    key: String,
    notes: Vec<Note>,
}

impl Inner {
    /// Write the whole collection back; on failure restore `snapshot`.
    fn persist_or_rollback(&mut self, snapshot: Vec<Note>) -> JotResult<()> {
        let result = serde_json::to_string(&self.notes)
            .map_err(JotError::from)
            .and_then(|payload| self.storage.set(&self.key, &payload));
        if let Err(e) = result {
            self.notes = snapshot;
            return Err(e);
        }
        Ok(())
    }

    fn position(&self, id: &NoteId) -> JotResult<usize> {
        self.notes
            .iter()
            .position(|n| &n.id == id)
            .ok_or_else(|| JotError::not_found(format!("guest note {}", id)))
    }
}

impl GuestStore {
    /// Open the store, loading any previously persisted collection.
    pub fn open(storage: Arc<dyn KeyValueStorage>, key: impl Into<String>) -> JotResult<Self> {
        let key = key.into();
        let notes = match storage.get(&key)? {
            Some(payload) => serde_json::from_str(&payload)?,
            None => Vec::new(),
        };
        Ok(Self {
            inner: Mutex::new(Inner {
                storage,
                key,
                notes,
            }),
        })
    }

    /// Create a new note with a fresh `guest-` id.
    pub async fn create(&self, draft: NoteDraft) -> JotResult<Note> {
        let mut inner = self.inner.lock().unwrap();
        let snapshot = inner.notes.clone();
        let note = Note::new_guest(draft);
        inner.notes.push(note.clone());
        inner.persist_or_rollback(snapshot)?;
        Ok(note)
    }

    /// Read a note by id.
    pub async fn read(&self, id: &NoteId) -> JotResult<Note> {
        let inner = self.inner.lock().unwrap();
        let pos = inner.position(id)?;
        Ok(inner.notes[pos].clone())
    }

    /// Apply a partial update.
    pub async fn update(&self, id: &NoteId, fields: &NoteFields) -> JotResult<Note> {
        let mut inner = self.inner.lock().unwrap();
        let snapshot = inner.notes.clone();
        let pos = inner.position(id)?;
        inner.notes[pos].apply_fields(fields);
        let note = inner.notes[pos].clone();
        inner.persist_or_rollback(snapshot)?;
        Ok(note)
    }

    /// Soft-delete a note. No-op if it is already in the trash.
    pub async fn move_to_trash(&self, id: &NoteId) -> JotResult<Note> {
        let mut inner = self.inner.lock().unwrap();
        let snapshot = inner.notes.clone();
        let pos = inner.position(id)?;
        if inner.notes[pos].deleted {
            return Ok(inner.notes[pos].clone());
        }
        inner.notes[pos].mark_deleted();
        let note = inner.notes[pos].clone();
        inner.persist_or_rollback(snapshot)?;
        Ok(note)
    }

    /// Restore a note from the trash. No-op if it is not deleted.
    pub async fn restore(&self, id: &NoteId) -> JotResult<Note> {
        let mut inner = self.inner.lock().unwrap();
        let snapshot = inner.notes.clone();
        let pos = inner.position(id)?;
        if !inner.notes[pos].deleted {
            return Ok(inner.notes[pos].clone());
        }
        inner.notes[pos].mark_restored();
        let note = inner.notes[pos].clone();
        inner.persist_or_rollback(snapshot)?;
        Ok(note)
    }

    /// Remove a note entirely. Irreversible.
    pub async fn permanently_delete(&self, id: &NoteId) -> JotResult<()> {
        let mut inner = self.inner.lock().unwrap();
        let snapshot = inner.notes.clone();
        let pos = inner.position(id)?;
        inner.notes.remove(pos);
        inner.persist_or_rollback(snapshot)
    }

    /// Remove every trashed note. Returns how many were removed.
    pub async fn empty_trash(&self) -> JotResult<usize> {
        let mut inner = self.inner.lock().unwrap();
        let snapshot = inner.notes.clone();
        let before = inner.notes.len();
        inner.notes.retain(|n| !n.deleted);
        let removed = before - inner.notes.len();
        if removed > 0 {
            inner.persist_or_rollback(snapshot)?;
        }
        Ok(removed)
    }

    /// List active (`deleted == false`) or trashed notes.
    pub async fn list(&self, deleted: bool) -> JotResult<Vec<Note>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .notes
            .iter()
            .filter(|n| n.deleted == deleted)
            .cloned()
            .collect())
    }
}
