//! Notebook facade.
//!
//! The single surface the UI and editor consume. The notebook holds the
//! in-memory projection (`notes` / `trashed_notes`), routes every
//! mutation to the backend its id names, and triggers reconciliation
//! when connectivity returns.
//!
//! Projection updates are optimistic: the in-memory state changes
//! before or alongside the backend write and is reverted if the write
//! fails with no offline fallback. When a remote write fails
//! transiently while the device is offline, the same logical write is
//! silently re-issued against the pending store instead: a note that
//! already has a remote id keeps it (shadow copy, update-on-sync); a
//! `local-` id is minted only for notes that have never synced.
//!
//! A notebook is an explicit, session-scoped context: `open` builds it,
//! `close` tears it down. There is no global state, so independent
//! sessions can coexist in one process.

use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;

use crate::connectivity::ConnectivityMonitor;
use crate::error::{JotError, JotResult};
use crate::guest_store::GuestStore;
use crate::models::{Note, NoteDraft, NoteFields, NoteId, NEW_NOTE_SENTINEL};
use crate::pending_store::PendingStore;
use crate::reconciler::{SyncReconciler, SyncReport};
use crate::remote_store::RemoteStore;
use crate::session::{AuthState, Session};
use crate::validation;

/// Called for each identity remap after a successful sync, so a view
/// addressing a note by its pending id (e.g. via a URL) can be silently
/// redirected to the new remote id without a reload.
pub type RemapHandler = Box<dyn Fn(&NoteId, &NoteId) + Send + Sync>;

struct Shared {
    notes: Vec<Note>,
    trashed: Vec<Note>,
    /// Last successfully fetched remote lists (active, trashed). Serves
    /// as the read fallback when a refresh fails transiently.
    remote_cache: Option<(Vec<Note>, Vec<Note>)>,
}

/// The public surface of the persistence engine. Cheap to clone; all
/// clones share the same projection and stores.
pub struct Notebook<R: RemoteStore> {
    session: Session,
    state: Arc<Mutex<Shared>>,
    guest: Arc<GuestStore>,
    pending: Arc<PendingStore>,
    remote: Arc<R>,
    connectivity: ConnectivityMonitor,
    listener: Arc<Mutex<Option<JoinHandle<()>>>>,
    remap_handler: Arc<Mutex<Option<RemapHandler>>>,
}

impl<R: RemoteStore> Clone for Notebook<R> {
    fn clone(&self) -> Self {
        Self {
            session: self.session.clone(),
            state: Arc::clone(&self.state),
            guest: Arc::clone(&self.guest),
            pending: Arc::clone(&self.pending),
            remote: Arc::clone(&self.remote),
            connectivity: self.connectivity.clone(),
            listener: Arc::clone(&self.listener),
            remap_handler: Arc::clone(&self.remap_handler),
        }
    }
}

impl<R: RemoteStore> Notebook<R> {
    /// Open a notebook for `session` and build the initial projection.
    pub async fn open(
        session: Session,
        guest: Arc<GuestStore>,
        pending: Arc<PendingStore>,
        remote: Arc<R>,
        connectivity: ConnectivityMonitor,
    ) -> JotResult<Self> {
        let notebook = Self {
            session,
            state: Arc::new(Mutex::new(Shared {
                notes: Vec::new(),
                trashed: Vec::new(),
                remote_cache: None,
            })),
            guest,
            pending,
            remote,
            connectivity,
            listener: Arc::new(Mutex::new(None)),
            remap_handler: Arc::new(Mutex::new(None)),
        };
        notebook.refresh().await?;
        Ok(notebook)
    }

    /// Tear the notebook down: stops the connectivity listener. In-flight
    /// backend calls are not cancelled; they complete or fail on their
    /// own and their results are dropped if the projection is gone.
    pub fn close(&self) {
        if let Some(handle) = self.listener.lock().unwrap().take() {
            handle.abort();
        }
    }

    /// Install the identity-remap callback.
    pub fn set_remap_handler(&self, handler: RemapHandler) {
        *self.remap_handler.lock().unwrap() = Some(handler);
    }

    /// Active notes, pinned first, most recently updated first.
    pub fn notes(&self) -> Vec<Note> {
        self.state.lock().unwrap().notes.clone()
    }

    /// Trashed notes, most recently updated first.
    pub fn trashed_notes(&self) -> Vec<Note> {
        self.state.lock().unwrap().trashed.clone()
    }

    /// Rebuild the projections from whichever backend is authoritative
    /// for the session: remote+pending union when authenticated, guest
    /// store in guest mode, empty otherwise.
    ///
    /// A transient remote failure falls back to the last successful
    /// remote fetch (plus the live pending store); if there has never
    /// been one and the device claims to be online, `Unavailable` is
    /// surfaced instead.
    pub async fn refresh(&self) -> JotResult<()> {
        match self.session.auth_state() {
            AuthState::SignedOut => {
                let mut state = self.state.lock().unwrap();
                state.notes.clear();
                state.trashed.clear();
                Ok(())
            }
            AuthState::Guest => {
                let mut active = self.guest.list(false).await?;
                let mut trashed = self.guest.list(true).await?;
                sort_notes(&mut active);
                sort_notes(&mut trashed);
                let mut state = self.state.lock().unwrap();
                state.notes = active;
                state.trashed = trashed;
                Ok(())
            }
            AuthState::Authenticated(user) => self.refresh_authenticated(&user).await,
        }
    }

    async fn refresh_authenticated(&self, user: &str) -> JotResult<()> {
        let fetched = match self.remote.query_by_owner(user, false).await {
            Ok(active) => match self.remote.query_by_owner(user, true).await {
                Ok(trashed) => Ok((active, trashed)),
                Err(e) => Err(e),
            },
            Err(e) => Err(e),
        };

        let (remote_active, remote_trashed) = match fetched {
            Ok(lists) => {
                let mut state = self.state.lock().unwrap();
                state.remote_cache = Some(lists.clone());
                lists
            }
            Err(e) if e.is_transient() => {
                tracing::warn!(error = %e, "remote refresh failed; using last known state");
                let cached = self.state.lock().unwrap().remote_cache.clone();
                match cached {
                    Some(lists) => lists,
                    None if !self.connectivity.is_online() => Default::default(),
                    None => return Err(JotError::Unavailable(e.to_string())),
                }
            }
            Err(e) => return Err(e),
        };

        let mut union: Vec<Note> = remote_active;
        union.extend(remote_trashed);

        // Pending entries are authoritative for their ids: shadows
        // override the remote copy, offline creations are appended.
        let mut pending_all = self.pending.list(false).await?;
        pending_all.extend(self.pending.list(true).await?);
        for note in pending_all {
            match union.iter().position(|n| n.id == note.id) {
                Some(pos) => union[pos] = note,
                None => union.push(note),
            }
        }

        let (mut trashed, mut active): (Vec<Note>, Vec<Note>) =
            union.into_iter().partition(|n| n.deleted);
        sort_notes(&mut active);
        sort_notes(&mut trashed);
        let mut state = self.state.lock().unwrap();
        state.notes = active;
        state.trashed = trashed;
        Ok(())
    }

    /// Create a note. Routes to the remote store when authenticated and
    /// online, the pending store when authenticated and offline, and the
    /// guest store in guest mode.
    pub async fn create(&self, draft: NoteDraft) -> JotResult<Note> {
        let draft = sanitize_draft(draft)?;

        let note = match self.session.auth_state() {
            AuthState::SignedOut => return Err(JotError::NotAuthenticated),
            AuthState::Guest => self.guest.create(draft).await?,
            AuthState::Authenticated(user) => {
                if self.connectivity.is_online() {
                    // Client timestamps as the optimistic value; the
                    // server overwrites them on success.
                    let optimistic = Note::new_pending(draft.clone(), &user);
                    match self.remote.create(&user, &optimistic).await {
                        Ok(note) => note,
                        Err(e) if e.is_transient() && !self.connectivity.is_online() => {
                            tracing::debug!(error = %e, "remote create failed offline; queueing");
                            self.pending.create(draft, &user).await?
                        }
                        Err(e) => return Err(e),
                    }
                } else {
                    self.pending.create(draft, &user).await?
                }
            }
        };

        self.file_into_projection(note.clone());
        Ok(note)
    }

    /// Fetch one note. The `"new"` sentinel yields a fresh empty
    /// template and never reaches an adapter; empty ids are rejected.
    pub async fn get(&self, raw_id: &str) -> JotResult<Note> {
        if raw_id == NEW_NOTE_SENTINEL {
            return Ok(self.template());
        }
        let id = NoteId::parse(raw_id)?;

        match &id {
            NoteId::Guest(_) => self.guest.read(&id).await,
            NoteId::Pending(_) => self.pending.read(&id).await,
            NoteId::Remote(remote_id) => {
                // A shadow copy, if present, holds edits newer than the
                // remote and must win.
                if self.pending.contains(&id).await {
                    return self.pending.read(&id).await;
                }
                let user = self.require_user()?;
                match self.remote.read(&user, remote_id).await {
                    Ok(note) => {
                        // Absorb server-assigned timestamps.
                        self.apply_confirmed(note.clone());
                        Ok(note)
                    }
                    Err(e) if e.is_transient() => self
                        .find_in_projection(&id)
                        .ok_or(JotError::Unavailable(e.to_string())),
                    Err(e) => Err(e),
                }
            }
        }
    }

    /// Apply a partial update.
    pub async fn update(&self, id: &NoteId, fields: NoteFields) -> JotResult<Note> {
        let fields = sanitize_fields(fields)?;
        if fields.is_empty() {
            return self
                .find_in_projection(id)
                .ok_or_else(|| JotError::not_found(format!("note {}", id)));
        }

        let snapshot = self.snapshot();
        let optimistic = self.optimistic_mutate(id, |note| note.apply_fields(&fields));

        let result = match &id {
            NoteId::Guest(_) => self.guest.update(id, &fields).await,
            NoteId::Pending(_) => self.pending.update(id, &fields).await,
            NoteId::Remote(remote_id) => {
                // An existing shadow already holds edits newer than the
                // remote; pile this one on top of it instead of racing
                // the remote copy.
                if self.pending.contains(id).await {
                    self.pending.update(id, &fields).await
                } else {
                    self.write_remote_or_shadow(id, optimistic.clone(), |user| {
                        let fields = fields.clone();
                        let remote = Arc::clone(&self.remote);
                        let remote_id = remote_id.clone();
                        async move { remote.update(&user, &remote_id, &fields).await }
                    })
                    .await
                }
            }
        };

        match result {
            Ok(note) => {
                self.apply_confirmed(note.clone());
                Ok(note)
            }
            Err(e) => {
                self.restore_snapshot(snapshot);
                Err(e)
            }
        }
    }

    /// Flip the pinned flag. Pinned state is independent of deletion
    /// state and survives trash/restore and sync.
    pub async fn toggle_pin(&self, id: &NoteId) -> JotResult<Note> {
        let current = match self.find_in_projection(id) {
            Some(note) => note,
            None => self.get(&id.to_string()).await?,
        };
        self.update(id, NoteFields::pinned(!current.pinned)).await
    }

    /// Soft-delete a note. No-op if it is already in the trash.
    pub async fn move_to_trash(&self, id: &NoteId) -> JotResult<Note> {
        let current = self.current_or_fetch(id).await?;
        if current.deleted {
            return Ok(current);
        }
        self.set_deleted_state(id, true).await
    }

    /// Restore a note from the trash. No-op if it is active.
    pub async fn restore_from_trash(&self, id: &NoteId) -> JotResult<Note> {
        let current = self.current_or_fetch(id).await?;
        if !current.deleted {
            return Ok(current);
        }
        self.set_deleted_state(id, false).await
    }

    async fn set_deleted_state(&self, id: &NoteId, deleted: bool) -> JotResult<Note> {
        let snapshot = self.snapshot();
        let optimistic = self.optimistic_mutate(id, |note| {
            if deleted {
                note.mark_deleted();
            } else {
                note.mark_restored();
            }
        });

        let result = match &id {
            NoteId::Guest(_) => {
                if deleted {
                    self.guest.move_to_trash(id).await
                } else {
                    self.guest.restore(id).await
                }
            }
            NoteId::Pending(_) => {
                if deleted {
                    self.pending.move_to_trash(id).await
                } else {
                    self.pending.restore(id).await
                }
            }
            NoteId::Remote(remote_id) => {
                if self.pending.contains(id).await {
                    if deleted {
                        self.pending.move_to_trash(id).await
                    } else {
                        self.pending.restore(id).await
                    }
                } else {
                    self.write_remote_or_shadow(id, optimistic.clone(), |user| {
                        let remote = Arc::clone(&self.remote);
                        let remote_id = remote_id.clone();
                        async move { remote.set_deleted(&user, &remote_id, deleted).await }
                    })
                    .await
                }
            }
        };

        match result {
            Ok(note) => {
                self.apply_confirmed(note.clone());
                Ok(note)
            }
            Err(e) => {
                self.restore_snapshot(snapshot);
                Err(e)
            }
        }
    }

    /// Remove a note forever. Only valid from the trash; irreversible.
    ///
    /// Permanent deletion of a remote-backed note needs connectivity:
    /// there is no pending representation of "gone forever", so a
    /// transient failure is surfaced and the optimistic change reverted.
    pub async fn permanently_delete(&self, id: &NoteId) -> JotResult<()> {
        let current = self.current_or_fetch(id).await?;
        if !current.deleted {
            return Err(JotError::validation(
                "note",
                "only trashed notes can be permanently deleted",
            ));
        }

        let snapshot = self.snapshot();
        self.remove_from_projection(id);

        let result = match &id {
            NoteId::Guest(_) => self.guest.permanently_delete(id).await,
            NoteId::Pending(_) => self.pending.permanently_delete(id).await,
            NoteId::Remote(remote_id) => {
                let user = self.require_user()?;
                match self.remote.delete(&user, remote_id).await {
                    Ok(()) => {
                        // Drop any shadow copy along with the remote note.
                        if self.pending.contains(id).await {
                            self.pending.permanently_delete(id).await?;
                        }
                        Ok(())
                    }
                    Err(e) => Err(e),
                }
            }
        };

        if let Err(e) = result {
            self.restore_snapshot(snapshot);
            return Err(e);
        }
        Ok(())
    }

    /// Permanently delete every trashed note. Best-effort over the
    /// remote store: local removals stick, remote failures are
    /// reconciled by a refresh, and the first error is surfaced.
    pub async fn empty_trash(&self) -> JotResult<usize> {
        match self.session.auth_state() {
            AuthState::SignedOut => Err(JotError::NotAuthenticated),
            AuthState::Guest => {
                let removed = self.guest.empty_trash().await?;
                self.state.lock().unwrap().trashed.clear();
                Ok(removed)
            }
            AuthState::Authenticated(user) => {
                let trashed = self.trashed_notes();
                let mut removed = 0;
                let mut first_error = None;

                for note in &trashed {
                    let result = match &note.id {
                        NoteId::Remote(remote_id) => {
                            match self.remote.delete(&user, remote_id).await {
                                Ok(()) | Err(JotError::NotFound(_)) => {
                                    if self.pending.contains(&note.id).await {
                                        self.pending.permanently_delete(&note.id).await.ok();
                                    }
                                    Ok(())
                                }
                                Err(e) => Err(e),
                            }
                        }
                        NoteId::Pending(_) => self.pending.permanently_delete(&note.id).await,
                        NoteId::Guest(_) => Ok(()),
                    };

                    match result {
                        Ok(()) => {
                            self.remove_from_projection(&note.id);
                            removed += 1;
                        }
                        Err(e) => {
                            tracing::warn!(id = %note.id, error = %e, "empty trash: entry failed");
                            if first_error.is_none() {
                                first_error = Some(e);
                            }
                        }
                    }
                }

                if let Some(e) = first_error {
                    // Bring the projection back in line with the backends.
                    if let Err(refresh_err) = self.refresh().await {
                        tracing::warn!(error = %refresh_err, "refresh after partial empty-trash failed");
                    }
                    return Err(e);
                }
                Ok(removed)
            }
        }
    }

    /// Drain the pending store into the remote store now, then refresh
    /// the projection. Remaps UI-held ids through the installed handler.
    pub async fn sync_now(&self) -> SyncReport {
        let user = match self.session.auth_state() {
            AuthState::Authenticated(user) => user,
            _ => return SyncReport::default(),
        };

        let reconciler =
            SyncReconciler::new(Arc::clone(&self.pending), Arc::clone(&self.remote), user);
        let report = reconciler.drain().await;

        if !report.remapped.is_empty() {
            {
                let mut state = self.state.lock().unwrap();
                let Shared { notes, trashed, .. } = &mut *state;
                for (old, new) in &report.remapped {
                    for note in notes.iter_mut().chain(trashed.iter_mut()) {
                        if &note.id == old {
                            note.id = new.clone();
                        }
                    }
                }
            }
            let handler = self.remap_handler.lock().unwrap();
            if let Some(handler) = handler.as_ref() {
                for (old, new) in &report.remapped {
                    handler(old, new);
                }
            }
        }

        // Absorb newly synced notes and drop the ones that failed to
        // appear. Reconciliation is background work, so a refresh
        // failure is logged, not surfaced.
        if let Err(e) = self.refresh().await {
            tracing::warn!(error = %e, "refresh after sync failed");
        }
        report
    }

    /// React to a connectivity-regained event.
    pub async fn handle_online(&self) -> SyncReport {
        tracing::info!("connectivity regained; reconciling pending writes");
        self.sync_now().await
    }

    // Internal helpers

    fn require_user(&self) -> JotResult<String> {
        match self.session.auth_state() {
            AuthState::Authenticated(user) => Ok(user),
            _ => Err(JotError::NotAuthenticated),
        }
    }

    /// A fresh unsaved note for the `"new"` sentinel. The id is a
    /// placeholder; `create` assigns the real one.
    fn template(&self) -> Note {
        match self.session.auth_state() {
            AuthState::Authenticated(user) => Note::new_pending(NoteDraft::default(), &user),
            _ => Note::new_guest(NoteDraft::default()),
        }
    }

    async fn current_or_fetch(&self, id: &NoteId) -> JotResult<Note> {
        match self.find_in_projection(id) {
            Some(note) => Ok(note),
            None => self.get(&id.to_string()).await,
        }
    }

    /// Issue a remote write, falling back to a pending shadow copy when
    /// it fails transiently while offline. The shadow keeps the note's
    /// remote id, so the reconciler later applies it as an update.
    async fn write_remote_or_shadow<F, Fut>(
        &self,
        id: &NoteId,
        optimistic: Option<Note>,
        write: F,
    ) -> JotResult<Note>
    where
        F: FnOnce(String) -> Fut,
        Fut: std::future::Future<Output = JotResult<Note>>,
    {
        let user = self.require_user()?;
        let shadow_note = optimistic.or_else(|| self.find_in_projection(id));

        if !self.connectivity.is_online() {
            let note =
                shadow_note.ok_or_else(|| JotError::not_found(format!("note {}", id)))?;
            return self.pending.enqueue_shadow(note).await;
        }

        match write(user).await {
            Err(e) if e.is_transient() && !self.connectivity.is_online() => match shadow_note {
                Some(note) => {
                    tracing::debug!(id = %id, error = %e, "remote write failed offline; queueing shadow");
                    self.pending.enqueue_shadow(note).await
                }
                None => Err(e),
            },
            other => other,
        }
    }

    fn snapshot(&self) -> (Vec<Note>, Vec<Note>) {
        let state = self.state.lock().unwrap();
        (state.notes.clone(), state.trashed.clone())
    }

    fn restore_snapshot(&self, snapshot: (Vec<Note>, Vec<Note>)) {
        let mut state = self.state.lock().unwrap();
        state.notes = snapshot.0;
        state.trashed = snapshot.1;
    }

    fn find_in_projection(&self, id: &NoteId) -> Option<Note> {
        let state = self.state.lock().unwrap();
        state
            .notes
            .iter()
            .chain(state.trashed.iter())
            .find(|n| &n.id == id)
            .cloned()
    }

    /// Apply a mutation to the projection copy of `id`, re-filing it
    /// between the active and trash lists as needed. Returns the
    /// mutated copy, if the note was present.
    fn optimistic_mutate(&self, id: &NoteId, f: impl FnOnce(&mut Note)) -> Option<Note> {
        let mut note = self.find_in_projection(id)?;
        f(&mut note);
        self.file_into_projection(note.clone());
        Some(note)
    }

    /// Replace the projection copy with a backend-confirmed note. Writes
    /// defensively: if the note is no longer in the projection (deleted
    /// or dropped while the call was in flight), the result is discarded.
    fn apply_confirmed(&self, note: Note) {
        let exists = {
            let state = self.state.lock().unwrap();
            state
                .notes
                .iter()
                .chain(state.trashed.iter())
                .any(|n| n.id == note.id)
        };
        if exists {
            self.file_into_projection(note);
        }
    }

    fn file_into_projection(&self, note: Note) {
        let mut state = self.state.lock().unwrap();
        state.notes.retain(|n| n.id != note.id);
        state.trashed.retain(|n| n.id != note.id);
        if note.deleted {
            state.trashed.push(note);
            sort_notes(&mut state.trashed);
        } else {
            state.notes.push(note);
            sort_notes(&mut state.notes);
        }
    }

    fn remove_from_projection(&self, id: &NoteId) {
        let mut state = self.state.lock().unwrap();
        state.notes.retain(|n| &n.id != id);
        state.trashed.retain(|n| &n.id != id);
    }
}

impl<R: RemoteStore + 'static> Notebook<R> {
    /// Spawn the background task that reconciles whenever connectivity
    /// comes back. Replaces any previously spawned listener.
    ///
    /// The watch channel coalesces rapid transitions: an offline/online
    /// flap between polls wakes the task exactly once, already online.
    /// So every wake that finds the link up triggers a reconciliation
    /// pass; draining an empty queue is idempotent and cheap.
    pub fn spawn_connectivity_listener(&self) {
        let notebook = self.clone();
        let mut rx = self.connectivity.subscribe();
        let handle = tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                if *rx.borrow_and_update() {
                    notebook.handle_online().await;
                }
            }
        });

        let mut listener = self.listener.lock().unwrap();
        if let Some(previous) = listener.replace(handle) {
            previous.abort();
        }
    }
}

/// Pinned notes first, then most recently updated.
fn sort_notes(notes: &mut [Note]) {
    notes.sort_by(|a, b| {
        b.pinned
            .cmp(&a.pinned)
            .then(b.updated_at.cmp(&a.updated_at))
    });
}

fn sanitize_draft(draft: NoteDraft) -> JotResult<NoteDraft> {
    validation::validate_title(&draft.title)?;
    validation::validate_content(&draft.content)?;
    Ok(NoteDraft {
        title: draft.title,
        content: validation::sanitize_content(&draft.content),
        pinned: draft.pinned,
    })
}

fn sanitize_fields(mut fields: NoteFields) -> JotResult<NoteFields> {
    if let Some(title) = &fields.title {
        validation::validate_title(title)?;
    }
    if let Some(content) = &fields.content {
        validation::validate_content(content)?;
        fields.content = Some(validation::sanitize_content(content));
    }
    Ok(fields)
}
