//! Remote document store adapter.
//!
//! The remote store is the durable source of truth for authenticated,
//! synced notes. This module defines the trait boundary the engine
//! consumes, plus two implementations:
//! - `HttpRemoteStore`: JSON over HTTP against the Jot API
//! - `MemoryRemoteStore`: in-memory backend for tests and local
//!   development, with failure injection
//!
//! Ownership is checked on every read and write: a note whose owner does
//! not match the caller's session is reported as `NotFound`, never as a
//! permission error, so callers cannot probe for other users' notes.
//!
//! Timestamps are server-assigned on write. Client timestamps are only
//! an optimistic approximation and are overwritten by the next
//! successful read.

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use crate::error::{JotError, JotResult};
use crate::models::{Note, NoteFields, NoteId};

/// Operations the engine needs from the remote document store.
pub trait RemoteStore: Send + Sync {
    /// Persist a new note for `user_id`. The store assigns the id and
    /// the `updated_at` timestamp; `note.created_at` is preserved so
    /// offline-created notes keep their original creation time. The
    /// note's local id is ignored.
    fn create(&self, user_id: &str, note: &Note) -> impl Future<Output = JotResult<Note>> + Send;

    /// Fetch a note by remote id, enforcing ownership.
    fn read(&self, user_id: &str, id: &str) -> impl Future<Output = JotResult<Note>> + Send;

    /// Apply a partial update, enforcing ownership. Returns the stored
    /// note with server-assigned timestamps.
    fn update(
        &self,
        user_id: &str,
        id: &str,
        fields: &NoteFields,
    ) -> impl Future<Output = JotResult<Note>> + Send;

    /// Set or clear the soft-delete flag, enforcing ownership.
    fn set_deleted(
        &self,
        user_id: &str,
        id: &str,
        deleted: bool,
    ) -> impl Future<Output = JotResult<Note>> + Send;

    /// Permanently delete a note, enforcing ownership. Irreversible.
    fn delete(&self, user_id: &str, id: &str) -> impl Future<Output = JotResult<()>> + Send;

    /// All notes owned by `user_id` with the given deletion state.
    fn query_by_owner(
        &self,
        user_id: &str,
        deleted: bool,
    ) -> impl Future<Output = JotResult<Vec<Note>>> + Send;
}

// Wire types for the HTTP backend.

#[derive(Debug, Serialize)]
struct CreateNoteRequest<'a> {
    title: &'a str,
    content: &'a str,
    pinned: bool,
    deleted: bool,
    deleted_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
struct PatchNoteRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    title: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pinned: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    deleted: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct NoteResponse {
    id: String,
    title: String,
    content: String,
    pinned: bool,
    deleted: bool,
    deleted_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    user_id: String,
}

impl NoteResponse {
    fn into_note(self) -> Note {
        Note {
            id: NoteId::Remote(self.id),
            title: self.title,
            content: self.content,
            pinned: self.pinned,
            deleted: self.deleted,
            deleted_at: self.deleted_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
            user_id: Some(self.user_id),
        }
    }
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    notes: Vec<NoteResponse>,
}

/// JSON-over-HTTP remote store client.
pub struct HttpRemoteStore {
    client: Client,
    base_url: String,
}

impl HttpRemoteStore {
    /// Create a client against `base_url` (no trailing slash needed).
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> JotResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| JotError::network(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn notes_url(&self, user_id: &str) -> String {
        format!(
            "{}/users/{}/notes",
            self.base_url,
            urlencoding::encode(user_id)
        )
    }

    fn note_url(&self, user_id: &str, id: &str) -> String {
        format!("{}/{}", self.notes_url(user_id), urlencoding::encode(id))
    }

    async fn parse_note(response: reqwest::Response, id: &str) -> JotResult<Note> {
        let response = check_status(response, id)?;
        let body: NoteResponse = response
            .json()
            .await
            .map_err(|e| JotError::network(format!("invalid response body: {}", e)))?;
        Ok(body.into_note())
    }
}

fn check_status(response: reqwest::Response, id: &str) -> JotResult<reqwest::Response> {
    match response.status() {
        status if status.is_success() => Ok(response),
        // The server reports ownership mismatches as 404 already; fold
        // 403 into not-found as well so no existence signal leaks.
        StatusCode::NOT_FOUND | StatusCode::FORBIDDEN => {
            Err(JotError::not_found(format!("remote note {}", id)))
        }
        StatusCode::UNAUTHORIZED => Err(JotError::NotAuthenticated),
        status => Err(JotError::network(format!("unexpected status {}", status))),
    }
}

impl RemoteStore for HttpRemoteStore {
    async fn create(&self, user_id: &str, note: &Note) -> JotResult<Note> {
        let request = CreateNoteRequest {
            title: &note.title,
            content: &note.content,
            pinned: note.pinned,
            deleted: note.deleted,
            deleted_at: note.deleted_at,
            created_at: note.created_at,
        };

        let response = self
            .client
            .post(self.notes_url(user_id))
            .json(&request)
            .send()
            .await
            .map_err(|e| JotError::network(e.to_string()))?;

        Self::parse_note(response, "(new)").await
    }

    async fn read(&self, user_id: &str, id: &str) -> JotResult<Note> {
        let response = self
            .client
            .get(self.note_url(user_id, id))
            .send()
            .await
            .map_err(|e| JotError::network(e.to_string()))?;

        Self::parse_note(response, id).await
    }

    async fn update(&self, user_id: &str, id: &str, fields: &NoteFields) -> JotResult<Note> {
        let request = PatchNoteRequest {
            title: fields.title.as_deref(),
            content: fields.content.as_deref(),
            pinned: fields.pinned,
            deleted: None,
        };

        let response = self
            .client
            .patch(self.note_url(user_id, id))
            .json(&request)
            .send()
            .await
            .map_err(|e| JotError::network(e.to_string()))?;

        Self::parse_note(response, id).await
    }

    async fn set_deleted(&self, user_id: &str, id: &str, deleted: bool) -> JotResult<Note> {
        let request = PatchNoteRequest {
            title: None,
            content: None,
            pinned: None,
            deleted: Some(deleted),
        };

        let response = self
            .client
            .patch(self.note_url(user_id, id))
            .json(&request)
            .send()
            .await
            .map_err(|e| JotError::network(e.to_string()))?;

        Self::parse_note(response, id).await
    }

    async fn delete(&self, user_id: &str, id: &str) -> JotResult<()> {
        let response = self
            .client
            .delete(self.note_url(user_id, id))
            .send()
            .await
            .map_err(|e| JotError::network(e.to_string()))?;

        check_status(response, id)?;
        Ok(())
    }

    async fn query_by_owner(&self, user_id: &str, deleted: bool) -> JotResult<Vec<Note>> {
        let url = format!("{}?deleted={}", self.notes_url(user_id), deleted);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| JotError::network(e.to_string()))?;

        let response = check_status(response, "(query)")?;
        let body: QueryResponse = response
            .json()
            .await
            .map_err(|e| JotError::network(format!("invalid response body: {}", e)))?;

        Ok(body.notes.into_iter().map(NoteResponse::into_note).collect())
    }
}

mod memory {
    //! In-memory remote store for tests and local development.

    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;

    use chrono::Utc;
    use uuid::Uuid;

    use super::RemoteStore;
    use crate::error::{JotError, JotResult};
    use crate::models::{Note, NoteFields, NoteId};

    /// In-memory `RemoteStore`.
    ///
    /// Failure modes can be injected: `set_online(false)` makes every
    /// call fail with a network error; `fail_create_with_title` makes
    /// creates for specific titles fail, which is how the partial-batch
    /// reconciliation behavior is exercised.
    #[derive(Default)]
    pub struct MemoryRemoteStore {
        inner: Mutex<Inner>,
    }

    #[derive(Default)]
    struct Inner {
        notes: HashMap<String, Note>,
        offline: bool,
        fail_create_titles: HashSet<String>,
    }

    impl MemoryRemoteStore {
        pub fn new() -> Self {
            Self::default()
        }

        /// Simulate losing or regaining server reachability.
        pub fn set_online(&self, online: bool) {
            self.inner.lock().unwrap().offline = !online;
        }

        /// Make `create` fail with a network error for notes with this
        /// title.
        pub fn fail_create_with_title(&self, title: impl Into<String>) {
            self.inner
                .lock()
                .unwrap()
                .fail_create_titles
                .insert(title.into());
        }

        /// Number of stored notes, active and trashed.
        pub fn note_count(&self) -> usize {
            self.inner.lock().unwrap().notes.len()
        }
    }

    impl Inner {
        fn check_reachable(&self) -> JotResult<()> {
            if self.offline {
                return Err(JotError::network("server unreachable"));
            }
            Ok(())
        }

        fn owned(&mut self, user_id: &str, id: &str) -> JotResult<&mut Note> {
            match self.notes.get_mut(id) {
                Some(note) if note.user_id.as_deref() == Some(user_id) => Ok(note),
                // Wrong owner and unknown id look identical to the caller.
                _ => Err(JotError::not_found(format!("remote note {}", id))),
            }
        }
    }

    impl RemoteStore for MemoryRemoteStore {
        async fn create(&self, user_id: &str, note: &Note) -> JotResult<Note> {
            let mut inner = self.inner.lock().unwrap();
            inner.check_reachable()?;
            if inner.fail_create_titles.contains(&note.title) {
                return Err(JotError::network("injected create failure"));
            }

            let id = Uuid::now_v7().simple().to_string();
            let mut stored = note.clone();
            stored.id = NoteId::Remote(id.clone());
            stored.user_id = Some(user_id.to_string());
            stored.updated_at = Utc::now();
            inner.notes.insert(id, stored.clone());
            Ok(stored)
        }

        async fn read(&self, user_id: &str, id: &str) -> JotResult<Note> {
            let mut inner = self.inner.lock().unwrap();
            inner.check_reachable()?;
            inner.owned(user_id, id).map(|n| n.clone())
        }

        async fn update(&self, user_id: &str, id: &str, fields: &NoteFields) -> JotResult<Note> {
            let mut inner = self.inner.lock().unwrap();
            inner.check_reachable()?;
            let note = inner.owned(user_id, id)?;
            note.apply_fields(fields);
            Ok(note.clone())
        }

        async fn set_deleted(&self, user_id: &str, id: &str, deleted: bool) -> JotResult<Note> {
            let mut inner = self.inner.lock().unwrap();
            inner.check_reachable()?;
            let note = inner.owned(user_id, id)?;
            if deleted {
                note.mark_deleted();
            } else {
                note.mark_restored();
            }
            Ok(note.clone())
        }

        async fn delete(&self, user_id: &str, id: &str) -> JotResult<()> {
            let mut inner = self.inner.lock().unwrap();
            inner.check_reachable()?;
            inner.owned(user_id, id)?;
            inner.notes.remove(id);
            Ok(())
        }

        async fn query_by_owner(&self, user_id: &str, deleted: bool) -> JotResult<Vec<Note>> {
            let inner = self.inner.lock().unwrap();
            inner.check_reachable()?;
            let mut notes: Vec<Note> = inner
                .notes
                .values()
                .filter(|n| n.user_id.as_deref() == Some(user_id) && n.deleted == deleted)
                .cloned()
                .collect();
            notes.sort_by(|a, b| a.created_at.cmp(&b.created_at));
            Ok(notes)
        }
    }
}

pub use memory::MemoryRemoteStore;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NoteDraft;

    fn draft_note(title: &str, user: &str) -> Note {
        Note::new_pending(NoteDraft::new(title, "content"), user)
    }

    #[tokio::test]
    async fn test_memory_create_assigns_remote_id() {
        let store = MemoryRemoteStore::new();
        let created = store.create("u1", &draft_note("A", "u1")).await.unwrap();

        let id = match &created.id {
            NoteId::Remote(id) => id.clone(),
            other => panic!("expected remote id, got {:?}", other),
        };
        assert!(!id.starts_with("local-") && !id.starts_with("guest-"));
        assert_eq!(created.user_id.as_deref(), Some("u1"));
    }

    #[tokio::test]
    async fn test_memory_preserves_created_timestamp() {
        let store = MemoryRemoteStore::new();
        let note = draft_note("A", "u1");
        let created = store.create("u1", &note).await.unwrap();
        assert_eq!(created.created_at, note.created_at);
        assert!(created.updated_at >= note.updated_at);
    }

    #[tokio::test]
    async fn test_ownership_mismatch_reports_not_found() {
        let store = MemoryRemoteStore::new();
        let created = store.create("alice", &draft_note("A", "alice")).await.unwrap();
        let id = created.id.to_string();

        let err = store.read("mallory", &id).await.unwrap_err();
        assert!(matches!(err, JotError::NotFound(_)));
        let err = store
            .update("mallory", &id, &NoteFields::title("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, JotError::NotFound(_)));
        let err = store.delete("mallory", &id).await.unwrap_err();
        assert!(matches!(err, JotError::NotFound(_)));

        // Owner still sees it.
        assert!(store.read("alice", &id).await.is_ok());
    }

    #[tokio::test]
    async fn test_query_by_owner_filters_deleted_flag() {
        let store = MemoryRemoteStore::new();
        let a = store.create("u1", &draft_note("A", "u1")).await.unwrap();
        store.create("u1", &draft_note("B", "u1")).await.unwrap();
        store.create("u2", &draft_note("C", "u2")).await.unwrap();

        store
            .set_deleted("u1", &a.id.to_string(), true)
            .await
            .unwrap();

        let active = store.query_by_owner("u1", false).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].title, "B");

        let trashed = store.query_by_owner("u1", true).await.unwrap();
        assert_eq!(trashed.len(), 1);
        assert_eq!(trashed[0].title, "A");
        assert!(trashed[0].deleted_at.is_some());
    }

    #[tokio::test]
    async fn test_offline_injection() {
        let store = MemoryRemoteStore::new();
        store.set_online(false);
        let err = store.create("u1", &draft_note("A", "u1")).await.unwrap_err();
        assert!(err.is_transient());

        store.set_online(true);
        assert!(store.create("u1", &draft_note("A", "u1")).await.is_ok());
    }

    #[tokio::test]
    async fn test_create_failure_injection_by_title() {
        let store = MemoryRemoteStore::new();
        store.fail_create_with_title("poison");

        assert!(store.create("u1", &draft_note("poison", "u1")).await.is_err());
        assert!(store.create("u1", &draft_note("fine", "u1")).await.is_ok());
        assert_eq!(store.note_count(), 1);
    }

    #[test]
    fn test_http_store_url_shapes() {
        let store = HttpRemoteStore::new("https://api.jot.example/", Duration::from_secs(5)).unwrap();
        assert_eq!(
            store.notes_url("u 1"),
            "https://api.jot.example/users/u%201/notes"
        );
        assert_eq!(
            store.note_url("u1", "abc/123"),
            "https://api.jot.example/users/u1/notes/abc%2F123"
        );
    }
}
