//! Data models for Jot.
//!
//! This module defines the core entities: the namespaced note identifier,
//! the note itself, and the payloads used for creation and partial update.
//!
//! A note id carries its backend in the type. The three namespaces are
//! disjoint: a `guest-` prefixed id belongs to the local guest store, a
//! `local-` prefixed id belongs to the pending store (awaiting sync), and
//! any other non-empty string is an id assigned by the remote document
//! store. Routing on the enum is exhaustive, so a mutation can never be
//! dispatched to the wrong backend.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use crate::error::{JotError, JotResult};

/// Prefix for guest-store note ids.
pub const GUEST_ID_PREFIX: &str = "guest-";
/// Prefix for pending-store note ids.
pub const PENDING_ID_PREFIX: &str = "local-";

/// Sentinel id meaning "no note yet". It is never stored and never
/// reaches an adapter; the facade short-circuits it into a fresh
/// template before routing.
pub const NEW_NOTE_SENTINEL: &str = "new";

/// The backend a note id belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Guest,
    Pending,
    Remote,
}

/// A namespaced note identifier.
///
/// Exactly one backend is authoritative for each id at any instant. An id
/// transitions namespace at most once, from `Pending` to `Remote`, when
/// the reconciler confirms remote persistence.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NoteId {
    /// A note in the unauthenticated guest store, never synced.
    Guest(Uuid),
    /// A note created or edited while authenticated but offline,
    /// awaiting reconciliation.
    Pending(Uuid),
    /// A note owned by the remote document store.
    Remote(String),
}

impl NoteId {
    /// Mint a fresh guest-store id.
    pub fn new_guest() -> Self {
        NoteId::Guest(Uuid::now_v7())
    }

    /// Mint a fresh pending-store id.
    pub fn new_pending() -> Self {
        NoteId::Pending(Uuid::now_v7())
    }

    /// Classify this id into its backend.
    pub fn backend(&self) -> Backend {
        match self {
            NoteId::Guest(_) => Backend::Guest,
            NoteId::Pending(_) => Backend::Pending,
            NoteId::Remote(_) => Backend::Remote,
        }
    }

    /// Parse an id string into its namespace.
    ///
    /// Rules: `guest-` prefix means guest store, `local-` prefix means
    /// pending store, any other non-empty string is a remote id. Empty
    /// strings and the `"new"` sentinel are rejected; the sentinel must
    /// be handled by the caller before routing.
    pub fn parse(s: &str) -> JotResult<Self> {
        if s.is_empty() {
            return Err(JotError::InvalidIdentifier("empty id".to_string()));
        }
        if s == NEW_NOTE_SENTINEL {
            return Err(JotError::InvalidIdentifier(
                "the 'new' sentinel is not a stored id".to_string(),
            ));
        }

        if let Some(rest) = s.strip_prefix(GUEST_ID_PREFIX) {
            let uuid = Uuid::parse_str(rest)
                .map_err(|_| JotError::InvalidIdentifier(format!("malformed guest id: {}", s)))?;
            return Ok(NoteId::Guest(uuid));
        }

        if let Some(rest) = s.strip_prefix(PENDING_ID_PREFIX) {
            let uuid = Uuid::parse_str(rest)
                .map_err(|_| JotError::InvalidIdentifier(format!("malformed pending id: {}", s)))?;
            return Ok(NoteId::Pending(uuid));
        }

        Ok(NoteId::Remote(s.to_string()))
    }
}

impl fmt::Display for NoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NoteId::Guest(uuid) => write!(f, "{}{}", GUEST_ID_PREFIX, uuid.simple()),
            NoteId::Pending(uuid) => write!(f, "{}{}", PENDING_ID_PREFIX, uuid.simple()),
            NoteId::Remote(id) => f.write_str(id),
        }
    }
}

impl FromStr for NoteId {
    type Err = JotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NoteId::parse(s)
    }
}

impl Serialize for NoteId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for NoteId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        NoteId::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// A note.
///
/// Notes carry a soft-delete marker (`deleted` / `deleted_at`) so they
/// can move between the active list and the trash without losing data.
/// Pinned state is independent of deletion state and survives both
/// trash/restore cycles and sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    pub id: NoteId,
    pub title: String,
    /// Sanitized rich-text/HTML content.
    pub content: String,
    #[serde(default)]
    pub pinned: bool,
    #[serde(default)]
    pub deleted: bool,
    /// When the note was moved to the trash (None if active).
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    /// Last modification time. Server-assigned for synced remote notes;
    /// a client-side approximation otherwise.
    pub updated_at: DateTime<Utc>,
    /// Owner of the note. Present only for remote-backed notes.
    #[serde(default)]
    pub user_id: Option<String>,
}

impl Note {
    /// Create a new guest-store note from a draft.
    pub fn new_guest(draft: NoteDraft) -> Self {
        Self::from_draft(NoteId::new_guest(), draft, None)
    }

    /// Create a new pending-store note from a draft.
    pub fn new_pending(draft: NoteDraft, user_id: &str) -> Self {
        Self::from_draft(NoteId::new_pending(), draft, Some(user_id.to_string()))
    }

    fn from_draft(id: NoteId, draft: NoteDraft, user_id: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            title: draft.title,
            content: draft.content,
            pinned: draft.pinned,
            deleted: false,
            deleted_at: None,
            created_at: now,
            updated_at: now,
            user_id,
        }
    }

    /// Check if the note is in the trash
    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    /// Apply a partial update in place, bumping `updated_at`.
    pub fn apply_fields(&mut self, fields: &NoteFields) {
        if let Some(title) = &fields.title {
            self.title = title.clone();
        }
        if let Some(content) = &fields.content {
            self.content = content.clone();
        }
        if let Some(pinned) = fields.pinned {
            self.pinned = pinned;
        }
        self.updated_at = Utc::now();
    }

    /// Mark the note as trashed. Idempotent.
    pub fn mark_deleted(&mut self) {
        if !self.deleted {
            self.deleted = true;
            self.deleted_at = Some(Utc::now());
            self.updated_at = Utc::now();
        }
    }

    /// Restore the note from the trash. Idempotent. Pinned state is
    /// left untouched.
    pub fn mark_restored(&mut self) {
        if self.deleted {
            self.deleted = false;
            self.deleted_at = None;
            self.updated_at = Utc::now();
        }
    }
}

/// Payload for creating a note.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NoteDraft {
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub pinned: bool,
}

impl NoteDraft {
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
            pinned: false,
        }
    }
}

/// A partial update to a note. Fields left as `None` are untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteFields {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pinned: Option<bool>,
}

impl NoteFields {
    pub fn title(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..Default::default()
        }
    }

    pub fn content(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Default::default()
        }
    }

    pub fn pinned(pinned: bool) -> Self {
        Self {
            pinned: Some(pinned),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.content.is_none() && self.pinned.is_none()
    }

    /// Merge another partial update over this one. Fields set in `other`
    /// win; fields it leaves out keep their current value.
    pub fn merge(&mut self, other: &NoteFields) {
        if other.title.is_some() {
            self.title = other.title.clone();
        }
        if other.content.is_some() {
            self.content = other.content.clone();
        }
        if other.pinned.is_some() {
            self.pinned = other.pinned;
        }
    }
}

/// A pending-store entry: a note plus its sync bookkeeping.
///
/// Entries keyed by a `Pending` id have never been synced and reconcile
/// as a remote create. Entries keyed by a `Remote` id are shadow copies
/// written when a remote write failed offline; they reconcile as a
/// remote update against that same id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingEntry {
    pub note: Note,
    /// True until the reconciler confirms remote persistence.
    pub needs_sync: bool,
    /// Set while a reconciliation attempt for this entry is in flight.
    /// Runtime-only: reset when the store is loaded from disk.
    #[serde(default, skip_serializing)]
    pub syncing: bool,
    /// Set when a user mutation lands while the entry is syncing. The
    /// entry is then retained after a successful sync, re-keyed to the
    /// new remote id, so the concurrent edit is applied on the next
    /// pass instead of being lost. Runtime-only.
    #[serde(default, skip_serializing)]
    pub dirty: bool,
}

impl PendingEntry {
    pub fn new(note: Note) -> Self {
        Self {
            note,
            needs_sync: true,
            syncing: false,
            dirty: false,
        }
    }
}
