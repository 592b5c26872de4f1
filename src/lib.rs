//! JotCore - persistence and synchronization engine for the Jot note-taking app.
//!
//! This library provides the storage core behind the Jot UI:
//! - Data models (Note, NoteId, drafts and partial updates)
//! - Three note backends: guest (local, unauthenticated), pending
//!   (offline write-ahead queue) and remote (authoritative cloud store)
//! - Identity routing by id namespace (`guest-`, `local-`, bare remote)
//! - Sync reconciliation of offline writes, with id remapping
//! - The `Notebook` facade the UI talks to, with optimistic projection
//!   updates, offline fallback and debounced autosave
//!
//! This is a pure Rust library with no UI; embeddings construct a
//! `Notebook` per user session and render its projections.

pub mod config;
pub mod connectivity;
pub mod debounce;
pub mod error;
pub mod guest_store;
pub mod models;
pub mod notebook;
pub mod pending_store;
pub mod reconciler;
pub mod remote_store;
pub mod session;
pub mod storage;
pub mod validation;

// Re-export commonly used types
pub use config::JotConfig;
pub use connectivity::ConnectivityMonitor;
pub use debounce::DebouncedSaver;
pub use error::{JotError, JotResult};
pub use guest_store::GuestStore;
pub use models::{Backend, Note, NoteDraft, NoteFields, NoteId};
pub use notebook::Notebook;
pub use pending_store::PendingStore;
pub use reconciler::{SyncReconciler, SyncReport};
pub use remote_store::{HttpRemoteStore, MemoryRemoteStore, RemoteStore};
pub use session::{AuthState, Session};
pub use storage::{FileStorage, KeyValueStorage, MemoryStorage};
