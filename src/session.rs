//! Authentication session input.
//!
//! The session is supplied by the authentication provider and treated as
//! read-only by this crate: the notebook routes on it but never mutates it.

/// What the authentication provider knows about the current user.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    /// Present when the user is signed in.
    pub user_id: Option<String>,
    /// True when the user chose to use the app without an account.
    pub guest_mode: bool,
}

/// The session collapsed into the three states the engine routes on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthState {
    /// Signed in; remote store is authoritative (pending store while offline).
    Authenticated(String),
    /// Unauthenticated guest; the local guest store is authoritative.
    Guest,
    /// Neither signed in nor in guest mode; no backend accepts writes.
    SignedOut,
}

impl Session {
    /// A signed-in session for the given user.
    pub fn authenticated(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            guest_mode: false,
        }
    }

    /// An unauthenticated guest session.
    pub fn guest() -> Self {
        Self {
            user_id: None,
            guest_mode: true,
        }
    }

    /// A signed-out session with guest mode disabled.
    pub fn signed_out() -> Self {
        Self::default()
    }

    /// Collapse into the routing state. A signed-in user wins over guest
    /// mode if the provider ever reports both.
    pub fn auth_state(&self) -> AuthState {
        match (&self.user_id, self.guest_mode) {
            (Some(user), _) => AuthState::Authenticated(user.clone()),
            (None, true) => AuthState::Guest,
            (None, false) => AuthState::SignedOut,
        }
    }
}
