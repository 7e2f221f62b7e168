//! Authenticated session lookup.
//!
//! Sync never runs without a session. The application decides where the
//! session comes from; the engine only asks for the current one.

use std::fmt;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use sync_types::UserId;

use crate::transport::RequestContext;

/// A signed-in user and the token used to authenticate sync calls.
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    /// The signed-in account.
    pub user_id: UserId,
    /// Bearer token for the sync server.
    pub access_token: String,
}

impl Session {
    /// A session for `user_id` authenticated by `access_token`.
    pub fn new(user_id: UserId, access_token: impl Into<String>) -> Self {
        Self {
            user_id,
            access_token: access_token.into(),
        }
    }

    /// Attach this session's token to a request context.
    pub fn authorize(&self, ctx: RequestContext) -> RequestContext {
        ctx.with_token(self.access_token.clone())
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("user_id", &self.user_id)
            .field("access_token", &"<redacted>")
            .finish()
    }
}

/// Source of the current session.
#[async_trait]
pub trait SessionProvider: Send + Sync {
    /// The current session, or `None` when signed out.
    async fn current_session(&self) -> Option<Session>;
}

/// A session held in memory. Clones share the same slot.
#[derive(Debug, Clone, Default)]
pub struct SharedSession {
    slot: Arc<Mutex<Option<Session>>>,
}

impl SharedSession {
    /// A signed-in provider.
    pub fn signed_in(session: Session) -> Self {
        let shared = Self::default();
        shared.sign_in(session);
        shared
    }

    /// A provider with no session.
    pub fn signed_out() -> Self {
        Self::default()
    }

    /// Replace the current session.
    pub fn sign_in(&self, session: Session) {
        *self.lock() = Some(session);
    }

    /// Drop the current session.
    pub fn sign_out(&self) {
        *self.lock() = None;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Session>> {
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl SessionProvider for SharedSession {
    async fn current_session(&self) -> Option<Session> {
        self.lock().clone()
    }
}
