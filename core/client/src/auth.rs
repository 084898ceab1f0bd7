//! Sign-in state and the UI gate built on it.
//!
//! The session itself belongs to an external authentication provider, which
//! this crate consumes through [`SessionProvider`]. [`TokenSession`] is a
//! ready-made provider for hosts that obtain bearer tokens themselves.
//! [`AuthGate`] decides whether storage actions are offered to the user; the
//! backend still enforces access on every call.

use chrono::{DateTime, Utc};
use futures::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::watch;
use tracing::info;

use skybucket_common::{Error, Result};

/// Source of the current caller's identity.
pub trait SessionProvider: Send + Sync {
    /// Bearer token of the signed-in user, or `None` when signed out.
    fn current_user_token(&self) -> Option<String>;

    /// Sign-in state notifications (`true` while signed in).
    fn watch(&self) -> watch::Receiver<bool>;
}

/// Tokens of a signed-in user.
#[derive(Clone, Serialize, Deserialize)]
pub struct Tokens {
    pub user_id: String,
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
}

impl Tokens {
    /// Check if the access token is no longer valid.
    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }
}

impl fmt::Debug for Tokens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tokens")
            .field("user_id", &self.user_id)
            .field("access_token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Session provider backed by tokens handed in by the host.
///
/// Expiry is observed lazily: an expired token reads as signed out and flips
/// the watched state on the next read.
pub struct TokenSession {
    tokens: RwLock<Option<Tokens>>,
    state: watch::Sender<bool>,
}

impl TokenSession {
    /// A signed-out session.
    pub fn new() -> Self {
        let (state, _) = watch::channel(false);
        Self {
            tokens: RwLock::new(None),
            state,
        }
    }

    /// A session already signed in with `tokens`.
    pub fn signed_in(tokens: Tokens) -> Self {
        let session = Self::new();
        session.sign_in(tokens);
        session
    }

    pub fn sign_in(&self, tokens: Tokens) {
        info!("User '{}' signed in", tokens.user_id);
        let signed_in = !tokens.is_expired();
        *self.tokens.write().unwrap_or_else(PoisonError::into_inner) = Some(tokens);
        self.publish(signed_in);
    }

    pub fn sign_out(&self) {
        let previous = self
            .tokens
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(tokens) = previous {
            info!("User '{}' signed out", tokens.user_id);
        }
        self.publish(false);
    }

    /// Replace the access token after the host refreshed it.
    ///
    /// # Errors
    /// - `Authentication` if nobody is signed in
    pub fn refresh(
        &self,
        access_token: impl Into<String>,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut guard = self.tokens.write().unwrap_or_else(PoisonError::into_inner);
        let tokens = guard
            .as_mut()
            .ok_or_else(|| Error::Authentication("Cannot refresh: not signed in".to_string()))?;
        tokens.access_token = access_token.into();
        tokens.expires_at = expires_at;
        let signed_in = !tokens.is_expired();
        drop(guard);

        self.publish(signed_in);
        Ok(())
    }

    fn publish(&self, signed_in: bool) {
        self.state.send_if_modified(|state| {
            let changed = *state != signed_in;
            *state = signed_in;
            changed
        });
    }
}

impl Default for TokenSession {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionProvider for TokenSession {
    fn current_user_token(&self) -> Option<String> {
        let token = self
            .tokens
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .filter(|t| !t.is_expired())
            .map(|t| t.access_token.clone());
        if token.is_none() {
            self.publish(false);
        }
        token
    }

    fn watch(&self) -> watch::Receiver<bool> {
        self.state.subscribe()
    }
}

/// Decides whether storage actions are exposed to the user.
#[derive(Clone)]
pub struct AuthGate {
    session: Arc<dyn SessionProvider>,
}

impl AuthGate {
    pub fn new(session: Arc<dyn SessionProvider>) -> Self {
        Self { session }
    }

    /// A gate over a session that is never signed in.
    pub fn anonymous() -> Self {
        Self::new(Arc::new(TokenSession::new()))
    }

    pub fn session(&self) -> &Arc<dyn SessionProvider> {
        &self.session
    }

    pub fn is_signed_in(&self) -> bool {
        self.session.current_user_token().is_some()
    }

    /// Run `render` only while signed in.
    pub fn when_signed_in<R>(&self, render: impl FnOnce() -> R) -> Option<R> {
        self.is_signed_in().then(render)
    }

    /// Run `render` while signed in, `fallback` otherwise.
    pub fn when_signed_in_or<R>(
        &self,
        render: impl FnOnce() -> R,
        fallback: impl FnOnce() -> R,
    ) -> R {
        if self.is_signed_in() {
            render()
        } else {
            fallback()
        }
    }

    /// Stream of sign-in state changes. Ends when the session goes away.
    pub fn changes(&self) -> impl Stream<Item = bool> + Send + 'static {
        stream::unfold(self.session.watch(), |mut rx| async move {
            rx.changed().await.ok()?;
            let signed_in = *rx.borrow_and_update();
            Some((signed_in, rx))
        })
    }

    /// Wait until the session reports a sign-in.
    ///
    /// # Errors
    /// - `Authentication` if the session provider is dropped first
    pub async fn wait_signed_in(&self) -> Result<()> {
        let mut rx = self.session.watch();
        rx.wait_for(|signed_in| *signed_in)
            .await
            .map(|_| ())
            .map_err(|_| Error::Authentication("Session provider closed".to_string()))
    }
}

impl fmt::Debug for AuthGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthGate")
            .field("signed_in", &self.is_signed_in())
            .finish()
    }
}
