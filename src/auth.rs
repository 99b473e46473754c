use crate::error::{PipelineError, Result};
use crate::gate::{RunGate, RunTicket};
use crate::identity::IdentityProvider;
use crate::model::SessionToken;
use crate::store::SessionStore;
use chrono::Utc;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// What to do with a token found in the store at process start
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestorePolicy {
    /// Enter `SignedIn` without asking the provider
    #[default]
    Trust,

    /// Check the token with the provider first; drop it if rejected or expired
    Validate,
}

/// Observable authentication state
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum AuthStatus {
    SignedOut,
    Authenticating,
    SignedIn,
    /// The handshake succeeded but the session could not be kept
    Error(String),
}

enum AuthState {
    SignedOut,
    Authenticating,
    SignedIn(SessionToken),
    Error(String),
}

impl AuthState {
    fn status(&self) -> AuthStatus {
        match self {
            AuthState::SignedOut => AuthStatus::SignedOut,
            AuthState::Authenticating => AuthStatus::Authenticating,
            AuthState::SignedIn(_) => AuthStatus::SignedIn,
            AuthState::Error(message) => AuthStatus::Error(message.clone()),
        }
    }
}

/// Owns sign-in and sign-out state
///
/// The manager is the only owner of the session token. It also owns the
/// [`RunGate`], because signing out must cancel any run still using the token.
pub struct AuthSessionManager<S, I> {
    store: S,
    identity: I,
    policy: RestorePolicy,
    state: Mutex<AuthState>,
    gate: RunGate,
}

impl<S: SessionStore, I: IdentityProvider> AuthSessionManager<S, I> {
    /// Create a signed-out manager
    ///
    /// # Arguments
    /// * `store` - Persistence for the token
    /// * `identity` - The provider's sign-in capability
    pub fn new(store: S, identity: I) -> Self {
        AuthSessionManager {
            store,
            identity,
            policy: RestorePolicy::default(),
            state: Mutex::new(AuthState::SignedOut),
            gate: RunGate::new(),
        }
    }

    pub fn with_restore_policy(mut self, policy: RestorePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn identity(&self) -> &I {
        &self.identity
    }

    fn lock_state(&self) -> MutexGuard<'_, AuthState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn status(&self) -> AuthStatus {
        self.lock_state().status()
    }

    /// Pick up a session persisted by an earlier process
    ///
    /// With [`RestorePolicy::Trust`] a stored token is accepted as is. With
    /// [`RestorePolicy::Validate`] the provider is asked first, and a rejected
    /// or expired token is removed from the store.
    ///
    /// # Returns
    /// * `Result<AuthStatus>` - The state after restoring
    ///
    /// # Errors
    /// * `PersistenceFailure` if the store cannot be read; the manager stays signed out
    /// * `AuthFailure` if the provider could not be asked; the stored token is
    ///   kept and the manager stays signed out
    pub async fn restore(&self) -> Result<AuthStatus> {
        let Some(token) = self.store.get()? else {
            debug!("no persisted session");
            return Ok(self.status());
        };

        let accepted = match self.policy {
            RestorePolicy::Trust => {
                debug!("restoring persisted session without re-validation");
                true
            }
            RestorePolicy::Validate => {
                let mut ticket = self.gate.current();
                if token.is_expired(Utc::now()) {
                    false
                } else {
                    match ticket.guard(self.identity.validate(&token)).await {
                        Some(Ok(valid)) => valid,
                        // Unreachable provider: keep the token for a later attempt.
                        Some(Err(e)) => {
                            warn!("could not validate persisted session: {}", e);
                            return Err(PipelineError::Auth(format!(
                                "could not validate persisted session: {}",
                                e
                            )));
                        }
                        // Signed out while validating.
                        None => return Ok(self.status()),
                    }
                }
            }
        };

        if !accepted {
            info!("persisted session rejected; signing out");
            *self.lock_state() = AuthState::SignedOut;
            self.store.remove()?;
            return Ok(AuthStatus::SignedOut);
        }

        let mut state = self.lock_state();
        if matches!(*state, AuthState::SignedOut) {
            *state = AuthState::SignedIn(token);
        }
        Ok(state.status())
    }

    /// Sign in outside of a pipeline run
    pub async fn sign_in(&self) -> Result<SessionToken> {
        let mut ticket = self.gate.current();
        self.sign_in_for(&mut ticket).await
    }

    /// Sign in on behalf of the run holding `ticket`
    ///
    /// `SignedOut` or `Error` moves to `Authenticating` and the provider's
    /// handshake runs. On success the token is persisted and the manager is
    /// `SignedIn`; on failure it is `SignedOut` again. If the ticket is
    /// superseded while the handshake is suspended, its result is discarded
    /// and the state is left to whoever superseded it.
    ///
    /// # Arguments
    /// * `ticket` - The run the handshake belongs to
    ///
    /// # Returns
    /// * `Result<SessionToken>` - The new token, or the current one if already signed in
    ///
    /// # Errors
    /// * `AuthFailure` if the handshake fails, is cancelled, is superseded, or
    ///   another handshake is in progress
    /// * `PersistenceFailure` if the token cannot be stored (state becomes `Error`)
    pub async fn sign_in_for(&self, ticket: &mut RunTicket) -> Result<SessionToken> {
        {
            let mut state = self.lock_state();
            match &*state {
                AuthState::SignedIn(token) => return Ok(token.clone()),
                AuthState::Authenticating => {
                    return Err(PipelineError::Auth("sign-in already in progress".into()));
                }
                AuthState::SignedOut | AuthState::Error(_) => *state = AuthState::Authenticating,
            }
        }

        info!("starting sign-in");
        let token = match ticket.guard(self.identity.sign_in()).await {
            Some(Ok(token)) => token,
            Some(Err(e)) => {
                warn!("sign-in failed: {}", e);
                *self.lock_state() = AuthState::SignedOut;
                return Err(match e {
                    PipelineError::Auth(message) => PipelineError::Auth(message),
                    other => PipelineError::Auth(other.to_string()),
                });
            }
            None => {
                info!("sign-in superseded; discarding handshake result");
                return Err(PipelineError::Auth("sign-in superseded".into()));
            }
        };

        let mut state = self.lock_state();
        if let Err(e) = self.store.set(&token) {
            *state = AuthState::Error(e.to_string());
            return Err(e);
        }
        *state = AuthState::SignedIn(token.clone());
        info!("signed in");
        Ok(token)
    }

    /// Sign out unconditionally
    ///
    /// Any in-flight run is invalidated first, then the state becomes
    /// `SignedOut`, then the persisted token is cleared.
    ///
    /// # Returns
    /// * `Result<Option<SessionToken>>` - The token that was active, so the
    ///   caller can revoke it with the provider
    ///
    /// # Errors
    /// * `PersistenceFailure` if the stored token could not be removed; the
    ///   manager is signed out regardless
    pub fn sign_out(&self) -> Result<Option<SessionToken>> {
        self.gate.invalidate();
        let previous = std::mem::replace(&mut *self.lock_state(), AuthState::SignedOut);
        self.store.remove()?;
        info!("signed out");
        Ok(match previous {
            AuthState::SignedIn(token) => Some(token),
            _ => None,
        })
    }

    /// The active token
    ///
    /// # Errors
    /// * `NotAuthenticated` unless the manager is `SignedIn`
    pub fn current_token(&self) -> Result<SessionToken> {
        match &*self.lock_state() {
            AuthState::SignedIn(token) => Ok(token.clone()),
            _ => Err(PipelineError::NotAuthenticated),
        }
    }

    /// Start a new pipeline run, superseding any earlier one
    ///
    /// A handshake left suspended by the superseded run is abandoned so the
    /// new run can start its own.
    pub fn begin_run(&self) -> RunTicket {
        let ticket = self.gate.begin();
        let mut state = self.lock_state();
        if matches!(*state, AuthState::Authenticating) {
            debug!("abandoning sign-in of superseded run");
            *state = AuthState::SignedOut;
        }
        ticket
    }
}
