// Copyright 2022-2023 Debox Network
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.
//

//! Per-user token sessions.
//!
//! A [`Session`] owns the token of one signed-in user. Handlers never see it directly: they
//! receive a [`SessionContext`] snapshot taken after the session made sure its token is fresh.
//! Refresh happens under the session's async mutex, so when many requests notice expiry at
//! once, exactly one of them talks to the token issuer and the others wait for its result.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, SystemTime};

use http::StatusCode;
use tokio::sync::Mutex;

use crate::error::{ApiError, GatewayError, GatewayResult};
use crate::idp::{Token, TokenGrant, TokenIssuer};

/// Tokens are refreshed this long before they actually expire.
pub const REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// Moment at which `token`, issued at `now`, stops being valid.
pub fn compute_expiry(token: &Token, now: SystemTime) -> SystemTime {
    now + Duration::from_secs(token.expires_in)
}

/// Token snapshot handed to every handler invocation.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionContext {
    access_token: String,
    expiry: SystemTime,
}

impl SessionContext {
    pub fn new(token: &Token, issued_at: SystemTime) -> Self {
        Self {
            access_token: token.access_token.clone(),
            expiry: compute_expiry(token, issued_at),
        }
    }

    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    pub fn expiry(&self) -> SystemTime {
        self.expiry
    }

    pub fn is_expired(&self, now: SystemTime) -> bool {
        now >= self.expiry
    }
}

impl std::fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionContext")
            .field("expiry", &self.expiry)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
struct TokenState {
    token: Token,
    context: SessionContext,
    /// Set once a refresh was refused; the refresh token is not offered again.
    refresh_failure: Option<String>,
}

impl TokenState {
    fn issued(token: Token, now: SystemTime) -> Self {
        let context = SessionContext::new(&token, now);
        Self {
            token,
            context,
            refresh_failure: None,
        }
    }
}

/// Signed-in user and their current token.
#[derive(Debug)]
pub struct Session {
    username: String,
    secret: blake3::Hash,
    state: Mutex<TokenState>,
}

impl Session {
    pub fn new(username: &str, password: &str, token: Token, now: SystemTime) -> Self {
        Self {
            username: username.to_string(),
            secret: blake3::hash(password.as_bytes()),
            state: Mutex::new(TokenState::issued(token, now)),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// Whether `password` is the one this session was opened with.
    pub fn verify(&self, password: &str) -> bool {
        self.secret == blake3::hash(password.as_bytes())
    }

    /// Returns a context whose token is valid for at least [`REFRESH_MARGIN`] past `now`,
    /// refreshing it first if needed.
    pub async fn context(
        &self, issuer: &dyn TokenIssuer, now: SystemTime,
    ) -> Result<SessionContext, ApiError> {
        let mut state = self.state.lock().await;
        if let Some(reason) = &state.refresh_failure {
            return Err(ApiError::Response {
                status: StatusCode::UNAUTHORIZED,
                code: "SESSION_EXPIRED".to_string(),
                message: format!("session of {} could not be refreshed: {}", self.username, reason),
                user_message: "Session expired.".to_string(),
            });
        }
        if state.context.is_expired(now + REFRESH_MARGIN) {
            debug!("SESSION: refreshing token of {}", self.username);
            let grant = TokenGrant::RefreshToken(state.token.refresh_token.clone());
            match issuer.exchange(&grant).await {
                Ok(token) => *state = TokenState::issued(token, now),
                Err(e) => {
                    state.refresh_failure = Some(e.to_string());
                    return Err(e);
                }
            }
        }
        Ok(state.context.clone())
    }
}

/// All live sessions, keyed by username.
#[derive(Default, Debug, Clone)]
pub struct SessionStore {
    sessions: Arc<RwLock<HashMap<String, Arc<Session>>>>,
}

impl SessionStore {
    pub fn get(&self, username: &str) -> Option<Arc<Session>> {
        let sessions = self.sessions.read().unwrap_or_else(PoisonError::into_inner);
        sessions.get(username).cloned()
    }

    fn insert(&self, session: Arc<Session>) {
        let sessions = &mut self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        sessions.insert(session.username().to_string(), session);
    }

    /// Drops `session` unless it was already replaced by a newer one.
    fn discard(&self, session: &Arc<Session>) {
        let sessions = &mut self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        if sessions.get(session.username()).map_or(false, |s| Arc::ptr_eq(s, session)) {
            sessions.remove(session.username());
        }
    }

    /// Discards the session of `username`. Returns whether one existed.
    pub fn sign_out(&self, username: &str) -> bool {
        let sessions = &mut self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        sessions.remove(username).is_some()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Signs a user in, reusing their session when the password matches.
    ///
    /// A session whose refresh fails is discarded and replaced by a fresh password grant.
    pub async fn authenticate(
        &self, issuer: &dyn TokenIssuer, username: &str, password: &str, now: SystemTime,
    ) -> GatewayResult<SessionContext> {
        if let Some(session) = self.get(username) {
            if session.verify(password) {
                match session.context(issuer, now).await {
                    Ok(context) => return Ok(context),
                    Err(e) => {
                        warn!("SESSION: refresh failed for {}, signing out: {}", username, e);
                        self.discard(&session);
                    }
                }
            }
        }
        self.sign_in(issuer, username, password, now).await
    }

    async fn sign_in(
        &self, issuer: &dyn TokenIssuer, username: &str, password: &str, now: SystemTime,
    ) -> GatewayResult<SessionContext> {
        let grant = TokenGrant::Password {
            username: username.to_string(),
            password: password.to_string(),
        };
        let token = match issuer.exchange(&grant).await {
            Ok(token) => token,
            Err(ApiError::Response { status, .. }) if status.is_client_error() => {
                return Err(GatewayError::Unauthenticated(format!(
                    "credentials of {} rejected ({})",
                    username, status
                )));
            }
            Err(e) => return Err(e.into()),
        };
        info!("SESSION: {} signed in", username);
        let context = SessionContext::new(&token, now);
        self.insert(Arc::new(Session::new(username, password, token, now)));
        Ok(context)
    }
}
