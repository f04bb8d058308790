use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rand::{RngCore, rngs::OsRng};
use thiserror::Error;

use crate::{
    clock::Clock,
    credential::{CredentialError, Credentials},
    store::{LedgerStore, StoreError},
};

/// Lifetime of a session from the moment it is issued. Not extended on use.
pub const SESSION_TTL_MINUTES: i64 = 10;

const TOKEN_BYTES: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    token: String,
    username: String,
    expires_at: DateTime<Utc>,
}

impl Session {
    pub fn new(token: &str, username: &str, expires_at: DateTime<Utc>) -> Self {
        Self {
            token: token.to_string(),
            username: username.to_string(),
            expires_at,
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid username or password")]
    InvalidCredentials,
    #[error("Invalid/Expired auth token, please login first to get new auth token")]
    SessionExpiredOrInvalid,
    #[error("Auth header must look like `<username>:<token>`")]
    MalformedHeader,
    #[error(transparent)]
    StoreErr(#[from] StoreError),
}

impl From<CredentialError> for AuthError {
    fn from(err: CredentialError) -> Self {
        match err {
            CredentialError::StoreErr(err) => AuthError::StoreErr(err),
            _ => AuthError::InvalidCredentials,
        }
    }
}

/// `<username>:<token>` pair presented by a caller on every request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthHeader<'a> {
    pub username: &'a str,
    pub token: &'a str,
}

impl<'a> AuthHeader<'a> {
    pub fn parse(value: &'a str) -> Result<Self, AuthError> {
        let mut parts = value.split(':');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(username), Some(token), None) if !username.is_empty() && !token.is_empty() => {
                Ok(Self { username, token })
            }
            _ => Err(AuthError::MalformedHeader),
        }
    }
}

pub fn session_ttl() -> Duration {
    Duration::minutes(SESSION_TTL_MINUTES)
}

fn mint_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

pub struct Authenticator<S> {
    credentials: Credentials<S>,
    store: Arc<S>,
    clock: Arc<dyn Clock>,
}

impl<S: LedgerStore> Authenticator<S> {
    pub fn new(store: Arc<S>, credentials: Credentials<S>, clock: Arc<dyn Clock>) -> Self {
        Self {
            credentials,
            store,
            clock,
        }
    }

    pub fn login(&self, username: &str, password: &str) -> Result<Session, AuthError> {
        let account = self.credentials.verify(username, password).inspect_err(|err| {
            tracing::warn!(username, %err, "login rejected");
        })?;
        let now = self.clock.now();
        let session = Session::new(&mint_token(), account.username(), now + session_ttl());
        self.store.insert_session(&session, now)?;
        tracing::info!(username, expires_at = %session.expires_at, "session issued");
        Ok(session)
    }

    /// Validates a presented token. The token alone selects the session; the
    /// username must agree with the session's owner.
    pub fn authenticate(&self, token: &str, username: &str) -> Result<Session, AuthError> {
        let now = self.clock.now();
        match self.store.find_session(token)? {
            Some(session) if session.username == username && session.is_live_at(now) => {
                Ok(session)
            }
            _ => {
                tracing::warn!(username, "session rejected");
                Err(AuthError::SessionExpiredOrInvalid)
            }
        }
    }

    pub fn authenticate_header(&self, header: &str) -> Result<Session, AuthError> {
        let AuthHeader { username, token } = AuthHeader::parse(header)?;
        self.authenticate(token, username)
    }
}
