use std::{fmt, sync::Arc};

use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::store::{LedgerStore, StoreError};

pub const DEFAULT_SALT: &str = "mini-ledger-static-salt";

/// One-way digest of a password, hex encoded.
#[derive(Clone, PartialEq, Eq)]
pub struct PasswordDigest(String);

impl PasswordDigest {
    pub fn compute(salt: &str, password: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(salt.as_bytes());
        hasher.update(password.as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    pub fn from_hex(digest: &str) -> Self {
        Self(digest.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Compares without short-circuiting on the first differing byte.
    pub fn matches(&self, other: &PasswordDigest) -> bool {
        let (a, b) = (self.0.as_bytes(), other.0.as_bytes());
        a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
    }
}

impl fmt::Debug for PasswordDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PasswordDigest(..)")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    username: String,
    digest: PasswordDigest,
}

impl Account {
    pub fn new(username: &str, digest: PasswordDigest) -> Self {
        Self {
            username: username.to_string(),
            digest,
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn digest(&self) -> &PasswordDigest {
        &self.digest
    }
}

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("Username and password must not be empty")]
    InvalidInput,
    #[error("Account `{0}` already exists")]
    AccountExists(String),
    #[error("Invalid username or password")]
    InvalidCredentials,
    #[error("Account `{0}` does not exist")]
    NotFound(String),
    #[error(transparent)]
    StoreErr(#[from] StoreError),
}

/// Account identities and password digests.
pub struct Credentials<S> {
    store: Arc<S>,
    salt: String,
}

impl<S> Clone for Credentials<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            salt: self.salt.clone(),
        }
    }
}

impl<S: LedgerStore> Credentials<S> {
    pub fn new(store: Arc<S>, salt: impl Into<String>) -> Self {
        Self {
            store,
            salt: salt.into(),
        }
    }

    pub fn register(&self, username: &str, password: &str) -> Result<Account, CredentialError> {
        if username.is_empty() || password.is_empty() {
            return Err(CredentialError::InvalidInput);
        }
        if self.store.find_account(username)?.is_some() {
            return Err(CredentialError::AccountExists(username.to_string()));
        }
        let account = Account::new(username, PasswordDigest::compute(&self.salt, password));
        match self.store.create_account(&account) {
            Ok(()) => {}
            // lost a race with a concurrent registration
            Err(StoreError::Duplicate(_)) => {
                return Err(CredentialError::AccountExists(username.to_string()));
            }
            Err(err) => return Err(err.into()),
        }
        tracing::info!(username, "account registered");
        Ok(account)
    }

    pub fn verify(&self, username: &str, password: &str) -> Result<Account, CredentialError> {
        let candidate = PasswordDigest::compute(&self.salt, password);
        match self.store.find_account(username)? {
            Some(account) if account.digest().matches(&candidate) => Ok(account),
            _ => Err(CredentialError::InvalidCredentials),
        }
    }

    pub fn lookup(&self, username: &str) -> Result<Account, CredentialError> {
        self.store
            .find_account(username)?
            .ok_or_else(|| CredentialError::NotFound(username.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use crate::store::InMemoryStore;

    use super::*;

    fn credentials() -> Credentials<InMemoryStore> {
        Credentials::new(Arc::new(InMemoryStore::new()), DEFAULT_SALT)
    }

    #[test]
    fn digest_is_deterministic_and_salted() {
        let a = PasswordDigest::compute("salt", "pw1");
        let b = PasswordDigest::compute("salt", "pw1");
        assert!(a.matches(&b));
        assert_eq!(a.as_str().len(), 64);
        assert_ne!(a.as_str(), "pw1");
        assert!(!a.matches(&PasswordDigest::compute("other", "pw1")));
        assert!(!a.matches(&PasswordDigest::compute("salt", "pw2")));
        assert_eq!(format!("{a:?}"), "PasswordDigest(..)");
    }

    #[test]
    fn register_rejects_empty_fields() {
        let creds = credentials();
        assert!(matches!(
            creds.register("", "pw"),
            Err(CredentialError::InvalidInput)
        ));
        assert!(matches!(
            creds.register("alice", ""),
            Err(CredentialError::InvalidInput)
        ));
    }

    #[test]
    fn register_twice() {
        let creds = credentials();
        let account = creds.register("alice", "pw1").unwrap();
        assert_eq!(account.username(), "alice");
        assert_eq!(creds.store.balance("alice").unwrap(), Some(rust_decimal::Decimal::ZERO));

        let err = creds.register("alice", "other").unwrap_err();
        assert!(matches!(&err, CredentialError::AccountExists(name) if name == "alice"));
        assert_eq!(err.to_string(), "Account `alice` already exists");
    }

    #[test]
    fn verify_does_not_reveal_which_part_was_wrong() {
        let creds = credentials();
        creds.register("alice", "pw1").unwrap();

        assert_eq!(creds.verify("alice", "pw1").unwrap().username(), "alice");

        let wrong_password = creds.verify("alice", "nope").unwrap_err();
        let unknown_user = creds.verify("mallory", "pw1").unwrap_err();
        assert!(matches!(wrong_password, CredentialError::InvalidCredentials));
        assert!(matches!(unknown_user, CredentialError::InvalidCredentials));
        assert_eq!(wrong_password.to_string(), unknown_user.to_string());
    }

    #[test]
    fn lookup() {
        let creds = credentials();
        creds.register("alice", "pw1").unwrap();
        assert!(creds.lookup("alice").is_ok());
        assert!(matches!(
            creds.lookup("bob"),
            Err(CredentialError::NotFound(name)) if name == "bob"
        ));
    }
}
