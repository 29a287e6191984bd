//! Password Authentication
//!
//! Two gates on `HELLO`: an optional server password shared by everyone,
//! and a per-name account password pinned the first time the name is seen.
//! Both travel as hex SHA-256 digests; the server never sees plain text.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::hash::hash_password;

/// Authentication configuration.
#[derive(Clone, Debug, Default)]
pub struct AuthConfig {
    /// Hex SHA-256 of the server password. `None` admits everyone.
    pub server_password: Option<String>,
}

impl AuthConfig {
    /// No server password.
    pub fn open() -> Self {
        Self::default()
    }

    /// Require `password`, stored as its digest.
    pub fn with_password(password: &str) -> Self {
        Self {
            server_password: Some(hash_password(password)),
        }
    }

    /// Create config from environment variables.
    pub fn from_env() -> Self {
        match std::env::var("CR_PASSWORD") {
            Ok(p) if !p.is_empty() => Self::with_password(&p),
            _ => Self::open(),
        }
    }

    /// Check if a server password is configured.
    pub fn is_configured(&self) -> bool {
        self.server_password.is_some()
    }

    /// Check the digest offered in `HELLO`.
    pub fn check_server_password(&self, offered: Option<&str>) -> Result<(), AuthError> {
        match &self.server_password {
            None => Ok(()),
            Some(expected) if offered.is_some_and(|o| o.eq_ignore_ascii_case(expected)) => Ok(()),
            Some(_) => Err(AuthError::WrongServerPassword),
        }
    }
}

/// Authentication errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// Server password digest did not match.
    #[error("wrong server password")]
    WrongServerPassword,
    /// Account password digest did not match the pinned one.
    #[error("wrong account password for {0}")]
    WrongAccountPassword(String),
    /// Name is empty.
    #[error("empty player name")]
    EmptyName,
}

/// Name → pinned account password digest.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AccountRegistry {
    accounts: BTreeMap<String, String>,
}

impl AccountRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Verify `name`, pinning `password` if the name is new.
    ///
    /// Returns true when the name was registered by this call. A missing
    /// password pins (and later matches) the empty string.
    pub fn verify_or_register(&mut self, name: &str, password: Option<&str>) -> Result<bool, AuthError> {
        if name.is_empty() {
            return Err(AuthError::EmptyName);
        }
        let offered = password.unwrap_or_default();
        match self.accounts.get(name) {
            Some(pinned) if pinned.eq_ignore_ascii_case(offered) => Ok(false),
            Some(_) => Err(AuthError::WrongAccountPassword(name.to_string())),
            None => {
                self.accounts.insert(name.to_string(), offered.to_string());
                Ok(true)
            }
        }
    }
}
