//! Authenticated identity and the context handed over by the authenticator

use super::entry::DirectoryEntry;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;

/// Authenticated principal plus the backend roles assigned to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    name: String,
    roles: BTreeSet<String>,
}

impl Identity {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            roles: BTreeSet::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn roles(&self) -> &BTreeSet<String> {
        &self.roles
    }

    /// Return the identity with `roles` added to the ones it already has.
    pub fn with_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.roles.extend(roles.into_iter().map(Into::into));
        self
    }
}

/// Credentials as submitted by the client
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: Option<String>,
}

impl Credentials {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: None,
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Data produced by the authentication step that the role resolver may reuse.
#[derive(Debug, Clone, Default)]
pub struct AuthenticationContext {
    /// Directory entry already resolved during authentication, if any.
    pub entry: Option<DirectoryEntry>,
    pub credentials: Option<Credentials>,
}

impl AuthenticationContext {
    pub fn with_entry(entry: DirectoryEntry, credentials: Credentials) -> Self {
        Self {
            entry: Some(entry),
            credentials: Some(credentials),
        }
    }
}
