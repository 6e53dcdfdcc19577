//! Directory access layer
//!
//! The resolver only talks to the directory through [`ConnectionProvider`] and
//! [`DirectoryConnection`]. [`ldap::LdapConnectionPool`] is the `ldap3`-backed
//! implementation used in production.

pub mod ldap;
pub mod user_search;

pub use ldap::LdapConnectionPool;
pub use user_search::UserSearcher;

use crate::domain::DirectoryEntry;
use crate::error::DirectoryError;
use async_trait::async_trait;
use std::fmt;

pub type DirectoryResult<T> = std::result::Result<T, DirectoryError>;

/// LDAP search scope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchScope {
    Base,
    OneLevel,
    Subtree,
}

/// Per-operation options shared by lookups and searches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryOptions {
    /// Attributes to return; `*` means all user attributes.
    pub return_attributes: Vec<String>,
    pub follow_referrals: bool,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            return_attributes: vec!["*".to_string()],
            follow_referrals: true,
        }
    }
}

/// Identity the directory I/O runs under.
///
/// Role resolution reads group data with the service's own bind credentials,
/// never with the end user's. The resolver hands this capability to the
/// connection provider explicitly on every acquisition.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct PrivilegedScope {
    bind_dn: Option<String>,
    password: Option<String>,
}

impl PrivilegedScope {
    pub fn new(bind_dn: Option<String>, password: Option<String>) -> Self {
        Self { bind_dn, password }
    }

    /// Anonymous access
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn bind_dn(&self) -> Option<&str> {
        self.bind_dn.as_deref()
    }

    pub fn password(&self) -> &str {
        self.password.as_deref().unwrap_or_default()
    }
}

impl fmt::Debug for PrivilegedScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrivilegedScope")
            .field("bind_dn", &self.bind_dn)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// An open directory connection, held for the duration of one resolution.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DirectoryConnection: Send {
    /// Fetch a single entry by DN. `Ok(None)` when it does not exist.
    async fn lookup(
        &mut self,
        dn: &str,
        options: &QueryOptions,
    ) -> DirectoryResult<Option<DirectoryEntry>>;

    async fn search(
        &mut self,
        base: &str,
        filter: &str,
        scope: SearchScope,
        options: &QueryOptions,
    ) -> DirectoryResult<Vec<DirectoryEntry>>;

    /// Give the connection back. Calling it more than once is a no-op.
    async fn close(&mut self) -> DirectoryResult<()>;
}

/// Source of directory connections (usually a pool).
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ConnectionProvider: Send + Sync {
    async fn acquire(
        &self,
        scope: &PrivilegedScope,
    ) -> DirectoryResult<Box<dyn DirectoryConnection>>;

    /// Release every pooled resource. Idempotent.
    async fn shutdown(&self);
}
