//! Unified error handling for LDAP role resolution

use thiserror::Error;

/// Crate-wide result type
pub type Result<T> = std::result::Result<T, AuthzError>;

/// Authorization error types.
///
/// Every fatal condition raised while resolving roles ends up here so callers
/// only have to deal with one error type. The original cause is kept as the
/// error source.
#[derive(Error, Debug)]
pub enum AuthzError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Directory error: {0}")]
    Directory(#[from] DirectoryError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AuthzError {
    /// Short machine-readable kind, used as a metrics label.
    pub fn kind(&self) -> &'static str {
        match self {
            AuthzError::NotFound(_) => "not_found",
            AuthzError::Directory(_) => "directory_error",
            AuthzError::Config(_) => "config_error",
            AuthzError::Validation(_) => "validation",
            AuthzError::Internal(_) => "internal_error",
        }
    }
}

/// Failures raised by the directory layer (connection pool or LDAP operations).
#[derive(Error, Debug)]
pub enum DirectoryError {
    #[error("LDAP error: {0}")]
    Ldap(#[from] ldap3::LdapError),

    #[error("LDAP operation '{operation}' failed with result code {rc}: {message}")]
    Operation {
        operation: &'static str,
        rc: u32,
        message: String,
    },

    #[error("Unable to connect to any directory host: {0}")]
    Unavailable(String),

    #[error("Connection pool is closed")]
    PoolClosed,

    #[error("Invalid referral '{0}'")]
    InvalidReferral(String),

    #[error("Directory returned a malformed DN: {0}")]
    MalformedDn(#[from] crate::domain::DnParseError),
}

impl From<validator::ValidationErrors> for AuthzError {
    fn from(errors: validator::ValidationErrors) -> Self {
        AuthzError::Validation(errors.to_string())
    }
}
