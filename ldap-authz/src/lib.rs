//! LDAP Authz - directory-backed role resolution
//!
//! Resolves the backend roles of an already authenticated identity from an
//! LDAP directory: direct role attributes, configurable role searches over
//! one or more search bases, and bounded nested group expansion.

pub mod config;
pub mod crypto;
pub mod directory;
pub mod domain;
pub mod error;
pub mod matcher;
pub mod service;
pub mod telemetry;

// Re-export commonly used types
pub use config::{ResolverConfig, Settings};
pub use error::{AuthzError, DirectoryError, Result};
pub use service::RoleResolver;
