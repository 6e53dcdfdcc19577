//! Domain models for directory-backed role resolution

pub mod dn;
pub mod entry;
pub mod identity;
pub mod role_mapping;
pub mod search_base;

pub use dn::*;
pub use entry::*;
pub use identity::*;
pub use role_mapping::*;
pub use search_base::*;
