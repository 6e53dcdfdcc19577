//! Role resolution logic

pub mod nested;
pub mod origin;
pub mod resolver;

pub use nested::NestedRoleExpander;
pub use origin::RoleOriginIndex;
pub use resolver::{RoleResolver, BACKEND_TYPE};
