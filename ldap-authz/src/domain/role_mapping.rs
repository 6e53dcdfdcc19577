//! Role mapping documents
//!
//! A role mapping ties a security role to the backend roles, users and hosts
//! that receive it. Backend roles are what [`crate::service::RoleResolver`]
//! produces.

use crate::error::{AuthzError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// At least one of these keys must be present in a mapping.
pub const MANDATORY_OR_KEYS: [&str; 4] = ["and_backend_roles", "backend_roles", "hosts", "users"];

/// Keys only administrators may set
pub const ADMIN_ONLY_KEYS: [&str; 2] = ["hidden", "reserved"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ValueKind {
    Array,
    String,
    Boolean,
}

fn allowed_kind(key: &str, is_admin: bool) -> Option<ValueKind> {
    match key {
        "backend_roles" | "and_backend_roles" | "hosts" | "users" => Some(ValueKind::Array),
        "description" => Some(ValueKind::String),
        "hidden" | "reserved" if is_admin => Some(ValueKind::Boolean),
        _ => None,
    }
}

/// Validated role mapping
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleMapping {
    #[serde(default)]
    pub backend_roles: Vec<String>,
    #[serde(default)]
    pub and_backend_roles: Vec<String>,
    #[serde(default)]
    pub hosts: Vec<String>,
    #[serde(default)]
    pub users: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default)]
    pub reserved: bool,
}

impl RoleMapping {
    /// Validate a raw mapping document and convert it.
    ///
    /// Unknown keys, values of the wrong type, admin-only keys set by a
    /// non-admin, and documents without any of [`MANDATORY_OR_KEYS`] are
    /// rejected.
    pub fn from_document(document: &Value, is_admin: bool) -> Result<Self> {
        let object = document.as_object().ok_or_else(|| {
            AuthzError::Validation("Role mapping must be a JSON object".to_string())
        })?;

        let mut invalid_keys = Vec::new();
        let mut wrong_types = Vec::new();

        for (key, value) in object {
            match allowed_kind(key, is_admin) {
                None => invalid_keys.push(key.as_str()),
                Some(kind) if !value_matches(kind, value) => wrong_types.push(key.as_str()),
                Some(_) => {}
            }
        }

        if !invalid_keys.is_empty() {
            return Err(AuthzError::Validation(format!(
                "Invalid keys in role mapping: {}",
                invalid_keys.join(", ")
            )));
        }
        if !wrong_types.is_empty() {
            return Err(AuthzError::Validation(format!(
                "Wrong value types in role mapping: {}",
                wrong_types.join(", ")
            )));
        }
        if !MANDATORY_OR_KEYS.iter().any(|key| object.contains_key(*key)) {
            return Err(AuthzError::Validation(format!(
                "Role mapping requires at least one of: {}",
                MANDATORY_OR_KEYS.join(", ")
            )));
        }

        serde_json::from_value(document.clone())
            .map_err(|e| AuthzError::Validation(format!("Invalid role mapping: {}", e)))
    }

    /// True when the given backend roles satisfy this mapping's role clauses.
    ///
    /// `backend_roles` needs any one match, `and_backend_roles` needs all.
    pub fn matches_backend_roles<'a, I>(&self, roles: I) -> bool
    where
        I: IntoIterator<Item = &'a String> + Clone,
    {
        let any = !self.backend_roles.is_empty()
            && roles.clone().into_iter().any(|role| self.backend_roles.contains(role));
        let all = !self.and_backend_roles.is_empty()
            && self
                .and_backend_roles
                .iter()
                .all(|required| roles.clone().into_iter().any(|role| role == required));
        any || all
    }
}

fn value_matches(kind: ValueKind, value: &Value) -> bool {
    match kind {
        ValueKind::Array => value
            .as_array()
            .is_some_and(|items| items.iter().all(Value::is_string)),
        ValueKind::String => value.is_string(),
        ValueKind::Boolean => value.is_boolean(),
    }
}
