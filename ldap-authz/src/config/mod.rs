//! Configuration management for LDAP role resolution
//!
//! [`Settings`] is the raw, deserialized configuration (file plus
//! `LDAP_AUTHZ_*` environment variables). [`ResolverConfig`] is the
//! normalized, immutable form the resolver runs with.

use crate::directory::{PrivilegedScope, QueryOptions};
use crate::domain::{
    SearchBaseDefinitions, SearchBaseRegistry, DEFAULT_ROLE_SEARCH, DEFAULT_USER_SEARCH,
};
use crate::error::{AuthzError, Result as AuthzResult};
use crate::matcher::WildcardMatcher;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use validator::Validate;

/// Nesting limit used when `max_nested_depth` is missing or unusable
pub const DEFAULT_MAX_NESTED_DEPTH: u32 = 30;

/// Environment variable prefix, e.g. `LDAP_AUTHZ_AUTHZ__ROLENAME=cn`
pub const ENV_PREFIX: &str = "LDAP_AUTHZ";

/// Keys whose environment values are comma-separated lists
const ENV_LIST_KEYS: [&str; 5] = [
    "connection.hosts",
    "authz.skip_users",
    "authz.exclude_roles",
    "authz.nested_role_filter",
    "authz.return_attributes",
];

/// Application configuration
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct Settings {
    /// Directory connection configuration
    #[serde(default)]
    #[validate(nested)]
    pub connection: ConnectionSettings,
    /// Role resolution configuration
    #[serde(default)]
    pub authz: AuthzSettings,
    /// User search configuration
    #[serde(default)]
    pub users: UserSearchSettings,
    /// Logging and metrics configuration
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    /// Password hashing configuration
    #[serde(default)]
    pub password_hashing: PasswordHashingSettings,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(default)]
pub struct ConnectionSettings {
    /// LDAP URLs, tried in order (e.g. `ldaps://ldap1.example.com:636`)
    #[validate(length(min = 1))]
    pub hosts: Vec<String>,
    pub bind_dn: Option<String>,
    pub password: Option<String>,
    pub enable_start_tls: bool,
    pub verify_hostnames: bool,
    #[validate(range(min = 1))]
    pub connect_timeout_secs: u64,
    #[validate(range(min = 1))]
    pub operation_timeout_secs: u64,
    #[validate(range(min = 1, max = 1024))]
    pub pool_max_size: usize,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            hosts: vec!["ldap://localhost:389".to_string()],
            bind_dn: None,
            password: None,
            enable_start_tls: false,
            verify_hostnames: true,
            connect_timeout_secs: 10,
            operation_timeout_secs: 30,
            pool_max_size: 10,
        }
    }
}

/// Integer setting as it appears in the configuration source.
///
/// Kept raw so that an unparsable value degrades to a default instead of
/// failing the whole configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum RawInteger {
    Number(i64),
    Text(String),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthzSettings {
    /// Users whose roles are never looked up
    pub skip_users: Vec<String>,
    /// Roles dropped from the result
    pub exclude_roles: Vec<String>,
    /// Role DNs whose nested roles are not expanded
    pub nested_role_filter: Vec<String>,
    pub resolve_nested_roles: bool,
    pub rolesearch_enabled: bool,
    /// Comma-separated attribute names on the user entry holding role values
    pub userrolename: String,
    /// Attribute of a role entry holding its name, or `dn`
    pub rolename: String,
    /// User attribute substituted into `{2}` of role search filters
    pub userroleattribute: Option<String>,
    pub max_nested_depth: Option<RawInteger>,
    pub return_attributes: Vec<String>,
    pub follow_referrals: bool,
    /// Named role search bases
    pub roles: Option<SearchBaseDefinitions>,
    /// Legacy single role base
    pub rolebase: Option<String>,
    /// Legacy single role search filter
    pub rolesearch: Option<String>,
}

impl Default for AuthzSettings {
    fn default() -> Self {
        Self {
            skip_users: Vec::new(),
            exclude_roles: Vec::new(),
            nested_role_filter: Vec::new(),
            resolve_nested_roles: false,
            rolesearch_enabled: true,
            userrolename: "memberOf".to_string(),
            rolename: "name".to_string(),
            userroleattribute: None,
            max_nested_depth: None,
            return_attributes: vec!["*".to_string()],
            follow_referrals: true,
            roles: None,
            rolebase: None,
            rolesearch: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct UserSearchSettings {
    /// Named user search bases
    pub users: Option<SearchBaseDefinitions>,
    /// Legacy single user base
    pub userbase: Option<String>,
    /// Legacy single user search filter
    pub usersearch: Option<String>,
}

/// Telemetry configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// `plain` or `json`
    pub log_format: String,
    /// Filter used when `RUST_LOG` is not set
    pub default_filter: String,
    pub metrics_enabled: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_format: "plain".to_string(),
            default_filter: "ldap_authz=info".to_string(),
            metrics_enabled: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PasswordHashingSettings {
    pub algorithm: String,
    pub bcrypt: BcryptSettings,
    pub pbkdf2: Pbkdf2Settings,
    pub argon2: Argon2Settings,
}

impl Default for PasswordHashingSettings {
    fn default() -> Self {
        Self {
            algorithm: "bcrypt".to_string(),
            bcrypt: BcryptSettings::default(),
            pbkdf2: Pbkdf2Settings::default(),
            argon2: Argon2Settings::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BcryptSettings {
    pub rounds: i64,
    pub minor: String,
}

impl Default for BcryptSettings {
    fn default() -> Self {
        Self {
            rounds: 12,
            minor: "Y".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Pbkdf2Settings {
    pub function: String,
    pub iterations: i64,
    pub length: i64,
}

impl Default for Pbkdf2Settings {
    fn default() -> Self {
        Self {
            function: "SHA256".to_string(),
            iterations: 600_000,
            length: 256,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Argon2Settings {
    pub memory: i64,
    pub iterations: i64,
    pub parallelism: i64,
    pub length: i64,
    #[serde(rename = "type")]
    pub kind: String,
    pub version: i64,
}

impl Default for Argon2Settings {
    fn default() -> Self {
        Self {
            memory: 65536,
            iterations: 3,
            parallelism: 1,
            length: 32,
            kind: "argon2id".to_string(),
            version: 19,
        }
    }
}

impl Settings {
    /// Load settings from an optional file, overlaid with `LDAP_AUTHZ_*`
    /// environment variables (nested keys separated by `__`).
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }

        let mut environment = config::Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true)
            .list_separator(",");
        for key in ENV_LIST_KEYS {
            environment = environment.with_list_parse_key(key);
        }

        let settings: Settings = builder
            .add_source(environment)
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("Invalid configuration")?;
        settings.validate().context("Invalid connection settings")?;
        Ok(settings)
    }

    /// Parse settings from a string in the given format (no environment overlay).
    pub fn parse(contents: &str, format: config::FileFormat) -> Result<Self> {
        let settings: Settings = config::Config::builder()
            .add_source(config::File::from_str(contents, format))
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("Invalid configuration")?;
        settings.validate().context("Invalid connection settings")?;
        Ok(settings)
    }
}

/// Resolve the configured nesting limit, falling back to
/// [`DEFAULT_MAX_NESTED_DEPTH`] when it is missing or unusable.
pub fn parse_max_nested_depth(raw: Option<&RawInteger>) -> u32 {
    let parsed = match raw {
        None => return DEFAULT_MAX_NESTED_DEPTH,
        Some(RawInteger::Number(n)) => u32::try_from(*n).map_err(|e| e.to_string()),
        Some(RawInteger::Text(s)) => s.trim().parse::<u32>().map_err(|e| e.to_string()),
    };

    parsed.unwrap_or_else(|e| {
        tracing::error!(
            value = ?raw,
            error = %e,
            default = DEFAULT_MAX_NESTED_DEPTH,
            "max_nested_depth is not parseable, using default"
        );
        DEFAULT_MAX_NESTED_DEPTH
    })
}

/// Normalized resolver configuration, immutable once built.
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    pub skip_users: WildcardMatcher,
    pub exclude_roles: WildcardMatcher,
    /// Cutoff matcher; `None` when nested resolution is disabled
    pub nested_role_filter: Option<WildcardMatcher>,
    pub rolesearch_enabled: bool,
    pub user_role_attributes: Vec<String>,
    pub role_name_attribute: String,
    pub user_role_attribute: Option<String>,
    pub max_nested_depth: u32,
    pub query: QueryOptions,
    pub role_bases: SearchBaseRegistry,
    pub user_bases: SearchBaseRegistry,
    pub scope: PrivilegedScope,
}

impl ResolverConfig {
    pub fn from_settings(settings: &Settings) -> AuthzResult<Self> {
        let authz = &settings.authz;
        let users = &settings.users;

        let nested_role_filter = if authz.resolve_nested_roles {
            Some(WildcardMatcher::from_patterns(&authz.nested_role_filter)?)
        } else {
            None
        };

        let user_role_attributes: Vec<String> = authz
            .userrolename
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect();

        if authz.rolename.trim().is_empty() {
            tracing::warn!("rolename is empty, DN roles will not produce role names");
        }

        Ok(Self {
            skip_users: WildcardMatcher::from_patterns(&authz.skip_users)?,
            exclude_roles: WildcardMatcher::from_patterns(&authz.exclude_roles)?,
            nested_role_filter,
            rolesearch_enabled: authz.rolesearch_enabled,
            user_role_attributes,
            role_name_attribute: authz.rolename.trim().to_string(),
            user_role_attribute: authz
                .userroleattribute
                .as_deref()
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(str::to_string),
            max_nested_depth: parse_max_nested_depth(authz.max_nested_depth.as_ref()),
            query: QueryOptions {
                return_attributes: authz.return_attributes.clone(),
                follow_referrals: authz.follow_referrals,
            },
            role_bases: SearchBaseRegistry::from_definitions(
                authz.roles.as_ref(),
                authz.rolebase.as_deref(),
                authz.rolesearch.as_deref(),
                DEFAULT_ROLE_SEARCH,
            ),
            user_bases: SearchBaseRegistry::from_definitions(
                users.users.as_ref(),
                users.userbase.as_deref(),
                users.usersearch.as_deref(),
                DEFAULT_USER_SEARCH,
            ),
            scope: PrivilegedScope::new(
                settings.connection.bind_dn.clone(),
                settings.connection.password.clone(),
            ),
        })
    }

    /// Whether nested role resolution is enabled
    pub fn resolve_nested_roles(&self) -> bool {
        self.nested_role_filter.is_some()
    }
}

impl TryFrom<&Settings> for ResolverConfig {
    type Error = AuthzError;

    fn try_from(settings: &Settings) -> AuthzResult<Self> {
        ResolverConfig::from_settings(settings)
    }
}
