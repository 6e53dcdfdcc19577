//! Directory-backed role resolution

use super::nested::NestedRoleExpander;
use super::origin::RoleOriginIndex;
use crate::config::ResolverConfig;
use crate::directory::{ConnectionProvider, DirectoryConnection, SearchScope, UserSearcher};
use crate::domain::{AuthenticationContext, DirectoryEntry, Dn, Identity};
use crate::error::{AuthzError, Result};
use metrics::{counter, histogram};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Identifier reported by [`RoleResolver::backend_type`]
pub const BACKEND_TYPE: &str = "ldap";

/// Role name attribute value that selects the DN itself as the role name
const DN_ROLE_NAME: &str = "dn";

/// Substituted into `{2}` when the user has no role attribute value
const USER_ROLE_ATTRIBUTE_FALLBACK: &str = "2";

/// Split the values of `attributes` on `entry` into role DNs and plain roles.
///
/// Attributes are read in the given order; values that do not parse as a DN
/// are plain roles.
pub(crate) fn attribute_roles(
    entry: &DirectoryEntry,
    attributes: &[String],
) -> (Vec<Dn>, Vec<String>) {
    let mut role_dns = Vec::new();
    let mut plain = Vec::new();

    for attribute in attributes {
        let Some(values) = entry.attribute(attribute) else {
            continue;
        };
        for value in values {
            match Dn::parse(value) {
                Ok(dn) if !dn.is_empty() => role_dns.push(dn),
                _ => plain.push(value.clone()),
            }
        }
    }
    (role_dns, plain)
}

/// Resolves the backend roles of an authenticated identity from the directory.
pub struct RoleResolver<P: ConnectionProvider> {
    config: ResolverConfig,
    provider: Arc<P>,
    users: UserSearcher,
    shut_down: AtomicBool,
}

impl<P: ConnectionProvider> RoleResolver<P> {
    pub fn new(config: ResolverConfig, provider: Arc<P>) -> Self {
        let users = UserSearcher::new(config.user_bases.clone());
        Self {
            config,
            provider,
            users,
            shut_down: AtomicBool::new(false),
        }
    }

    pub fn backend_type(&self) -> &'static str {
        BACKEND_TYPE
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    // ==================== Resolution ====================

    /// Add the identity's directory roles, recording resolution metrics.
    ///
    /// Fails with [`AuthzError::NotFound`] when no entry exists for the
    /// subject and with [`AuthzError::Directory`] on any directory failure
    /// outside nested expansion. On failure no roles are added.
    pub async fn resolve_roles(
        &self,
        identity: Identity,
        context: &AuthenticationContext,
    ) -> Result<Identity> {
        let started = Instant::now();
        let result = self.add_roles(identity, context).await;

        let outcome = match &result {
            Ok(_) => "success",
            Err(e) => e.kind(),
        };
        counter!("ldap_authz_resolutions_total", "result" => outcome).increment(1);
        histogram!("ldap_authz_resolution_duration_seconds")
            .record(started.elapsed().as_secs_f64());

        result
    }

    pub async fn add_roles(
        &self,
        identity: Identity,
        context: &AuthenticationContext,
    ) -> Result<Identity> {
        let (subject, original_username) = match &context.entry {
            Some(entry) => (
                entry.dn.as_str().to_string(),
                context
                    .credentials
                    .as_ref()
                    .map(|credentials| credentials.username.clone())
                    .unwrap_or_else(|| identity.name().to_string()),
            ),
            None => (identity.name().to_string(), identity.name().to_string()),
        };

        if self.config.skip_users.test(&subject) {
            tracing::debug!(
                subject = %subject,
                username = %original_username,
                "Skipped role resolution for user"
            );
            return Ok(identity);
        }

        tracing::debug!(subject = %subject, "Resolving roles");

        let mut conn = self.provider.acquire(&self.config.scope).await?;
        let resolved = self
            .resolve_with(conn.as_mut(), &identity, context, &subject, &original_username)
            .await;

        if let Err(e) = conn.close().await {
            tracing::warn!(error = %e, "Failed to release directory connection");
        }

        let roles = resolved?;
        tracing::debug!(user = %identity.name(), roles = ?roles, "Resolved roles");
        Ok(identity.with_roles(roles))
    }

    async fn resolve_with(
        &self,
        conn: &mut dyn DirectoryConnection,
        identity: &Identity,
        context: &AuthenticationContext,
        subject: &str,
        original_username: &str,
    ) -> Result<BTreeSet<String>> {
        let config = &self.config;
        let entry = self.subject_entry(conn, identity, context, subject).await?;

        // Attribute roles carry no search origin, so they belong to every base
        let (attribute_dns, plain_roles) = attribute_roles(&entry, &config.user_role_attributes);
        let mut roles = RoleOriginIndex::new();
        for dn in attribute_dns {
            roles.record_all(dn, config.role_bases.all_indices());
        }
        tracing::trace!(
            role_dns = roles.len(),
            plain_roles = plain_roles.len(),
            "Attribute roles extracted"
        );

        if config.rolesearch_enabled {
            let found = self.search_roles(conn, &entry, original_username).await?;
            roles.merge(found);
        }

        let mut role_dns: BTreeSet<Dn> = roles.dns().cloned().collect();
        if config.resolve_nested_roles() {
            let nested = NestedRoleExpander::new(config).expand(conn, &roles).await;
            tracing::trace!(count = nested.len(), "Nested roles resolved");
            role_dns.extend(nested);
        }

        let mut names = BTreeSet::new();
        for dn in &role_dns {
            if config.exclude_roles.test(dn.as_str()) {
                tracing::debug!(role = %dn, "Role excluded");
                continue;
            }
            match self.role_name(conn, dn).await {
                Some(name) if config.exclude_roles.test(&name) => {
                    tracing::debug!(role = %dn, name = %name, "Role excluded");
                }
                Some(name) => {
                    names.insert(name);
                }
                None => {
                    tracing::debug!(
                        role = %dn,
                        attribute = %config.role_name_attribute,
                        "Role name attribute empty"
                    );
                }
            }
        }

        for role in plain_roles {
            if config.exclude_roles.test(&role) {
                tracing::debug!(role = %role, "Role excluded");
            } else {
                names.insert(role);
            }
        }

        Ok(names)
    }

    /// Entry of the subject: reused from the context, looked up by DN, or
    /// searched for by username.
    async fn subject_entry(
        &self,
        conn: &mut dyn DirectoryConnection,
        identity: &Identity,
        context: &AuthenticationContext,
        subject: &str,
    ) -> Result<DirectoryEntry> {
        if let Some(entry) = &context.entry {
            return Ok(entry.clone());
        }

        let entry = if Dn::is_valid(subject) {
            tracing::trace!(subject = %subject, "Subject is a valid DN, looking it up");
            conn.lookup(subject, &self.config.query).await?
        } else {
            self.users
                .find(conn, identity.name(), &self.config.query)
                .await?
        };

        entry.ok_or_else(|| AuthzError::NotFound(format!("No user '{}' found", subject)))
    }

    /// Run every role search base for the subject.
    async fn search_roles(
        &self,
        conn: &mut dyn DirectoryConnection,
        entry: &DirectoryEntry,
        original_username: &str,
    ) -> Result<RoleOriginIndex> {
        let config = &self.config;
        let user_role_value = config
            .user_role_attribute
            .as_deref()
            .and_then(|attribute| entry.single_value(attribute))
            .unwrap_or(USER_ROLE_ATTRIBUTE_FALLBACK);

        let mut found = RoleOriginIndex::new();
        for (index, base) in config.role_bases.iter() {
            let filter = base
                .filter
                .render(&[entry.dn.as_str(), original_username, user_role_value]);
            tracing::trace!(
                base = %base.name,
                search_base = %base.base,
                filter = %filter,
                "Role search"
            );

            let results = conn
                .search(&base.base, &filter, SearchScope::Subtree, &config.query)
                .await?;

            for result in results {
                if config.exclude_roles.test(result.dn.as_str()) {
                    tracing::debug!(role = %result.dn, "Role excluded");
                    continue;
                }
                found.record(result.dn, index);
            }
        }

        tracing::trace!(count = found.len(), "Role search finished");
        Ok(found)
    }

    // ==================== Role names ====================

    /// Name of the role identified by `dn`.
    ///
    /// With the role name attribute set to `dn` the DN itself is returned
    /// without touching the directory. Otherwise the attribute's first value
    /// is returned; a missing entry or attribute, or a failed lookup, yields
    /// `None`.
    pub async fn role_name(&self, conn: &mut dyn DirectoryConnection, dn: &Dn) -> Option<String> {
        let attribute = self.config.role_name_attribute.as_str();
        if attribute.is_empty() {
            return None;
        }
        if attribute.eq_ignore_ascii_case(DN_ROLE_NAME) {
            return Some(dn.as_str().to_string());
        }

        match conn.lookup(dn.as_str(), &self.config.query).await {
            Ok(Some(entry)) => entry.single_value(attribute).map(str::to_string),
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(role = %dn, error = %e, "Unable to look up role name");
                None
            }
        }
    }

    // ==================== Lifecycle ====================

    /// Release the connection pool. Only the first call has an effect.
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.provider.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::directory::{MockConnectionProvider, MockDirectoryConnection};
    use crate::domain::Credentials;
    use crate::error::DirectoryError;
    use mockall::predicate::*;
    use pretty_assertions::assert_eq;

    const ALICE: &str = "uid=alice,ou=people,dc=example";

    fn dn(s: &str) -> Dn {
        Dn::parse(s).unwrap()
    }

    fn settings() -> Settings {
        let mut settings = Settings::default();
        settings.authz.rolebase = Some("ou=groups,dc=example".to_string());
        settings.authz.rolename = "cn".to_string();
        settings
    }

    fn alice() -> DirectoryEntry {
        DirectoryEntry::new(dn(ALICE)).with_attribute("memberOf", ["cn=eng,ou=groups,dc=example"])
    }

    fn group(cn: &str) -> DirectoryEntry {
        DirectoryEntry::new(dn(&format!("cn={},ou=groups,dc=example", cn)))
            .with_attribute("cn", [cn])
    }

    fn provider_with(conn: MockDirectoryConnection) -> MockConnectionProvider {
        let mut provider = MockConnectionProvider::new();
        let mut conn = Some(conn);
        provider.expect_acquire().times(1).returning(move |_| {
            conn.take()
                .map(|c| Box::new(c) as Box<dyn DirectoryConnection>)
                .ok_or(DirectoryError::PoolClosed)
        });
        provider
    }

    fn resolver(
        settings: &Settings,
        provider: MockConnectionProvider,
    ) -> RoleResolver<MockConnectionProvider> {
        RoleResolver::new(ResolverConfig::from_settings(settings).unwrap(), Arc::new(provider))
    }

    fn lookup_groups(conn: &mut MockDirectoryConnection) {
        conn.expect_lookup().returning(|d, _| {
            let parsed = Dn::parse(d).unwrap();
            let cn = parsed
                .as_str()
                .split(',')
                .next()
                .unwrap()
                .trim_start_matches("cn=")
                .to_string();
            Ok(Some(group(&cn)))
        });
    }

    #[tokio::test]
    async fn test_skip_user_does_no_directory_io() {
        let mut settings = settings();
        settings.authz.skip_users = vec!["kibana*".to_string()];

        let mut provider = MockConnectionProvider::new();
        provider.expect_acquire().times(0);

        let identity = Identity::new("kibanaserver").with_roles(["existing"]);
        let result = resolver(&settings, provider)
            .resolve_roles(identity.clone(), &AuthenticationContext::default())
            .await
            .unwrap();
        assert_eq!(result, identity);
    }

    #[tokio::test]
    async fn test_attribute_roles_without_search() {
        let mut settings = settings();
        settings.authz.rolesearch_enabled = false;

        let mut conn = MockDirectoryConnection::new();
        conn.expect_lookup()
            .with(eq(ALICE), always())
            .times(1)
            .returning(|_, _| Ok(Some(alice().with_attribute("memberOf", ["plain-role"]))));
        conn.expect_lookup()
            .with(eq("cn=eng,ou=groups,dc=example"), always())
            .times(1)
            .returning(|_, _| Ok(Some(group("eng"))));
        conn.expect_search().times(0);
        conn.expect_close().times(1).returning(|| Ok(()));

        let result = resolver(&settings, provider_with(conn))
            .resolve_roles(Identity::new(ALICE), &AuthenticationContext::default())
            .await
            .unwrap();

        let roles: Vec<_> = result.roles().iter().cloned().collect();
        assert_eq!(roles, vec!["eng", "plain-role"]);
    }

    #[tokio::test]
    async fn test_role_search_uses_all_slots_and_excludes() {
        let mut settings = settings();
        settings.authz.rolesearch = Some("(|(member={0})(memberUid={1})(gid={2}))".to_string());
        settings.authz.userroleattribute = Some("gidNumber".to_string());
        settings.authz.exclude_roles = vec!["cn=admins,*".to_string()];

        let entry = alice().with_attribute("gidNumber", ["500"]);
        let context = AuthenticationContext::with_entry(entry, Credentials::new("alice"));

        let mut conn = MockDirectoryConnection::new();
        conn.expect_search()
            .with(
                eq("ou=groups,dc=example"),
                eq("(|(member=uid=alice,ou=people,dc=example)(memberUid=alice)(gid=500))"),
                eq(SearchScope::Subtree),
                always(),
            )
            .times(1)
            .returning(|_, _, _, _| Ok(vec![group("ops"), group("admins")]));
        lookup_groups(&mut conn);
        conn.expect_close().times(1).returning(|| Ok(()));

        let result = resolver(&settings, provider_with(conn))
            .resolve_roles(Identity::new("alice"), &context)
            .await
            .unwrap();

        let roles: Vec<_> = result.roles().iter().cloned().collect();
        assert_eq!(roles, vec!["eng", "ops"]);
    }

    #[tokio::test]
    async fn test_missing_user_role_attribute_uses_fallback() {
        let mut settings = settings();
        settings.authz.rolesearch = Some("(gid={2})".to_string());
        settings.authz.userroleattribute = Some("gidNumber".to_string());

        let context = AuthenticationContext::with_entry(alice(), Credentials::new("alice"));

        let mut conn = MockDirectoryConnection::new();
        conn.expect_search()
            .with(always(), eq("(gid=2)"), always(), always())
            .times(1)
            .returning(|_, _, _, _| Ok(vec![]));
        lookup_groups(&mut conn);
        conn.expect_close().times(1).returning(|| Ok(()));

        resolver(&settings, provider_with(conn))
            .resolve_roles(Identity::new("alice"), &context)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_username_is_searched_when_not_a_dn() {
        let mut settings = settings();
        settings.authz.rolesearch_enabled = false;
        settings.users.userbase = Some("ou=people,dc=example".to_string());
        settings.users.usersearch = Some("(uid={0})".to_string());

        let mut conn = MockDirectoryConnection::new();
        conn.expect_search()
            .with(eq("ou=people,dc=example"), eq("(uid=alice)"), always(), always())
            .times(1)
            .returning(|_, _, _, _| Ok(vec![alice()]));
        lookup_groups(&mut conn);
        conn.expect_close().times(1).returning(|| Ok(()));

        let result = resolver(&settings, provider_with(conn))
            .resolve_roles(Identity::new("alice"), &AuthenticationContext::default())
            .await
            .unwrap();
        assert!(result.roles().contains("eng"));
    }

    #[tokio::test]
    async fn test_not_found_releases_connection() {
        let mut conn = MockDirectoryConnection::new();
        conn.expect_lookup().returning(|_, _| Ok(None));
        conn.expect_close().times(1).returning(|| Ok(()));

        let result = resolver(&settings(), provider_with(conn))
            .resolve_roles(Identity::new(ALICE), &AuthenticationContext::default())
            .await;

        assert!(matches!(result, Err(AuthzError::NotFound(msg)) if msg.contains(ALICE)));
    }

    #[tokio::test]
    async fn test_search_failure_is_fatal_and_releases_connection() {
        let context = AuthenticationContext::with_entry(alice(), Credentials::new("alice"));

        let mut conn = MockDirectoryConnection::new();
        conn.expect_search().returning(|_, _, _, _| {
            Err(DirectoryError::Operation {
                operation: "search",
                rc: 1,
                message: "operations error".to_string(),
            })
        });
        conn.expect_lookup().times(0);
        conn.expect_close().times(1).returning(|| Ok(()));

        let result = resolver(&settings(), provider_with(conn))
            .resolve_roles(Identity::new("alice"), &context)
            .await;

        assert!(matches!(result, Err(AuthzError::Directory(_))));
    }

    #[tokio::test]
    async fn test_acquire_failure_is_directory_error() {
        let mut provider = MockConnectionProvider::new();
        provider
            .expect_acquire()
            .times(1)
            .returning(|_| Err(DirectoryError::Unavailable("no hosts".to_string())));

        let result = resolver(&settings(), provider)
            .resolve_roles(Identity::new("alice"), &AuthenticationContext::default())
            .await;
        assert!(matches!(result, Err(AuthzError::Directory(DirectoryError::Unavailable(_)))));
    }

    #[tokio::test]
    async fn test_role_name_dn_needs_no_lookup() {
        let mut settings = settings();
        settings.authz.rolename = "DN".to_string();

        let mut conn = MockDirectoryConnection::new();
        conn.expect_lookup().times(0);

        let resolver = resolver(&settings, MockConnectionProvider::new());
        let name = resolver
            .role_name(&mut conn, &dn("CN=Eng,OU=Groups,DC=Example"))
            .await;
        assert_eq!(name.as_deref(), Some("CN=Eng,OU=Groups,DC=Example"));
    }

    #[tokio::test]
    async fn test_role_name_lookup_failure_is_none() {
        let mut conn = MockDirectoryConnection::new();
        conn.expect_lookup()
            .times(1)
            .returning(|_, _| Err(DirectoryError::Unavailable("down".to_string())));

        let resolver = resolver(&settings(), MockConnectionProvider::new());
        assert_eq!(resolver.role_name(&mut conn, &dn("cn=eng,dc=example")).await, None);
    }

    #[tokio::test]
    async fn test_role_name_missing_attribute_is_none() {
        let mut conn = MockDirectoryConnection::new();
        conn.expect_lookup()
            .times(1)
            .returning(|_, _| {
                Ok(Some(DirectoryEntry::new(
                    Dn::parse("cn=eng,dc=example").unwrap(),
                )))
            });

        let resolver = resolver(&settings(), MockConnectionProvider::new());
        assert_eq!(resolver.role_name(&mut conn, &dn("cn=eng,dc=example")).await, None);
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let mut provider = MockConnectionProvider::new();
        provider.expect_shutdown().times(1).returning(|| ());

        let resolver = resolver(&settings(), provider);
        assert_eq!(resolver.backend_type(), "ldap");
        resolver.shutdown().await;
        resolver.shutdown().await;
    }

    #[test]
    fn test_attribute_roles_split() {
        let entry = DirectoryEntry::new(dn(ALICE))
            .with_attribute("memberOf", ["cn=eng,dc=example", "not a dn", ""])
            .with_attribute("isMemberOf", ["cn=ops,dc=example"]);

        let attributes = ["memberOf".to_string(), "isMemberOf".to_string()];
        let (dns, plain) = attribute_roles(&entry, &attributes);
        assert_eq!(dns, vec![dn("cn=eng,dc=example"), dn("cn=ops,dc=example")]);
        assert_eq!(plain, vec!["not a dn".to_string(), String::new()]);
    }
}
