//! Nested (transitive) role expansion

use super::origin::RoleOriginIndex;
use super::resolver::attribute_roles;
use crate::config::ResolverConfig;
use crate::directory::{DirectoryConnection, DirectoryResult, SearchScope};
use crate::domain::Dn;
use std::collections::{BTreeSet, HashSet};

/// Expands role DNs into the roles they are themselves members of.
///
/// Expansion runs level by level. Level 0 is the set of top-level roles;
/// a role discovered at depth `d` is kept only when `d <= max_nested_depth`.
/// Every DN is expanded at most once per call, so membership cycles
/// terminate regardless of the depth limit.
pub struct NestedRoleExpander<'a> {
    config: &'a ResolverConfig,
}

impl<'a> NestedRoleExpander<'a> {
    pub fn new(config: &'a ResolverConfig) -> Self {
        Self { config }
    }

    /// Return the descendant role DNs of `top_level`, excluding the
    /// top-level roles themselves.
    ///
    /// Directory failures for a single role are logged and that role
    /// contributes nothing; they never abort the expansion.
    pub async fn expand(
        &self,
        conn: &mut dyn DirectoryConnection,
        top_level: &RoleOriginIndex,
    ) -> BTreeSet<Dn> {
        let max_depth = self.config.max_nested_depth;
        let mut visited: HashSet<Dn> = top_level.dns().cloned().collect();
        let mut discovered = BTreeSet::new();
        let mut frontier = top_level.clone();
        let mut depth = 0;

        while depth < max_depth && !frontier.is_empty() {
            let mut next = RoleOriginIndex::new();

            for (dn, bases) in frontier.iter() {
                if self.is_cut_off(dn) {
                    tracing::debug!(role = %dn, "Nested role filter matched, not expanding");
                    continue;
                }

                match self.expand_one(conn, dn, bases).await {
                    Ok(found) => {
                        for (child, child_bases) in found {
                            if !visited.contains(&child) {
                                next.record_all(child, child_bases);
                            }
                        }
                    }
                    Err(e) => {
                        tracing::warn!(role = %dn, error = %e, "Unable to resolve nested roles");
                    }
                }
            }

            depth += 1;
            for dn in next.dns() {
                visited.insert(dn.clone());
                discovered.insert(dn.clone());
            }
            tracing::trace!(depth, found = next.len(), "Nested role level expanded");
            frontier = next;
        }

        if !frontier.is_empty() {
            tracing::debug!(
                max_depth,
                pending = frontier.len(),
                "Maximum nesting depth reached"
            );
        }

        metrics::counter!("ldap_authz_nested_roles_total").increment(discovered.len() as u64);
        discovered
    }

    fn is_cut_off(&self, dn: &Dn) -> bool {
        self.config
            .nested_role_filter
            .as_ref()
            .is_some_and(|filter| filter.test(dn.as_str()))
    }

    /// Direct parents of one role: attribute roles of its entry plus the
    /// results of searching its origin bases for it.
    async fn expand_one(
        &self,
        conn: &mut dyn DirectoryConnection,
        dn: &Dn,
        bases: &BTreeSet<usize>,
    ) -> DirectoryResult<RoleOriginIndex> {
        let config = self.config;
        let mut found = RoleOriginIndex::new();

        match conn.lookup(dn.as_str(), &config.query).await? {
            Some(entry) => {
                let (role_dns, _) = attribute_roles(&entry, &config.user_role_attributes);
                for role in role_dns {
                    found.record_all(role, config.role_bases.all_indices());
                }
            }
            None => tracing::debug!(role = %dn, "Role entry not found"),
        }

        if config.rolesearch_enabled {
            for &index in bases {
                let Some(base) = config.role_bases.get(index) else {
                    continue;
                };
                let filter = base.filter.render(&[dn.as_str(), dn.as_str()]);
                let entries = conn
                    .search(&base.base, &filter, SearchScope::Subtree, &config.query)
                    .await?;
                for entry in entries {
                    found.record(entry.dn, index);
                }
            }
        }

        Ok(found)
    }
}
