//! Common test utilities
//!
//! [`TestDirectory`] is an in-memory directory implementing the connection
//! traits. It records every acquisition, release, lookup and search so tests
//! can assert on directory I/O.

#![allow(dead_code)]

use async_trait::async_trait;
use ldap_authz::config::{ResolverConfig, Settings};
use ldap_authz::directory::{
    ConnectionProvider, DirectoryConnection, DirectoryResult, PrivilegedScope, QueryOptions,
    SearchScope,
};
use ldap_authz::domain::{DirectoryEntry, Dn};
use ldap_authz::error::DirectoryError;
use ldap_authz::RoleResolver;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

pub const ALICE_DN: &str = "uid=alice,ou=people,dc=example";
pub const GROUPS_BASE: &str = "ou=groups,dc=example";

// ============================================================================
// Test Directory
// ============================================================================

#[derive(Default)]
struct DirectoryState {
    entries: RwLock<HashMap<Dn, DirectoryEntry>>,
    searches: RwLock<HashMap<(String, String), Vec<String>>>,
    failing_lookups: RwLock<HashSet<Dn>>,
    failing_searches: RwLock<HashSet<(String, String)>>,
    lookup_log: RwLock<Vec<String>>,
    search_log: RwLock<Vec<(String, String)>>,
    acquired: AtomicUsize,
    closed: AtomicUsize,
    shutdowns: AtomicUsize,
}

/// In-memory directory shared by every connection it hands out.
#[derive(Clone, Default)]
pub struct TestDirectory {
    state: Arc<DirectoryState>,
}

impl TestDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_entry(&self, entry: DirectoryEntry) {
        self.state
            .entries
            .write()
            .await
            .insert(entry.dn.clone(), entry);
    }

    /// Add a group entry carrying `cn` and `memberOf` attributes.
    pub async fn add_group(&self, dn: &str, cn: &str, member_of: &[&str]) {
        let mut entry = DirectoryEntry::new(parse(dn)).with_attribute("cn", [cn]);
        if !member_of.is_empty() {
            entry.add_values("memberOf", member_of.iter().copied());
        }
        self.add_entry(entry).await;
    }

    /// Register the DNs returned by a subtree search of `base` with `filter`.
    pub async fn add_search(&self, base: &str, filter: &str, dns: &[&str]) {
        self.state.searches.write().await.insert(
            (base.to_string(), filter.to_string()),
            dns.iter().map(|dn| dn.to_string()).collect(),
        );
    }

    pub async fn fail_lookup(&self, dn: &str) {
        self.state.failing_lookups.write().await.insert(parse(dn));
    }

    pub async fn fail_search(&self, base: &str, filter: &str) {
        self.state
            .failing_searches
            .write()
            .await
            .insert((base.to_string(), filter.to_string()));
    }

    pub fn acquired(&self) -> usize {
        self.state.acquired.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.state.closed.load(Ordering::SeqCst)
    }

    pub fn shutdowns(&self) -> usize {
        self.state.shutdowns.load(Ordering::SeqCst)
    }

    pub async fn lookup_count(&self) -> usize {
        self.state.lookup_log.read().await.len()
    }

    /// Number of lookups of `dn` (compared as DNs).
    pub async fn lookups_of(&self, dn: &str) -> usize {
        let target = parse(dn);
        self.state
            .lookup_log
            .read()
            .await
            .iter()
            .filter(|logged| Dn::parse(logged).map(|d| d == target).unwrap_or(false))
            .count()
    }

    pub async fn searches(&self) -> Vec<(String, String)> {
        self.state.search_log.read().await.clone()
    }
}

#[async_trait]
impl ConnectionProvider for TestDirectory {
    async fn acquire(
        &self,
        _scope: &PrivilegedScope,
    ) -> DirectoryResult<Box<dyn DirectoryConnection>> {
        self.state.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(TestConnection {
            state: self.state.clone(),
            open: true,
        }))
    }

    async fn shutdown(&self) {
        self.state.shutdowns.fetch_add(1, Ordering::SeqCst);
    }
}

struct TestConnection {
    state: Arc<DirectoryState>,
    open: bool,
}

#[async_trait]
impl DirectoryConnection for TestConnection {
    async fn lookup(
        &mut self,
        dn: &str,
        _options: &QueryOptions,
    ) -> DirectoryResult<Option<DirectoryEntry>> {
        self.state.lookup_log.write().await.push(dn.to_string());
        let key = Dn::parse(dn)?;

        if self.state.failing_lookups.read().await.contains(&key) {
            return Err(DirectoryError::Unavailable(format!("lookup of {} failed", dn)));
        }
        Ok(self.state.entries.read().await.get(&key).cloned())
    }

    async fn search(
        &mut self,
        base: &str,
        filter: &str,
        _scope: SearchScope,
        _options: &QueryOptions,
    ) -> DirectoryResult<Vec<DirectoryEntry>> {
        let key = (base.to_string(), filter.to_string());
        self.state.search_log.write().await.push(key.clone());

        if self.state.failing_searches.read().await.contains(&key) {
            return Err(DirectoryError::Operation {
                operation: "search",
                rc: 1,
                message: "operations error".to_string(),
            });
        }

        let Some(dns) = self.state.searches.read().await.get(&key).cloned() else {
            return Ok(Vec::new());
        };
        let entries = self.state.entries.read().await;
        Ok(dns
            .iter()
            .map(|dn| {
                let dn = parse(dn);
                entries
                    .get(&dn)
                    .cloned()
                    .unwrap_or_else(|| DirectoryEntry::new(dn))
            })
            .collect())
    }

    async fn close(&mut self) -> DirectoryResult<()> {
        if self.open {
            self.open = false;
            self.state.closed.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

// ============================================================================
// Helpers
// ============================================================================

pub fn parse(dn: &str) -> Dn {
    Dn::parse(dn).unwrap()
}

pub fn group_dn(cn: &str) -> String {
    format!("cn={},{}", cn, GROUPS_BASE)
}

/// Settings with a single legacy role base under [`GROUPS_BASE`] and `cn`
/// as role name attribute.
pub fn base_settings() -> Settings {
    let mut settings = Settings::default();
    settings.authz.rolebase = Some(GROUPS_BASE.to_string());
    settings.authz.rolesearch = Some("(member={0})".to_string());
    settings.authz.rolename = "cn".to_string();
    settings
}

pub fn resolver(directory: &TestDirectory, settings: &Settings) -> RoleResolver<TestDirectory> {
    let config = ResolverConfig::from_settings(settings).unwrap();
    RoleResolver::new(config, Arc::new(directory.clone()))
}

pub fn sorted(roles: &std::collections::BTreeSet<String>) -> Vec<&str> {
    roles.iter().map(String::as_str).collect()
}
