//! `ldap3`-backed connection pool

use super::{
    ConnectionProvider, DirectoryConnection, DirectoryResult, PrivilegedScope, QueryOptions,
    SearchScope,
};
use crate::config::ConnectionSettings;
use crate::domain::{DirectoryEntry, Dn};
use crate::error::DirectoryError;
use async_trait::async_trait;
use ldap3::{Ldap, LdapConnAsync, LdapConnSettings, LdapResult, Scope, SearchEntry};
use metrics::{counter, gauge};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use url::Url;

/// LDAP result codes the adapter handles itself
mod rc {
    pub const SUCCESS: u32 = 0;
    pub const REFERRAL: u32 = 10;
    pub const NO_SUCH_OBJECT: u32 = 32;
}

const MATCH_ALL: &str = "(objectClass=*)";

struct IdleConnection {
    bind_dn: Option<String>,
    ldap: Ldap,
}

struct PoolInner {
    hosts: Vec<String>,
    connect_timeout: Duration,
    operation_timeout: Duration,
    start_tls: bool,
    verify_hostnames: bool,
    permits: Arc<Semaphore>,
    idle: Mutex<Vec<IdleConnection>>,
    closed: AtomicBool,
}

impl PoolInner {
    fn conn_settings(&self) -> LdapConnSettings {
        LdapConnSettings::new()
            .set_conn_timeout(self.connect_timeout)
            .set_starttls(self.start_tls)
            .set_no_tls_verify(!self.verify_hostnames)
    }

    async fn connect(&self, url: &str, scope: &PrivilegedScope) -> DirectoryResult<Ldap> {
        let (conn, mut ldap) = LdapConnAsync::with_settings(self.conn_settings(), url).await?;
        ldap3::drive!(conn);

        if let Some(bind_dn) = scope.bind_dn() {
            ldap.with_timeout(self.operation_timeout)
                .simple_bind(bind_dn, scope.password())
                .await?
                .success()?;
        }
        Ok(ldap)
    }

    /// Try every configured host in order until one accepts the bind.
    async fn open(&self, scope: &PrivilegedScope) -> DirectoryResult<Ldap> {
        let mut failures = Vec::with_capacity(self.hosts.len());
        for host in &self.hosts {
            match self.connect(host, scope).await {
                Ok(ldap) => {
                    tracing::debug!(host = %host, "Connected to directory");
                    return Ok(ldap);
                }
                Err(e) => {
                    tracing::warn!(host = %host, error = %e, "Directory host unavailable");
                    failures.push(format!("{}: {}", host, e));
                }
            }
        }
        Err(DirectoryError::Unavailable(failures.join("; ")))
    }

    /// Reuse an idle connection bound as `bind_dn`, discarding any whose
    /// connection has been closed by the peer in the meantime.
    fn take_idle(&self, bind_dn: Option<&str>) -> Option<Ldap> {
        let mut idle = self.idle.lock().ok()?;
        let before = idle.len();
        idle.retain_mut(|conn| !conn.ldap.is_closed());
        if idle.len() < before {
            tracing::debug!(discarded = before - idle.len(), "Discarded closed idle connections");
        }

        let position = idle
            .iter()
            .position(|conn| conn.bind_dn.as_deref() == bind_dn);
        let taken = position.map(|position| idle.swap_remove(position).ldap);
        gauge!("ldap_authz_pool_connections_idle").set(idle.len() as f64);
        taken
    }

    fn put_idle(&self, bind_dn: Option<String>, mut ldap: Ldap) {
        if self.closed.load(Ordering::SeqCst) || ldap.is_closed() {
            return;
        }
        if let Ok(mut idle) = self.idle.lock() {
            idle.push(IdleConnection { bind_dn, ldap });
            gauge!("ldap_authz_pool_connections_idle").set(idle.len() as f64);
        }
    }
}

/// Bounded pool of bound LDAP connections.
///
/// At most `pool_max_size` connections are handed out at once; further
/// `acquire` calls wait up to the connect timeout for one to be returned. Idle connections are only
/// reused for the same bind identity.
#[derive(Clone)]
pub struct LdapConnectionPool {
    inner: Arc<PoolInner>,
}

impl LdapConnectionPool {
    pub fn new(settings: &ConnectionSettings) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                hosts: settings.hosts.clone(),
                connect_timeout: Duration::from_secs(settings.connect_timeout_secs),
                operation_timeout: Duration::from_secs(settings.operation_timeout_secs),
                start_tls: settings.enable_start_tls,
                verify_hostnames: settings.verify_hostnames,
                permits: Arc::new(Semaphore::new(settings.pool_max_size.max(1))),
                idle: Mutex::new(Vec::new()),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    pub fn idle_count(&self) -> usize {
        self.inner.idle.lock().map(|idle| idle.len()).unwrap_or(0)
    }
}

#[async_trait]
impl ConnectionProvider for LdapConnectionPool {
    async fn acquire(
        &self,
        scope: &PrivilegedScope,
    ) -> DirectoryResult<Box<dyn DirectoryConnection>> {
        if self.is_closed() {
            return Err(DirectoryError::PoolClosed);
        }

        let permit = tokio::time::timeout(
            self.inner.connect_timeout,
            self.inner.permits.clone().acquire_owned(),
        )
        .await
        .map_err(|_| {
            DirectoryError::Unavailable("Timed out waiting for a pooled connection".to_string())
        })?
        .map_err(|_| DirectoryError::PoolClosed)?;

        let ldap = match self.inner.take_idle(scope.bind_dn()) {
            Some(ldap) => ldap,
            None => self.inner.open(scope).await?,
        };

        Ok(Box::new(PooledConnection {
            ldap: Some(ldap),
            scope: scope.clone(),
            permit: Some(permit),
            pool: self.inner.clone(),
            broken: false,
        }))
    }

    async fn shutdown(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.permits.close();

        let idle: Vec<IdleConnection> = match self.inner.idle.lock() {
            Ok(mut idle) => idle.drain(..).collect(),
            Err(_) => Vec::new(),
        };
        gauge!("ldap_authz_pool_connections_idle").set(0.0);

        for mut conn in idle {
            if let Err(e) = conn.ldap.unbind().await {
                tracing::debug!(error = %e, "Failed to unbind idle connection");
            }
        }
        tracing::info!("LDAP connection pool shut down");
    }
}

/// Connection checked out of [`LdapConnectionPool`].
///
/// Returned to the pool on `close` or drop, unless a transport error marked
/// it broken.
struct PooledConnection {
    ldap: Option<Ldap>,
    scope: PrivilegedScope,
    permit: Option<OwnedSemaphorePermit>,
    pool: Arc<PoolInner>,
    broken: bool,
}

impl PooledConnection {
    fn ldap(&mut self) -> DirectoryResult<&mut Ldap> {
        self.ldap.as_mut().ok_or(DirectoryError::PoolClosed)
    }

    async fn run_search(
        &mut self,
        operation: &'static str,
        base: &str,
        scope: SearchScope,
        filter: &str,
        options: &QueryOptions,
    ) -> DirectoryResult<(Vec<DirectoryEntry>, LdapResult)> {
        let timeout = self.pool.operation_timeout;
        let ldap = self.ldap()?;
        let outcome = ldap
            .with_timeout(timeout)
            .search(base, to_ldap_scope(scope), filter, options.return_attributes.clone())
            .await;

        let ldap3::SearchResult(raw, result) = match outcome {
            Ok(found) => found,
            Err(e) => {
                self.broken = true;
                record_operation(operation, "error");
                return Err(e.into());
            }
        };

        let mut entries = Vec::with_capacity(raw.len());
        for item in raw {
            if item.is_ref() {
                tracing::debug!(base = %base, "Skipping search continuation reference");
                continue;
            }
            entries.push(to_entry(SearchEntry::construct(item))?);
        }
        Ok((entries, result))
    }

    /// Follow a single referral hop on a fresh connection to the referred host.
    async fn chase_referral(
        &mut self,
        refs: &[String],
        base: &str,
        scope: SearchScope,
        filter: &str,
        options: &QueryOptions,
    ) -> DirectoryResult<Vec<DirectoryEntry>> {
        let reference = refs
            .first()
            .ok_or_else(|| DirectoryError::InvalidReferral(String::new()))?;
        let referral = Referral::parse(reference)?;
        let target_base = referral.base.as_deref().unwrap_or(base);
        tracing::debug!(referral = %reference, base = %target_base, "Following referral");

        let mut ldap = self.pool.connect(&referral.host_url, &self.scope).await?;
        let outcome = ldap
            .with_timeout(self.pool.operation_timeout)
            .search(
                target_base,
                to_ldap_scope(scope),
                filter,
                options.return_attributes.clone(),
            )
            .await;
        let _ = ldap.unbind().await;

        let ldap3::SearchResult(raw, result) = outcome?;
        check_rc("referral", &result)?;
        raw.into_iter()
            .filter(|item| !item.is_ref())
            .map(|item| to_entry(SearchEntry::construct(item)))
            .collect()
    }
}

#[async_trait]
impl DirectoryConnection for PooledConnection {
    async fn lookup(
        &mut self,
        dn: &str,
        options: &QueryOptions,
    ) -> DirectoryResult<Option<DirectoryEntry>> {
        let (entries, result) = self
            .run_search("lookup", dn, SearchScope::Base, MATCH_ALL, options)
            .await?;

        match result.rc {
            rc::SUCCESS => {
                record_operation("lookup", "ok");
                Ok(entries.into_iter().next())
            }
            rc::NO_SUCH_OBJECT => {
                record_operation("lookup", "not_found");
                Ok(None)
            }
            rc::REFERRAL if options.follow_referrals => {
                let entries = self
                    .chase_referral(&result.refs, dn, SearchScope::Base, MATCH_ALL, options)
                    .await?;
                record_operation("lookup", "ok");
                Ok(entries.into_iter().next())
            }
            rc::REFERRAL => {
                record_operation("lookup", "referral_ignored");
                Ok(None)
            }
            _ => {
                record_operation("lookup", "error");
                Err(operation_error("lookup", &result))
            }
        }
    }

    async fn search(
        &mut self,
        base: &str,
        filter: &str,
        scope: SearchScope,
        options: &QueryOptions,
    ) -> DirectoryResult<Vec<DirectoryEntry>> {
        let (entries, result) = self.run_search("search", base, scope, filter, options).await?;

        match result.rc {
            rc::SUCCESS => {
                record_operation("search", "ok");
                Ok(entries)
            }
            rc::REFERRAL if options.follow_referrals => {
                let mut entries = entries;
                let referred = self
                    .chase_referral(&result.refs, base, scope, filter, options)
                    .await?;
                entries.extend(referred);
                record_operation("search", "ok");
                Ok(entries)
            }
            rc::REFERRAL => {
                record_operation("search", "referral_ignored");
                Ok(entries)
            }
            _ => {
                record_operation("search", "error");
                Err(operation_error("search", &result))
            }
        }
    }

    async fn close(&mut self) -> DirectoryResult<()> {
        let Some(mut ldap) = self.ldap.take() else {
            return Ok(());
        };

        if self.broken || self.pool.closed.load(Ordering::SeqCst) {
            if let Err(e) = ldap.unbind().await {
                tracing::debug!(error = %e, "Failed to unbind connection");
            }
        } else {
            self.pool.put_idle(self.scope.bind_dn().map(str::to_string), ldap);
        }
        self.permit.take();
        Ok(())
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(ldap) = self.ldap.take() {
            if !self.broken {
                self.pool.put_idle(self.scope.bind_dn().map(str::to_string), ldap);
            }
        }
    }
}

/// Location a referral points at
#[derive(Debug, Clone, PartialEq, Eq)]
struct Referral {
    /// `scheme://host[:port]`
    host_url: String,
    /// Base DN carried in the URL path, if any
    base: Option<String>,
}

impl Referral {
    fn parse(reference: &str) -> DirectoryResult<Self> {
        let invalid = || DirectoryError::InvalidReferral(reference.to_string());

        let url = Url::parse(reference).map_err(|_| invalid())?;
        if !matches!(url.scheme(), "ldap" | "ldaps") {
            return Err(invalid());
        }
        let host = url.host_str().ok_or_else(invalid)?;
        let host_url = match url.port() {
            Some(port) => format!("{}://{}:{}", url.scheme(), host, port),
            None => format!("{}://{}", url.scheme(), host),
        };

        let path = url.path().trim_start_matches('/');
        let base = if path.is_empty() {
            None
        } else {
            // '+' separates multi-valued RDNs and must survive decoding
            let encoded = format!("b={}", path.replace('+', "%2B"));
            let decoded = url::form_urlencoded::parse(encoded.as_bytes())
                .next()
                .map(|(_, value)| value.into_owned())
                .ok_or_else(invalid)?;
            Some(decoded)
        };

        Ok(Self { host_url, base })
    }
}

fn to_ldap_scope(scope: SearchScope) -> Scope {
    match scope {
        SearchScope::Base => Scope::Base,
        SearchScope::OneLevel => Scope::OneLevel,
        SearchScope::Subtree => Scope::Subtree,
    }
}

fn to_entry(entry: SearchEntry) -> DirectoryResult<DirectoryEntry> {
    let dn = Dn::parse(&entry.dn)?;
    let mut attributes: Vec<(String, Vec<String>)> = entry.attrs.into_iter().collect();
    attributes.sort_by(|a, b| a.0.cmp(&b.0));

    let mut converted = DirectoryEntry::new(dn);
    for (name, values) in attributes {
        converted.add_values(&name, values);
    }
    Ok(converted)
}

fn check_rc(operation: &'static str, result: &LdapResult) -> DirectoryResult<()> {
    if result.rc == rc::SUCCESS {
        Ok(())
    } else {
        Err(operation_error(operation, result))
    }
}

fn operation_error(operation: &'static str, result: &LdapResult) -> DirectoryError {
    DirectoryError::Operation {
        operation,
        rc: result.rc,
        message: result.text.clone(),
    }
}

fn record_operation(operation: &'static str, result: &'static str) {
    counter!(
        "ldap_authz_directory_operations_total",
        "operation" => operation,
        "result" => result
    )
    .increment(1);
}
