//! Locating a user's entry from a login name

use super::{DirectoryConnection, DirectoryResult, QueryOptions, SearchScope};
use crate::domain::{DirectoryEntry, SearchBaseRegistry};

/// Finds the directory entry of a user across the configured user bases.
#[derive(Debug, Clone)]
pub struct UserSearcher {
    bases: SearchBaseRegistry,
}

impl UserSearcher {
    pub fn new(bases: SearchBaseRegistry) -> Self {
        Self { bases }
    }

    /// Search each user base in declared order and return the first hit.
    ///
    /// `{0}` in the filter is replaced with the escaped username. When a
    /// base yields several entries the first is used.
    pub async fn find(
        &self,
        conn: &mut dyn DirectoryConnection,
        username: &str,
        options: &QueryOptions,
    ) -> DirectoryResult<Option<DirectoryEntry>> {
        for (_, base) in self.bases.iter() {
            let filter = base.filter.render(&[username]);
            let entries = conn
                .search(&base.base, &filter, SearchScope::Subtree, options)
                .await?;

            if entries.len() > 1 {
                tracing::warn!(
                    username = %username,
                    base = %base.name,
                    count = entries.len(),
                    "Multiple user entries found, using the first one"
                );
            }

            if let Some(entry) = entries.into_iter().next() {
                tracing::debug!(
                    username = %username,
                    base = %base.name,
                    dn = %entry.dn,
                    "User entry found"
                );
                return Ok(Some(entry));
            }
        }

        tracing::debug!(username = %username, "No user entry found");
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::MockDirectoryConnection;
    use crate::domain::{Dn, FilterTemplate, SearchBase};
    use mockall::predicate::*;

    fn entry(dn: &str) -> DirectoryEntry {
        DirectoryEntry::new(Dn::parse(dn).unwrap())
    }

    fn searcher() -> UserSearcher {
        UserSearcher::new(SearchBaseRegistry::new(vec![
            SearchBase {
                name: "staff".to_string(),
                base: "ou=staff,dc=example".to_string(),
                filter: FilterTemplate::new("(uid={0})"),
            },
            SearchBase {
                name: "contractors".to_string(),
                base: "ou=contractors,dc=example".to_string(),
                filter: FilterTemplate::new("(uid={0})"),
            },
        ]))
    }

    #[tokio::test]
    async fn test_first_base_with_match_wins() {
        let mut conn = MockDirectoryConnection::new();
        conn.expect_search()
            .with(eq("ou=staff,dc=example"), eq("(uid=bob)"), always(), always())
            .times(1)
            .returning(|_, _, _, _| Ok(vec![]));
        conn.expect_search()
            .with(eq("ou=contractors,dc=example"), eq("(uid=bob)"), always(), always())
            .times(1)
            .returning(|_, _, _, _| Ok(vec![entry("uid=bob,ou=contractors,dc=example")]));

        let found = searcher()
            .find(&mut conn, "bob", &QueryOptions::default())
            .await
            .unwrap();
        assert_eq!(found.unwrap().dn.as_str(), "uid=bob,ou=contractors,dc=example");
    }

    #[tokio::test]
    async fn test_later_bases_not_searched_after_hit() {
        let mut conn = MockDirectoryConnection::new();
        conn.expect_search()
            .times(1)
            .returning(|_, _, _, _| {
                Ok(vec![
                    entry("uid=alice,ou=staff,dc=example"),
                    entry("uid=alice,ou=old,ou=staff,dc=example"),
                ])
            });

        let found = searcher()
            .find(&mut conn, "alice", &QueryOptions::default())
            .await
            .unwrap();
        assert_eq!(found.unwrap().dn.as_str(), "uid=alice,ou=staff,dc=example");
    }

    #[tokio::test]
    async fn test_username_is_escaped() {
        let mut conn = MockDirectoryConnection::new();
        conn.expect_search()
            .with(always(), eq("(uid=\\2a)"), always(), always())
            .times(2)
            .returning(|_, _, _, _| Ok(vec![]));

        let found = searcher()
            .find(&mut conn, "*", &QueryOptions::default())
            .await
            .unwrap();
        assert!(found.is_none());
    }
}
