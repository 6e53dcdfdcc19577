//! Search base definitions and their normalization
//!
//! Role (and user) searches can be configured in two shapes: a legacy pair of
//! single keys (`rolebase` / `rolesearch`) or a set of named definitions.
//! [`SearchBaseRegistry::from_definitions`] is the only place that knows about
//! both shapes; everything downstream sees one ordered list.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;

/// Name given to the single base synthesized from legacy settings
pub const LEGACY_BASE_NAME: &str = "convertedOldStyleSettings";

/// Default role search filter: groups listing the subject as a member
pub const DEFAULT_ROLE_SEARCH: &str = "(member={0})";

/// Default user search filter
pub const DEFAULT_USER_SEARCH: &str = "(sAMAccountName={0})";

/// LDAP filter with positional `{N}` placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterTemplate(String);

impl FilterTemplate {
    pub fn new(template: impl Into<String>) -> Self {
        Self(template.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Substitute `{i}` with the LDAP-escaped `params[i]`.
    ///
    /// Placeholders without a matching parameter are left untouched.
    pub fn render(&self, params: &[&str]) -> String {
        let template = self.0.as_str();
        let mut out = String::with_capacity(template.len() + 32);
        let mut rest = template;

        while let Some(open) = rest.find('{') {
            out.push_str(&rest[..open]);
            let after = &rest[open + 1..];
            let substituted = after.find('}').and_then(|close| {
                let index: usize = after[..close].parse().ok()?;
                let param = params.get(index)?;
                Some((close, ldap3::ldap_escape(*param)))
            });
            match substituted {
                Some((close, value)) => {
                    out.push_str(&value);
                    rest = &after[close + 1..];
                }
                None => {
                    out.push('{');
                    rest = after;
                }
            }
        }
        out.push_str(rest);
        out
    }
}

impl fmt::Display for FilterTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One search strategy: where to search and with which filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchBase {
    pub name: String,
    /// Search root; empty means the server's default naming context.
    pub base: String,
    pub filter: FilterTemplate,
}

/// Settings shape of a single named definition
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchBaseSpec {
    pub base: Option<String>,
    pub search: Option<String>,
}

/// Element of the list form of named definitions
#[derive(Debug, Clone, Deserialize)]
pub struct NamedSearchBase {
    pub name: String,
    pub base: Option<String>,
    pub search: Option<String>,
}

/// Named definitions, either as an ordered list or as a map keyed by name.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum SearchBaseDefinitions {
    Ordered(Vec<NamedSearchBase>),
    Named(BTreeMap<String, SearchBaseSpec>),
}

impl SearchBaseDefinitions {
    fn is_empty(&self) -> bool {
        match self {
            SearchBaseDefinitions::Ordered(list) => list.is_empty(),
            SearchBaseDefinitions::Named(map) => map.is_empty(),
        }
    }
}

/// Ordered, immutable list of search bases.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchBaseRegistry {
    bases: Vec<SearchBase>,
}

impl SearchBaseRegistry {
    /// Normalize either configuration shape into one ordered list.
    ///
    /// Named definitions win when present. Otherwise exactly one base is
    /// synthesized from the legacy keys, falling back to an empty base and
    /// `default_filter`.
    pub fn from_definitions(
        definitions: Option<&SearchBaseDefinitions>,
        legacy_base: Option<&str>,
        legacy_search: Option<&str>,
        default_filter: &str,
    ) -> Self {
        let build = |name: &str, base: Option<&str>, search: Option<&str>| SearchBase {
            name: name.to_string(),
            base: base.unwrap_or_default().to_string(),
            filter: FilterTemplate::new(search.unwrap_or(default_filter)),
        };

        let bases = match definitions {
            Some(SearchBaseDefinitions::Ordered(list)) if !list.is_empty() => list
                .iter()
                .map(|def| build(&def.name, def.base.as_deref(), def.search.as_deref()))
                .collect(),
            Some(SearchBaseDefinitions::Named(map)) if !map.is_empty() => map
                .iter()
                .map(|(name, def)| build(name, def.base.as_deref(), def.search.as_deref()))
                .collect(),
            _ => vec![build(LEGACY_BASE_NAME, legacy_base, legacy_search)],
        };

        if definitions.is_some_and(SearchBaseDefinitions::is_empty) {
            tracing::debug!("Empty search base definitions, using legacy settings");
        }

        Self { bases }
    }

    pub fn new(bases: Vec<SearchBase>) -> Self {
        Self { bases }
    }

    pub fn get(&self, index: usize) -> Option<&SearchBase> {
        self.bases.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &SearchBase)> {
        self.bases.iter().enumerate()
    }

    /// Indices of every configured base, in declared order.
    pub fn all_indices(&self) -> std::ops::Range<usize> {
        0..self.bases.len()
    }

    pub fn len(&self) -> usize {
        self.bases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bases.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_legacy_defaults() {
        let registry = SearchBaseRegistry::from_definitions(None, None, None, DEFAULT_ROLE_SEARCH);

        assert_eq!(
            registry.get(0),
            Some(&SearchBase {
                name: LEGACY_BASE_NAME.to_string(),
                base: String::new(),
                filter: FilterTemplate::new("(member={0})"),
            })
        );
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_legacy_keys_are_used() {
        let registry = SearchBaseRegistry::from_definitions(
            None,
            Some("ou=groups,dc=example"),
            Some("(uniqueMember={0})"),
            DEFAULT_ROLE_SEARCH,
        );
        let base = registry.get(0).unwrap();
        assert_eq!(base.base, "ou=groups,dc=example");
        assert_eq!(base.filter.as_str(), "(uniqueMember={0})");
    }

    #[test]
    fn test_ordered_definitions_keep_declared_order() {
        let definitions: SearchBaseDefinitions = serde_json::from_value(serde_json::json!([
            {"name": "zeta", "base": "ou=z,dc=example", "search": "(member={0})"},
            {"name": "alpha", "base": "ou=a,dc=example"}
        ]))
        .unwrap();

        let registry = SearchBaseRegistry::from_definitions(
            Some(&definitions),
            Some("ou=ignored"),
            None,
            DEFAULT_ROLE_SEARCH,
        );

        let names: Vec<_> = registry.iter().map(|(_, b)| b.name.as_str()).collect();
        assert_eq!(names, vec!["zeta", "alpha"]);
        assert_eq!(registry.get(1).unwrap().filter.as_str(), DEFAULT_ROLE_SEARCH);
    }

    #[test]
    fn test_named_definitions_are_ordered_by_name() {
        let definitions: SearchBaseDefinitions = serde_json::from_value(serde_json::json!({
            "second": {"base": "ou=b"},
            "first": {"search": "(uniqueMember={0})"}
        }))
        .unwrap();

        let registry = SearchBaseRegistry::from_definitions(
            Some(&definitions),
            None,
            None,
            DEFAULT_ROLE_SEARCH,
        );

        let first = registry.get(0).unwrap();
        assert_eq!(first.name, "first");
        assert_eq!(first.base, "");
        assert_eq!(registry.get(1).unwrap().base, "ou=b");
    }

    #[test]
    fn test_empty_definitions_fall_back_to_legacy() {
        let definitions = SearchBaseDefinitions::Named(BTreeMap::new());
        let registry = SearchBaseRegistry::from_definitions(
            Some(&definitions),
            Some("ou=groups"),
            None,
            DEFAULT_ROLE_SEARCH,
        );
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(0).unwrap().name, LEGACY_BASE_NAME);
    }

    #[test]
    fn test_render_substitutes_and_escapes() {
        let filter = FilterTemplate::new("(&(member={0})(uid={1})(x={2}))");
        assert_eq!(
            filter.render(&["cn=a(b),dc=x", "bob*", "2"]),
            "(&(member=cn=a\\28b\\29,dc=x)(uid=bob\\2a)(x=2))"
        );
    }

    #[test]
    fn test_render_leaves_unknown_placeholders() {
        let filter = FilterTemplate::new("(|(member={0})(owner={2})(note={x}))");
        assert_eq!(
            filter.render(&["cn=g,dc=x", "cn=g,dc=x"]),
            "(|(member=cn=g,dc=x)(owner={2})(note={x}))"
        );
    }
}
