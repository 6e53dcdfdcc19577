//! Role DN to origin search base index

use crate::domain::Dn;
use std::collections::{BTreeMap, BTreeSet};

/// Records which role search bases produced each role DN.
///
/// Built fresh for every resolution call and every nesting level. Bases are
/// identified by their position in the resolver's
/// [`SearchBaseRegistry`](crate::domain::SearchBaseRegistry).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoleOriginIndex {
    origins: BTreeMap<Dn, BTreeSet<usize>>,
}

impl RoleOriginIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Associate `dn` with one more base.
    pub fn record(&mut self, dn: Dn, base: usize) {
        self.origins.entry(dn).or_default().insert(base);
    }

    /// Associate `dn` with every base in `bases`.
    pub fn record_all<I>(&mut self, dn: Dn, bases: I)
    where
        I: IntoIterator<Item = usize>,
    {
        self.origins.entry(dn).or_default().extend(bases);
    }

    /// Union another index into this one.
    pub fn merge(&mut self, other: RoleOriginIndex) {
        for (dn, bases) in other.origins {
            self.record_all(dn, bases);
        }
    }

    pub fn origins(&self, dn: &Dn) -> Option<&BTreeSet<usize>> {
        self.origins.get(dn)
    }

    pub fn contains(&self, dn: &Dn) -> bool {
        self.origins.contains_key(dn)
    }

    pub fn dns(&self) -> impl Iterator<Item = &Dn> {
        self.origins.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Dn, &BTreeSet<usize>)> {
        self.origins.iter()
    }

    pub fn len(&self) -> usize {
        self.origins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.origins.is_empty()
    }
}

impl IntoIterator for RoleOriginIndex {
    type Item = (Dn, BTreeSet<usize>);
    type IntoIter = std::collections::btree_map::IntoIter<Dn, BTreeSet<usize>>;

    fn into_iter(self) -> Self::IntoIter {
        self.origins.into_iter()
    }
}
