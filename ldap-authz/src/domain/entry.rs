//! Directory entry model

use super::dn::Dn;
use serde::{Deserialize, Serialize};

/// One entry fetched from the directory: a DN plus its attributes.
///
/// Attribute names are matched case-insensitively, values keep the order the
/// server returned them in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryEntry {
    pub dn: Dn,
    #[serde(default)]
    attributes: Vec<(String, Vec<String>)>,
}

impl DirectoryEntry {
    pub fn new(dn: Dn) -> Self {
        Self {
            dn,
            attributes: Vec::new(),
        }
    }

    /// Builder-style helper, mostly used by tests and directory adapters.
    pub fn with_attribute<I, S>(mut self, name: &str, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.add_values(name, values);
        self
    }

    /// Append values to an attribute, creating it when missing.
    pub fn add_values<I, S>(&mut self, name: &str, values: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let values = values.into_iter().map(Into::into);
        match self
            .attributes
            .iter_mut()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
        {
            Some((_, existing_values)) => existing_values.extend(values),
            None => self.attributes.push((name.to_string(), values.collect())),
        }
    }

    /// All values of an attribute, `None` when the entry does not carry it.
    pub fn attribute(&self, name: &str) -> Option<&[String]> {
        self.attributes
            .iter()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
            .map(|(_, values)| values.as_slice())
    }

    /// First value of an attribute.
    ///
    /// Multi-valued attributes are logged and resolved to their first value.
    pub fn single_value(&self, name: &str) -> Option<&str> {
        let values = self.attribute(name)?;
        if values.len() > 1 {
            tracing::debug!(
                attribute = name,
                dn = %self.dn,
                count = values.len(),
                "Multiple values found, using the first one"
            );
        }
        values.first().map(String::as_str)
    }

    pub fn attribute_names(&self) -> impl Iterator<Item = &str> {
        self.attributes.iter().map(|(name, _)| name.as_str())
    }
}
