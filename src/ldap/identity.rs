//! Directory identity resolved by a successful authentication.

use std::collections::HashMap;

/// A single directory entry: its distinguished name and attribute values.
///
/// This is the only shape directory results take once they leave the
/// connection layer; no `ldap3` types cross this boundary.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Identity {
    /// Distinguished name of the entry.
    pub dn: String,
    /// Attribute name -> values, as returned by the directory.
    pub attributes: HashMap<String, Vec<String>>,
}

impl Identity {
    #[cfg(test)]
    pub fn new(dn: impl Into<String>) -> Self {
        Self {
            dn: dn.into(),
            attributes: HashMap::new(),
        }
    }

    /// Builder-style attribute insertion.
    #[cfg(test)]
    pub fn with_attribute<I, S>(mut self, name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.attributes
            .insert(name.into(), values.into_iter().map(Into::into).collect());
        self
    }

    /// All values of an attribute. Attribute names compare case-insensitively,
    /// as they do in the directory.
    pub fn values(&self, name: &str) -> &[String] {
        self.attributes
            .get(name)
            .or_else(|| {
                self.attributes
                    .iter()
                    .find(|(k, _)| k.eq_ignore_ascii_case(name))
                    .map(|(_, v)| v)
            })
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// First value of an attribute, if any.
    pub fn first_value(&self, name: &str) -> Option<&str> {
        self.values(name).first().map(String::as_str)
    }
}
