//! Queue keys of the form `<namespace>/<name>`.

use std::fmt;
use std::str::FromStr;

use kube::ResourceExt;

use crate::Metric;

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum KeyError {
    #[error("unexpected key format: {0:?}")]
    Malformed(String),
}

/// Identity of a resource. Displays as `namespace/name`, or just `name` when the
/// namespace is empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKey {
    pub namespace: String,
    pub name: String,
}

impl ResourceKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self { namespace: namespace.into(), name: name.into() }
    }

    pub fn for_metric(metric: &Metric) -> Self {
        Self::new(metric.namespace().unwrap_or_default(), metric.name_any())
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}/{}", self.namespace, self.name)
        }
    }
}

impl FromStr for ResourceKey {
    type Err = KeyError;

    fn from_str(key: &str) -> Result<Self, Self::Err> {
        let (namespace, name) = split_key(key)?;
        Ok(Self { namespace, name })
    }
}

/// Splits a key into `(namespace, name)`. A bare name yields an empty namespace.
/// Only the number of separators is checked: empty parts pass through and an
/// empty name simply resolves to nothing.
pub fn split_key(key: &str) -> Result<(String, String), KeyError> {
    let parts: Vec<&str> = key.split('/').collect();
    match parts.as_slice() {
        [name] => Ok((String::new(), (*name).to_string())),
        [namespace, name] => Ok(((*namespace).to_string(), (*name).to_string())),
        _ => Err(KeyError::Malformed(key.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_namespaced() {
        assert_eq!(split_key("ns/name").unwrap(), ("ns".to_string(), "name".to_string()));
    }

    #[test]
    fn split_bare_name() {
        assert_eq!(split_key("name").unwrap(), (String::new(), "name".to_string()));
    }

    #[test]
    fn split_rejects_extra_separators() {
        assert!(split_key("a/b/c").is_err());
        assert!(split_key("//").is_err());
        assert_eq!(split_key("a/b/c"), Err(KeyError::Malformed("a/b/c".to_string())));
    }

    #[test]
    fn split_keeps_empty_parts() {
        assert_eq!(split_key("ns/").unwrap(), ("ns".to_string(), String::new()));
        assert_eq!(split_key("/name").unwrap(), (String::new(), "name".to_string()));
        assert_eq!(split_key("").unwrap(), (String::new(), String::new()));
    }

    #[test]
    fn display_parses_back() {
        let k = ResourceKey::new("prod", "rps");
        let s = k.to_string();
        assert_eq!(s, "prod/rps");
        assert_eq!(s.parse::<ResourceKey>().unwrap(), k);
        assert_eq!(ResourceKey::new("", "solo").to_string(), "solo");
    }
}
