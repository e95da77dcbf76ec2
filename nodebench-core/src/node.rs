use std::{cmp::Ordering, fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::ConfigError;

/// Identity of a node under test.
///
/// Equality and ordering follow the textual URL so that tie-breaks between
/// equally scored nodes are alphabetical and stable across runs.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeUrl(Url);

impl NodeUrl {
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        Url::parse(raw.trim())
            .map(Self)
            .map_err(|err| ConfigError::InvalidNodeUrl {
                url: raw.to_owned(),
                reason: err.to_string(),
            })
    }

    #[must_use]
    pub const fn url(&self) -> &Url {
        &self.0
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// Joins `path` onto the node URL, keeping any path the node URL already
    /// carries.
    pub fn join(&self, path: &str) -> Result<Url, url::ParseError> {
        if path.is_empty() {
            return Ok(self.0.clone());
        }
        let mut base = self.0.clone();
        if !base.path().ends_with('/') {
            let with_slash = format!("{}/", base.path());
            base.set_path(&with_slash);
        }
        base.join(path.trim_start_matches('/'))
    }
}

impl From<Url> for NodeUrl {
    fn from(value: Url) -> Self {
        Self(value)
    }
}

impl FromStr for NodeUrl {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl PartialEq for NodeUrl {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl Eq for NodeUrl {}

impl std::hash::Hash for NodeUrl {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.as_str().hash(state);
    }
}

impl PartialOrd for NodeUrl {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for NodeUrl {
    fn cmp(&self, other: &Self) -> Ordering {
        self.as_str().cmp(other.as_str())
    }
}

impl fmt::Display for NodeUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orders_alphabetically() {
        let mut nodes = vec![
            NodeUrl::parse("https://b.example").unwrap(),
            NodeUrl::parse("https://a.example").unwrap(),
        ];
        nodes.sort();
        assert_eq!(nodes[0].as_str(), "https://a.example/");
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(
            NodeUrl::parse("not a url"),
            Err(ConfigError::InvalidNodeUrl { .. })
        ));
    }

    #[test]
    fn join_keeps_base_path() {
        let node = NodeUrl::parse("https://engine.example/rpc").unwrap();
        assert_eq!(
            node.join("contracts").unwrap().as_str(),
            "https://engine.example/rpc/contracts"
        );
        assert_eq!(node.join("").unwrap().as_str(), "https://engine.example/rpc");
    }
}
