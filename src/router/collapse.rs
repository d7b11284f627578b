//! Gateway collapse rules
//!
//! Proxied namespaces (e.g. `/vapi/...`) fan out into unbounded paths. A rule
//! keeps only the first `depth` segments after its prefix.

use serde::{Deserialize, Serialize};

/// Collapse `prefix/<a>/<b>/...` to `prefix/<a>` (for `depth = 1`)
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct CollapseRule {
    pub prefix: String,
    #[serde(default = "default_depth")]
    pub depth: usize,
}

fn default_depth() -> usize {
    1
}

/// Result of applying a [`CollapseRule`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Collapsed {
    /// Collapsed path used as the route label
    pub path: String,
    /// The rule prefix that matched
    pub gateway: String,
    /// The kept segments after the prefix, joined by '/'
    pub endpoint: String,
}

impl CollapseRule {
    pub fn new(prefix: impl Into<String>, depth: usize) -> Self {
        Self {
            prefix: prefix.into(),
            depth,
        }
    }

    /// Prefix without a trailing slash
    fn normalized_prefix(&self) -> &str {
        self.prefix.trim_end_matches('/')
    }

    /// Collapse `path` if it lives under this rule's prefix
    ///
    /// Returns `None` when the path is outside the namespace or has no
    /// segment after the prefix.
    pub fn apply(&self, path: &str) -> Option<Collapsed> {
        let prefix = self.normalized_prefix();
        let rest = path.strip_prefix(prefix)?.strip_prefix('/')?;

        let kept: Vec<&str> = rest
            .split('/')
            .filter(|s| !s.is_empty())
            .take(self.depth.max(1))
            .collect();
        if kept.is_empty() {
            return None;
        }

        let endpoint = kept.join("/");
        Some(Collapsed {
            path: format!("{}/{}", prefix, endpoint),
            gateway: prefix.to_string(),
            endpoint,
        })
    }
}

/// The default gateway namespaces
pub fn default_rules() -> Vec<CollapseRule> {
    vec![CollapseRule::new("/vapi", 1), CollapseRule::new("/stripe", 1)]
}
