//! Intercept Rule
//!
//! Static allow-list predicate that decides which outgoing network calls are
//! worth capturing. Matching is exact and case-sensitive: a call matches only
//! when both its host and its path appear in the respective lists.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use url::Url;

/// Allow-list of `(host, path)` pairs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterceptRule {
    /// Hosts, including a non-default port when present (e.g. `api.example.com:8443`)
    pub hosts: BTreeSet<String>,
    /// Absolute paths, without query or fragment
    pub paths: BTreeSet<String>,
}

impl InterceptRule {
    pub fn new<H, P, S, T>(hosts: H, paths: P) -> Self
    where
        H: IntoIterator<Item = S>,
        P: IntoIterator<Item = T>,
        S: Into<String>,
        T: Into<String>,
    {
        Self {
            hosts: hosts.into_iter().map(Into::into).collect(),
            paths: paths.into_iter().map(Into::into).collect(),
        }
    }

    /// A rule with an empty list can never match anything.
    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty() || self.paths.is_empty()
    }

    /// Check an absolute URL against the allow-lists.
    ///
    /// Anything that fails to parse is a non-match, not an error.
    pub fn matches(&self, url: &str) -> bool {
        match Url::parse(url) {
            Ok(parsed) => self.matches_url(&parsed),
            Err(_) => false,
        }
    }

    pub fn matches_url(&self, url: &Url) -> bool {
        match host_of(url) {
            Some(host) => self.hosts.contains(&host) && self.paths.contains(url.path()),
            None => false,
        }
    }

    /// Resolve a request target against the document origin and evaluate it.
    ///
    /// Returns the resolved URL when it matches.
    pub fn evaluate(&self, origin: &Url, target: &str) -> Option<Url> {
        let resolved = resolve_target(origin, target)?;
        self.matches_url(&resolved).then_some(resolved)
    }
}

/// Resolve a possibly relative request target against the document origin.
pub fn resolve_target(origin: &Url, target: &str) -> Option<Url> {
    origin.join(target).ok()
}

/// Host as the page observes it: hostname plus port when the port is not the
/// scheme default.
pub fn host_of(url: &Url) -> Option<String> {
    let host = url.host_str()?;
    Some(match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    })
}
