//! Recognising the container this updater runs in.
//!
//! The updater must never stop or remove its own container mid-pass. How "own
//! container" is decided is injected through [`SelfMatcher`].

use std::fmt::Debug;
use updater_common::ManagedContainer;

/// Minimum length at which a short container ID identifies a container.
const MIN_ID_PREFIX: usize = 12;

pub trait SelfMatcher: Send + Sync + Debug {
    fn is_self(&self, container: &ManagedContainer) -> bool;
}

/// Matches when the container ID starts with the host identity token.
///
/// Inside a container the hostname defaults to the short container ID, which
/// is what makes this work. A custom `--hostname` silently disables it.
#[derive(Debug, Clone)]
pub struct HostnamePrefix(pub String);

impl SelfMatcher for HostnamePrefix {
    fn is_self(&self, container: &ManagedContainer) -> bool {
        !self.0.is_empty() && container.id.starts_with(&self.0)
    }
}

/// Matches one known container ID, in short or full form.
#[derive(Debug, Clone)]
pub struct ExactId(pub String);

impl SelfMatcher for ExactId {
    fn is_self(&self, container: &ManagedContainer) -> bool {
        let own = self.0.as_str();
        let other = container.id.as_str();
        if own == other {
            return true;
        }
        let (short, long) = if own.len() < other.len() {
            (own, other)
        } else {
            (other, own)
        };
        short.len() >= MIN_ID_PREFIX && long.starts_with(short)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NeverSelf;

impl SelfMatcher for NeverSelf {
    fn is_self(&self, _container: &ManagedContainer) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    const FULL_ID: &str = "4f8e2c1d9a7b3e6f0c5d8a2b1e4f7c9d3a6b8e0f2c4d6a8b0e1f3c5d7a9b2e4f";

    fn container(id: &str) -> ManagedContainer {
        ManagedContainer {
            id: id.to_string(),
            name: Some("updater".to_string()),
            image: "updater:latest".to_string(),
            labels: BTreeMap::new(),
            managed: true,
        }
    }

    #[test]
    fn test_hostname_prefix() {
        let matcher = HostnamePrefix("4f8e2c1d9a7b".to_string());
        assert!(matcher.is_self(&container(FULL_ID)));
        assert!(!matcher.is_self(&container("0000")));
        assert!(!HostnamePrefix(String::new()).is_self(&container(FULL_ID)));
    }

    #[test]
    fn test_exact_id_accepts_short_and_full_forms() {
        assert!(ExactId(FULL_ID.to_string()).is_self(&container(FULL_ID)));
        assert!(ExactId("4f8e2c1d9a7b".to_string()).is_self(&container(FULL_ID)));
        assert!(ExactId(FULL_ID.to_string()).is_self(&container("4f8e2c1d9a7b")));
        // Too short to be unambiguous
        assert!(!ExactId("4f8e".to_string()).is_self(&container(FULL_ID)));
        assert!(!ExactId("4f8e2c1d9a7c".to_string()).is_self(&container(FULL_ID)));
    }

    #[test]
    fn test_never_self() {
        assert!(!NeverSelf.is_self(&container(FULL_ID)));
    }
}
