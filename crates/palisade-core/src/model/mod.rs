// ── Domain model ──
//
// Canonical types shared by every component: application identity,
// per-app rules, environment snapshots, and the observable firewall
// state. Enforcement is always keyed by kernel UID; package names only
// matter for rule lookup and the tunnel backend's app set.

mod rule;
mod state;

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

pub use rule::FirewallRule;
pub use state::{
    BackendKind, DefaultPolicy, FirewallMode, FirewallState, NetworkType, PrivilegeLevel,
    ScreenState,
};

// ── Application identity ─────────────────────────────────────────

/// Kernel-level numeric owner id. Several packages may share one UID;
/// the UID is the atomic enforcement key.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Uid(pub u32);

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Identity of one installed application: a package name plus the
/// profile it is installed under.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AppId {
    pub package: String,
    /// User-profile id; 0 is the primary profile.
    #[serde(default)]
    pub profile: u32,
}

impl AppId {
    pub fn new(package: impl Into<String>, profile: u32) -> Self {
        Self {
            package: package.into(),
            profile,
        }
    }
}

impl fmt::Display for AppId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.package, self.profile)
    }
}

/// One installed application as reported by the platform's package
/// catalog, with the facts the resolver cares about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledApp {
    pub app: AppId,
    pub uid: Uid,
    /// Declared install-time permissions (network permissions decide
    /// whether the resolver considers the app at all).
    #[serde(default)]
    pub permissions: Vec<String>,
    /// Bind permissions required by the app's declared services. An app
    /// whose service requires the OS VPN bind permission is a VPN
    /// provider and is never enforced against.
    #[serde(default)]
    pub service_permissions: Vec<String>,
}

// ── Blocked set ──────────────────────────────────────────────────

/// The set of UIDs whose outbound traffic must be dropped. Ordered so
/// diffs and logs are deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockedSet(BTreeSet<Uid>);

impl BlockedSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, uid: Uid) -> bool {
        self.0.insert(uid)
    }

    pub fn contains(&self, uid: Uid) -> bool {
        self.0.contains(&uid)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = Uid> + '_ {
        self.0.iter().copied()
    }

    /// Incremental difference against the previously applied set:
    /// `add` is in `self` but not `prev`, `remove` the reverse.
    pub fn diff(&self, prev: &BlockedSet) -> SetDiff {
        SetDiff {
            add: self.0.difference(&prev.0).copied().collect(),
            remove: prev.0.difference(&self.0).copied().collect(),
        }
    }
}

impl FromIterator<Uid> for BlockedSet {
    fn from_iter<I: IntoIterator<Item = Uid>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a BlockedSet {
    type Item = Uid;
    type IntoIter = std::iter::Copied<std::collections::btree_set::Iter<'a, Uid>>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter().copied()
    }
}

/// Result of diffing two [`BlockedSet`]s.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetDiff {
    pub add: Vec<Uid>,
    pub remove: Vec<Uid>,
}

impl SetDiff {
    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.remove.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diff_splits_add_and_remove() {
        let prev: BlockedSet = [Uid(1), Uid(2)].into_iter().collect();
        let next: BlockedSet = [Uid(2), Uid(3)].into_iter().collect();

        let diff = next.diff(&prev);
        assert_eq!(diff.add, vec![Uid(3)]);
        assert_eq!(diff.remove, vec![Uid(1)]);
    }

    #[test]
    fn diff_of_identical_sets_is_empty() {
        let set: BlockedSet = [Uid(7)].into_iter().collect();
        assert!(set.diff(&set.clone()).is_empty());
    }
}
