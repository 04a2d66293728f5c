// ── Consumed data seams ──
//
// The rule store and the package catalog are owned by external
// collaborators; the core only reads them. `WatchRuleStore` and
// `StaticAppCatalog` are the reference implementations used by
// embedders that bridge a real store, and by tests.

use std::sync::Arc;

use arc_swap::ArcSwap;
use tokio::sync::watch;

use crate::model::{AppId, FirewallRule, InstalledApp};

/// Reactive, read-only view of the persisted per-app rules. Every
/// mutation in the owning store produces a new snapshot emission.
pub trait RuleStore: Send + Sync {
    /// Subscribe to rule snapshots. The receiver observes the current
    /// snapshot immediately, then every change.
    fn rules(&self) -> watch::Receiver<Arc<Vec<FirewallRule>>>;

    /// Point lookup by application identity.
    fn get_rule(&self, app: &AppId) -> Option<FirewallRule>;
}

/// `watch`-backed rule store fed by whatever bridges the external
/// persistence layer.
pub struct WatchRuleStore {
    tx: watch::Sender<Arc<Vec<FirewallRule>>>,
}

impl WatchRuleStore {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(Arc::new(Vec::new()));
        Self { tx }
    }

    /// Replace the snapshot; subscribers are notified even when the
    /// content is identical (the store owns change detection).
    pub fn publish(&self, rules: Vec<FirewallRule>) {
        self.tx.send_modify(|snap| *snap = Arc::new(rules));
    }
}

impl Default for WatchRuleStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RuleStore for WatchRuleStore {
    fn rules(&self) -> watch::Receiver<Arc<Vec<FirewallRule>>> {
        self.tx.subscribe()
    }

    fn get_rule(&self, app: &AppId) -> Option<FirewallRule> {
        self.tx.borrow().iter().find(|r| &r.app == app).cloned()
    }
}

/// The platform's installed-application catalog.
pub trait AppCatalog: Send + Sync {
    fn installed_apps(&self) -> Arc<Vec<InstalledApp>>;
}

/// Catalog over a swappable snapshot. Platform glue replaces the
/// snapshot on package install/remove broadcasts.
pub struct StaticAppCatalog {
    apps: ArcSwap<Vec<InstalledApp>>,
}

impl StaticAppCatalog {
    pub fn new(apps: Vec<InstalledApp>) -> Self {
        Self {
            apps: ArcSwap::from_pointee(apps),
        }
    }

    pub fn replace(&self, apps: Vec<InstalledApp>) {
        self.apps.store(Arc::new(apps));
    }
}

impl AppCatalog for StaticAppCatalog {
    fn installed_apps(&self) -> Arc<Vec<InstalledApp>> {
        self.apps.load_full()
    }
}
