//! Per-application firewall core for a mobile OS.
//!
//! Decides, per installed application, whether outbound traffic is
//! permitted — as a function of persisted per-app rules, the active
//! transport (wifi / mobile / roaming / none), and the screen state —
//! and enforces the decision through whichever backend the current
//! privilege level allows:
//!
//! - **[`Firewall`]** — the public control surface: `start(mode)`,
//!   `stop()`, state snapshot and stream, and the start plan UIs use to
//!   decide whether to prompt for tunnel consent.
//!
//! - **[`resolver`]** — the pure computation from rules + environment
//!   to the blocked-UID set. UIDs are the enforcement key; packages
//!   sharing a UID are blocked conservatively.
//!
//! - **[`backend`]** — four enforcement strategies with one contract:
//!   a user-space discard tunnel, kernel packet-filter owner rules, the
//!   connectivity-manager restriction API, and the legacy
//!   network-policy API.
//!
//! - **Orchestrator** (internal) — selects a backend from the privilege
//!   stream, drives its lifecycle, hot-fails-over (new-before-old) when
//!   privileges change, and health-checks privileged backends on an
//!   adaptive cadence.
//!
//! - **[`boot::BootProtection`]** — the early-boot script that blocks
//!   app traffic between device startup and firewall takeover.
//!
//! The core is a library: everything that touches the OS goes through
//! seams ([`privilege::PrivilegeExecutor`], [`backend::TunnelProvider`],
//! [`store::RuleStore`], [`store::AppCatalog`], monitor feeds) that
//! platform glue implements.

pub mod alert;
pub mod allowlist;
pub mod backend;
pub mod boot;
pub mod config;
pub mod error;
pub mod firewall;
pub mod model;
pub mod monitor;
pub mod prefs;
pub mod privilege;
pub mod resolver;
pub mod store;

mod orchestrator;

// ── Primary re-exports ──────────────────────────────────────────────
pub use alert::{Alert, AlertSink, LogAlertSink};
pub use config::CoreConfig;
pub use error::{CoreError, ErrorKind};
pub use firewall::{Firewall, FirewallDeps, StartPlan, StateStream};
pub use monitor::{ScreenMonitor, TransportMonitor};
pub use prefs::{StatusFlags, StatusPrefs};
pub use privilege::{
    AssistivePermission, ExecOutput, PermissionOutcome, PrivilegeExecutor, PrivilegeProbe,
    ShellExecutor,
};
pub use store::{AppCatalog, RuleStore, StaticAppCatalog, WatchRuleStore};

// Re-export model types at the crate root for ergonomics.
pub use model::{
    AppId, BackendKind, BlockedSet, DefaultPolicy, FirewallMode, FirewallRule, FirewallState,
    InstalledApp, NetworkType, PrivilegeLevel, ScreenState, SetDiff, Uid,
};
