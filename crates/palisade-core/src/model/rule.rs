// ── Per-application firewall rule ──

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{AppId, Uid};

/// A persisted per-application rule, owned by the external rule store.
///
/// A rule with `enabled = false` is semantically identical to "no rule
/// for this app": both fall through to the default policy. The core
/// never mutates rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirewallRule {
    pub app: AppId,
    pub uid: Uid,
    pub enabled: bool,
    pub wifi_blocked: bool,
    pub mobile_blocked: bool,
    pub roaming_blocked: bool,
    /// Screen-off override: when set and the screen is off, block
    /// regardless of transport.
    pub block_when_screen_off: bool,
    pub last_modified: DateTime<Utc>,
}

impl FirewallRule {
    /// An all-allow rule — the shape seeded for VPN providers and
    /// system-critical packages so they are never enforced against.
    pub fn allow_all(app: AppId, uid: Uid) -> Self {
        Self {
            app,
            uid,
            enabled: true,
            wifi_blocked: false,
            mobile_blocked: false,
            roaming_blocked: false,
            block_when_screen_off: false,
            last_modified: Utc::now(),
        }
    }
}
