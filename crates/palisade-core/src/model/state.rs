// ── Environment, mode, and state enums ──

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::ErrorKind;

/// The active default-route link type.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[strum(serialize_all = "kebab-case")]
pub enum NetworkType {
    /// No transport is up (airplane mode, or the boot window before
    /// networking comes up).
    None,
    Wifi,
    Mobile,
    MobileRoaming,
}

/// Device screen state.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[strum(serialize_all = "kebab-case")]
pub enum ScreenState {
    On,
    Off,
}

/// What happens to apps without an enabled rule.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[strum(serialize_all = "kebab-case")]
pub enum DefaultPolicy {
    AllowAll,
    BlockAll,
}

/// User-selected enforcement preference. `Auto` lets the orchestrator
/// pick the most capable backend the current privilege level allows.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[strum(serialize_all = "kebab-case")]
pub enum FirewallMode {
    Auto,
    Tunnel,
    PacketFilter,
    ConnMgr,
    NetPolicy,
}

/// The enforcement backend that is actually active.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[strum(serialize_all = "kebab-case")]
pub enum BackendKind {
    Tunnel,
    PacketFilter,
    ConnMgr,
    NetPolicy,
}

impl BackendKind {
    /// Preference rank in `Auto` mode; lower is better.
    pub(crate) fn rank(self) -> u8 {
        match self {
            Self::ConnMgr => 0,
            Self::PacketFilter => 1,
            Self::NetPolicy => 2,
            Self::Tunnel => 3,
        }
    }
}

/// Current capability set, as determined by the privilege probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[strum(serialize_all = "kebab-case")]
pub enum PrivilegeLevel {
    /// No elevated privileges of any kind.
    None,
    /// Assistive daemon reachable, running at a reduced (shell) UID.
    AssistiveAdbMode,
    /// Assistive daemon reachable and running as UID 0.
    AssistiveRootMode,
    /// A working `su`-style binary.
    Root,
}

impl PrivilegeLevel {
    pub fn is_elevated(self) -> bool {
        self != Self::None
    }

    /// Whether shell commands run with full root authority.
    pub fn has_root_shell(self) -> bool {
        matches!(self, Self::AssistiveRootMode | Self::Root)
    }
}

/// Observable firewall state, owned exclusively by the orchestrator and
/// published as a distinct-until-changed stream. The initial state at
/// process start is `Stopped`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "kebab-case")]
pub enum FirewallState {
    Stopped,
    Starting { backend: BackendKind },
    Running { backend: BackendKind },
    Error { kind: ErrorKind, message: String },
}

impl FirewallState {
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running { .. })
    }

    /// The backend currently starting or running, if any.
    pub fn backend(&self) -> Option<BackendKind> {
        match self {
            Self::Starting { backend } | Self::Running { backend } => Some(*backend),
            Self::Stopped | Self::Error { .. } => None,
        }
    }
}
