// ── Enforcement backends ──
//
// Four ways of making the blocked set real, with identical observable
// semantics and different privilege requirements. Backends are created
// one at a time by the orchestrator, so the common contract is a sum
// type rather than a trait object.

pub mod connmgr;
pub mod netpolicy;
pub mod packet_filter;
pub mod tunnel;

pub use connmgr::ConnMgrBackend;
pub use netpolicy::NetPolicyBackend;
pub use packet_filter::PacketFilterBackend;
pub use tunnel::{TunnelBackend, TunnelProvider, TunnelSession, TunnelSpec};

use crate::error::CoreError;
use crate::model::{BackendKind, BlockedSet, NetworkType, ScreenState};

/// One enforcement decision, handed to the active backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyContext {
    pub blocked: BlockedSet,
    pub transport: NetworkType,
    pub screen: ScreenState,
}

/// The active enforcement backend.
///
/// Lifecycle contract (enforced by the orchestrator's serialization):
/// `start` precedes every `apply`; no `apply` is dispatched after
/// `stop` begins; `stop` is idempotent and best-effort.
pub enum ActiveBackend {
    Tunnel(TunnelBackend),
    PacketFilter(PacketFilterBackend),
    ConnMgr(ConnMgrBackend),
    NetPolicy(NetPolicyBackend),
}

impl ActiveBackend {
    pub fn kind(&self) -> BackendKind {
        match self {
            Self::Tunnel(_) => BackendKind::Tunnel,
            Self::PacketFilter(_) => BackendKind::PacketFilter,
            Self::ConnMgr(_) => BackendKind::ConnMgr,
            Self::NetPolicy(_) => BackendKind::NetPolicy,
        }
    }

    /// Preflight: privileges, kernel features, OS version.
    pub async fn check_availability(&self) -> Result<(), CoreError> {
        match self {
            Self::Tunnel(b) => b.check_availability(),
            Self::PacketFilter(b) => b.check_availability().await,
            Self::ConnMgr(b) => b.check_availability().await,
            Self::NetPolicy(b) => b.check_availability().await,
        }
    }

    /// Install the baseline enforcement structure.
    pub async fn start(&self) -> Result<(), CoreError> {
        match self {
            Self::Tunnel(b) => b.start().await,
            Self::PacketFilter(b) => b.start().await,
            Self::ConnMgr(b) => b.start().await,
            Self::NetPolicy(b) => b.start().await,
        }
    }

    /// Remove everything `start` installed.
    pub async fn stop(&self) -> Result<(), CoreError> {
        match self {
            Self::Tunnel(b) => b.stop().await,
            Self::PacketFilter(b) => b.stop().await,
            Self::ConnMgr(b) => b.stop().await,
            Self::NetPolicy(b) => b.stop().await,
        }
    }

    /// Make live enforcement match the context.
    pub async fn apply(&self, ctx: &ApplyContext) -> Result<(), CoreError> {
        match self {
            Self::Tunnel(b) => b.apply(ctx).await,
            Self::PacketFilter(b) => b.apply(ctx).await,
            Self::ConnMgr(b) => b.apply(ctx).await,
            Self::NetPolicy(b) => b.apply(ctx).await,
        }
    }

    /// Truth-of-the-world check against the OS, not a cached flag where
    /// the backend can do better.
    pub async fn is_active(&self) -> bool {
        match self {
            Self::Tunnel(b) => b.is_active().await,
            Self::PacketFilter(b) => b.is_active().await,
            Self::ConnMgr(b) => b.is_active().await,
            Self::NetPolicy(b) => b.is_active().await,
        }
    }

    /// Whether per-transport semantics are actually honored.
    pub fn supports_granular_control(&self) -> bool {
        match self {
            Self::Tunnel(_) | Self::PacketFilter(_) => true,
            Self::ConnMgr(b) => b.supports_granular_control(),
            Self::NetPolicy(b) => b.supports_granular_control(),
        }
    }
}
