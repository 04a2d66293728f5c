// ── Core error types ──
//
// User-facing errors from palisade-core. Consumers never see raw shell
// output or OS errno values directly; backends translate command
// failures into these variants. Local recovery (retry with backoff, try
// the next backend) happens at the call site — only non-recoverable
// errors surface through `FirewallState::Error`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{BackendKind, Uid};

/// Unified error type for the core crate.
#[derive(Debug, Clone, Error)]
pub enum CoreError {
    // ── Privilege errors ─────────────────────────────────────────────
    #[error("privilege required: {needed}")]
    PrivilegeRequired { needed: String },

    #[error("unsupported on this device: {reason}")]
    UnsupportedDevice { reason: String },

    // ── Backend errors ───────────────────────────────────────────────
    #[error("backend {kind} failed to start: {reason}")]
    BackendStartFailed { kind: BackendKind, reason: String },

    #[error("rule update failed for uid {uid}: {reason}")]
    ApplyFailed { uid: Uid, reason: String },

    #[error("tunnel interface could not be established")]
    InterfaceFailed,

    /// Another tunnel provider took over; treated as an explicit stop.
    #[error("tunnel permission revoked")]
    PrivilegeRevoked,

    // ── Execution errors ─────────────────────────────────────────────
    #[error("privileged command timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("internal invariant violated: {message}")]
    FatalInternal { message: String },
}

impl CoreError {
    /// The semantic kind carried inside `FirewallState::Error`.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::PrivilegeRequired { .. } => ErrorKind::PrivilegeRequired,
            Self::UnsupportedDevice { .. } => ErrorKind::UnsupportedDevice,
            Self::BackendStartFailed { .. } => ErrorKind::BackendStartFailed,
            Self::ApplyFailed { .. } => ErrorKind::ApplyFailed,
            Self::InterfaceFailed => ErrorKind::InterfaceFailed,
            Self::PrivilegeRevoked => ErrorKind::PrivilegeRevoked,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::FatalInternal { .. } => ErrorKind::FatalInternal,
        }
    }

    pub(crate) fn start_failed(kind: BackendKind, reason: impl Into<String>) -> Self {
        Self::BackendStartFailed {
            kind,
            reason: reason.into(),
        }
    }

    pub(crate) fn unsupported(reason: impl Into<String>) -> Self {
        Self::UnsupportedDevice {
            reason: reason.into(),
        }
    }
}

/// Plain discriminant of the error taxonomy, used where an error must
/// travel inside state snapshots without its payload.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display,
)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    PrivilegeRequired,
    UnsupportedDevice,
    BackendStartFailed,
    ApplyFailed,
    InterfaceFailed,
    PrivilegeRevoked,
    Timeout,
    FatalInternal,
}
