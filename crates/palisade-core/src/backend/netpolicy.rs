// ── Network-policy backend ──
//
// Legacy per-UID policy API for older OS builds: each blocked UID is
// placed on the restrict-background deny list. Coarser than the packet
// filter (no transport detail, background-only on some builds), but it
// works with any elevated shell.

use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::ApplyContext;
use crate::error::CoreError;
use crate::model::Uid;
use crate::privilege::PrivilegeExecutor;

pub struct NetPolicyBackend {
    executor: Arc<dyn PrivilegeExecutor>,
    state: Mutex<NpState>,
}

#[derive(Default)]
struct NpState {
    started: bool,
    denied: BTreeSet<Uid>,
}

impl NetPolicyBackend {
    pub fn new(executor: Arc<dyn PrivilegeExecutor>) -> Self {
        Self {
            executor,
            state: Mutex::new(NpState::default()),
        }
    }

    pub async fn check_availability(&self) -> Result<(), CoreError> {
        let probe = self.executor.execute("cmd netpolicy").await;
        if !probe.success() {
            return Err(CoreError::PrivilegeRequired {
                needed: "shell access to the network-policy service".into(),
            });
        }
        Ok(())
    }

    pub async fn start(&self) -> Result<(), CoreError> {
        let mut state = self.state.lock().await;
        state.started = true;
        state.denied.clear();
        Ok(())
    }

    pub async fn stop(&self) -> Result<(), CoreError> {
        let mut state = self.state.lock().await;
        let lifted: Vec<Uid> = state.denied.iter().copied().collect();
        for uid in lifted {
            let out = self
                .executor
                .execute(&format!(
                    "cmd netpolicy remove restrict-background-blacklist {uid}"
                ))
                .await;
            if !out.success() {
                warn!(%uid, "failed to remove deny-list entry on stop");
            }
            state.denied.remove(&uid);
        }
        state.started = false;
        Ok(())
    }

    pub async fn apply(&self, ctx: &ApplyContext) -> Result<(), CoreError> {
        let mut state = self.state.lock().await;
        if !state.started {
            return Err(CoreError::FatalInternal {
                message: "apply before start on netpolicy backend".into(),
            });
        }

        let target: BTreeSet<Uid> = ctx.blocked.iter().collect();
        let add: Vec<Uid> = target.difference(&state.denied).copied().collect();
        let remove: Vec<Uid> = state.denied.difference(&target).copied().collect();
        if !add.is_empty() || !remove.is_empty() {
            debug!(add = add.len(), remove = remove.len(), "netpolicy diff");
        }

        for uid in add {
            let out = self
                .executor
                .execute(&format!(
                    "cmd netpolicy add restrict-background-blacklist {uid}"
                ))
                .await;
            if out.success() {
                state.denied.insert(uid);
            } else {
                warn!(%uid, output = %out.output.trim(), "deny-list add failed; will retry");
            }
        }

        for uid in remove {
            let out = self
                .executor
                .execute(&format!(
                    "cmd netpolicy remove restrict-background-blacklist {uid}"
                ))
                .await;
            if !out.success() {
                warn!(%uid, "deny-list remove failed");
            }
            state.denied.remove(&uid);
        }

        Ok(())
    }

    /// Cross-checks the OS deny list against what we installed.
    pub async fn is_active(&self) -> bool {
        let state = self.state.lock().await;
        if !state.started {
            return false;
        }
        if state.denied.is_empty() {
            return true;
        }
        let out = self
            .executor
            .execute("cmd netpolicy list restrict-background-blacklist")
            .await;
        out.success()
            && state
                .denied
                .iter()
                .all(|uid| out.output.contains(&uid.to_string()))
    }

    pub fn supports_granular_control(&self) -> bool {
        false
    }
}
