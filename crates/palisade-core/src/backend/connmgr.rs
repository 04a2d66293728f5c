// ── Connectivity-manager backend ──
//
// High-level per-UID network restriction on modern OS builds, reached
// through the assistive daemon's shell into the connectivity service.
// This is the adapter boundary for what is a private API underneath:
// only this module crafts the command strings, and the rest of the
// core sees the common backend contract.
//
// The underlying call is a boolean per UID, so per-transport detail is
// not honored here; the resolver already folded transport and screen
// into the blocked set.

use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::ApplyContext;
use crate::error::CoreError;
use crate::model::Uid;
use crate::privilege::PrivilegeExecutor;

pub struct ConnMgrBackend {
    executor: Arc<dyn PrivilegeExecutor>,
    supported: bool,
    state: Mutex<CmState>,
}

#[derive(Default)]
struct CmState {
    started: bool,
    restricted: BTreeSet<Uid>,
}

impl ConnMgrBackend {
    pub fn new(executor: Arc<dyn PrivilegeExecutor>, supported: bool) -> Self {
        Self {
            executor,
            supported,
            state: Mutex::new(CmState::default()),
        }
    }

    pub async fn check_availability(&self) -> Result<(), CoreError> {
        if !self.supported {
            return Err(CoreError::unsupported(
                "connectivity restriction API not available on this OS",
            ));
        }
        let probe = self.executor.execute("cmd connectivity").await;
        if !probe.success() {
            return Err(CoreError::PrivilegeRequired {
                needed: "shell access to the connectivity service".into(),
            });
        }
        Ok(())
    }

    pub async fn start(&self) -> Result<(), CoreError> {
        // No baseline structure to install; the service call is the
        // enforcement. Availability was the real preflight.
        let mut state = self.state.lock().await;
        state.started = true;
        state.restricted.clear();
        Ok(())
    }

    pub async fn stop(&self) -> Result<(), CoreError> {
        let mut state = self.state.lock().await;
        let lifted: Vec<Uid> = state.restricted.iter().copied().collect();
        for uid in lifted {
            let out = self
                .executor
                .execute(&format!("cmd connectivity set-uid-networking-enabled true {uid}"))
                .await;
            if !out.success() {
                warn!(%uid, "failed to lift restriction on stop");
            }
            state.restricted.remove(&uid);
        }
        state.started = false;
        Ok(())
    }

    pub async fn apply(&self, ctx: &ApplyContext) -> Result<(), CoreError> {
        let mut state = self.state.lock().await;
        if !state.started {
            return Err(CoreError::FatalInternal {
                message: "apply before start on connmgr backend".into(),
            });
        }

        let target: BTreeSet<Uid> = ctx.blocked.iter().collect();
        let add: Vec<Uid> = target.difference(&state.restricted).copied().collect();
        let remove: Vec<Uid> = state.restricted.difference(&target).copied().collect();
        if !add.is_empty() || !remove.is_empty() {
            debug!(add = add.len(), remove = remove.len(), "connmgr diff");
        }

        for uid in add {
            let out = self
                .executor
                .execute(&format!(
                    "cmd connectivity set-uid-networking-enabled false {uid}"
                ))
                .await;
            if out.success() {
                state.restricted.insert(uid);
            } else {
                warn!(%uid, output = %out.output.trim(), "restriction failed; will retry");
            }
        }

        for uid in remove {
            let out = self
                .executor
                .execute(&format!(
                    "cmd connectivity set-uid-networking-enabled true {uid}"
                ))
                .await;
            if !out.success() {
                warn!(%uid, output = %out.output.trim(), "unrestriction failed");
            }
            state.restricted.remove(&uid);
        }

        Ok(())
    }

    pub async fn is_active(&self) -> bool {
        if !self.state.lock().await.started {
            return false;
        }
        self.executor.execute("cmd connectivity").await.success()
    }

    pub fn supports_granular_control(&self) -> bool {
        false
    }
}
