// ── Privilege probe ──
//
// Determines the current capability set and publishes it as a
// distinct-until-changed stream. Determination order (first match
// wins): working `su` binary -> assistive daemon as UID 0 -> assistive
// daemon at a reduced UID -> none. Re-evaluated on daemon attach and
// detach and on explicit refresh.

mod shell;

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, info, warn};

pub use shell::{ExecOutput, PrivilegeExecutor, ShellExecutor};

use crate::config::CoreConfig;
use crate::model::PrivilegeLevel;

/// Result of an assistive-permission prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionOutcome {
    Granted,
    Denied,
}

/// The OS prompt that asks the user to grant assistive-daemon access.
/// Out-of-process UX; the probe only needs the outcome.
#[async_trait]
pub trait AssistivePermission: Send + Sync {
    async fn request(&self) -> PermissionOutcome;
}

/// Probes and publishes the current [`PrivilegeLevel`].
#[derive(Clone)]
pub struct PrivilegeProbe {
    inner: Arc<ProbeInner>,
}

struct ProbeInner {
    config: Arc<CoreConfig>,
    executor: Arc<dyn PrivilegeExecutor>,
    permission: Option<Arc<dyn AssistivePermission>>,
    level: watch::Sender<PrivilegeLevel>,
    /// Effective UID the assistive daemon reported at attach, if any.
    daemon_uid: Mutex<Option<u32>>,
    /// Sticky within a session: once the prompt returns DENIED we must
    /// not auto-retry. Cleared only by an explicit user refresh.
    denied: AtomicBool,
}

impl PrivilegeProbe {
    pub fn new(
        config: Arc<CoreConfig>,
        executor: Arc<dyn PrivilegeExecutor>,
        permission: Option<Arc<dyn AssistivePermission>>,
    ) -> Self {
        let (level, _) = watch::channel(PrivilegeLevel::None);
        Self {
            inner: Arc::new(ProbeInner {
                config,
                executor,
                permission,
                level,
                daemon_uid: Mutex::new(None),
                denied: AtomicBool::new(false),
            }),
        }
    }

    pub fn current(&self) -> PrivilegeLevel {
        *self.inner.level.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<PrivilegeLevel> {
        self.inner.level.subscribe()
    }

    /// Platform glue reports the assistive daemon's binder arrived,
    /// along with the effective UID the daemon runs as.
    pub async fn daemon_attached(&self, daemon_uid: u32) {
        *self.inner.daemon_uid.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = Some(daemon_uid);
        debug!(daemon_uid, "assistive daemon attached");
        self.reevaluate().await;
    }

    /// Platform glue reports the daemon binder died.
    pub async fn daemon_detached(&self) {
        *self.inner.daemon_uid.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = None;
        debug!("assistive daemon detached");
        self.reevaluate().await;
    }

    /// Explicit user-initiated refresh; clears the sticky denial flag.
    pub async fn refresh(&self) {
        self.inner.denied.store(false, Ordering::SeqCst);
        self.reevaluate().await;
    }

    /// Ask the OS to prompt for assistive-daemon access. A denial is
    /// sticky for the session: further calls short-circuit to `Denied`
    /// without prompting until [`refresh`](Self::refresh).
    pub async fn request_assistive_permission(&self) -> PermissionOutcome {
        if self.inner.denied.load(Ordering::SeqCst) {
            debug!("permission request suppressed (denied earlier this session)");
            return PermissionOutcome::Denied;
        }
        let Some(permission) = self.inner.permission.as_ref() else {
            return PermissionOutcome::Denied;
        };
        let outcome = permission.request().await;
        if outcome == PermissionOutcome::Denied {
            info!("assistive permission denied; suppressing retries this session");
            self.inner.denied.store(true, Ordering::SeqCst);
        } else {
            self.reevaluate().await;
        }
        outcome
    }

    /// Run a command under the highest available authority.
    pub async fn execute_privileged(&self, command: &str) -> ExecOutput {
        self.inner.executor.execute(command).await
    }

    /// Re-run the determination rules and publish the result.
    pub async fn reevaluate(&self) {
        let level = self.determine().await;
        let changed = self.inner.level.send_if_modified(|cur| {
            if *cur == level {
                false
            } else {
                *cur = level;
                true
            }
        });
        if changed {
            info!(%level, "privilege level changed");
        }
    }

    async fn determine(&self) -> PrivilegeLevel {
        if self.root_shell_works().await {
            return PrivilegeLevel::Root;
        }
        match *self.inner.daemon_uid.lock().unwrap_or_else(std::sync::PoisonError::into_inner) {
            Some(0) => PrivilegeLevel::AssistiveRootMode,
            Some(_) => PrivilegeLevel::AssistiveAdbMode,
            None => PrivilegeLevel::None,
        }
    }

    /// A `su` binary must exist AND an `id` probe through it must
    /// report uid=0 within the probe budget.
    async fn root_shell_works(&self) -> bool {
        let mut present = false;
        for path in &self.inner.config.su_paths {
            if tokio::fs::try_exists(path).await.unwrap_or(false) {
                present = true;
                break;
            }
        }
        if !present {
            return false;
        }

        let probe = self.inner.executor.execute("id");
        match tokio::time::timeout(self.inner.config.probe_timeout, probe).await {
            Ok(out) if out.success() && out.output.contains("uid=0") => true,
            Ok(out) => {
                debug!(code = out.code, "root probe rejected");
                false
            }
            Err(_) => {
                warn!("root probe timed out");
                false
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    struct NoRoot;

    #[async_trait]
    impl PrivilegeExecutor for NoRoot {
        async fn execute(&self, _command: &str) -> ExecOutput {
            ExecOutput::failure("not permitted")
        }
    }

    struct CountingPrompt {
        outcome: PermissionOutcome,
        calls: std::sync::atomic::AtomicU32,
    }

    #[async_trait]
    impl AssistivePermission for CountingPrompt {
        async fn request(&self) -> PermissionOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.outcome
        }
    }

    fn probe_with(prompt: Option<Arc<CountingPrompt>>) -> PrivilegeProbe {
        let config = Arc::new(CoreConfig {
            su_paths: vec!["/nonexistent/su".into()],
            ..CoreConfig::default()
        });
        PrivilegeProbe::new(
            config,
            Arc::new(NoRoot),
            prompt.map(|p| p as Arc<dyn AssistivePermission>),
        )
    }

    #[tokio::test]
    async fn daemon_uid_zero_yields_root_mode() {
        let probe = probe_with(None);
        assert_eq!(probe.current(), PrivilegeLevel::None);

        probe.daemon_attached(0).await;
        assert_eq!(probe.current(), PrivilegeLevel::AssistiveRootMode);

        probe.daemon_detached().await;
        assert_eq!(probe.current(), PrivilegeLevel::None);
    }

    #[tokio::test]
    async fn daemon_nonzero_uid_yields_adb_mode() {
        let probe = probe_with(None);
        probe.daemon_attached(2000).await;
        assert_eq!(probe.current(), PrivilegeLevel::AssistiveAdbMode);
    }

    #[tokio::test]
    async fn denial_is_sticky_until_refresh() {
        let prompt = Arc::new(CountingPrompt {
            outcome: PermissionOutcome::Denied,
            calls: std::sync::atomic::AtomicU32::new(0),
        });
        let probe = probe_with(Some(Arc::clone(&prompt)));

        assert_eq!(
            probe.request_assistive_permission().await,
            PermissionOutcome::Denied
        );
        // Second request must not reach the prompt.
        assert_eq!(
            probe.request_assistive_permission().await,
            PermissionOutcome::Denied
        );
        assert_eq!(prompt.calls.load(Ordering::SeqCst), 1);

        probe.refresh().await;
        let _ = probe.request_assistive_permission().await;
        assert_eq!(prompt.calls.load(Ordering::SeqCst), 2);
    }
}
