// ── Backend orchestrator ──
//
// The single place firewall state transitions happen. Runs as one
// long-lived task: control commands arrive over an mpsc channel,
// environment and rule changes over watch channels (coalesced
// latest-wins by the channel semantics), and an adaptive health check
// ticks while a privileged backend is active. Everything executes
// serially, so backend lifecycle ordering (start -> apply* -> stop,
// new-before-old across failovers) is structural.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::alert::{Alert, AlertSink};
use crate::backend::{
    ActiveBackend, ApplyContext, ConnMgrBackend, NetPolicyBackend, PacketFilterBackend,
    TunnelBackend, TunnelProvider,
};
use crate::boot::BootProtection;
use crate::config::CoreConfig;
use crate::error::CoreError;
use crate::model::{
    BackendKind, BlockedSet, DefaultPolicy, FirewallMode, FirewallRule, FirewallState,
    NetworkType, PrivilegeLevel, ScreenState,
};
use crate::prefs::StatusPrefs;
use crate::privilege::PrivilegeExecutor;
use crate::resolver::{self, ResolverInput};
use crate::store::AppCatalog;

const HEALTH_FAILURE_LIMIT: u32 = 2;

/// Control-plane commands into the orchestrator task.
pub(crate) enum Command {
    Start {
        mode: FirewallMode,
        reply: oneshot::Sender<Result<(), CoreError>>,
    },
    Stop {
        reply: oneshot::Sender<Result<(), CoreError>>,
    },
}

/// Input streams the orchestrator consumes.
pub(crate) struct InputChannels {
    pub transport: watch::Receiver<NetworkType>,
    pub screen: watch::Receiver<ScreenState>,
    pub policy: watch::Receiver<DefaultPolicy>,
    pub rules: watch::Receiver<Arc<Vec<FirewallRule>>>,
    pub privilege: watch::Receiver<PrivilegeLevel>,
}

/// Which backend a mode resolves to under the given privileges.
/// For `Auto`, the first available wins: the connectivity manager is
/// preferred (least invasive), then the packet filter, then the legacy
/// policy API, with the tunnel as the unprivileged fallback.
pub(crate) fn select_backend(
    mode: FirewallMode,
    level: PrivilegeLevel,
    connmgr_supported: bool,
) -> BackendKind {
    match mode {
        FirewallMode::Auto => {
            if connmgr_supported && level.is_elevated() {
                BackendKind::ConnMgr
            } else if level.has_root_shell() {
                BackendKind::PacketFilter
            } else if level.is_elevated() {
                BackendKind::NetPolicy
            } else {
                BackendKind::Tunnel
            }
        }
        FirewallMode::Tunnel => BackendKind::Tunnel,
        FirewallMode::PacketFilter => BackendKind::PacketFilter,
        FirewallMode::ConnMgr => BackendKind::ConnMgr,
        FirewallMode::NetPolicy => BackendKind::NetPolicy,
    }
}

fn kind_viable(kind: BackendKind, level: PrivilegeLevel, connmgr_supported: bool) -> bool {
    match kind {
        BackendKind::ConnMgr => connmgr_supported && level.is_elevated(),
        BackendKind::PacketFilter => level.has_root_shell(),
        BackendKind::NetPolicy => level.is_elevated(),
        BackendKind::Tunnel => true,
    }
}

/// Viable kinds strictly less preferred than `after`, in order.
fn fallback_candidates(
    after: BackendKind,
    level: PrivilegeLevel,
    connmgr_supported: bool,
) -> Vec<BackendKind> {
    [
        BackendKind::ConnMgr,
        BackendKind::PacketFilter,
        BackendKind::NetPolicy,
        BackendKind::Tunnel,
    ]
    .into_iter()
    .filter(|k| k.rank() > after.rank() && kind_viable(*k, level, connmgr_supported))
    .collect()
}

pub(crate) struct Orchestrator {
    config: Arc<CoreConfig>,
    executor: Arc<dyn PrivilegeExecutor>,
    tunnel_provider: Arc<dyn TunnelProvider>,
    catalog: Arc<dyn AppCatalog>,
    prefs: Arc<StatusPrefs>,
    alerts: Arc<dyn AlertSink>,
    boot: Arc<BootProtection>,

    state_tx: watch::Sender<FirewallState>,
    mode: FirewallMode,
    active: Option<ActiveBackend>,
    applied: BlockedSet,

    // Cached latest inputs (updated by the run loop).
    transport: NetworkType,
    screen: ScreenState,
    policy: DefaultPolicy,
    privilege: PrivilegeLevel,
    rules: Arc<Vec<FirewallRule>>,

    // Adaptive health check.
    health_passes: u32,
    health_failures: u32,
    next_health: Option<Instant>,
}

#[allow(clippy::too_many_arguments)]
impl Orchestrator {
    pub(crate) fn new(
        config: Arc<CoreConfig>,
        executor: Arc<dyn PrivilegeExecutor>,
        tunnel_provider: Arc<dyn TunnelProvider>,
        catalog: Arc<dyn AppCatalog>,
        prefs: Arc<StatusPrefs>,
        alerts: Arc<dyn AlertSink>,
        boot: Arc<BootProtection>,
        state_tx: watch::Sender<FirewallState>,
    ) -> Self {
        Self {
            config,
            executor,
            tunnel_provider,
            catalog,
            prefs,
            alerts,
            boot,
            state_tx,
            mode: FirewallMode::Auto,
            active: None,
            applied: BlockedSet::new(),
            transport: NetworkType::None,
            screen: ScreenState::On,
            policy: DefaultPolicy::AllowAll,
            privilege: PrivilegeLevel::None,
            rules: Arc::new(Vec::new()),
            health_passes: 0,
            health_failures: 0,
            next_health: None,
        }
    }

    pub(crate) async fn run(
        mut self,
        mut cmd_rx: mpsc::Receiver<Command>,
        mut inputs: InputChannels,
        cancel: CancellationToken,
    ) {
        // Seed the caches with whatever the producers already hold.
        self.transport = *inputs.transport.borrow_and_update();
        self.screen = *inputs.screen.borrow_and_update();
        self.policy = *inputs.policy.borrow_and_update();
        self.privilege = *inputs.privilege.borrow_and_update();
        self.rules = Arc::clone(&inputs.rules.borrow_and_update());

        // A producer dropping its sender parks that branch instead of
        // spinning on a closed channel; the last value stays cached.
        let mut transport_open = true;
        let mut screen_open = true;
        let mut policy_open = true;
        let mut rules_open = true;
        let mut privilege_open = true;

        loop {
            let next_health = self.next_health;
            let health_tick = async move {
                match next_health {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    self.do_stop().await;
                    break;
                }
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(Command::Start { mode, reply }) => {
                            let result = self.handle_start(mode).await;
                            let _ = reply.send(result);
                        }
                        Some(Command::Stop { reply }) => {
                            self.do_stop().await;
                            let _ = reply.send(Ok(()));
                        }
                        None => {
                            self.do_stop().await;
                            break;
                        }
                    }
                }
                res = inputs.transport.changed(), if transport_open => {
                    if res.is_ok() {
                        self.transport = *inputs.transport.borrow_and_update();
                        self.reapply().await;
                    } else {
                        transport_open = false;
                    }
                }
                res = inputs.screen.changed(), if screen_open => {
                    if res.is_ok() {
                        self.screen = *inputs.screen.borrow_and_update();
                        self.reapply().await;
                    } else {
                        screen_open = false;
                    }
                }
                res = inputs.policy.changed(), if policy_open => {
                    if res.is_ok() {
                        self.policy = *inputs.policy.borrow_and_update();
                        self.reapply().await;
                    } else {
                        policy_open = false;
                    }
                }
                res = inputs.rules.changed(), if rules_open => {
                    if res.is_ok() {
                        self.rules = Arc::clone(&inputs.rules.borrow_and_update());
                        self.reapply().await;
                    } else {
                        rules_open = false;
                    }
                }
                res = inputs.privilege.changed(), if privilege_open => {
                    if res.is_ok() {
                        let level = *inputs.privilege.borrow_and_update();
                        self.on_privilege_changed(level).await;
                    } else {
                        privilege_open = false;
                    }
                }
                () = health_tick => self.health_check().await,
            }
        }
    }

    // ── State transitions ────────────────────────────────────────

    async fn handle_start(&mut self, mode: FirewallMode) -> Result<(), CoreError> {
        if self.active.is_some() {
            if self.mode == mode && self.state_tx.borrow().is_running() {
                debug!("start ignored; already running in this mode");
                return Ok(());
            }
            // Mode changed while running: tear down first, then come up
            // in the requested shape.
            self.do_stop().await;
        }
        self.mode = mode;

        // Release the boot-time block before the real backend takes
        // over; tolerates the script never having run.
        if let Err(e) = self.boot.teardown_boot_rules().await {
            warn!(error = %e, "boot-rule teardown failed");
        }

        let first = select_backend(mode, self.privilege, self.config.connmgr_supported);
        let mut candidates = vec![first];
        if mode == FirewallMode::Auto {
            candidates.extend(fallback_candidates(
                first,
                self.privilege,
                self.config.connmgr_supported,
            ));
        }

        let mut last_err: Option<CoreError> = None;
        for kind in candidates {
            self.publish(FirewallState::Starting { backend: kind });
            match self.bring_up(kind).await {
                Ok(()) => {
                    self.publish(FirewallState::Running { backend: kind });
                    info!(backend = %kind, "firewall running");
                    return Ok(());
                }
                Err(e) => {
                    warn!(backend = %kind, error = %e, "backend failed to come up");
                    last_err = Some(e);
                }
            }
        }

        let err = last_err.unwrap_or(CoreError::FatalInternal {
            message: "no backend candidates".into(),
        });
        self.publish(FirewallState::Error {
            kind: err.kind(),
            message: err.to_string(),
        });
        self.commit_stopped_flags();
        Err(err)
    }

    /// Build, preflight, start, and first-apply one backend. On any
    /// failure the partial result is stopped best-effort, so a
    /// cancelled start never leaks enforcement structure.
    async fn bring_up(&mut self, kind: BackendKind) -> Result<(), CoreError> {
        let backend = self.build_backend(kind);
        backend.check_availability().await?;
        backend.start().await?;

        let ctx = self.current_context();
        match backend.apply(&ctx).await {
            Ok(()) => {
                self.applied = ctx.blocked;
                self.health_passes = 0;
                self.health_failures = 0;
                self.next_health = (kind != BackendKind::Tunnel)
                    .then(|| Instant::now() + self.config.health_interval_initial);
                self.active = Some(backend);
                self.commit_running_flags(kind);
                Ok(())
            }
            Err(e) => {
                if let Err(stop_err) = backend.stop().await {
                    warn!(error = %stop_err, "cleanup of partial start failed");
                }
                Err(e)
            }
        }
    }

    fn build_backend(&self, kind: BackendKind) -> ActiveBackend {
        match kind {
            BackendKind::Tunnel => ActiveBackend::Tunnel(TunnelBackend::new(
                Arc::clone(&self.tunnel_provider),
                Arc::clone(&self.catalog),
                Arc::clone(&self.prefs),
                Arc::clone(&self.alerts),
                Arc::clone(&self.config),
            )),
            BackendKind::PacketFilter => ActiveBackend::PacketFilter(PacketFilterBackend::new(
                Arc::clone(&self.executor),
                self.config.chain_name.clone(),
            )),
            BackendKind::ConnMgr => ActiveBackend::ConnMgr(ConnMgrBackend::new(
                Arc::clone(&self.executor),
                self.config.connmgr_supported,
            )),
            BackendKind::NetPolicy => {
                ActiveBackend::NetPolicy(NetPolicyBackend::new(Arc::clone(&self.executor)))
            }
        }
    }

    async fn do_stop(&mut self) {
        if let Some(backend) = self.active.take() {
            if let Err(e) = backend.stop().await {
                warn!(backend = %backend.kind(), error = %e, "backend stop failed");
            }
        }
        self.applied = BlockedSet::new();
        self.next_health = None;
        self.commit_stopped_flags();
        self.publish(FirewallState::Stopped);
    }

    /// Recompute the blocked set and push it to the active backend.
    /// Diff-based backends skip no-op updates; the tunnel rebuilds on
    /// every environment change regardless.
    async fn reapply(&mut self) {
        let Some(backend) = &self.active else { return };
        if !self.state_tx.borrow().is_running() {
            return;
        }

        let ctx = self.current_context();
        let diff = ctx.blocked.diff(&self.applied);
        if diff.is_empty() && backend.kind() != BackendKind::Tunnel {
            return;
        }
        debug!(
            backend = %backend.kind(),
            add = diff.add.len(),
            remove = diff.remove.len(),
            "applying recomputed blocked set"
        );

        match backend.apply(&ctx).await {
            Ok(()) => self.applied = ctx.blocked,
            Err(CoreError::PrivilegeRevoked) => {
                info!("tunnel taken over; treating as explicit stop");
                self.do_stop().await;
            }
            Err(e) => {
                // Failed entries stay out of the applied set and are
                // retried on the next recomputation.
                warn!(error = %e, "apply failed");
            }
        }
    }

    async fn on_privilege_changed(&mut self, level: PrivilegeLevel) {
        let previous = self.privilege;
        self.privilege = level;
        if previous == level {
            return;
        }
        let Some(backend) = &self.active else { return };
        if self.mode != FirewallMode::Auto {
            return;
        }

        let preferred = select_backend(FirewallMode::Auto, level, self.config.connmgr_supported);
        if preferred.rank() < backend.kind().rank() {
            info!(from = %backend.kind(), to = %preferred, "privilege gained; upgrading backend");
            self.failover(preferred).await;
        }
    }

    /// Switch to `kind` new-before-old: the replacement is started and
    /// carries the blocked set before the old backend is torn down. If
    /// the replacement fails to come up, the old backend stays.
    async fn failover(&mut self, kind: BackendKind) {
        let Some(old) = self.active.take() else { return };
        self.publish(FirewallState::Starting { backend: kind });

        match self.bring_up(kind).await {
            Ok(()) => {
                if let Err(e) = old.stop().await {
                    warn!(backend = %old.kind(), error = %e, "old backend stop failed");
                }
                self.publish(FirewallState::Running { backend: kind });
                info!(backend = %kind, "failover complete");
            }
            Err(e) => {
                warn!(backend = %kind, error = %e, "failover target failed; staying put");
                let prev = old.kind();
                self.active = Some(old);
                self.next_health = (prev != BackendKind::Tunnel)
                    .then(|| Instant::now() + self.config.health_interval_initial);
                self.publish(FirewallState::Running { backend: prev });
            }
        }
    }

    // ── Health check ─────────────────────────────────────────────

    async fn health_check(&mut self) {
        let Some(backend) = &self.active else {
            self.next_health = None;
            return;
        };
        if backend.kind() == BackendKind::Tunnel {
            self.next_health = None;
            return;
        }

        if backend.is_active().await {
            self.health_failures = 0;
            self.health_passes += 1;
            let interval = if self.health_passes >= self.config.health_stable_threshold {
                self.config.health_interval_stable
            } else {
                self.config.health_interval_initial
            };
            self.next_health = Some(Instant::now() + interval);
        } else {
            self.health_passes = 0;
            self.health_failures += 1;
            warn!(
                backend = %backend.kind(),
                failures = self.health_failures,
                "health check failed"
            );
            if self.health_failures >= HEALTH_FAILURE_LIMIT {
                self.fallback_after_failure().await;
            } else {
                // Failure resets the cadence to the initial interval.
                self.next_health = Some(Instant::now() + self.config.health_interval_initial);
            }
        }
    }

    async fn fallback_after_failure(&mut self) {
        let Some(old) = self.active.take() else { return };
        let failed = old.kind();
        error!(backend = %failed, "enforcement lost; falling back");

        for kind in fallback_candidates(failed, self.privilege, self.config.connmgr_supported) {
            self.publish(FirewallState::Starting { backend: kind });
            if self.bring_up(kind).await.is_ok() {
                if let Err(e) = old.stop().await {
                    warn!(error = %e, "broken backend teardown failed");
                }
                self.publish(FirewallState::Running { backend: kind });
                info!(backend = %kind, "fallback complete");
                return;
            }
        }

        if let Err(e) = old.stop().await {
            warn!(error = %e, "broken backend teardown failed");
        }
        self.commit_stopped_flags();
        self.next_health = None;
        self.alerts.raise(
            Alert::EnforcementLost,
            "every enforcement backend failed; traffic is not being filtered",
        );
        self.publish(FirewallState::Error {
            kind: crate::error::ErrorKind::BackendStartFailed,
            message: "no enforcement backend available".into(),
        });
    }

    // ── Helpers ──────────────────────────────────────────────────

    fn current_context(&self) -> ApplyContext {
        let apps = self.catalog.installed_apps();
        let blocked = resolver::resolve(&ResolverInput {
            rules: &self.rules,
            installed: &apps,
            transport: self.transport,
            screen: self.screen,
            policy: self.policy,
        });
        ApplyContext {
            blocked,
            transport: self.transport,
            screen: self.screen,
        }
    }

    fn publish(&self, state: FirewallState) {
        self.state_tx.send_if_modified(|cur| {
            if *cur == state {
                false
            } else {
                debug!(from = ?cur, to = ?state, "firewall state");
                *cur = state;
                true
            }
        });
    }

    fn commit_running_flags(&self, kind: BackendKind) {
        let privileged = (kind != BackendKind::Tunnel).then_some(kind);
        let result = self.prefs.update(|f| {
            f.service_running = true;
            f.privileged_service_running = privileged.is_some();
            f.privileged_backend_type = privileged;
        });
        if let Err(e) = result {
            warn!(error = %e, "status write failed");
        }
    }

    fn commit_stopped_flags(&self) {
        let result = self.prefs.update(|f| {
            f.service_running = false;
            f.interface_active = false;
            f.privileged_service_running = false;
            f.privileged_backend_type = None;
        });
        if let Err(e) = result {
            warn!(error = %e, "status write failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auto_selection_follows_privilege() {
        type K = BackendKind;
        type P = PrivilegeLevel;

        // ConnMgr wins whenever any elevation exists and the OS has it.
        assert_eq!(select_backend(FirewallMode::Auto, P::AssistiveAdbMode, true), K::ConnMgr);
        assert_eq!(select_backend(FirewallMode::Auto, P::Root, true), K::ConnMgr);

        // Without ConnMgr, root-capable shells get the packet filter.
        assert_eq!(select_backend(FirewallMode::Auto, P::Root, false), K::PacketFilter);
        assert_eq!(
            select_backend(FirewallMode::Auto, P::AssistiveRootMode, false),
            K::PacketFilter
        );

        // Adb-level elevation only reaches the legacy policy API.
        assert_eq!(
            select_backend(FirewallMode::Auto, P::AssistiveAdbMode, false),
            K::NetPolicy
        );

        // No privileges: tunnel.
        assert_eq!(select_backend(FirewallMode::Auto, P::None, true), K::Tunnel);
    }

    #[test]
    fn fixed_modes_ignore_privilege() {
        assert_eq!(
            select_backend(FirewallMode::PacketFilter, PrivilegeLevel::None, true),
            BackendKind::PacketFilter
        );
        assert_eq!(
            select_backend(FirewallMode::Tunnel, PrivilegeLevel::Root, true),
            BackendKind::Tunnel
        );
    }

    #[test]
    fn fallback_candidates_are_strictly_less_preferred() {
        let c = fallback_candidates(BackendKind::ConnMgr, PrivilegeLevel::Root, true);
        assert_eq!(
            c,
            vec![BackendKind::PacketFilter, BackendKind::NetPolicy, BackendKind::Tunnel]
        );

        let c = fallback_candidates(BackendKind::NetPolicy, PrivilegeLevel::AssistiveAdbMode, false);
        assert_eq!(c, vec![BackendKind::Tunnel]);

        assert!(fallback_candidates(BackendKind::Tunnel, PrivilegeLevel::None, true).is_empty());
    }
}
