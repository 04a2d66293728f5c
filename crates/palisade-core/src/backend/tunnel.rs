// ── Tunnel backend ──
//
// User-space enforcement through the OS tunnel API. The app set is
// inverted: packages to BLOCK are routed into the tunnel and their
// packets silently discarded; everything else bypasses the tunnel and
// reaches the real network directly.
//
// Key behaviors: the tunnel is not established at all while the
// blocked set is empty (establishing with zero included apps would
// route every app through it), rebuilds are debounced and swap
// new-before-old so there is no enforcement gap, and establish
// failures retry on a backoff ladder with a user-visible alert after
// repeated failures.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::ApplyContext;
use crate::alert::{Alert, AlertSink};
use crate::config::CoreConfig;
use crate::error::CoreError;
use crate::prefs::StatusPrefs;
use crate::store::AppCatalog;

/// Private addressing for the discard interface.
const TUNNEL_ADDRESS_V4: &str = "10.111.222.1/30";
const TUNNEL_ADDRESS_V6: &str = "fd00:6866:7774::1/126";
const TUNNEL_SESSION: &str = "palisade";

/// Everything the OS needs to establish the discard interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelSpec {
    pub session: String,
    pub address_v4: String,
    pub address_v6: String,
    /// Default routes so every packet from an included app enters the
    /// tunnel.
    pub routes: Vec<String>,
    /// Packages whose traffic enters (and dies in) the tunnel.
    pub blocked_packages: Vec<String>,
}

/// An established tunnel interface. Dropping without `close` leaks the
/// OS-side file descriptor, so the backend always closes explicitly.
#[async_trait]
pub trait TunnelSession: Send + Sync {
    async fn close(&self);
}

/// Platform glue around the OS tunnel-service API.
#[async_trait]
pub trait TunnelProvider: Send + Sync {
    /// `Ok(None)` means the OS declined without revoking consent (the
    /// expected-up-but-failed case that feeds the retry ladder).
    async fn establish(
        &self,
        spec: TunnelSpec,
    ) -> Result<Option<Box<dyn TunnelSession>>, CoreError>;

    /// After a revocation: did another tunnel app take over? If yes the
    /// revocation is final; if no (airplane mode and the like) this
    /// backend stays eligible for automatic re-establishment.
    async fn another_provider_active(&self) -> bool;
}

#[derive(Clone)]
pub struct TunnelBackend {
    inner: Arc<TunnelInner>,
}

struct TunnelInner {
    provider: Arc<dyn TunnelProvider>,
    catalog: Arc<dyn AppCatalog>,
    prefs: Arc<StatusPrefs>,
    alerts: Arc<dyn AlertSink>,
    config: Arc<CoreConfig>,
    cancel: CancellationToken,
    state: Mutex<TunnelState>,
}

#[derive(Default)]
struct TunnelState {
    /// Logical up: true between start and stop, including the
    /// zero-block case where no interface exists.
    active: bool,
    session: Option<Box<dyn TunnelSession>>,
    desired: Option<ApplyContext>,
    last_rebuild: Option<Instant>,
    consecutive_failures: u32,
    retry_scheduled: bool,
}

impl TunnelBackend {
    pub fn new(
        provider: Arc<dyn TunnelProvider>,
        catalog: Arc<dyn AppCatalog>,
        prefs: Arc<StatusPrefs>,
        alerts: Arc<dyn AlertSink>,
        config: Arc<CoreConfig>,
    ) -> Self {
        Self {
            inner: Arc::new(TunnelInner {
                provider,
                catalog,
                prefs,
                alerts,
                config,
                cancel: CancellationToken::new(),
                state: Mutex::new(TunnelState::default()),
            }),
        }
    }

    /// Only the user-consented tunnel permission is needed, and consent
    /// is discovered at establish time.
    pub fn check_availability(&self) -> Result<(), CoreError> {
        Ok(())
    }

    pub async fn start(&self) -> Result<(), CoreError> {
        let mut state = self.inner.state.lock().await;
        state.active = true;
        state.consecutive_failures = 0;
        Ok(())
    }

    pub async fn stop(&self) -> Result<(), CoreError> {
        self.inner.cancel.cancel();
        let mut state = self.inner.state.lock().await;
        if let Some(session) = state.session.take() {
            session.close().await;
        }
        state.active = false;
        state.desired = None;
        state.consecutive_failures = 0;
        if let Err(e) = self.inner.prefs.set_interface_active(false) {
            warn!(error = %e, "status write failed on tunnel stop");
        }
        Ok(())
    }

    pub async fn apply(&self, ctx: &ApplyContext) -> Result<(), CoreError> {
        let debounce_left = {
            let mut state = self.inner.state.lock().await;
            if !state.active {
                return Err(CoreError::FatalInternal {
                    message: "apply before start on tunnel backend".into(),
                });
            }
            state.desired = Some(ctx.clone());
            state
                .last_rebuild
                .and_then(|at| self.inner.config.tunnel_debounce.checked_sub(at.elapsed()))
        };

        if let Some(wait) = debounce_left {
            tokio::time::sleep(wait).await;
        }
        self.rebuild().await
    }

    pub async fn is_active(&self) -> bool {
        self.inner.state.lock().await.active
    }

    /// Rebuild the interface to match the latest desired context.
    async fn rebuild(&self) -> Result<(), CoreError> {
        let mut state = self.inner.state.lock().await;
        if !state.active {
            return Ok(());
        }
        let Some(ctx) = state.desired.clone() else {
            return Ok(());
        };
        state.last_rebuild = Some(Instant::now());

        // Zero-block optimization: establishing with zero included apps
        // would route every app through the tunnel, so the firewall is
        // logically up with no interface at all.
        if ctx.blocked.is_empty() {
            if let Some(old) = state.session.take() {
                old.close().await;
            }
            state.consecutive_failures = 0;
            self.mark_interface(true);
            self.inner.alerts.clear(Alert::TunnelFailing);
            debug!("blocked set empty; tunnel not established");
            return Ok(());
        }

        let spec = self.spec_for(&ctx);
        debug!(
            blocked_packages = spec.blocked_packages.len(),
            "establishing tunnel"
        );

        match self.inner.provider.establish(spec).await {
            Ok(Some(session)) => {
                // New-before-old: the replacement interface is up before
                // the previous one goes away.
                let old = state.session.replace(session);
                if let Some(old) = old {
                    old.close().await;
                }
                state.consecutive_failures = 0;
                self.mark_interface(true);
                self.inner.alerts.clear(Alert::TunnelFailing);
                info!("tunnel established");
                Ok(())
            }
            Ok(None) => {
                state.consecutive_failures += 1;
                let failures = state.consecutive_failures;
                self.mark_interface(false);
                warn!(failures, "tunnel establish returned no interface");
                if failures >= self.inner.config.tunnel_alert_threshold {
                    self.inner.alerts.raise(
                        Alert::TunnelFailing,
                        "the firewall tunnel keeps failing to come up",
                    );
                }
                self.schedule_retry(&mut state);
                Ok(())
            }
            Err(CoreError::PrivilegeRevoked) => {
                state.session = None;
                self.mark_interface(false);
                if self.inner.provider.another_provider_active().await {
                    // Another tunnel app took over: final, treat as an
                    // explicit stop.
                    state.active = false;
                    info!("tunnel permission taken by another provider; stopping");
                    Err(CoreError::PrivilegeRevoked)
                } else {
                    warn!("tunnel revoked without a successor; staying eligible for restart");
                    self.schedule_retry(&mut state);
                    Ok(())
                }
            }
            Err(e) => Err(e),
        }
    }

    fn schedule_retry(&self, state: &mut TunnelState) {
        if state.retry_scheduled {
            return;
        }
        state.retry_scheduled = true;
        let delay = self
            .inner
            .config
            .backoff_delay(state.consecutive_failures.saturating_sub(1));
        let this = self.clone();
        let cancel = self.inner.cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = cancel.cancelled() => return,
                () = tokio::time::sleep(delay) => {}
            }
            this.inner.state.lock().await.retry_scheduled = false;
            if let Err(e) = this.rebuild().await {
                warn!(error = %e, "tunnel retry failed");
            }
        });
        debug!(delay_secs = delay.as_secs(), "tunnel retry scheduled");
    }

    fn spec_for(&self, ctx: &ApplyContext) -> TunnelSpec {
        let apps = self.inner.catalog.installed_apps();
        let mut blocked_packages: Vec<String> = apps
            .iter()
            .filter(|a| ctx.blocked.contains(a.uid))
            .map(|a| a.app.package.clone())
            .collect();
        blocked_packages.sort_unstable();
        blocked_packages.dedup();

        TunnelSpec {
            session: TUNNEL_SESSION.into(),
            address_v4: TUNNEL_ADDRESS_V4.into(),
            address_v6: TUNNEL_ADDRESS_V6.into(),
            routes: vec!["0.0.0.0/0".into(), "::/0".into()],
            blocked_packages,
        }
    }

    fn mark_interface(&self, up: bool) {
        if let Err(e) = self.inner.prefs.set_interface_active(up) {
            warn!(error = %e, "status write failed");
        }
    }
}
