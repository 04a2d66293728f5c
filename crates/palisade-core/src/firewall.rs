// ── Public control surface ──
//
// `Firewall` is the handle embedders (UI process, CLI, platform
// service) hold. It owns the orchestrator task and exposes the
// method-level contract: start/stop, state snapshot + stream, and the
// start plan the UI uses to decide whether to prompt for tunnel
// consent before starting.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_core::Stream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;

use crate::alert::AlertSink;
use crate::backend::TunnelProvider;
use crate::boot::BootProtection;
use crate::config::CoreConfig;
use crate::error::CoreError;
use crate::model::{BackendKind, DefaultPolicy, FirewallMode, FirewallState, NetworkType, ScreenState};
use crate::orchestrator::{self, Command, InputChannels, Orchestrator};
use crate::prefs::StatusPrefs;
use crate::privilege::{PrivilegeExecutor, PrivilegeProbe};
use crate::store::{AppCatalog, RuleStore};

const COMMAND_CHANNEL_SIZE: usize = 16;

/// Everything the core consumes from the outside world.
pub struct FirewallDeps {
    pub executor: Arc<dyn PrivilegeExecutor>,
    pub tunnel: Arc<dyn TunnelProvider>,
    pub catalog: Arc<dyn AppCatalog>,
    pub rules: Arc<dyn RuleStore>,
    pub probe: PrivilegeProbe,
    pub transport: watch::Receiver<NetworkType>,
    pub screen: watch::Receiver<ScreenState>,
    pub policy: watch::Receiver<DefaultPolicy>,
    pub prefs: Arc<StatusPrefs>,
    pub alerts: Arc<dyn AlertSink>,
}

/// What `start(mode)` would do right now. The UI prompts for tunnel
/// consent only when the plan says so.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartPlan {
    pub backend: BackendKind,
    pub requires_tunnel_permission: bool,
}

/// The main entry point for consumers.
///
/// Cheaply cloneable; all clones drive the same orchestrator task.
#[derive(Clone)]
pub struct Firewall {
    inner: Arc<FirewallInner>,
}

struct FirewallInner {
    config: Arc<CoreConfig>,
    cmd_tx: mpsc::Sender<Command>,
    state_rx: watch::Receiver<FirewallState>,
    boot: Arc<BootProtection>,
    probe: PrivilegeProbe,
    cancel: CancellationToken,
}

impl Firewall {
    /// Wire the core together and spawn the orchestrator. The firewall
    /// starts in `Stopped`; call [`start`](Self::start) to enforce.
    pub fn new(config: CoreConfig, deps: FirewallDeps) -> Self {
        let config = Arc::new(config);
        let (state_tx, state_rx) = watch::channel(FirewallState::Stopped);
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_CHANNEL_SIZE);
        let cancel = CancellationToken::new();

        let boot = Arc::new(BootProtection::new(
            Arc::clone(&config),
            Arc::clone(&deps.executor),
        ));

        let inputs = InputChannels {
            transport: deps.transport,
            screen: deps.screen,
            policy: deps.policy,
            rules: deps.rules.rules(),
            privilege: deps.probe.subscribe(),
        };

        let orchestrator = Orchestrator::new(
            Arc::clone(&config),
            deps.executor,
            deps.tunnel,
            deps.catalog,
            deps.prefs,
            deps.alerts,
            Arc::clone(&boot),
            state_tx,
        );
        tokio::spawn(orchestrator.run(cmd_rx, inputs, cancel.clone()));

        Self {
            inner: Arc::new(FirewallInner {
                config,
                cmd_tx,
                state_rx,
                boot,
                probe: deps.probe,
                cancel,
            }),
        }
    }

    /// Start enforcement in the given mode. Idempotent: a no-op when
    /// already running in that mode.
    pub async fn start(&self, mode: FirewallMode) -> Result<(), CoreError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Start { mode, reply }).await?;
        rx.await.map_err(|_| orchestrator_gone())?
    }

    /// Stop enforcement. Idempotent.
    pub async fn stop(&self) -> Result<(), CoreError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Stop { reply }).await?;
        rx.await.map_err(|_| orchestrator_gone())?
    }

    /// Snapshot of the observable state.
    pub fn state(&self) -> FirewallState {
        self.inner.state_rx.borrow().clone()
    }

    /// Distinct-until-changed state stream.
    pub fn state_stream(&self) -> watch::Receiver<FirewallState> {
        self.inner.state_rx.clone()
    }

    /// The same stream as a `Stream` for `StreamExt` combinators.
    pub fn state_updates(&self) -> StateStream {
        StateStream {
            inner: WatchStream::new(self.inner.state_rx.clone()),
        }
    }

    /// Which backend `start(mode)` would pick right now, and whether
    /// the OS tunnel-consent dialog stands in the way.
    pub fn compute_start_plan(&self, mode: FirewallMode) -> StartPlan {
        let backend = orchestrator::select_backend(
            mode,
            self.inner.probe.current(),
            self.inner.config.connmgr_supported,
        );
        StartPlan {
            backend,
            requires_tunnel_permission: backend == BackendKind::Tunnel,
        }
    }

    /// Boot-protection manager.
    pub fn boot(&self) -> &BootProtection {
        &self.inner.boot
    }

    /// Privilege probe (for refresh and permission requests).
    pub fn privilege(&self) -> &PrivilegeProbe {
        &self.inner.probe
    }

    /// Tear down the orchestrator task, stopping any active backend.
    pub async fn shutdown(&self) {
        let _ = self.stop().await;
        self.inner.cancel.cancel();
    }

    async fn send(&self, cmd: Command) -> Result<(), CoreError> {
        self.inner
            .cmd_tx
            .send(cmd)
            .await
            .map_err(|_| orchestrator_gone())
    }
}

fn orchestrator_gone() -> CoreError {
    CoreError::FatalInternal {
        message: "orchestrator task is gone".into(),
    }
}

/// `Stream` adapter backed by the state watch channel. Yields the
/// current state on first poll, then every distinct change.
pub struct StateStream {
    inner: WatchStream<FirewallState>,
}

impl Stream for StateStream {
    type Item = FirewallState;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}
