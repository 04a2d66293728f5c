// Shared fixtures for end-to-end firewall tests: a scripted privilege
// executor, a fake tunnel provider, and a fully wired `Firewall` over
// watch-channel environment feeds.

use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::watch;

use palisade_core::backend::{TunnelProvider, TunnelSession, TunnelSpec};
use palisade_core::{
    Alert, AlertSink, AppId, CoreConfig, CoreError, DefaultPolicy, ExecOutput, Firewall,
    FirewallDeps, FirewallRule, FirewallState, InstalledApp, NetworkType, PrivilegeExecutor,
    PrivilegeProbe, ScreenState, StaticAppCatalog, StatusPrefs, Uid, WatchRuleStore,
};

// ── Shared event log ────────────────────────────────────────────────
//
// Executor commands and tunnel lifecycle events interleave in one log
// so tests can assert cross-backend ordering (new-before-old).

pub type EventLog = Arc<StdMutex<Vec<String>>>;

pub fn entries_matching(log: &EventLog, needle: &str) -> Vec<String> {
    log.lock()
        .unwrap()
        .iter()
        .filter(|e| e.contains(needle))
        .cloned()
        .collect()
}

pub fn first_index(log: &EventLog, needle: &str) -> Option<usize> {
    log.lock().unwrap().iter().position(|e| e.contains(needle))
}

// ── Scripted privilege executor ─────────────────────────────────────

pub struct ScriptedExecutor {
    log: EventLog,
    fail_patterns: StdMutex<Vec<String>>,
}

impl ScriptedExecutor {
    pub fn new(log: EventLog) -> Arc<Self> {
        Arc::new(Self {
            log,
            fail_patterns: StdMutex::new(Vec::new()),
        })
    }

    /// Commands containing any of these substrings start failing.
    pub fn set_failing(&self, patterns: &[&str]) {
        *self.fail_patterns.lock().unwrap() =
            patterns.iter().map(|p| (*p).to_owned()).collect();
    }
}

#[async_trait]
impl PrivilegeExecutor for ScriptedExecutor {
    async fn execute(&self, command: &str) -> ExecOutput {
        self.log.lock().unwrap().push(format!("exec {command}"));
        let failing = self
            .fail_patterns
            .lock()
            .unwrap()
            .iter()
            .any(|p| command.contains(p.as_str()));
        if failing {
            ExecOutput {
                code: 1,
                output: "scripted failure".into(),
            }
        } else {
            ExecOutput {
                code: 0,
                output: String::new(),
            }
        }
    }
}

// ── Fake tunnel provider ────────────────────────────────────────────

pub struct FakeTunnel {
    log: EventLog,
    refuse: AtomicBool,
    counter: AtomicU32,
}

struct FakeSession {
    id: u32,
    log: EventLog,
}

#[async_trait]
impl TunnelSession for FakeSession {
    async fn close(&self) {
        self.log
            .lock()
            .unwrap()
            .push(format!("tunnel close {}", self.id));
    }
}

impl FakeTunnel {
    pub fn new(log: EventLog) -> Arc<Self> {
        Arc::new(Self {
            log,
            refuse: AtomicBool::new(false),
            counter: AtomicU32::new(0),
        })
    }

    pub fn set_refusing(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }
}

#[async_trait]
impl TunnelProvider for FakeTunnel {
    async fn establish(
        &self,
        spec: TunnelSpec,
    ) -> Result<Option<Box<dyn TunnelSession>>, CoreError> {
        if self.refuse.load(Ordering::SeqCst) {
            self.log.lock().unwrap().push("tunnel refused".into());
            return Ok(None);
        }
        let id = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        self.log.lock().unwrap().push(format!(
            "tunnel establish {id} [{}]",
            spec.blocked_packages.join(",")
        ));
        Ok(Some(Box::new(FakeSession {
            id,
            log: Arc::clone(&self.log),
        })))
    }

    async fn another_provider_active(&self) -> bool {
        false
    }
}

// ── Recording alert sink ────────────────────────────────────────────

pub struct RecordingAlerts(pub StdMutex<Vec<String>>);

impl AlertSink for RecordingAlerts {
    fn raise(&self, alert: Alert, _message: &str) {
        self.0.lock().unwrap().push(format!("raise {alert:?}"));
    }

    fn clear(&self, alert: Alert) {
        self.0.lock().unwrap().push(format!("clear {alert:?}"));
    }
}

// ── Model helpers ───────────────────────────────────────────────────

pub fn net_app(package: &str, uid: u32) -> InstalledApp {
    InstalledApp {
        app: AppId::new(package, 0),
        uid: Uid(uid),
        permissions: vec!["android.permission.INTERNET".into()],
        service_permissions: Vec::new(),
    }
}

pub fn wifi_block_rule(package: &str, uid: u32) -> FirewallRule {
    FirewallRule {
        app: AppId::new(package, 0),
        uid: Uid(uid),
        enabled: true,
        wifi_blocked: true,
        mobile_blocked: false,
        roaming_blocked: false,
        block_when_screen_off: false,
        last_modified: Utc::now(),
    }
}

pub fn screen_off_rule(package: &str, uid: u32) -> FirewallRule {
    FirewallRule {
        app: AppId::new(package, 0),
        uid: Uid(uid),
        enabled: true,
        wifi_blocked: false,
        mobile_blocked: false,
        roaming_blocked: false,
        block_when_screen_off: true,
        last_modified: Utc::now(),
    }
}

// ── Wired harness ───────────────────────────────────────────────────

pub struct Harness {
    pub firewall: Firewall,
    pub rules: Arc<WatchRuleStore>,
    pub probe: PrivilegeProbe,
    pub exec: Arc<ScriptedExecutor>,
    pub tunnel: Arc<FakeTunnel>,
    pub alerts: Arc<RecordingAlerts>,
    pub prefs: Arc<StatusPrefs>,
    pub log: EventLog,
    pub transport: watch::Sender<NetworkType>,
    pub screen: watch::Sender<ScreenState>,
    pub policy: watch::Sender<DefaultPolicy>,
    _dir: tempfile::TempDir,
}

impl Harness {
    pub fn new(apps: Vec<InstalledApp>) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let config = CoreConfig {
            su_paths: vec!["/nonexistent/su".into()],
            boot_script_dir: dir.path().join("post-fs-data.d"),
            prefs_path: dir.path().join("state.json"),
            ..CoreConfig::default()
        };

        let log: EventLog = Arc::new(StdMutex::new(Vec::new()));
        let exec = ScriptedExecutor::new(Arc::clone(&log));
        let tunnel = FakeTunnel::new(Arc::clone(&log));
        let alerts = Arc::new(RecordingAlerts(StdMutex::new(Vec::new())));
        let prefs = Arc::new(StatusPrefs::open(config.prefs_path.clone()));
        let rules = Arc::new(WatchRuleStore::new());
        let catalog = Arc::new(StaticAppCatalog::new(apps));
        let probe = PrivilegeProbe::new(
            Arc::new(config.clone()),
            Arc::clone(&exec) as Arc<dyn PrivilegeExecutor>,
            None,
        );

        let (transport, transport_rx) = watch::channel(NetworkType::Wifi);
        let (screen, screen_rx) = watch::channel(ScreenState::On);
        let (policy, policy_rx) = watch::channel(DefaultPolicy::AllowAll);

        let firewall = Firewall::new(
            config,
            FirewallDeps {
                executor: Arc::clone(&exec) as Arc<dyn PrivilegeExecutor>,
                tunnel: Arc::clone(&tunnel) as Arc<dyn TunnelProvider>,
                catalog,
                rules: Arc::clone(&rules) as Arc<dyn palisade_core::RuleStore>,
                probe: probe.clone(),
                transport: transport_rx,
                screen: screen_rx,
                policy: policy_rx,
                prefs: Arc::clone(&prefs),
                alerts: Arc::clone(&alerts) as Arc<dyn AlertSink>,
            },
        );

        Self {
            firewall,
            rules,
            probe,
            exec,
            tunnel,
            alerts,
            prefs,
            log,
            transport,
            screen,
            policy,
            _dir: dir,
        }
    }

    /// Let the orchestrator drain pending events. Under paused time the
    /// clock only advances once every task is idle, so this returns
    /// with all queued watch/channel events processed.
    pub async fn settle(&self) {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    /// Poll an arbitrary condition; paused time advances through the
    /// retry/health timers between polls.
    pub async fn wait_until(&self, pred: impl Fn() -> bool) {
        tokio::time::timeout(Duration::from_secs(3600), async {
            while !pred() {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    /// Wait until the state stream satisfies the predicate, with a
    /// generous ceiling so a wedged orchestrator fails the test.
    pub async fn wait_for_state(
        &self,
        pred: impl Fn(&FirewallState) -> bool,
    ) -> FirewallState {
        let mut rx = self.firewall.state_stream();
        tokio::time::timeout(Duration::from_secs(3600), async move {
            loop {
                {
                    let current = rx.borrow_and_update();
                    if pred(&current) {
                        return current.clone();
                    }
                }
                rx.changed().await.expect("state stream closed");
            }
        })
        .await
        .expect("expected firewall state not reached")
    }
}
