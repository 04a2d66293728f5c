// ── Command handlers ──
//
// Each handler wires a firewall core over the CLI's static environment
// (the CLI has no live OS feeds; transport and screen are assumed via
// flags) and drives the public control surface.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::info;

use palisade_core::backend::{TunnelProvider, TunnelSession, TunnelSpec};
use palisade_core::{
    CoreConfig, CoreError, Firewall, FirewallDeps, FirewallRule, InstalledApp, LogAlertSink,
    PrivilegeProbe, ShellExecutor, StaticAppCatalog, StatusFlags, StatusPrefs, WatchRuleStore,
};

use crate::cli::{BootAction, BootArgs, GlobalOpts, PlanArgs, StartArgs};
use crate::error::CliError;

/// The CLI carries no platform glue for the OS tunnel service; tunnel
/// mode needs the full app. Start plans still report it as available so
/// `plan` output matches what the app would do.
struct NoTunnel;

#[async_trait]
impl TunnelProvider for NoTunnel {
    async fn establish(
        &self,
        _spec: TunnelSpec,
    ) -> Result<Option<Box<dyn TunnelSession>>, CoreError> {
        Err(CoreError::UnsupportedDevice {
            reason: "tunnel enforcement requires the firewall app, not the CLI".into(),
        })
    }

    async fn another_provider_active(&self) -> bool {
        false
    }
}

/// Environment senders kept alive for the lifetime of a run.
struct Wired {
    firewall: Firewall,
    _transport: watch::Sender<palisade_core::NetworkType>,
    _screen: watch::Sender<palisade_core::ScreenState>,
    _policy: watch::Sender<palisade_core::DefaultPolicy>,
}

fn wire(global: &GlobalOpts, start: Option<&StartArgs>) -> Result<Wired, CliError> {
    let config = CoreConfig {
        shell: global.shell.clone(),
        prefs_path: global.state_file.clone(),
        ..CoreConfig::default()
    };

    let rules_list: Vec<FirewallRule> = match &global.rules {
        Some(path) => read_json(path)?,
        None => Vec::new(),
    };
    let apps: Vec<InstalledApp> = match &global.apps {
        Some(path) => read_json(path)?,
        None => Vec::new(),
    };

    let executor = Arc::new(ShellExecutor::from_config(&config));
    let probe = PrivilegeProbe::new(
        Arc::new(config.clone()),
        Arc::clone(&executor) as Arc<dyn palisade_core::PrivilegeExecutor>,
        None,
    );
    let rules = Arc::new(WatchRuleStore::new());
    rules.publish(rules_list);

    let (transport_tx, transport_rx) = watch::channel(
        start.map_or(palisade_core::NetworkType::Wifi, |s| s.transport),
    );
    let (screen_tx, screen_rx) =
        watch::channel(start.map_or(palisade_core::ScreenState::On, |s| s.screen));
    let (policy_tx, policy_rx) =
        watch::channel(start.map_or(palisade_core::DefaultPolicy::AllowAll, |s| s.policy));

    let firewall = Firewall::new(
        config,
        FirewallDeps {
            executor,
            tunnel: Arc::new(NoTunnel),
            catalog: Arc::new(StaticAppCatalog::new(apps)),
            rules,
            probe,
            transport: transport_rx,
            screen: screen_rx,
            policy: policy_rx,
            prefs: Arc::new(StatusPrefs::open(global.state_file.clone())),
            alerts: Arc::new(LogAlertSink),
        },
    );

    Ok(Wired {
        firewall,
        _transport: transport_tx,
        _screen: screen_tx,
        _policy: policy_tx,
    })
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, CliError> {
    let bytes = std::fs::read(path).map_err(|e| CliError::Input {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    serde_json::from_slice(&bytes).map_err(|e| CliError::Input {
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}

pub async fn start(args: &StartArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let wired = wire(global, Some(args))?;
    wired.firewall.privilege().refresh().await;

    wired.firewall.start(args.mode).await?;
    let state = wired.firewall.state();
    info!(?state, "firewall up; press ctrl-c to stop");
    println!("{}", render_state(&state, global.json));

    tokio::signal::ctrl_c().await.map_err(|e| CliError::Input {
        path: "<signal>".into(),
        reason: e.to_string(),
    })?;

    wired.firewall.stop().await?;
    wired.firewall.shutdown().await;
    println!("stopped");
    Ok(())
}

pub fn status(global: &GlobalOpts) -> Result<(), CliError> {
    let prefs = StatusPrefs::open(global.state_file.clone());
    let flags = prefs.snapshot();
    if global.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&*flags).unwrap_or_else(|_| "{}".into())
        );
    } else {
        print_flags(&flags);
    }
    Ok(())
}

pub async fn plan(args: &PlanArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let wired = wire(global, None)?;
    wired.firewall.privilege().refresh().await;

    let plan = wired.firewall.compute_start_plan(args.mode);
    if global.json {
        println!(
            "{{\"backend\":\"{}\",\"requires_tunnel_permission\":{}}}",
            plan.backend, plan.requires_tunnel_permission
        );
    } else {
        println!("backend: {}", plan.backend);
        println!("tunnel consent needed: {}", plan.requires_tunnel_permission);
    }
    wired.firewall.shutdown().await;
    Ok(())
}

pub async fn boot(args: &BootArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let wired = wire(global, None)?;
    let boot = wired.firewall.boot();

    match &args.action {
        BootAction::Enable { yes } => {
            if !confirm(
                "Install the early-boot blocking script? Apps will have no network \
                 from boot until the firewall starts.",
                *yes,
            ) {
                println!("aborted");
                return Ok(());
            }
            boot.set_enabled(true).await?;
            println!("boot protection enabled");
        }
        BootAction::Disable { yes } => {
            if !confirm("Remove the early-boot blocking script?", *yes) {
                println!("aborted");
                return Ok(());
            }
            boot.set_enabled(false).await?;
            println!("boot protection disabled");
        }
        BootAction::Status => {
            let supported = boot.is_supported().await;
            let enabled = boot.is_enabled().await;
            if global.json {
                println!("{{\"supported\":{supported},\"enabled\":{enabled}}}");
            } else {
                println!("supported: {supported}");
                println!("enabled: {enabled}");
            }
        }
    }
    wired.firewall.shutdown().await;
    Ok(())
}

fn confirm(prompt: &str, assume_yes: bool) -> bool {
    if assume_yes {
        return true;
    }
    dialoguer::Confirm::new()
        .with_prompt(prompt)
        .default(false)
        .interact()
        .unwrap_or(false)
}

fn render_state(state: &palisade_core::FirewallState, json: bool) -> String {
    if json {
        serde_json::to_string(state).unwrap_or_else(|_| "{}".into())
    } else {
        match state {
            palisade_core::FirewallState::Running { backend } => {
                format!("running ({backend})")
            }
            other => format!("{other:?}"),
        }
    }
}

fn print_flags(flags: &StatusFlags) {
    println!("service running: {}", flags.service_running);
    println!("interface active: {}", flags.interface_active);
    println!(
        "privileged backend: {}",
        flags
            .privileged_backend_type
            .map_or_else(|| "none".into(), |b| b.to_string())
    );
    if let Some(at) = flags.updated_at {
        println!("updated: {at}");
    }
}
