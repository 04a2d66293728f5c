// ── Packet-filter backend ──
//
// Kernel-level enforcement through the packet filter's owner match on
// the OUTPUT path (INPUT cannot match by owner UID). A custom chain is
// created in both the IPv4 and IPv6 tables and linked from OUTPUT at
// the head; per-UID DROP rules are maintained incrementally against
// the tracked installed set.

use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::ApplyContext;
use crate::error::CoreError;
use crate::model::{BackendKind, Uid};
use crate::privilege::PrivilegeExecutor;

/// IPv4 and IPv6 filter front-ends; every mutation runs against both.
const FILTER_BINARIES: [&str; 2] = ["iptables", "ip6tables"];

pub struct PacketFilterBackend {
    executor: Arc<dyn PrivilegeExecutor>,
    chain: String,
    state: Mutex<PfState>,
}

#[derive(Default)]
struct PfState {
    started: bool,
    installed: BTreeSet<Uid>,
}

impl PacketFilterBackend {
    pub fn new(executor: Arc<dyn PrivilegeExecutor>, chain: String) -> Self {
        Self {
            executor,
            chain,
            state: Mutex::new(PfState::default()),
        }
    }

    /// Requires a root shell and the owner-match module.
    pub async fn check_availability(&self) -> Result<(), CoreError> {
        let version = self.executor.execute("iptables --version").await;
        if !version.success() {
            return Err(CoreError::unsupported("iptables not present"));
        }
        // Listing OUTPUT needs net-admin authority; a permission error
        // here means the shell is not actually privileged.
        let probe = self.executor.execute("iptables -S OUTPUT").await;
        if !probe.success() {
            return Err(CoreError::PrivilegeRequired {
                needed: "root shell for packet-filter mutations".into(),
            });
        }
        Ok(())
    }

    pub async fn start(&self) -> Result<(), CoreError> {
        let mut state = self.state.lock().await;
        for bin in FILTER_BINARIES {
            let cmd = format!(
                "{bin} -N {chain} 2>/dev/null; \
                 {bin} -C OUTPUT -j {chain} 2>/dev/null || {bin} -I OUTPUT 1 -j {chain}",
                chain = self.chain,
            );
            let out = self.executor.execute(&cmd).await;
            if !out.success() {
                return Err(CoreError::start_failed(
                    BackendKind::PacketFilter,
                    format!("{bin}: {}", out.output.trim()),
                ));
            }
        }
        state.started = true;
        state.installed.clear();
        debug!(chain = %self.chain, "packet-filter chain linked");
        Ok(())
    }

    /// Unlink -> flush -> delete, each step tolerating "already absent".
    pub async fn stop(&self) -> Result<(), CoreError> {
        let mut state = self.state.lock().await;
        for bin in FILTER_BINARIES {
            let cmd = format!(
                "{bin} -D OUTPUT -j {chain} 2>/dev/null || true; \
                 {bin} -F {chain} 2>/dev/null || true; \
                 {bin} -X {chain} 2>/dev/null || true",
                chain = self.chain,
            );
            let out = self.executor.execute(&cmd).await;
            if !out.success() {
                warn!(bin, output = %out.output.trim(), "packet-filter teardown step failed");
            }
        }
        state.started = false;
        state.installed.clear();
        Ok(())
    }

    pub async fn apply(&self, ctx: &ApplyContext) -> Result<(), CoreError> {
        let mut state = self.state.lock().await;
        if !state.started {
            return Err(CoreError::FatalInternal {
                message: "apply before start on packet-filter backend".into(),
            });
        }

        let target: BTreeSet<Uid> = ctx.blocked.iter().collect();
        let add: Vec<Uid> = target.difference(&state.installed).copied().collect();
        let remove: Vec<Uid> = state.installed.difference(&target).copied().collect();
        if add.is_empty() && remove.is_empty() {
            return Ok(());
        }
        debug!(add = add.len(), remove = remove.len(), "packet-filter diff");

        for uid in add {
            let mut ok = true;
            for bin in FILTER_BINARIES {
                let cmd = format!(
                    "{bin} -A {chain} -m owner --uid-owner {uid} -j DROP",
                    chain = self.chain,
                );
                let out = self.executor.execute(&cmd).await;
                if !out.success() {
                    // Not fatal: the uid stays out of the installed set
                    // and is retried on the next apply.
                    warn!(%uid, bin, output = %out.output.trim(), "uid add failed");
                    ok = false;
                }
            }
            if ok {
                state.installed.insert(uid);
            }
        }

        for uid in remove {
            for bin in FILTER_BINARIES {
                let cmd = format!(
                    "{bin} -D {chain} -m owner --uid-owner {uid} -j DROP 2>/dev/null || true",
                    chain = self.chain,
                );
                let out = self.executor.execute(&cmd).await;
                if !out.success() {
                    warn!(%uid, bin, "uid remove failed");
                }
            }
            state.installed.remove(&uid);
        }

        Ok(())
    }

    /// The chain is the enforcement structure; active means linked.
    pub async fn is_active(&self) -> bool {
        let cmd = format!("iptables -C OUTPUT -j {}", self.chain);
        self.executor.execute(&cmd).await.success()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    use super::*;
    use crate::model::{BlockedSet, NetworkType, ScreenState};
    use crate::privilege::ExecOutput;

    /// Records every command; commands matching a failure pattern
    /// return a non-zero exit.
    struct Recorder {
        commands: StdMutex<Vec<String>>,
        fail_on: Option<String>,
    }

    impl Recorder {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                commands: StdMutex::new(Vec::new()),
                fail_on: None,
            })
        }

        fn failing_on(pattern: &str) -> Arc<Self> {
            Arc::new(Self {
                commands: StdMutex::new(Vec::new()),
                fail_on: Some(pattern.into()),
            })
        }

        fn recorded(&self) -> Vec<String> {
            self.commands.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PrivilegeExecutor for Recorder {
        async fn execute(&self, command: &str) -> ExecOutput {
            self.commands.lock().unwrap().push(command.to_owned());
            match &self.fail_on {
                Some(p) if command.contains(p.as_str()) => ExecOutput {
                    code: 1,
                    output: "simulated failure".into(),
                },
                _ => ExecOutput {
                    code: 0,
                    output: String::new(),
                },
            }
        }
    }

    fn ctx(uids: &[u32]) -> ApplyContext {
        ApplyContext {
            blocked: uids.iter().map(|&u| Uid(u)).collect::<BlockedSet>(),
            transport: NetworkType::Wifi,
            screen: ScreenState::On,
        }
    }

    fn backend(exec: Arc<Recorder>) -> PacketFilterBackend {
        PacketFilterBackend::new(exec, "palisade_output".into())
    }

    #[tokio::test]
    async fn start_links_chain_in_both_tables() {
        let exec = Recorder::new();
        let b = backend(Arc::clone(&exec));
        b.start().await.unwrap();

        let cmds = exec.recorded();
        assert_eq!(cmds.len(), 2);
        assert!(cmds[0].starts_with("iptables -N palisade_output"));
        assert!(cmds[1].starts_with("ip6tables -N palisade_output"));
        assert!(cmds[0].contains("-I OUTPUT 1 -j palisade_output"));
    }

    #[tokio::test]
    async fn apply_is_incremental() {
        let exec = Recorder::new();
        let b = backend(Arc::clone(&exec));
        b.start().await.unwrap();

        b.apply(&ctx(&[10001, 10002])).await.unwrap();
        b.apply(&ctx(&[10002, 10003])).await.unwrap();

        let cmds: Vec<String> = exec
            .recorded()
            .into_iter()
            .filter(|c| c.contains("--uid-owner"))
            .collect();
        // First apply: 2 uids x 2 tables appended. Second: one add, one
        // delete, 10002 untouched.
        assert_eq!(cmds.iter().filter(|c| c.contains("-A ")).count(), 6);
        assert_eq!(cmds.iter().filter(|c| c.contains("-D ")).count(), 2);
        assert!(
            !cmds
                .iter()
                .skip(4)
                .any(|c| c.contains("--uid-owner 10002"))
        );
    }

    #[tokio::test]
    async fn failed_add_is_retried_on_next_apply() {
        let exec = Recorder::failing_on("--uid-owner 10001 -j DROP");
        let b = backend(Arc::clone(&exec));
        b.start().await.unwrap();

        b.apply(&ctx(&[10001])).await.unwrap();
        b.apply(&ctx(&[10001])).await.unwrap();

        let adds = exec
            .recorded()
            .into_iter()
            .filter(|c| c.contains("-A palisade_output"))
            .count();
        // 2 tables x 2 attempts: the uid stayed out of the installed set.
        assert_eq!(adds, 4);
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_tolerates_absence() {
        let exec = Recorder::new();
        let b = backend(Arc::clone(&exec));
        b.start().await.unwrap();
        b.apply(&ctx(&[10001])).await.unwrap();

        b.stop().await.unwrap();
        b.stop().await.unwrap();

        let cmds = exec.recorded();
        let teardown: Vec<&String> = cmds.iter().filter(|c| c.contains("-X ")).collect();
        assert_eq!(teardown.len(), 4);
        assert!(teardown.iter().all(|c| c.contains("|| true")));
    }

    #[tokio::test]
    async fn apply_before_start_is_an_invariant_violation() {
        let b = backend(Recorder::new());
        let err = b.apply(&ctx(&[10001])).await.unwrap_err();
        assert!(matches!(err, CoreError::FatalInternal { .. }));
    }
}
