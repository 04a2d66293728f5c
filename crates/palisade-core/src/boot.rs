// ── Boot protection ──
//
// Between device startup and the moment the firewall takes control,
// user-app traffic is blocked by a shell script the OS boot environment
// executes during early boot. This module manages that script's
// lifecycle and the teardown the orchestrator runs at takeover.
//
// The script installs a minimal chain: loopback and a fixed set of
// critical system UIDs are accepted, everything else is dropped, for
// both IPv4 and IPv6.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::CoreConfig;
use crate::error::CoreError;
use crate::privilege::PrivilegeExecutor;

pub struct BootProtection {
    config: Arc<CoreConfig>,
    executor: Arc<dyn PrivilegeExecutor>,
}

impl BootProtection {
    pub fn new(config: Arc<CoreConfig>, executor: Arc<dyn PrivilegeExecutor>) -> Self {
        Self { config, executor }
    }

    /// The OS supports boot protection iff the boot-script directory
    /// exists.
    pub async fn is_supported(&self) -> bool {
        tokio::fs::try_exists(&self.config.boot_script_dir)
            .await
            .unwrap_or(false)
    }

    /// Enabled iff the script file exists.
    pub async fn is_enabled(&self) -> bool {
        tokio::fs::try_exists(self.config.boot_script_path())
            .await
            .unwrap_or(false)
    }

    /// Install or remove the boot script. The boot directory is owned
    /// by root, so both operations go through the privilege executor.
    /// Callers present a user confirmation before invoking this.
    pub async fn set_enabled(&self, enabled: bool) -> Result<(), CoreError> {
        let script_path = self.config.boot_script_path();
        let script_path = script_path.display();

        if enabled {
            // Stage the script where we can write, then move it into
            // the root-owned directory under privilege.
            let staging = std::env::temp_dir().join(&self.config.boot_script_name);
            tokio::fs::write(&staging, self.script_contents())
                .await
                .map_err(|e| CoreError::FatalInternal {
                    message: format!("cannot stage boot script: {e}"),
                })?;

            let cmd = format!(
                "cp {staging} {script_path} && chmod 0755 {script_path}",
                staging = staging.display(),
            );
            let out = self.executor.execute(&cmd).await;
            let _ = tokio::fs::remove_file(&staging).await;
            if !out.success() {
                return Err(CoreError::PrivilegeRequired {
                    needed: format!("root shell to install boot script: {}", out.output.trim()),
                });
            }
            info!(path = %script_path, "boot protection enabled");
        } else {
            let out = self.executor.execute(&format!("rm -f {script_path}")).await;
            if !out.success() {
                return Err(CoreError::PrivilegeRequired {
                    needed: format!("root shell to remove boot script: {}", out.output.trim()),
                });
            }
            info!(path = %script_path, "boot protection disabled");
        }
        Ok(())
    }

    /// Remove the boot-time chain: unlink, flush, delete, for both
    /// address families, each step tolerating "already absent". Called
    /// by the orchestrator on firewall start to hand off enforcement.
    pub async fn teardown_boot_rules(&self) -> Result<(), CoreError> {
        let chain = &self.config.boot_chain_name;
        for bin in ["iptables", "ip6tables"] {
            let cmd = format!(
                "{bin} -D OUTPUT -j {chain} 2>/dev/null || true; \
                 {bin} -F {chain} 2>/dev/null || true; \
                 {bin} -X {chain} 2>/dev/null || true"
            );
            let out = self.executor.execute(&cmd).await;
            if !out.success() {
                warn!(bin, output = %out.output.trim(), "boot-chain teardown step failed");
            }
        }
        debug!(chain = %chain, "boot rules torn down");
        Ok(())
    }

    /// The script text installed into the boot directory.
    pub fn script_contents(&self) -> String {
        let chain = &self.config.boot_chain_name;
        let uids = self
            .config
            .boot_allowed_uids
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(" ");

        let mut script = String::from("#!/system/bin/sh\n");
        script.push_str("# Blocks app traffic from early boot until the firewall takes over.\n");
        script.push_str("for IPT in iptables ip6tables; do\n");
        script.push_str(&format!("    $IPT -N {chain} 2>/dev/null\n"));
        script.push_str(&format!("    $IPT -F {chain}\n"));
        script.push_str(&format!("    $IPT -A {chain} -o lo -j ACCEPT\n"));
        script.push_str(&format!("    for U in {uids}; do\n"));
        script.push_str(&format!(
            "        $IPT -A {chain} -m owner --uid-owner $U -j ACCEPT\n"
        ));
        script.push_str("    done\n");
        script.push_str(&format!("    $IPT -A {chain} -j DROP\n"));
        script.push_str(&format!(
            "    $IPT -C OUTPUT -j {chain} 2>/dev/null || $IPT -I OUTPUT 1 -j {chain}\n"
        ));
        script.push_str("done\n");
        script
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::privilege::ShellExecutor;

    /// A config whose boot directory lives in a sandbox and whose
    /// executor is a plain local shell, so script install/remove runs
    /// for real without privileges.
    fn sandboxed() -> (Arc<CoreConfig>, BootProtection, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let config = Arc::new(CoreConfig {
            boot_script_dir: dir.path().join("post-fs-data.d"),
            ..CoreConfig::default()
        });
        std::fs::create_dir_all(&config.boot_script_dir).unwrap();
        let executor = Arc::new(ShellExecutor::new(
            vec!["sh".into(), "-c".into()],
            Duration::from_secs(5),
        ));
        let boot = BootProtection::new(Arc::clone(&config), executor);
        (config, boot, dir)
    }

    #[tokio::test]
    async fn supported_iff_directory_exists() {
        let (_config, boot, dir) = sandboxed();
        assert!(boot.is_supported().await);

        drop(dir);
        // Directory gone with the sandbox.
        assert!(!boot.is_supported().await);
    }

    #[tokio::test]
    async fn enable_then_disable_round_trip() {
        let (config, boot, _dir) = sandboxed();
        assert!(!boot.is_enabled().await);

        boot.set_enabled(true).await.unwrap();
        assert!(boot.is_enabled().await);

        let installed = std::fs::read_to_string(config.boot_script_path()).unwrap();
        assert!(installed.starts_with("#!"));
        assert!(installed.contains(&config.boot_chain_name));
        assert!(installed.contains("-j DROP"));

        boot.set_enabled(false).await.unwrap();
        assert!(!boot.is_enabled().await);
        assert!(!config.boot_script_path().exists());
    }

    #[tokio::test]
    async fn script_accepts_loopback_and_critical_uids() {
        let (config, boot, _dir) = sandboxed();
        let script = boot.script_contents();

        assert!(script.contains("-o lo -j ACCEPT"));
        for uid in &config.boot_allowed_uids {
            assert!(script.contains(&uid.to_string()));
        }
        // Both address families, linked at the head of OUTPUT.
        assert!(script.contains("iptables ip6tables"));
        assert!(script.contains("-I OUTPUT 1"));
    }

    #[tokio::test]
    async fn disable_when_absent_is_ok() {
        let (_config, boot, _dir) = sandboxed();
        boot.set_enabled(false).await.unwrap();
        assert!(!boot.is_enabled().await);
    }
}
