// ── Runtime core configuration ──
//
// Tunables and paths for the firewall core. Built by the embedding
// process (platform glue or the CLI) and handed in -- the core never
// reads config files.

use std::path::PathBuf;
use std::time::Duration;

/// Configuration for one firewall core instance.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Candidate locations of a `su`-style binary, probed in order.
    pub su_paths: Vec<PathBuf>,
    /// Shell argv prefix for privileged execution, e.g. `["su", "-c"]`.
    pub shell: Vec<String>,
    /// Hard ceiling for any single privileged command.
    pub command_timeout: Duration,
    /// Budget for the root probe (`id` under `su`).
    pub probe_timeout: Duration,

    /// Custom packet-filter chain owned by the running firewall.
    pub chain_name: String,
    /// Early-boot chain installed by the boot script.
    pub boot_chain_name: String,
    /// Directory the OS boot environment executes scripts from.
    pub boot_script_dir: PathBuf,
    /// Script file name inside `boot_script_dir`.
    pub boot_script_name: String,
    /// UIDs the boot script must keep open (root daemon, system server,
    /// wifi, media, gps, optional privilege-assist daemon).
    pub boot_allowed_uids: Vec<u32>,

    /// Where the synchronous status-preference file lives.
    pub prefs_path: PathBuf,

    /// Whether the OS exposes the high-level per-UID restriction API.
    pub connmgr_supported: bool,

    /// Debounce for transport-change coalescing.
    pub transport_debounce: Duration,
    /// Debounce for tunnel rebuilds.
    pub tunnel_debounce: Duration,
    /// Tunnel re-establish backoff ladder; the last entry repeats.
    pub tunnel_backoff: Vec<Duration>,
    /// Establish failures tolerated before a user-visible alert.
    pub tunnel_alert_threshold: u32,

    /// Health-check cadence while a privileged backend settles.
    pub health_interval_initial: Duration,
    /// Health-check cadence once stable.
    pub health_interval_stable: Duration,
    /// Consecutive passes before switching to the stable cadence.
    pub health_stable_threshold: u32,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            su_paths: vec![
                PathBuf::from("/system/bin/su"),
                PathBuf::from("/system/xbin/su"),
                PathBuf::from("/sbin/su"),
            ],
            shell: vec!["su".into(), "-c".into()],
            command_timeout: Duration::from_secs(5),
            probe_timeout: Duration::from_secs(3),

            chain_name: "palisade_output".into(),
            boot_chain_name: "palisade_boot".into(),
            boot_script_dir: PathBuf::from("/data/adb/post-fs-data.d"),
            boot_script_name: "palisade.sh".into(),
            // root daemon, system server, wifi, media, gps
            boot_allowed_uids: vec![0, 1000, 1010, 1013, 1021],

            prefs_path: PathBuf::from("/data/local/palisade/state.json"),

            connmgr_supported: true,

            transport_debounce: Duration::from_millis(100),
            tunnel_debounce: Duration::from_millis(300),
            tunnel_backoff: vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(5),
                Duration::from_secs(30),
            ],
            tunnel_alert_threshold: 2,

            health_interval_initial: Duration::from_secs(30),
            health_interval_stable: Duration::from_secs(300),
            health_stable_threshold: 10,
        }
    }
}

impl CoreConfig {
    /// Full path of the boot-protection script.
    pub fn boot_script_path(&self) -> PathBuf {
        self.boot_script_dir.join(&self.boot_script_name)
    }

    /// The backoff delay for the n-th consecutive failure (0-based);
    /// saturates at the last ladder entry.
    pub(crate) fn backoff_delay(&self, failures: u32) -> Duration {
        let idx = (failures as usize).min(self.tunnel_backoff.len().saturating_sub(1));
        self.tunnel_backoff
            .get(idx)
            .copied()
            .unwrap_or(Duration::from_secs(30))
    }
}
