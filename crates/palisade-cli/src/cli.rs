// ── Command-line definition ──

use std::path::PathBuf;
use std::str::FromStr;

use clap::{ArgAction, Args, Parser, Subcommand};

use palisade_core::{DefaultPolicy, FirewallMode, NetworkType, ScreenState};

#[derive(Parser)]
#[command(
    name = "palisade",
    version,
    about = "Per-application firewall control",
    long_about = "Runs and inspects the palisade firewall core from a device shell. \
                  Rules and the installed-app catalog are read from JSON files; \
                  enforcement uses the configured privileged shell."
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Args)]
pub struct GlobalOpts {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Emit machine-readable JSON where supported.
    #[arg(long, global = true)]
    pub json: bool,

    /// Privileged shell argv, comma-separated.
    #[arg(long, global = true, value_delimiter = ',', default_value = "su,-c")]
    pub shell: Vec<String>,

    /// JSON file with the persisted firewall rules.
    #[arg(long, global = true)]
    pub rules: Option<PathBuf>,

    /// JSON file with the installed-app catalog.
    #[arg(long, global = true)]
    pub apps: Option<PathBuf>,

    /// Status-preference file shared with external readers.
    #[arg(long, global = true, default_value = "/data/local/palisade/state.json")]
    pub state_file: PathBuf,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the firewall in the foreground until interrupted.
    Start(StartArgs),
    /// Print the current status flags.
    Status,
    /// Show which backend a start would pick right now.
    Plan(PlanArgs),
    /// Manage the early-boot protection script.
    Boot(BootArgs),
}

#[derive(Args)]
pub struct StartArgs {
    /// Enforcement mode.
    #[arg(long, default_value = "auto", value_parser = parse_enum::<FirewallMode>)]
    pub mode: FirewallMode,

    /// Active transport to assume (no live monitor in the CLI).
    #[arg(long, default_value = "wifi", value_parser = parse_enum::<NetworkType>)]
    pub transport: NetworkType,

    /// Screen state to assume.
    #[arg(long, default_value = "on", value_parser = parse_enum::<ScreenState>)]
    pub screen: ScreenState,

    /// Policy for apps without an enabled rule.
    #[arg(long, default_value = "allow-all", value_parser = parse_enum::<DefaultPolicy>)]
    pub policy: DefaultPolicy,
}

#[derive(Args)]
pub struct PlanArgs {
    #[arg(long, default_value = "auto", value_parser = parse_enum::<FirewallMode>)]
    pub mode: FirewallMode,
}

#[derive(Args)]
pub struct BootArgs {
    #[command(subcommand)]
    pub action: BootAction,
}

#[derive(Subcommand)]
pub enum BootAction {
    /// Install the boot script (asks for confirmation).
    Enable {
        /// Skip the confirmation prompt.
        #[arg(long)]
        yes: bool,
    },
    /// Remove the boot script (asks for confirmation).
    Disable {
        /// Skip the confirmation prompt.
        #[arg(long)]
        yes: bool,
    },
    /// Report whether boot protection is supported and enabled.
    Status,
}

fn parse_enum<T: FromStr + Clone + Send + Sync + 'static>(s: &str) -> Result<T, String> {
    T::from_str(s).map_err(|_| format!("unrecognized value: {s}"))
}
