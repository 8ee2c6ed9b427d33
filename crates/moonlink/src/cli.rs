//! Clap derive structures for the `moonlink` CLI.
//!
//! Defines the command tree, global flags and shared value enums. Only
//! depends on clap so the build script can include it for man pages.

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// moonlink -- live Moonraker telemetry from the command line
#[derive(Debug, Parser)]
#[command(
    name = "moonlink",
    version,
    about = "Mirror a Moonraker printer into a live state tree",
    long_about = "Connects to a Moonraker instance over its websocket (or by REST polling),\n\
        keeps printer, server and Klipper object state mirrored as dotted paths,\n\
        and forwards control writes to the matching Moonraker endpoints.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Printer profile to use
    #[arg(long, short = 'p', env = "MOONLINK_PROFILE", global = true)]
    pub profile: Option<String>,

    /// Moonraker host (overrides profile)
    #[arg(long, short = 'H', env = "MOONLINK_HOST", global = true)]
    pub host: Option<String>,

    /// Moonraker port (overrides profile)
    #[arg(long, env = "MOONLINK_PORT", global = true)]
    pub port: Option<u16>,

    /// Connect with https / wss
    #[arg(long, env = "MOONLINK_TLS", global = true)]
    pub tls: bool,

    /// Live-link transport (overrides profile)
    #[arg(long, short = 't', env = "MOONLINK_TRANSPORT", global = true)]
    pub transport: Option<TransportArg>,

    /// Polling interval in seconds (overrides profile)
    #[arg(long, env = "MOONLINK_POLL_INTERVAL", global = true)]
    pub poll_interval: Option<u64>,

    /// Output format
    #[arg(
        long,
        short = 'o',
        env = "MOONLINK_OUTPUT",
        default_value = "table",
        global = true
    )]
    pub output: OutputFormat,

    /// When to use color output
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorMode,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Log line format on stderr
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Request timeout in seconds; also bounds `snapshot`
    #[arg(long, env = "MOONLINK_TIMEOUT", global = true)]
    pub timeout: Option<u64>,
}

// ── Value Enums ──────────────────────────────────────────────────────

#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
    /// Plain text, one value per line (scripting)
    Plain,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum ColorMode {
    /// Auto-detect (color if terminal is interactive)
    Auto,
    /// Always emit color codes
    Always,
    /// Never emit color codes
    Never,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines
    Text,
    /// One JSON object per line
    Json,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum TransportArg {
    /// JSON-RPC over the Moonraker websocket
    #[value(alias = "ws")]
    Websocket,
    /// Periodic REST polling
    #[value(alias = "poll")]
    Http,
}

impl TransportArg {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Websocket => "websocket",
            Self::Http => "http",
        }
    }
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the bridge and stream state changes until interrupted
    Run(RunArgs),

    /// Connect, wait for the first full sync and print the state tree
    #[command(alias = "snap")]
    Snapshot(SnapshotArgs),

    /// Send one control command to the printer
    Send(SendArgs),

    /// List the available control commands
    Controls,

    /// Manage configuration and profiles
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ── Command Arguments ────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Only print changes below this path prefix (e.g. "extruder")
    #[arg(long, short = 'f')]
    pub filter: Option<String>,

    /// Read `path=value` writes from stdin and apply them to the tree
    #[arg(long, short = 'i')]
    pub stdin: bool,
}

#[derive(Debug, Args)]
pub struct SnapshotArgs {
    /// Only print states below this path prefix
    #[arg(long, short = 'f')]
    pub filter: Option<String>,
}

#[derive(Debug, Args)]
pub struct SendArgs {
    /// Control id, e.g. printPause or runGcode (see `moonlink controls`)
    pub command: String,

    /// G-code script for runGcode
    pub value: Option<String>,
}

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Create a config file with guided setup
    Init,

    /// Show the current configuration (secrets masked)
    Show,

    /// Print the config file location
    Path,

    /// Set a key on the active profile
    Set {
        /// Profile key, e.g. host, port, auth, username, transport
        key: String,

        /// Value to set
        value: String,
    },

    /// List configured profiles
    Profiles,

    /// Make a profile the default
    Use {
        /// Profile name
        name: String,
    },

    /// Store a profile's password in the system keyring
    SetPassword {
        /// Profile name (defaults to the active one)
        name: Option<String>,
    },
}

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
