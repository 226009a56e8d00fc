//! Clap derive structures for the `velink` CLI.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// velink -- watch and control Venus data sources
#[derive(Debug, Parser)]
#[command(
    name = "velink",
    version,
    about = "Watch and control Venus data sources from the command line",
    long_about = "Mirrors a Venus installation's items into a local tree.\n\n\
        The source is the D-Bus system bus by default; pick another with\n\
        --dbus, --dbus-default, --mqtt or --mock (exactly one).",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub source: SourceOpts,

    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Source selection ─────────────────────────────────────────────────

/// Exactly one data source. Overrides `[source]` in the config file.
#[derive(Debug, Default, Args)]
#[group(id = "source", multiple = false)]
pub struct SourceOpts {
    /// D-Bus address: "system", "session" or a D-Bus address string
    #[arg(long, short = 'd', value_name = "ADDRESS")]
    pub dbus: Option<String>,

    /// D-Bus over TCP at tcp:host=localhost,port=3000
    #[arg(long)]
    pub dbus_default: bool,

    /// MQTT broker URL (mqtt://, tcp:// or ws://)
    #[arg(long, short = 'm', value_name = "URL")]
    pub mqtt: Option<String>,

    /// Built-in synthetic source, no network needed
    #[arg(long)]
    pub mock: bool,
}

impl SourceOpts {
    pub fn is_empty(&self) -> bool {
        self.dbus.is_none() && !self.dbus_default && self.mqtt.is_none() && !self.mock
    }
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Config file (default: platform config dir)
    #[arg(long, env = "VELINK_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(
        long,
        short = 'o',
        env = "VELINK_OUTPUT",
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

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Seconds to wait for the source to connect
    #[arg(long, env = "VELINK_TIMEOUT", default_value = "10", global = true)]
    pub timeout: u64,
}

// ── Output & Color Enums ─────────────────────────────────────────────

#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
    /// YAML
    Yaml,
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

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Print every change of the given items until Ctrl-C
    #[command(alias = "w")]
    Watch(WatchArgs),

    /// Print the tree once the initial population has settled
    #[command(alias = "ls")]
    Dump(DumpArgs),

    /// Show one item
    Get(GetArgs),

    /// Write a value to an item
    Set(SetArgs),

    /// Show the children of a pattern as a sorted table
    Table(TableArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Item paths, '/' or '.' separated
    #[arg(required = true)]
    pub paths: Vec<String>,

    /// Also report changes anywhere below each path
    #[arg(long, short = 's')]
    pub subtree: bool,

    /// Exit after this many lines
    #[arg(long, short = 'n')]
    pub count: Option<usize>,
}

#[derive(Debug, Args)]
pub struct DumpArgs {
    /// Only items under this path
    pub prefix: Option<String>,

    /// Seconds to wait after connecting before reading the tree
    #[arg(long, default_value = "2")]
    pub settle: u64,

    /// Include grouping nodes that carry no value
    #[arg(long, short = 'a')]
    pub all: bool,
}

#[derive(Debug, Args)]
pub struct GetArgs {
    pub path: String,

    /// Seconds to wait after connecting before reading the item
    #[arg(long, default_value = "2")]
    pub settle: u64,
}

#[derive(Debug, Args)]
pub struct SetArgs {
    pub path: String,

    /// New value; numbers and true/false are sent typed, anything else as text
    pub value: String,

    /// Seconds to wait after connecting before writing
    #[arg(long, default_value = "2")]
    pub settle: u64,
}

#[derive(Debug, Args)]
pub struct TableArgs {
    /// Row pattern, '*' matches one segment (e.g. "devices/*")
    pub pattern: String,

    /// Sort by this child of each row instead of the row name
    #[arg(long)]
    pub sort: Option<String>,

    /// Descending order
    #[arg(long)]
    pub desc: bool,

    /// Extra columns: children of each row to show
    #[arg(long, short = 'c', value_delimiter = ',')]
    pub columns: Vec<String>,

    /// Seconds to wait after connecting before reading the table
    #[arg(long, default_value = "2")]
    pub settle: u64,
}

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn command_tree_is_consistent() {
        Cli::command().debug_assert();
    }
}
