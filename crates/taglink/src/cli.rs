//! Clap derive structures for the `taglink` CLI.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// taglink -- keep an eye on industrial controller endpoints
#[derive(Debug, Parser)]
#[command(
    name = "taglink",
    version,
    about = "Check endpoint configurations and watch controller tags",
    long_about = "Loads an endpoint configuration (TOML + TAGLINK_ environment),\n\
        validates its tag table, and runs the connection and scan-cycle engine\n\
        against a controller, printing status and tag changes as JSON lines.",
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
    /// Output format
    #[arg(
        long,
        short = 'o',
        env = "TAGLINK_OUTPUT",
        default_value = "text",
        global = true
    )]
    pub output: OutputFormat,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text (default)
    Text,
    /// JSON
    Json,
}

// ── Commands ─────────────────────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Load and validate a configuration, then report its tag table
    Check(CheckArgs),

    /// Run an endpoint and print status and tag changes until Ctrl-C
    Watch(WatchArgs),
}

#[derive(Debug, Args)]
pub struct CheckArgs {
    /// Configuration file (defaults to the platform config path)
    pub config: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Configuration file (defaults to the platform config path)
    pub config: Option<PathBuf>,

    /// Run against an in-memory controller seeded from the tag table
    #[arg(long)]
    pub simulate: bool,

    /// Stop after this long (e.g. "30s", "5m") instead of waiting for Ctrl-C
    #[arg(long, value_parser = humantime::parse_duration)]
    pub duration: Option<Duration>,

    /// Also print one aggregate event per cycle in which anything changed
    #[arg(long)]
    pub aggregate: bool,
}
