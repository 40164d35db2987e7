//! Clap derive structures for the `fieldsim` CLI.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// fieldsim -- simulated industrial field devices
#[derive(Debug, Parser)]
#[command(
    name = "fieldsim",
    version,
    about = "Run simulated industrial field devices",
    long_about = "Runs register-polling and TCP broadcast devices from a TOML profile,\n\
        streaming their data points to the log or as JSON lines on stdout.",
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
    /// Config file (defaults to the platform config directory)
    #[arg(long, short = 'c', env = "FIELDSIM_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

// ── Commands ─────────────────────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the collector and every enabled device
    Run(RunArgs),

    /// List configured devices
    #[command(alias = "dev", alias = "d")]
    Devices,

    /// Manage the configuration file
    Config(ConfigArgs),
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Write data points and status changes to stdout as JSON lines
    #[arg(long)]
    pub json: bool,

    /// Stop after this long instead of waiting for Ctrl-C (e.g. "30s")
    #[arg(long = "for", value_name = "DURATION", value_parser = humantime::parse_duration)]
    pub run_for: Option<std::time::Duration>,
}

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Write the starter two-device config
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Print the effective config as TOML
    Show,

    /// Print the config file path
    Path,
}
