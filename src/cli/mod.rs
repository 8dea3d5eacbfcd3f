//! Command-line interface definitions for the `hetzner-machine` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};

/// Top-level CLI for the `hetzner-machine` binary.
#[derive(Debug, Parser)]
#[command(
    name = "hetzner-machine",
    about = "Create and control a Hetzner Cloud machine",
    arg_required_else_help = true
)]
pub(crate) struct Cli {
    /// Directory holding per-machine keys and state.
    ///
    /// Defaults to `$HOME/.hetzner-machine`.
    #[arg(
        long,
        global = true,
        value_name = "PATH",
        env = "HETZNER_MACHINE_STORE"
    )]
    pub(crate) store_path: Option<Utf8PathBuf>,
    /// Operation to perform.
    #[command(subcommand)]
    pub(crate) command: Command,
}

/// Operations supported by the driver.
#[derive(Debug, Subcommand)]
pub(crate) enum Command {
    /// Register an SSH key, create the server, and wait until it runs.
    Create(CreateCommand),
    /// Power the server on.
    Start(MachineArgs),
    /// Power the server off.
    Stop(MachineArgs),
    /// Reboot the server.
    Restart(MachineArgs),
    /// Shut the server down.
    Kill(MachineArgs),
    /// Delete the server without waiting for the deletion to finish.
    Remove(MachineArgs),
    /// Print the machine state.
    State(MachineArgs),
    /// Print the public IP address.
    Ip(MachineArgs),
    /// Print the container engine URL.
    Url(MachineArgs),
}

impl Command {
    /// Machine targeted by the command.
    pub(crate) fn machine_name(&self) -> &str {
        match self {
            Self::Create(args) => &args.machine.name,
            Self::Start(args)
            | Self::Stop(args)
            | Self::Restart(args)
            | Self::Kill(args)
            | Self::Remove(args)
            | Self::State(args)
            | Self::Ip(args)
            | Self::Url(args) => &args.name,
        }
    }
}

/// Machine selection shared by every subcommand.
#[derive(Debug, Args)]
pub(crate) struct MachineArgs {
    /// Orchestrator-assigned machine name.
    #[arg(value_name = "NAME")]
    pub(crate) name: String,
}

/// Arguments for the `create` subcommand.
#[derive(Debug, Args)]
pub(crate) struct CreateCommand {
    /// Machine to create.
    #[command(flatten)]
    pub(crate) machine: MachineArgs,
    /// Override the image name for this machine (for example `debian-12`).
    #[arg(long, value_name = "IMAGE")]
    pub(crate) image: Option<String>,
    /// Override the location for this machine (for example `nbg1`).
    #[arg(long, value_name = "LOCATION")]
    pub(crate) location: Option<String>,
    /// Override the server type for this machine (for example `cx22`).
    #[arg(long, value_name = "TYPE")]
    pub(crate) server_type: Option<String>,
}
