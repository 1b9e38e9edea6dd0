//! Command-line interface definitions for the `blockdevice-agent` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::Parser;

/// Top-level CLI for the `blockdevice-agent` binary.
#[derive(Debug, Parser)]
#[command(
    name = "blockdevice-agent",
    about = "Inspect block device slots and kernel names on this host",
    arg_required_else_help = true
)]
pub(crate) enum Cli {
    /// List the host's block devices with their sizes.
    #[command(name = "list", about = "List block devices and their sizes in bytes")]
    List(ListCommand),
    /// Show the slot the next attach would request.
    #[command(
        name = "next-slot",
        about = "Show the next free device slot and the name it will surface as"
    )]
    NextSlot,
    /// Translate a requested slot into its kernel device name.
    #[command(name = "expect", about = "Print the kernel device name for a requested slot")]
    Expect(ExpectCommand),
}

/// Arguments for the `blockdevice-agent list` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct ListCommand {
    /// Emit a JSON array instead of one device per line.
    #[arg(long)]
    pub(crate) json: bool,
}

/// Arguments for the `blockdevice-agent expect` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct ExpectCommand {
    /// Requested device slot, for example `/dev/sdf`.
    #[arg(value_name = "PATH")]
    pub(crate) device: String,
}
