//! Binary entry point for the `blockdevice-agent` CLI.

use std::io::{self, Write};
use std::process;

use clap::Parser;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use blockdevice_agent::{
    AgentConfig, ConfigError, DeviceInventory, DeviceNaming, DevicePath, InvalidDeviceName,
    InventoryError, NoAvailableDevice, select_free_device_with,
};

mod cli;

use cli::{Cli, ExpectCommand, ListCommand};

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("inventory error: {0}")]
    Inventory(#[from] InventoryError),
    #[error(transparent)]
    NoAvailableDevice(#[from] NoAvailableDevice),
    #[error(transparent)]
    InvalidDeviceName(#[from] InvalidDeviceName),
    #[error("failed to encode output: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("failed to write output: {0}")]
    Output(#[from] io::Error),
}

#[derive(Debug, Serialize)]
struct DeviceEntry {
    name: String,
    size: u64,
}

fn main() {
    init_logging();
    let cli = Cli::parse();
    let exit_code = match load_config().and_then(|config| dispatch(&cli, &config, io::stdout())) {
        Ok(()) => 0,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .compact()
        .init();
}

fn load_config() -> Result<AgentConfig, CliError> {
    let config = AgentConfig::load_without_cli_args()?;
    config.validate()?;
    Ok(config)
}

fn dispatch(cli: &Cli, config: &AgentConfig, out: impl Write) -> Result<(), CliError> {
    match cli {
        Cli::List(command) => list_devices(command, config, out),
        Cli::NextSlot => next_slot(config, out),
        Cli::Expect(command) => expect_device(command, config, out),
    }
}

fn list_devices(command: &ListCommand, config: &AgentConfig, mut out: impl Write) -> Result<(), CliError> {
    let inventory = config.inventory();
    let mut entries = Vec::new();
    for name in inventory.list_allocated_devices()? {
        match inventory.device_size(&name) {
            Ok(size) => entries.push(DeviceEntry { name, size }),
            Err(InventoryError::DeviceNotFound { .. }) => {
                debug!(device = %name, "device vanished while listing");
            }
            Err(err) => return Err(err.into()),
        }
    }

    if command.json {
        serde_json::to_writer_pretty(&mut out, &entries)?;
        writeln!(out)?;
    } else {
        for entry in &entries {
            writeln!(out, "{}\t{}", entry.name, entry.size)?;
        }
    }
    Ok(())
}

fn next_slot(config: &AgentConfig, mut out: impl Write) -> Result<(), CliError> {
    let naming = config.naming()?;
    let allocated = config.inventory().list_allocated_devices()?;
    let requested = select_free_device_with(&naming, &allocated)?;
    let expected = naming.expected_device(&requested)?;
    writeln!(out, "{requested} {expected}")?;
    Ok(())
}

fn expect_device(command: &ExpectCommand, config: &AgentConfig, mut out: impl Write) -> Result<(), CliError> {
    let naming = config.naming()?;
    let requested = DevicePath::from(command.device.as_str());
    let expected = naming.expected_device(&requested)?;
    writeln!(out, "{expected}")?;
    Ok(())
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}

#[cfg(test)]
#[path = "main_tests.rs"]
mod tests;
