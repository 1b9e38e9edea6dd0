//! Configuration loading via `ortho-config`.
//!
//! [`AgentConfig`] merges defaults, `blockdevice-agent.toml` and
//! `BLOCKDEVICE_AGENT_*` environment variables. Components never read it
//! from global state; the helpers below build the values their constructors
//! take.

use std::time::Duration;

use camino::Utf8Path;
use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;
use uuid::Uuid;

use crate::device::DEFAULT_DEVICE_ROOT;
use crate::inventory::{DEFAULT_SYSFS_BLOCK_ROOT, SysfsInventory};
use crate::naming::{NamingScheme, PrefixNaming};
use crate::poller::PollSettings;

const CONFIG_FILE_NAME: &str = "blockdevice-agent.toml";

/// Host and attach settings for the agent.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "BLOCKDEVICE_AGENT",
    discovery(
        app_name = "blockdevice-agent",
        env_var = "BLOCKDEVICE_AGENT_CONFIG_PATH",
        config_file_name = "blockdevice-agent.toml",
        dotfile_name = ".blockdevice-agent.toml",
        project_file_name = "blockdevice-agent.toml"
    )
)]
pub struct AgentConfig {
    /// UUID of the cluster whose volumes this agent manages. Only needed for
    /// ownership checks.
    pub cluster_id: Option<String>,
    /// Directory listing the host's block devices.
    #[ortho_config(default = DEFAULT_SYSFS_BLOCK_ROOT.to_owned())]
    pub sysfs_block_root: String,
    /// Directory holding device files.
    #[ortho_config(default = DEFAULT_DEVICE_ROOT.to_owned())]
    pub device_root: String,
    /// How requested slots are renamed by the hypervisor: `xen` or
    /// `identity`.
    #[ortho_config(default = "xen".to_owned())]
    pub naming: String,
    /// Pause between inventory scans while waiting for a device.
    #[ortho_config(default = 100)]
    pub poll_interval_ms: u64,
    /// How long to wait for an attached device to appear.
    #[ortho_config(default = 60)]
    pub device_timeout_secs: u64,
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
}

impl FieldMetadata {
    const fn new(description: &'static str, env_var: &'static str, toml_key: &'static str) -> Self {
        Self {
            description,
            env_var,
            toml_key,
        }
    }

    fn missing(&self) -> ConfigError {
        ConfigError::MissingField(format!(
            "missing {}: set {} or add {} to {CONFIG_FILE_NAME}",
            self.description, self.env_var, self.toml_key
        ))
    }

    fn invalid(&self, value: &str, expected: &str) -> ConfigError {
        ConfigError::InvalidValue(format!(
            "invalid {} '{value}': expected {expected}; check {} or {} in {CONFIG_FILE_NAME}",
            self.description, self.env_var, self.toml_key
        ))
    }
}

const CLUSTER_ID: FieldMetadata =
    FieldMetadata::new("cluster ID", "BLOCKDEVICE_AGENT_CLUSTER_ID", "cluster_id");
const SYSFS_BLOCK_ROOT: FieldMetadata = FieldMetadata::new(
    "sysfs block directory",
    "BLOCKDEVICE_AGENT_SYSFS_BLOCK_ROOT",
    "sysfs_block_root",
);
const DEVICE_ROOT: FieldMetadata = FieldMetadata::new(
    "device directory",
    "BLOCKDEVICE_AGENT_DEVICE_ROOT",
    "device_root",
);
const NAMING: FieldMetadata =
    FieldMetadata::new("naming scheme", "BLOCKDEVICE_AGENT_NAMING", "naming");
const POLL_INTERVAL: FieldMetadata = FieldMetadata::new(
    "poll interval",
    "BLOCKDEVICE_AGENT_POLL_INTERVAL_MS",
    "poll_interval_ms",
);

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            cluster_id: None,
            sysfs_block_root: DEFAULT_SYSFS_BLOCK_ROOT.to_owned(),
            device_root: DEFAULT_DEVICE_ROOT.to_owned(),
            naming: String::from("xen"),
            poll_interval_ms: 100,
            device_timeout_secs: 60,
        }
    }
}

impl AgentConfig {
    /// Loads configuration without attempting to parse CLI arguments. Values
    /// merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("blockdevice-agent")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Checks every field. Error messages name the environment variable and
    /// the TOML key that set it.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] for empty paths and
    /// [`ConfigError::InvalidValue`] for values that do not parse.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.cluster_id()?;
        require_absolute(&self.sysfs_block_root, &SYSFS_BLOCK_ROOT)?;
        require_absolute(&self.device_root, &DEVICE_ROOT)?;
        self.naming_scheme()?;
        if self.poll_interval_ms == 0 {
            return Err(POLL_INTERVAL.invalid("0", "a positive number of milliseconds"));
        }
        Ok(())
    }

    /// Returns the parsed cluster UUID, if one is configured.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] when the value is not a UUID.
    pub fn cluster_id(&self) -> Result<Option<Uuid>, ConfigError> {
        self.cluster_id
            .as_deref()
            .map(|raw| {
                Uuid::parse_str(raw.trim()).map_err(|_| CLUSTER_ID.invalid(raw, "a UUID"))
            })
            .transpose()
    }

    /// Returns the cluster UUID, failing when none is configured.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when unset, or
    /// [`ConfigError::InvalidValue`] when the value is not a UUID.
    pub fn require_cluster_id(&self) -> Result<Uuid, ConfigError> {
        self.cluster_id()?.ok_or_else(|| CLUSTER_ID.missing())
    }

    /// Returns the configured naming scheme.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] for unknown schemes.
    pub fn naming_scheme(&self) -> Result<NamingScheme, ConfigError> {
        self.naming
            .parse()
            .map_err(|_: String| NAMING.invalid(&self.naming, "'xen' or 'identity'"))
    }

    /// Builds the naming strategy rooted at the configured device directory.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] for unknown schemes.
    pub fn naming(&self) -> Result<PrefixNaming, ConfigError> {
        Ok(self.naming_scheme()?.naming(self.device_root.as_str()))
    }

    /// Builds the sysfs inventory for the configured block directory.
    #[must_use]
    pub fn inventory(&self) -> SysfsInventory {
        SysfsInventory::new(self.sysfs_block_root.as_str())
    }

    /// Builds poll settings from the configured interval and timeout.
    #[must_use]
    pub const fn poll_settings(&self) -> PollSettings {
        PollSettings::new(
            Duration::from_secs(self.device_timeout_secs),
            Duration::from_millis(self.poll_interval_ms),
        )
    }
}

fn require_absolute(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(metadata.missing());
    }
    if !Utf8Path::new(value).is_absolute() {
        return Err(metadata.invalid(value, "an absolute path"));
    }
    Ok(())
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Indicates a configuration value failed to parse.
    #[error("invalid configuration value: {0}")]
    InvalidValue(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}
