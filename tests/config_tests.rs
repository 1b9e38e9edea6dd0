//! Unit tests for agent configuration validation.

use std::time::Duration;

use blockdevice_agent::{AgentConfig, ConfigError, NamingScheme, PrefixNaming};
use rstest::*;
use uuid::Uuid;

#[fixture]
fn valid_config() -> AgentConfig {
    AgentConfig {
        cluster_id: Some(String::from("7c9e6679-7425-40de-944b-e07fc1f90ae7")),
        sysfs_block_root: String::from("/sys/block"),
        device_root: String::from("/dev"),
        naming: String::from("xen"),
        poll_interval_ms: 250,
        device_timeout_secs: 30,
    }
}

#[rstest]
fn valid_config_passes_validation(valid_config: AgentConfig) {
    assert_eq!(valid_config.validate(), Ok(()));
    assert_eq!(
        valid_config.require_cluster_id(),
        Ok(Uuid::from_u128(0x7c9e_6679_7425_40de_944b_e07f_c1f9_0ae7))
    );
}

/// Verifies that validation produces actionable errors mentioning both the
/// environment variable and configuration file for each field.
#[rstest]
#[case::cluster_id(
    |cfg: &mut AgentConfig| cfg.cluster_id = Some(String::from("not-a-uuid")),
    "BLOCKDEVICE_AGENT_CLUSTER_ID",
    "cluster_id"
)]
#[case::sysfs_empty(
    |cfg: &mut AgentConfig| cfg.sysfs_block_root = String::from("  "),
    "BLOCKDEVICE_AGENT_SYSFS_BLOCK_ROOT",
    "sysfs_block_root"
)]
#[case::device_root_relative(
    |cfg: &mut AgentConfig| cfg.device_root = String::from("dev"),
    "BLOCKDEVICE_AGENT_DEVICE_ROOT",
    "device_root"
)]
#[case::naming(
    |cfg: &mut AgentConfig| cfg.naming = String::from("nvme"),
    "BLOCKDEVICE_AGENT_NAMING",
    "naming"
)]
#[case::poll_interval(
    |cfg: &mut AgentConfig| cfg.poll_interval_ms = 0,
    "BLOCKDEVICE_AGENT_POLL_INTERVAL_MS",
    "poll_interval_ms"
)]
fn validation_produces_actionable_errors(
    valid_config: AgentConfig,
    #[case] mutate: fn(&mut AgentConfig),
    #[case] env_var: &str,
    #[case] toml_key: &str,
) {
    let mut cfg = valid_config;
    mutate(&mut cfg);
    let message = cfg.validate().expect_err("validation should fail").to_string();
    assert!(
        message.contains(env_var),
        "error should mention env var {env_var}: {message}"
    );
    assert!(
        message.contains("blockdevice-agent.toml"),
        "error should mention config file: {message}"
    );
    assert!(
        message.contains(toml_key),
        "error should mention TOML key {toml_key}: {message}"
    );
}

#[rstest]
fn empty_device_root_is_missing_field(valid_config: AgentConfig) {
    let cfg = AgentConfig {
        device_root: String::new(),
        ..valid_config
    };
    assert!(matches!(cfg.validate(), Err(ConfigError::MissingField(_))));
}

#[rstest]
fn helpers_follow_configured_values(valid_config: AgentConfig) {
    let cfg = AgentConfig {
        naming: String::from("identity"),
        device_root: String::from("/host/dev"),
        ..valid_config
    };
    assert_eq!(cfg.naming_scheme(), Ok(NamingScheme::Identity));
    assert_eq!(cfg.naming(), Ok(PrefixNaming::identity("/host/dev")));
    assert_eq!(cfg.inventory().block_root().as_str(), "/sys/block");
    let settings = cfg.poll_settings();
    assert_eq!(settings.time_limit, Duration::from_secs(30));
    assert_eq!(settings.poll_interval, Duration::from_millis(250));
}
