//! Behavioural smoke tests for the CLI entrypoint.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use camino::Utf8PathBuf;
use cap_std::{ambient_authority, fs_utf8::Dir};
use predicates::prelude::*;
use tempfile::TempDir;

struct Sandbox {
    root: Utf8PathBuf,
    _tmp: TempDir,
}

impl Sandbox {
    fn new() -> Self {
        let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
        let root = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf())
            .unwrap_or_else(|path| panic!("temp path should be utf8: {}", path.display()));
        Self { root, _tmp: tmp }
    }

    fn dir(&self) -> Dir {
        Dir::open_ambient_dir(&self.root, ambient_authority())
            .unwrap_or_else(|err| panic!("open {}: {err}", self.root))
    }

    fn add_device(&self, name: &str, sectors: u64) {
        let path = format!("block/{name}");
        let dir = self.dir();
        dir.create_dir_all(&path)
            .unwrap_or_else(|err| panic!("create {path}: {err}"));
        dir.write(format!("{path}/size"), format!("{sectors}\n"))
            .unwrap_or_else(|err| panic!("write {path}/size: {err}"));
    }

    fn write_config(&self, contents: &str) -> Utf8PathBuf {
        self.dir()
            .write("agent.toml", contents)
            .unwrap_or_else(|err| panic!("write config: {err}"));
        self.root.join("agent.toml")
    }

    fn command(&self) -> Command {
        let mut cmd = cargo_bin_cmd!("blockdevice-agent");
        cmd.current_dir(&self.root)
            .env_remove("RUST_LOG")
            .env_remove("BLOCKDEVICE_AGENT_NAMING")
            .env(
                "BLOCKDEVICE_AGENT_SYSFS_BLOCK_ROOT",
                self.root.join("block").as_str(),
            );
        cmd
    }
}

#[test]
fn cli_without_arguments_prints_usage() {
    let sandbox = Sandbox::new();
    sandbox
        .command()
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn expect_translates_requested_slot() {
    let sandbox = Sandbox::new();
    sandbox
        .command()
        .args(["expect", "/dev/sdj"])
        .assert()
        .success()
        .stdout("/dev/xvdj\n")
        .stderr("");
}

#[test]
fn expect_rejects_foreign_device_family() {
    let sandbox = Sandbox::new();
    sandbox
        .command()
        .args(["expect", "/dev/hda"])
        .assert()
        .failure()
        .stdout("")
        .stderr(predicate::str::contains("invalid device name /dev/hda"));
}

#[test]
fn naming_can_be_set_through_environment() {
    let sandbox = Sandbox::new();
    sandbox
        .command()
        .env("BLOCKDEVICE_AGENT_NAMING", "identity")
        .args(["expect", "/dev/sdj"])
        .assert()
        .success()
        .stdout("/dev/sdj\n");
}

#[test]
fn naming_can_be_set_through_config_file() {
    let sandbox = Sandbox::new();
    let config = sandbox.write_config("naming = \"identity\"\n");
    sandbox
        .command()
        .env("BLOCKDEVICE_AGENT_CONFIG_PATH", config.as_str())
        .args(["expect", "/dev/sdf"])
        .assert()
        .success()
        .stdout("/dev/sdf\n");
}

#[test]
fn invalid_configuration_is_reported() {
    let sandbox = Sandbox::new();
    sandbox
        .command()
        .env("BLOCKDEVICE_AGENT_NAMING", "nvme")
        .args(["expect", "/dev/sdj"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("BLOCKDEVICE_AGENT_NAMING"));
}

#[test]
fn list_and_next_slot_read_sysfs() {
    let sandbox = Sandbox::new();
    sandbox.add_device("xvda", 16);
    sandbox.add_device("xvdb", 2);

    sandbox
        .command()
        .arg("list")
        .assert()
        .success()
        .stdout("xvda\t8192\nxvdb\t1024\n");
    sandbox
        .command()
        .arg("next-slot")
        .assert()
        .success()
        .stdout("/dev/sdc /dev/xvdc\n");
}
