//! Common test utilities for netsage integration tests
#![allow(dead_code)]

use assert_cmd::Command;
use std::path::PathBuf;
use tempfile::{tempdir, TempDir};

/// Isolated HOME with its own config file location
pub struct TestEnv {
    pub temp_dir: TempDir,
    pub config_path: PathBuf,
}

impl TestEnv {
    pub fn new() -> anyhow::Result<Self> {
        let temp_dir = tempdir()?;
        let config_path = temp_dir.path().join("netsage.json");
        Ok(Self {
            temp_dir,
            config_path,
        })
    }

    /// Command with HOME pointed at the temp dir and NETSAGE_* cleared
    pub fn command(&self) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_netsage"));
        cmd.env("HOME", self.temp_dir.path());
        for var in [
            "NETSAGE_REASONING_API_KEY",
            "NETSAGE_TELEMETRY_API_KEY",
            "NETSAGE_TELEMETRY_NL_URL",
            "NETSAGE_TELEMETRY_RAW_URL",
            "NETSAGE_INVENTORY_URL",
            "NETSAGE_INVENTORY_TOKEN",
            "NETSAGE_TICKETING_URL",
            "NETSAGE_TICKETING_USER",
            "NETSAGE_TICKETING_PASSWORD",
            "NETSAGE_CVE_USER",
            "NETSAGE_CVE_PASSWORD",
            "RUST_LOG",
        ] {
            cmd.env_remove(var);
        }
        cmd
    }

    /// Command that reads the temp config file
    pub fn with_config(&self) -> Command {
        let mut cmd = self.command();
        cmd.arg("--config").arg(&self.config_path);
        cmd
    }

    pub fn write_config(&self, json: &serde_json::Value) -> anyhow::Result<()> {
        std::fs::write(&self.config_path, serde_json::to_string_pretty(json)?)?;
        Ok(())
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new().expect("Failed to create test environment")
    }
}
