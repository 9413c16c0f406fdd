//! Shared test helpers for CLI integration tests.

use std::path::{Path, PathBuf};

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use tempfile::TempDir;

/// Isolated test environment.
///
/// Each test gets its own config, state, target and resource directories
/// inside one temporary directory.
pub struct TestEnv {
  pub temp: TempDir,
}

impl TestEnv {
  pub fn new() -> Self {
    let env = Self {
      temp: TempDir::new().unwrap(),
    };
    for dir in ["config", "state", "target", "custom"] {
      std::fs::create_dir_all(env.temp.path().join(dir)).unwrap();
    }
    env
  }

  fn dir(&self, name: &str) -> PathBuf {
    let p = self.temp.path().join(name);
    dunce::canonicalize(&p).unwrap_or(p)
  }

  pub fn config_dir(&self) -> PathBuf {
    self.dir("config")
  }

  pub fn state_dir(&self) -> PathBuf {
    self.dir("state")
  }

  pub fn target(&self) -> PathBuf {
    self.dir("target")
  }

  pub fn custom(&self) -> PathBuf {
    self.dir("custom")
  }

  /// Write `config.toml` pointing at this environment's target and resource
  /// folder, followed by `extra` lines.
  pub fn write_config(&self, extra: &str) {
    let content = format!(
      "target = '{}'\nroots = ['{}']\nread_only = false\n{}",
      self.target().display(),
      self.custom().display(),
      extra
    );
    std::fs::write(self.config_dir().join("config.toml"), content).unwrap();
  }

  pub fn write(&self, root: &Path, relative_path: &str, content: &str) {
    let path = root.join(relative_path);
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, content).unwrap();
  }

  pub fn read(&self, root: &Path, relative_path: &str) -> String {
    std::fs::read_to_string(root.join(relative_path)).unwrap()
  }

  pub fn manifest_path(&self) -> PathBuf {
    self.state_dir().join("manifest.json")
  }

  /// Get a pre-configured Command for the respack binary.
  ///
  /// Sets environment variables for isolated testing:
  /// - `RESPACK_CONFIG_DIR`: where `config.toml` is looked up
  /// - `RESPACK_STATE_DIR`: manifest, preserved originals and lock
  pub fn respack_cmd(&self) -> Command {
    let mut cmd: Command = cargo_bin_cmd!("respack");
    cmd.env("RESPACK_CONFIG_DIR", self.config_dir());
    cmd.env("RESPACK_STATE_DIR", self.state_dir());
    cmd.env_remove("RUST_LOG");
    cmd
  }

  /// `respack apply --no-watch`, expected to succeed.
  pub fn apply_static(&self) {
    self.respack_cmd().args(["apply", "--no-watch"]).assert().success();
  }
}
