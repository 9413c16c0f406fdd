//! Platform directories for respack's own files.
//!
//! Both directories can be redirected through environment variables, which is
//! how tests and portable installs isolate their state:
//! - `RESPACK_CONFIG_DIR` replaces [`config_dir`]
//! - `RESPACK_STATE_DIR` replaces [`state_dir`]

use std::path::PathBuf;

use crate::consts::APP_NAME;

const CONFIG_DIR_ENV: &str = "RESPACK_CONFIG_DIR";
const STATE_DIR_ENV: &str = "RESPACK_STATE_DIR";

fn env_dir(var: &str) -> Option<PathBuf> {
  std::env::var_os(var).filter(|v| !v.is_empty()).map(PathBuf::from)
}

/// Returns the user's home directory
#[cfg(windows)]
pub fn home_dir() -> PathBuf {
  env_dir("USERPROFILE").unwrap_or_else(|| PathBuf::from("."))
}

/// Returns the user's home directory
#[cfg(not(windows))]
pub fn home_dir() -> PathBuf {
  env_dir("HOME").unwrap_or_else(|| PathBuf::from("."))
}

/// Returns the directory holding `config.toml`
#[cfg(windows)]
pub fn config_dir() -> PathBuf {
  env_dir(CONFIG_DIR_ENV)
    .or_else(|| env_dir("APPDATA").map(|p| p.join(APP_NAME)))
    .unwrap_or_else(|| home_dir().join(APP_NAME))
}

/// Returns the directory holding `config.toml`
#[cfg(not(windows))]
pub fn config_dir() -> PathBuf {
  env_dir(CONFIG_DIR_ENV).unwrap_or_else(|| {
    env_dir("XDG_CONFIG_HOME")
      .unwrap_or_else(|| home_dir().join(".config"))
      .join(APP_NAME)
  })
}

/// Returns the directory holding the backup manifest and preserved originals
#[cfg(windows)]
pub fn state_dir() -> PathBuf {
  env_dir(STATE_DIR_ENV)
    .or_else(|| env_dir("LOCALAPPDATA").map(|p| p.join(APP_NAME)))
    .unwrap_or_else(|| home_dir().join(APP_NAME).join("state"))
}

/// Returns the directory holding the backup manifest and preserved originals
#[cfg(not(windows))]
pub fn state_dir() -> PathBuf {
  env_dir(STATE_DIR_ENV).unwrap_or_else(|| {
    env_dir("XDG_STATE_HOME")
      .unwrap_or_else(|| home_dir().join(".local").join("state"))
      .join(APP_NAME)
  })
}
