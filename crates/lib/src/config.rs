//! `config.toml` loading.
//!
//! ```toml
//! target = "C:/Games/tf2/tf"
//! roots = ["D:/custom/hud", "D:/custom/sounds"]
//! exclude = ["*.bak", ".git"]
//! backend = "poll"
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::archive::ZipOpener;
use crate::consts::{
  CONFIG_FILENAME, DEFAULT_COALESCE_WINDOW_MS, DEFAULT_MAX_ARCHIVE_ENTRIES, DEFAULT_POLL_INTERVAL_MS,
  DEFAULT_SHUTDOWN_TIMEOUT_SECS, DEFAULT_WORKERS,
};
use crate::copy::{Filter, accept_all};
use crate::overlay::OverlaySettings;
use crate::platform::paths::{config_dir, state_dir};
use crate::watch::{BackendKind, WatchConfig};

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("failed to read config file {path}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("invalid config file {path}")]
  Parse {
    path: PathBuf,
    #[source]
    source: toml::de::Error,
  },

  #[error("invalid exclude pattern '{pattern}'")]
  Glob {
    pattern: String,
    #[source]
    source: globset::Error,
  },

  #[error("no target directory configured")]
  MissingTarget,

  #[error("no resource folders configured")]
  NoRoots,

  #[error("invalid value for '{key}': {reason}")]
  Invalid { key: &'static str, reason: &'static str },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
  Native,
  Poll,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
  /// Application directory that receives the overlay.
  pub target: Option<PathBuf>,
  /// Resource folders, lowest priority first.
  pub roots: Vec<PathBuf>,
  pub recursive: bool,
  pub read_only: bool,
  /// Globs for directories to skip, matched against the full path or the name.
  pub exclude: Vec<String>,
  pub coalesce_window_ms: u64,
  pub workers: usize,
  pub max_archive_entries: usize,
  pub shutdown_timeout_secs: u64,
  /// Unset picks the platform default.
  pub backend: Option<Backend>,
  pub poll_interval_ms: u64,
  pub state_dir: Option<PathBuf>,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      target: None,
      roots: Vec::new(),
      recursive: true,
      read_only: true,
      exclude: Vec::new(),
      coalesce_window_ms: DEFAULT_COALESCE_WINDOW_MS,
      workers: DEFAULT_WORKERS,
      max_archive_entries: DEFAULT_MAX_ARCHIVE_ENTRIES,
      shutdown_timeout_secs: DEFAULT_SHUTDOWN_TIMEOUT_SECS,
      backend: None,
      poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
      state_dir: None,
    }
  }
}

impl Config {
  pub fn default_path() -> PathBuf {
    config_dir().join(CONFIG_FILENAME)
  }

  pub fn load(path: &Path) -> Result<Self, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
      path: path.to_path_buf(),
      source,
    })?;
    let config = Self::parse(&content).map_err(|source| ConfigError::Parse {
      path: path.to_path_buf(),
      source,
    })?;
    debug!(path = %path.display(), "loaded config");
    Ok(config)
  }

  /// Load from the default location, falling back to defaults if there is no file.
  pub fn load_default() -> Result<Self, ConfigError> {
    let path = Self::default_path();
    if path.exists() {
      Self::load(&path)
    } else {
      debug!(path = %path.display(), "no config file; using defaults");
      Ok(Self::default())
    }
  }

  pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
    toml::from_str(content)
  }

  pub fn state_dir(&self) -> PathBuf {
    self.state_dir.clone().unwrap_or_else(state_dir)
  }

  pub fn watch_config(&self) -> WatchConfig {
    let backend = match self.backend {
      Some(Backend::Native) => BackendKind::Native,
      Some(Backend::Poll) => BackendKind::Poll {
        interval: Duration::from_millis(self.poll_interval_ms),
      },
      None => BackendKind::default(),
    };
    WatchConfig {
      coalesce_window: Duration::from_millis(self.coalesce_window_ms),
      backend,
    }
  }

  /// Compile `exclude` into a directory filter. The filter returns false for
  /// excluded directories.
  pub fn filter(&self) -> Result<Filter, ConfigError> {
    if self.exclude.is_empty() {
      return Ok(accept_all());
    }
    let set = build_globset(&self.exclude)?;
    Ok(Arc::new(move |path: &Path| {
      let name_matches = path.file_name().is_some_and(|name| set.is_match(name));
      !(name_matches || set.is_match(path))
    }))
  }

  pub fn into_settings(self) -> Result<OverlaySettings, ConfigError> {
    if self.workers == 0 {
      return Err(ConfigError::Invalid {
        key: "workers",
        reason: "must be at least 1",
      });
    }
    if self.max_archive_entries == 0 {
      return Err(ConfigError::Invalid {
        key: "max_archive_entries",
        reason: "must be at least 1",
      });
    }
    if self.backend == Some(Backend::Poll) && self.poll_interval_ms == 0 {
      return Err(ConfigError::Invalid {
        key: "poll_interval_ms",
        reason: "must be at least 1",
      });
    }

    let filter = self.filter()?;
    let watch = self.watch_config();
    let state_dir = self.state_dir();
    let target = self.target.ok_or(ConfigError::MissingTarget)?;
    if self.roots.is_empty() {
      return Err(ConfigError::NoRoots);
    }

    let mut settings = OverlaySettings::new(target, self.roots, state_dir);
    settings.recursive = self.recursive;
    settings.read_only = self.read_only;
    settings.filter = filter;
    settings.archives = Arc::new(ZipOpener::new(self.max_archive_entries));
    settings.workers = self.workers;
    settings.watch = watch;
    settings.shutdown_timeout = Duration::from_secs(self.shutdown_timeout_secs);
    Ok(settings)
  }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet, ConfigError> {
  let mut builder = GlobSetBuilder::new();
  for pattern in patterns {
    let glob = Glob::new(pattern).map_err(|source| ConfigError::Glob {
      pattern: pattern.clone(),
      source,
    })?;
    builder.add(glob);
  }
  builder.build().map_err(|source| ConfigError::Glob {
    pattern: patterns.join(", "),
    source,
  })
}

#[cfg(test)]
mod tests {
  use serial_test::serial;
  use tempfile::TempDir;

  use super::*;

  #[test]
  fn empty_file_gives_defaults() {
    let config = Config::parse("").unwrap();
    assert_eq!(config, Config::default());
    assert!(config.recursive);
    assert!(config.read_only);
  }

  #[test]
  fn parses_every_key() {
    let config = Config::parse(
      r#"
        target = "/games/app"
        roots = ["/custom/a", "/custom/b"]
        recursive = false
        read_only = false
        exclude = ["*.bak"]
        coalesce_window_ms = 120
        workers = 4
        max_archive_entries = 50
        shutdown_timeout_secs = 5
        backend = "poll"
        poll_interval_ms = 500
        state_dir = "/var/respack"
      "#,
    )
    .unwrap();

    assert_eq!(config.target, Some(PathBuf::from("/games/app")));
    assert_eq!(config.roots.len(), 2);
    assert!(!config.recursive);
    assert_eq!(config.workers, 4);
    assert_eq!(config.backend, Some(Backend::Poll));
    assert_eq!(config.state_dir(), PathBuf::from("/var/respack"));

    let watch = config.watch_config();
    assert_eq!(watch.coalesce_window, Duration::from_millis(120));
    assert_eq!(
      watch.backend,
      BackendKind::Poll {
        interval: Duration::from_millis(500)
      }
    );
  }

  #[test]
  fn rejects_unknown_keys() {
    assert!(Config::parse("targte = \"/x\"").is_err());
  }

  #[test]
  fn exclude_matches_name_or_full_path() {
    let config = Config {
      exclude: vec![".git".into(), "**/backup/**".into()],
      ..Config::default()
    };
    let filter = config.filter().unwrap();

    assert!(!filter(Path::new("/custom/hud/.git")));
    assert!(!filter(Path::new("/custom/hud/backup/old")));
    assert!(filter(Path::new("/custom/hud/materials")));
  }

  #[test]
  fn bad_glob_is_reported() {
    let config = Config {
      exclude: vec!["a[".into()],
      ..Config::default()
    };
    assert!(matches!(config.filter(), Err(ConfigError::Glob { pattern, .. }) if pattern == "a["));
  }

  #[test]
  fn settings_need_target_and_roots() {
    assert!(matches!(Config::default().into_settings(), Err(ConfigError::MissingTarget)));

    let config = Config {
      target: Some("/games/app".into()),
      ..Config::default()
    };
    assert!(matches!(config.into_settings(), Err(ConfigError::NoRoots)));
  }

  #[test]
  fn zero_workers_is_invalid() {
    let config = Config {
      target: Some("/games/app".into()),
      roots: vec!["/custom".into()],
      workers: 0,
      ..Config::default()
    };
    assert!(matches!(
      config.into_settings(),
      Err(ConfigError::Invalid { key: "workers", .. })
    ));
  }

  #[test]
  fn settings_carry_values() {
    let config = Config {
      target: Some("/games/app".into()),
      roots: vec!["/custom".into()],
      read_only: false,
      workers: 3,
      state_dir: Some("/state".into()),
      ..Config::default()
    };

    let settings = config.into_settings().unwrap();

    assert_eq!(settings.target_root, PathBuf::from("/games/app"));
    assert_eq!(settings.state_dir, PathBuf::from("/state"));
    assert_eq!(settings.workers, 3);
    assert!(!settings.read_only);
    assert!(settings.live);
  }

  #[test]
  #[serial]
  fn load_default_reads_config_dir() {
    let temp = TempDir::new().unwrap();
    std::fs::write(temp.path().join(CONFIG_FILENAME), "workers = 7\n").unwrap();

    temp_env::with_var("RESPACK_CONFIG_DIR", Some(temp.path()), || {
      let config = Config::load_default().unwrap();
      assert_eq!(config.workers, 7);
    });
  }

  #[test]
  #[serial]
  fn load_default_without_file_uses_defaults() {
    let temp = TempDir::new().unwrap();

    temp_env::with_var("RESPACK_CONFIG_DIR", Some(temp.path()), || {
      assert_eq!(Config::load_default().unwrap(), Config::default());
    });
  }

  #[test]
  fn parse_error_names_the_file() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join(CONFIG_FILENAME);
    std::fs::write(&path, "workers = \"many\"").unwrap();

    let err = Config::load(&path).unwrap_err();

    assert!(matches!(err, ConfigError::Parse { path: p, .. } if p == path));
  }
}
