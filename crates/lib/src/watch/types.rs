use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::consts::{DEFAULT_COALESCE_WINDOW_MS, DEFAULT_POLL_INTERVAL_MS};

/// What happened to a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchEventKind {
  Created,
  Modified,
  Deleted,
}

/// A coalesced change under one watched root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
  /// The watched root the path belongs to.
  pub root: PathBuf,
  pub path: PathBuf,
  pub kind: WatchEventKind,
  /// Emission order within one watch session, starting at 1.
  pub sequence: u64,
}

/// An uncoalesced notification from a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
  pub path: PathBuf,
  pub kind: WatchEventKind,
}

/// Native notification mechanism to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
  /// The platform's recommended watcher (inotify, ReadDirectoryChangesW, ...).
  Native,
  /// Periodic directory scans.
  Poll { interval: Duration },
}

impl Default for BackendKind {
  #[cfg(target_os = "macos")]
  fn default() -> Self {
    BackendKind::Poll {
      interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
    }
  }

  #[cfg(not(target_os = "macos"))]
  fn default() -> Self {
    BackendKind::Native
  }
}

impl BackendKind {
  pub fn poll() -> Self {
    BackendKind::Poll {
      interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchConfig {
  /// Notifications for the same path within this window collapse into one.
  pub coalesce_window: Duration,
  pub backend: BackendKind,
}

impl Default for WatchConfig {
  fn default() -> Self {
    Self {
      coalesce_window: Duration::from_millis(DEFAULT_COALESCE_WINDOW_MS),
      backend: BackendKind::default(),
    }
  }
}

#[derive(Debug, Error)]
pub enum WatchError {
  #[error("failed to create watcher: {0}")]
  Create(#[source] notify::Error),

  #[error("failed to watch {path}: {source}")]
  Register {
    path: PathBuf,
    #[source]
    source: notify::Error,
  },

  #[error("failed to stop watching {path}: {source}")]
  Unregister {
    path: PathBuf,
    #[source]
    source: notify::Error,
  },

  #[error("watched root {0} is not a directory")]
  NotADirectory(PathBuf),

  #[error("failed to resolve {path}: {source}")]
  Resolve {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("no roots to watch")]
  NoRoots,

  #[error("none of the {0} roots could be watched")]
  NoRootsWatched(usize),

  #[error("watcher is already running")]
  AlreadyWatching,

  #[error("watcher has been stopped")]
  Stopped,
}

/// A root that could not be watched. The session continues without it.
#[derive(Debug)]
pub struct WatchSetupFailure {
  pub root: PathBuf,
  pub error: WatchError,
}
