use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::archive::{ArchiveError, ArchiveOpener, ZipOpener};
use crate::consts::{DEFAULT_MAX_ARCHIVE_ENTRIES, DEFAULT_SHUTDOWN_TIMEOUT_SECS, DEFAULT_WORKERS};
use crate::copy::{CopiedEntry, CopyError, Filter, accept_all};
use crate::key::RelativeKey;
use crate::manifest::{BackupError, ManifestError};
use crate::registry::RegistryError;
use crate::watch::{WatchConfig, WatchError};

/// Controller lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlayState {
  /// Nothing loaded yet.
  Idle,
  /// Reverting recorded keys; stays here while any remain.
  Restoring,
  /// The target holds no overlay.
  Clean,
  /// Initial overlay copy in progress.
  Overlaying,
  /// Overlay applied; live changes are followed when enabled.
  Active,
}

impl fmt::Display for OverlayState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      OverlayState::Idle => "idle",
      OverlayState::Restoring => "restoring",
      OverlayState::Clean => "clean",
      OverlayState::Overlaying => "overlaying",
      OverlayState::Active => "active",
    };
    f.write_str(name)
  }
}

#[derive(Debug, Error)]
pub enum OverlayError {
  #[error(transparent)]
  Copy(#[from] CopyError),

  #[error(transparent)]
  Backup(#[from] BackupError),

  #[error(transparent)]
  Archive(#[from] ArchiveError),

  #[error(transparent)]
  Registry(#[from] RegistryError),

  #[error(transparent)]
  Watch(#[from] WatchError),

  #[error("failed to load manifest: {0}")]
  ManifestLoad(#[source] ManifestError),

  /// The manifest no longer matches the target; the step must not continue.
  #[error("failed to persist manifest after {key}: {source}")]
  ManifestPersist {
    key: RelativeKey,
    #[source]
    source: ManifestError,
  },

  #[error("failed to clear manifest: {0}")]
  ManifestClear(#[source] ManifestError),

  #[error("backup records belong to {recorded}, not {configured}; restore or discard them first")]
  TargetMismatch { recorded: PathBuf, configured: PathBuf },

  #[error("target directory {path} is not usable: {reason}")]
  InvalidTarget { path: PathBuf, reason: String },

  #[error("cannot {operation} while {state}")]
  InvalidState { operation: &'static str, state: OverlayState },

  #[error("restore did not finish within {0:?}")]
  ShutdownTimeout(Duration),

  #[error("background task failed: {0}")]
  Task(String),
}

impl OverlayError {
  /// Fatal errors abort the current transition instead of being collected.
  pub fn is_fatal(&self) -> bool {
    matches!(
      self,
      OverlayError::ManifestLoad(_)
        | OverlayError::ManifestPersist { .. }
        | OverlayError::ManifestClear(_)
        | OverlayError::InvalidTarget { .. }
        | OverlayError::TargetMismatch { .. }
        | OverlayError::Task(_)
    )
  }
}

/// A key or source that could not be overlaid or restored.
#[derive(Debug)]
pub struct OverlayFailure {
  pub path: PathBuf,
  pub key: Option<RelativeKey>,
  pub error: OverlayError,
}

/// Outcome of applying one or more resources.
#[derive(Debug, Default)]
pub struct ApplyReport {
  pub copied: Vec<CopiedEntry>,
  pub failures: Vec<OverlayFailure>,
}

impl ApplyReport {
  pub fn merge(&mut self, other: ApplyReport) {
    self.copied.extend(other.copied);
    self.failures.extend(other.failures);
  }

  pub fn is_success(&self) -> bool {
    self.failures.is_empty()
  }
}

/// Outcome of restoring recorded keys.
#[derive(Debug, Default)]
pub struct RestoreReport {
  pub restored: Vec<RelativeKey>,
  pub failures: Vec<OverlayFailure>,
  /// Records still in the manifest afterwards.
  pub remaining: usize,
}

impl RestoreReport {
  pub fn merge(&mut self, other: RestoreReport) {
    self.restored.extend(other.restored);
    self.failures.extend(other.failures);
    self.remaining = other.remaining;
  }

  pub fn is_complete(&self) -> bool {
    self.remaining == 0
  }
}

/// Result of one executed work item.
#[derive(Debug)]
pub enum WorkOutcome {
  Applied(ApplyReport),
  Restored(RestoreReport),
}

/// Notifications for whoever presents progress to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusEvent {
  StateChanged { from: OverlayState, to: OverlayState },
  Applied { key: RelativeKey, overwrite: bool },
  Restored { key: RelativeKey },
  Failed { key: Option<RelativeKey>, message: String, fatal: bool },
  StaleDiscarded { key: RelativeKey, sequence: u64 },
  WatchSetupFailed { root: PathBuf, message: String },
}

/// Everything the controller needs to run.
#[derive(Clone)]
pub struct OverlaySettings {
  pub target_root: PathBuf,
  pub roots: Vec<PathBuf>,
  pub recursive: bool,
  pub read_only: bool,
  pub filter: Filter,
  pub archives: Arc<dyn ArchiveOpener>,
  pub state_dir: PathBuf,
  pub workers: usize,
  pub watch: WatchConfig,
  /// Follow resource folder changes after applying.
  pub live: bool,
  pub shutdown_timeout: Duration,
}

impl OverlaySettings {
  /// Settings with defaults for everything but the three directories.
  pub fn new(target_root: PathBuf, roots: Vec<PathBuf>, state_dir: PathBuf) -> Self {
    Self {
      target_root,
      roots,
      recursive: true,
      read_only: true,
      filter: accept_all(),
      archives: Arc::new(ZipOpener::new(DEFAULT_MAX_ARCHIVE_ENTRIES)),
      state_dir,
      workers: DEFAULT_WORKERS,
      watch: WatchConfig::default(),
      live: true,
      shutdown_timeout: Duration::from_secs(DEFAULT_SHUTDOWN_TIMEOUT_SECS),
    }
  }
}
