//! Types for tree copies: filters, plans, reports and errors.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;

use crate::key::{KeyError, RelativeKey};
use crate::platform::readonly::ReadOnlyError;

/// Inclusion predicate consulted for every directory during a traversal.
///
/// Returning `false` skips the directory and everything below it.
pub type Filter = Arc<dyn Fn(&Path) -> bool + Send + Sync>;

/// A filter that accepts everything.
pub fn accept_all() -> Filter {
  Arc::new(|_| true)
}

/// Errors for a single copied entry.
#[derive(Debug, Error)]
pub enum CopyError {
  #[error("failed to traverse {path}: {source}")]
  Walk {
    path: PathBuf,
    #[source]
    source: walkdir::Error,
  },

  #[error("failed to create directory {path}: {source}")]
  CreateDir {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to copy {from} to {to}: {source}")]
  Copy {
    from: PathBuf,
    to: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to write {path}: {source}")]
  Write {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to inspect {path}: {source}")]
  Metadata {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("destination {0} is a directory")]
  DestinationIsDirectory(PathBuf),

  #[error(transparent)]
  Permissions(#[from] ReadOnlyError),

  #[error(transparent)]
  Key(#[from] KeyError),
}

/// One file the traversal decided to copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedCopy {
  /// Key relative to the source root.
  pub key: RelativeKey,
  /// Absolute source file.
  pub source: PathBuf,
  /// Destination path under the destination root.
  pub dest: PathBuf,
  /// Whether the destination existed when the plan was made.
  pub exists: bool,
}

/// Result of planning a tree copy.
#[derive(Debug, Default)]
pub struct CopyPlan {
  pub entries: Vec<PlannedCopy>,
  pub failures: Vec<CopyFailure>,
}

/// One successfully copied file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopiedEntry {
  pub key: RelativeKey,
  /// True when the destination existed before the copy.
  pub was_overwrite: bool,
}

/// A file or directory that could not be copied.
#[derive(Debug)]
pub struct CopyFailure {
  pub path: PathBuf,
  pub error: CopyError,
}

/// Outcome of a tree copy: what landed and what did not.
#[derive(Debug, Default)]
pub struct CopyReport {
  pub copied: Vec<CopiedEntry>,
  pub failures: Vec<CopyFailure>,
}

impl CopyReport {
  /// Returns true if every planned file was copied.
  pub fn is_success(&self) -> bool {
    self.failures.is_empty()
  }

  /// Number of copies that replaced an existing destination.
  pub fn overwrite_count(&self) -> usize {
    self.copied.iter().filter(|c| c.was_overwrite).count()
  }
}
