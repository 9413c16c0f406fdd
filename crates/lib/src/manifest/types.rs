//! Backup manifest types.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::key::RelativeKey;
use crate::platform::readonly::ReadOnlyError;

/// Current manifest file format version.
pub const MANIFEST_VERSION: u32 = 2;

/// Errors loading or persisting the manifest file.
#[derive(Debug, Error)]
pub enum ManifestError {
  #[error("failed to create state directory {path}: {source}")]
  CreateDir {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to read manifest {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to write manifest {path}: {source}")]
  Write {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to remove manifest {path}: {source}")]
  Remove {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to parse manifest {path}: {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },

  #[error("failed to serialize manifest: {0}")]
  Serialize(#[source] serde_json::Error),

  #[error("unsupported manifest version {found} (expected {MANIFEST_VERSION})")]
  UnsupportedVersion { found: u32 },
}

/// Errors preserving or restoring one target file.
#[derive(Debug, Error)]
pub enum BackupError {
  #[error("failed to preserve {path}: {source}")]
  Preserve {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to restore {path}: {source}")]
  Restore {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to remove {path}: {source}")]
  Remove {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("preserved copy of {key} is missing from the backup record")]
  MissingOriginal { key: RelativeKey },

  #[error("restored {path} does not match its backup (expected {expected}, found {actual})")]
  ChecksumMismatch {
    path: PathBuf,
    expected: String,
    actual: String,
  },

  #[error("{0} is a directory")]
  IsDirectory(PathBuf),

  #[error(transparent)]
  Permissions(#[from] ReadOnlyError),
}

/// Pre-overlay state of one target key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupRecord {
  /// Whether a file existed at the key before the first overlay write.
  pub had_original: bool,
  /// Where the original content was preserved. Present only when
  /// `had_original` is true.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub original: Option<PathBuf>,
  /// SHA-256 of the preserved original, lowercase hex.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub checksum: Option<String>,
}

impl BackupRecord {
  /// The overlay placed a new file at this key; restore deletes it.
  pub fn created() -> Self {
    Self {
      had_original: false,
      original: None,
      checksum: None,
    }
  }

  /// The overlay replaced an existing file whose bytes now live at `original`.
  pub fn preserved(original: PathBuf, checksum: String) -> Self {
    Self {
      had_original: true,
      original: Some(original),
      checksum: Some(checksum),
    }
  }
}

/// On-disk form of the manifest.
#[derive(Debug, Serialize, Deserialize)]
pub(super) struct ManifestFile {
  pub version: u32,
  /// Canonical target directory the entries are relative to.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub target: Option<PathBuf>,
  #[serde(default)]
  pub entries: BTreeMap<RelativeKey, BackupRecord>,
}
