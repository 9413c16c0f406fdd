use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::key::{KeyError, RelativeKey};

/// How a resource is overlaid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
  /// Copied verbatim.
  File,
  /// Expanded; members land under the archive key without its extension.
  Archive,
  /// Copied as a whole tree.
  Directory,
}

/// One custom resource tracked by the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceEntry {
  /// The watched root this resource lives under.
  pub root: PathBuf,
  pub source_path: PathBuf,
  pub relative_key: RelativeKey,
  pub kind: ResourceKind,
  /// Bumped on every accepted modification.
  pub last_seen_version: u64,
  /// Sequence of the last watch event applied to this entry.
  pub last_sequence: u64,
}

/// Work for the overlay executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
  /// Items with the same route run one at a time, in submission order.
  pub route: RelativeKey,
  pub action: WorkAction,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkAction {
  /// Overlay a whole resource.
  ApplyEntry(ResourceEntry),
  /// Overlay one file that belongs to a directory resource.
  ApplyFile { source: PathBuf, key: RelativeKey },
  /// Revert one target key.
  RestoreKey(RelativeKey),
  /// Revert every target key at or below a prefix.
  RestorePrefix(RelativeKey),
}

/// Submission side of the overlay executor.
pub type WorkQueue = mpsc::UnboundedSender<WorkItem>;

/// What the registry decided for one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciliation {
  Added(RelativeKey),
  Updated { key: RelativeKey, version: u64 },
  Removed(Vec<RelativeKey>),
  /// The event was older than the last one applied to the entry.
  Stale { key: RelativeKey, sequence: u64 },
  /// A file inside a directory resource changed.
  MemberChanged(RelativeKey),
  /// A file inside a directory resource was deleted.
  MemberRemoved(RelativeKey),
  Ignored,
}

#[derive(Debug, Error)]
pub enum RegistryError {
  #[error("failed to scan {path}: {source}")]
  Scan {
    path: PathBuf,
    #[source]
    source: walkdir::Error,
  },

  #[error("{0} is not under any watched root")]
  OutsideRoots(PathBuf),

  #[error("failed to resolve {path}: {source}")]
  Resolve {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error(transparent)]
  Key(#[from] KeyError),
}

/// Outcome of a full scan.
#[derive(Debug, Default)]
pub struct ScanReport {
  pub entries: usize,
  pub failures: Vec<RegistryError>,
}
