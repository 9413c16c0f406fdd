//! Durable record of what an overlay changed in the target directory.
//!
//! The manifest maps each [`RelativeKey`] written by an overlay to the state
//! it had before the first write. It is persisted after every insertion, so a
//! crash mid-overlay leaves a file describing exactly the writes that may have
//! happened.
//!
//! # Storage Layout
//!
//! ```text
//! {state_dir}/
//! ├── manifest.json       # {"version":2,"target":dir,"entries":{key:{had_original,original,checksum}}}
//! └── originals/<key>     # preserved pre-overlay bytes
//! ```
//!
//! An absent `manifest.json` means there is nothing to restore. `target` names
//! the directory the keys resolve against; restoring them anywhere else would
//! touch unrelated files.

mod store;
mod types;

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, trace};

use crate::consts::MANIFEST_FILENAME;
use crate::key::RelativeKey;

pub use store::BackupStore;
pub use types::{BackupError, BackupRecord, MANIFEST_VERSION, ManifestError};
use types::ManifestFile;

/// In-memory manifest bound to its file.
#[derive(Debug)]
pub struct BackupManifest {
  path: PathBuf,
  target: Option<PathBuf>,
  entries: BTreeMap<RelativeKey, BackupRecord>,
}

impl BackupManifest {
  /// An empty manifest that will persist to `path`.
  pub fn new(path: PathBuf) -> Self {
    Self {
      path,
      target: None,
      entries: BTreeMap::new(),
    }
  }

  /// Manifest location inside a state directory.
  pub fn path_in(state_dir: &Path) -> PathBuf {
    state_dir.join(MANIFEST_FILENAME)
  }

  /// Load the manifest at `path`.
  ///
  /// Returns an empty manifest if the file doesn't exist.
  pub fn load(path: PathBuf) -> Result<Self, ManifestError> {
    let content = match fs::read_to_string(&path) {
      Ok(content) => content,
      Err(e) if e.kind() == io::ErrorKind::NotFound => {
        trace!(path = %path.display(), "no manifest on disk");
        return Ok(Self::new(path));
      }
      Err(e) => return Err(ManifestError::Read { path, source: e }),
    };

    let file: ManifestFile = match serde_json::from_str(&content) {
      Ok(file) => file,
      Err(e) => return Err(ManifestError::Parse { path, source: e }),
    };

    if file.version != MANIFEST_VERSION {
      return Err(ManifestError::UnsupportedVersion { found: file.version });
    }

    debug!(path = %path.display(), records = file.entries.len(), "loaded manifest");
    Ok(Self {
      path,
      target: file.target,
      entries: file.entries,
    })
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  /// The target directory the recorded keys belong to.
  pub fn target(&self) -> Option<&Path> {
    self.target.as_deref()
  }

  pub fn set_target(&mut self, target: PathBuf) {
    self.target = Some(target);
  }

  /// Insert `record` for `key` unless the key is already recorded.
  ///
  /// Returns true if the record was inserted. The first pre-overlay state
  /// always wins.
  pub fn record_if_absent(&mut self, key: RelativeKey, record: BackupRecord) -> bool {
    if self.entries.contains_key(&key) {
      return false;
    }
    trace!(key = %key, had_original = record.had_original, "recording backup");
    self.entries.insert(key, record);
    true
  }

  pub fn lookup(&self, key: &RelativeKey) -> Option<&BackupRecord> {
    self.entries.get(key)
  }

  pub fn remove(&mut self, key: &RelativeKey) -> Option<BackupRecord> {
    self.entries.remove(key)
  }

  /// All recorded keys, sorted.
  pub fn keys(&self) -> Vec<RelativeKey> {
    self.entries.keys().cloned().collect()
  }

  /// Recorded keys equal to `prefix` or below it.
  pub fn keys_with_prefix(&self, prefix: &RelativeKey) -> Vec<RelativeKey> {
    self
      .entries
      .keys()
      .filter(|key| key.starts_with(prefix))
      .cloned()
      .collect()
  }

  pub fn iter(&self) -> impl Iterator<Item = (&RelativeKey, &BackupRecord)> {
    self.entries.iter()
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  pub fn clear(&mut self) {
    self.entries.clear();
    self.target = None;
  }

  /// Write the manifest to disk.
  ///
  /// Uses atomic write (write to temp, sync, then rename). An empty manifest
  /// removes the file instead, so absence keeps meaning "nothing to restore".
  pub fn persist(&self) -> Result<(), ManifestError> {
    if self.entries.is_empty() {
      return match fs::remove_file(&self.path) {
        Ok(()) => {
          debug!(path = %self.path.display(), "removed empty manifest");
          Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(ManifestError::Remove {
          path: self.path.clone(),
          source: e,
        }),
      };
    }

    if let Some(parent) = self.path.parent() {
      fs::create_dir_all(parent).map_err(|e| ManifestError::CreateDir {
        path: parent.to_path_buf(),
        source: e,
      })?;
    }

    let file = ManifestFile {
      version: MANIFEST_VERSION,
      target: self.target.clone(),
      entries: self.entries.clone(),
    };
    let content = serde_json::to_string_pretty(&file).map_err(ManifestError::Serialize)?;

    let temp_path = self.path.with_extension("json.tmp");
    let write_err = |e| ManifestError::Write {
      path: temp_path.clone(),
      source: e,
    };
    let mut temp = fs::File::create(&temp_path).map_err(write_err)?;
    temp.write_all(content.as_bytes()).map_err(write_err)?;
    temp.sync_all().map_err(write_err)?;
    drop(temp);

    fs::rename(&temp_path, &self.path).map_err(|e| ManifestError::Write {
      path: self.path.clone(),
      source: e,
    })?;

    trace!(path = %self.path.display(), records = self.entries.len(), "persisted manifest");
    Ok(())
  }
}
