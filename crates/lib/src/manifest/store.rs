//! Side-by-side storage for original target files.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::{debug, trace, warn};

use crate::consts::ORIGINALS_DIR;
use crate::key::RelativeKey;
use crate::platform::readonly;

use super::types::{BackupError, BackupRecord};

/// Preserves original bytes under `{state_dir}/originals/<key>` and puts them
/// back on restore.
#[derive(Debug, Clone)]
pub struct BackupStore {
  root: PathBuf,
}

impl BackupStore {
  pub fn new(root: PathBuf) -> Self {
    Self { root }
  }

  /// Store rooted in the `originals` directory of `state_dir`.
  pub fn in_state_dir(state_dir: &Path) -> Self {
    Self::new(state_dir.join(ORIGINALS_DIR))
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  /// Copy the current content of `target` aside for `key`.
  pub fn preserve(&self, key: &RelativeKey, target: &Path) -> Result<BackupRecord, BackupError> {
    let backup = key.resolve(&self.root);
    let preserve_err = |e| BackupError::Preserve {
      path: target.to_path_buf(),
      source: e,
    };

    if let Some(parent) = backup.parent() {
      fs::create_dir_all(parent).map_err(preserve_err)?;
    }
    // A leftover from an abandoned session may be write-protected.
    readonly::ensure_writable(&backup)?;
    fs::copy(target, &backup).map_err(preserve_err)?;

    let checksum = hash_file(&backup).map_err(preserve_err)?;
    debug!(key = %key, backup = %backup.display(), "preserved original");
    Ok(BackupRecord::preserved(backup, checksum))
  }

  /// Put `dest` back into the state described by `record`.
  ///
  /// A preserved original is copied back and verified against its checksum.
  /// A created key is deleted.
  pub fn restore(&self, key: &RelativeKey, record: &BackupRecord, dest: &Path) -> Result<(), BackupError> {
    if !record.had_original {
      return self.remove_created(dest);
    }

    let original = record
      .original
      .as_deref()
      .ok_or_else(|| BackupError::MissingOriginal { key: key.clone() })?;
    let restore_err = |e| BackupError::Restore {
      path: dest.to_path_buf(),
      source: e,
    };

    if dest.is_dir() {
      return Err(BackupError::IsDirectory(dest.to_path_buf()));
    }
    readonly::ensure_writable(dest)?;
    if let Some(parent) = dest.parent() {
      fs::create_dir_all(parent).map_err(restore_err)?;
    }
    fs::copy(original, dest).map_err(restore_err)?;

    if let Some(expected) = &record.checksum {
      let actual = hash_file(dest).map_err(restore_err)?;
      if &actual != expected {
        return Err(BackupError::ChecksumMismatch {
          path: dest.to_path_buf(),
          expected: expected.clone(),
          actual,
        });
      }
    }

    trace!(key = %key, dest = %dest.display(), "restored original");
    Ok(())
  }

  /// Delete a file the overlay created. A missing file is already restored.
  pub fn remove_created(&self, dest: &Path) -> Result<(), BackupError> {
    if dest.is_dir() {
      return Err(BackupError::IsDirectory(dest.to_path_buf()));
    }
    readonly::ensure_writable(dest)?;
    match fs::remove_file(dest) {
      Ok(()) => {
        trace!(dest = %dest.display(), "removed overlay file");
        Ok(())
      }
      Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
      Err(e) => Err(BackupError::Remove {
        path: dest.to_path_buf(),
        source: e,
      }),
    }
  }

  /// Drop the preserved bytes of a record that is no longer needed.
  pub fn discard(&self, record: &BackupRecord) {
    let Some(original) = &record.original else {
      return;
    };
    if let Err(e) = readonly::ensure_writable(original) {
      warn!(path = %original.display(), error = %e, "failed to unprotect backup");
    }
    match fs::remove_file(original) {
      Ok(()) => {}
      Err(e) if e.kind() == io::ErrorKind::NotFound => {}
      Err(e) => warn!(path = %original.display(), error = %e, "failed to remove backup"),
    }
  }

  /// Remove every preserved original.
  pub fn clear(&self) -> Result<(), BackupError> {
    match fs::remove_dir_all(&self.root) {
      Ok(()) => {
        debug!(root = %self.root.display(), "cleared backup store");
        Ok(())
      }
      Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
      Err(e) => Err(BackupError::Remove {
        path: self.root.clone(),
        source: e,
      }),
    }
  }
}

/// SHA-256 of a file, lowercase hex.
pub(crate) fn hash_file(path: &Path) -> io::Result<String> {
  let mut file = fs::File::open(path)?;
  let mut hasher = Sha256::new();
  io::copy(&mut file, &mut hasher)?;
  Ok(format!("{:x}", hasher.finalize()))
}
