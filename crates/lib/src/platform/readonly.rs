//! Write protection for overlaid files.
//!
//! Files placed into the target directory are write-protected so the host
//! application does not edit them in place. Before respack replaces, restores
//! or deletes such a file it makes it writable again.
//!
//! ## Platform Behavior
//!
//! - **Unix**: 0444/0555 when protected, 0644/0755 when writable (the execute
//!   bit is preserved)
//! - **Windows**: toggles the read-only attribute

use std::path::Path;

use tracing::trace;

/// Error while changing a file's write protection.
#[derive(Debug, thiserror::Error)]
pub enum ReadOnlyError {
  #[error("failed to set permissions on {path}: {source}")]
  SetPermissions {
    path: String,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to read metadata for {path}: {source}")]
  Metadata {
    path: String,
    #[source]
    source: std::io::Error,
  },
}

/// Protect (`read_only = true`) or unprotect a single file.
pub fn set_read_only(path: &Path, read_only: bool) -> Result<(), ReadOnlyError> {
  trace!(path = %path.display(), read_only, "setting write protection");
  apply_mode(path, read_only)
}

/// Make `path` writable if it exists. Missing paths are not an error.
pub fn ensure_writable(path: &Path) -> Result<(), ReadOnlyError> {
  match std::fs::symlink_metadata(path) {
    Ok(metadata) if metadata.permissions().readonly() => apply_mode(path, false),
    Ok(_) => Ok(()),
    Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
    Err(e) => Err(ReadOnlyError::Metadata {
      path: path.display().to_string(),
      source: e,
    }),
  }
}

#[cfg(unix)]
fn apply_mode(path: &Path, read_only: bool) -> Result<(), ReadOnlyError> {
  use std::os::unix::fs::PermissionsExt;

  let metadata = std::fs::metadata(path).map_err(|e| ReadOnlyError::Metadata {
    path: path.display().to_string(),
    source: e,
  })?;

  let executable = metadata.is_dir() || metadata.permissions().mode() & 0o111 != 0;
  let new_mode = match (read_only, executable) {
    (true, true) => 0o555,
    (true, false) => 0o444,
    (false, true) => 0o755,
    (false, false) => 0o644,
  };

  let mut perms = metadata.permissions();
  perms.set_mode(new_mode);
  std::fs::set_permissions(path, perms).map_err(|e| ReadOnlyError::SetPermissions {
    path: path.display().to_string(),
    source: e,
  })
}

#[cfg(windows)]
fn apply_mode(path: &Path, read_only: bool) -> Result<(), ReadOnlyError> {
  let metadata = std::fs::metadata(path).map_err(|e| ReadOnlyError::Metadata {
    path: path.display().to_string(),
    source: e,
  })?;

  let mut perms = metadata.permissions();
  perms.set_readonly(read_only);
  std::fs::set_permissions(path, perms).map_err(|e| ReadOnlyError::SetPermissions {
    path: path.display().to_string(),
    source: e,
  })
}
