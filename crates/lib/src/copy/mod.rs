//! Recursive tree copy with directory filtering.
//!
//! This is the mechanism half of an overlay: it walks a source tree, copies
//! files to the same relative location under a destination root, and reports
//! per file what happened. It never decides what must be preserved; callers
//! that need a backup before the first write use [`plan_tree`] and copy the
//! planned entries one at a time with [`copy_one`].

mod types;

use std::fs;
use std::io::{self, Read};
use std::path::Path;

use tracing::{debug, trace, warn};
use walkdir::WalkDir;

use crate::key::RelativeKey;
use crate::platform::readonly;

pub use types::{CopiedEntry, CopyError, CopyFailure, CopyPlan, CopyReport, Filter, PlannedCopy, accept_all};

/// Walk `source_root` depth-first and list the files that would be copied.
///
/// `filter` is called for every directory (the root included); a directory it
/// rejects is skipped together with its whole subtree. Traversal errors are
/// collected rather than aborting the walk.
pub fn plan_tree(source_root: &Path, dest_root: &Path, filter: &dyn Fn(&Path) -> bool) -> CopyPlan {
  let mut plan = CopyPlan::default();

  let walker = WalkDir::new(source_root)
    .follow_links(true)
    .sort_by_file_name()
    .into_iter()
    .filter_entry(|entry| !entry.file_type().is_dir() || filter(entry.path()));

  for entry in walker {
    let entry = match entry {
      Ok(entry) => entry,
      Err(e) => {
        let path = e.path().unwrap_or(source_root).to_path_buf();
        warn!(path = %path.display(), error = %e, "skipping unreadable entry");
        plan.failures.push(CopyFailure {
          path: path.clone(),
          error: CopyError::Walk { path, source: e },
        });
        continue;
      }
    };

    if !entry.file_type().is_file() {
      continue;
    }

    let key = match RelativeKey::from_root(source_root, entry.path()) {
      Ok(key) => key,
      Err(e) => {
        plan.failures.push(CopyFailure {
          path: entry.path().to_path_buf(),
          error: e.into(),
        });
        continue;
      }
    };

    let dest = key.resolve(dest_root);
    let exists = dest.symlink_metadata().is_ok();
    plan.entries.push(PlannedCopy {
      key,
      source: entry.into_path(),
      dest,
      exists,
    });
  }

  plan
}

/// Copy every file under `source_root` into `dest_root`.
///
/// Existing destination files are replaced. Each copied file is then made
/// read-only or writable according to `read_only`. A failing file is recorded
/// in the report and its siblings are still copied.
pub fn copy_tree(source_root: &Path, dest_root: &Path, filter: &dyn Fn(&Path) -> bool, read_only: bool) -> CopyReport {
  debug!(
    from = %source_root.display(),
    to = %dest_root.display(),
    read_only,
    "copying tree"
  );

  let plan = plan_tree(source_root, dest_root, filter);
  let mut report = CopyReport {
    copied: Vec::with_capacity(plan.entries.len()),
    failures: plan.failures,
  };

  for planned in plan.entries {
    match copy_one(&planned.source, &planned.key, dest_root, read_only) {
      Ok(copied) => report.copied.push(copied),
      Err(error) => {
        warn!(key = %planned.key, error = %error, "copy failed");
        report.failures.push(CopyFailure {
          path: planned.source,
          error,
        });
      }
    }
  }

  debug!(
    copied = report.copied.len(),
    overwritten = report.overwrite_count(),
    failed = report.failures.len(),
    "tree copy complete"
  );

  report
}

/// Copy a single file to `key` under `dest_root`.
pub fn copy_one(
  source_file: &Path,
  key: &RelativeKey,
  dest_root: &Path,
  read_only: bool,
) -> Result<CopiedEntry, CopyError> {
  let dest = key.resolve(dest_root);
  let was_overwrite = prepare_destination(dest_root, key, &dest)?;

  trace!(from = %source_file.display(), to = %dest.display(), "copying file");
  fs::copy(source_file, &dest).map_err(|e| CopyError::Copy {
    from: source_file.to_path_buf(),
    to: dest.clone(),
    source: e,
  })?;
  readonly::set_read_only(&dest, read_only)?;

  Ok(CopiedEntry {
    key: key.clone(),
    was_overwrite,
  })
}

/// Write the contents of `reader` to `key` under `dest_root`.
///
/// Byte-stream variant of [`copy_one`], used for archive members.
pub fn write_one(
  reader: &mut dyn Read,
  key: &RelativeKey,
  dest_root: &Path,
  read_only: bool,
) -> Result<CopiedEntry, CopyError> {
  let dest = key.resolve(dest_root);
  let was_overwrite = prepare_destination(dest_root, key, &dest)?;

  let write_err = |e| CopyError::Write {
    path: dest.clone(),
    source: e,
  };
  let mut file = fs::File::create(&dest).map_err(write_err)?;
  io::copy(reader, &mut file).map_err(write_err)?;
  file.sync_all().map_err(write_err)?;
  drop(file);

  readonly::set_read_only(&dest, read_only)?;

  Ok(CopiedEntry {
    key: key.clone(),
    was_overwrite,
  })
}

/// Create missing parent directories and unprotect an existing destination.
///
/// Returns whether the destination already existed.
fn prepare_destination(dest_root: &Path, key: &RelativeKey, dest: &Path) -> Result<bool, CopyError> {
  match key.parent() {
    Some(parent) => ensure_dirs(dest_root, &parent)?,
    None => ensure_root(dest_root)?,
  }

  match fs::symlink_metadata(dest) {
    Ok(metadata) if metadata.is_dir() => Err(CopyError::DestinationIsDirectory(dest.to_path_buf())),
    Ok(_) => {
      readonly::ensure_writable(dest)?;
      Ok(true)
    }
    Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
    Err(e) => Err(CopyError::Metadata {
      path: dest.to_path_buf(),
      source: e,
    }),
  }
}

fn ensure_root(dest_root: &Path) -> Result<(), CopyError> {
  if dest_root.is_dir() {
    return Ok(());
  }
  fs::create_dir_all(dest_root).map_err(|e| CopyError::CreateDir {
    path: dest_root.to_path_buf(),
    source: e,
  })
}

/// Create `dir` under `dest_root` one level at a time.
///
/// Another copy may create the same directory concurrently, so "already
/// exists" counts as success.
fn ensure_dirs(dest_root: &Path, dir: &RelativeKey) -> Result<(), CopyError> {
  ensure_root(dest_root)?;

  let mut current = dest_root.to_path_buf();
  for part in dir.as_str().split('/') {
    current.push(part);
    if current.is_dir() {
      continue;
    }
    match fs::create_dir(&current) {
      Ok(()) => trace!(path = %current.display(), "created directory"),
      Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
      Err(e) => {
        return Err(CopyError::CreateDir {
          path: current,
          source: e,
        });
      }
    }
  }

  Ok(())
}
