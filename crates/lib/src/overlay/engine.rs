//! Copy/backup discipline for single resources and keys.
//!
//! Every write into the target directory goes through [`OverlayEngine`]. It
//! records the pre-overlay state of a key, persists the manifest, and only
//! then lets the copy happen. Restores go the other way: the original comes
//! back first, and the record is dropped only once that succeeded.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, warn};

use crate::archive::ArchiveOpener;
use crate::copy::{self, CopiedEntry, CopyError, Filter};
use crate::key::RelativeKey;
use crate::manifest::{BackupManifest, BackupRecord, BackupStore};
use crate::registry::{ResourceEntry, ResourceKind, WorkAction, WorkItem};

use super::types::{ApplyReport, OverlayError, OverlayFailure, OverlaySettings, RestoreReport, WorkOutcome};

pub struct OverlayEngine {
  target_root: PathBuf,
  read_only: bool,
  filter: Filter,
  archives: Arc<dyn ArchiveOpener>,
  store: BackupStore,
  /// Global write lock for manifest mutation and persistence.
  manifest: Mutex<BackupManifest>,
}

impl OverlayEngine {
  /// An engine with an empty in-memory manifest; call
  /// [`reload`](Self::reload) to pick up a previous session.
  pub fn new(
    target_root: PathBuf,
    state_dir: &Path,
    read_only: bool,
    filter: Filter,
    archives: Arc<dyn ArchiveOpener>,
  ) -> Self {
    Self {
      target_root,
      read_only,
      filter,
      archives,
      store: BackupStore::in_state_dir(state_dir),
      manifest: Mutex::new(BackupManifest::new(BackupManifest::path_in(state_dir))),
    }
  }

  pub fn from_settings(settings: &OverlaySettings) -> Self {
    Self::new(
      settings.target_root.clone(),
      &settings.state_dir,
      settings.read_only,
      settings.filter.clone(),
      settings.archives.clone(),
    )
  }

  pub fn target_root(&self) -> &Path {
    &self.target_root
  }

  fn manifest(&self) -> MutexGuard<'_, BackupManifest> {
    self.manifest.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// The target directory as the manifest records it.
  fn canonical_target(&self) -> PathBuf {
    dunce::canonicalize(&self.target_root).unwrap_or_else(|_| self.target_root.clone())
  }

  /// Replace the in-memory manifest with the one on disk.
  ///
  /// Returns the number of pending records. Fails if the records belong to a
  /// different target directory.
  pub fn reload(&self) -> Result<usize, OverlayError> {
    self.load_manifest(true)
  }

  /// Like [`reload`](Self::reload), but accepts records for any target. Only
  /// for discarding, which never touches the target.
  pub fn reload_unchecked(&self) -> Result<usize, OverlayError> {
    self.load_manifest(false)
  }

  fn load_manifest(&self, check_target: bool) -> Result<usize, OverlayError> {
    let mut manifest = self.manifest();
    let loaded = BackupManifest::load(manifest.path().to_path_buf()).map_err(OverlayError::ManifestLoad)?;
    if check_target
      && !loaded.is_empty()
      && let Some(recorded) = loaded.target()
    {
      let configured = self.canonical_target();
      if recorded != configured {
        return Err(OverlayError::TargetMismatch {
          recorded: recorded.to_path_buf(),
          configured,
        });
      }
    }
    *manifest = loaded;
    Ok(manifest.len())
  }

  pub fn pending_keys(&self) -> Vec<RelativeKey> {
    self.manifest().keys()
  }

  pub fn pending_records(&self) -> Vec<(RelativeKey, BackupRecord)> {
    self.manifest().iter().map(|(k, r)| (k.clone(), r.clone())).collect()
  }

  pub fn has_pending(&self) -> bool {
    !self.manifest().is_empty()
  }

  /// The target must be an existing, writable directory.
  pub fn validate_target(&self) -> Result<(), OverlayError> {
    let invalid = |reason: String| OverlayError::InvalidTarget {
      path: self.target_root.clone(),
      reason,
    };
    match fs::metadata(&self.target_root) {
      Ok(metadata) if metadata.is_dir() => {}
      Ok(_) => return Err(invalid("not a directory".to_string())),
      Err(e) => return Err(invalid(e.to_string())),
    }
    tempfile::tempfile_in(&self.target_root).map_err(|e| invalid(format!("not writable: {}", e)))?;
    Ok(())
  }

  /// Record the pre-overlay state of `key` unless it is already recorded.
  fn guard_key(&self, key: &RelativeKey) -> Result<(), OverlayError> {
    let mut manifest = self.manifest();
    if manifest.lookup(key).is_some() {
      return Ok(());
    }

    let dest = key.resolve(&self.target_root);
    let record = match fs::symlink_metadata(&dest) {
      Ok(metadata) if metadata.is_dir() => return Err(CopyError::DestinationIsDirectory(dest).into()),
      Ok(_) => self.store.preserve(key, &dest)?,
      Err(e) if e.kind() == io::ErrorKind::NotFound => BackupRecord::created(),
      Err(e) => return Err(CopyError::Metadata { path: dest, source: e }.into()),
    };

    if manifest.is_empty() {
      manifest.set_target(self.canonical_target());
    }
    manifest.record_if_absent(key.clone(), record.clone());
    if let Err(e) = manifest.persist() {
      manifest.remove(key);
      self.store.discard(&record);
      return Err(OverlayError::ManifestPersist {
        key: key.clone(),
        source: e,
      });
    }
    Ok(())
  }

  /// Overlay one file at `key`.
  pub fn apply_file(&self, source: &Path, key: &RelativeKey) -> Result<CopiedEntry, OverlayError> {
    self.guard_key(key)?;
    let copied = copy::copy_one(source, key, &self.target_root, self.read_only)?;
    debug!(key = %key, overwrite = copied.was_overwrite, "applied file");
    Ok(copied)
  }

  /// Overlay one resource.
  ///
  /// Per-file problems are collected in the report; only a manifest that
  /// could not be persisted is returned as an error.
  pub fn apply_entry(&self, entry: &ResourceEntry) -> Result<ApplyReport, OverlayError> {
    let mut report = ApplyReport::default();
    match entry.kind {
      ResourceKind::File => {
        let result = self.apply_file(&entry.source_path, &entry.relative_key);
        collect(&mut report, &entry.source_path, Some(&entry.relative_key), result)?;
      }
      ResourceKind::Directory => {
        let dest_base = entry.relative_key.resolve(&self.target_root);
        let plan = copy::plan_tree(&entry.source_path, &dest_base, &*self.filter);
        for failure in plan.failures {
          report.failures.push(OverlayFailure {
            path: failure.path,
            key: None,
            error: failure.error.into(),
          });
        }
        for planned in plan.entries {
          let key = entry.relative_key.join(&planned.key);
          let result = self.apply_file(&planned.source, &key);
          collect(&mut report, &planned.source, Some(&key), result)?;
        }
      }
      ResourceKind::Archive => self.apply_archive(entry, &mut report)?,
    }
    Ok(report)
  }

  fn apply_archive(&self, entry: &ResourceEntry, report: &mut ApplyReport) -> Result<(), OverlayError> {
    let fail_whole = |report: &mut ApplyReport, error: OverlayError| {
      warn!(archive = %entry.source_path.display(), error = %error, "archive unreadable");
      report.failures.push(OverlayFailure {
        path: entry.source_path.clone(),
        key: Some(entry.relative_key.clone()),
        error,
      });
    };

    let mut reader = match self.archives.open(&entry.source_path) {
      Ok(reader) => reader,
      Err(e) => {
        fail_whole(report, e.into());
        return Ok(());
      }
    };
    let members = match reader.list_entries() {
      Ok(members) => members,
      Err(e) => {
        fail_whole(report, e.into());
        return Ok(());
      }
    };

    let prefix = entry.relative_key.without_extension();
    debug!(archive = %entry.relative_key, members = members.len(), prefix = %prefix, "expanding archive");
    for member in members {
      let key = prefix.join(&member);
      let result = self.guard_key(&key).and_then(|()| {
        let mut stream = reader.read_entry(&member)?;
        Ok(copy::write_one(&mut *stream, &key, &self.target_root, self.read_only)?)
      });
      collect(report, &entry.source_path, Some(&key), result)?;
    }
    Ok(())
  }

  /// Overlay resources in order; later entries win on shared keys.
  pub fn apply_all(&self, entries: &[ResourceEntry]) -> Result<ApplyReport, OverlayError> {
    let mut report = ApplyReport::default();
    for entry in entries {
      report.merge(self.apply_entry(entry)?);
    }
    info!(
      resources = entries.len(),
      copied = report.copied.len(),
      failed = report.failures.len(),
      "overlay applied"
    );
    Ok(report)
  }

  /// Put `key` back into its pre-overlay state.
  ///
  /// Returns false if nothing was recorded for the key. The record is removed
  /// only after the target has been restored and verified.
  pub fn restore_key(&self, key: &RelativeKey) -> Result<bool, OverlayError> {
    let mut manifest = self.manifest();
    let Some(record) = manifest.lookup(key).cloned() else {
      return Ok(false);
    };

    let dest = key.resolve(&self.target_root);
    self.store.restore(key, &record, &dest)?;

    manifest.remove(key);
    if let Err(e) = manifest.persist() {
      manifest.record_if_absent(key.clone(), record);
      return Err(OverlayError::ManifestPersist {
        key: key.clone(),
        source: e,
      });
    }
    drop(manifest);

    self.store.discard(&record);
    debug!(key = %key, had_original = record.had_original, "restored key");
    Ok(true)
  }

  pub fn restore_keys(&self, keys: &[RelativeKey]) -> Result<RestoreReport, OverlayError> {
    let mut report = RestoreReport::default();
    for key in keys {
      match self.restore_key(key) {
        Ok(true) => report.restored.push(key.clone()),
        Ok(false) => {}
        Err(e) if e.is_fatal() => return Err(e),
        Err(e) => {
          warn!(key = %key, error = %e, "restore failed");
          report.failures.push(OverlayFailure {
            path: key.resolve(&self.target_root),
            key: Some(key.clone()),
            error: e,
          });
        }
      }
    }
    report.remaining = self.manifest().len();
    Ok(report)
  }

  /// Restore every recorded key at or below `prefix`.
  pub fn restore_prefix(&self, prefix: &RelativeKey) -> Result<RestoreReport, OverlayError> {
    let keys = self.manifest().keys_with_prefix(prefix);
    self.restore_keys(&keys)
  }

  /// Restore everything the manifest records.
  pub fn restore_all(&self) -> Result<RestoreReport, OverlayError> {
    let keys = self.pending_keys();
    let report = self.restore_keys(&keys)?;
    if report.is_complete()
      && let Err(e) = self.store.clear()
    {
      warn!(error = %e, "failed to clear backup store");
    }
    info!(
      restored = report.restored.len(),
      failed = report.failures.len(),
      remaining = report.remaining,
      "restore finished"
    );
    Ok(report)
  }

  /// Forget every record and its preserved original without restoring.
  pub fn discard(&self) -> Result<usize, OverlayError> {
    let mut manifest = self.manifest();
    let records = manifest.iter().map(|(k, r)| (k.clone(), r.clone())).collect::<Vec<_>>();
    manifest.clear();
    if let Err(e) = manifest.persist() {
      for (key, record) in records {
        manifest.record_if_absent(key, record);
      }
      return Err(OverlayError::ManifestClear(e));
    }
    drop(manifest);

    self.store.clear()?;
    warn!(records = records.len(), "discarded backup records");
    Ok(records.len())
  }

  /// Run one work item from the registry.
  pub fn execute(&self, item: &WorkItem) -> Result<WorkOutcome, OverlayError> {
    match &item.action {
      WorkAction::ApplyEntry(entry) => self.apply_entry(entry).map(WorkOutcome::Applied),
      WorkAction::ApplyFile { source, key } => {
        let mut report = ApplyReport::default();
        let result = self.apply_file(source, key);
        collect(&mut report, source, Some(key), result)?;
        Ok(WorkOutcome::Applied(report))
      }
      WorkAction::RestoreKey(key) => self.restore_keys(std::slice::from_ref(key)).map(WorkOutcome::Restored),
      WorkAction::RestorePrefix(prefix) => self.restore_prefix(prefix).map(WorkOutcome::Restored),
    }
  }
}

/// File a per-file result into `report`, passing fatal errors through.
fn collect(
  report: &mut ApplyReport,
  path: &Path,
  key: Option<&RelativeKey>,
  result: Result<CopiedEntry, OverlayError>,
) -> Result<(), OverlayError> {
  match result {
    Ok(copied) => report.copied.push(copied),
    Err(e) if e.is_fatal() => return Err(e),
    Err(e) => {
      warn!(path = %path.display(), error = %e, "overlay failed");
      report.failures.push(OverlayFailure {
        path: path.to_path_buf(),
        key: key.cloned(),
        error: e,
      });
    }
  }
  Ok(())
}
