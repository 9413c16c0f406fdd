//! Status command implementation.
//!
//! Lists the keys the backup manifest still records and whether another
//! respack process holds the state directory.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;

use respack_lib::config::Config;
use respack_lib::key::RelativeKey;
use respack_lib::manifest::{BackupManifest, BackupRecord};
use respack_lib::state_lock::{LockMode, StateLock, StateLockError};

use crate::output::{Change, format_size, print_change, print_info, print_json, print_stat, print_warning, short_checksum};

#[derive(Serialize)]
struct StatusJson<'a> {
  state_dir: &'a Path,
  manifest: &'a Path,
  target: Option<&'a Path>,
  modified: Option<String>,
  in_use_by: Option<String>,
  preserved_bytes: u64,
  pending: Vec<PendingJson<'a>>,
}

#[derive(Serialize)]
struct PendingJson<'a> {
  key: &'a RelativeKey,
  #[serde(flatten)]
  record: &'a BackupRecord,
}

pub fn cmd_status(config: &Config, verbose: bool, json: bool) -> Result<()> {
  let state_dir = config.state_dir();
  let in_use_by = match StateLock::acquire(&state_dir, LockMode::Shared, "status") {
    Ok(_) => None,
    Err(StateLockError::Contention { command, pid, .. }) => Some(format!("{} (PID {})", command, pid)),
    Err(StateLockError::ContentionUnknown { .. }) => Some("another process".to_string()),
    Err(e) => return Err(e).context("Failed to check state lock"),
  };

  let manifest_path = BackupManifest::path_in(&state_dir);
  let manifest = BackupManifest::load(manifest_path.clone()).context("Failed to read backup manifest")?;
  let modified = std::fs::metadata(&manifest_path)
    .and_then(|m| m.modified())
    .ok()
    .map(|time| humantime::format_rfc3339_seconds(time).to_string());
  let preserved_bytes: u64 = manifest
    .iter()
    .filter_map(|(_, record)| record.original.as_deref())
    .filter_map(|path| std::fs::metadata(path).ok())
    .map(|m| m.len())
    .sum();

  if json {
    let pending = manifest.iter().map(|(key, record)| PendingJson { key, record }).collect();
    return print_json(&StatusJson {
      state_dir: &state_dir,
      manifest: &manifest_path,
      target: manifest.target(),
      modified,
      in_use_by,
      preserved_bytes,
      pending,
    });
  }

  if let Some(holder) = &in_use_by {
    print_warning(&format!("State directory is in use by {}", holder));
  }
  if manifest.is_empty() {
    print_info("Nothing to restore");
    return Ok(());
  }

  print_info(&format!("{} file(s) waiting to be restored", manifest.len()));
  print_stat("Manifest", &manifest_path.display().to_string());
  if let Some(target) = manifest.target() {
    print_stat("Target", &target.display().to_string());
  }
  if let Some(modified) = &modified {
    print_stat("Last written", modified);
  }
  print_stat("Preserved originals", &format_size(preserved_bytes));
  println!();

  for (key, record) in manifest.iter() {
    if record.had_original {
      print_change(Change::Modify, key.as_str());
      if verbose && let Some(checksum) = &record.checksum {
        print_stat("sha256", short_checksum(checksum));
      }
    } else {
      print_change(Change::Add, key.as_str());
    }
  }

  Ok(())
}
