//! Implementation of the `respack restore` command.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};

use respack_lib::config::Config;
use respack_lib::manifest::BackupManifest;
use respack_lib::overlay::{OverlayController, OverlaySettings};

use super::{lock_state, runtime};
use crate::output::{print_info, print_success, print_warning};

/// Put back everything the backup manifest records.
///
/// The manifest knows which directory it was written for, so the target
/// defaults to that one. `--target` is only an override and must agree with
/// it. Resource folders are not needed to undo an overlay.
pub fn cmd_restore(config: Config, target: Option<PathBuf>) -> Result<()> {
  let state_dir = config.state_dir();
  let _lock = lock_state(&state_dir, "restore")?;

  let manifest = BackupManifest::load(BackupManifest::path_in(&state_dir)).context("Failed to read backup manifest")?;
  let target = target
    .or_else(|| manifest.target().map(Path::to_path_buf))
    .or(config.target)
    .context("No target configured; set `target` in config.toml or pass --target")?;

  let mut settings = OverlaySettings::new(target, Vec::new(), state_dir);
  settings.live = false;

  let report = runtime()?.block_on(async {
    let mut controller = OverlayController::new(settings);
    controller.start().await
  });

  let Some(report) = report.context("Restore failed")? else {
    print_info("Nothing to restore");
    return Ok(());
  };

  for failure in &report.failures {
    print_warning(&format!("{}: {}", failure.path.display(), failure.error));
  }
  if !report.is_complete() {
    bail!("{} file(s) could not be restored", report.remaining);
  }
  print_success(&format!("Restored {} file(s)", report.restored.len()));
  Ok(())
}
