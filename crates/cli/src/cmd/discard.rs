//! Implementation of the `respack discard` command.

use anyhow::{Context, Result};

use respack_lib::config::Config;
use respack_lib::manifest::BackupManifest;
use respack_lib::overlay::{OverlayController, OverlaySettings};

use super::{lock_state, runtime};
use crate::output::{print_info, print_success};
use crate::prompts::confirm;

/// Drop the manifest and preserved originals, leaving the target as it is.
pub fn cmd_discard(config: Config, yes: bool) -> Result<()> {
  let state_dir = config.state_dir();
  let _lock = lock_state(&state_dir, "discard")?;

  let manifest = BackupManifest::load(BackupManifest::path_in(&state_dir)).context("Failed to read backup manifest")?;
  if manifest.is_empty() {
    print_info("Nothing to discard");
    return Ok(());
  }

  let question = format!(
    "Forget {} backup record(s)? The target keeps its current files and cannot be restored afterwards.",
    manifest.len()
  );
  if !confirm(&question, yes)? {
    print_info("Discard cancelled");
    return Ok(());
  }

  // Discarding never touches the target, so an unconfigured one is fine.
  let target = config.target.unwrap_or_default();
  let mut settings = OverlaySettings::new(target, Vec::new(), state_dir);
  settings.live = false;

  let discarded = runtime()?
    .block_on(async { OverlayController::new(settings).discard().await })
    .context("Discard failed")?;
  print_success(&format!("Discarded {} backup record(s)", discarded));
  Ok(())
}
