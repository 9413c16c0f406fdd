//! Implementation of the `respack apply` command.
//!
//! Restores anything a previous session left behind, overlays the resource
//! folders onto the target, then follows the folders until Ctrl-C and restores
//! the target before exiting.

use std::time::Instant;

use anyhow::{Context, Result, bail};
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tracing::debug;

use respack_lib::config::Config;
use respack_lib::overlay::{OverlayController, OverlaySettings, RestoreReport, StatusEvent};

use super::{lock_state, runtime};
use crate::output::{Change, format_elapsed, print_change, print_info, print_success, print_warning, symbols};

pub fn cmd_apply(config: Config, no_watch: bool) -> Result<()> {
  let mut settings = config.into_settings().context("Invalid configuration")?;
  settings.live = !no_watch;

  let _lock = lock_state(&settings.state_dir, "apply")?;
  runtime()?.block_on(run(settings, no_watch))
}

async fn run(settings: OverlaySettings, no_watch: bool) -> Result<()> {
  let target = settings.target_root.display().to_string();
  let roots = settings.roots.len();
  let mut controller = OverlayController::new(settings);
  let mut status = controller.subscribe();

  if let Some(report) = controller.start().await.context("Failed to restore the previous overlay")? {
    report_leftovers(&report)?;
  }

  let started = Instant::now();
  let report = controller.apply().await.context("Apply failed")?;
  let overwrites = report.copied.iter().filter(|c| c.was_overwrite).count();
  print_success(&format!(
    "Applied {} file(s) from {} folder(s) {} {} in {}",
    report.copied.len(),
    roots,
    symbols::ARROW,
    target,
    format_elapsed(started.elapsed())
  ));
  if overwrites > 0 {
    print_info(&format!("{} existing file(s) backed up", overwrites));
  }
  for failure in &report.failures {
    print_warning(&format!("{}: {}", failure.path.display(), failure.error));
  }
  drain_setup_events(&mut status);

  if no_watch {
    print_info("Overlay left in place; run `respack restore` to undo it");
    return Ok(());
  }
  if !controller.is_live() {
    print_warning("Resource folders cannot be watched; the overlay stays static until Ctrl-C");
  }

  print_info("Watching for changes; press Ctrl-C to restore and exit");
  let printer = tokio::spawn(follow(status));
  tokio::signal::ctrl_c().await.context("Failed to listen for Ctrl-C")?;
  print_info("Restoring target");

  let result = controller.shutdown().await;
  printer.abort();
  match result.context("Restore on exit failed")? {
    Some(report) if !report.is_complete() => {
      bail!(
        "{} file(s) could not be restored; run `respack restore` to retry",
        report.remaining
      )
    }
    Some(report) => print_success(&format!("Restored {} file(s)", report.restored.len())),
    None => print_success("Nothing to restore"),
  }
  Ok(())
}

fn report_leftovers(report: &RestoreReport) -> Result<()> {
  print_info(&format!(
    "Restored {} file(s) left by a previous session",
    report.restored.len()
  ));
  for failure in &report.failures {
    print_warning(&format!("{}: {}", failure.path.display(), failure.error));
  }
  if !report.is_complete() {
    bail!(
      "{} file(s) from a previous session could not be restored; run `respack restore` to retry",
      report.remaining
    );
  }
  Ok(())
}

/// Report watch problems raised while applying; per-file results are already
/// in the apply report.
fn drain_setup_events(status: &mut broadcast::Receiver<StatusEvent>) {
  loop {
    match status.try_recv() {
      Ok(StatusEvent::WatchSetupFailed { root, message }) => {
        print_warning(&format!("Cannot watch {}: {}", root.display(), message));
      }
      Ok(_) | Err(TryRecvError::Lagged(_)) => {}
      Err(TryRecvError::Empty | TryRecvError::Closed) => break,
    }
  }
}

async fn follow(mut status: broadcast::Receiver<StatusEvent>) {
  loop {
    match status.recv().await {
      Ok(event) => print_event(&event),
      Err(RecvError::Lagged(skipped)) => print_warning(&format!("{} status update(s) dropped", skipped)),
      Err(RecvError::Closed) => break,
    }
  }
}

fn print_event(event: &StatusEvent) {
  match event {
    StatusEvent::Applied { key, overwrite } => {
      let change = if *overwrite { Change::Modify } else { Change::Add };
      print_change(change, key.as_str());
    }
    StatusEvent::Restored { key } => print_change(Change::Remove, key.as_str()),
    StatusEvent::Failed { key, message, .. } => match key {
      Some(key) => print_warning(&format!("{}: {}", key, message)),
      None => print_warning(message),
    },
    StatusEvent::WatchSetupFailed { root, message } => {
      print_warning(&format!("Cannot watch {}: {}", root.display(), message));
    }
    StatusEvent::StaleDiscarded { key, sequence } => debug!(%key, sequence, "stale event discarded"),
    StatusEvent::StateChanged { .. } => {}
  }
}
