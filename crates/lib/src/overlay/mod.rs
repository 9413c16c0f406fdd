//! Overlay orchestration.
//!
//! [`OverlayController`] sequences the lifecycle of one target directory:
//!
//! ```text
//! Idle ──start──> Restoring ──> Clean ──apply──> Overlaying ──> Active
//!   └──start (nothing pending)──> Clean <──restore── Restoring <──┘
//! ```
//!
//! Leftovers from an earlier session are restored before anything else. While
//! `Active`, a [`PathWatcher`] feeds the [`ResourceRegistry`], which queues work
//! for a [`KeyedExecutor`] running on the blocking pool.

mod engine;
mod executor;
mod types;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::key::RelativeKey;
use crate::manifest::BackupRecord;
use crate::registry::{Reconciliation, ResourceEntry, ResourceRegistry, WorkItem};
use crate::watch::PathWatcher;

pub use engine::OverlayEngine;
pub use executor::{KeyedExecutor, WorkHandler};
pub use types::{
  ApplyReport, OverlayError, OverlayFailure, OverlaySettings, OverlayState, RestoreReport, StatusEvent, WorkOutcome,
};

const STATUS_CAPACITY: usize = 256;

struct LiveSession {
  watcher: PathWatcher,
  executor: KeyedExecutor,
  pump: JoinHandle<()>,
}

pub struct OverlayController {
  settings: OverlaySettings,
  state: OverlayState,
  engine: Arc<OverlayEngine>,
  registry: Arc<Mutex<ResourceRegistry>>,
  live: Option<LiveSession>,
  status: broadcast::Sender<StatusEvent>,
}

impl OverlayController {
  pub fn new(settings: OverlaySettings) -> Self {
    let engine = Arc::new(OverlayEngine::from_settings(&settings));
    let registry = ResourceRegistry::new(
      settings.roots.clone(),
      settings.recursive,
      settings.filter.clone(),
      settings.archives.clone(),
    );
    let (status, _) = broadcast::channel(STATUS_CAPACITY);

    Self {
      settings,
      state: OverlayState::Idle,
      engine,
      registry: Arc::new(Mutex::new(registry)),
      live: None,
      status,
    }
  }

  pub fn state(&self) -> OverlayState {
    self.state
  }

  pub fn settings(&self) -> &OverlaySettings {
    &self.settings
  }

  /// Whether resource folders are currently being followed.
  pub fn is_live(&self) -> bool {
    self.live.is_some()
  }

  /// Receive status notifications from now on.
  pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
    self.status.subscribe()
  }

  pub fn pending_keys(&self) -> Vec<RelativeKey> {
    self.engine.pending_keys()
  }

  pub fn pending_records(&self) -> Vec<(RelativeKey, BackupRecord)> {
    self.engine.pending_records()
  }

  pub fn resources(&self) -> Vec<ResourceEntry> {
    lock(&self.registry).snapshot()
  }

  /// Load the manifest and restore whatever a previous session left behind.
  ///
  /// Returns the restore report if there was anything to restore.
  pub async fn start(&mut self) -> Result<Option<RestoreReport>, OverlayError> {
    self.expect_state(&[OverlayState::Idle], "start")?;

    let engine = self.engine.clone();
    let pending = run_blocking(move || engine.reload()).await?;

    let report = if pending > 0 {
      warn!(pending, "previous overlay was not restored; restoring now");
      self.transition(OverlayState::Restoring);
      match self.run_restore().await {
        Ok(report) => Some(report),
        Err(e) => {
          self.transition(OverlayState::Idle);
          return Err(e);
        }
      }
    } else {
      self.transition(OverlayState::Clean);
      None
    };

    let registry = self.registry.clone();
    let scan = run_blocking(move || Ok(lock(&registry).scan())).await?;
    for failure in scan.failures {
      self.publish_failure(None, &failure.to_string(), false);
    }

    Ok(report)
  }

  /// Overlay every known resource onto the target directory.
  pub async fn apply(&mut self) -> Result<ApplyReport, OverlayError> {
    self.expect_state(&[OverlayState::Clean], "apply")?;

    let engine = self.engine.clone();
    run_blocking(move || engine.validate_target()).await?;

    self.transition(OverlayState::Overlaying);

    let registry = self.registry.clone();
    let engine = self.engine.clone();
    let result = run_blocking(move || {
      let (scan, entries) = {
        let mut registry = lock(&registry);
        let scan = registry.scan();
        (scan, registry.snapshot())
      };
      for failure in &scan.failures {
        warn!(error = %failure, "resource scan failure");
      }
      engine.apply_all(&entries)
    })
    .await;

    let report = match result {
      Ok(report) => report,
      Err(e) => {
        error!(error = %e, "overlay aborted");
        self.publish_failure(None, &e.to_string(), true);
        self.transition(OverlayState::Clean);
        return Err(e);
      }
    };

    publish_apply(&self.status, &report);
    self.transition(OverlayState::Active);

    if self.settings.live {
      self.start_live();
    }
    Ok(report)
  }

  /// Stop following changes and put the target back into its original state.
  ///
  /// Ends in `Clean` once the manifest is empty. Keys that could not be
  /// restored leave the controller in `Restoring` so the step can be retried.
  pub async fn restore(&mut self) -> Result<RestoreReport, OverlayError> {
    self.expect_state(
      &[OverlayState::Active, OverlayState::Clean, OverlayState::Restoring],
      "restore",
    )?;
    let previous = self.state;

    self.stop_live().await;
    self.transition(OverlayState::Restoring);

    match self.run_restore().await {
      Ok(report) => Ok(report),
      Err(e) => {
        self.transition(previous);
        Err(e)
      }
    }
  }

  /// Restore before exit, giving up after the configured timeout.
  pub async fn shutdown(&mut self) -> Result<Option<RestoreReport>, OverlayError> {
    let needs_restore = match self.state {
      OverlayState::Active | OverlayState::Restoring => true,
      OverlayState::Clean => self.engine.has_pending(),
      OverlayState::Idle | OverlayState::Overlaying => false,
    };
    if !needs_restore {
      self.stop_live().await;
      return Ok(None);
    }

    let timeout = self.settings.shutdown_timeout;
    match tokio::time::timeout(timeout, self.restore()).await {
      Ok(result) => result.map(Some),
      Err(_) => {
        error!(
          ?timeout,
          pending = self.engine.pending_keys().len(),
          "restore incomplete at shutdown; it will resume on next start"
        );
        Err(OverlayError::ShutdownTimeout(timeout))
      }
    }
  }

  /// Drop every backup record without restoring.
  pub async fn discard(&mut self) -> Result<usize, OverlayError> {
    self.expect_state(
      &[OverlayState::Idle, OverlayState::Clean, OverlayState::Restoring],
      "discard",
    )?;

    let engine = self.engine.clone();
    let load = self.state == OverlayState::Idle;
    let discarded = run_blocking(move || {
      if load {
        engine.reload_unchecked()?;
      }
      engine.discard()
    })
    .await?;

    self.transition(OverlayState::Clean);
    Ok(discarded)
  }

  fn expect_state(&self, allowed: &[OverlayState], operation: &'static str) -> Result<(), OverlayError> {
    if allowed.contains(&self.state) {
      Ok(())
    } else {
      Err(OverlayError::InvalidState {
        operation,
        state: self.state,
      })
    }
  }

  fn transition(&mut self, to: OverlayState) {
    let from = self.state;
    if from == to {
      return;
    }
    self.state = to;
    info!(%from, %to, "overlay state changed");
    let _ = self.status.send(StatusEvent::StateChanged { from, to });
  }

  fn publish_failure(&self, key: Option<RelativeKey>, message: &str, fatal: bool) {
    let _ = self.status.send(StatusEvent::Failed {
      key,
      message: message.to_string(),
      fatal,
    });
  }

  async fn run_restore(&mut self) -> Result<RestoreReport, OverlayError> {
    let engine = self.engine.clone();
    let report = match run_blocking(move || engine.restore_all()).await {
      Ok(report) => report,
      Err(e) => {
        error!(error = %e, "restore aborted");
        self.publish_failure(None, &e.to_string(), true);
        return Err(e);
      }
    };

    publish_restore(&self.status, &report);
    if report.is_complete() {
      self.transition(OverlayState::Clean);
    } else {
      warn!(remaining = report.remaining, "some keys could not be restored");
    }
    Ok(report)
  }

  fn start_live(&mut self) {
    let engine = self.engine.clone();
    let status = self.status.clone();
    let handler: WorkHandler = Arc::new(move |item: WorkItem| run_item(&engine, &status, item));
    let executor = KeyedExecutor::spawn(self.settings.workers, handler);

    let roots = lock(&self.registry).roots().to_vec();
    let mut watcher = PathWatcher::new(self.settings.watch);
    // Flat mode still needs events from inside directory resources.
    let mut stream = match watcher.watch(&roots, true) {
      Ok(stream) => stream,
      Err(e) => {
        warn!(error = %e, "could not watch resource folders; overlay stays static");
        for root in roots {
          let _ = self.status.send(StatusEvent::WatchSetupFailed {
            root,
            message: e.to_string(),
          });
        }
        return;
      }
    };
    for failure in stream.take_setup_failures() {
      let _ = self.status.send(StatusEvent::WatchSetupFailed {
        root: failure.root,
        message: failure.error.to_string(),
      });
    }

    lock(&self.registry).begin_session(executor.queue());

    let registry = self.registry.clone();
    let status = self.status.clone();
    let pump = tokio::spawn(async move {
      while let Some(event) = stream.recv().await {
        let outcome = lock(&registry).reconcile(&event);
        match outcome {
          Reconciliation::Stale { key, sequence } => {
            let _ = status.send(StatusEvent::StaleDiscarded { key, sequence });
          }
          Reconciliation::Ignored => {}
          other => debug!(?other, "reconciled"),
        }
      }
      debug!("watch stream closed");
    });

    self.live = Some(LiveSession {
      watcher,
      executor,
      pump,
    });
  }

  async fn stop_live(&mut self) {
    let Some(LiveSession {
      mut watcher,
      executor,
      pump,
    }) = self.live.take()
    else {
      return;
    };

    watcher.stop();
    if let Err(e) = pump.await {
      warn!(error = %e, "event pump failed");
    }
    lock(&self.registry).end_session();
    executor.shutdown().await;
    debug!("live session stopped");
  }
}

fn lock(registry: &Mutex<ResourceRegistry>) -> MutexGuard<'_, ResourceRegistry> {
  registry.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn run_blocking<T, F>(f: F) -> Result<T, OverlayError>
where
  F: FnOnce() -> Result<T, OverlayError> + Send + 'static,
  T: Send + 'static,
{
  tokio::task::spawn_blocking(f)
    .await
    .map_err(|e| OverlayError::Task(e.to_string()))?
}

fn run_item(engine: &OverlayEngine, status: &broadcast::Sender<StatusEvent>, item: WorkItem) {
  match engine.execute(&item) {
    Ok(WorkOutcome::Applied(report)) => publish_apply(status, &report),
    Ok(WorkOutcome::Restored(report)) => publish_restore(status, &report),
    Err(e) => {
      error!(route = %item.route, error = %e, "live overlay step failed");
      let _ = status.send(StatusEvent::Failed {
        key: Some(item.route),
        message: e.to_string(),
        fatal: e.is_fatal(),
      });
    }
  }
}

fn publish_apply(status: &broadcast::Sender<StatusEvent>, report: &ApplyReport) {
  for copied in &report.copied {
    let _ = status.send(StatusEvent::Applied {
      key: copied.key.clone(),
      overwrite: copied.was_overwrite,
    });
  }
  publish_failures(status, &report.failures);
}

fn publish_restore(status: &broadcast::Sender<StatusEvent>, report: &RestoreReport) {
  for key in &report.restored {
    let _ = status.send(StatusEvent::Restored { key: key.clone() });
  }
  publish_failures(status, &report.failures);
}

fn publish_failures(status: &broadcast::Sender<StatusEvent>, failures: &[OverlayFailure]) {
  for failure in failures {
    let _ = status.send(StatusEvent::Failed {
      key: failure.key.clone(),
      message: failure.error.to_string(),
      fatal: false,
    });
  }
}
