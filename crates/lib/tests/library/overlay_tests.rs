use std::ffi::OsStr;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use respack_lib::archive::ZipOpener;
use respack_lib::copy::accept_all;
use respack_lib::key::RelativeKey;
use respack_lib::overlay::{OverlayController, OverlayEngine, OverlayState};
use respack_lib::registry::ResourceRegistry;
use zip::write::SimpleFileOptions;

use super::common::{Workspace, read, tree, write};

fn key(s: &str) -> RelativeKey {
  RelativeKey::try_from(s).unwrap()
}

fn engine(ws: &Workspace) -> OverlayEngine {
  OverlayEngine::new(
    ws.target().to_path_buf(),
    ws.state.path(),
    false,
    accept_all(),
    Arc::new(ZipOpener::default()),
  )
}

fn scanned(ws: &Workspace) -> ResourceRegistry {
  let mut registry = ResourceRegistry::new(
    vec![ws.custom().to_path_buf()],
    true,
    accept_all(),
    Arc::new(ZipOpener::default()),
  );
  registry.scan();
  registry
}

#[tokio::test]
async fn apply_then_restore_round_trips_the_target() {
  let ws = Workspace::new();
  write(ws.target(), "cfg/config.cfg", "exec autoexec");
  write(ws.target(), "cfg/untouched.cfg", "keep me");
  write(ws.target(), "resource/ui/hud.res", "stock hud");
  write(ws.custom(), "cfg/config.cfg", "custom config");
  write(ws.custom(), "resource/ui/hud.res", "custom hud");
  write(ws.custom(), "materials/vgui/icon.vtf", "icon");
  let before = tree(ws.target());

  let mut controller = OverlayController::new(ws.settings());
  controller.start().await.unwrap();
  let report = controller.apply().await.unwrap();

  assert!(report.is_success());
  assert_eq!(report.copied.len(), 3);
  assert_eq!(report.copied.iter().filter(|c| c.was_overwrite).count(), 2);
  assert_eq!(read(ws.target(), "cfg/config.cfg"), "custom config");
  assert_eq!(read(ws.target(), "materials/vgui/icon.vtf"), "icon");
  assert_eq!(ws.manifest().len(), 3);

  let restored = controller.restore().await.unwrap();

  assert!(restored.is_complete());
  assert_eq!(controller.state(), OverlayState::Clean);
  assert_eq!(tree(ws.target()), before);
  assert!(ws.manifest().is_empty());
}

#[test]
fn applying_twice_keeps_the_first_backup() {
  let ws = Workspace::new();
  write(ws.target(), "cfg/config.cfg", "original");
  write(ws.custom(), "cfg/config.cfg", "custom");
  write(ws.custom(), "sound/a.wav", "wave");
  let entries = scanned(&ws).snapshot();
  let engine = engine(&ws);

  engine.apply_all(&entries).unwrap();
  let after_first = tree(ws.target());
  let second = engine.apply_all(&entries).unwrap();

  assert!(second.is_success());
  assert_eq!(tree(ws.target()), after_first);
  let manifest = ws.manifest();
  assert_eq!(manifest.len(), 2);
  assert!(manifest.lookup(&key("cfg/config.cfg")).unwrap().had_original);
  assert!(!manifest.lookup(&key("sound/a.wav")).unwrap().had_original);

  let report = engine.restore_all().unwrap();
  assert!(report.is_complete());
  assert_eq!(read(ws.target(), "cfg/config.cfg"), "original");
  assert!(!ws.target().join("sound/a.wav").exists());
}

#[tokio::test]
async fn excluded_directory_contributes_nothing() {
  let ws = Workspace::new();
  write(ws.custom(), "cfg/config.cfg", "custom");
  write(ws.custom(), "backup/cfg/config.cfg", "old");
  write(ws.custom(), "backup/deep/nested.txt", "old");
  let mut settings = ws.settings();
  settings.filter = Arc::new(|path: &Path| path.file_name() != Some(OsStr::new("backup")));

  let mut controller = OverlayController::new(settings);
  controller.start().await.unwrap();
  controller.apply().await.unwrap();

  let keys: Vec<_> = controller
    .resources()
    .into_iter()
    .map(|entry| entry.relative_key.to_string())
    .collect();
  assert_eq!(keys, vec!["cfg/config.cfg"]);
  assert!(!ws.target().join("backup").exists());
  assert_eq!(ws.manifest().len(), 1);

  controller.restore().await.unwrap();
}

#[tokio::test]
async fn interrupted_overlay_is_restored_on_next_start() {
  let ws = Workspace::new();
  write(ws.target(), "cfg/config.cfg", "original");
  let source = write(ws.custom(), "cfg/config.cfg", "custom");
  let extra = write(ws.custom(), "cfg/extra.cfg", "extra");

  // A session that died after two persisted steps.
  {
    let engine = engine(&ws);
    engine.apply_file(&source, &key("cfg/config.cfg")).unwrap();
    engine.apply_file(&extra, &key("cfg/extra.cfg")).unwrap();
  }
  assert_eq!(ws.manifest().len(), 2);

  let mut controller = OverlayController::new(ws.settings());
  let report = controller.start().await.unwrap().expect("leftover manifest restored");

  assert!(report.is_complete());
  assert_eq!(report.restored.len(), 2);
  assert_eq!(controller.state(), OverlayState::Clean);
  assert_eq!(read(ws.target(), "cfg/config.cfg"), "original");
  assert!(!ws.target().join("cfg/extra.cfg").exists());
  assert!(ws.manifest().is_empty());
}

#[tokio::test]
async fn later_roots_win_shared_keys() {
  let ws = Workspace::new();
  let second = tempfile::TempDir::new().unwrap();
  write(ws.custom(), "cfg/config.cfg", "first");
  write(second.path(), "cfg/config.cfg", "second");
  let mut settings = ws.settings();
  settings.roots.push(second.path().to_path_buf());

  let mut controller = OverlayController::new(settings);
  controller.start().await.unwrap();
  controller.apply().await.unwrap();

  assert_eq!(read(ws.target(), "cfg/config.cfg"), "second");
  assert_eq!(ws.manifest().len(), 1);

  controller.restore().await.unwrap();
  assert!(!ws.target().join("cfg/config.cfg").exists());
}

#[test]
fn edits_in_a_lower_root_leave_the_winner_in_place() {
  let ws = Workspace::new();
  let high = tempfile::TempDir::new().unwrap();
  write(ws.custom(), "cfg/config.cfg", "low");
  write(high.path(), "cfg/config.cfg", "high");
  let mut registry = ResourceRegistry::new(
    vec![ws.custom().to_path_buf(), high.path().to_path_buf()],
    true,
    accept_all(),
    Arc::new(ZipOpener::default()),
  );
  registry.scan();
  let engine = engine(&ws);
  engine.apply_all(&registry.snapshot()).unwrap();
  assert_eq!(read(ws.target(), "cfg/config.cfg"), "high");

  let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
  registry.begin_session(tx);
  write(ws.custom(), "cfg/config.cfg", "low v2");
  registry.update_path(&ws.custom().join("cfg/config.cfg")).unwrap();
  while let Ok(item) = rx.try_recv() {
    engine.execute(&item).unwrap();
  }

  assert_eq!(read(ws.target(), "cfg/config.cfg"), "high");
}

#[tokio::test]
async fn zip_members_land_under_the_archive_name() {
  let ws = Workspace::new();
  write(ws.target(), "hud/resource/ui/hud.res", "stock");
  let archive = std::fs::File::create(ws.custom().join("hud.zip")).unwrap();
  let mut zip = zip::ZipWriter::new(archive);
  let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);
  zip.start_file("resource/ui/hud.res", options).unwrap();
  zip.write_all(b"zipped hud").unwrap();
  zip.start_file("materials/bg.vtf", options).unwrap();
  zip.write_all(b"bg").unwrap();
  zip.finish().unwrap();

  let mut controller = OverlayController::new(ws.settings());
  controller.start().await.unwrap();
  let report = controller.apply().await.unwrap();

  assert!(report.is_success());
  assert_eq!(read(ws.target(), "hud/resource/ui/hud.res"), "zipped hud");
  assert_eq!(read(ws.target(), "hud/materials/bg.vtf"), "bg");

  controller.restore().await.unwrap();
  assert_eq!(read(ws.target(), "hud/resource/ui/hud.res"), "stock");
  assert!(!ws.target().join("hud/materials/bg.vtf").exists());
}

#[tokio::test]
async fn flat_mode_copies_directories_whole() {
  let ws = Workspace::new();
  write(ws.custom(), "myhud/resource/ui/hud.res", "hud");
  write(ws.custom(), "myhud/scripts/hudlayout.res", "layout");
  write(ws.custom(), "loose.cfg", "loose");
  let mut settings = ws.settings();
  settings.recursive = false;

  let mut controller = OverlayController::new(settings);
  controller.start().await.unwrap();
  let report = controller.apply().await.unwrap();

  assert_eq!(report.copied.len(), 3);
  assert_eq!(controller.resources().len(), 2);
  assert_eq!(read(ws.target(), "myhud/scripts/hudlayout.res"), "layout");

  controller.restore().await.unwrap();
  assert!(!ws.target().join("myhud/scripts/hudlayout.res").exists());
  assert!(!ws.target().join("loose.cfg").exists());
}
