use std::fs;

use respack_lib::key::RelativeKey;
use respack_lib::overlay::{OverlayController, OverlayState, StatusEvent};

use super::common::{Workspace, read, wait_for, write};

fn key(s: &str) -> RelativeKey {
  RelativeKey::try_from(s).unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn new_texture_is_tracked_then_removed_with_its_source() {
  let ws = Workspace::new();
  let source = write(ws.custom(), "materials/a.vtf", "VTF\0texture");

  let mut controller = OverlayController::new(ws.live_settings());
  let mut status = controller.subscribe();
  controller.start().await.unwrap();
  controller.apply().await.unwrap();

  let manifest = ws.manifest();
  assert_eq!(manifest.len(), 1);
  let record = manifest.lookup(&key("materials/a.vtf")).unwrap();
  assert!(!record.had_original);
  assert!(record.original.is_none());
  assert_eq!(read(ws.target(), "materials/a.vtf"), "VTF\0texture");

  fs::remove_file(&source).unwrap();
  wait_for(&mut status, |e| matches!(e, StatusEvent::Restored { key: k } if *k == key("materials/a.vtf"))).await;

  assert!(controller.resources().is_empty());
  assert!(!ws.target().join("materials/a.vtf").exists());
  assert!(ws.manifest().is_empty());

  controller.shutdown().await.unwrap();
  assert_eq!(controller.state(), OverlayState::Clean);
}

#[tokio::test]
async fn replaced_config_comes_back_byte_for_byte() {
  let ws = Workspace::new();
  let original: Vec<u8> = (0..=255u8).cycle().take(4096).collect();
  fs::create_dir_all(ws.target().join("cfg")).unwrap();
  fs::write(ws.target().join("cfg/config.cfg"), &original).unwrap();
  write(ws.custom(), "cfg/config.cfg", "bind w +forward");

  let mut controller = OverlayController::new(ws.settings());
  controller.start().await.unwrap();
  controller.apply().await.unwrap();

  let manifest = ws.manifest();
  let record = manifest.lookup(&key("cfg/config.cfg")).unwrap();
  assert!(record.had_original);
  assert!(record.original.as_ref().is_some_and(|p| p.exists()));
  assert!(record.checksum.is_some());
  assert_eq!(read(ws.target(), "cfg/config.cfg"), "bind w +forward");

  controller.restore().await.unwrap();

  assert_eq!(fs::read(ws.target().join("cfg/config.cfg")).unwrap(), original);
  assert!(ws.manifest().is_empty());
}
