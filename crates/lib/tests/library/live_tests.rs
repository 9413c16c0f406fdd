use std::fs;

use respack_lib::key::RelativeKey;
use respack_lib::overlay::{OverlayController, OverlayState, StatusEvent};

use super::common::{Workspace, eventually, read, wait_for, write};

fn key(s: &str) -> RelativeKey {
  RelativeKey::try_from(s).unwrap()
}

fn applied(event: &StatusEvent, expected: &RelativeKey) -> bool {
  matches!(event, StatusEvent::Applied { key, .. } if key == expected)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn new_and_edited_files_follow_the_source() {
  let ws = Workspace::new();
  write(ws.target(), "cfg/autoexec.cfg", "stock");
  write(ws.custom(), "cfg/config.cfg", "custom");

  let mut controller = OverlayController::new(ws.live_settings());
  let mut status = controller.subscribe();
  controller.start().await.unwrap();
  controller.apply().await.unwrap();
  assert!(controller.is_live());

  write(ws.custom(), "cfg/autoexec.cfg", "mine");
  wait_for(&mut status, |e| applied(e, &key("cfg/autoexec.cfg"))).await;
  assert_eq!(read(ws.target(), "cfg/autoexec.cfg"), "mine");
  assert!(ws.manifest().lookup(&key("cfg/autoexec.cfg")).unwrap().had_original);

  // Polling compares modification times at one-second resolution.
  tokio::time::sleep(std::time::Duration::from_millis(1100)).await;
  write(ws.custom(), "cfg/config.cfg", "custom v2");
  let target = ws.target().to_path_buf();
  eventually(|| fs::read_to_string(target.join("cfg/config.cfg")).is_ok_and(|c| c == "custom v2")).await;

  controller.shutdown().await.unwrap();

  assert_eq!(controller.state(), OverlayState::Clean);
  assert!(!controller.is_live());
  assert_eq!(read(ws.target(), "cfg/autoexec.cfg"), "stock");
  assert!(!ws.target().join("cfg/config.cfg").exists());
  assert!(ws.manifest().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn renamed_source_moves_the_overlay() {
  let ws = Workspace::new();
  let old = write(ws.custom(), "sound/old.wav", "wave");

  let mut controller = OverlayController::new(ws.live_settings());
  let mut status = controller.subscribe();
  controller.start().await.unwrap();
  controller.apply().await.unwrap();

  fs::rename(&old, ws.custom().join("sound/new.wav")).unwrap();
  wait_for(&mut status, |e| applied(e, &key("sound/new.wav"))).await;
  eventually(|| ws.manifest().keys() == vec![key("sound/new.wav")]).await;

  assert!(!ws.target().join("sound/old.wav").exists());
  assert_eq!(read(ws.target(), "sound/new.wav"), "wave");

  controller.restore().await.unwrap();
  assert!(!ws.target().join("sound/new.wav").exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn new_folder_contents_are_applied() {
  let ws = Workspace::new();
  write(ws.custom(), "keep.txt", "keep");

  let mut controller = OverlayController::new(ws.live_settings());
  let mut status = controller.subscribe();
  controller.start().await.unwrap();
  controller.apply().await.unwrap();

  write(ws.custom(), "materials/models/skin.vmt", "skin");
  wait_for(&mut status, |e| applied(e, &key("materials/models/skin.vmt"))).await;

  assert_eq!(read(ws.target(), "materials/models/skin.vmt"), "skin");

  controller.restore().await.unwrap();
  assert!(!ws.target().join("materials/models/skin.vmt").exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn restore_stops_following_changes() {
  let ws = Workspace::new();
  write(ws.custom(), "a.txt", "a");

  let mut controller = OverlayController::new(ws.live_settings());
  controller.start().await.unwrap();
  controller.apply().await.unwrap();
  controller.restore().await.unwrap();

  write(ws.custom(), "b.txt", "b");
  tokio::time::sleep(std::time::Duration::from_millis(300)).await;

  assert!(!controller.is_live());
  assert!(!ws.target().join("b.txt").exists());
  assert!(ws.manifest().is_empty());
}
