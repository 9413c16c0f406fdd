//! Restore command integration tests.

use predicates::prelude::*;

use super::common::TestEnv;

#[test]
fn restore_undoes_apply() {
  let env = TestEnv::new();
  env.write_config("");
  env.write(&env.target(), "cfg/config.cfg", "original");
  env.write(&env.custom(), "cfg/config.cfg", "custom");
  env.write(&env.custom(), "sound/new.wav", "wave");
  env.apply_static();

  env
    .respack_cmd()
    .arg("restore")
    .assert()
    .success()
    .stdout(predicate::str::contains("Restored 2 file(s)"));

  assert_eq!(env.read(&env.target(), "cfg/config.cfg"), "original");
  assert!(!env.target().join("sound/new.wav").exists());
  assert!(!env.manifest_path().exists());
}

#[test]
fn restore_is_idempotent() {
  let env = TestEnv::new();
  env.write_config("");
  env.write(&env.custom(), "a.txt", "a");
  env.apply_static();

  env.respack_cmd().arg("restore").assert().success();
  env
    .respack_cmd()
    .arg("restore")
    .assert()
    .success()
    .stdout(predicate::str::contains("Nothing to restore"));
}

#[test]
fn restore_does_not_need_resource_folders() {
  let env = TestEnv::new();
  env.write_config("");
  env.write(&env.custom(), "a.txt", "a");
  env.apply_static();
  std::fs::remove_dir_all(env.custom()).unwrap();

  env.respack_cmd().arg("restore").assert().success();

  assert!(!env.target().join("a.txt").exists());
}

#[test]
fn restore_reports_tampered_backup() {
  let env = TestEnv::new();
  env.write_config("");
  env.write(&env.target(), "cfg/config.cfg", "original");
  env.write(&env.custom(), "cfg/config.cfg", "custom");
  env.apply_static();
  env.write(&env.state_dir(), "originals/cfg/config.cfg", "tampered");

  env
    .respack_cmd()
    .arg("restore")
    .assert()
    .failure()
    .stderr(predicate::str::contains("could not be restored"));

  assert!(env.manifest_path().exists());
}

#[test]
fn restore_follows_the_recorded_target() {
  let env = TestEnv::new();
  env.write_config("");
  env.write(&env.custom(), "autoexec.cfg", "custom");
  env.apply_static();
  std::fs::write(
    env.config_dir().join("config.toml"),
    format!("roots = ['{}']\n", env.custom().display()),
  )
  .unwrap();

  env.respack_cmd().arg("restore").assert().success();

  assert!(!env.target().join("autoexec.cfg").exists());
  assert!(!env.manifest_path().exists());
}

#[test]
fn restore_refuses_a_different_target() {
  let env = TestEnv::new();
  env.write_config("");
  env.write(&env.custom(), "autoexec.cfg", "custom");
  env.apply_static();
  let other = env.temp.path().join("other");
  env.write(&other, "autoexec.cfg", "mine");

  env
    .respack_cmd()
    .arg("restore")
    .arg("--target")
    .arg(&other)
    .assert()
    .failure()
    .stderr(predicate::str::contains("backup records belong to"));

  assert_eq!(env.read(&other, "autoexec.cfg"), "mine");
  assert_eq!(env.read(&env.target(), "autoexec.cfg"), "custom");
  assert!(env.manifest_path().exists());
}
