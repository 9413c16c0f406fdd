//! Apply command integration tests.

use predicates::prelude::*;

use super::common::TestEnv;

#[test]
fn apply_copies_resources_and_records_backups() {
  let env = TestEnv::new();
  env.write_config("");
  env.write(&env.target(), "cfg/config.cfg", "original");
  env.write(&env.custom(), "cfg/config.cfg", "custom");
  env.write(&env.custom(), "materials/a.vtf", "texture");

  env
    .respack_cmd()
    .args(["apply", "--no-watch"])
    .assert()
    .success()
    .stdout(predicate::str::contains("Applied 2 file(s)"))
    .stdout(predicate::str::contains("1 existing file(s) backed up"));

  assert_eq!(env.read(&env.target(), "cfg/config.cfg"), "custom");
  assert_eq!(env.read(&env.target(), "materials/a.vtf"), "texture");

  let manifest: serde_json::Value =
    serde_json::from_str(&std::fs::read_to_string(env.manifest_path()).unwrap()).unwrap();
  assert_eq!(manifest["version"], 2);
  assert_eq!(manifest["target"], env.target().display().to_string());
  assert_eq!(manifest["entries"]["cfg/config.cfg"]["had_original"], true);
  assert_eq!(manifest["entries"]["materials/a.vtf"]["had_original"], false);
}

#[test]
fn apply_again_restores_the_previous_session_first() {
  let env = TestEnv::new();
  env.write_config("");
  env.write(&env.target(), "cfg/config.cfg", "original");
  env.write(&env.custom(), "cfg/config.cfg", "custom");
  env.apply_static();

  env.write(&env.custom(), "cfg/config.cfg", "custom v2");
  env
    .respack_cmd()
    .args(["apply", "--no-watch"])
    .assert()
    .success()
    .stdout(predicate::str::contains("left by a previous session"));

  assert_eq!(env.read(&env.target(), "cfg/config.cfg"), "custom v2");

  env.respack_cmd().arg("restore").assert().success();
  assert_eq!(env.read(&env.target(), "cfg/config.cfg"), "original");
}

#[test]
fn command_line_overrides_config() {
  let env = TestEnv::new();
  env.write_config("");
  let other = env.temp.path().join("other");
  env.write(&other, "only-here.txt", "other root");
  env.write(&other, "skip/ignored.txt", "ignored");
  env.write(&env.custom(), "from-config.txt", "config root");

  env
    .respack_cmd()
    .args(["apply", "--no-watch", "--exclude", "skip", "--root"])
    .arg(&other)
    .assert()
    .success();

  assert_eq!(env.read(&env.target(), "only-here.txt"), "other root");
  assert!(!env.target().join("from-config.txt").exists());
  assert!(!env.target().join("skip").exists());
}

#[test]
fn apply_rejects_missing_target() {
  let env = TestEnv::new();
  env.write_config("");
  env.write(&env.custom(), "a.txt", "a");

  env
    .respack_cmd()
    .args(["apply", "--no-watch", "--target"])
    .arg(env.temp.path().join("missing"))
    .assert()
    .failure()
    .stderr(predicate::str::contains("Apply failed"));

  assert!(!env.manifest_path().exists());
}

#[test]
fn apply_rejects_bad_exclude_glob() {
  let env = TestEnv::new();
  env.write_config("exclude = ['a[']\n");

  env
    .respack_cmd()
    .args(["apply", "--no-watch"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("Invalid configuration"));
}
