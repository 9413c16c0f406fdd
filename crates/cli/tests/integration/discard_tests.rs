//! Discard command integration tests.

use predicates::prelude::*;

use super::common::TestEnv;

#[test]
fn discard_forgets_backups_and_keeps_the_overlay() {
  let env = TestEnv::new();
  env.write_config("");
  env.write(&env.target(), "cfg/config.cfg", "original");
  env.write(&env.custom(), "cfg/config.cfg", "custom");
  env.apply_static();

  env
    .respack_cmd()
    .args(["discard", "--yes"])
    .assert()
    .success()
    .stdout(predicate::str::contains("Discarded 1 backup record(s)"));

  assert_eq!(env.read(&env.target(), "cfg/config.cfg"), "custom");
  assert!(!env.manifest_path().exists());
  assert!(!env.state_dir().join("originals/cfg/config.cfg").exists());

  env
    .respack_cmd()
    .arg("restore")
    .assert()
    .success()
    .stdout(predicate::str::contains("Nothing to restore"));
}

#[test]
fn discard_without_yes_refuses_non_interactive() {
  let env = TestEnv::new();
  env.write_config("");
  env.write(&env.custom(), "a.txt", "a");
  env.apply_static();

  env
    .respack_cmd()
    .arg("discard")
    .assert()
    .failure()
    .stderr(predicate::str::contains("--yes"));

  assert!(env.manifest_path().exists());
}
