//! Status command integration tests.

use predicates::prelude::*;

use super::common::TestEnv;

#[test]
fn status_lists_pending_keys() {
  let env = TestEnv::new();
  env.write_config("");
  env.write(&env.target(), "cfg/config.cfg", "original");
  env.write(&env.custom(), "cfg/config.cfg", "custom");
  env.write(&env.custom(), "materials/a.vtf", "texture");
  env.apply_static();

  env
    .respack_cmd()
    .arg("status")
    .assert()
    .success()
    .stdout(predicate::str::contains("2 file(s) waiting to be restored"))
    .stdout(predicate::str::contains("~ cfg/config.cfg"))
    .stdout(predicate::str::contains("+ materials/a.vtf"));
}

#[test]
fn status_json_describes_records() {
  let env = TestEnv::new();
  env.write_config("");
  env.write(&env.target(), "cfg/config.cfg", "original");
  env.write(&env.custom(), "cfg/config.cfg", "custom");
  env.apply_static();

  let output = env.respack_cmd().args(["status", "--json"]).output().unwrap();

  assert!(output.status.success());
  let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
  let pending = json["pending"].as_array().unwrap();
  assert_eq!(pending.len(), 1);
  assert_eq!(pending[0]["key"], "cfg/config.cfg");
  assert_eq!(pending[0]["had_original"], true);
  assert_eq!(pending[0]["checksum"].as_str().unwrap().len(), 64);
  assert_eq!(json["preserved_bytes"], 8);
}

#[test]
fn status_after_restore_is_empty() {
  let env = TestEnv::new();
  env.write_config("");
  env.write(&env.custom(), "a.txt", "a");
  env.apply_static();
  env.respack_cmd().arg("restore").assert().success();

  env
    .respack_cmd()
    .arg("status")
    .assert()
    .success()
    .stdout(predicate::str::contains("Nothing to restore"));
}
