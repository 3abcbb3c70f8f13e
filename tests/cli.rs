use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn armadactl() -> Command {
    #[allow(deprecated)]
    Command::cargo_bin("armadactl").unwrap()
}

#[test]
fn test_help_exits_successfully() {
    armadactl().arg("--help").assert().success();
}

#[test]
fn test_version_exits_successfully() {
    armadactl()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("armadactl"));
}

#[test]
fn test_no_args_shows_usage() {
    armadactl()
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn test_unknown_subcommand_fails() {
    armadactl()
        .arg("nonexistent")
        .assert()
        .failure()
        .stderr(predicate::str::contains("unrecognized subcommand"));
}

#[test]
fn test_help_lists_all_subcommands() {
    let assert = armadactl().arg("--help").assert().success();
    let output = String::from_utf8(assert.get_output().stdout.clone()).unwrap();

    for cmd in ["serve", "keys"] {
        assert!(
            output.contains(cmd),
            "Help output should list '{}' subcommand",
            cmd
        );
    }
}

#[test]
fn test_serve_help() {
    armadactl()
        .args(["serve", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--config"));
}

#[test]
fn test_keys_help_lists_operations() {
    let assert = armadactl().args(["keys", "--help"]).assert().success();
    let output = String::from_utf8(assert.get_output().stdout.clone()).unwrap();

    for cmd in ["generate", "list", "info", "validate", "delete", "backup"] {
        assert!(
            output.contains(cmd),
            "Keys help should list '{}' operation",
            cmd
        );
    }
}

#[test]
fn test_keys_generate_list_delete_roundtrip() {
    let tmp = TempDir::new().unwrap();
    let store = tmp.path().to_str().unwrap();

    armadactl()
        .args(["keys", "--store-dir", store, "generate", "worker"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Generated key 'worker'"))
        .stdout(predicate::str::contains("ssh-ed25519"));

    armadactl()
        .args(["keys", "--store-dir", store, "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("worker"));

    armadactl()
        .args(["keys", "--store-dir", store, "validate", "worker"])
        .assert()
        .success()
        .stdout(predicate::str::contains("valid"));

    armadactl()
        .args(["keys", "--store-dir", store, "delete", "worker"])
        .assert()
        .success();

    armadactl()
        .args(["keys", "--store-dir", store, "list"])
        .assert()
        .success()
        .stdout(predicate::str::is_empty());
}

#[test]
fn test_keys_generate_duplicate_fails() {
    let tmp = TempDir::new().unwrap();
    let store = tmp.path().to_str().unwrap();

    armadactl()
        .args(["keys", "--store-dir", store, "generate", "worker"])
        .assert()
        .success();
    armadactl()
        .args(["keys", "--store-dir", store, "generate", "worker"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));
}

#[test]
fn test_keys_backup_missing_key_fails() {
    let tmp = TempDir::new().unwrap();
    let store = tmp.path().to_str().unwrap();

    armadactl()
        .args(["keys", "--store-dir", store, "backup", "ghost"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn test_keys_info_flags_valid_key() {
    let tmp = TempDir::new().unwrap();
    let store = tmp.path().to_str().unwrap();

    armadactl()
        .args(["keys", "--store-dir", store, "generate", "worker"])
        .assert()
        .success();
    armadactl()
        .args(["keys", "--store-dir", store, "info"])
        .assert()
        .success()
        .stdout(predicate::str::contains("worker"))
        .stdout(predicate::str::contains("valid"));
}
