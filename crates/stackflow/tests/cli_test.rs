#![allow(deprecated)] // TODO: cargo_bin → cargo_bin_cmd! へ移行

mod common;

use assert_cmd::Command;
use common::{CYCLIC_KDL, NETWORK_KDL, TestProject};
use predicates::prelude::*;

/// CLIヘルプが正しく表示されることを確認
#[test]
fn test_cli_help() {
    let mut cmd = Command::cargo_bin("stack").unwrap();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("KDLで宣言する"))
        .stdout(predicate::str::contains("validate"))
        .stdout(predicate::str::contains("plan"))
        .stdout(predicate::str::contains("apply"))
        .stdout(predicate::str::contains("destroy"));
}

/// バージョン表示が正しく動作することを確認
#[test]
fn test_cli_version() {
    let mut cmd = Command::cargo_bin("stack").unwrap();
    cmd.arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains("stackflow"));
}

/// applyコマンドのヘルプが正しく表示されることを確認
#[test]
fn test_apply_help() {
    let mut cmd = Command::cargo_bin("stack").unwrap();
    cmd.arg("apply")
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("[PLAN]"))
        .stdout(predicate::str::contains("--yes"));
}

/// 不正なコマンドでエラーになることを確認
#[test]
fn test_invalid_command() {
    let mut cmd = Command::cargo_bin("stack").unwrap();
    cmd.arg("invalid-command").assert().failure();
}

/// スタックファイルが無いディレクトリではエラーになることを確認
#[test]
fn test_validate_without_stack_file() {
    let project = TestProject::new();
    project
        .stack()
        .env("XDG_CONFIG_HOME", project.path())
        .env("HOME", project.path())
        .arg("validate")
        .assert()
        .failure();
}

#[test]
fn test_validate_prints_summary() {
    let project = TestProject::with_stack(NETWORK_KDL);
    project
        .stack()
        .arg("validate")
        .assert()
        .success()
        .stdout(predicate::str::contains("✓ スタックファイルは正常です"))
        .stdout(predicate::str::contains("リソース: 3個"))
        .stdout(predicate::str::contains("実行順序: 2段階"))
        .stdout(predicate::str::contains("1. vpc"));
}

#[test]
fn test_validate_rejects_cycle() {
    let project = TestProject::with_stack(CYCLIC_KDL);
    project
        .stack()
        .arg("validate")
        .assert()
        .failure()
        .stderr(predicate::str::contains("循環依存"));
}

#[test]
fn test_synth_outputs_document() {
    let project = TestProject::with_stack(NETWORK_KDL);
    let output = project.stack().arg("synth").output().unwrap();
    assert!(output.status.success());

    let document: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(document["stack"], "network");
    let resources = document["resources"].as_array().unwrap();
    assert_eq!(resources.len(), 3);
    assert_eq!(resources[0]["id"], "vpc");
}

#[test]
fn test_synth_applies_variable_override() {
    let project = TestProject::with_stack(NETWORK_KDL);
    project
        .stack()
        .args(["synth", "--var", "cidr=172.16.0.0/16"])
        .assert()
        .success()
        .stdout(predicate::str::contains("172.16.0.0/16"))
        .stdout(predicate::str::contains("10.0.0.0/16").not());
}

#[test]
fn test_synth_writes_file() {
    let project = TestProject::with_stack(NETWORK_KDL);
    let out = project.path().join("synth.json");
    project
        .stack()
        .arg("synth")
        .arg("--out")
        .arg(&out)
        .assert()
        .success();
    assert!(out.exists());
}

#[test]
fn test_plan_on_empty_state() {
    let project = TestProject::with_stack(NETWORK_KDL);
    project
        .stack()
        .arg("plan")
        .assert()
        .success()
        .stdout(predicate::str::contains("+ vpc"))
        .stdout(predicate::str::contains("計画: 3 作成, 0 更新, 0 削除"));

    // plan はステートを書き込まない
    assert!(!project.state_dir().join("resources.json").exists());
}

#[test]
fn test_apply_requires_confirmation() {
    let project = TestProject::with_stack(NETWORK_KDL);
    project
        .stack()
        .arg("apply")
        .assert()
        .success()
        .stdout(predicate::str::contains("--yes"));

    project
        .stack()
        .args(["state", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("記録されているリソースはありません"));
}

#[test]
fn test_apply_then_zero_diff() {
    let project = TestProject::with_stack(NETWORK_KDL);
    project
        .stack()
        .args(["apply", "--yes"])
        .assert()
        .success()
        .stdout(predicate::str::contains("✓ 適用が完了しました: 3 件"))
        .stdout(predicate::str::contains("vpc_id = vpc-"));

    project
        .stack()
        .args(["apply", "--yes"])
        .assert()
        .success()
        .stdout(predicate::str::contains("変更はありません"));

    project
        .stack()
        .arg("plan")
        .assert()
        .success()
        .stdout(predicate::str::contains("変更はありません"));
}

#[test]
fn test_output_and_state_after_apply() {
    let project = TestProject::with_stack(NETWORK_KDL);
    project.stack().args(["apply", "--yes"]).assert().success();

    let outputs = project.output_json();
    let vpc_id = outputs["vpc_id"].as_str().unwrap().to_string();
    assert!(vpc_id.starts_with("vpc-"));

    project
        .stack()
        .args(["output", "vpc_id"])
        .assert()
        .success()
        .stdout(predicate::str::diff(format!("{}\n", vpc_id)));

    project
        .stack()
        .args(["output", "missing"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("出力値が見つかりません"));

    project
        .stack()
        .args(["state", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("aws_internet_gateway"))
        .stdout(predicate::str::contains(vpc_id.as_str()));

    project
        .stack()
        .args(["state", "show", "subnet1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("10.0.3.0/24"))
        .stdout(predicate::str::contains(vpc_id.as_str()));
}

#[test]
fn test_update_after_stack_change() {
    let project = TestProject::with_stack(NETWORK_KDL);
    project.stack().args(["apply", "--yes"]).assert().success();

    project.write_stack_kdl(&NETWORK_KDL.replace("10.0.3.0/24", "10.0.5.0/24"));
    project
        .stack()
        .arg("plan")
        .assert()
        .success()
        .stdout(predicate::str::contains("~ subnet1"))
        .stdout(predicate::str::contains("計画: 0 作成, 1 更新, 0 削除 (2 変更なし)"));
}

#[test]
fn test_failed_action_exits_with_error_and_retry_converges() {
    let project = TestProject::with_stack(NETWORK_KDL);
    project
        .stack()
        .env("STACK_LOCAL_FAULTS", "aws_internet_gateway:create:permanent")
        .args(["apply", "--yes"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("✗ 作成 igw"))
        .stdout(predicate::str::contains("✓ 作成 subnet1"));

    project
        .stack()
        .args(["apply", "--yes"])
        .assert()
        .success()
        .stdout(predicate::str::contains("+ igw"))
        .stdout(predicate::str::contains("✓ 適用が完了しました: 1 件"));
}

#[test]
fn test_saved_plan_is_rejected_when_stale() {
    let project = TestProject::with_stack(NETWORK_KDL);
    let plan_file = project.path().join("plan.json");
    project
        .stack()
        .arg("plan")
        .arg("--out")
        .arg(&plan_file)
        .assert()
        .success();

    project
        .stack()
        .arg("apply")
        .arg(&plan_file)
        .assert()
        .success()
        .stdout(predicate::str::contains("✓ 適用が完了しました: 3 件"));

    project
        .stack()
        .arg("apply")
        .arg(&plan_file)
        .assert()
        .failure();
}

#[test]
fn test_destroy_removes_everything() {
    let project = TestProject::with_stack(NETWORK_KDL);
    project.stack().args(["apply", "--yes"]).assert().success();

    project
        .stack()
        .arg("destroy")
        .assert()
        .success()
        .stdout(predicate::str::contains("--yes"));

    project
        .stack()
        .args(["destroy", "--yes"])
        .assert()
        .success()
        .stdout(predicate::str::contains("- vpc"))
        .stdout(predicate::str::contains("✓ 適用が完了しました: 3 件"));

    project
        .stack()
        .args(["state", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("記録されているリソースはありません"));
}

#[test]
fn test_refresh_without_drift() {
    let project = TestProject::with_stack(NETWORK_KDL);
    project.stack().args(["apply", "--yes"]).assert().success();

    project
        .stack()
        .arg("refresh")
        .assert()
        .success()
        .stdout(predicate::str::contains("差分はありません (3 件のリソースを確認)"));
}

#[test]
fn test_unlock_without_lock() {
    let project = TestProject::with_stack(NETWORK_KDL);
    project
        .stack()
        .args(["state", "unlock", "some-token", "--force"])
        .assert()
        .success()
        .stdout(predicate::str::contains("ロックは取得されていません"));
}

#[test]
fn test_unsupported_provider() {
    let project = TestProject::with_stack(&format!(
        "provider \"gcp\" {{\n    region \"europe-west1\"\n}}\n{}",
        NETWORK_KDL.replace("stack \"network\"", "")
    ));
    project
        .stack()
        .arg("plan")
        .assert()
        .failure()
        .stderr(predicate::str::contains("未対応のプロバイダーです: gcp"));
}
