use assert_cmd::Command;
use assert_fs::prelude::*;
use assert_fs::TempDir;
use predicates::prelude::*;

const TARGETS: &str = concat!(
    r#"{"id":"//app:main","kind":"java_binary","srcs":["app/Main.java"],"dependencies":[{"label":"//lib:lib"}]}"#,
    "\n",
    r#"{"id":"//lib:lib","kind":"java_library","srcs":["lib/Lib.java"]}"#,
    "\n"
);

fn bsync() -> Command {
    Command::new(assert_cmd::cargo::cargo_bin!("bsync"))
}

/// A workspace whose "Bazel" prints `targets.jsonl`.
fn workspace() -> TempDir {
    let temp = TempDir::new().unwrap();
    temp.child("targets.jsonl").write_str(TARGETS).unwrap();
    temp.child("bsync.toml")
        .write_str(
            r#"
[server.aspect]
program = "sh"
args = ["-c", "cat targets.jsonl"]
"#,
        )
        .unwrap();
    temp
}

fn json(output: &std::process::Output) -> serde_json::Value {
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).unwrap()
}

#[test]
fn help_mentions_commands() {
    bsync().arg("--help").assert().success().stdout(
        predicate::str::contains("sync")
            .and(predicate::str::contains("status"))
            .and(predicate::str::contains("hashes")),
    );
}

#[test]
fn sync_then_resync_reports_no_changes() {
    let temp = workspace();

    let first = json(
        &bsync()
            .args(["sync", "--json", "--workspace"])
            .arg(temp.path())
            .output()
            .unwrap(),
    );
    assert_eq!(first["outcome"], "success");
    assert_eq!(first["stats"]["added"].as_u64().unwrap(), 2);

    let second = json(
        &bsync()
            .args(["sync", "--json", "--workspace"])
            .arg(temp.path())
            .output()
            .unwrap(),
    );
    assert_eq!(second["outcome"], "success");
    assert_eq!(second["stats"]["unchanged"].as_u64().unwrap(), 2);
    assert_eq!(second["stats"]["invalidated"].as_u64().unwrap(), 0);

    let status = json(
        &bsync()
            .args(["status", "--json", "--workspace"])
            .arg(temp.path())
            .output()
            .unwrap(),
    );
    assert_eq!(status["targets"].as_u64().unwrap(), 2);
    assert_eq!(status["modules"].as_u64().unwrap(), 2);
    assert_eq!(status["executable_targets"].as_u64().unwrap(), 1);

    bsync()
        .args(["hashes", "--workspace"])
        .arg(temp.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("//app:main").and(predicate::str::contains("//lib:lib")));
}

#[test]
fn partial_scope_without_targets_is_rejected() {
    let temp = workspace();
    bsync()
        .args(["sync", "--scope", "partial", "--workspace"])
        .arg(temp.path())
        .assert()
        .code(2)
        .stderr(predicate::str::contains("at least one --target"));
}

#[test]
fn failing_bazel_command_fails_the_sync() {
    let temp = workspace();
    let output = bsync()
        .args(["sync", "--json", "--aspect-command", "sh -c 'exit 3'", "--workspace"])
        .arg(temp.path())
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
    let result: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(result["outcome"], "failure");
    assert!(!result["failures"].as_array().unwrap().is_empty());
}
