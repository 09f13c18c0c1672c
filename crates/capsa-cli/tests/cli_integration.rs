//! CLI subprocess integration tests.
//!
//! These run the `capsa` binary against the mock engine, selected through a
//! config file, and check exit codes, stdout and stderr.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

struct Sandbox {
    dir: tempfile::TempDir,
    config: PathBuf,
}

impl Sandbox {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("config.toml");
        std::fs::write(
            &config,
            format!(
                "root = \"{}\"\n\n[engine]\nbackend = \"mock\"\n",
                dir.path().join("root").display()
            ),
        )
        .unwrap();
        Self { dir, config }
    }

    fn root(&self) -> PathBuf {
        self.dir.path().join("root")
    }

    fn capsa(&self, args: &[&str]) -> Output {
        capsa_bin()
            .arg("--config")
            .arg(&self.config)
            .args(args)
            .output()
            .unwrap()
    }

    fn write(&self, name: &str, content: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        std::fs::write(&path, content).unwrap();
        path
    }
}

fn capsa_bin() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_capsa"));
    cmd.env_remove("CAPSA_LOG");
    cmd
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

fn assert_fails_with(output: &Output, needle: &str) {
    assert_eq!(
        output.status.code(),
        Some(1),
        "expected exit 1. stderr: {}",
        stderr(output)
    );
    let err = stderr(output);
    assert!(err.contains("error:"), "stderr: {err}");
    assert!(err.contains(needle), "expected '{needle}' in stderr: {err}");
}

#[test]
fn cli_version_exits_zero() {
    let output = capsa_bin().arg("--version").output().unwrap();
    assert!(output.status.success());
    assert!(stdout(&output).contains("capsa"));
}

#[test]
fn cli_help_lists_lifecycle_commands() {
    let output = capsa_bin().arg("--help").output().unwrap();
    assert!(output.status.success());
    let out = stdout(&output);
    for cmd in ["install", "rebuild", "remove", "upgrade", "freeze", "unfreeze"] {
        assert!(out.contains(cmd), "help must list '{cmd}': {out}");
    }
}

#[test]
fn cli_install_without_build_arguments_fails() {
    let sandbox = Sandbox::new();
    let output = sandbox.capsa(&["install", "xeyes"]);
    assert_fails_with(&output, "no build arguments given");
    assert!(!sandbox.root().join("packages").exists());
}

#[test]
fn cli_install_with_positional_first_argument_fails() {
    let sandbox = Sandbox::new();
    let output = sandbox.capsa(&["install", "-", "xeyes"]);
    assert_fails_with(&output, "must be an option");
    assert!(!sandbox.root().join("packages").exists());
}

#[test]
fn cli_install_reports_missing_command() {
    let sandbox = Sandbox::new();
    let output = sandbox.capsa(&["install", "-", "--apk", "xeyes"]);
    assert_fails_with(&output, "no new command found");
}

#[test]
fn cli_install_rejects_invalid_name() {
    let sandbox = Sandbox::new();
    let output = sandbox.capsa(&["install", "../evil", "--apk", "x"]);
    assert_fails_with(&output, "invalid package name");
}

#[test]
fn cli_list_empty_root() {
    let sandbox = Sandbox::new();
    let output = sandbox.capsa(&["list"]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert!(stdout(&output).contains("no packages installed"));
}

#[test]
fn cli_list_json_is_an_array() {
    let sandbox = Sandbox::new();
    let output = sandbox.capsa(&["--json", "list"]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let parsed: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(parsed, serde_json::json!([]));
}

#[test]
fn cli_freeze_of_empty_root_prints_nothing() {
    let sandbox = Sandbox::new();
    let output = sandbox.capsa(&["freeze"]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert!(output.stdout.is_empty());
}

#[test]
fn cli_freeze_lists_hand_placed_package() {
    let sandbox = Sandbox::new();
    let pkg = sandbox.root().join("packages").join("hello");
    std::fs::create_dir_all(&pkg).unwrap();
    std::fs::write(pkg.join("buildargs"), "--apk hello\n").unwrap();

    let output = sandbox.capsa(&["freeze"]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert_eq!(stdout(&output), "capsa install hello --apk hello\n");
}

#[test]
fn cli_unfreeze_rejects_foreign_lines() {
    let sandbox = Sandbox::new();
    let file = sandbox.write("bad.freeze", "pip install requests\n");
    let output = sandbox.capsa(&["unfreeze", &file.to_string_lossy()]);
    assert_fails_with(&output, "line 1");
}

#[test]
fn cli_unfreeze_missing_file_fails() {
    let sandbox = Sandbox::new();
    let output = sandbox.capsa(&["unfreeze", "/nonexistent/packages.freeze"]);
    assert_fails_with(&output, "failed to read freeze file");
}

#[test]
fn cli_unfreeze_of_empty_file_leaves_empty_root() {
    let sandbox = Sandbox::new();
    let file = sandbox.write("empty.freeze", "# nothing pinned yet\n");
    let output = sandbox.capsa(&["unfreeze", &file.to_string_lossy()]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));

    let output = sandbox.capsa(&["--json", "list"]);
    let parsed: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(parsed, serde_json::json!([]));
    assert!(leftovers(sandbox.dir.path()).is_empty());
}

#[test]
fn cli_remove_of_missing_package_fails() {
    let sandbox = Sandbox::new();
    let output = sandbox.capsa(&["remove", "xeyes"]);
    assert_fails_with(&output, "not installed");
}

#[test]
fn cli_rebuild_of_missing_package_names_it() {
    let sandbox = Sandbox::new();
    let output = sandbox.capsa(&["rebuild", "xeyes"]);
    assert_fails_with(&output, "xeyes: package 'xeyes' is not installed");
}

#[test]
fn cli_rebuild_skips_package_without_build_arguments() {
    let sandbox = Sandbox::new();
    std::fs::create_dir_all(sandbox.root().join("packages").join("hello")).unwrap();
    let output = sandbox.capsa(&["--json", "rebuild", "hello"]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let parsed: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(parsed[0]["name"], "hello");
    assert_eq!(parsed[0]["outcome"]["status"], "skipped");
}

#[test]
fn cli_upgrade_of_empty_root_succeeds() {
    let sandbox = Sandbox::new();
    let output = sandbox.capsa(&["upgrade"]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
}

#[test]
fn cli_clean_reports_count() {
    let sandbox = Sandbox::new();
    let output = sandbox.capsa(&["--json", "clean"]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let parsed: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(parsed["removed_staging_entries"], 0);
}

#[test]
fn cli_unknown_config_key_fails() {
    let sandbox = Sandbox::new();
    let config = sandbox.write("broken.toml", "rooot = \"/tmp/x\"\n");
    let output = capsa_bin()
        .arg("--config")
        .arg(&config)
        .arg("list")
        .output()
        .unwrap();
    assert_fails_with(&output, "unknown field");
}

#[test]
fn cli_root_flag_overrides_config() {
    let sandbox = Sandbox::new();
    let other = sandbox.dir.path().join("other");
    let pkg = other.join("packages").join("hello");
    std::fs::create_dir_all(&pkg).unwrap();

    let output = sandbox.capsa(&["--root", &other.to_string_lossy(), "--json", "list"]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let parsed: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(parsed[0]["name"], "hello");
}

#[test]
fn cli_completions_bash() {
    let output = capsa_bin().args(["completions", "bash"]).output().unwrap();
    assert!(output.status.success());
    assert!(stdout(&output).contains("capsa"));
}

/// Replay siblings or journals left next to the root.
fn leftovers(dir: &Path) -> Vec<String> {
    std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|n| n.starts_with(".root."))
        .collect()
}
