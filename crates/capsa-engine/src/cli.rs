use crate::engine::BuildEngine;
use crate::EngineError;
use capsa_schema::SnapshotId;
use std::path::Path;
use std::process::{Command, Stdio};
use tracing::debug;

/// Drives the build engine through its command-line interface, one child
/// process per call.
pub struct CliEngine {
    program: String,
    bootstrap: Vec<Vec<String>>,
}

impl CliEngine {
    pub fn new(program: impl Into<String>, bootstrap: Vec<Vec<String>>) -> Self {
        Self {
            program: program.into(),
            bootstrap,
        }
    }

    fn describe(&self, args: &[&str]) -> String {
        let mut parts = vec![self.program.as_str()];
        parts.extend_from_slice(args);
        parts.join(" ")
    }

    fn spawn_error(&self, source: std::io::Error) -> EngineError {
        EngineError::Spawn {
            program: self.program.clone(),
            source,
        }
    }

    /// Run with stdout captured. The engine's progress output on stderr is
    /// passed through to the user unless `quiet` is set, in which case it is
    /// captured for the error message.
    fn capture(&self, args: &[&str], quiet: bool) -> Result<String, EngineError> {
        debug!("engine: {}", self.describe(args));
        let output = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .stderr(if quiet {
                Stdio::piped()
            } else {
                Stdio::inherit()
            })
            .output()
            .map_err(|e| self.spawn_error(e))?;

        if !output.status.success() {
            return Err(EngineError::CommandFailed {
                command: self.describe(args),
                status: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Run with all streams inherited.
    fn passthrough(&self, args: &[&str]) -> Result<(), EngineError> {
        debug!("engine: {}", self.describe(args));
        let status = Command::new(&self.program)
            .args(args)
            .status()
            .map_err(|e| self.spawn_error(e))?;
        if !status.success() {
            return Err(EngineError::CommandFailed {
                command: self.describe(args),
                status: status.code(),
                stderr: String::new(),
            });
        }
        Ok(())
    }

    fn single_line(&self, args: &[&str], stdout: &str) -> Result<String, EngineError> {
        stdout
            .lines()
            .map(str::trim)
            .rfind(|l| !l.is_empty())
            .map(str::to_owned)
            .ok_or_else(|| EngineError::MalformedOutput {
                command: self.describe(args),
                output: stdout.to_owned(),
            })
    }
}

impl BuildEngine for CliEngine {
    fn name(&self) -> &'static str {
        "cli"
    }

    fn bootstrap(&self) -> &[Vec<String>] {
        &self.bootstrap
    }

    fn init(&self) -> Result<(), EngineError> {
        self.capture(&["init"], true).map(|_| ())
    }

    fn build_raw(&self, args: &[String]) -> Result<SnapshotId, EngineError> {
        let mut argv = vec!["build"];
        argv.extend(args.iter().map(String::as_str));
        let stdout = self.capture(&argv, false)?;
        let id = self.single_line(&argv, &stdout)?;
        debug!("engine built snapshot {id}");
        Ok(SnapshotId::new(id))
    }

    fn shallow_copy(&self, snapshot: &SnapshotId, dest: &Path) -> Result<(), EngineError> {
        let dest = dest.to_string_lossy();
        self.capture(&["shallow-copy", snapshot.as_str(), &dest], true)
            .map(|_| ())
    }

    fn map_get(&self, name: &str) -> Result<Option<SnapshotId>, EngineError> {
        let stdout = self.capture(&["map", name], true)?;
        let id = stdout.trim();
        Ok((!id.is_empty()).then(|| SnapshotId::new(id)))
    }

    fn map_set(&self, name: &str, snapshot: &SnapshotId) -> Result<(), EngineError> {
        self.capture(&["map", name, snapshot.as_str()], true)
            .map(|_| ())
    }

    fn map_release(&self, name: &str) -> Result<(), EngineError> {
        self.capture(&["map", name, ""], true).map(|_| ())
    }

    fn run(&self, snapshot: &SnapshotId, command: &[String]) -> Result<Vec<String>, EngineError> {
        let mut argv = vec!["run", snapshot.as_str()];
        argv.extend(command.iter().map(String::as_str));
        let stdout = self.capture(&argv, true)?;
        Ok(stdout.lines().map(str::to_owned).collect())
    }

    fn nodepath(&self, snapshot: &SnapshotId) -> Result<String, EngineError> {
        let argv = ["nodepath", snapshot.as_str()];
        let stdout = self.capture(&argv, true)?;
        self.single_line(&argv, &stdout)
    }

    fn purge(&self) -> Result<(), EngineError> {
        self.passthrough(&["purge", "--yes"])
    }

    fn clean(&self) -> Result<(), EngineError> {
        self.passthrough(&["clean"])
    }

    fn sudo(&self, command: &[String]) -> Result<(), EngineError> {
        let mut argv = vec!["sudo"];
        argv.extend(command.iter().map(String::as_str));
        self.passthrough(&argv)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    /// A fake engine program that logs its argv and answers a few queries.
    fn fake_engine(dir: &Path) -> String {
        let script = dir.join("fake-engine");
        let log = dir.join("argv.log");
        std::fs::write(
            &script,
            format!(
                r#"#!/bin/sh
printf '%s\n' "$*" >> '{log}'
case "$1" in
  build) echo "step 1/2" >&2; echo "Successfully built"; echo 42 ;;
  nodepath) echo /data/layer/0/7/8/42 ;;
  map) [ "$#" -eq 2 ] && echo 42 ;;
  run) shift 2; printf '/usr/bin/a\n/usr/bin/b\n' ;;
  fail) echo "boom" >&2; exit 3 ;;
esac
exit 0
"#,
                log = log.display()
            ),
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        script.to_string_lossy().into_owned()
    }

    fn bootstrap() -> Vec<Vec<String>> {
        vec![
            vec!["--from".to_owned(), "alpine".to_owned(), "--layer".to_owned()],
            vec!["--run".to_owned(), "true".to_owned(), "--layer".to_owned()],
        ]
    }

    #[test]
    fn build_prefixes_bootstrap_and_takes_last_line() {
        let dir = tempfile::tempdir().unwrap();
        let engine = CliEngine::new(fake_engine(dir.path()), bootstrap());
        let id = engine.build(&["--apk".to_owned(), "xeyes".to_owned()]).unwrap();
        assert_eq!(id.as_str(), "42");

        let log = std::fs::read_to_string(dir.path().join("argv.log")).unwrap();
        assert_eq!(
            log.trim(),
            "build --from alpine --layer --run true --layer --apk xeyes"
        );
    }

    #[test]
    fn base_layer_uses_nodepath() {
        let dir = tempfile::tempdir().unwrap();
        let engine = CliEngine::new(fake_engine(dir.path()), bootstrap());
        let base = engine.base_layer(&SnapshotId::new("42")).unwrap();
        assert_eq!(base.as_str(), "8");
    }

    #[test]
    fn map_query_and_release() {
        let dir = tempfile::tempdir().unwrap();
        let engine = CliEngine::new(fake_engine(dir.path()), bootstrap());
        assert_eq!(
            engine.map_get("xeyes").unwrap(),
            Some(SnapshotId::new("42"))
        );
        engine.map_release("xeyes").unwrap();
        let log = std::fs::read_to_string(dir.path().join("argv.log")).unwrap();
        // Empty third argument shows up as a trailing space.
        assert!(log.lines().any(|l| l == "map xeyes "));
    }

    #[test]
    fn list_executables_collects_scan_output() {
        let dir = tempfile::tempdir().unwrap();
        let engine = CliEngine::new(fake_engine(dir.path()), bootstrap());
        let exes = engine.list_executables(&SnapshotId::new("42")).unwrap();
        assert_eq!(
            exes.into_iter().collect::<Vec<_>>(),
            vec!["/usr/bin/a".to_owned(), "/usr/bin/b".to_owned()]
        );
    }

    #[test]
    fn nonzero_exit_is_command_failed() {
        let dir = tempfile::tempdir().unwrap();
        let engine = CliEngine::new(fake_engine(dir.path()), bootstrap());
        let err = engine.capture(&["fail"], true).unwrap_err();
        match err {
            EngineError::CommandFailed { status, stderr, .. } => {
                assert_eq!(status, Some(3));
                assert_eq!(stderr.trim(), "boom");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn missing_program_is_spawn_error() {
        let engine = CliEngine::new("/nonexistent/capsa-engine", bootstrap());
        assert!(matches!(engine.init(), Err(EngineError::Spawn { .. })));
    }
}
