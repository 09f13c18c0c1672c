use crate::engine::BuildEngine;
use crate::EngineError;
use capsa_schema::SnapshotId;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

const LAYER_MARKER: &str = "--layer";
const ROOT_LAYER: &str = "0";
const ROOT_EXECUTABLES: &[&str] = &["/bin/sh", "/bin/ls", "/bin/cat", "/usr/bin/env"];

/// Name of the marker file `shallow_copy` leaves in each materialized tree.
pub const SNAPSHOT_MARKER: &str = ".snapshot";

#[derive(Default)]
struct MockState {
    next_id: u64,
    /// Layer cache keyed by parent and the layer's tokens.
    layers: HashMap<(String, Vec<String>), String>,
    parents: HashMap<String, String>,
    executables: HashMap<String, BTreeSet<String>>,
    associations: BTreeMap<String, SnapshotId>,
    provides: HashMap<String, Vec<String>>,
    fail_on: HashSet<String>,
    fail_map: bool,
    fail_sudo: bool,
    calls: Vec<String>,
}

impl MockState {
    fn layer(&mut self, parent: &str, tokens: &[String]) -> String {
        let key = (parent.to_owned(), tokens.to_vec());
        if let Some(id) = self.layers.get(&key) {
            return id.clone();
        }
        self.next_id += 1;
        let id = self.next_id.to_string();

        let mut exes = self.executables.get(parent).cloned().unwrap_or_default();
        for token in tokens {
            if let Some(added) = self.provides.get(token) {
                exes.extend(added.iter().map(|e| format!("/usr/bin/{e}")));
            }
        }
        self.executables.insert(id.clone(), exes);
        self.parents.insert(id.clone(), parent.to_owned());
        self.layers.insert(key, id.clone());
        id
    }

    fn known(&self, snapshot: &SnapshotId) -> Result<(), EngineError> {
        if snapshot.as_str() == ROOT_LAYER || self.parents.contains_key(snapshot.as_str()) {
            Ok(())
        } else {
            Err(failure(&format!("unknown snapshot {snapshot}")))
        }
    }
}

fn failure(command: &str) -> EngineError {
    EngineError::CommandFailed {
        command: format!("mock {command}"),
        status: Some(1),
        stderr: String::new(),
    }
}

/// In-memory build engine for tests.
///
/// Builds are split into layers at each `--layer` token and cached per
/// (parent, tokens), so repeated builds share layers like the real engine
/// until [`purge`](BuildEngine::purge) drops the cache. Tokens registered
/// with [`provide`](Self::provide) add executables to the layer containing
/// them. Clones share state, so a test can keep a handle while the manager
/// owns a boxed copy.
#[derive(Clone)]
pub struct MockEngine {
    bootstrap: Vec<Vec<String>>,
    state: Arc<Mutex<MockState>>,
}

impl Default for MockEngine {
    fn default() -> Self {
        Self::with_bootstrap(vec![
            vec!["--from".to_owned(), "mock:base".to_owned(), LAYER_MARKER.to_owned()],
            vec!["--run".to_owned(), "mock:setup".to_owned(), LAYER_MARKER.to_owned()],
        ])
    }
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bootstrap(bootstrap: Vec<Vec<String>>) -> Self {
        let mut state = MockState::default();
        state.executables.insert(
            ROOT_LAYER.to_owned(),
            ROOT_EXECUTABLES.iter().map(|e| (*e).to_owned()).collect(),
        );
        Self {
            bootstrap,
            state: Arc::new(Mutex::new(state)),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, MockState>, EngineError> {
        self.state
            .lock()
            .map_err(|e| failure(&format!("mutex poisoned: {e}")))
    }

    fn guard(&self) -> MutexGuard<'_, MockState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Any layer containing `token` installs `executables` into `/usr/bin`.
    pub fn provide(&self, token: &str, executables: &[&str]) {
        self.guard().provides.insert(
            token.to_owned(),
            executables.iter().map(|e| (*e).to_owned()).collect(),
        );
    }

    /// Any build containing `token` fails.
    pub fn fail_on(&self, token: &str) {
        self.guard().fail_on.insert(token.to_owned());
    }

    pub fn clear_failures(&self) {
        let mut state = self.guard();
        state.fail_on.clear();
        state.fail_map = false;
        state.fail_sudo = false;
    }

    /// Make `map_set` fail, leaving lookups and releases working.
    pub fn fail_map(&self, fail: bool) {
        self.guard().fail_map = fail;
    }

    /// Make `sudo` fail without running its command.
    pub fn fail_sudo(&self, fail: bool) {
        self.guard().fail_sudo = fail;
    }

    /// Every engine call so far, one line each.
    pub fn calls(&self) -> Vec<String> {
        self.guard().calls.clone()
    }

    pub fn association(&self, name: &str) -> Option<SnapshotId> {
        self.guard().associations.get(name).cloned()
    }
}

impl BuildEngine for MockEngine {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn bootstrap(&self) -> &[Vec<String>] {
        &self.bootstrap
    }

    fn init(&self) -> Result<(), EngineError> {
        self.lock()?.calls.push("init".to_owned());
        Ok(())
    }

    fn build_raw(&self, args: &[String]) -> Result<SnapshotId, EngineError> {
        let mut state = self.lock()?;
        state.calls.push(format!("build {}", args.join(" ")));

        if let Some(bad) = args.iter().find(|a| state.fail_on.contains(*a)) {
            return Err(failure(&format!("build: '{bad}' failed")));
        }

        let mut current = ROOT_LAYER.to_owned();
        for layer in args.split_inclusive(|t| t == LAYER_MARKER) {
            let tokens: Vec<String> = layer
                .iter()
                .filter(|t| *t != LAYER_MARKER)
                .cloned()
                .collect();
            if tokens.is_empty() {
                continue;
            }
            current = state.layer(&current, &tokens);
        }
        Ok(SnapshotId::new(current))
    }

    fn shallow_copy(&self, snapshot: &SnapshotId, dest: &Path) -> Result<(), EngineError> {
        let exes = {
            let mut state = self.lock()?;
            state
                .calls
                .push(format!("shallow-copy {snapshot} {}", dest.display()));
            state.known(snapshot)?;
            state
                .executables
                .get(snapshot.as_str())
                .cloned()
                .unwrap_or_default()
        };

        std::fs::create_dir_all(dest)?;
        std::fs::write(dest.join(SNAPSHOT_MARKER), snapshot.as_str())?;
        for exe in exes {
            let path = dest.join(exe.trim_start_matches('/'));
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&path, format!("#!/bin/sh\n# {snapshot}\n"))?;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))?;
        }
        Ok(())
    }

    fn map_get(&self, name: &str) -> Result<Option<SnapshotId>, EngineError> {
        let mut state = self.lock()?;
        state.calls.push(format!("map {name}"));
        Ok(state.associations.get(name).cloned())
    }

    fn map_set(&self, name: &str, snapshot: &SnapshotId) -> Result<(), EngineError> {
        let mut state = self.lock()?;
        state.calls.push(format!("map {name} {snapshot}"));
        if state.fail_map {
            return Err(failure(&format!("map {name} {snapshot}")));
        }
        state.known(snapshot)?;
        state.associations.insert(name.to_owned(), snapshot.clone());
        Ok(())
    }

    fn map_release(&self, name: &str) -> Result<(), EngineError> {
        let mut state = self.lock()?;
        state.calls.push(format!("map {name} ''"));
        state.associations.remove(name);
        Ok(())
    }

    fn run(&self, snapshot: &SnapshotId, command: &[String]) -> Result<Vec<String>, EngineError> {
        let mut state = self.lock()?;
        state
            .calls
            .push(format!("run {snapshot} {}", command.join(" ")));
        state.known(snapshot)?;
        Ok(Vec::new())
    }

    fn nodepath(&self, snapshot: &SnapshotId) -> Result<String, EngineError> {
        let mut state = self.lock()?;
        state.calls.push(format!("nodepath {snapshot}"));
        state.known(snapshot)?;

        let mut chain = vec![snapshot.as_str().to_owned()];
        let mut cursor = snapshot.as_str();
        while let Some(parent) = state.parents.get(cursor) {
            chain.push(parent.clone());
            cursor = parent.as_str();
        }
        chain.reverse();
        Ok(format!("/mock/layer/{}", chain.join("/")))
    }

    fn list_executables(&self, snapshot: &SnapshotId) -> Result<BTreeSet<String>, EngineError> {
        let mut state = self.lock()?;
        state.calls.push(format!("run {snapshot} sh -c <scan>"));
        state.known(snapshot)?;
        Ok(state
            .executables
            .get(snapshot.as_str())
            .cloned()
            .unwrap_or_default())
    }

    fn purge(&self) -> Result<(), EngineError> {
        let mut state = self.lock()?;
        state.calls.push("purge --yes".to_owned());
        state.layers.clear();
        Ok(())
    }

    fn clean(&self) -> Result<(), EngineError> {
        self.lock()?.calls.push("clean".to_owned());
        Ok(())
    }

    fn sudo(&self, command: &[String]) -> Result<(), EngineError> {
        {
            let mut state = self.lock()?;
            state.calls.push(format!("sudo {}", command.join(" ")));
            if state.fail_sudo {
                return Err(failure("sudo: injected failure"));
            }
        }
        let Some((program, args)) = command.split_first() else {
            return Err(failure("sudo: empty command"));
        };
        let status = std::process::Command::new(program)
            .args(args)
            .status()
            .map_err(|source| EngineError::Spawn {
                program: program.clone(),
                source,
            })?;
        if !status.success() {
            return Err(EngineError::CommandFailed {
                command: format!("mock sudo {}", command.join(" ")),
                status: status.code(),
                stderr: String::new(),
            });
        }
        Ok(())
    }
}
