use crate::EngineError;
use capsa_schema::SnapshotId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;

/// Shell snippet run inside a snapshot to enumerate everything executable on
/// its search path. Prints one absolute path per line.
pub const EXECUTABLE_SCAN: &str = r#"IFS=:
for d in $PATH; do
  for f in "$d"/*; do
    if { [ -f "$f" ] || [ -L "$f" ]; } && [ -x "$f" ]; then
      printf '%s\n' "$f"
    fi
  done
done"#;

fn default_backend() -> String {
    "cli".to_owned()
}

fn default_program() -> String {
    "plash".to_owned()
}

fn default_bootstrap() -> Vec<Vec<String>> {
    [
        ["--from", "alpine:3.20", "--layer"],
        ["--run", "apk add --no-cache bash", "--layer"],
    ]
    .iter()
    .map(|layer| layer.iter().map(|t| (*t).to_owned()).collect())
    .collect()
}

/// The `[engine]` table of the configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default = "default_program")]
    pub program: String,
    /// Layers prepended to every build so that all packages share them in
    /// the engine's cache. Each layer ends with the engine's layer marker.
    #[serde(default = "default_bootstrap")]
    pub bootstrap: Vec<Vec<String>>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            program: default_program(),
            bootstrap: default_bootstrap(),
        }
    }
}

/// Narrow interface to the external build engine.
///
/// Every method maps to one engine invocation. Failures are never retried
/// here; the caller aborts its transaction.
pub trait BuildEngine: Send + Sync {
    fn name(&self) -> &str;

    /// Layers prepended to every [`build`](Self::build).
    fn bootstrap(&self) -> &[Vec<String>];

    fn init(&self) -> Result<(), EngineError>;

    /// Build from exactly the given arguments, without the bootstrap prefix.
    fn build_raw(&self, args: &[String]) -> Result<SnapshotId, EngineError>;

    /// Materialize `snapshot` at `dest` without duplicating its content.
    fn shallow_copy(&self, snapshot: &SnapshotId, dest: &Path) -> Result<(), EngineError>;

    fn map_get(&self, name: &str) -> Result<Option<SnapshotId>, EngineError>;

    fn map_set(&self, name: &str, snapshot: &SnapshotId) -> Result<(), EngineError>;

    /// Drop the association so the engine may reclaim the snapshot.
    fn map_release(&self, name: &str) -> Result<(), EngineError>;

    /// Run a command inside a snapshot and collect its stdout lines.
    fn run(&self, snapshot: &SnapshotId, command: &[String]) -> Result<Vec<String>, EngineError>;

    /// The engine's internal path for a snapshot. Its trailing numeric
    /// components are the layer chain, root layer first.
    fn nodepath(&self, snapshot: &SnapshotId) -> Result<String, EngineError>;

    fn purge(&self) -> Result<(), EngineError>;

    fn clean(&self) -> Result<(), EngineError>;

    /// Run a host command with the engine's privilege escalation.
    fn sudo(&self, command: &[String]) -> Result<(), EngineError>;

    /// Build `tokens` on top of the bootstrap layers.
    fn build(&self, tokens: &[String]) -> Result<SnapshotId, EngineError> {
        let mut args: Vec<String> = self.bootstrap().iter().flatten().cloned().collect();
        args.extend_from_slice(tokens);
        self.build_raw(&args)
    }

    /// Executables on the snapshot's search path, deduplicated.
    fn list_executables(&self, snapshot: &SnapshotId) -> Result<BTreeSet<String>, EngineError> {
        let scan = vec!["sh".to_owned(), "-c".to_owned(), EXECUTABLE_SCAN.to_owned()];
        Ok(self
            .run(snapshot, &scan)?
            .into_iter()
            .map(|line| line.trim().to_owned())
            .filter(|line| !line.is_empty())
            .collect())
    }

    /// The last bootstrap layer underneath `snapshot`.
    fn base_layer(&self, snapshot: &SnapshotId) -> Result<SnapshotId, EngineError> {
        let nodepath = self.nodepath(snapshot)?;
        base_layer_from_nodepath(&nodepath, self.bootstrap().len())
    }
}

/// Pick the layer at `depth` from the numeric tail of a node path.
///
/// `/data/layer/0/12/13/40` has the chain `[0, 12, 13, 40]`; with two
/// bootstrap layers the base layer is `13`.
pub(crate) fn base_layer_from_nodepath(
    nodepath: &str,
    depth: usize,
) -> Result<SnapshotId, EngineError> {
    let mut chain: Vec<&str> = nodepath
        .trim()
        .trim_end_matches('/')
        .rsplit('/')
        .take_while(|c| !c.is_empty() && c.bytes().all(|b| b.is_ascii_digit()))
        .collect();
    chain.reverse();

    if chain.first() != Some(&"0") {
        return Err(EngineError::MalformedNodePath(nodepath.to_owned()));
    }
    chain
        .get(depth)
        .map(|id| SnapshotId::new(*id))
        .ok_or_else(|| EngineError::MalformedNodePath(nodepath.to_owned()))
}

pub fn select_engine(config: &EngineConfig) -> Result<Box<dyn BuildEngine>, EngineError> {
    match config.backend.as_str() {
        "cli" => Ok(Box::new(crate::cli::CliEngine::new(
            &config.program,
            config.bootstrap.clone(),
        ))),
        "mock" => Ok(Box::new(crate::mock::MockEngine::with_bootstrap(
            config.bootstrap.clone(),
        ))),
        other => Err(EngineError::Unavailable(other.to_owned())),
    }
}
