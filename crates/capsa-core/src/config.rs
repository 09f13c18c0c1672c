use capsa_engine::EngineConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

const DEFAULT_ROOT: &str = "~/.local/share/capsa";
const DEFAULT_RUNNER: &str = "capsa-run";
/// Command name assumed for the running manager when no executable path is
/// known.
const DEFAULT_COMMAND: &str = "capsa";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config {origin}: {source}")]
    Parse {
        origin: String,
        source: toml::de::Error,
    },
}

fn default_root() -> PathBuf {
    PathBuf::from(DEFAULT_ROOT)
}

fn default_runner() -> String {
    DEFAULT_RUNNER.to_owned()
}

/// Settings for the generated `bin/<name>` launchers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LauncherConfig {
    /// Sandbox runner the launcher execs with `<rootfs> <command> [args...]`.
    #[serde(default = "default_runner")]
    pub runner: String,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            runner: default_runner(),
        }
    }
}

/// Everything a [`Manager`](crate::Manager) needs, passed in explicitly.
///
/// ```toml
/// root = "~/.local/share/capsa"
///
/// [engine]
/// backend = "cli"
/// program = "plash"
/// bootstrap = [["--from", "alpine:3.20", "--layer"]]
///
/// [launcher]
/// runner = "capsa-run"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default = "default_root")]
    pub root: PathBuf,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub launcher: LauncherConfig,
    /// Executable whose package may not be removed. Defaults to the running
    /// binary.
    #[serde(default)]
    pub self_exe: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            root: default_root(),
            engine: EngineConfig::default(),
            launcher: LauncherConfig::default(),
            self_exe: None,
        }
        .expanded()
    }
}

impl Config {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Self::parse(content, "<inline>")
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content, &path.display().to_string())
    }

    /// Load `explicit` if given, else the per-user config file if it exists,
    /// else the built-in defaults.
    pub fn discover(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        match default_config_path() {
            Some(path) if path.is_file() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }

    fn parse(content: &str, origin: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|source| ConfigError::Parse {
            origin: origin.to_owned(),
            source,
        })?;
        Ok(config.expanded())
    }

    fn expanded(mut self) -> Self {
        self.root = expand_tilde(&self.root.to_string_lossy());
        self.self_exe = self
            .self_exe
            .map(|p| expand_tilde(&p.to_string_lossy()));
        self
    }

    /// The same configuration pointed at another install root.
    #[must_use]
    pub fn with_root(&self, root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..self.clone()
        }
    }

    fn self_exe_path(&self) -> Option<PathBuf> {
        self.self_exe
            .clone()
            .or_else(|| std::env::current_exe().ok())
            .or_else(|| std::env::args_os().next().map(PathBuf::from))
    }

    /// Canonical path of the executable that must not be removed, if it
    /// resolves on the host.
    pub fn self_exe(&self) -> Option<PathBuf> {
        std::fs::canonicalize(self.self_exe_path()?).ok()
    }

    /// Command name of the running manager. Inside its own sandbox the
    /// executable path is relative to the rootfs, so the name is what
    /// identifies the hosting package.
    pub fn self_command(&self) -> String {
        self.self_exe_path()
            .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| DEFAULT_COMMAND.to_owned())
    }
}

/// `$XDG_CONFIG_HOME/capsa/config.toml`, falling back to `~/.config`.
pub fn default_config_path() -> Option<PathBuf> {
    if let Some(xdg) = std::env::var_os("XDG_CONFIG_HOME").filter(|v| !v.is_empty()) {
        return Some(PathBuf::from(xdg).join("capsa/config.toml"));
    }
    std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config/capsa/config.toml"))
}

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(stripped);
        }
    }
    PathBuf::from(path)
}
