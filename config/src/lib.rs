//! `tether.toml` loading.
//!
//! Every section and field is optional; an absent file means defaults. The
//! loaded [`TetherConfig`] converts into the [`WorkerCommand`] and
//! [`SessionOptions`] the supervisor consumes.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{env, fs, io};

use serde::Deserialize;
use tether_demux::accumulator::DEFAULT_RECORD_MARKER;
use tether_demux::{AccumulatorOptions, PatternError, RecordMarkers, RouterLabels, ScanMode};
use tether_supervisor::{DEFAULT_SHUTDOWN_TIMEOUT, SessionOptions, WireFraming, WorkerCommand};

/// Overrides the default config location.
pub const CONFIG_PATH_ENV: &str = "TETHER_CONFIG";

/// Verbosity handed to the worker unless the config sets it.
const DEFAULT_WORKER_ENV: (&str, &str) = ("RUST_LOG", "info");

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config at {}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse config at {}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error(transparent)]
    Pattern(#[from] PatternError),
}

impl ConfigError {
    /// The file involved, for read and parse failures.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        match self {
            ConfigError::Read { path, .. } | ConfigError::Parse { path, .. } => Some(path),
            ConfigError::Pattern(_) => None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TetherConfig {
    pub worker: WorkerConfig,
    pub diagnostics: DiagnosticsConfig,
    pub labels: LabelsConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Executable to run. The command line given to the binary wins.
    pub command: Option<String>,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    /// Replaces the built-in secret denylist when set.
    pub env_denylist: Option<Vec<String>>,
    pub framing: Framing,
    /// Seconds between the termination request and a forced kill. 0 waits
    /// forever.
    pub shutdown_timeout_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            command: None,
            args: Vec::new(),
            env: BTreeMap::new(),
            env_denylist: None,
            framing: Framing::default(),
            shutdown_timeout_secs: DEFAULT_SHUTDOWN_TIMEOUT.as_secs(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Framing {
    #[default]
    ContentLength,
    Newline,
}

impl From<Framing> for WireFraming {
    fn from(framing: Framing) -> Self {
        match framing {
            Framing::ContentLength => WireFraming::ContentLength,
            Framing::Newline => WireFraming::Newline,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DiagnosticsConfig {
    pub record_marker: Option<String>,
    pub categories: Vec<String>,
    pub payload_keywords: Vec<String>,
    pub scan: ScanMode,
    pub max_buffer_bytes: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LabelsConfig {
    pub wire: Option<String>,
    pub trace: Option<String>,
}

impl TetherConfig {
    /// Load from `explicit`, or from [`config_path`] when no path is given.
    ///
    /// A missing default file yields `Ok(None)`; a missing explicit file is a
    /// read error.
    pub fn load(explicit: Option<&Path>) -> Result<Option<Self>, ConfigError> {
        if let Some(path) = explicit {
            return Self::read(path).map(Some);
        }
        match config_path() {
            Some(path) => Self::load_from(&path),
            None => Ok(None),
        }
    }

    /// Load `path`, treating a missing file as "no config".
    pub fn load_from(path: &Path) -> Result<Option<Self>, ConfigError> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No config file");
            return Ok(None);
        }
        Self::read(path).map(Some)
    }

    fn read(path: &Path) -> Result<Self, ConfigError> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) => {
                tracing::warn!("Failed to read config at {:?}: {}", path, err);
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source: err,
                });
            }
        };

        match toml::from_str(&content) {
            Ok(config) => Ok(config),
            Err(err) => {
                tracing::warn!("Failed to parse config at {:?}: {}", path, err);
                Err(ConfigError::Parse {
                    path: path.to_path_buf(),
                    source: err,
                })
            }
        }
    }

    /// The configured worker with `${VAR}` references expanded, or `None`
    /// when no command is configured.
    #[must_use]
    pub fn worker_command(&self) -> Option<WorkerCommand> {
        let program = self.worker.command.as_deref()?;
        let mut command = WorkerCommand::new(expand_env_vars(program));
        command.args = self.worker.args.iter().map(|a| expand_env_vars(a)).collect();
        command.env = self.worker_env();
        Some(command)
    }

    /// Environment overrides for the worker, `${VAR}` references expanded.
    #[must_use]
    pub fn worker_env(&self) -> BTreeMap<String, String> {
        let mut env: BTreeMap<String, String> = self
            .worker
            .env
            .iter()
            .map(|(k, v)| (k.clone(), expand_env_vars(v)))
            .collect();
        let (key, value) = DEFAULT_WORKER_ENV;
        env.entry(key.to_string())
            .or_insert_with(|| value.to_string());
        env
    }

    pub fn session_options(&self) -> Result<SessionOptions, ConfigError> {
        let diagnostics = &self.diagnostics;
        let markers = RecordMarkers::new(
            diagnostics
                .record_marker
                .as_deref()
                .unwrap_or(DEFAULT_RECORD_MARKER),
            diagnostics.categories.clone(),
            diagnostics.payload_keywords.clone(),
        )?;

        let mut labels = RouterLabels::default();
        if let Some(wire) = &self.labels.wire {
            labels.wire.clone_from(wire);
        }
        if let Some(trace) = &self.labels.trace {
            labels.trace.clone_from(trace);
        }

        let defaults = SessionOptions::default();
        Ok(SessionOptions {
            markers,
            accumulator: AccumulatorOptions {
                scan: diagnostics.scan,
                max_buffer_bytes: diagnostics.max_buffer_bytes,
            },
            labels,
            framing: self.worker.framing.into(),
            env_denylist: self
                .worker
                .env_denylist
                .clone()
                .unwrap_or(defaults.env_denylist),
            shutdown_timeout: match self.worker.shutdown_timeout_secs {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
        })
    }
}

/// Replace `${VAR}` with the variable's value (empty when unset).
///
/// An unterminated `${` is kept as written.
#[must_use]
pub fn expand_env_vars(value: &str) -> String {
    expand_with(value, |name| env::var(name).ok())
}

fn expand_with(value: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(open) = rest.find("${") {
        out.push_str(&rest[..open]);
        let name_and_tail = &rest[open + 2..];
        let Some(close) = name_and_tail.find('}') else {
            out.push_str(&rest[open..]);
            return out;
        };
        let name = &name_and_tail[..close];
        if !name.is_empty()
            && let Some(replacement) = lookup(name)
        {
            out.push_str(&replacement);
        }
        rest = &name_and_tail[close + 1..];
    }
    out.push_str(rest);
    out
}

/// `$TETHER_CONFIG`, else `~/.tether/config.toml`.
#[must_use]
pub fn config_path() -> Option<PathBuf> {
    if let Some(path) = env::var_os(CONFIG_PATH_ENV).filter(|p| !p.is_empty()) {
        return Some(PathBuf::from(path));
    }
    dirs::home_dir().map(|home| home.join(".tether").join("config.toml"))
}
