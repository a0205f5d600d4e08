//! Run configuration
//!
//! A whole tuning run is data: the parameter table, the population
//! size, the timing knobs and the external engine/server commands all
//! come from one JSON file, so presets are config files rather than
//! hand-duplicated entry points.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::param::{validate_params, Param, ParamError};

/// Errors from loading or validating a run configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Param(#[from] ParamError),
    #[error("no params configured")]
    NoParams,
    #[error("concurrency must be at least 4, got {0}")]
    LowConcurrency(usize),
    #[error("engine repository is not configured")]
    NoEngineRepository,
    #[error("engine build command is not configured")]
    NoBuildCommand,
    #[error("match server command is not configured")]
    NoServerCommand,
}

/// How to obtain, configure and build one engine working copy.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Source to materialize: a git URL (cloned shallow) or a local
    /// directory (copied)
    pub repository: String,
    pub branch: String,
    /// Command that builds the networked-play binary, run in the
    /// working copy
    pub build_command: Vec<String>,
    /// Built binary, relative to the working copy
    pub binary: PathBuf,
    pub binary_args: Vec<String>,
    /// Source fragment overwritten with the parameter overrides,
    /// relative to the working copy
    pub overrides_path: PathBuf,
    /// Match transcript log the engine writes, relative to the
    /// working copy
    pub log_path: PathBuf,
    /// Shared read-only assets symlinked into each working copy
    /// (evaluation weights, opening book)
    pub assets: Vec<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            repository: String::new(),
            branch: "master".to_string(),
            build_command: vec!["make".to_string(), "netplay".to_string()],
            binary: PathBuf::from("engine_net"),
            binary_args: Vec::new(),
            overrides_path: PathBuf::from("src/search/tunables.h"),
            log_path: PathBuf::from("out/netplay.log"),
            assets: Vec::new(),
        }
    }
}

/// Match-client settings written into each working copy. The user name
/// is always the worker's own name so transcripts stay per-worker.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Client config file, relative to the working copy
    pub config_path: PathBuf,
    pub host: String,
    pub port: u16,
    /// Search depth limit per move
    pub depth: u32,
    /// Games to play before the client exits on its own
    pub repeat: u64,
    pub use_book: bool,
    pub hash_mem: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            config_path: PathBuf::from("config/netplay.ini"),
            host: "localhost".to_string(),
            port: 4081,
            depth: 48,
            repeat: 1_000_000,
            use_book: true,
            hash_mem: 128,
        }
    }
}

/// How to obtain and launch the match server.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub repository: String,
    pub branch: String,
    /// Command that starts the listening arbiter, run in its working
    /// copy
    pub command: Vec<String>,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            repository: String::new(),
            branch: "master".to_string(),
            command: Vec::new(),
            port: 4081,
        }
    }
}

/// Everything one tuning run needs.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunConfig {
    pub params: Vec<Param>,
    /// Workers per population; baselines and candidates each get this
    /// many
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Evolutionary variant: wall-clock seconds each generation plays
    #[serde(default = "default_generation_secs")]
    pub generation_secs: u64,
    /// Coordinate-ascent variant: seconds between score polls
    #[serde(default = "default_poll_secs")]
    pub poll_secs: u64,
    /// Coordinate-ascent variant: games each probe half must finish
    /// before the probe is decided
    #[serde(default = "default_min_probe_games")]
    pub min_probe_games: u32,
    /// Directory holding all worker and server working copies
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

fn default_concurrency() -> usize {
    14
}

fn default_generation_secs() -> u64 {
    600
}

fn default_poll_secs() -> u64 {
    60
}

fn default_min_probe_games() -> u32 {
    100
}

fn default_work_dir() -> PathBuf {
    PathBuf::from("work")
}

impl RunConfig {
    /// Load and validate a run configuration from a JSON file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: RunConfig =
            serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Checks shared by both tuning variants.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.params.is_empty() {
            return Err(ConfigError::NoParams);
        }
        validate_params(&self.params)?;
        if self.concurrency < 4 {
            return Err(ConfigError::LowConcurrency(self.concurrency));
        }
        if self.engine.repository.is_empty() {
            return Err(ConfigError::NoEngineRepository);
        }
        if self.engine.build_command.is_empty() {
            return Err(ConfigError::NoBuildCommand);
        }
        if self.server.command.is_empty() {
            return Err(ConfigError::NoServerCommand);
        }
        Ok(())
    }

    /// Additional requirement of the evolutionary variant: every param
    /// carries a full axis.
    pub fn validate_bounded(&self) -> Result<(), ConfigError> {
        self.validate()?;
        for param in &self.params {
            if param.bounds().is_none() {
                return Err(ConfigError::Param(ParamError::Unbounded(
                    param.name.clone(),
                )));
            }
        }
        Ok(())
    }

    pub fn generation_duration(&self) -> Duration {
        Duration::from_secs(self.generation_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_json() -> &'static str {
        r#"{
            "params": [
                {"name": "RAZOR_MARGIN", "normal": 250, "min": 225, "max": 275, "step": 5}
            ],
            "concurrency": 4,
            "engine": {"repository": "../engine"},
            "server": {"repository": "../match-server", "command": ["./serve", "4081"]}
        }"#
    }

    #[test]
    fn test_parse_minimal_config() {
        let config: RunConfig = serde_json::from_str(minimal_json()).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.params.len(), 1);
        assert_eq!(config.concurrency, 4);

        // defaults fill the rest
        assert_eq!(config.generation_secs, 600);
        assert_eq!(config.engine.branch, "master");
        assert_eq!(config.client.port, 4081);
        assert_eq!(config.work_dir, PathBuf::from("work"));
    }

    #[test]
    fn test_validate_rejects_low_concurrency() {
        let mut config: RunConfig = serde_json::from_str(minimal_json()).unwrap();
        config.concurrency = 3;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::LowConcurrency(3))
        ));
    }

    #[test]
    fn test_validate_rejects_missing_engine_repository() {
        let mut config: RunConfig = serde_json::from_str(minimal_json()).unwrap();
        config.engine.repository.clear();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::NoEngineRepository)
        ));
    }

    #[test]
    fn test_validate_bounded_rejects_unbounded_param() {
        let mut config: RunConfig = serde_json::from_str(minimal_json()).unwrap();
        config.params.push(Param {
            name: "FREE".to_string(),
            normal: 10,
            min: None,
            max: None,
            step: 1,
        });
        assert!(config.validate().is_ok());
        assert!(matches!(
            config.validate_bounded(),
            Err(ConfigError::Param(ParamError::Unbounded(_)))
        ));
    }

    #[test]
    fn test_load_reports_missing_file() {
        let err = RunConfig::load(Path::new("/nonexistent/tunesmith.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
