//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Shared primitives and utilities for the co-simulation runtime."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSeconds};
use tracing::debug;

use crate::logging::LogFormat;

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::StructuredJson
}

fn default_completion_timeout() -> Option<Duration> {
    Some(Duration::from_secs(600))
}

fn default_delimiter() -> char {
    ','
}

fn default_simulation_name() -> String {
    "external-simulation".to_owned()
}

fn default_last_tick() -> i64 {
    3600
}

fn default_resolution() -> i64 {
    900
}

/// Primary configuration object for a co-simulation run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoSimConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub channels: ChannelConfig,
    #[serde(default)]
    pub mapping: MappingConfig,
    #[serde(default)]
    pub simulation: SimulationConfig,
}

/// Metadata describing where a [`CoSimConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedCoSimConfig {
    pub config: CoSimConfig,
    pub source: PathBuf,
}

impl CoSimConfig {
    pub const ENV_CONFIG_PATH: &str = "R_EMS_COSIM_CONFIG";

    /// Load configuration from disk, respecting the `R_EMS_COSIM_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration from disk together with the effective source path.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedCoSimConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(&path)?;
                return Ok(LoadedCoSimConfig {
                    config,
                    source: path,
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_path(&path)?;
                return Ok(LoadedCoSimConfig {
                    config,
                    source: path,
                });
            }
        }

        Err(anyhow!(
            "no configuration files found. inspected: {}",
            candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    }

    fn from_path(path: &Path) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        let config = toml::from_str::<CoSimConfig>(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        self.channels.validate()?;
        self.mapping.validate()?;
        self.simulation.validate()?;
        Ok(())
    }
}

impl std::str::FromStr for CoSimConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: CoSimConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_prefix: None,
        }
    }
}

/// Deadlines applied to blocking channel waits. `None` waits indefinitely.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// How long the host waits for the answer to an open control request.
    #[serde(default = "default_completion_timeout", rename = "completion_timeout_secs")]
    #[serde_as(as = "Option<DurationSeconds<u64>>")]
    pub completion_timeout: Option<Duration>,
    /// How long a domain connection waits for the host's response to a request.
    #[serde(default, rename = "response_timeout_secs")]
    #[serde_as(as = "Option<DurationSeconds<u64>>")]
    pub response_timeout: Option<Duration>,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            completion_timeout: default_completion_timeout(),
            response_timeout: None,
        }
    }
}

impl ChannelConfig {
    /// No deadlines at all.
    pub fn unbounded() -> Self {
        Self {
            completion_timeout: None,
            response_timeout: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        for (name, timeout) in [
            ("completion_timeout_secs", self.completion_timeout),
            ("response_timeout_secs", self.response_timeout),
        ] {
            if timeout.is_some_and(|t| t.is_zero()) {
                return Err(anyhow!("channels.{} must be greater than zero", name));
            }
        }
        Ok(())
    }
}

/// Location and format of the entity mapping table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingConfig {
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default = "default_delimiter")]
    pub delimiter: char,
}

impl Default for MappingConfig {
    fn default() -> Self {
        Self {
            path: None,
            delimiter: default_delimiter(),
        }
    }
}

impl MappingConfig {
    /// Delimiter as the single byte the CSV reader expects.
    pub fn delimiter_byte(&self) -> Result<u8> {
        u8::try_from(self.delimiter)
            .ok()
            .filter(u8::is_ascii)
            .ok_or_else(|| anyhow!("mapping delimiter '{}' is not ASCII", self.delimiter))
    }

    pub fn validate(&self) -> Result<()> {
        self.delimiter_byte().map(|_| ())
    }
}

/// Tick schedule used when the host side is scripted (demo runs, tests).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    #[serde(default = "default_simulation_name")]
    pub name: String,
    #[serde(default)]
    pub first_tick: i64,
    #[serde(default = "default_last_tick")]
    pub last_tick: i64,
    #[serde(default = "default_resolution")]
    pub resolution: i64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            name: default_simulation_name(),
            first_tick: 0,
            last_tick: default_last_tick(),
            resolution: default_resolution(),
        }
    }
}

impl SimulationConfig {
    pub fn validate(&self) -> Result<()> {
        if self.first_tick < 0 {
            return Err(anyhow!("simulation.first_tick must not be negative"));
        }
        if self.last_tick < self.first_tick {
            return Err(anyhow!(
                "simulation.last_tick ({}) precedes first_tick ({})",
                self.last_tick,
                self.first_tick
            ));
        }
        if self.resolution <= 0 {
            return Err(anyhow!("simulation.resolution must be positive"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_validate() {
        let config = CoSimConfig::default();
        config.validate().expect("defaults are valid");
        assert_eq!(
            config.channels.completion_timeout,
            Some(Duration::from_secs(600))
        );
        assert!(config.channels.response_timeout.is_none());
    }

    #[test]
    fn parses_channel_deadlines_and_mapping() {
        let config: CoSimConfig = r#"
            [channels]
            completion_timeout_secs = 30
            response_timeout_secs = 5

            [mapping]
            path = "configs/mapping.csv"
            delimiter = ";"

            [simulation]
            name = "mosaik"
            last_tick = 7200
        "#
        .parse()
        .expect("valid config");

        assert_eq!(
            config.channels.completion_timeout,
            Some(Duration::from_secs(30))
        );
        assert_eq!(
            config.channels.response_timeout,
            Some(Duration::from_secs(5))
        );
        assert_eq!(config.mapping.delimiter_byte().expect("ascii"), b';');
        assert_eq!(config.simulation.name, "mosaik");
        assert_eq!(config.simulation.resolution, 900);
    }

    #[test]
    fn rejects_zero_timeout() {
        let err = "[channels]\ncompletion_timeout_secs = 0\n"
            .parse::<CoSimConfig>()
            .unwrap_err();
        assert!(err.to_string().contains("completion_timeout_secs"));
    }

    #[test]
    fn rejects_inverted_tick_range() {
        let result = "[simulation]\nfirst_tick = 100\nlast_tick = 50\n".parse::<CoSimConfig>();
        assert!(result.is_err());
    }

    #[test]
    fn load_with_source_picks_first_existing_candidate() -> Result<()> {
        let mut file = tempfile::NamedTempFile::new()?;
        writeln!(file, "[simulation]\nlast_tick = 1800")?;
        let missing = PathBuf::from("does/not/exist.toml");
        let candidates = vec![missing, file.path().to_path_buf()];

        let loaded = CoSimConfig::load_with_source(&candidates)?;
        assert_eq!(loaded.source, file.path());
        assert_eq!(loaded.config.simulation.last_tick, 1800);
        Ok(())
    }
}
