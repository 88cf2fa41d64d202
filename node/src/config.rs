//! Layered TOML configuration, `serde` + `Default` impls per section,
//! covering every configuration key the ATX and Hare pipelines need plus
//! the node-level wiring keys (data dir, PoET endpoints, genesis).

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use activation::PoetConfig;
use hare::HareConfig;
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Genesis and epoch-length parameters shared by the layer clock and
/// both pipelines.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClockConfig {
    /// Genesis instant, seconds since `UNIX_EPOCH`.
    pub genesis_unix_seconds: u64,
    pub layer_duration: Duration,
    pub layers_per_epoch: u32,
    pub effective_genesis: u32,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            genesis_unix_seconds: 0,
            layer_duration: Duration::from_secs(5 * 60),
            layers_per_epoch: 4032,
            effective_genesis: 0,
        }
    }
}

impl ClockConfig {
    pub fn genesis_time(&self) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(self.genesis_unix_seconds)
    }
}

/// Node-level wiring keys that don't belong to either pipeline's own
/// config struct.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeSection {
    pub data_dir: PathBuf,
    pub poet_servers: Vec<String>,
    pub post_num_units: u32,
    pub post_max_file_size: u64,
}

impl Default for NodeSection {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            poet_servers: Vec::new(),
            post_num_units: 4,
            post_max_file_size: 1 << 30,
        }
    }
}

/// Top-level config file shape, one section per concern — mirrors the
/// layered `[client]` / `[network]` / `[sync]` sectioning of a node
/// config file, just scoped to the two pipelines this binary runs.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub node: NodeSection,
    pub clock: ClockConfig,
    pub poet: PoetConfig,
    pub hare: HareConfig,
}

impl Config {
    pub fn from_toml_str(s: &str) -> Result<Self, Error> {
        toml::from_str(s).map_err(Error::from)
    }

    pub fn load(path: &Path) -> Result<Self, Error> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_round_trips_through_toml() {
        let cfg = Config::default();
        let serialized = toml::to_string(&cfg).expect("serialize");
        let parsed = Config::from_toml_str(&serialized).expect("parse");
        assert_eq!(cfg, parsed);
    }

    #[test]
    fn load_rejects_missing_file() {
        let err = Config::load(Path::new("/nonexistent/config.toml")).unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }
}
