//! Configuration types for the simulation.

use crate::{Error, Layout, Rank, Result};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::path::Path;
use tracing::info;

/// Environment variable naming a JSON configuration file
pub const CONFIG_ENV: &str = "REEF_CONFIG";

/// Global world dimensions and initial population
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldConfig {
    /// Extent along x
    pub length: usize,
    /// Extent along y, the axis split between workers
    pub width: usize,
    /// Extent along z
    pub height: usize,
    /// Initial fish across the whole world
    pub fish: usize,
    /// Initial sharks across the whole world
    pub sharks: usize,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            length: 20,
            width: 24,
            height: 20,
            fish: 1000,
            sharks: 200,
        }
    }
}

impl WorldConfig {
    pub fn volume(&self) -> usize {
        self.length * self.width * self.height
    }
}

/// Run-wide simulation parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub world: WorldConfig,
    /// Number of generations to simulate
    pub generations: u64,
    /// Number of worker ranks sharing the width axis
    pub workers: u32,
    /// Random seed; `None` seeds every worker from entropy
    pub seed: Option<u64>,
    /// Reject widths that the worker count does not divide evenly
    pub require_even_split: bool,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            world: WorldConfig::default(),
            generations: 20,
            workers: 4,
            seed: None,
            require_even_split: true,
        }
    }
}

impl SimulationConfig {
    /// Check the preconditions that must hold before any simulation state exists
    pub fn validate(&self) -> Result<()> {
        let world = &self.world;
        if world.length == 0 || world.width == 0 || world.height == 0 {
            return Err(Error::Config(format!(
                "world dimensions must be positive, got {}x{}x{}",
                world.length, world.width, world.height
            )));
        }
        if self.workers == 0 {
            return Err(Error::Config("at least one worker is required".to_string()));
        }
        let workers = self.workers as usize;
        if world.width < workers {
            return Err(Error::Config(format!(
                "width {} cannot be split between {} workers",
                world.width, workers
            )));
        }
        if self.require_even_split && world.width % workers != 0 {
            return Err(Error::Config(format!(
                "width {} is not evenly divided between {} workers",
                world.width, workers
            )));
        }
        if world.volume() <= world.fish + world.sharks {
            return Err(Error::Config(format!(
                "world of {} cells is too small for {} creatures",
                world.volume(),
                world.fish + world.sharks
            )));
        }
        Ok(())
    }
}

/// Everything a worker needs to build its partition, sent once at startup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionSpec {
    pub rank: Rank,
    /// Total number of worker ranks
    pub workers: u32,
    pub length: usize,
    /// Owned layers along the width axis, ghosts excluded
    pub own_width: usize,
    pub height: usize,
    /// Global `y` of the first owned layer
    pub y_offset: usize,
    pub fish: usize,
    pub sharks: usize,
    pub generations: u64,
    pub seed: Option<u64>,
}

impl PartitionSpec {
    /// Neighbor toward lower width indices
    pub fn up(&self) -> Option<Rank> {
        (self.rank.0 > 1).then(|| Rank(self.rank.0 - 1))
    }

    /// Neighbor toward higher width indices
    pub fn down(&self) -> Option<Rank> {
        (self.rank.0 < self.workers).then(|| Rank(self.rank.0 + 1))
    }

    pub fn layout(&self) -> Layout {
        Layout::with_ghosts(
            self.length,
            self.own_width,
            self.height,
            self.up().is_some(),
            self.down().is_some(),
        )
    }
}

/// Coordinator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Bind address for worker connections
    pub bind_address: String,
    /// Port for worker connections
    pub port: u16,
    /// Run workers as in-process tasks instead of waiting for TCP workers
    pub local: bool,
    /// Directory receiving one snapshot file per generation
    pub snapshot_dir: String,
    /// Database path (SQLite)
    pub database_path: String,
    /// Reassembled worlds allowed to wait for the snapshot writer
    pub snapshot_queue_depth: usize,
    /// OpenTelemetry endpoint
    pub otel_endpoint: Option<String>,
    pub simulation: SimulationConfig,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 7878,
            local: true,
            snapshot_dir: "./data".to_string(),
            database_path: "./data/reef.db".to_string(),
            snapshot_queue_depth: 4,
            otel_endpoint: None,
            simulation: SimulationConfig::default(),
        }
    }
}

impl CoordinatorConfig {
    pub fn load() -> Result<Self> {
        load_or_default()
    }
}

/// Worker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Coordinator address as `host:port`
    pub coordinator_addr: String,
    /// OpenTelemetry endpoint
    pub otel_endpoint: Option<String>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            coordinator_addr: "127.0.0.1:7878".to_string(),
            otel_endpoint: None,
        }
    }
}

impl WorkerConfig {
    pub fn load() -> Result<Self> {
        load_or_default()
    }
}

/// Read a JSON config from the file named by [`CONFIG_ENV`], falling back to defaults.
///
/// Fields a file leaves out keep their default values.
fn load_or_default<T: DeserializeOwned + Default>() -> Result<T> {
    match std::env::var(CONFIG_ENV) {
        Ok(path) => load_from_file(&path),
        Err(_) => Ok(T::default()),
    }
}

pub fn load_from_file<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    info!("Loading configuration from {:?}", path);
    let text = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}
