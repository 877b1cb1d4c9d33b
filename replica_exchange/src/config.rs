use std::{fs::File, io, io::BufReader, num::NonZeroU64, path::Path};

use serde::{Deserialize, Serialize};

use crate::{Ensemble, HarmonicWell};

const DEFAULT_STEPS_PER_MOVE: u64 = 1000;
const DEFAULT_CHUNK_STEPS: NonZeroU64 = NonZeroU64::new(100).unwrap();
const DEFAULT_LOCAL_NODES: usize = 4;

/// How neighbouring replicas are paired for exchange.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pairing {
    /// Only `(i, i + 1)` pairs, the ends of the ladder never meet.
    #[default]
    Linear,
    /// The last replica may also pair with the first one.
    Ring,
}

/// Parameters of a `ReplicaExchange`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeConfig {
    /// Sampling steps each replica runs between two exchange passes.
    #[serde(default = "default_steps_per_move")]
    pub steps_per_move: u64,
    /// Steps per work unit chunk, which bounds how long a node takes to answer.
    #[serde(default = "default_chunk_steps")]
    pub chunk_steps: NonZeroU64,
    #[serde(default)]
    pub pairing: Pairing,
    /// Seeds the exchange decisions, drawn from the OS when unset.
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_steps_per_move() -> u64 {
    DEFAULT_STEPS_PER_MOVE
}

fn default_chunk_steps() -> NonZeroU64 {
    DEFAULT_CHUNK_STEPS
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            steps_per_move: DEFAULT_STEPS_PER_MOVE,
            chunk_steps: DEFAULT_CHUNK_STEPS,
            pairing: Pairing::default(),
            seed: None,
        }
    }
}

/// The harmonic well every replica of a demo run starts from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WellConfig {
    pub dimensions: usize,
    pub stiffness: f64,
    pub shifted_center: f64,
    pub step_size: f64,
    #[serde(default)]
    pub seed: u64,
}

impl WellConfig {
    pub fn build(&self) -> HarmonicWell {
        HarmonicWell::new(
            self.dimensions,
            self.stiffness,
            self.shifted_center,
            self.step_size,
            self.seed,
        )
    }
}

/// A replica exchange run, as read from a JSON file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Addresses of remote nodes. When empty, nodes run inside this process.
    #[serde(default)]
    pub node_addrs: Vec<String>,
    #[serde(default = "default_local_nodes")]
    pub local_nodes: usize,
    pub well: WellConfig,
    /// One ensemble per replica.
    pub ensembles: Vec<Ensemble>,
    pub moves: usize,
    #[serde(default)]
    pub exchange: ExchangeConfig,
}

fn default_local_nodes() -> usize {
    DEFAULT_LOCAL_NODES
}

impl RunConfig {
    /// Reads a run configuration from the JSON file at `path`.
    ///
    /// # Errors
    /// Returns an io error if the file can't be read or doesn't hold a valid
    /// configuration.
    pub fn load<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        let config: Self = serde_json::from_reader(reader)?;

        if config.ensembles.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "the run needs at least one ensemble",
            ));
        }

        Ok(config)
    }
}
