use std::num::NonZeroU64;

use comms::unit::{ChunkError, UnitType, WorkUnit};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::{Ensemble, SimulationError};

/// The simulation engine behind a replica.
///
/// The state is opaque to the exchange: it's only ever advanced under an ensemble,
/// evaluated under an ensemble, and shipped to the nodes that sample it.
pub trait Simulation: Clone + Serialize + DeserializeOwned + Send + 'static {
    /// The name its work units are registered under.
    const TYPE_NAME: &'static str;

    /// Samples `steps` moves of the state under `ensemble`.
    fn advance(&mut self, ensemble: &Ensemble, steps: u64) -> Result<(), SimulationError>;

    /// The energy of the current state in kcal/mol, evaluated with the Hamiltonian of
    /// `ensemble`.
    ///
    /// # Arguments
    /// * `component` - Which energy term to evaluate.
    /// * `ensemble` - The ensemble overriding the state's own parameters.
    fn energy(&self, component: &str, ensemble: &Ensemble) -> Result<f64, SimulationError>;

    /// The volume of the current state in Å³, for constant pressure sampling.
    fn volume(&self) -> Option<f64> {
        None
    }
}

/// A sampling job: advances a simulation by a fixed amount of steps, a chunk at a
/// time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationUnit<S> {
    simulation: S,
    ensemble: Ensemble,
    total_steps: u64,
    done_steps: u64,
    chunk_steps: u64,
}

impl<S: Simulation> SimulationUnit<S> {
    /// Creates a new `SimulationUnit`.
    ///
    /// # Arguments
    /// * `simulation` - The state to advance.
    /// * `ensemble` - The ensemble to sample.
    /// * `steps` - The total amount of steps.
    /// * `chunk_steps` - The amount of steps per chunk.
    ///
    /// # Returns
    /// A new `SimulationUnit` instance.
    pub fn new(simulation: S, ensemble: Ensemble, steps: u64, chunk_steps: NonZeroU64) -> Self {
        Self {
            simulation,
            ensemble,
            total_steps: steps,
            done_steps: 0,
            chunk_steps: chunk_steps.get(),
        }
    }

    pub fn simulation(&self) -> &S {
        &self.simulation
    }

    pub fn ensemble(&self) -> &Ensemble {
        &self.ensemble
    }

    pub fn done_steps(&self) -> u64 {
        self.done_steps
    }

    pub fn into_simulation(self) -> S {
        self.simulation
    }
}

impl<S: Simulation> WorkUnit for SimulationUnit<S> {
    fn run_chunk(&mut self) -> Result<(), ChunkError> {
        let steps = self
            .chunk_steps
            .min(self.total_steps.saturating_sub(self.done_steps));

        if steps == 0 {
            return Ok(());
        }

        self.simulation.advance(&self.ensemble, steps)?;
        self.done_steps += steps;
        Ok(())
    }

    fn has_finished(&self) -> bool {
        self.done_steps >= self.total_steps
    }

    fn progress(&self) -> f32 {
        if self.total_steps == 0 {
            return 100.;
        }

        (100. * self.done_steps as f64 / self.total_steps as f64) as f32
    }
}

impl<S: Simulation> UnitType for SimulationUnit<S> {
    const TYPE_NAME: &'static str = S::TYPE_NAME;
}
