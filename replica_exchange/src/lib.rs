pub mod acceptance;
pub mod config;
mod ensemble;
mod error;
mod exchange;
pub mod harmonic;
mod replica;
mod simulation;

use comms::UnitRegistry;

pub use config::{ExchangeConfig, Pairing, RunConfig};
pub use ensemble::{Ensemble, K_BOLTZMANN, Mismatch};
pub use error::{ExchangeError, Result, SimulationError};
pub use exchange::{PairStats, ReplicaExchange};
pub use harmonic::HarmonicWell;
pub use replica::{Replica, ReplicaSet};
pub use simulation::{Simulation, SimulationUnit};

/// Creates a registry with every simulation unit shipped in this crate.
pub fn unit_registry() -> UnitRegistry {
    let mut registry = UnitRegistry::new();
    registry.register::<SimulationUnit<HarmonicWell>>();
    registry
}
