use std::{error::Error, fmt};

use comms::packet::{PacketError, UnitError};
use orchestrator::{PoolError, PromiseError};

use crate::Mismatch;

/// The result type used across the replica exchange crate.
pub type Result<T> = std::result::Result<T, ExchangeError>;

/// Failures of a simulation collaborator.
#[derive(Debug, Clone, PartialEq)]
pub enum SimulationError {
    /// The energy component selector isn't known to the simulation.
    UnknownComponent(String),
    /// The simulation state can't be advanced or evaluated.
    InvalidState(String),
}

impl fmt::Display for SimulationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SimulationError::UnknownComponent(name) => write!(f, "unknown energy component `{name}`"),
            SimulationError::InvalidState(reason) => write!(f, "invalid simulation state: {reason}"),
        }
    }
}

impl Error for SimulationError {}

/// The replica exchange error type.
#[derive(Debug)]
pub enum ExchangeError {
    /// No node could be leased for sampling.
    Pool(PoolError),
    /// A replica couldn't be packed into a work unit.
    Packet(PacketError),
    /// The sampling job of a replica failed.
    Sampling {
        replica: usize,
        source: PromiseError,
    },
    /// The sampling result of a replica couldn't be read back.
    Decode {
        replica: usize,
        source: UnitError,
    },
    /// The energy of a replica's state couldn't be evaluated.
    Energy {
        replica: usize,
        source: SimulationError,
    },
    /// Two replicas paired for exchange have incompatible ensembles.
    EnsembleMismatch {
        first: usize,
        second: usize,
        reason: Mismatch,
    },
    InvalidEnsemble(String),
    IndexOutOfRange {
        index: usize,
        len: usize,
    },
}

impl fmt::Display for ExchangeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExchangeError::Pool(e) => write!(f, "failed to lease a node: {e}"),
            ExchangeError::Packet(e) => write!(f, "failed to pack a replica: {e}"),
            ExchangeError::Sampling { replica, source } => {
                write!(f, "sampling of replica {replica} failed: {source}")
            }
            ExchangeError::Decode { replica, source } => {
                write!(f, "unreadable sampling result for replica {replica}: {source}")
            }
            ExchangeError::Energy { replica, source } => {
                write!(f, "energy evaluation of replica {replica} failed: {source}")
            }
            ExchangeError::EnsembleMismatch {
                first,
                second,
                reason,
            } => write!(f, "replicas {first} and {second} can't exchange: {reason}"),
            ExchangeError::InvalidEnsemble(reason) => write!(f, "invalid ensemble: {reason}"),
            ExchangeError::IndexOutOfRange { index, len } => {
                write!(f, "replica index {index} out of range for a set of {len}")
            }
        }
    }
}

impl Error for ExchangeError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ExchangeError::Pool(e) => Some(e),
            ExchangeError::Packet(e) => Some(e),
            ExchangeError::Sampling { source, .. } => Some(source),
            ExchangeError::Decode { source, .. } => Some(source),
            ExchangeError::Energy { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<PoolError> for ExchangeError {
    fn from(value: PoolError) -> Self {
        Self::Pool(value)
    }
}

impl From<PacketError> for ExchangeError {
    fn from(value: PacketError) -> Self {
        Self::Packet(value)
    }
}
