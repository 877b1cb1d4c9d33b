//! A toy simulation: independent particles in a harmonic well, sampled with
//! Metropolis Monte Carlo.
//!
//! The lambda coupling `restraint` morphs the well centred at the origin into one
//! centred at `shifted_center`, which makes it a small but complete Hamiltonian
//! exchange workload.

use rand::{Rng, SeedableRng, rngs::StdRng};
use serde::{Deserialize, Serialize};

use crate::{Ensemble, Simulation, SimulationError};

/// The well centred at the origin.
pub const BULK: &str = "bulk";
/// The well centred at the shifted center.
pub const RESTRAINT: &str = "restraint";
/// The lambda mix of both wells.
pub const TOTAL: &str = "total";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarmonicWell {
    positions: Vec<f64>,
    /// Spring constant in kcal/(mol·Å²).
    stiffness: f64,
    shifted_center: f64,
    /// Maximum displacement of a single move, in Å.
    step_size: f64,
    rng_state: u64,
    steps_taken: u64,
}

impl HarmonicWell {
    /// Creates a new `HarmonicWell` with every particle at the origin.
    ///
    /// # Arguments
    /// * `dimensions` - The amount of particle coordinates.
    /// * `stiffness` - The spring constant of both wells.
    /// * `shifted_center` - The center of the restraint well.
    /// * `step_size` - The maximum displacement of a move.
    /// * `seed` - Seeds the moves, so sampling is reproducible.
    ///
    /// # Returns
    /// A new `HarmonicWell` instance.
    pub fn new(
        dimensions: usize,
        stiffness: f64,
        shifted_center: f64,
        step_size: f64,
        seed: u64,
    ) -> Self {
        Self {
            positions: vec![0.; dimensions],
            stiffness,
            shifted_center,
            step_size,
            rng_state: seed,
            steps_taken: 0,
        }
    }

    pub fn with_positions(mut self, positions: Vec<f64>) -> Self {
        self.positions = positions;
        self
    }

    pub fn positions(&self) -> &[f64] {
        &self.positions
    }

    pub fn steps_taken(&self) -> u64 {
        self.steps_taken
    }

    fn bulk(&self, x: f64) -> f64 {
        0.5 * self.stiffness * x * x
    }

    fn restraint(&self, x: f64) -> f64 {
        let d = x - self.shifted_center;
        0.5 * self.stiffness * d * d
    }

    fn mixed(&self, x: f64, lambda: f64) -> f64 {
        (1. - lambda) * self.bulk(x) + lambda * self.restraint(x)
    }
}

impl Simulation for HarmonicWell {
    const TYPE_NAME: &'static str = "harmonic_well";

    fn advance(&mut self, ensemble: &Ensemble, steps: u64) -> Result<(), SimulationError> {
        if self.positions.is_empty() {
            return Err(SimulationError::InvalidState(
                "the well holds no particles".to_string(),
            ));
        }

        if !(ensemble.temperature.is_finite() && ensemble.temperature > 0.) {
            return Err(SimulationError::InvalidState(format!(
                "can't sample at {} K",
                ensemble.temperature
            )));
        }

        let beta = ensemble.beta();
        let lambda = ensemble.lambda_value.unwrap_or(0.);
        let mut rng = StdRng::seed_from_u64(self.rng_state);

        for _ in 0..steps {
            let i = rng.random_range(0..self.positions.len());
            let old = self.positions[i];
            let new = old + self.step_size * (2. * rng.random::<f64>() - 1.);

            let delta = self.mixed(new, lambda) - self.mixed(old, lambda);
            if delta <= 0. || rng.random::<f64>() < (-beta * delta).exp() {
                self.positions[i] = new;
            }
        }

        self.rng_state = rng.random();
        self.steps_taken += steps;
        Ok(())
    }

    fn energy(&self, component: &str, ensemble: &Ensemble) -> Result<f64, SimulationError> {
        let lambda = ensemble.lambda_value.unwrap_or(0.);

        let term: fn(&Self, f64, f64) -> f64 = match component {
            TOTAL => Self::mixed,
            BULK => |well, x, _| well.bulk(x),
            RESTRAINT => |well, x, _| well.restraint(x),
            other => return Err(SimulationError::UnknownComponent(other.to_string())),
        };

        Ok(self.positions.iter().map(|&x| term(self, x, lambda)).sum())
    }
}
