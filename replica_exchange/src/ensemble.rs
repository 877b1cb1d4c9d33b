use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{ExchangeError, Result};

/// Boltzmann constant in kcal/(mol·K).
pub const K_BOLTZMANN: f64 = 0.0019872041;

/// Converts a pressure-volume product in atm·Å³ to kcal/mol.
pub(crate) const ATM_A3_TO_KCAL_MOL: f64 = 1.458397e-5;

const DEFAULT_COMPONENT: &str = "total";

fn default_component() -> String {
    DEFAULT_COMPONENT.to_string()
}

/// The thermodynamic state a replica samples: the parameters an exchange never
/// moves between replicas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ensemble {
    /// Temperature in kelvin.
    pub temperature: f64,
    /// Pressure in atm, for constant pressure sampling.
    #[serde(default)]
    pub pressure: Option<f64>,
    #[serde(default)]
    pub lambda_value: Option<f64>,
    /// The coupling the lambda value applies to.
    #[serde(default)]
    pub lambda_symbol: Option<String>,
    /// Selects the energy the acceptance test is computed with.
    #[serde(default = "default_component")]
    pub energy_component: String,
}

impl Ensemble {
    /// Creates a constant volume ensemble at `temperature`, using the total energy.
    pub fn new(temperature: f64) -> Self {
        Self {
            temperature,
            pressure: None,
            lambda_value: None,
            lambda_symbol: None,
            energy_component: default_component(),
        }
    }

    pub fn with_pressure(mut self, pressure: f64) -> Self {
        self.pressure = Some(pressure);
        self
    }

    pub fn with_lambda(mut self, symbol: impl Into<String>, value: f64) -> Self {
        self.lambda_symbol = Some(symbol.into());
        self.lambda_value = Some(value);
        self
    }

    pub fn with_component(mut self, component: impl Into<String>) -> Self {
        self.energy_component = component.into();
        self
    }

    /// Inverse temperature `1 / (k_B T)` in mol/kcal.
    pub fn beta(&self) -> f64 {
        1. / (K_BOLTZMANN * self.temperature)
    }

    /// Checks that the ensemble is internally consistent.
    ///
    /// # Errors
    /// `ExchangeError::InvalidEnsemble` if the temperature isn't positive, the
    /// lambda value and symbol aren't set together, or the lambda value lies outside
    /// `[0, 1]`.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: String| -> Result<()> { Err(ExchangeError::InvalidEnsemble(reason)) };

        if !(self.temperature.is_finite() && self.temperature > 0.) {
            return invalid(format!("temperature must be positive, got {}", self.temperature));
        }

        if let Some(pressure) = self.pressure {
            if !pressure.is_finite() {
                return invalid(format!("pressure must be finite, got {pressure}"));
            }
        }

        match (&self.lambda_symbol, self.lambda_value) {
            (Some(_), Some(value)) if !(0.0..=1.0).contains(&value) => {
                invalid(format!("lambda must lie in [0, 1], got {value}"))
            }
            (Some(_), None) => invalid("lambda symbol set without a lambda value".to_string()),
            (None, Some(_)) => invalid("lambda value set without a lambda symbol".to_string()),
            _ => Ok(()),
        }
    }

    /// Checks whether replicas in `self` and `other` may swap states.
    ///
    /// # Errors
    /// The first difference that makes their energies incomparable.
    pub fn check_exchangeable(&self, other: &Ensemble) -> std::result::Result<(), Mismatch> {
        if self.energy_component != other.energy_component {
            return Err(Mismatch::EnergyComponent);
        }

        if self.lambda_symbol != other.lambda_symbol {
            return Err(Mismatch::LambdaSymbol);
        }

        if self.pressure.is_some() != other.pressure.is_some() {
            return Err(Mismatch::Pressure);
        }

        Ok(())
    }
}

/// Why two ensembles can't exchange states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mismatch {
    EnergyComponent,
    LambdaSymbol,
    /// Only one of them is at constant pressure.
    Pressure,
}

impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Mismatch::EnergyComponent => "different energy components",
            Mismatch::LambdaSymbol => "different lambda couplings",
            Mismatch::Pressure => "only one of them is at constant pressure",
        };

        write!(f, "{s}")
    }
}
