use crate::{Ensemble, ExchangeError, Result, Simulation};

/// A simulation state bound to the ensemble it samples.
#[derive(Debug, Clone, PartialEq)]
pub struct Replica<S> {
    simulation: S,
    ensemble: Ensemble,
}

impl<S: Simulation> Replica<S> {
    /// Creates a new `Replica`.
    ///
    /// # Errors
    /// `ExchangeError::InvalidEnsemble` if the ensemble isn't internally consistent.
    pub fn new(simulation: S, ensemble: Ensemble) -> Result<Self> {
        ensemble.validate()?;
        Ok(Self {
            simulation,
            ensemble,
        })
    }

    pub fn simulation(&self) -> &S {
        &self.simulation
    }

    pub fn ensemble(&self) -> &Ensemble {
        &self.ensemble
    }

    pub fn into_parts(self) -> (S, Ensemble) {
        (self.simulation, self.ensemble)
    }
}

/// An ordered, fixed size set of replicas.
///
/// Exchanges move simulation states between positions while every position keeps
/// its ensemble. The set tracks which of the original states currently sits at
/// each position.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplicaSet<S> {
    replicas: Vec<Replica<S>>,
    state_ids: Vec<usize>,
}

impl<S: Simulation> ReplicaSet<S> {
    pub fn new(replicas: Vec<Replica<S>>) -> Self {
        let state_ids = (0..replicas.len()).collect();
        Self {
            replicas,
            state_ids,
        }
    }

    /// Creates a set with one copy of `simulation` per ensemble of the ladder.
    ///
    /// # Errors
    /// `ExchangeError::InvalidEnsemble` if any ensemble isn't internally consistent.
    pub fn from_ladder<I>(simulation: S, ensembles: I) -> Result<Self>
    where
        I: IntoIterator<Item = Ensemble>,
    {
        let replicas = ensembles
            .into_iter()
            .map(|ensemble| Replica::new(simulation.clone(), ensemble))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self::new(replicas))
    }

    pub fn len(&self) -> usize {
        self.replicas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.replicas.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Replica<S>> {
        self.replicas.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Replica<S>> {
        self.replicas.iter()
    }

    pub fn ensembles(&self) -> impl Iterator<Item = &Ensemble> {
        self.replicas.iter().map(Replica::ensemble)
    }

    /// Which of the original states currently sits at `index`.
    pub fn state_index(&self, index: usize) -> Option<usize> {
        self.state_ids.get(index).copied()
    }

    pub fn state_indices(&self) -> &[usize] {
        &self.state_ids
    }

    /// Puts `replica` at `index`, keeping the size of the set and the state index of
    /// that position.
    ///
    /// # Returns
    /// The replica that was there before.
    pub fn replace(&mut self, index: usize, replica: Replica<S>) -> Result<Replica<S>> {
        let len = self.len();
        let slot = self
            .replicas
            .get_mut(index)
            .ok_or(ExchangeError::IndexOutOfRange { index, len })?;

        Ok(std::mem::replace(slot, replica))
    }

    pub(crate) fn replica(&self, index: usize) -> Result<&Replica<S>> {
        self.replicas.get(index).ok_or(ExchangeError::IndexOutOfRange {
            index,
            len: self.len(),
        })
    }

    pub(crate) fn set_simulation(&mut self, index: usize, simulation: S) {
        self.replicas[index].simulation = simulation;
    }

    /// Swaps the states at `a` and `b`, leaving the ensembles in place.
    pub(crate) fn swap_states(&mut self, a: usize, b: usize) {
        if a == b {
            return;
        }

        let (lo, hi) = (a.min(b), a.max(b));
        let (head, tail) = self.replicas.split_at_mut(hi);
        std::mem::swap(&mut head[lo].simulation, &mut tail[0].simulation);
        self.state_ids.swap(a, b);
    }
}
