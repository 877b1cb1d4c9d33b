use comms::unit::decode_as;
use futures::future;
use log::{debug, info};
use orchestrator::NodePool;
use rand::{SeedableRng, rngs::StdRng};

use crate::{
    Ensemble, ExchangeConfig, ExchangeError, ReplicaSet, Result, Simulation, SimulationUnit,
    acceptance::{self, Side},
};

/// Accepted and rejected exchange attempts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PairStats {
    pub accepted: u64,
    pub rejected: u64,
}

impl PairStats {
    pub fn attempts(&self) -> u64 {
        self.accepted + self.rejected
    }

    /// The fraction of accepted attempts, 0 before any attempt.
    pub fn ratio(&self) -> f64 {
        match self.attempts() {
            0 => 0.,
            attempts => self.accepted as f64 / attempts as f64,
        }
    }

    fn record(&mut self, accepted: bool) {
        if accepted {
            self.accepted += 1;
        } else {
            self.rejected += 1;
        }
    }
}

#[derive(Debug, Clone, Default)]
struct MoveStats {
    total: PairStats,
    /// Indexed by the first replica of the pair.
    pairs: Vec<PairStats>,
}

impl MoveStats {
    fn record(&mut self, first: usize, accepted: bool) {
        if self.pairs.len() <= first {
            self.pairs.resize(first + 1, PairStats::default());
        }

        self.total.record(accepted);
        self.pairs[first].record(accepted);
    }
}

/// Coordinates replica exchange moves over a `NodePool`.
///
/// A move samples every replica in parallel, one work unit per replica, and then
/// tries to swap the states of neighbouring replicas under the Metropolis criterion.
/// Acceptance statistics persist across moves until cleared.
pub struct ReplicaExchange {
    config: ExchangeConfig,
    rng: StdRng,
    stats: MoveStats,
    last_pairs: Vec<(usize, usize)>,
}

impl ReplicaExchange {
    /// Creates a new `ReplicaExchange`.
    ///
    /// # Arguments
    /// * `config` - The sampling and exchange parameters.
    ///
    /// # Returns
    /// A new `ReplicaExchange` instance.
    pub fn new(config: ExchangeConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        Self {
            config,
            rng,
            stats: MoveStats::default(),
            last_pairs: Vec::new(),
        }
    }

    pub fn config(&self) -> &ExchangeConfig {
        &self.config
    }

    /// Runs `n_moves` rounds of sampling followed by an exchange pass on `set`.
    ///
    /// # Arguments
    /// * `pool` - The nodes the replicas are sampled on.
    /// * `set` - The replicas to move.
    /// * `n_moves` - The amount of rounds.
    /// * `record_stats` - Whether the exchange attempts count towards the statistics.
    ///
    /// # Errors
    /// If sampling fails, `set` and the statistics are restored to what they were
    /// when this was called. If an exchange test fails, the swaps already applied
    /// stand.
    pub async fn move_replicas<S: Simulation>(
        &mut self,
        pool: &NodePool,
        set: &mut ReplicaSet<S>,
        n_moves: usize,
        record_stats: bool,
    ) -> Result<()> {
        let saved = (set.clone(), self.stats.clone());

        for round in 0..n_moves {
            debug!(round = round, replicas = set.len(); "sampling replicas");

            if let Err(e) = self.sample(pool, set).await {
                (*set, self.stats) = saved;
                return Err(e);
            }

            self.exchange(set, record_stats)?;
        }

        info!(
            moves = n_moves, accepted = self.n_accepted(), rejected = self.n_rejected();
            "replica exchange moves done"
        );
        Ok(())
    }

    /// Samples every replica on its own node, and only updates the set once all of
    /// them succeeded.
    async fn sample<S: Simulation>(
        &self,
        pool: &NodePool,
        set: &mut ReplicaSet<S>,
    ) -> Result<()> {
        let jobs = set.iter().enumerate().map(|(replica, r)| {
            let unit = SimulationUnit::new(
                r.simulation().clone(),
                r.ensemble().clone(),
                self.config.steps_per_move,
                self.config.chunk_steps,
            );

            sample_one(pool, replica, unit)
        });

        let sampled = future::join_all(jobs)
            .await
            .into_iter()
            .collect::<Result<Vec<_>>>()?;

        for (replica, simulation) in sampled.into_iter().enumerate() {
            set.set_simulation(replica, simulation);
        }

        Ok(())
    }

    /// Tests every pair of the pass and swaps the accepted ones.
    fn exchange<S: Simulation>(
        &mut self,
        set: &mut ReplicaSet<S>,
        record_stats: bool,
    ) -> Result<()> {
        let start = acceptance::draw_start(set.len(), &mut self.rng);
        self.last_pairs = acceptance::pairs(set.len(), start, self.config.pairing);

        for &(i, j) in &self.last_pairs {
            let delta = pair_delta(set, i, j)?;
            let accepted = acceptance::accept(delta, &mut self.rng);
            debug!(
                first = i, second = j, delta = delta, accepted = accepted;
                "exchange attempt"
            );

            if accepted {
                set.swap_states(i, j);
            }

            if record_stats {
                self.stats.record(i, accepted);
            }
        }

        Ok(())
    }

    pub fn n_accepted(&self) -> u64 {
        self.stats.total.accepted
    }

    pub fn n_rejected(&self) -> u64 {
        self.stats.total.rejected
    }

    /// The fraction of accepted exchange attempts, 0 before any attempt.
    pub fn acceptance_ratio(&self) -> f64 {
        self.stats.total.ratio()
    }

    /// The statistics of the pair starting at replica `first`.
    pub fn pair_stats(&self, first: usize) -> PairStats {
        self.stats.pairs.get(first).copied().unwrap_or_default()
    }

    pub fn clear_statistics(&mut self) {
        self.stats = MoveStats::default();
    }

    /// The pairs tested by the latest exchange pass.
    pub fn last_pairs(&self) -> &[(usize, usize)] {
        &self.last_pairs
    }
}

/// Runs one replica's sampling job on the first free node.
async fn sample_one<S: Simulation>(
    pool: &NodePool,
    replica: usize,
    unit: SimulationUnit<S>,
) -> Result<S> {
    let node = pool.acquire().await?;
    let promise = node.dispatch_unit(&unit).await?;
    drop(node);

    let bytes = promise
        .final_result()
        .await
        .map_err(|source| ExchangeError::Sampling { replica, source })?;

    let unit: SimulationUnit<S> =
        decode_as(&bytes).map_err(|source| ExchangeError::Decode { replica, source })?;

    Ok(unit.into_simulation())
}

/// Evaluates the acceptance exponent of swapping the states of `i` and `j`.
fn pair_delta<S: Simulation>(set: &ReplicaSet<S>, i: usize, j: usize) -> Result<f64> {
    let (a, b) = (set.replica(i)?, set.replica(j)?);
    let (ens_a, ens_b) = (a.ensemble(), b.ensemble());

    ens_a
        .check_exchangeable(ens_b)
        .map_err(|reason| ExchangeError::EnsembleMismatch {
            first: i,
            second: j,
            reason,
        })?;

    let energy = |replica: usize, simulation: &S, ensemble: &Ensemble| {
        simulation
            .energy(&ensemble.energy_component, ensemble)
            .map_err(|source| ExchangeError::Energy { replica, source })
    };

    let side_a = Side {
        ensemble: ens_a,
        own: energy(i, a.simulation(), ens_a)?,
        swapped: energy(j, b.simulation(), ens_a)?,
        volume: a.simulation().volume(),
    };
    let side_b = Side {
        ensemble: ens_b,
        own: energy(j, b.simulation(), ens_b)?,
        swapped: energy(i, a.simulation(), ens_b)?,
        volume: b.simulation().volume(),
    };

    Ok(acceptance::delta(&side_a, &side_b))
}
