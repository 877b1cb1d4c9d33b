//! The Metropolis criterion for swapping the states of two replicas, and the
//! choice of which neighbours get to try.
//!
//! With `β = 1/(k_B T)` and `U_a(x_b)` the energy of state `b` under the Hamiltonian
//! of ensemble `a`, swapping the states of ensembles `i` and `j` is accepted with
//! probability `min(1, exp(-Δ))`, where
//!
//! `Δ = β_i [U_i(x_j) - U_i(x_i)] + β_j [U_j(x_i) - U_j(x_j)] + (β_i P_i - β_j P_j)(V_j - V_i)`
//!
//! This covers temperature, Hamiltonian and pressure exchange, and any mix of them.

use rand::Rng;

use crate::{Ensemble, Pairing, ensemble::ATM_A3_TO_KCAL_MOL};

/// One side of a proposed swap.
#[derive(Debug, Clone, Copy)]
pub struct Side<'a> {
    pub ensemble: &'a Ensemble,
    /// Energy of the state on this side under its own ensemble.
    pub own: f64,
    /// Energy of the partner's state under this side's ensemble.
    pub swapped: f64,
    /// Volume of the state on this side, if it's sampled at constant pressure.
    pub volume: Option<f64>,
}

/// The exponent `Δ` of the acceptance probability of swapping the states of `a` and
/// `b`.
pub fn delta(a: &Side<'_>, b: &Side<'_>) -> f64 {
    let (beta_a, beta_b) = (a.ensemble.beta(), b.ensemble.beta());
    let mut delta = beta_a * (a.swapped - a.own) + beta_b * (b.swapped - b.own);

    if let (Some(p_a), Some(p_b), Some(v_a), Some(v_b)) =
        (a.ensemble.pressure, b.ensemble.pressure, a.volume, b.volume)
    {
        delta += (beta_a * p_a - beta_b * p_b) * (v_b - v_a) * ATM_A3_TO_KCAL_MOL;
    }

    delta
}

/// Decides a swap with exponent `delta`. A non-positive exponent is always accepted
/// without drawing.
pub fn accept<R: Rng + ?Sized>(delta: f64, rng: &mut R) -> bool {
    delta <= 0. || rng.random::<f64>() < (-delta).exp()
}

/// Draws the index of the first replica to pair. Only sets of more than two
/// replicas get a random parity.
pub fn draw_start<R: Rng + ?Sized>(len: usize, rng: &mut R) -> usize {
    if len > 2 { rng.random_range(0..2) } else { 0 }
}

/// The neighbouring pairs tested in one exchange pass.
///
/// Pairs are `(i, i + 1)` for `i = start, start + 2, ...` while both ends exist. A
/// ring also pairs the last replica with the first one when the parity leaves both
/// of them out.
pub fn pairs(len: usize, start: usize, pairing: Pairing) -> Vec<(usize, usize)> {
    let mut pairs: Vec<_> = (start..)
        .step_by(2)
        .take_while(|i| i + 1 < len)
        .map(|i| (i, i + 1))
        .collect();

    if pairing == Pairing::Ring && start == 1 && len > 2 && len % 2 == 0 {
        pairs.push((len - 1, 0));
    }

    pairs
}

#[cfg(test)]
mod tests {
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;

    fn side(ensemble: &Ensemble, own: f64, swapped: f64) -> Side<'_> {
        Side {
            ensemble,
            own,
            swapped,
            volume: None,
        }
    }

    #[test]
    fn identical_sides_always_swap() {
        let ensemble = Ensemble::new(300.);
        let a = side(&ensemble, -12.5, -12.5);
        let b = side(&ensemble, -12.5, -12.5);

        let delta = delta(&a, &b);
        assert_eq!(delta, 0.);

        let mut rng = StdRng::seed_from_u64(0);
        assert!((0..1000).all(|_| accept(delta, &mut rng)));
    }

    #[test]
    fn temperature_exchange_reduces_to_the_classic_criterion() {
        let cold = Ensemble::new(300.);
        let hot = Ensemble::new(400.);
        // The cold replica sits at -10, the hot one at -20.
        let a = side(&cold, -10., -20.);
        let b = side(&hot, -20., -10.);

        let expected = (cold.beta() - hot.beta()) * (-20. - -10.);
        assert!((delta(&a, &b) - expected).abs() < 1e-12);
        assert!(delta(&a, &b) < 0.);
    }

    #[test]
    fn hamiltonian_exchange_at_one_temperature() {
        let t = 300.;
        let a_ens = Ensemble::new(t).with_lambda("restraint", 0.);
        let b_ens = Ensemble::new(t).with_lambda("restraint", 1.);
        let a = side(&a_ens, 1., 3.);
        let b = side(&b_ens, 2., 5.);

        let expected = (3. - 1. + 5. - 2.) / (crate::K_BOLTZMANN * t);
        assert!((delta(&a, &b) - expected).abs() < 1e-9);
    }

    #[test]
    fn pressure_term_needs_both_pressures_and_volumes() {
        let a_ens = Ensemble::new(300.).with_pressure(1.);
        let b_ens = Ensemble::new(300.).with_pressure(1000.);
        let mut a = side(&a_ens, 0., 0.);
        let mut b = side(&b_ens, 0., 0.);
        assert_eq!(delta(&a, &b), 0.);

        a.volume = Some(1000.);
        b.volume = Some(1200.);
        let beta = a_ens.beta();
        let expected = (beta * 1. - beta * 1000.) * 200. * ATM_A3_TO_KCAL_MOL;
        assert!((delta(&a, &b) - expected).abs() < 1e-12);
    }

    #[test]
    fn uphill_swaps_are_accepted_at_the_boltzmann_rate() {
        let mut rng = StdRng::seed_from_u64(42);
        let trials = 20_000;
        let accepted = (0..trials).filter(|_| accept(1., &mut rng)).count();

        let rate = accepted as f64 / trials as f64;
        assert!((rate - (-1f64).exp()).abs() < 0.02);
        assert!(!accept(f64::NAN, &mut rng));
    }

    #[test]
    fn pairs_follow_the_parity() {
        assert_eq!(pairs(4, 0, Pairing::Linear), vec![(0, 1), (2, 3)]);
        assert_eq!(pairs(4, 1, Pairing::Linear), vec![(1, 2)]);
        assert_eq!(pairs(4, 1, Pairing::Ring), vec![(1, 2), (3, 0)]);
        assert_eq!(pairs(4, 0, Pairing::Ring), vec![(0, 1), (2, 3)]);
        assert_eq!(pairs(5, 0, Pairing::Ring), vec![(0, 1), (2, 3)]);
        assert_eq!(pairs(5, 1, Pairing::Ring), vec![(1, 2), (3, 4)]);
        assert_eq!(pairs(2, 0, Pairing::Ring), vec![(0, 1)]);
        assert!(pairs(1, 0, Pairing::Linear).is_empty());
        assert!(pairs(0, 0, Pairing::Ring).is_empty());
    }

    #[test]
    fn small_sets_always_start_at_zero() {
        let mut rng = StdRng::seed_from_u64(9);
        assert!((0..100).all(|_| draw_start(2, &mut rng) == 0));
        assert!((0..100).all(|_| draw_start(1, &mut rng) == 0));

        let starts: Vec<_> = (0..100).map(|_| draw_start(6, &mut rng)).collect();
        assert!(starts.contains(&0) && starts.contains(&1));
    }
}
