//! Photophysical state evolution of photoswitchable emitters.
//!
//! Each emitter carries a discrete internal state that evolves once per
//! frame:
//!
//! ```text
//! Inactive --kA*power--> Active --kB--> Bleached (terminal)
//!                        Active <--kR1/kR2--> Dark1/Dark2
//! ```
//!
//! A transition with rate constant `k` (units 1/frame) fires within one frame
//! with probability `1 - exp(-k)`. Transitions out of a state are mutually
//! exclusive: one uniform draw decides whether *any* outgoing transition
//! fires, a second draw picks which one, weighted by relative rate. An
//! emitter emits photons for a frame iff it is `Active` at that frame; the
//! count is Poisson-distributed around the configured signal level.
//!
//! `Bleached` is absorbing: a bleached emitter never transitions again and
//! emits nothing.

use rand::rngs::StdRng;
use rand::Rng;
use rand_distr::{Distribution, Poisson};
use serde::{Deserialize, Serialize};

use crate::config::FluorophoreConfig;
use crate::error::{SimResult, SimulationError};

/// Discrete photophysical state of an emitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmitterState {
    Inactive,
    Active,
    Dark1,
    Dark2,
    Bleached,
}

/// Per-frame transition rate constants of one emitter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TransitionRates {
    /// `Inactive -> Active`, scaled by laser power.
    pub k_activation: f64,
    /// `Active -> Bleached`.
    pub k_bleach: f64,
    /// `Active -> Dark1`.
    pub k_dark1: f64,
    /// `Dark1 -> Active`.
    pub k_return1: f64,
    /// `Active -> Dark2`.
    pub k_dark2: f64,
    /// `Dark2 -> Active`.
    pub k_return2: f64,
}

impl From<&FluorophoreConfig> for TransitionRates {
    fn from(config: &FluorophoreConfig) -> Self {
        Self {
            k_activation: config.k_activation,
            k_bleach: config.k_bleach,
            k_dark1: config.k_dark1,
            k_return1: config.k_return1,
            k_dark2: config.k_dark2,
            k_return2: config.k_return2,
        }
    }
}

/// One photoswitchable point emitter with a sub-pixel position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Emitter {
    pub x: f64,
    pub y: f64,
    pub state: EmitterState,
    pub rates: TransitionRates,
}

impl Emitter {
    pub fn new(x: f64, y: f64, rates: TransitionRates) -> Self {
        Self {
            x,
            y,
            state: EmitterState::Inactive,
            rates,
        }
    }
}

/// Evolves emitter states frame by frame and decides emitted photon counts.
#[derive(Debug, Clone)]
pub struct PhotophysicsEngine {
    emission: Option<Poisson<f64>>,
}

impl PhotophysicsEngine {
    /// Builds the engine for a given mean signal level
    /// (photons/fluorophore/frame). A zero signal is valid and yields dark
    /// emitters; a negative signal is a configuration error caught earlier.
    pub fn new(signal: f64) -> SimResult<Self> {
        let emission = if signal > 0.0 {
            Some(Poisson::new(signal).map_err(|e| {
                SimulationError::Configuration(format!("invalid photon signal {signal}: {e}"))
            })?)
        } else {
            None
        };
        Ok(Self { emission })
    }

    /// Advances one emitter by one frame and returns its photon count.
    ///
    /// The state transition is evaluated exactly once per call; emission is
    /// decided by the post-transition state.
    pub fn step_emitter(
        &self,
        emitter: &mut Emitter,
        laser_power: f64,
        rng: &mut StdRng,
    ) -> u64 {
        self.transition(emitter, laser_power, rng);
        if emitter.state == EmitterState::Active {
            match &self.emission {
                Some(poisson) => {
                    let count: f64 = poisson.sample(rng);
                    count as u64
                }
                None => 0,
            }
        } else {
            0
        }
    }

    fn transition(&self, emitter: &mut Emitter, laser_power: f64, rng: &mut StdRng) {
        let rates = emitter.rates;
        match emitter.state {
            EmitterState::Inactive => Self::fire(
                emitter,
                &[(EmitterState::Active, rates.k_activation * laser_power)],
                rng,
            ),
            EmitterState::Active => Self::fire(
                emitter,
                &[
                    (EmitterState::Bleached, rates.k_bleach),
                    (EmitterState::Dark1, rates.k_dark1),
                    (EmitterState::Dark2, rates.k_dark2),
                ],
                rng,
            ),
            EmitterState::Dark1 => {
                Self::fire(emitter, &[(EmitterState::Active, rates.k_return1)], rng)
            }
            EmitterState::Dark2 => {
                Self::fire(emitter, &[(EmitterState::Active, rates.k_return2)], rng)
            }
            // Absorbing state: no outgoing transitions, ever.
            EmitterState::Bleached => {}
        }
    }

    fn fire(emitter: &mut Emitter, candidates: &[(EmitterState, f64)], rng: &mut StdRng) {
        let total_rate: f64 = candidates.iter().map(|(_, k)| k).sum();
        if total_rate <= 0.0 {
            return;
        }

        let fires = rng.gen::<f64>() < 1.0 - (-total_rate).exp();
        if !fires {
            return;
        }

        // Pick the transition, weighted by relative rate.
        let mut pick = rng.gen::<f64>() * total_rate;
        for (next, k) in candidates {
            if pick < *k {
                emitter.state = *next;
                return;
            }
            pick -= k;
        }
        // Floating point slack: fall back to the last candidate.
        if let Some((next, _)) = candidates.last() {
            emitter.state = *next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn rates() -> TransitionRates {
        TransitionRates::from(&FluorophoreConfig::default())
    }

    #[test]
    fn test_inactive_without_power_stays_inactive() {
        let engine = PhotophysicsEngine::new(2500.0).expect("engine");
        let mut rng = StdRng::seed_from_u64(1);
        let mut emitter = Emitter::new(0.0, 0.0, rates());
        for _ in 0..100 {
            let photons = engine.step_emitter(&mut emitter, 0.0, &mut rng);
            assert_eq!(photons, 0);
            assert_eq!(emitter.state, EmitterState::Inactive);
        }
    }

    #[test]
    fn test_activation_under_high_power() {
        let engine = PhotophysicsEngine::new(2500.0).expect("engine");
        let mut rng = StdRng::seed_from_u64(2);
        let mut emitter = Emitter::new(0.0, 0.0, rates());
        // kA = 100 and power 1.0 makes the per-frame firing probability
        // effectively 1.
        let photons = engine.step_emitter(&mut emitter, 1.0, &mut rng);
        assert_eq!(emitter.state, EmitterState::Active);
        assert!(photons > 0);
    }

    #[test]
    fn test_bleached_is_absorbing() {
        let engine = PhotophysicsEngine::new(2500.0).expect("engine");
        let mut rng = StdRng::seed_from_u64(3);
        let mut emitter = Emitter::new(0.0, 0.0, rates());
        emitter.rates.k_bleach = 1e9;
        emitter.state = EmitterState::Active;

        // The enormous bleach rate fires on the first step.
        engine.step_emitter(&mut emitter, 1.0, &mut rng);
        assert_eq!(emitter.state, EmitterState::Bleached);

        for _ in 0..100 {
            let photons = engine.step_emitter(&mut emitter, 1.0, &mut rng);
            assert_eq!(photons, 0);
            assert_eq!(emitter.state, EmitterState::Bleached);
        }
    }

    #[test]
    fn test_dark_state_round_trip() {
        let engine = PhotophysicsEngine::new(2500.0).expect("engine");
        let mut rng = StdRng::seed_from_u64(4);
        let mut emitter = Emitter::new(0.0, 0.0, rates());
        emitter.state = EmitterState::Active;
        emitter.rates.k_bleach = 0.0;
        emitter.rates.k_dark1 = 1e9;
        emitter.rates.k_dark2 = 0.0;
        emitter.rates.k_return1 = 1e9;

        engine.step_emitter(&mut emitter, 1.0, &mut rng);
        assert_eq!(emitter.state, EmitterState::Dark1);
        engine.step_emitter(&mut emitter, 1.0, &mut rng);
        assert_eq!(emitter.state, EmitterState::Active);
    }

    #[test]
    fn test_emission_mean_tracks_signal() {
        let engine = PhotophysicsEngine::new(2500.0).expect("engine");
        let mut rng = StdRng::seed_from_u64(5);
        let mut emitter = Emitter::new(0.0, 0.0, rates());
        emitter.state = EmitterState::Active;
        // Freeze the state machine so every frame emits.
        emitter.rates.k_bleach = 0.0;
        emitter.rates.k_dark1 = 0.0;
        emitter.rates.k_dark2 = 0.0;

        let frames = 500;
        let total: u64 = (0..frames)
            .map(|_| engine.step_emitter(&mut emitter, 1.0, &mut rng))
            .sum();
        let mean = total as f64 / frames as f64;
        assert!((mean - 2500.0).abs() < 50.0, "mean emission {mean}");
    }

    #[test]
    fn test_zero_signal_emits_nothing() {
        let engine = PhotophysicsEngine::new(0.0).expect("engine");
        let mut rng = StdRng::seed_from_u64(6);
        let mut emitter = Emitter::new(0.0, 0.0, rates());
        emitter.state = EmitterState::Active;
        assert_eq!(engine.step_emitter(&mut emitter, 1.0, &mut rng), 0);
    }

    #[test]
    fn test_deterministic_given_seed() {
        let engine = PhotophysicsEngine::new(2500.0).expect("engine");
        let run = |seed: u64| {
            let mut rng = StdRng::seed_from_u64(seed);
            let mut emitter = Emitter::new(0.0, 0.0, rates());
            (0..50)
                .map(|_| engine.step_emitter(&mut emitter, 0.01, &mut rng))
                .collect::<Vec<_>>()
        };
        assert_eq!(run(42), run(42));
    }
}
