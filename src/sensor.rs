//! Camera sensor model: noiseless photons in, noisy digital counts out.
//!
//! The transform is applied per pixel in a fixed order:
//!
//! 1. thinning by quantum efficiency (photons -> expected photoelectrons);
//! 2. dark-current contribution with mean `dark_current / frame_rate`;
//! 3. Poisson shot noise on the expected electron count;
//! 4. EM-CCD avalanche multiplication when EM gain is enabled, modeled as a
//!    gamma-distributed amplification with mean equal to the configured gain
//!    (skipped entirely on the CMOS path, gain = 0);
//! 5. zero-mean Gaussian readout noise;
//! 6. conversion to ADU, baseline offset, rounding and clipping to the
//!    declared bit-depth range.
//!
//! All draws come from the caller's seeded RNG stream, so a fixed seed plus a
//! fixed call order reproduces the output exactly.

use ndarray::Array2;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Gamma, Normal, Poisson};

use crate::config::CameraConfig;
use crate::error::{SimResult, SimulationError};
use crate::images::BitDepth;

/// Per-instance sensor noise pipeline.
#[derive(Debug, Clone)]
pub struct SensorModel {
    quantum_efficiency: f64,
    thermal_noise: f64,
    em_gain: f64,
    adu_per_electron: f64,
    baseline: f64,
    max_value: f64,
    bit_depth: BitDepth,
    readout: Option<Normal<f64>>,
}

impl SensorModel {
    pub fn new(camera: &CameraConfig) -> SimResult<Self> {
        let readout = if camera.readout_noise > 0.0 {
            Some(Normal::new(0.0, camera.readout_noise).map_err(|e| {
                SimulationError::Configuration(format!(
                    "invalid readout noise {}: {e}",
                    camera.readout_noise
                ))
            })?)
        } else {
            None
        };
        Ok(Self {
            quantum_efficiency: camera.quantum_efficiency,
            thermal_noise: camera.thermal_noise(),
            em_gain: camera.em_gain,
            adu_per_electron: camera.adu_per_electron,
            baseline: camera.baseline as f64,
            max_value: camera.bit_depth.max_value() as f64,
            bit_depth: camera.bit_depth,
            readout,
        })
    }

    /// Bit depth of the produced frames.
    pub fn bit_depth(&self) -> BitDepth {
        self.bit_depth
    }

    /// Transforms a noiseless photon image into the camera's digital output.
    pub fn digitize(&self, photons: &Array2<f64>, rng: &mut StdRng) -> SimResult<Array2<u16>> {
        let mut output = Array2::<u16>::zeros(photons.dim());
        for (out, &photon_count) in output.iter_mut().zip(photons.iter()) {
            *out = self.digitize_pixel(photon_count, rng)?;
        }
        Ok(output)
    }

    fn digitize_pixel(&self, photons: f64, rng: &mut StdRng) -> SimResult<u16> {
        let mean_electrons = photons.max(0.0) * self.quantum_efficiency + self.thermal_noise;

        let mut electrons = if mean_electrons > 0.0 {
            let shot = Poisson::new(mean_electrons).map_err(|e| {
                SimulationError::Configuration(format!(
                    "invalid shot-noise mean {mean_electrons}: {e}"
                ))
            })?;
            shot.sample(rng)
        } else {
            0.0
        };

        if self.em_gain > 0.0 && electrons > 0.0 {
            // Avalanche multiplication: the sum of `electrons` exponential
            // amplifications is gamma-distributed with shape = electron
            // count and scale = gain.
            let gamma = Gamma::new(electrons, self.em_gain).map_err(|e| {
                SimulationError::Configuration(format!(
                    "invalid EM amplification (shape {electrons}, gain {}): {e}",
                    self.em_gain
                ))
            })?;
            electrons = gamma.sample(rng);
        }

        if let Some(readout) = &self.readout {
            electrons += readout.sample(rng);
        }

        let adu = (electrons * self.adu_per_electron + self.baseline).round();
        Ok(adu.clamp(0.0, self.max_value) as u16)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn noiseless_camera() -> CameraConfig {
        CameraConfig {
            dark_current: 0.0,
            readout_noise: 0.0,
            ..CameraConfig::default()
        }
    }

    #[test]
    fn test_dark_image_is_baseline_without_noise_sources() {
        let sensor = SensorModel::new(&noiseless_camera()).expect("sensor");
        let mut rng = StdRng::seed_from_u64(1);
        let frame = sensor
            .digitize(&Array2::zeros((16, 16)), &mut rng)
            .expect("digitize");
        assert!(frame.iter().all(|&v| v == 100));
    }

    #[test]
    fn test_signal_mean_close_to_expectation() {
        let sensor = SensorModel::new(&CameraConfig::default()).expect("sensor");
        let mut rng = StdRng::seed_from_u64(2);
        let photons = Array2::from_elem((64, 64), 1000.0);
        let frame = sensor.digitize(&photons, &mut rng).expect("digitize");

        let mean: f64 = frame.iter().map(|&v| v as f64).sum::<f64>() / frame.len() as f64;
        // E[ADU] = photons * QE * ADU/e- + baseline = 1000*0.8*2.2 + 100.
        let expected = 1000.0 * 0.8 * 2.2 + 100.0;
        assert!(
            (mean - expected).abs() < expected * 0.02,
            "mean {mean} vs expected {expected}"
        );
    }

    #[test]
    fn test_em_gain_amplifies_signal() {
        let mut camera = noiseless_camera();
        camera.em_gain = 100.0;
        let sensor = SensorModel::new(&camera).expect("sensor");
        let mut rng = StdRng::seed_from_u64(3);

        let photons = Array2::from_elem((32, 32), 50.0);
        let frame = sensor.digitize(&photons, &mut rng).expect("digitize");
        let mean: f64 = frame.iter().map(|&v| v as f64).sum::<f64>() / frame.len() as f64;
        // E[ADU] = photons * QE * gain * ADU/e- + baseline, clipped at 65535;
        // 50 * 0.8 * 100 * 2.2 + 100 = 8900.
        assert!((mean - 8900.0).abs() < 8900.0 * 0.1, "mean {mean}");
    }

    #[test]
    fn test_output_clipped_to_bit_depth() {
        let mut camera = noiseless_camera();
        camera.bit_depth = BitDepth::Eight;
        let sensor = SensorModel::new(&camera).expect("sensor");
        let mut rng = StdRng::seed_from_u64(4);

        let photons = Array2::from_elem((8, 8), 1e6);
        let frame = sensor.digitize(&photons, &mut rng).expect("digitize");
        assert!(frame.iter().all(|&v| v == 255));
    }

    #[test]
    fn test_deterministic_given_seed() {
        let sensor = SensorModel::new(&CameraConfig::default()).expect("sensor");
        let photons = Array2::from_elem((32, 32), 200.0);

        let mut rng_a = StdRng::seed_from_u64(42);
        let mut rng_b = StdRng::seed_from_u64(42);
        let a = sensor.digitize(&photons, &mut rng_a).expect("digitize");
        let b = sensor.digitize(&photons, &mut rng_b).expect("digitize");
        assert_eq!(a, b);
    }
}
