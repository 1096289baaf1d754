//! Microscope and server configuration.
//!
//! All simulation parameters live in plain, immutable configuration structs
//! that are validated once at construction time through
//! [`MicroscopeConfig::build`]. A [`SimulationInstance`](crate::simulation)
//! owns its config exclusively and never mutates it afterwards.
//!
//! Historically the camera parameters existed in two divergent definitions
//! (one deprecated); they are collapsed here into the single canonical
//! [`CameraConfig`]. Quantities the old definitions stored redundantly
//! (thermal noise, digital FWHM) are derived methods instead of fields, so
//! they cannot drift out of sync.
//!
//! The server binary loads a [`ServerConfig`] through Figment, layering a
//! TOML file and `SMLM_`-prefixed environment variables over built-in
//! defaults. The defaults reproduce the reference acquisition setup: a
//! 32x32 px CMOS-style sensor, a 60x / NA 1.3 objective and PALM-type
//! fluorophore kinetics.

use std::path::Path;

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::error::{SimResult, SimulationError};
use crate::images::BitDepth;

/// Conversion between FWHM and the standard deviation of a Gaussian.
const FWHM_TO_SIGMA: f64 = 2.354_820_045_030_949_3; // 2 * sqrt(2 * ln 2)

/// Camera sensor parameters (canonical definition).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraConfig {
    /// Horizontal image size [pixels].
    pub width: usize,
    /// Vertical image size [pixels].
    pub height: usize,
    /// Frame rate [frames/second].
    pub frame_rate: f64,
    /// Quantum efficiency [0.0-1.0].
    pub quantum_efficiency: f64,
    /// Dark current [electrons/second/pixel].
    pub dark_current: f64,
    /// Readout noise standard deviation [electrons RMS].
    pub readout_noise: f64,
    /// Electron multiplication gain. Zero disables EM mode (CMOS path).
    pub em_gain: f64,
    /// Conversion factor between electrons and analog-to-digital units.
    pub adu_per_electron: f64,
    /// Pixel baseline (zero-signal mean) [ADU].
    pub baseline: u16,
    /// Physical size of a pixel [microns].
    pub pixel_size: f64,
    /// Bit depth of the digital output.
    pub bit_depth: BitDepth,
}

impl CameraConfig {
    /// Expected dark-current electrons accumulated over one frame.
    pub fn thermal_noise(&self) -> f64 {
        self.dark_current / self.frame_rate
    }

    fn validate(&self) -> SimResult<()> {
        if self.width == 0 || self.height == 0 {
            return Err(SimulationError::Configuration(
                "camera dimensions must be positive".into(),
            ));
        }
        if !(self.frame_rate > 0.0) {
            return Err(SimulationError::Configuration(format!(
                "frame rate must be positive, got {}",
                self.frame_rate
            )));
        }
        if !(0.0..=1.0).contains(&self.quantum_efficiency) {
            return Err(SimulationError::Configuration(format!(
                "quantum efficiency must be in [0, 1], got {}",
                self.quantum_efficiency
            )));
        }
        for (name, value) in [
            ("dark current", self.dark_current),
            ("readout noise", self.readout_noise),
            ("EM gain", self.em_gain),
        ] {
            if !(value >= 0.0) {
                return Err(SimulationError::Configuration(format!(
                    "{name} must be non-negative, got {value}"
                )));
            }
        }
        if !(self.adu_per_electron > 0.0) {
            return Err(SimulationError::Configuration(format!(
                "ADU per electron must be positive, got {}",
                self.adu_per_electron
            )));
        }
        if !(self.pixel_size > 0.0) {
            return Err(SimulationError::Configuration(format!(
                "pixel size must be positive, got {}",
                self.pixel_size
            )));
        }
        Ok(())
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            width: 32,
            height: 32,
            frame_rate: 100.0,
            quantum_efficiency: 0.8,
            dark_current: 0.06,
            readout_noise: 1.6,
            em_gain: 0.0,
            adu_per_electron: 2.2,
            baseline: 100,
            pixel_size: 6.45,
            bit_depth: BitDepth::Sixteen,
        }
    }
}

/// Microscope objective parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectiveConfig {
    /// Numerical aperture [-].
    pub na: f64,
    /// Magnification [-].
    pub magnification: f64,
}

impl ObjectiveConfig {
    fn validate(&self) -> SimResult<()> {
        if !(self.na > 0.0) || !(self.magnification > 0.0) {
            return Err(SimulationError::Configuration(format!(
                "objective NA and magnification must be positive, got NA={} mag={}",
                self.na, self.magnification
            )));
        }
        Ok(())
    }
}

impl Default for ObjectiveConfig {
    fn default() -> Self {
        Self {
            na: 1.3,
            magnification: 60.0,
        }
    }
}

/// Excitation laser parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaserConfig {
    /// Power at instance creation.
    pub current_power: f64,
    /// Lower actuation bound.
    pub min_power: f64,
    /// Upper actuation bound.
    pub max_power: f64,
}

impl LaserConfig {
    fn validate(&self) -> SimResult<()> {
        if self.min_power > self.max_power {
            return Err(SimulationError::Configuration(format!(
                "laser power bounds inverted: min {} > max {}",
                self.min_power, self.max_power
            )));
        }
        if self.current_power < self.min_power || self.current_power > self.max_power {
            return Err(SimulationError::Configuration(format!(
                "initial laser power {} outside [{}, {}]",
                self.current_power, self.min_power, self.max_power
            )));
        }
        Ok(())
    }
}

impl Default for LaserConfig {
    fn default() -> Self {
        Self {
            current_power: 0.0,
            min_power: 0.0,
            max_power: 500.0,
        }
    }
}

/// Fluorophore photophysics: emission strength and per-frame rate constants.
///
/// Rates are in units of 1/frame. The activation rate is scaled by the
/// current laser power before sampling, which is how the feedback loop
/// influences the photoactivation density across frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FluorophoreConfig {
    /// Mean emitted photons per fluorophore per frame while active.
    pub signal: f64,
    /// Emission wavelength [microns]; determines the PSF width.
    pub wavelength: f64,
    /// Activation rate `Inactive -> Active`, per unit laser power.
    pub k_activation: f64,
    /// Bleaching rate `Active -> Bleached`.
    pub k_bleach: f64,
    /// Transition rate to the first dark state `Active -> Dark1`.
    pub k_dark1: f64,
    /// Return rate from the first dark state `Dark1 -> Active`.
    pub k_return1: f64,
    /// Transition rate to the second dark state `Active -> Dark2`.
    pub k_dark2: f64,
    /// Return rate from the second dark state `Dark2 -> Active`.
    pub k_return2: f64,
}

impl FluorophoreConfig {
    fn validate(&self) -> SimResult<()> {
        if !(self.signal >= 0.0) {
            return Err(SimulationError::Configuration(format!(
                "photon signal must be non-negative, got {}",
                self.signal
            )));
        }
        if !(self.wavelength > 0.0) {
            return Err(SimulationError::Configuration(format!(
                "wavelength must be positive, got {}",
                self.wavelength
            )));
        }
        for (name, rate) in [
            ("k_activation", self.k_activation),
            ("k_bleach", self.k_bleach),
            ("k_dark1", self.k_dark1),
            ("k_return1", self.k_return1),
            ("k_dark2", self.k_dark2),
            ("k_return2", self.k_return2),
        ] {
            if !(rate >= 0.0) {
                return Err(SimulationError::Configuration(format!(
                    "rate constant {name} must be non-negative, got {rate}"
                )));
            }
        }
        Ok(())
    }
}

impl Default for FluorophoreConfig {
    fn default() -> Self {
        Self {
            signal: 2500.0,
            wavelength: 0.6,
            k_activation: 100.0,
            k_bleach: 0.0,
            k_dark1: 0.065,
            k_return1: 0.004,
            k_dark2: 0.013,
            k_return2: 0.157,
        }
    }
}

/// How the initial emitter population is laid out on the sensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EmitterDistribution {
    /// A square grid with the given spacing in pixels. An `n x n` sensor
    /// with spacing `s` yields `(n/s - 1)^2` emitters.
    Grid { spacing: usize },
    /// Uniformly random positions across the field of view.
    Random { count: usize },
}

impl Default for EmitterDistribution {
    fn default() -> Self {
        Self::Grid { spacing: 4 }
    }
}

/// Fixed bright markers used for drift correction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FiducialConfig {
    /// Number of fiducials placed at random positions.
    pub count: usize,
    /// Constant brightness [photons/frame].
    pub brightness: f64,
}

impl Default for FiducialConfig {
    fn default() -> Self {
        Self {
            count: 2,
            brightness: 3000.0,
        }
    }
}

/// Uniform background light.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackgroundConfig {
    /// Constant photon count added to every pixel each frame.
    pub photons: f64,
}

impl Default for BackgroundConfig {
    fn default() -> Self {
        Self { photons: 10.0 }
    }
}

/// Complete, validated microscope description.
///
/// Built once at instance creation via [`MicroscopeConfig::build`] and owned
/// exclusively by its simulation instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MicroscopeConfig {
    pub camera: CameraConfig,
    pub objective: ObjectiveConfig,
    pub laser: LaserConfig,
    pub fluorophore: FluorophoreConfig,
    pub emitters: EmitterDistribution,
    pub fiducials: FiducialConfig,
    pub background: BackgroundConfig,
}

impl Default for MicroscopeConfig {
    fn default() -> Self {
        Self {
            camera: CameraConfig::default(),
            objective: ObjectiveConfig::default(),
            laser: LaserConfig::default(),
            fluorophore: FluorophoreConfig::default(),
            emitters: EmitterDistribution::default(),
            fiducials: FiducialConfig::default(),
            background: BackgroundConfig::default(),
        }
    }
}

impl MicroscopeConfig {
    /// Validates all parameters and returns the config, or the first
    /// configuration error found.
    pub fn build(self) -> SimResult<Self> {
        self.camera.validate()?;
        self.objective.validate()?;
        self.laser.validate()?;
        self.fluorophore.validate()?;
        match &self.emitters {
            EmitterDistribution::Grid { spacing } => {
                if *spacing == 0 || *spacing >= self.camera.width.min(self.camera.height) {
                    return Err(SimulationError::Configuration(format!(
                        "grid spacing {} does not fit a {}x{} sensor",
                        spacing, self.camera.width, self.camera.height
                    )));
                }
            }
            EmitterDistribution::Random { .. } => {}
        }
        if !(self.fiducials.brightness >= 0.0) {
            return Err(SimulationError::Configuration(format!(
                "fiducial brightness must be non-negative, got {}",
                self.fiducials.brightness
            )));
        }
        if !(self.background.photons >= 0.0) {
            return Err(SimulationError::Configuration(format!(
                "background photons must be non-negative, got {}",
                self.background.photons
            )));
        }
        Ok(self)
    }

    /// Digital full width at half maximum of the point-spread function,
    /// in pixels: `0.61 * wavelength * magnification / (NA * pixel_size)`.
    pub fn fwhm_digital(&self) -> f64 {
        0.61 * self.fluorophore.wavelength * self.objective.magnification
            / (self.objective.na * self.camera.pixel_size)
    }

    /// Standard deviation of the Gaussian PSF in pixels.
    pub fn psf_sigma(&self) -> f64 {
        self.fwhm_digital() / FWHM_TO_SIGMA
    }

    /// Field-of-view area in object space:
    /// `pixel_size^2 * width * height / magnification^2`.
    pub fn fov_size(&self) -> f64 {
        self.camera.pixel_size * self.camera.pixel_size
            * self.camera.width as f64
            * self.camera.height as f64
            / (self.objective.magnification * self.objective.magnification)
    }

    /// Size of one camera pixel projected into object space.
    pub fn object_space_pixel_size(&self) -> f64 {
        self.camera.pixel_size / self.objective.magnification
    }
}

/// Top-level configuration for the RPC server binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Socket address to listen on.
    pub listen: String,
    /// Base seed for all per-instance random streams.
    pub seed: u64,
    /// Template microscope used for `createSimulation` requests.
    pub microscope: MicroscopeConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:9090".to_string(),
            seed: 42,
            microscope: MicroscopeConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Loads configuration by layering an optional TOML file and
    /// `SMLM_`-prefixed environment variables over the defaults.
    ///
    /// Nested keys use `__` in the environment, e.g.
    /// `SMLM_MICROSCOPE__CAMERA__WIDTH=64`.
    pub fn load(path: Option<&Path>) -> SimResult<Self> {
        let mut figment = Figment::from(Serialized::defaults(ServerConfig::default()));
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        let config: ServerConfig = figment
            .merge(Env::prefixed("SMLM_").split("__"))
            .extract()
            .map_err(|e| SimulationError::Configuration(e.to_string()))?;
        config.microscope.clone().build()?;
        Ok(config)
    }
}
