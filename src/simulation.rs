//! A single running acquisition simulation.
//!
//! A [`SimulationInstance`] couples one immutable [`MicroscopeConfig`] with
//! all mutable per-frame state: emitter states, the growing output dataset,
//! the excitation laser and the true-signal history. State is mutated only
//! through the instance's own methods; the manager wraps each instance in a
//! `tokio::sync::Mutex` so two operations on the same id never run
//! concurrently.
//!
//! Each instance owns its own `StdRng` stream, seeded from the base seed and
//! the instance id (splitmix64-mixed). Construction-time draws (fiducial and
//! random emitter placement) and all per-frame draws come from that stream,
//! so a fixed seed plus a fixed per-instance operation order reproduces
//! byte-identical frames regardless of activity on other instances.

use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;
use tracing::debug;

use crate::config::MicroscopeConfig;
use crate::controller::{FeedbackController, Laser};
use crate::error::SimResult;
use crate::images::{ImageStack, InMemoryStack};
use crate::optics::{generate_positions, Fiducial, GaussianPsf, Obstructor, UniformBackground};
use crate::photophysics::{Emitter, EmitterState, PhotophysicsEngine, TransitionRates};
use crate::sensor::SensorModel;

/// Top-level key under which [`SimulationInstance::describe_ground_truth`]
/// stores the emitter array.
pub const FLUORESCENCE_JSON_NAME: &str = "fluorescence";

/// Derives a de-interleaved per-instance RNG seed from the base seed.
fn substream_seed(base_seed: u64, id: u32) -> u64 {
    let mut z = base_seed ^ (u64::from(id)).wrapping_mul(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// One running microscope simulation.
pub struct SimulationInstance {
    id: u32,
    config: MicroscopeConfig,
    emitters: Vec<Emitter>,
    obstructors: Vec<Box<dyn Obstructor>>,
    engine: PhotophysicsEngine,
    psf: GaussianPsf,
    sensor: SensorModel,
    laser: Laser,
    dataset: Box<dyn ImageStack>,
    /// Number of active emitters recorded at each simulated frame.
    true_signal: Vec<f64>,
    rng: StdRng,
}

impl SimulationInstance {
    /// Builds a new instance from a validated config. Construction draws the
    /// random emitter/fiducial placements from the instance's own stream.
    pub fn new(id: u32, config: MicroscopeConfig, base_seed: u64) -> SimResult<Self> {
        let config = config.build()?;
        let mut rng = StdRng::seed_from_u64(substream_seed(base_seed, id));

        let width = config.camera.width;
        let height = config.camera.height;
        let psf = GaussianPsf::from_fwhm(config.fwhm_digital());

        let rates = TransitionRates::from(&config.fluorophore);
        let emitters: Vec<Emitter> = generate_positions(&config.emitters, width, height, &mut rng)
            .into_iter()
            .map(|(x, y)| Emitter::new(x, y, rates))
            .collect();

        let mut obstructors: Vec<Box<dyn Obstructor>> = Vec::new();
        for _ in 0..config.fiducials.count {
            let x = rng.gen_range(0.0..width as f64);
            let y = rng.gen_range(0.0..height as f64);
            obstructors.push(Box::new(Fiducial::new(x, y, config.fiducials.brightness, psf)));
        }
        if config.background.photons > 0.0 {
            obstructors.push(Box::new(UniformBackground {
                photons: config.background.photons,
            }));
        }

        let engine = PhotophysicsEngine::new(config.fluorophore.signal)?;
        let sensor = SensorModel::new(&config.camera)?;
        let laser = Laser::new(&config.laser);
        let dataset = Box::new(InMemoryStack::new(
            format!("Simulation {id}"),
            width,
            height,
            config.camera.bit_depth,
        ));

        debug!(id, emitters = emitters.len(), "created simulation instance");
        Ok(Self {
            id,
            config,
            emitters,
            obstructors,
            engine,
            psf,
            sensor,
            laser,
            dataset,
            true_signal: Vec::new(),
            rng,
        })
    }

    /// Instance identifier assigned by the manager.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// The immutable microscope description.
    pub fn config(&self) -> &MicroscopeConfig {
        &self.config
    }

    /// Advances the simulation by one frame: photophysics, optical
    /// rendering, sensor digitization, dataset append. Returns the frame.
    pub fn advance_one_frame(&mut self) -> SimResult<Array2<u16>> {
        let width = self.config.camera.width;
        let height = self.config.camera.height;
        let mut accumulator = Array2::<f64>::zeros((height, width));

        for obstructor in &self.obstructors {
            obstructor.apply_to(&mut accumulator);
        }

        let power = self.laser.power();
        let mut active = 0usize;
        for emitter in &mut self.emitters {
            let photons = self.engine.step_emitter(emitter, power, &mut self.rng);
            if emitter.state == EmitterState::Active {
                active += 1;
            }
            if photons > 0 {
                self.psf
                    .splat(&mut accumulator, emitter.x, emitter.y, photons as f64);
            }
        }

        let frame = self.sensor.digitize(&accumulator, &mut self.rng)?;
        self.dataset.append(frame.clone())?;
        self.true_signal.push(active as f64);

        debug!(
            id = self.id,
            frame = self.frame_count(),
            active,
            "advanced one frame"
        );
        Ok(frame)
    }

    /// Number of frames simulated so far; equals the dataset length.
    pub fn frame_count(&self) -> usize {
        self.dataset.len()
    }

    /// The growing output dataset.
    pub fn dataset(&self) -> &dyn ImageStack {
        self.dataset.as_ref()
    }

    /// Current control signal (the laser power).
    pub fn control_signal(&self) -> f64 {
        self.laser.power()
    }

    /// Sets the control signal explicitly; the value is clamped to the
    /// configured power bounds and takes effect from the next frame.
    pub fn set_control_signal(&mut self, value: f64) {
        self.laser.set_power(value);
    }

    /// Runs one feedback adjustment: the controller maps the latest true
    /// signal and the setpoint onto a new laser power for the next frame.
    pub fn adjust_control(&mut self, controller: &FeedbackController, setpoint: f64) {
        let measured = self.true_signal.last().copied().unwrap_or(0.0);
        controller.adjust(&mut self.laser, measured, setpoint);
    }

    /// Field-of-view area in object space.
    pub fn fov_size(&self) -> f64 {
        self.config.fov_size()
    }

    /// Camera pixel size projected into object space.
    pub fn object_space_pixel_size(&self) -> f64 {
        self.config.object_space_pixel_size()
    }

    /// True signal for the given frame index: the number of emitters that
    /// were in the `Active` state at that frame, or 0 for frames that have
    /// not been simulated.
    pub fn true_signal(&self, frame: usize) -> f64 {
        self.true_signal.get(frame).copied().unwrap_or(0.0)
    }

    /// Short human-readable description of the true-signal quantity.
    pub fn true_signal_description(&self) -> &'static str {
        "Number of emitters in the ON state per frame"
    }

    /// Serializes the current emitter positions and states to a JSON object
    /// keyed by [`FLUORESCENCE_JSON_NAME`].
    pub fn describe_ground_truth(&self) -> String {
        let records: Vec<_> = self
            .emitters
            .iter()
            .enumerate()
            .map(|(index, e)| {
                json!({
                    "id": index,
                    "x": e.x,
                    "y": e.y,
                    "state": e.state,
                })
            })
            .collect();
        json!({ FLUORESCENCE_JSON_NAME: records }).to_string()
    }

    /// Short state snapshot; changes whenever the frame counter or the
    /// control signal changes.
    pub fn state_snapshot(&self) -> String {
        format!(
            "simulation {}: frame={} control_signal={:.6}",
            self.id,
            self.frame_count(),
            self.control_signal()
        )
    }
}
