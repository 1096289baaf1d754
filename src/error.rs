//! Error types for the simulation library.
//!
//! This module defines the primary error type, `SimulationError`, used across
//! the whole crate. Using the `thiserror` crate, it provides a centralized and
//! consistent way to handle the different failure classes the simulator can
//! encounter:
//!
//! - **`Configuration`**: semantic errors in microscope or server parameters
//!   (non-positive frame rate, negative rate constants, malformed config
//!   files). Fatal to instance creation; the manager never registers a
//!   partially built instance.
//! - **`UnknownSimulationId`**: a request named a simulation id that is not
//!   present in the registry. Reported to the caller; other instances are
//!   unaffected.
//! - **`ImageShape`**: a dataset append or concatenate with mismatched frame
//!   dimensions. The dataset is left unmodified.
//! - **`InvalidSlice`**: the active-slice cursor was moved outside the
//!   dataset.
//! - **`Encode`**: TIFF serialization failed.
//! - **`Io` / `Transport`**: socket-level failures, scoped to the failing
//!   connection or server task.

use thiserror::Error;

/// Convenience alias for results using the library error type.
pub type SimResult<T> = std::result::Result<T, SimulationError>;

#[derive(Error, Debug)]
pub enum SimulationError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Unknown simulation id: {0}")]
    UnknownSimulationId(u32),

    #[error("Image shape mismatch: expected {expected_width}x{expected_height}, got {actual_width}x{actual_height}")]
    ImageShape {
        expected_width: usize,
        expected_height: usize,
        actual_width: usize,
        actual_height: usize,
    },

    #[error("Slice index {index} out of range for dataset of {len} frames")]
    InvalidSlice { index: usize, len: usize },

    #[error("TIFF encoding error: {0}")]
    Encode(#[from] tiff::TiffError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Transport error: {0}")]
    Transport(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SimulationError::UnknownSimulationId(7);
        assert_eq!(err.to_string(), "Unknown simulation id: 7");
    }

    #[test]
    fn test_shape_error_display() {
        let err = SimulationError::ImageShape {
            expected_width: 32,
            expected_height: 32,
            actual_width: 64,
            actual_height: 64,
        };
        assert!(err.to_string().contains("expected 32x32"));
        assert!(err.to_string().contains("got 64x64"));
    }
}
