//! Core library for the smlm_sim application.
//!
//! A digital twin of a PALM/STORM super-resolution microscope: blinking
//! point emitters, a Gaussian optical train, a noisy digital camera and an
//! excitation-laser feedback loop, exposed to acquisition and control
//! software through a multi-tenant RPC service. Used by the server binary
//! and by integration tests driving the service layer directly.

pub mod batch;
pub mod config;
pub mod controller;
pub mod error;
pub mod images;
pub mod manager;
pub mod optics;
pub mod photophysics;
pub mod sensor;
pub mod server;
pub mod simulation;
