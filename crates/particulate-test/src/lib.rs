//! Test harness for the Particulate particle engine.
//!
//! Drives a drawable frame by frame over the host backend, so the
//! simulate and draw passes can be observed without a device.

pub mod harness;

pub use harness::{floats, HeadlessParticles};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TestError {
    #[error("Particle error: {0}")]
    Particle(#[from] particulate_particles::ParticleError),
    #[error("GPU error: {0}")]
    Gpu(#[from] particulate_gpu::GpuError),
    #[error("Harness error: {0}")]
    Harness(String),
}

pub type Result<T> = std::result::Result<T, TestError>;

/// Uniforms every harness program declares.
pub const FRAME_UNIFORMS: [&str; 14] = [
    "u_mvpMatrix",
    "u_mvpInvMatrix",
    "u_mvMatrix",
    "u_mvNormalMatrix",
    "u_mvpNormalMatrix",
    "u_pMatrix",
    "u_scale",
    "u_eyeVec",
    "u_eyePos",
    "u_size",
    "u_time",
    "u_lifetime",
    "u_pixDispSize",
    "u_frameLen",
];
