//! Particle system error types.

use particulate_gpu::GpuError;
use thiserror::Error;

/// Errors raised by the particle ring and drawable.
#[derive(Error, Debug)]
pub enum ParticleError {
    /// Committed attribute data does not match the layout. The commit was
    /// rejected without touching the buffer.
    #[error("Attribute mismatch: expected {expected}, got {actual} ({detail})")]
    AttributeMismatch {
        expected: usize,
        actual: usize,
        detail: String,
    },

    /// Configuration rejected by validation.
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    /// Batch handle is stale or was never allocated.
    #[error("Invalid batch handle: {0}")]
    InvalidHandle(String),

    /// Device resources for a drawable could not be created.
    #[error("Setup of `{drawable}` failed: {source}")]
    Setup {
        drawable: String,
        #[source]
        source: GpuError,
    },

    /// Resources are not set up.
    #[error("Not ready: {0}")]
    NotReady(String),

    /// Device error.
    #[error("GPU error: {0}")]
    Gpu(#[from] GpuError),

    /// Core error.
    #[error(transparent)]
    Core(#[from] particulate_core::Error),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, ParticleError>;
