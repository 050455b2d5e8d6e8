//! Error types for shared particle data.

use thiserror::Error;

/// Error raised while describing particle data.
#[derive(Error, Debug)]
pub enum Error {
    /// Attribute layout is malformed
    #[error("Invalid layout: {0}")]
    InvalidLayout(String),
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
