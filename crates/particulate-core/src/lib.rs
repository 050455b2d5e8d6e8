//! Core types for the Particulate particle engine.
//!
//! This crate provides the foundational types shared by the GPU layer and the
//! particle system:
//! - Per-vertex attribute layouts (static and computed streams)
//! - Per-frame information supplied by the frame driver
//! - Identifiers for drawables, textures, programs and render targets
//! - Common error types

pub mod error;
pub mod frame;
pub mod layout;
pub mod types;

pub use error::{Error, Result};
pub use frame::FrameInfo;
pub use layout::{AttributeFormat, AttributeLayout, AttributeSpec, VaryingSpec};
pub use types::{DrawableId, ProgramId, RenderTargetId, TextureId};

/// Engine-wide constants
pub mod constants {
    /// Maximum number of texture units a single particle draw may bind.
    pub const MAX_TEXTURES: u32 = 8;
    /// Vertices in the instanced billboard template (two triangles).
    pub const TEMPLATE_VERTEX_COUNT: u32 = 6;
}
