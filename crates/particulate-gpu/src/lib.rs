//! Device abstraction layer for the Particulate particle engine.
//!
//! This crate provides:
//! - Capability traits for buffer allocation, programs and draw recording
//! - An in-memory host backend for headless runs and tests
//! - A Vulkan backend using gpu-allocator and transform feedback

pub mod backend;
pub mod error;
pub mod host;
#[cfg(feature = "vulkan")]
pub mod vulkan;

pub use backend::{
    AttributeSlot, BufferAllocator, BufferHandle, DrawCall, FeedbackBinding, RenderBackend,
    ShaderProgram, TextureHandle, TextureResolver, UniformSlot, UniformValue, VertexBinding,
};
pub use error::{GpuError, Result};
pub use host::{HostBackend, HostBufferAllocator, HostProgram};
