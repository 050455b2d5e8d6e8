//! Vulkan implementation of the backend traits.
//!
//! Buffers are persistently mapped `CpuToGpu` allocations so producer
//! threads can write particle data without staging. Captured outputs use
//! `VK_EXT_transform_feedback`.

mod allocator;
mod heap;
mod program;
mod recorder;
mod vertex_input;

pub use allocator::VulkanBufferAllocator;
pub use heap::{DeviceHeap, MappedBuffer};
pub use program::VulkanProgram;
pub use recorder::VulkanRecorder;
pub use vertex_input::{vertex_format, vertex_input_descriptions};
