//! Capability traits between the particle system and a graphics backend.
//!
//! The particle core never talks to a graphics API directly. It allocates
//! device buffers through a [`BufferAllocator`], looks up program inputs
//! through a [`ShaderProgram`] and records binds and draws on a
//! [`RenderBackend`]. The [`host`](crate::host) module provides an in-memory
//! implementation of all three; [`vulkan`](crate::vulkan) records into a
//! command buffer.

use glam::{Mat4, Vec2, Vec3, Vec4};
use particulate_core::{AttributeFormat, TextureId};

use crate::error::Result;

/// Opaque device buffer handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferHandle(pub u64);

/// Opaque device texture handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureHandle(pub u64);

/// Allocates and writes device buffers.
///
/// All methods take `&self` so one allocator can be shared between the render
/// thread and producer threads.
pub trait BufferAllocator: Send + Sync {
    /// Allocate a buffer of `size` bytes. Contents are unspecified.
    fn allocate(&self, size: u64, label: &str) -> Result<BufferHandle>;

    /// Release a buffer. Releasing an unknown handle is an error.
    fn release(&self, handle: BufferHandle) -> Result<()>;

    /// Copy `data` into the buffer starting at byte `offset`.
    fn write(&self, handle: BufferHandle, offset: u64, data: &[u8]) -> Result<()>;

    /// Fill the whole buffer with zero bytes.
    fn zero(&self, handle: BufferHandle) -> Result<()>;

    /// Size of a live buffer in bytes.
    fn size(&self, handle: BufferHandle) -> Option<u64>;
}

/// Location of an attribute input in a program.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AttributeSlot(pub u32);

/// Location of a uniform in a program.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UniformSlot(pub u32);

/// A uniform value.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum UniformValue {
    Int(i32),
    Float(f32),
    Vec2(Vec2),
    Vec3(Vec3),
    Vec4(Vec4),
    Mat4(Mat4),
}

impl UniformValue {
    /// Raw bytes of the value, as pushed to the device.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Self::Int(v) => bytemuck::bytes_of(v).to_vec(),
            Self::Float(v) => bytemuck::bytes_of(v).to_vec(),
            Self::Vec2(v) => bytemuck::bytes_of(v).to_vec(),
            Self::Vec3(v) => bytemuck::bytes_of(v).to_vec(),
            Self::Vec4(v) => bytemuck::bytes_of(v).to_vec(),
            Self::Mat4(v) => bytemuck::bytes_of(v).to_vec(),
        }
    }
}

/// A compiled program the particle system draws or simulates with.
pub trait ShaderProgram {
    /// Look up an attribute input by name.
    fn find_attribute(&self, name: &str) -> Option<AttributeSlot>;

    /// Look up a uniform by name.
    fn find_uniform(&self, name: &str) -> Option<UniformSlot>;

    /// Set a uniform for subsequent draws.
    fn set_uniform(&mut self, slot: UniformSlot, value: UniformValue);

    /// Bind the program's own textures and return how many units they use.
    /// Drawable textures are bound after these.
    fn bind_textures(&mut self) -> u32;

    /// Set a uniform by name. Unknown names are ignored.
    fn set_uniform_named(&mut self, name: &str, value: UniformValue) -> bool {
        match self.find_uniform(name) {
            Some(slot) => {
                self.set_uniform(slot, value);
                true
            }
            None => false,
        }
    }
}

/// Resolves logical texture ids to device textures.
pub trait TextureResolver {
    fn resolve(&self, id: TextureId) -> Option<TextureHandle>;
}

impl TextureResolver for hashbrown::HashMap<TextureId, TextureHandle> {
    fn resolve(&self, id: TextureId) -> Option<TextureHandle> {
        self.get(&id).copied()
    }
}

/// Source of one attribute stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VertexBinding {
    pub buffer: BufferHandle,
    /// Byte offset of the first value.
    pub offset: u64,
    /// Bytes between consecutive values. Zero means tightly packed.
    pub stride: u32,
    pub format: AttributeFormat,
    /// 0 advances per vertex, 1 advances per instance.
    pub divisor: u32,
}

impl VertexBinding {
    /// Effective distance between consecutive values.
    #[inline]
    pub fn effective_stride(&self) -> u64 {
        if self.stride == 0 {
            u64::from(self.format.byte_size())
        } else {
            u64::from(self.stride)
        }
    }

    /// Byte range touched when reading `count` values.
    pub fn extent(&self, count: u32) -> u64 {
        if count == 0 {
            return 0;
        }
        u64::from(count - 1) * self.effective_stride() + u64::from(self.format.byte_size())
    }
}

/// Range of a buffer that receives captured vertex outputs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FeedbackBinding {
    /// Output index, matching the varying's declaration order.
    pub index: u32,
    pub buffer: BufferHandle,
    pub offset: u64,
    pub size: u64,
}

/// A draw submission.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DrawCall {
    /// One point per vertex.
    Points { vertex_count: u32 },
    /// `vertex_count` template vertices repeated `instance_count` times as
    /// a triangle list.
    InstancedTriangles {
        vertex_count: u32,
        instance_count: u32,
    },
}

/// Records binds and draws for one pass.
pub trait RenderBackend {
    fn bind_attribute(&mut self, slot: AttributeSlot, binding: VertexBinding) -> Result<()>;
    fn unbind_attribute(&mut self, slot: AttributeSlot);

    fn bind_texture(&mut self, unit: u32, texture: TextureHandle) -> Result<()>;
    fn unbind_texture(&mut self, unit: u32);

    fn bind_feedback_output(&mut self, binding: FeedbackBinding) -> Result<()>;
    fn unbind_feedback_output(&mut self, index: u32);

    /// Run the bound program over `vertex_count` points with rasterization
    /// discarded, capturing outputs into the bound feedback ranges.
    fn issue_feedback(&mut self, vertex_count: u32) -> Result<()>;

    fn issue_draw(&mut self, call: DrawCall) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_bytes_match_value_size() {
        assert_eq!(UniformValue::Int(3).to_bytes(), 3i32.to_ne_bytes().to_vec());
        assert_eq!(UniformValue::Vec3(Vec3::ONE).to_bytes().len(), 12);
        assert_eq!(UniformValue::Mat4(Mat4::IDENTITY).to_bytes().len(), 64);
    }

    #[test]
    fn binding_extent() {
        let binding = VertexBinding {
            buffer: BufferHandle(1),
            offset: 0,
            stride: 20,
            format: AttributeFormat::Float3,
            divisor: 0,
        };
        assert_eq!(binding.extent(0), 0);
        assert_eq!(binding.extent(1), 12);
        assert_eq!(binding.extent(3), 52);

        let packed = VertexBinding { stride: 0, ..binding };
        assert_eq!(packed.effective_stride(), 12);
        assert_eq!(packed.extent(3), 36);
    }

    #[test]
    fn texture_map_resolves() {
        let mut map = hashbrown::HashMap::new();
        map.insert(TextureId(4), TextureHandle(40));
        assert_eq!(map.resolve(TextureId(4)), Some(TextureHandle(40)));
        assert_eq!(map.resolve(TextureId(5)), None);
    }
}
