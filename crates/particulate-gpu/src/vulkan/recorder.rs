use std::ptr;

use ash::vk;
use ash::vk::Handle;

use super::allocator::VulkanBufferAllocator;
use crate::backend::{
    AttributeSlot, BufferHandle, DrawCall, FeedbackBinding, RenderBackend, TextureHandle,
    VertexBinding,
};
use crate::error::{GpuError, Result};

/// Transform feedback binding points that currently hold a buffer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct BoundOutputs(u32);

impl BoundOutputs {
    const MAX: u32 = u32::BITS;

    fn bind(&mut self, index: u32) -> Result<()> {
        if index >= Self::MAX {
            return Err(GpuError::InvalidState(format!(
                "feedback binding {index} exceeds {} binding points",
                Self::MAX
            )));
        }
        self.0 |= 1 << index;
        Ok(())
    }

    fn unbind(&mut self, index: u32) {
        if index < Self::MAX {
            self.0 &= !(1 << index);
        }
    }

    /// Binding points a capture has to cover, up to the highest bound one.
    fn span(self) -> u32 {
        Self::MAX - self.0.leading_zeros()
    }
}

/// Records particle binds and draws into a command buffer.
///
/// Attribute slots are vertex binding indices. Texture handles are raw
/// descriptor sets, bound at the set index equal to the texture unit.
pub struct VulkanRecorder<'a> {
    device: &'a ash::Device,
    transform_feedback: Option<&'a ash::ext::transform_feedback::Device>,
    buffers: &'a VulkanBufferAllocator,
    cmd: vk::CommandBuffer,
    layout: vk::PipelineLayout,
    feedback_bound: BoundOutputs,
}

impl<'a> VulkanRecorder<'a> {
    pub fn new(
        device: &'a ash::Device,
        buffers: &'a VulkanBufferAllocator,
        cmd: vk::CommandBuffer,
        layout: vk::PipelineLayout,
    ) -> Self {
        Self {
            device,
            transform_feedback: None,
            buffers,
            cmd,
            layout,
            feedback_bound: BoundOutputs::default(),
        }
    }

    /// Enable transform feedback recording.
    pub fn with_transform_feedback(
        mut self,
        transform_feedback: &'a ash::ext::transform_feedback::Device,
    ) -> Self {
        self.transform_feedback = Some(transform_feedback);
        self
    }

    fn raw(&self, handle: BufferHandle) -> Result<vk::Buffer> {
        self.buffers
            .raw_buffer(handle)
            .ok_or_else(|| GpuError::ResourceNotFound(format!("buffer {handle:?}")))
    }

    fn transform_feedback(&self) -> Result<&'a ash::ext::transform_feedback::Device> {
        self.transform_feedback.ok_or_else(|| {
            GpuError::InvalidState("transform feedback extension not enabled".to_string())
        })
    }
}

impl RenderBackend for VulkanRecorder<'_> {
    fn bind_attribute(&mut self, slot: AttributeSlot, binding: VertexBinding) -> Result<()> {
        let buffer = self.raw(binding.buffer)?;
        unsafe {
            self.device.cmd_bind_vertex_buffers2(
                self.cmd,
                slot.0,
                &[buffer],
                &[binding.offset],
                None,
                Some(&[binding.effective_stride()]),
            );
        }
        Ok(())
    }

    fn unbind_attribute(&mut self, _slot: AttributeSlot) {}

    fn bind_texture(&mut self, unit: u32, texture: TextureHandle) -> Result<()> {
        let set = vk::DescriptorSet::from_raw(texture.0);
        unsafe {
            self.device.cmd_bind_descriptor_sets(
                self.cmd,
                vk::PipelineBindPoint::GRAPHICS,
                self.layout,
                unit,
                &[set],
                &[],
            );
        }
        Ok(())
    }

    fn unbind_texture(&mut self, _unit: u32) {}

    fn bind_feedback_output(&mut self, binding: FeedbackBinding) -> Result<()> {
        let fp = self.transform_feedback()?.fp();
        let buffer = self.raw(binding.buffer)?;
        self.feedback_bound.bind(binding.index)?;
        unsafe {
            (fp.cmd_bind_transform_feedback_buffers_ext)(
                self.cmd,
                binding.index,
                1,
                &buffer,
                &binding.offset,
                &binding.size,
            );
        }
        Ok(())
    }

    fn unbind_feedback_output(&mut self, index: u32) {
        self.feedback_bound.unbind(index);
    }

    fn issue_feedback(&mut self, vertex_count: u32) -> Result<()> {
        let fp = self.transform_feedback()?.fp();
        let outputs = self.feedback_bound.span();
        if outputs == 0 {
            return Err(GpuError::InvalidState(
                "simulate pass issued without feedback outputs".to_string(),
            ));
        }
        tracing::trace!(vertex_count, outputs, "Recording transform feedback");
        unsafe {
            (fp.cmd_begin_transform_feedback_ext)(self.cmd, 0, 0, ptr::null(), ptr::null());
            self.device.cmd_draw(self.cmd, vertex_count, 1, 0, 0);
            (fp.cmd_end_transform_feedback_ext)(self.cmd, 0, 0, ptr::null(), ptr::null());
        }
        Ok(())
    }

    fn issue_draw(&mut self, call: DrawCall) -> Result<()> {
        let (vertices, instances) = match call {
            DrawCall::Points { vertex_count } => (vertex_count, 1),
            DrawCall::InstancedTriangles {
                vertex_count,
                instance_count,
            } => (vertex_count, instance_count),
        };
        unsafe {
            self.device.cmd_draw(self.cmd, vertices, instances, 0, 0);
        }
        Ok(())
    }
}
