use std::sync::Arc;

use ash::vk;
use hashbrown::HashMap;

use crate::backend::{AttributeSlot, ShaderProgram, UniformSlot, UniformValue};

/// A graphics pipeline whose uniforms live in push constants.
///
/// Attribute names map to vertex binding indices, uniform names to push
/// constant byte offsets. Uniforms set before [`VulkanProgram::bind`] are
/// queued and pushed on bind.
pub struct VulkanProgram {
    device: Arc<ash::Device>,
    pipeline: vk::Pipeline,
    layout: vk::PipelineLayout,
    stages: vk::ShaderStageFlags,
    attributes: HashMap<String, u32>,
    uniforms: Vec<(String, u32)>,
    pending: Vec<(u32, Vec<u8>)>,
    command_buffer: Option<vk::CommandBuffer>,
}

impl VulkanProgram {
    pub fn new(device: Arc<ash::Device>, pipeline: vk::Pipeline, layout: vk::PipelineLayout) -> Self {
        Self {
            device,
            pipeline,
            layout,
            stages: vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
            attributes: HashMap::new(),
            uniforms: Vec::new(),
            pending: Vec::new(),
            command_buffer: None,
        }
    }

    /// Map an attribute name to its vertex binding index.
    pub fn with_attribute(mut self, name: impl Into<String>, binding: u32) -> Self {
        self.attributes.insert(name.into(), binding);
        self
    }

    /// Map a uniform name to its push constant offset.
    pub fn with_uniform(mut self, name: impl Into<String>, offset: u32) -> Self {
        self.uniforms.push((name.into(), offset));
        self
    }

    pub fn with_stages(mut self, stages: vk::ShaderStageFlags) -> Self {
        self.stages = stages;
        self
    }

    pub fn layout(&self) -> vk::PipelineLayout {
        self.layout
    }

    /// Bind the pipeline on `cmd` and flush queued uniforms.
    pub fn bind(&mut self, cmd: vk::CommandBuffer) {
        unsafe {
            self.device
                .cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, self.pipeline);
        }
        self.command_buffer = Some(cmd);
        for (offset, bytes) in std::mem::take(&mut self.pending) {
            self.push(cmd, offset, &bytes);
        }
    }

    /// Stop recording into the bound command buffer.
    pub fn unbind(&mut self) {
        self.command_buffer = None;
    }

    fn push(&self, cmd: vk::CommandBuffer, offset: u32, bytes: &[u8]) {
        unsafe {
            self.device
                .cmd_push_constants(cmd, self.layout, self.stages, offset, bytes);
        }
    }
}

impl ShaderProgram for VulkanProgram {
    fn find_attribute(&self, name: &str) -> Option<AttributeSlot> {
        self.attributes.get(name).copied().map(AttributeSlot)
    }

    fn find_uniform(&self, name: &str) -> Option<UniformSlot> {
        self.uniforms
            .iter()
            .position(|(n, _)| n == name)
            .map(|i| UniformSlot(i as u32))
    }

    fn set_uniform(&mut self, slot: UniformSlot, value: UniformValue) {
        let Some(&(_, offset)) = self.uniforms.get(slot.0 as usize) else {
            return;
        };
        let bytes = value.to_bytes();
        match self.command_buffer {
            Some(cmd) => self.push(cmd, offset, &bytes),
            None => self.pending.push((offset, bytes)),
        }
    }

    fn bind_textures(&mut self) -> u32 {
        0
    }
}
