use std::collections::BTreeMap;
use std::sync::Arc;

use particulate_core::AttributeFormat;

use super::memory::HostBufferAllocator;
use crate::backend::{
    AttributeSlot, BufferAllocator, DrawCall, FeedbackBinding, RenderBackend, TextureHandle,
    VertexBinding,
};
use crate::error::{GpuError, Result};

/// One recorded backend call.
#[derive(Clone, Debug, PartialEq)]
pub enum RecordedCommand {
    BindAttribute {
        slot: AttributeSlot,
        binding: VertexBinding,
    },
    UnbindAttribute(AttributeSlot),
    BindTexture {
        unit: u32,
        texture: TextureHandle,
    },
    UnbindTexture(u32),
    BindFeedback(FeedbackBinding),
    UnbindFeedback(u32),
    Feedback {
        vertex_count: u32,
    },
    Draw(DrawCall),
}

/// Values of one bound attribute for the vertices of a feedback pass,
/// gathered tightly packed.
#[derive(Clone, Debug)]
pub struct FeedbackInput {
    pub slot: AttributeSlot,
    pub format: AttributeFormat,
    pub data: Vec<u8>,
}

/// Contents of one bound feedback range. Starts with the current buffer
/// bytes and is written back once the kernel returns.
#[derive(Clone, Debug)]
pub struct FeedbackOutput {
    pub index: u32,
    pub data: Vec<u8>,
}

/// Stand-in for a simulation program's vertex stage.
pub trait FeedbackKernel: Send {
    fn run(&mut self, vertex_count: u32, inputs: &[FeedbackInput], outputs: &mut [FeedbackOutput]);
}

impl<F> FeedbackKernel for F
where
    F: FnMut(u32, &[FeedbackInput], &mut [FeedbackOutput]) + Send,
{
    fn run(&mut self, vertex_count: u32, inputs: &[FeedbackInput], outputs: &mut [FeedbackOutput]) {
        self(vertex_count, inputs, outputs)
    }
}

/// Backend that validates and records calls against host buffers.
pub struct HostBackend {
    buffers: Arc<HostBufferAllocator>,
    attributes: BTreeMap<AttributeSlot, VertexBinding>,
    textures: BTreeMap<u32, TextureHandle>,
    feedback: BTreeMap<u32, FeedbackBinding>,
    commands: Vec<RecordedCommand>,
    kernel: Option<Box<dyn FeedbackKernel>>,
}

impl HostBackend {
    pub fn new(buffers: Arc<HostBufferAllocator>) -> Self {
        Self {
            buffers,
            attributes: BTreeMap::new(),
            textures: BTreeMap::new(),
            feedback: BTreeMap::new(),
            commands: Vec::new(),
            kernel: None,
        }
    }

    /// Run `kernel` on every feedback pass.
    pub fn with_kernel(mut self, kernel: impl FeedbackKernel + 'static) -> Self {
        self.kernel = Some(Box::new(kernel));
        self
    }

    pub fn buffers(&self) -> &Arc<HostBufferAllocator> {
        &self.buffers
    }

    pub fn commands(&self) -> &[RecordedCommand] {
        &self.commands
    }

    /// Drain the recorded commands.
    pub fn take_commands(&mut self) -> Vec<RecordedCommand> {
        std::mem::take(&mut self.commands)
    }

    pub fn draw_calls(&self) -> Vec<DrawCall> {
        self.commands
            .iter()
            .filter_map(|c| match c {
                RecordedCommand::Draw(call) => Some(*call),
                _ => None,
            })
            .collect()
    }

    /// Vertex counts of recorded feedback passes.
    pub fn feedback_passes(&self) -> Vec<u32> {
        self.commands
            .iter()
            .filter_map(|c| match c {
                RecordedCommand::Feedback { vertex_count } => Some(*vertex_count),
                _ => None,
            })
            .collect()
    }

    /// Attribute bindings currently in effect.
    pub fn bound_attributes(&self) -> impl Iterator<Item = (AttributeSlot, &VertexBinding)> {
        self.attributes.iter().map(|(slot, b)| (*slot, b))
    }

    pub fn bound_textures(&self) -> impl Iterator<Item = (u32, TextureHandle)> + '_ {
        self.textures.iter().map(|(unit, t)| (*unit, *t))
    }

    fn check_binding(&self, binding: &VertexBinding, count: u32) -> Result<()> {
        let size = self
            .buffers
            .size(binding.buffer)
            .ok_or_else(|| GpuError::ResourceNotFound(format!("buffer {:?}", binding.buffer)))?;
        let end = binding.offset + binding.extent(count);
        if end > size {
            return Err(GpuError::OutOfRange(format!(
                "attribute reads up to byte {end} of a {size} byte buffer"
            )));
        }
        Ok(())
    }

    fn gather(&self, slot: AttributeSlot, binding: &VertexBinding, count: u32) -> Result<FeedbackInput> {
        let value_size = u64::from(binding.format.byte_size());
        let stride = binding.effective_stride();
        let mut data = Vec::with_capacity((value_size * u64::from(count)) as usize);
        for v in 0..u64::from(count) {
            let bytes = self
                .buffers
                .read_range(binding.buffer, binding.offset + v * stride, value_size)?;
            data.extend_from_slice(&bytes);
        }
        Ok(FeedbackInput {
            slot,
            format: binding.format,
            data,
        })
    }
}

impl RenderBackend for HostBackend {
    fn bind_attribute(&mut self, slot: AttributeSlot, binding: VertexBinding) -> Result<()> {
        self.check_binding(&binding, 1)?;
        self.attributes.insert(slot, binding);
        self.commands
            .push(RecordedCommand::BindAttribute { slot, binding });
        Ok(())
    }

    fn unbind_attribute(&mut self, slot: AttributeSlot) {
        self.attributes.remove(&slot);
        self.commands.push(RecordedCommand::UnbindAttribute(slot));
    }

    fn bind_texture(&mut self, unit: u32, texture: TextureHandle) -> Result<()> {
        self.textures.insert(unit, texture);
        self.commands
            .push(RecordedCommand::BindTexture { unit, texture });
        Ok(())
    }

    fn unbind_texture(&mut self, unit: u32) {
        self.textures.remove(&unit);
        self.commands.push(RecordedCommand::UnbindTexture(unit));
    }

    fn bind_feedback_output(&mut self, binding: FeedbackBinding) -> Result<()> {
        let size = self
            .buffers
            .size(binding.buffer)
            .ok_or_else(|| GpuError::ResourceNotFound(format!("buffer {:?}", binding.buffer)))?;
        if binding.offset + binding.size > size {
            return Err(GpuError::OutOfRange(format!(
                "feedback range {}..{} exceeds a {size} byte buffer",
                binding.offset,
                binding.offset + binding.size
            )));
        }
        self.feedback.insert(binding.index, binding);
        self.commands.push(RecordedCommand::BindFeedback(binding));
        Ok(())
    }

    fn unbind_feedback_output(&mut self, index: u32) {
        self.feedback.remove(&index);
        self.commands.push(RecordedCommand::UnbindFeedback(index));
    }

    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    fn issue_feedback(&mut self, vertex_count: u32) -> Result<()> {
        for binding in self.attributes.values() {
            self.check_binding(binding, vertex_count)?;
        }
        self.commands
            .push(RecordedCommand::Feedback { vertex_count });

        let Some(mut kernel) = self.kernel.take() else {
            return Ok(());
        };

        let inputs = self
            .attributes
            .iter()
            .map(|(slot, binding)| self.gather(*slot, binding, vertex_count))
            .collect::<Result<Vec<_>>>();
        let result = inputs.and_then(|inputs| {
            let mut outputs = self
                .feedback
                .values()
                .map(|b| {
                    Ok(FeedbackOutput {
                        index: b.index,
                        data: self.buffers.read_range(b.buffer, b.offset, b.size)?,
                    })
                })
                .collect::<Result<Vec<_>>>()?;

            kernel.run(vertex_count, &inputs, &mut outputs);

            for output in &outputs {
                if let Some(binding) = self.feedback.get(&output.index) {
                    let len = output.data.len().min(binding.size as usize);
                    self.buffers
                        .write(binding.buffer, binding.offset, &output.data[..len])?;
                }
            }
            Ok(())
        });

        self.kernel = Some(kernel);
        result
    }

    fn issue_draw(&mut self, call: DrawCall) -> Result<()> {
        let (vertices, instances) = match call {
            DrawCall::Points { vertex_count } => (vertex_count, 1),
            DrawCall::InstancedTriangles {
                vertex_count,
                instance_count,
            } => (vertex_count, instance_count),
        };
        for binding in self.attributes.values() {
            let count = if binding.divisor == 0 { vertices } else { instances };
            self.check_binding(binding, count)?;
        }
        self.commands.push(RecordedCommand::Draw(call));
        Ok(())
    }
}
