//! Headless particle harness.
//!
//! Owns a drawable set up against a [`HostBufferAllocator`], a recording
//! [`HostBackend`] and scripted [`HostProgram`]s that declare every attribute
//! of the drawable's layout.

use std::sync::Arc;

use glam::UVec2;
use hashbrown::HashMap;
use particulate_core::{AttributeLayout, DrawableId, FrameInfo, TextureId};
use particulate_gpu::host::FeedbackKernel;
use particulate_gpu::{
    BufferAllocator, BufferHandle, HostBackend, HostBufferAllocator, HostProgram, ShaderProgram,
    TextureHandle,
};
use particulate_particles::{
    BatchHandle, CommitOutcome, FrameReport, ParticleSystemConfig, ParticleSystemDrawable,
};

use crate::{Result, TestError, FRAME_UNIFORMS};

/// Framebuffer size of harness frames.
const FRAMEBUFFER: UVec2 = UVec2::new(640, 480);

/// Decode native-endian `f32` values.
pub fn floats(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// A particle drawable running on the host backend.
pub struct HeadlessParticles {
    drawable: ParticleSystemDrawable,
    allocator: Arc<HostBufferAllocator>,
    backend: HostBackend,
    calculate_program: Option<HostProgram>,
    render_program: Option<HostProgram>,
    textures: HashMap<TextureId, TextureHandle>,
    frame_duration: f32,
}

impl HeadlessParticles {
    /// Create the drawable and set up its resources.
    ///
    /// A calculate program is only created when the layout has varyings.
    pub fn new(config: ParticleSystemConfig, layout: AttributeLayout) -> Result<Self> {
        let allocator = Arc::new(HostBufferAllocator::new());
        Self::with_allocator(config, layout, allocator)
    }

    pub fn with_allocator(
        config: ParticleSystemConfig,
        layout: AttributeLayout,
        allocator: Arc<HostBufferAllocator>,
    ) -> Result<Self> {
        let inputs: Vec<String> = layout
            .attributes()
            .iter()
            .chain(layout.varyings())
            .map(|spec| spec.name.clone())
            .collect();

        let calculate_program = layout.has_varyings().then(|| {
            HostProgram::new()
                .with_attributes(inputs.iter().cloned())
                .with_uniforms(FRAME_UNIFORMS)
        });
        let render_program = HostProgram::new()
            .with_attributes(inputs.iter().cloned().chain(["a_offset", "a_texCoord"].map(String::from)))
            .with_uniforms(FRAME_UNIFORMS)
            .with_uniforms((0..8).flat_map(|i| [format!("s_baseMap{i}"), format!("u_has_baseMap{i}")]));

        let mut drawable = ParticleSystemDrawable::new(DrawableId(1), config, layout)?;
        let shared: Arc<dyn BufferAllocator> = allocator.clone();
        drawable.setup_resources(shared)?;

        tracing::debug!(drawable = %drawable.name(), "Headless particle harness ready");
        Ok(Self {
            drawable,
            backend: HostBackend::new(Arc::clone(&allocator)),
            allocator,
            calculate_program,
            render_program: Some(render_program),
            textures: HashMap::new(),
            frame_duration: 1.0 / 60.0,
        })
    }

    /// Run `kernel` for every simulate pass. Clears recorded commands.
    pub fn with_kernel(mut self, kernel: impl FeedbackKernel + 'static) -> Self {
        self.backend = HostBackend::new(Arc::clone(&self.allocator)).with_kernel(kernel);
        self
    }

    pub fn with_texture(mut self, id: TextureId, handle: TextureHandle) -> Self {
        self.textures.insert(id, handle);
        self
    }

    /// Let the render program bind `count` textures of its own first.
    pub fn with_program_textures(mut self, count: u32) -> Self {
        self.render_program = self.render_program.map(|p| p.with_own_textures(count));
        self
    }

    pub fn set_calculate_program(&mut self, program: Option<HostProgram>) {
        self.calculate_program = program;
    }

    pub fn set_render_program(&mut self, program: Option<HostProgram>) {
        self.render_program = program;
    }

    pub fn drawable(&self) -> &ParticleSystemDrawable {
        &self.drawable
    }

    pub fn drawable_mut(&mut self) -> &mut ParticleSystemDrawable {
        &mut self.drawable
    }

    pub fn allocator(&self) -> &HostBufferAllocator {
        &self.allocator
    }

    pub fn backend(&self) -> &HostBackend {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut HostBackend {
        &mut self.backend
    }

    pub fn render_program(&self) -> Option<&HostProgram> {
        self.render_program.as_ref()
    }

    pub fn commit(&self, attribute_data: &[&[u8]], start_time: f64) -> Result<CommitOutcome> {
        Ok(self.drawable.commit(attribute_data, start_time)?)
    }

    /// Reserve a slot without committing it.
    pub fn reserve(&self) -> Option<BatchHandle> {
        self.drawable.ring().allocate()
    }

    /// Commit a slot obtained from [`HeadlessParticles::reserve`].
    pub fn commit_reserved(
        &self,
        handle: BatchHandle,
        attribute_data: &[&[u8]],
        start_time: f64,
    ) -> Result<()> {
        let point_buffer = self.point_buffer()?;
        self.drawable.ring().commit(
            handle,
            attribute_data,
            start_time,
            self.allocator.as_ref(),
            point_buffer,
        )?;
        Ok(())
    }

    pub fn point_buffer(&self) -> Result<BufferHandle> {
        self.drawable
            .resources()
            .map(|r| r.point_buffer)
            .ok_or_else(|| TestError::Harness("drawable has no resources".to_string()))
    }

    pub fn frame_info(&self, now: f64) -> FrameInfo {
        FrameInfo::at_time(now)
            .with_screen(FRAMEBUFFER, FRAMEBUFFER.as_vec2())
            .with_frame_duration(self.frame_duration)
    }

    /// Calculate and draw one frame.
    pub fn frame(&mut self, now: f64) -> Result<FrameReport> {
        let frame = self.frame_info(now);
        let report = self.drawable.render_frame(
            self.calculate_program.as_mut().map(|p| p as &mut dyn ShaderProgram),
            self.render_program.as_mut().map(|p| p as &mut dyn ShaderProgram),
            &self.textures,
            &mut self.backend,
            &frame,
        )?;
        tracing::trace!(time = now, vertices = report.vertices, draws = report.draw_calls, "Harness frame");
        Ok(report)
    }

    pub fn calculate(&mut self, now: f64) -> Result<FrameReport> {
        let frame = self.frame_info(now);
        Ok(self.drawable.calculate(
            self.calculate_program.as_mut().map(|p| p as &mut dyn ShaderProgram),
            &mut self.backend,
            &frame,
        )?)
    }

    pub fn draw(&mut self, now: f64) -> Result<FrameReport> {
        let frame = self.frame_info(now);
        Ok(self.drawable.draw(
            self.render_program.as_mut().map(|p| p as &mut dyn ShaderProgram),
            &self.textures,
            &mut self.backend,
            &frame,
        )?)
    }

    /// Both buffers of varying `index`, as `[read, write]` for the next pass.
    pub fn varying_buffers(&self, index: usize) -> Result<[BufferHandle; 2]> {
        let store = &self
            .drawable
            .resources()
            .ok_or_else(|| TestError::Harness("drawable has no resources".to_string()))?
            .feedback;
        match (store.current_read(index), store.current_write(index)) {
            (Some(read), Some(write)) => Ok([read, write]),
            _ => Err(TestError::Harness(format!("no varying at index {index}"))),
        }
    }

    /// Float contents of a buffer.
    pub fn read_floats(&self, buffer: BufferHandle) -> Result<Vec<f32>> {
        self.allocator
            .read_back(buffer)
            .map(|bytes| floats(&bytes))
            .ok_or_else(|| TestError::Harness(format!("unknown buffer {buffer:?}")))
    }
}
