//! The particle system drawable and its producer handle.

use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use crossbeam::channel::Receiver;
use parking_lot::Mutex;
use particulate_core::{AttributeLayout, DrawableId, FrameInfo, ProgramId, RenderTargetId, TextureId};
use particulate_gpu::{BufferAllocator, BufferHandle, RenderBackend, ShaderProgram, TextureResolver};

use crate::config::ParticleSystemConfig;
use crate::error::{ParticleError, Result};
use crate::feedback::FeedbackStore;
use crate::pipeline::{DeviceResources, FrameReport, SimulateAndRenderPipeline, SkipReason};
use crate::ring::BatchRing;
use crate::schedule::{ActivityEvent, ActivityNotifier, FrameScheduler};

/// One vertex of the rectangle template.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct TemplateVertex {
    /// Corner offset in `[-1, 1]`.
    pub offset: [f32; 2],
    pub tex_coord: [f32; 2],
}

/// Two triangles covering a unit rectangle.
pub const RECT_TEMPLATE: [TemplateVertex; 6] = [
    TemplateVertex { offset: [-1.0, -1.0], tex_coord: [0.0, 0.0] },
    TemplateVertex { offset: [1.0, -1.0], tex_coord: [1.0, 0.0] },
    TemplateVertex { offset: [1.0, 1.0], tex_coord: [1.0, 1.0] },
    TemplateVertex { offset: [-1.0, -1.0], tex_coord: [0.0, 0.0] },
    TemplateVertex { offset: [1.0, 1.0], tex_coord: [1.0, 1.0] },
    TemplateVertex { offset: [-1.0, 1.0], tex_coord: [0.0, 1.0] },
];

/// Result of a producer commit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommitOutcome {
    /// Data landed in this ring slot.
    Committed(u32),
    /// The ring was full. The data was not stored.
    Dropped,
}

/// Cloneable handle for committing particle data from any thread.
#[derive(Clone)]
pub struct ParticleProducer {
    drawable: DrawableId,
    ring: Arc<BatchRing>,
    allocator: Arc<dyn BufferAllocator>,
    point_buffer: BufferHandle,
    /// Ring generation the point buffer belongs to.
    generation: u64,
    activity: Arc<Mutex<ActivityNotifier>>,
}

impl ParticleProducer {
    /// Commit one batch: one byte slice per static attribute, each holding
    /// `batch_size` values.
    ///
    /// Malformed data is rejected before a slot is reserved. A full ring is
    /// backpressure and reported as [`CommitOutcome::Dropped`]. A producer
    /// created before the drawable's last teardown fails with
    /// [`ParticleError::NotReady`].
    pub fn commit(&self, attribute_data: &[&[u8]], start_time: f64) -> Result<CommitOutcome> {
        self.ring.validate(attribute_data)?;
        if self.ring.generation() != self.generation {
            return Err(ParticleError::NotReady(format!(
                "producer of drawable {} outlived its device resources",
                self.drawable.0
            )));
        }

        let Some(handle) = self.ring.allocate() else {
            tracing::trace!(drawable = self.drawable.0, "Particle ring full, dropping batch");
            return Ok(CommitOutcome::Dropped);
        };

        self.ring.commit(
            handle,
            attribute_data,
            start_time,
            self.allocator.as_ref(),
            self.point_buffer,
        )?;
        self.activity.lock().update(self.drawable, true, start_time);
        Ok(CommitOutcome::Committed(handle.id()))
    }

    pub fn batch_size(&self) -> u32 {
        self.ring.snapshot().batch_size()
    }

    pub fn layout(&self) -> &AttributeLayout {
        self.ring.layout()
    }
}

/// A streaming particle system the scene renderer draws.
pub struct ParticleSystemDrawable {
    id: DrawableId,
    config: ParticleSystemConfig,
    enabled: bool,
    ring: Arc<BatchRing>,
    pipeline: SimulateAndRenderPipeline,
    resources: Option<DeviceResources>,
    allocator: Option<Arc<dyn BufferAllocator>>,
    activity: Arc<Mutex<ActivityNotifier>>,
}

impl ParticleSystemDrawable {
    pub fn new(id: DrawableId, config: ParticleSystemConfig, layout: AttributeLayout) -> Result<Self> {
        config.validate()?;
        let ring = BatchRing::new(
            config.total_point_capacity,
            config.batch_size,
            layout,
            config.lifetime,
        )?;
        let pipeline = SimulateAndRenderPipeline::new(&config);

        Ok(Self {
            id,
            config,
            enabled: true,
            ring: Arc::new(ring),
            pipeline,
            resources: None,
            allocator: None,
            activity: Arc::new(Mutex::new(ActivityNotifier::default())),
        })
    }

    pub fn id(&self) -> DrawableId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &ParticleSystemConfig {
        &self.config
    }

    pub fn layout(&self) -> &AttributeLayout {
        self.ring.layout()
    }

    pub fn ring(&self) -> &BatchRing {
        &self.ring
    }

    pub fn pipeline(&self) -> &SimulateAndRenderPipeline {
        &self.pipeline
    }

    pub fn resources(&self) -> Option<&DeviceResources> {
        self.resources.as_ref()
    }

    /// Whether the scene renderer should schedule this drawable.
    pub fn is_on(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn draw_priority(&self) -> i32 {
        self.config.draw_priority
    }

    pub fn visible_range(&self) -> (f64, f64) {
        (self.config.min_visible, self.config.max_visible)
    }

    pub fn request_z_buffer(&self) -> bool {
        self.config.request_z_buffer
    }

    pub fn write_z_buffer(&self) -> bool {
        self.config.write_z_buffer
    }

    pub fn render_target(&self) -> Option<RenderTargetId> {
        self.config.render_target
    }

    pub fn point_size(&self) -> f32 {
        self.config.point_size
    }

    pub fn base_time(&self) -> f64 {
        self.config.base_time
    }

    pub fn textures(&self) -> &[TextureId] {
        &self.config.textures
    }

    pub fn calculate_program(&self) -> Option<ProgramId> {
        self.config.calculate_program
    }

    pub fn render_program(&self) -> Option<ProgramId> {
        self.config.render_program
    }

    /// Create the point buffer, the rectangle template and feedback buffers.
    ///
    /// Failure leaves the drawable without resources and releases whatever
    /// was created. Calling again once set up does nothing.
    pub fn setup_resources(&mut self, allocator: Arc<dyn BufferAllocator>) -> Result<()> {
        if self.resources.is_some() {
            tracing::debug!(drawable = %self.config.name, "Particle resources already set up");
            return Ok(());
        }
        if self.config.use_rectangles && !self.config.use_instancing {
            tracing::error!(
                drawable = %self.config.name,
                "Rectangles are only supported with instancing, drawing points"
            );
        }

        let resources = self.create_resources(allocator.as_ref()).map_err(|source| {
            tracing::error!(drawable = %self.config.name, "Particle setup failed: {source}");
            ParticleError::Setup {
                drawable: self.config.name.clone(),
                source,
            }
        })?;

        tracing::debug!(
            drawable = %self.config.name,
            size_bytes = self.ring.buffer_size(),
            points = self.ring.point_capacity(),
            varyings = resources.feedback.len(),
            "Set up particle resources"
        );
        self.resources = Some(resources);
        self.allocator = Some(allocator);
        Ok(())
    }

    fn create_resources(
        &self,
        allocator: &dyn BufferAllocator,
    ) -> particulate_gpu::Result<DeviceResources> {
        let name = &self.config.name;
        let point_buffer = allocator.allocate(self.ring.buffer_size(), &format!("{name}/points"))?;

        let template_buffer = if self.config.instanced_rectangles() {
            let bytes: &[u8] = bytemuck::cast_slice(&RECT_TEMPLATE);
            let created = allocator
                .allocate(bytes.len() as u64, &format!("{name}/template"))
                .and_then(|handle| match allocator.write(handle, 0, bytes) {
                    Ok(()) => Ok(handle),
                    Err(e) => {
                        let _ = allocator.release(handle);
                        Err(e)
                    }
                });
            match created {
                Ok(handle) => Some(handle),
                Err(e) => {
                    let _ = allocator.release(point_buffer);
                    return Err(e);
                }
            }
        } else {
            None
        };

        let feedback = match FeedbackStore::create(
            allocator,
            self.ring.layout().varyings(),
            self.ring.point_capacity(),
            name,
        ) {
            Ok(store) => store,
            Err(e) => {
                let _ = allocator.release(point_buffer);
                if let Some(template) = template_buffer {
                    let _ = allocator.release(template);
                }
                return Err(e);
            }
        };

        Ok(DeviceResources {
            point_buffer,
            template_buffer,
            feedback,
        })
    }

    /// Release every device buffer and drop all batches. Producers created
    /// earlier stop committing.
    pub fn teardown_resources(&mut self) -> Result<()> {
        let (Some(mut resources), Some(allocator)) = (self.resources.take(), self.allocator.take())
        else {
            return Ok(());
        };
        self.ring.reset();
        self.pipeline.reset();

        resources.feedback.release(allocator.as_ref());
        let mut first_error = None;
        for handle in std::iter::once(resources.point_buffer).chain(resources.template_buffer) {
            if let Err(e) = allocator.release(handle) {
                tracing::warn!(drawable = %self.config.name, "Failed to release particle buffer: {e}");
                first_error.get_or_insert(e);
            }
        }
        tracing::debug!(drawable = %self.config.name, "Tore down particle resources");

        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    /// Producer handle for committing from other threads.
    pub fn producer(&self) -> Result<ParticleProducer> {
        let (Some(resources), Some(allocator)) = (&self.resources, &self.allocator) else {
            return Err(ParticleError::NotReady(format!(
                "`{}` has no device resources",
                self.config.name
            )));
        };
        Ok(ParticleProducer {
            drawable: self.id,
            ring: Arc::clone(&self.ring),
            allocator: Arc::clone(allocator),
            point_buffer: resources.point_buffer,
            generation: self.ring.generation(),
            activity: Arc::clone(&self.activity),
        })
    }

    /// Commit one batch of particle data.
    pub fn commit(&self, attribute_data: &[&[u8]], start_time: f64) -> Result<CommitOutcome> {
        self.producer()?.commit(attribute_data, start_time)
    }

    /// Whether any batch is still alive, so the frame driver should keep
    /// scheduling frames.
    pub fn has_pending_work(&self) -> bool {
        self.ring.active_count() > 0
    }

    /// Register with the frame scheduler.
    pub fn update_renderer(&self, scheduler: &mut dyn FrameScheduler) {
        if self.config.continuous_render {
            scheduler.add_continuous_render_request(self.id);
        }
    }

    /// Receive activity transitions.
    pub fn subscribe(&mut self) -> Receiver<ActivityEvent> {
        self.activity.lock().subscribe()
    }

    fn gate(&self, now: f64) -> Option<FrameReport> {
        if !self.enabled {
            return Some(FrameReport::skipped(now, SkipReason::Disabled));
        }
        if self.resources.is_none() {
            return Some(FrameReport::skipped(now, SkipReason::NotSetUp));
        }
        None
    }

    fn publish_activity(&self, now: f64) {
        self.activity
            .lock()
            .update(self.id, self.has_pending_work(), now);
    }

    /// Run the calculate pass for this frame.
    pub fn calculate(
        &mut self,
        program: Option<&mut dyn ShaderProgram>,
        backend: &mut dyn RenderBackend,
        frame: &FrameInfo,
    ) -> Result<FrameReport> {
        if let Some(report) = self.gate(frame.current_time) {
            return Ok(report);
        }
        let Some(resources) = self.resources.as_mut() else {
            return Ok(FrameReport::skipped(frame.current_time, SkipReason::NotSetUp));
        };
        let report = self
            .pipeline
            .calculate(&self.ring, resources, program, backend, frame)?;
        self.publish_activity(frame.current_time);
        Ok(report)
    }

    /// Run the draw pass for this frame.
    pub fn draw(
        &mut self,
        program: Option<&mut dyn ShaderProgram>,
        textures: &dyn TextureResolver,
        backend: &mut dyn RenderBackend,
        frame: &FrameInfo,
    ) -> Result<FrameReport> {
        if let Some(report) = self.gate(frame.current_time) {
            return Ok(report);
        }
        let Some(resources) = self.resources.as_ref() else {
            return Ok(FrameReport::skipped(frame.current_time, SkipReason::NotSetUp));
        };
        let report = self
            .pipeline
            .draw(&self.ring, resources, program, textures, backend, frame)?;
        self.publish_activity(frame.current_time);
        Ok(report)
    }

    /// Calculate then draw.
    pub fn render_frame(
        &mut self,
        calculate_program: Option<&mut dyn ShaderProgram>,
        render_program: Option<&mut dyn ShaderProgram>,
        textures: &dyn TextureResolver,
        backend: &mut dyn RenderBackend,
        frame: &FrameInfo,
    ) -> Result<FrameReport> {
        let calculated = self.calculate(calculate_program, backend, frame)?;
        let drawn = self.draw(render_program, textures, backend, frame)?;
        Ok(calculated.then(drawn))
    }
}

impl Drop for ParticleSystemDrawable {
    fn drop(&mut self) {
        if self.resources.is_some() {
            if let Err(e) = self.teardown_resources() {
                tracing::warn!(drawable = %self.config.name, "Teardown on drop failed: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hashbrown::HashMap;
    use particulate_core::{AttributeFormat, AttributeSpec};
    use particulate_gpu::{DrawCall, HostBackend, HostBufferAllocator, HostProgram, TextureHandle};

    fn layout() -> AttributeLayout {
        AttributeLayout::with_attributes(vec![
            AttributeSpec::new("a_position", AttributeFormat::Float3),
            AttributeSpec::new("a_color", AttributeFormat::UNorm8x4),
        ])
        .unwrap()
    }

    fn batch(points: usize) -> (Vec<u8>, Vec<u8>) {
        (vec![0u8; points * 12], vec![255u8; points * 4])
    }

    fn drawable(config: ParticleSystemConfig) -> (ParticleSystemDrawable, Arc<HostBufferAllocator>) {
        let alloc = Arc::new(HostBufferAllocator::new());
        let mut drawable = ParticleSystemDrawable::new(DrawableId(1), config, layout()).unwrap();
        drawable.setup_resources(alloc.clone()).unwrap();
        (drawable, alloc)
    }

    fn render_program() -> HostProgram {
        HostProgram::new()
            .with_attributes(["a_position", "a_color", "a_offset", "a_texCoord"])
            .with_uniforms(["u_time", "u_lifetime", "u_scale", "s_baseMap0", "u_has_baseMap0", "u_has_baseMap1"])
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = ParticleSystemConfig::default().with_capacity(15, 10);
        assert!(ParticleSystemDrawable::new(DrawableId(1), config, layout()).is_err());
    }

    #[test]
    fn commit_before_setup_is_not_ready() {
        let drawable =
            ParticleSystemDrawable::new(DrawableId(1), ParticleSystemConfig::default(), layout())
                .unwrap();
        let (pos, col) = batch(100);
        assert!(matches!(
            drawable.commit(&[&pos, &col], 0.0),
            Err(ParticleError::NotReady(_))
        ));
    }

    #[test]
    fn setup_failure_is_reported_and_clean() {
        let alloc = Arc::new(HostBufferAllocator::new().with_budget(16));
        let mut drawable =
            ParticleSystemDrawable::new(DrawableId(1), ParticleSystemConfig::default(), layout())
                .unwrap();
        let err = drawable.setup_resources(alloc.clone()).unwrap_err();
        assert!(matches!(err, ParticleError::Setup { .. }));
        assert!(drawable.resources().is_none());
        assert_eq!(alloc.live_buffers(), 0);
    }

    #[test]
    fn teardown_releases_everything() {
        let config = ParticleSystemConfig::default().with_instanced_rectangles(true);
        let (mut drawable, alloc) = drawable(config);
        assert_eq!(alloc.live_buffers(), 2);
        drawable.teardown_resources().unwrap();
        assert_eq!(alloc.live_buffers(), 0);
        assert!(drawable.producer().is_err());
    }

    #[test]
    fn setup_after_teardown_starts_empty() {
        let (mut drawable, alloc) = drawable(ParticleSystemConfig::default());
        let (pos, col) = batch(100);
        drawable.commit(&[&pos, &col], 0.0).unwrap();

        let mut backend = HostBackend::new(alloc.clone());
        let mut program = render_program();
        let textures: HashMap<TextureId, TextureHandle> = HashMap::new();
        drawable
            .draw(Some(&mut program), &textures, &mut backend, &FrameInfo::at_time(1.0))
            .unwrap();

        drawable.teardown_resources().unwrap();
        drawable.setup_resources(alloc.clone()).unwrap();
        assert!(!drawable.has_pending_work());
        assert_eq!(drawable.pipeline().last_update_time(), None);

        let mut backend = HostBackend::new(alloc);
        let report = drawable
            .draw(Some(&mut program), &textures, &mut backend, &FrameInfo::at_time(1.0))
            .unwrap();
        assert_eq!(report.draw_calls, 0);
        assert_eq!(report.skipped, Some(SkipReason::NoChunks));
        assert!(backend.draw_calls().is_empty());
    }

    #[test]
    fn stale_producer_cannot_wedge_the_ring() {
        let config = ParticleSystemConfig::default().with_capacity(20, 10).with_lifetime(5.0);
        let (mut drawable, alloc) = drawable(config);
        let stale = drawable.producer().unwrap();
        drawable.teardown_resources().unwrap();
        drawable.setup_resources(alloc).unwrap();

        let (pos, col) = batch(10);
        assert!(matches!(
            stale.commit(&[&pos, &col], 0.0),
            Err(ParticleError::NotReady(_))
        ));
        assert!(drawable.ring().snapshot().is_empty());

        assert!(matches!(
            drawable.commit(&[&pos, &col], 0.0).unwrap(),
            CommitOutcome::Committed(_)
        ));
        assert_eq!(drawable.ring().expire(100.0), 1);
        for t in [101.0, 102.0] {
            assert!(matches!(
                drawable.commit(&[&pos, &col], t).unwrap(),
                CommitOutcome::Committed(_)
            ));
        }
    }

    #[test]
    fn template_buffer_holds_rectangle() {
        let config = ParticleSystemConfig::default().with_instanced_rectangles(true);
        let (drawable, alloc) = drawable(config);
        let template = drawable.resources().unwrap().template_buffer.unwrap();
        let bytes = alloc.read_back(template).unwrap();
        assert_eq!(bytes.len(), 96);
        assert_eq!(bytes.as_slice(), bytemuck::cast_slice::<_, u8>(&RECT_TEMPLATE));
    }

    #[test]
    fn full_ring_drops() {
        let config = ParticleSystemConfig::default().with_capacity(20, 10);
        let (drawable, _alloc) = drawable(config);
        let (pos, col) = batch(10);
        assert_eq!(
            drawable.commit(&[&pos, &col], 0.0).unwrap(),
            CommitOutcome::Committed(0)
        );
        assert_eq!(
            drawable.commit(&[&pos, &col], 0.0).unwrap(),
            CommitOutcome::Committed(1)
        );
        assert_eq!(
            drawable.commit(&[&pos, &col], 0.0).unwrap(),
            CommitOutcome::Dropped
        );
    }

    #[test]
    fn mismatch_does_not_reserve() {
        let (drawable, _alloc) = drawable(ParticleSystemConfig::default());
        let (pos, _) = batch(100);
        assert!(drawable.commit(&[&pos], 0.0).is_err());
        assert!(drawable.ring().snapshot().is_empty());
    }

    #[test]
    fn disabled_drawable_skips_everything() {
        let (mut drawable, alloc) = drawable(ParticleSystemConfig::default());
        let (pos, col) = batch(100);
        drawable.commit(&[&pos, &col], 0.0).unwrap();
        drawable.set_enabled(false);
        assert!(!drawable.is_on());

        let mut backend = HostBackend::new(alloc);
        let mut program = render_program();
        let textures: HashMap<TextureId, TextureHandle> = HashMap::new();
        let report = drawable
            .draw(Some(&mut program), &textures, &mut backend, &FrameInfo::at_time(1.0))
            .unwrap();
        assert_eq!(report.skipped, Some(SkipReason::Disabled));
        assert!(backend.commands().is_empty());
        assert_eq!(drawable.pipeline().last_update_time(), None);
    }

    #[test]
    fn instanced_draw_uses_template_and_divisors() {
        let config = ParticleSystemConfig::default().with_instanced_rectangles(true);
        let (mut drawable, alloc) = drawable(config);
        let (pos, col) = batch(100);
        drawable.commit(&[&pos, &col], 0.0).unwrap();

        let mut backend = HostBackend::new(alloc);
        let mut program = render_program();
        let textures: HashMap<TextureId, TextureHandle> = HashMap::new();
        let report = drawable
            .draw(Some(&mut program), &textures, &mut backend, &FrameInfo::at_time(1.0))
            .unwrap();
        assert_eq!(report.draw_calls, 1);
        assert_eq!(
            backend.draw_calls(),
            vec![DrawCall::InstancedTriangles {
                vertex_count: 6,
                instance_count: 100
            }]
        );

        let binds: Vec<_> = backend
            .commands()
            .iter()
            .filter_map(|c| match c {
                particulate_gpu::host::RecordedCommand::BindAttribute { binding, .. } => {
                    Some(*binding)
                }
                _ => None,
            })
            .collect();
        assert_eq!(binds.len(), 4);
        assert_eq!(binds[0].divisor, 1);
        assert_eq!(binds[1].offset, 12);
        assert_eq!(binds[2].divisor, 0);
        assert_eq!(binds[2].stride, 16);
        assert_eq!(binds[3].offset, 8);
    }

    #[test]
    fn uniforms_and_textures_are_set() {
        let config = ParticleSystemConfig::default()
            .with_base_time(1.0)
            .with_textures(vec![TextureId(5)]);
        let (mut drawable, alloc) = drawable(config);
        let (pos, col) = batch(100);
        drawable.commit(&[&pos, &col], 0.0).unwrap();

        let mut backend = HostBackend::new(alloc);
        let mut program = render_program();
        let mut textures = HashMap::new();
        textures.insert(TextureId(5), TextureHandle(50));
        let frame = FrameInfo::at_time(3.5)
            .with_screen(glam::UVec2::new(400, 200), glam::Vec2::ONE);
        drawable
            .draw(Some(&mut program), &textures, &mut backend, &frame)
            .unwrap();

        use particulate_gpu::UniformValue;
        assert_eq!(program.uniform("u_time"), Some(UniformValue::Float(2.5)));
        assert_eq!(program.uniform("u_lifetime"), Some(UniformValue::Float(5.0)));
        assert_eq!(
            program.uniform("u_scale"),
            Some(UniformValue::Vec2(glam::Vec2::new(2.0 / 400.0, 2.0 / 200.0)))
        );
        assert_eq!(program.uniform("s_baseMap0"), Some(UniformValue::Int(0)));
        assert_eq!(program.uniform("u_has_baseMap0"), Some(UniformValue::Int(1)));
        assert_eq!(program.uniform("u_has_baseMap1"), Some(UniformValue::Int(0)));
        // Units are unbound after the pass.
        assert_eq!(backend.bound_textures().count(), 0);
        assert!(backend
            .commands()
            .contains(&particulate_gpu::host::RecordedCommand::BindTexture {
                unit: 0,
                texture: TextureHandle(50)
            }));
    }

    #[test]
    fn missing_program_skips_then_recovers() {
        let (mut drawable, alloc) = drawable(ParticleSystemConfig::default());
        let (pos, col) = batch(100);
        drawable.commit(&[&pos, &col], 0.0).unwrap();

        let mut backend = HostBackend::new(alloc);
        let textures: HashMap<TextureId, TextureHandle> = HashMap::new();
        let report = drawable
            .draw(None, &textures, &mut backend, &FrameInfo::at_time(1.0))
            .unwrap();
        assert_eq!(report.skipped, Some(SkipReason::MissingProgram));
        assert!(backend.draw_calls().is_empty());

        let mut program = render_program();
        let report = drawable
            .draw(Some(&mut program), &textures, &mut backend, &FrameInfo::at_time(2.0))
            .unwrap();
        assert_eq!(report.draw_calls, 1);
    }

    #[test]
    fn continuous_render_registration_and_activity() {
        use crate::schedule::ContinuousRenderRequests;

        let (mut drawable, alloc) = drawable(ParticleSystemConfig::default().with_lifetime(1.0));
        let events = drawable.subscribe();
        let mut requests = ContinuousRenderRequests::new();
        drawable.update_renderer(&mut requests);
        assert!(requests.contains(DrawableId(1)));

        let (pos, col) = batch(100);
        drawable.commit(&[&pos, &col], 0.0).unwrap();
        assert!(drawable.has_pending_work());

        let mut backend = HostBackend::new(alloc);
        let mut program = render_program();
        let textures: HashMap<TextureId, TextureHandle> = HashMap::new();
        drawable
            .draw(Some(&mut program), &textures, &mut backend, &FrameInfo::at_time(5.0))
            .unwrap();
        assert!(!drawable.has_pending_work());

        let received: Vec<_> = events.try_iter().collect();
        assert!(matches!(received[0], ActivityEvent::Active { .. }));
        assert!(matches!(received[1], ActivityEvent::Idle { time, .. } if time == 5.0));
    }

    #[test]
    fn continuous_render_can_be_disabled() {
        use crate::schedule::ContinuousRenderRequests;

        let (drawable, _alloc) = drawable(ParticleSystemConfig::default().with_continuous_render(false));
        let mut requests = ContinuousRenderRequests::new();
        drawable.update_renderer(&mut requests);
        assert!(!requests.wants_frames());
    }

    #[test]
    fn producer_commits_from_another_thread() {
        let (drawable, _alloc) = drawable(ParticleSystemConfig::default());
        let producer = drawable.producer().unwrap();
        let worker = std::thread::spawn(move || {
            let (pos, col) = batch(100);
            (0..3)
                .map(|i| producer.commit(&[&pos, &col], f64::from(i)).unwrap())
                .collect::<Vec<_>>()
        });
        let outcomes = worker.join().unwrap();
        assert!(outcomes.iter().all(|o| matches!(o, CommitOutcome::Committed(_))));
        assert_eq!(drawable.ring().active_count(), 3);
    }
}
