//! Per-frame orchestration: expire, coalesce, simulate, draw.
//!
//! Every pass starts with the update gate. The first call for a new render
//! time expires aged batches and refreshes the chunk list. Later calls with
//! the same time reuse that list, so a frame's calculate and draw passes see
//! the same chunks and a repeated pass in one tick does no ring work.

use particulate_core::constants::{MAX_TEXTURES, TEMPLATE_VERTEX_COUNT};
use particulate_core::{AttributeFormat, FrameInfo, TextureId};
use particulate_gpu::{
    AttributeSlot, BufferHandle, DrawCall, FeedbackBinding, RenderBackend, ShaderProgram,
    TextureResolver, UniformValue, VertexBinding,
};

use crate::chunks::{BufferChunk, ChunkCoalescer};
use crate::config::ParticleSystemConfig;
use crate::error::{ParticleError, Result};
use crate::feedback::{FeedbackStore, SimulatePass};
use crate::ring::BatchRing;

const BASE_MAP_UNIFORMS: [&str; MAX_TEXTURES as usize] = [
    "s_baseMap0",
    "s_baseMap1",
    "s_baseMap2",
    "s_baseMap3",
    "s_baseMap4",
    "s_baseMap5",
    "s_baseMap6",
    "s_baseMap7",
];

const HAS_BASE_MAP_UNIFORMS: [&str; MAX_TEXTURES as usize] = [
    "u_has_baseMap0",
    "u_has_baseMap1",
    "u_has_baseMap2",
    "u_has_baseMap3",
    "u_has_baseMap4",
    "u_has_baseMap5",
    "u_has_baseMap6",
    "u_has_baseMap7",
];

/// Byte stride of the rectangle template: `a_offset` then `a_texCoord`.
pub const TEMPLATE_STRIDE: u32 = 16;

/// Why a pass did no device work.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkipReason {
    Disabled,
    NotSetUp,
    /// No active batches.
    NoChunks,
    /// The drawable has no computed attributes.
    NoVaryings,
    /// This tick was already simulated.
    AlreadySimulated,
    MissingProgram,
}

/// What a pass did.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FrameReport {
    pub time: f64,
    /// Batches expired by this call's update.
    pub expired: usize,
    pub chunks: usize,
    pub vertices: u32,
    pub simulated: bool,
    pub draw_calls: u32,
    pub skipped: Option<SkipReason>,
}

impl FrameReport {
    pub fn new(time: f64) -> Self {
        Self {
            time,
            expired: 0,
            chunks: 0,
            vertices: 0,
            simulated: false,
            draw_calls: 0,
            skipped: None,
        }
    }

    pub fn skipped(time: f64, reason: SkipReason) -> Self {
        Self {
            skipped: Some(reason),
            ..Self::new(time)
        }
    }

    /// Combine a calculate report with the draw report that followed it.
    pub fn then(self, draw: Self) -> Self {
        Self {
            time: draw.time,
            expired: self.expired + draw.expired,
            chunks: draw.chunks,
            vertices: draw.vertices,
            simulated: self.simulated || draw.simulated,
            draw_calls: self.draw_calls + draw.draw_calls,
            skipped: draw.skipped,
        }
    }
}

/// Device buffers a drawable owns between setup and teardown.
pub struct DeviceResources {
    pub point_buffer: BufferHandle,
    /// Rectangle template, present when drawing instanced rectangles.
    pub template_buffer: Option<BufferHandle>,
    pub feedback: FeedbackStore,
}

/// Values the passes need from the drawable configuration.
#[derive(Clone, Debug)]
struct PassSettings {
    name: String,
    base_time: f64,
    lifetime: f64,
    point_size: f32,
    instanced: bool,
    textures: Vec<TextureId>,
}

/// Logs a missing program once when it disappears and once when it returns.
#[derive(Debug, Default)]
struct ProgramWatch {
    missing: bool,
}

impl ProgramWatch {
    fn observe(&mut self, present: bool, drawable: &str, role: &'static str) {
        if !present && !self.missing {
            tracing::warn!(drawable, program = role, "Particle program missing, skipping pass");
            self.missing = true;
        } else if present && self.missing {
            tracing::info!(drawable, program = role, "Particle program available again");
            self.missing = false;
        }
    }
}

/// Per-drawable frame state machine.
pub struct SimulateAndRenderPipeline {
    coalescer: ChunkCoalescer,
    last_update_time: Option<f64>,
    last_simulate_time: Option<f64>,
    calculate_watch: ProgramWatch,
    render_watch: ProgramWatch,
    settings: PassSettings,
}

impl SimulateAndRenderPipeline {
    pub fn new(config: &ParticleSystemConfig) -> Self {
        Self {
            coalescer: ChunkCoalescer::new(),
            last_update_time: None,
            last_simulate_time: None,
            calculate_watch: ProgramWatch::default(),
            render_watch: ProgramWatch::default(),
            settings: PassSettings {
                name: config.name.clone(),
                base_time: config.base_time,
                lifetime: config.lifetime,
                point_size: config.point_size,
                instanced: config.instanced_rectangles(),
                textures: config.textures.clone(),
            },
        }
    }

    pub fn chunks(&self) -> &[BufferChunk] {
        self.coalescer.chunks()
    }

    pub fn coalescer(&self) -> &ChunkCoalescer {
        &self.coalescer
    }

    pub fn last_update_time(&self) -> Option<f64> {
        self.last_update_time
    }

    /// Forget cached chunks and tick times, as after a resource teardown.
    pub fn reset(&mut self) {
        self.coalescer = ChunkCoalescer::new();
        self.last_update_time = None;
        self.last_simulate_time = None;
    }

    /// Expire and coalesce if `now` is a new tick. Returns the number of
    /// expired batches, or `None` if this tick was already updated.
    pub fn update(&mut self, ring: &BatchRing, now: f64) -> Option<usize> {
        if self.last_update_time.is_some_and(|last| now <= last) {
            return None;
        }
        let expired = ring.expire(now);
        ring.update_chunks(&mut self.coalescer);
        self.last_update_time = Some(now);
        Some(expired)
    }

    fn report(&self, now: f64, expired: usize) -> FrameReport {
        FrameReport {
            expired,
            chunks: self.coalescer.chunks().len(),
            vertices: self.coalescer.vertex_count(),
            ..FrameReport::new(now)
        }
    }

    /// Run the simulate pass over every chunk, then flip feedback roles.
    ///
    /// Runs at most once per tick. An error mid-pass leaves the roles as
    /// they were.
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    pub fn calculate(
        &mut self,
        ring: &BatchRing,
        resources: &mut DeviceResources,
        program: Option<&mut dyn ShaderProgram>,
        backend: &mut dyn RenderBackend,
        frame: &FrameInfo,
    ) -> Result<FrameReport> {
        let now = frame.current_time;
        let expired = self.update(ring, now).unwrap_or(0);
        let mut report = self.report(now, expired);

        if self.coalescer.chunks().is_empty() {
            report.skipped = Some(SkipReason::NoChunks);
            return Ok(report);
        }
        if resources.feedback.is_empty() {
            report.skipped = Some(SkipReason::NoVaryings);
            return Ok(report);
        }
        if self.last_simulate_time.is_some_and(|last| now <= last) {
            report.skipped = Some(SkipReason::AlreadySimulated);
            return Ok(report);
        }

        self.calculate_watch
            .observe(program.is_some(), &self.settings.name, "calculate");
        let Some(program) = program else {
            report.skipped = Some(SkipReason::MissingProgram);
            return Ok(report);
        };

        set_uniforms(program, frame, &self.settings);

        let point_buffer = resources.point_buffer;
        let mut pass = resources.feedback.begin_pass();
        for chunk in self.coalescer.chunks() {
            simulate_chunk(ring, point_buffer, &pass, &*program, backend, chunk)?;
            pass.record_chunk();
        }
        let passes = pass.complete();

        self.last_simulate_time = Some(now);
        report.simulated = true;
        tracing::trace!(
            drawable = %self.settings.name,
            chunks = report.chunks,
            passes,
            "Simulated particles"
        );
        Ok(report)
    }

    /// Draw every chunk with the freshest feedback role.
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    pub fn draw(
        &mut self,
        ring: &BatchRing,
        resources: &DeviceResources,
        program: Option<&mut dyn ShaderProgram>,
        textures: &dyn TextureResolver,
        backend: &mut dyn RenderBackend,
        frame: &FrameInfo,
    ) -> Result<FrameReport> {
        let now = frame.current_time;
        let expired = self.update(ring, now).unwrap_or(0);
        let mut report = self.report(now, expired);

        if self.coalescer.chunks().is_empty() {
            report.skipped = Some(SkipReason::NoChunks);
            return Ok(report);
        }

        self.render_watch
            .observe(program.is_some(), &self.settings.name, "render");
        let Some(program) = program else {
            report.skipped = Some(SkipReason::MissingProgram);
            return Ok(report);
        };

        if self.settings.instanced && resources.template_buffer.is_none() {
            return Err(ParticleError::NotReady(
                "instanced rectangles without a template buffer".to_string(),
            ));
        }

        set_uniforms(program, frame, &self.settings);
        let units = bind_textures(program, textures, &self.settings.textures, backend)?;

        let mut result = Ok(());
        for chunk in self.coalescer.chunks() {
            result = draw_chunk(
                ring,
                resources,
                &*program,
                backend,
                chunk,
                self.settings.instanced,
            );
            if result.is_err() {
                break;
            }
            report.draw_calls += 1;
        }

        for unit in units {
            backend.unbind_texture(unit);
        }
        result?;

        Ok(report)
    }
}

fn set_uniforms(program: &mut dyn ShaderProgram, frame: &FrameInfo, settings: &PassSettings) {
    let uniforms = [
        ("u_mvpMatrix", UniformValue::Mat4(frame.mvp)),
        ("u_mvpInvMatrix", UniformValue::Mat4(frame.mvp_inverse)),
        ("u_mvMatrix", UniformValue::Mat4(frame.view_model)),
        ("u_mvNormalMatrix", UniformValue::Mat4(frame.view_model_normal)),
        ("u_mvpNormalMatrix", UniformValue::Mat4(frame.mvp_normal)),
        ("u_pMatrix", UniformValue::Mat4(frame.projection)),
        ("u_scale", UniformValue::Vec2(frame.pixel_scale())),
        ("u_eyeVec", UniformValue::Vec3(frame.eye_vec)),
        ("u_eyePos", UniformValue::Vec3(frame.eye_pos)),
        ("u_size", UniformValue::Float(settings.point_size)),
        (
            "u_time",
            UniformValue::Float((frame.current_time - settings.base_time) as f32),
        ),
        ("u_lifetime", UniformValue::Float(settings.lifetime as f32)),
        ("u_pixDispSize", UniformValue::Vec2(frame.pixel_display_size())),
        ("u_frameLen", UniformValue::Float(frame.frame_duration)),
    ];
    for (name, value) in uniforms {
        program.set_uniform_named(name, value);
    }
}

/// Bind program textures then drawable textures into the remaining units.
/// Returns every unit that needs unbinding.
fn bind_textures(
    program: &mut dyn ShaderProgram,
    resolver: &dyn TextureResolver,
    textures: &[TextureId],
    backend: &mut dyn RenderBackend,
) -> Result<Vec<u32>> {
    let own = program.bind_textures().min(MAX_TEXTURES);
    let mut units: Vec<u32> = (0..own).collect();

    for index in 0..(MAX_TEXTURES - own) {
        let i = index as usize;
        let texture = textures.get(i).and_then(|id| resolver.resolve(*id));
        let sampler = program.find_uniform(BASE_MAP_UNIFORMS[i]);

        match (texture, sampler) {
            (Some(texture), Some(sampler)) => {
                let unit = own + index;
                if let Err(e) = backend.bind_texture(unit, texture) {
                    for unit in units {
                        backend.unbind_texture(unit);
                    }
                    return Err(e.into());
                }
                units.push(unit);
                program.set_uniform(sampler, UniformValue::Int(unit as i32));
                program.set_uniform_named(HAS_BASE_MAP_UNIFORMS[i], UniformValue::Int(1));
            }
            _ => {
                program.set_uniform_named(HAS_BASE_MAP_UNIFORMS[i], UniformValue::Int(0));
            }
        }
    }
    Ok(units)
}

/// Bind static attributes of `chunk` from the point buffer.
fn bind_static(
    ring: &BatchRing,
    point_buffer: BufferHandle,
    program: &dyn ShaderProgram,
    backend: &mut dyn RenderBackend,
    chunk: &BufferChunk,
    divisor: u32,
    bound: &mut Vec<AttributeSlot>,
) -> Result<()> {
    let layout = ring.layout();
    for (spec, offset) in layout.attributes_with_offsets() {
        if let Some(slot) = program.find_attribute(&spec.name) {
            backend.bind_attribute(
                slot,
                VertexBinding {
                    buffer: point_buffer,
                    offset: chunk.buffer_start + u64::from(offset),
                    stride: layout.stride(),
                    format: spec.format,
                    divisor,
                },
            )?;
            bound.push(slot);
        }
    }
    Ok(())
}

/// Bind the read role of every varying the program consumes.
fn bind_varyings(
    store: &FeedbackStore,
    program: &dyn ShaderProgram,
    backend: &mut dyn RenderBackend,
    chunk: &BufferChunk,
    divisor: u32,
    bound: &mut Vec<AttributeSlot>,
) -> Result<()> {
    for (index, pair) in store.pairs().iter().enumerate() {
        let Some(slot) = program.find_attribute(&pair.spec().name) else {
            continue;
        };
        let Some(buffer) = store.current_read(index) else {
            continue;
        };
        let size = pair.spec().byte_size();
        backend.bind_attribute(
            slot,
            VertexBinding {
                buffer,
                offset: u64::from(chunk.vertex_start) * u64::from(size),
                stride: size,
                format: pair.spec().format,
                divisor,
            },
        )?;
        bound.push(slot);
    }
    Ok(())
}

fn simulate_chunk(
    ring: &BatchRing,
    point_buffer: BufferHandle,
    pass: &SimulatePass<'_>,
    program: &dyn ShaderProgram,
    backend: &mut dyn RenderBackend,
    chunk: &BufferChunk,
) -> Result<()> {
    let store = pass.store();
    let mut bound = Vec::new();
    let mut outputs = Vec::new();

    let result = (|| -> Result<()> {
        bind_static(ring, point_buffer, program, backend, chunk, 0, &mut bound)?;
        bind_varyings(store, program, backend, chunk, 0, &mut bound)?;

        for (index, pair) in store.pairs().iter().enumerate() {
            let Some(buffer) = store.current_write(index) else {
                continue;
            };
            let size = u64::from(pair.spec().byte_size());
            backend.bind_feedback_output(FeedbackBinding {
                index: index as u32,
                buffer,
                offset: u64::from(chunk.vertex_start) * size,
                size: u64::from(chunk.num_vertices) * size,
            })?;
            outputs.push(index as u32);
        }

        backend.issue_feedback(chunk.num_vertices)?;
        Ok(())
    })();

    for index in outputs {
        backend.unbind_feedback_output(index);
    }
    for slot in bound {
        backend.unbind_attribute(slot);
    }
    result
}

fn draw_chunk(
    ring: &BatchRing,
    resources: &DeviceResources,
    program: &dyn ShaderProgram,
    backend: &mut dyn RenderBackend,
    chunk: &BufferChunk,
    instanced: bool,
) -> Result<()> {
    let divisor = u32::from(instanced);
    let mut bound = Vec::new();

    let result = (|| -> Result<()> {
        bind_static(ring, resources.point_buffer, program, backend, chunk, divisor, &mut bound)?;
        bind_varyings(&resources.feedback, program, backend, chunk, divisor, &mut bound)?;

        let call = match resources.template_buffer {
            Some(template) if instanced => {
                for (name, offset) in [("a_offset", 0), ("a_texCoord", 8)] {
                    if let Some(slot) = program.find_attribute(name) {
                        backend.bind_attribute(
                            slot,
                            VertexBinding {
                                buffer: template,
                                offset,
                                stride: TEMPLATE_STRIDE,
                                format: AttributeFormat::Float2,
                                divisor: 0,
                            },
                        )?;
                        bound.push(slot);
                    }
                }
                DrawCall::InstancedTriangles {
                    vertex_count: TEMPLATE_VERTEX_COUNT,
                    instance_count: chunk.num_vertices,
                }
            }
            _ => DrawCall::Points {
                vertex_count: chunk.num_vertices,
            },
        };

        backend.issue_draw(call)?;
        Ok(())
    })();

    for slot in bound {
        backend.unbind_attribute(slot);
    }
    result
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use approx::assert_relative_eq;
    use particulate_core::{AttributeLayout, AttributeSpec};
    use particulate_gpu::{BufferAllocator, HostBackend, HostBufferAllocator, HostProgram};

    use super::*;

    struct Fixture {
        pipeline: SimulateAndRenderPipeline,
        ring: BatchRing,
        resources: DeviceResources,
        alloc: Arc<HostBufferAllocator>,
    }

    impl Fixture {
        fn new() -> Self {
            let config = ParticleSystemConfig::default().with_capacity(20, 10);
            let layout = AttributeLayout::new(
                vec![AttributeSpec::new("a_position", AttributeFormat::Float3)],
                vec![AttributeSpec::new("a_velocity", AttributeFormat::Float3)],
            )
            .unwrap();
            let ring = BatchRing::new(20, 10, layout, config.lifetime).unwrap();
            let alloc = Arc::new(HostBufferAllocator::new());
            let point_buffer = alloc.allocate(ring.buffer_size(), "points").unwrap();
            let feedback =
                FeedbackStore::create(&*alloc, ring.layout().varyings(), 20, "test").unwrap();
            Self {
                pipeline: SimulateAndRenderPipeline::new(&config),
                ring,
                resources: DeviceResources {
                    point_buffer,
                    template_buffer: None,
                    feedback,
                },
                alloc,
            }
        }

        fn commit(&self, start_time: f64) {
            let handle = self.ring.allocate().unwrap();
            let data = vec![0u8; 120];
            self.ring
                .commit(handle, &[&data], start_time, &*self.alloc, self.resources.point_buffer)
                .unwrap();
        }

        fn calculate(&mut self, backend: &mut HostBackend, time: f64) -> Result<FrameReport> {
            let mut program = HostProgram::new().with_attributes(["a_position", "a_velocity"]);
            self.pipeline.calculate(
                &self.ring,
                &mut self.resources,
                Some(&mut program),
                backend,
                &FrameInfo::at_time(time),
            )
        }
    }

    #[test]
    fn update_runs_once_per_tick() {
        let mut fixture = Fixture::new();
        fixture.commit(0.0);
        assert_eq!(fixture.pipeline.update(&fixture.ring, 1.0), Some(0));
        assert_eq!(fixture.pipeline.update(&fixture.ring, 1.0), None);
        assert_eq!(fixture.pipeline.update(&fixture.ring, 0.5), None);
        assert_eq!(fixture.pipeline.update(&fixture.ring, 6.0), Some(1));
        assert_relative_eq!(fixture.pipeline.last_update_time().unwrap(), 6.0);
        assert!(fixture.pipeline.chunks().is_empty());
    }

    #[test]
    fn calculate_simulates_once_per_tick() {
        let mut fixture = Fixture::new();
        fixture.commit(0.0);
        let mut backend = HostBackend::new(fixture.alloc.clone());

        let first = fixture.calculate(&mut backend, 1.0).unwrap();
        assert!(first.simulated);
        assert_eq!(first.vertices, 10);
        assert_eq!(fixture.resources.feedback.active_role(), 1);

        let again = fixture.calculate(&mut backend, 1.0).unwrap();
        assert_eq!(again.skipped, Some(SkipReason::AlreadySimulated));
        assert_eq!(fixture.resources.feedback.completed_passes(), 1);
        assert_eq!(backend.feedback_passes(), vec![10]);
    }

    #[test]
    fn calculate_without_chunks_is_skipped() {
        let mut fixture = Fixture::new();
        let mut backend = HostBackend::new(fixture.alloc.clone());
        let report = fixture.calculate(&mut backend, 1.0).unwrap();
        assert_eq!(report.skipped, Some(SkipReason::NoChunks));
        assert!(backend.commands().is_empty());
    }

    #[test]
    fn failed_simulate_keeps_roles_and_unbinds() {
        let mut fixture = Fixture::new();
        fixture.commit(0.0);
        let write = fixture.resources.feedback.current_write(0).unwrap();
        fixture.alloc.release(write).unwrap();

        let mut backend = HostBackend::new(fixture.alloc.clone());
        assert!(fixture.calculate(&mut backend, 1.0).is_err());
        assert_eq!(fixture.resources.feedback.active_role(), 0);
        assert_eq!(backend.bound_attributes().count(), 0);
        assert!(backend.feedback_passes().is_empty());
    }

    #[test]
    fn reset_forgets_chunks_and_ticks() {
        let mut fixture = Fixture::new();
        fixture.commit(0.0);
        let mut backend = HostBackend::new(fixture.alloc.clone());
        assert!(fixture.calculate(&mut backend, 1.0).unwrap().simulated);

        fixture.ring.reset();
        fixture.pipeline.reset();
        assert!(fixture.pipeline.chunks().is_empty());
        assert_eq!(fixture.pipeline.last_update_time(), None);

        let report = fixture.calculate(&mut backend, 1.0).unwrap();
        assert_eq!(report.skipped, Some(SkipReason::NoChunks));
        assert_eq!(backend.feedback_passes(), vec![10]);
    }

    #[test]
    fn reports_combine() {
        let calculate = FrameReport {
            expired: 2,
            simulated: true,
            ..FrameReport::new(1.0)
        };
        let draw = FrameReport {
            chunks: 1,
            vertices: 10,
            draw_calls: 1,
            ..FrameReport::new(1.0)
        };
        let frame = calculate.then(draw);
        assert_eq!(frame.expired, 2);
        assert!(frame.simulated);
        assert_eq!(frame.draw_calls, 1);
        assert_eq!(frame.skipped, None);
    }
}
