//! Particulate streaming particle demo.
//!
//! Runs a particle fountain headless on the host backend. A producer thread
//! emits one batch per frame while the render loop expires, simulates and
//! draws, logging what each frame did.
//!
//! ## Usage
//!
//! ```bash
//! cargo run -p particulate-demo -- [OPTIONS]
//! ```
//!
//! ## Options
//!
//! - `-c, --config <PATH>`: Particle system config as JSON
//! - `-n, --frames <N>`: Frames to run (default: 600)
//! - `--fps <N>`: Simulated frame rate (default: 60)
//! - `-h, --help`: Print help message
//!
//! ## Environment Variables
//!
//! - `RUST_LOG`: Set log level (e.g., info, debug, trace)

mod fountain;

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use anyhow::Context;
use crossbeam::channel;
use glam::{Mat4, UVec2, Vec3};
use hashbrown::HashMap;
use particulate_core::{DrawableId, FrameInfo, TextureId};
use particulate_gpu::{
    BufferAllocator, HostBackend, HostBufferAllocator, ShaderProgram, TextureHandle,
};
use particulate_particles::{
    ActivityEvent, CommitOutcome, ContinuousRenderRequests, ParticleSystemConfig,
    ParticleSystemDrawable,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_FRAMES: u32 = 600;
const DEFAULT_FPS: u32 = 60;

/// Command line options.
#[derive(Debug)]
struct DemoOptions {
    config: Option<PathBuf>,
    frames: u32,
    fps: u32,
}

impl DemoOptions {
    fn from_args() -> anyhow::Result<Self> {
        let args: Vec<String> = std::env::args().skip(1).collect();
        let mut options = Self {
            config: None,
            frames: DEFAULT_FRAMES,
            fps: DEFAULT_FPS,
        };

        let mut i = 0;
        while i < args.len() {
            let value = args.get(i + 1);
            match args[i].as_str() {
                "-c" | "--config" => {
                    options.config = Some(value.context("--config needs a path")?.into());
                    i += 1;
                }
                "-n" | "--frames" => {
                    options.frames = value.context("--frames needs a count")?.parse()?;
                    i += 1;
                }
                "--fps" => {
                    options.fps = value.context("--fps needs a rate")?.parse()?;
                    anyhow::ensure!(options.fps > 0, "--fps must be positive");
                    i += 1;
                }
                other => warn!("Ignoring unknown argument {other}"),
            }
            i += 1;
        }
        Ok(options)
    }

    fn load_config(&self) -> anyhow::Result<ParticleSystemConfig> {
        let Some(path) = &self.config else {
            return Ok(ParticleSystemConfig::default()
                .with_name("fountain")
                .with_capacity(6000, 50)
                .with_lifetime(2.0)
                .with_point_size(4.0)
                .with_instanced_rectangles(true));
        };
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config = serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(config)
    }
}

fn main() -> anyhow::Result<()> {
    if std::env::args().any(|arg| arg == "-h" || arg == "--help") {
        print_help();
        return Ok(());
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let options = DemoOptions::from_args()?;
    let config = options.load_config()?;
    info!(
        drawable = %config.name,
        capacity = config.total_point_capacity,
        batch_size = config.batch_size,
        lifetime = config.lifetime,
        "Starting particle demo"
    );

    let allocator = Arc::new(HostBufferAllocator::new());
    let mut drawable = ParticleSystemDrawable::new(DrawableId(1), config, fountain::layout()?)?;
    let shared: Arc<dyn BufferAllocator> = allocator.clone();
    drawable.setup_resources(shared)?;

    let mut scheduler = ContinuousRenderRequests::new();
    drawable.update_renderer(&mut scheduler);
    let activity = drawable.subscribe();

    let dt = 1.0 / options.fps as f32;
    let mut backend =
        HostBackend::new(Arc::clone(&allocator)).with_kernel(fountain::integrator(dt));
    // The demo has no texture assets, so drawable textures never resolve.
    let textures: HashMap<TextureId, TextureHandle> = HashMap::new();
    let mut calculate_program = fountain::calculate_program();
    let mut render_program = fountain::render_program();

    // The producer commits one batch per tick it is sent.
    let (tick_tx, tick_rx) = channel::bounded::<f64>(4);
    let producer = drawable.producer()?;
    let worker = thread::Builder::new()
        .name("particle-producer".to_string())
        .spawn(move || -> particulate_particles::Result<(u64, u64)> {
            let (mut committed, mut dropped) = (0u64, 0u64);
            for (batch, time) in tick_rx.iter().enumerate() {
                let velocities = fountain::emit(batch as u64, producer.batch_size());
                match producer.commit(&[&velocities], time)? {
                    CommitOutcome::Committed(_) => committed += 1,
                    CommitOutcome::Dropped => dropped += 1,
                }
            }
            Ok((committed, dropped))
        })?;

    let projection = Mat4::perspective_rh(std::f32::consts::FRAC_PI_4, 16.0 / 9.0, 0.1, 100.0);
    let view = Mat4::look_at_rh(Vec3::new(0.0, 2.0, 8.0), Vec3::new(0.0, 1.0, 0.0), Vec3::Y);
    let framebuffer = UVec2::new(1280, 720);

    let mut draws = 0u64;
    for frame_index in 0..options.frames {
        let now = f64::from(frame_index) * f64::from(dt);
        if tick_tx.send(now).is_err() {
            warn!("Producer stopped early");
            break;
        }

        let frame = FrameInfo::new(now, dt, view, projection)
            .with_screen(framebuffer, framebuffer.as_vec2())
            .with_eye(Vec3::new(0.0, 2.0, 8.0), Vec3::new(0.0, -1.0, -8.0).normalize());
        let report = drawable.render_frame(
            Some(&mut calculate_program as &mut dyn ShaderProgram),
            Some(&mut render_program as &mut dyn ShaderProgram),
            &textures,
            &mut backend,
            &frame,
        )?;
        backend.take_commands();
        draws += u64::from(report.draw_calls);

        tracing::debug!(
            frame = frame_index,
            expired = report.expired,
            chunks = report.chunks,
            vertices = report.vertices,
            simulated = report.simulated,
            draw_calls = report.draw_calls,
            skipped = ?report.skipped,
            "Frame"
        );

        for event in activity.try_iter() {
            match event {
                ActivityEvent::Active { time, .. } => info!(time, "Particles active"),
                ActivityEvent::Idle { time, .. } => info!(time, "Particles idle"),
            }
        }
    }

    drop(tick_tx);
    let (committed, dropped) = worker
        .join()
        .map_err(|_| anyhow::anyhow!("Producer thread panicked"))??;

    info!(
        frames = options.frames,
        committed,
        dropped,
        draws,
        live_points = drawable.ring().active_count() * drawable.config().batch_size,
        continuous = scheduler.wants_frames(),
        "Demo finished"
    );
    drawable.teardown_resources()?;
    Ok(())
}

fn print_help() {
    eprintln!(
        "Particulate streaming particle demo

USAGE:
    cargo run -p particulate-demo -- [OPTIONS]

OPTIONS:
    -c, --config <PATH>     Particle system config as JSON
    -n, --frames <N>        Frames to run (default: {DEFAULT_FRAMES})
    --fps <N>               Simulated frame rate (default: {DEFAULT_FPS})
    -h, --help              Print this help message

ENVIRONMENT VARIABLES:
    RUST_LOG                Set log level (e.g., info, debug, trace)"
    );
}
