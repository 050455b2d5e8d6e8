//! Streaming particle buffers for the Particulate engine.
//!
//! Producers commit fixed-size batches of per-particle attributes into a
//! ring of device buffer slots. Each frame the drawable expires aged
//! batches, coalesces the live slots into contiguous chunks, runs the
//! optional simulate pass through double-buffered feedback storage and
//! draws the chunks as points or instanced rectangles.

pub mod chunks;
pub mod config;
pub mod drawable;
pub mod error;
pub mod feedback;
pub mod pipeline;
pub mod ring;
pub mod schedule;


pub use chunks::{coalesce, BufferChunk, ChunkCoalescer};
pub use config::ParticleSystemConfig;
pub use drawable::{
    CommitOutcome, ParticleProducer, ParticleSystemDrawable, TemplateVertex, RECT_TEMPLATE,
};
pub use error::{ParticleError, Result};
pub use feedback::{FeedbackPair, FeedbackStore, SimulatePass};
pub use pipeline::{DeviceResources, FrameReport, SimulateAndRenderPipeline, SkipReason};
pub use ring::{Batch, BatchHandle, BatchRing, RingState};
pub use schedule::{ActivityEvent, ContinuousRenderRequests, FrameScheduler};
