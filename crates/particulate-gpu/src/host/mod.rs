//! In-memory backend.
//!
//! Buffers live in host memory and every bind, draw and feedback pass is
//! recorded. Feedback passes can run a [`FeedbackKernel`] so captured outputs
//! land in the bound buffer ranges the way a device would write them. Used
//! for headless runs and tests.

mod backend;
mod memory;
mod program;

pub use backend::{FeedbackInput, FeedbackKernel, FeedbackOutput, HostBackend, RecordedCommand};
pub use memory::HostBufferAllocator;
pub use program::HostProgram;
