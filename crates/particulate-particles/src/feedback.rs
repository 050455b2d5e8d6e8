//! Double-buffered storage for device-computed attributes.
//!
//! Each varying owns two equally sized buffers. One shared role selects
//! which is read by the simulate and draw passes; the other receives the
//! simulate pass output. The role flips once per completed simulate pass,
//! after every chunk has been processed.

use particulate_core::VaryingSpec;
use particulate_gpu::{BufferAllocator, BufferHandle, Result};

/// Both buffers of one varying attribute.
#[derive(Clone, Debug)]
pub struct FeedbackPair {
    spec: VaryingSpec,
    buffers: [BufferHandle; 2],
    size: u64,
}

impl FeedbackPair {
    pub fn spec(&self) -> &VaryingSpec {
        &self.spec
    }

    pub fn buffers(&self) -> [BufferHandle; 2] {
        self.buffers
    }

    /// Size of each buffer in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }
}

pub struct FeedbackStore {
    pairs: Vec<FeedbackPair>,
    active_role: usize,
    completed_passes: u64,
}

impl FeedbackStore {
    /// Allocate and zero both buffers of every varying.
    ///
    /// On failure every buffer created so far is released.
    pub fn create(
        allocator: &dyn BufferAllocator,
        varyings: &[VaryingSpec],
        vertex_capacity: u32,
        label: &str,
    ) -> Result<Self> {
        let mut store = Self {
            pairs: Vec::with_capacity(varyings.len()),
            active_role: 0,
            completed_passes: 0,
        };

        for spec in varyings {
            match Self::create_pair(allocator, spec, vertex_capacity, label) {
                Ok(pair) => store.pairs.push(pair),
                Err(e) => {
                    store.release(allocator);
                    return Err(e);
                }
            }
        }

        tracing::debug!(
            drawable = label,
            varyings = store.pairs.len(),
            vertex_capacity,
            "Created feedback buffers"
        );
        Ok(store)
    }

    fn create_pair(
        allocator: &dyn BufferAllocator,
        spec: &VaryingSpec,
        vertex_capacity: u32,
        label: &str,
    ) -> Result<FeedbackPair> {
        let size = u64::from(spec.byte_size()) * u64::from(vertex_capacity);
        let first = allocator.allocate(size, &format!("{label}/{}/0", spec.name))?;
        let second = match allocator.allocate(size, &format!("{label}/{}/1", spec.name)) {
            Ok(handle) => handle,
            Err(e) => {
                let _ = allocator.release(first);
                return Err(e);
            }
        };

        let pair = FeedbackPair {
            spec: spec.clone(),
            buffers: [first, second],
            size,
        };
        for handle in pair.buffers {
            if let Err(e) = allocator.zero(handle) {
                let _ = allocator.release(first);
                let _ = allocator.release(second);
                return Err(e);
            }
        }
        Ok(pair)
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn pairs(&self) -> &[FeedbackPair] {
        &self.pairs
    }

    /// Role currently read from.
    #[inline]
    pub fn active_role(&self) -> usize {
        self.active_role
    }

    #[inline]
    pub fn completed_passes(&self) -> u64 {
        self.completed_passes
    }

    /// Buffer of varying `index` holding the latest results.
    pub fn current_read(&self, index: usize) -> Option<BufferHandle> {
        self.pairs.get(index).map(|p| p.buffers[self.active_role])
    }

    /// Buffer of varying `index` the next simulate pass writes.
    pub fn current_write(&self, index: usize) -> Option<BufferHandle> {
        self.pairs.get(index).map(|p| p.buffers[1 - self.active_role])
    }

    /// Swap read and write roles.
    ///
    /// Must follow a simulate pass over all chunks. [`SimulatePass`] calls
    /// this on completion.
    pub fn flip(&mut self) {
        self.active_role = 1 - self.active_role;
        self.completed_passes += 1;
    }

    /// Begin a simulate pass. The role flips when the pass completes.
    pub fn begin_pass(&mut self) -> SimulatePass<'_> {
        SimulatePass {
            store: self,
            chunks: 0,
        }
    }

    /// Release every buffer. Errors are logged and skipped so the rest still
    /// get released.
    pub fn release(&mut self, allocator: &dyn BufferAllocator) {
        for pair in self.pairs.drain(..) {
            for handle in pair.buffers {
                if let Err(e) = allocator.release(handle) {
                    tracing::warn!(varying = %pair.spec.name, "Failed to release feedback buffer: {e}");
                }
            }
        }
    }
}

/// An in-progress simulate pass.
///
/// Dropping the pass without calling [`SimulatePass::complete`] leaves the
/// roles unchanged.
pub struct SimulatePass<'a> {
    store: &'a mut FeedbackStore,
    chunks: usize,
}

impl SimulatePass<'_> {
    pub fn store(&self) -> &FeedbackStore {
        self.store
    }

    /// Note that one chunk has been simulated.
    pub fn record_chunk(&mut self) {
        self.chunks += 1;
    }

    pub fn chunks(&self) -> usize {
        self.chunks
    }

    /// Finish the pass and flip roles. Returns the completed pass count.
    pub fn complete(self) -> u64 {
        self.store.flip();
        self.store.completed_passes
    }
}
