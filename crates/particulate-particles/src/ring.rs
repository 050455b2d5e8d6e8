//! Fixed-capacity ring of particle batches over one device buffer.
//!
//! `head` and `tail` are unbounded logical counters. Slot indices are taken
//! modulo the capacity. Allocation advances `tail`, expiration advances `head`,
//! and `head <= tail <= head + capacity` always holds.

use parking_lot::Mutex;
use particulate_core::AttributeLayout;
use particulate_gpu::{BufferAllocator, BufferHandle};

use crate::chunks::ChunkCoalescer;
use crate::error::{ParticleError, Result};

/// One ring slot.
#[derive(Clone, Debug, PartialEq)]
pub struct Batch {
    /// Slot index.
    pub id: u32,
    /// Byte offset of the slot in the point buffer.
    pub buffer_offset: u64,
    /// Byte length of the slot.
    pub len: u64,
    pub active: bool,
    pub start_time: f64,
    /// Logical index the slot was last reserved at.
    pub(crate) sequence: u64,
    /// Reserved, then given up after a failed write. Retired without data.
    pub(crate) abandoned: bool,
}

/// A reserved slot, returned by [`BatchRing::allocate`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BatchHandle {
    id: u32,
    sequence: u64,
    buffer_offset: u64,
    len: u64,
}

impl BatchHandle {
    #[inline]
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Logical position of the reservation.
    #[inline]
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    #[inline]
    pub fn buffer_offset(&self) -> u64 {
        self.buffer_offset
    }

    #[inline]
    pub fn len(&self) -> u64 {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Ring cursors and slot metadata, guarded by the ring's lock.
#[derive(Clone, Debug)]
pub struct RingState {
    capacity: u32,
    batch_size: u32,
    stride: u32,
    head: u64,
    tail: u64,
    generation: u64,
    pub(crate) dirty: bool,
    active_count: u32,
    batches: Vec<Batch>,
}

impl RingState {
    fn new(capacity: u32, batch_size: u32, stride: u32) -> Self {
        let len = u64::from(batch_size) * u64::from(stride);
        let batches = (0..capacity)
            .map(|id| Batch {
                id,
                buffer_offset: u64::from(id) * len,
                len,
                active: false,
                start_time: 0.0,
                sequence: 0,
                abandoned: false,
            })
            .collect();
        Self {
            capacity,
            batch_size,
            stride,
            head: 0,
            tail: 0,
            generation: 0,
            dirty: true,
            active_count: 0,
            batches,
        }
    }

    #[inline]
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    #[inline]
    pub fn batch_size(&self) -> u32 {
        self.batch_size
    }

    #[inline]
    pub fn stride(&self) -> u32 {
        self.stride
    }

    #[inline]
    pub fn head(&self) -> u64 {
        self.head
    }

    #[inline]
    pub fn tail(&self) -> u64 {
        self.tail
    }

    /// Bumped by every [`BatchRing::reset`].
    #[inline]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    #[inline]
    pub fn dirty(&self) -> bool {
        self.dirty
    }

    /// Number of reserved slots, committed or not.
    #[inline]
    pub fn len(&self) -> u64 {
        self.tail - self.head
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.head == self.tail
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.len() >= u64::from(self.capacity)
    }

    #[inline]
    pub fn active_count(&self) -> u32 {
        self.active_count
    }

    pub fn batches(&self) -> &[Batch] {
        &self.batches
    }

    #[inline]
    pub(crate) fn slot(&self, logical: u64) -> usize {
        (logical % u64::from(self.capacity)) as usize
    }

    /// Whether the slot at logical index `logical` holds committed data.
    pub fn is_active_at(&self, logical: u64) -> bool {
        if logical < self.head || logical >= self.tail {
            return false;
        }
        let batch = &self.batches[self.slot(logical)];
        batch.active && batch.sequence == logical
    }
}

/// Ring allocator of fixed-size batches with FIFO expiration.
///
/// Metadata lives behind one lock. Attribute bytes are written outside the
/// lock since reserved slots occupy disjoint buffer ranges.
pub struct BatchRing {
    state: Mutex<RingState>,
    layout: AttributeLayout,
    lifetime: f64,
}

impl BatchRing {
    /// Create a ring of `total_point_capacity / batch_size` slots.
    pub fn new(
        total_point_capacity: u32,
        batch_size: u32,
        layout: AttributeLayout,
        lifetime: f64,
    ) -> Result<Self> {
        if batch_size == 0 || total_point_capacity == 0 {
            return Err(ParticleError::InvalidConfig(
                "ring needs a non-zero batch size and capacity".to_string(),
            ));
        }
        if total_point_capacity % batch_size != 0 {
            return Err(ParticleError::InvalidConfig(format!(
                "point capacity {total_point_capacity} is not a multiple of batch size {batch_size}"
            )));
        }

        let capacity = total_point_capacity / batch_size;
        Ok(Self {
            state: Mutex::new(RingState::new(capacity, batch_size, layout.stride())),
            layout,
            lifetime,
        })
    }

    pub fn layout(&self) -> &AttributeLayout {
        &self.layout
    }

    pub fn lifetime(&self) -> f64 {
        self.lifetime
    }

    /// Size in bytes of the point buffer the ring addresses.
    pub fn buffer_size(&self) -> u64 {
        let state = self.state.lock();
        u64::from(state.capacity) * u64::from(state.batch_size) * u64::from(state.stride)
    }

    /// Point capacity of the ring.
    pub fn point_capacity(&self) -> u32 {
        let state = self.state.lock();
        state.capacity * state.batch_size
    }

    /// Copy of the current state.
    pub fn snapshot(&self) -> RingState {
        self.state.lock().clone()
    }

    pub fn active_count(&self) -> u32 {
        self.state.lock().active_count
    }

    pub fn generation(&self) -> u64 {
        self.state.lock().generation
    }

    /// Drop every batch and start a new generation.
    ///
    /// `head` jumps to `tail`, so handles reserved before the reset are no
    /// longer in the window and their commits are rejected.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.head = state.tail;
        for batch in &mut state.batches {
            batch.active = false;
            batch.abandoned = false;
        }
        state.active_count = 0;
        state.generation += 1;
        state.dirty = true;
        tracing::trace!(generation = state.generation, "Reset particle ring");
    }

    /// Reserve the next slot. Returns `None` when the ring is full.
    pub fn allocate(&self) -> Option<BatchHandle> {
        let mut state = self.state.lock();
        if state.is_full() {
            return None;
        }

        let sequence = state.tail;
        let slot = state.slot(sequence);
        let batch = &mut state.batches[slot];
        batch.sequence = sequence;
        batch.active = false;
        batch.abandoned = false;
        let handle = BatchHandle {
            id: batch.id,
            sequence,
            buffer_offset: batch.buffer_offset,
            len: batch.len,
        };
        state.tail += 1;
        Some(handle)
    }

    /// Check attribute data against the layout without touching any state.
    ///
    /// One slice per static attribute, each holding `batch_size` values.
    pub fn validate(&self, attribute_data: &[&[u8]]) -> Result<()> {
        let attributes = self.layout.attributes();
        if attribute_data.len() != attributes.len() {
            return Err(ParticleError::AttributeMismatch {
                expected: attributes.len(),
                actual: attribute_data.len(),
                detail: "attribute count".to_string(),
            });
        }

        let batch_size = self.state.lock().batch_size as usize;
        for (spec, data) in attributes.iter().zip(attribute_data) {
            let expected = spec.byte_size() as usize * batch_size;
            if data.len() != expected {
                return Err(ParticleError::AttributeMismatch {
                    expected,
                    actual: data.len(),
                    detail: format!("byte size of `{}`", spec.name),
                });
            }
        }
        Ok(())
    }

    /// Interleave per-attribute arrays into vertex order.
    fn interleave(&self, attribute_data: &[&[u8]], batch_size: usize) -> Vec<u8> {
        let stride = self.layout.stride() as usize;
        let mut bytes = vec![0u8; stride * batch_size];
        for ((spec, offset), data) in self.layout.attributes_with_offsets().zip(attribute_data) {
            let size = spec.byte_size() as usize;
            for (vertex, value) in data.chunks_exact(size).enumerate() {
                let start = vertex * stride + offset as usize;
                bytes[start..start + size].copy_from_slice(value);
            }
        }
        bytes
    }

    /// Write a batch's attribute data and activate its slot.
    ///
    /// The data is checked first. On a mismatch nothing is written and the
    /// handle stays reserved, so the caller may retry with corrected data.
    /// If the buffer write fails the reservation is given back.
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    pub fn commit(
        &self,
        handle: BatchHandle,
        attribute_data: &[&[u8]],
        start_time: f64,
        allocator: &dyn BufferAllocator,
        buffer: BufferHandle,
    ) -> Result<()> {
        self.validate(attribute_data)?;

        let batch_size = {
            let state = self.state.lock();
            Self::check_reserved(&state, handle)?;
            state.batch_size as usize
        };

        if self.layout.stride() > 0 {
            let bytes = self.interleave(attribute_data, batch_size);
            if let Err(e) = allocator.write(buffer, handle.buffer_offset, &bytes) {
                self.abandon(handle);
                return Err(e.into());
            }
        }

        let mut state = self.state.lock();
        Self::check_reserved(&state, handle)?;
        let batch = &mut state.batches[handle.id as usize];
        batch.active = true;
        batch.start_time = start_time;
        state.active_count += 1;
        state.dirty = true;

        tracing::trace!(batch = handle.id, start_time, "Committed particle batch");
        Ok(())
    }

    /// Give back a reserved slot that will never be committed.
    ///
    /// The newest reservation is undone outright. Older ones are marked so
    /// expiry can step over them. Handles that are no longer reserved are
    /// ignored.
    pub fn abandon(&self, handle: BatchHandle) {
        let mut state = self.state.lock();
        if Self::check_reserved(&state, handle).is_err() {
            return;
        }
        if handle.sequence + 1 == state.tail {
            state.tail -= 1;
        } else {
            state.batches[handle.id as usize].abandoned = true;
        }
        tracing::debug!(batch = handle.id, sequence = handle.sequence, "Abandoned particle batch");
    }

    fn check_reserved(state: &RingState, handle: BatchHandle) -> Result<()> {
        let batch = state.batches.get(handle.id as usize).ok_or_else(|| {
            ParticleError::InvalidHandle(format!("slot {} out of range", handle.id))
        })?;
        let in_window = handle.sequence >= state.head && handle.sequence < state.tail;
        if !in_window || batch.sequence != handle.sequence || batch.active {
            return Err(ParticleError::InvalidHandle(format!(
                "slot {} at sequence {} is not reserved",
                handle.id, handle.sequence
            )));
        }
        Ok(())
    }

    /// Retire aged batches from the head. Returns how many expired.
    ///
    /// A batch survives while `start_time + lifetime >= now`. Abandoned slots
    /// are stepped over. The scan stops at the first slot that is unexpired
    /// or not yet committed.
    pub fn expire(&self, now: f64) -> usize {
        let mut state = self.state.lock();
        let mut expired = 0;
        let mut skipped = 0;
        while state.head < state.tail {
            let slot = state.slot(state.head);
            let batch = &mut state.batches[slot];
            if batch.abandoned {
                batch.abandoned = false;
                state.head += 1;
                skipped += 1;
                continue;
            }
            if !batch.active || batch.start_time + self.lifetime >= now {
                break;
            }
            batch.active = false;
            state.head += 1;
            state.active_count -= 1;
            expired += 1;
        }
        if skipped > 0 {
            state.dirty = true;
        }
        if expired > 0 {
            state.dirty = true;
            tracing::trace!(expired, head = state.head, "Expired particle batches");
        }
        expired
    }

    /// Bring the coalescer's chunk list up to date with the active set.
    pub fn update_chunks(&self, coalescer: &mut ChunkCoalescer) {
        let mut state = self.state.lock();
        coalescer.recompute(&mut state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use particulate_core::{AttributeFormat, AttributeSpec};
    use particulate_gpu::HostBufferAllocator;

    fn layout() -> AttributeLayout {
        AttributeLayout::with_attributes(vec![
            AttributeSpec::new("a_position", AttributeFormat::Float3),
            AttributeSpec::new("a_color", AttributeFormat::UNorm8x4),
        ])
        .unwrap()
    }

    fn ring_with_buffer(points: u32, batch: u32) -> (BatchRing, HostBufferAllocator, BufferHandle) {
        let ring = BatchRing::new(points, batch, layout(), 5.0).unwrap();
        let alloc = HostBufferAllocator::new();
        let buffer = alloc.allocate(ring.buffer_size(), "points").unwrap();
        (ring, alloc, buffer)
    }

    fn batch_data(batch: usize) -> (Vec<u8>, Vec<u8>) {
        let positions: Vec<f32> = (0..batch * 3).map(|i| i as f32).collect();
        let colors: Vec<u8> = (0..batch * 4).map(|i| i as u8).collect();
        (bytemuck::cast_slice(&positions).to_vec(), colors)
    }

    #[test]
    fn rejects_uneven_capacity() {
        assert!(BatchRing::new(105, 10, layout(), 5.0).is_err());
        assert!(BatchRing::new(100, 0, layout(), 5.0).is_err());
    }

    #[test]
    fn allocate_until_full() {
        let ring = BatchRing::new(30, 10, layout(), 5.0).unwrap();
        let handles: Vec<_> = (0..3).filter_map(|_| ring.allocate()).collect();
        assert_eq!(handles.len(), 3);
        assert_eq!(handles[2].id(), 2);
        assert_eq!(handles[2].buffer_offset(), 2 * 10 * 16);
        assert!(ring.allocate().is_none());
        assert!(ring.snapshot().is_full());
    }

    #[test]
    fn commit_interleaves_attributes() {
        let (ring, alloc, buffer) = ring_with_buffer(4, 2);
        let handle = ring.allocate().unwrap();
        let (pos, col) = batch_data(2);
        ring.commit(handle, &[&pos, &col], 0.0, &alloc, buffer)
            .unwrap();

        let bytes = alloc.read_range(buffer, 0, 32).unwrap();
        assert_eq!(&bytes[0..12], &pos[0..12]);
        assert_eq!(&bytes[12..16], &col[0..4]);
        assert_eq!(&bytes[16..28], &pos[12..24]);
        assert_eq!(&bytes[28..32], &col[4..8]);

        let state = ring.snapshot();
        assert!(state.dirty());
        assert_eq!(state.active_count(), 1);
        assert!(state.is_active_at(0));
    }

    #[test]
    fn mismatch_leaves_buffer_and_handle_untouched() {
        let (ring, alloc, buffer) = ring_with_buffer(4, 2);
        let handle = ring.allocate().unwrap();
        let before = alloc.read_back(buffer).unwrap();
        let (pos, col) = batch_data(2);

        let err = ring
            .commit(handle, &[&pos], 0.0, &alloc, buffer)
            .unwrap_err();
        assert!(matches!(
            err,
            ParticleError::AttributeMismatch {
                expected: 2,
                actual: 1,
                ..
            }
        ));
        let short = &col[..4];
        assert!(ring
            .commit(handle, &[&pos, short], 0.0, &alloc, buffer)
            .is_err());
        assert_eq!(alloc.read_back(buffer).unwrap(), before);
        assert_eq!(ring.active_count(), 0);

        ring.commit(handle, &[&pos, &col], 0.0, &alloc, buffer)
            .unwrap();
        assert_eq!(ring.active_count(), 1);
    }

    #[test]
    fn double_commit_is_rejected() {
        let (ring, alloc, buffer) = ring_with_buffer(4, 2);
        let handle = ring.allocate().unwrap();
        let (pos, col) = batch_data(2);
        ring.commit(handle, &[&pos, &col], 0.0, &alloc, buffer)
            .unwrap();
        assert!(matches!(
            ring.commit(handle, &[&pos, &col], 0.0, &alloc, buffer),
            Err(ParticleError::InvalidHandle(_))
        ));
    }

    #[test]
    fn expiry_boundary_is_exclusive() {
        let (ring, alloc, buffer) = ring_with_buffer(20, 10);
        let (pos, col) = batch_data(10);
        let handle = ring.allocate().unwrap();
        ring.commit(handle, &[&pos, &col], 1.0, &alloc, buffer)
            .unwrap();

        assert_eq!(ring.expire(6.0), 0);
        assert_eq!(ring.expire(6.0001), 1);
        assert_eq!(ring.snapshot().head(), 1);
    }

    #[test]
    fn expire_stops_at_uncommitted_head() {
        let (ring, alloc, buffer) = ring_with_buffer(30, 10);
        let (pos, col) = batch_data(10);
        let _pending = ring.allocate().unwrap();
        let second = ring.allocate().unwrap();
        ring.commit(second, &[&pos, &col], 0.0, &alloc, buffer)
            .unwrap();

        assert_eq!(ring.expire(100.0), 0);
        assert_eq!(ring.snapshot().head(), 0);
    }

    #[test]
    fn stale_handle_after_wrap_is_rejected() {
        let (ring, alloc, buffer) = ring_with_buffer(10, 10);
        let (pos, col) = batch_data(10);
        let first = ring.allocate().unwrap();
        ring.commit(first, &[&pos, &col], 0.0, &alloc, buffer)
            .unwrap();
        assert_eq!(ring.expire(10.0), 1);

        let second = ring.allocate().unwrap();
        assert_eq!(second.id(), first.id());
        assert_ne!(second.sequence(), first.sequence());
        assert!(ring.commit(first, &[&pos, &col], 0.0, &alloc, buffer).is_err());
        ring.commit(second, &[&pos, &col], 11.0, &alloc, buffer)
            .unwrap();
    }

    #[test]
    fn failed_write_returns_newest_reservation() {
        let (ring, alloc, buffer) = ring_with_buffer(20, 10);
        let (pos, col) = batch_data(10);
        let handle = ring.allocate().unwrap();
        assert!(ring
            .commit(handle, &[&pos, &col], 0.0, &alloc, BufferHandle(999))
            .is_err());
        assert!(ring.snapshot().is_empty());

        let again = ring.allocate().unwrap();
        assert_eq!(again.id(), 0);
        ring.commit(again, &[&pos, &col], 0.0, &alloc, buffer)
            .unwrap();
        assert_eq!(ring.expire(100.0), 1);
        assert!(ring.snapshot().is_empty());
    }

    #[test]
    fn abandoned_slot_does_not_block_expiry() {
        let (ring, alloc, buffer) = ring_with_buffer(30, 10);
        let (pos, col) = batch_data(10);
        let failed = ring.allocate().unwrap();
        let second = ring.allocate().unwrap();
        assert!(ring
            .commit(failed, &[&pos, &col], 0.0, &alloc, BufferHandle(999))
            .is_err());
        ring.commit(second, &[&pos, &col], 0.0, &alloc, buffer)
            .unwrap();

        let state = ring.snapshot();
        assert_eq!(state.len(), 2);
        assert!(!state.is_active_at(0));
        assert_eq!(crate::chunks::coalesce(&state).len(), 1);

        assert_eq!(ring.expire(100.0), 1);
        let state = ring.snapshot();
        assert_eq!(state.head(), 2);
        assert!(state.is_empty());
        assert!(ring.commit(failed, &[&pos, &col], 0.0, &alloc, buffer).is_err());
    }

    #[test]
    fn reset_clears_batches_and_invalidates_handles() {
        let (ring, alloc, buffer) = ring_with_buffer(30, 10);
        let (pos, col) = batch_data(10);
        let committed = ring.allocate().unwrap();
        ring.commit(committed, &[&pos, &col], 0.0, &alloc, buffer)
            .unwrap();
        let reserved = ring.allocate().unwrap();

        ring.reset();
        let state = ring.snapshot();
        assert_eq!(state.generation(), 1);
        assert_eq!(state.active_count(), 0);
        assert!(state.is_empty());
        assert!(state.dirty());
        assert!(state.batches().iter().all(|b| !b.active));
        assert!(matches!(
            ring.commit(reserved, &[&pos, &col], 0.0, &alloc, buffer),
            Err(ParticleError::InvalidHandle(_))
        ));

        let handles: Vec<_> = (0..3).filter_map(|_| ring.allocate()).collect();
        assert_eq!(handles.len(), 3);
    }

    #[test]
    fn zero_stride_commit_only_activates() {
        let layout = AttributeLayout::new(
            Vec::new(),
            vec![AttributeSpec::new("a_position", AttributeFormat::Float3)],
        )
        .unwrap();
        let ring = BatchRing::new(20, 10, layout, 1.0).unwrap();
        assert_eq!(ring.buffer_size(), 0);

        let alloc = HostBufferAllocator::new();
        let handle = ring.allocate().unwrap();
        ring.commit(handle, &[], 0.0, &alloc, BufferHandle(0))
            .unwrap();
        assert_eq!(ring.active_count(), 1);
    }
}
