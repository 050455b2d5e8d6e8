use hashbrown::HashMap;
use parking_lot::Mutex;

use crate::backend::{BufferAllocator, BufferHandle};
use crate::error::{GpuError, Result};

/// Fill pattern for fresh allocations, so reads of unwritten memory stand out.
const UNINIT_FILL: u8 = 0xCD;

struct HostBuffer {
    label: String,
    data: Vec<u8>,
}

#[derive(Default)]
struct HostState {
    next_id: u64,
    buffers: HashMap<BufferHandle, HostBuffer>,
    allocated_bytes: u64,
}

/// Buffer allocator backed by host memory.
#[derive(Default)]
pub struct HostBufferAllocator {
    state: Mutex<HostState>,
    budget: Option<u64>,
}

impl HostBufferAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail allocations once `bytes` are live.
    pub fn with_budget(mut self, bytes: u64) -> Self {
        self.budget = Some(bytes);
        self
    }

    /// Copy of a buffer's contents.
    pub fn read_back(&self, handle: BufferHandle) -> Option<Vec<u8>> {
        self.state.lock().buffers.get(&handle).map(|b| b.data.clone())
    }

    /// Copy of `len` bytes starting at `offset`.
    pub fn read_range(&self, handle: BufferHandle, offset: u64, len: u64) -> Result<Vec<u8>> {
        let state = self.state.lock();
        let buffer = state
            .buffers
            .get(&handle)
            .ok_or_else(|| GpuError::ResourceNotFound(format!("buffer {handle:?}")))?;
        let range = checked_range(buffer.data.len(), offset, len)?;
        Ok(buffer.data[range].to_vec())
    }

    /// Number of live buffers.
    pub fn live_buffers(&self) -> usize {
        self.state.lock().buffers.len()
    }

    /// Total bytes held by live buffers.
    pub fn allocated_bytes(&self) -> u64 {
        self.state.lock().allocated_bytes
    }

    /// Label a buffer was allocated with.
    pub fn label(&self, handle: BufferHandle) -> Option<String> {
        self.state.lock().buffers.get(&handle).map(|b| b.label.clone())
    }
}

fn checked_range(len: usize, offset: u64, size: u64) -> Result<std::ops::Range<usize>> {
    let end = offset
        .checked_add(size)
        .ok_or_else(|| GpuError::OutOfRange("offset overflow".to_string()))?;
    if end > len as u64 {
        return Err(GpuError::OutOfRange(format!(
            "range {offset}..{end} exceeds buffer of {len} bytes"
        )));
    }
    Ok(offset as usize..end as usize)
}

impl BufferAllocator for HostBufferAllocator {
    fn allocate(&self, size: u64, label: &str) -> Result<BufferHandle> {
        let mut state = self.state.lock();
        if let Some(budget) = self.budget {
            if state.allocated_bytes + size > budget {
                return Err(GpuError::AllocationFailed(format!(
                    "{label}: {size} bytes exceeds remaining budget of {} bytes",
                    budget - state.allocated_bytes
                )));
            }
        }

        state.next_id += 1;
        let handle = BufferHandle(state.next_id);
        state.buffers.insert(
            handle,
            HostBuffer {
                label: label.to_string(),
                data: vec![UNINIT_FILL; size as usize],
            },
        );
        state.allocated_bytes += size;

        tracing::trace!(buffer = label, size_bytes = size, "Allocated host buffer");
        Ok(handle)
    }

    fn release(&self, handle: BufferHandle) -> Result<()> {
        let mut state = self.state.lock();
        let buffer = state
            .buffers
            .remove(&handle)
            .ok_or_else(|| GpuError::ResourceNotFound(format!("buffer {handle:?}")))?;
        state.allocated_bytes -= buffer.data.len() as u64;
        Ok(())
    }

    fn write(&self, handle: BufferHandle, offset: u64, data: &[u8]) -> Result<()> {
        let mut state = self.state.lock();
        let buffer = state
            .buffers
            .get_mut(&handle)
            .ok_or_else(|| GpuError::ResourceNotFound(format!("buffer {handle:?}")))?;
        let range = checked_range(buffer.data.len(), offset, data.len() as u64)?;
        buffer.data[range].copy_from_slice(data);
        Ok(())
    }

    fn zero(&self, handle: BufferHandle) -> Result<()> {
        let mut state = self.state.lock();
        let buffer = state
            .buffers
            .get_mut(&handle)
            .ok_or_else(|| GpuError::ResourceNotFound(format!("buffer {handle:?}")))?;
        buffer.data.fill(0);
        Ok(())
    }

    fn size(&self, handle: BufferHandle) -> Option<u64> {
        self.state
            .lock()
            .buffers
            .get(&handle)
            .map(|b| b.data.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_write_read() {
        let alloc = HostBufferAllocator::new();
        let handle = alloc.allocate(8, "points").unwrap();
        assert_eq!(alloc.size(handle), Some(8));
        assert_eq!(alloc.read_back(handle).unwrap(), vec![UNINIT_FILL; 8]);

        alloc.write(handle, 2, &[1, 2, 3]).unwrap();
        assert_eq!(alloc.read_range(handle, 2, 3).unwrap(), vec![1, 2, 3]);

        alloc.zero(handle).unwrap();
        assert_eq!(alloc.read_back(handle).unwrap(), vec![0; 8]);
        assert_eq!(alloc.label(handle).as_deref(), Some("points"));
    }

    #[test]
    fn write_past_end_fails() {
        let alloc = HostBufferAllocator::new();
        let handle = alloc.allocate(4, "small").unwrap();
        assert!(matches!(
            alloc.write(handle, 2, &[0; 4]),
            Err(GpuError::OutOfRange(_))
        ));
        assert!(alloc.write(handle, u64::MAX, &[0]).is_err());
    }

    #[test]
    fn release_tracks_bytes() {
        let alloc = HostBufferAllocator::new();
        let a = alloc.allocate(16, "a").unwrap();
        let b = alloc.allocate(32, "b").unwrap();
        assert_eq!(alloc.allocated_bytes(), 48);
        alloc.release(a).unwrap();
        assert_eq!(alloc.allocated_bytes(), 32);
        assert_eq!(alloc.live_buffers(), 1);
        assert!(alloc.release(a).is_err());
        alloc.release(b).unwrap();
        assert_eq!(alloc.live_buffers(), 0);
    }

    #[test]
    fn budget_limits_allocation() {
        let alloc = HostBufferAllocator::new().with_budget(64);
        alloc.allocate(48, "a").unwrap();
        assert!(matches!(
            alloc.allocate(32, "b"),
            Err(GpuError::AllocationFailed(_))
        ));
        alloc.allocate(16, "c").unwrap();
    }
}
