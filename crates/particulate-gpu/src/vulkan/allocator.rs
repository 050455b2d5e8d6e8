use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ash::vk;
use hashbrown::HashMap;
use parking_lot::{Mutex, RwLock};

use super::heap::{DeviceHeap, MappedBuffer};
use crate::backend::{BufferAllocator, BufferHandle};
use crate::error::{GpuError, Result};

/// Hands out persistently mapped vertex and feedback buffers.
pub struct VulkanBufferAllocator {
    heap: Arc<Mutex<DeviceHeap>>,
    buffers: RwLock<HashMap<BufferHandle, MappedBuffer>>,
    next_id: AtomicU64,
    usage: vk::BufferUsageFlags,
}

impl VulkanBufferAllocator {
    pub fn new(heap: Arc<Mutex<DeviceHeap>>) -> Self {
        Self {
            heap,
            buffers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            usage: vk::BufferUsageFlags::VERTEX_BUFFER
                | vk::BufferUsageFlags::TRANSFORM_FEEDBACK_BUFFER_EXT
                | vk::BufferUsageFlags::TRANSFER_DST,
        }
    }

    /// Raw buffer behind a handle.
    pub fn raw_buffer(&self, handle: BufferHandle) -> Option<vk::Buffer> {
        self.buffers.read().get(&handle).map(MappedBuffer::raw)
    }

    /// Release every buffer still alive.
    pub fn release_all(&self) -> Result<()> {
        let drained: Vec<MappedBuffer> = self.buffers.write().drain().map(|(_, b)| b).collect();
        let mut heap = self.heap.lock();
        let mut result = Ok(());
        for buffer in drained {
            if let Err(e) = heap.destroy(buffer) {
                result = Err(e);
            }
        }
        result
    }
}

impl BufferAllocator for VulkanBufferAllocator {
    fn allocate(&self, size: u64, label: &str) -> Result<BufferHandle> {
        let buffer = self.heap.lock().create_mapped(size, self.usage, label)?;
        let handle = BufferHandle(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.buffers.write().insert(handle, buffer);
        Ok(handle)
    }

    fn release(&self, handle: BufferHandle) -> Result<()> {
        let buffer = self
            .buffers
            .write()
            .remove(&handle)
            .ok_or_else(|| GpuError::ResourceNotFound(format!("buffer {handle:?}")))?;
        self.heap.lock().destroy(buffer)
    }

    fn write(&self, handle: BufferHandle, offset: u64, data: &[u8]) -> Result<()> {
        let buffers = self.buffers.read();
        let buffer = buffers
            .get(&handle)
            .ok_or_else(|| GpuError::ResourceNotFound(format!("buffer {handle:?}")))?;
        buffer.write(offset, data)
    }

    fn zero(&self, handle: BufferHandle) -> Result<()> {
        let buffers = self.buffers.read();
        let buffer = buffers
            .get(&handle)
            .ok_or_else(|| GpuError::ResourceNotFound(format!("buffer {handle:?}")))?;
        buffer.zero()
    }

    fn size(&self, handle: BufferHandle) -> Option<u64> {
        self.buffers.read().get(&handle).map(MappedBuffer::size)
    }
}

impl Drop for VulkanBufferAllocator {
    fn drop(&mut self) {
        if let Err(e) = self.release_all() {
            tracing::warn!("Failed to release particle buffers: {e}");
        }
    }
}
