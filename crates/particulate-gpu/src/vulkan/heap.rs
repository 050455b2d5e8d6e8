//! Host-visible device memory for particle buffers.

use std::sync::Arc;

use ash::vk;
use gpu_allocator::vulkan::{
    Allocation, AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc,
};
use gpu_allocator::{AllocatorDebugSettings, MemoryLocation};

use crate::error::{GpuError, Result};

/// gpu-allocator heap that only hands out persistently mapped buffers.
pub struct DeviceHeap {
    allocator: Option<Allocator>,
    device: Arc<ash::Device>,
}

impl DeviceHeap {
    /// # Safety
    /// The instance, device and physical device must be valid and outlive
    /// the heap.
    pub unsafe fn new(
        instance: &ash::Instance,
        device: Arc<ash::Device>,
        physical_device: vk::PhysicalDevice,
    ) -> Result<Self> {
        let debug_settings = AllocatorDebugSettings {
            log_memory_information: cfg!(debug_assertions),
            log_leaks_on_shutdown: true,
            ..AllocatorDebugSettings::default()
        };
        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.clone(),
            device: (*device).clone(),
            physical_device,
            debug_settings,
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })
        .map_err(|e| GpuError::AllocationFailed(e.to_string()))?;

        Ok(Self {
            allocator: Some(allocator),
            device,
        })
    }

    pub fn device(&self) -> &Arc<ash::Device> {
        &self.device
    }

    fn allocator(&mut self) -> Result<&mut Allocator> {
        self.allocator
            .as_mut()
            .ok_or_else(|| GpuError::InvalidState("device heap is shut down".to_string()))
    }

    /// Create a `CpuToGpu` buffer and keep it mapped.
    ///
    /// Fails if the chosen memory type is not host-visible.
    pub fn create_mapped(
        &mut self,
        size: u64,
        usage: vk::BufferUsageFlags,
        label: &str,
    ) -> Result<MappedBuffer> {
        let info = vk::BufferCreateInfo::default()
            .size(size.max(1))
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let raw = unsafe { self.device.create_buffer(&info, None)? };
        let requirements = unsafe { self.device.get_buffer_memory_requirements(raw) };

        let allocation = self.allocator().and_then(|allocator| {
            allocator
                .allocate(&AllocationCreateDesc {
                    name: label,
                    requirements,
                    location: MemoryLocation::CpuToGpu,
                    linear: true,
                    allocation_scheme: AllocationScheme::GpuAllocatorManaged,
                })
                .map_err(|e| GpuError::AllocationFailed(format!("{label}: {e}")))
        });
        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { self.device.destroy_buffer(raw, None) };
                return Err(e);
            }
        };

        let bound = if allocation.mapped_ptr().is_none() {
            Err(GpuError::AllocationFailed(format!("{label}: memory is not host-visible")))
        } else {
            unsafe {
                self.device
                    .bind_buffer_memory(raw, allocation.memory(), allocation.offset())
                    .map_err(GpuError::from)
            }
        };

        let buffer = MappedBuffer {
            raw,
            allocation: Some(allocation),
            size,
        };
        if let Err(e) = bound {
            if let Err(free) = self.destroy(buffer) {
                tracing::warn!(buffer = label, "Failed to free unusable buffer: {free}");
            }
            return Err(e);
        }

        tracing::debug!(buffer = label, size_bytes = size, "Created mapped particle buffer");
        Ok(buffer)
    }

    /// Free the allocation and destroy the buffer.
    pub fn destroy(&mut self, mut buffer: MappedBuffer) -> Result<()> {
        if let Some(allocation) = buffer.allocation.take() {
            self.allocator()?
                .free(allocation)
                .map_err(|e| GpuError::AllocationFailed(e.to_string()))?;
        }
        unsafe { self.device.destroy_buffer(buffer.raw, None) };
        Ok(())
    }

    /// Drop the gpu-allocator heap. Must run before the device is destroyed.
    pub fn shutdown(&mut self) {
        self.allocator = None;
    }
}

impl Drop for DeviceHeap {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// A buffer whose memory stays mapped for its whole life.
pub struct MappedBuffer {
    raw: vk::Buffer,
    allocation: Option<Allocation>,
    size: u64,
}

impl MappedBuffer {
    pub fn raw(&self) -> vk::Buffer {
        self.raw
    }

    /// Requested size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    fn mapped(&self) -> Result<*mut u8> {
        self.allocation
            .as_ref()
            .and_then(Allocation::mapped_ptr)
            .map(|p| p.as_ptr().cast::<u8>())
            .ok_or_else(|| GpuError::InvalidState("buffer is not mapped".to_string()))
    }

    /// Copy `data` to `offset`. Callers writing concurrently must target
    /// disjoint ranges.
    pub fn write(&self, offset: u64, data: &[u8]) -> Result<()> {
        offset
            .checked_add(data.len() as u64)
            .filter(|end| *end <= self.size)
            .ok_or_else(|| {
                GpuError::OutOfRange(format!(
                    "write of {} bytes at {offset} into a {} byte buffer",
                    data.len(),
                    self.size
                ))
            })?;
        let ptr = self.mapped()?;
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), ptr.add(offset as usize), data.len());
        }
        Ok(())
    }

    pub fn zero(&self) -> Result<()> {
        let ptr = self.mapped()?;
        unsafe { std::ptr::write_bytes(ptr, 0, self.size as usize) };
        Ok(())
    }
}
