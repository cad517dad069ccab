// Device-memory backed buffers
//
// Allocation goes through the device's shared gpu-allocator instance;
// host-visible allocations come back persistently mapped, so map/unmap is
// not a per-use round trip. Flush/invalidate are only needed for
// non-coherent memory.

use anyhow::{Context, Result};
use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use gpu_allocator::MemoryLocation;
use std::sync::Arc;

use super::VulkanDevice;

/// A vk::Buffer bound to an allocator-managed memory block.
pub struct Buffer {
    device: Arc<VulkanDevice>,
    pub buffer: vk::Buffer,
    // Taken out in Drop so the allocation can be returned by value
    allocation: Option<Allocation>,
    pub size: vk::DeviceSize,
    pub usage: vk::BufferUsageFlags,
    pub location: MemoryLocation,
}

impl Buffer {
    /// Create a buffer of `size` bytes and bind fresh memory to it.
    pub fn new(
        device: Arc<VulkanDevice>,
        name: &str,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
    ) -> Result<Self> {
        let buffer_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe {
            device
                .device
                .create_buffer(&buffer_info, None)
                .context("Failed to create buffer")?
        };

        let requirements = unsafe { device.device.get_buffer_memory_requirements(buffer) };

        let allocation = device.allocate(&AllocationCreateDesc {
            name,
            requirements,
            location,
            linear: true,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        })?;

        unsafe {
            device
                .device
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
                .context("Failed to bind buffer memory")?;
        }

        Ok(Self {
            device,
            buffer,
            allocation: Some(allocation),
            size,
            usage,
            location,
        })
    }

    /// Create a host-visible buffer pre-filled with `data`.
    pub fn with_data(
        device: Arc<VulkanDevice>,
        name: &str,
        usage: vk::BufferUsageFlags,
        data: &[u8],
    ) -> Result<Self> {
        let mut buffer = Self::new(
            device,
            name,
            data.len() as vk::DeviceSize,
            usage,
            MemoryLocation::CpuToGpu,
        )?;
        buffer.copy_to(data)?;
        buffer.flush(0, vk::WHOLE_SIZE)?;
        Ok(buffer)
    }

    /// The persistently mapped range, if this buffer is host-visible.
    pub fn mapped_slice_mut(&mut self) -> Result<&mut [u8]> {
        self.allocation
            .as_mut()
            .and_then(|a| a.mapped_slice_mut())
            .context("Buffer is not host-visible")
    }

    /// Copy `data` into the start of the mapped range.
    pub fn copy_to(&mut self, data: &[u8]) -> Result<()> {
        anyhow::ensure!(
            data.len() as vk::DeviceSize <= self.size,
            "Data ({} bytes) exceeds buffer size ({} bytes)",
            data.len(),
            self.size
        );
        let mapped = self.mapped_slice_mut()?;
        mapped[..data.len()].copy_from_slice(data);
        Ok(())
    }

    /// Flush a range of the mapped memory to make host writes visible to
    /// the device. Only required for non-coherent memory.
    pub fn flush(&self, offset: vk::DeviceSize, size: vk::DeviceSize) -> Result<()> {
        let range = self.mapped_range(offset, size)?;
        unsafe {
            self.device
                .device
                .flush_mapped_memory_ranges(&[range])
                .context("Failed to flush mapped memory range")?;
        }
        Ok(())
    }

    /// Invalidate a range of the mapped memory to make device writes
    /// visible to the host. Only required for non-coherent memory.
    pub fn invalidate(&self, offset: vk::DeviceSize, size: vk::DeviceSize) -> Result<()> {
        let range = self.mapped_range(offset, size)?;
        unsafe {
            self.device
                .device
                .invalidate_mapped_memory_ranges(&[range])
                .context("Failed to invalidate mapped memory range")?;
        }
        Ok(())
    }

    /// Descriptor info covering `range` bytes starting at `offset`.
    pub fn descriptor(
        &self,
        offset: vk::DeviceSize,
        range: vk::DeviceSize,
    ) -> vk::DescriptorBufferInfo {
        vk::DescriptorBufferInfo {
            buffer: self.buffer,
            offset,
            range,
        }
    }

    fn mapped_range(
        &self,
        offset: vk::DeviceSize,
        size: vk::DeviceSize,
    ) -> Result<vk::MappedMemoryRange> {
        let allocation = self.allocation.as_ref().context("Allocation already freed")?;
        // The allocation may live at a nonzero offset inside a larger block
        let base = allocation.offset();
        Ok(vk::MappedMemoryRange::builder()
            .memory(unsafe { allocation.memory() })
            .offset(base + offset)
            .size(size)
            .build())
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_buffer(self.buffer, None);
        }
        if let Some(allocation) = self.allocation.take() {
            if let Err(e) = self.device.free(allocation) {
                log::warn!("Failed to free buffer allocation: {:?}", e);
            }
        }
    }
}
