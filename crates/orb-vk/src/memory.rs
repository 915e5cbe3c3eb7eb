//! GPU memory management.

use crate::error::{Result, VkError};
use ash::vk;
use bytemuck::Pod;
use gpu_allocator::vulkan::{
    Allocation, AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc,
};
use gpu_allocator::MemoryLocation;
use std::sync::Arc;

/// GPU memory allocator wrapper.
pub struct GpuAllocator {
    allocator: Option<Allocator>,
    device: Arc<ash::Device>,
    buffer_device_address: bool,
}

impl GpuAllocator {
    /// Create a new allocator.
    ///
    /// # Safety
    /// The instance, device, and physical device must be valid.
    pub unsafe fn new(
        instance: &ash::Instance,
        device: Arc<ash::Device>,
        physical_device: vk::PhysicalDevice,
        buffer_device_address: bool,
    ) -> Result<Self> {
        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.clone(),
            device: (*device).clone(),
            physical_device,
            debug_settings: gpu_allocator::AllocatorDebugSettings {
                log_memory_information: cfg!(debug_assertions),
                log_leaks_on_shutdown: true,
                store_stack_traces: false,
                log_allocations: false,
                log_frees: false,
                log_stack_traces: false,
            },
            buffer_device_address,
            allocation_sizes: Default::default(),
        })
        .map_err(|e| VkError::AllocationFailed(e.to_string()))?;

        Ok(Self {
            allocator: Some(allocator),
            device,
            buffer_device_address,
        })
    }

    /// Returns `true` if buffers may request device addresses.
    pub fn buffer_device_address(&self) -> bool {
        self.buffer_device_address
    }

    fn inner(&mut self) -> Result<&mut Allocator> {
        self.allocator
            .as_mut()
            .ok_or_else(|| VkError::InvalidState("Allocator already shut down".to_string()))
    }

    /// Allocate a buffer.
    pub fn create_buffer(
        &mut self,
        size: u64,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
        name: &str,
    ) -> Result<GpuBuffer> {
        if size == 0 {
            return Err(VkError::InvalidArgument(format!(
                "buffer '{name}' has zero size"
            )));
        }
        if usage.contains(vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS)
            && !self.buffer_device_address
        {
            return Err(VkError::InvalidArgument(format!(
                "buffer '{name}' requests a device address but the feature is disabled"
            )));
        }

        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { self.device.create_buffer(&buffer_info, None)? };
        let requirements = unsafe { self.device.get_buffer_memory_requirements(buffer) };

        let allocation = match self.inner().and_then(|allocator| {
            allocator
                .allocate(&AllocationCreateDesc {
                    name,
                    requirements,
                    location,
                    linear: true,
                    allocation_scheme: AllocationScheme::GpuAllocatorManaged,
                })
                .map_err(|e| VkError::AllocationFailed(e.to_string()))
        }) {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { self.device.destroy_buffer(buffer, None) };
                return Err(e);
            }
        };

        let bound = unsafe {
            self.device
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
        };
        let allocation = release_on_failure(bound, allocation, |allocation| {
            free_quietly(self.allocator.as_mut(), allocation, name);
            unsafe { self.device.destroy_buffer(buffer, None) };
        })?;

        tracing::trace!("Allocated buffer '{name}' ({size} bytes, {location:?})");

        Ok(GpuBuffer {
            buffer,
            allocation: Some(allocation),
            size,
            usage,
        })
    }

    /// Free a buffer allocation.
    pub fn free_buffer(&mut self, buffer: &mut GpuBuffer) -> Result<()> {
        if let Some(allocation) = buffer.allocation.take() {
            self.inner()?
                .free(allocation)
                .map_err(|e| VkError::AllocationFailed(e.to_string()))?;
        }

        if buffer.buffer != vk::Buffer::null() {
            unsafe { self.device.destroy_buffer(buffer.buffer, None) };
            buffer.buffer = vk::Buffer::null();
        }

        Ok(())
    }

    /// Allocate an image.
    pub fn create_image(
        &mut self,
        create_info: &vk::ImageCreateInfo,
        location: MemoryLocation,
        name: &str,
    ) -> Result<GpuImage> {
        let image = unsafe { self.device.create_image(create_info, None)? };
        let requirements = unsafe { self.device.get_image_memory_requirements(image) };

        let allocation = match self.inner().and_then(|allocator| {
            allocator
                .allocate(&AllocationCreateDesc {
                    name,
                    requirements,
                    location,
                    linear: create_info.tiling == vk::ImageTiling::LINEAR,
                    allocation_scheme: AllocationScheme::GpuAllocatorManaged,
                })
                .map_err(|e| VkError::AllocationFailed(e.to_string()))
        }) {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { self.device.destroy_image(image, None) };
                return Err(e);
            }
        };

        let bound = unsafe {
            self.device
                .bind_image_memory(image, allocation.memory(), allocation.offset())
        };
        let allocation = release_on_failure(bound, allocation, |allocation| {
            free_quietly(self.allocator.as_mut(), allocation, name);
            unsafe { self.device.destroy_image(image, None) };
        })?;

        Ok(GpuImage {
            image,
            allocation: Some(allocation),
            format: create_info.format,
            extent: create_info.extent,
            mip_levels: create_info.mip_levels,
            array_layers: create_info.array_layers,
        })
    }

    /// Free an image allocation.
    pub fn free_image(&mut self, image: &mut GpuImage) -> Result<()> {
        if let Some(allocation) = image.allocation.take() {
            self.inner()?
                .free(allocation)
                .map_err(|e| VkError::AllocationFailed(e.to_string()))?;
        }

        if image.image != vk::Image::null() {
            unsafe { self.device.destroy_image(image.image, None) };
            image.image = vk::Image::null();
        }

        Ok(())
    }

    /// Shutdown the allocator, freeing all GPU memory.
    ///
    /// Must run before the Vulkan device is destroyed. Remaining
    /// allocations are logged as leaks.
    pub fn shutdown(&mut self) {
        if let Some(allocator) = self.allocator.take() {
            drop(allocator);
        }
    }
}

impl Drop for GpuAllocator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// A GPU buffer with its allocation.
pub struct GpuBuffer {
    pub buffer: vk::Buffer,
    pub allocation: Option<Allocation>,
    pub size: u64,
    pub usage: vk::BufferUsageFlags,
}

impl GpuBuffer {
    /// Get the device address of this buffer.
    pub fn device_address(&self, device: &ash::Device) -> Result<vk::DeviceAddress> {
        if !self
            .usage
            .contains(vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS)
        {
            return Err(VkError::InvalidState(
                "Buffer was not created with SHADER_DEVICE_ADDRESS".to_string(),
            ));
        }
        let info = vk::BufferDeviceAddressInfo::default().buffer(self.buffer);
        Ok(unsafe { device.get_buffer_device_address(&info) })
    }

    /// Get the host pointer of a mapped allocation.
    pub fn mapped_ptr(&self) -> Option<*mut u8> {
        self.allocation
            .as_ref()
            .and_then(|a| a.mapped_ptr())
            .map(|p| p.as_ptr() as *mut u8)
    }

    /// Write data to the start of the buffer (must be host-visible).
    pub fn write<T: Pod>(&self, data: &[T]) -> Result<()> {
        self.write_bytes(0, bytemuck::cast_slice(data))
    }

    /// Write raw bytes at the given offset (must be host-visible).
    pub fn write_bytes(&self, offset: u64, data: &[u8]) -> Result<()> {
        let ptr = self
            .mapped_ptr()
            .ok_or_else(|| VkError::InvalidState("Buffer not mapped".to_string()))?;

        check_range(offset, data.len() as u64, self.size)?;

        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), ptr.add(offset as usize), data.len());
        }

        Ok(())
    }

    /// Write typed data at the given byte offset (must be host-visible).
    pub fn write_range<T: Pod>(&self, offset: u64, data: &[T]) -> Result<()> {
        self.write_bytes(offset, bytemuck::cast_slice(data))
    }
}

/// Hands `resource` back on success, or passes it to `release` on failure.
fn release_on_failure<R>(
    result: ash::prelude::VkResult<()>,
    resource: R,
    release: impl FnOnce(R),
) -> Result<R> {
    match result {
        Ok(()) => Ok(resource),
        Err(e) => {
            release(resource);
            Err(e.into())
        }
    }
}

fn free_quietly(allocator: Option<&mut Allocator>, allocation: Allocation, name: &str) {
    if let Some(allocator) = allocator {
        if let Err(e) = allocator.free(allocation) {
            tracing::warn!("Failed to free allocation '{name}': {e}");
        }
    }
}

/// Validate that `offset..offset + len` lies within `size`.
pub(crate) fn check_range(offset: u64, len: u64, size: u64) -> Result<()> {
    let end = offset
        .checked_add(len)
        .ok_or_else(|| VkError::InvalidArgument("Offset overflow".to_string()))?;
    if end > size {
        return Err(VkError::InvalidArgument(format!(
            "Write of {len} bytes at offset {offset} exceeds buffer size {size}"
        )));
    }
    Ok(())
}

/// A GPU image with its allocation.
pub struct GpuImage {
    pub image: vk::Image,
    pub allocation: Option<Allocation>,
    pub format: vk::Format,
    pub extent: vk::Extent3D,
    pub mip_levels: u32,
    pub array_layers: u32,
}

impl GpuImage {
    /// Get the 2D extent of the base mip level.
    pub fn extent_2d(&self) -> vk::Extent2D {
        vk::Extent2D {
            width: self.extent.width,
            height: self.extent.height,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ranges_inside_buffer_are_accepted() {
        assert!(check_range(0, 64, 64).is_ok());
        assert!(check_range(32, 32, 64).is_ok());
        assert!(check_range(64, 0, 64).is_ok());
    }

    #[test]
    fn failed_bind_releases_resource() {
        let mut released = Vec::new();
        let result = release_on_failure(
            Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY),
            7u32,
            |resource| released.push(resource),
        );
        assert!(matches!(
            result,
            Err(VkError::Vulkan(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY))
        ));
        assert_eq!(released, vec![7]);
    }

    #[test]
    fn successful_bind_keeps_resource() {
        let mut released = Vec::new();
        let result = release_on_failure(Ok(()), 7u32, |resource| released.push(resource));
        assert_eq!(result.unwrap(), 7);
        assert!(released.is_empty());
    }

    #[test]
    fn ranges_past_end_are_rejected() {
        assert!(check_range(1, 64, 64).is_err());
        assert!(check_range(u64::MAX, 2, 64).is_err());
    }
}
