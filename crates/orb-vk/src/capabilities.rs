//! GPU capability detection.

use ash::vk;
use std::collections::HashSet;

/// GPU vendor identification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GpuVendor {
    Nvidia,
    Amd,
    Intel,
    Apple,
    Arm,
    Qualcomm,
    Other(u32),
}

impl GpuVendor {
    /// Identify vendor from PCI vendor ID.
    pub fn from_vendor_id(id: u32) -> Self {
        match id {
            0x10DE => Self::Nvidia,
            0x1002 => Self::Amd,
            0x8086 => Self::Intel,
            0x106B => Self::Apple,
            0x13B5 => Self::Arm,
            0x5143 => Self::Qualcomm,
            other => Self::Other(other),
        }
    }
}

/// Detected GPU capabilities.
#[derive(Debug, Clone)]
pub struct GpuCapabilities {
    /// GPU vendor
    pub vendor: GpuVendor,
    /// Device name
    pub device_name: String,
    /// Physical device type
    pub device_type: vk::PhysicalDeviceType,
    /// Vulkan API version
    pub api_version: u32,
    /// Driver version
    pub driver_version: u32,
    /// Device-local memory in MB
    pub device_local_memory_mb: u64,
    /// Maximum memory allocation count
    pub max_memory_allocation_count: u32,
    /// Maximum push constant block size in bytes
    pub max_push_constants_size: u32,
    /// Required alignment for uniform buffer offsets
    pub min_uniform_buffer_offset_alignment: u64,
    /// Maximum sampler anisotropy
    pub max_sampler_anisotropy: f32,
    /// Sample counts usable for color and depth framebuffers
    pub framebuffer_sample_counts: vk::SampleCountFlags,
    /// Available device extensions
    pub available_extensions: HashSet<String>,
}

impl GpuCapabilities {
    /// Query capabilities from a physical device.
    ///
    /// # Safety
    /// The instance and physical device must be valid.
    pub unsafe fn query(instance: &ash::Instance, physical_device: vk::PhysicalDevice) -> Self {
        let properties = unsafe { instance.get_physical_device_properties(physical_device) };
        let memory_properties =
            unsafe { instance.get_physical_device_memory_properties(physical_device) };

        let available_extensions = unsafe { device_extension_names(instance, physical_device) };

        let device_name = properties
            .device_name_as_c_str()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        let limits = properties.limits;

        Self {
            vendor: GpuVendor::from_vendor_id(properties.vendor_id),
            device_name,
            device_type: properties.device_type,
            api_version: properties.api_version,
            driver_version: properties.driver_version,
            device_local_memory_mb: device_local_memory_mb(&memory_properties),
            max_memory_allocation_count: limits.max_memory_allocation_count,
            max_push_constants_size: limits.max_push_constants_size,
            min_uniform_buffer_offset_alignment: limits.min_uniform_buffer_offset_alignment,
            max_sampler_anisotropy: limits.max_sampler_anisotropy,
            framebuffer_sample_counts: limits.framebuffer_color_sample_counts
                & limits.framebuffer_depth_sample_counts,
            available_extensions,
        }
    }

    /// Returns `true` if the device exposes the named extension.
    pub fn supports_extension(&self, name: &str) -> bool {
        self.available_extensions.contains(name)
    }

    /// Highest sample count usable for both color and depth attachments.
    pub fn max_usable_sample_count(&self) -> vk::SampleCountFlags {
        [
            vk::SampleCountFlags::TYPE_64,
            vk::SampleCountFlags::TYPE_32,
            vk::SampleCountFlags::TYPE_16,
            vk::SampleCountFlags::TYPE_8,
            vk::SampleCountFlags::TYPE_4,
            vk::SampleCountFlags::TYPE_2,
        ]
        .into_iter()
        .find(|&count| self.framebuffer_sample_counts.contains(count))
        .unwrap_or(vk::SampleCountFlags::TYPE_1)
    }

    /// Get a human-readable summary of capabilities.
    pub fn summary(&self) -> String {
        format!(
            "{} ({:?}, {:?}) - Vulkan {}.{}.{} - {} MB VRAM",
            self.device_name,
            self.vendor,
            self.device_type,
            vk::api_version_major(self.api_version),
            vk::api_version_minor(self.api_version),
            vk::api_version_patch(self.api_version),
            self.device_local_memory_mb,
        )
    }
}

/// Enumerate device extension names.
///
/// # Safety
/// The instance and physical device must be valid.
pub(crate) unsafe fn device_extension_names(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
) -> HashSet<String> {
    let extensions = unsafe { instance.enumerate_device_extension_properties(physical_device) }
        .unwrap_or_default();

    extensions
        .iter()
        .filter_map(|ext| ext.extension_name_as_c_str().ok())
        .map(|name| name.to_string_lossy().into_owned())
        .collect()
}

/// Sum of all device-local heaps in MB.
pub(crate) fn device_local_memory_mb(memory: &vk::PhysicalDeviceMemoryProperties) -> u64 {
    memory
        .memory_heaps
        .iter()
        .take(memory.memory_heap_count as usize)
        .filter(|heap| heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL))
        .map(|heap| heap.size / (1024 * 1024))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vendor_identification() {
        assert_eq!(GpuVendor::from_vendor_id(0x10DE), GpuVendor::Nvidia);
        assert_eq!(GpuVendor::from_vendor_id(0x1002), GpuVendor::Amd);
        assert_eq!(GpuVendor::from_vendor_id(0x8086), GpuVendor::Intel);
        assert_eq!(GpuVendor::from_vendor_id(0x1234), GpuVendor::Other(0x1234));
    }

    #[test]
    fn only_device_local_heaps_are_counted() {
        let mut memory = vk::PhysicalDeviceMemoryProperties {
            memory_heap_count: 2,
            ..Default::default()
        };
        memory.memory_heaps[0] = vk::MemoryHeap {
            size: 4096 * 1024 * 1024,
            flags: vk::MemoryHeapFlags::DEVICE_LOCAL,
        };
        memory.memory_heaps[1] = vk::MemoryHeap {
            size: 8192 * 1024 * 1024,
            flags: vk::MemoryHeapFlags::empty(),
        };
        // Heaps past memory_heap_count are ignored
        memory.memory_heaps[2] = vk::MemoryHeap {
            size: 1024 * 1024 * 1024,
            flags: vk::MemoryHeapFlags::DEVICE_LOCAL,
        };

        assert_eq!(device_local_memory_mb(&memory), 4096);
    }
}
