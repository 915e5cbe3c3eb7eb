//! Physical device selection and logical device creation.

use crate::capabilities::{device_extension_names, device_local_memory_mb, GpuCapabilities};
use crate::error::{Result, VkError};
use crate::instance::Instance;
use crate::memory::GpuAllocator;
use crate::surface::Surface;
use ash::vk;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::ffi::{c_char, CStr, CString};
use std::sync::Arc;

/// Queue family indices used by a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: u32,
    pub present: u32,
    pub compute: u32,
    pub transfer: u32,
}

impl QueueFamilyIndices {
    /// Distinct family indices, sorted.
    pub fn unique(&self) -> Vec<u32> {
        let set: BTreeSet<u32> = [self.graphics, self.present, self.compute, self.transfer]
            .into_iter()
            .collect();
        set.into_iter().collect()
    }
}

/// Pick queue families from the properties reported by a physical device.
///
/// `can_present` is only consulted when `need_present` is set.
pub fn find_queue_families(
    families: &[vk::QueueFamilyProperties],
    need_present: bool,
    can_present: impl Fn(u32) -> bool,
) -> Option<QueueFamilyIndices> {
    let mut graphics_family = None;
    let mut compute_family = None;
    let mut transfer_family = None;

    for (i, family) in families.iter().enumerate() {
        let i = i as u32;
        if family.queue_count == 0 {
            continue;
        }
        let flags = family.queue_flags;

        // Dedicated compute queue (no graphics)
        if flags.contains(vk::QueueFlags::COMPUTE)
            && !flags.contains(vk::QueueFlags::GRAPHICS)
            && compute_family.is_none()
        {
            compute_family = Some(i);
        }

        // Dedicated transfer queue (no graphics or compute)
        if flags.contains(vk::QueueFlags::TRANSFER)
            && !flags.contains(vk::QueueFlags::GRAPHICS)
            && !flags.contains(vk::QueueFlags::COMPUTE)
            && transfer_family.is_none()
        {
            transfer_family = Some(i);
        }

        if flags.contains(vk::QueueFlags::GRAPHICS) && graphics_family.is_none() {
            graphics_family = Some(i);
        }
    }

    let graphics = graphics_family?;

    let present = if !need_present || can_present(graphics) {
        graphics
    } else {
        (0..families.len() as u32)
            .filter(|&i| families[i as usize].queue_count > 0)
            .find(|&i| can_present(i))?
    };

    let compute = compute_family.unwrap_or(graphics);
    let transfer = transfer_family.unwrap_or(compute);

    Some(QueueFamilyIndices {
        graphics,
        present,
        compute,
        transfer,
    })
}

/// Which class of GPU to favour when several qualify.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DevicePreference {
    /// Discrete GPUs first.
    #[default]
    HighPerformance,
    /// Integrated GPUs first.
    LowPower,
}

/// Facts about one physical device used for selection.
#[derive(Debug, Clone)]
pub struct DeviceCandidate {
    pub device_type: vk::PhysicalDeviceType,
    pub api_version: u32,
    pub device_local_memory_mb: u64,
    pub missing_extensions: Vec<String>,
    pub queue_families: Option<QueueFamilyIndices>,
    pub surface_adequate: bool,
}

/// Score a candidate; `None` means it cannot be used.
pub fn score_candidate(
    candidate: &DeviceCandidate,
    min_api_version: u32,
    preference: DevicePreference,
) -> Option<u32> {
    if version_less(candidate.api_version, min_api_version)
        || !candidate.missing_extensions.is_empty()
        || candidate.queue_families.is_none()
        || !candidate.surface_adequate
    {
        return None;
    }

    let type_score = match (preference, candidate.device_type) {
        (DevicePreference::HighPerformance, vk::PhysicalDeviceType::DISCRETE_GPU)
        | (DevicePreference::LowPower, vk::PhysicalDeviceType::INTEGRATED_GPU) => 1000,
        (DevicePreference::HighPerformance, vk::PhysicalDeviceType::INTEGRATED_GPU)
        | (DevicePreference::LowPower, vk::PhysicalDeviceType::DISCRETE_GPU) => 100,
        (_, vk::PhysicalDeviceType::VIRTUAL_GPU) => 50,
        (_, vk::PhysicalDeviceType::CPU) => 10,
        _ => 1,
    };

    // +1 per GB of VRAM
    let memory_score = u32::try_from(candidate.device_local_memory_mb / 1024).unwrap_or(u32::MAX);

    Some(type_score + memory_score.min(999))
}

fn version_less(version: u32, min: u32) -> bool {
    let key = |v: u32| {
        (
            vk::api_version_major(v),
            vk::api_version_minor(v),
            vk::api_version_patch(v),
        )
    };
    key(version) < key(min)
}

/// The logical device, its queues and the memory allocator.
pub struct Device {
    instance: ash::Instance,
    physical_device: vk::PhysicalDevice,
    device: Arc<ash::Device>,
    capabilities: GpuCapabilities,
    allocator: Mutex<GpuAllocator>,
    queue_families: QueueFamilyIndices,
    graphics_queue: vk::Queue,
    present_queue: vk::Queue,
    compute_queue: vk::Queue,
    transfer_queue: vk::Queue,
    enabled_extensions: Vec<CString>,
}

impl Device {
    /// Get the Vulkan device function table.
    pub fn raw(&self) -> &ash::Device {
        &self.device
    }

    /// Get a shared handle to the device function table.
    pub fn shared(&self) -> Arc<ash::Device> {
        Arc::clone(&self.device)
    }

    /// Get the instance function table this device was created from.
    pub fn instance(&self) -> &ash::Instance {
        &self.instance
    }

    /// Get the physical device handle.
    pub fn physical(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    /// Get GPU capabilities.
    pub fn capabilities(&self) -> &GpuCapabilities {
        &self.capabilities
    }

    /// Get access to the GPU allocator.
    pub fn allocator(&self) -> &Mutex<GpuAllocator> {
        &self.allocator
    }

    /// Get the queue family indices.
    pub fn queue_families(&self) -> QueueFamilyIndices {
        self.queue_families
    }

    /// Get the graphics queue.
    pub fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    /// Get the present queue.
    pub fn present_queue(&self) -> vk::Queue {
        self.present_queue
    }

    /// Get the compute queue.
    pub fn compute_queue(&self) -> vk::Queue {
        self.compute_queue
    }

    /// Get the transfer queue.
    pub fn transfer_queue(&self) -> vk::Queue {
        self.transfer_queue
    }

    /// Returns `true` if the extension was enabled at creation.
    pub fn is_extension_enabled(&self, name: &CStr) -> bool {
        self.enabled_extensions.iter().any(|ext| ext.as_c_str() == name)
    }

    /// Query format properties on the physical device.
    pub fn format_properties(&self, format: vk::Format) -> vk::FormatProperties {
        unsafe {
            self.instance
                .get_physical_device_format_properties(self.physical_device, format)
        }
    }

    /// Wait for device to be idle.
    pub fn wait_idle(&self) -> Result<()> {
        unsafe {
            self.device.device_wait_idle()?;
        }
        Ok(())
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();

            // Allocator memory must be released before the device goes away
            self.allocator.lock().shutdown();

            self.device.destroy_device(None);
        }
    }
}

/// Builder for [`Device`].
pub struct DeviceBuilder<'a> {
    instance: &'a Instance,
    surface: Option<&'a Surface>,
    extensions: Vec<CString>,
    features: vk::PhysicalDeviceFeatures,
    synchronization2: bool,
    dynamic_rendering: bool,
    buffer_device_address: bool,
    min_api_version: u32,
    preference: DevicePreference,
}

impl<'a> DeviceBuilder<'a> {
    /// Create a builder for devices of the given instance.
    pub fn new(instance: &'a Instance) -> Self {
        Self {
            instance,
            surface: None,
            extensions: Vec::new(),
            features: vk::PhysicalDeviceFeatures::default(),
            synchronization2: false,
            dynamic_rendering: false,
            buffer_device_address: false,
            min_api_version: vk::API_VERSION_1_1,
            preference: DevicePreference::default(),
        }
    }

    /// Require presentation to this surface (adds `VK_KHR_swapchain`).
    pub fn surface(mut self, surface: &'a Surface) -> Self {
        self.surface = Some(surface);
        self
    }

    /// Require a device extension.
    pub fn extension(mut self, name: &CStr) -> Self {
        if !self.extensions.iter().any(|ext| ext.as_c_str() == name) {
            self.extensions.push(name.to_owned());
        }
        self
    }

    /// Enable core device features.
    pub fn features(mut self, features: vk::PhysicalDeviceFeatures) -> Self {
        self.features = features;
        self
    }

    /// Enable `synchronization2` (Vulkan 1.3).
    pub fn synchronization2(mut self, enable: bool) -> Self {
        self.synchronization2 = enable;
        self
    }

    /// Enable dynamic rendering (Vulkan 1.3).
    pub fn dynamic_rendering(mut self, enable: bool) -> Self {
        self.dynamic_rendering = enable;
        self
    }

    /// Enable buffer device addresses (Vulkan 1.2).
    pub fn buffer_device_address(mut self, enable: bool) -> Self {
        self.buffer_device_address = enable;
        self
    }

    /// Minimum API version a physical device must report.
    pub fn min_api_version(mut self, version: u32) -> Self {
        self.min_api_version = version;
        self
    }

    /// Set the GPU class preference.
    pub fn prefer(mut self, preference: DevicePreference) -> Self {
        self.preference = preference;
        self
    }

    fn effective_min_api_version(&self) -> u32 {
        let mut min = self.min_api_version;
        if self.buffer_device_address && version_less(min, vk::API_VERSION_1_2) {
            min = vk::API_VERSION_1_2;
        }
        if (self.synchronization2 || self.dynamic_rendering)
            && version_less(min, vk::API_VERSION_1_3)
        {
            min = vk::API_VERSION_1_3;
        }
        min
    }

    /// Select a physical device and create the logical device.
    pub fn build(mut self) -> Result<Device> {
        if self.surface.is_some() {
            self = self.extension(ash::khr::swapchain::NAME);
        }
        #[cfg(target_os = "macos")]
        {
            self = self.extension(ash::khr::portability_subset::NAME);
        }

        let instance = self.instance.raw();
        let min_api_version = self.effective_min_api_version();

        let physical_devices = unsafe { instance.enumerate_physical_devices()? };
        if physical_devices.is_empty() {
            return Err(VkError::NoSuitableDevice);
        }

        let mut best: Option<(u32, vk::PhysicalDevice, QueueFamilyIndices)> = None;
        for physical_device in physical_devices {
            let candidate = unsafe { self.describe(physical_device) };
            let name = unsafe { instance.get_physical_device_properties(physical_device) }
                .device_name_as_c_str()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();

            match score_candidate(&candidate, min_api_version, self.preference) {
                Some(score) => {
                    tracing::debug!("GPU candidate {name}: score {score}");
                    if best.map_or(true, |(best_score, _, _)| score > best_score) {
                        if let Some(families) = candidate.queue_families {
                            best = Some((score, physical_device, families));
                        }
                    }
                }
                None => {
                    tracing::debug!(
                        "GPU candidate {name} rejected (missing extensions: {:?})",
                        candidate.missing_extensions
                    );
                }
            }
        }

        let (_, physical_device, queue_families) = best.ok_or(VkError::NoSuitableDevice)?;

        let capabilities = unsafe { GpuCapabilities::query(instance, physical_device) };
        tracing::info!("Selected GPU: {}", capabilities.summary());

        let device = unsafe { self.create_logical_device(physical_device, &queue_families)? };
        let device = Arc::new(device);

        let graphics_queue = unsafe { device.get_device_queue(queue_families.graphics, 0) };
        let present_queue = unsafe { device.get_device_queue(queue_families.present, 0) };
        let compute_queue = unsafe { device.get_device_queue(queue_families.compute, 0) };
        let transfer_queue = unsafe { device.get_device_queue(queue_families.transfer, 0) };

        let allocator = match unsafe {
            GpuAllocator::new(
                instance,
                Arc::clone(&device),
                physical_device,
                self.buffer_device_address,
            )
        } {
            Ok(allocator) => allocator,
            Err(e) => {
                unsafe { device.destroy_device(None) };
                return Err(e);
            }
        };

        Ok(Device {
            instance: instance.clone(),
            physical_device,
            device,
            capabilities,
            allocator: Mutex::new(allocator),
            queue_families,
            graphics_queue,
            present_queue,
            compute_queue,
            transfer_queue,
            enabled_extensions: self.extensions,
        })
    }

    /// Gather the facts used for scoring.
    ///
    /// # Safety
    /// The physical device must belong to the builder's instance.
    unsafe fn describe(&self, physical_device: vk::PhysicalDevice) -> DeviceCandidate {
        let instance = self.instance.raw();
        let properties = unsafe { instance.get_physical_device_properties(physical_device) };
        let memory = unsafe { instance.get_physical_device_memory_properties(physical_device) };
        let families =
            unsafe { instance.get_physical_device_queue_family_properties(physical_device) };
        let available = unsafe { device_extension_names(instance, physical_device) };

        let missing_extensions = self
            .extensions
            .iter()
            .map(|ext| ext.to_string_lossy().into_owned())
            .filter(|ext| !available.contains(ext))
            .collect();

        let queue_families = find_queue_families(&families, self.surface.is_some(), |family| {
            self.surface
                .is_some_and(|surface| surface.supports_present(physical_device, family))
        });

        let surface_adequate = match self.surface {
            Some(surface) => surface
                .support(physical_device)
                .is_ok_and(|support| support.is_adequate()),
            None => true,
        };

        DeviceCandidate {
            device_type: properties.device_type,
            api_version: properties.api_version,
            device_local_memory_mb: device_local_memory_mb(&memory),
            missing_extensions,
            queue_families,
            surface_adequate,
        }
    }

    /// Create the logical device.
    ///
    /// # Safety
    /// The physical device must belong to the builder's instance.
    unsafe fn create_logical_device(
        &self,
        physical_device: vk::PhysicalDevice,
        queue_families: &QueueFamilyIndices,
    ) -> Result<ash::Device> {
        let queue_priority = 1.0_f32;
        let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = queue_families
            .unique()
            .into_iter()
            .map(|family| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(family)
                    .queue_priorities(std::slice::from_ref(&queue_priority))
            })
            .collect();

        let extension_names: Vec<*const c_char> =
            self.extensions.iter().map(|ext| ext.as_ptr()).collect();

        let mut vulkan_1_3_features = vk::PhysicalDeviceVulkan13Features::default()
            .synchronization2(self.synchronization2)
            .dynamic_rendering(self.dynamic_rendering);
        let mut vulkan_1_2_features = vk::PhysicalDeviceVulkan12Features::default()
            .buffer_device_address(self.buffer_device_address);

        // Only chain the version structs that carry an enabled feature
        let mut features2 = vk::PhysicalDeviceFeatures2::default().features(self.features);
        if self.synchronization2 || self.dynamic_rendering {
            features2 = features2.push_next(&mut vulkan_1_3_features);
        }
        if self.buffer_device_address {
            features2 = features2.push_next(&mut vulkan_1_2_features);
        }

        let device_create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extension_names)
            .push_next(&mut features2);

        let device = unsafe {
            self.instance
                .raw()
                .create_device(physical_device, &device_create_info, None)?
        };

        tracing::debug!(
            "Logical device created with queue families {:?}",
            queue_families.unique()
        );

        Ok(device)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    fn candidate(device_type: vk::PhysicalDeviceType, vram_mb: u64) -> DeviceCandidate {
        DeviceCandidate {
            device_type,
            api_version: vk::API_VERSION_1_3,
            device_local_memory_mb: vram_mb,
            missing_extensions: Vec::new(),
            queue_families: Some(QueueFamilyIndices {
                graphics: 0,
                present: 0,
                compute: 0,
                transfer: 0,
            }),
            surface_adequate: true,
        }
    }

    #[test]
    fn single_universal_family() {
        let families = [family(
            vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER,
        )];
        let indices = find_queue_families(&families, true, |_| true).unwrap();
        assert_eq!(indices.unique(), vec![0]);
    }

    #[test]
    fn dedicated_compute_and_transfer_families() {
        let families = [
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::TRANSFER),
        ];
        let indices = find_queue_families(&families, false, |_| false).unwrap();
        assert_eq!(indices.graphics, 0);
        assert_eq!(indices.present, 0);
        assert_eq!(indices.compute, 1);
        assert_eq!(indices.transfer, 2);
    }

    #[test]
    fn transfer_falls_back_to_compute() {
        let families = [
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER),
        ];
        let indices = find_queue_families(&families, false, |_| false).unwrap();
        assert_eq!(indices.transfer, 1);
    }

    #[test]
    fn separate_present_family() {
        let families = [family(vk::QueueFlags::GRAPHICS), family(vk::QueueFlags::TRANSFER)];
        let indices = find_queue_families(&families, true, |i| i == 1).unwrap();
        assert_eq!(indices.graphics, 0);
        assert_eq!(indices.present, 1);
    }

    #[test]
    fn present_required_but_unavailable() {
        let families = [family(vk::QueueFlags::GRAPHICS)];
        assert!(find_queue_families(&families, true, |_| false).is_none());
    }

    #[test]
    fn no_graphics_family() {
        let families = [family(vk::QueueFlags::COMPUTE)];
        assert!(find_queue_families(&families, false, |_| true).is_none());
    }

    #[test]
    fn empty_families_are_skipped() {
        let mut empty = family(vk::QueueFlags::GRAPHICS);
        empty.queue_count = 0;
        let families = [empty, family(vk::QueueFlags::GRAPHICS)];
        let indices = find_queue_families(&families, false, |_| false).unwrap();
        assert_eq!(indices.graphics, 1);
    }

    #[test]
    fn discrete_beats_integrated() {
        let discrete = candidate(vk::PhysicalDeviceType::DISCRETE_GPU, 4096);
        let integrated = candidate(vk::PhysicalDeviceType::INTEGRATED_GPU, 16384);
        let pref = DevicePreference::HighPerformance;
        assert!(
            score_candidate(&discrete, vk::API_VERSION_1_1, pref)
                > score_candidate(&integrated, vk::API_VERSION_1_1, pref)
        );
    }

    #[test]
    fn low_power_prefers_integrated() {
        let discrete = candidate(vk::PhysicalDeviceType::DISCRETE_GPU, 4096);
        let integrated = candidate(vk::PhysicalDeviceType::INTEGRATED_GPU, 2048);
        let pref = DevicePreference::LowPower;
        assert!(
            score_candidate(&integrated, vk::API_VERSION_1_1, pref)
                > score_candidate(&discrete, vk::API_VERSION_1_1, pref)
        );
    }

    #[test]
    fn vram_breaks_ties() {
        let small = candidate(vk::PhysicalDeviceType::DISCRETE_GPU, 4096);
        let large = candidate(vk::PhysicalDeviceType::DISCRETE_GPU, 8192);
        let pref = DevicePreference::HighPerformance;
        assert_eq!(score_candidate(&small, vk::API_VERSION_1_1, pref), Some(1004));
        assert_eq!(score_candidate(&large, vk::API_VERSION_1_1, pref), Some(1008));
    }

    #[test]
    fn rejects_unusable_candidates() {
        let pref = DevicePreference::HighPerformance;

        let mut old = candidate(vk::PhysicalDeviceType::DISCRETE_GPU, 4096);
        old.api_version = vk::API_VERSION_1_2;
        assert!(score_candidate(&old, vk::API_VERSION_1_3, pref).is_none());

        let mut missing = candidate(vk::PhysicalDeviceType::DISCRETE_GPU, 4096);
        missing.missing_extensions = vec!["VK_KHR_swapchain".to_string()];
        assert!(score_candidate(&missing, vk::API_VERSION_1_1, pref).is_none());

        let mut no_queues = candidate(vk::PhysicalDeviceType::DISCRETE_GPU, 4096);
        no_queues.queue_families = None;
        assert!(score_candidate(&no_queues, vk::API_VERSION_1_1, pref).is_none());

        let mut no_surface = candidate(vk::PhysicalDeviceType::DISCRETE_GPU, 4096);
        no_surface.surface_adequate = false;
        assert!(score_candidate(&no_surface, vk::API_VERSION_1_1, pref).is_none());
    }

    #[test]
    fn patch_versions_compare_correctly() {
        assert!(version_less(
            vk::make_api_version(0, 1, 2, 198),
            vk::API_VERSION_1_3
        ));
        assert!(!version_less(
            vk::make_api_version(0, 1, 3, 0),
            vk::API_VERSION_1_3
        ));
    }
}
