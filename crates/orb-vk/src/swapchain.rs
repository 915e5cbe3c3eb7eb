//! Swapchain management.

use crate::device::Device;
use crate::error::{Result, VkError};
use crate::surface::Surface;
use ash::vk;

/// Swapchain wrapper.
pub struct Swapchain {
    swapchain: vk::SwapchainKHR,
    loader: ash::khr::swapchain::Device,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
    pub format: vk::SurfaceFormatKHR,
    pub extent: vk::Extent2D,
    pub present_mode: vk::PresentModeKHR,
    settings: SwapchainSettings,
}

/// Settings a swapchain was built with, reused on rebuild.
#[derive(Debug, Clone, Copy)]
struct SwapchainSettings {
    vsync: bool,
    preferred_format: Option<vk::SurfaceFormatKHR>,
    image_usage: vk::ImageUsageFlags,
    image_count: Option<u32>,
}

impl Swapchain {
    /// Get the raw swapchain handle.
    pub fn handle(&self) -> vk::SwapchainKHR {
        self.swapchain
    }

    /// Get the swapchain extension loader.
    pub fn loader(&self) -> &ash::khr::swapchain::Device {
        &self.loader
    }

    /// Number of swapchain images.
    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Acquire the next image.
    ///
    /// Returns the image index and whether the swapchain is suboptimal.
    ///
    /// # Safety
    /// The semaphore must be unsignaled and not pending.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub unsafe fn acquire_next_image(
        &self,
        semaphore: vk::Semaphore,
        timeout_ns: u64,
    ) -> Result<(u32, bool)> {
        let result = unsafe {
            self.loader
                .acquire_next_image(self.swapchain, timeout_ns, semaphore, vk::Fence::null())
        };

        match result {
            Ok((index, suboptimal)) => Ok((index, suboptimal)),
            // No image was acquired; the caller must rebuild
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Err(VkError::SwapchainOutOfDate),
            Err(e) => Err(VkError::from(e)),
        }
    }

    /// Present an image.
    ///
    /// Returns `true` when the swapchain should be rebuilt.
    ///
    /// # Safety
    /// The queue must support presentation and the image must be acquired.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub unsafe fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphores: &[vk::Semaphore],
    ) -> Result<bool> {
        let swapchains = [self.swapchain];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        match unsafe { self.loader.queue_present(queue, &present_info) } {
            Ok(suboptimal) => Ok(suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(true),
            Err(e) => Err(VkError::from(e)),
        }
    }

    /// Replace this swapchain with one matching the new window size.
    ///
    /// The old chain is handed to the driver as `old_swapchain` and
    /// destroyed once the new one exists.
    ///
    /// # Safety
    /// The device must be idle with respect to the old swapchain images.
    pub unsafe fn rebuild(
        &mut self,
        device: &Device,
        surface: &Surface,
        width: u32,
        height: u32,
    ) -> Result<()> {
        let mut builder = SwapchainBuilder::new(device, surface)
            .extent(width, height)
            .vsync(self.settings.vsync)
            .image_usage(self.settings.image_usage)
            .old_swapchain(self.swapchain);
        if let Some(format) = self.settings.preferred_format {
            builder = builder.preferred_format(format);
        }
        if let Some(count) = self.settings.image_count {
            builder = builder.image_count(count);
        }

        let new = builder.build()?;
        let old = std::mem::replace(self, new);
        unsafe { old.destroy(device.raw()) };

        tracing::debug!(
            "Swapchain rebuilt: {}x{}",
            self.extent.width,
            self.extent.height
        );
        Ok(())
    }

    /// Destroy the swapchain and its image views.
    ///
    /// # Safety
    /// The swapchain must not be in use.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        unsafe {
            for &view in &self.image_views {
                device.destroy_image_view(view, None);
            }
            self.loader.destroy_swapchain(self.swapchain, None);
        }
    }
}

/// Builder for [`Swapchain`].
pub struct SwapchainBuilder<'a> {
    device: &'a Device,
    surface: &'a Surface,
    width: u32,
    height: u32,
    settings: SwapchainSettings,
    old_swapchain: vk::SwapchainKHR,
}

impl<'a> SwapchainBuilder<'a> {
    /// Create a builder for the given device and surface.
    pub fn new(device: &'a Device, surface: &'a Surface) -> Self {
        Self {
            device,
            surface,
            width: 0,
            height: 0,
            settings: SwapchainSettings {
                vsync: true,
                preferred_format: None,
                image_usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
                image_count: None,
            },
            old_swapchain: vk::SwapchainKHR::null(),
        }
    }

    /// Desired extent, used when the surface leaves it up to us.
    pub fn extent(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Enable or disable vertical sync.
    pub fn vsync(mut self, vsync: bool) -> Self {
        self.settings.vsync = vsync;
        self
    }

    /// Surface format to pick when available.
    pub fn preferred_format(mut self, format: vk::SurfaceFormatKHR) -> Self {
        self.settings.preferred_format = Some(format);
        self
    }

    /// Swapchain image usage flags.
    pub fn image_usage(mut self, usage: vk::ImageUsageFlags) -> Self {
        self.settings.image_usage = usage;
        self
    }

    /// Desired number of swapchain images.
    pub fn image_count(mut self, count: u32) -> Self {
        self.settings.image_count = Some(count);
        self
    }

    /// Swapchain being replaced.
    pub fn old_swapchain(mut self, old: vk::SwapchainKHR) -> Self {
        self.old_swapchain = old;
        self
    }

    /// Create the swapchain and its image views.
    pub fn build(self) -> Result<Swapchain> {
        let device = self.device;
        let support = self.surface.support(device.physical())?;

        let format = select_surface_format(&support.formats, self.settings.preferred_format)
            .ok_or_else(|| VkError::SwapchainCreation("Surface reports no formats".to_string()))?;
        let present_mode = select_present_mode(&support.present_modes, self.settings.vsync);
        let extent = calculate_extent(&support.capabilities, self.width, self.height);
        if extent.width == 0 || extent.height == 0 {
            return Err(VkError::SwapchainCreation(
                "Cannot create a swapchain with zero extent".to_string(),
            ));
        }
        let image_count = select_image_count(&support.capabilities, self.settings.image_count);

        let families = device.queue_families();
        let family_indices = [families.graphics, families.present];
        let (sharing_mode, shared_families): (_, &[u32]) = if families.graphics == families.present
        {
            (vk::SharingMode::EXCLUSIVE, &[])
        } else {
            (vk::SharingMode::CONCURRENT, &family_indices)
        };

        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(self.surface.handle())
            .min_image_count(image_count)
            .image_format(format.format)
            .image_color_space(format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(self.settings.image_usage)
            .image_sharing_mode(sharing_mode)
            .queue_family_indices(shared_families)
            .pre_transform(support.capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(self.old_swapchain);

        let loader = ash::khr::swapchain::Device::new(device.instance(), device.raw());

        let swapchain = unsafe { loader.create_swapchain(&create_info, None) }
            .map_err(|e| VkError::SwapchainCreation(e.to_string()))?;

        let images = match unsafe { loader.get_swapchain_images(swapchain) } {
            Ok(images) => images,
            Err(e) => {
                unsafe { loader.destroy_swapchain(swapchain, None) };
                return Err(e.into());
            }
        };

        let mut image_views = Vec::with_capacity(images.len());
        for &image in &images {
            let view_info = vk::ImageViewCreateInfo::default()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(format.format)
                .subresource_range(
                    vk::ImageSubresourceRange::default()
                        .aspect_mask(vk::ImageAspectFlags::COLOR)
                        .level_count(1)
                        .layer_count(1),
                );

            match unsafe { device.raw().create_image_view(&view_info, None) } {
                Ok(view) => image_views.push(view),
                Err(e) => unsafe {
                    for view in image_views {
                        device.raw().destroy_image_view(view, None);
                    }
                    loader.destroy_swapchain(swapchain, None);
                    return Err(e.into());
                },
            }
        }

        tracing::info!(
            "Swapchain created: {}x{}, {:?}, {:?}, {} images",
            extent.width,
            extent.height,
            format.format,
            present_mode,
            images.len()
        );

        Ok(Swapchain {
            swapchain,
            loader,
            images,
            image_views,
            format,
            extent,
            present_mode,
            settings: self.settings,
        })
    }
}

/// Select the surface format.
///
/// Picks `preferred` when offered, then BGRA8 sRGB, then the first entry.
pub fn select_surface_format(
    available: &[vk::SurfaceFormatKHR],
    preferred: Option<vk::SurfaceFormatKHR>,
) -> Option<vk::SurfaceFormatKHR> {
    let matches = |want: vk::SurfaceFormatKHR| {
        available
            .iter()
            .copied()
            .find(|f| f.format == want.format && f.color_space == want.color_space)
    };

    preferred
        .and_then(matches)
        .or_else(|| {
            matches(vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_SRGB,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            })
        })
        .or_else(|| available.first().copied())
}

/// Select the present mode.
pub fn select_present_mode(available: &[vk::PresentModeKHR], vsync: bool) -> vk::PresentModeKHR {
    if vsync {
        return vk::PresentModeKHR::FIFO;
    }
    [vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::IMMEDIATE]
        .into_iter()
        .find(|mode| available.contains(mode))
        // FIFO is always supported
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

/// Calculate swapchain extent.
pub fn calculate_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    desired_width: u32,
    desired_height: u32,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        capabilities.current_extent
    } else {
        vk::Extent2D {
            width: desired_width.clamp(
                capabilities.min_image_extent.width,
                capabilities.max_image_extent.width,
            ),
            height: desired_height.clamp(
                capabilities.min_image_extent.height,
                capabilities.max_image_extent.height,
            ),
        }
    }
}

/// Select the number of swapchain images.
///
/// Defaults to one more than the minimum; `max_image_count == 0` means no limit.
pub fn select_image_count(capabilities: &vk::SurfaceCapabilitiesKHR, desired: Option<u32>) -> u32 {
    let count = desired
        .unwrap_or(capabilities.min_image_count + 1)
        .max(capabilities.min_image_count);
    if capabilities.max_image_count > 0 {
        count.min(capabilities.max_image_count)
    } else {
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space,
        }
    }

    fn caps(min: u32, max: u32) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min,
            max_image_count: max,
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 4096,
            },
            ..Default::default()
        }
    }

    #[test]
    fn surface_format_prefers_requested() {
        let unorm = format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR);
        let srgb = format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR);
        let available = [srgb, unorm];
        assert_eq!(
            select_surface_format(&available, Some(unorm)).map(|f| f.format),
            Some(vk::Format::R8G8B8A8_UNORM)
        );
    }

    #[test]
    fn surface_format_falls_back_to_srgb_then_first() {
        let unorm = format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR);
        let srgb = format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR);
        let missing = format(vk::Format::R16G16B16A16_SFLOAT, vk::ColorSpaceKHR::SRGB_NONLINEAR);

        assert_eq!(
            select_surface_format(&[unorm, srgb], Some(missing)).map(|f| f.format),
            Some(vk::Format::B8G8R8A8_SRGB)
        );
        assert_eq!(
            select_surface_format(&[unorm], None).map(|f| f.format),
            Some(vk::Format::R8G8B8A8_UNORM)
        );
        assert!(select_surface_format(&[], None).is_none());
    }

    #[test]
    fn present_mode_selection() {
        let all = [
            vk::PresentModeKHR::FIFO,
            vk::PresentModeKHR::IMMEDIATE,
            vk::PresentModeKHR::MAILBOX,
        ];
        assert_eq!(select_present_mode(&all, true), vk::PresentModeKHR::FIFO);
        assert_eq!(select_present_mode(&all, false), vk::PresentModeKHR::MAILBOX);
        assert_eq!(
            select_present_mode(&[vk::PresentModeKHR::FIFO, vk::PresentModeKHR::IMMEDIATE], false),
            vk::PresentModeKHR::IMMEDIATE
        );
        assert_eq!(
            select_present_mode(&[vk::PresentModeKHR::FIFO], false),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn extent_uses_current_unless_sentinel() {
        let mut capabilities = caps(2, 3);
        let clamped = calculate_extent(&capabilities, 10_000, 0);
        assert_eq!((clamped.width, clamped.height), (4096, 1));

        capabilities.current_extent = vk::Extent2D {
            width: 800,
            height: 600,
        };
        let current = calculate_extent(&capabilities, 1920, 1080);
        assert_eq!((current.width, current.height), (800, 600));
    }

    #[test]
    fn image_count_selection() {
        assert_eq!(select_image_count(&caps(2, 3), None), 3);
        assert_eq!(select_image_count(&caps(3, 3), None), 3);
        assert_eq!(select_image_count(&caps(2, 0), Some(8)), 8);
        assert_eq!(select_image_count(&caps(2, 4), Some(8)), 4);
        assert_eq!(select_image_count(&caps(2, 4), Some(1)), 2);
    }
}
