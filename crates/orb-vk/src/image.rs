//! Image, image view and sampler builders.

use crate::buffer::{free_buffer, StagingBufferBuilder};
use crate::command::{execute_single_time_commands, CommandPool};
use crate::device::Device;
use crate::error::{Result, VkError};
use crate::formats::{aspect_flags, texel_size, LayoutTransition};
use crate::memory::GpuImage;
use ash::vk;
use gpu_allocator::MemoryLocation;

/// Builder for one or more identical 2D images.
#[derive(Debug, Clone)]
pub struct ImageBuilder {
    extent: vk::Extent2D,
    format: vk::Format,
    usage: vk::ImageUsageFlags,
    mip_levels: u32,
    samples: vk::SampleCountFlags,
    tiling: vk::ImageTiling,
    count: usize,
    location: MemoryLocation,
    name: String,
}

impl Default for ImageBuilder {
    fn default() -> Self {
        Self {
            extent: vk::Extent2D::default(),
            format: vk::Format::UNDEFINED,
            usage: vk::ImageUsageFlags::empty(),
            mip_levels: 1,
            samples: vk::SampleCountFlags::TYPE_1,
            tiling: vk::ImageTiling::OPTIMAL,
            count: 1,
            location: MemoryLocation::GpuOnly,
            name: "image".to_string(),
        }
    }
}

impl ImageBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Depth attachment image.
    pub fn depth(extent: vk::Extent2D, format: vk::Format) -> Self {
        Self::new()
            .extent(extent)
            .format(format)
            .usage(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT)
            .name("depth")
    }

    pub fn extent(mut self, extent: vk::Extent2D) -> Self {
        self.extent = extent;
        self
    }

    pub fn format(mut self, format: vk::Format) -> Self {
        self.format = format;
        self
    }

    pub fn usage(mut self, usage: vk::ImageUsageFlags) -> Self {
        self.usage = usage;
        self
    }

    pub fn mip_levels(mut self, levels: u32) -> Self {
        self.mip_levels = levels;
        self
    }

    pub fn samples(mut self, samples: vk::SampleCountFlags) -> Self {
        self.samples = samples;
        self
    }

    pub fn tiling(mut self, tiling: vk::ImageTiling) -> Self {
        self.tiling = tiling;
        self
    }

    /// Number of images to create.
    pub fn count(mut self, count: usize) -> Self {
        self.count = count;
        self
    }

    pub fn location(mut self, location: MemoryLocation) -> Self {
        self.location = location;
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    fn validate(&self) -> Result<()> {
        if self.extent.width == 0 || self.extent.height == 0 {
            return Err(VkError::InvalidArgument(format!(
                "image '{}' has zero extent",
                self.name
            )));
        }
        if self.format == vk::Format::UNDEFINED {
            return Err(VkError::InvalidArgument(format!(
                "image '{}' has no format",
                self.name
            )));
        }
        if self.usage.is_empty() {
            return Err(VkError::InvalidArgument(format!(
                "image '{}' has no usage",
                self.name
            )));
        }
        if self.count == 0 || self.mip_levels == 0 {
            return Err(VkError::InvalidArgument(format!(
                "image '{}' needs at least one image and one mip level",
                self.name
            )));
        }
        Ok(())
    }

    fn create_info(&self) -> vk::ImageCreateInfo<'static> {
        vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(self.format)
            .extent(vk::Extent3D {
                width: self.extent.width,
                height: self.extent.height,
                depth: 1,
            })
            .mip_levels(self.mip_levels)
            .array_layers(1)
            .samples(self.samples)
            .tiling(self.tiling)
            .usage(self.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
    }

    /// Create the images.
    pub fn build(&self, device: &Device) -> Result<Vec<GpuImage>> {
        self.validate()?;
        let create_info = self.create_info();

        let mut allocator = device.allocator().lock();
        let mut images: Vec<GpuImage> = Vec::with_capacity(self.count);
        for i in 0..self.count {
            let name = if self.count == 1 {
                self.name.clone()
            } else {
                format!("{}[{i}]", self.name)
            };
            match allocator.create_image(&create_info, self.location, &name) {
                Ok(image) => images.push(image),
                Err(e) => {
                    for image in &mut images {
                        allocator.free_image(image)?;
                    }
                    return Err(e);
                }
            }
        }

        tracing::debug!(
            "Created {} image(s) '{}': {}x{} {:?}",
            self.count,
            self.name,
            self.extent.width,
            self.extent.height,
            self.format
        );

        Ok(images)
    }
}

/// Free an image through the device allocator.
pub fn free_image(device: &Device, image: &mut GpuImage) -> Result<()> {
    device.allocator().lock().free_image(image)
}

/// Builder for image views over a set of images.
#[derive(Debug, Clone, Copy)]
pub struct ViewBuilder {
    format: vk::Format,
    aspect: Option<vk::ImageAspectFlags>,
    view_type: vk::ImageViewType,
    mip_levels: u32,
}

impl Default for ViewBuilder {
    fn default() -> Self {
        Self {
            format: vk::Format::UNDEFINED,
            aspect: None,
            view_type: vk::ImageViewType::TYPE_2D,
            mip_levels: 1,
        }
    }
}

impl ViewBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Views matching an allocated image's format and mip count.
    pub fn for_image(image: &GpuImage) -> Self {
        Self::new()
            .format(image.format)
            .mip_levels(image.mip_levels)
    }

    pub fn format(mut self, format: vk::Format) -> Self {
        self.format = format;
        self
    }

    /// Override the aspect derived from the format.
    pub fn aspect(mut self, aspect: vk::ImageAspectFlags) -> Self {
        self.aspect = Some(aspect);
        self
    }

    pub fn view_type(mut self, view_type: vk::ImageViewType) -> Self {
        self.view_type = view_type;
        self
    }

    pub fn mip_levels(mut self, levels: u32) -> Self {
        self.mip_levels = levels;
        self
    }

    fn resolved_aspect(&self) -> vk::ImageAspectFlags {
        self.aspect.unwrap_or_else(|| aspect_flags(self.format))
    }

    /// Create one view per image.
    pub fn build(&self, device: &ash::Device, images: &[vk::Image]) -> Result<Vec<vk::ImageView>> {
        if self.format == vk::Format::UNDEFINED {
            return Err(VkError::InvalidArgument("image view has no format".to_string()));
        }

        let mut views = Vec::with_capacity(images.len());
        for &image in images {
            let view_info = vk::ImageViewCreateInfo::default()
                .image(image)
                .view_type(self.view_type)
                .format(self.format)
                .subresource_range(
                    vk::ImageSubresourceRange::default()
                        .aspect_mask(self.resolved_aspect())
                        .level_count(self.mip_levels)
                        .layer_count(1),
                );

            match unsafe { device.create_image_view(&view_info, None) } {
                Ok(view) => views.push(view),
                Err(e) => {
                    unsafe { destroy_views(device, &views) };
                    return Err(e.into());
                }
            }
        }
        Ok(views)
    }
}

/// Destroy image views.
///
/// # Safety
/// The views must not be in use.
pub unsafe fn destroy_views(device: &ash::Device, views: &[vk::ImageView]) {
    for &view in views {
        unsafe { device.destroy_image_view(view, None) };
    }
}

/// Builder for samplers.
#[derive(Debug, Clone, Copy)]
pub struct SamplerBuilder {
    mag_filter: vk::Filter,
    min_filter: vk::Filter,
    mipmap_mode: vk::SamplerMipmapMode,
    address_mode: vk::SamplerAddressMode,
    anisotropy: Option<f32>,
    max_lod: f32,
}

impl Default for SamplerBuilder {
    fn default() -> Self {
        Self {
            mag_filter: vk::Filter::LINEAR,
            min_filter: vk::Filter::LINEAR,
            mipmap_mode: vk::SamplerMipmapMode::LINEAR,
            address_mode: vk::SamplerAddressMode::REPEAT,
            anisotropy: None,
            max_lod: vk::LOD_CLAMP_NONE,
        }
    }
}

impl SamplerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set both magnification and minification filters.
    pub fn filter(mut self, filter: vk::Filter) -> Self {
        self.mag_filter = filter;
        self.min_filter = filter;
        self
    }

    pub fn mipmap_mode(mut self, mode: vk::SamplerMipmapMode) -> Self {
        self.mipmap_mode = mode;
        self
    }

    /// Address mode for all three coordinates.
    pub fn address_mode(mut self, mode: vk::SamplerAddressMode) -> Self {
        self.address_mode = mode;
        self
    }

    /// Enable anisotropic filtering, clamped to the device limit.
    pub fn anisotropy(mut self, max: f32) -> Self {
        self.anisotropy = Some(max);
        self
    }

    pub fn max_lod(mut self, lod: f32) -> Self {
        self.max_lod = lod;
        self
    }

    pub fn build(&self, device: &Device) -> Result<vk::Sampler> {
        let limit = device.capabilities().max_sampler_anisotropy;
        let mut create_info = vk::SamplerCreateInfo::default()
            .mag_filter(self.mag_filter)
            .min_filter(self.min_filter)
            .mipmap_mode(self.mipmap_mode)
            .address_mode_u(self.address_mode)
            .address_mode_v(self.address_mode)
            .address_mode_w(self.address_mode)
            .min_lod(0.0)
            .max_lod(self.max_lod);
        if let Some(max) = self.anisotropy {
            create_info = create_info
                .anisotropy_enable(true)
                .max_anisotropy(max.min(limit));
        }

        let sampler = unsafe { device.raw().create_sampler(&create_info, None)? };
        Ok(sampler)
    }
}

/// Record a layout transition for every mip level of an image.
///
/// # Safety
/// The command buffer must be recording.
pub unsafe fn cmd_transition_image(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    aspect: vk::ImageAspectFlags,
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
) {
    let transition = LayoutTransition::between(old_layout, new_layout);
    let barrier = vk::ImageMemoryBarrier::default()
        .src_access_mask(transition.src_access)
        .dst_access_mask(transition.dst_access)
        .old_layout(old_layout)
        .new_layout(new_layout)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(
            vk::ImageSubresourceRange::default()
                .aspect_mask(aspect)
                .level_count(vk::REMAINING_MIP_LEVELS)
                .layer_count(vk::REMAINING_ARRAY_LAYERS),
        );

    unsafe {
        device.cmd_pipeline_barrier(
            cmd,
            transition.src_stage,
            transition.dst_stage,
            vk::DependencyFlags::empty(),
            &[],
            &[],
            std::slice::from_ref(&barrier),
        );
    }
}

/// Checks that `len` bytes of tightly packed texels cover `extent`.
fn check_upload_size(format: vk::Format, extent: vk::Extent3D, len: usize) -> Result<()> {
    let texel = texel_size(format).ok_or_else(|| {
        VkError::UnsupportedFormat(format!("cannot upload pixels of {format:?}"))
    })?;
    let required = u64::from(extent.width)
        * u64::from(extent.height)
        * u64::from(extent.depth.max(1))
        * texel;
    if len as u64 != required {
        return Err(VkError::InvalidArgument(format!(
            "{}x{} {format:?} image needs {required} bytes, got {len}",
            extent.width, extent.height
        )));
    }
    Ok(())
}

/// Upload tightly packed pixels into mip 0 and leave the image shader-readable.
///
/// `pixels` must hold exactly one mip level of `image`.
pub fn upload_image(
    device: &Device,
    pool: &CommandPool,
    image: &GpuImage,
    pixels: &[u8],
) -> Result<()> {
    check_upload_size(image.format, image.extent, pixels.len())?;

    let mut staging = StagingBufferBuilder::with_data(pixels)
        .name("image_staging")
        .build(device)?;

    let raw = device.raw();
    let aspect = aspect_flags(image.format);
    let result = execute_single_time_commands(device, pool, |cmd| unsafe {
        cmd_transition_image(
            raw,
            cmd,
            image.image,
            aspect,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        );

        let region = vk::BufferImageCopy::default()
            .image_subresource(
                vk::ImageSubresourceLayers::default()
                    .aspect_mask(aspect)
                    .layer_count(1),
            )
            .image_extent(image.extent);
        raw.cmd_copy_buffer_to_image(
            cmd,
            staging.buffer,
            image.image,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            &[region],
        );

        cmd_transition_image(
            raw,
            cmd,
            image.image,
            aspect,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        );
    });

    free_buffer(device, &mut staging)?;
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extent(width: u32, height: u32) -> vk::Extent2D {
        vk::Extent2D { width, height }
    }

    #[test]
    fn depth_shortcut() {
        let builder = ImageBuilder::depth(extent(800, 600), vk::Format::D32_SFLOAT);
        assert!(builder.validate().is_ok());
        let info = builder.create_info();
        assert_eq!(info.usage, vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT);
        assert_eq!(info.extent.depth, 1);
        assert_eq!(info.initial_layout, vk::ImageLayout::UNDEFINED);
    }

    #[test]
    fn upload_size_must_cover_image() {
        let extent = vk::Extent3D {
            width: 4,
            height: 2,
            depth: 1,
        };
        assert!(check_upload_size(vk::Format::R8G8B8A8_UNORM, extent, 32).is_ok());
        assert!(matches!(
            check_upload_size(vk::Format::R8G8B8A8_UNORM, extent, 31),
            Err(VkError::InvalidArgument(_))
        ));
        assert!(matches!(
            check_upload_size(vk::Format::R8G8B8A8_UNORM, extent, 0),
            Err(VkError::InvalidArgument(_))
        ));
        assert!(matches!(
            check_upload_size(vk::Format::BC7_UNORM_BLOCK, extent, 32),
            Err(VkError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn image_validation() {
        let ok = ImageBuilder::new()
            .extent(extent(4, 4))
            .format(vk::Format::R8G8B8A8_UNORM)
            .usage(vk::ImageUsageFlags::SAMPLED);
        assert!(ok.validate().is_ok());
        assert!(ok.clone().extent(extent(0, 4)).validate().is_err());
        assert!(ok.clone().count(0).validate().is_err());
        assert!(ok.clone().usage(vk::ImageUsageFlags::empty()).validate().is_err());
        assert!(ok.format(vk::Format::UNDEFINED).validate().is_err());
    }

    #[test]
    fn view_aspect_derived_from_format() {
        let depth = ViewBuilder::new().format(vk::Format::D24_UNORM_S8_UINT);
        assert_eq!(
            depth.resolved_aspect(),
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        );

        let color = ViewBuilder::new().format(vk::Format::B8G8R8A8_SRGB);
        assert_eq!(color.resolved_aspect(), vk::ImageAspectFlags::COLOR);

        let overridden = ViewBuilder::new()
            .format(vk::Format::D24_UNORM_S8_UINT)
            .aspect(vk::ImageAspectFlags::DEPTH);
        assert_eq!(overridden.resolved_aspect(), vk::ImageAspectFlags::DEPTH);
    }
}
