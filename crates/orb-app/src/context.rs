//! Application context.

use std::sync::Arc;
use std::time::Instant;

use ash::vk;
use orb_imgui::ImguiOverlay;
use orb_vk::{
    AttachmentSpec, CommandPool, CommandPoolBuilder, Device, DeviceBuilder, GpuImage,
    ImageBuilder, InstanceBuilder, RenderPass, RenderPassBuilder, Surface, Swapchain,
    SwapchainBuilder, SyncObjects, SyncObjectsBuilder, ViewBuilder,
};
use winit::window::Window;

use crate::config::AppConfig;
use crate::frame::FrameStats;

/// Depth buffer shared by every main pass framebuffer.
struct DepthTarget {
    image: GpuImage,
    view: vk::ImageView,
}

impl DepthTarget {
    fn new(device: &Device, format: vk::Format, extent: vk::Extent2D) -> anyhow::Result<Self> {
        let mut images = ImageBuilder::depth(extent, format).build(device)?;
        let mut image = images
            .pop()
            .ok_or_else(|| anyhow::anyhow!("depth image was not created"))?;
        let view = match ViewBuilder::for_image(&image).build(device.raw(), &[image.image]) {
            Ok(mut views) => views.pop(),
            Err(e) => {
                orb_vk::free_image(device, &mut image)?;
                return Err(e.into());
            }
        };
        let view = view.ok_or_else(|| anyhow::anyhow!("depth view was not created"))?;
        Ok(Self { image, view })
    }

    /// # Safety
    /// The depth buffer must not be in use.
    unsafe fn destroy(mut self, device: &Device) -> anyhow::Result<()> {
        unsafe { device.raw().destroy_image_view(self.view, None) };
        orb_vk::free_image(device, &mut self.image)?;
        Ok(())
    }
}

/// Objects created so far by [`AppContext::new`].
#[derive(Default)]
struct Partial {
    swapchain: Option<Swapchain>,
    render_pass: Option<RenderPass>,
    depth: Option<DepthTarget>,
    framebuffers: Vec<vk::Framebuffer>,
    command_pool: Option<CommandPool>,
    sync: Option<SyncObjects>,
}

/// Fully created swapchain-dependent objects.
struct Parts {
    swapchain: Swapchain,
    render_pass: RenderPass,
    depth_format: Option<vk::Format>,
    depth: Option<DepthTarget>,
    framebuffers: Vec<vk::Framebuffer>,
    command_pool: CommandPool,
    command_buffers: Vec<vk::CommandBuffer>,
    sync: SyncObjects,
    overlay: Option<ImguiOverlay>,
}

impl Partial {
    fn take_parts(
        &mut self,
        depth_format: Option<vk::Format>,
        command_buffers: Vec<vk::CommandBuffer>,
        overlay: Option<ImguiOverlay>,
    ) -> anyhow::Result<Parts> {
        match (
            self.swapchain.take(),
            self.render_pass.take(),
            self.command_pool.take(),
            self.sync.take(),
        ) {
            (Some(swapchain), Some(render_pass), Some(command_pool), Some(sync)) => Ok(Parts {
                swapchain,
                render_pass,
                depth_format,
                depth: self.depth.take(),
                framebuffers: std::mem::take(&mut self.framebuffers),
                command_pool,
                command_buffers,
                sync,
                overlay,
            }),
            (swapchain, render_pass, command_pool, sync) => {
                self.swapchain = swapchain;
                self.render_pass = render_pass;
                self.command_pool = command_pool;
                self.sync = sync;
                Err(anyhow::anyhow!("context objects were not all created"))
            }
        }
    }

    /// Destroy in reverse creation order, then the surface.
    ///
    /// # Safety
    /// None of the objects may be in use.
    unsafe fn unwind(mut self, device: &Device, surface: &Surface) {
        let raw = device.raw();
        unsafe {
            if let Some(mut sync) = self.sync.take() {
                sync.destroy(raw);
            }
            if let Some(pool) = self.command_pool.take() {
                pool.destroy(raw);
            }
            orb_vk::destroy_framebuffers(raw, &self.framebuffers);
            if let Some(depth) = self.depth.take() {
                if let Err(e) = depth.destroy(device) {
                    tracing::error!("Failed to free depth buffer: {e}");
                }
            }
            if let Some(render_pass) = self.render_pass.take() {
                render_pass.destroy(raw);
            }
            if let Some(swapchain) = self.swapchain.take() {
                swapchain.destroy(raw);
            }
            surface.destroy();
        }
    }
}

/// Application context shared across all app methods.
///
/// Owns the Vulkan objects of the window: device, swapchain, main render
/// pass with its framebuffers, command buffers and frame synchronization.
pub struct AppContext {
    // Field order matters: the device drops before the instance
    /// Logical device with queues and allocator.
    pub device: Device,
    pub instance: orb_vk::Instance,
    pub surface: Surface,
    /// Current swapchain.
    pub swapchain: Swapchain,
    /// Main render pass: swapchain color plus optional depth.
    pub render_pass: RenderPass,
    depth_format: Option<vk::Format>,
    depth: Option<DepthTarget>,
    /// One framebuffer per swapchain image.
    pub framebuffers: Vec<vk::Framebuffer>,
    /// Command pool for allocating command buffers.
    pub command_pool: CommandPool,
    pub(crate) command_buffers: Vec<vk::CommandBuffer>,
    pub(crate) sync: SyncObjects,
    pub(crate) overlay: Option<ImguiOverlay>,
    /// Total frames rendered.
    pub frame_count: u64,
    pub(crate) last_frame_time: Instant,
    pub(crate) stats: FrameStats,
    /// Set when the window size changed since the last present.
    pub(crate) resized: bool,
    config: AppConfig,
    /// The window handle.
    pub window: Arc<Window>,
}

impl AppContext {
    /// Create the Vulkan objects for a window.
    pub(crate) fn new(window: Arc<Window>, config: &AppConfig) -> anyhow::Result<Self> {
        let extensions = orb_platform::required_instance_extensions(window.as_ref())?;
        let instance = InstanceBuilder::new()
            .app_name(&config.title)
            .extensions(extensions.iter().copied())
            .validation(config.validation)
            .build()?;

        // SAFETY: the window is kept alive by the context
        let surface = unsafe { Surface::new(&instance, window.as_ref())? };

        let device = match DeviceBuilder::new(&instance).surface(&surface).build() {
            Ok(device) => device,
            Err(e) => {
                unsafe { surface.destroy() };
                return Err(e.into());
            }
        };
        tracing::info!("GPU: {}", device.capabilities().summary());

        // Everything below is torn down in reverse if a later step fails
        let mut partial = Partial::default();
        let parts = match Self::create_parts(&device, &surface, &window, config, &mut partial) {
            Ok(parts) => parts,
            Err(e) => {
                // SAFETY: nothing has been submitted yet
                unsafe { partial.unwind(&device, &surface) };
                return Err(e);
            }
        };
        let Parts {
            swapchain,
            render_pass,
            depth_format,
            depth,
            framebuffers,
            command_pool,
            command_buffers,
            sync,
            overlay,
        } = parts;

        Ok(Self {
            device,
            instance,
            surface,
            swapchain,
            render_pass,
            depth_format,
            depth,
            framebuffers,
            command_pool,
            command_buffers,
            sync,
            overlay,
            frame_count: 0,
            last_frame_time: Instant::now(),
            stats: FrameStats::default(),
            resized: false,
            config: config.clone(),
            window,
        })
    }

    /// Create the swapchain-dependent objects.
    ///
    /// Each object is recorded in `partial` as soon as it exists, so a
    /// failure leaves `partial` holding exactly what must be destroyed.
    fn create_parts(
        device: &Device,
        surface: &Surface,
        window: &Window,
        config: &AppConfig,
        partial: &mut Partial,
    ) -> anyhow::Result<Parts> {
        let (width, height) = orb_platform::framebuffer_extent(window);
        let swapchain = SwapchainBuilder::new(device, surface)
            .extent(width.max(1), height.max(1))
            .vsync(config.vsync)
            .build()?;
        let swapchain = partial.swapchain.insert(swapchain);

        tracing::info!(
            "Swapchain created: {}x{} ({} images, {:?})",
            swapchain.extent.width,
            swapchain.extent.height,
            swapchain.image_count(),
            swapchain.present_mode
        );
        let color_format = swapchain.format.format;
        let extent = swapchain.extent;
        let image_count = swapchain.image_count();
        let image_views = swapchain.image_views.clone();

        let depth_format = if config.depth {
            Some(orb_vk::find_depth_format(device)?)
        } else {
            None
        };

        // With an overlay the image is handed over in attachment layout
        let color_final_layout = if config.overlay {
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
        } else {
            vk::ImageLayout::PRESENT_SRC_KHR
        };
        let mut pass_builder = RenderPassBuilder::new()
            .attachment(AttachmentSpec::color(color_format).final_layout(color_final_layout));
        if let Some(format) = depth_format {
            pass_builder = pass_builder.depth_attachment(format);
        }
        let render_pass = partial.render_pass.insert(pass_builder.build(device)?);

        if let Some(format) = depth_format {
            partial.depth = Some(DepthTarget::new(device, format, extent)?);
        }
        let shared_views: Vec<vk::ImageView> = partial.depth.iter().map(|d| d.view).collect();
        partial.framebuffers =
            render_pass.create_framebuffers(device.raw(), &image_views, &shared_views, extent)?;

        let command_pool = CommandPoolBuilder::new(device.queue_families().graphics)
            .resettable(true)
            .build(device)?;
        let command_pool = partial.command_pool.insert(command_pool);
        let command_buffers = command_pool.allocate_command_buffers(
            device.raw(),
            vk::CommandBufferLevel::PRIMARY,
            config.frames_in_flight as u32,
        )?;

        let sync = SyncObjectsBuilder::new()
            .frames_in_flight(config.frames_in_flight)
            .swapchain_images(image_count)
            .build(device)?;
        partial.sync = Some(sync);

        let overlay = if config.overlay {
            Some(ImguiOverlay::new(
                device,
                command_pool,
                window,
                color_format,
                &image_views,
                extent,
                config.frames_in_flight,
            )?)
        } else {
            None
        };

        partial.take_parts(depth_format, command_buffers, overlay)
    }

    /// Get the current swapchain extent.
    pub fn extent(&self) -> vk::Extent2D {
        self.swapchain.extent
    }

    pub fn width(&self) -> u32 {
        self.swapchain.extent.width
    }

    pub fn height(&self) -> u32 {
        self.swapchain.extent.height
    }

    /// Get the aspect ratio (width / height).
    pub fn aspect_ratio(&self) -> f32 {
        self.swapchain.extent.width as f32 / self.swapchain.extent.height.max(1) as f32
    }

    /// Swapchain color format.
    pub fn color_format(&self) -> vk::Format {
        self.swapchain.format.format
    }

    /// Depth format of the main pass, if it has a depth attachment.
    pub fn depth_format(&self) -> Option<vk::Format> {
        self.depth_format
    }

    pub fn frames_in_flight(&self) -> usize {
        self.sync.frames_in_flight()
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Frame timing statistics.
    pub fn stats(&self) -> &FrameStats {
        &self.stats
    }

    pub fn has_overlay(&self) -> bool {
        self.overlay.is_some()
    }

    /// Rebuild everything that depends on the swapchain.
    ///
    /// Waits for the device to go idle, then recreates the swapchain, depth
    /// buffer, framebuffers, render-finished semaphores and the overlay
    /// framebuffers.
    pub fn rebuild_swapchain(&mut self, width: u32, height: u32) -> anyhow::Result<()> {
        self.device.wait_idle()?;
        let raw = self.device.raw();

        // SAFETY: the device is idle
        unsafe {
            orb_vk::destroy_framebuffers(raw, &self.framebuffers);
            self.framebuffers.clear();
            self.swapchain
                .rebuild(&self.device, &self.surface, width, height)?;
            if let Some(depth) = self.depth.take() {
                depth.destroy(&self.device)?;
            }
        }

        let extent = self.swapchain.extent;
        self.depth = self
            .depth_format
            .map(|format| DepthTarget::new(&self.device, format, extent))
            .transpose()?;
        let shared_views: Vec<vk::ImageView> = self.depth.iter().map(|d| d.view).collect();
        self.framebuffers = self.render_pass.create_framebuffers(
            raw,
            &self.swapchain.image_views,
            &shared_views,
            extent,
        )?;

        // SAFETY: the device is idle, no semaphore is pending
        unsafe {
            self.sync
                .resize_images(raw, self.swapchain.image_count())?;
        }

        if let Some(overlay) = &mut self.overlay {
            overlay.rebuild(raw, &self.swapchain.image_views, extent)?;
        }

        tracing::info!(
            "Swapchain rebuilt: {}x{} ({} images)",
            extent.width,
            extent.height,
            self.swapchain.image_count()
        );
        Ok(())
    }

    /// Cleanup all resources except the device and instance, which drop.
    ///
    /// # Safety
    /// The GPU must be idle and all resources must not be in use.
    pub(crate) unsafe fn cleanup(&mut self) {
        if let Some(mut overlay) = self.overlay.take() {
            if let Err(e) = unsafe { overlay.destroy(&self.device) } {
                tracing::error!("Failed to destroy overlay: {e}");
            }
        }

        let raw = self.device.raw();
        // SAFETY: caller guarantees the GPU is idle
        unsafe {
            self.sync.destroy(raw);
            self.command_pool.destroy(raw);
            orb_vk::destroy_framebuffers(raw, &self.framebuffers);
            self.framebuffers.clear();
            if let Some(depth) = self.depth.take() {
                if let Err(e) = depth.destroy(&self.device) {
                    tracing::error!("Failed to free depth buffer: {e}");
                }
            }
            self.render_pass.destroy(raw);
            self.swapchain.destroy(raw);
            self.surface.destroy();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn incomplete_parts_stay_with_partial() {
        let mut partial = Partial {
            framebuffers: vec![vk::Framebuffer::null()],
            ..Default::default()
        };
        assert!(partial.take_parts(None, Vec::new(), None).is_err());
        // Nothing was handed out, so unwind still sees the framebuffers
        assert_eq!(partial.framebuffers.len(), 1);
        assert!(partial.swapchain.is_none());
    }
}
