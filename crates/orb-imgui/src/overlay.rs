//! ImGui context, input and render pass bundled for the frame loop.

use crate::error::Result;
use crate::pass::ImguiPass;
use crate::platform::ImguiPlatform;
use ash::vk;
use orb_vk::{CommandPool, Device};
use winit::event::WindowEvent;
use winit::window::Window;

/// Everything needed to draw an ImGui overlay on a swapchain.
pub struct ImguiOverlay {
    context: imgui::Context,
    platform: ImguiPlatform,
    pass: ImguiPass,
    frame_open: bool,
}

impl ImguiOverlay {
    pub fn new(
        device: &Device,
        pool: &CommandPool,
        window: &Window,
        color_format: vk::Format,
        views: &[vk::ImageView],
        extent: vk::Extent2D,
        frames_in_flight: usize,
    ) -> Result<Self> {
        let mut context = imgui::Context::create();
        context.set_ini_filename(None);

        let platform = ImguiPlatform::new(window);
        let scale = platform.scale_factor() as f32;
        context.fonts().add_font(&[imgui::FontSource::DefaultFontData {
            config: Some(imgui::FontConfig {
                size_pixels: 13.0 * scale,
                ..imgui::FontConfig::default()
            }),
        }]);
        context.io_mut().font_global_scale = 1.0 / scale;

        let pass = ImguiPass::new(
            device,
            pool,
            &mut context,
            color_format,
            views,
            extent,
            frames_in_flight,
        )?;

        Ok(Self {
            context,
            platform,
            pass,
            frame_open: false,
        })
    }

    pub fn context_mut(&mut self) -> &mut imgui::Context {
        &mut self.context
    }

    /// Forward a window event; returns `true` if ImGui consumes it.
    pub fn handle_event(&mut self, event: &WindowEvent) -> bool {
        self.platform.handle_event(self.context.io_mut(), event)
    }

    /// Start a UI frame and let `build` add widgets to it.
    pub fn build_frame(&mut self, window: &Window, dt: f32, build: impl FnOnce(&mut imgui::Ui)) {
        if self.frame_open {
            // Previous frame was never recorded; ImGui requires it to end
            self.context.render();
        }
        self.platform
            .prepare_frame(self.context.io_mut(), window, dt);
        let ui = self.context.new_frame();
        build(ui);
        self.frame_open = true;
    }

    /// Record the overlay pass for the current frame.
    ///
    /// Without a built frame only the layout transition to present is recorded.
    ///
    /// # Safety
    /// The command buffer must be recording and outside a render pass.
    pub unsafe fn record(
        &mut self,
        device: &Device,
        cmd: vk::CommandBuffer,
        frame: usize,
        image_index: u32,
        extent: vk::Extent2D,
    ) -> Result<()> {
        if !self.frame_open {
            return unsafe { self.pass.record_empty(device, cmd, image_index, extent) };
        }
        self.frame_open = false;
        let draw_data = self.context.render();
        unsafe {
            self.pass
                .record(device, cmd, frame, image_index, extent, draw_data)
        }
    }

    /// Recreate framebuffers after a swapchain rebuild.
    pub fn rebuild(
        &mut self,
        device: &ash::Device,
        views: &[vk::ImageView],
        extent: vk::Extent2D,
    ) -> Result<()> {
        self.pass.rebuild(device, views, extent)
    }

    /// # Safety
    /// The device must be idle.
    pub unsafe fn destroy(&mut self, device: &Device) -> Result<()> {
        unsafe { self.pass.destroy(device) }
    }
}
