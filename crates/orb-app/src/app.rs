//! `App` trait definition.

use crate::context::AppContext;
use crate::frame::FrameContext;
use orb_imgui::imgui;
use winit::event::WindowEvent;

/// Trait for orb applications.
///
/// The framework creates the window, the Vulkan device and swapchain, runs
/// the frame loop and rebuilds everything size-dependent on resize.
pub trait App: Sized {
    /// Initialize the application.
    ///
    /// Called once after the window, device and swapchain exist.
    fn init(ctx: &mut AppContext) -> anyhow::Result<Self>;

    /// Update application state.
    ///
    /// Called every frame before rendering with the delta time in seconds.
    #[allow(unused_variables)]
    fn update(&mut self, ctx: &AppContext, dt: f32) {}

    /// Record a frame.
    ///
    /// The framework handles:
    /// - Acquiring swapchain images
    /// - Submitting command buffers
    /// - Presenting to the screen
    ///
    /// Draw calls go between [`FrameContext::begin_main_pass`] and
    /// [`FrameContext::end_main_pass`]; the pass is closed for you if left open.
    fn render(&mut self, ctx: &AppContext, frame: &mut FrameContext<'_>) -> anyhow::Result<()>;

    /// Build the ImGui overlay for this frame.
    ///
    /// Only called when the overlay is enabled.
    #[allow(unused_variables)]
    fn ui(&mut self, ctx: &AppContext, ui: &mut imgui::Ui) {}

    /// Handle window resize.
    ///
    /// Called after the swapchain, depth buffer and framebuffers were rebuilt.
    #[allow(unused_variables)]
    fn on_resize(&mut self, ctx: &mut AppContext, width: u32, height: u32) -> anyhow::Result<()> {
        Ok(())
    }

    /// Handle window events.
    ///
    /// Return `true` if the event was handled and should not be processed
    /// further. Events the overlay consumes never reach the app.
    #[allow(unused_variables)]
    fn on_event(&mut self, event: &WindowEvent) -> bool {
        false
    }

    /// Cleanup resources before shutdown.
    ///
    /// The GPU is idle when this is called.
    #[allow(unused_variables)]
    fn cleanup(&mut self, ctx: &mut AppContext) {}
}
