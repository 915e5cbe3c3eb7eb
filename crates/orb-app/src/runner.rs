//! Application runner and event loop.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use ash::vk;
use orb_imgui::ImguiOverlay;
use orb_platform::WindowConfig;
use orb_vk::VkError;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use winit::application::ApplicationHandler;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::WindowId;

use crate::app::App;
use crate::config::AppConfig;
use crate::context::AppContext;
use crate::frame::FrameContext;

/// Run an [`App`] with the given configuration.
///
/// This function initializes logging, creates the window and Vulkan
/// context, and runs the event loop until the application exits.
pub fn run_app<A: App + 'static>(config: AppConfig) -> anyhow::Result<()> {
    // Another subscriber may already be installed, e.g. by a test harness
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .try_init();

    info!("{} starting...", config.title);

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut runner = AppRunner::<A> {
        config,
        state: None,
        failed: false,
    };

    event_loop.run_app(&mut runner)?;

    if runner.failed {
        anyhow::bail!("application exited after an error");
    }
    Ok(())
}

/// Internal application runner that implements winit's `ApplicationHandler`.
struct AppRunner<A: App> {
    config: AppConfig,
    state: Option<AppState<A>>,
    failed: bool,
}

/// Internal application state.
struct AppState<A: App> {
    ctx: AppContext,
    app: A,
    target_frame_time: Option<Duration>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameOutcome {
    Presented,
    NeedsRebuild,
}

impl<A: App + 'static> ApplicationHandler for AppRunner<A> {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.state.is_some() {
            return;
        }

        info!("Creating application state...");

        match self.create_state(event_loop) {
            Ok(state) => {
                self.state = Some(state);
                info!("Application ready!");
            }
            Err(e) => {
                error!("Failed to initialize application: {e:#}");
                self.failed = true;
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        let Some(state) = &mut self.state else {
            return;
        };

        // The overlay sees input first; the app only gets what it leaves
        let consumed = state
            .ctx
            .overlay
            .as_mut()
            .is_some_and(|overlay| overlay.handle_event(&event));
        if !consumed && state.app.on_event(&event) {
            return;
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("Close requested");
                if let Some(mut state) = self.state.take() {
                    state.cleanup();
                }
                event_loop.exit();
            }
            WindowEvent::RedrawRequested => {
                if let Err(e) = state.render_frame() {
                    error!("Render error: {e:#}");
                    if let Some(mut state) = self.state.take() {
                        state.cleanup();
                    }
                    self.failed = true;
                    event_loop.exit();
                }
            }
            WindowEvent::Resized(size) => {
                // Rebuilt after the next present
                if size.width > 0 && size.height > 0 {
                    state.ctx.resized = true;
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(state) = &self.state {
            state.ctx.window.request_redraw();
        }
    }
}

impl<A: App + 'static> AppRunner<A> {
    fn create_state(&self, event_loop: &ActiveEventLoop) -> anyhow::Result<AppState<A>> {
        let window_config = WindowConfig::new(&self.config.title)
            .size(self.config.width, self.config.height);
        let window = Arc::new(orb_platform::create_window(event_loop, &window_config)?);

        let mut ctx = AppContext::new(window, &self.config)?;

        let app = match A::init(&mut ctx) {
            Ok(app) => app,
            Err(e) => {
                // SAFETY: nothing was submitted yet
                unsafe { ctx.cleanup() };
                return Err(e);
            }
        };

        let target_frame_time = self
            .config
            .target_fps
            .filter(|&fps| fps > 0)
            .map(|fps| Duration::from_nanos(1_000_000_000 / u64::from(fps)));

        Ok(AppState {
            ctx,
            app,
            target_frame_time,
        })
    }
}

impl<A: App> AppState<A> {
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    fn render_frame(&mut self) -> anyhow::Result<()> {
        let frame_start = Instant::now();

        let dt = frame_start
            .duration_since(self.ctx.last_frame_time)
            .as_secs_f32();
        self.ctx.last_frame_time = frame_start;
        self.ctx.stats.record(dt);

        self.app.update(&self.ctx, dt);

        let extent = orb_platform::framebuffer_extent(&self.ctx.window);
        if !orb_platform::is_renderable(extent) {
            return Ok(());
        }

        // The overlay is moved out so the UI callback can borrow the context
        let mut overlay = self.ctx.overlay.take();
        let outcome = self.draw_frame(overlay.as_mut(), dt);
        self.ctx.overlay = overlay;

        if outcome? == FrameOutcome::NeedsRebuild {
            self.rebuild(extent.0, extent.1)?;
        }

        // Frame pacing
        if let Some(target) = self.target_frame_time {
            let elapsed = frame_start.elapsed();
            if elapsed < target {
                thread::sleep(target - elapsed);
            }
        }

        Ok(())
    }

    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    fn draw_frame(
        &mut self,
        mut overlay: Option<&mut ImguiOverlay>,
        dt: f32,
    ) -> anyhow::Result<FrameOutcome> {
        let Self { ctx, app, .. } = self;
        let frame = *ctx.sync.current();
        let frame_index = ctx.sync.current_frame();

        let image_index = {
            let device = ctx.device.raw();
            // SAFETY: the fence belongs to this device
            unsafe { frame.wait(device)? };

            let acquired = unsafe {
                ctx.swapchain
                    .acquire_next_image(frame.image_available, u64::MAX)
            };
            let image_index = match acquired {
                Ok((index, _suboptimal)) => index,
                Err(VkError::SwapchainOutOfDate) => return Ok(FrameOutcome::NeedsRebuild),
                Err(e) => return Err(e.into()),
            };

            // Only reset once work is guaranteed to be submitted
            unsafe { frame.reset(device)? };
            image_index
        };

        let cmd = ctx.command_buffers[frame_index];
        let framebuffer = ctx
            .framebuffers
            .get(image_index as usize)
            .copied()
            .ok_or_else(|| anyhow::anyhow!("no framebuffer for image {image_index}"))?;
        let extent = ctx.swapchain.extent;

        {
            let ctx: &AppContext = ctx;
            let device = ctx.device.raw();

            // SAFETY: the fence wait above guarantees the buffer is not pending
            unsafe {
                device.reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())?;
                orb_vk::begin_command_buffer(
                    device,
                    cmd,
                    vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
                )?;
            }

            if let Some(overlay) = overlay.as_deref_mut() {
                overlay.build_frame(&ctx.window, dt, |ui| app.ui(ctx, ui));
            }

            let mut frame_ctx = FrameContext::new(
                device,
                &ctx.render_pass,
                cmd,
                image_index,
                frame_index,
                framebuffer,
                extent,
                clear_values(ctx),
                dt,
                ctx.frame_count,
            );
            app.render(ctx, &mut frame_ctx)?;
            frame_ctx.finish();

            if let Some(overlay) = overlay.as_deref_mut() {
                // SAFETY: recording, outside the main pass
                unsafe { overlay.record(&ctx.device, cmd, frame_index, image_index, extent)? };
            }

            unsafe { orb_vk::end_command_buffer(device, cmd)? };
        }

        let render_finished = ctx.sync.render_finished(image_index)?;
        let suboptimal = unsafe {
            orb_vk::submit_command_buffers(
                ctx.device.raw(),
                ctx.device.graphics_queue(),
                &[cmd],
                &[frame.image_available],
                &[vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT],
                &[render_finished],
                frame.in_flight,
            )?;
            ctx.swapchain
                .present(ctx.device.present_queue(), image_index, &[render_finished])?
        };

        ctx.sync.advance();
        ctx.frame_count += 1;

        if suboptimal || ctx.resized {
            Ok(FrameOutcome::NeedsRebuild)
        } else {
            Ok(FrameOutcome::Presented)
        }
    }

    fn rebuild(&mut self, width: u32, height: u32) -> anyhow::Result<()> {
        self.ctx.resized = false;
        self.ctx.rebuild_swapchain(width, height)?;

        let extent = self.ctx.extent();
        self.app
            .on_resize(&mut self.ctx, extent.width, extent.height)?;

        info!("Resized to {}x{}", extent.width, extent.height);
        Ok(())
    }

    fn cleanup(&mut self) {
        let stats = self.ctx.stats;
        if stats.frames > 0 {
            info!("FPS Statistics:");
            info!("  Min: {:.1}", stats.min_fps);
            info!("  Max: {:.1}", stats.max_fps);
            info!("  Avg: {:.1}", stats.average_fps());
            info!("  Total frames: {}", self.ctx.frame_count);
        }

        info!("Starting cleanup...");
        if let Err(e) = self.ctx.device.wait_idle() {
            error!("Failed to wait idle: {e}");
        }

        // Let the app cleanup first
        self.app.cleanup(&mut self.ctx);

        // SAFETY: the device is idle
        unsafe { self.ctx.cleanup() };

        info!("Cleanup complete");
    }
}

/// Clear values for the main pass: color, then depth when present.
fn clear_values(ctx: &AppContext) -> Vec<vk::ClearValue> {
    let mut values = vec![vk::ClearValue {
        color: vk::ClearColorValue {
            float32: ctx.config().clear_color,
        },
    }];
    if ctx.depth_format().is_some() {
        values.push(vk::ClearValue {
            depth_stencil: vk::ClearDepthStencilValue {
                depth: 1.0,
                stencil: 0,
            },
        });
    }
    values
}
