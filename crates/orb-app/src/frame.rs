//! Per-frame context for rendering.

use ash::vk;
use orb_vk::RenderPass;

/// Context for the current frame being rendered.
///
/// The main render pass is begun on demand: commands recorded before
/// [`begin_main_pass`](Self::begin_main_pass) run outside it (uploads,
/// compute). If the app never begins it, the frame loop records an empty
/// pass so the image is still cleared.
pub struct FrameContext<'a> {
    /// Command buffer for recording rendering commands.
    pub command_buffer: vk::CommandBuffer,
    /// Index of the acquired swapchain image.
    pub image_index: u32,
    /// Index of the frame in flight, for per-frame resources.
    pub frame_index: usize,
    /// Main pass framebuffer of the acquired image.
    pub framebuffer: vk::Framebuffer,
    pub extent: vk::Extent2D,
    /// Delta time since last frame in seconds.
    pub dt: f32,
    /// Current frame number.
    pub frame_number: u64,
    device: &'a ash::Device,
    render_pass: &'a RenderPass,
    clear_values: Vec<vk::ClearValue>,
    state: PassState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PassState {
    NotStarted,
    Open,
    Ended,
}

impl<'a> FrameContext<'a> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        device: &'a ash::Device,
        render_pass: &'a RenderPass,
        command_buffer: vk::CommandBuffer,
        image_index: u32,
        frame_index: usize,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
        clear_values: Vec<vk::ClearValue>,
        dt: f32,
        frame_number: u64,
    ) -> Self {
        Self {
            command_buffer,
            image_index,
            frame_index,
            framebuffer,
            extent,
            dt,
            frame_number,
            device,
            render_pass,
            clear_values,
            state: PassState::NotStarted,
        }
    }

    /// The main render pass.
    pub fn render_pass(&self) -> &RenderPass {
        self.render_pass
    }

    /// Whether commands are currently recorded inside the main pass.
    pub fn in_main_pass(&self) -> bool {
        self.state == PassState::Open
    }

    /// Begin the main render pass, clearing color and depth.
    ///
    /// Does nothing if the pass was already begun this frame.
    pub fn begin_main_pass(&mut self) {
        if self.state != PassState::NotStarted {
            return;
        }
        // SAFETY: the frame loop keeps the command buffer recording
        unsafe {
            self.render_pass.begin(
                self.device,
                self.command_buffer,
                self.framebuffer,
                self.extent,
                &self.clear_values,
            );
            orb_vk::cmd_set_viewport_scissor(self.device, self.command_buffer, self.extent);
        }
        self.state = PassState::Open;
    }

    /// End the main render pass if it is open.
    pub fn end_main_pass(&mut self) {
        if self.state != PassState::Open {
            return;
        }
        // SAFETY: the pass was begun on this command buffer
        unsafe { self.render_pass.end(self.device, self.command_buffer) };
        self.state = PassState::Ended;
    }

    /// Make sure the main pass ran exactly once.
    pub(crate) fn finish(&mut self) {
        self.begin_main_pass();
        self.end_main_pass();
    }
}

/// Rolling frame timing statistics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameStats {
    /// Frames measured.
    pub frames: u64,
    /// Last frame time in milliseconds.
    pub frame_time_ms: f32,
    /// Exponentially smoothed frames per second.
    pub fps: f32,
    pub min_fps: f32,
    pub max_fps: f32,
    fps_sum: f64,
}

impl Default for FrameStats {
    fn default() -> Self {
        Self {
            frames: 0,
            frame_time_ms: 0.0,
            fps: 0.0,
            min_fps: f32::MAX,
            max_fps: 0.0,
            fps_sum: 0.0,
        }
    }
}

impl FrameStats {
    const SMOOTHING: f32 = 0.1;

    /// Record one frame's delta time in seconds; zero deltas are ignored.
    pub fn record(&mut self, dt: f32) {
        if dt <= 0.0 {
            return;
        }
        let fps = 1.0 / dt;
        self.frames += 1;
        self.frame_time_ms = dt * 1000.0;
        self.fps = if self.frames == 1 {
            fps
        } else {
            self.fps + (fps - self.fps) * Self::SMOOTHING
        };
        self.min_fps = self.min_fps.min(fps);
        self.max_fps = self.max_fps.max(fps);
        self.fps_sum += f64::from(fps);
    }

    /// Mean FPS over all recorded frames.
    pub fn average_fps(&self) -> f32 {
        if self.frames == 0 {
            0.0
        } else {
            (self.fps_sum / self.frames as f64) as f32
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_stats() {
        let stats = FrameStats::default();
        assert_eq!(stats.frames, 0);
        assert_eq!(stats.average_fps(), 0.0);
    }

    #[test]
    fn records_min_max_and_average() {
        let mut stats = FrameStats::default();
        stats.record(0.01);
        stats.record(0.02);
        stats.record(0.0);

        assert_eq!(stats.frames, 2);
        assert!((stats.max_fps - 100.0).abs() < 1e-3);
        assert!((stats.min_fps - 50.0).abs() < 1e-3);
        assert!((stats.average_fps() - 75.0).abs() < 1e-3);
        assert!((stats.frame_time_ms - 20.0).abs() < 1e-3);
    }

    #[test]
    fn fps_is_smoothed() {
        let mut stats = FrameStats::default();
        stats.record(0.01);
        assert!((stats.fps - 100.0).abs() < 1e-3);
        stats.record(0.02);
        assert!((stats.fps - 95.0).abs() < 1e-3);
    }
}
