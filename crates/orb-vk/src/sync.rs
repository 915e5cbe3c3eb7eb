//! Synchronization primitives.

use crate::device::Device;
use crate::error::{Result, VkError};
use ash::vk;

/// Create a semaphore.
///
/// # Safety
/// The device must be valid.
pub unsafe fn create_semaphore(device: &ash::Device) -> Result<vk::Semaphore> {
    let create_info = vk::SemaphoreCreateInfo::default();
    let semaphore = unsafe { device.create_semaphore(&create_info, None)? };
    Ok(semaphore)
}

/// Create a fence.
///
/// # Safety
/// The device must be valid.
pub unsafe fn create_fence(device: &ash::Device, signaled: bool) -> Result<vk::Fence> {
    let flags = if signaled {
        vk::FenceCreateFlags::SIGNALED
    } else {
        vk::FenceCreateFlags::empty()
    };

    let create_info = vk::FenceCreateInfo::default().flags(flags);
    let fence = unsafe { device.create_fence(&create_info, None)? };
    Ok(fence)
}

/// Wait for a fence to be signaled.
///
/// # Safety
/// The device and fence must be valid.
#[cfg_attr(
    feature = "profiling-tracy",
    tracing::instrument(level = "trace", skip_all)
)]
pub unsafe fn wait_for_fence(device: &ash::Device, fence: vk::Fence, timeout_ns: u64) -> Result<()> {
    unsafe { device.wait_for_fences(&[fence], true, timeout_ns)? };
    Ok(())
}

/// Reset a fence to unsignaled state.
///
/// # Safety
/// The fence must not be pending.
#[cfg_attr(
    feature = "profiling-tracy",
    tracing::instrument(level = "trace", skip_all)
)]
pub unsafe fn reset_fence(device: &ash::Device, fence: vk::Fence) -> Result<()> {
    unsafe { device.reset_fences(&[fence])? };
    Ok(())
}

/// Per-frame synchronization resources.
#[derive(Debug, Clone, Copy)]
pub struct FrameSync {
    /// Signaled when the acquired swapchain image is ready
    pub image_available: vk::Semaphore,
    /// Signaled when this frame's submission completes
    pub in_flight: vk::Fence,
}

impl FrameSync {
    unsafe fn new(device: &ash::Device) -> Result<Self> {
        let image_available = unsafe { create_semaphore(device)? };
        let in_flight = match unsafe { create_fence(device, true) } {
            Ok(fence) => fence,
            Err(e) => {
                unsafe { device.destroy_semaphore(image_available, None) };
                return Err(e);
            }
        };
        Ok(Self {
            image_available,
            in_flight,
        })
    }

    /// Wait for this frame's previous submission.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn wait(&self, device: &ash::Device) -> Result<()> {
        unsafe { wait_for_fence(device, self.in_flight, u64::MAX) }
    }

    /// Reset the fence for the next submission.
    ///
    /// # Safety
    /// The fence must not be pending.
    pub unsafe fn reset(&self, device: &ash::Device) -> Result<()> {
        unsafe { reset_fence(device, self.in_flight) }
    }

    unsafe fn destroy(&self, device: &ash::Device) {
        unsafe {
            device.destroy_semaphore(self.image_available, None);
            device.destroy_fence(self.in_flight, None);
        }
    }
}

/// Ring index over frames in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameCounter {
    current: usize,
    frames: usize,
}

impl FrameCounter {
    /// Counter over `frames` slots; at least one.
    pub fn new(frames: usize) -> Self {
        Self {
            current: 0,
            frames: frames.max(1),
        }
    }

    pub fn current(&self) -> usize {
        self.current
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    /// Move to the next slot and return it.
    pub fn advance(&mut self) -> usize {
        self.current = (self.current + 1) % self.frames;
        self.current
    }
}

/// Builder for [`SyncObjects`].
#[derive(Debug, Clone, Copy)]
pub struct SyncObjectsBuilder {
    frames_in_flight: usize,
    swapchain_images: usize,
}

impl Default for SyncObjectsBuilder {
    fn default() -> Self {
        Self {
            frames_in_flight: 2,
            swapchain_images: 0,
        }
    }
}

impl SyncObjectsBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of frames recorded ahead of the GPU.
    pub fn frames_in_flight(mut self, frames: usize) -> Self {
        self.frames_in_flight = frames;
        self
    }

    /// Number of swapchain images; one render-finished semaphore each.
    pub fn swapchain_images(mut self, images: usize) -> Self {
        self.swapchain_images = images;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.frames_in_flight == 0 {
            return Err(VkError::InvalidArgument(
                "frames_in_flight must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn build(&self, device: &Device) -> Result<SyncObjects> {
        self.validate()?;
        let raw = device.raw();

        let mut sync = SyncObjects {
            frames: Vec::with_capacity(self.frames_in_flight),
            render_finished: Vec::with_capacity(self.swapchain_images),
            counter: FrameCounter::new(self.frames_in_flight),
        };

        for _ in 0..self.frames_in_flight {
            match unsafe { FrameSync::new(raw) } {
                Ok(frame) => sync.frames.push(frame),
                Err(e) => {
                    unsafe { sync.destroy(raw) };
                    return Err(e);
                }
            }
        }
        if let Err(e) = unsafe { sync.resize_images(raw, self.swapchain_images) } {
            unsafe { sync.destroy(raw) };
            return Err(e);
        }

        tracing::debug!(
            "Sync objects created: {} frames in flight, {} swapchain images",
            self.frames_in_flight,
            self.swapchain_images
        );

        Ok(sync)
    }
}

/// Semaphores and fences for frames in flight.
///
/// Render-finished semaphores are indexed by swapchain image so a semaphore
/// is never signaled again while a present still waits on it.
pub struct SyncObjects {
    frames: Vec<FrameSync>,
    render_finished: Vec<vk::Semaphore>,
    counter: FrameCounter,
}

impl SyncObjects {
    /// Get the current frame's sync resources.
    pub fn current(&self) -> &FrameSync {
        &self.frames[self.counter.current()]
    }

    /// Get the current frame index.
    pub fn current_frame(&self) -> usize {
        self.counter.current()
    }

    /// Number of frames in flight.
    pub fn frames_in_flight(&self) -> usize {
        self.frames.len()
    }

    /// Render-finished semaphore for a swapchain image.
    pub fn render_finished(&self, image_index: u32) -> Result<vk::Semaphore> {
        self.render_finished
            .get(image_index as usize)
            .copied()
            .ok_or_else(|| {
                VkError::InvalidArgument(format!(
                    "image {image_index} out of range for {} render-finished semaphores",
                    self.render_finished.len()
                ))
            })
    }

    /// Advance to the next frame.
    pub fn advance(&mut self) -> usize {
        self.counter.advance()
    }

    /// Match the render-finished semaphores to a new swapchain image count.
    ///
    /// # Safety
    /// None of the removed semaphores may be pending.
    pub unsafe fn resize_images(&mut self, device: &ash::Device, images: usize) -> Result<()> {
        while self.render_finished.len() > images {
            if let Some(semaphore) = self.render_finished.pop() {
                unsafe { device.destroy_semaphore(semaphore, None) };
            }
        }
        while self.render_finished.len() < images {
            self.render_finished
                .push(unsafe { create_semaphore(device)? });
        }
        Ok(())
    }

    /// Wait for every frame in flight.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn wait_all(&self, device: &ash::Device) -> Result<()> {
        let fences: Vec<vk::Fence> = self.frames.iter().map(|f| f.in_flight).collect();
        unsafe { device.wait_for_fences(&fences, true, u64::MAX)? };
        Ok(())
    }

    /// Destroy all resources.
    ///
    /// # Safety
    /// No resource may be in use.
    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        unsafe {
            for frame in self.frames.drain(..) {
                frame.destroy(device);
            }
            for semaphore in self.render_finished.drain(..) {
                device.destroy_semaphore(semaphore, None);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_counter_wraps() {
        let mut counter = FrameCounter::new(3);
        assert_eq!(counter.current(), 0);
        assert_eq!(counter.advance(), 1);
        assert_eq!(counter.advance(), 2);
        assert_eq!(counter.advance(), 0);
        assert_eq!(counter.frames(), 3);
    }

    #[test]
    fn frame_counter_has_at_least_one_slot() {
        let mut counter = FrameCounter::new(0);
        assert_eq!(counter.frames(), 1);
        assert_eq!(counter.advance(), 0);
    }

    #[test]
    fn builder_rejects_zero_frames() {
        let builder = SyncObjectsBuilder::new().frames_in_flight(0);
        assert!(matches!(
            builder.validate(),
            Err(VkError::InvalidArgument(_))
        ));
        assert!(SyncObjectsBuilder::new().validate().is_ok());
    }

    #[test]
    fn render_finished_is_range_checked() {
        let sync = SyncObjects {
            frames: Vec::new(),
            render_finished: vec![vk::Semaphore::null(); 2],
            counter: FrameCounter::new(1),
        };
        assert!(sync.render_finished(1).is_ok());
        assert!(sync.render_finished(2).is_err());
    }
}
