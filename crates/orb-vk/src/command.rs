//! Command pools and command buffer recording.

use crate::device::Device;
use crate::error::{Result, VkError};
use ash::vk;

/// Builder for [`CommandPool`].
#[derive(Debug, Clone, Copy)]
pub struct CommandPoolBuilder {
    queue_family: u32,
    resettable: bool,
    transient: bool,
}

impl CommandPoolBuilder {
    /// Pool for the given queue family; buffers are individually resettable.
    pub fn new(queue_family: u32) -> Self {
        Self {
            queue_family,
            resettable: true,
            transient: false,
        }
    }

    /// Allow command buffers to be reset individually.
    pub fn resettable(mut self, enable: bool) -> Self {
        self.resettable = enable;
        self
    }

    /// Hint that buffers are short-lived.
    pub fn transient(mut self, enable: bool) -> Self {
        self.transient = enable;
        self
    }

    fn flags(&self) -> vk::CommandPoolCreateFlags {
        let mut flags = vk::CommandPoolCreateFlags::empty();
        if self.resettable {
            flags |= vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER;
        }
        if self.transient {
            flags |= vk::CommandPoolCreateFlags::TRANSIENT;
        }
        flags
    }

    /// Create the pool.
    pub fn build(&self, device: &Device) -> Result<CommandPool> {
        let create_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(self.queue_family)
            .flags(self.flags());

        let pool = unsafe { device.raw().create_command_pool(&create_info, None)? };

        Ok(CommandPool {
            pool,
            queue_family: self.queue_family,
        })
    }
}

/// Command pool for allocating command buffers.
pub struct CommandPool {
    pool: vk::CommandPool,
    queue_family: u32,
}

impl CommandPool {
    /// Get the raw pool handle.
    pub fn handle(&self) -> vk::CommandPool {
        self.pool
    }

    /// Get the queue family index.
    pub fn queue_family(&self) -> u32 {
        self.queue_family
    }

    /// Allocate a single command buffer.
    pub fn allocate_command_buffer(
        &self,
        device: &ash::Device,
        level: vk::CommandBufferLevel,
    ) -> Result<vk::CommandBuffer> {
        self.allocate_command_buffers(device, level, 1)?
            .pop()
            .ok_or_else(|| VkError::InvalidState("Driver returned no command buffer".to_string()))
    }

    /// Allocate multiple command buffers.
    pub fn allocate_command_buffers(
        &self,
        device: &ash::Device,
        level: vk::CommandBufferLevel,
        count: u32,
    ) -> Result<Vec<vk::CommandBuffer>> {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.pool)
            .level(level)
            .command_buffer_count(count);

        let buffers = unsafe { device.allocate_command_buffers(&alloc_info)? };
        Ok(buffers)
    }

    /// Reset the command pool.
    ///
    /// # Safety
    /// No command buffer from this pool may be pending.
    pub unsafe fn reset(
        &self,
        device: &ash::Device,
        flags: vk::CommandPoolResetFlags,
    ) -> Result<()> {
        unsafe { device.reset_command_pool(self.pool, flags)? };
        Ok(())
    }

    /// Destroy the command pool.
    ///
    /// # Safety
    /// The pool must not be in use.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        unsafe { device.destroy_command_pool(self.pool, None) };
    }
}

/// Begin recording a command buffer.
///
/// # Safety
/// The command buffer must not be pending.
pub unsafe fn begin_command_buffer(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    flags: vk::CommandBufferUsageFlags,
) -> Result<()> {
    let begin_info = vk::CommandBufferBeginInfo::default().flags(flags);
    unsafe { device.begin_command_buffer(cmd, &begin_info)? };
    Ok(())
}

/// End recording a command buffer.
///
/// # Safety
/// The command buffer must be recording.
pub unsafe fn end_command_buffer(device: &ash::Device, cmd: vk::CommandBuffer) -> Result<()> {
    unsafe { device.end_command_buffer(cmd)? };
    Ok(())
}

/// Submit command buffers to a queue.
///
/// # Safety
/// All handles must be valid and the command buffers fully recorded.
#[cfg_attr(
    feature = "profiling-tracy",
    tracing::instrument(level = "trace", skip_all)
)]
pub unsafe fn submit_command_buffers(
    device: &ash::Device,
    queue: vk::Queue,
    command_buffers: &[vk::CommandBuffer],
    wait_semaphores: &[vk::Semaphore],
    wait_stages: &[vk::PipelineStageFlags],
    signal_semaphores: &[vk::Semaphore],
    fence: vk::Fence,
) -> Result<()> {
    if wait_semaphores.len() != wait_stages.len() {
        return Err(VkError::InvalidArgument(format!(
            "{} wait semaphores but {} wait stages",
            wait_semaphores.len(),
            wait_stages.len()
        )));
    }

    let submit_info = vk::SubmitInfo::default()
        .command_buffers(command_buffers)
        .wait_semaphores(wait_semaphores)
        .wait_dst_stage_mask(wait_stages)
        .signal_semaphores(signal_semaphores);

    unsafe { device.queue_submit(queue, &[submit_info], fence)? };
    Ok(())
}

/// Record, submit and wait for a one-shot command buffer on the graphics queue.
pub fn execute_single_time_commands<F>(device: &Device, pool: &CommandPool, f: F) -> Result<()>
where
    F: FnOnce(vk::CommandBuffer),
{
    let raw = device.raw();
    let cmd = pool.allocate_command_buffer(raw, vk::CommandBufferLevel::PRIMARY)?;

    let result = unsafe { record_and_wait(raw, device.graphics_queue(), cmd, f) };

    unsafe { raw.free_command_buffers(pool.handle(), &[cmd]) };
    result
}

unsafe fn record_and_wait<F>(
    device: &ash::Device,
    queue: vk::Queue,
    cmd: vk::CommandBuffer,
    f: F,
) -> Result<()>
where
    F: FnOnce(vk::CommandBuffer),
{
    unsafe {
        begin_command_buffer(device, cmd, vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)?;
        f(cmd);
        end_command_buffer(device, cmd)?;

        let cmd_buffers = [cmd];
        let submit_info = vk::SubmitInfo::default().command_buffers(&cmd_buffers);
        device.queue_submit(queue, &[submit_info], vk::Fence::null())?;
        device.queue_wait_idle(queue)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_pool_is_resettable() {
        let flags = CommandPoolBuilder::new(0).flags();
        assert_eq!(flags, vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
    }

    #[test]
    fn transient_one_shot_pool() {
        let flags = CommandPoolBuilder::new(2)
            .resettable(false)
            .transient(true)
            .flags();
        assert_eq!(flags, vk::CommandPoolCreateFlags::TRANSIENT);
    }
}
