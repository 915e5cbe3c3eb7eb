//! Builder-style Vulkan layer.
//!
//! Each Vulkan object is created through a fluent builder that fills the
//! matching `vk::*CreateInfo`, and is returned as a small owning wrapper with
//! an explicit `destroy`. This crate provides:
//! - Instance, surface and device creation with GPU selection
//! - Swapchain, render pass, framebuffer and pipeline builders
//! - Buffers and images backed by gpu-allocator
//! - Command pools, descriptor pools and per-frame synchronization

pub mod buffer;
pub mod capabilities;
pub mod command;
pub mod deferred;
pub mod descriptors;
pub mod device;
pub mod error;
pub mod formats;
pub mod image;
pub mod instance;
pub mod memory;
pub mod pipeline;
pub mod render_pass;
pub mod surface;
pub mod swapchain;
pub mod sync;

pub use ash;
pub use ash::vk;
pub use gpu_allocator::MemoryLocation;

pub use buffer::{
    free_buffer, IndexBuffer, IndexBufferBuilder, StagingBufferBuilder, UniformBufferBuilder,
    UniformBuffers, VertexBuffer, VertexBufferBuilder,
};
pub use capabilities::{GpuCapabilities, GpuVendor};
pub use command::{
    begin_command_buffer, end_command_buffer, execute_single_time_commands,
    submit_command_buffers, CommandPool, CommandPoolBuilder,
};
pub use deferred::DeferredDeletionQueue;
pub use descriptors::{
    write_combined_image_sampler, write_storage_buffer, write_storage_image,
    write_uniform_buffer, DescriptorPool, DescriptorPoolBuilder, DescriptorSetLayoutBuilder,
};
pub use device::{Device, DeviceBuilder, DevicePreference, QueueFamilyIndices};
pub use error::{Result, VkError};
pub use formats::{find_depth_format, texel_size, LayoutTransition};
pub use image::{
    cmd_transition_image, destroy_views, free_image, upload_image, ImageBuilder, SamplerBuilder,
    ViewBuilder,
};
pub use instance::{Instance, InstanceBuilder};
pub use memory::{GpuAllocator, GpuBuffer, GpuImage};
pub use pipeline::{cmd_set_viewport_scissor, Pipeline, PipelineBuilder, VertexInput};
pub use render_pass::{
    destroy_framebuffers, AttachmentSpec, RenderPass, RenderPassBuilder, SubpassSpec,
};
pub use surface::{Surface, SurfaceSupport};
pub use swapchain::{Swapchain, SwapchainBuilder};
pub use sync::{FrameCounter, FrameSync, SyncObjects, SyncObjectsBuilder};
