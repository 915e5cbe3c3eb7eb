//! Vulkan layer error types.

use ash::vk;
use thiserror::Error;

/// Errors produced while creating or driving Vulkan objects.
#[derive(Error, Debug)]
pub enum VkError {
    /// A Vulkan entry point returned an error code.
    #[error("Vulkan error: {0}")]
    Vulkan(#[from] vk::Result),

    /// The Vulkan loader could not be found or loaded.
    #[error("Failed to load Vulkan: {0}")]
    Loading(String),

    /// No physical device satisfied the requirements.
    #[error("No suitable GPU found")]
    NoSuitableDevice,

    /// A required instance or device extension is missing.
    #[error("Required extension not supported: {0}")]
    ExtensionNotSupported(String),

    /// A required layer is missing.
    #[error("Required layer not supported: {0}")]
    LayerNotSupported(String),

    /// Memory allocation failed.
    #[error("Memory allocation failed: {0}")]
    AllocationFailed(String),

    /// Surface creation failed.
    #[error("Surface creation failed: {0}")]
    SurfaceCreation(String),

    /// Swapchain creation failed.
    #[error("Swapchain creation failed: {0}")]
    SwapchainCreation(String),

    /// The swapchain no longer matches the surface and must be rebuilt.
    #[error("Swapchain is out of date")]
    SwapchainOutOfDate,

    /// Shader module creation failed.
    #[error("Shader module creation failed: {0}")]
    ShaderModule(String),

    /// Pipeline creation failed.
    #[error("Pipeline creation failed: {0}")]
    PipelineCreation(String),

    /// None of the candidate formats is supported.
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Object used in a state that does not allow the operation.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Builder was configured inconsistently.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, VkError>;
