//! Overlay errors.

use orb_vk::VkError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ImguiError {
    #[error(transparent)]
    Vulkan(#[from] VkError),

    #[error("Font atlas upload failed: {0}")]
    FontAtlas(String),

    /// The swapchain image has no overlay framebuffer.
    #[error("No overlay framebuffer for swapchain image {0}")]
    InvalidImage(u32),
}

pub type Result<T> = std::result::Result<T, ImguiError>;
