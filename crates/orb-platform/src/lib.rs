//! Platform glue between winit windows and Vulkan.
//!
//! Window configuration, window creation, the instance extensions a window
//! surface needs, and framebuffer size queries.

use raw_window_handle::HasDisplayHandle;
use std::ffi::CStr;
use thiserror::Error;
use winit::dpi::LogicalSize;
use winit::event_loop::ActiveEventLoop;
use winit::window::{Window, WindowAttributes};

#[derive(Error, Debug)]
pub enum PlatformError {
    #[error("Window creation failed: {0}")]
    WindowCreation(String),
    #[error("Window handle unavailable: {0}")]
    Handle(String),
    /// The windowing system has no Vulkan surface support.
    #[error("Surface extensions unavailable: {0}")]
    SurfaceExtensions(String),
}

pub type Result<T> = std::result::Result<T, PlatformError>;

/// Window configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub resizable: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "orb".to_string(),
            width: 1280,
            height: 720,
            resizable: true,
        }
    }
}

impl WindowConfig {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    /// Set the logical window size.
    pub fn size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn resizable(mut self, resizable: bool) -> Self {
        self.resizable = resizable;
        self
    }

    /// Convert into winit window attributes.
    pub fn attributes(&self) -> WindowAttributes {
        Window::default_attributes()
            .with_title(self.title.clone())
            .with_inner_size(LogicalSize::new(self.width, self.height))
            .with_resizable(self.resizable)
    }
}

/// Create a window on a running event loop.
pub fn create_window(event_loop: &ActiveEventLoop, config: &WindowConfig) -> Result<Window> {
    let window = event_loop
        .create_window(config.attributes())
        .map_err(|e| PlatformError::WindowCreation(e.to_string()))?;

    let (width, height) = framebuffer_extent(&window);
    tracing::info!(
        "Created window \"{}\" ({width}x{height} physical)",
        config.title
    );

    Ok(window)
}

/// Instance extensions required to create a surface on this display.
pub fn required_instance_extensions(
    display: &impl HasDisplayHandle,
) -> Result<Vec<&'static CStr>> {
    let handle = display
        .display_handle()
        .map_err(|e| PlatformError::Handle(e.to_string()))?;
    let names = ash_window::enumerate_required_extensions(handle.as_raw())
        .map_err(|e| PlatformError::SurfaceExtensions(e.to_string()))?;

    // SAFETY: ash-window returns pointers to static, NUL-terminated names
    Ok(names
        .iter()
        .map(|&name| unsafe { CStr::from_ptr(name) })
        .collect())
}

/// Current framebuffer size in physical pixels.
///
/// Either dimension is zero while the window is minimized.
pub fn framebuffer_extent(window: &Window) -> (u32, u32) {
    let size = window.inner_size();
    (size.width, size.height)
}

/// Whether a framebuffer extent can be rendered to.
pub fn is_renderable(extent: (u32, u32)) -> bool {
    extent.0 > 0 && extent.1 > 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use winit::dpi::Size;

    #[test]
    fn config_defaults() {
        let config = WindowConfig::default();
        assert_eq!(config.title, "orb");
        assert_eq!((config.width, config.height), (1280, 720));
        assert!(config.resizable);
    }

    #[test]
    fn fluent_setters() {
        let config = WindowConfig::new("demo").size(640, 480).resizable(false);
        assert_eq!(config.title, "demo");
        assert_eq!((config.width, config.height), (640, 480));
        assert!(!config.resizable);

        let renamed = config.clone().title("other");
        assert_eq!(renamed.title, "other");
        assert_eq!(renamed.width, config.width);
    }

    #[test]
    fn attributes_carry_config() {
        let attributes = WindowConfig::new("attrs").size(800, 600).resizable(false).attributes();
        assert_eq!(attributes.title, "attrs");
        assert!(!attributes.resizable);
        assert_eq!(
            attributes.inner_size,
            Some(Size::Logical(LogicalSize::new(800.0, 600.0)))
        );
    }

    #[test]
    fn minimized_extent_is_not_renderable() {
        assert!(is_renderable((1, 1)));
        assert!(!is_renderable((0, 600)));
        assert!(!is_renderable((800, 0)));
    }
}
