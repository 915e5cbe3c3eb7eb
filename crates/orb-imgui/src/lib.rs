//! Dear ImGui overlay for orb.
//!
//! [`ImguiPlatform`] feeds winit events into ImGui, [`ImguiPass`] draws the
//! resulting draw lists in a render pass that loads the already rendered
//! swapchain image and leaves it ready for presentation.

mod error;
mod overlay;
mod pass;
mod platform;

pub use error::{ImguiError, Result};
pub use overlay::ImguiOverlay;
pub use pass::ImguiPass;
pub use platform::{map_key, ImguiPlatform};

pub use imgui;
