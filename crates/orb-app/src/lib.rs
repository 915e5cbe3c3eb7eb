//! Application framework for orb.
//!
//! This crate provides a trait-based application framework that handles
//! common boilerplate like:
//! - Window creation and management
//! - Vulkan instance, device and swapchain initialization
//! - Swapchain recreation on resize
//! - Frame synchronization
//! - Event loop handling and the ImGui overlay
//!
//! # Example
//!
//! ```no_run
//! use orb_app::{run_app, App, AppConfig, AppContext, FrameContext};
//!
//! struct MyApp {
//!     // Application state
//! }
//!
//! impl App for MyApp {
//!     fn init(ctx: &mut AppContext) -> anyhow::Result<Self> {
//!         Ok(MyApp {})
//!     }
//!
//!     fn update(&mut self, ctx: &AppContext, dt: f32) {
//!         // Update logic
//!     }
//!
//!     fn render(&mut self, ctx: &AppContext, frame: &mut FrameContext) -> anyhow::Result<()> {
//!         frame.begin_main_pass();
//!         // Draw calls
//!         frame.end_main_pass();
//!         Ok(())
//!     }
//! }
//!
//! fn main() -> anyhow::Result<()> {
//!     run_app::<MyApp>(AppConfig::new("My App").from_args()?)
//! }
//! ```

mod app;
mod config;
mod context;
mod frame;
mod runner;

pub use app::App;
pub use config::{AppConfig, ConfigError};
pub use context::AppContext;
pub use frame::{FrameContext, FrameStats};
pub use runner::run_app;

// Re-export commonly used types for convenience
pub use orb_imgui::imgui;
pub use orb_vk;
pub use winit::event::WindowEvent;
