//! orb triangle sample
//!
//! Draws a rotating, vertex-colored triangle through the orb builders with an
//! ImGui panel on top.
//!
//! ## Usage
//!
//! ```bash
//! cargo run -p orb-triangle -- [OPTIONS]
//! ```
//!
//! ## Options
//!
//! - `--shader-dir <DIR>`: Compile `triangle.vert` / `triangle.frag` from DIR
//!   at startup instead of using the embedded SPIR-V
//! - `--vsync` / `--no-vsync`: Toggle vsync (default: on)
//! - `--validation`: Enable Vulkan validation layers
//! - `--no-overlay`: Disable the ImGui overlay
//! - `--frames-in-flight <N>`: Frames recorded ahead of the GPU (default: 2)
//! - `--size <WxH>`: Initial window size
//! - `-h, --help`: Print help message
//!
//! ## Environment Variables
//!
//! - `RUST_LOG`: Set log level (e.g., info, debug, trace)

mod app;

use orb_app::{run_app, AppConfig};

use crate::app::Triangle;

const WIDTH: u32 = 1280;
const HEIGHT: u32 = 720;

fn main() -> anyhow::Result<()> {
    // Check for help flag before starting the app
    if std::env::args().any(|arg| arg == "-h" || arg == "--help") {
        print_help();
        return Ok(());
    }

    let config = AppConfig::new("orb - Triangle")
        .with_size(WIDTH, HEIGHT)
        .from_args()?;

    run_app::<Triangle>(config)
}

fn print_help() {
    eprintln!(
        "orb triangle sample

USAGE:
    cargo run -p orb-triangle -- [OPTIONS]

SHADER OPTIONS:
    --shader-dir <DIR>        Compile triangle.vert and triangle.frag from DIR
                              instead of using the embedded SPIR-V

RENDERING OPTIONS:
    --vsync                   Enable vsync (default)
    --no-vsync                Disable vsync
    --validation              Enable Vulkan validation layers
    --no-overlay              Disable the ImGui overlay
    --frames-in-flight <N>    Frames recorded ahead of the GPU (default: 2)
    --size <WxH>              Initial window size (default: {WIDTH}x{HEIGHT})

OTHER:
    -h, --help                Print this help message

EXAMPLES:
    # Default settings
    cargo run -p orb-triangle

    # Edit shaders without rebuilding
    cargo run -p orb-triangle -- --shader-dir crates/orb-shaders/shaders

ENVIRONMENT VARIABLES:
    RUST_LOG                  Set log level (e.g., info, debug, trace)"
    );
}
