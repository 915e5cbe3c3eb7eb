//! Application configuration and command line overrides.

use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} expects a value")]
    MissingValue(String),
    #[error("Invalid value {value:?} for {flag}")]
    InvalidValue { flag: String, value: String },
}

/// Application configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    /// Window title.
    pub title: String,
    /// Initial window width.
    pub width: u32,
    /// Initial window height.
    pub height: u32,
    /// Enable vsync.
    pub vsync: bool,
    /// Enable Vulkan validation layers (default: debug builds only).
    pub validation: bool,
    pub frames_in_flight: usize,
    /// Attach a depth buffer to the main render pass.
    pub depth: bool,
    /// Draw the ImGui overlay.
    pub overlay: bool,
    /// Clear color of the main render pass.
    pub clear_color: [f32; 4],
    /// Target frames per second (None for unlimited).
    pub target_fps: Option<u32>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            title: "orb".to_string(),
            width: 1280,
            height: 720,
            vsync: true,
            validation: cfg!(debug_assertions),
            frames_in_flight: 2,
            depth: true,
            overlay: true,
            clear_color: [0.02, 0.02, 0.04, 1.0],
            target_fps: None,
        }
    }
}

impl AppConfig {
    /// Create a new config with the given title.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    /// Set the window dimensions.
    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn with_vsync(mut self, vsync: bool) -> Self {
        self.vsync = vsync;
        self
    }

    pub fn with_validation(mut self, validation: bool) -> Self {
        self.validation = validation;
        self
    }

    pub fn with_frames_in_flight(mut self, frames: usize) -> Self {
        self.frames_in_flight = frames.max(1);
        self
    }

    pub fn with_depth(mut self, depth: bool) -> Self {
        self.depth = depth;
        self
    }

    pub fn with_overlay(mut self, overlay: bool) -> Self {
        self.overlay = overlay;
        self
    }

    pub fn with_clear_color(mut self, color: [f32; 4]) -> Self {
        self.clear_color = color;
        self
    }

    /// Set the target FPS.
    pub fn with_target_fps(mut self, fps: u32) -> Self {
        self.target_fps = Some(fps);
        self
    }

    /// Apply overrides from the process arguments.
    pub fn from_args(self) -> Result<Self, ConfigError> {
        let args: Vec<String> = std::env::args().collect();
        self.parse_args(&args)
    }

    /// Apply overrides from a slice of arguments.
    ///
    /// `args[0]` is the program name. Flags this config does not know are
    /// left for the application to interpret.
    pub fn parse_args(mut self, args: &[String]) -> Result<Self, ConfigError> {
        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--vsync" => self.vsync = true,
                "--no-vsync" => self.vsync = false,
                "--validation" => self.validation = true,
                "--no-overlay" => self.overlay = false,
                "--frames-in-flight" => {
                    let value = value_of(args, i)?;
                    self.frames_in_flight = match value.parse::<usize>() {
                        Ok(n) if n > 0 => n,
                        _ => return Err(invalid(&args[i], value)),
                    };
                    i += 1;
                }
                "--size" => {
                    let value = value_of(args, i)?;
                    let (width, height) =
                        parse_size(value).ok_or_else(|| invalid(&args[i], value))?;
                    self.width = width;
                    self.height = height;
                    i += 1;
                }
                _ => {}
            }
            i += 1;
        }
        Ok(self)
    }
}

fn value_of(args: &[String], flag_index: usize) -> Result<&str, ConfigError> {
    args.get(flag_index + 1)
        .map(String::as_str)
        .ok_or_else(|| ConfigError::MissingValue(args[flag_index].clone()))
}

fn invalid(flag: &str, value: &str) -> ConfigError {
    ConfigError::InvalidValue {
        flag: flag.to_string(),
        value: value.to_string(),
    }
}

/// Parse `WIDTHxHEIGHT` with both dimensions non-zero.
fn parse_size(value: &str) -> Option<(u32, u32)> {
    let (width, height) = value.split_once(['x', 'X'])?;
    let width: u32 = width.trim().parse().ok()?;
    let height: u32 = height.trim().parse().ok()?;
    (width > 0 && height > 0).then_some((width, height))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        std::iter::once("orb")
            .chain(list.iter().copied())
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn defaults() {
        let config = AppConfig::default();
        assert!(config.vsync);
        assert!(config.depth);
        assert!(config.overlay);
        assert_eq!(config.frames_in_flight, 2);
        assert_eq!(config.target_fps, None);
    }

    #[test]
    fn builder_setters() {
        let config = AppConfig::new("demo")
            .with_size(640, 480)
            .with_vsync(false)
            .with_frames_in_flight(0)
            .with_depth(false)
            .with_clear_color([1.0, 0.0, 0.0, 1.0])
            .with_target_fps(60);
        assert_eq!(config.title, "demo");
        assert_eq!((config.width, config.height), (640, 480));
        assert!(!config.vsync);
        assert_eq!(config.frames_in_flight, 1);
        assert!(!config.depth);
        assert_eq!(config.clear_color, [1.0, 0.0, 0.0, 1.0]);
        assert_eq!(config.target_fps, Some(60));
    }

    #[test]
    fn parses_flags() {
        let config = AppConfig::default()
            .parse_args(&args(&[
                "--no-vsync",
                "--validation",
                "--no-overlay",
                "--frames-in-flight",
                "3",
                "--size",
                "800x600",
            ]))
            .unwrap();
        assert!(!config.vsync);
        assert!(config.validation);
        assert!(!config.overlay);
        assert_eq!(config.frames_in_flight, 3);
        assert_eq!((config.width, config.height), (800, 600));
    }

    #[test]
    fn later_flags_win() {
        let config = AppConfig::default()
            .parse_args(&args(&["--no-vsync", "--vsync"]))
            .unwrap();
        assert!(config.vsync);
    }

    #[test]
    fn unknown_flags_are_left_alone() {
        let base = AppConfig::new("keep");
        let parsed = base
            .clone()
            .parse_args(&args(&["--shader-dir", "shaders", "--paused"]))
            .unwrap();
        assert_eq!(parsed, base);
    }

    #[test]
    fn rejects_bad_values() {
        assert_eq!(
            AppConfig::default().parse_args(&args(&["--size"])),
            Err(ConfigError::MissingValue("--size".to_string()))
        );
        assert!(matches!(
            AppConfig::default().parse_args(&args(&["--size", "800"])),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(matches!(
            AppConfig::default().parse_args(&args(&["--frames-in-flight", "0"])),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn size_parsing() {
        assert_eq!(parse_size("1920x1080"), Some((1920, 1080)));
        assert_eq!(parse_size("640X480"), Some((640, 480)));
        assert_eq!(parse_size("0x480"), None);
        assert_eq!(parse_size("wide"), None);
    }
}
