//! GLSL to SPIR-V compilation.
//!
//! The built-in shaders under `shaders/` are compiled at build time with
//! shaderc and embedded; [`ShaderCompiler`] compiles user GLSL at runtime.

mod compiler;
mod error;
mod kind;

pub use compiler::{CompilerOptions, Optimization, ShaderCompiler, TargetVulkan};
pub use error::{Result, ShaderError};
pub use kind::ShaderKind;

use std::sync::OnceLock;

/// SPIR-V magic number.
pub const SPIRV_MAGIC: u32 = 0x0723_0203;

/// A compiled SPIR-V module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Spirv(pub Vec<u32>);

impl Spirv {
    /// Get the SPIR-V words.
    pub fn words(&self) -> &[u32] {
        &self.0
    }

    pub fn into_words(self) -> Vec<u32> {
        self.0
    }
}

/// Convert bytes to SPIR-V words.
///
/// Embedded bytes are not guaranteed to be 4-byte aligned, so words are
/// decoded rather than cast.
pub fn bytes_to_spirv(bytes: &[u8]) -> Result<Vec<u32>> {
    if bytes.len() % 4 != 0 {
        return Err(ShaderError::InvalidSpirv(format!(
            "length {} is not a multiple of 4",
            bytes.len()
        )));
    }
    let words: Vec<u32> = bytes
        .chunks_exact(4)
        .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect();
    if words.first() != Some(&SPIRV_MAGIC) {
        return Err(ShaderError::InvalidSpirv("missing magic number".to_string()));
    }
    Ok(words)
}

/// Embedded SPIR-V bytecode (raw bytes, may not be aligned).
mod spirv_bytes {
    pub static TRIANGLE_VERT: &[u8] =
        include_bytes!(concat!(env!("OUT_DIR"), "/triangle_vert.spv"));
    pub static TRIANGLE_FRAG: &[u8] =
        include_bytes!(concat!(env!("OUT_DIR"), "/triangle_frag.spv"));
    pub static IMGUI_VERT: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/imgui_vert.spv"));
    pub static IMGUI_FRAG: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/imgui_frag.spv"));
}

fn embedded(cell: &'static OnceLock<Vec<u32>>, bytes: &[u8], name: &str) -> &'static [u32] {
    cell.get_or_init(|| {
        bytes_to_spirv(bytes).unwrap_or_else(|e| {
            tracing::error!("Embedded shader {name} is corrupt: {e}");
            Vec::new()
        })
    })
}

static TRIANGLE_VERT: OnceLock<Vec<u32>> = OnceLock::new();
static TRIANGLE_FRAG: OnceLock<Vec<u32>> = OnceLock::new();
static IMGUI_VERT: OnceLock<Vec<u32>> = OnceLock::new();
static IMGUI_FRAG: OnceLock<Vec<u32>> = OnceLock::new();

/// Colored-vertex shader with a model transform uniform at set 0, binding 0.
pub fn triangle_vertex_shader() -> &'static [u32] {
    embedded(&TRIANGLE_VERT, spirv_bytes::TRIANGLE_VERT, "triangle.vert")
}

pub fn triangle_fragment_shader() -> &'static [u32] {
    embedded(&TRIANGLE_FRAG, spirv_bytes::TRIANGLE_FRAG, "triangle.frag")
}

/// ImGui vertex shader with a scale/translate push constant block.
pub fn imgui_vertex_shader() -> &'static [u32] {
    embedded(&IMGUI_VERT, spirv_bytes::IMGUI_VERT, "imgui.vert")
}

/// ImGui fragment shader sampling the font atlas at set 0, binding 0.
pub fn imgui_fragment_shader() -> &'static [u32] {
    embedded(&IMGUI_FRAG, spirv_bytes::IMGUI_FRAG, "imgui.frag")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_shaders_load() {
        for shader in [
            triangle_vertex_shader(),
            triangle_fragment_shader(),
            imgui_vertex_shader(),
            imgui_fragment_shader(),
        ] {
            assert_eq!(shader[0], SPIRV_MAGIC, "Invalid SPIR-V magic number");
            assert!(shader.len() > 20, "Shader too small");
        }
    }

    #[test]
    fn bytes_to_spirv_checks_length_and_magic() {
        let mut bytes = SPIRV_MAGIC.to_le_bytes().to_vec();
        bytes.extend_from_slice(&[0, 0, 1, 0]);
        assert_eq!(bytes_to_spirv(&bytes).unwrap(), vec![SPIRV_MAGIC, 0x0001_0000]);

        assert!(bytes_to_spirv(&bytes[..6]).is_err());
        assert!(bytes_to_spirv(&[0; 8]).is_err());
    }
}
