//! Shader stages.

use ash::vk;
use std::path::Path;

/// Pipeline stage a GLSL source compiles for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderKind {
    Vertex,
    Fragment,
    Compute,
    Geometry,
    TessControl,
    TessEvaluation,
}

impl ShaderKind {
    /// Derive the stage from a file extension.
    ///
    /// Accepts `name.vert` as well as `name.vert.glsl`.
    pub fn from_path(path: &Path) -> Option<Self> {
        let mut ext = path.extension()?.to_str()?;
        if ext.eq_ignore_ascii_case("glsl") {
            ext = Path::new(path.file_stem()?).extension()?.to_str()?;
        }
        Self::from_extension(ext)
    }

    fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "vert" => Some(Self::Vertex),
            "frag" => Some(Self::Fragment),
            "comp" => Some(Self::Compute),
            "geom" => Some(Self::Geometry),
            "tesc" => Some(Self::TessControl),
            "tese" => Some(Self::TessEvaluation),
            _ => None,
        }
    }

    /// Vulkan stage flag for pipeline creation.
    pub fn stage_flags(self) -> vk::ShaderStageFlags {
        match self {
            Self::Vertex => vk::ShaderStageFlags::VERTEX,
            Self::Fragment => vk::ShaderStageFlags::FRAGMENT,
            Self::Compute => vk::ShaderStageFlags::COMPUTE,
            Self::Geometry => vk::ShaderStageFlags::GEOMETRY,
            Self::TessControl => vk::ShaderStageFlags::TESSELLATION_CONTROL,
            Self::TessEvaluation => vk::ShaderStageFlags::TESSELLATION_EVALUATION,
        }
    }

    pub(crate) fn to_shaderc(self) -> shaderc::ShaderKind {
        match self {
            Self::Vertex => shaderc::ShaderKind::Vertex,
            Self::Fragment => shaderc::ShaderKind::Fragment,
            Self::Compute => shaderc::ShaderKind::Compute,
            Self::Geometry => shaderc::ShaderKind::Geometry,
            Self::TessControl => shaderc::ShaderKind::TessControl,
            Self::TessEvaluation => shaderc::ShaderKind::TessEvaluation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_from_extension() {
        assert_eq!(
            ShaderKind::from_path(Path::new("shaders/triangle.vert")),
            Some(ShaderKind::Vertex)
        );
        assert_eq!(
            ShaderKind::from_path(Path::new("lighting.FRAG")),
            Some(ShaderKind::Fragment)
        );
        assert_eq!(
            ShaderKind::from_path(Path::new("cull.comp.glsl")),
            Some(ShaderKind::Compute)
        );
        assert_eq!(
            ShaderKind::from_path(Path::new("patch.tese")),
            Some(ShaderKind::TessEvaluation)
        );
    }

    #[test]
    fn unknown_extensions() {
        assert_eq!(ShaderKind::from_path(Path::new("common.glsl")), None);
        assert_eq!(ShaderKind::from_path(Path::new("README")), None);
        assert_eq!(ShaderKind::from_path(Path::new("shader.hlsl")), None);
    }

    #[test]
    fn stage_flags_match() {
        assert_eq!(
            ShaderKind::Fragment.stage_flags(),
            vk::ShaderStageFlags::FRAGMENT
        );
        assert_eq!(
            ShaderKind::TessControl.stage_flags(),
            vk::ShaderStageFlags::TESSELLATION_CONTROL
        );
    }
}
