//! Runtime GLSL compilation via shaderc.

use crate::error::{Result, ShaderError};
use crate::kind::ShaderKind;
use crate::Spirv;
use shaderc::{IncludeType, ResolvedInclude};
use std::path::{Path, PathBuf};

/// Vulkan version the SPIR-V is produced for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TargetVulkan {
    V1_0,
    V1_1,
    V1_2,
    #[default]
    V1_3,
}

impl TargetVulkan {
    /// Newest target loadable on a `vk::make_api_version` encoded version.
    pub fn for_api_version(version: u32) -> Self {
        use ash::vk;

        match (vk::api_version_major(version), vk::api_version_minor(version)) {
            (0, _) | (1, 0) => Self::V1_0,
            (1, 1) => Self::V1_1,
            (1, 2) => Self::V1_2,
            _ => Self::V1_3,
        }
    }

    fn env_version(self) -> shaderc::EnvVersion {
        match self {
            Self::V1_0 => shaderc::EnvVersion::Vulkan1_0,
            Self::V1_1 => shaderc::EnvVersion::Vulkan1_1,
            Self::V1_2 => shaderc::EnvVersion::Vulkan1_2,
            Self::V1_3 => shaderc::EnvVersion::Vulkan1_3,
        }
    }

    fn spirv_version(self) -> shaderc::SpirvVersion {
        match self {
            Self::V1_0 => shaderc::SpirvVersion::V1_0,
            Self::V1_1 => shaderc::SpirvVersion::V1_3,
            Self::V1_2 => shaderc::SpirvVersion::V1_5,
            Self::V1_3 => shaderc::SpirvVersion::V1_6,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Optimization {
    None,
    Size,
    #[default]
    Performance,
}

/// Options applied to every compilation.
#[derive(Debug, Clone, Default)]
pub struct CompilerOptions {
    pub target: TargetVulkan,
    pub optimization: Optimization,
    pub debug_info: bool,
    pub macros: Vec<(String, Option<String>)>,
    pub include_dirs: Vec<PathBuf>,
}

impl CompilerOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn target(mut self, target: TargetVulkan) -> Self {
        self.target = target;
        self
    }

    pub fn optimization(mut self, optimization: Optimization) -> Self {
        self.optimization = optimization;
        self
    }

    pub fn debug_info(mut self, enable: bool) -> Self {
        self.debug_info = enable;
        self
    }

    /// Define a preprocessor macro.
    pub fn define(mut self, name: impl Into<String>, value: Option<&str>) -> Self {
        self.macros.push((name.into(), value.map(str::to_string)));
        self
    }

    /// Search directory for `#include`.
    pub fn include_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.include_dirs.push(dir.into());
        self
    }
}

/// GLSL to SPIR-V compiler.
pub struct ShaderCompiler {
    compiler: shaderc::Compiler,
    options: CompilerOptions,
}

impl ShaderCompiler {
    pub fn new(options: CompilerOptions) -> Result<Self> {
        let compiler = shaderc::Compiler::new()
            .ok_or_else(|| ShaderError::Init("shaderc compiler unavailable".to_string()))?;
        Ok(Self { compiler, options })
    }

    /// Get the active options.
    pub fn options(&self) -> &CompilerOptions {
        &self.options
    }

    fn compile_options(&self) -> Result<shaderc::CompileOptions<'_>> {
        let mut options = shaderc::CompileOptions::new()
            .ok_or_else(|| ShaderError::Init("shaderc options unavailable".to_string()))?;

        let target = self.options.target;
        options.set_target_env(shaderc::TargetEnv::Vulkan, target.env_version() as u32);
        options.set_target_spirv(target.spirv_version());
        options.set_optimization_level(match self.options.optimization {
            Optimization::None => shaderc::OptimizationLevel::Zero,
            Optimization::Size => shaderc::OptimizationLevel::Size,
            Optimization::Performance => shaderc::OptimizationLevel::Performance,
        });
        if self.options.debug_info {
            options.set_generate_debug_info();
        }
        for (name, value) in &self.options.macros {
            options.add_macro_definition(name, value.as_deref());
        }

        let include_dirs = self.options.include_dirs.clone();
        options.set_include_callback(move |requested, ty, requesting, _depth| {
            let (path, content) = resolve_include(requested, ty, requesting, &include_dirs)?;
            Ok(ResolvedInclude {
                resolved_name: path.to_string_lossy().into_owned(),
                content,
            })
        });

        Ok(options)
    }

    /// Compile GLSL source.
    ///
    /// `name` is used in diagnostics and as the base for relative includes.
    pub fn compile(&self, source: &str, kind: ShaderKind, name: &str) -> Result<Spirv> {
        let options = self.compile_options()?;
        let artifact = self
            .compiler
            .compile_into_spirv(source, kind.to_shaderc(), name, "main", Some(&options))
            .map_err(|e| ShaderError::Compilation {
                name: name.to_string(),
                message: e.to_string(),
            })?;

        if artifact.get_num_warnings() > 0 {
            tracing::warn!("Shader warnings in {name}: {}", artifact.get_warning_messages());
        }

        let words = artifact.as_binary().to_vec();
        tracing::debug!("Compiled {name} ({kind:?}, {} words)", words.len());

        Ok(Spirv(words))
    }

    /// Compile a file, deriving the stage from its extension.
    pub fn compile_file(&self, path: impl AsRef<Path>) -> Result<Spirv> {
        let path = path.as_ref();
        let kind =
            ShaderKind::from_path(path).ok_or_else(|| ShaderError::UnknownKind(path.to_path_buf()))?;
        let source = std::fs::read_to_string(path).map_err(|source| ShaderError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        self.compile(&source, kind, &path.to_string_lossy())
    }
}

/// Locate an included file.
///
/// `#include "x"` is looked up next to the including file first, then in
/// the include directories; `#include <x>` only in the include directories.
fn resolve_include(
    requested: &str,
    ty: IncludeType,
    requesting: &str,
    include_dirs: &[PathBuf],
) -> std::result::Result<(PathBuf, String), String> {
    let relative = match ty {
        IncludeType::Relative => Path::new(requesting)
            .parent()
            .map(|dir| dir.join(requested)),
        IncludeType::Standard => None,
    };

    let candidates = relative
        .into_iter()
        .chain(include_dirs.iter().map(|dir| dir.join(requested)));

    for candidate in candidates {
        if candidate.is_file() {
            return std::fs::read_to_string(&candidate)
                .map(|content| (candidate.clone(), content))
                .map_err(|e| format!("failed to read {}: {e}", candidate.display()));
        }
    }

    Err(format!("cannot find include \"{requested}\" from {requesting}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SPIRV_MAGIC;
    use std::fs;

    const VERTEX: &str = r"
        #version 450
        layout(location = 0) in vec2 pos;
        void main() { gl_Position = vec4(pos, 0.0, 1.0); }
    ";

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("orb-shaders-{name}-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn target_follows_api_version() {
        use ash::vk;

        assert_eq!(
            TargetVulkan::for_api_version(vk::API_VERSION_1_0),
            TargetVulkan::V1_0
        );
        assert_eq!(
            TargetVulkan::for_api_version(vk::make_api_version(0, 1, 1, 204)),
            TargetVulkan::V1_1
        );
        assert_eq!(
            TargetVulkan::for_api_version(vk::API_VERSION_1_2),
            TargetVulkan::V1_2
        );
        assert_eq!(
            TargetVulkan::for_api_version(vk::make_api_version(0, 1, 4, 0)),
            TargetVulkan::V1_3
        );
    }

    #[test]
    fn older_target_emits_older_spirv() {
        let compiler =
            ShaderCompiler::new(CompilerOptions::new().target(TargetVulkan::V1_1)).unwrap();
        let spirv = compiler.compile(VERTEX, ShaderKind::Vertex, "inline.vert").unwrap();
        // SPIR-V 1.3 header version word
        assert_eq!(spirv.words()[1], 0x0001_0300);
    }

    #[test]
    fn compiles_vertex_shader() {
        let compiler = ShaderCompiler::new(CompilerOptions::new()).unwrap();
        let spirv = compiler.compile(VERTEX, ShaderKind::Vertex, "inline.vert").unwrap();
        assert_eq!(spirv.words()[0], SPIRV_MAGIC);
    }

    #[test]
    fn reports_compile_errors() {
        let compiler = ShaderCompiler::new(CompilerOptions::new()).unwrap();
        let result = compiler.compile(
            "#version 450\nvoid main() { oops }",
            ShaderKind::Fragment,
            "bad.frag",
        );
        match result {
            Err(ShaderError::Compilation { name, .. }) => assert_eq!(name, "bad.frag"),
            other => panic!("expected compilation error, got {other:?}"),
        }
    }

    #[test]
    fn macros_are_defined() {
        let source = r"
            #version 450
            #ifndef ORB_FEATURE
            #error ORB_FEATURE missing
            #endif
            layout(location = 0) out vec4 color;
            void main() { color = vec4(ORB_FEATURE); }
        ";
        let plain = ShaderCompiler::new(CompilerOptions::new()).unwrap();
        assert!(plain.compile(source, ShaderKind::Fragment, "m.frag").is_err());

        let defined =
            ShaderCompiler::new(CompilerOptions::new().define("ORB_FEATURE", Some("1.0"))).unwrap();
        assert!(defined.compile(source, ShaderKind::Fragment, "m.frag").is_ok());
    }

    #[test]
    fn includes_resolve_relative_then_dirs() {
        let root = scratch_dir("include");
        let lib = root.join("lib");
        fs::create_dir_all(&lib).unwrap();
        fs::write(root.join("local.glsl"), "const float LOCAL = 0.5;\n").unwrap();
        fs::write(lib.join("shared.glsl"), "const float SHARED = 0.25;\n").unwrap();
        fs::write(
            root.join("main.frag"),
            "#version 450\n#extension GL_GOOGLE_include_directive : require\n\
             #include \"local.glsl\"\n#include <shared.glsl>\n\
             layout(location = 0) out vec4 color;\n\
             void main() { color = vec4(LOCAL + SHARED); }\n",
        )
        .unwrap();

        let without_dirs = ShaderCompiler::new(CompilerOptions::new()).unwrap();
        assert!(without_dirs.compile_file(root.join("main.frag")).is_err());

        let compiler = ShaderCompiler::new(CompilerOptions::new().include_dir(&lib)).unwrap();
        let spirv = compiler.compile_file(root.join("main.frag")).unwrap();
        assert_eq!(spirv.words()[0], SPIRV_MAGIC);

        fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn compile_file_errors() {
        let compiler = ShaderCompiler::new(CompilerOptions::new()).unwrap();
        assert!(matches!(
            compiler.compile_file("shader.txt"),
            Err(ShaderError::UnknownKind(_))
        ));
        assert!(matches!(
            compiler.compile_file("definitely/missing.vert"),
            Err(ShaderError::Io { .. })
        ));
    }

    #[test]
    fn standard_includes_skip_relative_lookup() {
        let root = scratch_dir("standard");
        fs::write(root.join("near.glsl"), "").unwrap();
        let requesting = root.join("main.frag");
        let requesting = requesting.to_string_lossy();

        assert!(resolve_include("near.glsl", IncludeType::Relative, &requesting, &[]).is_ok());
        assert!(resolve_include("near.glsl", IncludeType::Standard, &requesting, &[]).is_err());
        assert!(
            resolve_include("near.glsl", IncludeType::Standard, &requesting, &[root.clone()])
                .is_ok()
        );

        fs::remove_dir_all(&root).ok();
    }
}
