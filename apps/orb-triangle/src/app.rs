//! Triangle application implementation.

use std::f32::consts::TAU;
use std::mem::{offset_of, size_of};
use std::path::{Path, PathBuf};

use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};
use tracing::{error, info};

use orb_app::imgui;
use orb_app::{App, AppContext, FrameContext};
use orb_shaders::{CompilerOptions, ShaderCompiler, TargetVulkan};
use orb_vk::{
    DescriptorPool, DescriptorPoolBuilder, DescriptorSetLayoutBuilder, IndexBuffer,
    IndexBufferBuilder, Pipeline, PipelineBuilder, UniformBufferBuilder, UniformBuffers,
    VertexBuffer, VertexBufferBuilder, VertexInput,
};

/// Default rotation speed in radians per second.
const DEFAULT_SPEED: f32 = 1.0;

/// Largest rotation speed the panel allows.
const MAX_SPEED: f32 = 10.0;

const VERTICES: [Vertex; 3] = [
    Vertex {
        pos: [0.0, -0.5],
        color: [1.0, 0.0, 0.0],
    },
    Vertex {
        pos: [0.5, 0.5],
        color: [0.0, 1.0, 0.0],
    },
    Vertex {
        pos: [-0.5, 0.5],
        color: [0.0, 0.0, 1.0],
    },
];

const INDICES: [u16; 3] = [0, 1, 2];

/// A 2D position with a vertex color.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub pos: [f32; 2],
    pub color: [f32; 3],
}

impl VertexInput for Vertex {
    fn bindings() -> Vec<vk::VertexInputBindingDescription> {
        vec![vk::VertexInputBindingDescription {
            binding: 0,
            stride: size_of::<Self>() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        }]
    }

    fn attributes() -> Vec<vk::VertexInputAttributeDescription> {
        vec![
            vk::VertexInputAttributeDescription {
                location: 0,
                binding: 0,
                format: vk::Format::R32G32_SFLOAT,
                offset: offset_of!(Self, pos) as u32,
            },
            vk::VertexInputAttributeDescription {
                location: 1,
                binding: 0,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: offset_of!(Self, color) as u32,
            },
        ]
    }
}

/// Uniform block at set 0, binding 0 of the vertex shader.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct Transform {
    model: Mat4,
}

/// Rotation about Z, squashed horizontally so the triangle keeps its shape
/// on non-square windows.
fn model_matrix(angle: f32, aspect: f32) -> Mat4 {
    let aspect = if aspect > 0.0 { aspect } else { 1.0 };
    Mat4::from_scale(Vec3::new(1.0 / aspect, 1.0, 1.0)) * Mat4::from_rotation_z(angle)
}

/// Advance the rotation, wrapped into `[0, TAU)`.
fn advance_angle(angle: f32, speed: f32, dt: f32) -> f32 {
    (angle + speed * dt).rem_euclid(TAU)
}

/// Sample options that are not part of [`orb_app::AppConfig`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TriangleParams {
    /// Directory holding `triangle.vert` and `triangle.frag`.
    pub shader_dir: Option<PathBuf>,
}

impl TriangleParams {
    /// Parse triangle parameters from command line arguments.
    pub fn from_args() -> Self {
        let args: Vec<String> = std::env::args().collect();
        Self::parse(&args)
    }

    fn parse(args: &[String]) -> Self {
        let mut params = Self::default();
        let mut i = 1;
        while i < args.len() {
            if args[i] == "--shader-dir" {
                if let Some(dir) = args.get(i + 1) {
                    params.shader_dir = Some(PathBuf::from(dir));
                    i += 1;
                }
            }
            i += 1;
        }
        params
    }
}

/// Shader target usable with both the instance and the device version.
fn shader_target(instance_version: u32, device_version: u32) -> TargetVulkan {
    TargetVulkan::for_api_version(instance_version.min(device_version))
}

/// SPIR-V for the vertex and fragment stage.
fn load_shaders(
    shader_dir: Option<&Path>,
    target: TargetVulkan,
) -> anyhow::Result<(Vec<u32>, Vec<u32>)> {
    let Some(dir) = shader_dir else {
        return Ok((
            orb_shaders::triangle_vertex_shader().to_vec(),
            orb_shaders::triangle_fragment_shader().to_vec(),
        ));
    };

    info!("Compiling shaders from {} for {target:?}", dir.display());
    let compiler = ShaderCompiler::new(CompilerOptions::new().target(target).include_dir(dir))?;
    let vertex = compiler.compile_file(dir.join("triangle.vert"))?;
    let fragment = compiler.compile_file(dir.join("triangle.frag"))?;
    Ok((vertex.into_words(), fragment.into_words()))
}

/// Triangle application state.
pub struct Triangle {
    vertices: VertexBuffer,
    indices: IndexBuffer,
    uniforms: UniformBuffers<Transform>,
    set_layout: vk::DescriptorSetLayout,
    descriptor_pool: DescriptorPool,
    /// One set per frame in flight.
    descriptor_sets: Vec<vk::DescriptorSet>,
    pipeline: Pipeline,
    /// Current rotation in radians.
    angle: f32,
    /// Rotation speed in radians per second.
    speed: f32,
    paused: bool,
}

impl App for Triangle {
    fn init(ctx: &mut AppContext) -> anyhow::Result<Self> {
        let params = TriangleParams::from_args();
        let frames = ctx.frames_in_flight();
        let raw = ctx.device.raw();

        let vertices = VertexBufferBuilder::new(&VERTICES)
            .name("triangle_vertices")
            .build(&ctx.device, &ctx.command_pool)?;
        let indices = IndexBufferBuilder::new_u16(&INDICES)
            .name("triangle_indices")
            .build(&ctx.device, &ctx.command_pool)?;
        let uniforms = UniformBufferBuilder::<Transform>::new(frames)
            .name("triangle_transform")
            .build(&ctx.device)?;

        let set_layout = DescriptorSetLayoutBuilder::new()
            .uniform_buffer(0, vk::ShaderStageFlags::VERTEX)
            .build(&ctx.device)?;
        let descriptor_pool = DescriptorPoolBuilder::new()
            .max_sets(frames as u32)
            .pool_size(vk::DescriptorType::UNIFORM_BUFFER, frames as u32)
            .build(&ctx.device)?;
        let descriptor_sets = descriptor_pool.allocate(raw, &vec![set_layout; frames])?;
        for (frame, &set) in descriptor_sets.iter().enumerate() {
            // SAFETY: the sets were just allocated and are not in use
            unsafe {
                orb_vk::write_uniform_buffer(
                    raw,
                    set,
                    0,
                    uniforms.buffer(frame)?,
                    0,
                    uniforms.size(),
                );
            }
        }

        let target = shader_target(
            ctx.instance.api_version(),
            ctx.device.capabilities().api_version,
        );
        let (vertex_spirv, fragment_spirv) = load_shaders(params.shader_dir.as_deref(), target)?;
        let depth = ctx.depth_format().is_some();
        let pipeline = PipelineBuilder::new()
            .vertex_shader(&vertex_spirv)
            .fragment_shader(&fragment_spirv)
            .vertex_input::<Vertex>()
            .cull_mode(vk::CullModeFlags::NONE)
            .depth_test(depth)
            .depth_write(depth)
            .descriptor_set_layout(set_layout)
            .render_pass(ctx.render_pass.handle(), 0)
            .build(&ctx.device)?;

        info!(
            "Triangle ready ({} frames in flight, depth: {depth})",
            frames
        );

        Ok(Self {
            vertices,
            indices,
            uniforms,
            set_layout,
            descriptor_pool,
            descriptor_sets,
            pipeline,
            angle: 0.0,
            speed: DEFAULT_SPEED,
            paused: false,
        })
    }

    fn update(&mut self, _ctx: &AppContext, dt: f32) {
        if !self.paused {
            self.angle = advance_angle(self.angle, self.speed, dt);
        }
    }

    fn render(&mut self, ctx: &AppContext, frame: &mut FrameContext<'_>) -> anyhow::Result<()> {
        let transform = Transform {
            model: model_matrix(self.angle, ctx.aspect_ratio()),
        };
        self.uniforms.update(frame.frame_index, &transform)?;

        let set = self
            .descriptor_sets
            .get(frame.frame_index)
            .copied()
            .ok_or_else(|| anyhow::anyhow!("no descriptor set for frame {}", frame.frame_index))?;

        let device = ctx.device.raw();
        let cmd = frame.command_buffer;

        frame.begin_main_pass();
        // SAFETY: the main pass is open on a recording command buffer
        unsafe {
            self.pipeline.bind(device, cmd);
            self.pipeline.bind_descriptor_sets(device, cmd, &[set]);
            self.vertices.bind(device, cmd);
            self.indices.bind(device, cmd);
            device.cmd_draw_indexed(cmd, self.indices.count, 1, 0, 0, 0);
        }
        frame.end_main_pass();

        Ok(())
    }

    fn ui(&mut self, ctx: &AppContext, ui: &mut imgui::Ui) {
        let stats = ctx.stats();
        let extent = ctx.extent();
        ui.window("Triangle")
            .position([10.0, 10.0], imgui::Condition::FirstUseEver)
            .size([260.0, 150.0], imgui::Condition::FirstUseEver)
            .build(|| {
                ui.slider("Speed", 0.0, MAX_SPEED, &mut self.speed);
                ui.checkbox("Paused", &mut self.paused);
                ui.separator();
                ui.text(format!(
                    "{:.1} FPS ({:.2} ms)",
                    stats.fps, stats.frame_time_ms
                ));
                ui.text(format!("{}x{}", extent.width, extent.height));
                ui.text(format!("Frame {}", ctx.frame_count));
            });
    }

    fn cleanup(&mut self, ctx: &mut AppContext) {
        let raw = ctx.device.raw();
        // SAFETY: the GPU is idle during cleanup
        unsafe {
            self.pipeline.destroy(raw);
            self.descriptor_pool.destroy(raw);
            raw.destroy_descriptor_set_layout(self.set_layout, None);
        }

        if let Err(e) = self.vertices.destroy(&ctx.device) {
            error!("Failed to free vertex buffer: {e}");
        }
        if let Err(e) = self.indices.destroy(&ctx.device) {
            error!("Failed to free index buffer: {e}");
        }
        if let Err(e) = self.uniforms.destroy(&ctx.device) {
            error!("Failed to free uniform buffers: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use glam::Vec4;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn shader_target_uses_lower_version() {
        assert_eq!(
            shader_target(vk::API_VERSION_1_3, vk::API_VERSION_1_1),
            TargetVulkan::V1_1
        );
        assert_eq!(
            shader_target(vk::API_VERSION_1_2, vk::API_VERSION_1_3),
            TargetVulkan::V1_2
        );
    }

    #[test]
    fn vertex_layout_matches_shader_inputs() {
        let bindings = Vertex::bindings();
        assert_eq!(bindings[0].stride, 20);

        let attributes = Vertex::attributes();
        assert_eq!(attributes.len(), 2);
        assert_eq!(attributes[0].offset, 0);
        assert_eq!(attributes[1].offset, 8);
        assert_eq!(attributes[1].format, vk::Format::R32G32B32_SFLOAT);
    }

    #[test]
    fn transform_fits_std140_mat4() {
        assert_eq!(size_of::<Transform>(), 64);
    }

    #[test]
    fn model_matrix_is_identity_at_rest_on_square_window() {
        let m = model_matrix(0.0, 1.0);
        let p = m * Vec4::new(0.5, 0.5, 0.0, 1.0);
        assert_relative_eq!(p.x, 0.5);
        assert_relative_eq!(p.y, 0.5);
        assert_relative_eq!(p.w, 1.0);
    }

    #[test]
    fn model_matrix_rotates_then_corrects_aspect() {
        let m = model_matrix(std::f32::consts::FRAC_PI_2, 2.0);
        let p = m * Vec4::new(1.0, 0.0, 0.0, 1.0);
        assert_relative_eq!(p.x, 0.0, epsilon = 1e-6);
        assert_relative_eq!(p.y, 1.0, epsilon = 1e-6);

        let q = m * Vec4::new(0.0, -1.0, 0.0, 1.0);
        assert_relative_eq!(q.x, 0.5, epsilon = 1e-6);
        assert_relative_eq!(q.y, 0.0, epsilon = 1e-6);
    }

    #[test]
    fn degenerate_aspect_falls_back_to_square() {
        let m = model_matrix(0.0, 0.0);
        let p = m * Vec4::new(1.0, 0.0, 0.0, 1.0);
        assert_relative_eq!(p.x, 1.0);
    }

    #[test]
    fn angle_wraps() {
        assert_relative_eq!(advance_angle(0.0, 1.0, 0.5), 0.5);
        let wrapped = advance_angle(TAU - 0.1, 1.0, 0.2);
        assert_relative_eq!(wrapped, 0.1, epsilon = 1e-5);
        assert!(advance_angle(0.0, -1.0, 0.5) >= 0.0);
    }

    #[test]
    fn shader_dir_is_parsed() {
        let params = TriangleParams::parse(&args(&["orb-triangle", "--shader-dir", "shaders"]));
        assert_eq!(params.shader_dir, Some(PathBuf::from("shaders")));

        let params = TriangleParams::parse(&args(&["orb-triangle", "--vsync"]));
        assert_eq!(params.shader_dir, None);

        let params = TriangleParams::parse(&args(&["orb-triangle", "--shader-dir"]));
        assert_eq!(params.shader_dir, None);
    }
}
