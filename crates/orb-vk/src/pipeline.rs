//! Graphics pipeline creation.

use crate::device::Device;
use crate::error::{Result, VkError};
use ash::vk;
use bytemuck::Pod;

/// SPIR-V magic number.
pub const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Vertex layout description for a vertex type.
pub trait VertexInput {
    /// Vertex buffer bindings.
    fn bindings() -> Vec<vk::VertexInputBindingDescription>;
    /// Vertex attributes.
    fn attributes() -> Vec<vk::VertexInputAttributeDescription>;
}

#[derive(Debug, Clone)]
struct DynamicRenderingFormats {
    color_formats: Vec<vk::Format>,
    depth_format: Option<vk::Format>,
}

/// Builder for graphics [`Pipeline`]s.
///
/// Viewport and scissor are always dynamic state.
#[derive(Debug, Clone)]
pub struct PipelineBuilder {
    stages: Vec<(vk::ShaderStageFlags, Vec<u32>)>,
    vertex_bindings: Vec<vk::VertexInputBindingDescription>,
    vertex_attributes: Vec<vk::VertexInputAttributeDescription>,
    topology: vk::PrimitiveTopology,
    polygon_mode: vk::PolygonMode,
    cull_mode: vk::CullModeFlags,
    front_face: vk::FrontFace,
    samples: vk::SampleCountFlags,
    depth_test: bool,
    depth_write: bool,
    alpha_blending: bool,
    set_layouts: Vec<vk::DescriptorSetLayout>,
    push_constant_ranges: Vec<vk::PushConstantRange>,
    render_pass: Option<(vk::RenderPass, u32)>,
    color_attachments: Option<usize>,
    dynamic_rendering: Option<DynamicRenderingFormats>,
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self {
            stages: Vec::new(),
            vertex_bindings: Vec::new(),
            vertex_attributes: Vec::new(),
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            polygon_mode: vk::PolygonMode::FILL,
            cull_mode: vk::CullModeFlags::BACK,
            front_face: vk::FrontFace::COUNTER_CLOCKWISE,
            samples: vk::SampleCountFlags::TYPE_1,
            depth_test: false,
            depth_write: false,
            alpha_blending: false,
            set_layouts: Vec::new(),
            push_constant_ranges: Vec::new(),
            render_pass: None,
            color_attachments: None,
            dynamic_rendering: None,
        }
    }
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a shader stage from SPIR-V words.
    pub fn stage(mut self, stage: vk::ShaderStageFlags, spirv: &[u32]) -> Self {
        self.stages.push((stage, spirv.to_vec()));
        self
    }

    pub fn vertex_shader(self, spirv: &[u32]) -> Self {
        self.stage(vk::ShaderStageFlags::VERTEX, spirv)
    }

    pub fn fragment_shader(self, spirv: &[u32]) -> Self {
        self.stage(vk::ShaderStageFlags::FRAGMENT, spirv)
    }

    /// Use the vertex layout of `V`.
    pub fn vertex_input<V: VertexInput>(mut self) -> Self {
        self.vertex_bindings = V::bindings();
        self.vertex_attributes = V::attributes();
        self
    }

    pub fn vertex_bindings(mut self, bindings: &[vk::VertexInputBindingDescription]) -> Self {
        self.vertex_bindings = bindings.to_vec();
        self
    }

    pub fn vertex_attributes(mut self, attributes: &[vk::VertexInputAttributeDescription]) -> Self {
        self.vertex_attributes = attributes.to_vec();
        self
    }

    pub fn topology(mut self, topology: vk::PrimitiveTopology) -> Self {
        self.topology = topology;
        self
    }

    pub fn polygon_mode(mut self, mode: vk::PolygonMode) -> Self {
        self.polygon_mode = mode;
        self
    }

    pub fn cull_mode(mut self, mode: vk::CullModeFlags) -> Self {
        self.cull_mode = mode;
        self
    }

    pub fn front_face(mut self, face: vk::FrontFace) -> Self {
        self.front_face = face;
        self
    }

    pub fn samples(mut self, samples: vk::SampleCountFlags) -> Self {
        self.samples = samples;
        self
    }

    pub fn depth_test(mut self, enable: bool) -> Self {
        self.depth_test = enable;
        self
    }

    pub fn depth_write(mut self, enable: bool) -> Self {
        self.depth_write = enable;
        self
    }

    /// Straight alpha blending on every color attachment.
    pub fn alpha_blending(mut self, enable: bool) -> Self {
        self.alpha_blending = enable;
        self
    }

    pub fn descriptor_set_layout(mut self, layout: vk::DescriptorSetLayout) -> Self {
        self.set_layouts.push(layout);
        self
    }

    pub fn push_constant_range(
        mut self,
        stages: vk::ShaderStageFlags,
        offset: u32,
        size: u32,
    ) -> Self {
        self.push_constant_ranges.push(
            vk::PushConstantRange::default()
                .stage_flags(stages)
                .offset(offset)
                .size(size),
        );
        self
    }

    /// Render into a subpass of a render pass.
    pub fn render_pass(mut self, render_pass: vk::RenderPass, subpass: u32) -> Self {
        self.render_pass = Some((render_pass, subpass));
        self
    }

    /// Number of color attachments in the target subpass (default 1).
    ///
    /// Must match the subpass color count for render pass targets. With
    /// dynamic rendering it must equal the number of color formats.
    pub fn color_attachment_count(mut self, count: usize) -> Self {
        self.color_attachments = Some(count);
        self
    }

    /// Render with dynamic rendering (Vulkan 1.3) into these formats.
    pub fn dynamic_rendering(
        mut self,
        color_formats: &[vk::Format],
        depth_format: Option<vk::Format>,
    ) -> Self {
        self.dynamic_rendering = Some(DynamicRenderingFormats {
            color_formats: color_formats.to_vec(),
            depth_format,
        });
        self
    }

    fn validate(&self) -> Result<()> {
        if self.stages.is_empty() {
            return Err(VkError::PipelineCreation(
                "pipeline has no shader stages".to_string(),
            ));
        }

        for (i, (stage, code)) in self.stages.iter().enumerate() {
            if self.stages[..i].iter().any(|(other, _)| other == stage) {
                return Err(VkError::PipelineCreation(format!(
                    "duplicate shader stage {stage:?}"
                )));
            }
            if code.first() != Some(&SPIRV_MAGIC) {
                return Err(VkError::ShaderModule(format!(
                    "{stage:?} code is not SPIR-V"
                )));
            }
        }

        if let (Some(count), Some(formats)) = (self.color_attachments, &self.dynamic_rendering) {
            if count != formats.color_formats.len() {
                return Err(VkError::PipelineCreation(format!(
                    "{count} color attachments requested but {} color formats given",
                    formats.color_formats.len()
                )));
            }
        }

        match (&self.render_pass, &self.dynamic_rendering) {
            (Some(_), None) | (None, Some(_)) => Ok(()),
            (None, None) => Err(VkError::PipelineCreation(
                "pipeline needs a render pass or dynamic rendering formats".to_string(),
            )),
            (Some(_), Some(_)) => Err(VkError::PipelineCreation(
                "pipeline cannot target both a render pass and dynamic rendering".to_string(),
            )),
        }
    }

    fn blend_attachment_count(&self) -> usize {
        match (&self.dynamic_rendering, self.color_attachments) {
            (Some(formats), _) => formats.color_formats.len(),
            (None, Some(count)) => count,
            (None, None) => 1,
        }
    }

    /// Create the pipeline and its layout.
    pub fn build(&self, device: &Device) -> Result<Pipeline> {
        self.validate()?;
        let device = device.raw();

        let mut modules = Vec::with_capacity(self.stages.len());
        for (stage, code) in &self.stages {
            let info = vk::ShaderModuleCreateInfo::default().code(code);
            match unsafe { device.create_shader_module(&info, None) } {
                Ok(module) => modules.push(module),
                Err(e) => {
                    unsafe { destroy_modules(device, &modules) };
                    return Err(VkError::ShaderModule(format!("{stage:?}: {e}")));
                }
            }
        }

        let result = unsafe { self.create(device, &modules) };
        // Modules are only needed during pipeline creation
        unsafe { destroy_modules(device, &modules) };
        result
    }

    unsafe fn create(&self, device: &ash::Device, modules: &[vk::ShaderModule]) -> Result<Pipeline> {
        let shader_stages: Vec<vk::PipelineShaderStageCreateInfo> = self
            .stages
            .iter()
            .zip(modules)
            .map(|((stage, _), &module)| {
                vk::PipelineShaderStageCreateInfo::default()
                    .stage(*stage)
                    .module(module)
                    .name(c"main")
            })
            .collect();

        let vertex_input = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&self.vertex_bindings)
            .vertex_attribute_descriptions(&self.vertex_attributes);

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(self.topology)
            .primitive_restart_enable(false);

        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);

        let rasterization = vk::PipelineRasterizationStateCreateInfo::default()
            .polygon_mode(self.polygon_mode)
            .cull_mode(self.cull_mode)
            .front_face(self.front_face)
            .line_width(1.0);

        let multisampling =
            vk::PipelineMultisampleStateCreateInfo::default().rasterization_samples(self.samples);

        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(self.depth_test)
            .depth_write_enable(self.depth_write)
            .depth_compare_op(vk::CompareOp::LESS);

        let blend_attachment = if self.alpha_blending {
            vk::PipelineColorBlendAttachmentState::default()
                .blend_enable(true)
                .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
                .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
                .color_blend_op(vk::BlendOp::ADD)
                .src_alpha_blend_factor(vk::BlendFactor::ONE)
                .dst_alpha_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
                .alpha_blend_op(vk::BlendOp::ADD)
                .color_write_mask(vk::ColorComponentFlags::RGBA)
        } else {
            vk::PipelineColorBlendAttachmentState::default()
                .blend_enable(false)
                .color_write_mask(vk::ColorComponentFlags::RGBA)
        };
        let color_blend_attachments = vec![blend_attachment; self.blend_attachment_count()];
        let color_blending =
            vk::PipelineColorBlendStateCreateInfo::default().attachments(&color_blend_attachments);

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state =
            vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

        let layout_info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(&self.set_layouts)
            .push_constant_ranges(&self.push_constant_ranges);
        let layout = unsafe { device.create_pipeline_layout(&layout_info, None) }
            .map_err(|e| VkError::PipelineCreation(e.to_string()))?;

        let mut rendering_info = vk::PipelineRenderingCreateInfo::default();
        let mut pipeline_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&shader_stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization)
            .multisample_state(&multisampling)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blending)
            .dynamic_state(&dynamic_state)
            .layout(layout);

        if let Some(formats) = &self.dynamic_rendering {
            rendering_info = rendering_info.color_attachment_formats(&formats.color_formats);
            if let Some(depth_format) = formats.depth_format {
                rendering_info = rendering_info.depth_attachment_format(depth_format);
            }
            pipeline_info = pipeline_info.push_next(&mut rendering_info);
        } else if let Some((render_pass, subpass)) = self.render_pass {
            pipeline_info = pipeline_info.render_pass(render_pass).subpass(subpass);
        }

        let pipelines = unsafe {
            device.create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
        };
        let pipeline = match pipelines {
            Ok(pipelines) => pipelines[0],
            Err((_, e)) => {
                unsafe { device.destroy_pipeline_layout(layout, None) };
                return Err(VkError::PipelineCreation(e.to_string()));
            }
        };

        tracing::debug!("Graphics pipeline created with {} stages", shader_stages.len());

        Ok(Pipeline { pipeline, layout })
    }
}

unsafe fn destroy_modules(device: &ash::Device, modules: &[vk::ShaderModule]) {
    for &module in modules {
        unsafe { device.destroy_shader_module(module, None) };
    }
}

/// Graphics pipeline wrapper.
pub struct Pipeline {
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
}

impl Pipeline {
    /// Bind the pipeline for graphics work.
    ///
    /// # Safety
    /// The command buffer must be recording.
    pub unsafe fn bind(&self, device: &ash::Device, cmd: vk::CommandBuffer) {
        unsafe {
            device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, self.pipeline);
        }
    }

    /// Bind descriptor sets starting at set 0.
    ///
    /// # Safety
    /// The command buffer must be recording and the sets must match the layout.
    pub unsafe fn bind_descriptor_sets(
        &self,
        device: &ash::Device,
        cmd: vk::CommandBuffer,
        sets: &[vk::DescriptorSet],
    ) {
        unsafe {
            device.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::GRAPHICS,
                self.layout,
                0,
                sets,
                &[],
            );
        }
    }

    /// Push a constant block.
    ///
    /// # Safety
    /// The command buffer must be recording and the range must be declared in the layout.
    pub unsafe fn push_constants<T: Pod>(
        &self,
        device: &ash::Device,
        cmd: vk::CommandBuffer,
        stages: vk::ShaderStageFlags,
        offset: u32,
        value: &T,
    ) {
        unsafe {
            device.cmd_push_constants(cmd, self.layout, stages, offset, bytemuck::bytes_of(value));
        }
    }

    /// Destroy the pipeline.
    ///
    /// # Safety
    /// The pipeline must not be in use.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        unsafe {
            device.destroy_pipeline(self.pipeline, None);
            device.destroy_pipeline_layout(self.layout, None);
        }
    }
}

/// Set a full-extent viewport and scissor.
///
/// # Safety
/// The command buffer must be recording.
pub unsafe fn cmd_set_viewport_scissor(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    extent: vk::Extent2D,
) {
    let viewport = vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: extent.width as f32,
        height: extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    };
    let scissor = vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent,
    };
    unsafe {
        device.cmd_set_viewport(cmd, 0, &[viewport]);
        device.cmd_set_scissor(cmd, 0, &[scissor]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FAKE_SPIRV: [u32; 5] = [SPIRV_MAGIC, 0x0001_0000, 0, 1, 0];

    #[test]
    fn valid_render_pass_pipeline() {
        let builder = PipelineBuilder::new()
            .vertex_shader(&FAKE_SPIRV)
            .fragment_shader(&FAKE_SPIRV)
            .render_pass(vk::RenderPass::null(), 0);
        assert!(builder.validate().is_ok());
    }

    #[test]
    fn rejects_missing_stages() {
        let builder = PipelineBuilder::new().render_pass(vk::RenderPass::null(), 0);
        assert!(matches!(
            builder.validate(),
            Err(VkError::PipelineCreation(_))
        ));
    }

    #[test]
    fn rejects_duplicate_stages() {
        let builder = PipelineBuilder::new()
            .vertex_shader(&FAKE_SPIRV)
            .vertex_shader(&FAKE_SPIRV)
            .render_pass(vk::RenderPass::null(), 0);
        assert!(builder.validate().is_err());
    }

    #[test]
    fn rejects_non_spirv_code() {
        let builder = PipelineBuilder::new()
            .vertex_shader(&[0xDEAD_BEEF, 0, 0])
            .render_pass(vk::RenderPass::null(), 0);
        assert!(matches!(builder.validate(), Err(VkError::ShaderModule(_))));
    }

    #[test]
    fn requires_exactly_one_target() {
        let base = PipelineBuilder::new().vertex_shader(&FAKE_SPIRV);
        assert!(base.clone().validate().is_err());
        assert!(base
            .clone()
            .dynamic_rendering(&[vk::Format::B8G8R8A8_SRGB], None)
            .validate()
            .is_ok());
        assert!(base
            .dynamic_rendering(&[vk::Format::B8G8R8A8_SRGB], None)
            .render_pass(vk::RenderPass::null(), 0)
            .validate()
            .is_err());
    }

    #[test]
    fn blend_attachments_follow_color_formats() {
        let builder = PipelineBuilder::new().dynamic_rendering(
            &[vk::Format::R8G8B8A8_UNORM, vk::Format::R16G16B16A16_SFLOAT],
            Some(vk::Format::D32_SFLOAT),
        );
        assert_eq!(builder.blend_attachment_count(), 2);
        assert_eq!(PipelineBuilder::new().blend_attachment_count(), 1);
    }

    #[test]
    fn blend_attachments_follow_subpass_color_count() {
        let builder = PipelineBuilder::new()
            .vertex_shader(&FAKE_SPIRV)
            .render_pass(vk::RenderPass::null(), 0)
            .color_attachment_count(3);
        assert!(builder.validate().is_ok());
        assert_eq!(builder.blend_attachment_count(), 3);

        let mismatched = PipelineBuilder::new()
            .vertex_shader(&FAKE_SPIRV)
            .dynamic_rendering(&[vk::Format::R8G8B8A8_UNORM], None)
            .color_attachment_count(2);
        assert!(matches!(
            mismatched.validate(),
            Err(VkError::PipelineCreation(_))
        ));
    }

    struct TestVertex;

    impl VertexInput for TestVertex {
        fn bindings() -> Vec<vk::VertexInputBindingDescription> {
            vec![vk::VertexInputBindingDescription {
                binding: 0,
                stride: 20,
                input_rate: vk::VertexInputRate::VERTEX,
            }]
        }

        fn attributes() -> Vec<vk::VertexInputAttributeDescription> {
            vec![vk::VertexInputAttributeDescription {
                location: 0,
                binding: 0,
                format: vk::Format::R32G32_SFLOAT,
                offset: 0,
            }]
        }
    }

    #[test]
    fn vertex_input_uses_trait_layout() {
        let builder = PipelineBuilder::new().vertex_input::<TestVertex>();
        assert_eq!(builder.vertex_bindings.len(), 1);
        assert_eq!(builder.vertex_bindings[0].stride, 20);
        assert_eq!(builder.vertex_attributes[0].format, vk::Format::R32G32_SFLOAT);
    }
}
