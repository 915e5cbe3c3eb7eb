//! Render pass and framebuffer creation.

use crate::device::Device;
use crate::error::{Result, VkError};
use crate::formats::{has_stencil_component, is_depth_format};
use ash::vk;

/// Description of one render pass attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttachmentSpec {
    pub format: vk::Format,
    pub samples: vk::SampleCountFlags,
    pub load_op: vk::AttachmentLoadOp,
    pub store_op: vk::AttachmentStoreOp,
    pub stencil_load_op: vk::AttachmentLoadOp,
    pub stencil_store_op: vk::AttachmentStoreOp,
    pub initial_layout: vk::ImageLayout,
    pub final_layout: vk::ImageLayout,
}

impl AttachmentSpec {
    /// Cleared color attachment that ends ready for presentation.
    pub fn color(format: vk::Format) -> Self {
        Self {
            format,
            samples: vk::SampleCountFlags::TYPE_1,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::STORE,
            stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
            stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            final_layout: vk::ImageLayout::PRESENT_SRC_KHR,
        }
    }

    /// Cleared depth attachment whose contents are discarded after the pass.
    pub fn depth(format: vk::Format) -> Self {
        Self {
            format,
            samples: vk::SampleCountFlags::TYPE_1,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::DONT_CARE,
            stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
            stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            final_layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        }
    }

    pub fn samples(mut self, samples: vk::SampleCountFlags) -> Self {
        self.samples = samples;
        self
    }

    pub fn load_op(mut self, op: vk::AttachmentLoadOp) -> Self {
        self.load_op = op;
        self
    }

    pub fn store_op(mut self, op: vk::AttachmentStoreOp) -> Self {
        self.store_op = op;
        self
    }

    pub fn stencil_ops(mut self, load: vk::AttachmentLoadOp, store: vk::AttachmentStoreOp) -> Self {
        self.stencil_load_op = load;
        self.stencil_store_op = store;
        self
    }

    pub fn initial_layout(mut self, layout: vk::ImageLayout) -> Self {
        self.initial_layout = layout;
        self
    }

    pub fn final_layout(mut self, layout: vk::ImageLayout) -> Self {
        self.final_layout = layout;
        self
    }

    /// Returns `true` for depth and/or stencil formats.
    pub fn is_depth(&self) -> bool {
        is_depth_format(self.format) || has_stencil_component(self.format)
    }

    fn description(&self) -> vk::AttachmentDescription {
        vk::AttachmentDescription::default()
            .format(self.format)
            .samples(self.samples)
            .load_op(self.load_op)
            .store_op(self.store_op)
            .stencil_load_op(self.stencil_load_op)
            .stencil_store_op(self.stencil_store_op)
            .initial_layout(self.initial_layout)
            .final_layout(self.final_layout)
    }
}

/// Attachment indices used by one graphics subpass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubpassSpec {
    pub color: Vec<u32>,
    pub depth: Option<u32>,
}

impl SubpassSpec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a color attachment reference.
    pub fn color(mut self, attachment: u32) -> Self {
        self.color.push(attachment);
        self
    }

    /// Set the depth attachment reference.
    pub fn depth(mut self, attachment: u32) -> Self {
        self.depth = Some(attachment);
        self
    }
}

/// Builder for [`RenderPass`].
#[derive(Debug, Clone, Default)]
pub struct RenderPassBuilder {
    attachments: Vec<AttachmentSpec>,
    subpasses: Vec<SubpassSpec>,
    dependencies: Vec<vk::SubpassDependency>,
}

impl RenderPassBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an attachment.
    pub fn attachment(mut self, spec: AttachmentSpec) -> Self {
        self.attachments.push(spec);
        self
    }

    /// Add a cleared color attachment with the given final layout.
    pub fn color_attachment(self, format: vk::Format, final_layout: vk::ImageLayout) -> Self {
        self.attachment(AttachmentSpec::color(format).final_layout(final_layout))
    }

    /// Add a cleared depth attachment.
    pub fn depth_attachment(self, format: vk::Format) -> Self {
        self.attachment(AttachmentSpec::depth(format))
    }

    /// Add an explicit subpass.
    pub fn subpass(mut self, subpass: SubpassSpec) -> Self {
        self.subpasses.push(subpass);
        self
    }

    /// Add an explicit subpass dependency.
    pub fn dependency(mut self, dependency: vk::SubpassDependency) -> Self {
        self.dependencies.push(dependency);
        self
    }

    /// Resolve subpasses and dependencies, applying defaults and validating.
    fn resolve(&self) -> Result<(Vec<SubpassSpec>, Vec<vk::SubpassDependency>)> {
        if self.attachments.is_empty() {
            return Err(VkError::InvalidArgument(
                "render pass needs at least one attachment".to_string(),
            ));
        }

        let subpasses = if self.subpasses.is_empty() {
            vec![default_subpass(&self.attachments)?]
        } else {
            self.subpasses.clone()
        };

        for subpass in &subpasses {
            validate_subpass(&self.attachments, subpass)?;
        }

        let dependencies = if self.dependencies.is_empty() {
            vec![default_dependency(&self.attachments, &subpasses[0])]
        } else {
            self.dependencies.clone()
        };

        Ok((subpasses, dependencies))
    }

    /// Create the render pass.
    pub fn build(&self, device: &Device) -> Result<RenderPass> {
        let (subpasses, dependencies) = self.resolve()?;

        let descriptions: Vec<vk::AttachmentDescription> =
            self.attachments.iter().map(AttachmentSpec::description).collect();

        let color_refs: Vec<Vec<vk::AttachmentReference>> = subpasses
            .iter()
            .map(|subpass| {
                subpass
                    .color
                    .iter()
                    .map(|&attachment| vk::AttachmentReference {
                        attachment,
                        layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                    })
                    .collect()
            })
            .collect();
        let depth_refs: Vec<Option<vk::AttachmentReference>> = subpasses
            .iter()
            .map(|subpass| {
                subpass.depth.map(|attachment| vk::AttachmentReference {
                    attachment,
                    layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
                })
            })
            .collect();

        let subpass_descriptions: Vec<vk::SubpassDescription> = color_refs
            .iter()
            .zip(&depth_refs)
            .map(|(colors, depth)| {
                let description = vk::SubpassDescription::default()
                    .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
                    .color_attachments(colors);
                match depth {
                    Some(depth) => description.depth_stencil_attachment(depth),
                    None => description,
                }
            })
            .collect();

        let create_info = vk::RenderPassCreateInfo::default()
            .attachments(&descriptions)
            .subpasses(&subpass_descriptions)
            .dependencies(&dependencies);

        let render_pass = unsafe { device.raw().create_render_pass(&create_info, None)? };

        tracing::debug!(
            "Render pass created: {} attachments, {} subpasses",
            descriptions.len(),
            subpass_descriptions.len()
        );

        Ok(RenderPass {
            render_pass,
            attachment_count: descriptions.len(),
        })
    }
}

/// One subpass over every color attachment and the single depth attachment.
fn default_subpass(attachments: &[AttachmentSpec]) -> Result<SubpassSpec> {
    let mut subpass = SubpassSpec::new();
    for (index, attachment) in attachments.iter().enumerate() {
        let index = index as u32;
        if attachment.is_depth() {
            if subpass.depth.is_some() {
                return Err(VkError::InvalidArgument(
                    "more than one depth attachment needs an explicit subpass".to_string(),
                ));
            }
            subpass.depth = Some(index);
        } else {
            subpass.color.push(index);
        }
    }
    Ok(subpass)
}

fn validate_subpass(attachments: &[AttachmentSpec], subpass: &SubpassSpec) -> Result<()> {
    let lookup = |index: u32| {
        attachments.get(index as usize).ok_or_else(|| {
            VkError::InvalidArgument(format!(
                "subpass references attachment {index} but only {} exist",
                attachments.len()
            ))
        })
    };

    for &index in &subpass.color {
        if lookup(index)?.is_depth() {
            return Err(VkError::InvalidArgument(format!(
                "attachment {index} is a depth format but used as color"
            )));
        }
    }
    if let Some(index) = subpass.depth {
        if !lookup(index)?.is_depth() {
            return Err(VkError::InvalidArgument(format!(
                "attachment {index} is a color format but used as depth"
            )));
        }
    }
    Ok(())
}

/// `EXTERNAL -> 0` dependency guarding attachment access.
///
/// Loaded color attachments wait on earlier color writes and make them
/// visible to the load. Depth waits on both fragment test stages because the
/// depth image is shared across frames in flight.
fn default_dependency(
    attachments: &[AttachmentSpec],
    subpass: &SubpassSpec,
) -> vk::SubpassDependency {
    let mut src_stages = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT;
    let mut dst_stages = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT;
    let mut src_access = vk::AccessFlags::empty();
    let mut dst_access = vk::AccessFlags::COLOR_ATTACHMENT_WRITE;

    let loads_color = subpass
        .color
        .iter()
        .filter_map(|&index| attachments.get(index as usize))
        .any(|attachment| attachment.load_op == vk::AttachmentLoadOp::LOAD);
    if loads_color {
        src_access |= vk::AccessFlags::COLOR_ATTACHMENT_WRITE;
        dst_access |= vk::AccessFlags::COLOR_ATTACHMENT_READ;
    }

    if let Some(depth) = subpass.depth.and_then(|index| attachments.get(index as usize)) {
        let tests = vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
            | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS;
        src_stages |= tests;
        dst_stages |= tests;
        src_access |= vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE;
        dst_access |= vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE;
        if depth.load_op == vk::AttachmentLoadOp::LOAD {
            dst_access |= vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ;
        }
    }

    vk::SubpassDependency::default()
        .src_subpass(vk::SUBPASS_EXTERNAL)
        .dst_subpass(0)
        .src_stage_mask(src_stages)
        .src_access_mask(src_access)
        .dst_stage_mask(dst_stages)
        .dst_access_mask(dst_access)
}

/// Render pass wrapper.
pub struct RenderPass {
    render_pass: vk::RenderPass,
    attachment_count: usize,
}

impl RenderPass {
    /// Get the raw render pass handle.
    pub fn handle(&self) -> vk::RenderPass {
        self.render_pass
    }

    /// Number of attachments each framebuffer must provide.
    pub fn attachment_count(&self) -> usize {
        self.attachment_count
    }

    /// Create one framebuffer per color view.
    ///
    /// Each framebuffer uses `[color_view, shared_views...]`, e.g. a single
    /// depth view shared by every swapchain image.
    pub fn create_framebuffers(
        &self,
        device: &ash::Device,
        color_views: &[vk::ImageView],
        shared_views: &[vk::ImageView],
        extent: vk::Extent2D,
    ) -> Result<Vec<vk::Framebuffer>> {
        if 1 + shared_views.len() != self.attachment_count {
            return Err(VkError::InvalidArgument(format!(
                "render pass has {} attachments but {} views were given per framebuffer",
                self.attachment_count,
                1 + shared_views.len()
            )));
        }

        let mut framebuffers = Vec::with_capacity(color_views.len());
        for &color_view in color_views {
            let mut views = Vec::with_capacity(self.attachment_count);
            views.push(color_view);
            views.extend_from_slice(shared_views);

            let create_info = vk::FramebufferCreateInfo::default()
                .render_pass(self.render_pass)
                .attachments(&views)
                .width(extent.width)
                .height(extent.height)
                .layers(1);

            match unsafe { device.create_framebuffer(&create_info, None) } {
                Ok(framebuffer) => framebuffers.push(framebuffer),
                Err(e) => {
                    unsafe { destroy_framebuffers(device, &framebuffers) };
                    return Err(e.into());
                }
            }
        }

        Ok(framebuffers)
    }

    /// Begin the render pass with inline subpass contents.
    ///
    /// # Safety
    /// The command buffer must be recording and outside a render pass.
    pub unsafe fn begin(
        &self,
        device: &ash::Device,
        cmd: vk::CommandBuffer,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
        clear_values: &[vk::ClearValue],
    ) {
        let begin_info = vk::RenderPassBeginInfo::default()
            .render_pass(self.render_pass)
            .framebuffer(framebuffer)
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            })
            .clear_values(clear_values);

        unsafe { device.cmd_begin_render_pass(cmd, &begin_info, vk::SubpassContents::INLINE) };
    }

    /// End the render pass.
    ///
    /// # Safety
    /// The command buffer must be inside this render pass.
    pub unsafe fn end(&self, device: &ash::Device, cmd: vk::CommandBuffer) {
        unsafe { device.cmd_end_render_pass(cmd) };
    }

    /// Destroy the render pass.
    ///
    /// # Safety
    /// The render pass must not be in use.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        unsafe { device.destroy_render_pass(self.render_pass, None) };
    }
}

/// Destroy framebuffers.
///
/// # Safety
/// The framebuffers must not be in use.
pub unsafe fn destroy_framebuffers(device: &ash::Device, framebuffers: &[vk::Framebuffer]) {
    for &framebuffer in framebuffers {
        unsafe { device.destroy_framebuffer(framebuffer, None) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_subpass_uses_all_attachments() {
        let (subpasses, dependencies) = RenderPassBuilder::new()
            .color_attachment(vk::Format::B8G8R8A8_SRGB, vk::ImageLayout::PRESENT_SRC_KHR)
            .depth_attachment(vk::Format::D32_SFLOAT)
            .resolve()
            .unwrap();

        assert_eq!(subpasses, vec![SubpassSpec::new().color(0).depth(1)]);
        assert_eq!(dependencies.len(), 1);
        assert_eq!(dependencies[0].src_subpass, vk::SUBPASS_EXTERNAL);
        assert!(dependencies[0]
            .dst_stage_mask
            .contains(vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS));
    }

    #[test]
    fn color_only_dependency() {
        let (_, dependencies) = RenderPassBuilder::new()
            .color_attachment(vk::Format::B8G8R8A8_SRGB, vk::ImageLayout::PRESENT_SRC_KHR)
            .resolve()
            .unwrap();
        assert_eq!(
            dependencies[0].dst_stage_mask,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
        );
        assert_eq!(
            dependencies[0].dst_access_mask,
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE
        );
    }

    #[test]
    fn loaded_color_waits_on_prior_writes() {
        // Same chain the overlay pass uses on top of the main pass.
        let (_, dependencies) = RenderPassBuilder::new()
            .attachment(
                AttachmentSpec::color(vk::Format::B8G8R8A8_SRGB)
                    .load_op(vk::AttachmentLoadOp::LOAD)
                    .initial_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
                    .final_layout(vk::ImageLayout::PRESENT_SRC_KHR),
            )
            .resolve()
            .unwrap();
        let dependency = dependencies[0];
        assert_eq!(
            dependency.src_access_mask,
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE
        );
        assert!(dependency.dst_access_mask.contains(
            vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE
        ));
        assert!(dependency
            .src_stage_mask
            .contains(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT));
    }

    #[test]
    fn shared_depth_waits_on_late_fragment_tests() {
        let (_, dependencies) = RenderPassBuilder::new()
            .color_attachment(vk::Format::B8G8R8A8_SRGB, vk::ImageLayout::PRESENT_SRC_KHR)
            .depth_attachment(vk::Format::D32_SFLOAT)
            .resolve()
            .unwrap();
        let dependency = dependencies[0];
        assert!(dependency
            .src_stage_mask
            .contains(vk::PipelineStageFlags::LATE_FRAGMENT_TESTS));
        assert!(dependency
            .src_access_mask
            .contains(vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE));
        assert!(dependency
            .dst_access_mask
            .contains(vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE));
        // Cleared color has nothing to wait on.
        assert!(!dependency
            .src_access_mask
            .contains(vk::AccessFlags::COLOR_ATTACHMENT_WRITE));
    }

    #[test]
    fn explicit_dependencies_replace_default() {
        let custom = vk::SubpassDependency::default()
            .src_subpass(vk::SUBPASS_EXTERNAL)
            .dst_subpass(0)
            .src_stage_mask(vk::PipelineStageFlags::TRANSFER)
            .dst_stage_mask(vk::PipelineStageFlags::FRAGMENT_SHADER);
        let (_, dependencies) = RenderPassBuilder::new()
            .color_attachment(vk::Format::B8G8R8A8_SRGB, vk::ImageLayout::PRESENT_SRC_KHR)
            .dependency(custom)
            .resolve()
            .unwrap();
        assert_eq!(dependencies.len(), 1);
        assert_eq!(
            dependencies[0].src_stage_mask,
            vk::PipelineStageFlags::TRANSFER
        );
    }

    #[test]
    fn rejects_out_of_range_reference() {
        let result = RenderPassBuilder::new()
            .color_attachment(vk::Format::B8G8R8A8_SRGB, vk::ImageLayout::PRESENT_SRC_KHR)
            .subpass(SubpassSpec::new().color(0).color(3))
            .resolve();
        assert!(matches!(result, Err(VkError::InvalidArgument(_))));
    }

    #[test]
    fn rejects_mismatched_attachment_kinds() {
        let builder = RenderPassBuilder::new()
            .color_attachment(vk::Format::B8G8R8A8_SRGB, vk::ImageLayout::PRESENT_SRC_KHR)
            .depth_attachment(vk::Format::D24_UNORM_S8_UINT);

        let depth_as_color = builder.clone().subpass(SubpassSpec::new().color(1));
        assert!(depth_as_color.resolve().is_err());

        let color_as_depth = builder.subpass(SubpassSpec::new().color(0).depth(0));
        assert!(color_as_depth.resolve().is_err());
    }

    #[test]
    fn rejects_two_implicit_depth_attachments() {
        let result = RenderPassBuilder::new()
            .depth_attachment(vk::Format::D32_SFLOAT)
            .depth_attachment(vk::Format::D32_SFLOAT)
            .resolve();
        assert!(result.is_err());
    }

    #[test]
    fn rejects_empty_render_pass() {
        assert!(RenderPassBuilder::new().resolve().is_err());
    }

    #[test]
    fn overlay_attachment_loads_previous_contents() {
        let spec = AttachmentSpec::color(vk::Format::B8G8R8A8_SRGB)
            .load_op(vk::AttachmentLoadOp::LOAD)
            .initial_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
        assert_eq!(spec.load_op, vk::AttachmentLoadOp::LOAD);
        assert_eq!(spec.final_layout, vk::ImageLayout::PRESENT_SRC_KHR);
        assert!(!spec.is_depth());
    }
}
