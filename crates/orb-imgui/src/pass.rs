//! Overlay render pass drawing ImGui draw lists on top of the frame.

use crate::error::{ImguiError, Result};
use ash::vk;
use ash::vk::Handle;
use bytemuck::{Pod, Zeroable};
use imgui::internal::RawWrapper;
use imgui::{DrawCmd, DrawCmdParams, DrawData, DrawIdx, DrawVert, TextureId};
use orb_vk::{
    AttachmentSpec, DeferredDeletionQueue, DescriptorPool, DescriptorPoolBuilder,
    DescriptorSetLayoutBuilder, Device, GpuBuffer, GpuImage, ImageBuilder, MemoryLocation,
    Pipeline, PipelineBuilder, RenderPass, RenderPassBuilder, SamplerBuilder, ViewBuilder,
};
use std::mem;

/// Usage and starting size of one kind of geometry buffer.
struct GeometryKind {
    usage: vk::BufferUsageFlags,
    minimum: u64,
    name: &'static str,
}

const VERTICES: GeometryKind = GeometryKind {
    usage: vk::BufferUsageFlags::VERTEX_BUFFER,
    minimum: 64 * 1024,
    name: "imgui_vertices",
};

const INDICES: GeometryKind = GeometryKind {
    usage: vk::BufferUsageFlags::INDEX_BUFFER,
    minimum: 32 * 1024,
    name: "imgui_indices",
};

/// Push constants mapping ImGui display coordinates to clip space.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub(crate) struct DisplayTransform {
    pub scale: [f32; 2],
    pub translate: [f32; 2],
}

impl DisplayTransform {
    pub(crate) fn new(display_pos: [f32; 2], display_size: [f32; 2]) -> Self {
        let scale = [2.0 / display_size[0], 2.0 / display_size[1]];
        Self {
            scale,
            translate: [
                -1.0 - display_pos[0] * scale[0],
                -1.0 - display_pos[1] * scale[1],
            ],
        }
    }
}

/// Clip rectangle of a draw command in framebuffer pixels, or `None` if empty.
pub(crate) fn scissor_rect(
    clip_rect: [f32; 4],
    clip_off: [f32; 2],
    clip_scale: [f32; 2],
    framebuffer: [f32; 2],
) -> Option<vk::Rect2D> {
    let min_x = ((clip_rect[0] - clip_off[0]) * clip_scale[0]).max(0.0);
    let min_y = ((clip_rect[1] - clip_off[1]) * clip_scale[1]).max(0.0);
    let max_x = ((clip_rect[2] - clip_off[0]) * clip_scale[0]).min(framebuffer[0]);
    let max_y = ((clip_rect[3] - clip_off[1]) * clip_scale[1]).min(framebuffer[1]);

    if max_x <= min_x || max_y <= min_y {
        return None;
    }

    Some(vk::Rect2D {
        offset: vk::Offset2D {
            x: min_x as i32,
            y: min_y as i32,
        },
        extent: vk::Extent2D {
            width: (max_x - min_x) as u32,
            height: (max_y - min_y) as u32,
        },
    })
}

fn texture_id_for(set: vk::DescriptorSet) -> TextureId {
    TextureId::new(set.as_raw() as usize)
}

fn descriptor_set_for(id: TextureId) -> vk::DescriptorSet {
    vk::DescriptorSet::from_raw(id.id() as u64)
}

/// Capacity for `required` bytes: the next power of two, at least `minimum`.
pub(crate) fn grown_capacity(required: u64, minimum: u64) -> u64 {
    required.next_power_of_two().max(minimum)
}

/// Host-visible geometry buffers owned by one frame in flight.
#[derive(Default)]
struct FrameGeometry {
    vertices: Option<GpuBuffer>,
    indices: Option<GpuBuffer>,
}

/// Replace `slot` with a larger buffer if it cannot hold `required` bytes.
///
/// The old buffer goes to the deletion queue since earlier frames may still
/// read it.
fn ensure_capacity(
    device: &Device,
    retired: &mut DeferredDeletionQueue,
    frame_number: u64,
    slot: &mut Option<GpuBuffer>,
    required: u64,
    kind: &GeometryKind,
) -> Result<()> {
    if slot.as_ref().is_some_and(|buffer| buffer.size >= required) {
        return Ok(());
    }

    let size = grown_capacity(required, kind.minimum);
    let buffer = device.allocator().lock().create_buffer(
        size,
        kind.usage,
        MemoryLocation::CpuToGpu,
        kind.name,
    )?;
    tracing::debug!("Grew {} to {size} bytes", kind.name);

    if let Some(old) = slot.replace(buffer) {
        retired.queue(old, frame_number);
    }
    Ok(())
}

/// Dear ImGui renderer using its own render pass.
///
/// The pass loads the color attachment in `COLOR_ATTACHMENT_OPTIMAL` and
/// leaves it in `PRESENT_SRC_KHR`.
pub struct ImguiPass {
    render_pass: RenderPass,
    framebuffers: Vec<vk::Framebuffer>,
    pipeline: Pipeline,
    set_layout: vk::DescriptorSetLayout,
    descriptor_pool: DescriptorPool,
    font_set: vk::DescriptorSet,
    font_image: GpuImage,
    font_view: vk::ImageView,
    sampler: vk::Sampler,
    frames: Vec<FrameGeometry>,
    retired: DeferredDeletionQueue,
    frame_number: u64,
}

impl ImguiPass {
    /// Create the pass, upload the font atlas and register it as a texture.
    pub fn new(
        device: &Device,
        pool: &orb_vk::CommandPool,
        context: &mut imgui::Context,
        color_format: vk::Format,
        views: &[vk::ImageView],
        extent: vk::Extent2D,
        frames_in_flight: usize,
    ) -> Result<Self> {
        let raw = device.raw();

        let render_pass = RenderPassBuilder::new()
            .attachment(
                AttachmentSpec::color(color_format)
                    .load_op(vk::AttachmentLoadOp::LOAD)
                    .initial_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
                    .final_layout(vk::ImageLayout::PRESENT_SRC_KHR),
            )
            .build(device)?;
        let framebuffers = render_pass.create_framebuffers(raw, views, &[], extent)?;

        let set_layout = DescriptorSetLayoutBuilder::new()
            .combined_image_sampler(0, vk::ShaderStageFlags::FRAGMENT)
            .build(device)?;

        let binding = vk::VertexInputBindingDescription {
            binding: 0,
            stride: mem::size_of::<DrawVert>() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        };
        let attributes = [
            vk::VertexInputAttributeDescription {
                location: 0,
                binding: 0,
                format: vk::Format::R32G32_SFLOAT,
                offset: 0,
            },
            vk::VertexInputAttributeDescription {
                location: 1,
                binding: 0,
                format: vk::Format::R32G32_SFLOAT,
                offset: 8,
            },
            vk::VertexInputAttributeDescription {
                location: 2,
                binding: 0,
                format: vk::Format::R8G8B8A8_UNORM,
                offset: 16,
            },
        ];

        let pipeline = PipelineBuilder::new()
            .vertex_shader(orb_shaders::imgui_vertex_shader())
            .fragment_shader(orb_shaders::imgui_fragment_shader())
            .vertex_bindings(&[binding])
            .vertex_attributes(&attributes)
            .cull_mode(vk::CullModeFlags::NONE)
            .alpha_blending(true)
            .descriptor_set_layout(set_layout)
            .push_constant_range(
                vk::ShaderStageFlags::VERTEX,
                0,
                mem::size_of::<DisplayTransform>() as u32,
            )
            .render_pass(render_pass.handle(), 0)
            .build(device)?;

        let descriptor_pool = DescriptorPoolBuilder::new()
            .max_sets(1)
            .pool_size(vk::DescriptorType::COMBINED_IMAGE_SAMPLER, 1)
            .build(device)?;
        let font_set = descriptor_pool
            .allocate(raw, &[set_layout])?
            .pop()
            .ok_or_else(|| ImguiError::FontAtlas("no descriptor set allocated".to_string()))?;

        let fonts = context.fonts();
        let atlas = fonts.build_rgba32_texture();
        let font_extent = vk::Extent2D {
            width: atlas.width,
            height: atlas.height,
        };
        let font_image = ImageBuilder::new()
            .extent(font_extent)
            .format(vk::Format::R8G8B8A8_UNORM)
            .usage(vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST)
            .name("imgui_font_atlas")
            .build(device)?
            .pop()
            .ok_or_else(|| ImguiError::FontAtlas("no image created".to_string()))?;
        orb_vk::upload_image(device, pool, &font_image, atlas.data)?;

        let font_view = ViewBuilder::for_image(&font_image)
            .build(raw, &[font_image.image])?
            .pop()
            .ok_or_else(|| ImguiError::FontAtlas("no view created".to_string()))?;
        let sampler = SamplerBuilder::new()
            .filter(vk::Filter::LINEAR)
            .address_mode(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .max_lod(0.0)
            .build(device)?;

        unsafe { orb_vk::write_combined_image_sampler(raw, font_set, 0, font_view, sampler) };
        fonts.tex_id = texture_id_for(font_set);

        tracing::info!(
            "ImGui overlay ready (font atlas {}x{}, {} framebuffers)",
            font_extent.width,
            font_extent.height,
            framebuffers.len()
        );

        let frames_in_flight = frames_in_flight.max(1);
        Ok(Self {
            render_pass,
            framebuffers,
            pipeline,
            set_layout,
            descriptor_pool,
            font_set,
            font_image,
            font_view,
            sampler,
            frames: (0..frames_in_flight).map(|_| FrameGeometry::default()).collect(),
            retired: DeferredDeletionQueue::new(frames_in_flight),
            frame_number: 0,
        })
    }

    /// Texture id of the font atlas.
    pub fn font_texture(&self) -> TextureId {
        texture_id_for(self.font_set)
    }

    /// Number of retired geometry buffers not yet freed.
    pub fn retired_buffers(&self) -> usize {
        self.retired.pending_count()
    }

    /// Recreate framebuffers for new swapchain views.
    pub fn rebuild(
        &mut self,
        device: &ash::Device,
        views: &[vk::ImageView],
        extent: vk::Extent2D,
    ) -> Result<()> {
        unsafe { orb_vk::destroy_framebuffers(device, &self.framebuffers) };
        self.framebuffers.clear();
        self.framebuffers = self.render_pass.create_framebuffers(device, views, &[], extent)?;
        Ok(())
    }

    fn framebuffer(&self, image_index: u32) -> Result<vk::Framebuffer> {
        self.framebuffers
            .get(image_index as usize)
            .copied()
            .ok_or(ImguiError::InvalidImage(image_index))
    }

    fn begin_frame(&mut self, device: &Device) -> Result<()> {
        self.frame_number += 1;
        let mut allocator = device.allocator().lock();
        self.retired.process(&mut allocator, self.frame_number)?;
        Ok(())
    }

    /// Record the overlay pass without drawing, only transitioning the image.
    ///
    /// # Safety
    /// The command buffer must be recording and outside a render pass.
    pub unsafe fn record_empty(
        &mut self,
        device: &Device,
        cmd: vk::CommandBuffer,
        image_index: u32,
        extent: vk::Extent2D,
    ) -> Result<()> {
        self.begin_frame(device)?;
        let framebuffer = self.framebuffer(image_index)?;
        unsafe {
            self.render_pass.begin(device.raw(), cmd, framebuffer, extent, &[]);
            self.render_pass.end(device.raw(), cmd);
        }
        Ok(())
    }

    /// Record the overlay for `draw_data` into the swapchain image.
    ///
    /// `frame` selects the geometry buffers of the frame in flight; its
    /// fence must have been waited on.
    ///
    /// # Safety
    /// The command buffer must be recording and outside a render pass.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub unsafe fn record(
        &mut self,
        device: &Device,
        cmd: vk::CommandBuffer,
        frame: usize,
        image_index: u32,
        extent: vk::Extent2D,
        draw_data: &DrawData,
    ) -> Result<()> {
        self.begin_frame(device)?;
        let framebuffer = self.framebuffer(image_index)?;
        let slot = frame % self.frames.len();

        let vertex_bytes =
            draw_data.total_vtx_count.max(0) as u64 * mem::size_of::<DrawVert>() as u64;
        let index_bytes =
            draw_data.total_idx_count.max(0) as u64 * mem::size_of::<DrawIdx>() as u64;
        let has_geometry = vertex_bytes > 0 && index_bytes > 0;

        if has_geometry {
            let geometry = &mut self.frames[slot];
            ensure_capacity(
                device,
                &mut self.retired,
                self.frame_number,
                &mut geometry.vertices,
                vertex_bytes,
                &VERTICES,
            )?;
            ensure_capacity(
                device,
                &mut self.retired,
                self.frame_number,
                &mut geometry.indices,
                index_bytes,
                &INDICES,
            )?;
            upload_geometry(geometry, draw_data)?;
        }

        let raw = device.raw();
        unsafe { self.render_pass.begin(raw, cmd, framebuffer, extent, &[]) };

        let fb_size = [
            draw_data.display_size[0] * draw_data.framebuffer_scale[0],
            draw_data.display_size[1] * draw_data.framebuffer_scale[1],
        ];
        if has_geometry && fb_size[0] > 0.0 && fb_size[1] > 0.0 {
            unsafe { self.draw(raw, cmd, slot, draw_data, fb_size) };
        }

        unsafe { self.render_pass.end(raw, cmd) };
        Ok(())
    }

    unsafe fn draw(
        &self,
        device: &ash::Device,
        cmd: vk::CommandBuffer,
        slot: usize,
        draw_data: &DrawData,
        fb_size: [f32; 2],
    ) {
        let geometry = &self.frames[slot];
        let (Some(vertices), Some(indices)) = (&geometry.vertices, &geometry.indices) else {
            return;
        };

        let index_type = if mem::size_of::<DrawIdx>() == 2 {
            vk::IndexType::UINT16
        } else {
            vk::IndexType::UINT32
        };
        let transform = DisplayTransform::new(draw_data.display_pos, draw_data.display_size);
        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: fb_size[0],
            height: fb_size[1],
            min_depth: 0.0,
            max_depth: 1.0,
        };

        let reset_state = || unsafe {
            self.pipeline.bind(device, cmd);
            device.cmd_bind_vertex_buffers(cmd, 0, &[vertices.buffer], &[0]);
            device.cmd_bind_index_buffer(cmd, indices.buffer, 0, index_type);
            device.cmd_set_viewport(cmd, 0, &[viewport]);
            self.pipeline
                .push_constants(device, cmd, vk::ShaderStageFlags::VERTEX, 0, &transform);
        };
        reset_state();

        let clip_off = draw_data.display_pos;
        let clip_scale = draw_data.framebuffer_scale;
        let mut vertex_base = 0i32;
        let mut index_base = 0u32;

        for list in draw_data.draw_lists() {
            for command in list.commands() {
                match command {
                    DrawCmd::Elements {
                        count,
                        cmd_params:
                            DrawCmdParams {
                                clip_rect,
                                texture_id,
                                vtx_offset,
                                idx_offset,
                            },
                    } => {
                        let Some(scissor) = scissor_rect(clip_rect, clip_off, clip_scale, fb_size)
                        else {
                            continue;
                        };
                        unsafe {
                            device.cmd_set_scissor(cmd, 0, &[scissor]);
                            self.pipeline.bind_descriptor_sets(
                                device,
                                cmd,
                                &[descriptor_set_for(texture_id)],
                            );
                            device.cmd_draw_indexed(
                                cmd,
                                count as u32,
                                1,
                                index_base + idx_offset as u32,
                                vertex_base + vtx_offset as i32,
                                0,
                            );
                        }
                    }
                    DrawCmd::ResetRenderState => reset_state(),
                    DrawCmd::RawCallback { callback, raw_cmd } => unsafe {
                        callback(list.raw(), raw_cmd);
                    },
                }
            }
            vertex_base += list.vtx_buffer().len() as i32;
            index_base += list.idx_buffer().len() as u32;
        }
    }

    /// Destroy every resource owned by the pass.
    ///
    /// # Safety
    /// The device must be idle.
    pub unsafe fn destroy(&mut self, device: &Device) -> Result<()> {
        let raw = device.raw();
        {
            let mut allocator = device.allocator().lock();
            self.retired.flush(&mut allocator)?;
            for geometry in &mut self.frames {
                for mut buffer in [geometry.vertices.take(), geometry.indices.take()]
                    .into_iter()
                    .flatten()
                {
                    allocator.free_buffer(&mut buffer)?;
                }
            }
            allocator.free_image(&mut self.font_image)?;
        }

        unsafe {
            raw.destroy_sampler(self.sampler, None);
            raw.destroy_image_view(self.font_view, None);
            self.descriptor_pool.destroy(raw);
            raw.destroy_descriptor_set_layout(self.set_layout, None);
            self.pipeline.destroy(raw);
            orb_vk::destroy_framebuffers(raw, &self.framebuffers);
            self.render_pass.destroy(raw);
        }
        self.framebuffers.clear();
        Ok(())
    }
}

/// Copy every draw list into the frame's geometry buffers back to back.
fn upload_geometry(geometry: &FrameGeometry, draw_data: &DrawData) -> Result<()> {
    let (Some(vertices), Some(indices)) = (&geometry.vertices, &geometry.indices) else {
        return Ok(());
    };

    let mut vertex_offset = 0u64;
    let mut index_offset = 0u64;
    for list in draw_data.draw_lists() {
        let vtx = list.vtx_buffer();
        // SAFETY: DrawVert is a repr(C) struct of plain floats and bytes
        let vtx_bytes = unsafe {
            std::slice::from_raw_parts(vtx.as_ptr().cast::<u8>(), mem::size_of_val(vtx))
        };
        vertices.write_bytes(vertex_offset, vtx_bytes)?;
        indices.write_range(index_offset, list.idx_buffer())?;

        vertex_offset += vtx_bytes.len() as u64;
        index_offset += mem::size_of_val(list.idx_buffer()) as u64;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transform_maps_display_to_clip_space() {
        let transform = DisplayTransform::new([0.0, 0.0], [800.0, 600.0]);
        let to_clip = |p: [f32; 2]| {
            [
                p[0] * transform.scale[0] + transform.translate[0],
                p[1] * transform.scale[1] + transform.translate[1],
            ]
        };
        assert_eq!(to_clip([0.0, 0.0]), [-1.0, -1.0]);
        assert_eq!(to_clip([800.0, 600.0]), [1.0, 1.0]);
        assert_eq!(to_clip([400.0, 300.0]), [0.0, 0.0]);
    }

    #[test]
    fn transform_honors_display_offset() {
        let transform = DisplayTransform::new([100.0, 50.0], [200.0, 100.0]);
        assert_eq!(100.0 * transform.scale[0] + transform.translate[0], -1.0);
        assert_eq!(150.0 * transform.scale[1] + transform.translate[1], 1.0);
    }

    #[test]
    fn scissor_scales_and_clamps() {
        let rect = scissor_rect(
            [10.0, 20.0, 110.0, 70.0],
            [0.0, 0.0],
            [2.0, 2.0],
            [1000.0, 1000.0],
        )
        .unwrap();
        assert_eq!((rect.offset.x, rect.offset.y), (20, 40));
        assert_eq!((rect.extent.width, rect.extent.height), (200, 100));

        let clamped = scissor_rect(
            [-50.0, -10.0, 500.0, 400.0],
            [0.0, 0.0],
            [1.0, 1.0],
            [320.0, 240.0],
        )
        .unwrap();
        assert_eq!((clamped.offset.x, clamped.offset.y), (0, 0));
        assert_eq!((clamped.extent.width, clamped.extent.height), (320, 240));
    }

    #[test]
    fn empty_scissor_is_skipped() {
        let fb = [100.0, 100.0];
        assert!(scissor_rect([50.0, 50.0, 50.0, 80.0], [0.0, 0.0], [1.0, 1.0], fb).is_none());
        assert!(scissor_rect([200.0, 0.0, 300.0, 10.0], [0.0, 0.0], [1.0, 1.0], fb).is_none());
    }

    #[test]
    fn texture_ids_round_trip_descriptor_sets() {
        let set = vk::DescriptorSet::from_raw(0xdead_beef);
        assert_eq!(descriptor_set_for(texture_id_for(set)), set);
    }

    #[test]
    fn buffers_grow_to_powers_of_two() {
        assert_eq!(grown_capacity(10, 1024), 1024);
        assert_eq!(grown_capacity(1025, 1024), 2048);
        assert_eq!(grown_capacity(70_000, 65_536), 131_072);
    }
}
