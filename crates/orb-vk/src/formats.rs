//! Format queries and image layout transition tables.

use crate::device::Device;
use crate::error::{Result, VkError};
use ash::vk;

/// Depth formats tried in order of preference.
pub const DEPTH_FORMAT_CANDIDATES: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
];

/// Returns `true` for formats with a depth component.
pub fn is_depth_format(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D16_UNORM
            | vk::Format::X8_D24_UNORM_PACK32
            | vk::Format::D32_SFLOAT
            | vk::Format::D16_UNORM_S8_UINT
            | vk::Format::D24_UNORM_S8_UINT
            | vk::Format::D32_SFLOAT_S8_UINT
    )
}

/// Returns `true` for formats with a stencil component.
pub fn has_stencil_component(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::S8_UINT
            | vk::Format::D16_UNORM_S8_UINT
            | vk::Format::D24_UNORM_S8_UINT
            | vk::Format::D32_SFLOAT_S8_UINT
    )
}

/// Image aspect covering every component of `format`.
pub fn aspect_flags(format: vk::Format) -> vk::ImageAspectFlags {
    let mut aspect = vk::ImageAspectFlags::empty();
    if is_depth_format(format) {
        aspect |= vk::ImageAspectFlags::DEPTH;
    }
    if has_stencil_component(format) {
        aspect |= vk::ImageAspectFlags::STENCIL;
    }
    if aspect.is_empty() {
        vk::ImageAspectFlags::COLOR
    } else {
        aspect
    }
}

/// Size in bytes of one texel of an uncompressed format.
///
/// Returns `None` for block-compressed and multi-planar formats.
pub fn texel_size(format: vk::Format) -> Option<u64> {
    use vk::Format as F;

    let size = match format {
        F::R8_UNORM | F::R8_SNORM | F::R8_UINT | F::R8_SINT | F::R8_SRGB | F::S8_UINT => 1,
        F::R8G8_UNORM
        | F::R8G8_SNORM
        | F::R8G8_UINT
        | F::R8G8_SINT
        | F::R8G8_SRGB
        | F::R16_UNORM
        | F::R16_UINT
        | F::R16_SINT
        | F::R16_SFLOAT
        | F::D16_UNORM
        | F::R5G6B5_UNORM_PACK16 => 2,
        F::D16_UNORM_S8_UINT => 3,
        F::R8G8B8A8_UNORM
        | F::R8G8B8A8_SNORM
        | F::R8G8B8A8_UINT
        | F::R8G8B8A8_SINT
        | F::R8G8B8A8_SRGB
        | F::B8G8R8A8_UNORM
        | F::B8G8R8A8_SRGB
        | F::A2B10G10R10_UNORM_PACK32
        | F::B10G11R11_UFLOAT_PACK32
        | F::R16G16_UNORM
        | F::R16G16_SFLOAT
        | F::R32_UINT
        | F::R32_SINT
        | F::R32_SFLOAT
        | F::D32_SFLOAT
        | F::X8_D24_UNORM_PACK32
        | F::D24_UNORM_S8_UINT => 4,
        F::D32_SFLOAT_S8_UINT => 5,
        F::R16G16B16A16_UNORM
        | F::R16G16B16A16_UINT
        | F::R16G16B16A16_SFLOAT
        | F::R32G32_UINT
        | F::R32G32_SINT
        | F::R32G32_SFLOAT => 8,
        F::R32G32B32_SFLOAT => 12,
        F::R32G32B32A32_UINT | F::R32G32B32A32_SINT | F::R32G32B32A32_SFLOAT => 16,
        _ => return None,
    };
    Some(size)
}

/// Returns the first candidate whose tiling supports `features`.
pub fn find_supported_format(
    device: &Device,
    candidates: &[vk::Format],
    tiling: vk::ImageTiling,
    features: vk::FormatFeatureFlags,
) -> Result<vk::Format> {
    select_supported_format(
        candidates,
        |format| device.format_properties(format),
        tiling,
        features,
    )
    .ok_or_else(|| VkError::UnsupportedFormat(format!("none of {candidates:?} supports {features:?}")))
}

/// Find a depth attachment format supported with optimal tiling.
pub fn find_depth_format(device: &Device) -> Result<vk::Format> {
    find_supported_format(
        device,
        &DEPTH_FORMAT_CANDIDATES,
        vk::ImageTiling::OPTIMAL,
        vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
    )
}

fn select_supported_format(
    candidates: &[vk::Format],
    properties: impl Fn(vk::Format) -> vk::FormatProperties,
    tiling: vk::ImageTiling,
    features: vk::FormatFeatureFlags,
) -> Option<vk::Format> {
    candidates.iter().copied().find(|&format| {
        let props = properties(format);
        match tiling {
            vk::ImageTiling::LINEAR => props.linear_tiling_features.contains(features),
            vk::ImageTiling::OPTIMAL => props.optimal_tiling_features.contains(features),
            _ => false,
        }
    })
}

/// Access masks and pipeline stages for an image layout transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutTransition {
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
    pub src_stage: vk::PipelineStageFlags,
    pub dst_stage: vk::PipelineStageFlags,
}

impl LayoutTransition {
    /// Look up the barrier parameters for `old -> new`.
    ///
    /// Pairs without a dedicated entry get a full `ALL_COMMANDS` barrier.
    pub fn between(old: vk::ImageLayout, new: vk::ImageLayout) -> Self {
        use vk::AccessFlags as A;
        use vk::ImageLayout as L;
        use vk::PipelineStageFlags as S;

        let (src_access, dst_access, src_stage, dst_stage) = match (old, new) {
            (L::UNDEFINED, L::TRANSFER_DST_OPTIMAL) => {
                (A::empty(), A::TRANSFER_WRITE, S::TOP_OF_PIPE, S::TRANSFER)
            }
            (L::TRANSFER_DST_OPTIMAL, L::SHADER_READ_ONLY_OPTIMAL) => (
                A::TRANSFER_WRITE,
                A::SHADER_READ,
                S::TRANSFER,
                S::FRAGMENT_SHADER,
            ),
            (L::UNDEFINED, L::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
            | (L::UNDEFINED, L::DEPTH_ATTACHMENT_OPTIMAL) => (
                A::empty(),
                A::DEPTH_STENCIL_ATTACHMENT_READ | A::DEPTH_STENCIL_ATTACHMENT_WRITE,
                S::TOP_OF_PIPE,
                S::EARLY_FRAGMENT_TESTS,
            ),
            (L::UNDEFINED, L::COLOR_ATTACHMENT_OPTIMAL) => (
                A::empty(),
                A::COLOR_ATTACHMENT_WRITE,
                S::TOP_OF_PIPE,
                S::COLOR_ATTACHMENT_OUTPUT,
            ),
            (L::COLOR_ATTACHMENT_OPTIMAL, L::PRESENT_SRC_KHR) => (
                A::COLOR_ATTACHMENT_WRITE,
                A::empty(),
                S::COLOR_ATTACHMENT_OUTPUT,
                S::BOTTOM_OF_PIPE,
            ),
            (L::COLOR_ATTACHMENT_OPTIMAL, L::TRANSFER_SRC_OPTIMAL) => (
                A::COLOR_ATTACHMENT_WRITE,
                A::TRANSFER_READ,
                S::COLOR_ATTACHMENT_OUTPUT,
                S::TRANSFER,
            ),
            (L::TRANSFER_SRC_OPTIMAL, L::PRESENT_SRC_KHR)
            | (L::TRANSFER_DST_OPTIMAL, L::PRESENT_SRC_KHR) => (
                A::TRANSFER_READ | A::TRANSFER_WRITE,
                A::empty(),
                S::TRANSFER,
                S::BOTTOM_OF_PIPE,
            ),
            (L::PRESENT_SRC_KHR, L::TRANSFER_DST_OPTIMAL)
            | (L::PRESENT_SRC_KHR, L::TRANSFER_SRC_OPTIMAL) => (
                A::empty(),
                A::TRANSFER_READ | A::TRANSFER_WRITE,
                S::TRANSFER,
                S::TRANSFER,
            ),
            (L::SHADER_READ_ONLY_OPTIMAL, L::TRANSFER_DST_OPTIMAL) => (
                A::SHADER_READ,
                A::TRANSFER_WRITE,
                S::FRAGMENT_SHADER,
                S::TRANSFER,
            ),
            _ => (
                A::MEMORY_READ | A::MEMORY_WRITE,
                A::MEMORY_READ | A::MEMORY_WRITE,
                S::ALL_COMMANDS,
                S::ALL_COMMANDS,
            ),
        };

        Self {
            src_access,
            dst_access,
            src_stage,
            dst_stage,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_and_stencil_classification() {
        assert!(is_depth_format(vk::Format::D32_SFLOAT));
        assert!(!has_stencil_component(vk::Format::D32_SFLOAT));
        assert!(is_depth_format(vk::Format::D24_UNORM_S8_UINT));
        assert!(has_stencil_component(vk::Format::D24_UNORM_S8_UINT));
        assert!(!is_depth_format(vk::Format::B8G8R8A8_SRGB));
        assert!(has_stencil_component(vk::Format::S8_UINT));
        assert!(!is_depth_format(vk::Format::S8_UINT));
    }

    #[test]
    fn aspect_flags_follow_components() {
        assert_eq!(
            aspect_flags(vk::Format::R8G8B8A8_UNORM),
            vk::ImageAspectFlags::COLOR
        );
        assert_eq!(
            aspect_flags(vk::Format::D32_SFLOAT),
            vk::ImageAspectFlags::DEPTH
        );
        assert_eq!(
            aspect_flags(vk::Format::D32_SFLOAT_S8_UINT),
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        );
    }

    #[test]
    fn texel_sizes() {
        assert_eq!(texel_size(vk::Format::R8G8B8A8_UNORM), Some(4));
        assert_eq!(texel_size(vk::Format::R8_UNORM), Some(1));
        assert_eq!(texel_size(vk::Format::R16G16B16A16_SFLOAT), Some(8));
        assert_eq!(texel_size(vk::Format::R32G32B32A32_SFLOAT), Some(16));
        assert_eq!(texel_size(vk::Format::BC1_RGB_UNORM_BLOCK), None);
        assert_eq!(texel_size(vk::Format::UNDEFINED), None);
    }

    #[test]
    fn first_supported_candidate_wins() {
        let props = |format: vk::Format| {
            if format == vk::Format::D32_SFLOAT {
                vk::FormatProperties::default()
            } else {
                vk::FormatProperties {
                    optimal_tiling_features: vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
                    ..Default::default()
                }
            }
        };
        let found = select_supported_format(
            &DEPTH_FORMAT_CANDIDATES,
            props,
            vk::ImageTiling::OPTIMAL,
            vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
        );
        assert_eq!(found, Some(vk::Format::D32_SFLOAT_S8_UINT));

        let linear = select_supported_format(
            &DEPTH_FORMAT_CANDIDATES,
            props,
            vk::ImageTiling::LINEAR,
            vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
        );
        assert_eq!(linear, None);
    }

    #[test]
    fn upload_transitions() {
        let to_dst = LayoutTransition::between(
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        );
        assert_eq!(to_dst.src_stage, vk::PipelineStageFlags::TOP_OF_PIPE);
        assert_eq!(to_dst.dst_access, vk::AccessFlags::TRANSFER_WRITE);

        let to_read = LayoutTransition::between(
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        );
        assert_eq!(to_read.src_access, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(to_read.dst_stage, vk::PipelineStageFlags::FRAGMENT_SHADER);
    }

    #[test]
    fn unknown_transition_uses_full_barrier() {
        let t = LayoutTransition::between(
            vk::ImageLayout::GENERAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        );
        assert_eq!(t.src_stage, vk::PipelineStageFlags::ALL_COMMANDS);
        assert_eq!(t.dst_stage, vk::PipelineStageFlags::ALL_COMMANDS);
    }
}
