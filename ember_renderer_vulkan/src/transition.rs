/// Layout transitions - image memory barrier selection and recording
///
/// Maps (old layout, new layout) pairs to the access masks and pipeline
/// stages of a single VkImageMemoryBarrier. Source and destination scopes
/// are selected independently: the source side depends only on the old
/// layout, the destination side only on the new one.

use ash::vk;
use crate::error::{Error, Result};

/// Image layouts the renderer tracks
///
/// Closed set: every layout a resource can occupy between operations has a
/// variant here, so barrier selection can match exhaustively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageLayout {
    /// Initial layout of a freshly created image, contents undefined
    Undefined,
    /// Destination of a buffer-to-image or image-to-image copy
    TransferDst,
    /// Sampled by shaders (read-only)
    ShaderReadOnly,
    /// Written as a color attachment
    ColorAttachment,
    /// Written as a depth/stencil attachment
    DepthAttachment,
    /// Handed to the presentation engine
    PresentSrc,
}

impl ImageLayout {
    /// Convert to the Vulkan image layout
    pub fn to_vk(self) -> vk::ImageLayout {
        match self {
            ImageLayout::Undefined => vk::ImageLayout::UNDEFINED,
            ImageLayout::TransferDst => vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            ImageLayout::ShaderReadOnly => vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            ImageLayout::ColorAttachment => vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            ImageLayout::DepthAttachment => vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            ImageLayout::PresentSrc => vk::ImageLayout::PRESENT_SRC_KHR,
        }
    }
}

/// Access masks and pipeline stages for one image memory barrier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BarrierScopes {
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
    pub src_stage: vk::PipelineStageFlags,
    pub dst_stage: vk::PipelineStageFlags,
}

/// Source access mask and stage for leaving `old`
///
/// `shader_read_src_stage` names the pipeline stage that last sampled the
/// image; it is only consulted when the old layout is ShaderReadOnly, since
/// that is the one case the layout alone cannot answer.
fn source_scope(
    old: ImageLayout,
    shader_read_src_stage: vk::PipelineStageFlags,
) -> Option<(vk::AccessFlags, vk::PipelineStageFlags)> {
    match old {
        ImageLayout::Undefined => Some((
            vk::AccessFlags::empty(),
            vk::PipelineStageFlags::TOP_OF_PIPE,
        )),
        ImageLayout::TransferDst => Some((
            vk::AccessFlags::TRANSFER_WRITE,
            vk::PipelineStageFlags::TRANSFER,
        )),
        ImageLayout::ShaderReadOnly => Some((
            vk::AccessFlags::SHADER_READ,
            shader_read_src_stage,
        )),
        ImageLayout::ColorAttachment => Some((
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        )),
        ImageLayout::PresentSrc => Some((
            vk::AccessFlags::COLOR_ATTACHMENT_READ,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        )),
        // Depth images never leave attachment use through this path
        ImageLayout::DepthAttachment => None,
    }
}

/// Destination access mask and stage for entering `new`
fn destination_scope(new: ImageLayout) -> Option<(vk::AccessFlags, vk::PipelineStageFlags)> {
    match new {
        ImageLayout::TransferDst => Some((
            vk::AccessFlags::TRANSFER_WRITE,
            vk::PipelineStageFlags::TRANSFER,
        )),
        ImageLayout::ShaderReadOnly => Some((
            vk::AccessFlags::SHADER_READ,
            vk::PipelineStageFlags::FRAGMENT_SHADER,
        )),
        ImageLayout::ColorAttachment => Some((
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        )),
        ImageLayout::DepthAttachment => Some((
            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
        )),
        ImageLayout::PresentSrc => Some((
            vk::AccessFlags::COLOR_ATTACHMENT_READ,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        )),
        // Transitioning INTO Undefined discards contents and is never wanted
        ImageLayout::Undefined => None,
    }
}

/// Select barrier scopes for an (old, new) layout pair
///
/// Pure function: the same inputs always produce the same scopes, and
/// nothing is recorded. Pairs with no defined scope (leaving DepthAttachment,
/// entering Undefined) are a caller bug and come back as
/// `Error::UnsupportedLayoutTransition`.
///
/// # Arguments
///
/// * `old` - Layout the image currently holds
/// * `new` - Layout the image is moving to
/// * `shader_read_src_stage` - Stage that last sampled the image; only
///   consulted when `old` is ShaderReadOnly
pub fn barrier_scopes(
    old: ImageLayout,
    new: ImageLayout,
    shader_read_src_stage: vk::PipelineStageFlags,
) -> Result<BarrierScopes> {
    let (src_access, src_stage) = source_scope(old, shader_read_src_stage)
        .ok_or(Error::UnsupportedLayoutTransition { old, new })?;
    let (dst_access, dst_stage) = destination_scope(new)
        .ok_or(Error::UnsupportedLayoutTransition { old, new })?;

    Ok(BarrierScopes {
        src_access,
        dst_access,
        src_stage,
        dst_stage,
    })
}

/// Record a single layout transition barrier into a command buffer
///
/// Validates the (old, new) pair first; nothing is recorded when the pair
/// has no defined scopes.
#[allow(clippy::too_many_arguments)]
pub fn record_layout_transition(
    device: &ash::Device,
    command_buffer: vk::CommandBuffer,
    image: vk::Image,
    aspect_mask: vk::ImageAspectFlags,
    mip_levels: u32,
    old: ImageLayout,
    new: ImageLayout,
    shader_read_src_stage: vk::PipelineStageFlags,
) -> Result<()> {
    let scopes = barrier_scopes(old, new, shader_read_src_stage)?;

    let barrier = vk::ImageMemoryBarrier::default()
        .old_layout(old.to_vk())
        .new_layout(new.to_vk())
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask,
            base_mip_level: 0,
            level_count: mip_levels,
            base_array_layer: 0,
            layer_count: 1,
        })
        .src_access_mask(scopes.src_access)
        .dst_access_mask(scopes.dst_access);

    unsafe {
        device.cmd_pipeline_barrier(
            command_buffer,
            scopes.src_stage,
            scopes.dst_stage,
            vk::DependencyFlags::empty(),
            &[],
            &[],
            &[barrier],
        );
    }

    Ok(())
}

#[cfg(test)]
#[path = "transition_tests.rs"]
mod tests;
