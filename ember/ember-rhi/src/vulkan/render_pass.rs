//! VkRenderPass creation from a framebuffer signature.

use std::any::Any;
use std::sync::Arc;

use ash::vk;

use crate::{RenderPass, RenderPassInfo, RhiResult};

use super::{format_to_vk, load_op_to_vk, sample_count_to_vk, state_to_layout, vk_err};

/// Build a VkRenderPass whose attachments enter and leave in the layouts the
/// barrier system already established: the pass itself never transitions.
pub(crate) fn create_raw_render_pass(
    device: &ash::Device,
    info: &RenderPassInfo,
) -> RhiResult<vk::RenderPass> {
    let mut attachments = Vec::new();
    let mut color_refs = Vec::new();
    let mut depth_ref = None;

    for (i, att) in info.color_attachments.iter().enumerate() {
        attachments.push(
            vk::AttachmentDescription::default()
                .format(format_to_vk(att.format))
                .samples(sample_count_to_vk(att.sample_count))
                .load_op(load_op_to_vk(att.load_op))
                .store_op(vk::AttachmentStoreOp::STORE)
                .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                .initial_layout(state_to_layout(att.initial_state))
                .final_layout(state_to_layout(att.initial_state)),
        );
        color_refs.push(
            vk::AttachmentReference::default()
                .attachment(i as u32)
                .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL),
        );
    }

    if let Some(depth) = &info.depth_stencil {
        let index = attachments.len();
        attachments.push(
            vk::AttachmentDescription::default()
                .format(format_to_vk(depth.format))
                .samples(sample_count_to_vk(depth.sample_count))
                .load_op(load_op_to_vk(depth.load_op))
                .store_op(vk::AttachmentStoreOp::STORE)
                .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                .initial_layout(state_to_layout(depth.initial_state))
                .final_layout(state_to_layout(depth.initial_state)),
        );
        depth_ref = Some(
            vk::AttachmentReference::default()
                .attachment(index as u32)
                .layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL),
        );
    }

    let subpass = if let Some(ref depth) = depth_ref {
        vk::SubpassDescription::default()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_refs)
            .depth_stencil_attachment(depth)
    } else {
        vk::SubpassDescription::default()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_refs)
    };

    let create_info = vk::RenderPassCreateInfo::default()
        .attachments(&attachments)
        .subpasses(std::slice::from_ref(&subpass));

    unsafe { device.create_render_pass(&create_info, None).map_err(vk_err) }
}

pub(crate) fn create_render_pass(
    device: Arc<ash::Device>,
    info: &RenderPassInfo,
) -> RhiResult<VulkanRenderPass> {
    let render_pass = create_raw_render_pass(&device, info)?;
    Ok(VulkanRenderPass {
        device,
        render_pass,
        info: info.clone(),
    })
}

pub struct VulkanRenderPass {
    device: Arc<ash::Device>,
    pub(crate) render_pass: vk::RenderPass,
    info: RenderPassInfo,
}

impl Drop for VulkanRenderPass {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_render_pass(self.render_pass, None);
        }
    }
}

impl std::fmt::Debug for VulkanRenderPass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanRenderPass")
            .field("color_attachments", &self.info.color_attachments.len())
            .field("extent", &(self.info.width, self.info.height))
            .finish()
    }
}

impl RenderPass for VulkanRenderPass {
    fn info(&self) -> &RenderPassInfo {
        &self.info
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
