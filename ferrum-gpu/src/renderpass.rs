//! Render pass and framebuffer translation.

use std::sync::Arc;

use ash::vk;

use crate::conv;
use crate::device::{Device, DeviceShared};
use crate::DeviceError;

pub struct RenderPass {
    shared: Arc<DeviceShared>,
    raw: vk::RenderPass,
    attachment_count: u32,
}

fn map_subpass_index(index: u32, subpass_count: u32) -> u32 {
    if index < subpass_count {
        index
    } else {
        vk::SUBPASS_EXTERNAL
    }
}

struct SubpassReferences {
    input: Vec<vk::AttachmentReference>,
    color: Vec<vk::AttachmentReference>,
    resolve: Vec<vk::AttachmentReference>,
    depth_stencil: Option<vk::AttachmentReference>,
    preserve: Vec<u32>,
}

fn map_references(attachments: &[fe::SubpassAttachment]) -> Vec<vk::AttachmentReference> {
    attachments
        .iter()
        .map(|attachment| vk::AttachmentReference {
            attachment: attachment.index,
            layout: conv::map_resource_state_layout(attachment.state),
        })
        .collect()
}

impl RenderPass {
    pub fn new(device: &Device, desc: &fe::RenderPassDesc) -> Result<Self, fe::ErrorKind> {
        profiling::scope!("RenderPass::new");

        let attachments: Vec<vk::AttachmentDescription> = desc
            .attachments
            .iter()
            .map(|attachment| vk::AttachmentDescription {
                format: conv::map_format(attachment.format),
                samples: conv::map_sample_count(attachment.sample_count),
                load_op: conv::map_load_op(attachment.load_op),
                store_op: conv::map_store_op(attachment.store_op),
                stencil_load_op: conv::map_load_op(attachment.stencil_load_op),
                stencil_store_op: conv::map_store_op(attachment.stencil_store_op),
                initial_layout: conv::map_resource_state_layout(attachment.initial_state),
                final_layout: conv::map_resource_state_layout(attachment.final_state),
                ..Default::default()
            })
            .collect();

        let references: Vec<SubpassReferences> = desc
            .subpasses
            .iter()
            .map(|subpass| SubpassReferences {
                input: map_references(&subpass.input_attachments),
                color: map_references(&subpass.render_target_attachments),
                resolve: map_references(&subpass.msaa_resolve_attachments),
                depth_stencil: subpass.depth_stencil_attachment.map(|attachment| {
                    vk::AttachmentReference {
                        attachment: attachment.index,
                        layout: conv::map_resource_state_layout(attachment.state),
                    }
                }),
                preserve: subpass.preserve_attachments.clone(),
            })
            .collect();

        let subpasses: Vec<vk::SubpassDescription> = references
            .iter()
            .map(|refs| {
                let mut builder = vk::SubpassDescription::builder()
                    .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
                    .input_attachments(&refs.input)
                    .color_attachments(&refs.color)
                    .preserve_attachments(&refs.preserve);
                if !refs.resolve.is_empty() {
                    builder = builder.resolve_attachments(&refs.resolve);
                }
                if let Some(depth_stencil) = refs.depth_stencil.as_ref() {
                    builder = builder.depth_stencil_attachment(depth_stencil);
                }
                builder.build()
            })
            .collect();

        let subpass_count = desc.subpasses.len() as u32;
        let dependencies: Vec<vk::SubpassDependency> = desc
            .dependencies
            .iter()
            .map(|dependency| vk::SubpassDependency {
                src_subpass: map_subpass_index(dependency.src_subpass, subpass_count),
                dst_subpass: map_subpass_index(dependency.dst_subpass, subpass_count),
                src_stage_mask: conv::map_pipeline_stages(dependency.src_stage),
                dst_stage_mask: conv::map_pipeline_stages(dependency.dst_stage),
                src_access_mask: conv::map_resource_state_access(dependency.src_state),
                dst_access_mask: conv::map_resource_state_access(dependency.dst_state),
                ..Default::default()
            })
            .collect();

        let create_info = vk::RenderPassCreateInfo::builder()
            .attachments(&attachments)
            .subpasses(&subpasses)
            .dependencies(&dependencies);

        let raw = unsafe { device.raw().create_render_pass(&create_info, None) }
            .map_err(|error| fe::ErrorKind::from(DeviceError::from(error)))?;

        Ok(Self {
            shared: Arc::clone(device.shared()),
            raw,
            attachment_count: desc.attachments.len() as u32,
        })
    }

    pub fn attachment_count(&self) -> u32 {
        self.attachment_count
    }

    pub(crate) fn raw(&self) -> vk::RenderPass {
        self.raw
    }

    /// # Safety
    ///
    /// - The render pass handle must not be manually destroyed
    pub unsafe fn raw_handle(&self) -> vk::RenderPass {
        self.raw
    }
}

impl Drop for RenderPass {
    fn drop(&mut self) {
        unsafe { self.shared.raw.destroy_render_pass(self.raw, None) };
    }
}

/// A render pass instance over an ordered set of image views.
pub struct Framebuffer {
    shared: Arc<DeviceShared>,
    raw: vk::Framebuffer,
    pub width: u32,
    pub height: u32,
}

impl Framebuffer {
    pub fn new(
        device: &Device,
        render_pass: &RenderPass,
        attachments: &[vk::ImageView],
        width: u32,
        height: u32,
    ) -> Result<Self, fe::ErrorKind> {
        assert_eq!(attachments.len() as u32, render_pass.attachment_count());

        let create_info = vk::FramebufferCreateInfo::builder()
            .render_pass(render_pass.raw())
            .attachments(attachments)
            .width(width)
            .height(height)
            .layers(1);
        let raw = unsafe { device.raw().create_framebuffer(&create_info, None) }
            .map_err(|error| fe::ErrorKind::from(DeviceError::from(error)))?;

        Ok(Self {
            shared: Arc::clone(device.shared()),
            raw,
            width,
            height,
        })
    }

    /// # Safety
    ///
    /// - The framebuffer handle must not be manually destroyed
    pub unsafe fn raw_handle(&self) -> vk::Framebuffer {
        self.raw
    }
}

impl Drop for Framebuffer {
    fn drop(&mut self) {
        unsafe { self.shared.raw.destroy_framebuffer(self.raw, None) };
    }
}
