// SPDX-License-Identifier: CEPL-1.0
//! Render pass descriptions and framebuffers.
//!
//! Both the presentation pass and the off-screen viewport pass use the
//! same shape: one color attachment (cleared, stored), an optional depth
//! attachment (cleared, discarded) and a single subpass guarded by
//! external dependencies in both directions.
use std::sync::Arc;

use ash::vk;
use prism_render::{RenderError, RenderSize};
use tracing::debug;

use crate::device::DeviceContext;
use crate::vk_err;

#[derive(Clone, Copy, Debug)]
pub struct AttachmentDesc {
    pub format: vk::Format,
    pub initial_layout: vk::ImageLayout,
    pub final_layout: vk::ImageLayout,
    pub load: vk::AttachmentLoadOp,
    pub store: vk::AttachmentStoreOp,
}

impl AttachmentDesc {
    pub fn color(format: vk::Format, final_layout: vk::ImageLayout) -> Self {
        Self {
            format,
            initial_layout: vk::ImageLayout::UNDEFINED,
            final_layout,
            load: vk::AttachmentLoadOp::CLEAR,
            store: vk::AttachmentStoreOp::STORE,
        }
    }

    pub fn depth(format: vk::Format) -> Self {
        Self {
            format,
            initial_layout: vk::ImageLayout::UNDEFINED,
            final_layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            load: vk::AttachmentLoadOp::CLEAR,
            store: vk::AttachmentStoreOp::DONT_CARE,
        }
    }

    fn to_vk(self) -> vk::AttachmentDescription {
        vk::AttachmentDescription {
            format: self.format,
            samples: vk::SampleCountFlags::TYPE_1,
            load_op: self.load,
            store_op: self.store,
            stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
            stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
            initial_layout: self.initial_layout,
            final_layout: self.final_layout,
            ..Default::default()
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct RenderPassDesc {
    pub color: AttachmentDesc,
    pub depth: Option<AttachmentDesc>,
}

impl RenderPassDesc {
    /// Final color layout PRESENT_SRC.
    pub fn presentation(color: vk::Format, depth: vk::Format) -> Self {
        Self {
            color: AttachmentDesc::color(color, vk::ImageLayout::PRESENT_SRC_KHR),
            depth: Some(AttachmentDesc::depth(depth)),
        }
    }

    /// Final color layout SHADER_READ_ONLY, sampled by the UI afterwards.
    pub fn offscreen(color: vk::Format, depth: vk::Format) -> Self {
        Self {
            color: AttachmentDesc::color(color, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL),
            depth: Some(AttachmentDesc::depth(depth)),
        }
    }

    pub fn attachment_count(&self) -> usize {
        1 + usize::from(self.depth.is_some())
    }

    /// Incoming: wait for earlier color/depth writes and any shader read of
    /// the target. Outgoing: later fragment reads wait for our writes.
    fn dependencies(&self) -> [vk::SubpassDependency; 2] {
        let stages = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
            | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
            | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS;
        let writes = vk::AccessFlags::COLOR_ATTACHMENT_WRITE
            | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE;
        [
            vk::SubpassDependency {
                src_subpass: vk::SUBPASS_EXTERNAL,
                dst_subpass: 0,
                src_stage_mask: stages | vk::PipelineStageFlags::FRAGMENT_SHADER,
                dst_stage_mask: stages,
                src_access_mask: vk::AccessFlags::SHADER_READ,
                dst_access_mask: writes | vk::AccessFlags::COLOR_ATTACHMENT_READ,
                dependency_flags: vk::DependencyFlags::BY_REGION,
            },
            vk::SubpassDependency {
                src_subpass: 0,
                dst_subpass: vk::SUBPASS_EXTERNAL,
                src_stage_mask: stages,
                dst_stage_mask: vk::PipelineStageFlags::FRAGMENT_SHADER,
                src_access_mask: writes,
                dst_access_mask: vk::AccessFlags::SHADER_READ,
                dependency_flags: vk::DependencyFlags::BY_REGION,
            },
        ]
    }
}

pub struct RenderPass {
    ctx: Arc<DeviceContext>,
    handle: vk::RenderPass,
    pub desc: RenderPassDesc,
}

impl RenderPass {
    pub fn new(ctx: &Arc<DeviceContext>, desc: RenderPassDesc) -> Result<Arc<Self>, RenderError> {
        let mut attachments = vec![desc.color.to_vk()];
        if let Some(depth) = desc.depth {
            attachments.push(depth.to_vk());
        }
        let color_ref = vk::AttachmentReference {
            attachment: 0,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        };
        let depth_ref = vk::AttachmentReference {
            attachment: 1,
            layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        };
        let subpass = vk::SubpassDescription {
            pipeline_bind_point: vk::PipelineBindPoint::GRAPHICS,
            color_attachment_count: 1,
            p_color_attachments: &color_ref,
            p_depth_stencil_attachment: if desc.depth.is_some() {
                &depth_ref
            } else {
                std::ptr::null()
            },
            ..Default::default()
        };
        let deps = desc.dependencies();
        let ci = vk::RenderPassCreateInfo {
            s_type: vk::StructureType::RENDER_PASS_CREATE_INFO,
            attachment_count: attachments.len() as u32,
            p_attachments: attachments.as_ptr(),
            subpass_count: 1,
            p_subpasses: &subpass,
            dependency_count: deps.len() as u32,
            p_dependencies: deps.as_ptr(),
            ..Default::default()
        };
        let handle = unsafe { ctx.device.create_render_pass(&ci, None) }
            .map_err(|e| vk_err("create_render_pass", e))?;
        Ok(Arc::new(Self {
            ctx: Arc::clone(ctx),
            handle,
            desc,
        }))
    }

    pub fn raw(&self) -> vk::RenderPass {
        self.handle
    }
}

impl Drop for RenderPass {
    fn drop(&mut self) {
        unsafe { self.ctx.device.destroy_render_pass(self.handle, None) };
        debug!("vk: render pass {:?} destroyed", self.handle);
    }
}

/// Binds concrete views to a render pass.
///
/// Holds its own copy of the view handles and a share of the render pass,
/// so the pass cannot be destroyed first. The views themselves must be
/// dropped after the framebuffer; owners declare framebuffers first.
pub struct Framebuffer {
    ctx: Arc<DeviceContext>,
    handle: vk::Framebuffer,
    render_pass: Arc<RenderPass>,
    attachments: Vec<vk::ImageView>,
    pub size: RenderSize,
}

impl Framebuffer {
    pub fn new(
        ctx: &Arc<DeviceContext>,
        render_pass: &Arc<RenderPass>,
        size: RenderSize,
        attachments: &[vk::ImageView],
    ) -> Result<Self, RenderError> {
        debug_assert_eq!(attachments.len(), render_pass.desc.attachment_count());
        let attachments = attachments.to_vec();
        let ci = vk::FramebufferCreateInfo {
            s_type: vk::StructureType::FRAMEBUFFER_CREATE_INFO,
            render_pass: render_pass.raw(),
            attachment_count: attachments.len() as u32,
            p_attachments: attachments.as_ptr(),
            width: size.width,
            height: size.height,
            layers: 1,
            ..Default::default()
        };
        let handle = unsafe { ctx.device.create_framebuffer(&ci, None) }
            .map_err(|e| vk_err("create_framebuffer", e))?;
        Ok(Self {
            ctx: Arc::clone(ctx),
            handle,
            render_pass: Arc::clone(render_pass),
            attachments,
            size,
        })
    }

    pub fn raw(&self) -> vk::Framebuffer {
        self.handle
    }

    pub fn render_pass(&self) -> &Arc<RenderPass> {
        &self.render_pass
    }

    pub fn attachments(&self) -> &[vk::ImageView] {
        &self.attachments
    }

    /// Begins the pass over the whole framebuffer with the given clears.
    pub fn begin(&self, cmd: vk::CommandBuffer, clear_color: [f32; 4]) {
        let clears = [
            vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: clear_color,
                },
            },
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: 1.0,
                    stencil: 0,
                },
            },
        ];
        let info = vk::RenderPassBeginInfo {
            s_type: vk::StructureType::RENDER_PASS_BEGIN_INFO,
            render_pass: self.render_pass.raw(),
            framebuffer: self.handle,
            render_area: vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: vk::Extent2D {
                    width: self.size.width,
                    height: self.size.height,
                },
            },
            clear_value_count: self.render_pass.desc.attachment_count() as u32,
            p_clear_values: clears.as_ptr(),
            ..Default::default()
        };
        unsafe {
            self.ctx
                .device
                .cmd_begin_render_pass(cmd, &info, vk::SubpassContents::INLINE)
        };
    }
}

impl Drop for Framebuffer {
    fn drop(&mut self) {
        unsafe { self.ctx.device.destroy_framebuffer(self.handle, None) };
    }
}
