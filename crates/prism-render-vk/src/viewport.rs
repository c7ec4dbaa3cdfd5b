// SPDX-License-Identifier: CEPL-1.0
//! Off-screen color+depth target the UI displays as a texture.
use std::sync::Arc;

use ash::vk::{self, Handle};
use prism_render::viewport::ViewportSizing;
use prism_render::{
    RenderError, RenderSize, ViewportResize, ViewportSettings, ViewportSync, ViewportTexture,
};
use tracing::{debug, info};

use crate::device::DeviceContext;
use crate::render_pass::{Framebuffer, RenderPass, RenderPassDesc};
use crate::resources::{Image, ImageView, Sampler};
use crate::sync::{create_semaphores, Fence, Semaphore};
use crate::{record_viewport, vk_err};

pub const COLOR_FORMAT: vk::Format = vk::Format::R8G8B8A8_UNORM;

// Declaration order is drop order.
struct TargetResources {
    framebuffer: Framebuffer,
    sampler: Sampler,
    color_view: ImageView,
    _color: Image,
    _depth_view: ImageView,
    _depth: Image,
    size: RenderSize,
}

impl TargetResources {
    fn new(ctx: &Arc<DeviceContext>, size: RenderSize) -> Result<Self, RenderError> {
        let depth_format = ctx.pick_depth_format();
        let color = Image::new(
            ctx,
            size,
            COLOR_FORMAT,
            vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::SAMPLED,
        )?;
        let color_view = ImageView::new(ctx, &color)?;
        let depth = Image::new(ctx, size, depth_format, vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT)?;
        let depth_view = ImageView::new(ctx, &depth)?;
        let sampler = Sampler::linear(ctx)?;
        let render_pass = RenderPass::new(ctx, RenderPassDesc::offscreen(COLOR_FORMAT, depth_format))?;
        let framebuffer = Framebuffer::new(ctx, &render_pass, size, &[color_view.raw(), depth_view.raw()])?;
        Ok(Self {
            framebuffer,
            sampler,
            color_view,
            _color: color,
            _depth_view: depth_view,
            _depth: depth,
            size,
        })
    }
}

/// Objects used only when the pass is submitted on its own.
struct SeparateSubmit {
    cmds: Vec<vk::CommandBuffer>,
    finished: Vec<Semaphore>,
    /// Empty unless fenced.
    fences: Vec<Fence>,
}

pub struct OffscreenTarget {
    ctx: Arc<DeviceContext>,
    sizing: ViewportSizing,
    sync: ViewportSync,
    clear_color: [f32; 4],
    generation: u64,
    resources: Option<TargetResources>,
    set_layout: vk::DescriptorSetLayout,
    descriptor_pool: vk::DescriptorPool,
    descriptor: Option<vk::DescriptorSet>,
    /// Freed once its replacement exists, so handles never repeat.
    retired: Option<vk::DescriptorSet>,
    separate: Option<SeparateSubmit>,
    pending_wait: Option<vk::Semaphore>,
}

impl OffscreenTarget {
    pub fn new(
        ctx: &Arc<DeviceContext>,
        settings: &ViewportSettings,
        frames_in_flight: usize,
    ) -> Result<Self, RenderError> {
        let d = &ctx.device;
        let binding = vk::DescriptorSetLayoutBinding {
            binding: 0,
            descriptor_type: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            descriptor_count: 1,
            stage_flags: vk::ShaderStageFlags::FRAGMENT,
            ..Default::default()
        };
        let layout_ci = vk::DescriptorSetLayoutCreateInfo {
            s_type: vk::StructureType::DESCRIPTOR_SET_LAYOUT_CREATE_INFO,
            binding_count: 1,
            p_bindings: &binding,
            ..Default::default()
        };
        let set_layout = unsafe { d.create_descriptor_set_layout(&layout_ci, None) }
            .map_err(|e| vk_err("create_descriptor_set_layout", e))?;

        let pool_size = vk::DescriptorPoolSize {
            ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            descriptor_count: 2,
        };
        let pool_ci = vk::DescriptorPoolCreateInfo {
            s_type: vk::StructureType::DESCRIPTOR_POOL_CREATE_INFO,
            flags: vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET,
            max_sets: 2,
            pool_size_count: 1,
            p_pool_sizes: &pool_size,
            ..Default::default()
        };
        let descriptor_pool = match unsafe { d.create_descriptor_pool(&pool_ci, None) } {
            Ok(pool) => pool,
            Err(e) => {
                unsafe { d.destroy_descriptor_set_layout(set_layout, None) };
                return Err(vk_err("create_descriptor_pool", e));
            }
        };

        let mut target = Self {
            ctx: Arc::clone(ctx),
            sizing: ViewportSizing::new(settings.tolerance),
            sync: settings.sync,
            clear_color: settings.clear_color,
            generation: 1,
            resources: None,
            set_layout,
            descriptor_pool,
            descriptor: None,
            retired: None,
            separate: None,
            pending_wait: None,
        };

        if let ViewportSync::Separate { fenced } = settings.sync {
            let cmds = ctx.allocate_command_buffers(frames_in_flight as u32)?;
            let finished = create_semaphores(ctx, frames_in_flight)?;
            let fences = if fenced {
                (0..frames_in_flight)
                    .map(|_| Fence::new(ctx, true))
                    .collect::<Result<_, _>>()?
            } else {
                Vec::new()
            };
            target.separate = Some(SeparateSubmit { cmds, finished, fences });
        }

        target.resources = Some(TargetResources::new(ctx, settings.size)?);
        info!(
            "vk: viewport target {} ({:?}, tolerance {})",
            settings.size, settings.sync, settings.tolerance
        );
        Ok(target)
    }

    pub fn size(&self) -> Option<RenderSize> {
        self.resources.as_ref().map(|r| r.size)
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn set_layout(&self) -> vk::DescriptorSetLayout {
        self.set_layout
    }

    /// Rebuilds every object of the target when `size` is outside the
    /// tolerance band. Drains the device first; in-flight frames may still
    /// sample the old image.
    pub fn resize(&mut self, size: RenderSize) -> Result<ViewportResize, RenderError> {
        let current = self.size().unwrap_or(RenderSize::ZERO);
        if !self.sizing.needs_recreate(current, size) {
            debug!("vk: viewport {current} → {size} within tolerance");
            return Ok(ViewportResize::Unchanged);
        }
        self.ctx.wait_idle()?;
        self.resources = None;
        if let Some(old) = self.descriptor.take() {
            self.free_retired();
            self.retired = Some(old);
        }
        self.resources = Some(TargetResources::new(&self.ctx, size)?);
        self.generation += 1;
        info!("vk: viewport {current} → {size}, generation {}", self.generation);
        Ok(ViewportResize::Recreated)
    }

    fn free_retired(&mut self) {
        if let Some(set) = self.retired.take() {
            unsafe {
                self.ctx
                    .device
                    .free_descriptor_sets(self.descriptor_pool, &[set])
                    .ok();
            }
        }
    }

    /// Descriptor set for the UI, allocated on first use after each rebuild.
    pub fn texture(&mut self) -> Result<Option<ViewportTexture>, RenderError> {
        let Some(res) = self.resources.as_ref() else {
            return Ok(None);
        };
        let size = res.size;
        let image_info = vk::DescriptorImageInfo {
            sampler: res.sampler.raw(),
            image_view: res.color_view.raw(),
            image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        };
        let set = match self.descriptor {
            Some(set) => set,
            None => {
                let ai = vk::DescriptorSetAllocateInfo {
                    s_type: vk::StructureType::DESCRIPTOR_SET_ALLOCATE_INFO,
                    descriptor_pool: self.descriptor_pool,
                    descriptor_set_count: 1,
                    p_set_layouts: &self.set_layout,
                    ..Default::default()
                };
                let set = unsafe { self.ctx.device.allocate_descriptor_sets(&ai) }
                    .map_err(|e| vk_err("allocate_descriptor_sets", e))?[0];
                let write = vk::WriteDescriptorSet {
                    s_type: vk::StructureType::WRITE_DESCRIPTOR_SET,
                    dst_set: set,
                    dst_binding: 0,
                    descriptor_count: 1,
                    descriptor_type: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                    p_image_info: &image_info,
                    ..Default::default()
                };
                unsafe { self.ctx.device.update_descriptor_sets(&[write], &[]) };
                self.descriptor = Some(set);
                self.free_retired();
                set
            }
        };
        Ok(Some(ViewportTexture {
            id: set.as_raw(),
            generation: self.generation,
            size,
        }))
    }

    pub fn set_clear_color(&mut self, rgba: [f32; 4]) {
        self.clear_color = rgba;
    }

    /// Inline: records the pass into `frame_cmd`. Separate: records and
    /// submits the slot's own command buffer; the main submission must then
    /// wait on [`take_wait_semaphore`](Self::take_wait_semaphore).
    pub fn record(&mut self, slot: usize, frame_cmd: vk::CommandBuffer) -> Result<bool, RenderError> {
        let Some(res) = self.resources.as_ref() else {
            return Ok(false);
        };
        let Some(sep) = self.separate.as_ref() else {
            record_viewport(&self.ctx, frame_cmd, &res.framebuffer, self.clear_color);
            return Ok(true);
        };

        let d = &self.ctx.device;
        let cmd = sep.cmds[slot];
        if let Some(fence) = sep.fences.get(slot) {
            fence.wait(None, slot)?;
            fence.reset()?;
        }
        unsafe {
            d.reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
                .map_err(|e| vk_err("reset_command_buffer(viewport)", e))?;
            let begin = vk::CommandBufferBeginInfo {
                s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
                flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
                ..Default::default()
            };
            d.begin_command_buffer(cmd, &begin)
                .map_err(|e| vk_err("begin_command_buffer(viewport)", e))?;
        }
        record_viewport(&self.ctx, cmd, &res.framebuffer, self.clear_color);
        let signal = sep.finished[slot].raw();
        let fence = sep.fences.get(slot).map_or(vk::Fence::null(), Fence::raw);
        unsafe {
            d.end_command_buffer(cmd)
                .map_err(|e| vk_err("end_command_buffer(viewport)", e))?;
            let submit = vk::SubmitInfo {
                s_type: vk::StructureType::SUBMIT_INFO,
                command_buffer_count: 1,
                p_command_buffers: &cmd,
                signal_semaphore_count: 1,
                p_signal_semaphores: &signal,
                ..Default::default()
            };
            d.queue_submit(self.ctx.graphics_queue, std::slice::from_ref(&submit), fence)
                .map_err(|e| vk_err("queue_submit(viewport)", e))?;
            if fence == vk::Fence::null() {
                d.queue_wait_idle(self.ctx.graphics_queue)
                    .map_err(|e| vk_err("queue_wait_idle(viewport)", e))?;
            }
        }
        self.pending_wait = Some(signal);
        Ok(true)
    }

    pub fn take_wait_semaphore(&mut self) -> Option<vk::Semaphore> {
        self.pending_wait.take()
    }
}

impl Drop for OffscreenTarget {
    fn drop(&mut self) {
        self.ctx.wait_idle().ok();
        if let Some(sep) = self.separate.take() {
            self.ctx.free_command_buffers(&sep.cmds);
        }
        self.resources = None;
        unsafe {
            // Destroying the pool frees its sets.
            self.ctx.device.destroy_descriptor_pool(self.descriptor_pool, None);
            self.ctx
                .device
                .destroy_descriptor_set_layout(self.set_layout, None);
        }
        debug!("vk: viewport target destroyed");
    }
}
