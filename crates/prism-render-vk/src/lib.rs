// SPDX-License-Identifier: CEPL-1.0
//! Vulkan implementation of the prism [`GpuBackend`].
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use ash::vk;
use prism_render::select::DeviceRequirements;
use prism_render::{
    AcquireOutcome, FrameOutcome, GpuBackend, GraphicsBackend, NullUi, PresentOutcome, PresentPolicy,
    RenderError, RenderSettings, RenderSize, Renderer, UiLayer, Viewport, ViewportResize, ViewportTexture,
};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use tracing::{debug, warn};

pub mod device;
pub mod instance;
pub mod render_pass;
pub mod resources;
pub mod shader;
pub mod swapchain;
pub mod sync;
pub mod upload;
pub mod viewport;

pub use device::DeviceContext;
pub use instance::InstanceContext;

use render_pass::Framebuffer;
use resources::Texture;
use shader::{ShaderLibrary, SHADER_DIR};
use swapchain::PresentationChain;
use sync::{create_frame_slots, FrameSlot};
use viewport::OffscreenTarget;

pub(crate) fn vk_err(op: &'static str, e: vk::Result) -> RenderError {
    match e {
        vk::Result::ERROR_DEVICE_LOST => RenderError::DeviceLost,
        other => RenderError::backend(op, format!("{other:?}")),
    }
}

fn set_dynamic_viewport(device: &ash::Device, cmd: vk::CommandBuffer, vp: Viewport, scissor: RenderSize) {
    let viewport = vk::Viewport {
        x: vp.x,
        y: vp.y,
        width: vp.width,
        height: vp.height,
        min_depth: vp.min_depth,
        max_depth: vp.max_depth,
    };
    let rect = vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent: vk::Extent2D {
            width: scissor.width,
            height: scissor.height,
        },
    };
    unsafe {
        device.cmd_set_viewport(cmd, 0, &[viewport]);
        device.cmd_set_scissor(cmd, 0, &[rect]);
    }
}

/// Clear pass over the off-screen target; leaves it shader-readable.
pub(crate) fn record_viewport(
    ctx: &DeviceContext,
    cmd: vk::CommandBuffer,
    framebuffer: &Framebuffer,
    clear_color: [f32; 4],
) {
    framebuffer.begin(cmd, clear_color);
    set_dynamic_viewport(&ctx.device, cmd, Viewport::flipped(framebuffer.size), framebuffer.size);
    unsafe { ctx.device.cmd_end_render_pass(cmd) };
}

pub struct VkBackend {
    slots: Vec<FrameSlot>,
    chain: PresentationChain,
    viewport: Option<OffscreenTarget>,
    shaders: ShaderLibrary,
    clear_color: [f32; 4],
    ctx: Arc<DeviceContext>,
}

impl VkBackend {
    pub fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        settings: &RenderSettings,
    ) -> Result<Self> {
        let dh = display
            .display_handle()
            .map_err(|e| anyhow!("{e}"))?
            .as_raw();
        let wh = window.window_handle().map_err(|e| anyhow!("{e}"))?.as_raw();

        let instance = Arc::new(InstanceContext::new(dh, wh, settings.validation)?);
        let reqs = DeviceRequirements {
            prefer_discrete: settings.prefer_discrete,
            ..Default::default()
        };
        let ctx = DeviceContext::new(instance, &reqs).context("device selection")?;

        let mut shaders = ShaderLibrary::new(&ctx, SHADER_DIR);
        shaders
            .load_required(&settings.required_shaders)
            .context("required shaders")?;

        let frames = settings.frames_in_flight.max(1);
        let slots = create_frame_slots(&ctx, frames).context("frame slots")?;
        let mut chain = PresentationChain::new(&ctx, settings.present_policy);
        chain.create(size).context("initial presentation chain")?;
        let viewport = if settings.viewport.enabled {
            Some(OffscreenTarget::new(&ctx, &settings.viewport, frames).context("viewport target")?)
        } else {
            None
        };

        Ok(Self {
            slots,
            chain,
            viewport,
            shaders,
            clear_color: settings.clear_color,
            ctx,
        })
    }

    pub fn context(&self) -> &Arc<DeviceContext> {
        &self.ctx
    }

    pub fn shaders(&mut self) -> &mut ShaderLibrary {
        &mut self.shaders
    }

    /// Descriptor set layout the UI uses to sample the viewport texture.
    pub fn viewport_set_layout(&self) -> Option<vk::DescriptorSetLayout> {
        self.viewport.as_ref().map(OffscreenTarget::set_layout)
    }

    pub fn set_viewport_clear_color(&mut self, rgba: [f32; 4]) {
        if let Some(vp) = self.viewport.as_mut() {
            vp.set_clear_color(rgba);
        }
    }

    pub fn upload_texture(&self, size: RenderSize, rgba: &[u8]) -> Result<Texture, RenderError> {
        upload::create_texture_from_pixels(&self.ctx, size, rgba)
    }

    fn rebuild_slots(&mut self) -> Result<(), RenderError> {
        let cmds: Vec<vk::CommandBuffer> = self.slots.iter().map(|s| s.cmd).collect();
        let count = self.slots.len();
        self.slots.clear();
        self.ctx.free_command_buffers(&cmds);
        self.slots = create_frame_slots(&self.ctx, count)?;
        Ok(())
    }
}

impl GpuBackend for VkBackend {
    type CommandBuffer = vk::CommandBuffer;

    fn name(&self) -> &'static str {
        "vulkan"
    }

    fn frames_in_flight(&self) -> usize {
        self.slots.len()
    }

    fn image_count(&self) -> usize {
        self.chain.image_count()
    }

    fn chain_extent(&self) -> RenderSize {
        self.chain.extent()
    }

    fn wait_frame_fence(&mut self, slot: usize, timeout: Option<Duration>) -> Result<(), RenderError> {
        self.slots[slot].in_flight.wait(timeout, slot)
    }

    fn reset_frame_fence(&mut self, slot: usize) -> Result<(), RenderError> {
        self.slots[slot].in_flight.reset()
    }

    fn acquire_next_image(&mut self, slot: usize) -> Result<AcquireOutcome, RenderError> {
        self.chain.acquire(self.slots[slot].image_acquired.raw())
    }

    fn begin_commands(&mut self, slot: usize) -> Result<vk::CommandBuffer, RenderError> {
        let cmd = self.slots[slot].cmd;
        let begin = vk::CommandBufferBeginInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
            flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
            ..Default::default()
        };
        unsafe {
            self.ctx
                .device
                .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
                .map_err(|e| vk_err("reset_command_buffer", e))?;
            self.ctx
                .device
                .begin_command_buffer(cmd, &begin)
                .map_err(|e| vk_err("begin_command_buffer", e))?;
        }
        Ok(cmd)
    }

    fn set_viewport(&mut self, cmd: vk::CommandBuffer, viewport: Viewport, scissor: RenderSize) {
        set_dynamic_viewport(&self.ctx.device, cmd, viewport, scissor);
    }

    fn record_offscreen_pass(&mut self, slot: usize, cmd: vk::CommandBuffer) -> Result<bool, RenderError> {
        match self.viewport.as_mut() {
            Some(vp) => vp.record(slot, cmd),
            None => Ok(false),
        }
    }

    fn begin_main_pass(&mut self, cmd: vk::CommandBuffer, image: usize) {
        self.chain.framebuffer(image).begin(cmd, self.clear_color);
    }

    fn end_main_pass(&mut self, cmd: vk::CommandBuffer) {
        unsafe { self.ctx.device.cmd_end_render_pass(cmd) };
    }

    fn end_commands(&mut self, cmd: vk::CommandBuffer) -> Result<(), RenderError> {
        unsafe { self.ctx.device.end_command_buffer(cmd) }.map_err(|e| vk_err("end_command_buffer", e))
    }

    // Wait: this slot's "image acquired" (+ the viewport pass when submitted
    // separately). Signal: the IMAGE's "render finished" and the slot fence.
    fn submit(&mut self, slot: usize, image: usize) -> Result<(), RenderError> {
        let s = &self.slots[slot];
        let mut waits = vec![s.image_acquired.raw()];
        let mut stages = vec![vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        if let Some(sem) = self.viewport.as_mut().and_then(OffscreenTarget::take_wait_semaphore) {
            waits.push(sem);
            stages.push(vk::PipelineStageFlags::FRAGMENT_SHADER);
        }
        let signal = self.chain.render_finished(image);
        let submit = vk::SubmitInfo {
            s_type: vk::StructureType::SUBMIT_INFO,
            wait_semaphore_count: waits.len() as u32,
            p_wait_semaphores: waits.as_ptr(),
            p_wait_dst_stage_mask: stages.as_ptr(),
            command_buffer_count: 1,
            p_command_buffers: &s.cmd,
            signal_semaphore_count: 1,
            p_signal_semaphores: &signal,
            ..Default::default()
        };
        unsafe {
            self.ctx.device.queue_submit(
                self.ctx.graphics_queue,
                std::slice::from_ref(&submit),
                s.in_flight.raw(),
            )
        }
        .map_err(|e| vk_err("queue_submit", e))
    }

    fn present(&mut self, image: usize) -> Result<PresentOutcome, RenderError> {
        self.chain.present(image)
    }

    fn wait_idle(&mut self) -> Result<(), RenderError> {
        self.ctx.wait_idle()
    }

    fn recreate_chain(&mut self, size: RenderSize) -> Result<RenderSize, RenderError> {
        let built = self.chain.recreate(size)?;
        // An acquire abandoned mid-frame leaves its semaphore signaled.
        self.rebuild_slots()?;
        Ok(built)
    }

    fn destroy_chain(&mut self) -> Result<(), RenderError> {
        self.chain.destroy();
        Ok(())
    }

    fn viewport_size(&self) -> Option<RenderSize> {
        self.viewport.as_ref().and_then(OffscreenTarget::size)
    }

    fn resize_viewport(&mut self, size: RenderSize) -> Result<ViewportResize, RenderError> {
        match self.viewport.as_mut() {
            Some(vp) => vp.resize(size),
            None => Ok(ViewportResize::Unchanged),
        }
    }

    fn viewport_texture(&mut self) -> Result<Option<ViewportTexture>, RenderError> {
        match self.viewport.as_mut() {
            Some(vp) => vp.texture(),
            None => Ok(None),
        }
    }

    fn set_clear_color(&mut self, rgba: [f32; 4]) {
        self.clear_color = rgba;
    }

    fn set_present_policy(&mut self, policy: PresentPolicy) {
        self.chain.set_policy(policy);
    }
}

impl Drop for VkBackend {
    fn drop(&mut self) {
        // Nothing may still reference the objects dropped below.
        self.ctx.wait_idle().ok();
        let cmds: Vec<vk::CommandBuffer> = self.slots.iter().map(|s| s.cmd).collect();
        self.ctx.free_command_buffers(&cmds);
        debug!("vk: backend dropped");
    }
}

/// [`Renderer`] front-end: a [`VkBackend`] driven by the frame engine with
/// a pluggable UI layer.
pub struct VkRenderer {
    gfx: GraphicsBackend<VkBackend>,
    ui: Box<dyn UiLayer<vk::CommandBuffer>>,
    vsync_policy: PresentPolicy,
}

impl VkRenderer {
    pub fn set_ui(&mut self, ui: Box<dyn UiLayer<vk::CommandBuffer>>) {
        self.ui = ui;
    }

    pub fn graphics(&mut self) -> &mut GraphicsBackend<VkBackend> {
        &mut self.gfx
    }
}

impl Renderer for VkRenderer {
    fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        settings: &RenderSettings,
    ) -> Result<Self> {
        let backend = VkBackend::new(window, display, size, settings)?;
        let gfx = GraphicsBackend::new(backend, settings);
        Ok(Self {
            gfx,
            ui: Box::new(NullUi::default()),
            vsync_policy: match settings.present_policy {
                PresentPolicy::Uncapped => PresentPolicy::Mailbox,
                p => p,
            },
        })
    }

    // A zero size is forwarded too; the engine empties the chain and skips
    // frames until a real size arrives.
    fn resize(&mut self, size: RenderSize) -> Result<()> {
        debug!("vk: resize to {size}");
        self.gfx.notify_resize(size);
        Ok(())
    }

    fn render(&mut self) -> Result<FrameOutcome> {
        Ok(self.gfx.render_frame(&mut *self.ui)?)
    }

    fn set_clear_color(&mut self, rgba: [f32; 4]) {
        self.gfx.set_clear_color(rgba);
    }

    fn set_vsync(&mut self, on: bool) {
        let policy = if on { self.vsync_policy } else { PresentPolicy::Uncapped };
        self.gfx.set_present_policy(policy);
    }
}

impl Drop for VkRenderer {
    fn drop(&mut self) {
        if let Err(e) = self.gfx.shutdown() {
            warn!("vk: shutdown: {e}");
        }
    }
}
