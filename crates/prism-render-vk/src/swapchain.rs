// SPDX-License-Identifier: CEPL-1.0
//! The presentation chain: swapchain, per-image views and framebuffers,
//! per-image "render finished" semaphores and the shared depth target.
use std::sync::Arc;

use ash::vk;
use prism_render::chain::{choose_extent, choose_image_count, choose_present_mode, PresentMode, SurfaceLimits};
use prism_render::{AcquireOutcome, PresentOutcome, PresentPolicy, RenderError, RenderSize};
use tracing::{debug, info};

use crate::device::DeviceContext;
use crate::render_pass::{Framebuffer, RenderPass, RenderPassDesc};
use crate::resources::{Image, ImageView};
use crate::sync::Semaphore;
use crate::vk_err;

pub fn present_mode_from_vk(mode: vk::PresentModeKHR) -> Option<PresentMode> {
    match mode {
        vk::PresentModeKHR::IMMEDIATE => Some(PresentMode::Immediate),
        vk::PresentModeKHR::MAILBOX => Some(PresentMode::Mailbox),
        vk::PresentModeKHR::FIFO => Some(PresentMode::Fifo),
        vk::PresentModeKHR::FIFO_RELAXED => Some(PresentMode::FifoRelaxed),
        _ => None,
    }
}

pub fn present_mode_to_vk(mode: PresentMode) -> vk::PresentModeKHR {
    match mode {
        PresentMode::Immediate => vk::PresentModeKHR::IMMEDIATE,
        PresentMode::Mailbox => vk::PresentModeKHR::MAILBOX,
        PresentMode::Fifo => vk::PresentModeKHR::FIFO,
        PresentMode::FifoRelaxed => vk::PresentModeKHR::FIFO_RELAXED,
    }
}

/// sRGB 8-bit formats first, then UNORM with the sRGB color space, then
/// whatever the driver lists first.
pub fn pick_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<(vk::SurfaceFormatKHR, &'static str)> {
    if let Some(f) = formats
        .iter()
        .copied()
        .find(|f| f.format == vk::Format::B8G8R8A8_SRGB)
    {
        return Some((f, "bgra8_srgb"));
    }
    if let Some(f) = formats
        .iter()
        .copied()
        .find(|f| f.format == vk::Format::R8G8B8A8_SRGB)
    {
        return Some((f, "rgba8_srgb"));
    }
    if let Some(f) = formats.iter().copied().find(|f| {
        f.format == vk::Format::B8G8R8A8_UNORM && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
    }) {
        return Some((f, "bgra8_unorm_srgbcs"));
    }
    formats.first().map(|&f| (f, "driver_default"))
}

pub fn surface_limits(caps: &vk::SurfaceCapabilitiesKHR) -> SurfaceLimits {
    SurfaceLimits {
        // u32::MAX means the swapchain decides.
        current: (caps.current_extent.width != u32::MAX).then(|| {
            RenderSize::new(caps.current_extent.width, caps.current_extent.height)
        }),
        min: RenderSize::new(caps.min_image_extent.width, caps.min_image_extent.height),
        max: RenderSize::new(caps.max_image_extent.width, caps.max_image_extent.height),
        min_images: caps.min_image_count,
        max_images: caps.max_image_count,
    }
}

// Field order is drop order: framebuffer before the view it references.
struct ChainImage {
    framebuffer: Framebuffer,
    view: ImageView,
    render_finished: Semaphore,
}

pub struct PresentationChain {
    ctx: Arc<DeviceContext>,
    handle: vk::SwapchainKHR,
    images: Vec<ChainImage>,
    /// View first so it is dropped before its image.
    depth: Option<(ImageView, Image)>,
    render_pass: Option<Arc<RenderPass>>,
    format: vk::SurfaceFormatKHR,
    depth_format: vk::Format,
    present_mode: PresentMode,
    extent: RenderSize,
    policy: PresentPolicy,
}

impl PresentationChain {
    /// An empty chain; call [`create`](Self::create) to build it.
    pub fn new(ctx: &Arc<DeviceContext>, policy: PresentPolicy) -> Self {
        Self {
            ctx: Arc::clone(ctx),
            handle: vk::SwapchainKHR::null(),
            images: Vec::new(),
            depth: None,
            render_pass: None,
            format: vk::SurfaceFormatKHR::default(),
            depth_format: vk::Format::UNDEFINED,
            present_mode: PresentMode::Fifo,
            extent: RenderSize::ZERO,
            policy,
        }
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn extent(&self) -> RenderSize {
        self.extent
    }

    pub fn color_format(&self) -> vk::Format {
        self.format.format
    }

    pub fn depth_format(&self) -> vk::Format {
        self.depth_format
    }

    pub fn present_mode(&self) -> PresentMode {
        self.present_mode
    }

    pub fn set_policy(&mut self, policy: PresentPolicy) {
        self.policy = policy;
    }

    pub fn framebuffer(&self, image: usize) -> &Framebuffer {
        &self.images[image].framebuffer
    }

    pub fn view(&self, image: usize) -> vk::ImageView {
        self.images[image].view.raw()
    }

    pub fn render_finished(&self, image: usize) -> vk::Semaphore {
        self.images[image].render_finished.raw()
    }

    /// Builds the chain for `size`. A zero extent (minimized window, or a
    /// surface reporting 0x0) leaves it empty and returns zero.
    pub fn create(&mut self, size: RenderSize) -> Result<RenderSize, RenderError> {
        debug_assert!(self.images.is_empty(), "create over a live chain");
        let old = std::mem::replace(&mut self.handle, vk::SwapchainKHR::null());
        let result = unsafe { self.build(size, old) };
        if old != vk::SwapchainKHR::null() {
            unsafe { self.ctx.swapchain_loader.destroy_swapchain(old, None) };
        }
        result
    }

    // STRICT ORDER (recreate):
    // 1) device idle, no submission references the old chain
    // 2) framebuffers → views → depth (dependency order)
    // 3) new swapchain built from the old handle, then the old handle freed
    // 4) views, depth, render pass (only on format change), framebuffers
    pub fn recreate(&mut self, size: RenderSize) -> Result<RenderSize, RenderError> {
        self.ctx.wait_idle()?;
        self.release_images();
        self.create(size)
    }

    /// Full teardown; the chain reports zero images afterwards.
    pub fn destroy(&mut self) {
        self.release_images();
        if self.handle != vk::SwapchainKHR::null() {
            unsafe { self.ctx.swapchain_loader.destroy_swapchain(self.handle, None) };
            self.handle = vk::SwapchainKHR::null();
        }
        self.render_pass = None;
    }

    fn release_images(&mut self) {
        self.images.clear();
        self.depth = None;
        self.extent = RenderSize::ZERO;
    }

    unsafe fn build(&mut self, size: RenderSize, old: vk::SwapchainKHR) -> Result<RenderSize, RenderError> {
        let ctx = Arc::clone(&self.ctx);
        let inst = &ctx.instance;
        let caps = inst
            .surface_loader
            .get_physical_device_surface_capabilities(ctx.phys, inst.surface)
            .map_err(|e| vk_err("get_physical_device_surface_capabilities", e))?;
        let formats = inst
            .surface_loader
            .get_physical_device_surface_formats(ctx.phys, inst.surface)
            .map_err(|e| vk_err("get_physical_device_surface_formats", e))?;
        let modes: Vec<PresentMode> = inst
            .surface_loader
            .get_physical_device_surface_present_modes(ctx.phys, inst.surface)
            .map_err(|e| vk_err("get_physical_device_surface_present_modes", e))?
            .into_iter()
            .filter_map(present_mode_from_vk)
            .collect();

        let limits = surface_limits(&caps);
        let extent = choose_extent(&limits, size);
        if extent.is_empty() {
            info!("vk: chain extent {extent} for request {size} → empty chain");
            return Ok(RenderSize::ZERO);
        }

        let (surf_format, reason) = pick_surface_format(&formats)
            .ok_or_else(|| RenderError::backend("pick_surface_format", "surface reports no formats"))?;
        let present_mode = choose_present_mode(&modes, self.policy);
        let min_image_count = choose_image_count(&limits);
        let depth_format = ctx.pick_depth_format();

        let pre_transform = if caps
            .supported_transforms
            .contains(vk::SurfaceTransformFlagsKHR::IDENTITY)
        {
            vk::SurfaceTransformFlagsKHR::IDENTITY
        } else {
            caps.current_transform
        };

        let families = [ctx.queues.graphics, ctx.queues.present];
        let (sharing_mode, family_count) = if ctx.queues.graphics != ctx.queues.present {
            (vk::SharingMode::CONCURRENT, 2)
        } else {
            (vk::SharingMode::EXCLUSIVE, 0)
        };

        let swap_info = vk::SwapchainCreateInfoKHR {
            s_type: vk::StructureType::SWAPCHAIN_CREATE_INFO_KHR,
            surface: inst.surface,
            min_image_count,
            image_format: surf_format.format,
            image_color_space: surf_format.color_space,
            image_extent: vk::Extent2D {
                width: extent.width,
                height: extent.height,
            },
            image_array_layers: 1,
            image_usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
            image_sharing_mode: sharing_mode,
            queue_family_index_count: family_count,
            p_queue_family_indices: families.as_ptr(),
            pre_transform,
            composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
            present_mode: present_mode_to_vk(present_mode),
            clipped: vk::TRUE,
            old_swapchain: old,
            ..Default::default()
        };
        let handle = ctx
            .swapchain_loader
            .create_swapchain(&swap_info, None)
            .map_err(|e| vk_err("create_swapchain", e))?;
        self.handle = handle;

        let raw_images = ctx
            .swapchain_loader
            .get_swapchain_images(handle)
            .map_err(|e| vk_err("get_swapchain_images", e))?;

        let format_changed = self.format.format != surf_format.format || self.depth_format != depth_format;
        let render_pass = match &self.render_pass {
            Some(rp) if !format_changed => Arc::clone(rp),
            _ => RenderPass::new(&ctx, RenderPassDesc::presentation(surf_format.format, depth_format))?,
        };

        let depth_image = Image::new(
            &ctx,
            extent,
            depth_format,
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
        )?;
        let depth_view = ImageView::new(&ctx, &depth_image)?;

        let mut images = Vec::with_capacity(raw_images.len());
        for &image in &raw_images {
            let view = ImageView::for_raw(&ctx, image, surf_format.format, vk::ImageAspectFlags::COLOR)?;
            let framebuffer = Framebuffer::new(&ctx, &render_pass, extent, &[view.raw(), depth_view.raw()])?;
            images.push(ChainImage {
                framebuffer,
                view,
                render_finished: Semaphore::new(&ctx)?,
            });
        }

        info!(
            "vk: chain {}x{} images={} (min {}) format={:?}/{:?} ({reason}) present={} depth={:?}",
            extent.width,
            extent.height,
            images.len(),
            min_image_count,
            surf_format.format,
            surf_format.color_space,
            present_mode.name(),
            depth_format
        );

        self.images = images;
        self.depth = Some((depth_view, depth_image));
        self.render_pass = Some(render_pass);
        self.format = surf_format;
        self.depth_format = depth_format;
        self.present_mode = present_mode;
        self.extent = extent;
        Ok(extent)
    }

    /// Signals `acquired` once the image may be written.
    pub fn acquire(&self, acquired: vk::Semaphore) -> Result<AcquireOutcome, RenderError> {
        if self.images.is_empty() {
            return Err(RenderError::NotInitialized("presentation chain"));
        }
        match unsafe {
            self.ctx
                .swapchain_loader
                .acquire_next_image(self.handle, u64::MAX, acquired, vk::Fence::null())
        } {
            Ok((image, suboptimal)) => Ok(AcquireOutcome::Acquired {
                image: image as usize,
                suboptimal,
            }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
            Err(e) => Err(vk_err("acquire_next_image", e)),
        }
    }

    pub fn present(&self, image: usize) -> Result<PresentOutcome, RenderError> {
        let index = image as u32;
        let wait = self.images[image].render_finished.raw();
        let present = vk::PresentInfoKHR {
            s_type: vk::StructureType::PRESENT_INFO_KHR,
            wait_semaphore_count: 1,
            p_wait_semaphores: &wait,
            swapchain_count: 1,
            p_swapchains: &self.handle,
            p_image_indices: &index,
            ..Default::default()
        };
        match unsafe {
            self.ctx
                .swapchain_loader
                .queue_present(self.ctx.present_queue, &present)
        } {
            Ok(false) => Ok(PresentOutcome::Presented),
            Ok(true) => Ok(PresentOutcome::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::OutOfDate),
            Err(e) => Err(vk_err("queue_present", e)),
        }
    }
}

impl Drop for PresentationChain {
    fn drop(&mut self) {
        self.destroy();
        debug!("vk: presentation chain destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sf(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR { format, color_space }
    }

    #[test]
    fn srgb_formats_preferred() {
        let formats = [
            sf(vk::Format::B8G8R8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            sf(vk::Format::R8G8B8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        let (f, _) = pick_surface_format(&formats).unwrap();
        assert_eq!(f.format, vk::Format::R8G8B8A8_SRGB);
    }

    #[test]
    fn falls_back_to_first_format() {
        let formats = [sf(vk::Format::R16G16B16A16_SFLOAT, vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT)];
        let (f, reason) = pick_surface_format(&formats).unwrap();
        assert_eq!(f.format, vk::Format::R16G16B16A16_SFLOAT);
        assert_eq!(reason, "driver_default");
        assert!(pick_surface_format(&[]).is_none());
    }

    #[test]
    fn free_size_surface_has_no_current_extent() {
        let caps = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D { width: 1, height: 1 },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 4096,
            },
            min_image_count: 2,
            max_image_count: 0,
            ..Default::default()
        };
        let limits = surface_limits(&caps);
        assert_eq!(limits.current, None);
        assert_eq!(choose_extent(&limits, RenderSize::new(8000, 600)), RenderSize::new(4096, 600));
        assert_eq!(choose_image_count(&limits), 3);
    }

    #[test]
    fn present_modes_map_both_ways() {
        for m in [
            PresentMode::Immediate,
            PresentMode::Mailbox,
            PresentMode::Fifo,
            PresentMode::FifoRelaxed,
        ] {
            assert_eq!(present_mode_from_vk(present_mode_to_vk(m)), Some(m));
        }
        assert_eq!(present_mode_from_vk(vk::PresentModeKHR::SHARED_DEMAND_REFRESH), None);
    }
}
