// SPDX-License-Identifier: CEPL-1.0
//! Owned fences and semaphores.
use std::sync::Arc;
use std::time::Duration;

use ash::vk;
use prism_render::RenderError;
use tracing::debug;

use crate::device::DeviceContext;
use crate::vk_err;

/// CPU-observable completion signal. Created signaled so the first wait of
/// a frame slot returns immediately.
pub struct Fence {
    ctx: Arc<DeviceContext>,
    handle: vk::Fence,
}

impl Fence {
    pub fn new(ctx: &Arc<DeviceContext>, signaled: bool) -> Result<Self, RenderError> {
        let ci = vk::FenceCreateInfo {
            s_type: vk::StructureType::FENCE_CREATE_INFO,
            flags: if signaled {
                vk::FenceCreateFlags::SIGNALED
            } else {
                vk::FenceCreateFlags::empty()
            },
            ..Default::default()
        };
        let handle =
            unsafe { ctx.device.create_fence(&ci, None) }.map_err(|e| vk_err("create_fence", e))?;
        Ok(Self {
            ctx: Arc::clone(ctx),
            handle,
        })
    }

    pub fn raw(&self) -> vk::Fence {
        self.handle
    }

    /// `None` waits forever. A timeout maps to [`RenderError::FenceTimeout`]
    /// with `slot` for the diagnostic.
    pub fn wait(&self, timeout: Option<Duration>, slot: usize) -> Result<(), RenderError> {
        let ns = timeout.map_or(u64::MAX, |t| u64::try_from(t.as_nanos()).unwrap_or(u64::MAX));
        match unsafe { self.ctx.device.wait_for_fences(&[self.handle], true, ns) } {
            Ok(()) => Ok(()),
            Err(vk::Result::TIMEOUT) => Err(RenderError::FenceTimeout { slot }),
            Err(e) => Err(vk_err("wait_for_fences", e)),
        }
    }

    pub fn reset(&self) -> Result<(), RenderError> {
        unsafe { self.ctx.device.reset_fences(&[self.handle]) }.map_err(|e| vk_err("reset_fences", e))
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        unsafe { self.ctx.device.destroy_fence(self.handle, None) };
        debug!("vk: fence {:?} destroyed", self.handle);
    }
}

/// GPU-side ordering signal between queue operations.
pub struct Semaphore {
    ctx: Arc<DeviceContext>,
    handle: vk::Semaphore,
}

impl Semaphore {
    pub fn new(ctx: &Arc<DeviceContext>) -> Result<Self, RenderError> {
        let ci = vk::SemaphoreCreateInfo::default();
        let handle = unsafe { ctx.device.create_semaphore(&ci, None) }
            .map_err(|e| vk_err("create_semaphore", e))?;
        Ok(Self {
            ctx: Arc::clone(ctx),
            handle,
        })
    }

    pub fn raw(&self) -> vk::Semaphore {
        self.handle
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        unsafe { self.ctx.device.destroy_semaphore(self.handle, None) };
    }
}

/// Per-slot objects: the completion fence, the "image acquired" semaphore
/// and the command buffer the fence guards.
pub struct FrameSlot {
    pub in_flight: Fence,
    pub image_acquired: Semaphore,
    pub cmd: vk::CommandBuffer,
}

pub fn create_frame_slots(ctx: &Arc<DeviceContext>, count: usize) -> Result<Vec<FrameSlot>, RenderError> {
    let cmds = ctx.allocate_command_buffers(count as u32)?;
    let mut slots = Vec::with_capacity(count);
    for cmd in cmds {
        slots.push(FrameSlot {
            in_flight: Fence::new(ctx, true)?,
            image_acquired: Semaphore::new(ctx)?,
            cmd,
        });
    }
    Ok(slots)
}

/// `count` semaphores, e.g. one "render finished" per chain image.
pub fn create_semaphores(ctx: &Arc<DeviceContext>, count: usize) -> Result<Vec<Semaphore>, RenderError> {
    (0..count).map(|_| Semaphore::new(ctx)).collect()
}
