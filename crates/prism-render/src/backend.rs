// SPDX-License-Identifier: CEPL-1.0
//! The seam between the frame engine and a concrete graphics API.
//!
//! Slots index the frames-in-flight arrays (fence, "image acquired"
//! semaphore, command buffer); images index the presentation chain arrays
//! ("render finished" semaphore, framebuffer). A backend owns both sets of
//! objects, the engine decides when each may be touched.
use std::time::Duration;

use crate::{PresentPolicy, RenderError, RenderSize, Viewport};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AcquireOutcome {
    Acquired { image: usize, suboptimal: bool },
    /// The chain no longer matches the surface; nothing was acquired.
    OutOfDate,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    Suboptimal,
    OutOfDate,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ViewportResize {
    /// Inside the tolerance band, or no viewport target exists.
    Unchanged,
    Recreated,
}

/// Shader-visible handle the UI layer uses to draw the viewport target.
///
/// `generation` increases on every rebuild of the target, so a handle held
/// across a resize can be recognised as stale.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ViewportTexture {
    pub id: u64,
    pub generation: u64,
    pub size: RenderSize,
}

pub trait GpuBackend {
    /// Token for a command buffer in the recording state.
    type CommandBuffer: Copy;

    fn name(&self) -> &'static str;
    fn frames_in_flight(&self) -> usize;
    /// Zero while the chain is empty (minimized window).
    fn image_count(&self) -> usize;
    fn chain_extent(&self) -> RenderSize;

    /// Blocks until the slot's fence signals. `None` waits indefinitely.
    fn wait_frame_fence(&mut self, slot: usize, timeout: Option<Duration>) -> Result<(), RenderError>;
    fn reset_frame_fence(&mut self, slot: usize) -> Result<(), RenderError>;
    /// Signals the slot's "image acquired" semaphore once the image is ready.
    fn acquire_next_image(&mut self, slot: usize) -> Result<AcquireOutcome, RenderError>;

    /// Resets and begins the slot's command buffer.
    fn begin_commands(&mut self, slot: usize) -> Result<Self::CommandBuffer, RenderError>;
    fn set_viewport(&mut self, cmd: Self::CommandBuffer, viewport: Viewport, scissor: RenderSize);
    /// Records (or submits, depending on the viewport sync mode) the
    /// off-screen pass. Returns false when no viewport target is active.
    fn record_offscreen_pass(&mut self, slot: usize, cmd: Self::CommandBuffer) -> Result<bool, RenderError>;
    fn begin_main_pass(&mut self, cmd: Self::CommandBuffer, image: usize);
    fn end_main_pass(&mut self, cmd: Self::CommandBuffer);
    fn end_commands(&mut self, cmd: Self::CommandBuffer) -> Result<(), RenderError>;

    /// Waits on the slot's "image acquired" semaphore, signals the image's
    /// "render finished" semaphore and the slot's fence.
    fn submit(&mut self, slot: usize, image: usize) -> Result<(), RenderError>;
    fn present(&mut self, image: usize) -> Result<PresentOutcome, RenderError>;

    fn wait_idle(&mut self) -> Result<(), RenderError>;
    /// Tears the chain down and rebuilds it for `size`, requerying surface
    /// capabilities. Returns the extent actually built; zero means empty.
    /// The device must be idle.
    fn recreate_chain(&mut self, size: RenderSize) -> Result<RenderSize, RenderError>;
    fn destroy_chain(&mut self) -> Result<(), RenderError>;

    fn viewport_size(&self) -> Option<RenderSize>;
    fn resize_viewport(&mut self, size: RenderSize) -> Result<ViewportResize, RenderError>;
    /// Created on first use; `None` when the viewport is disabled.
    fn viewport_texture(&mut self) -> Result<Option<ViewportTexture>, RenderError>;

    fn set_clear_color(&mut self, rgba: [f32; 4]);
    /// Takes effect on the next chain rebuild.
    fn set_present_policy(&mut self, policy: PresentPolicy);
}
