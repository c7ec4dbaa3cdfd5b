// SPDX-License-Identifier: CEPL-1.0
//! Backend-agnostic half of the prism frame renderer.
//!
//! Everything here is pure policy or bookkeeping: which device and queues to
//! use, how big the presentation chain should be, when it must be rebuilt,
//! and the acquire → record → submit → present state machine. The GPU itself
//! sits behind [`GpuBackend`]; `prism-render-vk` provides the Vulkan variant
//! and [`headless`] a simulated one.
use anyhow::Result;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

pub mod backend;
pub mod chain;
pub mod error;
pub mod frame;
pub mod graphics;
pub mod headless;
pub mod resize;
pub mod select;
pub mod settings;
pub mod ui;
pub mod viewport;

pub use backend::{AcquireOutcome, GpuBackend, PresentOutcome, ViewportResize, ViewportTexture};
pub use error::RenderError;
pub use frame::{FrameEngine, FrameOutcome, FrameState, FrameStats, SkipReason};
pub use graphics::GraphicsBackend;
pub use settings::{PresentPolicy, RenderSettings, ViewportSettings, ViewportSync};
pub use ui::{NullUi, UiFrame, UiLayer};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

impl RenderSize {
    pub const ZERO: RenderSize = RenderSize { width: 0, height: 0 };

    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// A minimized window reports zero in at least one dimension.
    pub const fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl std::fmt::Display for RenderSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Dynamic viewport as recorded into a command buffer.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

impl Viewport {
    /// Top-left origin viewport for a Y-down clip space.
    ///
    /// Vulkan's clip space has +Y pointing down the framebuffer; recording a
    /// negative height anchored at the bottom edge keeps the engine's
    /// top-left screen convention identical across backends.
    pub fn flipped(size: RenderSize) -> Self {
        Self {
            x: 0.0,
            y: size.height as f32,
            width: size.width as f32,
            height: -(size.height as f32),
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }
}

pub trait Renderer {
    fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        settings: &RenderSettings,
    ) -> Result<Self>
    where
        Self: Sized;

    /// Records a framebuffer size notification; the chain is rebuilt before
    /// the next frame.
    fn resize(&mut self, size: RenderSize) -> Result<()>;
    fn render(&mut self) -> Result<FrameOutcome>;
    fn set_clear_color(&mut self, rgba: [f32; 4]);
    fn set_vsync(&mut self, _on: bool) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flipped_viewport_anchors_at_bottom_edge() {
        let vp = Viewport::flipped(RenderSize::new(1280, 720));
        assert_eq!(vp.y, 720.0);
        assert_eq!(vp.height, -720.0);
        assert_eq!(vp.width, 1280.0);
    }

    #[test]
    fn zero_dimension_is_empty() {
        assert!(RenderSize::new(0, 600).is_empty());
        assert!(RenderSize::new(800, 0).is_empty());
        assert!(!RenderSize::new(1, 1).is_empty());
    }
}
