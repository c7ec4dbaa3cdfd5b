// SPDX-License-Identifier: CEPL-1.0
//! Hooks for the immediate-mode UI layer.
use crate::{RenderSize, ViewportTexture};

/// Per-frame information handed to the UI before recording starts.
#[derive(Clone, Copy, Debug)]
pub struct UiFrame {
    pub size: RenderSize,
    pub slot: usize,
    pub image: usize,
    /// Off-screen target to display, with its current pixel size.
    pub viewport: Option<ViewportTexture>,
}

/// An immediate-mode UI driven by the frame engine.
///
/// `C` is the backend's command buffer token.
pub trait UiLayer<C> {
    fn begin_frame(&mut self, frame: &UiFrame);

    /// Finishes the frame; returns how many primitives were produced.
    fn draw_data(&mut self) -> usize;

    /// Only called when [`draw_data`](Self::draw_data) returned non-zero,
    /// inside the main render pass.
    fn render_draw_data(&mut self, cmd: C);

    /// Size the UI wants the off-screen viewport to have.
    fn requested_viewport_size(&mut self) -> Option<RenderSize> {
        None
    }
}

/// UI that never draws anything.
#[derive(Debug, Default)]
pub struct NullUi {
    frames: u64,
}

impl NullUi {
    pub fn frames(&self) -> u64 {
        self.frames
    }
}

impl<C> UiLayer<C> for NullUi {
    fn begin_frame(&mut self, _frame: &UiFrame) {
        self.frames += 1;
    }

    fn draw_data(&mut self) -> usize {
        0
    }

    fn render_draw_data(&mut self, _cmd: C) {}
}
