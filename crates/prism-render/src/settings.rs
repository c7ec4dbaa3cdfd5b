// SPDX-License-Identifier: CEPL-1.0
use std::time::Duration;

use crate::RenderSize;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PresentPolicy {
    /// Tear-free, low latency; falls back to FIFO.
    #[default]
    Mailbox,
    /// Classic vsync, always available.
    Fifo,
    /// Explicit opt-in to tearing presentation (IMMEDIATE), then MAILBOX, then FIFO.
    Uncapped,
}

/// How the off-screen viewport pass reaches the GPU.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ViewportSync {
    /// Recorded into the frame's own command buffer, gated by the frame fence.
    #[default]
    Inline,
    /// Own command buffer, chained to the main submission by a semaphore.
    /// Without `fenced` the queue is drained after the viewport submission.
    Separate { fenced: bool },
}

#[derive(Clone, Debug)]
pub struct ViewportSettings {
    pub enabled: bool,
    pub size: RenderSize,
    /// Resize requests within this many pixels on both axes are ignored.
    pub tolerance: u32,
    pub clear_color: [f32; 4],
    pub sync: ViewportSync,
}

impl Default for ViewportSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            size: RenderSize::new(800, 600),
            tolerance: 8,
            clear_color: [0.10, 0.10, 0.12, 1.0],
            sync: ViewportSync::Inline,
        }
    }
}

#[derive(Clone, Debug)]
pub struct RenderSettings {
    pub clear_color: [f32; 4],
    pub present_policy: PresentPolicy,
    pub frames_in_flight: usize,
    /// Upper bound on the image ownership hand-off wait.
    pub handoff_timeout: Duration,
    pub validation: bool,
    pub prefer_discrete: bool,
    /// Shaders that must load at startup, as `<name>.<stage>` (e.g. `ui.vert`).
    pub required_shaders: Vec<String>,
    pub viewport: ViewportSettings,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            clear_color: [0.02, 0.02, 0.04, 1.0],
            present_policy: PresentPolicy::Mailbox,
            frames_in_flight: 2,
            handoff_timeout: Duration::from_secs(1),
            validation: cfg!(debug_assertions),
            prefer_discrete: true,
            required_shaders: Vec::new(),
            viewport: ViewportSettings::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_record_viewport_inline() {
        assert_eq!(ViewportSync::default(), ViewportSync::Inline);
        let s = RenderSettings::default();
        assert_eq!(s.viewport.sync, ViewportSync::Inline);
        assert_eq!(s.present_policy, PresentPolicy::Mailbox);
        assert_eq!(s.viewport.tolerance, 8);
    }
}
