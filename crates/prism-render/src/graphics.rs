// SPDX-License-Identifier: CEPL-1.0
use tracing::info;

use crate::frame::FrameStats;
use crate::{
    FrameEngine, FrameOutcome, GpuBackend, PresentPolicy, RenderError, RenderSettings, RenderSize,
    UiLayer, ViewportResize,
};

/// One device, its presentation chain and the frame engine driving them.
///
/// Owned by whoever runs the event loop and passed explicitly; there is no
/// process-wide renderer.
pub struct GraphicsBackend<B: GpuBackend> {
    backend: B,
    engine: FrameEngine,
}

impl<B: GpuBackend> GraphicsBackend<B> {
    pub fn new(backend: B, settings: &RenderSettings) -> Self {
        let engine = FrameEngine::new(
            backend.frames_in_flight(),
            backend.image_count(),
            backend.chain_extent(),
            settings.handoff_timeout,
        );
        info!(
            "{} backend ready: {} frames in flight, {} images at {}",
            backend.name(),
            backend.frames_in_flight(),
            backend.image_count(),
            backend.chain_extent()
        );
        Self { backend, engine }
    }

    pub fn render_frame(
        &mut self,
        ui: &mut dyn UiLayer<B::CommandBuffer>,
    ) -> Result<FrameOutcome, RenderError> {
        self.engine.render_frame(&mut self.backend, ui)
    }

    pub fn notify_resize(&mut self, size: RenderSize) {
        self.engine.notify_resize(size);
    }

    pub fn resize_viewport(&mut self, size: RenderSize) -> Result<ViewportResize, RenderError> {
        self.engine.resize_viewport(&mut self.backend, size)
    }

    pub fn set_clear_color(&mut self, rgba: [f32; 4]) {
        self.backend.set_clear_color(rgba);
    }

    pub fn set_present_policy(&mut self, policy: PresentPolicy) {
        info!("present policy → {policy:?}");
        self.backend.set_present_policy(policy);
        self.engine.request_rebuild();
    }

    pub fn stats(&self) -> FrameStats {
        self.engine.stats()
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn engine(&self) -> &FrameEngine {
        &self.engine
    }

    /// Drains the queues and releases the chain. GPU objects owned by the
    /// backend are released when it drops.
    pub fn shutdown(&mut self) -> Result<(), RenderError> {
        self.backend.wait_idle()?;
        self.backend.destroy_chain()?;
        info!("{} backend shut down", self.backend.name());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::HeadlessBackend;
    use crate::NullUi;

    fn gfx() -> GraphicsBackend<HeadlessBackend> {
        let settings = RenderSettings::default();
        GraphicsBackend::new(
            HeadlessBackend::new(&settings, RenderSize::new(800, 600)),
            &settings,
        )
    }

    #[test]
    fn present_policy_change_rebuilds_chain() {
        let mut g = gfx();
        g.set_present_policy(PresentPolicy::Fifo);
        g.render_frame(&mut NullUi::default()).unwrap();
        assert_eq!(g.backend().present_policy(), PresentPolicy::Fifo);
        assert_eq!(g.backend().counters().chain_builds, 2);
        assert_eq!(g.stats().recreations, 1);
    }

    #[test]
    fn shutdown_leaves_empty_chain() {
        let mut g = gfx();
        let mut ui = NullUi::default();
        for _ in 0..4 {
            g.render_frame(&mut ui).unwrap();
        }
        g.shutdown().unwrap();
        assert_eq!(g.backend().image_count(), 0);
        assert!(g.backend().violations().is_empty());
    }

    #[test]
    fn clear_color_forwarded() {
        let mut g = gfx();
        g.set_clear_color([1.0, 0.0, 0.0, 1.0]);
        assert_eq!(g.backend().clear_color(), [1.0, 0.0, 0.0, 1.0]);
    }
}
