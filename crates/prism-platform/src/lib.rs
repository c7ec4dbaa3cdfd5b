// SPDX-License-Identifier: CEPL-1.0
//! Window-system glue: re-exports `winit` and turns its window events into
//! the few notifications the renderer cares about.
pub use winit;

use prism_render::RenderSize;
use winit::dpi::PhysicalSize;
use winit::event::WindowEvent;
use winit::window::Window;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlatformEvent {
    /// New framebuffer size; zero while minimized.
    Resized(RenderSize),
    CloseRequested,
    Occluded(bool),
    Focused(bool),
    RedrawRequested,
    Ignored,
}

pub fn to_render_size(size: PhysicalSize<u32>) -> RenderSize {
    RenderSize::new(size.width, size.height)
}

pub fn translate(event: &WindowEvent) -> PlatformEvent {
    match event {
        WindowEvent::Resized(size) => PlatformEvent::Resized(to_render_size(*size)),
        WindowEvent::CloseRequested => PlatformEvent::CloseRequested,
        WindowEvent::Occluded(o) => PlatformEvent::Occluded(*o),
        WindowEvent::Focused(f) => PlatformEvent::Focused(*f),
        WindowEvent::RedrawRequested => PlatformEvent::RedrawRequested,
        _ => PlatformEvent::Ignored,
    }
}

/// Current drawable size in physical pixels.
pub fn framebuffer_size(window: &Window) -> RenderSize {
    to_render_size(window.inner_size())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimize_reports_zero_size() {
        let ev = WindowEvent::Resized(PhysicalSize::new(0, 0));
        assert_eq!(translate(&ev), PlatformEvent::Resized(RenderSize::ZERO));
        assert!(matches!(translate(&ev), PlatformEvent::Resized(s) if s.is_empty()));
    }

    #[test]
    fn lifecycle_events_pass_through() {
        assert_eq!(translate(&WindowEvent::CloseRequested), PlatformEvent::CloseRequested);
        assert_eq!(translate(&WindowEvent::Focused(false)), PlatformEvent::Focused(false));
        assert_eq!(translate(&WindowEvent::Occluded(true)), PlatformEvent::Occluded(true));
        assert_eq!(translate(&WindowEvent::RedrawRequested), PlatformEvent::RedrawRequested);
    }
}
