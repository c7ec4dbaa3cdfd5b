// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
mod config;

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{bail, Result};
use clap::{Parser, ValueEnum};
use prism_core::init_tracing;
use prism_platform::winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    raw_window_handle::{HasDisplayHandle, HasWindowHandle},
    window::{Window, WindowId},
};
use prism_platform::{framebuffer_size, translate, PlatformEvent};
use prism_render::headless::HeadlessBackend;
use prism_render::{
    FrameOutcome, GraphicsBackend, NullUi, PresentPolicy, RenderError, RenderSettings, RenderSize,
    Renderer,
};
use prism_render_vk::VkRenderer;
use tracing::{debug, error, info, warn};

use crate::config::load_cfg;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Renderer backend
    #[arg(long, value_enum, default_value_t = BackendChoice::Vk)]
    backend: BackendChoice,

    #[arg(long, default_value = "prism.toml")]
    config: PathBuf,

    /// Frames to render with the headless backend
    #[arg(long, default_value_t = 120)]
    frames: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum BackendChoice {
    Vk,
    Headless,
}

/// Logs a render error; returns true when the caller must stop.
fn report(e: &anyhow::Error) -> bool {
    match e.downcast_ref::<RenderError>() {
        Some(re) if !re.is_fatal() => {
            warn!("render: {re}");
            false
        }
        _ => {
            error!("render: {e:#}");
            true
        }
    }
}

struct App {
    settings: RenderSettings,
    window: Option<Window>,
    renderer: Option<Box<VkRenderer>>,
    render_size: RenderSize,
    failed: Option<anyhow::Error>,

    exiting: bool,
    frames: u32,
    skipped: u32,
    last_fps_instant: Instant,

    paused: bool,
    focused: bool,
}

impl App {
    fn new(settings: RenderSettings) -> Self {
        Self {
            settings,
            window: None,
            renderer: None,
            render_size: RenderSize::new(1, 1),
            failed: None,
            exiting: false,
            frames: 0,
            skipped: 0,
            last_fps_instant: Instant::now(),
            paused: false,
            focused: true,
        }
    }

    fn create(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let window = event_loop.create_window(Window::default_attributes().with_title("prism"))?;
        self.render_size = framebuffer_size(&window);

        let wh = window.window_handle()?;
        let dh = window.display_handle()?;
        let mut renderer = VkRenderer::new(&wh, &dh, self.render_size, &self.settings)?;
        renderer.set_clear_color(self.settings.clear_color);
        info!(
            "backend = vk, present policy = {:?}, frames in flight = {}",
            self.settings.present_policy, self.settings.frames_in_flight
        );

        self.window = Some(window);
        self.renderer = Some(Box::new(renderer));
        Ok(())
    }

    fn shut_down(&mut self, event_loop: &ActiveEventLoop) {
        self.exiting = true;
        // Renderer before window: the surface borrows the native window.
        self.renderer = None;
        self.window = None;
        event_loop.exit();
    }

    fn redraw(&mut self, event_loop: &ActiveEventLoop) {
        if self.exiting || self.paused {
            return;
        }
        let Some(renderer) = &mut self.renderer else {
            return;
        };
        match renderer.render() {
            Ok(FrameOutcome::Presented { .. }) => {
                self.frames = self.frames.saturating_add(1);
            }
            Ok(FrameOutcome::Skipped(reason)) => {
                self.skipped = self.skipped.saturating_add(1);
                debug!("frame skipped: {reason:?}");
            }
            Err(e) => {
                if report(&e) {
                    self.failed = Some(e);
                    self.shut_down(event_loop);
                }
            }
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_none() {
            if let Err(e) = self.create(event_loop) {
                error!("vk init failed: {e:#}");
                self.failed = Some(e);
                self.shut_down(event_loop);
                return;
            }
        }

        event_loop.set_control_flow(match self.settings.present_policy {
            PresentPolicy::Uncapped => ControlFlow::Poll,
            _ => ControlFlow::Wait,
        });

        self.paused = self.render_size.is_empty();
        info!("resumed → paused={}", self.paused);

        if !self.paused {
            if let Some(w) = &self.window {
                w.request_redraw();
            }
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        window_id: WindowId,
        event: WindowEvent,
    ) {
        if let Some(window) = &self.window {
            if window_id != window.id() {
                return;
            }
        }

        match translate(&event) {
            PlatformEvent::CloseRequested => {
                info!("CloseRequested");
                self.shut_down(event_loop);
            }

            PlatformEvent::Resized(size) => {
                self.render_size = size;
                let now_paused = size.is_empty();
                if self.paused != now_paused {
                    self.paused = now_paused;
                    info!("Resized → {size} (paused={})", self.paused);
                } else {
                    debug!("Resized → {size}");
                }

                // Zero sizes are forwarded too so the chain empties while minimized.
                if let Some(renderer) = &mut self.renderer {
                    if let Err(e) = renderer.resize(size) {
                        if report(&e) {
                            self.failed = Some(e);
                            self.shut_down(event_loop);
                            return;
                        }
                    }
                }
                if !self.paused {
                    if let Some(w) = &self.window {
                        w.request_redraw();
                    }
                }
            }

            PlatformEvent::Occluded(occluded) => {
                let now_paused = occluded || self.render_size.is_empty();
                if self.paused != now_paused {
                    self.paused = now_paused;
                    info!("Occluded={occluded} → paused={}", self.paused);
                }
            }

            PlatformEvent::Focused(focused) => {
                if self.focused != focused {
                    self.focused = focused;
                    info!("Focused({focused})");
                    // Uncapped presentation only while the window has focus.
                    if self.settings.present_policy == PresentPolicy::Uncapped {
                        if let Some(renderer) = &mut self.renderer {
                            renderer.set_vsync(!focused);
                        }
                    }
                }
            }

            PlatformEvent::RedrawRequested => self.redraw(event_loop),

            PlatformEvent::Ignored => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.exiting {
            return;
        }

        if self.paused {
            event_loop.set_control_flow(ControlFlow::Wait);
            self.frames = 0;
            return;
        }

        let uncapped = self.focused && self.settings.present_policy == PresentPolicy::Uncapped;
        event_loop.set_control_flow(if uncapped {
            ControlFlow::Poll
        } else {
            ControlFlow::Wait
        });
        if let Some(w) = &self.window {
            w.request_redraw();
        }

        let now = Instant::now();
        if now.duration_since(self.last_fps_instant).as_secs_f32() >= 1.0 {
            info!("fps ~ {} (skipped {})", self.frames, self.skipped);
            self.frames = 0;
            self.skipped = 0;
            self.last_fps_instant = now;
        }
    }
}

/// Drives the simulated GPU for `frames` frames without a window.
fn run_headless(settings: &RenderSettings, frames: u64) -> Result<()> {
    let size = RenderSize::new(1280, 720);
    let backend = HeadlessBackend::new(settings, size);
    let mut gfx = GraphicsBackend::new(backend, settings);
    let mut ui = NullUi::default();
    info!("backend = headless, {frames} frames at {size}");

    for _ in 0..frames {
        if let Err(e) = gfx.render_frame(&mut ui) {
            let e = anyhow::Error::from(e);
            if report(&e) {
                return Err(e);
            }
        }
    }
    gfx.shutdown()?;

    let stats = gfx.stats();
    let counters = gfx.backend().counters();
    info!(
        "presented {} skipped {} recreations {} handoff waits {} viewport rebuilds {}",
        stats.presented,
        stats.skipped,
        stats.recreations,
        stats.handoff_waits,
        stats.viewport_rebuilds
    );
    debug!("{counters:?}");

    let violations = gfx.backend().violations();
    if !violations.is_empty() {
        for v in violations {
            error!("sync violation: {v}");
        }
        bail!("{} synchronization violations", violations.len());
    }
    Ok(())
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();
    let settings = load_cfg(&args.config)?.to_settings();

    match args.backend {
        BackendChoice::Headless => run_headless(&settings, args.frames),
        BackendChoice::Vk => {
            let event_loop: EventLoop<()> = EventLoop::new()?;
            let mut app = App::new(settings);
            event_loop.run_app(&mut app)?;
            match app.failed.take() {
                Some(e) => Err(e),
                None => Ok(()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_defaults() {
        let args = Args::parse_from(["prism"]);
        assert_eq!(args.backend, BackendChoice::Vk);
        assert_eq!(args.config, PathBuf::from("prism.toml"));
        assert_eq!(args.frames, 120);
    }

    #[test]
    fn headless_run_is_clean() {
        let settings = RenderSettings::default();
        run_headless(&settings, 16).unwrap();
    }

    #[test]
    fn non_fatal_errors_do_not_stop_the_loop() {
        assert!(!report(&RenderError::FenceTimeout { slot: 1 }.into()));
        assert!(report(&RenderError::DeviceLost.into()));
        assert!(report(&anyhow::anyhow!("window creation failed")));
    }
}
