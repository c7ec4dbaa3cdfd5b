// SPDX-License-Identifier: CEPL-1.0
//! Per-frame acquire → record → submit → present state machine.
//!
//! Ordering rules enforced here:
//! - a slot's command buffer is recorded only after that slot's fence has
//!   been observed signaled;
//! - an image is written by at most one in-flight frame: if the acquired
//!   image is still owned by another slot, that slot's fence is waited first;
//! - every recreation of the chain happens between frames, after the device
//!   went idle and with all ownership markers cleared.
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::resize::{ResizeTracker, ResizeTrigger};
use crate::{
    AcquireOutcome, GpuBackend, PresentOutcome, RenderError, RenderSize, UiFrame, UiLayer, Viewport,
    ViewportResize,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameState {
    Ready,
    Acquiring,
    Recording,
    Submitted,
    Presented,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkipReason {
    /// Zero-sized chain, nothing to draw into.
    EmptyChain,
    /// Acquire reported the chain stale; no GPU work was issued.
    AcquireOutOfDate,
    /// Work was submitted but the image could not be shown.
    PresentOutOfDate,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    Presented { image: usize, suboptimal: bool },
    Skipped(SkipReason),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub presented: u64,
    pub skipped: u64,
    pub recreations: u64,
    pub handoff_waits: u64,
    pub viewport_rebuilds: u64,
}

#[derive(Debug)]
pub struct FrameEngine {
    slots: Vec<FrameState>,
    current: usize,
    /// Image index → slot whose fence guards the last write to it.
    images_in_flight: Vec<Option<usize>>,
    resize: ResizeTracker,
    handoff_timeout: Duration,
    stats: FrameStats,
}

impl FrameEngine {
    pub fn new(
        frames_in_flight: usize,
        image_count: usize,
        initial_size: RenderSize,
        handoff_timeout: Duration,
    ) -> Self {
        debug_assert!(frames_in_flight > 0, "at least one frame in flight");
        Self {
            slots: vec![FrameState::Ready; frames_in_flight.max(1)],
            current: 0,
            images_in_flight: vec![None; image_count],
            resize: ResizeTracker::new(initial_size),
            handoff_timeout,
            stats: FrameStats::default(),
        }
    }

    pub fn notify_resize(&mut self, size: RenderSize) {
        debug!("resize notification {size}");
        self.resize.notify_resize(size);
    }

    /// Forces a rebuild at the current size before the next frame, e.g.
    /// after a present-mode change.
    pub fn request_rebuild(&mut self) {
        self.resize.mark_stale();
    }

    pub fn resize_tracker(&self) -> &ResizeTracker {
        &self.resize
    }

    pub fn current_slot(&self) -> usize {
        self.current
    }

    pub fn frames_in_flight(&self) -> usize {
        self.slots.len()
    }

    pub fn slot_state(&self, slot: usize) -> FrameState {
        self.slots[slot]
    }

    pub fn image_owner(&self, image: usize) -> Option<usize> {
        self.images_in_flight.get(image).copied().flatten()
    }

    pub fn stats(&self) -> FrameStats {
        self.stats
    }

    /// Runs the resize / recovery protocol if a trigger is pending.
    /// Returns true when the chain was rebuilt.
    pub fn recover<B: GpuBackend>(&mut self, backend: &mut B) -> Result<bool, RenderError> {
        let Some(trigger) = self.resize.pending() else {
            return Ok(false);
        };

        if let ResizeTrigger::Explicit(size) = trigger {
            if self.resize.is_redundant(size, backend.chain_extent()) {
                debug!("resize to {size} already applied");
                self.resize.acknowledge();
                return Ok(false);
            }
        }

        let generation = self.resize.begin()?;
        match self.rebuild(backend, trigger) {
            Ok(actual) => {
                match trigger {
                    ResizeTrigger::Explicit(requested) => {
                        self.resize.finish_explicit(generation, requested, actual)
                    }
                    ResizeTrigger::Stale => self.resize.finish_stale(),
                }
                self.stats.recreations += 1;
                Ok(true)
            }
            Err(e) => {
                self.resize.abort();
                Err(e)
            }
        }
    }

    fn rebuild<B: GpuBackend>(
        &mut self,
        backend: &mut B,
        trigger: ResizeTrigger,
    ) -> Result<RenderSize, RenderError> {
        backend.wait_idle()?;
        // Markers point at images of the chain about to be destroyed.
        self.images_in_flight.iter_mut().for_each(|owner| *owner = None);

        let target = match trigger {
            ResizeTrigger::Explicit(size) => size,
            ResizeTrigger::Stale => self.resize.framebuffer_size(),
        };
        let actual = backend.recreate_chain(target)?;

        self.images_in_flight = vec![None; backend.image_count()];
        self.slots.iter_mut().for_each(|s| *s = FrameState::Ready);
        info!(
            "{} chain rebuilt ({:?}): requested {target}, got {actual}, {} images",
            backend.name(),
            trigger,
            backend.image_count()
        );
        Ok(actual)
    }

    /// Renders and presents one frame.
    ///
    /// Transient conditions come back as [`FrameOutcome::Skipped`]; only
    /// fatal backend failures and hand-off timeouts are errors.
    pub fn render_frame<B: GpuBackend>(
        &mut self,
        backend: &mut B,
        ui: &mut dyn UiLayer<B::CommandBuffer>,
    ) -> Result<FrameOutcome, RenderError> {
        self.recover(backend)?;

        let size = backend.chain_extent();
        if backend.image_count() == 0 || size.is_empty() {
            return Ok(self.skip(SkipReason::EmptyChain));
        }

        let slot = self.current;

        // 1) The slot's previous submission must be finished before its
        //    command buffer and semaphore are reused.
        backend.wait_frame_fence(slot, None)?;
        self.slots[slot] = FrameState::Acquiring;

        // 2) Acquire.
        let (image, suboptimal) = match backend.acquire_next_image(slot)? {
            AcquireOutcome::Acquired { image, suboptimal } => (image, suboptimal),
            AcquireOutcome::OutOfDate => {
                self.slots[slot] = FrameState::Ready;
                self.resize.mark_stale();
                return Ok(self.skip(SkipReason::AcquireOutOfDate));
            }
        };
        if suboptimal {
            debug!("acquire suboptimal on image {image}, rebuilding before next frame");
            self.resize.mark_stale();
        }
        if image >= self.images_in_flight.len() {
            self.images_in_flight.resize(image + 1, None);
        }

        // 3) Ownership hand-off.
        if let Some(owner) = self.images_in_flight[image] {
            if owner != slot {
                self.stats.handoff_waits += 1;
                debug!("image {image} still owned by slot {owner}, waiting");
                if let Err(e) = backend.wait_frame_fence(owner, Some(self.handoff_timeout)) {
                    warn!("hand-off wait for image {image} failed: {e}");
                    // The acquired semaphore is now signaled with no waiter;
                    // a rebuild recreates it.
                    self.slots[slot] = FrameState::Ready;
                    self.resize.mark_stale();
                    return Err(e);
                }
            }
        }

        // 4) Record.
        self.slots[slot] = FrameState::Recording;
        let viewport = backend.viewport_texture()?;
        ui.begin_frame(&UiFrame {
            size,
            slot,
            image,
            viewport,
        });

        let cmd = backend.begin_commands(slot)?;
        backend.record_offscreen_pass(slot, cmd)?;
        backend.set_viewport(cmd, Viewport::flipped(size), size);
        backend.begin_main_pass(cmd, image);
        if ui.draw_data() > 0 {
            ui.render_draw_data(cmd);
        }
        backend.end_main_pass(cmd);
        backend.end_commands(cmd)?;

        // 5) Submit. The fence is re-armed right before the submission that
        //    will signal it again.
        backend.reset_frame_fence(slot)?;
        backend.submit(slot, image)?;
        self.images_in_flight[image] = Some(slot);
        self.slots[slot] = FrameState::Submitted;

        // 6) Present.
        let outcome = match backend.present(image)? {
            PresentOutcome::Presented => FrameOutcome::Presented { image, suboptimal },
            PresentOutcome::Suboptimal => {
                self.resize.mark_stale();
                FrameOutcome::Presented {
                    image,
                    suboptimal: true,
                }
            }
            PresentOutcome::OutOfDate => {
                self.resize.mark_stale();
                FrameOutcome::Skipped(SkipReason::PresentOutOfDate)
            }
        };

        // 7) Advance.
        match outcome {
            FrameOutcome::Presented { .. } => {
                self.slots[slot] = FrameState::Presented;
                self.stats.presented += 1;
            }
            FrameOutcome::Skipped(reason) => {
                debug!("frame skipped: {reason:?}");
                self.stats.skipped += 1;
            }
        }
        self.current = (slot + 1) % self.slots.len();

        if let Some(wanted) = ui.requested_viewport_size() {
            self.resize_viewport(backend, wanted)?;
        }

        Ok(outcome)
    }

    /// Applies a viewport resize between frames.
    pub fn resize_viewport<B: GpuBackend>(
        &mut self,
        backend: &mut B,
        size: RenderSize,
    ) -> Result<ViewportResize, RenderError> {
        let result = backend.resize_viewport(size)?;
        if result == ViewportResize::Recreated {
            self.stats.viewport_rebuilds += 1;
            info!("viewport target rebuilt at {size}");
        }
        Ok(result)
    }

    fn skip(&mut self, reason: SkipReason) -> FrameOutcome {
        debug!("frame skipped: {reason:?}");
        self.stats.skipped += 1;
        FrameOutcome::Skipped(reason)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::headless::{Event, HeadlessBackend, ScriptedAcquire};
    use crate::{NullUi, RenderSettings};

    fn setup(size: RenderSize) -> (HeadlessBackend, FrameEngine) {
        let backend = HeadlessBackend::new(&RenderSettings::default(), size);
        let engine = FrameEngine::new(
            backend.frames_in_flight(),
            backend.image_count(),
            backend.chain_extent(),
            Duration::from_millis(100),
        );
        (backend, engine)
    }

    #[derive(Default)]
    struct CountingUi {
        begun: usize,
        rendered: usize,
        primitives: usize,
        want_viewport: Option<RenderSize>,
        last_texture: Option<crate::ViewportTexture>,
    }

    impl<C> UiLayer<C> for CountingUi {
        fn begin_frame(&mut self, frame: &UiFrame) {
            self.begun += 1;
            self.last_texture = frame.viewport;
        }

        fn draw_data(&mut self) -> usize {
            self.primitives
        }

        fn render_draw_data(&mut self, _cmd: C) {
            self.rendered += 1;
        }

        fn requested_viewport_size(&mut self) -> Option<RenderSize> {
            self.want_viewport.take()
        }
    }

    #[test]
    fn steady_state_frames_cycle_slots() {
        let (mut backend, mut engine) = setup(RenderSize::new(800, 600));
        let mut ui = NullUi::default();
        for i in 0..6 {
            let out = engine.render_frame(&mut backend, &mut ui).unwrap();
            assert_eq!(
                out,
                FrameOutcome::Presented {
                    image: i % 3,
                    suboptimal: false
                }
            );
        }
        assert_eq!(engine.current_slot(), 0);
        assert_eq!(engine.stats().presented, 6);
        assert!(backend.violations().is_empty(), "{:?}", backend.violations());
    }

    #[test]
    fn command_buffers_never_recorded_while_fence_pending() {
        let (mut backend, mut engine) = setup(RenderSize::new(640, 480));
        // Out-of-order acquires to shake the ownership bookkeeping.
        for idx in [2, 0, 0, 1, 2, 2, 1, 0, 1, 1] {
            backend.script_acquire(ScriptedAcquire::Image {
                index: idx,
                suboptimal: false,
            });
        }
        let mut ui = NullUi::default();
        for _ in 0..10 {
            engine.render_frame(&mut backend, &mut ui).unwrap();
        }
        assert!(backend.violations().is_empty(), "{:?}", backend.violations());

        // Each slot's recording is preceded by a wait on that slot's fence.
        let events = backend.events();
        for (i, e) in events.iter().enumerate() {
            if let Event::Record { slot, .. } = e {
                let waited = events[..i]
                    .iter()
                    .rev()
                    .take_while(|p| !matches!(p, Event::Submit { slot: s, .. } if s == slot))
                    .any(|p| matches!(p, Event::Wait { slot: s, .. } if s == slot));
                assert!(waited, "slot {slot} recorded without waiting at event {i}");
            }
        }
    }

    #[test]
    fn ui_draw_data_recorded_only_when_non_empty() {
        let (mut backend, mut engine) = setup(RenderSize::new(800, 600));
        let mut ui = CountingUi::default();
        engine.render_frame(&mut backend, &mut ui).unwrap();
        assert_eq!((ui.begun, ui.rendered), (1, 0));
        ui.primitives = 12;
        engine.render_frame(&mut backend, &mut ui).unwrap();
        assert_eq!((ui.begun, ui.rendered), (2, 1));
        assert!(ui.last_texture.is_some(), "viewport texture handed to the UI");
    }

    #[test]
    fn viewport_y_is_flipped() {
        let (mut backend, mut engine) = setup(RenderSize::new(1024, 768));
        engine.render_frame(&mut backend, &mut NullUi::default()).unwrap();
        let vp = backend.last_viewport().unwrap();
        assert_eq!(vp.height, -768.0);
        assert_eq!(vp.y, 768.0);
    }

    #[test]
    fn repeated_resize_is_idempotent() {
        let (mut backend, mut engine) = setup(RenderSize::new(800, 600));
        let mut ui = NullUi::default();
        engine.notify_resize(RenderSize::new(1280, 720));
        engine.render_frame(&mut backend, &mut ui).unwrap();
        let builds = backend.counters().chain_builds;
        assert_eq!(backend.chain_extent(), RenderSize::new(1280, 720));

        engine.notify_resize(RenderSize::new(1280, 720));
        engine.render_frame(&mut backend, &mut ui).unwrap();
        assert_eq!(backend.counters().chain_builds, builds);
        let t = engine.resize_tracker();
        assert_eq!(t.requested_generation(), 2);
        assert_eq!(t.applied_generation(), 2);
    }

    #[test]
    fn clamped_extent_is_adopted() {
        let (mut backend, mut engine) = setup(RenderSize::new(800, 600));
        backend.set_max_extent(RenderSize::new(2048, 2048));
        engine.notify_resize(RenderSize::new(4000, 1000));
        engine.render_frame(&mut backend, &mut NullUi::default()).unwrap();
        assert_eq!(engine.resize_tracker().framebuffer_size(), RenderSize::new(2048, 1000));
    }

    #[test]
    fn stale_rebuild_uses_last_platform_size() {
        let (mut backend, mut engine) = setup(RenderSize::new(800, 600));
        let mut ui = NullUi::default();

        // Stale rebuild lands on a smaller surface than the tracked size.
        backend.set_max_extent(RenderSize::new(640, 480));
        backend.script_acquire(ScriptedAcquire::OutOfDate);
        engine.render_frame(&mut backend, &mut ui).unwrap();
        engine.render_frame(&mut backend, &mut ui).unwrap();
        assert_eq!(backend.chain_extent(), RenderSize::new(640, 480));

        // The platform then reports exactly that size: no rebuild needed.
        let builds = backend.counters().chain_builds;
        engine.notify_resize(RenderSize::new(640, 480));
        engine.render_frame(&mut backend, &mut ui).unwrap();
        assert_eq!(backend.counters().chain_builds, builds);
        assert_eq!(engine.resize_tracker().framebuffer_size(), RenderSize::new(640, 480));

        // Surface limit lifted; a later stale rebuild must not outgrow the window.
        backend.set_max_extent(RenderSize::new(4096, 4096));
        backend.script_acquire(ScriptedAcquire::OutOfDate);
        engine.render_frame(&mut backend, &mut ui).unwrap();
        engine.render_frame(&mut backend, &mut ui).unwrap();
        assert_eq!(backend.chain_extent(), RenderSize::new(640, 480));
        assert!(backend.violations().is_empty(), "{:?}", backend.violations());
    }

    fn separate_viewport(fenced: bool) -> (HeadlessBackend, FrameEngine) {
        let mut settings = RenderSettings::default();
        settings.viewport.sync = crate::ViewportSync::Separate { fenced };
        let backend = HeadlessBackend::new(&settings, RenderSize::new(800, 600));
        let engine = FrameEngine::new(
            backend.frames_in_flight(),
            backend.image_count(),
            backend.chain_extent(),
            Duration::from_millis(100),
        );
        (backend, engine)
    }

    #[test]
    fn separate_viewport_pass_chains_into_main_submission() {
        let (mut backend, mut engine) = separate_viewport(true);
        let mut ui = NullUi::default();
        for _ in 0..5 {
            engine.render_frame(&mut backend, &mut ui).unwrap();
        }
        assert!(backend.violations().is_empty(), "{:?}", backend.violations());

        let events = backend.events();
        let mut submits = 0;
        for (i, e) in events.iter().enumerate() {
            if let Event::Submit { slot, .. } = *e {
                submits += 1;
                assert_eq!(events[i - 1], Event::ViewportWait { slot });
                let offscreen = events[..i]
                    .iter()
                    .rposition(|p| matches!(p, Event::OffscreenSubmit { .. }))
                    .unwrap();
                assert_eq!(events[offscreen], Event::OffscreenSubmit { slot, fenced: true });
                let record = events[..i]
                    .iter()
                    .rposition(|p| matches!(p, Event::Record { .. }))
                    .unwrap();
                assert!(record < offscreen, "viewport submitted before slot {slot} recorded");
            }
        }
        assert_eq!(submits, 5);
        assert!(!events.contains(&Event::QueueDrain));
    }

    #[test]
    fn unfenced_viewport_pass_drains_queue() {
        let (mut backend, mut engine) = separate_viewport(false);
        let mut ui = NullUi::default();
        for _ in 0..3 {
            engine.render_frame(&mut backend, &mut ui).unwrap();
        }
        assert!(backend.violations().is_empty(), "{:?}", backend.violations());
        let events = backend.events();
        let drains = events.iter().filter(|e| **e == Event::QueueDrain).count();
        assert_eq!(drains, 3);
        for (i, e) in events.iter().enumerate() {
            if matches!(e, Event::OffscreenSubmit { fenced: false, .. }) {
                assert_eq!(events[i + 1], Event::QueueDrain);
            }
        }
    }

    #[test]
    fn create_destroy_create_round_trip() {
        let (mut backend, _engine) = setup(RenderSize::new(800, 600));
        let images = backend.image_count();
        let extent = backend.chain_extent();
        backend.destroy_chain().unwrap();
        assert_eq!(backend.image_count(), 0);
        assert_eq!(backend.recreate_chain(extent).unwrap(), extent);
        assert_eq!(backend.image_count(), images);
    }

    // Scenario A: minimized window.
    #[test]
    fn zero_size_skips_until_restored() {
        let (mut backend, mut engine) = setup(RenderSize::new(800, 600));
        let mut ui = NullUi::default();
        engine.notify_resize(RenderSize::new(0, 0));
        for _ in 0..3 {
            let out = engine.render_frame(&mut backend, &mut ui).unwrap();
            assert_eq!(out, FrameOutcome::Skipped(SkipReason::EmptyChain));
        }
        assert_eq!(backend.image_count(), 0);
        assert_eq!(backend.counters().submits, 0);
        assert_eq!(ui.frames(), 0);

        engine.notify_resize(RenderSize::new(800, 600));
        let out = engine.render_frame(&mut backend, &mut ui).unwrap();
        assert!(matches!(out, FrameOutcome::Presented { .. }));
        assert_eq!(backend.counters().submits, 1);
    }

    // Scenario B: suboptimal acquire.
    #[test]
    fn suboptimal_acquire_presents_then_rebuilds() {
        let (mut backend, mut engine) = setup(RenderSize::new(800, 600));
        let mut ui = NullUi::default();
        backend.script_acquire(ScriptedAcquire::Next { suboptimal: true });
        let out = engine.render_frame(&mut backend, &mut ui).unwrap();
        assert_eq!(
            out,
            FrameOutcome::Presented {
                image: 0,
                suboptimal: true
            }
        );
        assert_eq!(backend.counters().presents, 1);
        assert_eq!(backend.counters().chain_builds, 1);

        engine.render_frame(&mut backend, &mut ui).unwrap();
        assert_eq!(backend.counters().chain_builds, 2);
        let events = backend.events();
        let rebuild = events
            .iter()
            .position(|e| matches!(e, Event::RecreateChain { .. }))
            .unwrap();
        let second_acquire = events
            .iter()
            .enumerate()
            .filter(|(_, e)| matches!(e, Event::Acquire { .. }))
            .nth(1)
            .map(|(i, _)| i)
            .unwrap();
        assert!(rebuild < second_acquire);
    }

    #[test]
    fn out_of_date_acquire_issues_no_work() {
        let (mut backend, mut engine) = setup(RenderSize::new(800, 600));
        backend.script_acquire(ScriptedAcquire::OutOfDate);
        let out = engine.render_frame(&mut backend, &mut NullUi::default()).unwrap();
        assert_eq!(out, FrameOutcome::Skipped(SkipReason::AcquireOutOfDate));
        assert_eq!(backend.counters().submits, 0);
        assert_eq!(engine.slot_state(0), FrameState::Ready);
        assert!(engine.resize_tracker().is_stale());

        // The slot's fence was never reset, so the next frame cannot deadlock.
        let out = engine.render_frame(&mut backend, &mut NullUi::default()).unwrap();
        assert!(matches!(out, FrameOutcome::Presented { .. }));
        assert!(backend.violations().is_empty(), "{:?}", backend.violations());
    }

    #[test]
    fn out_of_date_present_is_not_shown() {
        let (mut backend, mut engine) = setup(RenderSize::new(800, 600));
        backend.script_present(PresentOutcome::OutOfDate);
        let out = engine.render_frame(&mut backend, &mut NullUi::default()).unwrap();
        assert_eq!(out, FrameOutcome::Skipped(SkipReason::PresentOutOfDate));
        assert_eq!(engine.stats().presented, 0);
        assert!(engine.resize_tracker().is_stale());
        engine.render_frame(&mut backend, &mut NullUi::default()).unwrap();
        assert_eq!(backend.counters().chain_builds, 2);
        assert!(backend.violations().is_empty(), "{:?}", backend.violations());
    }

    // Scenario C: viewport tolerance.
    #[test]
    fn viewport_resize_honours_tolerance() {
        let (mut backend, mut engine) = setup(RenderSize::new(1280, 720));
        let before = backend.viewport_texture().unwrap().unwrap();
        assert_eq!(before.size, RenderSize::new(800, 600));

        let r = engine.resize_viewport(&mut backend, RenderSize::new(804, 603)).unwrap();
        assert_eq!(r, ViewportResize::Unchanged);
        assert_eq!(backend.viewport_size(), Some(RenderSize::new(800, 600)));
        assert_eq!(backend.viewport_texture().unwrap(), Some(before));

        let r = engine.resize_viewport(&mut backend, RenderSize::new(1024, 768)).unwrap();
        assert_eq!(r, ViewportResize::Recreated);
        let after = backend.viewport_texture().unwrap().unwrap();
        assert_ne!(after.id, before.id);
        assert_eq!(after.size, RenderSize::new(1024, 768));
        assert!(after.generation > before.generation);
    }

    #[test]
    fn ui_viewport_request_applied_between_frames() {
        let (mut backend, mut engine) = setup(RenderSize::new(1280, 720));
        let mut ui = CountingUi {
            want_viewport: Some(RenderSize::new(400, 300)),
            ..Default::default()
        };
        engine.render_frame(&mut backend, &mut ui).unwrap();
        assert_eq!(backend.viewport_size(), Some(RenderSize::new(400, 300)));
        assert_eq!(engine.stats().viewport_rebuilds, 1);
        assert!(backend.violations().is_empty(), "{:?}", backend.violations());
    }

    // Scenario D: the compositor hands back the same image twice in a row.
    #[test]
    fn reused_image_waits_for_previous_owner() {
        let (mut backend, mut engine) = setup(RenderSize::new(800, 600));
        for _ in 0..2 {
            backend.script_acquire(ScriptedAcquire::Image {
                index: 1,
                suboptimal: false,
            });
        }
        let mut ui = NullUi::default();
        engine.render_frame(&mut backend, &mut ui).unwrap();
        assert_eq!(engine.image_owner(1), Some(0));
        engine.render_frame(&mut backend, &mut ui).unwrap();
        assert_eq!(engine.image_owner(1), Some(1));
        assert_eq!(engine.stats().handoff_waits, 1);

        let events = backend.events();
        let acquire = events
            .iter()
            .position(|e| matches!(e, Event::Acquire { slot: 1, .. }))
            .unwrap();
        let record = events
            .iter()
            .position(|e| matches!(e, Event::Record { slot: 1, .. }))
            .unwrap();
        let handoff = events[acquire..record].iter().any(|e| {
            matches!(
                e,
                Event::Wait {
                    slot: 0,
                    was_pending: true
                }
            )
        });
        assert!(handoff, "slot 1 recorded image 1 without waiting for slot 0");
        assert!(backend.violations().is_empty(), "{:?}", backend.violations());
    }

    #[test]
    fn hung_owner_times_out() {
        let (mut backend, mut engine) = setup(RenderSize::new(800, 600));
        for _ in 0..2 {
            backend.script_acquire(ScriptedAcquire::Image {
                index: 0,
                suboptimal: false,
            });
        }
        let mut ui = NullUi::default();
        engine.render_frame(&mut backend, &mut ui).unwrap();
        backend.hang_slot(0);
        let err = engine.render_frame(&mut backend, &mut ui).unwrap_err();
        assert!(matches!(err, RenderError::FenceTimeout { slot: 0 }));
        assert!(!err.is_fatal());
    }

    #[test]
    fn images_in_flight_cleared_on_rebuild() {
        let (mut backend, mut engine) = setup(RenderSize::new(800, 600));
        let mut ui = NullUi::default();
        engine.render_frame(&mut backend, &mut ui).unwrap();
        assert_eq!(engine.image_owner(0), Some(0));
        engine.notify_resize(RenderSize::new(1024, 768));
        engine.recover(&mut backend).unwrap();
        assert_eq!(engine.image_owner(0), None);
        assert_eq!(engine.slot_state(0), FrameState::Ready);
    }
}
