// SPDX-License-Identifier: CEPL-1.0
//! A GPU-less [`GpuBackend`] that simulates fences, semaphores and the
//! presentation engine.
//!
//! Submissions leave the slot's fence pending until someone waits on it.
//! Every call is appended to an event log and every ordering mistake the
//! real driver would punish (recording over a pending fence, two pending
//! writers for one image, rebuilding with work in flight) is recorded as a
//! violation instead of corrupting anything. Tests drive the frame engine
//! against it and then inspect both lists.
use std::collections::{HashSet, VecDeque};
use std::time::Duration;

use tracing::{debug, trace};

use crate::viewport::ViewportSizing;
use crate::{
    AcquireOutcome, GpuBackend, PresentOutcome, PresentPolicy, RenderError, RenderSettings,
    RenderSize, Viewport, ViewportResize, ViewportSync, ViewportTexture,
};

pub const DEFAULT_IMAGE_COUNT: usize = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum FenceState {
    Signaled,
    /// Reset, not yet submitted.
    Unsignaled,
    /// Submitted; signals when waited on unless the slot is hung.
    Pending,
}

/// Forced result for the next acquire.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScriptedAcquire {
    Image { index: usize, suboptimal: bool },
    /// Round-robin image, optionally reported suboptimal.
    Next { suboptimal: bool },
    OutOfDate,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Event {
    Wait { slot: usize, was_pending: bool },
    Reset { slot: usize },
    Acquire { slot: usize, image: Option<usize> },
    Record { slot: usize, image: Option<usize> },
    /// Off-screen pass recorded into the frame command buffer.
    Offscreen { slot: usize },
    /// Off-screen pass submitted on its own, signaling the slot's semaphore.
    OffscreenSubmit { slot: usize, fenced: bool },
    /// Queue drained after an unfenced off-screen submission.
    QueueDrain,
    /// Main submission waits on the off-screen semaphore.
    ViewportWait { slot: usize },
    Submit { slot: usize, image: usize },
    Present { image: usize },
    WaitIdle,
    RecreateChain { requested: RenderSize, built: RenderSize },
    DestroyChain,
    ViewportRebuild { size: RenderSize },
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HeadlessCounters {
    pub chain_builds: u64,
    pub chain_destroys: u64,
    pub viewport_builds: u64,
    pub submits: u64,
    pub presents: u64,
}

/// Command buffer token; only remembers which slot it belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HeadlessCommands {
    pub slot: usize,
}

#[derive(Debug)]
struct SimViewport {
    size: RenderSize,
    generation: u64,
    texture: Option<ViewportTexture>,
    sizing: ViewportSizing,
    sync: ViewportSync,
    /// Per-slot "viewport finished" semaphores.
    finished: Vec<bool>,
    /// Per-slot viewport fences; only used when fenced.
    fences: Vec<FenceState>,
}

#[derive(Debug)]
pub struct HeadlessBackend {
    frames_in_flight: usize,
    desired_images: usize,
    image_count: usize,
    extent: RenderSize,
    max_extent: Option<RenderSize>,
    next_image: usize,

    fences: Vec<FenceState>,
    acquire_signaled: Vec<bool>,
    slot_image: Vec<Option<usize>>,
    /// Image → slot whose submission last wrote it.
    image_writer: Vec<Option<usize>>,
    hung: HashSet<usize>,

    acquire_script: VecDeque<ScriptedAcquire>,
    present_script: VecDeque<PresentOutcome>,

    viewport: Option<SimViewport>,
    /// Slot whose off-screen semaphore the next submission must wait on.
    viewport_wait: Option<usize>,
    next_texture_id: u64,
    last_viewport: Option<Viewport>,
    clear_color: [f32; 4],
    present_policy: PresentPolicy,

    events: Vec<Event>,
    violations: Vec<String>,
    counters: HeadlessCounters,
}

impl HeadlessBackend {
    pub fn new(settings: &RenderSettings, size: RenderSize) -> Self {
        Self::with_image_count(settings, size, DEFAULT_IMAGE_COUNT)
    }

    pub fn with_image_count(settings: &RenderSettings, size: RenderSize, images: usize) -> Self {
        let frames = settings.frames_in_flight.max(1);
        let viewport = settings.viewport.enabled.then(|| SimViewport {
            size: settings.viewport.size,
            generation: 1,
            texture: None,
            sizing: ViewportSizing::new(settings.viewport.tolerance),
            sync: settings.viewport.sync,
            finished: vec![false; frames],
            fences: vec![FenceState::Signaled; frames],
        });
        let mut backend = Self {
            frames_in_flight: frames,
            desired_images: images.max(1),
            image_count: 0,
            extent: RenderSize::ZERO,
            max_extent: None,
            next_image: 0,
            fences: vec![FenceState::Signaled; frames],
            acquire_signaled: vec![false; frames],
            slot_image: vec![None; frames],
            image_writer: Vec::new(),
            hung: HashSet::new(),
            acquire_script: VecDeque::new(),
            present_script: VecDeque::new(),
            viewport,
            viewport_wait: None,
            next_texture_id: 1,
            last_viewport: None,
            clear_color: settings.clear_color,
            present_policy: settings.present_policy,
            events: Vec::new(),
            violations: Vec::new(),
            counters: HeadlessCounters::default(),
        };
        backend.build_chain(size);
        backend
    }

    pub fn script_acquire(&mut self, next: ScriptedAcquire) {
        self.acquire_script.push_back(next);
    }

    pub fn script_present(&mut self, next: PresentOutcome) {
        self.present_script.push_back(next);
    }

    /// Simulates the surface's maximum extent.
    pub fn set_max_extent(&mut self, max: RenderSize) {
        self.max_extent = Some(max);
    }

    /// The slot's pending submission never completes.
    pub fn hang_slot(&mut self, slot: usize) {
        self.hung.insert(slot);
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn violations(&self) -> &[String] {
        &self.violations
    }

    pub fn counters(&self) -> HeadlessCounters {
        self.counters
    }

    pub fn last_viewport(&self) -> Option<Viewport> {
        self.last_viewport
    }

    pub fn clear_color(&self) -> [f32; 4] {
        self.clear_color
    }

    pub fn present_policy(&self) -> PresentPolicy {
        self.present_policy
    }

    fn violation(&mut self, msg: String) {
        debug!("headless: ordering violation: {msg}");
        self.violations.push(msg);
    }

    fn build_chain(&mut self, requested: RenderSize) -> RenderSize {
        let built = if requested.is_empty() {
            RenderSize::ZERO
        } else {
            match self.max_extent {
                Some(max) => RenderSize::new(
                    requested.width.min(max.width),
                    requested.height.min(max.height),
                ),
                None => requested,
            }
        };
        self.extent = built;
        self.image_count = if built.is_empty() { 0 } else { self.desired_images };
        self.image_writer = vec![None; self.image_count];
        self.next_image = 0;
        // Per-slot semaphores are recreated with the chain.
        self.acquire_signaled.iter_mut().for_each(|s| *s = false);
        self.slot_image.iter_mut().for_each(|s| *s = None);
        self.counters.chain_builds += 1;
        built
    }

    fn signal_all(&mut self) {
        let viewport_fences = self.viewport.iter_mut().flat_map(|vp| vp.fences.iter_mut());
        for f in self.fences.iter_mut().chain(viewport_fences) {
            if *f == FenceState::Pending {
                *f = FenceState::Signaled;
            }
        }
        self.hung.clear();
    }
}

impl GpuBackend for HeadlessBackend {
    type CommandBuffer = HeadlessCommands;

    fn name(&self) -> &'static str {
        "headless"
    }

    fn frames_in_flight(&self) -> usize {
        self.frames_in_flight
    }

    fn image_count(&self) -> usize {
        self.image_count
    }

    fn chain_extent(&self) -> RenderSize {
        self.extent
    }

    fn wait_frame_fence(&mut self, slot: usize, timeout: Option<Duration>) -> Result<(), RenderError> {
        let state = self.fences[slot];
        trace!("headless: wait slot {slot} ({state:?}, timeout {timeout:?})");
        match state {
            FenceState::Signaled => {
                self.events.push(Event::Wait {
                    slot,
                    was_pending: false,
                });
                Ok(())
            }
            FenceState::Pending if self.hung.contains(&slot) => Err(RenderError::FenceTimeout { slot }),
            FenceState::Pending => {
                self.fences[slot] = FenceState::Signaled;
                self.events.push(Event::Wait {
                    slot,
                    was_pending: true,
                });
                Ok(())
            }
            FenceState::Unsignaled => {
                self.violation(format!("wait on slot {slot} fence that was reset but never submitted"));
                Err(RenderError::FenceTimeout { slot })
            }
        }
    }

    fn reset_frame_fence(&mut self, slot: usize) -> Result<(), RenderError> {
        if self.fences[slot] == FenceState::Pending {
            self.violation(format!("reset of pending fence for slot {slot}"));
        }
        self.fences[slot] = FenceState::Unsignaled;
        self.events.push(Event::Reset { slot });
        Ok(())
    }

    fn acquire_next_image(&mut self, slot: usize) -> Result<AcquireOutcome, RenderError> {
        if self.image_count == 0 {
            self.violation(format!("acquire on empty chain from slot {slot}"));
            return Err(RenderError::NotInitialized("presentation chain"));
        }
        if self.acquire_signaled[slot] {
            self.violation(format!("slot {slot} acquire semaphore signaled twice"));
        }

        let script = self
            .acquire_script
            .pop_front()
            .unwrap_or(ScriptedAcquire::Next { suboptimal: false });
        let (image, suboptimal) = match script {
            ScriptedAcquire::OutOfDate => {
                self.events.push(Event::Acquire { slot, image: None });
                return Ok(AcquireOutcome::OutOfDate);
            }
            ScriptedAcquire::Image { index, suboptimal } => (index % self.image_count, suboptimal),
            ScriptedAcquire::Next { suboptimal } => (self.next_image, suboptimal),
        };
        self.next_image = (image + 1) % self.image_count;
        self.acquire_signaled[slot] = true;
        self.slot_image[slot] = Some(image);
        self.events.push(Event::Acquire {
            slot,
            image: Some(image),
        });
        Ok(AcquireOutcome::Acquired { image, suboptimal })
    }

    fn begin_commands(&mut self, slot: usize) -> Result<HeadlessCommands, RenderError> {
        if self.fences[slot] == FenceState::Pending {
            self.violation(format!("slot {slot} command buffer recorded while its fence is pending"));
        }
        self.events.push(Event::Record {
            slot,
            image: self.slot_image[slot],
        });
        Ok(HeadlessCommands { slot })
    }

    fn set_viewport(&mut self, _cmd: HeadlessCommands, viewport: Viewport, _scissor: RenderSize) {
        self.last_viewport = Some(viewport);
    }

    fn record_offscreen_pass(&mut self, slot: usize, _cmd: HeadlessCommands) -> Result<bool, RenderError> {
        let Some(vp) = self.viewport.as_mut() else {
            return Ok(false);
        };
        let ViewportSync::Separate { fenced } = vp.sync else {
            self.events.push(Event::Offscreen { slot });
            return Ok(true);
        };

        if fenced {
            // Waited and reset before the slot's command buffer is reused.
            vp.fences[slot] = FenceState::Pending;
        }
        let signaled_twice = vp.finished[slot];
        vp.finished[slot] = true;
        if signaled_twice {
            self.violation(format!("slot {slot} viewport semaphore signaled twice"));
        }
        if let Some(stale) = self.viewport_wait.replace(slot) {
            self.violation(format!("viewport pass of slot {stale} never waited on"));
        }
        self.events.push(Event::OffscreenSubmit { slot, fenced });
        if !fenced {
            self.events.push(Event::QueueDrain);
        }
        Ok(true)
    }

    fn begin_main_pass(&mut self, cmd: HeadlessCommands, image: usize) {
        if image >= self.image_count {
            self.violation(format!("slot {} began a pass on missing image {image}", cmd.slot));
        }
    }

    fn end_main_pass(&mut self, _cmd: HeadlessCommands) {}

    fn end_commands(&mut self, _cmd: HeadlessCommands) -> Result<(), RenderError> {
        Ok(())
    }

    fn submit(&mut self, slot: usize, image: usize) -> Result<(), RenderError> {
        if !self.acquire_signaled[slot] {
            self.violation(format!("slot {slot} submitted without an acquired image"));
        }
        if let Some(Some(writer)) = self.image_writer.get(image).copied() {
            if writer != slot && self.fences[writer] == FenceState::Pending {
                self.violation(format!(
                    "image {image} written by slot {slot} while slot {writer} is still pending"
                ));
            }
        }
        if self.fences[slot] != FenceState::Unsignaled {
            self.violation(format!("slot {slot} submitted without resetting its fence"));
        }
        let separate = matches!(
            self.viewport.as_ref().map(|vp| vp.sync),
            Some(ViewportSync::Separate { .. })
        );
        match self.viewport_wait.take() {
            Some(vslot) => {
                if vslot != slot {
                    self.violation(format!("slot {slot} waits on the viewport pass of slot {vslot}"));
                }
                if let Some(vp) = self.viewport.as_mut() {
                    vp.finished[vslot] = false;
                }
                self.events.push(Event::ViewportWait { slot });
            }
            None if separate => {
                self.violation(format!("slot {slot} submitted without waiting on the viewport pass"));
            }
            None => {}
        }
        self.acquire_signaled[slot] = false;
        self.fences[slot] = FenceState::Pending;
        if let Some(w) = self.image_writer.get_mut(image) {
            *w = Some(slot);
        }
        self.counters.submits += 1;
        self.events.push(Event::Submit { slot, image });
        Ok(())
    }

    fn present(&mut self, image: usize) -> Result<PresentOutcome, RenderError> {
        let outcome = self.present_script.pop_front().unwrap_or(PresentOutcome::Presented);
        if outcome != PresentOutcome::OutOfDate {
            self.counters.presents += 1;
        }
        self.events.push(Event::Present { image });
        Ok(outcome)
    }

    fn wait_idle(&mut self) -> Result<(), RenderError> {
        self.signal_all();
        self.events.push(Event::WaitIdle);
        Ok(())
    }

    fn recreate_chain(&mut self, size: RenderSize) -> Result<RenderSize, RenderError> {
        if self.fences.contains(&FenceState::Pending) {
            self.violation("chain rebuilt while submissions are in flight".to_owned());
        }
        if self.image_count > 0 {
            self.counters.chain_destroys += 1;
        }
        let built = self.build_chain(size);
        debug!("headless: chain {size} → {built}, {} images", self.image_count);
        self.events.push(Event::RecreateChain {
            requested: size,
            built,
        });
        Ok(built)
    }

    fn destroy_chain(&mut self) -> Result<(), RenderError> {
        if self.image_count > 0 {
            self.counters.chain_destroys += 1;
        }
        self.image_count = 0;
        self.extent = RenderSize::ZERO;
        self.image_writer.clear();
        self.events.push(Event::DestroyChain);
        Ok(())
    }

    fn viewport_size(&self) -> Option<RenderSize> {
        self.viewport.as_ref().map(|v| v.size)
    }

    fn resize_viewport(&mut self, size: RenderSize) -> Result<ViewportResize, RenderError> {
        let Some(vp) = self.viewport.as_ref() else {
            return Ok(ViewportResize::Unchanged);
        };
        if !vp.sizing.needs_recreate(vp.size, size) {
            return Ok(ViewportResize::Unchanged);
        }
        // The target may still be sampled by in-flight frames.
        self.signal_all();
        if let Some(vp) = self.viewport.as_mut() {
            vp.size = size;
            vp.generation += 1;
            vp.texture = None;
        }
        self.counters.viewport_builds += 1;
        self.events.push(Event::ViewportRebuild { size });
        Ok(ViewportResize::Recreated)
    }

    fn viewport_texture(&mut self) -> Result<Option<ViewportTexture>, RenderError> {
        let next_id = self.next_texture_id;
        let Some(vp) = self.viewport.as_mut() else {
            return Ok(None);
        };
        let texture = *vp.texture.get_or_insert(ViewportTexture {
            id: next_id,
            generation: vp.generation,
            size: vp.size,
        });
        if texture.id == next_id {
            self.next_texture_id += 1;
        }
        Ok(Some(texture))
    }

    fn set_clear_color(&mut self, rgba: [f32; 4]) {
        self.clear_color = rgba;
    }

    fn set_present_policy(&mut self, policy: PresentPolicy) {
        self.present_policy = policy;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> HeadlessBackend {
        HeadlessBackend::new(&RenderSettings::default(), RenderSize::new(800, 600))
    }

    #[test]
    fn detects_two_pending_writers() {
        let mut b = backend();
        for slot in 0..2 {
            b.wait_frame_fence(slot, None).unwrap();
            b.script_acquire(ScriptedAcquire::Image {
                index: 1,
                suboptimal: false,
            });
            b.acquire_next_image(slot).unwrap();
            b.begin_commands(slot).unwrap();
            b.reset_frame_fence(slot).unwrap();
            b.submit(slot, 1).unwrap();
        }
        assert_eq!(b.violations().len(), 1, "{:?}", b.violations());
        assert!(b.violations()[0].contains("image 1"));
    }

    #[test]
    fn detects_recording_over_pending_fence() {
        let mut b = backend();
        b.acquire_next_image(0).unwrap();
        b.reset_frame_fence(0).unwrap();
        b.submit(0, 0).unwrap();
        b.begin_commands(0).unwrap();
        assert!(b.violations()[0].contains("fence is pending"));
    }

    #[test]
    fn detects_rebuild_with_work_in_flight() {
        let mut b = backend();
        b.acquire_next_image(0).unwrap();
        b.reset_frame_fence(0).unwrap();
        b.submit(0, 0).unwrap();
        b.recreate_chain(RenderSize::new(640, 480)).unwrap();
        assert_eq!(b.violations().len(), 1);

        let mut b = backend();
        b.acquire_next_image(0).unwrap();
        b.reset_frame_fence(0).unwrap();
        b.submit(0, 0).unwrap();
        b.wait_idle().unwrap();
        b.recreate_chain(RenderSize::new(640, 480)).unwrap();
        assert!(b.violations().is_empty());
    }

    #[test]
    fn zero_size_builds_empty_chain() {
        let mut b = backend();
        assert_eq!(b.recreate_chain(RenderSize::new(0, 480)).unwrap(), RenderSize::ZERO);
        assert_eq!(b.image_count(), 0);
    }

    #[test]
    fn acquire_on_empty_chain_is_an_error() {
        let mut b = backend();
        b.destroy_chain().unwrap();
        assert!(matches!(
            b.acquire_next_image(0),
            Err(RenderError::NotInitialized("presentation chain"))
        ));
        assert_eq!(b.violations().len(), 1);
    }

    #[test]
    fn separate_viewport_must_be_waited() {
        let mut settings = RenderSettings::default();
        settings.viewport.sync = ViewportSync::Separate { fenced: true };
        let mut b = HeadlessBackend::new(&settings, RenderSize::new(800, 600));
        b.acquire_next_image(0).unwrap();
        b.reset_frame_fence(0).unwrap();
        b.submit(0, 0).unwrap();
        assert_eq!(b.violations().len(), 1, "{:?}", b.violations());
        assert!(b.violations()[0].contains("without waiting on the viewport pass"));
    }

    #[test]
    fn viewport_texture_is_lazy_and_stable() {
        let mut b = backend();
        let a = b.viewport_texture().unwrap().unwrap();
        let again = b.viewport_texture().unwrap().unwrap();
        assert_eq!(a, again);
        assert_eq!(b.counters().viewport_builds, 0);
    }

    #[test]
    fn disabled_viewport_has_no_texture() {
        let mut settings = RenderSettings::default();
        settings.viewport.enabled = false;
        let mut b = HeadlessBackend::new(&settings, RenderSize::new(800, 600));
        assert_eq!(b.viewport_texture().unwrap(), None);
        assert_eq!(
            b.resize_viewport(RenderSize::new(1920, 1080)).unwrap(),
            ViewportResize::Unchanged
        );
    }
}
