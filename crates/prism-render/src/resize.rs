// SPDX-License-Identifier: CEPL-1.0
//! Bookkeeping for the resize / recovery protocol.
//!
//! Two things can invalidate the presentation chain: the platform telling us
//! the framebuffer changed size (authoritative, carries the new size), and
//! the presentation engine reporting a stale or suboptimal chain (no size
//! attached). The tracker records both; [`crate::FrameEngine`] acts on them
//! before the next acquire.
use crate::{RenderError, RenderSize};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResizeTrigger {
    /// Platform notification with the requested framebuffer size.
    Explicit(RenderSize),
    /// Out-of-date or suboptimal result; rebuild at the last known size.
    Stale,
}

#[derive(Debug)]
pub struct ResizeTracker {
    requested_generation: u64,
    applied_generation: u64,
    requested_size: RenderSize,
    framebuffer_size: RenderSize,
    last_request: RenderSize,
    stale: bool,
    recreating: bool,
}

impl ResizeTracker {
    pub fn new(initial: RenderSize) -> Self {
        Self {
            requested_generation: 0,
            applied_generation: 0,
            requested_size: initial,
            framebuffer_size: initial,
            last_request: initial,
            stale: false,
            recreating: false,
        }
    }

    /// Accepts every notification, zero sizes included.
    pub fn notify_resize(&mut self, size: RenderSize) {
        self.requested_generation += 1;
        self.requested_size = size;
    }

    pub fn mark_stale(&mut self) {
        self.stale = true;
    }

    pub fn pending(&self) -> Option<ResizeTrigger> {
        if self.requested_generation != self.applied_generation {
            Some(ResizeTrigger::Explicit(self.requested_size))
        } else if self.stale {
            Some(ResizeTrigger::Stale)
        } else {
            None
        }
    }

    /// An explicit request that the live chain already satisfies.
    pub fn is_redundant(&self, size: RenderSize, live_extent: RenderSize) -> bool {
        if self.stale {
            return false;
        }
        size == self.last_request
            || size == live_extent
            || (size.is_empty() && live_extent.is_empty())
    }

    /// Enters the recreation window. Returns the generation being applied.
    pub fn begin(&mut self) -> Result<u64, RenderError> {
        if self.recreating {
            return Err(RenderError::RecreateInProgress);
        }
        self.recreating = true;
        Ok(self.requested_generation)
    }

    /// Completes an explicit resize. `actual` is what the chain ended up at
    /// after platform clamping and becomes the authoritative size.
    pub fn finish_explicit(&mut self, generation: u64, requested: RenderSize, actual: RenderSize) {
        debug_assert!(self.recreating, "finish_explicit without begin");
        self.framebuffer_size = actual;
        self.last_request = requested;
        self.applied_generation = generation;
        self.stale = false;
        self.recreating = false;
    }

    pub fn finish_stale(&mut self) {
        debug_assert!(self.recreating, "finish_stale without begin");
        self.stale = false;
        self.recreating = false;
    }

    /// Leaves the recreation window after a failed rebuild; the trigger
    /// stays pending.
    pub fn abort(&mut self) {
        self.recreating = false;
    }

    /// Marks the latest request applied without touching the GPU. The
    /// request still becomes the authoritative framebuffer size.
    pub fn acknowledge(&mut self) {
        self.applied_generation = self.requested_generation;
        self.last_request = self.requested_size;
        self.framebuffer_size = self.requested_size;
    }

    pub fn framebuffer_size(&self) -> RenderSize {
        self.framebuffer_size
    }

    pub fn requested_generation(&self) -> u64 {
        self.requested_generation
    }

    pub fn applied_generation(&self) -> u64 {
        self.applied_generation
    }

    pub fn is_recreating(&self) -> bool {
        self.recreating
    }

    pub fn is_stale(&self) -> bool {
        self.stale
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notification_creates_explicit_trigger() {
        let mut t = ResizeTracker::new(RenderSize::new(800, 600));
        assert_eq!(t.pending(), None);
        t.notify_resize(RenderSize::new(1024, 768));
        assert_eq!(t.pending(), Some(ResizeTrigger::Explicit(RenderSize::new(1024, 768))));
        assert_eq!(t.requested_generation(), 1);
        assert_eq!(t.applied_generation(), 0);
    }

    #[test]
    fn explicit_wins_over_stale() {
        let mut t = ResizeTracker::new(RenderSize::new(800, 600));
        t.mark_stale();
        assert_eq!(t.pending(), Some(ResizeTrigger::Stale));
        t.notify_resize(RenderSize::new(640, 480));
        assert_eq!(t.pending(), Some(ResizeTrigger::Explicit(RenderSize::new(640, 480))));
    }

    #[test]
    fn reentrant_begin_is_rejected() {
        let mut t = ResizeTracker::new(RenderSize::new(800, 600));
        t.begin().unwrap();
        assert!(matches!(t.begin(), Err(RenderError::RecreateInProgress)));
        t.abort();
        assert!(t.begin().is_ok());
    }

    #[test]
    fn actual_extent_becomes_authoritative() {
        let mut t = ResizeTracker::new(RenderSize::new(800, 600));
        t.notify_resize(RenderSize::new(5000, 600));
        let gen = t.begin().unwrap();
        t.finish_explicit(gen, RenderSize::new(5000, 600), RenderSize::new(4096, 600));
        assert_eq!(t.framebuffer_size(), RenderSize::new(4096, 600));
        assert_eq!(t.pending(), None);
        // Repeating the clamped request is a no-op.
        t.notify_resize(RenderSize::new(5000, 600));
        assert!(t.is_redundant(RenderSize::new(5000, 600), RenderSize::new(4096, 600)));
    }

    #[test]
    fn notification_during_recreation_stays_pending() {
        let mut t = ResizeTracker::new(RenderSize::new(800, 600));
        t.notify_resize(RenderSize::new(900, 700));
        let gen = t.begin().unwrap();
        t.notify_resize(RenderSize::new(1000, 800));
        t.finish_explicit(gen, RenderSize::new(900, 700), RenderSize::new(900, 700));
        assert_eq!(t.pending(), Some(ResizeTrigger::Explicit(RenderSize::new(1000, 800))));
    }

    #[test]
    fn acknowledged_request_becomes_framebuffer_size() {
        let mut t = ResizeTracker::new(RenderSize::new(800, 600));
        t.notify_resize(RenderSize::new(640, 480));
        assert!(t.is_redundant(RenderSize::new(640, 480), RenderSize::new(640, 480)));
        t.acknowledge();
        assert_eq!(t.pending(), None);
        assert_eq!(t.framebuffer_size(), RenderSize::new(640, 480));
    }

    #[test]
    fn stale_recovery_keeps_framebuffer_size() {
        let mut t = ResizeTracker::new(RenderSize::new(800, 600));
        t.mark_stale();
        t.begin().unwrap();
        t.finish_stale();
        assert_eq!(t.pending(), None);
        assert_eq!(t.framebuffer_size(), RenderSize::new(800, 600));
    }
}
