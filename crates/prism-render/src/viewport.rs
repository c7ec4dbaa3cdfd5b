// SPDX-License-Identifier: CEPL-1.0
use crate::RenderSize;

/// Resize hysteresis for the off-screen viewport target.
///
/// Interactive panel drags report a new size every pixel; rebuilding the
/// target for each of them would stall the queue every frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ViewportSizing {
    pub tolerance: u32,
}

impl Default for ViewportSizing {
    fn default() -> Self {
        Self { tolerance: 8 }
    }
}

impl ViewportSizing {
    pub const fn new(tolerance: u32) -> Self {
        Self { tolerance }
    }

    /// True when `requested` is far enough from `current` to rebuild.
    /// Zero-area requests never rebuild; the old target stays displayable.
    pub fn needs_recreate(&self, current: RenderSize, requested: RenderSize) -> bool {
        if requested.is_empty() {
            return false;
        }
        current.width.abs_diff(requested.width) > self.tolerance
            || current.height.abs_diff(requested.height) > self.tolerance
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_drags_are_ignored() {
        let s = ViewportSizing::default();
        let cur = RenderSize::new(800, 600);
        assert!(!s.needs_recreate(cur, RenderSize::new(804, 603)));
        assert!(!s.needs_recreate(cur, RenderSize::new(792, 608)));
        assert!(!s.needs_recreate(cur, cur));
    }

    #[test]
    fn either_axis_past_tolerance_rebuilds() {
        let s = ViewportSizing::default();
        let cur = RenderSize::new(800, 600);
        assert!(s.needs_recreate(cur, RenderSize::new(809, 600)));
        assert!(s.needs_recreate(cur, RenderSize::new(800, 591)));
        assert!(s.needs_recreate(cur, RenderSize::new(1024, 768)));
    }

    #[test]
    fn zero_area_is_ignored() {
        let s = ViewportSizing::new(0);
        assert!(!s.needs_recreate(RenderSize::new(800, 600), RenderSize::new(0, 600)));
    }
}
