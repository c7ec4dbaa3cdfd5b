// SPDX-License-Identifier: CEPL-1.0
//! Presentation-chain sizing and present-mode policy.
use crate::{PresentPolicy, RenderSize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PresentMode {
    Immediate,
    Mailbox,
    Fifo,
    FifoRelaxed,
}

impl PresentMode {
    pub fn name(self) -> &'static str {
        match self {
            PresentMode::Immediate => "IMMEDIATE",
            PresentMode::Mailbox => "MAILBOX",
            PresentMode::Fifo => "FIFO",
            PresentMode::FifoRelaxed => "FIFO_RELAXED",
        }
    }
}

/// Surface limits relevant to chain sizing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SurfaceLimits {
    /// `None` when the surface lets the swapchain pick its size.
    pub current: Option<RenderSize>,
    pub min: RenderSize,
    pub max: RenderSize,
    pub min_images: u32,
    /// Zero means no upper bound.
    pub max_images: u32,
}

/// FIFO is the only mode every implementation must support, so it ends
/// every preference list.
pub fn choose_present_mode(available: &[PresentMode], policy: PresentPolicy) -> PresentMode {
    let prefs: &[PresentMode] = match policy {
        PresentPolicy::Mailbox => &[PresentMode::Mailbox, PresentMode::Fifo],
        PresentPolicy::Fifo => &[PresentMode::Fifo],
        PresentPolicy::Uncapped => &[PresentMode::Immediate, PresentMode::Mailbox, PresentMode::Fifo],
    };
    prefs
        .iter()
        .copied()
        .find(|m| available.contains(m))
        .unwrap_or(PresentMode::Fifo)
}

pub fn choose_extent(limits: &SurfaceLimits, wanted: RenderSize) -> RenderSize {
    if let Some(current) = limits.current {
        return current;
    }
    if wanted.is_empty() {
        return RenderSize::ZERO;
    }
    RenderSize {
        width: wanted.width.clamp(limits.min.width, limits.max.width),
        height: wanted.height.clamp(limits.min.height, limits.max.height),
    }
}

/// One more than the minimum, for overlap, capped by the maximum.
pub fn choose_image_count(limits: &SurfaceLimits) -> u32 {
    let count = limits.min_images.saturating_add(1);
    if limits.max_images > 0 {
        count.min(limits.max_images)
    } else {
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits(current: Option<RenderSize>) -> SurfaceLimits {
        SurfaceLimits {
            current,
            min: RenderSize::new(1, 1),
            max: RenderSize::new(4096, 4096),
            min_images: 2,
            max_images: 3,
        }
    }

    #[test]
    fn mailbox_policy_falls_back_to_fifo() {
        let modes = [PresentMode::Fifo, PresentMode::Immediate];
        assert_eq!(choose_present_mode(&modes, PresentPolicy::Mailbox), PresentMode::Fifo);
        let modes = [PresentMode::Fifo, PresentMode::Mailbox];
        assert_eq!(choose_present_mode(&modes, PresentPolicy::Mailbox), PresentMode::Mailbox);
    }

    #[test]
    fn uncapped_is_opt_in_only() {
        let modes = [PresentMode::Fifo, PresentMode::Mailbox, PresentMode::Immediate];
        assert_eq!(choose_present_mode(&modes, PresentPolicy::Uncapped), PresentMode::Immediate);
        assert_eq!(choose_present_mode(&modes, PresentPolicy::Mailbox), PresentMode::Mailbox);
        assert_eq!(choose_present_mode(&modes, PresentPolicy::Fifo), PresentMode::Fifo);
    }

    #[test]
    fn fixed_surface_extent_wins() {
        let l = limits(Some(RenderSize::new(640, 480)));
        assert_eq!(choose_extent(&l, RenderSize::new(1920, 1080)), RenderSize::new(640, 480));
    }

    #[test]
    fn free_extent_is_clamped() {
        let l = limits(None);
        assert_eq!(choose_extent(&l, RenderSize::new(9000, 300)), RenderSize::new(4096, 300));
        assert_eq!(choose_extent(&l, RenderSize::new(0, 300)), RenderSize::ZERO);
    }

    #[test]
    fn image_count_respects_bounds() {
        let mut l = limits(None);
        assert_eq!(choose_image_count(&l), 3);
        l.max_images = 2;
        assert_eq!(choose_image_count(&l), 2);
        l.max_images = 0;
        l.min_images = 4;
        assert_eq!(choose_image_count(&l), 5);
    }
}
