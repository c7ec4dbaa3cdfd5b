// SPDX-License-Identifier: CEPL-1.0
//! Physical device and queue family selection.
//!
//! The Vulkan backend describes every enumerated device as a
//! [`DeviceCandidate`]; the policy here filters, scores and assigns queue
//! roles without touching the API, which keeps it testable.
use bitflags::bitflags;
use thiserror::Error;

/// Device extension every candidate must expose.
pub const SWAPCHAIN_EXTENSION: &str = "VK_KHR_swapchain";

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct QueueCaps: u32 {
        const GRAPHICS = 1 << 0;
        const COMPUTE = 1 << 1;
        const TRANSFER = 1 << 2;
        const SPARSE = 1 << 3;
        const PROTECTED = 1 << 4;
        const VIDEO = 1 << 5;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeviceKind {
    Discrete,
    Integrated,
    Virtual,
    Cpu,
    Other,
}

#[derive(Clone, Debug)]
pub struct QueueFamilyInfo {
    pub index: u32,
    pub caps: QueueCaps,
    pub queue_count: u32,
    /// Whether this family can present to the target surface.
    pub present: bool,
}

impl QueueFamilyInfo {
    fn usable(&self) -> bool {
        self.queue_count > 0
    }

    /// Graphics and compute queues implicitly support transfer.
    fn can_transfer(&self) -> bool {
        self.caps
            .intersects(QueueCaps::TRANSFER | QueueCaps::GRAPHICS | QueueCaps::COMPUTE)
    }
}

#[derive(Clone, Debug)]
pub struct DeviceCandidate<H> {
    pub handle: H,
    pub name: String,
    pub kind: DeviceKind,
    pub families: Vec<QueueFamilyInfo>,
    pub extensions: Vec<String>,
    pub has_surface_formats: bool,
    pub has_present_modes: bool,
}

#[derive(Clone, Debug)]
pub struct DeviceRequirements {
    pub extensions: Vec<String>,
    pub prefer_discrete: bool,
}

impl Default for DeviceRequirements {
    fn default() -> Self {
        Self {
            extensions: vec![SWAPCHAIN_EXTENSION.to_string()],
            prefer_discrete: true,
        }
    }
}

/// One queue family per role. Roles may alias the same family.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueAssignment {
    pub graphics: u32,
    pub present: u32,
    pub transfer: u32,
    pub compute: u32,
}

impl QueueAssignment {
    /// Distinct family indices, each needing one `DeviceQueueCreateInfo`.
    pub fn unique_families(&self) -> Vec<u32> {
        let mut out = vec![self.graphics, self.present, self.transfer, self.compute];
        out.sort_unstable();
        out.dedup();
        out
    }
}

#[derive(Clone, Debug)]
pub struct Selection<H> {
    pub handle: H,
    pub name: String,
    pub kind: DeviceKind,
    pub queues: QueueAssignment,
    pub score: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Rejection {
    NoGraphicsQueue,
    NoPresentQueue,
    MissingExtensions(Vec<String>),
    NoSurfaceFormats,
    NoPresentModes,
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Rejection::NoGraphicsQueue => f.write_str("no graphics queue"),
            Rejection::NoPresentQueue => f.write_str("no queue can present to the surface"),
            Rejection::MissingExtensions(m) => write!(f, "missing extensions {}", m.join(", ")),
            Rejection::NoSurfaceFormats => f.write_str("no surface formats"),
            Rejection::NoPresentModes => f.write_str("no present modes"),
        }
    }
}

#[derive(Debug, Error)]
pub enum SelectError {
    #[error("no Vulkan physical devices were enumerated")]
    NoDevices,

    #[error("none of the {} device(s) qualify: {}", .rejected.len(), describe(.rejected))]
    NoSuitableDevice { rejected: Vec<(String, Rejection)> },

    #[error("{device} is missing required extensions: {}", .missing.join(", "))]
    MissingExtensions { device: String, missing: Vec<String> },
}

fn describe(rejected: &[(String, Rejection)]) -> String {
    rejected
        .iter()
        .map(|(name, why)| format!("{name} ({why})"))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Picks queue families for every role, or `None` when graphics or
/// presentation is unavailable.
pub fn assign_queues(families: &[QueueFamilyInfo]) -> Option<QueueAssignment> {
    let usable = || families.iter().filter(|f| f.usable());

    let shared = usable().find(|f| f.caps.contains(QueueCaps::GRAPHICS) && f.present);
    let (graphics, present) = match shared {
        Some(f) => (f.index, f.index),
        None => {
            let g = usable().find(|f| f.caps.contains(QueueCaps::GRAPHICS))?;
            let p = usable().find(|f| f.present)?;
            (g.index, p.index)
        }
    };

    // Fewest capability bits wins, so a dedicated DMA family beats the
    // general purpose one.
    let transfer = usable()
        .filter(|f| f.can_transfer())
        .min_by_key(|f| (f.caps.bits().count_ones(), f.index))
        .map(|f| f.index)
        .unwrap_or(graphics);

    let compute = usable()
        .filter(|f| f.caps.contains(QueueCaps::COMPUTE) && !f.caps.contains(QueueCaps::GRAPHICS))
        .min_by_key(|f| (f.caps.bits().count_ones(), f.index))
        .map(|f| f.index)
        .unwrap_or(graphics);

    Some(QueueAssignment {
        graphics,
        present,
        transfer,
        compute,
    })
}

fn evaluate<H>(
    candidate: &DeviceCandidate<H>,
    reqs: &DeviceRequirements,
) -> Result<(QueueAssignment, u32), Rejection> {
    let missing: Vec<String> = reqs
        .extensions
        .iter()
        .filter(|want| !candidate.extensions.iter().any(|have| have == *want))
        .cloned()
        .collect();
    if !missing.is_empty() {
        return Err(Rejection::MissingExtensions(missing));
    }

    if !candidate
        .families
        .iter()
        .any(|f| f.usable() && f.caps.contains(QueueCaps::GRAPHICS))
    {
        return Err(Rejection::NoGraphicsQueue);
    }
    let queues = assign_queues(&candidate.families).ok_or(Rejection::NoPresentQueue)?;

    if !candidate.has_surface_formats {
        return Err(Rejection::NoSurfaceFormats);
    }
    if !candidate.has_present_modes {
        return Err(Rejection::NoPresentModes);
    }

    let mut score = match candidate.kind {
        DeviceKind::Discrete if reqs.prefer_discrete => 1000,
        DeviceKind::Discrete => 200,
        DeviceKind::Integrated => 100,
        DeviceKind::Virtual => 10,
        DeviceKind::Cpu | DeviceKind::Other => 1,
    };
    if queues.graphics == queues.present {
        score += 50;
    }
    if queues.transfer != queues.graphics {
        score += 5;
    }
    Ok((queues, score))
}

/// Chooses the best qualifying device.
///
/// Ties keep enumeration order so the driver's preferred device wins.
pub fn select_device<H: Clone>(
    candidates: &[DeviceCandidate<H>],
    reqs: &DeviceRequirements,
) -> Result<Selection<H>, SelectError> {
    if candidates.is_empty() {
        return Err(SelectError::NoDevices);
    }

    let mut best: Option<Selection<H>> = None;
    let mut rejected = Vec::new();
    for c in candidates {
        match evaluate(c, reqs) {
            Ok((queues, score)) => {
                tracing::debug!("device candidate {} scored {}", c.name, score);
                if best.as_ref().map_or(true, |b| score > b.score) {
                    best = Some(Selection {
                        handle: c.handle.clone(),
                        name: c.name.clone(),
                        kind: c.kind,
                        queues,
                        score,
                    });
                }
            }
            Err(why) => {
                tracing::debug!("device candidate {} rejected: {}", c.name, why);
                rejected.push((c.name.clone(), why));
            }
        }
    }

    match best {
        Some(sel) => Ok(sel),
        None if rejected.len() == 1 => match rejected.pop() {
            Some((device, Rejection::MissingExtensions(missing))) => {
                Err(SelectError::MissingExtensions { device, missing })
            }
            Some(other) => Err(SelectError::NoSuitableDevice {
                rejected: vec![other],
            }),
            None => Err(SelectError::NoDevices),
        },
        None => Err(SelectError::NoSuitableDevice { rejected }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(index: u32, caps: QueueCaps, present: bool) -> QueueFamilyInfo {
        QueueFamilyInfo {
            index,
            caps,
            queue_count: 1,
            present,
        }
    }

    fn candidate(name: &str, kind: DeviceKind, families: Vec<QueueFamilyInfo>) -> DeviceCandidate<u32> {
        DeviceCandidate {
            handle: 0,
            name: name.to_string(),
            kind,
            families,
            extensions: vec![SWAPCHAIN_EXTENSION.to_string()],
            has_surface_formats: true,
            has_present_modes: true,
        }
    }

    #[test]
    fn prefers_shared_graphics_present_family() {
        let fams = vec![
            family(0, QueueCaps::GRAPHICS | QueueCaps::COMPUTE | QueueCaps::TRANSFER, false),
            family(1, QueueCaps::GRAPHICS | QueueCaps::COMPUTE | QueueCaps::TRANSFER, true),
        ];
        let q = assign_queues(&fams).unwrap();
        assert_eq!(q.graphics, 1);
        assert_eq!(q.present, 1);
    }

    #[test]
    fn splits_graphics_and_present_when_no_family_does_both() {
        let fams = vec![
            family(0, QueueCaps::GRAPHICS | QueueCaps::TRANSFER, false),
            family(1, QueueCaps::TRANSFER, true),
        ];
        let q = assign_queues(&fams).unwrap();
        assert_eq!((q.graphics, q.present), (0, 1));
    }

    #[test]
    fn dedicated_transfer_family_wins() {
        let fams = vec![
            family(0, QueueCaps::GRAPHICS | QueueCaps::COMPUTE | QueueCaps::TRANSFER, true),
            family(1, QueueCaps::COMPUTE | QueueCaps::TRANSFER, false),
            family(2, QueueCaps::TRANSFER, false),
        ];
        let q = assign_queues(&fams).unwrap();
        assert_eq!(q.transfer, 2);
        assert_eq!(q.compute, 1);
        assert_eq!(q.unique_families(), vec![0, 1, 2]);
    }

    #[test]
    fn transfer_falls_back_to_graphics() {
        let fams = vec![family(0, QueueCaps::GRAPHICS, true)];
        let q = assign_queues(&fams).unwrap();
        assert_eq!(q.transfer, 0);
        assert_eq!(q.compute, 0);
        assert_eq!(q.unique_families(), vec![0]);
    }

    #[test]
    fn discrete_gpu_preferred() {
        let fams = vec![family(0, QueueCaps::GRAPHICS | QueueCaps::TRANSFER, true)];
        let mut a = candidate("igpu", DeviceKind::Integrated, fams.clone());
        a.handle = 1;
        let mut b = candidate("dgpu", DeviceKind::Discrete, fams);
        b.handle = 2;
        let sel = select_device(&[a, b], &DeviceRequirements::default()).unwrap();
        assert_eq!(sel.handle, 2);
        assert_eq!(sel.kind, DeviceKind::Discrete);
    }

    #[test]
    fn no_devices_is_an_error() {
        let err = select_device::<u32>(&[], &DeviceRequirements::default()).unwrap_err();
        assert!(matches!(err, SelectError::NoDevices));
    }

    #[test]
    fn missing_swapchain_extension_is_reported() {
        let mut c = candidate(
            "compute-only",
            DeviceKind::Discrete,
            vec![family(0, QueueCaps::GRAPHICS, true)],
        );
        c.extensions.clear();
        let err = select_device(&[c], &DeviceRequirements::default()).unwrap_err();
        match err {
            SelectError::MissingExtensions { device, missing } => {
                assert_eq!(device, "compute-only");
                assert_eq!(missing, vec![SWAPCHAIN_EXTENSION.to_string()]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn all_rejections_collected() {
        let no_present = candidate("a", DeviceKind::Discrete, vec![family(0, QueueCaps::GRAPHICS, false)]);
        let mut no_modes = candidate("b", DeviceKind::Integrated, vec![family(0, QueueCaps::GRAPHICS, true)]);
        no_modes.has_present_modes = false;
        let err = select_device(&[no_present, no_modes], &DeviceRequirements::default()).unwrap_err();
        match err {
            SelectError::NoSuitableDevice { rejected } => {
                assert_eq!(rejected.len(), 2);
                assert_eq!(rejected[0].1, Rejection::NoPresentQueue);
                assert_eq!(rejected[1].1, Rejection::NoPresentModes);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
