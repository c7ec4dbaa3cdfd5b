// SPDX-License-Identifier: CEPL-1.0
//! Physical device selection and the logical device context.
use std::ffi::{c_char, CStr};
use std::sync::Arc;

use ash::khr::swapchain;
use ash::vk;
use prism_render::select::{
    select_device, DeviceCandidate, DeviceKind, DeviceRequirements, QueueAssignment, QueueCaps,
    QueueFamilyInfo,
};
use prism_render::RenderError;
use tracing::{debug, info};

use crate::instance::InstanceContext;
use crate::vk_err;

/// Logical device plus everything tied to its lifetime.
///
/// Every GPU object wrapper holds an `Arc<DeviceContext>`, so the device is
/// destroyed only after the last of them.
pub struct DeviceContext {
    pub instance: Arc<InstanceContext>,
    pub phys: vk::PhysicalDevice,
    pub device: ash::Device,
    pub name: String,
    pub queues: QueueAssignment,
    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,
    pub transfer_queue: vk::Queue,
    pub compute_queue: vk::Queue,
    /// Owned by the graphics family; RESET_COMMAND_BUFFER so per-slot
    /// buffers can be re-recorded individually.
    pub command_pool: vk::CommandPool,
    pub swapchain_loader: swapchain::Device,
    memory: vk::PhysicalDeviceMemoryProperties,
}

impl std::fmt::Debug for DeviceContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceContext")
            .field("name", &self.name)
            .field("queues", &self.queues)
            .finish_non_exhaustive()
    }
}

unsafe fn describe_device(
    ctx: &InstanceContext,
    phys: vk::PhysicalDevice,
) -> Result<DeviceCandidate<vk::PhysicalDevice>, RenderError> {
    let instance = &ctx.instance;
    let props = instance.get_physical_device_properties(phys);
    let name = CStr::from_ptr(props.device_name.as_ptr())
        .to_string_lossy()
        .into_owned();
    let kind = match props.device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => DeviceKind::Discrete,
        vk::PhysicalDeviceType::INTEGRATED_GPU => DeviceKind::Integrated,
        vk::PhysicalDeviceType::VIRTUAL_GPU => DeviceKind::Virtual,
        vk::PhysicalDeviceType::CPU => DeviceKind::Cpu,
        _ => DeviceKind::Other,
    };

    let families = instance
        .get_physical_device_queue_family_properties(phys)
        .iter()
        .enumerate()
        .map(|(i, q)| QueueFamilyInfo {
            index: i as u32,
            caps: queue_caps(q.queue_flags),
            queue_count: q.queue_count,
            present: ctx
                .surface_loader
                .get_physical_device_surface_support(phys, i as u32, ctx.surface)
                .unwrap_or(false),
        })
        .collect();

    let extensions = instance
        .enumerate_device_extension_properties(phys)
        .map_err(|e| vk_err("enumerate_device_extension_properties", e))?
        .iter()
        .map(|e| {
            CStr::from_ptr(e.extension_name.as_ptr())
                .to_string_lossy()
                .into_owned()
        })
        .collect();

    let has_surface_formats = ctx
        .surface_loader
        .get_physical_device_surface_formats(phys, ctx.surface)
        .map(|f| !f.is_empty())
        .unwrap_or(false);
    let has_present_modes = ctx
        .surface_loader
        .get_physical_device_surface_present_modes(phys, ctx.surface)
        .map(|m| !m.is_empty())
        .unwrap_or(false);

    Ok(DeviceCandidate {
        handle: phys,
        name,
        kind,
        families,
        extensions,
        has_surface_formats,
        has_present_modes,
    })
}

fn queue_caps(flags: vk::QueueFlags) -> QueueCaps {
    let mut caps = QueueCaps::empty();
    for (vk_flag, cap) in [
        (vk::QueueFlags::GRAPHICS, QueueCaps::GRAPHICS),
        (vk::QueueFlags::COMPUTE, QueueCaps::COMPUTE),
        (vk::QueueFlags::TRANSFER, QueueCaps::TRANSFER),
        (vk::QueueFlags::SPARSE_BINDING, QueueCaps::SPARSE),
        (vk::QueueFlags::PROTECTED, QueueCaps::PROTECTED),
        (vk::QueueFlags::VIDEO_DECODE_KHR, QueueCaps::VIDEO),
        (vk::QueueFlags::VIDEO_ENCODE_KHR, QueueCaps::VIDEO),
    ] {
        if flags.contains(vk_flag) {
            caps |= cap;
        }
    }
    caps
}

impl DeviceContext {
    pub fn new(
        instance: Arc<InstanceContext>,
        reqs: &DeviceRequirements,
    ) -> Result<Arc<Self>, RenderError> {
        unsafe {
            let physicals = instance
                .instance
                .enumerate_physical_devices()
                .map_err(|e| vk_err("enumerate_physical_devices", e))?;
            let mut candidates = Vec::with_capacity(physicals.len());
            for phys in physicals {
                candidates.push(describe_device(&instance, phys)?);
            }
            for c in &candidates {
                debug!("vk: candidate {} ({:?}), {} queue families", c.name, c.kind, c.families.len());
            }

            let selection = select_device(&candidates, reqs)?;
            let phys = selection.handle;
            let queues = selection.queues;
            info!(
                "vk: selected {} ({:?}, score {}), queues {:?}",
                selection.name, selection.kind, selection.score, queues
            );

            let priorities = [1.0_f32];
            let queue_infos: Vec<vk::DeviceQueueCreateInfo> = queues
                .unique_families()
                .into_iter()
                .map(|family| vk::DeviceQueueCreateInfo {
                    s_type: vk::StructureType::DEVICE_QUEUE_CREATE_INFO,
                    queue_family_index: family,
                    queue_count: 1,
                    p_queue_priorities: priorities.as_ptr(),
                    ..Default::default()
                })
                .collect();

            let ext_names: Vec<std::ffi::CString> = reqs
                .extensions
                .iter()
                .map(|e| {
                    std::ffi::CString::new(e.as_str()).map_err(|_| RenderError::MissingExtension {
                        name: e.clone(),
                    })
                })
                .collect::<Result<_, _>>()?;
            let ext_ptrs: Vec<*const c_char> = ext_names.iter().map(|e| e.as_ptr()).collect();

            let dinfo = vk::DeviceCreateInfo {
                s_type: vk::StructureType::DEVICE_CREATE_INFO,
                queue_create_info_count: queue_infos.len() as u32,
                p_queue_create_infos: queue_infos.as_ptr(),
                enabled_extension_count: ext_ptrs.len() as u32,
                pp_enabled_extension_names: ext_ptrs.as_ptr(),
                ..Default::default()
            };
            let device = instance
                .instance
                .create_device(phys, &dinfo, None)
                .map_err(|e| match e {
                    vk::Result::ERROR_EXTENSION_NOT_PRESENT => RenderError::MissingExtension {
                        name: reqs.extensions.join(", "),
                    },
                    other => vk_err("create_device", other),
                })?;

            let graphics_queue = device.get_device_queue(queues.graphics, 0);
            let present_queue = device.get_device_queue(queues.present, 0);
            let transfer_queue = device.get_device_queue(queues.transfer, 0);
            let compute_queue = device.get_device_queue(queues.compute, 0);

            let pool_info = vk::CommandPoolCreateInfo {
                s_type: vk::StructureType::COMMAND_POOL_CREATE_INFO,
                queue_family_index: queues.graphics,
                flags: vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
                ..Default::default()
            };
            let command_pool = match device.create_command_pool(&pool_info, None) {
                Ok(pool) => pool,
                Err(e) => {
                    device.destroy_device(None);
                    return Err(vk_err("create_command_pool", e));
                }
            };

            let swapchain_loader = swapchain::Device::new(&instance.instance, &device);
            let memory = instance.instance.get_physical_device_memory_properties(phys);

            Ok(Arc::new(Self {
                instance,
                phys,
                device,
                name: selection.name,
                queues,
                graphics_queue,
                present_queue,
                transfer_queue,
                compute_queue,
                command_pool,
                swapchain_loader,
                memory,
            }))
        }
    }

    /// First memory type allowed by `type_bits` that has all of `required`.
    pub fn find_memory_type(
        &self,
        type_bits: u32,
        required: vk::MemoryPropertyFlags,
    ) -> Result<u32, RenderError> {
        (0..self.memory.memory_type_count)
            .find(|&i| {
                (type_bits & (1 << i)) != 0
                    && self.memory.memory_types[i as usize]
                        .property_flags
                        .contains(required)
            })
            .ok_or_else(|| RenderError::backend("find_memory_type", format!("no type for {required:?}")))
    }

    /// Requeried on every chain rebuild; support can change with drivers.
    pub fn pick_depth_format(&self) -> vk::Format {
        const CANDIDATES: [vk::Format; 4] = [
            vk::Format::D32_SFLOAT,
            vk::Format::D32_SFLOAT_S8_UINT,
            vk::Format::D24_UNORM_S8_UINT,
            vk::Format::D16_UNORM,
        ];
        CANDIDATES
            .into_iter()
            .find(|&fmt| unsafe {
                self.instance
                    .instance
                    .get_physical_device_format_properties(self.phys, fmt)
                    .optimal_tiling_features
                    .contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
            })
            .unwrap_or(vk::Format::D32_SFLOAT)
    }

    pub fn wait_idle(&self) -> Result<(), RenderError> {
        unsafe { self.device.device_wait_idle() }.map_err(|e| vk_err("device_wait_idle", e))
    }

    pub fn allocate_command_buffers(&self, count: u32) -> Result<Vec<vk::CommandBuffer>, RenderError> {
        let ai = vk::CommandBufferAllocateInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
            command_pool: self.command_pool,
            level: vk::CommandBufferLevel::PRIMARY,
            command_buffer_count: count,
            ..Default::default()
        };
        unsafe { self.device.allocate_command_buffers(&ai) }
            .map_err(|e| vk_err("allocate_command_buffers", e))
    }

    pub fn free_command_buffers(&self, bufs: &[vk::CommandBuffer]) {
        if !bufs.is_empty() {
            unsafe { self.device.free_command_buffers(self.command_pool, bufs) };
        }
    }
}

impl Drop for DeviceContext {
    fn drop(&mut self) {
        unsafe {
            self.device.device_wait_idle().ok();
            self.device.destroy_command_pool(self.command_pool, None);
            self.device.destroy_device(None);
        }
        debug!("vk: device {} destroyed", self.name);
    }
}
