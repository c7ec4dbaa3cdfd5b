// SPDX-License-Identifier: CEPL-1.0
//! Vulkan instance, presentation surface and the validation messenger.
use std::ffi::{c_void, CStr};

use anyhow::{Context, Result};
use ash::ext::debug_utils;
use ash::khr::surface;
use ash::{vk, Entry};
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use tracing::{debug, error, info, trace, warn};

pub const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Splits `wanted` into layers present in `available` and missing ones.
/// Names must match exactly.
pub fn partition_layers<'a>(available: &[&CStr], wanted: &[&'a CStr]) -> (Vec<&'a CStr>, Vec<&'a CStr>) {
    wanted
        .iter()
        .copied()
        .partition(|w| available.iter().any(|a| a == w))
}

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    types: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user: *mut c_void,
) -> vk::Bool32 {
    if data.is_null() || (*data).p_message.is_null() {
        return vk::FALSE;
    }
    let msg = CStr::from_ptr((*data).p_message).to_string_lossy();
    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        error!(target: "vulkan", "{types:?} {msg}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        warn!(target: "vulkan", "{types:?} {msg}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        debug!(target: "vulkan", "{types:?} {msg}");
    } else {
        trace!(target: "vulkan", "{types:?} {msg}");
    }
    vk::FALSE
}

struct DebugMessenger {
    loader: debug_utils::Instance,
    handle: vk::DebugUtilsMessengerEXT,
}

/// Instance-scoped state. Dropped after every [`crate::DeviceContext`]
/// created from it, since each of those holds an `Arc` to it.
pub struct InstanceContext {
    pub entry: Entry,
    pub instance: ash::Instance,
    pub surface_loader: surface::Instance,
    pub surface: vk::SurfaceKHR,
    debug: Option<DebugMessenger>,
}

impl InstanceContext {
    // STRICT ORDER:
    // 1) instance (platform WSI extensions + optional validation)
    // 2) surface from THIS instance
    // 3) device selection later queries present support against the surface
    pub fn new(display: RawDisplayHandle, window: RawWindowHandle, validation: bool) -> Result<Self> {
        unsafe {
            let entry = Entry::linked();
            let app_name = c"prism";
            let app_info = vk::ApplicationInfo {
                s_type: vk::StructureType::APPLICATION_INFO,
                p_application_name: app_name.as_ptr(),
                application_version: 0,
                p_engine_name: app_name.as_ptr(),
                engine_version: 0,
                api_version: vk::API_VERSION_1_2,
                ..Default::default()
            };

            let mut exts = ash_window::enumerate_required_extensions(display)
                .context("enumerate_required_extensions")?
                .to_vec();

            let layers = if validation { pick_layers(&entry)? } else { Vec::new() };
            let debug_enabled = !layers.is_empty() && has_instance_extension(&entry, debug_utils::NAME);
            if debug_enabled {
                exts.push(debug_utils::NAME.as_ptr());
            }
            let layer_ptrs: Vec<*const std::ffi::c_char> = layers.iter().map(|l| l.as_ptr()).collect();

            let create_info = vk::InstanceCreateInfo {
                s_type: vk::StructureType::INSTANCE_CREATE_INFO,
                p_application_info: &app_info,
                enabled_extension_count: exts.len() as u32,
                pp_enabled_extension_names: exts.as_ptr(),
                enabled_layer_count: layer_ptrs.len() as u32,
                pp_enabled_layer_names: layer_ptrs.as_ptr(),
                ..Default::default()
            };
            let instance = entry
                .create_instance(&create_info, None)
                .context("create_instance")?;

            let debug = if debug_enabled {
                Some(create_debug_messenger(&entry, &instance)?)
            } else {
                None
            };

            let surface_loader = surface::Instance::new(&entry, &instance);
            let surface = ash_window::create_surface(&entry, &instance, display, window, None)
                .context("ash_window::create_surface")?;

            let messenger_enabled = debug.is_some();
            info!(
                "vk: instance ready (validation={}, messenger={})",
                !layers.is_empty(),
                messenger_enabled
            );
            Ok(Self {
                entry,
                instance,
                surface_loader,
                surface,
                debug,
            })
        }
    }
}

unsafe fn pick_layers(entry: &Entry) -> Result<Vec<&'static CStr>> {
    let props = entry
        .enumerate_instance_layer_properties()
        .context("enumerate_instance_layer_properties")?;
    let available: Vec<&CStr> = props
        .iter()
        .map(|p| CStr::from_ptr(p.layer_name.as_ptr()))
        .collect();
    let (found, missing) = partition_layers(&available, &[VALIDATION_LAYER]);
    for m in missing {
        warn!("vk: validation layer {m:?} not installed, continuing without it");
    }
    Ok(found)
}

unsafe fn has_instance_extension(entry: &Entry, name: &CStr) -> bool {
    entry
        .enumerate_instance_extension_properties(None)
        .unwrap_or_default()
        .iter()
        .any(|e| CStr::from_ptr(e.extension_name.as_ptr()) == name)
}

unsafe fn create_debug_messenger(entry: &Entry, instance: &ash::Instance) -> Result<DebugMessenger> {
    let loader = debug_utils::Instance::new(entry, instance);
    let ci = vk::DebugUtilsMessengerCreateInfoEXT {
        s_type: vk::StructureType::DEBUG_UTILS_MESSENGER_CREATE_INFO_EXT,
        message_severity: vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
            | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
            | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
            | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        message_type: vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
            | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
            | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        pfn_user_callback: Some(debug_callback),
        ..Default::default()
    };
    let handle = loader
        .create_debug_utils_messenger(&ci, None)
        .context("create_debug_utils_messenger")?;
    Ok(DebugMessenger { loader, handle })
}

impl Drop for InstanceContext {
    fn drop(&mut self) {
        unsafe {
            self.surface_loader.destroy_surface(self.surface, None);
            if let Some(dbg) = self.debug.take() {
                dbg.loader.destroy_debug_utils_messenger(dbg.handle, None);
            }
            self.instance.destroy_instance(None);
        }
        debug!("vk: instance destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layer_lookup_requires_exact_name() {
        let available = [c"VK_LAYER_KHRONOS_validation_extra", c"VK_LAYER_MESA_overlay"];
        let (found, missing) = partition_layers(&available, &[VALIDATION_LAYER]);
        assert!(found.is_empty());
        assert_eq!(missing, vec![VALIDATION_LAYER]);

        let available = [c"VK_LAYER_MESA_overlay", VALIDATION_LAYER];
        let (found, missing) = partition_layers(&available, &[VALIDATION_LAYER]);
        assert_eq!(found, vec![VALIDATION_LAYER]);
        assert!(missing.is_empty());
    }
}
