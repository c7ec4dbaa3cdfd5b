// SPDX-License-Identifier: CEPL-1.0
//! Owned images, views, samplers and buffers. Each wrapper destroys its
//! handle on drop and keeps the device alive until then.
use std::sync::Arc;

use ash::vk;
use prism_render::{RenderError, RenderSize};

use crate::device::DeviceContext;
use crate::vk_err;

/// A 2D image and the device memory bound to it.
pub struct Image {
    ctx: Arc<DeviceContext>,
    handle: vk::Image,
    memory: vk::DeviceMemory,
    pub format: vk::Format,
    pub size: RenderSize,
}

impl Image {
    pub fn new(
        ctx: &Arc<DeviceContext>,
        size: RenderSize,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
    ) -> Result<Self, RenderError> {
        debug_assert!(!size.is_empty(), "zero-sized image");
        let d = &ctx.device;
        let ci = vk::ImageCreateInfo {
            s_type: vk::StructureType::IMAGE_CREATE_INFO,
            image_type: vk::ImageType::TYPE_2D,
            format,
            extent: vk::Extent3D {
                width: size.width,
                height: size.height,
                depth: 1,
            },
            mip_levels: 1,
            array_layers: 1,
            samples: vk::SampleCountFlags::TYPE_1,
            tiling: vk::ImageTiling::OPTIMAL,
            usage,
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            ..Default::default()
        };
        unsafe {
            let handle = d.create_image(&ci, None).map_err(|e| vk_err("create_image", e))?;
            let req = d.get_image_memory_requirements(handle);
            let memory = ctx
                .find_memory_type(req.memory_type_bits, vk::MemoryPropertyFlags::DEVICE_LOCAL)
                .and_then(|memory_type_index| {
                    let alloc = vk::MemoryAllocateInfo {
                        s_type: vk::StructureType::MEMORY_ALLOCATE_INFO,
                        allocation_size: req.size,
                        memory_type_index,
                        ..Default::default()
                    };
                    d.allocate_memory(&alloc, None)
                        .map_err(|e| vk_err("allocate_memory(image)", e))
                });
            let memory = match memory {
                Ok(m) => m,
                Err(e) => {
                    d.destroy_image(handle, None);
                    return Err(e);
                }
            };
            let image = Self {
                ctx: Arc::clone(ctx),
                handle,
                memory,
                format,
                size,
            };
            d.bind_image_memory(handle, memory, 0)
                .map_err(|e| vk_err("bind_image_memory", e))?;
            Ok(image)
        }
    }

    pub fn raw(&self) -> vk::Image {
        self.handle
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        unsafe {
            self.ctx.device.destroy_image(self.handle, None);
            self.ctx.device.free_memory(self.memory, None);
        }
    }
}

pub fn aspect_for(format: vk::Format) -> vk::ImageAspectFlags {
    match format {
        vk::Format::D32_SFLOAT | vk::Format::D16_UNORM => vk::ImageAspectFlags::DEPTH,
        vk::Format::D32_SFLOAT_S8_UINT | vk::Format::D24_UNORM_S8_UINT => {
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        }
        _ => vk::ImageAspectFlags::COLOR,
    }
}

pub struct ImageView {
    ctx: Arc<DeviceContext>,
    handle: vk::ImageView,
}

impl ImageView {
    /// View over a raw image; used for chain images the swapchain owns.
    pub fn for_raw(
        ctx: &Arc<DeviceContext>,
        image: vk::Image,
        format: vk::Format,
        aspect_mask: vk::ImageAspectFlags,
    ) -> Result<Self, RenderError> {
        let ci = vk::ImageViewCreateInfo {
            s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
            image,
            view_type: vk::ImageViewType::TYPE_2D,
            format,
            subresource_range: vk::ImageSubresourceRange {
                aspect_mask,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            },
            ..Default::default()
        };
        let handle = unsafe { ctx.device.create_image_view(&ci, None) }
            .map_err(|e| vk_err("create_image_view", e))?;
        Ok(Self {
            ctx: Arc::clone(ctx),
            handle,
        })
    }

    pub fn new(ctx: &Arc<DeviceContext>, image: &Image) -> Result<Self, RenderError> {
        Self::for_raw(ctx, image.raw(), image.format, aspect_for(image.format))
    }

    pub fn raw(&self) -> vk::ImageView {
        self.handle
    }
}

impl Drop for ImageView {
    fn drop(&mut self) {
        unsafe { self.ctx.device.destroy_image_view(self.handle, None) };
    }
}

pub struct Sampler {
    ctx: Arc<DeviceContext>,
    handle: vk::Sampler,
}

impl Sampler {
    /// Linear filtering, clamped to edge.
    pub fn linear(ctx: &Arc<DeviceContext>) -> Result<Self, RenderError> {
        let ci = vk::SamplerCreateInfo {
            s_type: vk::StructureType::SAMPLER_CREATE_INFO,
            mag_filter: vk::Filter::LINEAR,
            min_filter: vk::Filter::LINEAR,
            mipmap_mode: vk::SamplerMipmapMode::LINEAR,
            address_mode_u: vk::SamplerAddressMode::CLAMP_TO_EDGE,
            address_mode_v: vk::SamplerAddressMode::CLAMP_TO_EDGE,
            address_mode_w: vk::SamplerAddressMode::CLAMP_TO_EDGE,
            max_lod: 1.0,
            border_color: vk::BorderColor::FLOAT_OPAQUE_BLACK,
            ..Default::default()
        };
        let handle = unsafe { ctx.device.create_sampler(&ci, None) }
            .map_err(|e| vk_err("create_sampler", e))?;
        Ok(Self {
            ctx: Arc::clone(ctx),
            handle,
        })
    }

    pub fn raw(&self) -> vk::Sampler {
        self.handle
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        unsafe { self.ctx.device.destroy_sampler(self.handle, None) };
    }
}

/// Rejects writes that would run past a buffer of `capacity` bytes.
pub fn check_write(capacity: vk::DeviceSize, len: usize) -> Result<(), RenderError> {
    if len as vk::DeviceSize > capacity {
        return Err(RenderError::backend(
            "HostBuffer::write",
            format!("{len} bytes into a {capacity} byte buffer"),
        ));
    }
    Ok(())
}

/// Host-visible, coherent buffer; used for staging.
pub struct HostBuffer {
    ctx: Arc<DeviceContext>,
    handle: vk::Buffer,
    memory: vk::DeviceMemory,
    size: vk::DeviceSize,
}

impl HostBuffer {
    pub fn new(
        ctx: &Arc<DeviceContext>,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
    ) -> Result<Self, RenderError> {
        let d = &ctx.device;
        let bci = vk::BufferCreateInfo {
            s_type: vk::StructureType::BUFFER_CREATE_INFO,
            size,
            usage,
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            ..Default::default()
        };
        unsafe {
            let handle = d.create_buffer(&bci, None).map_err(|e| vk_err("create_buffer", e))?;
            let req = d.get_buffer_memory_requirements(handle);
            let memory = ctx
                .find_memory_type(
                    req.memory_type_bits,
                    vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
                )
                .and_then(|memory_type_index| {
                    let mai = vk::MemoryAllocateInfo {
                        s_type: vk::StructureType::MEMORY_ALLOCATE_INFO,
                        allocation_size: req.size,
                        memory_type_index,
                        ..Default::default()
                    };
                    d.allocate_memory(&mai, None)
                        .map_err(|e| vk_err("allocate_memory(buffer)", e))
                });
            let memory = match memory {
                Ok(m) => m,
                Err(e) => {
                    d.destroy_buffer(handle, None);
                    return Err(e);
                }
            };
            let buf = Self {
                ctx: Arc::clone(ctx),
                handle,
                memory,
                size,
            };
            d.bind_buffer_memory(handle, memory, 0)
                .map_err(|e| vk_err("bind_buffer_memory", e))?;
            Ok(buf)
        }
    }

    pub fn write(&self, bytes: &[u8]) -> Result<(), RenderError> {
        check_write(self.size, bytes.len())?;
        unsafe {
            let ptr = self
                .ctx
                .device
                .map_memory(self.memory, 0, self.size, vk::MemoryMapFlags::empty())
                .map_err(|e| vk_err("map_memory", e))?;
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr as *mut u8, bytes.len());
            self.ctx.device.unmap_memory(self.memory);
        }
        Ok(())
    }

    pub fn raw(&self) -> vk::Buffer {
        self.handle
    }
}

impl Drop for HostBuffer {
    fn drop(&mut self) {
        unsafe {
            self.ctx.device.destroy_buffer(self.handle, None);
            self.ctx.device.free_memory(self.memory, None);
        }
    }
}

/// A sampled image with its view and sampler, ready for a descriptor.
pub struct Texture {
    pub sampler: Sampler,
    pub view: ImageView,
    pub image: Image,
}

impl Texture {
    pub fn size(&self) -> RenderSize {
        self.image.size
    }

    pub fn descriptor_info(&self) -> vk::DescriptorImageInfo {
        vk::DescriptorImageInfo {
            sampler: self.sampler.raw(),
            image_view: self.view.raw(),
            image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oversized_write_is_rejected() {
        assert!(check_write(16, 16).is_ok());
        assert!(check_write(16, 0).is_ok());
        let err = check_write(16, 64).unwrap_err();
        assert!(matches!(err, RenderError::Backend { op: "HostBuffer::write", .. }));
    }

    #[test]
    fn depth_formats_get_depth_aspect() {
        assert_eq!(aspect_for(vk::Format::R8G8B8A8_UNORM), vk::ImageAspectFlags::COLOR);
        assert!(aspect_for(vk::Format::D32_SFLOAT).contains(vk::ImageAspectFlags::DEPTH));
    }
}
