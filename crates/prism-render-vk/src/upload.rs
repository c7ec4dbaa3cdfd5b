// SPDX-License-Identifier: CEPL-1.0
use std::sync::Arc;

use ash::vk;
use bytemuck::Pod;
use prism_render::{RenderError, RenderSize};
use tracing::debug;

use crate::device::DeviceContext;
use crate::resources::{HostBuffer, Image, ImageView, Sampler, Texture};
use crate::vk_err;

pub const TEXTURE_FORMAT: vk::Format = vk::Format::R8G8B8A8_UNORM;

/// Tightly packed RGBA8 bytes for `size`.
pub fn check_pixels(size: RenderSize, bytes: &[u8]) -> Result<(), RenderError> {
    let expected = size.width as usize * size.height as usize * 4;
    if size.is_empty() || bytes.len() != expected {
        return Err(RenderError::backend(
            "create_texture_from_pixels",
            format!("{size} RGBA8 needs {expected} bytes, got {}", bytes.len()),
        ));
    }
    Ok(())
}

fn layout_barrier(
    image: vk::Image,
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
    src_access_mask: vk::AccessFlags,
    dst_access_mask: vk::AccessFlags,
) -> vk::ImageMemoryBarrier<'static> {
    vk::ImageMemoryBarrier {
        s_type: vk::StructureType::IMAGE_MEMORY_BARRIER,
        src_access_mask,
        dst_access_mask,
        old_layout,
        new_layout,
        src_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
        dst_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
        image,
        subresource_range: vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        },
        ..Default::default()
    }
}

/// One-shot staging upload: host → staging buffer → device-local image,
/// left in SHADER_READ_ONLY_OPTIMAL. Blocks until the graphics queue drains.
pub fn create_texture_from_pixels<P: Pod>(
    ctx: &Arc<DeviceContext>,
    size: RenderSize,
    pixels: &[P],
) -> Result<Texture, RenderError> {
    let bytes: &[u8] = bytemuck::cast_slice(pixels);
    check_pixels(size, bytes)?;

    let staging = HostBuffer::new(ctx, bytes.len() as vk::DeviceSize, vk::BufferUsageFlags::TRANSFER_SRC)?;
    staging.write(bytes)?;

    let image = Image::new(
        ctx,
        size,
        TEXTURE_FORMAT,
        vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
    )?;

    let d = &ctx.device;
    let cmd = ctx.allocate_command_buffers(1)?[0];
    let result = unsafe {
        (|| -> Result<(), RenderError> {
            let bi = vk::CommandBufferBeginInfo {
                s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
                flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
                ..Default::default()
            };
            d.begin_command_buffer(cmd, &bi)
                .map_err(|e| vk_err("begin_command_buffer(upload)", e))?;

            let to_dst = layout_barrier(
                image.raw(),
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::AccessFlags::empty(),
                vk::AccessFlags::TRANSFER_WRITE,
            );
            d.cmd_pipeline_barrier(
                cmd,
                vk::PipelineStageFlags::TOP_OF_PIPE,
                vk::PipelineStageFlags::TRANSFER,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                std::slice::from_ref(&to_dst),
            );

            let region = vk::BufferImageCopy {
                buffer_offset: 0,
                buffer_row_length: 0,
                buffer_image_height: 0,
                image_subresource: vk::ImageSubresourceLayers {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    mip_level: 0,
                    base_array_layer: 0,
                    layer_count: 1,
                },
                image_offset: vk::Offset3D { x: 0, y: 0, z: 0 },
                image_extent: vk::Extent3D {
                    width: size.width,
                    height: size.height,
                    depth: 1,
                },
            };
            d.cmd_copy_buffer_to_image(
                cmd,
                staging.raw(),
                image.raw(),
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                std::slice::from_ref(&region),
            );

            let to_read = layout_barrier(
                image.raw(),
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                vk::AccessFlags::TRANSFER_WRITE,
                vk::AccessFlags::SHADER_READ,
            );
            d.cmd_pipeline_barrier(
                cmd,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::FRAGMENT_SHADER,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                std::slice::from_ref(&to_read),
            );
            d.end_command_buffer(cmd)
                .map_err(|e| vk_err("end_command_buffer(upload)", e))?;

            let si = vk::SubmitInfo {
                s_type: vk::StructureType::SUBMIT_INFO,
                command_buffer_count: 1,
                p_command_buffers: &cmd,
                ..Default::default()
            };
            d.queue_submit(ctx.graphics_queue, std::slice::from_ref(&si), vk::Fence::null())
                .map_err(|e| vk_err("queue_submit(upload)", e))?;
            d.queue_wait_idle(ctx.graphics_queue)
                .map_err(|e| vk_err("queue_wait_idle(upload)", e))
        })()
    };
    ctx.free_command_buffers(&[cmd]);
    result?;
    drop(staging);

    let view = ImageView::new(ctx, &image)?;
    let sampler = Sampler::linear(ctx)?;
    debug!("vk: uploaded {size} texture ({} bytes)", bytes.len());
    Ok(Texture { sampler, view, image })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pixel_buffer_must_match_extent() {
        let size = RenderSize::new(4, 2);
        assert!(check_pixels(size, &[0u8; 32]).is_ok());
        assert!(check_pixels(size, &[0u8; 31]).is_err());
        assert!(check_pixels(RenderSize::new(0, 2), &[]).is_err());
    }

    #[test]
    fn packed_pixels_cast_to_bytes() {
        let px: [[u8; 4]; 2] = [[255, 0, 0, 255], [0, 255, 0, 255]];
        let bytes: &[u8] = bytemuck::cast_slice(&px);
        assert!(check_pixels(RenderSize::new(2, 1), bytes).is_ok());
    }
}
