//! `vkCmd*` entry points
//!
//! Recording checks what can be checked without the driver (handles, counts,
//! ranges, render pass scope) and appends a [`Command`]. Nothing here takes
//! the context lock.

use std::sync::Arc;

use ash::vk;

use crate::backends::gl::commands::{Action, Command, CommandBufferObject};
use crate::backends::gl::conversions::IntoGl;
use crate::backends::gl::driver::BarrierBits;
use crate::backends::gl::state::{Scissor, Viewport};
use crate::core::descriptor::Descriptor;
use crate::core::device::Device;
use crate::core::error::{VulkanError, VulkanResult};
use crate::core::info::{
    BufferMemoryBarrier, ClearAttachment, ClearColorValue, ImageMemoryBarrier, MemoryBarrier,
    RenderPassBeginInfo,
};
use crate::core::instance::max_viewports;
use crate::core::resource::{BufferObject, ImageObject};

/// Reject clear ranges that are empty or run past the image
fn check_ranges(image: &ImageObject, ranges: &[vk::ImageSubresourceRange]) -> VulkanResult<()> {
    if ranges.is_empty() {
        return Err(VulkanError::contract("image clear with no subresource ranges"));
    }
    for range in ranges {
        image.resolve_range(range)?;
    }
    Ok(())
}

/// Scissor offsets are non-negative and the far edge must fit an `i32`
fn check_scissor(rect: &vk::Rect2D) -> VulkanResult<()> {
    let fits = |offset: i32, extent: u32| {
        offset >= 0 && i64::from(offset) + i64::from(extent) <= i64::from(i32::MAX)
    };
    if fits(rect.offset.x, rect.extent.width) && fits(rect.offset.y, rect.extent.height) {
        Ok(())
    } else {
        Err(VulkanError::contract(format!("scissor {rect:?} is out of range")))
    }
}

/// Largest `vkCmdUpdateBuffer` payload
const MAX_UPDATE_SIZE: usize = 65536;

/// Action marking a buffer's memory as written by the device
fn mark_written(buffer: Arc<BufferObject>) -> Action {
    Arc::new(move || {
        if let Some(binding) = buffer.binding() {
            binding.memory.mark_stale();
        }
    })
}

fn barrier_bits(
    memory: &[MemoryBarrier],
    buffers: &[BufferMemoryBarrier],
    images: &[ImageMemoryBarrier],
) -> BarrierBits {
    let access = memory
        .iter()
        .map(|barrier| barrier.dst_access_mask)
        .chain(buffers.iter().map(|barrier| barrier.dst_access_mask))
        .chain(images.iter().map(|barrier| barrier.dst_access_mask))
        .fold(vk::AccessFlags::empty(), |acc, mask| acc | mask);
    access.into_gl()
}

fn check_aligned(what: &str, value: u64) -> VulkanResult<()> {
    if value % 4 == 0 {
        Ok(())
    } else {
        Err(VulkanError::contract(format!("{what} {value} is not a multiple of 4")))
    }
}

impl Device {
    fn command_buffer(&self, buffer: vk::CommandBuffer) -> VulkanResult<Arc<CommandBufferObject>> {
        self.shared.objects.command_buffers.get(buffer)
    }

    fn record(&self, buffer: vk::CommandBuffer, command: Command) -> VulkanResult<()> {
        self.guard(|| self.command_buffer(buffer)?.record(command))
    }

    /// `first..first + count` must fit the context's viewport slots
    fn check_viewport_slots(&self, what: &str, first: u32, count: usize) -> VulkanResult<()> {
        let slots = u64::from(max_viewports(self.shared.context.capabilities()));
        if count == 0 || u64::from(first) + count as u64 > slots {
            return Err(VulkanError::contract(format!(
                "{what}s {first}..{first}+{count} exceed the {slots} available"
            )));
        }
        Ok(())
    }

    fn buffer_object(&self, buffer: vk::Buffer) -> VulkanResult<Arc<BufferObject>> {
        self.shared.objects.buffers.get(buffer)
    }

    /// `vkCmdBeginRenderPass`. Clear values are checked here, before any driver work.
    ///
    /// Inline and secondary subpass contents replay the same way.
    pub fn cmd_begin_render_pass(
        &self,
        buffer: vk::CommandBuffer,
        info: &RenderPassBeginInfo<'_>,
        _contents: vk::SubpassContents,
    ) -> VulkanResult<()> {
        self.guard(|| {
            let objects = &self.shared.objects;
            let object = self.command_buffer(buffer)?;
            let render_pass = objects.render_passes.get(info.render_pass)?;
            let framebuffer = objects.framebuffers.get(info.framebuffer)?;
            if framebuffer.render_pass.attachments.len() != render_pass.attachments.len() {
                return Err(VulkanError::contract(
                    "framebuffer was created against an incompatible render pass",
                ));
            }
            render_pass.check_clear_values(info.clear_values)?;
            object.begin_render_pass(
                Command::BeginRenderPass {
                    render_pass: info.render_pass,
                    framebuffer: info.framebuffer,
                    area: info.render_area,
                    clear_values: info.clear_values.to_vec(),
                },
                render_pass.subpasses.len() as u32,
            )
        })
    }

    /// `vkCmdNextSubpass`
    pub fn cmd_next_subpass(&self, buffer: vk::CommandBuffer, _contents: vk::SubpassContents) -> VulkanResult<()> {
        self.record(buffer, Command::NextSubpass)
    }

    /// `vkCmdEndRenderPass`
    pub fn cmd_end_render_pass(&self, buffer: vk::CommandBuffer) -> VulkanResult<()> {
        self.record(buffer, Command::EndRenderPass)
    }

    /// `vkCmdBindPipeline`
    pub fn cmd_bind_pipeline(
        &self,
        buffer: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        pipeline: vk::Pipeline,
    ) -> VulkanResult<()> {
        self.guard(|| {
            let object = self.shared.objects.pipelines.get(pipeline)?;
            if object.bind_point() != bind_point {
                return Err(VulkanError::contract(format!(
                    "pipeline binds at {:?}, not {bind_point:?}",
                    object.bind_point()
                )));
            }
            self.command_buffer(buffer)?
                .record(Command::BindPipeline { bind_point, pipeline })
        })
    }

    /// `vkCmdBindVertexBuffers`
    pub fn cmd_bind_vertex_buffers(
        &self,
        buffer: vk::CommandBuffer,
        first_binding: u32,
        buffers: &[vk::Buffer],
        offsets: &[vk::DeviceSize],
    ) -> VulkanResult<()> {
        self.guard(|| {
            if buffers.len() != offsets.len() {
                return Err(VulkanError::contract(format!(
                    "{} vertex buffers with {} offsets",
                    buffers.len(),
                    offsets.len()
                )));
            }
            for (vertex_buffer, offset) in buffers.iter().zip(offsets) {
                let object = self.buffer_object(*vertex_buffer)?;
                if *offset >= object.size {
                    return Err(VulkanError::contract(format!(
                        "vertex buffer offset {offset} is past the end of the buffer"
                    )));
                }
            }
            self.command_buffer(buffer)?.record(Command::BindVertexBuffers {
                first: first_binding,
                buffers: buffers.iter().copied().zip(offsets.iter().copied()).collect(),
            })
        })
    }

    /// `vkCmdBindIndexBuffer`
    pub fn cmd_bind_index_buffer(
        &self,
        buffer: vk::CommandBuffer,
        index_buffer: vk::Buffer,
        offset: vk::DeviceSize,
        index_type: vk::IndexType,
    ) -> VulkanResult<()> {
        self.guard(|| {
            let index_type = index_type.into_gl();
            if offset % index_type.size() != 0 {
                return Err(VulkanError::contract(format!(
                    "index buffer offset {offset} is not aligned to {index_type:?}"
                )));
            }
            self.buffer_object(index_buffer)?;
            self.command_buffer(buffer)?.record(Command::BindIndexBuffer {
                buffer: index_buffer,
                offset,
                index_type,
            })
        })
    }

    /// `vkCmdBindDescriptorSets`
    pub fn cmd_bind_descriptor_sets(
        &self,
        buffer: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        first_set: u32,
        sets: &[vk::DescriptorSet],
        dynamic_offsets: &[u32],
    ) -> VulkanResult<()> {
        self.guard(|| {
            let objects = &self.shared.objects;
            let layout_object = objects.pipeline_layouts.get(layout)?;
            let end = first_set as usize + sets.len();
            if end > layout_object.set_layouts.len() {
                return Err(VulkanError::contract(format!(
                    "binding sets {first_set}..{end} on a layout with {} sets",
                    layout_object.set_layouts.len()
                )));
            }

            let mut expected_offsets = 0;
            let mut actions = Vec::new();
            for set in sets {
                let set_object = objects.descriptor_sets.get(*set)?;
                expected_offsets += set_object.layout.dynamic_count() as usize;
                for bound in set_object.bound() {
                    let writes_buffer = matches!(
                        bound.descriptor_type,
                        vk::DescriptorType::STORAGE_BUFFER | vk::DescriptorType::STORAGE_BUFFER_DYNAMIC
                    );
                    if let (true, Descriptor::Buffer { buffer, .. }) = (writes_buffer, bound.descriptor) {
                        if let Ok(object) = objects.buffers.get(buffer) {
                            actions.push(mark_written(object));
                        }
                    }
                }
            }
            if dynamic_offsets.len() != expected_offsets {
                return Err(VulkanError::contract(format!(
                    "sets need {expected_offsets} dynamic offsets, {} given",
                    dynamic_offsets.len()
                )));
            }

            self.command_buffer(buffer)?.record_with(
                Command::BindDescriptorSets {
                    bind_point,
                    layout,
                    first_set,
                    sets: sets.to_vec(),
                    dynamic_offsets: dynamic_offsets.to_vec(),
                },
                actions,
            )
        })
    }

    /// `vkCmdPushConstants`
    pub fn cmd_push_constants(
        &self,
        buffer: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        stage_flags: vk::ShaderStageFlags,
        offset: u32,
        data: &[u8],
    ) -> VulkanResult<()> {
        self.guard(|| {
            let layout = self.shared.objects.pipeline_layouts.get(layout)?;
            check_aligned("push constant offset", u64::from(offset))?;
            check_aligned("push constant size", data.len() as u64)?;
            if u64::from(offset) + data.len() as u64 > u64::from(layout.push_constant_size) {
                return Err(VulkanError::contract(format!(
                    "push constants {offset}+{} exceed the layout's {} bytes",
                    data.len(),
                    layout.push_constant_size
                )));
            }
            if !layout.push_constant_stages.contains(stage_flags) {
                return Err(VulkanError::contract(format!(
                    "stages {stage_flags:?} have no push constant range"
                )));
            }
            self.command_buffer(buffer)?.record(Command::PushConstants {
                offset,
                data: data.to_vec(),
            })
        })
    }

    /// `vkCmdSetViewport`
    pub fn cmd_set_viewport(
        &self,
        buffer: vk::CommandBuffer,
        first_viewport: u32,
        viewports: &[vk::Viewport],
    ) -> VulkanResult<()> {
        self.guard(|| {
            self.check_viewport_slots("viewport", first_viewport, viewports.len())?;
            self.command_buffer(buffer)?.record(Command::SetViewport {
                first: first_viewport,
                viewports: viewports.iter().copied().map(Viewport::from).collect(),
            })
        })
    }

    /// `vkCmdSetScissor`
    pub fn cmd_set_scissor(
        &self,
        buffer: vk::CommandBuffer,
        first_scissor: u32,
        scissors: &[vk::Rect2D],
    ) -> VulkanResult<()> {
        self.guard(|| {
            self.check_viewport_slots("scissor", first_scissor, scissors.len())?;
            for rect in scissors {
                check_scissor(rect)?;
            }
            self.command_buffer(buffer)?.record(Command::SetScissor {
                first: first_scissor,
                scissors: scissors.iter().copied().map(Scissor::from).collect(),
            })
        })
    }

    /// `vkCmdSetLineWidth`
    pub fn cmd_set_line_width(&self, buffer: vk::CommandBuffer, line_width: f32) -> VulkanResult<()> {
        self.record(buffer, Command::SetLineWidth(line_width))
    }

    /// `vkCmdSetDepthBias`
    pub fn cmd_set_depth_bias(
        &self,
        buffer: vk::CommandBuffer,
        constant_factor: f32,
        clamp: f32,
        slope_factor: f32,
    ) -> VulkanResult<()> {
        self.record(
            buffer,
            Command::SetDepthBias {
                constant: constant_factor,
                clamp,
                slope: slope_factor,
            },
        )
    }

    /// `vkCmdSetBlendConstants`
    pub fn cmd_set_blend_constants(&self, buffer: vk::CommandBuffer, constants: [f32; 4]) -> VulkanResult<()> {
        self.record(buffer, Command::SetBlendConstants(constants))
    }

    /// `vkCmdSetDepthBounds`
    pub fn cmd_set_depth_bounds(&self, buffer: vk::CommandBuffer, min: f32, max: f32) -> VulkanResult<()> {
        self.record(buffer, Command::SetDepthBounds { min, max })
    }

    /// `vkCmdSetStencilCompareMask`
    pub fn cmd_set_stencil_compare_mask(
        &self,
        buffer: vk::CommandBuffer,
        face: vk::StencilFaceFlags,
        mask: u32,
    ) -> VulkanResult<()> {
        self.record(buffer, Command::SetStencilCompareMask(face, mask))
    }

    /// `vkCmdSetStencilWriteMask`
    pub fn cmd_set_stencil_write_mask(
        &self,
        buffer: vk::CommandBuffer,
        face: vk::StencilFaceFlags,
        mask: u32,
    ) -> VulkanResult<()> {
        self.record(buffer, Command::SetStencilWriteMask(face, mask))
    }

    /// `vkCmdSetStencilReference`
    pub fn cmd_set_stencil_reference(
        &self,
        buffer: vk::CommandBuffer,
        face: vk::StencilFaceFlags,
        reference: u32,
    ) -> VulkanResult<()> {
        self.record(buffer, Command::SetStencilReference(face, reference))
    }

    /// `vkCmdDraw`
    pub fn cmd_draw(
        &self,
        buffer: vk::CommandBuffer,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) -> VulkanResult<()> {
        self.record(
            buffer,
            Command::Draw {
                vertex_count,
                instance_count,
                first_vertex,
                first_instance,
            },
        )
    }

    /// `vkCmdDrawIndexed`
    pub fn cmd_draw_indexed(
        &self,
        buffer: vk::CommandBuffer,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) -> VulkanResult<()> {
        self.record(
            buffer,
            Command::DrawIndexed {
                index_count,
                instance_count,
                first_index,
                vertex_offset,
                first_instance,
            },
        )
    }

    fn record_indirect_draw(
        &self,
        buffer: vk::CommandBuffer,
        indirect: vk::Buffer,
        offset: vk::DeviceSize,
        draw_count: u32,
        stride: u32,
        indexed: bool,
    ) -> VulkanResult<()> {
        self.guard(|| {
            let record_size: u32 = if indexed { 20 } else { 16 };
            check_aligned("indirect offset", offset)?;
            if draw_count > 1 && (stride < record_size || stride % 4 != 0) {
                return Err(VulkanError::contract(format!(
                    "indirect stride {stride} is below {record_size} or unaligned"
                )));
            }
            if draw_count > 0 {
                let span = u64::from(stride) * u64::from(draw_count - 1) + u64::from(record_size);
                self.buffer_object(indirect)?.range(offset, span)?;
            }
            self.command_buffer(buffer)?.record(Command::DrawIndirect {
                buffer: indirect,
                offset,
                draw_count,
                stride,
                indexed,
            })
        })
    }

    /// `vkCmdDrawIndirect`
    pub fn cmd_draw_indirect(
        &self,
        buffer: vk::CommandBuffer,
        indirect: vk::Buffer,
        offset: vk::DeviceSize,
        draw_count: u32,
        stride: u32,
    ) -> VulkanResult<()> {
        self.record_indirect_draw(buffer, indirect, offset, draw_count, stride, false)
    }

    /// `vkCmdDrawIndexedIndirect`
    pub fn cmd_draw_indexed_indirect(
        &self,
        buffer: vk::CommandBuffer,
        indirect: vk::Buffer,
        offset: vk::DeviceSize,
        draw_count: u32,
        stride: u32,
    ) -> VulkanResult<()> {
        self.record_indirect_draw(buffer, indirect, offset, draw_count, stride, true)
    }

    /// `vkCmdDispatch`
    pub fn cmd_dispatch(&self, buffer: vk::CommandBuffer, x: u32, y: u32, z: u32) -> VulkanResult<()> {
        self.record(buffer, Command::Dispatch { x, y, z })
    }

    /// `vkCmdDispatchIndirect`
    pub fn cmd_dispatch_indirect(
        &self,
        buffer: vk::CommandBuffer,
        indirect: vk::Buffer,
        offset: vk::DeviceSize,
    ) -> VulkanResult<()> {
        self.guard(|| {
            check_aligned("indirect offset", offset)?;
            self.buffer_object(indirect)?.range(offset, 12)?;
            self.command_buffer(buffer)?.record(Command::DispatchIndirect {
                buffer: indirect,
                offset,
            })
        })
    }

    /// `vkCmdCopyBuffer`
    pub fn cmd_copy_buffer(
        &self,
        buffer: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Buffer,
        regions: &[vk::BufferCopy],
    ) -> VulkanResult<()> {
        self.guard(|| {
            if regions.is_empty() {
                return Err(VulkanError::contract("vkCmdCopyBuffer needs at least one region"));
            }
            let source = self.buffer_object(src)?;
            let target = self.buffer_object(dst)?;
            for region in regions {
                source.range(region.src_offset, region.size)?;
                target.range(region.dst_offset, region.size)?;
            }
            self.command_buffer(buffer)?.record_with(
                Command::CopyBuffer {
                    src,
                    dst,
                    regions: regions.to_vec(),
                },
                vec![mark_written(target)],
            )
        })
    }

    /// `vkCmdCopyBufferToImage`
    pub fn cmd_copy_buffer_to_image(
        &self,
        buffer: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Image,
        _layout: vk::ImageLayout,
        regions: &[vk::BufferImageCopy],
    ) -> VulkanResult<()> {
        self.guard(|| {
            self.buffer_object(src)?;
            let image = self.shared.objects.images.get(dst)?;
            image.require_texture()?;
            for region in regions {
                image.check_layers(&region.image_subresource)?;
            }
            self.command_buffer(buffer)?.record(Command::CopyBufferToImage {
                buffer: src,
                image: dst,
                regions: regions.to_vec(),
            })
        })
    }

    /// `vkCmdCopyImageToBuffer`
    pub fn cmd_copy_image_to_buffer(
        &self,
        buffer: vk::CommandBuffer,
        src: vk::Image,
        _layout: vk::ImageLayout,
        dst: vk::Buffer,
        regions: &[vk::BufferImageCopy],
    ) -> VulkanResult<()> {
        self.guard(|| {
            let image = self.shared.objects.images.get(src)?;
            image.require_texture()?;
            for region in regions {
                image.check_layers(&region.image_subresource)?;
            }
            let target = self.buffer_object(dst)?;
            self.command_buffer(buffer)?.record_with(
                Command::CopyImageToBuffer {
                    image: src,
                    buffer: dst,
                    regions: regions.to_vec(),
                },
                vec![mark_written(target)],
            )
        })
    }

    /// `vkCmdCopyImage`
    pub fn cmd_copy_image(
        &self,
        buffer: vk::CommandBuffer,
        src: vk::Image,
        dst: vk::Image,
        regions: &[vk::ImageCopy],
    ) -> VulkanResult<()> {
        self.guard(|| {
            let images = &self.shared.objects.images;
            let (source, target) = (images.get(src)?, images.get(dst)?);
            if source.class() != target.class() {
                return Err(VulkanError::contract("vkCmdCopyImage between incompatible formats"));
            }
            for region in regions {
                source.check_layers(&region.src_subresource)?;
                target.check_layers(&region.dst_subresource)?;
            }
            self.command_buffer(buffer)?.record(Command::CopyImage {
                src,
                dst,
                regions: regions.to_vec(),
            })
        })
    }

    /// `vkCmdBlitImage`
    pub fn cmd_blit_image(
        &self,
        buffer: vk::CommandBuffer,
        src: vk::Image,
        dst: vk::Image,
        regions: &[vk::ImageBlit],
        filter: vk::Filter,
    ) -> VulkanResult<()> {
        self.guard(|| {
            let images = &self.shared.objects.images;
            let source = images.get(src)?;
            if filter == vk::Filter::LINEAR && !source.class().is_color() {
                return Err(VulkanError::contract("depth/stencil blits must use NEAREST"));
            }
            let target = images.get(dst)?;
            for region in regions {
                source.check_layers(&region.src_subresource)?;
                target.check_layers(&region.dst_subresource)?;
            }
            self.command_buffer(buffer)?.record(Command::BlitImage {
                src,
                dst,
                regions: regions.to_vec(),
                filter: filter.into_gl(),
            })
        })
    }

    /// `vkCmdUpdateBuffer`
    pub fn cmd_update_buffer(
        &self,
        buffer: vk::CommandBuffer,
        dst: vk::Buffer,
        offset: vk::DeviceSize,
        data: &[u8],
    ) -> VulkanResult<()> {
        self.guard(|| {
            if data.is_empty() || data.len() > MAX_UPDATE_SIZE {
                return Err(VulkanError::contract(format!(
                    "vkCmdUpdateBuffer takes 1..={MAX_UPDATE_SIZE} bytes, {} given",
                    data.len()
                )));
            }
            check_aligned("update offset", offset)?;
            check_aligned("update size", data.len() as u64)?;
            let target = self.buffer_object(dst)?;
            target.range(offset, data.len() as u64)?;
            self.command_buffer(buffer)?.record_with(
                Command::UpdateBuffer {
                    buffer: dst,
                    offset,
                    data: data.to_vec(),
                },
                vec![mark_written(target)],
            )
        })
    }

    /// `vkCmdFillBuffer`; `vk::WHOLE_SIZE` fills to the last whole word
    pub fn cmd_fill_buffer(
        &self,
        buffer: vk::CommandBuffer,
        dst: vk::Buffer,
        offset: vk::DeviceSize,
        size: vk::DeviceSize,
        data: u32,
    ) -> VulkanResult<()> {
        self.guard(|| {
            check_aligned("fill offset", offset)?;
            let target = self.buffer_object(dst)?;
            let size = if size == vk::WHOLE_SIZE {
                target.range(offset, size)? & !3
            } else {
                check_aligned("fill size", size)?;
                target.range(offset, size)?
            };
            self.command_buffer(buffer)?.record_with(
                Command::FillBuffer {
                    buffer: dst,
                    offset,
                    size,
                    data,
                },
                vec![mark_written(target)],
            )
        })
    }

    /// `vkCmdClearColorImage`
    pub fn cmd_clear_color_image(
        &self,
        buffer: vk::CommandBuffer,
        image: vk::Image,
        _layout: vk::ImageLayout,
        color: ClearColorValue,
        ranges: &[vk::ImageSubresourceRange],
    ) -> VulkanResult<()> {
        self.guard(|| {
            let target = self.shared.objects.images.get(image)?;
            if !target.class().is_color() {
                return Err(VulkanError::contract("vkCmdClearColorImage on a depth/stencil image"));
            }
            check_ranges(&target, ranges)?;
            self.command_buffer(buffer)?.record(Command::ClearColorImage {
                image,
                color,
                ranges: ranges.to_vec(),
            })
        })
    }

    /// `vkCmdClearDepthStencilImage`
    pub fn cmd_clear_depth_stencil_image(
        &self,
        buffer: vk::CommandBuffer,
        image: vk::Image,
        _layout: vk::ImageLayout,
        depth: f32,
        stencil: u32,
        ranges: &[vk::ImageSubresourceRange],
    ) -> VulkanResult<()> {
        self.guard(|| {
            let target = self.shared.objects.images.get(image)?;
            if target.class().is_color() {
                return Err(VulkanError::contract(
                    "vkCmdClearDepthStencilImage on a colour image",
                ));
            }
            check_ranges(&target, ranges)?;
            self.command_buffer(buffer)?.record(Command::ClearDepthStencilImage {
                image,
                depth,
                stencil,
                ranges: ranges.to_vec(),
            })
        })
    }

    /// `vkCmdClearAttachments`
    pub fn cmd_clear_attachments(
        &self,
        buffer: vk::CommandBuffer,
        attachments: &[ClearAttachment],
        rects: &[vk::ClearRect],
    ) -> VulkanResult<()> {
        self.guard(|| {
            if rects.is_empty() {
                return Err(VulkanError::contract("vkCmdClearAttachments needs at least one rect"));
            }
            self.command_buffer(buffer)?.record(Command::ClearAttachments {
                attachments: attachments.to_vec(),
                rects: rects.to_vec(),
            })
        })
    }

    /// `vkCmdPipelineBarrier`; the destination access masks pick the barrier bits
    #[allow(clippy::too_many_arguments)]
    pub fn cmd_pipeline_barrier(
        &self,
        buffer: vk::CommandBuffer,
        _src_stage: vk::PipelineStageFlags,
        _dst_stage: vk::PipelineStageFlags,
        _dependency_flags: vk::DependencyFlags,
        memory_barriers: &[MemoryBarrier],
        buffer_barriers: &[BufferMemoryBarrier],
        image_barriers: &[ImageMemoryBarrier],
    ) -> VulkanResult<()> {
        self.record(
            buffer,
            Command::PipelineBarrier(barrier_bits(memory_barriers, buffer_barriers, image_barriers)),
        )
    }

    fn record_event(&self, buffer: vk::CommandBuffer, event: vk::Event, signaled: bool) -> VulkanResult<()> {
        self.guard(|| {
            self.shared.objects.events.get(event)?;
            self.command_buffer(buffer)?
                .record(Command::SetEvent { event, signaled })
        })
    }

    /// `vkCmdSetEvent`
    pub fn cmd_set_event(
        &self,
        buffer: vk::CommandBuffer,
        event: vk::Event,
        _stage_mask: vk::PipelineStageFlags,
    ) -> VulkanResult<()> {
        self.record_event(buffer, event, true)
    }

    /// `vkCmdResetEvent`
    pub fn cmd_reset_event(
        &self,
        buffer: vk::CommandBuffer,
        event: vk::Event,
        _stage_mask: vk::PipelineStageFlags,
    ) -> VulkanResult<()> {
        self.record_event(buffer, event, false)
    }

    /// `vkCmdWaitEvents`. Events set earlier in the same submission are already
    /// signaled at replay, so the wait reduces to a barrier.
    #[allow(clippy::too_many_arguments)]
    pub fn cmd_wait_events(
        &self,
        buffer: vk::CommandBuffer,
        events: &[vk::Event],
        _src_stage: vk::PipelineStageFlags,
        _dst_stage: vk::PipelineStageFlags,
        memory_barriers: &[MemoryBarrier],
        buffer_barriers: &[BufferMemoryBarrier],
        image_barriers: &[ImageMemoryBarrier],
    ) -> VulkanResult<()> {
        self.guard(|| {
            for event in events {
                self.shared.objects.events.get(*event)?;
            }
            self.command_buffer(buffer)?.record(Command::WaitEvents {
                events: events.to_vec(),
                barrier: barrier_bits(memory_barriers, buffer_barriers, image_barriers),
            })
        })
    }

    /// `vkCmdExecuteCommands`
    pub fn cmd_execute_commands(
        &self,
        buffer: vk::CommandBuffer,
        secondaries: &[vk::CommandBuffer],
    ) -> VulkanResult<()> {
        self.guard(|| {
            let secondaries = secondaries
                .iter()
                .map(|secondary| self.command_buffer(*secondary))
                .collect::<VulkanResult<Vec<_>>>()?;
            self.command_buffer(buffer)?.execute(&secondaries)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_barrier_bits_union_destination_access() {
        let bits = barrier_bits(
            &[MemoryBarrier {
                src_access_mask: vk::AccessFlags::SHADER_WRITE,
                dst_access_mask: vk::AccessFlags::VERTEX_ATTRIBUTE_READ,
            }],
            &[],
            &[],
        );
        assert_eq!(bits, vk::AccessFlags::VERTEX_ATTRIBUTE_READ.into_gl());
        assert!(barrier_bits(&[], &[], &[]).is_empty());
    }

    #[test]
    fn test_scissor_edges_must_fit() {
        let rect = |x, y, width, height| vk::Rect2D {
            offset: vk::Offset2D { x, y },
            extent: vk::Extent2D { width, height },
        };
        assert!(check_scissor(&rect(0, 0, 64, 64)).is_ok());
        assert!(check_scissor(&rect(-1, 0, 64, 64)).is_err());
        assert!(check_scissor(&rect(0, i32::MAX, 0, 1)).is_err());
        assert!(check_scissor(&rect(0, 0, u32::MAX, 1)).is_err());
    }

    #[test]
    fn test_alignment_check() {
        assert!(check_aligned("offset", 8).is_ok());
        assert!(check_aligned("offset", 6).unwrap_err().is_contract_violation());
    }
}
