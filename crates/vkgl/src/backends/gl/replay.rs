//! Command replay
//!
//! A [`Replayer`] walks one command buffer's records in order with the
//! context lock held. It resolves every handle again, so records that outlived
//! their objects fail with a resource error instead of using freed driver
//! objects. Dynamic bind state (vertex buffers, index buffer, push constants,
//! open render pass) lives here and starts empty for every command buffer.

use std::collections::BTreeMap;
use std::sync::Arc;

use ash::vk;

use crate::backends::gl::commands::Command;
use crate::backends::gl::driver::{
    AttachmentPoint, ClearMask, Filter, FramebufferName, FramebufferTarget, IndexType,
    IndexedBufferTarget, TextureRegion, Topology, VertexAttrib,
};
use crate::backends::gl::format::FormatClass;
use crate::backends::gl::framebuffer::{color_for, FramebufferObject};
use crate::backends::gl::geometry::{GeometryKey, IndexBinding, VertexBinding};
use crate::backends::gl::pipeline::{GraphicsPipeline, PipelineObject};
use crate::backends::gl::state::Scissor;
use crate::backends::gl::GlState;
use crate::backends::Capabilities;
use crate::core::descriptor::{is_dynamic, Descriptor, PipelineLayoutObject};
use crate::core::device::DeviceObjects;
use crate::core::error::{VulkanError, VulkanResult};
use crate::core::handles::{not_found, BufferKey, HandleKey};
use crate::core::resource::ImageObject;
use crate::core::shader::ResourceKind;

/// Render pass instance open during replay
struct OpenPass {
    framebuffer: Arc<FramebufferObject>,
    subpass: usize,
}

/// Replays the records of one command buffer
pub struct Replayer<'a> {
    state: &'a mut GlState,
    objects: &'a DeviceObjects,
    graphics: Option<Arc<PipelineObject>>,
    compute: Option<Arc<PipelineObject>>,
    vertex_buffers: BTreeMap<u32, (vk::Buffer, u64)>,
    index: Option<(vk::Buffer, u64, IndexType)>,
    push_constants: Vec<u8>,
    push_dirty: bool,
    pass: Option<OpenPass>,
}

impl<'a> Replayer<'a> {
    /// Start replaying one command buffer
    pub fn new(state: &'a mut GlState, objects: &'a DeviceObjects) -> Self {
        state.stack.reset_frames();
        Self {
            state,
            objects,
            graphics: None,
            compute: None,
            vertex_buffers: BTreeMap::new(),
            index: None,
            push_constants: Vec::new(),
            push_dirty: false,
            pass: None,
        }
    }

    /// Replay a command list in order, stopping at the first failure
    pub fn run(&mut self, commands: &[Command]) -> VulkanResult<()> {
        for command in commands {
            self.replay(command)?;
        }
        Ok(())
    }

    fn replay(&mut self, command: &Command) -> VulkanResult<()> {
        match command {
            Command::BeginRenderPass {
                framebuffer,
                area,
                clear_values,
                ..
            } => {
                let framebuffer = self.objects.framebuffers.get(*framebuffer)?;
                framebuffer.begin(self.state, *area, clear_values)?;
                self.pass = Some(OpenPass {
                    framebuffer,
                    subpass: 0,
                });
            }
            Command::NextSubpass => {
                let pass = self.open_pass()?;
                pass.framebuffer.next_subpass(self.state, pass.subpass)?;
                if let Some(pass) = self.pass.as_mut() {
                    pass.subpass += 1;
                }
            }
            Command::EndRenderPass => {
                let pass = self
                    .pass
                    .take()
                    .ok_or_else(|| VulkanError::contract("render pass end without begin"))?;
                pass.framebuffer.end(self.state, pass.subpass);
            }
            Command::BindPipeline { bind_point, pipeline } => self.bind_pipeline(*bind_point, *pipeline)?,
            Command::BindVertexBuffers { first, buffers } => {
                for (slot, binding) in (*first..).zip(buffers) {
                    self.vertex_buffers.insert(slot, *binding);
                }
            }
            Command::BindIndexBuffer {
                buffer,
                offset,
                index_type,
            } => self.index = Some((*buffer, *offset, *index_type)),
            Command::BindDescriptorSets {
                layout,
                first_set,
                sets,
                dynamic_offsets,
                ..
            } => self.bind_descriptor_sets(*layout, *first_set, sets, dynamic_offsets)?,
            Command::PushConstants { offset, data } => {
                let start = *offset as usize;
                let end = start + data.len();
                if self.push_constants.len() < end {
                    self.push_constants.resize(end, 0);
                }
                self.push_constants[start..end].copy_from_slice(data);
                self.push_dirty = true;
            }
            Command::SetViewport { first, viewports } => {
                let state = &mut *self.state;
                state.stack.set_viewports(state.driver.as_mut(), *first, viewports);
            }
            Command::SetScissor { first, scissors } => {
                let state = &mut *self.state;
                state.stack.set_scissors(state.driver.as_mut(), *first, scissors);
            }
            Command::SetLineWidth(width) => {
                let state = &mut *self.state;
                state.stack.set_line_width(state.driver.as_mut(), *width);
            }
            Command::SetDepthBias {
                constant,
                clamp,
                slope,
            } => {
                let state = &mut *self.state;
                state
                    .stack
                    .set_depth_bias(state.driver.as_mut(), *constant, *clamp, *slope);
            }
            Command::SetBlendConstants(constants) => {
                let state = &mut *self.state;
                state
                    .stack
                    .set_blend_constants(state.driver.as_mut(), *constants);
            }
            Command::SetDepthBounds { min, max } => self.state.stack.set_depth_bounds(*min, *max),
            Command::SetStencilCompareMask(faces, value) => {
                let state = &mut *self.state;
                state
                    .stack
                    .set_stencil_compare_mask(state.driver.as_mut(), *faces, *value);
            }
            Command::SetStencilWriteMask(faces, value) => {
                let state = &mut *self.state;
                state
                    .stack
                    .set_stencil_write_mask(state.driver.as_mut(), *faces, *value);
            }
            Command::SetStencilReference(faces, value) => {
                let state = &mut *self.state;
                state
                    .stack
                    .set_stencil_reference(state.driver.as_mut(), *faces, *value);
            }
            Command::Draw {
                vertex_count,
                instance_count,
                first_vertex,
                first_instance,
            } => {
                let topology = self.prepare_draw(false)?;
                let first_instance = self.base_instance(*first_instance);
                self.state.driver.draw_arrays(
                    topology,
                    *first_vertex,
                    *vertex_count,
                    *instance_count,
                    first_instance,
                );
            }
            Command::DrawIndexed {
                index_count,
                instance_count,
                first_index,
                vertex_offset,
                first_instance,
            } => {
                let topology = self.prepare_draw(true)?;
                let (buffer, offset, index_type) = self.index_binding()?;
                let (_, base) = self.objects.buffers.get(buffer)?.locate(offset)?;
                let first_instance = self.base_instance(*first_instance);
                self.state.driver.draw_elements(
                    topology,
                    *index_count,
                    index_type,
                    base + u64::from(*first_index) * index_type.size(),
                    *instance_count,
                    *vertex_offset,
                    first_instance,
                );
            }
            Command::DrawIndirect {
                buffer,
                offset,
                draw_count,
                stride,
                indexed,
            } => {
                if !self.state.caps.contains(Capabilities::DRAW_INDIRECT) {
                    return Err(VulkanError::FeatureNotPresent("indirect draws".to_string()));
                }
                let topology = self.prepare_draw(*indexed)?;
                let (gl_buffer, base) = self.objects.buffers.get(*buffer)?.locate(*offset)?;
                if *indexed {
                    let (_, _, index_type) = self.index_binding()?;
                    self.state.driver.draw_elements_indirect(
                        topology,
                        index_type,
                        gl_buffer,
                        base,
                        *draw_count,
                        *stride,
                    );
                } else {
                    self.state.driver.draw_arrays_indirect(
                        topology,
                        gl_buffer,
                        base,
                        *draw_count,
                        *stride,
                    );
                }
            }
            Command::Dispatch { x, y, z } => {
                self.prepare_dispatch()?;
                self.state.driver.dispatch_compute(*x, *y, *z);
            }
            Command::DispatchIndirect { buffer, offset } => {
                self.prepare_dispatch()?;
                let (gl_buffer, base) = self.objects.buffers.get(*buffer)?.locate(*offset)?;
                self.state.driver.dispatch_compute_indirect(gl_buffer, base);
            }
            Command::CopyBuffer { src, dst, regions } => {
                let src = self.objects.buffers.get(*src)?;
                let dst = self.objects.buffers.get(*dst)?;
                for region in regions {
                    src.range(region.src_offset, region.size)?;
                    dst.range(region.dst_offset, region.size)?;
                    let (src_buffer, src_offset) = src.locate(region.src_offset)?;
                    let (dst_buffer, dst_offset) = dst.locate(region.dst_offset)?;
                    self.state.driver.copy_buffer_sub_data(
                        src_buffer,
                        dst_buffer,
                        src_offset,
                        dst_offset,
                        region.size,
                    );
                }
            }
            Command::CopyBufferToImage {
                buffer,
                image,
                regions,
            } => {
                let buffer = self.objects.buffers.get(*buffer)?;
                let image = self.objects.images.get(*image)?;
                let texture = image.require_texture()?;
                for region in regions {
                    let (gl_buffer, offset) = buffer.locate(region.buffer_offset)?;
                    self.state.driver.upload_texture(
                        texture,
                        image.target,
                        &buffer_region(&image, region),
                        &image.format,
                        gl_buffer,
                        offset,
                    );
                }
            }
            Command::CopyImageToBuffer {
                image,
                buffer,
                regions,
            } => {
                let buffer = self.objects.buffers.get(*buffer)?;
                let image = self.objects.images.get(*image)?;
                let texture = image.require_texture()?;
                for region in regions {
                    let (gl_buffer, offset) = buffer.locate(region.buffer_offset)?;
                    self.state.driver.download_texture(
                        texture,
                        image.target,
                        &buffer_region(&image, region),
                        &image.format,
                        gl_buffer,
                        offset,
                    );
                }
            }
            Command::CopyImage { src, dst, regions } => {
                let src = self.objects.images.get(*src)?;
                let dst = self.objects.images.get(*dst)?;
                for region in regions {
                    self.copy_image(&src, &dst, region)?;
                }
            }
            Command::BlitImage {
                src,
                dst,
                regions,
                filter,
            } => {
                let src = self.objects.images.get(*src)?;
                let dst = self.objects.images.get(*dst)?;
                for region in regions {
                    let read = (
                        region.src_subresource.mip_level,
                        region.src_subresource.base_array_layer,
                    );
                    let draw = (
                        region.dst_subresource.mip_level,
                        region.dst_subresource.base_array_layer,
                    );
                    self.blit(
                        &src,
                        &dst,
                        read,
                        draw,
                        offsets_rect(&region.src_offsets),
                        offsets_rect(&region.dst_offsets),
                        *filter,
                    )?;
                }
            }
            Command::UpdateBuffer {
                buffer,
                offset,
                data,
            } => {
                let buffer = self.objects.buffers.get(*buffer)?;
                buffer.range(*offset, data.len() as u64)?;
                let (gl_buffer, offset) = buffer.locate(*offset)?;
                self.state.driver.buffer_sub_data(gl_buffer, offset, data);
            }
            Command::FillBuffer {
                buffer,
                offset,
                size,
                data,
            } => {
                let buffer = self.objects.buffers.get(*buffer)?;
                let size = buffer.range(*offset, *size)? & !3;
                let (gl_buffer, offset) = buffer.locate(*offset)?;
                self.state
                    .driver
                    .clear_buffer_sub_data(gl_buffer, offset, size, *data);
            }
            Command::ClearColorImage {
                image,
                color,
                ranges,
            } => {
                let image = self.objects.images.get(*image)?;
                let FormatClass::Color(kind) = image.class() else {
                    return Err(VulkanError::contract("colour clear of a depth/stencil image"));
                };
                let value = color_for(kind, *color);
                self.clear_image(&image, ranges, AttachmentPoint::Color(0), |state| {
                    state.driver.clear_buffer_color(0, value);
                })?;
            }
            Command::ClearDepthStencilImage {
                image,
                depth,
                stencil,
                ranges,
            } => {
                let image = self.objects.images.get(*image)?;
                let point = match image.class() {
                    FormatClass::Color(_) => {
                        return Err(VulkanError::contract("depth clear of a colour image"))
                    }
                    FormatClass::Depth => AttachmentPoint::Depth,
                    FormatClass::Stencil => AttachmentPoint::Stencil,
                    FormatClass::DepthStencil => AttachmentPoint::DepthStencil,
                };
                let aspects = ranges
                    .iter()
                    .fold(vk::ImageAspectFlags::empty(), |acc, range| acc | range.aspect_mask);
                let depth = aspects
                    .contains(vk::ImageAspectFlags::DEPTH)
                    .then_some(*depth);
                let stencil = aspects
                    .contains(vk::ImageAspectFlags::STENCIL)
                    .then_some(*stencil);
                self.clear_image(&image, ranges, point, |state| {
                    state.driver.clear_buffer_depth_stencil(depth, stencil);
                })?;
            }
            Command::ClearAttachments { attachments, rects } => {
                let pass = self.open_pass()?;
                pass.framebuffer
                    .clear_attachments(self.state, pass.subpass, attachments, rects)?;
            }
            Command::PipelineBarrier(bits) => {
                if !bits.is_empty() {
                    self.state.driver.memory_barrier(*bits);
                }
            }
            Command::SetEvent { event, signaled } => {
                self.objects.events.get(*event)?.set(*signaled);
            }
            Command::WaitEvents { events, barrier } => {
                for event in events {
                    if self.objects.events.get(*event)?.status() != vk::Result::EVENT_SET {
                        log::debug!("Wait on unset event {event:?} proceeds immediately");
                    }
                }
                if !barrier.is_empty() {
                    self.state.driver.memory_barrier(*barrier);
                }
            }
            Command::ExecuteCommands(lists) => {
                for list in lists {
                    self.run(list)?;
                }
            }
        }
        Ok(())
    }

    fn open_pass(&self) -> VulkanResult<OpenPass> {
        self.pass
            .as_ref()
            .map(|pass| OpenPass {
                framebuffer: Arc::clone(&pass.framebuffer),
                subpass: pass.subpass,
            })
            .ok_or_else(|| VulkanError::contract("command needs an open render pass"))
    }

    fn bind_pipeline(&mut self, bind_point: vk::PipelineBindPoint, handle: vk::Pipeline) -> VulkanResult<()> {
        let pipeline = self.objects.pipelines.get(handle)?;
        if pipeline.bind_point() != bind_point {
            return Err(VulkanError::contract(format!(
                "pipeline bound at {bind_point:?} was created for {:?}",
                pipeline.bind_point()
            )));
        }
        if let PipelineObject::Graphics(graphics) = pipeline.as_ref() {
            let state = &mut *self.state;
            let diff = state.stack.bind(state.driver.as_mut(), &graphics.snapshot);
            state.stats.pipeline_binds += 1;
            state.stats.last_bind_calls = diff.calls;
            state.stats.total_bind_calls += diff.calls;
            state.use_program(Some(graphics.program));
            log::debug!("Bound pipeline {handle:?} with {} state calls", diff.calls);
            self.graphics = Some(pipeline);
        } else {
            self.compute = Some(pipeline);
        }
        self.push_dirty = true;
        Ok(())
    }

    fn bind_descriptor_sets(
        &mut self,
        layout: vk::PipelineLayout,
        first_set: u32,
        sets: &[vk::DescriptorSet],
        dynamic_offsets: &[u32],
    ) -> VulkanResult<()> {
        let layout = self.objects.pipeline_layouts.get(layout)?;
        let mut offsets = dynamic_offsets.iter().copied();
        for (index, handle) in (first_set..).zip(sets) {
            let set = self.objects.descriptor_sets.get(*handle)?;
            for bound in set.bound() {
                let dynamic = if is_dynamic(bound.descriptor_type) {
                    u64::from(offsets.next().ok_or_else(|| {
                        VulkanError::contract("fewer dynamic offsets than dynamic descriptors")
                    })?)
                } else {
                    0
                };
                let remap = layout.remap(index, bound.binding).ok_or_else(|| {
                    VulkanError::contract(format!(
                        "set {index} binding {} is not in the pipeline layout",
                        bound.binding
                    ))
                })?;
                self.bind_descriptor(remap.kind, remap.slot + bound.element, bound.descriptor, dynamic)?;
            }
        }
        Ok(())
    }

    fn bind_descriptor(
        &mut self,
        kind: ResourceKind,
        slot: u32,
        descriptor: Descriptor,
        dynamic_offset: u64,
    ) -> VulkanResult<()> {
        match (kind, descriptor) {
            (ResourceKind::UniformBuffer | ResourceKind::StorageBuffer, Descriptor::Buffer { buffer, offset, range }) => {
                let buffer = self.objects.buffers.get(buffer)?;
                let offset = offset + dynamic_offset;
                let size = buffer.range(offset, range)?;
                let (gl_buffer, absolute) = buffer.locate(offset)?;
                let target = if kind == ResourceKind::UniformBuffer {
                    IndexedBufferTarget::Uniform
                } else {
                    IndexedBufferTarget::ShaderStorage
                };
                self.state
                    .driver
                    .bind_buffer_range(target, slot, Some(gl_buffer), absolute, size);
            }
            (ResourceKind::SampledImage, Descriptor::Image { view, sampler, .. }) => {
                if view != vk::ImageView::null() {
                    let view = self.objects.image_views.get(view)?;
                    if view.is_backbuffer() {
                        return Err(VulkanError::contract("swapchain images cannot be sampled"));
                    }
                    self.state
                        .driver
                        .bind_texture_unit(slot, view.target, view.texture);
                }
                if sampler != vk::Sampler::null() {
                    let sampler = self.objects.samplers.get(sampler)?;
                    self.state.driver.bind_sampler(slot, Some(sampler.sampler));
                }
            }
            (ResourceKind::StorageImage, Descriptor::Image { view, .. }) => {
                let view = self.objects.image_views.get(view)?;
                if view.is_backbuffer() {
                    return Err(VulkanError::contract("swapchain images cannot be storage images"));
                }
                self.state
                    .driver
                    .bind_image_unit(slot, view.texture, view.base_level, &view.format);
            }
            (kind, descriptor) => {
                return Err(VulkanError::contract(format!(
                    "{descriptor:?} cannot be bound as {kind:?}"
                )))
            }
        }
        Ok(())
    }

    fn flush_push_constants(&mut self, layout: &PipelineLayoutObject) -> VulkanResult<()> {
        if !self.push_dirty {
            return Ok(());
        }
        self.push_dirty = false;
        let Some(binding) = layout.push_constant_binding else {
            return Ok(());
        };
        let size = u64::from(layout.push_constant_size);
        let mut data = self.push_constants.clone();
        data.resize(layout.push_constant_size as usize, 0);
        let buffer = self.state.push_constant_buffer(size)?;
        self.state.driver.buffer_sub_data(buffer, 0, &data);
        self.state.driver.bind_buffer_range(
            IndexedBufferTarget::Uniform,
            binding,
            Some(buffer),
            0,
            size,
        );
        Ok(())
    }

    fn base_instance(&self, first_instance: u32) -> u32 {
        if first_instance != 0 && !self.state.caps.contains(Capabilities::BASE_INSTANCE) {
            log::warn!("firstInstance {first_instance} ignored without base instance support");
            return 0;
        }
        first_instance
    }

    fn index_binding(&self) -> VulkanResult<(vk::Buffer, u64, IndexType)> {
        self.index
            .ok_or_else(|| VulkanError::contract("indexed draw without an index buffer"))
    }

    /// Make the bound graphics pipeline current for a draw, returning its topology
    fn prepare_draw(&mut self, indexed: bool) -> VulkanResult<Topology> {
        let pipeline = self
            .graphics
            .clone()
            .ok_or_else(|| VulkanError::contract("draw without a bound graphics pipeline"))?;
        let PipelineObject::Graphics(graphics) = pipeline.as_ref() else {
            return Err(VulkanError::contract("draw without a bound graphics pipeline"));
        };
        self.state.use_program(Some(graphics.program));
        self.flush_push_constants(&graphics.layout)?;
        self.bind_geometry(graphics, indexed)?;
        Ok(graphics.topology)
    }

    fn prepare_dispatch(&mut self) -> VulkanResult<()> {
        let pipeline = self
            .compute
            .clone()
            .ok_or_else(|| VulkanError::contract("dispatch without a bound compute pipeline"))?;
        self.state.use_program(Some(pipeline.program()));
        self.push_dirty = true;
        self.flush_push_constants(pipeline.layout())?;
        // the next draw re-uploads the graphics push constants
        self.push_dirty = true;
        Ok(())
    }

    fn bind_geometry(&mut self, graphics: &GraphicsPipeline, indexed: bool) -> VulkanResult<()> {
        let layout = &graphics.vertex_layout;
        let mut vertex = Vec::new();
        let mut handles = BTreeMap::new();
        for slot in layout.used_slots() {
            let (handle, offset) = *self.vertex_buffers.get(&slot).ok_or_else(|| {
                VulkanError::contract(format!("vertex buffer slot {slot} is not bound"))
            })?;
            let key = BufferKey::from_handle(handle).ok_or_else(|| not_found::<BufferKey>(handle))?;
            vertex.push(VertexBinding {
                slot,
                buffer: key,
                offset,
            });
            handles.insert(slot, handle);
        }
        let index = if indexed {
            let (handle, offset, index_type) = self.index_binding()?;
            let key = BufferKey::from_handle(handle).ok_or_else(|| not_found::<BufferKey>(handle))?;
            Some((
                handle,
                IndexBinding {
                    buffer: key,
                    offset,
                    index_type,
                },
            ))
        } else {
            None
        };
        let key = GeometryKey {
            layout: layout.id,
            vertex,
            index: index.map(|(_, binding)| binding),
        };

        if let Some(vertex_array) = self.state.geometry.lookup(&key) {
            self.state.bind_vertex_array(Some(vertex_array));
            return Ok(());
        }

        let mut slots = BTreeMap::new();
        for (slot, handle) in &handles {
            slots.insert(*slot, self.objects.buffers.get(*handle)?);
        }
        let index_buffer = index
            .map(|(handle, _)| self.objects.buffers.get(handle))
            .transpose()?;

        let vertex_array = self.state.driver.create_vertex_array()?;
        self.state.bind_vertex_array(Some(vertex_array));
        for attribute in &layout.attributes {
            let (Some(binding), Some(buffer)) = (
                layout.binding(attribute.binding),
                slots.get(&attribute.binding),
            ) else {
                continue;
            };
            let bind_offset = key
                .vertex
                .iter()
                .find(|bound| bound.slot == attribute.binding)
                .map_or(0, |bound| bound.offset);
            let (gl_buffer, base) = buffer.locate(bind_offset)?;
            self.state.driver.vertex_attrib(&VertexAttrib {
                location: attribute.location,
                buffer: gl_buffer,
                components: attribute.format.components,
                ty: attribute.format.ty,
                normalized: attribute.format.normalized,
                integer: attribute.format.integer,
                stride: binding.stride,
                offset: base + u64::from(attribute.offset),
                divisor: u32::from(binding.input_rate == vk::VertexInputRate::INSTANCE),
            });
        }
        if let (Some(buffer), Some(index)) = (&index_buffer, &key.index) {
            let (gl_buffer, _) = buffer.locate(index.offset)?;
            self.state.driver.bind_element_buffer(Some(gl_buffer));
        }
        let mut watched: Vec<_> = key
            .vertex
            .iter()
            .filter_map(|bound| Some((bound.buffer, Arc::clone(slots.get(&bound.slot)?))))
            .collect();
        if let (Some(buffer), Some(index)) = (index_buffer, &key.index) {
            watched.push((index.buffer, buffer));
        }
        self.state.geometry.insert(key, vertex_array);

        for (key, buffer) in watched {
            if !self.state.geometry.watch(key) {
                continue;
            }
            buffer
                .notifier
                .register(move |state: &mut GlState| state.purge_buffer(key));
            if let Some(binding) = buffer.binding() {
                binding
                    .memory
                    .notifier
                    .register(move |state: &mut GlState| state.purge_buffer(key));
            }
        }
        Ok(())
    }

    /// Bind a throwaway framebuffer with `image` attached, run `clear` in a
    /// full-extent bracket for every level and layer in `ranges`
    fn clear_image(
        &mut self,
        image: &ImageObject,
        ranges: &[vk::ImageSubresourceRange],
        point: AttachmentPoint,
        clear: impl Fn(&mut GlState),
    ) -> VulkanResult<()> {
        let texture = image.require_texture()?;
        let previous = self.state.bound.draw_framebuffer;
        let previous_height = self.state.stack.target_height();
        for range in ranges {
            let (levels, layers) = image.resolve_range(range)?;
            for level in levels {
                for layer in layers.clone() {
                    let extent = image.level_extent(level);
                    let framebuffer = self.state.driver.create_framebuffer()?;
                    let layer = (image.info.array_layers > 1).then_some(layer);
                    self.state
                        .driver
                        .framebuffer_texture(framebuffer, point, texture, level, layer);
                    self.state.bind_draw_framebuffer(Some(framebuffer));
                    self.state.stack.set_target_height(extent.height);
                    let state = &mut *self.state;
                    state.stack.push_clear(
                        state.driver.as_mut(),
                        Scissor {
                            x: 0,
                            y: 0,
                            width: extent.width,
                            height: extent.height,
                        },
                        u32::from(matches!(point, AttachmentPoint::Color(_))),
                    );
                    clear(state);
                    state.stack.pop(state.driver.as_mut())?;
                    self.release_scratch(framebuffer, previous);
                }
            }
        }
        self.state.stack.set_target_height(previous_height);
        Ok(())
    }

    fn release_scratch(&mut self, framebuffer: FramebufferName, previous: Option<FramebufferName>) {
        self.state.bind_draw_framebuffer(previous);
        self.state.driver.delete_framebuffer(framebuffer);
    }

    fn copy_image(&mut self, src: &ImageObject, dst: &ImageObject, region: &vk::ImageCopy) -> VulkanResult<()> {
        if self.state.caps.contains(Capabilities::COPY_IMAGE) {
            let src_texture = src.require_texture()?;
            let dst_texture = dst.require_texture()?;
            let src_region = image_region(src, &region.src_subresource, region.src_offset, region.extent);
            let dst_region = image_region(dst, &region.dst_subresource, region.dst_offset, region.extent);
            self.state.driver.copy_texture(
                src_texture,
                src.target,
                &src_region,
                dst_texture,
                dst.target,
                &dst_region,
            );
            return Ok(());
        }
        let width = region.extent.width as i32;
        let height = region.extent.height as i32;
        let src_rect = [
            region.src_offset.x,
            region.src_offset.y,
            region.src_offset.x + width,
            region.src_offset.y + height,
        ];
        let dst_rect = [
            region.dst_offset.x,
            region.dst_offset.y,
            region.dst_offset.x + width,
            region.dst_offset.y + height,
        ];
        self.blit(
            src,
            dst,
            (region.src_subresource.mip_level, region.src_subresource.base_array_layer),
            (region.dst_subresource.mip_level, region.dst_subresource.base_array_layer),
            src_rect,
            dst_rect,
            Filter::Nearest,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn blit(
        &mut self,
        src: &ImageObject,
        dst: &ImageObject,
        (src_level, src_layer): (u32, u32),
        (dst_level, dst_layer): (u32, u32),
        src_rect: [i32; 4],
        dst_rect: [i32; 4],
        filter: Filter,
    ) -> VulkanResult<()> {
        let (point, mask) = match src.class() {
            FormatClass::Color(_) => (AttachmentPoint::Color(0), ClearMask::COLOR),
            FormatClass::Depth => (AttachmentPoint::Depth, ClearMask::DEPTH),
            FormatClass::Stencil => (AttachmentPoint::Stencil, ClearMask::STENCIL),
            FormatClass::DepthStencil => (
                AttachmentPoint::DepthStencil,
                ClearMask::DEPTH | ClearMask::STENCIL,
            ),
        };
        let filter = if mask == ClearMask::COLOR { filter } else { Filter::Nearest };
        let previous = self.state.bound.draw_framebuffer;

        let read = self.scratch_target(src, point, src_level, src_layer)?;
        let draw = self.scratch_target(dst, point, dst_level, dst_layer)?;
        self.state.driver.bind_framebuffer(FramebufferTarget::Read, read);
        self.state.bind_draw_framebuffer(draw);
        self.state.driver.blit_framebuffer(src_rect, dst_rect, mask, filter);

        self.state.bind_draw_framebuffer(previous);
        for framebuffer in [read, draw].into_iter().flatten() {
            self.state.driver.delete_framebuffer(framebuffer);
        }
        Ok(())
    }

    /// Framebuffer reading or drawing one image level; `None` for the window
    fn scratch_target(
        &mut self,
        image: &ImageObject,
        point: AttachmentPoint,
        level: u32,
        layer: u32,
    ) -> VulkanResult<Option<FramebufferName>> {
        let Some(texture) = image.texture else {
            return Ok(None);
        };
        let framebuffer = self.state.driver.create_framebuffer()?;
        let layer = (image.info.array_layers > 1).then_some(layer);
        self.state
            .driver
            .framebuffer_texture(framebuffer, point, texture, level, layer);
        Ok(Some(framebuffer))
    }
}

fn offsets_rect(offsets: &[vk::Offset3D; 2]) -> [i32; 4] {
    [offsets[0].x, offsets[0].y, offsets[1].x, offsets[1].y]
}

/// Texel region of a copy; array layers ride on the z axis
fn image_region(
    image: &ImageObject,
    subresource: &vk::ImageSubresourceLayers,
    offset: vk::Offset3D,
    extent: vk::Extent3D,
) -> TextureRegion {
    let layered = image.info.array_layers > 1;
    TextureRegion {
        level: subresource.mip_level,
        x: offset.x,
        y: offset.y,
        z: if layered {
            subresource.base_array_layer as i32
        } else {
            offset.z
        },
        width: extent.width,
        height: extent.height,
        depth: if layered {
            subresource.layer_count
        } else {
            extent.depth
        },
        row_length: 0,
        image_height: 0,
    }
}

fn buffer_region(image: &ImageObject, region: &vk::BufferImageCopy) -> TextureRegion {
    TextureRegion {
        row_length: region.buffer_row_length,
        image_height: region.buffer_image_height,
        ..image_region(image, &region.image_subresource, region.image_offset, region.image_extent)
    }
}
