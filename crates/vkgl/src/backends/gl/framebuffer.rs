//! Render pass and framebuffer emulation
//!
//! A render pass is pure description. A framebuffer is classified once at
//! creation: if any attachment is a swapchain image, it renders to the
//! window's default framebuffer; otherwise it owns a framebuffer object with
//! colour attachment `k` bound at `COLOR_ATTACHMENT{k}` in attachment order.
//!
//! Load-op clears run when the pass begins, inside a state stack bracket that
//! scissors to the render area and opens every write mask.

use std::sync::Arc;

use ash::vk;

use crate::backends::gl::driver::{
    AttachmentPoint, ClearMask, DrawBuffer, Filter, FramebufferName, FramebufferStatus,
    FramebufferTarget,
};
use crate::backends::gl::format::{classify, ColorKind, FormatClass};
use crate::backends::gl::state::Scissor;
use crate::backends::gl::GlState;
use crate::backends::Capabilities;
use crate::core::error::{VulkanError, VulkanResult};
use crate::core::info::{ClearAttachment, ClearColorValue, ClearValue, RenderPassCreateInfo};
use crate::core::resource::ImageViewObject;

/// Attachment references of one subpass
#[derive(Debug, Clone, Default)]
pub struct SubpassLayout {
    /// Colour outputs, `None` for unused slots
    pub colors: Vec<Option<u32>>,
    /// Resolve target per colour output
    pub resolves: Vec<Option<u32>>,
    /// Depth/stencil attachment
    pub depth_stencil: Option<u32>,
}

fn reference(reference: &vk::AttachmentReference) -> Option<u32> {
    (reference.attachment != vk::ATTACHMENT_UNUSED).then_some(reference.attachment)
}

/// What a load-op clear touches on one attachment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadClear {
    /// Attachment index
    pub attachment: u32,
    /// Colour or depth aspect is cleared
    pub main: bool,
    /// Stencil aspect is cleared
    pub stencil: bool,
}

/// One `VkRenderPass`
#[derive(Debug)]
pub struct RenderPassObject {
    /// Attachment descriptions
    pub attachments: Vec<vk::AttachmentDescription>,
    /// Subpass references
    pub subpasses: Vec<SubpassLayout>,
    clears: Vec<LoadClear>,
}

impl RenderPassObject {
    /// Validate attachment references
    pub fn new(info: &RenderPassCreateInfo<'_>) -> VulkanResult<Self> {
        if info.subpasses.is_empty() {
            return Err(VulkanError::contract("render pass needs at least one subpass"));
        }
        let count = info.attachments.len() as u32;
        let mut subpasses = Vec::with_capacity(info.subpasses.len());
        for (index, subpass) in info.subpasses.iter().enumerate() {
            if subpass.pipeline_bind_point != vk::PipelineBindPoint::GRAPHICS {
                return Err(VulkanError::contract("subpasses must use the graphics bind point"));
            }
            if !subpass.resolve_attachments.is_empty()
                && subpass.resolve_attachments.len() != subpass.color_attachments.len()
            {
                return Err(VulkanError::contract(format!(
                    "subpass {index} has {} resolve targets for {} colour outputs",
                    subpass.resolve_attachments.len(),
                    subpass.color_attachments.len()
                )));
            }
            let layout = SubpassLayout {
                colors: subpass.color_attachments.iter().map(reference).collect(),
                resolves: subpass.resolve_attachments.iter().map(reference).collect(),
                depth_stencil: subpass.depth_stencil_attachment.as_ref().and_then(reference),
            };
            let referenced = layout
                .colors
                .iter()
                .chain(&layout.resolves)
                .chain(std::iter::once(&layout.depth_stencil))
                .flatten()
                .copied()
                .chain(subpass.input_attachments.iter().filter_map(reference))
                .chain(subpass.preserve_attachments.iter().copied());
            for attachment in referenced {
                if attachment >= count {
                    return Err(VulkanError::contract(format!(
                        "subpass {index} references attachment {attachment} of {count}"
                    )));
                }
            }
            if let Some(depth) = layout.depth_stencil {
                if classify(info.attachments[depth as usize].format).is_color() {
                    return Err(VulkanError::contract(format!(
                        "subpass {index} uses colour attachment {depth} as depth/stencil"
                    )));
                }
            }
            subpasses.push(layout);
        }

        let clears = (0u32..)
            .zip(info.attachments)
            .filter_map(|(attachment, description)| {
                let class = classify(description.format);
                let main = description.load_op == vk::AttachmentLoadOp::CLEAR
                    && (class.is_color() || class.has_depth());
                let stencil = class.has_stencil()
                    && description.stencil_load_op == vk::AttachmentLoadOp::CLEAR;
                (main || stencil).then_some(LoadClear {
                    attachment,
                    main,
                    stencil,
                })
            })
            .collect();

        Ok(Self {
            attachments: info.attachments.to_vec(),
            subpasses,
            clears,
        })
    }

    /// Attachments cleared on load, in attachment order
    pub fn cleared_attachments(&self) -> &[LoadClear] {
        &self.clears
    }

    /// Check clear values against the load-op clears
    pub fn check_clear_values(&self, values: &[ClearValue]) -> VulkanResult<()> {
        if values.len() != self.clears.len() {
            return Err(VulkanError::contract(format!(
                "render pass clears {} attachments but {} clear values were given",
                self.clears.len(),
                values.len()
            )));
        }
        for (clear, value) in self.clears.iter().zip(values) {
            let class = classify(self.attachments[clear.attachment as usize].format);
            let matches = match value {
                ClearValue::Color(_) => class.is_color(),
                ClearValue::DepthStencil { .. } => !class.is_color(),
            };
            if !matches {
                return Err(VulkanError::contract(format!(
                    "clear value for attachment {} does not match its format",
                    clear.attachment
                )));
            }
        }
        Ok(())
    }
}

/// Reinterpret a clear colour for the attachment's numeric kind
pub(crate) fn color_for(kind: ColorKind, value: ClearColorValue) -> ClearColorValue {
    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap, clippy::cast_sign_loss)]
    match (kind, value) {
        (ColorKind::Float, value) => ClearColorValue::Float(value.as_float()),
        (ColorKind::SignedInt, ClearColorValue::Int(v)) => ClearColorValue::Int(v),
        (ColorKind::SignedInt, ClearColorValue::Uint(v)) => ClearColorValue::Int(v.map(|c| c as i32)),
        (ColorKind::SignedInt, ClearColorValue::Float(v)) => ClearColorValue::Int(v.map(|c| c as i32)),
        (ColorKind::UnsignedInt, ClearColorValue::Uint(v)) => ClearColorValue::Uint(v),
        (ColorKind::UnsignedInt, ClearColorValue::Int(v)) => ClearColorValue::Uint(v.map(|c| c as u32)),
        (ColorKind::UnsignedInt, ClearColorValue::Float(v)) => ClearColorValue::Uint(v.map(|c| c as u32)),
    }
}

/// One colour resolve done by blit at the end of a subpass
#[derive(Debug, Clone, Copy)]
struct Resolve {
    source: DrawBuffer,
    target: Option<FramebufferName>,
}

/// One `VkFramebuffer`
#[derive(Debug)]
pub struct FramebufferObject {
    /// Render pass the framebuffer was created against
    pub render_pass: Arc<RenderPassObject>,
    /// Framebuffer object, `None` for the window's default framebuffer
    pub target: Option<FramebufferName>,
    /// Attached views in attachment order
    pub attachments: Vec<Arc<ImageViewObject>>,
    points: Vec<AttachmentPoint>,
    draw_buffers: Vec<Vec<DrawBuffer>>,
    resolves: Vec<Vec<Resolve>>,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Layer count
    pub layers: u32,
}

impl FramebufferObject {
    /// Classify the attachments and build the framebuffer object
    pub fn new(
        state: &mut GlState,
        render_pass: Arc<RenderPassObject>,
        attachments: Vec<Arc<ImageViewObject>>,
        width: u32,
        height: u32,
        layers: u32,
    ) -> VulkanResult<Self> {
        if attachments.len() != render_pass.attachments.len() {
            return Err(VulkanError::contract(format!(
                "render pass has {} attachments, framebuffer has {}",
                render_pass.attachments.len(),
                attachments.len()
            )));
        }
        for (index, view) in attachments.iter().enumerate() {
            let extent = view.extent();
            if extent.width < width || extent.height < height {
                return Err(VulkanError::contract(format!(
                    "attachment {index} is {}x{}, smaller than the framebuffer",
                    extent.width, extent.height
                )));
            }
        }

        let mut next_color = 0;
        let points: Vec<AttachmentPoint> = attachments
            .iter()
            .map(|view| match view.format.class {
                FormatClass::Color(_) => {
                    next_color += 1;
                    AttachmentPoint::Color(next_color - 1)
                }
                FormatClass::Depth => AttachmentPoint::Depth,
                FormatClass::Stencil => AttachmentPoint::Stencil,
                FormatClass::DepthStencil => AttachmentPoint::DepthStencil,
            })
            .collect();

        let default = attachments.iter().any(|view| view.is_backbuffer());
        let target = if default {
            log::debug!("Framebuffer targets the window's default framebuffer");
            None
        } else {
            let framebuffer = state.driver.create_framebuffer()?;
            for (view, point) in attachments.iter().zip(&points) {
                attach(state, framebuffer, *point, view)?;
            }
            if let FramebufferStatus::Incomplete(reason) =
                state.driver.check_framebuffer_status(framebuffer)
            {
                state.driver.delete_framebuffer(framebuffer);
                return Err(VulkanError::InitializationFailed(format!(
                    "framebuffer is incomplete: {reason}"
                )));
            }
            Some(framebuffer)
        };

        let draw_buffers = render_pass
            .subpasses
            .iter()
            .map(|subpass| {
                subpass
                    .colors
                    .iter()
                    .map(|color| match (color, target) {
                        (None, _) => DrawBuffer::None,
                        (Some(_), None) => DrawBuffer::Back,
                        (Some(attachment), Some(_)) => match points[*attachment as usize] {
                            AttachmentPoint::Color(k) => DrawBuffer::Color(k),
                            _ => DrawBuffer::None,
                        },
                    })
                    .collect()
            })
            .collect();

        let mut resolves = Vec::with_capacity(render_pass.subpasses.len());
        for subpass in &render_pass.subpasses {
            let mut blits = Vec::new();
            for (color, resolve) in subpass.colors.iter().zip(&subpass.resolves) {
                let (Some(source), Some(destination), Some(_)) = (color, resolve, target) else {
                    continue;
                };
                let AttachmentPoint::Color(k) = points[*source as usize] else {
                    continue;
                };
                let view = &attachments[*destination as usize];
                let resolve_target = if view.is_backbuffer() {
                    None
                } else {
                    let framebuffer = state.driver.create_framebuffer()?;
                    attach(state, framebuffer, AttachmentPoint::Color(0), view)?;
                    Some(framebuffer)
                };
                blits.push(Resolve {
                    source: DrawBuffer::Color(k),
                    target: resolve_target,
                });
            }
            resolves.push(blits);
        }

        Ok(Self {
            render_pass,
            target,
            attachments,
            points,
            draw_buffers,
            resolves,
            width,
            height,
            layers,
        })
    }

    /// Whether the framebuffer renders to the window
    pub const fn is_default(&self) -> bool {
        self.target.is_none()
    }

    /// Draw buffer list of one subpass
    pub fn draw_buffers(&self, subpass: usize) -> &[DrawBuffer] {
        self.draw_buffers.get(subpass).map_or(&[], Vec::as_slice)
    }

    /// Start the pass: bind, run load-op clears, select subpass 0 outputs
    pub fn begin(
        &self,
        state: &mut GlState,
        area: vk::Rect2D,
        clear_values: &[ClearValue],
    ) -> VulkanResult<()> {
        state.bind_draw_framebuffer(self.target);
        state.stack.set_target_height(self.height);

        let clears = self.render_pass.cleared_attachments();
        if !clears.is_empty() {
            let all_colors: Vec<DrawBuffer> = if self.is_default() {
                vec![DrawBuffer::Back]
            } else {
                self.points
                    .iter()
                    .filter_map(|point| match point {
                        AttachmentPoint::Color(k) => Some(DrawBuffer::Color(*k)),
                        _ => None,
                    })
                    .collect()
            };
            state.driver.draw_buffers(&all_colors);
            let requests: Vec<ClearRequest> = clears
                .iter()
                .zip(clear_values)
                .map(|(clear, value)| {
                    let index = clear.attachment as usize;
                    let draw_buffer = match self.points[index] {
                        AttachmentPoint::Color(k) => Some(k),
                        _ => None,
                    };
                    ClearRequest {
                        draw_buffer,
                        class: self.attachments[index].format.class,
                        value: *value,
                        main: clear.main,
                        stencil: clear.stencil,
                    }
                })
                .collect();
            self.run_clears(state, area.into(), all_colors.len() as u32, &requests)?;
        }

        state.driver.draw_buffers(self.draw_buffers(0));
        Ok(())
    }

    /// Finish `subpass` and select the outputs of the next one
    pub fn next_subpass(&self, state: &mut GlState, subpass: usize) -> VulkanResult<()> {
        if subpass + 1 >= self.render_pass.subpasses.len() {
            return Err(VulkanError::contract("next subpass past the last subpass"));
        }
        self.resolve(state, subpass);
        state.driver.draw_buffers(self.draw_buffers(subpass + 1));
        Ok(())
    }

    /// Finish the last subpass: resolve and drop `DONT_CARE` contents
    pub fn end(&self, state: &mut GlState, subpass: usize) {
        self.resolve(state, subpass);
        if let Some(framebuffer) = self.target {
            if state.caps.contains(Capabilities::INVALIDATE_FRAMEBUFFER) {
                let discarded: Vec<AttachmentPoint> = self
                    .render_pass
                    .attachments
                    .iter()
                    .zip(&self.points)
                    .filter(|(description, point)| {
                        let stencil_only = matches!(point, AttachmentPoint::Stencil);
                        let op = if stencil_only {
                            description.stencil_store_op
                        } else {
                            description.store_op
                        };
                        op == vk::AttachmentStoreOp::DONT_CARE
                    })
                    .map(|(_, point)| *point)
                    .collect();
                if !discarded.is_empty() {
                    state.bind_draw_framebuffer(Some(framebuffer));
                    state
                        .driver
                        .invalidate_framebuffer(FramebufferTarget::Draw, &discarded);
                }
            }
        }
    }

    /// `cmd_clear_attachments` inside `subpass`
    pub fn clear_attachments(
        &self,
        state: &mut GlState,
        subpass: usize,
        attachments: &[ClearAttachment],
        rects: &[vk::ClearRect],
    ) -> VulkanResult<()> {
        let layout = self
            .render_pass
            .subpasses
            .get(subpass)
            .ok_or_else(|| VulkanError::contract("clear outside a valid subpass"))?;
        let mut requests = Vec::with_capacity(attachments.len());
        for clear in attachments {
            if clear.aspect_mask.contains(vk::ImageAspectFlags::COLOR) {
                let Some(Some(attachment)) = layout.colors.get(clear.color_attachment as usize)
                else {
                    continue;
                };
                requests.push(ClearRequest {
                    // Draw buffer slots follow the subpass colour list
                    draw_buffer: Some(clear.color_attachment),
                    class: self.attachments[*attachment as usize].format.class,
                    value: clear.clear_value,
                    main: true,
                    stencil: false,
                });
            } else if let Some(attachment) = layout.depth_stencil {
                requests.push(ClearRequest {
                    draw_buffer: None,
                    class: self.attachments[attachment as usize].format.class,
                    value: clear.clear_value,
                    main: clear.aspect_mask.contains(vk::ImageAspectFlags::DEPTH),
                    stencil: clear.aspect_mask.contains(vk::ImageAspectFlags::STENCIL),
                });
            }
        }
        if requests.is_empty() {
            return Ok(());
        }
        let colors = layout.colors.len() as u32;
        for rect in rects {
            self.run_clears(state, rect.rect.into(), colors, &requests)?;
        }
        Ok(())
    }

    fn run_clears(
        &self,
        state: &mut GlState,
        area: Scissor,
        color_attachments: u32,
        requests: &[ClearRequest],
    ) -> VulkanResult<()> {
        let state = &mut *state;
        state
            .stack
            .push_clear(state.driver.as_mut(), area, color_attachments);
        let driver = state.driver.as_mut();
        if self.is_default() {
            let mut mask = ClearMask::empty();
            for request in requests {
                match request.value {
                    ClearValue::Color(color) if request.class.is_color() => {
                        driver.clear_color(color.as_float());
                        mask |= ClearMask::COLOR;
                    }
                    ClearValue::DepthStencil { depth, stencil } => {
                        if request.main && request.class.has_depth() {
                            driver.clear_depth(depth);
                            mask |= ClearMask::DEPTH;
                        }
                        if request.stencil && request.class.has_stencil() {
                            driver.clear_stencil(stencil);
                            mask |= ClearMask::STENCIL;
                        }
                    }
                    ClearValue::Color(_) => {}
                }
            }
            if !mask.is_empty() {
                driver.clear(mask);
            }
        } else {
            for request in requests {
                match (request.value, request.class, request.draw_buffer) {
                    (ClearValue::Color(color), FormatClass::Color(kind), Some(k)) => {
                        driver.clear_buffer_color(k, color_for(kind, color));
                    }
                    (ClearValue::DepthStencil { depth, stencil }, class, _) => {
                        let depth = (request.main && class.has_depth()).then_some(depth);
                        let stencil = (request.stencil && class.has_stencil()).then_some(stencil);
                        if depth.is_some() || stencil.is_some() {
                            driver.clear_buffer_depth_stencil(depth, stencil);
                        }
                    }
                    _ => {}
                }
            }
        }
        state.stack.pop(state.driver.as_mut())?;
        Ok(())
    }

    fn resolve(&self, state: &mut GlState, subpass: usize) {
        let Some(blits) = self.resolves.get(subpass) else {
            return;
        };
        if blits.is_empty() {
            return;
        }
        let rect = [0, 0, self.width as i32, self.height as i32];
        state
            .driver
            .bind_framebuffer(FramebufferTarget::Read, self.target);
        for blit in blits {
            state.driver.read_buffer(blit.source);
            state.bind_draw_framebuffer(blit.target);
            state
                .driver
                .blit_framebuffer(rect, rect, ClearMask::COLOR, Filter::Nearest);
        }
        state.bind_draw_framebuffer(self.target);
    }

    /// Delete the framebuffer objects
    pub fn release(&self, state: &mut GlState) {
        let owned = self
            .target
            .into_iter()
            .chain(self.resolves.iter().flatten().filter_map(|blit| blit.target));
        for framebuffer in owned.collect::<Vec<_>>() {
            if state.bound.draw_framebuffer == Some(framebuffer) {
                state.bind_draw_framebuffer(None);
            }
            state.driver.delete_framebuffer(framebuffer);
        }
    }
}

/// One clear inside a bracket
#[derive(Debug, Clone, Copy)]
struct ClearRequest {
    draw_buffer: Option<u32>,
    class: FormatClass,
    value: ClearValue,
    main: bool,
    stencil: bool,
}

fn attach(
    state: &mut GlState,
    framebuffer: FramebufferName,
    point: AttachmentPoint,
    view: &ImageViewObject,
) -> VulkanResult<()> {
    let texture = view.image.require_texture()?;
    let texture = view.texture.unwrap_or(texture);
    let own_view = view.texture != view.image.texture;
    let (level, layer) = if own_view {
        (0, None)
    } else {
        let layered = view.image.info.array_layers > 1 && view.layers == 1;
        (view.base_level, layered.then_some(view.base_layer))
    };
    state
        .driver
        .framebuffer_texture(framebuffer, point, texture, level, layer);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::noop::{CallLog, GlCall, NoopDriver};
    use crate::core::info::{ImageCreateInfo, ImageViewCreateInfo, SubpassDescription};
    use crate::core::resource::ImageObject;

    fn state() -> (GlState, CallLog) {
        let (driver, log) = NoopDriver::standalone();
        (GlState::new(Box::new(driver), Capabilities::all(), None), log)
    }

    fn attachment(format: vk::Format, load_op: vk::AttachmentLoadOp) -> vk::AttachmentDescription {
        vk::AttachmentDescription {
            format,
            samples: vk::SampleCountFlags::TYPE_1,
            load_op,
            store_op: vk::AttachmentStoreOp::STORE,
            stencil_load_op: load_op,
            stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
            ..Default::default()
        }
    }

    fn color_depth_pass(load_op: vk::AttachmentLoadOp) -> Arc<RenderPassObject> {
        let attachments = [
            attachment(vk::Format::R8G8B8A8_UNORM, load_op),
            attachment(vk::Format::D24_UNORM_S8_UINT, load_op),
        ];
        let colors = [vk::AttachmentReference {
            attachment: 0,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        }];
        let subpasses = [SubpassDescription {
            pipeline_bind_point: vk::PipelineBindPoint::GRAPHICS,
            color_attachments: &colors,
            depth_stencil_attachment: Some(vk::AttachmentReference {
                attachment: 1,
                layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            }),
            ..Default::default()
        }];
        Arc::new(
            RenderPassObject::new(&RenderPassCreateInfo {
                attachments: &attachments,
                subpasses: &subpasses,
                dependencies: &[],
            })
            .unwrap(),
        )
    }

    fn view(state: &mut GlState, format: vk::Format) -> Arc<ImageViewObject> {
        let image = Arc::new(
            ImageObject::new(
                state,
                &ImageCreateInfo {
                    format,
                    extent: vk::Extent3D {
                        width: 64,
                        height: 32,
                        depth: 1,
                    },
                    ..ImageCreateInfo::default()
                },
            )
            .unwrap(),
        );
        Arc::new(
            ImageViewObject::new(
                state,
                image,
                &ImageViewCreateInfo {
                    image: vk::Image::null(),
                    view_type: vk::ImageViewType::TYPE_2D,
                    format,
                    components: vk::ComponentMapping::default(),
                    subresource_range: vk::ImageSubresourceRange {
                        aspect_mask: crate::backends::gl::format::aspect_mask(format),
                        base_mip_level: 0,
                        level_count: 1,
                        base_array_layer: 0,
                        layer_count: 1,
                    },
                },
            )
            .unwrap(),
        )
    }

    fn area() -> vk::Rect2D {
        vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: vk::Extent2D {
                width: 64,
                height: 32,
            },
        }
    }

    #[test]
    fn test_clear_value_count_and_kind() {
        let pass = color_depth_pass(vk::AttachmentLoadOp::CLEAR);
        assert_eq!(pass.cleared_attachments().len(), 2);

        let color = ClearValue::Color(ClearColorValue::Float([0.0; 4]));
        let depth = ClearValue::DepthStencil {
            depth: 1.0,
            stencil: 0,
        };
        assert!(pass.check_clear_values(&[color, depth]).is_ok());
        assert!(pass.check_clear_values(&[color]).is_err());
        assert!(pass.check_clear_values(&[depth, color]).is_err());

        let loaded = color_depth_pass(vk::AttachmentLoadOp::LOAD);
        assert!(loaded.cleared_attachments().is_empty());
        assert!(loaded.check_clear_values(&[]).is_ok());
    }

    #[test]
    fn test_out_of_range_reference_rejected() {
        let colors = [vk::AttachmentReference {
            attachment: 3,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        }];
        let subpasses = [SubpassDescription {
            pipeline_bind_point: vk::PipelineBindPoint::GRAPHICS,
            color_attachments: &colors,
            ..Default::default()
        }];
        let attachments = [attachment(vk::Format::R8G8B8A8_UNORM, vk::AttachmentLoadOp::LOAD)];
        assert!(RenderPassObject::new(&RenderPassCreateInfo {
            attachments: &attachments,
            subpasses: &subpasses,
            dependencies: &[],
        })
        .is_err());
    }

    #[test]
    fn test_offscreen_begin_clears_through_indexed_path() {
        let (mut state, log) = state();
        let pass = color_depth_pass(vk::AttachmentLoadOp::CLEAR);
        let views = vec![
            view(&mut state, vk::Format::R8G8B8A8_UNORM),
            view(&mut state, vk::Format::D24_UNORM_S8_UINT),
        ];
        let framebuffer = FramebufferObject::new(&mut state, pass, views, 64, 32, 1).unwrap();
        assert!(!framebuffer.is_default());
        assert_eq!(framebuffer.draw_buffers(0), &[DrawBuffer::Color(0)]);
        log.clear();

        framebuffer
            .begin(
                &mut state,
                area(),
                &[
                    ClearValue::Color(ClearColorValue::Float([0.5; 4])),
                    ClearValue::DepthStencil {
                        depth: 1.0,
                        stencil: 3,
                    },
                ],
            )
            .unwrap();

        let calls = log.calls();
        assert!(calls.contains(&GlCall::ClearBufferColor(0, ClearColorValue::Float([0.5; 4]))));
        assert!(calls.contains(&GlCall::ClearBufferDepthStencil(Some(1.0), Some(3))));
        assert_eq!(log.count(GlCall::is_clear), 2);
        assert_eq!(state.stack.depth(), 1);
        assert_eq!(calls.last(), Some(&GlCall::DrawBuffers(vec![DrawBuffer::Color(0)])));
    }

    #[test]
    fn test_backbuffer_framebuffer_uses_window_clears() {
        let (mut state, log) = state();
        let pass = color_depth_pass(vk::AttachmentLoadOp::CLEAR);
        let backbuffer = Arc::new(
            ImageObject::backbuffer(
                vk::Format::B8G8R8A8_UNORM,
                vk::Extent2D {
                    width: 64,
                    height: 32,
                },
                vk::ImageUsageFlags::COLOR_ATTACHMENT,
            )
            .unwrap(),
        );
        let color = Arc::new(
            ImageViewObject::new(
                &mut state,
                backbuffer,
                &ImageViewCreateInfo {
                    image: vk::Image::null(),
                    view_type: vk::ImageViewType::TYPE_2D,
                    format: vk::Format::B8G8R8A8_UNORM,
                    components: vk::ComponentMapping::default(),
                    subresource_range: vk::ImageSubresourceRange {
                        aspect_mask: vk::ImageAspectFlags::COLOR,
                        base_mip_level: 0,
                        level_count: 1,
                        base_array_layer: 0,
                        layer_count: 1,
                    },
                },
            )
            .unwrap(),
        );
        let depth = view(&mut state, vk::Format::D24_UNORM_S8_UINT);
        log.clear();

        let framebuffer =
            FramebufferObject::new(&mut state, pass, vec![color, depth], 64, 32, 1).unwrap();
        assert!(framebuffer.is_default());
        assert_eq!(log.count(|call| matches!(call, GlCall::CreateFramebuffer(_))), 0);

        framebuffer
            .begin(
                &mut state,
                area(),
                &[
                    ClearValue::Color(ClearColorValue::Float([0.0, 0.0, 0.0, 1.0])),
                    ClearValue::DepthStencil {
                        depth: 1.0,
                        stencil: 0,
                    },
                ],
            )
            .unwrap();
        assert!(log
            .calls()
            .contains(&GlCall::Clear(ClearMask::COLOR | ClearMask::DEPTH | ClearMask::STENCIL)));
        assert_eq!(log.count(|call| matches!(call, GlCall::ClearBufferColor(..))), 0);
    }

    #[test]
    fn test_end_invalidates_dont_care_stencil() {
        let (mut state, log) = state();
        let pass = color_depth_pass(vk::AttachmentLoadOp::LOAD);
        let views = vec![
            view(&mut state, vk::Format::R8G8B8A8_UNORM),
            view(&mut state, vk::Format::S8_UINT),
        ];
        let framebuffer = FramebufferObject::new(&mut state, pass, views, 64, 32, 1).unwrap();
        framebuffer.begin(&mut state, area(), &[]).unwrap();
        framebuffer.end(&mut state, 0);
        assert!(log.calls().contains(&GlCall::InvalidateFramebuffer(
            FramebufferTarget::Draw,
            vec![AttachmentPoint::Stencil]
        )));
    }

    #[test]
    fn test_integer_clear_reinterpreted() {
        assert_eq!(
            color_for(ColorKind::UnsignedInt, ClearColorValue::Float([1.0, 2.0, 0.0, 0.0])),
            ClearColorValue::Uint([1, 2, 0, 0])
        );
        assert_eq!(
            color_for(ColorKind::Float, ClearColorValue::Int([1, 0, 0, 1])),
            ClearColorValue::Float([1.0, 0.0, 0.0, 1.0])
        );
    }
}
