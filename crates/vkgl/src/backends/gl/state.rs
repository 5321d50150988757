//! Context state snapshots and the diff-and-apply state stack
//!
//! A pipeline bundles its whole fixed-function configuration into an
//! immutable [`ContextStateSnapshot`]. The legacy context instead keeps every
//! toggle as a separate global. [`StateStack`] remembers what it last applied
//! to the driver and, whenever the wanted state changes, emits only the calls
//! for fields that differ. Redundant calls are never issued, so binding the
//! same pipeline twice costs nothing the second time.
//!
//! Fields declared dynamic by the bound pipeline are not taken from the
//! snapshot; they follow the values of explicit `cmd_set_*` calls. A field
//! the stack has no wanted value for is left alone on the driver.

use std::ops::AddAssign;
use std::sync::Arc;

use ash::vk;
use bitflags::bitflags;

use crate::backends::gl::conversions::IntoGl;
use crate::backends::gl::driver::{
    BlendEquation, BlendFactors, Capability, CompareFunc, Face, GlDriver, LogicOp, PolygonMode,
    ScissorRect, StencilOp, Topology, ViewportRect, Winding,
};
use crate::backends::Capabilities;
use crate::core::error::{VulkanError, VulkanResult};
use crate::core::info::GraphicsPipelineCreateInfo;

bitflags! {
    /// State categories a pipeline leaves to explicit set calls
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct DynamicStates: u32 {
        /// `cmd_set_viewport`
        const VIEWPORT = 1 << 0;
        /// `cmd_set_scissor`
        const SCISSOR = 1 << 1;
        /// `cmd_set_line_width`
        const LINE_WIDTH = 1 << 2;
        /// `cmd_set_depth_bias`
        const DEPTH_BIAS = 1 << 3;
        /// `cmd_set_blend_constants`
        const BLEND_CONSTANTS = 1 << 4;
        /// `cmd_set_depth_bounds`
        const DEPTH_BOUNDS = 1 << 5;
        /// `cmd_set_stencil_compare_mask`
        const STENCIL_COMPARE_MASK = 1 << 6;
        /// `cmd_set_stencil_write_mask`
        const STENCIL_WRITE_MASK = 1 << 7;
        /// `cmd_set_stencil_reference`
        const STENCIL_REFERENCE = 1 << 8;
    }
}

impl DynamicStates {
    /// Collect the categories named in a pipeline's dynamic state list
    pub fn from_vk(states: &[vk::DynamicState]) -> Self {
        states.iter().fold(Self::empty(), |acc, state| {
            acc | match *state {
                vk::DynamicState::VIEWPORT => Self::VIEWPORT,
                vk::DynamicState::SCISSOR => Self::SCISSOR,
                vk::DynamicState::LINE_WIDTH => Self::LINE_WIDTH,
                vk::DynamicState::DEPTH_BIAS => Self::DEPTH_BIAS,
                vk::DynamicState::BLEND_CONSTANTS => Self::BLEND_CONSTANTS,
                vk::DynamicState::DEPTH_BOUNDS => Self::DEPTH_BOUNDS,
                vk::DynamicState::STENCIL_COMPARE_MASK => Self::STENCIL_COMPARE_MASK,
                vk::DynamicState::STENCIL_WRITE_MASK => Self::STENCIL_WRITE_MASK,
                vk::DynamicState::STENCIL_REFERENCE => Self::STENCIL_REFERENCE,
                other => {
                    log::warn!("Ignoring unsupported dynamic state {other:?}");
                    Self::empty()
                }
            }
        })
    }
}

/// Viewport in API coordinates (upper-left origin)
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[allow(missing_docs)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

impl From<vk::Viewport> for Viewport {
    fn from(v: vk::Viewport) -> Self {
        Self {
            x: v.x,
            y: v.y,
            width: v.width,
            height: v.height,
            min_depth: v.min_depth,
            max_depth: v.max_depth,
        }
    }
}

/// Scissor rectangle in API coordinates (upper-left origin)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[allow(missing_docs)]
pub struct Scissor {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl From<vk::Rect2D> for Scissor {
    fn from(r: vk::Rect2D) -> Self {
        Self {
            x: r.offset.x,
            y: r.offset.y,
            width: r.extent.width,
            height: r.extent.height,
        }
    }
}

/// Rasterizer configuration
#[derive(Debug, Clone, Copy, PartialEq)]
#[allow(missing_docs)]
pub struct RasterState {
    pub discard: bool,
    pub depth_clamp: bool,
    pub polygon_mode: PolygonMode,
    /// `None` when culling is disabled
    pub cull: Option<Face>,
    pub front_face: Winding,
    pub line_width: f32,
}

/// Polygon offset configuration
#[derive(Debug, Clone, Copy, PartialEq)]
#[allow(missing_docs)]
pub struct DepthBias {
    pub enabled: bool,
    pub constant: f32,
    pub clamp: f32,
    pub slope: f32,
}

/// Multisample configuration
#[derive(Debug, Clone, Copy, PartialEq)]
#[allow(missing_docs)]
pub struct MultisampleSnapshot {
    pub enabled: bool,
    /// Minimum sample shading fraction when per-sample shading is on
    pub sample_shading: Option<f32>,
    pub sample_mask: Option<u32>,
    pub alpha_to_coverage: bool,
    pub alpha_to_one: bool,
}

/// Depth test configuration
#[derive(Debug, Clone, Copy, PartialEq)]
#[allow(missing_docs)]
pub struct DepthSnapshot {
    pub test: bool,
    pub write: bool,
    pub compare: CompareFunc,
    /// Bounds test range; core contexts have no equivalent
    pub bounds: Option<(f32, f32)>,
}

/// Stencil configuration of one face
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct StencilFace {
    pub fail: StencilOp,
    pub depth_fail: StencilOp,
    pub pass: StencilOp,
    pub compare: CompareFunc,
    pub compare_mask: u32,
    pub write_mask: u32,
    pub reference: u32,
}

impl From<vk::StencilOpState> for StencilFace {
    fn from(s: vk::StencilOpState) -> Self {
        Self {
            fail: s.fail_op.into_gl(),
            depth_fail: s.depth_fail_op.into_gl(),
            pass: s.pass_op.into_gl(),
            compare: s.compare_op.into_gl(),
            compare_mask: s.compare_mask,
            write_mask: s.write_mask,
            reference: s.reference,
        }
    }
}

/// Stencil configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub struct StencilSnapshot {
    pub enabled: bool,
    pub front: StencilFace,
    pub back: StencilFace,
}

/// Blend configuration of one colour attachment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct AttachmentBlend {
    pub enabled: bool,
    pub factors: BlendFactors,
    pub color_equation: BlendEquation,
    pub alpha_equation: BlendEquation,
    pub write_mask: [bool; 4],
}

impl From<&vk::PipelineColorBlendAttachmentState> for AttachmentBlend {
    fn from(a: &vk::PipelineColorBlendAttachmentState) -> Self {
        Self {
            enabled: a.blend_enable == vk::TRUE,
            factors: BlendFactors {
                src_rgb: a.src_color_blend_factor.into_gl(),
                dst_rgb: a.dst_color_blend_factor.into_gl(),
                src_alpha: a.src_alpha_blend_factor.into_gl(),
                dst_alpha: a.dst_alpha_blend_factor.into_gl(),
            },
            color_equation: a.color_blend_op.into_gl(),
            alpha_equation: a.alpha_blend_op.into_gl(),
            write_mask: a.color_write_mask.into_gl(),
        }
    }
}

/// Colour blend configuration
#[derive(Debug, Clone, PartialEq)]
#[allow(missing_docs)]
pub struct BlendSnapshot {
    pub logic_op: Option<LogicOp>,
    pub attachments: Vec<AttachmentBlend>,
    pub constants: [f32; 4],
}

/// Immutable fixed-function configuration of one graphics pipeline
#[derive(Debug, Clone, PartialEq)]
#[allow(missing_docs)]
pub struct ContextStateSnapshot {
    pub raster: RasterState,
    pub depth_bias: DepthBias,
    pub multisample: MultisampleSnapshot,
    pub depth: DepthSnapshot,
    pub stencil: StencilSnapshot,
    pub blend: BlendSnapshot,
    pub patch_control_points: Option<u32>,
    pub viewports: Vec<Viewport>,
    pub scissors: Vec<Scissor>,
    pub topology: Topology,
    pub primitive_restart: bool,
    pub dynamic: DynamicStates,
}

impl ContextStateSnapshot {
    /// Capture the fixed-function part of a graphics pipeline description
    pub fn new(info: &GraphicsPipelineCreateInfo<'_>) -> Self {
        let r = &info.rasterization;
        let ms = info.multisample.unwrap_or_default();
        let ds = info.depth_stencil.unwrap_or_default();
        let dynamic = DynamicStates::from_vk(info.dynamic_states);

        let blend = info.color_blend.map_or_else(
            || BlendSnapshot {
                logic_op: None,
                attachments: Vec::new(),
                constants: [0.0; 4],
            },
            |cb| BlendSnapshot {
                logic_op: cb.logic_op_enable.then(|| cb.logic_op.into_gl()),
                attachments: cb.attachments.iter().map(AttachmentBlend::from).collect(),
                constants: cb.blend_constants,
            },
        );
        let viewport = info.viewport.unwrap_or_default();

        Self {
            raster: RasterState {
                discard: r.rasterizer_discard_enable,
                depth_clamp: r.depth_clamp_enable,
                polygon_mode: r.polygon_mode.into_gl(),
                cull: r.cull_mode.into_gl(),
                front_face: r.front_face.into_gl(),
                line_width: r.line_width,
            },
            depth_bias: DepthBias {
                enabled: r.depth_bias_enable,
                constant: r.depth_bias_constant_factor,
                clamp: r.depth_bias_clamp,
                slope: r.depth_bias_slope_factor,
            },
            multisample: MultisampleSnapshot {
                enabled: ms.rasterization_samples != vk::SampleCountFlags::TYPE_1,
                sample_shading: ms.sample_shading_enable.then_some(ms.min_sample_shading),
                sample_mask: ms.sample_mask,
                alpha_to_coverage: ms.alpha_to_coverage_enable,
                alpha_to_one: ms.alpha_to_one_enable,
            },
            depth: DepthSnapshot {
                test: ds.depth_test_enable,
                write: ds.depth_write_enable,
                compare: ds.depth_compare_op.into_gl(),
                bounds: ds
                    .depth_bounds_test_enable
                    .then_some((ds.min_depth_bounds, ds.max_depth_bounds)),
            },
            stencil: StencilSnapshot {
                enabled: ds.stencil_test_enable,
                front: ds.front.into(),
                back: ds.back.into(),
            },
            blend,
            patch_control_points: info.tessellation.map(|t| t.patch_control_points),
            viewports: viewport.viewports.iter().copied().map(Viewport::from).collect(),
            scissors: viewport.scissors.iter().copied().map(Scissor::from).collect(),
            topology: info.input_assembly.topology.into_gl(),
            primitive_restart: info.input_assembly.primitive_restart_enable,
            dynamic,
        }
    }
}

/// Calls emitted by one diff
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiffStats {
    /// Driver calls issued
    pub calls: usize,
}

impl AddAssign for DiffStats {
    fn add_assign(&mut self, rhs: Self) {
        self.calls += rhs.calls;
    }
}

/// Values most recently set by `cmd_set_*` calls
#[derive(Debug, Clone, Default, PartialEq)]
struct DynamicValues {
    viewports: Option<Vec<Viewport>>,
    scissors: Option<Vec<Scissor>>,
    line_width: Option<f32>,
    depth_bias: Option<[f32; 3]>,
    blend_constants: Option<[f32; 4]>,
    depth_bounds: Option<(f32, f32)>,
    stencil_compare_mask: [Option<u32>; 2],
    stencil_write_mask: [Option<u32>; 2],
    stencil_reference: [Option<u32>; 2],
}

/// Write-everything bracket used by clears
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ClearBracket {
    area: Scissor,
    color_attachments: u32,
}

#[derive(Debug, Clone, Default)]
struct Frame {
    snapshot: Option<Arc<ContextStateSnapshot>>,
    dynamic: DynamicValues,
    clear: Option<ClearBracket>,
}

type StencilFunc = (CompareFunc, u32, u32);
type StencilOps = (StencilOp, StencilOp, StencilOp);
type DepthRange = [f32; 2];

/// Per-field driver state; `None` means unknown (live) or don't-care (wanted)
#[derive(Debug, Clone, Default, PartialEq)]
struct Fields {
    discard: Option<bool>,
    depth_clamp: Option<bool>,
    cull_enabled: Option<bool>,
    cull_face: Option<Face>,
    front_face: Option<Winding>,
    polygon_mode: Option<PolygonMode>,
    line_width: Option<f32>,
    depth_bias_enabled: Option<bool>,
    depth_bias: Option<[f32; 3]>,
    multisample: Option<bool>,
    alpha_to_coverage: Option<bool>,
    alpha_to_one: Option<bool>,
    sample_shading_enabled: Option<bool>,
    min_sample_shading: Option<f32>,
    sample_mask_enabled: Option<bool>,
    sample_mask: Option<u32>,
    depth_test: Option<bool>,
    depth_write: Option<bool>,
    depth_func: Option<CompareFunc>,
    stencil_test: Option<bool>,
    stencil_func: [Option<StencilFunc>; 2],
    stencil_ops: [Option<StencilOps>; 2],
    stencil_write_mask: [Option<u32>; 2],
    logic_op_enabled: Option<bool>,
    logic_op: Option<LogicOp>,
    blend: Option<Vec<AttachmentBlend>>,
    color_masks: Option<Vec<[bool; 4]>>,
    blend_constants: Option<[f32; 4]>,
    patch_vertices: Option<u32>,
    primitive_restart: Option<bool>,
    scissor_test: Option<bool>,
    viewports: Option<Vec<(ViewportRect, DepthRange)>>,
    scissors: Option<Vec<ScissorRect>>,
}

const FACES: [Face; 2] = [Face::Front, Face::Back];

/// Sync one scalar field: emit and remember when the wanted value differs
macro_rules! sync {
    ($live:expr, $want:expr, $stats:ident, |$v:ident| $emit:expr) => {
        if let Some($v) = $want {
            if $live != Some($v) {
                $emit;
                $live = Some($v);
                $stats.calls += 1;
            }
        }
    };
}

/// Diff-and-apply engine for the fixed-function state of one context
#[derive(Debug)]
pub struct StateStack {
    caps: Capabilities,
    frames: Vec<Frame>,
    live: Fields,
    target_height: u32,
}

impl StateStack {
    /// Stack with one empty frame and nothing known about the driver
    pub fn new(caps: Capabilities) -> Self {
        Self {
            caps,
            frames: vec![Frame::default()],
            live: Fields::default(),
            target_height: 0,
        }
    }

    fn top(&self) -> &Frame {
        // The base frame is never popped
        &self.frames[self.frames.len() - 1]
    }

    fn top_mut(&mut self) -> &mut Frame {
        let last = self.frames.len() - 1;
        &mut self.frames[last]
    }

    /// Number of frames, 1 when nothing is pushed
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Snapshot of the active frame
    pub fn snapshot(&self) -> Option<&Arc<ContextStateSnapshot>> {
        self.top().snapshot.as_ref()
    }

    /// Whether rectangles are flipped in software
    fn flips_y(&self) -> bool {
        !self.caps.contains(Capabilities::CLIP_CONTROL)
    }

    /// Height of the current render target
    pub const fn target_height(&self) -> u32 {
        self.target_height
    }

    /// Record the render target height used for y-flipping
    pub fn set_target_height(&mut self, height: u32) {
        if height != self.target_height {
            self.target_height = height;
            if self.flips_y() {
                self.live.viewports = None;
                self.live.scissors = None;
            }
        }
    }

    /// Forget everything known about the driver state
    pub fn invalidate(&mut self) {
        self.live = Fields::default();
    }

    /// Drop any frames left pushed and start a new replay from the base frame
    pub fn reset_frames(&mut self) {
        self.frames.truncate(1);
        self.top_mut().clear = None;
    }

    /// Make `snapshot` the active configuration and apply the difference
    pub fn bind(
        &mut self,
        driver: &mut dyn GlDriver,
        snapshot: &Arc<ContextStateSnapshot>,
    ) -> DiffStats {
        self.top_mut().snapshot = Some(Arc::clone(snapshot));
        self.apply(driver)
    }

    /// Duplicate the active frame
    pub fn push(&mut self) {
        let frame = self.top().clone();
        self.frames.push(frame);
    }

    /// Push a frame that scissors to `area` and opens every write mask
    pub fn push_clear(
        &mut self,
        driver: &mut dyn GlDriver,
        area: Scissor,
        color_attachments: u32,
    ) -> DiffStats {
        self.push();
        self.top_mut().clear = Some(ClearBracket {
            area,
            color_attachments,
        });
        self.apply(driver)
    }

    /// Discard the active frame and reapply the one below
    pub fn pop(&mut self, driver: &mut dyn GlDriver) -> VulkanResult<DiffStats> {
        if self.frames.len() <= 1 {
            return Err(VulkanError::contract("state stack pop without matching push"));
        }
        self.frames.pop();
        Ok(self.apply(driver))
    }

    /// `cmd_set_viewport`
    pub fn set_viewports(
        &mut self,
        driver: &mut dyn GlDriver,
        first: u32,
        viewports: &[Viewport],
    ) -> DiffStats {
        let values = self.top_mut().dynamic.viewports.get_or_insert_with(Vec::new);
        splice(values, first as usize, viewports);
        self.apply(driver)
    }

    /// `cmd_set_scissor`
    pub fn set_scissors(
        &mut self,
        driver: &mut dyn GlDriver,
        first: u32,
        scissors: &[Scissor],
    ) -> DiffStats {
        let values = self.top_mut().dynamic.scissors.get_or_insert_with(Vec::new);
        splice(values, first as usize, scissors);
        self.apply(driver)
    }

    /// `cmd_set_line_width`
    pub fn set_line_width(&mut self, driver: &mut dyn GlDriver, width: f32) -> DiffStats {
        self.top_mut().dynamic.line_width = Some(width);
        self.apply(driver)
    }

    /// `cmd_set_depth_bias`
    pub fn set_depth_bias(
        &mut self,
        driver: &mut dyn GlDriver,
        constant: f32,
        clamp: f32,
        slope: f32,
    ) -> DiffStats {
        self.top_mut().dynamic.depth_bias = Some([constant, clamp, slope]);
        self.apply(driver)
    }

    /// `cmd_set_blend_constants`
    pub fn set_blend_constants(&mut self, driver: &mut dyn GlDriver, constants: [f32; 4]) -> DiffStats {
        self.top_mut().dynamic.blend_constants = Some(constants);
        self.apply(driver)
    }

    /// `cmd_set_depth_bounds`; recorded but has no core-profile effect
    pub fn set_depth_bounds(&mut self, min: f32, max: f32) {
        self.top_mut().dynamic.depth_bounds = Some((min, max));
    }

    /// `cmd_set_stencil_compare_mask`
    pub fn set_stencil_compare_mask(
        &mut self,
        driver: &mut dyn GlDriver,
        faces: vk::StencilFaceFlags,
        mask: u32,
    ) -> DiffStats {
        for index in face_indices(faces) {
            self.top_mut().dynamic.stencil_compare_mask[index] = Some(mask);
        }
        self.apply(driver)
    }

    /// `cmd_set_stencil_write_mask`
    pub fn set_stencil_write_mask(
        &mut self,
        driver: &mut dyn GlDriver,
        faces: vk::StencilFaceFlags,
        mask: u32,
    ) -> DiffStats {
        for index in face_indices(faces) {
            self.top_mut().dynamic.stencil_write_mask[index] = Some(mask);
        }
        self.apply(driver)
    }

    /// `cmd_set_stencil_reference`
    pub fn set_stencil_reference(
        &mut self,
        driver: &mut dyn GlDriver,
        faces: vk::StencilFaceFlags,
        reference: u32,
    ) -> DiffStats {
        for index in face_indices(faces) {
            self.top_mut().dynamic.stencil_reference[index] = Some(reference);
        }
        self.apply(driver)
    }

    /// Emit the calls that bring the driver to the active frame's state
    pub fn apply(&mut self, driver: &mut dyn GlDriver) -> DiffStats {
        let want = self.wanted();
        let mut stats = DiffStats::default();
        let live = &mut self.live;

        sync!(live.discard, want.discard, stats, |v| driver
            .set_capability(Capability::RasterizerDiscard, v));
        sync!(live.depth_clamp, want.depth_clamp, stats, |v| driver
            .set_capability(Capability::DepthClamp, v));
        sync!(live.cull_enabled, want.cull_enabled, stats, |v| driver
            .set_capability(Capability::CullFace, v));
        sync!(live.cull_face, want.cull_face, stats, |v| driver.cull_face(v));
        sync!(live.front_face, want.front_face, stats, |v| driver.front_face(v));
        sync!(live.polygon_mode, want.polygon_mode, stats, |v| driver.polygon_mode(v));
        sync!(live.line_width, want.line_width, stats, |v| driver.line_width(v));
        if let Some(enabled) = want.depth_bias_enabled {
            if live.depth_bias_enabled != Some(enabled) {
                for cap in [
                    Capability::PolygonOffsetFill,
                    Capability::PolygonOffsetLine,
                    Capability::PolygonOffsetPoint,
                ] {
                    driver.set_capability(cap, enabled);
                    stats.calls += 1;
                }
                live.depth_bias_enabled = Some(enabled);
            }
        }
        sync!(live.depth_bias, want.depth_bias, stats, |v| driver
            .polygon_offset(v[2], v[0], v[1]));

        sync!(live.multisample, want.multisample, stats, |v| driver
            .set_capability(Capability::Multisample, v));
        sync!(live.alpha_to_coverage, want.alpha_to_coverage, stats, |v| driver
            .set_capability(Capability::SampleAlphaToCoverage, v));
        sync!(live.alpha_to_one, want.alpha_to_one, stats, |v| driver
            .set_capability(Capability::SampleAlphaToOne, v));
        sync!(live.sample_shading_enabled, want.sample_shading_enabled, stats, |v| driver
            .set_capability(Capability::SampleShading, v));
        sync!(live.min_sample_shading, want.min_sample_shading, stats, |v| driver
            .min_sample_shading(v));
        sync!(live.sample_mask_enabled, want.sample_mask_enabled, stats, |v| driver
            .set_capability(Capability::SampleMask, v));
        sync!(live.sample_mask, want.sample_mask, stats, |v| driver.sample_mask(v));

        sync!(live.depth_test, want.depth_test, stats, |v| driver
            .set_capability(Capability::DepthTest, v));
        sync!(live.depth_write, want.depth_write, stats, |v| driver.depth_mask(v));
        sync!(live.depth_func, want.depth_func, stats, |v| driver.depth_func(v));

        sync!(live.stencil_test, want.stencil_test, stats, |v| driver
            .set_capability(Capability::StencilTest, v));
        for (index, face) in FACES.into_iter().enumerate() {
            sync!(live.stencil_func[index], want.stencil_func[index], stats, |v| driver
                .stencil_func(face, v.0, v.1, v.2));
            sync!(live.stencil_ops[index], want.stencil_ops[index], stats, |v| driver
                .stencil_op(face, v.0, v.1, v.2));
            sync!(live.stencil_write_mask[index], want.stencil_write_mask[index], stats, |v| {
                driver.stencil_mask(face, v)
            });
        }

        sync!(live.logic_op_enabled, want.logic_op_enabled, stats, |v| driver
            .set_capability(Capability::ColorLogicOp, v));
        sync!(live.logic_op, want.logic_op, stats, |v| driver.logic_op(v));
        sync!(live.blend_constants, want.blend_constants, stats, |v| driver
            .blend_color(v));
        if let Some(blend) = &want.blend {
            stats += sync_blend(driver, self.caps, &mut live.blend, blend);
        }
        if let Some(masks) = &want.color_masks {
            stats += sync_color_masks(driver, self.caps, &mut live.color_masks, masks);
        }

        sync!(live.patch_vertices, want.patch_vertices, stats, |v| driver
            .patch_vertices(v));
        sync!(live.primitive_restart, want.primitive_restart, stats, |v| driver
            .set_capability(Capability::PrimitiveRestartFixedIndex, v));

        sync!(live.scissor_test, want.scissor_test, stats, |v| driver
            .set_capability(Capability::ScissorTest, v));
        if let Some(viewports) = &want.viewports {
            stats += sync_viewports(driver, self.caps, &mut live.viewports, viewports);
        }
        if let Some(scissors) = &want.scissors {
            stats += sync_array(
                &mut live.scissors,
                scissors,
                self.caps.contains(Capabilities::VIEWPORT_ARRAY),
                |index, rect| driver.scissor(index, *rect),
            );
        }

        if stats.calls > 0 {
            log::trace!("State diff emitted {} calls", stats.calls);
        }
        stats
    }

    /// Wanted driver state of the active frame
    fn wanted(&self) -> Fields {
        let frame = self.top();
        let mut want = Fields::default();

        if let Some(s) = &frame.snapshot {
            let dynamic = s.dynamic;
            let values = &frame.dynamic;
            let pick = |flag: DynamicStates, set: Option<_>, fixed| {
                if dynamic.contains(flag) {
                    set
                } else {
                    Some(fixed)
                }
            };

            want.discard = Some(s.raster.discard);
            want.depth_clamp = Some(s.raster.depth_clamp);
            want.cull_enabled = Some(s.raster.cull.is_some());
            want.cull_face = s.raster.cull;
            want.front_face = Some(s.raster.front_face);
            want.polygon_mode = Some(s.raster.polygon_mode);
            want.line_width = if dynamic.contains(DynamicStates::LINE_WIDTH) {
                values.line_width
            } else {
                Some(s.raster.line_width)
            };
            want.depth_bias_enabled = Some(s.depth_bias.enabled);
            if s.depth_bias.enabled {
                want.depth_bias = pick(
                    DynamicStates::DEPTH_BIAS,
                    values.depth_bias,
                    [s.depth_bias.constant, s.depth_bias.clamp, s.depth_bias.slope],
                );
            }

            want.multisample = Some(s.multisample.enabled);
            want.alpha_to_coverage = Some(s.multisample.alpha_to_coverage);
            want.alpha_to_one = Some(s.multisample.alpha_to_one);
            if self.caps.contains(Capabilities::SAMPLE_SHADING) {
                want.sample_shading_enabled = Some(s.multisample.sample_shading.is_some());
                want.min_sample_shading = s.multisample.sample_shading;
            }
            want.sample_mask_enabled = Some(s.multisample.sample_mask.is_some());
            want.sample_mask = s.multisample.sample_mask;

            want.depth_test = Some(s.depth.test);
            want.depth_write = Some(s.depth.write);
            want.depth_func = Some(s.depth.compare);

            want.stencil_test = Some(s.stencil.enabled);
            for (index, face) in [s.stencil.front, s.stencil.back].into_iter().enumerate() {
                let compare_mask = if dynamic.contains(DynamicStates::STENCIL_COMPARE_MASK) {
                    values.stencil_compare_mask[index]
                } else {
                    Some(face.compare_mask)
                };
                let reference = if dynamic.contains(DynamicStates::STENCIL_REFERENCE) {
                    values.stencil_reference[index]
                } else {
                    Some(face.reference)
                };
                want.stencil_func[index] = compare_mask
                    .zip(reference)
                    .map(|(mask, reference)| (face.compare, reference, mask));
                want.stencil_ops[index] = Some((face.fail, face.depth_fail, face.pass));
                want.stencil_write_mask[index] = if dynamic.contains(DynamicStates::STENCIL_WRITE_MASK) {
                    values.stencil_write_mask[index]
                } else {
                    Some(face.write_mask)
                };
            }

            want.logic_op_enabled = Some(s.blend.logic_op.is_some());
            want.logic_op = s.blend.logic_op;
            if !s.blend.attachments.is_empty() {
                want.blend = Some(s.blend.attachments.clone());
                want.color_masks = Some(s.blend.attachments.iter().map(|a| a.write_mask).collect());
            }
            want.blend_constants = if dynamic.contains(DynamicStates::BLEND_CONSTANTS) {
                values.blend_constants
            } else {
                Some(s.blend.constants)
            };

            if self.caps.contains(Capabilities::TESSELLATION) {
                want.patch_vertices = s.patch_control_points;
            }
            want.primitive_restart = Some(s.primitive_restart);
            want.scissor_test = Some(true);

            let viewports = if dynamic.contains(DynamicStates::VIEWPORT) {
                values.viewports.clone()
            } else {
                Some(s.viewports.clone())
            };
            want.viewports = viewports
                .filter(|v| !v.is_empty())
                .map(|v| v.iter().map(|vp| self.viewport_rect(vp)).collect());
            let scissors = if dynamic.contains(DynamicStates::SCISSOR) {
                values.scissors.clone()
            } else {
                Some(s.scissors.clone())
            };
            want.scissors = scissors
                .filter(|v| !v.is_empty())
                .map(|v| v.iter().map(|sc| self.scissor_rect(sc)).collect());
        }

        if let Some(bracket) = frame.clear {
            want.discard = Some(false);
            want.scissor_test = Some(true);
            want.scissors = Some(vec![self.scissor_rect(&bracket.area)]);
            let count = bracket.color_attachments.max(1) as usize;
            want.color_masks = Some(vec![[true; 4]; count]);
            want.depth_write = Some(true);
            want.stencil_write_mask = [Some(u32::MAX); 2];
        }
        want
    }

    #[allow(clippy::cast_precision_loss)]
    fn viewport_rect(&self, v: &Viewport) -> (ViewportRect, DepthRange) {
        // Negative heights flip the viewport; normalize to a positive rect
        let (y, height) = if v.height < 0.0 {
            (v.y + v.height, -v.height)
        } else {
            (v.y, v.height)
        };
        let y = if self.flips_y() {
            self.target_height as f32 - (y + height)
        } else {
            y
        };
        (
            ViewportRect {
                x: v.x,
                y,
                width: v.width,
                height,
            },
            [v.min_depth, v.max_depth],
        )
    }

    #[allow(clippy::cast_possible_wrap, clippy::cast_possible_truncation)]
    fn scissor_rect(&self, s: &Scissor) -> ScissorRect {
        let height = s.height.min(i32::MAX as u32) as i32;
        let y = if self.flips_y() {
            let top = self.target_height.min(i32::MAX as u32) as i32;
            top.saturating_sub(s.y.saturating_add(height))
        } else {
            s.y
        };
        ScissorRect {
            x: s.x,
            y,
            width: s.width.min(i32::MAX as u32) as i32,
            height,
        }
    }
}

fn splice<T: Copy + Default>(values: &mut Vec<T>, first: usize, items: &[T]) {
    if values.len() < first + items.len() {
        values.resize(first + items.len(), T::default());
    }
    values[first..first + items.len()].copy_from_slice(items);
}

fn face_indices(faces: vk::StencilFaceFlags) -> impl Iterator<Item = usize> {
    let front = faces.contains(vk::StencilFaceFlags::FRONT).then_some(0);
    let back = faces.contains(vk::StencilFaceFlags::BACK).then_some(1);
    front.into_iter().chain(back)
}

/// Element-wise array sync; a length change re-emits every element.
/// Without indexed support only the first element is applied, unindexed.
#[allow(clippy::cast_possible_truncation)]
fn sync_array<T: Clone + PartialEq>(
    live: &mut Option<Vec<T>>,
    want: &[T],
    indexed: bool,
    mut emit: impl FnMut(Option<u32>, &T),
) -> DiffStats {
    let want = if indexed { want } else { &want[..want.len().min(1)] };
    let mut stats = DiffStats::default();
    let known = live.as_ref().filter(|l| l.len() == want.len());
    for (index, value) in want.iter().enumerate() {
        if known.map_or(true, |l| l[index] != *value) {
            emit(indexed.then_some(index as u32), value);
            stats.calls += 1;
        }
    }
    *live = Some(want.to_vec());
    stats
}

#[allow(clippy::cast_possible_truncation)]
fn sync_viewports(
    driver: &mut dyn GlDriver,
    caps: Capabilities,
    live: &mut Option<Vec<(ViewportRect, DepthRange)>>,
    want: &[(ViewportRect, DepthRange)],
) -> DiffStats {
    let indexed = caps.contains(Capabilities::VIEWPORT_ARRAY);
    let want = if indexed { want } else { &want[..want.len().min(1)] };
    let mut stats = DiffStats::default();
    let known = live.as_ref().filter(|l| l.len() == want.len());
    for (index, (rect, range)) in want.iter().enumerate() {
        let slot = indexed.then_some(index as u32);
        let previous = known.map(|l| l[index]);
        if previous.map(|p| p.0) != Some(*rect) {
            driver.viewport(slot, *rect);
            stats.calls += 1;
        }
        if previous.map(|p| p.1) != Some(*range) {
            driver.depth_range(slot, range[0], range[1]);
            stats.calls += 1;
        }
    }
    *live = Some(want.to_vec());
    stats
}

#[allow(clippy::cast_possible_truncation)]
fn sync_blend(
    driver: &mut dyn GlDriver,
    caps: Capabilities,
    live: &mut Option<Vec<AttachmentBlend>>,
    want: &[AttachmentBlend],
) -> DiffStats {
    let indexed = caps.contains(Capabilities::INDEXED_BLEND);
    let want = if indexed { want } else { &want[..want.len().min(1)] };
    let mut stats = DiffStats::default();
    let known = live.as_ref().filter(|l| l.len() == want.len());
    for (index, blend) in want.iter().enumerate() {
        let slot = indexed.then_some(index as u32);
        let previous = known.map(|l| l[index]);
        if previous.map(|p| p.enabled) != Some(blend.enabled) {
            match slot {
                Some(i) => driver.set_capability_indexed(Capability::Blend, i, blend.enabled),
                None => driver.set_capability(Capability::Blend, blend.enabled),
            }
            stats.calls += 1;
        }
        if previous.map(|p| p.factors) != Some(blend.factors) {
            driver.blend_func(slot, blend.factors);
            stats.calls += 1;
        }
        if previous.map(|p| (p.color_equation, p.alpha_equation))
            != Some((blend.color_equation, blend.alpha_equation))
        {
            driver.blend_equation(slot, blend.color_equation, blend.alpha_equation);
            stats.calls += 1;
        }
    }
    *live = Some(want.to_vec());
    stats
}

fn sync_color_masks(
    driver: &mut dyn GlDriver,
    caps: Capabilities,
    live: &mut Option<Vec<[bool; 4]>>,
    want: &[[bool; 4]],
) -> DiffStats {
    sync_array(
        live,
        want,
        caps.contains(Capabilities::INDEXED_BLEND),
        |index, mask| driver.color_mask(index, *mask),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::gl::driver::BlendFactor;
    use crate::backends::noop::{GlCall, NoopDriver};
    use crate::core::info::{ColorBlendState, DepthStencilState, InputAssemblyState, ViewportState};

    fn snapshot(dynamic: &[vk::DynamicState], depth_test: bool) -> Arc<ContextStateSnapshot> {
        let viewports = [vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: 64.0,
            height: 32.0,
            min_depth: 0.0,
            max_depth: 1.0,
        }];
        let scissors = [vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: vk::Extent2D { width: 64, height: 32 },
        }];
        let blend = [vk::PipelineColorBlendAttachmentState {
            blend_enable: vk::TRUE,
            src_color_blend_factor: vk::BlendFactor::SRC_ALPHA,
            dst_color_blend_factor: vk::BlendFactor::ONE_MINUS_SRC_ALPHA,
            color_blend_op: vk::BlendOp::ADD,
            src_alpha_blend_factor: vk::BlendFactor::ONE,
            dst_alpha_blend_factor: vk::BlendFactor::ZERO,
            alpha_blend_op: vk::BlendOp::ADD,
            color_write_mask: vk::ColorComponentFlags::RGBA,
        }];
        let info = GraphicsPipelineCreateInfo {
            stages: &[],
            vertex_input: Default::default(),
            input_assembly: InputAssemblyState {
                topology: vk::PrimitiveTopology::TRIANGLE_LIST,
                primitive_restart_enable: false,
            },
            tessellation: None,
            viewport: Some(ViewportState {
                viewports: &viewports,
                scissors: &scissors,
            }),
            rasterization: Default::default(),
            multisample: None,
            depth_stencil: Some(DepthStencilState {
                depth_test_enable: depth_test,
                depth_write_enable: depth_test,
                depth_compare_op: vk::CompareOp::LESS,
                ..Default::default()
            }),
            color_blend: Some(ColorBlendState {
                attachments: &blend,
                ..Default::default()
            }),
            dynamic_states: dynamic,
            layout: vk::PipelineLayout::null(),
            render_pass: vk::RenderPass::null(),
            subpass: 0,
        };
        Arc::new(ContextStateSnapshot::new(&info))
    }

    #[test]
    fn test_snapshot_conversion() {
        let s = snapshot(&[vk::DynamicState::VIEWPORT], true);
        assert_eq!(s.dynamic, DynamicStates::VIEWPORT);
        assert_eq!(s.depth.compare, CompareFunc::Less);
        assert_eq!(s.blend.attachments[0].factors.src_rgb, BlendFactor::SrcAlpha);
        assert_eq!(s.raster.cull, None);
        assert_eq!(s.topology, Topology::Triangles);
    }

    #[test]
    fn test_flipped_scissor_saturates() {
        let mut stack = StateStack::new(Capabilities::empty());
        stack.set_target_height(64);
        let flipped = stack.scissor_rect(&Scissor {
            x: 0,
            y: 8,
            width: 16,
            height: 16,
        });
        assert_eq!(flipped.y, 40);

        let extreme = stack.scissor_rect(&Scissor {
            x: 0,
            y: i32::MAX,
            width: 1,
            height: u32::MAX,
        });
        assert_eq!(extreme.y, 64 - i32::MAX);
    }

    #[test]
    fn test_rebinding_same_snapshot_emits_nothing() {
        let (mut driver, log) = NoopDriver::standalone();
        let mut stack = StateStack::new(Capabilities::all());
        let s = snapshot(&[], true);

        let first = stack.bind(&mut driver, &s);
        assert!(first.calls > 0);
        assert_eq!(first.calls, log.len());

        let second = stack.bind(&mut driver, &s);
        assert_eq!(second.calls, 0);
        assert_eq!(log.len(), first.calls);
    }

    #[test]
    fn test_only_changed_fields_are_emitted() {
        let (mut driver, log) = NoopDriver::standalone();
        let mut stack = StateStack::new(Capabilities::all());
        stack.bind(&mut driver, &snapshot(&[], true));
        log.clear();

        let stats = stack.bind(&mut driver, &snapshot(&[], false));
        assert_eq!(stats.calls, 2);
        assert_eq!(
            log.calls(),
            vec![
                GlCall::SetCapability(Capability::DepthTest, false),
                GlCall::DepthMask(false),
            ]
        );
    }

    #[test]
    fn test_dynamic_viewport_follows_set_calls() {
        let (mut driver, log) = NoopDriver::standalone();
        let mut stack = StateStack::new(Capabilities::all());
        stack.bind(&mut driver, &snapshot(&[vk::DynamicState::VIEWPORT], true));
        assert!(!log.calls().iter().any(|c| matches!(c, GlCall::Viewport(..))));

        let vp = Viewport {
            width: 16.0,
            height: 16.0,
            max_depth: 1.0,
            ..Viewport::default()
        };
        let stats = stack.set_viewports(&mut driver, 0, &[vp]);
        assert_eq!(stats.calls, 2);
        assert_eq!(stack.set_viewports(&mut driver, 0, &[vp]).calls, 0);

        // Rebinding the pipeline keeps the dynamic value
        assert_eq!(stack.bind(&mut driver, &snapshot(&[vk::DynamicState::VIEWPORT], true)).calls, 0);
    }

    #[test]
    fn test_viewport_length_change_is_full_change() {
        let (mut driver, _log) = NoopDriver::standalone();
        let mut stack = StateStack::new(Capabilities::all());
        stack.bind(&mut driver, &snapshot(&[vk::DynamicState::VIEWPORT], true));
        let vp = Viewport {
            width: 8.0,
            height: 8.0,
            ..Viewport::default()
        };
        stack.set_viewports(&mut driver, 0, &[vp]);
        // Appending a second viewport re-emits both (rect + depth range each)
        assert_eq!(stack.set_viewports(&mut driver, 1, &[vp]).calls, 4);
    }

    #[test]
    fn test_clear_bracket_restores_state() {
        let (mut driver, log) = NoopDriver::standalone();
        let mut stack = StateStack::new(Capabilities::all());
        let s = snapshot(&[], true);
        stack.bind(&mut driver, &s);
        log.clear();

        let area = Scissor {
            x: 4,
            y: 4,
            width: 8,
            height: 8,
        };
        let pushed = stack.push_clear(&mut driver, area, 1);
        assert!(pushed.calls > 0);
        assert!(log
            .calls()
            .contains(&GlCall::Scissor(Some(0), ScissorRect { x: 4, y: 4, width: 8, height: 8 })));

        let popped = stack.pop(&mut driver).unwrap();
        assert!(popped.calls > 0);
        assert_eq!(stack.depth(), 1);
        assert_eq!(stack.bind(&mut driver, &s).calls, 0);
        assert!(stack.pop(&mut driver).unwrap_err().is_contract_violation());
    }

    #[test]
    fn test_y_flip_without_clip_control() {
        let (mut driver, log) = NoopDriver::standalone();
        let mut stack = StateStack::new(Capabilities::empty());
        stack.set_target_height(100);
        stack.bind(&mut driver, &snapshot(&[], true));
        assert!(log.calls().contains(&GlCall::Viewport(
            None,
            ViewportRect { x: 0.0, y: 68.0, width: 64.0, height: 32.0 }
        )));

        // A new target height invalidates the applied rectangles
        log.clear();
        stack.set_target_height(50);
        let stats = stack.apply(&mut driver);
        assert_eq!(stats.calls, 3);
    }
}
