//! Software backend that records driver traffic instead of rendering
//!
//! [`NoopPlatform`] hands out headless contexts whose [`NoopDriver`] logs
//! every call into a shared [`CallLog`] and keeps buffer contents in host
//! memory, so copies and readbacks behave like a real driver. Textures and
//! programs are names only. [`NoopProbe`] lets tests look inside.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ash::vk;
use parking_lot::Mutex;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};

use crate::backends::gl::driver::{
    AttachmentPoint, BarrierBits, BlendEquation, BlendFactors, BufferName, Capability, ClearMask,
    CompareFunc, DrawBuffer, DriverInfo, DriverMessage, Face, Filter, FramebufferName,
    FramebufferStatus, FramebufferTarget, GlDriver, GlError, GlResult, IndexType,
    IndexedBufferTarget, LogicOp, PolygonMode, ProgramName, SamplerDesc, SamplerName,
    ScissorRect, ShaderSource, StencilOp, TextureDesc, TextureName, TextureRegion, TextureTarget,
    TextureViewDesc, Topology, VertexArrayName, VertexAttrib, ViewportRect, Winding,
};
use crate::backends::gl::format::GlFormat;
use crate::backends::{ContextProvider, NativeSurface, Platform, PlatformError};
use crate::core::info::ClearColorValue;
use crate::core::shader::{parse_entry_points, CompileRequest, ShaderCompiler, ShaderError, ShaderStage};

/// One recorded driver call
#[derive(Debug, Clone, PartialEq)]
#[allow(missing_docs)]
pub enum GlCall {
    SetCapability(Capability, bool),
    SetCapabilityIndexed(Capability, u32, bool),
    CullFace(Face),
    FrontFace(Winding),
    PolygonMode(PolygonMode),
    LineWidth(f32),
    PolygonOffset { factor: f32, units: f32, clamp: f32 },
    DepthFunc(CompareFunc),
    DepthMask(bool),
    DepthRange(Option<u32>, f32, f32),
    StencilFunc(Face, CompareFunc, u32, u32),
    StencilOp(Face, StencilOp, StencilOp, StencilOp),
    StencilMask(Face, u32),
    BlendFunc(Option<u32>, BlendFactors),
    BlendEquation(Option<u32>, BlendEquation, BlendEquation),
    ColorMask(Option<u32>, [bool; 4]),
    BlendColor([f32; 4]),
    LogicOp(LogicOp),
    SampleMask(u32),
    MinSampleShading(f32),
    PatchVertices(u32),
    Viewport(Option<u32>, ViewportRect),
    Scissor(Option<u32>, ScissorRect),
    ClipControl { upper_left: bool, zero_to_one: bool },
    CreateBuffer(BufferName, u64),
    DeleteBuffer(BufferName),
    BufferSubData { buffer: BufferName, offset: u64, len: usize },
    GetBufferSubData { buffer: BufferName, offset: u64, len: usize },
    CopyBufferSubData { src: BufferName, dst: BufferName, src_offset: u64, dst_offset: u64, size: u64 },
    ClearBufferSubData { buffer: BufferName, offset: u64, size: u64, pattern: u32 },
    BindBufferRange { target: IndexedBufferTarget, index: u32, buffer: Option<BufferName>, offset: u64, size: u64 },
    CreateTexture(TextureName, TextureDesc),
    CreateTextureView { view: TextureName, source: TextureName, desc: TextureViewDesc },
    DeleteTexture(TextureName),
    UploadTexture { texture: TextureName, region: TextureRegion, source: BufferName, offset: u64 },
    DownloadTexture { texture: TextureName, region: TextureRegion, destination: BufferName, offset: u64 },
    CopyTexture { src: TextureName, dst: TextureName, src_region: TextureRegion, dst_region: TextureRegion },
    BindTextureUnit(u32, TextureTarget, Option<TextureName>),
    BindImageUnit(u32, Option<TextureName>, u32),
    CreateSampler(SamplerName),
    DeleteSampler(SamplerName),
    BindSampler(u32, Option<SamplerName>),
    CreateVertexArray(VertexArrayName),
    DeleteVertexArray(VertexArrayName),
    BindVertexArray(Option<VertexArrayName>),
    VertexAttrib(VertexAttrib),
    BindElementBuffer(Option<BufferName>),
    CreateFramebuffer(FramebufferName),
    DeleteFramebuffer(FramebufferName),
    BindFramebuffer(FramebufferTarget, Option<FramebufferName>),
    FramebufferTexture { framebuffer: FramebufferName, point: AttachmentPoint, texture: TextureName, level: u32, layer: Option<u32> },
    CheckFramebufferStatus(FramebufferName),
    DrawBuffers(Vec<DrawBuffer>),
    ReadBuffer(DrawBuffer),
    InvalidateFramebuffer(FramebufferTarget, Vec<AttachmentPoint>),
    BlitFramebuffer { src: [i32; 4], dst: [i32; 4], mask: ClearMask, filter: Filter },
    ClearBufferColor(u32, ClearColorValue),
    ClearBufferDepthStencil(Option<f32>, Option<u32>),
    ClearColor([f32; 4]),
    ClearDepth(f32),
    ClearStencil(u32),
    Clear(ClearMask),
    CreateProgram(ProgramName, Vec<ShaderStage>),
    DeleteProgram(ProgramName),
    UseProgram(Option<ProgramName>),
    DrawArrays { mode: Topology, first: u32, count: u32, instances: u32, base_instance: u32 },
    DrawElements { mode: Topology, count: u32, index_type: IndexType, offset: u64, instances: u32, base_vertex: i32, base_instance: u32 },
    DrawArraysIndirect { mode: Topology, buffer: BufferName, offset: u64, draw_count: u32, stride: u32 },
    DrawElementsIndirect { mode: Topology, index_type: IndexType, buffer: BufferName, offset: u64, draw_count: u32, stride: u32 },
    DispatchCompute(u32, u32, u32),
    DispatchComputeIndirect(BufferName, u64),
    MemoryBarrier(BarrierBits),
    Flush,
    Finish,
}

impl GlCall {
    /// Whether the call is a draw of any kind
    pub fn is_draw(&self) -> bool {
        matches!(
            self,
            Self::DrawArrays { .. }
                | Self::DrawElements { .. }
                | Self::DrawArraysIndirect { .. }
                | Self::DrawElementsIndirect { .. }
        )
    }

    /// Whether the call clears an attachment or the window
    pub fn is_clear(&self) -> bool {
        matches!(
            self,
            Self::ClearBufferColor(..) | Self::ClearBufferDepthStencil(..) | Self::Clear(_)
        )
    }
}

/// Shared, append-only log of driver calls
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    calls: Arc<Mutex<Vec<GlCall>>>,
}

impl CallLog {
    /// Create an empty log
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, call: GlCall) {
        log::trace!("gl: {call:?}");
        self.calls.lock().push(call);
    }

    /// Number of recorded calls
    pub fn len(&self) -> usize {
        self.calls.lock().len()
    }

    /// Whether nothing was recorded
    pub fn is_empty(&self) -> bool {
        self.calls.lock().is_empty()
    }

    /// Copy of every recorded call
    pub fn calls(&self) -> Vec<GlCall> {
        self.calls.lock().clone()
    }

    /// Number of recorded calls matching `pred`
    pub fn count(&self, pred: impl Fn(&GlCall) -> bool) -> usize {
        self.calls.lock().iter().filter(|call| pred(call)).count()
    }

    /// Forget everything recorded so far
    pub fn clear(&self) {
        self.calls.lock().clear();
    }
}

/// Recording driver
pub struct NoopDriver {
    info: DriverInfo,
    log: CallLog,
    messages: Arc<Mutex<Vec<DriverMessage>>>,
    next_name: u32,
    buffers: HashMap<BufferName, Vec<u8>>,
    framebuffer_attachments: HashMap<FramebufferName, usize>,
}

impl NoopDriver {
    /// Driver reporting `info` and logging into `log`
    pub fn new(info: DriverInfo, log: CallLog) -> Self {
        Self {
            info,
            log,
            messages: Arc::default(),
            next_name: 0,
            buffers: HashMap::new(),
            framebuffer_attachments: HashMap::new(),
        }
    }

    /// A 4.6 driver not attached to any platform, and its log
    pub fn standalone() -> (Self, CallLog) {
        let log = CallLog::new();
        (Self::new(noop_info((4, 6)), log.clone()), log)
    }

    fn name(&mut self) -> u32 {
        self.next_name += 1;
        self.next_name
    }

    fn buffer_range(&mut self, buffer: BufferName, offset: u64, len: u64) -> Option<&mut [u8]> {
        let data = self.buffers.get_mut(&buffer)?;
        let start = usize::try_from(offset).ok()?;
        let end = start.checked_add(usize::try_from(len).ok()?)?;
        data.get_mut(start..end)
    }
}

fn noop_info(version: (u32, u32)) -> DriverInfo {
    DriverInfo {
        vendor: "vkgl".to_string(),
        renderer: "noop".to_string(),
        version,
        extensions: Vec::new(),
    }
}

impl GlDriver for NoopDriver {
    fn info(&self) -> &DriverInfo {
        &self.info
    }

    fn set_capability(&mut self, cap: Capability, enabled: bool) {
        self.log.push(GlCall::SetCapability(cap, enabled));
    }

    fn set_capability_indexed(&mut self, cap: Capability, index: u32, enabled: bool) {
        self.log.push(GlCall::SetCapabilityIndexed(cap, index, enabled));
    }

    fn cull_face(&mut self, face: Face) {
        self.log.push(GlCall::CullFace(face));
    }

    fn front_face(&mut self, winding: Winding) {
        self.log.push(GlCall::FrontFace(winding));
    }

    fn polygon_mode(&mut self, mode: PolygonMode) {
        self.log.push(GlCall::PolygonMode(mode));
    }

    fn line_width(&mut self, width: f32) {
        self.log.push(GlCall::LineWidth(width));
    }

    fn polygon_offset(&mut self, factor: f32, units: f32, clamp: f32) {
        self.log.push(GlCall::PolygonOffset { factor, units, clamp });
    }

    fn depth_func(&mut self, func: CompareFunc) {
        self.log.push(GlCall::DepthFunc(func));
    }

    fn depth_mask(&mut self, write: bool) {
        self.log.push(GlCall::DepthMask(write));
    }

    fn depth_range(&mut self, index: Option<u32>, near: f32, far: f32) {
        self.log.push(GlCall::DepthRange(index, near, far));
    }

    fn stencil_func(&mut self, face: Face, func: CompareFunc, reference: u32, mask: u32) {
        self.log.push(GlCall::StencilFunc(face, func, reference, mask));
    }

    fn stencil_op(&mut self, face: Face, fail: StencilOp, depth_fail: StencilOp, pass: StencilOp) {
        self.log.push(GlCall::StencilOp(face, fail, depth_fail, pass));
    }

    fn stencil_mask(&mut self, face: Face, mask: u32) {
        self.log.push(GlCall::StencilMask(face, mask));
    }

    fn blend_func(&mut self, draw_buffer: Option<u32>, factors: BlendFactors) {
        self.log.push(GlCall::BlendFunc(draw_buffer, factors));
    }

    fn blend_equation(&mut self, draw_buffer: Option<u32>, rgb: BlendEquation, alpha: BlendEquation) {
        self.log.push(GlCall::BlendEquation(draw_buffer, rgb, alpha));
    }

    fn color_mask(&mut self, draw_buffer: Option<u32>, mask: [bool; 4]) {
        self.log.push(GlCall::ColorMask(draw_buffer, mask));
    }

    fn blend_color(&mut self, color: [f32; 4]) {
        self.log.push(GlCall::BlendColor(color));
    }

    fn logic_op(&mut self, op: LogicOp) {
        self.log.push(GlCall::LogicOp(op));
    }

    fn sample_mask(&mut self, mask: u32) {
        self.log.push(GlCall::SampleMask(mask));
    }

    fn min_sample_shading(&mut self, value: f32) {
        self.log.push(GlCall::MinSampleShading(value));
    }

    fn patch_vertices(&mut self, count: u32) {
        self.log.push(GlCall::PatchVertices(count));
    }

    fn viewport(&mut self, index: Option<u32>, rect: ViewportRect) {
        self.log.push(GlCall::Viewport(index, rect));
    }

    fn scissor(&mut self, index: Option<u32>, rect: ScissorRect) {
        self.log.push(GlCall::Scissor(index, rect));
    }

    fn clip_control(&mut self, upper_left: bool, zero_to_one: bool) {
        self.log.push(GlCall::ClipControl { upper_left, zero_to_one });
    }

    fn create_buffer(&mut self, size: u64) -> GlResult<BufferName> {
        let len = usize::try_from(size).map_err(|_| GlError::OutOfMemory)?;
        let name = BufferName(self.name());
        self.buffers.insert(name, vec![0; len]);
        self.log.push(GlCall::CreateBuffer(name, size));
        Ok(name)
    }

    fn delete_buffer(&mut self, buffer: BufferName) {
        self.buffers.remove(&buffer);
        self.log.push(GlCall::DeleteBuffer(buffer));
    }

    fn buffer_sub_data(&mut self, buffer: BufferName, offset: u64, data: &[u8]) {
        if let Some(range) = self.buffer_range(buffer, offset, data.len() as u64) {
            range.copy_from_slice(data);
        }
        self.log.push(GlCall::BufferSubData { buffer, offset, len: data.len() });
    }

    fn get_buffer_sub_data(&mut self, buffer: BufferName, offset: u64, out: &mut [u8]) {
        if let Some(range) = self.buffer_range(buffer, offset, out.len() as u64) {
            out.copy_from_slice(range);
        }
        self.log.push(GlCall::GetBufferSubData { buffer, offset, len: out.len() });
    }

    fn copy_buffer_sub_data(
        &mut self,
        src: BufferName,
        dst: BufferName,
        src_offset: u64,
        dst_offset: u64,
        size: u64,
    ) {
        let bytes = self
            .buffer_range(src, src_offset, size)
            .map(|range| range.to_vec());
        if let (Some(bytes), Some(target)) = (bytes, self.buffer_range(dst, dst_offset, size)) {
            target.copy_from_slice(&bytes);
        }
        self.log.push(GlCall::CopyBufferSubData {
            src,
            dst,
            src_offset,
            dst_offset,
            size,
        });
    }

    fn clear_buffer_sub_data(&mut self, buffer: BufferName, offset: u64, size: u64, pattern: u32) {
        if let Some(range) = self.buffer_range(buffer, offset, size) {
            for (index, byte) in range.iter_mut().enumerate() {
                *byte = pattern.to_le_bytes()[index % 4];
            }
        }
        self.log.push(GlCall::ClearBufferSubData {
            buffer,
            offset,
            size,
            pattern,
        });
    }

    fn bind_buffer_range(
        &mut self,
        target: IndexedBufferTarget,
        index: u32,
        buffer: Option<BufferName>,
        offset: u64,
        size: u64,
    ) {
        self.log.push(GlCall::BindBufferRange {
            target,
            index,
            buffer,
            offset,
            size,
        });
    }

    fn create_texture(&mut self, desc: &TextureDesc) -> GlResult<TextureName> {
        let name = TextureName(self.name());
        self.log.push(GlCall::CreateTexture(name, desc.clone()));
        Ok(name)
    }

    fn create_texture_view(
        &mut self,
        source: TextureName,
        desc: &TextureViewDesc,
    ) -> GlResult<TextureName> {
        let view = TextureName(self.name());
        self.log.push(GlCall::CreateTextureView {
            view,
            source,
            desc: desc.clone(),
        });
        Ok(view)
    }

    fn delete_texture(&mut self, texture: TextureName) {
        self.log.push(GlCall::DeleteTexture(texture));
    }

    fn upload_texture(
        &mut self,
        texture: TextureName,
        _target: TextureTarget,
        region: &TextureRegion,
        _format: &GlFormat,
        source: BufferName,
        offset: u64,
    ) {
        self.log.push(GlCall::UploadTexture {
            texture,
            region: *region,
            source,
            offset,
        });
    }

    fn download_texture(
        &mut self,
        texture: TextureName,
        _target: TextureTarget,
        region: &TextureRegion,
        _format: &GlFormat,
        destination: BufferName,
        offset: u64,
    ) {
        self.log.push(GlCall::DownloadTexture {
            texture,
            region: *region,
            destination,
            offset,
        });
    }

    fn copy_texture(
        &mut self,
        src: TextureName,
        _src_target: TextureTarget,
        src_region: &TextureRegion,
        dst: TextureName,
        _dst_target: TextureTarget,
        dst_region: &TextureRegion,
    ) {
        self.log.push(GlCall::CopyTexture {
            src,
            dst,
            src_region: *src_region,
            dst_region: *dst_region,
        });
    }

    fn bind_texture_unit(&mut self, unit: u32, target: TextureTarget, texture: Option<TextureName>) {
        self.log.push(GlCall::BindTextureUnit(unit, target, texture));
    }

    fn bind_image_unit(&mut self, unit: u32, texture: Option<TextureName>, level: u32, _format: &GlFormat) {
        self.log.push(GlCall::BindImageUnit(unit, texture, level));
    }

    fn create_sampler(&mut self, _desc: &SamplerDesc) -> GlResult<SamplerName> {
        let name = SamplerName(self.name());
        self.log.push(GlCall::CreateSampler(name));
        Ok(name)
    }

    fn delete_sampler(&mut self, sampler: SamplerName) {
        self.log.push(GlCall::DeleteSampler(sampler));
    }

    fn bind_sampler(&mut self, unit: u32, sampler: Option<SamplerName>) {
        self.log.push(GlCall::BindSampler(unit, sampler));
    }

    fn create_vertex_array(&mut self) -> GlResult<VertexArrayName> {
        let name = VertexArrayName(self.name());
        self.log.push(GlCall::CreateVertexArray(name));
        Ok(name)
    }

    fn delete_vertex_array(&mut self, vertex_array: VertexArrayName) {
        self.log.push(GlCall::DeleteVertexArray(vertex_array));
    }

    fn bind_vertex_array(&mut self, vertex_array: Option<VertexArrayName>) {
        self.log.push(GlCall::BindVertexArray(vertex_array));
    }

    fn vertex_attrib(&mut self, attrib: &VertexAttrib) {
        self.log.push(GlCall::VertexAttrib(*attrib));
    }

    fn bind_element_buffer(&mut self, buffer: Option<BufferName>) {
        self.log.push(GlCall::BindElementBuffer(buffer));
    }

    fn create_framebuffer(&mut self) -> GlResult<FramebufferName> {
        let name = FramebufferName(self.name());
        self.framebuffer_attachments.insert(name, 0);
        self.log.push(GlCall::CreateFramebuffer(name));
        Ok(name)
    }

    fn delete_framebuffer(&mut self, framebuffer: FramebufferName) {
        self.framebuffer_attachments.remove(&framebuffer);
        self.log.push(GlCall::DeleteFramebuffer(framebuffer));
    }

    fn bind_framebuffer(&mut self, target: FramebufferTarget, framebuffer: Option<FramebufferName>) {
        self.log.push(GlCall::BindFramebuffer(target, framebuffer));
    }

    fn framebuffer_texture(
        &mut self,
        framebuffer: FramebufferName,
        point: AttachmentPoint,
        texture: TextureName,
        level: u32,
        layer: Option<u32>,
    ) {
        *self.framebuffer_attachments.entry(framebuffer).or_default() += 1;
        self.log.push(GlCall::FramebufferTexture {
            framebuffer,
            point,
            texture,
            level,
            layer,
        });
    }

    fn check_framebuffer_status(&mut self, framebuffer: FramebufferName) -> FramebufferStatus {
        self.log.push(GlCall::CheckFramebufferStatus(framebuffer));
        match self.framebuffer_attachments.get(&framebuffer) {
            Some(count) if *count > 0 => FramebufferStatus::Complete,
            _ => FramebufferStatus::Incomplete("missing attachment".to_string()),
        }
    }

    fn draw_buffers(&mut self, buffers: &[DrawBuffer]) {
        self.log.push(GlCall::DrawBuffers(buffers.to_vec()));
    }

    fn read_buffer(&mut self, buffer: DrawBuffer) {
        self.log.push(GlCall::ReadBuffer(buffer));
    }

    fn invalidate_framebuffer(&mut self, target: FramebufferTarget, points: &[AttachmentPoint]) {
        self.log.push(GlCall::InvalidateFramebuffer(target, points.to_vec()));
    }

    fn blit_framebuffer(&mut self, src: [i32; 4], dst: [i32; 4], mask: ClearMask, filter: Filter) {
        self.log.push(GlCall::BlitFramebuffer {
            src,
            dst,
            mask,
            filter,
        });
    }

    fn clear_buffer_color(&mut self, draw_buffer: u32, value: ClearColorValue) {
        self.log.push(GlCall::ClearBufferColor(draw_buffer, value));
    }

    fn clear_buffer_depth_stencil(&mut self, depth: Option<f32>, stencil: Option<u32>) {
        self.log.push(GlCall::ClearBufferDepthStencil(depth, stencil));
    }

    fn clear_color(&mut self, rgba: [f32; 4]) {
        self.log.push(GlCall::ClearColor(rgba));
    }

    fn clear_depth(&mut self, depth: f32) {
        self.log.push(GlCall::ClearDepth(depth));
    }

    fn clear_stencil(&mut self, stencil: u32) {
        self.log.push(GlCall::ClearStencil(stencil));
    }

    fn clear(&mut self, mask: ClearMask) {
        self.log.push(GlCall::Clear(mask));
    }

    fn create_program(&mut self, stages: &[ShaderSource<'_>]) -> GlResult<ProgramName> {
        if stages.iter().any(|stage| stage.source.trim().is_empty()) {
            return Err(GlError::LinkFailed("empty shader source".to_string()));
        }
        let name = ProgramName(self.name());
        self.log.push(GlCall::CreateProgram(
            name,
            stages.iter().map(|stage| stage.stage).collect(),
        ));
        Ok(name)
    }

    fn delete_program(&mut self, program: ProgramName) {
        self.log.push(GlCall::DeleteProgram(program));
    }

    fn use_program(&mut self, program: Option<ProgramName>) {
        self.log.push(GlCall::UseProgram(program));
    }

    fn draw_arrays(&mut self, mode: Topology, first: u32, count: u32, instances: u32, base_instance: u32) {
        self.log.push(GlCall::DrawArrays {
            mode,
            first,
            count,
            instances,
            base_instance,
        });
    }

    fn draw_elements(
        &mut self,
        mode: Topology,
        count: u32,
        index_type: IndexType,
        offset: u64,
        instances: u32,
        base_vertex: i32,
        base_instance: u32,
    ) {
        self.log.push(GlCall::DrawElements {
            mode,
            count,
            index_type,
            offset,
            instances,
            base_vertex,
            base_instance,
        });
    }

    fn draw_arrays_indirect(
        &mut self,
        mode: Topology,
        buffer: BufferName,
        offset: u64,
        draw_count: u32,
        stride: u32,
    ) {
        self.log.push(GlCall::DrawArraysIndirect {
            mode,
            buffer,
            offset,
            draw_count,
            stride,
        });
    }

    fn draw_elements_indirect(
        &mut self,
        mode: Topology,
        index_type: IndexType,
        buffer: BufferName,
        offset: u64,
        draw_count: u32,
        stride: u32,
    ) {
        self.log.push(GlCall::DrawElementsIndirect {
            mode,
            index_type,
            buffer,
            offset,
            draw_count,
            stride,
        });
    }

    fn dispatch_compute(&mut self, x: u32, y: u32, z: u32) {
        self.log.push(GlCall::DispatchCompute(x, y, z));
    }

    fn dispatch_compute_indirect(&mut self, buffer: BufferName, offset: u64) {
        self.log.push(GlCall::DispatchComputeIndirect(buffer, offset));
    }

    fn memory_barrier(&mut self, bits: BarrierBits) {
        self.log.push(GlCall::MemoryBarrier(bits));
    }

    fn flush(&mut self) {
        self.log.push(GlCall::Flush);
    }

    fn finish(&mut self) -> GlResult<()> {
        self.log.push(GlCall::Finish);
        Ok(())
    }

    fn take_debug_messages(&mut self) -> Vec<DriverMessage> {
        std::mem::take(&mut *self.messages.lock())
    }
}

/// Context activity counted across every context of a platform
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContextCounters {
    /// Contexts created
    pub contexts: u32,
    /// `make_current` calls
    pub make_current: u32,
    /// `release_current` calls
    pub release_current: u32,
    /// Presented frames
    pub swap_buffers: u32,
    /// Drawable changes
    pub set_drawable: u32,
}

struct ProbeShared {
    version: (u32, u32),
    log: CallLog,
    counters: Mutex<ContextCounters>,
    messages: Arc<Mutex<Vec<DriverMessage>>>,
    extent: Mutex<vk::Extent2D>,
    next_surface: AtomicU64,
}

/// Test access to a [`NoopPlatform`]'s contexts and drivers
#[derive(Clone)]
pub struct NoopProbe {
    shared: Arc<ProbeShared>,
}

impl NoopProbe {
    /// Calls made by every driver of the platform
    pub fn calls(&self) -> CallLog {
        self.shared.log.clone()
    }

    /// Context activity so far
    pub fn context_counters(&self) -> ContextCounters {
        *self.shared.counters.lock()
    }

    /// Queue a message for the drivers' debug output
    pub fn push_debug_message(&self, message: DriverMessage) {
        self.shared.messages.lock().push(message);
    }

    /// Resize every surface of the platform
    pub fn set_surface_extent(&self, extent: vk::Extent2D) {
        *self.shared.extent.lock() = extent;
    }
}

/// Headless platform for the no-op backend
pub struct NoopPlatform {
    shared: Arc<ProbeShared>,
}

impl Default for NoopPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl NoopPlatform {
    /// Platform whose drivers report GL 4.6
    pub fn new() -> Self {
        Self::with_version((4, 6))
    }

    /// Platform whose drivers report the given core version
    pub fn with_version(version: (u32, u32)) -> Self {
        Self {
            shared: Arc::new(ProbeShared {
                version,
                log: CallLog::new(),
                counters: Mutex::default(),
                messages: Arc::default(),
                extent: Mutex::new(vk::Extent2D {
                    width: 640,
                    height: 480,
                }),
                next_surface: AtomicU64::new(1),
            }),
        }
    }

    /// Handle for inspecting this platform from tests
    pub fn probe(&self) -> NoopProbe {
        NoopProbe {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl Platform for NoopPlatform {
    fn name(&self) -> &str {
        "noop"
    }

    fn create_surface(
        &self,
        _display: RawDisplayHandle,
        _window: RawWindowHandle,
    ) -> Result<NativeSurface, PlatformError> {
        Ok(NativeSurface {
            token: self.shared.next_surface.fetch_add(1, Ordering::Relaxed),
        })
    }

    fn destroy_surface(&self, surface: NativeSurface) {
        log::debug!("Destroyed noop surface {}", surface.token);
    }

    fn surface_extent(&self, _surface: NativeSurface) -> Result<vk::Extent2D, PlatformError> {
        Ok(*self.shared.extent.lock())
    }

    fn create_context(&self) -> Result<Box<dyn ContextProvider>, PlatformError> {
        self.shared.counters.lock().contexts += 1;
        Ok(Box::new(NoopContext {
            shared: Arc::clone(&self.shared),
            drawable: None,
        }))
    }
}

struct NoopContext {
    shared: Arc<ProbeShared>,
    drawable: Option<NativeSurface>,
}

impl ContextProvider for NoopContext {
    fn make_current(&mut self) -> Result<(), PlatformError> {
        self.shared.counters.lock().make_current += 1;
        Ok(())
    }

    fn release_current(&mut self) -> Result<(), PlatformError> {
        self.shared.counters.lock().release_current += 1;
        Ok(())
    }

    fn load_driver(&mut self) -> Result<Box<dyn GlDriver>, PlatformError> {
        let mut driver = NoopDriver::new(noop_info(self.shared.version), self.shared.log.clone());
        driver.messages = Arc::clone(&self.shared.messages);
        Ok(Box::new(driver))
    }

    fn set_drawable(&mut self, surface: Option<NativeSurface>) -> Result<(), PlatformError> {
        self.shared.counters.lock().set_drawable += 1;
        self.drawable = surface;
        Ok(())
    }

    fn swap_buffers(&mut self) -> Result<(), PlatformError> {
        if self.drawable.is_none() {
            return Err(PlatformError::Present("no drawable selected".to_string()));
        }
        self.shared.counters.lock().swap_buffers += 1;
        Ok(())
    }
}

/// Cross compiler stand-in that emits an empty `main` per stage
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopShaderCompiler;

impl ShaderCompiler for NoopShaderCompiler {
    fn compile(&self, request: &CompileRequest<'_>) -> Result<String, ShaderError> {
        let declared = parse_entry_points(request.code)?;
        if !declared
            .iter()
            .any(|entry| entry.stage == request.stage && entry.name == request.entry_point)
        {
            return Err(ShaderError::MissingEntryPoint {
                name: request.entry_point.to_string(),
                stage: request.stage,
            });
        }
        Ok(format!(
            "#version {} core\n// {:?} stage, entry point {}, {} bindings\nvoid main() {{}}\n",
            request.target.version,
            request.stage,
            request.entry_point,
            request.target.bindings.len()
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::shader::{spirv_with_entry_points, GlslTarget};

    #[test]
    fn test_buffer_contents_are_emulated() {
        let (mut driver, log) = NoopDriver::standalone();
        let a = driver.create_buffer(8).unwrap();
        let b = driver.create_buffer(8).unwrap();
        driver.buffer_sub_data(a, 0, &[1, 2, 3, 4]);
        driver.copy_buffer_sub_data(a, b, 0, 4, 4);

        let mut out = [0u8; 8];
        driver.get_buffer_sub_data(b, 0, &mut out);
        assert_eq!(out, [0, 0, 0, 0, 1, 2, 3, 4]);

        driver.clear_buffer_sub_data(b, 0, 4, 0x0403_0201);
        driver.get_buffer_sub_data(b, 0, &mut out);
        assert_eq!(&out[..4], &[1, 2, 3, 4]);
        assert_eq!(log.count(|call| matches!(call, GlCall::CreateBuffer(..))), 2);
    }

    #[test]
    fn test_empty_framebuffer_is_incomplete() {
        let (mut driver, _log) = NoopDriver::standalone();
        let fbo = driver.create_framebuffer().unwrap();
        assert!(matches!(
            driver.check_framebuffer_status(fbo),
            FramebufferStatus::Incomplete(_)
        ));
    }

    #[test]
    fn test_present_needs_drawable() {
        let platform = NoopPlatform::new();
        let mut context = platform.create_context().unwrap();
        assert!(context.swap_buffers().is_err());
        context
            .set_drawable(Some(NativeSurface { token: 1 }))
            .unwrap();
        context.swap_buffers().unwrap();
        assert_eq!(platform.probe().context_counters().swap_buffers, 1);
    }

    #[test]
    fn test_compiler_checks_entry_point() {
        let code = spirv_with_entry_points(&[(ShaderStage::Vertex, "main")]);
        let target = GlslTarget {
            version: 450,
            bindings: Vec::new(),
            push_constant_binding: None,
            flip_y: false,
            remap_depth: false,
        };
        let request = CompileRequest {
            code: &code,
            stage: ShaderStage::Vertex,
            entry_point: "main",
            specialization: &[],
            target: &target,
        };
        assert!(NoopShaderCompiler.compile(&request).unwrap().starts_with("#version 450"));

        let missing = CompileRequest {
            stage: ShaderStage::Fragment,
            ..request
        };
        assert!(matches!(
            NoopShaderCompiler.compile(&missing),
            Err(ShaderError::MissingEntryPoint { .. })
        ));
    }
}
