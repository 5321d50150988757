//! Legacy driver call surface
//!
//! [`GlDriver`] is the complete set of core-profile GL entry points the
//! translation engine emits. Platform glue loads a real implementation; the
//! no-op backend records every call instead. Enum parameters are typed rather
//! than raw `GLenum` values so that call logs are comparable in tests.

use ash::vk;
use bitflags::bitflags;
use thiserror::Error;

use crate::backends::gl::format::GlFormat;
use crate::core::info::ClearColorValue;
use crate::core::shader::ShaderStage;

macro_rules! gl_name {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u32);
    };
}

gl_name!(
    /// Buffer object name
    BufferName
);
gl_name!(
    /// Texture object name
    TextureName
);
gl_name!(
    /// Sampler object name
    SamplerName
);
gl_name!(
    /// Vertex array object name
    VertexArrayName
);
gl_name!(
    /// Framebuffer object name (never 0, the default framebuffer is `None`)
    FramebufferName
);
gl_name!(
    /// Linked program object name
    ProgramName
);

/// Errors reported by the legacy driver
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GlError {
    /// `GL_OUT_OF_MEMORY`
    #[error("driver out of memory")]
    OutOfMemory,
    /// Context reset or lost (robustness)
    #[error("context lost")]
    ContextLost,
    /// `GL_INVALID_OPERATION` and friends
    #[error("invalid operation: {0}")]
    InvalidOperation(String),
    /// A shader stage failed to compile
    #[error("{stage:?} shader failed to compile: {log}")]
    CompileFailed {
        /// Stage that failed
        stage: ShaderStage,
        /// Driver info log
        log: String,
    },
    /// Program link failed
    #[error("program link failed: {0}")]
    LinkFailed(String),
    /// Entry point missing from the loaded driver
    #[error("unsupported by driver: {0}")]
    Unsupported(String),
}

impl GlError {
    /// Nearest result code of the emulated API
    pub fn result(&self) -> vk::Result {
        match self {
            Self::OutOfMemory => vk::Result::ERROR_OUT_OF_DEVICE_MEMORY,
            Self::ContextLost => vk::Result::ERROR_DEVICE_LOST,
            Self::InvalidOperation(_) => vk::Result::ERROR_UNKNOWN,
            Self::CompileFailed { .. } | Self::LinkFailed(_) => vk::Result::ERROR_INVALID_SHADER_NV,
            Self::Unsupported(_) => vk::Result::ERROR_FEATURE_NOT_PRESENT,
        }
    }
}

/// Result type for driver calls
pub type GlResult<T> = Result<T, GlError>;

/// Identification and extension list of a loaded driver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverInfo {
    /// `GL_VENDOR`
    pub vendor: String,
    /// `GL_RENDERER`
    pub renderer: String,
    /// Core profile version (major, minor)
    pub version: (u32, u32),
    /// `GL_EXTENSIONS`
    pub extensions: Vec<String>,
}

impl DriverInfo {
    /// Whether the driver reports at least the given core version
    pub fn at_least(&self, major: u32, minor: u32) -> bool {
        self.version >= (major, minor)
    }

    /// Whether the named extension is exposed
    pub fn has_extension(&self, name: &str) -> bool {
        self.extensions.iter().any(|ext| ext == name)
    }
}

/// `glEnable` / `glDisable` targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum Capability {
    Blend,
    CullFace,
    DepthTest,
    StencilTest,
    ScissorTest,
    PolygonOffsetFill,
    PolygonOffsetLine,
    PolygonOffsetPoint,
    DepthClamp,
    RasterizerDiscard,
    Multisample,
    SampleAlphaToCoverage,
    SampleAlphaToOne,
    SampleShading,
    SampleMask,
    PrimitiveRestartFixedIndex,
    ColorLogicOp,
    FramebufferSrgb,
    ProgramPointSize,
    DebugOutput,
}

/// Polygon face selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum Face {
    Front,
    Back,
    FrontAndBack,
}

/// Front-face winding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum Winding {
    CounterClockwise,
    Clockwise,
}

/// Polygon rasterization mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum PolygonMode {
    Fill,
    Line,
    Point,
}

/// Depth/stencil comparison function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum CompareFunc {
    Never,
    Less,
    Equal,
    LessEqual,
    Greater,
    NotEqual,
    GreaterEqual,
    Always,
}

/// Stencil update operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum StencilOp {
    Keep,
    Zero,
    Replace,
    Increment,
    Decrement,
    Invert,
    IncrementWrap,
    DecrementWrap,
}

/// Blend factor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum BlendFactor {
    Zero,
    One,
    SrcColor,
    OneMinusSrcColor,
    DstColor,
    OneMinusDstColor,
    SrcAlpha,
    OneMinusSrcAlpha,
    DstAlpha,
    OneMinusDstAlpha,
    ConstantColor,
    OneMinusConstantColor,
    ConstantAlpha,
    OneMinusConstantAlpha,
    SrcAlphaSaturate,
    Src1Color,
    OneMinusSrc1Color,
    Src1Alpha,
    OneMinusSrc1Alpha,
}

/// Separate colour/alpha blend factors for one draw buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct BlendFactors {
    pub src_rgb: BlendFactor,
    pub dst_rgb: BlendFactor,
    pub src_alpha: BlendFactor,
    pub dst_alpha: BlendFactor,
}

/// Blend equation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum BlendEquation {
    Add,
    Subtract,
    ReverseSubtract,
    Min,
    Max,
}

/// Framebuffer logic operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum LogicOp {
    Clear,
    And,
    AndReverse,
    Copy,
    AndInverted,
    Noop,
    Xor,
    Or,
    Nor,
    Equiv,
    Invert,
    OrReverse,
    CopyInverted,
    OrInverted,
    Nand,
    Set,
}

/// Primitive mode for draw calls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum Topology {
    Points,
    Lines,
    LineStrip,
    Triangles,
    TriangleStrip,
    TriangleFan,
    LinesAdjacency,
    LineStripAdjacency,
    TrianglesAdjacency,
    TriangleStripAdjacency,
    Patches,
}

/// Element index width
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum IndexType {
    U8,
    U16,
    U32,
}

impl IndexType {
    /// Size of one index in bytes
    pub fn size(self) -> u64 {
        match self {
            Self::U8 => 1,
            Self::U16 => 2,
            Self::U32 => 4,
        }
    }

    /// Value that restarts a primitive under fixed-index restart
    pub fn restart_index(self) -> u32 {
        match self {
            Self::U8 => 0xFF,
            Self::U16 => 0xFFFF,
            Self::U32 => 0xFFFF_FFFF,
        }
    }
}

/// Component type of a vertex attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum AttribType {
    Byte,
    UnsignedByte,
    Short,
    UnsignedShort,
    Int,
    UnsignedInt,
    HalfFloat,
    Float,
    Double,
    Int2101010Rev,
    UnsignedInt2101010Rev,
    UnsignedInt10f11f11fRev,
}

/// One `glVertexAttrib*Pointer` + divisor setup on the bound vertex array
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VertexAttrib {
    /// Shader input location
    pub location: u32,
    /// Source buffer
    pub buffer: BufferName,
    /// Component count (1-4)
    pub components: u32,
    /// Component type
    pub ty: AttribType,
    /// Normalize fixed-point values to [0, 1] / [-1, 1]
    pub normalized: bool,
    /// Use the integer attribute path (`glVertexAttribIPointer`)
    pub integer: bool,
    /// Byte stride between elements
    pub stride: u32,
    /// Byte offset of the first element inside `buffer`
    pub offset: u64,
    /// 0 for per-vertex data, 1 for per-instance data
    pub divisor: u32,
}

/// Framebuffer binding target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum FramebufferTarget {
    Draw,
    Read,
    Both,
}

/// Attachment point on a framebuffer object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum AttachmentPoint {
    Color(u32),
    Depth,
    Stencil,
    DepthStencil,
}

/// Entry in a `glDrawBuffers` list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DrawBuffer {
    /// Output discarded
    None,
    /// `GL_COLOR_ATTACHMENTn` of the bound framebuffer object
    Color(u32),
    /// Back buffer of the default framebuffer
    Back,
}

/// Result of `glCheckFramebufferStatus`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FramebufferStatus {
    /// Framebuffer can be rendered to
    Complete,
    /// Framebuffer is unusable, with the driver's reason
    Incomplete(String),
}

bitflags! {
    /// Buffers affected by `glClear` / `glBlitFramebuffer`
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ClearMask: u32 {
        /// Colour buffers
        const COLOR = 1 << 0;
        /// Depth buffer
        const DEPTH = 1 << 1;
        /// Stencil buffer
        const STENCIL = 1 << 2;
    }
}

bitflags! {
    /// `glMemoryBarrier` bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    #[allow(missing_docs)]
    pub struct BarrierBits: u32 {
        const VERTEX_ATTRIB_ARRAY = 1 << 0;
        const ELEMENT_ARRAY = 1 << 1;
        const UNIFORM = 1 << 2;
        const TEXTURE_FETCH = 1 << 3;
        const SHADER_IMAGE_ACCESS = 1 << 5;
        const COMMAND = 1 << 6;
        const PIXEL_BUFFER = 1 << 7;
        const TEXTURE_UPDATE = 1 << 8;
        const BUFFER_UPDATE = 1 << 9;
        const FRAMEBUFFER = 1 << 10;
        const SHADER_STORAGE = 1 << 13;
    }
}

/// Blit / sampler filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum Filter {
    Nearest,
    Linear,
}

/// Texture target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum TextureTarget {
    Texture1D,
    Texture1DArray,
    Texture2D,
    Texture2DArray,
    Texture2DMultisample,
    Texture2DMultisampleArray,
    Texture3D,
    CubeMap,
    CubeMapArray,
}

/// Immutable texture storage description
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureDesc {
    /// Texture target
    pub target: TextureTarget,
    /// Storage format
    pub format: GlFormat,
    /// Width in texels
    pub width: u32,
    /// Height in texels
    pub height: u32,
    /// Depth in texels (3D only)
    pub depth: u32,
    /// Array layers (array/cube targets)
    pub layers: u32,
    /// Mip levels
    pub levels: u32,
    /// Sample count (multisample targets)
    pub samples: u32,
}

/// Texture view description (`glTextureView`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureViewDesc {
    /// View target
    pub target: TextureTarget,
    /// View format
    pub format: GlFormat,
    /// First mip level
    pub base_level: u32,
    /// Mip level count
    pub levels: u32,
    /// First array layer
    pub base_layer: u32,
    /// Array layer count
    pub layers: u32,
}

/// Sub-region of a texture for pixel transfers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[allow(missing_docs)]
pub struct TextureRegion {
    pub level: u32,
    pub x: i32,
    pub y: i32,
    pub z: i32,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    /// Buffer row length in texels, 0 = tightly packed
    pub row_length: u32,
    /// Buffer image height in rows, 0 = tightly packed
    pub image_height: u32,
}

/// Texture coordinate wrap mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum WrapMode {
    Repeat,
    MirroredRepeat,
    ClampToEdge,
    ClampToBorder,
    MirrorClampToEdge,
}

/// Sampler object description
#[derive(Debug, Clone, Copy, PartialEq)]
#[allow(missing_docs)]
pub struct SamplerDesc {
    pub mag_filter: Filter,
    pub min_filter: Filter,
    /// `None` disables mipmapping
    pub mipmap_filter: Option<Filter>,
    pub wrap: [WrapMode; 3],
    pub lod_bias: f32,
    pub min_lod: f32,
    pub max_lod: f32,
    pub max_anisotropy: f32,
    pub compare: Option<CompareFunc>,
    pub border_color: [f32; 4],
}

/// Indexed buffer binding target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum IndexedBufferTarget {
    Uniform,
    ShaderStorage,
}

/// One stage's source handed to program creation
#[derive(Debug, Clone, Copy)]
pub struct ShaderSource<'a> {
    /// Pipeline stage
    pub stage: ShaderStage,
    /// GLSL text
    pub source: &'a str,
}

/// Severity of a driver debug message (`KHR_debug`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum MessageSeverity {
    High,
    Medium,
    Low,
    Notification,
}

/// Message drained from the driver's debug output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverMessage {
    /// Severity reported by the driver
    pub severity: MessageSeverity,
    /// Whether the message reports a performance issue
    pub performance: bool,
    /// Message text
    pub text: String,
}

/// Viewport rectangle in window coordinates
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[allow(missing_docs)]
pub struct ViewportRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// Scissor rectangle in window coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[allow(missing_docs)]
pub struct ScissorRect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

/// The legacy API entry points used by the translation engine.
///
/// Calls are only valid while the owning context is current, which the
/// engine guarantees by holding a [`crate::backends::gl::context::ContextLock`].
/// Per-draw-buffer and per-viewport variants take `Some(index)`; `None`
/// targets every buffer or viewport at once.
#[allow(missing_docs)]
pub trait GlDriver: Send {
    fn info(&self) -> &DriverInfo;

    // Fixed-function state
    fn set_capability(&mut self, cap: Capability, enabled: bool);
    fn set_capability_indexed(&mut self, cap: Capability, index: u32, enabled: bool);
    fn cull_face(&mut self, face: Face);
    fn front_face(&mut self, winding: Winding);
    fn polygon_mode(&mut self, mode: PolygonMode);
    fn line_width(&mut self, width: f32);
    fn polygon_offset(&mut self, factor: f32, units: f32, clamp: f32);
    fn depth_func(&mut self, func: CompareFunc);
    fn depth_mask(&mut self, write: bool);
    fn depth_range(&mut self, index: Option<u32>, near: f32, far: f32);
    fn stencil_func(&mut self, face: Face, func: CompareFunc, reference: u32, mask: u32);
    fn stencil_op(&mut self, face: Face, fail: StencilOp, depth_fail: StencilOp, pass: StencilOp);
    fn stencil_mask(&mut self, face: Face, mask: u32);
    fn blend_func(&mut self, draw_buffer: Option<u32>, factors: BlendFactors);
    fn blend_equation(&mut self, draw_buffer: Option<u32>, rgb: BlendEquation, alpha: BlendEquation);
    fn color_mask(&mut self, draw_buffer: Option<u32>, mask: [bool; 4]);
    fn blend_color(&mut self, color: [f32; 4]);
    fn logic_op(&mut self, op: LogicOp);
    fn sample_mask(&mut self, mask: u32);
    fn min_sample_shading(&mut self, value: f32);
    fn patch_vertices(&mut self, count: u32);
    fn viewport(&mut self, index: Option<u32>, rect: ViewportRect);
    fn scissor(&mut self, index: Option<u32>, rect: ScissorRect);
    fn clip_control(&mut self, upper_left: bool, zero_to_one: bool);

    // Buffers
    fn create_buffer(&mut self, size: u64) -> GlResult<BufferName>;
    fn delete_buffer(&mut self, buffer: BufferName);
    fn buffer_sub_data(&mut self, buffer: BufferName, offset: u64, data: &[u8]);
    fn get_buffer_sub_data(&mut self, buffer: BufferName, offset: u64, out: &mut [u8]);
    fn copy_buffer_sub_data(
        &mut self,
        src: BufferName,
        dst: BufferName,
        src_offset: u64,
        dst_offset: u64,
        size: u64,
    );
    fn clear_buffer_sub_data(&mut self, buffer: BufferName, offset: u64, size: u64, pattern: u32);
    fn bind_buffer_range(
        &mut self,
        target: IndexedBufferTarget,
        index: u32,
        buffer: Option<BufferName>,
        offset: u64,
        size: u64,
    );

    // Textures and samplers
    fn create_texture(&mut self, desc: &TextureDesc) -> GlResult<TextureName>;
    fn create_texture_view(
        &mut self,
        source: TextureName,
        desc: &TextureViewDesc,
    ) -> GlResult<TextureName>;
    fn delete_texture(&mut self, texture: TextureName);
    fn upload_texture(
        &mut self,
        texture: TextureName,
        target: TextureTarget,
        region: &TextureRegion,
        format: &GlFormat,
        source: BufferName,
        offset: u64,
    );
    fn download_texture(
        &mut self,
        texture: TextureName,
        target: TextureTarget,
        region: &TextureRegion,
        format: &GlFormat,
        destination: BufferName,
        offset: u64,
    );
    fn copy_texture(
        &mut self,
        src: TextureName,
        src_target: TextureTarget,
        src_region: &TextureRegion,
        dst: TextureName,
        dst_target: TextureTarget,
        dst_region: &TextureRegion,
    );
    fn bind_texture_unit(&mut self, unit: u32, target: TextureTarget, texture: Option<TextureName>);
    fn bind_image_unit(&mut self, unit: u32, texture: Option<TextureName>, level: u32, format: &GlFormat);
    fn create_sampler(&mut self, desc: &SamplerDesc) -> GlResult<SamplerName>;
    fn delete_sampler(&mut self, sampler: SamplerName);
    fn bind_sampler(&mut self, unit: u32, sampler: Option<SamplerName>);

    // Vertex arrays (attribute and element calls affect the bound array)
    fn create_vertex_array(&mut self) -> GlResult<VertexArrayName>;
    fn delete_vertex_array(&mut self, vertex_array: VertexArrayName);
    fn bind_vertex_array(&mut self, vertex_array: Option<VertexArrayName>);
    fn vertex_attrib(&mut self, attrib: &VertexAttrib);
    fn bind_element_buffer(&mut self, buffer: Option<BufferName>);

    // Framebuffers
    fn create_framebuffer(&mut self) -> GlResult<FramebufferName>;
    fn delete_framebuffer(&mut self, framebuffer: FramebufferName);
    fn bind_framebuffer(&mut self, target: FramebufferTarget, framebuffer: Option<FramebufferName>);
    fn framebuffer_texture(
        &mut self,
        framebuffer: FramebufferName,
        point: AttachmentPoint,
        texture: TextureName,
        level: u32,
        layer: Option<u32>,
    );
    fn check_framebuffer_status(&mut self, framebuffer: FramebufferName) -> FramebufferStatus;
    fn draw_buffers(&mut self, buffers: &[DrawBuffer]);
    fn read_buffer(&mut self, buffer: DrawBuffer);
    fn invalidate_framebuffer(&mut self, target: FramebufferTarget, points: &[AttachmentPoint]);
    fn blit_framebuffer(&mut self, src: [i32; 4], dst: [i32; 4], mask: ClearMask, filter: Filter);

    // Clears: indexed path for framebuffer objects, whole-window path for the default one
    fn clear_buffer_color(&mut self, draw_buffer: u32, value: ClearColorValue);
    fn clear_buffer_depth_stencil(&mut self, depth: Option<f32>, stencil: Option<u32>);
    fn clear_color(&mut self, rgba: [f32; 4]);
    fn clear_depth(&mut self, depth: f32);
    fn clear_stencil(&mut self, stencil: u32);
    fn clear(&mut self, mask: ClearMask);

    // Programs
    fn create_program(&mut self, stages: &[ShaderSource<'_>]) -> GlResult<ProgramName>;
    fn delete_program(&mut self, program: ProgramName);
    fn use_program(&mut self, program: Option<ProgramName>);

    // Work submission
    fn draw_arrays(&mut self, mode: Topology, first: u32, count: u32, instances: u32, base_instance: u32);
    fn draw_elements(
        &mut self,
        mode: Topology,
        count: u32,
        index_type: IndexType,
        offset: u64,
        instances: u32,
        base_vertex: i32,
        base_instance: u32,
    );
    fn draw_arrays_indirect(
        &mut self,
        mode: Topology,
        buffer: BufferName,
        offset: u64,
        draw_count: u32,
        stride: u32,
    );
    fn draw_elements_indirect(
        &mut self,
        mode: Topology,
        index_type: IndexType,
        buffer: BufferName,
        offset: u64,
        draw_count: u32,
        stride: u32,
    );
    fn dispatch_compute(&mut self, x: u32, y: u32, z: u32);
    fn dispatch_compute_indirect(&mut self, buffer: BufferName, offset: u64);
    fn memory_barrier(&mut self, bits: BarrierBits);

    // Synchronization
    fn flush(&mut self);
    fn finish(&mut self) -> GlResult<()>;

    /// Drain messages queued by `KHR_debug` output since the last call
    fn take_debug_messages(&mut self) -> Vec<DriverMessage> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_driver_info_queries() {
        let info = DriverInfo {
            vendor: "test".into(),
            renderer: "test".into(),
            version: (4, 3),
            extensions: vec!["GL_ARB_clip_control".into()],
        };
        assert!(info.at_least(3, 3));
        assert!(info.at_least(4, 3));
        assert!(!info.at_least(4, 5));
        assert!(info.has_extension("GL_ARB_clip_control"));
        assert!(!info.has_extension("GL_ARB_texture_view"));
    }

    #[test]
    fn test_index_sizes() {
        assert_eq!(IndexType::U16.size(), 2);
        assert_eq!(IndexType::U32.restart_index(), u32::MAX);
    }
}
