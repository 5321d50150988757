//! Format inspection and mapping onto legacy internal formats
//!
//! Clear dispatch and attachment placement are chosen by inspecting the
//! format before any driver call, so classification lives here rather than
//! next to the call sites.

use ash::vk;

use crate::backends::gl::driver::AttribType;

/// Raw GL enum values used by [`GlFormat`]
#[allow(missing_docs)]
pub mod consts {
    pub const R8: u32 = 0x8229;
    pub const R8_SNORM: u32 = 0x8F94;
    pub const R8I: u32 = 0x8231;
    pub const R8UI: u32 = 0x8232;
    pub const RG8: u32 = 0x822B;
    pub const RG8UI: u32 = 0x8238;
    pub const RGBA8: u32 = 0x8058;
    pub const RGBA8_SNORM: u32 = 0x8F97;
    pub const SRGB8_ALPHA8: u32 = 0x8C43;
    pub const RGBA8UI: u32 = 0x8D7C;
    pub const RGBA8I: u32 = 0x8D8E;
    pub const RGBA16: u32 = 0x805B;
    pub const R16F: u32 = 0x822D;
    pub const RG16F: u32 = 0x822F;
    pub const RGBA16F: u32 = 0x881A;
    pub const R16I: u32 = 0x8233;
    pub const R16UI: u32 = 0x8234;
    pub const R32F: u32 = 0x822E;
    pub const RG32F: u32 = 0x8230;
    pub const RGB32F: u32 = 0x8815;
    pub const RGBA32F: u32 = 0x8814;
    pub const R32I: u32 = 0x8235;
    pub const R32UI: u32 = 0x8236;
    pub const RG32UI: u32 = 0x823C;
    pub const RGBA32UI: u32 = 0x8D70;
    pub const RGBA32I: u32 = 0x8D82;
    pub const RGB10_A2: u32 = 0x8059;
    pub const R11F_G11F_B10F: u32 = 0x8C3A;
    pub const DEPTH_COMPONENT16: u32 = 0x81A5;
    pub const DEPTH_COMPONENT24: u32 = 0x81A6;
    pub const DEPTH_COMPONENT32F: u32 = 0x8CAC;
    pub const STENCIL_INDEX8: u32 = 0x8D48;
    pub const DEPTH24_STENCIL8: u32 = 0x88F0;
    pub const DEPTH32F_STENCIL8: u32 = 0x8CAD;

    pub const RED: u32 = 0x1903;
    pub const RG: u32 = 0x8227;
    pub const RGB: u32 = 0x1907;
    pub const RGBA: u32 = 0x1908;
    pub const BGRA: u32 = 0x80E1;
    pub const RED_INTEGER: u32 = 0x8D94;
    pub const RG_INTEGER: u32 = 0x8228;
    pub const RGBA_INTEGER: u32 = 0x8D99;
    pub const DEPTH_COMPONENT: u32 = 0x1902;
    pub const STENCIL_INDEX: u32 = 0x1901;
    pub const DEPTH_STENCIL: u32 = 0x84F9;

    pub const BYTE: u32 = 0x1400;
    pub const UNSIGNED_BYTE: u32 = 0x1401;
    pub const SHORT: u32 = 0x1402;
    pub const UNSIGNED_SHORT: u32 = 0x1403;
    pub const INT: u32 = 0x1404;
    pub const UNSIGNED_INT: u32 = 0x1405;
    pub const FLOAT: u32 = 0x1406;
    pub const HALF_FLOAT: u32 = 0x140B;
    pub const UNSIGNED_INT_24_8: u32 = 0x84FA;
    pub const FLOAT_32_UNSIGNED_INT_24_8_REV: u32 = 0x8DAD;
    pub const UNSIGNED_INT_2_10_10_10_REV: u32 = 0x8368;
    pub const UNSIGNED_INT_10F_11F_11F_REV: u32 = 0x8C3B;
}

/// Numeric interpretation of a colour format, selects the clear entry point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColorKind {
    /// Float, UNORM, SNORM and sRGB formats
    Float,
    /// Signed integer formats
    SignedInt,
    /// Unsigned integer formats
    UnsignedInt,
}

/// Aspect class of a format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FormatClass {
    /// Colour aspect only
    Color(ColorKind),
    /// Depth aspect only
    Depth,
    /// Stencil aspect only
    Stencil,
    /// Combined depth and stencil
    DepthStencil,
}

impl FormatClass {
    /// Whether the format carries a depth aspect
    pub fn has_depth(self) -> bool {
        matches!(self, Self::Depth | Self::DepthStencil)
    }

    /// Whether the format carries a stencil aspect
    pub fn has_stencil(self) -> bool {
        matches!(self, Self::Stencil | Self::DepthStencil)
    }

    /// Whether the format is a colour format
    pub fn is_color(self) -> bool {
        matches!(self, Self::Color(_))
    }
}

/// Classify a format by aspect and numeric kind
pub fn classify(format: vk::Format) -> FormatClass {
    match format {
        vk::Format::D16_UNORM | vk::Format::X8_D24_UNORM_PACK32 | vk::Format::D32_SFLOAT => {
            FormatClass::Depth
        }
        vk::Format::S8_UINT => FormatClass::Stencil,
        vk::Format::D16_UNORM_S8_UINT
        | vk::Format::D24_UNORM_S8_UINT
        | vk::Format::D32_SFLOAT_S8_UINT => FormatClass::DepthStencil,
        vk::Format::R8_UINT
        | vk::Format::R8G8_UINT
        | vk::Format::R8G8B8A8_UINT
        | vk::Format::R16_UINT
        | vk::Format::R16G16_UINT
        | vk::Format::R16G16B16A16_UINT
        | vk::Format::R32_UINT
        | vk::Format::R32G32_UINT
        | vk::Format::R32G32B32_UINT
        | vk::Format::R32G32B32A32_UINT
        | vk::Format::A2B10G10R10_UINT_PACK32 => FormatClass::Color(ColorKind::UnsignedInt),
        vk::Format::R8_SINT
        | vk::Format::R8G8_SINT
        | vk::Format::R8G8B8A8_SINT
        | vk::Format::R16_SINT
        | vk::Format::R16G16_SINT
        | vk::Format::R16G16B16A16_SINT
        | vk::Format::R32_SINT
        | vk::Format::R32G32_SINT
        | vk::Format::R32G32B32_SINT
        | vk::Format::R32G32B32A32_SINT => FormatClass::Color(ColorKind::SignedInt),
        _ => FormatClass::Color(ColorKind::Float),
    }
}

/// Aspect mask matching a format
pub fn aspect_mask(format: vk::Format) -> vk::ImageAspectFlags {
    match classify(format) {
        FormatClass::Color(_) => vk::ImageAspectFlags::COLOR,
        FormatClass::Depth => vk::ImageAspectFlags::DEPTH,
        FormatClass::Stencil => vk::ImageAspectFlags::STENCIL,
        FormatClass::DepthStencil => vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL,
    }
}

/// Internal format plus client pixel layout used for transfers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GlFormat {
    /// Sized internal format (`GL_RGBA8`, ...)
    pub internal_format: u32,
    /// Client pixel format (`GL_RGBA`, `GL_BGRA`, ...)
    pub pixel_format: u32,
    /// Client pixel type (`GL_UNSIGNED_BYTE`, ...)
    pub pixel_type: u32,
    /// Bytes per texel in client memory
    pub texel_size: u32,
    /// Aspect class
    pub class: FormatClass,
}

/// Map a format to its legacy storage, `None` when the backend has no equivalent
pub fn gl_format(format: vk::Format) -> Option<GlFormat> {
    use consts::*;

    let (internal_format, pixel_format, pixel_type, texel_size) = match format {
        vk::Format::R8_UNORM => (R8, RED, UNSIGNED_BYTE, 1),
        vk::Format::R8_SNORM => (R8_SNORM, RED, BYTE, 1),
        vk::Format::R8_UINT => (R8UI, RED_INTEGER, UNSIGNED_BYTE, 1),
        vk::Format::R8_SINT => (R8I, RED_INTEGER, BYTE, 1),
        vk::Format::R8G8_UNORM => (RG8, RG, UNSIGNED_BYTE, 2),
        vk::Format::R8G8_UINT => (RG8UI, RG_INTEGER, UNSIGNED_BYTE, 2),
        vk::Format::R8G8B8A8_UNORM => (RGBA8, RGBA, UNSIGNED_BYTE, 4),
        vk::Format::R8G8B8A8_SNORM => (RGBA8_SNORM, RGBA, BYTE, 4),
        vk::Format::R8G8B8A8_SRGB => (SRGB8_ALPHA8, RGBA, UNSIGNED_BYTE, 4),
        vk::Format::R8G8B8A8_UINT => (RGBA8UI, RGBA_INTEGER, UNSIGNED_BYTE, 4),
        vk::Format::R8G8B8A8_SINT => (RGBA8I, RGBA_INTEGER, BYTE, 4),
        vk::Format::B8G8R8A8_UNORM => (RGBA8, BGRA, UNSIGNED_BYTE, 4),
        vk::Format::B8G8R8A8_SRGB => (SRGB8_ALPHA8, BGRA, UNSIGNED_BYTE, 4),
        vk::Format::R16G16B16A16_UNORM => (RGBA16, RGBA, UNSIGNED_SHORT, 8),
        vk::Format::R16_SFLOAT => (R16F, RED, HALF_FLOAT, 2),
        vk::Format::R16G16_SFLOAT => (RG16F, RG, HALF_FLOAT, 4),
        vk::Format::R16G16B16A16_SFLOAT => (RGBA16F, RGBA, HALF_FLOAT, 8),
        vk::Format::R16_UINT => (R16UI, RED_INTEGER, UNSIGNED_SHORT, 2),
        vk::Format::R16_SINT => (R16I, RED_INTEGER, SHORT, 2),
        vk::Format::R32_SFLOAT => (R32F, RED, FLOAT, 4),
        vk::Format::R32G32_SFLOAT => (RG32F, RG, FLOAT, 8),
        vk::Format::R32G32B32_SFLOAT => (RGB32F, RGB, FLOAT, 12),
        vk::Format::R32G32B32A32_SFLOAT => (RGBA32F, RGBA, FLOAT, 16),
        vk::Format::R32_UINT => (R32UI, RED_INTEGER, UNSIGNED_INT, 4),
        vk::Format::R32_SINT => (R32I, RED_INTEGER, INT, 4),
        vk::Format::R32G32_UINT => (RG32UI, RG_INTEGER, UNSIGNED_INT, 8),
        vk::Format::R32G32B32A32_UINT => (RGBA32UI, RGBA_INTEGER, UNSIGNED_INT, 16),
        vk::Format::R32G32B32A32_SINT => (RGBA32I, RGBA_INTEGER, INT, 16),
        vk::Format::A2B10G10R10_UNORM_PACK32 => (RGB10_A2, RGBA, UNSIGNED_INT_2_10_10_10_REV, 4),
        vk::Format::B10G11R11_UFLOAT_PACK32 => (R11F_G11F_B10F, RGB, UNSIGNED_INT_10F_11F_11F_REV, 4),
        vk::Format::D16_UNORM => (DEPTH_COMPONENT16, DEPTH_COMPONENT, UNSIGNED_SHORT, 2),
        vk::Format::X8_D24_UNORM_PACK32 => (DEPTH_COMPONENT24, DEPTH_COMPONENT, UNSIGNED_INT, 4),
        vk::Format::D32_SFLOAT => (DEPTH_COMPONENT32F, DEPTH_COMPONENT, FLOAT, 4),
        vk::Format::S8_UINT => (STENCIL_INDEX8, STENCIL_INDEX, UNSIGNED_BYTE, 1),
        vk::Format::D24_UNORM_S8_UINT => (DEPTH24_STENCIL8, DEPTH_STENCIL, UNSIGNED_INT_24_8, 4),
        vk::Format::D32_SFLOAT_S8_UINT => {
            (DEPTH32F_STENCIL8, DEPTH_STENCIL, FLOAT_32_UNSIGNED_INT_24_8_REV, 8)
        }
        _ => return None,
    };

    Some(GlFormat {
        internal_format,
        pixel_format,
        pixel_type,
        texel_size,
        class: classify(format),
    })
}

/// Vertex attribute layout derived from a vertex input format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VertexFormat {
    /// Component count
    pub components: u32,
    /// Component type
    pub ty: AttribType,
    /// Fixed-point normalization
    pub normalized: bool,
    /// Integer attribute path
    pub integer: bool,
}

/// Map a vertex input format, `None` for formats the legacy API cannot fetch
pub fn vertex_format(format: vk::Format) -> Option<VertexFormat> {
    let float = |components, ty| VertexFormat { components, ty, normalized: false, integer: false };
    let norm = |components, ty| VertexFormat { components, ty, normalized: true, integer: false };
    let int = |components, ty| VertexFormat { components, ty, normalized: false, integer: true };

    Some(match format {
        vk::Format::R32_SFLOAT => float(1, AttribType::Float),
        vk::Format::R32G32_SFLOAT => float(2, AttribType::Float),
        vk::Format::R32G32B32_SFLOAT => float(3, AttribType::Float),
        vk::Format::R32G32B32A32_SFLOAT => float(4, AttribType::Float),
        vk::Format::R16G16_SFLOAT => float(2, AttribType::HalfFloat),
        vk::Format::R16G16B16A16_SFLOAT => float(4, AttribType::HalfFloat),
        vk::Format::R64_SFLOAT => float(1, AttribType::Double),
        vk::Format::R64G64_SFLOAT => float(2, AttribType::Double),
        vk::Format::R8G8_UNORM => norm(2, AttribType::UnsignedByte),
        vk::Format::R8G8B8A8_UNORM => norm(4, AttribType::UnsignedByte),
        vk::Format::R8G8B8A8_SNORM => norm(4, AttribType::Byte),
        vk::Format::R16G16_UNORM => norm(2, AttribType::UnsignedShort),
        vk::Format::R16G16_SNORM => norm(2, AttribType::Short),
        vk::Format::R16G16B16A16_UNORM => norm(4, AttribType::UnsignedShort),
        vk::Format::R16G16B16A16_SNORM => norm(4, AttribType::Short),
        vk::Format::A2B10G10R10_UNORM_PACK32 => norm(4, AttribType::UnsignedInt2101010Rev),
        vk::Format::A2B10G10R10_SNORM_PACK32 => norm(4, AttribType::Int2101010Rev),
        vk::Format::B10G11R11_UFLOAT_PACK32 => float(3, AttribType::UnsignedInt10f11f11fRev),
        vk::Format::R8G8B8A8_USCALED => float(4, AttribType::UnsignedByte),
        vk::Format::R8G8B8A8_UINT => int(4, AttribType::UnsignedByte),
        vk::Format::R8G8B8A8_SINT => int(4, AttribType::Byte),
        vk::Format::R16G16_UINT => int(2, AttribType::UnsignedShort),
        vk::Format::R16G16B16A16_UINT => int(4, AttribType::UnsignedShort),
        vk::Format::R32_UINT => int(1, AttribType::UnsignedInt),
        vk::Format::R32G32_UINT => int(2, AttribType::UnsignedInt),
        vk::Format::R32G32B32_UINT => int(3, AttribType::UnsignedInt),
        vk::Format::R32G32B32A32_UINT => int(4, AttribType::UnsignedInt),
        vk::Format::R32_SINT => int(1, AttribType::Int),
        vk::Format::R32G32_SINT => int(2, AttribType::Int),
        vk::Format::R32G32B32_SINT => int(3, AttribType::Int),
        vk::Format::R32G32B32A32_SINT => int(4, AttribType::Int),
        _ => return None,
    })
}
