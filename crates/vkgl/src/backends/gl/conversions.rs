//! Conversions from Vulkan enums and flags to legacy driver types.

use ash::vk;

use crate::backends::gl::driver::{
    BarrierBits, BlendEquation, BlendFactor, CompareFunc, Face, Filter, IndexType, LogicOp,
    PolygonMode, StencilOp, Topology, Winding, WrapMode,
};

/// A local extension trait to convert Vulkan types into legacy driver types.
/// This avoids Rust's orphan rules while keeping an idiomatic `.into_gl()` syntax.
pub trait IntoGl<T> {
    /// Consumes self and converts it into a driver type.
    fn into_gl(self) -> T;
}

impl IntoGl<CompareFunc> for vk::CompareOp {
    fn into_gl(self) -> CompareFunc {
        match self {
            Self::NEVER => CompareFunc::Never,
            Self::LESS => CompareFunc::Less,
            Self::EQUAL => CompareFunc::Equal,
            Self::LESS_OR_EQUAL => CompareFunc::LessEqual,
            Self::GREATER => CompareFunc::Greater,
            Self::NOT_EQUAL => CompareFunc::NotEqual,
            Self::GREATER_OR_EQUAL => CompareFunc::GreaterEqual,
            _ => CompareFunc::Always,
        }
    }
}

impl IntoGl<StencilOp> for vk::StencilOp {
    fn into_gl(self) -> StencilOp {
        match self {
            Self::ZERO => StencilOp::Zero,
            Self::REPLACE => StencilOp::Replace,
            Self::INCREMENT_AND_CLAMP => StencilOp::Increment,
            Self::DECREMENT_AND_CLAMP => StencilOp::Decrement,
            Self::INVERT => StencilOp::Invert,
            Self::INCREMENT_AND_WRAP => StencilOp::IncrementWrap,
            Self::DECREMENT_AND_WRAP => StencilOp::DecrementWrap,
            _ => StencilOp::Keep,
        }
    }
}

impl IntoGl<BlendFactor> for vk::BlendFactor {
    fn into_gl(self) -> BlendFactor {
        match self {
            Self::ZERO => BlendFactor::Zero,
            Self::SRC_COLOR => BlendFactor::SrcColor,
            Self::ONE_MINUS_SRC_COLOR => BlendFactor::OneMinusSrcColor,
            Self::DST_COLOR => BlendFactor::DstColor,
            Self::ONE_MINUS_DST_COLOR => BlendFactor::OneMinusDstColor,
            Self::SRC_ALPHA => BlendFactor::SrcAlpha,
            Self::ONE_MINUS_SRC_ALPHA => BlendFactor::OneMinusSrcAlpha,
            Self::DST_ALPHA => BlendFactor::DstAlpha,
            Self::ONE_MINUS_DST_ALPHA => BlendFactor::OneMinusDstAlpha,
            Self::CONSTANT_COLOR => BlendFactor::ConstantColor,
            Self::ONE_MINUS_CONSTANT_COLOR => BlendFactor::OneMinusConstantColor,
            Self::CONSTANT_ALPHA => BlendFactor::ConstantAlpha,
            Self::ONE_MINUS_CONSTANT_ALPHA => BlendFactor::OneMinusConstantAlpha,
            Self::SRC_ALPHA_SATURATE => BlendFactor::SrcAlphaSaturate,
            Self::SRC1_COLOR => BlendFactor::Src1Color,
            Self::ONE_MINUS_SRC1_COLOR => BlendFactor::OneMinusSrc1Color,
            Self::SRC1_ALPHA => BlendFactor::Src1Alpha,
            Self::ONE_MINUS_SRC1_ALPHA => BlendFactor::OneMinusSrc1Alpha,
            _ => BlendFactor::One,
        }
    }
}

impl IntoGl<BlendEquation> for vk::BlendOp {
    fn into_gl(self) -> BlendEquation {
        match self {
            Self::SUBTRACT => BlendEquation::Subtract,
            Self::REVERSE_SUBTRACT => BlendEquation::ReverseSubtract,
            Self::MIN => BlendEquation::Min,
            Self::MAX => BlendEquation::Max,
            _ => BlendEquation::Add,
        }
    }
}

impl IntoGl<LogicOp> for vk::LogicOp {
    fn into_gl(self) -> LogicOp {
        match self {
            Self::CLEAR => LogicOp::Clear,
            Self::AND => LogicOp::And,
            Self::AND_REVERSE => LogicOp::AndReverse,
            Self::AND_INVERTED => LogicOp::AndInverted,
            Self::NO_OP => LogicOp::Noop,
            Self::XOR => LogicOp::Xor,
            Self::OR => LogicOp::Or,
            Self::NOR => LogicOp::Nor,
            Self::EQUIVALENT => LogicOp::Equiv,
            Self::INVERT => LogicOp::Invert,
            Self::OR_REVERSE => LogicOp::OrReverse,
            Self::COPY_INVERTED => LogicOp::CopyInverted,
            Self::OR_INVERTED => LogicOp::OrInverted,
            Self::NAND => LogicOp::Nand,
            Self::SET => LogicOp::Set,
            _ => LogicOp::Copy,
        }
    }
}

impl IntoGl<PolygonMode> for vk::PolygonMode {
    fn into_gl(self) -> PolygonMode {
        match self {
            Self::LINE => PolygonMode::Line,
            Self::POINT => PolygonMode::Point,
            _ => PolygonMode::Fill,
        }
    }
}

impl IntoGl<Winding> for vk::FrontFace {
    fn into_gl(self) -> Winding {
        match self {
            Self::CLOCKWISE => Winding::Clockwise,
            _ => Winding::CounterClockwise,
        }
    }
}

/// `None` when culling is disabled
impl IntoGl<Option<Face>> for vk::CullModeFlags {
    fn into_gl(self) -> Option<Face> {
        if self == Self::FRONT_AND_BACK {
            Some(Face::FrontAndBack)
        } else if self == Self::FRONT {
            Some(Face::Front)
        } else if self == Self::BACK {
            Some(Face::Back)
        } else {
            None
        }
    }
}

impl IntoGl<Topology> for vk::PrimitiveTopology {
    fn into_gl(self) -> Topology {
        match self {
            Self::POINT_LIST => Topology::Points,
            Self::LINE_LIST => Topology::Lines,
            Self::LINE_STRIP => Topology::LineStrip,
            Self::TRIANGLE_STRIP => Topology::TriangleStrip,
            Self::TRIANGLE_FAN => Topology::TriangleFan,
            Self::LINE_LIST_WITH_ADJACENCY => Topology::LinesAdjacency,
            Self::LINE_STRIP_WITH_ADJACENCY => Topology::LineStripAdjacency,
            Self::TRIANGLE_LIST_WITH_ADJACENCY => Topology::TrianglesAdjacency,
            Self::TRIANGLE_STRIP_WITH_ADJACENCY => Topology::TriangleStripAdjacency,
            Self::PATCH_LIST => Topology::Patches,
            _ => Topology::Triangles,
        }
    }
}

impl IntoGl<IndexType> for vk::IndexType {
    fn into_gl(self) -> IndexType {
        match self {
            Self::UINT16 => IndexType::U16,
            Self::UINT8_EXT => IndexType::U8,
            _ => IndexType::U32,
        }
    }
}

impl IntoGl<Filter> for vk::Filter {
    fn into_gl(self) -> Filter {
        match self {
            Self::NEAREST => Filter::Nearest,
            _ => Filter::Linear,
        }
    }
}

impl IntoGl<Filter> for vk::SamplerMipmapMode {
    fn into_gl(self) -> Filter {
        match self {
            Self::NEAREST => Filter::Nearest,
            _ => Filter::Linear,
        }
    }
}

impl IntoGl<WrapMode> for vk::SamplerAddressMode {
    fn into_gl(self) -> WrapMode {
        match self {
            Self::MIRRORED_REPEAT => WrapMode::MirroredRepeat,
            Self::CLAMP_TO_EDGE => WrapMode::ClampToEdge,
            Self::CLAMP_TO_BORDER => WrapMode::ClampToBorder,
            Self::MIRROR_CLAMP_TO_EDGE => WrapMode::MirrorClampToEdge,
            _ => WrapMode::Repeat,
        }
    }
}

/// Colour write mask as `[r, g, b, a]`
impl IntoGl<[bool; 4]> for vk::ColorComponentFlags {
    fn into_gl(self) -> [bool; 4] {
        [
            self.contains(Self::R),
            self.contains(Self::G),
            self.contains(Self::B),
            self.contains(Self::A),
        ]
    }
}

/// Barrier bits needed to make `dst_access` see prior shader writes
impl IntoGl<BarrierBits> for vk::AccessFlags {
    fn into_gl(self) -> BarrierBits {
        let mut bits = BarrierBits::empty();
        if self.contains(Self::VERTEX_ATTRIBUTE_READ) {
            bits |= BarrierBits::VERTEX_ATTRIB_ARRAY;
        }
        if self.contains(Self::INDEX_READ) {
            bits |= BarrierBits::ELEMENT_ARRAY;
        }
        if self.contains(Self::UNIFORM_READ) {
            bits |= BarrierBits::UNIFORM;
        }
        if self.contains(Self::INDIRECT_COMMAND_READ) {
            bits |= BarrierBits::COMMAND;
        }
        if self.intersects(Self::SHADER_READ | Self::SHADER_WRITE) {
            bits |= BarrierBits::TEXTURE_FETCH
                | BarrierBits::SHADER_IMAGE_ACCESS
                | BarrierBits::SHADER_STORAGE;
        }
        if self.intersects(Self::TRANSFER_READ | Self::TRANSFER_WRITE) {
            bits |= BarrierBits::BUFFER_UPDATE
                | BarrierBits::TEXTURE_UPDATE
                | BarrierBits::PIXEL_BUFFER;
        }
        if self.intersects(
            Self::COLOR_ATTACHMENT_READ
                | Self::COLOR_ATTACHMENT_WRITE
                | Self::DEPTH_STENCIL_ATTACHMENT_READ
                | Self::DEPTH_STENCIL_ATTACHMENT_WRITE,
        ) {
            bits |= BarrierBits::FRAMEBUFFER;
        }
        if self.intersects(Self::HOST_READ | Self::MEMORY_READ | Self::MEMORY_WRITE) {
            bits = BarrierBits::all();
        }
        bits
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cull_mode() {
        let none: Option<Face> = vk::CullModeFlags::NONE.into_gl();
        assert_eq!(none, None);
        let back: Option<Face> = vk::CullModeFlags::BACK.into_gl();
        assert_eq!(back, Some(Face::Back));
        let both: Option<Face> = vk::CullModeFlags::FRONT_AND_BACK.into_gl();
        assert_eq!(both, Some(Face::FrontAndBack));
    }

    #[test]
    fn test_color_mask() {
        let mask: [bool; 4] = (vk::ColorComponentFlags::R | vk::ColorComponentFlags::A).into_gl();
        assert_eq!(mask, [true, false, false, true]);
    }

    #[test]
    fn test_barrier_bits() {
        let bits: BarrierBits = vk::AccessFlags::INDEX_READ.into_gl();
        assert_eq!(bits, BarrierBits::ELEMENT_ARRAY);
        let all: BarrierBits = vk::AccessFlags::MEMORY_WRITE.into_gl();
        assert_eq!(all, BarrierBits::all());
        let none: BarrierBits = vk::AccessFlags::empty().into_gl();
        assert!(none.is_empty());
    }

    #[test]
    fn test_compare_and_topology() {
        let func: CompareFunc = vk::CompareOp::LESS_OR_EQUAL.into_gl();
        assert_eq!(func, CompareFunc::LessEqual);
        let topology: Topology = vk::PrimitiveTopology::PATCH_LIST.into_gl();
        assert_eq!(topology, Topology::Patches);
    }
}
