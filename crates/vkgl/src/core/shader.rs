//! Shader modules and the cross-compiler seam
//!
//! Shader modules keep the caller's SPIR-V words and the entry points found
//! in them. Translation to GLSL happens at pipeline creation through a
//! [`ShaderCompiler`], which is an external collaborator: the crate only
//! describes what the legacy backend needs from the generated source.

use std::sync::Arc;

use ash::vk;
use thiserror::Error;

use crate::core::error::{VulkanError, VulkanResult};
use crate::core::info::SpecializationInfo;

/// SPIR-V header magic
pub const SPIRV_MAGIC: u32 = 0x0723_0203;

const SPIRV_HEADER_WORDS: usize = 5;
const OP_ENTRY_POINT: u32 = 15;

/// Programmable pipeline stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[allow(missing_docs)]
pub enum ShaderStage {
    Vertex,
    TessellationControl,
    TessellationEvaluation,
    Geometry,
    Fragment,
    Compute,
}

impl ShaderStage {
    /// Stage named by a single-bit stage flag
    pub fn from_flags(flags: vk::ShaderStageFlags) -> Option<Self> {
        match flags {
            vk::ShaderStageFlags::VERTEX => Some(Self::Vertex),
            vk::ShaderStageFlags::TESSELLATION_CONTROL => Some(Self::TessellationControl),
            vk::ShaderStageFlags::TESSELLATION_EVALUATION => Some(Self::TessellationEvaluation),
            vk::ShaderStageFlags::GEOMETRY => Some(Self::Geometry),
            vk::ShaderStageFlags::FRAGMENT => Some(Self::Fragment),
            vk::ShaderStageFlags::COMPUTE => Some(Self::Compute),
            _ => None,
        }
    }

    /// SPIR-V execution model of the stage
    pub const fn execution_model(self) -> u32 {
        match self {
            Self::Vertex => 0,
            Self::TessellationControl => 1,
            Self::TessellationEvaluation => 2,
            Self::Geometry => 3,
            Self::Fragment => 4,
            Self::Compute => 5,
        }
    }

    fn from_execution_model(model: u32) -> Option<Self> {
        match model {
            0 => Some(Self::Vertex),
            1 => Some(Self::TessellationControl),
            2 => Some(Self::TessellationEvaluation),
            3 => Some(Self::Geometry),
            4 => Some(Self::Fragment),
            5 => Some(Self::Compute),
            _ => None,
        }
    }

    /// Whether the stage needs tessellation support
    pub const fn is_tessellation(self) -> bool {
        matches!(self, Self::TessellationControl | Self::TessellationEvaluation)
    }
}

/// Shader translation failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ShaderError {
    /// The module uses something the target language cannot express
    #[error("unsupported construct: {0}")]
    UnsupportedConstruct(String),

    /// No entry point with the requested name exists for the stage
    #[error("missing entry point '{name}' for {stage:?} stage")]
    MissingEntryPoint {
        /// Requested entry point name
        name: String,
        /// Requested stage
        stage: ShaderStage,
    },

    /// The SPIR-V words are malformed
    #[error("invalid SPIR-V module: {0}")]
    InvalidModule(String),
}

/// Entry point declared by an `OpEntryPoint` instruction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryPoint {
    /// Execution stage
    pub stage: ShaderStage,
    /// Entry point name
    pub name: String,
}

/// Scan a SPIR-V module for its entry points
pub fn parse_entry_points(code: &[u32]) -> Result<Vec<EntryPoint>, ShaderError> {
    if code.len() < SPIRV_HEADER_WORDS {
        return Err(ShaderError::InvalidModule(format!(
            "{} words is shorter than the header",
            code.len()
        )));
    }
    if code[0] != SPIRV_MAGIC {
        return Err(ShaderError::InvalidModule(format!(
            "bad magic {:#010x}",
            code[0]
        )));
    }

    let mut entry_points = Vec::new();
    let mut cursor = SPIRV_HEADER_WORDS;
    while cursor < code.len() {
        let word_count = (code[cursor] >> 16) as usize;
        let opcode = code[cursor] & 0xFFFF;
        if word_count == 0 || cursor + word_count > code.len() {
            return Err(ShaderError::InvalidModule(format!(
                "truncated instruction at word {cursor}"
            )));
        }
        if opcode == OP_ENTRY_POINT && word_count >= 4 {
            let operands = &code[cursor + 1..cursor + word_count];
            // Execution models outside the graphics/compute set are skipped
            if let Some(stage) = ShaderStage::from_execution_model(operands[0]) {
                entry_points.push(EntryPoint {
                    stage,
                    name: decode_literal_string(&operands[2..]),
                });
            }
        }
        cursor += word_count;
    }
    Ok(entry_points)
}

fn decode_literal_string(words: &[u32]) -> String {
    let bytes: Vec<u8> = words
        .iter()
        .flat_map(|word| word.to_le_bytes())
        .take_while(|&byte| byte != 0)
        .collect();
    String::from_utf8_lossy(&bytes).into_owned()
}

/// Resource class a descriptor binding is flattened into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// Uniform block binding point
    UniformBuffer,
    /// Shader storage block binding point
    StorageBuffer,
    /// Texture unit (combined or separate sampled image)
    SampledImage,
    /// Image unit
    StorageImage,
}

/// Where a `(set, binding)` pair lands in the legacy binding namespace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BindingRemap {
    /// Descriptor set index
    pub set: u32,
    /// Binding within the set
    pub binding: u32,
    /// Resource class
    pub kind: ResourceKind,
    /// First flattened slot; arrays occupy consecutive slots
    pub slot: u32,
}

/// What the generated GLSL must look like
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlslTarget {
    /// `#version` number, core profile
    pub version: u32,
    /// Descriptor bindings flattened to legacy binding points
    pub bindings: Vec<BindingRemap>,
    /// Uniform block binding reserved for push constants
    pub push_constant_binding: Option<u32>,
    /// Negate clip-space y in the last pre-rasterization stage
    pub flip_y: bool,
    /// Remap clip-space depth from [0, 1] to [-1, 1]
    pub remap_depth: bool,
}

/// A specialization constant value resolved from its map entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecializationConstant {
    /// `constant_id` in the module
    pub constant_id: u32,
    /// Raw little-endian value bytes
    pub bytes: Vec<u8>,
}

/// Resolve map entries against the data blob
pub fn resolve_specialization(
    info: &SpecializationInfo<'_>,
) -> VulkanResult<Vec<SpecializationConstant>> {
    info.map_entries
        .iter()
        .map(|entry| {
            let start = entry.offset as usize;
            let end = start + entry.size;
            info.data
                .get(start..end)
                .map(|bytes| SpecializationConstant {
                    constant_id: entry.constant_id,
                    bytes: bytes.to_vec(),
                })
                .ok_or_else(|| {
                    VulkanError::contract(format!(
                        "specialization constant {} reads bytes {start}..{end} of a {}-byte blob",
                        entry.constant_id,
                        info.data.len()
                    ))
                })
        })
        .collect()
}

/// One stage translation request
#[derive(Debug, Clone, Copy)]
pub struct CompileRequest<'a> {
    /// SPIR-V words
    pub code: &'a [u32],
    /// Stage to extract
    pub stage: ShaderStage,
    /// Entry point name
    pub entry_point: &'a str,
    /// Specialization constant values
    pub specialization: &'a [SpecializationConstant],
    /// Output conventions
    pub target: &'a GlslTarget,
}

/// SPIR-V to GLSL cross compiler
pub trait ShaderCompiler: Send + Sync {
    /// Translate one stage of a module to GLSL source
    fn compile(&self, request: &CompileRequest<'_>) -> Result<String, ShaderError>;
}

/// Device-side shader module object
#[derive(Debug)]
pub struct ShaderModuleObject {
    code: Arc<[u32]>,
    entry_points: Vec<EntryPoint>,
}

impl ShaderModuleObject {
    /// Validate and keep a module's words
    pub fn new(code: &[u32]) -> VulkanResult<Self> {
        let entry_points = parse_entry_points(code)?;
        log::debug!(
            "Shader module with {} words, entry points: {:?}",
            code.len(),
            entry_points
        );
        Ok(Self {
            code: Arc::from(code),
            entry_points,
        })
    }

    /// SPIR-V words
    pub fn code(&self) -> &[u32] {
        &self.code
    }

    /// Declared entry points
    pub fn entry_points(&self) -> &[EntryPoint] {
        &self.entry_points
    }

    /// Check that `name` exists for `stage`
    pub fn require_entry_point(&self, stage: ShaderStage, name: &str) -> Result<(), ShaderError> {
        if self
            .entry_points
            .iter()
            .any(|entry| entry.stage == stage && entry.name == name)
        {
            Ok(())
        } else {
            Err(ShaderError::MissingEntryPoint {
                name: name.to_string(),
                stage,
            })
        }
    }
}

/// Encode a minimal module declaring the given entry points
#[cfg(test)]
pub(crate) fn spirv_with_entry_points(entries: &[(ShaderStage, &str)]) -> Vec<u32> {
    let mut words = vec![SPIRV_MAGIC, 0x0001_0000, 0, 16, 0];
    for (index, (stage, name)) in entries.iter().enumerate() {
        let mut name_bytes = name.as_bytes().to_vec();
        name_bytes.push(0);
        while name_bytes.len() % 4 != 0 {
            name_bytes.push(0);
        }
        let name_words: Vec<u32> = name_bytes
            .chunks(4)
            .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();
        let word_count = 3 + name_words.len() as u32;
        words.push((word_count << 16) | OP_ENTRY_POINT);
        words.push(stage.execution_model());
        words.push(index as u32 + 1);
        words.extend(name_words);
    }
    words
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_point_scan() {
        let code = spirv_with_entry_points(&[
            (ShaderStage::Vertex, "main"),
            (ShaderStage::Fragment, "frag_main"),
        ]);
        let entries = parse_entry_points(&code).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0], EntryPoint { stage: ShaderStage::Vertex, name: "main".into() });
        assert_eq!(entries[1].name, "frag_main");
    }

    #[test]
    fn test_bad_magic_is_invalid_module() {
        let mut code = spirv_with_entry_points(&[(ShaderStage::Compute, "main")]);
        code[0] = 0xDEAD_BEEF;
        assert!(matches!(parse_entry_points(&code), Err(ShaderError::InvalidModule(_))));
        assert!(matches!(parse_entry_points(&[SPIRV_MAGIC]), Err(ShaderError::InvalidModule(_))));
    }

    #[test]
    fn test_missing_entry_point() {
        let code = spirv_with_entry_points(&[(ShaderStage::Vertex, "main")]);
        let module = ShaderModuleObject::new(&code).unwrap();
        assert!(module.require_entry_point(ShaderStage::Vertex, "main").is_ok());
        assert_eq!(
            module.require_entry_point(ShaderStage::Fragment, "main"),
            Err(ShaderError::MissingEntryPoint { name: "main".into(), stage: ShaderStage::Fragment })
        );
    }

    #[test]
    fn test_resolve_specialization_bounds() {
        let entries = [
            vk::SpecializationMapEntry { constant_id: 3, offset: 0, size: 4 },
            vk::SpecializationMapEntry { constant_id: 4, offset: 4, size: 4 },
        ];
        let data = 7u32.to_le_bytes();
        let info = SpecializationInfo { map_entries: &entries[..1], data: &data };
        let resolved = resolve_specialization(&info).unwrap();
        assert_eq!(resolved[0].constant_id, 3);
        assert_eq!(resolved[0].bytes, vec![7, 0, 0, 0]);

        let info = SpecializationInfo { map_entries: &entries, data: &data };
        assert!(resolve_specialization(&info).unwrap_err().is_contract_violation());
    }
}
