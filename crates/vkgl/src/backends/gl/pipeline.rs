//! Pipeline objects
//!
//! A graphics pipeline becomes three things on the legacy side: a linked
//! program, an immutable [`ContextStateSnapshot`] applied through the state
//! stack, and a [`VertexLayout`] that identifies its vertex arrays in the
//! geometry cache.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ash::vk;

use crate::backends::gl::driver::{ProgramName, ShaderSource, Topology};
use crate::backends::gl::format::{vertex_format, VertexFormat};
use crate::backends::gl::state::ContextStateSnapshot;
use crate::backends::gl::GlState;
use crate::backends::Capabilities;
use crate::core::descriptor::PipelineLayoutObject;
use crate::core::error::{VulkanError, VulkanResult};
use crate::core::info::{GraphicsPipelineCreateInfo, PipelineShaderStageCreateInfo, VertexInputState};
use crate::core::shader::{
    resolve_specialization, CompileRequest, GlslTarget, ShaderCompiler, ShaderModuleObject,
    ShaderStage,
};

static NEXT_LAYOUT_ID: AtomicU64 = AtomicU64::new(1);

/// One vertex attribute of a layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutAttribute {
    /// Shader input location
    pub location: u32,
    /// Binding slot the attribute reads from
    pub binding: u32,
    /// Fetch format
    pub format: VertexFormat,
    /// Offset inside one element
    pub offset: u32,
}

/// Vertex input description of one pipeline
#[derive(Debug)]
pub struct VertexLayout {
    /// Process-unique identity used in geometry cache keys
    pub id: u64,
    /// Binding slots with stride and step rate
    pub bindings: Vec<vk::VertexInputBindingDescription>,
    /// Attributes by location
    pub attributes: Vec<LayoutAttribute>,
}

impl VertexLayout {
    /// Translate a vertex input state
    pub fn new(input: &VertexInputState<'_>) -> VulkanResult<Self> {
        let mut attributes = Vec::with_capacity(input.attributes.len());
        for attribute in input.attributes {
            if !input.bindings.iter().any(|b| b.binding == attribute.binding) {
                return Err(VulkanError::contract(format!(
                    "attribute {} reads undeclared binding {}",
                    attribute.location, attribute.binding
                )));
            }
            let format = vertex_format(attribute.format).ok_or_else(|| {
                VulkanError::FeatureNotPresent(format!("vertex format {:?}", attribute.format))
            })?;
            attributes.push(LayoutAttribute {
                location: attribute.location,
                binding: attribute.binding,
                format,
                offset: attribute.offset,
            });
        }
        attributes.sort_by_key(|attribute| attribute.location);

        let mut bindings = input.bindings.to_vec();
        bindings.sort_by_key(|binding| binding.binding);

        Ok(Self {
            id: NEXT_LAYOUT_ID.fetch_add(1, Ordering::Relaxed),
            bindings,
            attributes,
        })
    }

    /// Binding slots referenced by at least one attribute, ascending
    pub fn used_slots(&self) -> Vec<u32> {
        let mut slots: Vec<u32> = self.attributes.iter().map(|a| a.binding).collect();
        slots.sort_unstable();
        slots.dedup();
        slots
    }

    /// Stride and step rate of a binding slot
    pub fn binding(&self, slot: u32) -> Option<&vk::VertexInputBindingDescription> {
        self.bindings.iter().find(|binding| binding.binding == slot)
    }
}

/// Compiles and links the stages of one pipeline
pub struct ProgramBuilder<'a> {
    /// SPIR-V to GLSL translator
    pub compiler: &'a dyn ShaderCompiler,
    /// `#version` of the generated sources
    pub glsl_version: u32,
    /// Features of the target context
    pub caps: Capabilities,
}

impl ProgramBuilder<'_> {
    /// Translate every stage and link the program
    pub fn build(
        &self,
        state: &mut GlState,
        stages: &[(&ShaderModuleObject, &PipelineShaderStageCreateInfo<'_>)],
        layout: &PipelineLayoutObject,
    ) -> VulkanResult<ProgramName> {
        let clip_control = self.caps.contains(Capabilities::CLIP_CONTROL);
        let target = GlslTarget {
            version: self.glsl_version,
            bindings: layout.remaps.clone(),
            push_constant_binding: layout.push_constant_binding,
            flip_y: !clip_control,
            remap_depth: !clip_control,
        };

        let mut sources = Vec::with_capacity(stages.len());
        for (module, info) in stages {
            let stage = ShaderStage::from_flags(info.stage).ok_or_else(|| {
                VulkanError::contract(format!("{:?} is not a single shader stage", info.stage))
            })?;
            if stage.is_tessellation() && !self.caps.contains(Capabilities::TESSELLATION) {
                return Err(VulkanError::FeatureNotPresent("tessellation shaders".to_string()));
            }
            if stage == ShaderStage::Compute && !self.caps.contains(Capabilities::COMPUTE) {
                return Err(VulkanError::FeatureNotPresent("compute shaders".to_string()));
            }
            module.require_entry_point(stage, info.name)?;
            let specialization = match &info.specialization {
                Some(specialization) => resolve_specialization(specialization)?,
                None => Vec::new(),
            };
            let source = self.compiler.compile(&CompileRequest {
                code: module.code(),
                stage,
                entry_point: info.name,
                specialization: &specialization,
                target: &target,
            })?;
            sources.push((stage, source));
        }

        let shader_sources: Vec<ShaderSource<'_>> = sources
            .iter()
            .map(|(stage, source)| ShaderSource {
                stage: *stage,
                source,
            })
            .collect();
        let program = state.driver.create_program(&shader_sources)?;
        log::debug!(
            "Linked {program:?} from {:?}",
            sources.iter().map(|(stage, _)| *stage).collect::<Vec<_>>()
        );
        Ok(program)
    }
}

/// Graphics half of a pipeline
#[derive(Debug)]
pub struct GraphicsPipeline {
    /// Fixed-function state
    pub snapshot: Arc<ContextStateSnapshot>,
    /// Linked program
    pub program: ProgramName,
    /// Vertex input description
    pub vertex_layout: VertexLayout,
    /// Primitive type of draws
    pub topology: Topology,
    /// Layout the descriptors are bound through
    pub layout: Arc<PipelineLayoutObject>,
}

/// One `VkPipeline`
#[derive(Debug)]
pub enum PipelineObject {
    /// Graphics pipeline
    Graphics(GraphicsPipeline),
    /// Compute pipeline
    Compute {
        /// Linked program
        program: ProgramName,
        /// Layout the descriptors are bound through
        layout: Arc<PipelineLayoutObject>,
    },
}

impl PipelineObject {
    /// Build a graphics pipeline from resolved stage modules
    pub fn graphics(
        state: &mut GlState,
        builder: &ProgramBuilder<'_>,
        info: &GraphicsPipelineCreateInfo<'_>,
        stages: &[(&ShaderModuleObject, &PipelineShaderStageCreateInfo<'_>)],
        layout: Arc<PipelineLayoutObject>,
    ) -> VulkanResult<Self> {
        if !stages
            .iter()
            .any(|(_, stage)| stage.stage == vk::ShaderStageFlags::VERTEX)
        {
            return Err(VulkanError::contract("graphics pipeline has no vertex stage"));
        }
        let patches = info.input_assembly.topology == vk::PrimitiveTopology::PATCH_LIST;
        if patches && info.tessellation.is_none() {
            return Err(VulkanError::contract(
                "patch list topology needs a tessellation state",
            ));
        }
        let vertex_layout = VertexLayout::new(&info.vertex_input)?;
        let snapshot = Arc::new(ContextStateSnapshot::new(info));
        let program = builder.build(state, stages, &layout)?;
        Ok(Self::Graphics(GraphicsPipeline {
            topology: snapshot.topology,
            snapshot,
            program,
            vertex_layout,
            layout,
        }))
    }

    /// Build a compute pipeline
    pub fn compute(
        state: &mut GlState,
        builder: &ProgramBuilder<'_>,
        module: &ShaderModuleObject,
        stage: &PipelineShaderStageCreateInfo<'_>,
        layout: Arc<PipelineLayoutObject>,
    ) -> VulkanResult<Self> {
        if stage.stage != vk::ShaderStageFlags::COMPUTE {
            return Err(VulkanError::contract("compute pipeline stage must be COMPUTE"));
        }
        let program = builder.build(state, &[(module, stage)], &layout)?;
        Ok(Self::Compute { program, layout })
    }

    /// Linked program
    pub const fn program(&self) -> ProgramName {
        match self {
            Self::Graphics(graphics) => graphics.program,
            Self::Compute { program, .. } => *program,
        }
    }

    /// Pipeline layout
    pub fn layout(&self) -> &Arc<PipelineLayoutObject> {
        match self {
            Self::Graphics(graphics) => &graphics.layout,
            Self::Compute { layout, .. } => layout,
        }
    }

    /// Bind point the pipeline is bound at
    pub const fn bind_point(&self) -> vk::PipelineBindPoint {
        match self {
            Self::Graphics(_) => vk::PipelineBindPoint::GRAPHICS,
            Self::Compute { .. } => vk::PipelineBindPoint::COMPUTE,
        }
    }

    /// Delete the program and the vertex arrays built for this pipeline
    pub fn release(&self, state: &mut GlState) {
        let program = self.program();
        if state.bound.program == Some(program) {
            state.use_program(None);
        }
        state.driver.delete_program(program);
        if let Self::Graphics(graphics) = self {
            state.purge_layout(graphics.vertex_layout.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::noop::{GlCall, NoopDriver, NoopShaderCompiler};
    use crate::core::info::{InputAssemblyState, RasterizationState};
    use crate::core::shader::spirv_with_entry_points;

    fn layout() -> Arc<PipelineLayoutObject> {
        Arc::new(PipelineLayoutObject::new(Vec::new(), &[], 128).unwrap())
    }

    fn stage(flags: vk::ShaderStageFlags, name: &str) -> PipelineShaderStageCreateInfo<'_> {
        PipelineShaderStageCreateInfo {
            stage: flags,
            module: vk::ShaderModule::null(),
            name,
            specialization: None,
        }
    }

    fn info<'a>(
        stages: &'a [PipelineShaderStageCreateInfo<'a>],
        input: VertexInputState<'a>,
    ) -> GraphicsPipelineCreateInfo<'a> {
        GraphicsPipelineCreateInfo {
            stages,
            vertex_input: input,
            input_assembly: InputAssemblyState {
                topology: vk::PrimitiveTopology::TRIANGLE_LIST,
                primitive_restart_enable: false,
            },
            tessellation: None,
            viewport: None,
            rasterization: RasterizationState::default(),
            multisample: None,
            depth_stencil: None,
            color_blend: None,
            dynamic_states: &[],
            layout: vk::PipelineLayout::null(),
            render_pass: vk::RenderPass::null(),
            subpass: 0,
        }
    }

    #[test]
    fn test_graphics_pipeline_links_translated_stages() {
        let (driver, log) = NoopDriver::standalone();
        let mut state = GlState::new(Box::new(driver), Capabilities::all(), None);
        let module = ShaderModuleObject::new(&spirv_with_entry_points(&[
            (ShaderStage::Vertex, "main"),
            (ShaderStage::Fragment, "main"),
        ]))
        .unwrap();
        let stages = [
            stage(vk::ShaderStageFlags::VERTEX, "main"),
            stage(vk::ShaderStageFlags::FRAGMENT, "main"),
        ];
        let resolved: Vec<_> = stages.iter().map(|s| (&module, s)).collect();
        let builder = ProgramBuilder {
            compiler: &NoopShaderCompiler,
            glsl_version: 450,
            caps: Capabilities::all(),
        };

        let pipeline = PipelineObject::graphics(
            &mut state,
            &builder,
            &info(&stages, VertexInputState::default()),
            &resolved,
            layout(),
        )
        .unwrap();
        assert_eq!(pipeline.bind_point(), vk::PipelineBindPoint::GRAPHICS);
        assert!(log.calls().contains(&GlCall::CreateProgram(
            pipeline.program(),
            vec![ShaderStage::Vertex, ShaderStage::Fragment]
        )));

        pipeline.release(&mut state);
        assert!(log.calls().contains(&GlCall::DeleteProgram(pipeline.program())));
    }

    #[test]
    fn test_missing_entry_point_fails() {
        let (driver, log) = NoopDriver::standalone();
        let mut state = GlState::new(Box::new(driver), Capabilities::all(), None);
        let module = ShaderModuleObject::new(&spirv_with_entry_points(&[(ShaderStage::Vertex, "main")])).unwrap();
        let stages = [stage(vk::ShaderStageFlags::VERTEX, "other")];
        let builder = ProgramBuilder {
            compiler: &NoopShaderCompiler,
            glsl_version: 450,
            caps: Capabilities::all(),
        };
        let err = PipelineObject::graphics(
            &mut state,
            &builder,
            &info(&stages, VertexInputState::default()),
            &[(&module, &stages[0])],
            layout(),
        )
        .unwrap_err();
        assert!(matches!(err, VulkanError::Shader(_)));
        assert!(log.is_empty());
    }

    #[test]
    fn test_compute_needs_capability() {
        let (driver, _log) = NoopDriver::standalone();
        let caps = Capabilities::all() - Capabilities::COMPUTE;
        let mut state = GlState::new(Box::new(driver), caps, None);
        let module = ShaderModuleObject::new(&spirv_with_entry_points(&[(ShaderStage::Compute, "main")])).unwrap();
        let builder = ProgramBuilder {
            compiler: &NoopShaderCompiler,
            glsl_version: 330,
            caps,
        };
        let err = PipelineObject::compute(
            &mut state,
            &builder,
            &module,
            &stage(vk::ShaderStageFlags::COMPUTE, "main"),
            layout(),
        )
        .unwrap_err();
        assert!(matches!(err, VulkanError::FeatureNotPresent(_)));
    }

    #[test]
    fn test_vertex_layout_identity_and_slots() {
        let bindings = [
            vk::VertexInputBindingDescription {
                binding: 1,
                stride: 12,
                input_rate: vk::VertexInputRate::INSTANCE,
            },
            vk::VertexInputBindingDescription {
                binding: 0,
                stride: 16,
                input_rate: vk::VertexInputRate::VERTEX,
            },
            vk::VertexInputBindingDescription {
                binding: 2,
                stride: 4,
                input_rate: vk::VertexInputRate::VERTEX,
            },
        ];
        let attributes = [
            vk::VertexInputAttributeDescription {
                location: 1,
                binding: 1,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: 0,
            },
            vk::VertexInputAttributeDescription {
                location: 0,
                binding: 0,
                format: vk::Format::R32G32_SFLOAT,
                offset: 8,
            },
        ];
        let input = VertexInputState {
            bindings: &bindings,
            attributes: &attributes,
        };
        let a = VertexLayout::new(&input).unwrap();
        let b = VertexLayout::new(&input).unwrap();
        assert_ne!(a.id, b.id);
        assert_eq!(a.used_slots(), vec![0, 1]);
        assert_eq!(a.attributes[0].location, 0);
        assert_eq!(a.binding(1).unwrap().stride, 12);
    }
}
