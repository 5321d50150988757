//! Create-info and parameter records
//!
//! These mirror the Vulkan structures field for field, with pointer/count
//! pairs replaced by borrowed slices that only need to live for the call.
//! Plain-data Vulkan structs without extension chains (`vk::Viewport`,
//! `vk::AttachmentDescription`, ...) are used directly.

// Field names follow the Vulkan structures and are documented there.
#![allow(missing_docs)]

use std::sync::Arc;

use ash::vk;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};

use crate::backends::Platform;
use crate::config::EmulatorConfig;
use crate::core::debug::{DebugReportCallback, DebugUtilsCallback};
use crate::core::shader::ShaderCompiler;

/// Instance creation parameters
#[derive(Clone, Default)]
pub struct InstanceCreateInfo<'a> {
    /// Application name, overrides the configured one when non-empty
    pub application_name: &'a str,
    /// Requested API version (`vk::make_api_version`)
    pub api_version: u32,
    /// Instance extensions to enable
    pub enabled_extensions: &'a [&'a str],
    /// Emulator settings; defaults apply when absent
    pub config: Option<EmulatorConfig>,
    /// Window-system glue for the legacy backends
    pub platform: Option<Arc<dyn Platform>>,
    /// SPIR-V cross compiler for the legacy backends
    pub shader_compiler: Option<Arc<dyn ShaderCompiler>>,
}

/// One queue request
#[derive(Debug, Clone, Copy)]
pub struct DeviceQueueCreateInfo<'a> {
    /// Queue family
    pub queue_family_index: u32,
    /// One priority per requested queue
    pub queue_priorities: &'a [f32],
}

/// Logical device creation parameters
#[derive(Debug, Clone, Copy, Default)]
pub struct DeviceCreateInfo<'a> {
    /// Requested queues
    pub queue_create_infos: &'a [DeviceQueueCreateInfo<'a>],
    /// Device extensions to enable
    pub enabled_extensions: &'a [&'a str],
    /// Features to enable
    pub enabled_features: Option<vk::PhysicalDeviceFeatures>,
}

/// `VkMemoryAllocateInfo`
#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryAllocateInfo {
    pub allocation_size: vk::DeviceSize,
    pub memory_type_index: u32,
}

/// `VkBufferCreateInfo`
#[derive(Debug, Clone, Copy, Default)]
pub struct BufferCreateInfo {
    pub flags: vk::BufferCreateFlags,
    pub size: vk::DeviceSize,
    pub usage: vk::BufferUsageFlags,
    pub sharing_mode: vk::SharingMode,
}

/// `VkImageCreateInfo`
#[derive(Debug, Clone, Copy)]
pub struct ImageCreateInfo {
    pub flags: vk::ImageCreateFlags,
    pub image_type: vk::ImageType,
    pub format: vk::Format,
    pub extent: vk::Extent3D,
    pub mip_levels: u32,
    pub array_layers: u32,
    pub samples: vk::SampleCountFlags,
    pub tiling: vk::ImageTiling,
    pub usage: vk::ImageUsageFlags,
    pub initial_layout: vk::ImageLayout,
}

impl Default for ImageCreateInfo {
    fn default() -> Self {
        Self {
            flags: vk::ImageCreateFlags::empty(),
            image_type: vk::ImageType::TYPE_2D,
            format: vk::Format::R8G8B8A8_UNORM,
            extent: vk::Extent3D {
                width: 1,
                height: 1,
                depth: 1,
            },
            mip_levels: 1,
            array_layers: 1,
            samples: vk::SampleCountFlags::TYPE_1,
            tiling: vk::ImageTiling::OPTIMAL,
            usage: vk::ImageUsageFlags::empty(),
            initial_layout: vk::ImageLayout::UNDEFINED,
        }
    }
}

/// `VkImageViewCreateInfo`
#[derive(Debug, Clone, Copy)]
pub struct ImageViewCreateInfo {
    pub image: vk::Image,
    pub view_type: vk::ImageViewType,
    pub format: vk::Format,
    pub components: vk::ComponentMapping,
    pub subresource_range: vk::ImageSubresourceRange,
}

/// `VkSamplerCreateInfo`
#[derive(Debug, Clone, Copy)]
pub struct SamplerCreateInfo {
    pub mag_filter: vk::Filter,
    pub min_filter: vk::Filter,
    pub mipmap_mode: vk::SamplerMipmapMode,
    pub address_mode_u: vk::SamplerAddressMode,
    pub address_mode_v: vk::SamplerAddressMode,
    pub address_mode_w: vk::SamplerAddressMode,
    pub mip_lod_bias: f32,
    pub anisotropy_enable: bool,
    pub max_anisotropy: f32,
    pub compare_enable: bool,
    pub compare_op: vk::CompareOp,
    pub min_lod: f32,
    pub max_lod: f32,
    pub border_color: vk::BorderColor,
}

impl Default for SamplerCreateInfo {
    fn default() -> Self {
        Self {
            mag_filter: vk::Filter::LINEAR,
            min_filter: vk::Filter::LINEAR,
            mipmap_mode: vk::SamplerMipmapMode::LINEAR,
            address_mode_u: vk::SamplerAddressMode::REPEAT,
            address_mode_v: vk::SamplerAddressMode::REPEAT,
            address_mode_w: vk::SamplerAddressMode::REPEAT,
            mip_lod_bias: 0.0,
            anisotropy_enable: false,
            max_anisotropy: 1.0,
            compare_enable: false,
            compare_op: vk::CompareOp::ALWAYS,
            min_lod: 0.0,
            max_lod: vk::LOD_CLAMP_NONE,
            border_color: vk::BorderColor::FLOAT_TRANSPARENT_BLACK,
        }
    }
}

/// `VkShaderModuleCreateInfo`
#[derive(Debug, Clone, Copy)]
pub struct ShaderModuleCreateInfo<'a> {
    /// SPIR-V words
    pub code: &'a [u32],
}

/// `VkSpecializationInfo`
#[derive(Debug, Clone, Copy, Default)]
pub struct SpecializationInfo<'a> {
    pub map_entries: &'a [vk::SpecializationMapEntry],
    pub data: &'a [u8],
}

/// `VkPipelineShaderStageCreateInfo`
#[derive(Debug, Clone, Copy)]
pub struct PipelineShaderStageCreateInfo<'a> {
    pub stage: vk::ShaderStageFlags,
    pub module: vk::ShaderModule,
    /// Entry point name
    pub name: &'a str,
    pub specialization: Option<SpecializationInfo<'a>>,
}

/// `VkPipelineVertexInputStateCreateInfo`
#[derive(Debug, Clone, Copy, Default)]
pub struct VertexInputState<'a> {
    pub bindings: &'a [vk::VertexInputBindingDescription],
    pub attributes: &'a [vk::VertexInputAttributeDescription],
}

/// `VkPipelineInputAssemblyStateCreateInfo`
#[derive(Debug, Clone, Copy, Default)]
pub struct InputAssemblyState {
    pub topology: vk::PrimitiveTopology,
    pub primitive_restart_enable: bool,
}

/// `VkPipelineTessellationStateCreateInfo`
#[derive(Debug, Clone, Copy, Default)]
pub struct TessellationState {
    pub patch_control_points: u32,
}

/// `VkPipelineViewportStateCreateInfo`; slices may be empty when the
/// matching state is dynamic
#[derive(Debug, Clone, Copy, Default)]
pub struct ViewportState<'a> {
    pub viewports: &'a [vk::Viewport],
    pub scissors: &'a [vk::Rect2D],
}

/// `VkPipelineRasterizationStateCreateInfo`
#[derive(Debug, Clone, Copy)]
pub struct RasterizationState {
    pub depth_clamp_enable: bool,
    pub rasterizer_discard_enable: bool,
    pub polygon_mode: vk::PolygonMode,
    pub cull_mode: vk::CullModeFlags,
    pub front_face: vk::FrontFace,
    pub depth_bias_enable: bool,
    pub depth_bias_constant_factor: f32,
    pub depth_bias_clamp: f32,
    pub depth_bias_slope_factor: f32,
    pub line_width: f32,
}

impl Default for RasterizationState {
    fn default() -> Self {
        Self {
            depth_clamp_enable: false,
            rasterizer_discard_enable: false,
            polygon_mode: vk::PolygonMode::FILL,
            cull_mode: vk::CullModeFlags::NONE,
            front_face: vk::FrontFace::COUNTER_CLOCKWISE,
            depth_bias_enable: false,
            depth_bias_constant_factor: 0.0,
            depth_bias_clamp: 0.0,
            depth_bias_slope_factor: 0.0,
            line_width: 1.0,
        }
    }
}

/// `VkPipelineMultisampleStateCreateInfo`
#[derive(Debug, Clone, Copy)]
pub struct MultisampleState {
    pub rasterization_samples: vk::SampleCountFlags,
    pub sample_shading_enable: bool,
    pub min_sample_shading: f32,
    /// First word of the sample mask, `None` for all samples
    pub sample_mask: Option<u32>,
    pub alpha_to_coverage_enable: bool,
    pub alpha_to_one_enable: bool,
}

impl Default for MultisampleState {
    fn default() -> Self {
        Self {
            rasterization_samples: vk::SampleCountFlags::TYPE_1,
            sample_shading_enable: false,
            min_sample_shading: 0.0,
            sample_mask: None,
            alpha_to_coverage_enable: false,
            alpha_to_one_enable: false,
        }
    }
}

/// `VkPipelineDepthStencilStateCreateInfo`
#[derive(Debug, Clone, Copy, Default)]
pub struct DepthStencilState {
    pub depth_test_enable: bool,
    pub depth_write_enable: bool,
    pub depth_compare_op: vk::CompareOp,
    pub depth_bounds_test_enable: bool,
    pub stencil_test_enable: bool,
    pub front: vk::StencilOpState,
    pub back: vk::StencilOpState,
    pub min_depth_bounds: f32,
    pub max_depth_bounds: f32,
}

/// `VkPipelineColorBlendStateCreateInfo`
#[derive(Debug, Clone, Copy, Default)]
pub struct ColorBlendState<'a> {
    pub logic_op_enable: bool,
    pub logic_op: vk::LogicOp,
    pub attachments: &'a [vk::PipelineColorBlendAttachmentState],
    pub blend_constants: [f32; 4],
}

/// `VkGraphicsPipelineCreateInfo`
#[derive(Debug, Clone, Copy)]
pub struct GraphicsPipelineCreateInfo<'a> {
    pub stages: &'a [PipelineShaderStageCreateInfo<'a>],
    pub vertex_input: VertexInputState<'a>,
    pub input_assembly: InputAssemblyState,
    pub tessellation: Option<TessellationState>,
    pub viewport: Option<ViewportState<'a>>,
    pub rasterization: RasterizationState,
    pub multisample: Option<MultisampleState>,
    pub depth_stencil: Option<DepthStencilState>,
    pub color_blend: Option<ColorBlendState<'a>>,
    pub dynamic_states: &'a [vk::DynamicState],
    pub layout: vk::PipelineLayout,
    pub render_pass: vk::RenderPass,
    pub subpass: u32,
}

/// `VkComputePipelineCreateInfo`
#[derive(Debug, Clone, Copy)]
pub struct ComputePipelineCreateInfo<'a> {
    pub stage: PipelineShaderStageCreateInfo<'a>,
    pub layout: vk::PipelineLayout,
}

/// `VkDescriptorSetLayoutBinding`
#[derive(Debug, Clone, Copy)]
pub struct DescriptorSetLayoutBinding<'a> {
    pub binding: u32,
    pub descriptor_type: vk::DescriptorType,
    pub descriptor_count: u32,
    pub stage_flags: vk::ShaderStageFlags,
    pub immutable_samplers: &'a [vk::Sampler],
}

/// `VkDescriptorSetLayoutCreateInfo`
#[derive(Debug, Clone, Copy, Default)]
pub struct DescriptorSetLayoutCreateInfo<'a> {
    pub bindings: &'a [DescriptorSetLayoutBinding<'a>],
}

/// `VkPipelineLayoutCreateInfo`
#[derive(Debug, Clone, Copy, Default)]
pub struct PipelineLayoutCreateInfo<'a> {
    pub set_layouts: &'a [vk::DescriptorSetLayout],
    pub push_constant_ranges: &'a [vk::PushConstantRange],
}

/// `VkDescriptorPoolCreateInfo`
#[derive(Debug, Clone, Copy, Default)]
pub struct DescriptorPoolCreateInfo<'a> {
    pub flags: vk::DescriptorPoolCreateFlags,
    pub max_sets: u32,
    pub pool_sizes: &'a [vk::DescriptorPoolSize],
}

/// `VkDescriptorSetAllocateInfo`
#[derive(Debug, Clone, Copy)]
pub struct DescriptorSetAllocateInfo<'a> {
    pub descriptor_pool: vk::DescriptorPool,
    pub set_layouts: &'a [vk::DescriptorSetLayout],
}

/// `VkWriteDescriptorSet`
#[derive(Debug, Clone, Copy)]
pub struct WriteDescriptorSet<'a> {
    pub dst_set: vk::DescriptorSet,
    pub dst_binding: u32,
    pub dst_array_element: u32,
    pub descriptor_type: vk::DescriptorType,
    pub image_info: &'a [vk::DescriptorImageInfo],
    pub buffer_info: &'a [vk::DescriptorBufferInfo],
}

/// `VkCopyDescriptorSet`
#[derive(Debug, Clone, Copy)]
pub struct CopyDescriptorSet {
    pub src_set: vk::DescriptorSet,
    pub src_binding: u32,
    pub src_array_element: u32,
    pub dst_set: vk::DescriptorSet,
    pub dst_binding: u32,
    pub dst_array_element: u32,
    pub descriptor_count: u32,
}

/// `VkSubpassDescription`
#[derive(Debug, Clone, Copy, Default)]
pub struct SubpassDescription<'a> {
    pub pipeline_bind_point: vk::PipelineBindPoint,
    pub input_attachments: &'a [vk::AttachmentReference],
    pub color_attachments: &'a [vk::AttachmentReference],
    /// Empty, or one entry per colour attachment
    pub resolve_attachments: &'a [vk::AttachmentReference],
    pub depth_stencil_attachment: Option<vk::AttachmentReference>,
    pub preserve_attachments: &'a [u32],
}

/// `VkRenderPassCreateInfo`
#[derive(Debug, Clone, Copy, Default)]
pub struct RenderPassCreateInfo<'a> {
    pub attachments: &'a [vk::AttachmentDescription],
    pub subpasses: &'a [SubpassDescription<'a>],
    pub dependencies: &'a [vk::SubpassDependency],
}

/// `VkFramebufferCreateInfo`
#[derive(Debug, Clone, Copy)]
pub struct FramebufferCreateInfo<'a> {
    pub render_pass: vk::RenderPass,
    pub attachments: &'a [vk::ImageView],
    pub width: u32,
    pub height: u32,
    pub layers: u32,
}

/// `VkClearColorValue`, tagged by the interpretation the union is read with
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClearColorValue {
    /// Float, unorm, snorm and sRGB formats
    Float([f32; 4]),
    /// Signed integer formats
    Int([i32; 4]),
    /// Unsigned integer formats
    Uint([u32; 4]),
}

impl ClearColorValue {
    /// Value as floats, converting integer variants
    #[allow(clippy::cast_precision_loss)]
    pub fn as_float(self) -> [f32; 4] {
        match self {
            Self::Float(v) => v,
            Self::Int(v) => v.map(|c| c as f32),
            Self::Uint(v) => v.map(|c| c as f32),
        }
    }
}

/// `VkClearValue`
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClearValue {
    /// Colour attachment clear value
    Color(ClearColorValue),
    /// Depth/stencil attachment clear value
    DepthStencil {
        /// Depth clear value
        depth: f32,
        /// Stencil clear value
        stencil: u32,
    },
}

/// `VkRenderPassBeginInfo`
#[derive(Debug, Clone, Copy)]
pub struct RenderPassBeginInfo<'a> {
    pub render_pass: vk::RenderPass,
    pub framebuffer: vk::Framebuffer,
    pub render_area: vk::Rect2D,
    /// One value per attachment cleared on load, in attachment order
    pub clear_values: &'a [ClearValue],
}

/// `VkClearAttachment`
#[derive(Debug, Clone, Copy)]
pub struct ClearAttachment {
    pub aspect_mask: vk::ImageAspectFlags,
    pub color_attachment: u32,
    pub clear_value: ClearValue,
}

/// `VkCommandPoolCreateInfo`
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandPoolCreateInfo {
    pub flags: vk::CommandPoolCreateFlags,
    pub queue_family_index: u32,
}

/// `VkCommandBufferAllocateInfo`
#[derive(Debug, Clone, Copy)]
pub struct CommandBufferAllocateInfo {
    pub command_pool: vk::CommandPool,
    pub level: vk::CommandBufferLevel,
    pub command_buffer_count: u32,
}

/// `VkCommandBufferInheritanceInfo`
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandBufferInheritanceInfo {
    pub render_pass: vk::RenderPass,
    pub subpass: u32,
    pub framebuffer: vk::Framebuffer,
}

/// `VkCommandBufferBeginInfo`
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandBufferBeginInfo {
    pub flags: vk::CommandBufferUsageFlags,
    pub inheritance: Option<CommandBufferInheritanceInfo>,
}

/// `VkMemoryBarrier`
#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryBarrier {
    pub src_access_mask: vk::AccessFlags,
    pub dst_access_mask: vk::AccessFlags,
}

/// `VkBufferMemoryBarrier`
#[derive(Debug, Clone, Copy)]
pub struct BufferMemoryBarrier {
    pub src_access_mask: vk::AccessFlags,
    pub dst_access_mask: vk::AccessFlags,
    pub buffer: vk::Buffer,
    pub offset: vk::DeviceSize,
    pub size: vk::DeviceSize,
}

/// `VkImageMemoryBarrier`
#[derive(Debug, Clone, Copy)]
pub struct ImageMemoryBarrier {
    pub src_access_mask: vk::AccessFlags,
    pub dst_access_mask: vk::AccessFlags,
    pub old_layout: vk::ImageLayout,
    pub new_layout: vk::ImageLayout,
    pub image: vk::Image,
    pub subresource_range: vk::ImageSubresourceRange,
}

/// `VkSubmitInfo`
#[derive(Debug, Clone, Copy, Default)]
pub struct SubmitInfo<'a> {
    pub wait_semaphores: &'a [vk::Semaphore],
    pub wait_dst_stage_mask: &'a [vk::PipelineStageFlags],
    pub command_buffers: &'a [vk::CommandBuffer],
    pub signal_semaphores: &'a [vk::Semaphore],
}

/// `VkFenceCreateInfo`
#[derive(Debug, Clone, Copy, Default)]
pub struct FenceCreateInfo {
    pub flags: vk::FenceCreateFlags,
}

/// Window handles for surface creation; only read during the call
#[derive(Debug, Clone, Copy)]
pub struct SurfaceCreateInfo {
    pub display: RawDisplayHandle,
    pub window: RawWindowHandle,
}

/// `VkSwapchainCreateInfoKHR`
#[derive(Debug, Clone, Copy)]
pub struct SwapchainCreateInfo {
    pub surface: vk::SurfaceKHR,
    pub min_image_count: u32,
    pub image_format: vk::Format,
    pub image_color_space: vk::ColorSpaceKHR,
    pub image_extent: vk::Extent2D,
    pub image_array_layers: u32,
    pub image_usage: vk::ImageUsageFlags,
    pub present_mode: vk::PresentModeKHR,
    pub old_swapchain: vk::SwapchainKHR,
}

/// `VkPresentInfoKHR`
#[derive(Debug, Clone, Copy, Default)]
pub struct PresentInfo<'a> {
    pub wait_semaphores: &'a [vk::Semaphore],
    pub swapchains: &'a [vk::SwapchainKHR],
    pub image_indices: &'a [u32],
}

/// `VkDebugReportCallbackCreateInfoEXT`
#[derive(Clone)]
pub struct DebugReportCallbackCreateInfo {
    pub flags: vk::DebugReportFlagsEXT,
    pub callback: DebugReportCallback,
}

/// `VkDebugUtilsMessengerCreateInfoEXT`
#[derive(Clone)]
pub struct DebugUtilsMessengerCreateInfo {
    pub message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    pub message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    pub callback: DebugUtilsCallback,
}
