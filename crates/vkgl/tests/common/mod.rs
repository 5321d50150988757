//! Shared setup for the integration tests: a no-op device with one queue,
//! a command pool and helpers for the objects most tests need.

#![allow(dead_code)]

use std::sync::Arc;

use vkgl::backends::noop::{NoopPlatform, NoopProbe};
use vkgl::backends::Platform;
use vkgl::config::EmulatorConfig;
use vkgl::core::info::{
    BufferCreateInfo, ColorBlendState, CommandBufferAllocateInfo, CommandBufferBeginInfo,
    CommandPoolCreateInfo, DeviceCreateInfo, DeviceQueueCreateInfo, FramebufferCreateInfo,
    GraphicsPipelineCreateInfo, ImageCreateInfo, ImageViewCreateInfo, InputAssemblyState,
    InstanceCreateInfo, MemoryAllocateInfo, PipelineLayoutCreateInfo,
    PipelineShaderStageCreateInfo, RasterizationState, RenderPassCreateInfo, ShaderModuleCreateInfo,
    SubmitInfo, SubpassDescription, VertexInputState, ViewportState,
};
use vkgl::core::shader::{ShaderStage, SPIRV_MAGIC};
use vkgl::core::{Device, Instance, VulkanResult};
use vkgl::vk;

/// Memory type index of plain host-visible memory
pub const HOST_VISIBLE: u32 = 1;
/// Memory type index of device-local memory
pub const DEVICE_LOCAL: u32 = 0;
/// Render target size
pub const TARGET: vk::Extent2D = vk::Extent2D {
    width: 64,
    height: 64,
};

/// Encode a module declaring `entries`; enough for the no-op compiler
pub fn spirv(entries: &[(ShaderStage, &str)]) -> Vec<u32> {
    let mut words = vec![SPIRV_MAGIC, 0x0001_0000, 0, 16, 0];
    for (id, (stage, name)) in (1u32..).zip(entries) {
        let mut bytes = name.as_bytes().to_vec();
        bytes.resize((bytes.len() / 4 + 1) * 4, 0);
        let name_words: Vec<u32> = bytes
            .chunks(4)
            .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();
        words.push(((3 + name_words.len() as u32) << 16) | 15);
        words.push(stage.execution_model());
        words.push(id);
        words.extend(name_words);
    }
    words
}

/// Colour render target with a single-subpass render pass
pub struct Target {
    pub image: vk::Image,
    pub view: vk::ImageView,
    pub render_pass: vk::RenderPass,
    pub framebuffer: vk::Framebuffer,
}

pub struct Fixture {
    pub instance: Instance,
    pub device: Device,
    pub probe: NoopProbe,
    pub queue: vk::Queue,
    pub pool: vk::CommandPool,
}

impl Fixture {
    pub fn new() -> Self {
        vkgl::logging::init_for_tests();
        let platform = Arc::new(NoopPlatform::new());
        let probe = platform.probe();
        let instance = Instance::new(&InstanceCreateInfo {
            application_name: "vkgl-integration",
            config: Some(EmulatorConfig::noop()),
            platform: Some(platform as Arc<dyn Platform>),
            ..InstanceCreateInfo::default()
        })
        .unwrap();
        let physical = instance.enumerate_physical_devices()[0];
        let device = instance
            .create_device(
                physical,
                &DeviceCreateInfo {
                    queue_create_infos: &[DeviceQueueCreateInfo {
                        queue_family_index: 0,
                        queue_priorities: &[1.0],
                    }],
                    ..DeviceCreateInfo::default()
                },
            )
            .unwrap();
        let queue = device.get_device_queue(0, 0).unwrap();
        let pool = device
            .create_command_pool(&CommandPoolCreateInfo {
                flags: vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
                queue_family_index: 0,
            })
            .unwrap();
        Self {
            instance,
            device,
            probe,
            queue,
            pool,
        }
    }

    /// Allocate a primary command buffer and begin it
    pub fn begin(&self, flags: vk::CommandBufferUsageFlags) -> vk::CommandBuffer {
        let buffer = self
            .device
            .allocate_command_buffers(&CommandBufferAllocateInfo {
                command_pool: self.pool,
                level: vk::CommandBufferLevel::PRIMARY,
                command_buffer_count: 1,
            })
            .unwrap()[0];
        self.device
            .begin_command_buffer(
                buffer,
                &CommandBufferBeginInfo {
                    flags,
                    inheritance: None,
                },
            )
            .unwrap();
        buffer
    }

    /// Buffer bound to its own allocation of `memory_type`
    pub fn buffer(
        &self,
        size: u64,
        usage: vk::BufferUsageFlags,
        memory_type: u32,
    ) -> (vk::Buffer, vk::DeviceMemory) {
        let buffer = self
            .device
            .create_buffer(&BufferCreateInfo {
                size,
                usage,
                ..BufferCreateInfo::default()
            })
            .unwrap();
        let requirements = self.device.get_buffer_memory_requirements(buffer).unwrap();
        let memory = self
            .device
            .allocate_memory(&MemoryAllocateInfo {
                allocation_size: requirements.size,
                memory_type_index: memory_type,
            })
            .unwrap();
        self.device.bind_buffer_memory(buffer, memory, 0).unwrap();
        (buffer, memory)
    }

    /// Host-visible vertex buffer holding `vertices`
    pub fn vertex_buffer(&self, vertices: &[[f32; 4]]) -> vk::Buffer {
        let size = std::mem::size_of_val(vertices) as u64;
        let (buffer, memory) = self.buffer(size, vk::BufferUsageFlags::VERTEX_BUFFER, HOST_VISIBLE);
        let mut mapped = self.device.map_memory(memory, 0, vk::WHOLE_SIZE).unwrap();
        mapped.write_slice(0, vertices).unwrap();
        buffer
    }

    /// RGBA8 target cleared on load
    pub fn target(&self) -> Target {
        let image = self
            .device
            .create_image(&ImageCreateInfo {
                extent: vk::Extent3D {
                    width: TARGET.width,
                    height: TARGET.height,
                    depth: 1,
                },
                usage: vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_SRC,
                ..ImageCreateInfo::default()
            })
            .unwrap();
        let requirements = self.device.get_image_memory_requirements(image).unwrap();
        let memory = self
            .device
            .allocate_memory(&MemoryAllocateInfo {
                allocation_size: requirements.size,
                memory_type_index: DEVICE_LOCAL,
            })
            .unwrap();
        self.device.bind_image_memory(image, memory, 0).unwrap();
        let view = self
            .device
            .create_image_view(&ImageViewCreateInfo {
                image,
                view_type: vk::ImageViewType::TYPE_2D,
                format: vk::Format::R8G8B8A8_UNORM,
                components: vk::ComponentMapping::default(),
                subresource_range: vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                },
            })
            .unwrap();
        let attachment = vk::AttachmentDescription {
            format: vk::Format::R8G8B8A8_UNORM,
            samples: vk::SampleCountFlags::TYPE_1,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::STORE,
            stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
            stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            final_layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            ..vk::AttachmentDescription::default()
        };
        let color = [vk::AttachmentReference {
            attachment: 0,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        }];
        let render_pass = self
            .device
            .create_render_pass(&RenderPassCreateInfo {
                attachments: &[attachment],
                subpasses: &[SubpassDescription {
                    pipeline_bind_point: vk::PipelineBindPoint::GRAPHICS,
                    color_attachments: &color,
                    ..SubpassDescription::default()
                }],
                dependencies: &[],
            })
            .unwrap();
        let framebuffer = self
            .device
            .create_framebuffer(&FramebufferCreateInfo {
                render_pass,
                attachments: &[view],
                width: TARGET.width,
                height: TARGET.height,
                layers: 1,
            })
            .unwrap();
        Target {
            image,
            view,
            render_pass,
            framebuffer,
        }
    }

    /// Pipeline layout with no sets and no push constants
    pub fn empty_layout(&self) -> vk::PipelineLayout {
        self.device
            .create_pipeline_layout(&PipelineLayoutCreateInfo::default())
            .unwrap()
    }

    /// Triangle-list pipeline reading one vec4 per vertex from binding 0
    pub fn pipeline(&self, render_pass: vk::RenderPass, layout: vk::PipelineLayout) -> vk::Pipeline {
        self.pipeline_with_bindings(render_pass, layout, 1)
    }

    /// Triangle-list pipeline reading one vec4 per vertex from each of
    /// `count` bindings, binding `n` feeding location `n`
    pub fn pipeline_with_bindings(
        &self,
        render_pass: vk::RenderPass,
        layout: vk::PipelineLayout,
        count: u32,
    ) -> vk::Pipeline {
        let code = spirv(&[(ShaderStage::Vertex, "main"), (ShaderStage::Fragment, "main")]);
        let module = self
            .device
            .create_shader_module(&ShaderModuleCreateInfo { code: &code })
            .unwrap();
        let stages = [
            PipelineShaderStageCreateInfo {
                stage: vk::ShaderStageFlags::VERTEX,
                module,
                name: "main",
                specialization: None,
            },
            PipelineShaderStageCreateInfo {
                stage: vk::ShaderStageFlags::FRAGMENT,
                module,
                name: "main",
                specialization: None,
            },
        ];
        let bindings: Vec<_> = (0..count)
            .map(|binding| vk::VertexInputBindingDescription {
                binding,
                stride: 16,
                input_rate: vk::VertexInputRate::VERTEX,
            })
            .collect();
        let attributes: Vec<_> = (0..count)
            .map(|binding| vk::VertexInputAttributeDescription {
                location: binding,
                binding,
                format: vk::Format::R32G32B32A32_SFLOAT,
                offset: 0,
            })
            .collect();
        let viewports = [vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: TARGET.width as f32,
            height: TARGET.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        }];
        let scissors = [vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: TARGET,
        }];
        let blend = [vk::PipelineColorBlendAttachmentState {
            color_write_mask: vk::ColorComponentFlags::RGBA,
            ..vk::PipelineColorBlendAttachmentState::default()
        }];
        let pipeline = self
            .device
            .create_graphics_pipelines(&[GraphicsPipelineCreateInfo {
                stages: &stages,
                vertex_input: VertexInputState {
                    bindings: &bindings,
                    attributes: &attributes,
                },
                input_assembly: InputAssemblyState {
                    topology: vk::PrimitiveTopology::TRIANGLE_LIST,
                    primitive_restart_enable: false,
                },
                tessellation: None,
                viewport: Some(ViewportState {
                    viewports: &viewports,
                    scissors: &scissors,
                }),
                rasterization: RasterizationState {
                    cull_mode: vk::CullModeFlags::BACK,
                    ..RasterizationState::default()
                },
                multisample: None,
                depth_stencil: None,
                color_blend: Some(ColorBlendState {
                    attachments: &blend,
                    ..ColorBlendState::default()
                }),
                dynamic_states: &[],
                layout,
                render_pass,
                subpass: 0,
            }])
            .unwrap()[0];
        self.device.destroy_shader_module(module).unwrap();
        pipeline
    }

    /// Submit command buffers in one batch without synchronization objects
    pub fn submit(&self, buffers: &[vk::CommandBuffer]) -> VulkanResult<()> {
        self.device.queue_submit(
            self.queue,
            &[SubmitInfo {
                command_buffers: buffers,
                ..SubmitInfo::default()
            }],
            vk::Fence::null(),
        )
    }
}
