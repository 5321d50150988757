//! Logical device
//!
//! A device owns one legacy context and the object tables for everything it
//! creates. Objects are created and destroyed under the context lock when
//! they own driver objects; pure bookkeeping objects never take the lock.
//!
//! Submission is synchronous: `queue_submit` replays, waits for the driver,
//! runs the after-submission actions and signals before it returns.

use std::sync::Arc;

use ash::vk::{self, Handle};

use crate::backends::gl::commands::{
    CommandBufferObject, CommandBufferState, CommandPoolObject, Submission,
};
use crate::backends::gl::context::{ContextHandle, ContextLock};
use crate::backends::gl::driver::DriverMessage;
use crate::backends::gl::framebuffer::{FramebufferObject, RenderPassObject};
use crate::backends::gl::pipeline::{PipelineObject, ProgramBuilder};
use crate::backends::gl::replay::Replayer;
use crate::backends::gl::{EngineStats, GlState};
use crate::core::debug::DebugEvent;
use crate::core::descriptor::{
    DescriptorPoolObject, DescriptorSetLayoutObject, DescriptorSetObject, PipelineLayoutObject,
};
use crate::core::dispatch::{DispatchTable, EntryPoint, Tier, SUPPORTED_DEVICE_EXTENSIONS};
use crate::core::error::{VulkanError, VulkanResult};
use crate::core::handles::{
    Arena, BufferKey, CommandBufferKey, CommandPoolKey, DescriptorPoolKey, DescriptorSetKey,
    DescriptorSetLayoutKey, EventKey, FenceKey, FramebufferKey, ImageKey, ImageViewKey, MemoryKey,
    PipelineKey, PipelineLayoutKey, RenderPassKey, SamplerKey, SemaphoreKey, ShaderModuleKey,
    SwapchainKey,
};
use crate::core::info::{
    BufferCreateInfo, CommandBufferAllocateInfo, CommandBufferBeginInfo, CommandPoolCreateInfo,
    ComputePipelineCreateInfo, CopyDescriptorSet, DescriptorPoolCreateInfo,
    DescriptorSetAllocateInfo, DescriptorSetLayoutCreateInfo, DeviceCreateInfo, FenceCreateInfo,
    FramebufferCreateInfo, GraphicsPipelineCreateInfo, ImageCreateInfo, ImageViewCreateInfo,
    MemoryAllocateInfo, PipelineLayoutCreateInfo, PipelineShaderStageCreateInfo,
    RenderPassCreateInfo, SamplerCreateInfo, ShaderModuleCreateInfo, SubmitInfo,
    WriteDescriptorSet,
};
use crate::core::instance::{
    features, missing_features, validated_extensions, Instance, PhysicalDeviceObject,
};
use crate::core::memory::{MappedMemory, MemoryObject};
use crate::core::resource::{BufferObject, ImageObject, ImageViewObject, SamplerObject};
use crate::core::shader::ShaderModuleObject;
use crate::core::swapchain::SwapchainObject;
use crate::core::sync::{self, EventObject, FenceObject, SemaphoreObject};

/// Raw value of the single queue handle
const QUEUE_HANDLE: u64 = 1;

/// Object tables of one device
#[derive(Default)]
#[allow(missing_docs)]
pub struct DeviceObjects {
    pub memory: Arena<MemoryKey, MemoryObject>,
    pub buffers: Arena<BufferKey, BufferObject>,
    pub images: Arena<ImageKey, ImageObject>,
    pub image_views: Arena<ImageViewKey, ImageViewObject>,
    pub samplers: Arena<SamplerKey, SamplerObject>,
    pub shader_modules: Arena<ShaderModuleKey, ShaderModuleObject>,
    pub pipeline_layouts: Arena<PipelineLayoutKey, PipelineLayoutObject>,
    pub pipelines: Arena<PipelineKey, PipelineObject>,
    pub set_layouts: Arena<DescriptorSetLayoutKey, DescriptorSetLayoutObject>,
    pub descriptor_pools: Arena<DescriptorPoolKey, DescriptorPoolObject>,
    pub descriptor_sets: Arena<DescriptorSetKey, DescriptorSetObject>,
    pub render_passes: Arena<RenderPassKey, RenderPassObject>,
    pub framebuffers: Arena<FramebufferKey, FramebufferObject>,
    pub command_pools: Arena<CommandPoolKey, CommandPoolObject>,
    pub command_buffers: Arena<CommandBufferKey, CommandBufferObject>,
    pub fences: Arena<FenceKey, FenceObject>,
    pub semaphores: Arena<SemaphoreKey, SemaphoreObject>,
    pub events: Arena<EventKey, EventObject>,
    pub swapchains: Arena<SwapchainKey, SwapchainObject>,
}

pub(crate) struct DeviceShared {
    pub(crate) instance: Instance,
    pub(crate) context: ContextHandle,
    pub(crate) objects: DeviceObjects,
    dispatch: DispatchTable,
    extensions: Vec<String>,
    features: vk::PhysicalDeviceFeatures,
}

/// One `VkDevice`; clones share the same device
#[derive(Clone)]
pub struct Device {
    pub(crate) shared: Arc<DeviceShared>,
}

/// Resolved work of one `SubmitInfo`
struct Batch {
    waits: Vec<Arc<SemaphoreObject>>,
    buffers: Vec<Arc<CommandBufferObject>>,
    submissions: Vec<Submission>,
    signals: Vec<Arc<SemaphoreObject>>,
}

/// Command buffers of a submission in flight; they leave the pending state
/// when this drops, even if replay unwinds
struct Pending<'a> {
    batches: &'a [Batch],
}

impl<'a> Pending<'a> {
    fn mark(batches: &'a [Batch]) -> Self {
        for buffer in batches.iter().flat_map(|batch| &batch.buffers) {
            buffer.mark_pending();
        }
        Self { batches }
    }
}

impl Drop for Pending<'_> {
    fn drop(&mut self) {
        for buffer in self.batches.iter().flat_map(|batch| &batch.buffers) {
            buffer.complete();
        }
    }
}

impl Device {
    pub(crate) fn new(
        instance: Instance,
        physical: &PhysicalDeviceObject,
        info: &DeviceCreateInfo<'_>,
    ) -> VulkanResult<Self> {
        if info.queue_create_infos.is_empty() {
            return Err(VulkanError::contract("device needs at least one queue"));
        }
        for queue in info.queue_create_infos {
            if queue.queue_family_index != 0 {
                return Err(VulkanError::contract(format!(
                    "queue family {} does not exist",
                    queue.queue_family_index
                )));
            }
            if queue.queue_priorities.len() != 1 {
                return Err(VulkanError::contract(format!(
                    "queue family 0 has one queue, {} requested",
                    queue.queue_priorities.len()
                )));
            }
        }
        let extensions = validated_extensions(info.enabled_extensions, SUPPORTED_DEVICE_EXTENSIONS)?;
        let supported = features(physical.caps);
        let enabled = info.enabled_features.unwrap_or_default();
        let missing = missing_features(&enabled, &supported);
        if !missing.is_empty() {
            return Err(VulkanError::FeatureNotPresent(missing.join(", ")));
        }

        let config = instance.config();
        let context = ContextHandle::new(
            instance.shared.platform.create_context()?,
            config.backend,
            config.geometry_warn_threshold(),
        )?;
        log::info!(
            "Device created on {} with extensions {:?}",
            context.driver_info().renderer,
            extensions
        );

        Ok(Self {
            shared: Arc::new(DeviceShared {
                dispatch: DispatchTable::resolve(&[Tier::Device], &extensions),
                instance,
                context,
                objects: DeviceObjects::default(),
                extensions,
                features: enabled,
            }),
        })
    }

    /// Instance the device was created from
    pub fn instance(&self) -> &Instance {
        &self.shared.instance
    }

    /// Legacy context owned by the device
    pub fn context(&self) -> &ContextHandle {
        &self.shared.context
    }

    /// Object tables
    pub fn objects(&self) -> &DeviceObjects {
        &self.shared.objects
    }

    /// Features enabled at creation
    pub fn enabled_features(&self) -> vk::PhysicalDeviceFeatures {
        self.shared.features
    }

    /// Whether a device extension was enabled
    pub fn is_extension_enabled(&self, name: &str) -> bool {
        self.shared.extensions.iter().any(|ext| ext == name)
    }

    /// `vkGetDeviceProcAddr`
    pub fn get_device_proc_addr(&self, name: &str) -> Option<&'static EntryPoint> {
        self.shared.dispatch.get(name)
    }

    /// Engine counters of the device's context
    pub fn engine_stats(&self) -> VulkanResult<EngineStats> {
        self.with_state(|state| Ok(state.stats()))
    }

    /// Run `f` with the context current and the engine state borrowed
    pub(crate) fn with_state<R>(
        &self,
        f: impl FnOnce(&mut GlState) -> VulkanResult<R>,
    ) -> VulkanResult<R> {
        let lock = self.shared.context.lock()?;
        let mut state = lock.state()?;
        f(&mut state)
    }

    /// Run an API call, reporting a rejected call on the debug channel
    pub(crate) fn guard<T>(&self, call: impl FnOnce() -> VulkanResult<T>) -> VulkanResult<T> {
        call().map_err(|err| self.shared.instance.report(err))
    }

    /// `vkGetDeviceQueue`
    pub fn get_device_queue(&self, queue_family_index: u32, queue_index: u32) -> VulkanResult<vk::Queue> {
        self.guard(|| {
            if queue_family_index != 0 || queue_index != 0 {
                return Err(VulkanError::contract(format!(
                    "queue {queue_index} of family {queue_family_index} does not exist"
                )));
            }
            Ok(vk::Queue::from_raw(QUEUE_HANDLE))
        })
    }

    pub(crate) fn check_queue(queue: vk::Queue) -> VulkanResult<()> {
        if queue.as_raw() == QUEUE_HANDLE {
            Ok(())
        } else {
            Err(VulkanError::ResourceNotFound {
                kind: "VkQueue",
                id: queue.as_raw(),
            })
        }
    }

    // Memory

    /// `vkAllocateMemory`
    pub fn allocate_memory(&self, info: &MemoryAllocateInfo) -> VulkanResult<vk::DeviceMemory> {
        self.guard(|| {
            let memory = self.with_state(|state| {
                MemoryObject::allocate(state, info.allocation_size, info.memory_type_index)
            })?;
            Ok(self.shared.objects.memory.insert(memory))
        })
    }

    /// `vkFreeMemory`; buffers and images bound to it must not be used again
    pub fn free_memory(&self, memory: vk::DeviceMemory) -> VulkanResult<()> {
        if memory == vk::DeviceMemory::null() {
            return Ok(());
        }
        self.guard(|| {
            let memory = self.shared.objects.memory.remove(memory)?;
            self.with_state(|state| {
                memory.notifier.fire(state);
                memory.release(state);
                Ok(())
            })
        })
    }

    /// `vkMapMemory`; the mapping lasts as long as the returned guard
    pub fn map_memory(
        &self,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
        size: vk::DeviceSize,
    ) -> VulkanResult<MappedMemory<'_>> {
        self.guard(|| {
            let memory = self.shared.objects.memory.get(memory)?;
            MappedMemory::map(&self.shared.context, memory, offset, size)
        })
    }

    /// `vkBindBufferMemory`
    pub fn bind_buffer_memory(
        &self,
        buffer: vk::Buffer,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
    ) -> VulkanResult<()> {
        self.guard(|| {
            let objects = &self.shared.objects;
            objects.buffers.get(buffer)?.bind(objects.memory.get(memory)?, offset)
        })
    }

    /// `vkBindImageMemory`
    pub fn bind_image_memory(
        &self,
        image: vk::Image,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
    ) -> VulkanResult<()> {
        self.guard(|| {
            let objects = &self.shared.objects;
            objects.images.get(image)?.bind(objects.memory.get(memory)?, offset)
        })
    }

    /// `vkGetBufferMemoryRequirements`
    pub fn get_buffer_memory_requirements(&self, buffer: vk::Buffer) -> VulkanResult<vk::MemoryRequirements> {
        self.guard(|| Ok(self.shared.objects.buffers.get(buffer)?.memory_requirements()))
    }

    /// `vkGetImageMemoryRequirements`
    pub fn get_image_memory_requirements(&self, image: vk::Image) -> VulkanResult<vk::MemoryRequirements> {
        self.guard(|| Ok(self.shared.objects.images.get(image)?.memory_requirements()))
    }

    // Buffers and images

    /// `vkCreateBuffer`
    pub fn create_buffer(&self, info: &BufferCreateInfo) -> VulkanResult<vk::Buffer> {
        self.guard(|| Ok(self.shared.objects.buffers.insert(BufferObject::new(info)?)))
    }

    /// `vkDestroyBuffer`; cached vertex arrays using the buffer go with it
    pub fn destroy_buffer(&self, buffer: vk::Buffer) -> VulkanResult<()> {
        if buffer == vk::Buffer::null() {
            return Ok(());
        }
        self.guard(|| {
            let buffer = self.shared.objects.buffers.remove(buffer)?;
            self.with_state(|state| {
                buffer.notifier.fire(state);
                Ok(())
            })
        })
    }

    /// `vkCreateImage`
    pub fn create_image(&self, info: &ImageCreateInfo) -> VulkanResult<vk::Image> {
        self.guard(|| {
            let image = self.with_state(|state| ImageObject::new(state, info))?;
            Ok(self.shared.objects.images.insert(image))
        })
    }

    /// `vkDestroyImage`
    pub fn destroy_image(&self, image: vk::Image) -> VulkanResult<()> {
        if image == vk::Image::null() {
            return Ok(());
        }
        self.guard(|| {
            if self.shared.objects.images.get(image)?.is_backbuffer() {
                return Err(VulkanError::contract("swapchain images are owned by their swapchain"));
            }
            let image = self.shared.objects.images.remove(image)?;
            self.with_state(|state| {
                image.release(state.driver.as_mut());
                Ok(())
            })
        })
    }

    /// `vkCreateImageView`
    pub fn create_image_view(&self, info: &ImageViewCreateInfo) -> VulkanResult<vk::ImageView> {
        self.guard(|| {
            let image = self.shared.objects.images.get(info.image)?;
            let view = self.with_state(|state| ImageViewObject::new(state, image, info))?;
            Ok(self.shared.objects.image_views.insert(view))
        })
    }

    /// `vkDestroyImageView`
    pub fn destroy_image_view(&self, view: vk::ImageView) -> VulkanResult<()> {
        if view == vk::ImageView::null() {
            return Ok(());
        }
        self.guard(|| {
            let view = self.shared.objects.image_views.remove(view)?;
            self.with_state(|state| {
                view.release(state.driver.as_mut());
                Ok(())
            })
        })
    }

    /// `vkCreateSampler`
    pub fn create_sampler(&self, info: &SamplerCreateInfo) -> VulkanResult<vk::Sampler> {
        self.guard(|| {
            let sampler = self.with_state(|state| SamplerObject::new(state, info))?;
            Ok(self.shared.objects.samplers.insert(sampler))
        })
    }

    /// `vkDestroySampler`
    pub fn destroy_sampler(&self, sampler: vk::Sampler) -> VulkanResult<()> {
        if sampler == vk::Sampler::null() {
            return Ok(());
        }
        self.guard(|| {
            let sampler = self.shared.objects.samplers.remove(sampler)?;
            self.with_state(|state| {
                state.driver.delete_sampler(sampler.sampler);
                Ok(())
            })
        })
    }

    // Shaders and pipelines

    /// `vkCreateShaderModule`
    pub fn create_shader_module(&self, info: &ShaderModuleCreateInfo<'_>) -> VulkanResult<vk::ShaderModule> {
        self.guard(|| {
            let module = ShaderModuleObject::new(info.code)?;
            Ok(self.shared.objects.shader_modules.insert(module))
        })
    }

    /// `vkDestroyShaderModule`; pipelines built from it stay valid
    pub fn destroy_shader_module(&self, module: vk::ShaderModule) -> VulkanResult<()> {
        if module == vk::ShaderModule::null() {
            return Ok(());
        }
        self.guard(|| self.shared.objects.shader_modules.remove(module).map(drop))
    }

    /// `vkCreateDescriptorSetLayout`
    pub fn create_descriptor_set_layout(
        &self,
        info: &DescriptorSetLayoutCreateInfo<'_>,
    ) -> VulkanResult<vk::DescriptorSetLayout> {
        self.guard(|| {
            let layout = DescriptorSetLayoutObject::new(info)?;
            Ok(self.shared.objects.set_layouts.insert(layout))
        })
    }

    /// `vkDestroyDescriptorSetLayout`
    pub fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout) -> VulkanResult<()> {
        if layout == vk::DescriptorSetLayout::null() {
            return Ok(());
        }
        self.guard(|| self.shared.objects.set_layouts.remove(layout).map(drop))
    }

    /// `vkCreatePipelineLayout`
    pub fn create_pipeline_layout(
        &self,
        info: &PipelineLayoutCreateInfo<'_>,
    ) -> VulkanResult<vk::PipelineLayout> {
        self.guard(|| {
            let set_layouts = info
                .set_layouts
                .iter()
                .map(|layout| self.shared.objects.set_layouts.get(*layout))
                .collect::<VulkanResult<Vec<_>>>()?;
            let layout = PipelineLayoutObject::new(
                set_layouts,
                info.push_constant_ranges,
                self.shared.instance.config().max_push_constant_size,
            )?;
            Ok(self.shared.objects.pipeline_layouts.insert(layout))
        })
    }

    /// `vkDestroyPipelineLayout`
    pub fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout) -> VulkanResult<()> {
        if layout == vk::PipelineLayout::null() {
            return Ok(());
        }
        self.guard(|| self.shared.objects.pipeline_layouts.remove(layout).map(drop))
    }

    fn program_builder(&self) -> ProgramBuilder<'_> {
        let config = self.shared.instance.config();
        ProgramBuilder {
            compiler: self.shared.instance.shared.compiler.as_ref(),
            glsl_version: config
                .glsl_version_override
                .unwrap_or_else(|| config.backend.glsl_version()),
            caps: self.shared.context.capabilities(),
        }
    }

    fn stage_modules<'i>(
        &self,
        stages: &'i [PipelineShaderStageCreateInfo<'i>],
    ) -> VulkanResult<Vec<(Arc<ShaderModuleObject>, &'i PipelineShaderStageCreateInfo<'i>)>> {
        stages
            .iter()
            .map(|stage| Ok((self.shared.objects.shader_modules.get(stage.module)?, stage)))
            .collect()
    }

    /// Destroy pipelines created earlier in a batch that failed
    fn discard_pipelines(&self, created: Vec<vk::Pipeline>) {
        for pipeline in created {
            if let Err(err) = self.destroy_pipeline(pipeline) {
                log::error!("Failed to discard pipeline {pipeline:?}: {err}");
            }
        }
    }

    /// `vkCreateGraphicsPipelines`; the pipeline cache is not emulated
    pub fn create_graphics_pipelines(
        &self,
        infos: &[GraphicsPipelineCreateInfo<'_>],
    ) -> VulkanResult<Vec<vk::Pipeline>> {
        self.guard(|| {
            let mut created = Vec::with_capacity(infos.len());
            for info in infos {
                match self.create_graphics_pipeline(info) {
                    Ok(pipeline) => created.push(pipeline),
                    Err(err) => {
                        self.discard_pipelines(created);
                        return Err(err);
                    }
                }
            }
            Ok(created)
        })
    }

    fn create_graphics_pipeline(&self, info: &GraphicsPipelineCreateInfo<'_>) -> VulkanResult<vk::Pipeline> {
        let objects = &self.shared.objects;
        let layout = objects.pipeline_layouts.get(info.layout)?;
        let render_pass = objects.render_passes.get(info.render_pass)?;
        if info.subpass as usize >= render_pass.subpasses.len() {
            return Err(VulkanError::contract(format!(
                "render pass has no subpass {}",
                info.subpass
            )));
        }
        let modules = self.stage_modules(info.stages)?;
        let stages: Vec<_> = modules
            .iter()
            .map(|(module, stage)| (module.as_ref(), *stage))
            .collect();
        let builder = self.program_builder();
        let pipeline = self.with_state(|state| {
            PipelineObject::graphics(state, &builder, info, &stages, layout)
        })?;
        Ok(objects.pipelines.insert(pipeline))
    }

    /// `vkCreateComputePipelines`
    pub fn create_compute_pipelines(
        &self,
        infos: &[ComputePipelineCreateInfo<'_>],
    ) -> VulkanResult<Vec<vk::Pipeline>> {
        self.guard(|| {
            let mut created = Vec::with_capacity(infos.len());
            for info in infos {
                let result = self.shared.objects.pipeline_layouts.get(info.layout).and_then(|layout| {
                    let module = self.shared.objects.shader_modules.get(info.stage.module)?;
                    let builder = self.program_builder();
                    self.with_state(|state| {
                        PipelineObject::compute(state, &builder, &module, &info.stage, layout)
                    })
                });
                match result {
                    Ok(pipeline) => created.push(self.shared.objects.pipelines.insert(pipeline)),
                    Err(err) => {
                        self.discard_pipelines(created);
                        return Err(err);
                    }
                }
            }
            Ok(created)
        })
    }

    /// `vkDestroyPipeline`; vertex arrays built for it are deleted
    pub fn destroy_pipeline(&self, pipeline: vk::Pipeline) -> VulkanResult<()> {
        if pipeline == vk::Pipeline::null() {
            return Ok(());
        }
        self.guard(|| {
            let pipeline = self.shared.objects.pipelines.remove(pipeline)?;
            self.with_state(|state| {
                pipeline.release(state);
                Ok(())
            })
        })
    }

    // Descriptors

    /// `vkCreateDescriptorPool`
    pub fn create_descriptor_pool(
        &self,
        info: &DescriptorPoolCreateInfo<'_>,
    ) -> VulkanResult<vk::DescriptorPool> {
        self.guard(|| {
            let pool = DescriptorPoolObject::new(info)?;
            Ok(self.shared.objects.descriptor_pools.insert(pool))
        })
    }

    /// `vkDestroyDescriptorPool`; frees every set allocated from it
    pub fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) -> VulkanResult<()> {
        if pool == vk::DescriptorPool::null() {
            return Ok(());
        }
        self.guard(|| {
            let pool = self.shared.objects.descriptor_pools.remove(pool)?;
            self.forget_sets(&pool.reset());
            Ok(())
        })
    }

    /// `vkResetDescriptorPool`
    pub fn reset_descriptor_pool(&self, pool: vk::DescriptorPool) -> VulkanResult<()> {
        self.guard(|| {
            let pool = self.shared.objects.descriptor_pools.get(pool)?;
            self.forget_sets(&pool.reset());
            Ok(())
        })
    }

    fn forget_sets(&self, sets: &[vk::DescriptorSet]) {
        for set in sets {
            if self.shared.objects.descriptor_sets.remove(*set).is_err() {
                log::warn!("Descriptor set {set:?} was already gone");
            }
        }
    }

    /// `vkAllocateDescriptorSets`
    pub fn allocate_descriptor_sets(
        &self,
        info: &DescriptorSetAllocateInfo<'_>,
    ) -> VulkanResult<Vec<vk::DescriptorSet>> {
        self.guard(|| {
            let objects = &self.shared.objects;
            let pool = objects.descriptor_pools.get(info.descriptor_pool)?;
            let layouts = info
                .set_layouts
                .iter()
                .map(|layout| objects.set_layouts.get(*layout))
                .collect::<VulkanResult<Vec<_>>>()?;
            pool.reserve(layouts.len())?;
            Ok(layouts
                .into_iter()
                .map(|layout| {
                    let set = objects
                        .descriptor_sets
                        .insert(DescriptorSetObject::new(layout, info.descriptor_pool));
                    pool.track(set);
                    set
                })
                .collect())
        })
    }

    /// `vkFreeDescriptorSets`
    pub fn free_descriptor_sets(
        &self,
        pool: vk::DescriptorPool,
        sets: &[vk::DescriptorSet],
    ) -> VulkanResult<()> {
        self.guard(|| {
            let sets: Vec<_> = sets.iter().copied().filter(|set| *set != vk::DescriptorSet::null()).collect();
            self.shared.objects.descriptor_pools.get(pool)?.free(&sets)?;
            self.forget_sets(&sets);
            Ok(())
        })
    }

    /// `vkUpdateDescriptorSets`; writes apply in order, then copies
    pub fn update_descriptor_sets(
        &self,
        writes: &[WriteDescriptorSet<'_>],
        copies: &[CopyDescriptorSet],
    ) -> VulkanResult<()> {
        self.guard(|| {
            let sets = &self.shared.objects.descriptor_sets;
            for write in writes {
                sets.get(write.dst_set)?.write(write)?;
            }
            for copy in copies {
                let source = sets.get(copy.src_set)?;
                sets.get(copy.dst_set)?.copy_from(&source, copy)?;
            }
            Ok(())
        })
    }

    // Render passes

    /// `vkCreateRenderPass`
    pub fn create_render_pass(&self, info: &RenderPassCreateInfo<'_>) -> VulkanResult<vk::RenderPass> {
        self.guard(|| {
            let render_pass = RenderPassObject::new(info)?;
            Ok(self.shared.objects.render_passes.insert(render_pass))
        })
    }

    /// `vkDestroyRenderPass`
    pub fn destroy_render_pass(&self, render_pass: vk::RenderPass) -> VulkanResult<()> {
        if render_pass == vk::RenderPass::null() {
            return Ok(());
        }
        self.guard(|| self.shared.objects.render_passes.remove(render_pass).map(drop))
    }

    /// `vkCreateFramebuffer`
    pub fn create_framebuffer(&self, info: &FramebufferCreateInfo<'_>) -> VulkanResult<vk::Framebuffer> {
        self.guard(|| {
            let objects = &self.shared.objects;
            let render_pass = objects.render_passes.get(info.render_pass)?;
            let attachments = info
                .attachments
                .iter()
                .map(|view| objects.image_views.get(*view))
                .collect::<VulkanResult<Vec<_>>>()?;
            let framebuffer = self.with_state(|state| {
                FramebufferObject::new(
                    state,
                    render_pass,
                    attachments,
                    info.width,
                    info.height,
                    info.layers,
                )
            })?;
            Ok(objects.framebuffers.insert(framebuffer))
        })
    }

    /// `vkDestroyFramebuffer`
    pub fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) -> VulkanResult<()> {
        if framebuffer == vk::Framebuffer::null() {
            return Ok(());
        }
        self.guard(|| {
            let framebuffer = self.shared.objects.framebuffers.remove(framebuffer)?;
            self.with_state(|state| {
                framebuffer.release(state);
                Ok(())
            })
        })
    }

    // Command pools and buffers

    /// `vkCreateCommandPool`
    pub fn create_command_pool(&self, info: &CommandPoolCreateInfo) -> VulkanResult<vk::CommandPool> {
        self.guard(|| {
            if info.queue_family_index != 0 {
                return Err(VulkanError::contract(format!(
                    "queue family {} does not exist",
                    info.queue_family_index
                )));
            }
            Ok(self.shared.objects.command_pools.insert(CommandPoolObject::new(info)))
        })
    }

    /// `vkDestroyCommandPool`; frees every buffer allocated from it
    pub fn destroy_command_pool(&self, pool: vk::CommandPool) -> VulkanResult<()> {
        if pool == vk::CommandPool::null() {
            return Ok(());
        }
        self.guard(|| {
            let buffers = self.shared.objects.command_pools.get(pool)?.buffers();
            self.check_not_pending(&buffers)?;
            self.shared.objects.command_pools.remove(pool)?;
            for buffer in buffers {
                // Already gone if freed concurrently
                let _ = self.shared.objects.command_buffers.remove(buffer);
            }
            Ok(())
        })
    }

    /// `vkResetCommandPool`
    pub fn reset_command_pool(&self, pool: vk::CommandPool) -> VulkanResult<()> {
        self.guard(|| {
            for buffer in self.shared.objects.command_pools.get(pool)?.buffers() {
                self.shared.objects.command_buffers.get(buffer)?.reset()?;
            }
            Ok(())
        })
    }

    /// `vkTrimCommandPool`; records hold no pooled memory to return
    pub fn trim_command_pool(&self, pool: vk::CommandPool) -> VulkanResult<()> {
        self.guard(|| self.shared.objects.command_pools.get(pool).map(drop))
    }

    /// `vkAllocateCommandBuffers`
    pub fn allocate_command_buffers(
        &self,
        info: &CommandBufferAllocateInfo,
    ) -> VulkanResult<Vec<vk::CommandBuffer>> {
        self.guard(|| {
            let pool = self.shared.objects.command_pools.get(info.command_pool)?;
            Ok((0..info.command_buffer_count)
                .map(|_| {
                    let buffer = self.shared.objects.command_buffers.insert(CommandBufferObject::new(
                        info.command_pool,
                        info.level,
                        pool.allows_reset(),
                    ));
                    pool.track(buffer);
                    buffer
                })
                .collect())
        })
    }

    fn check_not_pending(&self, buffers: &[vk::CommandBuffer]) -> VulkanResult<()> {
        for buffer in buffers {
            if let Ok(object) = self.shared.objects.command_buffers.get(*buffer) {
                if object.state() == CommandBufferState::Pending {
                    return Err(VulkanError::contract(format!(
                        "command buffer {buffer:?} is pending execution"
                    )));
                }
            }
        }
        Ok(())
    }

    /// `vkFreeCommandBuffers`
    pub fn free_command_buffers(
        &self,
        pool: vk::CommandPool,
        buffers: &[vk::CommandBuffer],
    ) -> VulkanResult<()> {
        self.guard(|| {
            let pool_object = self.shared.objects.command_pools.get(pool)?;
            let buffers: Vec<_> = buffers.iter().copied().filter(|buffer| *buffer != vk::CommandBuffer::null()).collect();
            self.check_not_pending(&buffers)?;
            for buffer in &buffers {
                if self.shared.objects.command_buffers.get(*buffer)?.pool != pool {
                    return Err(VulkanError::contract(format!(
                        "command buffer {buffer:?} was not allocated from {pool:?}"
                    )));
                }
            }
            for buffer in &buffers {
                self.shared.objects.command_buffers.remove(*buffer)?;
            }
            pool_object.untrack(&buffers);
            Ok(())
        })
    }

    /// `vkBeginCommandBuffer`
    pub fn begin_command_buffer(
        &self,
        buffer: vk::CommandBuffer,
        info: &CommandBufferBeginInfo,
    ) -> VulkanResult<()> {
        self.guard(|| self.shared.objects.command_buffers.get(buffer)?.begin(info))
    }

    /// `vkEndCommandBuffer`
    pub fn end_command_buffer(&self, buffer: vk::CommandBuffer) -> VulkanResult<()> {
        self.guard(|| self.shared.objects.command_buffers.get(buffer)?.end())
    }

    /// `vkResetCommandBuffer`; the pool must allow individual resets
    pub fn reset_command_buffer(&self, buffer: vk::CommandBuffer) -> VulkanResult<()> {
        self.guard(|| {
            let object = self.shared.objects.command_buffers.get(buffer)?;
            if !self.shared.objects.command_pools.get(object.pool)?.allows_reset() {
                return Err(VulkanError::contract(
                    "pool was not created with RESET_COMMAND_BUFFER",
                ));
            }
            object.reset()
        })
    }

    // Synchronization

    /// `vkCreateFence`
    pub fn create_fence(&self, info: &FenceCreateInfo) -> VulkanResult<vk::Fence> {
        let signaled = info.flags.contains(vk::FenceCreateFlags::SIGNALED);
        Ok(self.shared.objects.fences.insert(FenceObject::new(signaled)))
    }

    /// `vkDestroyFence`
    pub fn destroy_fence(&self, fence: vk::Fence) -> VulkanResult<()> {
        if fence == vk::Fence::null() {
            return Ok(());
        }
        self.guard(|| self.shared.objects.fences.remove(fence).map(drop))
    }

    /// `vkResetFences`
    pub fn reset_fences(&self, fences: &[vk::Fence]) -> VulkanResult<()> {
        self.guard(|| {
            for fence in self.resolve_fences(fences)? {
                fence.reset();
            }
            Ok(())
        })
    }

    /// `vkGetFenceStatus`: `SUCCESS` or `NOT_READY`
    pub fn get_fence_status(&self, fence: vk::Fence) -> VulkanResult<vk::Result> {
        self.guard(|| Ok(self.shared.objects.fences.get(fence)?.status()))
    }

    /// `vkWaitForFences`: `SUCCESS` or `TIMEOUT`
    pub fn wait_for_fences(
        &self,
        fences: &[vk::Fence],
        wait_all: bool,
        timeout_ns: u64,
    ) -> VulkanResult<vk::Result> {
        self.guard(|| {
            let fences = self.resolve_fences(fences)?;
            Ok(sync::wait_for_fences(&fences, wait_all, timeout_ns))
        })
    }

    fn resolve_fences(&self, fences: &[vk::Fence]) -> VulkanResult<Vec<Arc<FenceObject>>> {
        fences
            .iter()
            .map(|fence| self.shared.objects.fences.get(*fence))
            .collect()
    }

    /// `vkCreateSemaphore`
    pub fn create_semaphore(&self) -> VulkanResult<vk::Semaphore> {
        Ok(self.shared.objects.semaphores.insert(SemaphoreObject::new()))
    }

    /// `vkDestroySemaphore`
    pub fn destroy_semaphore(&self, semaphore: vk::Semaphore) -> VulkanResult<()> {
        if semaphore == vk::Semaphore::null() {
            return Ok(());
        }
        self.guard(|| self.shared.objects.semaphores.remove(semaphore).map(drop))
    }

    fn resolve_semaphores(&self, semaphores: &[vk::Semaphore]) -> VulkanResult<Vec<Arc<SemaphoreObject>>> {
        semaphores
            .iter()
            .map(|semaphore| self.shared.objects.semaphores.get(*semaphore))
            .collect()
    }

    /// `vkCreateEvent`
    pub fn create_event(&self) -> VulkanResult<vk::Event> {
        Ok(self.shared.objects.events.insert(EventObject::new()))
    }

    /// `vkDestroyEvent`
    pub fn destroy_event(&self, event: vk::Event) -> VulkanResult<()> {
        if event == vk::Event::null() {
            return Ok(());
        }
        self.guard(|| self.shared.objects.events.remove(event).map(drop))
    }

    /// `vkGetEventStatus`: `EVENT_SET` or `EVENT_RESET`
    pub fn get_event_status(&self, event: vk::Event) -> VulkanResult<vk::Result> {
        self.guard(|| Ok(self.shared.objects.events.get(event)?.status()))
    }

    /// `vkSetEvent`
    pub fn set_event(&self, event: vk::Event) -> VulkanResult<()> {
        self.guard(|| {
            self.shared.objects.events.get(event)?.set(true);
            Ok(())
        })
    }

    /// `vkResetEvent`
    pub fn reset_event(&self, event: vk::Event) -> VulkanResult<()> {
        self.guard(|| {
            self.shared.objects.events.get(event)?.set(false);
            Ok(())
        })
    }

    // Queue

    /// `vkQueueSubmit`.
    ///
    /// Everything is validated before the first record is replayed. The
    /// submission has completed when this returns; semaphores and the fence
    /// are signaled only if every command buffer replayed.
    pub fn queue_submit(
        &self,
        queue: vk::Queue,
        submits: &[SubmitInfo<'_>],
        fence: vk::Fence,
    ) -> VulkanResult<()> {
        self.guard(|| {
            Self::check_queue(queue)?;
            let fence = if fence == vk::Fence::null() {
                None
            } else {
                Some(self.shared.objects.fences.get(fence)?)
            };
            if fence.as_ref().is_some_and(|fence| fence.is_signaled()) {
                return Err(VulkanError::contract("submission fence is already signaled"));
            }

            let batches = submits
                .iter()
                .map(|submit| self.resolve_batch(submit))
                .collect::<VulkanResult<Vec<_>>>()?;
            if let Some(unsignaled) = batches
                .iter()
                .flat_map(|batch| &batch.waits)
                .find(|semaphore| !semaphore.is_signaled())
            {
                return Err(VulkanError::contract(format!(
                    "wait on a semaphore with no pending signal ({unsignaled:?})"
                )));
            }
            for semaphore in batches.iter().flat_map(|batch| &batch.waits) {
                semaphore.consume()?;
            }

            let lock = self.shared.context.lock()?;
            let pending = Pending::mark(&batches);
            let result = self.execute(&lock, pending.batches);
            drop(pending);
            if result.is_ok() {
                for semaphore in batches.iter().flat_map(|batch| &batch.signals) {
                    semaphore.signal();
                }
                if let Some(fence) = &fence {
                    fence.signal();
                }
            }
            drop(lock);
            result
        })
    }

    fn resolve_batch(&self, submit: &SubmitInfo<'_>) -> VulkanResult<Batch> {
        if submit.wait_semaphores.len() != submit.wait_dst_stage_mask.len() {
            return Err(VulkanError::contract(format!(
                "{} wait semaphores with {} stage masks",
                submit.wait_semaphores.len(),
                submit.wait_dst_stage_mask.len()
            )));
        }
        let buffers = submit
            .command_buffers
            .iter()
            .map(|buffer| self.shared.objects.command_buffers.get(*buffer))
            .collect::<VulkanResult<Vec<_>>>()?;
        let mut submissions = Vec::with_capacity(buffers.len());
        for buffer in &buffers {
            if buffer.level != vk::CommandBufferLevel::PRIMARY {
                return Err(VulkanError::contract(
                    "secondary command buffers run through vkCmdExecuteCommands",
                ));
            }
            submissions.push(buffer.submission()?);
        }
        Ok(Batch {
            waits: self.resolve_semaphores(submit.wait_semaphores)?,
            buffers,
            submissions,
            signals: self.resolve_semaphores(submit.signal_semaphores)?,
        })
    }

    /// Replay every batch, wait for the driver, then run the actions
    fn execute(&self, lock: &ContextLock<'_>, batches: &[Batch]) -> VulkanResult<()> {
        let mut state = lock.state()?;
        for (_, memory) in self.shared.objects.memory.entries() {
            memory.upload_dirty(&mut state);
        }

        let mut replayed = Ok(());
        'batches: for batch in batches {
            for submission in &batch.submissions {
                replayed = Replayer::new(&mut state, &self.shared.objects).run(&submission.commands);
                if replayed.is_err() {
                    break 'batches;
                }
            }
        }
        let finished = state.driver.finish();
        state.stats.submissions += 1;
        let messages = state.take_debug_messages();
        drop(state);

        self.forward_driver_messages(&messages);
        replayed?;
        finished?;
        for submission in batches.iter().flat_map(|batch| &batch.submissions) {
            for action in &submission.actions {
                action();
            }
        }
        Ok(())
    }

    fn forward_driver_messages(&self, messages: &[DriverMessage]) {
        if !self.shared.instance.config().enable_debug_output {
            return;
        }
        for message in messages {
            log::debug!("Driver: {}", message.text);
            self.shared.instance.debug_channel().emit(&DebugEvent::from_driver(message));
        }
    }

    /// `vkQueueWaitIdle`
    pub fn queue_wait_idle(&self, queue: vk::Queue) -> VulkanResult<()> {
        self.guard(|| {
            Self::check_queue(queue)?;
            self.device_wait_idle()
        })
    }

    /// `vkDeviceWaitIdle`; submissions already completed, so this only drains the driver
    pub fn device_wait_idle(&self) -> VulkanResult<()> {
        self.with_state(|state| Ok(state.driver.finish()?))
    }
}

impl Drop for DeviceShared {
    fn drop(&mut self) {
        let objects = &self.objects;
        let released = self.context.lock().and_then(|lock| {
            let mut state = lock.state()?;
            for framebuffer in objects.framebuffers.drain() {
                framebuffer.release(&mut state);
            }
            for pipeline in objects.pipelines.drain() {
                pipeline.release(&mut state);
            }
            for view in objects.image_views.drain() {
                view.release(state.driver.as_mut());
            }
            objects.swapchains.drain();
            for image in objects.images.drain() {
                image.release(state.driver.as_mut());
            }
            for sampler in objects.samplers.drain() {
                state.driver.delete_sampler(sampler.sampler);
            }
            for buffer in objects.buffers.drain() {
                buffer.notifier.fire(&mut state);
            }
            for memory in objects.memory.drain() {
                memory.notifier.fire(&mut state);
                memory.release(&mut state);
            }
            Ok(())
        });
        if let Err(err) = released {
            log::error!("Device teardown failed: {err}");
        }
        log::info!("Device destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::noop::{GlCall, NoopPlatform};
    use crate::backends::Platform;
    use crate::config::EmulatorConfig;
    use crate::core::info::{DeviceQueueCreateInfo, InstanceCreateInfo};

    fn device() -> (Device, Arc<NoopPlatform>) {
        let platform = Arc::new(NoopPlatform::new());
        let instance = Instance::new(&InstanceCreateInfo {
            application_name: "device-test",
            config: Some(EmulatorConfig::noop()),
            platform: Some(Arc::clone(&platform) as Arc<dyn Platform>),
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
        (device, platform)
    }

    #[test]
    fn test_queue_family_is_checked() {
        let (device, _) = device();
        assert!(device.get_device_queue(0, 0).is_ok());
        assert!(device.get_device_queue(1, 0).unwrap_err().is_contract_violation());
    }

    #[test]
    fn test_null_handles_destroy_quietly() {
        let (device, _) = device();
        device.destroy_buffer(vk::Buffer::null()).unwrap();
        device.free_memory(vk::DeviceMemory::null()).unwrap();
        device.destroy_pipeline(vk::Pipeline::null()).unwrap();
    }

    #[test]
    fn test_destroyed_handle_is_not_found() {
        let (device, _) = device();
        let buffer = device
            .create_buffer(&BufferCreateInfo {
                size: 64,
                usage: vk::BufferUsageFlags::VERTEX_BUFFER,
                ..BufferCreateInfo::default()
            })
            .unwrap();
        device.destroy_buffer(buffer).unwrap();
        assert!(matches!(
            device.destroy_buffer(buffer),
            Err(VulkanError::ResourceNotFound { kind: "VkBuffer", .. })
        ));
    }

    #[test]
    fn test_empty_submit_signals_fence() {
        let (device, platform) = device();
        let queue = device.get_device_queue(0, 0).unwrap();
        let fence = device.create_fence(&FenceCreateInfo::default()).unwrap();
        device.queue_submit(queue, &[], fence).unwrap();
        assert_eq!(device.get_fence_status(fence).unwrap(), vk::Result::SUCCESS);
        assert!(platform.probe().calls().count(|call| matches!(call, GlCall::Finish)) >= 1);

        // Submitting with a signaled fence is rejected
        assert!(device.queue_submit(queue, &[], fence).is_err());
        device.reset_fences(&[fence]).unwrap();
        assert_eq!(device.get_fence_status(fence).unwrap(), vk::Result::NOT_READY);
    }

    #[test]
    fn test_wait_without_signal_is_rejected() {
        let (device, _) = device();
        let queue = device.get_device_queue(0, 0).unwrap();
        let semaphore = device.create_semaphore().unwrap();
        let submit = SubmitInfo {
            wait_semaphores: &[semaphore],
            wait_dst_stage_mask: &[vk::PipelineStageFlags::TOP_OF_PIPE],
            ..SubmitInfo::default()
        };
        assert!(device
            .queue_submit(queue, &[submit], vk::Fence::null())
            .unwrap_err()
            .is_contract_violation());
    }

    #[test]
    fn test_unsupported_feature_fails_creation() {
        let platform = Arc::new(NoopPlatform::new());
        let instance = Instance::new(&InstanceCreateInfo {
            config: Some(EmulatorConfig::noop()),
            platform: Some(platform as Arc<dyn Platform>),
            ..InstanceCreateInfo::default()
        })
        .unwrap();
        let physical = instance.enumerate_physical_devices()[0];
        let result = instance.create_device(
            physical,
            &DeviceCreateInfo {
                queue_create_infos: &[DeviceQueueCreateInfo {
                    queue_family_index: 0,
                    queue_priorities: &[1.0],
                }],
                enabled_features: Some(vk::PhysicalDeviceFeatures {
                    sparse_binding: vk::TRUE,
                    ..Default::default()
                }),
                ..DeviceCreateInfo::default()
            },
        );
        assert!(matches!(result, Err(VulkanError::FeatureNotPresent(_))));
    }

    #[test]
    fn test_descriptor_pool_reset_frees_sets() {
        let (device, _) = device();
        let layout = device
            .create_descriptor_set_layout(&DescriptorSetLayoutCreateInfo::default())
            .unwrap();
        let pool = device
            .create_descriptor_pool(&DescriptorPoolCreateInfo {
                max_sets: 2,
                ..DescriptorPoolCreateInfo::default()
            })
            .unwrap();
        let info = DescriptorSetAllocateInfo {
            descriptor_pool: pool,
            set_layouts: &[layout, layout],
        };
        let sets = device.allocate_descriptor_sets(&info).unwrap();
        assert_eq!(
            device.allocate_descriptor_sets(&info).unwrap_err().result(),
            vk::Result::ERROR_OUT_OF_POOL_MEMORY
        );
        device.reset_descriptor_pool(pool).unwrap();
        assert!(!device.objects().descriptor_sets.contains(sets[0]));
        assert_eq!(device.allocate_descriptor_sets(&info).unwrap().len(), 2);
    }
}
