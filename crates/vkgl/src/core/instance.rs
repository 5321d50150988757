//! Instance and physical device
//!
//! An instance fixes the backend for its lifetime. Translated backends probe
//! one context at creation to learn the driver's feature level; every device
//! later gets its own context from the same platform.

use std::sync::Arc;

use ash::vk;

use crate::backends::gl::context::ContextHandle;
use crate::backends::gl::driver::DriverInfo;
use crate::backends::gl::format::{classify, gl_format, vertex_format, FormatClass};
use crate::backends::noop::{NoopPlatform, NoopShaderCompiler};
use crate::backends::{BackendKind, Capabilities, Platform};
use crate::config::EmulatorConfig;
use crate::core::debug::{DebugChannel, DebugEvent};
use crate::core::device::Device;
use crate::core::dispatch::{
    self, DispatchTable, EntryPoint, Tier, EXT_DEBUG_REPORT, EXT_DEBUG_UTILS,
};
use crate::core::error::{VulkanError, VulkanResult};
use crate::core::handles::{Arena, PhysicalDeviceKey, SurfaceKey};
use crate::core::info::{
    DebugReportCallbackCreateInfo, DebugUtilsMessengerCreateInfo, DeviceCreateInfo,
    InstanceCreateInfo,
};
use crate::core::memory;
use crate::core::shader::ShaderCompiler;
use crate::core::swapchain::SurfaceObject;

/// Highest API version the emulator reports
pub const API_VERSION: u32 = vk::API_VERSION_1_0;

/// Vendor id reported for every backend
pub const VENDOR_ID: u32 = 0x10005;

/// `vkEnumerateInstanceVersion`
pub const fn enumerate_instance_version() -> u32 {
    API_VERSION
}

/// `vkEnumerateInstanceExtensionProperties`
pub fn enumerate_instance_extension_properties() -> Vec<&'static str> {
    dispatch::supported_instance_extensions()
}

/// `vkEnumerateInstanceLayerProperties`; the emulator has no layers
pub fn enumerate_instance_layer_properties() -> Vec<&'static str> {
    Vec::new()
}

/// Global-tier `vkGetInstanceProcAddr(VK_NULL_HANDLE, name)`
pub fn get_global_proc_addr(name: &str) -> Option<&'static EntryPoint> {
    DispatchTable::global().get(name)
}

/// `VkPhysicalDeviceProperties` with the name as a Rust string
#[derive(Debug, Clone)]
pub struct PhysicalDeviceProperties {
    /// Reported API version
    pub api_version: u32,
    /// Backend driver version packed as `major << 22 | minor << 12`
    pub driver_version: u32,
    /// Vendor id
    pub vendor_id: u32,
    /// Device id
    pub device_id: u32,
    /// Device type
    pub device_type: vk::PhysicalDeviceType,
    /// Human readable name
    pub device_name: String,
    /// Limits derived from the backend
    pub limits: vk::PhysicalDeviceLimits,
}

/// What the probe context reported
#[derive(Debug, Clone)]
pub(crate) struct PhysicalDeviceObject {
    pub(crate) caps: Capabilities,
    pub(crate) info: DriverInfo,
}

pub(crate) struct InstanceShared {
    pub(crate) config: EmulatorConfig,
    pub(crate) platform: Arc<dyn Platform>,
    pub(crate) compiler: Arc<dyn ShaderCompiler>,
    pub(crate) extensions: Vec<String>,
    pub(crate) debug: DebugChannel,
    pub(crate) surfaces: Arena<SurfaceKey, SurfaceObject>,
    dispatch: DispatchTable,
    physical_devices: Arena<PhysicalDeviceKey, PhysicalDeviceObject>,
}

/// One `VkInstance`; clones share the same instance
#[derive(Clone)]
pub struct Instance {
    pub(crate) shared: Arc<InstanceShared>,
}

impl Instance {
    /// `vkCreateInstance`
    pub fn new(info: &InstanceCreateInfo<'_>) -> VulkanResult<Self> {
        let mut config = info.config.clone().unwrap_or_default().with_env_overrides()?;
        config.validate()?;
        if !info.application_name.is_empty() {
            config.application_name = info.application_name.to_string();
        }
        if info.api_version > API_VERSION {
            log::warn!(
                "Requested API version {:#x} is newer than the emulated {:#x}",
                info.api_version,
                API_VERSION
            );
        }

        let supported = dispatch::supported_instance_extensions();
        let extensions = validated_extensions(info.enabled_extensions, &supported)?;

        if config.backend == BackendKind::Native {
            return Err(VulkanError::IncompatibleDriver(
                "the native backend is provided by the system Vulkan loader".to_string(),
            ));
        }

        let platform: Arc<dyn Platform> = match (&info.platform, config.backend) {
            (Some(platform), _) => Arc::clone(platform),
            (None, BackendKind::Noop) => Arc::new(NoopPlatform::new()),
            (None, backend) => {
                return Err(VulkanError::InitializationFailed(format!(
                    "the {backend} backend needs a platform"
                )))
            }
        };
        let compiler: Arc<dyn ShaderCompiler> = match (&info.shader_compiler, config.backend) {
            (Some(compiler), _) => Arc::clone(compiler),
            (None, BackendKind::Noop) => Arc::new(NoopShaderCompiler),
            (None, backend) => {
                return Err(VulkanError::InitializationFailed(format!(
                    "the {backend} backend needs a shader compiler"
                )))
            }
        };

        // Probe the driver once; the probe context is dropped immediately
        let probe = ContextHandle::new(
            platform.create_context()?,
            config.backend,
            config.geometry_warn_threshold(),
        )?;
        let physical = PhysicalDeviceObject {
            caps: probe.capabilities(),
            info: probe.driver_info().clone(),
        };
        drop(probe);

        log::info!(
            "Instance created for '{}' on the {} backend ({} platform)",
            config.application_name,
            config.backend,
            platform.name()
        );

        let physical_devices = Arena::new();
        physical_devices.insert(physical);
        Ok(Self {
            shared: Arc::new(InstanceShared {
                dispatch: DispatchTable::resolve(&[Tier::Global, Tier::Instance, Tier::Device], &extensions),
                config,
                platform,
                compiler,
                extensions,
                debug: DebugChannel::new(),
                surfaces: Arena::new(),
                physical_devices,
            }),
        })
    }

    /// Settings the instance was created with
    pub fn config(&self) -> &EmulatorConfig {
        &self.shared.config
    }

    /// Backend chosen at creation
    pub fn backend(&self) -> BackendKind {
        self.shared.config.backend
    }

    /// Whether an instance extension was enabled
    pub fn is_extension_enabled(&self, name: &str) -> bool {
        self.shared.extensions.iter().any(|ext| ext == name)
    }

    pub(crate) fn require_extension(&self, name: &str) -> VulkanResult<()> {
        if self.is_extension_enabled(name) {
            Ok(())
        } else {
            Err(VulkanError::ExtensionNotPresent(format!("{name} is not enabled")))
        }
    }

    /// Debug callbacks registered on this instance
    pub fn debug_channel(&self) -> &DebugChannel {
        &self.shared.debug
    }

    /// `vkGetInstanceProcAddr`
    pub fn get_instance_proc_addr(&self, name: &str) -> Option<&'static EntryPoint> {
        self.shared.dispatch.get(name)
    }

    /// `vkEnumeratePhysicalDevices`
    pub fn enumerate_physical_devices(&self) -> Vec<vk::PhysicalDevice> {
        self.shared
            .physical_devices
            .entries()
            .into_iter()
            .map(|(handle, _)| handle)
            .collect()
    }

    pub(crate) fn physical_device(&self, handle: vk::PhysicalDevice) -> VulkanResult<Arc<PhysicalDeviceObject>> {
        self.shared.physical_devices.get(handle)
    }

    /// `vkGetPhysicalDeviceProperties`
    pub fn get_physical_device_properties(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> VulkanResult<PhysicalDeviceProperties> {
        let physical = self.physical_device(physical_device)?;
        let (major, minor) = physical.info.version;
        Ok(PhysicalDeviceProperties {
            api_version: API_VERSION,
            driver_version: vk::make_api_version(0, major, minor, 0),
            vendor_id: VENDOR_ID,
            device_id: 0,
            device_type: vk::PhysicalDeviceType::OTHER,
            device_name: format!("vkgl {} ({})", self.backend(), physical.info.renderer),
            limits: limits(physical.caps, self.shared.config.max_push_constant_size),
        })
    }

    /// `vkGetPhysicalDeviceFeatures`
    pub fn get_physical_device_features(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> VulkanResult<vk::PhysicalDeviceFeatures> {
        Ok(features(self.physical_device(physical_device)?.caps))
    }

    /// `vkGetPhysicalDeviceMemoryProperties`
    pub fn get_physical_device_memory_properties(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> VulkanResult<vk::PhysicalDeviceMemoryProperties> {
        self.physical_device(physical_device)?;
        Ok(memory::memory_properties())
    }

    /// `vkGetPhysicalDeviceQueueFamilyProperties`; one family with one queue
    pub fn get_physical_device_queue_family_properties(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> VulkanResult<Vec<vk::QueueFamilyProperties>> {
        let physical = self.physical_device(physical_device)?;
        let mut flags = vk::QueueFlags::GRAPHICS | vk::QueueFlags::TRANSFER;
        if physical.caps.contains(Capabilities::COMPUTE) {
            flags |= vk::QueueFlags::COMPUTE;
        }
        Ok(vec![vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            timestamp_valid_bits: 0,
            min_image_transfer_granularity: vk::Extent3D {
                width: 1,
                height: 1,
                depth: 1,
            },
        }])
    }

    /// `vkGetPhysicalDeviceFormatProperties`
    pub fn get_physical_device_format_properties(
        &self,
        physical_device: vk::PhysicalDevice,
        format: vk::Format,
    ) -> VulkanResult<vk::FormatProperties> {
        self.physical_device(physical_device)?;
        Ok(format_properties(format))
    }

    /// `vkEnumerateDeviceExtensionProperties`
    pub fn enumerate_device_extension_properties(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> VulkanResult<Vec<&'static str>> {
        self.physical_device(physical_device)?;
        Ok(dispatch::SUPPORTED_DEVICE_EXTENSIONS.to_vec())
    }

    /// `vkCreateDevice`
    pub fn create_device(
        &self,
        physical_device: vk::PhysicalDevice,
        info: &DeviceCreateInfo<'_>,
    ) -> VulkanResult<Device> {
        let physical = self.physical_device(physical_device)?;
        Device::new(self.clone(), &physical, info)
    }

    /// `vkCreateDebugReportCallbackEXT`
    pub fn create_debug_report_callback(
        &self,
        info: &DebugReportCallbackCreateInfo,
    ) -> VulkanResult<vk::DebugReportCallbackEXT> {
        self.require_extension(EXT_DEBUG_REPORT)?;
        Ok(self.shared.debug.register_report(info))
    }

    /// `vkDestroyDebugReportCallbackEXT`
    pub fn destroy_debug_report_callback(
        &self,
        callback: vk::DebugReportCallbackEXT,
    ) -> VulkanResult<()> {
        self.require_extension(EXT_DEBUG_REPORT)?;
        self.shared.debug.unregister_report(callback)
    }

    /// `vkCreateDebugUtilsMessengerEXT`
    pub fn create_debug_utils_messenger(
        &self,
        info: &DebugUtilsMessengerCreateInfo,
    ) -> VulkanResult<vk::DebugUtilsMessengerEXT> {
        self.require_extension(EXT_DEBUG_UTILS)?;
        Ok(self.shared.debug.register_messenger(info))
    }

    /// `vkDestroyDebugUtilsMessengerEXT`
    pub fn destroy_debug_utils_messenger(
        &self,
        messenger: vk::DebugUtilsMessengerEXT,
    ) -> VulkanResult<()> {
        self.require_extension(EXT_DEBUG_UTILS)?;
        self.shared.debug.unregister_messenger(messenger)
    }

    /// `vkSubmitDebugUtilsMessageEXT` / `vkDebugReportMessageEXT`
    pub fn submit_debug_message(&self, event: &DebugEvent) -> VulkanResult<()> {
        if !self.is_extension_enabled(EXT_DEBUG_UTILS) && !self.is_extension_enabled(EXT_DEBUG_REPORT) {
            return Err(VulkanError::ExtensionNotPresent(
                "no debug extension is enabled".to_string(),
            ));
        }
        self.shared.debug.emit(event);
        Ok(())
    }

    /// Log a rejected call and forward it to the debug callbacks
    pub(crate) fn report(&self, error: VulkanError) -> VulkanError {
        if error.is_contract_violation() && self.shared.config.report_contract_violations {
            log::warn!("{error}");
            self.shared.debug.emit(&DebugEvent::contract_violation(&error));
        }
        error
    }
}

impl Drop for InstanceShared {
    fn drop(&mut self) {
        for surface in self.surfaces.drain() {
            self.platform.destroy_surface(surface.native);
        }
        log::info!("Instance for '{}' destroyed", self.config.application_name);
    }
}

/// Check requested extensions against a supported list
pub(crate) fn validated_extensions(requested: &[&str], supported: &[&str]) -> VulkanResult<Vec<String>> {
    requested
        .iter()
        .map(|name| {
            if supported.contains(name) {
                Ok((*name).to_string())
            } else {
                Err(VulkanError::ExtensionNotPresent((*name).to_string()))
            }
        })
        .collect()
}

/// Features the backend can honour
pub(crate) fn features(caps: Capabilities) -> vk::PhysicalDeviceFeatures {
    let flag = |cap| if caps.contains(cap) { vk::TRUE } else { vk::FALSE };
    vk::PhysicalDeviceFeatures {
        full_draw_index_uint32: vk::TRUE,
        independent_blend: flag(Capabilities::INDEXED_BLEND),
        sample_rate_shading: flag(Capabilities::SAMPLE_SHADING),
        tessellation_shader: flag(Capabilities::TESSELLATION),
        multi_draw_indirect: flag(Capabilities::DRAW_INDIRECT),
        draw_indirect_first_instance: flag(Capabilities::BASE_INSTANCE),
        depth_clamp: vk::TRUE,
        depth_bias_clamp: vk::TRUE,
        fill_mode_non_solid: vk::TRUE,
        wide_lines: vk::TRUE,
        multi_viewport: flag(Capabilities::VIEWPORT_ARRAY),
        sampler_anisotropy: vk::TRUE,
        texture_compression_bc: vk::FALSE,
        vertex_pipeline_stores_and_atomics: flag(Capabilities::STORAGE),
        fragment_stores_and_atomics: flag(Capabilities::STORAGE),
        shader_clip_distance: vk::TRUE,
        ..Default::default()
    }
}

macro_rules! feature_names {
    ($($field:ident),* $(,)?) => {
        /// Names of features requested in `requested` but absent from `supported`
        pub(crate) fn missing_features(
            requested: &vk::PhysicalDeviceFeatures,
            supported: &vk::PhysicalDeviceFeatures,
        ) -> Vec<&'static str> {
            let mut missing = Vec::new();
            $(
                if requested.$field == vk::TRUE && supported.$field != vk::TRUE {
                    missing.push(stringify!($field));
                }
            )*
            missing
        }
    };
}

feature_names!(
    robust_buffer_access,
    full_draw_index_uint32,
    image_cube_array,
    independent_blend,
    geometry_shader,
    tessellation_shader,
    sample_rate_shading,
    dual_src_blend,
    logic_op,
    multi_draw_indirect,
    draw_indirect_first_instance,
    depth_clamp,
    depth_bias_clamp,
    fill_mode_non_solid,
    depth_bounds,
    wide_lines,
    large_points,
    alpha_to_one,
    multi_viewport,
    sampler_anisotropy,
    texture_compression_etc2,
    texture_compression_astc_ldr,
    texture_compression_bc,
    occlusion_query_precise,
    pipeline_statistics_query,
    vertex_pipeline_stores_and_atomics,
    fragment_stores_and_atomics,
    shader_tessellation_and_geometry_point_size,
    shader_image_gather_extended,
    shader_storage_image_extended_formats,
    shader_storage_image_multisample,
    shader_storage_image_read_without_format,
    shader_storage_image_write_without_format,
    shader_uniform_buffer_array_dynamic_indexing,
    shader_sampled_image_array_dynamic_indexing,
    shader_storage_buffer_array_dynamic_indexing,
    shader_storage_image_array_dynamic_indexing,
    shader_clip_distance,
    shader_cull_distance,
    shader_float64,
    shader_int64,
    shader_int16,
    shader_resource_residency,
    shader_resource_min_lod,
    sparse_binding,
    sparse_residency_buffer,
    sparse_residency_image2_d,
    sparse_residency_image3_d,
    sparse_residency2_samples,
    sparse_residency4_samples,
    sparse_residency8_samples,
    sparse_residency16_samples,
    sparse_residency_aliased,
    variable_multisample_rate,
    inherited_queries,
);

/// Viewport and scissor slots a context exposes
pub(crate) const fn max_viewports(caps: Capabilities) -> u32 {
    if caps.contains(Capabilities::VIEWPORT_ARRAY) {
        16
    } else {
        1
    }
}

fn limits(caps: Capabilities, max_push_constant_size: u32) -> vk::PhysicalDeviceLimits {
    vk::PhysicalDeviceLimits {
        max_image_dimension1_d: 16384,
        max_image_dimension2_d: 16384,
        max_image_dimension3_d: 2048,
        max_image_dimension_cube: 16384,
        max_image_array_layers: 2048,
        max_uniform_buffer_range: 65536,
        max_storage_buffer_range: if caps.contains(Capabilities::STORAGE) { 1 << 27 } else { 0 },
        max_push_constants_size: max_push_constant_size,
        max_memory_allocation_count: 4096,
        max_bound_descriptor_sets: 8,
        max_vertex_input_attributes: 16,
        max_vertex_input_bindings: 16,
        max_vertex_input_attribute_offset: 2047,
        max_vertex_input_binding_stride: 2048,
        max_color_attachments: 8,
        max_viewports: max_viewports(caps),
        max_viewport_dimensions: [16384, 16384],
        max_framebuffer_width: 16384,
        max_framebuffer_height: 16384,
        max_framebuffer_layers: 2048,
        max_compute_work_group_count: if caps.contains(Capabilities::COMPUTE) {
            [65535; 3]
        } else {
            [0; 3]
        },
        min_uniform_buffer_offset_alignment: 256,
        min_storage_buffer_offset_alignment: 256,
        min_memory_map_alignment: 64,
        non_coherent_atom_size: 64,
        line_width_range: [1.0, 8.0],
        point_size_range: [1.0, 64.0],
        ..Default::default()
    }
}

fn format_properties(format: vk::Format) -> vk::FormatProperties {
    if gl_format(format).is_none() {
        return vk::FormatProperties::default();
    }
    let transfer = vk::FormatFeatureFlags::TRANSFER_SRC | vk::FormatFeatureFlags::TRANSFER_DST;
    let optimal = match classify(format) {
        FormatClass::Color(_) => {
            transfer
                | vk::FormatFeatureFlags::SAMPLED_IMAGE
                | vk::FormatFeatureFlags::SAMPLED_IMAGE_FILTER_LINEAR
                | vk::FormatFeatureFlags::COLOR_ATTACHMENT
                | vk::FormatFeatureFlags::COLOR_ATTACHMENT_BLEND
                | vk::FormatFeatureFlags::BLIT_SRC
                | vk::FormatFeatureFlags::BLIT_DST
                | vk::FormatFeatureFlags::STORAGE_IMAGE
        }
        _ => {
            transfer
                | vk::FormatFeatureFlags::SAMPLED_IMAGE
                | vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT
                | vk::FormatFeatureFlags::BLIT_SRC
        }
    };
    let buffer = if vertex_format(format).is_some() {
        vk::FormatFeatureFlags::VERTEX_BUFFER
    } else {
        vk::FormatFeatureFlags::empty()
    };
    vk::FormatProperties {
        linear_tiling_features: optimal,
        optimal_tiling_features: optimal,
        buffer_features: buffer,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::noop::NoopPlatform;

    fn noop_info(platform: &Arc<NoopPlatform>, extensions: &'static [&'static str]) -> InstanceCreateInfo<'static> {
        InstanceCreateInfo {
            application_name: "instance-test",
            api_version: API_VERSION,
            enabled_extensions: extensions,
            config: Some(EmulatorConfig::noop()),
            platform: Some(Arc::clone(platform) as Arc<dyn Platform>),
            shader_compiler: None,
        }
    }

    #[test]
    fn test_native_backend_is_external() {
        let info = InstanceCreateInfo {
            config: Some(EmulatorConfig {
                backend: BackendKind::Native,
                ..EmulatorConfig::default()
            }),
            ..InstanceCreateInfo::default()
        };
        if std::env::var("VKGL_BACKEND").is_err() {
            assert!(matches!(
                Instance::new(&info),
                Err(VulkanError::IncompatibleDriver(_))
            ));
        }
    }

    #[test]
    fn test_unknown_extension_is_rejected() {
        let platform = Arc::new(NoopPlatform::new());
        let info = noop_info(&platform, &["VK_KHR_not_a_thing"]);
        assert!(matches!(
            Instance::new(&info),
            Err(VulkanError::ExtensionNotPresent(_))
        ));
    }

    #[test]
    fn test_old_driver_is_incompatible() {
        let platform = Arc::new(NoopPlatform::with_version((3, 0)));
        let mut info = noop_info(&platform, &[]);
        info.config = Some(EmulatorConfig {
            backend: BackendKind::LegacyCore33,
            ..EmulatorConfig::default()
        });
        info.shader_compiler = Some(Arc::new(NoopShaderCompiler));
        if std::env::var("VKGL_BACKEND").is_err() {
            assert!(matches!(
                Instance::new(&info),
                Err(VulkanError::IncompatibleDriver(_))
            ));
        }
    }

    #[test]
    fn test_physical_device_queries() {
        let platform = Arc::new(NoopPlatform::new());
        let instance = Instance::new(&noop_info(&platform, &[])).unwrap();
        let devices = instance.enumerate_physical_devices();
        assert_eq!(devices.len(), 1);

        let properties = instance.get_physical_device_properties(devices[0]).unwrap();
        assert_eq!(properties.api_version, API_VERSION);
        assert_eq!(properties.limits.max_push_constants_size, 128);

        let families = instance
            .get_physical_device_queue_family_properties(devices[0])
            .unwrap();
        assert!(families[0].queue_flags.contains(vk::QueueFlags::GRAPHICS));

        let depth = instance
            .get_physical_device_format_properties(devices[0], vk::Format::D32_SFLOAT)
            .unwrap();
        assert!(depth
            .optimal_tiling_features
            .contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT));
    }

    #[test]
    fn test_missing_features_are_named() {
        let supported = features(Capabilities::empty());
        let requested = vk::PhysicalDeviceFeatures {
            depth_clamp: vk::TRUE,
            geometry_shader: vk::TRUE,
            ..Default::default()
        };
        assert_eq!(missing_features(&requested, &supported), vec!["geometry_shader"]);
    }

    #[test]
    fn test_proc_addr_respects_extensions() {
        let platform = Arc::new(NoopPlatform::new());
        let plain = Instance::new(&noop_info(&platform, &[])).unwrap();
        assert!(plain.get_instance_proc_addr("vkCreateDevice").is_some());
        assert!(plain
            .get_instance_proc_addr("vkCreateDebugUtilsMessengerEXT")
            .is_none());
        assert!(plain.get_instance_proc_addr("vkNotAFunction").is_none());

        let debug = Instance::new(&noop_info(&platform, &[EXT_DEBUG_UTILS])).unwrap();
        assert!(debug
            .get_instance_proc_addr("vkCreateDebugUtilsMessengerEXT")
            .is_some());
        assert!(get_global_proc_addr("vkCreateInstance").is_some());
    }
}
